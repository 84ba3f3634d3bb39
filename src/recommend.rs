const HIGH: &[&str] = &[
    "Attend at least 80% of classes.",
    "Study a minimum of 2 hours every day.",
    "Meet your mentor weekly for guidance.",
    "Work on clearing previous backlogs immediately.",
    "Reduce distractions such as mobile usage during study time.",
];

const MODERATE: &[&str] = &[
    "Maintain attendance above 75%.",
    "Study at least 1 hour daily.",
    "Revise concepts weekly.",
    "Focus on weak subjects consistently.",
];

const DEFAULT: &[&str] = &[
    "Keep up the good performance.",
    "Participate in academic and technical activities.",
    "Aim to maintain a CGPA above 8.",
    "Continue practicing effective study habits.",
];

/// Guidance for a risk label. Unrecognized or missing labels get the
/// default list; the result is never empty.
pub fn recommendations_for(label: Option<&str>) -> &'static [&'static str] {
    let label = label.unwrap_or_default().trim().to_ascii_lowercase();
    match label.as_str() {
        "high" => HIGH,
        "moderate" | "medium" => MODERATE,
        _ => DEFAULT,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn high_is_case_insensitive() {
        for label in ["HIGH", "High", "high"] {
            assert_eq!(recommendations_for(Some(label)).len(), 5);
            assert_eq!(recommendations_for(Some(label)), HIGH);
        }
    }

    #[test]
    fn medium_aliases_moderate() {
        assert_eq!(recommendations_for(Some("Medium")), MODERATE);
        assert_eq!(recommendations_for(Some("Moderate")), MODERATE);
        assert_eq!(MODERATE.len(), 4);
    }

    #[test]
    fn unknown_labels_fall_back_to_default() {
        for label in [Some("low"), Some("critical"), Some(""), Some("   "), None] {
            let set = recommendations_for(label);
            assert_eq!(set, DEFAULT);
            assert!(!set.is_empty());
        }
    }
}
