use shared::{ModelStage, RequestHints};

use crate::inference::ClassificationVerdict;

/// Templated care advice for a verdict. Healthy verdicts only come from the binary gate.
pub fn care_recommendation(verdict: &ClassificationVerdict, hints: &RequestHints) -> String {
    match verdict.model_used {
        ModelStage::Binary => format!(
            "Your {} appears healthy. Continue regular care.",
            hints.plant_type
        ),
        ModelStage::Multiclass => format!(
            "Your {} shows signs of {}. Adjust care routine; water every {} days. (Language: {})",
            hints.plant_type, verdict.label, hints.water_freq, hints.language
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn verdict(label: &str, model_used: ModelStage) -> ClassificationVerdict {
        ClassificationVerdict {
            label: label.to_string(),
            confidence: 0.8,
            confidence_interval: (0.8, 0.8),
            model_used,
            binary_label: None,
            binary_confidence: None,
        }
    }

    #[test]
    fn healthy_advice_mentions_only_the_plant() {
        let hints = RequestHints::from_optional(Some("Neem".into()), None, None);
        assert_eq!(
            care_recommendation(&verdict("Healthy", ModelStage::Binary), &hints),
            "Your Neem appears healthy. Continue regular care."
        );
    }

    #[test]
    fn disease_advice_carries_every_hint() {
        let hints = RequestHints::from_optional(
            Some("Guava".into()),
            Some("3".into()),
            Some("hindi".into()),
        );
        assert_eq!(
            care_recommendation(&verdict("Guava_Rust", ModelStage::Multiclass), &hints),
            "Your Guava shows signs of Guava_Rust. Adjust care routine; water every 3 days. (Language: hindi)"
        );
    }

    #[test]
    fn missing_hints_use_placeholders() {
        let text = care_recommendation(
            &verdict("Neem_Dieback", ModelStage::Multiclass),
            &RequestHints::default(),
        );
        assert!(text.starts_with("Your unknown shows signs of Neem_Dieback."));
        assert!(text.ends_with("(Language: english)"));
    }
}
