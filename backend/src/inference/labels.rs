use std::collections::HashMap;

use lazy_static::lazy_static;
use shared::ModelStage;

use super::error::InferenceError;

pub const LABEL_SCHEMA_VERSION: u32 = 1;

pub const HEALTHY_LABEL: &str = "Healthy";
pub const DISEASED_LABEL: &str = "Diseased";

/// Binary gate output order. Must match the order the gate was trained with.
pub const BINARY_LABELS: &[&str] = &[DISEASED_LABEL, HEALTHY_LABEL];

pub const MULTICLASS_LABELS: &[&str] = &[
    "Guava_Canker",
    "Guava_Dot",
    "Guava_Mummification",
    "Guava_Rust",
    "Healty_plants",
    "Money_plant_Bacterial_wilt_disease",
    "Money_plant_Manganese Toxicity",
    "Neem_Alternaria",
    "Neem_Dieback",
    "Neem_Leaf_Blight",
    "Neem_Leaf_Miners",
    "Neem_Leaf_Miners_Powdery_Mildew",
    "Neem_Powdery_Mildew",
    "Tomato___Bacterial_spot",
    "Tomato___Early_blight",
    "Tomato___Late_blight",
    "Tomato___Leaf_Mold",
];

lazy_static! {
    pub static ref BINARY_SCHEMA: LabelSchema =
        LabelSchema::new("binary", LABEL_SCHEMA_VERSION, BINARY_LABELS);
    pub static ref MULTICLASS_SCHEMA: LabelSchema =
        LabelSchema::new("multiclass", LABEL_SCHEMA_VERSION, MULTICLASS_LABELS);
}

#[derive(Debug)]
pub struct LabelSchema {
    name: &'static str,
    version: u32,
    labels: &'static [&'static str],
    index: HashMap<&'static str, usize>,
}

impl LabelSchema {
    fn new(name: &'static str, version: u32, labels: &'static [&'static str]) -> Self {
        let index = labels.iter().enumerate().map(|(i, &l)| (l, i)).collect();
        Self {
            name,
            version,
            labels,
            index,
        }
    }

    pub fn for_stage(stage: ModelStage) -> &'static LabelSchema {
        match stage {
            ModelStage::Binary => &BINARY_SCHEMA,
            ModelStage::Multiclass => &MULTICLASS_SCHEMA,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn labels(&self) -> &'static [&'static str] {
        self.labels
    }

    pub fn label(&self, index: usize) -> Option<&'static str> {
        self.labels.get(index).copied()
    }

    pub fn index_of(&self, label: &str) -> Option<usize> {
        self.index.get(label).copied()
    }

    pub fn validate_cardinality(&self, actual: usize) -> Result<(), InferenceError> {
        if actual != self.len() {
            return Err(InferenceError::LabelSchemaMismatch {
                schema: self.name,
                expected: self.len(),
                actual,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binary_schema_keeps_diseased_first() {
        assert_eq!(BINARY_SCHEMA.index_of(DISEASED_LABEL), Some(0));
        assert_eq!(BINARY_SCHEMA.index_of(HEALTHY_LABEL), Some(1));
        assert_eq!(BINARY_SCHEMA.version(), LABEL_SCHEMA_VERSION);
    }

    #[test]
    fn multiclass_schema_indexes_every_label() {
        assert_eq!(MULTICLASS_SCHEMA.len(), 17);
        assert_eq!(MULTICLASS_SCHEMA.index_of("Guava_Rust"), Some(3));
        assert_eq!(MULTICLASS_SCHEMA.label(16), Some("Tomato___Leaf_Mold"));
        assert_eq!(MULTICLASS_SCHEMA.label(17), None);
    }

    #[test]
    fn cardinality_mismatch_is_reported_with_both_sizes() {
        let err = BINARY_SCHEMA.validate_cardinality(3).unwrap_err();
        match err {
            InferenceError::LabelSchemaMismatch {
                schema,
                expected,
                actual,
            } => {
                assert_eq!(schema, "binary");
                assert_eq!(expected, 2);
                assert_eq!(actual, 3);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(MULTICLASS_SCHEMA.validate_cardinality(17).is_ok());
    }
}
