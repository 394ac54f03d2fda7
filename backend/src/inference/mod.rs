pub mod augmentations;
pub mod calibration;
pub mod config;
pub mod ensemble;
pub mod error;
pub mod labels;
#[cfg(feature = "torch")]
pub mod model;
pub mod normalizer;
pub mod pipeline;
pub mod router;
pub mod types;

pub use config::PipelineConfig;
pub use error::InferenceError;
pub use pipeline::{InferenceOutcome, InferencePipeline};
pub use router::ClassificationVerdict;
pub use types::{NormalizedTensor, ScoreVector};
