use std::time::Instant;

use shared::{ModelStage, ModelStatusResponse};

use super::augmentations::{AugmentationKind, TestTimeAugmentation};
use super::config::PipelineConfig;
use super::ensemble::EnsembleResult;
use super::error::InferenceError;
use super::normalizer::{to_tensor, ImageNormalizer};
use super::router::{ClassificationVerdict, RouterStage, TwoStageRouter};
use super::types::NormalizedTensor;
use crate::model::ModelRegistry;

#[derive(Debug, Clone)]
pub struct InferenceOutcome {
    pub verdict: ClassificationVerdict,
    pub binary: EnsembleResult,
    pub multiclass: Option<EnsembleResult>,
    pub variants: Vec<AugmentationKind>,
    pub trace: Vec<RouterStage>,
}

pub struct InferencePipeline {
    config: PipelineConfig,
    models: ModelRegistry,
    normalizer: ImageNormalizer,
    augmenter: TestTimeAugmentation,
}

impl InferencePipeline {
    pub fn new(config: PipelineConfig, models: ModelRegistry) -> Self {
        let normalizer = ImageNormalizer::new(&config.image);
        let augmenter = TestTimeAugmentation::new(&config.augmentations);
        Self {
            config,
            models,
            normalizer,
            augmenter,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn model_status(&self) -> ModelStatusResponse {
        self.models.status()
    }

    pub fn infer(&self, bytes: &[u8]) -> Result<InferenceOutcome, InferenceError> {
        let binary_model = self.models.require(ModelStage::Binary)?;
        let multiclass_model = self.models.require(ModelStage::Multiclass)?;

        let started = Instant::now();
        let (variants, tensors) = self.prepare(bytes)?;
        log::debug!(
            "Prepared {} variants in {:?}",
            tensors.len(),
            started.elapsed()
        );

        let router = TwoStageRouter::new(
            binary_model.as_ref(),
            multiclass_model.as_ref(),
            &self.config.calibration,
            &self.config.router,
        );
        let routed = router.run(&tensors)?;

        let verdict = &routed.verdict;
        log::info!(
            "Prediction: {} ({:.4}, interval [{:.4}, {:.4}]) via {} model in {:?}",
            verdict.label,
            verdict.confidence,
            verdict.confidence_interval.0,
            verdict.confidence_interval.1,
            verdict.model_used,
            started.elapsed()
        );

        Ok(InferenceOutcome {
            verdict: routed.verdict,
            binary: routed.binary,
            multiclass: routed.multiclass,
            variants,
            trace: routed.trace,
        })
    }

    pub fn prepare(
        &self,
        bytes: &[u8],
    ) -> Result<(Vec<AugmentationKind>, Vec<NormalizedTensor>), InferenceError> {
        let normalized = self.normalizer.normalize(bytes)?;
        let mode = self.config.image.normalization;
        Ok(self
            .augmenter
            .generate(&normalized)
            .into_iter()
            .map(|variant| (variant.kind, to_tensor(&variant.image, mode)))
            .unzip())
    }
}
