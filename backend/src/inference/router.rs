//! Binary gate first, multi-class diagnosis only when the gate does not
//! confidently call the leaf healthy.
//!
//! The router is a small state machine. Every request walks
//! `Start -> BinaryScored -> DecidedHealthy` or
//! `Start -> BinaryScored -> NeedsMulticlass -> MulticlassScored -> DecidedDisease`
//! exactly once; any error aborts the walk.

use serde::Serialize;
use shared::ModelStage;

use super::calibration::ScoreCalibrator;
use super::config::{CalibrationSettings, RouterConfig};
use super::ensemble::{aggregate, EnsembleResult};
use super::error::InferenceError;
use super::labels::{LabelSchema, BINARY_SCHEMA, HEALTHY_LABEL, MULTICLASS_SCHEMA};
use super::types::NormalizedTensor;
use crate::model::ScorePredictor;

/// Scores closer than this are treated as a tie; the binary gate resolves ties to Healthy.
pub const TIE_TOLERANCE: f32 = 1e-6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RouterStage {
    Start,
    BinaryScored,
    DecidedHealthy,
    NeedsMulticlass,
    MulticlassScored,
    DecidedDisease,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassificationVerdict {
    pub label: String,
    pub confidence: f32,
    pub confidence_interval: (f32, f32),
    pub model_used: ModelStage,
    pub binary_label: Option<String>,
    pub binary_confidence: Option<f32>,
}

impl ClassificationVerdict {
    fn from_ensemble(
        ensemble: &EnsembleResult,
        index: usize,
        schema: &LabelSchema,
        model_used: ModelStage,
    ) -> Result<Self, InferenceError> {
        let label = schema.label(index).ok_or_else(|| {
            InferenceError::inference_failure(
                model_used,
                format!("class index {} outside the {} schema", index, schema.name()),
            )
        })?;
        let confidence = ensemble.mean_of(index).unwrap_or_default();
        let confidence_interval = ensemble.interval(index).unwrap_or((confidence, confidence));
        Ok(Self {
            label: label.to_string(),
            confidence,
            confidence_interval,
            model_used,
            binary_label: None,
            binary_confidence: None,
        })
    }
}

#[derive(Debug, Clone)]
pub struct RoutedOutcome {
    pub verdict: ClassificationVerdict,
    pub binary: EnsembleResult,
    pub multiclass: Option<EnsembleResult>,
    pub trace: Vec<RouterStage>,
}

enum RouterState {
    Start,
    BinaryScored {
        binary: EnsembleResult,
    },
    NeedsMulticlass {
        binary: EnsembleResult,
        binary_index: usize,
    },
    MulticlassScored {
        binary: EnsembleResult,
        binary_index: usize,
        multiclass: EnsembleResult,
    },
    DecidedHealthy {
        binary: EnsembleResult,
        verdict: ClassificationVerdict,
    },
    DecidedDisease {
        binary: EnsembleResult,
        multiclass: EnsembleResult,
        verdict: ClassificationVerdict,
    },
}

impl RouterState {
    fn stage(&self) -> RouterStage {
        match self {
            RouterState::Start => RouterStage::Start,
            RouterState::BinaryScored { .. } => RouterStage::BinaryScored,
            RouterState::NeedsMulticlass { .. } => RouterStage::NeedsMulticlass,
            RouterState::MulticlassScored { .. } => RouterStage::MulticlassScored,
            RouterState::DecidedHealthy { .. } => RouterStage::DecidedHealthy,
            RouterState::DecidedDisease { .. } => RouterStage::DecidedDisease,
        }
    }
}

struct ModelPass<'a> {
    stage: ModelStage,
    predictor: &'a dyn ScorePredictor,
    calibrator: ScoreCalibrator,
    schema: &'static LabelSchema,
}

impl ModelPass<'_> {
    fn score(&self, variants: &[NormalizedTensor]) -> Result<EnsembleResult, InferenceError> {
        let emits_distribution = self.predictor.emits_distribution();
        let mut calibrated = Vec::with_capacity(variants.len());
        for tensor in variants {
            let raw = self.predictor.predict(tensor)?;
            self.schema.validate_cardinality(raw.len())?;
            calibrated.push(self.calibrator.calibrate(&raw, emits_distribution)?);
        }
        let ensemble = aggregate(self.stage, &calibrated)?;
        log::debug!(
            "{} ensemble avg: {:?}, std: {:?}",
            self.stage,
            ensemble.mean.as_slice(),
            ensemble.std.as_slice()
        );
        Ok(ensemble)
    }
}

pub struct TwoStageRouter<'a> {
    binary: ModelPass<'a>,
    multiclass: ModelPass<'a>,
    healthy_threshold: f32,
}

impl<'a> TwoStageRouter<'a> {
    pub fn new(
        binary: &'a dyn ScorePredictor,
        multiclass: &'a dyn ScorePredictor,
        calibration: &CalibrationSettings,
        router: &RouterConfig,
    ) -> Self {
        Self {
            binary: ModelPass {
                stage: ModelStage::Binary,
                predictor: binary,
                calibrator: ScoreCalibrator::new(ModelStage::Binary, calibration.binary),
                schema: &BINARY_SCHEMA,
            },
            multiclass: ModelPass {
                stage: ModelStage::Multiclass,
                predictor: multiclass,
                calibrator: ScoreCalibrator::new(ModelStage::Multiclass, calibration.multiclass),
                schema: &MULTICLASS_SCHEMA,
            },
            healthy_threshold: router.healthy_threshold,
        }
    }

    pub fn run(&self, variants: &[NormalizedTensor]) -> Result<RoutedOutcome, InferenceError> {
        let mut state = RouterState::Start;
        let mut trace = vec![RouterStage::Start];
        loop {
            state = self.step(state, variants)?;
            trace.push(state.stage());
            log::debug!("router -> {:?}", state.stage());
            match state {
                RouterState::DecidedHealthy { binary, verdict } => {
                    return Ok(RoutedOutcome {
                        verdict,
                        binary,
                        multiclass: None,
                        trace,
                    });
                }
                RouterState::DecidedDisease {
                    binary,
                    multiclass,
                    verdict,
                } => {
                    return Ok(RoutedOutcome {
                        verdict,
                        binary,
                        multiclass: Some(multiclass),
                        trace,
                    });
                }
                _ => {}
            }
        }
    }

    fn step(
        &self,
        state: RouterState,
        variants: &[NormalizedTensor],
    ) -> Result<RouterState, InferenceError> {
        match state {
            RouterState::Start => Ok(RouterState::BinaryScored {
                binary: self.binary.score(variants)?,
            }),
            RouterState::BinaryScored { binary } => {
                let (binary_index, healthy) = self.gate(&binary)?;
                if healthy {
                    let verdict = ClassificationVerdict::from_ensemble(
                        &binary,
                        binary_index,
                        &BINARY_SCHEMA,
                        ModelStage::Binary,
                    )?;
                    Ok(RouterState::DecidedHealthy { binary, verdict })
                } else {
                    Ok(RouterState::NeedsMulticlass {
                        binary,
                        binary_index,
                    })
                }
            }
            RouterState::NeedsMulticlass {
                binary,
                binary_index,
            } => Ok(RouterState::MulticlassScored {
                multiclass: self.multiclass.score(variants)?,
                binary,
                binary_index,
            }),
            RouterState::MulticlassScored {
                binary,
                binary_index,
                multiclass,
            } => {
                let index = multiclass.mean.argmax().ok_or_else(|| {
                    InferenceError::inference_failure(ModelStage::Multiclass, "empty ensemble")
                })?;
                let mut verdict = ClassificationVerdict::from_ensemble(
                    &multiclass,
                    index,
                    &MULTICLASS_SCHEMA,
                    ModelStage::Multiclass,
                )?;
                verdict.binary_label = BINARY_SCHEMA.label(binary_index).map(str::to_string);
                verdict.binary_confidence = binary.mean_of(binary_index);
                Ok(RouterState::DecidedDisease {
                    binary,
                    multiclass,
                    verdict,
                })
            }
            RouterState::DecidedHealthy { .. } | RouterState::DecidedDisease { .. } => {
                Err(InferenceError::inference_failure(
                    ModelStage::Binary,
                    "router stepped past a terminal state",
                ))
            }
        }
    }

    /// Returns the winning binary class and whether it settles the request as healthy.
    fn gate(&self, binary: &EnsembleResult) -> Result<(usize, bool), InferenceError> {
        let healthy_index = BINARY_SCHEMA.index_of(HEALTHY_LABEL).ok_or_else(|| {
            InferenceError::inference_failure(ModelStage::Binary, "binary schema lacks Healthy")
        })?;
        let top = binary.mean.argmax().ok_or_else(|| {
            InferenceError::inference_failure(ModelStage::Binary, "empty ensemble")
        })?;
        let healthy_p = binary.mean_of(healthy_index).unwrap_or_default();
        let top_p = binary.mean_of(top).unwrap_or_default();
        let winner = if healthy_p + TIE_TOLERANCE >= top_p {
            healthy_index
        } else {
            top
        };
        log::debug!(
            "binary gate: winner {:?} (p_healthy {:.4}, threshold {:.2})",
            BINARY_SCHEMA.label(winner),
            healthy_p,
            self.healthy_threshold
        );
        Ok((
            winner,
            winner == healthy_index && healthy_p >= self.healthy_threshold,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inference::labels::MULTICLASS_LABELS;
    use crate::inference::types::ScoreVector;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Scripted {
        outputs: Vec<Vec<f32>>,
        calls: AtomicUsize,
    }

    impl Scripted {
        fn new(outputs: Vec<Vec<f32>>) -> Self {
            Self {
                outputs,
                calls: AtomicUsize::new(0),
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl ScorePredictor for Scripted {
        fn predict(&self, _tensor: &NormalizedTensor) -> Result<ScoreVector, InferenceError> {
            let i = self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(ScoreVector::from(self.outputs[i % self.outputs.len()].clone()))
        }

        fn output_classes(&self) -> usize {
            self.outputs[0].len()
        }

        fn emits_distribution(&self) -> bool {
            true
        }
    }

    fn passthrough() -> CalibrationSettings {
        CalibrationSettings::default()
    }

    fn variants(n: usize) -> Vec<NormalizedTensor> {
        vec![NormalizedTensor::zeros((4, 4, 3)); n]
    }

    fn multiclass_peak(label: &str, p: f32) -> Vec<f32> {
        let rest = (1.0 - p) / (MULTICLASS_LABELS.len() - 1) as f32;
        MULTICLASS_LABELS
            .iter()
            .map(|&l| if l == label { p } else { rest })
            .collect()
    }

    #[test]
    fn confident_healthy_gate_never_runs_multiclass() {
        let binary = Scripted::new(vec![vec![0.1, 0.9]]);
        let multi = Scripted::new(vec![multiclass_peak("Guava_Rust", 0.8)]);
        let router = TwoStageRouter::new(&binary, &multi, &passthrough(), &RouterConfig::default());

        let outcome = router.run(&variants(6)).unwrap();
        assert_eq!(outcome.verdict.label, "Healthy");
        assert!((outcome.verdict.confidence - 0.9).abs() < 1e-6);
        assert_eq!(outcome.verdict.confidence_interval, (0.9, 0.9));
        assert_eq!(outcome.verdict.model_used, ModelStage::Binary);
        assert_eq!(
            outcome.trace,
            vec![
                RouterStage::Start,
                RouterStage::BinaryScored,
                RouterStage::DecidedHealthy
            ]
        );
        assert_eq!(binary.calls(), 6);
        assert_eq!(multi.calls(), 0);
        assert!(outcome.multiclass.is_none());
    }

    #[test]
    fn diseased_gate_falls_through_to_multiclass() {
        let binary = Scripted::new(vec![vec![0.7, 0.3]]);
        let multi = Scripted::new(vec![multiclass_peak("Guava_Rust", 0.8)]);
        let router = TwoStageRouter::new(&binary, &multi, &passthrough(), &RouterConfig::default());

        let outcome = router.run(&variants(6)).unwrap();
        let verdict = &outcome.verdict;
        assert_eq!(verdict.label, "Guava_Rust");
        assert!((verdict.confidence - 0.8).abs() < 1e-6);
        assert_eq!(verdict.binary_label.as_deref(), Some("Diseased"));
        assert!((verdict.binary_confidence.unwrap() - 0.7).abs() < 1e-6);
        assert_eq!(verdict.model_used, ModelStage::Multiclass);
        assert_eq!(outcome.trace.last(), Some(&RouterStage::DecidedDisease));
        assert_eq!(outcome.trace.len(), 5);
        assert_eq!(multi.calls(), 6);
    }

    #[test]
    fn healthy_below_threshold_still_consults_multiclass() {
        let binary = Scripted::new(vec![vec![0.4, 0.6]]);
        let multi = Scripted::new(vec![multiclass_peak("Neem_Dieback", 0.55)]);
        let router = TwoStageRouter::new(
            &binary,
            &multi,
            &passthrough(),
            &RouterConfig {
                healthy_threshold: 0.75,
            },
        );

        let verdict = router.run(&variants(6)).unwrap().verdict;
        assert_eq!(verdict.label, "Neem_Dieback");
        assert_eq!(verdict.binary_label.as_deref(), Some("Healthy"));
    }

    #[test]
    fn tied_gate_resolves_to_healthy() {
        let binary = Scripted::new(vec![vec![0.5, 0.5]]);
        let multi = Scripted::new(vec![multiclass_peak("Guava_Dot", 0.9)]);
        let router = TwoStageRouter::new(&binary, &multi, &passthrough(), &RouterConfig::default());

        let verdict = router.run(&variants(3)).unwrap().verdict;
        assert_eq!(verdict.label, "Healthy");
        assert_eq!(multi.calls(), 0);
    }

    #[test]
    fn wrong_output_width_aborts_the_request() {
        let binary = Scripted::new(vec![vec![0.2, 0.3, 0.5]]);
        let multi = Scripted::new(vec![multiclass_peak("Guava_Dot", 0.9)]);
        let router = TwoStageRouter::new(&binary, &multi, &passthrough(), &RouterConfig::default());

        let err = router.run(&variants(6)).unwrap_err();
        assert!(matches!(
            err,
            InferenceError::LabelSchemaMismatch {
                schema: "binary",
                expected: 2,
                actual: 3,
            }
        ));
    }
}
