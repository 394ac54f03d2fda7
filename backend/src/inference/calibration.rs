use shared::ModelStage;

use super::config::CalibrationConfig;
use super::error::InferenceError;
use super::types::ScoreVector;

pub fn softmax(values: &[f32]) -> Vec<f32> {
    softmax_scaled(values, 1.0)
}

/// Softmax of `values / temperature`. Scaling and exponentials run in f64 after max subtraction.
pub fn softmax_scaled(values: &[f32], temperature: f32) -> Vec<f32> {
    let widened: Vec<f64> = values.iter().map(|&v| v as f64).collect();
    softmax_f64(&widened, temperature as f64)
}

fn softmax_f64(values: &[f64], temperature: f64) -> Vec<f32> {
    let scaled: Vec<f64> = values.iter().map(|v| v / temperature).collect();
    let max = scaled.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let exps: Vec<f64> = scaled.iter().map(|&v| (v - max).exp()).collect();
    let total: f64 = exps.iter().sum();
    exps.into_iter().map(|e| (e / total) as f32).collect()
}

/// Turns raw model outputs into probability distributions.
#[derive(Debug, Clone, Copy)]
pub struct ScoreCalibrator {
    stage: ModelStage,
    config: CalibrationConfig,
}

impl ScoreCalibrator {
    pub fn new(stage: ModelStage, config: CalibrationConfig) -> Self {
        Self { stage, config }
    }

    pub fn calibrate(
        &self,
        raw: &ScoreVector,
        emits_distribution: bool,
    ) -> Result<ScoreVector, InferenceError> {
        if raw.is_empty() {
            return Err(InferenceError::inference_failure(
                self.stage,
                "model returned an empty score vector",
            ));
        }
        if !raw.is_finite() {
            return Err(InferenceError::inference_failure(
                self.stage,
                format!("model returned non-finite scores: {:?}", raw.as_slice()),
            ));
        }

        let is_distribution = self.is_distribution(raw);
        if emits_distribution && !is_distribution {
            log::warn!(
                "{} model is declared to emit probabilities but returned {:?} (sum {:.4}); treating as logits",
                self.stage,
                raw.as_slice(),
                raw.sum()
            );
        }

        let calibrated = if self.config.temperature_scaling {
            let temperature = self.config.temperature as f64;
            if emits_distribution && is_distribution {
                // ln(0) is -inf and maps back to exactly 0
                let log_probs: Vec<f64> =
                    raw.as_slice().iter().map(|&p| (p as f64).ln()).collect();
                softmax_f64(&log_probs, temperature)
            } else {
                softmax_scaled(raw.as_slice(), self.config.temperature)
            }
        } else if is_distribution {
            return Ok(raw.clone());
        } else {
            softmax(raw.as_slice())
        };

        let calibrated = ScoreVector::new(calibrated);
        if !calibrated.is_finite() {
            return Err(InferenceError::inference_failure(
                self.stage,
                format!(
                    "calibration of {:?} produced non-finite probabilities",
                    raw.as_slice()
                ),
            ));
        }
        Ok(calibrated)
    }

    fn is_distribution(&self, scores: &ScoreVector) -> bool {
        scores.as_slice().iter().all(|&v| v >= 0.0)
            && (scores.sum() - 1.0).abs() <= self.config.sum_tolerance
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn calibrator(temperature_scaling: bool, temperature: f32) -> ScoreCalibrator {
        ScoreCalibrator::new(
            ModelStage::Binary,
            CalibrationConfig {
                temperature_scaling,
                temperature,
                sum_tolerance: 1e-3,
            },
        )
    }

    fn assert_distribution(scores: &ScoreVector) {
        assert!(scores.as_slice().iter().all(|&v| v >= 0.0), "{:?}", scores);
        assert!((scores.sum() - 1.0).abs() < 1e-3, "{:?}", scores);
    }

    #[test]
    fn extreme_logits_stay_finite_and_normalized() {
        for calibrator in [calibrator(false, 1.0), calibrator(true, 2.0)] {
            let out = calibrator
                .calibrate(&ScoreVector::from(vec![1000.0, -1000.0]), false)
                .unwrap();
            assert_distribution(&out);
            assert!(out.as_slice()[0] > 0.999);
        }
    }

    #[test]
    fn sharpening_near_f32_max_does_not_overflow() {
        let out = calibrator(true, 0.5)
            .calibrate(&ScoreVector::from(vec![3.0e38, 0.0]), false)
            .unwrap();
        assert_distribution(&out);
        assert_eq!(out.as_slice(), &[1.0, 0.0]);

        let out = calibrator(true, 0.5)
            .calibrate(&ScoreVector::from(vec![-3.0e38, 3.0e38]), false)
            .unwrap();
        assert_eq!(out.as_slice(), &[0.0, 1.0]);
    }

    #[test]
    fn arbitrary_logits_become_distributions() {
        let calibrator = calibrator(false, 1.0);
        for raw in [
            vec![0.0, 0.0, 0.0, 0.0],
            vec![3.5, -2.0, 0.1],
            vec![-50.0, -49.0],
            vec![88.0, 89.0, 90.0, -300.0],
        ] {
            let out = calibrator.calibrate(&ScoreVector::from(raw), false).unwrap();
            assert_distribution(&out);
        }
    }

    #[test]
    fn existing_distribution_passes_through_without_temperature() {
        let raw = ScoreVector::from(vec![0.1, 0.9]);
        let out = calibrator(false, 1.0).calibrate(&raw, true).unwrap();
        assert_eq!(out, raw);
    }

    #[test]
    fn emitted_probabilities_are_tempered_not_renormalized() {
        let raw = ScoreVector::from(vec![0.1, 0.9]);

        let unit = calibrator(true, 1.0).calibrate(&raw, true).unwrap();
        assert!((unit.as_slice()[0] - 0.1).abs() < 1e-6);
        assert!((unit.as_slice()[1] - 0.9).abs() < 1e-6);

        // p^(1/2) renormalized: sqrt(0.1) : sqrt(0.9) = 1 : 3
        let soft = calibrator(true, 2.0).calibrate(&raw, true).unwrap();
        assert!((soft.as_slice()[0] - 0.25).abs() < 1e-6);
        assert!((soft.as_slice()[1] - 0.75).abs() < 1e-6);

        let certain = calibrator(true, 2.0)
            .calibrate(&ScoreVector::from(vec![0.0, 1.0]), true)
            .unwrap();
        assert_eq!(certain.as_slice(), &[0.0, 1.0]);
    }

    #[test]
    fn declared_probabilities_that_are_logits_get_softmaxed() {
        let raw = ScoreVector::from(vec![2.0, 0.0]);
        let out = calibrator(true, 1.0).calibrate(&raw, true).unwrap();
        assert!((out.as_slice()[0] - 0.880_797).abs() < 1e-5);
    }

    #[test]
    fn negative_entries_are_never_passed_through() {
        let raw = ScoreVector::from(vec![1.5, -0.5]);
        let out = calibrator(false, 1.0).calibrate(&raw, true).unwrap();
        assert_distribution(&out);
        assert_ne!(out, raw);
    }

    #[test]
    fn higher_temperature_softens_the_distribution() {
        let raw = ScoreVector::from(vec![2.0, 0.0]);
        let sharp = calibrator(true, 0.5).calibrate(&raw, false).unwrap();
        let plain = calibrator(true, 1.0).calibrate(&raw, false).unwrap();
        let soft = calibrator(true, 4.0).calibrate(&raw, false).unwrap();
        assert!(sharp.as_slice()[0] > plain.as_slice()[0]);
        assert!(plain.as_slice()[0] > soft.as_slice()[0]);
        assert!((plain.as_slice()[0] - 0.880_797).abs() < 1e-5);
    }

    #[test]
    fn non_finite_or_empty_scores_are_inference_failures() {
        let calibrator = calibrator(false, 1.0);
        let err = calibrator
            .calibrate(&ScoreVector::from(vec![f32::NAN, 0.5]), false)
            .unwrap_err();
        assert!(matches!(err, InferenceError::InferenceFailure { .. }));
        assert!(calibrator.calibrate(&ScoreVector::default(), false).is_err());
    }
}
