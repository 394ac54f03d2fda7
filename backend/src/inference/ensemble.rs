use serde::Serialize;
use shared::ModelStage;

use super::error::InferenceError;
use super::types::ScoreVector;

/// Element-wise mean and population standard deviation over TTA variants.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EnsembleResult {
    pub mean: ScoreVector,
    pub std: ScoreVector,
}

impl EnsembleResult {
    pub fn mean_of(&self, index: usize) -> Option<f32> {
        self.mean.get(index)
    }

    pub fn std_of(&self, index: usize) -> Option<f32> {
        self.std.get(index)
    }

    pub fn interval(&self, index: usize) -> Option<(f32, f32)> {
        let mean = self.mean_of(index)?;
        let std = self.std_of(index)?;
        Some((mean - std, mean + std))
    }
}

pub fn aggregate(
    stage: ModelStage,
    samples: &[ScoreVector],
) -> Result<EnsembleResult, InferenceError> {
    let first = samples.first().ok_or_else(|| {
        InferenceError::inference_failure(stage, "no score vectors to aggregate")
    })?;
    let classes = first.len();
    if let Some(bad) = samples.iter().find(|s| s.len() != classes) {
        return Err(InferenceError::inference_failure(
            stage,
            format!(
                "score vectors disagree in length ({} vs {})",
                classes,
                bad.len()
            ),
        ));
    }

    if samples.len() == 1 {
        return Ok(EnsembleResult {
            mean: first.clone(),
            std: ScoreVector::zeros(classes),
        });
    }

    let n = samples.len() as f64;
    let mut mean = Vec::with_capacity(classes);
    let mut std = Vec::with_capacity(classes);
    for class in 0..classes {
        let column: Vec<f64> = samples
            .iter()
            .map(|s| s.as_slice()[class] as f64)
            .collect();
        let avg = column.iter().sum::<f64>() / n;
        let constant = column.iter().all(|&v| v == column[0]);
        let deviation = if constant {
            0.0
        } else {
            (column.iter().map(|v| (v - avg).powi(2)).sum::<f64>() / n).sqrt()
        };
        mean.push(avg as f32);
        std.push(deviation as f32);
    }

    Ok(EnsembleResult {
        mean: ScoreVector::new(mean),
        std: ScoreVector::new(std),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scores(values: &[f32]) -> ScoreVector {
        ScoreVector::from(values.to_vec())
    }

    #[test]
    fn identical_samples_have_zero_dispersion() {
        let samples = vec![scores(&[0.1, 0.3, 0.6]); 6];
        let result = aggregate(ModelStage::Multiclass, &samples).unwrap();
        assert_eq!(result.std, ScoreVector::zeros(3));
        assert!((result.mean.as_slice()[2] - 0.6).abs() < 1e-7);
    }

    #[test]
    fn single_sample_has_zero_dispersion() {
        let result = aggregate(ModelStage::Binary, &[scores(&[0.25, 0.75])]).unwrap();
        assert_eq!(result.mean, scores(&[0.25, 0.75]));
        assert_eq!(result.std, ScoreVector::zeros(2));
    }

    #[test]
    fn population_standard_deviation_per_class() {
        let healthy = [0.4, 0.5, 0.6, 0.5, 0.4, 0.6];
        let samples: Vec<_> = healthy.iter().map(|&h| scores(&[1.0 - h, h])).collect();
        let result = aggregate(ModelStage::Binary, &samples).unwrap();
        let expected_std = (0.04f64 / 6.0).sqrt() as f32;
        assert!((result.mean.as_slice()[1] - 0.5).abs() < 1e-6);
        assert!((result.std.as_slice()[1] - expected_std).abs() < 1e-5);
        assert_eq!(result.mean.len(), result.std.len());

        let (lo, hi) = result.interval(1).unwrap();
        assert!((lo - (0.5 - expected_std)).abs() < 1e-5);
        assert!((hi - (0.5 + expected_std)).abs() < 1e-5);
    }

    #[test]
    fn mismatched_or_empty_input_is_rejected() {
        assert!(aggregate(ModelStage::Binary, &[]).is_err());
        let err = aggregate(ModelStage::Binary, &[scores(&[0.5, 0.5]), scores(&[1.0])])
            .unwrap_err();
        assert!(matches!(err, InferenceError::InferenceFailure { .. }));
    }
}
