use ndarray::{Array3, Array4, Axis};
use serde::{Deserialize, Serialize};

use super::config::TensorLayout;

pub type NormalizedTensor = Array3<f32>;

/// Adds the batch axis and orders the axes for `layout`.
pub fn batched(tensor: &NormalizedTensor, layout: TensorLayout) -> Array4<f32> {
    let nhwc = tensor.clone().insert_axis(Axis(0));
    match layout {
        TensorLayout::Nhwc => nhwc,
        TensorLayout::Nchw => nhwc.permuted_axes([0, 3, 1, 2]),
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ScoreVector(Vec<f32>);

impl ScoreVector {
    pub fn new(values: Vec<f32>) -> Self {
        Self(values)
    }

    pub fn zeros(len: usize) -> Self {
        Self(vec![0.0; len])
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.0
    }

    pub fn into_vec(self) -> Vec<f32> {
        self.0
    }

    pub fn get(&self, index: usize) -> Option<f32> {
        self.0.get(index).copied()
    }

    pub fn sum(&self) -> f32 {
        self.0.iter().map(|&v| v as f64).sum::<f64>() as f32
    }

    pub fn is_finite(&self) -> bool {
        self.0.iter().all(|v| v.is_finite())
    }

    /// Index of the largest score; the first index wins a tie.
    pub fn argmax(&self) -> Option<usize> {
        let mut best: Option<(usize, f32)> = None;
        for (i, &v) in self.0.iter().enumerate() {
            match best {
                Some((_, b)) if v <= b => {}
                _ => best = Some((i, v)),
            }
        }
        best.map(|(i, _)| i)
    }
}

impl From<Vec<f32>> for ScoreVector {
    fn from(values: Vec<f32>) -> Self {
        Self(values)
    }
}

impl AsRef<[f32]> for ScoreVector {
    fn as_ref(&self) -> &[f32] {
        &self.0
    }
}
