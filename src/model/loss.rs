use burn::nn::loss::{MseLoss, Reduction};
use burn::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::{HarnessError, Result};

/// Regression loss between flattened forecasts and targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LossKind {
    #[default]
    Mse,
    Mae,
}

impl LossKind {
    /// Scalar loss averaged over every element
    pub fn forward<B: Backend>(&self, outputs: Tensor<B, 2>, targets: Tensor<B, 2>) -> Tensor<B, 1> {
        match self {
            LossKind::Mse => MseLoss::new().forward(outputs, targets, Reduction::Mean),
            LossKind::Mae => (outputs - targets).abs().mean(),
        }
    }
}

/// Value range used to rescale forecasts into `[0, 1]`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TargetRange {
    pub min: f64,
    pub max: f64,
}

impl TargetRange {
    pub fn new(min: f64, max: f64) -> Result<Self> {
        let range = Self { min, max };
        range.validate()?;
        Ok(range)
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.max > self.min) {
            return Err(HarnessError::InvalidConfig(format!(
                "normalize_target.max ({}) must exceed min ({})",
                self.max, self.min
            )));
        }
        Ok(())
    }

    /// `(x - min) / (max - min)`
    pub fn normalize<B: Backend, const D: usize>(&self, x: Tensor<B, D>) -> Tensor<B, D> {
        x.sub_scalar(self.min).div_scalar(self.max - self.min)
    }
}

/// `[b, steps, h, w]` to `[b, steps * h * w]`
pub fn flatten_frames<B: Backend>(frames: Tensor<B, 4>) -> Tensor<B, 2> {
    let [b, steps, h, w] = frames.dims();
    frames.reshape([b, steps * h * w])
}

/// Flatten both sides, rescale the forecasts only, and score them
pub fn forecast_loss<B: Backend>(
    loss: LossKind,
    normalize: Option<&TargetRange>,
    outputs: Tensor<B, 4>,
    targets: Tensor<B, 4>,
) -> Tensor<B, 1> {
    let mut outputs = flatten_frames(outputs);
    let targets = flatten_frames(targets);
    if let Some(range) = normalize {
        outputs = range.normalize(outputs);
    }
    loss.forward(outputs, targets)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use burn::backend::NdArray;

    type TestBackend = NdArray<f32>;

    fn scalar(t: Tensor<TestBackend, 1>) -> f64 {
        t.into_scalar().elem::<f64>()
    }

    #[test]
    fn test_losses() {
        let device = Default::default();
        let a = Tensor::<TestBackend, 2>::from_floats([[1.0, 3.0]], &device);
        let b = Tensor::<TestBackend, 2>::from_floats([[0.0, 0.0]], &device);

        assert_relative_eq!(scalar(LossKind::Mse.forward(a.clone(), b.clone())), 5.0);
        assert_relative_eq!(scalar(LossKind::Mae.forward(a, b)), 2.0);
    }

    #[test]
    fn test_flatten_frames() {
        let device = Default::default();
        let frames = Tensor::<TestBackend, 4>::zeros([2, 3, 4, 5], &device);
        assert_eq!(flatten_frames(frames).dims(), [2, 60]);
    }

    #[test]
    fn test_normalization_touches_outputs_only() {
        let device = Default::default();
        let range = TargetRange::new(0.0, 10.0).unwrap();

        let outputs = Tensor::<TestBackend, 4>::full([1, 1, 2, 2], 5.0, &device);
        let targets = Tensor::<TestBackend, 4>::full([1, 1, 2, 2], 5.0, &device);

        // Rescaled forecasts are 0.5 against raw targets of 5.0
        let with = scalar(forecast_loss(LossKind::Mse, Some(&range), outputs.clone(), targets.clone()));
        assert_relative_eq!(with, 20.25, epsilon = 1e-5);

        let without = scalar(forecast_loss(LossKind::Mse, None, outputs, targets));
        assert_relative_eq!(without, 0.0);
    }

    #[test]
    fn test_range_validation() {
        assert!(TargetRange::new(0.0, 0.0).is_err());
        assert!(TargetRange::new(5.0, 1.0).is_err());
        assert!(TargetRange::new(0.0, 200.0).is_ok());
    }

    #[test]
    fn test_loss_kind_serde() {
        assert_eq!(serde_json::to_string(&LossKind::Mae).unwrap(), "\"mae\"");
        let kind: LossKind = serde_json::from_str("\"mse\"").unwrap();
        assert_eq!(kind, LossKind::Mse);
    }
}
