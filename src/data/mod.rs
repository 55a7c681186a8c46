pub mod batcher;
pub mod loader;
pub mod synthetic;

pub use batcher::{FrameBatch, FrameBatcher};
pub use loader::{build_loaders, FrameDataset, FrameLoader};

use crate::error::{HarnessError, Result};
use serde::{Deserialize, Serialize};

/// Shape of one sequence-to-sequence sample
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameGeometry {
    /// Number of observed input frames
    pub in_steps: usize,
    /// Number of frames the model must forecast
    pub target_steps: usize,
    /// Channels per input frame
    pub input_channels: usize,
    /// Frame height in pixels
    pub height: usize,
    /// Frame width in pixels
    pub width: usize,
    /// Storm-track features per input step
    pub info_dim: usize,
    /// Channels of the static radar map
    pub map_channels: usize,
}

impl Default for FrameGeometry {
    fn default() -> Self {
        Self {
            in_steps: 10,
            target_steps: 18,
            input_channels: 1,
            height: 72,
            width: 72,
            info_dim: 6,
            map_channels: 1,
        }
    }
}

impl FrameGeometry {
    /// Small geometry for tests and smoke runs
    pub fn tiny() -> Self {
        Self {
            in_steps: 3,
            target_steps: 2,
            input_channels: 1,
            height: 8,
            width: 8,
            info_dim: 4,
            map_channels: 1,
        }
    }

    pub fn frame_len(&self) -> usize {
        self.height * self.width
    }

    pub fn input_len(&self) -> usize {
        self.in_steps * self.input_channels * self.frame_len()
    }

    pub fn target_len(&self) -> usize {
        self.target_steps * self.frame_len()
    }

    pub fn info_len(&self) -> usize {
        self.in_steps * self.info_dim
    }

    pub fn map_len(&self) -> usize {
        self.map_channels * self.frame_len()
    }

    /// Reject zero-sized dimensions
    pub fn validate(&self) -> Result<()> {
        let dims = [
            ("in_steps", self.in_steps),
            ("target_steps", self.target_steps),
            ("input_channels", self.input_channels),
            ("height", self.height),
            ("width", self.width),
            ("info_dim", self.info_dim),
            ("map_channels", self.map_channels),
        ];
        for (name, value) in dims {
            if value == 0 {
                return Err(HarnessError::InvalidConfig(format!(
                    "geometry.{} must be positive",
                    name
                )));
            }
        }
        Ok(())
    }
}

/// One training/evaluation sample, frames stored row-major and flattened
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameSample {
    /// `[in_steps, input_channels, height, width]`
    pub inputs: Vec<f32>,
    /// `[target_steps, height, width]`
    pub targets: Vec<f32>,
    /// `[in_steps, info_dim]`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ty_infos: Option<Vec<f32>>,
    /// `[map_channels, height, width]`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub radar_map: Option<Vec<f32>>,
}

impl FrameSample {
    /// Check every buffer against the geometry
    pub fn validate(&self, index: usize, geometry: &FrameGeometry) -> Result<()> {
        check_len(index, "inputs", self.inputs.len(), geometry.input_len())?;
        check_len(index, "targets", self.targets.len(), geometry.target_len())?;
        if let Some(infos) = &self.ty_infos {
            check_len(index, "ty_infos", infos.len(), geometry.info_len())?;
        }
        if let Some(map) = &self.radar_map {
            check_len(index, "radar_map", map.len(), geometry.map_len())?;
        }
        if self.ty_infos.is_some() != self.radar_map.is_some() {
            return Err(HarnessError::InvalidSample {
                index,
                reason: "ty_infos and radar_map must be given together".to_string(),
            });
        }
        Ok(())
    }

    pub fn has_auxiliaries(&self) -> bool {
        self.ty_infos.is_some() && self.radar_map.is_some()
    }
}

fn check_len(index: usize, field: &str, got: usize, expected: usize) -> Result<()> {
    if got != expected {
        return Err(HarnessError::InvalidSample {
            index,
            reason: format!("{} has {} values, expected {}", field, got, expected),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(geometry: &FrameGeometry) -> FrameSample {
        FrameSample {
            inputs: vec![0.0; geometry.input_len()],
            targets: vec![0.0; geometry.target_len()],
            ty_infos: Some(vec![0.0; geometry.info_len()]),
            radar_map: Some(vec![0.0; geometry.map_len()]),
        }
    }

    #[test]
    fn test_geometry_lengths() {
        let g = FrameGeometry::tiny();
        assert_eq!(g.frame_len(), 64);
        assert_eq!(g.input_len(), 3 * 64);
        assert_eq!(g.target_len(), 2 * 64);
        assert_eq!(g.info_len(), 12);
        assert!(g.validate().is_ok());

        let bad = FrameGeometry { height: 0, ..g };
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_sample_validation() {
        let g = FrameGeometry::tiny();
        let ok = sample(&g);
        assert!(ok.validate(0, &g).is_ok());
        assert!(ok.has_auxiliaries());

        let mut short = ok.clone();
        short.targets.pop();
        match short.validate(7, &g) {
            Err(HarnessError::InvalidSample { index, reason }) => {
                assert_eq!(index, 7);
                assert!(reason.contains("targets"));
            }
            other => panic!("Expected InvalidSample, got {other:?}"),
        }

        let mut half = ok;
        half.radar_map = None;
        assert!(half.validate(0, &g).is_err());
    }

    #[test]
    fn test_sample_json_omits_missing_auxiliaries() {
        let g = FrameGeometry::tiny();
        let mut s = sample(&g);
        s.ty_infos = None;
        s.radar_map = None;

        let json = serde_json::to_string(&s).unwrap();
        assert!(!json.contains("ty_infos"));

        let back: FrameSample = serde_json::from_str(&json).unwrap();
        assert!(!back.has_auxiliaries());
    }
}
