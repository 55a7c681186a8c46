//! # nowcast: rainfall nowcasting harness
//!
//! Trains and evaluates recurrent convolutional forecasters that map a short
//! sequence of observed radar frames to the frames that follow.
//!
//! ## Features
//!
//! - Model registry: `CONVGRU` (frames only) and `MYMODEL` (frames plus
//!   storm-track features and a radar map)
//! - Optimizer registry with gradient clipping and multi-step LR decay
//! - Per-epoch result table, run log and resumable checkpoints
//! - JSON Lines datasets, plain or gzipped, and a synthetic storm generator
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use nowcast::data::synthetic::{generate, StormConfig};
//! use nowcast::data::{FrameDataset, FrameGeometry};
//! use nowcast::training::launch::{run, RunData};
//! use nowcast::training::RunConfig;
//!
//! let config = RunConfig::quick_test();
//! let g = config.geometry;
//! let data = RunData {
//!     train: FrameDataset::from_samples(generate(&g, &StormConfig::default(), 16, 1), g).unwrap(),
//!     test: FrameDataset::from_samples(generate(&g, &StormConfig::default(), 4, 2), g).unwrap(),
//! };
//! let summary = run(&config, data, None).unwrap();
//! println!("final test loss: {:?}", summary.final_val_loss);
//! ```

pub mod cli;
pub mod data;
pub mod error;
pub mod model;
pub mod training;
pub mod utils;

use burn::backend::Autodiff;
use burn_ndarray::NdArray;

/// Default backend type
pub type DefaultBackend = NdArray<f32>;

/// Backend used for training
pub type TrainBackend = Autodiff<DefaultBackend>;

/// Re-export commonly used types
pub use data::{FrameDataset, FrameGeometry, FrameSample};
pub use error::HarnessError;
pub use model::{Forecaster, ModelKind};
pub use training::{OptimizerKind, RunConfig, RunSummary};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");

/// Get library information
pub fn info() -> String {
    format!(
        "{} v{} - rainfall nowcasting training harness",
        NAME, VERSION
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn test_info() {
        let info_str = info();
        assert!(info_str.contains("nowcast"));
        assert!(info_str.contains(VERSION));
    }
}
