pub mod launch;
pub mod optimizer;
pub mod recorder;
pub mod run_log;
pub mod scheduler;
pub mod trainer;

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::data::FrameGeometry;
use crate::error::{HarnessError, Result};
use crate::model::loss::{LossKind, TargetRange};
use crate::model::ModelKind;
use crate::training::recorder::EpochRecord;
use crate::training::run_log::LOG_FILE;
use crate::utils::validation;

pub use optimizer::{OptimizerKind, OptimizerSettings, ParamOptimizer};
pub use trainer::{continue_train, evaluate, train};

/// Multi-step learning-rate decay
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LrSchedule {
    /// Decay on every epoch divisible by this
    pub step_every: usize,
    /// Multiplicative decay factor
    pub gamma: f64,
}

impl Default for LrSchedule {
    fn default() -> Self {
        Self {
            step_every: 7,
            gamma: 0.7,
        }
    }
}

/// Float precision of parameters and activations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Precision {
    #[default]
    F32,
    F64,
}

/// Output locations of a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunPaths {
    /// `log.txt`, `result_df.csv` and `params_counts.csv`
    pub result_dir: PathBuf,
    /// Checkpoints
    pub params_dir: PathBuf,
}

impl Default for RunPaths {
    fn default() -> Self {
        Self {
            result_dir: PathBuf::from("results"),
            params_dir: PathBuf::from("params"),
        }
    }
}

impl RunPaths {
    pub fn under<P: AsRef<Path>>(root: P) -> Self {
        let root = root.as_ref();
        Self {
            result_dir: root.join("results"),
            params_dir: root.join("params"),
        }
    }

    pub fn log_file(&self) -> PathBuf {
        self.result_dir.join(LOG_FILE)
    }

    /// Create both directories
    pub fn ensure(&self) -> Result<()> {
        for dir in [&self.result_dir, &self.params_dir] {
            std::fs::create_dir_all(dir).map_err(|e| HarnessError::io(dir, e))?;
        }
        Ok(())
    }
}

/// Everything a run needs, resolved before the first epoch
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub model: ModelKind,
    pub optimizer: OptimizerSettings,
    /// Multi-step decay, disabled when absent
    pub lr_schedule: Option<LrSchedule>,
    /// Compute device; only `cpu` is available
    pub device: String,
    pub precision: Precision,
    pub max_epochs: usize,
    pub batch_size: usize,
    /// Global gradient-norm ceiling, disabled when absent
    pub clip_max_norm: Option<f64>,
    /// Rescale forecasts (not targets) into `[0, 1]` before the loss
    pub normalize_target: Option<TargetRange>,
    pub loss: LossKind,
    pub geometry: FrameGeometry,
    pub paths: RunPaths,
    /// Background workers of the training loader
    pub num_workers: usize,
    /// Shuffle seed of the training loader
    pub seed: u64,
    /// Echo run log lines to stdout
    pub log_to_console: bool,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            model: ModelKind::ConvGru,
            optimizer: OptimizerSettings::default(),
            lr_schedule: Some(LrSchedule::default()),
            device: "cpu".to_string(),
            precision: Precision::F32,
            max_epochs: 100,
            batch_size: 4,
            clip_max_norm: Some(1.0),
            normalize_target: None,
            loss: LossKind::Mse,
            geometry: FrameGeometry::default(),
            paths: RunPaths::default(),
            num_workers: 4,
            seed: 2026,
            log_to_console: true,
        }
    }
}

impl RunConfig {
    /// Small configuration for smoke runs
    pub fn quick_test() -> Self {
        Self {
            max_epochs: 2,
            batch_size: 2,
            geometry: FrameGeometry::tiny(),
            num_workers: 1,
            log_to_console: false,
            ..Default::default()
        }
    }

    /// Load from a JSON file; absent fields take their defaults
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| HarnessError::io(path, e))?;
        Self::from_json(&text)
    }

    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| HarnessError::InvalidConfig(e.to_string()))
    }

    /// Check every field once, before the loop starts
    pub fn validate(&self) -> Result<()> {
        validation::positive(self.max_epochs, "max_epochs")?;
        validation::positive(self.batch_size, "batch_size")?;
        validation::in_range(self.optimizer.learning_rate, 0.0, f64::MAX, "learning_rate")?;
        validation::in_range(self.optimizer.weight_decay, 0.0, f64::MAX, "weight_decay")?;

        if let Some(schedule) = &self.lr_schedule {
            validation::positive(schedule.step_every, "lr_schedule.step_every")?;
            validation::in_range(schedule.gamma, f64::MIN_POSITIVE, 1.0, "lr_schedule.gamma")?;
        }
        if let Some(max_norm) = self.clip_max_norm {
            validation::positive(max_norm, "clip_max_norm")?;
        }
        if let Some(range) = &self.normalize_target {
            range.validate()?;
        }
        if !self.device.eq_ignore_ascii_case("cpu") {
            return Err(HarnessError::InvalidConfig(format!(
                "device `{}` is not available, use `cpu`",
                self.device
            )));
        }

        self.geometry.validate()?;
        self.model.check(&self.geometry)
    }
}

/// What a finished run hands back
#[derive(Debug)]
pub struct TrainingOutcome<M> {
    pub model: M,
    pub records: Vec<EpochRecord>,
    pub total_params: usize,
    pub checkpoints: Vec<PathBuf>,
    pub duration_secs: f64,
}

impl<M> TrainingOutcome<M> {
    pub fn summary(&self, config: &RunConfig) -> RunSummary {
        let last = self.records.last();
        RunSummary {
            model: config.model,
            optimizer: config.optimizer.kind,
            epochs: self.records.len(),
            final_train_loss: last.and_then(|r| r.train_loss),
            final_val_loss: last.and_then(|r| r.val_loss),
            final_lr: last.map(|r| r.lr),
            total_params: self.total_params,
            checkpoints: self.checkpoints.clone(),
            duration_secs: self.duration_secs,
        }
    }
}

/// Serializable digest of a run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub model: ModelKind,
    pub optimizer: OptimizerKind,
    pub epochs: usize,
    pub final_train_loss: Option<f64>,
    pub final_val_loss: Option<f64>,
    pub final_lr: Option<f64>,
    pub total_params: usize,
    pub checkpoints: Vec<PathBuf>,
    pub duration_secs: f64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config_is_valid() {
        assert!(RunConfig::default().validate().is_ok());
        assert!(RunConfig::quick_test().validate().is_ok());
    }

    #[test]
    fn test_partial_json_takes_defaults() {
        let config = RunConfig::from_json(
            r#"{"model": "mymodel", "optimizer": {"kind": "sgd", "learning_rate": 0.01}, "max_epochs": 3}"#,
        )
        .unwrap();

        assert_eq!(config.model, ModelKind::TyCatcher);
        assert_eq!(config.optimizer.kind, OptimizerKind::Sgd);
        assert_eq!(config.optimizer.weight_decay, 0.0);
        assert_eq!(config.max_epochs, 3);
        assert_eq!(config.batch_size, RunConfig::default().batch_size);
    }

    #[test]
    fn test_unknown_kinds_fail_to_load() {
        let err = RunConfig::from_json(r#"{"model": "NOPE"}"#).unwrap_err();
        assert!(err.to_string().contains("NOPE"));

        let err = RunConfig::from_json(r#"{"optimizer": {"kind": "NOPE", "learning_rate": 0.1}}"#)
            .unwrap_err();
        assert!(err.to_string().contains("NOPE"));
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let bad = [
            RunConfig {
                max_epochs: 0,
                ..RunConfig::quick_test()
            },
            RunConfig {
                device: "cuda:0".to_string(),
                ..RunConfig::quick_test()
            },
            RunConfig {
                clip_max_norm: Some(0.0),
                ..RunConfig::quick_test()
            },
            RunConfig {
                normalize_target: Some(TargetRange { min: 1.0, max: 1.0 }),
                ..RunConfig::quick_test()
            },
            RunConfig {
                geometry: FrameGeometry {
                    width: 6,
                    ..FrameGeometry::tiny()
                },
                ..RunConfig::quick_test()
            },
        ];
        for config in bad {
            assert!(
                matches!(config.validate(), Err(HarnessError::InvalidConfig(_))),
                "{:?} should be rejected",
                config
            );
        }
    }

    #[test]
    fn test_load_from_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("run.json");
        let config = RunConfig::quick_test();
        std::fs::write(&path, serde_json::to_string_pretty(&config).unwrap()).unwrap();

        let loaded = RunConfig::load(&path).unwrap();
        assert_eq!(loaded.geometry, config.geometry);
        assert_eq!(loaded.model, config.model);

        assert!(matches!(
            RunConfig::load(dir.path().join("missing.json")),
            Err(HarnessError::Io { .. })
        ));
    }

    #[test]
    fn test_paths() {
        let dir = TempDir::new().unwrap();
        let paths = RunPaths::under(dir.path());
        paths.ensure().unwrap();
        assert!(paths.result_dir.is_dir());
        assert!(paths.params_dir.is_dir());
        assert_eq!(paths.log_file(), paths.result_dir.join("log.txt"));
    }
}
