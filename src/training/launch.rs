//! Resolve a [`RunConfig`] into a concrete backend, model and optimizer and
//! drive the loop with them.

use std::fmt;
use std::str::FromStr;

use anyhow::{bail, Context, Result};
use burn::backend::Autodiff;
use burn::module::AutodiffModule;
use burn::optim::Optimizer;
use burn::tensor::backend::AutodiffBackend;
use burn_ndarray::NdArray;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::data::{build_loaders, FrameDataset, FrameLoader};
use crate::error::HarnessError;
use crate::model::checkpoint::CheckpointManager;
use crate::model::{Forecaster, ModelJob, ModelKind};
use crate::training::optimizer::{OptimizerJob, ParamOptimizer};
use crate::training::trainer::{continue_train, evaluate, train};
use crate::training::{Precision, RunConfig, RunSummary};

/// Checkpoint to pick a run up from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resume {
    /// Highest epoch found in the params directory
    Latest,
    Epoch(usize),
}

impl Resume {
    /// Concrete epoch, looking it up on disk for [`Resume::Latest`]
    pub fn resolve(&self, manager: &CheckpointManager) -> Result<usize> {
        match self {
            Resume::Epoch(epoch) => Ok(*epoch),
            Resume::Latest => manager
                .latest()?
                .with_context(|| format!("No checkpoint found in {:?}", manager.params_dir())),
        }
    }
}

impl FromStr for Resume {
    type Err = HarnessError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("latest") {
            return Ok(Resume::Latest);
        }
        s.parse::<usize>()
            .map(Resume::Epoch)
            .map_err(|_| HarnessError::InvalidConfig(format!("cannot resume from `{}`", s)))
    }
}

impl fmt::Display for Resume {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Resume::Latest => write!(f, "latest"),
            Resume::Epoch(epoch) => write!(f, "{}", epoch),
        }
    }
}

/// Train and test splits of a run
pub struct RunData {
    pub train: FrameDataset,
    pub test: FrameDataset,
}

/// Test loss of one stored checkpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationReport {
    pub model: ModelKind,
    pub epoch: usize,
    pub test_loss: f64,
    pub batches: usize,
}

/// Train from scratch, or from a checkpoint when `resume` is given
pub fn run(config: &RunConfig, data: RunData, resume: Option<Resume>) -> Result<RunSummary> {
    config.validate().context("Invalid run configuration")?;
    match config.precision {
        Precision::F32 => run_on::<Autodiff<NdArray<f32>>>(config, data, resume),
        Precision::F64 => run_on::<Autodiff<NdArray<f64>>>(config, data, resume),
    }
}

/// Score the checkpoint of `epoch` (or the latest one) on `test`
pub fn evaluate_checkpoint(config: &RunConfig, test: FrameDataset, epoch: Resume) -> Result<EvaluationReport> {
    config.validate().context("Invalid run configuration")?;
    match config.precision {
        Precision::F32 => evaluate_on::<Autodiff<NdArray<f32>>>(config, test, epoch),
        Precision::F64 => evaluate_on::<Autodiff<NdArray<f64>>>(config, test, epoch),
    }
}

fn check_geometry(config: &RunConfig, dataset: &FrameDataset, split: &str) -> Result<()> {
    if dataset.geometry() != config.geometry {
        bail!(
            "{} data geometry {:?} does not match the configured {:?}",
            split,
            dataset.geometry(),
            config.geometry
        );
    }
    Ok(())
}

fn run_on<B: AutodiffBackend>(config: &RunConfig, data: RunData, resume: Option<Resume>) -> Result<RunSummary> {
    check_geometry(config, &data.train, "Train")?;
    check_geometry(config, &data.test, "Test")?;

    let device = B::Device::default();
    let (trainloader, testloader) = build_loaders::<B>(
        data.train,
        data.test,
        config.batch_size,
        config.num_workers,
        config.seed,
        &device,
    );

    let stage = ModelStage {
        config,
        trainloader: &trainloader,
        testloader: &testloader,
        resume,
        device: &device,
    };
    config.model.build::<B, _>(&config.geometry, &device, stage)?
}

fn evaluate_on<B: AutodiffBackend>(config: &RunConfig, test: FrameDataset, epoch: Resume) -> Result<EvaluationReport> {
    check_geometry(config, &test, "Test")?;

    let manager = CheckpointManager::new(&config.paths.params_dir)?;
    let epoch = epoch.resolve(&manager)?;
    let metadata = manager.load_metadata(epoch)?;
    if metadata.model != config.model {
        bail!(
            "Checkpoint {} holds a {} model, not {}",
            epoch,
            metadata.model,
            config.model
        );
    }

    let device = B::Device::default();
    let testloader = FrameLoader::<B::InnerBackend>::new(test, config.batch_size, None, 1, device.clone());
    let stage = EvaluateStage {
        config,
        manager: &manager,
        epoch,
        testloader: &testloader,
        device: &device,
    };
    config.model.build::<B, _>(&config.geometry, &device, stage)?
}

/// Runs once the model is built: builds the optimizer next
struct ModelStage<'a, B: AutodiffBackend> {
    config: &'a RunConfig,
    trainloader: &'a FrameLoader<B>,
    testloader: &'a FrameLoader<B::InnerBackend>,
    resume: Option<Resume>,
    device: &'a B::Device,
}

impl<B: AutodiffBackend> ModelJob<B> for ModelStage<'_, B> {
    type Output = Result<RunSummary>;

    fn run<M>(self, model: M) -> Self::Output
    where
        M: AutodiffModule<B> + Forecaster<B> + 'static,
        M::InnerModule: Forecaster<B::InnerBackend>,
    {
        let stage = OptimizerStage {
            config: self.config,
            trainloader: self.trainloader,
            testloader: self.testloader,
            resume: self.resume,
            device: self.device,
            model,
        };
        self.config.optimizer.build::<B, M, _>(self.device, stage)
    }
}

/// Runs once both the model and the optimizer exist
struct OptimizerStage<'a, B: AutodiffBackend, M> {
    config: &'a RunConfig,
    trainloader: &'a FrameLoader<B>,
    testloader: &'a FrameLoader<B::InnerBackend>,
    resume: Option<Resume>,
    device: &'a B::Device,
    model: M,
}

impl<B, M> OptimizerJob<B, M> for OptimizerStage<'_, B, M>
where
    B: AutodiffBackend,
    M: AutodiffModule<B> + Forecaster<B>,
    M::InnerModule: Forecaster<B::InnerBackend>,
{
    type Output = Result<RunSummary>;

    fn run<O: Optimizer<M, B>>(self, optimizer: ParamOptimizer<B, M, O>) -> Self::Output {
        let config = self.config;
        let outcome = match self.resume {
            None => train(self.model, optimizer, self.trainloader, self.testloader, config)?,
            Some(resume) => {
                let manager = CheckpointManager::new(&config.paths.params_dir)?;
                let epoch = resume.resolve(&manager)?;
                let (model, optimizer, metadata) = manager
                    .load(epoch, self.model, optimizer, self.device)
                    .with_context(|| format!("Failed to restore checkpoint {}", epoch))?;

                if metadata.model != config.model || metadata.optimizer != config.optimizer.kind {
                    bail!(
                        "Checkpoint {} was written by {}/{}, the run is configured for {}/{}",
                        epoch,
                        metadata.model,
                        metadata.optimizer,
                        config.model,
                        config.optimizer.kind
                    );
                }
                info!(
                    "Restored epoch {} (lr {:.1e}, last loss {:?})",
                    metadata.epoch, metadata.learning_rate, metadata.last_loss
                );
                continue_train(
                    model,
                    optimizer,
                    self.trainloader,
                    self.testloader,
                    metadata.epoch,
                    config,
                )?
            }
        };
        Ok(outcome.summary(config))
    }
}

/// Loads stored weights into the freshly built model and scores them
struct EvaluateStage<'a, B: AutodiffBackend> {
    config: &'a RunConfig,
    manager: &'a CheckpointManager,
    epoch: usize,
    testloader: &'a FrameLoader<B::InnerBackend>,
    device: &'a B::Device,
}

impl<B: AutodiffBackend> ModelJob<B> for EvaluateStage<'_, B> {
    type Output = Result<EvaluationReport>;

    fn run<M>(self, model: M) -> Self::Output
    where
        M: AutodiffModule<B> + Forecaster<B> + 'static,
        M::InnerModule: Forecaster<B::InnerBackend>,
    {
        let model = self.manager.load_model::<B, M>(self.epoch, model, self.device)?;
        let test_loss = evaluate(&model.valid(), self.testloader, self.config)?;
        info!(
            "{}|  Checkpoint {}, Test Loss: {:8.3}",
            self.config.model.tag(),
            self.epoch,
            test_loss
        );

        Ok(EvaluationReport {
            model: self.config.model,
            epoch: self.epoch,
            test_loss,
            batches: self.testloader.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::synthetic::{generate, StormConfig};
    use crate::data::FrameGeometry;
    use crate::training::recorder::RESULT_FILE;
    use crate::training::{OptimizerKind, OptimizerSettings, RunPaths};
    use approx::assert_relative_eq;
    use tempfile::TempDir;

    fn data(train: usize, test: usize) -> RunData {
        let g = FrameGeometry::tiny();
        let storms = StormConfig::default();
        RunData {
            train: FrameDataset::from_samples(generate(&g, &storms, train, 1), g).unwrap(),
            test: FrameDataset::from_samples(generate(&g, &storms, test, 2), g).unwrap(),
        }
    }

    fn config(dir: &TempDir, model: ModelKind, max_epochs: usize) -> RunConfig {
        RunConfig {
            model,
            max_epochs,
            paths: RunPaths::under(dir.path()),
            ..RunConfig::quick_test()
        }
    }

    #[test]
    fn test_resume_parsing() {
        assert_eq!("latest".parse::<Resume>().unwrap(), Resume::Latest);
        assert_eq!("LATEST".parse::<Resume>().unwrap(), Resume::Latest);
        assert_eq!("12".parse::<Resume>().unwrap(), Resume::Epoch(12));
        assert!("twelve".parse::<Resume>().is_err());
        assert_eq!(Resume::Epoch(3).to_string(), "3");
    }

    #[test]
    fn test_run_every_model_kind() {
        for kind in ModelKind::ALL {
            let dir = TempDir::new().unwrap();
            let config = config(&dir, kind, 2);

            let summary = run(&config, data(4, 2), None).unwrap();

            assert_eq!(summary.model, kind);
            assert_eq!(summary.epochs, 2);
            assert!(summary.final_val_loss.is_some_and(f64::is_finite));
            assert_eq!(summary.checkpoints.len(), 1);
            assert!(summary.total_params > 0);
        }
    }

    #[test]
    fn test_run_in_double_precision() {
        let dir = TempDir::new().unwrap();
        let config = RunConfig {
            precision: Precision::F64,
            optimizer: OptimizerSettings {
                kind: OptimizerKind::RmsProp,
                learning_rate: 1e-3,
                weight_decay: 0.0,
            },
            ..config(&dir, ModelKind::ConvGru, 1)
        };

        let summary = run(&config, data(2, 2), None).unwrap();
        assert_eq!(summary.optimizer, OptimizerKind::RmsProp);
        assert_eq!(summary.epochs, 1);
    }

    #[test]
    fn test_resume_from_latest_checkpoint() {
        let dir = TempDir::new().unwrap();
        run(&config(&dir, ModelKind::ConvGru, 2), data(4, 2), None).unwrap();

        let extended = config(&dir, ModelKind::ConvGru, 3);
        let summary = run(&extended, data(4, 2), Some(Resume::Latest)).unwrap();
        assert_eq!(summary.epochs, 3);

        let table = std::fs::read_to_string(extended.paths.result_dir.join(RESULT_FILE)).unwrap();
        assert_eq!(table.lines().count(), 4);

        let manager = CheckpointManager::new(&extended.paths.params_dir).unwrap();
        assert_eq!(manager.list().unwrap(), vec![2, 3]);
    }

    #[test]
    fn test_resume_rejects_other_model() {
        let dir = TempDir::new().unwrap();
        run(&config(&dir, ModelKind::ConvGru, 1), data(2, 2), None).unwrap();

        let other = config(&dir, ModelKind::TyCatcher, 2);
        assert!(run(&other, data(2, 2), Some(Resume::Epoch(1))).is_err());
    }

    #[test]
    fn test_evaluate_checkpoint() {
        let dir = TempDir::new().unwrap();
        let config = config(&dir, ModelKind::TyCatcher, 1);
        let summary = run(&config, data(2, 3), None).unwrap();

        let RunData { test, .. } = data(2, 3);
        let report = evaluate_checkpoint(&config, test, Resume::Latest).unwrap();

        assert_eq!(report.epoch, 1);
        assert_eq!(report.batches, 2);
        assert!(report.test_loss.is_finite());
        assert_relative_eq!(report.test_loss, summary.final_val_loss.unwrap(), max_relative = 1e-6);
    }

    #[test]
    fn test_geometry_mismatch_is_rejected() {
        let dir = TempDir::new().unwrap();
        let config = RunConfig {
            geometry: FrameGeometry {
                height: 16,
                width: 16,
                ..FrameGeometry::tiny()
            },
            ..config(&dir, ModelKind::ConvGru, 1)
        };
        assert!(run(&config, data(2, 2), None).is_err());
    }
}
