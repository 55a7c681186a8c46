use burn::module::AutodiffModule;
use burn::optim::Optimizer;
use burn::prelude::*;
use burn::record::{DoublePrecisionSettings, FileRecorder, NamedMpkFileRecorder, Recorder};
use burn::tensor::backend::AutodiffBackend;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::error::{HarnessError, Result};
use crate::model::ModelKind;
use crate::training::optimizer::{OptimizerKind, ParamOptimizer};
use crate::utils::remove_file;

/// Records floats as f64, so both f32 and f64 runs restore bit-exact
pub type CheckpointRecorder = NamedMpkFileRecorder<DoublePrecisionSettings>;

/// Checkpoint metadata, stored next to the model and optimizer records
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointMetadata {
    /// 1-based epoch the checkpoint closes
    pub epoch: usize,
    /// Loss of the last training batch
    pub last_loss: Option<f64>,
    /// Learning rate in effect during `epoch`
    pub learning_rate: f64,
    pub model: ModelKind,
    pub optimizer: OptimizerKind,
}

/// Files making up the checkpoint of one epoch
#[derive(Debug, Clone, PartialEq)]
pub struct CheckpointFiles {
    pub model: PathBuf,
    pub optimizer: PathBuf,
    pub metadata: PathBuf,
}

impl CheckpointFiles {
    fn all(&self) -> [&Path; 3] {
        [&self.model, &self.optimizer, &self.metadata]
    }
}

/// Checkpoint manager for saving and loading `params_<epoch>` checkpoints
pub struct CheckpointManager {
    /// Directory to save checkpoints
    params_dir: PathBuf,
}

impl CheckpointManager {
    /// Create new checkpoint manager
    pub fn new<P: AsRef<Path>>(params_dir: P) -> Result<Self> {
        let params_dir = params_dir.as_ref().to_path_buf();
        fs::create_dir_all(&params_dir).map_err(|e| HarnessError::io(&params_dir, e))?;
        Ok(Self { params_dir })
    }

    pub fn params_dir(&self) -> &Path {
        &self.params_dir
    }

    /// Paths of the checkpoint for `epoch` under backend `B`'s record format
    pub fn files<B: Backend>(&self, epoch: usize) -> CheckpointFiles {
        let ext = <CheckpointRecorder as FileRecorder<B>>::file_extension();
        let stem = format!("params_{}", epoch);
        CheckpointFiles {
            model: self.params_dir.join(format!("{}_model.{}", stem, ext)),
            optimizer: self.params_dir.join(format!("{}_optim.{}", stem, ext)),
            metadata: self.params_dir.join(format!("{}.json", stem)),
        }
    }

    /// Replace the checkpoint of `epoch`; returns the metadata path
    pub fn save<B, M, O>(
        &self,
        epoch: usize,
        model: &M,
        optimizer: &ParamOptimizer<B, M, O>,
        model_kind: ModelKind,
        last_loss: Option<f64>,
    ) -> Result<PathBuf>
    where
        B: AutodiffBackend,
        M: AutodiffModule<B>,
        O: Optimizer<M, B>,
    {
        let files = self.files::<B>(epoch);
        for path in files.all() {
            remove_file(path).map_err(|e| HarnessError::io(path, e))?;
        }

        let recorder = CheckpointRecorder::new();
        model
            .clone()
            .save_file(files.model.clone(), &recorder)
            .map_err(|e| HarnessError::record(&files.model, e))?;
        Recorder::<B>::record(&recorder, optimizer.to_record(), files.optimizer.clone())
            .map_err(|e| HarnessError::record(&files.optimizer, e))?;

        let metadata = CheckpointMetadata {
            epoch,
            last_loss,
            learning_rate: optimizer.learning_rate(),
            model: model_kind,
            optimizer: optimizer.kind(),
        };
        let json = serde_json::to_string_pretty(&metadata)
            .map_err(|e| HarnessError::record(&files.metadata, e))?;
        fs::write(&files.metadata, json).map_err(|e| HarnessError::io(&files.metadata, e))?;

        info!("Saved checkpoint: {:?}", files.metadata);
        Ok(files.metadata)
    }

    /// Read the metadata of the checkpoint for `epoch`
    pub fn load_metadata(&self, epoch: usize) -> Result<CheckpointMetadata> {
        let path = self.params_dir.join(format!("params_{}.json", epoch));
        let json = fs::read_to_string(&path).map_err(|e| HarnessError::io(&path, e))?;
        serde_json::from_str(&json).map_err(|e| HarnessError::record(&path, e))
    }

    /// Restore model weights, optimizer state and learning rate of `epoch`
    pub fn load<B, M, O>(
        &self,
        epoch: usize,
        model: M,
        optimizer: ParamOptimizer<B, M, O>,
        device: &B::Device,
    ) -> Result<(M, ParamOptimizer<B, M, O>, CheckpointMetadata)>
    where
        B: AutodiffBackend,
        M: AutodiffModule<B>,
        O: Optimizer<M, B>,
    {
        let files = self.files::<B>(epoch);
        let metadata = self.load_metadata(epoch)?;
        info!("Loading checkpoint from epoch {}", metadata.epoch);

        let recorder = CheckpointRecorder::new();
        let model = model
            .load_file(files.model.clone(), &recorder, device)
            .map_err(|e| HarnessError::record(&files.model, e))?;
        let record = Recorder::<B>::load(&recorder, files.optimizer.clone(), device)
            .map_err(|e| HarnessError::record(&files.optimizer, e))?;

        let mut optimizer = optimizer.load_record(record);
        optimizer.set_learning_rate(metadata.learning_rate);

        Ok((model, optimizer, metadata))
    }

    /// Restore only the model weights of `epoch`
    pub fn load_model<B: Backend, M: Module<B>>(&self, epoch: usize, model: M, device: &B::Device) -> Result<M> {
        let files = self.files::<B>(epoch);
        model
            .load_file(files.model.clone(), &CheckpointRecorder::new(), device)
            .map_err(|e| HarnessError::record(&files.model, e))
    }

    /// Epochs with a checkpoint on disk, ascending
    pub fn list(&self) -> Result<Vec<usize>> {
        let mut epochs = Vec::new();
        let entries = fs::read_dir(&self.params_dir).map_err(|e| HarnessError::io(&self.params_dir, e))?;

        for entry in entries {
            let path = entry.map_err(|e| HarnessError::io(&self.params_dir, e))?.path();
            if path.extension().map(|e| e == "json").unwrap_or(false) {
                let epoch = path
                    .file_stem()
                    .and_then(|s| s.to_str())
                    .and_then(|s| s.strip_prefix("params_"))
                    .and_then(|s| s.parse::<usize>().ok());
                if let Some(epoch) = epoch {
                    epochs.push(epoch);
                }
            }
        }

        epochs.sort_unstable();
        debug!("Found checkpoints for epochs {:?}", epochs);
        Ok(epochs)
    }

    /// Most recent checkpointed epoch
    pub fn latest(&self) -> Result<Option<usize>> {
        Ok(self.list()?.last().copied())
    }
}
