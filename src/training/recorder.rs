use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use burn::tensor::Element;
use serde::{Deserialize, Serialize};

use crate::error::{HarnessError, Result};
use crate::utils::format_sci;

pub const RESULT_FILE: &str = "result_df.csv";
pub const PARAMS_FILE: &str = "params_counts.csv";

/// One row of `result_df.csv`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpochRecord {
    /// 1-based epoch number
    pub epoch: usize,
    pub train_loss: Option<f64>,
    pub val_loss: Option<f64>,
    /// Learning rate in effect during the epoch
    pub lr: f64,
}

/// Per-epoch metric table, rewritten in full on every flush
#[derive(Debug, Clone)]
pub struct ResultTable {
    path: PathBuf,
    params_path: PathBuf,
    rows: Vec<EpochRecord>,
}

impl ResultTable {
    /// Empty table writing under `result_dir`
    pub fn new<P: AsRef<Path>>(result_dir: P) -> Self {
        let dir = result_dir.as_ref();
        Self {
            path: dir.join(RESULT_FILE),
            params_path: dir.join(PARAMS_FILE),
            rows: Vec::new(),
        }
    }

    /// Table seeded with the rows already on disk, if any
    pub fn load<P: AsRef<Path>>(result_dir: P) -> Result<Self> {
        let mut table = Self::new(result_dir);
        if !table.path.exists() {
            return Ok(table);
        }

        let mut reader = csv::Reader::from_path(&table.path).map_err(|e| csv_error(&table.path, e))?;
        for row in reader.deserialize() {
            let record: EpochRecord = row.map_err(|e| csv_error(&table.path, e))?;
            table.rows.push(record);
        }
        Ok(table)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn rows(&self) -> &[EpochRecord] {
        &self.rows
    }

    /// Drop rows for epochs after `last_epoch`
    pub fn truncate(&mut self, last_epoch: usize) {
        self.rows.retain(|r| r.epoch <= last_epoch);
    }

    /// Open a row for `epoch` carrying its learning rate
    pub fn begin_epoch(&mut self, epoch: usize, lr: f64) {
        self.rows.retain(|r| r.epoch != epoch);
        self.rows.push(EpochRecord {
            epoch,
            train_loss: None,
            val_loss: None,
            lr,
        });
    }

    pub fn record_train_loss(&mut self, loss: f64) {
        if let Some(row) = self.rows.last_mut() {
            row.train_loss = Some(loss);
        }
    }

    pub fn record_val_loss(&mut self, loss: f64) {
        if let Some(row) = self.rows.last_mut() {
            row.val_loss = Some(loss);
        }
    }

    /// Rewrite the whole table through a temporary file
    pub fn flush(&self) -> Result<()> {
        let tmp = self.path.with_extension("csv.tmp");
        {
            let mut writer = csv::Writer::from_path(&tmp).map_err(|e| csv_error(&tmp, e))?;
            for row in &self.rows {
                writer.serialize(row).map_err(|e| csv_error(&tmp, e))?;
            }
            writer.flush().map_err(|e| HarnessError::io(&tmp, e))?;
        }
        fs::rename(&tmp, &self.path).map_err(|e| HarnessError::io(&self.path, e))
    }

    /// Append `Total_params: <count>` to the parameter count file
    pub fn append_params_count(&self, total_params: usize) -> Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.params_path)
            .map_err(|e| HarnessError::io(&self.params_path, e))?;
        writeln!(file, "Total_params: {}", format_sci(total_params as f64, 2))
            .map_err(|e| HarnessError::io(&self.params_path, e))
    }
}

fn csv_error(path: &Path, err: csv::Error) -> HarnessError {
    HarnessError::io(path, std::io::Error::other(err.to_string()))
}

/// Running loss `sum(v / denom)`, accumulated in the backend's float type
#[derive(Debug, Clone, Copy)]
pub struct LossMeter<E: Element> {
    total: E,
    denom: f64,
}

impl<E: Element> LossMeter<E> {
    pub fn new(denom: usize) -> Self {
        Self {
            total: E::from_elem(0.0),
            denom: denom.max(1) as f64,
        }
    }

    pub fn add(&mut self, value: E) {
        let sum = self.total.elem::<f64>() + value.elem::<f64>() / self.denom;
        self.total = E::from_elem(sum);
    }

    pub fn value(&self) -> f64 {
        self.total.elem::<f64>()
    }

    pub fn reset(&mut self) {
        self.total = E::from_elem(0.0);
    }
}
