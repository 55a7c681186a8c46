use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::data::FrameGeometry;
use crate::error::Result;
use crate::model::ModelKind;
use crate::training::launch::Resume;
use crate::training::{OptimizerKind, RunConfig, RunPaths};

/// Training and evaluation harness for rainfall nowcasting models
#[derive(Parser, Debug)]
#[command(name = "nowcast")]
#[command(about = "Train and evaluate recurrent convolutional rainfall nowcasting models")]
#[command(version)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Subcommand
    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Train a model, or resume a run from a checkpoint
    Train(TrainArgs),

    /// Score a stored checkpoint on test data
    Evaluate(EvaluateArgs),

    /// Write a synthetic storm dataset
    Synth(SynthArgs),
}

/// Options shared by commands that resolve a run configuration
#[derive(Args, Debug, Clone, Default)]
pub struct RunArgs {
    /// Run configuration file (JSON); absent fields take defaults
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Model architecture (CONVGRU, MYMODEL)
    #[arg(short, long)]
    pub model: Option<ModelKind>,

    /// Root directory for `results/` and `params/`
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Batch size
    #[arg(short, long)]
    pub batch_size: Option<usize>,

    /// Small geometry and short run for smoke tests
    #[arg(long)]
    pub quick: bool,
}

impl RunArgs {
    /// Configuration file (or defaults) with command-line overrides applied
    pub fn run_config(&self) -> Result<RunConfig> {
        let mut config = match &self.config {
            Some(path) => RunConfig::load(path)?,
            None if self.quick => RunConfig::quick_test(),
            None => RunConfig::default(),
        };

        if let Some(model) = self.model {
            config.model = model;
        }
        if let Some(root) = &self.output {
            config.paths = RunPaths::under(root);
        }
        if let Some(batch_size) = self.batch_size {
            config.batch_size = batch_size;
        }
        Ok(config)
    }
}

/// Where the frames come from
#[derive(Args, Debug, Clone, Default)]
pub struct DataArgs {
    /// Training samples (.jsonl or .jsonl.gz)
    #[arg(long)]
    pub data: Option<PathBuf>,

    /// Test samples (.jsonl or .jsonl.gz)
    #[arg(long)]
    pub test_data: Option<PathBuf>,

    /// Generate this many synthetic training samples instead of reading files
    #[arg(long, conflicts_with_all = ["data", "test_data"])]
    pub synthetic: Option<usize>,
}

/// Training arguments
#[derive(Parser, Debug)]
pub struct TrainArgs {
    #[command(flatten)]
    pub run: RunArgs,

    #[command(flatten)]
    pub data: DataArgs,

    /// Optimizer (SGD, Adam, AdamW, RMSprop, Adagrad, Adam16)
    #[arg(long)]
    pub optimizer: Option<OptimizerKind>,

    /// Learning rate
    #[arg(long)]
    pub learning_rate: Option<f64>,

    /// Number of training epochs
    #[arg(short, long)]
    pub epochs: Option<usize>,

    /// Random seed
    #[arg(long)]
    pub seed: Option<u64>,

    /// Resume from a checkpoint epoch, or `latest`
    #[arg(long)]
    pub resume_from: Option<Resume>,

    /// Write the run summary (JSON) here
    #[arg(long)]
    pub summary: Option<PathBuf>,
}

impl TrainArgs {
    pub fn run_config(&self) -> Result<RunConfig> {
        let mut config = self.run.run_config()?;
        if let Some(kind) = self.optimizer {
            config.optimizer.kind = kind;
        }
        if let Some(lr) = self.learning_rate {
            config.optimizer.learning_rate = lr;
        }
        if let Some(epochs) = self.epochs {
            config.max_epochs = epochs;
        }
        if let Some(seed) = self.seed {
            config.seed = seed;
        }
        Ok(config)
    }
}

/// Evaluation arguments
#[derive(Parser, Debug)]
pub struct EvaluateArgs {
    #[command(flatten)]
    pub run: RunArgs,

    #[command(flatten)]
    pub data: DataArgs,

    /// Checkpoint epoch, or `latest`
    #[arg(long, default_value = "latest")]
    pub epoch: Resume,

    /// Write the evaluation report (JSON) here
    #[arg(long)]
    pub report: Option<PathBuf>,
}

/// Synthetic dataset arguments
#[derive(Parser, Debug)]
pub struct SynthArgs {
    /// Output file (.jsonl or .jsonl.gz)
    #[arg(short, long, required = true)]
    pub output: PathBuf,

    /// Number of samples
    #[arg(short = 'n', long, default_value = "256")]
    pub count: usize,

    /// Random seed
    #[arg(long, default_value = "2026")]
    pub seed: u64,

    /// Run configuration whose geometry the samples follow
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Use the small smoke-test geometry
    #[arg(long, conflicts_with = "config")]
    pub tiny: bool,

    /// Additive noise amplitude
    #[arg(long, default_value = "0.0")]
    pub noise: f32,
}

impl SynthArgs {
    pub fn geometry(&self) -> Result<FrameGeometry> {
        if self.tiny {
            return Ok(FrameGeometry::tiny());
        }
        match &self.config {
            Some(path) => Ok(RunConfig::load(path)?.geometry),
            None => Ok(FrameGeometry::default()),
        }
    }
}

/// Parse CLI arguments
pub fn parse_args() -> Cli {
    Cli::parse()
}

/// Setup logging based on verbosity
pub fn setup_logging(verbose: bool) {
    let filter = if verbose { "debug" } else { "info" };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();
}
