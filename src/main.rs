use anyhow::{bail, Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use nowcast::cli::{parse_args, setup_logging, Commands, DataArgs, EvaluateArgs, SynthArgs, TrainArgs};
use nowcast::data::loader::write_samples;
use nowcast::data::synthetic::{generate, StormConfig};
use nowcast::data::{FrameDataset, FrameGeometry, FrameSample};
use nowcast::training::launch::{self, RunData};
use tracing::{error, info};

/// Samples generated per progress tick
const SYNTH_CHUNK: usize = 64;

fn main() {
    let cli = parse_args();

    setup_logging(cli.verbose);

    info!("{}", nowcast::info());

    let result = match cli.command {
        Commands::Train(args) => run_train(args),
        Commands::Evaluate(args) => run_evaluate(args),
        Commands::Synth(args) => run_synth(args),
    };

    if let Err(e) = result {
        error!("Error: {:#}", e);
        std::process::exit(1);
    }
}

/// Test split size for a synthetic run of `train` samples
fn synthetic_test_len(train: usize) -> usize {
    (train / 5).max(1)
}

fn load_split(path: &Option<std::path::PathBuf>, flag: &str, geometry: FrameGeometry) -> Result<FrameDataset> {
    let Some(path) = path else {
        bail!("{} is required unless --synthetic is given", flag);
    };
    info!("Loading {:?}", path);
    let dataset = FrameDataset::load(path, geometry)
        .with_context(|| format!("Failed to load data from {:?}", path))?;
    info!("Loaded {} samples", dataset.samples().len());
    Ok(dataset)
}

fn synthetic_split(geometry: FrameGeometry, count: usize, seed: u64) -> Result<FrameDataset> {
    let samples = generate(&geometry, &StormConfig::default(), count, seed);
    Ok(FrameDataset::from_samples(samples, geometry)?)
}

fn load_data(args: &DataArgs, geometry: FrameGeometry, seed: u64) -> Result<RunData> {
    match args.synthetic {
        Some(count) => {
            info!("Generating {} synthetic training samples", count);
            Ok(RunData {
                train: synthetic_split(geometry, count, seed)?,
                test: synthetic_split(geometry, synthetic_test_len(count), seed.wrapping_add(1))?,
            })
        }
        None => Ok(RunData {
            train: load_split(&args.data, "--data", geometry)?,
            test: load_split(&args.test_data, "--test-data", geometry)?,
        }),
    }
}

fn run_train(args: TrainArgs) -> Result<()> {
    let config = args.run_config().context("Failed to resolve the run configuration")?;
    info!("Starting training...");
    info!("Results: {:?}", config.paths.result_dir);
    info!("Checkpoints: {:?}", config.paths.params_dir);

    let data = load_data(&args.data, config.geometry, config.seed)?;
    let summary = launch::run(&config, data, args.resume_from).context("Training failed")?;

    info!("=== Training Results ===");
    info!("Epochs: {}", summary.epochs);
    if let Some(loss) = summary.final_train_loss {
        info!("Final train loss: {:.4}", loss);
    }
    if let Some(loss) = summary.final_val_loss {
        info!("Final test loss: {:.4}", loss);
    }
    info!("Training time: {}", nowcast::utils::format_duration(summary.duration_secs));
    if let Some(checkpoint) = summary.checkpoints.last() {
        info!("Last checkpoint: {:?}", checkpoint);
    }

    if let Some(path) = args.summary {
        let json = serde_json::to_string_pretty(&summary)?;
        std::fs::write(&path, json).with_context(|| format!("Failed to write {:?}", path))?;
        info!("Summary saved to: {:?}", path);
    }

    Ok(())
}

fn run_evaluate(args: EvaluateArgs) -> Result<()> {
    let config = args.run.run_config().context("Failed to resolve the run configuration")?;
    info!("Starting evaluation of checkpoint {}", args.epoch);

    let test = match args.data.synthetic {
        Some(count) => synthetic_split(config.geometry, count, config.seed.wrapping_add(1))?,
        None => load_split(&args.data.test_data, "--test-data", config.geometry)?,
    };
    let report = launch::evaluate_checkpoint(&config, test, args.epoch).context("Evaluation failed")?;

    info!("=== Evaluation Results ===");
    info!("Epoch: {}", report.epoch);
    info!("Test loss: {:.4}", report.test_loss);

    if let Some(path) = args.report {
        let json = serde_json::to_string_pretty(&report)?;
        std::fs::write(&path, json).with_context(|| format!("Failed to write {:?}", path))?;
        info!("Evaluation report saved to: {:?}", path);
    }

    Ok(())
}

fn run_synth(args: SynthArgs) -> Result<()> {
    let geometry = args.geometry()?;
    geometry.validate()?;
    let storms = StormConfig {
        noise: args.noise,
        ..StormConfig::default()
    };

    let pb = ProgressBar::new(args.count as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=>-"),
    );

    let mut samples: Vec<FrameSample> = Vec::with_capacity(args.count);
    for (chunk, start) in (0..args.count).step_by(SYNTH_CHUNK).enumerate() {
        let n = SYNTH_CHUNK.min(args.count - start);
        samples.extend(generate(&geometry, &storms, n, args.seed.wrapping_add(chunk as u64)));
        pb.inc(n as u64);
    }
    pb.finish_with_message("generated");

    write_samples(&args.output, &samples)
        .with_context(|| format!("Failed to write {:?}", args.output))?;
    info!("Wrote {} samples to {:?}", samples.len(), args.output);

    Ok(())
}
