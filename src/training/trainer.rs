use crate::data::FrameLoader;
use crate::model::checkpoint::CheckpointManager;
use crate::model::loss::forecast_loss;
use crate::model::Forecaster;
use crate::training::optimizer::ParamOptimizer;
use crate::training::recorder::{LossMeter, ResultTable, PARAMS_FILE, RESULT_FILE};
use crate::training::run_log::RunLog;
use crate::training::scheduler::MultiStepLr;
use crate::training::{RunConfig, TrainingOutcome};
use crate::utils::{format_sci, memory, remove_file};
use anyhow::{Context, Result};
use burn::module::AutodiffModule;
use burn::optim::Optimizer;
use burn::prelude::*;
use burn::tensor::backend::AutodiffBackend;
use burn::tensor::ElementConversion;
use std::time::Instant;
use tracing::{info, warn};

/// Batches between interim loss lines; also the rolling-loss divisor
pub const LOG_EVERY: usize = 40;

/// Epochs between checkpoints; the final epoch is always checkpointed
pub const CHECKPOINT_EVERY: usize = 10;

/// Train `model` for `config.max_epochs` epochs from scratch
///
/// Stale `log.txt`, `result_df.csv` and `params_counts.csv` are removed
/// first. Every epoch appends a row to the result table, which is rewritten
/// on disk before the next epoch starts.
pub fn train<B, M, O>(
    model: M,
    optimizer: ParamOptimizer<B, M, O>,
    trainloader: &FrameLoader<B>,
    testloader: &FrameLoader<B::InnerBackend>,
    config: &RunConfig,
) -> Result<TrainingOutcome<M>>
where
    B: AutodiffBackend,
    M: AutodiffModule<B> + Forecaster<B>,
    M::InnerModule: Forecaster<B::InnerBackend>,
    O: Optimizer<M, B>,
{
    config.validate().context("Invalid run configuration")?;
    config.paths.ensure()?;

    let result_dir = &config.paths.result_dir;
    for name in [RESULT_FILE, PARAMS_FILE] {
        let path = result_dir.join(name);
        remove_file(&path).with_context(|| format!("Failed to remove {:?}", path))?;
    }
    let log_file = config.paths.log_file();
    remove_file(&log_file).with_context(|| format!("Failed to remove {:?}", log_file))?;

    let _log = RunLog::open(&log_file, config.log_to_console)?;
    let table = ResultTable::new(result_dir);
    let scheduler = config
        .lr_schedule
        .as_ref()
        .map(|s| MultiStepLr::from_schedule(s, config.max_epochs));

    run_epochs(model, optimizer, trainloader, testloader, config, table, scheduler, 0)
}

/// Resume a run whose first `start_epoch` epochs are already done
///
/// The log is appended to, result rows past `start_epoch` are dropped and
/// the scheduler resumes counting without re-applying past decays.
pub fn continue_train<B, M, O>(
    model: M,
    optimizer: ParamOptimizer<B, M, O>,
    trainloader: &FrameLoader<B>,
    testloader: &FrameLoader<B::InnerBackend>,
    start_epoch: usize,
    config: &RunConfig,
) -> Result<TrainingOutcome<M>>
where
    B: AutodiffBackend,
    M: AutodiffModule<B> + Forecaster<B>,
    M::InnerModule: Forecaster<B::InnerBackend>,
    O: Optimizer<M, B>,
{
    config.validate().context("Invalid run configuration")?;
    if start_epoch >= config.max_epochs {
        anyhow::bail!(
            "Nothing to resume: epoch {} already reaches max_epochs {}",
            start_epoch,
            config.max_epochs
        );
    }
    config.paths.ensure()?;

    let _log = RunLog::open(config.paths.log_file(), config.log_to_console)?;
    info!("Resuming from epoch {}", start_epoch);

    let mut table = ResultTable::load(&config.paths.result_dir)
        .context("Failed to reload the result table")?;
    table.truncate(start_epoch);

    let scheduler = config.lr_schedule.as_ref().map(|s| {
        let mut scheduler = MultiStepLr::from_schedule(s, config.max_epochs);
        scheduler.fast_forward(start_epoch);
        scheduler
    });

    run_epochs(
        model,
        optimizer,
        trainloader,
        testloader,
        config,
        table,
        scheduler,
        start_epoch,
    )
}

#[allow(clippy::too_many_arguments)]
fn run_epochs<B, M, O>(
    mut model: M,
    mut optimizer: ParamOptimizer<B, M, O>,
    trainloader: &FrameLoader<B>,
    testloader: &FrameLoader<B::InnerBackend>,
    config: &RunConfig,
    mut table: ResultTable,
    mut scheduler: Option<MultiStepLr>,
    start_epoch: usize,
) -> Result<TrainingOutcome<M>>
where
    B: AutodiffBackend,
    M: AutodiffModule<B> + Forecaster<B>,
    M::InnerModule: Forecaster<B::InnerBackend>,
    O: Optimizer<M, B>,
{
    let started = Instant::now();
    let manager = CheckpointManager::new(&config.paths.params_dir)?;
    let convention = model.convention();
    let tag = config.model.tag();
    let max_epochs = config.max_epochs;
    let total_batches = trainloader.len();
    if total_batches == 0 {
        warn!("Training loader is empty; epochs will only evaluate");
    }

    let mut checkpoints = Vec::new();

    for epoch in start_epoch..max_epochs {
        let epoch_no = epoch + 1;
        let epoch_start = Instant::now();

        if let Some(scheduler) = scheduler.as_mut() {
            let lr = scheduler.step(optimizer.learning_rate());
            optimizer.set_learning_rate(lr);
        }
        let lr = optimizer.learning_rate();
        table.begin_epoch(epoch_no, lr);
        info!("lr: {}", format_sci(lr, 1));

        let mut train_loss = LossMeter::<B::FloatElem>::new(total_batches);
        let mut running_loss = LossMeter::<B::FloatElem>::new(LOG_EVERY);
        let mut last_loss = None;

        for (idx, batch) in trainloader.iter().enumerate() {
            let batch = batch.to_device(trainloader.device());
            let (input, targets) = convention.assemble(batch)?;
            let outputs = model.forward(input);

            optimizer.zero_grad();
            let loss = forecast_loss(config.loss, config.normalize_target.as_ref(), outputs, targets);

            let value = loss.clone().into_scalar();
            train_loss.add(value);
            running_loss.add(value);
            last_loss = Some(value.elem::<f64>());

            optimizer.backward(loss, &model);
            if let Some(max_norm) = config.clip_max_norm {
                optimizer.clip_grad_norm(&model, max_norm);
            }
            model = optimizer.step(model);

            if (idx + 1) % LOG_EVERY == 0 {
                info!(
                    "{}|  Epoch [{}/{}], Step [{}/{}], Loss: {:.3}",
                    tag,
                    epoch_no,
                    max_epochs,
                    idx + 1,
                    total_batches,
                    running_loss.value()
                );
                running_loss.reset();
            }
        }

        table.record_train_loss(train_loss.value());
        info!(
            "{}|  Epoch [{}/{}], Train Loss: {:8.3}",
            tag,
            epoch_no,
            max_epochs,
            train_loss.value()
        );

        let test_loss = evaluate(&model.valid(), testloader, config)?;
        info!(
            "{}|  Epoch [{}/{}], Test Loss: {:8.3}",
            tag, epoch_no, max_epochs, test_loss
        );
        table.record_val_loss(test_loss);
        table.flush().context("Failed to write the result table")?;

        info!(
            "The computing time of this epoch = {:.3} sec",
            epoch_start.elapsed().as_secs_f64()
        );
        info!("Max allocated memory:{:.3}GB", memory::peak_gib());

        if epoch_no % CHECKPOINT_EVERY == 0 || epoch_no == max_epochs {
            let path = manager
                .save(epoch_no, &model, &optimizer, config.model, last_loss)
                .with_context(|| format!("Failed to checkpoint epoch {}", epoch_no))?;
            checkpoints.push(path);
        }

        if epoch_no == max_epochs {
            let total_params = model.num_params();
            info!("{}|  Total_params: {}", tag, format_sci(total_params as f64, 2));
            table.append_params_count(total_params)?;
        }
    }

    Ok(TrainingOutcome {
        total_params: model.num_params(),
        records: table.rows().to_vec(),
        checkpoints,
        duration_secs: started.elapsed().as_secs_f64(),
        model,
    })
}

/// Mean loss of `model` over `loader`, without touching its parameters
///
/// Pass the evaluation view of a trained model (`model.valid()`), which runs
/// on the inner backend and records no gradients.
pub fn evaluate<B, M>(model: &M, loader: &FrameLoader<B>, config: &RunConfig) -> Result<f64>
where
    B: Backend,
    M: Forecaster<B>,
{
    let convention = model.convention();
    let mut loss = LossMeter::<B::FloatElem>::new(loader.len());

    for batch in loader.iter() {
        let batch = batch.to_device(loader.device());
        let (input, targets) = convention.assemble(batch)?;
        let outputs = model.forward(input);
        let batch_loss = forecast_loss(config.loss, config.normalize_target.as_ref(), outputs, targets);
        loss.add(batch_loss.into_scalar());
    }

    Ok(loss.value())
}
