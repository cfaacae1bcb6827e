use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::Instant,
};

use anyhow::{bail, Context, Result};
use burn::{
    config::Config,
    data::dataloader::{DataLoader, DataLoaderBuilder},
    module::AutodiffModule,
    optim::{decay::WeightDecayConfig, AdamConfig, GradientsParams, Optimizer},
    prelude::*,
    tensor::{backend::AutodiffBackend, ElementConversion},
};
use recurrent_unet_loss::{build_loss, LossConfig, SegmentationLoss};
use recurrent_unet_metric::{predict_classes, AverageMeter, RunningScore, Scores};
use recurrent_unet_model::{build_model, training::SegmentationBatch, ModelConfig, RecurrentUNet};
use recurrent_unet_train::{DataConfig, SegmentationBatcher, SegmentationDataset};
use serde_json::Value;

use crate::{
    backend::{backend_name, create_device, TrainBackend},
    checkpoint::{CheckpointPaths, CheckpointState},
};

/// CLI arguments for the training subcommand.
#[derive(Debug)]
pub struct TrainingCliArgs {
    /// Path to the JSON experiment configuration.
    pub config_path: PathBuf,
    /// Checkpoint prefix to resume from, overriding `training.resume`.
    pub resume: Option<PathBuf>,
}

impl TrainingCliArgs {
    pub fn new(config_path: impl Into<PathBuf>, resume: Option<PathBuf>) -> Self {
        Self {
            config_path: config_path.into(),
            resume,
        }
    }
}

/// Complete experiment configuration, loaded from JSON with
/// [`TrainingConfig::load_experiment`].
#[derive(Config, Debug)]
pub struct TrainingConfig {
    #[config(default = "ModelConfig::new()")]
    pub model: ModelConfig,
    #[config(default = "TrainLoopConfig::new()")]
    pub training: TrainLoopConfig,
    pub data: DataConfig,
    #[config(default = 1337)]
    pub seed: u64,
    /// Directory receiving checkpoints and the resolved configuration.
    #[config(default = "\"runs\".to_string()")]
    pub artifact_dir: String,
}

/// Iteration schedule, loss and optimizer settings.
#[derive(Config, Debug)]
pub struct TrainLoopConfig {
    /// Total number of optimizer steps.
    #[config(default = 10000)]
    pub train_iters: usize,
    #[config(default = 2)]
    pub batch_size: usize,
    #[config(default = 1)]
    pub n_workers: usize,
    /// Iterations between two progress log lines.
    #[config(default = 50)]
    pub print_interval: usize,
    /// Iterations between two validation passes.
    #[config(default = 500)]
    pub val_interval: usize,
    /// Checkpoint prefix to resume from.
    pub resume: Option<String>,
    #[config(default = "LossConfig::new()")]
    pub loss: LossConfig,
    #[config(default = "OptimizerConfig::new()")]
    pub optimizer: OptimizerConfig,
    /// Constant learning rate when absent.
    pub lr_schedule: Option<LrScheduleConfig>,
}

/// Adam settings.
#[derive(Config, Debug)]
pub struct OptimizerConfig {
    #[config(default = 1e-4)]
    pub lr: f64,
    /// L2 penalty, disabled at zero.
    #[config(default = 0.0)]
    pub weight_decay: f64,
}

impl OptimizerConfig {
    pub fn adam(&self) -> AdamConfig {
        let weight_decay = (self.weight_decay > 0.0)
            .then(|| WeightDecayConfig::new(self.weight_decay as f32));
        AdamConfig::new().with_weight_decay(weight_decay)
    }
}

/// Polynomial decay with an optional linear warm-up.
#[derive(Config, Debug)]
pub struct LrScheduleConfig {
    #[config(default = 0)]
    pub warmup_iters: usize,
    #[config(default = 0.9)]
    pub poly_power: f64,
}

impl TrainingConfig {
    /// Parses an experiment document. Omitted fields take their defaults,
    /// except `data.path` and `data.n_classes` which are required.
    ///
    /// # Errors
    ///
    /// Returns an error for malformed JSON, missing required fields or
    /// values of the wrong type.
    pub fn from_json(json: &str) -> Result<Self> {
        let overrides: Value = serde_json::from_str(json)?;

        let mut document = serde_json::to_value(Self::new(DataConfig::new(String::new(), 0)))?;
        if let Some(data) = document.get_mut("data").and_then(Value::as_object_mut) {
            data.remove("path");
            data.remove("n_classes");
        }
        // A schedule given in the file starts from the schedule defaults.
        if overrides.pointer("/training/lr_schedule").is_some_and(Value::is_object) {
            if let Some(schedule) = document.pointer_mut("/training/lr_schedule") {
                *schedule = serde_json::to_value(LrScheduleConfig::new())?;
            }
        }

        merge_json(&mut document, overrides);
        Ok(serde_json::from_value(document)?)
    }

    /// Reads and parses the experiment file at `path`.
    ///
    /// # Errors
    ///
    /// See [`TrainingConfig::from_json`].
    pub fn load_experiment(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read configuration {}", path.display()))?;
        Self::from_json(&json)
            .with_context(|| format!("failed to parse configuration {}", path.display()))
    }

    /// # Errors
    ///
    /// Returns an error for intervals or sizes that would stall the loop.
    pub fn validate(&self) -> Result<()> {
        let training = &self.training;
        if training.train_iters == 0 {
            bail!("train_iters must be at least 1");
        }
        if training.batch_size == 0 {
            bail!("batch_size must be at least 1");
        }
        if training.print_interval == 0 || training.val_interval == 0 {
            bail!(
                "print_interval and val_interval must be positive, got {} and {}",
                training.print_interval,
                training.val_interval
            );
        }
        if training.optimizer.lr.is_nan() || training.optimizer.lr <= 0.0 {
            bail!("learning rate must be positive, got {}", training.optimizer.lr);
        }
        self.data.validate()?;
        Ok(())
    }
}

/// Overlays `overrides` onto `base`, recursing into objects.
fn merge_json(base: &mut Value, overrides: Value) {
    match (base, overrides) {
        (Value::Object(base), Value::Object(overrides)) => {
            for (key, value) in overrides {
                match base.get_mut(&key) {
                    Some(slot) => merge_json(slot, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (base, overrides) => *base = overrides,
    }
}

/// Learning rate as a function of the iteration.
#[derive(Debug, Clone)]
pub struct LearningRatePolicy {
    base: f64,
    max_iters: usize,
    schedule: Option<LrScheduleConfig>,
}

impl LearningRatePolicy {
    pub fn new(config: &TrainLoopConfig) -> Self {
        Self {
            base: config.optimizer.lr,
            max_iters: config.train_iters,
            schedule: config.lr_schedule.clone(),
        }
    }

    /// Rate used for the step taken at `iteration` (zero based).
    pub fn at(&self, iteration: usize) -> f64 {
        let Some(schedule) = &self.schedule else {
            return self.base;
        };

        let warmup = if iteration < schedule.warmup_iters {
            (iteration + 1) as f64 / schedule.warmup_iters as f64
        } else {
            1.0
        };
        let progress = (iteration as f64 / self.max_iters.max(1) as f64).min(1.0);
        self.base * warmup * (1.0 - progress).powf(schedule.poly_power)
    }
}

/// Scores of one validation pass.
#[derive(Debug, Clone)]
pub struct ValidationReport {
    pub loss: f64,
    pub scores: Scores,
    pub class_iou: Vec<f64>,
}

/// Outcome of [`train`].
#[derive(Debug, Clone)]
pub struct TrainingSummary {
    /// Iterations completed, including resumed ones.
    pub iterations: usize,
    pub best_iou: f64,
    pub checkpoint: CheckpointPaths,
}

type Loader<B> = Arc<dyn DataLoader<B, SegmentationBatch<B>>>;

fn create_dataloader<B: Backend>(
    config: &TrainingConfig,
    split: &str,
    shuffle: bool,
    device: &B::Device,
) -> Result<Loader<B>> {
    let dataset = SegmentationDataset::new(&config.data, split)?;
    let builder = DataLoaderBuilder::new(SegmentationBatcher::<B>::new())
        .batch_size(config.training.batch_size)
        .num_workers(config.training.n_workers)
        .set_device(device.clone());
    let builder = if shuffle {
        builder.shuffle(config.seed)
    } else {
        builder
    };
    Ok(builder.build(dataset))
}

/// Restores model, optimizer and progress from `prefix` when a bundle exists.
fn resume_from<B, O>(
    prefix: Option<PathBuf>,
    model: RecurrentUNet<B>,
    optimizer: O,
    device: &B::Device,
) -> Result<(RecurrentUNet<B>, O, Option<CheckpointState>)>
where
    B: AutodiffBackend,
    O: Optimizer<RecurrentUNet<B>, B>,
{
    let Some(prefix) = prefix else {
        return Ok((model, optimizer, None));
    };
    let paths = CheckpointPaths::from_prefix(prefix);
    if !paths.exists() {
        tracing::info!(
            prefix = %paths.prefix().display(),
            "no checkpoint found, training from scratch"
        );
        return Ok((model, optimizer, None));
    }

    let (model, optimizer, state) = paths.load::<B, _, _>(model, optimizer, device)?;
    tracing::info!(
        prefix = %paths.prefix().display(),
        iteration = state.iteration,
        best_iou = state.best_iou,
        "resumed from checkpoint"
    );
    Ok((model, optimizer, Some(state)))
}

/// Runs the training loop.
///
/// The model is validated every `val_interval` iterations and after the last
/// one; a pass whose mean IoU is at least the best so far replaces the
/// best-model bundle.
///
/// # Errors
///
/// Returns an error if the configuration is invalid, a dataset split cannot be
/// loaded, a checkpoint cannot be read or written, or the training split
/// yields no batches.
pub fn train<B: AutodiffBackend>(
    config: &TrainingConfig,
    resume: Option<&Path>,
    device: &B::Device,
) -> Result<TrainingSummary> {
    config.validate()?;
    B::seed(config.seed);

    let n_classes = config.data.n_classes;
    let train_loader =
        create_dataloader::<B>(config, &config.data.train_split, true, device)?;
    let val_loader =
        create_dataloader::<B::InnerBackend>(config, &config.data.val_split, false, device)?;

    let model = build_model::<B>(&config.model.arch, n_classes, &config.model, device)?;
    let criterion = build_loss(&config.training.loss)?;
    let optimizer = config.training.optimizer.adam().init::<B, RecurrentUNet<B>>();

    let prefix = resume
        .map(Path::to_path_buf)
        .or_else(|| config.training.resume.as_ref().map(PathBuf::from));
    let (mut model, mut optimizer, state) = resume_from(prefix, model, optimizer, device)?;
    let (mut iteration, mut best_iou) = state
        .map(|state| (state.iteration, state.best_iou))
        .unwrap_or((0, f64::NEG_INFINITY));

    let checkpoint =
        CheckpointPaths::best_model(&config.artifact_dir, &config.model.arch, &config.data.dataset);
    let policy = LearningRatePolicy::new(&config.training);
    let total = config.training.train_iters;
    let mut loss_meter = AverageMeter::new();
    let mut time_meter = AverageMeter::new();

    tracing::info!(
        arch = %config.model.arch,
        start = iteration,
        total,
        batch_size = config.training.batch_size,
        "starting training"
    );

    'training: while iteration < total {
        let mut batches = 0usize;
        let mut items = 0usize;
        for batch in train_loader.iter() {
            batches += 1;
            items += batch.batch_size();
            let started = Instant::now();
            let learning_rate = policy.at(iteration);

            let output = model.forward(batch.images);
            let loss = criterion.forward(&output.predictions, batch.labels);
            let loss_value = loss.clone().into_scalar().elem::<f64>();
            let grads = GradientsParams::from_grads(loss.backward(), &model);
            model = optimizer.step(learning_rate, model, grads);
            iteration += 1;

            loss_meter.update(loss_value, 1);
            time_meter.update(started.elapsed().as_secs_f64(), 1);

            if iteration % config.training.print_interval == 0 {
                tracing::info!(
                    iteration,
                    total,
                    loss = loss_meter.avg,
                    learning_rate,
                    secs_per_iter = time_meter.avg,
                    "training"
                );
                loss_meter.reset();
                time_meter.reset();
            }

            if iteration % config.training.val_interval == 0 || iteration == total {
                let report = validate(&model.valid(), &criterion, val_loader.as_ref(), n_classes);
                tracing::info!(
                    iteration,
                    val_loss = report.loss,
                    scores = %report.scores,
                    class_iou = ?report.class_iou,
                    "validation"
                );

                if report.scores.mean_iou.is_nan() {
                    tracing::warn!(
                        iteration,
                        "validation scored no pixels, best model left unchanged"
                    );
                } else if improves_on(report.scores.mean_iou, best_iou) {
                    best_iou = report.scores.mean_iou;
                    let state = CheckpointState::new(iteration, best_iou, learning_rate);
                    checkpoint.save::<B, _, _>(&model, &optimizer, &state)?;
                    tracing::info!(
                        prefix = %checkpoint.prefix().display(),
                        best_iou,
                        "saved best model"
                    );
                }
            }

            if iteration >= total {
                break 'training;
            }
        }

        if batches == 0 {
            bail!(
                "training split '{}' yielded no batches",
                config.data.train_split
            );
        }
        if items < train_loader.num_items() {
            tracing::warn!(
                loaded = items,
                expected = train_loader.num_items(),
                "epoch ended early, an item failed to load"
            );
        }
    }

    if !checkpoint.exists() {
        tracing::warn!(
            prefix = %checkpoint.prefix().display(),
            "no validation pass produced a score, no best model written"
        );
    }
    tracing::info!(iterations = iteration, best_iou, "training finished");
    Ok(TrainingSummary {
        iterations: iteration,
        best_iou,
        checkpoint,
    })
}

/// Whether a validation mean IoU replaces the best one so far. Ties count as
/// improvements; `NaN` never does.
fn improves_on(mean_iou: f64, best_iou: f64) -> bool {
    mean_iou >= best_iou
}

/// Scores `model` on every batch of `loader`.
///
/// Only the final refinement step is scored; the loss uses every step.
pub fn validate<B: Backend>(
    model: &RecurrentUNet<B>,
    criterion: &SegmentationLoss,
    loader: &dyn DataLoader<B, SegmentationBatch<B>>,
    n_classes: usize,
) -> ValidationReport {
    let mut running_score = RunningScore::new(n_classes);
    let mut loss_meter = AverageMeter::new();

    for batch in loader.iter() {
        let batch_size = batch.batch_size();
        let output = model.forward(batch.images);
        let loss = criterion.forward(&output.predictions, batch.labels.clone());
        loss_meter.update(loss.into_scalar().elem::<f64>(), batch_size);

        if let Some(last) = output.into_last() {
            running_score.update_tensors(batch.labels, predict_classes(last));
        }
    }

    let (scores, class_iou, _) = running_score.get_scores();
    ValidationReport {
        loss: loss_meter.avg,
        scores,
        class_iou,
    }
}

/// Runs training from a CLI invocation on the selected backend.
///
/// # Errors
///
/// Returns an error if the configuration file is missing or malformed, or
/// training fails.
pub fn run_training(args: TrainingCliArgs) -> Result<TrainingSummary> {
    if !args.config_path.is_file() {
        bail!(
            "Configuration file not found: {}",
            args.config_path.display()
        );
    }

    let config = TrainingConfig::load_experiment(&args.config_path)?;
    tracing::info!(
        config = %args.config_path.display(),
        arch = %config.model.arch,
        loss = %config.training.loss.name,
        dataset = %config.data.dataset,
        learning_rate = config.training.optimizer.lr,
        "configuration loaded"
    );

    std::fs::create_dir_all(&config.artifact_dir)?;
    config.save(Path::new(&config.artifact_dir).join("config.json"))?;

    tracing::info!(backend = backend_name(), "starting training on backend");
    train::<TrainBackend>(&config, args.resume.as_deref(), &create_device())
}
