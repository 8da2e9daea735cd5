use crate::{
    validate_device_choice, AutodiffTrainBackend, DatasetPathConfig, Ensemble, RunConfig,
    RunDescriptor, SegNet, SegNetConfig, SegmentationDataset, StackTrainer, StorageLayout,
    Trigger, DEFAULT_CURVE_COLUMNS,
};
use burn::optim::AdamConfig;
use burn::tensor::backend::Backend;
use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "train",
    about = "Train a stacked SegNet ensemble with periodic validation and best-checkpointing"
)]
pub struct TrainArgs {
    /// Method name; prefixes the run id of every artifact.
    #[arg(long, default_value = "segnet")]
    pub method: String,
    /// TOML file with run settings; replaces the run flags below when given.
    #[arg(long)]
    pub config: Option<PathBuf>,
    /// Unit for --terminal and --interval.
    #[arg(long, value_enum, default_value_t = Trigger::Epoch)]
    pub trigger: Trigger,
    /// Run length in trigger units.
    #[arg(long, default_value_t = 10)]
    pub terminal: usize,
    /// Validation cadence in trigger units.
    #[arg(long, default_value_t = 1)]
    pub interval: usize,
    #[arg(long, default_value_t = 4)]
    pub batch_size: usize,
    /// Run on the accelerator backend (requires the backend-wgpu feature).
    #[arg(long, default_value_t = false)]
    pub cuda: bool,
    /// Weight of the alignment loss between members.
    #[arg(long, default_value_t = 0.1)]
    pub alpha: f64,
    #[arg(long, default_value_t = 1e-3)]
    pub lr: f64,
    /// Shuffle seed for the training loader.
    #[arg(long)]
    pub seed: Option<u64>,
    /// Root for logs/ and checkpoint/.
    #[arg(long, default_value = ".")]
    pub root: PathBuf,
    /// Training split with images/ and masks/ subdirectories.
    #[arg(long, default_value = "data/train")]
    pub train_root: PathBuf,
    /// Validation split with images/ and masks/ subdirectories.
    #[arg(long, default_value = "data/val")]
    pub val_root: PathBuf,
    /// Hidden width of one ensemble member; repeat to add members.
    #[arg(long = "member", default_values_t = vec![16, 16])]
    pub members: Vec<usize>,
    /// Dropout probability inside each member.
    #[arg(long, default_value_t = 0.1)]
    pub dropout: f64,
    /// Skip rendering the learning curve.
    #[arg(long, default_value_t = false)]
    pub no_curve: bool,
}

impl TrainArgs {
    pub fn run_config(&self) -> anyhow::Result<RunConfig> {
        let cfg = match &self.config {
            Some(path) => RunConfig::from_path(path)?,
            None => RunConfig {
                trigger: self.trigger,
                terminal: self.terminal,
                interval: self.interval,
                batch_size: self.batch_size,
                cuda: self.cuda,
                alpha: self.alpha,
                lr: self.lr,
                seed: self.seed,
            },
        };
        cfg.validate()?;
        Ok(cfg)
    }
}

/// Stable member names: `segnet<index>_h<hidden>`.
pub fn member_specs(
    hidden: &[usize],
    in_channels: usize,
    dropout: f64,
) -> Vec<(String, SegNetConfig)> {
    hidden
        .iter()
        .enumerate()
        .map(|(i, &h)| {
            let cfg = SegNetConfig {
                in_channels,
                ..SegNetConfig::default()
            }
            .with_hidden(h)
            .with_dropout(dropout);
            (format!("segnet{i}_h{h}"), cfg)
        })
        .collect()
}

pub fn run_train(args: TrainArgs) -> anyhow::Result<()> {
    let config = args.run_config()?;
    validate_device_choice(config.cuda)?;
    if args.members.is_empty() {
        anyhow::bail!("at least one --member is required");
    }

    let train = DatasetPathConfig::new(&args.train_root)
        .load()
        .map_err(|e| anyhow::anyhow!("failed to load training split: {e}"))?;
    let val = DatasetPathConfig::new(&args.val_root)
        .load()
        .map_err(|e| anyhow::anyhow!("failed to load validation split: {e}"))?;
    if train.is_empty() {
        anyhow::bail!("no samples found under {}", args.train_root.display());
    }
    let in_channels = train.items()[0].channels;

    let device = <AutodiffTrainBackend as Backend>::Device::default();
    let members = member_specs(&args.members, in_channels, args.dropout)
        .into_iter()
        .map(|(name, cfg)| (name, SegNet::<AutodiffTrainBackend>::new(cfg, &device)))
        .collect();
    let optim = AdamConfig::new()
        .init::<AutodiffTrainBackend, Vec<SegNet<AutodiffTrainBackend>>>();
    let mut ensemble = Ensemble::new(members, optim, config.lr)?;

    let descriptor = RunDescriptor::new(args.method.clone(), config)?;
    let mut trainer = StackTrainer::new(descriptor, StorageLayout::new(&args.root));
    let summary = trainer.training(&mut ensemble, &train, &val, &device)?;
    log::info!(
        "finished after {} iterations; best checkpoint at epoch {} iter {}",
        summary.iters_run,
        summary.best.epoch,
        summary.best.iter
    );

    let log_path = trainer.harness().save_log()?;
    println!("Saved log to {}", log_path.display());
    if !args.no_curve {
        match trainer.harness().learning_curve(&DEFAULT_CURVE_COLUMNS) {
            Ok(path) => println!("Saved learning curve to {}", path.display()),
            Err(e) => log::warn!("learning curve not rendered: {e}"),
        }
    }
    Ok(())
}
