use burn::tensor::backend::Backend;
use clap::Parser;
use stack_training::util::member_specs;
use stack_training::{
    evaluate_members, load_checkpoint_for_eval, validate_device_choice, AutodiffTrainBackend,
    BceLoss, DatasetPathConfig, OverallAccuracy, RunConfig, RunDescriptor, SegNet,
    SegmentationDataset, StorageLayout, TrainBackend, Trigger,
};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "eval",
    about = "Score saved ensemble member checkpoints on a dataset split (BCE loss / overall accuracy)"
)]
struct Args {
    /// Method name the run was trained with.
    #[arg(long, default_value = "segnet")]
    method: String,
    #[arg(long, value_enum, default_value_t = Trigger::Epoch)]
    trigger: Trigger,
    #[arg(long, default_value_t = 10)]
    terminal: usize,
    /// Full run id; overrides method/trigger/terminal.
    #[arg(long)]
    run_id: Option<String>,
    /// Root containing checkpoint/.
    #[arg(long, default_value = ".")]
    root: PathBuf,
    /// Split with images/ and masks/ subdirectories.
    #[arg(long, default_value = "data/val")]
    dataset_root: PathBuf,
    /// Hidden widths the members were trained with, in order.
    #[arg(long = "member", default_values_t = vec![16, 16])]
    members: Vec<usize>,
    #[arg(long, default_value_t = 0.1)]
    dropout: f64,
    #[arg(long, default_value_t = 4)]
    batch_size: usize,
    #[arg(long, default_value_t = false)]
    cuda: bool,
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    validate_device_choice(args.cuda)?;
    if args.batch_size == 0 {
        anyhow::bail!("--batch-size must be positive");
    }

    let dataset = DatasetPathConfig::new(&args.dataset_root).load()?;
    if dataset.is_empty() {
        println!("No samples found under {}", args.dataset_root.display());
        return Ok(());
    }
    let in_channels = dataset.items()[0].channels;

    let run_id = match &args.run_id {
        Some(id) => id.clone(),
        None => {
            let config = RunConfig {
                trigger: args.trigger,
                terminal: args.terminal,
                batch_size: args.batch_size,
                cuda: args.cuda,
                ..RunConfig::default()
            };
            RunDescriptor::new(args.method.clone(), config)?.run_id()
        }
    };
    let layout = StorageLayout::new(&args.root);
    let device = <TrainBackend as Backend>::Device::default();

    let mut members = Vec::with_capacity(args.members.len());
    for (name, cfg) in member_specs(&args.members, in_channels, args.dropout) {
        let skeleton = SegNet::<AutodiffTrainBackend>::new(cfg, &device);
        let file = format!("{run_id}-{name}.pth");
        members.push(load_checkpoint_for_eval(&layout, &file, skeleton, &device)?);
    }

    let triple = evaluate_members::<TrainBackend, _, _, _, _>(
        &members,
        &dataset,
        args.batch_size,
        &BceLoss,
        &OverallAccuracy::default(),
        &device,
    )?;
    println!(
        "{run_id}: {} samples, BCELoss={:.3}, OAAcc={:.3}, FPS={:.3}",
        dataset.len(),
        triple.loss,
        triple.metric,
        triple.fps
    );
    Ok(())
}
