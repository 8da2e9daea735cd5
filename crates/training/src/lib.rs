#![recursion_limit = "256"]

pub mod checkpoint;
pub mod config;
pub mod curve;
pub mod dataset;
pub mod ensemble;
pub mod error;
pub mod harness;
pub mod layout;
pub mod losses;
pub mod metrics;
pub mod state;
pub mod trainer;
pub mod util;

pub use checkpoint::{load_checkpoint, load_checkpoint_for_eval};
pub use config::{RunConfig, RunDescriptor, RunPlan, Trigger};
pub use dataset::{
    collate, BatchLoader, DatasetPathConfig, InMemoryDataset, SegBatch, SegItem,
    SegmentationDataset,
};
pub use ensemble::{Ensemble, Mode};
pub use error::{HarnessError, HarnessResult};
pub use harness::{Harness, LogRecord, MetricTriple, DEFAULT_CURVE_COLUMNS};
pub use layout::StorageLayout;
pub use losses::{align_mse, ensemble_mean, BceLoss, Criterion};
pub use metrics::{Evaluator, OverallAccuracy};
pub use stack_models::{SegNet, SegNetConfig, SegmentationModel};
pub use state::{BestCheckpoint, BestTracker, RunState};
pub use trainer::{evaluate_members, StackTrainer, TrainingSummary};
pub use util::{run_train, TrainArgs};

/// Backend alias for training/eval (NdArray by default; WGPU if enabled).
#[cfg(feature = "backend-wgpu")]
pub type TrainBackend = burn_wgpu::Wgpu<f32>;
#[cfg(not(feature = "backend-wgpu"))]
pub type TrainBackend = burn_ndarray::NdArray<f32>;

pub type AutodiffTrainBackend = burn::backend::Autodiff<TrainBackend>;

/// Check the `cuda` flag against the backend this binary was built with.
///
/// The cargo feature fixes the backend, so the flag has to agree with it.
pub fn validate_device_choice(cuda: bool) -> HarnessResult<()> {
    let built_wgpu = cfg!(feature = "backend-wgpu");
    match (cuda, built_wgpu) {
        (true, false) => Err(HarnessError::InvalidConfig(
            "accelerator requested but backend-wgpu feature not enabled; rebuild with \
             --features backend-wgpu or drop --cuda"
                .into(),
        )),
        (false, true) => Err(HarnessError::InvalidConfig(
            "built with backend-wgpu; pass --cuda or rebuild without the feature".into(),
        )),
        _ => Ok(()),
    }
}
