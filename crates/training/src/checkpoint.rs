use crate::error::{HarnessError, HarnessResult};
use crate::layout::StorageLayout;
use burn::module::{AutodiffModule, Module};
use burn::record::{BinBytesRecorder, FullPrecisionSettings, Recorder};
use burn::tensor::backend::{AutodiffBackend, Backend};
use std::fs;

/// Load `<checkpoint_dir>/<name>` into `skeleton` and move it to `device`.
///
/// `skeleton` must have the architecture the checkpoint was written from. A missing
/// file is reported as [`HarnessError::CheckpointNotFound`].
pub fn load_checkpoint<B, M>(
    layout: &StorageLayout,
    name: &str,
    skeleton: M,
    device: &B::Device,
) -> HarnessResult<M>
where
    B: Backend,
    M: Module<B>,
{
    let path = layout.checkpoint_dir().join(name);
    if !path.is_file() {
        return Err(HarnessError::CheckpointNotFound { path });
    }
    log::info!("Loading checkpoint: {name}");
    let bytes = fs::read(&path).map_err(|e| HarnessError::io(&path, e))?;
    let recorder = BinBytesRecorder::<FullPrecisionSettings>::new();
    let record: M::Record = <BinBytesRecorder<FullPrecisionSettings> as Recorder<B>>::load(
        &recorder, bytes, device,
    )
    .map_err(|e| HarnessError::Record {
        path: path.clone(),
        msg: e.to_string(),
    })?;
    Ok(skeleton.load_record(record).to_device(device))
}

/// [`load_checkpoint`] followed by a switch to evaluation mode.
pub fn load_checkpoint_for_eval<B, M>(
    layout: &StorageLayout,
    name: &str,
    skeleton: M,
    device: &B::Device,
) -> HarnessResult<M::InnerModule>
where
    B: AutodiffBackend,
    M: AutodiffModule<B>,
{
    Ok(load_checkpoint(layout, name, skeleton, device)?.valid())
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_ndarray::NdArray;
    use stack_models::{SegNet, SegNetConfig};

    #[test]
    fn missing_file_is_a_typed_error() {
        let temp = tempfile::tempdir().unwrap();
        let layout = StorageLayout::new(temp.path());
        let device = Default::default();
        let skeleton = SegNet::<NdArray<f32>>::new(SegNetConfig::default(), &device);
        let err = load_checkpoint(&layout, "nope-a.pth", skeleton, &device).unwrap_err();
        match err {
            HarnessError::CheckpointNotFound { path } => {
                assert!(path.ends_with("checkpoint/nope-a.pth"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
