#![allow(dead_code)]

use burn::optim::AdamConfig;
use stack_training::{
    AutodiffTrainBackend, Ensemble, InMemoryDataset, RunConfig, SegItem, SegNet, SegNetConfig,
    Trigger,
};

pub type AD = AutodiffTrainBackend;

pub const SIDE: usize = 4;

/// Deterministic toy split: the mask marks pixels whose red channel is bright.
pub fn synthetic(len: usize, offset: usize) -> InMemoryDataset {
    let items = (0..len)
        .map(|i| {
            let n = i + offset;
            let plane = SIDE * SIDE;
            let image: Vec<f32> = (0..3 * plane)
                .map(|p| ((n * 7 + p * 13) % 17) as f32 / 16.0)
                .collect();
            let mask: Vec<f32> = image[..plane]
                .iter()
                .map(|&v| if v > 0.5 { 1.0 } else { 0.0 })
                .collect();
            SegItem::new(image, mask, 3, SIDE, SIDE).unwrap()
        })
        .collect();
    InMemoryDataset::new(items)
}

pub fn run_config(trigger: Trigger, terminal: usize, interval: usize) -> RunConfig {
    RunConfig {
        trigger,
        terminal,
        interval,
        batch_size: 10,
        cuda: cfg!(feature = "backend-wgpu"),
        seed: Some(7),
        ..RunConfig::default()
    }
}

pub fn ensemble(
    device: &<AD as burn::tensor::backend::Backend>::Device,
) -> Ensemble<AD, SegNet<AD>, impl burn::optim::Optimizer<Vec<SegNet<AD>>, AD>> {
    let members = vec![
        (
            "a".to_string(),
            SegNet::<AD>::new(SegNetConfig::default().with_hidden(4), device),
        ),
        (
            "b".to_string(),
            SegNet::<AD>::new(SegNetConfig::default().with_hidden(6), device),
        ),
    ];
    let optim = AdamConfig::new().init::<AD, Vec<SegNet<AD>>>();
    Ensemble::new(members, optim, 1e-3).unwrap()
}

/// Inference outputs of every member on a fixed all-ones batch.
pub fn member_outputs<M>(members: &[M]) -> Vec<Vec<f32>>
where
    M: burn::module::AutodiffModule<AD>,
    M::InnerModule: stack_training::SegmentationModel<stack_training::TrainBackend>,
{
    use stack_training::SegmentationModel;
    let device = Default::default();
    let input = burn::tensor::Tensor::<stack_training::TrainBackend, 4>::ones(
        [1, 3, SIDE, SIDE],
        &device,
    );
    members
        .iter()
        .map(|member| {
            member
                .valid()
                .forward(input.clone())
                .into_data()
                .to_vec::<f32>()
                .unwrap()
        })
        .collect()
}
