mod common;

use burn::module::AutodiffModule;
use burn::tensor::Tensor;
use common::{ensemble, run_config, synthetic, SIDE};
use stack_training::{
    evaluate_members, load_checkpoint, BceLoss, Harness, OverallAccuracy, RunDescriptor, SegNet,
    SegNetConfig, SegmentationModel, StackTrainer, StorageLayout, TrainBackend, Trigger,
};

#[test]
fn validation_is_repeatable() {
    let device = Default::default();
    let mut ens = ensemble(&device);
    let members = ens.eval_mode();
    let val = synthetic(23, 500);
    let run = || {
        evaluate_members::<TrainBackend, _, _, _, _>(
            &members,
            &val,
            4,
            &BceLoss,
            &OverallAccuracy::default(),
            &device,
        )
        .unwrap()
    };
    let first = run();
    let second = run();
    assert_eq!(first.loss, second.loss);
    assert_eq!(first.metric, second.metric);
    assert!((0.0..=1.0).contains(&first.metric));
}

#[test]
fn validating_twice_gives_the_same_scores() {
    let temp = tempfile::tempdir().unwrap();
    let device = Default::default();
    let mut ens = ensemble(&device);
    let descriptor = RunDescriptor::new("segnet", run_config(Trigger::Epoch, 1, 1)).unwrap();
    let mut trainer = StackTrainer::new(descriptor, StorageLayout::new(temp.path())).verbose(false);
    let val = synthetic(23, 500);

    let first = trainer.validating(&mut ens, &val, &device).unwrap();
    let second = trainer.validating(&mut ens, &val, &device).unwrap();
    assert_eq!(first.loss, second.loss);
    assert_eq!(first.metric, second.metric);
    assert_eq!(trainer.harness().val_log, second);
    assert!(trainer.harness().logs().is_empty());
}

#[test]
fn saved_members_reload_with_identical_outputs() {
    let temp = tempfile::tempdir().unwrap();
    let layout = StorageLayout::new(temp.path());
    let device = Default::default();
    let ens = ensemble(&device);
    let descriptor = RunDescriptor::new("segnet", run_config(Trigger::Epoch, 2, 1)).unwrap();
    let harness = Harness::new(descriptor, layout.clone(), "BCELoss", "OAAcc");

    let paths = harness.save_checkpoint(&ens).unwrap();
    assert_eq!(paths.len(), 2);
    assert!(paths[0].ends_with("checkpoint/segnet_epoch_2-a.pth"));

    let input = Tensor::<TrainBackend, 4>::ones([1, 3, SIDE, SIDE], &device);
    for ((name, member), hidden) in ens.names().iter().zip(ens.members()).zip([4, 6]) {
        let cfg = SegNetConfig::default().with_hidden(hidden);
        let skeleton = SegNet::<common::AD>::new(cfg, &device);
        let file = format!("segnet_epoch_2-{name}.pth");
        let loaded = load_checkpoint(&layout, &file, skeleton, &device).unwrap().valid();
        let expected = member
            .valid()
            .forward(input.clone())
            .into_data()
            .to_vec::<f32>()
            .unwrap();
        let actual = loaded
            .forward(input.clone())
            .into_data()
            .to_vec::<f32>()
            .unwrap();
        assert_eq!(expected.len(), actual.len());
        for (e, a) in expected.iter().zip(&actual) {
            assert!((e - a).abs() < 1e-6, "{name}: {e} vs {a}");
        }
    }
}
