//! Stacked-ensemble training loop.

use crate::config::{RunDescriptor, RunPlan};
use crate::dataset::{BatchLoader, SegmentationDataset};
use crate::ensemble::Ensemble;
use crate::error::{HarnessError, HarnessResult};
use crate::harness::{Harness, MetricTriple};
use crate::layout::StorageLayout;
use crate::losses::{align_mse, ensemble_mean, BceLoss, Criterion};
use crate::metrics::{mean, round3, scalar, Evaluator, OverallAccuracy};
use crate::state::{BestCheckpoint, RunState};
use crate::validate_device_choice;
use burn::module::AutodiffModule;
use burn::optim::Optimizer;
use burn::tensor::backend::{AutodiffBackend, Backend};
use stack_models::SegmentationModel;
use std::path::PathBuf;
use std::time::Instant;

/// Outcome of a completed `training` call.
#[derive(Debug, Clone)]
pub struct TrainingSummary {
    pub plan: RunPlan,
    pub epochs_run: usize,
    pub iters_run: usize,
    pub best: BestCheckpoint,
    pub summary_path: PathBuf,
}

pub struct StackTrainer<C = BceLoss, E = OverallAccuracy> {
    harness: Harness,
    criterion: C,
    evaluator: E,
    verbose: bool,
}

impl StackTrainer<BceLoss, OverallAccuracy> {
    pub fn new(descriptor: RunDescriptor, layout: StorageLayout) -> Self {
        Self::with_parts(descriptor, layout, BceLoss, OverallAccuracy::default())
    }
}

impl<C: Criterion, E: Evaluator> StackTrainer<C, E> {
    pub fn with_parts(
        descriptor: RunDescriptor,
        layout: StorageLayout,
        criterion: C,
        evaluator: E,
    ) -> Self {
        let harness = Harness::new(descriptor, layout, criterion.name(), evaluator.name());
        Self {
            harness,
            criterion,
            evaluator,
            verbose: true,
        }
    }

    /// Print one line per logged interval (on by default).
    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn harness(&self) -> &Harness {
        &self.harness
    }

    pub fn harness_mut(&mut self) -> &mut Harness {
        &mut self.harness
    }

    /// Train `ensemble` on `train`, validating on `val` at every interval boundary.
    ///
    /// Member checkpoints are rewritten whenever validation accuracy ties or beats the
    /// best so far, and one summary row is appended to `checkpoint.csv` at the end.
    ///
    /// Fails before touching the members when `config.cuda` disagrees with the built
    /// backend or the run is too short to reach a single validation boundary.
    pub fn training<B, M, O, T, V>(
        &mut self,
        ensemble: &mut Ensemble<B, M, O>,
        train: &T,
        val: &V,
        device: &B::Device,
    ) -> HarnessResult<TrainingSummary>
    where
        B: AutodiffBackend,
        M: AutodiffModule<B> + SegmentationModel<B>,
        M::InnerModule: SegmentationModel<B::InnerBackend>,
        O: Optimizer<Vec<M>, B>,
        T: SegmentationDataset,
        V: SegmentationDataset,
    {
        let config = self.harness.descriptor().config.clone();
        validate_device_choice(config.cuda)?;
        let plan = RunPlan::new(&config, train.len())?;
        if plan.boundaries() == 0 {
            return Err(HarnessError::RunTooShort {
                iters: plan.iters,
                iter_interval: plan.iter_interval,
            });
        }
        let run_id = self.harness.run_id();
        log::info!(
            "{run_id}: {} members, {} epochs x {} steps, cap {} iters, validate every {} iters",
            ensemble.len(),
            plan.epochs,
            plan.steps,
            plan.iters,
            plan.iter_interval
        );

        let mut loader = BatchLoader::new(config.batch_size, true, config.seed);
        let mut state = RunState::new();
        ensemble.train_mode();

        'epochs: for epoch in 1..=plan.epochs {
            state.epoch = epoch;
            let mut batches = loader.epoch(train);
            while let Some(batch) = batches.next_batch::<B>(device)? {
                if !state.advance(plan.iters) {
                    break 'epochs;
                }

                let outputs = ensemble.forward_all(batch.images);
                let align = align_mse(&outputs, device);
                let pred = ensemble_mean(&outputs).ok_or_else(|| {
                    HarnessError::InvalidConfig("ensemble has no members".into())
                })?;
                let acc = self
                    .evaluator
                    .forward(pred.clone().detach(), batch.masks.clone());
                let seg = self.criterion.forward(pred, batch.masks);
                let loss = seg + align.mul_scalar(config.alpha);
                let loss_value = scalar(loss.clone().detach());

                ensemble.step(loss);
                state.record_batch(loss_value, scalar(acc));

                if state.is_boundary(plan.iter_interval) {
                    self.close_interval(ensemble, val, device, &mut state, &plan, &run_id)?;
                }
            }
        }

        let epochs_run = state.epoch;
        let iters_run = state.iter;
        let best = state
            .best
            .into_checkpoint()
            .ok_or(HarnessError::RunTooShort {
                iters: iters_run,
                iter_interval: plan.iter_interval,
            })?;
        let summary_path = self.harness.save_checkpoint_summary(&best)?;

        println!("Best {} Performance: \n", self.harness.metric_name());
        println!("\t Trn: {}", best.trn_metric);
        println!("\t Val: {}", best.val_metric);

        Ok(TrainingSummary {
            plan,
            epochs_run,
            iters_run,
            best,
            summary_path,
        })
    }

    fn close_interval<B, M, O, V>(
        &mut self,
        ensemble: &mut Ensemble<B, M, O>,
        val: &V,
        device: &B::Device,
        state: &mut RunState,
        plan: &RunPlan,
        run_id: &str,
    ) -> HarnessResult<()>
    where
        B: AutodiffBackend,
        M: AutodiffModule<B> + SegmentationModel<B>,
        M::InnerModule: SegmentationModel<B::InnerBackend>,
        O: Optimizer<Vec<M>, B>,
        V: SegmentationDataset,
    {
        let batch_size = self.harness.descriptor().config.batch_size;
        let (loss, acc) = state.take_interval()?;
        let elapsed = state.elapsed().as_secs_f64().max(f64::EPSILON);
        let fps = (plan.iter_interval * batch_size) as f64 / elapsed;
        self.harness.trn_log = MetricTriple {
            loss: round3(loss),
            metric: round3(acc),
            fps: round3(fps),
        };

        self.validating(ensemble, val, device)?;
        self.harness.logging(state.epoch, state.iter, self.verbose);

        let trn_metric = self.harness.trn_log.metric;
        let val_metric = self.harness.val_log.metric;
        if state
            .best
            .offer(run_id, state.epoch, state.iter, trn_metric, val_metric)
        {
            self.harness.save_checkpoint(ensemble)?;
        }

        state.restart_timer();
        ensemble.train_mode();
        Ok(())
    }

    /// Score the ensemble on `dataset` in evaluation mode; the result is also kept as
    /// the harness' latest validation triple.
    pub fn validating<B, M, O, V>(
        &mut self,
        ensemble: &mut Ensemble<B, M, O>,
        dataset: &V,
        device: &B::Device,
    ) -> HarnessResult<MetricTriple>
    where
        B: AutodiffBackend,
        M: AutodiffModule<B> + SegmentationModel<B>,
        M::InnerModule: SegmentationModel<B::InnerBackend>,
        O: Optimizer<Vec<M>, B>,
        V: SegmentationDataset,
    {
        let members = ensemble.eval_mode();
        let triple = evaluate_members::<B::InnerBackend, _, _, _, _>(
            &members,
            dataset,
            self.harness.descriptor().config.batch_size,
            &self.criterion,
            &self.evaluator,
            device,
        )?;
        self.harness.val_log = triple;
        Ok(triple)
    }
}

/// One unshuffled pass over `dataset` with the averaged prediction of `members`.
pub fn evaluate_members<B, M, D, C, E>(
    members: &[M],
    dataset: &D,
    batch_size: usize,
    criterion: &C,
    evaluator: &E,
    device: &B::Device,
) -> HarnessResult<MetricTriple>
where
    B: Backend,
    M: SegmentationModel<B>,
    D: SegmentationDataset,
    C: Criterion,
    E: Evaluator,
{
    let started = Instant::now();
    let mut loader = BatchLoader::new(batch_size, false, None);
    let mut batches = loader.epoch(dataset);
    let mut losses = Vec::with_capacity(batches.len());
    let mut accs = Vec::with_capacity(batches.len());
    let mut samples = 0usize;
    while let Some(batch) = batches.next_batch::<B>(device)? {
        samples += batch.len();
        let outputs: Vec<_> = members
            .iter()
            .map(|member| member.forward(batch.images.clone()))
            .collect();
        let pred = ensemble_mean(&outputs)
            .ok_or_else(|| HarnessError::InvalidConfig("ensemble has no members".into()))?;
        losses.push(scalar(criterion.forward(pred.clone(), batch.masks.clone())));
        accs.push(scalar(evaluator.forward(pred, batch.masks)));
    }

    let loss = mean(&losses).ok_or(HarnessError::EmptyValidation)?;
    let acc = mean(&accs).ok_or(HarnessError::EmptyValidation)?;
    let fps = samples as f64 / started.elapsed().as_secs_f64().max(f64::EPSILON);
    Ok(MetricTriple {
        loss: round3(loss),
        metric: round3(acc),
        fps: round3(fps),
    })
}
