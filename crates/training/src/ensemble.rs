//! Named ensemble members trained jointly through one optimizer.

use crate::error::{HarnessError, HarnessResult};
use burn::module::{AutodiffModule, Module};
use burn::optim::{GradientsParams, Optimizer};
use burn::record::{BinBytesRecorder, FullPrecisionSettings, Recorder};
use burn::tensor::backend::AutodiffBackend;
use burn::tensor::Tensor;
use stack_models::SegmentationModel;
use std::collections::HashSet;
use std::fs;
use std::path::PathBuf;

/// Which phase the ensemble was last switched to.
///
/// Bookkeeping only: dropout and graph recording follow the backend, i.e. the
/// autodiff members versus the copies returned by `eval_mode`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Train,
    Eval,
}

/// Ordered `(name, model)` pairs sharing one optimizer.
///
/// The members are held as a `Vec<M>`, which burn treats as a single module, so the
/// optimizer state spans the union of every member's parameters.
pub struct Ensemble<B, M, O>
where
    B: AutodiffBackend,
    M: AutodiffModule<B> + SegmentationModel<B>,
    O: Optimizer<Vec<M>, B>,
{
    names: Vec<String>,
    members: Vec<M>,
    optimizer: O,
    lr: f64,
    mode: Mode,
    _backend: std::marker::PhantomData<B>,
}

impl<B, M, O> Ensemble<B, M, O>
where
    B: AutodiffBackend,
    M: AutodiffModule<B> + SegmentationModel<B>,
    O: Optimizer<Vec<M>, B>,
{
    pub fn new(members: Vec<(String, M)>, optimizer: O, lr: f64) -> HarnessResult<Self> {
        if members.is_empty() {
            return Err(HarnessError::InvalidConfig(
                "ensemble needs at least one member".into(),
            ));
        }
        {
            let mut seen = HashSet::new();
            for (name, _) in &members {
                if name.trim().is_empty() {
                    return Err(HarnessError::InvalidConfig("member name is empty".into()));
                }
                if !seen.insert(name.as_str()) {
                    return Err(HarnessError::InvalidConfig(format!(
                        "duplicate member name '{name}'"
                    )));
                }
            }
        }
        let (names, members) = members.into_iter().unzip();
        Ok(Self {
            names,
            members,
            optimizer,
            lr,
            mode: Mode::Train,
            _backend: std::marker::PhantomData,
        })
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn members(&self) -> &[M] {
        &self.members
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn lr(&self) -> f64 {
        self.lr
    }

    /// Run the same batch through every member.
    pub fn forward_all(&self, images: Tensor<B, 4>) -> Vec<Tensor<B, 4>> {
        self.members
            .iter()
            .map(|member| member.forward(images.clone()))
            .collect()
    }

    /// Mark the ensemble as training; the autodiff members are already in train mode.
    pub fn train_mode(&mut self) {
        self.mode = Mode::Train;
    }

    /// Inference copies of the members (dropout off, no autodiff graph).
    pub fn eval_mode(&mut self) -> Vec<M::InnerModule> {
        self.mode = Mode::Eval;
        self.members.valid()
    }

    /// Backpropagate `loss` and apply one optimizer step to every member.
    pub fn step(&mut self, loss: Tensor<B, 1>) {
        let grads = GradientsParams::from_grads(loss.backward(), &self.members);
        self.members = self
            .optimizer
            .step(self.lr, self.members.clone(), grads);
    }

    /// Write every member to `path_for(name)`, replacing existing files.
    pub fn save_all<F>(&self, path_for: F) -> HarnessResult<Vec<PathBuf>>
    where
        F: Fn(&str) -> PathBuf,
    {
        let recorder = BinBytesRecorder::<FullPrecisionSettings>::new();
        let mut written = Vec::with_capacity(self.len());
        for (name, member) in self.names.iter().zip(&self.members) {
            let path = path_for(name);
            let bytes = <BinBytesRecorder<FullPrecisionSettings> as Recorder<B>>::record(
                &recorder,
                member.clone().into_record(),
                (),
            )
            .map_err(|e| HarnessError::Record {
                path: path.clone(),
                msg: e.to_string(),
            })?;
            fs::write(&path, bytes).map_err(|e| HarnessError::io(&path, e))?;
            written.push(path);
        }
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::{ndarray::NdArray, Autodiff};
    use burn::optim::AdamConfig;
    use stack_models::{SegNet, SegNetConfig};

    type AD = Autodiff<NdArray<f32>>;

    fn adam() -> impl Optimizer<Vec<SegNet<AD>>, AD> {
        AdamConfig::new().init()
    }

    fn member(hidden: usize) -> SegNet<AD> {
        SegNet::new(SegNetConfig::default().with_hidden(hidden), &Default::default())
    }

    #[test]
    fn rejects_empty_and_duplicate_members() {
        let empty: Vec<(String, SegNet<AD>)> = Vec::new();
        assert!(Ensemble::new(empty, adam(), 1e-3).is_err());

        let dup = vec![("a".to_string(), member(2)), ("a".to_string(), member(2))];
        assert!(Ensemble::new(dup, adam(), 1e-3).is_err());
    }

    #[test]
    fn forward_all_yields_one_output_per_member() {
        let members = vec![("a".to_string(), member(2)), ("b".to_string(), member(3))];
        let mut ensemble = Ensemble::new(members, adam(), 1e-3).unwrap();
        let images = Tensor::<AD, 4>::zeros([2, 3, 4, 4], &Default::default());
        let outputs = ensemble.forward_all(images);
        assert_eq!(outputs.len(), 2);
        assert!(outputs.iter().all(|o| o.dims() == [2, 1, 4, 4]));

        assert_eq!(ensemble.mode(), Mode::Train);
        let inner = ensemble.eval_mode();
        assert_eq!(inner.len(), 2);
        assert_eq!(ensemble.mode(), Mode::Eval);
        ensemble.train_mode();
        assert_eq!(ensemble.mode(), Mode::Train);
    }

    #[test]
    fn save_all_writes_one_file_per_member() {
        let temp = tempfile::tempdir().unwrap();
        let members = vec![("a".to_string(), member(2)), ("b".to_string(), member(2))];
        let ensemble = Ensemble::new(members, adam(), 1e-3).unwrap();
        let paths = ensemble
            .save_all(|name| temp.path().join(format!("run-{name}.pth")))
            .unwrap();
        assert_eq!(
            paths,
            vec![temp.path().join("run-a.pth"), temp.path().join("run-b.pth")]
        );
        assert!(paths.iter().all(|p| p.metadata().unwrap().len() > 0));
    }
}
