//! Mutable loop state of a training run.

use crate::error::{HarnessError, HarnessResult};
use crate::metrics::mean;
use std::time::{Duration, Instant};

/// Best-so-far validation result; one row of `checkpoint.csv`.
#[derive(Debug, Clone, PartialEq)]
pub struct BestCheckpoint {
    pub run_id: String,
    pub epoch: usize,
    pub iter: usize,
    pub trn_metric: f64,
    pub val_metric: f64,
}

#[derive(Debug, Clone)]
pub struct BestTracker {
    best_trn: f64,
    best_val: f64,
    checkpoint: Option<BestCheckpoint>,
}

impl Default for BestTracker {
    fn default() -> Self {
        Self {
            best_trn: -1.0,
            best_val: -1.0,
            checkpoint: None,
        }
    }
}

impl BestTracker {
    /// Returns true when `val_metric` ties or beats the best so far; the tracker is
    /// updated in that case.
    pub fn offer(
        &mut self,
        run_id: &str,
        epoch: usize,
        iter: usize,
        trn_metric: f64,
        val_metric: f64,
    ) -> bool {
        if val_metric < self.best_val {
            return false;
        }
        self.best_trn = trn_metric;
        self.best_val = val_metric;
        self.checkpoint = Some(BestCheckpoint {
            run_id: run_id.to_string(),
            epoch,
            iter,
            trn_metric,
            val_metric,
        });
        true
    }

    pub fn best_trn(&self) -> f64 {
        self.best_trn
    }

    pub fn best_val(&self) -> f64 {
        self.best_val
    }

    pub fn checkpoint(&self) -> Option<&BestCheckpoint> {
        self.checkpoint.as_ref()
    }

    pub fn into_checkpoint(self) -> Option<BestCheckpoint> {
        self.checkpoint
    }
}

/// Epoch/iteration counters, rolling training buffers and the interval timer.
#[derive(Debug)]
pub struct RunState {
    pub epoch: usize,
    pub iter: usize,
    trn_loss: Vec<f64>,
    trn_acc: Vec<f64>,
    started: Instant,
    pub best: BestTracker,
}

impl Default for RunState {
    fn default() -> Self {
        Self::new()
    }
}

impl RunState {
    pub fn new() -> Self {
        Self {
            epoch: 0,
            iter: 0,
            trn_loss: Vec::new(),
            trn_acc: Vec::new(),
            started: Instant::now(),
            best: BestTracker::default(),
        }
    }

    /// Count one more iteration unless that would pass `cap`.
    ///
    /// Returns false, leaving `iter == cap`, once the cap is reached.
    pub fn advance(&mut self, cap: usize) -> bool {
        self.iter += 1;
        if self.iter > cap {
            self.iter -= 1;
            return false;
        }
        true
    }

    pub fn is_boundary(&self, iter_interval: usize) -> bool {
        iter_interval > 0 && self.iter % iter_interval == 0
    }

    pub fn record_batch(&mut self, loss: f64, acc: f64) {
        self.trn_loss.push(loss);
        self.trn_acc.push(acc);
    }

    pub fn pending(&self) -> usize {
        self.trn_loss.len()
    }

    /// Mean loss and accuracy since the last boundary; clears the buffers.
    pub fn take_interval(&mut self) -> HarnessResult<(f64, f64)> {
        let loss = mean(&self.trn_loss).ok_or(HarnessError::EmptyInterval)?;
        let acc = mean(&self.trn_acc).ok_or(HarnessError::EmptyInterval)?;
        self.trn_loss.clear();
        self.trn_acc.clear();
        Ok((loss, acc))
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn restart_timer(&mut self) {
        self.started = Instant::now();
    }
}
