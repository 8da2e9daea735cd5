//! Run configuration: trigger units, run length normalisation and run identity.

use crate::error::{HarnessError, HarnessResult};
use clap::ValueEnum;
use serde::Deserialize;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

/// Unit in which run length and validation cadence are expressed.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Trigger {
    Epoch,
    Iter,
}

impl Trigger {
    pub fn as_str(self) -> &'static str {
        match self {
            Trigger::Epoch => "epoch",
            Trigger::Iter => "iter",
        }
    }

    /// Axis label used by the learning curve.
    pub fn axis_label(self) -> &'static str {
        match self {
            Trigger::Epoch => "Epochs",
            Trigger::Iter => "Iterations",
        }
    }
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Trigger {
    type Err = HarnessError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "epoch" => Ok(Trigger::Epoch),
            "iter" => Ok(Trigger::Iter),
            other => Err(HarnessError::InvalidConfig(format!(
                "unknown trigger '{other}' (expected 'epoch' or 'iter')"
            ))),
        }
    }
}

/// Knobs consumed by the trainer. Immutable once a run starts.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RunConfig {
    pub trigger: Trigger,
    /// Run length in trigger units.
    pub terminal: usize,
    /// Validation cadence in trigger units.
    pub interval: usize,
    pub batch_size: usize,
    /// Run on the accelerator backend.
    pub cuda: bool,
    /// Weight of the alignment loss.
    pub alpha: f64,
    pub lr: f64,
    /// Shuffle seed for the training loader; `None` draws one from the OS.
    pub seed: Option<u64>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            trigger: Trigger::Epoch,
            terminal: 10,
            interval: 1,
            batch_size: 4,
            cuda: false,
            alpha: 0.1,
            lr: 1e-3,
            seed: None,
        }
    }
}

impl RunConfig {
    pub fn from_path(path: &Path) -> HarnessResult<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| HarnessError::io(path, e))?;
        let cfg: RunConfig = toml::from_str(&raw).map_err(|e| {
            HarnessError::InvalidConfig(format!("failed to parse {}: {e}", path.display()))
        })?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> HarnessResult<()> {
        if self.terminal == 0 {
            return Err(HarnessError::InvalidConfig("terminal must be >= 1".into()));
        }
        if self.interval == 0 {
            return Err(HarnessError::InvalidConfig("interval must be >= 1".into()));
        }
        if self.batch_size == 0 {
            return Err(HarnessError::InvalidConfig("batch_size must be >= 1".into()));
        }
        if !self.alpha.is_finite() || self.alpha < 0.0 {
            return Err(HarnessError::InvalidConfig(format!(
                "alpha must be a finite non-negative number, got {}",
                self.alpha
            )));
        }
        if !self.lr.is_finite() || self.lr <= 0.0 {
            return Err(HarnessError::InvalidConfig(format!(
                "lr must be a finite positive number, got {}",
                self.lr
            )));
        }
        Ok(())
    }
}

/// Identity of one run; every persisted artifact is keyed by `run_id()`.
#[derive(Debug, Clone)]
pub struct RunDescriptor {
    pub method: String,
    pub config: RunConfig,
    /// Local start time, e.g. `Oct18_14`.
    pub date: String,
}

impl RunDescriptor {
    pub fn new(method: impl Into<String>, config: RunConfig) -> HarnessResult<Self> {
        let method = method.into();
        if method.trim().is_empty() {
            return Err(HarnessError::InvalidConfig("method name is empty".into()));
        }
        config.validate()?;
        Ok(Self {
            method,
            config,
            date: chrono::Local::now().format("%b%d_%H").to_string(),
        })
    }

    pub fn run_id(&self) -> String {
        format!(
            "{}_{}_{}",
            self.method, self.config.trigger, self.config.terminal
        )
    }
}

/// Run length normalised to iterations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunPlan {
    /// Batches per epoch (the last batch may be partial).
    pub steps: usize,
    pub epochs: usize,
    /// Iteration cap; the counter never ends above it.
    pub iters: usize,
    /// Validation cadence in iterations.
    pub iter_interval: usize,
}

impl RunPlan {
    pub fn new(config: &RunConfig, train_len: usize) -> HarnessResult<Self> {
        config.validate()?;
        if train_len == 0 {
            return Err(HarnessError::Dataset("training dataset is empty".into()));
        }
        let steps = train_len.div_ceil(config.batch_size);
        let plan = match config.trigger {
            Trigger::Epoch => RunPlan {
                steps,
                epochs: config.terminal,
                iters: steps * config.terminal,
                iter_interval: steps * config.interval,
            },
            // One spare epoch so the iteration cap is always reachable.
            Trigger::Iter => RunPlan {
                steps,
                epochs: config.terminal / steps + 1,
                iters: config.terminal,
                iter_interval: config.interval,
            },
        };
        Ok(plan)
    }

    /// Number of validation boundaries the run will cross.
    pub fn boundaries(&self) -> usize {
        self.iters / self.iter_interval
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg(trigger: Trigger, terminal: usize, interval: usize, batch_size: usize) -> RunConfig {
        RunConfig {
            trigger,
            terminal,
            interval,
            batch_size,
            ..RunConfig::default()
        }
    }

    #[test]
    fn epoch_trigger_scales_by_steps() {
        let plan = RunPlan::new(&cfg(Trigger::Epoch, 5, 1, 10), 100).unwrap();
        assert_eq!(
            plan,
            RunPlan {
                steps: 10,
                epochs: 5,
                iters: 50,
                iter_interval: 10,
            }
        );
        assert_eq!(plan.boundaries(), 5);
    }

    #[test]
    fn iter_trigger_adds_spare_epoch() {
        let plan = RunPlan::new(&cfg(Trigger::Iter, 23, 5, 10), 100).unwrap();
        assert_eq!(plan.steps, 10);
        assert_eq!(plan.epochs, 3);
        assert_eq!(plan.iters, 23);
        assert_eq!(plan.iter_interval, 5);
    }

    #[test]
    fn partial_batch_counts_as_step() {
        let plan = RunPlan::new(&cfg(Trigger::Epoch, 2, 1, 4), 10).unwrap();
        assert_eq!(plan.steps, 3);
        assert_eq!(plan.iters, 6);
    }

    #[test]
    fn iteration_cap_matches_trigger_for_many_shapes() {
        for len in [1usize, 7, 10, 33] {
            for batch_size in [1usize, 3, 8] {
                for terminal in [1usize, 4, 19] {
                    let steps = len.div_ceil(batch_size);
                    let plan = RunPlan::new(&cfg(Trigger::Epoch, terminal, 1, batch_size), len)
                        .unwrap();
                    assert_eq!(plan.iters, steps * terminal);
                    let plan = RunPlan::new(&cfg(Trigger::Iter, terminal, 1, batch_size), len)
                        .unwrap();
                    assert_eq!(plan.iters, terminal);
                    assert!(plan.epochs * plan.steps >= plan.iters);
                }
            }
        }
    }

    #[test]
    fn rejects_zero_interval_and_empty_dataset() {
        assert!(matches!(
            RunPlan::new(&cfg(Trigger::Epoch, 1, 0, 1), 10),
            Err(HarnessError::InvalidConfig(_))
        ));
        assert!(matches!(
            RunPlan::new(&cfg(Trigger::Epoch, 1, 1, 1), 0),
            Err(HarnessError::Dataset(_))
        ));
    }

    #[test]
    fn run_id_combines_method_trigger_terminal() {
        let desc = RunDescriptor::new("unet", cfg(Trigger::Iter, 300, 50, 8)).unwrap();
        assert_eq!(desc.run_id(), "unet_iter_300");
        assert!(!desc.date.is_empty());
    }

    #[test]
    fn trigger_parses_case_insensitively() {
        assert_eq!("Epoch".parse::<Trigger>().unwrap(), Trigger::Epoch);
        assert_eq!("iter".parse::<Trigger>().unwrap(), Trigger::Iter);
        assert!("step".parse::<Trigger>().is_err());
    }

    #[test]
    fn toml_fills_missing_keys_with_defaults() {
        let cfg: RunConfig = toml::from_str("trigger = \"iter\"\nterminal = 40\n").unwrap();
        assert_eq!(cfg.trigger, Trigger::Iter);
        assert_eq!(cfg.terminal, 40);
        assert_eq!(cfg.batch_size, RunConfig::default().batch_size);
    }
}
