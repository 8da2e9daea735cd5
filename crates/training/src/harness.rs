//! Run identity, metric log and on-disk artifacts shared by every trainer.

use crate::config::RunDescriptor;
use crate::curve::{render_learning_curve, CurveSeries};
use crate::ensemble::Ensemble;
use crate::error::{HarnessError, HarnessResult};
use crate::layout::StorageLayout;
use crate::metrics::mean;
use crate::state::BestCheckpoint;
use burn::module::AutodiffModule;
use burn::optim::Optimizer;
use burn::tensor::backend::AutodiffBackend;
use stack_models::SegmentationModel;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

/// Columns used by `learning_curve` when the caller has no preference.
pub const DEFAULT_CURVE_COLUMNS: [usize; 4] = [2, 3, 5, 6];

/// Loss, metric and samples/second for one stage of one interval.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MetricTriple {
    pub loss: f64,
    pub metric: f64,
    pub fps: f64,
}

impl MetricTriple {
    pub fn values(&self) -> [f64; 3] {
        [self.loss, self.metric, self.fps]
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LogRecord {
    pub epoch: usize,
    pub iter: usize,
    pub trn: MetricTriple,
    pub val: MetricTriple,
}

impl LogRecord {
    /// The six metric columns in header order.
    pub fn metrics(&self) -> [f64; 6] {
        let [a, b, c] = self.trn.values();
        let [d, e, f] = self.val.values();
        [a, b, c, d, e, f]
    }

    /// Value of header column `idx` (0 = epoch, 1 = iter, 2..8 = metrics).
    pub fn column(&self, idx: usize) -> Option<f64> {
        match idx {
            0 => Some(self.epoch as f64),
            1 => Some(self.iter as f64),
            _ => self.metrics().get(idx - 2).copied(),
        }
    }
}

pub struct Harness {
    descriptor: RunDescriptor,
    layout: StorageLayout,
    loss_name: String,
    metric_name: String,
    header: Vec<String>,
    logs: Vec<LogRecord>,
    pub trn_log: MetricTriple,
    pub val_log: MetricTriple,
}

impl Harness {
    pub fn new(
        descriptor: RunDescriptor,
        layout: StorageLayout,
        loss_name: &str,
        metric_name: &str,
    ) -> Self {
        let mut header = vec!["epoch".to_string(), "iter".to_string()];
        for stage in ["trn", "val"] {
            for key in [loss_name, metric_name, "FPS"] {
                header.push(format!("{stage}_{key}"));
            }
        }
        Self {
            descriptor,
            layout,
            loss_name: loss_name.to_string(),
            metric_name: metric_name.to_string(),
            header,
            logs: Vec::new(),
            trn_log: MetricTriple::default(),
            val_log: MetricTriple::default(),
        }
    }

    pub fn descriptor(&self) -> &RunDescriptor {
        &self.descriptor
    }

    pub fn layout(&self) -> &StorageLayout {
        &self.layout
    }

    pub fn run_id(&self) -> String {
        self.descriptor.run_id()
    }

    pub fn header(&self) -> &[String] {
        &self.header
    }

    pub fn metric_name(&self) -> &str {
        &self.metric_name
    }

    pub fn logs(&self) -> &[LogRecord] {
        &self.logs
    }

    /// Append the latest train/val triples as one log row.
    pub fn logging(&mut self, epoch: usize, iter: usize, verbose: bool) {
        let record = LogRecord {
            epoch,
            iter,
            trn: self.trn_log,
            val: self.val_log,
        };
        self.logs.push(record);
        if verbose {
            let mut parts = vec![
                format!("{}:{:05}", self.header[0], epoch),
                format!("{}:{:05}", self.header[1], iter),
            ];
            for (key, value) in self.header[2..].iter().zip(record.metrics()) {
                parts.push(format!("{key}:{value:.2}"));
            }
            println!("{}", parts.join(" ,"));
        }
    }

    /// Write `logs/raw/<run_id>.csv` and append this run's mean throughput to `logs/speed.csv`.
    pub fn save_log(&self) -> HarnessResult<PathBuf> {
        self.layout.ensure()?;
        let run_id = self.run_id();
        let path = self.layout.raw_log_path(&run_id);
        let mut writer = csv::Writer::from_path(&path).map_err(|e| HarnessError::csv(&path, e))?;
        writer
            .write_record(&self.header)
            .map_err(|e| HarnessError::csv(&path, e))?;
        for record in &self.logs {
            let mut row = vec![record.epoch.to_string(), record.iter.to_string()];
            row.extend(record.metrics().iter().map(|v| format!("{v:.3}")));
            writer
                .write_record(&row)
                .map_err(|e| HarnessError::csv(&path, e))?;
        }
        writer.flush().map_err(|e| HarnessError::io(&path, e))?;
        log::info!("wrote {} log rows to {}", self.logs.len(), path.display());

        let trn_fps: Vec<f64> = self.logs.iter().map(|r| r.trn.fps).collect();
        let val_fps: Vec<f64> = self.logs.iter().map(|r| r.val.fps).collect();
        let (Some(trn_fps), Some(val_fps)) = (mean(&trn_fps), mean(&val_fps)) else {
            return Err(HarnessError::EmptyLog);
        };
        // Labels are taken by position from the per-run header.
        let speed_header = [
            "experiment".to_string(),
            self.header[4].clone(),
            self.header[7].clone(),
        ];
        append_row(
            &self.layout.speed_path(),
            &speed_header,
            &[run_id, trn_fps.to_string(), val_fps.to_string()],
        )?;
        Ok(path)
    }

    /// Persist every member of `ensemble` as `checkpoint/<run_id>-<name>.pth`.
    pub fn save_checkpoint<B, M, O>(
        &self,
        ensemble: &Ensemble<B, M, O>,
    ) -> HarnessResult<Vec<PathBuf>>
    where
        B: AutodiffBackend,
        M: AutodiffModule<B> + SegmentationModel<B>,
        O: Optimizer<Vec<M>, B>,
    {
        self.layout.ensure()?;
        let run_id = self.run_id();
        let paths = ensemble.save_all(|name| self.layout.checkpoint_path(&run_id, name))?;
        log::debug!("saved {} member checkpoints for {run_id}", paths.len());
        Ok(paths)
    }

    /// Append the best-checkpoint row of this run to `checkpoint/checkpoint.csv`.
    pub fn save_checkpoint_summary(&self, best: &BestCheckpoint) -> HarnessResult<PathBuf> {
        self.layout.ensure()?;
        let path = self.layout.checkpoint_summary_path();
        let header = [
            "experiment".to_string(),
            "best_epoch".to_string(),
            "best_iter".to_string(),
            self.header[3].clone(),
            self.header[6].clone(),
        ];
        append_row(
            &path,
            &header,
            &[
                best.run_id.clone(),
                best.epoch.to_string(),
                best.iter.to_string(),
                best.trn_metric.to_string(),
                best.val_metric.to_string(),
            ],
        )?;
        Ok(path)
    }

    /// Plot header columns `idxs` against the trigger axis into `logs/curve/<run_id>.png`.
    pub fn learning_curve(&self, idxs: &[usize]) -> HarnessResult<PathBuf> {
        if self.logs.is_empty() {
            return Err(HarnessError::EmptyLog);
        }
        if idxs.is_empty() {
            return Err(HarnessError::Plot("no columns selected".into()));
        }
        if let Some(bad) = idxs.iter().find(|idx| !(2..self.header.len()).contains(*idx)) {
            return Err(HarnessError::Plot(format!(
                "column {bad} is not a metric column (expected 2..{})",
                self.header.len()
            )));
        }

        let trigger = self.descriptor.config.trigger;
        let x_column = match trigger {
            crate::config::Trigger::Epoch => 0,
            crate::config::Trigger::Iter => 1,
        };
        let xs: Vec<f64> = self
            .logs
            .iter()
            .filter_map(|r| r.column(x_column))
            .collect();
        let series: Vec<CurveSeries> = idxs
            .iter()
            .map(|&idx| CurveSeries {
                label: self.header[idx].clone(),
                values: self.logs.iter().filter_map(|r| r.column(idx)).collect(),
            })
            .collect();

        self.layout.ensure()?;
        let path = self.layout.curve_path(&self.run_id());
        render_learning_curve(
            &path,
            &format!("Training log of {}", self.descriptor.method),
            trigger.axis_label(),
            &format!(" {} / {} ", self.loss_name, self.metric_name),
            &xs,
            &series,
        )?;
        log::info!("learning curve written to {}", path.display());
        Ok(path)
    }
}

/// Append `row` to a shared CSV, writing `header` first when the file is new or empty.
///
/// Rows are never deduplicated: rerunning the same run id adds another row.
pub(crate) fn append_row(path: &Path, header: &[String], row: &[String]) -> HarnessResult<()> {
    let is_new = std::fs::metadata(path).map(|m| m.len() == 0).unwrap_or(true);
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| HarnessError::io(path, e))?;
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(file);
    if is_new {
        writer
            .write_record(header)
            .map_err(|e| HarnessError::csv(path, e))?;
    }
    writer
        .write_record(row)
        .map_err(|e| HarnessError::csv(path, e))?;
    writer.flush().map_err(|e| HarnessError::io(path, e))?;
    Ok(())
}
