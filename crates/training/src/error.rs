//! Error type shared by the harness library.

use std::path::PathBuf;
use thiserror::Error;

pub type HarnessResult<T> = Result<T, HarnessError>;

#[derive(Debug, Error)]
pub enum HarnessError {
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("csv error at {path}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
    #[error("image decode error at {path}: {source}")]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("checkpoint record error at {path}: {msg}")]
    Record { path: PathBuf, msg: String },
    #[error("checkpoint {path} does not exist")]
    CheckpointNotFound { path: PathBuf },
    #[error("no samples in interval; cannot average training metrics")]
    EmptyInterval,
    #[error("log is empty; nothing to summarise")]
    EmptyLog,
    #[error("validation dataset produced no batches")]
    EmptyValidation,
    #[error(
        "run too short to produce a checkpoint summary: {iters} iterations never reach the \
         validation interval of {iter_interval}"
    )]
    RunTooShort { iters: usize, iter_interval: usize },
    #[error("invalid run configuration: {0}")]
    InvalidConfig(String),
    #[error("dataset error: {0}")]
    Dataset(String),
    #[error("learning curve error: {0}")]
    Plot(String),
}

impl HarnessError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn csv(path: impl Into<PathBuf>, source: csv::Error) -> Self {
        Self::Csv {
            path: path.into(),
            source,
        }
    }
}
