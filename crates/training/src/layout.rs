use crate::error::{HarnessError, HarnessResult};
use std::path::{Path, PathBuf};

/// Filesystem layout for run artifacts.
///
/// ```text
/// <root>/logs/raw/<run_id>.csv
/// <root>/logs/curve/<run_id>.png
/// <root>/logs/speed.csv
/// <root>/checkpoint/<run_id>-<member>.pth
/// <root>/checkpoint/checkpoint.csv
/// ```
#[derive(Debug, Clone)]
pub struct StorageLayout {
    root: PathBuf,
}

impl Default for StorageLayout {
    fn default() -> Self {
        Self::new(PathBuf::from("."))
    }
}

impl StorageLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.root.join("logs")
    }

    pub fn raw_dir(&self) -> PathBuf {
        self.logs_dir().join("raw")
    }

    pub fn curve_dir(&self) -> PathBuf {
        self.logs_dir().join("curve")
    }

    pub fn checkpoint_dir(&self) -> PathBuf {
        self.root.join("checkpoint")
    }

    pub fn raw_log_path(&self, run_id: &str) -> PathBuf {
        self.raw_dir().join(format!("{run_id}.csv"))
    }

    pub fn curve_path(&self, run_id: &str) -> PathBuf {
        self.curve_dir().join(format!("{run_id}.png"))
    }

    pub fn speed_path(&self) -> PathBuf {
        self.logs_dir().join("speed.csv")
    }

    pub fn checkpoint_path(&self, run_id: &str, member: &str) -> PathBuf {
        self.checkpoint_dir().join(format!("{run_id}-{member}.pth"))
    }

    pub fn checkpoint_summary_path(&self) -> PathBuf {
        self.checkpoint_dir().join("checkpoint.csv")
    }

    /// Create every directory of the layout that does not exist yet.
    pub fn ensure(&self) -> HarnessResult<()> {
        for dir in [self.raw_dir(), self.curve_dir(), self.checkpoint_dir()] {
            if !dir.exists() {
                log::debug!("creating {}", dir.display());
                std::fs::create_dir_all(&dir).map_err(|e| HarnessError::io(&dir, e))?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn paths_follow_run_id() {
        let layout = StorageLayout::new("/data");
        assert_eq!(
            layout.raw_log_path("seg_epoch_5"),
            PathBuf::from("/data/logs/raw/seg_epoch_5.csv")
        );
        assert_eq!(
            layout.checkpoint_path("seg_epoch_5", "net0"),
            PathBuf::from("/data/checkpoint/seg_epoch_5-net0.pth")
        );
        assert_eq!(layout.speed_path(), PathBuf::from("/data/logs/speed.csv"));
    }

    #[test]
    fn ensure_creates_dirs_once_and_is_repeatable() {
        let temp = TempDir::new().unwrap();
        let layout = StorageLayout::new(temp.path());
        layout.ensure().unwrap();
        layout.ensure().unwrap();
        assert!(layout.raw_dir().is_dir());
        assert!(layout.curve_dir().is_dir());
        assert!(layout.checkpoint_dir().is_dir());
    }
}
