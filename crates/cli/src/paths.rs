//! Data directory resolution.
//!
//! Resolved once at startup from: `--data-dir` > `SWITCHYARD_DATA_DIR` env > `~/.switchyard`.

use std::io;
use std::path::{Path, PathBuf};

use anyhow::Context;

pub const DATA_DIR_ENV: &str = "SWITCHYARD_DATA_DIR";

#[derive(Debug, Clone)]
pub struct DataDir {
    root: PathBuf,
}

impl DataDir {
    /// Priority: `explicit` arg > `SWITCHYARD_DATA_DIR` env > `~/.switchyard`.
    pub fn resolve(explicit: Option<&Path>) -> anyhow::Result<Self> {
        let root = if let Some(p) = explicit {
            p.to_path_buf()
        } else if let Ok(env_val) = std::env::var(DATA_DIR_ENV) {
            PathBuf::from(env_val)
        } else {
            dirs::home_dir()
                .context("HOME directory not found")?
                .join(".switchyard")
        };
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn db_path(&self) -> PathBuf {
        self.root.join("switchyard.db")
    }

    pub fn log_dir(&self) -> PathBuf {
        self.root.join("logs")
    }

    /// Create all required subdirectories under the data dir.
    pub fn ensure_dirs(&self) -> io::Result<()> {
        std::fs::create_dir_all(&self.root)?;
        std::fs::create_dir_all(self.log_dir())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_dir_wins() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = DataDir::resolve(Some(tmp.path())).unwrap();
        assert_eq!(dir.root(), tmp.path());
        assert_eq!(dir.db_path(), tmp.path().join("switchyard.db"));
        assert_eq!(dir.log_dir(), tmp.path().join("logs"));
    }

    #[test]
    fn ensure_dirs_creates_tree() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = DataDir::resolve(Some(&tmp.path().join("nested"))).unwrap();
        dir.ensure_dirs().unwrap();
        assert!(dir.log_dir().is_dir());
    }
}
