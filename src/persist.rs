//! Durable storage of the committed tree
//!
//! The control plane loads the tree once on start and saves it after every
//! commit. [`JsonFilePersistence`] writes the whole tree as JSON to a sibling
//! temporary file and renames it over the target, so a crash mid-write
//! leaves the previous tree in place.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::debug;

use crate::meta::App;

#[derive(Error, Debug)]
pub enum PersistError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("corrupt tree state: {0}")]
    Json(#[from] serde_json::Error),
}

/// Storage for the committed tree
pub trait Persistence: Send + Sync {
    /// Stored tree, or `None` if nothing was saved yet
    fn load(&self) -> Result<Option<App>, PersistError>;

    fn save(&self, root: &App) -> Result<(), PersistError>;
}

/// Tree stored as one JSON document
#[derive(Debug, Clone)]
pub struct JsonFilePersistence {
    path: PathBuf,
}

impl JsonFilePersistence {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self.path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl Persistence for JsonFilePersistence {
    fn load(&self) -> Result<Option<App>, PersistError> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let root = serde_json::from_slice(&bytes)?;
        debug!(path = %self.path.display(), "tree loaded");
        Ok(Some(root))
    }

    fn save(&self, root: &App) -> Result<(), PersistError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let bytes = serde_json::to_vec_pretty(root)?;
        let temp = self.temp_path();
        {
            let mut file = fs::File::create(&temp)?;
            file.write_all(&bytes)?;
            file.sync_all()?;
        }
        fs::rename(&temp, &self.path)?;
        debug!(path = %self.path.display(), bytes = bytes.len(), "tree saved");
        Ok(())
    }
}
