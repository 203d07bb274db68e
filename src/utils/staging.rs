// src/utils/staging.rs: per-stage temporary directories for one run

use std::fs;
use std::path::{Path, PathBuf};

use log::{info, warn};

use crate::config::defs::{PipelineError, Stage};
use crate::utils::file::move_dir;


/// One run-scoped root holding a sibling directory per stage.
///
/// The tree is disposed exactly once: moved into the output location, deleted, or
/// persisted for inspection. A tree dropped without disposal stays on disk.
#[derive(Debug)]
pub struct StagingTree {
    root: PathBuf,
    dirs: Vec<(Stage, PathBuf)>,
    disposed: bool,
}

impl StagingTree {
    /// Creates a fresh `rqc_XXXXXX` root under `parent`.
    pub fn create(parent: &Path) -> Result<Self, PipelineError> {
        let root = tempfile::Builder::new()
            .prefix("rqc_")
            .tempdir_in(parent)
            .map_err(|e| PipelineError::directory(parent, e))?
            .keep();
        info!("Created staging directory {}", root.display());
        Ok(StagingTree {
            root,
            dirs: Vec::new(),
            disposed: false,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Returns the stage's directory, creating it on first use only.
    pub fn create_stage_dir(&mut self, stage: Stage) -> Result<PathBuf, PipelineError> {
        if let Some(dir) = self.stage_dir(stage) {
            return Ok(dir.to_path_buf());
        }
        let dir = self.root.join(stage.name());
        info!("Creating temporary directory: {}", dir.display());
        fs::create_dir(&dir).map_err(|e| PipelineError::directory(&dir, e))?;
        self.dirs.push((stage, dir.clone()));
        Ok(dir)
    }

    pub fn stage_dir(&self, stage: Stage) -> Option<&Path> {
        self.dirs
            .iter()
            .find(|(s, _)| *s == stage)
            .map(|(_, dir)| dir.as_path())
    }

    /// Moves the whole tree to `dest` and returns the new root.
    pub fn retain_into(mut self, dest: &Path) -> Result<PathBuf, PipelineError> {
        move_dir(&self.root, dest).map_err(|e| PipelineError::directory(dest, e))?;
        self.disposed = true;
        info!("Moved staging directory to {}", dest.display());
        Ok(dest.to_path_buf())
    }

    pub fn discard(mut self) -> Result<(), PipelineError> {
        fs::remove_dir_all(&self.root).map_err(|e| PipelineError::directory(&self.root, e))?;
        self.disposed = true;
        Ok(())
    }

    /// Leaves the tree where it is and hands back its location.
    pub fn persist(mut self) -> PathBuf {
        self.disposed = true;
        self.root.clone()
    }
}

impl Drop for StagingTree {
    fn drop(&mut self) {
        if !self.disposed {
            warn!("Staging directory left in place at {}", self.root.display());
        }
    }
}
