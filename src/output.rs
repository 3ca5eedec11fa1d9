//! Output file layout and artifact bookkeeping.
//!
//! Each scene category (the base and every variant) has its own image,
//! scene and blend directories plus an aggregate dataset file. Files
//! written while an index is being attempted are tracked by
//! `PendingArtifacts` and removed again unless the attempt is accepted.

use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::{GenError, GenResult};
use crate::types::{CategoryOutput, Dataset, DatasetInfo, SceneRecord};

/// File locations of one scene.
#[derive(Debug, Clone, PartialEq)]
pub struct ScenePaths {
    /// Image file name as recorded in the scene JSON.
    pub image_filename: String,
    pub image: PathBuf,
    pub scene: PathBuf,
    pub blend: Option<PathBuf>,
}

/// Naming convention for one scene category.
#[derive(Debug, Clone, Copy)]
pub struct OutputLayout<'a> {
    pub prefix: &'a str,
    pub category: &'a CategoryOutput,
    pub save_blendfiles: bool,
}

impl<'a> OutputLayout<'a> {
    pub fn new(prefix: &'a str, category: &'a CategoryOutput, save_blendfiles: bool) -> Self {
        OutputLayout {
            prefix,
            category,
            save_blendfiles,
        }
    }

    /// `<prefix>_<split>_<index:06>`.
    pub fn stem(&self, index: u32) -> String {
        format!("{}_{}_{:06}", self.prefix, self.category.split, index)
    }

    pub fn paths(&self, index: u32) -> ScenePaths {
        let stem = self.stem(index);
        let image_filename = format!("{stem}.png");
        ScenePaths {
            image: self.category.image_dir.join(&image_filename),
            scene: self.category.scene_dir.join(format!("{stem}.json")),
            blend: self
                .save_blendfiles
                .then(|| self.category.blend_dir.join(format!("{stem}.blend"))),
            image_filename,
        }
    }

    /// Create the category's output directories.
    pub fn prepare(&self) -> GenResult<()> {
        let mut dirs = vec![&self.category.image_dir, &self.category.scene_dir];
        if self.save_blendfiles {
            dirs.push(&self.category.blend_dir);
        }
        if let Some(parent) = self.category.scene_file.parent() {
            if !parent.as_os_str().is_empty() {
                create_dir(parent)?;
            }
        }
        for dir in dirs {
            create_dir(dir)?;
        }
        Ok(())
    }
}

fn create_dir(dir: &Path) -> GenResult<()> {
    std::fs::create_dir_all(dir).map_err(|e| GenError::io(dir, e))
}

/// Files produced during one index attempt.
///
/// Dropping without `commit` deletes every tracked file.
#[derive(Debug, Default)]
pub struct PendingArtifacts {
    paths: Vec<PathBuf>,
    committed: bool,
}

impl PendingArtifacts {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn track(&mut self, path: impl Into<PathBuf>) {
        self.paths.push(path.into());
    }

    /// Keep every tracked file.
    pub fn commit(mut self) -> Vec<PathBuf> {
        self.committed = true;
        std::mem::take(&mut self.paths)
    }

    /// Delete every tracked file that exists.
    pub fn discard(&mut self) {
        for path in self.paths.drain(..) {
            match std::fs::remove_file(&path) {
                Ok(()) => debug!(path = %path.display(), "removed rejected artifact"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!(path = %path.display(), error = %e, "failed to remove artifact"),
            }
        }
    }
}

impl Drop for PendingArtifacts {
    fn drop(&mut self) {
        if !self.committed {
            self.discard();
        }
    }
}

/// Pretty-printed JSON, written to a `.tmp` sibling and renamed into place.
pub fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> GenResult<()> {
    let json = serde_json::to_string_pretty(value)?;
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, json).map_err(|e| GenError::io(&tmp, e))?;
    std::fs::rename(&tmp, path).map_err(|e| GenError::io(path, e))
}

pub fn write_scene(path: &Path, record: &SceneRecord) -> GenResult<()> {
    write_json(path, record)
}

/// Write the aggregate file of one category.
pub fn write_dataset(path: &Path, info: DatasetInfo, scenes: Vec<SceneRecord>) -> GenResult<()> {
    let count = scenes.len();
    write_json(path, &Dataset { info, scenes })?;
    info!(path = %path.display(), scenes = count, "wrote dataset file");
    Ok(())
}

pub fn read_dataset(path: &Path) -> GenResult<Dataset> {
    let text = std::fs::read_to_string(path).map_err(|e| GenError::io(path, e))?;
    Ok(serde_json::from_str(&text)?)
}
