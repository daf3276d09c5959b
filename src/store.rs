//! Artifact store for one run's dataset.
//!
//! Layout under the output base directory:
//!
//! ```text
//! <base>/<YYYY-MM-DD_HH-MM-SS>/
//!     step_000.png
//!     step_000.json
//!     ...
//!     task_metadata.json
//!     tutorial.md          (absent if narrative generation failed)
//! ```
//!
//! Steps are written as they are produced, so an interrupted run still
//! leaves a valid partial dataset.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use thiserror::Error;
use tracing::{debug, info};

use crate::capture::render_placeholder;
use crate::model::{Step, TaskRun};

pub const METADATA_FILE: &str = "task_metadata.json";
pub const TUTORIAL_FILE: &str = "tutorial.md";

pub type PersistenceResult<T> = Result<T, PersistenceError>;

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("Failed to create run directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to serialize {path}: {source}")]
    Serialize {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to render placeholder screenshot {path}: {message}")]
    Render { path: PathBuf, message: String },
}

/// Writes the artifacts of a single run
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    dir: PathBuf,
}

impl ArtifactStore {
    /// Create the run directory, keyed by the run's start time
    pub fn create(base_dir: &Path, start_time: DateTime<Utc>) -> PersistenceResult<Self> {
        fs::create_dir_all(base_dir).map_err(|source| PersistenceError::CreateDir {
            path: base_dir.to_path_buf(),
            source,
        })?;

        let stamp = run_stamp(start_time);
        let mut dir = base_dir.join(&stamp);
        let mut suffix = 1;
        // Never share a directory with an earlier run
        while dir.exists() {
            dir = base_dir.join(format!("{}_{}", stamp, suffix));
            suffix += 1;
        }

        fs::create_dir(&dir).map_err(|source| PersistenceError::CreateDir {
            path: dir.clone(),
            source,
        })?;
        info!(dir = %dir.display(), "created run directory");
        Ok(Self { dir })
    }

    /// Directory a run started at `start_time` gets when no earlier run
    /// holds that name
    pub fn run_dir(base_dir: &Path, start_time: DateTime<Utc>) -> PathBuf {
        base_dir.join(run_stamp(start_time))
    }

    /// Use an existing directory as-is
    pub fn in_dir(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Screenshot path for a step, relative to the run directory
    pub fn screenshot_name(step_index: usize) -> PathBuf {
        PathBuf::from(format!("step_{:03}.png", step_index))
    }

    pub fn step_json_path(&self, step_index: usize) -> PathBuf {
        self.dir.join(format!("step_{:03}.json", step_index))
    }

    pub fn metadata_path(&self) -> PathBuf {
        self.dir.join(METADATA_FILE)
    }

    pub fn tutorial_path(&self) -> PathBuf {
        self.dir.join(TUTORIAL_FILE)
    }

    /// Write a step's screenshot and JSON record.
    ///
    /// A missing screenshot is replaced by a rendered placeholder so the
    /// dataset layout stays uniform. A step is either fully written or
    /// leaves no files behind.
    pub fn write_step(&self, step: &Step, screenshot: Option<&[u8]>) -> PersistenceResult<()> {
        let image_path = self.dir.join(&step.screenshot_path);
        let rendered;
        let image: &[u8] = match screenshot {
            Some(png) => png,
            None => {
                rendered = render_placeholder(&step.url, &step.state_description).map_err(|e| {
                    PersistenceError::Render {
                        path: image_path.clone(),
                        message: e.to_string(),
                    }
                })?;
                &rendered
            }
        };
        write_file(&image_path, image)?;
        if let Err(e) = write_json(&self.step_json_path(step.step_index), step) {
            let _ = fs::remove_file(&image_path);
            return Err(e);
        }
        debug!(step = step.step_index, "step written");
        Ok(())
    }

    pub fn write_metadata(&self, run: &TaskRun) -> PersistenceResult<PathBuf> {
        let path = self.metadata_path();
        write_json(&path, run)?;
        Ok(path)
    }

    pub fn write_tutorial(&self, markdown: &str) -> PersistenceResult<PathBuf> {
        let path = self.tutorial_path();
        write_file(&path, markdown.as_bytes())?;
        Ok(path)
    }

    /// Read back every step JSON in index order
    pub fn load_steps(&self) -> PersistenceResult<Vec<Step>> {
        let mut steps = Vec::new();
        let entries = fs::read_dir(&self.dir).map_err(|source| PersistenceError::Read {
            path: self.dir.clone(),
            source,
        })?;
        for entry in entries.flatten() {
            let path = entry.path();
            let is_step = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with("step_") && n.ends_with(".json"));
            if !is_step {
                continue;
            }
            let data = fs::read_to_string(&path).map_err(|source| PersistenceError::Read {
                path: path.clone(),
                source,
            })?;
            let step: Step = serde_json::from_str(&data)
                .map_err(|source| PersistenceError::Serialize { path, source })?;
            steps.push(step);
        }
        steps.sort_by_key(|s| s.step_index);
        Ok(steps)
    }
}

fn run_stamp(start_time: DateTime<Utc>) -> String {
    start_time.format("%Y-%m-%d_%H-%M-%S").to_string()
}

fn write_file(path: &Path, data: &[u8]) -> PersistenceResult<()> {
    fs::write(path, data).map_err(|source| PersistenceError::Write {
        path: path.to_path_buf(),
        source,
    })
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> PersistenceResult<()> {
    let json = serde_json::to_string_pretty(value).map_err(|source| PersistenceError::Serialize {
        path: path.to_path_buf(),
        source,
    })?;
    write_file(path, json.as_bytes())
}

/// List all run directories under the base directory
pub fn list_runs(base_dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    if !base_dir.exists() {
        return Ok(Vec::new());
    }

    let mut runs = Vec::new();
    for entry in fs::read_dir(base_dir)? {
        let path = entry?.path();
        if path.is_dir() && path.join(METADATA_FILE).exists() {
            runs.push(path);
        }
    }
    runs.sort();
    Ok(runs)
}

/// Remove run directories older than `max_age`, returning how many went
pub fn cleanup_old_runs(base_dir: &Path, max_age: Duration) -> std::io::Result<usize> {
    let now = SystemTime::now();
    let mut cleaned = 0;

    for path in list_runs(base_dir)? {
        let Ok(modified) = fs::metadata(&path).and_then(|m| m.modified()) else {
            continue;
        };
        let Ok(age) = now.duration_since(modified) else {
            continue;
        };
        if age > max_age && fs::remove_dir_all(&path).is_ok() {
            cleaned += 1;
        }
    }

    Ok(cleaned)
}
