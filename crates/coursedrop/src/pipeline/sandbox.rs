//! Per-job staging directory.

use std::io;
use std::path::{Path, PathBuf};

/// `<staging_dir>/Task_{job_id}`, the fetcher's only write target.
#[derive(Debug, Clone)]
pub struct Sandbox {
    path: PathBuf,
}

impl Sandbox {
    pub fn path_for(staging_dir: &Path, job_id: i64) -> PathBuf {
        staging_dir.join(format!("Task_{}", job_id))
    }

    /// Creates the directory if missing. Existing content from an earlier
    /// delivery is kept so the fetcher can resume.
    pub fn create(staging_dir: &Path, job_id: i64) -> io::Result<Self> {
        let path = Self::path_for(staging_dir, job_id);
        std::fs::create_dir_all(&path)?;
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.is_dir()
    }

    /// First subdirectory by name, which the fetcher creates per course.
    pub fn find_output_dir(&self) -> io::Result<Option<PathBuf>> {
        let mut dirs = Vec::new();
        for entry in std::fs::read_dir(&self.path)? {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                dirs.push(entry.path());
            }
        }
        dirs.sort();
        Ok(dirs.into_iter().next())
    }

    pub fn remove(&self) -> io::Result<()> {
        match std::fs::remove_dir_all(&self.path) {
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            other => other,
        }
    }
}
