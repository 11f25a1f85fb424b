//! Project Paths Module
//! Named filesystem locations of an analysis project, built once at startup and passed along.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Standard directory layout of an exploratory analysis project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectPaths {
    pub root: PathBuf,
    pub data_dir: PathBuf,
    pub raw_data_dir: PathBuf,
    pub processed_data_dir: PathBuf,
    pub src_dir: PathBuf,
    pub visualizations_dir: PathBuf,
    pub notebooks_dir: PathBuf,
}

impl ProjectPaths {
    /// Layout rooted at `root`. Nothing is created on disk.
    pub fn from_root(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let data_dir = root.join("data");
        Self {
            raw_data_dir: data_dir.join("raw"),
            processed_data_dir: data_dir.join("processed"),
            src_dir: root.join("src"),
            visualizations_dir: root.join("visualizations"),
            notebooks_dir: root.join("notebooks"),
            data_dir,
            root,
        }
    }
}
