//! Table Naming Module
//! Derives one table name per discovered file, from a prefix/suffix scheme or the file stem.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum NamingError {
    #[error("Table name prefix must not be empty")]
    EmptyPrefix,
    #[error("Naming scheme yields duplicate table name '{0}'")]
    DuplicateName(String),
    #[error("Cannot derive a table name from {0}")]
    UnnamedFile(PathBuf),
}

/// How table names are derived from files.
///
/// With a prefix, names are `<prefix>_<suffix>`. Suffixes come from the supplied list,
/// extended as `<last>_1`, `<last>_2`, ... when there are more files than suffixes, or
/// are the 0-based file index when no list is given. Without a prefix, the file stem is used.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NamingScheme {
    prefix: Option<String>,
    suffixes: Option<Vec<String>>,
}

impl NamingScheme {
    pub fn new(prefix: Option<String>, suffixes: Option<Vec<String>>) -> Self {
        Self { prefix, suffixes }
    }

    /// Suffixes applied to `count` files when a prefix is set.
    pub fn effective_suffixes(&self, count: usize) -> Vec<String> {
        match self.suffixes.as_deref() {
            Some(suffixes) if !suffixes.is_empty() => extend_suffixes(suffixes, count),
            _ => (0..count).map(|index| index.to_string()).collect(),
        }
    }

    /// Table names for `files`, in the same order.
    pub fn table_names(&self, files: &[PathBuf]) -> Result<Vec<String>, NamingError> {
        let names = match self.prefix.as_deref() {
            Some("") => return Err(NamingError::EmptyPrefix),
            Some(prefix) => self
                .effective_suffixes(files.len())
                .iter()
                .map(|suffix| format!("{prefix}_{suffix}"))
                .collect(),
            None => files
                .iter()
                .map(|file| file_stem(file))
                .collect::<Result<Vec<_>, _>>()?,
        };

        let mut seen = HashSet::with_capacity(names.len());
        for name in &names {
            if !seen.insert(name.as_str()) {
                return Err(NamingError::DuplicateName(name.clone()));
            }
        }
        Ok(names)
    }
}

/// Pad or cut `suffixes` to exactly `count` entries.
pub fn extend_suffixes(suffixes: &[String], count: usize) -> Vec<String> {
    let mut extended: Vec<String> = suffixes.iter().take(count).cloned().collect();
    if let Some(last) = suffixes.last() {
        for i in 1..=count.saturating_sub(suffixes.len()) {
            extended.push(format!("{last}_{i}"));
        }
    }
    extended
}

fn file_stem(path: &Path) -> Result<String, NamingError> {
    path.file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .ok_or_else(|| NamingError::UnnamedFile(path.to_path_buf()))
}
