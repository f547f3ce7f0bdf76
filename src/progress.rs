use std::collections::HashSet;
use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;

/// Durable set of product names that have been fully processed. Loaded once
/// at startup; every `mark_done` appends a line and syncs so an interrupted
/// run loses at most the product in flight.
///
/// Any failure here is fatal to the run: if the resume gate cannot be
/// trusted, continuing would either duplicate or silently drop products.
#[derive(Debug)]
pub struct ProgressStore {
    path: PathBuf,
    done: HashSet<String>,
}

#[derive(Debug, Error)]
pub enum ProgressError {
    #[error("progress file {path} is unreadable: {source}")]
    Unreadable {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("progress file {path} is corrupt (not valid UTF-8)")]
    Corrupt { path: PathBuf },
    #[error("could not record `{name}` as done: {source}")]
    Write {
        name: String,
        source: std::io::Error,
    },
}

impl ProgressStore {
    /// A missing file means a fresh run; an unreadable or non-UTF-8 file is
    /// an error, never an empty set.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ProgressError> {
        let path = path.as_ref().to_path_buf();
        let mut raw = Vec::new();
        match File::open(&path) {
            Ok(mut file) => {
                file.read_to_end(&mut raw)
                    .map_err(|source| ProgressError::Unreadable {
                        path: path.clone(),
                        source,
                    })?;
            }
            Err(err) if err.kind() == ErrorKind::NotFound => {
                return Ok(Self {
                    path,
                    done: HashSet::new(),
                });
            }
            Err(source) => return Err(ProgressError::Unreadable { path, source }),
        }

        let text =
            String::from_utf8(raw).map_err(|_| ProgressError::Corrupt { path: path.clone() })?;
        let done: HashSet<String> = text
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect();
        info!(
            target = "catalogr.progress",
            path = %path.display(),
            entries = done.len(),
            "progress store loaded",
        );
        Ok(Self { path, done })
    }

    pub fn is_done(&self, name: &str) -> bool {
        self.done.contains(name.trim())
    }

    pub fn len(&self) -> usize {
        self.done.len()
    }

    pub fn is_empty(&self) -> bool {
        self.done.is_empty()
    }

    /// Sorted snapshot of every name marked done.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.done.iter().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Appends the name and flushes to disk. Re-marking a name is a no-op so
    /// the file never accumulates duplicate lines.
    pub fn mark_done(&mut self, name: &str) -> Result<(), ProgressError> {
        let name = name.trim();
        if self.done.contains(name) {
            return Ok(());
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|source| ProgressError::Write {
                name: name.to_string(),
                source,
            })?;
        writeln!(file, "{name}").map_err(|source| ProgressError::Write {
            name: name.to_string(),
            source,
        })?;
        file.sync_all().map_err(|source| ProgressError::Write {
            name: name.to_string(),
            source,
        })?;
        self.done.insert(name.to_string());
        Ok(())
    }
}
