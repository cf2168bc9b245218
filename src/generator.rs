//! Deterministic fixture trees for stress-testing file watchers.
//!
//! A tree shape is a list of fan-outs, one per nesting level. Every leaf
//! directory receives [`FILES_PER_LEAF`] empty files, so the shape
//! `[30, 10, 10, 3]` yields 180000 files laid out as
//! `base/dir00/dir00/dir00/dir00/file00.txt` onwards.

use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use log::{debug, trace};
use walkdir::WalkDir;

use crate::fs::create_empty_file;

pub const FILES_PER_LEAF: usize = 20;

pub const DEFAULT_FANOUTS: [usize; 4] = [30, 10, 10, 3];

#[derive(Debug)]
pub struct GenerateError {
    pub path: PathBuf,
    pub source: io::Error,
}

impl GenerateError {
    fn new(path: &Path, source: io::Error) -> Self {
        Self {
            path: path.to_path_buf(),
            source,
        }
    }
}

impl fmt::Display for GenerateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "failed to create {}: {}", self.path.display(), self.source)
    }
}

impl std::error::Error for GenerateError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.source)
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TreeSummary {
    pub files: u64,
    pub dirs: u64,
}

pub fn dir_name(index: usize) -> String {
    format!("dir{index:02}")
}

pub fn file_name(index: usize) -> String {
    format!("file{index:02}.txt")
}

pub fn expected_file_count(fanouts: &[usize]) -> usize {
    fanouts
        .iter()
        .fold(FILES_PER_LEAF, |total, &fanout| total.saturating_mul(fanout))
}

/// Materializes the tree described by `fanouts` under `base` and returns the
/// created file paths in naming order.
///
/// The first failing step aborts the run. Entries created before the failure
/// are left in place.
pub fn generate(base: &Path, fanouts: &[usize]) -> Result<Vec<PathBuf>, GenerateError> {
    let mut files = Vec::new();
    generate_into(base, fanouts, &mut files)?;
    Ok(files)
}

fn generate_into(
    base: &Path,
    fanouts: &[usize],
    files: &mut Vec<PathBuf>,
) -> Result<(), GenerateError> {
    let Some((&fanout, rest)) = fanouts.split_first() else {
        return populate_leaf(base, files);
    };

    for index in 0..fanout {
        generate_into(&base.join(dir_name(index)), rest, files)?;
    }
    Ok(())
}

fn populate_leaf(dir: &Path, files: &mut Vec<PathBuf>) -> Result<(), GenerateError> {
    fs::create_dir_all(dir).map_err(|err| GenerateError::new(dir, err))?;
    debug!("fixture leaf {}", dir.display());

    for index in 0..FILES_PER_LEAF {
        let path = dir.join(file_name(index));
        create_empty_file(&path).map_err(|err| GenerateError::new(&path, err))?;
        trace!("fixture file {}", path.display());
        files.push(path);
    }
    Ok(())
}

/// Counts the files and directories below `base`, excluding `base` itself.
pub fn summarize(base: &Path) -> Result<TreeSummary, GenerateError> {
    let mut summary = TreeSummary::default();
    for entry in WalkDir::new(base).min_depth(1) {
        let entry = entry.map_err(|err| {
            let path = err.path().unwrap_or(base).to_path_buf();
            GenerateError::new(&path, io::Error::other(err))
        })?;
        if entry.file_type().is_dir() {
            summary.dirs += 1;
        } else {
            summary.files += 1;
        }
    }
    Ok(summary)
}

/// Parses a comma separated fan-out list such as `30,10,10,3`.
pub fn parse_fanouts(raw: &str) -> Result<Vec<usize>, String> {
    raw.split(',')
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .map(|token| {
            token
                .parse::<usize>()
                .map_err(|err| format!("invalid fan-out '{token}': {err}"))
        })
        .collect()
}
