//! Visit discovery for the cadence generator.
//!
//! Visits arrive either as a newline-delimited directory list file or by
//! scanning named subset directories under a fixed repository root. Each
//! visit directory holds two exposure subdirectories, `0` and `1`.

use std::path::{Path, PathBuf};

/// Subset names recognized by the scan source.
pub const DEFAULT_SUBSETS: [&str; 4] = ["D1", "D2", "D3", "D4"];

/// Shorthand expanding to every default subset.
pub const ALL_SUBSETS: &str = "ALL";

/// Errors that can occur during visit discovery.
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// Input/output operation failed.
    #[error("IO operation failed on path {path}: {source}")]
    IO {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// Invalid exposure file pattern.
    #[error("Invalid file pattern: {source}")]
    Pattern {
        #[source]
        source: glob::PatternError,
    },
}

/// One visit: a directory whose name is the visit identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VisitRecord {
    pub visit_id: String,
    pub dir: PathBuf,
}

impl VisitRecord {
    fn from_dir(dir: PathBuf) -> Self {
        let visit_id = dir
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| dir.to_string_lossy().into_owned());
        VisitRecord { visit_id, dir }
    }
}

/// Reads visit directories from a list file.
///
/// One directory per line; blank lines and lines starting with `#` are
/// skipped. The directory basename is taken as the visit id.
pub fn from_list_file(path: &Path) -> Result<Vec<VisitRecord>, Error> {
    let contents = std::fs::read_to_string(path).map_err(|source| Error::IO {
        path: path.to_path_buf(),
        source,
    })?;

    Ok(contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(|line| VisitRecord::from_dir(PathBuf::from(line)))
        .collect())
}

/// Scans named subset directories under `root` for visit directories.
///
/// `ALL` (case-insensitive) anywhere in `subsets` expands to the default
/// subset list. Visits within a subset are returned in name order.
pub fn from_subsets(root: &Path, subsets: &[String]) -> Result<Vec<VisitRecord>, Error> {
    let subsets: Vec<String> = if subsets.iter().any(|s| s.eq_ignore_ascii_case(ALL_SUBSETS)) {
        DEFAULT_SUBSETS.iter().map(|s| s.to_string()).collect()
    } else {
        subsets.to_vec()
    };

    let mut visits = Vec::new();
    for subset in &subsets {
        let subset_dir = root.join(subset);
        let entries = std::fs::read_dir(&subset_dir).map_err(|source| Error::IO {
            path: subset_dir.clone(),
            source,
        })?;

        let mut found: Vec<PathBuf> = entries
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|path| path.is_dir())
            .collect();
        found.sort();
        visits.extend(found.into_iter().map(VisitRecord::from_dir));
    }
    Ok(visits)
}

/// Lists the matching files in the visit's `0` and `1` exposure
/// subdirectories, each sorted by name.
pub fn exposure_files(
    dir: &Path,
    pattern: &str,
) -> Result<(Vec<PathBuf>, Vec<PathBuf>), Error> {
    let list = |exposure: &str| -> Result<Vec<PathBuf>, Error> {
        let full_pattern = dir.join(exposure).join(pattern);
        let mut files: Vec<PathBuf> = glob::glob(&full_pattern.to_string_lossy())
            .map_err(|source| Error::Pattern { source })?
            .filter_map(Result::ok)
            .collect();
        files.sort();
        Ok(files)
    };

    Ok((list("0")?, list("1")?))
}
