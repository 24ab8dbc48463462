//! File catalog - the read-only name -> path mapping offered to the device.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Why a path cannot be offered for transfer.
#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("File does not exist")]
    NotFound,
    #[error("Not a file")]
    NotAFile,
    #[error("File is empty")]
    Empty,
    #[error("{0}")]
    Io(#[from] std::io::Error),
}

/// Accept only existing, non-empty regular files. Returns the file size.
pub fn validate_file(path: &Path) -> Result<u64, ValidationError> {
    let metadata = match std::fs::metadata(path) {
        Ok(m) => m,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(ValidationError::NotFound);
        }
        Err(e) => return Err(e.into()),
    };
    if !metadata.is_file() {
        return Err(ValidationError::NotAFile);
    }
    if metadata.len() == 0 {
        return Err(ValidationError::Empty);
    }
    Ok(metadata.len())
}

/// Case-insensitive extension allow-list, e.g. `"nsp,xci"`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtensionFilter {
    extensions: HashSet<String>,
}

impl ExtensionFilter {
    pub fn parse(list: &str) -> Self {
        Self {
            extensions: list
                .split(',')
                .map(|e| e.trim().trim_start_matches('.').to_lowercase())
                .filter(|e| !e.is_empty())
                .collect(),
        }
    }

    pub fn matches(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| self.extensions.contains(&e.to_lowercase()))
    }
}

/// Read-only mapping from advertised name to absolute local path.
///
/// Names iterate in lexicographic order.
#[derive(Debug, Clone, Default)]
pub struct FileCatalog {
    entries: BTreeMap<String, PathBuf>,
}

impl FileCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an entry, returning the path it replaced, if any.
    pub fn insert(&mut self, name: impl Into<String>, path: impl Into<PathBuf>) -> Option<PathBuf> {
        self.entries.insert(name.into(), path.into())
    }

    pub fn get(&self, name: &str) -> Option<&Path> {
        self.entries.get(name).map(PathBuf::as_path)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Sorted names, one per line, each newline-terminated.
    pub fn listing(&self) -> String {
        self.names().fold(String::new(), |mut acc, name| {
            acc.push_str(name);
            acc.push('\n');
            acc
        })
    }
}

impl<N: Into<String>, P: Into<PathBuf>> FromIterator<(N, P)> for FileCatalog {
    fn from_iter<I: IntoIterator<Item = (N, P)>>(iter: I) -> Self {
        let mut catalog = Self::new();
        for (name, path) in iter {
            catalog.insert(name, path);
        }
        catalog
    }
}

/// Builds a [`FileCatalog`] from user-supplied files and directories.
#[derive(Debug, Default)]
pub struct CatalogBuilder {
    filter: Option<ExtensionFilter>,
    catalog: FileCatalog,
}

impl CatalogBuilder {
    pub fn new(filter: Option<ExtensionFilter>) -> Self {
        Self {
            filter,
            catalog: FileCatalog::new(),
        }
    }

    /// Add a file, or every file below a directory.
    pub fn add_path(&mut self, path: &Path) -> &mut Self {
        if path.is_file() {
            self.add_file(path, "Added file");
        } else if path.is_dir() {
            for entry in WalkDir::new(path).follow_links(true) {
                match entry {
                    Ok(entry) if entry.file_type().is_file() => {
                        self.add_file(entry.path(), "Added file from directory");
                    }
                    Ok(_) => {}
                    Err(e) => warn!(error = %e, "Skipping unreadable entry"),
                }
            }
        } else {
            warn!(path = %path.display(), "Not a valid file or directory");
        }
        self
    }

    fn add_file(&mut self, path: &Path, message: &str) {
        let Some(name) = path.file_name().map(|n| n.to_string_lossy().into_owned()) else {
            return;
        };

        if let Some(filter) = &self.filter
            && !filter.matches(path)
        {
            debug!(name = %name, "Skipping - extension not in filter");
            return;
        }

        if let Err(e) = validate_file(path) {
            warn!(name = %name, reason = %e, "Skipping file");
            return;
        }

        let resolved = match path.canonicalize() {
            Ok(p) => p,
            Err(e) => {
                warn!(name = %name, reason = %e, "Skipping file");
                return;
            }
        };

        if let Some(previous) = self.catalog.insert(name.clone(), resolved) {
            warn!(
                name = %name,
                replaced = %previous.display(),
                "Duplicate file name, keeping the later path"
            );
        }
        info!(name = %name, "{}", message);
    }

    pub fn build(self) -> FileCatalog {
        self.catalog
    }
}
