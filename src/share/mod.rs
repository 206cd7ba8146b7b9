//! Share index: the files and folders this client offers to the overlay.
//!
//! Entries carry content-derived ids (a hash over name and size for files,
//! over the path for folders) so peers can re-find a file across sessions
//! without learning its local path. The index is rebuilt by [`rescan`]
//! (run on the maintenance thread, never the command path) and read through
//! short-lived lock snapshots by browse and search.
//!
//! [`rescan`]: ShareIndex::rescan

pub mod filter;

pub use filter::FileFilter;

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{info, warn};

use crate::protocol::{FileSummary, FolderSummary};

/// Errors from index lookups.
#[derive(Debug, Error)]
pub enum ShareError {
    #[error("Unknown folder id: {0}")]
    UnknownFolder(String),
}

/// A shared file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    pub id: String,
    pub name: String,
    pub path: PathBuf,
    pub size: u64,
}

impl FileEntry {
    pub fn summary(&self) -> FileSummary {
        FileSummary {
            id: self.id.clone(),
            name: self.name.clone(),
            size: self.size,
        }
    }
}

/// A shared folder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FolderEntry {
    pub id: String,
    pub name: String,
    pub path: PathBuf,
}

impl FolderEntry {
    pub fn summary(&self) -> FolderSummary {
        FolderSummary {
            id: self.id.clone(),
            name: self.name.clone(),
        }
    }
}

/// Content-derived file id: lowercase hex SHA-256 over name and size.
pub fn file_id(name: &str, size: u64) -> String {
    let mut hasher = Sha256::new();
    hasher.update(name.as_bytes());
    hasher.update(size.to_le_bytes());
    hex::encode(hasher.finalize())
}

/// Folder id over the path string.
pub fn folder_id(path: &Path) -> String {
    hex::encode(Sha256::digest(path.to_string_lossy().as_bytes()))
}

#[derive(Debug, Default, Clone)]
struct Children {
    folders: Vec<String>,
    files: Vec<String>,
}

#[derive(Debug, Default)]
struct Tables {
    files: HashMap<String, Arc<FileEntry>>,
    folders: HashMap<String, Arc<FolderEntry>>,
    children: HashMap<String, Children>,
    roots: Children,
}

impl Tables {
    fn children_mut(&mut self, parent: Option<&str>) -> &mut Children {
        match parent {
            Some(id) => self.children.entry(id.to_string()).or_default(),
            None => &mut self.roots,
        }
    }
}

/// Concurrently readable index of everything shared.
#[derive(Debug, Default)]
pub struct ShareIndex {
    shared: RwLock<Vec<PathBuf>>,
    tables: RwLock<Tables>,
}

impl ShareIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a path as shared; visible after the next [`rescan`].
    ///
    /// [`rescan`]: ShareIndex::rescan
    pub fn share(&self, path: impl Into<PathBuf>) {
        let path = path.into();
        let mut shared = self.shared.write().unwrap_or_else(|e| e.into_inner());
        if !shared.contains(&path) {
            shared.push(path);
        }
    }

    /// Unregisters a path; its entries disappear on the next rescan.
    /// Returns false when the path was not shared.
    pub fn unshare(&self, path: &Path) -> bool {
        let mut shared = self.shared.write().unwrap_or_else(|e| e.into_inner());
        let before = shared.len();
        shared.retain(|p| p != path);
        shared.len() != before
    }

    /// Snapshot of the configured share roots.
    pub fn shared(&self) -> Vec<PathBuf> {
        self.shared
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Walks every shared root and swaps in freshly built lookup tables.
    ///
    /// Entries whose source path disappeared simply do not reappear. The
    /// walk runs without holding the tables lock; readers keep seeing the
    /// previous snapshot until the swap.
    pub fn rescan(&self) {
        let roots = self.shared();
        let mut tables = Tables::default();
        for root in &roots {
            scan_path(&mut tables, root, None);
        }
        info!(
            files = tables.files.len(),
            folders = tables.folders.len(),
            "share index rebuilt"
        );
        *self.tables.write().unwrap_or_else(|e| e.into_inner()) = tables;
    }

    /// Immediate children of a folder, or the top-level roots when `folder`
    /// is absent.
    pub fn browse(
        &self,
        folder: Option<&str>,
    ) -> Result<(Vec<FolderSummary>, Vec<FileSummary>), ShareError> {
        let tables = self.tables.read().unwrap_or_else(|e| e.into_inner());
        let children = match folder {
            Some(id) => tables
                .children
                .get(id)
                .ok_or_else(|| ShareError::UnknownFolder(id.to_string()))?,
            None => &tables.roots,
        };
        let folders = children
            .folders
            .iter()
            .filter_map(|id| tables.folders.get(id))
            .map(|entry| entry.summary())
            .collect();
        let files = children
            .files
            .iter()
            .filter_map(|id| tables.files.get(id))
            .map(|entry| entry.summary())
            .collect();
        Ok((folders, files))
    }

    /// One scan over the file table: extension class first, then case-folded
    /// name containment against any token, capped with an early stop.
    ///
    /// Tokens must already be lowercased (see the search command's keyword
    /// parsing).
    pub fn search(&self, keywords: &[String], filter: FileFilter, cap: usize) -> Vec<FileSummary> {
        let tables = self.tables.read().unwrap_or_else(|e| e.into_inner());
        let mut matches = Vec::new();
        for entry in tables.files.values() {
            if matches.len() >= cap {
                break;
            }
            if !filter.matches(&entry.name) {
                continue;
            }
            let name = entry.name.to_lowercase();
            if keywords.iter().any(|token| name.contains(token.as_str())) {
                matches.push(entry.summary());
            }
        }
        matches
    }

    /// Resolves a file id for serving a download request.
    pub fn lookup(&self, file_id: &str) -> Option<Arc<FileEntry>> {
        self.tables
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .files
            .get(file_id)
            .cloned()
    }

    pub fn file_count(&self) -> u64 {
        self.tables
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .files
            .len() as u64
    }
}

fn scan_path(tables: &mut Tables, path: &Path, parent: Option<&str>) {
    let meta = match fs::metadata(path) {
        Ok(meta) => meta,
        Err(err) => {
            warn!(path = %path.display(), %err, "skipping unreadable path");
            return;
        }
    };

    if meta.is_file() {
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            return;
        };
        let entry = Arc::new(FileEntry {
            id: file_id(name, meta.len()),
            name: name.to_string(),
            path: path.to_path_buf(),
            size: meta.len(),
        });
        let id = entry.id.clone();
        tables.files.insert(id.clone(), entry);
        tables.children_mut(parent).files.push(id);
        return;
    }

    if meta.is_dir() {
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .map(str::to_string)
            .unwrap_or_else(|| path.to_string_lossy().into_owned());
        let entry = Arc::new(FolderEntry {
            id: folder_id(path),
            name,
            path: path.to_path_buf(),
        });
        let id = entry.id.clone();
        tables.folders.insert(id.clone(), entry);
        tables.children.entry(id.clone()).or_default();
        tables.children_mut(parent).folders.push(id.clone());

        let mut entries: Vec<PathBuf> = match fs::read_dir(path) {
            Ok(read) => read.filter_map(|e| e.ok()).map(|e| e.path()).collect(),
            Err(err) => {
                warn!(path = %path.display(), %err, "skipping unreadable directory");
                return;
            }
        };
        // Stable listing order regardless of the platform's read_dir order.
        entries.sort();
        for child in &entries {
            scan_path(tables, child, Some(&id));
        }
    }
}
