//! Directory listing
//!
//! The only part of the VFS module that reads the disk. Everything else
//! works on the `FileEntry` values produced here.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Represents a single file or directory entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileEntry {
    /// File or directory name
    pub name: String,
    /// Absolute path
    pub path: PathBuf,
    pub is_directory: bool,
    pub is_symlink: bool,
    /// File size in bytes (0 for directories)
    pub size: u64,
    pub modified_at: Option<DateTime<Utc>>,
    /// File extension (without dot), None for directories
    pub extension: Option<String>,
    /// MIME type guess based on extension
    pub mime_type: Option<String>,
    /// Whether file is hidden (starts with . on Unix)
    pub is_hidden: bool,
}

impl FileEntry {
    /// Create a FileEntry from a path
    pub fn from_path(path: &Path) -> io::Result<Self> {
        let metadata = fs::symlink_metadata(path)?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();

        let is_symlink = metadata.is_symlink();
        // A link to a directory lists as a directory
        let is_directory = if is_symlink {
            path.is_dir()
        } else {
            metadata.is_dir()
        };

        let extension = if is_directory {
            None
        } else {
            path.extension().map(|e| e.to_string_lossy().to_string())
        };

        let mime_type = extension
            .as_ref()
            .and_then(|ext| mime_guess::from_ext(ext).first().map(|m| m.to_string()));

        let is_hidden = name.starts_with('.');

        Ok(Self {
            name,
            path: path.to_path_buf(),
            is_directory,
            is_symlink,
            size: if is_directory { 0 } else { metadata.len() },
            modified_at: metadata.modified().ok().map(DateTime::<Utc>::from),
            extension,
            mime_type,
            is_hidden,
        })
    }
}

/// Error reading a directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ListingError {
    #[error("Path does not exist: {path}")]
    NotFound { path: PathBuf },
    #[error("Path is not a directory: {path}")]
    NotDirectory { path: PathBuf },
    #[error("Access denied: {path}")]
    PermissionDenied { path: PathBuf },
    #[error("Failed to read directory {path}: {message}")]
    ReadError { path: PathBuf, message: String },
}

impl From<ListingError> for String {
    fn from(err: ListingError) -> Self {
        err.to_string()
    }
}

/// Read directory contents, directories first, then by case-insensitive
/// name. Entries that cannot be read are skipped.
pub fn list_directory(path: &Path, show_hidden: bool) -> Result<Vec<FileEntry>, ListingError> {
    if !path.exists() {
        return Err(ListingError::NotFound {
            path: path.to_path_buf(),
        });
    }
    if !path.is_dir() {
        return Err(ListingError::NotDirectory {
            path: path.to_path_buf(),
        });
    }

    let read_dir = fs::read_dir(path).map_err(|e| {
        if e.kind() == io::ErrorKind::PermissionDenied {
            ListingError::PermissionDenied {
                path: path.to_path_buf(),
            }
        } else {
            ListingError::ReadError {
                path: path.to_path_buf(),
                message: e.to_string(),
            }
        }
    })?;

    let mut entries: Vec<FileEntry> = Vec::new();
    for entry in read_dir {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                tracing::debug!(error = %e, "Error reading directory entry");
                continue;
            }
        };

        match FileEntry::from_path(&entry.path()) {
            Ok(file_entry) => {
                // Filter hidden files if not requested
                if !show_hidden && file_entry.is_hidden {
                    continue;
                }
                entries.push(file_entry);
            }
            Err(e) => {
                // Skip files we can't read (permission denied, etc.)
                tracing::debug!(path = %entry.path().display(), error = %e, "Skipping entry");
            }
        }
    }

    // Sort: directories first, then files, alphabetically
    entries.sort_by(|a, b| {
        b.is_directory
            .cmp(&a.is_directory)
            .then_with(|| a.name.to_lowercase().cmp(&b.name.to_lowercase()))
            .then_with(|| a.name.cmp(&b.name))
    });

    Ok(entries)
}
