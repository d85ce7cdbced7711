//! Durable file primitives for the journal
//!
//! A journal write must leave either the old or the new content on disk,
//! never a torn file. Writes go to a sibling temp file, are fsynced, renamed
//! over the target, and the parent directory is fsynced so the rename itself
//! survives a power loss.

use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;

/// Atomically replace `path` with `bytes`
pub fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let dir = path
        .parent()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "journal path has no parent"))?;
    let file_name = path
        .file_name()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "journal path has no file name"))?;
    let temp_path = dir.join(format!(".{}.tmp", file_name.to_string_lossy()));

    {
        let mut temp = File::create(&temp_path)?;
        temp.write_all(bytes)?;
        temp.sync_all()?;
    }

    if let Err(e) = fs::rename(&temp_path, path) {
        let _ = fs::remove_file(&temp_path);
        return Err(e);
    }

    sync_dir(dir)
}

/// Flush directory metadata (renames, unlinks) to disk
#[cfg(unix)]
pub fn sync_dir(dir: &Path) -> io::Result<()> {
    File::open(dir)?.sync_all()
}

/// Directories cannot be opened for syncing on this platform; rename is
/// already durable once it returns.
#[cfg(not(unix))]
pub fn sync_dir(_dir: &Path) -> io::Result<()> {
    Ok(())
}

/// Open (creating if needed) and exclusively lock a lock file.
/// The lock is held until the returned handle is dropped.
pub fn lock_exclusive(path: &Path) -> io::Result<File> {
    let file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)?;
    file.lock_exclusive()?;
    Ok(file)
}

/// Whether some other handle currently holds the lock at `path`
pub fn is_locked(path: &Path) -> bool {
    let file = match OpenOptions::new().write(true).open(path) {
        Ok(file) => file,
        Err(_) => return false,
    };
    match file.try_lock_exclusive() {
        Ok(()) => {
            let _ = file.unlock();
            false
        }
        Err(_) => true,
    }
}
