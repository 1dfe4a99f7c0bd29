// src/mover.rs

//! Filesystem legwork
//!
//! Copies, renames and sweeps take orders; every decision about *where*
//! a file goes is made by the context. Parents are created on demand,
//! existing targets are overwritten, and timestamp preservation is
//! best-effort since the run must not fail over an unwritable atime.

use filetime::FileTime;
use std::fs;
use std::io;
use std::path::Path;
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::error::{Error, Result};

fn file_op(op: &'static str, path: &Path) -> impl FnOnce(io::Error) -> Error {
    let path = path.to_path_buf();
    move |source| Error::FileOp { op, path, source }
}

/// Copy `source` to `target`, creating parents and keeping file times
pub fn copy_file(source: &Path, target: &Path) -> Result<()> {
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent).map_err(file_op("create", parent))?;
    }
    fs::copy(source, target).map_err(file_op("copy", source))?;
    match fs::metadata(source) {
        Ok(meta) => {
            let atime = FileTime::from_last_access_time(&meta);
            let mtime = FileTime::from_last_modification_time(&meta);
            if let Err(e) = filetime::set_file_times(target, atime, mtime) {
                warn!("could not preserve times of {}: {e}", target.display());
            }
        }
        Err(e) => warn!("could not read times of {}: {e}", source.display()),
    }
    Ok(())
}

/// Move an already-migrated file to a new location
pub fn rename_file(source: &Path, target: &Path) -> Result<()> {
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent).map_err(file_op("create", parent))?;
    }
    fs::rename(source, target).map_err(file_op("rename", source))?;
    Ok(())
}

/// Remove directories under `root` left empty; returns how many went
///
/// Children are visited before their parents, so a directory that only
/// held empty directories is itself removed in the same sweep.
pub fn remove_empty_dirs(root: &Path) -> Result<usize> {
    let mut removed = 0usize;
    for entry in WalkDir::new(root).contents_first(true) {
        let entry = entry.map_err(io::Error::from)?;
        if !entry.file_type().is_dir() || entry.path() == root {
            continue;
        }
        if fs::read_dir(entry.path())?.next().is_none() {
            fs::remove_dir(entry.path())?;
            debug!("removed empty directory {}", entry.path().display());
            removed += 1;
        }
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn touch(path: &PathBuf, content: &str) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    #[test]
    fn test_copy_creates_parents_and_preserves_times() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("a/b/file.txt");
        touch(&source, "payload");
        let old = FileTime::from_unix_time(1_600_000_000, 0);
        filetime::set_file_mtime(&source, old).unwrap();

        let target = dir.path().join("x/y/z/file.txt");
        copy_file(&source, &target).unwrap();

        assert_eq!(fs::read_to_string(&target).unwrap(), "payload");
        let meta = fs::metadata(&target).unwrap();
        assert_eq!(FileTime::from_last_modification_time(&meta), old);
    }

    #[test]
    fn test_copy_overwrites_existing_target() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("new.txt");
        let target = dir.path().join("out.txt");
        touch(&source, "new");
        touch(&target, "stale");
        copy_file(&source, &target).unwrap();
        assert_eq!(fs::read_to_string(&target).unwrap(), "new");
    }

    #[test]
    fn test_rename_creates_parents() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("old/spot.bin");
        touch(&source, "x");
        let target = dir.path().join("deep/new/spot.bin");
        rename_file(&source, &target).unwrap();
        assert!(!source.exists());
        assert_eq!(fs::read_to_string(&target).unwrap(), "x");
    }

    #[test]
    fn test_empty_dir_sweep_cascades() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("a/b/c")).unwrap();
        fs::create_dir_all(dir.path().join("kept")).unwrap();
        touch(&dir.path().join("kept/file.txt"), "x");

        let removed = remove_empty_dirs(dir.path()).unwrap();
        assert_eq!(removed, 3);
        assert!(!dir.path().join("a").exists());
        assert!(dir.path().join("kept/file.txt").exists());
        // The root itself is never removed.
        assert!(dir.path().exists());
    }
}
