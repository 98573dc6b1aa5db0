//! PID lock files consumed by the external reaper.
//!
//! A running fetcher advertises itself as `<pid>.lock` in the temp
//! directory. The reaper reads these to find workers that have outlived the
//! hard age limit; nothing else consumes them.

use std::ffi::OsStr;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tracing::warn;

pub const LOCK_EXTENSION: &str = "lock";

/// A `<pid>.lock` file for the current process, removed on drop.
pub struct PidLock {
    path: PathBuf,
}

impl PidLock {
    pub fn acquire(dir: &Path) -> std::io::Result<Self> {
        let pid = std::process::id();
        let path = dir.join(format!("{pid}.{LOCK_EXTENSION}"));
        fs::write(&path, pid.to_string())?;
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for PidLock {
    fn drop(&mut self) {
        match fs::remove_file(&self.path) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => warn!(path = %self.path.display(), error = %e, "cannot remove lock file"),
        }
    }
}

/// Enumerate `(pid, path)` for every parsable lock file in `dir`.
pub fn scan_locks(dir: &Path) -> std::io::Result<Vec<(u32, PathBuf)>> {
    let mut locks = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.extension().and_then(OsStr::to_str) != Some(LOCK_EXTENSION) {
            continue;
        }
        let pid = fs::read_to_string(&path)
            .ok()
            .and_then(|text| text.trim().parse::<u32>().ok());
        match pid {
            Some(pid) => locks.push((pid, path)),
            None => warn!(path = %path.display(), "ignoring unparsable lock file"),
        }
    }
    Ok(locks)
}
