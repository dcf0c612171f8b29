//! Single-instance lock
//!
//! A PID file that only appears once its content is complete: the PID is
//! written to a private sibling file which is then hard-linked into place, and
//! the link fails if the lock already exists. A lock left behind by a process
//! that is no longer running is treated as stale and taken over. The file is
//! removed when the lock is dropped.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use sysinfo::{Pid, ProcessesToUpdate, System};
use tracing::{debug, info, warn};

use crate::error::{Result, ResultExt, ThemeError};

const LOCK_FILE_NAME: &str = "LonghornThemeManagerSingleton.lock";

/// A lock without a readable PID this young may still be being written
const UNREADABLE_LOCK_GRACE: Duration = Duration::from_secs(2);

/// Lock file location under the per-user local data directory
pub fn default_lock_path() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("LonghornThemeManager"))
        .unwrap_or_else(|| std::env::temp_dir().join("LonghornThemeManager"))
        .join(LOCK_FILE_NAME)
}

fn is_process_running(pid: u32) -> bool {
    let mut system = System::new();
    system.refresh_processes(ProcessesToUpdate::Some(&[Pid::from_u32(pid)]), true);
    system.process(Pid::from_u32(pid)).is_some()
}

fn read_pid(path: &Path) -> Option<u32> {
    fs::read_to_string(path).ok()?.trim().parse().ok()
}

/// Modified within the grace period. A timestamp in the future counts as recent.
fn recently_modified(path: &Path) -> bool {
    fs::metadata(path)
        .and_then(|m| m.modified())
        .map(|modified| {
            modified
                .elapsed()
                .map_or(true, |age| age < UNREADABLE_LOCK_GRACE)
        })
        .unwrap_or(false)
}

/// Write `pid` next to `path` and link it into place. Fails with
/// `AlreadyExists` when the lock is taken.
fn publish(path: &Path, pid: u32) -> std::io::Result<()> {
    let mut staging = path.as_os_str().to_owned();
    staging.push(format!(".{}.tmp", pid));
    let staging = PathBuf::from(staging);

    fs::write(&staging, pid.to_string())?;
    let linked = fs::hard_link(&staging, path);
    fs::remove_file(&staging).warn_on_err();
    linked
}

/// Held for the lifetime of the process
#[derive(Debug)]
pub struct InstanceLock {
    path: PathBuf,
    pid: u32,
}

impl InstanceLock {
    /// Take the lock, or fail with [`ThemeError::InstanceLocked`] if another
    /// running process holds it.
    pub fn acquire(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| ThemeError::io(format!("Creating {}", parent.display()), e))?;
        }
        let pid = std::process::id();

        // Second attempt only after removing a stale lock
        for _ in 0..2 {
            match publish(path, pid) {
                Ok(()) => {
                    info!(pid, path = %path.display(), "Instance lock acquired");
                    return Ok(Self {
                        path: path.to_path_buf(),
                        pid,
                    });
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    match read_pid(path) {
                        Some(owner) if owner != pid && is_process_running(owner) => {
                            return Err(ThemeError::InstanceLocked { pid: owner });
                        }
                        None if recently_modified(path) => {
                            debug!(path = %path.display(), "Instance lock has no PID yet");
                            return Err(ThemeError::InstanceLocked { pid: 0 });
                        }
                        owner => {
                            warn!(?owner, path = %path.display(), "Removing stale instance lock");
                            match fs::remove_file(path) {
                                Ok(()) => {}
                                Err(e) if e.kind() == ErrorKind::NotFound => {}
                                Err(e) => {
                                    return Err(ThemeError::io(
                                        format!("Removing stale lock {}", path.display()),
                                        e,
                                    ))
                                }
                            }
                        }
                    }
                }
                Err(e) => {
                    return Err(ThemeError::io(format!("Creating lock {}", path.display()), e));
                }
            }
        }
        // Lost a race with another process taking over the same stale lock
        Err(ThemeError::InstanceLocked {
            pid: read_pid(path).unwrap_or_default(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for InstanceLock {
    fn drop(&mut self) {
        // Only remove a file we still own
        if read_pid(&self.path) != Some(self.pid) {
            return;
        }
        match fs::remove_file(&self.path) {
            Ok(()) => debug!(path = %self.path.display(), "Instance lock released"),
            Err(e) => warn!(path = %self.path.display(), error = %e, "Failed to remove instance lock"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_acquire_writes_pid_and_drop_removes() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("app.lock");

        let lock = InstanceLock::acquire(&path).unwrap();
        assert_eq!(read_pid(&path), Some(std::process::id()));
        assert_eq!(lock.path(), path);

        drop(lock);
        assert!(!path.exists());
    }

    #[test]
    fn test_stale_lock_is_taken_over() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("app.lock");
        fs::write(&path, format!("{}", u32::MAX - 1)).unwrap();

        let _lock = InstanceLock::acquire(&path).unwrap();
        assert_eq!(read_pid(&path), Some(std::process::id()));
    }

    fn age(path: &Path, by: Duration) {
        let file = fs::File::options().write(true).open(path).unwrap();
        file.set_modified(std::time::SystemTime::now() - by).unwrap();
    }

    #[test]
    fn test_old_garbage_lock_is_taken_over() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("app.lock");
        fs::write(&path, "not a pid").unwrap();
        age(&path, UNREADABLE_LOCK_GRACE * 5);

        let _lock = InstanceLock::acquire(&path).unwrap();
        assert_eq!(read_pid(&path), Some(std::process::id()));
    }

    #[test]
    fn test_lock_still_being_written_is_not_taken_over() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("app.lock");
        // Another launch has created the file but not written its PID yet
        let _held = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .unwrap();

        match InstanceLock::acquire(&path) {
            Err(ThemeError::InstanceLocked { .. }) => {}
            other => panic!("expected InstanceLocked, got {:?}", other),
        }
        assert!(path.exists());
        assert_eq!(fs::read_to_string(&path).unwrap(), "");
        // No staging file is left behind
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[cfg(unix)]
    #[test]
    fn test_live_owner_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("app.lock");
        // The test runner's parent outlives this test
        let owner = std::os::unix::process::parent_id();
        fs::write(&path, format!("{}", owner)).unwrap();

        match InstanceLock::acquire(&path) {
            Err(ThemeError::InstanceLocked { pid }) => assert_eq!(pid, owner),
            other => panic!("expected InstanceLocked, got {:?}", other),
        }
        // The other owner's file is left alone
        assert_eq!(read_pid(&path), Some(owner));
    }
}
