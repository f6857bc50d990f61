//! Filesystem advisory lock for the expiry scheduler.
//!
//! One leader at a time: the lock file records the holder's pid. A second
//! start finds a live pid and backs off; a stale pid (process gone) is
//! reclaimed. Release happens on every exit path, including signals, via
//! the explicit release call plus the Drop guard.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum LockError {
    #[error("another scheduler instance is running (pid {pid})")]
    AlreadyRunning { pid: i32 },

    #[error("lock file error: {0}")]
    Io(#[from] std::io::Error),
}

pub struct SchedulerLock {
    path: PathBuf,
    held: bool,
}

impl SchedulerLock {
    /// Take the leader lock, reclaiming a stale file if its recorded pid is
    /// no longer alive.
    pub fn acquire(path: &Path) -> Result<SchedulerLock, LockError> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }

        if let Some(pid) = read_pid(path) {
            if process_alive(pid) {
                return Err(LockError::AlreadyRunning { pid });
            }
            warn!("Removing stale scheduler lock (pid {} is gone)", pid);
            fs::remove_file(path)?;
        } else if path.exists() {
            // Unreadable/garbled lock file: treat as stale.
            warn!("Removing unreadable scheduler lock file");
            fs::remove_file(path)?;
        }

        let pid = std::process::id() as i32;
        let mut file = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)?;
        write!(file, "{}", pid)?;

        info!("Acquired scheduler lock (pid {})", pid);
        Ok(SchedulerLock {
            path: path.to_path_buf(),
            held: true,
        })
    }

    pub fn release(&mut self) {
        if !self.held {
            return;
        }
        if let Err(e) = fs::remove_file(&self.path) {
            warn!("Failed to remove scheduler lock file: {}", e);
        } else {
            info!("Released scheduler lock");
        }
        self.held = false;
    }

    /// The pid currently holding the lock, if that process is alive.
    pub fn holder(path: &Path) -> Option<i32> {
        let pid = read_pid(path)?;
        process_alive(pid).then_some(pid)
    }

    /// Ask a running scheduler to stop (SIGTERM to the recorded pid).
    #[cfg(unix)]
    pub fn stop(path: &Path) -> Result<i32, LockError> {
        let pid = Self::holder(path).ok_or(LockError::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "scheduler is not running",
        )))?;
        nix::sys::signal::kill(
            nix::unistd::Pid::from_raw(pid),
            nix::sys::signal::Signal::SIGTERM,
        )
        .map_err(|e| LockError::Io(std::io::Error::other(e)))?;
        Ok(pid)
    }
}

impl Drop for SchedulerLock {
    fn drop(&mut self) {
        self.release();
    }
}

fn read_pid(path: &Path) -> Option<i32> {
    let raw = fs::read_to_string(path).ok()?;
    raw.trim().parse::<i32>().ok()
}

#[cfg(unix)]
fn process_alive(pid: i32) -> bool {
    // Signal 0 probes existence without delivering anything.
    nix::sys::signal::kill(nix::unistd::Pid::from_raw(pid), None).is_ok()
}

#[cfg(not(unix))]
fn process_alive(_pid: i32) -> bool {
    // Without a liveness probe, err on the safe side and treat the holder
    // as alive; the operator removes the file manually.
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acquire_release_cycle() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scheduler.lock");

        let mut lock = SchedulerLock::acquire(&path).unwrap();
        assert!(path.exists());
        assert_eq!(SchedulerLock::holder(&path), Some(std::process::id() as i32));

        lock.release();
        assert!(!path.exists());
        assert_eq!(SchedulerLock::holder(&path), None);
    }

    #[test]
    fn test_second_acquire_fails_while_held() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scheduler.lock");

        let _lock = SchedulerLock::acquire(&path).unwrap();
        match SchedulerLock::acquire(&path) {
            Err(LockError::AlreadyRunning { pid }) => {
                assert_eq!(pid, std::process::id() as i32);
            }
            other => panic!("expected AlreadyRunning, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_stale_lock_is_reclaimed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scheduler.lock");

        // A pid that cannot exist on Linux (above the default pid_max).
        fs::write(&path, "4194999").unwrap();
        let lock = SchedulerLock::acquire(&path).unwrap();
        drop(lock);
        assert!(!path.exists());
    }

    #[test]
    fn test_garbled_lock_is_reclaimed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scheduler.lock");

        fs::write(&path, "not a pid").unwrap();
        let _lock = SchedulerLock::acquire(&path).unwrap();
    }

    #[test]
    fn test_drop_releases() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scheduler.lock");
        {
            let _lock = SchedulerLock::acquire(&path).unwrap();
            assert!(path.exists());
        }
        assert!(!path.exists());
    }
}
