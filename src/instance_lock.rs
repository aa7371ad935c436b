//! Advisory file lock preventing two scheduler-bearing processes on the
//! same host.

use anyhow::{Context, Result};
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

pub struct InstanceLock {
    // Held for the lifetime of the lock; dropping releases the flock.
    _lock_file: File,
    lock_path: PathBuf,
}

impl InstanceLock {
    /// Acquire the named lock, failing fast if another process holds it.
    pub fn new(name: &str) -> Result<Self> {
        let lock_path = Self::lock_path_for(name)?;

        if let Some(parent) = lock_path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create lock directory")?;
        }

        let mut lock_file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&lock_path)
            .context("Failed to open lock file")?;

        #[cfg(unix)]
        {
            use std::os::unix::io::AsRawFd;
            let fd = lock_file.as_raw_fd();
            let result = unsafe { libc::flock(fd, libc::LOCK_EX | libc::LOCK_NB) };
            if result != 0 {
                let err = io::Error::last_os_error();
                if err.kind() == io::ErrorKind::WouldBlock {
                    anyhow::bail!(
                        "Another dispatch instance is already running. Lock file: {}",
                        lock_path.display()
                    );
                }
                return Err(err).context("Failed to acquire lock");
            }
        }

        writeln!(lock_file, "{}", std::process::id()).context("Failed to write pid")?;
        lock_file.flush().ok();

        info!("Instance lock acquired: {}", lock_path.display());
        Ok(Self {
            _lock_file: lock_file,
            lock_path,
        })
    }

    fn lock_path_for(name: &str) -> Result<PathBuf> {
        if let Ok(dir) = std::env::var("DISPATCH_RUN_DIR") {
            return Ok(Path::new(&dir).join(format!("{name}.lock")));
        }
        let user = std::env::var("USER").unwrap_or_else(|_| "unknown".to_string());
        Ok(PathBuf::from(format!("/tmp/dispatch-{user}/{name}.lock")))
    }
}

impl Drop for InstanceLock {
    fn drop(&mut self) {
        debug!("Releasing instance lock: {}", self.lock_path.display());
        // The flock goes away with the file descriptor; the file itself is
        // left behind so the path stays stable across restarts.
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn lock_is_exclusive_within_process() {
        let dir = tempfile::tempdir().unwrap();
        unsafe {
            std::env::set_var("DISPATCH_RUN_DIR", dir.path());
        }

        let first = InstanceLock::new("test-exclusive").unwrap();
        assert!(InstanceLock::new("test-exclusive").is_err());

        drop(first);
        let reacquired = InstanceLock::new("test-exclusive");
        assert!(reacquired.is_ok());

        unsafe {
            std::env::remove_var("DISPATCH_RUN_DIR");
        }
    }

    #[test]
    #[serial]
    fn different_names_do_not_conflict() {
        let dir = tempfile::tempdir().unwrap();
        unsafe {
            std::env::set_var("DISPATCH_RUN_DIR", dir.path());
        }

        let _a = InstanceLock::new("lock-a").unwrap();
        let _b = InstanceLock::new("lock-b").unwrap();

        unsafe {
            std::env::remove_var("DISPATCH_RUN_DIR");
        }
    }
}
