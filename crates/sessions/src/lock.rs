//! Per-session advisory file lock.
//!
//! A cross-process flock-style lock on `<id>.lock` holding the owner
//! pid. If the holder pid is no longer alive, or the lock file is older
//! than `stale_ms`, a waiting caller may break the lock.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use fs2::FileExt;

use drost_domain::config::LockSettings;
use drost_domain::error::{Error, Result};

const RETRY_INTERVAL: Duration = Duration::from_millis(25);

/// A held advisory lock. Released (and the lock file removed,
/// best-effort) on drop.
#[derive(Debug)]
pub struct SessionLock {
    path: PathBuf,
    file: File,
}

impl SessionLock {
    /// Acquire the lock at `path`, waiting up to `settings.timeout_ms`.
    ///
    /// Returns `Error::LockHeld` when another live holder keeps the lock
    /// for the whole timeout window.
    pub fn acquire(path: &Path, settings: &LockSettings) -> Result<Self> {
        let deadline = Instant::now() + Duration::from_millis(settings.timeout_ms);

        loop {
            let file = OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(false)
                .open(path)?;

            match file.try_lock_exclusive() {
                Ok(()) => {
                    let mut locked = Self {
                        path: path.to_path_buf(),
                        file,
                    };
                    locked.write_pid()?;
                    return Ok(locked);
                }
                Err(_) => {
                    if Self::try_break_stale(path, &file, settings) {
                        // Holder is gone; retry immediately.
                        continue;
                    }
                }
            }

            if Instant::now() >= deadline {
                let holder = read_holder_pid(path).map(|p| p.to_string());
                return Err(Error::LockHeld(format!(
                    "{} (held by pid {})",
                    path.display(),
                    holder.as_deref().unwrap_or("unknown")
                )));
            }
            std::thread::sleep(RETRY_INTERVAL);
        }
    }

    fn write_pid(&mut self) -> Result<()> {
        self.file.set_len(0)?;
        self.file.seek(SeekFrom::Start(0))?;
        writeln!(self.file, "{}", std::process::id())?;
        self.file.flush()?;
        Ok(())
    }

    /// Break the lock if the holder is provably gone: pid not alive, or
    /// the lock file older than `stale_ms`.
    fn try_break_stale(path: &Path, _held: &File, settings: &LockSettings) -> bool {
        if let Some(pid) = read_holder_pid(path) {
            if !pid_alive(pid) {
                tracing::warn!(path = %path.display(), pid, "breaking lock of dead holder");
                let _ = std::fs::remove_file(path);
                return true;
            }
        }

        let stale = std::fs::metadata(path)
            .and_then(|m| m.modified())
            .ok()
            .and_then(|m| m.elapsed().ok())
            .map(|age| age > Duration::from_millis(settings.stale_ms))
            .unwrap_or(false);
        if stale {
            tracing::warn!(path = %path.display(), "breaking stale lock");
            let _ = std::fs::remove_file(path);
            return true;
        }
        false
    }
}

impl Drop for SessionLock {
    fn drop(&mut self) {
        let _ = fs2::FileExt::unlock(&self.file);
        let _ = std::fs::remove_file(&self.path);
    }
}

fn read_holder_pid(path: &Path) -> Option<u32> {
    let mut buf = String::new();
    File::open(path).ok()?.read_to_string(&mut buf).ok()?;
    buf.trim().parse().ok()
}

#[cfg(unix)]
fn pid_alive(pid: u32) -> bool {
    // kill(pid, 0) probes existence without signalling.
    unsafe { libc::kill(pid as libc::pid_t, 0) == 0 }
}

#[cfg(not(unix))]
fn pid_alive(_pid: u32) -> bool {
    // No cheap liveness probe; rely on the stale_ms age check.
    true
}
