//! Single-instance lock file.
//!
//! An advisory protocol rather than an OS lock: the file holds the pid of the
//! running instance, a competing start reads it, checks whether that process
//! is alive and, with `force`, terminates it and takes over. Two instances
//! starting at the same moment can race between the read and the create;
//! rssm assumes one operator.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use nix::errno::Errno;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use thiserror::Error;

/// How long a forced takeover waits for the old holder to exit.
pub const TAKEOVER_TIMEOUT: Duration = Duration::from_secs(5);

const TAKEOVER_POLL: Duration = Duration::from_millis(100);

#[derive(Debug, Error)]
pub enum LockError {
    /// Another live instance holds the lock and takeover was not requested.
    #[error("rssm is already running (pid {0}); use --force to replace it")]
    Held(i32),

    #[error("Failed to signal pid {pid}: {source}")]
    Signal {
        pid: i32,
        #[source]
        source: Errno,
    },

    /// The old holder ignored SIGTERM for the whole takeover timeout.
    #[error("pid {0} did not exit after SIGTERM")]
    StillRunning(i32),

    #[error("Lock file {} error: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Held lock record. Dropping it removes the file if it still names this
/// process.
#[derive(Debug)]
pub struct InstanceLock {
    path: PathBuf,
    owned: bool,
}

impl InstanceLock {
    /// Claims the lock at `path` for the current process.
    ///
    /// - Missing or unparsable record → claimed
    /// - Record naming a dead pid → stale, replaced
    /// - Record naming a live pid → [`LockError::Held`], unless `force`, in
    ///   which case the holder gets SIGTERM and up to [`TAKEOVER_TIMEOUT`] to
    ///   exit before the record is replaced
    pub fn acquire(path: &Path, force: bool) -> Result<Self, LockError> {
        let io_err = |source| LockError::Io {
            path: path.to_path_buf(),
            source,
        };
        let own = std::process::id() as i32;

        match read_pid(path).map_err(io_err)? {
            None => {}
            Some(pid) if pid == own => {
                tracing::debug!(path = %path.display(), "Lock file already names this process");
            }
            Some(pid) if !is_alive(pid) => {
                tracing::info!(pid, path = %path.display(), "Removing stale lock file");
            }
            Some(pid) if !force => return Err(LockError::Held(pid)),
            Some(pid) => {
                tracing::info!(pid, "Terminating running instance");
                terminate(pid)?;
            }
        }

        remove_if_present(path).map_err(io_err)?;
        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)
            .map_err(io_err)?;
        writeln!(file, "{own}").map_err(io_err)?;

        tracing::debug!(pid = own, path = %path.display(), "Acquired instance lock");
        Ok(Self {
            path: path.to_path_buf(),
            owned: true,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Replaces the recorded pid. Used by the daemon child after forking.
    pub fn rewrite(&self, pid: u32) -> Result<(), LockError> {
        fs::write(&self.path, format!("{pid}\n")).map_err(|source| LockError::Io {
            path: self.path.clone(),
            source,
        })
    }

    /// Gives up ownership without touching the file. Used by the daemon
    /// parent, whose child now holds the lock.
    pub fn disown(mut self) {
        self.owned = false;
    }

    /// Removes the lock file if it names this process.
    pub fn release(mut self) -> Result<(), LockError> {
        self.owned = false;
        self.remove_if_ours()
    }

    fn remove_if_ours(&self) -> Result<(), LockError> {
        let io_err = |source| LockError::Io {
            path: self.path.clone(),
            source,
        };
        if read_pid(&self.path).map_err(io_err)? == Some(std::process::id() as i32) {
            remove_if_present(&self.path).map_err(io_err)?;
            tracing::debug!(path = %self.path.display(), "Released instance lock");
        }
        Ok(())
    }
}

impl Drop for InstanceLock {
    fn drop(&mut self) {
        if self.owned {
            if let Err(e) = self.remove_if_ours() {
                tracing::warn!(error = %e, "Failed to remove lock file");
            }
        }
    }
}

/// The pid recorded at `path`. Missing file, empty or garbage content
/// all read as no record.
fn read_pid(path: &Path) -> io::Result<Option<i32>> {
    match fs::read_to_string(path) {
        Ok(content) => Ok(content.trim().parse::<i32>().ok().filter(|&pid| pid > 0)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

fn remove_if_present(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

/// Signal 0 probes for existence. EPERM means the process exists but
/// belongs to someone else.
pub fn is_alive(pid: i32) -> bool {
    match kill(Pid::from_raw(pid), None) {
        Ok(()) => true,
        Err(Errno::EPERM) => true,
        Err(_) => false,
    }
}

fn terminate(pid: i32) -> Result<(), LockError> {
    match kill(Pid::from_raw(pid), Signal::SIGTERM) {
        Ok(()) => {}
        Err(Errno::ESRCH) => return Ok(()),
        Err(source) => return Err(LockError::Signal { pid, source }),
    }

    let deadline = Instant::now() + TAKEOVER_TIMEOUT;
    while Instant::now() < deadline {
        if !is_alive(pid) {
            return Ok(());
        }
        std::thread::sleep(TAKEOVER_POLL);
    }
    Err(LockError::StillRunning(pid))
}
