//! Detaching into the background.

use std::io;

use nix::errno::Errno;
use nix::unistd::{fork, setsid, ForkResult};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DetachError {
    #[error("fork failed: {0}")]
    Fork(#[source] Errno),

    #[error("setsid failed: {0}")]
    Setsid(#[source] Errno),

    #[error("Failed to change directory to /: {0}")]
    Chdir(#[source] io::Error),
}

/// Which side of the fork the caller is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Detached {
    /// The foreground process. It should exit 0 without cleaning up shared
    /// state (the lock file now belongs to the child).
    Parent { child: u32 },
    /// The long-lived background process, already in its own session with
    /// `/` as working directory.
    Child,
}

/// Forks; the child starts a new session and changes directory to `/`.
///
/// Must be called while the process is single-threaded, i.e. before the
/// async runtime is built.
pub fn daemonize() -> Result<Detached, DetachError> {
    // SAFETY: no other threads exist yet, so the child cannot inherit a lock
    // held by a thread that vanished in the fork.
    match unsafe { fork() }.map_err(DetachError::Fork)? {
        ForkResult::Parent { child } => Ok(Detached::Parent {
            child: child.as_raw() as u32,
        }),
        ForkResult::Child => {
            setsid().map_err(DetachError::Setsid)?;
            std::env::set_current_dir("/").map_err(DetachError::Chdir)?;
            Ok(Detached::Child)
        }
    }
}
