//! Output directory and channel file provisioning.
//!
//! Channels are ordinary append-only files. An earlier layout used named
//! pipes for the output channel; any FIFO found at a channel path is replaced
//! by a regular file, since a FIFO cannot be rescanned for dedup.

use std::fs::{self, DirBuilder, OpenOptions};
use std::io;
use std::os::unix::fs::{DirBuilderExt, FileTypeExt, OpenOptionsExt};
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::channel::delivery::Channel;
use crate::feed::FeedSpec;

/// Errors that stop provisioning. All of them are fatal at startup.
#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("Failed to create directory {}: {source}", path.display())]
    CreateDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("{} exists but is not a directory", path.display())]
    NotADirectory { path: PathBuf },

    #[error("Failed to inspect {}: {source}", path.display())]
    Inspect {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to remove FIFO {}: {source}", path.display())]
    RemoveFifo {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to create channel {}: {source}", path.display())]
    CreateChannel {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("{} exists and is neither a regular file nor a FIFO", path.display())]
    WrongType { path: PathBuf },

    #[error("Failed to open channel {}: {source}", path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// A feed together with its open output and description channels.
///
/// Owned by the poll loop for the life of the process; the files are closed
/// when it is dropped.
#[derive(Debug)]
pub struct FeedChannel {
    pub spec: FeedSpec,
    pub output: Channel,
    pub desc: Channel,
}

impl FeedChannel {
    /// Duplicates the channel handles so a blocking task can own them.
    pub fn try_clone(&self) -> io::Result<Self> {
        Ok(Self {
            spec: self.spec.clone(),
            output: self.output.try_clone()?,
            desc: self.desc.try_clone()?,
        })
    }
}

/// `<directory>/<tag>`
pub fn output_path(directory: &Path, tag: &str) -> PathBuf {
    directory.join(tag)
}

/// `<directory>/<tag> desc`
pub fn desc_path(directory: &Path, tag: &str) -> PathBuf {
    directory.join(format!("{tag} desc"))
}

/// Ensures `path` is a directory, creating it with mode 0700 if absent.
pub fn ensure_directory(path: &Path) -> Result<(), ProvisionError> {
    match fs::metadata(path) {
        Ok(meta) if meta.is_dir() => {
            tracing::debug!(path = %path.display(), "Directory exists");
            return Ok(());
        }
        Ok(_) => {
            return Err(ProvisionError::NotADirectory {
                path: path.to_path_buf(),
            })
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(source) => {
            return Err(ProvisionError::Inspect {
                path: path.to_path_buf(),
                source,
            })
        }
    }

    tracing::debug!(path = %path.display(), "Directory doesn't exist, creating");
    // SEC-007: Channel directory is user-only
    match DirBuilder::new().mode(0o700).create(path) {
        Ok(()) => Ok(()),
        // Lost a race with another creator; fine as long as it is a directory now
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists && path.is_dir() => Ok(()),
        Err(source) => Err(ProvisionError::CreateDir {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// Ensures `path` is a regular file, replacing a FIFO if one is there.
///
/// An existing regular file is left untouched, content included.
pub fn ensure_channel(path: &Path) -> Result<(), ProvisionError> {
    match fs::metadata(path) {
        Ok(meta) if meta.file_type().is_file() => {
            tracing::debug!(path = %path.display(), "Channel exists");
            Ok(())
        }
        Ok(meta) if meta.file_type().is_fifo() => {
            tracing::info!(path = %path.display(), "Replacing FIFO with a regular channel file");
            fs::remove_file(path).map_err(|source| ProvisionError::RemoveFifo {
                path: path.to_path_buf(),
                source,
            })?;
            create_channel_file(path)
        }
        Ok(_) => Err(ProvisionError::WrongType {
            path: path.to_path_buf(),
        }),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            tracing::debug!(path = %path.display(), "Channel doesn't exist, creating");
            create_channel_file(path)
        }
        Err(source) => Err(ProvisionError::Inspect {
            path: path.to_path_buf(),
            source,
        }),
    }
}

fn create_channel_file(path: &Path) -> Result<(), ProvisionError> {
    OpenOptions::new()
        .append(true)
        .create(true)
        .mode(0o600)
        .open(path)
        .map(drop)
        .map_err(|source| ProvisionError::CreateChannel {
            path: path.to_path_buf(),
            source,
        })
}

fn open_channel(path: &Path) -> Result<Channel, ProvisionError> {
    ensure_channel(path)?;
    Channel::open(path).map_err(|source| ProvisionError::Open {
        path: path.to_path_buf(),
        source,
    })
}

/// Creates the directory and both channels for every feed, in feed order,
/// and opens them for the poll loop.
///
/// Stops at the first failure.
pub fn provision(directory: &Path, feeds: &[FeedSpec]) -> Result<Vec<FeedChannel>, ProvisionError> {
    ensure_directory(directory)?;

    feeds
        .iter()
        .map(|spec| {
            let output = open_channel(&output_path(directory, &spec.tag))?;
            let desc = open_channel(&desc_path(directory, &spec.tag))?;
            tracing::debug!(feed = %spec.tag, "Provisioned channels");
            Ok(FeedChannel {
                spec: spec.clone(),
                output,
                desc,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use nix::sys::stat::Mode;
    use nix::unistd::mkfifo;
    use std::os::unix::fs::PermissionsExt;

    fn spec(tag: &str) -> FeedSpec {
        FeedSpec {
            tag: tag.into(),
            url: format!("http://example.com/{tag}"),
        }
    }

    #[test]
    fn test_ensure_directory_creates_user_only() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("r");
        ensure_directory(&dir).unwrap();

        let mode = fs::metadata(&dir).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o700);

        // Second call succeeds on the existing directory
        ensure_directory(&dir).unwrap();
    }

    #[test]
    fn test_ensure_directory_rejects_file() {
        let tmp = tempfile::tempdir().unwrap();
        let file = tmp.path().join("file");
        fs::write(&file, "x").unwrap();
        assert!(matches!(
            ensure_directory(&file),
            Err(ProvisionError::NotADirectory { .. })
        ));
    }

    #[test]
    fn test_ensure_directory_missing_parent_fails() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("a").join("b");
        assert!(matches!(
            ensure_directory(&dir),
            Err(ProvisionError::CreateDir { .. })
        ));
    }

    #[test]
    fn test_ensure_channel_is_idempotent() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("tech");
        ensure_channel(&path).unwrap();
        fs::write(&path, "title: kept\nITEMS\n").unwrap();

        ensure_channel(&path).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "title: kept\nITEMS\n");
    }

    #[test]
    fn test_ensure_channel_replaces_fifo() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("tech");
        mkfifo(&path, Mode::S_IRWXU).unwrap();
        assert!(fs::metadata(&path).unwrap().file_type().is_fifo());

        ensure_channel(&path).unwrap();
        let meta = fs::metadata(&path).unwrap();
        assert!(meta.file_type().is_file());
        assert_eq!(meta.len(), 0);
    }

    #[test]
    fn test_ensure_channel_rejects_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("tech");
        fs::create_dir(&path).unwrap();
        assert!(matches!(
            ensure_channel(&path),
            Err(ProvisionError::WrongType { .. })
        ));
    }

    #[test]
    fn test_provision_creates_both_channels_in_order() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("r");
        let channels = provision(&dir, &[spec("tech"), spec("my news")]).unwrap();

        assert_eq!(channels.len(), 2);
        assert_eq!(channels[0].spec.tag, "tech");
        assert_eq!(channels[1].spec.tag, "my news");
        assert!(dir.join("tech").is_file());
        assert!(dir.join("tech desc").is_file());
        assert!(dir.join("my news").is_file());
        assert!(dir.join("my news desc").is_file());
        assert_eq!(channels[0].desc.path(), dir.join("tech desc").as_path());
    }

    #[test]
    fn test_provision_fails_on_collision() {
        let tmp = tempfile::tempdir().unwrap();
        fs::create_dir(tmp.path().join("tech desc")).unwrap();
        let result = provision(tmp.path(), &[spec("tech")]);
        assert!(matches!(result, Err(ProvisionError::WrongType { .. })));
    }
}
