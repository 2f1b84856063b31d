//! Advisory lock that keeps two harness runs from working at the same time.
//!
//! The lock is a directory created atomically next to the other run state.
//! A lock older than its maximum age is treated as left behind by a crashed
//! run and is taken over.

use log::{debug, warn};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LockError {
    #[error("lock {0} is held by another process")]
    Held(PathBuf),
    #[error("could not manage lock {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// A held lock, released when dropped.
#[derive(Debug)]
pub struct Lock {
    path: PathBuf,
    released: bool,
}

impl Lock {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Release the lock now rather than at drop.
    ///
    /// # Errors
    /// Returns an error if the lock directory cannot be removed.
    pub fn release(mut self) -> Result<(), LockError> {
        self.released = true;
        remove(&self.path)
    }
}

impl Drop for Lock {
    fn drop(&mut self) {
        if !self.released
            && let Err(e) = remove(&self.path)
        {
            warn!("{e}");
        }
    }
}

fn remove(path: &Path) -> Result<(), LockError> {
    match fs::remove_dir(path) {
        Ok(()) => {
            debug!("Released lock {}", path.display());
            Ok(())
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(source) => Err(LockError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}

fn age(path: &Path) -> io::Result<Duration> {
    let modified = fs::metadata(path)?.modified()?;
    Ok(SystemTime::now()
        .duration_since(modified)
        .unwrap_or(Duration::ZERO))
}

/// Take the lock `name` inside `dir`, reclaiming it if it is older than `max_age`.
///
/// # Errors
/// Returns [`LockError::Held`] if a live lock exists, or [`LockError::Io`]
/// if the lock directory cannot be created or inspected.
pub fn acquire_lock_or_fail(dir: &Path, name: &str, max_age: Duration) -> Result<Lock, LockError> {
    let path = dir.join(format!("{name}.lock"));
    let io_err = |source| LockError::Io {
        path: path.clone(),
        source,
    };

    fs::create_dir_all(dir).map_err(io_err)?;
    match fs::create_dir(&path) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
            let lock_age = age(&path).map_err(io_err)?;
            if lock_age <= max_age {
                return Err(LockError::Held(path));
            }
            warn!(
                "Removing stale lock {} ({}s old)",
                path.display(),
                lock_age.as_secs()
            );
            remove(&path)?;
            fs::create_dir(&path).map_err(|e| {
                if e.kind() == io::ErrorKind::AlreadyExists {
                    LockError::Held(path.clone())
                } else {
                    io_err(e)
                }
            })?;
        }
        Err(e) => return Err(io_err(e)),
    }

    debug!("Acquired lock {}", path.display());
    Ok(Lock {
        path,
        released: false,
    })
}
