use std::{
    cell::Cell,
    fs, io,
    path::{Path, PathBuf},
    time::Duration,
};

use backon::{BlockingRetryable, ConstantBuilder};
use tracing::{event, instrument, Level};

use crate::{Error, Result};

/// How hard to try when deleting a file that refuses to go away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub attempts: u32,
    /// Delay between attempts.
    pub backoff: Duration,
}

impl RetryPolicy {
    pub fn new(attempts: u32, backoff: Duration) -> Self {
        RetryPolicy {
            attempts: attempts.max(1),
            backoff,
        }
    }

    /// Retry without sleeping.
    pub fn immediate(attempts: u32) -> Self {
        Self::new(attempts, Duration::ZERO)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(5, Duration::from_secs(1))
    }
}

fn is_read_only(path: &Path) -> bool {
    fs::metadata(path)
        .map(|m| m.permissions().readonly())
        .unwrap_or(false)
}

#[cfg(unix)]
fn make_writable(path: &Path) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o644))
}

#[cfg(not(unix))]
fn make_writable(path: &Path) -> io::Result<()> {
    let mut permissions = fs::metadata(path)?.permissions();
    permissions.set_readonly(false);
    fs::set_permissions(path, permissions)
}

/// Delete `path`, retrying according to `policy`. A read-only file gets its permissions fixed
/// once before the first retry-worthy attempt. A file that is already gone counts as deleted.
///
/// Returns the number of attempts it took.
#[instrument]
pub fn delete_with_retry(path: &Path, policy: &RetryPolicy) -> Result<u32> {
    let attempts = Cell::new(0u32);
    let mut permissions_fixed = false;

    let attempt = || -> io::Result<()> {
        attempts.set(attempts.get() + 1);

        if !permissions_fixed && is_read_only(path) {
            permissions_fixed = true;
            match make_writable(path) {
                Ok(()) => event!(Level::INFO, path=%path.display(), "Fixed permissions before delete"),
                Err(e) => event!(Level::WARN, path=%path.display(), error=%e, "Could not fix permissions"),
            }
        }

        match fs::remove_file(path) {
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            result => result,
        }
    };

    let backoff = ConstantBuilder::default()
        .with_delay(policy.backoff)
        .with_max_times(policy.attempts.saturating_sub(1) as usize);

    let result = attempt
        .retry(&backoff)
        .notify(|e: &io::Error, delay: Duration| {
            event!(Level::WARN, path=%path.display(), error=%e, ?delay, "Delete failed, retrying");
        })
        .call();

    let attempts = attempts.get();
    match result {
        Ok(()) => Ok(attempts),
        Err(source) => Err(Error::DeleteFailed {
            path: path.to_path_buf(),
            attempts,
            source,
        }),
    }
}

/// Remove files written during an aborted operation, newest first. Files that are already gone
/// are fine. Returns the ones that could not be removed.
pub fn remove_files(paths: &[PathBuf]) -> Vec<Error> {
    paths
        .iter()
        .rev()
        .filter_map(|path| match fs::remove_file(path) {
            Ok(()) => {
                event!(Level::DEBUG, path=%path.display(), "Removed file");
                None
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => None,
            Err(e) => Some(Error::io(path, e)),
        })
        .collect()
}
