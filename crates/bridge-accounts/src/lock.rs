//! Advisory account locks
//!
//! Two sshd processes authenticating the same new user at the same time would
//! both see the account missing and both try to create it. Holding an exclusive
//! `flock` on `<lock_dir>/<username>.lock` across the existence check and the
//! creation serialises them; the second one then finds the account present.
//!
//! Every change the bridge makes to the group file (`useradd --user-group`,
//! `groupadd`, member rewrites) runs under a second lock, `<lock_dir>/:group.lock`.
//! The `:` cannot appear in a user name, so it never clashes with a user lock.

use bridge_core::types::validate_name;
use bridge_core::{Error, Result};
use std::fs::{self, File, OpenOptions};
use std::io;
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use tracing::debug;

const GROUP_FILE_LOCK: &str = ":group.lock";

/// Exclusive lock released when dropped
#[derive(Debug)]
pub struct AccountLock {
    _file: File,
    path: PathBuf,
}

impl AccountLock {
    /// Block until the creation lock for `username` is held
    pub async fn user(dir: &Path, username: &str) -> Result<Self> {
        validate_name("user", username)?;
        Self::acquire(dir.join(format!("{}.lock", username))).await
    }

    /// Block until no other bridge process is changing the group file
    pub async fn group_file(dir: &Path) -> Result<Self> {
        Self::acquire(dir.join(GROUP_FILE_LOCK)).await
    }

    /// Take the creation lock for `username` if nobody holds it, `Ok(None)` otherwise
    pub fn try_user(dir: &Path, username: &str) -> Result<Option<Self>> {
        validate_name("user", username)?;
        let path = dir.join(format!("{}.lock", username));
        let file = open_lock_file(&path)?;

        match flock(&file, libc::LOCK_EX | libc::LOCK_NB) {
            Ok(()) => Ok(Some(Self { _file: file, path })),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(lock_error(&path, e)),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn acquire(path: PathBuf) -> Result<Self> {
        let file = open_lock_file(&path)?;

        let file = tokio::task::spawn_blocking(move || flock(&file, libc::LOCK_EX).map(|()| file))
            .await
            .map_err(|e| Error::Other(e.into()))?
            .map_err(|e| lock_error(&path, e))?;

        debug!("Acquired lock {}", path.display());
        Ok(Self { _file: file, path })
    }
}

fn open_lock_file(path: &Path) -> Result<File> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir).map_err(|e| lock_error(path, e))?;
    }

    OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(path)
        .map_err(|e| lock_error(path, e))
}

fn flock(file: &File, operation: libc::c_int) -> io::Result<()> {
    // SAFETY: the descriptor is owned by `file` and stays open for the call
    let rc = unsafe { libc::flock(file.as_raw_fd(), operation) };
    if rc == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

fn lock_error(path: &Path, err: io::Error) -> Error {
    Error::Lock {
        path: path.display().to_string(),
        message: err.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_lock_is_exclusive() {
        let dir = tempfile::tempdir().unwrap();

        let held = AccountLock::user(dir.path(), "alice").await.unwrap();
        assert_eq!(held.path(), dir.path().join("alice.lock"));

        assert!(AccountLock::try_user(dir.path(), "alice").unwrap().is_none());
        // Other users are unaffected
        assert!(AccountLock::try_user(dir.path(), "bob").unwrap().is_some());

        drop(held);
        assert!(AccountLock::try_user(dir.path(), "alice").unwrap().is_some());
    }

    #[tokio::test]
    async fn test_lock_dir_created() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("run").join("ssh-iam-bridge");

        let lock = AccountLock::user(&nested, "alice").await.unwrap();
        assert!(lock.path().exists());
    }

    #[tokio::test]
    async fn test_group_file_lock_is_separate() {
        let dir = tempfile::tempdir().unwrap();

        let group = AccountLock::group_file(dir.path()).await.unwrap();
        assert_eq!(group.path(), dir.path().join(":group.lock"));
        assert!(AccountLock::try_user(dir.path(), "group").unwrap().is_some());
    }

    #[test]
    fn test_rejects_path_like_names() {
        let dir = tempfile::tempdir().unwrap();
        assert!(AccountLock::try_user(dir.path(), "../etc/passwd").is_err());
        assert!(AccountLock::try_user(dir.path(), "").is_err());
    }
}
