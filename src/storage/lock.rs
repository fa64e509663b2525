use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

/// Advisory exclusive lock on `<target>.lock`, held until drop. The lock
/// file itself is left in place for the next process; stale-session cleanup
/// removes it.
///
/// Locking is best-effort: when the lock file cannot be created or `flock`
/// is unavailable the guard degrades to a no-op and the read-modify-write
/// proceeds unprotected.
#[derive(Debug)]
pub struct FileLock {
    file: Option<File>,
}

impl FileLock {
    pub fn lock_path(target: &Path) -> PathBuf {
        let mut name = target
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".lock");
        target.with_file_name(name)
    }

    pub fn acquire(target: &Path) -> FileLock {
        let path = Self::lock_path(target);
        if let Some(parent) = path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        let file = match OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&path)
        {
            Ok(file) => file,
            Err(e) => {
                tracing::debug!(
                    path = %path.display(),
                    error = %e,
                    "Lock file unavailable, continuing unlocked"
                );
                return FileLock { file: None };
            }
        };

        if !lock_exclusive(&file) {
            tracing::debug!(path = %path.display(), "flock failed, continuing unlocked");
        }
        FileLock { file: Some(file) }
    }

    pub fn is_held(&self) -> bool {
        self.file.is_some()
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        if let Some(file) = self.file.take() {
            unlock(&file);
        }
    }
}

#[cfg(unix)]
fn lock_exclusive(file: &File) -> bool {
    use std::os::unix::io::AsRawFd;
    // SAFETY: flock only reads the descriptor, which stays open for the
    // lifetime of `file`.
    #[allow(unsafe_code)]
    let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX) };
    rc == 0
}

#[cfg(unix)]
fn unlock(file: &File) {
    use std::os::unix::io::AsRawFd;
    // SAFETY: see lock_exclusive.
    #[allow(unsafe_code)]
    unsafe {
        libc::flock(file.as_raw_fd(), libc::LOCK_UN);
    }
}

#[cfg(not(unix))]
fn lock_exclusive(_file: &File) -> bool {
    false
}

#[cfg(not(unix))]
fn unlock(_file: &File) {}
