//! Advisory lock enforcing one live turn per project.
//!
//! The lock is an OS file lock (flock) on a file in the runtime directory
//! whose name is derived from the canonical project path. It is held until
//! the guard drops.

use anyhow::{Context, Result};
use std::collections::hash_map::DefaultHasher;
use std::fs::{self, File, OpenOptions};
use std::hash::{Hash, Hasher};
use std::io::{self, Seek, SeekFrom, Write};
use std::os::fd::AsRawFd;
use std::path::{Path, PathBuf};

const TURN_LOCK_FILE: &str = "lumina-turn.lock";

/// Held while a turn runs against a project.
pub struct TurnLock {
    file: File,
    path: PathBuf,
}

impl Drop for TurnLock {
    fn drop(&mut self) {
        let _ = unlock_file(&self.file);
        let _ = fs::remove_file(&self.path);
    }
}

impl TurnLock {
    /// Take the lock for `project`, failing if another turn holds it.
    pub fn acquire(project: &Path) -> Result<Self> {
        let scope = project
            .canonicalize()
            .unwrap_or_else(|_| project.to_path_buf());

        match Self::try_acquire(&scope)? {
            Some(lock) => Ok(lock),
            None => anyhow::bail!(
                "another lumina turn is already running against {}",
                scope.display()
            ),
        }
    }

    fn try_acquire(scope: &Path) -> Result<Option<Self>> {
        let dir = lock_dir();
        fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create lock directory: {}", dir.display()))?;

        let path = dir.join(scoped_lock_filename(scope));
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .with_context(|| format!("failed to open lock file: {}", path.display()))?;

        match lock_file_nonblocking(&file) {
            Ok(()) => {
                let _ = file.set_len(0);
                let _ = file.seek(SeekFrom::Start(0));
                let _ = writeln!(file, "pid={}", std::process::id());
                let _ = writeln!(file, "project={}", scope.display());
                let _ = file.flush();

                tracing::debug!(lock = %path.display(), "Turn lock acquired");
                Ok(Some(TurnLock { file, path }))
            }
            Err(e) if is_lock_busy(&e) => Ok(None),
            Err(e) => Err(e).with_context(|| format!("failed to lock file: {}", path.display())),
        }
    }
}

fn lock_dir() -> PathBuf {
    let mut dir = match std::env::var_os("XDG_RUNTIME_DIR") {
        Some(path) if !path.is_empty() => PathBuf::from(path),
        _ => std::env::temp_dir(),
    };
    dir.push("lumina");
    dir
}

fn scoped_lock_filename(scope: &Path) -> String {
    let mut hasher = DefaultHasher::new();
    scope.to_string_lossy().hash(&mut hasher);
    format!("{TURN_LOCK_FILE}.{:016x}", hasher.finish())
}

fn is_lock_busy(error: &io::Error) -> bool {
    matches!(error.kind(), io::ErrorKind::WouldBlock)
        || matches!(error.raw_os_error(), Some(11) | Some(35))
}

#[cfg(unix)]
fn lock_file_nonblocking(file: &File) -> io::Result<()> {
    const LOCK_EX: i32 = 2;
    const LOCK_NB: i32 = 4;
    // SAFETY: flock is called with a valid file descriptor and constant flags.
    let rc = unsafe { flock(file.as_raw_fd(), LOCK_EX | LOCK_NB) };
    if rc == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

#[cfg(unix)]
fn unlock_file(file: &File) -> io::Result<()> {
    const LOCK_UN: i32 = 8;
    // SAFETY: flock is called with a valid file descriptor and constant flags.
    let rc = unsafe { flock(file.as_raw_fd(), LOCK_UN) };
    if rc == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

#[cfg(unix)]
unsafe extern "C" {
    fn flock(fd: i32, operation: i32) -> i32;
}

#[cfg(not(unix))]
compile_error!("lumina turn locks currently require Unix (macOS/Linux)");
