//! Advisory path locks for cross-process coordination.
//!
//! A lock is a directory adjacent to the guarded path: `<path>.lockdir`.
//! Atomic `create_dir` is the mutual-exclusion primitive, so locks work on
//! any filesystem without fancy syscalls. The directory holds a `pid` file
//! recording the owner, which doubles as the stale-lock detector: a lock
//! whose recorded process is gone may be reclaimed by a contender.

use crate::error::{HistoryError, Result};
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tracing::{debug, warn};

/// Default lock acquisition timeout.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(10);

/// Minimum age before a dead holder's lock may be reclaimed. Debounces
/// reclamation against a holder that created the directory but has not yet
/// written its pid file.
pub const DEFAULT_STALE_MIN_AGE: Duration = Duration::from_secs(5);

/// Sleep between contention retries.
const RETRY_INTERVAL: Duration = Duration::from_millis(75);

/// Name of the ownership record inside a lock directory.
const PID_FILE: &str = "pid";

/// Suffix appended to the guarded path to form the lock directory.
const LOCK_DIR_SUFFIX: &str = ".lockdir";

/// RAII guard for an acquired path lock.
///
/// Dropping the guard removes the pid file and then the lock directory;
/// release happens on every exit path, including panics.
#[derive(Debug)]
pub struct LockGuard {
    lock_dir: PathBuf,
    pid_file: Option<File>,
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        // Closing the file releases its flock.
        if let Some(file) = self.pid_file.take() {
            drop(file);
        }
        let _ = fs::remove_file(self.lock_dir.join(PID_FILE));
        if let Err(e) = fs::remove_dir(&self.lock_dir) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(lock_dir = %self.lock_dir.display(), error = %e, "could not remove lock directory on release");
            }
        }
    }
}

/// Returns the lock directory that guards `target`.
pub fn lock_dir_for(target: &Path) -> PathBuf {
    let mut name = target
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| "root".into());
    name.push(LOCK_DIR_SUFFIX);
    target.with_file_name(name)
}

/// Acquires an exclusive advisory lock associated with `target`.
///
/// Retries with bounded sleeps until `timeout` elapses, reclaiming stale
/// locks (dead holder, older than `stale_min_age`) along the way. Fails with
/// `LockTimeout` carrying the holder PID when the lock stays contended.
pub fn acquire(target: &Path, timeout: Duration, stale_min_age: Duration) -> Result<LockGuard> {
    let lock_dir = lock_dir_for(target);
    let start = Instant::now();

    loop {
        match fs::create_dir(&lock_dir) {
            Ok(()) => {
                let pid_path = lock_dir.join(PID_FILE);
                let mut file = OpenOptions::new()
                    .write(true)
                    .create(true)
                    .truncate(true)
                    .open(&pid_path)?;
                file.try_lock_exclusive()?;
                let now = SystemTime::now()
                    .duration_since(UNIX_EPOCH)
                    .map(|d| d.as_secs())
                    .unwrap_or(0);
                writeln!(file, "{}", std::process::id())?;
                writeln!(file, "{now}")?;
                file.flush()?;
                file.sync_all()?;
                debug!(lock_dir = %lock_dir.display(), "acquired lock");
                return Ok(LockGuard {
                    lock_dir,
                    pid_file: Some(file),
                });
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                if try_reclaim_stale(&lock_dir, stale_min_age)? {
                    continue;
                }
                if start.elapsed() >= timeout {
                    return Err(HistoryError::LockTimeout {
                        path: target.to_path_buf(),
                        holder_pid: read_holder_pid(&lock_dir),
                    });
                }
                let remaining = timeout.saturating_sub(start.elapsed());
                std::thread::sleep(RETRY_INTERVAL.min(remaining));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // Guarded path's directory does not exist yet.
                if let Some(parent) = lock_dir.parent() {
                    fs::create_dir_all(parent)?;
                }
            }
            Err(e) => return Err(e.into()),
        }
    }
}

/// A set of locks acquired in a fixed global order.
///
/// Paths are sorted (and deduplicated) before acquisition so that any two
/// processes locking overlapping sets do so in the same order, which rules
/// out deadlock. Release happens in reverse acquisition order on drop.
#[derive(Debug)]
pub struct LockSet {
    guards: Vec<LockGuard>,
}

impl LockSet {
    /// Acquires locks on every path, in sorted order.
    pub fn acquire_all(
        paths: &[PathBuf],
        timeout: Duration,
        stale_min_age: Duration,
    ) -> Result<Self> {
        let mut sorted: Vec<&PathBuf> = paths.iter().collect();
        sorted.sort();
        sorted.dedup();

        let mut guards = Vec::with_capacity(sorted.len());
        for path in sorted {
            guards.push(acquire(path, timeout, stale_min_age)?);
        }
        Ok(Self { guards })
    }

    /// Number of locks held.
    pub fn len(&self) -> usize {
        self.guards.len()
    }

    /// True when the set holds no locks.
    pub fn is_empty(&self) -> bool {
        self.guards.is_empty()
    }
}

impl Drop for LockSet {
    fn drop(&mut self) {
        while let Some(guard) = self.guards.pop() {
            drop(guard);
        }
    }
}

/// Reads the holder PID recorded inside a lock directory.
fn read_holder_pid(lock_dir: &Path) -> Option<u32> {
    let content = fs::read_to_string(lock_dir.join(PID_FILE)).ok()?;
    content.lines().next()?.trim().parse().ok()
}

/// Age of the lock directory, from its mtime.
fn lock_age(lock_dir: &Path) -> Option<Duration> {
    let meta = fs::metadata(lock_dir).ok()?;
    meta.modified().ok()?.elapsed().ok()
}

/// Reclaims the lock when its holder is provably gone.
///
/// Returns true when the lock directory was removed. Reclamation is
/// debounced by `stale_min_age`: a directory younger than that is left
/// alone even when no pid file exists yet.
fn try_reclaim_stale(lock_dir: &Path, stale_min_age: Duration) -> Result<bool> {
    match lock_age(lock_dir) {
        Some(age) if age >= stale_min_age => {}
        Some(_) => return Ok(false),
        // Directory vanished between the create attempt and here.
        None => return Ok(true),
    }

    let stale = match fs::read_to_string(lock_dir.join(PID_FILE)) {
        Ok(content) => match content.lines().next().and_then(|l| l.trim().parse::<u32>().ok()) {
            Some(pid) => {
                if is_process_alive(pid) {
                    return Ok(false);
                }
                debug!(pid, lock_dir = %lock_dir.display(), "lock holder is dead, reclaiming");
                true
            }
            None => {
                warn!(lock_dir = %lock_dir.display(), "lock pid file unreadable, reclaiming");
                true
            }
        },
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!(lock_dir = %lock_dir.display(), "aged lock directory has no pid file, reclaiming");
            true
        }
        Err(_) => return Ok(false),
    };

    if stale {
        fs::remove_dir_all(lock_dir).map_err(|e| HistoryError::StaleLockRetained {
            path: lock_dir.to_path_buf(),
            reason: e.to_string(),
        })?;
    }
    Ok(stale)
}

/// Removes every stale lock directory under `root`, recursively.
///
/// Returns the number of locks reclaimed. Live locks are left alone.
pub fn cleanup_stale_locks(root: &Path, stale_min_age: Duration) -> Result<usize> {
    let mut cleaned = 0;
    if !root.is_dir() {
        return Ok(0);
    }

    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            let is_lockdir = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.ends_with(LOCK_DIR_SUFFIX));
            if is_lockdir {
                match try_reclaim_stale(&path, stale_min_age) {
                    Ok(true) => cleaned += 1,
                    Ok(false) => {}
                    Err(e) => warn!(lock_dir = %path.display(), error = %e, "could not reclaim stale lock"),
                }
            } else {
                stack.push(path);
            }
        }
    }

    Ok(cleaned)
}

/// Check if a process with the given PID is still alive.
///
/// On Linux, uses /proc/{pid}/stat so defunct processes with a lingering
/// /proc entry still count as present holders. Other Unix systems fall back
/// to `kill -0`. Non-Unix conservatively assumes the process is alive.
#[cfg(target_os = "linux")]
fn is_process_alive(pid: u32) -> bool {
    Path::new(&format!("/proc/{pid}/stat")).exists()
}

#[cfg(all(unix, not(target_os = "linux")))]
fn is_process_alive(pid: u32) -> bool {
    std::process::Command::new("kill")
        .args(["-0", &pid.to_string()])
        .output()
        .map(|o| o.status.success())
        .unwrap_or(true)
}

#[cfg(not(unix))]
fn is_process_alive(_pid: u32) -> bool {
    true
}
