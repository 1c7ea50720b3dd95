//! Backend file persistence.
//!
//! Store files are JSON objects. Several handles (often in several
//! processes) may share one file, so every mutation goes through
//! [`update_json_map`]: take the lock file, re-read the current contents,
//! apply only this mutation's keys, and replace the file atomically.

use std::collections::BTreeMap;
use std::fs;
use std::fs::OpenOptions;
use std::io;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::warn;

use crate::error::{Result, StowError};

const LOCK_TIMEOUT: Duration = Duration::from_secs(5);
const LOCK_RETRY: Duration = Duration::from_millis(5);
/// A lock older than this was left by a crashed writer.
const STALE_LOCK_AGE: Duration = Duration::from_secs(30);

/// Write `data` to a uniquely named sibling temp file, sync it, then rename
/// it over `path`. Readers see either the old or the new contents.
pub fn write_atomic(path: &Path, data: &[u8]) -> io::Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "path has no parent"))?;
    fs::create_dir_all(parent)?;

    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|e| io::Error::other(format!("System time error: {}", e)))?
        .as_nanos();
    let temp_path = parent.join(format!(
        ".{}.{}.{}.tmp",
        file_name(path)?,
        std::process::id(),
        nanos
    ));

    let mut file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&temp_path)?;
    file.write_all(data)?;
    file.sync_all()?;
    drop(file);

    fs::rename(&temp_path, path).inspect_err(|_| {
        let _ = fs::remove_file(&temp_path);
    })
}

/// Read a JSON object file. A missing or blank file reads as empty.
pub fn read_json_map<T>(path: &Path) -> Result<BTreeMap<String, T>>
where
    T: DeserializeOwned,
{
    match fs::read(path) {
        Ok(bytes) if bytes.iter().all(|b| b.is_ascii_whitespace()) => Ok(BTreeMap::new()),
        Ok(bytes) => serde_json::from_slice(&bytes).map_err(|e| {
            StowError::Backend(format!("Invalid storage file {}: {}", path.display(), e))
        }),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(BTreeMap::new()),
        Err(err) => Err(err.into()),
    }
}

/// Apply `mutate` to the current on-disk contents of `path` under its lock
/// file. Keys the mutation does not touch keep whatever value is on disk.
pub fn update_json_map<T, F>(path: &Path, mutate: F) -> Result<()>
where
    T: Serialize + DeserializeOwned,
    F: FnOnce(&mut BTreeMap<String, T>),
{
    let _lock = LockFile::acquire(path)?;
    let mut current = read_json_map(path)?;
    mutate(&mut current);
    let contents = serde_json::to_vec_pretty(&current)?;
    write_atomic(path, &contents)?;
    Ok(())
}

fn file_name(path: &Path) -> io::Result<&str> {
    path.file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "invalid file name"))
}

/// Exclusive `.<file>.lock` sibling, removed on drop.
struct LockFile {
    path: PathBuf,
}

impl LockFile {
    fn acquire(target: &Path) -> Result<Self> {
        let parent = target
            .parent()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "path has no parent"))?;
        fs::create_dir_all(parent)?;
        let path = parent.join(format!(".{}.lock", file_name(target)?));

        let started = Instant::now();
        loop {
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(mut file) => {
                    let _ = writeln!(file, "{}", std::process::id());
                    return Ok(Self { path });
                }
                Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {
                    if is_stale(&path) {
                        warn!(path = %path.display(), "removing stale lock file");
                        let _ = fs::remove_file(&path);
                        continue;
                    }
                    if started.elapsed() >= LOCK_TIMEOUT {
                        return Err(StowError::Backend(format!(
                            "Timed out waiting for lock {}",
                            path.display()
                        )));
                    }
                    thread::sleep(LOCK_RETRY);
                }
                Err(err) => return Err(err.into()),
            }
        }
    }
}

impl Drop for LockFile {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

fn is_stale(path: &Path) -> bool {
    fs::metadata(path)
        .and_then(|meta| meta.modified())
        .ok()
        .and_then(|modified| modified.elapsed().ok())
        .is_some_and(|age| age > STALE_LOCK_AGE)
}
