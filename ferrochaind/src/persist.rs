//! Durable state for the coordinator: peers, bans, header chain, and the
//! two anchor connections written at shutdown. Every file is written with
//! the same atomic pattern zebrad uses for its state flat-files: serialize
//! to a sibling temp path, fsync, then rename over the target, so a crash
//! mid-write never leaves a half-written file in its place.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use ferrochain_network::protocol::NetworkAddress;

#[derive(Debug, Error)]
pub enum PersistError {
    #[error("io error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("serde error at {path}: {source}")]
    Serde {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

fn io_err(path: &Path, source: std::io::Error) -> PersistError {
    PersistError::Io {
        path: path.display().to_string(),
        source,
    }
}

fn serde_err(path: &Path, source: serde_json::Error) -> PersistError {
    PersistError::Serde {
        path: path.display().to_string(),
        source,
    }
}

/// Serializes `value` to `path` via temp-file + fsync + rename, mode 0600.
pub fn atomic_write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), PersistError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| io_err(path, e))?;
    }
    let tmp_path = path.with_extension("tmp");
    let json = serde_json::to_vec_pretty(value).map_err(|e| serde_err(path, e))?;

    {
        let mut file = open_private(&tmp_path).map_err(|e| io_err(&tmp_path, e))?;
        file.write_all(&json).map_err(|e| io_err(&tmp_path, e))?;
        file.sync_all().map_err(|e| io_err(&tmp_path, e))?;
    }
    fs::rename(&tmp_path, path).map_err(|e| io_err(path, e))?;
    Ok(())
}

#[cfg(unix)]
fn open_private(path: &Path) -> std::io::Result<File> {
    use std::os::unix::fs::OpenOptionsExt;
    OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)
}

#[cfg(not(unix))]
fn open_private(path: &Path) -> std::io::Result<File> {
    OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)
}

/// Reads and deserializes `path`, returning `Ok(None)` if it doesn't exist
/// (first run, or nothing was ever persisted there).
pub fn read_json<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<Option<T>, PersistError> {
    match fs::read(path) {
        Ok(bytes) => {
            let value = serde_json::from_slice(&bytes).map_err(|e| serde_err(path, e))?;
            Ok(Some(value))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(io_err(path, e)),
    }
}

/// Writes already-serialized bytes atomically, for snapshots the library
/// crates produce themselves (`AddressManager::save`, `BanManager::save`,
/// `HeaderChainStore::save`) — these are JSON text already, so writing them
/// through [`atomic_write_json`] would double-encode them as a byte array.
pub fn atomic_write_bytes(path: &Path, bytes: &[u8]) -> Result<(), PersistError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| io_err(path, e))?;
    }
    let tmp_path = path.with_extension("tmp");
    {
        let mut file = open_private(&tmp_path).map_err(|e| io_err(&tmp_path, e))?;
        file.write_all(bytes).map_err(|e| io_err(&tmp_path, e))?;
        file.sync_all().map_err(|e| io_err(&tmp_path, e))?;
    }
    fs::rename(&tmp_path, path).map_err(|e| io_err(path, e))?;
    Ok(())
}

/// Reads raw bytes, returning `Ok(None)` if the file doesn't exist.
pub fn read_bytes(path: &Path) -> Result<Option<Vec<u8>>, PersistError> {
    match fs::read(path) {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(io_err(path, e)),
    }
}

/// Removes `path` if present. Used for the anchors file, which is read once
/// at startup and deleted so a stale anchor set can't be redialed twice.
pub fn remove_if_present(path: &Path) -> Result<(), PersistError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(io_err(path, e)),
    }
}

/// The small set of peers (at most two) dialed first on the next startup,
/// chosen at shutdown from the best-connected outbound peers.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnchorSet {
    pub anchors: Vec<NetworkAddress>,
}

pub const MAX_ANCHORS: usize = 2;

#[cfg(test)]
mod tests {
    use super::*;
    use tempdir::TempDir;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Sample {
        value: u32,
    }

    #[test]
    fn round_trips_through_atomic_write() {
        let dir = TempDir::new("ferrochaind-persist").unwrap();
        let path = dir.path().join("sample.json");
        atomic_write_json(&path, &Sample { value: 7 }).unwrap();
        let loaded: Option<Sample> = read_json(&path).unwrap();
        assert_eq!(loaded, Some(Sample { value: 7 }));
    }

    #[test]
    fn round_trips_raw_bytes() {
        let dir = TempDir::new("ferrochaind-persist").unwrap();
        let path = dir.path().join("raw.json");
        atomic_write_bytes(&path, b"{\"hello\":true}").unwrap();
        let loaded = read_bytes(&path).unwrap();
        assert_eq!(loaded, Some(b"{\"hello\":true}".to_vec()));
    }

    #[test]
    fn missing_file_reads_as_none() {
        let dir = TempDir::new("ferrochaind-persist").unwrap();
        let path = dir.path().join("missing.json");
        let loaded: Option<Sample> = read_json(&path).unwrap();
        assert_eq!(loaded, None);
    }

    #[test]
    fn remove_if_present_is_idempotent() {
        let dir = TempDir::new("ferrochaind-persist").unwrap();
        let path = dir.path().join("gone.json");
        remove_if_present(&path).unwrap();
        atomic_write_json(&path, &Sample { value: 1 }).unwrap();
        remove_if_present(&path).unwrap();
        remove_if_present(&path).unwrap();
        let loaded: Option<Sample> = read_json(&path).unwrap();
        assert_eq!(loaded, None);
    }

    #[test]
    fn no_tmp_file_left_behind_after_write() {
        let dir = TempDir::new("ferrochaind-persist").unwrap();
        let path = dir.path().join("sample.json");
        atomic_write_json(&path, &Sample { value: 3 }).unwrap();
        assert!(!path.with_extension("tmp").exists());
    }
}
