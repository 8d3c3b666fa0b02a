//! JSON snapshots of round results, fingerprinted with SHA-256.
//!
//! A snapshot file `<name>.json` is written together with
//! `<name>.json.manifest.json` carrying its hash, so a later round can tell a
//! seed it is about to trust from one that was edited or truncated.

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{AuditError, Result};
use crate::error_counts::ClcaErrorCounts;
use crate::logging;
use crate::martingale::TestH0Result;

/// Everything a contest's round leaves behind for the next one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoundSnapshot {
    pub contest_id: u32,
    pub round: u32,
    pub created_at: String,
    pub result: TestH0Result,
    /// Error counts to seed the next round's estimator.
    pub error_counts: ClcaErrorCounts,
}

impl RoundSnapshot {
    pub fn new(contest_id: u32, round: u32, result: TestH0Result) -> Self {
        let error_counts = result.tracker.error_counts();
        Self {
            contest_id,
            round,
            created_at: logging::ts_now(),
            result,
            error_counts,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotManifest {
    pub path: String,
    pub hash_sha256: String,
    pub bytes: u64,
    pub written_at: String,
}

pub fn to_json<T: Serialize>(value: &T) -> Result<String> {
    Ok(serde_json::to_string_pretty(value)?)
}

pub fn from_json<T: DeserializeOwned>(s: &str) -> Result<T> {
    Ok(serde_json::from_str(s)?)
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

pub fn file_sha256(path: &Path) -> Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 8192];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

pub fn manifest_path(path: &Path) -> PathBuf {
    let mut p = path.to_path_buf();
    let fname = path
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("snapshot.json");
    p.set_file_name(format!("{}.manifest.json", fname));
    p
}

/// Write `value` as JSON plus its manifest. Returns the manifest.
pub fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<SnapshotManifest> {
    let body = to_json(value)?;
    std::fs::write(path, body.as_bytes())?;

    let manifest = SnapshotManifest {
        path: path.display().to_string(),
        hash_sha256: sha256_hex(body.as_bytes()),
        bytes: body.len() as u64,
        written_at: logging::ts_now(),
    };
    std::fs::write(manifest_path(path), to_json(&manifest)?)?;
    logging::log_snapshot("write", &manifest.path, &manifest.hash_sha256);
    Ok(manifest)
}

/// Read JSON written by [`write_json`], refusing it if the hash no longer matches.
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let manifest: SnapshotManifest = from_json(&std::fs::read_to_string(manifest_path(path))?)?;
    let actual = file_sha256(path)?;
    if actual != manifest.hash_sha256 {
        return Err(AuditError::SnapshotMismatch {
            path: path.display().to_string(),
            expected: manifest.hash_sha256,
            actual,
        });
    }
    let value = from_json(&std::fs::read_to_string(path)?)?;
    logging::log_snapshot("read", &path.display().to_string(), &actual);
    Ok(value)
}

pub fn write_snapshot(dir: &Path, snapshot: &RoundSnapshot) -> Result<PathBuf> {
    std::fs::create_dir_all(dir)?;
    let path = dir.join(format!("contest-{}-round-{}.json", snapshot.contest_id, snapshot.round));
    write_json(&path, snapshot)?;
    Ok(path)
}

pub fn read_snapshot(path: &Path) -> Result<RoundSnapshot> {
    read_json(path)
}
