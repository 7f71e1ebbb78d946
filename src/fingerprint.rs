use std::{path::Path, time::SystemTime};

use chrono::{DateTime, Utc};

use crate::error::Result;

/// Content hash and modification time of one file on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fingerprint {
    /// Hex-encoded blake3 hash of the raw bytes.
    pub hash: String,
    pub modified: DateTime<Utc>,
    pub size: u64,
}

/// Whether a file needs (re)indexing relative to its stored record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    New,
    Changed,
    Unchanged,
}

/// A file read once for both fingerprinting and tokenizing.
#[derive(Debug)]
pub struct LoadedFile {
    pub fingerprint: Fingerprint,
    pub contents: Vec<u8>,
}

impl LoadedFile {
    pub fn text(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.contents)
    }
}

/// Read `path` and fingerprint its contents.
pub fn load(path: &Path) -> Result<LoadedFile> {
    let metadata = std::fs::metadata(path)?;
    let modified = metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH);
    let contents = std::fs::read(path)?;

    Ok(LoadedFile {
        fingerprint: Fingerprint {
            hash: blake3::hash(&contents).to_hex().to_string(),
            modified: DateTime::<Utc>::from(modified),
            size: contents.len() as u64,
        },
        contents,
    })
}

/// Compare a fresh fingerprint with the stored `(hash, modified)` pair.
///
/// Unchanged only when both match exactly.
pub fn classify(
    stored: Option<(&str, DateTime<Utc>)>,
    current: &Fingerprint,
) -> ChangeKind {
    match stored {
        None => ChangeKind::New,
        Some((hash, modified))
            if hash == current.hash && modified == current.modified =>
        {
            ChangeKind::Unchanged
        }
        Some(_) => ChangeKind::Changed,
    }
}
