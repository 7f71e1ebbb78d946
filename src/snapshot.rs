use std::{
    fs,
    io::{BufWriter, Write},
    path::Path,
};

use serde::Deserialize;

use crate::{
    error::{Error, Result},
    index::{SCHEMA_VERSION, VocabularyIndex},
};

#[derive(Deserialize)]
struct Header {
    metadata: HeaderMetadata,
}

#[derive(Deserialize)]
struct HeaderMetadata {
    schema_version: u32,
}

/// Write `index` to `path`, replacing any previous snapshot atomically.
///
/// Returns the size of the written file in bytes.
pub fn save(index: &VocabularyIndex, path: &Path) -> Result<u64> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = std::path::PathBuf::from(tmp);

    {
        let mut writer = BufWriter::new(fs::File::create(&tmp)?);
        serde_json::to_writer_pretty(&mut writer, index)?;
        writer.flush()?;
        writer.get_ref().sync_all()?;
    }
    fs::rename(&tmp, path)?;

    Ok(fs::metadata(path)?.len())
}

/// Read a snapshot. A missing file yields `Ok(None)`.
///
/// The schema version is checked before the body is decoded, so a snapshot
/// written by an incompatible release fails with [`Error::SchemaVersion`]
/// instead of a decoding error.
pub fn load(path: &Path) -> Result<Option<VocabularyIndex>> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    let header: Header = serde_json::from_slice(&bytes).map_err(|e| {
        Error::Snapshot(format!("{}: unreadable header: {e}", path.display()))
    })?;
    if header.metadata.schema_version != SCHEMA_VERSION {
        return Err(Error::SchemaVersion {
            found: header.metadata.schema_version,
            expected: SCHEMA_VERSION,
        });
    }

    let mut index: VocabularyIndex = serde_json::from_slice(&bytes)?;
    index.set_index_size(bytes.len() as u64);
    Ok(Some(index))
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::{fingerprint::Fingerprint, index::IndexLimits};

    fn sample_index() -> VocabularyIndex {
        let mut index = VocabularyIndex::new(IndexLimits::default());
        let fp = Fingerprint {
            hash: "abc".into(),
            modified: Utc::now(),
            size: 20,
        };
        let tokens: Vec<String> = ["func", "parse_config", "return"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        index.ingest("/src/a.go", &fp, &tokens);
        index.recompute_stats();
        index.reweight();
        index
    }

    #[test]
    fn round_trip_preserves_records() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("vocabulary.idx");
        let index = sample_index();

        let size = save(&index, &path).unwrap();
        assert!(size > 0);
        assert!(!tmp.path().join("vocabulary.idx.tmp").exists());

        let loaded = load(&path).unwrap().unwrap();
        assert_eq!(loaded.term_count(), index.term_count());
        let before = index.term_info("parse_config").unwrap();
        let after = loaded.term_info("parse_config").unwrap();
        assert_eq!(after.documents, before.documents);
        assert_eq!(after.positions, before.positions);
        assert_eq!(after.last_seen, before.last_seen);
        assert_eq!(after.category, before.category);
        assert!((after.weight - before.weight).abs() < 1e-12);
        assert_eq!(
            loaded.document_terms("/src/a.go"),
            index.document_terms("/src/a.go")
        );
        assert_eq!(loaded.metadata(), index.metadata());
        assert_eq!(loaded.stats().index_size, size);
        loaded.verify().unwrap();
    }

    #[test]
    fn missing_snapshot_is_none() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(load(&tmp.path().join("absent.idx")).unwrap().is_none());
    }

    #[test]
    fn newer_schema_is_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("vocabulary.idx");
        save(&sample_index(), &path).unwrap();

        let mut value: serde_json::Value =
            serde_json::from_slice(&fs::read(&path).unwrap()).unwrap();
        value["metadata"]["schema_version"] = serde_json::json!(99);
        fs::write(&path, serde_json::to_vec(&value).unwrap()).unwrap();

        let err = load(&path).unwrap_err();
        assert!(matches!(
            err,
            Error::SchemaVersion {
                found: 99,
                expected: SCHEMA_VERSION
            }
        ));
    }

    #[test]
    fn garbage_is_a_snapshot_error() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("vocabulary.idx");
        fs::write(&path, b"not json").unwrap();
        assert!(matches!(load(&path), Err(Error::Snapshot(_))));
    }
}
