//! Gallery file: versioned, self-describing JSON.
//!
//! ```text
//! {
//!   "format": "rollcall-gallery",
//!   "version": 1,
//!   "dimension": 128,
//!   "saved_at": "2026-10-18T09:00:00Z",
//!   "students": [
//!     { "id": "17", "name": "Ada", "registered_at": "...",
//!       "encodings": [ { "values": [..], "captured_at": "...", "source": "registration" } ] }
//!   ]
//! }
//! ```
//!
//! Loading is lenient per record: a student record or an encoding with the
//! wrong length or an unreadable shape is skipped and reported, and the rest
//! of the file loads. Only the header must be intact.

use crate::store::{EncodingStore, StoreError};
use crate::types::{Encoding, EncodingSource, Student, StudentId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const FORMAT_NAME: &str = "rollcall-gallery";
pub const FORMAT_VERSION: u32 = 1;

#[derive(Error, Debug)]
pub enum PersistError {
    #[error("{path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed gallery file: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("unsupported gallery format {format:?} version {version}")]
    Unsupported { format: String, version: u32 },
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl PersistError {
    /// True if the file simply does not exist yet.
    pub fn is_not_found(&self) -> bool {
        matches!(self, PersistError::Io { source, .. } if source.kind() == std::io::ErrorKind::NotFound)
    }
}

/// A stored encoding that was skipped while loading.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("student {student_id}, encoding #{position}: {reason}")]
pub struct CorruptEncoding {
    pub student_id: StudentId,
    pub position: usize,
    pub reason: String,
}

/// A stored student record that was skipped while loading, with its encodings.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("student record #{position} ({}): {reason}", .id.as_deref().unwrap_or("no id"))]
pub struct CorruptStudent {
    pub position: usize,
    /// The record's `id`, if it was readable as a string.
    pub id: Option<String>,
    pub reason: String,
}

/// Summary of a load.
#[derive(Debug, Default)]
pub struct LoadReport {
    pub students: usize,
    pub encodings: usize,
    /// Student records skipped because they could not be used.
    pub skipped_students: Vec<CorruptStudent>,
    /// Entries skipped because they could not be used.
    pub skipped: Vec<CorruptEncoding>,
    /// Oldest entries dropped because a gallery exceeded `max_encodings`.
    pub trimmed: usize,
}

#[derive(Deserialize)]
struct Header {
    format: String,
    version: u32,
}

#[derive(Serialize, Deserialize)]
struct GalleryFile<S> {
    format: String,
    version: u32,
    dimension: usize,
    saved_at: DateTime<Utc>,
    students: Vec<S>,
}

#[derive(Serialize, Deserialize)]
struct StudentRecord<E> {
    id: StudentId,
    #[serde(default)]
    name: Option<String>,
    registered_at: DateTime<Utc>,
    encodings: Vec<E>,
}

#[derive(Serialize, Deserialize)]
struct EncodingRecord {
    values: Vec<f32>,
    captured_at: DateTime<Utc>,
    source: EncodingSource,
}

/// Serialize the whole store.
pub fn to_json(store: &EncodingStore) -> Result<String, PersistError> {
    let students = store
        .students()
        .map(|student| StudentRecord {
            id: student.id.clone(),
            name: student.name.clone(),
            registered_at: student.registered_at,
            encodings: store
                .gallery(&student.id)
                .map(|g| {
                    g.iter()
                        .map(|e| EncodingRecord {
                            values: e.values.clone(),
                            captured_at: e.captured_at,
                            source: e.source,
                        })
                        .collect()
                })
                .unwrap_or_default(),
        })
        .collect();

    let file = GalleryFile {
        format: FORMAT_NAME.to_string(),
        version: FORMAT_VERSION,
        dimension: store.dimension(),
        saved_at: Utc::now(),
        students,
    };
    Ok(serde_json::to_string_pretty(&file)?)
}

/// Rebuild a store from its JSON form.
pub fn from_json(
    text: &str,
    dimension: usize,
    max_encodings: usize,
) -> Result<(EncodingStore, LoadReport), PersistError> {
    let header: Header = serde_json::from_str(text)?;
    if header.format != FORMAT_NAME || header.version != FORMAT_VERSION {
        return Err(PersistError::Unsupported {
            format: header.format,
            version: header.version,
        });
    }

    let file: GalleryFile<serde_json::Value> = serde_json::from_str(text)?;
    if file.dimension != dimension {
        tracing::warn!(
            file_dimension = file.dimension,
            dimension,
            "gallery file dimension differs from configured dimension; mismatched entries will be skipped"
        );
    }

    let mut store = EncodingStore::new(dimension, max_encodings)?;
    let mut report = LoadReport::default();

    for (position, raw) in file.students.into_iter().enumerate() {
        let id = raw.get("id").and_then(serde_json::Value::as_str).map(str::to_string);
        let record: StudentRecord<serde_json::Value> = match serde_json::from_value(raw) {
            Ok(record) => record,
            Err(e) => {
                report.skipped_students.push(CorruptStudent {
                    position,
                    id,
                    reason: e.to_string(),
                });
                continue;
            }
        };
        load_student(&mut store, &mut report, record);
    }

    for corrupt in &report.skipped_students {
        tracing::warn!(
            position = corrupt.position,
            id = ?corrupt.id,
            reason = %corrupt.reason,
            "skipping corrupt stored student record"
        );
    }
    for corrupt in &report.skipped {
        tracing::warn!(
            student = %corrupt.student_id,
            position = corrupt.position,
            reason = %corrupt.reason,
            "skipping corrupt stored encoding"
        );
    }

    Ok((store, report))
}

fn load_student(
    store: &mut EncodingStore,
    report: &mut LoadReport,
    record: StudentRecord<serde_json::Value>,
) {
    store.insert_student(Student {
        id: record.id.clone(),
        name: record.name,
        registered_at: record.registered_at,
    });
    report.students += 1;

    for (position, raw) in record.encodings.into_iter().enumerate() {
        let skip = |reason: String| CorruptEncoding {
            student_id: record.id.clone(),
            position,
            reason,
        };
        let entry: EncodingRecord = match serde_json::from_value(raw) {
            Ok(entry) => entry,
            Err(e) => {
                report.skipped.push(skip(e.to_string()));
                continue;
            }
        };
        let encoding = Encoding {
            student_id: record.id.clone(),
            values: entry.values,
            captured_at: entry.captured_at,
            source: entry.source,
        };
        match store.insert_encoding(encoding) {
            Ok(added) if added.evicted.is_some() => report.trimmed += 1,
            Ok(_) => report.encodings += 1,
            Err(e) => report.skipped.push(skip(e.to_string())),
        }
    }
}

/// Load a gallery file.
pub fn load(
    path: &Path,
    dimension: usize,
    max_encodings: usize,
) -> Result<(EncodingStore, LoadReport), PersistError> {
    let text = std::fs::read_to_string(path).map_err(|source| PersistError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let (store, report) = from_json(&text, dimension, max_encodings)?;
    tracing::info!(
        path = %path.display(),
        students = report.students,
        encodings = report.encodings,
        skipped_students = report.skipped_students.len(),
        skipped = report.skipped.len(),
        trimmed = report.trimmed,
        "gallery loaded"
    );
    Ok((store, report))
}

/// Write the store atomically: a temp file next to `path`, then rename.
pub fn save(store: &EncodingStore, path: &Path) -> Result<(), PersistError> {
    let io_err = |source: std::io::Error| PersistError::Io {
        path: path.to_path_buf(),
        source,
    };
    let json = to_json(store)?;

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(io_err)?;
    }
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "gallery.json".to_string());
    let tmp = path.with_file_name(format!(".{file_name}.tmp"));

    std::fs::write(&tmp, json).map_err(io_err)?;
    std::fs::rename(&tmp, path).map_err(io_err)?;

    tracing::debug!(
        path = %path.display(),
        version = store.version(),
        "gallery saved"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_store() -> EncodingStore {
        let mut store = EncodingStore::new(3, 3).unwrap();
        store.register_student("2".into(), Some("Grace".into()));
        for x in [0.25, -1.5, 3.125, 7.0] {
            store
                .add_encoding(&"2".into(), vec![x, 0.1, 0.2], EncodingSource::Adaptive)
                .unwrap();
        }
        store
            .add_encoding(&"10".into(), vec![0.333, 0.666, 0.999], EncodingSource::Registration)
            .unwrap();
        store
    }

    #[test]
    fn test_round_trip_preserves_galleries() {
        let store = sample_store();
        let json = to_json(&store).unwrap();
        let (loaded, report) = from_json(&json, 3, 3).unwrap();

        assert!(report.skipped.is_empty());
        assert_eq!(report.students, 2);
        assert_eq!(report.encodings, 4);
        assert_eq!(loaded.len(), store.len());
        for student in store.students() {
            assert_eq!(loaded.student(&student.id), Some(student));
            assert_eq!(loaded.gallery(&student.id), store.gallery(&student.id));
        }
        let order: Vec<f32> = loaded.gallery(&"2".into()).unwrap().iter().map(|e| e.values[0]).collect();
        assert_eq!(order, vec![-1.5, 3.125, 7.0]);
    }

    #[test]
    fn test_save_and_load_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("gallery.json");
        let store = sample_store();

        save(&store, &path).unwrap();
        let (loaded, _) = load(&path, 3, 3).unwrap();
        assert_eq!(loaded.gallery(&"10".into()), store.gallery(&"10".into()));
        assert!(!dir.path().join("nested").join(".gallery.json.tmp").exists());
    }

    #[test]
    fn test_load_missing_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let err = load(&dir.path().join("absent.json"), 3, 3).unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_skips_mismatched_entries() {
        let json = r#"{
            "format": "rollcall-gallery",
            "version": 1,
            "dimension": 2,
            "saved_at": "2026-01-01T00:00:00Z",
            "students": [{
                "id": "a",
                "registered_at": "2026-01-01T00:00:00Z",
                "encodings": [
                    {"values": [1.0, 2.0], "captured_at": "2026-01-01T00:00:01Z", "source": "registration"},
                    {"values": [1.0, 2.0, 3.0], "captured_at": "2026-01-01T00:00:02Z", "source": "adaptive"},
                    {"values": "garbage", "captured_at": "2026-01-01T00:00:03Z", "source": "adaptive"},
                    {"values": [3.0, 4.0], "captured_at": "2026-01-01T00:00:04Z", "source": "adaptive"}
                ]
            }]
        }"#;
        let (store, report) = from_json(json, 2, 10).unwrap();
        assert_eq!(report.encodings, 2);
        assert_eq!(report.skipped.len(), 2);
        assert_eq!(report.skipped[0].position, 1);
        assert_eq!(report.skipped[1].position, 2);

        let firsts: Vec<f32> = store.gallery(&"a".into()).unwrap().iter().map(|e| e.values[0]).collect();
        assert_eq!(firsts, vec![1.0, 3.0]);
    }

    #[test]
    fn test_skips_corrupt_student_records() {
        let json = r#"{
            "format": "rollcall-gallery",
            "version": 1,
            "dimension": 2,
            "saved_at": "2026-01-01T00:00:00Z",
            "students": [
                {"id": "a", "registered_at": "2026-01-01T00:00:00Z",
                 "encodings": [{"values": [1.0, 2.0], "captured_at": "2026-01-01T00:00:01Z", "source": "registration"}]},
                {"id": "b", "registered_at": "not-a-date", "encodings": []},
                {"id": 7, "registered_at": "2026-01-01T00:00:00Z", "encodings": []},
                "garbage",
                {"id": "c", "registered_at": "2026-01-01T00:00:00Z", "encodings": []}
            ]
        }"#;
        let (store, report) = from_json(json, 2, 10).unwrap();

        assert_eq!(report.students, 2);
        assert_eq!(report.encodings, 1);
        let skipped: Vec<(usize, Option<&str>)> = report
            .skipped_students
            .iter()
            .map(|c| (c.position, c.id.as_deref()))
            .collect();
        assert_eq!(skipped, vec![(1, Some("b")), (2, None), (3, None)]);

        assert_eq!(store.gallery(&"a".into()).unwrap().len(), 1);
        assert!(store.student(&"b".into()).is_none());
        assert!(store.student(&"c".into()).is_some());
    }

    #[test]
    fn test_zero_dimension_is_an_error() {
        let json = to_json(&sample_store()).unwrap();
        assert!(matches!(
            from_json(&json, 0, 3),
            Err(PersistError::Store(StoreError::ZeroDimension))
        ));
    }

    #[test]
    fn test_trims_oversized_gallery_to_newest() {
        let store = sample_store();
        let json = to_json(&store).unwrap();
        let (loaded, report) = from_json(&json, 3, 2).unwrap();
        assert_eq!(report.trimmed, 1);
        let order: Vec<f32> = loaded.gallery(&"2".into()).unwrap().iter().map(|e| e.values[0]).collect();
        assert_eq!(order, vec![3.125, 7.0]);
    }

    #[test]
    fn test_rejects_unknown_version() {
        let json = r#"{"format": "rollcall-gallery", "version": 99}"#;
        assert!(matches!(
            from_json(json, 3, 3),
            Err(PersistError::Unsupported { version: 99, .. })
        ));
    }

    #[test]
    fn test_rejects_foreign_format() {
        let json = r#"{"format": "something-else", "version": 1}"#;
        assert!(matches!(from_json(json, 3, 3), Err(PersistError::Unsupported { .. })));
    }

    #[test]
    fn test_rejects_non_json() {
        assert!(matches!(from_json("not json", 3, 3), Err(PersistError::Malformed(_))));
    }
}
