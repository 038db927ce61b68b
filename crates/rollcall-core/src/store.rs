//! Encoding store: per-student bounded galleries with copy-on-write snapshots.

use crate::config::ConfigError;
use crate::types::{Encoding, EncodingSource, Student, StudentId};
use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    #[error("dimension mismatch: got {got}, want {want}")]
    DimensionMismatch { got: usize, want: usize },
    #[error("vector component {index} is not finite")]
    NonFinite { index: usize },
    #[error("store dimension must be positive")]
    ZeroDimension,
    #[error("max_encodings must be at least 1")]
    ZeroCapacity,
}

/// Check that a vector has the store's dimensionality and only finite components.
pub fn validate_vector(values: &[f32], dimension: usize) -> Result<(), StoreError> {
    if values.len() != dimension {
        return Err(StoreError::DimensionMismatch {
            got: values.len(),
            want: dimension,
        });
    }
    if let Some(index) = values.iter().position(|v| !v.is_finite()) {
        return Err(StoreError::NonFinite { index });
    }
    Ok(())
}

/// Fixed-capacity ring buffer of encodings, oldest first.
///
/// Once full, `head` is the slot of the oldest entry and the next one to be
/// overwritten.
#[derive(Debug, Clone)]
pub struct Gallery {
    slots: Vec<Encoding>,
    head: usize,
    capacity: usize,
}

impl Gallery {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: Vec::new(),
            head: 0,
            capacity: capacity.max(1),
        }
    }

    /// Append an encoding, returning the evicted oldest entry if the gallery was full.
    pub fn push(&mut self, encoding: Encoding) -> Option<Encoding> {
        if self.slots.len() < self.capacity {
            self.slots.push(encoding);
            return None;
        }
        let evicted = std::mem::replace(&mut self.slots[self.head], encoding);
        self.head = (self.head + 1) % self.capacity;
        Some(evicted)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Entries in insertion order, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &Encoding> {
        let (newer, older) = self.slots.split_at(self.head);
        older.iter().chain(newer.iter())
    }

    /// Smallest distance between `probe` and any entry, or `None` if empty.
    pub fn min_distance(&self, probe: &[f32]) -> Option<f32> {
        self.slots
            .iter()
            .map(|e| e.distance_to(probe))
            .fold(None, |best, d| match best {
                Some(b) if b <= d => Some(b),
                _ => Some(d),
            })
    }

    /// Change capacity, keeping the newest entries. Returns how many were evicted.
    pub fn resize(&mut self, capacity: usize) -> usize {
        let capacity = capacity.max(1);
        let mut ordered = std::mem::take(&mut self.slots);
        ordered.rotate_left(self.head);
        let evicted = ordered.len().saturating_sub(capacity);
        ordered.drain(..evicted);
        self.slots = ordered;
        self.head = 0;
        self.capacity = capacity;
        evicted
    }
}

impl PartialEq for Gallery {
    fn eq(&self, other: &Self) -> bool {
        self.len() == other.len() && self.iter().eq(other.iter())
    }
}

/// Immutable view of every gallery at one store version.
///
/// Galleries are shared with the store; a later mutation copies the affected
/// gallery instead of changing it under an existing snapshot.
#[derive(Debug, Clone)]
pub struct StoreSnapshot {
    version: u64,
    dimension: usize,
    galleries: BTreeMap<StudentId, Arc<Gallery>>,
}

impl StoreSnapshot {
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn is_empty(&self) -> bool {
        self.galleries.values().all(|g| g.is_empty())
    }

    /// Galleries in ascending student ID order.
    pub fn galleries(&self) -> impl Iterator<Item = (&StudentId, &Gallery)> {
        self.galleries.iter().map(|(id, g)| (id, g.as_ref()))
    }

    pub fn gallery(&self, id: &StudentId) -> Option<&Gallery> {
        self.galleries.get(id).map(Arc::as_ref)
    }
}

/// Result of a successful [`EncodingStore::add_encoding`].
#[derive(Debug, Clone)]
pub struct AddOutcome {
    pub gallery_len: usize,
    pub evicted: Option<Encoding>,
}

/// Owner of all encodings. Every mutation goes through `&mut self`, so a single
/// owner serializes writers.
#[derive(Debug)]
pub struct EncodingStore {
    dimension: usize,
    max_encodings: usize,
    students: BTreeMap<StudentId, Student>,
    galleries: BTreeMap<StudentId, Arc<Gallery>>,
    version: u64,
}

impl EncodingStore {
    /// Create an empty store.
    pub fn new(dimension: usize, max_encodings: usize) -> Result<Self, StoreError> {
        if dimension == 0 {
            return Err(StoreError::ZeroDimension);
        }
        if max_encodings == 0 {
            return Err(StoreError::ZeroCapacity);
        }
        Ok(Self {
            dimension,
            max_encodings,
            students: BTreeMap::new(),
            galleries: BTreeMap::new(),
            version: 0,
        })
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn max_encodings(&self) -> usize {
        self.max_encodings
    }

    /// Monotonic counter, bumped by every mutation.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Number of registered students.
    pub fn len(&self) -> usize {
        self.students.len()
    }

    pub fn is_empty(&self) -> bool {
        self.students.is_empty()
    }

    /// Total stored encodings across all galleries.
    pub fn encoding_count(&self) -> usize {
        self.galleries.values().map(|g| g.len()).sum()
    }

    pub fn students(&self) -> impl Iterator<Item = &Student> {
        self.students.values()
    }

    pub fn student(&self, id: &StudentId) -> Option<&Student> {
        self.students.get(id)
    }

    pub fn gallery(&self, id: &StudentId) -> Option<&Gallery> {
        self.galleries.get(id).map(Arc::as_ref)
    }

    /// Register a student, or update the display name of an existing one.
    /// Returns `true` if the student is new.
    pub fn register_student(&mut self, id: StudentId, name: Option<String>) -> bool {
        self.version += 1;
        if let Some(existing) = self.students.get_mut(&id) {
            if name.is_some() {
                existing.name = name;
            }
            return false;
        }
        self.insert_student(Student {
            id,
            name,
            registered_at: Utc::now(),
        });
        true
    }

    /// Append a vector to a student's gallery, evicting the oldest entry on overflow.
    /// Registers the student if unknown.
    pub fn add_encoding(
        &mut self,
        student_id: &StudentId,
        values: Vec<f32>,
        source: EncodingSource,
    ) -> Result<AddOutcome, StoreError> {
        validate_vector(&values, self.dimension)?;
        self.push_encoding(Encoding {
            student_id: student_id.clone(),
            values,
            captured_at: Utc::now(),
            source,
        })
    }

    /// Insert a fully formed encoding, keeping its timestamp. Used when loading.
    pub(crate) fn insert_encoding(&mut self, encoding: Encoding) -> Result<AddOutcome, StoreError> {
        validate_vector(&encoding.values, self.dimension)?;
        self.push_encoding(encoding)
    }

    pub(crate) fn insert_student(&mut self, student: Student) {
        self.galleries
            .entry(student.id.clone())
            .or_insert_with(|| Arc::new(Gallery::with_capacity(self.max_encodings)));
        self.students.insert(student.id.clone(), student);
    }

    fn push_encoding(&mut self, encoding: Encoding) -> Result<AddOutcome, StoreError> {
        let id = encoding.student_id.clone();
        if !self.students.contains_key(&id) {
            self.insert_student(Student {
                id: id.clone(),
                name: None,
                registered_at: encoding.captured_at,
            });
        }
        let max = self.max_encodings;
        let gallery = self
            .galleries
            .entry(id.clone())
            .or_insert_with(|| Arc::new(Gallery::with_capacity(max)));

        // Copies the gallery only if a snapshot still holds it.
        let gallery = Arc::make_mut(gallery);
        let evicted = gallery.push(encoding);
        let gallery_len = gallery.len();
        self.version += 1;

        if let Some(old) = &evicted {
            tracing::debug!(
                student = %id,
                evicted_at = %old.captured_at,
                gallery_len,
                "gallery full; evicted oldest encoding"
            );
        }

        Ok(AddOutcome {
            gallery_len,
            evicted,
        })
    }

    /// Remove a student and their gallery. Idempotent; returns whether anything was removed.
    pub fn remove_student(&mut self, id: &StudentId) -> bool {
        let had_student = self.students.remove(id).is_some();
        let had_gallery = self.galleries.remove(id).is_some();
        let removed = had_student || had_gallery;
        if removed {
            self.version += 1;
        }
        removed
    }

    /// Change per-student capacity, trimming galleries to their newest entries.
    /// Returns the number of evicted encodings.
    pub fn set_max_encodings(&mut self, max_encodings: usize) -> Result<usize, ConfigError> {
        if max_encodings == 0 {
            return Err(ConfigError::ZeroCapacity);
        }
        if max_encodings == self.max_encodings {
            return Ok(0);
        }
        let mut evicted = 0;
        for gallery in self.galleries.values_mut() {
            evicted += Arc::make_mut(gallery).resize(max_encodings);
        }
        self.max_encodings = max_encodings;
        self.version += 1;
        tracing::info!(max_encodings, evicted, "gallery capacity changed");
        Ok(evicted)
    }

    /// Immutable view of the current galleries.
    pub fn snapshot(&self) -> StoreSnapshot {
        StoreSnapshot {
            version: self.version,
            dimension: self.dimension,
            galleries: self.galleries.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vec3(x: f32) -> Vec<f32> {
        vec![x, 0.0, 0.0]
    }

    fn values(gallery: &Gallery) -> Vec<f32> {
        gallery.iter().map(|e| e.values[0]).collect()
    }

    #[test]
    fn test_new_rejects_zero_sizes() {
        assert_eq!(EncodingStore::new(0, 5).unwrap_err(), StoreError::ZeroDimension);
        assert_eq!(EncodingStore::new(3, 0).unwrap_err(), StoreError::ZeroCapacity);
    }

    #[test]
    fn test_add_rejects_wrong_dimension() {
        let mut store = EncodingStore::new(3, 5).unwrap();
        let err = store
            .add_encoding(&"s".into(), vec![1.0, 2.0], EncodingSource::Registration)
            .unwrap_err();
        assert_eq!(err, StoreError::DimensionMismatch { got: 2, want: 3 });
        assert_eq!(store.version(), 0);
        assert!(store.is_empty());
    }

    #[test]
    fn test_add_rejects_non_finite() {
        let mut store = EncodingStore::new(3, 5).unwrap();
        let err = store
            .add_encoding(&"s".into(), vec![0.0, f32::NAN, 0.0], EncodingSource::Adaptive)
            .unwrap_err();
        assert_eq!(err, StoreError::NonFinite { index: 1 });
    }

    #[test]
    fn test_fifo_eviction_keeps_newest_in_order() {
        let mut store = EncodingStore::new(3, 3).unwrap();
        let s = StudentId::from("S");
        for x in [1.0, 2.0, 3.0, 4.0] {
            store.add_encoding(&s, vec3(x), EncodingSource::Adaptive).unwrap();
        }
        assert_eq!(values(store.gallery(&s).unwrap()), vec![2.0, 3.0, 4.0]);
    }

    #[test]
    fn test_gallery_bounded_over_many_additions() {
        let mut store = EncodingStore::new(3, 4).unwrap();
        let s = StudentId::from("S");
        for i in 0..23 {
            let out = store
                .add_encoding(&s, vec3(i as f32), EncodingSource::Adaptive)
                .unwrap();
            assert!(out.gallery_len <= 4);
            assert_eq!(out.evicted.is_some(), i >= 4);
        }
        assert_eq!(values(store.gallery(&s).unwrap()), vec![19.0, 20.0, 21.0, 22.0]);
    }

    #[test]
    fn test_add_registers_student() {
        let mut store = EncodingStore::new(3, 2).unwrap();
        store
            .add_encoding(&"7".into(), vec3(1.0), EncodingSource::Registration)
            .unwrap();
        assert_eq!(store.len(), 1);
        assert!(store.student(&"7".into()).unwrap().name.is_none());
    }

    #[test]
    fn test_version_bumps_on_mutation() {
        let mut store = EncodingStore::new(3, 2).unwrap();
        let s = StudentId::from("a");
        store.add_encoding(&s, vec3(1.0), EncodingSource::Adaptive).unwrap();
        let v1 = store.version();
        store.add_encoding(&s, vec3(2.0), EncodingSource::Adaptive).unwrap();
        assert!(store.version() > v1);
    }

    #[test]
    fn test_remove_student_idempotent() {
        let mut store = EncodingStore::new(3, 2).unwrap();
        let s = StudentId::from("a");
        store.add_encoding(&s, vec3(1.0), EncodingSource::Adaptive).unwrap();
        assert!(store.remove_student(&s));
        let v = store.version();
        assert!(!store.remove_student(&s));
        assert_eq!(store.version(), v);
        assert!(store.gallery(&s).is_none());
        assert!(store.student(&s).is_none());
    }

    #[test]
    fn test_snapshot_is_stable_across_mutation() {
        let mut store = EncodingStore::new(3, 2).unwrap();
        let s = StudentId::from("a");
        store.add_encoding(&s, vec3(1.0), EncodingSource::Adaptive).unwrap();
        let snap = store.snapshot();

        store.add_encoding(&s, vec3(2.0), EncodingSource::Adaptive).unwrap();
        store.add_encoding(&s, vec3(3.0), EncodingSource::Adaptive).unwrap();
        store.remove_student(&"missing".into());

        assert_eq!(values(snap.gallery(&s).unwrap()), vec![1.0]);
        assert_eq!(values(store.gallery(&s).unwrap()), vec![2.0, 3.0]);
        assert!(snap.version() < store.version());
    }

    #[test]
    fn test_snapshot_survives_removal() {
        let mut store = EncodingStore::new(3, 2).unwrap();
        let s = StudentId::from("a");
        store.add_encoding(&s, vec3(1.0), EncodingSource::Adaptive).unwrap();
        let snap = store.snapshot();
        store.remove_student(&s);
        assert!(snap.gallery(&s).is_some());
        assert!(store.snapshot().gallery(&s).is_none());
    }

    #[test]
    fn test_set_max_encodings_trims_to_newest() {
        let mut store = EncodingStore::new(3, 5).unwrap();
        let s = StudentId::from("a");
        for x in 1..=5 {
            store.add_encoding(&s, vec3(x as f32), EncodingSource::Adaptive).unwrap();
        }
        // Wrap the ring so head is not at 0.
        store.add_encoding(&s, vec3(6.0), EncodingSource::Adaptive).unwrap();

        let evicted = store.set_max_encodings(2).unwrap();
        assert_eq!(evicted, 3);
        assert_eq!(values(store.gallery(&s).unwrap()), vec![5.0, 6.0]);

        store.add_encoding(&s, vec3(7.0), EncodingSource::Adaptive).unwrap();
        assert_eq!(values(store.gallery(&s).unwrap()), vec![6.0, 7.0]);
    }

    #[test]
    fn test_set_max_encodings_grow_keeps_entries() {
        let mut store = EncodingStore::new(3, 2).unwrap();
        let s = StudentId::from("a");
        for x in 1..=3 {
            store.add_encoding(&s, vec3(x as f32), EncodingSource::Adaptive).unwrap();
        }
        assert_eq!(store.set_max_encodings(4).unwrap(), 0);
        store.add_encoding(&s, vec3(4.0), EncodingSource::Adaptive).unwrap();
        assert_eq!(values(store.gallery(&s).unwrap()), vec![2.0, 3.0, 4.0]);
    }

    #[test]
    fn test_set_max_encodings_rejects_zero() {
        let mut store = EncodingStore::new(3, 2).unwrap();
        assert_eq!(store.set_max_encodings(0), Err(ConfigError::ZeroCapacity));
        assert_eq!(store.max_encodings(), 2);
    }

    #[test]
    fn test_mixed_ids_are_distinct_keys() {
        let mut store = EncodingStore::new(2, 5).unwrap();
        for id in ["1a", "2", "10"] {
            store
                .add_encoding(&id.into(), vec![0.0, 0.0], EncodingSource::Registration)
                .unwrap();
        }
        store
            .add_encoding(&"2".into(), vec![1.0, 0.0], EncodingSource::Adaptive)
            .unwrap();

        assert_eq!(store.len(), 3);
        assert_eq!(store.gallery(&"2".into()).unwrap().len(), 2);
        assert_eq!(store.gallery(&"10".into()).unwrap().len(), 1);
        assert_eq!(store.gallery(&"1a".into()).unwrap().len(), 1);

        let snap = store.snapshot();
        let order: Vec<&str> = snap.galleries().map(|(id, _)| id.as_str()).collect();
        assert_eq!(order, vec!["2", "10", "1a"]);
        assert_eq!(snap.gallery(&"2".into()).unwrap().len(), 2);
    }

    #[test]
    fn test_register_updates_name() {
        let mut store = EncodingStore::new(3, 2).unwrap();
        assert!(store.register_student("a".into(), None));
        assert!(!store.register_student("a".into(), Some("Ada".into())));
        assert_eq!(store.student(&"a".into()).unwrap().name.as_deref(), Some("Ada"));
    }

    #[test]
    fn test_min_distance() {
        let mut gallery = Gallery::with_capacity(3);
        assert_eq!(gallery.min_distance(&[0.0, 0.0, 0.0]), None);
        for x in [3.0, 1.0, 2.0] {
            gallery.push(Encoding {
                student_id: "a".into(),
                values: vec3(x),
                captured_at: Utc::now(),
                source: EncodingSource::Adaptive,
            });
        }
        assert_eq!(gallery.min_distance(&[0.0, 0.0, 0.0]), Some(1.0));
    }
}
