use chrono::{DateTime, Utc};
use rollcall_core::StudentId;
use serde::Serialize;
use std::collections::VecDeque;
use uuid::Uuid;

/// A low-confidence match waiting for an operator to confirm or reject it.
#[derive(Debug, Clone, Serialize)]
pub struct PendingConfirmation {
    pub id: Uuid,
    /// Student the matcher proposed.
    pub student_id: StudentId,
    pub confidence: f32,
    /// The probe vector, kept so a confirmation can be learned from.
    #[serde(skip)]
    pub probe: Vec<f32>,
    pub created_at: DateTime<Utc>,
}

/// Bounded FIFO of pending confirmations. When full, the oldest entry is dropped.
pub struct PendingQueue {
    entries: VecDeque<PendingConfirmation>,
    capacity: usize,
}

impl PendingQueue {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, student_id: StudentId, confidence: f32, probe: Vec<f32>) -> Uuid {
        if self.entries.len() == self.capacity {
            if let Some(dropped) = self.entries.pop_front() {
                tracing::warn!(
                    id = %dropped.id,
                    student = %dropped.student_id,
                    "pending queue full; dropping oldest unconfirmed match"
                );
            }
        }
        let id = Uuid::new_v4();
        self.entries.push_back(PendingConfirmation {
            id,
            student_id,
            confidence,
            probe,
            created_at: Utc::now(),
        });
        id
    }

    /// Remove and return an entry.
    pub fn take(&mut self, id: &Uuid) -> Option<PendingConfirmation> {
        let pos = self.entries.iter().position(|p| &p.id == id)?;
        self.entries.remove(pos)
    }

    /// Drop every entry proposing `student_id`. Returns how many were dropped.
    pub fn forget_student(&mut self, student_id: &StudentId) -> usize {
        let before = self.entries.len();
        self.entries.retain(|p| &p.student_id != student_id);
        before - self.entries.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PendingConfirmation> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_and_take() {
        let mut q = PendingQueue::new(4);
        let id = q.push("s".into(), 55.0, vec![0.1, 0.2]);
        assert_eq!(q.len(), 1);
        let entry = q.take(&id).unwrap();
        assert_eq!(entry.student_id, StudentId::from("s"));
        assert_eq!(entry.probe, vec![0.1, 0.2]);
        assert!(q.take(&id).is_none());
    }

    #[test]
    fn test_full_queue_drops_oldest() {
        let mut q = PendingQueue::new(2);
        let first = q.push("a".into(), 51.0, vec![]);
        let second = q.push("b".into(), 52.0, vec![]);
        let third = q.push("c".into(), 53.0, vec![]);
        assert_eq!(q.len(), 2);
        assert!(q.take(&first).is_none());
        assert!(q.take(&second).is_some());
        assert!(q.take(&third).is_some());
    }

    #[test]
    fn test_forget_student() {
        let mut q = PendingQueue::new(8);
        q.push("a".into(), 51.0, vec![]);
        q.push("b".into(), 52.0, vec![]);
        q.push("a".into(), 53.0, vec![]);
        assert_eq!(q.forget_student(&"a".into()), 2);
        assert_eq!(q.iter().count(), 1);
    }

    #[test]
    fn test_probe_not_serialized() {
        let mut q = PendingQueue::new(1);
        q.push("a".into(), 51.0, vec![9.0]);
        let json = serde_json::to_value(q.iter().next().unwrap()).unwrap();
        assert!(json.get("probe").is_none());
        assert_eq!(json["student_id"], "a");
    }
}
