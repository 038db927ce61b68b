use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// Opaque student identifier.
///
/// IDs that parse as unsigned integers sort numerically and come before all
/// other IDs, which sort lexicographically. Numerically equal IDs with
/// different spellings ("01" vs "1") fall back to string order so that `Ord`
/// stays consistent with `Eq`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StudentId(String);

impl StudentId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn order_key(&self) -> OrderKey {
        self.0.parse::<u64>().map_or(OrderKey::Text, OrderKey::Numeric)
    }
}

/// Primary sort class of an ID. Variant order is significant.
#[derive(PartialEq, Eq, PartialOrd, Ord)]
enum OrderKey {
    Numeric(u64),
    Text,
}

impl Ord for StudentId {
    fn cmp(&self, other: &Self) -> Ordering {
        self.order_key()
            .cmp(&other.order_key())
            .then_with(|| self.0.cmp(&other.0))
    }
}

impl PartialOrd for StudentId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for StudentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for StudentId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for StudentId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<u64> for StudentId {
    fn from(n: u64) -> Self {
        Self(n.to_string())
    }
}

/// A registered student. Galleries reference students by ID only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Student {
    pub id: StudentId,
    /// Display name, if the registering surface supplied one.
    pub name: Option<String>,
    pub registered_at: DateTime<Utc>,
}

/// How an encoding entered the gallery. Metadata only: eviction is FIFO
/// regardless of source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EncodingSource {
    Registration,
    Adaptive,
}

/// One stored face feature vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Encoding {
    pub student_id: StudentId,
    pub values: Vec<f32>,
    pub captured_at: DateTime<Utc>,
    pub source: EncodingSource,
}

impl Encoding {
    /// Euclidean distance between this encoding and a probe vector.
    pub fn distance_to(&self, probe: &[f32]) -> f32 {
        euclidean_distance(&self.values, probe)
    }
}

/// Compute Euclidean distance between two vectors of equal length.
pub fn euclidean_distance(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y).powi(2))
        .sum::<f32>()
        .sqrt()
}

/// Confidence tier of a match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    /// Confident enough to auto-confirm.
    High,
    /// Plausible; needs manual confirmation.
    Low,
    /// Not recognized.
    Unknown,
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Tier::High => "high",
            Tier::Low => "low",
            Tier::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// Outcome of matching one probe against the gallery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchResult {
    /// Best-matching student; always `None` for [`Tier::Unknown`].
    pub student_id: Option<StudentId>,
    /// Percentage in [0, 100].
    pub confidence: f32,
    pub tier: Tier,
}

impl MatchResult {
    /// The result for a probe with no candidate at all.
    pub fn unknown() -> Self {
        Self {
            student_id: None,
            confidence: 0.0,
            tier: Tier::Unknown,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_euclidean_distance_identical() {
        assert_eq!(euclidean_distance(&[0.3, -0.2, 0.9], &[0.3, -0.2, 0.9]), 0.0);
    }

    #[test]
    fn test_euclidean_distance_known() {
        let d = euclidean_distance(&[0.0, 0.0], &[3.0, 4.0]);
        assert!((d - 5.0).abs() < 1e-6);
    }

    #[test]
    fn test_student_id_numeric_order() {
        assert!(StudentId::from("2") < StudentId::from("10"));
        assert!(StudentId::from(9) < StudentId::from(11));
    }

    #[test]
    fn test_student_id_lexicographic_order() {
        assert!(StudentId::from("alice") < StudentId::from("bob"));
        assert!(StudentId::from("1a") < StudentId::from("9a"));
    }

    #[test]
    fn test_student_id_numeric_before_text() {
        assert!(StudentId::from("10") < StudentId::from("1a"));
        assert!(StudentId::from("999") < StudentId::from("a"));
    }

    #[test]
    fn test_student_id_mixed_order_is_transitive() {
        let mut ids: Vec<StudentId> = ["1a", "2", "10", "b", "01", "1"]
            .into_iter()
            .map(StudentId::from)
            .collect();
        ids.sort();
        let sorted: Vec<&str> = ids.iter().map(|id| id.as_str()).collect();
        assert_eq!(sorted, vec!["01", "1", "2", "10", "1a", "b"]);

        for a in &ids {
            for b in &ids {
                for c in &ids {
                    if a < b && b < c {
                        assert!(a < c, "{a} < {b} < {c} but not {a} < {c}");
                    }
                }
            }
        }
    }

    #[test]
    fn test_student_id_ord_agrees_with_eq() {
        let a = StudentId::from("01");
        let b = StudentId::from("1");
        assert_ne!(a, b);
        assert_ne!(a.cmp(&b), Ordering::Equal);
    }

    #[test]
    fn test_student_id_serializes_as_string() {
        let json = serde_json::to_string(&StudentId::from("42")).unwrap();
        assert_eq!(json, "\"42\"");
    }

    #[test]
    fn test_unknown_result() {
        let r = MatchResult::unknown();
        assert_eq!(r.student_id, None);
        assert_eq!(r.confidence, 0.0);
        assert_eq!(r.tier, Tier::Unknown);
    }
}
