//! Nearest-match search over a store snapshot.

use crate::store::StoreSnapshot;
use crate::types::StudentId;
use std::cmp::Ordering;

/// Best-of-gallery distance for one student.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    /// `None` when the snapshot held no encodings at all.
    pub student_id: Option<StudentId>,
    /// Euclidean distance; `+inf` when there is no candidate.
    pub distance: f32,
}

impl Candidate {
    pub fn none() -> Self {
        Self {
            student_id: None,
            distance: f32::INFINITY,
        }
    }

    pub fn is_none(&self) -> bool {
        self.student_id.is_none()
    }

    /// Ascending distance, then ascending student ID.
    fn rank_cmp(&self, other: &Self) -> Ordering {
        self.distance
            .total_cmp(&other.distance)
            .then_with(|| self.student_id.cmp(&other.student_id))
    }
}

/// Strategy for finding the closest student to a probe.
///
/// Implementations receive a probe that has already been validated against
/// the snapshot's dimension.
pub trait Matcher: Send + Sync {
    /// Every student with at least one encoding, closest first.
    /// Equal distances are ordered by ascending student ID.
    fn rank(&self, probe: &[f32], snapshot: &StoreSnapshot) -> Vec<Candidate>;

    /// The top-ranked student, or [`Candidate::none`] for an empty snapshot.
    fn find_best_match(&self, probe: &[f32], snapshot: &StoreSnapshot) -> Candidate {
        self.rank(probe, snapshot)
            .into_iter()
            .next()
            .unwrap_or_else(Candidate::none)
    }
}

/// Brute-force Euclidean matcher. Cost is linear in the number of stored
/// encodings times the vector dimension.
#[derive(Debug, Clone, Copy, Default)]
pub struct EuclideanMatcher;

impl Matcher for EuclideanMatcher {
    fn rank(&self, probe: &[f32], snapshot: &StoreSnapshot) -> Vec<Candidate> {
        let mut ranked: Vec<Candidate> = snapshot
            .galleries()
            .filter_map(|(id, gallery)| {
                gallery.min_distance(probe).map(|distance| Candidate {
                    student_id: Some(id.clone()),
                    distance,
                })
            })
            .collect();
        ranked.sort_by(Candidate::rank_cmp);
        ranked
    }

    fn find_best_match(&self, probe: &[f32], snapshot: &StoreSnapshot) -> Candidate {
        let mut best: Option<Candidate> = None;

        // Galleries iterate in ascending ID order, so a strict comparison keeps
        // the smaller ID on ties.
        for (id, gallery) in snapshot.galleries() {
            let Some(distance) = gallery.min_distance(probe) else {
                continue;
            };
            let better = match &best {
                None => true,
                Some(b) => distance.total_cmp(&b.distance) == Ordering::Less,
            };
            if better {
                best = Some(Candidate {
                    student_id: Some(id.clone()),
                    distance,
                });
            }
        }

        best.unwrap_or_else(Candidate::none)
    }
}
