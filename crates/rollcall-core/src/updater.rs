//! Adaptive learning: growing galleries from confirmed matches.

use crate::config::EngineConfig;
use crate::store::{EncodingStore, StoreError};
use crate::types::{EncodingSource, MatchResult, StudentId, Tier};

/// What the updater did with one probe.
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateOutcome {
    /// The probe was appended to the student's gallery.
    Learned {
        student_id: StudentId,
        gallery_len: usize,
        evicted: bool,
    },
    /// Low tier: held back until someone confirms the identity.
    AwaitingConfirmation,
    /// Confirmed, but adaptive learning is switched off.
    LearningDisabled,
    /// Unknown tier: never learned from.
    Ignored,
}

impl UpdateOutcome {
    pub fn is_learned(&self) -> bool {
        matches!(self, UpdateOutcome::Learned { .. })
    }
}

/// Applies the gallery update policy. Holds no state of its own.
#[derive(Debug, Clone, Copy, Default)]
pub struct AdaptiveUpdater;

impl AdaptiveUpdater {
    /// Apply the automatic policy to a fresh match result.
    ///
    /// Only High results are learned, and only with adaptive learning on.
    pub fn apply(
        &self,
        store: &mut EncodingStore,
        result: &MatchResult,
        probe: &[f32],
        config: &EngineConfig,
    ) -> Result<UpdateOutcome, StoreError> {
        match (result.tier, &result.student_id) {
            (Tier::High, Some(student_id)) => self.learn(store, student_id, probe, config),
            (Tier::Low, _) => Ok(UpdateOutcome::AwaitingConfirmation),
            _ => Ok(UpdateOutcome::Ignored),
        }
    }

    /// Record a probe whose identity was confirmed outside the engine.
    pub fn confirm(
        &self,
        store: &mut EncodingStore,
        student_id: &StudentId,
        probe: &[f32],
        config: &EngineConfig,
    ) -> Result<UpdateOutcome, StoreError> {
        self.learn(store, student_id, probe, config)
    }

    fn learn(
        &self,
        store: &mut EncodingStore,
        student_id: &StudentId,
        probe: &[f32],
        config: &EngineConfig,
    ) -> Result<UpdateOutcome, StoreError> {
        if !config.adaptive_learning {
            return Ok(UpdateOutcome::LearningDisabled);
        }
        let added = store.add_encoding(student_id, probe.to_vec(), EncodingSource::Adaptive)?;
        tracing::debug!(
            student = %student_id,
            gallery_len = added.gallery_len,
            evicted = added.evicted.is_some(),
            "adaptive encoding added"
        );
        Ok(UpdateOutcome::Learned {
            student_id: student_id.clone(),
            gallery_len: added.gallery_len,
            evicted: added.evicted.is_some(),
        })
    }
}
