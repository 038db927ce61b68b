//! Per-frame coordination: match, classify and learn for every face in a frame.

use crate::classifier::classify_candidate;
use crate::config::{ConfigError, EngineConfig};
use crate::embedder::{EmbedError, Embedder};
use crate::matcher::{EuclideanMatcher, Matcher};
use crate::store::{validate_vector, EncodingStore, StoreError};
use crate::types::{EncodingSource, MatchResult, StudentId};
use crate::updater::{AdaptiveUpdater, UpdateOutcome};
use image::GrayImage;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("probe {index}: {source}")]
    InvalidProbe {
        index: usize,
        #[source]
        source: StoreError,
    },
    #[error("face {index}: {source}")]
    Embed {
        index: usize,
        #[source]
        source: EmbedError,
    },
    #[error("store: {0}")]
    Store(#[from] StoreError),
    #[error("config: {0}")]
    Config(#[from] ConfigError),
}

/// Outcome for one face of a frame.
#[derive(Debug, Clone)]
pub struct FaceResult {
    pub result: MatchResult,
    /// Distance to the nearest stored encoding (`+inf` with an empty store).
    pub distance: f32,
    pub update: UpdateOutcome,
}

/// Owns the encoding store and runs Matcher → Classifier → Updater per frame.
///
/// Every probe in one frame is matched against the same snapshot; gallery
/// updates from that frame are applied after matching and become visible
/// from the next frame on.
pub struct SessionCoordinator<M: Matcher = EuclideanMatcher> {
    store: EncodingStore,
    matcher: M,
    updater: AdaptiveUpdater,
    config: EngineConfig,
    frames: u64,
}

impl SessionCoordinator<EuclideanMatcher> {
    pub fn new(store: EncodingStore, config: EngineConfig) -> Result<Self, ConfigError> {
        Self::with_matcher(store, config, EuclideanMatcher)
    }
}

impl<M: Matcher> SessionCoordinator<M> {
    /// Build a coordinator around an existing store. The store's capacity is
    /// aligned with `config.max_encodings`.
    pub fn with_matcher(
        mut store: EncodingStore,
        config: EngineConfig,
        matcher: M,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        store.set_max_encodings(config.max_encodings)?;
        Ok(Self {
            store,
            matcher,
            updater: AdaptiveUpdater,
            config,
            frames: 0,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn store(&self) -> &EncodingStore {
        &self.store
    }

    /// Number of frames processed since construction.
    pub fn frames_processed(&self) -> u64 {
        self.frames
    }

    /// Replace the configuration. An invalid configuration is rejected and the
    /// current one stays in effect.
    pub fn apply_config(&mut self, config: EngineConfig) -> Result<(), ConfigError> {
        config.validate()?;
        self.store.set_max_encodings(config.max_encodings)?;
        tracing::info!(
            low = config.low_threshold,
            high = config.high_threshold,
            adaptive_learning = config.adaptive_learning,
            max_encodings = config.max_encodings,
            "engine configuration applied"
        );
        self.config = config;
        Ok(())
    }

    /// Match every probe of one frame and apply the learning policy.
    ///
    /// All probes are validated first: one malformed probe rejects the frame
    /// without touching the store.
    pub fn process_frame(&mut self, probes: &[Vec<f32>]) -> Result<Vec<FaceResult>, SessionError> {
        let dimension = self.store.dimension();
        for (index, probe) in probes.iter().enumerate() {
            validate_vector(probe, dimension)
                .map_err(|source| SessionError::InvalidProbe { index, source })?;
        }

        let snapshot = self.store.snapshot();
        let matches: Vec<_> = probes
            .iter()
            .map(|probe| {
                let candidate = self.matcher.find_best_match(probe, &snapshot);
                let result = classify_candidate(&candidate, &self.config);
                (result, candidate.distance)
            })
            .collect();

        let mut results = Vec::with_capacity(probes.len());
        for (probe, (result, distance)) in probes.iter().zip(matches) {
            let update = self
                .updater
                .apply(&mut self.store, &result, probe, &self.config)?;
            results.push(FaceResult {
                result,
                distance,
                update,
            });
        }

        self.frames += 1;
        tracing::debug!(
            frame = self.frames,
            faces = results.len(),
            snapshot_version = snapshot.version(),
            learned = results.iter().filter(|r| r.update.is_learned()).count(),
            "frame processed"
        );

        Ok(results)
    }

    /// Embed face crops with the injected model, then process them as one frame.
    pub fn process_faces(
        &mut self,
        embedder: &mut dyn Embedder,
        faces: &[GrayImage],
    ) -> Result<Vec<FaceResult>, SessionError> {
        let probes = faces
            .iter()
            .enumerate()
            .map(|(index, face)| {
                embedder
                    .embed(face)
                    .map_err(|source| SessionError::Embed { index, source })
            })
            .collect::<Result<Vec<_>, _>>()?;
        self.process_frame(&probes)
    }

    /// Match a single probe without learning from it.
    pub fn identify(&self, probe: &[f32]) -> Result<MatchResult, SessionError> {
        validate_vector(probe, self.store.dimension())?;
        let candidate = self.matcher.find_best_match(probe, &self.store.snapshot());
        Ok(classify_candidate(&candidate, &self.config))
    }

    /// Record an externally confirmed identity for a probe.
    pub fn confirm(
        &mut self,
        student_id: &StudentId,
        probe: &[f32],
    ) -> Result<UpdateOutcome, SessionError> {
        Ok(self
            .updater
            .confirm(&mut self.store, student_id, probe, &self.config)?)
    }

    /// Register a student with their initial encodings. Returns the gallery size.
    ///
    /// Every vector is validated before anything is stored. Registering more
    /// vectors than `max_encodings` keeps only the newest ones.
    pub fn register(
        &mut self,
        student_id: StudentId,
        name: Option<String>,
        encodings: Vec<Vec<f32>>,
    ) -> Result<usize, SessionError> {
        let dimension = self.store.dimension();
        for (index, values) in encodings.iter().enumerate() {
            validate_vector(values, dimension)
                .map_err(|source| SessionError::InvalidProbe { index, source })?;
        }

        self.store.register_student(student_id.clone(), name);
        for values in encodings {
            self.store
                .add_encoding(&student_id, values, EncodingSource::Registration)?;
        }
        let gallery_len = self.store.gallery(&student_id).map_or(0, |g| g.len());
        tracing::info!(student = %student_id, gallery_len, "student registered");
        Ok(gallery_len)
    }

    /// Remove a student and their gallery. Idempotent.
    pub fn remove_student(&mut self, student_id: &StudentId) -> bool {
        let removed = self.store.remove_student(student_id);
        if removed {
            tracing::info!(student = %student_id, "student removed");
        }
        removed
    }
}
