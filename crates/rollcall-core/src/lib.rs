//! rollcall-core — Face gallery matching and adaptive learning engine.
//!
//! Keeps a bounded gallery of feature vectors per student, finds the nearest
//! student for each probe, grades the match into High / Low / Unknown and
//! grows galleries from confirmed matches.

pub mod classifier;
pub mod config;
pub mod embedder;
pub mod matcher;
pub mod persist;
pub mod session;
pub mod store;
pub mod types;
pub mod updater;

pub use classifier::{classify, classify_candidate};
pub use config::{ConfigError, EngineConfig};
pub use embedder::{EmbedError, Embedder};
pub use matcher::{Candidate, EuclideanMatcher, Matcher};
pub use persist::{CorruptEncoding, CorruptStudent, LoadReport, PersistError};
pub use session::{FaceResult, SessionCoordinator, SessionError};
pub use store::{EncodingStore, Gallery, StoreError, StoreSnapshot};
pub use types::{Encoding, EncodingSource, MatchResult, Student, StudentId, Tier};
pub use updater::{AdaptiveUpdater, UpdateOutcome};
