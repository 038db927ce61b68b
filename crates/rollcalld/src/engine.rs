use crate::config::{self, Config, SettingsError};
use crate::pending::{PendingConfirmation, PendingQueue};
use rollcall_core::persist::{self, PersistError};
use rollcall_core::{
    ConfigError, EncodingStore, EngineConfig, SessionCoordinator, SessionError, StoreError,
    StudentId, Tier, UpdateOutcome,
};
use serde::Serialize;
use std::path::PathBuf;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error("invalid settings: {0}")]
    Config(#[from] ConfigError),
    #[error("settings file: {0}")]
    Settings(#[from] SettingsError),
    #[error("gallery file: {0}")]
    Persist(#[from] PersistError),
    #[error("gallery: {0}")]
    Store(#[from] StoreError),
    #[error("no pending confirmation with id {0}")]
    UnknownPending(Uuid),
    #[error("failed to spawn engine thread: {0}")]
    Spawn(std::io::Error),
    #[error("engine thread exited")]
    ChannelClosed,
}

/// Per-face result returned to clients.
#[derive(Debug, Clone, Serialize)]
pub struct FaceReport {
    pub student_id: Option<StudentId>,
    pub confidence: f32,
    pub tier: Tier,
    /// The probe was added to the student's gallery.
    pub learned: bool,
    /// Set for Low results; pass to `Confirm`.
    pub pending_id: Option<Uuid>,
}

/// One line of `ListStudents`.
#[derive(Debug, Clone, Serialize)]
pub struct StudentSummary {
    pub id: StudentId,
    pub name: Option<String>,
    pub encodings: usize,
    pub registered_at: chrono::DateTime<chrono::Utc>,
}

/// Snapshot of engine state for `Status`.
#[derive(Debug, Clone, Serialize)]
pub struct EngineStatus {
    pub dimension: usize,
    pub students: usize,
    pub encodings: usize,
    pub store_version: u64,
    pub frames_processed: u64,
    pub pending: usize,
    pub settings: EngineConfig,
}

type Reply<T> = oneshot::Sender<Result<T, EngineError>>;

/// Messages sent from D-Bus handlers to the engine thread.
enum EngineRequest {
    Identify {
        probes: Vec<Vec<f32>>,
        reply: Reply<Vec<FaceReport>>,
    },
    Register {
        student_id: StudentId,
        name: Option<String>,
        encodings: Vec<Vec<f32>>,
        reply: Reply<usize>,
    },
    Confirm {
        pending_id: Uuid,
        accept: bool,
        correct_student_id: Option<StudentId>,
        reply: Reply<bool>,
    },
    Pending {
        reply: Reply<Vec<PendingConfirmation>>,
    },
    Remove {
        student_id: StudentId,
        reply: Reply<bool>,
    },
    ListStudents {
        reply: Reply<Vec<StudentSummary>>,
    },
    Status {
        reply: Reply<EngineStatus>,
    },
    UpdateSettings {
        settings: EngineConfig,
        reply: Reply<EngineConfig>,
    },
    ReloadSettings {
        reply: Reply<EngineConfig>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
}

impl EngineHandle {
    async fn call<T>(
        &self,
        make: impl FnOnce(Reply<T>) -> EngineRequest,
    ) -> Result<T, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(make(reply_tx))
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }

    /// Match all faces of one frame, learning from confident matches.
    pub async fn identify(&self, probes: Vec<Vec<f32>>) -> Result<Vec<FaceReport>, EngineError> {
        self.call(|reply| EngineRequest::Identify { probes, reply })
            .await
    }

    /// Register a student with initial encodings. Returns the gallery size.
    pub async fn register(
        &self,
        student_id: StudentId,
        name: Option<String>,
        encodings: Vec<Vec<f32>>,
    ) -> Result<usize, EngineError> {
        self.call(|reply| EngineRequest::Register {
            student_id,
            name,
            encodings,
            reply,
        })
        .await
    }

    /// Resolve a pending confirmation. Returns whether the probe was learned.
    pub async fn confirm(
        &self,
        pending_id: Uuid,
        accept: bool,
        correct_student_id: Option<StudentId>,
    ) -> Result<bool, EngineError> {
        self.call(|reply| EngineRequest::Confirm {
            pending_id,
            accept,
            correct_student_id,
            reply,
        })
        .await
    }

    pub async fn pending(&self) -> Result<Vec<PendingConfirmation>, EngineError> {
        self.call(|reply| EngineRequest::Pending { reply }).await
    }

    pub async fn remove_student(&self, student_id: StudentId) -> Result<bool, EngineError> {
        self.call(|reply| EngineRequest::Remove { student_id, reply })
            .await
    }

    pub async fn list_students(&self) -> Result<Vec<StudentSummary>, EngineError> {
        self.call(|reply| EngineRequest::ListStudents { reply }).await
    }

    pub async fn status(&self) -> Result<EngineStatus, EngineError> {
        self.call(|reply| EngineRequest::Status { reply }).await
    }

    /// Apply and persist new settings. Invalid settings leave the current ones in place.
    pub async fn update_settings(&self, settings: EngineConfig) -> Result<EngineConfig, EngineError> {
        self.call(|reply| EngineRequest::UpdateSettings { settings, reply })
            .await
    }

    /// Re-read the settings file. On failure the current settings stay in place.
    pub async fn reload_settings(&self) -> Result<EngineConfig, EngineError> {
        self.call(|reply| EngineRequest::ReloadSettings { reply })
            .await
    }
}

/// State owned by the engine thread. Being the only owner of the store is
/// what serializes all gallery writes.
struct Engine {
    session: SessionCoordinator,
    pending: PendingQueue,
    store_path: PathBuf,
    settings_path: PathBuf,
    saved_version: u64,
}

/// Load the gallery and spawn the engine on a dedicated OS thread.
///
/// A missing gallery file starts an empty store; an unreadable one fails
/// startup. Corrupt student records and encodings are skipped with a warning.
pub fn spawn_engine(config: &Config, settings: EngineConfig) -> Result<EngineHandle, EngineError> {
    settings.validate()?;

    let store = match persist::load(&config.store_path, config.dimension, settings.max_encodings) {
        Ok((store, report)) => {
            if !report.skipped.is_empty() || !report.skipped_students.is_empty() {
                tracing::warn!(
                    skipped_students = report.skipped_students.len(),
                    skipped = report.skipped.len(),
                    "gallery loaded with corrupt records skipped"
                );
            }
            store
        }
        Err(e) if e.is_not_found() => {
            tracing::info!(
                path = %config.store_path.display(),
                "no gallery file; starting with an empty store"
            );
            EncodingStore::new(config.dimension, settings.max_encodings)?
        }
        Err(e) => return Err(e.into()),
    };

    let session = SessionCoordinator::new(store, settings)?;
    let saved_version = session.store().version();
    let mut engine = Engine {
        session,
        pending: PendingQueue::new(config.max_pending),
        store_path: config.store_path.clone(),
        settings_path: config.settings_path.clone(),
        saved_version,
    };

    let (tx, mut rx) = mpsc::channel::<EngineRequest>(16);

    std::thread::Builder::new()
        .name("rollcall-engine".into())
        .spawn(move || {
            tracing::info!("engine thread started");
            while let Some(req) = rx.blocking_recv() {
                engine.handle(req);
                engine.persist_if_changed();
            }
            engine.persist_if_changed();
            tracing::info!("engine thread exiting");
        })
        .map_err(EngineError::Spawn)?;

    Ok(EngineHandle { tx })
}

impl Engine {
    fn handle(&mut self, req: EngineRequest) {
        // A dropped receiver only means the caller went away.
        match req {
            EngineRequest::Identify { probes, reply } => {
                let _ = reply.send(self.identify(probes));
            }
            EngineRequest::Register {
                student_id,
                name,
                encodings,
                reply,
            } => {
                let result = self.session.register(student_id, name, encodings);
                let _ = reply.send(result.map_err(EngineError::from));
            }
            EngineRequest::Confirm {
                pending_id,
                accept,
                correct_student_id,
                reply,
            } => {
                let _ = reply.send(self.confirm(pending_id, accept, correct_student_id));
            }
            EngineRequest::Pending { reply } => {
                let _ = reply.send(Ok(self.pending.iter().cloned().collect()));
            }
            EngineRequest::Remove { student_id, reply } => {
                let removed = self.session.remove_student(&student_id);
                let dropped = self.pending.forget_student(&student_id);
                if dropped > 0 {
                    tracing::debug!(student = %student_id, dropped, "dropped pending confirmations");
                }
                let _ = reply.send(Ok(removed));
            }
            EngineRequest::ListStudents { reply } => {
                let _ = reply.send(Ok(self.list_students()));
            }
            EngineRequest::Status { reply } => {
                let _ = reply.send(Ok(self.status()));
            }
            EngineRequest::UpdateSettings { settings, reply } => {
                let _ = reply.send(self.update_settings(settings));
            }
            EngineRequest::ReloadSettings { reply } => {
                let _ = reply.send(self.reload_settings());
            }
        }
    }

    fn identify(&mut self, probes: Vec<Vec<f32>>) -> Result<Vec<FaceReport>, EngineError> {
        let faces = self.session.process_frame(&probes)?;

        let reports = faces
            .into_iter()
            .zip(probes)
            .map(|(face, probe)| {
                let pending_id = match (&face.update, &face.result.student_id) {
                    (UpdateOutcome::AwaitingConfirmation, Some(student_id)) => Some(self.pending.push(
                        student_id.clone(),
                        face.result.confidence,
                        probe,
                    )),
                    _ => None,
                };
                tracing::info!(
                    student = ?face.result.student_id.as_ref().map(|s| s.as_str()),
                    confidence = face.result.confidence,
                    tier = %face.result.tier,
                    "face identified"
                );
                FaceReport {
                    student_id: face.result.student_id,
                    confidence: face.result.confidence,
                    tier: face.result.tier,
                    learned: face.update.is_learned(),
                    pending_id,
                }
            })
            .collect();

        Ok(reports)
    }

    fn confirm(
        &mut self,
        pending_id: Uuid,
        accept: bool,
        correct_student_id: Option<StudentId>,
    ) -> Result<bool, EngineError> {
        let entry = self
            .pending
            .take(&pending_id)
            .ok_or(EngineError::UnknownPending(pending_id))?;

        if !accept {
            tracing::info!(id = %pending_id, student = %entry.student_id, "pending match rejected");
            return Ok(false);
        }

        let student_id = correct_student_id.unwrap_or(entry.student_id);
        let outcome = self.session.confirm(&student_id, &entry.probe)?;
        tracing::info!(id = %pending_id, student = %student_id, ?outcome, "pending match confirmed");
        Ok(outcome.is_learned())
    }

    fn list_students(&self) -> Vec<StudentSummary> {
        let store = self.session.store();
        store
            .students()
            .map(|s| StudentSummary {
                id: s.id.clone(),
                name: s.name.clone(),
                encodings: store.gallery(&s.id).map_or(0, |g| g.len()),
                registered_at: s.registered_at,
            })
            .collect()
    }

    fn status(&self) -> EngineStatus {
        let store = self.session.store();
        EngineStatus {
            dimension: store.dimension(),
            students: store.len(),
            encodings: store.encoding_count(),
            store_version: store.version(),
            frames_processed: self.session.frames_processed(),
            pending: self.pending.len(),
            settings: self.session.config().clone(),
        }
    }

    fn update_settings(&mut self, settings: EngineConfig) -> Result<EngineConfig, EngineError> {
        self.session.apply_config(settings)?;
        let applied = self.session.config().clone();
        if let Err(e) = config::save_settings(&self.settings_path, &applied) {
            tracing::warn!(error = %e, "settings applied but could not be saved");
        }
        Ok(applied)
    }

    fn reload_settings(&mut self) -> Result<EngineConfig, EngineError> {
        let settings = config::load_settings(&self.settings_path).map_err(|e| {
            tracing::error!(error = %e, "settings reload rejected; keeping current settings");
            e
        })?;
        self.session.apply_config(settings).map_err(|e| {
            tracing::error!(error = %e, "settings reload rejected; keeping current settings");
            e
        })?;
        Ok(self.session.config().clone())
    }

    /// Save the gallery if it changed. Failures are logged and retried on the
    /// next change.
    fn persist_if_changed(&mut self) {
        let version = self.session.store().version();
        if version == self.saved_version {
            return;
        }
        match persist::save(self.session.store(), &self.store_path) {
            Ok(()) => self.saved_version = version,
            Err(e) => tracing::error!(error = %e, "failed to save gallery"),
        }
    }
}
