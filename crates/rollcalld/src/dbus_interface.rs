use crate::engine::{EngineError, EngineHandle};
use rollcall_core::{EngineConfig, SessionError, StudentId};
use serde::Serialize;
use uuid::Uuid;
use zbus::interface;

pub const BUS_NAME: &str = "org.rollcall.Rollcall1";
pub const OBJECT_PATH: &str = "/org/rollcall/Rollcall1";

/// D-Bus interface for the Rollcall daemon.
///
/// Bus name: org.rollcall.Rollcall1
/// Object path: /org/rollcall/Rollcall1
///
/// Structured arguments and results are JSON strings.
pub struct RollcallService {
    engine: EngineHandle,
}

impl RollcallService {
    pub fn new(engine: EngineHandle) -> Self {
        Self { engine }
    }
}

fn to_fdo(err: EngineError) -> zbus::fdo::Error {
    match err {
        EngineError::Session(SessionError::InvalidProbe { .. } | SessionError::Store(_))
        | EngineError::Config(_)
        | EngineError::UnknownPending(_) => zbus::fdo::Error::InvalidArgs(err.to_string()),
        other => zbus::fdo::Error::Failed(other.to_string()),
    }
}

fn parse_json<T: serde::de::DeserializeOwned>(what: &str, json: &str) -> zbus::fdo::Result<T> {
    serde_json::from_str(json)
        .map_err(|e| zbus::fdo::Error::InvalidArgs(format!("{what}: {e}")))
}

fn to_json<T: Serialize>(value: &T) -> zbus::fdo::Result<String> {
    serde_json::to_string(value).map_err(|e| zbus::fdo::Error::Failed(e.to_string()))
}

fn non_empty(s: &str) -> Option<&str> {
    Some(s.trim()).filter(|s| !s.is_empty())
}

#[interface(name = "org.rollcall.Rollcall1")]
impl RollcallService {
    /// Register a student with a JSON array of feature vectors. Returns the gallery size.
    async fn register(
        &self,
        student_id: &str,
        name: &str,
        encodings_json: &str,
    ) -> zbus::fdo::Result<u32> {
        let student_id = non_empty(student_id)
            .ok_or_else(|| zbus::fdo::Error::InvalidArgs("empty student id".into()))?;
        let encodings: Vec<Vec<f32>> = parse_json("encodings", encodings_json)?;
        tracing::info!(student = student_id, count = encodings.len(), "register requested");
        let len = self
            .engine
            .register(
                StudentId::from(student_id),
                non_empty(name).map(str::to_string),
                encodings,
            )
            .await
            .map_err(to_fdo)?;
        Ok(len as u32)
    }

    /// Match the faces of one frame (JSON array of feature vectors).
    /// Returns a JSON array of per-face results.
    async fn identify(&self, probes_json: &str) -> zbus::fdo::Result<String> {
        let probes: Vec<Vec<f32>> = parse_json("probes", probes_json)?;
        let reports = self.engine.identify(probes).await.map_err(to_fdo)?;
        to_json(&reports)
    }

    /// List low-confidence matches awaiting confirmation.
    async fn pending(&self) -> zbus::fdo::Result<String> {
        let pending = self.engine.pending().await.map_err(to_fdo)?;
        to_json(&pending)
    }

    /// Accept or reject a pending match. `correct_student_id` overrides the
    /// proposed student when non-empty. Returns whether the probe was learned.
    async fn confirm(
        &self,
        pending_id: &str,
        accept: bool,
        correct_student_id: &str,
    ) -> zbus::fdo::Result<bool> {
        let id = Uuid::parse_str(pending_id)
            .map_err(|e| zbus::fdo::Error::InvalidArgs(format!("pending id: {e}")))?;
        tracing::info!(pending_id, accept, "confirm requested");
        self.engine
            .confirm(id, accept, non_empty(correct_student_id).map(StudentId::from))
            .await
            .map_err(to_fdo)
    }

    /// Remove a student and their gallery.
    async fn remove_student(&self, student_id: &str) -> zbus::fdo::Result<bool> {
        tracing::info!(student = student_id, "remove_student requested");
        self.engine
            .remove_student(StudentId::from(student_id))
            .await
            .map_err(to_fdo)
    }

    /// List registered students with their gallery sizes.
    async fn list_students(&self) -> zbus::fdo::Result<String> {
        let students = self.engine.list_students().await.map_err(to_fdo)?;
        to_json(&students)
    }

    /// Return daemon status information.
    async fn status(&self) -> zbus::fdo::Result<String> {
        let status = self.engine.status().await.map_err(to_fdo)?;
        Ok(serde_json::json!({
            "version": env!("CARGO_PKG_VERSION"),
            "engine": status,
        })
        .to_string())
    }

    /// Replace the matching settings (JSON object; omitted fields take defaults).
    async fn update_settings(&self, settings_json: &str) -> zbus::fdo::Result<String> {
        let settings: EngineConfig = parse_json("settings", settings_json)?;
        let applied = self.engine.update_settings(settings).await.map_err(to_fdo)?;
        to_json(&applied)
    }

    /// Re-read the settings file.
    async fn reload_settings(&self) -> zbus::fdo::Result<String> {
        let applied = self.engine.reload_settings().await.map_err(to_fdo)?;
        to_json(&applied)
    }
}
