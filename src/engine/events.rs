//! Progress events emitted while the engine runs.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::project::{FeatureStatus, TaskStatus};

/// Events emitted during a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineEvent {
    /// Free-form progress line with an optional completion percentage.
    Status {
        message: String,
        percent: Option<u8>,
    },
    FeatureStatusChanged {
        feature: String,
        name: String,
        from: FeatureStatus,
        to: FeatureStatus,
    },
    TaskStatusChanged {
        feature: String,
        task: String,
        label: String,
        status: TaskStatus,
    },
    /// One per terminal failure; `message` is short and user-facing.
    Error {
        feature: Option<String>,
        task: Option<String>,
        message: String,
    },
}

/// Optional sender half of the progress stream.
#[derive(Debug, Clone, Default)]
pub struct EventSink {
    tx: Option<mpsc::Sender<EngineEvent>>,
}

impl EventSink {
    pub fn new(tx: mpsc::Sender<EngineEvent>) -> Self {
        Self { tx: Some(tx) }
    }

    /// A sink that drops every event.
    pub fn none() -> Self {
        Self { tx: None }
    }

    pub async fn emit(&self, event: EngineEvent) {
        if let Some(tx) = &self.tx {
            // a closed receiver only means nobody is watching
            let _ = tx.send(event).await;
        }
    }

    pub async fn status(&self, message: impl Into<String>, percent: Option<f64>) {
        self.emit(EngineEvent::Status {
            message: message.into(),
            percent: percent.map(|p| p.clamp(0.0, 100.0).round() as u8),
        })
        .await;
    }

    pub async fn error(&self, feature: Option<&str>, task: Option<&str>, message: impl Into<String>) {
        self.emit(EngineEvent::Error {
            feature: feature.map(String::from),
            task: task.map(String::from),
            message: message.into(),
        })
        .await;
    }
}
