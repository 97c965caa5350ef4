// Worker message protocol: inbound commands, outbound events, and the event channel.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::debug;

use super::stats::{FinalStats, RunningStats};
use crate::adapter::traits::Prompt;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitRequest {
    pub model_id: String,
    #[serde(default)]
    pub max_tokens: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerateRequest {
    pub prompt: Prompt,
}

/// Inbound message, `{"type": "...", "data": {...}}` on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum WorkerCommand {
    Init(InitRequest),
    Generate(GenerateRequest),
    /// Abort whatever acquisition or generation is in flight.
    Cancel,
}

impl WorkerCommand {
    pub fn name(&self) -> &'static str {
        match self {
            WorkerCommand::Init(_) => "init",
            WorkerCommand::Generate(_) => "generate",
            WorkerCommand::Cancel => "cancel",
        }
    }
}

/// Outbound message, `{"type": "...", ...}` on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkerEvent {
    Status {
        message: String,
    },
    /// Alternate-path notice shown while the fallback chain advances.
    InitStep {
        message: String,
    },
    Progress {
        percent: u8,
        message: String,
        #[serde(rename = "isNewDownload")]
        is_new_download: bool,
    },
    Ready {
        cached: bool,
    },
    Text {
        text: String,
    },
    Stats {
        stats: RunningStats,
    },
    Complete {
        stats: FinalStats,
    },
    Error {
        error: String,
    },
}

impl WorkerEvent {
    /// Whether this event ends an `init` or `generate` exchange.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            WorkerEvent::Ready { .. } | WorkerEvent::Complete { .. } | WorkerEvent::Error { .. }
        )
    }
}

/// Ordered event channel the manager writes to and the caller drains.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: mpsc::UnboundedSender<WorkerEvent>,
}

impl EventSink {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<WorkerEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn emit(&self, event: WorkerEvent) {
        if self.tx.send(event).is_err() {
            debug!("event receiver dropped; discarding event");
        }
    }

    pub fn status(&self, message: impl Into<String>) {
        self.emit(WorkerEvent::Status {
            message: message.into(),
        });
    }

    pub fn error(&self, error: impl ToString) {
        self.emit(WorkerEvent::Error {
            error: error.to_string(),
        });
    }
}
