use std::any::Any;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::config::{AcquisitionConfig, GenerationParams};

/// A loaded, ready-to-use model handle produced by the engine.
pub trait Session: Send + Sync {
    fn model_id(&self) -> &str;

    /// Lets an adapter recover its concrete session type.
    fn as_any(&self) -> &dyn Any;
}

pub type SessionHandle = Arc<dyn Session>;

/// Raw per-artifact progress as the engine reports it while fetching a model.
#[derive(Debug, Clone, PartialEq)]
pub enum ArtifactProgress {
    Initiate { file: String },
    Download { file: String },
    Progress { file: String, loaded: u64, total: u64 },
    Done { file: String },
    /// The whole model is materialized; not tied to a single file.
    Ready,
}

impl ArtifactProgress {
    pub fn file(&self) -> Option<&str> {
        match self {
            ArtifactProgress::Initiate { file }
            | ArtifactProgress::Download { file }
            | ArtifactProgress::Progress { file, .. }
            | ArtifactProgress::Done { file } => Some(file),
            ArtifactProgress::Ready => None,
        }
    }
}

pub type ProgressSender = mpsc::UnboundedSender<ArtifactProgress>;

/// One decoded text fragment per produced token, in production order.
pub type TokenStream = BoxStream<'static, Result<String>>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

/// Generation input: raw text or a chat transcript for the model's chat template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Prompt {
    Text(String),
    Chat(Vec<ChatMessage>),
}

impl Prompt {
    /// System + user transcript, the shape the demo UI sends.
    pub fn chat(system: impl Into<String>, user: impl Into<String>) -> Self {
        Prompt::Chat(vec![
            ChatMessage {
                role: "system".to_string(),
                content: system.into(),
            },
            ChatMessage {
                role: "user".to_string(),
                content: user.into(),
            },
        ])
    }
}

/// Errors an adapter can raise with an explicit classification.
#[derive(Debug, thiserror::Error)]
pub enum AdapterError {
    /// The requested artifact does not exist for this dtype/file name.
    #[error("Could not locate file: \"{0}\"")]
    MissingArtifact(String),
}

#[async_trait]
pub trait EngineAdapter: Send + Sync {
    /// Load `model_id` with the given candidate configuration, reporting raw progress on `progress`.
    async fn acquire(
        &self,
        model_id: &str,
        config: &AcquisitionConfig,
        progress: ProgressSender,
    ) -> Result<SessionHandle>;

    /// Start a streaming generation. The returned stream is finite and not restartable.
    async fn generate(
        &self,
        session: &SessionHandle,
        prompt: &Prompt,
        params: &GenerationParams,
    ) -> Result<TokenStream>;

    /// Called when the cache drops `session`; adapters free engine resources here.
    async fn release(&self, _session: SessionHandle) {}
}
