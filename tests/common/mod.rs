// Scripted engine adapter shared by the integration tests.
#![allow(dead_code)]

use std::any::Any;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use ma_textgen_engine::adapter::traits::{
    ArtifactProgress, EngineAdapter, ProgressSender, Prompt, Session, SessionHandle, TokenStream,
};
use ma_textgen_engine::config::{AcquisitionConfig, Device, Dtype, EngineConfig, GenerationParams};
use ma_textgen_engine::engine::events::WorkerEvent;

pub struct TestSession {
    model_id: String,
    pub weights_file: String,
}

impl Session for TestSession {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

pub fn test_session(model_id: &str) -> SessionHandle {
    Arc::new(TestSession {
        model_id: model_id.to_string(),
        weights_file: "model_quantized.onnx".to_string(),
    })
}

/// What the next `acquire` call does.
#[derive(Debug, Clone)]
pub enum AcquireStep {
    Succeed,
    MissingArtifact,
    Fail(String),
    /// Never completes; only cancellation gets out.
    Hang,
    /// Succeed after sleeping for the given time.
    Delay(Duration),
}

pub struct ScriptedAdapter {
    acquire_script: Mutex<VecDeque<AcquireStep>>,
    acquire_calls: Mutex<Vec<(String, AcquisitionConfig)>>,
    generate_calls: Mutex<Vec<(String, GenerationParams)>>,
    released: Mutex<Vec<String>>,
    completed_acquires: Mutex<usize>,
    tokens: Vec<String>,
    token_delay: Duration,
    generate_failure: Option<String>,
}

impl ScriptedAdapter {
    pub fn new() -> Self {
        Self {
            acquire_script: Mutex::new(VecDeque::new()),
            acquire_calls: Mutex::new(Vec::new()),
            generate_calls: Mutex::new(Vec::new()),
            released: Mutex::new(Vec::new()),
            completed_acquires: Mutex::new(0),
            tokens: Vec::new(),
            token_delay: Duration::ZERO,
            generate_failure: None,
        }
    }

    /// Steps consumed one per `acquire`; once exhausted every call succeeds.
    pub fn with_acquire_script(self, steps: Vec<AcquireStep>) -> Self {
        *self.acquire_script.lock() = steps.into();
        self
    }

    pub fn with_tokens(mut self, tokens: &[&str], delay: Duration) -> Self {
        self.tokens = tokens.iter().map(|t| t.to_string()).collect();
        self.token_delay = delay;
        self
    }

    /// Fail the token stream after all scripted tokens were produced.
    pub fn with_generate_failure(mut self, message: &str) -> Self {
        self.generate_failure = Some(message.to_string());
        self
    }

    pub fn acquire_calls(&self) -> Vec<(String, AcquisitionConfig)> {
        self.acquire_calls.lock().clone()
    }

    pub fn generate_calls(&self) -> Vec<(String, GenerationParams)> {
        self.generate_calls.lock().clone()
    }

    pub fn released(&self) -> Vec<String> {
        self.released.lock().clone()
    }

    /// Number of `acquire` calls that ran to a successful end.
    pub fn completed_acquires(&self) -> usize {
        *self.completed_acquires.lock()
    }

    fn succeed(&self, model_id: &str, weights: String, progress: &ProgressSender) -> SessionHandle {
        let _ = progress.send(ArtifactProgress::Progress {
            file: "tokenizer.json".to_string(),
            loaded: 10,
            total: 10,
        });
        let _ = progress.send(ArtifactProgress::Initiate {
            file: weights.clone(),
        });
        let _ = progress.send(ArtifactProgress::Progress {
            file: weights.clone(),
            loaded: 50,
            total: 100,
        });
        let _ = progress.send(ArtifactProgress::Progress {
            file: weights.clone(),
            loaded: 100,
            total: 100,
        });
        let _ = progress.send(ArtifactProgress::Done {
            file: weights.clone(),
        });
        let _ = progress.send(ArtifactProgress::Ready);
        *self.completed_acquires.lock() += 1;
        Arc::new(TestSession {
            model_id: model_id.to_string(),
            weights_file: weights,
        })
    }
}

#[async_trait]
impl EngineAdapter for ScriptedAdapter {
    async fn acquire(
        &self,
        model_id: &str,
        config: &AcquisitionConfig,
        progress: ProgressSender,
    ) -> Result<SessionHandle> {
        self.acquire_calls
            .lock()
            .push((model_id.to_string(), config.clone()));
        let step = self
            .acquire_script
            .lock()
            .pop_front()
            .unwrap_or(AcquireStep::Succeed);
        let weights = format!("onnx/{}", config.weights_file_name());

        match step {
            AcquireStep::MissingArtifact => Err(anyhow!(
                "Could not locate file: \"https://huggingface.co/{}/resolve/main/{}\".",
                model_id,
                weights
            )),
            AcquireStep::Fail(message) => Err(anyhow!(message)),
            AcquireStep::Hang => {
                let _ = progress.send(ArtifactProgress::Initiate {
                    file: weights.clone(),
                });
                std::future::pending::<()>().await;
                Err(anyhow!("unreachable"))
            }
            AcquireStep::Delay(delay) => {
                tokio::time::sleep(delay).await;
                Ok(self.succeed(model_id, weights, &progress))
            }
            AcquireStep::Succeed => Ok(self.succeed(model_id, weights, &progress)),
        }
    }

    async fn generate(
        &self,
        session: &SessionHandle,
        _prompt: &Prompt,
        params: &GenerationParams,
    ) -> Result<TokenStream> {
        self.generate_calls
            .lock()
            .push((session.model_id().to_string(), params.clone()));

        let delay = self.token_delay;
        let tokens = futures::stream::iter(self.tokens.clone()).then(move |token| async move {
            tokio::time::sleep(delay).await;
            Ok::<_, anyhow::Error>(token)
        });
        let failure = futures::stream::iter(
            self.generate_failure
                .clone()
                .map(|message| Err(anyhow!(message))),
        );
        Ok(tokens.chain(failure).boxed())
    }

    async fn release(&self, session: SessionHandle) {
        self.released.lock().push(session.model_id().to_string());
    }
}

pub fn three_candidate_config() -> EngineConfig {
    EngineConfig {
        acquisition_chain: vec![
            AcquisitionConfig::new(Device::Wasm, Dtype::Q8, "Downloading model files..."),
            AcquisitionConfig::new(Device::Wasm, Dtype::Q4, "Downloading model files..."),
            AcquisitionConfig::new(Device::Wasm, Dtype::Q4, "Downloading model files...")
                .with_model_file_name("decoder_model_merged"),
        ],
        ..EngineConfig::default()
    }
}

/// Everything the manager has emitted so far.
pub fn drain(rx: &mut mpsc::UnboundedReceiver<WorkerEvent>) -> Vec<WorkerEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

pub fn count_init_steps(events: &[WorkerEvent]) -> usize {
    events
        .iter()
        .filter(|e| matches!(e, WorkerEvent::InitStep { .. }))
        .count()
}
