// Session manager: the worker's state machine over acquisition and generation.

use std::sync::Arc;

use anyhow::Result;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::acquire::FallbackController;
use super::cache::SessionCache;
use super::error::ManagerError;
use super::events::{EventSink, WorkerCommand, WorkerEvent};
use super::stats::FinalStats;
use super::stream::GenerationStreamController;
use crate::adapter::traits::{EngineAdapter, Prompt};
use crate::config::{EngineConfig, GenerationParams};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManagerState {
    Idle,
    Acquiring,
    Ready,
    Generating,
    Complete,
    Failed,
}

pub struct SessionManager {
    acquisition: FallbackController,
    generation: GenerationStreamController,
    params: GenerationParams,
    max_tokens: usize,
    state: ManagerState,
    /// Key of the session the next `generate` uses; the cache owns the session itself.
    current_model: Option<String>,
    sink: EventSink,
}

impl SessionManager {
    /// Build a manager with its own cache sized from `config`.
    pub fn new(adapter: Arc<dyn EngineAdapter>, config: &EngineConfig, sink: EventSink) -> Result<Self> {
        config.validate()?;
        let cache = SessionCache::new(config.cache_capacity)?;
        Ok(Self::with_cache(adapter, config, cache, sink))
    }

    /// Build a manager around an injected cache.
    pub fn with_cache(
        adapter: Arc<dyn EngineAdapter>,
        config: &EngineConfig,
        cache: SessionCache,
        sink: EventSink,
    ) -> Self {
        Self {
            acquisition: FallbackController::new(Arc::clone(&adapter), cache, config),
            generation: GenerationStreamController::new(
                adapter,
                config.end_of_sequence_markers.clone(),
            ),
            params: config.generation.clone(),
            max_tokens: config.generation.max_new_tokens,
            state: ManagerState::Idle,
            current_model: None,
            sink,
        }
    }

    pub fn state(&self) -> ManagerState {
        self.state
    }

    pub fn current_model(&self) -> Option<&str> {
        self.current_model.as_deref()
    }

    pub fn cache(&self) -> &SessionCache {
        self.acquisition.cache()
    }

    pub fn max_tokens(&self) -> usize {
        self.max_tokens
    }

    /// Acquire a session for `model_id`. Emits one `ready` or one `error` event.
    ///
    /// Returns whether the session came from the cache.
    pub async fn initialize(&mut self, model_id: &str, max_tokens: usize) -> Result<bool, ManagerError> {
        self.initialize_cancellable(model_id, max_tokens, &CancellationToken::new())
            .await
    }

    pub async fn initialize_cancellable(
        &mut self,
        model_id: &str,
        max_tokens: usize,
        cancel: &CancellationToken,
    ) -> Result<bool, ManagerError> {
        // `&mut self` rules out a concurrent call; a non-terminal state here means
        // the previous call's future was dropped, so starting over is safe.
        self.transition(ManagerState::Acquiring);
        self.current_model = None;
        self.max_tokens = max_tokens;

        match self.acquisition.acquire(model_id, &self.sink, cancel).await {
            Ok(outcome) => {
                self.current_model = Some(model_id.to_string());
                self.transition(ManagerState::Ready);
                self.sink.emit(WorkerEvent::Ready {
                    cached: outcome.cached,
                });
                Ok(outcome.cached)
            }
            Err(e) => {
                self.transition(ManagerState::Failed);
                self.sink.error(&e);
                Err(e)
            }
        }
    }

    /// Stream a generation on the current session. Emits one `complete` or one `error` event.
    pub async fn generate(&mut self, prompt: &Prompt) -> Result<FinalStats, ManagerError> {
        self.generate_cancellable(prompt, &CancellationToken::new())
            .await
    }

    pub async fn generate_cancellable(
        &mut self,
        prompt: &Prompt,
        cancel: &CancellationToken,
    ) -> Result<FinalStats, ManagerError> {
        let session = match (self.state, self.current_model.as_deref()) {
            (ManagerState::Ready, Some(model_id)) => self.acquisition.cache().peek(model_id),
            _ => None,
        };
        let Some(session) = session else {
            warn!("generate rejected in state {:?}", self.state);
            let err = ManagerError::NotInitialized;
            self.sink.error(&err);
            return Err(err);
        };

        self.transition(ManagerState::Generating);
        let params = GenerationParams {
            max_new_tokens: self.max_tokens,
            ..self.params.clone()
        };
        let result = self
            .generation
            .run(&session, prompt, &params, &self.sink, cancel)
            .await;

        // Every generation needs a fresh `initialize`; the session stays cached either way.
        self.current_model = None;
        match result {
            Ok(stats) => {
                self.transition(ManagerState::Complete);
                self.sink.emit(WorkerEvent::Complete { stats });
                Ok(stats)
            }
            Err(e) => {
                self.transition(ManagerState::Failed);
                self.sink.error(&e);
                Err(e)
            }
        }
    }

    /// Dispatch one inbound protocol message. Outcomes are reported as events.
    pub async fn handle(&mut self, command: WorkerCommand, cancel: &CancellationToken) {
        match command {
            WorkerCommand::Init(req) => {
                let max_tokens = req.max_tokens.unwrap_or(self.params.max_new_tokens);
                if let Err(e) = self
                    .initialize_cancellable(&req.model_id, max_tokens, cancel)
                    .await
                {
                    debug!("init {} failed: {}", req.model_id, e);
                }
            }
            WorkerCommand::Generate(req) => {
                if let Err(e) = self.generate_cancellable(&req.prompt, cancel).await {
                    debug!("generate failed: {}", e);
                }
            }
            WorkerCommand::Cancel => debug!("cancel received with nothing in flight"),
        }
    }

    /// Release every cached session and return to `Idle`.
    pub async fn shutdown(&mut self) {
        self.acquisition.release_all().await;
        self.current_model = None;
        self.transition(ManagerState::Idle);
    }

    fn transition(&mut self, next: ManagerState) {
        if self.state != next {
            info!("session manager {:?} -> {:?}", self.state, next);
            self.state = next;
        }
    }
}
