// Fallback acquisition: walks the candidate chain until the engine yields a session.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::cache::SessionCache;
use super::error::{is_missing_artifact, ManagerError};
use super::events::EventSink;
use super::progress::{ArtifactMatcher, ProgressEvent, ProgressNormalizer};
use crate::adapter::traits::{ArtifactProgress, EngineAdapter, SessionHandle};
use crate::config::{AcquisitionConfig, EngineConfig};

pub struct AcquisitionOutcome {
    pub session: SessionHandle,
    /// True when the session came from the cache and the engine was not called.
    pub cached: bool,
}

pub struct FallbackController {
    adapter: Arc<dyn EngineAdapter>,
    cache: SessionCache,
    chain: Vec<AcquisitionConfig>,
    missing_artifact_markers: Vec<String>,
    weights_file_suffixes: Option<Vec<String>>,
    status_min_display: Duration,
}

impl FallbackController {
    pub fn new(adapter: Arc<dyn EngineAdapter>, cache: SessionCache, config: &EngineConfig) -> Self {
        Self {
            adapter,
            cache,
            chain: config.acquisition_chain.clone(),
            missing_artifact_markers: config.missing_artifact_markers.clone(),
            weights_file_suffixes: config.weights_file_suffixes.clone(),
            status_min_display: config.status_min_display(),
        }
    }

    pub fn cache(&self) -> &SessionCache {
        &self.cache
    }

    /// Return a session for `model_id`, from the cache or by running the fallback chain.
    pub async fn acquire(
        &mut self,
        model_id: &str,
        sink: &EventSink,
        cancel: &CancellationToken,
    ) -> Result<AcquisitionOutcome, ManagerError> {
        if let Some(session) = self.cache.get(model_id) {
            info!("model {} served from session cache", model_id);
            return Ok(AcquisitionOutcome {
                session,
                cached: true,
            });
        }

        let session = self.run_chain(model_id, sink, cancel).await?;
        self.store(model_id, session.clone()).await;

        Ok(AcquisitionOutcome {
            session,
            cached: false,
        })
    }

    async fn run_chain(
        &self,
        model_id: &str,
        sink: &EventSink,
        cancel: &CancellationToken,
    ) -> Result<SessionHandle, ManagerError> {
        let mut last_error: Option<anyhow::Error> = None;
        let mut status_shown_at = Instant::now();

        for (index, candidate) in self.chain.iter().enumerate() {
            let is_new_download = index > 0;
            if is_new_download {
                // Keep the previous message up for its minimum display time.
                sleep_or_cancel(status_shown_at + self.status_min_display, cancel).await?;
                // The fixed alternate notice stands in for this candidate's label.
                sink.emit(ProgressEvent::trying_alternate().to_worker_event());
                sink.emit(ProgressEvent::download_reset().to_worker_event());
            } else {
                sink.status(candidate.label.as_str());
            }
            status_shown_at = Instant::now();

            info!(
                "acquiring {} with candidate {}/{} (device={:?} dtype={:?} file={})",
                model_id,
                index + 1,
                self.chain.len(),
                candidate.device,
                candidate.dtype,
                candidate.weights_file_name()
            );

            match self
                .attempt(model_id, candidate, is_new_download, sink, cancel)
                .await
            {
                Ok(session) => return Ok(session),
                Err(ManagerError::Engine(err))
                    if is_missing_artifact(&err, &self.missing_artifact_markers) =>
                {
                    warn!(
                        "candidate {} for {} is missing an artifact: {}",
                        index + 1,
                        model_id,
                        err
                    );
                    last_error = Some(err);
                }
                Err(e) => {
                    error!("acquisition of {} failed: {}", model_id, e);
                    return Err(e);
                }
            }
        }

        Err(last_error.map_or(ManagerError::EmptyChain, ManagerError::Engine))
    }

    async fn attempt(
        &self,
        model_id: &str,
        candidate: &AcquisitionConfig,
        is_new_download: bool,
        sink: &EventSink,
        cancel: &CancellationToken,
    ) -> Result<SessionHandle, ManagerError> {
        let matcher = match &self.weights_file_suffixes {
            Some(suffixes) => ArtifactMatcher::new(suffixes.clone()),
            None => ArtifactMatcher::for_candidate(candidate),
        };
        let mut normalizer = ProgressNormalizer::new(matcher, is_new_download);

        let (progress_tx, mut progress_rx) = mpsc::unbounded_channel::<ArtifactProgress>();
        let acquire = self.adapter.acquire(model_id, candidate, progress_tx);
        tokio::pin!(acquire);

        let result = loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!("acquisition of {} cancelled", model_id);
                    return Err(ManagerError::Cancelled);
                }
                Some(raw) = progress_rx.recv() => forward_progress(&mut normalizer, &raw, sink),
                result = &mut acquire => break result,
            }
        };

        // Progress reported right before the adapter returned.
        while let Ok(raw) = progress_rx.try_recv() {
            forward_progress(&mut normalizer, &raw, sink);
        }

        result.map_err(ManagerError::Engine)
    }

    async fn store(&mut self, model_id: &str, session: SessionHandle) {
        if let Some(evicted) = self.cache.put(model_id, session) {
            info!("releasing session {} evicted from cache", evicted.model_id);
            self.adapter.release(evicted.session).await;
        }
    }

    /// Release every cached session, e.g. when the worker shuts down.
    pub async fn release_all(&mut self) {
        for evicted in self.cache.drain() {
            debug!("releasing session {} on teardown", evicted.model_id);
            self.adapter.release(evicted.session).await;
        }
    }
}

fn forward_progress(normalizer: &mut ProgressNormalizer, raw: &ArtifactProgress, sink: &EventSink) {
    for event in normalizer.normalize(raw) {
        sink.emit(event.to_worker_event());
    }
}

async fn sleep_or_cancel(deadline: Instant, cancel: &CancellationToken) -> Result<(), ManagerError> {
    tokio::select! {
        _ = cancel.cancelled() => Err(ManagerError::Cancelled),
        _ = tokio::time::sleep_until(deadline) => Ok(()),
    }
}
