// Streaming generation: drives one engine token stream and reports throughput.

use std::sync::Arc;

use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::error::ManagerError;
use super::events::{EventSink, WorkerEvent};
use super::stats::{FinalStats, ThroughputTracker};
use crate::adapter::traits::{EngineAdapter, Prompt, SessionHandle};
use crate::config::GenerationParams;

pub struct GenerationStreamController {
    adapter: Arc<dyn EngineAdapter>,
    end_of_sequence_markers: Vec<String>,
}

impl GenerationStreamController {
    pub fn new(adapter: Arc<dyn EngineAdapter>, end_of_sequence_markers: Vec<String>) -> Self {
        Self {
            adapter,
            end_of_sequence_markers,
        }
    }

    /// Run one generation to completion, emitting `stats` and `text` per token.
    ///
    /// The clock starts before the engine is asked to generate, so prompt
    /// processing counts toward the reported time.
    pub async fn run(
        &self,
        session: &SessionHandle,
        prompt: &Prompt,
        params: &GenerationParams,
        sink: &EventSink,
        cancel: &CancellationToken,
    ) -> Result<FinalStats, ManagerError> {
        let mut tracker = ThroughputTracker::start();
        sink.status("Preparing model for generation...");

        let mut tokens = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ManagerError::Cancelled),
            started = self.adapter.generate(session, prompt, params) => started?,
        };

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!("generation cancelled after {} tokens", tracker.token_count());
                    return Err(ManagerError::Cancelled);
                }
                next = tokens.next() => next,
            };
            let Some(fragment) = next else {
                break;
            };
            let fragment = fragment?;

            let running = tracker.record_token();
            sink.emit(WorkerEvent::Stats { stats: running });

            let text = strip_end_markers(&fragment, &self.end_of_sequence_markers);
            if !text.is_empty() {
                sink.emit(WorkerEvent::Text { text });
            }
        }

        let summary = tracker.finish();
        info!(
            "generation finished: {} tokens in {}s ({} tokens/s)",
            summary.total_tokens, summary.total_time, summary.average_speed
        );
        Ok(summary)
    }
}

/// Remove every occurrence of the engine's end-of-sequence control strings.
pub fn strip_end_markers(fragment: &str, markers: &[String]) -> String {
    markers
        .iter()
        .fold(fragment.to_string(), |text, marker| text.replace(marker.as_str(), ""))
}
