// Progress normalization: raw per-artifact engine callbacks to one phase/percent stream.

use super::events::WorkerEvent;
use crate::adapter::traits::ArtifactProgress;
use crate::config::AcquisitionConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Downloading,
    Loading,
    Initializing,
    TryingAlternate,
}

impl Phase {
    pub fn message(self, percent: Option<u8>) -> String {
        match self {
            Phase::Downloading => {
                format!("Downloading ONNX model... {}%", percent.unwrap_or(0))
            }
            Phase::Loading => "Loading ONNX model into memory...".to_string(),
            Phase::Initializing => "Initializing WASM runtime...".to_string(),
            Phase::TryingAlternate => "Trying alternate model format...".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressEvent {
    pub phase: Phase,
    pub percent: Option<u8>,
    /// Set for every candidate after the first; consumers reset progress state on it.
    pub is_new_download: bool,
}

impl ProgressEvent {
    /// The 0% event sent before a fallback candidate starts downloading.
    pub fn download_reset() -> Self {
        Self {
            phase: Phase::Downloading,
            percent: Some(0),
            is_new_download: true,
        }
    }

    pub fn trying_alternate() -> Self {
        Self {
            phase: Phase::TryingAlternate,
            percent: None,
            is_new_download: false,
        }
    }

    pub fn to_worker_event(self) -> WorkerEvent {
        let message = self.phase.message(self.percent);
        match self.phase {
            Phase::Downloading => WorkerEvent::Progress {
                percent: self.percent.unwrap_or(0),
                message,
                is_new_download: self.is_new_download,
            },
            Phase::TryingAlternate => WorkerEvent::InitStep { message },
            Phase::Loading | Phase::Initializing => WorkerEvent::Status { message },
        }
    }
}

/// Picks the primary weights artifact out of everything the engine downloads.
#[derive(Debug, Clone)]
pub struct ArtifactMatcher {
    suffixes: Vec<String>,
}

impl ArtifactMatcher {
    pub fn new(suffixes: Vec<String>) -> Self {
        Self { suffixes }
    }

    /// Matches the weights file the candidate's dtype and file name resolve to.
    pub fn for_candidate(candidate: &AcquisitionConfig) -> Self {
        Self::new(vec![candidate.weights_file_name()])
    }

    pub fn matches(&self, file: &str) -> bool {
        self.suffixes.iter().any(|s| file.ends_with(s.as_str()))
    }
}

/// Per-candidate normalizer; a fresh one is built for every acquisition attempt.
pub struct ProgressNormalizer {
    matcher: ArtifactMatcher,
    is_new_download: bool,
    loading_announced: bool,
}

impl ProgressNormalizer {
    pub fn new(matcher: ArtifactMatcher, is_new_download: bool) -> Self {
        Self {
            matcher,
            is_new_download,
            loading_announced: false,
        }
    }

    pub fn normalize(&mut self, raw: &ArtifactProgress) -> Vec<ProgressEvent> {
        let Some(file) = raw.file() else {
            return Vec::new();
        };
        if !self.matcher.matches(file) {
            return Vec::new();
        }

        match raw {
            ArtifactProgress::Progress { loaded, total, .. } => {
                let Some(percent) = percent_of(*loaded, *total) else {
                    return Vec::new();
                };
                let mut events = vec![ProgressEvent {
                    phase: Phase::Downloading,
                    percent: Some(percent),
                    is_new_download: self.is_new_download,
                }];
                if percent == 100 && !self.loading_announced {
                    self.loading_announced = true;
                    events.push(self.phase_event(Phase::Loading));
                }
                events
            }
            ArtifactProgress::Done { .. } => vec![self.phase_event(Phase::Initializing)],
            _ => Vec::new(),
        }
    }

    fn phase_event(&self, phase: Phase) -> ProgressEvent {
        ProgressEvent {
            phase,
            percent: None,
            is_new_download: self.is_new_download,
        }
    }
}

/// Rounded percentage, clamped to 0..=100. `None` when the total is unknown.
fn percent_of(loaded: u64, total: u64) -> Option<u8> {
    if total == 0 {
        return None;
    }
    let pct = (loaded as f64 / total as f64 * 100.0).round();
    Some(pct.clamp(0.0, 100.0) as u8)
}

#[cfg(test)]
mod tests {
    use super::*;

    const WEIGHTS: &str = "onnx/model_quantized.onnx";

    fn progress(file: &str, loaded: u64, total: u64) -> ArtifactProgress {
        ArtifactProgress::Progress {
            file: file.to_string(),
            loaded,
            total,
        }
    }

    fn normalizer(is_new_download: bool) -> ProgressNormalizer {
        ProgressNormalizer::new(
            ArtifactMatcher::new(vec!["model_quantized.onnx".to_string()]),
            is_new_download,
        )
    }

    #[test]
    fn test_ignores_other_artifacts() {
        let mut n = normalizer(false);
        assert!(n.normalize(&progress("tokenizer.json", 10, 10)).is_empty());
        assert!(n.normalize(&progress("config.json", 1, 2)).is_empty());
        assert!(n.normalize(&ArtifactProgress::Ready).is_empty());
    }

    #[test]
    fn test_percent_is_rounded() {
        let mut n = normalizer(false);
        let events = n.normalize(&progress(WEIGHTS, 1, 3));
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].phase, Phase::Downloading);
        assert_eq!(events[0].percent, Some(33));
        assert!(!events[0].is_new_download);

        let events = n.normalize(&progress(WEIGHTS, 2, 3));
        assert_eq!(events[0].percent, Some(67));
    }

    #[test]
    fn test_loading_phase_emitted_once() {
        let mut n = normalizer(true);
        let first = n.normalize(&progress(WEIGHTS, 100, 100));
        assert_eq!(first.len(), 2);
        assert_eq!(first[1].phase, Phase::Loading);
        assert!(first[0].is_new_download);

        let again = n.normalize(&progress(WEIGHTS, 100, 100));
        assert_eq!(again.len(), 1);
        assert_eq!(again[0].phase, Phase::Downloading);
    }

    #[test]
    fn test_done_emits_initializing() {
        let mut n = normalizer(false);
        let events = n.normalize(&ArtifactProgress::Done {
            file: WEIGHTS.to_string(),
        });
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].phase, Phase::Initializing);
        assert_eq!(
            events[0].to_worker_event(),
            WorkerEvent::Status {
                message: "Initializing WASM runtime...".to_string()
            }
        );
    }

    #[test]
    fn test_zero_total_is_ignored() {
        let mut n = normalizer(false);
        assert!(n.normalize(&progress(WEIGHTS, 0, 0)).is_empty());
    }

    #[test]
    fn test_matcher_for_alternate_candidate() {
        let candidate = crate::config::default_acquisition_chain().remove(1);
        let matcher = ArtifactMatcher::for_candidate(&candidate);
        assert!(matcher.matches("onnx/decoder_model_merged_quantized.onnx"));
        assert!(!matcher.matches("onnx/model_quantized.onnx"));
    }

    #[test]
    fn test_reset_event_shape() {
        assert_eq!(
            ProgressEvent::download_reset().to_worker_event(),
            WorkerEvent::Progress {
                percent: 0,
                message: "Downloading ONNX model... 0%".to_string(),
                is_new_download: true,
            }
        );
    }
}
