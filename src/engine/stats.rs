// Throughput statistics for one generation: running token rate and final summary.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunningStats {
    pub token_count: usize,
    pub tokens_per_second: f64,
}

impl RunningStats {
    pub fn from_elapsed(token_count: usize, elapsed: Duration) -> Self {
        Self {
            token_count,
            tokens_per_second: round2(rate(token_count, elapsed.as_secs_f64())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinalStats {
    pub total_tokens: usize,
    /// Seconds, rounded to two decimals.
    pub total_time: f64,
    pub average_speed: f64,
}

impl FinalStats {
    pub fn from_elapsed(total_tokens: usize, elapsed: Duration) -> Self {
        let secs = elapsed.as_secs_f64();
        Self {
            total_tokens,
            total_time: round2(secs),
            average_speed: round2(rate(total_tokens, secs)),
        }
    }
}

/// Round to two decimal places.
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

// Zero tokens or a zero-length window reports 0 instead of NaN/inf.
fn rate(count: usize, secs: f64) -> f64 {
    if count == 0 || secs <= 0.0 {
        0.0
    } else {
        count as f64 / secs
    }
}

/// Counts tokens against a clock started when the generation began.
pub struct ThroughputTracker {
    started: Instant,
    token_count: usize,
}

impl ThroughputTracker {
    pub fn start() -> Self {
        Self {
            started: Instant::now(),
            token_count: 0,
        }
    }

    /// Count one produced token and return the updated running rate.
    pub fn record_token(&mut self) -> RunningStats {
        self.token_count += 1;
        RunningStats::from_elapsed(self.token_count, self.started.elapsed())
    }

    pub fn token_count(&self) -> usize {
        self.token_count
    }

    pub fn finish(&self) -> FinalStats {
        FinalStats::from_elapsed(self.token_count, self.started.elapsed())
    }
}
