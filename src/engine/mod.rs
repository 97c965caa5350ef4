// Engine orchestration: session lifecycle, acquisition fallback, and streaming generation.

pub mod acquire;
pub mod cache;
pub mod error;
pub mod events;
pub mod progress;
pub mod session;
pub mod stats;
pub mod stream;
