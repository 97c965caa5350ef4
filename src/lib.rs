//! Worker-side orchestration for streaming text generation.
//!
//! A [`engine::session::SessionManager`] keeps a small LRU cache of loaded model
//! sessions, acquires new ones through a fallback chain of engine configurations,
//! normalizes download progress, and streams tokens with throughput statistics.
//! The inference engine itself sits behind [`adapter::traits::EngineAdapter`].

pub mod adapter;
pub mod api;
pub mod config;
pub mod engine;
pub mod server;
