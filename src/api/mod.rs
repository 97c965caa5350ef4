// Caller-facing entry points: tracing bootstrap and the in-process worker.

pub mod simple;
pub mod worker_api;
