// Error taxonomy for the session manager and the retryable/fatal classifier.

use thiserror::Error;

use crate::adapter::traits::AdapterError;

#[derive(Debug, Error)]
pub enum ManagerError {
    /// `generate` was called without a ready session. State is left unchanged.
    #[error("Generator not initialized")]
    NotInitialized,

    /// A command arrived while another acquisition or generation was running.
    #[error("worker is busy: {0} already in progress")]
    Busy(&'static str),

    #[error("operation cancelled")]
    Cancelled,

    #[error("acquisition chain is empty")]
    EmptyChain,

    /// Adapter failure, surfaced with the adapter's own message.
    #[error(transparent)]
    Engine(#[from] anyhow::Error),
}

impl ManagerError {
    pub fn is_protocol_violation(&self) -> bool {
        matches!(self, ManagerError::NotInitialized | ManagerError::Busy(_))
    }
}

/// True when `err` means "this artifact does not exist", i.e. the next candidate may succeed.
///
/// Adapters can say so explicitly with [`AdapterError::MissingArtifact`]; otherwise any
/// error in the chain whose message contains one of `markers` counts.
pub fn is_missing_artifact(err: &anyhow::Error, markers: &[String]) -> bool {
    err.chain().any(|cause| {
        if matches!(
            cause.downcast_ref::<AdapterError>(),
            Some(AdapterError::MissingArtifact(_))
        ) {
            return true;
        }
        let msg = cause.to_string();
        markers.iter().any(|m| msg.contains(m.as_str()))
    })
}
