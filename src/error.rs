//! Error taxonomy for the ingestion pipeline and search path.
//!
//! Provider and store errors are classified here, at the orchestrator
//! boundary; raw transport errors never escape the provider module.

use thiserror::Error;

/// Error from an external provider call, already classified by the
/// provider implementation.
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    /// Transient failure (timeout, rate limit, 5xx). Eligible for
    /// retry with backoff.
    #[error("retryable provider error: {0}")]
    Retryable(String),

    /// Non-transient failure (unreadable content, 4xx rejection).
    /// The asset moves to `failed` rather than being retried.
    #[error("permanent provider error: {0}")]
    Permanent(String),
}

impl ProviderError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Retryable(_))
    }
}

/// Error surfaced by a single pipeline pass over one asset. Fatal to that
/// pass only, never to the process.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Provider(#[from] ProviderError),

    /// Ordering/programming error, e.g. enrichment invoked on an
    /// unclassified asset. Should never occur in correct operation.
    #[error("invariant violation: {0}")]
    Invariant(String),

    #[error("asset not found: {0}")]
    NotFound(String),

    #[error("store error: {0}")]
    Store(#[from] rusqlite::Error),
}

/// Error on the read-only search path. The engine degrades to
/// lexical-only before it fails; `Degraded` means both passes were
/// unavailable.
#[derive(Debug, Error)]
pub enum SearchError {
    #[error("search degraded: {0}")]
    Degraded(String),

    #[error("store error: {0}")]
    Store(#[from] rusqlite::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_classification() {
        assert!(ProviderError::Retryable("429".into()).is_retryable());
        assert!(!ProviderError::Permanent("bad image".into()).is_retryable());
    }

    #[test]
    fn provider_error_converts_into_pipeline_error() {
        let err: PipelineError = ProviderError::Permanent("unreadable".into()).into();
        assert!(matches!(
            err,
            PipelineError::Provider(ProviderError::Permanent(_))
        ));
    }
}
