//! External provider capabilities.
//!
//! The embedding and vision models are remote, rate-limited, fallible
//! dependencies. Each is modeled as a trait with a blocking call and a
//! typed result; callers compose retry/backoff through [`with_backoff`]
//! rather than embedding retry logic in business methods.

pub mod hash;
pub mod remote;

use std::thread;
use std::time::Duration;

use tracing::{debug, warn};

use crate::error::ProviderError;
use crate::model::VisionMetadata;

/// Produces fixed-dimension vectors from search text. Asset-side and
/// query-side embeddings must come through the same implementation so
/// both live in one vector space.
pub trait EmbeddingProvider: Send + Sync {
    /// Embed one text.
    fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError>;

    /// Embed several texts in one provider call, preserving input order.
    ///
    /// The default implementation loops over [`embed`]; providers with a
    /// real batch endpoint should override it.
    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        texts.iter().map(|t| self.embed(t)).collect()
    }

    /// Output vector dimension.
    fn dimension(&self) -> usize;

    /// Stable identifier for logs and stats.
    fn id(&self) -> &str;
}

/// Extracts structured metadata from an asset's visual content.
pub trait VisionProvider: Send + Sync {
    /// Analyze the binary referenced by `content_ref`.
    fn analyze(&self, content_ref: &str, is_video: bool) -> Result<VisionMetadata, ProviderError>;
}

/// Run `op` with exponential backoff, retrying only on
/// [`ProviderError::Retryable`], up to `max_attempts` total attempts.
///
/// Returns the last error when the budget is exhausted; the caller
/// decides whether that marks the asset failed or leaves it for a later
/// sweep.
pub fn with_backoff<T, F>(
    label: &str,
    max_attempts: u32,
    base_ms: u64,
    mut op: F,
) -> Result<T, ProviderError>
where
    F: FnMut() -> Result<T, ProviderError>,
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        match op() {
            Ok(v) => return Ok(v),
            Err(e @ ProviderError::Permanent(_)) => return Err(e),
            Err(e @ ProviderError::Retryable(_)) => {
                if attempt >= max_attempts {
                    warn!(label, attempt, error = %e, "provider retry budget exhausted");
                    return Err(e);
                }
                let delay = base_ms.saturating_mul(1 << (attempt - 1));
                debug!(label, attempt, delay_ms = delay, error = %e, "provider call failed, backing off");
                thread::sleep(Duration::from_millis(delay));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn backoff_retries_retryable_until_success() {
        let calls = AtomicU32::new(0);
        let out = with_backoff("test", 5, 1, || {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(ProviderError::Retryable("rate limited".into()))
            } else {
                Ok(42)
            }
        });
        assert_eq!(out.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn backoff_stops_at_budget() {
        let calls = AtomicU32::new(0);
        let out: Result<(), _> = with_backoff("test", 3, 1, || {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(ProviderError::Retryable("timeout".into()))
        });
        assert!(out.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn backoff_never_retries_permanent() {
        let calls = AtomicU32::new(0);
        let out: Result<(), _> = with_backoff("test", 5, 1, || {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(ProviderError::Permanent("unreadable content".into()))
        });
        assert!(matches!(out, Err(ProviderError::Permanent(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn default_embed_batch_preserves_order() {
        struct Lengths;
        impl EmbeddingProvider for Lengths {
            fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError> {
                Ok(vec![text.len() as f32])
            }
            fn dimension(&self) -> usize {
                1
            }
            fn id(&self) -> &str {
                "lengths"
            }
        }
        let out = Lengths
            .embed_batch(&["a".into(), "abc".into(), "ab".into()])
            .unwrap();
        assert_eq!(out, vec![vec![1.0], vec![3.0], vec![2.0]]);
    }
}
