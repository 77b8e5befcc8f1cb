//! Embedding orchestrator.
//!
//! Sits between the state machine and the embedding provider and enforces
//! the expensive-call discipline: at most one in-flight computation per
//! asset, a version-match no-op path that never touches the provider, a
//! bounded retry budget, and order-preserving batch coalescing.

use std::collections::HashSet;

use parking_lot::Mutex;
use tracing::debug;

use crate::config::Config;
use crate::error::PipelineError;
use crate::model::{Asset, AssetState};
use crate::provider::{EmbeddingProvider, with_backoff};
use crate::store::Store;

/// Result of one `ensure_indexed` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbedOutcome {
    /// Vector computed and stored; asset advanced to `indexed`.
    Computed,
    /// Stored vector already matches the content version; no provider
    /// call was made. Still reported as success.
    UpToDate,
    /// Another worker holds the in-flight slot for this asset. Not an
    /// error; the caller leaves the asset for the next pass.
    InFlight,
    /// A concurrent transition moved the asset first; the write was a
    /// CAS no-op.
    LostRace,
}

/// Orchestrates embedding computation against the store.
pub struct EmbeddingOrchestrator<'a> {
    store: &'a Store,
    provider: &'a dyn EmbeddingProvider,
    cfg: &'a Config,
    /// Process-local guard: asset ids with a computation in flight.
    in_flight: Mutex<HashSet<i64>>,
}

/// RAII release of the in-flight slot.
struct InFlightSlot<'a> {
    set: &'a Mutex<HashSet<i64>>,
    id: i64,
}

impl Drop for InFlightSlot<'_> {
    fn drop(&mut self) {
        self.set.lock().remove(&self.id);
    }
}

impl<'a> EmbeddingOrchestrator<'a> {
    pub fn new(store: &'a Store, provider: &'a dyn EmbeddingProvider, cfg: &'a Config) -> Self {
        Self {
            store,
            provider,
            cfg,
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    fn acquire(&self, id: i64) -> Option<InFlightSlot<'_>> {
        if self.in_flight.lock().insert(id) {
            Some(InFlightSlot {
                set: &self.in_flight,
                id,
            })
        } else {
            None
        }
    }

    /// Idempotent entry point used by the state machine for the
    /// `enriched → indexed` transition.
    pub fn ensure_indexed(&self, asset: &Asset) -> Result<EmbedOutcome, PipelineError> {
        let id = asset
            .id
            .ok_or_else(|| PipelineError::Invariant("ensure_indexed on unsaved asset".into()))?;
        if asset.search_text.is_none() || asset.content_version.is_none() {
            return Err(PipelineError::Invariant(format!(
                "ensure_indexed on unenriched asset {}",
                asset.source_id
            )));
        }

        let Some(_slot) = self.acquire(id) else {
            debug!(source_id = %asset.source_id, "embedding already in flight");
            return Ok(EmbedOutcome::InFlight);
        };

        // Re-read under the slot: the caller's snapshot may predate a
        // concurrent completion, and the provider call must not repeat
        // for an unchanged content version.
        let current = self
            .store
            .get(id)?
            .ok_or_else(|| PipelineError::NotFound(asset.source_id.clone()))?;
        if current.state != AssetState::Enriched {
            return Ok(EmbedOutcome::LostRace);
        }
        let (Some(search_text), Some(version)) = (
            current.search_text.as_deref(),
            current.content_version.as_deref(),
        ) else {
            return Err(PipelineError::Invariant(format!(
                "enriched asset {} has no search text",
                current.source_id
            )));
        };

        // Version already matches: confirm the state flip, skip the
        // provider entirely.
        if current.embedding.is_some() && current.embedding_version.as_deref() == Some(version) {
            return if self.store.confirm_indexed(id)? {
                Ok(EmbedOutcome::UpToDate)
            } else {
                Ok(EmbedOutcome::LostRace)
            };
        }

        let vector = with_backoff(
            "embed",
            self.cfg.provider_max_attempts,
            self.cfg.backoff_base_ms,
            || self.provider.embed(search_text),
        )?;

        if self.store.apply_embedding(id, &vector, version)? {
            debug!(source_id = %current.source_id, dim = vector.len(), "embedding stored");
            Ok(EmbedOutcome::Computed)
        } else {
            // Enrichment moved underneath us; the fresh version will be
            // picked up on the next pass.
            Ok(EmbedOutcome::LostRace)
        }
    }

    /// Coalesce several stale assets into provider batch calls.
    ///
    /// Assets whose vector is already current are confirmed without a
    /// provider call; the rest are chunked by `embed_batch_size`. Result
    /// order within a batch follows request order, so vector `i` always
    /// lands on asset `i`.
    pub fn ensure_indexed_batch(
        &self,
        assets: &[Asset],
    ) -> Result<Vec<(i64, EmbedOutcome)>, PipelineError> {
        let mut outcomes = Vec::with_capacity(assets.len());
        let mut stale: Vec<(Asset, InFlightSlot<'_>)> = Vec::new();

        for asset in assets {
            let id = asset.id.ok_or_else(|| {
                PipelineError::Invariant("ensure_indexed_batch on unsaved asset".into())
            })?;
            let Some(slot) = self.acquire(id) else {
                outcomes.push((id, EmbedOutcome::InFlight));
                continue;
            };
            let current = self
                .store
                .get(id)?
                .ok_or_else(|| PipelineError::NotFound(asset.source_id.clone()))?;
            if current.state != AssetState::Enriched {
                outcomes.push((id, EmbedOutcome::LostRace));
            } else if current.embedding.is_some()
                && current.embedding_version.is_some()
                && current.embedding_version == current.content_version
            {
                let outcome = if self.store.confirm_indexed(id)? {
                    EmbedOutcome::UpToDate
                } else {
                    EmbedOutcome::LostRace
                };
                outcomes.push((id, outcome));
            } else {
                stale.push((current, slot));
            }
        }

        for chunk in stale.chunks(self.cfg.embed_batch_size) {
            let texts: Vec<String> = chunk
                .iter()
                .map(|(asset, _)| {
                    asset.search_text.clone().ok_or_else(|| {
                        PipelineError::Invariant(format!(
                            "ensure_indexed_batch on unenriched asset {}",
                            asset.source_id
                        ))
                    })
                })
                .collect::<Result<_, _>>()?;

            let vectors = with_backoff(
                "embed_batch",
                self.cfg.provider_max_attempts,
                self.cfg.backoff_base_ms,
                || self.provider.embed_batch(&texts),
            )?;
            if vectors.len() != chunk.len() {
                return Err(PipelineError::Invariant(format!(
                    "provider returned {} vectors for {} inputs",
                    vectors.len(),
                    chunk.len()
                )));
            }

            for ((asset, _slot), vector) in chunk.iter().zip(vectors) {
                let id = asset.id.expect("checked above");
                let version = asset
                    .content_version
                    .as_deref()
                    .expect("stale asset has version");
                let outcome = if self.store.apply_embedding(id, &vector, version)? {
                    EmbedOutcome::Computed
                } else {
                    EmbedOutcome::LostRace
                };
                outcomes.push((id, outcome));
            }
        }

        Ok(outcomes)
    }
}
