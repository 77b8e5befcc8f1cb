//! Hybrid search engine: semantic and lexical retrieval merged into one
//! deterministically ordered result list.
//!
//! The two passes score on incomparable native scales (cosine similarity
//! vs trigram Jaccard), so each pass is min-max normalized before
//! blending. Assets hit by both passes get a weighted sum; assets hit by
//! one pass keep their normalized single-pass score rather than being
//! penalized for missing the other. The final order is total and stable:
//! blended score desc, indexing recency desc, source id asc.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::collections::HashMap;

use tracing::{debug, warn};

use crate::config::Config;
use crate::error::SearchError;
use crate::model::{ScoredAsset, SearchFilters};
use crate::provider::EmbeddingProvider;
use crate::search::trigram;
use crate::store::{SearchCandidate, Store};

/// One raw pass hit before merging.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PassHit {
    pub asset_id: i64,
    pub score: f32,
}

/// A completed retrieval pass with its blend weight.
#[derive(Debug, Clone)]
pub struct Pass {
    pub weight: f32,
    pub hits: Vec<PassHit>,
}

/// Blended per-asset scores keyed by asset id.
#[derive(Debug, Clone, Copy, Default)]
pub struct Blend {
    pub combined: f32,
    pub first: Option<f32>,
    pub second: Option<f32>,
}

/// Read-only search over the asset store.
pub struct HybridSearch<'a> {
    store: &'a Store,
    embedder: Option<&'a dyn EmbeddingProvider>,
    cfg: &'a Config,
}

impl<'a> HybridSearch<'a> {
    pub fn new(store: &'a Store, embedder: Option<&'a dyn EmbeddingProvider>, cfg: &'a Config) -> Self {
        Self {
            store,
            embedder,
            cfg,
        }
    }

    /// Execute a query. Zero results is a valid outcome; a query-side
    /// embedding failure degrades to lexical-only instead of erroring.
    pub fn search(
        &self,
        query: &str,
        filters: &SearchFilters,
        limit: usize,
    ) -> Result<Vec<ScoredAsset>, SearchError> {
        let query = query.trim();
        if query.is_empty() {
            // No meaningful vector for an empty query: browse by filter.
            return self.browse(filters, limit);
        }

        let mut candidates: HashMap<i64, SearchCandidate> = HashMap::new();

        let semantic = match self.query_embedding(query) {
            Some(query_vec) => Some(self.semantic_pass(&query_vec, filters, &mut candidates)?),
            None => None,
        };
        let lexical = recover_lexical(
            semantic.is_some(),
            self.lexical_pass(query, filters, &mut candidates),
        )?;

        // `merge` is symmetric, so the semantic pass is always passed
        // first and `first`/`second` map to semantic/lexical below.
        let blended = merge(
            &Pass {
                weight: self.cfg.semantic_weight,
                hits: semantic.unwrap_or_default(),
            },
            &Pass {
                weight: self.cfg.lexical_weight,
                hits: lexical,
            },
        );

        let mut results: Vec<ScoredAsset> = blended
            .iter()
            .filter_map(|(id, blend)| {
                candidates.get(id).map(|c| ScoredAsset {
                    source_id: c.source_id.clone(),
                    filename: c.filename.clone(),
                    album_name: c.album_name.clone(),
                    category: c.category,
                    media_type: c.media_type,
                    score: blend.combined,
                    semantic_score: blend.first,
                    lexical_score: blend.second,
                    indexed_at: c.indexed_at,
                })
            })
            .collect();

        sort_results(&mut results);
        results.truncate(limit);
        debug!(query, hits = results.len(), "hybrid search complete");
        Ok(results)
    }

    /// Filter-only listing for an empty query: most recently indexed
    /// first, deterministic on ties.
    fn browse(&self, filters: &SearchFilters, limit: usize) -> Result<Vec<ScoredAsset>, SearchError> {
        let mut results: Vec<ScoredAsset> = self
            .store
            .lexical_candidates(filters)?
            .into_iter()
            .map(|c| ScoredAsset {
                source_id: c.source_id,
                filename: c.filename,
                album_name: c.album_name,
                category: c.category,
                media_type: c.media_type,
                score: 0.0,
                semantic_score: None,
                lexical_score: None,
                indexed_at: c.indexed_at,
            })
            .collect();
        sort_results(&mut results);
        results.truncate(limit);
        Ok(results)
    }

    /// Compute the query embedding, degrading to `None` on any provider
    /// failure. The remote provider enforces the wall-clock timeout.
    fn query_embedding(&self, query: &str) -> Option<Vec<f32>> {
        let embedder = self.embedder?;
        match embedder.embed(query) {
            Ok(vec) if !vec.iter().all(|v| *v == 0.0) => Some(vec),
            Ok(_) => None,
            Err(e) => {
                warn!(error = %e, "query embedding failed, falling back to lexical-only");
                None
            }
        }
    }

    fn semantic_pass(
        &self,
        query_vec: &[f32],
        filters: &SearchFilters,
        candidates: &mut HashMap<i64, SearchCandidate>,
    ) -> Result<Vec<PassHit>, SearchError> {
        let rows = self.store.semantic_candidates(filters)?;
        let hits = top_k(
            rows.iter().filter_map(|c| {
                let embedding = c.embedding.as_ref()?;
                if embedding.len() != query_vec.len() {
                    return None;
                }
                Some(PassHit {
                    asset_id: c.id,
                    score: cosine(query_vec, embedding),
                })
            }),
            self.cfg.semantic_top_k,
        );
        for c in rows {
            candidates.entry(c.id).or_insert(c);
        }
        Ok(hits)
    }

    fn lexical_pass(
        &self,
        query: &str,
        filters: &SearchFilters,
        candidates: &mut HashMap<i64, SearchCandidate>,
    ) -> Result<Vec<PassHit>, SearchError> {
        let query_trigrams = trigram::trigrams(query);
        let rows = self.store.lexical_candidates(filters)?;
        let floor = self.cfg.lexical_floor;
        let hits = top_k(
            rows.iter().filter_map(|c| {
                let text = c.search_text.as_deref()?;
                let score = trigram::similarity_to(&query_trigrams, text);
                (score >= floor).then_some(PassHit {
                    asset_id: c.id,
                    score,
                })
            }),
            self.cfg.lexical_top_k,
        );
        for c in rows {
            candidates.entry(c.id).or_insert(c);
        }
        Ok(hits)
    }
}

/// Degradation policy for the lexical pass. With semantic hits in hand a
/// lexical failure costs one pass, not the request; without them it is
/// the both-passes-down case.
fn recover_lexical(
    semantic_available: bool,
    lexical: Result<Vec<PassHit>, SearchError>,
) -> Result<Vec<PassHit>, SearchError> {
    match lexical {
        Ok(hits) => Ok(hits),
        Err(e) if semantic_available => {
            warn!(error = %e, "lexical pass failed, serving semantic hits only");
            Ok(Vec::new())
        }
        Err(e) => Err(SearchError::Degraded(format!(
            "semantic pass unavailable and lexical pass failed: {e}"
        ))),
    }
}

/// Merge two normalized passes. Symmetric in argument order: each hit
/// carries its own pass weight, so `merge(a, b) == merge(b, a)`.
pub fn merge(a: &Pass, b: &Pass) -> HashMap<i64, Blend> {
    let a_norm = normalize(&a.hits);
    let b_norm = normalize(&b.hits);

    let mut out: HashMap<i64, Blend> = HashMap::new();
    for (id, score) in &a_norm {
        out.insert(
            *id,
            Blend {
                combined: *score,
                first: Some(*score),
                second: None,
            },
        );
    }
    for (id, score) in &b_norm {
        out.entry(*id)
            .and_modify(|blend| {
                let first = blend.first.expect("set in first loop");
                blend.second = Some(*score);
                blend.combined = a.weight * first + b.weight * *score;
            })
            .or_insert(Blend {
                combined: *score,
                first: None,
                second: Some(*score),
            });
    }
    out
}

/// Min-max normalize one pass into [0, 1]. A constant pass maps to 1.0
/// everywhere; an empty pass stays empty.
fn normalize(hits: &[PassHit]) -> Vec<(i64, f32)> {
    if hits.is_empty() {
        return Vec::new();
    }
    let min = hits.iter().map(|h| h.score).fold(f32::INFINITY, f32::min);
    let max = hits
        .iter()
        .map(|h| h.score)
        .fold(f32::NEG_INFINITY, f32::max);
    let range = max - min;
    if range.abs() < f32::EPSILON {
        return hits.iter().map(|h| (h.asset_id, 1.0)).collect();
    }
    hits.iter()
        .map(|h| (h.asset_id, (h.score - min) / range))
        .collect()
}

/// Heap-based top-k selection, highest score first.
fn top_k(hits: impl Iterator<Item = PassHit>, k: usize) -> Vec<PassHit> {
    if k == 0 {
        return Vec::new();
    }
    let mut heap = BinaryHeap::with_capacity(k + 1);
    for hit in hits {
        heap.push(std::cmp::Reverse(HeapEntry(hit)));
        if heap.len() > k {
            heap.pop();
        }
    }
    heap.into_sorted_vec()
        .into_iter()
        .map(|std::cmp::Reverse(entry)| entry.0)
        .collect()
}

struct HeapEntry(PassHit);

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.0.score == other.0.score
    }
}

impl Eq for HeapEntry {}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0
            .score
            .partial_cmp(&other.0.score)
            .unwrap_or(Ordering::Equal)
    }
}

/// Deterministic total order: score desc, indexing recency desc,
/// source id asc.
fn sort_results(results: &mut [ScoredAsset]) {
    results.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| b.indexed_at.cmp(&a.indexed_at))
            .then_with(|| a.source_id.cmp(&b.source_id))
    });
}

/// Cosine similarity. Vectors from the store are already L2-normalized
/// by the providers, but re-normalizing keeps the metric honest for
/// arbitrary input.
pub fn cosine(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let na: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let nb: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if na == 0.0 || nb == 0.0 {
        return 0.0;
    }
    dot / (na * nb)
}
