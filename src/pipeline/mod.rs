//! Ingestion pipeline: the per-asset state machine and the worker pool
//! that drives it.
//!
//! Each asset moves `pending → classified → enriched → indexed`, with
//! `failed` as the recoverable escape hatch. One [`Pipeline::advance`]
//! call performs exactly the work of one transition and persists state
//! plus payload through a conditional store write, so concurrent workers
//! on the same asset race safely: the loser's write is a no-op.

pub mod classifier;
pub mod embedding;
pub mod enricher;

use std::thread;

use crossbeam_channel::bounded;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{PipelineError, ProviderError};
use crate::model::{Asset, AssetState};
use crate::provider::{EmbeddingProvider, VisionProvider, with_backoff};
use crate::store::Store;

use embedding::{EmbedOutcome, EmbeddingOrchestrator};

/// Work queue capacity for the ingestion worker pool. Small enough to
/// give backpressure, large enough to keep workers fed.
const WORK_CHANNEL_SIZE: usize = 64;

/// Summary of one ingestion run.
#[derive(Debug, Default, Clone)]
pub struct RunReport {
    pub advanced: usize,
    pub indexed: usize,
    pub failed: usize,
    /// Assets left mid-pipeline by a retryable stall (provider outage).
    pub stalled: usize,
}

/// Coordinates classifier, enricher, and embedding orchestrator over the
/// shared store.
pub struct Pipeline<'a> {
    store: &'a Store,
    embedder: EmbeddingOrchestrator<'a>,
    vision: Option<&'a dyn VisionProvider>,
    cfg: &'a Config,
}

impl<'a> Pipeline<'a> {
    pub fn new(
        store: &'a Store,
        embedding_provider: &'a dyn EmbeddingProvider,
        vision: Option<&'a dyn VisionProvider>,
        cfg: &'a Config,
    ) -> Self {
        Self {
            store,
            embedder: EmbeddingOrchestrator::new(store, embedding_provider, cfg),
            vision,
            cfg,
        }
    }

    /// Drive one asset through its next eligible transition.
    ///
    /// Returns the state observed after the attempt. A CAS miss (another
    /// worker advanced the asset first) is not an error; the freshly
    /// observed state is returned. Retryable provider errors propagate
    /// with the asset's state unchanged, so a later sweep retries it.
    pub fn advance(&self, asset_id: i64) -> Result<AssetState, PipelineError> {
        let asset = self
            .store
            .get(asset_id)?
            .ok_or_else(|| PipelineError::NotFound(format!("asset id {asset_id}")))?;

        match asset.state {
            AssetState::Pending => self.classify_step(&asset),
            AssetState::Classified => self.enrich_step(&asset),
            AssetState::Enriched => self.embed_step(&asset),
            // Terminal for this pass. `failed → pending` happens only via
            // an explicit reset on the store.
            AssetState::Indexed | AssetState::Failed => Ok(asset.state),
        }
    }

    fn observed_state(&self, id: i64) -> Result<AssetState, PipelineError> {
        Ok(self
            .store
            .get(id)?
            .ok_or_else(|| PipelineError::NotFound(format!("asset id {id}")))?
            .state)
    }

    fn classify_step(&self, asset: &Asset) -> Result<AssetState, PipelineError> {
        let id = asset.id.expect("loaded asset has id");
        let decision = match with_backoff(
            "classify",
            self.cfg.provider_max_attempts,
            self.cfg.backoff_base_ms,
            || classifier::classify(asset, self.vision, self.cfg),
        ) {
            Ok(d) => d,
            Err(e @ ProviderError::Retryable(_)) => {
                // Stays pending, eligible for a later pass.
                debug!(source_id = %asset.source_id, error = %e, "classification stalled");
                return Err(e.into());
            }
            Err(ProviderError::Permanent(reason)) => {
                let msg = format!("vision: {reason}");
                self.store.mark_failed(id, AssetState::Pending, &msg)?;
                warn!(source_id = %asset.source_id, reason = %msg, "asset failed classification");
                return self.observed_state(id);
            }
        };

        if self.store.apply_classification(
            id,
            decision.category,
            decision.vision.as_ref(),
            decision.needs_review,
        )? {
            Ok(AssetState::Classified)
        } else {
            self.observed_state(id)
        }
    }

    fn enrich_step(&self, asset: &Asset) -> Result<AssetState, PipelineError> {
        let id = asset.id.expect("loaded asset has id");
        // Deterministic, no external calls; an error here is an ordering
        // bug and propagates as such.
        let text = enricher::enrich(asset)?;
        let version = enricher::content_version(&text);
        if self.store.apply_enrichment(id, &text, &version)? {
            Ok(AssetState::Enriched)
        } else {
            self.observed_state(id)
        }
    }

    fn embed_step(&self, asset: &Asset) -> Result<AssetState, PipelineError> {
        let id = asset.id.expect("loaded asset has id");
        match self.embedder.ensure_indexed(asset) {
            Ok(EmbedOutcome::Computed | EmbedOutcome::UpToDate) => Ok(AssetState::Indexed),
            Ok(EmbedOutcome::InFlight | EmbedOutcome::LostRace) => self.observed_state(id),
            Err(PipelineError::Provider(ProviderError::Retryable(reason))) => {
                // Retry budget exhausted for this pass: mark failed but
                // keep the asset lexically queryable.
                let msg = format!("embedding: {reason}");
                self.store.mark_failed(id, AssetState::Enriched, &msg)?;
                warn!(source_id = %asset.source_id, reason = %msg, "asset failed embedding");
                self.observed_state(id)
            }
            Err(PipelineError::Provider(ProviderError::Permanent(reason))) => {
                let msg = format!("embedding: {reason}");
                self.store.mark_failed(id, AssetState::Enriched, &msg)?;
                warn!(source_id = %asset.source_id, reason = %msg, "asset failed embedding");
                self.observed_state(id)
            }
            Err(e) => Err(e),
        }
    }

    /// Drive one asset to a terminal state for this pass.
    ///
    /// Loops `advance` until the asset is `indexed`, `failed`, or stalls
    /// on a retryable provider error.
    pub fn drain(&self, asset_id: i64) -> Result<AssetState, PipelineError> {
        loop {
            let before = self.observed_state(asset_id)?;
            match self.advance(asset_id) {
                Ok(state @ (AssetState::Indexed | AssetState::Failed)) => return Ok(state),
                Ok(state) if state == before => return Ok(state),
                Ok(_) => continue,
                Err(PipelineError::Provider(ProviderError::Retryable(_))) => return Ok(before),
                Err(e) => return Err(e),
            }
        }
    }

    /// Drive classification and enrichment only, stopping at `enriched`
    /// so the embed phase of [`run`](Self::run) can coalesce the backlog
    /// into batch provider calls.
    fn drain_until_embed(&self, asset_id: i64) -> Result<AssetState, PipelineError> {
        loop {
            let before = self.observed_state(asset_id)?;
            if matches!(
                before,
                AssetState::Enriched | AssetState::Indexed | AssetState::Failed
            ) {
                return Ok(before);
            }
            match self.advance(asset_id) {
                Ok(state) if state == before => return Ok(state),
                Ok(_) => continue,
                Err(PipelineError::Provider(ProviderError::Retryable(_))) => return Ok(before),
                Err(e) => return Err(e),
            }
        }
    }

    /// Run the pipeline over `asset_ids` with a pool of worker threads.
    ///
    /// Two phases: workers classify and enrich in parallel (stages stay
    /// sequential per asset through the state dependency, not through any
    /// held lock), then the enriched backlog goes through the batch embed
    /// path so one provider call covers many assets.
    pub fn run(&self, asset_ids: &[i64], workers: usize) -> RunReport {
        let workers = workers.max(1);
        let (tx, rx) = bounded::<i64>(WORK_CHANNEL_SIZE);
        let report = parking_lot::Mutex::new(RunReport::default());
        let report_ref = &report;

        thread::scope(|scope| {
            for _ in 0..workers {
                let rx = rx.clone();
                scope.spawn(move || {
                    while let Ok(id) = rx.recv() {
                        let outcome = self.drain_until_embed(id);
                        let mut r = report_ref.lock();
                        match outcome {
                            // left for the embed phase below
                            Ok(AssetState::Enriched) => {}
                            Ok(AssetState::Indexed) => {
                                r.advanced += 1;
                                r.indexed += 1;
                            }
                            Ok(AssetState::Failed) => {
                                r.advanced += 1;
                                r.failed += 1;
                            }
                            Ok(_) => r.stalled += 1,
                            Err(e) => {
                                warn!(asset_id = id, error = %e, "pipeline pass failed");
                                r.failed += 1;
                            }
                        }
                    }
                });
            }
            drop(rx);
            for id in asset_ids {
                let _ = tx.send(*id);
            }
            drop(tx);
        });

        let mut report = report.into_inner();
        self.embed_phase(asset_ids, &mut report);
        info!(
            total = asset_ids.len(),
            indexed = report.indexed,
            failed = report.failed,
            stalled = report.stalled,
            "ingestion run complete"
        );
        report
    }

    /// Batch-embed everything the classify/enrich phase left `enriched`.
    fn embed_phase(&self, asset_ids: &[i64], report: &mut RunReport) {
        let mut enriched = Vec::new();
        for id in asset_ids {
            match self.store.get(*id) {
                Ok(Some(asset)) if asset.state == AssetState::Enriched => enriched.push(asset),
                Ok(_) => {}
                Err(e) => {
                    warn!(asset_id = id, error = %e, "embed phase read failed");
                    report.failed += 1;
                }
            }
        }
        if enriched.is_empty() {
            return;
        }

        match self.embedder.ensure_indexed_batch(&enriched) {
            Ok(outcomes) => {
                for (_, outcome) in outcomes {
                    match outcome {
                        EmbedOutcome::Computed | EmbedOutcome::UpToDate => {
                            report.advanced += 1;
                            report.indexed += 1;
                        }
                        EmbedOutcome::InFlight | EmbedOutcome::LostRace => report.stalled += 1,
                    }
                }
            }
            // Same policy as the per-asset path: an exhausted provider
            // budget marks the assets failed but leaves them lexically
            // queryable through their retained search text.
            Err(PipelineError::Provider(err)) => {
                let msg = format!("embedding: {err}");
                for asset in &enriched {
                    let id = asset.id.expect("loaded asset has id");
                    if let Err(e) = self.store.mark_failed(id, AssetState::Enriched, &msg) {
                        warn!(asset_id = id, error = %e, "failed to record embed failure");
                    }
                    report.advanced += 1;
                    report.failed += 1;
                }
                warn!(count = enriched.len(), reason = %msg, "embed phase failed");
            }
            Err(e) => {
                warn!(error = %e, "embed phase aborted");
                report.failed += enriched.len();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProviderError;
    use crate::model::{Category, NewAsset, VisionMetadata};
    use crate::provider::hash::HashEmbedder;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct ScriptedVision {
        calls: AtomicU32,
        result: Result<VisionMetadata, ProviderError>,
    }

    impl ScriptedVision {
        fn returning(result: Result<VisionMetadata, ProviderError>) -> Self {
            Self {
                calls: AtomicU32::new(0),
                result,
            }
        }
    }

    impl VisionProvider for ScriptedVision {
        fn analyze(&self, _: &str, _: bool) -> Result<VisionMetadata, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.result.clone()
        }
    }

    fn register(store: &Store, source_id: &str, filename: &str, album: Option<&str>) -> i64 {
        store
            .register(&NewAsset {
                source_id: source_id.into(),
                filename: filename.into(),
                album_path: album.map(String::from),
                content_ref: Some(format!("https://cdn.example/{source_id}.jpg")),
                ..Default::default()
            })
            .unwrap()
    }

    fn fast_cfg() -> Config {
        Config {
            backoff_base_ms: 1,
            ..Config::default()
        }
    }

    #[test]
    fn advance_walks_the_full_ladder() {
        let store = Store::open_in_memory().unwrap();
        let cfg = fast_cfg();
        let embedder = HashEmbedder::default();
        let pipeline = Pipeline::new(&store, &embedder, None, &cfg);

        let id = register(&store, "p-1", "Generic_Flyer_Base.png", None);
        assert_eq!(pipeline.advance(id).unwrap(), AssetState::Classified);
        assert_eq!(pipeline.advance(id).unwrap(), AssetState::Enriched);
        assert_eq!(pipeline.advance(id).unwrap(), AssetState::Indexed);
        // terminal: further advances are no-ops
        assert_eq!(pipeline.advance(id).unwrap(), AssetState::Indexed);

        let asset = store.get(id).unwrap().unwrap();
        assert_eq!(asset.category, Category::Template);
        assert!(asset.embedding_current());
    }

    #[test]
    fn no_transition_skips_a_stage() {
        let store = Store::open_in_memory().unwrap();
        let cfg = fast_cfg();
        let embedder = HashEmbedder::default();
        let pipeline = Pipeline::new(&store, &embedder, None, &cfg);

        let id = register(&store, "p-2", "template.png", None);
        // after one advance the asset is classified, never enriched or
        // indexed directly from pending
        pipeline.advance(id).unwrap();
        let asset = store.get(id).unwrap().unwrap();
        assert_eq!(asset.state, AssetState::Classified);
        assert!(asset.search_text.is_none());
        assert!(asset.embedding.is_none());
    }

    #[test]
    fn retryable_vision_failure_leaves_asset_pending() {
        let store = Store::open_in_memory().unwrap();
        let cfg = fast_cfg();
        let embedder = HashEmbedder::default();
        let vision = ScriptedVision::returning(Err(ProviderError::Retryable("503".into())));
        let pipeline = Pipeline::new(&store, &embedder, Some(&vision), &cfg);

        let id = register(&store, "p-3", "candid.jpg", None);
        let err = pipeline.advance(id).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::Provider(ProviderError::Retryable(_))
        ));
        assert_eq!(
            store.get(id).unwrap().unwrap().state,
            AssetState::Pending,
            "retryable failure must not consume the asset"
        );
        // backoff retried up to the budget
        assert_eq!(vision.calls.load(Ordering::SeqCst), cfg.provider_max_attempts);
    }

    #[test]
    fn permanent_vision_failure_marks_failed_with_reason() {
        let store = Store::open_in_memory().unwrap();
        let cfg = fast_cfg();
        let embedder = HashEmbedder::default();
        let vision =
            ScriptedVision::returning(Err(ProviderError::Permanent("unreadable content".into())));
        let pipeline = Pipeline::new(&store, &embedder, Some(&vision), &cfg);

        let id = register(&store, "p-4", "corrupt.jpg", None);
        assert_eq!(pipeline.advance(id).unwrap(), AssetState::Failed);
        let asset = store.get(id).unwrap().unwrap();
        assert!(asset.failure.unwrap().contains("unreadable content"));
        // exactly one attempt, permanent errors are not retried
        assert_eq!(vision.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn failed_asset_recovers_only_via_explicit_reset() {
        let store = Store::open_in_memory().unwrap();
        let cfg = fast_cfg();
        let embedder = HashEmbedder::default();
        let vision =
            ScriptedVision::returning(Err(ProviderError::Permanent("unreadable".into())));
        let pipeline = Pipeline::new(&store, &embedder, Some(&vision), &cfg);

        let id = register(&store, "p-5", "corrupt.jpg", None);
        pipeline.advance(id).unwrap();
        assert_eq!(store.get(id).unwrap().unwrap().state, AssetState::Failed);
        // advancing a failed asset is a no-op
        assert_eq!(pipeline.advance(id).unwrap(), AssetState::Failed);

        store.reset_failed().unwrap();
        assert_eq!(store.get(id).unwrap().unwrap().state, AssetState::Pending);
    }

    #[test]
    fn drain_reaches_indexed_in_one_call() {
        let store = Store::open_in_memory().unwrap();
        let cfg = fast_cfg();
        let embedder = HashEmbedder::default();
        let pipeline = Pipeline::new(&store, &embedder, None, &cfg);

        let id = register(&store, "p-6", "Brand_Logo_Icon.png", None);
        assert_eq!(pipeline.drain(id).unwrap(), AssetState::Indexed);
    }

    struct CountingEmbedder {
        inner: HashEmbedder,
        single_calls: AtomicU32,
        batch_calls: AtomicU32,
        fail_with: Option<ProviderError>,
    }

    impl CountingEmbedder {
        fn ok() -> Self {
            Self {
                inner: HashEmbedder::default(),
                single_calls: AtomicU32::new(0),
                batch_calls: AtomicU32::new(0),
                fail_with: None,
            }
        }

        fn failing(err: ProviderError) -> Self {
            Self {
                fail_with: Some(err),
                ..Self::ok()
            }
        }
    }

    impl EmbeddingProvider for CountingEmbedder {
        fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError> {
            self.single_calls.fetch_add(1, Ordering::SeqCst);
            match &self.fail_with {
                Some(e) => Err(e.clone()),
                None => self.inner.embed(text),
            }
        }

        fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
            self.batch_calls.fetch_add(1, Ordering::SeqCst);
            match &self.fail_with {
                Some(e) => Err(e.clone()),
                None => texts.iter().map(|t| self.inner.embed(t)).collect(),
            }
        }

        fn dimension(&self) -> usize {
            self.inner.dimension()
        }

        fn id(&self) -> &str {
            "counting"
        }
    }

    #[test]
    fn ingest_run_coalesces_embeddings_into_one_batch_call() {
        let store = Store::open_in_memory().unwrap();
        let cfg = fast_cfg();
        let embedder = CountingEmbedder::ok();
        let pipeline = Pipeline::new(&store, &embedder, None, &cfg);

        let ids: Vec<i64> = (0..5)
            .map(|i| register(&store, &format!("bc-{i}"), &format!("flyer_{i}.png"), None))
            .collect();
        let report = pipeline.run(&ids, 2);
        assert_eq!(report.indexed, 5);

        // one provider call for the whole backlog, none per asset
        assert_eq!(embedder.batch_calls.load(Ordering::SeqCst), 1);
        assert_eq!(embedder.single_calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn embed_phase_failure_marks_assets_failed_but_lexically_queryable() {
        let store = Store::open_in_memory().unwrap();
        let cfg = fast_cfg();
        let embedder = CountingEmbedder::failing(ProviderError::Retryable("timeout".into()));
        let pipeline = Pipeline::new(&store, &embedder, None, &cfg);

        let ids: Vec<i64> = (0..3)
            .map(|i| register(&store, &format!("bf-{i}"), &format!("flyer_{i}.png"), None))
            .collect();
        let report = pipeline.run(&ids, 2);
        assert_eq!(report.failed, 3);
        assert_eq!(report.indexed, 0);

        for id in &ids {
            let asset = store.get(*id).unwrap().unwrap();
            assert_eq!(asset.state, AssetState::Failed);
            assert!(asset.failure.unwrap().starts_with("embedding:"));
        }
        // search text survived classification/enrichment, so the assets
        // stay findable by keyword
        let hits = store
            .lexical_candidates(&crate::model::SearchFilters::default())
            .unwrap();
        assert_eq!(hits.len(), 3);
    }

    #[test]
    fn worker_pool_indexes_everything() {
        let store = Store::open_in_memory().unwrap();
        let cfg = fast_cfg();
        let embedder = HashEmbedder::default();
        let pipeline = Pipeline::new(&store, &embedder, None, &cfg);

        let ids: Vec<i64> = (0..12)
            .map(|i| register(&store, &format!("w-{i}"), &format!("flyer_{i}.png"), None))
            .collect();
        let report = pipeline.run(&ids, 4);
        assert_eq!(report.indexed, 12);
        assert_eq!(report.failed, 0);

        let stats = store.stats().unwrap();
        assert_eq!(stats.by_state.get("indexed"), Some(&12));
    }

    #[test]
    fn concurrent_workers_on_same_asset_do_not_corrupt_state() {
        let store = Store::open_in_memory().unwrap();
        let cfg = fast_cfg();
        let embedder = HashEmbedder::default();
        let pipeline = Pipeline::new(&store, &embedder, None, &cfg);

        let id = register(&store, "p-7", "shared_template.png", None);
        thread::scope(|scope| {
            for _ in 0..6 {
                scope.spawn(|| {
                    // every worker drives the same asset; CAS misses are
                    // tolerated, corruption is not
                    let _ = pipeline.drain(id);
                });
            }
        });

        let asset = store.get(id).unwrap().unwrap();
        assert_eq!(asset.state, AssetState::Indexed);
        assert!(asset.embedding_current());
    }

    #[test]
    fn reingestion_resets_and_reindexes() {
        let store = Store::open_in_memory().unwrap();
        let cfg = fast_cfg();
        let embedder = HashEmbedder::default();
        let pipeline = Pipeline::new(&store, &embedder, None, &cfg);

        let id = register(&store, "p-8", "base_template.png", None);
        pipeline.drain(id).unwrap();
        let first = store.get(id).unwrap().unwrap();

        // caption changes upstream; sync re-registers
        store
            .register(&NewAsset {
                source_id: "p-8".into(),
                filename: "base_template.png".into(),
                caption: Some("now with a caption".into()),
                ..Default::default()
            })
            .unwrap();
        let stale = store.get(id).unwrap().unwrap();
        assert_eq!(stale.state, AssetState::Pending);
        // old vector retained but no longer current once re-enriched
        assert_eq!(stale.embedding, first.embedding);

        pipeline.drain(id).unwrap();
        let fresh = store.get(id).unwrap().unwrap();
        assert!(fresh.embedding_current());
        assert_ne!(fresh.content_version, first.content_version);
        assert_ne!(fresh.embedding, first.embedding);
    }
}
