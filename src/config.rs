//! Runtime configuration with environment overrides.
//!
//! Defaults are sensible for a 10K-asset library; every knob can be
//! overridden through a `DAMS_*` environment variable (read via dotenvy,
//! so a `.env` file works too).

/// Tunables for the ingestion pipeline and hybrid search engine.
#[derive(Debug, Clone)]
pub struct Config {
    /// Weight for the semantic pass when blending scores (default: 0.6).
    pub semantic_weight: f32,
    /// Weight for the lexical pass when blending scores (default: 0.4).
    pub lexical_weight: f32,
    /// Candidates taken from the semantic pass before merging (default: 100).
    pub semantic_top_k: usize,
    /// Candidates taken from the lexical pass before merging (default: 100).
    pub lexical_top_k: usize,
    /// Minimum trigram similarity for a lexical candidate (default: 0.1).
    pub lexical_floor: f32,
    /// Maximum attempts for one provider call, embedding or vision
    /// (default: 3).
    pub provider_max_attempts: u32,
    /// Base backoff between provider retries, in ms (default: 250, doubled
    /// per attempt).
    pub backoff_base_ms: u64,
    /// Assets per provider batch call (default: 50).
    pub embed_batch_size: usize,
    /// Vision reusability score at or above which an asset counts as a
    /// template (default: 4 on the 1..=5 rubric).
    pub vision_template_threshold: u8,
    /// Ingestion worker threads (default: 4).
    pub workers: usize,
    /// Timeout for the query-embedding call on the search path, in ms
    /// (default: 2000). On expiry the engine falls back to lexical-only.
    pub query_embed_timeout_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            semantic_weight: 0.6,
            lexical_weight: 0.4,
            semantic_top_k: 100,
            lexical_top_k: 100,
            lexical_floor: 0.1,
            provider_max_attempts: 3,
            backoff_base_ms: 250,
            embed_batch_size: 50,
            vision_template_threshold: 4,
            workers: 4,
            query_embed_timeout_ms: 2000,
        }
    }
}

impl Config {
    /// Load config from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();

        if let Ok(val) = dotenvy::var("DAMS_SEMANTIC_WEIGHT")
            && let Ok(w) = val.parse()
        {
            cfg.semantic_weight = w;
        }

        if let Ok(val) = dotenvy::var("DAMS_LEXICAL_WEIGHT")
            && let Ok(w) = val.parse()
        {
            cfg.lexical_weight = w;
        }

        if let Ok(val) = dotenvy::var("DAMS_SEMANTIC_TOP_K")
            && let Ok(k) = val.parse()
        {
            cfg.semantic_top_k = k;
        }

        if let Ok(val) = dotenvy::var("DAMS_LEXICAL_TOP_K")
            && let Ok(k) = val.parse()
        {
            cfg.lexical_top_k = k;
        }

        if let Ok(val) = dotenvy::var("DAMS_LEXICAL_FLOOR")
            && let Ok(f) = val.parse()
        {
            cfg.lexical_floor = f;
        }

        if let Ok(val) = dotenvy::var("DAMS_PROVIDER_MAX_ATTEMPTS")
            && let Ok(n) = val.parse()
        {
            cfg.provider_max_attempts = n;
        }

        if let Ok(val) = dotenvy::var("DAMS_BACKOFF_BASE_MS")
            && let Ok(ms) = val.parse()
        {
            cfg.backoff_base_ms = ms;
        }

        if let Ok(val) = dotenvy::var("DAMS_EMBED_BATCH_SIZE")
            && let Ok(n) = val.parse()
        {
            cfg.embed_batch_size = n;
        }

        if let Ok(val) = dotenvy::var("DAMS_VISION_TEMPLATE_THRESHOLD")
            && let Ok(t) = val.parse()
        {
            cfg.vision_template_threshold = t;
        }

        if let Ok(val) = dotenvy::var("DAMS_WORKERS")
            && let Ok(n) = val.parse()
        {
            cfg.workers = n;
        }

        if let Ok(val) = dotenvy::var("DAMS_QUERY_EMBED_TIMEOUT_MS")
            && let Ok(ms) = val.parse()
        {
            cfg.query_embed_timeout_ms = ms;
        }

        cfg
    }
}
