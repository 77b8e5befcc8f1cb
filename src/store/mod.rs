//! SQLite-backed asset store: schema, conditional state transitions, and
//! candidate retrieval for both search passes.
//!
//! The store is the single shared mutable resource and the source of truth
//! for the optimistic concurrency check. Every state transition is one
//! `UPDATE ... WHERE id = ? AND state = ?` statement, so state and its
//! payload land atomically or not at all, and a losing concurrent writer
//! simply sees zero affected rows.

use std::collections::BTreeMap;
use std::path::Path;

use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension, Row, params};
use serde::Serialize;
use tracing::{debug, info};

use crate::model::{
    Asset, AssetState, Category, MediaType, NewAsset, SearchFilters, VisionMetadata,
};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS assets (
    id INTEGER PRIMARY KEY,
    source_id TEXT NOT NULL UNIQUE,
    filename TEXT NOT NULL,
    content_type TEXT,
    media_type TEXT NOT NULL,
    content_ref TEXT,
    album_path TEXT,
    album_name TEXT,
    caption TEXT,
    tags TEXT NOT NULL DEFAULT '[]',
    category TEXT NOT NULL DEFAULT 'unclassified',
    needs_review INTEGER NOT NULL DEFAULT 0,
    vision TEXT,
    search_text TEXT,
    content_version TEXT,
    embedding BLOB,
    embedding_version TEXT,
    state TEXT NOT NULL DEFAULT 'pending',
    failure TEXT,
    indexed_at INTEGER,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_assets_state ON assets(state);
CREATE INDEX IF NOT EXISTS idx_assets_album ON assets(album_name);
CREATE INDEX IF NOT EXISTS idx_assets_category ON assets(category);
"#;

const ASSET_COLUMNS: &str = "id, source_id, filename, content_type, media_type, content_ref, \
     album_path, album_name, caption, tags, category, needs_review, vision, search_text, \
     content_version, embedding, embedding_version, state, failure, indexed_at, created_at, \
     updated_at";

/// Thread-safe handle over one SQLite database.
pub struct Store {
    conn: Mutex<Connection>,
}

/// Candidate row for the search passes: identity plus whichever derived
/// field the pass scores against.
#[derive(Debug, Clone)]
pub struct SearchCandidate {
    pub id: i64,
    pub source_id: String,
    pub filename: String,
    pub album_name: Option<String>,
    pub category: Category,
    pub media_type: MediaType,
    pub indexed_at: Option<i64>,
    pub search_text: Option<String>,
    pub embedding: Option<Vec<f32>>,
}

/// Operational counters exposed to the status surface.
#[derive(Debug, Clone, Serialize)]
pub struct Stats {
    pub total: i64,
    pub by_state: BTreeMap<String, i64>,
    pub by_category: BTreeMap<String, i64>,
    pub needs_review: i64,
    pub failed: Vec<FailedAsset>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FailedAsset {
    pub source_id: String,
    pub filename: String,
    pub failure: Option<String>,
}

fn now_ts() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Serialize an embedding as little-endian f32 bytes.
fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(vec.len() * 4);
    for v in vec {
        out.extend_from_slice(&v.to_le_bytes());
    }
    out
}

fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

fn row_to_asset(row: &Row<'_>) -> rusqlite::Result<Asset> {
    let tags_json: String = row.get("tags")?;
    let vision_json: Option<String> = row.get("vision")?;
    let category: String = row.get("category")?;
    let media_type: String = row.get("media_type")?;
    let state: String = row.get("state")?;
    let embedding_blob: Option<Vec<u8>> = row.get("embedding")?;

    Ok(Asset {
        id: Some(row.get("id")?),
        source_id: row.get("source_id")?,
        filename: row.get("filename")?,
        content_type: row.get("content_type")?,
        media_type: MediaType::parse(&media_type).unwrap_or(MediaType::Other),
        content_ref: row.get("content_ref")?,
        album_path: row.get("album_path")?,
        album_name: row.get("album_name")?,
        caption: row.get("caption")?,
        tags: serde_json::from_str(&tags_json).unwrap_or_default(),
        category: Category::parse(&category).unwrap_or(Category::Unclassified),
        needs_review: row.get::<_, i64>("needs_review")? != 0,
        vision: vision_json
            .as_deref()
            .and_then(|j| serde_json::from_str(j).ok()),
        search_text: row.get("search_text")?,
        content_version: row.get("content_version")?,
        embedding: embedding_blob.map(|b| blob_to_vec(&b)),
        embedding_version: row.get("embedding_version")?,
        state: AssetState::parse(&state).unwrap_or(AssetState::Failed),
        failure: row.get("failure")?,
        indexed_at: row.get("indexed_at")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}

impl Store {
    /// Open (creating if needed) the database at `path`.
    pub fn open(path: &Path) -> rusqlite::Result<Self> {
        let conn = Connection::open(path)?;
        Self::init(conn)
    }

    /// In-memory store for tests.
    pub fn open_in_memory() -> rusqlite::Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> rusqlite::Result<Self> {
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.execute_batch(SCHEMA)?;
        info!("asset store ready");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    // ---------------------------------------------------------------
    // Registration (sync collaborator entry point)
    // ---------------------------------------------------------------

    /// Upsert by `source_id`. A new asset starts `pending`; a metadata
    /// update on an existing asset resets it to `pending` so the pipeline
    /// re-runs, while the old search text and vector stay in place until
    /// superseded (they go stale via the content-version check, they are
    /// never deleted here).
    pub fn register(&self, new: &NewAsset) -> rusqlite::Result<i64> {
        let conn = self.conn.lock();
        let media_type = MediaType::infer(new.content_type.as_deref(), &new.filename);
        let album_name = new
            .album_name
            .clone()
            .or_else(|| extract_album_name(new.album_path.as_deref()));
        let tags = serde_json::to_string(&new.tags).unwrap_or_else(|_| "[]".into());
        let ts = now_ts();
        conn.execute(
            "INSERT INTO assets (source_id, filename, content_type, media_type, content_ref,
                                 album_path, album_name, caption, tags, state,
                                 created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, 'pending', ?10, ?10)
             ON CONFLICT(source_id) DO UPDATE SET
                 filename = excluded.filename,
                 content_type = excluded.content_type,
                 media_type = excluded.media_type,
                 content_ref = excluded.content_ref,
                 album_path = excluded.album_path,
                 album_name = excluded.album_name,
                 caption = excluded.caption,
                 tags = excluded.tags,
                 state = 'pending',
                 failure = NULL,
                 updated_at = excluded.updated_at",
            params![
                new.source_id,
                new.filename,
                new.content_type,
                media_type.as_str(),
                new.content_ref,
                new.album_path,
                album_name,
                new.caption,
                tags,
                ts,
            ],
        )?;
        let id: i64 = conn.query_row(
            "SELECT id FROM assets WHERE source_id = ?1",
            params![new.source_id],
            |r| r.get(0),
        )?;
        debug!(source_id = %new.source_id, id, "registered asset");
        Ok(id)
    }

    // ---------------------------------------------------------------
    // Reads
    // ---------------------------------------------------------------

    pub fn get(&self, id: i64) -> rusqlite::Result<Option<Asset>> {
        let conn = self.conn.lock();
        conn.query_row(
            &format!("SELECT {ASSET_COLUMNS} FROM assets WHERE id = ?1"),
            params![id],
            row_to_asset,
        )
        .optional()
    }

    pub fn get_by_source_id(&self, source_id: &str) -> rusqlite::Result<Option<Asset>> {
        let conn = self.conn.lock();
        conn.query_row(
            &format!("SELECT {ASSET_COLUMNS} FROM assets WHERE source_id = ?1"),
            params![source_id],
            row_to_asset,
        )
        .optional()
    }

    /// Work queue for the pipeline: everything not yet indexed or failed,
    /// earliest stage first, oldest first within a stage.
    pub fn pending_assets(&self, limit: usize) -> rusqlite::Result<Vec<i64>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id FROM assets
             WHERE state NOT IN ('indexed', 'failed')
             ORDER BY
                 CASE state
                     WHEN 'pending' THEN 1
                     WHEN 'classified' THEN 2
                     WHEN 'enriched' THEN 3
                     ELSE 4
                 END,
                 created_at ASC
             LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit as i64], |r| r.get(0))?;
        rows.collect()
    }

    // ---------------------------------------------------------------
    // Conditional state transitions
    // ---------------------------------------------------------------

    /// `pending → classified`. Returns false when another worker already
    /// moved the asset (CAS miss); the caller treats that as a no-op.
    pub fn apply_classification(
        &self,
        id: i64,
        category: Category,
        vision: Option<&VisionMetadata>,
        needs_review: bool,
    ) -> rusqlite::Result<bool> {
        let conn = self.conn.lock();
        let vision_json = vision.map(|v| serde_json::to_string(v).unwrap_or_default());
        let n = conn.execute(
            "UPDATE assets
             SET category = ?2, vision = ?3, needs_review = ?4,
                 state = 'classified', failure = NULL, updated_at = ?5
             WHERE id = ?1 AND state = 'pending'",
            params![id, category.as_str(), vision_json, needs_review as i64, now_ts()],
        )?;
        Ok(n > 0)
    }

    /// `classified → enriched`: search text and its version land with the
    /// state in one statement.
    pub fn apply_enrichment(
        &self,
        id: i64,
        search_text: &str,
        content_version: &str,
    ) -> rusqlite::Result<bool> {
        let conn = self.conn.lock();
        let n = conn.execute(
            "UPDATE assets
             SET search_text = ?2, content_version = ?3,
                 state = 'enriched', updated_at = ?4
             WHERE id = ?1 AND state = 'classified'",
            params![id, search_text, content_version, now_ts()],
        )?;
        Ok(n > 0)
    }

    /// `enriched → indexed`. The version precondition guards against a
    /// stale vector landing over a fresh enrichment that raced in between.
    pub fn apply_embedding(
        &self,
        id: i64,
        embedding: &[f32],
        embedding_version: &str,
    ) -> rusqlite::Result<bool> {
        let conn = self.conn.lock();
        let ts = now_ts();
        let n = conn.execute(
            "UPDATE assets
             SET embedding = ?2, embedding_version = ?3,
                 state = 'indexed', indexed_at = ?4, updated_at = ?4
             WHERE id = ?1 AND state = 'enriched' AND content_version = ?3",
            params![id, vec_to_blob(embedding), embedding_version, ts],
        )?;
        Ok(n > 0)
    }

    /// Transition to `indexed` without recomputing the vector, used when
    /// the stored embedding already matches the current content version.
    pub fn confirm_indexed(&self, id: i64) -> rusqlite::Result<bool> {
        let conn = self.conn.lock();
        let ts = now_ts();
        let n = conn.execute(
            "UPDATE assets
             SET state = 'indexed', indexed_at = ?2, updated_at = ?2
             WHERE id = ?1 AND state = 'enriched'
               AND embedding IS NOT NULL
               AND embedding_version = content_version",
            params![id, ts],
        )?;
        Ok(n > 0)
    }

    /// Any non-terminal state → `failed`, with a recorded reason.
    pub fn mark_failed(
        &self,
        id: i64,
        expected: AssetState,
        reason: &str,
    ) -> rusqlite::Result<bool> {
        let conn = self.conn.lock();
        let n = conn.execute(
            "UPDATE assets
             SET state = 'failed', failure = ?3, updated_at = ?4
             WHERE id = ?1 AND state = ?2",
            params![id, expected.as_str(), reason, now_ts()],
        )?;
        Ok(n > 0)
    }

    /// Explicit re-ingestion of one asset: back to `pending`, payloads
    /// retained (they go stale through version mismatch, not deletion).
    pub fn mark_stale(&self, source_id: &str) -> rusqlite::Result<bool> {
        let conn = self.conn.lock();
        let n = conn.execute(
            "UPDATE assets
             SET state = 'pending', failure = NULL, updated_at = ?2
             WHERE source_id = ?1",
            params![source_id, now_ts()],
        )?;
        Ok(n > 0)
    }

    /// Sweep: `failed → pending` for every failed asset. Used once the
    /// underlying outage is believed resolved.
    pub fn reset_failed(&self) -> rusqlite::Result<usize> {
        let conn = self.conn.lock();
        let n = conn.execute(
            "UPDATE assets
             SET state = 'pending', failure = NULL, updated_at = ?1
             WHERE state = 'failed'",
            params![now_ts()],
        )?;
        Ok(n)
    }

    // ---------------------------------------------------------------
    // Search reads (no locking beyond the connection; rows are
    // immutable per version)
    // ---------------------------------------------------------------

    /// Candidates for the semantic pass: indexed assets whose stored
    /// vector matches the current search-text version.
    pub fn semantic_candidates(
        &self,
        filters: &SearchFilters,
    ) -> rusqlite::Result<Vec<SearchCandidate>> {
        self.candidates(
            "state = 'indexed' AND embedding IS NOT NULL
             AND embedding_version = content_version",
            filters,
        )
    }

    /// Candidates for the lexical pass: anything enriched or better with
    /// search text, which keeps embed-failed assets findable by keyword.
    pub fn lexical_candidates(
        &self,
        filters: &SearchFilters,
    ) -> rusqlite::Result<Vec<SearchCandidate>> {
        self.candidates(
            "state IN ('enriched', 'indexed', 'failed') AND search_text IS NOT NULL",
            filters,
        )
    }

    fn candidates(
        &self,
        base_where: &str,
        filters: &SearchFilters,
    ) -> rusqlite::Result<Vec<SearchCandidate>> {
        let conn = self.conn.lock();
        let mut clauses = vec![base_where.to_string()];
        let mut values: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();
        if let Some(album) = &filters.album {
            values.push(Box::new(album.clone()));
            clauses.push(format!("album_name = ?{}", values.len()));
        }
        if let Some(category) = &filters.category {
            values.push(Box::new(category.as_str().to_string()));
            clauses.push(format!("category = ?{}", values.len()));
        }
        if let Some(media) = &filters.media_type {
            values.push(Box::new(media.as_str().to_string()));
            clauses.push(format!("media_type = ?{}", values.len()));
        }
        let sql = format!(
            "SELECT id, source_id, filename, album_name, category, media_type,
                    indexed_at, search_text, embedding
             FROM assets WHERE {}",
            clauses.join(" AND ")
        );
        let mut stmt = conn.prepare(&sql)?;
        let params_ref: Vec<&dyn rusqlite::ToSql> = values.iter().map(|v| v.as_ref()).collect();
        let rows = stmt.query_map(params_ref.as_slice(), |row| {
            let category: String = row.get(4)?;
            let media_type: String = row.get(5)?;
            let embedding: Option<Vec<u8>> = row.get(8)?;
            Ok(SearchCandidate {
                id: row.get(0)?,
                source_id: row.get(1)?,
                filename: row.get(2)?,
                album_name: row.get(3)?,
                category: Category::parse(&category).unwrap_or(Category::Unclassified),
                media_type: MediaType::parse(&media_type).unwrap_or(MediaType::Other),
                indexed_at: row.get(6)?,
                search_text: row.get(7)?,
                embedding: embedding.map(|b| blob_to_vec(&b)),
            })
        })?;
        rows.collect()
    }

    // ---------------------------------------------------------------
    // Operational surface
    // ---------------------------------------------------------------

    pub fn stats(&self) -> rusqlite::Result<Stats> {
        let conn = self.conn.lock();
        let total: i64 = conn.query_row("SELECT COUNT(*) FROM assets", [], |r| r.get(0))?;

        let mut by_state = BTreeMap::new();
        let mut stmt = conn.prepare("SELECT state, COUNT(*) FROM assets GROUP BY state")?;
        let rows = stmt.query_map([], |r| Ok((r.get::<_, String>(0)?, r.get::<_, i64>(1)?)))?;
        for row in rows {
            let (state, count) = row?;
            by_state.insert(state, count);
        }

        let mut by_category = BTreeMap::new();
        let mut stmt = conn.prepare("SELECT category, COUNT(*) FROM assets GROUP BY category")?;
        let rows = stmt.query_map([], |r| Ok((r.get::<_, String>(0)?, r.get::<_, i64>(1)?)))?;
        for row in rows {
            let (category, count) = row?;
            by_category.insert(category, count);
        }

        let needs_review: i64 = conn.query_row(
            "SELECT COUNT(*) FROM assets WHERE needs_review = 1",
            [],
            |r| r.get(0),
        )?;

        let mut stmt = conn.prepare(
            "SELECT source_id, filename, failure FROM assets
             WHERE state = 'failed' ORDER BY updated_at DESC",
        )?;
        let rows = stmt.query_map([], |r| {
            Ok(FailedAsset {
                source_id: r.get(0)?,
                filename: r.get(1)?,
                failure: r.get(2)?,
            })
        })?;
        let failed = rows.collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(Stats {
            total,
            by_state,
            by_category,
            needs_review,
            failed,
        })
    }
}

/// Last segment of an album path like `Root/Category/Album Name`.
fn extract_album_name(album_path: Option<&str>) -> Option<String> {
    let path = album_path?;
    let name = path.rsplit('/').next()?.trim();
    if name.is_empty() {
        None
    } else {
        Some(name.to_string())
    }
}
