//! Normalized entity structs for the asset library.

use serde::{Deserialize, Serialize};

/// Functional category of an asset.
///
/// `Template` assets are reusable as-is; `Inspiration` assets are
/// reference-only and never offered as ready-to-reuse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Template,
    Inspiration,
    Unclassified,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Template => "template",
            Self::Inspiration => "inspiration",
            Self::Unclassified => "unclassified",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "template" => Some(Self::Template),
            "inspiration" => Some(Self::Inspiration),
            "unclassified" => Some(Self::Unclassified),
            _ => None,
        }
    }
}

/// Pipeline state. Monotonic except `Failed`, which is recoverable by an
/// explicit reset back to `Pending`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetState {
    Pending,
    Classified,
    Enriched,
    Indexed,
    Failed,
}

impl AssetState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Classified => "classified",
            Self::Enriched => "enriched",
            Self::Indexed => "indexed",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "classified" => Some(Self::Classified),
            "enriched" => Some(Self::Enriched),
            "indexed" => Some(Self::Indexed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    /// The single legal forward transition from this state, if any.
    pub fn next(&self) -> Option<Self> {
        match self {
            Self::Pending => Some(Self::Classified),
            Self::Classified => Some(Self::Enriched),
            Self::Enriched => Some(Self::Indexed),
            Self::Indexed | Self::Failed => None,
        }
    }
}

/// Broad media kind, inferred from content type or file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    Image,
    Video,
    Document,
    Other,
}

impl MediaType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::Video => "video",
            Self::Document => "document",
            Self::Other => "other",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "image" => Some(Self::Image),
            "video" => Some(Self::Video),
            "document" => Some(Self::Document),
            "other" => Some(Self::Other),
            _ => None,
        }
    }

    /// Infer from content type first, then file extension.
    pub fn infer(content_type: Option<&str>, filename: &str) -> Self {
        if let Some(ct) = content_type {
            if ct.starts_with("image/") {
                return Self::Image;
            }
            if ct.starts_with("video/") {
                return Self::Video;
            }
            if ct == "application/pdf" || ct.starts_with("application/msword") {
                return Self::Document;
            }
        }
        let ext = filename.rsplit('.').next().unwrap_or("").to_lowercase();
        match ext.as_str() {
            "jpg" | "jpeg" | "png" | "gif" | "webp" | "svg" | "eps" | "ai" | "psd" | "tiff"
            | "bmp" => Self::Image,
            "mp4" | "mov" | "avi" | "webm" | "mkv" | "m4v" => Self::Video,
            "pdf" | "doc" | "docx" | "txt" | "rtf" => Self::Document,
            _ => Self::Other,
        }
    }
}

/// Structured output of a vision analysis pass over an asset's visual
/// content. Present only for assets that actually went through the vision
/// provider; filename/album-classified assets never get one.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VisionMetadata {
    /// Searchable tags extracted from the image.
    #[serde(default)]
    pub tags: Vec<String>,
    /// Detected subjects (people, equipment, props).
    #[serde(default)]
    pub subjects: Vec<String>,
    /// Dominant colors as hex strings.
    #[serde(default)]
    pub dominant_colors: Vec<String>,
    /// Text visible in the image, if any.
    #[serde(default)]
    pub extracted_text: Option<String>,
    /// Natural-language description for search.
    #[serde(default)]
    pub description: Option<String>,
    /// Queries this asset would plausibly match.
    #[serde(default)]
    pub suggested_queries: Vec<String>,
    /// Reusability score 1..=5; higher means closer to a blank template.
    #[serde(default)]
    pub reusability: Option<u8>,
    /// Image contains a baked-in date (kills reusability).
    #[serde(default)]
    pub has_hardcoded_date: bool,
    /// Image contains a baked-in location/address.
    #[serde(default)]
    pub has_hardcoded_location: bool,
}

/// One tracked piece of marketing media.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Asset {
    /// Store rowid; `None` before first persistence.
    pub id: Option<i64>,
    /// Stable external identity, unique, immutable once assigned.
    pub source_id: String,
    pub filename: String,
    pub content_type: Option<String>,
    pub media_type: MediaType,
    /// URI of the binary content. The pipeline never copies the bytes.
    pub content_ref: Option<String>,
    pub album_path: Option<String>,
    pub album_name: Option<String>,
    pub caption: Option<String>,
    pub tags: Vec<String>,
    pub category: Category,
    /// Classification fell back to the safe default; a human should look.
    pub needs_review: bool,
    pub vision: Option<VisionMetadata>,
    pub search_text: Option<String>,
    /// sha256 hex of `search_text`; written by the enrichment step.
    pub content_version: Option<String>,
    pub embedding: Option<Vec<f32>>,
    /// Content version the stored embedding was computed from. The
    /// embedding is only search-valid while this matches `content_version`.
    pub embedding_version: Option<String>,
    pub state: AssetState,
    pub failure: Option<String>,
    pub indexed_at: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Asset {
    /// Whether the stored embedding is valid for semantic retrieval.
    pub fn embedding_current(&self) -> bool {
        self.state == AssetState::Indexed
            && self.embedding.is_some()
            && self.embedding_version.is_some()
            && self.embedding_version == self.content_version
    }
}

/// Registration payload from the sync collaborator. Everything beyond
/// `source_id` and `filename` is optional.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewAsset {
    pub source_id: String,
    pub filename: String,
    #[serde(default)]
    pub content_type: Option<String>,
    #[serde(default)]
    pub content_ref: Option<String>,
    #[serde(default)]
    pub album_path: Option<String>,
    #[serde(default)]
    pub album_name: Option<String>,
    #[serde(default)]
    pub caption: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// Filters applied to both retrieval passes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchFilters {
    pub album: Option<String>,
    pub category: Option<Category>,
    pub media_type: Option<MediaType>,
}

impl SearchFilters {
    pub fn is_empty(&self) -> bool {
        self.album.is_none() && self.category.is_none() && self.media_type.is_none()
    }
}

/// One ranked search hit.
#[derive(Debug, Clone, Serialize)]
pub struct ScoredAsset {
    pub source_id: String,
    pub filename: String,
    pub album_name: Option<String>,
    pub category: Category,
    pub media_type: MediaType,
    /// Blended score in [0, 1] after per-pass min-max normalization.
    pub score: f32,
    pub semantic_score: Option<f32>,
    pub lexical_score: Option<f32>,
    pub indexed_at: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_forward_transitions_are_the_only_ones() {
        assert_eq!(AssetState::Pending.next(), Some(AssetState::Classified));
        assert_eq!(AssetState::Classified.next(), Some(AssetState::Enriched));
        assert_eq!(AssetState::Enriched.next(), Some(AssetState::Indexed));
        assert_eq!(AssetState::Indexed.next(), None);
        assert_eq!(AssetState::Failed.next(), None);
    }

    #[test]
    fn state_round_trips_through_strings() {
        for s in [
            AssetState::Pending,
            AssetState::Classified,
            AssetState::Enriched,
            AssetState::Indexed,
            AssetState::Failed,
        ] {
            assert_eq!(AssetState::parse(s.as_str()), Some(s));
        }
        assert_eq!(AssetState::parse("bogus"), None);
    }

    #[test]
    fn media_type_prefers_content_type_over_extension() {
        assert_eq!(
            MediaType::infer(Some("video/mp4"), "thumb.jpg"),
            MediaType::Video
        );
        assert_eq!(MediaType::infer(None, "thumb.JPG"), MediaType::Image);
        assert_eq!(MediaType::infer(None, "deck.pdf"), MediaType::Document);
        assert_eq!(MediaType::infer(None, "noext"), MediaType::Other);
    }

    #[test]
    fn embedding_current_requires_indexed_and_version_match() {
        let mut asset = Asset {
            id: Some(1),
            source_id: "a1".into(),
            filename: "f.png".into(),
            content_type: None,
            media_type: MediaType::Image,
            content_ref: None,
            album_path: None,
            album_name: None,
            caption: None,
            tags: Vec::new(),
            category: Category::Template,
            needs_review: false,
            vision: None,
            search_text: Some("text".into()),
            content_version: Some("v1".into()),
            embedding: Some(vec![0.1, 0.2]),
            embedding_version: Some("v1".into()),
            state: AssetState::Indexed,
            failure: None,
            indexed_at: Some(100),
            created_at: 0,
            updated_at: 0,
        };
        assert!(asset.embedding_current());

        asset.content_version = Some("v2".into());
        assert!(!asset.embedding_current());

        asset.content_version = Some("v1".into());
        asset.state = AssetState::Enriched;
        assert!(!asset.embedding_current());
    }
}
