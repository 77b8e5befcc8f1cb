//! Search-text synthesis.
//!
//! One denormalized text blob per asset feeds both the lexical and the
//! semantic pass, so the concatenation order is fixed and the whole
//! function is pure: the same asset fields always yield byte-identical
//! output. That byte stability is what the content-version hash, and
//! therefore embedding staleness detection, is built on.

use sha2::{Digest, Sha256};

use crate::error::PipelineError;
use crate::model::{Asset, Category};

/// Build the search text for an asset.
///
/// Field order, fixed: category label, album name, cleaned filename,
/// caption, human tags, then the vision fields (description, tags,
/// subjects, extracted text, suggested queries). Empty fields are
/// skipped; the result is single-space separated.
///
/// Returns [`PipelineError::Invariant`] when invoked on an unclassified
/// asset: classification must precede enrichment, and reaching this code
/// without it is an ordering bug, not a runtime condition.
pub fn enrich(asset: &Asset) -> Result<String, PipelineError> {
    if asset.category == Category::Unclassified {
        return Err(PipelineError::Invariant(format!(
            "enrich invoked on unclassified asset {}",
            asset.source_id
        )));
    }

    let mut parts: Vec<&str> = Vec::new();
    parts.push(asset.category.as_str());
    if let Some(album) = asset.album_name.as_deref() {
        parts.push(album);
    }

    let cleaned_name = clean_filename(&asset.filename);
    parts.push(&cleaned_name);

    if let Some(caption) = asset.caption.as_deref() {
        parts.push(caption);
    }
    for tag in &asset.tags {
        parts.push(tag);
    }

    if let Some(vision) = &asset.vision {
        if let Some(desc) = vision.description.as_deref() {
            parts.push(desc);
        }
        for tag in &vision.tags {
            parts.push(tag);
        }
        for subject in &vision.subjects {
            parts.push(subject);
        }
        if let Some(text) = vision.extracted_text.as_deref() {
            parts.push(text);
        }
        for query in &vision.suggested_queries {
            parts.push(query);
        }
    }

    let joined = parts
        .iter()
        .map(|p| p.trim())
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join(" ");
    // Collapse interior whitespace runs so formatting noise in captions
    // cannot perturb the content version.
    Ok(joined.split_whitespace().collect::<Vec<_>>().join(" "))
}

/// Replace filename separators with spaces and drop the extension dot,
/// so `Summer_Flyer-v2.png` contributes `Summer Flyer v2 png`.
fn clean_filename(filename: &str) -> String {
    filename
        .chars()
        .map(|c| match c {
            '_' | '-' | '.' => ' ',
            other => other,
        })
        .collect()
}

/// Content version: sha256 hex of the search text.
pub fn content_version(search_text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(search_text.as_bytes());
    hex::encode(hasher.finalize())
}
