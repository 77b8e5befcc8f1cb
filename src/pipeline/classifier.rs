//! Asset classification: template vs inspiration.
//!
//! Decision policy is an explicit ordered rule list evaluated over the
//! asset's deterministic signals, first `Some` wins. Only when no rule
//! fires does the (billable, fallible) vision provider get involved, and
//! when that too is unavailable or inconclusive the asset falls back to
//! `Inspiration` with a review flag, since an inspiration asset is never
//! offered as ready-to-reuse.
//!
//! Classification is pure: persistence is the state machine's job.

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

use crate::config::Config;
use crate::error::ProviderError;
use crate::model::{Asset, Category, MediaType, VisionMetadata};
use crate::provider::VisionProvider;

/// Albums whose contents are reusable by convention.
const REUSABLE_ALBUMS: &[&str] = &[
    "brand kit",
    "templates",
    "social media templates",
    "marketing templates",
];

/// Filename fragments that mark reusable artwork, including the
/// logo/icon/font naming conventions used for brand assets.
const REUSABLE_PATTERNS: &[&str] = &[
    "template", "flyer", "generic", "base", "blank", "editable", "logo", "icon", "wordmark",
    "font",
];

/// Venue names baked into one-off, location-specific creative.
const LOCATION_PATTERNS: &[&str] = &[
    "brooklyn",
    "annarbor",
    "westhouston",
    "warwick",
    "lewisville",
    "clearwater",
    "northattleboro",
    "edison",
    "springfield",
    "richmond",
    "trumbull",
    "norwalk",
    "freehold",
    "woodbridge",
    "deptford",
    "whitemarsh",
    "plymouth",
    "norristown",
];

/// One-off seasonal or event creative.
const EVENT_PATTERNS: &[&str] = &[
    "grandopening",
    "mlkday",
    "presidentsday",
    "stpatricks",
    "eid",
    "blackfriday",
    "newyears",
    "laborday",
    "memorialday",
    "4thofjuly",
    "july4th",
    "thanksgiving",
    "christmas",
    "halloween",
    "easter",
    "valentines",
];

static DATE_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"\d{4}",
        r"(jan|feb|mar|apr|may|jun|jul|aug|sep|oct|nov|dec)\d{4}",
        r"_\d{2}_\d{2}_",
        r"\d{1,2}[-/]\d{1,2}[-/]\d{2,4}",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("static date pattern compiles"))
    .collect()
});

/// Deterministic signals extracted from an asset once, then fed to every
/// rule in priority order.
#[derive(Debug, Clone)]
pub struct Signals {
    /// Lowercased filename with separators squashed out, so
    /// `Launch_Logo-2024` matches `logo` and `2024` alike.
    pub squashed_name: String,
    pub album_lower: String,
}

impl Signals {
    pub fn from_asset(asset: &Asset) -> Self {
        let squashed_name: String = asset
            .filename
            .to_lowercase()
            .chars()
            .filter(|c| !matches!(c, ' ' | '-' | '_'))
            .collect();
        let album_lower = asset
            .album_path
            .as_deref()
            .or(asset.album_name.as_deref())
            .unwrap_or("")
            .to_lowercase();
        Self {
            squashed_name,
            album_lower,
        }
    }
}

/// One deterministic classification rule. Evaluated strictly in the
/// order listed in [`RULES`]; the first rule returning `Some` wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rule {
    ReusableAlbum,
    ReusableFilename,
    LocationSpecific,
    DateSpecific,
    EventSpecific,
}

/// Fixed rule priority. Reusable-album outranks everything so a logo in
/// "Brand Kit" with a year in its filename still classifies as template.
pub const RULES: &[Rule] = &[
    Rule::ReusableAlbum,
    Rule::ReusableFilename,
    Rule::LocationSpecific,
    Rule::DateSpecific,
    Rule::EventSpecific,
];

impl Rule {
    pub fn name(&self) -> &'static str {
        match self {
            Self::ReusableAlbum => "reusable_album",
            Self::ReusableFilename => "reusable_filename",
            Self::LocationSpecific => "location_specific",
            Self::DateSpecific => "date_specific",
            Self::EventSpecific => "event_specific",
        }
    }

    pub fn apply(&self, signals: &Signals) -> Option<Category> {
        match self {
            Self::ReusableAlbum => REUSABLE_ALBUMS
                .iter()
                .any(|a| signals.album_lower.contains(a))
                .then_some(Category::Template),
            Self::ReusableFilename => REUSABLE_PATTERNS
                .iter()
                .any(|p| signals.squashed_name.contains(p))
                .then_some(Category::Template),
            Self::LocationSpecific => LOCATION_PATTERNS
                .iter()
                .any(|l| signals.squashed_name.contains(l))
                .then_some(Category::Inspiration),
            Self::DateSpecific => DATE_PATTERNS
                .iter()
                .any(|r| r.is_match(&signals.squashed_name))
                .then_some(Category::Inspiration),
            Self::EventSpecific => EVENT_PATTERNS
                .iter()
                .any(|e| signals.squashed_name.contains(e))
                .then_some(Category::Inspiration),
        }
    }
}

/// Outcome of a classification pass.
#[derive(Debug, Clone)]
pub struct Decision {
    pub category: Category,
    /// Present only when the vision provider actually ran.
    pub vision: Option<VisionMetadata>,
    /// True when we fell back to the safe default.
    pub needs_review: bool,
    /// Name of the deterministic rule that fired, if any.
    pub rule: Option<&'static str>,
}

/// First deterministic rule hit, if any.
pub fn deterministic_category(signals: &Signals) -> Option<(Category, &'static str)> {
    RULES
        .iter()
        .find_map(|rule| rule.apply(signals).map(|cat| (cat, rule.name())))
}

/// Classify one asset.
///
/// Deterministic rules never touch the provider. A retryable provider
/// failure propagates so the state machine can leave the asset `pending`
/// for another attempt; a permanent failure propagates so it can be
/// marked `failed`. An absent provider, missing content reference, or
/// inconclusive analysis all fall back to the safe default.
pub fn classify(
    asset: &Asset,
    vision: Option<&dyn VisionProvider>,
    cfg: &Config,
) -> Result<Decision, ProviderError> {
    let signals = Signals::from_asset(asset);
    if let Some((category, rule)) = deterministic_category(&signals) {
        debug!(source_id = %asset.source_id, rule, category = category.as_str(), "deterministic classification");
        return Ok(Decision {
            category,
            vision: None,
            needs_review: false,
            rule: Some(rule),
        });
    }

    let analyzable = matches!(asset.media_type, MediaType::Image | MediaType::Video);
    let (Some(provider), Some(content_ref), true) =
        (vision, asset.content_ref.as_deref(), analyzable)
    else {
        return Ok(safe_default());
    };

    let metadata = provider.analyze(content_ref, asset.media_type == MediaType::Video)?;
    let Some(reusability) = metadata.reusability else {
        // Analysis ran but gave no verdict; keep the metadata, flag it.
        return Ok(Decision {
            category: Category::Inspiration,
            vision: Some(metadata),
            needs_review: true,
            rule: None,
        });
    };

    let category = if reusability >= cfg.vision_template_threshold
        && !metadata.has_hardcoded_date
        && !metadata.has_hardcoded_location
    {
        Category::Template
    } else {
        Category::Inspiration
    };
    debug!(source_id = %asset.source_id, reusability, category = category.as_str(), "vision classification");
    Ok(Decision {
        category,
        vision: Some(metadata),
        needs_review: false,
        rule: None,
    })
}

fn safe_default() -> Decision {
    Decision {
        category: Category::Inspiration,
        vision: None,
        needs_review: true,
        rule: None,
    }
}
