//! Core data model.

pub mod types;

pub use types::{
    Asset, AssetState, Category, MediaType, NewAsset, ScoredAsset, SearchFilters, VisionMetadata,
};
