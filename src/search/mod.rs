//! Query-time retrieval: trigram lexical scoring plus vector semantic
//! scoring, blended by [`hybrid::HybridSearch`].

pub mod hybrid;
pub mod trigram;

pub use hybrid::{HybridSearch, cosine};
