//! Trigram similarity, pg_trgm style.
//!
//! Strings are lowercased, split on non-alphanumerics, and each word is
//! padded with two leading and one trailing space before extracting
//! overlapping 3-character windows. Similarity is the Jaccard ratio of
//! the two trigram sets, so it lands in [0, 1] and is symmetric.

use std::collections::HashSet;

/// Extract the padded trigram set of a string.
pub fn trigrams(text: &str) -> HashSet<[char; 3]> {
    let mut set = HashSet::new();
    for word in text
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
    {
        let padded: Vec<char> = std::iter::repeat_n(' ', 2)
            .chain(word.chars())
            .chain(std::iter::once(' '))
            .collect();
        for window in padded.windows(3) {
            set.insert([window[0], window[1], window[2]]);
        }
    }
    set
}

/// Jaccard similarity of the two trigram sets. Empty-vs-anything is 0.
pub fn similarity(a: &str, b: &str) -> f32 {
    let ta = trigrams(a);
    let tb = trigrams(b);
    similarity_sets(&ta, &tb)
}

/// Similarity against a precomputed query set, for scoring many
/// candidates without re-deriving the query trigrams.
pub fn similarity_to(query_trigrams: &HashSet<[char; 3]>, text: &str) -> f32 {
    similarity_sets(query_trigrams, &trigrams(text))
}

fn similarity_sets(a: &HashSet<[char; 3]>, b: &HashSet<[char; 3]>) -> f32 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let shared = a.intersection(b).count();
    let union = a.len() + b.len() - shared;
    shared as f32 / union as f32
}
