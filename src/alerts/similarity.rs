//! Title similarity for duplicate detection

use std::collections::HashSet;

/// Jaccard similarity over lower-cased, whitespace-split token sets
///
/// Two titles without any tokens are identical (1.0).
pub fn title_similarity(a: &str, b: &str) -> f64 {
    let left = tokens(a);
    let right = tokens(b);

    if left.is_empty() && right.is_empty() {
        return 1.0;
    }

    let intersection = left.intersection(&right).count();
    let union = left.union(&right).count();
    intersection as f64 / union as f64
}

fn tokens(text: &str) -> HashSet<String> {
    text.split_whitespace().map(str::to_lowercase).collect()
}
