//! String similarity for the `fuzzy` resolve strategy (spec §4.9).
//!
//! Dice coefficient over character bigrams. Unlike the teacher's fzf-style
//! Smith-Waterman matcher (built for ranking substring-ish matches in file
//! paths), resolving node titles calls for a strategy tolerant of word
//! reordering and minor spelling drift but blind to typos within a word —
//! Dice bigram overlap fits that shape.

use std::collections::HashMap;

/// Bigram multiset of a lowercased string, ASCII-folded. Single-character
/// strings produce the string itself as their sole "bigram" so short titles
/// still compare meaningfully.
fn bigrams(s: &str) -> HashMap<String, u32> {
    let lower = s.to_lowercase();
    let chars: Vec<char> = lower.chars().collect();
    let mut counts: HashMap<String, u32> = HashMap::new();
    if chars.len() < 2 {
        if !chars.is_empty() {
            *counts.entry(lower).or_insert(0) += 1;
        }
        return counts;
    }
    for window in chars.windows(2) {
        let bigram: String = window.iter().collect();
        *counts.entry(bigram).or_insert(0) += 1;
    }
    counts
}

/// Sørensen-Dice coefficient: `2 * |intersection| / (|a| + |b|)`, in `[0, 1]`.
/// Two empty strings are defined as identical (score `1.0`); one empty and
/// one non-empty string score `0.0`.
pub fn dice_coefficient(a: &str, b: &str) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }

    let bg_a = bigrams(a);
    let bg_b = bigrams(b);

    let total_a: u32 = bg_a.values().sum();
    let total_b: u32 = bg_b.values().sum();
    if total_a == 0 || total_b == 0 {
        // Both single-char strings compared case-insensitively.
        return if a.to_lowercase() == b.to_lowercase() { 1.0 } else { 0.0 };
    }

    let mut overlap = 0u32;
    for (bigram, &count_a) in &bg_a {
        if let Some(&count_b) = bg_b.get(bigram) {
            overlap += count_a.min(count_b);
        }
    }

    (2.0 * overlap as f64) / (total_a as f64 + total_b as f64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_strings_score_one() {
        assert!((dice_coefficient("night", "night") - 1.0).abs() < 1e-9);
    }

    #[test]
    fn classic_example() {
        // "night" vs "nacht" shares bigram overlap per the textbook example.
        let score = dice_coefficient("night", "nacht");
        assert!(score > 0.2 && score < 0.35, "got {score}");
    }

    #[test]
    fn case_insensitive() {
        assert_eq!(dice_coefficient("Foo Bar", "foo bar"), 1.0);
    }

    #[test]
    fn completely_disjoint_scores_zero() {
        assert_eq!(dice_coefficient("abc", "xyz"), 0.0);
    }

    #[test]
    fn empty_strings() {
        assert_eq!(dice_coefficient("", ""), 1.0);
        assert_eq!(dice_coefficient("", "a"), 0.0);
    }
}
