//! Token-level similarity primitives shared by the scorer and its tests.

use std::collections::BTreeSet;

use ahash::AHashSet;
use itertools::Itertools;
use smol_str::SmolStr;

/// Character-level similarity of two strings as an integer percentage.
/// Two empty strings are identical by convention.
pub fn ratio(a: &str, b: &str) -> i64 {
    if a.is_empty() && b.is_empty() {
        return 100;
    }
    (strsim::normalized_levenshtein(a, b) * 100.0).round() as i64
}

fn sorted_joined(tokens: &[SmolStr]) -> String {
    tokens.iter().map(SmolStr::as_str).sorted_unstable().join(" ")
}

/// Order-insensitive ratio: both token lists are sorted and joined before the
/// character-level comparison.
pub fn token_sort_ratio(a: &[SmolStr], b: &[SmolStr]) -> i64 {
    ratio(&sorted_joined(a), &sorted_joined(b))
}

/// Subset-tolerant ratio. The shared tokens are compared against each side's
/// shared-plus-remainder form and the better of the three comparisons wins,
/// so "acme" scores 100 against "acme holdings".
pub fn token_set_ratio(a: &[SmolStr], b: &[SmolStr]) -> i64 {
    let set_a: BTreeSet<&str> = a.iter().map(SmolStr::as_str).collect();
    let set_b: BTreeSet<&str> = b.iter().map(SmolStr::as_str).collect();

    let shared = set_a.intersection(&set_b).join(" ");
    let only_a = set_a.difference(&set_b).join(" ");
    let only_b = set_b.difference(&set_a).join(" ");

    let combined_a = join_nonempty(&shared, &only_a);
    let combined_b = join_nonempty(&shared, &only_b);

    ratio(&shared, &combined_a)
        .max(ratio(&shared, &combined_b))
        .max(ratio(&combined_a, &combined_b))
}

fn join_nonempty(left: &str, right: &str) -> String {
    match (left.is_empty(), right.is_empty()) {
        (true, _) => right.to_string(),
        (_, true) => left.to_string(),
        _ => format!("{left} {right}"),
    }
}

/// Jaccard similarity of two token multisets viewed as sets. An empty union
/// yields 0.
pub fn jaccard(a: &[SmolStr], b: &[SmolStr]) -> f64 {
    let set_a: AHashSet<&str> = a.iter().map(SmolStr::as_str).collect();
    let set_b: AHashSet<&str> = b.iter().map(SmolStr::as_str).collect();
    let union = set_a.union(&set_b).count();
    if union == 0 {
        return 0.0;
    }
    let shared = set_a.intersection(&set_b).count();
    shared as f64 / union as f64
}

/// The ordered digit tokens of a name. Two names share a numeric style when
/// their signatures are equal, which implies equal digit-token counts.
pub fn digit_signature(tokens: &[SmolStr]) -> Vec<&str> {
    tokens
        .iter()
        .map(SmolStr::as_str)
        .filter(|t| !t.is_empty() && t.bytes().all(|b| b.is_ascii_digit()))
        .collect()
}

/// The set of punctuation characters present in a surface form.
pub fn punctuation_signature(surface: &str) -> BTreeSet<char> {
    surface
        .chars()
        .filter(|c| c.is_ascii_punctuation())
        .collect()
}
