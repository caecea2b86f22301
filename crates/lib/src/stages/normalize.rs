//! Legal-aware name normalization.
//!
//! `normalize` is a pure per-record transform: the same record and frozen
//! tables always produce the same derived fields. It never fails; pathological
//! names degrade to empty derived fields that downstream stages tolerate.

use lazy_regex::{Lazy, lazy_regex};
use regex::Regex;
use smol_str::SmolStr;

use accord_lib_core::records::{NormalizedRecord, Record, SuffixClass};

use crate::core::config::NormalizationConfig;

/// Closed vocabulary of trailing legal-suffix tokens.
const LEGAL_SUFFIXES: &[(&str, SuffixClass)] = &[
    ("inc", SuffixClass::Inc),
    ("incorporated", SuffixClass::Inc),
    ("llc", SuffixClass::Llc),
    ("ltd", SuffixClass::Ltd),
    ("limited", SuffixClass::Ltd),
    ("corp", SuffixClass::Corp),
    ("corporation", SuffixClass::Corp),
    ("llp", SuffixClass::Llp),
    ("lp", SuffixClass::Lp),
    ("pllc", SuffixClass::Pllc),
    ("pc", SuffixClass::Pc),
    ("co", SuffixClass::Co),
    ("company", SuffixClass::Co),
    ("gmbh", SuffixClass::Gmbh),
];

static REPEATED_DIGIT_GROUPS: Lazy<Regex> = lazy_regex!(r"\b(\d+)\s+(\d+)\b");

pub fn normalize(record: &Record, config: &NormalizationConfig) -> NormalizedRecord {
    let trimmed = record.account_name_raw.trim();
    if trimmed.is_empty() {
        return NormalizedRecord {
            record: record.clone(),
            name_base: String::new(),
            name_core: String::new(),
            suffix_class: SuffixClass::None,
            tokens: Vec::new(),
            enhanced_tokens: Vec::new(),
            raw_exact_key: String::new(),
        };
    }

    let raw_exact_key = collapse_whitespace(trimmed);
    let name_base = base_form(&raw_exact_key);
    let (name_core, suffix_class) = strip_legal_suffix(&name_base);
    let tokens: Vec<SmolStr> = name_core.split_whitespace().map(SmolStr::new).collect();
    let enhanced_tokens = enhance_tokens(&tokens, config);

    NormalizedRecord {
        record: record.clone(),
        name_base,
        name_core,
        suffix_class,
        tokens,
        enhanced_tokens,
        raw_exact_key,
    }
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Lowercase, map symbols, strip remaining punctuation, unify numeric styles,
/// collapse whitespace. Order matters. The disposition engine reuses this to
/// normalize blacklist phrases the same way names are normalized.
pub(crate) fn base_form(raw_exact_key: &str) -> String {
    let lowered = raw_exact_key.to_lowercase();

    let mut mapped = String::with_capacity(lowered.len() + 8);
    for ch in lowered.chars() {
        match ch {
            '&' => mapped.push_str(" and "),
            '@' => mapped.push_str(" at "),
            '+' => mapped.push_str(" plus "),
            '/' | '-' => mapped.push(' '),
            c if c.is_alphanumeric() || c.is_whitespace() => mapped.push(c),
            _ => mapped.push(' '),
        }
    }

    collapse_whitespace(&unify_number_styles(&mapped))
}

/// Joins equal adjacent digit groups with a single space so `20-20`, `20/20`
/// and `20   20` all land on `20 20` after the symbol pass.
fn unify_number_styles(s: &str) -> String {
    REPEATED_DIGIT_GROUPS
        .replace_all(s, |caps: &regex::Captures<'_>| {
            if caps[1] == caps[2] {
                format!("{} {}", &caps[1], &caps[2])
            } else {
                caps[0].to_string()
            }
        })
        .into_owned()
}

/// Removes the trailing run of legal-suffix tokens. The class of the
/// outermost (trailing-most) stripped token is recorded; a name that is
/// nothing but suffix tokens strips to an empty core.
fn strip_legal_suffix(name_base: &str) -> (String, SuffixClass) {
    let mut tokens: Vec<&str> = name_base.split_whitespace().collect();
    let mut suffix_class = SuffixClass::None;

    while let Some(last) = tokens.last() {
        let Some(&(_, class)) = LEGAL_SUFFIXES.iter().find(|(tok, _)| tok == last) else {
            break;
        };
        if suffix_class == SuffixClass::None {
            suffix_class = class;
        }
        tokens.pop();
    }

    (tokens.join(" "), suffix_class)
}

/// Weak-token removal, plural to singular, canonical retail substitutions, in
/// that order. Absent tables fall back to the raw tokens.
fn enhance_tokens(tokens: &[SmolStr], config: &NormalizationConfig) -> Vec<SmolStr> {
    let Some(tables) = &config.enhancement else {
        return tokens.to_vec();
    };

    let enhanced: Vec<SmolStr> = tokens
        .iter()
        .filter(|t| !tables.weak_tokens.iter().any(|w| w == t.as_str()))
        .map(|t| {
            let singular = tables
                .plural_map
                .get(t.as_str())
                .map_or(t.as_str(), String::as_str);
            tables
                .canonical_retail_terms
                .get(singular)
                .map_or(singular, String::as_str)
        })
        .map(SmolStr::new)
        .collect();

    // Enhancing everything away would leave nothing to compare.
    if enhanced.is_empty() {
        tokens.to_vec()
    } else {
        enhanced
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::NormalizationConfig;
    use pretty_assertions::assert_eq;

    fn norm(name: &str) -> NormalizedRecord {
        normalize(
            &Record::new("A1", name),
            &NormalizationConfig::default(),
        )
    }

    #[test]
    fn empty_name_degrades_cleanly() {
        let n = norm("   ");
        assert_eq!(n.name_base, "");
        assert_eq!(n.name_core, "");
        assert_eq!(n.suffix_class, SuffixClass::None);
        assert!(n.tokens.is_empty());
        assert_eq!(n.raw_exact_key, "");
    }

    #[test]
    fn raw_exact_key_preserves_case_and_punctuation() {
        let n = norm("  20/20 Plumbing  & Heating,   Inc. ");
        assert_eq!(n.raw_exact_key, "20/20 Plumbing & Heating, Inc.");
    }

    #[test]
    fn symbol_mapping_and_suffix_strip() {
        for name in [
            "20-20 Plumbing and Heating Inc",
            "20/20 Plumbing & Heating, Inc.",
            "20 20 Plumbing & Heating Inc",
        ] {
            let n = norm(name);
            assert_eq!(n.name_base, "20 20 plumbing and heating inc");
            assert_eq!(n.name_core, "20 20 plumbing and heating");
            assert_eq!(n.suffix_class, SuffixClass::Inc);
        }
    }

    #[test]
    fn at_and_plus_map_to_words() {
        let n = norm("Shop @ Home + Garden");
        assert_eq!(n.name_base, "shop at home plus garden");
    }

    #[test]
    fn trailing_suffix_run_strips_to_outermost_class() {
        let n = norm("Acme Widget Co Inc");
        assert_eq!(n.name_core, "acme widget");
        assert_eq!(n.suffix_class, SuffixClass::Inc);
    }

    #[test]
    fn suffix_only_name_strips_to_empty_core() {
        let n = norm("Inc.");
        assert_eq!(n.name_base, "inc");
        assert_eq!(n.name_core, "");
        assert_eq!(n.suffix_class, SuffixClass::Inc);
        assert!(n.tokens.is_empty());
    }

    #[test]
    fn enhancement_removes_weak_and_maps_terms() {
        let n = norm("The Acme Holdings Svcs Inc");
        assert_eq!(
            n.tokens,
            vec!["the", "acme", "holdings", "svcs"]
                .into_iter()
                .map(SmolStr::new)
                .collect::<Vec<_>>()
        );
        assert_eq!(
            n.enhanced_tokens,
            vec!["acme", "holding", "service"]
                .into_iter()
                .map(SmolStr::new)
                .collect::<Vec<_>>()
        );
    }

    #[test]
    fn missing_enhancement_tables_fall_back_to_raw_tokens() {
        let config = NormalizationConfig { enhancement: None };
        let n = normalize(&Record::new("A1", "The Acme Stores"), &config);
        assert_eq!(n.enhanced_tokens, n.tokens);
    }

    #[test]
    fn normalize_is_pure() {
        let record = Record::new("A1", "20/20 Plumbing & Heating, Inc.");
        let config = NormalizationConfig::default();
        assert_eq!(normalize(&record, &config), normalize(&record, &config));
    }
}
