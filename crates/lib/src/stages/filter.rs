//! Filtering: rejects records unusable for candidate generation into the
//! audit. Filtered records still receive a group and a disposition; they are
//! only excluded from blocking and scoring.

use ahash::AHashSet;
use smol_str::SmolStr;

use accord_lib_core::records::{FilterReason, FilteredRecord, NormalizedRecord};
use accord_lib_core::stages::Stage;

pub struct FilterOutcome {
    /// Indices into the normalized table that continue to blocking.
    pub survivors: Vec<usize>,
    pub filtered_out: Vec<FilteredRecord>,
}

/// Splits the normalized table into blocking survivors and audited rejects.
/// `exact_duplicates` are the non-representative members the exact-equals
/// pass already pulled out.
pub fn filter_records(
    records: &[NormalizedRecord],
    exact_duplicates: &[FilteredRecord],
) -> FilterOutcome {
    let duplicate_ids: AHashSet<&SmolStr> =
        exact_duplicates.iter().map(|f| &f.account_id).collect();

    let mut survivors = Vec::with_capacity(records.len());
    let mut filtered_out = Vec::new();

    for (idx, record) in records.iter().enumerate() {
        if duplicate_ids.contains(record.account_id()) {
            continue;
        }
        match usability(record) {
            None => survivors.push(idx),
            Some(reason) => filtered_out.push(FilteredRecord::new(
                record.account_id().clone(),
                Stage::Filtering,
                reason,
                String::new(),
            )),
        }
    }

    FilterOutcome {
        survivors,
        filtered_out,
    }
}

fn usability(record: &NormalizedRecord) -> Option<FilterReason> {
    if record.raw_exact_key.is_empty() {
        return Some(FilterReason::EmptyNameCore);
    }
    // A raw name that normalized away entirely was all punctuation.
    if record.name_base.is_empty() {
        return Some(FilterReason::NoiseString);
    }
    if record.name_core.is_empty() {
        return Some(FilterReason::EmptyNameCore);
    }
    if record.tokens.is_empty() {
        return Some(FilterReason::NoTokens);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use accord_lib_core::records::Record;

    use crate::core::config::NormalizationConfig;
    use crate::stages::normalize::normalize;

    fn normalized(rows: &[(&str, &str)]) -> Vec<NormalizedRecord> {
        let config = NormalizationConfig::default();
        rows.iter()
            .map(|(id, name)| normalize(&Record::new(*id, *name), &config))
            .collect()
    }

    #[test]
    fn unusable_names_are_audited_with_reasons() {
        let records = normalized(&[
            ("A1", ""),
            ("A2", "Inc."),
            ("A3", "Acme Supply"),
            ("A4", "!!! ***"),
        ]);
        let outcome = filter_records(&records, &[]);
        assert_eq!(outcome.survivors, vec![2]);

        let reasons: Vec<FilterReason> = outcome.filtered_out.iter().map(|f| f.reason).collect();
        assert_eq!(
            reasons,
            vec![
                FilterReason::EmptyNameCore,
                FilterReason::EmptyNameCore,
                FilterReason::NoiseString
            ]
        );
    }

    #[test]
    fn exact_duplicates_are_excluded_from_survivors() {
        let records = normalized(&[("D1", "Walmart"), ("D2", "Walmart")]);
        let duplicate = FilteredRecord::new(
            "D2",
            Stage::ExactEquals,
            FilterReason::ExactDuplicate,
            "raw-identical to D1",
        );
        let outcome = filter_records(&records, &[duplicate]);
        assert_eq!(outcome.survivors, vec![0]);
        assert!(outcome.filtered_out.is_empty());
    }
}
