use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use smol_str::SmolStr;

use crate::stages::Stage;

/// A raw account row as delivered by the ingestion collaborator. Columns the
/// pipeline does not interpret ride along in `extra` and are preserved in
/// every output artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub account_id: SmolStr,
    pub account_name_raw: String,
    #[serde(default)]
    pub created_date: String,
    #[serde(default)]
    pub relationship: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, String>,
}

impl Record {
    pub fn new(account_id: impl Into<SmolStr>, account_name_raw: impl Into<String>) -> Record {
        Record {
            account_id: account_id.into(),
            account_name_raw: account_name_raw.into(),
            created_date: String::new(),
            relationship: String::new(),
            extra: BTreeMap::new(),
        }
    }
}

/// Detected trailing legal-suffix category.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Default,
    Serialize,
    Deserialize,
    strum_macros::Display,
    strum_macros::EnumString,
    strum_macros::IntoStaticStr,
)]
#[strum(serialize_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum SuffixClass {
    Inc,
    Llc,
    Ltd,
    Corp,
    Llp,
    Lp,
    Pllc,
    Pc,
    Co,
    Gmbh,
    #[default]
    None,
}

/// A record plus its derived name fields. Empty or whitespace-only raw names
/// yield empty derived fields which every downstream stage must tolerate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedRecord {
    pub record: Record,
    /// Lowercased, symbol-mapped, punctuation-stripped, whitespace-collapsed.
    pub name_base: String,
    /// `name_base` with trailing legal-suffix tokens removed.
    pub name_core: String,
    pub suffix_class: SuffixClass,
    /// Ordered tokens of `name_core`, duplicates preserved.
    pub tokens: Vec<SmolStr>,
    /// Tokens after weak-token removal and canonicalization. Falls back to
    /// `tokens` when no enhancement tables are configured.
    pub enhanced_tokens: Vec<SmolStr>,
    /// Trim + whitespace collapse of the raw name, case and punctuation
    /// preserved. Empty names produce an empty key, which never groups.
    pub raw_exact_key: String,
}

impl NormalizedRecord {
    pub fn account_id(&self) -> &SmolStr {
        &self.record.account_id
    }
}

/// Reason a record was rejected into the filtered-out audit.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum_macros::Display,
    strum_macros::EnumString,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum FilterReason {
    EmptyNameCore,
    NoTokens,
    NoiseString,
    ExactDuplicate,
    InputError,
}

/// One row of the filtered-out audit artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilteredRecord {
    pub account_id: SmolStr,
    pub stage: Stage,
    pub reason: FilterReason,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub detail: String,
}

impl FilteredRecord {
    pub fn new(
        account_id: impl Into<SmolStr>,
        stage: Stage,
        reason: FilterReason,
        detail: impl Into<String>,
    ) -> FilteredRecord {
        FilteredRecord {
            account_id: account_id.into(),
            stage,
            reason,
            detail: detail.into(),
        }
    }
}
