use serde::{Deserialize, Serialize};
use smol_str::SmolStr;

use crate::pairs::JoinReason;
use crate::records::Record;

/// The per-record verdict handed to the reviewer.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    strum_macros::Display,
    strum_macros::EnumString,
)]
#[strum(serialize_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum Disposition {
    Keep,
    Update,
    Delete,
    Verify,
}

/// An accepted merge edge retained on the group for survivorship and audit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupEdge {
    pub id_a: SmolStr,
    pub id_b: SmolStr,
    pub score: i64,
    pub suffix_match: bool,
    pub reason: JoinReason,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupMember {
    pub account_id: SmolStr,
    /// Minimum accepted-edge score on the path to the primary. None for the
    /// primary itself and for singletons.
    pub weakest_edge_to_primary: Option<i64>,
}

/// A disjoint component of records deemed to refer to the same entity.
/// Members are sorted by account id. `primary_id` is empty until the
/// survivorship stage runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
    pub group_id: SmolStr,
    pub members: Vec<GroupMember>,
    pub primary_id: Option<SmolStr>,
    /// Accepted merge edges; they form a spanning forest of the group.
    pub edges: Vec<GroupEdge>,
    pub has_suffix_mismatch: bool,
    pub group_size: usize,
}

impl Group {
    pub fn is_singleton(&self) -> bool {
        self.group_size == 1
    }

    pub fn member_ids(&self) -> impl Iterator<Item = &SmolStr> {
        self.members.iter().map(|m| &m.account_id)
    }
}

/// A record with its final group membership and verdict.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispositionedRecord {
    pub record: Record,
    pub group_id: SmolStr,
    pub group_size: usize,
    pub is_primary: bool,
    pub weakest_edge_to_primary: Option<i64>,
    pub disposition: Disposition,
    pub disposition_reason: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disposition_serializes_uppercase() {
        assert_eq!(
            serde_json::to_string(&Disposition::Verify).unwrap(),
            "\"VERIFY\""
        );
    }
}
