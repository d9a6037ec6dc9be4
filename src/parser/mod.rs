pub mod group;
pub mod phone;
pub mod rows;

use serde::Deserialize;
use tracing::debug;

use crate::model::ContactRecord;
pub use group::GroupHints;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HintKind {
    Title,
    AriaLabel,
}

/// An attribute value found on one of the row's descendants.
#[derive(Debug, Clone, Deserialize)]
pub struct AttrHint {
    pub kind: HintKind,
    pub value: String,
}

/// One rendered list row: its visible text plus attribute hints.
#[derive(Debug, Clone, Deserialize)]
pub struct RawRow {
    pub text: String,
    #[serde(default)]
    pub hints: Vec<AttrHint>,
}

/// Everything visible in the member list at one moment.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RawSnapshot {
    pub rows: Vec<RawRow>,
    pub group: GroupHints,
}

/// Snapshot → group name → one record per member row.
pub fn extract_snapshot(snapshot: &RawSnapshot) -> Vec<ContactRecord> {
    let group_name = group::resolve_group_name(&snapshot.group);
    let records: Vec<ContactRecord> = snapshot
        .rows
        .iter()
        .filter_map(|row| rows::extract_row(row, &group_name))
        .collect();
    debug!(
        rows = snapshot.rows.len(),
        records = records.len(),
        group = %group_name,
        "Extracted snapshot"
    );
    records
}
