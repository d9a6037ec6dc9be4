use std::sync::LazyLock;

use regex::Regex;
use tracing::debug;

use super::phone::{self, RowView};
use super::RawRow;
use crate::model::{ContactRecord, Phone};

static ADMIN_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)group admin|admin").unwrap());

/// First-line markers of list rows that are actions, not members.
const ACTION_ROW_MARKERS: &[&str] = &["Add participant", "Invite to group"];

fn split_lines(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect()
}

fn is_admin_marker(line: &str) -> bool {
    line.to_lowercase().contains("admin")
}

/// Turn one list row into a contact. Action rows and blank rows yield `None`.
pub fn extract_row(row: &RawRow, group_name: &str) -> Option<ContactRecord> {
    let lines = split_lines(&row.text);
    let (first, secondary) = lines.split_first()?;

    if ACTION_ROW_MARKERS.iter().any(|m| first.contains(m)) {
        return None;
    }

    let is_admin = is_admin_marker(&row.text);
    let name = ADMIN_RE.replace_all(first, "").trim().to_string();

    let view = RowView {
        name: &name,
        secondary,
        row,
    };
    let (phone, is_saved) = match phone::resolve(&view) {
        Some((resolver, res)) => {
            debug!(resolver, phone = %res.phone, saved = res.is_saved, "Resolved {}", name);
            (Phone::Number(res.phone), res.is_saved)
        }
        None => (Phone::SavedContact, true),
    };

    let about = secondary
        .iter()
        .find(|l| !is_admin_marker(l) && !phone::looks_like_phone(l))
        .cloned()
        .unwrap_or_default();

    Some(ContactRecord {
        name,
        phone,
        group_name: group_name.to_string(),
        is_admin,
        is_saved,
        about,
    })
}
