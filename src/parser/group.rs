use std::sync::LazyLock;

use regex::Regex;
use serde::Deserialize;

pub const UNKNOWN_GROUP: &str = "Unknown Group";

static PHONE_LIKE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[+0-9\s\-(),]+$").unwrap());

/// Group-name evidence gathered next to a snapshot, strongest first.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct GroupHints {
    /// Editable subject field of the group info panel.
    pub subject: Option<String>,
    /// Header label above the member list.
    pub header: Option<String>,
    /// Short texts found in the info section, in page order.
    pub candidates: Vec<String>,
}

pub fn resolve_group_name(hints: &GroupHints) -> String {
    let explicit = [hints.subject.as_deref(), hints.header.as_deref()];
    if let Some(name) = explicit
        .into_iter()
        .flatten()
        .map(str::trim)
        .find(|s| !s.is_empty())
    {
        return name.to_string();
    }

    hints
        .candidates
        .iter()
        .map(|c| c.trim())
        .find(|c| is_group_candidate(c))
        .map(str::to_string)
        .unwrap_or_else(|| UNKNOWN_GROUP.to_string())
}

fn is_group_candidate(text: &str) -> bool {
    !text.is_empty()
        && text.chars().count() < 100
        && !PHONE_LIKE_RE.is_match(text)
        && !text.contains("online")
        && !text.contains("click here")
}
