use std::fmt;

use serde::{Deserialize, Serialize};

/// Stored in place of a number when a roster row exposed no phone digits.
pub const SAVED_CONTACT: &str = "Saved Contact";

/// A resolved phone number, or the marker for a saved roster entry whose
/// number the page never rendered.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Phone {
    Number(String),
    SavedContact,
}

impl Phone {
    pub fn is_sentinel(&self) -> bool {
        matches!(self, Phone::SavedContact)
    }

    pub fn as_str(&self) -> &str {
        match self {
            Phone::Number(n) => n,
            Phone::SavedContact => SAVED_CONTACT,
        }
    }
}

impl From<String> for Phone {
    fn from(s: String) -> Self {
        if s == SAVED_CONTACT || s.is_empty() {
            Phone::SavedContact
        } else {
            Phone::Number(s)
        }
    }
}

impl From<Phone> for String {
    fn from(p: Phone) -> Self {
        match p {
            Phone::Number(n) => n,
            Phone::SavedContact => SAVED_CONTACT.to_string(),
        }
    }
}

impl fmt::Display for Phone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactRecord {
    pub name: String,
    pub phone: Phone,
    pub group_name: String,
    pub is_admin: bool,
    pub is_saved: bool,
    pub about: String,
}

impl ContactRecord {
    /// Deduplication key: the phone when known, the display name otherwise.
    pub fn key(&self) -> &str {
        match &self.phone {
            Phone::Number(n) => n,
            Phone::SavedContact => &self.name,
        }
    }

    /// Export label: Admin wins over Unsaved, everything else is Saved.
    pub fn status_label(&self) -> &'static str {
        if self.is_admin {
            "Admin"
        } else if !self.is_saved {
            "Unsaved"
        } else {
            "Saved"
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendTarget {
    pub name: String,
    pub company_name: String,
    pub phone_number: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Sent,
    Failed,
    Invalid,
    NotFound,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Sent => "sent",
            Status::Failed => "failed",
            Status::Invalid => "invalid",
            Status::NotFound => "not_found",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchResult {
    pub name: String,
    pub company: String,
    pub phone: String,
    pub status: Status,
    pub message: String,
    pub timestamp: String,
}

impl DispatchResult {
    pub fn new(target: &SendTarget, status: Status, message: impl Into<String>) -> Self {
        Self {
            name: target.name.clone(),
            company: target.company_name.clone(),
            phone: target.phone_number.clone(),
            status,
            message: message.into(),
            timestamp: chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stats {
    pub sent: u32,
    pub failed: u32,
    pub invalid: u32,
    pub not_found: u32,
}

impl Stats {
    pub fn record(&mut self, status: Status) {
        match status {
            Status::Sent => self.sent += 1,
            Status::Failed => self.failed += 1,
            Status::Invalid => self.invalid += 1,
            Status::NotFound => self.not_found += 1,
        }
    }

    pub fn total(&self) -> u32 {
        self.sent + self.failed + self.invalid + self.not_found
    }

    /// Everything that did not end up delivered.
    pub fn unsuccessful(&self) -> u32 {
        self.failed + self.invalid + self.not_found
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pacing {
    pub min_seconds: u64,
    pub max_seconds: u64,
}

impl Default for Pacing {
    fn default() -> Self {
        Self {
            min_seconds: 5,
            max_seconds: 15,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum Rotation {
    #[default]
    Random,
    Sequential,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Batching {
    pub enabled: bool,
    pub break_after: u32,
    pub break_seconds: u64,
}

impl Default for Batching {
    fn default() -> Self {
        Self {
            enabled: false,
            break_after: 10,
            break_seconds: 60,
        }
    }
}

/// Everything a dispatch run needs to continue after the process dies.
///
/// At every stable point `results.len() == cursor == stats.total()`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunState {
    pub targets: Vec<SendTarget>,
    pub cursor: usize,
    pub stats: Stats,
    pub results: Vec<DispatchResult>,
    pub running: bool,
    pub paused: bool,
    pub templates: Vec<String>,
    pub pacing: Pacing,
    pub rotation: Rotation,
    pub batching: Batching,
    /// Successful sends since the last batch break.
    #[serde(default)]
    pub batch_sent: u32,
    /// Next template index under sequential rotation.
    #[serde(default)]
    pub template_cursor: usize,
}

impl RunState {
    pub fn remaining(&self) -> usize {
        self.targets.len().saturating_sub(self.cursor)
    }

    pub fn is_complete(&self) -> bool {
        self.cursor >= self.targets.len()
    }

    pub fn progress_text(&self) -> String {
        let total = self.targets.len();
        if self.running && !self.is_complete() {
            format!("Processing {} of {}", self.cursor + 1, total)
        } else if self.is_complete() && total > 0 {
            format!(
                "Completed! {} sent, {} failed",
                self.stats.sent,
                self.stats.unsuccessful()
            )
        } else {
            format!("Ready to send ({} contacts)", total)
        }
    }
}
