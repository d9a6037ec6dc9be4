use std::collections::HashMap;

use crate::model::{ContactRecord, SendTarget};

/// Contacts keyed by identity, kept in first-seen order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Roster {
    records: Vec<ContactRecord>,
    index: HashMap<String, usize>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeOutcome {
    pub added: usize,
    pub upgraded: usize,
}

impl MergeOutcome {
    pub fn changed(&self) -> bool {
        self.added > 0 || self.upgraded > 0
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RosterSummary {
    pub total: usize,
    pub admins: usize,
    pub unsaved: usize,
}

impl Roster {
    pub fn from_records(records: Vec<ContactRecord>) -> Self {
        let mut roster = Self::default();
        roster.merge(records);
        roster
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[ContactRecord] {
        &self.records
    }

    #[cfg(test)]
    pub fn get(&self, key: &str) -> Option<&ContactRecord> {
        self.index.get(key).map(|&i| &self.records[i])
    }

    /// Fold a batch in. New keys are appended; known keys only ever gain
    /// information: a resolved phone replaces the sentinel, and a missing
    /// about line gets filled. Every other field keeps its first-seen value.
    pub fn merge(&mut self, incoming: impl IntoIterator<Item = ContactRecord>) -> MergeOutcome {
        let mut outcome = MergeOutcome::default();

        for record in incoming {
            let Some(i) = self.index.get(record.key()).copied() else {
                self.index.insert(record.key().to_string(), self.records.len());
                self.records.push(record);
                outcome.added += 1;
                continue;
            };

            let existing = &mut self.records[i];
            let mut upgraded = false;
            if existing.phone.is_sentinel() && !record.phone.is_sentinel() {
                existing.phone = record.phone;
                existing.is_saved = record.is_saved;
                upgraded = true;
            }
            if existing.about.is_empty() && !record.about.is_empty() {
                existing.about = record.about;
                upgraded = true;
            }
            if upgraded {
                outcome.upgraded += 1;
            }
        }

        outcome
    }

    pub fn summary(&self) -> RosterSummary {
        RosterSummary {
            total: self.records.len(),
            admins: self.records.iter().filter(|r| r.is_admin).count(),
            unsaved: self.records.iter().filter(|r| !r.is_saved).count(),
        }
    }

    /// Unsaved members with a known number become send targets.
    pub fn promote(&self) -> Vec<SendTarget> {
        self.records
            .iter()
            .filter(|r| !r.is_saved && !r.phone.is_sentinel())
            .map(|r| SendTarget {
                name: r.name.clone(),
                company_name: String::new(),
                phone_number: r.phone.to_string(),
            })
            .collect()
    }
}
