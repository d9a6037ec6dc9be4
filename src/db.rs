use std::path::Path;

use rusqlite::{Connection, OptionalExtension};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::model::{ContactRecord, RunState, SendTarget};

const RUN_STATE_KEY: &str = "run_state";
const ROSTER_KEY: &str = "roster";
const TARGETS_KEY: &str = "targets";

/// Durable key → JSON blob store. Each call is all-or-nothing.
pub trait StateStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError>;
    fn put(&self, key: &str, value: &str) -> Result<(), StoreError>;
    fn clear(&self) -> Result<(), StoreError>;

    fn load_run(&self) -> Result<Option<RunState>, StoreError> {
        get_json(self, RUN_STATE_KEY)
    }

    /// Only the `running` flag of the stored run, without decoding results.
    fn load_run_running(&self) -> Result<Option<bool>, StoreError> {
        Ok(get_json::<_, RunFlags>(self, RUN_STATE_KEY)?.map(|f| f.running))
    }

    fn save_run(&self, state: &RunState) -> Result<(), StoreError> {
        put_json(self, RUN_STATE_KEY, state)
    }

    fn load_roster(&self) -> Result<Vec<ContactRecord>, StoreError> {
        Ok(get_json(self, ROSTER_KEY)?.unwrap_or_default())
    }

    fn save_roster(&self, records: &[ContactRecord]) -> Result<(), StoreError> {
        put_json(self, ROSTER_KEY, &records)
    }

    fn load_targets(&self) -> Result<Vec<SendTarget>, StoreError> {
        Ok(get_json(self, TARGETS_KEY)?.unwrap_or_default())
    }

    fn save_targets(&self, targets: &[SendTarget]) -> Result<(), StoreError> {
        put_json(self, TARGETS_KEY, &targets)
    }
}

#[derive(Deserialize)]
struct RunFlags {
    running: bool,
}

fn get_json<S, T>(store: &S, key: &str) -> Result<Option<T>, StoreError>
where
    S: StateStore + ?Sized,
    T: DeserializeOwned,
{
    match store.get(key)? {
        Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
        None => Ok(None),
    }
}

fn put_json<S, T>(store: &S, key: &str, value: &T) -> Result<(), StoreError>
where
    S: StateStore + ?Sized,
    T: Serialize + ?Sized,
{
    let raw = serde_json::to_string(value)?;
    store.put(key, &raw)
}

pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    pub fn connect(path: &Path) -> Result<Self, StoreError> {
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        Self::with_connection(conn)
    }

    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS app_state (
                key        TEXT PRIMARY KEY,
                value      TEXT NOT NULL,
                updated_at TEXT NOT NULL DEFAULT (datetime('now'))
            );
            ",
        )?;
        Ok(Self { conn })
    }
}

impl StateStore for SqliteStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let value = self
            .conn
            .query_row(
                "SELECT value FROM app_state WHERE key = ?1",
                rusqlite::params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    fn put(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.conn.execute(
            "INSERT INTO app_state (key, value, updated_at) VALUES (?1, ?2, datetime('now'))
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            rusqlite::params![key, value],
        )?;
        Ok(())
    }

    fn clear(&self) -> Result<(), StoreError> {
        self.conn.execute("DELETE FROM app_state", [])?;
        Ok(())
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Phone, Status};

    fn sample_run() -> RunState {
        let target = SendTarget {
            name: "Alice".into(),
            company_name: "Acme".into(),
            phone_number: "+15551234567".into(),
        };
        let mut state = RunState {
            targets: vec![target.clone(), target.clone()],
            templates: vec!["Hi [Name]".into()],
            running: true,
            ..Default::default()
        };
        state.results.push(crate::model::DispatchResult::new(
            &target,
            Status::Sent,
            "Message sent successfully",
        ));
        state.stats.record(Status::Sent);
        state.cursor = 1;
        state
    }

    #[test]
    fn empty_store_has_nothing() {
        let store = SqliteStore::open_in_memory().unwrap();
        assert!(store.load_run().unwrap().is_none());
        assert!(store.load_roster().unwrap().is_empty());
        assert!(store.load_targets().unwrap().is_empty());
    }

    #[test]
    fn run_state_survives_a_save_load_cycle() {
        let store = SqliteStore::open_in_memory().unwrap();
        let state = sample_run();
        store.save_run(&state).unwrap();
        assert_eq!(store.load_run().unwrap(), Some(state.clone()));

        let mut later = state;
        later.paused = true;
        store.save_run(&later).unwrap();
        assert!(store.load_run().unwrap().unwrap().paused);
    }

    #[test]
    fn clear_wipes_every_key() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.save_run(&sample_run()).unwrap();
        store
            .save_roster(&[ContactRecord {
                name: "Bob".into(),
                phone: Phone::SavedContact,
                group_name: "G".into(),
                is_admin: false,
                is_saved: true,
                about: String::new(),
            }])
            .unwrap();
        store.save_targets(&sample_run().targets).unwrap();
        store.clear().unwrap();
        assert!(store.load_run().unwrap().is_none());
        assert!(store.load_roster().unwrap().is_empty());
        assert!(store.load_targets().unwrap().is_empty());
    }

    #[test]
    fn file_backed_store_reopens() {
        let dir = std::env::temp_dir().join(format!("bulk-db-{}", std::process::id()));
        let path = dir.join("nested").join("state.sqlite");
        {
            let store = SqliteStore::connect(&path).unwrap();
            store.save_targets(&sample_run().targets).unwrap();
        }
        let store = SqliteStore::connect(&path).unwrap();
        assert_eq!(store.load_targets().unwrap().len(), 2);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn running_flag_reads_without_the_full_run() {
        let store = SqliteStore::open_in_memory().unwrap();
        assert_eq!(store.load_run_running().unwrap(), None);

        let mut state = sample_run();
        store.save_run(&state).unwrap();
        assert_eq!(store.load_run_running().unwrap(), Some(true));

        state.running = false;
        store.save_run(&state).unwrap();
        assert_eq!(store.load_run_running().unwrap(), Some(false));
    }

    #[test]
    fn unusable_parent_directory_is_an_io_error() {
        let blocker = std::env::temp_dir().join(format!("bulk-db-file-{}", std::process::id()));
        std::fs::write(&blocker, b"not a directory").unwrap();

        let err = SqliteStore::connect(&blocker.join("state.sqlite")).err().unwrap();
        assert!(matches!(err, StoreError::Io(_)));
        std::fs::remove_file(&blocker).ok();
    }
}
