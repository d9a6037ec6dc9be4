use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::info;

use super::{Advance, PageProvider, SendReport};
use crate::error::ProviderError;
use crate::parser::RawSnapshot;

/// Plays back member-list snapshots saved as `*.json` files, in file name
/// order. Useful for re-running extraction offline.
pub struct ReplayProvider {
    files: Vec<PathBuf>,
    position: usize,
}

impl ReplayProvider {
    pub fn open(dir: &Path) -> Result<Self, ProviderError> {
        let mut files: Vec<PathBuf> = std::fs::read_dir(dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.extension().is_some_and(|ext| ext == "json"))
            .collect();
        files.sort();
        info!("Replaying {} snapshots from {}", files.len(), dir.display());
        Ok(Self { files, position: 0 })
    }

    fn read(path: &Path) -> Result<RawSnapshot, ProviderError> {
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }
}

#[async_trait]
impl PageProvider for ReplayProvider {
    async fn advance(&mut self) -> Result<Advance, ProviderError> {
        let Some(path) = self.files.get(self.position) else {
            return Ok(Advance {
                snapshot: RawSnapshot::default(),
                end_reached: true,
            });
        };
        let snapshot = Self::read(path)?;
        self.position += 1;
        Ok(Advance {
            snapshot,
            end_reached: self.position >= self.files.len(),
        })
    }

    async fn capture_once(&mut self) -> Result<RawSnapshot, ProviderError> {
        match self.files.first() {
            Some(path) => Self::read(path),
            None => Ok(RawSnapshot::default()),
        }
    }

    async fn send(&mut self, _phone: &str, _text: &str) -> Result<SendReport, ProviderError> {
        Err(ProviderError::Unsupported("replayed snapshots cannot deliver messages"))
    }
}
