use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::db::StateStore;
use crate::error::ScrapeError;
use crate::parser::{self, RawSnapshot};
use crate::provider::PageProvider;
use crate::roster::{MergeOutcome, Roster};

/// Stats returned when a scrape loop ends.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScrapeStats {
    pub passes: usize,
    pub added: usize,
    pub upgraded: usize,
    pub total: usize,
    pub end_reached: bool,
}

/// Cooperative stop switch for a running scrape loop.
#[derive(Debug, Clone)]
pub struct ScrapeHandle(Arc<AtomicBool>);

impl ScrapeHandle {
    fn running() -> Self {
        Self(Arc::new(AtomicBool::new(true)))
    }

    pub fn stop(&self) {
        self.0.store(false, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Scroll → extract → merge → persist, one pass at a time.
pub struct Scraper<P, S> {
    provider: P,
    store: S,
    roster: Roster,
    settle: Duration,
    handle: ScrapeHandle,
}

impl<P: PageProvider, S: StateStore> Scraper<P, S> {
    /// Picks up the roster persisted by earlier runs.
    pub fn new(provider: P, store: S, settle: Duration) -> Result<Self, ScrapeError> {
        let roster = Roster::from_records(store.load_roster()?);
        Ok(Self {
            provider,
            store,
            roster,
            settle,
            handle: ScrapeHandle::running(),
        })
    }

    pub fn handle(&self) -> ScrapeHandle {
        self.handle.clone()
    }

    pub fn roster(&self) -> &Roster {
        &self.roster
    }

    /// Keep scrolling until the list stops moving or the handle is stopped.
    /// A stop request lands between passes; the pass in flight is still merged.
    /// The handle starts out running and is not re-armed, so a stop issued
    /// before `run` makes it return without a pass.
    pub async fn run<F>(&mut self, mut on_pass: F) -> Result<ScrapeStats, ScrapeError>
    where
        F: FnMut(&ScrapeStats, &Roster),
    {
        let mut stats = ScrapeStats {
            total: self.roster.len(),
            ..Default::default()
        };

        while self.handle.is_running() {
            let advance = match self.provider.advance().await {
                Ok(a) => a,
                Err(e) => {
                    warn!("Scrape error: {}", e);
                    self.handle.stop();
                    return Err(e.into());
                }
            };

            let merged = self.absorb(&advance.snapshot)?;
            stats.passes += 1;
            stats.added += merged.added;
            stats.upgraded += merged.upgraded;
            stats.total = self.roster.len();
            on_pass(&stats, &self.roster);

            if advance.end_reached {
                stats.end_reached = true;
                self.handle.stop();
                info!("Reached end of list. Total: {} contacts", stats.total);
                return Ok(stats);
            }

            tokio::time::sleep(self.settle).await;
        }

        info!("Scraping stopped. Total: {} contacts", stats.total);
        Ok(stats)
    }

    /// One extraction of whatever is on screen, without scrolling.
    pub async fn capture_once(&mut self) -> Result<MergeOutcome, ScrapeError> {
        let snapshot = self.provider.capture_once().await?;
        let merged = self.absorb(&snapshot)?;
        info!(
            "Update done! Added {} new. Total: {}",
            merged.added,
            self.roster.len()
        );
        Ok(merged)
    }

    fn absorb(&mut self, snapshot: &RawSnapshot) -> Result<MergeOutcome, ScrapeError> {
        let records = parser::extract_snapshot(snapshot);
        let merged = self.roster.merge(records);
        self.store.save_roster(self.roster.records())?;
        Ok(merged)
    }
}
