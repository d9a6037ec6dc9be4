use std::time::Duration;

use rand::Rng;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::Instant;
use tracing::{info, warn};

use super::{Dispatcher, Phase, Step};
use crate::db::StateStore;
use crate::error::DispatchError;
use crate::model::{RunState, Stats};
use crate::provider::PageProvider;

const MAX_PERSIST_RETRIES: u32 = 3;
const BASE_BACKOFF_MS: u64 = 2000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    Pause,
    Stop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunEnd {
    Completed(Stats),
    /// State is saved as paused; `Dispatcher::resume` plus another `drive` continues it.
    Paused,
    Stopped,
}

fn apply<P, S, R>(d: &mut Dispatcher<P, S, R>, control: Control) -> Result<(), DispatchError>
where
    P: PageProvider,
    S: StateStore,
    R: Rng,
{
    let result = match control {
        Control::Pause => d.pause(),
        Control::Stop => d.stop(),
    };
    match result {
        Err(DispatchError::NotRunning) => Ok(()),
        other => other,
    }
}

/// Drive a started (or resumed) run until it completes, pauses or stops.
///
/// Exactly one step is in flight at a time; the wait between steps is the
/// only place control messages are seen. Pause and stop cancel the pending
/// wait. A `stop` saved by another process is picked up by the next step.
pub async fn drive<P, S, R, F>(
    d: &mut Dispatcher<P, S, R>,
    control: &mut UnboundedReceiver<Control>,
    mut on_step: F,
) -> Result<RunEnd, DispatchError>
where
    P: PageProvider,
    S: StateStore,
    R: Rng,
    F: FnMut(&Step, &RunState),
{
    let mut persist_failures = 0u32;

    loop {
        let delay = match d.step().await {
            Ok(Step::Completed(stats)) => {
                on_step(&Step::Completed(stats), d.state());
                return Ok(RunEnd::Completed(stats));
            }
            Ok(Step::Halted) => match d.phase() {
                Phase::Paused => return Ok(RunEnd::Paused),
                Phase::Completed => return Ok(RunEnd::Completed(d.state().stats)),
                Phase::Idle | Phase::Running => return Ok(RunEnd::Stopped),
            },
            Ok(step @ (Step::Advanced { delay, .. } | Step::Break(delay))) => {
                persist_failures = 0;
                on_step(&step, d.state());
                delay
            }
            Err(DispatchError::Store(e)) if persist_failures < MAX_PERSIST_RETRIES => {
                let backoff = Duration::from_millis(BASE_BACKOFF_MS * 2u64.pow(persist_failures));
                // A failed send step still owes its pacing delay.
                let backoff = backoff.max(d.take_pending_wait().unwrap_or_default());
                persist_failures += 1;
                warn!(
                    "Could not save progress (attempt {}/{}): {}, retrying in {:.1}s",
                    persist_failures,
                    MAX_PERSIST_RETRIES,
                    e,
                    backoff.as_secs_f64()
                );
                backoff
            }
            Err(e) => return Err(e),
        };

        let deadline = Instant::now() + delay;
        loop {
            tokio::select! {
                _ = tokio::time::sleep_until(deadline) => break,
                Some(c) = control.recv() => {
                    apply(d, c)?;
                    if d.phase() != Phase::Running {
                        info!("Pending wait cancelled ({:?})", c);
                        break;
                    }
                }
            }
        }
    }
}
