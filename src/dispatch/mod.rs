pub mod runner;
pub mod template;

use std::time::Duration;

use rand::Rng;
use tracing::{info, warn};

use crate::db::StateStore;
use crate::error::{DispatchError, ValidationError};
use crate::model::{Batching, DispatchResult, Pacing, Rotation, RunState, SendTarget, Stats, Status};
use crate::provider::{PageProvider, SendOutcome, SendReport};

pub const DEFAULT_FAILURE_DELAY: Duration = Duration::from_secs(1);

const MIN_PHONE_LEN: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Running,
    Paused,
    Completed,
}

/// What one call to [`Dispatcher::step`] did and when to call it again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// One target consumed.
    Advanced { status: Status, delay: Duration },
    /// Batch threshold hit; nothing consumed.
    Break(Duration),
    Completed(Stats),
    /// Not running, or paused.
    Halted,
}

/// Parameters for a fresh run.
#[derive(Debug, Clone, Default)]
pub struct RunPlan {
    pub targets: Vec<SendTarget>,
    pub templates: Vec<String>,
    pub pacing: Pacing,
    pub rotation: Rotation,
    pub batching: Batching,
}

impl RunPlan {
    fn validate(&self) -> Result<Vec<String>, ValidationError> {
        let templates = template::usable(&self.templates);
        if templates.is_empty() {
            return Err(ValidationError::NoTemplates);
        }
        if self.targets.is_empty() {
            return Err(ValidationError::NoTargets);
        }
        let Pacing {
            min_seconds: min,
            max_seconds: max,
        } = self.pacing;
        if min < 1 {
            return Err(ValidationError::MinDelayTooShort(min));
        }
        if max < min {
            return Err(ValidationError::MaxBelowMin { min, max });
        }
        if self.batching.enabled && self.batching.break_after == 0 {
            return Err(ValidationError::BreakThresholdZero);
        }
        Ok(templates)
    }
}

/// Non-empty, at least ten characters, digits with an optional leading `+`.
pub fn is_valid_phone(phone: &str) -> bool {
    let digits = phone.strip_prefix('+').unwrap_or(phone);
    phone.len() >= MIN_PHONE_LEN && !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit())
}

fn classify(report: SendReport) -> (Status, String) {
    let (status, fallback) = match report.outcome {
        SendOutcome::Sent => (Status::Sent, "Message sent successfully"),
        SendOutcome::NotFound => (Status::NotFound, "Number not registered on the remote service"),
        SendOutcome::Failed => (Status::Failed, "Could not send message"),
    };
    let message = report
        .detail
        .filter(|d| !d.trim().is_empty())
        .unwrap_or_else(|| fallback.to_string());
    (status, message)
}

/// Sequential send loop over a target list. Owns the run state and writes it
/// through the store after every transition.
///
/// The cursor advances in memory first and is then written. A failed write
/// leaves the in-memory state authoritative and is retried before the next
/// step does any work.
pub struct Dispatcher<P, S, R> {
    provider: P,
    store: S,
    rng: R,
    state: RunState,
    failure_delay: Duration,
    dirty: bool,
    /// Delay owed by a step whose write failed.
    pending_wait: Option<Duration>,
}

impl<P, S, R> Dispatcher<P, S, R>
where
    P: PageProvider,
    S: StateStore,
    R: Rng,
{
    pub fn new(provider: P, store: S, rng: R) -> Self {
        Self {
            provider,
            store,
            rng,
            state: RunState::default(),
            failure_delay: DEFAULT_FAILURE_DELAY,
            dirty: false,
            pending_wait: None,
        }
    }

    pub fn with_failure_delay(mut self, delay: Duration) -> Self {
        self.failure_delay = delay;
        self
    }

    pub fn state(&self) -> &RunState {
        &self.state
    }

    pub fn phase(&self) -> Phase {
        let s = &self.state;
        match (s.running, s.paused) {
            (true, true) => Phase::Paused,
            (true, false) => Phase::Running,
            _ if !s.targets.is_empty() && s.is_complete() => Phase::Completed,
            _ => Phase::Idle,
        }
    }

    /// Validate and begin a fresh run. Rejected plans leave everything as it was.
    pub fn start(&mut self, plan: RunPlan) -> Result<(), DispatchError> {
        let templates = plan.validate()?;
        info!(
            targets = plan.targets.len(),
            templates = templates.len(),
            rotation = ?plan.rotation,
            "Starting run"
        );
        self.state = RunState {
            targets: plan.targets,
            templates,
            pacing: plan.pacing,
            rotation: plan.rotation,
            batching: plan.batching,
            running: true,
            ..Default::default()
        };
        self.persist()
    }

    /// Adopt whatever run the store holds and report its phase.
    pub fn restore(&mut self) -> Result<Phase, DispatchError> {
        let state = self.store.load_run()?.ok_or(DispatchError::NoSavedRun)?;
        self.state = state;
        self.dirty = false;
        self.pending_wait = None;
        Ok(self.phase())
    }

    pub fn pause(&mut self) -> Result<(), DispatchError> {
        if !self.state.running {
            return Err(DispatchError::NotRunning);
        }
        self.state.paused = true;
        info!("Paused at {} of {}", self.state.cursor, self.state.targets.len());
        self.persist()
    }

    pub fn resume(&mut self) -> Result<(), DispatchError> {
        if !self.state.running {
            return Err(DispatchError::NotRunning);
        }
        self.state.paused = false;
        info!("Resuming at {} of {}", self.state.cursor, self.state.targets.len());
        self.persist()
    }

    /// Abort. Results stay for export; the run will not resume by itself.
    pub fn stop(&mut self) -> Result<(), DispatchError> {
        self.state.running = false;
        self.state.paused = false;
        info!("Sending stopped");
        self.persist()
    }

    /// The delay a step computed before its write failed. Whoever retries
    /// the write still owes this wait before the next send.
    pub fn take_pending_wait(&mut self) -> Option<Duration> {
        self.pending_wait.take()
    }

    /// Advance by exactly one target, or take a batch break.
    pub async fn step(&mut self) -> Result<Step, DispatchError> {
        if self.dirty {
            self.persist()?;
        }
        if !self.state.running || self.state.paused {
            return Ok(Step::Halted);
        }

        // Another process may have stopped this run through the store.
        if self.store.load_run_running()? == Some(false) {
            self.state.running = false;
            self.state.paused = false;
            info!(
                "Run stopped from outside at {} of {}",
                self.state.cursor,
                self.state.targets.len()
            );
            self.persist()?;
            return Ok(Step::Halted);
        }

        if self.state.is_complete() {
            self.state.running = false;
            self.state.paused = false;
            let stats = self.state.stats;
            info!(
                sent = stats.sent,
                failed = stats.unsuccessful(),
                "Completed! Sent: {}, Failed: {}",
                stats.sent,
                stats.unsuccessful()
            );
            self.persist()?;
            return Ok(Step::Completed(stats));
        }

        let batching = self.state.batching;
        if batching.enabled && self.state.batch_sent >= batching.break_after {
            // The counter only resets once the reset is on disk, so a failed
            // write leaves the break due on the next step.
            let sent = std::mem::take(&mut self.state.batch_sent);
            if let Err(e) = self.persist() {
                self.state.batch_sent = sent;
                return Err(e);
            }
            info!("Taking a break for {} seconds...", batching.break_seconds);
            return Ok(Step::Break(Duration::from_secs(batching.break_seconds)));
        }

        let target = self.state.targets[self.state.cursor].clone();
        let text = {
            let chosen = template::pick(
                &self.state.templates,
                self.state.rotation,
                &mut self.state.template_cursor,
                &mut self.rng,
            );
            template::render(chosen, &target)
        };

        let (status, message) = if !is_valid_phone(&target.phone_number) {
            (Status::Invalid, "Invalid phone number format".to_string())
        } else {
            match self.provider.send(&target.phone_number, &text).await {
                Ok(report) => classify(report),
                Err(e) => (Status::Failed, e.to_string()),
            }
        };

        self.record(&target, status, message);

        let delay = match status {
            Status::Sent => {
                let Pacing {
                    min_seconds,
                    max_seconds,
                } = self.state.pacing;
                Duration::from_secs(self.rng.gen_range(min_seconds..=max_seconds))
            }
            _ => self.failure_delay,
        };

        if let Err(e) = self.persist() {
            self.pending_wait = Some(delay);
            return Err(e);
        }
        Ok(Step::Advanced { status, delay })
    }

    fn record(&mut self, target: &SendTarget, status: Status, message: String) {
        let index = self.state.cursor;
        match status {
            Status::Sent => {
                info!(cursor = index, phone = %target.phone_number, "Message sent to {}", target.name);
                self.state.batch_sent += 1;
            }
            _ => warn!(
                cursor = index,
                phone = %target.phone_number,
                status = %status,
                "Skipping {} - {}",
                target.name,
                message
            ),
        }
        self.state.results.push(DispatchResult::new(target, status, message));
        self.state.stats.record(status);
        self.state.cursor += 1;
    }

    fn persist(&mut self) -> Result<(), DispatchError> {
        match self.store.save_run(&self.state) {
            Ok(()) => {
                self.dirty = false;
                Ok(())
            }
            Err(e) => {
                self.dirty = true;
                Err(e.into())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::memory::MemoryStore;
    use crate::error::ProviderError;
    use crate::provider::fake::ScriptedProvider;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    type TestDispatcher = Dispatcher<ScriptedProvider, MemoryStore, StdRng>;

    fn target(name: &str, phone: &str) -> SendTarget {
        SendTarget {
            name: name.to_string(),
            company_name: "Globex".to_string(),
            phone_number: phone.to_string(),
        }
    }

    fn plan(targets: Vec<SendTarget>) -> RunPlan {
        RunPlan {
            targets,
            templates: vec!["Hi [Name] from [Company]".to_string()],
            ..Default::default()
        }
    }

    fn dispatcher(provider: ScriptedProvider) -> TestDispatcher {
        Dispatcher::new(provider, MemoryStore::default(), StdRng::seed_from_u64(42))
    }

    async fn run_to_end(d: &mut TestDispatcher) -> Vec<Step> {
        let mut steps = Vec::new();
        loop {
            let step = d.step().await.unwrap();
            steps.push(step);
            if matches!(step, Step::Completed(_) | Step::Halted) {
                return steps;
            }
        }
    }

    fn assert_invariants(state: &RunState) {
        assert!(state.cursor <= state.targets.len());
        assert_eq!(state.results.len(), state.cursor);
        assert_eq!(state.stats.total() as usize, state.cursor);
    }

    #[test]
    fn phone_syntax() {
        assert!(is_valid_phone("+15551234567"));
        assert!(is_valid_phone("5551234567"));
        assert!(!is_valid_phone(""));
        assert!(!is_valid_phone("+12345678"));
        assert!(!is_valid_phone("555-123-4567"));
        assert!(!is_valid_phone("15551+234567"));
        assert!(!is_valid_phone("++15551234567"));
    }

    #[test]
    fn start_rejects_bad_plans_without_touching_state() {
        let mut d = dispatcher(ScriptedProvider::default());

        let mut p = plan(vec![target("A", "+15551234567")]);
        p.templates = vec!["   ".into()];
        assert!(matches!(
            d.start(p),
            Err(DispatchError::Validation(ValidationError::NoTemplates))
        ));

        assert!(matches!(
            d.start(plan(Vec::new())),
            Err(DispatchError::Validation(ValidationError::NoTargets))
        ));

        let mut p = plan(vec![target("A", "+15551234567")]);
        p.pacing = Pacing { min_seconds: 0, max_seconds: 3 };
        assert!(matches!(
            d.start(p),
            Err(DispatchError::Validation(ValidationError::MinDelayTooShort(0)))
        ));

        let mut p = plan(vec![target("A", "+15551234567")]);
        p.pacing = Pacing { min_seconds: 10, max_seconds: 3 };
        assert!(matches!(
            d.start(p),
            Err(DispatchError::Validation(ValidationError::MaxBelowMin { min: 10, max: 3 }))
        ));

        assert_eq!(d.phase(), Phase::Idle);
        assert_eq!(d.store.writes.get(), 0);
    }

    #[tokio::test]
    async fn invalid_phone_is_recorded_and_skipped() {
        let mut d = dispatcher(ScriptedProvider::default());
        d.start(plan(vec![target("Bad", "12345"), target("Good", "+15551234567")]))
            .unwrap();

        let steps = run_to_end(&mut d).await;
        assert_eq!(
            steps[0],
            Step::Advanced { status: Status::Invalid, delay: DEFAULT_FAILURE_DELAY }
        );
        assert!(matches!(steps.last(), Some(Step::Completed(_))));

        let state = d.state();
        assert_eq!(state.results.len(), 2);
        assert_eq!(state.results[0].status, Status::Invalid);
        assert_eq!(state.results[1].status, Status::Sent);
        assert_eq!(state.cursor, 2);
        assert_eq!(state.stats.invalid, 1);
        assert_eq!(state.stats.sent, 1);
        assert_invariants(state);
        assert_eq!(d.phase(), Phase::Completed);

        // The invalid target never reached the page.
        assert_eq!(d.provider.deliveries.len(), 1);
        assert_eq!(d.provider.deliveries[0].1, "Hi Good from Globex");
    }

    #[tokio::test]
    async fn outcomes_are_classified_and_never_retried() {
        let provider = ScriptedProvider::default()
            .reply(SendOutcome::NotFound, None)
            .reply(SendOutcome::Failed, Some("Message input not found"))
            .fail_with(ProviderError::Remote("tab closed".into()))
            .reply(SendOutcome::Sent, None);
        let mut d = dispatcher(provider);
        d.start(plan((0..4).map(|i| target(&format!("T{i}"), "+15551234567")).collect()))
            .unwrap();

        run_to_end(&mut d).await;

        let state = d.state();
        let statuses: Vec<Status> = state.results.iter().map(|r| r.status).collect();
        assert_eq!(
            statuses,
            vec![Status::NotFound, Status::Failed, Status::Failed, Status::Sent]
        );
        assert_eq!(state.results[0].message, "Number not registered on the remote service");
        assert_eq!(state.results[1].message, "Message input not found");
        assert!(state.results[2].message.contains("tab closed"));
        assert_eq!(state.stats, Stats { sent: 1, failed: 2, invalid: 0, not_found: 1 });
        assert_eq!(d.provider.deliveries.len(), 4);
        assert_invariants(state);
    }

    #[tokio::test]
    async fn success_delays_stay_within_pacing_bounds() {
        let mut d = dispatcher(ScriptedProvider::default());
        let mut p = plan((0..1000).map(|i| target(&format!("T{i}"), "+15551234567")).collect());
        p.pacing = Pacing { min_seconds: 5, max_seconds: 15 };
        d.start(p).unwrap();

        let mut seen = std::collections::BTreeSet::new();
        for step in run_to_end(&mut d).await {
            if let Step::Advanced { status, delay } = step {
                assert_eq!(status, Status::Sent);
                let secs = delay.as_secs();
                assert!((5..=15).contains(&secs), "delay {secs}s out of range");
                seen.insert(secs);
            }
        }
        assert_eq!(d.state().stats.sent, 1000);
        // Both ends of the inclusive range show up.
        assert!(seen.contains(&5) && seen.contains(&15));
    }

    #[tokio::test]
    async fn sequential_rotation_advances_on_every_outcome() {
        let mut d = dispatcher(ScriptedProvider::default());
        let mut p = plan(vec![
            target("A", "+15551234567"),
            target("B", "bad"),
            target("C", "+15551234567"),
        ]);
        p.templates = vec!["one [Name]".into(), "two [Name]".into()];
        p.rotation = Rotation::Sequential;
        d.start(p).unwrap();
        run_to_end(&mut d).await;

        let texts: Vec<&str> = d.provider.deliveries.iter().map(|(_, t)| t.as_str()).collect();
        // B consumed "two" even though it was never delivered.
        assert_eq!(texts, vec!["one A", "one C"]);
        assert_eq!(d.state().template_cursor, 3);
    }

    #[tokio::test]
    async fn batch_break_does_not_consume_a_target() {
        let mut d = dispatcher(ScriptedProvider::default());
        let mut p = plan((0..5).map(|i| target(&format!("T{i}"), "+15551234567")).collect());
        p.pacing = Pacing { min_seconds: 1, max_seconds: 1 };
        p.batching = Batching { enabled: true, break_after: 2, break_seconds: 60 };
        d.start(p).unwrap();

        let steps = run_to_end(&mut d).await;
        let shape: Vec<&str> = steps
            .iter()
            .map(|s| match s {
                Step::Advanced { .. } => "send",
                Step::Break(_) => "break",
                Step::Completed(_) => "done",
                Step::Halted => "halt",
            })
            .collect();
        assert_eq!(
            shape,
            vec!["send", "send", "break", "send", "send", "break", "send", "done"]
        );
        assert!(steps.contains(&Step::Break(Duration::from_secs(60))));
        assert_eq!(d.state().cursor, 5);
    }

    #[tokio::test]
    async fn failures_do_not_count_toward_the_batch() {
        let provider = ScriptedProvider::default()
            .reply(SendOutcome::Failed, None)
            .reply(SendOutcome::Sent, None);
        let mut d = dispatcher(provider);
        let mut p = plan((0..3).map(|i| target(&format!("T{i}"), "+15551234567")).collect());
        p.batching = Batching { enabled: true, break_after: 2, break_seconds: 30 };
        d.start(p).unwrap();

        let steps = run_to_end(&mut d).await;
        assert!(!steps.iter().any(|s| matches!(s, Step::Break(_))));
    }

    #[tokio::test]
    async fn reloaded_run_resumes_at_cursor() {
        let mut first = dispatcher(ScriptedProvider::default());
        first
            .start(plan((0..5).map(|i| target(&format!("T{i}"), &format!("+1555000000{i}"))).collect()))
            .unwrap();
        first.step().await.unwrap();
        first.step().await.unwrap();
        assert_eq!(first.state().cursor, 2);

        // Hand the persisted blob to a fresh dispatcher, as a restarted process would.
        let Dispatcher { store, .. } = first;
        let mut second = Dispatcher::new(ScriptedProvider::default(), store, StdRng::seed_from_u64(9));
        assert_eq!(second.restore().unwrap(), Phase::Running);
        assert_eq!(second.state().cursor, 2);

        run_to_end(&mut second).await;
        let phones: Vec<&str> = second
            .provider
            .deliveries
            .iter()
            .map(|(p, _)| p.as_str())
            .collect();
        assert_eq!(phones, vec!["+15550000002", "+15550000003", "+15550000004"]);
        assert_eq!(second.state().results.len(), 5);
        assert_invariants(second.state());
    }

    #[tokio::test]
    async fn paused_and_stopped_runs_do_nothing() {
        let mut d = dispatcher(ScriptedProvider::default());
        d.start(plan(vec![target("A", "+15551234567"), target("B", "+15551234567")]))
            .unwrap();
        d.pause().unwrap();
        assert_eq!(d.phase(), Phase::Paused);
        assert_eq!(d.step().await.unwrap(), Step::Halted);
        assert_eq!(d.state().cursor, 0);

        d.resume().unwrap();
        assert!(matches!(d.step().await.unwrap(), Step::Advanced { .. }));

        d.stop().unwrap();
        assert_eq!(d.phase(), Phase::Idle);
        assert_eq!(d.step().await.unwrap(), Step::Halted);
        assert_eq!(d.state().results.len(), 1);
        assert!(matches!(d.resume(), Err(DispatchError::NotRunning)));

        // A stopped run does not come back as running after a reload.
        let mut reloaded = Dispatcher::new(
            ScriptedProvider::default(),
            MemoryStore::default(),
            StdRng::seed_from_u64(0),
        );
        assert!(matches!(reloaded.restore(), Err(DispatchError::NoSavedRun)));
        reloaded.store.save_run(d.state()).unwrap();
        assert_eq!(reloaded.restore().unwrap(), Phase::Idle);
    }

    #[tokio::test]
    async fn failed_write_is_retried_before_the_next_target() {
        let mut d = dispatcher(ScriptedProvider::default());
        d.start(plan(vec![target("A", "+15551234567"), target("B", "+15551234567")]))
            .unwrap();

        d.store.fail_writes.set(true);
        assert!(matches!(d.step().await, Err(DispatchError::Store(_))));
        // Progress is kept in memory.
        assert_eq!(d.state().cursor, 1);

        // Still failing: the retry blocks any further sends.
        assert!(matches!(d.step().await, Err(DispatchError::Store(_))));
        assert_eq!(d.provider.deliveries.len(), 1);

        d.store.fail_writes.set(false);
        assert!(matches!(d.step().await.unwrap(), Step::Advanced { .. }));
        let saved = d.store.load_run().unwrap().unwrap();
        assert_eq!(saved.cursor, 2);
        assert_invariants(&saved);
    }

    #[tokio::test]
    async fn failed_write_keeps_the_pacing_delay() {
        let mut d = dispatcher(ScriptedProvider::default());
        let mut p = plan(vec![target("A", "+15551234567"), target("B", "+15551234567")]);
        p.pacing = Pacing { min_seconds: 10, max_seconds: 10 };
        d.start(p).unwrap();

        d.store.fail_writes.set(true);
        assert!(d.step().await.is_err());
        assert_eq!(d.take_pending_wait(), Some(Duration::from_secs(10)));
        assert_eq!(d.take_pending_wait(), None);
    }

    #[tokio::test]
    async fn failed_write_during_a_break_keeps_the_break_due() {
        let mut d = dispatcher(ScriptedProvider::default());
        let mut p = plan((0..3).map(|i| target(&format!("T{i}"), "+15551234567")).collect());
        p.batching = Batching { enabled: true, break_after: 1, break_seconds: 300 };
        d.start(p).unwrap();

        assert!(matches!(d.step().await.unwrap(), Step::Advanced { .. }));

        d.store.fail_writes.set(true);
        assert!(matches!(d.step().await, Err(DispatchError::Store(_))));
        assert_eq!(d.state().batch_sent, 1);

        d.store.fail_writes.set(false);
        assert_eq!(
            d.step().await.unwrap(),
            Step::Break(Duration::from_secs(300))
        );
        assert_eq!(d.state().batch_sent, 0);
        assert_eq!(d.provider.deliveries.len(), 1);
    }

    #[tokio::test]
    async fn stop_written_by_another_process_halts_the_live_run() {
        let mut live = dispatcher(ScriptedProvider::default());
        live.start(plan((0..3).map(|i| target(&format!("T{i}"), "+15551234567")).collect()))
            .unwrap();
        assert!(matches!(live.step().await.unwrap(), Step::Advanced { .. }));

        // What the `stop` command does: load, clear the running flag, save.
        let mut stopped = live.store.load_run().unwrap().unwrap();
        stopped.running = false;
        live.store.save_run(&stopped).unwrap();

        assert_eq!(live.step().await.unwrap(), Step::Halted);
        assert_eq!(live.phase(), Phase::Idle);
        assert_eq!(live.provider.deliveries.len(), 1);
        let saved = live.store.load_run().unwrap().unwrap();
        assert!(!saved.running);
        assert_eq!(saved.cursor, 1);
    }
}
