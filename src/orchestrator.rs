//! Processing orchestrator
//!
//! At most one run is active per store. Starting a run cancels the previous
//! one (last write wins, no queue). A run:
//!
//! 1. saves the frozen store (failure is logged, not fatal)
//! 2. sequences the snapshot once
//! 3. fans out every aggregate as a blocking task in one `JoinSet`
//! 4. publishes the assembled `ProcessedData` as a whole
//!
//! Publishing happens under the same lock `start` uses to supersede runs, so
//! a run that was cancelled can never publish, not even partially.

use log::{debug, info, warn};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::config::AnalyticsConfig;
use crate::error::AnalyticsError;
use crate::persistence::{Persistence, StoreRecord};
use crate::pipeline::{Aggregate, AggregateOutput, PreparedInput, ProcessedDataBuilder};
use crate::store::StoreSnapshot;
use crate::types::ProcessedData;

/// Lifecycle of the most recent processing run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RunState {
    #[default]
    Idle,
    Running(u64),
    Cancelled(u64),
    Completed(u64),
    /// An aggregate failed; the previous result stays published
    Failed(u64),
}

impl RunState {
    pub fn is_running(&self) -> bool {
        matches!(self, RunState::Running(_))
    }

    /// Run the state refers to, if any
    pub fn run_id(&self) -> Option<u64> {
        match self {
            RunState::Idle => None,
            RunState::Running(id)
            | RunState::Cancelled(id)
            | RunState::Completed(id)
            | RunState::Failed(id) => Some(*id),
        }
    }
}

/// Computes one aggregate of a run
type AggregateRunner = Arc<
    dyn Fn(Aggregate, &PreparedInput, &CancellationToken) -> Result<AggregateOutput, AnalyticsError>
        + Send
        + Sync,
>;

struct ActiveRun {
    id: u64,
    cancel: CancellationToken,
}

#[derive(Default)]
struct RunSlot {
    last_id: u64,
    active: Option<ActiveRun>,
}

struct Inner {
    handle: Handle,
    config: AnalyticsConfig,
    persistence: Arc<dyn Persistence>,
    runner: AggregateRunner,
    slot: Mutex<RunSlot>,
    /// Serialises saves; holds the newest revision written
    saved_revision: Mutex<Option<u64>>,
    processed: watch::Sender<Arc<ProcessedData>>,
    state: watch::Sender<RunState>,
}

impl Inner {
    fn slot(&self) -> MutexGuard<'_, RunSlot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Save unless a newer revision has already been written
    fn save(&self, revision: u64, record: &StoreRecord) -> Result<(), AnalyticsError> {
        let mut saved = self.saved_revision.lock().unwrap_or_else(PoisonError::into_inner);
        if saved.is_some_and(|newest| revision < newest) {
            debug!("skipping save of stale revision {revision}");
            return Ok(());
        }
        self.persistence.save(record)?;
        *saved = Some(revision);
        Ok(())
    }

    fn finish(
        &self,
        id: u64,
        cancel: &CancellationToken,
        outcome: Result<ProcessedData, AnalyticsError>,
    ) {
        let mut slot = self.slot();
        let current = slot.active.as_ref().is_some_and(|run| run.id == id);
        if !current || cancel.is_cancelled() {
            debug!("run {id} superseded, discarding its result");
            return;
        }
        slot.active = None;

        match outcome {
            Ok(data) => {
                info!("run {id} published {} days", data.dates.len());
                self.processed.send_replace(Arc::new(data));
                self.state.send_replace(RunState::Completed(id));
            }
            Err(e) if e.is_cancelled() => {
                self.state.send_replace(RunState::Cancelled(id));
            }
            Err(e) => {
                warn!("run {id} failed, keeping previous result: {e}");
                self.state.send_replace(RunState::Failed(id));
            }
        }
    }
}

/// Schedules processing runs for one store
#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

impl Orchestrator {
    /// Create an orchestrator publishing `initial` until the first run completes
    pub fn new(
        handle: Handle,
        config: AnalyticsConfig,
        persistence: Arc<dyn Persistence>,
        initial: ProcessedData,
    ) -> Result<Self, AnalyticsError> {
        Self::with_runner(handle, config, persistence, initial, Arc::new(Aggregate::run))
    }

    fn with_runner(
        handle: Handle,
        config: AnalyticsConfig,
        persistence: Arc<dyn Persistence>,
        initial: ProcessedData,
        runner: AggregateRunner,
    ) -> Result<Self, AnalyticsError> {
        config.validate()?;
        let (processed, _) = watch::channel(Arc::new(initial));
        let (state, _) = watch::channel(RunState::Idle);

        Ok(Self {
            inner: Arc::new(Inner {
                handle,
                config,
                persistence,
                runner,
                slot: Mutex::new(RunSlot::default()),
                saved_revision: Mutex::new(None),
                processed,
                state,
            }),
        })
    }

    pub fn config(&self) -> &AnalyticsConfig {
        &self.inner.config
    }

    pub fn handle(&self) -> &Handle {
        &self.inner.handle
    }

    /// Cancel any active run and start a new one over `snapshot`
    pub fn start(&self, snapshot: Arc<StoreSnapshot>) -> u64 {
        let mut slot = self.inner.slot();
        slot.last_id += 1;
        let id = slot.last_id;

        if let Some(previous) = slot.active.take() {
            previous.cancel.cancel();
            self.inner.state.send_replace(RunState::Cancelled(previous.id));
            debug!("run {} superseded by run {id}", previous.id);
        }

        let cancel = CancellationToken::new();
        slot.active = Some(ActiveRun {
            id,
            cancel: cancel.clone(),
        });
        self.inner.state.send_replace(RunState::Running(id));
        debug!("run {id} started at revision {}", snapshot.revision);

        let inner = Arc::clone(&self.inner);
        self.inner.handle.spawn(async move {
            let outcome = execute(&inner, id, snapshot, &cancel).await;
            inner.finish(id, &cancel, outcome);
        });

        id
    }

    /// Cancel the active run without starting another
    pub fn cancel(&self) {
        let mut slot = self.inner.slot();
        if let Some(run) = slot.active.take() {
            run.cancel.cancel();
            self.inner.state.send_replace(RunState::Cancelled(run.id));
            debug!("run {} cancelled", run.id);
        }
    }

    pub fn state(&self) -> RunState {
        *self.inner.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<RunState> {
        self.inner.state.subscribe()
    }

    /// Wait until no run is active
    pub async fn settled(&self) -> RunState {
        let mut rx = self.inner.state.subscribe();
        if let Ok(state) = rx.wait_for(|state| !state.is_running()).await {
            return *state;
        }
        let state = *rx.borrow();
        state
    }

    /// Last published result
    pub fn processed(&self) -> Arc<ProcessedData> {
        Arc::clone(&self.inner.processed.borrow())
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<ProcessedData>> {
        self.inner.processed.subscribe()
    }
}

async fn execute(
    inner: &Arc<Inner>,
    id: u64,
    snapshot: Arc<StoreSnapshot>,
    cancel: &CancellationToken,
) -> Result<ProcessedData, AnalyticsError> {
    let record = snapshot.to_record(&inner.processed.borrow());
    let saver = Arc::clone(inner);
    let revision = snapshot.revision;
    let save = tokio::task::spawn_blocking(move || saver.save(revision, &record));

    tokio::select! {
        biased;
        _ = cancel.cancelled() => return Err(AnalyticsError::Cancelled),
        saved = save => match saved {
            Ok(Ok(())) => debug!("run {id} saved revision {revision}"),
            Ok(Err(e)) => warn!("run {id} could not save store, continuing: {e}"),
            Err(e) => warn!("run {id} save task failed, continuing: {e}"),
        },
    }

    let config = inner.config.clone();
    let input = tokio::task::spawn_blocking(move || PreparedInput::new(&snapshot, &config))
        .await
        .map_err(|e| AnalyticsError::TaskFailed(e.to_string()))?;
    if cancel.is_cancelled() {
        return Err(AnalyticsError::Cancelled);
    }

    let input = Arc::new(input);
    let group = cancel.child_token();
    let mut tasks = JoinSet::new();
    for aggregate in Aggregate::ALL {
        let input = Arc::clone(&input);
        let group = group.clone();
        let runner = Arc::clone(&inner.runner);
        tasks.spawn_blocking(move || (aggregate, runner(aggregate, &input, &group)));
    }

    let mut builder = ProcessedDataBuilder::new(input.dates.clone());
    loop {
        let joined = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tasks.abort_all();
                return Err(AnalyticsError::Cancelled);
            }
            joined = tasks.join_next() => joined,
        };

        let failure = match joined {
            None => break,
            Some(Ok((aggregate, Ok(output)))) => {
                debug!("run {id} computed {}", aggregate.as_str());
                builder.apply(output);
                continue;
            }
            Some(Ok((aggregate, Err(e)))) => {
                if !e.is_cancelled() {
                    warn!("run {id} aggregate {} failed: {e}", aggregate.as_str());
                }
                e
            }
            Some(Err(e)) => AnalyticsError::TaskFailed(e.to_string()),
        };
        group.cancel();
        tasks.abort_all();
        return Err(failure);
    }

    Ok(builder.build())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::MemoryPersistence;
    use crate::pipeline::process_snapshot;
    use crate::store::SnapshotStore;
    use crate::types::{MoodLevels, MoodSnapshot};
    use chrono::{TimeZone, Utc};
    use pretty_assertions::assert_eq;
    use std::sync::mpsc;
    use tokio::sync::Notify;

    /// Persistence whose first save blocks until released
    struct GatedPersistence {
        gate: Mutex<Option<mpsc::Receiver<()>>>,
        entered: Notify,
        sizes: Mutex<Vec<usize>>,
    }

    impl GatedPersistence {
        fn new() -> (Arc<Self>, mpsc::Sender<()>) {
            let (release, gate) = mpsc::channel();
            let persistence = Arc::new(Self {
                gate: Mutex::new(Some(gate)),
                entered: Notify::new(),
                sizes: Mutex::new(Vec::new()),
            });
            (persistence, release)
        }

        fn saved_sizes(&self) -> Vec<usize> {
            self.sizes.lock().unwrap().clone()
        }
    }

    impl Persistence for GatedPersistence {
        fn load(&self) -> Result<Option<StoreRecord>, AnalyticsError> {
            Ok(None)
        }

        fn save(&self, record: &StoreRecord) -> Result<(), AnalyticsError> {
            self.entered.notify_one();
            let gate = self.gate.lock().unwrap().take();
            if let Some(gate) = gate {
                let _ = gate.recv();
            }
            self.sizes.lock().unwrap().push(record.mood_snapshots.len());
            Ok(())
        }
    }

    struct FailingPersistence;

    impl Persistence for FailingPersistence {
        fn load(&self) -> Result<Option<StoreRecord>, AnalyticsError> {
            Ok(None)
        }

        fn save(&self, _record: &StoreRecord) -> Result<(), AnalyticsError> {
            Err(AnalyticsError::Persistence("disk full".to_string()))
        }
    }

    fn store_with(days: &[u32]) -> SnapshotStore {
        let mut store = SnapshotStore::new();
        for d in days {
            let ts = Utc.with_ymd_and_hms(2024, 5, *d, 12, 0, 0).unwrap();
            let v = f64::from(*d % 5);
            let mut snap = MoodSnapshot::mood(ts, MoodLevels::new(v, 1.0, 2.0, 0.0));
            snap.notes = "#walk".to_string();
            store.insert(snap).unwrap();
        }
        store
    }

    fn orchestrator(persistence: Arc<dyn Persistence>) -> Orchestrator {
        Orchestrator::new(
            Handle::current(),
            AnalyticsConfig::default(),
            persistence,
            ProcessedData::default(),
        )
        .unwrap()
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_run_matches_sequential_processing() {
        let orchestrator = orchestrator(Arc::new(MemoryPersistence::new()));
        let snapshot = store_with(&[1, 2, 4, 9]).freeze();

        let states = orchestrator.watch_state();
        let id = orchestrator.start(Arc::clone(&snapshot));
        assert_eq!(orchestrator.settled().await, RunState::Completed(id));
        assert_eq!(states.borrow().run_id(), Some(id));
        assert_eq!(orchestrator.state(), RunState::Completed(id));

        let expected = process_snapshot(&snapshot, orchestrator.config()).unwrap();
        assert_eq!(*orchestrator.processed(), expected);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_superseded_run_never_publishes() {
        let (persistence, release) = GatedPersistence::new();
        let orchestrator = orchestrator(persistence.clone());
        let mut published = orchestrator.subscribe();
        published.borrow_and_update();

        let mut store = store_with(&[1]);
        let run_a = orchestrator.start(store.freeze());
        persistence.entered.notified().await;

        let ts = Utc.with_ymd_and_hms(2024, 5, 3, 12, 0, 0).unwrap();
        store.insert(MoodSnapshot::mood(ts, MoodLevels::new(4.0, 0.0, 0.0, 0.0))).unwrap();
        let snapshot_b = store.freeze();
        let run_b = orchestrator.start(Arc::clone(&snapshot_b));
        assert!(run_b > run_a);

        release.send(()).unwrap();
        assert_eq!(orchestrator.settled().await, RunState::Completed(run_b));

        assert!(published.has_changed().unwrap());
        let expected = process_snapshot(&snapshot_b, orchestrator.config()).unwrap();
        assert_eq!(**published.borrow_and_update(), expected);
        assert_eq!(orchestrator.processed().dates.len(), 3);

        // Run B's save lands last even though run A's save was in flight first
        assert_eq!(persistence.saved_sizes().last(), Some(&2));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_cancel_keeps_previous_result() {
        let (persistence, release) = GatedPersistence::new();
        let previous = kept_result();
        let orchestrator = Orchestrator::new(
            Handle::current(),
            AnalyticsConfig::default(),
            persistence.clone(),
            previous.clone(),
        )
        .unwrap();

        let id = orchestrator.start(store_with(&[1, 2]).freeze());
        persistence.entered.notified().await;
        orchestrator.cancel();
        release.send(()).unwrap();

        assert_eq!(orchestrator.settled().await, RunState::Cancelled(id));
        assert_eq!(*orchestrator.processed(), previous);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_save_failure_is_not_fatal() {
        let orchestrator = orchestrator(Arc::new(FailingPersistence));
        let id = orchestrator.start(store_with(&[1, 2, 3]).freeze());

        assert_eq!(orchestrator.settled().await, RunState::Completed(id));
        assert_eq!(orchestrator.processed().dates.len(), 3);
        assert_eq!(orchestrator.processed().hashtag_list, vec!["#walk".to_string()]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_rapid_restarts_publish_last() {
        let orchestrator = orchestrator(Arc::new(MemoryPersistence::new()));
        let mut store = SnapshotStore::new();
        let mut last = 0;
        for d in 1..=8u32 {
            let ts = Utc.with_ymd_and_hms(2024, 5, d, 8, 0, 0).unwrap();
            store.insert(MoodSnapshot::mood(ts, MoodLevels::new(1.0, 1.0, 1.0, 1.0))).unwrap();
            last = orchestrator.start(store.freeze());
        }

        assert_eq!(orchestrator.settled().await, RunState::Completed(last));
        assert_eq!(orchestrator.processed().dates.len(), 8);
    }

    fn orchestrator_with_runner(
        previous: &ProcessedData,
        runner: AggregateRunner,
    ) -> Orchestrator {
        Orchestrator::with_runner(
            Handle::current(),
            AnalyticsConfig::default(),
            Arc::new(MemoryPersistence::new()),
            previous.clone(),
            runner,
        )
        .unwrap()
    }

    fn kept_result() -> ProcessedData {
        ProcessedData {
            hashtag_list: vec!["#kept".to_string()],
            ..Default::default()
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_failed_aggregate_keeps_previous_result() {
        let previous = kept_result();
        let runner: AggregateRunner = Arc::new(
            |aggregate: Aggregate, input: &PreparedInput, cancel: &CancellationToken| {
                if aggregate == Aggregate::Health {
                    return Err(AnalyticsError::TaskFailed("health unavailable".to_string()));
                }
                aggregate.run(input, cancel)
            },
        );
        let orchestrator = orchestrator_with_runner(&previous, runner);
        let mut published = orchestrator.subscribe();
        published.borrow_and_update();

        let id = orchestrator.start(store_with(&[1, 2, 3]).freeze());

        assert_eq!(orchestrator.settled().await, RunState::Failed(id));
        assert_eq!(orchestrator.state().run_id(), Some(id));
        assert!(!published.has_changed().unwrap());
        assert_eq!(*orchestrator.processed(), previous);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_cancel_while_aggregates_run() {
        let previous = kept_result();
        let started = Arc::new(Notify::new());
        let stopped = Arc::new(Notify::new());

        let (on_start, on_stop) = (Arc::clone(&started), Arc::clone(&stopped));
        let runner: AggregateRunner = Arc::new(
            move |aggregate: Aggregate, input: &PreparedInput, cancel: &CancellationToken| {
                if aggregate != Aggregate::History {
                    return aggregate.run(input, cancel);
                }
                on_start.notify_one();
                while !cancel.is_cancelled() {
                    std::thread::sleep(std::time::Duration::from_millis(1));
                }
                on_stop.notify_one();
                Err(AnalyticsError::Cancelled)
            },
        );
        let orchestrator = orchestrator_with_runner(&previous, runner);
        let mut published = orchestrator.subscribe();
        published.borrow_and_update();

        let id = orchestrator.start(store_with(&[1, 2, 3, 4]).freeze());
        started.notified().await;
        assert_eq!(orchestrator.state(), RunState::Running(id));
        orchestrator.cancel();

        assert_eq!(orchestrator.settled().await, RunState::Cancelled(id));
        // The blocked aggregate observes cancellation through its group token
        stopped.notified().await;
        assert!(!published.has_changed().unwrap());
        assert_eq!(*orchestrator.processed(), previous);
    }

    #[tokio::test]
    async fn test_invalid_config_rejected() {
        let config = AnalyticsConfig {
            short_window: 0,
            ..Default::default()
        };
        let result = Orchestrator::new(
            Handle::current(),
            config,
            Arc::new(MemoryPersistence::new()),
            ProcessedData::default(),
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_run_state_helpers() {
        assert!(RunState::Running(3).is_running());
        assert_eq!(RunState::Completed(4).run_id(), Some(4));
        assert_eq!(RunState::Idle.run_id(), None);
    }
}
