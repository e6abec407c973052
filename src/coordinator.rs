//! The auto-save coordinator.
//!
//! [`AutoSave`] is a cheap handle; the state lives in a coordinator task that
//! owns the debounce, decay and undo timers, the baseline, and the single
//! in-flight save. Commands from the handle and timer expiries are handled
//! one at a time, so there is never more than one call into the [`Saver`]
//! outstanding and the value saved is always the latest one observed.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error, info, info_span, instrument, warn, Instrument};

use crate::config::AutoSaveConfig;
use crate::error::{AutoSaveError, SaveError};
use crate::model::{SaveState, SaveStatus, UndoSnapshot};
use crate::offline_queue::OfflineQueue;
use crate::saver::Saver;
use crate::store::{KeyValueStore, StorageKey};
use crate::{countdown_seconds, Document, UnixTimeMs, UNDO_TICK};

// Stand-in deadline for disabled timer branches, never polled.
const FAR_FUTURE: Duration = Duration::from_secs(60 * 60 * 24 * 365);

#[derive(Debug)]
enum Command<T> {
    Observe(T),
    SaveNow,
    Retry,
    Undo,
    SetOnline(bool),
    SetEnabled(bool),
}

/// What the in-flight save is writing.
enum SaveKind<T> {
    /// An observed change. `previous` becomes the undo snapshot on success.
    Change { previous: Option<T> },
    Flush,
    Undo,
}

struct InFlight<T> {
    kind: SaveKind<T>,
    value: T,
    handle: JoinHandle<Result<(), SaveError>>,
}

#[derive(Debug, Default)]
struct Timers {
    debounce: Option<Instant>,
    saved_decay: Option<Instant>,
    undo_tick: Option<Instant>,
}

/// Handle to a running auto-save coordinator bound to one storage key.
///
/// Must be created inside a tokio runtime. Dropping the handle stops the
/// coordinator and its timers; a save that is already running is left to
/// finish on its own.
pub struct AutoSave<T> {
    commands: mpsc::UnboundedSender<Command<T>>,
    state: watch::Receiver<SaveState>,
    task: JoinHandle<()>,
}

impl<T: Document> AutoSave<T> {
    #[instrument(skip_all, fields(storage_key = %config.storage_key))]
    pub fn spawn<S>(
        saver: Arc<S>,
        store: Arc<dyn KeyValueStore>,
        config: AutoSaveConfig,
    ) -> Result<Self, AutoSaveError>
    where
        S: Saver<T> + 'static,
    {
        config.validate()?;

        let key = StorageKey::offline_queue(&config.storage_key)?;
        let queue = OfflineQueue::new(store, key.clone(), config.max_queued);
        let pending_changes = queue.len().unwrap_or_else(|e| {
            warn!("failed to load offline queue: {e}");
            0
        });
        if pending_changes > 0 {
            info!(pending_changes, "found queued offline changes");
        }

        let (state_tx, state_rx) = watch::channel(SaveState {
            pending_changes,
            is_offline: !config.start_online,
            ..SaveState::default()
        });
        let (commands, rx) = mpsc::unbounded_channel();

        let saver: Arc<dyn Saver<T>> = saver;
        let coordinator = Coordinator {
            enabled: config.enabled,
            online: config.start_online,
            config,
            saver,
            queue,
            state: state_tx,
            current: None,
            baseline: None,
            undo: None,
            undo_countdown: 0,
            in_flight: None,
            deferred: false,
            status: SaveStatus::Idle,
            last_saved: None,
            error: None,
            pending_changes,
            timers: Timers::default(),
        };

        let span = info_span!("autosave", key = %key);
        let task = tokio::spawn(coordinator.run(rx).instrument(span));

        Ok(Self {
            commands,
            state: state_rx,
            task,
        })
    }

    /// Records the latest value. The first call only sets the baseline.
    pub fn observe(&self, value: T) {
        self.send(Command::Observe(value));
    }

    /// Skips the debounce and saves the current value.
    pub fn save_now(&self) {
        self.send(Command::SaveNow);
    }

    /// Flushes queued offline changes if there are any and the network is
    /// up, otherwise saves the current value immediately.
    pub fn retry(&self) {
        self.send(Command::Retry);
    }

    /// Reverts to the value before the last save while the undo window is open.
    pub fn undo(&self) {
        self.send(Command::Undo);
    }

    pub fn set_online(&self, online: bool) {
        self.send(Command::SetOnline(online));
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.send(Command::SetEnabled(enabled));
    }

    #[must_use]
    pub fn state(&self) -> SaveState {
        self.state.borrow().clone()
    }

    #[must_use]
    pub fn status(&self) -> SaveStatus {
        self.state.borrow().status
    }

    #[must_use]
    pub fn can_undo(&self) -> bool {
        self.state.borrow().can_undo
    }

    /// A receiver notified on every state change.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<SaveState> {
        self.state.clone()
    }

    /// Stops the coordinator and waits for it to exit.
    pub async fn dispose(self) {
        let Self { commands, task, .. } = self;
        drop(commands);
        if let Err(e) = task.await {
            warn!("auto-save coordinator ended abnormally: {e}");
        }
    }

    fn send(&self, command: Command<T>) {
        if self.commands.send(command).is_err() {
            warn!("auto-save coordinator is no longer running");
        }
    }
}

struct Coordinator<T> {
    config: AutoSaveConfig,
    saver: Arc<dyn Saver<T>>,
    queue: OfflineQueue<T>,
    state: watch::Sender<SaveState>,

    current: Option<T>,
    baseline: Option<T>,
    undo: Option<UndoSnapshot<T>>,
    undo_countdown: u64,
    in_flight: Option<InFlight<T>>,
    // a save or flush was requested while another was running
    deferred: bool,

    online: bool,
    enabled: bool,
    status: SaveStatus,
    last_saved: Option<UnixTimeMs>,
    error: Option<SaveError>,
    pending_changes: usize,
    timers: Timers,
}

fn deadline(at: Option<Instant>) -> Instant {
    at.unwrap_or_else(|| Instant::now() + FAR_FUTURE)
}

async fn join_in_flight<T>(slot: &mut Option<InFlight<T>>) -> Result<(), SaveError> {
    match slot {
        Some(flight) => match (&mut flight.handle).await {
            Ok(result) => result,
            Err(e) => Err(SaveError::internal(format!("save task failed: {e}"))),
        },
        None => std::future::pending().await,
    }
}

impl<T: Document> Coordinator<T> {
    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command<T>>) {
        loop {
            let debounce = deadline(self.timers.debounce);
            let saved_decay = deadline(self.timers.saved_decay);
            let undo_tick = deadline(self.timers.undo_tick);
            let undo_expiry = deadline(self.undo.as_ref().map(|s| s.expires_at));

            tokio::select! {
                biased;

                command = commands.recv() => match command {
                    Some(command) => self.handle(command),
                    None => break,
                },
                result = join_in_flight(&mut self.in_flight), if self.in_flight.is_some() => {
                    self.complete(result);
                }
                () = sleep_until(debounce), if self.timers.debounce.is_some() => {
                    self.timers.debounce = None;
                    self.attempt_save();
                }
                () = sleep_until(saved_decay), if self.timers.saved_decay.is_some() => {
                    self.timers.saved_decay = None;
                    if self.status == SaveStatus::Saved {
                        self.status = SaveStatus::Idle;
                    }
                }
                () = sleep_until(undo_tick), if self.timers.undo_tick.is_some() => {
                    self.tick_undo();
                }
                () = sleep_until(undo_expiry), if self.undo.is_some() => {
                    debug!("undo window expired");
                    self.clear_undo();
                }
            }

            self.publish();
        }
        debug!("auto-save coordinator stopped");
    }

    fn handle(&mut self, command: Command<T>) {
        match command {
            Command::Observe(value) => self.observe(value),
            Command::SaveNow => {
                self.timers.debounce = None;
                self.attempt_save();
            }
            Command::Retry => self.retry(),
            Command::Undo => self.start_undo(),
            Command::SetOnline(online) => self.set_online(online),
            Command::SetEnabled(enabled) => self.set_enabled(enabled),
        }
    }

    fn observe(&mut self, value: T) {
        if self.current.is_none() {
            debug!("baseline captured");
            self.baseline = Some(value.clone());
            self.current = Some(value);
            return;
        }

        self.current = Some(value);
        if self.enabled {
            self.timers.debounce = Some(Instant::now() + self.config.debounce());
        }
    }

    fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
        if !enabled {
            self.timers.debounce = None;
        } else if self.current.is_some() && self.current != self.baseline {
            self.timers.debounce = Some(Instant::now() + self.config.debounce());
        }
    }

    fn set_online(&mut self, online: bool) {
        if online == self.online {
            return;
        }
        self.online = online;

        if !online {
            info!("connection lost");
            self.status = SaveStatus::Offline;
            return;
        }

        info!(pending = self.pending_changes, "connection restored");
        if self.status == SaveStatus::Offline {
            self.status = SaveStatus::Idle;
        }
        self.flush();
    }

    fn retry(&mut self) {
        if self.pending_changes > 0 && self.online {
            self.flush();
        } else {
            self.timers.debounce = None;
            self.attempt_save();
        }
    }

    fn attempt_save(&mut self) {
        if self.in_flight.is_some() {
            debug!("save in flight, deferring");
            self.deferred = true;
            return;
        }

        let Some(value) = self.current.clone() else {
            return;
        };

        if self.baseline.as_ref() == Some(&value) {
            if self.status == SaveStatus::Error {
                self.status = SaveStatus::Idle;
                self.error = None;
            }
            return;
        }

        if !self.online {
            self.enqueue(value);
            return;
        }

        // a new save supersedes the open undo window
        self.clear_undo();
        let previous = self.baseline.clone();
        self.start(SaveKind::Change { previous }, value, SaveStatus::Saving);
    }

    /// Replays only the most recent queued change.
    fn flush(&mut self) {
        if self.in_flight.is_some() {
            self.deferred = true;
            return;
        }
        if !self.online {
            return;
        }

        let latest = match self.queue.latest() {
            Ok(Some(change)) => change,
            Ok(None) => {
                self.pending_changes = 0;
                return;
            }
            Err(e) => {
                warn!("failed to read offline queue: {e}");
                return;
            }
        };

        info!(change_id = %latest.id, pending = self.pending_changes, "syncing offline changes");
        self.start(SaveKind::Flush, latest.data, SaveStatus::Syncing);
    }

    fn start_undo(&mut self) {
        if self.in_flight.is_some() {
            debug!("undo ignored while a save is in flight");
            return;
        }
        let Some(snapshot) = self.undo.take() else {
            return;
        };

        self.clear_undo();
        self.timers.debounce = None;
        self.start(SaveKind::Undo, snapshot.value, SaveStatus::Saving);
    }

    fn start(&mut self, kind: SaveKind<T>, value: T, status: SaveStatus) {
        self.status = status;
        self.error = None;
        self.timers.saved_decay = None;

        let saver = Arc::clone(&self.saver);
        let payload = value.clone();
        let handle = tokio::spawn(async move { saver.save(payload).await });

        self.in_flight = Some(InFlight {
            kind,
            value,
            handle,
        });
    }

    fn complete(&mut self, result: Result<(), SaveError>) {
        let Some(InFlight { kind, value, .. }) = self.in_flight.take() else {
            return;
        };

        let succeeded = result.is_ok();
        match (kind, result) {
            (SaveKind::Change { previous }, Ok(())) => {
                info!("change saved");
                self.confirm(value);
                if let Some(previous) = previous {
                    self.arm_undo(previous);
                }
                if self.pending_changes > 0 {
                    self.clear_queue();
                }
            }
            (SaveKind::Change { .. }, Err(e)) => {
                if e.is_network() || !self.online {
                    warn!("save failed without connectivity, queueing: {e}");
                    // edits observed during the save supersede the failed value
                    let latest = self.current.clone().unwrap_or(value);
                    self.enqueue(latest);
                } else {
                    error!("save failed: {e}");
                    self.fail(e);
                }
            }
            (SaveKind::Flush, Ok(())) => {
                info!("offline changes synced");
                self.clear_queue();
                self.confirm(value);
            }
            (SaveKind::Flush, Err(e)) => {
                error!("offline sync failed: {e}");
                self.fail(e);
            }
            (SaveKind::Undo, Ok(())) => {
                info!("undo saved");
                self.current = Some(value.clone());
                self.confirm(value);
            }
            (SaveKind::Undo, Err(e)) => {
                error!("undo failed: {e}");
                self.fail(e);
            }
        }

        if std::mem::take(&mut self.deferred) && succeeded {
            self.resume();
        }
    }

    /// Picks up work that arrived while the last save was running.
    fn resume(&mut self) {
        if self.online && self.pending_changes > 0 {
            self.flush();
        } else if self.enabled && self.current != self.baseline {
            self.timers.debounce = Some(Instant::now() + self.config.debounce());
        }
    }

    fn confirm(&mut self, value: T) {
        self.baseline = Some(value);
        self.last_saved = Some(UnixTimeMs::now());
        self.status = SaveStatus::Saved;
        self.timers.saved_decay = Some(Instant::now() + self.config.saved_display());
    }

    fn fail(&mut self, error: SaveError) {
        self.status = SaveStatus::Error;
        self.error = Some(error);
    }

    fn enqueue(&mut self, value: T) {
        match self.queue.push(value, UnixTimeMs::now()) {
            Ok(len) => self.pending_changes = len,
            Err(e) => warn!("failed to queue offline change: {e}"),
        }
        self.status = SaveStatus::Offline;
    }

    fn clear_queue(&mut self) {
        match self.queue.clear() {
            Ok(()) => self.pending_changes = 0,
            Err(e) => warn!("failed to clear offline queue: {e}"),
        }
    }

    fn arm_undo(&mut self, previous: T) {
        let now = Instant::now();
        let window = self.config.undo_window();
        self.undo = Some(UndoSnapshot::new(previous, now + window));
        self.undo_countdown = countdown_seconds(window);
        self.timers.undo_tick = Some(now + UNDO_TICK);
    }

    fn tick_undo(&mut self) {
        if self.undo_countdown <= 1 {
            self.clear_undo();
            return;
        }
        self.undo_countdown -= 1;
        self.timers.undo_tick = self.timers.undo_tick.map(|at| at + UNDO_TICK);
    }

    fn clear_undo(&mut self) {
        self.undo = None;
        self.undo_countdown = 0;
        self.timers.undo_tick = None;
    }

    fn publish(&self) {
        let next = SaveState {
            status: self.status,
            last_saved: self.last_saved,
            error: self.error.clone(),
            can_undo: self.undo.is_some(),
            undo_countdown: self.undo_countdown,
            is_offline: !self.online,
            pending_changes: self.pending_changes,
        };
        self.state.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::store::MemoryStore;
    use crate::testing::RecordingSaver;
    use serde_json::{json, Value};
    use tokio::time::sleep;

    struct Harness {
        autosave: AutoSave<Value>,
        saver: Arc<RecordingSaver<Value>>,
        store: Arc<MemoryStore>,
    }

    impl Harness {
        fn new(latency: Duration, config: AutoSaveConfig) -> Self {
            Self::with_store(latency, config, Arc::new(MemoryStore::new()))
        }

        fn with_store(latency: Duration, config: AutoSaveConfig, store: Arc<MemoryStore>) -> Self {
            let saver = RecordingSaver::with_latency(latency);
            let autosave = AutoSave::spawn(saver.clone(), store.clone(), config).unwrap();
            Self {
                autosave,
                saver,
                store,
            }
        }

        fn queued(&self) -> Vec<Value> {
            let queue: OfflineQueue<Value> = OfflineQueue::new(
                self.store.clone(),
                StorageKey::offline_queue("default").unwrap(),
                5,
            );
            queue.load().unwrap().into_iter().map(|c| c.data).collect()
        }
    }

    // Lets the coordinator and any spawned save run without moving the clock.
    async fn settle() {
        for _ in 0..16 {
            tokio::task::yield_now().await;
        }
    }

    async fn advance(ms: u64) {
        sleep(Duration::from_millis(ms)).await;
        settle().await;
    }

    #[tokio::test(start_paused = true)]
    async fn first_observe_is_baseline() {
        let h = Harness::new(Duration::ZERO, AutoSaveConfig::default());
        h.autosave.observe(json!({ "a": 1 }));
        advance(5_000).await;

        assert_eq!(h.saver.call_count(), 0);
        assert_eq!(h.autosave.status(), SaveStatus::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn rapid_changes_coalesce_into_one_save() {
        let h = Harness::new(Duration::ZERO, AutoSaveConfig::default());
        h.autosave.observe(json!({ "a": 0 }));

        for i in 1..=5 {
            h.autosave.observe(json!({ "a": i }));
            advance(100).await;
        }
        // last change at t=400, fires at t=1200
        advance(699).await;
        assert_eq!(h.saver.call_count(), 0);

        advance(1).await;
        assert_eq!(h.saver.calls(), vec![json!({ "a": 5 })]);

        advance(5_000).await;
        assert_eq!(h.saver.call_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn unchanged_value_never_leaves_idle() {
        let h = Harness::new(Duration::ZERO, AutoSaveConfig::default());
        let rx = h.autosave.subscribe();

        h.autosave.observe(json!({ "a": 1 }));
        h.autosave.observe(json!({ "a": 1 }));
        advance(2_000).await;
        h.autosave.save_now();
        settle().await;

        assert_eq!(h.saver.call_count(), 0);
        assert_eq!(h.autosave.status(), SaveStatus::Idle);
        assert!(!rx.has_changed().unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn offline_change_is_queued_not_saved() {
        let h = Harness::new(Duration::ZERO, AutoSaveConfig::default());
        h.autosave.set_online(false);
        h.autosave.observe(json!({ "a": 1 }));
        h.autosave.observe(json!({ "a": 2 }));
        advance(800).await;

        let state = h.autosave.state();
        assert_eq!(state.status, SaveStatus::Offline);
        assert!(state.is_offline);
        assert_eq!(state.pending_changes, 1);
        assert_eq!(h.queued(), vec![json!({ "a": 2 })]);
        assert_eq!(h.saver.call_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn queue_keeps_five_most_recent() {
        let h = Harness::new(Duration::ZERO, AutoSaveConfig::default());
        h.autosave.set_online(false);
        h.autosave.observe(json!(0));
        for i in 1..=7 {
            h.autosave.observe(json!(i));
            h.autosave.save_now();
        }
        settle().await;

        assert_eq!(h.autosave.state().pending_changes, 5);
        assert_eq!(h.queued(), (3..=7).map(|i| json!(i)).collect::<Vec<_>>());
    }

    #[tokio::test(start_paused = true)]
    async fn reconnect_flushes_only_latest_entry() {
        let h = Harness::new(Duration::from_millis(50), AutoSaveConfig::default());
        h.autosave.set_online(false);
        h.autosave.observe(json!(0));
        for i in 1..=3 {
            h.autosave.observe(json!(i));
            h.autosave.save_now();
        }
        settle().await;
        assert_eq!(h.autosave.state().pending_changes, 3);

        h.autosave.set_online(true);
        settle().await;
        assert_eq!(h.saver.calls(), vec![json!(3)]);
        assert_eq!(h.autosave.status(), SaveStatus::Syncing);

        advance(50).await;
        let state = h.autosave.state();
        assert_eq!(state.status, SaveStatus::Saved);
        assert_eq!(state.pending_changes, 0);
        assert!(!state.can_undo);
        assert!(h.queued().is_empty());
        assert_eq!(h.saver.call_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn undo_window_counts_down_and_expires() {
        let h = Harness::new(Duration::ZERO, AutoSaveConfig::default());
        h.autosave.observe(json!("before"));
        h.autosave.observe(json!("after"));
        h.autosave.save_now();
        settle().await;

        let state = h.autosave.state();
        assert!(state.can_undo);
        assert_eq!(state.undo_countdown, 10);

        advance(3_000).await;
        assert_eq!(h.autosave.state().undo_countdown, 7);

        advance(7_000).await;
        let state = h.autosave.state();
        assert!(!state.can_undo);
        assert_eq!(state.undo_countdown, 0);

        h.autosave.undo();
        settle().await;
        assert_eq!(h.saver.call_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn save_undo_scenario() {
        let h = Harness::new(Duration::from_millis(50), AutoSaveConfig::default());
        h.autosave.observe(json!({ "a": 1 }));
        h.autosave.observe(json!({ "a": 2 }));
        settle().await;

        advance(799).await;
        assert_eq!(h.saver.call_count(), 0);

        advance(1).await; // t=800
        assert_eq!(h.saver.calls(), vec![json!({ "a": 2 })]);
        assert_eq!(h.autosave.status(), SaveStatus::Saving);

        advance(50).await; // t=850
        let state = h.autosave.state();
        assert_eq!(state.status, SaveStatus::Saved);
        assert!(state.can_undo);
        assert!(state.last_saved.is_some());

        advance(2_000).await; // t=2850
        assert_eq!(h.autosave.status(), SaveStatus::Idle);
        assert!(h.autosave.can_undo());

        advance(150).await; // t=3000
        h.autosave.undo();
        settle().await;
        assert_eq!(h.saver.last_call(), Some(json!({ "a": 1 })));
        assert!(!h.autosave.can_undo());

        advance(50).await;
        assert_eq!(h.autosave.status(), SaveStatus::Saved);
        assert!(!h.autosave.can_undo());

        // {a:1} is the baseline again, so re-observing it is a no-op
        h.autosave.observe(json!({ "a": 1 }));
        advance(1_000).await;
        assert_eq!(h.saver.call_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn save_now_during_save_does_not_overlap() {
        let h = Harness::new(Duration::from_millis(500), AutoSaveConfig::default());
        h.autosave.observe(json!(1));
        h.autosave.observe(json!(2));
        h.autosave.save_now();
        settle().await;
        assert_eq!(h.saver.call_count(), 1);

        h.autosave.save_now();
        h.autosave.observe(json!(3));
        h.autosave.save_now();
        advance(100).await;
        assert_eq!(h.saver.call_count(), 1);

        // first save completes at t=500, the deferred change follows a debounce later
        advance(400).await;
        assert_eq!(h.saver.call_count(), 1);
        assert_eq!(h.autosave.status(), SaveStatus::Saved);

        advance(800).await;
        assert_eq!(h.saver.calls(), vec![json!(2), json!(3)]);
    }

    #[tokio::test(start_paused = true)]
    async fn remote_error_is_retained_until_retry() {
        let h = Harness::new(Duration::ZERO, AutoSaveConfig::default());
        h.saver.fail_next(SaveError::new(ErrorKind::Validation, "title is required"));

        h.autosave.observe(json!(1));
        h.autosave.observe(json!(2));
        h.autosave.save_now();
        settle().await;

        let state = h.autosave.state();
        assert_eq!(state.status, SaveStatus::Error);
        assert_eq!(state.error.as_ref().unwrap().message, "title is required");
        assert_eq!(state.pending_changes, 0);
        assert!(!state.can_undo);
        assert!(state.offers_retry());

        // no automatic retry
        advance(10_000).await;
        assert_eq!(h.saver.call_count(), 1);

        h.autosave.retry();
        settle().await;
        assert_eq!(h.saver.calls(), vec![json!(2), json!(2)]);
        let state = h.autosave.state();
        assert_eq!(state.status, SaveStatus::Saved);
        assert!(state.error.is_none());
        assert!(state.can_undo);
    }

    #[tokio::test(start_paused = true)]
    async fn network_failure_falls_back_to_queue() {
        let h = Harness::new(Duration::ZERO, AutoSaveConfig::default());
        h.saver.fail_next(SaveError::network("connection reset"));

        h.autosave.observe(json!(1));
        h.autosave.observe(json!(2));
        h.autosave.save_now();
        settle().await;

        let state = h.autosave.state();
        assert_eq!(state.status, SaveStatus::Offline);
        assert!(state.error.is_none());
        assert_eq!(state.pending_changes, 1);
        assert!(!state.can_undo);

        h.autosave.retry();
        settle().await;
        assert_eq!(h.saver.calls(), vec![json!(2), json!(2)]);
        let state = h.autosave.state();
        assert_eq!(state.status, SaveStatus::Saved);
        assert_eq!(state.pending_changes, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn edit_during_failed_save_is_queued() {
        let h = Harness::new(Duration::from_millis(1_000), AutoSaveConfig::default());
        h.saver.fail_next(SaveError::network("connection reset"));

        h.autosave.observe(json!(1));
        h.autosave.observe(json!(2));
        h.autosave.save_now();
        settle().await;
        assert_eq!(h.saver.calls(), vec![json!(2)]);

        advance(100).await;
        h.autosave.observe(json!(3));

        // save of 2 fails at t=1000; the debounce for 3 fired while it ran
        advance(900).await;
        let state = h.autosave.state();
        assert_eq!(state.status, SaveStatus::Offline);
        assert_eq!(state.pending_changes, 1);
        assert_eq!(h.queued(), vec![json!(3)]);

        h.autosave.retry();
        advance(1_000).await;
        assert_eq!(h.saver.last_call(), Some(json!(3)));
        let state = h.autosave.state();
        assert_eq!(state.status, SaveStatus::Saved);
        assert_eq!(state.pending_changes, 0);

        // 3 is now the baseline, nothing further to save
        advance(5_000).await;
        assert_eq!(h.saver.call_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn starts_offline_when_configured() {
        let h = Harness::new(Duration::ZERO, AutoSaveConfig::default().with_online(false));
        assert!(h.autosave.state().is_offline);

        h.autosave.observe(json!(1));
        h.autosave.observe(json!(2));
        h.autosave.save_now();
        settle().await;

        assert_eq!(h.saver.call_count(), 0);
        assert_eq!(h.queued(), vec![json!(2)]);

        h.autosave.set_online(true);
        settle().await;
        assert_eq!(h.saver.calls(), vec![json!(2)]);
        assert!(!h.autosave.state().is_offline);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_flush_keeps_queue() {
        let h = Harness::new(Duration::ZERO, AutoSaveConfig::default());
        h.autosave.set_online(false);
        h.autosave.observe(json!(1));
        h.autosave.observe(json!(2));
        h.autosave.save_now();
        settle().await;

        h.saver.fail_next(SaveError::internal("server fault"));
        h.autosave.set_online(true);
        settle().await;

        let state = h.autosave.state();
        assert_eq!(state.status, SaveStatus::Error);
        assert_eq!(state.pending_changes, 1);
        assert_eq!(h.queued(), vec![json!(2)]);

        h.autosave.retry();
        settle().await;
        assert_eq!(h.saver.call_count(), 2);
        assert_eq!(h.autosave.state().pending_changes, 0);
        assert!(h.queued().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn saved_decay_does_not_override_newer_status() {
        let h = Harness::new(Duration::ZERO, AutoSaveConfig::default());
        h.autosave.observe(json!(1));
        h.autosave.observe(json!(2));
        h.autosave.save_now();
        settle().await;
        assert_eq!(h.autosave.status(), SaveStatus::Saved);

        advance(1_000).await;
        h.autosave.set_online(false);
        settle().await;

        advance(1_500).await;
        assert_eq!(h.autosave.status(), SaveStatus::Offline);
    }

    #[tokio::test(start_paused = true)]
    async fn new_save_replaces_undo_snapshot() {
        let h = Harness::new(Duration::from_millis(10), AutoSaveConfig::default());
        h.autosave.observe(json!("v1"));
        h.autosave.observe(json!("v2"));
        h.autosave.save_now();
        advance(10).await;
        assert!(h.autosave.can_undo());

        h.autosave.observe(json!("v3"));
        h.autosave.save_now();
        settle().await;
        assert!(!h.autosave.can_undo());

        advance(10).await;
        assert!(h.autosave.can_undo());

        h.autosave.undo();
        advance(10).await;
        assert_eq!(h.saver.calls(), vec![json!("v2"), json!("v3"), json!("v2")]);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_undo_discards_snapshot() {
        let h = Harness::new(Duration::ZERO, AutoSaveConfig::default());
        h.autosave.observe(json!(1));
        h.autosave.observe(json!(2));
        h.autosave.save_now();
        settle().await;

        h.saver.fail_next(SaveError::internal("boom"));
        h.autosave.undo();
        settle().await;
        let state = h.autosave.state();
        assert_eq!(state.status, SaveStatus::Error);
        assert!(!state.can_undo);

        h.autosave.undo();
        settle().await;
        assert_eq!(h.saver.call_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn disabled_coordinator_only_saves_on_demand() {
        let config = AutoSaveConfig::default().with_enabled(false);
        let h = Harness::new(Duration::ZERO, config);
        h.autosave.observe(json!(1));
        h.autosave.observe(json!(2));
        advance(5_000).await;
        assert_eq!(h.saver.call_count(), 0);

        h.autosave.save_now();
        settle().await;
        assert_eq!(h.saver.calls(), vec![json!(2)]);
    }

    #[tokio::test(start_paused = true)]
    async fn re_enabling_schedules_pending_change() {
        let config = AutoSaveConfig::default().with_enabled(false);
        let h = Harness::new(Duration::ZERO, config);
        h.autosave.observe(json!(1));
        h.autosave.observe(json!(2));
        settle().await;

        h.autosave.set_enabled(true);
        advance(800).await;
        assert_eq!(h.saver.calls(), vec![json!(2)]);
    }

    #[tokio::test(start_paused = true)]
    async fn queue_survives_dispose() {
        let store = Arc::new(MemoryStore::new());
        let h = Harness::with_store(Duration::ZERO, AutoSaveConfig::default(), store.clone());
        h.autosave.set_online(false);
        h.autosave.observe(json!(1));
        h.autosave.observe(json!(2));
        h.autosave.save_now();
        settle().await;
        h.autosave.dispose().await;

        let h = Harness::with_store(Duration::ZERO, AutoSaveConfig::default(), store);
        assert_eq!(h.autosave.state().pending_changes, 1);

        h.autosave.retry();
        settle().await;
        assert_eq!(h.saver.calls(), vec![json!(2)]);
        assert_eq!(h.autosave.state().pending_changes, 0);
    }

    #[tokio::test]
    async fn invalid_config_is_rejected() {
        let saver = RecordingSaver::<Value>::new();
        let config = AutoSaveConfig {
            debounce_ms: 0,
            ..AutoSaveConfig::default()
        };
        let result = AutoSave::<Value>::spawn(saver, Arc::new(MemoryStore::new()), config);
        assert!(matches!(result, Err(AutoSaveError::Config(_))));
    }
}
