//! Live watch sessions.
//!
//! A session is two tokio tasks sharing one view state:
//!
//! - the refresh timer, which rebuilds the snapshot on every tick;
//! - the input listener, which applies [`SessionInput`]s and runs actions.
//!
//! Both select on a `watch` channel of [`SessionState`], so cancelling
//! interrupts an in-flight refresh instead of waiting for it. Frames are
//! built completely and then swapped into a `watch` channel while the view
//! lock is held, so consumers never see a partial frame or a frame older
//! than one they already saw.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

use crate::domain::{
    ConnectionRecord, RecordFilter, RecordIdentity, SerializedRecord, Snapshot, SortKey, SortOrder,
};
use crate::engine::PortViewEngine;
use crate::error::{Error, Result};
use crate::ports::{ContainerAction, ContainerOutcome, ContainerRuntime, LogOptions, Platform, ProcessKillerPort};

/// Inputs buffered between the consumer and the listener task.
const INPUT_BUFFER: usize = 32;

/// Lifecycle of a watch session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SessionState {
    Initializing,
    Active,
    PausedForAction,
    /// Terminal.
    Cancelled,
}

impl SessionState {
    pub fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (Initializing, Active)
                | (Initializing, Cancelled)
                | (Active, PausedForAction)
                | (Active, Cancelled)
                | (PausedForAction, Active)
                | (PausedForAction, Cancelled)
        )
    }

    pub fn name(self) -> &'static str {
        match self {
            SessionState::Initializing => "initializing",
            SessionState::Active => "active",
            SessionState::PausedForAction => "paused-for-action",
            SessionState::Cancelled => "cancelled",
        }
    }
}

/// User intent delivered to a running session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionInput {
    Quit,
    SortNext,
    SortPrev,
    ToggleDirection,
    /// Zero-based column index.
    SortColumn(usize),
    SelectNext,
    SelectPrev,
    SelectFirst,
    SelectLast,
    /// Interactive search text; empty clears it.
    SetFilter(String),
    Refresh,
    /// Terminate the selected row's process. The consumer confirms first.
    Kill { force: bool },
    /// Act on the first container tagged on the selected row.
    Container(ContainerAction),
}

/// Parameters of a watch session.
#[derive(Debug, Clone)]
pub struct WatchConfig {
    /// Port number or name fragment applied to every frame.
    pub query: Option<String>,
    pub docker: bool,
    pub interval: Duration,
    pub include_non_listening: bool,
    /// Consumer renders frames as JSON arrays.
    pub json: bool,
    /// Lines kept by a `FetchLogs` preview.
    pub log_tail: usize,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            query: None,
            docker: false,
            interval: Duration::from_secs(1),
            include_non_listening: false,
            json: false,
            log_tail: 20,
        }
    }
}

/// One published view of a session.
#[derive(Debug, Clone)]
pub struct WatchFrame {
    /// Strictly increasing per session.
    pub sequence: u64,
    pub state: SessionState,
    /// Filtered and sorted records.
    pub view: Snapshot,
    pub order: SortOrder,
    pub filter: RecordFilter,
    /// Index into `view.records()`.
    pub selected: Option<usize>,
    pub selection: Option<RecordIdentity>,
    /// Outcome of the last action or refresh error.
    pub status: Option<String>,
    /// Tail of the last `FetchLogs` action.
    pub logs: Vec<String>,
    pub json: bool,
}

impl WatchFrame {
    pub fn selected_record(&self) -> Option<&ConnectionRecord> {
        self.selected.and_then(|i| self.view.records().get(i))
    }

    pub fn to_serialized(&self) -> Vec<SerializedRecord> {
        self.view.to_serialized()
    }
}

struct ViewState {
    base: Option<Snapshot>,
    filter: RecordFilter,
    order: SortOrder,
    selection: Option<RecordIdentity>,
    status: Option<String>,
    logs: Vec<String>,
    frames: u64,
}

struct Session<P: Platform, C: ContainerRuntime, K: ProcessKillerPort> {
    engine: Arc<PortViewEngine<P, C, K>>,
    config: WatchConfig,
    view: Mutex<ViewState>,
    frames: watch::Sender<Option<Arc<WatchFrame>>>,
    state: Arc<watch::Sender<SessionState>>,
    refreshes: AtomicU64,
}

/// Consumer side of a running session.
///
/// Dropping the handle cancels the session.
pub struct WatchHandle {
    frames: watch::Receiver<Option<Arc<WatchFrame>>>,
    state_rx: watch::Receiver<SessionState>,
    state: Arc<watch::Sender<SessionState>>,
    inputs: mpsc::Sender<SessionInput>,
    tasks: Vec<JoinHandle<()>>,
}

impl WatchHandle {
    /// The next frame newer than the last one returned, or `None` once the
    /// session is cancelled. Frames published faster than they are read
    /// are coalesced; the newest always wins.
    pub async fn next_frame(&mut self) -> Option<Arc<WatchFrame>> {
        loop {
            if *self.state_rx.borrow_and_update() == SessionState::Cancelled {
                return None;
            }
            tokio::select! {
                biased;
                changed = self.state_rx.changed() => {
                    if changed.is_err() {
                        return None;
                    }
                }
                changed = self.frames.changed() => {
                    if changed.is_err() {
                        return None;
                    }
                    if let Some(frame) = self.frames.borrow_and_update().clone() {
                        return Some(frame);
                    }
                }
            }
        }
    }

    /// Most recent frame, without waiting.
    pub fn latest(&self) -> Option<Arc<WatchFrame>> {
        self.frames.borrow().clone()
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// A sender for a separate input thread or task.
    pub fn inputs(&self) -> mpsc::Sender<SessionInput> {
        self.inputs.clone()
    }

    /// Deliver an input. `Quit` cancels at once instead of queueing
    /// behind an action that may still be running.
    pub async fn send(&self, input: SessionInput) -> Result<()> {
        if input == SessionInput::Quit {
            self.cancel();
            return Ok(());
        }
        self.inputs.send(input).await.map_err(|_| Error::Cancelled)
    }

    /// Stop both tasks. Idempotent.
    pub fn cancel(&self) {
        cancel(&self.state);
    }

    /// Wait until both tasks have exited.
    pub async fn join(mut self) {
        for task in std::mem::take(&mut self.tasks) {
            if let Err(e) = task.await {
                warn!(error = %e, "watch task failed");
            }
        }
    }
}

impl Drop for WatchHandle {
    fn drop(&mut self) {
        cancel(&self.state);
    }
}

fn cancel(state: &watch::Sender<SessionState>) {
    state.send_if_modified(|current| {
        if current.can_transition_to(SessionState::Cancelled) {
            *current = SessionState::Cancelled;
            true
        } else {
            false
        }
    });
}

/// Resolves once the session is cancelled.
async fn cancelled(state: &mut watch::Receiver<SessionState>) {
    loop {
        if *state.borrow_and_update() == SessionState::Cancelled {
            return;
        }
        if state.changed().await.is_err() {
            return;
        }
    }
}

pub(crate) fn start<P, C, K>(engine: Arc<PortViewEngine<P, C, K>>, config: WatchConfig) -> WatchHandle
where
    P: Platform,
    C: ContainerRuntime,
    K: ProcessKillerPort,
{
    let (frames_tx, frames_rx) = watch::channel(None);
    let (state_tx, state_rx) = watch::channel(SessionState::Initializing);
    let state_tx = Arc::new(state_tx);
    let (inputs_tx, inputs_rx) = mpsc::channel(INPUT_BUFFER);

    let filter = RecordFilter::new().with_target(config.query.clone());
    let session = Arc::new(Session {
        engine,
        config,
        view: Mutex::new(ViewState {
            base: None,
            filter,
            order: SortOrder::default(),
            selection: None,
            status: None,
            logs: Vec::new(),
            frames: 0,
        }),
        frames: frames_tx,
        state: Arc::clone(&state_tx),
        refreshes: AtomicU64::new(0),
    });

    let timer = tokio::spawn(run_timer(Arc::clone(&session), state_tx.subscribe()));
    let listener = tokio::spawn(run_inputs(Arc::clone(&session), inputs_rx, state_tx.subscribe()));

    if let Err(e) = session.transition(SessionState::Active) {
        debug!(error = %e, "session cancelled before start");
    }

    WatchHandle {
        frames: frames_rx,
        state_rx,
        state: state_tx,
        inputs: inputs_tx,
        tasks: vec![timer, listener],
    }
}

async fn run_timer<P, C, K>(session: Arc<Session<P, C, K>>, mut state: watch::Receiver<SessionState>)
where
    P: Platform,
    C: ContainerRuntime,
    K: ProcessKillerPort,
{
    let mut interval = tokio::time::interval(session.config.interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = interval.tick() => {}
            changed = state.changed() => {
                if changed.is_err() {
                    return;
                }
                // Resuming after an action refreshes right away
                if *state.borrow_and_update() != SessionState::Active {
                    if *state.borrow() == SessionState::Cancelled {
                        return;
                    }
                    continue;
                }
            }
        }

        match *state.borrow_and_update() {
            SessionState::Cancelled => return,
            SessionState::Active => {}
            // Frozen while an action runs
            SessionState::Initializing | SessionState::PausedForAction => continue,
        }

        tokio::select! {
            _ = session.refresh() => {}
            _ = cancelled(&mut state) => return,
        }
    }
}

async fn run_inputs<P, C, K>(
    session: Arc<Session<P, C, K>>,
    mut inputs: mpsc::Receiver<SessionInput>,
    mut state: watch::Receiver<SessionState>,
) where
    P: Platform,
    C: ContainerRuntime,
    K: ProcessKillerPort,
{
    loop {
        let input = tokio::select! {
            input = inputs.recv() => input,
            _ = cancelled(&mut state) => return,
        };
        let Some(input) = input else {
            return;
        };

        let done = tokio::select! {
            done = session.apply(input) => done,
            _ = cancelled(&mut state) => return,
        };
        if done {
            cancel(&session.state);
            return;
        }
    }
}

impl<P, C, K> Session<P, C, K>
where
    P: Platform,
    C: ContainerRuntime,
    K: ProcessKillerPort,
{
    fn transition(&self, next: SessionState) -> Result<()> {
        let mut refused = None;
        self.state.send_if_modified(|current| {
            if current.can_transition_to(next) {
                *current = next;
                true
            } else {
                refused = Some(Error::InvalidTransition {
                    from: current.name(),
                    to: next.name(),
                });
                false
            }
        });
        refused.map_or(Ok(()), Err)
    }

    fn current_state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Rebuild the snapshot and publish it.
    async fn refresh(&self) {
        let n = self.refreshes.fetch_add(1, Ordering::SeqCst) + 1;
        let result = self
            .engine
            .scan(self.config.include_non_listening, self.config.docker)
            .await;

        let mut view = self.view.lock();
        match result {
            Ok(snapshot) => {
                // A slower concurrent refresh must not replace a newer one
                if view
                    .base
                    .as_ref()
                    .is_some_and(|b| b.sequence() >= snapshot.sequence())
                {
                    debug!(refresh = n, "discarding stale snapshot");
                    return;
                }
                if view.base.is_none() && view.selection.is_none() {
                    let first = snapshot.view(&view.filter, view.order).records().first().map(|r| r.identity());
                    view.selection = first;
                }
                if view
                    .status
                    .as_deref()
                    .is_some_and(|s| s.starts_with("Refresh failed"))
                {
                    debug!(refresh = n, "refresh recovered");
                    view.status = None;
                }
                view.base = Some(snapshot);
            }
            Err(e) => {
                warn!(error = %e, "refresh failed, keeping previous snapshot");
                view.status = Some(format!("Refresh failed: {}", e));
            }
        }
        self.publish(&mut view);
    }

    /// Build a frame from `view` and swap it in. Caller holds the lock.
    fn publish(&self, view: &mut ViewState) {
        let visible = view
            .base
            .as_ref()
            .map(|b| b.view(&view.filter, view.order))
            .unwrap_or_default();

        let selected = view
            .selection
            .and_then(|id| visible.records().iter().position(|r| r.identity() == id));
        if selected.is_none() {
            view.selection = None;
        }

        view.frames += 1;
        let frame = WatchFrame {
            sequence: view.frames,
            state: self.current_state(),
            view: visible,
            order: view.order,
            filter: view.filter.clone(),
            selected,
            selection: view.selection,
            status: view.status.clone(),
            logs: view.logs.clone(),
            json: self.config.json,
        };
        self.frames.send_replace(Some(Arc::new(frame)));
    }

    fn update(&self, change: impl FnOnce(&mut ViewState)) {
        let mut view = self.view.lock();
        change(&mut view);
        self.publish(&mut view);
    }

    fn move_selection(&self, step: impl FnOnce(Option<usize>, usize) -> Option<usize>) {
        self.update(|view| {
            let visible = view
                .base
                .as_ref()
                .map(|b| b.view(&view.filter, view.order))
                .unwrap_or_default();
            let len = visible.len();
            if len == 0 {
                view.selection = None;
                return;
            }
            let current = view
                .selection
                .and_then(|id| visible.records().iter().position(|r| r.identity() == id));
            view.selection = step(current, len)
                .map(|i| i.min(len - 1))
                .and_then(|i| visible.records().get(i))
                .map(|r| r.identity());
        });
    }

    fn selected_record(&self) -> Option<ConnectionRecord> {
        let view = self.view.lock();
        let id = view.selection?;
        view.base
            .as_ref()?
            .records()
            .iter()
            .find(|r| r.identity() == id)
            .cloned()
    }

    /// Apply one input. Returns `true` when the session should end.
    async fn apply(&self, input: SessionInput) -> bool {
        match input {
            SessionInput::Quit => return true,
            SessionInput::SortNext => self.update(|v| v.order.key = v.order.key.next()),
            SessionInput::SortPrev => self.update(|v| v.order.key = v.order.key.prev()),
            SessionInput::ToggleDirection => self.update(|v| v.order = v.order.reversed()),
            SessionInput::SortColumn(index) => {
                if let Some(key) = SortKey::from_index(index) {
                    self.update(|v| v.order.key = key);
                }
            }
            SessionInput::SelectNext => self.move_selection(|cur, _| Some(cur.map_or(0, |i| i + 1))),
            SessionInput::SelectPrev => {
                self.move_selection(|cur, _| Some(cur.map_or(0, |i| i.saturating_sub(1))))
            }
            SessionInput::SelectFirst => self.move_selection(|_, _| Some(0)),
            SessionInput::SelectLast => self.move_selection(|_, len| Some(len - 1)),
            SessionInput::SetFilter(text) => self.update(|v| v.filter.search_text = text),
            SessionInput::Refresh => self.refresh().await,
            SessionInput::Kill { force } => self.kill_selected(force).await,
            SessionInput::Container(action) => self.container_on_selected(action).await,
        }
        false
    }

    fn set_status(&self, status: impl Into<String>) {
        let status = status.into();
        self.update(|v| v.status = Some(status));
    }

    /// Pause the timer, run `action`, resume and refresh.
    async fn paused<F, T>(&self, announce: String, action: F) -> Option<T>
    where
        F: std::future::Future<Output = T>,
    {
        if let Err(e) = self.transition(SessionState::PausedForAction) {
            debug!(error = %e, "action skipped");
            return None;
        }
        self.update(|v| {
            v.status = Some(announce);
            v.logs.clear();
        });

        let result = action.await;

        if self.transition(SessionState::Active).is_err() {
            return None;
        }
        Some(result)
    }

    async fn kill_selected(&self, force: bool) {
        let Some(pid) = self.selected_record().and_then(|r| r.pid()) else {
            self.set_status("Selected row has no process");
            return;
        };

        let engine = Arc::clone(&self.engine);
        let outcome = self
            .paused(format!("Terminating pid {}...", pid), engine.kill(pid, force))
            .await;
        let Some(outcome) = outcome else {
            return;
        };

        let message = match outcome {
            Ok(t) if t.escalated => format!("Terminated pid {} ({}, escalated)", pid, t.signal),
            Ok(t) => format!("Terminated pid {} ({})", pid, t.signal),
            Err(e) => e.to_string(),
        };
        self.update(|v| v.status = Some(message));
        self.refresh().await;
    }

    async fn container_on_selected(&self, action: ContainerAction) {
        let Some(tag) = self.selected_record().and_then(|r| r.containers.first().cloned()) else {
            self.set_status("Selected row has no container");
            return;
        };

        // Previews are bounded; following is left to the CLI's logs command
        let action = match action {
            ContainerAction::FetchLogs(options) => ContainerAction::FetchLogs(LogOptions {
                tail: Some(options.tail.unwrap_or(self.config.log_tail).min(self.config.log_tail)),
                follow: false,
            }),
            other => other,
        };

        let engine = Arc::clone(&self.engine);
        let log_tail = self.config.log_tail;
        let id = tag.id.clone();
        let work = async move {
            let outcome: Result<(String, Vec<String>)> = match engine.container_action(&id, action).await {
                Ok(ContainerOutcome::Completed { message }) => Ok((message, Vec::new())),
                Ok(ContainerOutcome::Logs(stream)) => stream
                    .collect_tail(log_tail)
                    .await
                    .map(|lines| (format!("{} log lines from {}", lines.len(), id), lines)),
                Err(e) => Err(e),
            };
            outcome
        };
        let announce = format!("{} {}...", action.verb(), tag.name);
        let Some(outcome) = self.paused(announce, work).await else {
            return;
        };

        self.update(|v| match outcome {
            Ok((message, lines)) => {
                v.status = Some(message);
                v.logs = lines;
            }
            Err(e) => v.status = Some(e.to_string()),
        });
        self.refresh().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::CorrelationKey;
    use crate::testing::{tcp_listen, two_listeners, web_container, FakeContainers, FakeKiller, FakePlatform};
    use std::time::Instant;
    use tokio::time::timeout;

    type TestEngine = PortViewEngine<FakePlatform, FakeContainers, FakeKiller>;

    fn engine_with(platform: FakePlatform, containers: FakeContainers, killer: FakeKiller) -> Arc<TestEngine> {
        Arc::new(PortViewEngine::new(platform, containers, killer))
    }

    fn config(interval_ms: u64) -> WatchConfig {
        WatchConfig {
            interval: Duration::from_millis(interval_ms),
            ..WatchConfig::default()
        }
    }

    /// Wait for the first frame satisfying `pred`.
    async fn frame_where(
        handle: &mut WatchHandle,
        pred: impl Fn(&WatchFrame) -> bool,
    ) -> Arc<WatchFrame> {
        timeout(Duration::from_secs(5), async {
            loop {
                let frame = handle.next_frame().await.expect("session ended early");
                if pred(&frame) {
                    return frame;
                }
            }
        })
        .await
        .expect("timed out waiting for frame")
    }

    #[test]
    fn test_state_transitions() {
        use SessionState::*;
        assert!(Initializing.can_transition_to(Active));
        assert!(Active.can_transition_to(PausedForAction));
        assert!(PausedForAction.can_transition_to(Active));
        assert!(PausedForAction.can_transition_to(Cancelled));
        assert!(!Initializing.can_transition_to(PausedForAction));
        assert!(!Active.can_transition_to(Active));
        for next in [Initializing, Active, PausedForAction, Cancelled] {
            assert!(!Cancelled.can_transition_to(next));
        }
    }

    #[tokio::test]
    async fn test_first_frame_selects_first_record() {
        let engine = engine_with(two_listeners(), FakeContainers::new(vec![]), FakeKiller::default());
        let mut handle = engine.watch(config(20));

        let frame = frame_where(&mut handle, |f| !f.view.is_empty()).await;
        assert_eq!(frame.state, SessionState::Active);
        assert_eq!(frame.selected, Some(0));
        assert_eq!(frame.selected_record().unwrap().port(), 3000);
    }

    #[tokio::test]
    async fn test_cancel_is_prompt_during_slow_refresh() {
        let platform = two_listeners();
        platform.set_delay(Duration::from_secs(30));
        let engine = engine_with(platform.clone(), FakeContainers::new(vec![]), FakeKiller::default());
        let mut handle = engine.watch(config(60_000));

        // Let the first refresh start and block inside enumeration
        timeout(Duration::from_secs(5), async {
            while platform.scan_count() == 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        let started = Instant::now();
        handle.cancel();
        assert!(handle.next_frame().await.is_none());
        timeout(Duration::from_secs(1), handle.join()).await.unwrap();
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_quit_input_cancels() {
        let engine = engine_with(two_listeners(), FakeContainers::new(vec![]), FakeKiller::default());
        let mut handle = engine.watch(config(20));
        frame_where(&mut handle, |f| !f.view.is_empty()).await;

        handle.send(SessionInput::Quit).await.unwrap();
        assert!(timeout(Duration::from_secs(1), handle.next_frame()).await.unwrap().is_none());
        assert_eq!(handle.state(), SessionState::Cancelled);
    }

    #[tokio::test]
    async fn test_frames_never_go_backwards() {
        let engine = engine_with(two_listeners(), FakeContainers::new(vec![]), FakeKiller::default());
        let mut handle = engine.watch(config(5));

        let mut last_frame = 0;
        let mut last_snapshot = 0;
        for _ in 0..20 {
            handle.send(SessionInput::Refresh).await.unwrap();
            let frame = handle.next_frame().await.unwrap();
            assert!(frame.sequence > last_frame);
            assert!(frame.view.sequence() >= last_snapshot);
            last_frame = frame.sequence;
            last_snapshot = frame.view.sequence();
        }
    }

    #[tokio::test]
    async fn test_selection_follows_identity_across_refreshes() {
        let platform = two_listeners();
        let engine = engine_with(platform.clone(), FakeContainers::new(vec![]), FakeKiller::default());
        let mut handle = engine.watch(config(10));
        frame_where(&mut handle, |f| f.view.len() == 2).await;

        handle.send(SessionInput::SelectNext).await.unwrap();
        let frame = frame_where(&mut handle, |f| f.selected == Some(1)).await;
        assert_eq!(frame.selected_record().unwrap().port(), 5432);

        // A new listener sorts ahead of the selected row
        platform.set_sockets(vec![
            tcp_listen(3000, CorrelationKey::Inode(55)),
            tcp_listen(4000, CorrelationKey::Inode(56)),
            tcp_listen(5432, CorrelationKey::Inode(9)),
        ]);
        let frame = frame_where(&mut handle, |f| f.view.len() == 3).await;
        assert_eq!(frame.selected, Some(2));
        assert_eq!(frame.selection.unwrap().port, 5432);

        // The selected row disappears: selection is cleared
        platform.set_sockets(vec![tcp_listen(3000, CorrelationKey::Inode(55))]);
        let frame = frame_where(&mut handle, |f| f.view.len() == 1).await;
        assert_eq!(frame.selected, None);
        assert_eq!(frame.selection, None);
    }

    #[tokio::test]
    async fn test_sort_and_filter_inputs() {
        let engine = engine_with(two_listeners(), FakeContainers::new(vec![]), FakeKiller::default());
        let mut handle = engine.watch(config(50));
        frame_where(&mut handle, |f| f.view.len() == 2).await;

        handle.send(SessionInput::ToggleDirection).await.unwrap();
        let frame = frame_where(&mut handle, |f| f.order.direction != Default::default()).await;
        assert_eq!(frame.view.records()[0].port(), 5432);
        // Selection stays on the same row, now at the bottom
        assert_eq!(frame.selected, Some(1));

        handle.send(SessionInput::SortColumn(4)).await.unwrap();
        let frame = frame_where(&mut handle, |f| f.order.key == SortKey::User).await;
        assert_eq!(frame.view.records()[0].user().as_deref(), Some("pg"));

        handle.send(SessionInput::SetFilter("postgres".into())).await.unwrap();
        let frame = frame_where(&mut handle, |f| f.view.len() == 1).await;
        assert_eq!(frame.view.records()[0].port(), 5432);
    }

    #[tokio::test]
    async fn test_query_filters_every_frame() {
        let engine = engine_with(two_listeners(), FakeContainers::new(vec![]), FakeKiller::default());
        let mut handle = engine.watch(WatchConfig {
            query: Some("5432".into()),
            ..config(10)
        });

        for _ in 0..3 {
            let frame = frame_where(&mut handle, |f| !f.view.is_empty()).await;
            assert!(frame.view.records().iter().all(|r| r.port() == 5432));
        }
    }

    #[tokio::test]
    async fn test_kill_pauses_timer_then_refreshes() {
        let platform = two_listeners();
        let killer = FakeKiller::with_pids(&[48291]).with_delay(Duration::from_millis(400));
        let engine = engine_with(platform.clone(), FakeContainers::new(vec![]), killer);
        let mut handle = engine.watch(config(10));
        frame_where(&mut handle, |f| f.selected == Some(0)).await;

        handle.send(SessionInput::Kill { force: false }).await.unwrap();
        let paused = frame_where(&mut handle, |f| f.state == SessionState::PausedForAction).await;
        assert!(paused.status.as_deref().unwrap().contains("48291"));

        // Let any refresh that was already running finish, then expect silence
        tokio::time::sleep(Duration::from_millis(50)).await;
        let scans = platform.scan_count();
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(platform.scan_count(), scans);

        let done = frame_where(&mut handle, |f| {
            f.state == SessionState::Active
                && f.status.as_deref().is_some_and(|s| s.starts_with("Terminated"))
        })
        .await;
        assert!(done.status.as_deref().unwrap().contains("SIGTERM"));
        assert!(platform.scan_count() > scans);
    }

    #[tokio::test]
    async fn test_slow_refresh_skips_ticks_without_burst() {
        let platform = two_listeners();
        platform.set_delay(Duration::from_millis(200));
        let engine = engine_with(platform.clone(), FakeContainers::new(vec![]), FakeKiller::default());
        let handle = engine.watch(config(50));

        // Refreshes are four ticks long: about one scan per 200ms, not one per tick
        tokio::time::sleep(Duration::from_millis(650)).await;
        let slow = platform.scan_count();
        assert!((2..=4).contains(&slow), "scans while slow: {}", slow);

        // Missed ticks were dropped, so speeding up does not replay them
        platform.set_delay(Duration::ZERO);
        tokio::time::sleep(Duration::from_millis(300)).await;
        let after = platform.scan_count() - slow;
        assert!(after <= 6, "scans after speed-up: {}", after);
        handle.cancel();
    }

    #[tokio::test]
    async fn test_quit_does_not_wait_for_running_action() {
        let killer = FakeKiller::with_pids(&[48291]).with_delay(Duration::from_secs(3));
        let engine = engine_with(two_listeners(), FakeContainers::new(vec![]), killer);
        let mut handle = engine.watch(config(10));
        frame_where(&mut handle, |f| f.selected == Some(0)).await;

        handle.send(SessionInput::Kill { force: false }).await.unwrap();
        frame_where(&mut handle, |f| f.state == SessionState::PausedForAction).await;

        let started = Instant::now();
        handle.send(SessionInput::Quit).await.unwrap();
        let drained = timeout(Duration::from_secs(1), async {
            while handle.next_frame().await.is_some() {}
        })
        .await;
        assert!(drained.is_ok());
        assert!(started.elapsed() < Duration::from_millis(500));
        assert_eq!(handle.state(), SessionState::Cancelled);
    }

    #[tokio::test]
    async fn test_kill_failure_is_reported_in_band() {
        let engine = engine_with(two_listeners(), FakeContainers::new(vec![]), FakeKiller::default());
        let mut handle = engine.watch(config(10));
        frame_where(&mut handle, |f| f.selected == Some(0)).await;

        handle.send(SessionInput::Kill { force: true }).await.unwrap();
        let frame = frame_where(&mut handle, |f| {
            f.status.as_deref().is_some_and(|s| s.contains("not found"))
        })
        .await;
        assert_eq!(frame.state, SessionState::Active);
    }

    #[tokio::test]
    async fn test_log_preview_on_container_row() {
        let containers = FakeContainers::new(vec![web_container(8080)])
            .with_logs(&["one", "two", "three"]);
        let engine = engine_with(two_listeners(), containers, FakeKiller::default());
        let mut handle = engine.watch(WatchConfig {
            docker: true,
            log_tail: 2,
            ..config(20)
        });
        frame_where(&mut handle, |f| f.view.len() == 3).await;

        handle.send(SessionInput::SelectLast).await.unwrap();
        frame_where(&mut handle, |f| f.selected == Some(2)).await;
        handle
            .send(SessionInput::Container(ContainerAction::FetchLogs(LogOptions::default())))
            .await
            .unwrap();

        let frame = frame_where(&mut handle, |f| !f.logs.is_empty()).await;
        assert_eq!(frame.logs, vec!["two", "three"]);
    }

    #[tokio::test]
    async fn test_refresh_failure_keeps_previous_snapshot() {
        let platform = two_listeners();
        let engine = engine_with(platform.clone(), FakeContainers::new(vec![]), FakeKiller::default());
        let mut handle = engine.watch(config(10));
        frame_where(&mut handle, |f| f.view.len() == 2).await;

        platform.set_failure(Some("table vanished"));
        let frame = frame_where(&mut handle, |f| f.status.is_some()).await;
        assert_eq!(frame.view.len(), 2);
        assert!(frame.status.as_deref().unwrap().contains("table vanished"));

        platform.set_failure(None);
        frame_where(&mut handle, |f| f.status.is_none()).await;
    }

    #[tokio::test]
    async fn test_dropping_handle_stops_session() {
        let platform = two_listeners();
        let engine = engine_with(platform.clone(), FakeContainers::new(vec![]), FakeKiller::default());
        let mut handle = engine.watch(config(5));
        frame_where(&mut handle, |f| !f.view.is_empty()).await;
        drop(handle);

        tokio::time::sleep(Duration::from_millis(50)).await;
        let scans = platform.scan_count();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(platform.scan_count(), scans);
    }
}
