//! Worker supervisor: the three slots of one tenant.
//!
//! Every spawned process is watched by a single task that multiplexes both
//! output streams, the startup timer, stop requests and process exit. All
//! reactions for one process therefore apply in stream order, and the exit
//! reaction always runs after the process's last output line.

use chrono::Utc;
use serde::Serialize;
use std::fmt;
use std::io;
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader, Split};
use tokio::process::{Child, Command};
use tokio::sync::{broadcast, oneshot};
use tokio::time::Instant;

use super::logs::{LOG_CAPACITY, LogEntry, LogLevel, LogRing};
use super::signals::{self, Stream, WorkerSignal};
use super::{SlotId, SlotStatus, SlotView, StatusSnapshot};
use crate::bot_config::ConfigStore;
use crate::config::HubConfig;
use crate::session::TenantId;

const EVENT_CHANNEL_CAPACITY: usize = 256;
/// How long output is still collected after the process has exited.
const DRAIN_GRACE: Duration = Duration::from_millis(500);

/// How worker processes are launched.
#[derive(Debug, Clone)]
pub struct SupervisorSettings {
    pub program: String,
    pub args: Vec<String>,
    pub start_timeout: Duration,
    pub stop_grace: Option<Duration>,
}

impl SupervisorSettings {
    pub fn from_config(cfg: &HubConfig) -> Self {
        Self {
            program: cfg.worker_program.clone(),
            args: cfg.worker_args.clone(),
            start_timeout: cfg.start_timeout,
            stop_grace: cfg.stop_grace,
        }
    }
}

/// Event published to a tenant's observers.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "camelCase")]
pub enum WorkerEvent {
    StatusUpdate(StatusSnapshot),
    NewLog(LogEntry),
}

#[derive(Debug)]
pub enum StartError {
    AlreadyRunning,
    Invalid(Vec<String>),
    Materialize(io::Error),
    Spawn(io::Error),
    TornDown,
}

impl fmt::Display for StartError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AlreadyRunning => write!(f, "bot is already running"),
            Self::Invalid(errors) => write!(f, "configuration errors: {}", errors.join("; ")),
            Self::Materialize(e) => write!(f, "failed to create environment file: {e}"),
            Self::Spawn(e) => write!(f, "failed to spawn worker: {e}"),
            Self::TornDown => write!(f, "tenant has been torn down"),
        }
    }
}

impl std::error::Error for StartError {}

#[derive(Debug, PartialEq, Eq)]
pub struct NotRunning;

impl fmt::Display for NotRunning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "bot is not running")
    }
}

impl std::error::Error for NotRunning {}

/// Tally of a start-all / stop-all pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BulkOutcome {
    pub succeeded: usize,
    pub failed: usize,
}

struct WorkerHandle {
    run: u64,
    pid: Option<u32>,
    stop_tx: Option<oneshot::Sender<()>>,
}

#[derive(Default)]
struct Slot {
    status: SlotStatus,
    handle: Option<WorkerHandle>,
}

#[derive(Default)]
struct Inner {
    slots: [Slot; 3],
    next_run: u64,
    torn_down: bool,
}

impl Inner {
    fn is_current(&self, slot: SlotId, run: u64) -> bool {
        matches!(&self.slots[slot.index()].handle, Some(h) if h.run == run)
    }

    fn snapshot(&self) -> StatusSnapshot {
        let bots: Vec<SlotView> = SlotId::ALL
            .iter()
            .map(|&id| SlotView {
                id,
                name: id.display_name(),
                status: self.slots[id.index()].status,
            })
            .collect();
        let running_bots = bots.iter().filter(|b| b.status == SlotStatus::Running).count();
        StatusSnapshot { running_bots, bots }
    }
}

pub struct WorkerSupervisor {
    tenant: TenantId,
    store: ConfigStore,
    settings: Arc<SupervisorSettings>,
    inner: Mutex<Inner>,
    logs: Mutex<LogRing>,
    events: broadcast::Sender<WorkerEvent>,
}

impl WorkerSupervisor {
    pub fn new(tenant: TenantId, store: ConfigStore, settings: Arc<SupervisorSettings>) -> Arc<Self> {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Arc::new(Self {
            tenant,
            store,
            settings,
            inner: Mutex::new(Inner::default()),
            logs: Mutex::new(LogRing::new(LOG_CAPACITY)),
            events,
        })
    }

    pub fn tenant(&self) -> &TenantId {
        &self.tenant
    }

    pub fn store(&self) -> &ConfigStore {
        &self.store
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Apply `next` to `slot` when it is a legal edge; publishes the new
    /// snapshot. Returns whether the state changed.
    fn transition(&self, inner: &mut Inner, slot: SlotId, next: SlotStatus) -> bool {
        let current = &mut inner.slots[slot.index()].status;
        if *current == next || !current.can_become(next) {
            return false;
        }
        *current = next;
        let _ = self.events.send(WorkerEvent::StatusUpdate(inner.snapshot()));
        true
    }

    // ── Operations ──────────────────────────────────────────────────

    /// Validate, materialize and spawn the worker for `slot`.
    pub fn start(self: &Arc<Self>, slot: SlotId) -> Result<(), StartError> {
        let mut inner = self.lock();
        if inner.torn_down {
            return Err(StartError::TornDown);
        }
        if inner.slots[slot.index()].handle.is_some() {
            return Err(StartError::AlreadyRunning);
        }

        let report = self.store.validate_for_start(slot);
        if !report.is_valid {
            return Err(StartError::Invalid(report.errors));
        }

        let config_path = self
            .store
            .materialize_for_worker(slot)
            .map_err(StartError::Materialize)?;

        let child = match self.spawn_worker(&config_path) {
            Ok(child) => child,
            Err(e) => {
                self.store.discard_materialized(slot);
                return Err(StartError::Spawn(e));
            }
        };

        let run = inner.next_run;
        inner.next_run += 1;
        let (stop_tx, stop_rx) = oneshot::channel();
        let pid = child.id();
        inner.slots[slot.index()].handle = Some(WorkerHandle {
            run,
            pid,
            stop_tx: Some(stop_tx),
        });
        self.transition(&mut inner, slot, SlotStatus::Starting);
        drop(inner);

        tracing::info!(tenant = %self.tenant, %slot, ?pid, "worker spawned");
        self.append_log(slot, LogLevel::Info, format!("{} is starting...", slot.display_name()));

        tokio::spawn(watch_worker(
            Arc::downgrade(self),
            slot,
            run,
            child,
            stop_rx,
            Arc::clone(&self.settings),
        ));
        Ok(())
    }

    fn spawn_worker(&self, config_path: &Path) -> io::Result<Child> {
        Command::new(&self.settings.program)
            .args(&self.settings.args)
            .arg(config_path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
    }

    /// Request termination of the worker in `slot`. Exit is confirmed
    /// asynchronously by the watcher.
    pub fn stop(&self, slot: SlotId) -> Result<(), NotRunning> {
        let mut inner = self.lock();
        let Some(mut handle) = inner.slots[slot.index()].handle.take() else {
            return Err(NotRunning);
        };
        if let Some(tx) = handle.stop_tx.take() {
            let _ = tx.send(());
        }
        self.transition(&mut inner, slot, SlotStatus::Stopped);
        drop(inner);

        tracing::info!(tenant = %self.tenant, %slot, pid = ?handle.pid, "worker stop requested");
        Ok(())
    }

    pub fn start_all(self: &Arc<Self>) -> BulkOutcome {
        let mut outcome = BulkOutcome::default();
        for slot in SlotId::ALL {
            match self.start(slot) {
                Ok(()) => outcome.succeeded += 1,
                Err(e) => {
                    tracing::debug!(tenant = %self.tenant, %slot, "start-all: {e}");
                    outcome.failed += 1;
                }
            }
        }
        outcome
    }

    pub fn stop_all(&self) -> BulkOutcome {
        let mut outcome = BulkOutcome::default();
        for slot in SlotId::ALL {
            match self.stop(slot) {
                Ok(()) => outcome.succeeded += 1,
                Err(NotRunning) => outcome.failed += 1,
            }
        }
        outcome
    }

    /// Insert a log entry at the front of the tenant's ring and publish it.
    pub fn append_log(&self, slot: SlotId, level: LogLevel, message: impl Into<String>) {
        let entry = LogEntry {
            timestamp: Utc::now(),
            bot: slot,
            level,
            message: message.into(),
        };
        let mut logs = self.logs.lock().unwrap_or_else(|e| e.into_inner());
        logs.push(entry.clone());
        // Published under the ring lock so observers see insertion order.
        let _ = self.events.send(WorkerEvent::NewLog(entry));
    }

    pub fn status(&self) -> StatusSnapshot {
        self.lock().snapshot()
    }

    /// Newest-first log tail.
    pub fn logs(&self, limit: usize) -> Vec<LogEntry> {
        self.logs.lock().unwrap_or_else(|e| e.into_inner()).tail(limit)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<WorkerEvent> {
        self.events.subscribe()
    }

    /// Stop every slot, refuse further starts and release the tenant's
    /// configuration artifacts. Idempotent.
    pub async fn teardown(&self) {
        let first = {
            let mut inner = self.lock();
            !std::mem::replace(&mut inner.torn_down, true)
        };
        let stopped = self.stop_all();

        let store = self.store.clone();
        let purged = tokio::task::spawn_blocking(move || store.purge())
            .await
            .unwrap_or_else(|e| Err(io::Error::other(e)));
        if let Err(e) = purged {
            tracing::warn!(tenant = %self.tenant, "teardown: config purge failed: {e}");
        }
        if first {
            tracing::info!(tenant = %self.tenant, stopped = stopped.succeeded, "supervisor torn down");
        }
    }

    // ── Reactions ───────────────────────────────────────────────────

    /// A line arrived on one of the worker's streams. Returns whether it was
    /// a startup marker (which disarms the startup timer).
    fn on_line(&self, slot: SlotId, run: u64, stream: Stream, line: &str) -> bool {
        let line = line.trim();
        if line.is_empty() {
            return false;
        }
        tracing::debug!(tenant = %self.tenant, %slot, ?stream, "{line}");

        let level = match stream {
            Stream::Stdout => LogLevel::Info,
            Stream::Stderr => LogLevel::Error,
        };
        self.append_log(slot, level, line);

        let signal = signals::classify(stream, line);
        let next = match signal {
            WorkerSignal::Ready => SlotStatus::Running,
            WorkerSignal::Failed => SlotStatus::Error,
            WorkerSignal::Other => return false,
        };

        let changed = {
            let mut inner = self.lock();
            inner.is_current(slot, run) && self.transition(&mut inner, slot, next)
        };
        if changed && next == SlotStatus::Running {
            self.append_log(
                slot,
                LogLevel::Success,
                format!("✅ {} started successfully", slot.display_name()),
            );
        }
        true
    }

    fn on_startup_timeout(&self, slot: SlotId, run: u64) {
        let changed = {
            let mut inner = self.lock();
            inner.is_current(slot, run)
                && inner.slots[slot.index()].status == SlotStatus::Starting
                && self.transition(&mut inner, slot, SlotStatus::Error)
        };
        if changed {
            tracing::warn!(tenant = %self.tenant, %slot, "worker startup timed out");
            self.append_log(
                slot,
                LogLevel::Error,
                format!("❌ {} failed to start (timeout)", slot.display_name()),
            );
        }
    }

    fn on_exit(&self, slot: SlotId, run: u64, status: io::Result<ExitStatus>) {
        let owns_file = {
            let mut inner = self.lock();
            if inner.is_current(slot, run) {
                inner.slots[slot.index()].handle = None;
                self.transition(&mut inner, slot, SlotStatus::Stopped);
            }
            // A stopped run still owns the file unless a newer run replaced it.
            inner.slots[slot.index()].handle.is_none()
        };
        if owns_file {
            self.store.discard_materialized(slot);
        }

        let name = slot.display_name();
        let (level, message) = match status {
            Ok(s) if s.success() => (LogLevel::Info, format!("{name} stopped normally")),
            Ok(s) => match s.code() {
                Some(code) => (LogLevel::Error, format!("{name} stopped with error (code: {code})")),
                None => (LogLevel::Error, format!("{name} terminated by signal")),
            },
            Err(e) => (LogLevel::Error, format!("{name} exit status unavailable: {e}")),
        };
        tracing::info!(tenant = %self.tenant, %slot, "{message}");
        self.append_log(slot, level, message);
    }
}

// ── Watcher ─────────────────────────────────────────────────────────

async fn next_line<R>(lines: &mut Option<Split<BufReader<R>>>) -> Option<String>
where
    R: AsyncRead + Unpin,
{
    let Some(reader) = lines.as_mut() else {
        return std::future::pending().await;
    };
    match reader.next_segment().await {
        Ok(Some(raw)) => {
            // Worker output is not guaranteed UTF-8; keep reading regardless.
            let line = String::from_utf8_lossy(&raw);
            Some(line.trim_end_matches('\r').to_string())
        }
        Ok(None) => {
            *lines = None;
            None
        }
        Err(e) => {
            tracing::debug!("worker stream closed: {e}");
            *lines = None;
            None
        }
    }
}

/// Remaining lines of a stream, bounded by `deadline`.
async fn drain<R>(lines: &mut Option<Split<BufReader<R>>>, deadline: Instant) -> Vec<String>
where
    R: AsyncRead + Unpin,
{
    let mut out = Vec::new();
    while lines.is_some() {
        match tokio::time::timeout_at(deadline, next_line(lines)).await {
            Ok(Some(line)) => out.push(line),
            Ok(None) => {}
            Err(_) => break,
        }
    }
    out
}

#[cfg(unix)]
fn terminate(child: &mut Child) {
    match child.id() {
        // SIGTERM lets the worker shut down cleanly.
        Some(pid) => unsafe {
            libc::kill(pid as libc::pid_t, libc::SIGTERM);
        },
        None => {
            let _ = child.start_kill();
        }
    }
}

#[cfg(not(unix))]
fn terminate(child: &mut Child) {
    let _ = child.start_kill();
}

async fn watch_worker(
    supervisor: Weak<WorkerSupervisor>,
    slot: SlotId,
    run: u64,
    mut child: Child,
    mut stop_rx: oneshot::Receiver<()>,
    settings: Arc<SupervisorSettings>,
) {
    let mut stdout = child.stdout.take().map(|s| BufReader::new(s).split(b'\n'));
    let mut stderr = child.stderr.take().map(|s| BufReader::new(s).split(b'\n'));

    let startup = tokio::time::sleep(settings.start_timeout);
    tokio::pin!(startup);
    let escalation = tokio::time::sleep(Duration::ZERO);
    tokio::pin!(escalation);

    let mut timer_armed = true;
    let mut stop_requested = false;
    let mut signalled = false;
    let mut escalation_armed = false;
    let mut force_kill = false;

    let exit = loop {
        if stop_requested && !signalled {
            signalled = true;
            terminate(&mut child);
            if let Some(grace) = settings.stop_grace {
                escalation.as_mut().reset(Instant::now() + grace);
                escalation_armed = true;
            }
        }
        if force_kill {
            force_kill = false;
            tracing::warn!(%slot, "worker ignored SIGTERM, killing");
            let _ = child.start_kill();
        }

        tokio::select! {
            line = next_line(&mut stdout) => {
                if let Some(line) = line {
                    match supervisor.upgrade() {
                        Some(sup) => {
                            if sup.on_line(slot, run, Stream::Stdout, &line) {
                                timer_armed = false;
                            }
                        }
                        None => stop_requested = true,
                    }
                }
            }
            line = next_line(&mut stderr) => {
                if let Some(line) = line {
                    match supervisor.upgrade() {
                        Some(sup) => {
                            if sup.on_line(slot, run, Stream::Stderr, &line) {
                                timer_armed = false;
                            }
                        }
                        None => stop_requested = true,
                    }
                }
            }
            () = &mut startup, if timer_armed => {
                timer_armed = false;
                if let Some(sup) = supervisor.upgrade() {
                    sup.on_startup_timeout(slot, run);
                }
            }
            // A dropped sender (supervisor gone) counts as a stop request.
            _ = &mut stop_rx, if !stop_requested => {
                stop_requested = true;
            }
            () = &mut escalation, if escalation_armed => {
                escalation_armed = false;
                force_kill = true;
            }
            status = child.wait() => break status,
        }
    };

    let deadline = Instant::now() + DRAIN_GRACE;
    let tail_out = drain(&mut stdout, deadline).await;
    let tail_err = drain(&mut stderr, deadline).await;

    let Some(sup) = supervisor.upgrade() else {
        return;
    };
    for line in tail_out {
        sup.on_line(slot, run, Stream::Stdout, &line);
    }
    for line in tail_err {
        sup.on_line(slot, run, Stream::Stderr, &line);
    }
    sup.on_exit(slot, run, exit);
}
