//! Daemon agents (spec.md §4.10): long-running watchers that poll a
//! target, buffer what they see, and escalate to an interrupt only when
//! something changed, looked anomalous, or a quiet run has gone on long
//! enough to warrant a sanity check.
//!
//! `Observer`/`Analyzer`/`InterruptRouter` are collaborator seams: what a
//! daemon actually watches and how it judges a change worth surfacing is
//! product-specific and lives outside this module, the same way
//! `tools::registry::ToolRegistry` depends on `ToolExecutor`
//! implementations it never constructs itself.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::mpsc;

use super::TaskLauncher;
use crate::storage::{DaemonStore, SharedDatabase};
use crate::types::automation::{DaemonConfig, DaemonState, InterruptSeverity, InterruptSignal, Observation};

const BUFFER_CAPACITY: usize = 100;
const ANALYZE_EVERY_QUIET_TICKS: u32 = 12;
const QUIET_TICKS_BEFORE_BACKOFF: u32 = 10;
const MAX_POLL_INTERVAL_SECS: u64 = 3600;

/// Ring of the most recent observations, used to decide whether anything
/// changed and to feed an analyzer its recent context.
pub struct ObservationBuffer {
    ring: VecDeque<Observation>,
}

impl ObservationBuffer {
    pub fn new() -> Self {
        Self { ring: VecDeque::new() }
    }

    /// Adds an observation, dropping the oldest once full. Returns whether
    /// its content differs from the previous observation (or this is the
    /// first one).
    pub fn add(&mut self, observation: Observation) -> bool {
        let changed = match self.ring.back() {
            None => true,
            Some(last) => last.content != observation.content,
        };
        if self.ring.len() >= BUFFER_CAPACITY {
            self.ring.pop_front();
        }
        self.ring.push_back(observation);
        changed
    }

    /// Most recent `n` observations, oldest first.
    pub fn recent(&self, n: usize) -> Vec<Observation> {
        let skip = self.ring.len().saturating_sub(n);
        self.ring.iter().skip(skip).cloned().collect()
    }
}

impl Default for ObservationBuffer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
pub trait Observer: Send + Sync {
    async fn observe(&self, daemon: &DaemonConfig) -> anyhow::Result<Observation>;
}

#[async_trait]
pub trait Analyzer: Send + Sync {
    async fn analyze(&self, daemon: &DaemonConfig, recent: &[Observation]) -> anyhow::Result<Vec<InterruptSignal>>;
}

#[async_trait]
pub trait InterruptRouter: Send + Sync {
    async fn notify(&self, daemon: &DaemonConfig, signal: &InterruptSignal);
}

/// Whether a signal of `severity` should interrupt a human/task given the
/// daemon's configured sensitivity. Unrecognized sensitivity values fall
/// back to the "medium" row.
fn should_interrupt(sensitivity: &str, severity: InterruptSeverity) -> bool {
    match sensitivity {
        "low" => matches!(severity, InterruptSeverity::Critical),
        "high" => true,
        _ => !matches!(severity, InterruptSeverity::Info),
    }
}

struct DaemonRuntime {
    config: Mutex<DaemonConfig>,
    buffer: Mutex<ObservationBuffer>,
    consecutive_no_change: AtomicU32,
    next_interval_secs: AtomicU64,
}

impl DaemonRuntime {
    fn new(config: DaemonConfig) -> Self {
        let interval = config.poll_interval_seconds;
        Self {
            config: Mutex::new(config),
            buffer: Mutex::new(ObservationBuffer::new()),
            consecutive_no_change: AtomicU32::new(0),
            next_interval_secs: AtomicU64::new(interval),
        }
    }

    fn snapshot(&self) -> DaemonConfig {
        self.config.lock().expect("daemon config mutex poisoned").clone()
    }
}

/// Owns every running daemon's background tick loop and routes its
/// interrupts.
pub struct DaemonManager {
    store: SharedDatabase,
    launcher: Arc<dyn TaskLauncher>,
    router: Arc<dyn InterruptRouter>,
    observer: Arc<dyn Observer>,
    analyzer: Arc<dyn Analyzer>,
    runtimes: DashMap<String, Arc<DaemonRuntime>>,
    shutdown: DashMap<String, mpsc::Sender<()>>,
}

impl DaemonManager {
    pub fn new(
        store: SharedDatabase,
        launcher: Arc<dyn TaskLauncher>,
        router: Arc<dyn InterruptRouter>,
        observer: Arc<dyn Observer>,
        analyzer: Arc<dyn Analyzer>,
    ) -> Self {
        Self {
            store,
            launcher,
            router,
            observer,
            analyzer,
            runtimes: DashMap::new(),
            shutdown: DashMap::new(),
        }
    }

    /// Loads every enabled daemon from storage and starts its loop.
    pub fn load_daemons(self: &Arc<Self>) -> anyhow::Result<()> {
        for config in DaemonStore::new(&self.store).list_active()? {
            self.spawn(config);
        }
        Ok(())
    }

    pub fn create_daemon(self: &Arc<Self>, config: DaemonConfig) -> anyhow::Result<()> {
        DaemonStore::new(&self.store).upsert(&config)?;
        self.spawn(config);
        Ok(())
    }

    fn spawn(self: &Arc<Self>, mut config: DaemonConfig) {
        config.state = DaemonState::Observing;
        let id = config.id.clone();
        let runtime = Arc::new(DaemonRuntime::new(config));
        self.runtimes.insert(id.clone(), Arc::clone(&runtime));

        let (tx, mut rx) = mpsc::channel::<()>(1);
        self.shutdown.insert(id.clone(), tx);

        let manager = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                let wait = runtime.next_interval_secs.load(Ordering::SeqCst);
                tokio::select! {
                    _ = rx.recv() => {
                        tracing::debug!(daemon_id = %id, "daemon loop shutting down");
                        break;
                    }
                    _ = tokio::time::sleep(std::time::Duration::from_secs(wait)) => {
                        manager.tick(&id, &runtime).await;
                    }
                }
            }
        });
    }

    pub fn stop_daemon(&self, id: &str) {
        if let Some((_, tx)) = self.shutdown.remove(id) {
            let _ = tx.try_send(());
        }
        if let Some(runtime) = self.runtimes.get(id) {
            let mut cfg = runtime.config.lock().expect("daemon config mutex poisoned");
            cfg.state = DaemonState::Stopped;
        }
        self.runtimes.remove(id);
    }

    pub fn pause_daemon(&self, id: &str) {
        if let Some(runtime) = self.runtimes.get(id) {
            let mut cfg = runtime.config.lock().expect("daemon config mutex poisoned");
            cfg.state = DaemonState::Paused;
        }
    }

    pub fn resume_daemon(&self, id: &str) {
        if let Some(runtime) = self.runtimes.get(id) {
            let mut cfg = runtime.config.lock().expect("daemon config mutex poisoned");
            if cfg.state == DaemonState::Paused {
                cfg.state = DaemonState::Observing;
            }
        }
    }

    pub fn list_daemons(&self, workspace_id: &str) -> Vec<DaemonConfig> {
        self.runtimes
            .iter()
            .map(|e| e.value().snapshot())
            .filter(|c| c.workspace_id == workspace_id)
            .collect()
    }

    async fn tick(&self, daemon_id: &str, runtime: &Arc<DaemonRuntime>) {
        let config = runtime.snapshot();
        if matches!(config.state, DaemonState::Paused | DaemonState::Stopped) {
            return;
        }

        let observation = match self.observer.observe(&config).await {
            Ok(o) => o,
            Err(e) => {
                tracing::warn!(daemon_id = %daemon_id, error = %e, "daemon: observation failed");
                return;
            }
        };
        let is_anomaly = observation.is_anomaly;

        let changed = runtime
            .buffer
            .lock()
            .expect("daemon buffer mutex poisoned")
            .add(observation);

        let no_change_count = if changed {
            runtime.consecutive_no_change.store(0, Ordering::SeqCst);
            0
        } else {
            runtime.consecutive_no_change.fetch_add(1, Ordering::SeqCst) + 1
        };

        {
            let mut cfg = runtime.config.lock().expect("daemon config mutex poisoned");
            cfg.observation_count += 1;
            cfg.last_observation_at = Some(Utc::now());
            cfg.state = DaemonState::Observing;
        }

        let should_analyze =
            changed || is_anomaly || (no_change_count > 0 && no_change_count % ANALYZE_EVERY_QUIET_TICKS == 0);

        if should_analyze {
            let recent = runtime.buffer.lock().expect("daemon buffer mutex poisoned").recent(20);
            {
                let mut cfg = runtime.config.lock().expect("daemon config mutex poisoned");
                cfg.state = DaemonState::Analyzing;
            }
            match self.analyzer.analyze(&config, &recent).await {
                Ok(signals) => {
                    for signal in signals {
                        if should_interrupt(&config.sensitivity, signal.severity) {
                            self.handle_interrupt(daemon_id, runtime, &config, signal).await;
                        }
                    }
                }
                Err(e) => tracing::warn!(daemon_id = %daemon_id, error = %e, "daemon: analysis failed"),
            }
        }

        let mut next_interval = config.poll_interval_seconds;
        if no_change_count > QUIET_TICKS_BEFORE_BACKOFF {
            next_interval = (next_interval.saturating_mul(2)).min(MAX_POLL_INTERVAL_SECS);
        }
        runtime.next_interval_secs.store(next_interval, Ordering::SeqCst);

        let persisted = runtime.snapshot();
        if let Err(e) = DaemonStore::new(&self.store).upsert(&persisted) {
            tracing::warn!(daemon_id = %daemon_id, error = %e, "daemon: failed to persist state");
        }
    }

    async fn handle_interrupt(
        &self,
        daemon_id: &str,
        runtime: &Arc<DaemonRuntime>,
        config: &DaemonConfig,
        signal: InterruptSignal,
    ) {
        {
            let mut cfg = runtime.config.lock().expect("daemon config mutex poisoned");
            cfg.state = DaemonState::Acting;
            cfg.interrupt_count += 1;
        }

        self.router.notify(config, &signal).await;

        if signal.auto_actionable {
            if let Some(goal) = &signal.goal_template {
                let source = format!("daemon:{}", config.name);
                if let Err(e) = self
                    .launcher
                    .launch(&config.workspace_id, &config.user_id, goal, &source)
                    .await
                {
                    tracing::warn!(daemon_id = %daemon_id, error = %e, "daemon: task launch failed");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Database;
    use crate::types::automation::DaemonType;
    use std::sync::Mutex as StdMutex;

    #[test]
    fn buffer_reports_change_on_distinct_content() {
        let mut buffer = ObservationBuffer::new();
        assert!(buffer.add(Observation::new("src", "a")));
        assert!(!buffer.add(Observation::new("src", "a")));
        assert!(buffer.add(Observation::new("src", "b")));
    }

    #[test]
    fn buffer_drops_oldest_past_capacity() {
        let mut buffer = ObservationBuffer::new();
        for i in 0..(BUFFER_CAPACITY + 10) {
            buffer.add(Observation::new("src", i.to_string()));
        }
        assert_eq!(buffer.recent(1000).len(), BUFFER_CAPACITY);
    }

    #[test]
    fn sensitivity_table_matches_spec() {
        use InterruptSeverity::*;
        assert!(!should_interrupt("low", Info));
        assert!(!should_interrupt("low", Warning));
        assert!(should_interrupt("low", Critical));

        assert!(!should_interrupt("medium", Info));
        assert!(should_interrupt("medium", Warning));
        assert!(should_interrupt("medium", Critical));

        assert!(should_interrupt("high", Info));
        assert!(should_interrupt("high", Warning));
        assert!(should_interrupt("high", Critical));
    }

    struct StaticObserver;
    #[async_trait]
    impl Observer for StaticObserver {
        async fn observe(&self, _daemon: &DaemonConfig) -> anyhow::Result<Observation> {
            Ok(Observation::new("repo", "nothing changed"))
        }
    }

    struct NoSignalAnalyzer;
    #[async_trait]
    impl Analyzer for NoSignalAnalyzer {
        async fn analyze(&self, _daemon: &DaemonConfig, _recent: &[Observation]) -> anyhow::Result<Vec<InterruptSignal>> {
            Ok(Vec::new())
        }
    }

    struct RecordingRouter {
        notified: StdMutex<Vec<String>>,
    }
    #[async_trait]
    impl InterruptRouter for RecordingRouter {
        async fn notify(&self, _daemon: &DaemonConfig, signal: &InterruptSignal) {
            self.notified.lock().unwrap().push(signal.title.clone());
        }
    }

    struct NoopLauncher;
    #[async_trait]
    impl TaskLauncher for NoopLauncher {
        async fn launch(&self, _workspace_id: &str, _user_id: &str, _goal: &str, _source: &str) -> anyhow::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn tick_updates_observation_count_without_analyzing_on_no_change() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let manager = Arc::new(DaemonManager::new(
            db,
            Arc::new(NoopLauncher),
            Arc::new(RecordingRouter { notified: StdMutex::new(Vec::new()) }),
            Arc::new(StaticObserver),
            Arc::new(NoSignalAnalyzer),
        ));
        let config = DaemonConfig::new("w1", "u1", "watcher", "desc", DaemonType::RepoWatcher, "main");
        let runtime = Arc::new(DaemonRuntime::new(config.clone()));
        manager.runtimes.insert(config.id.clone(), Arc::clone(&runtime));

        manager.tick(&config.id, &runtime).await;
        assert_eq!(runtime.snapshot().observation_count, 1);

        manager.tick(&config.id, &runtime).await;
        // Second observation has identical content, so no_change_count == 1
        // and still below the every-12th-tick analyzer trigger.
        assert_eq!(runtime.consecutive_no_change.load(Ordering::SeqCst), 1);
    }
}
