//! Event bus (spec.md §4.9): a per-task bounded ring with TTL holding
//! recent events for late subscribers, plus a pub/sub relay fanning the
//! same events out to workspace- and session-scoped out-of-process
//! consumers. The loop (`agent::loop_`) is the sole writer; everything
//! else only reads.
//!
//! Grounded on `tools::implementations::bash`'s `BoundedOutputBuffer`
//! (drop-oldest `VecDeque` with a size cap) for the ring, and
//! `mcp::manager::McpManager`'s `DashMap`-of-channels shape for the
//! per-key subscriber registry.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio::sync::broadcast;

use crate::types::event::EventEnvelope;

/// A subscriber attached after a task already has history: the ring
/// contents (oldest first), then a live receiver for everything after.
pub struct Replay {
    pub backlog: Vec<EventEnvelope>,
    pub live: broadcast::Receiver<EventEnvelope>,
}

struct TaskChannel {
    ring: VecDeque<EventEnvelope>,
    sender: broadcast::Sender<EventEnvelope>,
    last_activity: Instant,
}

impl TaskChannel {
    fn new(ring_size: usize) -> Self {
        let (sender, _) = broadcast::channel(ring_size.max(1));
        Self {
            ring: VecDeque::with_capacity(ring_size),
            sender,
            last_activity: Instant::now(),
        }
    }

    fn push(&mut self, ring_size: usize, envelope: EventEnvelope) {
        self.ring.push_back(envelope.clone());
        while self.ring.len() > ring_size {
            self.ring.pop_front();
        }
        self.last_activity = Instant::now();
        // No receivers is the common case between a task starting and its
        // first subscriber attaching; not an error.
        let _ = self.sender.send(envelope);
    }
}

/// Bounded, TTL-expiring event history keyed by task, with a relay to
/// workspace- and session-scoped channels for consumers that watch many
/// tasks at once (spec.md §4.9).
pub struct EventBus {
    ring_size: usize,
    ttl: Duration,
    tasks: DashMap<String, TaskChannel>,
    workspaces: DashMap<String, broadcast::Sender<EventEnvelope>>,
    sessions: DashMap<String, broadcast::Sender<EventEnvelope>>,
}

impl EventBus {
    pub fn new(ring_size: usize, ttl: Duration) -> Self {
        Self {
            ring_size,
            ttl,
            tasks: DashMap::new(),
            workspaces: DashMap::new(),
            sessions: DashMap::new(),
        }
    }

    /// Publishes one event for `task_id`, relaying it to `workspace_id`'s
    /// and `session_id`'s channels too. `session_id` is optional: not
    /// every task is attached to a conversation (e.g. a cron-triggered
    /// daemon task).
    pub fn publish(
        &self,
        task_id: &str,
        workspace_id: &str,
        session_id: Option<&str>,
        envelope: EventEnvelope,
    ) {
        {
            let mut channel = self
                .tasks
                .entry(task_id.to_string())
                .or_insert_with(|| TaskChannel::new(self.ring_size));
            channel.push(self.ring_size, envelope.clone());
        }
        relay(&self.workspaces, workspace_id, &envelope);
        if let Some(session_id) = session_id {
            relay(&self.sessions, session_id, &envelope);
        }
    }

    /// Attaches to a task's stream. Replays the ring (oldest first) so a
    /// subscriber that connects mid-task sees everything still held, then
    /// hands back a live receiver for events published after this call.
    pub fn subscribe_task(&self, task_id: &str) -> Replay {
        let mut channel = self
            .tasks
            .entry(task_id.to_string())
            .or_insert_with(|| TaskChannel::new(self.ring_size));
        Replay {
            backlog: channel.ring.iter().cloned().collect(),
            live: channel.sender.subscribe(),
        }
    }

    /// Attaches to every event published for any task in a workspace.
    /// No backlog: the ring is per-task (spec.md §4.9), not per-workspace.
    pub fn subscribe_workspace(&self, workspace_id: &str) -> broadcast::Receiver<EventEnvelope> {
        subscribe(&self.workspaces, workspace_id, self.ring_size)
    }

    /// Attaches to every event published for tasks under one session
    /// (conversation).
    pub fn subscribe_session(&self, session_id: &str) -> broadcast::Receiver<EventEnvelope> {
        subscribe(&self.sessions, session_id, self.ring_size)
    }

    /// Drops task channels that have had no activity for longer than the
    /// configured TTL. Call periodically (e.g. alongside the automation
    /// supervisor's tick); a channel with no subscribers and an expired
    /// ring is otherwise kept alive forever by the `DashMap` entry.
    pub fn sweep_expired(&self) {
        let ttl = self.ttl;
        self.tasks.retain(|_, channel| channel.last_activity.elapsed() < ttl);
    }

    pub fn active_task_count(&self) -> usize {
        self.tasks.len()
    }
}

fn relay(registry: &DashMap<String, broadcast::Sender<EventEnvelope>>, key: &str, envelope: &EventEnvelope) {
    if let Some(sender) = registry.get(key) {
        let _ = sender.send(envelope.clone());
    }
}

fn subscribe(
    registry: &DashMap<String, broadcast::Sender<EventEnvelope>>,
    key: &str,
    ring_size: usize,
) -> broadcast::Receiver<EventEnvelope> {
    registry
        .entry(key.to_string())
        .or_insert_with(|| broadcast::channel(ring_size.max(1)).0)
        .subscribe()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::event::Event;

    fn envelope(task_id: &str, seq: u64) -> EventEnvelope {
        EventEnvelope::new(task_id, seq, Event::StepStarted { step_id: "s1".to_string(), description: "d".to_string() })
    }

    #[test]
    fn late_subscriber_replays_ring_then_live() {
        let bus = EventBus::new(300, Duration::from_secs(3600));
        bus.publish("t1", "w1", None, envelope("t1", 1));
        bus.publish("t1", "w1", None, envelope("t1", 2));

        let replay = bus.subscribe_task("t1");
        assert_eq!(replay.backlog.len(), 2);
        assert_eq!(replay.backlog[0].seq, 1);
        assert_eq!(replay.backlog[1].seq, 2);
    }

    #[test]
    fn ring_drops_oldest_beyond_capacity() {
        let bus = EventBus::new(2, Duration::from_secs(3600));
        for seq in 1..=5 {
            bus.publish("t1", "w1", None, envelope("t1", seq));
        }
        let replay = bus.subscribe_task("t1");
        let seqs: Vec<u64> = replay.backlog.iter().map(|e| e.seq).collect();
        assert_eq!(seqs, vec![4, 5]);
    }

    #[tokio::test]
    async fn live_subscriber_receives_events_published_after_subscribing() {
        let bus = EventBus::new(300, Duration::from_secs(3600));
        let mut replay = bus.subscribe_task("t1").live;
        bus.publish("t1", "w1", None, envelope("t1", 1));

        let received = replay.recv().await.unwrap();
        assert_eq!(received.seq, 1);
    }

    #[tokio::test]
    async fn workspace_subscriber_sees_events_from_any_task_in_it() {
        let bus = EventBus::new(300, Duration::from_secs(3600));
        let mut ws_rx = bus.subscribe_workspace("w1");
        bus.publish("t1", "w1", None, envelope("t1", 1));
        bus.publish("t2", "w1", None, envelope("t2", 1));

        assert_eq!(ws_rx.recv().await.unwrap().task_id, "t1");
        assert_eq!(ws_rx.recv().await.unwrap().task_id, "t2");
    }

    #[tokio::test]
    async fn session_subscriber_only_sees_tasks_tagged_with_that_session() {
        let bus = EventBus::new(300, Duration::from_secs(3600));
        let mut session_rx = bus.subscribe_session("conv1");
        bus.publish("t1", "w1", Some("conv1"), envelope("t1", 1));
        bus.publish("t2", "w1", None, envelope("t2", 1));

        let received = session_rx.recv().await.unwrap();
        assert_eq!(received.task_id, "t1");
        assert!(tokio::time::timeout(Duration::from_millis(50), session_rx.recv()).await.is_err());
    }

    #[test]
    fn sweep_expired_drops_idle_task_channels() {
        let bus = EventBus::new(300, Duration::from_millis(0));
        bus.publish("t1", "w1", None, envelope("t1", 1));
        std::thread::sleep(Duration::from_millis(5));
        bus.sweep_expired();
        assert_eq!(bus.active_task_count(), 0);
    }
}
