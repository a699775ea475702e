use crate::models::{LogEntry, LogStatus, RunMetadata, Stage};
use indexmap::IndexMap;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;

/// Size of the replay ring buffer handed to newly-attached subscribers.
pub const REPLAY_BUFFER_CAPACITY: usize = 1000;

/// System-level message emitted exactly once at the end of every run; live
/// subscriptions terminate after delivering it.
pub const RUN_FINISHED_MESSAGE: &str = "Update process finished";

#[derive(Debug, Default)]
struct SinkState {
    replay: VecDeque<LogEntry>,
    logs: IndexMap<String, Vec<LogEntry>>,
    metadata: RunMetadata,
}

/// Structured progress log for the currently-active run.
///
/// Every emitted [`LogEntry`] goes three places: the bounded replay ring
/// (drop-oldest), the per-profile log map that becomes the persisted
/// [`RunRecord`](crate::models::RunRecord), and a broadcast channel fanning
/// out to live subscribers. Exactly one writer (the orchestrator), any number
/// of readers; the writer never blocks on slow readers — a lagging subscriber
/// loses its oldest pending events, per the broadcast channel's policy.
#[derive(Debug, Clone)]
pub struct ProgressSink {
    state: Arc<Mutex<SinkState>>,
    tx: broadcast::Sender<LogEntry>,
}

impl ProgressSink {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(256);
        Self {
            state: Arc::new(Mutex::new(SinkState::default())),
            tx,
        }
    }

    /// Record one progress event. An empty `profile` marks a system-level
    /// event, which is broadcast and buffered but kept out of the per-profile
    /// log map.
    pub fn emit<M: Into<String>>(
        &self,
        profile: &str,
        stage: Stage,
        message: M,
        status: LogStatus,
    ) -> LogEntry {
        let entry = LogEntry::new(profile, stage, message, status);

        {
            let mut state = self.state.lock().unwrap();

            state.replay.push_back(entry.clone());
            if state.replay.len() > REPLAY_BUFFER_CAPACITY {
                state.replay.pop_front();
            }

            if !profile.is_empty() {
                state
                    .logs
                    .entry(profile.to_string())
                    .or_default()
                    .push(entry.clone());
            }

            // Send while holding the lock so a concurrent subscribe() sees
            // every entry exactly once: in the replay snapshot or live.
            // It's OK if no one is listening.
            let _ = self.tx.send(entry.clone());
        }

        tracing::info!("[{}] {}: {}", profile, entry.stage, entry.message);
        entry
    }

    /// Mark that this run rendered at least one PDF.
    pub fn mark_pdf_created(&self) {
        self.state.lock().unwrap().metadata.pdf_created = true;
    }

    /// Attach a subscriber: a snapshot of everything buffered so far plus a
    /// live receiver for what follows. Taken under one lock, so the two parts
    /// have no gap and no overlap.
    pub fn subscribe(&self) -> (Vec<LogEntry>, broadcast::Receiver<LogEntry>) {
        let state = self.state.lock().unwrap();
        let replay = state.replay.iter().cloned().collect();
        let rx = self.tx.subscribe();
        (replay, rx)
    }

    /// Attach a subscriber as a replay-then-tail event sequence that
    /// terminates once the run-finished event has been delivered.
    pub fn stream(&self) -> ProgressSubscription {
        let (replay, rx) = self.subscribe();
        ProgressSubscription {
            replay: replay.into_iter(),
            rx,
            done: false,
        }
    }

    /// Drain the per-run state for persistence.
    pub fn take_run(&self) -> (IndexMap<String, Vec<LogEntry>>, RunMetadata) {
        let mut state = self.state.lock().unwrap();
        (
            std::mem::take(&mut state.logs),
            std::mem::take(&mut state.metadata),
        )
    }

    /// Clear all per-run state. Must run between runs so nothing from a
    /// previous run leaks into a new run's observable state.
    pub fn reset(&self) {
        let mut state = self.state.lock().unwrap();
        state.replay.clear();
        state.logs.clear();
        state.metadata = RunMetadata::default();
    }
}

impl Default for ProgressSink {
    fn default() -> Self {
        Self::new()
    }
}

fn is_run_finished(entry: &LogEntry) -> bool {
    entry.is_system() && entry.stage == Stage::System && entry.message == RUN_FINISHED_MESSAGE
}

/// One subscriber's view of the progress feed: buffered history first, then
/// live events, ending after the run-finished event.
pub struct ProgressSubscription {
    replay: std::vec::IntoIter<LogEntry>,
    rx: broadcast::Receiver<LogEntry>,
    done: bool,
}

impl ProgressSubscription {
    /// Next event, or `None` once the run has finished (or the sink is gone).
    pub async fn next(&mut self) -> Option<LogEntry> {
        if self.done {
            return None;
        }

        if let Some(entry) = self.replay.next() {
            if is_run_finished(&entry) {
                self.done = true;
            }
            return Some(entry);
        }

        loop {
            match self.rx.recv().await {
                Ok(entry) => {
                    if is_run_finished(&entry) {
                        self.done = true;
                    }
                    return Some(entry);
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!("Progress subscriber lagged, skipped {} events", skipped);
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => {
                    self.done = true;
                    return None;
                }
            }
        }
    }
}
