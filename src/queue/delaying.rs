use super::work_queue::WorkQueue;
use crate::resource::ReconcileKey;
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) struct WaitingKey {
    pub(crate) ready_at: Instant,
    pub(crate) key: ReconcileKey,
}

pub(crate) type WaitingSender = mpsc::UnboundedSender<WaitingKey>;

/// Keys waiting for their ready time, earliest first.
#[derive(Default)]
struct WaitingSet {
    heap: BinaryHeap<Reverse<WaitingKey>>,
    ready_at: HashMap<ReconcileKey, Instant>,
}

impl WaitingSet {
    /// Keeps the earlier ready time when the key is already waiting.
    fn insert(&mut self, entry: WaitingKey) {
        if let Some(existing) = self.ready_at.get(&entry.key) {
            if *existing <= entry.ready_at {
                return;
            }
        }
        self.ready_at.insert(entry.key.clone(), entry.ready_at);
        self.heap.push(Reverse(entry));
    }

    /// Pops every key whose ready time has passed. Superseded heap entries are skipped.
    fn drain_ready(&mut self, now: Instant) -> Vec<ReconcileKey> {
        let mut ready = Vec::new();
        while let Some(Reverse(head)) = self.heap.peek() {
            if head.ready_at > now {
                break;
            }
            let Some(Reverse(entry)) = self.heap.pop() else {
                break;
            };
            if self.ready_at.get(&entry.key) == Some(&entry.ready_at) {
                self.ready_at.remove(&entry.key);
                ready.push(entry.key);
            }
        }
        ready
    }

    fn next_ready_at(&self) -> Option<Instant> {
        self.heap.peek().map(|Reverse(head)| head.ready_at)
    }

    fn len(&self) -> usize {
        self.ready_at.len()
    }
}

/// Spawns the task that moves delayed keys into `queue` once they become ready.
///
/// The task exits when `shutdown` fires or every sender is dropped; keys still waiting are
/// discarded.
pub(crate) fn spawn_delay_loop(
    queue: Arc<WorkQueue>,
    mut rx: mpsc::UnboundedReceiver<WaitingKey>,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut waiting = WaitingSet::default();

        loop {
            for key in waiting.drain_ready(Instant::now()) {
                queue.add(key);
            }

            let next_ready = waiting.next_ready_at();
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    tracing::debug!(
                        queue = queue.name(),
                        discarded = waiting.len(),
                        "delayed insertion loop stopped"
                    );
                    break;
                }
                received = rx.recv() => match received {
                    Some(entry) => waiting.insert(entry),
                    None => break,
                },
                _ = sleep_until(next_ready.unwrap_or_else(Instant::now)), if next_ready.is_some() => {}
            }
        }
    })
}
