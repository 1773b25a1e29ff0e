//! Timer heap that feeds keys into the queue once their delay has elapsed.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::hash::Hash;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::trace;

use crate::queue::Queue;

pub(crate) enum DelayMessage<K> {
    Add { key: K, ready_at: Instant },
    Stop,
}

/// Pending timers, at most one live entry per key.
///
/// Re-adding a key with a later deadline is ignored; an earlier deadline
/// supersedes the existing one, whose heap entry becomes stale.
pub(crate) struct Waiting<K> {
    heap: BinaryHeap<Reverse<(Instant, u64)>>,
    entries: HashMap<u64, K>,
    by_key: HashMap<K, (Instant, u64)>,
    next_seq: u64,
}

impl<K: Clone + Eq + Hash> Waiting<K> {
    pub(crate) fn new() -> Self {
        Self {
            heap: BinaryHeap::new(),
            entries: HashMap::new(),
            by_key: HashMap::new(),
            next_seq: 0,
        }
    }

    pub(crate) fn insert(&mut self, key: K, ready_at: Instant) {
        if self
            .by_key
            .get(&key)
            .is_some_and(|(existing, _)| *existing <= ready_at)
        {
            return;
        }
        let seq = self.next_seq;
        self.next_seq = self.next_seq.wrapping_add(1);
        self.heap.push(Reverse((ready_at, seq)));
        self.entries.insert(seq, key.clone());
        self.by_key.insert(key, (ready_at, seq));
    }

    /// Remove and return every key due at `now`.
    pub(crate) fn pop_ready(&mut self, now: Instant) -> Vec<K> {
        let mut ready = Vec::new();
        while let Some(Reverse((ready_at, seq))) = self.heap.peek().copied() {
            if ready_at > now {
                break;
            }
            self.heap.pop();
            let Some(key) = self.entries.remove(&seq) else {
                continue;
            };
            if self.by_key.get(&key).is_some_and(|(_, live)| *live == seq) {
                self.by_key.remove(&key);
                ready.push(key);
            }
        }
        ready
    }

    pub(crate) fn next_ready(&self) -> Option<Instant> {
        self.heap.peek().map(|Reverse((ready_at, _))| *ready_at)
    }

    pub(crate) fn len(&self) -> usize {
        self.by_key.len()
    }
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Spawn the loop that moves due keys into `queue`.
///
/// The loop ends on [`DelayMessage::Stop`] or when every sender is dropped.
pub(crate) fn spawn_delaying_loop<K>(
    queue: Arc<Queue<K>>,
    mut rx: mpsc::UnboundedReceiver<DelayMessage<K>>,
) -> JoinHandle<()>
where
    K: Clone + Eq + Hash + Send + Sync + 'static,
{
    tokio::spawn(async move {
        let mut waiting = Waiting::new();
        loop {
            for key in waiting.pop_ready(Instant::now()) {
                queue.add(key);
            }

            tokio::select! {
                message = rx.recv() => match message {
                    Some(DelayMessage::Add { key, ready_at }) => waiting.insert(key, ready_at),
                    Some(DelayMessage::Stop) | None => {
                        trace!(abandoned = waiting.len(), "Delaying loop stopped");
                        return;
                    }
                },
                () = sleep_until_opt(waiting.next_ready()) => {}
            }
        }
    })
}
