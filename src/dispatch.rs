//! Hand-off queue from background workers to the serialization thread.
//!
//! Workers hold a cloneable [`DispatchHandle`] and may only enqueue. The
//! serialization loop owns the single [`Dispatcher`] and drains it once per
//! tick, running every pending action in FIFO order against the loop's own
//! state. Ownership enforces the one-drainer rule: the drain side is neither
//! `Clone` nor reachable from a handle.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::Notify;

/// A deferred completion, executed on the serialization thread with the
/// loop's context.
pub type Action<C> = Box<dyn FnOnce(&mut C) + Send + 'static>;

struct Shared<C> {
    queue: Mutex<VecDeque<Action<C>>>,
    wake: Notify,
}

impl<C> Shared<C> {
    fn lock(&self) -> MutexGuard<'_, VecDeque<Action<C>>> {
        match self.queue.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

/// Enqueue side, safe to clone into any thread.
pub struct DispatchHandle<C> {
    shared: Arc<Shared<C>>,
}

impl<C> Clone for DispatchHandle<C> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<C> DispatchHandle<C> {
    pub fn enqueue<F>(&self, action: F)
    where
        F: FnOnce(&mut C) + Send + 'static,
    {
        self.shared.lock().push_back(Box::new(action));
        self.shared.wake.notify_one();
    }
}

/// Drain side, owned by the serialization loop.
pub struct Dispatcher<C> {
    shared: Arc<Shared<C>>,
}

impl<C> Dispatcher<C> {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                queue: Mutex::new(VecDeque::new()),
                wake: Notify::new(),
            }),
        }
    }

    pub fn handle(&self) -> DispatchHandle<C> {
        DispatchHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Detach everything queued so far and run it in order. Actions enqueued
    /// while draining wait for the next tick. Returns how many ran.
    pub fn drain(&mut self, context: &mut C) -> usize {
        let batch = std::mem::take(&mut *self.shared.lock());
        let count = batch.len();
        for action in batch {
            action(context);
        }
        count
    }

    pub fn pending(&self) -> usize {
        self.shared.lock().len()
    }

    /// Resolves after the next enqueue (or immediately if one happened since
    /// the last wait).
    pub async fn notified(&self) {
        self.shared.wake.notified().await;
    }
}

impl<C> Default for Dispatcher<C> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn drains_in_enqueue_order() {
        let mut dispatcher = Dispatcher::<Vec<u32>>::new();
        let handle = dispatcher.handle();
        for i in 0..5 {
            handle.enqueue(move |log: &mut Vec<u32>| log.push(i));
        }

        let mut log = Vec::new();
        assert_eq!(dispatcher.drain(&mut log), 5);
        assert_eq!(log, vec![0, 1, 2, 3, 4]);
        assert_eq!(dispatcher.drain(&mut log), 0);
    }

    #[test]
    fn actions_enqueued_during_drain_wait_for_next_tick() {
        let mut dispatcher = Dispatcher::<Vec<&'static str>>::new();
        let handle = dispatcher.handle();
        let inner = handle.clone();
        handle.enqueue(move |log: &mut Vec<&'static str>| {
            log.push("outer");
            inner.enqueue(|log: &mut Vec<&'static str>| log.push("inner"));
        });

        let mut log = Vec::new();
        assert_eq!(dispatcher.drain(&mut log), 1);
        assert_eq!(log, vec!["outer"]);
        assert_eq!(dispatcher.pending(), 1);
        assert_eq!(dispatcher.drain(&mut log), 1);
        assert_eq!(log, vec!["outer", "inner"]);
    }

    #[test]
    fn concurrent_producers_lose_nothing() {
        let mut dispatcher = Dispatcher::<Vec<(usize, usize)>>::new();
        let workers: Vec<_> = (0..8)
            .map(|worker| {
                let handle = dispatcher.handle();
                thread::spawn(move || {
                    for seq in 0..100 {
                        handle.enqueue(move |log: &mut Vec<(usize, usize)>| {
                            log.push((worker, seq))
                        });
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }

        let mut log = Vec::new();
        assert_eq!(dispatcher.drain(&mut log), 800);
        for worker in 0..8 {
            let seqs: Vec<_> = log
                .iter()
                .filter(|(w, _)| *w == worker)
                .map(|(_, s)| *s)
                .collect();
            assert_eq!(seqs, (0..100).collect::<Vec<_>>());
        }
    }

    #[tokio::test]
    async fn enqueue_wakes_the_loop() {
        let dispatcher = Dispatcher::<()>::new();
        let handle = dispatcher.handle();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(10));
            handle.enqueue(|_| {});
        });

        tokio::time::timeout(Duration::from_secs(5), dispatcher.notified())
            .await
            .expect("enqueue should wake the drain side");
        assert_eq!(dispatcher.pending(), 1);
    }
}
