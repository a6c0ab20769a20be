//! Cancellable task set owned by a board.
//!
//! Every timer, interval and listener a board starts is spawned through a
//! [`TimerSet`] so one sweep can abort all of them when the board goes offline.
//! Keyed entries replace any earlier entry with the same key. Dropping the set
//! aborts everything it still holds.

use std::future::Future;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use tokio::task::AbortHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

struct Entry {
    key: Option<&'static str>,
    handle: AbortHandle,
}

#[derive(Default)]
pub struct TimerSet {
    entries: Mutex<Vec<Entry>>,
}

impl TimerSet {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Entry>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Spawn `fut` and track it. Must be called inside a Tokio runtime.
    pub fn spawn<F>(&self, key: Option<&'static str>, fut: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(fut).abort_handle();
        let mut entries = self.lock();
        entries.retain(|e| !e.handle.is_finished());
        if let Some(key) = key {
            entries.retain(|e| {
                if e.key == Some(key) {
                    e.handle.abort();
                    false
                } else {
                    true
                }
            });
        }
        entries.push(Entry { key, handle });
    }

    /// Run `f` every `period`, first after one period, until it returns `false`.
    pub fn every<F>(&self, key: Option<&'static str>, period: Duration, mut f: F)
    where
        F: FnMut() -> bool + Send + 'static,
    {
        self.spawn(key, async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                if !f() {
                    break;
                }
            }
        });
    }

    /// Abort the entry with `key`. Returns whether one was live.
    pub fn cancel(&self, key: &str) -> bool {
        let mut live = false;
        self.lock().retain(|e| {
            if e.key == Some(key) {
                live |= !e.handle.is_finished();
                e.handle.abort();
                false
            } else {
                true
            }
        });
        live
    }

    pub fn contains(&self, key: &str) -> bool {
        self.lock()
            .iter()
            .any(|e| e.key == Some(key) && !e.handle.is_finished())
    }

    /// Number of tasks still running.
    pub fn len(&self) -> usize {
        self.lock().iter().filter(|e| !e.handle.is_finished()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Abort everything. Returns how many entries were held.
    pub fn clear(&self) -> usize {
        let drained: Vec<Entry> = self.lock().drain(..).collect();
        for entry in &drained {
            entry.handle.abort();
        }
        drained.len()
    }
}

impl Drop for TimerSet {
    fn drop(&mut self) {
        self.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn clear_aborts_pending_timers() {
        let set = TimerSet::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let f = fired.clone();
        set.spawn(None, async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            f.fetch_add(1, Ordering::SeqCst);
        });
        let f = fired.clone();
        set.every(Some("tick"), Duration::from_millis(10), move || {
            f.fetch_add(1, Ordering::SeqCst);
            true
        });
        assert_eq!(set.len(), 2);
        assert_eq!(set.clear(), 2);
        assert!(set.is_empty());
        let before = fired.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(fired.load(Ordering::SeqCst), before);
    }

    #[tokio::test]
    async fn keyed_spawn_replaces_previous_entry() {
        let set = TimerSet::new();
        set.every(Some("blink"), Duration::from_millis(50), || true);
        set.every(Some("blink"), Duration::from_millis(50), || true);
        assert_eq!(set.len(), 1);
        assert!(set.cancel("blink"));
        assert!(!set.contains("blink"));
        assert!(!set.cancel("blink"));
    }

    #[tokio::test]
    async fn finished_timers_are_not_counted() {
        let set = TimerSet::new();
        set.spawn(Some("once"), async {});
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(set.is_empty());
        assert!(!set.contains("once"));
    }
}
