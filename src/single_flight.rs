//! SingleFlight (C6, spec §4.5) — thundering-herd protection: collapse
//! concurrent misses on one key into one load.
//!
//! The shared, completable future named `LoadSlot.promise` in spec §3 is
//! realized as a [`futures::future::Shared`] over a spawned task. Spawning
//! the load via `tokio::spawn` (the fire-and-forget idiom used throughout
//! the teacher — see `src/hooks/webhook.rs`, `src/claude_cli/process.rs`'s
//! `JoinHandle` fields) is what makes cancellation-safety work: the load
//! keeps running on the executor even if every waiter currently polling it
//! is dropped, because the spawned task's progress does not depend on
//! anyone polling the `Shared` handle.

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::pin::Pin;
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt, Shared};
use tokio::sync::Mutex;

use crate::error::CacheError;

type LoadOutcome<V> = Result<V, CacheError>;
type LoadFuture<V> = Shared<BoxFuture<'static, LoadOutcome<V>>>;

/// Per-key in-flight load registry (spec §4.5's `inflight: key→LoadSlot`).
pub struct SingleFlight<K, V> {
    inflight: Arc<Mutex<HashMap<K, LoadFuture<V>>>>,
}

impl<K, V> Default for SingleFlight<K, V> {
    fn default() -> Self {
        Self {
            inflight: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

impl<K, V> SingleFlight<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `make` to produce the load future if no slot exists for `key`
    /// (the "leader"), or attach to the existing slot as a waiter
    /// (`is_leader = false`). Every caller — leader and waiters alike —
    /// receives the same outcome.
    ///
    /// State machine (spec §4.5): `Absent --miss--> Loading
    /// --complete(ok)--> Present` / `--complete(err)--> Absent`. There is no
    /// explicit `Loading` value stored anywhere; the presence of a key in
    /// `inflight` *is* the `Loading` state, and removing it *is* the
    /// transition back to `Absent`/`Present`.
    pub async fn run<F, Fut>(&self, key: K, make: F) -> (LoadOutcome<V>, bool)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = LoadOutcome<V>> + Send + 'static,
    {
        let mut guard = self.inflight.lock().await;
        if let Some(existing) = guard.get(&key) {
            let fut = existing.clone();
            drop(guard);
            return (fut.await, false);
        }

        // Leader path: spawn the load so it survives this task being
        // cancelled, then wrap the join in a `Shared` so later waiters can
        // clone onto the same outcome.
        let handle = tokio::spawn(make());
        let shared: LoadFuture<V> = (async move {
            match handle.await {
                Ok(result) => result,
                Err(join_err) => Err(CacheError::LoadTaskFailed(join_err.to_string())),
            }
        })
        .boxed()
        .shared();

        guard.insert(key.clone(), shared.clone());
        drop(guard);

        // A dedicated cleanup path, independent of this task's own
        // cancellation: once the shared future resolves, remove the slot so
        // a later miss starts a fresh `LoadSlot` (spec §4.5's "fulfil
        // first... then remove"). Cloning `shared` here and awaiting it
        // below does not re-run the load — `Shared` caches the output after
        // the first resolution.
        let result = shared.clone().await;
        self.inflight.lock().await.remove(&key);

        (result, true)
    }
}

/// Boxed unary loader, used by the facade to erase the loader future's
/// concrete type across the `SingleFlight`/`BatchCoalescer` boundary.
pub type BoxLoader<V> = Pin<Box<dyn Future<Output = LoadOutcome<V>> + Send>>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn concurrent_misses_invoke_loader_once() {
        let sf: Arc<SingleFlight<&str, i32>> = Arc::new(SingleFlight::new());
        let call_count = Arc::new(AtomicU32::new(0));

        let mut handles = Vec::new();
        for _ in 0..50 {
            let sf = sf.clone();
            let call_count = call_count.clone();
            handles.push(tokio::spawn(async move {
                sf.run("k", move || async move {
                    call_count.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    Ok(42)
                })
                .await
            }));
        }

        let mut leaders = 0;
        for h in handles {
            let (result, is_leader) = h.await.unwrap();
            assert_eq!(result.unwrap(), 42);
            if is_leader {
                leaders += 1;
            }
        }
        assert_eq!(leaders, 1, "exactly one caller should be the leader");
        assert_eq!(call_count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failed_load_propagates_to_all_waiters() {
        let sf: Arc<SingleFlight<&str, i32>> = Arc::new(SingleFlight::new());
        let mut handles = Vec::new();
        for _ in 0..5 {
            let sf = sf.clone();
            handles.push(tokio::spawn(async move {
                sf.run("k", || async move {
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    Err(CacheError::Load(Arc::new(crate::error::Message::from(
                        "boom",
                    ))))
                })
                .await
                .0
            }));
        }
        for h in handles {
            assert!(h.await.unwrap().is_err());
        }
    }

    #[tokio::test]
    async fn a_later_miss_starts_a_fresh_slot() {
        let sf: SingleFlight<&str, i32> = SingleFlight::new();
        let call_count = Arc::new(AtomicU32::new(0));

        {
            let call_count = call_count.clone();
            sf.run("k", move || async move {
                call_count.fetch_add(1, Ordering::SeqCst);
                Ok(1)
            })
            .await;
        }
        {
            let call_count = call_count.clone();
            sf.run("k", move || async move {
                call_count.fetch_add(1, Ordering::SeqCst);
                Ok(2)
            })
            .await;
        }
        assert_eq!(call_count.load(Ordering::SeqCst), 2);
    }

    /// Cancellation safety (S6): a caller that abandons its wait must not
    /// cancel the shared load — the load runs to completion for the peer
    /// and any later callers.
    #[tokio::test]
    async fn cancelling_a_waiter_does_not_cancel_the_shared_load() {
        let sf: Arc<SingleFlight<&str, i32>> = Arc::new(SingleFlight::new());
        let call_count = Arc::new(AtomicU32::new(0));

        let sf2 = sf.clone();
        let call_count2 = call_count.clone();
        let first = tokio::spawn(async move {
            sf2.run("k", move || async move {
                call_count2.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(50)).await;
                Ok(7)
            })
            .await
        });

        // Give the leader time to register the slot, then abandon a second
        // waiter immediately by aborting its task.
        tokio::time::sleep(Duration::from_millis(5)).await;
        let sf3 = sf.clone();
        let second = tokio::spawn(async move { sf3.run("k", || async { Ok(0) }).await });
        second.abort();

        let (result, is_leader) = first.await.unwrap();
        assert!(is_leader);
        assert_eq!(result.unwrap(), 7);
        assert_eq!(call_count.load(Ordering::SeqCst), 1);

        // A subsequent call for the same key, issued after completion,
        // must see a fresh slot and get its own (immediate) value rather
        // than an error from the abandoned waiter.
        let (result2, _) = sf.run("k", || async { Ok(9) }).await;
        assert_eq!(result2.unwrap(), 9);
    }
}
