// Single-flight slot: concurrent callers needing the same operation share
// one execution and its result.
//
// The slot holds at most one in-flight operation, tagged with the key it
// was started for. A caller with the same key joins it; a caller with a
// different key replaces it. The operation runs on its own task, which
// clears the slot (if it still owns it) the moment it settles, whether or
// not anyone is still waiting.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use futures_util::future::{BoxFuture, FutureExt, Shared};
use tracing::{debug, trace};

struct Flight<K, T: Clone> {
    id: u64,
    key: K,
    future: Shared<BoxFuture<'static, Option<T>>>,
}

type Slot<K, T> = Arc<Mutex<Option<Flight<K, T>>>>;

pub(crate) struct SingleFlight<K, T: Clone> {
    slot: Slot<K, T>,
    next_id: AtomicU64,
}

impl<K, T> SingleFlight<K, T>
where
    K: PartialEq + Send + 'static,
    T: Clone + Send + Sync + 'static,
{
    pub(crate) fn new() -> Self {
        Self {
            slot: Arc::new(Mutex::new(None)),
            next_id: AtomicU64::new(0),
        }
    }

    /// Join the in-flight operation for `key`, or start one with `start`.
    ///
    /// `start` is only called by the caller that opens a flight. Resolves
    /// to `None` if the operation's task panicked or was cancelled.
    pub(crate) async fn run<F, Fut>(&self, key: K, start: F) -> Option<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T> + Send + 'static,
    {
        let future = {
            let mut slot = lock(&self.slot);
            match slot.as_ref() {
                Some(flight) if flight.key == key => {
                    trace!(flight = flight.id, "joining in-flight operation");
                    flight.future.clone()
                }
                current => {
                    if let Some(stale) = current {
                        debug!(flight = stale.id, "in-flight operation superseded");
                    }
                    let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                    trace!(flight = id, "starting operation");

                    let operation = start();
                    let owner = Arc::clone(&self.slot);
                    let task = tokio::spawn(async move {
                        let outcome = operation.await;
                        let mut slot = lock(&owner);
                        if slot.as_ref().is_some_and(|flight| flight.id == id) {
                            *slot = None;
                        }
                        outcome
                    });
                    let future = async move { task.await.ok() }.boxed().shared();
                    *slot = Some(Flight {
                        id,
                        key,
                        future: future.clone(),
                    });
                    future
                }
            }
        };

        future.await
    }

    #[cfg(test)]
    pub(crate) fn is_idle(&self) -> bool {
        lock(&self.slot).is_none()
    }
}

fn lock<K, T: Clone>(slot: &Slot<K, T>) -> MutexGuard<'_, Option<Flight<K, T>>> {
    slot.lock().expect("single-flight lock poisoned")
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn concurrent_callers_share_one_execution() {
        let flight = SingleFlight::<&str, u32>::new();
        let started = Arc::new(AtomicUsize::new(0));

        let call = || {
            let started = Arc::clone(&started);
            flight.run("r1", move || {
                started.fetch_add(1, Ordering::SeqCst);
                async {
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    42
                }
            })
        };

        let results = futures_util::future::join_all((0..8).map(|_| call())).await;

        assert_eq!(started.load(Ordering::SeqCst), 1);
        assert!(results.iter().all(|v| *v == Some(42)));
        assert!(flight.is_idle());
    }

    #[tokio::test]
    async fn settled_flight_is_not_reused() {
        let flight = SingleFlight::<&str, usize>::new();
        let started = Arc::new(AtomicUsize::new(0));

        for expected in 1..=3 {
            let started = Arc::clone(&started);
            let value = flight
                .run("r1", move || {
                    let n = started.fetch_add(1, Ordering::SeqCst) + 1;
                    async move { n }
                })
                .await;
            assert_eq!(value, Some(expected));
        }

        assert!(flight.is_idle());
    }

    #[tokio::test(start_paused = true)]
    async fn abandoned_flight_still_settles_and_clears() {
        let flight = SingleFlight::<&str, u32>::new();

        let dropped = tokio::time::timeout(
            Duration::from_millis(10),
            flight.run("r1", || async {
                tokio::time::sleep(Duration::from_secs(1)).await;
                7
            }),
        )
        .await;
        assert!(dropped.is_err());
        assert!(!flight.is_idle());

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(flight.is_idle());
    }

    #[tokio::test(start_paused = true)]
    async fn different_key_starts_its_own_flight() {
        let flight = SingleFlight::<&str, &str>::new();

        let stale = tokio::time::timeout(
            Duration::from_millis(10),
            flight.run("r_old", || async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                "old"
            }),
        )
        .await;
        assert!(stale.is_err());

        let fresh = flight.run("r_new", || async { "new" }).await;
        assert_eq!(fresh, Some("new"));
        assert!(flight.is_idle());
    }
}
