//! Provides duplicate call suppression.
//!
//! A [SingleFlight](SingleFlight) ensures that for a given key, at most one computation is in
//! flight at any time. The first caller for a key (the *leader*) executes its work while every
//! other caller for the same key simply waits for the outcome of the leader and receives a clone
//! of the very same result. Once the work is done, the key is forgotten, so that the next call
//! starts a fresh computation. Therefore this doesn't cache anything by itself, it only merges
//! concurrent requests.
//!
//! As futures might be dropped at any time (e.g. if a client disconnects), a leader might vanish
//! before producing a result. In this case one of the waiting callers takes over and executes its
//! own work, so that no caller waits forever.
//!
//! # Example
//!
//! ```
//! # use peercache::singleflight::SingleFlight;
//! # #[tokio::main]
//! # async fn main() {
//! let flights = SingleFlight::new();
//!
//! let (a, b) = tokio::join!(
//!     flights.work("Alice", || async {
//!         tokio::task::yield_now().await;
//!         111
//!     }),
//!     flights.work("Alice", || async { 222 })
//! );
//!
//! // Both callers see the result of the first one...
//! assert_eq!(a, 111);
//! assert_eq!(b, 111);
//! assert_eq!(flights.in_flight(), 0);
//! # }
//! ```
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use fnv::FnvHashMap;
use tokio::sync::watch;

/// Represents a computation which is currently running for a key.
struct Flight<T> {
    id: u64,
    completion: watch::Receiver<Option<T>>,
}

/// Merges concurrent computations for the same key into one.
pub struct SingleFlight<T> {
    flights: Mutex<FnvHashMap<String, Flight<T>>>,
    next_id: AtomicU64,
}

/// Removes the flight of a leader once it lands, no matter if it completed or was dropped.
struct Landing<'a, T> {
    flights: &'a Mutex<FnvHashMap<String, Flight<T>>>,
    key: &'a str,
    id: u64,
}

impl<T> Drop for Landing<'_, T> {
    fn drop(&mut self) {
        // A poisoned lock can only be caused by a panic in this module, in which case there is
        // nothing left to clean up...
        if let Ok(mut flights) = self.flights.lock() {
            if flights.get(self.key).map(|flight| flight.id) == Some(self.id) {
                let _ = flights.remove(self.key);
            }
        }
    }
}

impl<T: Clone> Default for SingleFlight<T> {
    fn default() -> Self {
        SingleFlight::new()
    }
}

impl<T: Clone> SingleFlight<T> {
    /// Creates a new instance without any flights.
    pub fn new() -> Self {
        SingleFlight {
            flights: Mutex::new(FnvHashMap::default()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Executes the given work for the given key unless there is already a computation in flight
    /// for this key, in which case its result is awaited and returned instead.
    ///
    /// Note that the given work is only invoked if this caller becomes the leader. Errors are
    /// simply modelled as part of **T** (e.g. by using a **Result**) and are therefore shared
    /// among all waiting callers just like any other value.
    pub async fn work<F, Fut>(&self, key: &str, work: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let (sender, id) = loop {
            let mut completion = {
                let mut flights = self.flights.lock().unwrap();
                match flights.get(key) {
                    Some(flight) => flight.completion.clone(),
                    None => {
                        let (sender, receiver) = watch::channel(None);
                        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                        let _ = flights.insert(
                            key.to_owned(),
                            Flight {
                                id,
                                completion: receiver,
                            },
                        );
                        break (sender, id);
                    }
                }
            };

            let outcome = completion
                .wait_for(|outcome| outcome.is_some())
                .await
                .ok()
                .and_then(|outcome| outcome.clone());
            if let Some(outcome) = outcome {
                return outcome;
            }

            // The leader vanished without providing a result. Try to take over...
            log::debug!("Taking over abandoned flight for {}", key);
        };

        let landing = Landing {
            flights: &self.flights,
            key,
            id,
        };

        let outcome = work().await;

        // The key has to be released before the waiting callers are notified, so that anyone
        // arriving afterwards starts a new computation rather than joining a finished one...
        std::mem::drop(landing);
        let _ = sender.send(Some(outcome.clone()));

        outcome
    }

    /// Returns the number of keys for which a computation is currently in flight.
    pub fn in_flight(&self) -> usize {
        self.flights.lock().unwrap().len()
    }
}
