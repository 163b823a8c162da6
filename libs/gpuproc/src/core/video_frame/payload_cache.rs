// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Memoized payload behind a single round trip.
//!
//! One mutex guards the cached value, the in-flight flag and the queued
//! asynchronous callbacks; one condition variable wakes blocked callers.
//! However many threads ask before the reply arrives, only the first issues
//! a request and every caller receives the same result.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

type Waiter<P> = Box<dyn FnOnce(Option<P>) + Send>;

/// Delivers the result of one fetch back into the cache.
pub type Resolve<P> = Box<dyn FnOnce(Option<P>) + Send>;

struct CacheState<P> {
    cached: Option<P>,
    in_flight: bool,
    waiters: Vec<Waiter<P>>,
    /// Threads parked in `get_blocking`.
    blocked: usize,
    /// Bumped on every resolution so blocked callers can tell theirs arrived.
    resolutions: u64,
    requests: u64,
}

pub struct PayloadCache<P> {
    state: Mutex<CacheState<P>>,
    resolved: Condvar,
}

impl<P: Clone + Send + 'static> Default for PayloadCache<P> {
    fn default() -> Self {
        Self {
            state: Mutex::new(CacheState {
                cached: None,
                in_flight: false,
                waiters: Vec::new(),
                blocked: 0,
                resolutions: 0,
                requests: 0,
            }),
            resolved: Condvar::new(),
        }
    }
}

impl<P: Clone + Send + 'static> PayloadCache<P> {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn cached(&self) -> Option<P> {
        self.state.lock().cached.clone()
    }

    /// Number of fetches actually issued.
    pub fn requests(&self) -> u64 {
        self.state.lock().requests
    }

    pub fn is_in_flight(&self) -> bool {
        self.state.lock().in_flight
    }

    /// Callers, blocked or queued, waiting on the in-flight fetch.
    pub fn waiting(&self) -> usize {
        let state = self.state.lock();
        state.blocked + state.waiters.len()
    }

    /// Return the cached payload, or block until the in-flight fetch (started
    /// by `fetch` if none is running) resolves. `None` on an empty result or
    /// when `timeout` elapses first.
    pub fn get_blocking(
        self: &Arc<Self>,
        fetch: impl FnOnce(Resolve<P>),
        timeout: Option<Duration>,
    ) -> Option<P> {
        let mut state = self.state.lock();
        if let Some(cached) = &state.cached {
            return Some(cached.clone());
        }
        let generation = state.resolutions;
        let start = self.begin_request(&mut state);
        drop(state);

        if start {
            fetch(self.resolver());
        }

        let deadline = timeout.map(|timeout| Instant::now() + timeout);
        let mut state = self.state.lock();
        state.blocked += 1;
        while state.resolutions == generation {
            match deadline {
                Some(deadline) => {
                    if self.resolved.wait_until(&mut state, deadline).timed_out()
                        && state.resolutions == generation
                    {
                        state.blocked -= 1;
                        tracing::warn!("[PayloadCache] Timed out waiting for payload");
                        return None;
                    }
                }
                None => self.resolved.wait(&mut state),
            }
        }
        state.blocked -= 1;
        state.cached.clone()
    }

    /// Deliver the payload to `callback`, immediately if cached, otherwise
    /// when the in-flight fetch resolves.
    pub fn get_async(
        self: &Arc<Self>,
        fetch: impl FnOnce(Resolve<P>),
        callback: impl FnOnce(Option<P>) + Send + 'static,
    ) {
        let mut state = self.state.lock();
        if let Some(cached) = state.cached.clone() {
            drop(state);
            callback(Some(cached));
            return;
        }
        state.waiters.push(Box::new(callback));
        let start = self.begin_request(&mut state);
        drop(state);

        if start {
            fetch(self.resolver());
        }
    }

    fn begin_request(&self, state: &mut CacheState<P>) -> bool {
        if state.in_flight {
            return false;
        }
        state.in_flight = true;
        state.requests += 1;
        true
    }

    fn resolver(self: &Arc<Self>) -> Resolve<P> {
        let cache = Arc::clone(self);
        Box::new(move |payload| cache.resolve(payload))
    }

    /// Complete the in-flight fetch. An empty result is delivered but not
    /// cached, so a later call fetches again.
    pub fn resolve(&self, payload: Option<P>) {
        let waiters = {
            let mut state = self.state.lock();
            if payload.is_some() {
                state.cached = payload.clone();
            }
            state.in_flight = false;
            state.resolutions += 1;
            std::mem::take(&mut state.waiters)
        };
        self.resolved.notify_all();
        for waiter in waiters {
            waiter(payload.clone());
        }
    }
}

impl<P> std::fmt::Debug for PayloadCache<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("PayloadCache")
            .field("cached", &state.cached.is_some())
            .field("in_flight", &state.in_flight)
            .field("waiters", &state.waiters.len())
            .field("blocked", &state.blocked)
            .field("requests", &state.requests)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn wait_for_waiters(cache: &PayloadCache<u32>, count: usize) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while cache.waiting() < count {
            assert!(Instant::now() < deadline, "callers never started waiting");
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn test_cached_value_skips_fetch() {
        let cache = PayloadCache::<u32>::new();
        assert_eq!(cache.get_blocking(|resolve| resolve(Some(5)), None), Some(5));
        assert_eq!(
            cache.get_blocking(|_| panic!("cached value must not refetch"), None),
            Some(5)
        );
        assert_eq!(cache.requests(), 1);
    }

    #[test]
    fn test_concurrent_callers_share_one_fetch() {
        let cache = PayloadCache::<u32>::new();
        let pending: Arc<Mutex<Option<Resolve<u32>>>> = Arc::new(Mutex::new(None));
        let delivered = Arc::new(AtomicUsize::new(0));

        let stash = |pending: &Arc<Mutex<Option<Resolve<u32>>>>| {
            let pending = Arc::clone(pending);
            move |resolve: Resolve<u32>| {
                *pending.lock() = Some(resolve);
            }
        };

        for _ in 0..3 {
            let delivered = Arc::clone(&delivered);
            cache.get_async(stash(&pending), move |value| {
                assert_eq!(value, Some(42));
                delivered.fetch_add(1, Ordering::SeqCst);
            });
        }

        let blocking = {
            let cache = Arc::clone(&cache);
            let pending = Arc::clone(&pending);
            std::thread::spawn(move || {
                cache.get_blocking(stash(&pending), Some(Duration::from_secs(5)))
            })
        };

        wait_for_waiters(&cache, 4);
        let resolve = pending.lock().take().expect("one fetch issued");
        resolve(Some(42));

        assert_eq!(blocking.join().unwrap(), Some(42));
        assert_eq!(delivered.load(Ordering::SeqCst), 3);
        assert_eq!(cache.requests(), 1);
    }

    #[test]
    fn test_empty_result_is_not_cached() {
        let cache = PayloadCache::<u32>::new();
        assert_eq!(cache.get_blocking(|resolve| resolve(None), None), None);
        assert!(!cache.is_in_flight());
        assert_eq!(cache.get_blocking(|resolve| resolve(Some(1)), None), Some(1));
        assert_eq!(cache.requests(), 2);
    }

    #[test]
    fn test_blocking_times_out_without_reply() {
        let cache = PayloadCache::<u32>::new();
        let value = cache.get_blocking(|_resolve| {}, Some(Duration::from_millis(20)));
        assert_eq!(value, None);
    }

    #[test]
    fn test_blocking_caller_joins_async_fetch_without_timeout() {
        let cache = PayloadCache::<u32>::new();
        let pending: Arc<Mutex<Option<Resolve<u32>>>> = Arc::new(Mutex::new(None));
        let (tx, rx) = crossbeam_channel::bounded(1);

        {
            let pending = Arc::clone(&pending);
            cache.get_async(
                move |resolve| *pending.lock() = Some(resolve),
                move |value| {
                    let _ = tx.send(value);
                },
            );
        }
        assert!(cache.is_in_flight());

        let blocking = {
            let cache = Arc::clone(&cache);
            std::thread::spawn(move || {
                cache.get_blocking(|_| panic!("the async fetch is already in flight"), None)
            })
        };
        wait_for_waiters(&cache, 2);

        // Held past any timeout a caller might otherwise have used.
        std::thread::sleep(Duration::from_millis(100));
        assert!(rx.try_recv().is_err());
        assert!(!blocking.is_finished());

        let resolve = pending.lock().take().expect("one fetch issued");
        resolve(Some(7));

        assert_eq!(blocking.join().unwrap(), Some(7));
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), Some(7));
        assert_eq!(cache.requests(), 1);
        assert_eq!(cache.waiting(), 0);
    }

    #[test]
    fn test_timed_out_caller_leaves_fetch_to_the_others() {
        let cache = PayloadCache::<u32>::new();
        let pending: Arc<Mutex<Option<Resolve<u32>>>> = Arc::new(Mutex::new(None));
        let stash = Arc::clone(&pending);
        let value = cache.get_blocking(
            move |resolve| *stash.lock() = Some(resolve),
            Some(Duration::from_millis(20)),
        );
        assert_eq!(value, None);
        assert!(cache.is_in_flight());
        assert_eq!(cache.waiting(), 0);

        let (tx, rx) = crossbeam_channel::bounded(1);
        cache.get_async(|_| panic!("fetch still in flight"), move |value| {
            let _ = tx.send(value);
        });
        let resolve = pending.lock().take().expect("one fetch issued");
        resolve(Some(3));
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), Some(3));
        assert_eq!(cache.requests(), 1);
    }
}
