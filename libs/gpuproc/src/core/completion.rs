// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Exactly-once reply continuations.
//!
//! A [`CompletionHandler`] owns the continuation of one reply-bearing call.
//! It fires exactly once: through [`complete`](CompletionHandler::complete)
//! or [`fail`](CompletionHandler::fail), with `Cancelled` when dropped
//! unresolved, or with `Cancelled` when the owning connection tears down
//! while the work is still in flight. Whichever comes first wins; the rest
//! are no-ops.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use super::messages::ReplyFailure;

type Continuation<T> = Box<dyn FnOnce(std::result::Result<T, ReplyFailure>) + Send>;

struct Slot<T> {
    continuation: Mutex<Option<Continuation<T>>>,
}

impl<T> Slot<T> {
    /// Run the continuation if it has not run yet. The continuation is
    /// taken under the lock and invoked after releasing it.
    fn fire(&self, result: std::result::Result<T, ReplyFailure>) -> bool {
        let continuation = self.continuation.lock().take();
        match continuation {
            Some(continuation) => {
                continuation(result);
                true
            }
            None => false,
        }
    }
}

trait Cancel: Send + Sync {
    fn cancel(&self, failure: ReplyFailure) -> bool;
}

impl<T: 'static> Cancel for Slot<T> {
    fn cancel(&self, failure: ReplyFailure) -> bool {
        self.fire(Err(failure))
    }
}

#[derive(Default)]
struct RegistryInner {
    next_key: u64,
    handlers: HashMap<u64, Arc<dyn Cancel>>,
    closed: bool,
}

/// Tracks the handlers of one connection so teardown can resolve them.
#[derive(Default)]
pub struct CompletionRegistry {
    inner: Mutex<RegistryInner>,
}

impl CompletionRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Wrap `continuation` in a tracked handler. If the registry has already
    /// been torn down the continuation fires immediately with
    /// `ConnectionClosed`.
    pub fn register<T, F>(self: &Arc<Self>, continuation: F) -> CompletionHandler<T>
    where
        T: 'static,
        F: FnOnce(std::result::Result<T, ReplyFailure>) + Send + 'static,
    {
        let slot: Arc<Slot<T>> = Arc::new(Slot {
            continuation: Mutex::new(Some(Box::new(continuation))),
        });

        let mut inner = self.inner.lock();
        if inner.closed {
            drop(inner);
            tracing::debug!("[Completion] Registry closed, failing new handler");
            slot.fire(Err(ReplyFailure::ConnectionClosed));
            return CompletionHandler {
                slot,
                key: 0,
                registry: Weak::new(),
            };
        }
        let key = inner.next_key;
        inner.next_key += 1;
        inner
            .handlers
            .insert(key, Arc::clone(&slot) as Arc<dyn Cancel>);

        CompletionHandler {
            slot,
            key,
            registry: Arc::downgrade(self),
        }
    }

    /// Handlers registered and not yet resolved.
    pub fn outstanding(&self) -> usize {
        self.inner.lock().handlers.len()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }

    /// Resolve every outstanding handler with `Cancelled` and fail any
    /// registered afterwards. Returns how many handlers were cancelled.
    pub fn cancel_all(&self) -> usize {
        let handlers: Vec<Arc<dyn Cancel>> = {
            let mut inner = self.inner.lock();
            inner.closed = true;
            inner.handlers.drain().map(|(_, handler)| handler).collect()
        };
        let cancelled = handlers
            .iter()
            .filter(|handler| handler.cancel(ReplyFailure::Cancelled))
            .count();
        if cancelled > 0 {
            tracing::info!("[Completion] Cancelled {} in-flight completion(s)", cancelled);
        }
        cancelled
    }

    fn forget(&self, key: u64) {
        self.inner.lock().handlers.remove(&key);
    }
}

impl std::fmt::Debug for CompletionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("CompletionRegistry")
            .field("outstanding", &inner.handlers.len())
            .field("closed", &inner.closed)
            .finish()
    }
}

/// The continuation of one reply-bearing call.
pub struct CompletionHandler<T: 'static> {
    slot: Arc<Slot<T>>,
    key: u64,
    registry: Weak<CompletionRegistry>,
}

impl<T: 'static> CompletionHandler<T> {
    pub fn complete(self, value: T) {
        self.resolve(Ok(value));
    }

    pub fn fail(self, failure: ReplyFailure) {
        self.resolve(Err(failure));
    }

    pub fn resolve(self, result: std::result::Result<T, ReplyFailure>) {
        if !self.slot.fire(result) {
            tracing::debug!("[Completion] Late completion ignored");
        }
    }

    /// Whether the continuation has already run.
    pub fn is_resolved(&self) -> bool {
        self.slot.continuation.lock().is_none()
    }
}

impl<T: 'static> Drop for CompletionHandler<T> {
    fn drop(&mut self) {
        if self.slot.fire(Err(ReplyFailure::Cancelled)) {
            tracing::debug!("[Completion] Handler dropped unresolved, cancelled");
        }
        if let Some(registry) = self.registry.upgrade() {
            registry.forget(self.key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_handler(
        registry: &Arc<CompletionRegistry>,
        calls: &Arc<AtomicUsize>,
        outcome: &Arc<Mutex<Option<std::result::Result<u32, ReplyFailure>>>>,
    ) -> CompletionHandler<u32> {
        let calls = Arc::clone(calls);
        let outcome = Arc::clone(outcome);
        registry.register(move |result| {
            calls.fetch_add(1, Ordering::SeqCst);
            *outcome.lock() = Some(result);
        })
    }

    #[test]
    fn test_complete_fires_once() {
        let registry = CompletionRegistry::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let outcome = Arc::new(Mutex::new(None));

        let handler = counting_handler(&registry, &calls, &outcome);
        assert_eq!(registry.outstanding(), 1);
        handler.complete(7);

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(*outcome.lock(), Some(Ok(7)));
        assert_eq!(registry.outstanding(), 0);
    }

    #[test]
    fn test_drop_cancels() {
        let registry = CompletionRegistry::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let outcome = Arc::new(Mutex::new(None));

        drop(counting_handler(&registry, &calls, &outcome));

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(*outcome.lock(), Some(Err(ReplyFailure::Cancelled)));
    }

    #[test]
    fn test_cancel_all_then_late_complete_is_noop() {
        let registry = CompletionRegistry::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let outcome = Arc::new(Mutex::new(None));

        let handler = counting_handler(&registry, &calls, &outcome);
        assert_eq!(registry.cancel_all(), 1);
        assert!(handler.is_resolved());
        handler.complete(1);

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(*outcome.lock(), Some(Err(ReplyFailure::Cancelled)));
    }

    #[test]
    fn test_register_after_close_fails_immediately() {
        let registry = CompletionRegistry::new();
        registry.cancel_all();

        let calls = Arc::new(AtomicUsize::new(0));
        let outcome = Arc::new(Mutex::new(None));
        let handler = counting_handler(&registry, &calls, &outcome);

        assert!(handler.is_resolved());
        assert_eq!(*outcome.lock(), Some(Err(ReplyFailure::ConnectionClosed)));
        drop(handler);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
