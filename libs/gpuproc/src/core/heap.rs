// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Owning map from identifier to proxy.
//!
//! The heap is the only place proxies are inserted and the only owner that
//! keeps them alive. Removing an entry drops the proxy, which in turn
//! removes its backing resource from the [`ObjectRegistry`](super::registry::ObjectRegistry).
//!
//! A release can overtake the creation it refers to when the two travel on
//! different streams. Such a release finds nothing to remove and leaves a
//! tombstone instead; the creation path consults [`ObjectHeap::release_unused`]
//! before building anything and discards the would-be resource.
//!
//! A creation that fails still leaves the client holding a handle, and that
//! handle's release will find nothing either. Failed creations are recorded
//! so the release consumes the record instead of leaving a tombstone that no
//! creation will ever claim.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use parking_lot::Mutex;

use super::backing::ObjectKind;
use super::error::{ProxyError, Result};
use super::identifier::ObjectIdentifier;
use super::proxies::ResourceProxy;

/// Default cap on outstanding release-before-creation tombstones.
pub const DEFAULT_MAX_RELEASED_BEFORE_CREATION: usize = 4096;

pub struct ObjectHeap {
    inner: Mutex<HeapInner>,
    max_released_before_creation: usize,
}

#[derive(Default)]
struct HeapInner {
    objects: HashMap<ObjectIdentifier, Arc<dyn ResourceProxy>>,
    released_before_creation: IdentifierLedger,
    failed_creations: IdentifierLedger,
    closed: bool,
}

/// Identifiers in insertion order, so the oldest can be evicted first.
#[derive(Default)]
struct IdentifierLedger {
    sequence_of: HashMap<ObjectIdentifier, u64>,
    by_sequence: BTreeMap<u64, ObjectIdentifier>,
    next_sequence: u64,
}

impl IdentifierLedger {
    /// Insert `identifier`, evicting the oldest entry if the ledger already
    /// holds `cap` entries. Returns the evicted identifier.
    fn insert(&mut self, identifier: ObjectIdentifier, cap: usize) -> Option<ObjectIdentifier> {
        if self.sequence_of.contains_key(&identifier) {
            return None;
        }
        let evicted = if self.sequence_of.len() >= cap.max(1) {
            self.by_sequence.pop_first().map(|(_, oldest)| {
                self.sequence_of.remove(&oldest);
                oldest
            })
        } else {
            None
        };
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        self.sequence_of.insert(identifier, sequence);
        self.by_sequence.insert(sequence, identifier);
        evicted
    }

    fn remove(&mut self, identifier: ObjectIdentifier) -> bool {
        match self.sequence_of.remove(&identifier) {
            Some(sequence) => {
                self.by_sequence.remove(&sequence);
                true
            }
            None => false,
        }
    }

    fn len(&self) -> usize {
        self.sequence_of.len()
    }

    fn clear(&mut self) {
        self.sequence_of.clear();
        self.by_sequence.clear();
    }
}

impl Default for ObjectHeap {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_RELEASED_BEFORE_CREATION)
    }
}

impl ObjectHeap {
    pub fn new(max_released_before_creation: usize) -> Self {
        Self {
            inner: Mutex::new(HeapInner::default()),
            max_released_before_creation,
        }
    }

    /// Take ownership of `proxy`.
    ///
    /// Fails if the identifier is already present, if the client released it
    /// before this creation was processed, or if the heap has been cleared.
    /// On failure the proxy is dropped, deregistering itself.
    pub fn add_object(&self, proxy: Arc<dyn ResourceProxy>) -> Result<()> {
        let identifier = proxy.identifier();
        let mut inner = self.inner.lock();
        let rejection = if inner.closed {
            Some(ProxyError::ConnectionClosed(format!(
                "heap cleared before {} {} was inserted",
                proxy.kind(),
                identifier
            )))
        } else if inner.released_before_creation.remove(identifier) {
            Some(ProxyError::ReleasedBeforeCreation(identifier))
        } else if inner.objects.contains_key(&identifier) {
            Some(ProxyError::DuplicateIdentifier(identifier))
        } else {
            None
        };

        if let Some(error) = rejection {
            drop(inner);
            tracing::warn!(
                "[ObjectHeap] Rejected {} {}: {}",
                proxy.kind(),
                identifier,
                error
            );
            drop(proxy);
            return Err(error);
        }

        tracing::debug!("[ObjectHeap] Added {} {}", proxy.kind(), identifier);
        inner.objects.insert(identifier, proxy);
        Ok(())
    }

    /// Drop the proxy for `identifier`.
    ///
    /// If nothing is stored under `identifier`, either its creation failed
    /// (the failure record is consumed) or its creation has not been
    /// processed yet (a tombstone is left so that creation is discarded).
    /// Returns whether a proxy was removed.
    pub fn remove_object(&self, identifier: ObjectIdentifier) -> bool {
        let mut inner = self.inner.lock();
        let removed = inner.objects.remove(&identifier);
        if removed.is_none() && !inner.closed {
            if inner.failed_creations.remove(identifier) {
                tracing::debug!(
                    "[ObjectHeap] {} released after its creation failed",
                    identifier
                );
            } else {
                let evicted = inner
                    .released_before_creation
                    .insert(identifier, self.max_released_before_creation);
                if let Some(evicted) = evicted {
                    tracing::warn!(
                        "[ObjectHeap] {} releases are waiting for their creations, forgetting the oldest ({})",
                        self.max_released_before_creation,
                        evicted
                    );
                }
                tracing::debug!(
                    "[ObjectHeap] {} released before its creation was processed",
                    identifier
                );
            }
        }
        drop(inner);

        match removed {
            Some(proxy) => {
                tracing::debug!("[ObjectHeap] Removed {} {}", proxy.kind(), identifier);
                // Deregistration runs here, outside the heap lock.
                drop(proxy);
                true
            }
            None => false,
        }
    }

    /// Record that the creation of `identifier` failed, so the client's
    /// eventual release of it is absorbed.
    ///
    /// If the release already arrived its tombstone is consumed instead.
    pub fn record_failed_creation(&self, identifier: ObjectIdentifier) {
        let mut inner = self.inner.lock();
        if inner.closed || inner.objects.contains_key(&identifier) {
            return;
        }
        if inner.released_before_creation.remove(identifier) {
            tracing::debug!(
                "[ObjectHeap] Creation of {} failed after its release, nothing left to track",
                identifier
            );
            return;
        }
        if let Some(evicted) = inner
            .failed_creations
            .insert(identifier, self.max_released_before_creation)
        {
            tracing::warn!(
                "[ObjectHeap] {} failed creations are still unreleased, forgetting the oldest ({})",
                self.max_released_before_creation,
                evicted
            );
        }
        tracing::debug!("[ObjectHeap] Creation of {} failed", identifier);
    }

    /// Consume a release that overtook the creation of `identifier`.
    ///
    /// Creation paths call this before building anything. `true` means the
    /// client already let go of `identifier`: the would-be resource must be
    /// discarded and no proxy materialized.
    pub fn release_unused(&self, identifier: ObjectIdentifier) -> bool {
        let released = self
            .inner
            .lock()
            .released_before_creation
            .remove(identifier);
        if released {
            tracing::debug!(
                "[ObjectHeap] Discarding creation of {}: already released",
                identifier
            );
        }
        released
    }

    pub fn get(&self, identifier: ObjectIdentifier) -> Option<Arc<dyn ResourceProxy>> {
        self.inner.lock().objects.get(&identifier).cloned()
    }

    pub fn kind_of(&self, identifier: ObjectIdentifier) -> Option<ObjectKind> {
        self.inner
            .lock()
            .objects
            .get(&identifier)
            .map(|proxy| proxy.kind())
    }

    pub fn contains(&self, identifier: ObjectIdentifier) -> bool {
        self.inner.lock().objects.contains_key(&identifier)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().objects.is_empty()
    }

    pub fn identifiers(&self) -> Vec<ObjectIdentifier> {
        self.inner.lock().objects.keys().copied().collect()
    }

    /// Number of releases still waiting for their creation.
    pub fn pending_releases(&self) -> usize {
        self.inner.lock().released_before_creation.len()
    }

    /// Number of failed creations whose release has not arrived yet.
    pub fn failed_creations(&self) -> usize {
        self.inner.lock().failed_creations.len()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }

    /// Drop every proxy and refuse further inserts. Used on connection
    /// teardown.
    pub fn clear(&self) {
        let objects = {
            let mut inner = self.inner.lock();
            inner.closed = true;
            inner.released_before_creation.clear();
            inner.failed_creations.clear();
            std::mem::take(&mut inner.objects)
        };
        if !objects.is_empty() {
            tracing::info!("[ObjectHeap] Clearing {} proxies", objects.len());
        }
        drop(objects);
    }
}

impl std::fmt::Debug for ObjectHeap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("ObjectHeap")
            .field("objects", &inner.objects.len())
            .field("released_before_creation", &inner.released_before_creation.len())
            .field("failed_creations", &inner.failed_creations.len())
            .field("closed", &inner.closed)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(count: usize) -> Vec<ObjectIdentifier> {
        (0..count).map(|_| ObjectIdentifier::generate()).collect()
    }

    #[test]
    fn test_ledger_evicts_oldest_first() {
        let mut ledger = IdentifierLedger::default();
        let ids = ids(3);
        assert_eq!(ledger.insert(ids[0], 2), None);
        assert_eq!(ledger.insert(ids[1], 2), None);
        assert_eq!(ledger.insert(ids[2], 2), Some(ids[0]));
        assert_eq!(ledger.len(), 2);
        assert!(!ledger.remove(ids[0]));
        assert!(ledger.remove(ids[1]));
        assert!(ledger.remove(ids[2]));
    }

    #[test]
    fn test_ledger_ignores_duplicates() {
        let mut ledger = IdentifierLedger::default();
        let ids = ids(2);
        ledger.insert(ids[0], 2);
        ledger.insert(ids[1], 2);
        assert_eq!(ledger.insert(ids[0], 2), None);
        assert_eq!(ledger.len(), 2);
    }

    #[test]
    fn test_release_consumes_failed_creation() {
        let heap = ObjectHeap::new(8);
        let id = ObjectIdentifier::generate();
        heap.record_failed_creation(id);
        assert_eq!(heap.failed_creations(), 1);

        assert!(!heap.remove_object(id));
        assert_eq!(heap.failed_creations(), 0);
        assert_eq!(heap.pending_releases(), 0);
    }

    #[test]
    fn test_failed_creation_consumes_earlier_release() {
        let heap = ObjectHeap::new(8);
        let id = ObjectIdentifier::generate();
        heap.remove_object(id);
        assert_eq!(heap.pending_releases(), 1);

        heap.record_failed_creation(id);
        assert_eq!(heap.pending_releases(), 0);
        assert_eq!(heap.failed_creations(), 0);
    }

    #[test]
    fn test_clear_forgets_both_ledgers() {
        let heap = ObjectHeap::new(8);
        let ids = ids(2);
        heap.remove_object(ids[0]);
        heap.record_failed_creation(ids[1]);
        heap.clear();
        assert_eq!(heap.pending_releases(), 0);
        assert_eq!(heap.failed_creations(), 0);

        heap.record_failed_creation(ids[1]);
        assert_eq!(heap.failed_creations(), 0);
    }
}
