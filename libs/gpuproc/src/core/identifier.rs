// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Process-wide identifiers naming remote resources.

use std::fmt;
use std::num::NonZeroU64;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

static NEXT_IDENTIFIER: AtomicU64 = AtomicU64::new(0);

/// Opaque token naming one logical resource in both processes.
///
/// Identifiers are allocated by whichever side creates the resource and are
/// never handed out twice by the same process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ObjectIdentifier(NonZeroU64);

impl ObjectIdentifier {
    /// Allocate a fresh identifier.
    pub fn generate() -> Self {
        let raw = NEXT_IDENTIFIER.fetch_add(1, Ordering::Relaxed);
        Self(NonZeroU64::MIN.saturating_add(raw))
    }

    /// Rebuild an identifier received from the other process.
    pub fn from_raw(raw: u64) -> Option<Self> {
        NonZeroU64::new(raw).map(Self)
    }

    pub fn to_raw(self) -> u64 {
        self.0.get()
    }
}

impl fmt::Display for ObjectIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// An identifier paired with the version of the object it refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObjectReference {
    pub identifier: ObjectIdentifier,
    pub version: u64,
}

impl ObjectReference {
    pub fn new(identifier: ObjectIdentifier, version: u64) -> Self {
        Self {
            identifier,
            version,
        }
    }
}

impl fmt::Display for ObjectReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.identifier, self.version)
    }
}

/// Grants the holder the right to use an object, not to release it.
///
/// Every read reference handed out must eventually reach the privileged
/// process: the owner's release waits until all of them have been observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadReference(pub ObjectReference);

impl ReadReference {
    pub fn identifier(&self) -> ObjectIdentifier {
        self.0.identifier
    }
}

/// Grants the holder the right to release an object.
///
/// Carries the number of read references issued before it so the privileged
/// side can hold the release back until those reads have been processed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteReference {
    pub reference: ObjectReference,
    pub pending_reads: u64,
}

impl WriteReference {
    pub fn identifier(&self) -> ObjectIdentifier {
        self.reference.identifier
    }
}

/// Correlates a reply-bearing call with its reply on one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReplyId(pub u64);

impl fmt::Display for ReplyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "reply:{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_generated_identifiers_are_unique_across_threads() {
        let handles: Vec<_> = (0..4)
            .map(|_| {
                std::thread::spawn(|| {
                    (0..1000)
                        .map(|_| ObjectIdentifier::generate())
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut seen = HashSet::new();
        for handle in handles {
            for id in handle.join().unwrap() {
                assert!(seen.insert(id), "identifier {} handed out twice", id);
            }
        }
        assert_eq!(seen.len(), 4000);
    }

    #[test]
    fn test_from_raw_rejects_zero() {
        assert!(ObjectIdentifier::from_raw(0).is_none());
        let id = ObjectIdentifier::from_raw(42).unwrap();
        assert_eq!(id.to_raw(), 42);
        assert_eq!(id.to_string(), "#42");
    }
}
