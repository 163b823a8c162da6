// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

use std::sync::atomic::{AtomicU64, Ordering};

use crate::core::identifier::{ObjectIdentifier, ObjectReference, ReadReference, WriteReference};

/// Issues read and write references for one remote object.
///
/// Each read reference is counted. The write reference carries that count
/// so the privileged side can hold the release back until it has processed
/// every read issued before it.
#[derive(Debug)]
pub struct ReferenceTracker {
    reference: ObjectReference,
    reads: AtomicU64,
}

impl ReferenceTracker {
    pub fn new(reference: ObjectReference) -> Self {
        Self {
            reference,
            reads: AtomicU64::new(0),
        }
    }

    pub fn identifier(&self) -> ObjectIdentifier {
        self.reference.identifier
    }

    pub fn reference(&self) -> ObjectReference {
        self.reference
    }

    /// Issue a read reference. It must be sent to the privileged process;
    /// a read that never arrives delays the release until teardown.
    pub fn read(&self) -> ReadReference {
        self.reads.fetch_add(1, Ordering::AcqRel);
        ReadReference(self.reference)
    }

    pub fn write(&self) -> WriteReference {
        WriteReference {
            reference: self.reference,
            pending_reads: self.reads.load(Ordering::Acquire),
        }
    }

    pub fn reads_issued(&self) -> u64 {
        self.reads.load(Ordering::Acquire)
    }
}
