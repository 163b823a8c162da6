// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Privileged-side store of frames handed to the client.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use super::properties::{PixelBuffer, VideoFrameProperties};
use crate::core::backing::VideoFrame;
use crate::core::identifier::{
    ObjectIdentifier, ObjectReference, ReadReference, WriteReference,
};

struct Entry {
    frame: Arc<dyn VideoFrame>,
    version: u64,
    reads_observed: u64,
    /// Set once the client's write reference arrived but some of the reads
    /// it was issued after have not been processed yet.
    retire_after_reads: Option<u64>,
}

#[derive(Default)]
pub struct RemoteVideoFrameObjectHeap {
    frames: Mutex<HashMap<ObjectIdentifier, Entry>>,
}

impl RemoteVideoFrameObjectHeap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `frame` under a fresh identifier and describe it for the client.
    pub fn add(&self, frame: Arc<dyn VideoFrame>) -> VideoFrameProperties {
        let reference = ObjectReference::new(ObjectIdentifier::generate(), 0);
        let properties = VideoFrameProperties {
            reference,
            presentation_time: frame.presentation_time(),
            is_mirrored: frame.is_mirrored(),
            rotation: frame.rotation(),
            size: frame.size(),
            pixel_format: frame.pixel_format(),
        };
        self.frames.lock().insert(
            reference.identifier,
            Entry {
                frame,
                version: reference.version,
                reads_observed: 0,
                retire_after_reads: None,
            },
        );
        tracing::debug!("[VideoFrameHeap] Added frame {}", reference);
        properties
    }

    /// Resolve a read reference, counting it as observed.
    pub fn get(&self, read: ReadReference) -> Option<Arc<dyn VideoFrame>> {
        let mut frames = self.frames.lock();
        let identifier = read.identifier();
        let Some(entry) = frames.get_mut(&identifier) else {
            tracing::warn!("[VideoFrameHeap] Read of unknown frame {}", read.0);
            return None;
        };
        if entry.version != read.0.version {
            tracing::warn!(
                "[VideoFrameHeap] Read of {} does not match stored version {}",
                read.0,
                entry.version
            );
            return None;
        }
        entry.reads_observed += 1;
        let frame = Arc::clone(&entry.frame);
        if entry
            .retire_after_reads
            .is_some_and(|pending| entry.reads_observed >= pending)
        {
            let retired = frames.remove(&identifier);
            drop(frames);
            tracing::debug!("[VideoFrameHeap] Retired frame {} after last read", read.0);
            drop(retired);
        }
        Some(frame)
    }

    /// Release a frame, or defer the release until the reads issued before
    /// `write` have been observed. Returns whether the frame was removed now.
    pub fn retire(&self, write: WriteReference) -> bool {
        let mut frames = self.frames.lock();
        let identifier = write.identifier();
        let Some(entry) = frames.get_mut(&identifier) else {
            tracing::warn!("[VideoFrameHeap] Release of unknown frame {}", write.reference);
            return false;
        };
        if entry.reads_observed >= write.pending_reads {
            let retired = frames.remove(&identifier);
            drop(frames);
            tracing::debug!("[VideoFrameHeap] Retired frame {}", write.reference);
            drop(retired);
            return true;
        }
        tracing::debug!(
            "[VideoFrameHeap] Frame {} release waits for {} more read(s)",
            write.reference,
            write.pending_reads - entry.reads_observed
        );
        entry.retire_after_reads = Some(write.pending_reads);
        false
    }

    /// Release a frame whose client-side destination was gone before the
    /// frame could be delivered. No reads were ever issued for it.
    pub fn release_unused(&self, properties: &VideoFrameProperties) -> bool {
        tracing::debug!(
            "[VideoFrameHeap] Frame {} released unused",
            properties.reference
        );
        self.retire(WriteReference {
            reference: properties.reference,
            pending_reads: 0,
        })
    }

    pub fn fetch_pixel_buffer(&self, read: ReadReference) -> Option<PixelBuffer> {
        let frame = self.get(read)?;
        let buffer = frame.pixel_buffer();
        if buffer.is_none() {
            tracing::debug!("[VideoFrameHeap] Frame {} has no pixel buffer", read.0);
        }
        buffer
    }

    pub fn contains(&self, identifier: ObjectIdentifier) -> bool {
        self.frames.lock().contains_key(&identifier)
    }

    pub fn len(&self) -> usize {
        self.frames.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.lock().is_empty()
    }

    pub fn clear(&self) {
        let frames = std::mem::take(&mut *self.frames.lock());
        if !frames.is_empty() {
            tracing::info!("[VideoFrameHeap] Clearing {} frame(s)", frames.len());
        }
    }
}

impl std::fmt::Debug for RemoteVideoFrameObjectHeap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteVideoFrameObjectHeap")
            .field("frames", &self.len())
            .finish()
    }
}
