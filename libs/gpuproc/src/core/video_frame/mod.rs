// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Remote video frames.
//!
//! The privileged process keeps decoded frames in a
//! [`RemoteVideoFrameObjectHeap`]; the client holds a
//! [`RemoteVideoFrameProxy`] carrying the frame's immutable properties and
//! fetches the pixels lazily, at most one round trip at a time.

mod object_heap;
mod payload_cache;
mod properties;
mod proxy;
mod reference_tracker;

pub use object_heap::RemoteVideoFrameObjectHeap;
pub use payload_cache::PayloadCache;
pub use properties::{
    FrameSize, MediaTime, PixelBuffer, PixelFormat, VideoFrameProperties, VideoRotation,
};
pub use proxy::{PixelBufferCallback, PixelBufferResultCallback, RemoteVideoFrameProxy};
pub use reference_tracker::ReferenceTracker;
