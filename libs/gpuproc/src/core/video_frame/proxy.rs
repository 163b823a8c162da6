// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Client-side handle to a frame living in the privileged process.

use std::future::Future;
use std::sync::Arc;

use super::payload_cache::PayloadCache;
use super::properties::{
    FrameSize, MediaTime, PixelBuffer, PixelFormat, VideoFrameProperties, VideoRotation,
};
use super::reference_tracker::ReferenceTracker;
use crate::core::connection::ClientConnection;
use crate::core::identifier::{ObjectIdentifier, ReadReference, WriteReference};
use crate::core::messages::ClientMessage;

/// Receives the fetched pixels. Always called exactly once, possibly on
/// another thread, with `None` when the pixels cannot be produced.
pub type PixelBufferResultCallback = Box<dyn FnOnce(Option<PixelBuffer>) + Send>;

/// Performs the pixel round trip for a read reference.
pub type PixelBufferCallback = Arc<dyn Fn(ReadReference, PixelBufferResultCallback) + Send + Sync>;

pub struct RemoteVideoFrameProxy {
    connection: Arc<ClientConnection>,
    tracker: ReferenceTracker,
    presentation_time: MediaTime,
    is_mirrored: bool,
    rotation: VideoRotation,
    size: FrameSize,
    pixel_format: PixelFormat,
    pixel_buffer: Arc<PayloadCache<Arc<PixelBuffer>>>,
    pixel_buffer_callback: PixelBufferCallback,
}

impl RemoteVideoFrameProxy {
    /// Adopt the reference carried by `properties`. Dropping the returned
    /// handle releases the frame.
    pub fn create(
        connection: &Arc<ClientConnection>,
        properties: VideoFrameProperties,
        pixel_buffer_callback: PixelBufferCallback,
    ) -> Arc<Self> {
        Arc::new(Self {
            connection: Arc::clone(connection),
            tracker: ReferenceTracker::new(properties.reference),
            presentation_time: properties.presentation_time,
            is_mirrored: properties.is_mirrored,
            rotation: properties.rotation,
            size: properties.size,
            pixel_format: properties.pixel_format,
            pixel_buffer: PayloadCache::new(),
            pixel_buffer_callback,
        })
    }

    /// Release a frame whose destination went away before the frame was
    /// delivered, without constructing a handle.
    pub fn release_unused(connection: &ClientConnection, properties: VideoFrameProperties) {
        tracing::debug!(
            "[VideoFrameProxy] Releasing unused frame {}",
            properties.reference
        );
        if let Err(error) =
            connection.send(ClientMessage::ReleaseUnusedVideoFrame { properties })
        {
            tracing::debug!("[VideoFrameProxy] Release of unused frame not sent: {}", error);
        }
    }

    pub fn identifier(&self) -> ObjectIdentifier {
        self.tracker.identifier()
    }

    /// A reference permitting use but not release. It must be sent to the
    /// privileged process.
    pub fn read(&self) -> ReadReference {
        self.tracker.read()
    }

    pub fn write(&self) -> WriteReference {
        self.tracker.write()
    }

    pub fn presentation_time(&self) -> MediaTime {
        self.presentation_time
    }

    pub fn is_mirrored(&self) -> bool {
        self.is_mirrored
    }

    pub fn rotation(&self) -> VideoRotation {
        self.rotation
    }

    pub fn size(&self) -> FrameSize {
        self.size
    }

    pub fn pixel_format(&self) -> PixelFormat {
        self.pixel_format
    }

    pub fn properties(&self) -> VideoFrameProperties {
        VideoFrameProperties {
            reference: self.tracker.reference(),
            presentation_time: self.presentation_time,
            is_mirrored: self.is_mirrored,
            rotation: self.rotation,
            size: self.size,
            pixel_format: self.pixel_format,
        }
    }

    /// Pixels already fetched, without a round trip.
    pub fn cached_pixel_buffer(&self) -> Option<Arc<PixelBuffer>> {
        self.pixel_buffer.cached()
    }

    /// Number of pixel round trips this handle has issued.
    pub fn pixel_buffer_requests(&self) -> u64 {
        self.pixel_buffer.requests()
    }

    /// Callers currently waiting on the in-flight pixel round trip.
    pub fn pixel_buffer_waiters(&self) -> usize {
        self.pixel_buffer.waiting()
    }

    fn fetch(&self, resolve: Box<dyn FnOnce(Option<Arc<PixelBuffer>>) + Send>) {
        let read = self.tracker.read();
        tracing::debug!("[VideoFrameProxy] Fetching pixels for {}", read.0);
        (self.pixel_buffer_callback)(read, Box::new(move |buffer| resolve(buffer.map(Arc::new))));
    }

    /// Return the pixels, blocking the calling thread on a round trip if
    /// they are not cached yet.
    ///
    /// Must not be called from the connection's receive thread (for example
    /// inside a frame destination callback): the reply is delivered there.
    pub fn pixel_buffer(&self) -> Option<Arc<PixelBuffer>> {
        self.pixel_buffer
            .get_blocking(|resolve| self.fetch(resolve), self.connection.fetch_timeout())
    }

    /// Deliver the pixels to `callback` once available. The callback runs
    /// exactly once, with `None` if the fetch fails.
    pub fn pixel_buffer_async(
        &self,
        callback: impl FnOnce(Option<Arc<PixelBuffer>>) + Send + 'static,
    ) {
        self.pixel_buffer
            .get_async(|resolve| self.fetch(resolve), callback);
    }

    pub fn pixel_buffer_future(&self) -> impl Future<Output = Option<Arc<PixelBuffer>>> + use<> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.pixel_buffer_async(move |buffer| {
            let _ = tx.send(buffer);
        });
        async move { rx.await.ok().flatten() }
    }
}

impl Drop for RemoteVideoFrameProxy {
    fn drop(&mut self) {
        let reference = self.tracker.write();
        tracing::debug!("[VideoFrameProxy] Releasing frame {}", reference.reference);
        if let Err(error) = self
            .connection
            .send(ClientMessage::ReleaseVideoFrame { reference })
        {
            tracing::debug!("[VideoFrameProxy] Release not sent: {}", error);
        }
    }
}

impl std::fmt::Debug for RemoteVideoFrameProxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteVideoFrameProxy")
            .field("reference", &self.tracker.reference())
            .field("presentation_time", &self.presentation_time)
            .field("size", &self.size)
            .field("pixel_format", &self.pixel_format)
            .field("pixel_buffer", &self.pixel_buffer)
            .finish()
    }
}
