// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Privileged end of a connection: owns every proxy created through it.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;

use crossbeam_channel::{Receiver, Sender};
use parking_lot::RwLock;

use super::transport::ServerEndpoint;
use crate::core::backing::{Backend, VideoFrame};
use crate::core::completion::CompletionRegistry;
use crate::core::config::ProxyConfig;
use crate::core::descriptors::DeviceDescriptor;
use crate::core::dispatch::DispatchContext;
use crate::core::heap::ObjectHeap;
use crate::core::identifier::{ObjectIdentifier, ReadReference, ReplyId};
use crate::core::messages::{ClientMessage, ProxyMessage, ReplyFailure, ReplyPayload, ServerMessage};
use crate::core::proxies::{CreationClaim, DeviceProxy};
use crate::core::registry::ObjectRegistry;
use crate::core::video_frame::{RemoteVideoFrameObjectHeap, VideoFrameProperties};
use crate::core::{ProxyError, Result};

pub struct ServerConnection {
    name: Arc<str>,
    backend: Arc<dyn Backend>,
    registry: Arc<ObjectRegistry>,
    heap: Arc<ObjectHeap>,
    video_frames: RemoteVideoFrameObjectHeap,
    completions: Arc<CompletionRegistry>,
    /// Taken on teardown so the last outgoing sender goes away with it.
    context: RwLock<Option<DispatchContext>>,
    thread_name_prefix: String,
    live_streams: AtomicUsize,
    torn_down: AtomicBool,
}

impl ServerConnection {
    /// A connection with no inbound streams yet. Replies and events go to
    /// `outgoing`.
    pub fn new(
        backend: Arc<dyn Backend>,
        outgoing: Sender<ServerMessage>,
        config: &ProxyConfig,
    ) -> Arc<Self> {
        let name: Arc<str> = Arc::from(format!("conn-{}", cuid2::create_id()));
        let completions = CompletionRegistry::new();
        let context = DispatchContext::new(Arc::clone(&name), outgoing, Arc::clone(&completions));
        tracing::info!(
            "[Connection] {}: privileged side up on the {} backend",
            name,
            backend.name()
        );
        Arc::new(Self {
            name,
            backend,
            registry: Arc::new(ObjectRegistry::new()),
            heap: Arc::new(ObjectHeap::new(config.max_released_before_creation)),
            video_frames: RemoteVideoFrameObjectHeap::new(),
            completions,
            context: RwLock::new(Some(context)),
            thread_name_prefix: config.thread_name_prefix.clone(),
            live_streams: AtomicUsize::new(0),
            torn_down: AtomicBool::new(false),
        })
    }

    /// Build a connection and start dispatching the endpoint's stream.
    pub fn serve(
        endpoint: ServerEndpoint,
        backend: Arc<dyn Backend>,
        config: &ProxyConfig,
    ) -> Result<Arc<Self>> {
        let connection = Self::new(backend, endpoint.outgoing, config);
        connection.spawn_stream(endpoint.incoming)?;
        Ok(connection)
    }

    /// Dispatch `incoming` on a dedicated thread, in arrival order. The
    /// connection tears down once every stream has ended.
    pub fn spawn_stream(self: &Arc<Self>, incoming: Receiver<ClientMessage>) -> Result<()> {
        if self.is_torn_down() {
            return Err(ProxyError::ConnectionClosed(self.name.to_string()));
        }
        let index = self.live_streams.fetch_add(1, Ordering::SeqCst);
        let connection = Arc::clone(self);
        let spawned = thread::Builder::new()
            .name(format!("{}-dispatch-{}", self.thread_name_prefix, index))
            .spawn(move || {
                for message in incoming.iter() {
                    connection.dispatch(message);
                }
                tracing::debug!("[Connection] {}: stream {} ended", connection.name, index);
                if connection.live_streams.fetch_sub(1, Ordering::SeqCst) == 1 {
                    connection.shutdown();
                }
            });
        if let Err(e) = spawned {
            self.live_streams.fetch_sub(1, Ordering::SeqCst);
            return Err(e.into());
        }
        Ok(())
    }

    /// Apply one client message.
    pub fn dispatch(&self, message: ClientMessage) {
        let Some(context) = self.context.read().clone() else {
            tracing::debug!(
                "[Connection] {}: torn down, ignoring {}",
                self.name,
                message.name()
            );
            return;
        };
        tracing::trace!("[Connection] {}: {}", self.name, message.name());

        match message {
            ClientMessage::CreateDevice {
                descriptor,
                identifier,
            } => self.create_device(&descriptor, identifier),
            ClientMessage::Object {
                destination,
                message,
            } => self.route(&context, destination, message),
            ClientMessage::Destroy { identifier } => {
                self.heap.remove_object(identifier);
            }
            ClientMessage::ReleaseVideoFrame { reference } => {
                self.video_frames.retire(reference);
            }
            ClientMessage::ReleaseUnusedVideoFrame { properties } => {
                self.video_frames.release_unused(&properties);
            }
            ClientMessage::FetchPixelBuffer { reference, reply } => {
                self.fetch_pixel_buffer(&context, reference, reply)
            }
        }
    }

    fn create_device(&self, descriptor: &DeviceDescriptor, identifier: ObjectIdentifier) {
        let Some(claim) =
            CreationClaim::new(Arc::clone(&self.registry), Arc::clone(&self.heap), identifier)
        else {
            return;
        };
        match self.backend.create_device(descriptor) {
            Ok(device) => {
                if let Err(e) = claim.fulfill(device, DeviceProxy::new) {
                    tracing::warn!("[Connection] {}: device {} not inserted: {}", self.name, identifier, e);
                }
            }
            Err(e) => {
                tracing::warn!(
                    "[Connection] {}: device {} creation failed: {}",
                    self.name,
                    identifier,
                    e
                );
            }
        }
    }

    fn route(&self, context: &DispatchContext, destination: ObjectIdentifier, message: ProxyMessage) {
        let Some(proxy) = self.heap.get(destination) else {
            self.abandon_creation(&message);
            context.reject(destination, &message, ReplyFailure::UnknownDestination(destination));
            return;
        };
        if !message.accepted_by(proxy.kind()) {
            self.abandon_creation(&message);
            context.reject_mismatched(destination, proxy.kind(), &message);
            return;
        }
        proxy.did_receive_message(context, message);
    }

    /// A creation that never reached its parent still owes the client's
    /// release a record to consume.
    fn abandon_creation(&self, message: &ProxyMessage) {
        if let Some(identifier) = message.created_identifier() {
            self.heap.record_failed_creation(identifier);
        }
    }

    fn fetch_pixel_buffer(&self, context: &DispatchContext, reference: ReadReference, reply: ReplyId) {
        let buffer = self.video_frames.fetch_pixel_buffer(reference);
        if buffer.is_none() {
            tracing::debug!(
                "[Connection] {}: no pixels for {}, answering empty",
                self.name,
                reference.0
            );
        }
        context.reply(reply, Ok(ReplyPayload::PixelBuffer(buffer)));
    }

    /// Hand `frame` to the client-side destination `destination`.
    pub fn send_video_frame(
        &self,
        destination: ObjectIdentifier,
        frame: Arc<dyn VideoFrame>,
    ) -> Result<VideoFrameProperties> {
        let Some(context) = self.context.read().clone() else {
            return Err(ProxyError::ConnectionClosed(self.name.to_string()));
        };
        let properties = self.video_frames.add(frame);
        context.send(ServerMessage::NewVideoFrame {
            destination,
            properties,
        });
        Ok(properties)
    }

    /// Tear the connection down: resolve every outstanding completion, drop
    /// every proxy and frame, and close the outgoing channel. Idempotent.
    pub fn shutdown(&self) {
        if self.torn_down.swap(true, Ordering::SeqCst) {
            return;
        }
        let cancelled = self.completions.cancel_all();
        let proxies = self.heap.len();
        self.heap.clear();
        self.video_frames.clear();
        let context = self.context.write().take();
        drop(context);
        tracing::info!(
            "[Connection] {}: torn down ({} proxies dropped, {} completions cancelled)",
            self.name,
            proxies,
            cancelled
        );
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn backend(&self) -> &Arc<dyn Backend> {
        &self.backend
    }

    pub fn registry(&self) -> &Arc<ObjectRegistry> {
        &self.registry
    }

    pub fn heap(&self) -> &Arc<ObjectHeap> {
        &self.heap
    }

    pub fn video_frames(&self) -> &RemoteVideoFrameObjectHeap {
        &self.video_frames
    }

    pub fn completions(&self) -> &Arc<CompletionRegistry> {
        &self.completions
    }

    pub fn live_streams(&self) -> usize {
        self.live_streams.load(Ordering::SeqCst)
    }

    pub fn is_torn_down(&self) -> bool {
        self.torn_down.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for ServerConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerConnection")
            .field("name", &self.name)
            .field("backend", &self.backend.name())
            .field("heap", &self.heap)
            .field("registry_len", &self.registry.len())
            .field("live_streams", &self.live_streams())
            .field("torn_down", &self.is_torn_down())
            .finish()
    }
}
