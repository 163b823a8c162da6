// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Client end of a connection: sends requests, correlates replies, and
//! delivers events.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread;
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender};
use parking_lot::{Mutex, RwLock};

use super::transport::ClientEndpoint;
use crate::core::backing::GpuError;
use crate::core::config::ProxyConfig;
use crate::core::identifier::{ObjectIdentifier, ReplyId};
use crate::core::messages::{ClientMessage, ReplyFailure, ReplyPayload, ServerMessage};
use crate::core::video_frame::{
    PixelBufferCallback, PixelBufferResultCallback, RemoteVideoFrameProxy,
};
use crate::core::{ProxyError, Result};

pub type ReplyCallback = Box<dyn FnOnce(std::result::Result<ReplyPayload, ReplyFailure>) + Send>;

/// Receives device errors no error scope captured.
pub type UncapturedErrorHandler = Arc<dyn Fn(ObjectIdentifier, GpuError) + Send + Sync>;

/// Receives frames announced for one destination. Runs on the receive
/// thread, so it must not block on a pixel fetch.
pub type VideoFrameDestination = Arc<dyn Fn(Arc<RemoteVideoFrameProxy>) + Send + Sync>;

#[derive(Default)]
struct PendingReplies {
    callbacks: HashMap<ReplyId, ReplyCallback>,
    closed: bool,
}

pub struct ClientConnection {
    name: String,
    outgoing: RwLock<Option<Sender<ClientMessage>>>,
    pending: Mutex<PendingReplies>,
    next_reply: AtomicU64,
    fetch_timeout: Option<Duration>,
    uncaptured_error_handler: RwLock<Option<UncapturedErrorHandler>>,
    destinations: RwLock<HashMap<ObjectIdentifier, VideoFrameDestination>>,
}

impl ClientConnection {
    /// Take ownership of `endpoint` and start the receive thread.
    pub fn connect(endpoint: ClientEndpoint, config: &ProxyConfig) -> Result<Arc<Self>> {
        let ClientEndpoint { outgoing, incoming } = endpoint;
        let connection = Arc::new(Self {
            name: format!("client-{}", cuid2::create_id()),
            outgoing: RwLock::new(Some(outgoing)),
            pending: Mutex::new(PendingReplies::default()),
            next_reply: AtomicU64::new(1),
            fetch_timeout: config.fetch_timeout(),
            uncaptured_error_handler: RwLock::new(None),
            destinations: RwLock::new(HashMap::new()),
        });

        let weak = Arc::downgrade(&connection);
        thread::Builder::new()
            .name(format!("{}-receive", config.thread_name_prefix))
            .spawn(move || receive_loop(weak, incoming))?;

        tracing::info!("[Connection] {}: client side up", connection.name);
        Ok(connection)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Fire-and-forget send.
    pub fn send(&self, message: ClientMessage) -> Result<()> {
        let outgoing = self.outgoing.read();
        let Some(sender) = outgoing.as_ref() else {
            return Err(ProxyError::ConnectionClosed(self.name.clone()));
        };
        sender
            .send(message)
            .map_err(|_| ProxyError::ConnectionClosed(self.name.clone()))
    }

    /// Send the message `build` makes for a fresh [`ReplyId`] and run
    /// `callback` with its reply. The callback runs exactly once, on the
    /// receive thread, or on the calling thread if the connection is closed.
    pub fn send_with_reply(
        &self,
        build: impl FnOnce(ReplyId) -> ClientMessage,
        callback: impl FnOnce(std::result::Result<ReplyPayload, ReplyFailure>) + Send + 'static,
    ) {
        let reply = ReplyId(self.next_reply.fetch_add(1, Ordering::Relaxed));
        {
            let mut pending = self.pending.lock();
            if pending.closed {
                drop(pending);
                callback(Err(ReplyFailure::ConnectionClosed));
                return;
            }
            pending.callbacks.insert(reply, Box::new(callback));
        }

        if let Err(e) = self.send(build(reply)) {
            tracing::debug!("[Connection] {}: {} not sent: {}", self.name, reply, e);
            let callback = self.pending.lock().callbacks.remove(&reply);
            if let Some(callback) = callback {
                callback(Err(ReplyFailure::ConnectionClosed));
            }
        }
    }

    /// Timeout applied to blocking payload fetches.
    pub fn fetch_timeout(&self) -> Option<Duration> {
        self.fetch_timeout
    }

    pub fn pending_replies(&self) -> usize {
        self.pending.lock().callbacks.len()
    }

    pub fn is_closed(&self) -> bool {
        self.pending.lock().closed
    }

    /// Stop sending and fail every pending reply with `ConnectionClosed`.
    /// The privileged side sees the stream end and tears down.
    pub fn close(&self) {
        self.outgoing.write().take();
        self.fail_pending();
    }

    fn fail_pending(&self) {
        let callbacks: Vec<ReplyCallback> = {
            let mut pending = self.pending.lock();
            pending.closed = true;
            pending.callbacks.drain().map(|(_, callback)| callback).collect()
        };
        if !callbacks.is_empty() {
            tracing::info!(
                "[Connection] {}: failing {} pending repl{}",
                self.name,
                callbacks.len(),
                if callbacks.len() == 1 { "y" } else { "ies" }
            );
        }
        for callback in callbacks {
            callback(Err(ReplyFailure::ConnectionClosed));
        }
    }

    pub fn set_uncaptured_error_handler(
        &self,
        handler: impl Fn(ObjectIdentifier, GpuError) + Send + Sync + 'static,
    ) {
        *self.uncaptured_error_handler.write() = Some(Arc::new(handler));
    }

    /// Allocate an identifier the privileged side can address frames to.
    pub fn register_video_frame_destination(
        &self,
        destination: impl Fn(Arc<RemoteVideoFrameProxy>) + Send + Sync + 'static,
    ) -> ObjectIdentifier {
        let identifier = ObjectIdentifier::generate();
        self.destinations
            .write()
            .insert(identifier, Arc::new(destination));
        identifier
    }

    /// Frames announced for `identifier` afterwards are released unused.
    pub fn unregister_video_frame_destination(&self, identifier: ObjectIdentifier) -> bool {
        self.destinations.write().remove(&identifier).is_some()
    }

    /// The pixel round trip used by frame handles created on this
    /// connection.
    pub fn pixel_buffer_callback(self: &Arc<Self>) -> PixelBufferCallback {
        let weak = Arc::downgrade(self);
        Arc::new(move |reference, done: PixelBufferResultCallback| {
            let Some(connection) = weak.upgrade() else {
                done(None);
                return;
            };
            connection.send_with_reply(
                |reply| ClientMessage::FetchPixelBuffer { reference, reply },
                move |result| match result {
                    Ok(ReplyPayload::PixelBuffer(buffer)) => done(buffer),
                    Ok(other) => {
                        tracing::warn!("[Connection] Pixel fetch answered with {:?}", other);
                        done(None)
                    }
                    Err(failure) => {
                        tracing::debug!("[Connection] Pixel fetch failed: {}", failure);
                        done(None)
                    }
                },
            );
        })
    }

    fn handle(self: &Arc<Self>, message: ServerMessage) {
        match message {
            ServerMessage::Reply { reply, result } => {
                let callback = self.pending.lock().callbacks.remove(&reply);
                match callback {
                    Some(callback) => callback(result),
                    None => tracing::warn!(
                        "[Connection] {}: reply for unknown {}",
                        self.name,
                        reply
                    ),
                }
            }
            ServerMessage::UncapturedError { device, error } => {
                let handler = self.uncaptured_error_handler.read().clone();
                match handler {
                    Some(handler) => handler(device, error),
                    None => tracing::warn!(
                        "[Connection] {}: uncaptured error on device {}: {}",
                        self.name,
                        device,
                        error
                    ),
                }
            }
            ServerMessage::NewVideoFrame {
                destination,
                properties,
            } => {
                let target = self.destinations.read().get(&destination).cloned();
                match target {
                    Some(target) => {
                        let frame = RemoteVideoFrameProxy::create(
                            self,
                            properties,
                            self.pixel_buffer_callback(),
                        );
                        target(frame);
                    }
                    None => RemoteVideoFrameProxy::release_unused(self, properties),
                }
            }
        }
    }
}

fn receive_loop(connection: Weak<ClientConnection>, incoming: Receiver<ServerMessage>) {
    for message in incoming.iter() {
        let Some(connection) = connection.upgrade() else {
            return;
        };
        connection.handle(message);
    }
    if let Some(connection) = connection.upgrade() {
        tracing::info!("[Connection] {}: privileged side closed", connection.name);
        connection.outgoing.write().take();
        connection.fail_pending();
    }
}

impl Drop for ClientConnection {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for ClientConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConnection")
            .field("name", &self.name)
            .field("pending_replies", &self.pending_replies())
            .field("closed", &self.is_closed())
            .field("destinations", &self.destinations.read().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::connection::Transport;
    use std::sync::mpsc;

    #[test]
    fn test_replies_are_correlated_by_id() {
        let (client, server) = Transport::in_process_pair();
        let connection = ClientConnection::connect(client, &ProxyConfig::default()).unwrap();

        let (tx, rx) = mpsc::channel();
        for _ in 0..2 {
            let tx = tx.clone();
            connection.send_with_reply(
                |reply| ClientMessage::FetchPixelBuffer {
                    reference: crate::core::identifier::ReadReference(
                        crate::core::identifier::ObjectReference::new(
                            ObjectIdentifier::generate(),
                            0,
                        ),
                    ),
                    reply,
                },
                move |result| tx.send(result).unwrap(),
            );
        }
        assert_eq!(connection.pending_replies(), 2);

        let first = match server.incoming.recv().unwrap() {
            ClientMessage::FetchPixelBuffer { reply, .. } => reply,
            other => panic!("unexpected {:?}", other),
        };
        let second = match server.incoming.recv().unwrap() {
            ClientMessage::FetchPixelBuffer { reply, .. } => reply,
            other => panic!("unexpected {:?}", other),
        };
        assert_ne!(first, second);

        server
            .outgoing
            .send(ServerMessage::Reply {
                reply: second,
                result: Err(ReplyFailure::Cancelled),
            })
            .unwrap();
        assert_eq!(
            rx.recv_timeout(Duration::from_secs(5)).unwrap(),
            Err(ReplyFailure::Cancelled)
        );
        assert_eq!(connection.pending_replies(), 1);

        drop(server);
        assert_eq!(
            rx.recv_timeout(Duration::from_secs(5)).unwrap(),
            Err(ReplyFailure::ConnectionClosed)
        );
        assert!(connection.is_closed());
    }

    #[test]
    fn test_send_with_reply_after_close_fails_immediately() {
        let (client, _server) = Transport::in_process_pair();
        let connection = ClientConnection::connect(client, &ProxyConfig::default()).unwrap();
        connection.close();

        let (tx, rx) = mpsc::channel();
        connection.send_with_reply(
            |_| unreachable!("closed connections never build the message"),
            move |result| tx.send(result).unwrap(),
        );
        assert_eq!(rx.try_recv().unwrap(), Err(ReplyFailure::ConnectionClosed));
        assert!(connection.send(ClientMessage::Destroy {
            identifier: ObjectIdentifier::generate()
        })
        .is_err());
    }

    #[test]
    fn test_uncaptured_errors_reach_the_handler() {
        let (client, server) = Transport::in_process_pair();
        let connection = ClientConnection::connect(client, &ProxyConfig::default()).unwrap();
        let (tx, rx) = mpsc::channel();
        connection.set_uncaptured_error_handler(move |device, error| {
            tx.send((device, error)).unwrap();
        });

        let device = ObjectIdentifier::generate();
        server
            .outgoing
            .send(ServerMessage::UncapturedError {
                device,
                error: GpuError::validation("bad"),
            })
            .unwrap();
        assert_eq!(
            rx.recv_timeout(Duration::from_secs(5)).unwrap(),
            (device, GpuError::validation("bad"))
        );
    }
}
