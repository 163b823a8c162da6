// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! What a proxy sees of its connection while handling a message.

use std::sync::Arc;

use crossbeam_channel::Sender;

use super::backing::ObjectKind;
use super::completion::{CompletionHandler, CompletionRegistry};
use super::identifier::{ObjectIdentifier, ReplyId};
use super::messages::{ProxyMessage, ReplyFailure, ReplyPayload, ServerMessage};

#[derive(Clone)]
pub struct DispatchContext {
    connection_name: Arc<str>,
    outgoing: Sender<ServerMessage>,
    completions: Arc<CompletionRegistry>,
}

impl DispatchContext {
    pub fn new(
        connection_name: impl Into<Arc<str>>,
        outgoing: Sender<ServerMessage>,
        completions: Arc<CompletionRegistry>,
    ) -> Self {
        Self {
            connection_name: connection_name.into(),
            outgoing,
            completions,
        }
    }

    pub fn connection_name(&self) -> &str {
        &self.connection_name
    }

    pub fn completions(&self) -> &Arc<CompletionRegistry> {
        &self.completions
    }

    /// Send an event to the client. A client that has gone away is not an
    /// error here; teardown follows from the closed inbound stream.
    pub fn send(&self, message: ServerMessage) {
        if self.outgoing.send(message).is_err() {
            tracing::debug!(
                "[Dispatch] {}: client gone, dropping outgoing message",
                self.connection_name
            );
        }
    }

    pub fn reply(&self, reply: ReplyId, result: std::result::Result<ReplyPayload, ReplyFailure>) {
        self.send(ServerMessage::Reply { reply, result });
    }

    /// Tracked handler that answers `reply` with `into_payload(value)` on
    /// success, or with the failure.
    pub fn completion_handler<T, F>(&self, reply: ReplyId, into_payload: F) -> CompletionHandler<T>
    where
        T: 'static,
        F: FnOnce(T) -> ReplyPayload + Send + 'static,
    {
        let outgoing = self.outgoing.clone();
        let connection_name = Arc::clone(&self.connection_name);
        self.completions.register(move |result: std::result::Result<T, ReplyFailure>| {
            let message = ServerMessage::Reply {
                reply,
                result: result.map(into_payload),
            };
            if outgoing.send(message).is_err() {
                tracing::debug!(
                    "[Dispatch] {}: client gone before {} was answered",
                    connection_name,
                    reply
                );
            }
        })
    }

    /// Answer a reply-bearing `message` that cannot be delivered. Messages
    /// without a reply are only logged.
    pub fn reject(&self, destination: ObjectIdentifier, message: &ProxyMessage, failure: ReplyFailure) {
        tracing::warn!(
            "[Dispatch] {}: dropping {} for {}: {}",
            self.connection_name,
            message.name(),
            destination,
            failure
        );
        if let Some(reply) = message.reply_id() {
            self.reply(reply, Err(failure));
        }
    }

    /// A message reached a proxy of a kind that does not handle it.
    pub fn reject_mismatched(
        &self,
        destination: ObjectIdentifier,
        kind: ObjectKind,
        message: &ProxyMessage,
    ) {
        tracing::warn!(
            "[Dispatch] {}: {} is a {}, cannot handle {}",
            self.connection_name,
            destination,
            kind,
            message.name()
        );
        if let Some(reply) = message.reply_id() {
            self.reply(reply, Err(ReplyFailure::UnknownDestination(destination)));
        }
    }
}

impl std::fmt::Debug for DispatchContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatchContext")
            .field("connection_name", &self.connection_name)
            .field("completions", &self.completions)
            .finish()
    }
}
