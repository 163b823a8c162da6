// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Client-side handles to objects living in the privileged process.
//!
//! A handle is an identifier plus the connection it was created on. Every
//! method sends one message and returns without waiting; dropping a handle
//! sends `Destroy`. Identifier-valued descriptor fields are filled from other
//! handles' [`identifier`](RemoteObject::identifier).

mod device;
mod encoders;
mod resources;

pub use device::DeviceHandle;
pub use encoders::{CommandBufferHandle, CommandEncoderHandle, RenderPassEncoderHandle};
pub use resources::{
    BindGroupHandle, BindGroupLayoutHandle, BufferHandle, ComputePipelineHandle,
    PipelineLayoutHandle, QuerySetHandle, RenderPipelineHandle, SamplerHandle,
    ShaderModuleHandle, TextureHandle, TextureViewHandle,
};

use std::sync::Arc;

use crate::core::backing::ObjectKind;
use crate::core::connection::ClientConnection;
use crate::core::identifier::ObjectIdentifier;
use crate::core::messages::{ClientMessage, ProxyMessage};

/// The part every handle shares.
pub struct RemoteObject {
    identifier: ObjectIdentifier,
    kind: ObjectKind,
    connection: Arc<ClientConnection>,
}

impl RemoteObject {
    /// Adopt `identifier`, whose creation message has been or is about to
    /// be sent.
    pub(crate) fn new(
        connection: &Arc<ClientConnection>,
        kind: ObjectKind,
        identifier: ObjectIdentifier,
    ) -> Self {
        Self {
            identifier,
            kind,
            connection: Arc::clone(connection),
        }
    }

    pub fn identifier(&self) -> ObjectIdentifier {
        self.identifier
    }

    pub fn kind(&self) -> ObjectKind {
        self.kind
    }

    pub fn connection(&self) -> &Arc<ClientConnection> {
        &self.connection
    }

    /// Send an operation addressed to this object. A closed connection is
    /// logged, not reported: the privileged side has already torn the
    /// object down.
    pub(crate) fn send(&self, message: ProxyMessage) {
        let name = message.name();
        if let Err(e) = self.connection.send(ClientMessage::Object {
            destination: self.identifier,
            message,
        }) {
            tracing::debug!("[RemoteObject] {} {}: {} not sent: {}", self.kind, self.identifier, name, e);
        }
    }

    pub fn set_label(&self, label: impl Into<String>) {
        self.send(ProxyMessage::SetLabel {
            label: label.into(),
        });
    }
}

impl Drop for RemoteObject {
    fn drop(&mut self) {
        if let Err(e) = self.connection.send(ClientMessage::Destroy {
            identifier: self.identifier,
        }) {
            tracing::debug!("[RemoteObject] Destroy of {} {} not sent: {}", self.kind, self.identifier, e);
        }
    }
}

impl std::fmt::Debug for RemoteObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteObject")
            .field("identifier", &self.identifier)
            .field("kind", &self.kind)
            .finish()
    }
}

/// Declare a handle type wrapping a [`RemoteObject`] of one kind.
macro_rules! remote_handle {
    ($(#[$meta:meta])* $name:ident, $kind:expr) => {
        $(#[$meta])*
        #[derive(Debug)]
        pub struct $name {
            object: $crate::core::client::RemoteObject,
        }

        impl $name {
            pub(crate) fn adopt(
                connection: &::std::sync::Arc<$crate::core::connection::ClientConnection>,
                identifier: $crate::core::identifier::ObjectIdentifier,
            ) -> Self {
                Self {
                    object: $crate::core::client::RemoteObject::new(connection, $kind, identifier),
                }
            }

            pub fn identifier(&self) -> $crate::core::identifier::ObjectIdentifier {
                self.object.identifier()
            }

            pub fn set_label(&self, label: impl Into<String>) {
                self.object.set_label(label);
            }

            pub fn as_remote_object(&self) -> &$crate::core::client::RemoteObject {
                &self.object
            }
        }
    };
}
pub(crate) use remote_handle;
