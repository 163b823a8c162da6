// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Proxies for resources with explicit storage: buffers, textures and query
//! sets.

use std::sync::Arc;

use crate::core::backing::{Buffer, ObjectKind, QuerySet, Texture};
use crate::core::dispatch::DispatchContext;
use crate::core::identifier::ObjectIdentifier;
use crate::core::messages::{BufferMessage, ProxyMessage, QuerySetMessage, TextureMessage};

use super::{ErrorScopeStack, ProxyBase, ResourceProxy, TextureViewProxy};

pub struct BufferProxy {
    base: ProxyBase<dyn Buffer>,
    errors: Arc<ErrorScopeStack>,
}

impl BufferProxy {
    pub fn new(base: ProxyBase<dyn Buffer>, errors: Arc<ErrorScopeStack>) -> Self {
        Self { base, errors }
    }
}

impl ResourceProxy for BufferProxy {
    fn identifier(&self) -> ObjectIdentifier {
        self.base.identifier()
    }

    fn kind(&self) -> ObjectKind {
        ObjectKind::Buffer
    }

    fn did_receive_message(&self, context: &DispatchContext, message: ProxyMessage) {
        match message {
            ProxyMessage::SetLabel { label } => self.base.backing().set_label(&label),
            ProxyMessage::Buffer(BufferMessage::Destroy) => {
                tracing::debug!(
                    "[Buffer] {} destroyed (device {})",
                    self.base.identifier(),
                    self.errors.device()
                );
                self.base.backing().destroy();
            }
            other => context.reject_mismatched(self.identifier(), self.kind(), &other),
        }
    }
}

pub struct TextureProxy {
    base: ProxyBase<dyn Texture>,
    errors: Arc<ErrorScopeStack>,
}

impl TextureProxy {
    pub fn new(base: ProxyBase<dyn Texture>, errors: Arc<ErrorScopeStack>) -> Self {
        Self { base, errors }
    }
}

impl ResourceProxy for TextureProxy {
    fn identifier(&self) -> ObjectIdentifier {
        self.base.identifier()
    }

    fn kind(&self) -> ObjectKind {
        ObjectKind::Texture
    }

    fn did_receive_message(&self, context: &DispatchContext, message: ProxyMessage) {
        let texture = self.base.backing();
        match message {
            ProxyMessage::SetLabel { label } => texture.set_label(&label),
            ProxyMessage::Texture(TextureMessage::CreateView {
                descriptor,
                identifier,
            }) => self.base.create_child(
                context,
                &self.errors,
                identifier,
                |_| Some(texture.create_view(descriptor.as_ref())),
                TextureViewProxy::new,
            ),
            // Releases the texture's storage only; views already created
            // keep their own proxies.
            ProxyMessage::Texture(TextureMessage::Destroy) => texture.destroy(),
            other => context.reject_mismatched(self.identifier(), self.kind(), &other),
        }
    }
}

pub struct QuerySetProxy {
    base: ProxyBase<dyn QuerySet>,
}

impl QuerySetProxy {
    pub fn new(base: ProxyBase<dyn QuerySet>) -> Self {
        Self { base }
    }
}

impl ResourceProxy for QuerySetProxy {
    fn identifier(&self) -> ObjectIdentifier {
        self.base.identifier()
    }

    fn kind(&self) -> ObjectKind {
        ObjectKind::QuerySet
    }

    fn did_receive_message(&self, context: &DispatchContext, message: ProxyMessage) {
        let query_set = self.base.backing();
        match message {
            ProxyMessage::SetLabel { label } => query_set.set_label(&label),
            ProxyMessage::QuerySet(QuerySetMessage::Destroy) => {
                tracing::debug!(
                    "[QuerySet] {} destroyed ({:?} x{})",
                    self.base.identifier(),
                    query_set.query_type(),
                    query_set.count()
                );
                query_set.destroy();
            }
            other => context.reject_mismatched(self.identifier(), self.kind(), &other),
        }
    }
}
