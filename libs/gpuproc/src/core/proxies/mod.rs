// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Privileged-side proxies, one per addressable resource kind.
//!
//! A proxy owns a strong reference to its backing resource, registers that
//! resource in the [`ObjectRegistry`] for as long as it lives, and decodes
//! the operations addressed to its identifier. Proxies are owned by the
//! [`ObjectHeap`]; dropping the heap entry is what ends a proxy's life.

mod command_encoder;
mod device;
mod error_scope;
mod labeled;
mod pipeline;
mod render_pass_encoder;
mod resources;

pub use command_encoder::CommandEncoderProxy;
pub use device::DeviceProxy;
pub use error_scope::ErrorScopeStack;
pub use labeled::{
    BindGroupLayoutProxy, BindGroupProxy, CommandBufferProxy, PipelineLayoutProxy, SamplerProxy,
    ShaderModuleProxy, TextureViewProxy,
};
pub use pipeline::{ComputePipelineProxy, RenderPipelineProxy};
pub use render_pass_encoder::RenderPassEncoderProxy;
pub use resources::{BufferProxy, QuerySetProxy, TextureProxy};

use std::sync::{Arc, Weak};

use super::backing::{BackingObject, GpuResult, ObjectKind};
use super::dispatch::DispatchContext;
use super::error::{ProxyError, Result};
use super::heap::ObjectHeap;
use super::identifier::ObjectIdentifier;
use super::messages::ProxyMessage;
use super::registry::ObjectRegistry;

/// The "decode and apply" contract every proxy kind implements.
pub trait ResourceProxy: Send + Sync {
    fn identifier(&self) -> ObjectIdentifier;

    fn kind(&self) -> ObjectKind;

    /// Apply one operation. Messages for the same identifier arrive in the
    /// order the client sent them.
    fn did_receive_message(&self, context: &DispatchContext, message: ProxyMessage);
}

/// State shared by every proxy kind.
pub struct ProxyBase<T: ?Sized> {
    backing: Arc<T>,
    registry: Arc<ObjectRegistry>,
    heap: Weak<ObjectHeap>,
    identifier: ObjectIdentifier,
}

impl<T: ?Sized> ProxyBase<T>
where
    Arc<T>: Into<BackingObject>,
{
    /// Register `backing` under `identifier`. The entry is removed when the
    /// returned base is dropped.
    pub fn new(
        backing: Arc<T>,
        registry: Arc<ObjectRegistry>,
        heap: Weak<ObjectHeap>,
        identifier: ObjectIdentifier,
    ) -> Result<Self> {
        registry.add_object(identifier, Arc::clone(&backing))?;
        Ok(Self {
            backing,
            registry,
            heap,
            identifier,
        })
    }
}

impl<T: ?Sized> ProxyBase<T> {
    pub fn backing(&self) -> &Arc<T> {
        &self.backing
    }

    pub fn registry(&self) -> &Arc<ObjectRegistry> {
        &self.registry
    }

    pub fn identifier(&self) -> ObjectIdentifier {
        self.identifier
    }

    pub fn heap(&self) -> Weak<ObjectHeap> {
        Weak::clone(&self.heap)
    }

    /// Claim `identifier` for a child this proxy is about to create.
    pub fn claim_child(&self, identifier: ObjectIdentifier) -> Option<CreationClaim> {
        let Some(heap) = self.heap.upgrade() else {
            tracing::debug!(
                "[Proxy] {}: heap gone, not creating {}",
                self.identifier,
                identifier
            );
            return None;
        };
        CreationClaim::new(Arc::clone(&self.registry), heap, identifier)
    }

    /// The shared child-creation protocol.
    ///
    /// `create` resolves the descriptor through the registry and calls the
    /// backing API; it returns `None` when resolution fails, in which case
    /// nothing is created. A backing failure goes to `errors`.
    pub fn create_child<C, P>(
        &self,
        context: &DispatchContext,
        errors: &ErrorScopeStack,
        identifier: ObjectIdentifier,
        create: impl FnOnce(&ObjectRegistry) -> Option<GpuResult<Arc<C>>>,
        wrap: impl FnOnce(ProxyBase<C>) -> P,
    ) where
        C: ?Sized,
        Arc<C>: Into<BackingObject>,
        P: ResourceProxy + 'static,
    {
        let Some(claim) = self.claim_child(identifier) else {
            return;
        };
        let Some(created) = create(claim.registry()) else {
            tracing::warn!(
                "[Proxy] {}: descriptor for child {} did not resolve, dropped",
                self.identifier,
                identifier
            );
            return;
        };
        match created {
            Ok(child) => {
                if let Err(error) = claim.fulfill(child, wrap) {
                    tracing::warn!(
                        "[Proxy] {}: child {} not inserted: {}",
                        self.identifier,
                        identifier,
                        error
                    );
                }
            }
            Err(error) => errors.report(context, error),
        }
    }
}

impl<T: ?Sized> Drop for ProxyBase<T> {
    fn drop(&mut self) {
        self.registry.remove_object(self.identifier);
    }
}

/// Permission to materialize the proxy for one creation message.
///
/// Obtained only if the client has not already released the identifier, so
/// a creation whose release overtook it never builds a proxy. A claim
/// dropped without [`fulfill`](Self::fulfill) marks the creation as failed.
pub struct CreationClaim {
    registry: Arc<ObjectRegistry>,
    heap: Weak<ObjectHeap>,
    identifier: ObjectIdentifier,
    settled: bool,
}

impl CreationClaim {
    pub fn new(
        registry: Arc<ObjectRegistry>,
        heap: Arc<ObjectHeap>,
        identifier: ObjectIdentifier,
    ) -> Option<Self> {
        if heap.is_closed() {
            tracing::debug!("[Proxy] Heap closed, not creating {}", identifier);
            return None;
        }
        if heap.release_unused(identifier) {
            return None;
        }
        Some(Self {
            registry,
            heap: Arc::downgrade(&heap),
            identifier,
            settled: false,
        })
    }

    pub fn identifier(&self) -> ObjectIdentifier {
        self.identifier
    }

    pub fn registry(&self) -> &ObjectRegistry {
        &self.registry
    }

    /// Wrap `backing` in a proxy and hand it to the heap.
    ///
    /// The claim counts as settled even when the heap rejects the proxy.
    pub fn fulfill<T, P>(
        mut self,
        backing: Arc<T>,
        wrap: impl FnOnce(ProxyBase<T>) -> P,
    ) -> Result<()>
    where
        T: ?Sized,
        Arc<T>: Into<BackingObject>,
        P: ResourceProxy + 'static,
    {
        self.settled = true;
        let heap = self.heap.upgrade().ok_or_else(|| {
            ProxyError::ConnectionClosed(format!("heap gone before {} was inserted", self.identifier))
        })?;
        let base = ProxyBase::new(
            backing,
            Arc::clone(&self.registry),
            Weak::clone(&self.heap),
            self.identifier,
        )?;
        heap.add_object(Arc::new(wrap(base)))
    }
}

impl Drop for CreationClaim {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        if let Some(heap) = self.heap.upgrade() {
            heap.record_failed_creation(self.identifier);
        }
    }
}
