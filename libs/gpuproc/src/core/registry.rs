// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Identifier to backing-resource lookup table.
//!
//! The registry resolves identifier-valued arguments; it never decides when
//! a resource dies. Each proxy adds its entry when constructed and removes
//! it when dropped, so an identifier is present here exactly while its proxy
//! is alive.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use super::backing::{
    BackingObject, BindGroup, BindGroupLayout, Buffer, CommandBuffer, CommandEncoder,
    ComputePipeline, Device, ObjectKind, PipelineLayout, QuerySet, RenderPassEncoder,
    RenderPipeline, Sampler, ShaderModule, Texture, TextureView,
};
use super::descriptors::ConvertFromBacking;
use super::error::{ProxyError, Result};
use super::identifier::ObjectIdentifier;

#[derive(Debug, Default)]
pub struct ObjectRegistry {
    objects: RwLock<HashMap<ObjectIdentifier, BackingObject>>,
}

macro_rules! typed_lookups {
    ($($method:ident => $accessor:ident: $trait:ident),* $(,)?) => {
        $(
            /// Resolve `identifier`, failing if it is absent or names a
            /// different kind of object.
            pub fn $method(&self, identifier: ObjectIdentifier) -> Option<Arc<dyn $trait>> {
                let object = self.get(identifier)?;
                let resolved = object.$accessor();
                if resolved.is_none() {
                    tracing::warn!(
                        "[ObjectRegistry] {} names a {}, expected a {}",
                        identifier,
                        object.kind(),
                        ObjectKind::$trait
                    );
                }
                resolved
            }
        )*
    };
}

impl ObjectRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `object` under `identifier`.
    ///
    /// A duplicate identifier is a client protocol violation; it is logged
    /// and rejected, leaving the existing entry in place.
    pub fn add_object(
        &self,
        identifier: ObjectIdentifier,
        object: impl Into<BackingObject>,
    ) -> Result<()> {
        let object = object.into();
        let mut objects = self.objects.write();
        if objects.contains_key(&identifier) {
            tracing::error!(
                "[ObjectRegistry] Duplicate identifier {} ({}) rejected",
                identifier,
                object.kind()
            );
            return Err(ProxyError::DuplicateIdentifier(identifier));
        }
        tracing::trace!("[ObjectRegistry] Added {} {}", object.kind(), identifier);
        objects.insert(identifier, object);
        Ok(())
    }

    /// Remove `identifier`. Removing an absent identifier is a logged no-op.
    pub fn remove_object(&self, identifier: ObjectIdentifier) {
        let removed = self.objects.write().remove(&identifier);
        match removed {
            Some(object) => {
                tracing::trace!("[ObjectRegistry] Removed {} {}", object.kind(), identifier)
            }
            None => tracing::warn!(
                "[ObjectRegistry] Remove of unknown identifier {} ignored",
                identifier
            ),
        }
    }

    pub fn get(&self, identifier: ObjectIdentifier) -> Option<BackingObject> {
        self.objects.read().get(&identifier).cloned()
    }

    pub fn kind_of(&self, identifier: ObjectIdentifier) -> Option<ObjectKind> {
        self.objects.read().get(&identifier).map(BackingObject::kind)
    }

    pub fn contains(&self, identifier: ObjectIdentifier) -> bool {
        self.objects.read().contains_key(&identifier)
    }

    pub fn len(&self) -> usize {
        self.objects.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.read().is_empty()
    }

    pub fn identifiers(&self) -> Vec<ObjectIdentifier> {
        self.objects.read().keys().copied().collect()
    }

    /// Resolve every identifier embedded in `descriptor`.
    pub fn convert_from_backing<D: ConvertFromBacking>(&self, descriptor: &D) -> Option<D::Converted> {
        descriptor.convert_from_backing(self)
    }

    typed_lookups!(
        device => as_device: Device,
        buffer => as_buffer: Buffer,
        texture => as_texture: Texture,
        texture_view => as_texture_view: TextureView,
        sampler => as_sampler: Sampler,
        bind_group_layout => as_bind_group_layout: BindGroupLayout,
        bind_group => as_bind_group: BindGroup,
        shader_module => as_shader_module: ShaderModule,
        pipeline_layout => as_pipeline_layout: PipelineLayout,
        render_pipeline => as_render_pipeline: RenderPipeline,
        compute_pipeline => as_compute_pipeline: ComputePipeline,
        query_set => as_query_set: QuerySet,
        command_encoder => as_command_encoder: CommandEncoder,
        render_pass_encoder => as_render_pass_encoder: RenderPassEncoder,
        command_buffer => as_command_buffer: CommandBuffer,
    );
}
