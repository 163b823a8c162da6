// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Creation descriptors as they travel over the wire, and their resolved form.
//!
//! Wire descriptors name other resources by [`ObjectIdentifier`]. Before a
//! descriptor reaches the backing API every embedded identifier is resolved
//! through the [`ObjectRegistry`]; if any of them is unknown (or names the
//! wrong kind of object) the whole conversion fails and the operation that
//! carried the descriptor is abandoned.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::backing::{
    AddressMode, BindGroupLayout, BindingType, Buffer, BufferUsages, Color, Extent3d, FilterMode,
    LoadOp, PipelineLayout, PrimitiveTopology, QueryType, Sampler, ShaderModule, ShaderStages,
    StoreOp, TextureAspect, TextureDimension, TextureFormat, TextureUsages, TextureView,
    TextureViewDimension,
};
use super::identifier::ObjectIdentifier;
use super::registry::ObjectRegistry;

/// Resolve the identifiers embedded in a descriptor to backing resources.
pub trait ConvertFromBacking {
    type Converted;

    /// Returns `None` if any embedded identifier does not resolve.
    fn convert_from_backing(&self, registry: &ObjectRegistry) -> Option<Self::Converted>;
}

/// Descriptors that embed no identifiers convert to themselves.
macro_rules! convert_as_is {
    ($($ty:ty),* $(,)?) => {
        $(
            impl ConvertFromBacking for $ty {
                type Converted = $ty;

                fn convert_from_backing(&self, _registry: &ObjectRegistry) -> Option<Self::Converted> {
                    Some(self.clone())
                }
            }
        )*
    };
}

// ============================================================================
// Descriptors without embedded identifiers
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceDescriptor {
    pub label: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BufferDescriptor {
    pub label: Option<String>,
    pub size: u64,
    pub usage: BufferUsages,
    pub mapped_at_creation: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextureDescriptor {
    pub label: Option<String>,
    pub size: Extent3d,
    pub mip_level_count: u32,
    pub sample_count: u32,
    pub dimension: TextureDimension,
    pub format: TextureFormat,
    pub usage: TextureUsages,
    pub view_formats: Vec<TextureFormat>,
}

impl TextureDescriptor {
    /// Single-mip, single-sample 2D texture.
    pub fn new_2d(width: u32, height: u32, format: TextureFormat, usage: TextureUsages) -> Self {
        Self {
            label: None,
            size: Extent3d::new_2d(width, height),
            mip_level_count: 1,
            sample_count: 1,
            dimension: TextureDimension::D2,
            format,
            usage,
            view_formats: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TextureViewDescriptor {
    pub label: Option<String>,
    pub format: Option<TextureFormat>,
    pub dimension: Option<TextureViewDimension>,
    pub aspect: TextureAspect,
    pub base_mip_level: u32,
    pub mip_level_count: Option<u32>,
    pub base_array_layer: u32,
    pub array_layer_count: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SamplerDescriptor {
    pub label: Option<String>,
    pub address_mode_u: AddressMode,
    pub address_mode_v: AddressMode,
    pub address_mode_w: AddressMode,
    pub mag_filter: FilterMode,
    pub min_filter: FilterMode,
    pub lod_min_clamp: f32,
    pub lod_max_clamp: f32,
}

impl Default for SamplerDescriptor {
    fn default() -> Self {
        Self {
            label: None,
            address_mode_u: AddressMode::default(),
            address_mode_v: AddressMode::default(),
            address_mode_w: AddressMode::default(),
            mag_filter: FilterMode::default(),
            min_filter: FilterMode::default(),
            lod_min_clamp: 0.0,
            lod_max_clamp: 32.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BindGroupLayoutEntry {
    pub binding: u32,
    pub visibility: ShaderStages,
    pub ty: BindingType,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BindGroupLayoutDescriptor {
    pub label: Option<String>,
    pub entries: Vec<BindGroupLayoutEntry>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShaderModuleDescriptor {
    pub label: Option<String>,
    pub code: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandEncoderDescriptor {
    pub label: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandBufferDescriptor {
    pub label: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuerySetDescriptor {
    pub label: Option<String>,
    pub ty: QueryType,
    pub count: u32,
}

convert_as_is!(
    DeviceDescriptor,
    BufferDescriptor,
    TextureDescriptor,
    TextureViewDescriptor,
    SamplerDescriptor,
    BindGroupLayoutDescriptor,
    ShaderModuleDescriptor,
    CommandEncoderDescriptor,
    CommandBufferDescriptor,
    QuerySetDescriptor,
);

// ============================================================================
// Bind groups
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BindingResource {
    Buffer {
        buffer: ObjectIdentifier,
        offset: u64,
        size: Option<u64>,
    },
    Sampler(ObjectIdentifier),
    TextureView(ObjectIdentifier),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BindGroupEntry {
    pub binding: u32,
    pub resource: BindingResource,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BindGroupDescriptor {
    pub label: Option<String>,
    pub layout: ObjectIdentifier,
    pub entries: Vec<BindGroupEntry>,
}

#[derive(Debug, Clone)]
pub enum ResolvedBindingResource {
    Buffer {
        buffer: Arc<dyn Buffer>,
        offset: u64,
        size: Option<u64>,
    },
    Sampler(Arc<dyn Sampler>),
    TextureView(Arc<dyn TextureView>),
}

#[derive(Debug, Clone)]
pub struct ResolvedBindGroupEntry {
    pub binding: u32,
    pub resource: ResolvedBindingResource,
}

#[derive(Debug, Clone)]
pub struct ResolvedBindGroupDescriptor {
    pub label: Option<String>,
    pub layout: Arc<dyn BindGroupLayout>,
    pub entries: Vec<ResolvedBindGroupEntry>,
}

impl ConvertFromBacking for BindGroupEntry {
    type Converted = ResolvedBindGroupEntry;

    fn convert_from_backing(&self, registry: &ObjectRegistry) -> Option<Self::Converted> {
        let resource = match &self.resource {
            BindingResource::Buffer {
                buffer,
                offset,
                size,
            } => ResolvedBindingResource::Buffer {
                buffer: registry.buffer(*buffer)?,
                offset: *offset,
                size: *size,
            },
            BindingResource::Sampler(sampler) => {
                ResolvedBindingResource::Sampler(registry.sampler(*sampler)?)
            }
            BindingResource::TextureView(view) => {
                ResolvedBindingResource::TextureView(registry.texture_view(*view)?)
            }
        };
        Some(ResolvedBindGroupEntry {
            binding: self.binding,
            resource,
        })
    }
}

impl ConvertFromBacking for BindGroupDescriptor {
    type Converted = ResolvedBindGroupDescriptor;

    fn convert_from_backing(&self, registry: &ObjectRegistry) -> Option<Self::Converted> {
        let layout = registry.bind_group_layout(self.layout)?;
        let entries = self
            .entries
            .iter()
            .map(|entry| entry.convert_from_backing(registry))
            .collect::<Option<Vec<_>>>()?;
        Some(ResolvedBindGroupDescriptor {
            label: self.label.clone(),
            layout,
            entries,
        })
    }
}

// ============================================================================
// Pipeline layouts
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineLayoutDescriptor {
    pub label: Option<String>,
    pub bind_group_layouts: Vec<ObjectIdentifier>,
}

#[derive(Debug, Clone)]
pub struct ResolvedPipelineLayoutDescriptor {
    pub label: Option<String>,
    pub bind_group_layouts: Vec<Arc<dyn BindGroupLayout>>,
}

impl ConvertFromBacking for PipelineLayoutDescriptor {
    type Converted = ResolvedPipelineLayoutDescriptor;

    fn convert_from_backing(&self, registry: &ObjectRegistry) -> Option<Self::Converted> {
        let bind_group_layouts = self
            .bind_group_layouts
            .iter()
            .map(|id| registry.bind_group_layout(*id))
            .collect::<Option<Vec<_>>>()?;
        Some(ResolvedPipelineLayoutDescriptor {
            label: self.label.clone(),
            bind_group_layouts,
        })
    }
}

fn resolve_layout(
    registry: &ObjectRegistry,
    layout: Option<ObjectIdentifier>,
) -> Option<Option<Arc<dyn PipelineLayout>>> {
    match layout {
        Some(id) => Some(Some(registry.pipeline_layout(id)?)),
        None => Some(None),
    }
}

// ============================================================================
// Render and compute pipelines
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgrammableStage {
    pub module: ObjectIdentifier,
    pub entry_point: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FragmentState {
    pub stage: ProgrammableStage,
    pub targets: Vec<TextureFormat>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderPipelineDescriptor {
    pub label: Option<String>,
    /// A pipeline layout; `None` derives one from the shaders.
    pub layout: Option<ObjectIdentifier>,
    pub vertex: ProgrammableStage,
    pub fragment: Option<FragmentState>,
    pub primitive: PrimitiveTopology,
}

#[derive(Debug, Clone)]
pub struct ResolvedProgrammableStage {
    pub module: Arc<dyn ShaderModule>,
    pub entry_point: String,
}

#[derive(Debug, Clone)]
pub struct ResolvedFragmentState {
    pub stage: ResolvedProgrammableStage,
    pub targets: Vec<TextureFormat>,
}

#[derive(Debug, Clone)]
pub struct ResolvedRenderPipelineDescriptor {
    pub label: Option<String>,
    pub layout: Option<Arc<dyn PipelineLayout>>,
    pub vertex: ResolvedProgrammableStage,
    pub fragment: Option<ResolvedFragmentState>,
    pub primitive: PrimitiveTopology,
}

impl ConvertFromBacking for ProgrammableStage {
    type Converted = ResolvedProgrammableStage;

    fn convert_from_backing(&self, registry: &ObjectRegistry) -> Option<Self::Converted> {
        Some(ResolvedProgrammableStage {
            module: registry.shader_module(self.module)?,
            entry_point: self.entry_point.clone(),
        })
    }
}

impl ConvertFromBacking for RenderPipelineDescriptor {
    type Converted = ResolvedRenderPipelineDescriptor;

    fn convert_from_backing(&self, registry: &ObjectRegistry) -> Option<Self::Converted> {
        let layout = resolve_layout(registry, self.layout)?;
        let vertex = self.vertex.convert_from_backing(registry)?;
        let fragment = match &self.fragment {
            Some(fragment) => Some(ResolvedFragmentState {
                stage: fragment.stage.convert_from_backing(registry)?,
                targets: fragment.targets.clone(),
            }),
            None => None,
        };
        Some(ResolvedRenderPipelineDescriptor {
            label: self.label.clone(),
            layout,
            vertex,
            fragment,
            primitive: self.primitive,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComputePipelineDescriptor {
    pub label: Option<String>,
    /// A pipeline layout; `None` derives one from the shader.
    pub layout: Option<ObjectIdentifier>,
    pub compute: ProgrammableStage,
}

#[derive(Debug, Clone)]
pub struct ResolvedComputePipelineDescriptor {
    pub label: Option<String>,
    pub layout: Option<Arc<dyn PipelineLayout>>,
    pub compute: ResolvedProgrammableStage,
}

impl ConvertFromBacking for ComputePipelineDescriptor {
    type Converted = ResolvedComputePipelineDescriptor;

    fn convert_from_backing(&self, registry: &ObjectRegistry) -> Option<Self::Converted> {
        Some(ResolvedComputePipelineDescriptor {
            label: self.label.clone(),
            layout: resolve_layout(registry, self.layout)?,
            compute: self.compute.convert_from_backing(registry)?,
        })
    }
}

// ============================================================================
// Render passes
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderPassColorAttachment {
    pub view: ObjectIdentifier,
    pub resolve_target: Option<ObjectIdentifier>,
    pub clear_value: Option<Color>,
    pub load_op: LoadOp,
    pub store_op: StoreOp,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderPassDepthStencilAttachment {
    pub view: ObjectIdentifier,
    pub depth_clear_value: f32,
    pub depth_load_op: Option<LoadOp>,
    pub depth_store_op: Option<StoreOp>,
    pub depth_read_only: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RenderPassDescriptor {
    pub label: Option<String>,
    pub color_attachments: Vec<RenderPassColorAttachment>,
    pub depth_stencil_attachment: Option<RenderPassDepthStencilAttachment>,
    pub max_draw_count: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct ResolvedRenderPassColorAttachment {
    pub view: Arc<dyn TextureView>,
    pub resolve_target: Option<Arc<dyn TextureView>>,
    pub clear_value: Option<Color>,
    pub load_op: LoadOp,
    pub store_op: StoreOp,
}

#[derive(Debug, Clone)]
pub struct ResolvedRenderPassDepthStencilAttachment {
    pub view: Arc<dyn TextureView>,
    pub depth_clear_value: f32,
    pub depth_load_op: Option<LoadOp>,
    pub depth_store_op: Option<StoreOp>,
    pub depth_read_only: bool,
}

#[derive(Debug, Clone)]
pub struct ResolvedRenderPassDescriptor {
    pub label: Option<String>,
    pub color_attachments: Vec<ResolvedRenderPassColorAttachment>,
    pub depth_stencil_attachment: Option<ResolvedRenderPassDepthStencilAttachment>,
    pub max_draw_count: Option<u64>,
}

impl ConvertFromBacking for RenderPassColorAttachment {
    type Converted = ResolvedRenderPassColorAttachment;

    fn convert_from_backing(&self, registry: &ObjectRegistry) -> Option<Self::Converted> {
        let resolve_target = match self.resolve_target {
            Some(id) => Some(registry.texture_view(id)?),
            None => None,
        };
        Some(ResolvedRenderPassColorAttachment {
            view: registry.texture_view(self.view)?,
            resolve_target,
            clear_value: self.clear_value,
            load_op: self.load_op,
            store_op: self.store_op,
        })
    }
}

impl ConvertFromBacking for RenderPassDescriptor {
    type Converted = ResolvedRenderPassDescriptor;

    fn convert_from_backing(&self, registry: &ObjectRegistry) -> Option<Self::Converted> {
        let color_attachments = self
            .color_attachments
            .iter()
            .map(|attachment| attachment.convert_from_backing(registry))
            .collect::<Option<Vec<_>>>()?;
        let depth_stencil_attachment = match &self.depth_stencil_attachment {
            Some(attachment) => Some(ResolvedRenderPassDepthStencilAttachment {
                view: registry.texture_view(attachment.view)?,
                depth_clear_value: attachment.depth_clear_value,
                depth_load_op: attachment.depth_load_op,
                depth_store_op: attachment.depth_store_op,
                depth_read_only: attachment.depth_read_only,
            }),
            None => None,
        };
        Some(ResolvedRenderPassDescriptor {
            label: self.label.clone(),
            color_attachments,
            depth_stencil_attachment,
            max_draw_count: self.max_draw_count,
        })
    }
}

