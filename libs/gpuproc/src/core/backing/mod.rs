// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! The native resource API the proxy layer forwards to.
//!
//! Every backing resource is an object-safe trait held as `Arc<dyn Trait>`.
//! The proxies never look inside them; they only resolve identifiers to them
//! and call through. [`software::SoftwareBackend`] is the in-memory
//! implementation used by tests and the CLI harness.

pub mod software;
mod types;

pub use types::*;

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::descriptors::{
    BindGroupLayoutDescriptor, BufferDescriptor, CommandBufferDescriptor,
    CommandEncoderDescriptor, DeviceDescriptor, QuerySetDescriptor, ResolvedBindGroupDescriptor,
    ResolvedComputePipelineDescriptor, ResolvedPipelineLayoutDescriptor,
    ResolvedRenderPassDescriptor, ResolvedRenderPipelineDescriptor, SamplerDescriptor,
    ShaderModuleDescriptor, TextureDescriptor, TextureViewDescriptor,
};
use super::video_frame::{FrameSize, MediaTime, PixelBuffer, PixelFormat, VideoRotation};

/// The closed set of resource kinds addressable by identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ObjectKind {
    Device,
    Buffer,
    Texture,
    TextureView,
    Sampler,
    BindGroupLayout,
    BindGroup,
    ShaderModule,
    PipelineLayout,
    RenderPipeline,
    ComputePipeline,
    QuerySet,
    CommandEncoder,
    RenderPassEncoder,
    CommandBuffer,
    VideoFrame,
}

impl ObjectKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Device => "Device",
            Self::Buffer => "Buffer",
            Self::Texture => "Texture",
            Self::TextureView => "TextureView",
            Self::Sampler => "Sampler",
            Self::BindGroupLayout => "BindGroupLayout",
            Self::BindGroup => "BindGroup",
            Self::ShaderModule => "ShaderModule",
            Self::PipelineLayout => "PipelineLayout",
            Self::RenderPipeline => "RenderPipeline",
            Self::ComputePipeline => "ComputePipeline",
            Self::QuerySet => "QuerySet",
            Self::CommandEncoder => "CommandEncoder",
            Self::RenderPassEncoder => "RenderPassEncoder",
            Self::CommandBuffer => "CommandBuffer",
            Self::VideoFrame => "VideoFrame",
        }
    }
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Continuation for asynchronous pipeline creation. Called at most once;
/// a backend that drops it without calling it cancels the creation.
pub type PipelineCompletion =
    Box<dyn FnOnce(std::result::Result<Arc<dyn RenderPipeline>, GpuError>) + Send>;

/// [`PipelineCompletion`] for compute pipelines.
pub type ComputePipelineCompletion =
    Box<dyn FnOnce(std::result::Result<Arc<dyn ComputePipeline>, GpuError>) + Send>;

pub type GpuResult<T> = std::result::Result<T, GpuError>;

/// Device factory.
pub trait Backend: Send + Sync + fmt::Debug {
    fn name(&self) -> &str;

    fn create_device(&self, descriptor: &DeviceDescriptor) -> GpuResult<Arc<dyn Device>>;
}

pub trait Device: Send + Sync + fmt::Debug {
    fn set_label(&self, label: &str);

    fn destroy(&self);

    fn create_buffer(&self, descriptor: &BufferDescriptor) -> GpuResult<Arc<dyn Buffer>>;

    fn create_texture(&self, descriptor: &TextureDescriptor) -> GpuResult<Arc<dyn Texture>>;

    fn create_sampler(&self, descriptor: &SamplerDescriptor) -> GpuResult<Arc<dyn Sampler>>;

    fn create_bind_group_layout(
        &self,
        descriptor: &BindGroupLayoutDescriptor,
    ) -> GpuResult<Arc<dyn BindGroupLayout>>;

    fn create_bind_group(
        &self,
        descriptor: &ResolvedBindGroupDescriptor,
    ) -> GpuResult<Arc<dyn BindGroup>>;

    fn create_shader_module(
        &self,
        descriptor: &ShaderModuleDescriptor,
    ) -> GpuResult<Arc<dyn ShaderModule>>;

    fn create_pipeline_layout(
        &self,
        descriptor: &ResolvedPipelineLayoutDescriptor,
    ) -> GpuResult<Arc<dyn PipelineLayout>>;

    fn create_render_pipeline(
        &self,
        descriptor: &ResolvedRenderPipelineDescriptor,
    ) -> GpuResult<Arc<dyn RenderPipeline>>;

    /// Compile a pipeline off the calling thread. `completion` runs once the
    /// work finishes; if the device goes away first it may be dropped
    /// instead.
    fn create_render_pipeline_async(
        &self,
        descriptor: &ResolvedRenderPipelineDescriptor,
        completion: PipelineCompletion,
    );

    fn create_compute_pipeline(
        &self,
        descriptor: &ResolvedComputePipelineDescriptor,
    ) -> GpuResult<Arc<dyn ComputePipeline>>;

    /// Same contract as [`Device::create_render_pipeline_async`].
    fn create_compute_pipeline_async(
        &self,
        descriptor: &ResolvedComputePipelineDescriptor,
        completion: ComputePipelineCompletion,
    );

    fn create_command_encoder(
        &self,
        descriptor: &CommandEncoderDescriptor,
    ) -> GpuResult<Arc<dyn CommandEncoder>>;

    fn create_query_set(&self, descriptor: &QuerySetDescriptor) -> GpuResult<Arc<dyn QuerySet>>;

    fn submit(&self, command_buffers: &[Arc<dyn CommandBuffer>]) -> GpuResult<()>;
}

pub trait Buffer: Send + Sync + fmt::Debug {
    fn set_label(&self, label: &str);

    fn destroy(&self);

    fn size(&self) -> u64;
}

pub trait Texture: Send + Sync + fmt::Debug {
    fn set_label(&self, label: &str);

    /// `None` views the whole texture in its own format.
    fn create_view(
        &self,
        descriptor: Option<&TextureViewDescriptor>,
    ) -> GpuResult<Arc<dyn TextureView>>;

    fn destroy(&self);

    fn format(&self) -> TextureFormat;

    fn size(&self) -> Extent3d;
}

pub trait TextureView: Send + Sync + fmt::Debug {
    fn set_label(&self, label: &str);
}

pub trait Sampler: Send + Sync + fmt::Debug {
    fn set_label(&self, label: &str);
}

pub trait BindGroupLayout: Send + Sync + fmt::Debug {
    fn set_label(&self, label: &str);
}

pub trait BindGroup: Send + Sync + fmt::Debug {
    fn set_label(&self, label: &str);
}

pub trait ShaderModule: Send + Sync + fmt::Debug {
    fn set_label(&self, label: &str);
}

pub trait PipelineLayout: Send + Sync + fmt::Debug {
    fn set_label(&self, label: &str);

    /// The layouts this pipeline layout was built from, in group order.
    fn bind_group_layouts(&self) -> Vec<Arc<dyn BindGroupLayout>>;
}

pub trait RenderPipeline: Send + Sync + fmt::Debug {
    fn set_label(&self, label: &str);

    fn get_bind_group_layout(&self, index: u32) -> GpuResult<Arc<dyn BindGroupLayout>>;
}

pub trait ComputePipeline: Send + Sync + fmt::Debug {
    fn set_label(&self, label: &str);

    fn get_bind_group_layout(&self, index: u32) -> GpuResult<Arc<dyn BindGroupLayout>>;
}

pub trait QuerySet: Send + Sync + fmt::Debug {
    fn set_label(&self, label: &str);

    fn destroy(&self);

    fn query_type(&self) -> QueryType;

    fn count(&self) -> Size32;
}

pub trait CommandEncoder: Send + Sync + fmt::Debug {
    fn set_label(&self, label: &str);

    fn begin_render_pass(
        &self,
        descriptor: &ResolvedRenderPassDescriptor,
    ) -> GpuResult<Arc<dyn RenderPassEncoder>>;

    fn finish(&self, descriptor: &CommandBufferDescriptor) -> GpuResult<Arc<dyn CommandBuffer>>;
}

/// Render pass recording. Individual commands never fail on their own;
/// recording errors surface from [`RenderPassEncoder::end`].
pub trait RenderPassEncoder: Send + Sync + fmt::Debug {
    fn set_label(&self, label: &str);

    fn set_pipeline(&self, pipeline: &Arc<dyn RenderPipeline>);

    fn set_index_buffer(
        &self,
        buffer: &Arc<dyn Buffer>,
        format: IndexFormat,
        offset: Size64,
        size: Option<Size64>,
    );

    fn set_vertex_buffer(
        &self,
        slot: Index32,
        buffer: Option<&Arc<dyn Buffer>>,
        offset: Size64,
        size: Option<Size64>,
    );

    fn draw(
        &self,
        vertex_count: Size32,
        instance_count: Size32,
        first_vertex: Size32,
        first_instance: Size32,
    );

    fn draw_indexed(
        &self,
        index_count: Size32,
        instance_count: Size32,
        first_index: Size32,
        base_vertex: SignedOffset32,
        first_instance: Size32,
    );

    fn draw_indirect(&self, indirect_buffer: &Arc<dyn Buffer>, indirect_offset: Size64);

    fn draw_indexed_indirect(&self, indirect_buffer: &Arc<dyn Buffer>, indirect_offset: Size64);

    fn set_bind_group(
        &self,
        index: Index32,
        bind_group: Option<&Arc<dyn BindGroup>>,
        dynamic_offsets: &[BufferDynamicOffset],
    );

    fn push_debug_group(&self, label: &str);

    fn pop_debug_group(&self);

    fn insert_debug_marker(&self, label: &str);

    fn set_viewport(&self, x: f32, y: f32, width: f32, height: f32, min_depth: f32, max_depth: f32);

    fn set_scissor_rect(
        &self,
        x: IntegerCoordinate,
        y: IntegerCoordinate,
        width: IntegerCoordinate,
        height: IntegerCoordinate,
    );

    fn set_blend_constant(&self, color: Color);

    fn set_stencil_reference(&self, reference: StencilValue);

    fn begin_occlusion_query(&self, query_index: Size32);

    fn end_occlusion_query(&self);

    fn begin_pipeline_statistics_query(&self, query_set: &Arc<dyn QuerySet>, query_index: Size32);

    fn end_pipeline_statistics_query(&self);

    fn end(&self) -> GpuResult<()>;
}

pub trait CommandBuffer: Send + Sync + fmt::Debug {
    fn set_label(&self, label: &str);
}

/// A decoded video frame owned by the privileged process.
pub trait VideoFrame: Send + Sync + fmt::Debug {
    fn presentation_time(&self) -> MediaTime;

    fn is_mirrored(&self) -> bool;

    fn rotation(&self) -> VideoRotation;

    fn size(&self) -> FrameSize;

    fn pixel_format(&self) -> PixelFormat;

    /// Realize the frame's pixels; `None` when the frame has no CPU-mappable
    /// payload.
    fn pixel_buffer(&self) -> Option<PixelBuffer>;
}

/// A backing resource as stored in the object registry.
#[derive(Debug, Clone)]
pub enum BackingObject {
    Device(Arc<dyn Device>),
    Buffer(Arc<dyn Buffer>),
    Texture(Arc<dyn Texture>),
    TextureView(Arc<dyn TextureView>),
    Sampler(Arc<dyn Sampler>),
    BindGroupLayout(Arc<dyn BindGroupLayout>),
    BindGroup(Arc<dyn BindGroup>),
    ShaderModule(Arc<dyn ShaderModule>),
    PipelineLayout(Arc<dyn PipelineLayout>),
    RenderPipeline(Arc<dyn RenderPipeline>),
    ComputePipeline(Arc<dyn ComputePipeline>),
    QuerySet(Arc<dyn QuerySet>),
    CommandEncoder(Arc<dyn CommandEncoder>),
    RenderPassEncoder(Arc<dyn RenderPassEncoder>),
    CommandBuffer(Arc<dyn CommandBuffer>),
}

macro_rules! backing_variants {
    ($($variant:ident => $accessor:ident),* $(,)?) => {
        impl BackingObject {
            pub fn kind(&self) -> ObjectKind {
                match self {
                    $(Self::$variant(_) => ObjectKind::$variant,)*
                }
            }

            $(
                pub fn $accessor(&self) -> Option<Arc<dyn $variant>> {
                    match self {
                        Self::$variant(object) => Some(Arc::clone(object)),
                        _ => None,
                    }
                }
            )*
        }

        $(
            impl From<Arc<dyn $variant>> for BackingObject {
                fn from(object: Arc<dyn $variant>) -> Self {
                    Self::$variant(object)
                }
            }
        )*
    };
}

backing_variants!(
    Device => as_device,
    Buffer => as_buffer,
    Texture => as_texture,
    TextureView => as_texture_view,
    Sampler => as_sampler,
    BindGroupLayout => as_bind_group_layout,
    BindGroup => as_bind_group,
    ShaderModule => as_shader_module,
    PipelineLayout => as_pipeline_layout,
    RenderPipeline => as_render_pipeline,
    ComputePipeline => as_compute_pipeline,
    QuerySet => as_query_set,
    CommandEncoder => as_command_encoder,
    RenderPassEncoder => as_render_pass_encoder,
    CommandBuffer => as_command_buffer,
);
