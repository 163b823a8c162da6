// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Messages exchanged between the client and the privileged process.
//!
//! Operations on existing objects travel as [`ClientMessage::Object`]
//! addressed to an identifier; the payload is a per-kind operation enum.
//! Failures that cross the process boundary are values ([`ReplyFailure`],
//! [`GpuError`]), never transport faults.

use serde::{Deserialize, Serialize};

use super::backing::{Color, ErrorFilter, GpuError, IndexFormat, ObjectKind};
use super::descriptors::{
    BindGroupDescriptor, BindGroupLayoutDescriptor, BufferDescriptor, CommandBufferDescriptor,
    CommandEncoderDescriptor, ComputePipelineDescriptor, DeviceDescriptor,
    PipelineLayoutDescriptor, QuerySetDescriptor, RenderPassDescriptor, RenderPipelineDescriptor,
    SamplerDescriptor, ShaderModuleDescriptor, TextureDescriptor, TextureViewDescriptor,
};
use super::identifier::{ObjectIdentifier, ReadReference, ReplyId, WriteReference};
use super::video_frame::{PixelBuffer, VideoFrameProperties};

// ============================================================================
// Client -> privileged
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ClientMessage {
    /// Create a device under a client-allocated identifier. No reply.
    CreateDevice {
        descriptor: DeviceDescriptor,
        identifier: ObjectIdentifier,
    },
    /// Operation addressed to an existing object.
    Object {
        destination: ObjectIdentifier,
        message: ProxyMessage,
    },
    /// The client dropped its last handle to `identifier`.
    Destroy { identifier: ObjectIdentifier },
    ReleaseVideoFrame { reference: WriteReference },
    /// A frame was announced to a destination the client no longer has.
    ReleaseUnusedVideoFrame { properties: VideoFrameProperties },
    FetchPixelBuffer {
        reference: ReadReference,
        reply: ReplyId,
    },
}

impl ClientMessage {
    pub fn name(&self) -> &'static str {
        match self {
            Self::CreateDevice { .. } => "CreateDevice",
            Self::Object { message, .. } => message.name(),
            Self::Destroy { .. } => "Destroy",
            Self::ReleaseVideoFrame { .. } => "ReleaseVideoFrame",
            Self::ReleaseUnusedVideoFrame { .. } => "ReleaseUnusedVideoFrame",
            Self::FetchPixelBuffer { .. } => "FetchPixelBuffer",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ProxyMessage {
    /// Accepted by every kind.
    SetLabel { label: String },
    Device(DeviceMessage),
    Buffer(BufferMessage),
    Texture(TextureMessage),
    RenderPipeline(RenderPipelineMessage),
    ComputePipeline(ComputePipelineMessage),
    QuerySet(QuerySetMessage),
    CommandEncoder(CommandEncoderMessage),
    RenderPassEncoder(RenderPassEncoderMessage),
}

impl ProxyMessage {
    /// The kind this message is addressed to, or `None` if any kind accepts it.
    pub fn target_kind(&self) -> Option<ObjectKind> {
        match self {
            Self::SetLabel { .. } => None,
            Self::Device(_) => Some(ObjectKind::Device),
            Self::Buffer(_) => Some(ObjectKind::Buffer),
            Self::Texture(_) => Some(ObjectKind::Texture),
            Self::RenderPipeline(_) => Some(ObjectKind::RenderPipeline),
            Self::ComputePipeline(_) => Some(ObjectKind::ComputePipeline),
            Self::QuerySet(_) => Some(ObjectKind::QuerySet),
            Self::CommandEncoder(_) => Some(ObjectKind::CommandEncoder),
            Self::RenderPassEncoder(_) => Some(ObjectKind::RenderPassEncoder),
        }
    }

    pub fn accepted_by(&self, kind: ObjectKind) -> bool {
        self.target_kind().is_none_or(|target| target == kind)
    }

    /// Correlation id if the sender waits for a reply.
    pub fn reply_id(&self) -> Option<ReplyId> {
        match self {
            Self::Device(DeviceMessage::CreateRenderPipelineAsync { reply, .. })
            | Self::Device(DeviceMessage::CreateComputePipelineAsync { reply, .. })
            | Self::Device(DeviceMessage::PopErrorScope { reply }) => Some(*reply),
            _ => None,
        }
    }

    /// Identifier of the object this message creates, if it creates one.
    pub fn created_identifier(&self) -> Option<ObjectIdentifier> {
        match self {
            Self::Device(message) => message.created_identifier(),
            Self::Texture(TextureMessage::CreateView { identifier, .. })
            | Self::RenderPipeline(RenderPipelineMessage::GetBindGroupLayout {
                identifier,
                ..
            })
            | Self::ComputePipeline(ComputePipelineMessage::GetBindGroupLayout {
                identifier,
                ..
            })
            | Self::CommandEncoder(CommandEncoderMessage::BeginRenderPass { identifier, .. })
            | Self::CommandEncoder(CommandEncoderMessage::Finish { identifier, .. }) => {
                Some(*identifier)
            }
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::SetLabel { .. } => "SetLabel",
            Self::Device(message) => message.name(),
            Self::Buffer(BufferMessage::Destroy) => "Buffer.Destroy",
            Self::Texture(TextureMessage::CreateView { .. }) => "Texture.CreateView",
            Self::Texture(TextureMessage::Destroy) => "Texture.Destroy",
            Self::RenderPipeline(RenderPipelineMessage::GetBindGroupLayout { .. }) => {
                "RenderPipeline.GetBindGroupLayout"
            }
            Self::ComputePipeline(ComputePipelineMessage::GetBindGroupLayout { .. }) => {
                "ComputePipeline.GetBindGroupLayout"
            }
            Self::QuerySet(QuerySetMessage::Destroy) => "QuerySet.Destroy",
            Self::CommandEncoder(CommandEncoderMessage::BeginRenderPass { .. }) => {
                "CommandEncoder.BeginRenderPass"
            }
            Self::CommandEncoder(CommandEncoderMessage::Finish { .. }) => "CommandEncoder.Finish",
            Self::RenderPassEncoder(message) => message.name(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DeviceMessage {
    Destroy,
    CreateBuffer {
        descriptor: BufferDescriptor,
        identifier: ObjectIdentifier,
    },
    CreateTexture {
        descriptor: TextureDescriptor,
        identifier: ObjectIdentifier,
    },
    CreateSampler {
        descriptor: SamplerDescriptor,
        identifier: ObjectIdentifier,
    },
    CreateBindGroupLayout {
        descriptor: BindGroupLayoutDescriptor,
        identifier: ObjectIdentifier,
    },
    CreateBindGroup {
        descriptor: BindGroupDescriptor,
        identifier: ObjectIdentifier,
    },
    CreateShaderModule {
        descriptor: ShaderModuleDescriptor,
        identifier: ObjectIdentifier,
    },
    CreatePipelineLayout {
        descriptor: PipelineLayoutDescriptor,
        identifier: ObjectIdentifier,
    },
    CreateComputePipeline {
        descriptor: ComputePipelineDescriptor,
        identifier: ObjectIdentifier,
    },
    /// Replies with [`ReplyPayload::ComputePipelineCreated`].
    CreateComputePipelineAsync {
        descriptor: ComputePipelineDescriptor,
        identifier: ObjectIdentifier,
        reply: ReplyId,
    },
    CreateRenderPipeline {
        descriptor: RenderPipelineDescriptor,
        identifier: ObjectIdentifier,
    },
    /// Replies with [`ReplyPayload::RenderPipelineCreated`].
    CreateRenderPipelineAsync {
        descriptor: RenderPipelineDescriptor,
        identifier: ObjectIdentifier,
        reply: ReplyId,
    },
    CreateCommandEncoder {
        descriptor: CommandEncoderDescriptor,
        identifier: ObjectIdentifier,
    },
    CreateQuerySet {
        descriptor: QuerySetDescriptor,
        identifier: ObjectIdentifier,
    },
    Submit {
        command_buffers: Vec<ObjectIdentifier>,
    },
    PushErrorScope {
        filter: ErrorFilter,
    },
    /// Replies with [`ReplyPayload::ErrorScopePopped`].
    PopErrorScope {
        reply: ReplyId,
    },
}

impl DeviceMessage {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Destroy => "Device.Destroy",
            Self::CreateBuffer { .. } => "Device.CreateBuffer",
            Self::CreateTexture { .. } => "Device.CreateTexture",
            Self::CreateSampler { .. } => "Device.CreateSampler",
            Self::CreateBindGroupLayout { .. } => "Device.CreateBindGroupLayout",
            Self::CreateBindGroup { .. } => "Device.CreateBindGroup",
            Self::CreateShaderModule { .. } => "Device.CreateShaderModule",
            Self::CreatePipelineLayout { .. } => "Device.CreatePipelineLayout",
            Self::CreateComputePipeline { .. } => "Device.CreateComputePipeline",
            Self::CreateComputePipelineAsync { .. } => "Device.CreateComputePipelineAsync",
            Self::CreateRenderPipeline { .. } => "Device.CreateRenderPipeline",
            Self::CreateRenderPipelineAsync { .. } => "Device.CreateRenderPipelineAsync",
            Self::CreateCommandEncoder { .. } => "Device.CreateCommandEncoder",
            Self::CreateQuerySet { .. } => "Device.CreateQuerySet",
            Self::Submit { .. } => "Device.Submit",
            Self::PushErrorScope { .. } => "Device.PushErrorScope",
            Self::PopErrorScope { .. } => "Device.PopErrorScope",
        }
    }

    pub fn created_identifier(&self) -> Option<ObjectIdentifier> {
        match self {
            Self::CreateBuffer { identifier, .. }
            | Self::CreateTexture { identifier, .. }
            | Self::CreateSampler { identifier, .. }
            | Self::CreateBindGroupLayout { identifier, .. }
            | Self::CreateBindGroup { identifier, .. }
            | Self::CreateShaderModule { identifier, .. }
            | Self::CreatePipelineLayout { identifier, .. }
            | Self::CreateComputePipeline { identifier, .. }
            | Self::CreateComputePipelineAsync { identifier, .. }
            | Self::CreateRenderPipeline { identifier, .. }
            | Self::CreateRenderPipelineAsync { identifier, .. }
            | Self::CreateCommandEncoder { identifier, .. }
            | Self::CreateQuerySet { identifier, .. } => Some(*identifier),
            Self::Destroy
            | Self::Submit { .. }
            | Self::PushErrorScope { .. }
            | Self::PopErrorScope { .. } => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BufferMessage {
    Destroy,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TextureMessage {
    /// `None` views the whole texture in its own format.
    CreateView {
        descriptor: Option<TextureViewDescriptor>,
        identifier: ObjectIdentifier,
    },
    Destroy,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RenderPipelineMessage {
    GetBindGroupLayout {
        index: u32,
        identifier: ObjectIdentifier,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ComputePipelineMessage {
    GetBindGroupLayout {
        index: u32,
        identifier: ObjectIdentifier,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum QuerySetMessage {
    Destroy,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CommandEncoderMessage {
    BeginRenderPass {
        descriptor: RenderPassDescriptor,
        identifier: ObjectIdentifier,
    },
    Finish {
        descriptor: CommandBufferDescriptor,
        identifier: ObjectIdentifier,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RenderPassEncoderMessage {
    SetPipeline {
        pipeline: ObjectIdentifier,
    },
    SetIndexBuffer {
        buffer: ObjectIdentifier,
        format: IndexFormat,
        offset: u64,
        size: Option<u64>,
    },
    SetVertexBuffer {
        slot: u32,
        buffer: Option<ObjectIdentifier>,
        offset: u64,
        size: Option<u64>,
    },
    Draw {
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    },
    DrawIndexed {
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        base_vertex: i32,
        first_instance: u32,
    },
    DrawIndirect {
        indirect_buffer: ObjectIdentifier,
        indirect_offset: u64,
    },
    DrawIndexedIndirect {
        indirect_buffer: ObjectIdentifier,
        indirect_offset: u64,
    },
    SetBindGroup {
        index: u32,
        bind_group: Option<ObjectIdentifier>,
        dynamic_offsets: Vec<u32>,
    },
    PushDebugGroup {
        label: String,
    },
    PopDebugGroup,
    InsertDebugMarker {
        label: String,
    },
    SetViewport {
        x: f32,
        y: f32,
        width: f32,
        height: f32,
        min_depth: f32,
        max_depth: f32,
    },
    SetScissorRect {
        x: u32,
        y: u32,
        width: u32,
        height: u32,
    },
    SetBlendConstant {
        color: Color,
    },
    SetStencilReference {
        reference: u32,
    },
    BeginOcclusionQuery {
        query_index: u32,
    },
    EndOcclusionQuery,
    BeginPipelineStatisticsQuery {
        query_set: ObjectIdentifier,
        query_index: u32,
    },
    EndPipelineStatisticsQuery,
    End,
}

impl RenderPassEncoderMessage {
    pub fn name(&self) -> &'static str {
        match self {
            Self::SetPipeline { .. } => "RenderPassEncoder.SetPipeline",
            Self::SetIndexBuffer { .. } => "RenderPassEncoder.SetIndexBuffer",
            Self::SetVertexBuffer { .. } => "RenderPassEncoder.SetVertexBuffer",
            Self::Draw { .. } => "RenderPassEncoder.Draw",
            Self::DrawIndexed { .. } => "RenderPassEncoder.DrawIndexed",
            Self::DrawIndirect { .. } => "RenderPassEncoder.DrawIndirect",
            Self::DrawIndexedIndirect { .. } => "RenderPassEncoder.DrawIndexedIndirect",
            Self::SetBindGroup { .. } => "RenderPassEncoder.SetBindGroup",
            Self::PushDebugGroup { .. } => "RenderPassEncoder.PushDebugGroup",
            Self::PopDebugGroup => "RenderPassEncoder.PopDebugGroup",
            Self::InsertDebugMarker { .. } => "RenderPassEncoder.InsertDebugMarker",
            Self::SetViewport { .. } => "RenderPassEncoder.SetViewport",
            Self::SetScissorRect { .. } => "RenderPassEncoder.SetScissorRect",
            Self::SetBlendConstant { .. } => "RenderPassEncoder.SetBlendConstant",
            Self::SetStencilReference { .. } => "RenderPassEncoder.SetStencilReference",
            Self::BeginOcclusionQuery { .. } => "RenderPassEncoder.BeginOcclusionQuery",
            Self::EndOcclusionQuery => "RenderPassEncoder.EndOcclusionQuery",
            Self::BeginPipelineStatisticsQuery { .. } => {
                "RenderPassEncoder.BeginPipelineStatisticsQuery"
            }
            Self::EndPipelineStatisticsQuery => "RenderPassEncoder.EndPipelineStatisticsQuery",
            Self::End => "RenderPassEncoder.End",
        }
    }
}

// ============================================================================
// Privileged -> client
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ServerMessage {
    Reply {
        reply: ReplyId,
        result: std::result::Result<ReplyPayload, ReplyFailure>,
    },
    /// A device error no error scope captured.
    UncapturedError {
        device: ObjectIdentifier,
        error: GpuError,
    },
    /// A frame handed to a client-side destination.
    NewVideoFrame {
        destination: ObjectIdentifier,
        properties: VideoFrameProperties,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ReplyPayload {
    RenderPipelineCreated,
    ComputePipelineCreated,
    ErrorScopePopped(Option<GpuError>),
    PixelBuffer(Option<PixelBuffer>),
}

/// Why a reply-bearing call did not produce its payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
pub enum ReplyFailure {
    #[error("cancelled before completion")]
    Cancelled,
    #[error("an identifier in the request did not resolve")]
    ResolutionFailed,
    #[error("{0}")]
    Gpu(GpuError),
    #[error("no error scope to pop")]
    NoMatchingErrorScope,
    #[error("no object {0} to receive the request")]
    UnknownDestination(ObjectIdentifier),
    #[error("connection closed")]
    ConnectionClosed,
    #[error("reply payload did not match the request")]
    UnexpectedReply,
}
