// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

use crate::core::backing::{Color, IndexFormat, ObjectKind};
use crate::core::descriptors::{CommandBufferDescriptor, RenderPassDescriptor};
use crate::core::identifier::ObjectIdentifier;
use crate::core::messages::{CommandEncoderMessage, ProxyMessage, RenderPassEncoderMessage};

use super::remote_handle;
use super::resources::{BindGroupHandle, BufferHandle, QuerySetHandle, RenderPipelineHandle};

remote_handle!(CommandEncoderHandle, ObjectKind::CommandEncoder);
remote_handle!(RenderPassEncoderHandle, ObjectKind::RenderPassEncoder);
remote_handle!(
    /// Submitted through [`DeviceHandle::submit`](super::DeviceHandle::submit).
    CommandBufferHandle,
    ObjectKind::CommandBuffer
);

impl CommandEncoderHandle {
    pub fn begin_render_pass(&self, descriptor: RenderPassDescriptor) -> RenderPassEncoderHandle {
        let identifier = ObjectIdentifier::generate();
        self.object.send(ProxyMessage::CommandEncoder(
            CommandEncoderMessage::BeginRenderPass {
                descriptor,
                identifier,
            },
        ));
        RenderPassEncoderHandle::adopt(self.object.connection(), identifier)
    }

    pub fn finish(&self, descriptor: CommandBufferDescriptor) -> CommandBufferHandle {
        let identifier = ObjectIdentifier::generate();
        self.object
            .send(ProxyMessage::CommandEncoder(CommandEncoderMessage::Finish {
                descriptor,
                identifier,
            }));
        CommandBufferHandle::adopt(self.object.connection(), identifier)
    }
}

impl RenderPassEncoderHandle {
    fn send(&self, message: RenderPassEncoderMessage) {
        self.object.send(ProxyMessage::RenderPassEncoder(message));
    }

    pub fn set_pipeline(&self, pipeline: &RenderPipelineHandle) {
        self.send(RenderPassEncoderMessage::SetPipeline {
            pipeline: pipeline.identifier(),
        });
    }

    pub fn set_index_buffer(
        &self,
        buffer: &BufferHandle,
        format: IndexFormat,
        offset: u64,
        size: Option<u64>,
    ) {
        self.send(RenderPassEncoderMessage::SetIndexBuffer {
            buffer: buffer.identifier(),
            format,
            offset,
            size,
        });
    }

    /// `None` unbinds the slot.
    pub fn set_vertex_buffer(
        &self,
        slot: u32,
        buffer: Option<&BufferHandle>,
        offset: u64,
        size: Option<u64>,
    ) {
        self.send(RenderPassEncoderMessage::SetVertexBuffer {
            slot,
            buffer: buffer.map(BufferHandle::identifier),
            offset,
            size,
        });
    }

    pub fn draw(&self, vertex_count: u32, instance_count: u32, first_vertex: u32, first_instance: u32) {
        self.send(RenderPassEncoderMessage::Draw {
            vertex_count,
            instance_count,
            first_vertex,
            first_instance,
        });
    }

    pub fn draw_indexed(
        &self,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        base_vertex: i32,
        first_instance: u32,
    ) {
        self.send(RenderPassEncoderMessage::DrawIndexed {
            index_count,
            instance_count,
            first_index,
            base_vertex,
            first_instance,
        });
    }

    pub fn draw_indirect(&self, indirect_buffer: &BufferHandle, indirect_offset: u64) {
        self.send(RenderPassEncoderMessage::DrawIndirect {
            indirect_buffer: indirect_buffer.identifier(),
            indirect_offset,
        });
    }

    pub fn draw_indexed_indirect(&self, indirect_buffer: &BufferHandle, indirect_offset: u64) {
        self.send(RenderPassEncoderMessage::DrawIndexedIndirect {
            indirect_buffer: indirect_buffer.identifier(),
            indirect_offset,
        });
    }

    /// `None` unbinds the group at `index`.
    pub fn set_bind_group(
        &self,
        index: u32,
        bind_group: Option<&BindGroupHandle>,
        dynamic_offsets: Vec<u32>,
    ) {
        self.send(RenderPassEncoderMessage::SetBindGroup {
            index,
            bind_group: bind_group.map(BindGroupHandle::identifier),
            dynamic_offsets,
        });
    }

    /// Bind a group by raw identifier, which may name anything.
    pub fn set_bind_group_by_id(
        &self,
        index: u32,
        bind_group: ObjectIdentifier,
        dynamic_offsets: Vec<u32>,
    ) {
        self.send(RenderPassEncoderMessage::SetBindGroup {
            index,
            bind_group: Some(bind_group),
            dynamic_offsets,
        });
    }

    pub fn push_debug_group(&self, label: impl Into<String>) {
        self.send(RenderPassEncoderMessage::PushDebugGroup {
            label: label.into(),
        });
    }

    pub fn pop_debug_group(&self) {
        self.send(RenderPassEncoderMessage::PopDebugGroup);
    }

    pub fn insert_debug_marker(&self, label: impl Into<String>) {
        self.send(RenderPassEncoderMessage::InsertDebugMarker {
            label: label.into(),
        });
    }

    pub fn set_viewport(
        &self,
        x: f32,
        y: f32,
        width: f32,
        height: f32,
        min_depth: f32,
        max_depth: f32,
    ) {
        self.send(RenderPassEncoderMessage::SetViewport {
            x,
            y,
            width,
            height,
            min_depth,
            max_depth,
        });
    }

    pub fn set_scissor_rect(&self, x: u32, y: u32, width: u32, height: u32) {
        self.send(RenderPassEncoderMessage::SetScissorRect {
            x,
            y,
            width,
            height,
        });
    }

    pub fn set_blend_constant(&self, color: Color) {
        self.send(RenderPassEncoderMessage::SetBlendConstant { color });
    }

    pub fn set_stencil_reference(&self, reference: u32) {
        self.send(RenderPassEncoderMessage::SetStencilReference { reference });
    }

    pub fn begin_occlusion_query(&self, query_index: u32) {
        self.send(RenderPassEncoderMessage::BeginOcclusionQuery { query_index });
    }

    pub fn end_occlusion_query(&self) {
        self.send(RenderPassEncoderMessage::EndOcclusionQuery);
    }

    pub fn begin_pipeline_statistics_query(&self, query_set: &QuerySetHandle, query_index: u32) {
        self.send(RenderPassEncoderMessage::BeginPipelineStatisticsQuery {
            query_set: query_set.identifier(),
            query_index,
        });
    }

    pub fn end_pipeline_statistics_query(&self) {
        self.send(RenderPassEncoderMessage::EndPipelineStatisticsQuery);
    }

    pub fn end(&self) {
        self.send(RenderPassEncoderMessage::End);
    }
}
