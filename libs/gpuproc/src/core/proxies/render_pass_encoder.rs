// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

use std::sync::Arc;

use crate::core::backing::{ObjectKind, RenderPassEncoder};
use crate::core::dispatch::DispatchContext;
use crate::core::identifier::ObjectIdentifier;
use crate::core::messages::{ProxyMessage, RenderPassEncoderMessage};

use super::{ErrorScopeStack, ProxyBase, ResourceProxy};

/// Forwards recorded render commands.
///
/// A command whose identifier arguments do not resolve is dropped before it
/// reaches the encoder, leaving the encoder's state untouched.
pub struct RenderPassEncoderProxy {
    base: ProxyBase<dyn RenderPassEncoder>,
    errors: Arc<ErrorScopeStack>,
}

impl RenderPassEncoderProxy {
    pub fn new(base: ProxyBase<dyn RenderPassEncoder>, errors: Arc<ErrorScopeStack>) -> Self {
        Self { base, errors }
    }

    fn unresolved(&self, operation: &str, argument: ObjectIdentifier) {
        tracing::warn!(
            "[RenderPassEncoder] {}: {} argument {} did not resolve, dropped",
            self.base.identifier(),
            operation,
            argument
        );
    }

    fn apply(&self, context: &DispatchContext, message: RenderPassEncoderMessage) {
        let encoder = self.base.backing();
        let registry = self.base.registry();
        match message {
            RenderPassEncoderMessage::SetPipeline { pipeline } => {
                match registry.render_pipeline(pipeline) {
                    Some(resolved) => encoder.set_pipeline(&resolved),
                    None => self.unresolved("set_pipeline", pipeline),
                }
            }
            RenderPassEncoderMessage::SetIndexBuffer {
                buffer,
                format,
                offset,
                size,
            } => match registry.buffer(buffer) {
                Some(resolved) => encoder.set_index_buffer(&resolved, format, offset, size),
                None => self.unresolved("set_index_buffer", buffer),
            },
            RenderPassEncoderMessage::SetVertexBuffer {
                slot,
                buffer,
                offset,
                size,
            } => match buffer {
                Some(id) => match registry.buffer(id) {
                    Some(resolved) => encoder.set_vertex_buffer(slot, Some(&resolved), offset, size),
                    None => self.unresolved("set_vertex_buffer", id),
                },
                None => encoder.set_vertex_buffer(slot, None, offset, size),
            },
            RenderPassEncoderMessage::Draw {
                vertex_count,
                instance_count,
                first_vertex,
                first_instance,
            } => encoder.draw(vertex_count, instance_count, first_vertex, first_instance),
            RenderPassEncoderMessage::DrawIndexed {
                index_count,
                instance_count,
                first_index,
                base_vertex,
                first_instance,
            } => encoder.draw_indexed(
                index_count,
                instance_count,
                first_index,
                base_vertex,
                first_instance,
            ),
            RenderPassEncoderMessage::DrawIndirect {
                indirect_buffer,
                indirect_offset,
            } => match registry.buffer(indirect_buffer) {
                Some(resolved) => encoder.draw_indirect(&resolved, indirect_offset),
                None => self.unresolved("draw_indirect", indirect_buffer),
            },
            RenderPassEncoderMessage::DrawIndexedIndirect {
                indirect_buffer,
                indirect_offset,
            } => match registry.buffer(indirect_buffer) {
                Some(resolved) => encoder.draw_indexed_indirect(&resolved, indirect_offset),
                None => self.unresolved("draw_indexed_indirect", indirect_buffer),
            },
            RenderPassEncoderMessage::SetBindGroup {
                index,
                bind_group,
                dynamic_offsets,
            } => match bind_group {
                Some(id) => match registry.bind_group(id) {
                    Some(resolved) => encoder.set_bind_group(index, Some(&resolved), &dynamic_offsets),
                    None => self.unresolved("set_bind_group", id),
                },
                None => encoder.set_bind_group(index, None, &dynamic_offsets),
            },
            RenderPassEncoderMessage::PushDebugGroup { label } => encoder.push_debug_group(&label),
            RenderPassEncoderMessage::PopDebugGroup => encoder.pop_debug_group(),
            RenderPassEncoderMessage::InsertDebugMarker { label } => {
                encoder.insert_debug_marker(&label)
            }
            RenderPassEncoderMessage::SetViewport {
                x,
                y,
                width,
                height,
                min_depth,
                max_depth,
            } => encoder.set_viewport(x, y, width, height, min_depth, max_depth),
            RenderPassEncoderMessage::SetScissorRect {
                x,
                y,
                width,
                height,
            } => encoder.set_scissor_rect(x, y, width, height),
            RenderPassEncoderMessage::SetBlendConstant { color } => {
                encoder.set_blend_constant(color)
            }
            RenderPassEncoderMessage::SetStencilReference { reference } => {
                encoder.set_stencil_reference(reference)
            }
            RenderPassEncoderMessage::BeginOcclusionQuery { query_index } => {
                encoder.begin_occlusion_query(query_index)
            }
            RenderPassEncoderMessage::EndOcclusionQuery => encoder.end_occlusion_query(),
            RenderPassEncoderMessage::BeginPipelineStatisticsQuery {
                query_set,
                query_index,
            } => match registry.query_set(query_set) {
                Some(resolved) => encoder.begin_pipeline_statistics_query(&resolved, query_index),
                None => self.unresolved("begin_pipeline_statistics_query", query_set),
            },
            RenderPassEncoderMessage::EndPipelineStatisticsQuery => {
                encoder.end_pipeline_statistics_query()
            }
            RenderPassEncoderMessage::End => {
                if let Err(error) = encoder.end() {
                    self.errors.report(context, error);
                }
            }
        }
    }
}

impl ResourceProxy for RenderPassEncoderProxy {
    fn identifier(&self) -> ObjectIdentifier {
        self.base.identifier()
    }

    fn kind(&self) -> ObjectKind {
        ObjectKind::RenderPassEncoder
    }

    fn did_receive_message(&self, context: &DispatchContext, message: ProxyMessage) {
        match message {
            ProxyMessage::SetLabel { label } => self.base.backing().set_label(&label),
            ProxyMessage::RenderPassEncoder(message) => self.apply(context, message),
            other => context.reject_mismatched(self.identifier(), self.kind(), &other),
        }
    }
}
