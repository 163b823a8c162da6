// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

use std::sync::Arc;

use crate::core::backing::{BackingObject, Device, GpuResult, ObjectKind};
use crate::core::completion::CompletionHandler;
use crate::core::descriptors::{ComputePipelineDescriptor, RenderPipelineDescriptor};
use crate::core::dispatch::DispatchContext;
use crate::core::identifier::{ObjectIdentifier, ReplyId};
use crate::core::messages::{DeviceMessage, ProxyMessage, ReplyFailure, ReplyPayload};

use super::{
    BindGroupLayoutProxy, BindGroupProxy, BufferProxy, CommandEncoderProxy,
    ComputePipelineProxy, CreationClaim, ErrorScopeStack, PipelineLayoutProxy, ProxyBase,
    QuerySetProxy, RenderPipelineProxy, ResourceProxy, SamplerProxy, ShaderModuleProxy,
    TextureProxy,
};

pub struct DeviceProxy {
    base: ProxyBase<dyn Device>,
    errors: Arc<ErrorScopeStack>,
}

/// Settle an asynchronous pipeline creation once the backend finishes.
///
/// The claim is taken when the request arrives, so a release that lands
/// while the pipeline compiles is seen by `fulfill` and the pipeline is
/// discarded. A failed or abandoned compile drops the claim unfulfilled.
fn settle_async_pipeline<T, P>(
    claim: CreationClaim,
    handler: CompletionHandler<()>,
    result: GpuResult<Arc<T>>,
    wrap: impl FnOnce(ProxyBase<T>) -> P,
) where
    T: ?Sized,
    Arc<T>: Into<BackingObject>,
    P: ResourceProxy + 'static,
{
    let identifier = claim.identifier();
    match result {
        Ok(pipeline) => match claim.fulfill(pipeline, wrap) {
            Ok(()) => handler.complete(()),
            Err(error) => {
                tracing::warn!(
                    "[Device] Async pipeline {} not inserted: {}",
                    identifier,
                    error
                );
                handler.fail(ReplyFailure::Cancelled);
            }
        },
        Err(error) => {
            drop(claim);
            handler.fail(ReplyFailure::Gpu(error));
        }
    }
}

impl DeviceProxy {
    pub fn new(base: ProxyBase<dyn Device>) -> Self {
        let errors = Arc::new(ErrorScopeStack::new(base.identifier()));
        Self { base, errors }
    }

    pub fn error_scopes(&self) -> &Arc<ErrorScopeStack> {
        &self.errors
    }

    fn unresolved_async(&self, identifier: ObjectIdentifier, handler: CompletionHandler<()>) {
        tracing::warn!(
            "[Device] {}: async pipeline {} descriptor did not resolve",
            self.base.identifier(),
            identifier
        );
        handler.fail(ReplyFailure::ResolutionFailed);
    }

    fn create_render_pipeline_async(
        &self,
        context: &DispatchContext,
        descriptor: RenderPipelineDescriptor,
        identifier: ObjectIdentifier,
        reply: ReplyId,
    ) {
        let handler = context.completion_handler(reply, |()| ReplyPayload::RenderPipelineCreated);
        let Some(claim) = self.base.claim_child(identifier) else {
            handler.fail(ReplyFailure::Cancelled);
            return;
        };
        let Some(resolved) = claim.registry().convert_from_backing(&descriptor) else {
            drop(claim);
            self.unresolved_async(identifier, handler);
            return;
        };

        let errors = Arc::clone(&self.errors);
        self.base.backing().create_render_pipeline_async(
            &resolved,
            Box::new(move |result| {
                settle_async_pipeline(claim, handler, result, |base| {
                    RenderPipelineProxy::new(base, errors)
                })
            }),
        );
    }

    fn create_compute_pipeline_async(
        &self,
        context: &DispatchContext,
        descriptor: ComputePipelineDescriptor,
        identifier: ObjectIdentifier,
        reply: ReplyId,
    ) {
        let handler = context.completion_handler(reply, |()| ReplyPayload::ComputePipelineCreated);
        let Some(claim) = self.base.claim_child(identifier) else {
            handler.fail(ReplyFailure::Cancelled);
            return;
        };
        let Some(resolved) = claim.registry().convert_from_backing(&descriptor) else {
            drop(claim);
            self.unresolved_async(identifier, handler);
            return;
        };

        let errors = Arc::clone(&self.errors);
        self.base.backing().create_compute_pipeline_async(
            &resolved,
            Box::new(move |result| {
                settle_async_pipeline(claim, handler, result, |base| {
                    ComputePipelineProxy::new(base, errors)
                })
            }),
        );
    }

    fn submit(&self, context: &DispatchContext, command_buffers: Vec<ObjectIdentifier>) {
        let registry = self.base.registry();
        let Some(resolved) = command_buffers
            .iter()
            .map(|id| registry.command_buffer(*id))
            .collect::<Option<Vec<_>>>()
        else {
            tracing::warn!(
                "[Device] {}: submit references an unknown command buffer, dropped",
                self.base.identifier()
            );
            return;
        };
        if let Err(error) = self.base.backing().submit(&resolved) {
            self.errors.report(context, error);
        }
    }
}

impl ResourceProxy for DeviceProxy {
    fn identifier(&self) -> ObjectIdentifier {
        self.base.identifier()
    }

    fn kind(&self) -> ObjectKind {
        ObjectKind::Device
    }

    fn did_receive_message(&self, context: &DispatchContext, message: ProxyMessage) {
        let device = self.base.backing();
        let errors = &self.errors;
        let message = match message {
            ProxyMessage::SetLabel { label } => {
                device.set_label(&label);
                return;
            }
            ProxyMessage::Device(message) => message,
            other => {
                context.reject_mismatched(self.identifier(), self.kind(), &other);
                return;
            }
        };

        match message {
            DeviceMessage::Destroy => device.destroy(),
            DeviceMessage::CreateBuffer {
                descriptor,
                identifier,
            } => self.base.create_child(
                context,
                errors,
                identifier,
                |_| Some(device.create_buffer(&descriptor)),
                |base| BufferProxy::new(base, Arc::clone(errors)),
            ),
            DeviceMessage::CreateTexture {
                descriptor,
                identifier,
            } => self.base.create_child(
                context,
                errors,
                identifier,
                |_| Some(device.create_texture(&descriptor)),
                |base| TextureProxy::new(base, Arc::clone(errors)),
            ),
            DeviceMessage::CreateSampler {
                descriptor,
                identifier,
            } => self.base.create_child(
                context,
                errors,
                identifier,
                |_| Some(device.create_sampler(&descriptor)),
                SamplerProxy::new,
            ),
            DeviceMessage::CreateBindGroupLayout {
                descriptor,
                identifier,
            } => self.base.create_child(
                context,
                errors,
                identifier,
                |_| Some(device.create_bind_group_layout(&descriptor)),
                BindGroupLayoutProxy::new,
            ),
            DeviceMessage::CreateBindGroup {
                descriptor,
                identifier,
            } => self.base.create_child(
                context,
                errors,
                identifier,
                |registry| {
                    let resolved = registry.convert_from_backing(&descriptor)?;
                    Some(device.create_bind_group(&resolved))
                },
                BindGroupProxy::new,
            ),
            DeviceMessage::CreateShaderModule {
                descriptor,
                identifier,
            } => self.base.create_child(
                context,
                errors,
                identifier,
                |_| Some(device.create_shader_module(&descriptor)),
                ShaderModuleProxy::new,
            ),
            DeviceMessage::CreatePipelineLayout {
                descriptor,
                identifier,
            } => self.base.create_child(
                context,
                errors,
                identifier,
                |registry| {
                    let resolved = registry.convert_from_backing(&descriptor)?;
                    Some(device.create_pipeline_layout(&resolved))
                },
                PipelineLayoutProxy::new,
            ),
            DeviceMessage::CreateRenderPipeline {
                descriptor,
                identifier,
            } => self.base.create_child(
                context,
                errors,
                identifier,
                |registry| {
                    let resolved = registry.convert_from_backing(&descriptor)?;
                    Some(device.create_render_pipeline(&resolved))
                },
                |base| RenderPipelineProxy::new(base, Arc::clone(errors)),
            ),
            DeviceMessage::CreateRenderPipelineAsync {
                descriptor,
                identifier,
                reply,
            } => self.create_render_pipeline_async(context, descriptor, identifier, reply),
            DeviceMessage::CreateComputePipeline {
                descriptor,
                identifier,
            } => self.base.create_child(
                context,
                errors,
                identifier,
                |registry| {
                    let resolved = registry.convert_from_backing(&descriptor)?;
                    Some(device.create_compute_pipeline(&resolved))
                },
                |base| ComputePipelineProxy::new(base, Arc::clone(errors)),
            ),
            DeviceMessage::CreateComputePipelineAsync {
                descriptor,
                identifier,
                reply,
            } => self.create_compute_pipeline_async(context, descriptor, identifier, reply),
            DeviceMessage::CreateCommandEncoder {
                descriptor,
                identifier,
            } => self.base.create_child(
                context,
                errors,
                identifier,
                |_| Some(device.create_command_encoder(&descriptor)),
                |base| CommandEncoderProxy::new(base, Arc::clone(errors)),
            ),
            DeviceMessage::CreateQuerySet {
                descriptor,
                identifier,
            } => self.base.create_child(
                context,
                errors,
                identifier,
                |_| Some(device.create_query_set(&descriptor)),
                QuerySetProxy::new,
            ),
            DeviceMessage::Submit { command_buffers } => self.submit(context, command_buffers),
            DeviceMessage::PushErrorScope { filter } => errors.push(filter),
            DeviceMessage::PopErrorScope { reply } => {
                context.reply(reply, errors.pop().map(ReplyPayload::ErrorScopePopped));
            }
        }
    }
}
