// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

use std::future::Future;
use std::sync::{Arc, Weak};

use crate::core::Result;
use crate::core::backing::{ErrorFilter, GpuError, ObjectKind};
use crate::core::connection::ClientConnection;
use crate::core::descriptors::{
    BindGroupDescriptor, BindGroupLayoutDescriptor, BufferDescriptor, CommandEncoderDescriptor,
    ComputePipelineDescriptor, DeviceDescriptor, PipelineLayoutDescriptor, QuerySetDescriptor,
    RenderPipelineDescriptor, SamplerDescriptor, ShaderModuleDescriptor, TextureDescriptor,
};
use crate::core::identifier::ObjectIdentifier;
use crate::core::messages::{ClientMessage, DeviceMessage, ProxyMessage, ReplyFailure, ReplyPayload};

use super::encoders::{CommandBufferHandle, CommandEncoderHandle};
use super::remote_handle;
use super::resources::{
    BindGroupHandle, BindGroupLayoutHandle, BufferHandle, ComputePipelineHandle,
    PipelineLayoutHandle, QuerySetHandle, RenderPipelineHandle, SamplerHandle,
    ShaderModuleHandle, TextureHandle,
};

remote_handle!(
    /// Root of every other handle on a connection.
    DeviceHandle,
    ObjectKind::Device
);

/// Build a device-level creation method returning the child's handle.
macro_rules! create_child {
    ($(#[$meta:meta])* $method:ident, $descriptor:ty, $variant:ident, $handle:ty) => {
        $(#[$meta])*
        pub fn $method(&self, descriptor: $descriptor) -> $handle {
            let identifier = ObjectIdentifier::generate();
            self.send(DeviceMessage::$variant {
                descriptor,
                identifier,
            });
            <$handle>::adopt(self.object.connection(), identifier)
        }
    };
}

type AsyncResult<T> = std::result::Result<T, ReplyFailure>;

/// Turn an asynchronous pipeline reply into a handle.
///
/// The privileged side accounts for `identifier` whether or not the pipeline
/// was created, so a failed creation is released here like a dropped handle.
fn adopt_created<H>(
    connection: &Weak<ClientConnection>,
    identifier: ObjectIdentifier,
    result: AsyncResult<ReplyPayload>,
    expected: ReplyPayload,
    adopt: impl FnOnce(&Arc<ClientConnection>, ObjectIdentifier) -> H,
) -> AsyncResult<H> {
    let Some(connection) = connection.upgrade() else {
        return Err(ReplyFailure::ConnectionClosed);
    };
    let failure = match result {
        Ok(payload) if payload == expected => return Ok(adopt(&connection, identifier)),
        Ok(_) => ReplyFailure::UnexpectedReply,
        Err(failure) => failure,
    };
    if let Err(e) = connection.send(ClientMessage::Destroy { identifier }) {
        tracing::debug!("[DeviceHandle] Release of failed {} not sent: {}", identifier, e);
    }
    Err(failure)
}

impl DeviceHandle {
    /// Ask the privileged side for a device. The handle is usable at once;
    /// operations sent before the device exists are ordered after its
    /// creation.
    pub fn create(connection: &Arc<ClientConnection>, descriptor: DeviceDescriptor) -> Result<Self> {
        let identifier = ObjectIdentifier::generate();
        connection.send(ClientMessage::CreateDevice {
            descriptor,
            identifier,
        })?;
        Ok(Self::adopt(connection, identifier))
    }

    fn send(&self, message: DeviceMessage) {
        self.object.send(ProxyMessage::Device(message));
    }

    /// Destroy the device. Objects created from it stay addressable.
    pub fn destroy(&self) {
        self.send(DeviceMessage::Destroy);
    }

    create_child!(create_buffer, BufferDescriptor, CreateBuffer, BufferHandle);
    create_child!(create_texture, TextureDescriptor, CreateTexture, TextureHandle);
    create_child!(create_sampler, SamplerDescriptor, CreateSampler, SamplerHandle);
    create_child!(
        create_bind_group_layout,
        BindGroupLayoutDescriptor,
        CreateBindGroupLayout,
        BindGroupLayoutHandle
    );
    create_child!(create_bind_group, BindGroupDescriptor, CreateBindGroup, BindGroupHandle);
    create_child!(
        create_shader_module,
        ShaderModuleDescriptor,
        CreateShaderModule,
        ShaderModuleHandle
    );
    create_child!(
        create_pipeline_layout,
        PipelineLayoutDescriptor,
        CreatePipelineLayout,
        PipelineLayoutHandle
    );
    create_child!(
        create_render_pipeline,
        RenderPipelineDescriptor,
        CreateRenderPipeline,
        RenderPipelineHandle
    );
    create_child!(
        create_compute_pipeline,
        ComputePipelineDescriptor,
        CreateComputePipeline,
        ComputePipelineHandle
    );
    create_child!(create_query_set, QuerySetDescriptor, CreateQuerySet, QuerySetHandle);
    create_child!(
        create_command_encoder,
        CommandEncoderDescriptor,
        CreateCommandEncoder,
        CommandEncoderHandle
    );

    /// Compile a pipeline off the dispatch thread. `callback` runs exactly
    /// once; it receives a handle only if the pipeline was created.
    pub fn create_render_pipeline_async(
        &self,
        descriptor: RenderPipelineDescriptor,
        callback: impl FnOnce(AsyncResult<RenderPipelineHandle>) + Send + 'static,
    ) {
        let identifier = ObjectIdentifier::generate();
        let connection = Arc::downgrade(self.object.connection());
        self.object.connection().send_with_reply(
            |reply| ClientMessage::Object {
                destination: self.identifier(),
                message: ProxyMessage::Device(DeviceMessage::CreateRenderPipelineAsync {
                    descriptor,
                    identifier,
                    reply,
                }),
            },
            move |result| {
                callback(adopt_created(
                    &connection,
                    identifier,
                    result,
                    ReplyPayload::RenderPipelineCreated,
                    RenderPipelineHandle::adopt,
                ))
            },
        );
    }

    pub fn create_render_pipeline_future(
        &self,
        descriptor: RenderPipelineDescriptor,
    ) -> impl Future<Output = AsyncResult<RenderPipelineHandle>> + use<> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.create_render_pipeline_async(descriptor, move |result| {
            let _ = tx.send(result);
        });
        async move { rx.await.unwrap_or(Err(ReplyFailure::Cancelled)) }
    }

    /// Compute counterpart of
    /// [`create_render_pipeline_async`](Self::create_render_pipeline_async).
    pub fn create_compute_pipeline_async(
        &self,
        descriptor: ComputePipelineDescriptor,
        callback: impl FnOnce(AsyncResult<ComputePipelineHandle>) + Send + 'static,
    ) {
        let identifier = ObjectIdentifier::generate();
        let connection = Arc::downgrade(self.object.connection());
        self.object.connection().send_with_reply(
            |reply| ClientMessage::Object {
                destination: self.identifier(),
                message: ProxyMessage::Device(DeviceMessage::CreateComputePipelineAsync {
                    descriptor,
                    identifier,
                    reply,
                }),
            },
            move |result| {
                callback(adopt_created(
                    &connection,
                    identifier,
                    result,
                    ReplyPayload::ComputePipelineCreated,
                    ComputePipelineHandle::adopt,
                ))
            },
        );
    }

    pub fn create_compute_pipeline_future(
        &self,
        descriptor: ComputePipelineDescriptor,
    ) -> impl Future<Output = AsyncResult<ComputePipelineHandle>> + use<> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.create_compute_pipeline_async(descriptor, move |result| {
            let _ = tx.send(result);
        });
        async move { rx.await.unwrap_or(Err(ReplyFailure::Cancelled)) }
    }

    pub fn submit(&self, command_buffers: &[&CommandBufferHandle]) {
        self.send(DeviceMessage::Submit {
            command_buffers: command_buffers
                .iter()
                .map(|buffer| buffer.identifier())
                .collect(),
        });
    }

    pub fn push_error_scope(&self, filter: ErrorFilter) {
        self.send(DeviceMessage::PushErrorScope { filter });
    }

    /// Pop the innermost error scope. `callback` receives the error it
    /// captured, if any, or `NoMatchingErrorScope` when nothing was pushed.
    pub fn pop_error_scope(
        &self,
        callback: impl FnOnce(AsyncResult<Option<GpuError>>) + Send + 'static,
    ) {
        self.object.connection().send_with_reply(
            |reply| ClientMessage::Object {
                destination: self.identifier(),
                message: ProxyMessage::Device(DeviceMessage::PopErrorScope { reply }),
            },
            move |result| {
                callback(match result {
                    Ok(ReplyPayload::ErrorScopePopped(error)) => Ok(error),
                    Ok(_) => Err(ReplyFailure::UnexpectedReply),
                    Err(failure) => Err(failure),
                })
            },
        );
    }

    pub fn pop_error_scope_future(
        &self,
    ) -> impl Future<Output = AsyncResult<Option<GpuError>>> + use<> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.pop_error_scope(move |result| {
            let _ = tx.send(result);
        });
        async move { rx.await.unwrap_or(Err(ReplyFailure::Cancelled)) }
    }
}
