// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

use crate::core::backing::ObjectKind;
use crate::core::descriptors::TextureViewDescriptor;
use crate::core::identifier::ObjectIdentifier;
use crate::core::messages::{
    BufferMessage, ComputePipelineMessage, ProxyMessage, QuerySetMessage, RenderPipelineMessage,
    TextureMessage,
};

use super::remote_handle;

remote_handle!(BufferHandle, ObjectKind::Buffer);
remote_handle!(TextureHandle, ObjectKind::Texture);
remote_handle!(TextureViewHandle, ObjectKind::TextureView);
remote_handle!(SamplerHandle, ObjectKind::Sampler);
remote_handle!(BindGroupLayoutHandle, ObjectKind::BindGroupLayout);
remote_handle!(BindGroupHandle, ObjectKind::BindGroup);
remote_handle!(ShaderModuleHandle, ObjectKind::ShaderModule);
remote_handle!(PipelineLayoutHandle, ObjectKind::PipelineLayout);
remote_handle!(RenderPipelineHandle, ObjectKind::RenderPipeline);
remote_handle!(ComputePipelineHandle, ObjectKind::ComputePipeline);
remote_handle!(QuerySetHandle, ObjectKind::QuerySet);

impl BufferHandle {
    /// Release the buffer's memory. The handle stays addressable.
    pub fn destroy(&self) {
        self.object.send(ProxyMessage::Buffer(BufferMessage::Destroy));
    }
}

impl TextureHandle {
    /// The view lives independently of this handle. `None` views the whole
    /// texture in its own format.
    pub fn create_view(
        &self,
        descriptor: impl Into<Option<TextureViewDescriptor>>,
    ) -> TextureViewHandle {
        let identifier = ObjectIdentifier::generate();
        self.object
            .send(ProxyMessage::Texture(TextureMessage::CreateView {
                descriptor: descriptor.into(),
                identifier,
            }));
        TextureViewHandle::adopt(self.object.connection(), identifier)
    }

    pub fn destroy(&self) {
        self.object.send(ProxyMessage::Texture(TextureMessage::Destroy));
    }
}

impl RenderPipelineHandle {
    pub fn get_bind_group_layout(&self, index: u32) -> BindGroupLayoutHandle {
        let identifier = ObjectIdentifier::generate();
        self.object.send(ProxyMessage::RenderPipeline(
            RenderPipelineMessage::GetBindGroupLayout { index, identifier },
        ));
        BindGroupLayoutHandle::adopt(self.object.connection(), identifier)
    }
}

impl ComputePipelineHandle {
    pub fn get_bind_group_layout(&self, index: u32) -> BindGroupLayoutHandle {
        let identifier = ObjectIdentifier::generate();
        self.object.send(ProxyMessage::ComputePipeline(
            ComputePipelineMessage::GetBindGroupLayout { index, identifier },
        ));
        BindGroupLayoutHandle::adopt(self.object.connection(), identifier)
    }
}

impl QuerySetHandle {
    pub fn destroy(&self) {
        self.object.send(ProxyMessage::QuerySet(QuerySetMessage::Destroy));
    }
}
