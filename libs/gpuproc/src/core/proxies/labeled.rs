// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Kinds whose only operation is `set_label`.

use crate::core::backing::{
    BindGroup, BindGroupLayout, CommandBuffer, ObjectKind, PipelineLayout, Sampler, ShaderModule,
    TextureView,
};
use crate::core::dispatch::DispatchContext;
use crate::core::identifier::ObjectIdentifier;
use crate::core::messages::ProxyMessage;

use super::{ProxyBase, ResourceProxy};

macro_rules! labeled_proxy {
    ($($name:ident: $trait:ident),* $(,)?) => {
        $(
            pub struct $name {
                base: ProxyBase<dyn $trait>,
            }

            impl $name {
                pub fn new(base: ProxyBase<dyn $trait>) -> Self {
                    Self { base }
                }
            }

            impl ResourceProxy for $name {
                fn identifier(&self) -> ObjectIdentifier {
                    self.base.identifier()
                }

                fn kind(&self) -> ObjectKind {
                    ObjectKind::$trait
                }

                fn did_receive_message(&self, context: &DispatchContext, message: ProxyMessage) {
                    match message {
                        ProxyMessage::SetLabel { label } => self.base.backing().set_label(&label),
                        other => context.reject_mismatched(self.identifier(), self.kind(), &other),
                    }
                }
            }
        )*
    };
}

labeled_proxy!(
    TextureViewProxy: TextureView,
    SamplerProxy: Sampler,
    BindGroupLayoutProxy: BindGroupLayout,
    BindGroupProxy: BindGroup,
    ShaderModuleProxy: ShaderModule,
    PipelineLayoutProxy: PipelineLayout,
    CommandBufferProxy: CommandBuffer,
);
