// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Render and compute pipeline proxies. Both hand out the bind group layouts
//! their pipeline layout holds.

use std::sync::Arc;

use crate::core::backing::{ComputePipeline, ObjectKind, RenderPipeline};
use crate::core::dispatch::DispatchContext;
use crate::core::identifier::ObjectIdentifier;
use crate::core::messages::{ComputePipelineMessage, ProxyMessage, RenderPipelineMessage};

use super::{BindGroupLayoutProxy, ErrorScopeStack, ProxyBase, ResourceProxy};

macro_rules! pipeline_proxy {
    ($($name:ident: $trait:ident => $message:ident),* $(,)?) => {
        $(
            pub struct $name {
                base: ProxyBase<dyn $trait>,
                errors: Arc<ErrorScopeStack>,
            }

            impl $name {
                pub fn new(base: ProxyBase<dyn $trait>, errors: Arc<ErrorScopeStack>) -> Self {
                    Self { base, errors }
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
                    let pipeline = self.base.backing();
                    match message {
                        ProxyMessage::SetLabel { label } => pipeline.set_label(&label),
                        ProxyMessage::$trait($message::GetBindGroupLayout {
                            index,
                            identifier,
                        }) => self.base.create_child(
                            context,
                            &self.errors,
                            identifier,
                            |_| Some(pipeline.get_bind_group_layout(index)),
                            BindGroupLayoutProxy::new,
                        ),
                        other => context.reject_mismatched(self.identifier(), self.kind(), &other),
                    }
                }
            }
        )*
    };
}

pipeline_proxy!(
    RenderPipelineProxy: RenderPipeline => RenderPipelineMessage,
    ComputePipelineProxy: ComputePipeline => ComputePipelineMessage,
);
