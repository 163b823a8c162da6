// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

use std::sync::Arc;

use crate::core::backing::{CommandEncoder, ObjectKind};
use crate::core::dispatch::DispatchContext;
use crate::core::identifier::ObjectIdentifier;
use crate::core::messages::{CommandEncoderMessage, ProxyMessage};

use super::{
    CommandBufferProxy, ErrorScopeStack, ProxyBase, RenderPassEncoderProxy, ResourceProxy,
};

pub struct CommandEncoderProxy {
    base: ProxyBase<dyn CommandEncoder>,
    errors: Arc<ErrorScopeStack>,
}

impl CommandEncoderProxy {
    pub fn new(base: ProxyBase<dyn CommandEncoder>, errors: Arc<ErrorScopeStack>) -> Self {
        Self { base, errors }
    }
}

impl ResourceProxy for CommandEncoderProxy {
    fn identifier(&self) -> ObjectIdentifier {
        self.base.identifier()
    }

    fn kind(&self) -> ObjectKind {
        ObjectKind::CommandEncoder
    }

    fn did_receive_message(&self, context: &DispatchContext, message: ProxyMessage) {
        let encoder = self.base.backing();
        let errors = &self.errors;
        match message {
            ProxyMessage::SetLabel { label } => encoder.set_label(&label),
            ProxyMessage::CommandEncoder(CommandEncoderMessage::BeginRenderPass {
                descriptor,
                identifier,
            }) => self.base.create_child(
                context,
                errors,
                identifier,
                |registry| {
                    let resolved = registry.convert_from_backing(&descriptor)?;
                    Some(encoder.begin_render_pass(&resolved))
                },
                |base| RenderPassEncoderProxy::new(base, Arc::clone(errors)),
            ),
            ProxyMessage::CommandEncoder(CommandEncoderMessage::Finish {
                descriptor,
                identifier,
            }) => self.base.create_child(
                context,
                errors,
                identifier,
                |_| Some(encoder.finish(&descriptor)),
                CommandBufferProxy::new,
            ),
            other => context.reject_mismatched(self.identifier(), self.kind(), &other),
        }
    }
}
