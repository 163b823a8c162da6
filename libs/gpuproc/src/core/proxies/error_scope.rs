// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

use parking_lot::Mutex;

use crate::core::backing::{ErrorFilter, GpuError};
use crate::core::dispatch::DispatchContext;
use crate::core::identifier::ObjectIdentifier;
use crate::core::messages::{ReplyFailure, ServerMessage};

#[derive(Debug)]
struct ErrorScope {
    filter: ErrorFilter,
    captured: Option<GpuError>,
}

/// A device's error scopes, shared with every proxy created under it.
///
/// An error goes to the innermost scope whose filter matches it. That scope
/// keeps only the first error it sees; later matching errors are discarded.
/// Errors no scope matches are forwarded to the client as uncaptured.
#[derive(Debug)]
pub struct ErrorScopeStack {
    device: ObjectIdentifier,
    scopes: Mutex<Vec<ErrorScope>>,
}

impl ErrorScopeStack {
    pub fn new(device: ObjectIdentifier) -> Self {
        Self {
            device,
            scopes: Mutex::new(Vec::new()),
        }
    }

    pub fn device(&self) -> ObjectIdentifier {
        self.device
    }

    pub fn push(&self, filter: ErrorFilter) {
        self.scopes.lock().push(ErrorScope {
            filter,
            captured: None,
        });
    }

    /// Pop the innermost scope and return the error it captured.
    pub fn pop(&self) -> std::result::Result<Option<GpuError>, ReplyFailure> {
        match self.scopes.lock().pop() {
            Some(scope) => Ok(scope.captured),
            None => {
                tracing::warn!(
                    "[ErrorScope] Device {}: pop without a matching push",
                    self.device
                );
                Err(ReplyFailure::NoMatchingErrorScope)
            }
        }
    }

    pub fn depth(&self) -> usize {
        self.scopes.lock().len()
    }

    pub fn report(&self, context: &DispatchContext, error: GpuError) {
        {
            let mut scopes = self.scopes.lock();
            let filter = error.filter();
            if let Some(scope) = scopes.iter_mut().rev().find(|scope| scope.filter == filter) {
                if scope.captured.is_none() {
                    scope.captured = Some(error);
                }
                return;
            }
        }

        tracing::warn!("[ErrorScope] Device {}: uncaptured {}", self.device, error);
        context.send(ServerMessage::UncapturedError {
            device: self.device,
            error,
        });
    }
}
