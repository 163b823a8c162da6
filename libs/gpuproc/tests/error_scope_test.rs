// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Device error scopes driven through message dispatch.

mod common;

use common::Harness;
use gpuproc::core::backing::{BufferUsages, ErrorFilter, software::MAX_BUFFER_SIZE};
use gpuproc::core::descriptors::BufferDescriptor;
use gpuproc::core::identifier::ReplyId;
use gpuproc::core::messages::{DeviceMessage, ReplyPayload};
use gpuproc::{GpuError, ObjectIdentifier, ReplyFailure, ServerMessage};

fn create_oversized_buffer(harness: &Harness, device: ObjectIdentifier) -> ObjectIdentifier {
    let identifier = ObjectIdentifier::generate();
    harness.device_message(
        device,
        DeviceMessage::CreateBuffer {
            descriptor: BufferDescriptor {
                label: None,
                size: MAX_BUFFER_SIZE + 1,
                usage: BufferUsages::STORAGE,
                mapped_at_creation: false,
            },
            identifier,
        },
    );
    identifier
}

fn pop(harness: &Harness, device: ObjectIdentifier, reply: u64) -> ServerMessage {
    harness.device_message(
        device,
        DeviceMessage::PopErrorScope {
            reply: ReplyId(reply),
        },
    );
    harness.next_event()
}

fn popped(reply: u64, error: Option<GpuError>) -> ServerMessage {
    ServerMessage::Reply {
        reply: ReplyId(reply),
        result: Ok(ReplyPayload::ErrorScopePopped(error)),
    }
}

#[test]
fn test_nested_scopes_capture_by_filter_and_pop_lifo() {
    let harness = Harness::new();
    let device = harness.create_device();

    harness.device_message(
        device,
        DeviceMessage::PushErrorScope {
            filter: ErrorFilter::Validation,
        },
    );
    harness.device_message(
        device,
        DeviceMessage::PushErrorScope {
            filter: ErrorFilter::OutOfMemory,
        },
    );

    // The validation error skips the inner out-of-memory scope.
    let shader = harness.create_shader_module(device, "   ");
    let buffer = create_oversized_buffer(&harness, device);
    harness.assert_no_event();
    assert!(!harness.server.heap().contains(shader));
    assert!(!harness.server.heap().contains(buffer));

    assert_eq!(pop(&harness, device, 1), popped(1, Some(GpuError::OutOfMemory)));
    assert_eq!(
        pop(&harness, device, 2),
        popped(2, Some(GpuError::validation("shader source is empty")))
    );
    harness.assert_coherent();
}

#[test]
fn test_scope_keeps_first_error_only() {
    let harness = Harness::new();
    let device = harness.create_device();
    harness.device_message(
        device,
        DeviceMessage::PushErrorScope {
            filter: ErrorFilter::OutOfMemory,
        },
    );

    create_oversized_buffer(&harness, device);
    create_oversized_buffer(&harness, device);

    assert_eq!(pop(&harness, device, 5), popped(5, Some(GpuError::OutOfMemory)));
    harness.assert_no_event();
}

#[test]
fn test_clean_scope_pops_none() {
    let harness = Harness::new();
    let device = harness.create_device();
    harness.device_message(
        device,
        DeviceMessage::PushErrorScope {
            filter: ErrorFilter::Validation,
        },
    );
    harness.create_shader_module(device, "@vertex fn vs_main() {}");

    assert_eq!(pop(&harness, device, 1), popped(1, None));
}

#[test]
fn test_pop_without_push_fails() {
    let harness = Harness::new();
    let device = harness.create_device();

    assert_eq!(
        pop(&harness, device, 11),
        ServerMessage::Reply {
            reply: ReplyId(11),
            result: Err(ReplyFailure::NoMatchingErrorScope),
        }
    );
}

#[test]
fn test_unmatched_error_is_reported_uncaptured() {
    let harness = Harness::new();
    let device = harness.create_device();
    harness.device_message(
        device,
        DeviceMessage::PushErrorScope {
            filter: ErrorFilter::OutOfMemory,
        },
    );

    harness.create_shader_module(device, "");
    assert_eq!(
        harness.next_event(),
        ServerMessage::UncapturedError {
            device,
            error: GpuError::validation("shader source is empty"),
        }
    );
    assert_eq!(pop(&harness, device, 2), popped(2, None));
}
