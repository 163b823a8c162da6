// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Pipeline layouts and compute pipelines, from raw messages and from
//! client handles.

mod common;

use std::sync::Arc;

use common::{Harness, Loopback, WAIT, wait_until};
use gpuproc::core::backing::{BindingType, ShaderStages};
use gpuproc::core::descriptors::{
    BindGroupLayoutDescriptor, BindGroupLayoutEntry, ComputePipelineDescriptor, DeviceDescriptor,
    PipelineLayoutDescriptor, ProgrammableStage, ShaderModuleDescriptor,
};
use gpuproc::core::messages::{ComputePipelineMessage, DeviceMessage, ProxyMessage};
use gpuproc::{DeviceHandle, GpuError, ObjectIdentifier, ObjectKind, ReplyFailure, ServerMessage};

const COMPUTE_SHADER: &str = "@compute @workgroup_size(64) fn cs_main() {}";

fn compute_descriptor(
    module: ObjectIdentifier,
    layout: Option<ObjectIdentifier>,
) -> ComputePipelineDescriptor {
    ComputePipelineDescriptor {
        label: Some("blur".to_string()),
        layout,
        compute: ProgrammableStage {
            module,
            entry_point: "cs_main".to_string(),
        },
    }
}

fn create_bind_group_layout(harness: &Harness, device: ObjectIdentifier) -> ObjectIdentifier {
    let identifier = ObjectIdentifier::generate();
    harness.device_message(
        device,
        DeviceMessage::CreateBindGroupLayout {
            descriptor: BindGroupLayoutDescriptor {
                label: None,
                entries: vec![BindGroupLayoutEntry {
                    binding: 0,
                    visibility: ShaderStages::COMPUTE,
                    ty: BindingType::StorageBuffer,
                }],
            },
            identifier,
        },
    );
    identifier
}

fn create_pipeline_layout(
    harness: &Harness,
    device: ObjectIdentifier,
    bind_group_layouts: Vec<ObjectIdentifier>,
) -> ObjectIdentifier {
    let identifier = ObjectIdentifier::generate();
    harness.device_message(
        device,
        DeviceMessage::CreatePipelineLayout {
            descriptor: PipelineLayoutDescriptor {
                label: Some("compute".to_string()),
                bind_group_layouts,
            },
            identifier,
        },
    );
    identifier
}

#[test]
fn test_explicit_layout_hands_back_its_bind_group_layouts() {
    let harness = Harness::new();
    let device = harness.create_device();
    let group_layout = create_bind_group_layout(&harness, device);
    let layout = create_pipeline_layout(&harness, device, vec![group_layout]);
    assert_eq!(harness.server.heap().kind_of(layout), Some(ObjectKind::PipelineLayout));

    let module = harness.create_shader_module(device, COMPUTE_SHADER);
    let pipeline = ObjectIdentifier::generate();
    harness.device_message(
        device,
        DeviceMessage::CreateComputePipeline {
            descriptor: compute_descriptor(module, Some(layout)),
            identifier: pipeline,
        },
    );
    assert_eq!(harness.server.heap().kind_of(pipeline), Some(ObjectKind::ComputePipeline));

    let fetched = ObjectIdentifier::generate();
    harness.object(
        pipeline,
        ProxyMessage::ComputePipeline(ComputePipelineMessage::GetBindGroupLayout {
            index: 0,
            identifier: fetched,
        }),
    );
    assert_eq!(harness.server.heap().kind_of(fetched), Some(ObjectKind::BindGroupLayout));
    let registry = harness.server.registry();
    assert!(std::ptr::addr_eq(
        Arc::as_ptr(&registry.bind_group_layout(group_layout).unwrap()),
        Arc::as_ptr(&registry.bind_group_layout(fetched).unwrap()),
    ));
    harness.assert_no_event();
    harness.assert_coherent();
}

#[test]
fn test_out_of_range_bind_group_layout_is_reported_and_released_cleanly() {
    let harness = Harness::new();
    let device = harness.create_device();
    let module = harness.create_shader_module(device, COMPUTE_SHADER);
    let pipeline = ObjectIdentifier::generate();
    harness.device_message(
        device,
        DeviceMessage::CreateComputePipeline {
            descriptor: compute_descriptor(module, None),
            identifier: pipeline,
        },
    );

    let missing = ObjectIdentifier::generate();
    harness.object(
        pipeline,
        ProxyMessage::ComputePipeline(ComputePipelineMessage::GetBindGroupLayout {
            index: 3,
            identifier: missing,
        }),
    );
    match harness.next_event() {
        ServerMessage::UncapturedError { device: reported, error } => {
            assert_eq!(reported, device);
            assert!(matches!(error, GpuError::Validation(_)));
        }
        other => panic!("unexpected {:?}", other),
    }
    assert!(!harness.server.heap().contains(missing));
    assert_eq!(harness.server.heap().failed_creations(), 1);

    harness.destroy(missing);
    assert_eq!(harness.server.heap().failed_creations(), 0);
    assert_eq!(harness.server.heap().pending_releases(), 0);
}

#[test]
fn test_unknown_pipeline_layout_drops_the_pipeline() {
    let harness = Harness::new();
    let device = harness.create_device();
    let module = harness.create_shader_module(device, COMPUTE_SHADER);
    let pipeline = ObjectIdentifier::generate();

    harness.device_message(
        device,
        DeviceMessage::CreateComputePipeline {
            descriptor: compute_descriptor(module, Some(ObjectIdentifier::generate())),
            identifier: pipeline,
        },
    );
    assert_eq!(harness.backend.count_calls("create_compute_pipeline"), 0);
    assert!(!harness.server.heap().contains(pipeline));
    harness.assert_no_event();

    harness.destroy(pipeline);
    assert_eq!(harness.server.heap().failed_creations(), 0);
    assert_eq!(harness.server.heap().pending_releases(), 0);
}

#[test]
fn test_layout_over_unknown_bind_group_layout_is_dropped() {
    let harness = Harness::new();
    let device = harness.create_device();
    let known = create_bind_group_layout(&harness, device);
    let layout = create_pipeline_layout(&harness, device, vec![known, ObjectIdentifier::generate()]);

    assert!(!harness.server.heap().contains(layout));
    assert_eq!(harness.backend.count_calls("create_pipeline_layout"), 0);
    assert_eq!(harness.server.heap().failed_creations(), 1);
    harness.assert_coherent();
}

#[test]
fn test_layout_passed_where_a_pipeline_is_expected_is_dropped() {
    let harness = Harness::new();
    let device = harness.create_device();
    let layout = create_pipeline_layout(&harness, device, vec![]);

    // A pipeline layout is not a compute pipeline; the message has nowhere to go.
    let fetched = ObjectIdentifier::generate();
    harness.object(
        layout,
        ProxyMessage::ComputePipeline(ComputePipelineMessage::GetBindGroupLayout {
            index: 0,
            identifier: fetched,
        }),
    );
    assert!(!harness.server.heap().contains(fetched));
    assert_eq!(harness.server.heap().kind_of(layout), Some(ObjectKind::PipelineLayout));

    harness.destroy(fetched);
    assert_eq!(harness.server.heap().pending_releases(), 0);
}

fn client_shader(device: &DeviceHandle) -> ObjectIdentifier {
    device
        .create_shader_module(ShaderModuleDescriptor {
            label: None,
            code: COMPUTE_SHADER.to_string(),
        })
        .identifier()
}

#[test]
fn test_failed_async_compute_pipeline_is_released_by_the_client() {
    let loopback = Loopback::in_process();
    let device = DeviceHandle::create(&loopback.client, DeviceDescriptor::default()).unwrap();
    let mut descriptor = compute_descriptor(client_shader(&device), None);
    descriptor.compute.entry_point.clear();

    let (tx, rx) = crossbeam_channel::bounded(1);
    device.create_compute_pipeline_async(descriptor, move |result| {
        let _ = tx.send(result.map(|handle| handle.identifier()));
    });
    assert!(wait_until(|| loopback.backend.pending_pipeline_count() == 1));
    assert_eq!(loopback.backend.flush_pending_pipelines(), 1);

    assert!(matches!(
        rx.recv_timeout(WAIT).unwrap(),
        Err(ReplyFailure::Gpu(GpuError::Validation(_)))
    ));
    loopback.settle();
    assert_eq!(loopback.server.heap().failed_creations(), 0);
    assert_eq!(loopback.server.heap().pending_releases(), 0);
    assert_eq!(loopback.backend.live_objects(ObjectKind::ComputePipeline), 0);
}

#[tokio::test]
async fn test_compute_pipeline_future_with_explicit_layout() {
    let loopback = Loopback::in_process();
    let device = DeviceHandle::create(&loopback.client, DeviceDescriptor::default()).unwrap();
    let group_layout = device.create_bind_group_layout(BindGroupLayoutDescriptor {
        label: None,
        entries: vec![BindGroupLayoutEntry {
            binding: 0,
            visibility: ShaderStages::COMPUTE,
            ty: BindingType::UniformBuffer,
        }],
    });
    let layout = device.create_pipeline_layout(PipelineLayoutDescriptor {
        label: None,
        bind_group_layouts: vec![group_layout.identifier()],
    });
    let module = client_shader(&device);

    let pipeline =
        device.create_compute_pipeline_future(compute_descriptor(module, Some(layout.identifier())));
    assert!(wait_until(|| loopback.backend.pending_pipeline_count() == 1));
    assert_eq!(loopback.backend.flush_pending_pipelines(), 1);
    let pipeline = pipeline.await.expect("pipeline created");

    let fetched = pipeline.get_bind_group_layout(0);
    loopback.settle();
    let heap = loopback.server.heap();
    assert_eq!(heap.kind_of(pipeline.identifier()), Some(ObjectKind::ComputePipeline));
    assert_eq!(heap.kind_of(fetched.identifier()), Some(ObjectKind::BindGroupLayout));
    assert_eq!(loopback.backend.count_calls("create_compute_pipeline_async"), 1);
}
