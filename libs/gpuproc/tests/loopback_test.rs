// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Client handles driving a privileged connection end to end.

mod common;

use common::{Loopback, WAIT, pipeline_descriptor, wait_until};
use gpuproc::core::backing::{
    BufferUsages, Color, ErrorFilter, LoadOp, StoreOp, TextureFormat, TextureUsages,
};
use gpuproc::core::descriptors::{
    BufferDescriptor, CommandBufferDescriptor, CommandEncoderDescriptor, DeviceDescriptor,
    RenderPassColorAttachment, RenderPassDescriptor, SamplerDescriptor, ShaderModuleDescriptor,
    TextureDescriptor, TextureViewDescriptor,
};
use gpuproc::{
    ClientConnection, DeviceHandle, GpuError, ObjectKind, ProxyConfig, ReplyFailure, Transport,
};

const SHADER: &str = "@vertex fn vs_main() {} @fragment fn fs_main() {}";

type PopResult = std::result::Result<Option<GpuError>, ReplyFailure>;

fn pop_blocking(device: &DeviceHandle) -> PopResult {
    let (tx, rx) = crossbeam_channel::bounded(1);
    device.pop_error_scope(move |result| {
        let _ = tx.send(result);
    });
    rx.recv_timeout(WAIT).expect("no reply to pop_error_scope")
}

fn shader(device: &DeviceHandle, code: &str) -> gpuproc::core::client::ShaderModuleHandle {
    device.create_shader_module(ShaderModuleDescriptor {
        label: None,
        code: code.to_string(),
    })
}

fn draw_one_frame(loopback: &Loopback) {
    let device = DeviceHandle::create(&loopback.client, DeviceDescriptor::default()).unwrap();
    device.set_label("main");
    device.push_error_scope(ErrorFilter::Validation);

    let texture = device.create_texture(TextureDescriptor::new_2d(
        32,
        32,
        TextureFormat::Rgba8Unorm,
        TextureUsages::RENDER_ATTACHMENT,
    ));
    let view = texture.create_view(TextureViewDescriptor::default());
    let _sampler = device.create_sampler(SamplerDescriptor::default());
    let vertices = device.create_buffer(BufferDescriptor {
        label: Some("vertices".to_string()),
        size: 1024,
        usage: BufferUsages::VERTEX,
        mapped_at_creation: false,
    });
    let module = shader(&device, SHADER);
    let pipeline = device.create_render_pipeline(pipeline_descriptor(module.identifier()));
    let _layout = pipeline.get_bind_group_layout(0);

    let encoder = device.create_command_encoder(CommandEncoderDescriptor::default());
    let pass = encoder.begin_render_pass(RenderPassDescriptor {
        label: None,
        color_attachments: vec![RenderPassColorAttachment {
            view: view.identifier(),
            resolve_target: None,
            clear_value: Some(Color::BLACK),
            load_op: LoadOp::Clear,
            store_op: StoreOp::Store,
        }],
        depth_stencil_attachment: None,
        max_draw_count: None,
    });
    pass.set_pipeline(&pipeline);
    pass.set_vertex_buffer(0, Some(&vertices), 0, None);
    pass.draw(3, 1, 0, 0);
    pass.end();
    let commands = encoder.finish(CommandBufferDescriptor::default());
    device.submit(&[&commands]);

    assert_eq!(pop_blocking(&device), Ok(None));
    assert_eq!(loopback.backend.count_calls("Device.set_label(main)"), 1);
    assert_eq!(loopback.backend.count_calls("RenderPassEncoder.draw(3, 1, 0, 0)"), 1);
    assert_eq!(loopback.backend.count_calls("Device.submit(1)"), 1);
    assert_eq!(loopback.server.heap().len(), 11);
}

fn assert_session_cleans_up(loopback: Loopback) {
    draw_one_frame(&loopback);

    // Every handle is gone; the privileged side follows.
    assert!(wait_until(|| loopback.server.heap().is_empty()));
    assert!(loopback.server.registry().is_empty());
    assert_eq!(loopback.server.heap().pending_releases(), 0);
    assert_eq!(loopback.backend.total_live_objects(), 0);

    loopback.client.close();
    assert!(wait_until(|| loopback.server.is_torn_down()));
}

#[test]
fn test_session_over_in_process_channels() {
    assert_session_cleans_up(Loopback::in_process());
}

#[test]
fn test_session_over_tcp() {
    assert_session_cleans_up(Loopback::tcp());
}

#[test]
fn test_uncaptured_error_reaches_the_client_handler() {
    let loopback = Loopback::in_process();
    let (tx, rx) = crossbeam_channel::unbounded();
    loopback.client.set_uncaptured_error_handler(move |device, error| {
        let _ = tx.send((device, error));
    });

    let device = DeviceHandle::create(&loopback.client, DeviceDescriptor::default()).unwrap();
    let _broken = shader(&device, "");

    let (reported, error) = rx.recv_timeout(WAIT).unwrap();
    assert_eq!(reported, device.identifier());
    assert!(matches!(error, GpuError::Validation(_)));
}

#[tokio::test]
async fn test_async_pipeline_and_scope_futures() {
    let loopback = Loopback::in_process();
    let device = DeviceHandle::create(&loopback.client, DeviceDescriptor::default()).unwrap();
    let module = shader(&device, SHADER);

    device.push_error_scope(ErrorFilter::OutOfMemory);
    let pipeline = device.create_render_pipeline_future(pipeline_descriptor(module.identifier()));
    assert!(wait_until(|| loopback.backend.pending_pipeline_count() == 1));
    assert_eq!(loopback.backend.flush_pending_pipelines(), 1);

    let pipeline = pipeline.await.expect("pipeline created");
    assert!(wait_until(|| {
        loopback.server.heap().kind_of(pipeline.identifier()) == Some(ObjectKind::RenderPipeline)
    }));
    assert_eq!(device.pop_error_scope_future().await, Ok(None));
    assert_eq!(
        device.pop_error_scope_future().await,
        Err(ReplyFailure::NoMatchingErrorScope)
    );
}

#[test]
fn test_teardown_cancels_pending_pipeline_on_the_client() {
    let loopback = Loopback::in_process();
    let device = DeviceHandle::create(&loopback.client, DeviceDescriptor::default()).unwrap();
    let module = shader(&device, SHADER);

    let (tx, rx) = crossbeam_channel::bounded(1);
    device.create_render_pipeline_async(pipeline_descriptor(module.identifier()), move |result| {
        let _ = tx.send(result.map(|handle| handle.identifier()));
    });
    assert!(wait_until(|| loopback.backend.pending_pipeline_count() == 1));

    loopback.server.shutdown();
    assert_eq!(rx.recv_timeout(WAIT).unwrap(), Err(ReplyFailure::Cancelled));
    assert!(rx.recv_timeout(std::time::Duration::from_millis(50)).is_err());

    // The privileged side closed its end, so the client follows.
    assert!(wait_until(|| loopback.client.is_closed()));
    assert_eq!(pop_blocking(&device), Err(ReplyFailure::ConnectionClosed));
}

#[test]
fn test_unanswered_replies_fail_when_the_privileged_side_goes_away() {
    let (client, server) = Transport::in_process_pair();
    let connection = ClientConnection::connect(client, &ProxyConfig::default()).unwrap();
    let device = DeviceHandle::create(&connection, DeviceDescriptor::default()).unwrap();

    let (tx, rx) = crossbeam_channel::bounded(1);
    device.pop_error_scope(move |result| {
        let _ = tx.send(result);
    });
    assert_eq!(connection.pending_replies(), 1);

    drop(server);
    assert_eq!(rx.recv_timeout(WAIT).unwrap(), Err(ReplyFailure::ConnectionClosed));
    assert_eq!(connection.pending_replies(), 0);
    assert!(connection.is_closed());
}

#[test]
fn test_dropping_the_client_tears_the_server_down() {
    let loopback = Loopback::in_process();
    let device = DeviceHandle::create(&loopback.client, DeviceDescriptor::default()).unwrap();
    let texture = device.create_texture(TextureDescriptor::new_2d(
        4,
        4,
        TextureFormat::R8Unorm,
        TextureUsages::TEXTURE_BINDING,
    ));
    loopback.settle();
    assert_eq!(loopback.server.heap().len(), 2);

    let Loopback {
        server,
        client,
        backend,
    } = loopback;
    drop(texture);
    drop(device);
    drop(client);

    assert!(wait_until(|| server.is_torn_down()));
    assert!(server.heap().is_empty());
    assert!(server.completions().is_closed());
    assert_eq!(backend.total_live_objects(), 0);
}
