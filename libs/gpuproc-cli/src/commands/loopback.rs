// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Scripted loopback session against the software backend.

use std::net::{TcpListener, TcpStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};
use gpuproc::core::backing::{
    BindingType, BufferUsages, Color, ErrorFilter, LoadOp, QueryType, ShaderStages, StoreOp,
    TextureFormat, TextureUsages,
};
use gpuproc::core::descriptors::{
    BindGroupDescriptor, BindGroupEntry, BindGroupLayoutDescriptor, BindGroupLayoutEntry,
    BindingResource, BufferDescriptor, DeviceDescriptor, FragmentState, PipelineLayoutDescriptor,
    ProgrammableStage, QuerySetDescriptor, RenderPassColorAttachment, RenderPassDescriptor,
    RenderPipelineDescriptor, ShaderModuleDescriptor, TextureDescriptor,
};
use gpuproc::core::video_frame::{FrameSize, MediaTime, PixelFormat};
use gpuproc::{
    ClientConnection, DeviceHandle, ObjectIdentifier, ProxyConfig, RemoteVideoFrameProxy,
    ServerConnection, SoftwareBackend, Transport,
};
use serde::Serialize;

use crate::{LoopbackTransport, OutputFormat};

const WAIT: Duration = Duration::from_secs(5);

const SHADER: &str = "@vertex fn vs_main() {} @fragment fn fs_main() {}";

/// What each side holds at one point of the session.
#[derive(Debug, Default, Serialize)]
struct Accounting {
    heap: usize,
    registry: usize,
    live_backing_objects: usize,
    pending_releases: usize,
    video_frames: usize,
}

impl Accounting {
    fn capture(server: &ServerConnection, backend: &SoftwareBackend) -> Self {
        Self {
            heap: server.heap().len(),
            registry: server.registry().len(),
            live_backing_objects: backend.total_live_objects(),
            pending_releases: server.heap().pending_releases(),
            video_frames: server.video_frames().len(),
        }
    }
}

#[derive(Debug, Default, Serialize)]
struct LoopbackReport {
    connection: String,
    transport: String,
    async_pipeline: String,
    captured_error: Option<String>,
    uncaptured_errors: usize,
    frames_fetched: u32,
    pixel_round_trips: u64,
    backend_calls: usize,
    while_alive: Accounting,
    after_release: Accounting,
    torn_down: bool,
}

pub fn run(
    config: &ProxyConfig,
    transport: LoopbackTransport,
    frames: u32,
    format: OutputFormat,
) -> Result<()> {
    let backend = SoftwareBackend::new();
    let (client_endpoint, server_endpoint) = match transport {
        LoopbackTransport::InProcess => Transport::in_process_pair(),
        LoopbackTransport::Tcp => tcp_pair(config)?,
    };
    let server = ServerConnection::serve(server_endpoint, Arc::new(backend.clone()), config)?;
    let client = ClientConnection::connect(client_endpoint, config)?;

    let uncaptured = Arc::new(AtomicUsize::new(0));
    {
        let uncaptured = Arc::clone(&uncaptured);
        client.set_uncaptured_error_handler(move |device, error| {
            tracing::warn!("[Loopback] Uncaptured error on {}: {}", device, error);
            uncaptured.fetch_add(1, Ordering::SeqCst);
        });
    }

    let mut report = LoopbackReport {
        connection: server.name().to_string(),
        transport: format!("{:?}", transport),
        ..Default::default()
    };

    run_session(&client, &server, &backend, frames, &mut report)?;

    if !wait_until(|| server.heap().is_empty() && server.video_frames().is_empty()) {
        bail!("privileged side still holds {} proxies", server.heap().len());
    }
    report.after_release = Accounting::capture(&server, &backend);

    client.close();
    report.torn_down = wait_until(|| server.is_torn_down());
    report.uncaptured_errors = uncaptured.load(Ordering::SeqCst);
    report.backend_calls = backend.call_log().len();

    print_report(&report, format)
}

fn run_session(
    client: &Arc<ClientConnection>,
    server: &ServerConnection,
    backend: &SoftwareBackend,
    frames: u32,
    report: &mut LoopbackReport,
) -> Result<()> {
    let device = DeviceHandle::create(
        client,
        DeviceDescriptor {
            label: Some("loopback".to_string()),
        },
    )?;
    device.push_error_scope(ErrorFilter::Validation);

    let texture = device.create_texture(TextureDescriptor::new_2d(
        64,
        64,
        TextureFormat::Rgba8Unorm,
        TextureUsages::RENDER_ATTACHMENT | TextureUsages::TEXTURE_BINDING,
    ));
    let view = texture.create_view(None);
    let sampler = device.create_sampler(Default::default());
    let uniforms = device.create_buffer(BufferDescriptor {
        label: Some("uniforms".to_string()),
        size: 256,
        usage: BufferUsages::UNIFORM | BufferUsages::COPY_DST,
        mapped_at_creation: false,
    });

    let layout = device.create_bind_group_layout(BindGroupLayoutDescriptor {
        label: None,
        entries: vec![
            BindGroupLayoutEntry {
                binding: 0,
                visibility: ShaderStages::VERTEX | ShaderStages::FRAGMENT,
                ty: BindingType::UniformBuffer,
            },
            BindGroupLayoutEntry {
                binding: 1,
                visibility: ShaderStages::FRAGMENT,
                ty: BindingType::Sampler,
            },
        ],
    });
    let bind_group = device.create_bind_group(BindGroupDescriptor {
        label: None,
        layout: layout.identifier(),
        entries: vec![
            BindGroupEntry {
                binding: 0,
                resource: BindingResource::Buffer {
                    buffer: uniforms.identifier(),
                    offset: 0,
                    size: None,
                },
            },
            BindGroupEntry {
                binding: 1,
                resource: BindingResource::Sampler(sampler.identifier()),
            },
        ],
    });

    let pipeline_layout = device.create_pipeline_layout(PipelineLayoutDescriptor {
        label: None,
        bind_group_layouts: vec![layout.identifier()],
    });
    let statistics = device.create_query_set(QuerySetDescriptor {
        label: Some("statistics".to_string()),
        ty: QueryType::PipelineStatistics,
        count: 1,
    });

    let shader = device.create_shader_module(ShaderModuleDescriptor {
        label: None,
        code: SHADER.to_string(),
    });
    let pipeline_descriptor = RenderPipelineDescriptor {
        label: Some("loopback".to_string()),
        layout: Some(pipeline_layout.identifier()),
        vertex: ProgrammableStage {
            module: shader.identifier(),
            entry_point: "vs_main".to_string(),
        },
        fragment: Some(FragmentState {
            stage: ProgrammableStage {
                module: shader.identifier(),
                entry_point: "fs_main".to_string(),
            },
            targets: vec![TextureFormat::Rgba8Unorm],
        }),
        primitive: Default::default(),
    };
    let pipeline = device.create_render_pipeline(pipeline_descriptor.clone());

    // The software backend parks async pipelines until they are flushed.
    let (pipeline_tx, pipeline_rx) = crossbeam_channel::bounded(1);
    device.create_render_pipeline_async(pipeline_descriptor, move |result| {
        let _ = pipeline_tx.send(result);
    });
    if !wait_until(|| backend.pending_pipeline_count() == 1) {
        bail!("asynchronous pipeline never reached the backend");
    }
    backend.flush_pending_pipelines();
    let async_pipeline = pipeline_rx
        .recv_timeout(WAIT)
        .context("asynchronous pipeline never completed")?;
    report.async_pipeline = match &async_pipeline {
        Ok(handle) => format!("created {}", handle.identifier()),
        Err(failure) => format!("failed: {}", failure),
    };

    let encoder = device.create_command_encoder(Default::default());
    let pass = encoder.begin_render_pass(RenderPassDescriptor {
        color_attachments: vec![RenderPassColorAttachment {
            view: view.identifier(),
            resolve_target: None,
            clear_value: Some(Color::BLACK),
            load_op: LoadOp::Clear,
            store_op: StoreOp::Store,
        }],
        ..Default::default()
    });
    pass.set_pipeline(&pipeline);
    pass.begin_pipeline_statistics_query(&statistics, 0);
    pass.set_bind_group(0, Some(&bind_group), Vec::new());
    // Never created: dropped on the privileged side, the pass is untouched.
    pass.set_bind_group_by_id(1, ObjectIdentifier::generate(), Vec::new());
    pass.draw(3, 1, 0, 0);
    pass.end_pipeline_statistics_query();
    pass.end();
    let commands = encoder.finish(Default::default());
    device.submit(&[&commands]);

    let clean = pop_error_scope(&device)?;
    if let Some(error) = clean {
        bail!("session raised an unexpected error: {}", error);
    }

    device.push_error_scope(ErrorFilter::Validation);
    let _empty_shader = device.create_shader_module(ShaderModuleDescriptor::default());
    report.captured_error = pop_error_scope(&device)?.map(|error| error.to_string());

    // The view outlives its texture.
    texture.destroy();
    drop(texture);

    let fetched = fetch_frames(client, server, backend, frames, report)?;
    report.frames_fetched = fetched;
    report.while_alive = Accounting::capture(server, backend);
    Ok(())
}

fn pop_error_scope(device: &DeviceHandle) -> Result<Option<gpuproc::GpuError>> {
    let (tx, rx) = crossbeam_channel::bounded(1);
    device.pop_error_scope(move |result| {
        let _ = tx.send(result);
    });
    let popped = rx.recv_timeout(WAIT).context("error scope pop never answered")?;
    popped.map_err(|failure| anyhow::anyhow!("error scope pop failed: {}", failure))
}

fn fetch_frames(
    client: &Arc<ClientConnection>,
    server: &ServerConnection,
    backend: &SoftwareBackend,
    frames: u32,
    report: &mut LoopbackReport,
) -> Result<u32> {
    let (frame_tx, frame_rx) = crossbeam_channel::unbounded::<Arc<RemoteVideoFrameProxy>>();
    let destination = client.register_video_frame_destination(move |frame| {
        let _ = frame_tx.send(frame);
    });

    let size = FrameSize::new(320, 240);
    let mut fetched = 0;
    for index in 0..frames {
        let frame = backend.create_video_frame(
            size,
            PixelFormat::Bgra32,
            MediaTime::from_nanos(i64::from(index) * 33_333_333),
            index as u8,
        );
        server.send_video_frame(destination, frame)?;

        let proxy = frame_rx
            .recv_timeout(WAIT)
            .context("frame never reached its destination")?;
        // Fetched once, then served from the handle's cache.
        let first = proxy.pixel_buffer();
        let second = proxy.pixel_buffer();
        match (first, second) {
            (Some(first), Some(second)) if Arc::ptr_eq(&first, &second) => {
                if first.len() != PixelFormat::Bgra32.packed_len(size) {
                    bail!("frame {} has {} bytes", index, first.len());
                }
                fetched += 1;
            }
            _ => tracing::warn!("[Loopback] Frame {} produced no pixels", index),
        }
        report.pixel_round_trips += proxy.pixel_buffer_requests();
    }

    client.unregister_video_frame_destination(destination);
    // Announced to a destination that no longer exists: released unused.
    server.send_video_frame(
        destination,
        backend.create_video_frame(size, PixelFormat::Bgra32, MediaTime::ZERO, 0),
    )?;
    Ok(fetched)
}

fn tcp_pair(
    config: &ProxyConfig,
) -> Result<(gpuproc::ClientEndpoint, gpuproc::ServerEndpoint)> {
    let listener = TcpListener::bind("127.0.0.1:0").context("Failed to bind loopback socket")?;
    let address = listener.local_addr()?;
    let client_stream = TcpStream::connect(address).context("Failed to connect loopback socket")?;
    let (server_stream, _) = listener.accept()?;
    tracing::debug!("[Loopback] TCP transport on {}", address);
    Ok((
        Transport::client_over_stream(client_stream, config)?,
        Transport::server_over_stream(server_stream, config)?,
    ))
}

fn wait_until(condition: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + WAIT;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
    condition()
}

fn print_report(report: &LoopbackReport, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(report)?),
        OutputFormat::Yaml => print!("{}", serde_yaml::to_string(report)?),
        OutputFormat::Pretty => {
            println!("Loopback session {} over {}\n", report.connection, report.transport);
            println!("  async pipeline:     {}", report.async_pipeline);
            println!(
                "  captured error:     {}",
                report.captured_error.as_deref().unwrap_or("none")
            );
            println!("  uncaptured errors:  {}", report.uncaptured_errors);
            println!(
                "  frames fetched:     {} ({} pixel round trips)",
                report.frames_fetched, report.pixel_round_trips
            );
            println!("  backend calls:      {}", report.backend_calls);
            println!();
            println!("                      heap  registry  backing  tombstones  frames");
            for (label, accounting) in [
                ("while alive", &report.while_alive),
                ("after release", &report.after_release),
            ] {
                println!(
                    "  {:<18} {:>6} {:>9} {:>8} {:>11} {:>7}",
                    label,
                    accounting.heap,
                    accounting.registry,
                    accounting.live_backing_objects,
                    accounting.pending_releases,
                    accounting.video_frames
                );
            }
            println!();
            println!(
                "  torn down:          {}",
                if report.torn_down { "yes" } else { "no" }
            );
        }
    }
    Ok(())
}
