// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use std::collections::HashSet;
use std::net::{TcpListener, TcpStream};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::Receiver;
use gpuproc::core::backing::{PrimitiveTopology, TextureFormat, TextureUsages};
use gpuproc::core::descriptors::{
    DeviceDescriptor, FragmentState, ProgrammableStage, RenderPipelineDescriptor,
    ShaderModuleDescriptor, TextureDescriptor,
};
use gpuproc::core::identifier::{ObjectReference, ReadReference};
use gpuproc::core::messages::{DeviceMessage, ProxyMessage};
use gpuproc::{
    ClientConnection, ClientEndpoint, ClientMessage, ObjectIdentifier, ProxyConfig,
    ServerConnection, ServerEndpoint, ServerMessage, SoftwareBackend, Transport,
};

pub const WAIT: Duration = Duration::from_secs(5);

/// A privileged-side connection driven synchronously through `dispatch`.
pub struct Harness {
    pub server: Arc<ServerConnection>,
    pub backend: SoftwareBackend,
    pub events: Receiver<ServerMessage>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(&ProxyConfig::default())
    }

    pub fn with_config(config: &ProxyConfig) -> Self {
        let backend = SoftwareBackend::new();
        let (tx, events) = crossbeam_channel::unbounded();
        let server = ServerConnection::new(Arc::new(backend.clone()), tx, config);
        Self {
            server,
            backend,
            events,
        }
    }

    pub fn send(&self, message: ClientMessage) {
        self.server.dispatch(message);
    }

    pub fn object(&self, destination: ObjectIdentifier, message: ProxyMessage) {
        self.send(ClientMessage::Object {
            destination,
            message,
        });
    }

    pub fn device_message(&self, device: ObjectIdentifier, message: DeviceMessage) {
        self.object(device, ProxyMessage::Device(message));
    }

    pub fn destroy(&self, identifier: ObjectIdentifier) {
        self.send(ClientMessage::Destroy { identifier });
    }

    pub fn create_device(&self) -> ObjectIdentifier {
        let identifier = ObjectIdentifier::generate();
        self.send(ClientMessage::CreateDevice {
            descriptor: DeviceDescriptor::default(),
            identifier,
        });
        identifier
    }

    pub fn create_texture(&self, device: ObjectIdentifier) -> ObjectIdentifier {
        let identifier = ObjectIdentifier::generate();
        self.device_message(
            device,
            DeviceMessage::CreateTexture {
                descriptor: TextureDescriptor::new_2d(
                    16,
                    16,
                    TextureFormat::Rgba8Unorm,
                    TextureUsages::RENDER_ATTACHMENT | TextureUsages::TEXTURE_BINDING,
                ),
                identifier,
            },
        );
        identifier
    }

    pub fn create_shader_module(&self, device: ObjectIdentifier, code: &str) -> ObjectIdentifier {
        let identifier = ObjectIdentifier::generate();
        self.device_message(
            device,
            DeviceMessage::CreateShaderModule {
                descriptor: ShaderModuleDescriptor {
                    label: None,
                    code: code.to_string(),
                },
                identifier,
            },
        );
        identifier
    }

    /// Every identifier in the heap is in the registry and vice versa.
    pub fn assert_coherent(&self) {
        let heap: HashSet<_> = self.server.heap().identifiers().into_iter().collect();
        let registry: HashSet<_> = self.server.registry().identifiers().into_iter().collect();
        assert_eq!(heap, registry, "heap and registry disagree");
        for identifier in &heap {
            assert_eq!(
                self.server.heap().kind_of(*identifier),
                self.server.registry().kind_of(*identifier)
            );
        }
    }

    pub fn next_event(&self) -> ServerMessage {
        self.events
            .recv_timeout(WAIT)
            .expect("no event from the privileged side")
    }

    pub fn assert_no_event(&self) {
        if let Ok(event) = self.events.try_recv() {
            panic!("unexpected event {:?}", event);
        }
    }
}

/// Both ends of a live connection over a real transport.
pub struct Loopback {
    pub server: Arc<ServerConnection>,
    pub client: Arc<ClientConnection>,
    pub backend: SoftwareBackend,
}

impl Loopback {
    pub fn in_process() -> Self {
        let (client, server) = Transport::in_process_pair();
        Self::connect(client, server, &ProxyConfig::default())
    }

    pub fn tcp() -> Self {
        let config = ProxyConfig::default();
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let client_stream = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (server_stream, _) = listener.accept().unwrap();
        Self::connect(
            Transport::client_over_stream(client_stream, &config).unwrap(),
            Transport::server_over_stream(server_stream, &config).unwrap(),
            &config,
        )
    }

    pub fn connect(client: ClientEndpoint, server: ServerEndpoint, config: &ProxyConfig) -> Self {
        let backend = SoftwareBackend::new();
        let server = ServerConnection::serve(server, Arc::new(backend.clone()), config).unwrap();
        let client = ClientConnection::connect(client, config).unwrap();
        Self {
            server,
            client,
            backend,
        }
    }

    /// Wait for the privileged side to catch up with everything sent so far.
    pub fn settle(&self) {
        let (tx, rx) = crossbeam_channel::bounded(1);
        let nowhere = ReadReference(ObjectReference::new(ObjectIdentifier::generate(), 0));
        self.client.send_with_reply(
            |reply| ClientMessage::FetchPixelBuffer {
                reference: nowhere,
                reply,
            },
            move |result| {
                let _ = tx.send(result);
            },
        );
        rx.recv_timeout(WAIT).expect("privileged side did not answer");
    }
}

pub fn pipeline_descriptor(module: ObjectIdentifier) -> RenderPipelineDescriptor {
    RenderPipelineDescriptor {
        label: None,
        layout: None,
        vertex: ProgrammableStage {
            module,
            entry_point: "vs_main".to_string(),
        },
        fragment: Some(FragmentState {
            stage: ProgrammableStage {
                module,
                entry_point: "fs_main".to_string(),
            },
            targets: vec![TextureFormat::Rgba8Unorm],
        }),
        primitive: PrimitiveTopology::TriangleList,
    }
}

pub fn wait_until(condition: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + WAIT;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
    condition()
}
