// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

pub mod backing;
pub mod client;
pub mod completion;
pub mod config;
pub mod connection;
pub mod descriptors;
pub mod dispatch;
pub mod error;
pub mod heap;
pub mod identifier;
pub mod logging;
pub mod messages;
pub mod proxies;
pub mod registry;
pub mod video_frame;
pub mod wire;

pub use backing::{BackingObject, GpuError, GpuResult, ObjectKind};
pub use client::*;
pub use completion::{CompletionHandler, CompletionRegistry};
pub use config::{LoggingConfig, ProxyConfig};
pub use connection::{ClientConnection, ClientEndpoint, ServerConnection, ServerEndpoint, Transport};
pub use dispatch::DispatchContext;
pub use error::*;
pub use heap::ObjectHeap;
pub use identifier::*;
pub use messages::{ClientMessage, ProxyMessage, ReplyFailure, ReplyPayload, ServerMessage};
pub use proxies::{ProxyBase, ResourceProxy};
pub use registry::ObjectRegistry;
pub use video_frame::*;
