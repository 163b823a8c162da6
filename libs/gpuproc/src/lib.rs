// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Cross-process GPU and media resource proxies.
//!
//! A client drives resources that live in a privileged process through
//! identifier-addressed handles. The privileged side keeps an
//! [`ObjectHeap`] of proxies (the owners) and an [`ObjectRegistry`] of
//! backing resources (the lookup table used to resolve identifiers inside
//! descriptors), and applies the operations each proxy receives to the
//! [`backing`](core::backing) API.

#![allow(clippy::too_many_arguments)] // Render pass commands mirror the backing API
#![allow(clippy::type_complexity)] // Callback types are clear in context

pub mod core;

pub use core::backing::software::SoftwareBackend;
pub use core::{
    ClientConnection, ClientEndpoint, ClientMessage, DeviceHandle, GpuError, LoggingConfig,
    ObjectHeap, ObjectIdentifier, ObjectKind, ObjectRegistry, ProxyConfig, ProxyError,
    RemoteVideoFrameProxy, ReplyFailure, Result, ServerConnection, ServerEndpoint,
    ServerMessage, Transport,
};
