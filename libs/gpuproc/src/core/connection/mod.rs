// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Both ends of a proxy connection and the channels between them.

mod client;
mod server;
mod transport;

pub use client::{ClientConnection, ReplyCallback, UncapturedErrorHandler, VideoFrameDestination};
pub use server::ServerConnection;
pub use transport::{ClientEndpoint, DuplexStream, ServerEndpoint, Transport};
