// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Ordered message channels between the two ends of a connection.

use std::io::{Read, Write};
use std::net::{Shutdown, TcpStream};
use std::thread;

use crossbeam_channel::{Receiver, Sender};
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::core::config::ProxyConfig;
use crate::core::messages::{ClientMessage, ServerMessage};
use crate::core::{Result, wire};

/// Client half: sends requests, receives replies and events.
#[derive(Debug)]
pub struct ClientEndpoint {
    pub outgoing: Sender<ClientMessage>,
    pub incoming: Receiver<ServerMessage>,
}

/// Privileged half: one inbound stream plus the outgoing event channel.
#[derive(Debug)]
pub struct ServerEndpoint {
    pub incoming: Receiver<ClientMessage>,
    pub outgoing: Sender<ServerMessage>,
}

/// A byte stream that can be split into independently owned read and write
/// halves.
pub trait DuplexStream: Read + Write + Send + Sized + 'static {
    fn try_clone_stream(&self) -> std::io::Result<Self>;

    /// Signal end-of-stream to the peer once the writer is done.
    fn shutdown_write(&self) -> std::io::Result<()>;
}

impl DuplexStream for TcpStream {
    fn try_clone_stream(&self) -> std::io::Result<Self> {
        self.try_clone()
    }

    fn shutdown_write(&self) -> std::io::Result<()> {
        self.shutdown(Shutdown::Write)
    }
}

#[cfg(unix)]
impl DuplexStream for std::os::unix::net::UnixStream {
    fn try_clone_stream(&self) -> std::io::Result<Self> {
        self.try_clone()
    }

    fn shutdown_write(&self) -> std::io::Result<()> {
        self.shutdown(Shutdown::Write)
    }
}

pub struct Transport;

impl Transport {
    /// Two endpoints joined by in-memory channels.
    pub fn in_process_pair() -> (ClientEndpoint, ServerEndpoint) {
        let (client_tx, server_rx) = crossbeam_channel::unbounded();
        let (server_tx, client_rx) = crossbeam_channel::unbounded();
        (
            ClientEndpoint {
                outgoing: client_tx,
                incoming: client_rx,
            },
            ServerEndpoint {
                incoming: server_rx,
                outgoing: server_tx,
            },
        )
    }

    /// Client endpoint whose messages travel as wire frames over `stream`.
    pub fn client_over_stream<S: DuplexStream>(
        stream: S,
        config: &ProxyConfig,
    ) -> Result<ClientEndpoint> {
        let (outgoing, incoming) = bridge(stream, "client", config)?;
        Ok(ClientEndpoint { outgoing, incoming })
    }

    /// Privileged endpoint whose messages travel as wire frames over `stream`.
    pub fn server_over_stream<S: DuplexStream>(
        stream: S,
        config: &ProxyConfig,
    ) -> Result<ServerEndpoint> {
        let (outgoing, incoming) = bridge(stream, "server", config)?;
        Ok(ServerEndpoint { incoming, outgoing })
    }
}

/// Pump `Out` messages into `stream` and frames from `stream` into `In`
/// messages, each on its own named thread. The reader ends on end-of-stream
/// or a codec error; the writer ends when every sender is dropped.
fn bridge<S, Out, In>(
    stream: S,
    side: &str,
    config: &ProxyConfig,
) -> Result<(Sender<Out>, Receiver<In>)>
where
    S: DuplexStream,
    Out: Serialize + Send + 'static,
    In: DeserializeOwned + Send + 'static,
{
    let mut reader = stream.try_clone_stream()?;
    let mut writer = stream;
    let max_frame_size = config.max_frame_size;

    let (out_tx, out_rx) = crossbeam_channel::unbounded::<Out>();
    let (in_tx, in_rx) = crossbeam_channel::unbounded::<In>();

    let writer_name = format!("{}-{}-writer", config.thread_name_prefix, side);
    thread::Builder::new().name(writer_name).spawn(move || {
        for message in out_rx.iter() {
            if let Err(e) = wire::write_frame(&mut writer, &message, max_frame_size) {
                tracing::warn!("[Transport] Write failed, closing stream: {}", e);
                break;
            }
        }
        if let Err(e) = writer.shutdown_write() {
            tracing::debug!("[Transport] Shutdown after last write: {}", e);
        }
    })?;

    let reader_name = format!("{}-{}-reader", config.thread_name_prefix, side);
    thread::Builder::new().name(reader_name).spawn(move || {
        loop {
            match wire::read_frame::<_, In>(&mut reader, max_frame_size) {
                Ok(Some(message)) => {
                    if in_tx.send(message).is_err() {
                        break;
                    }
                }
                Ok(None) => {
                    tracing::debug!("[Transport] Peer closed the stream");
                    break;
                }
                Err(e) => {
                    tracing::warn!("[Transport] Read failed, closing stream: {}", e);
                    break;
                }
            }
        }
    })?;

    Ok((out_tx, in_rx))
}
