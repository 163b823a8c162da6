// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Length-prefixed MessagePack framing for byte-stream transports.
//!
//! Each frame is a 4-byte big-endian body length followed by the body,
//! encoded with named fields so both ends tolerate field reordering.

use std::io::{ErrorKind, Read, Write};

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::core::{ProxyError, Result};

const LENGTH_PREFIX: usize = 4;

pub fn encode<T: Serialize>(message: &T) -> Result<Vec<u8>> {
    rmp_serde::to_vec_named(message).map_err(|e| ProxyError::Codec(e.to_string()))
}

pub fn decode<T: DeserializeOwned>(body: &[u8]) -> Result<T> {
    rmp_serde::from_slice(body).map_err(|e| ProxyError::Codec(e.to_string()))
}

/// Encode `message` and write it as one frame.
pub fn write_frame<W: Write, T: Serialize>(
    writer: &mut W,
    message: &T,
    max_frame_size: usize,
) -> Result<()> {
    let body = encode(message)?;
    if body.len() > max_frame_size {
        return Err(ProxyError::Codec(format!(
            "outgoing frame of {} bytes exceeds the {} byte limit",
            body.len(),
            max_frame_size
        )));
    }
    let length = u32::try_from(body.len())
        .map_err(|_| ProxyError::Codec(format!("frame of {} bytes too large", body.len())))?;
    writer.write_all(&length.to_be_bytes())?;
    writer.write_all(&body)?;
    writer.flush()?;
    Ok(())
}

/// Read one frame. Returns `Ok(None)` when the stream ends cleanly between
/// frames; a stream ending inside a frame is an error.
pub fn read_frame<R: Read, T: DeserializeOwned>(
    reader: &mut R,
    max_frame_size: usize,
) -> Result<Option<T>> {
    let mut prefix = [0u8; LENGTH_PREFIX];
    let mut filled = 0;
    while filled < LENGTH_PREFIX {
        match reader.read(&mut prefix[filled..]) {
            Ok(0) if filled == 0 => return Ok(None),
            Ok(0) => {
                return Err(ProxyError::Codec(
                    "stream ended inside a frame header".to_string(),
                ));
            }
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }

    let length = u32::from_be_bytes(prefix) as usize;
    if length > max_frame_size {
        return Err(ProxyError::Codec(format!(
            "incoming frame of {} bytes exceeds the {} byte limit",
            length, max_frame_size
        )));
    }

    let mut body = vec![0u8; length];
    reader.read_exact(&mut body).map_err(|e| match e.kind() {
        ErrorKind::UnexpectedEof => ProxyError::Codec("stream ended inside a frame".to_string()),
        _ => e.into(),
    })?;
    decode(&body).map(Some)
}
