// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Immutable description of a remote video frame, sent alongside its
//! identifier when the frame is handed to the client.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::core::identifier::ObjectReference;

/// Rational media timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MediaTime {
    pub value: i64,
    pub timescale: u32,
}

impl MediaTime {
    pub const ZERO: Self = Self {
        value: 0,
        timescale: 1,
    };

    pub fn new(value: i64, timescale: u32) -> Self {
        Self { value, timescale }
    }

    pub fn from_nanos(nanos: i64) -> Self {
        Self::new(nanos, 1_000_000_000)
    }

    pub fn as_seconds(&self) -> f64 {
        if self.timescale == 0 {
            return 0.0;
        }
        self.value as f64 / self.timescale as f64
    }
}

impl Default for MediaTime {
    fn default() -> Self {
        Self::ZERO
    }
}

impl fmt::Display for MediaTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.value, self.timescale)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum VideoRotation {
    #[default]
    None,
    UpsideDown,
    Right,
    Left,
}

impl VideoRotation {
    pub fn degrees(&self) -> u32 {
        match self {
            Self::None => 0,
            Self::UpsideDown => 180,
            Self::Right => 90,
            Self::Left => 270,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct FrameSize {
    pub width: u32,
    pub height: u32,
}

impl FrameSize {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

/// Pixel layout of a video frame. Values are the FourCC codes used by the
/// platform media stacks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[repr(u32)]
pub enum PixelFormat {
    /// 32-bit BGRA, 'BGRA'
    #[default]
    Bgra32 = 0x42475241,
    /// 32-bit RGBA, 'RGBA'
    Rgba32 = 0x52474241,
    /// NV12 4:2:0 bi-planar video range, '420v'
    Nv12VideoRange = 0x34323076,
    /// NV12 4:2:0 bi-planar full range, '420f'
    Nv12FullRange = 0x34323066,
    /// 8-bit grayscale, 'L008'
    Gray8 = 0x4C303038,
}

impl PixelFormat {
    pub const fn fourcc(&self) -> u32 {
        *self as u32
    }

    pub const fn is_yuv(&self) -> bool {
        matches!(self, Self::Nv12VideoRange | Self::Nv12FullRange)
    }

    /// Average bits per pixel across all planes.
    pub const fn bits_per_pixel(&self) -> u32 {
        match self {
            Self::Bgra32 | Self::Rgba32 => 32,
            Self::Nv12VideoRange | Self::Nv12FullRange => 12,
            Self::Gray8 => 8,
        }
    }

    /// Bytes per row of the first plane for a tightly packed buffer.
    pub const fn packed_bytes_per_row(&self, width: u32) -> u32 {
        match self {
            Self::Bgra32 | Self::Rgba32 => width * 4,
            Self::Nv12VideoRange | Self::Nv12FullRange | Self::Gray8 => width,
        }
    }

    /// Bytes needed for a tightly packed buffer of `size`.
    pub const fn packed_len(&self, size: FrameSize) -> usize {
        (size.width as usize * size.height as usize * self.bits_per_pixel() as usize) / 8
    }
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let bytes = self.fourcc().to_be_bytes();
        for byte in bytes {
            write!(f, "{}", byte as char)?;
        }
        Ok(())
    }
}

/// The realized CPU-side pixels of a frame.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PixelBuffer {
    pub size: FrameSize,
    pub format: PixelFormat,
    pub bytes_per_row: u32,
    #[serde(with = "serde_bytes_compat")]
    pub data: Vec<u8>,
}

impl PixelBuffer {
    /// Tightly packed buffer with every byte set to `value`.
    pub fn filled(size: FrameSize, format: PixelFormat, value: u8) -> Self {
        Self {
            size,
            format,
            bytes_per_row: format.packed_bytes_per_row(size.width),
            data: vec![value; format.packed_len(size)],
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl fmt::Debug for PixelBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PixelBuffer")
            .field("size", &self.size)
            .field("format", &self.format)
            .field("bytes_per_row", &self.bytes_per_row)
            .field("len", &self.data.len())
            .finish()
    }
}

/// Serialize pixel data as a byte string rather than a sequence of integers.
mod serde_bytes_compat {
    use serde::de::{Error, SeqAccess, Visitor};
    use serde::{Deserializer, Serializer};
    use std::fmt;

    pub fn serialize<S: Serializer>(data: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_bytes(data)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        struct BytesVisitor;

        impl<'de> Visitor<'de> for BytesVisitor {
            type Value = Vec<u8>;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a byte string")
            }

            fn visit_bytes<E: Error>(self, bytes: &[u8]) -> Result<Self::Value, E> {
                Ok(bytes.to_vec())
            }

            fn visit_byte_buf<E: Error>(self, bytes: Vec<u8>) -> Result<Self::Value, E> {
                Ok(bytes)
            }

            fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Self::Value, A::Error> {
                let mut bytes = Vec::with_capacity(seq.size_hint().unwrap_or(0));
                while let Some(byte) = seq.next_element::<u8>()? {
                    bytes.push(byte);
                }
                Ok(bytes)
            }
        }

        deserializer.deserialize_byte_buf(BytesVisitor)
    }
}

/// Everything the client learns about a frame when it is handed over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoFrameProperties {
    pub reference: ObjectReference,
    pub presentation_time: MediaTime,
    pub is_mirrored: bool,
    pub rotation: VideoRotation,
    pub size: FrameSize,
    pub pixel_format: PixelFormat,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pixel_format_display_is_fourcc() {
        assert_eq!(PixelFormat::Bgra32.to_string(), "BGRA");
        assert_eq!(PixelFormat::Nv12VideoRange.to_string(), "420v");
    }

    #[test]
    fn test_filled_buffer_is_tightly_packed() {
        let buffer = PixelBuffer::filled(FrameSize::new(4, 2), PixelFormat::Bgra32, 7);
        assert_eq!(buffer.bytes_per_row, 16);
        assert_eq!(buffer.len(), 32);
        assert!(buffer.data.iter().all(|b| *b == 7));

        let nv12 = PixelBuffer::filled(FrameSize::new(4, 2), PixelFormat::Nv12FullRange, 0);
        assert_eq!(nv12.len(), 12);
    }

    #[test]
    fn test_media_time_seconds() {
        assert_eq!(MediaTime::new(3, 2).as_seconds(), 1.5);
        assert_eq!(MediaTime::new(5, 0).as_seconds(), 0.0);
    }
}
