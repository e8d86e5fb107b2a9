//! Chunked framing over a blocking stream.
//!
//! A message travels as a chunk count followed by that many length-prefixed
//! chunks, all little-endian. Chunking keeps bulk field arrays from forcing
//! one giant frame through the peer; the chunk size comes from the runtime
//! configuration's streaming buffer size.

use std::io::{self, Read, Write};
use std::time::Duration;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use postflow_core::RuntimeConfig;

use crate::endpoint::Stream;
use crate::error::{Error, Result};
use crate::msg::WireMessage;

/// Upper bound on any single chunk, a guard against corrupt length prefixes.
pub const MAX_FRAME_LEN: usize = 64 * 1024 * 1024;

/// A message-oriented wrapper around a connected stream.
pub struct Channel {
    stream: Stream,
    chunk_size: usize,
    compress: bool,
    timeout_ms: Option<u64>,
}

impl Channel {
    pub fn new(stream: Stream, config: &RuntimeConfig) -> Result<Self> {
        let timeout = config.call_timeout_ms.map(Duration::from_millis);
        stream.set_read_timeout(timeout)?;
        stream.set_write_timeout(timeout)?;
        Ok(Self {
            stream,
            chunk_size: config.streaming_buffer_size,
            compress: config.compress_streams,
            timeout_ms: config.call_timeout_ms,
        })
    }

    /// Whether outgoing payloads get compressed before framing.
    pub fn compress(&self) -> bool {
        self.compress
    }

    pub fn send(&mut self, msg: &WireMessage) -> Result<()> {
        let bytes = msg.to_bytes()?;
        let chunks: Vec<&[u8]> = bytes.chunks(self.chunk_size).collect();
        self.io(|stream| stream.write_u32::<LittleEndian>(chunks.len() as u32))?;
        for chunk in chunks {
            self.io(|stream| {
                stream.write_u32::<LittleEndian>(chunk.len() as u32)?;
                stream.write_all(chunk)
            })?;
        }
        self.io(|stream| stream.flush())?;
        Ok(())
    }

    pub fn receive(&mut self) -> Result<WireMessage> {
        let chunk_count = self.io(|stream| stream.read_u32::<LittleEndian>())?;
        let mut bytes = Vec::new();
        for _ in 0..chunk_count {
            let len = self.io(|stream| stream.read_u32::<LittleEndian>())? as usize;
            if len > MAX_FRAME_LEN {
                return Err(Error::OversizedFrame(len));
            }
            let start = bytes.len();
            bytes.resize(start + len, 0);
            self.io(|stream| stream.read_exact(&mut bytes[start..]))?;
        }
        WireMessage::from_bytes(&bytes)
    }

    /// Maps timeout-style io errors to the call timeout error.
    fn io<T>(&mut self, op: impl FnOnce(&mut Stream) -> io::Result<T>) -> Result<T> {
        op(&mut self.stream).map_err(|e| {
            match e.kind() {
                io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => {
                    Error::TimedOut(self.timeout_ms.unwrap_or(0))
                }
                _ => Error::Io(e),
            }
        })
    }
}
