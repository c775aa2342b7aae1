//! Newline-delimited request framing.
//!
//! Client input is read in bounded chunks and accumulated until a `\n`
//! appears. The bytes before it form one frame; anything after it is kept
//! for the next frame, so pipelined requests are not lost.

use tokio::io::{AsyncRead, AsyncReadExt};

use crate::config::schema::FramingConfig;
use crate::relay::error::{RelayError, RelayResult};

const DELIMITER: u8 = b'\n';

/// Accumulates client bytes and yields complete frames.
#[derive(Debug)]
pub struct FrameReader {
    /// Unparsed input: the current unterminated frame plus any remainder.
    buf: Vec<u8>,
    /// Prefix of `buf` already known to contain no delimiter.
    scanned: usize,
    chunk: Vec<u8>,
    max_frame_bytes: usize,
}

impl FrameReader {
    pub fn new(read_chunk_bytes: usize, max_frame_bytes: usize) -> Self {
        Self {
            buf: Vec::with_capacity(read_chunk_bytes),
            scanned: 0,
            chunk: vec![0; read_chunk_bytes.max(1)],
            max_frame_bytes,
        }
    }

    pub fn from_config(config: &FramingConfig) -> Self {
        Self::new(config.read_chunk_bytes, config.max_frame_bytes)
    }

    /// Number of bytes buffered but not yet returned as a frame.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Append raw input.
    pub fn extend(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Remove and return the next complete frame, if one is buffered.
    ///
    /// The delimiter (and a `\r` right before it) is not part of the frame.
    pub fn take_frame(&mut self) -> RelayResult<Option<Vec<u8>>> {
        let found = self.buf[self.scanned..]
            .iter()
            .position(|&b| b == DELIMITER)
            .map(|offset| self.scanned + offset);

        let Some(idx) = found else {
            self.scanned = self.buf.len();
            if self.buf.len() > self.max_frame_bytes {
                return Err(RelayError::FrameTooLarge { limit: self.max_frame_bytes });
            }
            return Ok(None);
        };

        let mut frame: Vec<u8> = self.buf.drain(..=idx).collect();
        self.scanned = 0;
        frame.pop();
        if frame.last() == Some(&b'\r') {
            frame.pop();
        }

        if frame.len() > self.max_frame_bytes {
            return Err(RelayError::FrameTooLarge { limit: self.max_frame_bytes });
        }
        Ok(Some(frame))
    }

    /// Read from `reader` until a complete frame is available.
    ///
    /// Returns [`RelayError::ClientClosed`] if the peer closes with nothing
    /// buffered and [`RelayError::IncompleteFrame`] if it closes mid-frame.
    pub async fn read_frame<R>(&mut self, reader: &mut R) -> RelayResult<Vec<u8>>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        loop {
            if let Some(frame) = self.take_frame()? {
                return Ok(frame);
            }

            let n = reader.read(&mut self.chunk).await?;
            if n == 0 {
                return Err(if self.buf.is_empty() {
                    RelayError::ClientClosed
                } else {
                    RelayError::IncompleteFrame { buffered: self.buf.len() }
                });
            }
            self.buf.extend_from_slice(&self.chunk[..n]);
        }
    }
}
