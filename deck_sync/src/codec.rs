//! Wire framing and JSON mapping.
//!
//! Two framings are supported on the same link kinds:
//! - newline: one JSON object per `\n`-terminated line (`\r\n` tolerated)
//! - length-prefixed: a u32 big-endian byte count followed by the JSON body

use crate::config::Framing;
use crate::error::CodecError;
use crate::protocol::ServerMessage;
use serde::de::DeserializeOwned;
use serde::Serialize;

const LENGTH_HEADER: usize = 4;

pub fn encode_frame<T: Serialize>(framing: Framing, msg: &T) -> Result<Vec<u8>, CodecError> {
    let body = serde_json::to_vec(msg)?;
    let mut out = Vec::with_capacity(body.len() + LENGTH_HEADER);
    match framing {
        Framing::Newline => {
            out.extend_from_slice(&body);
            out.push(b'\n');
        }
        Framing::LengthPrefixed => {
            let len = u32::try_from(body.len()).map_err(|_| CodecError::FrameTooLarge {
                len: body.len(),
                max: u32::MAX as usize,
            })?;
            out.extend_from_slice(&len.to_be_bytes());
            out.extend_from_slice(&body);
        }
    }
    Ok(out)
}

pub fn decode_message<T: DeserializeOwned>(frame: &[u8]) -> Result<T, CodecError> {
    Ok(serde_json::from_slice(frame)?)
}

pub fn decode_server_message(frame: &[u8]) -> Result<ServerMessage, CodecError> {
    decode_message(frame)
}

/// Splits an inbound byte stream into frames. Chunk boundaries are arbitrary;
/// a frame may span any number of `push` calls.
#[derive(Debug)]
pub struct FrameDecoder {
    framing: Framing,
    max_frame: usize,
    buf: Vec<u8>,
    // newline: drop bytes until the next terminator; length: bytes left to skip
    discarding: bool,
    skip_remaining: usize,
}

impl FrameDecoder {
    pub fn new(framing: Framing, max_frame: usize) -> Self {
        Self {
            framing,
            max_frame,
            buf: Vec::new(),
            discarding: false,
            skip_remaining: 0,
        }
    }

    /// Drops any partial frame, e.g. after the link went down.
    pub fn reset(&mut self) {
        self.buf.clear();
        self.discarding = false;
        self.skip_remaining = 0;
    }

    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    pub fn push(&mut self, chunk: &[u8]) -> Vec<Result<Vec<u8>, CodecError>> {
        match self.framing {
            Framing::Newline => self.push_newline(chunk),
            Framing::LengthPrefixed => self.push_length_prefixed(chunk),
        }
    }

    fn push_newline(&mut self, chunk: &[u8]) -> Vec<Result<Vec<u8>, CodecError>> {
        let mut out = Vec::new();
        for &b in chunk {
            if b == b'\n' {
                if self.discarding {
                    self.discarding = false;
                    continue;
                }
                let line = trim_ascii(&self.buf);
                if !line.is_empty() {
                    out.push(Ok(line.to_vec()));
                }
                self.buf.clear();
                continue;
            }
            if self.discarding {
                continue;
            }
            self.buf.push(b);
            if self.buf.len() > self.max_frame {
                out.push(Err(CodecError::FrameTooLarge {
                    len: self.buf.len(),
                    max: self.max_frame,
                }));
                self.buf.clear();
                self.discarding = true;
            }
        }
        out
    }

    fn push_length_prefixed(&mut self, mut chunk: &[u8]) -> Vec<Result<Vec<u8>, CodecError>> {
        let mut out = Vec::new();
        loop {
            if self.skip_remaining > 0 {
                let n = self.skip_remaining.min(chunk.len());
                self.skip_remaining -= n;
                chunk = &chunk[n..];
                if self.skip_remaining > 0 {
                    return out;
                }
            }
            self.buf.extend_from_slice(chunk);
            chunk = &[];

            if self.buf.len() < LENGTH_HEADER {
                return out;
            }
            let header = [self.buf[0], self.buf[1], self.buf[2], self.buf[3]];
            let len = u32::from_be_bytes(header) as usize;
            if len > self.max_frame {
                out.push(Err(CodecError::FrameTooLarge {
                    len,
                    max: self.max_frame,
                }));
                let available = self.buf.len() - LENGTH_HEADER;
                let rest: Vec<u8> = if available >= len {
                    self.buf[LENGTH_HEADER + len..].to_vec()
                } else {
                    self.skip_remaining = len - available;
                    Vec::new()
                };
                self.buf = rest;
                continue;
            }
            if self.buf.len() < LENGTH_HEADER + len {
                return out;
            }
            let frame = self.buf[LENGTH_HEADER..LENGTH_HEADER + len].to_vec();
            self.buf.drain(..LENGTH_HEADER + len);
            out.push(Ok(frame));
            if self.buf.is_empty() {
                return out;
            }
        }
    }
}

fn trim_ascii(bytes: &[u8]) -> &[u8] {
    let start = bytes
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(bytes.len());
    let end = bytes
        .iter()
        .rposition(|b| !b.is_ascii_whitespace())
        .map_or(start, |i| i + 1);
    &bytes[start..end]
}
