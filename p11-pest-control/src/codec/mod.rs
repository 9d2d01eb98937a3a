//! Checksummed frame format shared by every Pest Control message:
//! `<u8 code><u32 length><payload><u8 checksum>`, where `length` counts
//! the whole frame (header and checksum included) and the sum of every
//! byte in the frame is `0 mod 256`.
//!
//! `Validator` walks a buffered frame structurally (without allocating)
//! to decide whether a `tokio_util::codec::Decoder` has a complete frame
//! yet, and whether that frame is well-formed; `Parser`/`Writer` then do
//! the actual field-level decode/encode once a frame's bytes are known
//! good.

use std::marker::PhantomData;
use std::ops::ControlFlow;

use bytes::{Bytes, BytesMut};

pub mod packets;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("unknown packet type: 0x{0:02x}")]
    UnknownPacket(u8),

    #[error("invalid packet length: {0}")]
    InvalidLength(u32),

    #[error("checksum mismatch")]
    ChecksumMismatch,

    #[error("malformed frame")]
    MalformedFrame,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Decodes a validated, fully-buffered raw frame into a concrete packet
/// type. Implemented once per packet module.
pub(crate) trait RawPacketDecoder {
    type Decoded<'a>;

    fn decode(data: &[u8]) -> Self::Decoded<'_>;
}

/// A validated frame's bytes, not yet decoded into fields.
pub(crate) struct RawPacket<D> {
    data: Bytes,
    _marker: PhantomData<D>,
}

impl<D: RawPacketDecoder> RawPacket<D> {
    pub fn decode(&self) -> D::Decoded<'_> {
        D::decode(&self.data)
    }
}

/// Walks a buffered frame field-by-field, checking it is both fully
/// arrived and structurally sound before a packet module's own `Parser`
/// touches it.
pub(crate) struct Validator<'a> {
    src: &'a mut BytesMut,
    /// Declared total frame length, once `validate_length` has run.
    length: usize,
    /// Read cursor into the frame, in bytes from the start.
    cursor: usize,
}

type ReadResult = ControlFlow<Result<Option<packets::Packet>, Error>>;

impl<'a> Validator<'a> {
    pub fn new(src: &'a mut BytesMut) -> Self {
        Self {
            src,
            length: 0,
            cursor: 0,
        }
    }

    pub fn validate_type(&mut self) -> ReadResult {
        if self.src.is_empty() {
            return ControlFlow::Break(Ok(None));
        }

        self.cursor = 1;
        ControlFlow::Continue(())
    }

    pub fn validate_length(&mut self) -> ReadResult {
        if self.src.len() < 5 {
            return ControlFlow::Break(Ok(None));
        }

        let length = u32::from_be_bytes([self.src[1], self.src[2], self.src[3], self.src[4]]);

        if length < 6 {
            return ControlFlow::Break(Err(Error::InvalidLength(length)));
        }

        #[allow(clippy::cast_possible_truncation)]
        let length = length as usize;

        if self.src.len() < length {
            return ControlFlow::Break(Ok(None));
        }

        self.length = length;
        self.cursor = 5;

        ControlFlow::Continue(())
    }

    fn advance(&mut self, n: usize) -> ReadResult {
        // The final byte of the frame is always the checksum.
        if self.cursor + n > self.length.saturating_sub(1) {
            return ControlFlow::Break(Err(Error::MalformedFrame));
        }

        self.cursor += n;
        ControlFlow::Continue(())
    }

    pub fn validate_u8(&mut self) -> ReadResult {
        self.advance(1)
    }

    pub fn validate_u16(&mut self) -> ReadResult {
        self.advance(2)
    }

    pub fn validate_u32(&mut self) -> ReadResult {
        self.advance(4)
    }

    pub fn validate_str(&mut self) -> ReadResult {
        if self.cursor >= self.length.saturating_sub(1) {
            return ControlFlow::Break(Err(Error::MalformedFrame));
        }

        let str_len = usize::from(self.src[self.cursor]);
        self.advance(1 + str_len)
    }

    /// Validates a `u32`-counted array whose elements are each validated
    /// by `element`.
    pub fn validate_array(
        &mut self,
        mut element: impl FnMut(&mut Self) -> ReadResult,
    ) -> ReadResult {
        if let ControlFlow::Break(b) = self.validate_u32() {
            return ControlFlow::Break(b);
        }

        let count_offset = self.cursor - 4;
        let count = u32::from_be_bytes([
            self.src[count_offset],
            self.src[count_offset + 1],
            self.src[count_offset + 2],
            self.src[count_offset + 3],
        ]);

        for _ in 0..count {
            if let ControlFlow::Break(b) = element(self) {
                return ControlFlow::Break(b);
            }
        }

        ControlFlow::Continue(())
    }

    pub fn validate_checksum(&mut self) -> ReadResult {
        if self.cursor != self.length - 1 {
            return ControlFlow::Break(Err(Error::MalformedFrame));
        }

        let sum = self.src[..self.length]
            .iter()
            .fold(0_u32, |acc, &b| acc + u32::from(b));

        if sum % 256 != 0 {
            return ControlFlow::Break(Err(Error::ChecksumMismatch));
        }

        ControlFlow::Continue(())
    }

    pub fn raw_packet<D: RawPacketDecoder>(self) -> Result<RawPacket<D>, Error> {
        let data = self.src.split_to(self.length).freeze();
        Ok(RawPacket {
            data,
            _marker: PhantomData,
        })
    }
}

/// Reads fields out of an already-validated frame.
pub(crate) struct Parser<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Parser<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub fn read_u8(&mut self) -> u8 {
        let v = self.data[self.pos];
        self.pos += 1;
        v
    }

    pub fn read_u16(&mut self) -> u16 {
        let v = u16::from_be_bytes([self.data[self.pos], self.data[self.pos + 1]]);
        self.pos += 2;
        v
    }

    pub fn read_u32(&mut self) -> u32 {
        let v = u32::from_be_bytes([
            self.data[self.pos],
            self.data[self.pos + 1],
            self.data[self.pos + 2],
            self.data[self.pos + 3],
        ]);
        self.pos += 4;
        v
    }

    pub fn read_str(&mut self) -> String {
        let len = usize::from(self.read_u8());
        let s = String::from_utf8_lossy(&self.data[self.pos..self.pos + len]).into_owned();
        self.pos += len;
        s
    }

    pub fn read_array<T>(&mut self, mut element: impl FnMut(&mut Self) -> T) -> Vec<T> {
        let count = self.read_u32();
        (0..count).map(|_| element(self)).collect()
    }
}

/// Builds a frame field-by-field, back-filling the length and checksum
/// once every field has been written.
pub(crate) struct Writer {
    buf: Vec<u8>,
}

impl Writer {
    pub fn new(tag: u8) -> Self {
        let mut buf = Vec::new();
        buf.push(tag);
        buf.extend_from_slice(&0_u32.to_be_bytes());
        Self { buf }
    }

    pub fn write_u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    pub fn write_u16(&mut self, v: u16) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    pub fn write_u32(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    pub fn write_str(&mut self, s: &str) {
        #[allow(clippy::cast_possible_truncation)]
        self.write_u8(s.len() as u8);
        self.buf.extend_from_slice(s.as_bytes());
    }

    pub fn write_array<T>(&mut self, items: &[T], mut element: impl FnMut(&mut Self, &T)) {
        #[allow(clippy::cast_possible_truncation)]
        self.write_u32(items.len() as u32);
        for item in items {
            element(self, item);
        }
    }

    pub fn finalize(mut self) -> Vec<u8> {
        #[allow(clippy::cast_possible_truncation)]
        let total_len = (self.buf.len() + 1) as u32;
        self.buf[1..5].copy_from_slice(&total_len.to_be_bytes());

        let sum: u32 = self.buf.iter().map(|&b| u32::from(b)).sum();
        #[allow(clippy::cast_possible_truncation)]
        let checksum = ((256 - sum % 256) % 256) as u8;
        self.buf.push(checksum);

        self.buf
    }
}
