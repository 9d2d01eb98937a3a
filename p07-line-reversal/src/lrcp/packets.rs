//! Wire format for LRCP: four ASCII, slash-delimited message types,
//! each at most 1000 bytes including delimiters. `data` payloads escape
//! literal `/` and `\` as `\/` and `\\`.

/// Every encoded packet, delimiters and escapes included, must fit in
/// one UDP datagram of this size.
pub const MAX_PACKET_LEN: usize = 1000;

/// Session ids (and positions/lengths) are non-negative and fit in 31 bits.
pub const MAX_FIELD: u32 = (1 << 31) - 1;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    Connect {
        session: u32,
    },
    Data {
        session: u32,
        pos: u32,
        data: Vec<u8>,
    },
    Ack {
        session: u32,
        length: u32,
    },
    Close {
        session: u32,
    },
}

impl Packet {
    #[must_use]
    pub fn session(&self) -> u32 {
        match self {
            Self::Connect { session }
            | Self::Data { session, .. }
            | Self::Ack { session, .. }
            | Self::Close { session } => *session,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("packet exceeds {MAX_PACKET_LEN} bytes")]
    TooLong,
    #[error("packet is not ASCII")]
    NotAscii,
    #[error("malformed packet")]
    Malformed,
    #[error("field out of the 31-bit non-negative range")]
    FieldOutOfRange,
}

impl TryFrom<&[u8]> for Packet {
    type Error = DecodeError;

    fn try_from(raw: &[u8]) -> Result<Self, Self::Error> {
        if raw.len() > MAX_PACKET_LEN {
            return Err(DecodeError::TooLong);
        }
        if !raw.is_ascii() {
            return Err(DecodeError::NotAscii);
        }

        // Safety net: `is_ascii` above guarantees valid UTF-8 too.
        let s = std::str::from_utf8(raw).map_err(|_| DecodeError::NotAscii)?;

        let body = s
            .strip_prefix('/')
            .and_then(|rest| rest.strip_suffix('/'))
            .ok_or(DecodeError::Malformed)?;

        let fields = split_unescaped(body);

        match fields.as_slice() {
            [t, session] if t == "connect" => Ok(Self::Connect {
                session: parse_field(session)?,
            }),
            [t, session] if t == "close" => Ok(Self::Close {
                session: parse_field(session)?,
            }),
            [t, session, length] if t == "ack" => Ok(Self::Ack {
                session: parse_field(session)?,
                length: parse_field(length)?,
            }),
            [t, session, pos, data] if t == "data" => Ok(Self::Data {
                session: parse_field(session)?,
                pos: parse_field(pos)?,
                data: data.as_bytes().to_vec(),
            }),
            _ => Err(DecodeError::Malformed),
        }
    }
}

fn parse_field(field: &str) -> Result<u32, DecodeError> {
    if field.is_empty() || !field.bytes().all(|b| b.is_ascii_digit()) {
        return Err(DecodeError::Malformed);
    }
    let value: u32 = field.parse().map_err(|_| DecodeError::Malformed)?;
    if value > MAX_FIELD {
        return Err(DecodeError::FieldOutOfRange);
    }
    Ok(value)
}

/// Splits `s` on unescaped `/`, unescaping `\/` and `\\` into the field
/// they separate as it goes. A field count mismatch after this runs is
/// what makes a message malformed, per protocol.
fn split_unescaped(s: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut chars = s.chars();

    while let Some(c) = chars.next() {
        match c {
            '\\' => match chars.next() {
                Some(escaped @ ('/' | '\\')) => current.push(escaped),
                Some(other) => {
                    current.push('\\');
                    current.push(other);
                }
                None => current.push('\\'),
            },
            '/' => fields.push(std::mem::take(&mut current)),
            other => current.push(other),
        }
    }
    fields.push(current);

    fields
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum EncodeError {
    #[error("destination buffer too small")]
    BufferTooSmall,
    #[error("encoded packet would exceed {MAX_PACKET_LEN} bytes")]
    TooLong,
}

/// Encodes a packet to its wire representation, escaping `data` payloads.
///
/// # Errors
/// Returns [`EncodeError::TooLong`] if the encoded frame would exceed
/// [`MAX_PACKET_LEN`].
pub fn encode(packet: &Packet) -> Result<Vec<u8>, EncodeError> {
    let mut out = match packet {
        Packet::Connect { session } => format!("/connect/{session}/").into_bytes(),
        Packet::Close { session } => format!("/close/{session}/").into_bytes(),
        Packet::Ack { session, length } => format!("/ack/{session}/{length}/").into_bytes(),
        Packet::Data { session, pos, data } => {
            let mut out = format!("/data/{session}/{pos}/").into_bytes();
            for &b in data {
                if b == b'/' || b == b'\\' {
                    out.push(b'\\');
                }
                out.push(b);
            }
            out.push(b'/');
            out
        }
    };

    if out.len() > MAX_PACKET_LEN {
        return Err(EncodeError::TooLong);
    }

    out.shrink_to_fit();
    Ok(out)
}

/// Encodes into a caller-supplied buffer, returning the number of bytes
/// written. Mirrors `std::io::Write` but is synchronous and infallible
/// with respect to I/O, matching the needs of test harnesses that bridge
/// packets onto raw sockets.
pub trait SyncWrite {
    /// # Errors
    /// Returns [`EncodeError`] if `packet` cannot be encoded into `self`.
    fn write_value(&mut self, packet: &Packet) -> Result<usize, EncodeError>;
}

impl SyncWrite for &mut [u8] {
    fn write_value(&mut self, packet: &Packet) -> Result<usize, EncodeError> {
        let encoded = encode(packet)?;
        if encoded.len() > self.len() {
            return Err(EncodeError::BufferTooSmall);
        }
        self[..encoded.len()].copy_from_slice(&encoded);
        Ok(encoded.len())
    }
}
