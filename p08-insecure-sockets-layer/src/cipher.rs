//! Toy stream cipher: a per-connection sequence of reversible
//! byte-transforming operations, some of which depend on the byte's
//! position in the stream.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    ReverseBits,
    Xor(u8),
    XorPos,
    Add(u8),
    AddPos,
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("unknown cipher op: 0x{0:02x}")]
    UnknownOp(u8),
    #[error("cipher spec has no terminating 0x00 byte")]
    Unterminated,
    #[error("cipher spec is a no-op and must be rejected")]
    NoOp,
}

/// A parsed, validated cipher spec. Two independent position counters
/// are kept by the caller, one per stream direction.
#[derive(Debug, Clone)]
pub struct Cipher {
    ops: Vec<Op>,
}

impl Cipher {
    /// Parses a cipher spec from `bytes`, consuming up to and including
    /// its terminating `0x00`. Returns the parsed cipher and the number
    /// of bytes consumed, or `Ok(None)` if `bytes` doesn't yet contain a
    /// terminator.
    ///
    /// # Errors
    /// Returns [`Error::UnknownOp`] for an unrecognised op byte, or
    /// [`Error::NoOp`] if the parsed spec never changes any byte.
    pub fn parse(bytes: &[u8]) -> Result<Option<(Self, usize)>, Error> {
        let mut ops = Vec::new();
        let mut i = 0;

        loop {
            let Some(&tag) = bytes.get(i) else {
                return Ok(None);
            };

            match tag {
                0x00 => {
                    i += 1;
                    break;
                }
                0x01 => {
                    ops.push(Op::ReverseBits);
                    i += 1;
                }
                0x02 => {
                    let Some(&n) = bytes.get(i + 1) else {
                        return Ok(None);
                    };
                    ops.push(Op::Xor(n));
                    i += 2;
                }
                0x03 => {
                    ops.push(Op::XorPos);
                    i += 1;
                }
                0x04 => {
                    let Some(&n) = bytes.get(i + 1) else {
                        return Ok(None);
                    };
                    ops.push(Op::Add(n));
                    i += 2;
                }
                0x05 => {
                    ops.push(Op::AddPos);
                    i += 1;
                }
                other => return Err(Error::UnknownOp(other)),
            }
        }

        let cipher = Self { ops };
        if cipher.is_no_op() {
            return Err(Error::NoOp);
        }

        Ok(Some((cipher, i)))
    }

    /// A spec is a no-op if it leaves every byte unchanged regardless of
    /// its position in the stream. Position-dependent ops (`xorpos`,
    /// `addpos`) only cancel out for a position-independent spec if they
    /// cancel at every position, so checking two distinct positions is
    /// enough to catch both kinds.
    fn is_no_op(&self) -> bool {
        (0_u8..=255).all(|b| {
            self.apply(&mut Position(0), b) == b && self.apply(&mut Position(1), b) == b
        })
    }

    fn apply(&self, pos: &mut Position, byte: u8) -> u8 {
        let mut b = byte;
        for op in &self.ops {
            b = match op {
                Op::ReverseBits => b.reverse_bits(),
                Op::Xor(n) => b ^ n,
                Op::XorPos => b ^ pos.as_u8(),
                Op::Add(n) => b.wrapping_add(*n),
                Op::AddPos => b.wrapping_add(pos.as_u8()),
            };
        }
        b
    }

    fn unapply(&self, pos: &mut Position, byte: u8) -> u8 {
        let mut b = byte;
        for op in self.ops.iter().rev() {
            b = match op {
                Op::ReverseBits => b.reverse_bits(),
                Op::Xor(n) => b ^ n,
                Op::XorPos => b ^ pos.as_u8(),
                Op::Add(n) => b.wrapping_sub(*n),
                Op::AddPos => b.wrapping_sub(pos.as_u8()),
            };
        }
        b
    }

    #[must_use]
    pub fn encoder(&self) -> Stream<'_> {
        Stream { cipher: self, pos: Position(0) }
    }

    #[must_use]
    pub fn decoder(&self) -> Stream<'_> {
        Stream { cipher: self, pos: Position(0) }
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Position(u32);

impl Position {
    #[allow(clippy::cast_possible_truncation)]
    fn as_u8(self) -> u8 {
        self.0 as u8
    }

    fn advance(&mut self) {
        self.0 = self.0.wrapping_add(1);
    }
}

/// One direction of a cipher conversation; tracks its own byte position.
pub struct Stream<'a> {
    cipher: &'a Cipher,
    pos: Position,
}

impl Stream<'_> {
    pub fn encode(&mut self, bytes: &mut [u8]) {
        for b in bytes {
            *b = self.cipher.apply(&mut self.pos, *b);
            self.pos.advance();
        }
    }

    pub fn decode(&mut self, bytes: &mut [u8]) {
        for b in bytes {
            *b = self.cipher.unapply(&mut self.pos, *b);
            self.pos.advance();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reversebits_then_xor1_roundtrips() {
        let (cipher, consumed) = Cipher::parse(&[0x02, 0x01, 0x01, 0x00]).unwrap().unwrap();
        assert_eq!(consumed, 4);

        let original = b"hello".to_vec();
        let mut encoded = original.clone();
        cipher.encoder().encode(&mut encoded);
        assert_ne!(encoded, original);

        let mut decoded = encoded;
        cipher.decoder().decode(&mut decoded);
        assert_eq!(decoded, original);
    }

    #[test]
    fn rejects_pure_no_op_spec() {
        // A single reversebits cancelling an empty spec is fine, but an
        // explicit identity (xor 0) must be rejected.
        assert!(matches!(
            Cipher::parse(&[0x02, 0x00, 0x00]),
            Err(Error::NoOp)
        ));
    }

    #[test]
    fn rejects_cancelling_reversebits_pair() {
        assert!(matches!(
            Cipher::parse(&[0x01, 0x01, 0x00]),
            Err(Error::NoOp)
        ));
    }

    #[test]
    fn xorpos_is_not_a_no_op() {
        let (cipher, _) = Cipher::parse(&[0x03, 0x00]).unwrap().unwrap();
        let mut encoded = vec![0_u8; 4];
        cipher.encoder().encode(&mut encoded);
        // position 0 maps 0 -> 0, but position 1 doesn't, so it's real.
        assert_ne!(encoded, vec![0, 0, 0, 0]);
    }

    #[test]
    fn incomplete_spec_returns_none() {
        assert!(Cipher::parse(&[0x02, 0x01]).unwrap().is_none());
    }

    #[test]
    fn unknown_op_is_an_error() {
        assert!(matches!(
            Cipher::parse(&[0xff, 0x00]),
            Err(Error::UnknownOp(0xff))
        ));
    }
}
