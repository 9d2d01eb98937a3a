use std::ops::ControlFlow;

use bytes::BytesMut;

use crate::codec::{packets, Error, Parser, RawPacketDecoder, Validator, Writer};

pub const PROTOCOL: &str = "pestcontrol";
pub const VERSION: u32 = 1;

#[derive(Debug, PartialEq)]
pub struct Packet {
    pub protocol: String,
    pub version: u32,
}

impl Packet {
    #[must_use]
    pub fn new() -> Self {
        Self {
            protocol: PROTOCOL.to_string(),
            version: VERSION,
        }
    }

    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.protocol == PROTOCOL && self.version == VERSION
    }

    pub(crate) fn write_packet(&self) -> Vec<u8> {
        let mut writer = Writer::new(0x50);

        writer.write_str(&self.protocol);
        writer.write_u32(self.version);

        writer.finalize()
    }
}

impl Default for Packet {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, PartialEq)]
pub struct PacketDecoder;

impl RawPacketDecoder for PacketDecoder {
    type Decoded<'a> = Packet;

    fn decode(data: &[u8]) -> Self::Decoded<'_> {
        let mut parser = Parser::new(data);

        parser.read_u8();
        parser.read_u32();

        let protocol = parser.read_str();
        let version = parser.read_u32();

        Packet { protocol, version }
    }
}

pub(crate) fn read_packet(src: &mut BytesMut) -> Result<Option<packets::Packet>, Error> {
    let mut validator = Validator::new(src);

    if let ControlFlow::Break(b) = validator.validate_type() {
        return b;
    }

    if let ControlFlow::Break(b) = validator.validate_length() {
        return b;
    }

    if let ControlFlow::Break(b) = validator.validate_str() {
        return b;
    }

    if let ControlFlow::Break(b) = validator.validate_u32() {
        return b;
    }

    if let ControlFlow::Break(b) = validator.validate_checksum() {
        return b;
    }

    let raw_packet = validator.raw_packet::<PacketDecoder>()?;

    Ok(Some(raw_packet.decode().into()))
}

#[cfg(test)]
mod tests {
    use futures::{SinkExt, TryStreamExt};

    use tokio_util::codec::{FramedRead, FramedWrite};

    use crate::codec::packets::PacketCodec;
    use crate::tests::init_tracing_subscriber;

    use super::*;

    #[tokio::test]
    async fn test_read() {
        init_tracing_subscriber();

        #[rustfmt::skip]
        let data = [
            0x50,
            0x00, 0x00, 0x00, 0x19,
            0x0b, b'p', b'e', b's', b't', b'c', b'o', b'n', b't', b'r', b'o', b'l',
            0x00, 0x00, 0x00, 0x01,
            0xce,
        ]
        .as_slice();

        let mut reader = FramedRead::new(data, PacketCodec::new());

        let packets::Packet::Hello(raw_packet) = reader.try_next().await.unwrap().unwrap() else {
            panic!("invalid packet");
        };

        assert!(raw_packet.is_valid());
    }

    #[tokio::test]
    async fn test_write_is_readable() {
        init_tracing_subscriber();

        let mut buffer = vec![];
        {
            let mut writer = FramedWrite::new(&mut buffer, PacketCodec::new());
            writer.send(Packet::new().into()).await.unwrap();
        }

        let mut reader = FramedRead::new(buffer.as_slice(), PacketCodec::new());
        let packets::Packet::Hello(raw_packet) = reader.try_next().await.unwrap().unwrap() else {
            panic!("invalid packet");
        };

        assert!(raw_packet.is_valid());
    }
}
