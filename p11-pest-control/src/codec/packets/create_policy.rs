use std::ops::ControlFlow;

use bytes::BytesMut;

use crate::codec::{packets, Error, Parser, RawPacketDecoder, Validator, Writer};

pub const CULL: u8 = 0x90;
pub const CONSERVE: u8 = 0xa0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Cull,
    Conserve,
}

impl Action {
    #[must_use]
    pub fn code(self) -> u8 {
        match self {
            Action::Cull => CULL,
            Action::Conserve => CONSERVE,
        }
    }
}

#[derive(Debug, PartialEq)]
pub struct Packet {
    pub species: String,
    pub action: Action,
}

impl Packet {
    #[must_use]
    pub fn new(species: impl Into<String>, action: Action) -> Self {
        Self {
            species: species.into(),
            action,
        }
    }

    pub(crate) fn write_packet(&self) -> Vec<u8> {
        let mut writer = Writer::new(0x55);

        writer.write_str(&self.species);
        writer.write_u8(self.action.code());

        writer.finalize()
    }
}

#[derive(Debug, PartialEq)]
pub struct PacketDecoder;

impl RawPacketDecoder for PacketDecoder {
    type Decoded<'a> = Result<Packet, Error>;

    fn decode(data: &[u8]) -> Self::Decoded<'_> {
        let mut parser = Parser::new(data);

        parser.read_u8();
        parser.read_u32();

        let species = parser.read_str();
        let action = match parser.read_u8() {
            CULL => Action::Cull,
            CONSERVE => Action::Conserve,
            _ => return Err(Error::MalformedFrame),
        };

        Ok(Packet { species, action })
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

    if let ControlFlow::Break(b) = validator.validate_u8() {
        return b;
    }

    if let ControlFlow::Break(b) = validator.validate_checksum() {
        return b;
    }

    let raw_packet = validator.raw_packet::<PacketDecoder>()?;

    Ok(Some(raw_packet.decode()?.into()))
}

#[cfg(test)]
mod tests {
    use futures::{SinkExt, TryStreamExt};

    use tokio_util::codec::{FramedRead, FramedWrite};

    use crate::codec::packets::PacketCodec;
    use crate::tests::init_tracing_subscriber;

    use super::*;

    #[tokio::test]
    async fn test_write_then_read() {
        init_tracing_subscriber();

        let mut buffer = vec![];
        {
            let mut writer = FramedWrite::new(&mut buffer, PacketCodec::new());
            writer
                .send(Packet::new("dog", Action::Cull).into())
                .await
                .unwrap();
        }

        let mut reader = FramedRead::new(buffer.as_slice(), PacketCodec::new());
        let packets::Packet::CreatePolicy(raw_packet) = reader.try_next().await.unwrap().unwrap()
        else {
            panic!("invalid packet");
        };

        assert_eq!(Packet::new("dog", Action::Cull), raw_packet);
    }

    #[tokio::test]
    async fn test_unknown_action_is_malformed() {
        init_tracing_subscriber();

        #[rustfmt::skip]
        let data = [
            0x55,
            0x00, 0x00, 0x00, 0x0a,
            0x03, b'd', b'o', b'g',
            0x01,
            0x63,
        ]
        .as_slice();

        let mut reader = FramedRead::new(data, PacketCodec::new());
        assert!(reader.try_next().await.is_err());
    }
}
