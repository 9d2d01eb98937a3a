use std::ops::ControlFlow;

use bytes::BytesMut;

use crate::codec::{packets, Error, Parser, RawPacketDecoder, Validator, Writer};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub species: String,
    pub min: u32,
    pub max: u32,
}

#[derive(Debug, PartialEq)]
pub struct Packet {
    pub site: u32,
    pub populations: Vec<Target>,
}

impl Packet {
    #[must_use]
    pub fn new(site: u32, populations: Vec<Target>) -> Self {
        Self { site, populations }
    }

    pub(crate) fn write_packet(&self) -> Vec<u8> {
        let mut writer = Writer::new(0x54);

        writer.write_u32(self.site);
        writer.write_array(&self.populations, |writer, target| {
            writer.write_str(&target.species);
            writer.write_u32(target.min);
            writer.write_u32(target.max);
        });

        writer.finalize()
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

        let site = parser.read_u32();
        let populations = parser.read_array(|parser| {
            let species = parser.read_str();
            let min = parser.read_u32();
            let max = parser.read_u32();
            Target { species, min, max }
        });

        Packet { site, populations }
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

    if let ControlFlow::Break(b) = validator.validate_u32() {
        return b;
    }

    if let ControlFlow::Break(b) = validator.validate_array(|v| {
        if let ControlFlow::Break(b) = v.validate_str() {
            return ControlFlow::Break(b);
        }
        if let ControlFlow::Break(b) = v.validate_u32() {
            return ControlFlow::Break(b);
        }
        v.validate_u32()
    }) {
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
    async fn test_write_then_read() {
        init_tracing_subscriber();

        let populations = vec![
            Target {
                species: "dog".to_string(),
                min: 1,
                max: 3,
            },
            Target {
                species: "rat".to_string(),
                min: 0,
                max: 10,
            },
        ];

        let mut buffer = vec![];
        {
            let mut writer = FramedWrite::new(&mut buffer, PacketCodec::new());
            writer
                .send(Packet::new(42, populations.clone()).into())
                .await
                .unwrap();
        }

        let mut reader = FramedRead::new(buffer.as_slice(), PacketCodec::new());
        let packets::Packet::TargetPopulations(raw_packet) =
            reader.try_next().await.unwrap().unwrap()
        else {
            panic!("invalid packet");
        };

        assert_eq!(Packet::new(42, populations), raw_packet);
    }

    #[tokio::test]
    async fn test_empty_populations_round_trips() {
        init_tracing_subscriber();

        let mut buffer = vec![];
        {
            let mut writer = FramedWrite::new(&mut buffer, PacketCodec::new());
            writer.send(Packet::new(42, vec![]).into()).await.unwrap();
        }

        let mut reader = FramedRead::new(buffer.as_slice(), PacketCodec::new());
        let packets::Packet::TargetPopulations(raw_packet) =
            reader.try_next().await.unwrap().unwrap()
        else {
            panic!("invalid packet");
        };

        assert_eq!(Packet::new(42, vec![]), raw_packet);
    }
}
