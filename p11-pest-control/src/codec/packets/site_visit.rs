use std::collections::HashMap;
use std::ops::ControlFlow;

use bytes::BytesMut;

use crate::codec::{packets, Error, Parser, RawPacketDecoder, Validator, Writer};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Count {
    pub species: String,
    pub count: u32,
}

#[derive(Debug, PartialEq)]
pub struct Packet {
    pub site: u32,
    pub populations: Vec<Count>,
}

impl Packet {
    #[must_use]
    pub fn new(site: u32, populations: Vec<Count>) -> Self {
        Self { site, populations }
    }

    /// Collapses duplicate species entries, rejecting the message if any
    /// duplicate carries a conflicting count.
    pub fn counts_by_species(&self) -> Result<HashMap<&str, u32>, Error> {
        let mut counts = HashMap::new();

        for entry in &self.populations {
            match counts.get(entry.species.as_str()) {
                Some(&existing) if existing != entry.count => {
                    return Err(Error::MalformedFrame)
                }
                _ => {
                    counts.insert(entry.species.as_str(), entry.count);
                }
            }
        }

        Ok(counts)
    }

    pub(crate) fn write_packet(&self) -> Vec<u8> {
        let mut writer = Writer::new(0x58);

        writer.write_u32(self.site);
        writer.write_array(&self.populations, |writer, entry| {
            writer.write_str(&entry.species);
            writer.write_u32(entry.count);
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
            let count = parser.read_u32();
            Count { species, count }
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

        let populations = vec![Count {
            species: "dog".to_string(),
            count: 5,
        }];

        let mut buffer = vec![];
        {
            let mut writer = FramedWrite::new(&mut buffer, PacketCodec::new());
            writer
                .send(Packet::new(42, populations.clone()).into())
                .await
                .unwrap();
        }

        let mut reader = FramedRead::new(buffer.as_slice(), PacketCodec::new());
        let packets::Packet::SiteVisit(raw_packet) = reader.try_next().await.unwrap().unwrap()
        else {
            panic!("invalid packet");
        };

        assert_eq!(Packet::new(42, populations), raw_packet);
    }

    #[test]
    fn identical_duplicate_species_are_allowed() {
        let packet = Packet::new(
            42,
            vec![
                Count {
                    species: "dog".to_string(),
                    count: 5,
                },
                Count {
                    species: "dog".to_string(),
                    count: 5,
                },
            ],
        );

        let counts = packet.counts_by_species().unwrap();
        assert_eq!(counts["dog"], 5);
    }

    #[test]
    fn conflicting_duplicate_species_are_rejected() {
        let packet = Packet::new(
            42,
            vec![
                Count {
                    species: "dog".to_string(),
                    count: 5,
                },
                Count {
                    species: "dog".to_string(),
                    count: 6,
                },
            ],
        );

        assert!(packet.counts_by_species().is_err());
    }
}
