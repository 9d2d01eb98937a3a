//! Binary wire format for Speed Daemon: message tag, big-endian integers,
//! length-prefixed ASCII strings. See the module-level docs in `lib.rs`
//! for the full protocol description.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Associates a message type with its single-byte wire tag.
pub trait TaggedMessage {
    const TAG: u8;
}

/// Decodes a message's payload (the tag byte itself has already been
/// consumed by the caller).
pub trait ReadFrom: Sized {
    #[allow(async_fn_in_trait)]
    async fn read_payload_from<R: AsyncRead + Unpin + Send>(
        read: &mut R,
    ) -> Result<Self, anyhow::Error>;
}

/// Encodes a whole message, tag included.
pub trait WriteTo {
    #[allow(async_fn_in_trait)]
    async fn write_to<W: AsyncWrite + Unpin + Send>(
        &self,
        write: &mut W,
    ) -> Result<(), anyhow::Error>;
}

async fn read_str<R: AsyncRead + Unpin + Send>(read: &mut R) -> Result<String, anyhow::Error> {
    let len = read.read_u8().await?;
    let mut buf = vec![0_u8; usize::from(len)];
    read.read_exact(&mut buf).await?;
    String::from_utf8(buf).map_err(|e| anyhow::anyhow!("invalid str: {e}"))
}

async fn write_str<W: AsyncWrite + Unpin + Send>(
    write: &mut W,
    s: &str,
) -> Result<(), anyhow::Error> {
    if s.len() > usize::from(u8::MAX) {
        return Err(anyhow::anyhow!("str too long: {} bytes", s.len()));
    }
    #[allow(clippy::cast_possible_truncation)]
    write.write_u8(s.len() as u8).await?;
    write.write_all(s.as_bytes()).await?;
    Ok(())
}

/// 0x10 Error (Server->Client)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Error {
    pub msg: String,
}

impl TaggedMessage for Error {
    const TAG: u8 = 0x10;
}

impl WriteTo for Error {
    async fn write_to<W: AsyncWrite + Unpin + Send>(
        &self,
        write: &mut W,
    ) -> Result<(), anyhow::Error> {
        write.write_u8(Self::TAG).await?;
        write_str(write, &self.msg).await
    }
}

/// 0x20 Plate (Client->Server)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Plate {
    pub plate: String,
    pub timestamp: u32,
}

impl TaggedMessage for Plate {
    const TAG: u8 = 0x20;
}

impl ReadFrom for Plate {
    async fn read_payload_from<R: AsyncRead + Unpin + Send>(
        read: &mut R,
    ) -> Result<Self, anyhow::Error> {
        let plate = read_str(read).await?;
        let timestamp = read.read_u32().await?;
        Ok(Self { plate, timestamp })
    }
}

/// 0x21 Ticket (Server->Client)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ticket {
    pub plate: String,
    pub road: u16,
    pub mile1: u16,
    pub timestamp1: u32,
    pub mile2: u16,
    pub timestamp2: u32,
    pub speed: u16,
}

impl TaggedMessage for Ticket {
    const TAG: u8 = 0x21;
}

impl WriteTo for Ticket {
    async fn write_to<W: AsyncWrite + Unpin + Send>(
        &self,
        write: &mut W,
    ) -> Result<(), anyhow::Error> {
        write.write_u8(Self::TAG).await?;
        write_str(write, &self.plate).await?;
        write.write_u16(self.road).await?;
        write.write_u16(self.mile1).await?;
        write.write_u32(self.timestamp1).await?;
        write.write_u16(self.mile2).await?;
        write.write_u32(self.timestamp2).await?;
        write.write_u16(self.speed).await?;
        Ok(())
    }
}

/// 0x40 `WantHeartbeat` (Client->Server)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WantHeartbeat {
    pub interval: u32,
}

impl TaggedMessage for WantHeartbeat {
    const TAG: u8 = 0x40;
}

impl ReadFrom for WantHeartbeat {
    async fn read_payload_from<R: AsyncRead + Unpin + Send>(
        read: &mut R,
    ) -> Result<Self, anyhow::Error> {
        let interval = read.read_u32().await?;
        Ok(Self { interval })
    }
}

/// 0x41 Heartbeat (Server->Client)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Heartbeat;

impl TaggedMessage for Heartbeat {
    const TAG: u8 = 0x41;
}

impl WriteTo for Heartbeat {
    async fn write_to<W: AsyncWrite + Unpin + Send>(
        &self,
        write: &mut W,
    ) -> Result<(), anyhow::Error> {
        write.write_u8(Self::TAG).await?;
        Ok(())
    }
}

/// 0x80 `IAmCamera` (Client->Server)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IAmCamera {
    pub road: u16,
    pub mile: u16,
    pub limit: u16,
}

impl TaggedMessage for IAmCamera {
    const TAG: u8 = 0x80;
}

impl ReadFrom for IAmCamera {
    async fn read_payload_from<R: AsyncRead + Unpin + Send>(
        read: &mut R,
    ) -> Result<Self, anyhow::Error> {
        let road = read.read_u16().await?;
        let mile = read.read_u16().await?;
        let limit = read.read_u16().await?;
        Ok(Self { road, mile, limit })
    }
}

/// 0x81 `IAmDispatcher` (Client->Server)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IAmDispatcher {
    pub roads: Vec<u16>,
}

impl TaggedMessage for IAmDispatcher {
    const TAG: u8 = 0x81;
}

impl ReadFrom for IAmDispatcher {
    async fn read_payload_from<R: AsyncRead + Unpin + Send>(
        read: &mut R,
    ) -> Result<Self, anyhow::Error> {
        let n = read.read_u8().await?;
        let mut roads = Vec::with_capacity(usize::from(n));
        for _ in 0..n {
            roads.push(read.read_u16().await?);
        }
        Ok(Self { roads })
    }
}
