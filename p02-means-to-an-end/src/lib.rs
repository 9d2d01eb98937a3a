//! Means to an End: a binary per-connection price ledger.
//!
//! Each connection speaks independent 9-byte messages: `I` inserts a
//! `(timestamp, price)` sample, `Q` asks for the mean price over an
//! inclusive timestamp range. State does not cross connections.

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use tracing::{debug, warn};

#[derive(Debug, Default)]
struct Ledger {
    samples: Vec<(i32, i32)>,
}

impl Ledger {
    fn insert(&mut self, timestamp: i32, price: i32) {
        self.samples.push((timestamp, price));
    }

    fn mean(&self, mintime: i32, maxtime: i32) -> i32 {
        if mintime > maxtime {
            return 0;
        }

        let mut sum = 0_i64;
        let mut count = 0_i64;

        for &(t, price) in &self.samples {
            if t >= mintime && t <= maxtime {
                sum += i64::from(price);
                count += 1;
            }
        }

        if count == 0 {
            0
        } else {
            #[allow(clippy::cast_possible_truncation)]
            {
                (sum / count) as i32
            }
        }
    }
}

/// Drives one connection until it closes or sends a malformed message.
///
/// # Errors
/// Returns an I/O error if reading or writing the socket fails.
#[tracing::instrument(skip(socket))]
pub async fn handler(mut socket: TcpStream) -> Result<(), anyhow::Error> {
    let mut ledger = Ledger::default();

    loop {
        let mut msg = [0_u8; 9];
        match socket.read_exact(&mut msg).await {
            Ok(_) => {}
            Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => break,
            Err(err) => return Err(err.into()),
        }

        let a = i32::from_be_bytes(msg[1..5].try_into().expect("4 bytes"));
        let b = i32::from_be_bytes(msg[5..9].try_into().expect("4 bytes"));

        match msg[0] {
            b'I' => {
                debug!("insert timestamp={a} price={b}");
                ledger.insert(a, b);
            }
            b'Q' => {
                let mean = ledger.mean(a, b);
                debug!("query [{a},{b}] -> {mean}");
                socket.write_all(&mean.to_be_bytes()).await?;
            }
            other => {
                warn!("unknown message type: 0x{other:02x}");
                return Err(anyhow::anyhow!("unknown message type: 0x{other:02x}"));
            }
        }
    }

    Ok(())
}
