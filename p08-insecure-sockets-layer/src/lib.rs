//! Insecure Sockets Layer: a toy line-oriented protocol wrapped in a
//! per-connection obfuscation cipher.
//!
//! A connection opens with a cipher spec (see [`cipher`]); once
//! established, decrypted lines are comma-separated `NxTOY` requests and
//! the reply is the single highest-count request, re-encrypted.

pub mod cipher;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use tracing::{debug, warn};

use cipher::Cipher;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Cipher(#[from] cipher::Error),
}

/// Parses one decrypted request line and returns the highest-count toy
/// request, in the same `NxTOY` format. Returns `None` for an empty or
/// unparseable line.
#[must_use]
pub fn highest_count_request(line: &str) -> Option<&str> {
    line.split(',')
        .filter_map(|req| {
            let (count, _) = req.split_once('x')?;
            count.trim().parse::<u64>().ok().map(|n| (n, req))
        })
        .max_by_key(|&(n, _)| n)
        .map(|(_, req)| req)
}

/// Drives one connection: reads the cipher spec, then relays
/// highest-count-toy responses for each decrypted request line.
///
/// # Errors
/// Returns an error on I/O failure or an invalid/no-op cipher spec.
#[tracing::instrument(skip(socket))]
pub async fn handler(mut socket: TcpStream) -> Result<(), Error> {
    let mut spec_buf = Vec::new();
    let cipher = loop {
        let mut byte = [0_u8; 1];
        let n = socket.read(&mut byte).await?;
        if n == 0 {
            return Ok(());
        }
        spec_buf.push(byte[0]);

        if let Some((cipher, _)) = Cipher::parse(&spec_buf)? {
            break cipher;
        }
    };

    let mut decoder = cipher.decoder();
    let mut encoder = cipher.encoder();

    let mut pending = Vec::new();
    let mut buf = [0_u8; 4096];

    loop {
        let n = socket.read(&mut buf).await?;
        if n == 0 {
            break;
        }

        let mut chunk = buf[..n].to_vec();
        decoder.decode(&mut chunk);
        pending.extend_from_slice(&chunk);

        while let Some(pos) = pending.iter().position(|&b| b == b'\n') {
            let line_bytes: Vec<u8> = pending.drain(..=pos).collect();
            let Ok(line) = std::str::from_utf8(&line_bytes[..line_bytes.len() - 1]) else {
                warn!("dropping non-UTF8 request line");
                continue;
            };

            debug!("request: {line}");

            if let Some(response) = highest_count_request(line) {
                let mut out = format!("{response}\n").into_bytes();
                encoder.encode(&mut out);
                socket.write_all(&out).await?;
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn picks_the_highest_count() {
        let line = "10x toy car,15x dog on a string,4x inflatable motorcycle";
        assert_eq!(highest_count_request(line), Some("15x dog on a string"));
    }

    #[test]
    fn single_request_is_returned_as_is() {
        assert_eq!(highest_count_request("1x pony"), Some("1x pony"));
    }

    #[test]
    fn empty_line_has_no_response() {
        assert_eq!(highest_count_request(""), None);
    }
}
