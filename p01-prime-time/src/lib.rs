//! Prime Time: a newline-delimited JSON request/response protocol.
//!
//! Each line is a request `{"method":"isPrime","number":N}`; a well-formed
//! request gets back `{"method":"isPrime","prime":bool}`. A malformed
//! request (missing fields, wrong `method`, non-numeric `number`) gets one
//! malformed reply and the connection is closed.

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

use tracing::{debug, warn};

#[derive(Debug, Deserialize)]
struct Request {
    method: String,
    number: serde_json::Number,
}

#[derive(Debug, Serialize)]
struct Response {
    method: &'static str,
    prime: bool,
}

fn is_prime(n: &serde_json::Number) -> Option<bool> {
    if let Some(i) = n.as_i64() {
        return Some(is_prime_i64(i));
    }
    if n.as_f64().is_some() {
        // A non-integer value is never prime, but it is still a valid
        // number; only genuinely non-numeric JSON is malformed.
        return Some(false);
    }
    None
}

fn is_prime_i64(n: i64) -> bool {
    u64::try_from(n).is_ok_and(|n| n > 1 && primes::is_prime(n))
}

fn handle_line(line: &str) -> Result<Response, ()> {
    let request: Request = serde_json::from_str(line).map_err(|_| ())?;
    if request.method != "isPrime" {
        return Err(());
    }
    let prime = is_prime(&request.number).ok_or(())?;
    Ok(Response {
        method: "isPrime",
        prime,
    })
}

/// Drives one connection: replies to each well-formed request in turn,
/// disconnecting after the first malformed one.
///
/// # Errors
/// Returns an I/O error if reading or writing the socket fails.
#[tracing::instrument(skip(socket))]
pub async fn handler(socket: TcpStream) -> Result<(), anyhow::Error> {
    let (read, mut write) = socket.into_split();
    let mut lines = BufReader::new(read).lines();

    while let Some(line) = lines.next_line().await? {
        match handle_line(&line) {
            Ok(response) => {
                debug!("{line} -> {response:?}", response = response);
                let mut encoded = serde_json::to_vec(&response)?;
                encoded.push(b'\n');
                write.write_all(&encoded).await?;
            }
            Err(()) => {
                warn!("malformed request: {line}");
                write.write_all(b"{}\n").await?;
                break;
            }
        }
    }

    write.shutdown().await.ok();

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn primes() {
        assert!(!is_prime_i64(1));
        assert!(is_prime_i64(2));
        assert!(is_prime_i64(3));
        assert!(!is_prime_i64(4));
        assert!(is_prime_i64(17));
        assert!(!is_prime_i64(18));
    }

    #[test]
    fn valid_request_is_accepted() {
        let response = handle_line(r#"{"method":"isPrime","number":7}"#).unwrap();
        assert!(response.prime);
    }

    #[test]
    fn non_integer_number_is_never_prime_but_still_valid() {
        let response = handle_line(r#"{"method":"isPrime","number":7.5}"#).unwrap();
        assert!(!response.prime);
    }

    #[test]
    fn wrong_method_is_malformed() {
        assert!(handle_line(r#"{"method":"nope","number":7}"#).is_err());
    }

    #[test]
    fn missing_number_is_malformed() {
        assert!(handle_line(r#"{"method":"isPrime"}"#).is_err());
    }
}
