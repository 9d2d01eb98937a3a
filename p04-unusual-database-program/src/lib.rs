//! Unusual Database Program: a UDP key-value store.
//!
//! Each datagram is either an insert (`key=value`, split on the first
//! `=`) or a retrieve (`key` alone, no `=`) whose response echoes back
//! `key=value`. Retrieving an unset key gets no reply. `version` is a
//! read-only key: inserts that target it are accepted but discarded.

use std::collections::HashMap;

use tokio::net::UdpSocket;

use tracing::{debug, info};

const VERSION: &str = "Unusual Database Program 1.0";
const MAX_DATAGRAM: usize = 1000;

#[derive(Debug, Default)]
struct Store {
    entries: HashMap<String, String>,
}

impl Store {
    fn apply(&mut self, datagram: &str) -> Option<String> {
        match datagram.split_once('=') {
            Some((key, value)) => {
                if key != "version" {
                    self.entries.insert(key.to_string(), value.to_string());
                }
                None
            }
            None => {
                let value = if datagram == "version" {
                    VERSION
                } else {
                    self.entries.get(datagram)?.as_str()
                };
                Some(format!("{datagram}={value}"))
            }
        }
    }
}

/// Runs the UDP request/response loop until the socket errors.
///
/// # Errors
/// Returns an error if the socket itself fails.
pub async fn run(socket: UdpSocket) -> Result<(), std::io::Error> {
    let mut store = Store::default();
    let mut buf = [0_u8; MAX_DATAGRAM];

    info!("start");

    loop {
        let (len, peer) = socket.recv_from(&mut buf).await?;
        let Ok(datagram) = std::str::from_utf8(&buf[..len]) else {
            debug!("dropping non-UTF8 datagram from {peer}");
            continue;
        };

        debug!("{peer} -> {datagram}");

        if let Some(response) = store.apply(datagram) {
            let response = if response.len() > MAX_DATAGRAM {
                &response[..MAX_DATAGRAM]
            } else {
                &response
            };
            socket.send_to(response.as_bytes(), peer).await?;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_then_retrieve() {
        let mut store = Store::default();
        assert_eq!(store.apply("foo=bar"), None);
        assert_eq!(store.apply("foo"), Some("foo=bar".to_string()));
    }

    #[test]
    fn value_may_contain_equals_signs() {
        let mut store = Store::default();
        store.apply("foo=bar=baz");
        assert_eq!(store.apply("foo"), Some("foo=bar=baz".to_string()));
    }

    #[test]
    fn version_is_reported_and_read_only() {
        let mut store = Store::default();
        assert_eq!(
            store.apply("version"),
            Some(format!("version={VERSION}"))
        );
        store.apply("version=bogus");
        assert_eq!(
            store.apply("version"),
            Some(format!("version={VERSION}"))
        );
    }

    #[test]
    fn retrieving_unset_key_has_no_reply() {
        let mut store = Store::default();
        assert_eq!(store.apply("nope"), None);
    }

    #[test]
    fn empty_value_is_a_valid_insert() {
        let mut store = Store::default();
        store.apply("foo=");
        assert_eq!(store.apply("foo"), Some("foo=".to_string()));
    }
}
