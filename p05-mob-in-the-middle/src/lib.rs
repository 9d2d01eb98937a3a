//! Mob in the Middle: a transparent TCP proxy in front of a chat server
//! that rewrites Boguscoin addresses mentioned in chat lines to redirect
//! payments to a fixed address, man-in-the-middle style.
//!
//! A token is a Boguscoin address when it is 26-35 alphanumeric
//! characters, starts with `7`, and is a whole whitespace-delimited word
//! (bounded by the start/end of the line or a space on either side).

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

use tracing::{debug, info};

/// Tony's address: every rewritten Boguscoin address is replaced with this.
pub const TONYS_ADDRESS: &str = "7YWHMfk9JZe0LM0g1ZauHuiSxhI";

fn is_boguscoin_address(token: &str) -> bool {
    let len = token.len();
    (26..=35).contains(&len) && token.starts_with('7') && token.chars().all(|c| c.is_ascii_alphanumeric())
}

/// Rewrites every Boguscoin address token in `line` to [`TONYS_ADDRESS`],
/// leaving everything else untouched.
#[must_use]
pub fn rewrite_line(line: &str) -> String {
    line.split(' ')
        .map(|token| if is_boguscoin_address(token) { TONYS_ADDRESS } else { token })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Proxies one client connection to `upstream`, rewriting chat lines in
/// both directions.
///
/// # Errors
/// Returns an I/O error if either side of the proxy fails.
#[tracing::instrument(skip(client))]
pub async fn handler(client: TcpStream, upstream: String) -> Result<(), anyhow::Error> {
    let server = TcpStream::connect(&upstream).await?;
    info!("connected to upstream {upstream}");

    let (client_read, mut client_write) = client.into_split();
    let (server_read, mut server_write) = server.into_split();

    let mut client_lines = BufReader::new(client_read).lines();
    let mut server_lines = BufReader::new(server_read).lines();

    loop {
        tokio::select! {
            line = client_lines.next_line() => {
                match line? {
                    Some(line) => {
                        let rewritten = rewrite_line(&line);
                        debug!("client -> server: {rewritten}");
                        server_write.write_all(format!("{rewritten}\n").as_bytes()).await?;
                    }
                    None => break,
                }
            }

            line = server_lines.next_line() => {
                match line? {
                    Some(line) => {
                        let rewritten = rewrite_line(&line);
                        debug!("server -> client: {rewritten}");
                        client_write.write_all(format!("{rewritten}\n").as_bytes()).await?;
                    }
                    None => break,
                }
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rewrites_a_bare_address() {
        assert_eq!(
            rewrite_line("Please send payment to 7F1u3wSD5RbOHQmupo9nx4TnhQ"),
            format!("Please send payment to {TONYS_ADDRESS}")
        );
    }

    #[test]
    fn leaves_non_addresses_alone() {
        assert_eq!(rewrite_line("hi alice, how are you?"), "hi alice, how are you?");
    }

    #[test]
    fn rejects_addresses_that_are_too_short_or_long() {
        assert_eq!(rewrite_line("7shortaddr"), "7shortaddr");
        let too_long = format!("7{}", "a".repeat(40));
        assert_eq!(rewrite_line(&too_long), too_long);
    }

    #[test]
    fn rewrites_multiple_addresses_in_one_line() {
        let a = "7F1u3wSD5RbOHQmupo9nx4TnhQ";
        let b = "7iKDZEwPZSqIvDnHvVN2r0hUWXD5rHX";
        let line = format!("{a} and also {b}");
        let expected = format!("{TONYS_ADDRESS} and also {TONYS_ADDRESS}");
        assert_eq!(rewrite_line(&line), expected);
    }

    #[test]
    fn requires_leading_seven() {
        let not_boguscoin = "A1u3wSD5RbOHQmupo9nx4TnhQa";
        assert_eq!(rewrite_line(not_boguscoin), not_boguscoin);
    }
}
