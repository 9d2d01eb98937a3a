//! Smoke test: a TCP echo server. Whatever bytes a client sends are
//! streamed back to it, unchanged, until the client closes its end.

use tokio::io::{self, AsyncWriteExt};
use tokio::net::TcpStream;

use tracing::{debug, warn};

/// Copies every byte read from `socket` back into it.
///
/// # Errors
/// Returns an I/O error if the copy itself fails; a clean peer shutdown
/// is not an error.
#[tracing::instrument(skip(socket))]
pub async fn echo(mut socket: TcpStream) -> Result<(), io::Error> {
    {
        let (mut read, mut write) = socket.split();

        match io::copy(&mut read, &mut write).await {
            Ok(n) => debug!("echoed {n} bytes"),
            Err(err) => warn!("echo failed: {err}"),
        }
    }

    socket.shutdown().await.ok();

    Ok(())
}
