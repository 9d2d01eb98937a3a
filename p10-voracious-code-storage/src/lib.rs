//! Voracious Code Storage: a newline-command protocol over per-path,
//! append-only file revisions.
//!
//! One connection, one client: after each command the server emits a
//! fresh `READY` prompt. `HELP`, `LIST dir`, `GET file [revision]`, and
//! `PUT file length` (followed by exactly `length` raw bytes) are the
//! only supported commands.

pub mod store;

use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::Mutex;

use tracing::{debug, warn};

use store::{validate_path, Entry, Store};

const HELP: &str = "OK usage: HELP|GET|PUT|LIST";

fn entry_line(entry: &Entry) -> String {
    match entry {
        Entry::File { name, revision } => format!("{name} r{revision}"),
        Entry::Dir { name } => format!("{name} DIR"),
    }
}

/// Drives one connection against the shared `store`, issuing a `READY`
/// prompt after every command until the client disconnects.
///
/// # Errors
/// Returns an I/O error if reading or writing the socket fails.
#[tracing::instrument(skip(socket, store))]
pub async fn handler(socket: TcpStream, store: Arc<Mutex<Store>>) -> Result<(), anyhow::Error> {
    let (read, mut write) = socket.into_split();
    let mut reader = BufReader::new(read);

    loop {
        write.write_all(b"READY\n").await?;

        let mut line = String::new();
        if reader.read_line(&mut line).await? == 0 {
            return Ok(());
        }
        let line = line.trim_end_matches(['\n', '\r']);
        if line.is_empty() {
            continue;
        }

        let mut parts = line.split_whitespace();
        let command = parts.next().unwrap_or_default();

        match command.to_ascii_uppercase().as_str() {
            "HELP" => {
                write.write_all(format!("{HELP}\n").as_bytes()).await?;
            }

            "LIST" => {
                let Some(dir) = parts.next() else {
                    write.write_all(b"ERR usage: LIST dir\n").await?;
                    continue;
                };
                if validate_path(dir).is_err() {
                    write.write_all(b"ERR illegal dir name\n").await?;
                    continue;
                }

                let entries = store.lock().await.list(dir);
                write
                    .write_all(format!("OK {}\n", entries.len()).as_bytes())
                    .await?;
                for entry in &entries {
                    write.write_all(format!("{}\n", entry_line(entry)).as_bytes()).await?;
                }
            }

            "GET" => {
                let Some(path) = parts.next() else {
                    write.write_all(b"ERR usage: GET file [revision]\n").await?;
                    continue;
                };
                if validate_path(path).is_err() {
                    write.write_all(b"ERR illegal file name\n").await?;
                    continue;
                }

                let revision = parts
                    .next()
                    .and_then(|r| r.strip_prefix('r').unwrap_or(r).parse::<usize>().ok());

                match store.lock().await.get(path, revision) {
                    Some(data) => {
                        write
                            .write_all(format!("OK {}\n", data.len()).as_bytes())
                            .await?;
                        write.write_all(data).await?;
                    }
                    None => {
                        write.write_all(b"ERR no such file\n").await?;
                    }
                }
            }

            "PUT" => {
                let (Some(path), Some(len)) = (parts.next(), parts.next()) else {
                    write.write_all(b"ERR usage: PUT file length\n").await?;
                    continue;
                };

                let Ok(len) = len.parse::<usize>() else {
                    write.write_all(b"ERR invalid length\n").await?;
                    continue;
                };

                let mut data = vec![0_u8; len];
                reader.read_exact(&mut data).await?;

                if validate_path(path).is_err() {
                    write.write_all(b"ERR illegal file name\n").await?;
                    continue;
                }
                if !store::is_text(&data) {
                    write.write_all(b"ERR text files only\n").await?;
                    continue;
                }

                let revision = store.lock().await.put(path, data);
                debug!("put {path} -> r{revision}");
                write
                    .write_all(format!("OK r{revision}\n").as_bytes())
                    .await?;
            }

            other => {
                warn!("illegal method: {other}");
                write
                    .write_all(format!("ERR illegal method: {other}\n").as_bytes())
                    .await?;
            }
        }
    }
}
