//! Budget Chat: a newline-delimited text chat room.
//!
//! A client's first line is its name (non-empty, alphanumeric ASCII); the
//! server greets it with the roster of already-present users, then
//! broadcasts a join announcement. Every later line from that client is
//! broadcast to everyone else prefixed with its name; disconnecting
//! broadcasts a leave announcement.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, Mutex};

use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
enum Event {
    Joined(String),
    Left(String),
    Said { from: String, line: String },
}

impl Event {
    fn render(&self, for_name: &str) -> Option<String> {
        match self {
            Self::Joined(name) if name != for_name => Some(format!("* {name} has entered the room")),
            Self::Left(name) if name != for_name => Some(format!("* {name} has left the room")),
            Self::Said { from, line } if from != for_name => Some(format!("[{from}] {line}")),
            _ => None,
        }
    }
}

/// Shared chat room state: the current roster and a broadcast channel
/// every connected client subscribes to.
pub struct Room {
    names: Mutex<HashMap<usize, String>>,
    events: broadcast::Sender<Event>,
    next_id: std::sync::atomic::AtomicUsize,
}

impl Default for Room {
    fn default() -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            names: Mutex::new(HashMap::new()),
            events,
            next_id: std::sync::atomic::AtomicUsize::new(0),
        }
    }
}

fn is_valid_name(name: &str) -> bool {
    !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric())
}

impl Room {
    async fn roster(&self) -> Vec<String> {
        self.names.lock().await.values().cloned().collect()
    }

    async fn join(&self, name: String) -> usize {
        let id = self
            .next_id
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        self.names.lock().await.insert(id, name.clone());
        self.events.send(Event::Joined(name)).ok();
        id
    }

    async fn leave(&self, id: usize) {
        if let Some(name) = self.names.lock().await.remove(&id) {
            self.events.send(Event::Left(name)).ok();
        }
    }

    fn say(&self, from: String, line: String) {
        self.events.send(Event::Said { from, line }).ok();
    }
}

/// Drives one connection: reads a name, joins the room, then relays
/// lines until the client disconnects.
///
/// # Errors
/// Returns an I/O error if reading or writing the socket fails.
#[tracing::instrument(skip(socket, room))]
pub async fn handler(socket: TcpStream, room: Arc<Room>) -> Result<(), anyhow::Error> {
    let (read, mut write) = socket.into_split();
    let mut lines = BufReader::new(read).lines();

    write.write_all(b"Welcome to budgetchat! What shall I call you?\n").await?;

    let Some(name) = lines.next_line().await? else {
        return Ok(());
    };

    if !is_valid_name(&name) {
        warn!("rejecting invalid name: {name:?}");
        write.write_all(b"invalid name\n").await?;
        return Ok(());
    }

    {
        let existing = room.roster().await;
        if existing.contains(&name) {
            warn!("rejecting duplicate name: {name:?}");
            write.write_all(b"name already in use\n").await?;
            return Ok(());
        }
        write
            .write_all(format!("* the room contains: {}\n", existing.join(", ")).as_bytes())
            .await?;
    }

    let id = room.join(name.clone()).await;
    info!("{name} joined");

    let mut events = room.events.subscribe();

    let result = loop {
        tokio::select! {
            line = lines.next_line() => {
                match line {
                    Ok(Some(line)) => room.say(name.clone(), line),
                    Ok(None) => break Ok(()),
                    Err(err) => break Err(err.into()),
                }
            }

            event = events.recv() => {
                match event {
                    Ok(event) => {
                        if let Some(rendered) = event.render(&name) {
                            if write.write_all(format!("{rendered}\n").as_bytes()).await.is_err() {
                                break Ok(());
                            }
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        debug!("{name} lagged behind by {n} messages");
                    }
                    Err(broadcast::error::RecvError::Closed) => break Ok(()),
                }
            }
        }
    };

    room.leave(id).await;
    info!("{name} left");

    result
}
