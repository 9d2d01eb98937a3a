//! Job Centre: a priority job broker reachable over newline-delimited
//! JSON requests.
//!
//! A client `put`s jobs onto named queues with a priority, `get`s the
//! highest-priority ready job across a set of queues (optionally
//! long-polling until one appears), and `abort`s or `delete`s jobs it
//! holds. Disconnecting releases every job the connection was holding
//! back to its queue.

use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;

use tracing::{debug, info, warn};

pub mod broker;
pub mod wire;

use broker::Broker;
use wire::{Request, Response};

/// Runs the accept loop: one task per connection, all sharing one broker.
///
/// # Errors
/// Returns an error if the listener itself fails.
#[tracing::instrument(skip(listener))]
pub async fn run(listener: TcpListener) -> Result<(), std::io::Error> {
    let broker = Arc::new(Broker::default());

    loop {
        let (socket, addr) = listener.accept().await?;
        debug!("accepted {addr}");

        tokio::spawn(handle_client(socket, broker.clone()));
    }
}

#[tracing::instrument(skip(socket, broker))]
async fn handle_client(socket: tokio::net::TcpStream, broker: Arc<Broker>) {
    let worker = broker.new_worker();

    let (read, mut write) = socket.into_split();
    let mut lines = BufReader::new(read).lines();

    loop {
        let next_line = lines.next_line();
        tokio::pin!(next_line);

        let line = match next_line.await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(err) => {
                warn!("read error: {err}");
                break;
            }
        };

        if line.trim().is_empty() {
            continue;
        }

        let response = match serde_json::from_str::<Request>(&line) {
            Ok(request) => handle_request(&broker, worker, request, lines.get_mut()).await,
            Err(err) => Response::error(format!("malformed request: {err}")),
        };

        let mut encoded = serde_json::to_vec(&response).unwrap_or_default();
        encoded.push(b'\n');

        if write.write_all(&encoded).await.is_err() {
            break;
        }
    }

    broker.disconnect(worker);
    info!("worker {worker} disconnected");
}

async fn handle_request<R: tokio::io::AsyncRead + Unpin>(
    broker: &Arc<Broker>,
    worker: broker::WorkerId,
    request: Request,
    reader: &mut R,
) -> Response {
    match request {
        Request::Put { queue, pri, job } => {
            let id = broker.put(queue, pri, job);
            Response::put_ok(id)
        }

        Request::Get { queues, wait } => {
            if let Some(job) = broker.try_get(&queues, worker) {
                return Response::get_ok(job.id, job.payload, job.priority, job.queue);
            }

            if !wait {
                return Response::NoJob;
            }

            // Any activity on the socket before we have a job to hand back
            // means the peer disconnected (or violated the one-request-at-
            // a-time protocol); either way the wait is abandoned.
            let disconnected = async {
                let mut probe = [0_u8; 1];
                let _ = reader.read(&mut probe).await;
            };

            match broker.get_wait(&queues, worker, disconnected).await {
                Some(job) => Response::get_ok(job.id, job.payload, job.priority, job.queue),
                None => Response::NoJob,
            }
        }

        Request::Delete { id } => {
            if broker.delete(id, worker) {
                Response::plain_ok()
            } else {
                Response::NoJob
            }
        }

        Request::Abort { id } => match broker.abort(id, worker) {
            Ok(()) => Response::plain_ok(),
            Err(broker::AbortError::NotFound) => Response::NoJob,
            Err(err @ broker::AbortError::NotHolder) => Response::error(err.to_string()),
        },
    }
}
