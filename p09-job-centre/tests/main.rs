use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;

use serde_json::{json, Value};

const TIMEOUT: Duration = Duration::from_secs(1);

fn init_tracing_subscriber() {
    static INIT: parking_lot::Once = parking_lot::Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt::try_init();
    });
}

async fn spawn_app() -> u16 {
    init_tracing_subscriber();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    tokio::spawn(async move {
        p09_job_centre::run(listener).await.unwrap();
    });

    port
}

struct Client {
    write: tokio::net::tcp::OwnedWriteHalf,
    read: BufReader<tokio::net::tcp::OwnedReadHalf>,
}

impl Client {
    async fn connect(port: u16) -> Self {
        let (read, write) = TcpStream::connect(("127.0.0.1", port))
            .await
            .unwrap()
            .into_split();
        Self {
            write,
            read: BufReader::new(read),
        }
    }

    async fn send(&mut self, value: &Value) {
        let mut line = serde_json::to_vec(value).unwrap();
        line.push(b'\n');
        self.write.write_all(&line).await.unwrap();
    }

    async fn recv(&mut self) -> Value {
        let mut line = String::new();
        timeout(TIMEOUT, self.read.read_line(&mut line))
            .await
            .unwrap()
            .unwrap();
        serde_json::from_str(&line).unwrap()
    }
}

#[tokio::test]
async fn priority_put_get_abort_get() {
    let port = spawn_app().await;
    let mut worker = Client::connect(port).await;

    worker
        .send(&json!({"request": "put", "queue": "A", "pri": 5, "job": {"x": 1}}))
        .await;
    let resp = worker.recv().await;
    assert_eq!(resp["status"], "ok");
    assert_eq!(resp["id"], 1);

    worker
        .send(&json!({"request": "put", "queue": "A", "pri": 9, "job": {"x": 2}}))
        .await;
    let resp = worker.recv().await;
    assert_eq!(resp["id"], 2);

    worker.send(&json!({"request": "get", "queues": ["A"]})).await;
    let resp = worker.recv().await;
    assert_eq!(resp["status"], "ok");
    assert_eq!(resp["id"], 2);

    worker.send(&json!({"request": "abort", "id": 2})).await;
    let resp = worker.recv().await;
    assert_eq!(resp["status"], "ok");

    worker.send(&json!({"request": "get", "queues": ["A"]})).await;
    let resp = worker.recv().await;
    assert_eq!(resp["id"], 2);
}

#[tokio::test]
async fn wait_then_disconnect_requeues() {
    let port = spawn_app().await;

    let mut w1 = Client::connect(port).await;
    w1.send(&json!({"request": "get", "queues": ["A"], "wait": true}))
        .await;

    // give the wait time to register before the job lands
    tokio::time::sleep(Duration::from_millis(50)).await;

    let mut w2 = Client::connect(port).await;
    w2.send(&json!({"request": "put", "queue": "A", "pri": 1, "job": {}}))
        .await;
    let resp = w2.recv().await;
    let id = resp["id"].clone();

    let resp = w1.recv().await;
    assert_eq!(resp["status"], "ok");
    assert_eq!(resp["id"], id);

    drop(w1);

    let mut w3 = Client::connect(port).await;
    w3.send(&json!({"request": "get", "queues": ["A"]})).await;
    let resp = timeout(Duration::from_secs(2), w3.recv()).await.unwrap();
    assert_eq!(resp["status"], "ok");
    assert_eq!(resp["id"], id);
}

#[tokio::test]
async fn malformed_request_keeps_connection_open() {
    let port = spawn_app().await;
    let mut client = Client::connect(port).await;

    client.write.write_all(b"not json\n").await.unwrap();
    let resp = client.recv().await;
    assert_eq!(resp["status"], "error");

    client
        .send(&json!({"request": "put", "queue": "A", "pri": 1, "job": {}}))
        .await;
    let resp = client.recv().await;
    assert_eq!(resp["status"], "ok");
}
