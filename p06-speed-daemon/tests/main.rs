use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;

const TIMEOUT: Duration = Duration::from_millis(1000);

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
        p06_speed_daemon::run(listener).await.unwrap();
    });

    port
}

#[tokio::test]
async fn ticket_is_dispatched() {
    let port = spawn_app().await;

    let mut camera1 = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
    camera1
        .write_all(&[0x80, 0x00, 0x7b, 0x00, 0x08, 0x00, 0x3c])
        .await
        .unwrap();
    camera1
        .write_all(&[0x20, 0x04, 0x55, 0x4e, 0x31, 0x58, 0x00, 0x00, 0x00, 0x00])
        .await
        .unwrap();

    let mut camera2 = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
    camera2
        .write_all(&[0x80, 0x00, 0x7b, 0x00, 0x09, 0x00, 0x3c])
        .await
        .unwrap();
    camera2
        .write_all(&[0x20, 0x04, 0x55, 0x4e, 0x31, 0x58, 0x00, 0x00, 0x00, 0x2d])
        .await
        .unwrap();

    let mut dispatcher = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
    dispatcher
        .write_all(&[0x81, 0x01, 0x00, 0x7b])
        .await
        .unwrap();

    let mut buf = [0_u8; 32];
    let len = timeout(TIMEOUT, dispatcher.read(&mut buf))
        .await
        .unwrap()
        .unwrap();

    let expected = [
        0x21, 0x04, 0x55, 0x4e, 0x31, 0x58, 0x00, 0x7b, 0x00, 0x08, 0x00, 0x00, 0x00, 0x00, 0x00,
        0x09, 0x00, 0x00, 0x00, 0x2d, 0x1f, 0x40,
    ];

    assert_eq!(&buf[..len], expected);
}

#[tokio::test]
async fn second_declaration_is_an_error() {
    let port = spawn_app().await;

    let mut camera = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
    camera
        .write_all(&[0x80, 0x00, 0x01, 0x00, 0x00, 0x00, 0x14])
        .await
        .unwrap();
    camera
        .write_all(&[0x80, 0x00, 0x01, 0x00, 0x00, 0x00, 0x14])
        .await
        .unwrap();

    let mut buf = [0_u8; 1];
    let len = timeout(TIMEOUT, camera.read(&mut buf))
        .await
        .unwrap()
        .unwrap();

    assert_eq!(len, 1);
    assert_eq!(buf[0], 0x10);
}

#[tokio::test]
async fn heartbeat_is_sent_periodically() {
    let port = spawn_app().await;

    let mut client = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
    client
        .write_all(&[0x40, 0x00, 0x00, 0x00, 0x02])
        .await
        .unwrap();

    let mut buf = [0_u8; 1];
    let len = timeout(Duration::from_millis(500), client.read(&mut buf))
        .await
        .unwrap()
        .unwrap();

    assert_eq!(len, 1);
    assert_eq!(buf[0], 0x41);
}
