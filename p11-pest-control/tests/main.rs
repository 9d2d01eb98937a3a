use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_util::codec::Framed;

use p11_pest_control::codec::packets::{
    self, create_policy, hello, ok, policy_result, site_visit, target_populations, Packet,
};

const TIMEOUT: Duration = Duration::from_secs(1);

fn init_tracing_subscriber() {
    static INIT: parking_lot::Once = parking_lot::Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt::try_init();
    });
}

/// A fake upstream conservation authority: answers the handshake and
/// `DialAuthority` for site 42 with a fixed `dog` target of `(1, 3)`,
/// then hands back an incrementing policy id for every `CreatePolicy`
/// and expects `DeletePolicy` for whatever id it last issued.
async fn spawn_fake_authority() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut framed = Framed::new(stream, packets::PacketCodec::new());

        assert!(matches!(
            framed.next().await.unwrap().unwrap(),
            Packet::Hello(h) if h.is_valid()
        ));
        framed.send(hello::Packet::new().into()).await.unwrap();

        assert!(matches!(
            framed.next().await.unwrap().unwrap(),
            Packet::DialAuthority(d) if d.site == 42
        ));
        framed
            .send(
                target_populations::Packet::new(
                    42,
                    vec![target_populations::Target {
                        species: "dog".to_string(),
                        min: 1,
                        max: 3,
                    }],
                )
                .into(),
            )
            .await
            .unwrap();

        let mut next_policy_id = 1_u32;
        loop {
            match framed.next().await {
                Some(Ok(Packet::CreatePolicy(p))) => {
                    assert_eq!(p.species, "dog");
                    let id = next_policy_id;
                    next_policy_id += 1;
                    framed
                        .send(policy_result::Packet::new(id).into())
                        .await
                        .unwrap();
                }
                Some(Ok(Packet::DeletePolicy(_))) => {
                    framed.send(ok::Packet::new().into()).await.unwrap();
                }
                _ => break,
            }
        }
    });

    port
}

async fn spawn_server(authority_port: u16) -> u16 {
    init_tracing_subscriber();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    tokio::spawn(async move {
        p11_pest_control::run(listener, format!("127.0.0.1:{authority_port}"))
            .await
            .unwrap();
    });

    port
}

async fn connect_client(port: u16) -> Framed<TcpStream, packets::PacketCodec> {
    let stream = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
    let mut framed = Framed::new(stream, packets::PacketCodec::new());

    framed.send(hello::Packet::new().into()).await.unwrap();
    assert!(matches!(
        framed.next().await.unwrap().unwrap(),
        Packet::Hello(h) if h.is_valid()
    ));

    framed
}

#[tokio::test]
async fn reconciliation_tracks_policy_transitions() {
    let authority_port = spawn_fake_authority().await;
    let port = spawn_server(authority_port).await;

    let mut client = connect_client(port).await;

    // count above max -> CreatePolicy(CULL)
    timeout(
        TIMEOUT,
        client.send(
            site_visit::Packet::new(
                42,
                vec![site_visit::Count {
                    species: "dog".to_string(),
                    count: 5,
                }],
            )
            .into(),
        ),
    )
    .await
    .unwrap()
    .unwrap();

    // count within range -> DeletePolicy, no new policy
    timeout(
        TIMEOUT,
        client.send(
            site_visit::Packet::new(
                42,
                vec![site_visit::Count {
                    species: "dog".to_string(),
                    count: 2,
                }],
            )
            .into(),
        ),
    )
    .await
    .unwrap()
    .unwrap();

    // count below min -> CreatePolicy(CONSERVE)
    timeout(
        TIMEOUT,
        client.send(
            site_visit::Packet::new(
                42,
                vec![site_visit::Count {
                    species: "dog".to_string(),
                    count: 0,
                }],
            )
            .into(),
        ),
    )
    .await
    .unwrap()
    .unwrap();

    // server never reports an error back for any of these
    let result = timeout(Duration::from_millis(200), client.next()).await;
    assert!(result.is_err(), "server should not have replied with anything");
}

#[tokio::test]
async fn conflicting_duplicate_counts_are_rejected() {
    let authority_port = spawn_fake_authority().await;
    let port = spawn_server(authority_port).await;

    let mut client = connect_client(port).await;

    client
        .send(
            site_visit::Packet::new(
                42,
                vec![
                    site_visit::Count {
                        species: "dog".to_string(),
                        count: 5,
                    },
                    site_visit::Count {
                        species: "dog".to_string(),
                        count: 6,
                    },
                ],
            )
            .into(),
        )
        .await
        .unwrap();

    let reply = timeout(TIMEOUT, client.next()).await.unwrap().unwrap().unwrap();
    assert!(matches!(reply, Packet::Error(_)));
}

#[tokio::test]
async fn second_hello_is_an_error() {
    let authority_port = spawn_fake_authority().await;
    let port = spawn_server(authority_port).await;

    let mut client = connect_client(port).await;

    client.send(hello::Packet::new().into()).await.unwrap();

    let reply = timeout(TIMEOUT, client.next()).await.unwrap().unwrap().unwrap();
    assert!(matches!(reply, Packet::Error(_)));
}
