//! Pest Control: a checksummed binary protocol for reconciling animal
//! populations against per-species targets.
//!
//! A client dials in, exchanges Hello, then sends `SiteVisit` reports.
//! For each report the engine lazily dials the upstream conservation
//! authority for that site (caching the connection and its target
//! populations), works out the policy each species needs, and issues
//! `CreatePolicy`/`DeletePolicy` calls to keep the authority's policy
//! table in sync.

use std::collections::HashMap;
use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio_util::codec::Framed;

use tracing::{debug, info, warn};

pub mod codec;

use codec::packets::{self, create_policy, dial_authority, error, hello, Packet};
use codec::Error as CodecError;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Policy {
    id: u32,
    action: create_policy::Action,
}

struct Site {
    framed: Framed<TcpStream, packets::PacketCodec>,
    targets: HashMap<String, (u32, u32)>,
    policies: HashMap<String, Policy>,
}

/// Holds one lazily-established connection per conservation site.
pub struct PestControl {
    authority_host: String,
    sites: Mutex<HashMap<u32, Arc<Mutex<Site>>>>,
}

impl PestControl {
    #[must_use]
    pub fn new(authority_host: impl Into<String>) -> Self {
        Self {
            authority_host: authority_host.into(),
            sites: Mutex::new(HashMap::new()),
        }
    }

    async fn site(&self, site_id: u32) -> Result<Arc<Mutex<Site>>, Error> {
        let mut sites = self.sites.lock().await;

        if let Some(site) = sites.get(&site_id) {
            return Ok(site.clone());
        }

        let site = dial(&self.authority_host, site_id).await?;
        let site = Arc::new(Mutex::new(site));
        sites.insert(site_id, site.clone());

        Ok(site)
    }

    /// Reconciles one `SiteVisit` report against its site's target
    /// populations, issuing `CreatePolicy`/`DeletePolicy` as needed.
    pub async fn process_site_visit(
        &self,
        visit: packets::site_visit::Packet,
    ) -> Result<(), Error> {
        let counts = visit
            .counts_by_species()
            .map_err(|_| Error::ProtocolViolation("conflicting counts for a species".into()))?;

        let site = self.site(visit.site).await?;
        let mut site = site.lock().await;

        let species_with_targets: Vec<String> = site.targets.keys().cloned().collect();

        for species in species_with_targets {
            let (min, max) = site.targets[&species];
            let count = counts.get(species.as_str()).copied().unwrap_or(0);

            let desired = desired_action(count, min, max);
            let existing = site.policies.get(&species).map(|p| p.action);

            match (existing, desired) {
                (Some(_), None) => {
                    let policy = site.policies.remove(&species).expect("just matched Some");
                    delete_policy_call(&mut site.framed, policy.id).await?;
                }
                (None, Some(action)) => {
                    let id = create_policy_call(&mut site.framed, &species, action).await?;
                    site.policies.insert(species.clone(), Policy { id, action });
                }
                (Some(existing_action), Some(action)) if existing_action != action => {
                    let policy = site.policies.remove(&species).expect("just matched Some");
                    delete_policy_call(&mut site.framed, policy.id).await?;
                    let id = create_policy_call(&mut site.framed, &species, action).await?;
                    site.policies.insert(species.clone(), Policy { id, action });
                }
                _ => {}
            }
        }

        Ok(())
    }
}

fn desired_action(count: u32, min: u32, max: u32) -> Option<create_policy::Action> {
    if count < min {
        Some(create_policy::Action::Conserve)
    } else if count > max {
        Some(create_policy::Action::Cull)
    } else {
        None
    }
}

#[tracing::instrument(skip(host))]
async fn dial(host: &str, site_id: u32) -> Result<Site, Error> {
    let stream = TcpStream::connect(host).await?;
    let mut framed = Framed::new(stream, packets::PacketCodec::new());

    framed.send(hello::Packet::new().into()).await?;

    match framed.next().await {
        Some(Ok(Packet::Hello(h))) if h.is_valid() => {}
        Some(Ok(Packet::Error(e))) => return Err(Error::ProtocolViolation(e.message)),
        _ => {
            return Err(Error::ProtocolViolation(
                "expected Hello from authority".into(),
            ))
        }
    }

    framed
        .send(dial_authority::Packet::new(site_id).into())
        .await?;

    let targets = match framed.next().await {
        Some(Ok(Packet::TargetPopulations(t))) => t
            .populations
            .into_iter()
            .map(|t| (t.species, (t.min, t.max)))
            .collect(),
        Some(Ok(Packet::Error(e))) => return Err(Error::ProtocolViolation(e.message)),
        _ => {
            return Err(Error::ProtocolViolation(
                "expected TargetPopulations from authority".into(),
            ))
        }
    };

    debug!(site_id, "dialed authority");

    Ok(Site {
        framed,
        targets,
        policies: HashMap::new(),
    })
}

async fn create_policy_call(
    framed: &mut Framed<TcpStream, packets::PacketCodec>,
    species: &str,
    action: create_policy::Action,
) -> Result<u32, Error> {
    framed
        .send(create_policy::Packet::new(species, action).into())
        .await?;

    match framed.next().await {
        Some(Ok(Packet::PolicyResult(p))) => Ok(p.policy),
        Some(Ok(Packet::Error(e))) => Err(Error::ProtocolViolation(e.message)),
        _ => Err(Error::ProtocolViolation(
            "expected PolicyResult from authority".into(),
        )),
    }
}

async fn delete_policy_call(
    framed: &mut Framed<TcpStream, packets::PacketCodec>,
    policy: u32,
) -> Result<(), Error> {
    framed
        .send(packets::delete_policy::Packet::new(policy).into())
        .await?;

    match framed.next().await {
        Some(Ok(Packet::Ok(_))) => Ok(()),
        Some(Ok(Packet::Error(e))) => Err(Error::ProtocolViolation(e.message)),
        _ => Err(Error::ProtocolViolation(
            "expected OK from authority".into(),
        )),
    }
}

/// Runs the client-facing accept loop, one task per connection, all
/// sharing one `PestControl` engine.
///
/// # Errors
/// Returns an error if the listener itself fails.
#[tracing::instrument(skip(listener))]
pub async fn run(listener: TcpListener, authority_host: String) -> Result<(), anyhow::Error> {
    let engine = Arc::new(PestControl::new(authority_host));

    loop {
        let (socket, addr) = listener.accept().await?;
        debug!("accepted {addr}");

        let engine = engine.clone();
        tokio::spawn(async move {
            if let Err(err) = handle_client(socket, engine).await {
                warn!("client {addr} error: {err}");
            }
        });
    }
}

#[tracing::instrument(skip(socket, engine))]
async fn handle_client(socket: TcpStream, engine: Arc<PestControl>) -> Result<(), Error> {
    let mut framed = Framed::new(socket, packets::PacketCodec::new());

    match framed.next().await {
        Some(Ok(Packet::Hello(h))) if h.is_valid() => {}
        Some(Ok(_)) | None => {
            let _ = framed
                .send(error::Packet::new("expected hello").into())
                .await;
            return Err(Error::ProtocolViolation("expected Hello first".into()));
        }
        Some(Err(err)) => return Err(err.into()),
    }

    framed.send(hello::Packet::new().into()).await?;

    loop {
        match framed.next().await {
            Some(Ok(Packet::SiteVisit(visit))) => {
                if let Err(err) = engine.process_site_visit(visit).await {
                    let _ = framed
                        .send(error::Packet::new(err.to_string()).into())
                        .await;
                    return Err(err);
                }
            }
            Some(Ok(Packet::Hello(_))) => {
                let _ = framed
                    .send(error::Packet::new("unexpected hello").into())
                    .await;
                return Err(Error::ProtocolViolation("duplicate Hello".into()));
            }
            Some(Ok(_)) => {
                let _ = framed
                    .send(error::Packet::new("unexpected message").into())
                    .await;
                return Err(Error::ProtocolViolation(
                    "unexpected message type from client".into(),
                ));
            }
            Some(Err(err)) => {
                let _ = framed
                    .send(error::Packet::new(err.to_string()).into())
                    .await;
                return Err(err.into());
            }
            None => {
                info!("client closed connection");
                return Ok(());
            }
        }
    }
}
