//! Cluster membership and peer clients.
//!
//! The DAO registry names the cluster; reachability decides the client
//! shape. On every refresh each registered address becomes either an
//! `Active` peer (probed successfully, carries a sync watermark) or a
//! `Redirect` peer (unreachable, fans every call out to the active peers and
//! returns the first success). Redirects keep audit/entity/content reads
//! available even while the registry and reality disagree; they never
//! advance a watermark.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use snafu::Snafu;

use depot_types::{
    AuditInfo, EntityType, PartialDeploymentHistory, ServerName, ServerStatus, Timestamp,
};

/// Peer communication failure.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ClusterError {
    /// The peer did not answer.
    #[snafu(display("Server {address} is unreachable: {message}"))]
    Unreachable {
        /// Peer base URL.
        address: String,
        /// Transport error description.
        message: String,
    },

    /// The peer answered with an unexpected HTTP status.
    #[snafu(display("Server {address} answered {status}"))]
    UnexpectedStatus {
        /// Peer base URL.
        address: String,
        /// HTTP status code.
        status: u16,
    },

    /// The peer's response body could not be decoded.
    #[snafu(display("Failed to decode response from {address}: {message}"))]
    Decode {
        /// Peer base URL.
        address: String,
        /// Decode error description.
        message: String,
    },

    /// No active peer could serve the request.
    #[snafu(display("No active server could handle the request"))]
    NoActivePeers,
}

/// Raw transport to one content server, addressed per call.
#[async_trait]
pub trait ServerApi: Send + Sync {
    /// `GET /status`.
    async fn status(&self, base_url: &str) -> Result<ServerStatus, ClusterError>;

    /// `GET /history?from=`.
    async fn history(
        &self,
        base_url: &str,
        from: Option<Timestamp>,
    ) -> Result<PartialDeploymentHistory, ClusterError>;

    /// `GET /audit/:type/:entityId`.
    async fn audit_info(
        &self,
        base_url: &str,
        entity_type: EntityType,
        entity_id: &str,
    ) -> Result<AuditInfo, ClusterError>;

    /// `GET /contents/:hashId`: also fetches entity files, which are
    /// content-addressed like any other blob.
    async fn content(&self, base_url: &str, hash: &str) -> Result<Vec<u8>, ClusterError>;
}

/// HTTP transport over the peer JSON API.
pub struct HttpServerApi {
    client: reqwest::Client,
}

impl HttpServerApi {
    /// Builds a transport whose calls time out after `timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`ClusterError::Unreachable`] if the HTTP client cannot be
    /// constructed.
    pub fn new(timeout: Duration) -> Result<Self, ClusterError> {
        let client = reqwest::Client::builder().timeout(timeout).build().map_err(|e| {
            ClusterError::Unreachable { address: String::new(), message: e.to_string() }
        })?;
        Ok(Self { client })
    }

    async fn get_bytes(&self, address: &str, url: String) -> Result<Vec<u8>, ClusterError> {
        let response = self.client.get(&url).send().await.map_err(|e| {
            ClusterError::Unreachable { address: address.to_string(), message: e.to_string() }
        })?;
        let status = response.status();
        if !status.is_success() {
            return Err(ClusterError::UnexpectedStatus {
                address: address.to_string(),
                status: status.as_u16(),
            });
        }
        let bytes = response.bytes().await.map_err(|e| ClusterError::Decode {
            address: address.to_string(),
            message: e.to_string(),
        })?;
        Ok(bytes.to_vec())
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        address: &str,
        url: String,
    ) -> Result<T, ClusterError> {
        let bytes = self.get_bytes(address, url).await?;
        serde_json::from_slice(&bytes).map_err(|e| ClusterError::Decode {
            address: address.to_string(),
            message: e.to_string(),
        })
    }
}

#[async_trait]
impl ServerApi for HttpServerApi {
    async fn status(&self, base_url: &str) -> Result<ServerStatus, ClusterError> {
        self.get_json(base_url, format!("{base_url}/status")).await
    }

    async fn history(
        &self,
        base_url: &str,
        from: Option<Timestamp>,
    ) -> Result<PartialDeploymentHistory, ClusterError> {
        let url = match from {
            Some(from) => format!("{base_url}/history?from={from}"),
            None => format!("{base_url}/history"),
        };
        self.get_json(base_url, url).await
    }

    async fn audit_info(
        &self,
        base_url: &str,
        entity_type: EntityType,
        entity_id: &str,
    ) -> Result<AuditInfo, ClusterError> {
        self.get_json(base_url, format!("{base_url}/audit/{entity_type}/{entity_id}")).await
    }

    async fn content(&self, base_url: &str, hash: &str) -> Result<Vec<u8>, ClusterError> {
        self.get_bytes(base_url, format!("{base_url}/contents/{hash}")).await
    }
}

/// Resolves the current peer set from the registry.
#[async_trait]
pub trait DaoClient: Send + Sync {
    /// Base URLs of every registered content server, this node included.
    async fn peer_addresses(&self) -> Result<Vec<String>, ClusterError>;
}

/// Registry fixed at configuration time; used when no on-chain registry is
/// wired in.
pub struct HardcodedDaoClient {
    addresses: Vec<String>,
}

impl HardcodedDaoClient {
    /// A registry returning exactly `addresses`.
    pub fn new(addresses: Vec<String>) -> Self {
        Self { addresses }
    }
}

#[async_trait]
impl DaoClient for HardcodedDaoClient {
    async fn peer_addresses(&self) -> Result<Vec<String>, ClusterError> {
        Ok(self.addresses.clone())
    }
}

/// A client for one registered peer: reachable or shadowed by a redirect.
#[derive(Clone)]
pub enum PeerClient {
    /// The peer answered the probe; calls go straight to it.
    Active {
        /// The peer's announced name.
        name: ServerName,
        /// The peer's base URL.
        base_url: String,
        /// Greatest deployment timestamp fully synced from this peer.
        last_known_timestamp: Timestamp,
        /// Transport.
        api: Arc<dyn ServerApi>,
    },
    /// The peer did not answer; calls fan out to the active peers.
    Redirect {
        /// The unreachable address this client shadows.
        address: String,
        /// Active peers to fall back to, in probe order.
        fallbacks: Vec<(ServerName, String)>,
        /// Transport.
        api: Arc<dyn ServerApi>,
    },
}

impl PeerClient {
    /// True for peers that answered the probe.
    pub fn is_active(&self) -> bool {
        matches!(self, PeerClient::Active { .. })
    }

    /// The peer's announced name, when known.
    pub fn name(&self) -> Option<&str> {
        match self {
            PeerClient::Active { name, .. } => Some(name),
            PeerClient::Redirect { .. } => None,
        }
    }

    /// The address this client stands for.
    pub fn address(&self) -> &str {
        match self {
            PeerClient::Active { base_url, .. } => base_url,
            PeerClient::Redirect { address, .. } => address,
        }
    }

    /// Sync watermark. Always 0 for redirects, which never advance.
    pub fn last_known_timestamp(&self) -> Timestamp {
        match self {
            PeerClient::Active { last_known_timestamp, .. } => *last_known_timestamp,
            PeerClient::Redirect { .. } => 0,
        }
    }

    /// Fetches this peer's history from a watermark.
    pub async fn get_history(
        &self,
        from: Option<Timestamp>,
    ) -> Result<PartialDeploymentHistory, ClusterError> {
        match self {
            PeerClient::Active { base_url, api, .. } => api.history(base_url, from).await,
            PeerClient::Redirect { fallbacks, api, .. } => {
                fan_out(fallbacks, |url| api.history(url, from)).await
            },
        }
    }

    /// Fetches an entity descriptor file by id.
    pub async fn get_entity_file(&self, entity_id: &str) -> Result<Vec<u8>, ClusterError> {
        match self {
            PeerClient::Active { base_url, api, .. } => api.content(base_url, entity_id).await,
            PeerClient::Redirect { fallbacks, api, .. } => {
                fan_out(fallbacks, |url| api.content(url, entity_id)).await
            },
        }
    }

    /// Fetches an entity's audit record.
    pub async fn get_audit_info(
        &self,
        entity_type: EntityType,
        entity_id: &str,
    ) -> Result<AuditInfo, ClusterError> {
        match self {
            PeerClient::Active { base_url, api, .. } => {
                api.audit_info(base_url, entity_type, entity_id).await
            },
            PeerClient::Redirect { fallbacks, api, .. } => {
                fan_out(fallbacks, |url| api.audit_info(url, entity_type, entity_id)).await
            },
        }
    }

    /// Fetches a content blob.
    pub async fn get_content(&self, hash: &str) -> Result<Vec<u8>, ClusterError> {
        match self {
            PeerClient::Active { base_url, api, .. } => api.content(base_url, hash).await,
            PeerClient::Redirect { fallbacks, api, .. } => {
                fan_out(fallbacks, |url| api.content(url, hash)).await
            },
        }
    }
}

/// Tries each fallback in order, returning the first success.
async fn fan_out<'a, T, F, Fut>(
    fallbacks: &'a [(ServerName, String)],
    call: F,
) -> Result<T, ClusterError>
where
    F: Fn(&'a str) -> Fut,
    Fut: std::future::Future<Output = Result<T, ClusterError>>,
{
    let mut last_error = ClusterError::NoActivePeers;
    for (name, url) in fallbacks {
        match call(url).await {
            Ok(value) => return Ok(value),
            Err(e) => {
                tracing::debug!(peer = %name, error = %e, "redirect fallback failed");
                last_error = e;
            },
        }
    }
    Err(last_error)
}

/// The cluster view: refreshes membership and tracks per-peer watermarks.
pub struct ClusterClient {
    dao: Arc<dyn DaoClient>,
    api: Arc<dyn ServerApi>,
    own_name: ServerName,
    peers: Mutex<Vec<PeerClient>>,
    watermarks: Mutex<HashMap<ServerName, Timestamp>>,
}

impl ClusterClient {
    /// Builds a cluster view for a node named `own_name`.
    pub fn new(dao: Arc<dyn DaoClient>, api: Arc<dyn ServerApi>, own_name: ServerName) -> Self {
        Self {
            dao,
            api,
            own_name,
            peers: Mutex::new(Vec::new()),
            watermarks: Mutex::new(HashMap::new()),
        }
    }

    /// Re-resolves the registry and re-probes every address. Reachable
    /// addresses (other than this node itself) become active clients keeping
    /// their watermark; unreachable ones become redirect clients over the
    /// current active set.
    pub async fn refresh(&self) {
        let addresses = match self.dao.peer_addresses().await {
            Ok(addresses) => addresses,
            Err(e) => {
                tracing::warn!(error = %e, "peer registry lookup failed, keeping previous view");
                return;
            },
        };

        let mut actives: Vec<(ServerName, String)> = Vec::new();
        let mut unreachable: Vec<String> = Vec::new();
        for address in addresses {
            match self.api.status(&address).await {
                Ok(status) if status.name == self.own_name => {},
                Ok(status) => actives.push((status.name, address)),
                Err(e) => {
                    tracing::debug!(address = %address, error = %e, "peer probe failed");
                    unreachable.push(address);
                },
            }
        }

        let watermarks = self.watermarks.lock();
        let mut peers: Vec<PeerClient> = actives
            .iter()
            .map(|(name, base_url)| PeerClient::Active {
                name: name.clone(),
                base_url: base_url.clone(),
                last_known_timestamp: watermarks.get(name).copied().unwrap_or(0),
                api: Arc::clone(&self.api),
            })
            .collect();
        drop(watermarks);

        for address in unreachable {
            peers.push(PeerClient::Redirect {
                address,
                fallbacks: actives.clone(),
                api: Arc::clone(&self.api),
            });
        }

        tracing::debug!(
            active = peers.iter().filter(|p| p.is_active()).count(),
            redirect = peers.iter().filter(|p| !p.is_active()).count(),
            "cluster view refreshed"
        );
        *self.peers.lock() = peers;
    }

    /// Snapshot of the current peer clients.
    pub fn peers(&self) -> Vec<PeerClient> {
        self.peers.lock().clone()
    }

    /// Advances a peer's watermark to `max(previous, timestamp)`. A no-op
    /// for names without an active client.
    pub fn update_timestamp(&self, name: &str, timestamp: Timestamp) {
        let mut watermarks = self.watermarks.lock();
        let entry = watermarks.entry(name.to_string()).or_insert(0);
        *entry = (*entry).max(timestamp);
        let current = *entry;
        drop(watermarks);

        let mut peers = self.peers.lock();
        for peer in peers.iter_mut() {
            if let PeerClient::Active { name: peer_name, last_known_timestamp, .. } = peer {
                if peer_name == name {
                    *last_known_timestamp = current;
                }
            }
        }
    }
}
