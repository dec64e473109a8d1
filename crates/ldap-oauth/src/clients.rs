//! Registered OAuth clients and client authentication

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{ClientError, GrantError};
use crate::password;

/// Grant types a client may be allowed to use
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GrantType {
    Password,
    RefreshToken,
}

impl GrantType {
    pub fn as_str(&self) -> &'static str {
        match self {
            GrantType::Password => "password",
            GrantType::RefreshToken => "refresh_token",
        }
    }
}

impl fmt::Display for GrantType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GrantType {
    type Err = GrantError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "password" => Ok(GrantType::Password),
            "refresh_token" => Ok(GrantType::RefreshToken),
            other => Err(GrantError::UnsupportedGrantType(other.to_string())),
        }
    }
}

/// A registered OAuth client. Immutable once loaded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Client {
    pub client_id: String,

    /// bcrypt hash of the client secret
    pub secret_hash: String,

    /// Scopes the client may request
    #[serde(default)]
    pub scopes: BTreeSet<String>,

    #[serde(default = "default_grant_types")]
    pub grant_types: BTreeSet<GrantType>,

    /// Access token lifetime in seconds (default: 1 hour)
    #[serde(default = "default_access_token_lifetime")]
    pub access_token_ttl_secs: u64,

    /// Refresh token lifetime in seconds (default: 30 days)
    #[serde(default = "default_refresh_token_lifetime")]
    pub refresh_token_ttl_secs: u64,

    /// First-party client whose requests need no recorded user consent
    #[serde(default)]
    pub auto_approve: bool,
}

impl Client {
    pub fn allows(&self, grant_type: GrantType) -> bool {
        self.grant_types.contains(&grant_type)
    }
}

fn default_grant_types() -> BTreeSet<GrantType> {
    BTreeSet::from([GrantType::Password, GrantType::RefreshToken])
}

fn default_access_token_lifetime() -> u64 {
    3600 // 1 hour
}

fn default_refresh_token_lifetime() -> u64 {
    30 * 24 * 3600 // 30 days
}

/// Lookup of registered clients by id
pub trait ClientRegistry: Send + Sync {
    fn lookup(&self, client_id: &str) -> Result<Client, ClientError>;
}

/// Client registry held entirely in memory, built from configuration
#[derive(Debug, Default)]
pub struct InMemoryClientRegistry {
    clients: HashMap<String, Client>,
}

impl InMemoryClientRegistry {
    pub fn new(clients: impl IntoIterator<Item = Client>) -> Self {
        let clients: HashMap<String, Client> = clients
            .into_iter()
            .map(|c| (c.client_id.clone(), c))
            .collect();
        tracing::info!("Loaded {} registered clients", clients.len());
        Self { clients }
    }
}

impl ClientRegistry for InMemoryClientRegistry {
    fn lookup(&self, client_id: &str) -> Result<Client, ClientError> {
        self.clients
            .get(client_id)
            .cloned()
            .ok_or(ClientError::NotFound)
    }
}

/// Look up a client and check its secret.
///
/// Unknown ids still pay for one bcrypt verification so the response time
/// does not tell callers which ids exist.
pub async fn authenticate_client(
    registry: &dyn ClientRegistry,
    client_id: &str,
    client_secret: &str,
) -> Result<Client, ClientError> {
    let client = match registry.lookup(client_id) {
        Ok(client) => client,
        Err(e) => {
            password::verify_dummy(client_secret).await;
            tracing::debug!("Rejected unknown client {}", client_id);
            return Err(e);
        }
    };

    if password::verify_secret(client_secret, &client.secret_hash).await {
        Ok(client)
    } else {
        tracing::debug!("Rejected bad secret for client {}", client_id);
        Err(ClientError::SecretMismatch)
    }
}
