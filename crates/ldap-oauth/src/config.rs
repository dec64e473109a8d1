//! Configuration loading and management

use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use crate::clients::Client;
use crate::cors::CorsPolicy;

/// Main configuration for the server
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// LDAP directory used to authenticate resource owners
    #[serde(default)]
    pub directory: DirectoryConfig,

    /// Registered OAuth clients
    #[serde(default)]
    pub clients: Vec<Client>,

    /// Token signing configuration
    #[serde(default)]
    pub tokens: TokenConfig,

    /// Consent configuration
    #[serde(default)]
    pub approvals: ApprovalConfig,

    /// Cross-origin policy
    #[serde(default)]
    pub cors: CorsPolicy,

    /// Resource server access rules
    #[serde(default)]
    pub security: SecurityConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectoryConfig {
    /// Directory URL, e.g. `ldap://localhost:8389`
    #[serde(default = "default_ldap_url")]
    pub url: String,

    /// Base DN appended to every user DN pattern
    #[serde(default = "default_base_dn")]
    pub base_dn: String,

    /// DN patterns relative to `base_dn`; `{username}` is replaced by the escaped login name
    #[serde(default = "default_user_dn_patterns")]
    pub user_dn_patterns: Vec<String>,

    /// Search base for group membership, relative to `base_dn`
    #[serde(default = "default_group_search_base")]
    pub group_search_base: String,

    /// Group filter; `{dn}` is replaced by the user's escaped DN
    #[serde(default = "default_group_search_filter")]
    pub group_search_filter: String,

    /// Attribute holding the group name
    #[serde(default = "default_group_role_attribute")]
    pub group_role_attribute: String,

    /// Attribute compared against the supplied password when binding fails
    #[serde(default = "default_password_attribute")]
    pub password_attribute: String,

    /// Upper bound for a full credential check (default: 5 seconds)
    #[serde(default = "default_directory_timeout")]
    pub timeout_secs: u64,
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self {
            url: default_ldap_url(),
            base_dn: default_base_dn(),
            user_dn_patterns: default_user_dn_patterns(),
            group_search_base: default_group_search_base(),
            group_search_filter: default_group_search_filter(),
            group_role_attribute: default_group_role_attribute(),
            password_attribute: default_password_attribute(),
            timeout_secs: default_directory_timeout(),
        }
    }
}

impl DirectoryConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Full candidate DNs for a login name, in configured order.
    pub fn user_dns(&self, username: &str) -> Vec<String> {
        let escaped = ldap3::dn_escape(username);
        self.user_dn_patterns
            .iter()
            .map(|pattern| {
                let relative = pattern.replace("{username}", &escaped);
                join_dn(&relative, &self.base_dn)
            })
            .collect()
    }

    pub fn group_search_dn(&self) -> String {
        join_dn(&self.group_search_base, &self.base_dn)
    }
}

fn join_dn(relative: &str, base: &str) -> String {
    match (relative.is_empty(), base.is_empty()) {
        (true, _) => base.to_string(),
        (_, true) => relative.to_string(),
        _ => format!("{},{}", relative, base),
    }
}

fn default_ldap_url() -> String {
    "ldap://localhost:8389".to_string()
}

fn default_base_dn() -> String {
    "dc=springframework,dc=org".to_string()
}

fn default_user_dn_patterns() -> Vec<String> {
    vec!["uid={username},ou=people".to_string()]
}

fn default_group_search_base() -> String {
    "ou=groups".to_string()
}

fn default_group_search_filter() -> String {
    "(uniqueMember={dn})".to_string()
}

fn default_group_role_attribute() -> String {
    "cn".to_string()
}

fn default_password_attribute() -> String {
    "userPassword".to_string()
}

fn default_directory_timeout() -> u64 {
    5
}

/// Key material used to sign and verify JWTs
#[derive(Clone, Serialize, Deserialize)]
#[serde(tag = "algorithm")]
pub enum SigningConfig {
    /// Shared HMAC secret
    #[serde(rename = "HS256")]
    Hs256 { secret: String },

    /// PEM-encoded Ed25519 key pair
    #[serde(rename = "EdDSA")]
    EdDsa {
        private_key_pem: String,
        public_key_pem: String,
    },
}

impl std::fmt::Debug for SigningConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SigningConfig::Hs256 { .. } => f.write_str("Hs256 { .. }"),
            SigningConfig::EdDsa { public_key_pem, .. } => f
                .debug_struct("EdDsa")
                .field("public_key_pem", public_key_pem)
                .finish_non_exhaustive(),
        }
    }
}

impl Default for SigningConfig {
    /// A random secret; tokens won't survive a restart unless it is persisted.
    fn default() -> Self {
        SigningConfig::Hs256 {
            secret: generate_random_string(64),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenConfig {
    /// `iss` claim of every token
    #[serde(default = "default_issuer")]
    pub issuer: String,

    #[serde(default)]
    pub signing: SigningConfig,

    /// How often expired approvals and used refresh ids are purged (default: 5 minutes)
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            issuer: default_issuer(),
            signing: SigningConfig::default(),
            sweep_interval_secs: default_sweep_interval(),
        }
    }
}

fn default_issuer() -> String {
    "ldap-oauth".to_string()
}

fn default_sweep_interval() -> u64 {
    300
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalConfig {
    /// Lifetime of a recorded consent decision (default: 30 days)
    #[serde(default = "default_approval_lifetime")]
    pub approval_lifetime_secs: u64,
}

impl Default for ApprovalConfig {
    fn default() -> Self {
        Self {
            approval_lifetime_secs: default_approval_lifetime(),
        }
    }
}

fn default_approval_lifetime() -> u64 {
    30 * 24 * 3600 // 30 days
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    /// Path prefixes reachable without a bearer token
    #[serde(default = "default_public_paths")]
    pub public_paths: Vec<String>,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            public_paths: default_public_paths(),
        }
    }
}

impl SecurityConfig {
    pub fn is_public(&self, path: &str) -> bool {
        self.public_paths.iter().any(|prefix| path.starts_with(prefix.as_str()))
    }
}

fn default_public_paths() -> Vec<String> {
    vec!["/oauth/".to_string(), "/webjars/".to_string()]
}

impl Default for Config {
    fn default() -> Self {
        Self {
            directory: DirectoryConfig::default(),
            clients: Vec::new(),
            tokens: TokenConfig::default(),
            approvals: ApprovalConfig::default(),
            cors: CorsPolicy::default(),
            security: SecurityConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from the config directory
    pub fn load(config_path: &str) -> Result<Self> {
        let config_file = Path::new(config_path).join("config.json");

        let config = if config_file.exists() {
            let content = std::fs::read_to_string(&config_file)
                .with_context(|| format!("Failed to read config file: {:?}", config_file))?;
            let config: Config = serde_json::from_str(&content)
                .with_context(|| "Failed to parse config.json")?;
            tracing::info!("Loaded configuration from {:?}", config_file);
            config
        } else {
            tracing::info!(
                "No config file found at {:?}, using defaults",
                config_file
            );
            let config = Config::default();

            std::fs::create_dir_all(config_path)
                .with_context(|| format!("Failed to create config directory: {}", config_path))?;

            // Persist the generated signing secret so tokens survive restarts
            let content = serde_json::to_string_pretty(&config)?;
            std::fs::write(&config_file, content)
                .with_context(|| format!("Failed to write default config: {:?}", config_file))?;
            tracing::info!("Created default config at {:?}", config_file);

            config
        };

        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the server cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.directory.user_dn_patterns.is_empty() {
            bail!("directory.user_dn_patterns must not be empty");
        }
        if let Some(pattern) = self
            .directory
            .user_dn_patterns
            .iter()
            .find(|p| !p.contains("{username}"))
        {
            bail!("DN pattern {:?} has no {{username}} placeholder", pattern);
        }
        if let SigningConfig::Hs256 { secret } = &self.tokens.signing {
            if secret.len() < 16 {
                bail!("tokens.signing.secret must be at least 16 characters");
            }
        }

        let mut seen = std::collections::HashSet::new();
        for client in &self.clients {
            if !seen.insert(client.client_id.as_str()) {
                bail!("Duplicate client id: {}", client.client_id);
            }
            if client.access_token_ttl_secs == 0 {
                bail!("Client {} has a zero access token lifetime", client.client_id);
            }
        }
        if self.clients.is_empty() {
            tracing::warn!("No OAuth clients configured; every token request will be rejected");
        }
        Ok(())
    }
}

/// Generate a cryptographically secure random string
pub fn generate_random_string(len: usize) -> String {
    use rand::Rng;
    const CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";
    let mut rng = rand::rng();
    (0..len)
        .map(|_| {
            let idx = rng.random_range(0..CHARSET.len());
            CHARSET[idx] as char
        })
        .collect()
}
