//! Resource owner authentication against an LDAP directory.
//!
//! The strategy lives in [`LdapCredentialValidator`] and talks to the
//! directory only through the small [`Directory`] trait, so it can be
//! exercised without a running server.

use std::time::Duration;

use async_trait::async_trait;
use ldap3::{LdapConnAsync, LdapConnSettings, Scope, SearchEntry};
use serde::Serialize;
use thiserror::Error;

use crate::config::DirectoryConfig;
use crate::error::AuthError;
use crate::password;

// LDAP result codes (RFC 4511 appendix A)
const RC_SUCCESS: u32 = 0;
const RC_NO_SUCH_OBJECT: u32 = 32;
const RC_CONFIDENTIALITY_REQUIRED: u32 = 13;
const RC_INAPPROPRIATE_AUTHENTICATION: u32 = 48;
const RC_INVALID_CREDENTIALS: u32 = 49;
const RC_INSUFFICIENT_ACCESS_RIGHTS: u32 = 50;
const RC_UNWILLING_TO_PERFORM: u32 = 53;

/// An authenticated resource owner
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Principal {
    pub subject: String,
    pub dn: String,
    pub groups: Vec<String>,
}

impl Principal {
    /// Groups as granted authorities, e.g. `developers` -> `ROLE_DEVELOPERS`
    pub fn authorities(&self) -> Vec<String> {
        self.groups
            .iter()
            .map(|g| format!("ROLE_{}", g.to_uppercase()))
            .collect()
    }
}

/// Checks a username/password pair
#[async_trait]
pub trait CredentialValidator: Send + Sync {
    async fn validate(&self, username: &str, password: &str) -> Result<Principal, AuthError>;
}

#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Operation failed with result code {rc}: {message}")]
    Operation { rc: u32, message: String },
}

/// The directory operations the validator needs
#[async_trait]
pub trait Directory: Send + Sync {
    /// `Ok(false)` when the directory refused the credentials.
    async fn bind(&self, dn: &str, password: &str) -> Result<bool, DirectoryError>;

    /// Values of `attribute` on entry `dn`; `Ok(None)` when there is no such entry.
    async fn read_attribute(
        &self,
        dn: &str,
        attribute: &str,
    ) -> Result<Option<Vec<String>>, DirectoryError>;

    /// Values of `attribute` on every entry under `base` matching `filter`.
    async fn search_groups(
        &self,
        base: &str,
        filter: &str,
        attribute: &str,
    ) -> Result<Vec<String>, DirectoryError>;
}

/// Bind first, then search-and-compare against a bcrypt password attribute.
pub struct LdapCredentialValidator<D> {
    directory: D,
    config: DirectoryConfig,
}

impl<D: Directory> LdapCredentialValidator<D> {
    pub fn new(directory: D, config: DirectoryConfig) -> Self {
        Self { directory, config }
    }

    async fn authenticate(&self, username: &str, password: &str) -> Result<Principal, AuthError> {
        let candidates = self.config.user_dns(username);

        let mut matched = None;
        for dn in &candidates {
            if self.directory.bind(dn, password).await.map_err(unavailable)? {
                tracing::debug!("Bind succeeded for {}", dn);
                matched = Some(dn.clone());
                break;
            }
        }

        if matched.is_none() {
            matched = self.compare_password(&candidates, password).await?;
        }

        let Some(dn) = matched else {
            tracing::info!("Authentication failed for user {}", username);
            return Err(AuthError::InvalidCredentials);
        };

        let filter = self
            .config
            .group_search_filter
            .replace("{dn}", &ldap3::ldap_escape(dn.as_str()));
        let groups = self
            .directory
            .search_groups(
                &self.config.group_search_dn(),
                &filter,
                &self.config.group_role_attribute,
            )
            .await
            .map_err(unavailable)?;

        tracing::info!("Authenticated user {} ({} groups)", username, groups.len());
        Ok(Principal {
            subject: username.to_string(),
            dn,
            groups,
        })
    }

    async fn compare_password(
        &self,
        candidates: &[String],
        password: &str,
    ) -> Result<Option<String>, AuthError> {
        for dn in candidates {
            let stored = self
                .directory
                .read_attribute(dn, &self.config.password_attribute)
                .await
                .map_err(unavailable)?;

            for hash in stored.unwrap_or_default() {
                let hash = strip_scheme(&hash);
                if password::verify_secret(password, hash).await {
                    tracing::debug!("Password compare succeeded for {}", dn);
                    return Ok(Some(dn.clone()));
                }
            }
        }
        Ok(None)
    }
}

#[async_trait]
impl<D: Directory> CredentialValidator for LdapCredentialValidator<D> {
    async fn validate(&self, username: &str, password: &str) -> Result<Principal, AuthError> {
        // An empty password would be an unauthenticated bind, which most
        // directories report as success.
        if username.is_empty() || password.is_empty() {
            return Err(AuthError::InvalidCredentials);
        }

        let timeout = self.config.timeout();
        match tokio::time::timeout(timeout, self.authenticate(username, password)).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!("Directory did not answer within {:?}", timeout);
                Err(AuthError::DirectoryUnavailable(format!(
                    "no answer within {:?}",
                    timeout
                )))
            }
        }
    }
}

fn unavailable(e: DirectoryError) -> AuthError {
    AuthError::DirectoryUnavailable(e.to_string())
}

/// Drop an RFC 3112 style `{BCRYPT}` / `{bcrypt}` prefix
fn strip_scheme(stored: &str) -> &str {
    match stored.split_once('}') {
        Some((scheme, rest)) if scheme.eq_ignore_ascii_case("{bcrypt") => rest,
        _ => stored,
    }
}

/// [`Directory`] over a real LDAP server, one connection per operation
pub struct LdapDirectory {
    url: String,
    timeout: Duration,
}

impl LdapDirectory {
    pub fn new(config: &DirectoryConfig) -> Self {
        Self {
            url: config.url.clone(),
            timeout: config.timeout(),
        }
    }

    async fn connect(&self) -> Result<ldap3::Ldap, DirectoryError> {
        let settings = LdapConnSettings::new().set_conn_timeout(self.timeout);
        let (conn, ldap) = LdapConnAsync::with_settings(settings, &self.url)
            .await
            .map_err(|e| DirectoryError::Connection(e.to_string()))?;
        ldap3::drive!(conn);
        Ok(ldap)
    }
}

fn connection_error(e: ldap3::LdapError) -> DirectoryError {
    DirectoryError::Connection(e.to_string())
}

#[async_trait]
impl Directory for LdapDirectory {
    async fn bind(&self, dn: &str, password: &str) -> Result<bool, DirectoryError> {
        let mut ldap = self.connect().await?;
        let result = ldap
            .with_timeout(self.timeout)
            .simple_bind(dn, password)
            .await
            .map_err(connection_error)?;
        let _ = ldap.unbind().await;

        match classify(Operation::Bind, result.rc) {
            Outcome::Success => Ok(true),
            Outcome::Refused => Ok(false),
            Outcome::Failure => Err(DirectoryError::Operation {
                rc: result.rc,
                message: result.text,
            }),
        }
    }

    async fn read_attribute(
        &self,
        dn: &str,
        attribute: &str,
    ) -> Result<Option<Vec<String>>, DirectoryError> {
        let mut ldap = self.connect().await?;
        let ldap3::SearchResult(entries, result) = ldap
            .with_timeout(self.timeout)
            .search(dn, Scope::Base, "(objectClass=*)", vec![attribute])
            .await
            .map_err(connection_error)?;
        let _ = ldap.unbind().await;

        match classify(Operation::ReadAttribute, result.rc) {
            Outcome::Success => {}
            Outcome::Refused => return Ok(None),
            Outcome::Failure => {
                return Err(DirectoryError::Operation {
                    rc: result.rc,
                    message: result.text,
                });
            }
        }

        Ok(entries
            .into_iter()
            .next()
            .map(|entry| attribute_values(SearchEntry::construct(entry), attribute)))
    }

    async fn search_groups(
        &self,
        base: &str,
        filter: &str,
        attribute: &str,
    ) -> Result<Vec<String>, DirectoryError> {
        let mut ldap = self.connect().await?;
        let ldap3::SearchResult(entries, result) = ldap
            .with_timeout(self.timeout)
            .search(base, Scope::Subtree, filter, vec![attribute])
            .await
            .map_err(connection_error)?;
        let _ = ldap.unbind().await;

        match classify(Operation::SearchGroups, result.rc) {
            Outcome::Success => {}
            Outcome::Refused => return Ok(Vec::new()),
            Outcome::Failure => {
                return Err(DirectoryError::Operation {
                    rc: result.rc,
                    message: result.text,
                });
            }
        }

        Ok(entries
            .into_iter()
            .flat_map(|entry| attribute_values(SearchEntry::construct(entry), attribute))
            .collect())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Operation {
    Bind,
    ReadAttribute,
    SearchGroups,
}

/// Meaning of an LDAP result code for one operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Success,
    /// The directory answered but declined: wrong credentials, no such
    /// entry, or not allowed to read it. Never an outage.
    Refused,
    /// Anything else counts as the directory being unavailable.
    Failure,
}

fn classify(operation: Operation, rc: u32) -> Outcome {
    if rc == RC_SUCCESS {
        return Outcome::Success;
    }
    let refused = match operation {
        // unwillingToPerform covers locked and disabled accounts
        Operation::Bind => matches!(
            rc,
            RC_INVALID_CREDENTIALS
                | RC_NO_SUCH_OBJECT
                | RC_INAPPROPRIATE_AUTHENTICATION
                | RC_UNWILLING_TO_PERFORM
        ),
        // Anonymous reads of the password attribute are commonly denied
        Operation::ReadAttribute => matches!(
            rc,
            RC_NO_SUCH_OBJECT
                | RC_INSUFFICIENT_ACCESS_RIGHTS
                | RC_INAPPROPRIATE_AUTHENTICATION
                | RC_CONFIDENTIALITY_REQUIRED
        ),
        // A missing group base means no groups
        Operation::SearchGroups => rc == RC_NO_SUCH_OBJECT,
    };
    if refused {
        Outcome::Refused
    } else {
        Outcome::Failure
    }
}

/// Attribute names are case-insensitive; binary values are decoded lossily.
fn attribute_values(entry: SearchEntry, attribute: &str) -> Vec<String> {
    let text = entry
        .attrs
        .into_iter()
        .filter(|(name, _)| name.eq_ignore_ascii_case(attribute))
        .flat_map(|(_, values)| values);
    let binary = entry
        .bin_attrs
        .into_iter()
        .filter(|(name, _)| name.eq_ignore_ascii_case(attribute))
        .flat_map(|(_, values)| values)
        .map(|bytes| String::from_utf8_lossy(&bytes).into_owned());
    text.chain(binary).collect()
}
