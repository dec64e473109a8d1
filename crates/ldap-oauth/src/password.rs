//! bcrypt hashing shared by client secrets and directory password compare.

use std::sync::LazyLock;

/// Hash an arbitrary value so unknown client ids cost as much as known ones.
static DUMMY_HASH: LazyLock<Option<String>> =
    LazyLock::new(|| bcrypt::hash("not-a-real-secret", bcrypt::DEFAULT_COST).ok());

/// Hash a secret for storage in the configuration file.
pub fn hash_secret(secret: &str, cost: u32) -> Result<String, bcrypt::BcryptError> {
    bcrypt::hash(secret, cost)
}

/// Verify a plaintext value against a bcrypt hash.
///
/// Runs on the blocking pool since bcrypt is deliberately slow. A malformed
/// hash is logged and treated as a mismatch.
pub async fn verify_secret(plain: &str, hash: &str) -> bool {
    let plain = plain.to_owned();
    let hash = hash.to_owned();
    match tokio::task::spawn_blocking(move || bcrypt::verify(plain, &hash)).await {
        Ok(Ok(matches)) => matches,
        Ok(Err(e)) => {
            tracing::warn!("Stored hash could not be parsed: {}", e);
            false
        }
        Err(e) => {
            tracing::error!("Hash verification task failed: {}", e);
            false
        }
    }
}

/// Spend the same work as a real verification and report a mismatch.
pub async fn verify_dummy(plain: &str) {
    if let Some(hash) = DUMMY_HASH.as_deref() {
        let _ = verify_secret(plain, hash).await;
    }
}
