use std::fmt;

use chrono::{Duration, Utc};
use crypto::digest::Digest;
use crypto::sha2::Sha256;
use rand::{rngs::OsRng, RngCore};
use serde_json::Map;

use crate::{error::IssuerError, model::InviteToken};

/// Entropy of the plaintext secret, before encoding.
pub const SECRET_BYTES: usize = 32;
const ID_SUFFIX_BYTES: usize = 6;
pub const DEFAULT_TTL_HOURS: i64 = 72;

/// The plaintext half of an invite. It only ever lives in memory and in the
/// printed link: never serialized, and Debug is redacted.
#[derive(Clone, PartialEq, Eq)]
pub struct InviteSecret(String);

impl InviteSecret {
    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn hash(&self) -> String {
        hash_secret(&self.0)
    }
}

impl fmt::Debug for InviteSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("InviteSecret(<redacted>)")
    }
}

/// A freshly minted token record plus the one copy of its secret.
#[derive(Debug, Clone)]
pub struct MintedToken {
    pub record: InviteToken,
    pub secret: InviteSecret,
}

pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

fn random_url_safe(len: usize) -> Result<String, IssuerError> {
    let mut bytes = vec![0u8; len];
    OsRng
        .try_fill_bytes(&mut bytes)
        .map_err(IssuerError::RandomSource)?;

    Ok(base64::encode_config(bytes, base64::URL_SAFE_NO_PAD))
}

/// 32 random bytes from the OS, URL-safe base64 without padding (43 chars).
pub fn generate_secret() -> Result<InviteSecret, IssuerError> {
    Ok(InviteSecret(random_url_safe(SECRET_BYTES)?))
}

/// Lowercase hex SHA-256 of the secret's UTF-8 bytes. This is what gets
/// stored and what redemption compares against.
pub fn hash_secret(secret: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.input_str(secret);
    hasher.result_str()
}

/// `invite_<millis>_<suffix>`. The suffix makes collisions unlikely, not
/// impossible.
pub fn generate_token_id(now_ms: i64) -> Result<String, IssuerError> {
    Ok(format!(
        "invite_{}_{}",
        now_ms,
        random_url_safe(ID_SUFFIX_BYTES)?
    ))
}

pub fn mint_token(
    agency_id: &str,
    user_id: &str,
    now_ms: i64,
    ttl: Duration,
) -> Result<MintedToken, IssuerError> {
    let expires_at = now_ms
        .checked_add(ttl.num_milliseconds())
        .ok_or(IssuerError::ExpiryOutOfRange { now_ms })?;
    let secret = generate_secret()?;

    let record = InviteToken {
        id: generate_token_id(now_ms)?,
        agency_id: agency_id.to_string(),
        user_id: user_id.to_string(),
        token_hash: secret.hash(),
        expires_at,
        used_at: None,
        created_at: now_ms,
        extra: Map::new(),
    };

    Ok(MintedToken { record, secret })
}
