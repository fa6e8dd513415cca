//! Request authentication
//!
//! Manual calls present the target site's own token (minted by the site
//! controller into `status.authToken`), so a tenant can only act on its own
//! sites. Webhooks are authenticated with an HMAC-SHA256 signature over the
//! raw body. Every comparison is constant-time.

use crate::engine::SyncEngine;
use crate::error::SyncError;
use axum::http::{HeaderMap, header};
use crds::StaticSite;
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Why a request was refused
#[derive(Debug)]
pub enum AuthError {
    /// Missing or wrong credentials, or no such site
    Unauthorized,
    /// The record could not be read
    Store(SyncError),
}

/// Constant-time byte comparison
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// Token from an `Authorization: Bearer <token>` header
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.trim().split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then_some(token)
}

/// Loads the site and checks `presented` against its token.
///
/// A missing site is reported as [`AuthError::Unauthorized`] so callers
/// cannot probe which sites exist.
pub async fn authorize_site(
    engine: &SyncEngine,
    namespace: &str,
    name: &str,
    presented: Option<&str>,
) -> Result<StaticSite, AuthError> {
    let presented = presented.ok_or(AuthError::Unauthorized)?;
    let site = engine
        .get_site(namespace, name)
        .await
        .map_err(AuthError::Store)?
        .ok_or(AuthError::Unauthorized)?;
    let expected = site.auth_token().ok_or(AuthError::Unauthorized)?;
    if constant_time_eq(presented.as_bytes(), expected.as_bytes()) {
        Ok(site)
    } else {
        Err(AuthError::Unauthorized)
    }
}

/// Hex HMAC-SHA256 of `body` under `secret`
#[cfg(test)]
pub fn sign(secret: &str, body: &[u8]) -> Option<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).ok()?;
    mac.update(body);
    Some(hex::encode(mac.finalize().into_bytes()))
}

/// Checks a hex HMAC-SHA256 signature of `body`
pub fn verify_signature(secret: &str, body: &[u8], signature_hex: &str) -> bool {
    let Ok(signature) = hex::decode(signature_hex.trim()) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&signature).is_ok()
}
