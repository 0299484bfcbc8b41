//! Authentication for the three principal kinds the API surface sees
//! (§4.8/§6): facilitator-grade API keys, payer JWTs, and the cron secret
//! that gates `/capture`.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use jsonwebtoken::{DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use x402_store::models::ApiKey;
use x402_types::error::ErrorCode;

use crate::error::ApiError;

/// sha-256 hex digest of an API key secret or session access token. Secrets
/// are never compared or stored in cleartext (spec §3 ApiKey, §4.4 session
/// token).
pub fn sha256_hex(input: &str) -> String {
    let digest = Sha256::digest(input.as_bytes());
    hex::encode(digest)
}

/// Constant-time equality over the hex digests, guarding against timing
/// side-channels on the comparison itself (spec §4.4: "under constant-time
/// comparison").
pub fn hashes_match(a: &str, b: &str) -> bool {
    a.as_bytes().ct_eq(b.as_bytes()).into()
}

fn bearer_token(headers: &axum::http::HeaderMap) -> Result<&str, ApiError> {
    let header = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::new(ErrorCode::Unauthorized))?;
    header.strip_prefix("Bearer ").ok_or_else(|| ApiError::new(ErrorCode::Unauthorized))
}

/// An authenticated API key principal (spec §6: "Bearer tokens prefixed
/// `x402_`"). Extracted by hashing the presented secret and looking it up in
/// the store; `last_used_at` is updated fire-and-forget (§9: "tolerate write
/// errors silently").
#[derive(Debug, Clone)]
pub struct ApiKeyPrincipal {
    pub api_key: ApiKey,
}

impl ApiKeyPrincipal {
    pub async fn authenticate(
        store: &dyn x402_store::Store,
        header_value: Option<&str>,
    ) -> Result<Self, ApiError> {
        let header = header_value.ok_or_else(|| ApiError::new(ErrorCode::Unauthorized))?;
        let token = header.strip_prefix("Bearer ").ok_or_else(|| ApiError::new(ErrorCode::Unauthorized))?;
        if !token.starts_with("x402_") {
            return Err(ApiError::new(ErrorCode::Unauthorized));
        }
        let hash = sha256_hex(token);
        let api_key = store
            .find_api_key_by_hash(&hash)
            .await?
            .ok_or_else(|| ApiError::new(ErrorCode::Unauthorized))?;
        if api_key.status != x402_store::models::ApiKeyStatus::Active {
            return Err(ApiError::new(ErrorCode::Unauthorized));
        }
        let api_key_id = api_key.id;
        store.touch_api_key_last_used(api_key_id).await;
        Ok(Self { api_key })
    }
}

/// Claims carried by a payer-scoped JWT, issued by the (out-of-scope)
/// dashboard/auth collaborator and only verified here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PayerClaims {
    /// Lowercased wallet address, the session `payer` this token authorizes.
    pub sub: String,
    pub exp: i64,
}

pub struct PayerPrincipal {
    pub payer: String,
}

impl PayerPrincipal {
    pub fn verify(parts: &Parts, jwt_secret: &str) -> Result<Self, ApiError> {
        let token = bearer_token(&parts.headers)?;
        let data = jsonwebtoken::decode::<PayerClaims>(
            token,
            &DecodingKey::from_secret(jwt_secret.as_bytes()),
            &Validation::default(),
        )
        .map_err(|_| ApiError::new(ErrorCode::Unauthorized))?;
        Ok(Self { payer: data.claims.sub.to_lowercase() })
    }
}

/// The shared secret gating `/capture` (spec §6: `Authorization: Bearer <CRON_SECRET>`).
pub fn verify_cron_secret(headers: &axum::http::HeaderMap, cron_secret: &str) -> Result<(), ApiError> {
    let token = bearer_token(headers)?;
    if hashes_match(&sha256_hex(token), &sha256_hex(cron_secret)) {
        Ok(())
    } else {
        Err(ApiError::new(ErrorCode::Unauthorized))
    }
}

impl<S> FromRequestParts<S> for PayerPrincipal
where
    S: crate::handlers::JwtSecretProvider + Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        PayerPrincipal::verify(parts, state.jwt_secret())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha256_hex_is_deterministic() {
        assert_eq!(sha256_hex("hello"), sha256_hex("hello"));
        assert_ne!(sha256_hex("hello"), sha256_hex("world"));
    }

    #[test]
    fn hashes_match_compares_equal_digests() {
        let h = sha256_hex("x402_abc123");
        assert!(hashes_match(&h, &h));
        assert!(!hashes_match(&h, &sha256_hex("other")));
    }

    #[test]
    fn verify_cron_secret_accepts_the_matching_bearer_token() {
        let mut headers = axum::http::HeaderMap::new();
        headers.insert(axum::http::header::AUTHORIZATION, "Bearer s3cr3t".parse().unwrap());
        assert!(verify_cron_secret(&headers, "s3cr3t").is_ok());
    }

    #[test]
    fn verify_cron_secret_rejects_a_mismatched_or_missing_token() {
        let mut headers = axum::http::HeaderMap::new();
        headers.insert(axum::http::header::AUTHORIZATION, "Bearer wrong".parse().unwrap());
        assert!(verify_cron_secret(&headers, "s3cr3t").is_err());
        assert!(verify_cron_secret(&axum::http::HeaderMap::new(), "s3cr3t").is_err());
    }
}
