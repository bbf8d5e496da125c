//! # Access and Refresh Credentials
//!
//! - **Access**: HS256 JWT, 15 minutes by default, verified statelessly by
//!   signature, issuer and expiry.
//! - **Refresh**: 32 random bytes, hex-encoded. Only the SHA-256 of the
//!   token and its expiry are stored on the identity. Every refresh rotates
//!   the token; the previous one stops working immediately.

use std::time::Duration;

use chrono::{DateTime, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use rand_core::{OsRng, RngCore};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;
use zeroize::Zeroizing;

use crate::auth::{constant_time_eq, to_hex};
use crate::config::AppConfig;
use crate::error::AppError;
use crate::state::{IdentityRecord, Store};

/// `typ` claim of access tokens.
pub const ACCESS_TOKEN_TYPE: &str = "access";

/// JWT claims carried by an access token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessClaims {
    /// User id.
    pub sub: Uuid,
    pub application_id: Option<Uuid>,
    pub phone: String,
    pub iat: i64,
    pub exp: i64,
    pub iss: String,
    pub jti: String,
    pub typ: String,
}

/// A freshly issued credential pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
}

/// Issues, verifies, rotates and revokes credentials.
///
/// Holds a handle to the identity store so that rotation can locate and
/// replace the stored refresh hash in one critical section.
#[derive(Clone)]
pub struct TokenService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    issuer: String,
    access_ttl: Duration,
    refresh_ttl: Duration,
    identities: Store<IdentityRecord>,
}

impl std::fmt::Debug for TokenService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenService")
            .field("keys", &"[REDACTED]")
            .field("issuer", &self.issuer)
            .field("access_ttl", &self.access_ttl)
            .field("refresh_ttl", &self.refresh_ttl)
            .finish()
    }
}

fn sha256_hex(input: &str) -> String {
    to_hex(&Sha256::digest(input.as_bytes()))
}

fn new_refresh_token() -> String {
    let mut bytes = Zeroizing::new([0u8; 32]);
    OsRng.fill_bytes(&mut bytes[..]);
    to_hex(&bytes[..])
}

fn ttl_to_chrono(ttl: Duration) -> chrono::Duration {
    chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::days(365))
}

fn invalid_refresh() -> AppError {
    AppError::unauthorized("Invalid refresh token").with_code("INVALID_REFRESH_TOKEN")
}

impl TokenService {
    pub fn new(config: &AppConfig, identities: Store<IdentityRecord>) -> Self {
        let secret = config.jwt_secret.as_bytes();
        Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            issuer: config.jwt_issuer.clone(),
            access_ttl: config.access_token_ttl,
            refresh_ttl: config.refresh_token_ttl,
            identities,
        }
    }

    fn access_token(&self, identity: &IdentityRecord, now: DateTime<Utc>) -> Result<String, AppError> {
        let claims = AccessClaims {
            sub: identity.id,
            application_id: identity.application_id,
            phone: identity.phone.clone(),
            iat: now.timestamp(),
            exp: (now + ttl_to_chrono(self.access_ttl)).timestamp(),
            iss: self.issuer.clone(),
            jti: Uuid::new_v4().to_string(),
            typ: ACCESS_TOKEN_TYPE.to_string(),
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| AppError::internal(format!("failed to sign access token: {e}")))
    }

    /// Mint a pair for `identity` and store the new refresh hash on it.
    fn mint(&self, identity: &mut IdentityRecord, now: DateTime<Utc>) -> Result<TokenPair, AppError> {
        let access_token = self.access_token(identity, now)?;
        let refresh_token = new_refresh_token();
        identity.refresh_token_hash = Some(sha256_hex(&refresh_token));
        identity.refresh_token_expires_at = Some(now + ttl_to_chrono(self.refresh_ttl));
        identity.updated_at = now;
        Ok(TokenPair {
            access_token,
            refresh_token,
        })
    }

    /// Issue a pair for a stored identity, replacing any previous refresh
    /// token. Returns the updated identity for persistence.
    pub fn issue(&self, user_id: Uuid) -> Result<(TokenPair, IdentityRecord), AppError> {
        let now = Utc::now();
        self.identities
            .try_update(&user_id, |identity| {
                self.mint(identity, now).map(|pair| (pair, identity.clone()))
            })
            .unwrap_or_else(|| Err(AppError::internal(format!("identity {user_id} vanished"))))
    }

    /// Verify an access token and return its claims.
    pub fn verify_access(&self, token: &str) -> Result<AccessClaims, AppError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.set_issuer(&[&self.issuer]);
        validation.set_required_spec_claims(&["exp", "iss", "sub"]);

        let claims = decode::<AccessClaims>(token, &self.decoding_key, &validation)?.claims;
        if claims.typ != ACCESS_TOKEN_TYPE {
            return Err(AppError::unauthorized("Invalid token").with_code("INVALID_TOKEN"));
        }
        Ok(claims)
    }

    /// Exchange a refresh token for a new pair.
    ///
    /// Lookup, expiry check and replacement run under one write lock, so of
    /// two concurrent refreshes with the same token exactly one succeeds.
    /// An expired token has its stored hash cleared.
    pub fn rotate(&self, presented: &str) -> Result<(TokenPair, IdentityRecord), AppError> {
        let now = Utc::now();
        let presented_hash = sha256_hex(presented);
        self.identities
            .try_update_where(
                |identity| {
                    identity
                        .refresh_token_hash
                        .as_deref()
                        .is_some_and(|stored| constant_time_eq(stored, &presented_hash))
                },
                |identity| {
                    if identity.refresh_token_expires_at.map_or(true, |exp| exp <= now) {
                        identity.refresh_token_hash = None;
                        identity.refresh_token_expires_at = None;
                        return Err(AppError::unauthorized("Refresh token has expired")
                            .with_code("REFRESH_TOKEN_EXPIRED"));
                    }
                    self.mint(identity, now).map(|pair| (pair, identity.clone()))
                },
            )
            .unwrap_or_else(|| Err(invalid_refresh()))
    }

    /// Clear the stored refresh token (logout).
    pub fn revoke(&self, user_id: Uuid) -> Option<IdentityRecord> {
        self.identities.update(&user_id, |identity| {
            identity.refresh_token_hash = None;
            identity.refresh_token_expires_at = None;
            identity.updated_at = Utc::now();
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service_with_identity() -> (TokenService, Uuid) {
        let store = Store::new();
        let identity = IdentityRecord::new("9876543210", Utc::now());
        let id = identity.id;
        store.insert(id, identity);
        (TokenService::new(&AppConfig::default(), store), id)
    }

    #[test]
    fn issued_access_token_verifies() {
        let (tokens, id) = service_with_identity();
        let (pair, identity) = tokens.issue(id).unwrap();
        let claims = tokens.verify_access(&pair.access_token).unwrap();
        assert_eq!(claims.sub, id);
        assert_eq!(claims.phone, "9876543210");
        assert_eq!(claims.typ, "access");
        assert_eq!(claims.exp - claims.iat, 15 * 60);
        assert_eq!(pair.refresh_token.len(), 64);
        assert_eq!(identity.refresh_token_hash, Some(sha256_hex(&pair.refresh_token)));
    }

    #[test]
    fn wrong_secret_is_invalid_token() {
        let (tokens, id) = service_with_identity();
        let (pair, _) = tokens.issue(id).unwrap();
        let other = TokenService::new(
            &AppConfig {
                jwt_secret: Zeroizing::new("a-completely-different-secret-value!!".into()),
                ..AppConfig::default()
            },
            Store::new(),
        );
        let err = other.verify_access(&pair.access_token).unwrap_err();
        assert_eq!(err.status_and_code().1, "INVALID_TOKEN");
    }

    #[test]
    fn expired_access_token() {
        let (tokens, _) = service_with_identity();
        let now = Utc::now().timestamp();
        let claims = AccessClaims {
            sub: Uuid::new_v4(),
            application_id: None,
            phone: "9876543210".into(),
            iat: now - 120,
            exp: now - 60,
            iss: "dsa-onboarding".into(),
            jti: "x".into(),
            typ: "access".into(),
        };
        let token = encode(&Header::new(Algorithm::HS256), &claims, &tokens.encoding_key).unwrap();
        let err = tokens.verify_access(&token).unwrap_err();
        assert_eq!(err.status_and_code().1, "TOKEN_EXPIRED");
    }

    #[test]
    fn non_access_typ_rejected() {
        let (tokens, _) = service_with_identity();
        let now = Utc::now().timestamp();
        let claims = AccessClaims {
            sub: Uuid::new_v4(),
            application_id: None,
            phone: "9876543210".into(),
            iat: now,
            exp: now + 60,
            iss: "dsa-onboarding".into(),
            jti: "x".into(),
            typ: "refresh".into(),
        };
        let token = encode(&Header::new(Algorithm::HS256), &claims, &tokens.encoding_key).unwrap();
        assert_eq!(
            tokens.verify_access(&token).unwrap_err().status_and_code().1,
            "INVALID_TOKEN"
        );
    }

    #[test]
    fn rotated_refresh_token_cannot_be_reused() {
        let (tokens, id) = service_with_identity();
        let (first, _) = tokens.issue(id).unwrap();
        let (second, _) = tokens.rotate(&first.refresh_token).unwrap();
        assert_ne!(first.refresh_token, second.refresh_token);

        let err = tokens.rotate(&first.refresh_token).unwrap_err();
        assert_eq!(err.status_and_code().1, "INVALID_REFRESH_TOKEN");
        assert!(tokens.rotate(&second.refresh_token).is_ok());
    }

    #[test]
    fn expired_refresh_token_is_cleared() {
        let (tokens, id) = service_with_identity();
        let (pair, _) = tokens.issue(id).unwrap();
        tokens.identities.update(&id, |i| {
            i.refresh_token_expires_at = Some(Utc::now() - chrono::Duration::seconds(1));
        });
        let err = tokens.rotate(&pair.refresh_token).unwrap_err();
        assert_eq!(err.status_and_code().1, "REFRESH_TOKEN_EXPIRED");
        assert!(tokens.identities.get(&id).unwrap().refresh_token_hash.is_none());
        let err = tokens.rotate(&pair.refresh_token).unwrap_err();
        assert_eq!(err.status_and_code().1, "INVALID_REFRESH_TOKEN");
    }

    #[test]
    fn revoke_invalidates_refresh_token() {
        let (tokens, id) = service_with_identity();
        let (pair, _) = tokens.issue(id).unwrap();
        assert!(tokens.revoke(id).is_some());
        assert!(tokens.rotate(&pair.refresh_token).is_err());
    }

    #[test]
    fn concurrent_rotation_has_one_winner() {
        let (tokens, id) = service_with_identity();
        let (pair, _) = tokens.issue(id).unwrap();
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let tokens = tokens.clone();
                let presented = pair.refresh_token.clone();
                std::thread::spawn(move || tokens.rotate(&presented).is_ok())
            })
            .collect();
        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|ok| *ok)
            .count();
        assert_eq!(winners, 1);
    }

    #[test]
    fn debug_redacts_keys() {
        let (tokens, _) = service_with_identity();
        assert!(format!("{tokens:?}").contains("[REDACTED]"));
    }
}
