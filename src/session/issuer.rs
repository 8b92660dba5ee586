//! Stateless access/refresh token issuing
//!
//! Tokens are HS256 JWTs carrying their own expiry, so validating an access
//! token needs no lookup. Refresh rotates the pair and remembers the used
//! refresh token id until it would have expired anyway.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use parking_lot::Mutex;
use rand::rngs::OsRng;
use rand::RngCore;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::SessionConfig;
use crate::error::{AuroraError, Result, SessionError};
use crate::models::{Claims, Identity, TokenKind, TokenPair};

/// Refresh token ids that have already been exchanged
#[derive(Debug, Default)]
struct RevocationSet {
    used: Mutex<HashMap<String, i64>>,
}

impl RevocationSet {
    /// Mark `jti` as used. Returns false if it was already used.
    ///
    /// Entries past their expiry are pruned first; an expired token can never
    /// get this far, so forgetting it is safe.
    fn consume(&self, jti: &str, exp: i64, now: i64) -> bool {
        let mut used = self.used.lock();
        used.retain(|_, &mut e| e > now);
        if used.contains_key(jti) {
            return false;
        }
        used.insert(jti.to_string(), exp);
        true
    }

    fn len(&self) -> usize {
        self.used.lock().len()
    }
}

/// Issues and checks session tokens
pub struct SessionIssuer {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    access_ttl: Duration,
    refresh_ttl: Duration,
    revoked: RevocationSet,
}

impl SessionIssuer {
    /// Create an issuer.
    ///
    /// An empty secret gets a random per-process key, so tokens do not
    /// survive a restart.
    pub fn new(config: &SessionConfig) -> Result<Self> {
        let key = if config.jwt_secret.is_empty() {
            let mut key_bytes = [0u8; 32];
            OsRng.try_fill_bytes(&mut key_bytes).map_err(|e| {
                AuroraError::Internal(format!("failed to generate signing key: {}", e))
            })?;
            debug!("Generated random JWT secret");
            key_bytes.to_vec()
        } else {
            config.jwt_secret.as_bytes().to_vec()
        };

        let access_ttl = Duration::from_std(config.access_ttl)
            .map_err(|_| AuroraError::InvalidConfig("ACCESS_TOKEN_TTL out of range".into()))?;
        let refresh_ttl = Duration::from_std(config.refresh_ttl)
            .map_err(|_| AuroraError::InvalidConfig("REFRESH_TOKEN_TTL out of range".into()))?;

        Ok(Self {
            encoding_key: EncodingKey::from_secret(&key),
            decoding_key: DecodingKey::from_secret(&key),
            access_ttl,
            refresh_ttl,
            revoked: RevocationSet::default(),
        })
    }

    /// Mint a fresh pair for an already-verified identity
    pub fn issue_initial(&self, identity: &str) -> Result<TokenPair> {
        self.issue_initial_at(identity, Utc::now())
    }

    pub fn issue_initial_at(&self, identity: &str, now: DateTime<Utc>) -> Result<TokenPair> {
        let pair = self.issue_pair(identity, now)?;
        info!("Issued session for {}", identity);
        Ok(pair)
    }

    /// Check an access token and return its identity
    pub fn validate(&self, token: &str) -> std::result::Result<Identity, SessionError> {
        self.validate_at(token, Utc::now())
    }

    pub fn validate_at(
        &self,
        token: &str,
        now: DateTime<Utc>,
    ) -> std::result::Result<Identity, SessionError> {
        let claims = self.decode_claims(token, now)?;
        if claims.kind != TokenKind::Access {
            debug!("Refresh token presented as access token");
            return Err(SessionError::Invalid);
        }
        Ok(Identity::new(claims.sub))
    }

    /// Exchange a refresh token for a new pair; the old one becomes revoked
    pub fn refresh(&self, token: &str) -> Result<TokenPair> {
        self.refresh_at(token, Utc::now())
    }

    pub fn refresh_at(&self, token: &str, now: DateTime<Utc>) -> Result<TokenPair> {
        let claims = self.decode_claims(token, now)?;
        if claims.kind != TokenKind::Refresh {
            debug!("Access token presented for refresh");
            return Err(SessionError::Invalid.into());
        }

        if !self.revoked.consume(&claims.jti, claims.exp, now.timestamp()) {
            warn!("Refresh token reuse for {}", claims.sub);
            return Err(SessionError::Revoked.into());
        }

        let pair = self.issue_pair(&claims.sub, now)?;
        debug!("Rotated session for {}", claims.sub);
        Ok(pair)
    }

    /// Number of remembered refresh token ids
    pub fn revoked_count(&self) -> usize {
        self.revoked.len()
    }

    fn issue_pair(&self, subject: &str, now: DateTime<Utc>) -> Result<TokenPair> {
        let access_token = self.sign(subject, TokenKind::Access, now, self.access_ttl)?;
        let refresh_token = self.sign(subject, TokenKind::Refresh, now, self.refresh_ttl)?;

        Ok(TokenPair {
            access_token,
            refresh_token,
            token_type: "Bearer",
            expires_in: self.access_ttl.num_seconds(),
            refresh_expires_in: self.refresh_ttl.num_seconds(),
        })
    }

    fn sign(
        &self,
        subject: &str,
        kind: TokenKind,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> Result<String> {
        let claims = Claims {
            sub: subject.to_string(),
            iat: now.timestamp(),
            exp: (now + ttl).timestamp(),
            kind,
            jti: Uuid::new_v4().to_string(),
        };

        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key).map_err(|e| {
            error!("Failed to generate JWT: {}", e);
            AuroraError::from(e)
        })
    }

    /// Verify signature and structure, then expiry against `now`
    fn decode_claims(
        &self,
        token: &str,
        now: DateTime<Utc>,
    ) -> std::result::Result<Claims, SessionError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = false;
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp", "sub"]);

        let claims = decode::<Claims>(token, &self.decoding_key, &validation)
            .map(|data| data.claims)
            .map_err(|e| {
                debug!("JWT validation failed: {}", e);
                match e.kind() {
                    ErrorKind::InvalidToken
                    | ErrorKind::Base64(_)
                    | ErrorKind::Json(_)
                    | ErrorKind::Utf8(_)
                    | ErrorKind::MissingRequiredClaim(_) => SessionError::Malformed,
                    _ => SessionError::Invalid,
                }
            })?;

        if now.timestamp() >= claims.exp {
            return Err(SessionError::Expired);
        }

        Ok(claims)
    }
}
