//! Mint, verify, introspect, and revoke access/refresh/api-key tokens.

use crate::audit::{AuditEvent, AuditEventKind, AuditLog, Clock};
use crate::error::AuthError;
use base64::Engine as _;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::{Sha256, Sha384, Sha512};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TokenKind {
    Access,
    Refresh,
    ApiKey,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SigningAlgorithm {
    Hs256,
    Hs384,
    Hs512,
}

impl SigningAlgorithm {
    fn name(self) -> &'static str {
        match self {
            SigningAlgorithm::Hs256 => "HS256",
            SigningAlgorithm::Hs384 => "HS384",
            SigningAlgorithm::Hs512 => "HS512",
        }
    }

    fn sign(self, secret: &[u8], data: &[u8]) -> Vec<u8> {
        match self {
            SigningAlgorithm::Hs256 => {
                let mut mac = Hmac::<Sha256>::new_from_slice(secret).expect("hmac accepts any key length");
                mac.update(data);
                mac.finalize().into_bytes().to_vec()
            }
            SigningAlgorithm::Hs384 => {
                let mut mac = Hmac::<Sha384>::new_from_slice(secret).expect("hmac accepts any key length");
                mac.update(data);
                mac.finalize().into_bytes().to_vec()
            }
            SigningAlgorithm::Hs512 => {
                let mut mac = Hmac::<Sha512>::new_from_slice(secret).expect("hmac accepts any key length");
                mac.update(data);
                mac.finalize().into_bytes().to_vec()
            }
        }
    }

    /// Constant-time signature check via each algorithm's own `Mac::verify_slice`.
    fn verify(self, secret: &[u8], data: &[u8], signature: &[u8]) -> bool {
        match self {
            SigningAlgorithm::Hs256 => Hmac::<Sha256>::new_from_slice(secret)
                .expect("hmac accepts any key length")
                .chain_update(data)
                .verify_slice(signature)
                .is_ok(),
            SigningAlgorithm::Hs384 => Hmac::<Sha384>::new_from_slice(secret)
                .expect("hmac accepts any key length")
                .chain_update(data)
                .verify_slice(signature)
                .is_ok(),
            SigningAlgorithm::Hs512 => Hmac::<Sha512>::new_from_slice(secret)
                .expect("hmac accepts any key length")
                .chain_update(data)
                .verify_slice(signature)
                .is_ok(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenClaims {
    pub subject: String,
    pub issuer: String,
    pub audience: String,
    pub token_id: String,
    pub kind: TokenKind,
    pub issued_at_ms: u64,
    pub expires_at_ms: u64,
    pub scopes: Option<Vec<String>>,
    pub custom: Option<serde_json::Value>,
}

#[derive(Debug, Clone)]
pub struct TokenConfig {
    pub secret: Vec<u8>,
    pub algorithm: SigningAlgorithm,
    pub issuer: String,
    pub audience: String,
    pub access_ttl_ms: u64,
    pub refresh_ttl_ms: u64,
    pub api_key_ttl_ms: u64,
}

impl TokenConfig {
    /// Validates the signing secret per the zero-trust constraint that
    /// secrets under 16 bytes are refused at configuration time.
    pub fn new(secret: Vec<u8>, algorithm: SigningAlgorithm) -> Result<Self, AuthError> {
        if secret.len() < 16 {
            return Err(AuthError::InvalidConfiguration(
                "signing secret must be at least 16 bytes".to_owned(),
            ));
        }
        Ok(TokenConfig {
            secret,
            algorithm,
            issuer: "polycall".to_owned(),
            audience: "polycall-clients".to_owned(),
            access_ttl_ms: 3_600_000,
            refresh_ttl_ms: 30 * 24 * 3_600_000,
            api_key_ttl_ms: 365 * 24 * 3_600_000,
        })
    }

    pub fn with_access_ttl_ms(mut self, ttl_ms: u64) -> Self {
        self.access_ttl_ms = ttl_ms.min(3_600_000);
        self
    }
}

struct RegistryEntry {
    kind: TokenKind,
    identity_id: String,
    issued_at_ms: u64,
    expires_at_ms: u64,
    revoked: bool,
}

/// Mints, verifies, refreshes, revokes, and introspects tokens. Every
/// operation emits a matching audit event; validation always checks the
/// registry even when the signature and expiry are fine, so a revoked
/// token never validates.
pub struct TokenService {
    config: TokenConfig,
    clock: Arc<dyn Clock>,
    registry: Mutex<HashMap<String, RegistryEntry>>,
    audit: Arc<dyn AuditLog>,
}

impl TokenService {
    pub fn new(config: TokenConfig, clock: Arc<dyn Clock>, audit: Arc<dyn AuditLog>) -> Self {
        TokenService {
            config,
            clock,
            registry: Mutex::new(HashMap::new()),
            audit,
        }
    }

    /// Access-token validity is capped at 1h no matter how `config` was
    /// built, so this cap holds even for a bare `TokenConfig { .. }`
    /// literal that bypasses `with_access_ttl_ms`.
    fn ttl_for(&self, kind: TokenKind) -> u64 {
        match kind {
            TokenKind::Access => self.config.access_ttl_ms.min(3_600_000),
            TokenKind::Refresh => self.config.refresh_ttl_ms,
            TokenKind::ApiKey => self.config.api_key_ttl_ms,
        }
    }

    fn encode(&self, claims: &TokenClaims) -> Result<String, AuthError> {
        let header = serde_json::json!({ "alg": self.config.algorithm.name(), "typ": "PCT" });
        let header_b64 = base64::engine::general_purpose::URL_SAFE_NO_PAD
            .encode(serde_json::to_vec(&header).map_err(|e| AuthError::InvalidArgument(e.to_string()))?);
        let claims_b64 = base64::engine::general_purpose::URL_SAFE_NO_PAD
            .encode(serde_json::to_vec(claims).map_err(|e| AuthError::InvalidArgument(e.to_string()))?);
        let signing_input = format!("{header_b64}.{claims_b64}");
        let signature = self.config.algorithm.sign(&self.config.secret, signing_input.as_bytes());
        let signature_b64 = base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(signature);
        Ok(format!("{signing_input}.{signature_b64}"))
    }

    fn decode_unverified(token: &str) -> Result<(String, String, TokenClaims), AuthError> {
        let mut parts = token.split('.');
        let (Some(header_b64), Some(claims_b64), Some(signature_b64), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(AuthError::InvalidToken("malformed token structure".to_owned()));
        };
        let claims_bytes = base64::engine::general_purpose::URL_SAFE_NO_PAD
            .decode(claims_b64)
            .map_err(|_| AuthError::InvalidToken("malformed claims encoding".to_owned()))?;
        let claims: TokenClaims = serde_json::from_slice(&claims_bytes)
            .map_err(|_| AuthError::InvalidToken("malformed claims payload".to_owned()))?;
        Ok((header_b64.to_owned(), signature_b64.to_owned(), claims))
    }

    fn verify_signature(&self, token: &str) -> Result<TokenClaims, AuthError> {
        let (header_b64, signature_b64, claims) = Self::decode_unverified(token)?;
        let claims_b64 = token
            .split('.')
            .nth(1)
            .ok_or_else(|| AuthError::InvalidToken("malformed token structure".to_owned()))?;
        let signing_input = format!("{header_b64}.{claims_b64}");
        let signature = base64::engine::general_purpose::URL_SAFE_NO_PAD
            .decode(signature_b64)
            .map_err(|_| AuthError::InvalidToken("malformed signature encoding".to_owned()))?;
        if !self
            .config
            .algorithm
            .verify(&self.config.secret, signing_input.as_bytes(), &signature)
        {
            return Err(AuthError::InvalidToken("signature mismatch".to_owned()));
        }
        Ok(claims)
    }

    /// Mint a new token for `identity_id`.
    pub fn issue(
        &self,
        identity_id: &str,
        kind: TokenKind,
        scopes: Option<Vec<String>>,
        custom: Option<serde_json::Value>,
    ) -> Result<String, AuthError> {
        let now = self.clock.now_ms();
        let token_id = Uuid::new_v4().to_string();
        let expires_at_ms = now + self.ttl_for(kind);
        let claims = TokenClaims {
            subject: identity_id.to_owned(),
            issuer: self.config.issuer.clone(),
            audience: self.config.audience.clone(),
            token_id: token_id.clone(),
            kind,
            issued_at_ms: now,
            expires_at_ms,
            scopes,
            custom,
        };
        let token = self.encode(&claims)?;

        self.registry.lock().unwrap_or_else(|e| e.into_inner()).insert(
            token_id,
            RegistryEntry {
                kind,
                identity_id: identity_id.to_owned(),
                issued_at_ms: now,
                expires_at_ms,
                revoked: false,
            },
        );
        debug!(identity_id, kind = ?kind, "issued token");
        self.audit.record(AuditEvent {
            kind: AuditEventKind::TokenIssue,
            identity_id: Some(identity_id.to_owned()),
            resource: None,
            action: None,
            success: true,
            timestamp_ms: now,
            details: None,
        });
        Ok(token)
    }

    /// Verify signature, expiry, and registry state; returns the claims.
    pub fn validate(&self, token: &str) -> Result<TokenClaims, AuthError> {
        let result = self.validate_inner(token);
        let now = self.clock.now_ms();
        self.audit.record(AuditEvent {
            kind: AuditEventKind::TokenValidate,
            identity_id: result.as_ref().ok().map(|c| c.subject.clone()),
            resource: None,
            action: None,
            success: result.is_ok(),
            timestamp_ms: now,
            details: result.as_ref().err().map(std::string::ToString::to_string),
        });
        result
    }

    fn validate_inner(&self, token: &str) -> Result<TokenClaims, AuthError> {
        let claims = self.verify_signature(token)?;
        let now = self.clock.now_ms();
        if claims.expires_at_ms <= now {
            return Err(AuthError::InvalidToken("token expired".to_owned()));
        }
        let registry = self.registry.lock().unwrap_or_else(|e| e.into_inner());
        let entry = registry
            .get(&claims.token_id)
            .ok_or_else(|| AuthError::InvalidToken("unknown token id".to_owned()))?;
        if entry.revoked {
            return Err(AuthError::InvalidToken("token revoked".to_owned()));
        }
        Ok(claims)
    }

    /// Issue a new access token for the subject of a valid, unrevoked
    /// refresh token.
    pub fn refresh(&self, refresh_token: &str) -> Result<String, AuthError> {
        let claims = self.validate(refresh_token)?;
        if claims.kind != TokenKind::Refresh {
            return Err(AuthError::InvalidToken(
                "refresh requires a refresh-kind token".to_owned(),
            ));
        }
        self.issue(&claims.subject, TokenKind::Access, claims.scopes, claims.custom)
    }

    /// Mark the token's registry entry revoked; subsequent validations
    /// fail.
    pub fn revoke(&self, token: &str) -> Result<(), AuthError> {
        let (_, _, claims) = Self::decode_unverified(token)?;
        let mut registry = self.registry.lock().unwrap_or_else(|e| e.into_inner());
        let entry = registry
            .get_mut(&claims.token_id)
            .ok_or_else(|| AuthError::InvalidToken("unknown token id".to_owned()))?;
        entry.revoked = true;
        drop(registry);
        warn!(token_id = %claims.token_id, "revoked token");
        self.audit.record(AuditEvent {
            kind: AuditEventKind::TokenRevoke,
            identity_id: Some(claims.subject.clone()),
            resource: None,
            action: None,
            success: true,
            timestamp_ms: self.clock.now_ms(),
            details: None,
        });
        Ok(())
    }

    /// Revoke every token issued to `identity_id`, e.g. on identity
    /// deletion.
    pub fn revoke_all_for_subject(&self, identity_id: &str) {
        let mut registry = self.registry.lock().unwrap_or_else(|e| e.into_inner());
        for entry in registry.values_mut() {
            if entry.identity_id == identity_id {
                entry.revoked = true;
            }
        }
    }

    /// Verify signature only; returns claims regardless of expiry or
    /// revocation, for inspecting a token's content without asserting
    /// it is currently usable.
    pub fn introspect(&self, token: &str) -> Result<TokenClaims, AuthError> {
        self.verify_signature(token)
    }
}
