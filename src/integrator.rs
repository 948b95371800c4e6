//! Wires the authentication middleware into a [`ProtocolContext`]'s
//! dispatch chain, and offers the same check to external command
//! dispatchers that don't go through the protocol context at all.

use polycall_auth::{AuthError, Decision, IdentityRegistry, PolicyEngine, TokenService};
use polycall_protocol::{Message, MessageKind, Middleware, MiddlewareDecision, ProtocolContext, ProtocolError};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::debug;

fn auth_err_to_protocol(err: AuthError) -> ProtocolError {
    match err {
        AuthError::InvalidToken(msg) => ProtocolError::InvalidToken(msg),
        AuthError::AccessDenied(msg) => ProtocolError::AccessDenied(msg),
        AuthError::NotFound(msg) => ProtocolError::AccessDenied(msg),
        AuthError::InvalidConfiguration(msg) => ProtocolError::Internal(msg),
        AuthError::InvalidArgument(msg) => ProtocolError::InvalidArgument(msg),
    }
}

/// The four zero-trust gates a deployment may name in its configuration
/// surface. Each defaults to enabled and the floor may only be tightened,
/// never relaxed: [`IntegratorConfig::validate`] rejects any attempt to
/// turn one off.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IntegratorConfig {
    pub enable_token_validation: bool,
    pub enable_access_control: bool,
    pub enable_audit_logging: bool,
    pub enable_credential_hashing: bool,
}

impl Default for IntegratorConfig {
    fn default() -> Self {
        IntegratorConfig {
            enable_token_validation: true,
            enable_access_control: true,
            enable_audit_logging: true,
            enable_credential_hashing: true,
        }
    }
}

impl IntegratorConfig {
    pub fn validate(&self) -> Result<(), AuthError> {
        if !self.enable_token_validation
            || !self.enable_access_control
            || !self.enable_audit_logging
            || !self.enable_credential_hashing
        {
            return Err(AuthError::InvalidConfiguration(
                "zero-trust gates default to enabled and cannot be relaxed".to_owned(),
            ));
        }
        Ok(())
    }
}

/// Zero-trust enforcement point: every non-`auth.*` message must carry a
/// valid token whose identity passes a policy check for the message's
/// `(resource, action)` pair. `auth.*` kinds (login, token.refresh,
/// token.validate, token.revoke) are exempt — they are how a caller gets a
/// token in the first place — and are routed straight to the token
/// service's own handlers instead.
pub struct Integrator {
    pub tokens: Arc<TokenService>,
    pub identities: Arc<IdentityRegistry>,
    pub policy: Arc<PolicyEngine>,
    config: IntegratorConfig,
    /// Identities resolved for messages that passed the middleware check,
    /// keyed by correlation id, so a handler dispatched after `check` can
    /// look up who the caller is without re-validating the token itself.
    resolved_identities: Mutex<HashMap<u64, String>>,
}

impl Integrator {
    pub fn new(tokens: Arc<TokenService>, identities: Arc<IdentityRegistry>, policy: Arc<PolicyEngine>) -> Self {
        Integrator {
            tokens,
            identities,
            policy,
            config: IntegratorConfig::default(),
            resolved_identities: Mutex::new(HashMap::new()),
        }
    }

    /// Construct with an explicit [`IntegratorConfig`], rejecting one that
    /// relaxes a zero-trust gate below its enabled-by-default floor.
    pub fn with_config(
        tokens: Arc<TokenService>,
        identities: Arc<IdentityRegistry>,
        policy: Arc<PolicyEngine>,
        config: IntegratorConfig,
    ) -> Result<Self, AuthError> {
        config.validate()?;
        Ok(Integrator {
            tokens,
            identities,
            policy,
            config,
            resolved_identities: Mutex::new(HashMap::new()),
        })
    }

    pub fn config(&self) -> IntegratorConfig {
        self.config
    }

    /// The identity resolved for a message carrying this correlation id,
    /// if the middleware allowed it through. `None` for exempt kinds
    /// (there is nothing to resolve yet) and for messages with no
    /// correlation id.
    pub fn resolved_identity(&self, correlation_id: u64) -> Option<String> {
        self.resolved_identities
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&correlation_id)
            .cloned()
    }

    fn authorize(&self, message: &Message) -> Result<String, ProtocolError> {
        let token = message
            .auth_token
            .as_deref()
            .ok_or_else(|| ProtocolError::InvalidToken("no token presented".to_owned()))?;
        let claims = self.tokens.validate(token).map_err(auth_err_to_protocol)?;

        let resource = message
            .resource
            .as_deref()
            .ok_or_else(|| ProtocolError::AccessDenied("message carries no resource".to_owned()))?;
        let action = message
            .action
            .as_deref()
            .ok_or_else(|| ProtocolError::AccessDenied("message carries no action".to_owned()))?;

        let roles = self
            .identities
            .roles_of(&claims.subject)
            .map_err(auth_err_to_protocol)?;
        // The message envelope carries no generic context blob, so
        // conditioned statements never match through this path; see
        // DESIGN.md's Integrator scope decision.
        match self.policy.check(&claims.subject, &roles, resource, action, "") {
            Decision::Allow => Ok(claims.subject),
            Decision::Deny => Err(ProtocolError::AccessDenied(format!(
                "{resource}:{action} denied for {}",
                claims.subject
            ))),
        }
    }

    /// The symmetric hook for external command dispatchers (micro, edge)
    /// that never pass through a [`ProtocolContext`] at all: the resource
    /// string is synthesized as `<dispatcher>:<command>` and the action is
    /// always `execute`.
    pub fn check_command(&self, dispatcher: &str, command: &str, token: &str) -> Result<String, ProtocolError> {
        let claims = self.tokens.validate(token).map_err(auth_err_to_protocol)?;
        let roles = self
            .identities
            .roles_of(&claims.subject)
            .map_err(auth_err_to_protocol)?;
        let resource = format!("{dispatcher}:{command}");
        match self.policy.check(&claims.subject, &roles, &resource, "execute", "") {
            Decision::Allow => Ok(claims.subject),
            Decision::Deny => Err(ProtocolError::AccessDenied(format!("{resource}:execute denied"))),
        }
    }
}

impl Middleware for Integrator {
    fn name(&self) -> &'static str {
        "zero-trust-auth"
    }

    fn check(&self, _ctx: &ProtocolContext, message: &Message) -> MiddlewareDecision {
        if message.kind.is_auth_exempt() {
            return MiddlewareDecision::Allow;
        }
        match self.authorize(message) {
            Ok(identity_id) => {
                if let Some(cid) = message.correlation_id {
                    self.resolved_identities
                        .lock()
                        .unwrap_or_else(|e| e.into_inner())
                        .insert(cid, identity_id);
                }
                MiddlewareDecision::Allow
            }
            Err(err) => {
                debug!(kind = %message.kind, error = %err, "integrator denied message");
                MiddlewareDecision::Deny(err.to_string())
            }
        }
    }
}

pub const LOGIN: &str = "auth.login";
pub const TOKEN_REFRESH: &str = "auth.token.refresh";
pub const TOKEN_VALIDATE: &str = "auth.token.validate";
pub const TOKEN_REVOKE: &str = "auth.token.revoke";

/// Register the built-in `auth.*` handlers (login, refresh, validate,
/// revoke) on a [`ProtocolContext`], delegating to the token service and
/// identity registry the integrator was built with.
pub fn register_auth_handlers(ctx: &ProtocolContext, integrator: Arc<Integrator>) {
    let login_integrator = integrator.clone();
    ctx.register_handler(
        MessageKind::new(LOGIN).as_str().to_owned(),
        Box::new(move |_ctx, request| {
            #[derive(serde::Deserialize)]
            struct LoginRequest {
                identity_id: String,
                credential: String,
            }
            #[derive(serde::Serialize)]
            struct LoginResponse {
                access_token: String,
                refresh_token: String,
            }

            let payload: LoginRequest = serde_json::from_slice(&request.payload)
                .map_err(|e| ProtocolError::InvalidArgument(format!("malformed login payload: {e}")))?;
            let Some(identity) = login_integrator.identities.get(&payload.identity_id) else {
                login_integrator.identities.record_login(
                    Some(&payload.identity_id),
                    false,
                    Some("unknown identity".to_owned()),
                );
                return Err(ProtocolError::InvalidToken("unknown identity".to_owned()));
            };
            if !polycall_auth::verify_credential(&payload.credential, &identity.credential_reference) {
                login_integrator.identities.record_login(
                    Some(&identity.id),
                    false,
                    Some("credential mismatch".to_owned()),
                );
                return Err(ProtocolError::InvalidToken("credential mismatch".to_owned()));
            }
            login_integrator.identities.record_login(Some(&identity.id), true, None);

            let access = login_integrator
                .tokens
                .issue(&identity.id, polycall_auth::TokenKind::Access, None, None)
                .map_err(auth_err_to_protocol)?;
            let refresh = login_integrator
                .tokens
                .issue(&identity.id, polycall_auth::TokenKind::Refresh, None, None)
                .map_err(auth_err_to_protocol)?;

            let body = serde_json::to_vec(&LoginResponse {
                access_token: access,
                refresh_token: refresh,
            })
            .map_err(|e| ProtocolError::Internal(e.to_string()))?;
            Ok(Message::new(MessageKind::RESPONSE, body)
                .with_correlation_id(request.correlation_id.unwrap_or(0)))
        }),
    );

    let refresh_integrator = integrator.clone();
    ctx.register_handler(
        MessageKind::new(TOKEN_REFRESH).as_str().to_owned(),
        Box::new(move |_ctx, request| {
            #[derive(serde::Deserialize)]
            struct RefreshRequest {
                refresh_token: String,
            }
            #[derive(serde::Serialize)]
            struct RefreshResponse {
                access_token: String,
            }
            let payload: RefreshRequest = serde_json::from_slice(&request.payload)
                .map_err(|e| ProtocolError::InvalidArgument(format!("malformed refresh payload: {e}")))?;
            let access = refresh_integrator
                .tokens
                .refresh(&payload.refresh_token)
                .map_err(auth_err_to_protocol)?;
            let body = serde_json::to_vec(&RefreshResponse { access_token: access })
                .map_err(|e| ProtocolError::Internal(e.to_string()))?;
            Ok(Message::new(MessageKind::RESPONSE, body)
                .with_correlation_id(request.correlation_id.unwrap_or(0)))
        }),
    );

    let validate_integrator = integrator.clone();
    ctx.register_handler(
        MessageKind::new(TOKEN_VALIDATE).as_str().to_owned(),
        Box::new(move |_ctx, request| {
            #[derive(serde::Deserialize)]
            struct ValidateRequest {
                token: String,
            }
            #[derive(serde::Serialize)]
            struct ValidateResponse {
                valid: bool,
                subject: Option<String>,
            }
            let payload: ValidateRequest = serde_json::from_slice(&request.payload)
                .map_err(|e| ProtocolError::InvalidArgument(format!("malformed validate payload: {e}")))?;
            let response = match validate_integrator.tokens.validate(&payload.token) {
                Ok(claims) => ValidateResponse {
                    valid: true,
                    subject: Some(claims.subject),
                },
                Err(_) => ValidateResponse {
                    valid: false,
                    subject: None,
                },
            };
            let body = serde_json::to_vec(&response).map_err(|e| ProtocolError::Internal(e.to_string()))?;
            Ok(Message::new(MessageKind::RESPONSE, body)
                .with_correlation_id(request.correlation_id.unwrap_or(0)))
        }),
    );

    let revoke_integrator = integrator;
    ctx.register_handler(
        MessageKind::new(TOKEN_REVOKE).as_str().to_owned(),
        Box::new(move |_ctx, request| {
            #[derive(serde::Deserialize)]
            struct RevokeRequest {
                token: String,
            }
            let payload: RevokeRequest = serde_json::from_slice(&request.payload)
                .map_err(|e| ProtocolError::InvalidArgument(format!("malformed revoke payload: {e}")))?;
            revoke_integrator
                .tokens
                .revoke(&payload.token)
                .map_err(auth_err_to_protocol)?;
            Ok(Message::new(MessageKind::RESPONSE, Vec::new())
                .with_correlation_id(request.correlation_id.unwrap_or(0)))
        }),
    );
}
