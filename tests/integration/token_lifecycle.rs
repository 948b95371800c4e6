//! Token issue/validate/refresh/revoke and the expiry/tamper properties,
//! driven against the public `polycall-auth` surface rather than its
//! internal test module.

use polycall_auth::{AuthError, Clock, InMemoryAuditLog, SigningAlgorithm, TokenConfig, TokenKind, TokenService};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

struct ManualClock(AtomicU64);

impl ManualClock {
    fn new() -> Arc<Self> {
        Arc::new(ManualClock(AtomicU64::new(1_000)))
    }
    fn advance(&self, ms: u64) {
        self.0.fetch_add(ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.0.load(Ordering::SeqCst)
    }
}

fn service(clock: Arc<ManualClock>) -> TokenService {
    let config = TokenConfig::new(b"integration-test-secret!".to_vec(), SigningAlgorithm::Hs256).unwrap();
    let audit = Arc::new(InMemoryAuditLog::new(256, 0, clock.clone()));
    TokenService::new(config, clock, audit)
}

#[test]
fn issue_validate_refresh_revoke_moves_through_every_worked_example_step() {
    let clock = ManualClock::new();
    let svc = service(clock.clone());

    let access = svc.issue("alice", TokenKind::Access, Some(vec!["read".to_owned()]), None).unwrap();
    let refresh = svc.issue("alice", TokenKind::Refresh, None, None).unwrap();

    let claims = svc.validate(&access).unwrap();
    assert_eq!(claims.subject, "alice");
    assert_eq!(claims.scopes.as_deref(), Some(["read".to_owned()].as_slice()));

    clock.advance(3_601_000);
    assert!(matches!(svc.validate(&access).unwrap_err(), AuthError::InvalidToken(_)));

    let reissued = svc.refresh(&refresh).unwrap();
    assert_ne!(reissued, access);
    assert_eq!(svc.validate(&reissued).unwrap().subject, "alice");

    svc.revoke(&reissued).unwrap();
    assert!(matches!(svc.validate(&reissued).unwrap_err(), AuthError::InvalidToken(_)));
    // the refresh token itself is untouched by revoking the derived access token
    assert!(svc.validate(&refresh).is_ok());
}

#[test]
fn a_refresh_kind_token_cannot_be_used_as_an_access_token_and_vice_versa() {
    let clock = ManualClock::new();
    let svc = service(clock);
    let access = svc.issue("bob", TokenKind::Access, None, None).unwrap();
    assert!(matches!(svc.refresh(&access).unwrap_err(), AuthError::InvalidToken(_)));
}

#[test]
fn revoking_all_tokens_for_a_subject_leaves_other_subjects_untouched() {
    let clock = ManualClock::new();
    let svc = service(clock);
    let alice_token = svc.issue("alice", TokenKind::Access, None, None).unwrap();
    let bob_token = svc.issue("bob", TokenKind::Access, None, None).unwrap();

    svc.revoke_all_for_subject("alice");

    assert!(svc.validate(&alice_token).is_err());
    assert!(svc.validate(&bob_token).is_ok());
}

#[test]
fn introspect_reads_claims_from_an_expired_or_revoked_token_without_asserting_usability() {
    let clock = ManualClock::new();
    let svc = service(clock.clone());
    let token = svc.issue("carol", TokenKind::ApiKey, None, None).unwrap();
    svc.revoke(&token).unwrap();

    let claims = svc.introspect(&token).unwrap();
    assert_eq!(claims.subject, "carol");
    assert_eq!(claims.kind, TokenKind::ApiKey);
    assert!(svc.validate(&token).is_err());
}

#[test]
fn an_access_token_ttl_configured_over_one_hour_is_capped_at_one_hour() {
    let config = TokenConfig::new(b"integration-test-secret!".to_vec(), SigningAlgorithm::Hs256)
        .unwrap()
        .with_access_ttl_ms(10 * 3_600_000);
    let clock = ManualClock::new();
    let audit = Arc::new(InMemoryAuditLog::new(16, 0, clock.clone()));
    let svc = TokenService::new(config, clock.clone(), audit);

    let token = svc.issue("dave", TokenKind::Access, None, None).unwrap();
    clock.advance(3_600_001);
    assert!(matches!(svc.validate(&token).unwrap_err(), AuthError::InvalidToken(_)));
}
