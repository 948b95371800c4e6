//! End-to-end: a [`polycall::Session`] carries its handshake through to
//! `ready`, then a login exchange through the integrator's `auth.login`
//! handler moves it to `authenticated`, and a policy-gated request is
//! allowed or denied according to the resolved identity's roles.

use polycall::auth::{
    AuditLog, Effect, Identity, IdentityRegistry, InMemoryAuditLog, Policy, PolicyEngine, SigningAlgorithm,
    Statement, SystemClock as AuthSystemClock, TokenConfig, TokenService,
};
use polycall::protocol::testing::{Clock, SystemClock};
use polycall::protocol::{
    Capabilities, Codec, HandshakeConfig, InMemoryTransport, JsonCodec, Message, MessageKind, SecurityLevel,
};
use polycall::{Integrator, Session};
use std::sync::Arc;

fn caps() -> Capabilities {
    Capabilities {
        security_level: SecurityLevel::Medium,
        compression: false,
        encryption: false,
        streaming: true,
        fragmentation: false,
        max_message_size: 65536,
        heartbeat_interval: 30_000,
    }
}

fn integrator_with_alice() -> Arc<Integrator> {
    let clock = Arc::new(AuthSystemClock::new());
    let audit: Arc<dyn AuditLog> = Arc::new(InMemoryAuditLog::new(1024, 0, clock.clone()));
    let tokens = Arc::new(TokenService::new(
        TokenConfig::new(b"0123456789abcdef".to_vec(), SigningAlgorithm::Hs256).unwrap(),
        clock.clone(),
        audit.clone(),
    ));
    let identities = Arc::new(IdentityRegistry::new(audit.clone(), clock.clone()));
    let policy = Arc::new(PolicyEngine::new(audit, clock));

    policy.add_policy(Policy {
        name: "allow-ping".to_owned(),
        description: String::new(),
        statements: vec![Statement {
            effect: Effect::Allow,
            actions: ["execute".to_owned()].into_iter().collect(),
            resources: ["svc:ping".to_owned()].into_iter().collect(),
            condition: None,
        }],
    });
    policy.add_role("caller", "");
    policy.attach_policy("caller", "allow-ping").unwrap();

    let mut alice = Identity::new("alice", polycall::auth::hash_credential("s3cret"), 0);
    alice.roles.insert("caller".to_owned());
    identities.insert(alice);

    Arc::new(Integrator::new(tokens, identities, policy))
}

fn session(transport: InMemoryTransport, integrator: Arc<Integrator>) -> Session {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock::new());
    Session::new(
        Arc::new(transport),
        Box::new(JsonCodec),
        caps(),
        HandshakeConfig::default(),
        clock,
        integrator,
        false,
    )
}

fn login_frame(identity_id: &str, credential: &str, correlation_id: u64) -> Vec<u8> {
    let codec = JsonCodec;
    let payload = serde_json::to_vec(&serde_json::json!({
        "identity_id": identity_id,
        "credential": credential,
    }))
    .unwrap();
    codec
        .encode(&Message::new(polycall::LOGIN, payload).with_correlation_id(correlation_id))
        .unwrap()
}

#[test]
fn a_session_reaches_authenticated_and_then_a_permitted_request_is_allowed() {
    let (client_transport, server_transport) = InMemoryTransport::pair();
    let client = Arc::new(session(client_transport, integrator_with_alice()));
    let server = Arc::new(session(server_transport, integrator_with_alice()));

    let c = client.clone();
    let handle = std::thread::spawn(move || c.perform_handshake(1).unwrap());
    server.perform_handshake(1).unwrap();
    handle.join().unwrap();
    assert_eq!(client.state(), "ready");
    assert_eq!(server.state(), "ready");

    let frame = login_frame("alice", "s3cret", 1);
    let response = server.dispatch_inbound(&frame).unwrap().unwrap();
    assert_eq!(response.kind.as_str(), MessageKind::RESPONSE);
    let body: serde_json::Value = serde_json::from_slice(&response.payload).unwrap();
    let access_token = body["access_token"].as_str().unwrap().to_owned();
    assert!(!access_token.is_empty());

    server.mark_authenticated().unwrap();
    assert_eq!(server.state(), "authenticated");

    let codec = JsonCodec;
    let ping_frame = codec
        .encode(
            &Message::new("request", Vec::new())
                .with_correlation_id(2)
                .with_token(access_token.clone())
                .with_resource_action("svc:ping", "execute"),
        )
        .unwrap();
    server.context.register_handler(
        "request".to_owned(),
        Box::new(|_ctx, req| {
            Ok(Message::new("response", b"pong".to_vec()).with_correlation_id(req.correlation_id.unwrap_or(0)))
        }),
    );
    let ping_response = server.dispatch_inbound(&ping_frame).unwrap().unwrap();
    assert_eq!(ping_response.kind.as_str(), MessageKind::RESPONSE);
    assert_eq!(ping_response.payload, b"pong");
    assert_eq!(server.integrator.resolved_identity(2), Some("alice".to_owned()));

    let denied_frame = codec
        .encode(
            &Message::new("request", Vec::new())
                .with_correlation_id(3)
                .with_token(access_token)
                .with_resource_action("svc:shutdown", "execute"),
        )
        .unwrap();
    let denied_response = server.dispatch_inbound(&denied_frame).unwrap().unwrap();
    assert_eq!(denied_response.kind.as_str(), MessageKind::ERROR);
}

#[test]
fn check_command_gates_a_dispatcher_that_never_touches_the_protocol_context() {
    let (transport, _peer) = InMemoryTransport::pair();
    let integrator = integrator_with_alice();
    let server = session(transport, integrator.clone());

    let frame = login_frame("alice", "s3cret", 1);
    let response = server.dispatch_inbound(&frame).unwrap().unwrap();
    let body: serde_json::Value = serde_json::from_slice(&response.payload).unwrap();
    let token = body["access_token"].as_str().unwrap();

    assert_eq!(server.check_command("svc", "ping", token).unwrap(), "alice");
    assert!(server.check_command("svc", "shutdown", token).is_err());
}
