//! The happy handshake path and a version-mismatch rejection.

use polycall_protocol::handshake::{encode_capabilities, encode_params, Hello, MAGIC, VERSION};
use polycall_protocol::testing::ManualClock;
use polycall_protocol::{
    Capabilities, HandshakeConfig, HandshakeEngine, HandshakeError, HandshakeStage, RetryPolicy, SecurityLevel,
};

fn caps(level: SecurityLevel, compression: bool, max: u32, hb: u16) -> Capabilities {
    Capabilities {
        security_level: level,
        compression,
        encryption: false,
        streaming: true,
        fragmentation: false,
        max_message_size: max,
        heartbeat_interval: hb,
    }
}

#[test]
fn happy_path_both_sides_negotiate_the_same_element_wise_minimum_params() {
    let clock = ManualClock::new();
    let a = HandshakeEngine::new(caps(SecurityLevel::High, true, 65536, 20_000), HandshakeConfig::default(), clock.clone());
    let b = HandshakeEngine::new(caps(SecurityLevel::Medium, false, 16384, 30_000), HandshakeConfig::default(), clock.clone());

    let hello_a = a.send_hello(100).unwrap();
    b.on_hello(&hello_a.encode()).unwrap();
    let hello_b = b.send_hello(100).unwrap();
    a.on_hello(&hello_b.encode()).unwrap();

    let caps_a = a.send_capabilities().unwrap();
    let negotiated_b = b.on_capabilities(&encode_capabilities(&caps_a)).unwrap();
    let caps_b = b.send_capabilities().unwrap();
    let negotiated_a = a.on_capabilities(&encode_capabilities(&caps_b)).unwrap();

    assert_eq!(negotiated_a, negotiated_b);
    assert_eq!(negotiated_a.security_level, SecurityLevel::Medium);
    assert!(!negotiated_a.compression);
    assert_eq!(negotiated_a.max_message_size, 16384);
    assert_eq!(negotiated_a.heartbeat_interval, 20_000);

    let params_a = a.send_params().unwrap();
    b.on_params(&encode_params(&params_a)).unwrap();
    let params_b = b.send_params().unwrap();
    a.on_params(&encode_params(&params_b)).unwrap();

    assert_eq!(a.stage(), HandshakeStage::Complete);
    assert_eq!(b.stage(), HandshakeStage::Complete);
}

#[test]
fn a_peer_declaring_an_unsupported_protocol_version_is_rejected_before_negotiation() {
    let clock = ManualClock::new();
    let engine = HandshakeEngine::new(
        caps(SecurityLevel::None, false, 100, 100),
        HandshakeConfig::default(),
        clock,
    );

    let mut bytes = Hello {
        session_id: 1,
        secure: false,
        compression: false,
        streaming: false,
        fragmentation: false,
    }
    .encode();
    assert_eq!(&bytes[0..4], &MAGIC.to_le_bytes());
    assert_eq!(bytes[4], VERSION);
    bytes[4] = VERSION + 1;

    let err = engine.on_hello(&bytes).unwrap_err();
    assert_eq!(err, HandshakeError::VersionMismatch);
    assert_eq!(engine.stage(), HandshakeStage::Failed);
}

#[test]
fn a_garbled_magic_number_is_rejected_outright() {
    let clock = ManualClock::new();
    let engine = HandshakeEngine::new(
        caps(SecurityLevel::None, false, 100, 100),
        HandshakeConfig::default(),
        clock,
    );
    let mut bytes = Hello {
        session_id: 1,
        secure: false,
        compression: false,
        streaming: false,
        fragmentation: false,
    }
    .encode();
    bytes[0] ^= 0xFF;
    assert_eq!(engine.on_hello(&bytes).unwrap_err(), HandshakeError::InvalidMagic);
}

#[test]
fn a_stage_that_never_hears_back_exhausts_its_retry_budget_and_fails() {
    let clock = ManualClock::new();
    let config = HandshakeConfig {
        stage_timeout_ms: 200,
        retry_count: 1,
        retry_interval_ms: 0,
        retry_policy: RetryPolicy::None,
        min_security_level: SecurityLevel::None,
    };
    let engine = HandshakeEngine::new(caps(SecurityLevel::None, false, 100, 100), config, clock.clone());
    engine.send_hello(1).unwrap();

    clock.advance(std::time::Duration::from_millis(200));
    assert!(engine.check_timeout().unwrap());
    clock.advance(std::time::Duration::from_millis(200));
    assert_eq!(engine.check_timeout().unwrap_err(), HandshakeError::MaxRetries);
    assert_eq!(engine.stage(), HandshakeStage::Failed);
}
