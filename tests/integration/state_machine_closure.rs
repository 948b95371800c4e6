//! The session-level state machine lifecycle: `handshake -> ready ->
//! authenticated`, fault collapse to `error`, and `closed`/`error` as
//! terminal states with no legal exits beyond `close` (and `recover`, if
//! enabled).

use polycall_protocol::{ProtocolError, StateMachine, TransitionOutcome};

fn session_machine(recovery_enabled: bool) -> StateMachine {
    let mut sm = StateMachine::new("handshake", recovery_enabled);
    sm.add_transition("handshake", "complete", "ready", None, None);
    sm.add_transition("handshake", "fault", "error", None, None);
    sm.add_transition("ready", "authenticate", "authenticated", None, None);
    sm.add_transition("ready", "fault", "error", None, None);
    sm.add_transition("ready", "close", "closed", None, None);
    sm.add_transition("authenticated", "fault", "error", None, None);
    sm.add_transition("authenticated", "close", "closed", None, None);
    sm.add_transition("error", "close", "closed", None, None);
    if recovery_enabled {
        sm.add_transition("error", "recover", "ready", None, None);
    }
    sm
}

#[test]
fn the_full_happy_lifecycle_moves_through_every_named_state_in_order() {
    let sm = session_machine(false);
    assert_eq!(sm.current(), "handshake");
    assert_eq!(sm.fire("complete").unwrap(), TransitionOutcome::Applied);
    assert_eq!(sm.current(), "ready");
    assert_eq!(sm.fire("authenticate").unwrap(), TransitionOutcome::Applied);
    assert_eq!(sm.current(), "authenticated");
    assert_eq!(sm.fire("close").unwrap(), TransitionOutcome::Applied);
    assert_eq!(sm.current(), "closed");
}

#[test]
fn a_fault_from_any_non_terminal_state_collapses_to_error() {
    for start_event in ["complete", "complete,authenticate"] {
        let sm = session_machine(false);
        for event in start_event.split(',') {
            sm.fire(event).unwrap();
        }
        assert_eq!(sm.fire("fault").unwrap(), TransitionOutcome::Applied);
        assert_eq!(sm.current(), "error");
    }
}

#[test]
fn closed_has_no_legal_exits_at_all() {
    let sm = session_machine(false);
    sm.fire("complete").unwrap();
    sm.fire("close").unwrap();
    assert_eq!(sm.current(), "closed");
    assert!(matches!(sm.fire("complete"), Err(ProtocolError::ProtocolViolation(_))));
    assert!(matches!(sm.fire("authenticate"), Err(ProtocolError::ProtocolViolation(_))));
}

#[test]
fn error_permits_only_close_unless_recovery_was_enabled_at_construction() {
    let sm = session_machine(false);
    sm.fire("fault").unwrap();
    assert_eq!(sm.current(), "error");
    assert!(matches!(sm.fire("recover"), Err(ProtocolError::ProtocolViolation(_))));
    assert_eq!(sm.fire("close").unwrap(), TransitionOutcome::Applied);
    assert_eq!(sm.current(), "closed");
}

#[test]
fn recovery_enabled_sessions_may_return_to_ready_from_error() {
    let sm = session_machine(true);
    sm.fire("fault").unwrap();
    assert_eq!(sm.fire("recover").unwrap(), TransitionOutcome::Applied);
    assert_eq!(sm.current(), "ready");
    // still only reachable from error, not from handshake or authenticated
    sm.fire("authenticate").unwrap();
    assert!(matches!(sm.fire("recover"), Err(ProtocolError::ProtocolViolation(_))));
}

#[test]
fn an_unregistered_event_for_the_current_state_is_a_protocol_violation_and_leaves_state_unchanged() {
    let sm = session_machine(false);
    let err = sm.fire("authenticate").unwrap_err();
    assert!(matches!(err, ProtocolError::ProtocolViolation(_)));
    assert_eq!(sm.current(), "handshake");
}
