//! Policy deny-wins and glob/condition-matching properties, driven
//! against the public `polycall-auth` surface.

use polycall_auth::{AuthError, Clock, Decision, Effect, InMemoryAuditLog, Policy, PolicyEngine, Statement};
use std::collections::HashSet;
use std::sync::Arc;

struct ZeroClock;
impl Clock for ZeroClock {
    fn now_ms(&self) -> u64 {
        0
    }
}

fn engine() -> PolicyEngine {
    PolicyEngine::new(
        Arc::new(InMemoryAuditLog::new(1024, 0, Arc::new(ZeroClock))),
        Arc::new(ZeroClock),
    )
}

fn allow(action: &str, resource: &str) -> Statement {
    Statement {
        effect: Effect::Allow,
        actions: [action.to_owned()].into_iter().collect(),
        resources: [resource.to_owned()].into_iter().collect(),
        condition: None,
    }
}

fn deny(action: &str, resource: &str) -> Statement {
    Statement {
        effect: Effect::Deny,
        actions: [action.to_owned()].into_iter().collect(),
        resources: [resource.to_owned()].into_iter().collect(),
        condition: None,
    }
}

fn role_set(names: &[&str]) -> HashSet<String> {
    names.iter().map(|s| (*s).to_owned()).collect()
}

#[test]
fn a_single_deny_statement_beats_any_number_of_overlapping_allow_statements() {
    let engine = engine();
    engine.add_policy(Policy {
        name: "broad-allow".to_owned(),
        description: String::new(),
        statements: vec![allow("invoke", "dispatcher:*")],
    });
    engine.add_policy(Policy {
        name: "narrow-deny".to_owned(),
        description: String::new(),
        statements: vec![deny("invoke", "dispatcher:billing")],
    });
    engine.add_role("caller", "");
    engine.attach_policy("caller", "broad-allow").unwrap();
    engine.attach_policy("caller", "narrow-deny").unwrap();

    let roles = role_set(&["caller"]);
    assert_eq!(
        engine.check("svc", &roles, "dispatcher:billing", "invoke", ""),
        Decision::Deny
    );
    assert_eq!(
        engine.check("svc", &roles, "dispatcher:inventory", "invoke", ""),
        Decision::Allow
    );
}

#[test]
fn default_is_deny_for_an_identity_holding_no_roles_at_all() {
    let engine = engine();
    assert_eq!(
        engine.check("nobody", &HashSet::new(), "dispatcher:x", "invoke", ""),
        Decision::Deny
    );
}

#[test]
fn a_role_referencing_a_detached_policy_no_longer_grants_access() {
    let engine = engine();
    engine.add_policy(Policy {
        name: "p".to_owned(),
        description: String::new(),
        statements: vec![allow("invoke", "dispatcher:x")],
    });
    engine.add_role("r", "");
    engine.attach_policy("r", "p").unwrap();
    let roles = role_set(&["r"]);
    assert_eq!(engine.check("svc", &roles, "dispatcher:x", "invoke", ""), Decision::Allow);

    engine.detach_policy("r", "p").unwrap();
    assert_eq!(engine.check("svc", &roles, "dispatcher:x", "invoke", ""), Decision::Deny);
}

#[test]
fn an_empty_action_string_is_matched_literally_like_any_other_action() {
    let engine = engine();
    engine.add_policy(Policy {
        name: "p".to_owned(),
        description: String::new(),
        statements: vec![allow("", "dispatcher:x")],
    });
    engine.add_role("r", "");
    engine.attach_policy("r", "p").unwrap();
    let roles = role_set(&["r"]);

    assert_eq!(engine.check("svc", &roles, "dispatcher:x", "", ""), Decision::Allow);
    assert_eq!(
        engine.check("svc", &roles, "dispatcher:x", "invoke", ""),
        Decision::Deny
    );
}

#[test]
fn attach_policy_on_an_unknown_role_is_a_not_found_error() {
    let engine = engine();
    engine.add_policy(Policy {
        name: "p".to_owned(),
        description: String::new(),
        statements: vec![],
    });
    assert!(matches!(
        engine.attach_policy("ghost", "p"),
        Err(AuthError::NotFound(_))
    ));
}

#[test]
fn removing_a_role_drops_every_grant_it_carried() {
    let engine = engine();
    engine.add_policy(Policy {
        name: "p".to_owned(),
        description: String::new(),
        statements: vec![allow("invoke", "dispatcher:x")],
    });
    engine.add_role("r", "");
    engine.attach_policy("r", "p").unwrap();
    let roles = role_set(&["r"]);
    assert_eq!(engine.check("svc", &roles, "dispatcher:x", "invoke", ""), Decision::Allow);

    engine.remove_role("r");
    // the caller's cached role set still names "r", but the engine no
    // longer knows about it, so nothing matches and the default deny wins.
    assert_eq!(engine.check("svc", &roles, "dispatcher:x", "invoke", ""), Decision::Deny);
}
