//! Roles, policies, and the allow/deny decision for (identity, resource,
//! action).

use crate::audit::{AuditEvent, AuditEventKind, AuditLog, Clock};
use crate::error::AuthError;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    Allow,
    Deny,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Statement {
    pub effect: Effect,
    pub actions: HashSet<String>,
    pub resources: HashSet<String>,
    /// Minimum required semantics: substring containment of this string in
    /// the evaluation context blob.
    pub condition: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Policy {
    pub name: String,
    pub description: String,
    pub statements: Vec<Statement>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Role {
    pub name: String,
    pub description: String,
    pub policies: HashSet<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Deny,
}

fn pattern_matches(pattern: &str, value: &str) -> bool {
    if pattern == "*" {
        return true;
    }
    if let Some(prefix) = pattern.strip_suffix('*') {
        return value.starts_with(prefix);
    }
    pattern == value
}

struct Store {
    roles: HashMap<String, Role>,
    policies: HashMap<String, Policy>,
}

/// Evaluates (identity, resource, action) against attached roles and
/// policies, default-deny, deny-overrides-allow.
pub struct PolicyEngine {
    store: Mutex<Store>,
    audit: Arc<dyn AuditLog>,
    clock: Arc<dyn Clock>,
    /// Governs resource/action pairs no statement anywhere names: `true`
    /// (default) denies them like any other unmatched request, `false`
    /// passes them through as allowed.
    strict: bool,
}

impl PolicyEngine {
    pub fn new(audit: Arc<dyn AuditLog>, clock: Arc<dyn Clock>) -> Self {
        PolicyEngine {
            store: Mutex::new(Store {
                roles: HashMap::new(),
                policies: HashMap::new(),
            }),
            audit,
            clock,
            strict: true,
        }
    }

    #[must_use]
    pub fn with_strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    pub fn add_role(&self, name: impl Into<String>, description: impl Into<String>) {
        let mut store = self.store.lock().unwrap_or_else(|e| e.into_inner());
        let name = name.into();
        store.roles.insert(
            name.clone(),
            Role {
                name,
                description: description.into(),
                policies: HashSet::new(),
            },
        );
        self.audit.record(AuditEvent {
            kind: AuditEventKind::RoleAssign,
            identity_id: None,
            resource: None,
            action: None,
            success: true,
            timestamp_ms: self.clock.now_ms(),
            details: Some("role created".to_owned()),
        });
    }

    pub fn remove_role(&self, name: &str) {
        self.store.lock().unwrap_or_else(|e| e.into_inner()).roles.remove(name);
        self.audit.record(AuditEvent {
            kind: AuditEventKind::RoleRemove,
            identity_id: None,
            resource: None,
            action: None,
            success: true,
            timestamp_ms: self.clock.now_ms(),
            details: Some(name.to_owned()),
        });
    }

    pub fn add_policy(&self, policy: Policy) {
        let mut store = self.store.lock().unwrap_or_else(|e| e.into_inner());
        let is_update = store.policies.contains_key(&policy.name);
        store.policies.insert(policy.name.clone(), policy.clone());
        self.audit.record(AuditEvent {
            kind: if is_update {
                AuditEventKind::PolicyUpdate
            } else {
                AuditEventKind::PolicyCreate
            },
            identity_id: None,
            resource: None,
            action: None,
            success: true,
            timestamp_ms: self.clock.now_ms(),
            details: Some(policy.name),
        });
    }

    pub fn attach_policy(&self, role: &str, policy: &str) -> Result<(), AuthError> {
        let mut store = self.store.lock().unwrap_or_else(|e| e.into_inner());
        if !store.policies.contains_key(policy) {
            return Err(AuthError::NotFound(format!("policy {policy}")));
        }
        let role_entry = store
            .roles
            .get_mut(role)
            .ok_or_else(|| AuthError::NotFound(format!("role {role}")))?;
        role_entry.policies.insert(policy.to_owned());
        drop(store);
        self.audit.record(AuditEvent {
            kind: AuditEventKind::RoleAssign,
            identity_id: None,
            resource: None,
            action: Some(policy.to_owned()),
            success: true,
            timestamp_ms: self.clock.now_ms(),
            details: Some(format!("policy {policy} attached to role {role}")),
        });
        Ok(())
    }

    pub fn detach_policy(&self, role: &str, policy: &str) -> Result<(), AuthError> {
        let mut store = self.store.lock().unwrap_or_else(|e| e.into_inner());
        let role_entry = store
            .roles
            .get_mut(role)
            .ok_or_else(|| AuthError::NotFound(format!("role {role}")))?;
        role_entry.policies.remove(policy);
        drop(store);
        self.audit.record(AuditEvent {
            kind: AuditEventKind::RoleRemove,
            identity_id: None,
            resource: None,
            action: Some(policy.to_owned()),
            success: true,
            timestamp_ms: self.clock.now_ms(),
            details: Some(format!("policy {policy} detached from role {role}")),
        });
        Ok(())
    }

    /// All roles currently defined, for export/import.
    pub fn all_roles(&self) -> Vec<Role> {
        self.store.lock().unwrap_or_else(|e| e.into_inner()).roles.values().cloned().collect()
    }

    /// All policies currently defined, for export/import.
    pub fn all_policies(&self) -> Vec<Policy> {
        self.store
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .policies
            .values()
            .cloned()
            .collect()
    }

    /// `check(identity, resource, action, context) -> allow | deny`. Deny
    /// overrides allow across every statement evaluated; an identity with
    /// no roles, or roles with no matching statements, is denied.
    pub fn check(
        &self,
        identity_id: &str,
        roles: &HashSet<String>,
        resource: &str,
        action: &str,
        context: &str,
    ) -> Decision {
        let decision = self.evaluate(roles, resource, action, context);
        self.audit.record(AuditEvent {
            kind: if decision == Decision::Allow {
                AuditEventKind::AccessGranted
            } else {
                AuditEventKind::AccessDenied
            },
            identity_id: Some(identity_id.to_owned()),
            resource: Some(resource.to_owned()),
            action: Some(action.to_owned()),
            success: decision == Decision::Allow,
            timestamp_ms: self.clock.now_ms(),
            details: None,
        });
        decision
    }

    fn evaluate(&self, roles: &HashSet<String>, resource: &str, action: &str, context: &str) -> Decision {
        if roles.is_empty() {
            return Decision::Deny;
        }
        let store = self.store.lock().unwrap_or_else(|e| e.into_inner());

        let mut any_allow = false;
        let mut matched_anything = false;
        for role_name in roles {
            let Some(role) = store.roles.get(role_name) else {
                continue;
            };
            for policy_name in &role.policies {
                let Some(policy) = store.policies.get(policy_name) else {
                    continue;
                };
                for statement in &policy.statements {
                    let resource_matches = statement.resources.iter().any(|p| pattern_matches(p, resource));
                    let action_matches = statement.actions.iter().any(|p| pattern_matches(p, action));
                    if !resource_matches || !action_matches {
                        continue;
                    }
                    matched_anything = true;
                    if let Some(condition) = &statement.condition {
                        if !context.contains(condition.as_str()) {
                            continue;
                        }
                    }
                    match statement.effect {
                        Effect::Deny => return Decision::Deny,
                        Effect::Allow => any_allow = true,
                    }
                }
            }
        }
        if any_allow {
            Decision::Allow
        } else if matched_anything || self.strict {
            Decision::Deny
        } else {
            Decision::Allow
        }
    }
}
