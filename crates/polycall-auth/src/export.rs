//! Persisted-state export/import: the identity/role/policy JSON document
//! shape, serialized and deserialized purely in memory. No file or
//! transport I/O lives here — that belongs to the out-of-scope config/CLI
//! layer; callers decide where the bytes ultimately go.

use crate::identity::{Identity, IdentityRegistry};
use crate::policy::{Effect, Policy, PolicyEngine, Statement};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityExport {
    pub id: String,
    pub roles: Vec<String>,
    pub attributes: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoleExport {
    pub name: String,
    pub policies: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatementExport {
    pub effect: String,
    pub actions: Vec<String>,
    pub resources: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyExport {
    pub name: String,
    pub statements: Vec<StatementExport>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateExport {
    pub identities: Vec<IdentityExport>,
    pub roles: Vec<RoleExport>,
    pub policies: Vec<PolicyExport>,
}

fn identity_attributes(identity: &Identity) -> HashMap<String, String> {
    let mut attrs = HashMap::new();
    if let Some(device_id) = &identity.device.device_id {
        attrs.insert("device_id".to_owned(), device_id.clone());
    }
    if let Some(device_type) = &identity.device.device_type {
        attrs.insert("device_type".to_owned(), device_type.clone());
    }
    attrs
}

/// Snapshot an [`IdentityRegistry`] and [`PolicyEngine`] into the document
/// shape described by the configuration surface: `{identities, roles,
/// policies}`.
pub fn export_state(identities: &IdentityRegistry, policy: &PolicyEngine) -> StateExport {
    let identities = identities
        .all()
        .into_iter()
        .map(|identity| IdentityExport {
            id: identity.id.clone(),
            roles: identity.roles.iter().cloned().collect(),
            attributes: identity_attributes(&identity),
        })
        .collect();

    let roles = policy
        .all_roles()
        .into_iter()
        .map(|role| RoleExport {
            name: role.name,
            policies: role.policies.into_iter().collect(),
        })
        .collect();

    let policies = policy
        .all_policies()
        .into_iter()
        .map(|policy| PolicyExport {
            name: policy.name,
            statements: policy
                .statements
                .into_iter()
                .map(|statement| StatementExport {
                    effect: match statement.effect {
                        Effect::Allow => "allow".to_owned(),
                        Effect::Deny => "deny".to_owned(),
                    },
                    actions: statement.actions.into_iter().collect(),
                    resources: statement.resources.into_iter().collect(),
                    condition: statement.condition,
                })
                .collect(),
        })
        .collect();

    StateExport {
        identities,
        roles,
        policies,
    }
}

/// Error importing a [`StateExport`]: an unrecognized statement effect.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ImportError {
    #[error("unknown statement effect: {0}")]
    UnknownEffect(String),
}

/// Replay a [`StateExport`] into a fresh identity registry and policy
/// engine. Roles and policies are created before identities are assigned
/// roles, so every `roles` entry on an identity resolves.
pub fn import_state(
    export: &StateExport,
    identities: &IdentityRegistry,
    policy: &PolicyEngine,
    created_at_ms: u64,
) -> Result<(), ImportError> {
    for policy_export in &export.policies {
        let statements = policy_export
            .statements
            .iter()
            .map(|statement| {
                let effect = match statement.effect.as_str() {
                    "allow" => Effect::Allow,
                    "deny" => Effect::Deny,
                    other => return Err(ImportError::UnknownEffect(other.to_owned())),
                };
                Ok(Statement {
                    effect,
                    actions: statement.actions.iter().cloned().collect(),
                    resources: statement.resources.iter().cloned().collect(),
                    condition: statement.condition.clone(),
                })
            })
            .collect::<Result<Vec<Statement>, ImportError>>()?;
        policy.add_policy(Policy {
            name: policy_export.name.clone(),
            description: String::new(),
            statements,
        });
    }

    for role_export in &export.roles {
        policy.add_role(role_export.name.clone(), "");
        for policy_name in &role_export.policies {
            // An export produced by `export_state` always names an
            // existing policy; a hand-edited document that doesn't is a
            // caller error we surface by simply not attaching (the role
            // still exists, just without that policy).
            let _ = policy.attach_policy(&role_export.name, policy_name);
        }
    }

    for identity_export in &export.identities {
        let mut identity = Identity::new(identity_export.id.clone(), String::new(), created_at_ms);
        identity.roles = identity_export.roles.iter().cloned().collect::<HashSet<_>>();
        identity.device.device_id = identity_export.attributes.get("device_id").cloned();
        identity.device.device_type = identity_export.attributes.get("device_type").cloned();
        identities.insert(identity);
    }

    Ok(())
}
