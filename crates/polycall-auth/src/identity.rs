//! Identity registry: maps an identity id to its attributes.

use crate::audit::{AuditEvent, AuditEventKind, AuditLog, Clock};
use crate::error::AuthError;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DeviceInfo {
    pub device_id: Option<String>,
    pub device_type: Option<String>,
}

/// A named principal. `id` is immutable once created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub id: String,
    /// Never the raw credential — a reference to one (hash, external id).
    pub credential_reference: String,
    pub roles: HashSet<String>,
    pub device: DeviceInfo,
    pub created_at_ms: u64,
}

impl Identity {
    pub fn new(id: impl Into<String>, credential_reference: impl Into<String>, created_at_ms: u64) -> Self {
        Identity {
            id: id.into(),
            credential_reference: credential_reference.into(),
            roles: HashSet::new(),
            device: DeviceInfo::default(),
            created_at_ms,
        }
    }
}

/// In-memory identity store, mutex-guarded.
pub struct IdentityRegistry {
    identities: Mutex<HashMap<String, Identity>>,
    audit: Arc<dyn AuditLog>,
    clock: Arc<dyn Clock>,
}

impl IdentityRegistry {
    pub fn new(audit: Arc<dyn AuditLog>, clock: Arc<dyn Clock>) -> Self {
        IdentityRegistry {
            identities: Mutex::new(HashMap::new()),
            audit,
            clock,
        }
    }

    pub fn insert(&self, identity: Identity) {
        self.identities
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(identity.id.clone(), identity);
    }

    pub fn get(&self, id: &str) -> Option<Identity> {
        self.identities
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(id)
            .cloned()
    }

    /// Remove the identity. Returns it so the caller (the composing auth
    /// service) can cascade token revocation; this registry does not know
    /// about the token service.
    pub fn delete(&self, id: &str) -> Option<Identity> {
        self.identities.lock().unwrap_or_else(|e| e.into_inner()).remove(id)
    }

    pub fn roles_of(&self, id: &str) -> Result<HashSet<String>, AuthError> {
        self.identities
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(id)
            .map(|identity| identity.roles.clone())
            .ok_or_else(|| AuthError::NotFound(format!("identity {id}")))
    }

    pub fn assign_role(&self, id: &str, role: impl Into<String>) -> Result<(), AuthError> {
        let role = role.into();
        let mut identities = self.identities.lock().unwrap_or_else(|e| e.into_inner());
        let identity = identities
            .get_mut(id)
            .ok_or_else(|| AuthError::NotFound(format!("identity {id}")))?;
        identity.roles.insert(role.clone());
        drop(identities);
        self.audit.record(AuditEvent {
            kind: AuditEventKind::RoleAssign,
            identity_id: Some(id.to_owned()),
            resource: None,
            action: None,
            success: true,
            timestamp_ms: self.clock.now_ms(),
            details: Some(role),
        });
        Ok(())
    }

    pub fn remove_role(&self, id: &str, role: &str) -> Result<(), AuthError> {
        let mut identities = self.identities.lock().unwrap_or_else(|e| e.into_inner());
        let identity = identities
            .get_mut(id)
            .ok_or_else(|| AuthError::NotFound(format!("identity {id}")))?;
        identity.roles.remove(role);
        drop(identities);
        self.audit.record(AuditEvent {
            kind: AuditEventKind::RoleRemove,
            identity_id: Some(id.to_owned()),
            resource: None,
            action: None,
            success: true,
            timestamp_ms: self.clock.now_ms(),
            details: Some(role.to_owned()),
        });
        Ok(())
    }

    /// Emits an `AuditEventKind::Login` event for a login attempt against
    /// this registry, success or failure. The credential check itself
    /// happens in the caller (the registry holds no credential logic); this
    /// only records the outcome.
    pub fn record_login(&self, identity_id: Option<&str>, success: bool, details: Option<String>) {
        self.audit.record(AuditEvent {
            kind: AuditEventKind::Login,
            identity_id: identity_id.map(str::to_owned),
            resource: None,
            action: None,
            success,
            timestamp_ms: self.clock.now_ms(),
            details,
        });
    }

    /// All identities currently held, for export/import.
    pub fn all(&self) -> Vec<Identity> {
        self.identities
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .cloned()
            .collect()
    }
}
