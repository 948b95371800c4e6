//! The zero-trust authentication service: token issuance and validation,
//! the identity registry, the policy engine, and the audit log.

pub mod audit;
pub mod credential;
pub mod error;
pub mod export;
pub mod identity;
pub mod policy;
pub mod token;

pub use audit::{AuditEvent, AuditEventKind, AuditLog, Clock, InMemoryAuditLog, SystemClock};
pub use credential::{hash as hash_credential, verify as verify_credential};
pub use error::AuthError;
pub use export::{export_state, import_state, IdentityExport, ImportError, PolicyExport, RoleExport, StateExport};
pub use identity::{DeviceInfo, Identity, IdentityRegistry};
pub use policy::{Decision, Effect, Policy, PolicyEngine, Role, Statement};
pub use token::{SigningAlgorithm, TokenClaims, TokenConfig, TokenKind, TokenService};
