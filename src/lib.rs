//! The root crate: the zero-trust [`Integrator`] that wires
//! `polycall-auth`'s middleware into `polycall-protocol`'s dispatch chain,
//! and the [`Session`] façade that ties a transport, a codec, a handshake
//! engine, and the integrator together into one constructible entry point.

pub mod integrator;
pub mod session;

pub use integrator::{Integrator, LOGIN, TOKEN_REFRESH, TOKEN_REVOKE, TOKEN_VALIDATE};
pub use session::Session;

pub use polycall_auth as auth;
pub use polycall_protocol as protocol;
