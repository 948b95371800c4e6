//! The protocol engine: transport and codec trait seams, the circular
//! buffer, the typed message envelope, the handshake and session state
//! machine, the duplex stream, and the dispatcher that ties them together.

pub mod buffer;
pub mod codec;
pub mod duplex_stream;
pub mod error;
pub mod framing;
pub mod handshake;
pub mod message;
pub mod params;
pub mod protocol_context;
pub mod quota;
pub mod state_machine;
pub mod testing;
pub mod transport;

pub use buffer::CircularBuffer;
pub use codec::{Codec, JsonCodec};
pub use duplex_stream::{DuplexStream, Observer, ReceiveFlags, SendFlags, StreamConfig, StreamState};
pub use error::{PeerVisibleError, ProtocolError};
pub use handshake::{HandshakeConfig, HandshakeEngine, HandshakeError, HandshakeStage, RetryPolicy};
pub use message::{CorrelationIdAllocator, Message, MessageFlags, MessageKind};
pub use params::{negotiate, Capabilities, NegotiatedParams, SecurityLevel};
pub use protocol_context::{Handler, Middleware, MiddlewareDecision, ProtocolContext};
pub use state_machine::{StateMachine, TransitionOutcome};
pub use transport::{InMemoryTransport, Transport};
