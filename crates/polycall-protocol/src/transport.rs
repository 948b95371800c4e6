//! The pluggable transport interface: an opaque ordered byte pipe.
//!
//! Concrete transports (TCP, TLS, UDS) are external collaborators. This
//! crate only defines the trait seam plus an in-memory pair used by the
//! crate's own tests and any caller that wants a loopback transport.

use crate::error::ProtocolError;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

/// An ordered, frame-atomic byte pipe between two endpoints.
///
/// A frame handed to [`Transport::send`] is delivered to the peer's
/// [`Transport::recv`] as one unit, in send order, or not at all (if the
/// peer disconnects first). This crate does not require implementations to
/// reassemble partial byte streams into frames themselves — a
/// stream-oriented transport (raw TCP) is expected to apply the
/// length-prefixed framing in [`crate::framing`] internally.
pub trait Transport: Send + Sync {
    /// Send one frame. Returns `TransportClosed` if the peer is gone.
    fn send(&self, frame: &[u8]) -> Result<(), ProtocolError>;

    /// Non-blocking receive. `Ok(None)` means no frame is available yet.
    fn recv(&self) -> Result<Option<Vec<u8>>, ProtocolError>;

    /// Whether the transport believes the peer is still reachable.
    fn is_connected(&self) -> bool;

    /// Tear down the transport. Idempotent.
    fn close(&self);
}

#[derive(Debug)]
struct SharedHalf {
    inbox: Mutex<VecDeque<Vec<u8>>>,
    connected: std::sync::atomic::AtomicBool,
}

impl SharedHalf {
    fn new() -> Self {
        SharedHalf {
            inbox: Mutex::new(VecDeque::new()),
            connected: std::sync::atomic::AtomicBool::new(true),
        }
    }
}

/// An in-memory transport, one end of a connected pair created by
/// [`InMemoryTransport::pair`]. Useful for tests and for embedding two
/// sessions of this crate in one process.
#[derive(Debug, Clone)]
pub struct InMemoryTransport {
    /// Frames we send land here, for the peer to read.
    outbound: Arc<SharedHalf>,
    /// Frames the peer sends land here, for us to read.
    inbound: Arc<SharedHalf>,
}

impl InMemoryTransport {
    /// Create a connected pair: `(a, b)`, where bytes sent on `a` are
    /// received by `b` and vice versa.
    pub fn pair() -> (Self, Self) {
        let side_a_to_b = Arc::new(SharedHalf::new());
        let side_b_to_a = Arc::new(SharedHalf::new());
        let a = InMemoryTransport {
            outbound: side_a_to_b.clone(),
            inbound: side_b_to_a.clone(),
        };
        let b = InMemoryTransport {
            outbound: side_b_to_a,
            inbound: side_a_to_b,
        };
        (a, b)
    }
}

impl Transport for InMemoryTransport {
    fn send(&self, frame: &[u8]) -> Result<(), ProtocolError> {
        if !self.is_connected() {
            return Err(ProtocolError::TransportClosed(
                "peer disconnected".to_owned(),
            ));
        }
        self.outbound
            .inbox
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(frame.to_vec());
        Ok(())
    }

    fn recv(&self) -> Result<Option<Vec<u8>>, ProtocolError> {
        let mut inbox = self.inbound.inbox.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(frame) = inbox.pop_front() {
            return Ok(Some(frame));
        }
        if !self.is_connected() {
            return Err(ProtocolError::TransportClosed(
                "peer disconnected".to_owned(),
            ));
        }
        Ok(None)
    }

    fn is_connected(&self) -> bool {
        self.outbound.connected.load(std::sync::atomic::Ordering::SeqCst)
            && self.inbound.connected.load(std::sync::atomic::Ordering::SeqCst)
    }

    fn close(&self) {
        self.outbound
            .connected
            .store(false, std::sync::atomic::Ordering::SeqCst);
        self.inbound
            .connected
            .store(false, std::sync::atomic::Ordering::SeqCst);
    }
}
