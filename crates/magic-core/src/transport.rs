//! The Diameter transport seam. `magic-core` never owns a socket or the
//! base-protocol framing (CER/CEA, watchdog) — it hands whole messages to
//! and receives whole messages from whatever the caller wires in.

use std::collections::HashMap;
use std::sync::Mutex;

use magic_diameter::DiameterMessage;
use thiserror::Error;
use tokio::sync::mpsc;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("no connection registered for client {0}")]
    NoConnection(String),
    #[error("peer channel closed for client {0}")]
    ChannelClosed(String),
}

/// Sends whole Diameter messages to a specific client session's peer
/// connection. Implementations must not block for longer than a single
/// non-blocking channel send.
pub trait DiameterTransport: Send + Sync {
    fn send(&self, client_id: &str, message: DiameterMessage) -> Result<(), TransportError>;
}

/// An in-process transport backed by one unbounded channel per connected
/// client, mirroring the teacher's `mpsc::Sender<String>` bridge between
/// business logic and the outbound WebSocket writer.
#[derive(Default)]
pub struct ChannelTransport {
    peers: Mutex<HashMap<String, mpsc::UnboundedSender<DiameterMessage>>>,
}

impl ChannelTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a client connection, returning the receiver the caller's
    /// write-side task should drain.
    pub fn connect(&self, client_id: &str) -> mpsc::UnboundedReceiver<DiameterMessage> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.peers.lock().unwrap().insert(client_id.to_string(), tx);
        rx
    }

    pub fn disconnect(&self, client_id: &str) {
        self.peers.lock().unwrap().remove(client_id);
    }

    pub fn is_connected(&self, client_id: &str) -> bool {
        self.peers.lock().unwrap().contains_key(client_id)
    }
}

impl DiameterTransport for ChannelTransport {
    fn send(&self, client_id: &str, message: DiameterMessage) -> Result<(), TransportError> {
        let peers = self.peers.lock().unwrap();
        let tx = peers
            .get(client_id)
            .ok_or_else(|| TransportError::NoConnection(client_id.to_string()))?;
        tx.send(message)
            .map_err(|_| TransportError::ChannelClosed(client_id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use magic_diameter::dictionary::CMD_MCAR_CODE;

    #[test]
    fn send_to_unknown_client_is_an_error() {
        let transport = ChannelTransport::new();
        let msg = DiameterMessage::request(CMD_MCAR_CODE, 1, 1, vec![]);
        assert!(transport.send("CLIENT_A", msg).is_err());
    }

    #[test]
    fn connect_then_send_is_delivered() {
        let transport = ChannelTransport::new();
        let mut rx = transport.connect("CLIENT_A");
        let msg = DiameterMessage::request(CMD_MCAR_CODE, 1, 1, vec![]);
        transport.send("CLIENT_A", msg).unwrap();
        assert!(rx.try_recv().is_ok());
    }
}
