//! Inbound packet queue between the receive task and the game loop
//!
//! The socket task pushes datagrams without blocking; the tick loop drains
//! everything pending before applying frames, keeping arrival order.

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};

use crate::game::constants::net::PACKET_QUEUE_CAPACITY;
use crate::net::protocol::PacketKind;

/// A received datagram, split into kind and body
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundPacket {
    pub kind: PacketKind,
    pub payload: Vec<u8>,
}

impl InboundPacket {
    pub fn new(kind: PacketKind, payload: Vec<u8>) -> Self {
        Self { kind, payload }
    }

    /// Split a raw datagram; `None` for an empty or unknown-kind datagram
    pub fn parse(datagram: &[u8]) -> Option<Self> {
        let (&first, rest) = datagram.split_first()?;
        let kind = PacketKind::from_u8(first)?;
        Some(Self::new(kind, rest.to_vec()))
    }
}

/// Bounded FIFO of inbound packets
pub struct PacketQueue {
    sender: Sender<InboundPacket>,
    receiver: Receiver<InboundPacket>,
}

impl PacketQueue {
    pub fn new(capacity: usize) -> Self {
        let (sender, receiver) = bounded(capacity);
        Self { sender, receiver }
    }

    /// Handle for the receive task
    pub fn sender(&self) -> PacketSender {
        PacketSender {
            sender: self.sender.clone(),
        }
    }

    /// Take every pending packet in arrival order
    pub fn drain(&self) -> Vec<InboundPacket> {
        self.receiver.try_iter().collect()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }
}

impl Default for PacketQueue {
    fn default() -> Self {
        Self::new(PACKET_QUEUE_CAPACITY)
    }
}

/// Clonable producer handle
#[derive(Clone)]
pub struct PacketSender {
    sender: Sender<InboundPacket>,
}

impl PacketSender {
    #[inline]
    pub fn try_send(&self, packet: InboundPacket) -> Result<(), PacketQueueError> {
        self.sender.try_send(packet).map_err(|e| match e {
            TrySendError::Full(_) => PacketQueueError::Full,
            TrySendError::Disconnected(_) => PacketQueueError::Disconnected,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum PacketQueueError {
    /// Game loop is falling behind
    #[error("Packet queue full")]
    Full,
    /// Game loop stopped
    #[error("Packet queue disconnected")]
    Disconnected,
}
