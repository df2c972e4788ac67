//! UDP transport
//!
//! The receive task splits datagrams into [`InboundPacket`]s and queues them
//! for the tick loop; the send task writes acknowledgments handed over through
//! a tokio channel. Neither task touches reconciliation state.

use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use tokio::net::UdpSocket;
use tokio::sync::mpsc;

use crate::game::constants::net::MAX_DATAGRAM_SIZE;
use crate::metrics::ClientMetrics;
use crate::net::framing::validate_datagram_size;
use crate::net::packet_queue::{InboundPacket, PacketQueueError, PacketSender};
use crate::net::protocol::Ack;

/// Outbound acknowledgments buffered before the send task falls behind
const ACK_CHANNEL_CAPACITY: usize = 256;

/// Bind locally and connect to the server so only its datagrams arrive
pub async fn connect(bind: SocketAddr, server: SocketAddr) -> anyhow::Result<Arc<UdpSocket>> {
    let socket = UdpSocket::bind(bind).await?;
    socket.connect(server).await?;
    tracing::info!(
        "UDP socket {} connected to {}",
        socket.local_addr()?,
        server
    );
    Ok(Arc::new(socket))
}

/// Receive datagrams until the queue's consumer goes away
pub async fn run_receiver(
    socket: Arc<UdpSocket>,
    queue: PacketSender,
    metrics: Arc<ClientMetrics>,
) -> anyhow::Result<()> {
    // One spare byte detects oversized datagrams instead of silently truncating
    let mut buffer = vec![0u8; MAX_DATAGRAM_SIZE + 1];

    loop {
        let len = match socket.recv(&mut buffer).await {
            Ok(len) => len,
            Err(e) => {
                tracing::debug!("Datagram receive error: {}", e);
                continue;
            }
        };
        let datagram = &buffer[..len];
        metrics
            .bytes_received
            .fetch_add(len as u64, Ordering::Relaxed);

        if let Err(e) = validate_datagram_size(datagram) {
            tracing::warn!("Dropping oversized datagram: {}", e);
            continue;
        }
        let Some(packet) = InboundPacket::parse(datagram) else {
            tracing::warn!(
                "Dropping datagram with unknown kind {:?}",
                datagram.first()
            );
            continue;
        };

        match queue.try_send(packet) {
            Ok(()) => {}
            Err(PacketQueueError::Full) => {
                metrics.packets_dropped.fetch_add(1, Ordering::Relaxed);
                tracing::debug!("Packet queue full, dropping datagram");
            }
            Err(PacketQueueError::Disconnected) => {
                tracing::debug!("Packet queue closed, stopping receiver");
                return Ok(());
            }
        }
    }
}

/// Fire-and-forget handle for queueing acknowledgments
#[derive(Clone)]
pub struct AckSender {
    sender: mpsc::Sender<Ack>,
}

impl AckSender {
    /// Returns false if the ack was dropped
    pub fn send(&self, ack: Ack) -> bool {
        match self.sender.try_send(ack) {
            Ok(()) => true,
            Err(e) => {
                tracing::debug!("Acknowledgment dropped: {}", e);
                false
            }
        }
    }
}

pub fn ack_channel() -> (AckSender, mpsc::Receiver<Ack>) {
    let (sender, receiver) = mpsc::channel(ACK_CHANNEL_CAPACITY);
    (AckSender { sender }, receiver)
}

/// Write queued acknowledgments until every sender is dropped
pub async fn run_ack_sender(
    socket: Arc<UdpSocket>,
    mut acks: mpsc::Receiver<Ack>,
    metrics: Arc<ClientMetrics>,
) -> anyhow::Result<()> {
    while let Some(ack) = acks.recv().await {
        let packet = ack.encode_packet();
        match socket.send(&packet).await {
            Ok(_) => {
                metrics.acks_sent.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => tracing::warn!("Failed to send ack for set {}: {}", ack.set(), e),
        }
    }
    Ok(())
}
