//! Wire layer: framing, packet kinds, delta records and the UDP transport

pub mod delta;
pub mod framing;
pub mod history;
pub mod packet_queue;
pub mod protocol;
pub mod transport;
