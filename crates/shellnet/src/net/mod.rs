mod connection;
mod endpoint;
mod loopback;
mod protocol;
mod stats;

pub use connection::{AdmitError, PeerSession, SessionTable};
pub use endpoint::UdpEndpoint;
pub use loopback::{LoopbackError, LoopbackHub};
pub use protocol::sequence_greater_than;
pub use protocol::{
    DEFAULT_PORT, DEFAULT_TICK_RATE, MAX_PACKET_SIZE, PROTOCOL_MAGIC, PROTOCOL_VERSION, Packet,
    PacketError, PacketHeader, PacketType, SyncMessage,
};
pub use stats::NetworkStats;
