// Network Module
//
// This module provides the wire side of the node: the packets exchanged
// between nodes and the transport adapters that carry them.

pub mod packets;
pub mod transport;

pub use packets::{
    ActionInfo, AnnouncePacket, Envelope, ErrorPayload, EventPacket, Packet, RequestPacket,
    ResponsePacket, PROTOCOL_VERSION,
};
pub use transport::{
    connect_with_backoff, MemoryBus, MemoryTransport, MessageHandler, Transport,
};
