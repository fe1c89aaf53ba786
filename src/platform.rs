//! Capability traits the embedder implements to give [`crate::MleCore`]
//! access to the UDP transport, the radio, and network-data storage,
//! mirroring the teacher crate's split between core protocol logic and an
//! injected `Radio`/device collaborator.

use no_std_net::Ipv6Addr;

use crate::addr::ExtendedAddress;
use crate::error::Result;

/// Per-datagram metadata the transport hands back on receive, and accepts
/// on send (hop limit, source/destination).
#[derive(Debug, Clone, Copy)]
pub struct MsgInfo {
    pub peer_addr: Ipv6Addr,
    pub local_addr: Ipv6Addr,
    pub hop_limit: u8,
}

/// Per-frame link-layer quality, supplied by the radio alongside a
/// received MLE datagram; used for [`crate::routing::link_cost`].
#[derive(Debug, Clone, Copy)]
pub struct LinkInfo {
    pub lqi: u8,
    pub rssi: i8,
}

/// Minimal UDP sockets API: one bound socket, sending and receiving
/// datagrams addressed by `Ipv6Addr`.
pub trait UdpTransport {
    fn send_to(&mut self, info: &MsgInfo, payload: &[u8]) -> Result<()>;
}

/// Radio-layer facts the core needs but does not itself own: this device's
/// extended address (burned into hardware) and the short address currently
/// programmed into the radio filter.
pub trait RadioPlatform {
    fn extended_address(&self) -> ExtendedAddress;
    fn set_short_address(&mut self, rloc16: crate::addr::Address16);
    fn set_pan_id(&mut self, pan_id: u16);
}

/// Network-data collaborator: receives the assembled TLV blob carried
/// inside Data Response messages, and the context-id table changes that
/// accompany a `NetworkData` TLV. Threaded through but not interpreted —
/// its internal structure is explicitly out of scope (`spec.md` §1
/// Non-goals).
pub trait NetworkDataSink {
    fn store_network_data(&mut self, version: u8, stable_version: u8, blob: &[u8]) -> Result<()>;
}

/// Outcome of an Address Solicit sent to the Leader when a REED is
/// promoted to Router, or an Address Release when a Router steps down
/// (`spec.md` §4.6 SUPPLEMENT).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaderRequest {
    AddressSolicit { requested_router_id: Option<crate::routing::RouterId> },
    AddressRelease { router_id: crate::routing::RouterId },
}

/// Supertrait bundling every capability [`crate::MleCore`] needs from its
/// embedder, so the core stays generic over a single `P: Platform` bound
/// rather than three.
pub trait Platform: UdpTransport + RadioPlatform + NetworkDataSink {}

impl<T: UdpTransport + RadioPlatform + NetworkDataSink> Platform for T {}
