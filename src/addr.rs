//! Routing locators, extended addresses, device capability bits, and the
//! link-local / mesh-local IPv6 addresses derived from them.

use no_std_net::Ipv6Addr;

use crate::config::INVALID_ROUTER_ID;

/// A 16-bit routing locator: high 6 bits are the Router ID, low 10 bits are
/// the Child ID (0 = "the router itself").
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Address16(u16);

impl Address16 {
    pub const BROADCAST: Address16 = Address16(0xffff);
    pub const INVALID: Address16 = Address16(0xfffe);

    pub const fn new(raw: u16) -> Self {
        Self(raw)
    }

    pub const fn from_router_child(router_id: u8, child_id: u16) -> Self {
        Self(((router_id as u16) << 10) | (child_id & 0x03ff))
    }

    pub const fn raw(self) -> u16 {
        self.0
    }

    pub const fn router_id(self) -> u8 {
        (self.0 >> 10) as u8 & 0x3f
    }

    pub const fn child_id(self) -> u16 {
        self.0 & 0x03ff
    }

    /// True when this locator names a router itself (child id zero) rather
    /// than one of its children.
    pub const fn is_router_locator(self) -> bool {
        self.child_id() == 0
    }

    pub const fn is_broadcast(self) -> bool {
        self.0 == Self::BROADCAST.0
    }

    pub const fn is_invalid(self) -> bool {
        self.0 == Self::INVALID.0 || self.router_id() == INVALID_ROUTER_ID
    }
}

/// IEEE EUI-64 extended address.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ExtendedAddress(pub [u8; 8]);

impl ExtendedAddress {
    /// Flip the Universal/Local bit (bit 1 of byte 0), the transform used to
    /// go between a MAC EUI-64 and the corresponding IPv6 interface
    /// identifier, and back.
    pub const fn with_ul_bit_flipped(mut self) -> Self {
        self.0[0] ^= 0x02;
        self
    }

    pub const fn to_iid(self) -> [u8; 8] {
        self.with_ul_bit_flipped().0
    }

    pub const fn from_iid(iid: [u8; 8]) -> Self {
        Self(iid).with_ul_bit_flipped()
    }
}

bitflags::bitflags! {
    /// Four-bit device capability set, carried per device and per neighbor.
    ///
    /// Invariant: `FULL_THREAD_DEVICE` implies `RX_ON_WHEN_IDLE` (checked by
    /// [`DeviceMode::is_valid`], not enforced structurally since a peer may
    /// still advertise a violating byte that we must be able to represent in
    /// order to reject it).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct DeviceMode: u8 {
        const RX_ON_WHEN_IDLE      = 0b0000_1000;
        const SECURE_DATA_REQUEST  = 0b0000_0100;
        const FULL_THREAD_DEVICE   = 0b0000_0010;
        const FULL_NETWORK_DATA    = 0b0000_0001;
    }
}

impl DeviceMode {
    /// `FFD ⇒ RxOnWhenIdle` (`spec.md` §3 `DeviceMode` invariant).
    pub const fn is_valid(self) -> bool {
        !self.contains(Self::FULL_THREAD_DEVICE) || self.contains(Self::RX_ON_WHEN_IDLE)
    }

    pub const fn is_ffd(self) -> bool {
        self.contains(Self::FULL_THREAD_DEVICE)
    }
}

#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeaderData {
    pub partition_id: u32,
    pub weighting: u8,
    pub data_version: u8,
    pub stable_data_version: u8,
    pub leader_router_id: u8,
}

/// The mesh-local prefix (40-bit ML-prefix + /64 boundary) from which both
/// the RLOC IPv6 address and the realm-local all-thread-nodes multicast
/// address are derived. Stored once; both addresses are pure functions of
/// it, so there is nothing to keep "in sync" on update (closes the Open
/// Question in `spec.md` §9 about atomic recomputation).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MeshLocalPrefix(pub [u8; 8]);

pub fn link_local_address(ext_addr: ExtendedAddress) -> Ipv6Addr {
    let iid = ext_addr.to_iid();
    let mut segments = [0u16; 8];
    segments[0] = 0xfe80;
    for i in 0..4 {
        segments[4 + i] = u16::from_be_bytes([iid[2 * i], iid[2 * i + 1]]);
    }
    Ipv6Addr::new(
        segments[0], segments[1], segments[2], segments[3], segments[4], segments[5],
        segments[6], segments[7],
    )
}

pub fn rloc_address(prefix: MeshLocalPrefix, rloc16: Address16) -> Ipv6Addr {
    let p = prefix.0;
    Ipv6Addr::new(
        u16::from_be_bytes([p[0], p[1]]),
        u16::from_be_bytes([p[2], p[3]]),
        u16::from_be_bytes([p[4], p[5]]),
        u16::from_be_bytes([p[6], p[7]]),
        0x0000,
        0x00ff,
        0xfe00,
        rloc16.raw(),
    )
}

pub fn realm_local_all_thread_nodes(prefix: MeshLocalPrefix) -> Ipv6Addr {
    let p = prefix.0;
    Ipv6Addr::new(
        0xff33,
        0x0040,
        u16::from_be_bytes([p[0], p[1]]),
        u16::from_be_bytes([p[2], p[3]]),
        u16::from_be_bytes([p[4], p[5]]),
        u16::from_be_bytes([p[6], p[7]]),
        0x0000,
        0x00fc,
    )
}

/// Reduce a link-local or mesh-local IPv6 address back to either an RLOC16
/// (if it matches the `…:00ff:fe00:RLOC` pattern) or an [`ExtendedAddress`]
/// (inverting the U/L bit of the interface identifier), per `spec.md` §4.4
/// `by_ipv6`.
pub fn decompose_ipv6(addr: Ipv6Addr) -> Ipv6Decomposition {
    let seg = addr.segments();
    if seg[4] == 0x0000 && seg[5] == 0x00ff && seg[6] == 0xfe00 {
        return Ipv6Decomposition::Rloc(Address16::new(seg[7]));
    }
    let mut iid = [0u8; 8];
    for i in 0..4 {
        let bytes = seg[4 + i].to_be_bytes();
        iid[2 * i] = bytes[0];
        iid[2 * i + 1] = bytes[1];
    }
    Ipv6Decomposition::Ext(ExtendedAddress::from_iid(iid))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ipv6Decomposition {
    Rloc(Address16),
    Ext(ExtendedAddress),
}
