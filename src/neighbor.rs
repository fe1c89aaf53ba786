//! Neighbor table (component C4): parent, children, and router peers, with
//! per-key-sequence replay bookkeeping and staleness invalidation.

use heapless::Vec;
use no_std_net::Ipv6Addr;

use crate::addr::{decompose_ipv6, Address16, DeviceMode, ExtendedAddress, Ipv6Decomposition};
use crate::config::{MAX_CHILDREN, MAX_NEIGHBOR_AGE_MS, MAX_ROUTERS};
use crate::error::{Error, Result};
use crate::routing::RouterId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NeighborState {
    Invalid,
    ParentRequest,
    LinkRequest,
    ChildIdRequest,
    Valid,
}

/// Fields common to every neighbor kind (`spec.md` §3 `Neighbor`).
#[derive(Debug, Clone, Copy)]
pub struct NeighborInfo {
    pub ext_addr: ExtendedAddress,
    pub rloc16: Address16,
    pub state: NeighborState,
    pub mode: DeviceMode,
    pub link_frame_counter: u32,
    pub mle_frame_counter: u32,
    /// True while the last frame accepted from this neighbor used the
    /// previous key sequence rather than the current one — replay
    /// protection then additionally requires a monotonic counter per key
    /// era (`spec.md` §4.4).
    pub previous_key: bool,
    pub last_heard_ms: u32,
    pub pending_challenge: Option<[u8; 8]>,
    pub link_quality_in: u8,
    pub link_quality_out: u8,
    pub rssi: i8,
}

impl NeighborInfo {
    pub(crate) fn new(ext_addr: ExtendedAddress, now_ms: u32) -> Self {
        Self {
            ext_addr,
            rloc16: Address16::INVALID,
            state: NeighborState::Invalid,
            mode: DeviceMode::empty(),
            link_frame_counter: 0,
            mle_frame_counter: 0,
            previous_key: false,
            last_heard_ms: now_ms,
            pending_challenge: None,
            link_quality_in: 0,
            link_quality_out: 0,
            rssi: 0,
        }
    }

    pub fn is_state_valid(&self) -> bool {
        self.state == NeighborState::Valid
    }

    /// `spec.md` §4.4 staleness rule: a neighbor not heard from within
    /// `MAX_NEIGHBOR_AGE_MS`, scaled for sleepy children by their poll
    /// timeout, is stale and must be treated as absent even though the
    /// table entry has not yet been reclaimed.
    pub fn is_stale(&self, now_ms: u32, max_age_ms: u32) -> bool {
        crate::timer::time_a_before_b(self.last_heard_ms.wrapping_add(max_age_ms), now_ms)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Child {
    pub info: NeighborInfo,
    pub timeout_ms: u32,
    pub network_data_version: u8,
    pub registered_addresses: [Option<Ipv6Addr>; crate::tlv::MAX_REGISTERED_ADDRESSES],
}

impl Child {
    fn new(ext_addr: ExtendedAddress, now_ms: u32) -> Self {
        Self {
            info: NeighborInfo::new(ext_addr, now_ms),
            timeout_ms: 0,
            network_data_version: 0,
            registered_addresses: [None; crate::tlv::MAX_REGISTERED_ADDRESSES],
        }
    }

    pub fn register_address(&mut self, addr: Ipv6Addr) -> Result<()> {
        if let Some(slot) = self.registered_addresses.iter_mut().find(|s| s.is_none()) {
            *slot = Some(addr);
            Ok(())
        } else {
            Err(Error::NoBufs)
        }
    }

    pub fn clear_addresses(&mut self) {
        self.registered_addresses = [None; crate::tlv::MAX_REGISTERED_ADDRESSES];
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Router {
    pub info: NeighborInfo,
    pub router_id: RouterId,
    pub next_hop: Option<RouterId>,
    pub cost: u8,
}

impl Router {
    fn new(ext_addr: ExtendedAddress, router_id: RouterId, now_ms: u32) -> Self {
        Self {
            info: NeighborInfo::new(ext_addr, now_ms),
            router_id,
            next_hop: None,
            cost: crate::config::MAX_ROUTE_COST,
        }
    }
}

/// Fixed-capacity tables for every neighbor kind, plus the single current
/// parent (kept out of the `routers` table since it is addressed by its
/// relationship, not its router id, while this device is a Child).
pub struct NeighborTable {
    pub parent: Option<NeighborInfo>,
    children: Vec<Child, MAX_CHILDREN>,
    routers: Vec<Router, MAX_ROUTERS>,
}

impl Default for NeighborTable {
    fn default() -> Self {
        Self::new()
    }
}

impl NeighborTable {
    pub const fn new() -> Self {
        Self {
            parent: None,
            children: Vec::new(),
            routers: Vec::new(),
        }
    }

    pub fn children(&self) -> &[Child] {
        &self.children
    }

    pub fn children_mut(&mut self) -> &mut [Child] {
        &mut self.children
    }

    pub fn routers(&self) -> &[Router] {
        &self.routers
    }

    pub fn routers_mut(&mut self) -> &mut [Router] {
        &mut self.routers
    }

    pub fn add_child(&mut self, ext_addr: ExtendedAddress, now_ms: u32) -> Result<&mut Child> {
        if self.children.iter().any(|c| c.info.ext_addr == ext_addr) {
            return Err(Error::Already);
        }
        self.children
            .push(Child::new(ext_addr, now_ms))
            .map_err(|_| Error::NoBufs)?;
        Ok(self.children.last_mut().expect("just pushed"))
    }

    pub fn remove_child(&mut self, ext_addr: ExtendedAddress) {
        if let Some(pos) = self.children.iter().position(|c| c.info.ext_addr == ext_addr) {
            self.children.remove(pos);
        }
    }

    pub fn add_or_get_router(&mut self, ext_addr: ExtendedAddress, router_id: RouterId, now_ms: u32) -> Result<&mut Router> {
        if let Some(pos) = self.routers.iter().position(|r| r.info.ext_addr == ext_addr) {
            return Ok(&mut self.routers[pos]);
        }
        self.routers
            .push(Router::new(ext_addr, router_id, now_ms))
            .map_err(|_| Error::NoBufs)?;
        Ok(self.routers.last_mut().expect("just pushed"))
    }

    pub fn remove_router(&mut self, router_id: RouterId) {
        self.routers.retain(|r| r.router_id != router_id);
    }

    pub fn by_ext(&self, ext_addr: ExtendedAddress) -> Option<&NeighborInfo> {
        if let Some(p) = &self.parent {
            if p.ext_addr == ext_addr {
                return Some(p);
            }
        }
        self.children
            .iter()
            .map(|c| &c.info)
            .chain(self.routers.iter().map(|r| &r.info))
            .find(|n| n.ext_addr == ext_addr)
    }

    pub fn by_short(&self, rloc16: Address16) -> Option<&NeighborInfo> {
        if let Some(p) = &self.parent {
            if p.rloc16 == rloc16 {
                return Some(p);
            }
        }
        self.children
            .iter()
            .map(|c| &c.info)
            .chain(self.routers.iter().map(|r| &r.info))
            .find(|n| n.rloc16 == rloc16)
    }

    /// Reduce an IPv6 address to an RLOC16 or extended address (per
    /// [`decompose_ipv6`]) and look the result up, exactly as `spec.md`
    /// §4.4's `by_ipv6` describes.
    pub fn by_ipv6(&self, addr: Ipv6Addr) -> Option<&NeighborInfo> {
        match decompose_ipv6(addr) {
            Ipv6Decomposition::Rloc(r) => self.by_short(r),
            Ipv6Decomposition::Ext(e) => self.by_ext(e),
        }
    }

    pub fn by_mac_addr(&self, ext_addr: ExtendedAddress) -> Option<&NeighborInfo> {
        self.by_ext(ext_addr)
    }

    /// Stamp replay/liveness bookkeeping on whichever table holds
    /// `ext_addr` (parent, a child, or a router), after a frame from it has
    /// been accepted (`spec.md` §4.3 step 7).
    pub fn record_accepted_frame(&mut self, ext_addr: ExtendedAddress, frame_counter: u32, previous_key: bool, now_ms: u32) {
        if let Some(p) = &mut self.parent {
            if p.ext_addr == ext_addr {
                p.mle_frame_counter = frame_counter.wrapping_add(1);
                p.previous_key = previous_key;
                p.last_heard_ms = now_ms;
                return;
            }
        }
        if let Some(c) = self.children.iter_mut().find(|c| c.info.ext_addr == ext_addr) {
            c.info.mle_frame_counter = frame_counter.wrapping_add(1);
            c.info.previous_key = previous_key;
            c.info.last_heard_ms = now_ms;
            return;
        }
        if let Some(r) = self.routers.iter_mut().find(|r| r.info.ext_addr == ext_addr) {
            r.info.mle_frame_counter = frame_counter.wrapping_add(1);
            r.info.previous_key = previous_key;
            r.info.last_heard_ms = now_ms;
        }
    }

    pub fn router_by_id(&self, router_id: RouterId) -> Option<&Router> {
        self.routers.iter().find(|r| r.router_id == router_id)
    }

    pub fn router_by_id_mut(&mut self, router_id: RouterId) -> Option<&mut Router> {
        self.routers.iter_mut().find(|r| r.router_id == router_id)
    }

    /// Invalidate (remove from their tables) every neighbor that is stale
    /// relative to `now_ms`. Run from the periodic 1 s state-update tick
    /// (`spec.md` §4.6).
    pub fn purge_stale(&mut self, now_ms: u32) {
        self.children.retain(|c| {
            let max_age = c.timeout_ms.max(MAX_NEIGHBOR_AGE_MS);
            !c.info.is_stale(now_ms, max_age)
        });
        self.routers.retain(|r| !r.info.is_stale(now_ms, MAX_NEIGHBOR_AGE_MS));
        if let Some(p) = &self.parent {
            if p.is_stale(now_ms, MAX_NEIGHBOR_AGE_MS) {
                self.parent = None;
            }
        }
    }
}

/// `spec.md` §4.3 replay rule: accept a frame counter from the claimed key
/// era only if it strictly exceeds the last one recorded for that era
/// (current counter for the current key, a separately tracked counter for
/// the previous key so a late-arriving frame from just before rotation
/// cannot replay).
pub fn accepts_frame_counter(neighbor: &NeighborInfo, using_previous_key: bool, counter: u32) -> bool {
    if using_previous_key != neighbor.previous_key {
        // A jump between key eras is only ever forward (current -> previous
        // is never legitimate once we have seen the current key in use).
        if using_previous_key {
            return false;
        }
        return true;
    }
    counter > neighbor.mle_frame_counter
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table_with_child(now: u32) -> (NeighborTable, ExtendedAddress) {
        let mut t = NeighborTable::new();
        let ext = ExtendedAddress([1, 2, 3, 4, 5, 6, 7, 8]);
        t.add_child(ext, now).unwrap();
        (t, ext)
    }

    #[test]
    fn add_child_then_lookup_by_ext() {
        let (t, ext) = table_with_child(0);
        assert!(t.by_ext(ext).is_some());
    }

    #[test]
    fn duplicate_child_rejected() {
        let (mut t, ext) = table_with_child(0);
        assert_eq!(t.add_child(ext, 0).err(), Some(Error::Already));
    }

    #[test]
    fn stale_child_purged_on_tick() {
        let (mut t, ext) = table_with_child(0);
        t.purge_stale(MAX_NEIGHBOR_AGE_MS + 1);
        assert!(t.by_ext(ext).is_none());
    }

    #[test]
    fn replay_rule_rejects_non_increasing_counter() {
        let mut n = NeighborInfo::new(ExtendedAddress([0; 8]), 0);
        n.mle_frame_counter = 10;
        assert!(accepts_frame_counter(&n, false, 11));
        assert!(!accepts_frame_counter(&n, false, 10));
        assert!(!accepts_frame_counter(&n, false, 5));
    }

    #[test]
    fn replay_rule_rejects_backward_key_era() {
        let mut n = NeighborInfo::new(ExtendedAddress([0; 8]), 0);
        n.previous_key = false;
        n.mle_frame_counter = 3;
        assert!(!accepts_frame_counter(&n, true, 100));
    }
}
