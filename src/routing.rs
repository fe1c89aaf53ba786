//! Router-ID allocation, the Route TLV, and the route-table update
//! algorithm (component C5).

use heapless::Vec;

use crate::config::{INVALID_ROUTER_ID, MAX_ROUTER_ID, MAX_ROUTE_COST, MAX_ROUTERS, ROUTER_ID_REUSE_DELAY_MS};
use crate::error::{Error, Result};
use crate::timer::time_a_before_b;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct RouterId(pub u8);

impl RouterId {
    pub const INVALID: RouterId = RouterId(INVALID_ROUTER_ID);

    pub const fn is_valid(self) -> bool {
        self.0 <= MAX_ROUTER_ID
    }
}

#[derive(Debug, Clone, Copy)]
enum Slot {
    Free,
    /// Released but not yet eligible for reuse; holds the time it may be
    /// reallocated (`spec.md` §4.5 `reclaim_delay`).
    Reclaiming { eligible_at_ms: u32 },
    Allocated,
}

/// Tracks which of the 63 router IDs are in use by this device's knowledge
/// of the partition, and the reuse delay after release, per
/// `original_source`'s `RouterTable`/`Mle::mRouterIdSequence` handling.
pub struct RouterIdAllocator {
    slots: [Slot; (MAX_ROUTER_ID as usize) + 1],
    /// Propagated by the Leader in the Route TLV; compared with wrap-aware
    /// signed 8-bit arithmetic (`spec.md` §4.5).
    pub sequence: u8,
}

impl Default for RouterIdAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl RouterIdAllocator {
    pub fn new() -> Self {
        Self {
            slots: [Slot::Free; (MAX_ROUTER_ID as usize) + 1],
            sequence: 0,
        }
    }

    pub fn is_allocated(&self, id: RouterId) -> bool {
        id.is_valid() && matches!(self.slots[id.0 as usize], Slot::Allocated)
    }

    /// Allocate `requested` if free/reclaimed-and-expired, else the lowest
    /// free id, else `None` if the partition is full.
    pub fn allocate(&mut self, requested: Option<RouterId>, now_ms: u32) -> Option<RouterId> {
        if let Some(id) = requested {
            if id.is_valid() && self.is_available(id, now_ms) {
                self.slots[id.0 as usize] = Slot::Allocated;
                return Some(id);
            }
        }
        for i in 0..=MAX_ROUTER_ID {
            let id = RouterId(i);
            if self.is_available(id, now_ms) {
                self.slots[i as usize] = Slot::Allocated;
                return Some(id);
            }
        }
        None
    }

    fn is_available(&self, id: RouterId, now_ms: u32) -> bool {
        match self.slots[id.0 as usize] {
            Slot::Free => true,
            Slot::Reclaiming { eligible_at_ms } => !time_a_before_b(now_ms, eligible_at_ms),
            Slot::Allocated => false,
        }
    }

    pub fn release(&mut self, id: RouterId, now_ms: u32) {
        if id.is_valid() {
            self.slots[id.0 as usize] = Slot::Reclaiming {
                eligible_at_ms: now_ms.wrapping_add(ROUTER_ID_REUSE_DELAY_MS),
            };
        }
    }

    pub fn advance_sequence(&mut self) {
        self.sequence = self.sequence.wrapping_add(1);
    }

    /// `spec.md` §4.5: replace `allocated[]` with the bitmap decoded from an
    /// accepted Route TLV. An id the bitmap no longer claims is freed
    /// outright rather than entering the reclaim delay, since this is a
    /// report of the partition's current state rather than a local release.
    pub fn apply_allocation_bitmap(&mut self, allocated_ids: &[RouterId]) {
        for i in 0..=MAX_ROUTER_ID {
            let id = RouterId(i);
            if allocated_ids.contains(&id) {
                self.slots[i as usize] = Slot::Allocated;
            } else if matches!(self.slots[i as usize], Slot::Allocated) {
                self.slots[i as usize] = Slot::Free;
            }
        }
    }

    /// `spec.md` §4.5: a received sequence only replaces ours if it is
    /// strictly newer under wrap-aware signed 8-bit comparison.
    pub fn accepts_sequence(&self, received: u8) -> bool {
        ((received.wrapping_sub(self.sequence)) as i8) > 0
    }
}

/// One entry of a Route TLV: per-router incoming/outgoing link quality and
/// the router's cost to reach the rest of the partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouteEntry {
    pub router_id: RouterId,
    pub link_quality_out: u8,
    pub link_quality_in: u8,
    /// `0` means "no direct link", per `spec.md` §4.5.
    pub route_cost: u8,
}

pub const MAX_ROUTE_ENTRIES: usize = MAX_ROUTERS;
/// Worst-case encoded Route TLV length: 1 sequence byte + 8 mask bytes +
/// one byte per possible router entry.
pub const ROUTE_TLV_MAX_LEN: usize = 1 + 8 + MAX_ROUTE_ENTRIES;

/// Route TLV value: `id_sequence(1B) ‖ id_mask(8B) ‖ (lq_out:2,lq_in:2,cost:4 bits)*`,
/// one byte per router present in the mask, in ascending router-id order.
pub fn encode_route_tlv(sequence: u8, entries: &[RouteEntry]) -> Result<heapless::Vec<u8, ROUTE_TLV_MAX_LEN>> {
    let mut out = heapless::Vec::new();
    out.push(sequence).map_err(|_| Error::NoBufs)?;
    let mut mask = [0u8; 8];
    for e in entries {
        if !e.router_id.is_valid() {
            return Err(Error::Parse);
        }
        mask[(e.router_id.0 / 8) as usize] |= 0x80 >> (e.router_id.0 % 8);
    }
    out.extend_from_slice(&mask).map_err(|_| Error::NoBufs)?;
    for e in entries {
        let byte = ((e.link_quality_out & 0x3) << 6) | ((e.link_quality_in & 0x3) << 4) | (e.route_cost & 0x0f);
        out.push(byte).map_err(|_| Error::NoBufs)?;
    }
    Ok(out)
}

pub fn decode_route_tlv(value: &[u8]) -> Result<(u8, heapless::Vec<RouteEntry, MAX_ROUTE_ENTRIES>)> {
    if value.len() < 9 {
        return Err(Error::Parse);
    }
    let sequence = value[0];
    let mask = &value[1..9];
    let entries_bytes = &value[9..];

    let mut ids: heapless::Vec<RouterId, MAX_ROUTE_ENTRIES> = heapless::Vec::new();
    for id in 0..=MAX_ROUTER_ID {
        if mask[(id / 8) as usize] & (0x80 >> (id % 8)) != 0 {
            ids.push(RouterId(id)).map_err(|_| Error::Parse)?;
        }
    }
    if ids.len() != entries_bytes.len() {
        return Err(Error::Parse);
    }

    let mut entries = heapless::Vec::new();
    for (id, byte) in ids.iter().zip(entries_bytes.iter()) {
        entries
            .push(RouteEntry {
                router_id: *id,
                link_quality_out: (byte >> 6) & 0x3,
                link_quality_in: (byte >> 4) & 0x3,
                route_cost: byte & 0x0f,
            })
            .map_err(|_| Error::Parse)?;
    }
    Ok((sequence, entries))
}

/// `spec.md` §4.5 LQI-to-cost table: LQI 3 (best) costs 2, LQI 1 (worst,
/// still usable) costs 16, and "no link" costs `MAX_ROUTE_COST`.
pub fn lqi_to_cost(lqi: u8) -> u8 {
    match lqi {
        3 => 2,
        2 => 6,
        1 => 16,
        _ => MAX_ROUTE_COST,
    }
}

/// Two-way link cost between this device and a router neighbor: the worse
/// of the two directions, per `spec.md` §4.5.
pub fn link_cost(lqi_in: u8, lqi_out: u8) -> u8 {
    lqi_to_cost(lqi_in).max(lqi_to_cost(lqi_out))
}

/// One row of this device's route table: the best known cost and next hop
/// to reach `router_id`, whether or not it is a direct neighbor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouteTableRow {
    pub router_id: RouterId,
    pub next_hop: Option<RouterId>,
    pub cost: u8,
}

/// Route-table fixed-point update (`spec.md` §4.5): given this device's own
/// router id, its direct neighbor costs, and an advertiser's reported
/// table, recompute the best next hop/cost to every router mentioned.
///
/// Exactly mirrors `original_source`'s `MleRouter::ProcessRouteTlv`
/// next-hop selection: prefer a direct link when it exists, otherwise
/// route via the advertiser if `advertiser_cost + cost_to_advertiser` beats
/// the current entry, and drop an entry whose only path now costs
/// `MAX_ROUTE_COST` or more.
pub fn update_route_table(
    rows: &mut Vec<RouteTableRow, MAX_ROUTE_ENTRIES>,
    own_id: RouterId,
    advertiser_id: RouterId,
    cost_to_advertiser: u8,
    advertiser_table: &[RouteEntry],
) {
    for entry in advertiser_table {
        if entry.router_id == own_id {
            continue;
        }
        let via_advertiser_cost = entry.route_cost.saturating_add(cost_to_advertiser);
        if via_advertiser_cost >= MAX_ROUTE_COST {
            continue;
        }

        let is_advertiser_itself = entry.router_id == advertiser_id;

        match rows.iter_mut().find(|r| r.router_id == entry.router_id) {
            Some(row) => {
                if is_advertiser_itself {
                    // The advertiser's own cost to itself is always the
                    // authoritative, freshest direct-link cost we have.
                    row.cost = cost_to_advertiser;
                    row.next_hop = None;
                } else if via_advertiser_cost < row.cost {
                    row.cost = via_advertiser_cost;
                    row.next_hop = Some(advertiser_id);
                }
            }
            None => {
                let _ = rows.push(if is_advertiser_itself {
                    RouteTableRow { router_id: entry.router_id, next_hop: None, cost: cost_to_advertiser }
                } else {
                    RouteTableRow { router_id: entry.router_id, next_hop: Some(advertiser_id), cost: via_advertiser_cost }
                });
            }
        }
    }
    rows.retain(|r| r.cost < MAX_ROUTE_COST);
}

/// Advertise trickle timer: doubles on each successful interval, capped,
/// and jittered by the caller's RNG (`spec.md` §4.5).
#[derive(Debug, Clone, Copy)]
pub struct AdvertiseTimer {
    pub interval_ms: u32,
}

impl Default for AdvertiseTimer {
    fn default() -> Self {
        Self::new()
    }
}

impl AdvertiseTimer {
    pub fn new() -> Self {
        Self {
            interval_ms: crate::config::ADVERTISE_INTERVAL_MIN_MS,
        }
    }

    /// Called after a topology change forces an immediate advertisement;
    /// resets the interval back to the minimum.
    pub fn reset(&mut self) {
        self.interval_ms = crate::config::ADVERTISE_INTERVAL_MIN_MS;
    }

    /// Called after a routine advertisement fires; doubles the interval up
    /// to the configured maximum.
    pub fn backoff(&mut self) {
        self.interval_ms = (self.interval_ms * 2).min(crate::config::ADVERTISE_INTERVAL_MAX_MS);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocate_prefers_requested_id() {
        let mut a = RouterIdAllocator::new();
        assert_eq!(a.allocate(Some(RouterId(10)), 0), Some(RouterId(10)));
        assert!(a.is_allocated(RouterId(10)));
    }

    #[test]
    fn released_id_unavailable_until_delay_elapses() {
        let mut a = RouterIdAllocator::new();
        a.allocate(Some(RouterId(1)), 0);
        a.release(RouterId(1), 0);
        assert_ne!(a.allocate(Some(RouterId(1)), 0), Some(RouterId(1)));
        assert_eq!(a.allocate(Some(RouterId(1)), ROUTER_ID_REUSE_DELAY_MS), Some(RouterId(1)));
    }

    #[test]
    fn sequence_accepts_only_strictly_newer() {
        let mut a = RouterIdAllocator::new();
        a.sequence = 10;
        assert!(a.accepts_sequence(11));
        assert!(!a.accepts_sequence(10));
        assert!(!a.accepts_sequence(9));
    }

    #[test]
    fn route_tlv_round_trips() {
        let entries = [
            RouteEntry { router_id: RouterId(0), link_quality_out: 3, link_quality_in: 3, route_cost: 0 },
            RouteEntry { router_id: RouterId(5), link_quality_out: 2, link_quality_in: 1, route_cost: 4 },
        ];
        let encoded = encode_route_tlv(7, &entries).unwrap();
        let (seq, decoded) = decode_route_tlv(&encoded).unwrap();
        assert_eq!(seq, 7);
        assert_eq!(decoded.as_slice(), &entries);
    }

    #[test]
    fn direct_link_wins_over_advertised_path() {
        let mut rows: Vec<RouteTableRow, MAX_ROUTE_ENTRIES> = Vec::new();
        let advertiser_table = [RouteEntry { router_id: RouterId(2), link_quality_out: 0, link_quality_in: 0, route_cost: 2 }];
        update_route_table(&mut rows, RouterId(1), RouterId(2), 2, &advertiser_table);
        let row = rows.iter().find(|r| r.router_id == RouterId(2)).unwrap();
        assert_eq!(row.next_hop, None);
        assert_eq!(row.cost, 2);
    }

    #[test]
    fn advertise_timer_doubles_and_caps() {
        let mut t = AdvertiseTimer::new();
        t.backoff();
        assert_eq!(t.interval_ms, crate::config::ADVERTISE_INTERVAL_MIN_MS * 2);
        for _ in 0..10 {
            t.backoff();
        }
        assert_eq!(t.interval_ms, crate::config::ADVERTISE_INTERVAL_MAX_MS);
    }
}
