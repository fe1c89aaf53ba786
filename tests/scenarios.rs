//! End-to-end scenarios, one test per literal case in `spec.md` §8.

mod common;

use common::{advance_to, base_config, test_prefix, Node, SharedClock};
use mle_core::addr::{DeviceMode, ExtendedAddress};
use mle_core::neighbor::{accepts_frame_counter, NeighborInfo, NeighborState};
use mle_core::routing::{
    update_route_table, RouteEntry, RouteTableRow, RouterId, RouterIdAllocator,
};
use mle_core::Role;
use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

fn ext(bytes: [u8; 8]) -> ExtendedAddress {
    ExtendedAddress(bytes)
}

/// Scenario 1: two-node bringup into the same partition.
#[test]
fn two_node_bringup_same_partition() {
    let clock = SharedClock::new();
    let ether = Rc::new(RefCell::new(VecDeque::new()));
    let prefix = test_prefix();

    let mut a = Node::new(ext([0x11, 0x22, 0x33, 0x44, 0, 0, 0, 1]), 1, clock.clone(), &ether, base_config());
    a.core.set_mesh_local_prefix(prefix);
    a.core.become_leader().unwrap();

    let mut b = Node::new(ext([0xaa, 0xbb, 0xcc, 0xdd, 0, 0, 0, 2]), 2, clock.clone(), &ether, base_config());
    b.core.set_mesh_local_prefix(prefix);
    b.core.start().unwrap();

    for ms in [1000, 2000, 3000] {
        advance_to(&clock, &ether, &mut [&mut a, &mut b], ms);
    }

    assert_eq!(b.core.role(), Role::Child);
    assert_eq!(b.core.parent_rloc16(), Some(a.core.rloc16()));
    assert_eq!(b.core.leader_data().partition_id, a.core.leader_data().partition_id);
    assert_eq!(b.core.leader_data().partition_id, 0x11223344);
    assert!(!b.core.rloc16().is_invalid());
    assert_eq!(b.core.rloc16().router_id(), a.core.rloc16().router_id());
}

/// Scenario 2 (integration form): with both a Router/Leader (A) and an FFD
/// Child (B) reachable, a fresh attach is satisfied by A's `RouterOnly`
/// response in the first round, so the attach sub-machine never needs to
/// broadcast the `Router|Child` round at all — the direct per-responder
/// gating (a Child never answers `RouterOnly`, an FFD Child does answer
/// `Router|Child`) is covered by `parent_request_scan_mask_gates_child_responder`
/// in `src/mle.rs`.
#[test]
fn parent_request_router_only_round_suffices_when_router_present() {
    let clock = SharedClock::new();
    let ether = Rc::new(RefCell::new(VecDeque::new()));
    let prefix = test_prefix();

    let mut a = Node::new(ext([1, 0, 0, 0, 0, 0, 0, 1]), 10, clock.clone(), &ether, base_config());
    a.core.set_mesh_local_prefix(prefix);
    a.core.become_leader().unwrap();

    let mut b = Node::new(ext([2, 0, 0, 0, 0, 0, 0, 2]), 20, clock.clone(), &ether, base_config());
    b.core.set_mesh_local_prefix(prefix);
    b.core.start().unwrap();
    for ms in [1000, 2000] {
        advance_to(&clock, &ether, &mut [&mut a, &mut b], ms);
    }
    assert_eq!(b.core.role(), Role::Child);

    let mut c = Node::new(ext([3, 0, 0, 0, 0, 0, 0, 3]), 30, clock.clone(), &ether, base_config());
    c.core.set_mesh_local_prefix(prefix);
    c.core.start().unwrap();
    // RequestStart -> RequestRouter at +1 s, candidate found from A's
    // RouterOnly response; RequestRouter -> ChildIdRequest at +1 s more,
    // completing the handshake within the same dispatch.
    advance_to(&clock, &ether, &mut [&mut a, &mut b, &mut c], 3000);
    advance_to(&clock, &ether, &mut [&mut a, &mut b, &mut c], 4000);

    assert_eq!(c.core.role(), Role::Child);
    assert_eq!(c.core.parent_rloc16(), Some(a.core.rloc16()));
}

/// Scenario 3: Route TLV next-hop update. Once the previously-direct path
/// to a router is gone from the table (the full `MleCore` drops the row
/// once the direct neighbor is purged as stale — see
/// `route_table_drops_orphaned_row_then_adopts_indirect_path` in
/// `src/mle.rs` for that end-to-end trigger), an Advertisement reporting
/// an indirect path installs it.
#[test]
fn route_tlv_next_hop_update() {
    let mut rows: heapless::Vec<RouteTableRow, { mle_core::routing::MAX_ROUTE_ENTRIES }> = heapless::Vec::new();

    let entries = [RouteEntry { router_id: RouterId(10), link_quality_out: 0, link_quality_in: 0, route_cost: 2 }];
    update_route_table(&mut rows, RouterId(2), RouterId(1), 1, &entries);

    let row = rows.iter().find(|r| r.router_id == RouterId(10)).unwrap();
    assert_eq!(row.next_hop, Some(RouterId(1)));
    assert_eq!(row.cost, 3);
}

/// Scenario 3 (direct form): re-applying the same advertiser cost is
/// idempotent once the next hop already routes via that advertiser.
#[test]
fn route_tlv_update_idempotent_on_repeat() {
    let mut rows: heapless::Vec<RouteTableRow, { mle_core::routing::MAX_ROUTE_ENTRIES }> = heapless::Vec::new();
    let entries = [RouteEntry { router_id: RouterId(10), link_quality_out: 0, link_quality_in: 0, route_cost: 2 }];
    update_route_table(&mut rows, RouterId(2), RouterId(1), 1, &entries);
    let after_first = rows.clone();
    update_route_table(&mut rows, RouterId(2), RouterId(1), 1, &entries);
    assert_eq!(rows, after_first);
}

/// Scenario 4: a stale (lower, wrap-aware) router-id sequence is rejected.
#[test]
fn router_id_sequence_rollback_rejected() {
    let mut allocator = RouterIdAllocator::new();
    for _ in 0..50 {
        allocator.advance_sequence();
    }
    assert_eq!(allocator.sequence, 50);

    assert!(!allocator.accepts_sequence(49));
    assert_eq!(allocator.sequence, 50);
}

/// Scenario 5: a replayed frame from before a key rotation is rejected.
#[test]
fn key_rotation_replay_rejected() {
    let neighbor = NeighborInfo {
        ext_addr: ext([9, 9, 9, 9, 9, 9, 9, 9]),
        rloc16: mle_core::addr::Address16::new(0x0401),
        state: NeighborState::Valid,
        mode: DeviceMode::empty(),
        link_frame_counter: 0,
        mle_frame_counter: 100,
        previous_key: false,
        last_heard_ms: 0,
        pending_challenge: None,
        link_quality_in: 3,
        link_quality_out: 3,
        rssi: 0,
    };

    assert!(!accepts_frame_counter(&neighbor, true, 95));
    assert_eq!(neighbor.mle_frame_counter, 100);
}

/// Scenario 6: a Child ID Response carrying a Route TLV with fewer routers
/// than the upgrade threshold makes the device initiate `BecomeRouter()`.
#[test]
fn router_upgrade_trigger_on_low_router_count() {
    let clock = SharedClock::new();
    let ether = Rc::new(RefCell::new(VecDeque::new()));
    let prefix = test_prefix();

    let mut config = base_config();
    config.router_upgrade_threshold = 16;

    let mut a = Node::new(ext([4, 0, 0, 0, 0, 0, 0, 1]), 40, clock.clone(), &ether, config);
    a.core.set_mesh_local_prefix(prefix);
    a.core.become_leader().unwrap();

    let mut b = Node::new(ext([5, 0, 0, 0, 0, 0, 0, 2]), 50, clock.clone(), &ether, config);
    b.core.set_mesh_local_prefix(prefix);
    b.core.start().unwrap();
    for ms in [1000, 2000] {
        advance_to(&clock, &ether, &mut [&mut a, &mut b], ms);
    }

    assert_eq!(b.core.role(), Role::Child);
    let pending = b.core.take_pending_leader_request();
    assert!(matches!(pending, Some(mle_core::platform::LeaderRequest::AddressSolicit { .. })));
}
