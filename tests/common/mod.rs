//! Shared harness for the end-to-end scenarios in `spec.md` §8: a handful of
//! [`mle_core::MleCore`] instances wired together over an in-memory
//! datagram medium instead of real UDP sockets, driven by a shared
//! millisecond clock the test advances explicitly.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use mle_core::addr::{self, ExtendedAddress, MeshLocalPrefix};
use mle_core::platform::{LinkInfo, MsgInfo, NetworkDataSink, RadioPlatform, UdpTransport};
use mle_core::{Clock, InboundEvent, MleCore, Result};
use no_std_net::Ipv6Addr;
use rand_core::RngCore;

/// Millisecond clock shared by every node in a scenario, advanced by the
/// test driver rather than wall time.
#[derive(Clone)]
pub struct SharedClock(Rc<RefCell<u32>>);

impl SharedClock {
    pub fn new() -> Self {
        Self(Rc::new(RefCell::new(0)))
    }

    pub fn set(&self, ms: u32) {
        *self.0.borrow_mut() = ms;
    }
}

impl Clock for SharedClock {
    fn now_ms(&self) -> u32 {
        *self.0.borrow()
    }
}

/// Deterministic xorshift64 RNG, seeded per node so distinct nodes pick
/// distinct challenges without needing real entropy.
pub struct TestRng(u64);

impl TestRng {
    pub fn new(seed: u64) -> Self {
        Self(seed | 1)
    }
}

impl RngCore for TestRng {
    fn next_u32(&mut self) -> u32 {
        self.next_u64() as u32
    }

    fn next_u64(&mut self) -> u64 {
        self.0 ^= self.0 << 13;
        self.0 ^= self.0 >> 7;
        self.0 ^= self.0 << 17;
        self.0
    }

    fn fill_bytes(&mut self, dest: &mut [u8]) {
        for chunk in dest.chunks_mut(8) {
            let v = self.next_u64().to_le_bytes();
            chunk.copy_from_slice(&v[..chunk.len()]);
        }
    }

    fn try_fill_bytes(&mut self, dest: &mut [u8]) -> core::result::Result<(), rand_core::Error> {
        self.fill_bytes(dest);
        Ok(())
    }
}

/// One queued datagram: destination address, source's own address, payload.
type Frame = (Ipv6Addr, Ipv6Addr, Vec<u8>);
pub type Ether = Rc<RefCell<VecDeque<Frame>>>;

pub struct TestPlatform {
    pub ext: ExtendedAddress,
    ether: Ether,
    pub stored_network_data: RefCell<Vec<(u8, u8, Vec<u8>)>>,
}

impl UdpTransport for TestPlatform {
    fn send_to(&mut self, info: &MsgInfo, payload: &[u8]) -> Result<()> {
        self.ether.borrow_mut().push_back((info.peer_addr, info.local_addr, payload.to_vec()));
        Ok(())
    }
}

impl RadioPlatform for TestPlatform {
    fn extended_address(&self) -> ExtendedAddress {
        self.ext
    }
    fn set_short_address(&mut self, _rloc16: mle_core::addr::Address16) {}
    fn set_pan_id(&mut self, _pan_id: u16) {}
}

impl NetworkDataSink for TestPlatform {
    fn store_network_data(&mut self, version: u8, stable_version: u8, blob: &[u8]) -> Result<()> {
        self.stored_network_data.borrow_mut().push((version, stable_version, blob.to_vec()));
        Ok(())
    }
}

pub type TestCore = MleCore<SharedClock, TestRng, TestPlatform>;

pub struct Node {
    pub ext: ExtendedAddress,
    pub core: TestCore,
}

impl Node {
    pub fn new(ext: ExtendedAddress, seed: u64, clock: SharedClock, ether: &Ether, config: mle_core::Config) -> Self {
        let platform = TestPlatform {
            ext,
            ether: ether.clone(),
            stored_network_data: RefCell::new(Vec::new()),
        };
        let core = MleCore::new(clock, TestRng::new(seed), platform, config);
        Self { ext, core }
    }

    fn link_local(&self) -> Ipv6Addr {
        addr::link_local_address(self.ext)
    }

    /// Every IPv6 address this node currently answers to: its link-local
    /// address, its RLOC (once assigned), and the realm-local all-thread-
    /// nodes multicast address for its mesh-local prefix.
    fn listens_on(&self, to: Ipv6Addr) -> bool {
        if to == self.link_local() {
            return true;
        }
        if !self.core.rloc16().is_invalid() && to == addr::rloc_address(self.core.mesh_local_prefix(), self.core.rloc16()) {
            return true;
        }
        to == addr::realm_local_all_thread_nodes(self.core.mesh_local_prefix())
    }
}

/// Deliver every queued datagram to whichever node(s) listen on its
/// destination address, skipping the sender. Repeats until the medium is
/// empty, so a single timer fire's cascade of request/response exchanges
/// settles within one call.
pub fn pump(ether: &Ether, nodes: &mut [&mut Node]) {
    loop {
        let next = ether.borrow_mut().pop_front();
        let Some((to, from, payload)) = next else { break };
        for node in nodes.iter_mut() {
            if node.link_local() == from {
                continue;
            }
            if node.listens_on(to) {
                let msg_info = MsgInfo { peer_addr: from, local_addr: to, hop_limit: 255 };
                let link_info = LinkInfo { lqi: 3, rssi: -20 };
                let _ = node.core.handle_event(InboundEvent::Datagram { msg_info, link_info, data: &payload });
            }
        }
    }
}

/// Move the shared clock to `ms`, let every node drain due timers, then
/// settle whatever datagrams that produced.
pub fn advance_to(clock: &SharedClock, ether: &Ether, nodes: &mut [&mut Node], ms: u32) {
    clock.set(ms);
    for node in nodes.iter_mut() {
        let _ = node.core.poll_timers();
    }
    pump(ether, nodes);
}

pub fn test_prefix() -> MeshLocalPrefix {
    MeshLocalPrefix([0xfd, 0x00, 0x0d, 0xb8, 0x00, 0x00, 0x00, 0x00])
}

pub fn base_config() -> mle_core::Config {
    let mut config = mle_core::Config::default();
    config.master_key = [0x5au8; 16];
    config
}
