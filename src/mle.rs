//! MLE state machine (component C6): role transitions, the attach
//! sub-machine, parent scoring, command dispatch, and periodic
//! maintenance. Ties C1–C5 together behind [`MleCore::handle_event`].

use rand_core::RngCore;

use crate::addr::{Address16, DeviceMode, ExtendedAddress, LeaderData, MeshLocalPrefix};
use crate::codec::TlvCursor;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::neighbor::{accepts_frame_counter, NeighborInfo, NeighborState, NeighborTable};
use crate::platform::{LeaderRequest, LinkInfo, MsgInfo, Platform};
use crate::routing::{link_cost, update_route_table, AdvertiseTimer, RouteTableRow, RouterId, RouterIdAllocator};
use crate::security::{self, KeyIdMode, KeyManager};
use crate::timer::{Clock, TimerId, TimerService};
use crate::tlv::{self, ScanMask, TlvType};

#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Disabled,
    Detached,
    Child,
    Router,
    Leader,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachFilter {
    AnyPartition,
    SamePartition,
    BetterPartition,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AttachState {
    Idle,
    Synchronize,
    RequestStart,
    RequestRouter,
    RequestChild,
    ChildIdRequest,
}

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Advertisement = 0,
    LinkRequest = 1,
    LinkAccept = 2,
    LinkAcceptAndRequest = 3,
    LinkReject = 4,
    DataRequest = 5,
    DataResponse = 6,
    ParentRequest = 7,
    ParentResponse = 8,
    ChildIdRequest = 9,
    ChildIdResponse = 10,
    ChildUpdateRequest = 11,
    ChildUpdateResponse = 12,
}

impl Command {
    fn from_u8(b: u8) -> Result<Self> {
        Ok(match b {
            0 => Command::Advertisement,
            1 => Command::LinkRequest,
            2 => Command::LinkAccept,
            3 => Command::LinkAcceptAndRequest,
            4 => Command::LinkReject,
            5 => Command::DataRequest,
            6 => Command::DataResponse,
            7 => Command::ParentRequest,
            8 => Command::ParentResponse,
            9 => Command::ChildIdRequest,
            10 => Command::ChildIdResponse,
            11 => Command::ChildUpdateRequest,
            12 => Command::ChildUpdateResponse,
            _ => return Err(Error::Parse),
        })
    }

    /// Commands sent before this device has a confirmed key-era relationship
    /// with the peer use the 5-byte key identifier (`spec.md` §4.3).
    fn key_id_mode(self) -> KeyIdMode {
        match self {
            Command::Advertisement
            | Command::ParentRequest
            | Command::ParentResponse
            | Command::ChildIdRequest
            | Command::LinkReject => KeyIdMode::Mode5,
            _ => KeyIdMode::Mode1,
        }
    }
}

const TIMER_ATTACH: TimerId = TimerId(0);
const TIMER_STATE_UPDATE: TimerId = TimerId(1);
const TIMER_ADVERTISE: TimerId = TimerId(2);

/// Mapped `link_quality_this_hop`/`lq{1,2,3}` connectivity score from
/// `spec.md` §4.6 parent scoring, kept around for tie-breaking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Candidate {
    ext_addr: ExtendedAddress,
    rloc16: Address16,
    leader_data: LeaderData,
    connectivity: u32,
    router_id_sequence: u8,
    challenge: [u8; 8],
}

/// Events fed into [`MleCore::handle_event`] from the single dispatch loop
/// (`spec.md` §5), replacing the source's callback-based send-done /
/// receive-done pattern.
pub enum InboundEvent<'a> {
    Datagram {
        msg_info: MsgInfo,
        link_info: LinkInfo,
        data: &'a [u8],
    },
    Timer(TimerId),
}

pub struct MleCore<C: Clock, R: RngCore, P: Platform> {
    clock: C,
    rng: R,
    platform: P,
    config: Config,

    role: Role,
    attach_state: AttachState,
    attach_filter: AttachFilter,
    attach_candidate: Option<Candidate>,

    rloc16: Address16,
    router_id: RouterId,
    leader_data: LeaderData,
    mesh_local_prefix: MeshLocalPrefix,

    neighbors: NeighborTable,
    router_ids: RouterIdAllocator,
    route_table: heapless::Vec<RouteTableRow, { crate::routing::MAX_ROUTE_ENTRIES }>,
    keys: KeyManager,
    timers: TimerService,
    advertise: AdvertiseTimer,

    /// An `AddressSolicit`/`AddressRelease` the embedder must act on (send
    /// the CoAP request itself), set by `become_router`/role-downgrade
    /// paths reached from inside command dispatch rather than returned
    /// directly, and drained via [`Self::take_pending_leader_request`] —
    /// the same message-passing shape `spec.md` §9 uses to replace
    /// callbacks elsewhere in this core.
    pending_leader_request: Option<LeaderRequest>,

    tx_buf: [u8; 512],
}

impl<C: Clock, R: RngCore, P: Platform> MleCore<C, R, P> {
    pub fn new(clock: C, rng: R, platform: P, config: Config) -> Self {
        let keys = KeyManager::new(config.master_key);
        Self {
            clock,
            rng,
            platform,
            config,
            role: Role::Disabled,
            attach_state: AttachState::Idle,
            attach_filter: AttachFilter::AnyPartition,
            attach_candidate: None,
            rloc16: Address16::INVALID,
            router_id: RouterId::INVALID,
            leader_data: LeaderData {
                partition_id: 0,
                weighting: config.leader_weight,
                data_version: 0,
                stable_data_version: 0,
                leader_router_id: RouterId::INVALID.0,
            },
            mesh_local_prefix: MeshLocalPrefix([0; 8]),
            neighbors: NeighborTable::new(),
            router_ids: RouterIdAllocator::new(),
            route_table: heapless::Vec::new(),
            keys,
            timers: TimerService::new(),
            advertise: AdvertiseTimer::new(),
            pending_leader_request: None,
            tx_buf: [0u8; 512],
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn rloc16(&self) -> Address16 {
        self.rloc16
    }

    pub fn leader_data(&self) -> LeaderData {
        self.leader_data
    }

    pub fn parent_rloc16(&self) -> Option<Address16> {
        self.neighbors.parent.as_ref().map(|p| p.rloc16)
    }

    /// Install a new mesh-local prefix. The RLOC and realm-local
    /// all-thread-nodes multicast addresses are derived from
    /// `mesh_local_prefix` on demand wherever they're needed, so there is no
    /// second cached address to refresh here.
    pub fn set_mesh_local_prefix(&mut self, prefix: MeshLocalPrefix) {
        self.mesh_local_prefix = prefix;
    }

    pub fn mesh_local_prefix(&self) -> MeshLocalPrefix {
        self.mesh_local_prefix
    }

    /// Take any `AddressSolicit`/`AddressRelease` queued for the embedder to
    /// carry out, if one is pending.
    pub fn take_pending_leader_request(&mut self) -> Option<LeaderRequest> {
        self.pending_leader_request.take()
    }

    fn now_ms(&self) -> u32 {
        self.clock.now_ms()
    }

    /// `I7`: clears every table and timer and closes the endpoint.
    pub fn stop(&mut self) {
        self.role = Role::Disabled;
        self.attach_state = AttachState::Idle;
        self.neighbors = NeighborTable::new();
        self.router_ids = RouterIdAllocator::new();
        self.route_table.clear();
        self.timers = TimerService::new();
        self.rloc16 = Address16::INVALID;
        self.router_id = RouterId::INVALID;
        self.pending_leader_request = None;
    }

    pub fn start(&mut self) -> Result<()> {
        if self.role != Role::Disabled {
            return Err(Error::InvalidState);
        }
        self.role = Role::Detached;
        self.timers.start(&self.clock, TIMER_STATE_UPDATE, crate::config::STATE_UPDATE_PERIOD_MS)?;
        self.become_child(AttachFilter::AnyPartition)
    }

    /// `BecomeChild`: arm the attach sub-machine (`spec.md` §4.6 step 1).
    pub fn become_child(&mut self, filter: AttachFilter) -> Result<()> {
        self.attach_filter = filter;
        self.attach_state = AttachState::RequestStart;
        self.attach_candidate = None;
        self.timers.start(&self.clock, TIMER_ATTACH, 1_000)
    }

    pub fn become_detached(&mut self) -> Result<()> {
        self.role = Role::Detached;
        self.rloc16 = Address16::INVALID;
        self.neighbors.parent = None;
        self.become_child(AttachFilter::AnyPartition)
    }

    /// `BecomeLeader`: allocate router id 0 for self (by convention the
    /// leader takes the lowest free id if none is already held), mark it
    /// allocated/valid/next-hop-self, and start a fresh partition.
    pub fn become_leader(&mut self) -> Result<()> {
        let now = self.now_ms();
        let id = self
            .router_ids
            .allocate(None, now)
            .ok_or(Error::NoBufs)?;
        self.router_id = id;
        self.rloc16 = Address16::from_router_child(id.0, 0);
        self.role = Role::Leader;
        self.attach_state = AttachState::Idle;
        self.timers.remove(TIMER_ATTACH);

        let ext = self.platform.extended_address();
        self.leader_data = LeaderData {
            partition_id: u32::from_be_bytes([ext.0[0], ext.0[1], ext.0[2], ext.0[3]]),
            weighting: self.config.leader_weight,
            data_version: 1,
            stable_data_version: 1,
            leader_router_id: id.0,
        };
        self.platform.set_short_address(self.rloc16);
        self.advertise.reset();
        self.timers.start(&self.clock, TIMER_ADVERTISE, self.advertise.interval_ms)
    }

    /// A REED decides to request a router id from the Leader.
    pub fn become_router(&mut self) -> Result<LeaderRequest> {
        if !self.config.is_ffd {
            return Err(Error::InvalidState);
        }
        Ok(LeaderRequest::AddressSolicit { requested_router_id: None })
    }

    pub fn handle_event(&mut self, event: InboundEvent<'_>) -> Result<()> {
        match event {
            InboundEvent::Datagram { msg_info, link_info, data } => {
                self.handle_datagram(&msg_info, &link_info, data)
            }
            InboundEvent::Timer(id) => self.handle_timer(id),
        }
    }

    /// Drain and dispatch every timer whose `fire_time` has passed, in
    /// `fire_time` order. This is step (b) of the dispatch loop described in
    /// `spec.md` §5 ("polls the radio/socket capabilities for inbound
    /// frames; drains the timer service"); the embedder calls this once per
    /// loop iteration alongside feeding inbound datagrams to
    /// [`Self::handle_event`].
    pub fn poll_timers(&mut self) -> Result<()> {
        let now = self.now_ms();
        let mut due: heapless::Vec<TimerId, { crate::timer::MAX_TIMERS }> = heapless::Vec::new();
        for id in self.timers.drain_expired(now) {
            let _ = due.push(id);
        }
        for id in due {
            self.handle_timer(id)?;
        }
        Ok(())
    }

    /// When the embedder's hardware alarm should next fire, if any timer is
    /// scheduled — what it should reprogram its single alarm to.
    pub fn next_wake_ms(&self) -> Option<u32> {
        self.timers.next_fire_time()
    }

    fn handle_timer(&mut self, id: TimerId) -> Result<()> {
        if id == TIMER_ATTACH {
            self.advance_attach()
        } else if id == TIMER_STATE_UPDATE {
            self.state_update_tick()
        } else if id == TIMER_ADVERTISE {
            self.send_advertisement()
        } else {
            Ok(())
        }
    }

    /// Periodic 1 s maintenance (`spec.md` §4.6).
    fn state_update_tick(&mut self) -> Result<()> {
        let now = self.now_ms();
        self.neighbors.purge_stale(now);

        // A route table row is only meaningful while the router it resolves
        // to (directly, or the next hop towards it) is still a neighbor we
        // know about; drop rows `purge_stale` just orphaned so a later
        // Advertisement can rediscover a path rather than this device
        // preferring a dead direct link forever (`spec.md` §8 scenario 3).
        let neighbors = &self.neighbors;
        self.route_table.retain(|row| {
            let via = row.next_hop.unwrap_or(row.router_id);
            neighbors.router_by_id(via).is_some()
        });

        if self.role == Role::Leader {
            for router in self.neighbors.routers_mut() {
                if router.next_hop.is_none() && router.info.is_stale(now, crate::config::MAX_LEADER_TO_ROUTER_TIMEOUT_MS) {
                    self.router_ids.release(router.router_id, now);
                }
            }
            self.router_ids.advance_sequence();
        }

        if matches!(self.role, Role::Child | Role::Router) {
            let leader_age = now.wrapping_sub(
                self.neighbors
                    .parent
                    .as_ref()
                    .map(|p| p.last_heard_ms)
                    .unwrap_or(now),
            );
            if leader_age as u64 * 1_000_000 > self.config.network_id_timeout.as_micros() as u64 {
                self.become_child(AttachFilter::SamePartition)?;
            }
        }

        self.timers.start(&self.clock, TIMER_STATE_UPDATE, crate::config::STATE_UPDATE_PERIOD_MS)
    }

    // ---- Attach sub-machine -------------------------------------------------

    fn advance_attach(&mut self) -> Result<()> {
        match self.attach_state {
            AttachState::RequestStart => {
                self.attach_state = AttachState::RequestRouter;
                self.send_parent_request(ScanMask::ROUTER_ONLY)?;
                self.timers.start(&self.clock, TIMER_ATTACH, crate::config::PARENT_REQUEST_ROUTER_TIMEOUT_MS)
            }
            AttachState::RequestRouter => {
                if self.attach_candidate.is_some() {
                    self.attach_state = AttachState::ChildIdRequest;
                    self.send_child_id_request()?;
                    self.timers.start(&self.clock, TIMER_ATTACH, crate::config::PARENT_REQUEST_CHILD_TIMEOUT_MS)
                } else {
                    self.attach_state = AttachState::RequestChild;
                    self.send_parent_request(ScanMask::ROUTER_AND_CHILD)?;
                    self.timers.start(&self.clock, TIMER_ATTACH, crate::config::PARENT_REQUEST_CHILD_TIMEOUT_MS)
                }
            }
            AttachState::RequestChild => {
                if self.attach_candidate.is_some() {
                    self.attach_state = AttachState::ChildIdRequest;
                    self.send_child_id_request()?;
                    self.timers.start(&self.clock, TIMER_ATTACH, crate::config::PARENT_REQUEST_CHILD_TIMEOUT_MS)
                } else {
                    match self.attach_filter {
                        AttachFilter::AnyPartition => {
                            self.attach_state = AttachState::Idle;
                            if self.config.is_ffd {
                                self.become_leader()
                            } else {
                                self.become_child(AttachFilter::AnyPartition)
                            }
                        }
                        AttachFilter::SamePartition => self.become_child(AttachFilter::AnyPartition),
                        AttachFilter::BetterPartition => {
                            self.attach_state = AttachState::Idle;
                            Ok(())
                        }
                    }
                }
            }
            AttachState::ChildIdRequest => {
                // No Child ID Response arrived in time.
                self.attach_state = AttachState::Idle;
                self.become_detached()
            }
            AttachState::Idle | AttachState::Synchronize => Ok(()),
        }
    }

    fn send_parent_request(&mut self, scan_mask: ScanMask) -> Result<()> {
        let mut challenge = [0u8; 8];
        self.rng.fill_bytes(&mut challenge);
        self.attach_candidate = None;

        let mut buf = [0u8; 64];
        let mut cursor = TlvCursor::new(&mut buf);
        cursor.push_tlv(TlvType::Version as u8, &crate::config::MLE_PROTOCOL_VERSION.to_be_bytes())?;
        cursor.push_tlv(TlvType::ScanMask as u8, &[scan_mask.bits()])?;
        cursor.push_tlv(TlvType::Challenge as u8, &challenge)?;
        self.send_command(Command::ParentRequest, None, cursor.written())
    }

    fn send_child_id_request(&mut self) -> Result<()> {
        let candidate = self.attach_candidate.ok_or(Error::InvalidState)?;
        let mut buf = [0u8; 64];
        let mut cursor = TlvCursor::new(&mut buf);
        cursor.push_tlv(TlvType::Response as u8, &candidate.challenge)?;
        cursor.push_tlv(TlvType::LinkFrameCounter as u8, &self.keys.mac_frame_counter().to_be_bytes())?;
        cursor.push_tlv(TlvType::MleFrameCounter as u8, &self.keys.mle_frame_counter().to_be_bytes())?;
        let mode = self.device_mode();
        cursor.push_tlv(TlvType::Mode as u8, &[mode.bits()])?;
        cursor.push_tlv(TlvType::Timeout as u8, &self.config.network_id_timeout.as_secs().to_be_bytes()[4..8])?;
        self.send_command(Command::ChildIdRequest, Some(candidate.ext_addr), cursor.written())
    }

    fn device_mode(&self) -> DeviceMode {
        let mut mode = DeviceMode::empty();
        if self.config.rx_on_when_idle {
            mode |= DeviceMode::RX_ON_WHEN_IDLE;
        }
        if self.config.is_ffd {
            mode |= DeviceMode::FULL_THREAD_DEVICE;
        }
        mode |= DeviceMode::FULL_NETWORK_DATA;
        mode
    }

    // ---- Outbound command framing / C3 integration --------------------------

    fn send_command(&mut self, command: Command, dest_ext: Option<ExtendedAddress>, tlvs: &[u8]) -> Result<()> {
        let mode = command.key_id_mode();
        let sequence = self.keys.current_sequence();
        let key = self.keys.current_mle_key();
        let ext = self.platform.extended_address();
        let counter = self.keys.mle_frame_counter();

        let mut buf = [0u8; 512];
        buf[0] = security::SECURITY_SUITE_ENABLED;
        buf[1] = security::build_security_control(mode);
        buf[2..6].copy_from_slice(&counter.to_le_bytes());
        let key_id = security::build_key_id(mode, sequence);
        buf[6..6 + key_id.len()].copy_from_slice(&key_id);

        let plaintext_start = 6 + key_id.len();
        let mut plaintext_len = 1 + tlvs.len();
        if plaintext_start + plaintext_len + security::MIC_LENGTH > buf.len() {
            return Err(Error::NoBufs);
        }
        buf[plaintext_start] = command as u8;
        buf[plaintext_start + 1..plaintext_start + plaintext_len].copy_from_slice(tlvs);

        let local_addr = crate::addr::link_local_address(ext);
        let peer_addr = match dest_ext {
            Some(e) => crate::addr::link_local_address(e),
            None => crate::addr::realm_local_all_thread_nodes(self.mesh_local_prefix),
        };
        let mut aad: heapless::Vec<u8, { security::MAX_AAD_LEN }> = heapless::Vec::new();
        let _ = aad.extend_from_slice(&peer_addr.octets());
        let _ = aad.extend_from_slice(&local_addr.octets());
        let _ = aad.extend_from_slice(&buf[1..plaintext_start]);

        let nonce = security::build_nonce(ext, counter, security::SECURITY_LEVEL_ENC_MIC32);
        let mic = security::ccm_encrypt(&key, &nonce, &aad, &mut buf[plaintext_start..plaintext_start + plaintext_len]);
        buf[plaintext_start + plaintext_len..plaintext_start + plaintext_len + security::MIC_LENGTH].copy_from_slice(&mic);
        plaintext_len += security::MIC_LENGTH;

        self.keys.increment_mle_frame_counter();

        let info = MsgInfo {
            peer_addr,
            local_addr,
            hop_limit: 255,
        };
        self.platform.send_to(&info, &buf[..plaintext_start + plaintext_len])
    }

    // ---- Inbound datagram pipeline (C3 receive pipeline, spec.md §4.3) ------

    fn handle_datagram(&mut self, msg_info: &MsgInfo, link_info: &LinkInfo, datagram: &[u8]) -> Result<()> {
        let parsed = security::parse_security_header(datagram)?;

        let sequence = match parsed.header.key_id {
            security::KeyIdentifier::Mode1 { index } => {
                if security::key_id_index_for_sequence(self.keys.current_sequence()) == index {
                    self.keys.current_sequence()
                } else if self
                    .keys
                    .previous_sequence()
                    .map(|s| security::key_id_index_for_sequence(s) == index)
                    .unwrap_or(false)
                {
                    self.keys.previous_sequence().expect("checked above")
                } else {
                    return Err(Error::Security);
                }
            }
            security::KeyIdentifier::Mode5 { sequence, .. } => sequence,
        };
        let using_previous_key = Some(sequence) == self.keys.previous_sequence();
        let using_future_key = sequence != self.keys.current_sequence() && !using_previous_key;
        let key = if using_future_key {
            self.keys.temporary_mle_key(sequence)
        } else if using_previous_key {
            self.keys.previous_mle_key().ok_or(Error::Security)?
        } else {
            self.keys.current_mle_key()
        };

        let peer_ext = match crate::addr::decompose_ipv6(msg_info.peer_addr) {
            crate::addr::Ipv6Decomposition::Ext(e) => e,
            crate::addr::Ipv6Decomposition::Rloc(r) => {
                self.neighbors.by_short(r).map(|n| n.ext_addr).ok_or(Error::Drop)?
            }
        };

        let nonce = security::build_nonce(peer_ext, parsed.header.frame_counter, security::SECURITY_LEVEL_ENC_MIC32);
        if parsed.ciphertext_and_mic.len() < security::MIC_LENGTH {
            return Err(Error::Parse);
        }
        let body_len = parsed.ciphertext_and_mic.len() - security::MIC_LENGTH;
        let mut plaintext: heapless::Vec<u8, 512> =
            heapless::Vec::from_slice(&parsed.ciphertext_and_mic[..body_len]).map_err(|_| Error::NoBufs)?;
        let mut mic = [0u8; security::MIC_LENGTH];
        mic.copy_from_slice(&parsed.ciphertext_and_mic[body_len..]);
        let mut aad: heapless::Vec<u8, { security::MAX_AAD_LEN }> = heapless::Vec::new();
        aad.extend_from_slice(&msg_info.peer_addr.octets()).map_err(|_| Error::NoBufs)?;
        aad.extend_from_slice(&msg_info.local_addr.octets()).map_err(|_| Error::NoBufs)?;
        aad.extend_from_slice(&parsed.header_bytes[1..]).map_err(|_| Error::NoBufs)?;

        security::ccm_decrypt(&key, &nonce, &aad, &mut plaintext, &mic)?;

        if !using_future_key && sequence > self.keys.current_sequence() {
            self.keys.advance_to(sequence);
        }

        if plaintext.is_empty() {
            return Err(Error::Parse);
        }
        let command = Command::from_u8(plaintext[0])?;
        let body = &plaintext[1..];

        // Stale-neighbor rule (spec.md §4.4): an rloc16 mismatch invalidates
        // the old entry before further processing.
        if let Ok(reported) = tlv::read_source_address(body) {
            if let Some(existing) = self.neighbors.by_ext(peer_ext) {
                if existing.rloc16 != reported && existing.rloc16 != Address16::INVALID {
                    self.neighbors.remove_child(peer_ext);
                }
            }
        }

        if let Some(neighbor) = self.neighbors.by_ext(peer_ext) {
            if neighbor.is_state_valid() && !accepts_frame_counter(neighbor, using_previous_key, parsed.header.frame_counter) {
                return Err(Error::Drop);
            }
        }

        let now = self.now_ms();
        self.dispatch_command(command, peer_ext, body, link_info, now)?;
        self.neighbors
            .record_accepted_frame(peer_ext, parsed.header.frame_counter, using_previous_key, now);
        Ok(())
    }

    fn dispatch_command(
        &mut self,
        command: Command,
        sender: ExtendedAddress,
        body: &[u8],
        link_info: &LinkInfo,
        now: u32,
    ) -> Result<()> {
        match command {
            Command::Advertisement => self.on_advertisement(sender, body, link_info, now),
            Command::ParentRequest => self.on_parent_request(sender, body, link_info, now),
            Command::ParentResponse => self.on_parent_response(sender, body),
            Command::ChildIdRequest => self.on_child_id_request(sender, body, now),
            Command::ChildIdResponse => self.on_child_id_response(body),
            Command::ChildUpdateRequest => self.on_child_update_request(sender, body, now),
            Command::ChildUpdateResponse => self.on_child_update_response(body),
            Command::DataRequest => self.on_data_request(sender, body),
            Command::LinkRequest | Command::LinkAccept | Command::LinkAcceptAndRequest | Command::LinkReject => {
                // Router-to-router link establishment; no-op for Child role.
                Ok(())
            }
            Command::DataResponse => Ok(()),
        }
    }

    fn on_advertisement(&mut self, sender: ExtendedAddress, body: &[u8], link_info: &LinkInfo, now: u32) -> Result<()> {
        let source = tlv::read_source_address(body)?;
        let leader_data = tlv::read_leader_data(body)?;

        let entry = self.neighbors.add_or_get_router(sender, RouterId(source.router_id()), now)?;
        entry.info.last_heard_ms = now;
        entry.info.rloc16 = source;
        entry.info.link_quality_in = link_info.lqi.min(3);
        entry.info.state = NeighborState::Valid;

        if leader_data.partition_id != self.leader_data.partition_id && self.role != Role::Detached {
            // Partition mismatch: consider a same-partition style reattach
            // only if this neighbor looks more attractive; conservative
            // default is to ignore foreign-partition advertisements.
            return Ok(());
        }
        self.leader_data = leader_data;

        if let Some(route_span) = crate::codec::find_tlv(body, TlvType::Route as u8) {
            let value = &body[route_span.value_offset..route_span.value_offset + route_span.length];
            let (sequence, entries) = crate::routing::decode_route_tlv(value)?;
            if self.router_ids.accepts_sequence(sequence) || self.role == Role::Detached {
                self.router_ids.sequence = sequence;
                let mut allocated_ids: heapless::Vec<RouterId, { crate::routing::MAX_ROUTE_ENTRIES }> = heapless::Vec::new();
                for e in entries.iter() {
                    let _ = allocated_ids.push(e.router_id);
                }
                self.router_ids.apply_allocation_bitmap(&allocated_ids);
                let self_entry = entries.iter().find(|e| e.router_id.0 == source.router_id());
                let cost = link_cost(
                    self_entry.map(|e| e.link_quality_in).unwrap_or(0),
                    self_entry.map(|e| e.link_quality_out).unwrap_or(0),
                );
                update_route_table(&mut self.route_table, self.router_id, RouterId(source.router_id()), cost, &entries);

                if self.role == Role::Router && !self.router_ids.is_allocated(self.router_id) {
                    self.become_detached()?;
                }
            }
        }
        Ok(())
    }

    fn on_parent_request(&mut self, sender: ExtendedAddress, body: &[u8], link_info: &LinkInfo, now: u32) -> Result<()> {
        // `spec.md` §4.6 scan mask gating: a Router/Leader answers a
        // `ROUTER` mask, an FFD Child (a router-eligible end device) answers
        // a `CHILD` mask. Anything else isn't an eligible responder for this
        // request and silently ignores it.
        let is_router_eligible_responder = matches!(self.role, Role::Router | Role::Leader);
        let is_child_eligible_responder = self.role == Role::Child && self.config.is_ffd;
        if !is_router_eligible_responder && !is_child_eligible_responder {
            return Ok(());
        }
        let scan_mask = tlv::read_scan_mask(body)?;
        let eligible = if is_router_eligible_responder {
            scan_mask.contains(ScanMask::ROUTER)
        } else {
            scan_mask.contains(ScanMask::CHILD)
        };
        if !eligible {
            return Ok(());
        }
        let challenge = tlv::read_challenge(body)?;

        if self.neighbors.add_child(sender, now).is_err() {
            // Either already a known child (fine, refresh it below) or the
            // table is full (nothing more to do; still answer if it's a
            // pre-existing child sending a fresh Parent Request).
        }
        if let Some(child) = self.neighbors.children_mut().iter_mut().find(|c| c.info.ext_addr == sender) {
            child.info.state = NeighborState::ParentRequest;
            child.info.pending_challenge = Some(challenge);
        }

        let connectivity = (link_info.lqi as u32) << 24;
        let mut buf = [0u8; 96];
        let mut cursor = TlvCursor::new(&mut buf);
        cursor.push_tlv(TlvType::SourceAddress as u8, &self.rloc16.raw().to_be_bytes())?;
        let mut ld = [0u8; 8];
        ld[0..4].copy_from_slice(&self.leader_data.partition_id.to_be_bytes());
        ld[4] = self.leader_data.weighting;
        ld[5] = self.leader_data.data_version;
        ld[6] = self.leader_data.stable_data_version;
        ld[7] = self.leader_data.leader_router_id;
        cursor.push_tlv(TlvType::LeaderData as u8, &ld)?;
        cursor.push_tlv(TlvType::LinkFrameCounter as u8, &self.keys.mac_frame_counter().to_be_bytes())?;
        cursor.push_tlv(TlvType::MleFrameCounter as u8, &self.keys.mle_frame_counter().to_be_bytes())?;
        cursor.push_tlv(TlvType::Response as u8, &challenge)?;
        cursor.push_tlv(TlvType::LinkMargin as u8, &[link_info.rssi.max(0) as u8])?;
        tlv::write_connectivity(&mut cursor, connectivity)?;
        cursor.push_tlv(TlvType::Version as u8, &crate::config::MLE_PROTOCOL_VERSION.to_be_bytes())?;
        self.send_command(Command::ParentResponse, Some(sender), cursor.written())
    }

    fn on_parent_response(&mut self, sender: ExtendedAddress, body: &[u8]) -> Result<()> {
        if !matches!(self.attach_state, AttachState::RequestRouter | AttachState::RequestChild) {
            return Ok(());
        }
        let source = tlv::read_source_address(body)?;
        let leader_data = tlv::read_leader_data(body)?;
        let response = tlv::read_response(body)?;
        let connectivity = tlv::read_connectivity(body).unwrap_or(0);

        let candidate = Candidate {
            ext_addr: sender,
            rloc16: source,
            leader_data,
            connectivity,
            router_id_sequence: self.router_ids.sequence,
            challenge: response,
        };

        let better = match &self.attach_candidate {
            None => true,
            Some(current) => is_better_candidate(self.attach_filter, &candidate, current),
        };
        if better {
            self.attach_candidate = Some(candidate);
        }
        Ok(())
    }

    fn on_child_id_request(&mut self, sender: ExtendedAddress, body: &[u8], now: u32) -> Result<()> {
        if !matches!(self.role, Role::Router | Role::Leader) {
            return Ok(());
        }
        let mode = tlv::read_mode(body)?;
        let timeout = tlv::read_u32(body, TlvType::Timeout)?;

        let child_id = self.allocate_child_id(now)?;
        let child = self
            .neighbors
            .children_mut()
            .iter_mut()
            .find(|c| c.info.ext_addr == sender)
            .ok_or(Error::Drop)?;
        child.info.mode = mode;
        child.timeout_ms = timeout.saturating_mul(1000);
        child.info.rloc16 = child_id;
        child.info.state = NeighborState::Valid;
        child.info.last_heard_ms = now;

        let mut buf = [0u8; 96];
        let mut cursor = TlvCursor::new(&mut buf);
        cursor.push_tlv(TlvType::SourceAddress as u8, &self.rloc16.raw().to_be_bytes())?;
        let mut ld = [0u8; 8];
        ld[0..4].copy_from_slice(&self.leader_data.partition_id.to_be_bytes());
        ld[4] = self.leader_data.weighting;
        ld[5] = self.leader_data.data_version;
        ld[6] = self.leader_data.stable_data_version;
        ld[7] = self.leader_data.leader_router_id;
        cursor.push_tlv(TlvType::LeaderData as u8, &ld)?;
        cursor.push_tlv(TlvType::Address16 as u8, &child_id.raw().to_be_bytes())?;
        if matches!(self.role, Role::Router | Role::Leader) {
            let entries = self.route_tlv_entries();
            let route = crate::routing::encode_route_tlv(self.router_ids.sequence, &entries)?;
            cursor.push_tlv(TlvType::Route as u8, &route)?;
        }
        self.send_command(Command::ChildIdResponse, Some(sender), cursor.written())
    }

    /// This device's route table as Route-TLV entries, shared by
    /// Advertisement and Child ID Response (`spec.md` §4.6 command table).
    fn route_tlv_entries(&self) -> heapless::Vec<crate::routing::RouteEntry, { crate::routing::MAX_ROUTE_ENTRIES }> {
        self.route_table
            .iter()
            .map(|r| crate::routing::RouteEntry {
                router_id: r.router_id,
                link_quality_out: 0,
                link_quality_in: 0,
                route_cost: r.cost,
            })
            .collect()
    }

    fn allocate_child_id(&self, _now: u32) -> Result<Address16> {
        for cid in 1..1024u16 {
            let candidate = Address16::from_router_child(self.router_id.0, cid);
            if self.neighbors.by_short(candidate).is_none() {
                return Ok(candidate);
            }
        }
        Err(Error::NoBufs)
    }

    fn on_child_id_response(&mut self, body: &[u8]) -> Result<()> {
        if self.attach_state != AttachState::ChildIdRequest {
            return Ok(());
        }
        let candidate = self.attach_candidate.ok_or(Error::Drop)?;
        let rloc16 = tlv::read_address16(body)?;
        let leader_data = tlv::read_leader_data(body)?;

        self.rloc16 = rloc16;
        self.leader_data = leader_data;
        self.role = Role::Child;
        self.attach_state = AttachState::Idle;
        self.timers.remove(TIMER_ATTACH);
        self.platform.set_short_address(rloc16);

        let mut parent = NeighborInfo::new(candidate.ext_addr, self.now_ms());
        parent.rloc16 = candidate.rloc16;
        parent.state = NeighborState::Valid;
        self.neighbors.parent = Some(parent);

        if let Some(route_span) = crate::codec::find_tlv(body, TlvType::Route as u8) {
            let value = &body[route_span.value_offset..route_span.value_offset + route_span.length];
            let (_, entries) = crate::routing::decode_route_tlv(value)?;
            if (entries.len() as u8) < self.config.router_upgrade_threshold && self.config.is_ffd {
                if let Ok(req) = self.become_router() {
                    self.pending_leader_request = Some(req);
                }
            }
        }
        Ok(())
    }

    fn on_child_update_request(&mut self, sender: ExtendedAddress, body: &[u8], now: u32) -> Result<()> {
        let mode = tlv::read_mode(body)?;
        if let Some(child) = self.neighbors.children_mut().iter_mut().find(|c| c.info.ext_addr == sender) {
            child.info.mode = mode;
            child.info.last_heard_ms = now;
        }
        let mut buf = [0u8; 8];
        let mut cursor = TlvCursor::new(&mut buf);
        cursor.push_tlv(TlvType::Status as u8, &[])?;
        self.send_command(Command::ChildUpdateResponse, Some(sender), cursor.written())
    }

    /// A Status TLV here means the parent rejected the update; only treat it
    /// as a signal to reattach while this device actually still believes it
    /// has a valid rloc16 (a Detached device with `rloc16 == INVALID` has
    /// nothing to recover from and must not re-enter `become_detached`,
    /// closing the Design Note's open precondition question; see
    /// `DESIGN.md`).
    fn on_child_update_response(&mut self, body: &[u8]) -> Result<()> {
        if tlv::read_status(body).is_some() && !self.rloc16.is_invalid() {
            self.become_detached()?;
        }
        Ok(())
    }

    fn on_data_request(&mut self, sender: ExtendedAddress, _body: &[u8]) -> Result<()> {
        let mut buf = [0u8; 16];
        let mut cursor = TlvCursor::new(&mut buf);
        tlv::write_leader_data(&mut cursor, &self.leader_data)?;
        self.send_command(Command::DataResponse, Some(sender), cursor.written())
    }

    fn send_advertisement(&mut self) -> Result<()> {
        let mut buf = [0u8; 96];
        let mut cursor = TlvCursor::new(&mut buf);
        cursor.push_tlv(TlvType::SourceAddress as u8, &self.rloc16.raw().to_be_bytes())?;
        let mut ld = [0u8; 8];
        ld[0..4].copy_from_slice(&self.leader_data.partition_id.to_be_bytes());
        ld[4] = self.leader_data.weighting;
        ld[5] = self.leader_data.data_version;
        ld[6] = self.leader_data.stable_data_version;
        ld[7] = self.leader_data.leader_router_id;
        cursor.push_tlv(TlvType::LeaderData as u8, &ld)?;

        if matches!(self.role, Role::Router | Role::Leader) {
            let entries = self.route_tlv_entries();
            let route = crate::routing::encode_route_tlv(self.router_ids.sequence, &entries)?;
            cursor.push_tlv(TlvType::Route as u8, &route)?;
        }

        self.send_command(Command::Advertisement, None, cursor.written())?;
        self.advertise.backoff();
        self.timers.start(&self.clock, TIMER_ADVERTISE, self.advertise.interval_ms)
    }
}

/// `spec.md` §4.6 parent scoring: compare `leader_weighting`, then
/// `partition_id` (skipped when reattaching within the same partition, since
/// every candidate necessarily shares it), then the connectivity metric
/// (`(lq_this_hop << 24) | (lq3 << 16) | (lq2 << 8) | lq1`). Ties resolve to
/// keeping the current candidate (strict `<`, not `<=` — this crate decides
/// the Design Note's open tie-break question in favor of strict ordering;
/// see `DESIGN.md`).
fn is_better_candidate(filter: AttachFilter, candidate: &Candidate, current: &Candidate) -> bool {
    if candidate.leader_data.weighting != current.leader_data.weighting {
        return candidate.leader_data.weighting > current.leader_data.weighting;
    }
    if filter != AttachFilter::SamePartition && candidate.leader_data.partition_id != current.leader_data.partition_id {
        return candidate.leader_data.partition_id > current.leader_data.partition_id;
    }
    candidate.connectivity > current.connectivity
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::{MsgInfo, UdpTransport};

    struct TestClock(core::cell::Cell<u32>);
    impl Clock for TestClock {
        fn now_ms(&self) -> u32 {
            self.0.get()
        }
    }

    struct TestRng;
    impl RngCore for TestRng {
        fn next_u32(&mut self) -> u32 {
            0x1234_5678
        }
        fn next_u64(&mut self) -> u64 {
            0x1234_5678_9abc_def0
        }
        fn fill_bytes(&mut self, dest: &mut [u8]) {
            for (i, b) in dest.iter_mut().enumerate() {
                *b = i as u8;
            }
        }
        fn try_fill_bytes(&mut self, dest: &mut [u8]) -> core::result::Result<(), rand_core::Error> {
            self.fill_bytes(dest);
            Ok(())
        }
    }

    struct TestPlatform {
        ext: ExtendedAddress,
        sent: heapless::Vec<heapless::Vec<u8, 512>, 8>,
    }
    impl UdpTransport for TestPlatform {
        fn send_to(&mut self, _info: &MsgInfo, payload: &[u8]) -> Result<()> {
            let _ = self.sent.push(heapless::Vec::from_slice(payload).unwrap_or_default());
            Ok(())
        }
    }
    impl crate::platform::RadioPlatform for TestPlatform {
        fn extended_address(&self) -> ExtendedAddress {
            self.ext
        }
        fn set_short_address(&mut self, _rloc16: Address16) {}
        fn set_pan_id(&mut self, _pan_id: u16) {}
    }
    impl crate::platform::NetworkDataSink for TestPlatform {
        fn store_network_data(&mut self, _version: u8, _stable_version: u8, _blob: &[u8]) -> Result<()> {
            Ok(())
        }
    }

    fn make_core() -> MleCore<TestClock, TestRng, TestPlatform> {
        let platform = TestPlatform {
            ext: ExtendedAddress([1, 2, 3, 4, 5, 6, 7, 8]),
            sent: heapless::Vec::new(),
        };
        let mut config = Config::default();
        config.is_ffd = true;
        MleCore::new(TestClock(core::cell::Cell::new(0)), TestRng, platform, config)
    }

    #[test]
    fn become_leader_satisfies_testable_property() {
        let mut core = make_core();
        core.role = Role::Detached;
        core.become_leader().unwrap();
        assert_eq!(core.role(), Role::Leader);
        assert!(core.router_ids.is_allocated(core.router_id));
        let self_router = core.router_id;
        assert_eq!(core.rloc16().router_id(), self_router.0);
    }

    #[test]
    fn start_arms_attach_sub_machine() {
        let mut core = make_core();
        core.start().unwrap();
        assert_eq!(core.role(), Role::Detached);
        assert!(core.timers.is_running(TIMER_ATTACH));
    }

    #[test]
    fn attach_falls_back_to_leader_when_ffd_and_no_parent_found() {
        let mut core = make_core();
        core.start().unwrap();
        core.advance_attach().unwrap(); // RequestStart -> RequestRouter
        core.advance_attach().unwrap(); // RequestRouter -> RequestChild (no candidate)
        core.advance_attach().unwrap(); // RequestChild -> BecomeLeader (AnyPartition, FFD)
        assert_eq!(core.role(), Role::Leader);
    }

    #[test]
    fn stop_clears_role_and_tables() {
        let mut core = make_core();
        core.start().unwrap();
        core.stop();
        assert_eq!(core.role(), Role::Disabled);
        assert!(!core.timers.is_running(TIMER_ATTACH));
    }

    fn parent_request_body(mask: ScanMask) -> heapless::Vec<u8, 64> {
        let mut buf = [0u8; 64];
        let mut cursor = TlvCursor::new(&mut buf);
        cursor.push_tlv(TlvType::Version as u8, &crate::config::MLE_PROTOCOL_VERSION.to_be_bytes()).unwrap();
        cursor.push_tlv(TlvType::ScanMask as u8, &[mask.bits()]).unwrap();
        cursor.push_tlv(TlvType::Challenge as u8, &[0u8; 8]).unwrap();
        heapless::Vec::from_slice(cursor.written()).unwrap()
    }

    const LINK: LinkInfo = LinkInfo { lqi: 3, rssi: -20 };

    /// `spec.md` §8 scenario 2: a `RouterOnly` mask is only answered by
    /// Router/Leader devices; a `Router|Child` mask is also answered by an
    /// FFD Child.
    #[test]
    fn parent_request_scan_mask_gates_child_responder() {
        let sender = ExtendedAddress([9, 9, 9, 9, 9, 9, 9, 9]);

        let mut leader = make_core();
        leader.become_leader().unwrap();
        leader.on_parent_request(sender, &parent_request_body(ScanMask::ROUTER_ONLY), &LINK, 0).unwrap();
        assert!(leader.neighbors.by_ext(sender).is_some());

        let mut child = make_core();
        child.role = Role::Child;
        child.rloc16 = Address16::from_router_child(1, 2);
        child.router_id = RouterId(1);
        child.on_parent_request(sender, &parent_request_body(ScanMask::ROUTER_ONLY), &LINK, 0).unwrap();
        assert!(child.neighbors.by_ext(sender).is_none(), "a Child must not answer a RouterOnly mask");

        let mut child2 = make_core();
        child2.role = Role::Child;
        child2.rloc16 = Address16::from_router_child(1, 3);
        child2.router_id = RouterId(1);
        child2.on_parent_request(sender, &parent_request_body(ScanMask::ROUTER_AND_CHILD), &LINK, 0).unwrap();
        assert!(child2.neighbors.by_ext(sender).is_some(), "an FFD Child must answer a Router|Child mask");
    }

    /// `spec.md` §8 scenario 3: once a direct neighbor the route table
    /// trusted as the path to a router goes silent long enough to be
    /// purged, a later Advertisement reporting an indirect path to that
    /// same router id is free to install it, rather than the dead direct
    /// row blocking the update forever.
    #[test]
    fn route_table_drops_orphaned_row_then_adopts_indirect_path() {
        let mut core = make_core();
        core.role = Role::Router;
        core.router_id = RouterId(2);

        let c_ext = ExtendedAddress([10, 10, 10, 10, 10, 10, 10, 10]);
        core.neighbors.add_or_get_router(c_ext, RouterId(10), 0).unwrap();
        let _ = core.route_table.push(RouteTableRow { router_id: RouterId(10), next_hop: None, cost: 0 });

        let a_ext = ExtendedAddress([1, 1, 1, 1, 1, 1, 1, 1]);
        core.neighbors.add_or_get_router(a_ext, RouterId(1), crate::config::MAX_NEIGHBOR_AGE_MS + 1).unwrap();

        core.clock.0.set(crate::config::MAX_NEIGHBOR_AGE_MS + 1);
        core.state_update_tick().unwrap();
        assert!(core.route_table.iter().find(|r| r.router_id == RouterId(10)).is_none());

        let entries = [crate::routing::RouteEntry { router_id: RouterId(10), link_quality_out: 0, link_quality_in: 0, route_cost: 2 }];
        update_route_table(&mut core.route_table, core.router_id, RouterId(1), 1, &entries);

        let row = core.route_table.iter().find(|r| r.router_id == RouterId(10)).unwrap();
        assert_eq!(row.next_hop, Some(RouterId(1)));
        assert_eq!(row.cost, 3);
    }
}
