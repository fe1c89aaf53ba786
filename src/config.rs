//! Constants fixed by the MLE wire protocol, and the instance configuration
//! that is injected into an [`crate::MleCore`] at construction.
//!
//! Mirrors the teacher crate's split between `parameters::recommended`
//! (fixed, spec-mandated constants) and `Parameters` (per-instance config).

use core::time::Duration;

/// UDP port MLE datagrams are sent/received on (link-local scope).
pub const UDP_PORT: u16 = 19788;

/// Minimum child table capacity.
pub const MAX_CHILDREN: usize = 5;

/// Router IDs `0..=62` are assignable; `63` means [`crate::addr::Address16::INVALID_ROUTER_ID`].
pub const MAX_ROUTER_ID: u8 = 62;

/// Router ID `63`: "no router" / unreachable sentinel.
pub const INVALID_ROUTER_ID: u8 = 63;

/// Upper bound on routers allocated at once across a partition.
pub const MAX_ROUTERS: usize = 32;

/// Route cost values saturate at this; it also represents "no contact".
pub const MAX_ROUTE_COST: u8 = 16;

/// A router neighbor with no traffic for this long is expired.
pub const MAX_NEIGHBOR_AGE_MS: u32 = 100_000;

/// The Leader gives up on a router it hasn't heard from for this long.
pub const MAX_LEADER_TO_ROUTER_TIMEOUT_MS: u32 = 90_000;

/// A released router ID sits in `reclaim_delay` for this long before reuse.
pub const ROUTER_ID_REUSE_DELAY_MS: u32 = 100_000;

/// The Leader bumps `router_id_sequence` at least this often.
pub const ROUTER_ID_SEQUENCE_PERIOD_MS: u32 = 10_000;

/// Advertise trickle timer bounds.
pub const ADVERTISE_INTERVAL_MIN_MS: u32 = 1_000;
pub const ADVERTISE_INTERVAL_MAX_MS: u32 = 32_000;

/// Parent-request sub-machine timeouts.
pub const PARENT_REQUEST_ROUTER_TIMEOUT_MS: u32 = 1_000;
pub const PARENT_REQUEST_CHILD_TIMEOUT_MS: u32 = 2_000;

/// REED (router-eligible end device) advertisement cadence.
pub const REED_ADVERTISE_INTERVAL_MS: u32 = 570_000;
pub const REED_ADVERTISE_JITTER_MS: u32 = 60_000;

/// Periodic role/table maintenance tick.
pub const STATE_UPDATE_PERIOD_MS: u32 = 1_000;

/// MLE protocol version carried in the `Version` TLV.
pub const MLE_PROTOCOL_VERSION: u16 = 1;

/// `Instance configuration injected at construction; no part of this is persisted by the
/// core itself (the embedder is responsible for any flash/NVM persistence).
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy)]
pub struct Config {
    /// The Thread master key material used to derive per-era MLE/MAC keys.
    pub master_key: [u8; 16],
    /// Human-readable network name (not parsed or validated by this crate).
    pub network_name: [u8; 16],
    pub pan_id: u16,
    pub channel: u8,
    /// This device's leader weighting; higher wins partition elections.
    pub leader_weight: u8,
    /// How long this device tolerates not hearing a fresh Leader Data before
    /// considering the leader stale and attempting same-partition reattach.
    pub network_id_timeout: Duration,
    /// Number of active routers at or below which a Child with FFD capability
    /// is encouraged to request promotion to Router.
    pub router_upgrade_threshold: u8,
    /// Delay before a context ID may be reused after release (network-data
    /// collaborator concern; threaded through unchanged).
    pub context_id_reuse_delay: Duration,
    /// Whether this device is capable of becoming Router/Leader (FFD).
    pub is_ffd: bool,
    /// Whether the receiver should stay on between polls.
    pub rx_on_when_idle: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            master_key: [0u8; 16],
            network_name: [0u8; 16],
            pan_id: 0xffff,
            channel: 11,
            leader_weight: 64,
            network_id_timeout: Duration::from_secs(120),
            router_upgrade_threshold: 16,
            context_id_reuse_delay: Duration::from_secs(48 * 60 * 60),
            is_ffd: true,
            rx_on_when_idle: true,
        }
    }
}
