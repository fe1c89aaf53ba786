//! Mesh Link Establishment (MLE) core for a low-power 802.15.4 mesh stack.
//!
//! Supports `no_std`.
#![no_std]

pub mod addr;
pub mod codec;
pub mod config;
pub mod error;
pub mod mle;
pub mod neighbor;
pub mod platform;
pub mod routing;
pub mod security;
pub mod timer;
pub mod tlv;

pub use config::Config;
pub use error::{Error, Result};
pub use mle::{AttachFilter, Command, InboundEvent, MleCore, Role};
pub use platform::{LeaderRequest, LinkInfo, MsgInfo, NetworkDataSink, Platform, RadioPlatform, UdpTransport};
pub use timer::{Clock, TimerId};
