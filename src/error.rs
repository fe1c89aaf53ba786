//! Error taxonomy shared by every MLE subsystem.

#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// Malformed frame or TLV: truncated, absent required TLV, length mismatch.
    Parse,
    /// Bad MIC, unknown key era, or other cryptographic rejection.
    Security,
    /// Valid frame but semantically rejected (wrong partition, wrong role, stale).
    Drop,
    /// Caller invoked an API in a role that forbids it.
    InvalidState,
    /// Message buffer allocation failed; caller may retry later.
    NoBufs,
    /// Duplicate attach attempt or role transition already in progress.
    Busy,
    /// The requested state is already in effect.
    Already,
    /// Routing table holds no path to the destination.
    NoRoute,
    /// A synchronous read exceeded its bound.
    ResponseTimeout,
}

pub type Result<T> = core::result::Result<T, Error>;
