//! Error types surfaced by this crate.
//!
//! Shaped like the teacher's `architecture::arm::mod::ArmError` and
//! `architecture::arm::memory::romtable::RomTableError`: one
//! `thiserror::Error` + `docsplay::Display` enum per logical boundary.

/// An error reported by a [`crate::transport::TransportOps`] implementation.
///
/// Owned by the transport boundary; `DapError::Transport` wraps it via
/// `#[from]`, mirroring `AccessPortError::DebugPort(#[from] DebugPortError)`
/// in the teacher's `ap_v1::mod`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error, docsplay::Display)]
pub enum TransportError {
    /// The target responded WAIT and did not clear before the retry budget
    /// was exhausted.
    Wait,
    /// The target responded FAULT.
    Fault,
    /// The physical link reported a protocol error (framing, parity, ...).
    Protocol,
    /// No ACK was received at all.
    NoAck,
    /// A sticky overrun condition was latched by the debug port.
    Overrun,
}

/// Errors surfaced by the DAP/MEM-AP driver.
#[derive(Debug, thiserror::Error, docsplay::Display)]
pub enum DapError {
    /// Transport error while flushing the transaction queue: {0}
    Transport(#[from] TransportError),

    /// Access to address {address:#010x} with size {size} bytes is
    /// unaligned or uses an unsupported access width.
    UnalignedAccess { address: u32, size: u8 },

    /// A sticky overrun condition was detected on the debug port; the DAP
    /// must be re-initialized.
    OverrunDetected,

    /// CoreSight ROM table search exhausted without a match for DEVTYPE
    /// {devtype:#04x}.
    ResourceNotAvailable { devtype: u8 },

    /// Failed to allocate the scratch buffer for a block transfer.
    AllocationFailure,

    /// `poll_register` on {register} timed out after {timeout_ms} ms.
    Timeout {
        register: &'static str,
        timeout_ms: u64,
    },

    /// Failed to parse register {name} from raw value {value:#010x}.
    RegisterParse { name: &'static str, value: u32 },

    /// DAP bring-up did not complete the power-up handshake after {attempts}
    /// attempts.
    PowerUpFailed { attempts: u8 },

    /// AP index {0} is out of range (must be 0..=255, which is every value
    /// of `u8`) -- this variant exists so call sites that build an AP index
    /// from a wider integer have somewhere to report the error.
    InvalidApIndex(u16),

    /// Block transfer failed after {transferred} of the requested bytes went
    /// through: {source}
    BlockTransferFailed {
        transferred: usize,
        #[source]
        source: Box<DapError>,
    },
}

impl DapError {
    pub fn register_parse<R: crate::register::Register>(value: u32) -> Self {
        DapError::RegisterParse {
            name: R::NAME,
            value,
        }
    }
}
