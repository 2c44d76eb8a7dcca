//! The physical-link capability set the DAP core consumes (spec.md §4.A).
//!
//! Grounded on the teacher's `DapAccess` trait
//! (`architecture::arm::communication_interface`) for the shape of the
//! surface, and on `examples/srwalter-jtag-adi`'s
//! `queue_read_adi_nobank`/`finish_read` split for the explicit
//! queue-then-resolve-after-flush semantics this spec requires: a read
//! enqueued here is not available until `run` has returned success, at
//! which point the caller resolves it through [`TransportOps::take`].
//!
//! Out of scope for this crate (spec.md §1): the serial-wire/scan-chain
//! byte-shifters that actually implement `TransportOps` against silicon.

use crate::error::{DapError, TransportError};

/// A handle to a read queued through [`TransportOps::queue_dp_read`] or
/// [`TransportOps::queue_ap_read`].
///
/// The value behind a `ReadSlot` is only well-defined after a `run()` that
/// returned `Ok(())`; reading it out is done via [`TransportOps::take`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadSlot(pub usize);

/// Which register domain a [`TransportOps::poll_register`] call targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollTarget {
    /// A Debug Port register, addressed by its register offset (0x0/0x4/0x8/0xC).
    Dp(u8),
    /// An Access Port register on a given AP index, addressed by its
    /// register offset within the AP's 256-byte register space.
    Ap { ap: u8, reg: u8 },
}

/// The capability set a physical link (SWD or JTAG) exposes to the DAP
/// core. See spec.md §4.A.
///
/// Implementations own the `cmd_journal` (spec.md §3) entirely; the core
/// never inspects it, only appends to it through this trait.
pub trait TransportOps {
    /// Schedule a DP register read. The result is available through
    /// [`TransportOps::take`] once `run()` has returned `Ok(())`.
    fn queue_dp_read(&mut self, reg: u8) -> ReadSlot;

    /// Schedule a DP register write.
    fn queue_dp_write(&mut self, reg: u8, value: u32);

    /// Schedule an AP register read on access port `ap`.
    fn queue_ap_read(&mut self, ap: u8, reg: u8) -> ReadSlot;

    /// Schedule an AP register write on access port `ap`.
    fn queue_ap_write(&mut self, ap: u8, reg: u8, value: u32);

    /// Flush the queue. Operations execute in enqueue order; the first
    /// failure aborts the remainder of the flush and is surfaced here.
    /// After a failure the queue is drained and every `ReadSlot` issued
    /// during this flush is left with an unspecified value.
    fn run(&mut self) -> Result<(), TransportError>;

    /// Resolve a `ReadSlot` produced by a `run()` that returned `Ok(())`.
    ///
    /// Panics if the slot was never resolved by a successful `run` --
    /// callers in this crate never call `take` without having checked
    /// `run`'s result first, so this is a programmer error, not a runtime
    /// one.
    fn take(&self, slot: ReadSlot) -> u32;

    /// Flush-and-retry until `(read(target) & mask) == expected`, or
    /// `timeout_ms` elapses. Returns the last read value on success.
    fn poll_register(
        &mut self,
        target: PollTarget,
        mask: u32,
        expected: u32,
        timeout_ms: u64,
    ) -> Result<u32, DapError>;
}
