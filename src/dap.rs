//! The DAP object, per-AP state, DP bring-up, and AP discovery (spec.md
//! §3, §4.B, §4.F, §4.G).
//!
//! `Dap::dp_init` generalizes the teacher's `sequences::debug_port_start`
//! into the bounded 10-attempt retry loop spec.md §4.F requires, rather
//! than the teacher's single pass plus line-reset-on-NACK fallback.
//! `Dap::find_ap` is grounded on `ap_v1::get_ap_by_idr` (continue past a
//! read error) but `Dap::find_aps` -- absent here because spec.md only
//! asks for a single match -- would need the `filter_map` fix described
//! against `ap_v1::valid_access_ports_allowlist`; `find_ap` never had the
//! `map_while` bug to begin with, since it already continues scanning on
//! every iteration regardless of a given AP's read outcome.

use crate::error::DapError;
use crate::register::{
    Abort, ApType, Base, Ctrl, Idr, Register, Select, IDR_JEP106_ARM, IDR_JEP106_MASK,
    IDR_TYPE_MASK,
};
use crate::transport::{PollTarget, ReadSlot, TransportOps};

/// Number of AP slots a DAP owns (every value of `u8`, spec.md §3).
pub const NUM_APS: usize = 256;

const BRINGUP_ATTEMPTS: u8 = 10;
const POWER_ACK_TIMEOUT_MS: u64 = 10;

/// Per-AP state: cached registers, the AP's fixed CSW overlay bits, and
/// the quirks that only make sense scoped to a single AP.
///
/// Back-references its owning `Dap` only through `ap_num`, never through a
/// pointer, per the DESIGN NOTES cyclic-reference guidance.
#[derive(Debug, Clone, Copy)]
pub struct ApState {
    pub ap_num: u8,
    csw_cache: Option<u32>,
    tar_cache: Option<u32>,
    csw_default: u32,
    memaccess_tck: u8,
    pub tar_autoincr_block: u32,
    pub packed_transfers: bool,
    pub unaligned_access_bad: bool,
}

impl ApState {
    fn new(ap_num: u8) -> Self {
        ApState {
            ap_num,
            csw_cache: None,
            tar_cache: None,
            csw_default: 0,
            memaccess_tck: 0,
            tar_autoincr_block: 1024,
            packed_transfers: false,
            unaligned_access_bad: false,
        }
    }

    pub fn csw_cache(&self) -> Option<u32> {
        self.csw_cache
    }

    pub fn tar_cache(&self) -> Option<u32> {
        self.tar_cache
    }

    pub fn csw_default(&self) -> u32 {
        self.csw_default
    }

    pub fn memaccess_tck(&self) -> u8 {
        self.memaccess_tck
    }

    fn invalidate_cache(&mut self) {
        self.csw_cache = None;
        self.tar_cache = None;
    }

    pub(crate) fn set_csw_cache(&mut self, value: u32) {
        self.csw_cache = Some(value);
    }

    pub(crate) fn set_tar_cache(&mut self, value: u32) {
        self.tar_cache = Some(value);
    }

    /// Toggles the CSW `SPROT` bit (bit 23) in this AP's default overlay
    /// (spec.md §6 `apcsw sprot`).
    pub fn set_sprot(&mut self, enable: bool) {
        const SPROT_BIT: u32 = 1 << 23;
        if enable {
            self.csw_default |= SPROT_BIT;
        } else {
            self.csw_default &= !SPROT_BIT;
        }
    }

    /// Sets the extra link TCK cycles inserted after each access on this AP
    /// (spec.md §6 `memaccess cycles`). Purely descriptive state: a
    /// `TransportOps` implementation that wants to honor it reads it back
    /// off the AP slot, since the queue interface itself carries no
    /// per-call cycle-count parameter.
    pub fn set_memaccess_tck(&mut self, cycles: u8) {
        self.memaccess_tck = cycles;
    }
}

/// The DAP: a process-local handle to one debug session over one
/// transport. Not `Send`/`Sync` beyond what `T` itself provides --
/// single-threaded, single-session, by design (spec.md §5).
pub struct Dap<T: TransportOps> {
    transport: T,
    select_cache: Option<u32>,
    dp_ctrl_stat: u32,
    pub apsel: u8,
    pub ti_be_32_quirks: bool,
    ap: Box<[ApState; NUM_APS]>,
}

impl<T: TransportOps> Dap<T> {
    /// `dap_init` (spec.md §6): builds a DAP handle over `transport`, with
    /// every AP slot in its reset state.
    pub fn new(transport: T) -> Self {
        let ap = Box::new(std::array::from_fn(|i| ApState::new(i as u8)));
        Dap {
            transport,
            select_cache: None,
            dp_ctrl_stat: 0,
            apsel: 0,
            ti_be_32_quirks: false,
            ap,
        }
    }

    pub fn ap(&self, ap_num: u8) -> &ApState {
        &self.ap[ap_num as usize]
    }

    pub fn ap_mut(&mut self, ap_num: u8) -> &mut ApState {
        &mut self.ap[ap_num as usize]
    }

    pub fn dp_ctrl_stat(&self) -> u32 {
        self.dp_ctrl_stat
    }

    /// Enables the BE-32 byte-lane-swap workaround globally and forces
    /// `packed_transfers` off / `unaligned_access_bad` on for every AP,
    /// per `mem_ap_init`'s quirk interaction (spec.md §4.H). Already
    /// initialized APs are refreshed so the setting takes effect without
    /// requiring a re-`mem_ap_init`.
    pub fn set_ti_be_32_quirks(&mut self, enable: bool) {
        self.ti_be_32_quirks = enable;
        for ap in self.ap.iter_mut() {
            if enable {
                ap.packed_transfers = false;
            }
            ap.unaligned_access_bad = enable;
        }
    }

    /// Flushes the transport's queue. On failure, every AP's cached CSW/TAR
    /// and the DP_SELECT shadow are invalidated, per spec.md §5's ordering
    /// rule that a failed flush leaves all cached state stale.
    pub fn run(&mut self) -> Result<(), DapError> {
        match self.transport.run() {
            Ok(()) => Ok(()),
            Err(e) => {
                self.invalidate_all_caches();
                Err(e.into())
            }
        }
    }

    pub fn take(&self, slot: ReadSlot) -> u32 {
        self.transport.take(slot)
    }

    pub(crate) fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub(crate) fn invalidate_all_caches(&mut self) {
        self.select_cache = None;
        for ap in self.ap.iter_mut() {
            ap.invalidate_cache();
        }
    }

    /// Writes DP_SELECT only if it differs from the cached value, mirroring
    /// `examples/srwalter-jtag-adi/src/lib.rs`'s `bank_select` elision.
    fn select(&mut self, value: u32) -> Result<(), DapError> {
        if self.select_cache != Some(value) {
            self.transport.queue_dp_write(Select::ADDRESS, value);
            self.run()?;
            self.select_cache = Some(value);
        }
        Ok(())
    }

    /// `dap_dp_init` (spec.md §4.F): power-domain bring-up, retried up to
    /// [`BRINGUP_ATTEMPTS`] times. Each attempt clears sticky errors, raises
    /// `CDBGPWRUPREQ`/`CSYSPWRUPREQ`, polls for both acks, then arms
    /// overrun-detect. Any step failing skips straight to the next attempt.
    pub fn dp_init(&mut self) -> Result<(), DapError> {
        self.select(0)?;

        let mut last_err = None;
        for attempt in 1..=BRINGUP_ATTEMPTS {
            tracing::debug!(attempt, "DAP bring-up attempt");
            match self.try_power_up() {
                Ok(()) => {
                    tracing::debug!(attempt, "DAP bring-up succeeded");
                    return Ok(());
                }
                Err(e) => {
                    tracing::debug!(attempt, error = %e, "bring-up attempt failed, retrying");
                    last_err = Some(e);
                }
            }
        }
        Err(last_err.unwrap_or(DapError::PowerUpFailed {
            attempts: BRINGUP_ATTEMPTS,
        }))
    }

    fn try_power_up(&mut self) -> Result<(), DapError> {
        let pending = self.transport.queue_dp_read(Ctrl::ADDRESS);
        self.run()?;
        let _ = self.transport.take(pending);

        let mut abort = Abort(0);
        abort.set_dapabort(false);
        abort.set_stkerrclr(true);
        abort.set_wderrclr(true);
        abort.set_stkcmpclr(true);
        abort.set_orunerrclr(true);
        self.transport.queue_dp_write(Abort::ADDRESS, abort.into());
        self.run()?;

        let after_clear = self.transport.queue_dp_read(Ctrl::ADDRESS);
        self.run()?;
        let _ = self.transport.take(after_clear);

        let mut ctrl = Ctrl::default();
        ctrl.set_cdbgpwrupreq(true);
        ctrl.set_csyspwrupreq(true);
        self.transport.queue_dp_write(Ctrl::ADDRESS, ctrl.into());
        self.run()?;

        const CDBGPWRUPACK: u32 = 1 << 29;
        self.transport.poll_register(
            PollTarget::Dp(Ctrl::ADDRESS),
            CDBGPWRUPACK,
            CDBGPWRUPACK,
            POWER_ACK_TIMEOUT_MS,
        )?;

        const CSYSPWRUPACK: u32 = 1 << 31;
        self.transport.poll_register(
            PollTarget::Dp(Ctrl::ADDRESS),
            CSYSPWRUPACK,
            CSYSPWRUPACK,
            POWER_ACK_TIMEOUT_MS,
        )?;

        ctrl.set_orun_detect(true);
        self.transport.queue_dp_write(Ctrl::ADDRESS, ctrl.into());
        self.run()?;

        let final_read = self.transport.queue_dp_read(Ctrl::ADDRESS);
        self.run()?;
        self.dp_ctrl_stat = self.transport.take(final_read);
        Ok(())
    }

    /// `dap_find_ap` (spec.md §4.G): scans every AP index, matching on
    /// designer and type. A read error on one AP does not abort the scan --
    /// it is logged at `trace` level and the cursor moves on, since missing
    /// APs may surface as transport errors rather than an all-zero IDR on
    /// some links.
    #[tracing::instrument(skip(self))]
    pub fn find_ap(&mut self, requested_type: ApType) -> Option<u8> {
        for ap_num in 0..=255u8 {
            let slot = self.transport.queue_ap_read(ap_num, Idr::ADDRESS);
            match self.run() {
                Ok(()) => {
                    let raw = self.transport.take(slot);
                    if raw & IDR_JEP106_MASK == IDR_JEP106_ARM
                        && raw & IDR_TYPE_MASK == requested_type as u32
                    {
                        tracing::debug!(ap_num, idr = raw, "found matching AP");
                        return Some(ap_num);
                    }
                }
                Err(e) => {
                    tracing::trace!(ap_num, error = %e, "AP probe failed, continuing scan");
                }
            }
        }
        None
    }

    /// `dap_get_debugbase` (spec.md §4.G): reads an AP's MEM-AP BASE and
    /// IDR together in a single flush.
    pub fn get_debugbase(&mut self, ap_num: u8) -> Result<(u32, u32), DapError> {
        let base_slot = self.transport.queue_ap_read(ap_num, Base::ADDRESS);
        let idr_slot = self.transport.queue_ap_read(ap_num, Idr::ADDRESS);
        self.run()?;
        Ok((self.transport.take(base_slot), self.transport.take(idr_slot)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockTransport;

    #[test]
    fn dp_init_clears_select_cache_and_powers_up() {
        let mut dap = Dap::new(MockTransport::new());
        dap.dp_init().expect("bring-up should succeed against the mock");
        assert_eq!(dap.dp_ctrl_stat() & (1 << 31), 1 << 31);
        assert_eq!(dap.dp_ctrl_stat() & (1 << 29), 1 << 29);
    }

    #[test]
    fn find_ap_skips_errored_aps_and_keeps_scanning() {
        let mut dap = Dap::new(MockTransport::new());
        dap.transport_mut().fail_ap_idr_reads(&[0, 1, 2]);
        dap.transport_mut()
            .install_mem_ap(3, ApType::AmbaAhb5Hprot);
        let found = dap.find_ap(ApType::AmbaAhb5Hprot);
        assert_eq!(found, Some(3));
    }

    #[test]
    fn set_sprot_toggles_csw_default_bit() {
        let mut ap = ApState::new(0);
        assert_eq!(ap.csw_default(), 0);
        ap.set_sprot(true);
        assert_eq!(ap.csw_default() & (1 << 23), 1 << 23);
        ap.set_sprot(false);
        assert_eq!(ap.csw_default(), 0);
    }
}
