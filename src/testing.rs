//! A mock `TransportOps` implementation used only by this crate's own test
//! suite.
//!
//! Grounded on the teacher's `architecture::arm::ap::memory_ap::mock`
//! (`MockMemoryAp`): a `HashMap`-backed register store plus a flat byte
//! memory, with CSW/TAR/DRW given special read/write semantics that model
//! the real MEM-AP side effects (byte-lane placement, autoincrement). This
//! mock goes one step further than the teacher's, which leaves
//! `AddressIncrement::Packed` `unimplemented!()`: this crate's block engine
//! requires packed-transfer coverage (scenario S2), so this mock actually
//! advances TAR by four bytes per packed beat instead of panicking.

use std::collections::HashMap;

use crate::error::TransportError;
use crate::register::{AddrInc, Base, Cfg, Csw, Drw, Idr, Register, Tar};
use crate::transport::{PollTarget, ReadSlot, TransportOps};

#[derive(Debug, Clone, Copy, Default)]
struct ApRegs {
    csw: u32,
    tar: u32,
    idr: Option<u32>,
    base: Option<u32>,
    cfg: Option<u32>,
}

enum QueuedOp {
    DpRead { slot: usize, reg: u8 },
    DpWrite { reg: u8, value: u32 },
    ApRead { slot: usize, ap: u8, reg: u8 },
    ApWrite { ap: u8, reg: u8, value: u32 },
}

pub struct MockTransport {
    memory: Vec<u8>,
    dp_regs: HashMap<u8, u32>,
    ap_regs: HashMap<u8, ApRegs>,
    queue: Vec<QueuedOp>,
    results: Vec<u32>,
    fail_ap_reads: Vec<(u8, u8)>,
    /// Once `Some(0)` is reached, the next AP write fails and the queue
    /// aborts -- lets a test put a block transfer into the S5 mid-stream
    /// failure path without needing a real flaky transport.
    fail_after_n_ap_writes: Option<usize>,
    /// `(ap, reg, value)` in emission order, across every `run()` call --
    /// lets a test assert the exact CSW/TAR/DRW sequence a driver operation
    /// produced (scenarios S1-S4).
    pub write_log: Vec<(u8, u8, u32)>,
}

/// Installs a `tracing` subscriber for the current test binary, same
/// `EnvFilter::from_default_env()` idiom the teacher's own example
/// binaries (`probe-rs/examples/read_ranges.rs`) use to pick up `RUST_LOG`.
/// `try_init` rather than `init` because every test in the binary calls
/// this through `MockTransport::new` and only the first call may succeed.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

impl MockTransport {
    pub fn new() -> Self {
        init_tracing();
        MockTransport {
            memory: vec![0u8; 64 * 1024],
            dp_regs: HashMap::new(),
            ap_regs: HashMap::new(),
            queue: Vec::new(),
            results: Vec::new(),
            fail_ap_reads: Vec::new(),
            fail_after_n_ap_writes: None,
            write_log: Vec::new(),
        }
    }

    /// Fills memory with a pattern where each byte equals its own address
    /// plus one, so a test can tell a stray write from legitimate data.
    pub fn with_pattern() -> Self {
        let mut t = Self::new();
        for (i, b) in t.memory.iter_mut().enumerate() {
            *b = (i as u8).wrapping_add(1);
        }
        t
    }

    pub fn memory(&self) -> &[u8] {
        &self.memory
    }

    pub fn memory_mut(&mut self) -> &mut [u8] {
        &mut self.memory
    }

    pub fn install_mem_ap(&mut self, ap_num: u8, ap_type: crate::register::ApType) {
        let idr = Idr {
            revision: 0,
            designer: jep106::JEP106Code::new(0x4, 0x3B),
            class: crate::register::ApClass::MemAp,
            variant: 0,
            ap_type,
        };
        self.ap_regs.entry(ap_num).or_default().idr = Some(idr.into());
    }

    pub fn install_base(&mut self, ap_num: u8, base: u32) {
        self.ap_regs.entry(ap_num).or_default().base = Some(base);
    }

    pub fn install_cfg(&mut self, ap_num: u8, cfg: u32) {
        self.ap_regs.entry(ap_num).or_default().cfg = Some(cfg);
    }

    /// Marks `IDR` reads on the given AP indices as always failing, as if
    /// those slots had no AP behind them.
    pub fn fail_ap_idr_reads(&mut self, aps: &[u8]) {
        for &ap in aps {
            self.fail_ap_reads.push((ap, Idr::ADDRESS));
        }
    }

    /// Fails the `n`-th AP write from now on (0 = the very next one), as if
    /// the link dropped mid-block-transfer. The TAR read a caller's
    /// progress-recovery path issues afterward still succeeds normally.
    pub fn fail_after_n_ap_writes(&mut self, n: usize) {
        self.fail_after_n_ap_writes = Some(n);
    }

    fn alloc_slot(&mut self) -> usize {
        let slot = self.results.len();
        self.results.push(0);
        slot
    }

    fn do_ap_write(&mut self, ap: u8, reg: u8, value: u32) {
        let regs = self.ap_regs.entry(ap).or_default();
        match reg {
            r if r == Csw::ADDRESS => regs.csw = value,
            r if r == Tar::ADDRESS => regs.tar = value,
            r if r == Drw::ADDRESS => {
                let csw = Csw::from(regs.csw);
                let tar = regs.tar;
                let size = size_bytes(csw);
                write_drw(&mut self.memory, tar, size, value);
                regs.tar = tar.wrapping_add(advance_amount(csw));
            }
            r if (0x10..=0x1C).contains(&r) => {
                let window = regs.tar & !0xF;
                let addr = window + u32::from(r - 0x10);
                write_word(&mut self.memory, addr, value);
            }
            _ => {}
        }
    }

    fn do_ap_read(&mut self, ap: u8, reg: u8) -> u32 {
        let regs = self.ap_regs.entry(ap).or_default();
        match reg {
            r if r == Csw::ADDRESS => regs.csw,
            r if r == Tar::ADDRESS => regs.tar,
            r if r == Drw::ADDRESS => {
                let csw = Csw::from(regs.csw);
                let tar = regs.tar;
                let size = size_bytes(csw);
                let value = read_drw(&self.memory, tar, size);
                regs.tar = tar.wrapping_add(advance_amount(csw));
                value
            }
            r if (0x10..=0x1C).contains(&r) => {
                let window = regs.tar & !0xF;
                let addr = window + u32::from(r - 0x10);
                read_word(&self.memory, addr)
            }
            r if r == Idr::ADDRESS => regs.idr.unwrap_or(0),
            r if r == Base::ADDRESS => regs.base.unwrap_or(0),
            r if r == Cfg::ADDRESS => regs.cfg.unwrap_or(0),
            _ => 0,
        }
    }

    fn maybe_ack_power_up(&mut self) {
        let ctrl = self.dp_regs.entry(crate::register::Ctrl::ADDRESS).or_insert(0);
        if *ctrl & (1 << 28) != 0 {
            *ctrl |= 1 << 29;
        }
        if *ctrl & (1 << 30) != 0 {
            *ctrl |= 1 << 31;
        }
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl TransportOps for MockTransport {
    fn queue_dp_read(&mut self, reg: u8) -> ReadSlot {
        let slot = self.alloc_slot();
        self.queue.push(QueuedOp::DpRead { slot, reg });
        ReadSlot(slot)
    }

    fn queue_dp_write(&mut self, reg: u8, value: u32) {
        self.queue.push(QueuedOp::DpWrite { reg, value });
    }

    fn queue_ap_read(&mut self, ap: u8, reg: u8) -> ReadSlot {
        let slot = self.alloc_slot();
        self.queue.push(QueuedOp::ApRead { slot, ap, reg });
        ReadSlot(slot)
    }

    fn queue_ap_write(&mut self, ap: u8, reg: u8, value: u32) {
        self.queue.push(QueuedOp::ApWrite { ap, reg, value });
    }

    fn run(&mut self) -> Result<(), TransportError> {
        let ops = std::mem::take(&mut self.queue);
        for op in ops {
            match op {
                QueuedOp::DpRead { slot, reg } => {
                    self.maybe_ack_power_up();
                    let value = *self.dp_regs.get(&reg).unwrap_or(&0);
                    self.results[slot] = value;
                }
                QueuedOp::DpWrite { reg, value } => {
                    self.dp_regs.insert(reg, value);
                }
                QueuedOp::ApRead { slot, ap, reg } => {
                    if self.fail_ap_reads.contains(&(ap, reg)) {
                        self.queue.clear();
                        return Err(TransportError::NoAck);
                    }
                    let value = self.do_ap_read(ap, reg);
                    self.results[slot] = value;
                }
                QueuedOp::ApWrite { ap, reg, value } => {
                    if let Some(0) = self.fail_after_n_ap_writes {
                        self.fail_after_n_ap_writes = None;
                        self.queue.clear();
                        return Err(TransportError::Fault);
                    }
                    if let Some(n) = self.fail_after_n_ap_writes.as_mut() {
                        *n -= 1;
                    }
                    self.write_log.push((ap, reg, value));
                    self.do_ap_write(ap, reg, value);
                }
            }
        }
        Ok(())
    }

    fn take(&self, slot: ReadSlot) -> u32 {
        self.results[slot.0]
    }

    fn poll_register(
        &mut self,
        target: PollTarget,
        mask: u32,
        expected: u32,
        timeout_ms: u64,
    ) -> Result<u32, crate::error::DapError> {
        for _ in 0..64 {
            let value = match target {
                PollTarget::Dp(reg) => {
                    self.maybe_ack_power_up();
                    *self.dp_regs.get(&reg).unwrap_or(&0)
                }
                PollTarget::Ap { ap, reg } => self.do_ap_read(ap, reg),
            };
            if value & mask == expected {
                return Ok(value);
            }
        }
        Err(crate::error::DapError::Timeout {
            register: "CTRL/STAT",
            timeout_ms,
        })
    }
}

/// Physical width of one DRW transfer. Packed mode always moves a full
/// 4-byte word regardless of the logical element width CSW.SIZE names --
/// that's what "packed" means; only the non-packed case narrows to the
/// logical size.
fn size_bytes(csw: Csw) -> u8 {
    if csw.addrinc() == AddrInc::Packed {
        return 4;
    }
    match csw.size_bits() {
        0b000 => 1,
        0b001 => 2,
        _ => 4,
    }
}

fn advance_amount(csw: Csw) -> u32 {
    match csw.addrinc() {
        AddrInc::Off => 0,
        AddrInc::Single => u32::from(size_bytes(csw)),
        AddrInc::Packed => 4,
    }
}

/// Extracts `size` bytes from `word` starting at bit offset `(tar % 4) * 8`
/// and stores them into `memory[tar..tar+size)` in that order. This is the
/// generic form of the teacher mock's per-`DataSize` match, parameterized
/// on the caller-supplied TAR rather than assuming it always equals the
/// logical address -- which is what lets this mock support the BE-32 quirk
/// without knowing anything about it: the engine pre-compensates TAR and
/// the byte lanes it writes into `word`, and this function just replays
/// whatever physical placement that implies.
fn write_drw(memory: &mut [u8], tar: u32, size: u8, word: u32) {
    let bit_offset = (tar % 4) * 8;
    let shifted = word >> bit_offset;
    let base = tar as usize;
    for i in 0..usize::from(size) {
        if let Some(byte) = memory.get_mut(base + i) {
            *byte = (shifted >> (8 * i)) as u8;
        }
    }
}

fn read_drw(memory: &[u8], tar: u32, size: u8) -> u32 {
    let bit_offset = (tar % 4) * 8;
    let base = tar as usize;
    let mut assembled = 0u32;
    for i in 0..usize::from(size) {
        let byte = *memory.get(base + i).unwrap_or(&0);
        assembled |= u32::from(byte) << (8 * i);
    }
    assembled << bit_offset
}

fn write_word(memory: &mut [u8], address: u32, value: u32) {
    let base = address as usize;
    if base + 4 <= memory.len() {
        memory[base..base + 4].copy_from_slice(&value.to_le_bytes());
    }
}

fn read_word(memory: &[u8], address: u32) -> u32 {
    let base = address as usize;
    let mut bytes = [0u8; 4];
    for (i, b) in bytes.iter_mut().enumerate() {
        *b = *memory.get(base + i).unwrap_or(&0);
    }
    u32::from_le_bytes(bytes)
}
