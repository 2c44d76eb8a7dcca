//! MEM-AP block engine (spec.md §4.E, "the centerpiece"): buffered
//! autoincrement and FIFO-style transfers built on top of
//! [`crate::mem_ap`]'s CSW/TAR staging.
//!
//! Grounded on the teacher's `adi_v5_memory_interface.rs` `read_32`/
//! `write_32` chunking loop -- the 1 KiB `max_chunk_size_bytes` window and
//! its "autoincrement is limited to the 10 lowest bits, so TAR must be
//! rewritten every time it would overflow" comment are the direct model for
//! this module's `tar_autoincr_block` handling -- generalized per spec.md
//! §4.E to add packed transfers and the BE-32 byte-lane XOR, both absent
//! from the teacher's modern code path. Unlike the teacher's per-chunk
//! `transfer.write_ap_register`/`read_ap_register` calls (one flush per
//! chunk), this engine queues every chunk of a block and flushes once,
//! consistent with the transaction-queuing motivation that runs through
//! this crate.

use scroll::{Pread, Pwrite, LE};

use crate::dap::Dap;
use crate::error::DapError;
use crate::register::{size_bits_for, AddrInc, Csw, Drw, Register, Tar};
use crate::transport::{ReadSlot, TransportOps};

/// The 1/2/4-byte MEM-AP access width (spec.md §4.E's `s`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessType {
    Byte = 1,
    HalfWord = 2,
    Word = 4,
}

impl AccessType {
    pub fn size(self) -> u8 {
        self as u8
    }

    pub fn from_size(size: u8) -> Option<Self> {
        match size {
            1 => Some(AccessType::Byte),
            2 => Some(AccessType::HalfWord),
            4 => Some(AccessType::Word),
            _ => None,
        }
    }
}

/// `CSW.addrinc`, re-exported under the name spec.md §6's public API list
/// gives it; identical to [`crate::register::AddrInc`].
pub type CswAddrInc = AddrInc;

/// Minimum legal `tar_autoincr_block`: the autoincrement logic is only
/// architecturally guaranteed correct within a 1 KiB aligned window.
const MIN_AUTOINCR_BLOCK: u32 = 1 << 10;

fn byte_mask_for(size: u8) -> u8 {
    match size {
        4 => 3,
        2 => 1,
        _ => 0,
    }
}

fn addr_xor_for(size: u8) -> u8 {
    match size {
        4 => 0,
        2 => 2,
        _ => 3,
    }
}

struct ReadChunk {
    slot: ReadSlot,
    address: u32,
    this_size: u8,
}

impl<T: TransportOps> Dap<T> {
    /// `mem_ap_write_buf` (spec.md §4.E), autoincrement mode.
    pub fn mem_ap_write_buf(
        &mut self,
        ap_num: u8,
        address: u32,
        size: u8,
        data: &[u8],
    ) -> Result<usize, DapError> {
        self.block_write(ap_num, address, size, data, true)
    }

    /// `mem_ap_write_buf_noincr`: FIFO-style, every beat targets the same
    /// address.
    pub fn mem_ap_write_buf_noincr(
        &mut self,
        ap_num: u8,
        address: u32,
        size: u8,
        data: &[u8],
    ) -> Result<usize, DapError> {
        self.block_write(ap_num, address, size, data, false)
    }

    /// `mem_ap_read_buf` (spec.md §4.E), autoincrement mode.
    pub fn mem_ap_read_buf(
        &mut self,
        ap_num: u8,
        address: u32,
        size: u8,
        buf: &mut [u8],
    ) -> Result<usize, DapError> {
        self.block_read(ap_num, address, size, buf, true)
    }

    /// `mem_ap_read_buf_noincr`: FIFO-style read.
    pub fn mem_ap_read_buf_noincr(
        &mut self,
        ap_num: u8,
        address: u32,
        size: u8,
        buf: &mut [u8],
    ) -> Result<usize, DapError> {
        self.block_read(ap_num, address, size, buf, false)
    }

    fn block_guard(&self, ap_num: u8, address: u32, size: u8) -> Result<u8, DapError> {
        let size_bits = size_bits_for(size).ok_or(DapError::UnalignedAccess { address, size })?;
        if self.ap(ap_num).unaligned_access_bad && address % u32::from(size) != 0 {
            return Err(DapError::UnalignedAccess { address, size });
        }
        Ok(size_bits)
    }

    fn block_write(
        &mut self,
        ap_num: u8,
        start_address: u32,
        size: u8,
        data: &[u8],
        autoinc: bool,
    ) -> Result<usize, DapError> {
        let size_bits = self.block_guard(ap_num, start_address, size)?;
        if data.is_empty() {
            return Ok(0);
        }

        let be32 = self.ti_be_32_quirks;
        let mask = byte_mask_for(size);
        let addr_xor = if be32 { addr_xor_for(size) } else { 0 };
        let block = self.ap(ap_num).tar_autoincr_block.max(MIN_AUTOINCR_BLOCK);
        let packed_capable = autoinc && self.ap(ap_num).packed_transfers && !be32;

        let mut address = start_address;
        let mut consumed = 0usize;
        let mut emit_tar = true;

        while consumed < data.len() {
            let remaining = (data.len() - consumed) as u32;
            let dist_to_boundary = block - (address % block);
            let use_packed = packed_capable && remaining >= 4 && dist_to_boundary >= 4;
            let this_size: u8 = if use_packed { 4 } else { size };

            let mut csw = Csw::from(0);
            csw.set_size_bits(size_bits);
            csw.set_addrinc(if !autoinc {
                AddrInc::Off
            } else if use_packed {
                AddrInc::Packed
            } else {
                AddrInc::Single
            });
            self.setup_csw(ap_num, csw.into());

            if emit_tar {
                let tar_value = address ^ u32::from(addr_xor);
                tracing::trace!(ap_num, tar = tar_value, "block write: re-emitting TAR");
                self.transport_mut().queue_ap_write(ap_num, Tar::ADDRESS, tar_value);
                self.ap_mut(ap_num).set_tar_cache(tar_value);
                emit_tar = false;
            }

            // The common case -- a full, little-endian, word-aligned chunk --
            // is exactly the teacher's `buf8.pwrite_with(word, ..., LE)`
            // pattern read backwards (bytes into a word instead of out of
            // one); the general byte-lane loop below stays for the BE-32 and
            // sub-word/unaligned cases scroll's plain `LE` context can't
            // express.
            let mut word = 0u32;
            if !be32 && this_size == 4 && address % 4 == 0 {
                word = data
                    .pread_with(consumed, LE)
                    .expect("this_size == 4 guarantees 4 bytes remain");
            } else {
                for k in 0..usize::from(this_size) {
                    let byte = data[consumed + k];
                    let lane = if be32 {
                        (mask ^ (((address as usize + k) & 3) as u8)) ^ addr_xor
                    } else {
                        ((address as usize + k) & 3) as u8
                    };
                    word |= u32::from(byte) << (8 * lane);
                }
            }
            self.transport_mut().queue_ap_write(ap_num, Drw::ADDRESS, word);
            tracing::trace!(ap_num, address, this_size, packed = use_packed, "block write chunk queued");

            consumed += usize::from(this_size);
            let new_address = address.wrapping_add(u32::from(this_size));
            if autoinc {
                if be32 {
                    emit_tar = true;
                } else if consumed < data.len() && address / block != new_address / block {
                    tracing::trace!(ap_num, new_address, "crossing tar_autoincr_block boundary");
                    emit_tar = true;
                }
            }
            address = new_address;
        }

        match self.run() {
            Ok(()) => Ok(data.len()),
            Err(e) => {
                let progress = self.recover_tar_progress(ap_num, start_address);
                tracing::debug!(ap_num, ?progress, "block write failed; recovered TAR progress");
                Err(DapError::BlockTransferFailed {
                    transferred: progress.unwrap_or(0),
                    source: Box::new(e),
                })
            }
        }
    }

    fn block_read(
        &mut self,
        ap_num: u8,
        start_address: u32,
        size: u8,
        buf: &mut [u8],
        autoinc: bool,
    ) -> Result<usize, DapError> {
        let size_bits = self.block_guard(ap_num, start_address, size)?;
        if buf.is_empty() {
            return Ok(0);
        }

        let be32 = self.ti_be_32_quirks;
        let addr_xor = if be32 { addr_xor_for(size) } else { 0 };
        let block = self.ap(ap_num).tar_autoincr_block.max(MIN_AUTOINCR_BLOCK);
        let packed_capable = autoinc && self.ap(ap_num).packed_transfers && !be32;

        let mut chunks: Vec<ReadChunk> = Vec::new();
        let mut address = start_address;
        let mut consumed = 0usize;
        let mut emit_tar = true;

        while consumed < buf.len() {
            let remaining = (buf.len() - consumed) as u32;
            let dist_to_boundary = block - (address % block);
            let use_packed = packed_capable && remaining >= 4 && dist_to_boundary >= 4;
            let this_size: u8 = if use_packed { 4 } else { size };

            let mut csw = Csw::from(0);
            csw.set_size_bits(size_bits);
            csw.set_addrinc(if !autoinc {
                AddrInc::Off
            } else if use_packed {
                AddrInc::Packed
            } else {
                AddrInc::Single
            });
            self.setup_csw(ap_num, csw.into());

            if emit_tar {
                let tar_value = address ^ u32::from(addr_xor);
                tracing::trace!(ap_num, tar = tar_value, "block read: re-emitting TAR");
                self.transport_mut().queue_ap_write(ap_num, Tar::ADDRESS, tar_value);
                self.ap_mut(ap_num).set_tar_cache(tar_value);
                emit_tar = false;
            }

            let slot = self.transport_mut().queue_ap_read(ap_num, Drw::ADDRESS);
            chunks.push(ReadChunk { slot, address, this_size });

            consumed += usize::from(this_size);
            let new_address = address.wrapping_add(u32::from(this_size));
            if autoinc {
                if be32 {
                    emit_tar = true;
                } else if consumed < buf.len() && address / block != new_address / block {
                    emit_tar = true;
                }
            }
            address = new_address;
        }

        match self.run() {
            Ok(()) => {
                let mut filled = 0usize;
                for chunk in &chunks {
                    let drw = self.take(chunk.slot);
                    if !be32 && chunk.this_size == 4 && chunk.address % 4 == 0 {
                        buf.pwrite_with(drw, filled, LE)
                            .expect("this_size == 4 guarantees a 4-byte destination slice");
                    } else {
                        for k in 0..usize::from(chunk.this_size) {
                            let byte = if be32 {
                                (drw >> (8 * (3 - ((chunk.address as usize + k) & 3)))) as u8
                            } else {
                                (drw >> (8 * ((chunk.address as usize + k) & 3))) as u8
                            };
                            buf[filled + k] = byte;
                        }
                    }
                    filled += usize::from(chunk.this_size);
                }
                Ok(buf.len())
            }
            Err(e) => {
                let progress = self.recover_tar_progress(ap_num, start_address);
                tracing::debug!(ap_num, ?progress, "block read failed; recovered TAR progress");
                Err(DapError::BlockTransferFailed {
                    transferred: progress.unwrap_or(0),
                    source: Box::new(e),
                })
            }
        }
    }

    /// Post-failure progress recovery (spec.md §4.E): one more TAR read,
    /// one more flush. `run` already invalidated every AP cache on the
    /// failure that got us here, so this goes out fresh.
    fn recover_tar_progress(&mut self, ap_num: u8, start_address: u32) -> Option<usize> {
        let slot = self.transport_mut().queue_ap_read(ap_num, Tar::ADDRESS);
        match self.run() {
            Ok(()) => Some(self.take(slot).saturating_sub(start_address) as usize),
            Err(_) => None,
        }
    }
}
