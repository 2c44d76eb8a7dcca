//! An ARM ADIv5 Debug Access Port (DAP) driver.
//!
//! This crate is the core that mediates on-chip debug traffic between a
//! host debugger and an ARM SoC through the Debug Port / Access Port
//! register model: a queued transaction pipeline over a caller-supplied
//! physical transport ([`transport::TransportOps`]), a cached MEM-AP
//! memory-window abstraction ([`mem_ap`], [`block`]), and a CoreSight
//! ROM-table walker ([`romtable`]) for enumerating on-chip debug
//! components.
//!
//! Collapsed from the teacher's multi-crate `coresight`/`memory` split
//! (see `DESIGN.md` for the full grounding ledger); the physical-link
//! byte-shifters, the interactive command surface, logging sinks, and the
//! JEDEC manufacturer-code table are all external collaborators this
//! crate only consumes, never implements.

pub mod block;
pub mod dap;
pub mod error;
pub mod mem_ap;
pub mod register;
pub mod romtable;
pub mod transport;

#[cfg(test)]
pub mod testing;

pub use block::{AccessType, CswAddrInc};
pub use dap::{ApState, Dap, NUM_APS};
pub use error::{DapError, TransportError};
pub use register::{Abort, ApType, Base, Base2, Cfg, Csw, Ctrl, Dpidr, Drw, Idr, Select, Tar};
pub use romtable::{
    ComponentClass, ComponentId, ComponentIdentity, PeripheralId, RomTable, RomTableEntry,
};
pub use transport::{PollTarget, ReadSlot, TransportOps};
