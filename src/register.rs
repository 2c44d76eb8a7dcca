//! DP and AP register layouts.
//!
//! Bit layouts follow the teacher's `architecture::arm::dp` module for the
//! Debug Port registers and the historical `memory` crate's AP register
//! definitions for the MEM-AP side, expressed with the `bitfield!` macro the
//! way the teacher's modern `dp/mod.rs` does.

use bitfield::bitfield;
use jep106::JEP106Code;

/// A register addressable through the DP or an AP.
pub trait Register: Clone + Copy + From<u32> + Into<u32> {
    /// The register's address, as consumed by [`crate::transport::TransportOps`].
    const ADDRESS: u8;
    /// Human readable name, used in error messages and trace logs.
    const NAME: &'static str;
}

// ---------------------------------------------------------------------
// Debug Port registers
// ---------------------------------------------------------------------

bitfield! {
    #[derive(Clone, Copy)]
    pub struct Abort(u32);
    impl Debug;
    pub _, set_orunerrclr: 4;
    pub _, set_wderrclr: 3;
    pub _, set_stkerrclr: 2;
    pub _, set_stkcmpclr: 1;
    pub _, set_dapabort: 0;
}

impl From<u32> for Abort {
    fn from(raw: u32) -> Self {
        Abort(raw)
    }
}

impl From<Abort> for u32 {
    fn from(raw: Abort) -> Self {
        raw.0
    }
}

impl Register for Abort {
    const ADDRESS: u8 = 0x0;
    const NAME: &'static str = "ABORT";
}

bitfield! {
    #[derive(Clone, Copy)]
    pub struct Ctrl(u32);
    impl Debug;
    pub csyspwrupack, _: 31;
    pub csyspwrupreq, set_csyspwrupreq: 30;
    pub cdbgpwrupack, _: 29;
    pub cdbgpwrupreq, set_cdbgpwrupreq: 28;
    pub sticky_err, clear_sticky_err: 5;
    pub sticky_orun, _: 1;
    pub orun_detect, set_orun_detect: 0;
}

impl Default for Ctrl {
    fn default() -> Self {
        Ctrl(0)
    }
}

impl From<u32> for Ctrl {
    fn from(raw: u32) -> Self {
        Ctrl(raw)
    }
}

impl From<Ctrl> for u32 {
    fn from(raw: Ctrl) -> Self {
        raw.0
    }
}

impl Register for Ctrl {
    const ADDRESS: u8 = 0x4;
    const NAME: &'static str = "CTRL/STAT";
}

bitfield! {
    #[derive(Clone, Copy)]
    pub struct Select(u32);
    impl Debug;
    pub u8, ap_sel, set_ap_sel: 31, 24;
    pub u8, ap_bank_sel, set_ap_bank_sel: 7, 4;
    pub u8, dp_bank_sel, set_dp_bank_sel: 3, 0;
}

impl From<u32> for Select {
    fn from(raw: u32) -> Self {
        Select(raw)
    }
}

impl From<Select> for u32 {
    fn from(raw: Select) -> Self {
        raw.0
    }
}

impl Register for Select {
    const ADDRESS: u8 = 0x8;
    const NAME: &'static str = "SELECT";
}

bitfield! {
    #[derive(Clone, Copy)]
    pub struct Dpidr(u32);
    impl Debug;
    pub u8, revision, _: 31, 28;
    pub u8, part_no, _: 27, 20;
    pub min, _: 16;
    pub u8, version, _: 15, 12;
    u8, jep_cc, _: 11, 8;
    u8, jep_id, _: 7, 1;
}

impl From<u32> for Dpidr {
    fn from(raw: u32) -> Self {
        Dpidr(raw)
    }
}

impl From<Dpidr> for u32 {
    fn from(raw: Dpidr) -> Self {
        raw.0
    }
}

impl Register for Dpidr {
    const ADDRESS: u8 = 0x0;
    const NAME: &'static str = "DPIDR";
}

impl Dpidr {
    /// The DP's designer, decoded into a JEP106 manufacturer code.
    pub fn designer(&self) -> JEP106Code {
        JEP106Code::new(self.jep_cc(), self.jep_id())
    }
}

// ---------------------------------------------------------------------
// MEM-AP registers
// ---------------------------------------------------------------------

/// `CSW` address-increment field, spec.md's OFF/SINGLE/PACKED.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddrInc {
    Off = 0b00,
    Single = 0b01,
    Packed = 0b10,
}

impl AddrInc {
    pub fn from_bits(bits: u8) -> Self {
        match bits & 0b11 {
            0b10 => AddrInc::Packed,
            0b01 => AddrInc::Single,
            _ => AddrInc::Off,
        }
    }
}

bitfield! {
    #[derive(Clone, Copy)]
    pub struct Csw(u32);
    impl Debug;
    pub dbgswenable, set_dbgswenable: 31;
    pub master_debug, set_master_debug: 29;
    pub u8, hprot, set_hprot: 27, 24;
    pub sprot, set_sprot: 23;
    pub device_en, _: 6;
    pub u8, addrinc_bits, set_addrinc_bits: 5, 4;
    pub u8, size_bits, set_size_bits: 2, 0;
}

impl From<u32> for Csw {
    fn from(raw: u32) -> Self {
        Csw(raw)
    }
}

impl From<Csw> for u32 {
    fn from(raw: Csw) -> Self {
        raw.0
    }
}

impl Register for Csw {
    const ADDRESS: u8 = 0x00;
    const NAME: &'static str = "CSW";
}

impl Csw {
    pub fn addrinc(&self) -> AddrInc {
        AddrInc::from_bits(self.addrinc_bits())
    }

    pub fn set_addrinc(&mut self, inc: AddrInc) {
        self.set_addrinc_bits(inc as u8);
    }
}

bitfield! {
    #[derive(Clone, Copy)]
    pub struct Tar(u32);
    impl Debug;
    pub u32, address, set_address: 31, 0;
}

impl From<u32> for Tar {
    fn from(raw: u32) -> Self {
        Tar(raw)
    }
}

impl From<Tar> for u32 {
    fn from(raw: Tar) -> Self {
        raw.0
    }
}

impl Register for Tar {
    const ADDRESS: u8 = 0x04;
    const NAME: &'static str = "TAR";
}

bitfield! {
    #[derive(Clone, Copy)]
    pub struct Drw(u32);
    impl Debug;
    pub u32, data, set_data: 31, 0;
}

impl From<u32> for Drw {
    fn from(raw: u32) -> Self {
        Drw(raw)
    }
}

impl From<Drw> for u32 {
    fn from(raw: Drw) -> Self {
        raw.0
    }
}

impl Register for Drw {
    const ADDRESS: u8 = 0x0C;
    const NAME: &'static str = "DRW";
}

macro_rules! banked_data_register {
    ($name:ident, $address:expr, $doc:literal) => {
        bitfield! {
            #[derive(Clone, Copy)]
            #[doc = $doc]
            pub struct $name(u32);
            impl Debug;
            pub u32, data, set_data: 31, 0;
        }

        impl From<u32> for $name {
            fn from(raw: u32) -> Self {
                $name(raw)
            }
        }

        impl From<$name> for u32 {
            fn from(raw: $name) -> Self {
                raw.0
            }
        }

        impl Register for $name {
            const ADDRESS: u8 = $address;
            const NAME: &'static str = stringify!($name);
        }
    };
}

banked_data_register!(Bd0, 0x10, "Banked Data 0 register.");
banked_data_register!(Bd1, 0x14, "Banked Data 1 register.");
banked_data_register!(Bd2, 0x18, "Banked Data 2 register.");
banked_data_register!(Bd3, 0x1C, "Banked Data 3 register.");

/// Returns the BDx register address that covers `address`, given that TAR
/// has been set to the 16-byte-aligned window `address & !0xF`.
pub fn banked_data_register_for(address: u32) -> u8 {
    0x10 + (address & 0xC)
}

/// Maps an access width in bytes to the `CSW.SIZE` field encoding. Only
/// byte/halfword/word widths are legal MEM-AP accesses.
pub fn size_bits_for(access_size: u8) -> Option<u8> {
    match access_size {
        1 => Some(0b000),
        2 => Some(0b001),
        4 => Some(0b010),
        _ => None,
    }
}

bitfield! {
    #[derive(Clone, Copy)]
    pub struct Cfg(u32);
    impl Debug;
    pub big_endian, _: 0;
    pub long_address, _: 1;
    pub large_data, _: 2;
}

impl From<u32> for Cfg {
    fn from(raw: u32) -> Self {
        Cfg(raw)
    }
}

impl From<Cfg> for u32 {
    fn from(raw: Cfg) -> Self {
        raw.0
    }
}

impl Register for Cfg {
    const ADDRESS: u8 = 0xF4;
    const NAME: &'static str = "CFG";
}

bitfield! {
    #[derive(Clone, Copy)]
    pub struct Base(u32);
    impl Debug;
    pub u32, base_addr, set_base_addr: 31, 12;
    pub format_adiv5, _: 1;
    pub entry_present, _: 0;
}

impl From<u32> for Base {
    fn from(raw: u32) -> Self {
        Base(raw)
    }
}

impl From<Base> for u32 {
    fn from(raw: Base) -> Self {
        raw.0
    }
}

impl Register for Base {
    const ADDRESS: u8 = 0xF8;
    const NAME: &'static str = "BASE";
}

bitfield! {
    #[derive(Clone, Copy)]
    pub struct Base2(u32);
    impl Debug;
    pub u32, base_addr_upper, set_base_addr_upper: 31, 0;
}

impl From<u32> for Base2 {
    fn from(raw: u32) -> Self {
        Base2(raw)
    }
}

impl From<Base2> for u32 {
    fn from(raw: Base2) -> Self {
        raw.0
    }
}

impl Register for Base2 {
    const ADDRESS: u8 = 0xF0;
    const NAME: &'static str = "BASE2";
}

/// AP class, as reported by `IDR` bits [16:13].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ApClass {
    #[default]
    Undefined = 0b0000,
    ComAp = 0b0001,
    MemAp = 0b1000,
}

impl ApClass {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0b0000 => Some(ApClass::Undefined),
            0b0001 => Some(ApClass::ComAp),
            0b1000 => Some(ApClass::MemAp),
            _ => None,
        }
    }
}

/// AP type, as reported by `IDR` bits [3:0]. See ADIv5.2 table C1-2.
#[allow(non_camel_case_types)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ApType {
    #[default]
    JtagComAp = 0x0,
    AmbaAhb3 = 0x1,
    AmbaApb2Apb3 = 0x2,
    AmbaAxi3Axi4 = 0x4,
    AmbaAhb5 = 0x5,
    AmbaApb4Apb5 = 0x6,
    AmbaAxi5 = 0x7,
    AmbaAhb5Hprot = 0x8,
}

impl ApType {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x0 => Some(ApType::JtagComAp),
            0x1 => Some(ApType::AmbaAhb3),
            0x2 => Some(ApType::AmbaApb2Apb3),
            0x4 => Some(ApType::AmbaAxi3Axi4),
            0x5 => Some(ApType::AmbaAhb5),
            0x6 => Some(ApType::AmbaApb4Apb5),
            0x7 => Some(ApType::AmbaAxi5),
            0x8 => Some(ApType::AmbaAhb5Hprot),
            _ => None,
        }
    }
}

/// `IDR` mask isolating the JEP106 designer field (bits [27:17]).
pub const IDR_JEP106_MASK: u32 = 0x0FFE_0000;
/// `IDR & IDR_JEP106_MASK` for designer code ARM (cc=0x4, id=0x3B).
pub const IDR_JEP106_ARM: u32 = (((0x04_u32 << 7) | 0x3B) << 17) & IDR_JEP106_MASK;
/// `IDR` mask isolating the AP type field (bits [3:0]).
pub const IDR_TYPE_MASK: u32 = 0x0000_000F;

/// Identification Register, present on every AP.
#[derive(Debug, Clone, Copy, Default)]
pub struct Idr {
    pub revision: u8,
    pub designer: JEP106Code,
    pub class: ApClass,
    pub variant: u8,
    pub ap_type: ApType,
}

impl From<u32> for Idr {
    fn from(value: u32) -> Self {
        let designer_bits = ((value >> 17) & 0x7FF) as u16;
        let cc = (designer_bits >> 7) as u8;
        let id = (designer_bits & 0x7f) as u8;
        Idr {
            revision: ((value >> 28) & 0x0F) as u8,
            designer: JEP106Code::new(cc, id),
            class: ApClass::from_u8(((value >> 13) & 0x0F) as u8).unwrap_or_default(),
            variant: ((value >> 4) & 0x0F) as u8,
            ap_type: ApType::from_u8((value & 0x0F) as u8).unwrap_or_default(),
        }
    }
}

impl From<Idr> for u32 {
    fn from(value: Idr) -> Self {
        (u32::from(value.revision) << 28)
            | (((u32::from(value.designer.cc) << 7) | u32::from(value.designer.id)) << 17)
            | ((value.class as u32) << 13)
            | (u32::from(value.variant) << 4)
            | (value.ap_type as u32)
    }
}

impl Register for Idr {
    const ADDRESS: u8 = 0xFC;
    const NAME: &'static str = "IDR";
}
