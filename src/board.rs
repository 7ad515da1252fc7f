//! Board identity decoding.
//!
//! The NOVRAM board type word carries one byte per physical BIU slot.  The high
//! nibble of each byte says what sits in the slot:
//!
//! | Nibble | Slot contents | Logical BIUs | Streams |
//! |--------|---------------|--------------|---------|
//! | `0x1`  | one 1553 BIU  | 1 LS         | 1       |
//! | `0xA`  | dual 1553 BIU | 2 LS         | 2       |
//! | `0x3`  | 3910 HS BIU   | 1 HS         | 0       |
//! | `0x7`  | 3910Xp HS BIU | 1 HS         | 0       |
//!
//! An HS BIU pairs with the LS BIU before it to form one stream, so it adds no
//! stream of its own.
//!
//! The board config word's low byte is the platform, which selects the table
//! of `(mask, pattern)` comparisons used to name the device.

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

use alloc::vec::Vec;
#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use crate::addr::MAX_BIU;

/// Number of physical BIU slots described by the board type word
pub const MAX_PHY_BIU: usize = 4;

pub const PLATFORM_PCI_SHORT_ZYNQMP: u32 = 0x14;
pub const PLATFORM_PCI_E_1L_ZYNQMP: u32 = 0x1B;
pub const PLATFORM_VMEX_B: u32 = 0x21;
pub const PLATFORM_VMEX_A: u32 = 0x23;
pub const PLATFORM_CPCIX_3U: u32 = 0x41;
pub const PLATFORM_CPCIX_6U: u32 = 0x43;
pub const PLATFORM_CPCIE_3U: u32 = 0x44;
pub const PLATFORM_CPCIX_3U_PCIE_BASED: u32 = 0x45;
pub const PLATFORM_CPCIE_3U_ZYNQMP: u32 = 0x48;
/// AMCX
pub const PLATFORM_PMC_XMC_BASED: u32 = 0x58;
/// AMCE, embedded
pub const PLATFORM_PMC_BASED_EBD: u32 = 0x59;
/// AEC
pub const PLATFORM_PCIE_CARD: u32 = 0x75;
/// AME
pub const PLATFORM_MINI_PCIE_CARD: u32 = 0x76;
pub const PLATFORM_MINI_PCIE_CARD_AP: u32 = 0x77;
/// AMEE
pub const PLATFORM_MINI_PCIE_ARTIX7: u32 = 0x78;
/// AM2E, M.2 module
pub const PLATFORM_M2_B_M_ARTIX7: u32 = 0x79;
/// APX
pub const PLATFORM_PCIX: u32 = 0x90;
/// APE3910, built around the APX
pub const PLATFORM_PCIE_PCIX_BASED: u32 = 0x91;
/// APE
pub const PLATFORM_PCIE: u32 = 0x98;
pub const PLATFORM_PCIX_PCIE_BASED: u32 = 0x99;
/// APU
pub const PLATFORM_USB: u32 = 0xA0;
/// ASC
pub const PLATFORM_ASC: u32 = 0xA8;
pub const PLATFORM_USB3: u32 = 0xA9;
/// AXC
pub const PLATFORM_XMC: u32 = 0xB0;
/// AXE, embedded
pub const PLATFORM_XMC_EBD: u32 = 0xB2;
/// ASE, single function XMC without replay or error injection
pub const PLATFORM_XMC_NOREPLAY_NOERROR: u32 = 0xB3;
/// AXC3910
pub const PLATFORM_XMC_ZYNQMP: u32 = 0xB4;
/// AXCX
pub const PLATFORM_XMC_ARTIXUS: u32 = 0xB5;
/// ANET
pub const PLATFORM_ANET: u32 = 0xC0;
pub const PLATFORM_ANET_AYS: u32 = 0xC1;
pub const PLATFORM_ANET_AYS_MA: u32 = 0xC2;

/// Kind of stream a logical BIU drives
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamType {
    /// MIL-STD-1553 low speed
    Ls1553,
    /// STANAG-3910 / EFEX high speed
    Hs3910,
}

/// Protocol reported in the init info
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Mil1553 = 1,
    Stanag3910 = 2,
    Efex = 3,
}

/// Device type, named from the platform and the board type word.  The
/// discriminant is the id GET_BOARD_INFO reports.
#[repr(u8)]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum DeviceType {
    #[default]
    Unknown = 0,
    Apx1553_1 = 22,
    Apx1553_2 = 23,
    Apx1553_4 = 24,
    Apx3910 = 25,
    Apx3910Xp = 26,
    Acx1553_1 = 27,
    Acx1553_2 = 28,
    Acx1553_4 = 30,
    Acx1553_4TwoPbis = 31,
    Acx1553_8 = 32,
    Acx3910 = 33,
    Acx3910Xp = 34,
    Acx3910_2 = 35,
    Acx3910Xp2 = 36,
    Avx1553_1 = 37,
    Avx1553_2 = 38,
    Avx1553_4 = 40,
    Avx1553_4TwoPbis = 41,
    Avx1553_8 = 42,
    Avx3910 = 43,
    Avx3910Xp = 44,
    Avx3910_2 = 45,
    Avx3910Xp2 = 46,
    Acx1553_4DsTwoPbis = 47,
    AcxEfa1TwoPbis = 48,
    AcxEfaXp1TwoPbis = 49,
    AcxEfa1DsTwoPbis = 50,
    AcxEfaXp1DsTwoPbis = 51,
    AcxEfa2TwoPbis = 52,
    AcxEfaXp2TwoPbis = 53,
    AcxEfa2DsTwoPbis = 54,
    AcxEfaXp2DsTwoPbis = 55,
    AcxEfa4TwoPbis = 56,
    AcxEfaXp4TwoPbis = 57,
    Avx1553_4DsTwoPbis = 58,
    AvxEfa1TwoPbis = 59,
    AvxEfaXp1TwoPbis = 60,
    AvxEfa1DsTwoPbis = 61,
    AvxEfaXp1DsTwoPbis = 62,
    AvxEfa2TwoPbis = 63,
    AvxEfaXp2TwoPbis = 64,
    AvxEfa2DsTwoPbis = 65,
    AvxEfaXp2DsTwoPbis = 66,
    AvxEfa4TwoPbis = 67,
    AvxEfaXp4TwoPbis = 68,
    Apu1553_1 = 72,
    Apu1553_2 = 73,
    Aec1553_1 = 74,
    Aec1553_2 = 75,
    Axc1553_1 = 76,
    Axc1553_2 = 77,
    Axc1553_4 = 78,
    Amcx1553_1 = 79,
    Amcx1553_2 = 80,
    Amcx1553_4 = 81,
    Ape1553_1 = 82,
    Ape1553_2 = 83,
    Ape1553_4 = 84,
    Anet1553_1 = 85,
    Anet1553_2 = 86,
    Anet3910 = 87,
    Anet3910Xp = 88,
    Asc1553_1 = 89,
    Apxx3910 = 90,
    Apxx3910Xp = 91,
    Apex3910 = 92,
    Apex3910Xp = 93,
    Ame1553_1 = 94,
    Ace3910 = 95,
    Ace3910Xp = 96,
    Axe1553_1 = 97,
    Axe1553_2 = 98,
    Axe1553_4 = 99,
    Amce1553_1 = 100,
    Amce1553_2 = 101,
    Amce1553_4 = 102,
    Ase1553_1 = 103,
    Ase1553_2 = 104,
    Ase1553_4 = 105,
    Axc3910 = 106,
    Axc3910Xp = 107,
    Amee1553_1 = 108,
    Amee1553_2 = 109,
    Asc1553_2 = 110,
    Axcx1553_1 = 111,
    Axcx1553_2 = 112,
    Am2e1553_1 = 113,
    Am2e1553_2 = 114,
    Axcx1553_4 = 115,
}

impl DeviceType {
    /// Numeric id as reported by GET_BOARD_INFO
    pub const fn id(self) -> u32 {
        self as u32
    }

    /// Device types whose HS BIUs speak EFEX rather than plain 3910
    pub const fn is_efex(self) -> bool {
        matches!(
            self,
            DeviceType::AcxEfa1TwoPbis
                | DeviceType::AcxEfaXp1TwoPbis
                | DeviceType::AcxEfa1DsTwoPbis
                | DeviceType::AcxEfaXp1DsTwoPbis
                | DeviceType::AcxEfa2TwoPbis
                | DeviceType::AcxEfaXp2TwoPbis
                | DeviceType::AcxEfa2DsTwoPbis
                | DeviceType::AcxEfaXp2DsTwoPbis
                | DeviceType::AcxEfa4TwoPbis
                | DeviceType::AcxEfaXp4TwoPbis
                | DeviceType::AvxEfa1TwoPbis
                | DeviceType::AvxEfaXp1TwoPbis
                | DeviceType::AvxEfa1DsTwoPbis
                | DeviceType::AvxEfaXp1DsTwoPbis
                | DeviceType::AvxEfa2TwoPbis
                | DeviceType::AvxEfaXp2TwoPbis
                | DeviceType::AvxEfa2DsTwoPbis
                | DeviceType::AvxEfaXp2DsTwoPbis
                | DeviceType::AvxEfa4TwoPbis
                | DeviceType::AvxEfaXp4TwoPbis
        )
    }
}

// (mask, pattern, device).  Slot bytes with a low nibble of 6 or 8 are the
// single function (DS) variants of a 1553 BIU.
type Pattern = (u32, u32, DeviceType);

const CPCIX_3U: &[Pattern] = &[
    (0xFFFF_FFF1, 0xFFFF_FF11, DeviceType::Acx1553_1),
    (0xFFFF_F1F1, 0xFFFF_1111, DeviceType::Acx1553_2),
    (0xFFFF_FFF6, 0xFFFF_FF16, DeviceType::Acx1553_1),
    (0xFFFF_FFF8, 0xFFFF_FF18, DeviceType::Acx1553_1),
    (0xFFFF_F6F1, 0xFFFF_1611, DeviceType::Acx1553_2),
    (0xFFFF_F8F1, 0xFFFF_1811, DeviceType::Acx1553_2),
    (0xFFFF_F6F6, 0xFFFF_1616, DeviceType::Acx1553_2),
    (0xFFFF_F8F8, 0xFFFF_1818, DeviceType::Acx1553_2),
    (0xFFFF_FFF1, 0xFFFF_FFA1, DeviceType::Acx1553_2),
    (0xFFFF_F1F1, 0xFFFF_A1A1, DeviceType::Acx1553_4),
    (0xFFFF_FFF1, 0xFFFF_3011, DeviceType::Acx3910),
    (0xFFFF_FFF1, 0xFFFF_7011, DeviceType::Acx3910Xp),
];

const CPCIX_6U: &[Pattern] = &[
    (0xFFFF_FFF1, 0xFFFF_FF11, DeviceType::Acx1553_1),
    (0xFFFF_FFF1, 0xFFFF_FFA1, DeviceType::Acx1553_2),
    (0xFFFF_F1F1, 0xFFFF_1111, DeviceType::Acx1553_2),
    (0xFFFF_FFF6, 0xFFFF_FF16, DeviceType::Acx1553_1),
    (0xFFFF_FFF8, 0xFFFF_FF18, DeviceType::Acx1553_1),
    (0xFFFF_F6F1, 0xFFFF_1611, DeviceType::Acx1553_2),
    (0xFFFF_F8F1, 0xFFFF_1811, DeviceType::Acx1553_2),
    (0xFFFF_F6F6, 0xFFFF_1616, DeviceType::Acx1553_2),
    (0xFFFF_F8F8, 0xFFFF_1818, DeviceType::Acx1553_2),
    (0xFFFF_F1F1, 0xFFFF_A1A1, DeviceType::Acx1553_4),
    (0xF1F1_F1F1, 0x1111_1111, DeviceType::Acx1553_4TwoPbis),
    (0xF1F1_F1F1, 0xA1A1_A1A1, DeviceType::Acx1553_8),
    (0xFFFF_FFF1, 0xFFFF_3011, DeviceType::Acx3910),
    (0xFFFF_FFF1, 0xFFFF_7011, DeviceType::Acx3910Xp),
    (0xFFF1_FFF1, 0x3011_3011, DeviceType::Acx3910_2),
    (0xFFF1_FFF1, 0x7011_7011, DeviceType::Acx3910Xp2),
    (0xF1F1_F6F6, 0x1111_1616, DeviceType::Acx1553_4DsTwoPbis),
    (0xF1F1_F8F8, 0x1111_1818, DeviceType::Acx1553_4DsTwoPbis),
    (0xFFF1_FFF1, 0x3011_FF11, DeviceType::AcxEfa1TwoPbis),
    (0xFFF1_FFF1, 0x7011_FF11, DeviceType::AcxEfaXp1TwoPbis),
    (0xFFF1_FFF6, 0x3011_FF16, DeviceType::AcxEfa1DsTwoPbis),
    (0xFFF1_FFF8, 0x3011_FF18, DeviceType::AcxEfa1DsTwoPbis),
    (0xFFF1_FFF6, 0x7011_FF16, DeviceType::AcxEfaXp1DsTwoPbis),
    (0xFFF1_FFF8, 0x7011_FF18, DeviceType::AcxEfaXp1DsTwoPbis),
    (0xFFF1_F1F1, 0x3011_1111, DeviceType::AcxEfa2TwoPbis),
    (0xFFF1_F1F1, 0x7011_1111, DeviceType::AcxEfaXp2TwoPbis),
    (0xFFF1_F6F6, 0x3011_1616, DeviceType::AcxEfa2DsTwoPbis),
    (0xFFF1_F8F8, 0x3011_1818, DeviceType::AcxEfa2DsTwoPbis),
    (0xFFF1_F6F6, 0x7011_1616, DeviceType::AcxEfaXp2DsTwoPbis),
    (0xFFF1_F8F8, 0x7011_1818, DeviceType::AcxEfaXp2DsTwoPbis),
    (0xFFF1_F1F1, 0x3011_A1A1, DeviceType::AcxEfa4TwoPbis),
    (0xFFF1_F1F1, 0x7011_A1A1, DeviceType::AcxEfaXp4TwoPbis),
];

const VMEX: &[Pattern] = &[
    (0xFFFF_FFF1, 0xFFFF_FF11, DeviceType::Avx1553_1),
    (0xFFFF_FFF1, 0xFFFF_FFA1, DeviceType::Avx1553_2),
    (0xFFFF_F1F1, 0xFFFF_1111, DeviceType::Avx1553_2),
    (0xFFFF_FFF6, 0xFFFF_FF16, DeviceType::Avx1553_1),
    (0xFFFF_FFF8, 0xFFFF_FF18, DeviceType::Avx1553_1),
    (0xFFFF_F6F1, 0xFFFF_1611, DeviceType::Avx1553_2),
    (0xFFFF_F8F1, 0xFFFF_1811, DeviceType::Avx1553_2),
    (0xFFFF_F6F6, 0xFFFF_1616, DeviceType::Avx1553_2),
    (0xFFFF_F8F8, 0xFFFF_1818, DeviceType::Avx1553_2),
    (0xFFFF_F1F1, 0xFFFF_A1A1, DeviceType::Avx1553_4),
    (0xFFFF_FFF1, 0xFFFF_3011, DeviceType::Avx3910),
    (0xFFFF_FFF1, 0xFFFF_7011, DeviceType::Avx3910Xp),
    (0xF1F1_F1F1, 0x1111_1111, DeviceType::Avx1553_4TwoPbis),
    (0xF1F1_F1F1, 0xA1A1_A1A1, DeviceType::Avx1553_8),
    (0xFFF1_FFF1, 0x3011_3011, DeviceType::Avx3910_2),
    (0xFFF1_FFF1, 0x7011_7011, DeviceType::Avx3910Xp2),
    (0xF1F1_F6F6, 0x1111_1616, DeviceType::Avx1553_4DsTwoPbis),
    (0xF1F1_F8F8, 0x1111_1818, DeviceType::Avx1553_4DsTwoPbis),
    (0xFFF1_FFF1, 0x3011_FF11, DeviceType::AvxEfa1TwoPbis),
    (0xFFF1_FFF1, 0x7011_FF11, DeviceType::AvxEfaXp1TwoPbis),
    (0xFFF1_FFF6, 0x3011_FF16, DeviceType::AvxEfa1DsTwoPbis),
    (0xFFF1_FFF8, 0x3011_FF18, DeviceType::AvxEfa1DsTwoPbis),
    (0xFFF1_FFF6, 0x7011_FF16, DeviceType::AvxEfaXp1DsTwoPbis),
    (0xFFF1_FFF8, 0x7011_FF18, DeviceType::AvxEfaXp1DsTwoPbis),
    (0xFFF1_F1F1, 0x3011_1111, DeviceType::AvxEfa2TwoPbis),
    (0xFFF1_F1F1, 0x7011_1111, DeviceType::AvxEfaXp2TwoPbis),
    (0xFFF1_F6F6, 0x3011_1616, DeviceType::AvxEfa2DsTwoPbis),
    (0xFFF1_F8F8, 0x3011_1818, DeviceType::AvxEfa2DsTwoPbis),
    (0xFFF1_F6F6, 0x7011_1616, DeviceType::AvxEfaXp2DsTwoPbis),
    (0xFFF1_F8F8, 0x7011_1818, DeviceType::AvxEfaXp2DsTwoPbis),
    (0xFFF1_F1F1, 0x3011_A1A1, DeviceType::AvxEfa4TwoPbis),
    (0xFFF1_F1F1, 0x7011_A1A1, DeviceType::AvxEfaXp4TwoPbis),
];

const PCIX: &[Pattern] = &[
    (0xFFFF_FFF0, 0xFFFF_FF10, DeviceType::Apx1553_1),
    (0xFFFF_F0F0, 0xFFFF_1010, DeviceType::Apx1553_2),
    (0xFFFF_FFF6, 0xFFFF_FF16, DeviceType::Apx1553_1),
    (0xFFFF_FFF8, 0xFFFF_FF18, DeviceType::Apx1553_1),
    (0xFFFF_F6F1, 0xFFFF_1611, DeviceType::Apx1553_2),
    (0xFFFF_F8F1, 0xFFFF_1811, DeviceType::Apx1553_2),
    (0xFFFF_F6F6, 0xFFFF_1616, DeviceType::Apx1553_2),
    (0xFFFF_F8F8, 0xFFFF_1818, DeviceType::Apx1553_2),
    (0xFFFF_F0F0, 0xFFFF_A0A0, DeviceType::Apx1553_4),
    (0xFFFF_FFF0, 0xFFFF_3010, DeviceType::Apx3910),
    (0xFFFF_FFF0, 0xFFFF_7010, DeviceType::Apx3910Xp),
];

const PCIE_PCIX_BASED: &[Pattern] = &[
    (0xFFFF_FFF0, 0xFFFF_3010, DeviceType::Apx3910),
    (0xFFFF_FFF0, 0xFFFF_7010, DeviceType::Apx3910Xp),
];

// Low byte only: full function, simulator only and single function
const USB: &[Pattern] = &[
    (0x0000_00FF, 0x0000_0010, DeviceType::Apu1553_1),
    (0x0000_00FF, 0x0000_0012, DeviceType::Apu1553_1),
    (0x0000_00FF, 0x0000_0014, DeviceType::Apu1553_1),
    (0x0000_00FF, 0x0000_00A0, DeviceType::Apu1553_2),
    (0x0000_00FF, 0x0000_00A2, DeviceType::Apu1553_2),
    (0x0000_00FF, 0x0000_00A4, DeviceType::Apu1553_2),
];

const PCIE_CARD: &[Pattern] = &[
    (0xFFFF_FFF0, 0xFFFF_FF10, DeviceType::Aec1553_1),
    (0xFFFF_FFF0, 0xFFFF_FFA0, DeviceType::Aec1553_2),
];

const MINI_PCIE: &[Pattern] = &[
    (0xFFFF_FFF0, 0xFFFF_FF10, DeviceType::Ame1553_1),
];

const MINI_PCIE_ARTIX7: &[Pattern] = &[
    (0xFFFF_FFF0, 0xFFFF_FF10, DeviceType::Amee1553_1),
    (0xFFFF_F0F0, 0xFFFF_1010, DeviceType::Amee1553_2),
];

const M2_B_M_ARTIX7: &[Pattern] = &[
    (0xFFFF_FFF0, 0xFFFF_FF10, DeviceType::Am2e1553_1),
    (0xFFFF_F0F0, 0xFFFF_1010, DeviceType::Am2e1553_2),
];

const XMC_ARTIXUS: &[Pattern] = &[
    (0xFFFF_FFF0, 0xFFFF_FF10, DeviceType::Axcx1553_1),
    (0xFFFF_F0F0, 0xFFFF_1010, DeviceType::Axcx1553_2),
    (0xF0F0_F0F0, 0x1010_1010, DeviceType::Axcx1553_4),
];

const XMC: &[Pattern] = &[
    (0xFFFF_FFF0, 0xFFFF_FF10, DeviceType::Axc1553_1),
    (0xFFFF_F0F0, 0xFFFF_1010, DeviceType::Axc1553_2),
    (0xFFFF_F0F0, 0xFFFF_A0A0, DeviceType::Axc1553_4),
];

const XMC_EBD: &[Pattern] = &[
    (0xFFFF_FFF0, 0xFFFF_FF10, DeviceType::Axe1553_1),
    (0xFFFF_F0F0, 0xFFFF_1010, DeviceType::Axe1553_2),
    (0xFFFF_F0F0, 0xFFFF_A0A0, DeviceType::Axe1553_4),
];

const XMC_NOREPLAY_NOERROR: &[Pattern] = &[
    (0xFFFF_FFF0, 0xFFFF_FF10, DeviceType::Ase1553_1),
    (0xFFFF_F0F0, 0xFFFF_1010, DeviceType::Ase1553_2),
    (0xFFFF_F0F0, 0xFFFF_A0A0, DeviceType::Ase1553_4),
];

const PMC_XMC_BASED: &[Pattern] = &[
    (0xFFFF_FFF0, 0xFFFF_FF10, DeviceType::Amcx1553_1),
    (0xFFFF_F0F0, 0xFFFF_1010, DeviceType::Amcx1553_2),
    (0xFFFF_F0F0, 0xFFFF_A0A0, DeviceType::Amcx1553_4),
];

const PMC_BASED_EBD: &[Pattern] = &[
    (0xFFFF_FFF0, 0xFFFF_FF10, DeviceType::Amce1553_1),
    (0xFFFF_F0F0, 0xFFFF_1010, DeviceType::Amce1553_2),
    (0xFFFF_F0F0, 0xFFFF_A0A0, DeviceType::Amce1553_4),
];

const PCIE: &[Pattern] = &[
    (0xFFFF_FFF0, 0xFFFF_FF10, DeviceType::Ape1553_1),
    (0xFFFF_F0F0, 0xFFFF_1010, DeviceType::Ape1553_2),
    (0xFFFF_F0F0, 0xFFFF_A0A0, DeviceType::Ape1553_4),
];

const ANET: &[Pattern] = &[
    (0xFFFF_FFF0, 0xFFFF_FF10, DeviceType::Anet1553_1),
    (0xFFFF_FFF0, 0xFFFF_FFA0, DeviceType::Anet1553_2),
];

const ANET_AYS: &[Pattern] = &[
    (0xFFFF_F0F0, 0xFFFF_3010, DeviceType::Anet3910),
    (0xFFFF_F0F0, 0xFFFF_7010, DeviceType::Anet3910Xp),
    (0xFFFF_FFF0, 0xFFFF_FF10, DeviceType::Anet1553_1),
];

const ASC: &[Pattern] = &[
    (0xFFFF_FFF0, 0xFFFF_FF10, DeviceType::Asc1553_1),
    (0xFFFF_F0F0, 0xFFFF_1010, DeviceType::Asc1553_2),
];

const ANET_AYS_MA: &[Pattern] = &[
    (0xFFFF_FFF0, 0xFFFF_FF10, DeviceType::Anet1553_1),
    (0xFFFF_FFF0, 0xFFFF_FFA0, DeviceType::Anet1553_2),
];

const PCI_SHORT_ZYNQMP: &[Pattern] = &[
    (0xFFFF_F0F0, 0xFFFF_3010, DeviceType::Apxx3910),
    (0xFFFF_F0F0, 0xFFFF_7010, DeviceType::Apxx3910Xp),
];

const PCI_E_1L_ZYNQMP: &[Pattern] = &[
    (0xFFFF_F0F0, 0xFFFF_3010, DeviceType::Apex3910),
    (0xFFFF_F0F0, 0xFFFF_7010, DeviceType::Apex3910Xp),
];

const CPCIE_3U_ZYNQMP: &[Pattern] = &[
    (0xFFFF_F0F0, 0xFFFF_3010, DeviceType::Ace3910),
    (0xFFFF_F0F0, 0xFFFF_7010, DeviceType::Ace3910Xp),
];

const XMC_ZYNQMP: &[Pattern] = &[
    (0xFFFF_F0F0, 0xFFFF_3010, DeviceType::Axc3910),
    (0xFFFF_F0F0, 0xFFFF_7010, DeviceType::Axc3910Xp),
];

fn patterns(platform: u32) -> &'static [Pattern] {
    match platform {
        PLATFORM_CPCIX_3U => CPCIX_3U,
        PLATFORM_CPCIX_6U => CPCIX_6U,
        PLATFORM_VMEX_B | PLATFORM_VMEX_A => VMEX,
        PLATFORM_PCIX => PCIX,
        PLATFORM_PCIE_PCIX_BASED => PCIE_PCIX_BASED,
        PLATFORM_USB => USB,
        PLATFORM_PCIE_CARD => PCIE_CARD,
        PLATFORM_MINI_PCIE_CARD | PLATFORM_MINI_PCIE_CARD_AP => MINI_PCIE,
        PLATFORM_MINI_PCIE_ARTIX7 => MINI_PCIE_ARTIX7,
        PLATFORM_M2_B_M_ARTIX7 => M2_B_M_ARTIX7,
        PLATFORM_XMC_ARTIXUS => XMC_ARTIXUS,
        PLATFORM_XMC => XMC,
        PLATFORM_XMC_EBD => XMC_EBD,
        PLATFORM_XMC_NOREPLAY_NOERROR => XMC_NOREPLAY_NOERROR,
        PLATFORM_PMC_XMC_BASED => PMC_XMC_BASED,
        PLATFORM_PMC_BASED_EBD => PMC_BASED_EBD,
        PLATFORM_PCIE
        | PLATFORM_PCIX_PCIE_BASED
        | PLATFORM_CPCIE_3U
        | PLATFORM_CPCIX_3U_PCIE_BASED => PCIE,
        PLATFORM_ANET => ANET,
        PLATFORM_ANET_AYS => ANET_AYS,
        PLATFORM_ASC | PLATFORM_USB3 => ASC,
        PLATFORM_ANET_AYS_MA => ANET_AYS_MA,
        PLATFORM_PCI_SHORT_ZYNQMP => PCI_SHORT_ZYNQMP,
        PLATFORM_PCI_E_1L_ZYNQMP => PCI_E_1L_ZYNQMP,
        PLATFORM_CPCIE_3U_ZYNQMP => CPCIE_3U_ZYNQMP,
        PLATFORM_XMC_ZYNQMP => XMC_ZYNQMP,
        _ => &[],
    }
}

/// Name the device.  Later table entries are more specific, so the last
/// matching entry wins.
pub fn device_type(board_type: u32, board_config: u32) -> DeviceType {
    patterns(board_config & 0xFF)
        .iter()
        .filter(|(mask, pattern, _)| board_type & mask == *pattern)
        .last()
        .map(|(_, _, device)| *device)
        .unwrap_or_default()
}

fn slot_nibble(board_type: u32, slot: usize) -> u32 {
    (board_type >> (slot * 8)) & 0xF0
}

/// Decoded board topology.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoardInfo {
    pub board_type: u32,
    pub board_config: u32,
    pub device_type: DeviceType,
    physical_bius: u8,
    streams: u8,
    // Per logical BIU: stream type and the physical slot it lives in
    bius: Vec<(StreamType, u8)>,
}

impl BoardInfo {
    pub fn decode(board_type: u32, board_config: u32) -> Self {
        let mut physical_bius = 0u8;
        let mut streams = 0u8;
        let mut bius = Vec::new();

        for slot in 0..MAX_PHY_BIU {
            let phy = slot as u8;
            match slot_nibble(board_type, slot) {
                0x10 => {
                    physical_bius += 1;
                    streams += 1;
                    bius.push((StreamType::Ls1553, phy));
                }
                0xA0 => {
                    physical_bius += 1;
                    streams += 2;
                    bius.push((StreamType::Ls1553, phy));
                    bius.push((StreamType::Ls1553, phy));
                }
                0x30 | 0x70 => {
                    physical_bius += 1;
                    bius.push((StreamType::Hs3910, phy));
                }
                _ => (),
            }
        }
        bius.truncate(MAX_BIU);

        let device_type = device_type(board_type, board_config);
        debug!(
            "Board type {board_type:#010X} config {board_config:#010X}: {device_type:?}, {physical_bius} physical BIUs, {streams} streams"
        );

        Self {
            board_type,
            board_config,
            device_type,
            physical_bius,
            streams,
            bius,
        }
    }

    pub fn physical_bius(&self) -> u8 {
        self.physical_bius
    }

    pub fn streams(&self) -> u8 {
        self.streams
    }

    /// Number of logical BIUs
    pub fn bius(&self) -> usize {
        self.bius.len()
    }

    pub fn stream_type(&self, biu: usize) -> Option<StreamType> {
        self.bius.get(biu).map(|(ty, _)| *ty)
    }

    pub fn is_hs(&self, biu: usize) -> bool {
        self.stream_type(biu) == Some(StreamType::Hs3910)
    }

    /// Physical slot of a logical BIU
    pub fn physical_biu(&self, biu: usize) -> Option<u8> {
        self.bius.get(biu).map(|(_, phy)| *phy)
    }

    /// Logical BIU serving a 0-based stream.  With `hs` set, the high speed
    /// BIU paired with the stream's low speed BIU.
    pub fn stream_biu(&self, stream: usize, hs: bool) -> Option<usize> {
        let ls = self
            .bius
            .iter()
            .enumerate()
            .filter(|(_, (ty, _))| *ty == StreamType::Ls1553)
            .nth(stream)
            .map(|(biu, _)| biu)?;
        if hs { self.hs_partner(ls) } else { Some(ls) }
    }

    /// High speed BIU paired with a low speed BIU
    pub fn hs_partner(&self, biu: usize) -> Option<usize> {
        let pair = biu + 1;
        (!self.is_hs(biu) && self.is_hs(pair)).then_some(pair)
    }

    pub fn protocol(&self) -> Protocol {
        if !self.bius.iter().any(|(ty, _)| *ty == StreamType::Hs3910) {
            Protocol::Mil1553
        } else if self.device_type.is_efex() {
            Protocol::Efex
        } else {
            Protocol::Stanag3910
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_3910_board() {
        let board = BoardInfo::decode(0xFFFF_3011, PLATFORM_CPCIX_3U);
        assert_eq!(board.physical_bius(), 2);
        assert_eq!(board.streams(), 1);
        assert_eq!(board.bius(), 2);
        assert!(!board.is_hs(0));
        assert!(board.is_hs(1));
        assert_eq!(board.device_type, DeviceType::Acx3910);
        assert_eq!(board.protocol(), Protocol::Stanag3910);
    }

    #[test]
    fn quad_1553_board() {
        let board = BoardInfo::decode(0xFFFF_A1A1, PLATFORM_CPCIX_3U);
        assert_eq!(board.physical_bius(), 2);
        assert_eq!(board.streams(), 4);
        assert_eq!(board.bius(), 4);
        assert_eq!(board.physical_biu(3), Some(1));
        assert_eq!(board.device_type, DeviceType::Acx1553_4);
        assert_eq!(board.protocol(), Protocol::Mil1553);
    }

    #[test]
    fn dual_3910_board_has_hs_at_one_and_three() {
        let board = BoardInfo::decode(0x3011_3011, PLATFORM_CPCIX_6U);
        assert_eq!(board.streams(), 2);
        assert!(board.is_hs(1));
        assert!(board.is_hs(3));
        assert!(!board.is_hs(2));
        assert_eq!(board.device_type, DeviceType::Acx3910_2);
    }

    #[test]
    fn streams_map_to_bius() {
        let board = BoardInfo::decode(0x3011_3011, PLATFORM_CPCIX_6U);
        assert_eq!(board.stream_biu(0, false), Some(0));
        assert_eq!(board.stream_biu(0, true), Some(1));
        assert_eq!(board.stream_biu(1, false), Some(2));
        assert_eq!(board.stream_biu(1, true), Some(3));
        assert_eq!(board.stream_biu(2, false), None);

        let board = BoardInfo::decode(0xFFFF_A1A1, PLATFORM_CPCIX_3U);
        assert_eq!(board.stream_biu(3, false), Some(3));
        assert_eq!(board.stream_biu(3, true), None);
        assert_eq!(board.hs_partner(0), None);
    }

    #[test]
    fn platform_selects_the_table() {
        assert_eq!(
            device_type(0x1111_1111, PLATFORM_CPCIX_6U),
            DeviceType::Acx1553_4TwoPbis
        );
        assert_eq!(device_type(0xFFFF_FF10, PLATFORM_PCIX), DeviceType::Apx1553_1);
        assert_eq!(device_type(0xFFFF_FF10, 0x00), DeviceType::Unknown);
        assert_eq!(device_type(0xFFFF_FF11, PLATFORM_VMEX_A), DeviceType::Avx1553_1);
    }

    #[test]
    fn single_function_variants() {
        assert_eq!(device_type(0xFFFF_FF16, PLATFORM_CPCIX_3U), DeviceType::Acx1553_1);
        assert_eq!(device_type(0xFFFF_1818, PLATFORM_CPCIX_3U), DeviceType::Acx1553_2);
        assert_eq!(device_type(0xFFFF_1611, PLATFORM_PCIX), DeviceType::Apx1553_2);
        assert_eq!(
            device_type(0x1111_1616, PLATFORM_CPCIX_6U),
            DeviceType::Acx1553_4DsTwoPbis
        );
        assert_eq!(
            device_type(0x1111_1818, PLATFORM_VMEX_B),
            DeviceType::Avx1553_4DsTwoPbis
        );
        assert_eq!(
            device_type(0x7011_FF18, PLATFORM_CPCIX_6U),
            DeviceType::AcxEfaXp1DsTwoPbis
        );
        assert_eq!(
            device_type(0x3011_1616, PLATFORM_VMEX_A),
            DeviceType::AvxEfa2DsTwoPbis
        );
        assert_eq!(device_type(0x7011_7011, PLATFORM_VMEX_A), DeviceType::Avx3910Xp2);
    }

    #[test]
    fn every_platform_has_a_table() {
        let cases = [
            (0xFFFF_3010, PLATFORM_PCIE_PCIX_BASED, DeviceType::Apx3910),
            (0xFFFF_FF12, PLATFORM_USB, DeviceType::Apu1553_1),
            (0xFFFF_FFA4, PLATFORM_USB, DeviceType::Apu1553_2),
            (0xFFFF_FFA0, PLATFORM_PCIE_CARD, DeviceType::Aec1553_2),
            (0xFFFF_FF10, PLATFORM_MINI_PCIE_CARD, DeviceType::Ame1553_1),
            (0xFFFF_FF10, PLATFORM_MINI_PCIE_CARD_AP, DeviceType::Ame1553_1),
            (0xFFFF_1010, PLATFORM_MINI_PCIE_ARTIX7, DeviceType::Amee1553_2),
            (0xFFFF_1010, PLATFORM_M2_B_M_ARTIX7, DeviceType::Am2e1553_2),
            (0x1010_1010, PLATFORM_XMC_ARTIXUS, DeviceType::Axcx1553_4),
            (0xFFFF_A0A0, PLATFORM_XMC, DeviceType::Axc1553_4),
            (0xFFFF_1010, PLATFORM_XMC_EBD, DeviceType::Axe1553_2),
            (0xFFFF_FF10, PLATFORM_XMC_NOREPLAY_NOERROR, DeviceType::Ase1553_1),
            (0xFFFF_3010, PLATFORM_XMC_ZYNQMP, DeviceType::Axc3910),
            (0xFFFF_A0A0, PLATFORM_PMC_XMC_BASED, DeviceType::Amcx1553_4),
            (0xFFFF_FF10, PLATFORM_PMC_BASED_EBD, DeviceType::Amce1553_1),
            (0xFFFF_1010, PLATFORM_PCIE, DeviceType::Ape1553_2),
            (0xFFFF_A0A0, PLATFORM_CPCIX_3U_PCIE_BASED, DeviceType::Ape1553_4),
            (0xFFFF_FFA0, PLATFORM_ANET, DeviceType::Anet1553_2),
            (0xFFFF_7010, PLATFORM_ANET_AYS, DeviceType::Anet3910Xp),
            (0xFFFF_FF10, PLATFORM_ANET_AYS_MA, DeviceType::Anet1553_1),
            (0xFFFF_1010, PLATFORM_USB3, DeviceType::Asc1553_2),
            (0xFFFF_7010, PLATFORM_PCI_SHORT_ZYNQMP, DeviceType::Apxx3910Xp),
            (0xFFFF_3010, PLATFORM_PCI_E_1L_ZYNQMP, DeviceType::Apex3910),
            (0xFFFF_7010, PLATFORM_CPCIE_3U_ZYNQMP, DeviceType::Ace3910Xp),
        ];
        for (board_type, platform, expected) in cases {
            assert_eq!(
                device_type(board_type, platform),
                expected,
                "{board_type:#010X} on {platform:#04X}"
            );
        }
    }

    #[test]
    fn reported_ids() {
        assert_eq!(DeviceType::Apx1553_1.id(), 22);
        assert_eq!(DeviceType::Acx1553_4.id(), 30);
        assert_eq!(DeviceType::Avx3910Xp2.id(), 46);
        assert_eq!(DeviceType::Apu1553_1.id(), 72);
        assert_eq!(DeviceType::Axcx1553_4.id(), 115);
        assert_eq!(DeviceType::Unknown.id(), 0);
    }

    #[test]
    fn efex_protocol() {
        let board = BoardInfo::decode(0x3011_FF11, PLATFORM_CPCIX_6U);
        assert_eq!(board.device_type, DeviceType::AcxEfa1TwoPbis);
        assert_eq!(board.protocol(), Protocol::Efex);
    }
}
