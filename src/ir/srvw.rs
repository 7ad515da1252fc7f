//! Service request and vector word handling.
//!
//! When an RT sets the service request bit, the BC fetches its vector word
//! through one of the special transfers in the system control block.  The
//! vector word selects an entry of a lookup table:
//!
//! - bits 12..14: table (single, multiple or delete, each RX and TX)
//! - bit 15: the entry is a request, not plain status
//! - bits 7..11: RT
//! - bits 0..6: subaddress or mode code
//!
//! A single request runs the transfer once through the acyclic instruction
//! list.  Multiple and delete requests switch the transfer in and out of the
//! low priority subframe, which is rebuilt from the enabled instructions.
//!
//! [`SrvwState`] holds the tables and decides what to do.  Writing the
//! resulting instructions into global RAM is left to the device.

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

use alloc::collections::BTreeMap;
use alloc::vec;
use alloc::vec::Vec;
#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use crate::device::layout::BC_XFER_DESC_SIZE;
use crate::{Error, Result};

/// BC instruction opcode: run a transfer
pub const INSTR_XFER: u32 = 0x10;
/// BC instruction opcode: return from the instruction list
pub const INSTR_RET: u32 = 0x21;

/// Most transfers in the service request subframe
pub const MAX_SUBFRAME_XFERS: usize = 128;

const XID_MASK: u16 = 0x7FFF;
// Set on multiple and delete entries while the transfer is in the subframe
const XID_ACTIVE: u16 = 0x8000;
// Instruction enabled in the subframe
const INSTR_ENABLED: u32 = 1;

/// Build a BC instruction word
pub const fn make_instr(opcode: u32, arg: u32) -> u32 {
    (opcode << 26).wrapping_add(arg & 0x03FF_FFFF)
}

/// Lookup table selected by bits 12..14 of the vector word
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SrvwTable {
    SingleRx = 0,
    SingleTx = 1,
    MultipleRx = 2,
    MultipleTx = 3,
    DeleteRx = 4,
    DeleteTx = 5,
}

impl SrvwTable {
    pub fn from_index(index: u32) -> Option<Self> {
        Some(match index {
            0 => SrvwTable::SingleRx,
            1 => SrvwTable::SingleTx,
            2 => SrvwTable::MultipleRx,
            3 => SrvwTable::MultipleTx,
            4 => SrvwTable::DeleteRx,
            5 => SrvwTable::DeleteTx,
            _ => return None,
        })
    }

    // Multiple and delete entries of one direction flip together
    fn pair(self) -> Option<(SrvwTable, SrvwTable)> {
        match self {
            SrvwTable::MultipleRx | SrvwTable::DeleteRx => {
                Some((SrvwTable::DeleteRx, SrvwTable::MultipleRx))
            }
            SrvwTable::MultipleTx | SrvwTable::DeleteTx => {
                Some((SrvwTable::DeleteTx, SrvwTable::MultipleTx))
            }
            _ => None,
        }
    }
}

/// Last vector word seen from an RT
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SrvwRtStatus {
    /// Transfer the vector word resolved to, 0 if none
    pub xid: u16,
    /// Last vector word
    pub lvw: u16,
    /// Service requests seen
    pub src: u32,
}

/// Last vector word fetched by a BC transfer
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SrvwXferStatus {
    pub lvw: u16,
    pub src: u32,
}

/// What the device must write after a vector word was decoded
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SrvwAction {
    Nothing,
    /// Run this transfer instruction once from the acyclic list
    Single(u32),
    /// Replace the low priority list with these transfer instructions
    Subframe(Vec<u32>),
}

/// Service request state of one BIU
#[derive(Debug, Clone)]
pub struct SrvwState {
    pub enabled: bool,
    // (table, rt, sa or mode code) to transfer id
    table: BTreeMap<(SrvwTable, u8, u8), u16>,
    // Transfer instructions, bit 0 set while enabled
    subframe: Vec<u32>,
    rt_status: [SrvwRtStatus; 32],
    xfer_status: Vec<SrvwXferStatus>,
}

impl SrvwState {
    pub fn new(xfers: u32) -> Self {
        Self {
            enabled: false,
            table: BTreeMap::new(),
            subframe: Vec::new(),
            rt_status: [SrvwRtStatus::default(); 32],
            xfer_status: vec![SrvwXferStatus::default(); xfers as usize],
        }
    }

    /// Map a vector word entry to a transfer.  `xid` 0 removes the entry.
    pub fn define(&mut self, table: SrvwTable, rt: u32, sa_mid: u32, xid: u32) -> Result<()> {
        if rt >= 32 {
            return Err(Error::InvalidRt);
        }
        if sa_mid >= 128 || xid > XID_MASK as u32 {
            return Err(Error::ParameterOutOfRange);
        }
        let key = (table, rt as u8, sa_mid as u8);
        if xid == 0 {
            self.table.remove(&key);
        } else {
            self.table.insert(key, xid as u16);
        }
        Ok(())
    }

    fn instr(xfer_base: u32, xid: u16) -> u32 {
        make_instr(
            INSTR_XFER,
            xfer_base + (xid & XID_MASK) as u32 * BC_XFER_DESC_SIZE,
        )
    }

    /// Collect every multiple request transfer into the subframe, all
    /// disabled.  `xfer_base` is the BIU relative address of the transfer
    /// descriptor table.
    pub fn build_subframe(&mut self, xfer_base: u32) {
        self.subframe.clear();
        let multiples: Vec<_> = self
            .table
            .iter()
            .filter(|((table, _, _), _)| {
                matches!(table, SrvwTable::MultipleRx | SrvwTable::MultipleTx)
            })
            .map(|((table, rt, sa), xid)| (*table, *rt, *sa, *xid))
            .collect();

        for (table, rt, sa, xid) in multiples {
            if let Some((delete, multiple)) = table.pair() {
                for t in [delete, multiple] {
                    if let Some(entry) = self.table.get_mut(&(t, rt, sa)) {
                        *entry &= XID_MASK;
                    }
                }
            }
            let instr = Self::instr(xfer_base, xid);
            if self.subframe.len() < MAX_SUBFRAME_XFERS && !self.subframe.contains(&instr) {
                self.subframe.push(instr);
            }
        }
        debug!("Service request subframe holds {} transfers", self.subframe.len());
    }

    fn set_subframe(&mut self, instr: u32, enable: bool) -> Vec<u32> {
        for entry in self.subframe.iter_mut() {
            if *entry & !INSTR_ENABLED == instr {
                if enable {
                    *entry |= INSTR_ENABLED;
                } else {
                    *entry &= !INSTR_ENABLED;
                }
            }
        }
        self.enabled_instrs()
    }

    /// Transfer instructions currently enabled in the subframe
    pub fn enabled_instrs(&self) -> Vec<u32> {
        self.subframe
            .iter()
            .filter(|instr| *instr & INSTR_ENABLED != 0)
            .map(|instr| instr & !INSTR_ENABLED)
            .collect()
    }

    /// Decode a vector word received from `rt` through transfer `xid`.
    pub fn handle(&mut self, vw: u16, rt: u8, xid: u32, xfer_base: u32) -> SrvwAction {
        let request = vw & 0x8000 != 0;
        let table = SrvwTable::from_index(((vw >> 12) & 0x7) as u32);
        let rt_index = ((vw >> 7) & 0x1F) as u8;
        let sa_index = (vw & 0x7F) as u8;

        let mut xid_srvw = table
            .and_then(|t| self.table.get(&(t, rt_index, sa_index)))
            .map(|x| x & XID_MASK)
            .unwrap_or(0);

        let mut action = SrvwAction::Nothing;
        if let (true, Some(table)) = (request && xid_srvw != 0, table) {
            let instr = Self::instr(xfer_base, xid_srvw);
            match table {
                SrvwTable::SingleRx | SrvwTable::SingleTx => {
                    action = SrvwAction::Single(instr);
                }
                SrvwTable::MultipleRx | SrvwTable::MultipleTx => {
                    self.mark(table, rt_index, sa_index, true);
                    action = SrvwAction::Subframe(self.set_subframe(instr, true));
                }
                SrvwTable::DeleteRx | SrvwTable::DeleteTx => {
                    let active = self
                        .table
                        .get(&(table, rt_index, sa_index))
                        .is_some_and(|x| x & XID_ACTIVE != 0);
                    if active {
                        self.mark(table, rt_index, sa_index, false);
                        action = SrvwAction::Subframe(self.set_subframe(instr, false));
                    } else {
                        xid_srvw = 0;
                    }
                }
            }
        }
        trace!("Vector word {vw:#06X} from RT {rt}: xid {xid_srvw} {action:?}");

        if let Some(status) = self.rt_status.get_mut(rt as usize) {
            status.xid = xid_srvw;
            status.lvw = vw;
            status.src = status.src.wrapping_add(1);
        }
        if let Some(status) = self.xfer_status.get_mut(xid as usize) {
            status.lvw = vw;
            status.src = status.src.wrapping_add(1);
        }
        action
    }

    fn mark(&mut self, table: SrvwTable, rt: u8, sa: u8, active: bool) {
        let Some((delete, multiple)) = table.pair() else {
            return;
        };
        for t in [delete, multiple] {
            if let Some(entry) = self.table.get_mut(&(t, rt, sa)) {
                if active {
                    *entry |= XID_ACTIVE;
                } else {
                    *entry &= XID_MASK;
                }
            }
        }
    }

    pub fn rt_status(&self, rt: u32) -> Result<SrvwRtStatus> {
        self.rt_status
            .get(rt as usize)
            .copied()
            .ok_or(Error::InvalidRt)
    }

    pub fn xfer_status(&self, xid: u32) -> Option<SrvwXferStatus> {
        self.xfer_status.get(xid as usize).copied()
    }
}
