//! Per-BIU software state.

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

use alloc::collections::BTreeSet;
use alloc::vec;
use alloc::vec::Vec;

use crate::device::layout::BiuLayout;
use crate::ir::dyntag::DyntagMonitor;
use crate::ir::srvw::SrvwState;
use crate::sys::fifo::FifoTable;
use crate::sys::systag::SystagTable;
use crate::sys::track::TrackTable;

/// Lifecycle of a device
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum DeviceState {
    #[default]
    Uninitialized,
    /// Topology decoded, BIU state initialised
    Initialized,
    /// At least one BIU has been reset since the last init
    Reset,
}

/// Run status of a subsystem or a trigger
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    #[default]
    Halt,
    Busy,
}

/// Status shown to the host for the BC, cleared when a stop instruction is hit
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BcStatusDisplay {
    pub status: u32,
    pub hxfer: u32,
    pub msg_count: u32,
    pub err_count: u32,
}

#[derive(Debug, Clone)]
pub struct BcState {
    pub status: RunStatus,
    /// Armed for an externally triggered start
    pub trg_status: RunStatus,
    /// Dynamic bus control start armed
    pub dbc_start: RunStatus,
    /// Dynamic bus control stop armed
    pub dbc_stop: RunStatus,
    /// TSW pointer of the stop instruction, 0 if none
    pub stop_instr: u32,
    /// TSW pointer of the externally triggered start instruction, 0 if none
    pub trigger_instr: u32,
    /// Transfers with their interrupt enabled
    pub xfer_interrupts: BTreeSet<u32>,
    /// Completed messages per transfer id
    pub msg_counts: Vec<u32>,
    pub display: BcStatusDisplay,
}

impl BcState {
    fn new(xfers: u32) -> Self {
        Self {
            status: RunStatus::Halt,
            trg_status: RunStatus::Halt,
            dbc_start: RunStatus::Halt,
            dbc_stop: RunStatus::Halt,
            stop_instr: 0,
            trigger_instr: 0,
            xfer_interrupts: BTreeSet::new(),
            msg_counts: vec![0; xfers as usize],
            display: BcStatusDisplay::default(),
        }
    }
}

#[derive(Debug, Default, Clone)]
pub struct RtState {
    pub status: RunStatus,
    /// (rt, sa) pairs with the receive interrupt enabled
    pub rx_interrupts: BTreeSet<(u32, u32)>,
    /// (rt, sa) pairs with the transmit interrupt enabled
    pub tx_interrupts: BTreeSet<(u32, u32)>,
}

/// Half buffer recording of the bus monitor ring
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BmRecording {
    pub enabled: bool,
    /// TSW pointer of the half buffer ready for the host
    pub start: u32,
    /// Entries in the half buffer
    pub entries: u32,
    /// Half buffer full interrupts seen
    pub hfi_count: u32,
}

#[derive(Debug, Default, Clone)]
pub struct BmState {
    pub status: RunStatus,
    /// Set once any monitor interrupt arrives
    pub ir_status: bool,
    pub rec: BmRecording,
}

#[derive(Debug, Default, Clone)]
pub struct ReplayState {
    pub status: RunStatus,
    /// Half buffer interrupts seen
    pub rpi_count: u32,
}

/// Software state of one logical BIU
#[derive(Debug, Clone)]
pub struct BiuState {
    /// Passed its last self test
    pub active: bool,
    /// Self test in progress; interrupt handlers must not touch the BIU
    pub bite: bool,
    /// Interrupt log-list read cursor, TSW pointer
    pub islp: u32,
    pub bc: BcState,
    pub rt: RtState,
    pub bm: BmState,
    pub replay: ReplayState,
    pub srvw: SrvwState,
    pub systags: SystagTable,
    pub tracks: TrackTable,
    pub fifos: FifoTable,
    pub dyntags: DyntagMonitor,
}

impl BiuState {
    pub fn new(layout: &BiuLayout) -> Self {
        Self {
            active: true,
            bite: false,
            islp: layout.ir_log,
            bc: BcState::new(layout.bc_xfer_count),
            rt: RtState::default(),
            bm: BmState::default(),
            replay: ReplayState::default(),
            srvw: SrvwState::new(layout.bc_xfer_count),
            systags: SystagTable::new(),
            tracks: TrackTable::new(),
            fifos: FifoTable::new(),
            dyntags: DyntagMonitor::new(),
        }
    }

    /// Return to the quiescent state after a reset.  The self test result is
    /// kept.
    pub fn reset(&mut self, layout: &BiuLayout) {
        let active = self.active;
        *self = Self::new(layout);
        self.active = active;
    }
}
