//! RESET and RESET_INFO.
//!
//! A reset self tests the BIU through the firmware, stops everything it is
//! running, reinitialises its control block and returns its software state
//! to the quiescent state.  The mode word can leave the simulator buffers or
//! the monitor alone.

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use crate::com::{AckSize, CmdSize, CommandEntry, Request, Response, SYS_RESET, SYS_RESET_INFO};
use crate::device::Device;
use crate::device::state::DeviceState;
use crate::fw::{self, FwCommand};
use crate::{Error, Result};

pub const RESET_ALL: u32 = 0;
/// Leave the monitor, replay and dynamic tag monitor running
pub const RESET_WITHOUT_MONITOR: u32 = 1;
/// Leave the simulator buffer contents alone
pub const RESET_WITHOUT_SIMBUF: u32 = 2;
/// Only reset if no reset happened since the last full INI
pub const RESET_ONLY_IF_NOT_ALREADY_RESET: u32 = 4;

const RESET_MODE_MASK: u32 = 0x7;

pub(crate) const COMMANDS: &[CommandEntry<Device>] = &[
    CommandEntry {
        code: SYS_RESET,
        name: "SYS_RESET",
        handler: reset,
        // mode, monitor buffer count for a high speed partner
        cmd_size: CmdSize::words(2),
        ack_size: AckSize::words(8),
    },
    CommandEntry {
        code: SYS_RESET_INFO,
        name: "SYS_RESET_INFO",
        handler: reset_info,
        cmd_size: CmdSize::words(0),
        ack_size: AckSize::words(8),
    },
];

/// Where a stream's monitor and simulator buffers ended up.  Buffer counts
/// are in 64KB units.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ResetInfo {
    pub mbufs: u32,
    pub sbufs: u32,
    pub hs_mbufs: u32,
    pub hs_sbufs: u32,
    pub maddr: u32,
    pub saddr: u32,
    pub hs_maddr: u32,
    pub hs_saddr: u32,
}

impl ResetInfo {
    pub fn to_words(&self) -> [u32; 8] {
        [
            self.mbufs,
            self.sbufs,
            self.hs_mbufs,
            self.hs_sbufs,
            self.maddr,
            self.saddr,
            self.hs_maddr,
            self.hs_saddr,
        ]
    }
}

const BUF_UNIT: u32 = 0x1_0000;

impl Device {
    /// Buffer placement of `biu` and its high speed partner
    pub fn reset_info(&self, biu: usize) -> Result<ResetInfo> {
        let layout = self.layout(biu)?;
        let mut info = ResetInfo {
            mbufs: layout.bm_buf_size / BUF_UNIT,
            sbufs: layout.sim_buf_size() / BUF_UNIT,
            maddr: layout.bm_buf,
            saddr: layout.sim_buf,
            ..Default::default()
        };
        if let Some(hs) = self.board.hs_partner(biu) {
            let hs = self.layout(hs)?;
            info.hs_mbufs = hs.bm_buf_size / BUF_UNIT;
            info.hs_sbufs = hs.sim_buf_size() / BUF_UNIT;
            info.hs_maddr = hs.bm_buf;
            info.hs_saddr = hs.sim_buf;
        }
        Ok(info)
    }

    /// Reset `biu` and its high speed partner, if any.
    ///
    /// With [`RESET_ONLY_IF_NOT_ALREADY_RESET`] nothing happens unless a full
    /// INI came first.  A failed self test leaves the BIU inactive and
    /// returns [`Error::BiuNotActive`].
    pub fn reset(&mut self, biu: usize, mode: u32) -> Result<()> {
        self.check_biu(biu)?;
        if mode & RESET_MODE_MASK == RESET_ONLY_IF_NOT_ALREADY_RESET && !self.reset_can_be_done {
            debug!("BIU {biu}: already reset");
            return Ok(());
        }

        self.reset_one(biu, mode)?;
        if let Some(hs) = self.board.hs_partner(biu) {
            self.reset_one(hs, mode)?;
        }
        self.reset_can_be_done = false;
        self.state = DeviceState::Reset;
        Ok(())
    }

    fn reset_one(&mut self, biu: usize, mode: u32) -> Result<()> {
        self.self_test(biu)?;

        let keep_monitor = mode & RESET_WITHOUT_MONITOR != 0;
        self.set_bc_mode(biu, false)?;
        if !keep_monitor {
            self.set_bm_mode(biu, false)?;
            self.set_replay_mode(biu, false)?;
        }

        self.init_control_block(biu)?;
        let layout = self.layout(biu)?.clone();
        if mode & RESET_WITHOUT_SIMBUF == 0 {
            self.gram.fill(layout.sim_buf, layout.sim_buf_size(), 0)?;
        }

        let state = &mut self.bius[biu];
        if keep_monitor {
            let bm = state.bm.clone();
            let replay = state.replay.clone();
            let dyntags = state.dyntags.clone();
            state.reset(&layout);
            state.bm = bm;
            state.replay = replay;
            state.dyntags = dyntags;
        } else {
            state.reset(&layout);
            self.gram.fill(layout.bm_buf, layout.bm_buf_size, 0)?;
        }

        info!("BIU {biu}: reset, mode {mode:#X}");
        Ok(())
    }

    // Interrupt handlers stay off the BIU while the firmware tests it
    fn self_test(&mut self, biu: usize) -> Result<()> {
        self.bius[biu].bite = true;
        let result = fw::execute(
            self.fw.as_mut(),
            biu,
            FwCommand::SelfTest,
            self.config.fw_poll_limit,
        );
        let state = &mut self.bius[biu];
        state.bite = false;
        state.active = matches!(result, Ok(0));
        if !state.active {
            error!("BIU {biu}: self test failed: {result:?}");
            return Err(Error::BiuNotActive);
        }
        Ok(())
    }
}

fn reset(dev: &mut Device, req: &Request, rsp: &mut Response) -> Result<()> {
    dev.reset(req.biu, req.word(0))?;
    rsp.words.extend(dev.reset_info(req.biu)?.to_words());
    Ok(())
}

fn reset_info(dev: &mut Device, req: &Request, rsp: &mut Response) -> Result<()> {
    rsp.words.extend(dev.reset_info(req.biu)?.to_words());
    Ok(())
}
