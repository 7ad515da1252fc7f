//! Starting and stopping the BC, the bus monitor and replay.
//!
//! The running state of each lives in the system status word.  A change is
//! only sent to the firmware when the requested state differs from what the
//! status word already shows.

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use crate::Result;
use crate::device::Device;
use crate::device::layout::SysCb;
use crate::fw::{self, FwCommand};
use crate::ram::MemIo;

/// Monitor enabled
pub const SSW_MNE: u32 = 0x0080_0000;
/// BC enabled
pub const SSW_BCE: u32 = 0x0040_0000;
/// Replay enabled
pub const SSW_RPE: u32 = 0x0010_0000;

/// A subsystem whose running state the firmware controls
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Subsystem {
    Bc,
    Monitor,
    Replay,
}

impl Subsystem {
    fn ssw_bit(self) -> u32 {
        match self {
            Subsystem::Bc => SSW_BCE,
            Subsystem::Monitor => SSW_MNE,
            Subsystem::Replay => SSW_RPE,
        }
    }

    fn command(self, on: bool) -> FwCommand {
        match (self, on) {
            (Subsystem::Bc, true) => FwCommand::EnableBc,
            (Subsystem::Bc, false) => FwCommand::DisableBc,
            (Subsystem::Monitor, true) => FwCommand::EnableBm,
            (Subsystem::Monitor, false) => FwCommand::DisableBm,
            (Subsystem::Replay, true) => FwCommand::EnableReplay,
            (Subsystem::Replay, false) => FwCommand::DisableReplay,
        }
    }
}

impl Device {
    /// Whether `subsystem` of `biu` is running, as the status word shows
    pub fn is_running(&self, biu: usize, subsystem: Subsystem) -> Result<bool> {
        let cb = self.layout(biu)?.cb;
        let ssw = self.tr.order().apply(self.gram.read_u32(cb + SysCb::ssw_offset())?);
        Ok(ssw & subsystem.ssw_bit() != 0)
    }

    /// Start or stop `subsystem` of `biu`.  Returns whether a firmware
    /// command was needed.
    pub fn set_mode(&mut self, biu: usize, subsystem: Subsystem, on: bool) -> Result<bool> {
        if self.is_running(biu, subsystem)? == on {
            trace!("BIU {biu}: {subsystem:?} already {}", if on { "on" } else { "off" });
            return Ok(false);
        }

        let command = subsystem.command(on);
        fw::execute(self.fw.as_mut(), biu, command, self.config.fw_poll_limit)?;

        // The firmware owns the status word; mirror the change so the next
        // request sees it even before the BIU updates it
        let at = self.layout(biu)?.cb + SysCb::ssw_offset();
        let order = self.tr.order();
        let ssw = order.apply(self.gram.read_u32(at)?);
        let ssw = if on {
            ssw | subsystem.ssw_bit()
        } else {
            ssw & !subsystem.ssw_bit()
        };
        self.gram.write_u32(at, order.apply(ssw))?;

        debug!("BIU {biu}: {command:?}");
        Ok(true)
    }

    pub fn set_bc_mode(&mut self, biu: usize, on: bool) -> Result<bool> {
        self.set_mode(biu, Subsystem::Bc, on)
    }

    pub fn set_bm_mode(&mut self, biu: usize, on: bool) -> Result<bool> {
        self.set_mode(biu, Subsystem::Monitor, on)
    }

    pub fn set_replay_mode(&mut self, biu: usize, on: bool) -> Result<bool> {
        self.set_mode(biu, Subsystem::Replay, on)
    }
}
