//! Firmware command executor.
//!
//! The BIU firmware is driven through a request/acknowledge primitive: the
//! TSW writes a command into the BIU's system control block and waits for the
//! firmware to acknowledge it.  The primitive itself is board specific, so it
//! is injected into the device as a [`Firmware`] object.  [`execute()`] adds the
//! bounded wait.

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use crate::{Error, Result};

/// Commands understood by the BIU firmware
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FwCommand {
    EnableBc = 0x02,
    EnableBm = 0x04,
    EnableReplay = 0x05,
    DisableBc = 0x0A,
    DisableBm = 0x0C,
    DisableReplay = 0x0D,
    /// Built-in self test.  The completion status is 0 on success.
    SelfTest = 0x1F,
}

impl FwCommand {
    pub const fn code(self) -> u32 {
        self as u32
    }
}

/// Request/acknowledge access to the BIU firmware.
pub trait Firmware {
    /// Hand a command to the firmware of `biu`.
    fn submit(&mut self, biu: usize, command: FwCommand) -> Result<()>;

    /// Poll for completion of the last submitted command.  Returns the
    /// completion status once the firmware has acknowledged.
    fn poll_done(&mut self, biu: usize) -> Result<Option<u32>>;
}

/// Submit a command and wait at most `poll_limit` polls for its completion.
///
/// Returns the firmware's completion status, or
/// [`Error::TargetResponseTimeout`] if it never acknowledges.  There is no
/// retry.
pub fn execute(
    fw: &mut dyn Firmware,
    biu: usize,
    command: FwCommand,
    poll_limit: u32,
) -> Result<u32> {
    trace!("BIU {biu}: firmware command {command:?}");
    fw.submit(biu, command)?;

    for _ in 0..poll_limit {
        if let Some(status) = fw.poll_done(biu)? {
            return Ok(status);
        }
    }

    warn!("BIU {biu}: firmware did not acknowledge {command:?}");
    Err(Error::TargetResponseTimeout)
}
