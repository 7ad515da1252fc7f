//! INI: board identification, and with mode 2 a full reinitialisation of the
//! software state of every BIU.

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use crate::board::Protocol;
use crate::com::{AckSize, CmdSize, CommandEntry, INI, Request, Response};
use crate::device::Device;
use crate::device::state::DeviceState;
use crate::Result;

/// Reinitialise all software state; BIUs stay inactive until reset
pub const INI_FULL: u32 = 2;

// Protocol codes reported for a board whose first BIU is low speed but which
// also carries high speed BIUs
const PROT_COMBINED_3910: u32 = 4;
const PROT_COMBINED_EFEX: u32 = 5;

const MEM_UNIT: u32 = 0x1_0000;

pub(crate) const COMMANDS: &[CommandEntry<Device>] = &[CommandEntry {
    code: INI,
    name: "INI",
    handler: ini,
    cmd_size: CmdSize::words(1),
    ack_size: AckSize::words(17),
}];

/// What INI reports about the board.  Memory sizes are in 64KB units.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct IniInfo {
    /// Application type byte of each physical BIU slot
    pub bt: [u32; 4],
    pub streams: u32,
    pub prot: u32,
    pub pbi_id_biu1: u32,
    pub asp_mon_id: u32,
    pub asp_bite_id: u32,
    pub pbi_id_biu2: u32,
    pub glb_mem_size: u32,
    pub loc_dram_size: u32,
    pub shared_dram_size: u32,
    pub board_config: u32,
    pub board_type: u32,
    pub board_sub_type: u32,
    pub hardware_variant: u32,
}

impl IniInfo {
    pub fn to_words(&self) -> [u32; 17] {
        [
            self.bt[0],
            self.bt[1],
            self.bt[2],
            self.bt[3],
            self.streams,
            self.prot,
            self.pbi_id_biu1,
            self.asp_mon_id,
            self.asp_bite_id,
            self.pbi_id_biu2,
            self.glb_mem_size,
            self.loc_dram_size,
            self.shared_dram_size,
            self.board_config,
            self.board_type,
            self.board_sub_type,
            self.hardware_variant,
        ]
    }
}

impl Device {
    pub fn ini_info(&self) -> IniInfo {
        let board = &self.board;
        let mut bt = [0; 4];
        for (slot, bt) in bt.iter_mut().enumerate() {
            *bt = (board.board_type >> (slot * 8)) & 0xFF;
        }

        let protocol = board.protocol();
        let prot = if board.is_hs(0) {
            protocol as u32
        } else {
            match protocol {
                Protocol::Mil1553 => Protocol::Mil1553 as u32,
                Protocol::Stanag3910 => PROT_COMBINED_3910,
                Protocol::Efex => PROT_COMBINED_EFEX,
            }
        };

        IniInfo {
            bt,
            streams: board.streams() as u32,
            prot,
            glb_mem_size: self.config.gram_size / MEM_UNIT,
            shared_dram_size: self.config.shared_size / MEM_UNIT,
            board_config: board.board_config,
            board_type: board.board_type,
            board_sub_type: self.config.board_sub_type,
            hardware_variant: self.config.hw_variant,
            ..Default::default()
        }
    }

    /// Handle INI.  With [`INI_FULL`] every BIU's software state starts
    /// over, every BIU is marked inactive until its next reset and one
    /// conditional reset is allowed.
    pub fn ini(&mut self, mode: u32) -> Result<IniInfo> {
        if mode == INI_FULL {
            for biu in 0..self.bius.len() {
                let layout = self.layout(biu)?.clone();
                let state = &mut self.bius[biu];
                state.reset(&layout);
                state.active = false;
            }
            self.reset_can_be_done = true;
            self.state = DeviceState::Initialized;
            info!("Software state reinitialised for {} BIUs", self.bius.len());
        }
        Ok(self.ini_info())
    }
}

fn ini(dev: &mut Device, req: &Request, rsp: &mut Response) -> Result<()> {
    let info = dev.ini(req.word(0))?;
    rsp.words.extend(info.to_words());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::testing::{self, run};

    #[test]
    fn reports_the_board() {
        let (mut dev, _) = testing::device();
        dev.bius[0].bc.xfer_interrupts.insert(3);

        let reply = run(&mut dev, INI, &[1], 100);
        assert_eq!(reply.ack.error, 0);
        let board_config = dev.board.board_config;
        assert_eq!(
            reply.words,
            [
                0x11,
                0xFF,
                0xFF,
                0xFF,
                1,
                1,
                0,
                0,
                0,
                0,
                8,
                0,
                2,
                board_config,
                0xFFFF_FF11,
                0,
                0
            ]
        );
        // Identification only
        assert!(dev.bius[0].active);
        assert!(!dev.bius[0].bc.xfer_interrupts.is_empty());
    }

    #[test]
    fn full_ini_starts_over() {
        let (mut dev, _) = testing::device();
        dev.bius[0].bc.xfer_interrupts.insert(3);
        dev.reset(0, 0).unwrap();

        let reply = run(&mut dev, INI, &[INI_FULL], 100);
        assert_eq!(reply.ack.error, 0);
        assert_eq!(dev.state(), DeviceState::Initialized);
        assert!(!dev.bius[0].active);
        assert!(dev.bius[0].bc.xfer_interrupts.is_empty());
        assert!(dev.reset_can_be_done);
    }

    #[test]
    fn combined_board_protocol() {
        let (dev, _) = testing::device_with(testing::config_ls_hs());
        let info = dev.ini_info();
        assert!([PROT_COMBINED_3910, PROT_COMBINED_EFEX].contains(&info.prot));
        assert_eq!(info.streams, 1);
        assert_eq!(info.bt[1], 0x30);
    }
}
