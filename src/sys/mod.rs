//! SYS, TRACK and FIFO command groups.
//!
//! - [`fifo`] - FIFO queues feeding transmit buffers
//! - [`ini`] - INI
//! - [`reset`] - RESET and RESET_INFO
//! - [`systag`] - System dynamic data tags
//! - [`track`] - Multiplexed data tracks

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

pub mod fifo;
pub mod ini;
pub mod reset;
pub mod systag;
pub mod track;

use alloc::vec::Vec;
#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use crate::addr::{AddressTranslator, MAX_BIU};
use crate::com::{
    AckSize, CmdSize, CommandEntry, FIFO_BC_ASSIGN, FIFO_INI, FIFO_RT_ASSIGN, FIFO_STATUS,
    FIFO_WRITE, HS_SYS_SYSTAG_CON, HS_SYS_SYSTAG_DEF, Request, Response, SYS_GET_BOARD_INFO,
    SYS_MEM_PART_GET, SYS_MEM_PART_SET, SYS_PING, SYS_SYSTAG_CON, SYS_SYSTAG_DEF, TRACK_ALLOC,
    TRACK_DEF, TRACK_READ, TRACK_SCAN, frame_size,
};
use crate::config::MemPartition;
use crate::device::layout::{BcXferDesc, RtSaDesc};
use crate::device::{Device, compute_layouts};
use crate::ram::MemIo;
use crate::{Error, Result};
use systag::{SYSTAG_RECALC_CHECKSUM, SYSTAG_RUN_DISABLED, SYSTAG_RUN_ENABLED};
use systag::{SYSTAG_RUN_RESUME, SYSTAG_RUN_SUSPEND, SystagDef, SystagTarget};
use track::{TrackDef, TrackSource};

/// Keys answered by GET_BOARD_INFO
pub const BOARD_INFO_MAX: u32 = 34;

pub const BOARD_INFO_DEVICE_TYPE: u32 = 0;
pub const BOARD_INFO_CHANNEL_COUNT: u32 = 1;
pub const BOARD_INFO_BIU_COUNT: u32 = 2;
pub const BOARD_INFO_BOARD_TYPE: u32 = 3;
pub const BOARD_INFO_BOARD_CONFIG: u32 = 4;
pub const BOARD_INFO_SERIAL: u32 = 5;
pub const BOARD_INFO_PARTNO: u32 = 6;
pub const BOARD_INFO_SIZE_GLOBAL: u32 = 7;
pub const BOARD_INFO_SIZE_SHARED: u32 = 8;
pub const BOARD_INFO_OFFS_GLOBAL: u32 = 9;
pub const BOARD_INFO_PROTOCOL: u32 = 24;
pub const BOARD_INFO_APPLICATION_TYPE: u32 = 25;

// Transfer interrupt control field of a BC transfer descriptor
const XF_CTRL_IR_SHIFT: u32 = 20;
const XF_CTRL_IR_MASK: u32 = 0x7 << XF_CTRL_IR_SHIFT;
const XF_CTRL_IR_EOT: u32 = 1;
// Interrupt control field of an RT subaddress descriptor
const SA_CTRL_IR_MASK: u32 = 0xC000_0000;
const SA_CTRL_IR_EOT: u32 = 0x8000_0000;

pub(crate) const COMMANDS: &[CommandEntry<Device>] = &[
    CommandEntry {
        code: SYS_PING,
        name: "SYS_PING",
        handler: ping,
        cmd_size: CmdSize::AtLeast(frame_size(1)),
        ack_size: AckSize::Variable,
    },
    CommandEntry {
        code: SYS_GET_BOARD_INFO,
        name: "SYS_GET_BOARD_INFO",
        handler: get_board_info,
        cmd_size: CmdSize::words(2),
        ack_size: AckSize::Variable,
    },
    CommandEntry {
        code: SYS_MEM_PART_SET,
        name: "SYS_MEM_PART_SET",
        handler: mem_part_set,
        cmd_size: CmdSize::words(6),
        ack_size: AckSize::words(3),
    },
    CommandEntry {
        code: SYS_MEM_PART_GET,
        name: "SYS_MEM_PART_GET",
        handler: mem_part_get,
        cmd_size: CmdSize::words(1),
        ack_size: AckSize::words(15),
    },
    CommandEntry {
        code: SYS_SYSTAG_CON,
        name: "SYS_SYSTAG_CON",
        handler: systag_con,
        cmd_size: CmdSize::words(2),
        ack_size: AckSize::words(0),
    },
    CommandEntry {
        code: SYS_SYSTAG_DEF,
        name: "SYS_SYSTAG_DEF",
        handler: systag_def,
        cmd_size: CmdSize::words(10),
        ack_size: AckSize::words(0),
    },
    CommandEntry {
        code: HS_SYS_SYSTAG_CON,
        name: "HS_SYS_SYSTAG_CON",
        handler: systag_con,
        cmd_size: CmdSize::words(2),
        ack_size: AckSize::words(0),
    },
    CommandEntry {
        code: HS_SYS_SYSTAG_DEF,
        name: "HS_SYS_SYSTAG_DEF",
        handler: systag_def,
        cmd_size: CmdSize::words(10),
        ack_size: AckSize::words(0),
    },
    CommandEntry {
        code: TRACK_DEF,
        name: "TRACK_DEF",
        handler: track_def,
        cmd_size: CmdSize::words(11),
        ack_size: AckSize::words(1),
    },
    CommandEntry {
        code: TRACK_READ,
        name: "TRACK_READ",
        handler: track_read,
        cmd_size: CmdSize::words(3),
        ack_size: AckSize::Variable,
    },
    CommandEntry {
        code: TRACK_SCAN,
        name: "TRACK_SCAN",
        handler: track_scan,
        cmd_size: CmdSize::words(3),
        ack_size: AckSize::Variable,
    },
    CommandEntry {
        code: TRACK_ALLOC,
        name: "TRACK_ALLOC",
        handler: track_alloc,
        cmd_size: CmdSize::AtLeast(frame_size(2)),
        ack_size: AckSize::Variable,
    },
    CommandEntry {
        code: FIFO_INI,
        name: "FIFO_INI",
        handler: fifo_ini,
        cmd_size: CmdSize::words(2),
        ack_size: AckSize::words(0),
    },
    CommandEntry {
        code: FIFO_WRITE,
        name: "FIFO_WRITE",
        handler: fifo_write,
        cmd_size: CmdSize::AtLeast(frame_size(2)),
        ack_size: AckSize::words(0),
    },
    CommandEntry {
        code: FIFO_STATUS,
        name: "FIFO_STATUS",
        handler: fifo_status,
        cmd_size: CmdSize::words(1),
        ack_size: AckSize::words(1),
    },
    CommandEntry {
        code: FIFO_RT_ASSIGN,
        name: "FIFO_RT_ASSIGN",
        handler: fifo_rt_assign,
        cmd_size: CmdSize::words(4),
        ack_size: AckSize::words(0),
    },
    CommandEntry {
        code: FIFO_BC_ASSIGN,
        name: "FIFO_BC_ASSIGN",
        handler: fifo_bc_assign,
        cmd_size: CmdSize::words(3),
        ack_size: AckSize::words(0),
    },
];

// Half-words packed two per payload word starting at word `start`.  The
// frame must carry all `count` of them.
fn half_words(req: &Request, start: usize, count: u32) -> Result<Vec<u16>> {
    let available = req.words.len().saturating_sub(start) as u64 * 2;
    if available < count as u64 {
        return Err(Error::WrongCmdSize);
    }
    Ok((0..count as usize).map(|i| req.half_word(start, i)).collect())
}

fn ping(_dev: &mut Device, req: &Request, rsp: &mut Response) -> Result<()> {
    let count = req.word(0);
    let data = req.words.get(1..).unwrap_or(&[]);
    if (data.len() as u64) < count as u64 {
        return Err(Error::WrongCmdSize);
    }
    rsp.push(count);
    for word in data[..count as usize].iter().rev() {
        rsp.push(*word);
    }
    rsp.size_from_words();
    Ok(())
}

impl Device {
    /// One GET_BOARD_INFO value, as seen from the stream served by `biu`
    pub fn board_info(&self, biu: usize, key: u32) -> Result<u32> {
        let board = &self.board;
        let value = match key {
            BOARD_INFO_DEVICE_TYPE => board.device_type.id(),
            BOARD_INFO_CHANNEL_COUNT => board.streams() as u32,
            BOARD_INFO_BIU_COUNT => board.physical_bius() as u32,
            BOARD_INFO_BOARD_TYPE => board.board_type,
            BOARD_INFO_BOARD_CONFIG => board.board_config,
            BOARD_INFO_SERIAL => self.config.serial,
            BOARD_INFO_PARTNO => self.config.part_no,
            BOARD_INFO_SIZE_GLOBAL => self.config.gram_size,
            BOARD_INFO_SIZE_SHARED => self.config.shared_size,
            BOARD_INFO_OFFS_GLOBAL => self.tr.start_offset(biu)?,
            BOARD_INFO_PROTOCOL => match board.hs_partner(biu) {
                Some(_) => board.protocol() as u32,
                None => crate::board::Protocol::Mil1553 as u32,
            },
            BOARD_INFO_APPLICATION_TYPE => {
                let phy = board.physical_biu(biu).ok_or(Error::BiuOutOfRange)?;
                (board.board_type >> (phy as u32 * 8)) & 0xFF
            }
            _ => 0,
        };
        Ok(value)
    }

    /// Repartition every BIU's global RAM.  Nothing changes unless every
    /// partition fits.
    pub fn set_partition(&mut self, partition: MemPartition) -> Result<()> {
        partition.check_limits()?;
        let layouts = compute_layouts(&self.config, &self.board, &partition)?;

        let mut starts = [0u32; MAX_BIU];
        for (start, layout) in starts.iter_mut().zip(layouts.iter()) {
            *start = layout.start;
        }
        self.tr = AddressTranslator::new(self.config.ram_base, starts, self.config.byte_order);
        self.partition = partition;
        self.layouts = layouts;

        for biu in 0..self.bius.len() {
            self.init_control_block(biu)?;
            let layout = &self.layouts[biu];
            self.bius[biu].reset(layout);
        }
        info!(
            "Memory partition: {} transfers, {} BC / {} RT buffer headers, {} buffers, {:#X} byte monitor",
            partition.bc_xfer,
            partition.bc_hid,
            partition.rt_hid,
            partition.sim_bufs,
            partition.bm_buf_size
        );
        Ok(())
    }

    // Set the end of transfer interrupt a track needs on its descriptor
    fn arm_track_interrupt(&mut self, biu: usize, source: TrackSource) -> Result<()> {
        let layout = self.layout(biu)?;
        let order = self.tr.order();
        match source {
            TrackSource::Bc(xid) => {
                let xid = xid as u32;
                if xid >= layout.bc_xfer_count {
                    warn!("BIU {biu}: track on transfer {xid} outside the partition");
                    return Ok(());
                }
                let at = layout.bc_xfer(xid) + BcXferDesc::xf_ctrl_offset();
                let ctrl = order.apply(self.gram.read_u32(at)?);
                let ctrl = (ctrl & !XF_CTRL_IR_MASK) | (XF_CTRL_IR_EOT << XF_CTRL_IR_SHIFT);
                self.gram.write_u32(at, order.apply(ctrl))
            }
            TrackSource::Rt { rt, sa, tx } => {
                let at = layout.rt_sa(rt as u32, tx as u32, (sa & 0x1F) as u32)
                    + RtSaDesc::sa_ctrl_offset();
                let ctrl = order.apply(self.gram.read_u32(at)?);
                // Only a subaddress that already interrupts is switched over
                if ctrl & SA_CTRL_IR_MASK != 0 {
                    let ctrl = (ctrl & !SA_CTRL_IR_MASK) | SA_CTRL_IR_EOT;
                    self.gram.write_u32(at, order.apply(ctrl))?;
                }
                Ok(())
            }
        }
    }

    // Data buffer currently attached to a system tag's transfer
    fn systag_buffer(&self, biu: usize, target: SystagTarget) -> Result<Option<u32>> {
        let layout = self.layout(biu)?.clone();
        let bhd_ptr_at = match target {
            SystagTarget::Bc(xid) => {
                if xid as u32 >= layout.bc_xfer_count {
                    return Ok(None);
                }
                layout.bc_xfer(xid as u32) + BcXferDesc::bhd_ptr_offset()
            }
            SystagTarget::Rt { rt, sa } => {
                layout.rt_sa(rt as u32, 1, sa as u32) + RtSaDesc::bhd_ptr_offset()
            }
        };
        Ok(Some(self.xfer_buffer(biu, bhd_ptr_at, 0, &layout)?.dbp))
    }
}

fn get_board_info(dev: &mut Device, req: &Request, rsp: &mut Response) -> Result<()> {
    let start = req.word(0);
    let count = req.word(1);
    let end = start.saturating_add(count).min(BOARD_INFO_MAX);

    let mut values = Vec::new();
    for key in start..end {
        values.push(dev.board_info(req.biu, key)?);
    }
    rsp.push(values.len() as u32);
    rsp.words.extend(values);
    rsp.size_from_words();
    rsp.size = rsp.size.max(frame_size(2));
    Ok(())
}

fn mem_part_set(dev: &mut Device, req: &Request, rsp: &mut Response) -> Result<()> {
    // Word 0 selects how the counts are applied; every BIU gets the same
    let partition = MemPartition {
        bc_xfer: req.word(1),
        bc_hid: req.word(2),
        rt_hid: req.word(3),
        sim_bufs: req.word(4),
        bm_buf_size: req.word(5),
    };
    dev.set_partition(partition)?;

    let used = |biu: usize| dev.layouts.get(biu).map(|l| l.used_bytes()).unwrap_or(0);
    rsp.push(0);
    rsp.push(used(0));
    rsp.push(used(1));
    Ok(())
}

fn mem_part_get(dev: &mut Device, req: &Request, rsp: &mut Response) -> Result<()> {
    let layout = dev.layout(req.biu)?;
    let p = &dev.partition;
    for word in [
        p.bc_xfer,
        p.bc_hid,
        p.rt_hid,
        p.sim_bufs,
        p.bm_buf_size,
        layout.cb,
        layout.ir_log,
        layout.bc_xfer_desc,
        layout.bc_bh,
        layout.bc_sq,
        layout.rt_sa_desc,
        layout.rt_bh,
        layout.rt_sq,
        layout.bm_buf,
        layout.sim_buf,
    ] {
        rsp.push(word);
    }
    Ok(())
}

fn systag_con(dev: &mut Device, req: &Request, _rsp: &mut Response) -> Result<()> {
    dev.require_simulator(req.biu)?;
    let (id, con) = (req.word(0), req.word(1));
    let systags = &mut dev.bius[req.biu].systags;
    match con {
        SYSTAG_RUN_SUSPEND | SYSTAG_RUN_DISABLED => systags.set_running(id, false),
        SYSTAG_RUN_RESUME | SYSTAG_RUN_ENABLED => systags.set_running(id, true),
        SYSTAG_RECALC_CHECKSUM => {
            let Some(target) = systags.target(id)? else {
                return Ok(());
            };
            let Some(dbp) = dev.systag_buffer(req.biu, target)? else {
                return Ok(());
            };
            dev.bius[req.biu].systags.checksum(id, &mut dev.gram, dbp)
        }
        _ => Err(Error::InvalidMode),
    }
}

fn systag_def(dev: &mut Device, req: &Request, _rsp: &mut Response) -> Result<()> {
    dev.require_simulator(req.biu)?;
    let def = SystagDef::from_words(&req.words);
    dev.bius[req.biu].systags.define(&def)
}

fn track_def(dev: &mut Device, req: &Request, rsp: &mut Response) -> Result<()> {
    dev.require_simulator(req.biu)?;
    let def = TrackDef::from_words(&req.words);
    let defined = dev.bius[req.biu].tracks.define(&def)?;
    if let Some(source) = defined.interrupt {
        if !dev.board.is_hs(req.biu) {
            dev.arm_track_interrupt(req.biu, source)?;
        }
    }
    rsp.push(defined.buffer_start);
    Ok(())
}

fn track_read(dev: &mut Device, req: &Request, rsp: &mut Response) -> Result<()> {
    dev.require_simulator(req.biu)?;
    let read = dev.bius[req.biu]
        .tracks
        .read(req.word(0), req.word(1), req.word(2))?;
    let count = read.data.len() as u32;
    rsp.push(count);
    rsp.push(read.valid as u32);
    rsp.push(read.last_time_tag);
    rsp.push_half_words(&read.data);
    rsp.size_from_words();
    rsp.swap_control = count << 16;
    Ok(())
}

fn track_scan(dev: &mut Device, req: &Request, rsp: &mut Response) -> Result<()> {
    dev.require_simulator(req.biu)?;
    let scan = dev.bius[req.biu]
        .tracks
        .scan(req.word(0), req.word(1), req.word(2))?;
    let count = scan.states.len() as u32;
    rsp.push(count);
    rsp.push(scan.more as u32);
    rsp.push_half_words(&scan.states);
    rsp.size_from_words();
    rsp.swap_control = count << 16;
    Ok(())
}

fn track_alloc(dev: &mut Device, req: &Request, rsp: &mut Response) -> Result<()> {
    dev.require_simulator(req.biu)?;
    let states = half_words(req, 2, req.word(1))?;
    let buffer_start = dev.bius[req.biu].tracks.alloc(req.word(0), &states)?;
    rsp.push(buffer_start.len() as u32);
    rsp.words.extend(buffer_start);
    rsp.size_from_words();
    Ok(())
}

fn fifo_ini(dev: &mut Device, req: &Request, _rsp: &mut Response) -> Result<()> {
    dev.require_simulator(req.biu)?;
    let biu = req.biu;
    let base = dev.shared_layout.fifo(biu);
    let size = dev.shared_layout.fifo_area_size;
    let released = dev.bius[biu]
        .fifos
        .ini(base, size, req.word(0), req.word(1))?;
    for xid in released {
        set_xfer_fifo(dev, biu, xid as u32, 0)?;
    }
    Ok(())
}

fn fifo_write(dev: &mut Device, req: &Request, _rsp: &mut Response) -> Result<()> {
    dev.require_simulator(req.biu)?;
    let data = half_words(req, 2, req.word(1))?;
    dev.bius[req.biu]
        .fifos
        .write(req.word(0), &data, &mut dev.shared)
}

fn fifo_status(dev: &mut Device, req: &Request, rsp: &mut Response) -> Result<()> {
    dev.require_simulator(req.biu)?;
    let status = dev.bius[req.biu].fifos.status(req.word(0))?;
    rsp.push(status as u32);
    Ok(())
}

fn fifo_rt_assign(dev: &mut Device, req: &Request, _rsp: &mut Response) -> Result<()> {
    dev.require_simulator(req.biu)?;
    dev.bius[req.biu]
        .fifos
        .rt_assign(req.word(0), req.word(1), req.word(2), req.word(3))
}

fn fifo_bc_assign(dev: &mut Device, req: &Request, _rsp: &mut Response) -> Result<()> {
    dev.require_simulator(req.biu)?;
    let biu = req.biu;
    let xid = req.word(2);
    let xfers = dev.layout(biu)?.bc_xfer_count;
    if let Some(fifo) = dev.bius[biu]
        .fifos
        .bc_assign(req.word(0), req.word(1), xid, xfers)?
    {
        set_xfer_fifo(dev, biu, xid, fifo)?;
    }
    Ok(())
}

// The FIFO id lives in the upper half of the descriptor word
fn set_xfer_fifo(dev: &mut Device, biu: usize, xid: u32, fifo: u16) -> Result<()> {
    let layout = dev.layout(biu)?;
    if xid >= layout.bc_xfer_count {
        return Ok(());
    }
    let at = layout.bc_xfer(xid) + BcXferDesc::fifo_id_offset();
    let order = dev.tr.order();
    let word = order.apply(dev.gram.read_u32(at)?);
    let word = (word & 0xFFFF) | ((fifo as u32) << 16);
    dev.gram.write_u32(at, order.apply(word))
}
