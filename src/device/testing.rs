//! Test fixtures: a small device, fake firmware and helpers that play the
//! part of the BIU hardware.

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

use alloc::boxed::Box;
use alloc::rc::Rc;
use alloc::vec::Vec;
use core::cell::RefCell;

use crate::Result;
use crate::com::MilComHeader;
use crate::com::dispatch::Reply;
use crate::config::{DeviceConfig, MemPartition};
use crate::device::Device;
use crate::device::layout::{
    BH_SIZE, BcXferDesc, BufferHeader, IR_LOG_ENTRY_SIZE, IR_LOG_SIZE, RtSaDesc, SIM_BUF_SIZE,
    SQ_SIZE, StatusQueue, SysCb,
};
use crate::fw::{Firmware, FwCommand};
use crate::ram::MemIo;

/// What the fake firmware was asked to do, and how it answers
#[derive(Debug, Default)]
pub(crate) struct FwLog {
    pub commands: Vec<(usize, FwCommand)>,
    /// Completion status of a self test
    pub self_test_status: u32,
    /// Never acknowledge
    pub silent: bool,
}

#[derive(Debug, Default)]
pub(crate) struct FakeFirmware {
    log: Rc<RefCell<FwLog>>,
}

impl Firmware for FakeFirmware {
    fn submit(&mut self, biu: usize, command: FwCommand) -> Result<()> {
        self.log.borrow_mut().commands.push((biu, command));
        Ok(())
    }

    fn poll_done(&mut self, _biu: usize) -> Result<Option<u32>> {
        let log = self.log.borrow();
        if log.silent {
            return Ok(None);
        }
        match log.commands.last() {
            Some((_, FwCommand::SelfTest)) => Ok(Some(log.self_test_status)),
            _ => Ok(Some(0)),
        }
    }
}

/// One low speed stream
pub(crate) fn config() -> DeviceConfig {
    DeviceConfig {
        board_type: 0xFFFF_FF11,
        gram_size: 0x8_0000,
        biu_partition_size: 0x4_0000,
        shared_size: 0x2_0000,
        fw_poll_limit: 4,
        dq_ls_size: 0x1000,
        dq_hs_size: 0x1000,
        dq_header_size: 0x100,
        datasets: 16,
        fifo_area_size: 0x1000,
        mailbox_size: 0x200,
        partition: MemPartition {
            bc_xfer: 64,
            bc_hid: 64,
            rt_hid: 64,
            sim_bufs: 64,
            bm_buf_size: 0x1000,
        },
        ..Default::default()
    }
}

/// One low speed stream paired with a high speed one
pub(crate) fn config_ls_hs() -> DeviceConfig {
    DeviceConfig {
        board_type: 0xFFFF_3011,
        ..config()
    }
}

pub(crate) fn device_with(config: DeviceConfig) -> (Device, Rc<RefCell<FwLog>>) {
    let fw = FakeFirmware::default();
    let log = fw.log.clone();
    let device = Device::new(config, Box::new(fw)).unwrap();
    (device, log)
}

pub(crate) fn device() -> (Device, Rc<RefCell<FwLog>>) {
    device_with(config())
}

pub(crate) fn frame(stream: u32, command: u32, payload: &[u32], expected: u32) -> Vec<u8> {
    MilComHeader::new(stream, command, payload.len() as u32, expected).encode(payload)
}

pub(crate) fn run(dev: &mut Device, command: u32, payload: &[u32], expected: u32) -> Reply {
    dev.dispatch(&frame(1, command, payload, expected))
}

/// Append an interrupt log-list entry the way a BIU does, and advance the
/// hardware write pointer.  `w2` is a TSW pointer.
pub(crate) fn raise(dev: &mut Device, biu: usize, w1: u32, w2: u32) {
    let layout = dev.layout(biu).unwrap().clone();
    let order = dev.tr.order();
    let ilp_at = layout.cb + SysCb::ilp_offset();
    let at = dev.tr.to_tsw(biu, dev.gram.read_u32(ilp_at).unwrap()).unwrap();
    dev.gram.write_u32(at, order.apply(w1)).unwrap();
    dev.gram
        .write_u32(at + 4, dev.tr.to_gram(biu, w2).unwrap())
        .unwrap();
    let mut next = at + IR_LOG_ENTRY_SIZE;
    if next >= layout.ir_log + IR_LOG_SIZE {
        next = layout.ir_log;
    }
    dev.gram
        .write_u32(ilp_at, dev.tr.to_gram(biu, next).unwrap())
        .unwrap();
}

/// Word 0 of an interrupt entry as the BIU would write it
pub(crate) fn ir_word(source: u32, causes: u32, index: u32) -> u32 {
    (source << 29) | 0x1000_0000 | causes | (index & 0xFF)
}

// Point buffer header `bh` at status queue entry `sq` and simulator buffer
// `buf`.  Returns the data buffer.
fn buffer(dev: &mut Device, biu: usize, bh: u32, sq: u32, buf: u32) -> u32 {
    let sim = dev.layout(biu).unwrap().sim_buf;
    let dbp = sim + buf * SIM_BUF_SIZE;
    let gram = |tsw| dev.tr.to_gram(biu, tsw).unwrap();
    let (sq_raw, dbp_raw) = (gram(sq), gram(dbp));
    dev.gram
        .write_u32(bh + BufferHeader::bh_ctrl_offset(), 0)
        .unwrap();
    dev.gram
        .write_u32(bh + BufferHeader::sq_addr_offset(), sq_raw)
        .unwrap();
    dev.gram
        .write_u32(bh + BufferHeader::bp_addr_offset(), dbp_raw)
        .unwrap();
    dbp
}

/// Wire BC transfer `xid` to buffer header `xid` and simulator buffer
/// `buf`.  Returns the data buffer and the status queue entry.
pub(crate) fn bc_xfer(dev: &mut Device, biu: usize, xid: u32, buf: u32) -> (u32, u32) {
    let layout = dev.layout(biu).unwrap().clone();
    let bh = layout.bc_bh + xid * BH_SIZE;
    let sq = layout.bc_sq + xid * SQ_SIZE;
    let dbp = buffer(dev, biu, bh, sq, buf);
    let bh_raw = dev.tr.to_gram(biu, bh).unwrap();
    dev.gram
        .write_u32(layout.bc_xfer(xid) + BcXferDesc::bhd_ptr_offset(), bh_raw)
        .unwrap();
    (dbp, sq)
}

/// Wire an RT subaddress to RT buffer header `hid` and simulator buffer
/// `buf`.  Returns the data buffer and the status queue entry.
pub(crate) fn rt_sa(
    dev: &mut Device,
    biu: usize,
    (rt, sa_type, sa): (u32, u32, u32),
    hid: u32,
    buf: u32,
) -> (u32, u32) {
    let layout = dev.layout(biu).unwrap().clone();
    let bh = layout.rt_bh + hid * BH_SIZE;
    let sq = layout.rt_sq + hid * SQ_SIZE;
    let dbp = buffer(dev, biu, bh, sq, buf);
    let bh_raw = dev.tr.to_gram(biu, bh).unwrap();
    dev.gram
        .write_u32(
            layout.rt_sa(rt, sa_type, sa) + RtSaDesc::bhd_ptr_offset(),
            bh_raw,
        )
        .unwrap();
    (dbp, sq)
}

/// Fill a status queue entry
pub(crate) fn status(dev: &mut Device, sq: u32, lcw_lsw: u32, time_tag: u32) {
    dev.gram
        .write_u32(sq + StatusQueue::lcw_lsw_offset(), lcw_lsw)
        .unwrap();
    dev.gram
        .write_u32(sq + StatusQueue::time_tag_offset(), time_tag)
        .unwrap();
}
