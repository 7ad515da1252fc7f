//! Interrupt log-list scanner and per-source handlers.
//!
//! Each low speed BIU appends an 8-byte entry to its interrupt log-list for
//! every interrupt it raises, and advances the log-list pointer in its
//! system control block.  The scanner walks from its own read cursor up to
//! that pointer, hands each entry to the handler for its source and marks
//! the entry consumed by clearing its update flag.
//!
//! Entry layout, after byte order conversion:
//!
//! ```text
//!   word 0  bits 29..31  source: 0 RT, 1 BC, 2 BM, 3 replay, 4 BC branch/skip
//!           bit  28      update flag, set by the BIU, cleared once handled
//!           bits 20..27  cause bits, per source
//!           bits 0..7    buffer index
//!   word 1               pointer to the descriptor or instruction concerned
//! ```
//!
//! Interesting interrupts are copied to the event log in shared RAM for the
//! host.
//!
//! - [`dyntag`] - Dynamic tag monitor fed by monitor filter interrupts
//! - [`srvw`] - Service request / vector word handling
//! - [`setup`] - Arming the interrupt driven behaviour

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

pub mod dyntag;
pub mod setup;
pub mod srvw;

use alloc::vec::Vec;
#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use crate::Result;
use crate::config::Capabilities;
use crate::device::Device;
use crate::device::layout::{
    BC_XFER_DESC_SIZE, BcXferDesc, BiuLayout, BufferHeader, EVENT_LOG_ENTRIES,
    EVENT_LOG_ENTRY_SIZE, INSTR_LIST_SIZE, IR_LOG_ENTRIES, IR_LOG_ENTRY_SIZE, IR_LOG_SIZE,
    RT_DESC_SIZE, RT_SA_COUNT, RT_SA_DESC_SIZE, RtSaDesc, SIM_BUF_SIZE, SQ_SIZE, SpecialBh,
    SpecialXfer, StatusQueue, SysCb,
};
use crate::device::state::RunStatus;
use crate::ram::MemIo;
use crate::sys::systag::SystagTarget;
use crate::sys::track::TrackSource;
use dyntag::{MAX_MESSAGE_WORDS, MonitorMessage};
use srvw::{INSTR_RET, SrvwAction, make_instr};

/// Entry written and not yet handled
pub const IR_UDF: u32 = 0x1000_0000;

/// BC: instruction interrupt
pub const IR_BC_IXI: u32 = 0x0100_0000;
/// BC and RT: any error
pub const IR_AEI: u32 = 0x0200_0000;
/// BC: unexpected response
pub const IR_BC_UXI: u32 = 0x0400_0000;
/// BC and RT: programmed transfer interrupt
pub const IR_PGI: u32 = 0x0040_0000;

/// Monitor: buffer full or half full
pub const IR_BM_MBF: u32 = 0x0200_0000;
/// Monitor: filter descriptor hit
pub const IR_BM_MFI: u32 = 0x0040_0000;

/// Replay: half buffer consumed
pub const IR_RP_RPI: u32 = 0x0010_0000;
/// Replay: stopped on overflow
pub const IR_RP_RSO: u32 = 0x0020_0000;

// Causes that always reach the event log
const BC_LOG_CAUSES: u32 = 0x0980_0000;
const RT_LOG_CAUSES: u32 = 0x0180_0000;

// Last status word bit: dynamic bus control accepted
const LSW_DBCA: u32 = 0x0002;

/// One interrupt log-list entry.  `w1` is in TSW byte order, `w2` is a TSW
/// pointer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IrEntry {
    pub w1: u32,
    pub w2: u32,
}

impl IrEntry {
    pub fn source(&self) -> u32 {
        self.w1 >> 29
    }

    pub fn is_updated(&self) -> bool {
        self.w1 & IR_UDF != 0
    }

    /// Buffer index within a buffer queue
    pub fn index(&self) -> u32 {
        self.w1 & 0xFF
    }

    pub fn has(&self, causes: u32) -> bool {
        self.w1 & causes != 0
    }
}

/// A decoded log-list entry, by source
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interrupt {
    Rt(IrEntry),
    Bc(IrEntry),
    Bm(IrEntry),
    Replay(IrEntry),
    /// BC branch or skip instruction reached
    BcSkip(IrEntry),
}

impl Interrupt {
    /// Classify an entry.  Sources the device lacks the capability for, and
    /// unknown sources, yield `None`.
    pub fn decode(entry: IrEntry, caps: &Capabilities) -> Option<Self> {
        match entry.source() {
            0 if caps.simulator => Some(Interrupt::Rt(entry)),
            1 if caps.simulator => Some(Interrupt::Bc(entry)),
            2 if caps.monitor => Some(Interrupt::Bm(entry)),
            3 if caps.replay => Some(Interrupt::Replay(entry)),
            4 if caps.simulator => Some(Interrupt::BcSkip(entry)),
            _ => None,
        }
    }

    pub fn entry(&self) -> IrEntry {
        match self {
            Interrupt::Rt(e)
            | Interrupt::Bc(e)
            | Interrupt::Bm(e)
            | Interrupt::Replay(e)
            | Interrupt::BcSkip(e) => *e,
        }
    }
}

// A transfer's buffer, resolved through its buffer header
#[derive(Debug, Clone, Copy)]
pub(crate) struct XferBuffer {
    pub(crate) dbp: u32,
    pub(crate) sqp: u32,
    pub(crate) db_id: u32,
}

impl Device {
    /// Walk the log-list of every low speed BIU.  Returns the number of
    /// entries consumed.
    ///
    /// A failing handler is logged and its entry consumed anyway, so one bad
    /// entry cannot stall the log-list.
    pub fn scan_interrupts(&mut self) -> u32 {
        let mut consumed = 0;
        for biu in 0..self.bius.len() {
            // High speed BIUs report through their low speed partner
            if self.board.is_hs(biu) {
                continue;
            }
            match self.scan_biu(biu) {
                Ok(count) => consumed += count,
                Err(e) => warn!("BIU {biu}: log-list scan failed {e:?}"),
            }
        }
        consumed
    }

    fn scan_biu(&mut self, biu: usize) -> Result<u32> {
        let (cb, ir_log) = {
            let layout = self.layout(biu)?;
            (layout.cb, layout.ir_log)
        };
        let order = self.tr.order();

        let raw = self.gram.read_u32(cb + SysCb::ilp_offset())?;
        if raw == 0 {
            return Ok(0);
        }
        let current = self.tr.to_tsw(biu, raw)?;
        if current.wrapping_sub(ir_log) >= IR_LOG_SIZE {
            trace!("BIU {biu}: log-list pointer {current:#010X} outside the log-list");
            return Ok(0);
        }

        let mut islp = self.bius[biu].islp;
        let mut count = 0;
        while islp != current && count < IR_LOG_ENTRIES {
            let word0 = order.apply(self.gram.read_u32(islp)?);
            let entry = IrEntry {
                w1: word0,
                w2: self.tr.to_tsw_masked(biu, self.gram.read_u32(islp + 4)?)?,
            };

            match Interrupt::decode(entry, &self.config.capabilities) {
                Some(interrupt) => {
                    if let Err(e) = self.handle_interrupt(biu, interrupt) {
                        warn!("BIU {biu}: {interrupt:?} failed {e:?}");
                    }
                }
                None => trace!("BIU {biu}: ignoring log-list entry {word0:#010X}"),
            }

            self.gram.write_u32(islp, order.apply(word0 & !IR_UDF))?;
            islp += IR_LOG_ENTRY_SIZE;
            if islp >= ir_log + IR_LOG_SIZE {
                islp = ir_log;
            }
            count += 1;
        }

        self.bius[biu].islp = islp;
        Ok(count)
    }

    /// Run the handler for one interrupt of `biu`
    pub fn handle_interrupt(&mut self, biu: usize, interrupt: Interrupt) -> Result<()> {
        self.check_biu(biu)?;
        trace!("BIU {biu}: {interrupt:?}");
        match interrupt {
            Interrupt::Bc(e) => self.bc_interrupt(biu, e),
            Interrupt::BcSkip(e) => self.bc_skip_interrupt(biu, e),
            Interrupt::Rt(e) => self.rt_interrupt(biu, e),
            Interrupt::Bm(e) => self.bm_interrupt(biu, e),
            Interrupt::Replay(e) => self.replay_interrupt(biu, e),
        }
    }

    pub(crate) fn xfer_buffer(
        &self,
        biu: usize,
        bhd_ptr_at: u32,
        index: u32,
        layout: &BiuLayout,
    ) -> Result<XferBuffer> {
        let order = self.tr.order();
        let bh = self.tr.to_tsw_masked(biu, self.gram.read_u32(bhd_ptr_at)?)?;
        let bh_ctrl = order.apply(self.gram.read_u32(bh + BufferHeader::bh_ctrl_offset())?);
        let dbp = self
            .tr
            .to_tsw(biu, self.gram.read_u32(bh + BufferHeader::bp_addr_offset())?)?;
        let mut sqp = self
            .tr
            .to_tsw(biu, self.gram.read_u32(bh + BufferHeader::sq_addr_offset())?)?;

        // One status queue entry per buffer
        if (bh_ctrl >> 12) & 0x3 == 2 {
            sqp += index * SQ_SIZE;
        }
        let db_id = dbp.wrapping_sub(layout.sim_buf) / SIM_BUF_SIZE + index;
        Ok(XferBuffer { dbp, sqp, db_id })
    }

    fn read_hw(&self, at: u32) -> Result<u32> {
        Ok(self.tr.order().apply(self.gram.read_u32(at)?))
    }

    fn bc_interrupt(&mut self, biu: usize, e: IrEntry) -> Result<()> {
        if self.bius[biu].bite || !e.is_updated() {
            return Ok(());
        }
        let layout = self.layout(biu)?.clone();

        if e.has(IR_BC_IXI) {
            trace!("BIU {biu}: BC instruction interrupt at {:#010X}", e.w2);
        }

        let mut xid = 0;
        let mut db_id = 0;
        if e.has(IR_BC_UXI | IR_AEI | IR_PGI) {
            if layout.contains_bc_xfer(e.w2) {
                xid = (e.w2 - layout.bc_xfer_desc) / BC_XFER_DESC_SIZE;
                let buf = self.xfer_buffer(
                    biu,
                    e.w2 + BcXferDesc::bhd_ptr_offset(),
                    e.index(),
                    &layout,
                )?;
                db_id = buf.db_id;
                self.bc_xfer_done(biu, xid, &buf, &layout)?;
                if e.has(IR_BC_UXI) {
                    self.dbc_stop(biu, e.w2, &buf)?;
                }
            } else if self.bius[biu].srvw.enabled {
                if let Some(srvw_xid) = self.srvw_interrupt(biu, e.w2, &layout)? {
                    xid = srvw_xid;
                }
            }
        }

        let state = &self.bius[biu];
        if state.bc.xfer_interrupts.contains(&xid) || e.has(BC_LOG_CAUSES) || state.srvw.enabled
        {
            self.log_event(biu, e, xid, db_id)?;
        }
        Ok(())
    }

    // Per transfer work once a BC transfer completed
    fn bc_xfer_done(
        &mut self,
        biu: usize,
        xid: u32,
        buf: &XferBuffer,
        layout: &BiuLayout,
    ) -> Result<()> {
        let fifo_id = self.read_hw(layout.bc_xfer(xid) + BcXferDesc::fifo_id_offset())? >> 16;
        let time_tag = self.read_hw(buf.sqp + StatusQueue::time_tag_offset())?;

        let state = &mut self.bius[biu];
        state.systags.run(
            SystagTarget::Bc(xid as u16),
            &mut self.gram,
            &self.shared,
            &self.shared_layout,
            buf.dbp,
        )?;
        if fifo_id != 0 && state.fifos.is_bc_assigned(fifo_id) {
            state
                .fifos
                .copy_next(fifo_id, &self.shared, &mut self.gram, buf.dbp)?;
        }
        if let Some(count) = state.bc.msg_counts.get_mut(xid as usize) {
            *count = count.wrapping_add(1);
        }
        state
            .tracks
            .receive(TrackSource::Bc(xid as u16), &self.gram, buf.dbp, time_tag)
    }

    // Dynamic bus control mode code sent by the BC: stop once the RT accepts
    fn dbc_stop(&mut self, biu: usize, xfer: u32, buf: &XferBuffer) -> Result<()> {
        let cw = self.read_hw(xfer + BcXferDesc::cw2_cw1_offset())? & 0x3FF;
        let bc = &self.bius[biu].bc;
        if !(cw == 0x3E0 || cw == 0)
            || bc.dbc_stop != RunStatus::Busy
            || bc.status != RunStatus::Busy
        {
            return Ok(());
        }
        let lsw = self.read_hw(buf.sqp + StatusQueue::lcw_lsw_offset())? & 0xFFFF;
        if lsw & LSW_DBCA != 0 {
            self.set_bc_mode(biu, false)?;
            self.bius[biu].bc.status = RunStatus::Halt;
            debug!("BIU {biu}: BC handed over bus control");
        }
        Ok(())
    }

    // A vector word was fetched through one of the special transfers.
    // Returns the transfer that fetched it.
    fn srvw_interrupt(&mut self, biu: usize, at: u32, layout: &BiuLayout) -> Result<Option<u32>> {
        let cb = layout.cb;
        let Some((xfer, bh)) = SysCb::special_xfers()
            .into_iter()
            .find(|(xfer, _)| cb + xfer == at)
        else {
            return Ok(None);
        };

        let base = self.tr.to_biu_rel(biu, layout.bc_xfer_desc)?;
        let last = self.read_hw(cb + xfer + SpecialXfer::xf_last_offset())?;
        let xid = last
            .checked_sub(base)
            .map(|offset| offset / BC_XFER_DESC_SIZE)
            .unwrap_or(0);
        let lcw_lsw = self.read_hw(cb + bh + SpecialBh::lcw_lsw_offset())?;
        let rt = ((lcw_lsw & 0xF800) >> 11) as u8;
        let vw = self.read_hw(cb + bh + SpecialBh::data_offset())? as u16;

        let order = self.tr.order();
        match self.bius[biu].srvw.handle(vw, rt, xid, base) {
            SrvwAction::Nothing => (),
            SrvwAction::Single(instr) => {
                let rsv1 = cb + SysCb::rsv1_offset();
                self.gram.write_u32(rsv1, order.apply(instr))?;
                self.gram
                    .write_u32(rsv1 + 4, order.apply(make_instr(INSTR_RET, 0)))?;
                let aip = self.tr.to_gram(biu, rsv1)?;
                self.gram.write_u32(cb + SysCb::aip_offset(), aip)?;
            }
            SrvwAction::Subframe(instrs) => self.write_lip(biu, &instrs, layout)?,
        }
        Ok(Some(xid))
    }

    /// Replace the low priority instruction list with `instrs` and a return
    pub(crate) fn write_lip(&mut self, biu: usize, instrs: &[u32], layout: &BiuLayout) -> Result<()> {
        let room = (INSTR_LIST_SIZE / 4) as usize - 1;
        if instrs.len() > room {
            warn!(
                "BIU {biu}: {} subframe transfers, list holds {room}",
                instrs.len()
            );
        }
        let order = self.tr.order();
        let mut words: Vec<u32> = instrs
            .iter()
            .take(room)
            .map(|instr| order.apply(*instr))
            .collect();
        words.push(order.apply(make_instr(INSTR_RET, 0)));
        self.gram.write_bulk(layout.lip, &words)
    }

    fn bc_skip_interrupt(&mut self, biu: usize, e: IrEntry) -> Result<()> {
        if self.bius[biu].bite || !e.is_updated() {
            return Ok(());
        }
        let bc = &self.bius[biu].bc;
        if bc.stop_instr != 0 && bc.stop_instr == e.w2 {
            self.set_bc_mode(biu, false)?;
            let bc = &mut self.bius[biu].bc;
            bc.display = Default::default();
            bc.trg_status = RunStatus::Halt;
            bc.dbc_start = RunStatus::Halt;
            bc.dbc_stop = RunStatus::Halt;
            bc.status = RunStatus::Halt;
            debug!("BIU {biu}: BC reached its stop instruction");
        } else if bc.trigger_instr != 0
            && bc.trigger_instr == e.w2
            && bc.status == RunStatus::Halt
            && bc.trg_status == RunStatus::Busy
        {
            self.bius[biu].bc.status = RunStatus::Busy;
            debug!("BIU {biu}: BC started by external trigger");
        }
        self.log_event(biu, e, 0, 0)
    }

    fn rt_interrupt(&mut self, biu: usize, e: IrEntry) -> Result<()> {
        if self.bius[biu].bite || !e.is_updated() {
            return Ok(());
        }
        let layout = self.layout(biu)?.clone();
        if !layout.contains_rt_sa(e.w2) {
            trace!("BIU {biu}: RT interrupt for {:#010X} outside the RT descriptors", e.w2);
            return Ok(());
        }

        let desc = e.w2 - layout.rt_sa_desc;
        let rt = desc / RT_DESC_SIZE;
        let offset = (desc % RT_DESC_SIZE) / RT_SA_DESC_SIZE;
        let sa_type = offset / RT_SA_COUNT;
        let sa = offset % RT_SA_COUNT;

        let buf = self.xfer_buffer(biu, e.w2 + RtSaDesc::bhd_ptr_offset(), e.index(), &layout)?;
        let lcw_lsw = self.read_hw(buf.sqp + StatusQueue::lcw_lsw_offset())?;
        let cw_id = lcw_lsw >> 16;

        if e.has(IR_AEI | IR_PGI) {
            // Mode code transmit to RT 0: dynamic bus control offered to us
            if sa_type == 3 && sa == 0 {
                let bc = &self.bius[biu].bc;
                if bc.dbc_start == RunStatus::Busy
                    && bc.status == RunStatus::Halt
                    && lcw_lsw & LSW_DBCA != 0
                {
                    self.set_bc_mode(biu, true)?;
                    self.bius[biu].bc.status = RunStatus::Busy;
                    debug!("BIU {biu}: BC took over bus control");
                }
            }

            let (rt8, sa8) = (rt as u8, sa as u8);
            if sa_type == 1 {
                let state = &mut self.bius[biu];
                state.systags.run(
                    SystagTarget::Rt { rt: rt8, sa: sa8 },
                    &mut self.gram,
                    &self.shared,
                    &self.shared_layout,
                    buf.dbp,
                )?;
                if let Some(fifo) = state.fifos.rt_fifo(rt8, sa8) {
                    state
                        .fifos
                        .copy_next(fifo as u32, &self.shared, &mut self.gram, buf.dbp)?;
                }
            }
            if sa_type <= 1 {
                let time_tag = self.read_hw(buf.sqp + StatusQueue::time_tag_offset())?;
                let source = TrackSource::Rt {
                    rt: rt8,
                    sa: sa8,
                    tx: sa_type == 1,
                };
                self.bius[biu]
                    .tracks
                    .receive(source, &self.gram, buf.dbp, time_tag)?;
            }
        }

        let rt_state = &self.bius[biu].rt;
        let rx = sa_type % 2 == 0 && rt_state.rx_interrupts.contains(&(rt, sa));
        let tx = sa_type % 2 == 1 && rt_state.tx_interrupts.contains(&(rt, sa));
        if rx || tx || e.has(RT_LOG_CAUSES) {
            self.log_event(biu, e, cw_id, buf.db_id)?;
        }
        Ok(())
    }

    fn bm_interrupt(&mut self, biu: usize, e: IrEntry) -> Result<()> {
        self.bius[biu].bm.ir_status = true;
        if self.bius[biu].bite || !e.is_updated() {
            return Ok(());
        }

        if e.has(IR_BM_MBF) {
            if self.queues.is_open(biu as u32) {
                self.drain_queue(biu as u32)?;
            }
            if self.bius[biu].bm.rec.enabled {
                self.bm_record(biu, e.w2)?;
            }
        }
        if e.has(IR_BM_MFI) {
            self.dyntag_fetch(biu, e.w2)?;
        }
        self.log_event(biu, e, 0, 0)
    }

    // The monitor filled half of its ring.  `at` is the monitor fill
    // pointer; the half behind it is ready for the host.
    fn bm_record(&mut self, biu: usize, at: u32) -> Result<()> {
        let (start, size) = {
            let layout = self.layout(biu)?;
            (layout.bm_buf, layout.bm_buf_size)
        };
        let half = size / 2;

        let ready = match at.checked_sub(half) {
            Some(back) if back >= start => at - (half - 4),
            _ => {
                let wrapped = at + half + 4;
                if wrapped.checked_sub(size).is_some_and(|w| w >= start) {
                    wrapped - size
                } else {
                    wrapped
                }
            }
        };

        let rec = &mut self.bius[biu].bm.rec;
        rec.start = ready;
        rec.entries = half / 4;
        rec.hfi_count = rec.hfi_count.wrapping_add(1);
        trace!("BIU {biu}: monitor half buffer at {ready:#010X} ready");
        Ok(())
    }

    // Pull the message at `at` out of the monitor ring and show it to the
    // dynamic tag monitor
    fn dyntag_fetch(&mut self, biu: usize, at: u32) -> Result<()> {
        let (cb, start, size) = {
            let layout = self.layout(biu)?;
            (layout.cb, layout.bm_buf, layout.bm_buf_size)
        };
        let end = start + size;
        let fill = self
            .tr
            .to_tsw(biu, self.gram.read_u32(cb + SysCb::mbfp_offset())?)?;

        let mut words = Vec::with_capacity(MAX_MESSAGE_WORDS);
        let mut next = at;
        while next != fill && words.len() < MAX_MESSAGE_WORDS {
            if next < start || next >= end {
                break;
            }
            words.push(self.read_hw(next)?);
            next += 4;
            if next >= end {
                next = start;
            }
        }

        let msg = MonitorMessage::decode(&words);
        self.bius[biu].dyntags.observe(&msg);
        Ok(())
    }

    fn replay_interrupt(&mut self, biu: usize, e: IrEntry) -> Result<()> {
        if self.bius[biu].bite || !e.is_updated() {
            return Ok(());
        }
        if e.has(IR_RP_RPI) {
            let replay = &mut self.bius[biu].replay;
            replay.rpi_count = replay.rpi_count.wrapping_add(1);
        }
        if e.has(IR_RP_RSO) {
            debug!("BIU {biu}: replay stopped");
        }
        self.log_event(biu, e, 0, 0)
    }

    /// Append one entry to the event log in shared RAM.
    ///
    /// The log is a ring of 16-byte entries behind a put and a get count.
    /// The host owns the get count and the TSW never blocks on it.
    pub(crate) fn log_event(&mut self, biu: usize, e: IrEntry, w3: u32, w4: u32) -> Result<()> {
        let base = self.shared_layout.event_log;
        let put = self.shared.read_u32(base)? % EVENT_LOG_ENTRIES;
        let ty = if biu < 2 { biu as u32 } else { biu as u32 + 3 };

        let entry = [
            e.w1,
            e.w2,
            0x0100_0000u32.checked_shl(ty).unwrap_or(0) | (w3 & 0x00FF_FFFF),
            ((ty & 0xFF) << 24) | (w4 & 0xFFFF),
        ];
        self.shared
            .write_bulk(base + 8 + put * EVENT_LOG_ENTRY_SIZE, &entry)?;
        self.shared.write_u32(base, (put + 1) % EVENT_LOG_ENTRIES)
    }
}
