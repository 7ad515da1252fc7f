//! Arming the interrupt driven behaviour of a BIU.
//!
//! These are the knobs the BC, RT and monitor set up commands turn: which
//! transfers and subaddresses report to the event log, where the BC stops or
//! waits for its trigger, and what the service request and dynamic tag
//! handlers look for.

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use crate::device::Device;
use crate::device::layout::{RT_COUNT, RT_SA_COUNT};
use crate::device::state::RunStatus;
use crate::ir::dyntag::{DyntagHealth, DyntagKind, DyntagStatus};
use crate::ir::srvw::SrvwTable;
use crate::{Error, Result};

impl Device {
    /// Switch service request handling on or off
    pub fn srvw_enable(&mut self, biu: usize, enable: bool) -> Result<()> {
        self.require_simulator(biu)?;
        self.bius[biu].srvw.enabled = enable;
        debug!("BIU {biu}: service request handling {enable}");
        Ok(())
    }

    /// Map a vector word table entry to BC transfer `xid`; 0 removes it
    pub fn srvw_define(
        &mut self,
        biu: usize,
        table: u32,
        rt: u32,
        sa_mid: u32,
        xid: u32,
    ) -> Result<()> {
        self.require_simulator(biu)?;
        let table = SrvwTable::from_index(table).ok_or(Error::InvalidMode)?;
        if xid >= self.layout(biu)?.bc_xfer_count {
            return Err(Error::InvalidId);
        }
        self.bius[biu].srvw.define(table, rt, sa_mid, xid)
    }

    /// Rebuild the low priority subframe from the multiple request entries.
    /// Every transfer starts disabled, so the list holds just a return.
    pub fn srvw_build_subframe(&mut self, biu: usize) -> Result<()> {
        self.require_simulator(biu)?;
        let layout = self.layout(biu)?.clone();
        let base = self.tr.to_biu_rel(biu, layout.bc_xfer_desc)?;
        let srvw = &mut self.bius[biu].srvw;
        srvw.build_subframe(base);
        let instrs = srvw.enabled_instrs();
        self.write_lip(biu, &instrs, &layout)
    }

    /// Report completions of BC transfer `xid` to the event log
    pub fn set_bc_xfer_interrupt(&mut self, biu: usize, xid: u32, enable: bool) -> Result<()> {
        self.require_simulator(biu)?;
        if xid >= self.layout(biu)?.bc_xfer_count {
            return Err(Error::InvalidId);
        }
        let interrupts = &mut self.bius[biu].bc.xfer_interrupts;
        if enable {
            interrupts.insert(xid);
        } else {
            interrupts.remove(&xid);
        }
        Ok(())
    }

    /// Report receive or transmit completions of an RT subaddress to the
    /// event log
    pub fn set_rt_interrupt(
        &mut self,
        biu: usize,
        rt: u32,
        sa: u32,
        tx: bool,
        enable: bool,
    ) -> Result<()> {
        self.require_simulator(biu)?;
        if rt >= RT_COUNT {
            return Err(Error::InvalidRt);
        }
        if sa >= RT_SA_COUNT {
            return Err(Error::ParameterOutOfRange);
        }
        let rt_state = &mut self.bius[biu].rt;
        let interrupts = if tx {
            &mut rt_state.tx_interrupts
        } else {
            &mut rt_state.rx_interrupts
        };
        if enable {
            interrupts.insert((rt, sa));
        } else {
            interrupts.remove(&(rt, sa));
        }
        Ok(())
    }

    /// Halt the BC when it skips past the instruction at `instr`, a TSW
    /// pointer.  0 disarms.
    pub fn set_bc_stop_instr(&mut self, biu: usize, instr: u32) -> Result<()> {
        self.require_simulator(biu)?;
        self.bius[biu].bc.stop_instr = instr;
        Ok(())
    }

    /// Mark the BC running when it leaves the trigger wait at `instr`, a
    /// TSW pointer.  0 disarms.
    pub fn set_bc_trigger_instr(&mut self, biu: usize, instr: u32) -> Result<()> {
        self.require_simulator(biu)?;
        let bc = &mut self.bius[biu].bc;
        bc.trigger_instr = instr;
        bc.trg_status = if instr != 0 {
            RunStatus::Busy
        } else {
            RunStatus::Halt
        };
        Ok(())
    }

    /// Arm dynamic bus control: take over the bus when offered, and give it
    /// up when the BC's offer is accepted
    pub fn set_dbc(&mut self, biu: usize, start: bool, stop: bool) -> Result<()> {
        self.require_simulator(biu)?;
        let status = |armed| {
            if armed {
                RunStatus::Busy
            } else {
                RunStatus::Halt
            }
        };
        let bc = &mut self.bius[biu].bc;
        bc.dbc_start = status(start);
        bc.dbc_stop = status(stop);
        Ok(())
    }

    /// Messages completed by BC transfer `xid` since the last reset
    pub fn bc_msg_count(&self, biu: usize, xid: u32) -> Result<u32> {
        self.check_biu(biu)?;
        self.bius[biu]
            .bc
            .msg_counts
            .get(xid as usize)
            .copied()
            .ok_or(Error::InvalidId)
    }

    /// Start a dynamic tag monitor on an RT subaddress.  `kind` is the
    /// host's tag type code.
    pub fn dyntag_enable(
        &mut self,
        biu: usize,
        id: u32,
        (rt, sa, sa_type): (u32, u32, u32),
        kind: u32,
        wpos: u16,
    ) -> Result<()> {
        self.require_monitor(biu)?;
        let kind = DyntagKind::from_code(kind)?;
        self.bius[biu].dyntags.enable(id, rt, sa, sa_type, kind, wpos)
    }

    pub fn dyntag_disable(&mut self, biu: usize, id: u32) -> Result<()> {
        self.require_monitor(biu)?;
        self.bius[biu].dyntags.disable(id)
    }

    pub fn dyntag_status(&self, biu: usize, id: u32) -> Result<(Option<DyntagHealth>, DyntagStatus)> {
        self.require_monitor(biu)?;
        let dyntags = &self.bius[biu].dyntags;
        Ok((dyntags.health(id)?, dyntags.status(id)?))
    }

    /// Track the half of the monitor ring that is ready on each buffer full
    /// interrupt
    pub fn set_bm_recording(&mut self, biu: usize, enable: bool) -> Result<()> {
        self.require_monitor(biu)?;
        let rec = &mut self.bius[biu].bm.rec;
        rec.enabled = enable;
        if enable {
            rec.hfi_count = 0;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Capabilities;
    use crate::device::layout::SysCb;
    use crate::device::testing::{self, ir_word, raise};
    use crate::ir::srvw::{INSTR_RET, INSTR_XFER, make_instr};
    use crate::ir::{IR_PGI, IR_UDF};
    use crate::ram::MemIo;

    #[test]
    fn arming_validates_its_arguments() {
        let (mut dev, _) = testing::device();
        assert_eq!(dev.set_bc_xfer_interrupt(0, 64, true), Err(Error::InvalidId));
        assert_eq!(dev.set_bc_xfer_interrupt(1, 1, true), Err(Error::BiuOutOfRange));
        assert_eq!(dev.set_rt_interrupt(0, 32, 1, false, true), Err(Error::InvalidRt));
        assert_eq!(dev.srvw_define(0, 6, 1, 1, 1), Err(Error::InvalidMode));
        assert_eq!(dev.dyntag_enable(0, 1, (1, 1, 0), 4, 0), Err(Error::InvalidMode));

        dev.set_rt_interrupt(0, 3, 4, true, true).unwrap();
        assert!(dev.bius[0].rt.tx_interrupts.contains(&(3, 4)));
        dev.set_rt_interrupt(0, 3, 4, true, false).unwrap();
        assert!(dev.bius[0].rt.tx_interrupts.is_empty());
    }

    #[test]
    fn capabilities_gate_setup() {
        let mut config = testing::config();
        config.capabilities = Capabilities::monitor_only();
        let (mut dev, _) = testing::device_with(config);
        assert_eq!(dev.srvw_enable(0, true), Err(Error::FunctionNotSupported));
        assert_eq!(dev.set_bm_recording(0, true), Ok(()));
    }

    #[test]
    fn trigger_arms_and_disarms() {
        let (mut dev, _) = testing::device();
        dev.set_bc_trigger_instr(0, 0x400).unwrap();
        assert_eq!(dev.bius[0].bc.trg_status, RunStatus::Busy);
        dev.set_bc_trigger_instr(0, 0).unwrap();
        assert_eq!(dev.bius[0].bc.trg_status, RunStatus::Halt);
    }

    #[test]
    fn service_request_runs_transfer_once() {
        let (mut dev, _) = testing::device();
        let layout = dev.layout(0).unwrap().clone();
        let cb = layout.cb;
        let (xfer, bh) = SysCb::special_xfers()[0];

        dev.srvw_enable(0, true).unwrap();
        // Single RX request from RT 2, SA 5, runs transfer 7
        dev.srvw_define(0, 0, 2, 5, 7).unwrap();

        // The special transfer fetched the vector word from RT 2 while
        // running transfer 4
        let last = layout.bc_xfer(4) - layout.start;
        dev.gram
            .write_u32(cb + xfer + crate::device::layout::SpecialXfer::xf_last_offset(), last)
            .unwrap();
        dev.gram
            .write_u32(cb + bh + crate::device::layout::SpecialBh::lcw_lsw_offset(), 2 << 11)
            .unwrap();
        let vw = 0x8000 | (2 << 7) | 5;
        dev.gram
            .write_u32(cb + bh + crate::device::layout::SpecialBh::data_offset(), vw)
            .unwrap();

        raise(&mut dev, 0, ir_word(1, IR_PGI, 0), cb + xfer);
        dev.scan_interrupts();

        let rsv1 = cb + SysCb::rsv1_offset();
        assert_eq!(
            dev.gram.read_u32(rsv1).unwrap(),
            make_instr(INSTR_XFER, layout.bc_xfer(7) - layout.start)
        );
        assert_eq!(dev.gram.read_u32(rsv1 + 4).unwrap(), make_instr(INSTR_RET, 0));
        assert_eq!(
            dev.gram.read_u32(cb + SysCb::aip_offset()).unwrap(),
            dev.tr.to_gram(0, rsv1).unwrap()
        );
        let rt = dev.bius[0].srvw.rt_status(2).unwrap();
        assert_eq!(rt.xid, 7);
        assert_eq!(rt.lvw as u32, vw);

        // Logged against the transfer that fetched the vector word
        let at = dev.shared_layout.event_log + 8;
        let entry_w3 = dev.shared.read_u32(at + 8).unwrap();
        assert_eq!(entry_w3 & 0xFF_FFFF, 4);
        assert_ne!(dev.shared.read_u32(at).unwrap() & IR_UDF, 0);
    }

    #[test]
    fn subframe_starts_empty() {
        let (mut dev, _) = testing::device();
        let lip = dev.layout(0).unwrap().lip;
        dev.srvw_define(0, 2, 1, 1, 3).unwrap();
        dev.srvw_build_subframe(0).unwrap();
        assert_eq!(dev.gram.read_u32(lip).unwrap(), make_instr(INSTR_RET, 0));
    }
}
