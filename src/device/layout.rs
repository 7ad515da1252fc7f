//! Memory layout of the global RAM and shared RAM arenas.
//!
//! Hardware structures are described as `#[repr(C)]` structs, but are never
//! instantiated in the arenas.  They exist to give each field a fixed offset,
//! which the rest of the crate uses together with [`crate::ram::MemIo`].
//!
//! Each logical BIU owns one partition of global RAM starting at
//! `biu * biu_partition_size`.  [`BiuLayout`] places the BIU's structures
//! inside it.  [`SharedLayout`] places the event log, datasets, FIFO areas,
//! data queues and the mailbox in shared RAM.

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

use alloc::vec::Vec;
#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use crate::board::BoardInfo;
use crate::config::{DeviceConfig, MemPartition};
use crate::{Error, Result};

/// Entries in the interrupt log-list
pub const IR_LOG_ENTRIES: u32 = 128;
/// Size of one interrupt log-list entry
pub const IR_LOG_ENTRY_SIZE: u32 = 8;
/// Size of the interrupt log-list
pub const IR_LOG_SIZE: u32 = IR_LOG_ENTRIES * IR_LOG_ENTRY_SIZE;

pub const BC_XFER_DESC_SIZE: u32 = core::mem::size_of::<BcXferDesc>() as u32;
pub const BH_SIZE: u32 = core::mem::size_of::<BufferHeader>() as u32;
pub const SQ_SIZE: u32 = core::mem::size_of::<StatusQueue>() as u32;
pub const RT_SA_DESC_SIZE: u32 = core::mem::size_of::<RtSaDesc>() as u32;

/// Remote terminals per BIU
pub const RT_COUNT: u32 = 32;
/// Subaddresses or mode codes per subaddress type
pub const RT_SA_COUNT: u32 = 32;
/// Subaddress types: receive, transmit, mode code receive, mode code transmit
pub const RT_SA_TYPES: u32 = 4;
/// Descriptor block of one RT
pub const RT_DESC_SIZE: u32 = RT_SA_COUNT * RT_SA_TYPES * RT_SA_DESC_SIZE;

/// Size of a BC instruction list area
pub const INSTR_LIST_SIZE: u32 = 0x100;
/// Size of one simulator data buffer: 32 data words
pub const SIM_BUF_SIZE: u32 = 64;

/// Size of one event log entry
pub const EVENT_LOG_ENTRY_SIZE: u32 = 16;
/// Entries in the event log
pub const EVENT_LOG_ENTRIES: u32 = 256;
/// Size of one dataset buffer
pub const DATASET_SIZE: u32 = 64;

/// Data queue ids: one bus monitor queue per BIU, then these
pub const DATA_QUEUE_ID_MIL_SCOPE: u8 = 8;
pub const DATA_QUEUE_ID_GENERIC_ACQ: u8 = 9;
pub const DATA_QUEUE_MAX: u8 = 10;

/// Special transfer descriptor inside the system control block, used for
/// service request and RT-RT handling.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct SpecialXfer {
    pub xf_ctrl: u32,
    pub bhd_ptr: u32,
    pub cw2_cw1: u32,
    pub img_swm: u32,
    pub msg_cnt: u32,
    pub err_cnt: u32,
    /// Id of the last transfer that used this descriptor
    pub xf_last: u32,
}

impl SpecialXfer {
    pub const fn xf_last_offset() -> u32 {
        core::mem::offset_of!(SpecialXfer, xf_last) as u32
    }
}

/// Special buffer header inside the system control block, with its status
/// queue and one data word inline.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct SpecialBh {
    pub bh_ctrl: u32,
    pub sq_addr: u32,
    pub eq_addr: u32,
    pub bp_addr: u32,
    pub sq_ctrl: u32,
    pub lcw_lsw: u32,
    pub act_bptr: u32,
    pub time_tag: u32,
    pub con1: u32,
    pub addr1: u32,
    pub con2: u32,
    pub addr2: u32,
    /// Vector word returned by the RT
    pub data: u32,
}

impl SpecialBh {
    pub const fn lcw_lsw_offset() -> u32 {
        core::mem::offset_of!(SpecialBh, lcw_lsw) as u32
    }

    pub const fn data_offset() -> u32 {
        core::mem::offset_of!(SpecialBh, data) as u32
    }
}

/// Low speed system control block.  Lives at the start of each BIU partition.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct SysCb {
    /// System control word
    pub scw: u32,
    /// System status word
    pub ssw: u32,
    pub cid: u32,
    /// Interrupt log-list pointer: next entry the hardware writes
    pub ilp: u32,
    pub car: u32,
    pub rtpd1: u32,
    pub rtpd2: u32,
    pub res: u32,
    /// Monitor read position saved by the TSW between drains
    pub bm_get: u32,
    pub lca_id: u32,
    pub glb_mem: u32,
    pub freq: u32,
    pub mfc: u32,
    pub mft: u32,
    /// High priority instruction list pointer
    pub hip: u32,
    /// Low priority instruction list pointer
    pub lip: u32,
    /// Acyclic instruction list pointer
    pub aip: u32,
    pub res1: u32,
    pub cmd_inout: u32,
    pub rt_mc: u32,
    pub rt_ec: u32,
    pub bc_mc: u32,
    pub bc_ec: u32,
    pub syscnt_init: u32,
    pub ttl: u32,
    pub tth: u32,
    pub res2: [u32; 3],
    pub git_hash: u32,
    pub fw_build: u32,
    pub glob_id: u32,
    /// Monitor buffer base address
    pub mbba: u32,
    /// Monitor buffer fill pointer
    pub mbfp: u32,
    /// Monitor status word
    pub msw: u32,
    pub mftw: u32,
    pub mtiw: u32,
    /// Monitor start trigger pointer
    pub mstp: u32,
    pub mcc: u32,
    /// Trace after trigger count
    pub tat: u32,
    pub swxm: u32,
    pub bm_cnt: [u32; 7],
    pub rcw: u32,
    pub rrew: u32,
    pub rbb: u32,
    pub rbp: u32,
    pub rec: u32,
    pub raec: u32,
    pub ramto: u32,
    pub ramio: u32,
    pub res4: [u32; 4],
    pub bm_xfer_cnt: [u32; 4],
    pub xf_instr: [u32; 32],
    pub xf_desc: [SpecialXfer; 2],
    /// Scratch instruction list for single shot service request transfers
    pub rsv1: [u32; 4],
    pub rsv2: [u32; 14],
    pub xf_instr_rtrt: [u32; 32],
    pub xf_desc_rtrt: [SpecialXfer; 2],
    pub xf_bh: [SpecialBh; 2],
    pub xf_bh_rtrt: [SpecialBh; 2],
    pub res5: [u32; 30],
}

const _: () = assert!(core::mem::size_of::<SysCb>() == 0x400);

impl SysCb {
    pub const fn scw_offset() -> u32 {
        core::mem::offset_of!(SysCb, scw) as u32
    }

    pub const fn ssw_offset() -> u32 {
        core::mem::offset_of!(SysCb, ssw) as u32
    }

    pub const fn ilp_offset() -> u32 {
        core::mem::offset_of!(SysCb, ilp) as u32
    }

    pub const fn bm_get_offset() -> u32 {
        core::mem::offset_of!(SysCb, bm_get) as u32
    }

    pub const fn lip_offset() -> u32 {
        core::mem::offset_of!(SysCb, lip) as u32
    }

    pub const fn aip_offset() -> u32 {
        core::mem::offset_of!(SysCb, aip) as u32
    }

    pub const fn mbba_offset() -> u32 {
        core::mem::offset_of!(SysCb, mbba) as u32
    }

    pub const fn mbfp_offset() -> u32 {
        core::mem::offset_of!(SysCb, mbfp) as u32
    }

    pub const fn msw_offset() -> u32 {
        core::mem::offset_of!(SysCb, msw) as u32
    }

    pub const fn mstp_offset() -> u32 {
        core::mem::offset_of!(SysCb, mstp) as u32
    }

    pub const fn tat_offset() -> u32 {
        core::mem::offset_of!(SysCb, tat) as u32
    }

    pub const fn rsv1_offset() -> u32 {
        core::mem::offset_of!(SysCb, rsv1) as u32
    }

    /// Offsets of the special transfer descriptors a service request
    /// interrupt may point at, each with its buffer header.
    pub const fn special_xfers() -> [(u32, u32); 4] {
        let xfer = core::mem::size_of::<SpecialXfer>() as u32;
        let bh = core::mem::size_of::<SpecialBh>() as u32;
        let desc = core::mem::offset_of!(SysCb, xf_desc) as u32;
        let desc_rtrt = core::mem::offset_of!(SysCb, xf_desc_rtrt) as u32;
        let bh0 = core::mem::offset_of!(SysCb, xf_bh) as u32;
        let bh_rtrt = core::mem::offset_of!(SysCb, xf_bh_rtrt) as u32;
        [
            (desc, bh0),
            (desc + xfer, bh0 + bh),
            (desc_rtrt, bh_rtrt),
            (desc_rtrt + xfer, bh_rtrt + bh),
        ]
    }
}

/// High speed (3910) control block.  Only the monitor fields are used.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct HsCb {
    pub scw: u32,
    pub ssw: u32,
    pub mbba: u32,
    pub mbfp: u32,
    pub msw: u32,
    pub mstp: u32,
    pub tat: u32,
    pub bm_get: u32,
    pub res: [u32; 56],
}

const _: () = assert!(core::mem::size_of::<HsCb>() == 0x100);

impl HsCb {
    pub const fn scw_offset() -> u32 {
        core::mem::offset_of!(HsCb, scw) as u32
    }

    pub const fn mbba_offset() -> u32 {
        core::mem::offset_of!(HsCb, mbba) as u32
    }

    pub const fn mbfp_offset() -> u32 {
        core::mem::offset_of!(HsCb, mbfp) as u32
    }

    pub const fn msw_offset() -> u32 {
        core::mem::offset_of!(HsCb, msw) as u32
    }

    pub const fn mstp_offset() -> u32 {
        core::mem::offset_of!(HsCb, mstp) as u32
    }

    pub const fn tat_offset() -> u32 {
        core::mem::offset_of!(HsCb, tat) as u32
    }

    pub const fn bm_get_offset() -> u32 {
        core::mem::offset_of!(HsCb, bm_get) as u32
    }
}

/// BC transfer descriptor
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct BcXferDesc {
    pub xf_ctrl: u32,
    pub bhd_ptr: u32,
    pub cw2_cw1: u32,
    pub img_swm: u32,
    pub msg_cnt: u32,
    pub err_cnt: u32,
    /// FIFO queue assigned to the transfer, in the upper half-word
    pub fifo_id: u32,
    pub dytg_id: u32,
}

impl BcXferDesc {
    pub const fn xf_ctrl_offset() -> u32 {
        core::mem::offset_of!(BcXferDesc, xf_ctrl) as u32
    }

    pub const fn bhd_ptr_offset() -> u32 {
        core::mem::offset_of!(BcXferDesc, bhd_ptr) as u32
    }

    pub const fn cw2_cw1_offset() -> u32 {
        core::mem::offset_of!(BcXferDesc, cw2_cw1) as u32
    }

    pub const fn fifo_id_offset() -> u32 {
        core::mem::offset_of!(BcXferDesc, fifo_id) as u32
    }
}

/// Buffer header, shared by BC and RT
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct BufferHeader {
    pub bh_ctrl: u32,
    pub sq_addr: u32,
    pub eq_addr: u32,
    pub bp_addr: u32,
}

impl BufferHeader {
    pub const fn bh_ctrl_offset() -> u32 {
        core::mem::offset_of!(BufferHeader, bh_ctrl) as u32
    }

    pub const fn sq_addr_offset() -> u32 {
        core::mem::offset_of!(BufferHeader, sq_addr) as u32
    }

    pub const fn bp_addr_offset() -> u32 {
        core::mem::offset_of!(BufferHeader, bp_addr) as u32
    }
}

/// Status queue entry
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct StatusQueue {
    pub sq_ctrl: u32,
    /// Last command word in the upper half, last status word in the lower
    pub lcw_lsw: u32,
    pub act_buf_ptr: u32,
    pub time_tag: u32,
}

impl StatusQueue {
    pub const fn lcw_lsw_offset() -> u32 {
        core::mem::offset_of!(StatusQueue, lcw_lsw) as u32
    }

    pub const fn time_tag_offset() -> u32 {
        core::mem::offset_of!(StatusQueue, time_tag) as u32
    }
}

/// RT subaddress descriptor
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct RtSaDesc {
    pub sa_ctrl: u32,
    pub bhd_ptr: u32,
}

impl RtSaDesc {
    pub const fn sa_ctrl_offset() -> u32 {
        core::mem::offset_of!(RtSaDesc, sa_ctrl) as u32
    }

    pub const fn bhd_ptr_offset() -> u32 {
        core::mem::offset_of!(RtSaDesc, bhd_ptr) as u32
    }
}

/// Placement of one BIU's structures in global RAM.  All fields are TSW
/// pointers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BiuLayout {
    pub start: u32,
    pub end: u32,
    pub cb: u32,
    pub ir_log: u32,
    pub hs_cb: u32,
    pub bc_xfer_desc: u32,
    pub bc_xfer_count: u32,
    pub bc_bh: u32,
    pub bc_sq: u32,
    pub bc_hid_count: u32,
    pub hip: u32,
    pub lip: u32,
    pub acyc: u32,
    pub rt_sa_desc: u32,
    pub rt_bh: u32,
    pub rt_sq: u32,
    pub rt_hid_count: u32,
    pub bm_buf: u32,
    pub bm_buf_size: u32,
    pub sim_buf: u32,
    pub sim_buf_count: u32,
}

impl BiuLayout {
    /// Place a partition of `size` bytes at `start`.
    ///
    /// Returns [`Error::NoSpaceLeft`] if the partition does not fit.
    pub fn compute(start: u32, size: u32, partition: &MemPartition) -> Result<Self> {
        partition.check_limits()?;

        let mut next = start;
        let mut take = |len: u32| {
            let at = next;
            next += len;
            at
        };

        let cb = take(core::mem::size_of::<SysCb>() as u32);
        let ir_log = take(IR_LOG_SIZE);
        let hs_cb = take(core::mem::size_of::<HsCb>() as u32);
        let bc_xfer_desc = take(partition.bc_xfer * BC_XFER_DESC_SIZE);
        let bc_bh = take(partition.bc_hid * BH_SIZE);
        let bc_sq = take(partition.bc_hid * SQ_SIZE);
        let hip = take(INSTR_LIST_SIZE);
        let lip = take(INSTR_LIST_SIZE);
        let acyc = take(INSTR_LIST_SIZE);
        let rt_sa_desc = take(RT_COUNT * RT_DESC_SIZE);
        let rt_bh = take(partition.rt_hid * BH_SIZE);
        let rt_sq = take(partition.rt_hid * SQ_SIZE);
        let bm_buf = take(partition.bm_buf_size);
        let sim_buf = take(partition.sim_bufs * SIM_BUF_SIZE);

        let end = next;
        if end - start > size {
            debug!(
                "Partition at {start:#010X} needs {:#010X} bytes, has {size:#010X}",
                end - start
            );
            return Err(Error::NoSpaceLeft);
        }

        Ok(Self {
            start,
            end,
            cb,
            ir_log,
            hs_cb,
            bc_xfer_desc,
            bc_xfer_count: partition.bc_xfer,
            bc_bh,
            bc_sq,
            bc_hid_count: partition.bc_hid,
            hip,
            lip,
            acyc,
            rt_sa_desc,
            rt_bh,
            rt_sq,
            rt_hid_count: partition.rt_hid,
            bm_buf,
            bm_buf_size: partition.bm_buf_size,
            sim_buf,
            sim_buf_count: partition.sim_bufs,
        })
    }

    /// Bytes of the partition in use
    pub fn used_bytes(&self) -> u32 {
        self.end - self.start
    }

    pub fn sim_buf_size(&self) -> u32 {
        self.sim_buf_count * SIM_BUF_SIZE
    }

    /// Address of BC transfer descriptor `xid`
    pub fn bc_xfer(&self, xid: u32) -> u32 {
        self.bc_xfer_desc + xid * BC_XFER_DESC_SIZE
    }

    /// Address of the descriptor for an RT subaddress
    pub fn rt_sa(&self, rt: u32, sa_type: u32, sa: u32) -> u32 {
        self.rt_sa_desc + rt * RT_DESC_SIZE + (sa_type * RT_SA_COUNT + sa) * RT_SA_DESC_SIZE
    }

    /// Whether `addr` lies inside the BC transfer descriptor table
    pub fn contains_bc_xfer(&self, addr: u32) -> bool {
        addr >= self.bc_xfer_desc && addr < self.bc_xfer(self.bc_xfer_count)
    }

    pub fn contains_rt_sa(&self, addr: u32) -> bool {
        addr >= self.rt_sa_desc && addr < self.rt_sa_desc + RT_COUNT * RT_DESC_SIZE
    }
}

/// A data queue slot in shared RAM
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataQueueSlot {
    /// Offset of the queue header
    pub header: u32,
    /// Offset of the data area
    pub data: u32,
    /// Size of the data area
    pub size: u32,
}

/// Placement of everything in shared RAM.  All fields are shared RAM offsets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SharedLayout {
    pub event_log: u32,
    pub datasets: u32,
    pub dataset_count: u32,
    pub fifo_area: u32,
    pub fifo_area_size: u32,
    pub data_queues: Vec<Option<DataQueueSlot>>,
    pub mailbox_cmd: u32,
    pub mailbox_ack: u32,
    pub mailbox_size: u32,
    pub end: u32,
}

impl SharedLayout {
    pub fn compute(config: &DeviceConfig, board: &BoardInfo) -> Result<Self> {
        let mut next = 0u32;
        let mut take = |len: u32| {
            let at = next;
            next = next.saturating_add(len.next_multiple_of(0x10));
            at
        };

        let event_log = take(8 + EVENT_LOG_ENTRIES * EVENT_LOG_ENTRY_SIZE);
        let datasets = take(config.datasets * DATASET_SIZE);
        let fifo_area = take(board.bius() as u32 * config.fifo_area_size);

        let mut data_queues = Vec::with_capacity(DATA_QUEUE_MAX as usize);
        for id in 0..DATA_QUEUE_MAX {
            let size = match id {
                id if (id as usize) < board.bius() => {
                    if board.is_hs(id as usize) {
                        config.dq_hs_size
                    } else {
                        config.dq_ls_size
                    }
                }
                DATA_QUEUE_ID_MIL_SCOPE | DATA_QUEUE_ID_GENERIC_ACQ => config.dq_ls_size,
                _ => {
                    data_queues.push(None);
                    continue;
                }
            };
            let header = take(config.dq_header_size + size);
            data_queues.push(Some(DataQueueSlot {
                header,
                data: header + config.dq_header_size,
                size,
            }));
        }

        let mailbox_cmd = take(config.mailbox_size);
        let mailbox_ack = take(config.mailbox_size);
        let end = next;

        if end > config.shared_size {
            debug!(
                "Shared RAM needs {end:#010X} bytes, has {:#010X}",
                config.shared_size
            );
            return Err(Error::NoSpaceLeft);
        }

        Ok(Self {
            event_log,
            datasets,
            dataset_count: config.datasets,
            fifo_area,
            fifo_area_size: config.fifo_area_size,
            data_queues,
            mailbox_cmd,
            mailbox_ack,
            mailbox_size: config.mailbox_size,
            end,
        })
    }

    /// Offset of a dataset buffer
    pub fn dataset(&self, id: u32) -> Result<u32> {
        if id >= self.dataset_count {
            return Err(Error::ParameterOutOfRange);
        }
        Ok(self.datasets + id * DATASET_SIZE)
    }

    /// Start of a BIU's FIFO area
    pub fn fifo(&self, biu: usize) -> u32 {
        self.fifo_area + biu as u32 * self.fifo_area_size
    }

    pub fn data_queue(&self, id: u32) -> Result<DataQueueSlot> {
        self.data_queues
            .get(id as usize)
            .copied()
            .flatten()
            .ok_or(Error::DataQueueIdNotInRange)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::PLATFORM_CPCIX_3U;

    fn partition() -> MemPartition {
        MemPartition {
            bc_xfer: 64,
            bc_hid: 64,
            rt_hid: 64,
            sim_bufs: 128,
            bm_buf_size: 0x1_0000,
        }
    }

    #[test]
    fn control_block_offsets() {
        assert_eq!(SysCb::ilp_offset(), 0x0C);
        assert_eq!(SysCb::bm_get_offset(), 0x20);
        assert_eq!(SysCb::aip_offset(), 0x40);
        assert_eq!(SysCb::mbba_offset(), 0x80);
        assert_eq!(SysCb::mstp_offset(), 0x94);
        assert_eq!(SysCb::tat_offset(), 0x9C);
        assert_eq!(SysCb::rsv1_offset(), 0x1B8);
        assert_eq!(
            SysCb::special_xfers(),
            [(0x180, 0x2B8), (0x19C, 0x2EC), (0x280, 0x320), (0x29C, 0x354)]
        );
        assert_eq!(HsCb::bm_get_offset(), 0x1C);
        assert_eq!(BC_XFER_DESC_SIZE, 32);
        assert_eq!(RT_DESC_SIZE, 1024);
    }

    #[test]
    fn partition_is_packed_in_order() {
        let layout = BiuLayout::compute(0x2_0000, 0x2_0000, &partition()).unwrap();
        assert_eq!(layout.cb, 0x2_0000);
        assert_eq!(layout.ir_log, 0x2_0400);
        assert_eq!(layout.hs_cb, 0x2_0800);
        assert_eq!(layout.bc_xfer_desc, 0x2_0900);
        assert_eq!(layout.bc_bh, 0x2_1100);
        assert_eq!(layout.rt_sa(1, 1, 2), layout.rt_sa_desc + 0x400 + 0x110);
        assert!(layout.contains_bc_xfer(layout.bc_xfer(63)));
        assert!(!layout.contains_bc_xfer(layout.bc_xfer(64)));
        assert!(layout.end <= 0x4_0000);
    }

    #[test]
    fn oversized_partition_is_rejected() {
        let mut big = partition();
        big.bm_buf_size = 0x2_0000;
        assert_eq!(
            BiuLayout::compute(0, 0x2_0000, &big),
            Err(Error::NoSpaceLeft)
        );
    }

    #[test]
    fn shared_layout_has_queue_slots() {
        let config = DeviceConfig {
            shared_size: 0x4_0000,
            dq_ls_size: 0x1000,
            dq_hs_size: 0x2000,
            datasets: 16,
            fifo_area_size: 0x2000,
            ..Default::default()
        };
        let board = BoardInfo::decode(0xFFFF_3011, PLATFORM_CPCIX_3U);
        let layout = SharedLayout::compute(&config, &board).unwrap();

        assert_eq!(layout.event_log, 0);
        assert_eq!(layout.data_queue(0).unwrap().size, 0x1000);
        assert_eq!(layout.data_queue(1).unwrap().size, 0x2000);
        assert_eq!(layout.data_queue(2), Err(Error::DataQueueIdNotInRange));
        assert!(layout.data_queue(9).is_ok());
        assert_eq!(layout.data_queue(10), Err(Error::DataQueueIdNotInRange));
        let slot = layout.data_queue(8).unwrap();
        assert_eq!(slot.data, slot.header + 0x100);
        assert!(layout.end <= 0x4_0000);
    }
}
