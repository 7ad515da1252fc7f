//! Data queues and the bus monitor drain engine.
//!
//! A data queue is a ring in shared RAM that the TSW produces into and the
//! host consumes from.  Each queue starts with a [`DataQueueHeader`], whose
//! layout is shared with host side code, followed by its data area.
//!
//! Queues 0 to 7 record the bus monitor of the BIU with the same index.  The
//! drain engine copies new monitor data from the BIU's monitor ring in global
//! RAM into the queue, in at most two chunks: up to the end of the monitor
//! ring, then from its start.  The host visible `put` is written once, after
//! both chunks, so the host never sees part of a drain.
//!
//! Overflow is sticky.  Once [`STATUS_OVERFLOW`] is set nothing more is
//! copied until the host restarts the queue.

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

pub mod commands;

use alloc::vec;
#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use crate::addr::{AddressTranslator, ByteOrder};
use crate::device::layout::{
    DATA_QUEUE_ID_GENERIC_ACQ, DATA_QUEUE_ID_MIL_SCOPE, DATA_QUEUE_MAX, DataQueueSlot, HsCb,
    SharedLayout, SysCb,
};
use crate::ram::MemIo;
use crate::ring::{available_bytes, bytes_to_end, free_bytes, increment_offset};
use crate::{Error, Result};

/// Size of one monitor entry and the unit every copy is rounded down to
pub const ENTRY_SIZE: u32 = 4;

/// Queue is running
pub const STATUS_START: u32 = 0x8000_0000;
/// Queue was suspended by the host
pub const STATUS_SUSPEND: u32 = 0x4000_0000;
pub const STATUS_CAP_SINGLE: u32 = 0x0080_0000;
pub const STATUS_CAP_CONT: u32 = 0x0040_0000;
/// Producer fell behind, data was lost
pub const STATUS_OVERFLOW: u32 = 0x0000_8000;
/// Any error, overflow included
pub const STATUS_ERROR: u32 = 0x0000_FFFF;

pub const CTRL_START: u32 = 0;
pub const CTRL_STOP: u32 = 1;
pub const CTRL_SUSPEND: u32 = 2;
pub const CTRL_FLUSH: u32 = 3;

/// Words in a generic acquisition packet: header, time tag high, time tag
/// low, value
pub const GENERIC_ACQ_WORDS: usize = 4;

// Monitor status word bits
const LS_MSW_CAPTURE_ACTIVE: u32 = 0x0002_0000;
const LS_MSW_FIRST_CAPTURE: u32 = 0x0001_0000;
const LS_MSW_OVERFLOW: u32 = 1 << 18;
const HS_MSW_CAPTURE_ACTIVE: u32 = 0x0400_0000;
const HS_MSW_FIRST_CAPTURE: u32 = 0x0200_0000;
const HS_MSW_BUFFER_FULL: u32 = 0x0100_0000;
const HS_MSW_OVERFLOW: u32 = 1 << 24;

/// Header at the start of every data queue.  Offsets are an ABI shared with
/// the host.  All pointers are shared RAM offsets, except `bm_get`.
#[repr(C)]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DataQueueHeader {
    pub status: u32,
    pub put: u32,
    pub get: u32,
    pub data_start: u32,
    pub data_size: u32,
    pub reserved: [u32; 5],
    pub bm_get: u32,
    /// `hs_stream` in byte 0
    pub hs: u32,
    /// `id`, `biu`, `triggered` and `first_read`, one byte each from byte 0
    pub info: u32,
    pub reserved9: u32,
}

const HEADER_WORDS: usize = core::mem::size_of::<DataQueueHeader>() / 4;

const _: () = assert!(HEADER_WORDS == 14);

impl DataQueueHeader {
    pub const fn status_offset() -> u32 {
        core::mem::offset_of!(DataQueueHeader, status) as u32
    }

    pub const fn put_offset() -> u32 {
        core::mem::offset_of!(DataQueueHeader, put) as u32
    }

    pub const fn get_offset() -> u32 {
        core::mem::offset_of!(DataQueueHeader, get) as u32
    }

    pub const fn data_start_offset() -> u32 {
        core::mem::offset_of!(DataQueueHeader, data_start) as u32
    }

    pub const fn data_size_offset() -> u32 {
        core::mem::offset_of!(DataQueueHeader, data_size) as u32
    }

    pub const fn hs_offset() -> u32 {
        core::mem::offset_of!(DataQueueHeader, hs) as u32
    }

    pub const fn info_offset() -> u32 {
        core::mem::offset_of!(DataQueueHeader, info) as u32
    }

    pub fn id(&self) -> u8 {
        self.info as u8
    }

    pub fn biu(&self) -> u8 {
        (self.info >> 8) as u8
    }

    pub fn triggered(&self) -> u8 {
        (self.info >> 16) as u8
    }

    fn pack_info(id: u8, biu: u8, triggered: u8) -> u32 {
        id as u32 | (biu as u32) << 8 | (triggered as u32) << 16
    }

    /// Read a header from shared RAM
    pub fn read<M: MemIo>(shared: &M, at: u32) -> Result<Self> {
        let mut w = [0u32; HEADER_WORDS];
        shared.read_bulk(at, &mut w)?;
        Ok(Self {
            status: w[0],
            put: w[1],
            get: w[2],
            data_start: w[3],
            data_size: w[4],
            reserved: [w[5], w[6], w[7], w[8], w[9]],
            bm_get: w[10],
            hs: w[11],
            info: w[12],
            reserved9: w[13],
        })
    }

    fn write<M: MemIo>(&self, shared: &mut M, at: u32) -> Result<()> {
        let r = self.reserved;
        shared.write_bulk(
            at,
            &[
                self.status,
                self.put,
                self.get,
                self.data_start,
                self.data_size,
                r[0],
                r[1],
                r[2],
                r[3],
                r[4],
                self.bm_get,
                self.hs,
                self.info,
                self.reserved9,
            ],
        )
    }
}

/// Answer to DATAQUEUE_OPEN
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataQueueOpened {
    /// Shared RAM offset of the queue header
    pub offset: u32,
    /// Size of the data area
    pub size: u32,
}

/// Where the monitor of a BIU keeps its ring and its registers.  Offsets are
/// TSW pointers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitorRing {
    pub biu: usize,
    pub hs: bool,
    /// Control block holding the monitor registers: the system control block
    /// for low speed, the high speed control block otherwise
    pub cb: u32,
    pub start: u32,
    pub size: u32,
}

impl MonitorRing {
    fn scw(&self) -> u32 {
        if self.hs {
            self.cb + HsCb::scw_offset()
        } else {
            self.cb + SysCb::scw_offset()
        }
    }

    fn msw(&self) -> u32 {
        if self.hs {
            self.cb + HsCb::msw_offset()
        } else {
            self.cb + SysCb::msw_offset()
        }
    }

    fn mbfp(&self) -> u32 {
        if self.hs {
            self.cb + HsCb::mbfp_offset()
        } else {
            self.cb + SysCb::mbfp_offset()
        }
    }

    fn mstp(&self) -> u32 {
        if self.hs {
            self.cb + HsCb::mstp_offset()
        } else {
            self.cb + SysCb::mstp_offset()
        }
    }

    fn tat(&self) -> u32 {
        if self.hs {
            self.cb + HsCb::tat_offset()
        } else {
            self.cb + SysCb::tat_offset()
        }
    }

    fn bm_get(&self) -> u32 {
        if self.hs {
            self.cb + HsCb::bm_get_offset()
        } else {
            self.cb + SysCb::bm_get_offset()
        }
    }

    fn overflow_bit(&self) -> u32 {
        if self.hs { HS_MSW_OVERFLOW } else { LS_MSW_OVERFLOW }
    }
}

/// Outcome of one drain pass
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Drained {
    /// Bytes made visible to the host
    pub bytes: u32,
    /// This pass set the overflow flag
    pub overflow: bool,
}

/// BIU whose monitor a queue records
pub fn queue_biu(id: u32) -> usize {
    match id as u8 {
        DATA_QUEUE_ID_MIL_SCOPE | DATA_QUEUE_ID_GENERIC_ACQ => 0,
        id => id as usize,
    }
}

/// Whether queue `id` records a bus monitor
pub fn is_monitor_queue(id: u32) -> bool {
    id < DATA_QUEUE_ID_MIL_SCOPE as u32
}

/// Open state of the data queues of a device
#[derive(Debug, Clone)]
pub struct DataQueues {
    open: [bool; DATA_QUEUE_MAX as usize],
}

impl Default for DataQueues {
    fn default() -> Self {
        Self::new()
    }
}

impl DataQueues {
    pub fn new() -> Self {
        Self {
            open: [false; DATA_QUEUE_MAX as usize],
        }
    }

    pub fn is_open(&self, id: u32) -> bool {
        self.open.get(id as usize).copied().unwrap_or(false)
    }

    /// Ids of the open queues
    pub fn open_ids(&self) -> impl Iterator<Item = u32> + '_ {
        self.open
            .iter()
            .enumerate()
            .filter(|(_, open)| **open)
            .map(|(id, _)| id as u32)
    }

    fn slot(&self, id: u32, layout: &SharedLayout) -> Result<Option<DataQueueSlot>> {
        if id >= DATA_QUEUE_MAX as u32 {
            return Err(Error::InvalidId);
        }
        if !self.is_open(id) {
            return Ok(None);
        }
        layout.data_queue(id).map(Some)
    }

    /// Handle DATAQUEUE_OPEN: reset the queue header to an empty, stopped
    /// queue.
    pub fn open<M: MemIo>(
        &mut self,
        id: u32,
        hs: bool,
        shared: &mut M,
        layout: &SharedLayout,
    ) -> Result<DataQueueOpened> {
        if id >= DATA_QUEUE_MAX as u32 {
            return Err(Error::DataQueueIdNotInRange);
        }
        let slot = layout.data_queue(id)?;
        let header = DataQueueHeader {
            data_start: slot.data,
            data_size: slot.size,
            put: slot.data,
            get: slot.data,
            hs: hs as u32,
            info: DataQueueHeader::pack_info(id as u8, queue_biu(id) as u8, 0),
            ..Default::default()
        };
        header.write(shared, slot.header)?;
        self.open[id as usize] = true;

        debug!(
            "Data queue {id} open at {:#010X}, {:#010X} bytes",
            slot.header, slot.size
        );
        Ok(DataQueueOpened {
            offset: slot.header,
            size: slot.size,
        })
    }

    /// Handle DATAQUEUE_CONTROL.
    ///
    /// Starting resets the queue to empty and clears every status bit but the
    /// capture mode.  Stopping and flushing drain the monitor one last time.
    pub fn control<G: MemIo, S: MemIo>(
        &mut self,
        id: u32,
        mode: u32,
        ring: &MonitorRing,
        gram: &mut G,
        shared: &mut S,
        layout: &SharedLayout,
        tr: &AddressTranslator,
    ) -> Result<Drained> {
        let Some(slot) = self.slot(id, layout)? else {
            return match mode {
                CTRL_START => Err(Error::BufferNotAllocated),
                _ => Ok(Drained::default()),
            };
        };
        let mut header = DataQueueHeader::read(shared, slot.header)?;
        let mut drained = Drained::default();

        match mode {
            CTRL_START => {
                header.info = DataQueueHeader::pack_info(header.id(), header.biu(), 0);
                if ring.hs && is_monitor_queue(id) {
                    // Tell the high speed monitor how many 64K blocks it has
                    let order = tr.order();
                    let scw = order.apply(gram.read_u32(ring.scw())?);
                    let blocks = (ring.size / 0x1_0000).saturating_sub(1) & 0xFF;
                    let scw = (scw & !(0xFF << 10)) | (blocks << 10);
                    gram.write_u32(ring.scw(), order.apply(scw))?;
                }
                header.put = header.data_start;
                header.get = header.data_start;
                header.status =
                    (header.status & (STATUS_CAP_SINGLE | STATUS_CAP_CONT)) | STATUS_START;
                header.write(shared, slot.header)?;
                debug!("Data queue {id} started");
            }
            CTRL_STOP => {
                if is_monitor_queue(id) {
                    drained = self.drain(id, ring, gram, shared, layout, tr)?;
                }
                let status = shared.read_u32(slot.header + DataQueueHeader::status_offset())?;
                shared.write_u32(
                    slot.header + DataQueueHeader::status_offset(),
                    status & !STATUS_START,
                )?;
                debug!("Data queue {id} stopped");
            }
            CTRL_SUSPEND => {
                header.status = (header.status & !STATUS_START) | STATUS_SUSPEND;
                shared.write_u32(
                    slot.header + DataQueueHeader::status_offset(),
                    header.status,
                )?;
                debug!("Data queue {id} suspended");
            }
            CTRL_FLUSH => {
                if is_monitor_queue(id) {
                    drained = self.drain(id, ring, gram, shared, layout, tr)?;
                }
                let status = shared.read_u32(slot.header + DataQueueHeader::status_offset())?;
                shared.write_u32(
                    slot.header + DataQueueHeader::status_offset(),
                    status & !(STATUS_CAP_SINGLE | STATUS_CAP_CONT),
                )?;
            }
            _ => return Err(Error::InvalidMode),
        }
        Ok(drained)
    }

    /// Handle DATAQUEUE_CLOSE
    pub fn close<M: MemIo>(&mut self, id: u32, shared: &mut M, layout: &SharedLayout) -> Result<()> {
        let Some(slot) = self.slot(id, layout)? else {
            return Ok(());
        };
        shared.write_u32(slot.header + DataQueueHeader::status_offset(), 0)?;
        self.open[id as usize] = false;
        debug!("Data queue {id} closed");
        Ok(())
    }

    /// Whether the monitor of `ring` has new data queue `id` may take.
    ///
    /// The monitor must have triggered and its trace after trigger must be
    /// complete.  The queue must be started and free of errors.
    pub fn is_recording_possible<G: MemIo, S: MemIo>(
        &self,
        id: u32,
        ring: &MonitorRing,
        gram: &G,
        shared: &S,
        layout: &SharedLayout,
        order: ByteOrder,
    ) -> Result<bool> {
        let Some(slot) = self.slot(id, layout)? else {
            return Ok(false);
        };
        let msw = order.apply(gram.read_u32(ring.msw())?);
        let scw = order.apply(gram.read_u32(ring.scw())?);
        let tat = order.apply(gram.read_u32(ring.tat())?);

        let (active, first, full, mode) = if ring.hs {
            (
                msw & HS_MSW_CAPTURE_ACTIVE != 0,
                msw & HS_MSW_FIRST_CAPTURE != 0,
                msw & HS_MSW_BUFFER_FULL != 0,
                (scw & 0x0040_0000) >> 22,
            )
        } else {
            (
                msw & LS_MSW_CAPTURE_ACTIVE != 0,
                msw & LS_MSW_FIRST_CAPTURE != 0,
                false,
                (scw & 0x00C0_0000) >> 22,
            )
        };

        if !first {
            return Ok(false);
        }
        // Standard capture: wait for the trace after trigger to complete
        if mode == 0 && tat != 0 {
            if ring.hs && !full {
                return Ok(false);
            }
            if !ring.hs && active {
                return Ok(false);
            }
        }

        let status = shared.read_u32(slot.header + DataQueueHeader::status_offset())?;
        Ok(status & STATUS_ERROR == 0 && status & STATUS_START != 0)
    }

    // Monitor read and fill positions.  The first drain after a trigger takes
    // the start from the trigger pointer; later drains continue from where
    // the last one stopped.
    fn monitor_offsets<G: MemIo, S: MemIo>(
        &self,
        ring: &MonitorRing,
        header_at: u32,
        gram: &mut G,
        shared: &mut S,
        tr: &AddressTranslator,
    ) -> Result<(u32, u32)> {
        let header = DataQueueHeader::read(shared, header_at)?;
        let order = tr.order();
        let put = tr.to_tsw(ring.biu, gram.read_u32(ring.mbfp())?)?;

        if header.triggered() != 0 {
            let get = gram.read_u32(ring.bm_get())?;
            return Ok((put, get));
        }

        let msw = order.apply(gram.read_u32(ring.msw())?);
        let first = if ring.hs {
            msw & HS_MSW_FIRST_CAPTURE != 0
        } else {
            msw & LS_MSW_FIRST_CAPTURE != 0
        };
        let get = if first {
            tr.to_tsw(ring.biu, gram.read_u32(ring.mstp())?)?
        } else {
            ring.start
        };

        shared.write_u32(
            header_at + DataQueueHeader::info_offset(),
            DataQueueHeader::pack_info(header.id(), header.biu(), first as u8),
        )?;
        gram.write_u32(ring.bm_get(), get)?;
        trace!(
            "BIU {}: monitor triggered, data from {get:#010X} to {put:#010X}",
            ring.biu
        );
        Ok((put, get))
    }

    /// Move new monitor data of `ring` into queue `id`.
    ///
    /// A queue with nothing to take is not an error.  Returns what was made
    /// visible to the host.
    pub fn drain<G: MemIo, S: MemIo>(
        &self,
        id: u32,
        ring: &MonitorRing,
        gram: &mut G,
        shared: &mut S,
        layout: &SharedLayout,
        tr: &AddressTranslator,
    ) -> Result<Drained> {
        if !self.is_recording_possible(id, ring, gram, shared, layout, tr.order())? {
            return Ok(Drained::default());
        }
        let Some(slot) = self.slot(id, layout)? else {
            return Ok(Drained::default());
        };

        let (bm_put, mut bm_get) = self.monitor_offsets(ring, slot.header, gram, shared, tr)?;
        let available = available_bytes(ring.size, bm_put, bm_get);
        let to_end = bytes_to_end(ring.size, ring.start, bm_get);
        let chunks = if available > to_end {
            [to_end, available - to_end]
        } else {
            [available, 0]
        };
        if available > 0 {
            trace!(
                "Data queue {id}: monitor put {bm_put:#010X} get {bm_get:#010X}, {available:#X} bytes"
            );
        }

        let start_put = shared.read_u32(slot.header + DataQueueHeader::put_offset())?;
        let mut put = start_put;
        let mut overflow = false;

        for chunk in chunks {
            if chunk == 0 {
                continue;
            }
            let copied = copy_chunk(gram, shared, &slot, bm_get, chunk, &mut put)?;
            bm_get = increment_offset(bm_get, copied, ring.start, ring.size)?;
            gram.write_u32(ring.bm_get(), bm_get)?;
            if copied != chunk {
                overflow = true;
                break;
            }
        }

        if !overflow {
            let msw = tr.order().apply(gram.read_u32(ring.msw())?);
            overflow = msw & ring.overflow_bit() != 0;
        }

        // Publish everything copied, in one write
        shared.write_u32(slot.header + DataQueueHeader::put_offset(), put)?;
        let bytes = available_bytes(slot.size, put, start_put);

        if overflow {
            let status = shared.read_u32(slot.header + DataQueueHeader::status_offset())?;
            shared.write_u32(
                slot.header + DataQueueHeader::status_offset(),
                status | STATUS_OVERFLOW,
            )?;
            let header = DataQueueHeader::read(shared, slot.header)?;
            error!("Data queue {id} overflow");
            error!(
                "status {:#010X} put {:#010X} get {:#010X} data_start {:#010X} data_size {:#010X}",
                header.status, header.put, header.get, header.data_start, header.data_size
            );
            error!(
                "monitor put {bm_put:#010X} get {bm_get:#010X} size {:#010X} chunks {:#010X} {:#010X}",
                ring.size, chunks[0], chunks[1]
            );
        }

        Ok(Drained { bytes, overflow })
    }

    /// Append one generic acquisition packet to the generic acquisition
    /// queue.  A queue that is not started is left alone.  Returns whether
    /// the packet was queued.
    pub fn enqueue_generic<M: MemIo>(
        &self,
        packet: &[u32; GENERIC_ACQ_WORDS],
        shared: &mut M,
        layout: &SharedLayout,
    ) -> Result<bool> {
        let id = DATA_QUEUE_ID_GENERIC_ACQ as u32;
        let Some(slot) = self.slot(id, layout)? else {
            return Ok(false);
        };
        let header = DataQueueHeader::read(shared, slot.header)?;
        if header.status & STATUS_ERROR != 0 || header.status & STATUS_START == 0 {
            return Ok(false);
        }

        let size = GENERIC_ACQ_WORDS as u32 * ENTRY_SIZE;
        if free_bytes(ENTRY_SIZE, header.data_size, header.put, header.get) < size {
            shared.write_u32(
                slot.header + DataQueueHeader::status_offset(),
                header.status | STATUS_OVERFLOW,
            )?;
            error!("Data queue {id} overflow");
            error!(
                "status {:#010X} put {:#010X} get {:#010X} data_start {:#010X} data_size {:#010X}",
                header.status, header.put, header.get, header.data_start, header.data_size
            );
            return Ok(false);
        }

        let mut put = header.put;
        for word in packet {
            shared.write_u32(put, *word)?;
            put = increment_offset(put, ENTRY_SIZE, header.data_start, header.data_size)?;
        }
        shared.write_u32(slot.header + DataQueueHeader::put_offset(), put)?;
        Ok(true)
    }
}

/// Build a generic acquisition packet carrying one value
pub fn generic_acq_packet(source: u8, tt_hi: u32, tt_lo: u32, value: u32) -> [u32; GENERIC_ACQ_WORDS] {
    let size = GENERIC_ACQ_WORDS as u32 * ENTRY_SIZE;
    [(source as u32) << 24 | 1 << 16 | size, tt_hi, tt_lo, value]
}

// Copy up to `len` bytes of monitor data from `src` into the queue at `put`,
// limited by the queue's free space and rounded down to whole entries.
// Advances the local `put` only.  Returns the bytes copied.
fn copy_chunk<G: MemIo, S: MemIo>(
    gram: &G,
    shared: &mut S,
    slot: &DataQueueSlot,
    src: u32,
    len: u32,
    put: &mut u32,
) -> Result<u32> {
    let get = shared.read_u32(slot.header + DataQueueHeader::get_offset())?;
    let free = free_bytes(ENTRY_SIZE, slot.size, *put, get);
    let copy = len.min(free) & !(ENTRY_SIZE - 1);
    if copy == 0 {
        return Ok(0);
    }

    let first = copy.min(bytes_to_end(slot.size, slot.data, *put));
    let mut words = vec![0u32; (copy / 4) as usize];
    gram.read_bulk(src, &mut words)?;

    let (head, tail) = words.split_at((first / 4) as usize);
    shared.write_bulk(*put, head)?;
    *put = increment_offset(*put, first, slot.data, slot.size)?;
    if !tail.is_empty() {
        shared.write_bulk(*put, tail)?;
        *put = increment_offset(*put, copy - first, slot.data, slot.size)?;
    }
    trace!("Copied {copy:#X} bytes from {src:#010X}, queue put now {:#010X}", *put);
    Ok(copy)
}
