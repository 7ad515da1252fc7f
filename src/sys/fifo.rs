//! FIFO queues of transmit data.
//!
//! The host fills a FIFO with 32-word buffers, half the FIFO at a time.  Each
//! time a BC transfer or an RT subaddress assigned to the FIFO completes, the
//! next buffer is copied into the transfer's data buffer.  Passing either
//! half-way mark records how many words the host may now refill; passing one
//! while the previous count is still unread records an overrun (0xFFFF).

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

use alloc::collections::BTreeMap;
use alloc::vec::Vec;
#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use crate::ram::GlobalRam;
use crate::{Error, Result};

/// FIFOs per BIU
pub const MAX_FIFOS: u32 = 32;
/// Buffers per FIFO
pub const MAX_FIFO_BUFFERS: u32 = 128;
/// Bytes per FIFO buffer, one full 1553 message
pub const FIFO_BUF_SIZE: u32 = 64;

pub const FIFO_DISABLE: u32 = 0;
pub const FIFO_ENABLE: u32 = 1;

/// Status value meaning the host missed a refill
pub const FIFO_OVERRUN: u16 = 0xFFFF;

const NO_RT: u8 = 0xFF;

#[derive(Debug, Clone)]
struct Fifo {
    enabled: bool,
    /// Assigned BC transfer, 0 if none
    xid: u16,
    rt: u8,
    sa: u8,
    start: u32,
    half: u32,
    current: u32,
    /// Next host write goes to the second half
    second_half: bool,
    buf_cnt: u16,
}

impl Fifo {
    fn new(start: u32, half: u32) -> Self {
        Self {
            enabled: false,
            xid: 0,
            rt: NO_RT,
            sa: NO_RT,
            start,
            half,
            current: start,
            second_half: false,
            buf_cnt: 0,
        }
    }

    fn release(&mut self) {
        self.enabled = false;
        self.xid = 0;
        self.rt = NO_RT;
        self.sa = NO_RT;
        self.current = self.start;
        self.second_half = false;
        self.buf_cnt = 0;
    }
}

/// FIFO queues of one BIU
#[derive(Debug, Clone, Default)]
pub struct FifoTable {
    buffers: u32,
    fifos: Vec<Fifo>,
    /// FIFO assigned to each RT subaddress
    rt_fifos: BTreeMap<(u8, u8), u8>,
}

impl FifoTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self) -> u32 {
        self.fifos.len() as u32
    }

    fn fifo(&self, id: u32) -> Result<&Fifo> {
        if id == 0 {
            return Err(Error::InvalidId);
        }
        self.fifos.get(id as usize - 1).ok_or(Error::InvalidId)
    }

    fn fifo_mut(&mut self, id: u32) -> Result<&mut Fifo> {
        if id == 0 {
            return Err(Error::InvalidId);
        }
        self.fifos.get_mut(id as usize - 1).ok_or(Error::InvalidId)
    }

    /// Handle FIFO_INI: lay out `count` FIFOs of `buffers` buffers each from
    /// `base`.  Returns the BC transfers which lose their FIFO.
    pub fn ini(&mut self, base: u32, area_size: u32, count: u32, buffers: u32) -> Result<Vec<u16>> {
        if count == 0 || count > MAX_FIFOS || !(2..=MAX_FIFO_BUFFERS).contains(&buffers) {
            return Err(Error::ParameterOutOfRange);
        }
        let fifo_size = buffers * FIFO_BUF_SIZE;
        if count * fifo_size > area_size {
            return Err(Error::NoSpaceLeft);
        }

        let released = self.fifos.iter().filter(|f| f.xid != 0).map(|f| f.xid).collect();
        let half = buffers.div_ceil(2) * FIFO_BUF_SIZE;
        self.buffers = buffers;
        self.fifos = (0..count)
            .map(|i| {
                let start = base + i * fifo_size;
                Fifo::new(start, start + half)
            })
            .collect();
        self.rt_fifos.clear();
        debug!("FIFOs initialised: {count} x {buffers} buffers at {base:#010X}");
        Ok(released)
    }

    /// Largest FIFO_WRITE in words: half the FIFO
    pub fn half_words(&self) -> u32 {
        self.buffers.div_ceil(2) * FIFO_BUF_SIZE / 2
    }

    /// Handle FIFO_WRITE: write `data` to the half of FIFO `id` the host
    /// fills next
    pub fn write(&mut self, id: u32, data: &[u16], shared: &mut GlobalRam) -> Result<()> {
        let half_words = self.half_words();
        let fifo = self.fifo_mut(id)?;
        if data.len() as u32 > half_words {
            return Err(Error::InvalidSize);
        }
        let dest = if fifo.second_half { fifo.half } else { fifo.start };
        fifo.second_half = !fifo.second_half;
        for (k, word) in data.iter().enumerate() {
            shared.write_u16(dest + 2 * k as u32, *word)?;
        }
        Ok(())
    }

    /// Handle FIFO_STATUS: return and clear the refill count
    pub fn status(&mut self, id: u32) -> Result<u16> {
        let fifo = self.fifo_mut(id)?;
        let status = fifo.buf_cnt;
        fifo.buf_cnt = 0;
        Ok(status)
    }

    /// Handle FIFO_RT_ASSIGN
    pub fn rt_assign(&mut self, con: u32, id: u32, rt: u32, sa: u32) -> Result<()> {
        if rt >= 32 || sa >= 32 || id == 0 || id > self.count() {
            return Err(Error::InvalidRt);
        }
        if con != FIFO_ENABLE && con != FIFO_DISABLE {
            return Err(Error::InvalidRt);
        }
        let (rt, sa) = (rt as u8, sa as u8);
        let ix = id as usize - 1;

        if con == FIFO_ENABLE {
            if self.fifos[ix].enabled {
                return Err(Error::Api);
            }
            for fifo in self.fifos.iter_mut() {
                if fifo.rt == rt && fifo.sa == sa {
                    fifo.release();
                }
            }
            let fifo = &mut self.fifos[ix];
            fifo.release();
            fifo.enabled = true;
            fifo.rt = rt;
            fifo.sa = sa;
            self.rt_fifos.insert((rt, sa), id as u8);
            debug!("FIFO {id} assigned to RT{rt} SA{sa}");
        } else {
            let fifo = &mut self.fifos[ix];
            if fifo.enabled {
                if fifo.rt != rt || fifo.sa != sa {
                    return Err(Error::Api);
                }
                fifo.enabled = false;
                fifo.rt = NO_RT;
                fifo.sa = NO_RT;
                fifo.current = fifo.start;
                self.rt_fifos.remove(&(rt, sa));
            }
        }
        Ok(())
    }

    /// Handle FIFO_BC_ASSIGN.  Returns the value for the FIFO field of the
    /// transfer descriptor, if it changes.
    pub fn bc_assign(&mut self, con: u32, id: u32, xid: u32, xfers: u32) -> Result<Option<u16>> {
        if xid == 0 || xid >= xfers || id == 0 || id > self.count() {
            return Err(Error::InvalidId);
        }
        if con != FIFO_ENABLE && con != FIFO_DISABLE {
            return Err(Error::InvalidMode);
        }
        let xid = xid as u16;
        let ix = id as usize - 1;

        if con == FIFO_ENABLE {
            if self.fifos[ix].enabled {
                return Err(Error::Api);
            }
            for fifo in self.fifos.iter_mut() {
                if fifo.xid == xid {
                    fifo.release();
                }
            }
            let fifo = &mut self.fifos[ix];
            fifo.release();
            fifo.enabled = true;
            fifo.xid = xid;
            debug!("FIFO {id} assigned to transfer {xid}");
            return Ok(Some(id as u16));
        }

        let fifo = &mut self.fifos[ix];
        if !fifo.enabled {
            return Ok(None);
        }
        if fifo.xid != xid {
            return Err(Error::Api);
        }
        fifo.release();
        Ok(Some(0))
    }

    /// FIFO assigned to an RT subaddress
    pub fn rt_fifo(&self, rt: u8, sa: u8) -> Option<u8> {
        let id = *self.rt_fifos.get(&(rt, sa))?;
        match self.fifo(id as u32) {
            Ok(fifo) if fifo.rt != NO_RT => Some(id),
            _ => None,
        }
    }

    /// Whether FIFO `id` is assigned to a BC transfer
    pub fn is_bc_assigned(&self, id: u32) -> bool {
        matches!(self.fifo(id), Ok(fifo) if fifo.xid != 0)
    }

    /// Copy the next buffer of FIFO `id` into the data buffer at `dbp` and
    /// advance, updating the refill count at the half-way marks
    pub fn copy_next(&mut self, id: u32, shared: &GlobalRam, gram: &mut GlobalRam, dbp: u32) -> Result<()> {
        let buffers = self.buffers;
        let fifo = self.fifo_mut(id)?;

        for k in 0..FIFO_BUF_SIZE / 2 {
            let word = shared.read_u16(fifo.current + 2 * k)?;
            gram.write_u16(dbp + 2 * k, word)?;
        }

        let end = fifo.start + buffers * FIFO_BUF_SIZE;
        let next = fifo.current + FIFO_BUF_SIZE;
        let mut buf_cnt = 0;
        if next >= end {
            fifo.current = fifo.start;
            buf_cnt = ((end - fifo.half) / 2) as u16;
        } else {
            if next == fifo.half {
                buf_cnt = ((fifo.half - fifo.start) / 2) as u16;
            }
            fifo.current = next;
        }

        if buf_cnt != 0 {
            fifo.buf_cnt = if fifo.buf_cnt != 0 {
                trace!("FIFO {id} overrun");
                FIFO_OVERRUN
            } else {
                buf_cnt
            };
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: u32 = 0x1000;
    const DBP: u32 = 0x200;

    fn setup(count: u32, buffers: u32) -> (FifoTable, GlobalRam, GlobalRam) {
        let mut fifos = FifoTable::new();
        fifos.ini(BASE, 0x4000, count, buffers).unwrap();
        (
            fifos,
            GlobalRam::new(0x8000).unwrap(),
            GlobalRam::new(0x1000).unwrap(),
        )
    }

    #[test]
    fn ini_checks_limits() {
        let mut fifos = FifoTable::new();
        assert_eq!(fifos.ini(BASE, 0x4000, 0, 4), Err(Error::ParameterOutOfRange));
        assert_eq!(fifos.ini(BASE, 0x4000, 33, 4), Err(Error::ParameterOutOfRange));
        assert_eq!(fifos.ini(BASE, 0x4000, 1, 1), Err(Error::ParameterOutOfRange));
        assert_eq!(fifos.ini(BASE, 0x4000, 1, 129), Err(Error::ParameterOutOfRange));
        assert_eq!(fifos.ini(BASE, 0x100, 2, 4), Err(Error::NoSpaceLeft));
        assert!(fifos.ini(BASE, 0x4000, 2, 4).unwrap().is_empty());
        assert_eq!(fifos.count(), 2);
        assert_eq!(fifos.half_words(), 64);
    }

    #[test]
    fn write_alternates_halves() {
        let (mut fifos, mut shared, _) = setup(1, 4);
        fifos.write(1, &[0x1111, 0x2222], &mut shared).unwrap();
        fifos.write(1, &[0x3333], &mut shared).unwrap();
        assert_eq!(shared.read_u16(BASE).unwrap(), 0x1111);
        assert_eq!(shared.read_u16(BASE + 2).unwrap(), 0x2222);
        assert_eq!(shared.read_u16(BASE + 2 * FIFO_BUF_SIZE).unwrap(), 0x3333);

        assert_eq!(fifos.write(2, &[0], &mut shared), Err(Error::InvalidId));
        assert_eq!(fifos.write(0, &[0], &mut shared), Err(Error::InvalidId));
        let too_big = [0u16; 65];
        assert_eq!(fifos.write(1, &too_big, &mut shared), Err(Error::InvalidSize));
    }

    #[test]
    fn copy_counts_half_buffers_and_overrun() {
        let (mut fifos, mut shared, mut gram) = setup(1, 4);
        for buf in 0..4u32 {
            shared
                .write_u16(BASE + buf * FIFO_BUF_SIZE, 0xA0 + buf as u16)
                .unwrap();
        }

        fifos.copy_next(1, &shared, &mut gram, DBP).unwrap();
        assert_eq!(gram.read_u16(DBP).unwrap(), 0xA0);
        assert_eq!(fifos.status(1).unwrap(), 0);

        // Second buffer reaches the half-way mark
        fifos.copy_next(1, &shared, &mut gram, DBP).unwrap();
        assert_eq!(gram.read_u16(DBP).unwrap(), 0xA1);
        assert_eq!(fifos.status(1).unwrap(), 64);
        assert_eq!(fifos.status(1).unwrap(), 0);

        // Wrap without reading the status in between, then again
        fifos.copy_next(1, &shared, &mut gram, DBP).unwrap();
        fifos.copy_next(1, &shared, &mut gram, DBP).unwrap();
        fifos.copy_next(1, &shared, &mut gram, DBP).unwrap();
        assert_eq!(gram.read_u16(DBP).unwrap(), 0xA0);
        fifos.copy_next(1, &shared, &mut gram, DBP).unwrap();
        assert_eq!(fifos.status(1).unwrap(), FIFO_OVERRUN);
    }

    #[test]
    fn rt_assignment_moves_between_fifos() {
        let (mut fifos, _, _) = setup(2, 4);
        assert_eq!(fifos.rt_assign(FIFO_ENABLE, 1, 32, 1), Err(Error::InvalidRt));
        assert_eq!(fifos.rt_assign(FIFO_ENABLE, 3, 1, 1), Err(Error::InvalidRt));

        fifos.rt_assign(FIFO_ENABLE, 1, 5, 2).unwrap();
        assert_eq!(fifos.rt_fifo(5, 2), Some(1));
        assert_eq!(fifos.rt_assign(FIFO_ENABLE, 1, 6, 2), Err(Error::Api));

        fifos.rt_assign(FIFO_ENABLE, 2, 5, 2).unwrap();
        assert_eq!(fifos.rt_fifo(5, 2), Some(2));

        assert_eq!(fifos.rt_assign(FIFO_DISABLE, 2, 5, 3), Err(Error::Api));
        fifos.rt_assign(FIFO_DISABLE, 2, 5, 2).unwrap();
        assert_eq!(fifos.rt_fifo(5, 2), None);
    }

    #[test]
    fn bc_assignment_reports_descriptor_value() {
        let (mut fifos, _, _) = setup(2, 4);
        assert_eq!(fifos.bc_assign(FIFO_ENABLE, 1, 0, 16), Err(Error::InvalidId));
        assert_eq!(fifos.bc_assign(FIFO_ENABLE, 1, 16, 16), Err(Error::InvalidId));

        assert_eq!(fifos.bc_assign(FIFO_ENABLE, 1, 3, 16), Ok(Some(1)));
        assert!(fifos.is_bc_assigned(1));
        assert_eq!(fifos.bc_assign(FIFO_ENABLE, 1, 4, 16), Err(Error::Api));
        assert_eq!(fifos.bc_assign(FIFO_DISABLE, 1, 4, 16), Err(Error::Api));
        assert_eq!(fifos.bc_assign(FIFO_DISABLE, 2, 3, 16), Ok(None));
        assert_eq!(fifos.bc_assign(FIFO_DISABLE, 1, 3, 16), Ok(Some(0)));
        assert!(!fifos.is_bc_assigned(1));

        fifos.bc_assign(FIFO_ENABLE, 2, 7, 16).unwrap();
        assert_eq!(fifos.ini(BASE, 0x4000, 2, 4).unwrap(), [7]);
    }
}
