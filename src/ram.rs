//! RAM arenas shared between the TSW, the BIU hardware and the host.
//!
//! Hardware structures are never accessed through raw pointers.  Instead every
//! access goes through [`MemIo`] with a byte offset, and is bounds and alignment
//! checked.  [`GlobalRam`] is the in-memory implementation used for both the
//! global RAM (BIU side) and the shared RAM (host side) of a device.

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

use alloc::vec;
use alloc::vec::Vec;
#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use crate::{Error, Result};

/// Trait for accessing a memory region by byte offset.
///
/// Word operations are atomic with respect to the other side of the region,
/// bulk operations are not.
pub trait MemIo {
    /// Atomic read u32 operation
    fn read_u32(&self, offset: u32) -> Result<u32>;

    /// Atomic write u32 operation
    fn write_u32(&mut self, offset: u32, value: u32) -> Result<()>;

    /// Bulk read access, no need for atomicity
    fn read_bulk(&self, offset: u32, buf: &mut [u32]) -> Result<()> {
        for (ii, word) in buf.iter_mut().enumerate() {
            *word = self.read_u32(offset + (ii as u32 * 4))?;
        }
        Ok(())
    }

    /// Bulk write access, no need for atomicity
    fn write_bulk(&mut self, offset: u32, data: &[u32]) -> Result<()> {
        for (ii, word) in data.iter().enumerate() {
            self.write_u32(offset + (ii as u32 * 4), *word)?;
        }
        Ok(())
    }
}

/// Word addressed RAM arena.
#[derive(Debug, Clone)]
pub struct GlobalRam {
    words: Vec<u32>,
}

impl GlobalRam {
    /// Create a zeroed arena of `size` bytes.  `size` must be a multiple of 4.
    pub fn new(size: u32) -> Result<Self> {
        if size == 0 || size % 4 != 0 {
            return Err(Error::InvalidSize);
        }
        debug!("Created RAM arena of {size:#010X} bytes");
        Ok(Self {
            words: vec![0; (size / 4) as usize],
        })
    }

    /// Size of the arena in bytes
    pub fn size(&self) -> u32 {
        (self.words.len() * 4) as u32
    }

    /// Whether `[offset, offset + len)` lies inside the arena.
    pub fn contains(&self, offset: u32, len: u32) -> bool {
        match offset.checked_add(len) {
            Some(end) => end <= self.size(),
            None => false,
        }
    }

    /// Read a 16-bit buffer word.  Half-words are little-endian within their
    /// 32-bit word.
    pub fn read_u16(&self, offset: u32) -> Result<u16> {
        check_half_aligned(offset)?;
        let word = self.read_u32(offset & !3)?;
        Ok((word >> ((offset & 2) * 8)) as u16)
    }

    /// Write a 16-bit buffer word.
    pub fn write_u16(&mut self, offset: u32, value: u16) -> Result<()> {
        check_half_aligned(offset)?;
        let shift = (offset & 2) * 8;
        let index = self.index(offset & !3, 4)?;
        let word = &mut self.words[index];
        *word = (*word & !(0xFFFF << shift)) | ((value as u32) << shift);
        Ok(())
    }

    /// Fill `len` bytes from `offset` with `value`.
    pub fn fill(&mut self, offset: u32, len: u32, value: u32) -> Result<()> {
        check_aligned(offset)?;
        check_aligned(len)?;
        let start = self.index(offset, len)?;
        let end = start + (len / 4) as usize;
        self.words[start..end].fill(value);
        Ok(())
    }

    /// Copy `len` bytes inside the arena.  Regions may overlap.
    pub fn copy_within(&mut self, src: u32, dst: u32, len: u32) -> Result<()> {
        check_aligned(src)?;
        check_aligned(dst)?;
        check_aligned(len)?;
        let src_ix = self.index(src, len)?;
        let dst_ix = self.index(dst, len)?;
        let words = (len / 4) as usize;
        self.words.copy_within(src_ix..src_ix + words, dst_ix);
        Ok(())
    }

    fn index(&self, offset: u32, len: u32) -> Result<usize> {
        if !self.contains(offset, len) {
            return Err(Error::AddressOutOfRange);
        }
        Ok((offset / 4) as usize)
    }
}

impl MemIo for GlobalRam {
    fn read_u32(&self, offset: u32) -> Result<u32> {
        check_aligned(offset)?;
        let index = self.index(offset, 4)?;
        Ok(self.words[index])
    }

    fn write_u32(&mut self, offset: u32, value: u32) -> Result<()> {
        check_aligned(offset)?;
        let index = self.index(offset, 4)?;
        self.words[index] = value;
        Ok(())
    }

    fn read_bulk(&self, offset: u32, buf: &mut [u32]) -> Result<()> {
        check_aligned(offset)?;
        let start = self.index(offset, buf.len() as u32 * 4)?;
        buf.copy_from_slice(&self.words[start..start + buf.len()]);
        Ok(())
    }

    fn write_bulk(&mut self, offset: u32, data: &[u32]) -> Result<()> {
        check_aligned(offset)?;
        let start = self.index(offset, data.len() as u32 * 4)?;
        self.words[start..start + data.len()].copy_from_slice(data);
        Ok(())
    }
}

fn check_aligned(offset: u32) -> Result<()> {
    if offset % 4 != 0 {
        Err(Error::NotAligned)
    } else {
        Ok(())
    }
}

fn check_half_aligned(offset: u32) -> Result<()> {
    if offset % 2 != 0 {
        Err(Error::NotAligned)
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn word_access_is_bounds_checked() {
        let mut ram = GlobalRam::new(0x40).unwrap();
        ram.write_u32(0x3C, 0x1234_5678).unwrap();
        assert_eq!(ram.read_u32(0x3C), Ok(0x1234_5678));
        assert_eq!(ram.read_u32(0x40), Err(Error::AddressOutOfRange));
        assert_eq!(ram.write_u32(0x41, 0), Err(Error::NotAligned));
        assert_eq!(ram.read_u32(u32::MAX - 3), Err(Error::AddressOutOfRange));
    }

    #[test]
    fn half_words_share_a_word() {
        let mut ram = GlobalRam::new(0x10).unwrap();
        ram.write_u16(0x4, 0xBEEF).unwrap();
        ram.write_u16(0x6, 0xDEAD).unwrap();
        assert_eq!(ram.read_u32(0x4), Ok(0xDEAD_BEEF));
        assert_eq!(ram.read_u16(0x6), Ok(0xDEAD));
        assert_eq!(ram.read_u16(0x5), Err(Error::NotAligned));
    }

    #[test]
    fn bulk_fill_and_copy() {
        let mut ram = GlobalRam::new(0x40).unwrap();
        ram.write_bulk(0x0, &[1, 2, 3, 4]).unwrap();
        ram.copy_within(0x0, 0x20, 0x10).unwrap();
        let mut buf = [0u32; 4];
        ram.read_bulk(0x20, &mut buf).unwrap();
        assert_eq!(buf, [1, 2, 3, 4]);

        ram.fill(0x20, 0x8, 0xFFFF_FFFF).unwrap();
        ram.read_bulk(0x20, &mut buf).unwrap();
        assert_eq!(buf, [0xFFFF_FFFF, 0xFFFF_FFFF, 3, 4]);

        assert_eq!(ram.write_bulk(0x38, &[0; 4]), Err(Error::AddressOutOfRange));
    }

    #[test]
    fn size_must_be_word_multiple() {
        assert_eq!(GlobalRam::new(0x41).unwrap_err(), Error::InvalidSize);
        assert_eq!(GlobalRam::new(0).unwrap_err(), Error::InvalidSize);
    }
}
