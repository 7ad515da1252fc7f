//! Global RAM address translation.
//!
//! Three address spaces are in use:
//! - GRAM pointers: values the BIU hardware stores in global RAM.  They are
//!   relative to the start offset of the BIU's memory window and are stored in
//!   the board's byte order.
//! - TSW pointers: byte offsets into the global RAM arena.  All TSW code works
//!   with these.
//! - Host addresses: TSW pointers plus the host-visible base of global RAM and
//!   the BIU start offset.
//!
//! [`AddressTranslator::to_rel`] and [`AddressTranslator::to_abs`] are guarded
//! against being applied twice, so converting an already converted value is
//! harmless.

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

use crate::{Error, Result};

/// Maximum number of logical BIUs on a board
pub const MAX_BIU: usize = 8;

/// Hardware pointer fields only use the low 26 bits
pub const GRAM_PTR_MASK: u32 = 0x03FF_FFFF;

/// Byte order of words the hardware reads and writes, relative to the TSW.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum ByteOrder {
    /// Hardware and TSW share byte order
    #[default]
    Native,
    /// Hardware words are byte swapped
    Swapped,
}

impl ByteOrder {
    /// Convert a word between TSW and hardware order.  Self-inverse.
    pub const fn apply(self, value: u32) -> u32 {
        match self {
            ByteOrder::Native => value,
            ByteOrder::Swapped => value.swap_bytes(),
        }
    }
}

/// Converts between GRAM pointers, TSW pointers and host addresses.
#[derive(Debug, Clone)]
pub struct AddressTranslator {
    ram_base: u32,
    start_offsets: [u32; MAX_BIU],
    order: ByteOrder,
}

impl AddressTranslator {
    /// Create a translator.
    ///
    /// Arguments:
    /// - `ram_base` - Host address of the first byte of global RAM
    /// - `start_offsets` - Start of each BIU's memory window within global RAM
    /// - `order` - Byte order of hardware words
    pub fn new(ram_base: u32, start_offsets: [u32; MAX_BIU], order: ByteOrder) -> Self {
        Self {
            ram_base,
            start_offsets,
            order,
        }
    }

    pub fn order(&self) -> ByteOrder {
        self.order
    }

    /// Start offset of a BIU's memory window
    pub fn start_offset(&self, biu: usize) -> Result<u32> {
        self.start_offsets
            .get(biu)
            .copied()
            .ok_or(Error::BiuOutOfRange)
    }

    /// Convert a pointer read from global RAM into a TSW pointer.
    pub fn to_tsw(&self, biu: usize, raw: u32) -> Result<u32> {
        let so = self.start_offset(biu)?;
        Ok(self.order.apply(raw).wrapping_add(so))
    }

    /// Convert a pointer read from global RAM, keeping only the hardware
    /// pointer bits.
    pub fn to_tsw_masked(&self, biu: usize, raw: u32) -> Result<u32> {
        let so = self.start_offset(biu)?;
        Ok((self.order.apply(raw) & GRAM_PTR_MASK).wrapping_add(so))
    }

    /// Convert a TSW pointer into the value to store in global RAM.
    pub fn to_gram(&self, biu: usize, tsw: u32) -> Result<u32> {
        let so = self.start_offset(biu)?;
        Ok(self.order.apply(tsw.wrapping_sub(so)))
    }

    /// Convert a TSW pointer into a BIU-relative offset without byte order
    /// conversion.
    pub fn to_biu_rel(&self, biu: usize, tsw: u32) -> Result<u32> {
        let so = self.start_offset(biu)?;
        Ok(tsw.wrapping_sub(so))
    }

    /// Convert a host address into a BIU-relative offset.  Values already
    /// below the BIU's host window are returned unchanged.
    pub fn to_rel(&self, biu: usize, host: u32) -> Result<u32> {
        let window = self.window(biu)?;
        if host >= window {
            Ok(host - window)
        } else {
            Ok(host)
        }
    }

    /// Convert a BIU-relative offset into a host address.  Values already
    /// inside the BIU's host window are returned unchanged.
    pub fn to_abs(&self, biu: usize, rel: u32) -> Result<u32> {
        let window = self.window(biu)?;
        if rel >= window {
            Ok(rel)
        } else {
            Ok(rel.wrapping_add(window))
        }
    }

    fn window(&self, biu: usize) -> Result<u32> {
        Ok(self.ram_base.wrapping_add(self.start_offset(biu)?))
    }
}
