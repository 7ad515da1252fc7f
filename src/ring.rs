//! Ring buffer arithmetic shared by bus monitor recording and data queues.
//!
//! All functions are pure.  Offsets are absolute byte offsets into the memory
//! holding the ring, and the ring occupies `[start, start + size)`.  One entry is
//! always kept free by the producer so that `put == get` means empty.

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

use crate::{Error, Result};

/// Bytes the consumer can read.
pub const fn available_bytes(size: u32, put: u32, get: u32) -> u32 {
    if put >= get {
        put - get
    } else {
        put.wrapping_add(size).wrapping_sub(get)
    }
}

/// Bytes the producer may write, keeping one `entry_size` entry free.
pub const fn free_bytes(entry_size: u32, size: u32, put: u32, get: u32) -> u32 {
    let free = size.saturating_sub(available_bytes(size, put, get));
    free.saturating_sub(entry_size)
}

/// Contiguous bytes from `offset` to the end of the ring.
pub const fn bytes_to_end(size: u32, start: u32, offset: u32) -> u32 {
    start.wrapping_add(size).wrapping_sub(offset)
}

/// Advance `offset` by `increment`, wrapping once at the end of the ring.
///
/// `increment` must not exceed `size`; a larger increment cannot be represented
/// by a single wrap and is rejected.
pub fn increment_offset(offset: u32, increment: u32, start: u32, size: u32) -> Result<u32> {
    if increment > size {
        return Err(Error::ParameterOutOfRange);
    }

    let mut next = offset.wrapping_add(increment);
    if next >= start.wrapping_add(size) {
        next = next.wrapping_sub(size);
    }
    Ok(next)
}
