//! Async byte level access to a target's shared RAM.
//!
//! A host reaches the board's shared RAM through whatever link it has: a PCI
//! BAR mapping, a USB bulk transfer, a debug probe.  Implementing these two
//! traits is enough to drive the MIL_COM mailbox through
//! [`crate::com::futures::ReaderWriterIo`].
//!
//! # Address Space
//!
//! Addresses are offsets into the shared RAM window, as held in
//! [`crate::device::layout::SharedLayout`].  The implementation is
//! responsible for translating these to whatever the link needs.
//!
//! Shared RAM is little-endian; the traits move raw bytes.

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

/// Reader trait.
pub trait Reader {
    /// The error type returned by read operations.
    ///
    /// This allows implementations to use their own error types
    /// (e.g., `std::io::Error` for a file backed image).
    type Error: core::fmt::Debug;

    /// Read bytes from shared RAM.
    ///
    /// # Arguments
    ///
    /// * `addr` - Offset into shared RAM
    /// * `buf` - Buffer to fill with the read data
    ///
    /// # Errors
    ///
    /// Returns an error if the range is outside the window or the link
    /// fails.
    ///
    /// Mailbox control words are read 4 bytes at a time, frames in one
    /// bulk read.  A 4-byte read must not tear.
    fn read(
        &mut self,
        addr: u32,
        buf: &mut [u8],
    ) -> impl core::future::Future<Output = Result<(), Self::Error>> + Send;
}

/// Writer trait.
pub trait Writer {
    /// The error type returned by write operations.
    type Error: core::fmt::Debug;

    /// Write bytes to shared RAM.
    ///
    /// # Errors
    ///
    /// Returns an error if the range is outside the window or the link
    /// fails.  A 4-byte write must land in one access, as the target may
    /// be polling the word.
    fn write(
        &mut self,
        addr: u32,
        data: &[u8],
    ) -> impl core::future::Future<Output = Result<(), Self::Error>> + Send;
}
