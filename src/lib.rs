//! Target software (TSW) core for MIL-STD-1553 / STANAG-3910 bus interface boards.
//!
//! This crate implements the part of a board support package that runs next to the
//! bus interface units (BIUs): it accepts host commands over the MIL_COM protocol,
//! processes the interrupt log-lists the BIUs write into global RAM, and moves bus
//! monitor data into host-visible data queues.
//!
//! `no_std`, requires `alloc`.  The device context, the command table and the RAM
//! arenas are heap allocated.
//!
//! ## Architecture
//!
//! A [`device::Device`] is one board.  It owns:
//! - the global RAM arena ([`ram::GlobalRam`]) shared with the BIU hardware, holding
//!   per-BIU control blocks, interrupt log-lists, descriptors and data buffers
//! - the shared RAM arena, holding the interrupt event log and the data queues the
//!   host reads
//! - an [`addr::AddressTranslator`] converting between the pointers the hardware
//!   stores and offsets into the arena
//! - the per-BIU software state for the BC, RT, monitor and replay subsystems
//! - a [`fw::Firmware`] executor used to start and stop the BIUs
//!
//! There is no global state and no locking.  The owner of a `Device` serializes
//! command dispatch against interrupt processing, typically by running both from a
//! single loop:
//!
//! ```rust,ignore
//! loop {
//!     device.serve_mailbox()?;
//!     device.scan_interrupts();
//!     device.drain_data_queues();
//! }
//! ```
//!
//! ## MIL_COM
//!
//! Every command is a 32-byte [`com::MilComHeader`] followed by command specific
//! 32-bit words; every acknowledge is a 32-byte [`com::MilComAck`] followed by the
//! response words.  [`com::CommandTable`] maps command codes to handlers together
//! with the exact input and acknowledge sizes, and [`device::Device::dispatch`]
//! checks those sizes before any handler runs.
//!
//! ## Modules
//!
//! - [`addr`] - Global RAM address translation
//! - [`board`] - Board type decoding, stream topology and device type detection
//! - [`client`] - Async MIL_COM client, typically used on the host
//! - [`com`] - MIL_COM framing, command table, dispatcher and mailbox
//! - [`config`] - Device configuration and capabilities
//! - [`device`] - The device context and its memory layout
//! - [`dqueue`] - Data queues and the bus monitor drain engine
//! - [`fw`] - Firmware command executor
//! - [`io`] - Async I/O traits used by the host to reach target memory
//! - [`ir`] - Interrupt log-list scanner and per-source handlers
//! - [`ram`] - RAM arenas with bounds checked access
//! - [`ring`] - Ring buffer arithmetic
//! - [`sys`] - System commands: init, reset, system tags, tracks, FIFOs
//!
//! ## Features
//!
//! Default features:
//! - `async` - Enable the async host client and mailbox transport (pulls in
//!   `async-trait`).
//!
//! Compile with `--no-default-features` for a target-only build.

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

#![no_std]

extern crate alloc;

#[cfg(test)]
extern crate std;

pub mod addr;
pub mod board;
pub mod client;
pub mod com;
pub mod config;
pub mod device;
pub mod dqueue;
pub mod fw;
pub mod io;
pub mod ir;
pub mod ram;
pub mod ring;
pub mod sys;

/// TSW errors.
///
/// Every variant that can be reported to the host has a numeric code, carried
/// in the `error` field of the MIL_COM acknowledge.  See [`Error::code()`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// Generic failure
    Api,
    /// Malformed host to target frame, including a bad magic
    HostToTarget,
    /// Data queue overflowed
    QueueOverflow,
    /// Data queue id out of range
    DataQueueIdNotInRange,
    /// Data queue is not open
    BufferNotAllocated,
    /// Unknown command code
    CmdNotFound,
    /// Command frame size does not match the command table
    WrongCmdSize,
    /// Expected acknowledge size does not match the command table
    WrongAckSize,
    /// Stream or BIU index out of range
    BiuOutOfRange,
    /// Requested memory layout does not fit
    NoSpaceLeft,
    /// BIU failed its self test
    BiuNotActive,
    /// Invalid mode parameter
    InvalidMode,
    /// RAM access outside an arena
    AddressOutOfRange,
    /// Operation not valid in the current device state
    InvalidDeviceState,
    /// Parameter out of its declared range
    ParameterOutOfRange,
    /// Capability not present on this device
    FunctionNotSupported,
    /// Firmware or target did not respond in time
    TargetResponseTimeout,
    /// Invalid RT address
    InvalidRt,
    /// Invalid identifier
    InvalidId,
    /// Invalid size
    InvalidSize,
    /// Handler did not set an acknowledge size
    AckSizeUndefined,
    /// Element (track, queue) is not enabled
    ElementNotEnabled,
    /// Transport I/O error
    Io,
    /// Mailbox busy
    Busy,
    /// No data available
    NoData,
    /// Address not aligned
    NotAligned,
}

impl Error {
    /// Error code as carried in the MIL_COM acknowledge.
    pub const fn code(&self) -> u32 {
        match self {
            Error::Api => 0x0001,
            Error::HostToTarget => 0x0005,
            Error::QueueOverflow => 0x006C,
            Error::DataQueueIdNotInRange => 0x0071,
            Error::BufferNotAllocated => 0x0197,
            Error::CmdNotFound => 0x1001,
            Error::WrongCmdSize => 0x1002,
            Error::WrongAckSize => 0x1003,
            Error::BiuOutOfRange => 0x1004,
            Error::NoSpaceLeft => 0x100B,
            Error::BiuNotActive => 0x100C,
            Error::InvalidMode => 0x100F,
            Error::AddressOutOfRange => 0x1010,
            Error::InvalidDeviceState => 0x1011,
            Error::ParameterOutOfRange => 0x1012,
            Error::FunctionNotSupported => 0x1018,
            Error::TargetResponseTimeout => 0x1024,
            Error::InvalidRt => 0x1029,
            Error::InvalidId => 0x102E,
            Error::InvalidSize => 0x102F,
            Error::AckSizeUndefined => 0x1032,
            Error::ElementNotEnabled => 0x1030,
            // Transport errors never travel in an ack
            Error::Io | Error::Busy | Error::NoData | Error::NotAligned => 0x0001,
        }
    }

    /// Map an acknowledge error code back to an error.  `None` for 0.
    pub fn from_code(code: u32) -> Option<Self> {
        let error = match code {
            0 => return None,
            0x0005 => Error::HostToTarget,
            0x006C => Error::QueueOverflow,
            0x0071 => Error::DataQueueIdNotInRange,
            0x0197 => Error::BufferNotAllocated,
            0x1001 => Error::CmdNotFound,
            0x1002 => Error::WrongCmdSize,
            0x1003 => Error::WrongAckSize,
            0x1004 => Error::BiuOutOfRange,
            0x100B => Error::NoSpaceLeft,
            0x100C => Error::BiuNotActive,
            0x100F => Error::InvalidMode,
            0x1010 => Error::AddressOutOfRange,
            0x1011 => Error::InvalidDeviceState,
            0x1012 => Error::ParameterOutOfRange,
            0x1018 => Error::FunctionNotSupported,
            0x1024 => Error::TargetResponseTimeout,
            0x1029 => Error::InvalidRt,
            0x102E => Error::InvalidId,
            0x102F => Error::InvalidSize,
            0x1030 => Error::ElementNotEnabled,
            0x1032 => Error::AckSizeUndefined,
            _ => Error::Api,
        };
        Some(error)
    }
}

/// Type to represent the result of a TSW operation
pub type Result<T> = core::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_round_trip() {
        let errors = [
            Error::HostToTarget,
            Error::CmdNotFound,
            Error::WrongCmdSize,
            Error::WrongAckSize,
            Error::BiuOutOfRange,
            Error::NoSpaceLeft,
            Error::BiuNotActive,
            Error::ParameterOutOfRange,
            Error::TargetResponseTimeout,
            Error::BufferNotAllocated,
            Error::DataQueueIdNotInRange,
            Error::AckSizeUndefined,
            Error::ElementNotEnabled,
        ];
        for error in errors {
            assert_eq!(Error::from_code(error.code()), Some(error));
        }
        assert_eq!(Error::from_code(0), None);
        assert_eq!(Error::from_code(0xDEAD), Some(Error::Api));
    }

    #[test]
    fn transport_errors_report_generic_code() {
        assert_eq!(Error::Io.code(), Error::Api.code());
        assert_eq!(Error::NotAligned.code(), 0x0001);
    }
}
