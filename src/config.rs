//! Device configuration.
//!
//! A [`DeviceConfig`] is resolved once, before the [`crate::device::Device`] is
//! built.  It carries the board identity normally read from NOVRAM, the sizes
//! of the RAM arenas, the default memory partition and the [`Capabilities`]
//! the device is built with.

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use crate::addr::ByteOrder;
use crate::board::PLATFORM_CPCIX_3U;
use crate::{Error, Result};

/// Most BC transfer descriptors a BIU partition may hold
pub const MAX_BC_XFER: u32 = 0x2000;
/// Most BC buffer headers a BIU partition may hold
pub const MAX_BC_HID: u32 = 0x2000;
/// Most RT buffer headers a BIU partition may hold
pub const MAX_RT_HID: u32 = 0x2000;
/// Most 64-byte simulator buffers a BIU partition may hold
pub const MAX_SIM_BUFS: u32 = 0x8000;
/// Largest bus monitor ring a BIU partition may hold
pub const MAX_BM_BUF_SIZE: u32 = 0x0080_0000;

/// Which subsystems this device supports.
///
/// A device without `simulator` never decodes BC, RT, replay or BC skip
/// interrupts and rejects system tag, track and FIFO commands.  A device
/// without `monitor` never decodes BM interrupts and rejects data queue
/// commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    pub simulator: bool,
    pub monitor: bool,
    pub replay: bool,
}

impl Capabilities {
    pub const fn all() -> Self {
        Self {
            simulator: true,
            monitor: true,
            replay: true,
        }
    }

    pub const fn monitor_only() -> Self {
        Self {
            simulator: false,
            monitor: true,
            replay: false,
        }
    }
}

impl Default for Capabilities {
    fn default() -> Self {
        Self::all()
    }
}

/// Per-BIU global RAM partition counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemPartition {
    /// BC transfer descriptors
    pub bc_xfer: u32,
    /// BC buffer headers, each with one status queue entry
    pub bc_hid: u32,
    /// RT buffer headers, each with one status queue entry
    pub rt_hid: u32,
    /// 64-byte simulator data buffers
    pub sim_bufs: u32,
    /// Bus monitor ring size in bytes
    pub bm_buf_size: u32,
}

impl MemPartition {
    /// Reject counts above the hardware maximums.
    pub fn check_limits(&self) -> Result<()> {
        if self.bc_xfer > MAX_BC_XFER
            || self.bc_hid > MAX_BC_HID
            || self.rt_hid > MAX_RT_HID
            || self.sim_bufs > MAX_SIM_BUFS
            || self.bm_buf_size > MAX_BM_BUF_SIZE
        {
            return Err(Error::ParameterOutOfRange);
        }
        if self.bm_buf_size % 4 != 0 {
            return Err(Error::InvalidSize);
        }
        Ok(())
    }
}

impl Default for MemPartition {
    fn default() -> Self {
        Self {
            bc_xfer: 0x200,
            bc_hid: 0x200,
            rt_hid: 0x400,
            sim_bufs: 0x1000,
            bm_buf_size: 0x0010_0000,
        }
    }
}

/// Everything needed to build a device.
#[derive(Debug, Clone)]
pub struct DeviceConfig {
    /// Board type word, one byte per physical BIU slot
    pub board_type: u32,
    /// Board configuration word, low byte is the platform
    pub board_config: u32,
    pub board_sub_type: u32,
    pub serial: u32,
    pub part_no: u32,
    pub hw_variant: u32,
    /// Host address of the first byte of global RAM
    pub ram_base: u32,
    /// Global RAM arena size in bytes
    pub gram_size: u32,
    /// Bytes of global RAM given to each logical BIU
    pub biu_partition_size: u32,
    /// Shared RAM arena size in bytes
    pub shared_size: u32,
    /// Byte order of hardware control words
    pub byte_order: ByteOrder,
    pub capabilities: Capabilities,
    /// Polls of the firmware before a command times out
    pub fw_poll_limit: u32,
    /// Data area of a low speed data queue
    pub dq_ls_size: u32,
    /// Data area of a high speed data queue
    pub dq_hs_size: u32,
    /// Space reserved in front of each data queue's data area
    pub dq_header_size: u32,
    /// Number of 64-byte dataset buffers in shared RAM
    pub datasets: u32,
    /// Bytes of shared RAM given to each BIU's FIFO queues
    pub fifo_area_size: u32,
    /// Size of each mailbox channel, including its control block
    pub mailbox_size: u32,
    /// Partition applied at reset
    pub partition: MemPartition,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            board_type: 0xFFFF_1111,
            board_config: PLATFORM_CPCIX_3U,
            board_sub_type: 0,
            serial: 0,
            part_no: 0,
            hw_variant: 0,
            ram_base: 0,
            gram_size: 0x0200_0000,
            biu_partition_size: 0x0080_0000,
            shared_size: 0x0100_0000,
            byte_order: ByteOrder::Native,
            capabilities: Capabilities::default(),
            fw_poll_limit: 10_000,
            dq_ls_size: 0x0010_0000,
            dq_hs_size: 0x0040_0000,
            dq_header_size: 0x100,
            datasets: 0x1000,
            fifo_area_size: 0x0004_0000,
            mailbox_size: 0x1000,
            partition: MemPartition::default(),
        }
    }
}

impl DeviceConfig {
    /// Check the configuration is self consistent.
    ///
    /// Whether the BIU partitions fit global RAM depends on the board topology
    /// and is checked when the device is built.
    pub fn validate(&self) -> Result<()> {
        for size in [
            self.gram_size,
            self.biu_partition_size,
            self.shared_size,
            self.dq_ls_size,
            self.dq_hs_size,
            self.dq_header_size,
            self.fifo_area_size,
            self.mailbox_size,
        ] {
            if size == 0 || size % 4 != 0 {
                debug!("Configured size {size:#010X} is not a word multiple");
                return Err(Error::InvalidSize);
            }
        }
        if self.biu_partition_size > self.gram_size {
            return Err(Error::InvalidSize);
        }
        if self.fw_poll_limit == 0 {
            return Err(Error::ParameterOutOfRange);
        }
        self.partition.check_limits()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert_eq!(DeviceConfig::default().validate(), Ok(()));
    }

    #[test]
    fn unaligned_sizes_are_rejected() {
        let config = DeviceConfig {
            shared_size: 0x1001,
            ..Default::default()
        };
        assert_eq!(config.validate(), Err(Error::InvalidSize));

        let config = DeviceConfig {
            biu_partition_size: 0x0400_0000,
            ..Default::default()
        };
        assert_eq!(config.validate(), Err(Error::InvalidSize));
    }

    #[test]
    fn partition_limits_are_enforced() {
        let mut partition = MemPartition::default();
        partition.bc_xfer = MAX_BC_XFER + 1;
        assert_eq!(partition.check_limits(), Err(Error::ParameterOutOfRange));

        let config = DeviceConfig {
            fw_poll_limit: 0,
            ..Default::default()
        };
        assert_eq!(config.validate(), Err(Error::ParameterOutOfRange));
    }
}
