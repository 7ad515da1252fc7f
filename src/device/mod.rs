//! The device context.
//!
//! A [`Device`] is one board.  It owns both RAM arenas, the address
//! translator, the per-BIU layout and software state, the data queues, the
//! firmware executor and the MIL_COM command table.  Nothing here is global:
//! every command handler and interrupt handler receives the device it works
//! on.
//!
//! - [`layout`] - Placement of hardware structures in global and shared RAM
//! - [`state`] - Per-BIU software state
//! - [`mode`] - Starting and stopping BC, BM and replay through the firmware

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

pub mod layout;
pub mod mode;
pub mod state;
#[cfg(test)]
pub(crate) mod testing;

use alloc::boxed::Box;
use alloc::vec::Vec;
#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use crate::addr::{AddressTranslator, MAX_BIU};
use crate::board::BoardInfo;
use crate::com::dispatch::{self, Context, Reply};
use crate::com::{CommandTable, Mailbox, MailboxActor};
use crate::config::{DeviceConfig, MemPartition};
use crate::dqueue::{self, DataQueues, Drained, GENERIC_ACQ_WORDS, MonitorRing};
use crate::fw::Firmware;
use crate::ram::{GlobalRam, MemIo};
use crate::{Error, Result};
use layout::{BiuLayout, HsCb, IR_LOG_SIZE, SharedLayout, SysCb};
use state::{BiuState, DeviceState};

/// Place every logical BIU's partition in global RAM
pub(crate) fn compute_layouts(
    config: &DeviceConfig,
    board: &BoardInfo,
    partition: &MemPartition,
) -> Result<Vec<BiuLayout>> {
    let mut layouts = Vec::with_capacity(board.bius());
    for biu in 0..board.bius() {
        let start = biu as u32 * config.biu_partition_size;
        let fits = start
            .checked_add(config.biu_partition_size)
            .is_some_and(|end| end <= config.gram_size);
        if !fits {
            debug!("BIU {biu} partition at {start:#010X} is outside global RAM");
            return Err(Error::NoSpaceLeft);
        }
        layouts.push(BiuLayout::compute(
            start,
            config.biu_partition_size,
            partition,
        )?);
    }
    Ok(layouts)
}

/// One board's target software
pub struct Device {
    pub(crate) config: DeviceConfig,
    pub(crate) board: BoardInfo,
    pub(crate) state: DeviceState,
    pub(crate) gram: GlobalRam,
    pub(crate) shared: GlobalRam,
    pub(crate) tr: AddressTranslator,
    pub(crate) partition: MemPartition,
    pub(crate) layouts: Vec<BiuLayout>,
    pub(crate) shared_layout: SharedLayout,
    pub(crate) bius: Vec<BiuState>,
    pub(crate) queues: DataQueues,
    pub(crate) fw: Box<dyn Firmware>,
    pub(crate) table: CommandTable<Device>,
    /// A RESET with the only-if-not-already-reset mode may proceed
    pub(crate) reset_can_be_done: bool,
}

impl core::fmt::Debug for Device {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Device")
            .field("board", &self.board)
            .field("state", &self.state)
            .field("partition", &self.partition)
            .field("bius", &self.bius.len())
            .field("commands", &self.table.len())
            .finish()
    }
}

impl Device {
    /// Build a device from its configuration.
    ///
    /// Decodes the board topology, lays out both RAM arenas, initialises
    /// every BIU's control block and the mailbox, and registers every
    /// command.
    pub fn new(config: DeviceConfig, fw: Box<dyn Firmware>) -> Result<Self> {
        config.validate()?;

        let board = BoardInfo::decode(config.board_type, config.board_config);
        if board.bius() == 0 {
            warn!(
                "Board type {:#010X} has no usable BIU",
                config.board_type
            );
            return Err(Error::InvalidDeviceState);
        }

        let partition = config.partition;
        let layouts = compute_layouts(&config, &board, &partition)?;
        let shared_layout = SharedLayout::compute(&config, &board)?;

        let mut starts = [0u32; MAX_BIU];
        for (start, layout) in starts.iter_mut().zip(layouts.iter()) {
            *start = layout.start;
        }
        let tr = AddressTranslator::new(config.ram_base, starts, config.byte_order);

        let mut table = CommandTable::new();
        table.register_all(crate::sys::COMMANDS)?;
        table.register_all(crate::sys::ini::COMMANDS)?;
        table.register_all(crate::sys::reset::COMMANDS)?;
        table.register_all(crate::dqueue::commands::COMMANDS)?;

        let bius = layouts.iter().map(BiuState::new).collect();
        let mut device = Self {
            gram: GlobalRam::new(config.gram_size)?,
            shared: GlobalRam::new(config.shared_size)?,
            config,
            board,
            state: DeviceState::Uninitialized,
            tr,
            partition,
            layouts,
            shared_layout,
            bius,
            queues: DataQueues::new(),
            fw,
            table,
            reset_can_be_done: false,
        };

        for biu in 0..device.bius.len() {
            device.init_control_block(biu)?;
        }
        Mailbox::new(
            &mut device.shared,
            device.shared_layout.mailbox_cmd,
            device.shared_layout.mailbox_ack,
            device.shared_layout.mailbox_size,
        )?;
        device.state = DeviceState::Initialized;

        info!(
            "Device {:?} ready: {} BIUs, {} streams, {} commands",
            device.board.device_type,
            device.bius.len(),
            device.board.streams(),
            device.table.len()
        );
        Ok(device)
    }

    /// Point the control block of `biu` at its structures and empty the
    /// interrupt log-list.
    pub(crate) fn init_control_block(&mut self, biu: usize) -> Result<()> {
        let layout = self.layout(biu)?.clone();
        let tr = &self.tr;

        self.gram.fill(layout.ir_log, IR_LOG_SIZE, 0)?;
        self.gram
            .write_u32(layout.cb + SysCb::ilp_offset(), tr.to_gram(biu, layout.ir_log)?)?;
        self.gram
            .write_u32(layout.cb + SysCb::lip_offset(), tr.to_gram(biu, layout.lip)?)?;
        self.gram
            .write_u32(layout.cb + SysCb::aip_offset(), tr.to_gram(biu, layout.acyc)?)?;

        let bm_buf = tr.to_gram(biu, layout.bm_buf)?;
        if self.board.is_hs(biu) {
            self.gram.write_u32(layout.hs_cb + HsCb::mbba_offset(), bm_buf)?;
            self.gram.write_u32(layout.hs_cb + HsCb::mbfp_offset(), bm_buf)?;
            self.gram
                .write_u32(layout.hs_cb + HsCb::bm_get_offset(), layout.bm_buf)?;
        } else {
            self.gram.write_u32(layout.cb + SysCb::mbba_offset(), bm_buf)?;
            self.gram.write_u32(layout.cb + SysCb::mbfp_offset(), bm_buf)?;
            self.gram
                .write_u32(layout.cb + SysCb::bm_get_offset(), layout.bm_buf)?;
        }

        self.bius[biu].islp = layout.ir_log;
        trace!(
            "BIU {biu}: control block at {:#010X}, log-list at {:#010X}",
            layout.cb, layout.ir_log
        );
        Ok(())
    }

    /// Run one MIL_COM command frame
    pub fn dispatch(&mut self, frame: &[u8]) -> Reply {
        dispatch::dispatch(self, frame)
    }

    /// Take a pending command from the mailbox, run it and post the
    /// acknowledge.  Returns whether a command was served.
    pub fn serve_mailbox(&mut self) -> Result<bool> {
        let (cmd, ack) = (
            self.shared_layout.mailbox_cmd,
            self.shared_layout.mailbox_ack,
        );

        let frame = {
            let mut mailbox = Mailbox::attach(&mut self.shared, MailboxActor::Target, cmd, ack)?;
            mailbox.receive()?
        };
        let Some(frame) = frame else {
            return Ok(false);
        };

        let reply = self.dispatch(&frame);
        let mut mailbox = Mailbox::attach(&mut self.shared, MailboxActor::Target, cmd, ack)?;
        mailbox.send(&reply.encode())?;
        Ok(true)
    }

    /// Where the monitor of `biu` keeps its ring
    pub(crate) fn monitor_ring(&self, biu: usize) -> Result<MonitorRing> {
        let layout = self.layout(biu)?;
        let hs = self.board.is_hs(biu);
        Ok(MonitorRing {
            biu,
            hs,
            cb: if hs { layout.hs_cb } else { layout.cb },
            start: layout.bm_buf,
            size: layout.bm_buf_size,
        })
    }

    /// Drain one data queue.  An overflow only shows in the queue header's
    /// status word.
    pub(crate) fn drain_queue(&mut self, id: u32) -> Result<Drained> {
        let biu = dqueue::queue_biu(id);
        if !dqueue::is_monitor_queue(id) || biu >= self.bius.len() {
            return Ok(Drained::default());
        }
        let ring = self.monitor_ring(biu)?;
        self.queues.drain(
            id,
            &ring,
            &mut self.gram,
            &mut self.shared,
            &self.shared_layout,
            &self.tr,
        )
    }

    /// Drain every open monitor data queue.  Returns the bytes made visible
    /// to the host.
    pub fn drain_data_queues(&mut self) -> u32 {
        let ids: Vec<u32> = self.queues.open_ids().collect();
        let mut bytes = 0;
        for id in ids {
            match self.drain_queue(id) {
                Ok(drained) => bytes += drained.bytes,
                Err(e) => warn!("Data queue {id}: drain failed {e:?}"),
            }
        }
        bytes
    }

    /// Append one value to the generic acquisition queue.  Returns whether
    /// it was queued; a full queue is flagged in its header.
    pub fn enqueue_generic_acq(
        &mut self,
        source: u8,
        tt_hi: u32,
        tt_lo: u32,
        value: u32,
    ) -> Result<bool> {
        let packet: [u32; GENERIC_ACQ_WORDS] =
            dqueue::generic_acq_packet(source, tt_hi, tt_lo, value);
        self.queues
            .enqueue_generic(&packet, &mut self.shared, &self.shared_layout)
    }

    pub(crate) fn check_biu(&self, biu: usize) -> Result<()> {
        if biu < self.bius.len() {
            Ok(())
        } else {
            Err(Error::BiuOutOfRange)
        }
    }

    pub(crate) fn require_simulator(&self, biu: usize) -> Result<()> {
        self.check_biu(biu)?;
        if self.config.capabilities.simulator {
            Ok(())
        } else {
            Err(Error::FunctionNotSupported)
        }
    }

    pub(crate) fn require_monitor(&self, biu: usize) -> Result<()> {
        self.check_biu(biu)?;
        if self.config.capabilities.monitor {
            Ok(())
        } else {
            Err(Error::FunctionNotSupported)
        }
    }

    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    pub fn board(&self) -> &BoardInfo {
        &self.board
    }

    pub fn state(&self) -> DeviceState {
        self.state
    }

    pub fn partition(&self) -> &MemPartition {
        &self.partition
    }

    pub fn translator(&self) -> &AddressTranslator {
        &self.tr
    }

    /// Global RAM shared with the BIUs
    pub fn gram(&self) -> &GlobalRam {
        &self.gram
    }

    pub fn gram_mut(&mut self) -> &mut GlobalRam {
        &mut self.gram
    }

    /// Shared RAM the host reads
    pub fn shared(&self) -> &GlobalRam {
        &self.shared
    }

    pub fn shared_mut(&mut self) -> &mut GlobalRam {
        &mut self.shared
    }

    pub fn layout(&self, biu: usize) -> Result<&BiuLayout> {
        self.layouts.get(biu).ok_or(Error::BiuOutOfRange)
    }

    pub fn shared_layout(&self) -> &SharedLayout {
        &self.shared_layout
    }

    pub fn biu_state(&self, biu: usize) -> Result<&BiuState> {
        self.bius.get(biu).ok_or(Error::BiuOutOfRange)
    }

    pub fn command_count(&self) -> usize {
        self.table.len()
    }
}

impl Context for Device {
    fn command_table(&self) -> &CommandTable<Self> {
        &self.table
    }

    fn route(&self, stream: u32, hs: bool) -> Result<usize> {
        let stream = stream.saturating_sub(1) as usize;
        self.board
            .stream_biu(stream, hs)
            .ok_or(Error::BiuOutOfRange)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::com::{MilComAck, SYS_PING};
    use crate::device::testing;

    #[test]
    fn device_is_initialised_with_empty_log_lists() {
        let (dev, _) = testing::device();
        assert_eq!(dev.state(), DeviceState::Initialized);
        assert_eq!(dev.bius.len(), 1);
        let layout = dev.layout(0).unwrap();
        let ilp = dev.gram.read_u32(layout.cb + SysCb::ilp_offset()).unwrap();
        assert_eq!(dev.tr.to_tsw(0, ilp).unwrap(), layout.ir_log);
        assert_eq!(dev.biu_state(0).unwrap().islp, layout.ir_log);
        assert!(dev.command_count() > 20);
    }

    #[test]
    fn partitions_must_fit_global_ram() {
        let mut config = testing::config();
        config.board_type = 0x1111_1111;
        config.gram_size = config.biu_partition_size * 2;
        let fw = Box::new(testing::FakeFirmware::default());
        assert!(matches!(
            Device::new(config, fw),
            Err(Error::NoSpaceLeft)
        ));
    }

    #[test]
    fn board_without_bius_is_rejected() {
        let mut config = testing::config();
        config.board_type = 0xFFFF_FFFF;
        let fw = Box::new(testing::FakeFirmware::default());
        assert!(matches!(
            Device::new(config, fw),
            Err(Error::InvalidDeviceState)
        ));
    }

    #[test]
    fn streams_route_to_bius() {
        let (dev, _) = testing::device_with(testing::config_ls_hs());
        assert_eq!(dev.route(0, false), Ok(0));
        assert_eq!(dev.route(1, false), Ok(0));
        assert_eq!(dev.route(1, true), Ok(1));
        assert_eq!(dev.route(2, false), Err(Error::BiuOutOfRange));
    }

    #[test]
    fn mailbox_round_trip() {
        let (mut dev, _) = testing::device();
        let (cmd, ack) = (
            dev.shared_layout.mailbox_cmd,
            dev.shared_layout.mailbox_ack,
        );
        assert!(!dev.serve_mailbox().unwrap());

        let frame = testing::frame(1, SYS_PING, &[2, 10, 20], 44);
        Mailbox::attach(&mut dev.shared, MailboxActor::Host, cmd, ack)
            .unwrap()
            .send(&frame)
            .unwrap();
        assert!(dev.serve_mailbox().unwrap());

        let answer = Mailbox::attach(&mut dev.shared, MailboxActor::Host, cmd, ack)
            .unwrap()
            .receive()
            .unwrap()
            .unwrap();
        let ack = MilComAck::decode(&answer).unwrap();
        assert_eq!(ack.result(), Ok(()));
        assert_eq!(ack.size, 44);
        assert_eq!(crate::com::words_from_bytes(&answer[32..]), [2, 20, 10]);
    }
}
