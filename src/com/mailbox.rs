//! Command and acknowledge exchange in shared RAM.
//!
//! A mailbox is two one-way channels, each a [`MailboxCb`] followed by its
//! data area.  The host produces into the command channel and consumes from
//! the acknowledge channel; the target does the opposite.
//!
//! A channel holds one frame at a time.  The producer writes the frame, then
//! its size, and publishes by incrementing `producer_seq` last.  The consumer
//! reads the frame and releases the channel by copying `producer_seq` into
//! `consumer_seq`.  The channel is idle while the two are equal.

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

use alloc::vec;
use alloc::vec::Vec;
#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use crate::ram::MemIo;
use crate::{Error, Result};

/// Which end of the mailbox this is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MailboxActor {
    Host,
    Target,
}

/// Control block at the start of each channel
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct MailboxCb {
    /// Channel size, control block included.  0 until initialised.
    pub channel_size: u32,
    pub producer_seq: u32,
    pub consumer_seq: u32,
    /// Size of the frame in the data area, in bytes
    pub data_size: u32,
}

impl MailboxCb {
    pub const fn channel_size_offset() -> u32 {
        core::mem::offset_of!(MailboxCb, channel_size) as u32
    }

    pub const fn producer_seq_offset() -> u32 {
        core::mem::offset_of!(MailboxCb, producer_seq) as u32
    }

    pub const fn consumer_seq_offset() -> u32 {
        core::mem::offset_of!(MailboxCb, consumer_seq) as u32
    }

    pub const fn data_size_offset() -> u32 {
        core::mem::offset_of!(MailboxCb, data_size) as u32
    }

    pub const fn data_offset() -> u32 {
        core::mem::size_of::<Self>() as u32
    }
}

pub(crate) const fn min_channel_size() -> u32 {
    MailboxCb::data_offset() + 4
}

pub(crate) fn check_channel(base: u32, size: u32) -> Result<()> {
    if base % 4 != 0 {
        return Err(Error::NotAligned);
    }
    if size < min_channel_size() || size % 4 != 0 {
        return Err(Error::InvalidSize);
    }
    Ok(())
}

pub(crate) fn pack_bytes(data: &[u8]) -> Vec<u32> {
    data.chunks(4)
        .map(|c| {
            let mut word = [0u8; 4];
            word[..c.len()].copy_from_slice(c);
            u32::from_le_bytes(word)
        })
        .collect()
}

pub(crate) fn unpack_words(words: &[u32], len: usize) -> Vec<u8> {
    let mut bytes: Vec<u8> = words.iter().flat_map(|w| w.to_le_bytes()).collect();
    bytes.truncate(len);
    bytes
}

/// Synchronous mailbox over a [`MemIo`] region
pub struct Mailbox<'a, M: MemIo> {
    io: &'a mut M,
    actor: MailboxActor,
    cmd_base: u32,
    ack_base: u32,
}

impl<'a, M: MemIo> Mailbox<'a, M> {
    /// Initialise both channels, each `size` bytes.  Done once by the
    /// target.
    pub fn new(io: &'a mut M, cmd_base: u32, ack_base: u32, size: u32) -> Result<Self> {
        check_channel(cmd_base, size)?;
        check_channel(ack_base, size)?;

        let mailbox = Self {
            io,
            actor: MailboxActor::Target,
            cmd_base,
            ack_base,
        };
        for base in [cmd_base, ack_base] {
            // A channel is only valid once its size is non-zero
            mailbox
                .io
                .write_u32(base + MailboxCb::channel_size_offset(), 0)?;
            mailbox
                .io
                .write_u32(base + MailboxCb::producer_seq_offset(), 0)?;
            mailbox
                .io
                .write_u32(base + MailboxCb::consumer_seq_offset(), 0)?;
            mailbox.io.write_u32(base + MailboxCb::data_size_offset(), 0)?;
            mailbox
                .io
                .write_u32(base + MailboxCb::channel_size_offset(), size)?;
        }

        debug!("Created mailbox cmd {cmd_base:#010X} ack {ack_base:#010X} size {size} bytes");
        Ok(mailbox)
    }

    /// Attach to a mailbox the target has already initialised
    pub fn attach(io: &'a mut M, actor: MailboxActor, cmd_base: u32, ack_base: u32) -> Result<Self> {
        let mailbox = Self {
            io,
            actor,
            cmd_base,
            ack_base,
        };
        for base in [cmd_base, ack_base] {
            let size = mailbox.channel_size(base)?;
            if size == 0 {
                return Err(Error::InvalidDeviceState);
            }
            check_channel(base, size)?;
        }
        Ok(mailbox)
    }

    fn inbound(&self) -> u32 {
        match self.actor {
            MailboxActor::Target => self.cmd_base,
            MailboxActor::Host => self.ack_base,
        }
    }

    fn outbound(&self) -> u32 {
        match self.actor {
            MailboxActor::Target => self.ack_base,
            MailboxActor::Host => self.cmd_base,
        }
    }

    /// Take the pending inbound frame, if any
    pub fn receive(&mut self) -> Result<Option<Vec<u8>>> {
        let base = self.inbound();
        if self.idle(base)? {
            return Ok(None);
        }

        let size = self.io.read_u32(base + MailboxCb::data_size_offset())?;
        if size > self.capacity(base)? {
            // Release the channel so the producer is not stuck
            self.release(base)?;
            return Err(Error::InvalidSize);
        }

        let mut words = vec![0u32; size.div_ceil(4) as usize];
        self.io.read_bulk(base + MailboxCb::data_offset(), &mut words)?;
        self.release(base)?;

        trace!("Mailbox {:?} received {size} bytes", self.actor);
        Ok(Some(unpack_words(&words, size as usize)))
    }

    /// Publish an outbound frame.  The channel must be idle.
    pub fn send(&mut self, frame: &[u8]) -> Result<()> {
        let base = self.outbound();
        if frame.len() as u32 > self.capacity(base)? {
            return Err(Error::InvalidSize);
        }
        if !self.idle(base)? {
            return Err(Error::Busy);
        }

        let words = pack_bytes(frame);
        self.io.write_bulk(base + MailboxCb::data_offset(), &words)?;
        self.io
            .write_u32(base + MailboxCb::data_size_offset(), frame.len() as u32)?;

        // Publish by incrementing producer_seq last
        let seq = self.io.read_u32(base + MailboxCb::producer_seq_offset())?;
        self.io
            .write_u32(base + MailboxCb::producer_seq_offset(), seq.wrapping_add(1))?;

        trace!("Mailbox {:?} sent {} bytes", self.actor, frame.len());
        Ok(())
    }

    /// Whether a frame is waiting to be received
    pub fn pending(&self) -> Result<bool> {
        Ok(!self.idle(self.inbound())?)
    }

    fn channel_size(&self, base: u32) -> Result<u32> {
        self.io.read_u32(base + MailboxCb::channel_size_offset())
    }

    fn capacity(&self, base: u32) -> Result<u32> {
        Ok(self
            .channel_size(base)?
            .saturating_sub(MailboxCb::data_offset()))
    }

    fn idle(&self, base: u32) -> Result<bool> {
        let producer = self.io.read_u32(base + MailboxCb::producer_seq_offset())?;
        let consumer = self.io.read_u32(base + MailboxCb::consumer_seq_offset())?;
        Ok(producer == consumer)
    }

    fn release(&mut self, base: u32) -> Result<()> {
        let producer = self.io.read_u32(base + MailboxCb::producer_seq_offset())?;
        self.io
            .write_u32(base + MailboxCb::consumer_seq_offset(), producer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ram::GlobalRam;

    const CMD: u32 = 0x100;
    const ACK: u32 = 0x200;
    const SIZE: u32 = 0x100;

    #[test]
    fn frames_cross_in_both_directions() {
        let mut ram = GlobalRam::new(0x400).unwrap();
        Mailbox::new(&mut ram, CMD, ACK, SIZE).unwrap();

        {
            let mut host = Mailbox::attach(&mut ram, MailboxActor::Host, CMD, ACK).unwrap();
            host.send(&[1, 2, 3, 4, 5]).unwrap();
            assert_eq!(host.send(&[9]), Err(Error::Busy));
            assert!(!host.pending().unwrap());
        }
        {
            let mut target = Mailbox::attach(&mut ram, MailboxActor::Target, CMD, ACK).unwrap();
            assert!(target.pending().unwrap());
            assert_eq!(target.receive().unwrap(), Some(vec![1, 2, 3, 4, 5]));
            assert_eq!(target.receive().unwrap(), None);
            target.send(&[0xAA; 8]).unwrap();
        }
        let mut host = Mailbox::attach(&mut ram, MailboxActor::Host, CMD, ACK).unwrap();
        assert_eq!(host.receive().unwrap(), Some(vec![0xAA; 8]));
        host.send(&[6]).unwrap();
    }

    #[test]
    fn attach_requires_initialised_channels() {
        let mut ram = GlobalRam::new(0x400).unwrap();
        assert!(matches!(
            Mailbox::attach(&mut ram, MailboxActor::Host, CMD, ACK),
            Err(Error::InvalidDeviceState)
        ));
        assert!(matches!(
            Mailbox::new(&mut ram, CMD + 2, ACK, SIZE),
            Err(Error::NotAligned)
        ));
        assert!(matches!(
            Mailbox::new(&mut ram, CMD, ACK, 8),
            Err(Error::InvalidSize)
        ));
    }

    #[test]
    fn oversized_frames_are_refused() {
        let mut ram = GlobalRam::new(0x400).unwrap();
        let mut target = Mailbox::new(&mut ram, CMD, ACK, 0x20).unwrap();
        let big = [0u8; 0x20];
        assert_eq!(target.send(&big), Err(Error::InvalidSize));
        assert_eq!(target.send(&big[..0x10]), Ok(()));
    }
}
