//! Asynchronous mailbox access - typically used by a host reaching target
//! memory over a bus or debug link.

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

use alloc::boxed::Box;
use alloc::vec;
use alloc::vec::Vec;
use async_trait::async_trait;
#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use crate::com::mailbox::{MailboxActor, MailboxCb, check_channel, pack_bytes, unpack_words};
use crate::io::{Reader, Writer};
use crate::{Error, Result};

/// Trait for accessing the mailbox region.
///
/// Async version of [`crate::ram::MemIo`].
#[async_trait(?Send)]
pub trait AsyncMemIo {
    /// Atomic read u32 operation
    async fn read_u32(&mut self, addr: u32) -> Result<u32>;

    /// Atomic write u32 operation
    async fn write_u32(&mut self, addr: u32, value: u32) -> Result<()>;

    /// Bulk read access, no need for atomicity
    async fn read_bulk(&mut self, addr: u32, buf: &mut [u32]) -> Result<()>;

    /// Bulk write access, no need for atomicity
    async fn write_bulk(&mut self, addr: u32, data: &[u32]) -> Result<()>;
}

/// Asynchronous mailbox.  Same protocol as [`crate::com::Mailbox`].
pub struct AsyncMailbox<'a, I: AsyncMemIo> {
    io: &'a mut I,
    actor: MailboxActor,
    cmd_base: u32,
    ack_base: u32,
}

impl<'a, I: AsyncMemIo> AsyncMailbox<'a, I> {
    /// Attach to a mailbox the target has already initialised
    pub async fn attach(
        io: &'a mut I,
        actor: MailboxActor,
        cmd_base: u32,
        ack_base: u32,
    ) -> Result<Self> {
        let mut mailbox = Self {
            io,
            actor,
            cmd_base,
            ack_base,
        };
        for base in [cmd_base, ack_base] {
            let size = mailbox.channel_size(base).await?;
            if size == 0 {
                return Err(Error::InvalidDeviceState);
            }
            check_channel(base, size)?;
        }
        debug!("Attached to mailbox cmd {cmd_base:#010X} ack {ack_base:#010X} as {actor:?}");
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

    /// Publish an outbound frame.  The channel must be idle.
    pub async fn send(&mut self, frame: &[u8]) -> Result<()> {
        let base = self.outbound();
        if frame.len() as u32 > self.capacity(base).await? {
            return Err(Error::InvalidSize);
        }
        if !self.idle(base).await? {
            return Err(Error::Busy);
        }

        let words = pack_bytes(frame);
        self.io
            .write_bulk(base + MailboxCb::data_offset(), &words)
            .await?;
        self.io
            .write_u32(base + MailboxCb::data_size_offset(), frame.len() as u32)
            .await?;

        // Publish by incrementing producer_seq last
        let seq = self
            .io
            .read_u32(base + MailboxCb::producer_seq_offset())
            .await?;
        self.io
            .write_u32(base + MailboxCb::producer_seq_offset(), seq.wrapping_add(1))
            .await
    }

    /// Take the pending inbound frame, if any
    pub async fn receive(&mut self) -> Result<Option<Vec<u8>>> {
        let base = self.inbound();
        if self.idle(base).await? {
            return Ok(None);
        }

        let size = self
            .io
            .read_u32(base + MailboxCb::data_size_offset())
            .await?;
        if size > self.capacity(base).await? {
            self.release(base).await?;
            return Err(Error::InvalidSize);
        }

        let mut words = vec![0u32; size.div_ceil(4) as usize];
        self.io
            .read_bulk(base + MailboxCb::data_offset(), &mut words)
            .await?;
        self.release(base).await?;
        Ok(Some(unpack_words(&words, size as usize)))
    }

    async fn channel_size(&mut self, base: u32) -> Result<u32> {
        self.io
            .read_u32(base + MailboxCb::channel_size_offset())
            .await
    }

    async fn capacity(&mut self, base: u32) -> Result<u32> {
        Ok(self
            .channel_size(base)
            .await?
            .saturating_sub(MailboxCb::data_offset()))
    }

    async fn idle(&mut self, base: u32) -> Result<bool> {
        let producer = self
            .io
            .read_u32(base + MailboxCb::producer_seq_offset())
            .await?;
        let consumer = self
            .io
            .read_u32(base + MailboxCb::consumer_seq_offset())
            .await?;
        Ok(producer == consumer)
    }

    async fn release(&mut self, base: u32) -> Result<()> {
        let producer = self
            .io
            .read_u32(base + MailboxCb::producer_seq_offset())
            .await?;
        self.io
            .write_u32(base + MailboxCb::consumer_seq_offset(), producer)
            .await
    }
}

/// [`AsyncMemIo`] built from the [`crate::io::Reader`] and
/// [`crate::io::Writer`] traits.  Addresses are relative to the shared RAM
/// window the reader and writer expose.
pub struct ReaderWriterIo<'a, R: Reader, W: Writer> {
    reader: &'a mut R,
    writer: &'a mut W,
}

impl<'a, R: Reader, W: Writer> ReaderWriterIo<'a, R, W> {
    pub fn new(reader: &'a mut R, writer: &'a mut W) -> Self {
        Self { reader, writer }
    }
}

#[async_trait(?Send)]
impl<R: Reader, W: Writer> AsyncMemIo for ReaderWriterIo<'_, R, W> {
    async fn read_u32(&mut self, addr: u32) -> Result<u32> {
        let mut buf = [0u8; 4];
        self.reader
            .read(addr, &mut buf)
            .await
            .map_err(|_| Error::Io)?;
        Ok(u32::from_le_bytes(buf))
    }

    async fn write_u32(&mut self, addr: u32, value: u32) -> Result<()> {
        self.writer
            .write(addr, &value.to_le_bytes())
            .await
            .map_err(|_| Error::Io)
    }

    async fn read_bulk(&mut self, addr: u32, buf: &mut [u32]) -> Result<()> {
        let mut bytes = vec![0u8; buf.len() * 4];
        self.reader
            .read(addr, &mut bytes)
            .await
            .map_err(|_| Error::Io)?;
        for (word, chunk) in buf.iter_mut().zip(bytes.chunks_exact(4)) {
            *word = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        }
        Ok(())
    }

    async fn write_bulk(&mut self, addr: u32, data: &[u32]) -> Result<()> {
        let bytes: Vec<u8> = data.iter().flat_map(|w| w.to_le_bytes()).collect();
        self.writer
            .write(addr, &bytes)
            .await
            .map_err(|_| Error::Io)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::rc::Rc;
    use core::cell::RefCell;
    use core::pin::pin;
    use core::task::{Context, Poll, Waker};

    // Both ends of a byte window
    #[derive(Clone)]
    struct Window(Rc<RefCell<Vec<u8>>>);

    impl Window {
        fn range(&self, addr: u32, len: usize) -> core::result::Result<core::ops::Range<usize>, ()> {
            let start = addr as usize;
            if start + len > self.0.borrow().len() {
                return Err(());
            }
            Ok(start..start + len)
        }
    }

    impl Reader for Window {
        type Error = ();

        fn read(
            &mut self,
            addr: u32,
            buf: &mut [u8],
        ) -> impl Future<Output = core::result::Result<(), ()>> + Send {
            let result = self.range(addr, buf.len()).map(|range| {
                buf.copy_from_slice(&self.0.borrow()[range]);
            });
            core::future::ready(result)
        }
    }

    impl Writer for Window {
        type Error = ();

        fn write(
            &mut self,
            addr: u32,
            data: &[u8],
        ) -> impl Future<Output = core::result::Result<(), ()>> + Send {
            let result = self.range(addr, data.len()).map(|range| {
                self.0.borrow_mut()[range].copy_from_slice(data);
            });
            core::future::ready(result)
        }
    }

    fn block_on<F: Future>(future: F) -> F::Output {
        let mut future = pin!(future);
        let mut cx = Context::from_waker(Waker::noop());
        loop {
            if let Poll::Ready(output) = future.as_mut().poll(&mut cx) {
                return output;
            }
        }
    }

    #[test]
    fn reader_writer_words_are_little_endian() {
        let window = Window(Rc::new(RefCell::new(vec![0u8; 64])));
        let (mut reader, mut writer) = (window.clone(), window.clone());
        let mut io = ReaderWriterIo::new(&mut reader, &mut writer);

        block_on(async {
            io.write_u32(4, 0x1122_3344).await.unwrap();
            io.write_bulk(8, &[0xAABB_CCDD, 0x0102_0304]).await.unwrap();
            assert_eq!(io.read_u32(4).await, Ok(0x1122_3344));
            let mut words = [0u32; 2];
            io.read_bulk(8, &mut words).await.unwrap();
            assert_eq!(words, [0xAABB_CCDD, 0x0102_0304]);
            assert_eq!(io.read_u32(64).await, Err(Error::Io));
        });
        assert_eq!(&window.0.borrow()[4..8], [0x44, 0x33, 0x22, 0x11]);
    }

    #[test]
    fn host_attach_needs_an_initialised_mailbox() {
        let window = Window(Rc::new(RefCell::new(vec![0u8; 0x100])));
        let (mut reader, mut writer) = (window.clone(), window.clone());
        let mut io = ReaderWriterIo::new(&mut reader, &mut writer);
        let attached = block_on(AsyncMailbox::attach(&mut io, MailboxActor::Host, 0, 0x80));
        assert!(matches!(attached, Err(Error::InvalidDeviceState)));
    }
}
