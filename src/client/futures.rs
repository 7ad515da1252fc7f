//! Asynchronous MIL_COM client - typically used by a host.

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

use alloc::vec::Vec;
#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use crate::client::MilComClientConfig;
use crate::com::futures::{AsyncMailbox, AsyncMemIo};
use crate::com::{MailboxActor, MilComAck, MilComHeader, frame_size, words_from_bytes};
use crate::{Error, Result};

/// Yield delay for async polling loops.
///
/// Application must provide an implementation of this trait in order for the
/// async client to be able to yield, waiting for the target to acknowledge.
///
/// This trait keeps `mil1553-tsw` free of any specific async runtime.
///
/// Example:
///
/// ```rust,ignore
/// use embassy_time::{Duration, Timer};
/// struct Delay;
/// impl AsyncDelay for Delay {
///     async fn delay() {
///         Timer::after(Duration::from_millis(1)).await;
///     }
/// }
/// ```
pub trait AsyncDelay {
    fn delay() -> impl Future<Output = ()>;
}

/// An acknowledge and the words that followed it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MilComResponse {
    pub ack: MilComAck,
    pub words: Vec<u32>,
}

/// Async MIL_COM client.
///
/// See [`AsyncDelay`] for the required delay trait.
///
/// Example usage:
///
/// ```rust,ignore
/// use mil1553_tsw::client::{AsyncMilComClient, MilComClientConfig};
/// use mil1553_tsw::com::SYS_PING;
///
/// let config = MilComClientConfig::new(cmd_base, ack_base);
/// let mut io = ...; // implement AsyncMemIo
/// let mut client = AsyncMilComClient::<_, Delay>::new(&mut io, config).await?;
/// let echo = client.command(SYS_PING, &[2, 0x11, 0x22], 3).await?;
/// assert_eq!(echo, [2, 0x22, 0x11]);
/// ```
pub struct AsyncMilComClient<'a, I: AsyncMemIo, D: AsyncDelay> {
    mailbox: AsyncMailbox<'a, I>,
    stream: u32,
    poll_limit: u32,
    _delay: core::marker::PhantomData<D>,
}

impl<'a, I: AsyncMemIo, D: AsyncDelay> AsyncMilComClient<'a, I, D> {
    /// Attach to the target's mailbox.  The target must have initialised it.
    pub async fn new(io: &'a mut I, config: MilComClientConfig) -> Result<Self> {
        let mailbox =
            AsyncMailbox::attach(io, MailboxActor::Host, config.cmd_base, config.ack_base).await?;
        Ok(Self {
            mailbox,
            stream: config.stream,
            poll_limit: config.poll_limit,
            _delay: core::marker::PhantomData,
        })
    }

    /// Address further commands to another 1-based stream
    pub fn set_stream(&mut self, stream: u32) {
        self.stream = stream;
    }

    /// Send one command frame and wait for its acknowledge.
    ///
    /// Arguments:
    /// - `command`: MIL_COM command code
    /// - `payload`: words following the header
    /// - `expected_ack_size`: the largest acknowledge the caller accepts,
    ///   header included
    ///
    /// An error the target reports is left in the returned acknowledge.
    pub async fn request(
        &mut self,
        command: u32,
        payload: &[u32],
        expected_ack_size: u32,
    ) -> Result<MilComResponse> {
        let header = MilComHeader::new(
            self.stream,
            command,
            payload.len() as u32,
            expected_ack_size,
        );
        self.mailbox.send(&header.encode(payload)).await?;
        trace!("Sent {command:#010X} to stream {}", self.stream);

        let mut polls = 0;
        let frame = loop {
            if let Some(frame) = self.mailbox.receive().await? {
                break frame;
            }
            polls += 1;
            if polls >= self.poll_limit {
                warn!("No acknowledge for {command:#010X} after {polls} polls");
                return Err(Error::TargetResponseTimeout);
            }
            D::delay().await;
        };

        let ack = MilComAck::decode(&frame)?;
        if ack.command != command {
            warn!(
                "Acknowledge for {:#010X} while waiting for {command:#010X}",
                ack.command
            );
            return Err(Error::Api);
        }
        let size = (ack.size as usize).min(frame.len());
        let words = words_from_bytes(frame.get(ACK_HEADER..size).unwrap_or(&[]));
        debug!(
            "{command:#010X} acknowledged: error {:#X}, {} words",
            ack.error,
            words.len()
        );
        Ok(MilComResponse { ack, words })
    }

    /// Run a command with a fixed size acknowledge of `ack_words` words and
    /// return them, turning a reported error into `Err`.
    pub async fn command(
        &mut self,
        command: u32,
        payload: &[u32],
        ack_words: u32,
    ) -> Result<Vec<u32>> {
        let response = self
            .request(command, payload, frame_size(ack_words))
            .await?;
        response.ack.result()?;
        Ok(response.words)
    }
}

const ACK_HEADER: usize = crate::com::ACK_SIZE as usize;
