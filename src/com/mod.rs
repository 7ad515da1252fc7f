//! MIL_COM host to target protocol.
//!
//! Every command frame is a 32-byte [`MilComHeader`] followed by command
//! specific little-endian 32-bit words.  Every acknowledge is a 32-byte
//! [`MilComAck`] followed by the response words.  The `size` fields of both
//! count the whole frame, header included.
//!
//! Commands are grouped by the upper half-word of their code.  Bit 23 of the
//! code selects the high speed (3910) BIU of a stream.
//!
//! - [`table`] - Command table: code to handler plus size contract
//! - [`dispatch`] - Checks a frame against the table and runs the handler
//! - [`mailbox`] - Command/acknowledge exchange area in shared RAM
//! - [`futures`] - Async access to the mailbox, used by the host client

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

pub mod dispatch;
#[cfg(feature = "async")]
pub mod futures;
pub mod mailbox;
pub mod table;

pub use mailbox::{Mailbox, MailboxActor, MailboxCb};
pub use table::{AckSize, CmdSize, CommandEntry, CommandTable, Handler};

use alloc::vec::Vec;

use crate::{Error, Result};

/// Sentinel in the first word of every header and acknowledge
pub const MAGIC: u32 = 0xA1A1_A1A1;
/// Size of [`MilComHeader`] on the wire
pub const HEADER_SIZE: u32 = 32;
/// Size of [`MilComAck`] on the wire
pub const ACK_SIZE: u32 = 32;
/// Command code bit selecting the high speed BIU of a stream
pub const HS_FLAG: u32 = 0x0080_0000;

pub const SYS_OFFSET: u32 = 0x0100_0000;
pub const SYS_HS_OFFSET: u32 = SYS_OFFSET | HS_FLAG;
pub const TRACK_OFFSET: u32 = 0x0102_0000;
pub const FIFO_OFFSET: u32 = 0x0103_0000;
pub const INI_OFFSET: u32 = 0x0108_0000;
pub const BM_DQUEUE_OFFSET: u32 = 0x0401_0000;

pub const SYS_PING: u32 = SYS_OFFSET + 1;
pub const SYS_GET_BOARD_INFO: u32 = SYS_OFFSET + 5;
pub const SYS_MEM_PART_SET: u32 = SYS_OFFSET + 7;
pub const SYS_MEM_PART_GET: u32 = SYS_OFFSET + 8;
pub const SYS_SYSTAG_CON: u32 = SYS_OFFSET + 9;
pub const SYS_SYSTAG_DEF: u32 = SYS_OFFSET + 10;
pub const SYS_RESET: u32 = SYS_OFFSET + 23;
pub const SYS_RESET_INFO: u32 = SYS_OFFSET + 24;

pub const HS_SYS_SYSTAG_CON: u32 = SYS_HS_OFFSET;
pub const HS_SYS_SYSTAG_DEF: u32 = SYS_HS_OFFSET + 1;

pub const TRACK_DEF: u32 = TRACK_OFFSET;
pub const TRACK_READ: u32 = TRACK_OFFSET + 1;
pub const TRACK_SCAN: u32 = TRACK_OFFSET + 2;
pub const TRACK_ALLOC: u32 = TRACK_OFFSET + 3;

pub const FIFO_INI: u32 = FIFO_OFFSET;
pub const FIFO_WRITE: u32 = FIFO_OFFSET + 1;
pub const FIFO_STATUS: u32 = FIFO_OFFSET + 2;
pub const FIFO_RT_ASSIGN: u32 = FIFO_OFFSET + 3;
pub const FIFO_BC_ASSIGN: u32 = FIFO_OFFSET + 4;

pub const INI: u32 = INI_OFFSET;

pub const DATAQUEUE_OPEN: u32 = BM_DQUEUE_OFFSET;
pub const DATAQUEUE_CONTROL: u32 = BM_DQUEUE_OFFSET + 1;
pub const DATAQUEUE_CLOSE: u32 = BM_DQUEUE_OFFSET + 2;

/// Size of a frame carrying `words` payload words
pub const fn frame_size(words: u32) -> u32 {
    HEADER_SIZE + words * 4
}

fn le_word(bytes: &[u8], index: usize) -> u32 {
    let at = index * 4;
    match bytes.get(at..at + 4) {
        Some(b) => u32::from_le_bytes([b[0], b[1], b[2], b[3]]),
        None => 0,
    }
}

/// Split a byte buffer into little-endian words.  A trailing partial word is
/// dropped.
pub fn words_from_bytes(bytes: &[u8]) -> Vec<u32> {
    bytes
        .chunks_exact(4)
        .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect()
}

fn push_words(buf: &mut Vec<u8>, words: &[u32]) {
    for word in words {
        buf.extend_from_slice(&word.to_le_bytes());
    }
}

/// Command frame header
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MilComHeader {
    pub magic: u32,
    /// 1-based stream number.  0 is treated as stream 1.
    pub stream: u32,
    pub command: u32,
    /// Frame size in bytes, header included
    pub size: u32,
    /// Acknowledge size the host expects, header included
    pub expected_ack_size: u32,
    /// Word count in the upper half, byte count in the lower
    pub swap_control: u32,
}

impl MilComHeader {
    pub fn new(stream: u32, command: u32, payload_words: u32, expected_ack_size: u32) -> Self {
        Self {
            magic: MAGIC,
            stream,
            command,
            size: frame_size(payload_words),
            expected_ack_size,
            swap_control: payload_words << 16,
        }
    }

    /// Parse a header from the start of a frame.
    ///
    /// A frame shorter than a header, or one with the wrong magic, is
    /// [`Error::HostToTarget`].
    pub fn decode(frame: &[u8]) -> Result<Self> {
        if frame.len() < HEADER_SIZE as usize {
            return Err(Error::HostToTarget);
        }
        let header = Self {
            magic: le_word(frame, 0),
            stream: le_word(frame, 1),
            command: le_word(frame, 2),
            size: le_word(frame, 3),
            expected_ack_size: le_word(frame, 4),
            swap_control: le_word(frame, 5),
        };
        if header.magic != MAGIC {
            return Err(Error::HostToTarget);
        }
        Ok(header)
    }

    /// Build a complete frame from this header and a payload.
    pub fn encode(&self, payload: &[u32]) -> Vec<u8> {
        let mut frame = Vec::with_capacity(HEADER_SIZE as usize + payload.len() * 4);
        push_words(
            &mut frame,
            &[
                self.magic,
                self.stream,
                self.command,
                self.size,
                self.expected_ack_size,
                self.swap_control,
                0,
                0,
            ],
        );
        push_words(&mut frame, payload);
        frame
    }

    pub fn is_hs(&self) -> bool {
        self.command & HS_FLAG != 0
    }
}

/// Acknowledge frame header
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MilComAck {
    pub magic: u32,
    pub command: u32,
    /// 0 on success, else an [`Error::code()`]
    pub error: u32,
    /// Acknowledge size in bytes, header included
    pub size: u32,
    pub swap_control: u32,
}

impl MilComAck {
    pub fn new(command: u32, size: u32, swap_control: u32) -> Self {
        Self {
            magic: MAGIC,
            command,
            error: 0,
            size,
            swap_control,
        }
    }

    /// Header-only acknowledge carrying an error
    pub fn error(command: u32, error: Error) -> Self {
        Self {
            magic: MAGIC,
            command,
            error: error.code(),
            size: ACK_SIZE,
            swap_control: 0,
        }
    }

    pub fn decode(frame: &[u8]) -> Result<Self> {
        if frame.len() < ACK_SIZE as usize {
            return Err(Error::HostToTarget);
        }
        let ack = Self {
            magic: le_word(frame, 0),
            command: le_word(frame, 1),
            error: le_word(frame, 2),
            size: le_word(frame, 3),
            swap_control: le_word(frame, 4),
        };
        if ack.magic != MAGIC {
            return Err(Error::HostToTarget);
        }
        Ok(ack)
    }

    pub fn encode(&self, payload: &[u32]) -> Vec<u8> {
        let mut frame = Vec::with_capacity(ACK_SIZE as usize + payload.len() * 4);
        push_words(
            &mut frame,
            &[
                self.magic,
                self.command,
                self.error,
                self.size,
                self.swap_control,
                0,
                0,
                0,
            ],
        );
        push_words(&mut frame, payload);
        frame
    }

    /// The error carried by this acknowledge, if any
    pub fn result(&self) -> Result<()> {
        match Error::from_code(self.error) {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

/// A command as seen by a handler
#[derive(Debug, Clone)]
pub struct Request {
    pub header: MilComHeader,
    /// Logical BIU the stream maps to
    pub biu: usize,
    /// Command addressed the high speed BIU
    pub hs: bool,
    /// Payload words after the header
    pub words: Vec<u32>,
}

impl Request {
    /// Payload word `index`, 0 if the frame is shorter
    pub fn word(&self, index: usize) -> u32 {
        self.words.get(index).copied().unwrap_or(0)
    }

    /// Half-word `index` of a 16-bit array starting at payload word `start`
    pub fn half_word(&self, start: usize, index: usize) -> u16 {
        let word = self.word(start + index / 2);
        (word >> ((index % 2) * 16)) as u16
    }
}

/// A handler's answer
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Response {
    pub words: Vec<u32>,
    /// Acknowledge size in bytes, header included.  Preset from the command
    /// table for fixed size acknowledges; a variable size handler must set it.
    pub size: u32,
    pub swap_control: u32,
}

impl Response {
    pub fn new(size: u32) -> Self {
        Self {
            words: Vec::new(),
            size,
            swap_control: 0,
        }
    }

    pub fn push(&mut self, word: u32) {
        self.words.push(word);
    }

    /// Append 16-bit values, two per word, low half first
    pub fn push_half_words(&mut self, values: &[u16]) {
        for pair in values.chunks(2) {
            let low = pair[0] as u32;
            let high = pair.get(1).copied().unwrap_or(0) as u32;
            self.words.push(low | (high << 16));
        }
    }

    /// Set the acknowledge size from the words pushed so far
    pub fn size_from_words(&mut self) {
        self.size = frame_size(self.words.len() as u32);
    }
}
