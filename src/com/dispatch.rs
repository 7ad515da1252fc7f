//! MIL_COM dispatcher.
//!
//! Checks an incoming frame against the command table and runs its handler.
//! Checks happen in a fixed order and the first failure is reported:
//!
//! 1. Header magic and frame length ([`Error::HostToTarget`])
//! 2. Command code in the table ([`Error::CmdNotFound`])
//! 3. Stream and BIU ([`Error::BiuOutOfRange`])
//! 4. Command size ([`Error::WrongCmdSize`])
//! 5. Expected acknowledge size ([`Error::WrongAckSize`])
//!
//! No handler runs unless every check passes.  A failed handler always gets
//! a header-only acknowledge.

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

use alloc::vec::Vec;
#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use crate::com::{
    ACK_SIZE, AckSize, CommandTable, HEADER_SIZE, MilComAck, MilComHeader, Request, Response,
    words_from_bytes,
};
use crate::{Error, Result};

/// What the dispatcher needs from the object it dispatches into
pub trait Context: Sized {
    fn command_table(&self) -> &CommandTable<Self>;

    /// Map a 1-based stream (0 meaning stream 1) to a logical BIU
    fn route(&self, stream: u32, hs: bool) -> Result<usize>;
}

/// An encoded-ready acknowledge
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub ack: MilComAck,
    pub words: Vec<u32>,
}

impl Reply {
    fn error(command: u32, error: Error) -> Self {
        Self {
            ack: MilComAck::error(command, error),
            words: Vec::new(),
        }
    }

    /// The acknowledge frame, exactly `ack.size` bytes long
    pub fn encode(&self) -> Vec<u8> {
        let payload_words = (self.ack.size.saturating_sub(ACK_SIZE) / 4) as usize;
        let mut words = self.words.clone();
        words.resize(payload_words, 0);
        self.ack.encode(&words)
    }
}

fn raw_command(frame: &[u8]) -> u32 {
    match frame.get(8..12) {
        Some(b) => u32::from_le_bytes([b[0], b[1], b[2], b[3]]),
        None => 0,
    }
}

/// Dispatch one command frame
pub fn dispatch<C: Context>(ctx: &mut C, frame: &[u8]) -> Reply {
    let reply = run(ctx, frame);
    if reply.ack.error != 0 {
        debug!(
            "Command {:#010X} failed with {:#06X}",
            reply.ack.command, reply.ack.error
        );
    }
    reply
}

fn run<C: Context>(ctx: &mut C, frame: &[u8]) -> Reply {
    let header = match MilComHeader::decode(frame) {
        Ok(header) => header,
        Err(e) => return Reply::error(raw_command(frame), e),
    };
    let command = header.command;

    let Some(entry) = ctx.command_table().get(command).copied() else {
        return Reply::error(command, Error::CmdNotFound);
    };

    let hs = header.is_hs();
    let biu = match ctx.route(header.stream, hs) {
        Ok(biu) => biu,
        Err(e) => return Reply::error(command, e),
    };
    trace!(
        "Dispatch {} ({command:#010X}) stream {} biu {biu}",
        entry.name, header.stream
    );

    if !entry.cmd_size.accepts(header.size) {
        return Reply::error(command, Error::WrongCmdSize);
    }
    if (frame.len() as u32) < header.size {
        return Reply::error(command, Error::HostToTarget);
    }

    let preset = match entry.ack_size {
        AckSize::Exact(size) => {
            if header.expected_ack_size != size {
                return Reply::error(command, Error::WrongAckSize);
            }
            size
        }
        AckSize::Variable => 0,
    };

    let request = Request {
        header,
        biu,
        hs,
        words: words_from_bytes(&frame[HEADER_SIZE as usize..header.size as usize]),
    };
    let mut response = Response::new(preset);

    if let Err(e) = (entry.handler)(ctx, &request, &mut response) {
        return Reply::error(command, e);
    }
    if response.size == 0 {
        return Reply::error(command, Error::AckSizeUndefined);
    }
    if response.size > header.expected_ack_size {
        return Reply::error(command, Error::WrongAckSize);
    }

    Reply {
        ack: MilComAck::new(command, response.size, response.swap_control),
        words: response.words,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::com::{CmdSize, CommandEntry, frame_size};

    struct Fixture {
        table: CommandTable<Fixture>,
        sentinel: bool,
    }

    impl Context for Fixture {
        fn command_table(&self) -> &CommandTable<Self> {
            &self.table
        }

        fn route(&self, stream: u32, hs: bool) -> Result<usize> {
            match (stream, hs) {
                (0 | 1, false) => Ok(0),
                (2, false) => Ok(1),
                _ => Err(Error::BiuOutOfRange),
            }
        }
    }

    fn set_sentinel(f: &mut Fixture, req: &Request, rsp: &mut Response) -> Result<()> {
        f.sentinel = true;
        rsp.push(req.word(0) + req.biu as u32);
        Ok(())
    }

    fn echo(_: &mut Fixture, req: &Request, rsp: &mut Response) -> Result<()> {
        for word in req.words.iter() {
            rsp.push(*word);
        }
        rsp.size_from_words();
        Ok(())
    }

    fn forgets_size(_: &mut Fixture, _: &Request, _: &mut Response) -> Result<()> {
        Ok(())
    }

    fn fails(_: &mut Fixture, _: &Request, rsp: &mut Response) -> Result<()> {
        rsp.push(1);
        Err(Error::InvalidMode)
    }

    const SET: u32 = 0x0100_0001;
    const ECHO: u32 = 0x0100_0002;
    const FORGETS: u32 = 0x0100_0003;
    const FAILS: u32 = 0x0100_0004;

    fn fixture() -> Fixture {
        let mut table = CommandTable::new();
        table
            .register_all(&[
                CommandEntry {
                    code: SET,
                    name: "set",
                    handler: set_sentinel,
                    cmd_size: CmdSize::words(1),
                    ack_size: AckSize::words(1),
                },
                CommandEntry {
                    code: ECHO,
                    name: "echo",
                    handler: echo,
                    cmd_size: CmdSize::AtLeast(frame_size(0)),
                    ack_size: AckSize::Variable,
                },
                CommandEntry {
                    code: FORGETS,
                    name: "forgets",
                    handler: forgets_size,
                    cmd_size: CmdSize::words(0),
                    ack_size: AckSize::Variable,
                },
                CommandEntry {
                    code: FAILS,
                    name: "fails",
                    handler: fails,
                    cmd_size: CmdSize::words(0),
                    ack_size: AckSize::words(1),
                },
            ])
            .unwrap();
        Fixture {
            table,
            sentinel: false,
        }
    }

    fn frame(stream: u32, command: u32, payload: &[u32], expected: u32) -> Vec<u8> {
        MilComHeader::new(stream, command, payload.len() as u32, expected).encode(payload)
    }

    #[test]
    fn runs_handler_with_routed_biu() {
        let mut f = fixture();
        let reply = dispatch(&mut f, &frame(2, SET, &[41], 36));
        assert!(f.sentinel);
        assert_eq!(reply.ack.result(), Ok(()));
        assert_eq!(reply.ack.size, 36);
        assert_eq!(reply.words, [42]);
        assert_eq!(reply.encode().len(), 36);
    }

    #[test]
    fn short_command_never_reaches_handler() {
        let mut f = fixture();
        let mut short = frame(1, SET, &[1], 36);
        // Declare one byte less than the table requires
        short[12..16].copy_from_slice(&35u32.to_le_bytes());
        let reply = dispatch(&mut f, &short);
        assert_eq!(reply.ack.result(), Err(Error::WrongCmdSize));
        assert_eq!(reply.ack.size, ACK_SIZE);
        assert!(!f.sentinel);
    }

    #[test]
    fn checks_run_in_order() {
        let mut f = fixture();
        let mut bad_magic = frame(1, SET, &[1], 36);
        bad_magic[0] = 0;
        let reply = dispatch(&mut f, &bad_magic);
        assert_eq!(reply.ack.result(), Err(Error::HostToTarget));
        assert_eq!(reply.ack.command, SET);

        let reply = dispatch(&mut f, &frame(1, 0x0100_0099, &[], 32));
        assert_eq!(reply.ack.result(), Err(Error::CmdNotFound));

        // Unknown stream beats a bad size
        let reply = dispatch(&mut f, &frame(5, SET, &[], 36));
        assert_eq!(reply.ack.result(), Err(Error::BiuOutOfRange));

        let reply = dispatch(&mut f, &frame(1, SET, &[1], 40));
        assert_eq!(reply.ack.result(), Err(Error::WrongAckSize));

        // Header claims more than was sent
        let mut truncated = frame(1, SET, &[1], 36);
        truncated.truncate(34);
        let reply = dispatch(&mut f, &truncated);
        assert_eq!(reply.ack.result(), Err(Error::HostToTarget));
        assert!(!f.sentinel);
    }

    #[test]
    fn variable_acks() {
        let mut f = fixture();
        let reply = dispatch(&mut f, &frame(1, ECHO, &[7, 8], 64));
        assert_eq!(reply.ack.size, 40);
        assert_eq!(reply.words, [7, 8]);

        let reply = dispatch(&mut f, &frame(1, ECHO, &[7, 8], 36));
        assert_eq!(reply.ack.result(), Err(Error::WrongAckSize));

        let reply = dispatch(&mut f, &frame(1, FORGETS, &[], 64));
        assert_eq!(reply.ack.result(), Err(Error::AckSizeUndefined));
        assert_eq!(reply.ack.size, ACK_SIZE);
    }

    #[test]
    fn handler_errors_get_bare_ack() {
        let mut f = fixture();
        let reply = dispatch(&mut f, &frame(1, FAILS, &[], 36));
        assert_eq!(reply.ack.result(), Err(Error::InvalidMode));
        assert_eq!(reply.encode().len(), ACK_SIZE as usize);
    }
}
