//! MIL_COM command table.
//!
//! Each subsystem contributes a static slice of [`CommandEntry`] values,
//! which are merged into one [`CommandTable`] when the device is built.  An
//! entry carries the size contract the dispatcher enforces before the handler
//! runs.

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

use alloc::collections::BTreeMap;
#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use crate::com::{Request, Response, frame_size};
use crate::{Error, Result};

/// A command handler.  `C` is the context the table dispatches into,
/// normally [`crate::device::Device`].
pub type Handler<C> = fn(&mut C, &Request, &mut Response) -> Result<()>;

/// Accepted command frame size, header included
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmdSize {
    Exact(u32),
    /// Fixed part followed by a variable length array
    AtLeast(u32),
}

impl CmdSize {
    /// Fixed size of a command with `words` payload words
    pub const fn words(words: u32) -> Self {
        CmdSize::Exact(frame_size(words))
    }

    pub fn accepts(&self, size: u32) -> bool {
        match *self {
            CmdSize::Exact(n) => size == n,
            CmdSize::AtLeast(n) => size >= n,
        }
    }
}

/// Acknowledge size, header included
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckSize {
    Exact(u32),
    /// Set by the handler; must fit the host's expected size
    Variable,
}

impl AckSize {
    /// Fixed size of an acknowledge with `words` payload words
    pub const fn words(words: u32) -> Self {
        AckSize::Exact(frame_size(words))
    }
}

/// One row of a command table
pub struct CommandEntry<C> {
    pub code: u32,
    pub name: &'static str,
    pub handler: Handler<C>,
    pub cmd_size: CmdSize,
    pub ack_size: AckSize,
}

// Derives would require C: Clone
impl<C> Clone for CommandEntry<C> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<C> Copy for CommandEntry<C> {}

impl<C> core::fmt::Debug for CommandEntry<C> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("CommandEntry")
            .field("code", &format_args!("{:#010X}", self.code))
            .field("name", &self.name)
            .field("cmd_size", &self.cmd_size)
            .field("ack_size", &self.ack_size)
            .finish()
    }
}

/// Command code to entry map
pub struct CommandTable<C> {
    entries: BTreeMap<u32, CommandEntry<C>>,
}

impl<C> Default for CommandTable<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> core::fmt::Debug for CommandTable<C> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_list().entries(self.entries.values()).finish()
    }
}

impl<C> CommandTable<C> {
    pub fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }

    /// Add one entry.  A code may only be registered once.
    pub fn register(&mut self, entry: CommandEntry<C>) -> Result<()> {
        if self.entries.contains_key(&entry.code) {
            warn!(
                "Command {:#010X} ({}) registered twice",
                entry.code, entry.name
            );
            return Err(Error::InvalidId);
        }
        self.entries.insert(entry.code, entry);
        Ok(())
    }

    /// Add a subsystem's entries
    pub fn register_all(&mut self, entries: &[CommandEntry<C>]) -> Result<()> {
        for entry in entries {
            self.register(*entry)?;
        }
        debug!("Command table now holds {} entries", self.entries.len());
        Ok(())
    }

    pub fn get(&self, code: u32) -> Option<&CommandEntry<C>> {
        self.entries.get(&code)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Registered codes in ascending order
    pub fn codes(&self) -> impl Iterator<Item = u32> + '_ {
        self.entries.keys().copied()
    }
}
