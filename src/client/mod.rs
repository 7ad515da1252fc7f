//! Host side MIL_COM client.
//!
//! The host reaches the target's shared RAM over some bus or debug link,
//! writes command frames into the mailbox command channel and polls the
//! acknowledge channel for the answer.
//!
//! See [`AsyncMilComClient`] for async client usage.

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

#[cfg(feature = "async")]
pub mod futures;

#[cfg(feature = "async")]
pub use futures::{AsyncDelay, AsyncMilComClient, MilComResponse};

/// Where the client finds the mailbox, and how patient it is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MilComClientConfig {
    /// Offset of the command channel in shared RAM
    pub cmd_base: u32,
    /// Offset of the acknowledge channel in shared RAM
    pub ack_base: u32,
    /// 1-based stream commands are addressed to
    pub stream: u32,
    /// Polls of the acknowledge channel before giving up
    pub poll_limit: u32,
}

impl MilComClientConfig {
    pub fn new(cmd_base: u32, ack_base: u32) -> Self {
        Self {
            cmd_base,
            ack_base,
            stream: 1,
            poll_limit: 1000,
        }
    }
}
