//! Dynamic tag monitor.
//!
//! The bus monitor raises a filter descriptor interrupt for each message of a
//! monitored RT/SA.  The message's command and data words are pulled out of
//! the monitor ring, and every monitor tag attached to the RT/SA compares the
//! word at its position with the previous sample.  A tag is healthy while the
//! word keeps changing.
//!
//! Each tag walks a four state machine:
//!
//! ```text
//!   GOOD --same--> GOOD1 --same x3--> BAD --changed--> BAD1 --changed x3--> GOOD
//!     ^              |                 ^                 |
//!     +---changed----+                 +------same-------+
//! ```
//!
//! Three consecutive observations are needed to move between GOOD and BAD in
//! either direction.

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

use alloc::collections::BTreeMap;
use alloc::vec;
use alloc::vec::Vec;
#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use crate::{Error, Result};

/// Monitor tags per BIU, numbered 1..=64
pub const MAX_DYNTAG_MON_ID: u32 = 64;

/// Consecutive observations needed to change between good and bad
const CONFIRM_COUNT: u32 = 3;

/// Most monitor words fetched for one message: command, status and data
pub const MAX_MESSAGE_WORDS: usize = 40;

/// Which part of the sampled data word a tag watches
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DyntagKind {
    /// Whole 16-bit sawtooth
    Saw16,
    /// Low byte sawtooth
    Saw8Low,
    /// High byte sawtooth
    Saw8High,
}

impl DyntagKind {
    pub fn from_code(code: u32) -> Result<Self> {
        match code {
            1 => Ok(DyntagKind::Saw16),
            2 => Ok(DyntagKind::Saw8Low),
            3 => Ok(DyntagKind::Saw8High),
            _ => Err(Error::InvalidMode),
        }
    }

    fn sample(self, word: u16) -> u32 {
        match self {
            DyntagKind::Saw16 => word as u32,
            DyntagKind::Saw8Low => (word & 0xFF) as u32,
            DyntagKind::Saw8High => (word >> 8) as u32,
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum DyntagHealth {
    #[default]
    Good,
    /// Good, but the last sample did not change
    Good1,
    Bad,
    /// Bad, but the last sample changed
    Bad1,
}

/// Counters reported for a monitor tag
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DyntagStatus {
    pub stale: u32,
    pub bad: u32,
    pub good: u32,
}

#[derive(Debug, Clone)]
struct MonitorTag {
    rt: u8,
    /// Subaddress plus 32 for transmit
    index: u8,
    kind: DyntagKind,
    wpos: u16,
    state: DyntagHealth,
    previous: Option<u32>,
    status: DyntagStatus,
    stale_contig: u32,
    good_contig: u32,
}

impl MonitorTag {
    fn observe(&mut self, word: u16) {
        let sample = self.kind.sample(word);
        let Some(previous) = self.previous.replace(sample) else {
            return;
        };
        let changed = sample != previous;

        match self.state {
            DyntagHealth::Good => {
                if changed {
                    self.status.good += 1;
                } else {
                    self.status.stale += 1;
                    self.stale_contig += 1;
                    self.state = DyntagHealth::Good1;
                }
            }
            DyntagHealth::Good1 => {
                if changed {
                    self.status.good += 1;
                    self.stale_contig = 0;
                    self.state = DyntagHealth::Good;
                } else {
                    self.status.stale += 1;
                    self.stale_contig += 1;
                    if self.stale_contig >= CONFIRM_COUNT {
                        self.status.bad += 1;
                        self.stale_contig = 0;
                        self.state = DyntagHealth::Bad;
                    }
                }
            }
            DyntagHealth::Bad => {
                self.status.bad += 1;
                if changed {
                    self.good_contig += 1;
                    self.state = DyntagHealth::Bad1;
                } else {
                    self.status.stale += 1;
                }
            }
            DyntagHealth::Bad1 => {
                if changed {
                    self.good_contig += 1;
                    if self.good_contig >= CONFIRM_COUNT {
                        self.status.good += 1;
                        self.good_contig = 0;
                        self.state = DyntagHealth::Good;
                    } else {
                        self.status.bad += 1;
                    }
                } else {
                    self.status.stale += 1;
                    self.status.bad += 1;
                    self.good_contig = 0;
                    self.state = DyntagHealth::Bad;
                }
            }
        }
    }
}

/// A bus monitor message decoded from raw monitor words
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct MonitorMessage {
    pub cw1: u16,
    pub cw2: u16,
    pub data: Vec<u16>,
}

impl MonitorMessage {
    /// Decode one message from the monitor words starting at its first
    /// command word.  Decoding stops at the next first command word.
    pub fn decode(words: &[u32]) -> Self {
        let mut msg = MonitorMessage::default();
        let mut expected = 0usize;

        for word in words.iter().take(MAX_MESSAGE_WORDS) {
            let value = *word as u16;
            match word & 0xF000_0000 {
                0x8000_0000 | 0xC000_0000 => {
                    if msg.cw1 != 0 {
                        break;
                    }
                    msg.cw1 = value;
                    expected = match value & 0x1F {
                        0 => 32,
                        n => n as usize,
                    };
                }
                0x9000_0000 | 0xD000_0000 => {
                    if msg.cw2 == 0 {
                        msg.cw2 = value;
                    }
                }
                0xA000_0000 | 0xE000_0000 => {
                    if msg.data.len() < 32 && msg.data.len() < expected {
                        msg.data.push(value);
                    }
                }
                _ => (),
            }
        }
        msg
    }

    pub fn rt(&self) -> u8 {
        ((self.cw1 >> 11) & 0x1F) as u8
    }

    /// Subaddress plus 32 for transmit
    pub fn index(&self) -> u8 {
        let tr = (self.cw1 >> 10) & 1;
        let sa = (self.cw1 >> 5) & 0x1F;
        (sa + tr * 32) as u8
    }
}

/// All monitor tags of one BIU
#[derive(Debug, Clone)]
pub struct DyntagMonitor {
    tags: Vec<Option<MonitorTag>>,
    // (rt, sa index) to the tag ids watching it
    lookup: BTreeMap<(u8, u8), Vec<u8>>,
}

impl DyntagMonitor {
    pub fn new() -> Self {
        Self {
            tags: vec![None; MAX_DYNTAG_MON_ID as usize],
            lookup: BTreeMap::new(),
        }
    }

    fn slot(id: u32) -> Result<usize> {
        if id == 0 || id > MAX_DYNTAG_MON_ID {
            return Err(Error::InvalidId);
        }
        Ok(id as usize - 1)
    }

    /// Start monitoring.  An already enabled tag is left as it is.
    ///
    /// `sa_type` is 0 for receive and 1 for transmit.
    pub fn enable(
        &mut self,
        id: u32,
        rt: u32,
        sa: u32,
        sa_type: u32,
        kind: DyntagKind,
        wpos: u16,
    ) -> Result<()> {
        let ix = Self::slot(id)?;
        if rt >= 32 || sa >= 32 || sa_type > 1 {
            return Err(Error::ParameterOutOfRange);
        }
        if self.tags[ix].is_some() {
            return Ok(());
        }

        let index = (sa + sa_type * 32) as u8;
        let rt = rt as u8;
        self.tags[ix] = Some(MonitorTag {
            rt,
            index,
            kind,
            wpos,
            state: DyntagHealth::Good,
            previous: None,
            status: DyntagStatus::default(),
            stale_contig: 0,
            good_contig: 0,
        });
        self.lookup.entry((rt, index)).or_default().push(id as u8);
        debug!("Dyntag monitor {id} watching RT {rt} index {index} word {wpos}");
        Ok(())
    }

    pub fn disable(&mut self, id: u32) -> Result<()> {
        let ix = Self::slot(id)?;
        if let Some(tag) = self.tags[ix].take() {
            let key = (tag.rt, tag.index);
            if let Some(ids) = self.lookup.get_mut(&key) {
                ids.retain(|t| *t as u32 != id);
                if ids.is_empty() {
                    self.lookup.remove(&key);
                }
            }
        }
        Ok(())
    }

    pub fn status(&self, id: u32) -> Result<DyntagStatus> {
        let ix = Self::slot(id)?;
        Ok(self.tags[ix]
            .as_ref()
            .map(|tag| tag.status)
            .unwrap_or_default())
    }

    pub fn health(&self, id: u32) -> Result<Option<DyntagHealth>> {
        let ix = Self::slot(id)?;
        Ok(self.tags[ix].as_ref().map(|tag| tag.state))
    }

    /// Whether any tag watches this RT/SA
    pub fn is_watching(&self, rt: u8, index: u8) -> bool {
        self.lookup.contains_key(&(rt, index))
    }

    /// Feed a decoded monitor message to every tag watching its RT/SA.
    pub fn observe(&mut self, msg: &MonitorMessage) {
        if msg.data.is_empty() {
            return;
        }
        let Some(ids) = self.lookup.get(&(msg.rt(), msg.index())) else {
            return;
        };
        for id in ids {
            let Some(Some(tag)) = self.tags.get_mut(*id as usize - 1) else {
                continue;
            };
            if let Some(word) = msg.data.get(tag.wpos as usize) {
                tag.observe(*word);
            }
        }
    }
}

impl Default for DyntagMonitor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // RT 1 transmit SA 2, two data words
    fn message(word: u16) -> MonitorMessage {
        MonitorMessage {
            cw1: (1 << 11) | (1 << 10) | (2 << 5) | 2,
            cw2: 0,
            data: vec![0x1111, word],
        }
    }

    fn monitor() -> DyntagMonitor {
        let mut mon = DyntagMonitor::new();
        mon.enable(1, 1, 2, 1, DyntagKind::Saw16, 1).unwrap();
        mon
    }

    #[test]
    fn two_stale_samples_keep_the_tag_good() {
        let mut mon = monitor();
        for word in [1, 1, 1] {
            mon.observe(&message(word));
        }
        assert_eq!(mon.health(1), Ok(Some(DyntagHealth::Good1)));
        assert_eq!(mon.status(1).unwrap().stale, 2);
    }

    #[test]
    fn three_stale_samples_demote_to_bad() {
        let mut mon = monitor();
        for word in [1, 1, 1, 1] {
            mon.observe(&message(word));
        }
        assert_eq!(mon.health(1), Ok(Some(DyntagHealth::Bad)));
        assert_eq!(mon.status(1).unwrap().bad, 1);
    }

    #[test]
    fn three_changes_promote_back_to_good() {
        let mut mon = monitor();
        for word in [1, 1, 1, 1] {
            mon.observe(&message(word));
        }
        mon.observe(&message(2));
        mon.observe(&message(3));
        assert_eq!(mon.health(1), Ok(Some(DyntagHealth::Bad1)));
        mon.observe(&message(4));
        assert_eq!(mon.health(1), Ok(Some(DyntagHealth::Good)));
    }

    #[test]
    fn a_stale_sample_interrupts_recovery() {
        let mut mon = monitor();
        for word in [1, 1, 1, 1, 2, 3, 3] {
            mon.observe(&message(word));
        }
        assert_eq!(mon.health(1), Ok(Some(DyntagHealth::Bad)));
    }

    #[test]
    fn byte_kinds_mask_the_sample() {
        let mut mon = DyntagMonitor::new();
        mon.enable(2, 1, 2, 1, DyntagKind::Saw8High, 1).unwrap();
        // Only the low byte changes
        for word in [0x0101, 0x0102, 0x0103, 0x0104] {
            mon.observe(&message(word));
        }
        assert_eq!(mon.health(2), Ok(Some(DyntagHealth::Bad)));
    }

    #[test]
    fn monitor_words_decode_into_a_message() {
        let words = [
            0x8000_0000 | 0x0C42,
            0xA000_1234,
            0xE000_5678,
            0x0000_9999,
            0x8000_0C42,
        ];
        let msg = MonitorMessage::decode(&words);
        assert_eq!(msg.rt(), 1);
        assert_eq!(msg.index(), 34);
        assert_eq!(msg.data, [0x1234, 0x5678]);
    }

    #[test]
    fn ids_and_parameters_are_checked() {
        let mut mon = DyntagMonitor::new();
        assert_eq!(
            mon.enable(0, 1, 2, 1, DyntagKind::Saw16, 0),
            Err(Error::InvalidId)
        );
        assert_eq!(
            mon.enable(65, 1, 2, 1, DyntagKind::Saw16, 0),
            Err(Error::InvalidId)
        );
        assert_eq!(
            mon.enable(1, 32, 2, 1, DyntagKind::Saw16, 0),
            Err(Error::ParameterOutOfRange)
        );
        mon.enable(1, 1, 2, 0, DyntagKind::Saw16, 0).unwrap();
        assert!(mon.is_watching(1, 2));
        mon.disable(1).unwrap();
        assert!(!mon.is_watching(1, 2));
        assert_eq!(mon.health(1), Ok(None));
    }
}
