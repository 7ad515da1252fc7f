//! System dynamic data tags.
//!
//! A system tag rewrites part of a transfer's data buffer every time the
//! transfer completes: ramps and triangle waves on a bit field, values taken
//! in turn from a dataset, whole datasets, one's or two's complements of
//! another word, and checksums over a range of words.
//!
//! Tags are attached to a BC transfer or to an RT transmit subaddress.  On
//! completion the tags of the target run in three passes: value functions in
//! attach order, then complements, then checksums, so that complements and
//! checksums always see the final values.

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

use alloc::collections::BTreeMap;
use alloc::vec;
use alloc::vec::Vec;
#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use crate::device::layout::{DATASET_SIZE, SharedLayout};
use crate::ram::{GlobalRam, MemIo};
use crate::{Error, Result};

/// System tags per BIU, numbered 1..=255
pub const MAX_SYSTAGS: u32 = 255;

/// `mode` value attaching a tag to a BC transfer
pub const SYSTAG_MODE_BC: u32 = 1;
/// `mode` value attaching a tag to an RT subaddress
pub const SYSTAG_MODE_RT: u32 = 2;

/// SYSTAG_CON control values
pub const SYSTAG_RUN_SUSPEND: u32 = 0;
pub const SYSTAG_RUN_RESUME: u32 = 1;
pub const SYSTAG_RUN_DISABLED: u32 = 2;
pub const SYSTAG_RUN_ENABLED: u32 = 3;
pub const SYSTAG_RECALC_CHECKSUM: u32 = 4;

/// Where a tag is attached
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SystagTarget {
    Bc(u16),
    Rt { rt: u8, sa: u8 },
}

impl SystagTarget {
    /// Decode the `mode` and `xid_rtsa` words of a definition.  For RT the RT
    /// is in bits 8..12 and the subaddress in bits 0..4.
    pub fn decode(mode: u32, xid_rtsa: u32) -> Result<Self> {
        match mode {
            SYSTAG_MODE_BC => Ok(SystagTarget::Bc(xid_rtsa as u16)),
            SYSTAG_MODE_RT => Ok(SystagTarget::Rt {
                rt: ((xid_rtsa >> 8) & 0x1F) as u8,
                sa: (xid_rtsa & 0x1F) as u8,
            }),
            _ => Err(Error::InvalidMode),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChecksumKind {
    Plus,
    Xor,
    /// MIL-STD-1760 C01 rotated checksum
    C1760,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SystagFunction {
    RampInc,
    RampDec,
    TriangleInc,
    TriangleDec,
    Dataset,
    States,
    Complement,
    Checksum(ChecksumKind),
}

/// A SYSTAG_DEF request
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SystagDef {
    pub id: u32,
    pub con: u32,
    pub mode: u32,
    pub xid_rtsa: u32,
    pub fct: u32,
    pub min: u32,
    pub max: u32,
    pub step: u32,
    pub wpos: u32,
    /// Bit position in bits 8..11, field width in bits 0..7 (0 is 16)
    pub bpos_nbit: u32,
}

impl SystagDef {
    pub fn from_words(words: &[u32]) -> Self {
        let w = |i: usize| words.get(i).copied().unwrap_or(0);
        Self {
            id: w(0),
            con: w(1),
            mode: w(2),
            xid_rtsa: w(3),
            fct: w(4),
            min: w(5),
            max: w(6),
            step: w(7),
            wpos: w(8),
            bpos_nbit: w(9),
        }
    }
}

#[derive(Debug, Clone)]
struct Systag {
    target: SystagTarget,
    function: SystagFunction,
    min: u16,
    max: u16,
    step: u16,
    /// Field mask, already shifted to the bit position
    mask: u16,
    wpos: u16,
    bpos: u16,
    /// Next state index, or the current dataset for dataset tags
    index: u16,
    running: bool,
}

fn field_mask(bpos_nbit: u32) -> (u16, u16) {
    let bpos = ((bpos_nbit >> 8) & 0xF) as u16;
    let nbit = match bpos_nbit & 0xFF {
        0 => 16,
        n => n,
    };
    let mask = if nbit < 16 { !(0xFFFFu16 << nbit) } else { 0xFFFF };
    (bpos, mask)
}

impl Systag {
    fn build(def: &SystagDef, target: SystagTarget) -> Result<Self> {
        let min = def.min as u16;
        let max = def.max as u16;
        let step = def.step as u16;
        let wpos = def.wpos as u16;
        let mut tag = Systag {
            target,
            function: SystagFunction::RampInc,
            min,
            max,
            step,
            mask: 0,
            wpos,
            bpos: 0,
            index: 0,
            running: true,
        };

        match def.fct {
            1..=4 => {
                let (bpos, mask) = field_mask(def.bpos_nbit);
                tag.function = match def.fct {
                    1 => SystagFunction::RampInc,
                    2 => SystagFunction::RampDec,
                    3 => SystagFunction::TriangleInc,
                    _ => SystagFunction::TriangleDec,
                };
                tag.min = min & mask;
                tag.max = max & mask;
                tag.step = step & mask;
                tag.bpos = bpos;
                tag.mask = mask << bpos;
            }
            5 => {
                tag.function = SystagFunction::Dataset;
                tag.max = max.max(1);
                tag.step = step & 1;
                tag.wpos = 0;
                tag.index = min;
            }
            6 => {
                let (bpos, mask) = field_mask(def.bpos_nbit);
                tag.function = SystagFunction::States;
                tag.max = max.max(1);
                tag.step = step & 1;
                tag.bpos = bpos;
                tag.mask = mask << bpos;
            }
            7 => {
                tag.function = SystagFunction::Complement;
                tag.min = min & 0x1F;
                tag.max = 0;
                tag.step = step & 0x3;
            }
            8 => {
                let kind = match step & 0x3 {
                    0 => ChecksumKind::Plus,
                    1 => ChecksumKind::Xor,
                    2 => ChecksumKind::C1760,
                    _ => return Err(Error::ParameterOutOfRange),
                };
                tag.function = SystagFunction::Checksum(kind);
                if kind == ChecksumKind::C1760 {
                    tag.min = 0;
                    tag.max = wpos;
                } else {
                    tag.min = min & 0x1F;
                    tag.max = max & 0x1F;
                }
            }
            _ => return Err(Error::ParameterOutOfRange),
        }
        Ok(tag)
    }
}

/// Tags attached to one target
#[derive(Debug, Default, Clone)]
struct Attachment {
    list: Vec<u8>,
    dataset: Option<u8>,
}

/// System tags of one BIU
#[derive(Debug, Clone)]
pub struct SystagTable {
    tags: Vec<Option<Systag>>,
    attached: BTreeMap<SystagTarget, Attachment>,
}

/// 1760 C01 checksum over `words`: the word which, rotated right by the word
/// count and XORed with every data word rotated right by its index, gives 0.
pub fn checksum_1760(words: &[u16]) -> u16 {
    let sum = words
        .iter()
        .take(32)
        .enumerate()
        .fold(0u16, |acc, (k, w)| acc ^ w.rotate_right(k as u32));
    sum.rotate_left(words.len().min(32) as u32)
}

impl SystagTable {
    pub fn new() -> Self {
        Self {
            tags: vec![None; MAX_SYSTAGS as usize],
            attached: BTreeMap::new(),
        }
    }

    fn slot(id: u32) -> Result<usize> {
        if id == 0 || id > MAX_SYSTAGS {
            return Err(Error::ParameterOutOfRange);
        }
        Ok(id as usize - 1)
    }

    /// Handle a SYSTAG_DEF request.  Enabling an already enabled tag is
    /// ignored.
    pub fn define(&mut self, def: &SystagDef) -> Result<()> {
        let ix = Self::slot(def.id)?;
        let target = SystagTarget::decode(def.mode, def.xid_rtsa)?;

        if def.con & 1 == 0 {
            if let Some(old) = self.tags[ix].take() {
                self.detach(old.target, ix as u8 + 1);
            }
            self.detach(target, ix as u8 + 1);
            debug!("System tag {} disabled", def.id);
            return Ok(());
        }

        if self.tags[ix].is_some() {
            return Ok(());
        }
        let tag = Systag::build(def, target)?;
        let id = ix as u8 + 1;
        let attachment = self.attached.entry(target).or_default();
        if tag.function == SystagFunction::Dataset {
            attachment.dataset = Some(id);
        } else if !attachment.list.contains(&id) {
            attachment.list.push(id);
        }
        debug!("System tag {id} {:?} attached to {target:?}", tag.function);
        self.tags[ix] = Some(tag);
        Ok(())
    }

    fn detach(&mut self, target: SystagTarget, id: u8) {
        if let Some(attachment) = self.attached.get_mut(&target) {
            attachment.list.retain(|t| *t != id);
            if attachment.dataset == Some(id) {
                attachment.dataset = None;
            }
            if attachment.list.is_empty() && attachment.dataset.is_none() {
                self.attached.remove(&target);
            }
        }
    }

    /// Suspend or resume a tag
    pub fn set_running(&mut self, id: u32, running: bool) -> Result<()> {
        let ix = Self::slot(id)?;
        if let Some(tag) = self.tags[ix].as_mut() {
            tag.running = running;
        }
        Ok(())
    }

    /// Where an enabled tag is attached
    pub fn target(&self, id: u32) -> Result<Option<SystagTarget>> {
        let ix = Self::slot(id)?;
        Ok(self.tags[ix].as_ref().map(|tag| tag.target))
    }

    pub fn is_attached(&self, target: SystagTarget) -> bool {
        self.attached.contains_key(&target)
    }

    /// Recalculate a checksum tag over the data buffer at `dbp`.  Tags of
    /// other functions are ignored.
    pub fn checksum(&self, id: u32, gram: &mut GlobalRam, dbp: u32) -> Result<()> {
        let ix = Self::slot(id)?;
        let Some(tag) = self.tags[ix].as_ref() else {
            return Ok(());
        };
        let SystagFunction::Checksum(kind) = tag.function else {
            return Ok(());
        };
        if !tag.running || tag.max < tag.min {
            return Ok(());
        }

        let word = |k: u16| gram.read_u16(dbp + 2 * k as u32);
        let value = match kind {
            ChecksumKind::Plus => {
                let mut sum = 0u16;
                for k in tag.min..=tag.max {
                    sum = sum.wrapping_add(word(k)?);
                }
                sum
            }
            ChecksumKind::Xor => {
                let mut sum = 0u16;
                for k in tag.min..=tag.max {
                    sum ^= word(k)?;
                }
                sum
            }
            ChecksumKind::C1760 => {
                let count = tag.wpos.min(32);
                let mut words = Vec::with_capacity(count as usize);
                for k in 0..count {
                    words.push(word(tag.min + k)?);
                }
                checksum_1760(&words)
            }
        };
        gram.write_u16(dbp + 2 * tag.wpos as u32, value)
    }

    /// Run every tag attached to `target` over the data buffer at `dbp`.
    pub fn run(
        &mut self,
        target: SystagTarget,
        gram: &mut GlobalRam,
        shared: &GlobalRam,
        layout: &SharedLayout,
        dbp: u32,
    ) -> Result<()> {
        let Some(attachment) = self.attached.get(&target) else {
            return Ok(());
        };
        let dataset = attachment.dataset;
        let list = attachment.list.clone();

        if let Some(id) = dataset {
            self.run_dataset(id, gram, shared, layout, dbp)?;
        }

        let mut complements = false;
        let mut checksums = false;
        for id in list.iter() {
            let Some(Some(tag)) = self.tags.get_mut(*id as usize - 1) else {
                continue;
            };
            if !tag.running {
                continue;
            }
            match tag.function {
                SystagFunction::Complement => complements = true,
                SystagFunction::Checksum(_) => checksums = true,
                _ => Self::run_value(tag, gram, shared, layout, dbp)?,
            }
        }

        if complements {
            for id in list.iter() {
                let Some(Some(tag)) = self.tags.get(*id as usize - 1) else {
                    continue;
                };
                if tag.running && tag.function == SystagFunction::Complement {
                    let src = gram.read_u16(dbp + 2 * tag.min as u32)?;
                    let value = match tag.step {
                        1 => !src,
                        2 => (!src).wrapping_add(1),
                        _ => continue,
                    };
                    gram.write_u16(dbp + 2 * tag.wpos as u32, value)?;
                }
            }
        }

        if checksums {
            for id in list.iter() {
                self.checksum(*id as u32, gram, dbp)?;
            }
        }
        Ok(())
    }

    fn run_value(
        tag: &mut Systag,
        gram: &mut GlobalRam,
        shared: &GlobalRam,
        layout: &SharedLayout,
        dbp: u32,
    ) -> Result<()> {
        let at = dbp + 2 * tag.wpos as u32;
        let dw = gram.read_u16(at)?;
        let rest = dw & !tag.mask;
        let current = (dw & tag.mask) >> tag.bpos;
        let (min, max, step) = (tag.min, tag.max, tag.step);

        let value = match tag.function {
            SystagFunction::RampInc => {
                if current < max {
                    ramp_up(current, step, max)
                } else {
                    min
                }
            }
            SystagFunction::RampDec => {
                if current > min {
                    ramp_down(current, step, min)
                } else {
                    max
                }
            }
            SystagFunction::TriangleInc => {
                if current < max {
                    ramp_up(current, step, max)
                } else {
                    tag.function = SystagFunction::TriangleDec;
                    current.wrapping_sub(step)
                }
            }
            SystagFunction::TriangleDec => {
                if current > min {
                    ramp_down(current, step, min)
                } else {
                    tag.function = SystagFunction::TriangleInc;
                    current.wrapping_add(step)
                }
            }
            SystagFunction::States => {
                let base = layout.dataset(min as u32)?;
                let value = shared.read_u16(base + 2 * tag.index as u32)?;
                if tag.index + 1 < max {
                    tag.index += 1;
                } else if step == 0 {
                    tag.index = 0;
                }
                value
            }
            _ => return Ok(()),
        };

        gram.write_u16(at, rest | ((value << tag.bpos) & tag.mask))
    }

    fn run_dataset(
        &mut self,
        id: u8,
        gram: &mut GlobalRam,
        shared: &GlobalRam,
        layout: &SharedLayout,
        dbp: u32,
    ) -> Result<()> {
        let Some(Some(tag)) = self.tags.get_mut(id as usize - 1) else {
            return Ok(());
        };
        if !tag.running {
            return Ok(());
        }

        let mut buf = [0u32; (DATASET_SIZE / 4) as usize];
        shared.read_bulk(layout.dataset(tag.index as u32)?, &mut buf)?;
        gram.write_bulk(dbp, &buf)?;

        if tag.index - tag.min + 1 < tag.max {
            tag.index += 1;
        } else if tag.step == 0 {
            tag.index = tag.min;
        }
        Ok(())
    }
}

impl Default for SystagTable {
    fn default() -> Self {
        Self::new()
    }
}

fn ramp_up(current: u16, step: u16, max: u16) -> u16 {
    match current.checked_add(step) {
        Some(next) if next <= max => next,
        _ => max,
    }
}

fn ramp_down(current: u16, step: u16, min: u16) -> u16 {
    match current.checked_sub(step) {
        Some(next) if next >= min => next,
        _ => min,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::{BoardInfo, PLATFORM_CPCIX_3U};
    use crate::config::DeviceConfig;

    const DBP: u32 = 0x100;
    const XFER: SystagTarget = SystagTarget::Bc(3);

    struct Fixture {
        tags: SystagTable,
        gram: GlobalRam,
        shared: GlobalRam,
        layout: SharedLayout,
    }

    impl Fixture {
        fn new() -> Self {
            let config = DeviceConfig {
                shared_size: 0x10_0000,
                dq_ls_size: 0x1000,
                dq_hs_size: 0x1000,
                datasets: 8,
                fifo_area_size: 0x1000,
                ..Default::default()
            };
            let board = BoardInfo::decode(0xFFFF_FF11, PLATFORM_CPCIX_3U);
            Self {
                tags: SystagTable::new(),
                gram: GlobalRam::new(0x1000).unwrap(),
                shared: GlobalRam::new(config.shared_size).unwrap(),
                layout: SharedLayout::compute(&config, &board).unwrap(),
            }
        }

        fn define(&mut self, id: u32, fct: u32, min: u32, max: u32, step: u32, wpos: u32) {
            let def = SystagDef {
                id,
                con: 1,
                mode: SYSTAG_MODE_BC,
                xid_rtsa: 3,
                fct,
                min,
                max,
                step,
                wpos,
                bpos_nbit: 0,
            };
            self.tags.define(&def).unwrap();
        }

        fn run(&mut self) {
            self.tags
                .run(XFER, &mut self.gram, &self.shared, &self.layout, DBP)
                .unwrap();
        }

        fn word(&self, k: u32) -> u16 {
            self.gram.read_u16(DBP + 2 * k).unwrap()
        }
    }

    #[test]
    fn ramp_wraps_to_min() {
        let mut fx = Fixture::new();
        fx.define(1, 1, 2, 6, 3, 0);
        let seen: Vec<u16> = (0..4)
            .map(|_| {
                fx.run();
                fx.word(0)
            })
            .collect();
        assert_eq!(seen, [3, 6, 2, 5]);
    }

    #[test]
    fn triangle_turns_at_the_limits() {
        let mut fx = Fixture::new();
        fx.define(1, 3, 0, 2, 1, 1);
        let seen: Vec<u16> = (0..6)
            .map(|_| {
                fx.run();
                fx.word(1)
            })
            .collect();
        assert_eq!(seen, [1, 2, 1, 0, 1, 2]);
    }

    #[test]
    fn bit_field_leaves_other_bits_alone() {
        let mut fx = Fixture::new();
        fx.gram.write_u16(DBP, 0xF00F).unwrap();
        let def = SystagDef {
            id: 9,
            con: 1,
            mode: SYSTAG_MODE_BC,
            xid_rtsa: 3,
            fct: 1,
            min: 0,
            max: 0xF,
            step: 1,
            wpos: 0,
            bpos_nbit: (4 << 8) | 4,
        };
        fx.tags.define(&def).unwrap();
        fx.run();
        assert_eq!(fx.word(0), 0xF01F);
    }

    #[test]
    fn checksum_runs_after_value_functions() {
        let mut fx = Fixture::new();
        fx.gram.write_u16(DBP + 2, 0x1000).unwrap();
        fx.gram.write_u16(DBP + 4, 0xF001).unwrap();
        // Checksum defined first, ramp second
        fx.define(2, 8, 0, 2, 0, 3);
        fx.define(1, 1, 0, 10, 1, 0);
        fx.run();
        assert_eq!(fx.word(0), 1);
        assert_eq!(fx.word(3), 0x0002);
    }

    #[test]
    fn complement_and_xor() {
        let mut fx = Fixture::new();
        fx.gram.write_u16(DBP, 0x00FF).unwrap();
        fx.define(1, 7, 0, 0, 2, 1);
        fx.define(2, 8, 0, 1, 1, 2);
        fx.run();
        assert_eq!(fx.word(1), 0xFF01);
        assert_eq!(fx.word(2), 0x00FF ^ 0xFF01);
    }

    #[test]
    fn states_cycle_through_dataset_words() {
        let mut fx = Fixture::new();
        let base = fx.layout.dataset(2).unwrap();
        fx.shared.write_bulk(base, &[0x0002_0001, 0x0000_0003]).unwrap();
        fx.define(1, 6, 2, 3, 0, 4);
        let seen: Vec<u16> = (0..4)
            .map(|_| {
                fx.run();
                fx.word(4)
            })
            .collect();
        assert_eq!(seen, [1, 2, 3, 1]);
    }

    #[test]
    fn dataset_copies_whole_buffers() {
        let mut fx = Fixture::new();
        for id in 0..2 {
            let base = fx.layout.dataset(id + 1).unwrap();
            fx.shared.fill(base, DATASET_SIZE, 0x0101_0101 * (id + 1)).unwrap();
        }
        fx.define(1, 5, 1, 2, 0, 0);
        fx.run();
        assert_eq!(fx.word(31), 0x0101);
        fx.run();
        assert_eq!(fx.word(0), 0x0202);
        fx.run();
        assert_eq!(fx.word(0), 0x0101);
    }

    #[test]
    fn suspended_tags_do_nothing() {
        let mut fx = Fixture::new();
        fx.define(1, 1, 0, 10, 1, 0);
        fx.tags.set_running(1, false).unwrap();
        fx.run();
        assert_eq!(fx.word(0), 0);
    }

    #[test]
    fn disable_detaches() {
        let mut fx = Fixture::new();
        fx.define(1, 1, 0, 10, 1, 0);
        assert!(fx.tags.is_attached(XFER));
        let def = SystagDef {
            id: 1,
            con: 0,
            mode: SYSTAG_MODE_BC,
            xid_rtsa: 3,
            ..Default::default()
        };
        fx.tags.define(&def).unwrap();
        assert!(!fx.tags.is_attached(XFER));
        assert_eq!(fx.tags.target(1), Ok(None));
    }

    #[test]
    fn definitions_are_checked() {
        let mut tags = SystagTable::new();
        let mut def = SystagDef {
            id: 256,
            con: 1,
            mode: SYSTAG_MODE_RT,
            fct: 1,
            ..Default::default()
        };
        assert_eq!(tags.define(&def), Err(Error::ParameterOutOfRange));
        def.id = 1;
        def.mode = 3;
        assert_eq!(tags.define(&def), Err(Error::InvalidMode));
        def.mode = SYSTAG_MODE_RT;
        def.xid_rtsa = (5 << 8) | 2;
        tags.define(&def).unwrap();
        assert_eq!(tags.target(1), Ok(Some(SystagTarget::Rt { rt: 5, sa: 2 })));
    }

    #[test]
    fn c1760_checksum_cancels_out() {
        let words = [0x1234u16, 0xABCD, 0x0F0F];
        let sum = checksum_1760(&words);
        let check = words
            .iter()
            .enumerate()
            .fold(0u16, |acc, (k, w)| acc ^ w.rotate_right(k as u32))
            ^ sum.rotate_right(words.len() as u32);
        assert_eq!(check, 0);
    }
}
