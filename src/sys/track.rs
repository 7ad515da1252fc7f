//! Multiplexed data tracks.
//!
//! A track watches the data buffer of one BC transfer or RT subaddress.  Each
//! time the transfer completes the buffer is cut into `file_count` files of
//! `size` words, a multiplex value is taken from a bit field of each file and
//! the file is stored under that value.  The host then reads the latest file
//! for any value, or scans for the values which have been updated.
//!
//! A mux track does the same one level down: it is attached to another
//! track, and demultiplexes the stored file for one of that track's states.

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

use alloc::collections::BTreeMap;
use alloc::vec;
use alloc::vec::Vec;
#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use crate::ram::GlobalRam;
use crate::{Error, Result};

/// Tracks per BIU
pub const MAX_TRACKS: u32 = 256;

pub const TRACK_TYPE_BC: u32 = 1;
pub const TRACK_TYPE_RT: u32 = 2;
pub const TRACK_TYPE_MUX: u32 = 3;

/// Value returned in `buffer_start` when storage was set up
pub const TRACK_BUFFER_ALLOCATED: u32 = 0xFFFF_FFFF;

// Element flags
const FLAG_VALID: u8 = 0x01;
const FLAG_UPDATED: u8 = 0x02;

/// The transfer a BC or RT track watches
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackSource {
    Bc(u16),
    Rt { rt: u8, sa: u8, tx: bool },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TrackKind {
    Source(TrackSource),
    /// Attached to the given parent track
    Mux(u8),
}

/// A TRACK_DEF request
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TrackDef {
    pub id: u32,
    pub bt: u32,
    /// Transfer id for BC; RT in bits 8..12, subaddress in bits 0..7 and
    /// transmit in bit 15 for RT; parent track id for mux tracks
    pub xid_rtsa: u32,
    /// 1 enables, 0 disables
    pub mode: u32,
    pub start: u32,
    pub bpos: u32,
    pub blen: u32,
    pub size: u32,
    pub states: u32,
    pub file_count: u32,
    /// Signed offset from the multiplex word to the file data
    pub offset: u32,
}

impl TrackDef {
    pub fn from_words(words: &[u32]) -> Self {
        let w = |i: usize| words.get(i).copied().unwrap_or(0);
        Self {
            id: w(0),
            bt: w(1),
            xid_rtsa: w(2),
            mode: w(3),
            start: w(4),
            bpos: w(5),
            blen: w(6),
            size: w(7),
            states: w(8),
            file_count: w(9),
            offset: w(10),
        }
    }
}

/// Result of defining a track
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackDefined {
    pub buffer_start: u32,
    /// Completion interrupt the track needs enabled on the hardware
    pub interrupt: Option<TrackSource>,
}

/// Result of a TRACK_READ
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TrackRead {
    pub valid: bool,
    pub last_time_tag: u32,
    pub data: Vec<u16>,
}

/// Result of a TRACK_SCAN
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TrackScan {
    pub states: Vec<u16>,
    pub more: bool,
}

#[derive(Debug, Clone)]
struct Element {
    data: Vec<u16>,
    flags: u8,
}

#[derive(Debug, Clone)]
struct Track {
    kind: TrackKind,
    start: u16,
    bpos: u8,
    mask: u16,
    size: u16,
    states: u16,
    file_count: u16,
    offset: i32,
    preallocated: bool,
    last_time_tag: u32,
    /// Mux tracks attached to this one
    rel_count: u32,
    elements: BTreeMap<u16, Element>,
}

impl Track {
    fn accepts(&self, state: u16) -> bool {
        self.states == 0 || state < self.states
    }

    /// Find, or create when allowed, the element for `state`
    fn element(&mut self, state: u16) -> Option<&mut Element> {
        if !self.elements.contains_key(&state) {
            if self.states != 0 || self.preallocated {
                return None;
            }
            self.elements.insert(
                state,
                Element {
                    data: vec![0; self.size as usize],
                    flags: 0,
                },
            );
        }
        self.elements.get_mut(&state)
    }
}

/// Tracks of one BIU
#[derive(Debug, Clone)]
pub struct TrackTable {
    tracks: Vec<Option<Track>>,
}

impl Default for TrackTable {
    fn default() -> Self {
        Self::new()
    }
}

fn word_index(base: u32, offset: i32) -> Option<u32> {
    base.checked_add_signed(offset)
}

impl TrackTable {
    pub fn new() -> Self {
        Self {
            tracks: vec![None; MAX_TRACKS as usize],
        }
    }

    fn slot(id: u32) -> Result<usize> {
        if id >= MAX_TRACKS {
            return Err(Error::ParameterOutOfRange);
        }
        Ok(id as usize)
    }

    pub fn is_enabled(&self, id: u32) -> bool {
        matches!(self.tracks.get(id as usize), Some(Some(_)))
    }

    /// Handle a TRACK_DEF request.  A track is always disabled first, so
    /// redefining an enabled track drops its stored data.
    pub fn define(&mut self, def: &TrackDef) -> Result<TrackDefined> {
        let ix = Self::slot(def.id)?;
        self.disable(ix);

        if def.mode == 0 {
            debug!("Track {} disabled", def.id);
            return Ok(TrackDefined {
                buffer_start: 0,
                interrupt: None,
            });
        }

        let kind = match def.bt {
            TRACK_TYPE_BC => TrackKind::Source(TrackSource::Bc(def.xid_rtsa as u16)),
            TRACK_TYPE_RT => TrackKind::Source(TrackSource::Rt {
                rt: ((def.xid_rtsa >> 8) & 0x1F) as u8,
                sa: (def.xid_rtsa & 0xFF) as u8,
                tx: def.xid_rtsa & 0x8000 != 0,
            }),
            TRACK_TYPE_MUX => {
                if def.xid_rtsa >= MAX_TRACKS {
                    return Err(Error::ParameterOutOfRange);
                }
                if !self.is_enabled(def.xid_rtsa) {
                    return Err(Error::ElementNotEnabled);
                }
                TrackKind::Mux(def.xid_rtsa as u8)
            }
            _ => return Err(Error::InvalidMode),
        };

        let blen = def.blen & 0xFF;
        let mask = if blen >= 16 {
            0xFFFF
        } else {
            ((1u32 << blen) - 1) as u16
        };
        let mut track = Track {
            kind,
            start: def.start as u16,
            bpos: (def.bpos & 0xF) as u8,
            mask,
            size: def.size as u16,
            states: def.states as u16,
            file_count: def.file_count as u16,
            offset: def.offset as i32,
            preallocated: false,
            last_time_tag: 0,
            rel_count: 0,
            elements: BTreeMap::new(),
        };
        for state in 0..track.states {
            track.elements.insert(
                state,
                Element {
                    data: vec![0; track.size as usize],
                    flags: 0,
                },
            );
        }

        let buffer_start = if track.elements.is_empty() {
            0
        } else {
            TRACK_BUFFER_ALLOCATED
        };
        let interrupt = match kind {
            TrackKind::Source(source) => Some(source),
            TrackKind::Mux(parent) => {
                if let Some(Some(p)) = self.tracks.get_mut(parent as usize) {
                    p.rel_count += 1;
                }
                None
            }
        };
        debug!(
            "Track {} enabled {:?} states {} size {}",
            def.id, kind, track.states, track.size
        );
        self.tracks[ix] = Some(track);

        Ok(TrackDefined {
            buffer_start,
            interrupt,
        })
    }

    fn disable(&mut self, ix: usize) {
        let Some(old) = self.tracks[ix].take() else {
            return;
        };
        if let TrackKind::Mux(parent) = old.kind {
            if let Some(Some(p)) = self.tracks.get_mut(parent as usize) {
                p.rel_count = p.rel_count.saturating_sub(1);
            }
        }
    }

    /// Handle a TRACK_READ request.  A non-zero `mode` clears the valid flag
    /// of the element read.
    pub fn read(&mut self, id: u32, state: u32, mode: u32) -> Result<TrackRead> {
        let ix = Self::slot(id)?;
        let Some(track) = self.tracks[ix].as_mut() else {
            return Err(Error::ElementNotEnabled);
        };
        let state = state as u16;
        if !track.accepts(state) {
            return Err(Error::ParameterOutOfRange);
        }

        let last_time_tag = track.last_time_tag;
        let Some(element) = track.elements.get_mut(&state) else {
            return Ok(TrackRead::default());
        };
        if element.flags & FLAG_VALID == 0 {
            return Ok(TrackRead::default());
        }
        if mode != 0 {
            element.flags &= !FLAG_VALID;
        }
        Ok(TrackRead {
            valid: true,
            last_time_tag,
            data: element.data.clone(),
        })
    }

    /// Handle a TRACK_SCAN request: return chunk `chunk` of `size` states
    /// holding valid data, in state order.
    pub fn scan(&self, id: u32, chunk: u32, size: u32) -> Result<TrackScan> {
        let ix = Self::slot(id)?;
        let mut scan = TrackScan::default();
        let Some(track) = self.tracks[ix].as_ref() else {
            return Ok(scan);
        };

        let first = (chunk as u64) * (size as u64);
        let end = first + size as u64;
        let valid = track
            .elements
            .iter()
            .filter(|(_, e)| e.flags & FLAG_VALID != 0)
            .map(|(state, _)| *state);
        for (found, state) in valid.enumerate() {
            let found = found as u64;
            if found >= end {
                scan.more = true;
                break;
            }
            if found >= first {
                scan.states.push(state);
            }
        }
        Ok(scan)
    }

    /// Handle a TRACK_ALLOC request.  Only tracks defined with no fixed state
    /// count take preallocated states; once called no further states are
    /// created on receive.
    pub fn alloc(&mut self, id: u32, states: &[u16]) -> Result<Vec<u32>> {
        let ix = Self::slot(id)?;
        let Some(track) = self.tracks[ix].as_mut() else {
            return Err(Error::ElementNotEnabled);
        };

        let mut buffer_start = Vec::new();
        if track.states == 0 {
            for state in states.iter() {
                if track.elements.contains_key(state) {
                    buffer_start.push(0);
                } else {
                    track.elements.insert(
                        *state,
                        Element {
                            data: vec![0; track.size as usize],
                            flags: 0,
                        },
                    );
                    buffer_start.push(TRACK_BUFFER_ALLOCATED);
                }
            }
        }
        track.preallocated = true;
        Ok(buffer_start)
    }

    /// Demultiplex the data buffer at `dbp` into every enabled track
    /// watching `source`.
    pub fn receive(
        &mut self,
        source: TrackSource,
        gram: &GlobalRam,
        dbp: u32,
        time_tag: u32,
    ) -> Result<()> {
        for ix in 0..self.tracks.len() {
            let watching = matches!(
                &self.tracks[ix],
                Some(t) if t.kind == TrackKind::Source(source)
            );
            if watching {
                self.receive_track(ix, gram, dbp, time_tag)?;
            }
        }
        Ok(())
    }

    fn receive_track(
        &mut self,
        ix: usize,
        gram: &GlobalRam,
        dbp: u32,
        time_tag: u32,
    ) -> Result<()> {
        let Some(track) = self.tracks[ix].as_mut() else {
            return Ok(());
        };
        let word = |k: u32| gram.read_u16(dbp + 2 * k);

        for i in 0..track.file_count as u32 {
            let file = track.start as u32 + i * track.size as u32;
            let state = (word(file)? >> track.bpos) & track.mask;
            if !track.accepts(state) {
                continue;
            }
            let Some(data_start) = word_index(file, track.offset) else {
                continue;
            };
            let mut data = Vec::with_capacity(track.size as usize);
            for k in 0..track.size as u32 {
                data.push(word(data_start + k)?);
            }
            if let Some(element) = track.element(state) {
                element.data.copy_from_slice(&data);
                element.flags |= FLAG_VALID | FLAG_UPDATED;
                track.last_time_tag = time_tag;
            } else {
                trace!("Track {ix} state {state} has no storage");
            }
        }

        if track.rel_count != 0 {
            self.receive_mux(ix as u8, time_tag);
        }

        if let Some(Some(track)) = self.tracks.get_mut(ix) {
            for element in track.elements.values_mut() {
                element.flags &= !FLAG_UPDATED;
            }
        }
        Ok(())
    }

    /// Run the mux tracks attached to `parent` over its freshly updated
    /// elements
    fn receive_mux(&mut self, parent: u8, time_tag: u32) {
        for ix in 0..self.tracks.len() {
            let Some(Some(mux)) = self.tracks.get(ix) else {
                continue;
            };
            if mux.kind != TrackKind::Mux(parent) {
                continue;
            }

            let Some(Some(p)) = self.tracks.get(parent as usize) else {
                break;
            };
            let Some(src) = p.elements.get(&mux.file_count) else {
                break;
            };
            if src.flags & FLAG_UPDATED == 0 {
                continue;
            }

            let start = mux.start as usize;
            let Some(raw) = src.data.get(start) else {
                continue;
            };
            let state = (*raw >> mux.bpos) & mux.mask;
            let Some(data_start) = word_index(mux.start as u32, mux.offset) else {
                continue;
            };
            let data_start = data_start as usize;
            let Some(data) = src.data.get(data_start..data_start + mux.size as usize) else {
                continue;
            };
            let data = data.to_vec();

            let Some(Some(mux)) = self.tracks.get_mut(ix) else {
                continue;
            };
            if !mux.accepts(state) {
                continue;
            }
            if let Some(element) = mux.element(state) {
                element.data.copy_from_slice(&data);
                element.flags = FLAG_VALID;
                mux.last_time_tag = time_tag;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DBP: u32 = 0x100;

    fn gram_with(words: &[u16]) -> GlobalRam {
        let mut gram = GlobalRam::new(0x1000).unwrap();
        for (k, w) in words.iter().enumerate() {
            gram.write_u16(DBP + 2 * k as u32, *w).unwrap();
        }
        gram
    }

    fn bc_track(id: u32, states: u32) -> TrackDef {
        // Two files of three words; the low byte of the first word of each
        // file is the multiplex value.
        TrackDef {
            id,
            bt: TRACK_TYPE_BC,
            xid_rtsa: 7,
            mode: 1,
            start: 0,
            bpos: 0,
            blen: 8,
            size: 3,
            states,
            file_count: 2,
            offset: 0,
        }
    }

    #[test]
    fn define_reports_storage_and_interrupt() {
        let mut tracks = TrackTable::new();
        let defined = tracks.define(&bc_track(1, 4)).unwrap();
        assert_eq!(defined.buffer_start, TRACK_BUFFER_ALLOCATED);
        assert_eq!(defined.interrupt, Some(TrackSource::Bc(7)));

        let dynamic = tracks.define(&bc_track(2, 0)).unwrap();
        assert_eq!(dynamic.buffer_start, 0);

        let rt = TrackDef {
            bt: TRACK_TYPE_RT,
            xid_rtsa: 0x8000 | (5 << 8) | 3,
            ..bc_track(3, 1)
        };
        assert_eq!(
            tracks.define(&rt).unwrap().interrupt,
            Some(TrackSource::Rt {
                rt: 5,
                sa: 3,
                tx: true
            })
        );

        let bad = TrackDef {
            bt: 9,
            ..bc_track(4, 1)
        };
        assert_eq!(tracks.define(&bad), Err(Error::InvalidMode));
        assert_eq!(tracks.define(&bc_track(256, 1)), Err(Error::ParameterOutOfRange));
    }

    #[test]
    fn receive_stores_files_by_state() {
        let mut tracks = TrackTable::new();
        tracks.define(&bc_track(1, 4)).unwrap();
        let gram = gram_with(&[0x0102, 0xAAAA, 0xBBBB, 0x0003, 0xCCCC, 0xDDDD]);
        tracks.receive(TrackSource::Bc(7), &gram, DBP, 0x1234).unwrap();

        let read = tracks.read(1, 2, 0).unwrap();
        assert!(read.valid);
        assert_eq!(read.last_time_tag, 0x1234);
        assert_eq!(read.data, [0x0102, 0xAAAA, 0xBBBB]);
        assert_eq!(tracks.read(1, 3, 0).unwrap().data, [0x0003, 0xCCCC, 0xDDDD]);
        assert!(!tracks.read(1, 0, 0).unwrap().valid);

        // Other transfers leave the track alone
        let other = gram_with(&[0x0001, 1, 1, 0x0001, 1, 1]);
        tracks.receive(TrackSource::Bc(8), &other, DBP, 0).unwrap();
        assert!(!tracks.read(1, 1, 0).unwrap().valid);
    }

    #[test]
    fn read_checks_state_and_clears_on_request() {
        let mut tracks = TrackTable::new();
        assert_eq!(tracks.read(1, 0, 0), Err(Error::ElementNotEnabled));

        tracks.define(&bc_track(1, 4)).unwrap();
        assert_eq!(tracks.read(1, 4, 0), Err(Error::ParameterOutOfRange));

        let gram = gram_with(&[0x0001, 5, 6, 0x0001, 7, 8]);
        tracks.receive(TrackSource::Bc(7), &gram, DBP, 0).unwrap();
        assert_eq!(tracks.read(1, 1, 1).unwrap().data, [1, 7, 8]);
        assert!(!tracks.read(1, 1, 0).unwrap().valid);
    }

    #[test]
    fn states_out_of_range_are_dropped() {
        let mut tracks = TrackTable::new();
        tracks.define(&bc_track(1, 2)).unwrap();
        let gram = gram_with(&[0x0005, 1, 2, 0x0001, 3, 4]);
        tracks.receive(TrackSource::Bc(7), &gram, DBP, 0).unwrap();
        let scan = tracks.scan(1, 0, 8).unwrap();
        assert_eq!(scan.states, [1]);
        assert!(!scan.more);
    }

    #[test]
    fn dynamic_states_and_preallocation() {
        let mut tracks = TrackTable::new();
        tracks.define(&bc_track(1, 0)).unwrap();
        let gram = gram_with(&[0x0040, 1, 2, 0x0010, 3, 4]);
        tracks.receive(TrackSource::Bc(7), &gram, DBP, 0).unwrap();
        assert_eq!(tracks.scan(1, 0, 8).unwrap().states, [0x10, 0x40]);

        tracks.define(&bc_track(2, 0)).unwrap();
        assert_eq!(
            tracks.alloc(2, &[0x10, 0x20, 0x10]).unwrap(),
            [TRACK_BUFFER_ALLOCATED, TRACK_BUFFER_ALLOCATED, 0]
        );
        tracks.receive(TrackSource::Bc(7), &gram, DBP, 0).unwrap();
        // 0x40 was not preallocated so it has no storage
        assert_eq!(tracks.scan(2, 0, 8).unwrap().states, [0x10]);

        // Fixed-state tracks ignore preallocation
        tracks.define(&bc_track(3, 4)).unwrap();
        assert!(tracks.alloc(3, &[1, 2]).unwrap().is_empty());
    }

    #[test]
    fn scan_returns_chunks() {
        let mut tracks = TrackTable::new();
        let def = TrackDef {
            file_count: 5,
            size: 1,
            ..bc_track(1, 0)
        };
        tracks.define(&def).unwrap();
        let gram = gram_with(&[4, 2, 9, 7, 1]);
        tracks.receive(TrackSource::Bc(7), &gram, DBP, 0).unwrap();

        let first = tracks.scan(1, 0, 2).unwrap();
        assert_eq!(first.states, [1, 2]);
        assert!(first.more);
        let last = tracks.scan(1, 2, 2).unwrap();
        assert_eq!(last.states, [9]);
        assert!(!last.more);
    }

    #[test]
    fn mux_track_demultiplexes_parent_state() {
        let mut tracks = TrackTable::new();
        let mux = TrackDef {
            id: 2,
            bt: TRACK_TYPE_MUX,
            xid_rtsa: 1,
            mode: 1,
            start: 1,
            bpos: 4,
            blen: 4,
            size: 1,
            states: 0,
            // Parent state to demultiplex
            file_count: 3,
            offset: 1,
        };
        assert_eq!(tracks.define(&mux), Err(Error::ElementNotEnabled));

        tracks.define(&bc_track(1, 4)).unwrap();
        tracks.define(&mux).unwrap();

        let gram = gram_with(&[0x0003, 0x0050, 0xBEEF, 0x0001, 0x0060, 0x1111]);
        tracks.receive(TrackSource::Bc(7), &gram, DBP, 0x99).unwrap();
        let read = tracks.read(2, 5, 0).unwrap();
        assert!(read.valid);
        assert_eq!(read.data, [0xBEEF]);
        assert_eq!(read.last_time_tag, 0x99);
        assert!(!tracks.read(2, 6, 0).unwrap().valid);

        // A receive which does not update parent state 3 leaves the mux alone
        tracks.read(2, 5, 1).unwrap();
        let gram = gram_with(&[0x0001, 0x0070, 0x2222, 0x0001, 0x0070, 0x2222]);
        tracks.receive(TrackSource::Bc(7), &gram, DBP, 0).unwrap();
        assert!(tracks.scan(2, 0, 8).unwrap().states.is_empty());
    }

    #[test]
    fn disabling_drops_data() {
        let mut tracks = TrackTable::new();
        tracks.define(&bc_track(1, 4)).unwrap();
        let gram = gram_with(&[0x0001, 5, 6, 0x0001, 7, 8]);
        tracks.receive(TrackSource::Bc(7), &gram, DBP, 0).unwrap();

        let off = TrackDef {
            mode: 0,
            ..bc_track(1, 4)
        };
        assert_eq!(tracks.define(&off).unwrap().buffer_start, 0);
        assert!(!tracks.is_enabled(1));
        assert_eq!(tracks.read(1, 1, 0), Err(Error::ElementNotEnabled));
    }
}
