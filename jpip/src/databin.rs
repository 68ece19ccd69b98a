use log::{debug, info};
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::{Arc, OnceLock};

use jpc::{ByteSource, CodestreamStructure, QualityLayersCache, TileCoding};

use crate::tracker::TrackerId;
use crate::DatabinError;

/// Data-bin classes of a JPP-stream (ISO/IEC 15444-9 Table A.2).
///
/// Extended classes carry an extra Aux field on the wire but address the same data as their
/// base class, so only base classes are ever cached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DatabinClass {
    Precinct,
    TileHeader,
    Tile,
    MainHeader,
    Metadata,
}

impl DatabinClass {
    pub fn from_class_id(class_id: u64) -> Option<DatabinClass> {
        match class_id {
            0 | 1 => Some(DatabinClass::Precinct),
            2 => Some(DatabinClass::TileHeader),
            4 | 5 => Some(DatabinClass::Tile),
            6 => Some(DatabinClass::MainHeader),
            8 => Some(DatabinClass::Metadata),
            _ => None,
        }
    }

    pub fn class_id(&self) -> u64 {
        match self {
            DatabinClass::Precinct => 0,
            DatabinClass::TileHeader => 2,
            DatabinClass::Tile => 4,
            DatabinClass::MainHeader => 6,
            DatabinClass::Metadata => 8,
        }
    }

    /// Whether `class_id` is an extended class followed by an Aux value.
    pub fn is_extended(class_id: u64) -> bool {
        class_id & 1 == 1
    }
}

impl fmt::Display for DatabinClass {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            DatabinClass::Precinct => "precinct",
            DatabinClass::TileHeader => "tile-header",
            DatabinClass::Tile => "tile",
            DatabinClass::MainHeader => "main-header",
            DatabinClass::Metadata => "metadata",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DatabinId {
    pub class: DatabinClass,
    pub in_class_id: u64,
}

impl DatabinId {
    pub fn new(class: DatabinClass, in_class_id: u64) -> Self {
        DatabinId { class, in_class_id }
    }

    pub fn main_header() -> Self {
        DatabinId::new(DatabinClass::MainHeader, 0)
    }

    pub fn tile_header(tile: u32) -> Self {
        DatabinId::new(DatabinClass::TileHeader, tile as u64)
    }

    pub fn precinct(in_class_id: u64) -> Self {
        DatabinId::new(DatabinClass::Precinct, in_class_id)
    }
}

impl fmt::Display for DatabinId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}:{}", self.class, self.in_class_id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub length: u64,
}

impl ByteRange {
    pub fn end(&self) -> u64 {
        self.start + self.length
    }
}

/// Bytes to copy out of a databin. Without a length the copy runs to the declared length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CopyRange {
    pub start: u64,
    pub length: Option<u64>,
}

#[derive(Debug)]
struct Part {
    offset: u64,
    bytes: Vec<u8>,
}

impl Part {
    fn end(&self) -> u64 {
        self.offset + self.bytes.len() as u64
    }
}

/// Kinds of state other parsers keep alongside a databin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtensionKind {
    /// Decoded main header, on the main header databin.
    CodestreamStructure,
    /// Decoded coding parameters, on a tile header databin.
    TileCoding,
    /// Packet header parsing state, on a precinct databin.
    QualityLayers,
}

/// Lazily populated, per-databin parser state. Each kind is set at most once for the lifetime
/// of the databin.
#[derive(Debug, Default)]
pub struct DatabinExtensions {
    codestream_structure: OnceLock<Arc<CodestreamStructure>>,
    tile_coding: OnceLock<TileCoding>,
    quality_layers: OnceLock<Mutex<QualityLayersCache>>,
}

impl DatabinExtensions {
    pub fn contains(&self, kind: ExtensionKind) -> bool {
        match kind {
            ExtensionKind::CodestreamStructure => self.codestream_structure.get().is_some(),
            ExtensionKind::TileCoding => self.tile_coding.get().is_some(),
            ExtensionKind::QualityLayers => self.quality_layers.get().is_some(),
        }
    }

    pub fn codestream_structure(&self) -> Option<Arc<CodestreamStructure>> {
        self.codestream_structure.get().cloned()
    }

    pub fn set_codestream_structure(
        &self,
        structure: Arc<CodestreamStructure>,
    ) -> Arc<CodestreamStructure> {
        self.codestream_structure.get_or_init(|| structure).clone()
    }

    pub fn tile_coding(&self) -> Option<&TileCoding> {
        self.tile_coding.get()
    }

    pub fn set_tile_coding(&self, coding: TileCoding) -> &TileCoding {
        self.tile_coding.get_or_init(|| coding)
    }

    /// The packet parsing state of a precinct databin, created by `init` on first use.
    pub fn quality_layers(
        &self,
        init: impl FnOnce() -> QualityLayersCache,
    ) -> &Mutex<QualityLayersCache> {
        self.quality_layers.get_or_init(|| Mutex::new(init()))
    }
}

/// A sparse, incrementally filled copy of one JPIP data-bin.
///
/// Parts are kept sorted by offset and never overlap or touch. Bytes, once stored, never change,
/// and the declared length is set at most once.
#[derive(Debug)]
pub struct Databin {
    id: DatabinId,
    parts: Vec<Part>,
    declared_length: Option<u64>,
    loaded_bytes: u64,
    listeners: BTreeSet<TrackerId>,
    extensions: DatabinExtensions,
}

impl Databin {
    pub fn new(id: DatabinId) -> Self {
        Databin {
            id,
            parts: Vec::new(),
            declared_length: None,
            loaded_bytes: 0,
            listeners: BTreeSet::new(),
            extensions: DatabinExtensions::default(),
        }
    }

    pub fn id(&self) -> DatabinId {
        self.id
    }

    /// Fails when this is not the databin the caller meant to look at.
    pub fn check_identity(&self, expected: DatabinId) -> Result<(), DatabinError> {
        if self.id != expected {
            debug_assert!(false, "databin {} used as {}", self.id, expected);
            return Err(DatabinError::IdentityMismatch {
                expected,
                actual: self.id,
            });
        }
        Ok(())
    }

    pub fn declared_length(&self) -> Option<u64> {
        self.declared_length
    }

    /// Number of distinct bytes held.
    pub fn loaded_bytes(&self) -> u64 {
        self.loaded_bytes
    }

    pub fn extensions(&self) -> &DatabinExtensions {
        &self.extensions
    }

    /// Merges an arrival into the databin. Returns true when this arrival completed it.
    ///
    /// Nothing changes when the arrival is rejected.
    pub fn add_data(
        &mut self,
        offset: u64,
        bytes: &[u8],
        is_last_byte: bool,
    ) -> Result<bool, DatabinError> {
        let end = offset + bytes.len() as u64;
        let was_complete = self.is_fully_loaded();

        let declared_length = match (self.declared_length, is_last_byte) {
            (Some(declared), true) if declared != end => {
                return Err(DatabinError::LengthRedeclared {
                    id: self.id,
                    declared,
                    redeclared: end,
                });
            }
            (None, true) => Some(end),
            (declared, _) => declared,
        };
        if let Some(declared) = declared_length {
            let highest = self.parts.last().map_or(0, Part::end).max(end);
            if highest > declared {
                return Err(DatabinError::BeyondDeclaredLength {
                    id: self.id,
                    declared,
                    end: highest,
                });
            }
        }
        self.declared_length = declared_length;

        if !bytes.is_empty() {
            self.merge(offset, bytes);
        }

        let completed = !was_complete && self.is_fully_loaded();
        debug!(
            "databin {} got {} bytes at {}, {} loaded",
            self.id,
            bytes.len(),
            offset,
            self.loaded_bytes
        );
        if completed {
            info!("databin {} complete, {} bytes", self.id, self.loaded_bytes);
        }
        Ok(completed)
    }

    // Joins the new bytes with every part they overlap or touch. Bytes already held win.
    fn merge(&mut self, offset: u64, bytes: &[u8]) {
        let end = offset + bytes.len() as u64;
        let first = self.parts.partition_point(|part| part.end() < offset);
        let last = self.parts.partition_point(|part| part.offset <= end);

        let merged_start = self.parts[first..last]
            .first()
            .map_or(offset, |part| part.offset.min(offset));
        let merged_end = self.parts[first..last]
            .last()
            .map_or(end, |part| part.end().max(end));

        let mut merged = vec![0u8; (merged_end - merged_start) as usize];
        let at = (offset - merged_start) as usize;
        merged[at..at + bytes.len()].copy_from_slice(bytes);
        for part in self.parts.drain(first..last) {
            let at = (part.offset - merged_start) as usize;
            merged[at..at + part.bytes.len()].copy_from_slice(&part.bytes);
        }
        self.parts.insert(
            first,
            Part {
                offset: merged_start,
                bytes: merged,
            },
        );
        self.loaded_bytes = self.parts.iter().map(|part| part.bytes.len() as u64).sum();
    }

    /// True when the held bytes are exactly `[0, declared_length)`.
    pub fn is_fully_loaded(&self) -> bool {
        match (self.declared_length, self.parts.as_slice()) {
            (Some(0), []) => true,
            (Some(declared), [part]) => part.offset == 0 && part.end() == declared,
            _ => false,
        }
    }

    pub fn existing_ranges(&self) -> Vec<ByteRange> {
        self.parts
            .iter()
            .map(|part| ByteRange {
                start: part.offset,
                length: part.bytes.len() as u64,
            })
            .collect()
    }

    // The part holding `offset`, if any.
    fn part_at(&self, offset: u64) -> Option<&Part> {
        let index = self.parts.partition_point(|part| part.end() <= offset);
        self.parts.get(index).filter(|part| part.offset <= offset)
    }

    /// Copies cached bytes of `range` into `dest[dest_offset..]`.
    ///
    /// With `force_all` either every requested byte is copied or nothing is and `None` is
    /// returned. Otherwise the contiguous run starting at `range.start` is copied and its length
    /// returned, which may be 0.
    pub fn copy_bytes(
        &self,
        dest: &mut [u8],
        dest_offset: usize,
        range: CopyRange,
        force_all: bool,
    ) -> Option<usize> {
        let space = dest.len().saturating_sub(dest_offset) as u64;
        let requested_end = match (range.length, self.declared_length) {
            (Some(length), _) => range.start + length,
            (None, Some(declared)) => declared,
            (None, None) if force_all => return None,
            (None, None) => u64::MAX,
        };
        let end = requested_end.min(range.start.saturating_add(space));

        if force_all {
            if requested_end > range.start + space {
                debug_assert!(false, "copy destination too small");
                return None;
            }
            if !self.contains_range(range.start, end) {
                return None;
            }
        }
        if end <= range.start {
            return Some(0);
        }

        let part = match self.part_at(range.start) {
            Some(part) => part,
            None => return Some(0),
        };
        let end = end.min(part.end());
        let from = (range.start - part.offset) as usize;
        let count = (end - range.start) as usize;
        dest[dest_offset..dest_offset + count].copy_from_slice(&part.bytes[from..from + count]);
        Some(count)
    }

    pub fn listeners(&self) -> impl Iterator<Item = TrackerId> + '_ {
        self.listeners.iter().copied()
    }

    pub fn subscribe(&mut self, listener: TrackerId) {
        self.listeners.insert(listener);
    }

    pub fn unsubscribe(&mut self, listener: TrackerId) {
        self.listeners.remove(&listener);
    }
}

impl ByteSource for Databin {
    fn copy_bytes_at(&self, offset: u64, dest: &mut [u8]) -> usize {
        let range = CopyRange {
            start: offset,
            length: Some(dest.len() as u64),
        };
        self.copy_bytes(dest, 0, range, false).unwrap_or(0)
    }

    fn contains_range(&self, start: u64, end: u64) -> bool {
        if start >= end {
            return true;
        }
        self.part_at(start).is_some_and(|part| part.end() >= end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn databin() -> Databin {
        Databin::new(DatabinId::precinct(3))
    }

    fn ranges(databin: &Databin) -> Vec<(u64, u64)> {
        databin
            .existing_ranges()
            .iter()
            .map(|range| (range.start, range.length))
            .collect()
    }

    #[test]
    fn test_merge_adjacent_and_overlapping() {
        let mut databin = databin();
        databin.add_data(10, &[10, 11, 12], false).unwrap();
        databin.add_data(0, &[0, 1, 2], false).unwrap();
        assert_eq!(ranges(&databin), vec![(0, 3), (10, 3)]);

        // touches the first part
        databin.add_data(3, &[3, 4], false).unwrap();
        assert_eq!(ranges(&databin), vec![(0, 5), (10, 3)]);

        // bridges both
        databin.add_data(4, &[4, 5, 6, 7, 8, 9, 10], false).unwrap();
        assert_eq!(ranges(&databin), vec![(0, 13)]);
        assert_eq!(databin.loaded_bytes(), 13);

        let mut dest = [0u8; 13];
        let copied = databin.copy_bytes(
            &mut dest,
            0,
            CopyRange {
                start: 0,
                length: Some(13),
            },
            true,
        );
        assert_eq!(copied, Some(13));
        assert_eq!(dest.to_vec(), (0u8..13).collect::<Vec<_>>());
    }

    #[test]
    fn test_bytes_once_stored_do_not_change() {
        let mut databin = databin();
        databin.add_data(0, &[1, 2, 3], false).unwrap();
        databin.add_data(1, &[9, 9, 9], false).unwrap();
        let mut dest = [0u8; 4];
        databin.copy_bytes(
            &mut dest,
            0,
            CopyRange {
                start: 0,
                length: Some(4),
            },
            true,
        );
        assert_eq!(dest, [1, 2, 3, 9]);
    }

    #[test]
    fn test_declared_length() {
        let mut databin = databin();
        assert!(!databin.add_data(2, &[2, 3], true).unwrap());
        assert_eq!(databin.declared_length(), Some(4));
        assert!(!databin.is_fully_loaded());
        assert!(databin.add_data(0, &[0, 1], false).unwrap());
        assert!(databin.is_fully_loaded());
        // completing twice is reported once
        assert!(!databin.add_data(0, &[0], false).unwrap());
    }

    #[test]
    fn test_empty_databin_complete() {
        let mut databin = databin();
        assert!(databin.add_data(0, &[], true).unwrap());
        assert!(databin.is_fully_loaded());
        assert_eq!(databin.loaded_bytes(), 0);
    }

    #[test]
    fn test_redeclared_length_rejected() {
        let mut databin = databin();
        databin.add_data(0, &[0, 1], true).unwrap();
        assert!(matches!(
            databin.add_data(0, &[0, 1, 2], true),
            Err(DatabinError::LengthRedeclared {
                declared: 2,
                redeclared: 3,
                ..
            })
        ));
        assert_eq!(ranges(&databin), vec![(0, 2)]);
    }

    #[test]
    fn test_beyond_declared_length_rejected() {
        let mut databin = databin();
        databin.add_data(0, &[0, 1], true).unwrap();
        assert!(matches!(
            databin.add_data(2, &[2], false),
            Err(DatabinError::BeyondDeclaredLength { .. })
        ));
        // declaring a length below bytes already held is rejected too
        let mut databin = Databin::new(DatabinId::precinct(4));
        databin.add_data(5, &[5, 6], false).unwrap();
        assert!(databin.add_data(0, &[0], true).is_err());
        assert_eq!(databin.declared_length(), None);
        assert_eq!(ranges(&databin), vec![(5, 2)]);
    }

    #[test]
    fn test_copy_bytes_partial_and_unavailable() {
        let mut databin = databin();
        databin.add_data(0, &[0, 1, 2], false).unwrap();
        databin.add_data(5, &[5, 6], false).unwrap();
        let mut dest = [0u8; 8];

        let range = CopyRange {
            start: 1,
            length: Some(6),
        };
        assert_eq!(databin.copy_bytes(&mut dest, 0, range, true), None);
        assert_eq!(dest, [0; 8]);
        assert_eq!(databin.copy_bytes(&mut dest, 2, range, false), Some(2));
        assert_eq!(dest[2..4], [1, 2]);

        // nothing held at the start is zero bytes, not unavailable
        let range = CopyRange {
            start: 3,
            length: Some(1),
        };
        assert_eq!(databin.copy_bytes(&mut dest, 0, range, false), Some(0));

        // no length and no declared length is unknown for a forced copy
        let range = CopyRange {
            start: 5,
            length: None,
        };
        assert_eq!(databin.copy_bytes(&mut dest, 0, range, true), None);
        assert_eq!(databin.copy_bytes(&mut dest, 0, range, false), Some(2));
    }

    #[test]
    fn test_byte_source() {
        let mut databin = databin();
        databin.add_data(2, &[2, 3, 4], false).unwrap();
        assert!(databin.contains_range(2, 5));
        assert!(!databin.contains_range(1, 3));
        assert!(!databin.contains_range(4, 6));
        let mut dest = [0u8; 4];
        assert_eq!(databin.copy_bytes_at(3, &mut dest), 2);
        assert_eq!(databin.copy_bytes_at(0, &mut dest), 0);
    }

    #[test]
    fn test_listeners() {
        let mut databin = databin();
        databin.subscribe(TrackerId(1));
        databin.subscribe(TrackerId(2));
        databin.unsubscribe(TrackerId(1));
        databin.unsubscribe(TrackerId(1));
        assert_eq!(databin.listeners().collect::<Vec<_>>(), vec![TrackerId(2)]);
    }
}
