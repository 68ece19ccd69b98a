//! JPEG 2000 codestream pieces needed to find packet boundaries without decoding any image data.
//!
//! The parsers here read from a [`ByteSource`] that may be missing bytes. Every parser either
//! completes or fails with [`PacketError::NeedMoreData`] and leaves its state as it was, so it can
//! be retried once more bytes arrived.

use std::error;
use std::fmt;

mod bit_reader;
mod codeblock;
mod coding_passes;
mod markers;
mod packet;
mod quality_layers;
mod structure;
mod tag_tree;
mod transaction;

pub use bit_reader::{BitCursor, BitReader, BitSource, ByteSource};
pub use codeblock::{parse_codeblock_length, CodeblockState};
pub use coding_passes::{parse_coding_passes, MAX_CODING_PASSES};
pub use markers::{decode_main_header, decode_tile_header};
pub use packet::{CodeblockContribution, PacketLayer, PacketLengthCalculator, PrecinctState};
pub use quality_layers::{CompleteLayers, QualityLayersCache};
pub use structure::{
    CodeblockStyle, CodestreamStructure, CodingStyle, ComponentCoding, ComponentSampling,
    ImageGeometry, PrecinctSize, PrecinctStructure, ProgressionOrder, Rect, SubbandCodeblocks,
    TileCoding, TileStructure,
};
pub use tag_tree::{TagTree, TagTreeNode};
pub use transaction::Transaction;

pub type MarkerSymbol = [u8; 2];

// Delimiting markers and marker segments
pub const MARKER_SYMBOL_SOC: MarkerSymbol = [255, 79]; // Start of code stream
pub const MARKER_SYMBOL_SOT: MarkerSymbol = [255, 144]; // Start of tile-part
pub const MARKER_SYMBOL_SOD: MarkerSymbol = [255, 147]; // Start of data
pub const MARKER_SYMBOL_EOC: MarkerSymbol = [255, 217]; // End of codestream

// Fixed information marker segments
pub const MARKER_SYMBOL_SIZ: MarkerSymbol = [255, 81]; // Image and tile size

// Functional marker segments
pub const MARKER_SYMBOL_COD: MarkerSymbol = [255, 82]; // Coding style default
pub const MARKER_SYMBOL_COC: MarkerSymbol = [255, 83]; // Coding style component

// In bit stream markers and marker segments
pub const MARKER_SYMBOL_SOP: MarkerSymbol = [255, 145]; // Start of packet
pub const MARKER_SYMBOL_EPH: MarkerSymbol = [255, 146]; // End of packet header

/// Failure while parsing packet headers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PacketError {
    /// The bytes needed have not arrived yet. Nothing was consumed.
    NeedMoreData,
    /// A byte following 0xFF had its most significant bit set.
    StuffingViolation { offset: u64 },
    /// A marker that has to be present is not.
    MarkerMissing { marker: MarkerSymbol, offset: u64 },
    /// A marker is present but its segment is not well formed.
    MarkerMalformed { marker: MarkerSymbol, offset: u64 },
    InvalidCodingStyle { value: u8 },
    InvalidCodeblockStyle { value: u8 },
    /// The Lblock increment ran past the largest length field width.
    LblockOverflow { offset: u64 },
    /// A codeblock got a second, different zero bit-plane count.
    ZeroBitPlaneMismatch {
        subband: usize,
        codeblock: usize,
        known: u32,
        decoded: u32,
    },
    /// The parser was driven in a way it does not support.
    Usage { reason: &'static str },
}

impl PacketError {
    /// Whether retrying after more bytes arrive can succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, PacketError::NeedMoreData)
    }
}

impl error::Error for PacketError {}
impl fmt::Display for PacketError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::NeedMoreData => write!(f, "insufficient data"),
            Self::StuffingViolation { offset } => {
                write!(f, "bit stuffing violation at byte offset {}", offset)
            }
            Self::MarkerMissing { marker, offset } => {
                write!(
                    f,
                    "missing marker 0x{:0>2X?}{:0>2X?} at byte offset {}",
                    marker[0], marker[1], offset
                )
            }
            Self::MarkerMalformed { marker, offset } => {
                write!(
                    f,
                    "malformed marker 0x{:0>2X?}{:0>2X?} at byte offset {}",
                    marker[0], marker[1], offset
                )
            }
            Self::InvalidCodingStyle { value } => {
                write!(f, "invalid coding style 0b{:0>8b}", value)
            }
            Self::InvalidCodeblockStyle { value } => {
                write!(f, "invalid codeblock style 0b{:0>8b}", value)
            }
            Self::LblockOverflow { offset } => {
                write!(f, "Lblock overflow near byte offset {}", offset)
            }
            Self::ZeroBitPlaneMismatch {
                subband,
                codeblock,
                known,
                decoded,
            } => {
                write!(
                    f,
                    "codeblock {} of subband {} has {} zero bit-planes, decoded {}",
                    codeblock, subband, known, decoded
                )
            }
            Self::Usage { reason } => write!(f, "usage error: {}", reason),
        }
    }
}

/// Failure while reading codestream headers or navigating their structure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CodestreamError {
    MarkerError {
        marker: MarkerSymbol,
        error: String,
    },
    MarkerMissing {
        marker: MarkerSymbol,
    },
    MarkerUnexpected {
        marker: MarkerSymbol,
        offset: u64,
    },
    TileIndexOutOfRange {
        tile: u32,
        num_tiles: u32,
    },
    ComponentIndexOutOfRange {
        component: u16,
        num_components: u16,
    },
    ResolutionOutOfRange {
        resolution: u8,
        num_resolutions: u8,
    },
    PrecinctIndexOutOfRange {
        precinct: u32,
        num_precincts: u32,
    },
}

impl error::Error for CodestreamError {}
impl fmt::Display for CodestreamError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::MarkerError { marker, error } => {
                write!(
                    f,
                    "marker 0x{:0>2X?}{:0>2X?} error {:?}",
                    marker[0], marker[1], error
                )
            }
            Self::MarkerMissing { marker } => {
                write!(f, "missing marker 0x{:0>2X?}{:0>2X?}", marker[0], marker[1])
            }
            Self::MarkerUnexpected { marker, offset } => {
                write!(
                    f,
                    "unexpected marker 0x{:0>2X?}{:0>2X?} at byte offset {}",
                    marker[0], marker[1], offset
                )
            }
            Self::TileIndexOutOfRange { tile, num_tiles } => {
                write!(f, "tile {} out of range, {} tiles", tile, num_tiles)
            }
            Self::ComponentIndexOutOfRange {
                component,
                num_components,
            } => {
                write!(
                    f,
                    "component {} out of range, {} components",
                    component, num_components
                )
            }
            Self::ResolutionOutOfRange {
                resolution,
                num_resolutions,
            } => {
                write!(
                    f,
                    "resolution level {} out of range, {} levels",
                    resolution, num_resolutions
                )
            }
            Self::PrecinctIndexOutOfRange {
                precinct,
                num_precincts,
            } => {
                write!(
                    f,
                    "precinct {} out of range, {} precincts",
                    precinct, num_precincts
                )
            }
        }
    }
}
