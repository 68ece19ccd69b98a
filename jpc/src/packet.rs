use log::{debug, trace};

use crate::bit_reader::{BitCursor, BitReader, BitSource, ByteSource};
use crate::codeblock::{parse_codeblock_length, CodeblockState};
use crate::coding_passes::parse_coding_passes;
use crate::structure::{CodeblockStyle, PrecinctStructure};
use crate::tag_tree::TagTree;
use crate::transaction::Transaction;
use crate::{PacketError, MARKER_SYMBOL_EPH, MARKER_SYMBOL_SOP};

// Marker, Lsop and Nsop
const SOP_SEGMENT_LENGTH: u64 = 6;
const LSOP: u16 = 4;

/// What one packet contributes for a single codeblock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeblockContribution {
    pub subband: usize,
    /// Raster index of the codeblock within its subband of the precinct.
    pub codeblock: usize,
    /// Absolute offset of the contribution in the packet body.
    pub byte_start: u64,
    pub body_length: u32,
    /// Coding passes added by this packet.
    pub coding_passes: u32,
    /// Set when the codeblock is included for the first time.
    pub zero_bit_planes: Option<u32>,
    /// Lengths of the codeword segments making up `body_length`.
    pub segments: Vec<u32>,
}

impl CodeblockContribution {
    pub fn byte_end(&self) -> u64 {
        self.byte_start + self.body_length as u64
    }
}

/// Header and body extent of one quality layer's packet in a precinct.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PacketLayer {
    pub layer: u16,
    pub header_start: u64,
    /// Header bytes, including SOP and EPH when present.
    pub header_length: u64,
    pub body_length: u64,
    pub codeblocks: Vec<CodeblockContribution>,
}

impl PacketLayer {
    pub fn header_end(&self) -> u64 {
        self.header_start + self.header_length
    }

    pub fn end(&self) -> u64 {
        self.header_end() + self.body_length
    }

    /// Whether the packet signalled no codeblock contribution at all.
    pub fn is_empty(&self) -> bool {
        self.codeblocks.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq)]
struct SubbandState {
    width: usize,
    inclusion: TagTree,
    zero_bit_planes: TagTree,
    codeblocks: Vec<CodeblockState>,
}

/// Everything the packet headers of a precinct have revealed so far.
#[derive(Debug, Clone, PartialEq)]
pub struct PrecinctState {
    cursor: BitCursor,
    subbands: Vec<SubbandState>,
}

impl PrecinctState {
    fn new(structure: &PrecinctStructure, start_offset: u64) -> Self {
        PrecinctState {
            cursor: BitCursor::at(start_offset),
            subbands: structure
                .subbands
                .iter()
                .map(|subband| SubbandState {
                    width: subband.width as usize,
                    inclusion: TagTree::new(subband.width as usize, subband.height as usize),
                    zero_bit_planes: TagTree::new(subband.width as usize, subband.height as usize),
                    codeblocks: vec![CodeblockState::default(); subband.count()],
                })
                .collect(),
        }
    }

    /// Where the next packet starts.
    pub fn cursor(&self) -> BitCursor {
        self.cursor
    }

    pub fn codeblock(&self, subband: usize, codeblock: usize) -> Option<&CodeblockState> {
        self.subbands.get(subband)?.codeblocks.get(codeblock)
    }
}

/// Walks the packets of one precinct layer by layer, remembering every layer it parsed.
///
/// Parsing a layer either succeeds and is recorded, or fails and leaves no trace: the precinct
/// state is only replaced once the whole packet header was read.
#[derive(Debug, Clone)]
pub struct PacketLengthCalculator {
    structure: PrecinctStructure,
    start_offset: u64,
    state: PrecinctState,
    layers: Vec<PacketLayer>,
    operations: u64,
}

impl PacketLengthCalculator {
    pub fn new(structure: PrecinctStructure, start_offset: u64) -> Self {
        let state = PrecinctState::new(&structure, start_offset);
        PacketLengthCalculator {
            structure,
            start_offset,
            state,
            layers: Vec::new(),
            operations: 0,
        }
    }

    pub fn structure(&self) -> &PrecinctStructure {
        &self.structure
    }

    pub fn start_offset(&self) -> u64 {
        self.start_offset
    }

    pub fn state(&self) -> &PrecinctState {
        &self.state
    }

    /// Layers parsed so far, in order.
    pub fn layers(&self) -> &[PacketLayer] {
        &self.layers
    }

    /// Bit reader operations issued over the lifetime of the calculator.
    pub fn operations(&self) -> u64 {
        self.operations
    }

    /// The packet of `layer`, parsing every layer before it that is not known yet.
    pub fn calculate_layer<S: ByteSource + ?Sized>(
        &mut self,
        source: &S,
        layer: u16,
    ) -> Result<&PacketLayer, PacketError> {
        if layer >= self.structure.num_quality_layers {
            debug_assert!(false, "quality layer beyond the precinct's layers");
            return Err(PacketError::Usage {
                reason: "quality layer beyond the precinct's layers",
            });
        }
        while self.layers.len() <= layer as usize {
            self.parse_next_layer(source)?;
        }
        Ok(&self.layers[layer as usize])
    }

    /// Parses the packet following the last known one.
    pub fn parse_next_layer<S: ByteSource + ?Sized>(
        &mut self,
        source: &S,
    ) -> Result<&PacketLayer, PacketError> {
        let layer = self.layers.len() as u16;
        if layer >= self.structure.num_quality_layers {
            return Err(PacketError::Usage {
                reason: "every quality layer already parsed",
            });
        }

        let mut state = Transaction::begin(&mut self.state);
        let mut reader = BitReader::new(source, state.cursor);
        let result = parse_packet(&mut reader, &mut state, &self.structure, layer);
        self.operations += reader.operations();

        let packet = match result {
            Ok(packet) => packet,
            Err(e) => {
                trace!("packet of layer {} not parsed: {}", layer, e);
                return Err(e);
            }
        };
        state.cursor = BitCursor::at(packet.end());
        state.commit();
        debug!(
            "layer {} packet at {}, header {} bytes, body {} bytes",
            layer, packet.header_start, packet.header_length, packet.body_length
        );
        self.layers.push(packet);
        Ok(&self.layers[layer as usize])
    }
}

// B.9 / B.10 One packet: optional SOP, header bits, optional EPH.
fn parse_packet<S: ByteSource + ?Sized>(
    reader: &mut BitReader<'_, S>,
    state: &mut PrecinctState,
    structure: &PrecinctStructure,
    layer: u16,
) -> Result<PacketLayer, PacketError> {
    reader.align_to_byte()?;
    let header_start = reader.byte_offset()?;

    // A header byte following 0xFF has its top bit clear, so only 0xFF can start SOP
    if structure.coding_style.sop
        && reader.peek_bytes::<1>()?[0] == MARKER_SYMBOL_SOP[0]
        && reader.peek_bytes::<2>()? == MARKER_SYMBOL_SOP
    {
        let segment = reader.peek_bytes::<6>()?;
        if u16::from_be_bytes([segment[2], segment[3]]) != LSOP {
            return Err(PacketError::MarkerMalformed {
                marker: MARKER_SYMBOL_SOP,
                offset: header_start,
            });
        }
        reader.skip_bytes(SOP_SEGMENT_LENGTH)?;
    }

    let mut codeblocks = Vec::new();
    // B.10.3 A leading 0 bit signals an empty packet
    if reader.shift_bit()? == 1 {
        for (index, subband) in state.subbands.iter_mut().enumerate() {
            parse_subband(
                reader,
                subband,
                index,
                layer,
                &structure.codeblock_style,
                &mut codeblocks,
            )?;
        }
    }
    reader.align_to_byte()?;

    if structure.coding_style.eph {
        let offset = reader.byte_offset()?;
        if reader.peek_bytes::<2>()? != MARKER_SYMBOL_EPH {
            return Err(PacketError::MarkerMissing {
                marker: MARKER_SYMBOL_EPH,
                offset,
            });
        }
        reader.skip_bytes(2)?;
    }
    let header_end = reader.byte_offset()?;

    let mut body_length = 0;
    for contribution in codeblocks.iter_mut() {
        contribution.byte_start = header_end + body_length;
        body_length += contribution.body_length as u64;
    }

    Ok(PacketLayer {
        layer,
        header_start,
        header_length: header_end - header_start,
        body_length,
        codeblocks,
    })
}

fn parse_subband<S: ByteSource + ?Sized>(
    reader: &mut BitReader<'_, S>,
    subband: &mut SubbandState,
    subband_index: usize,
    layer: u16,
    style: &CodeblockStyle,
    contributions: &mut Vec<CodeblockContribution>,
) -> Result<(), PacketError> {
    let SubbandState {
        width,
        inclusion,
        zero_bit_planes,
        codeblocks,
    } = subband;

    for (index, codeblock) in codeblocks.iter_mut().enumerate() {
        let x = index % *width;
        let y = index / *width;

        // B.10.4 Code-block inclusion
        let included = if codeblock.is_included() {
            reader.shift_bit()? == 1
        } else {
            inclusion.query_le(x, y, layer as u32, reader)?
        };
        if !included {
            continue;
        }

        // B.10.5 Zero bit-plane information
        let first_zero_bit_planes = if codeblock.is_included() {
            None
        } else {
            let value = zero_bit_planes.exact_value(x, y, reader)?;
            codeblock.include(value, subband_index, index)?;
            Some(value)
        };

        // B.10.6, B.10.7
        let coding_passes = parse_coding_passes(reader)?;
        let segments = parse_codeblock_length(reader, codeblock, coding_passes, style)?;
        let body_length = segments.iter().sum();
        trace!(
            "subband {} codeblock {}: {} passes, {} bytes",
            subband_index,
            index,
            coding_passes,
            body_length
        );

        contributions.push(CodeblockContribution {
            subband: subband_index,
            codeblock: index,
            byte_start: 0,
            body_length,
            coding_passes,
            zero_bit_planes: first_zero_bit_planes,
            segments,
        });
    }
    Ok(())
}
