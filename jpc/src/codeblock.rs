use log::trace;

use crate::bit_reader::{BitReader, ByteSource};
use crate::structure::CodeblockStyle;
use crate::PacketError;

const INITIAL_LBLOCK: u32 = 3;

// Lblock plus floor(log2(passes)) has to fit the 32 bit length reads.
const MAX_LBLOCK_INCREMENT: u32 = 32 - INITIAL_LBLOCK;

/// What packet headers have told so far about one codeblock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeblockState {
    included: bool,
    lblock: u32,
    coding_passes: u32,
    zero_bit_planes: Option<u32>,
    non_empty_layers: u32,
}

impl Default for CodeblockState {
    fn default() -> Self {
        CodeblockState {
            included: false,
            lblock: INITIAL_LBLOCK,
            coding_passes: 0,
            zero_bit_planes: None,
            non_empty_layers: 0,
        }
    }
}

impl CodeblockState {
    pub fn is_included(&self) -> bool {
        self.included
    }

    pub fn lblock(&self) -> u32 {
        self.lblock
    }

    /// Coding passes included over all layers parsed so far.
    pub fn coding_passes(&self) -> u32 {
        self.coding_passes
    }

    pub fn zero_bit_planes(&self) -> Option<u32> {
        self.zero_bit_planes
    }

    /// Records the first inclusion of the codeblock together with its zero bit-plane count.
    ///
    /// Packet headers never repeat the count, so a second, different one is malformed data.
    pub fn include(
        &mut self,
        zero_bit_planes: u32,
        subband: usize,
        codeblock: usize,
    ) -> Result<(), PacketError> {
        match self.zero_bit_planes {
            Some(known) if known != zero_bit_planes => Err(PacketError::ZeroBitPlaneMismatch {
                subband,
                codeblock,
                known,
                decoded: zero_bit_planes,
            }),
            _ => {
                self.included = true;
                self.zero_bit_planes = Some(zero_bit_planes);
                Ok(())
            }
        }
    }

    // Codeword segment the pass with index `pass` (counted over all layers) belongs to.
    fn segment_of(&self, pass: u32, style: &CodeblockStyle) -> u32 {
        if style.termination_on_each_pass {
            pass
        } else if style.selective_bypass {
            segment_for_bypass(pass)
        } else {
            self.non_empty_layers
        }
    }
}

// With arithmetic coding bypass the first ten passes (four bit-planes) form one segment, after
// which every bit-plane splits into a raw segment of two passes and an MQ segment of one.
fn segment_for_bypass(pass: u32) -> u32 {
    if pass < 10 {
        0
    } else {
        1 + (2 * ((pass - 10) / 3)) + if (pass - 10) % 3 == 2 { 1 } else { 0 }
    }
}

/// B.10.7 Lengths of the codeword segments `added_passes` new coding passes contribute.
///
/// Reads the Lblock increment followed by one length per codeword segment touched. The state is
/// only updated when everything could be read.
pub fn parse_codeblock_length<S: ByteSource + ?Sized>(
    reader: &mut BitReader<'_, S>,
    state: &mut CodeblockState,
    added_passes: u32,
    style: &CodeblockStyle,
) -> Result<Vec<u32>, PacketError> {
    if added_passes == 0 {
        debug_assert!(false, "codeblock contribution without coding passes");
        return Err(PacketError::Usage {
            reason: "codeblock contribution without coding passes",
        });
    }

    let mut scratch = reader.fork();
    let increment = scratch.count_run_until_terminator(false, MAX_LBLOCK_INCREMENT + 1)?;
    let lblock = state.lblock + increment;
    if increment > MAX_LBLOCK_INCREMENT || lblock > 32 {
        return Err(PacketError::LblockOverflow {
            offset: scratch.cursor().byte_offset_hint(),
        });
    }

    let first_pass = state.coding_passes;
    let last_pass = first_pass + added_passes;
    let mut segments = Vec::new();
    let mut current_segment = state.segment_of(first_pass, style);
    let mut passes_in_segment = 0;
    for pass in first_pass..last_pass {
        let segment = state.segment_of(pass, style);
        if segment != current_segment {
            segments.push(read_segment_length(&mut scratch, lblock, passes_in_segment)?);
            current_segment = segment;
            passes_in_segment = 1;
        } else {
            passes_in_segment += 1;
        }
    }
    segments.push(read_segment_length(&mut scratch, lblock, passes_in_segment)?);

    reader.join(scratch);
    state.lblock = lblock;
    state.coding_passes = last_pass;
    state.non_empty_layers += 1;
    trace!(
        "codeblock passes {}..{}, Lblock {}, segments {:?}",
        first_pass,
        last_pass,
        lblock,
        segments
    );
    Ok(segments)
}

// bits = Lblock + floor(log2(coding passes added))
fn read_segment_length<S: ByteSource + ?Sized>(
    reader: &mut BitReader<'_, S>,
    lblock: u32,
    passes: u32,
) -> Result<u32, PacketError> {
    let bits = lblock + passes.ilog2();
    if bits > 32 {
        return Err(PacketError::LblockOverflow {
            offset: reader.cursor().byte_offset_hint(),
        });
    }
    reader.shift_bits(bits)
}
