use log::debug;

use crate::bit_reader::ByteSource;
use crate::packet::{PacketLayer, PacketLengthCalculator};
use crate::structure::PrecinctStructure;
use crate::PacketError;

/// How many leading quality layers of a precinct are fully present, and where they end.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CompleteLayers {
    pub layers: u16,
    pub end_offset: u64,
}

/// Answers "how many quality layers can be decoded from what arrived so far" for one precinct.
///
/// Headers are parsed at most once. Asking again after more bytes arrived resumes from the first
/// layer whose header could not be read.
#[derive(Debug, Clone)]
pub struct QualityLayersCache {
    calculator: PacketLengthCalculator,
}

impl QualityLayersCache {
    pub fn new(structure: PrecinctStructure) -> Self {
        QualityLayersCache {
            calculator: PacketLengthCalculator::new(structure, 0),
        }
    }

    pub fn num_quality_layers(&self) -> u16 {
        self.calculator.structure().num_quality_layers
    }

    pub fn layers(&self) -> &[PacketLayer] {
        self.calculator.layers()
    }

    /// Bit reader operations spent so far.
    pub fn operations(&self) -> u64 {
        self.calculator.operations()
    }

    /// The packet of `layer`, parsing headers as needed.
    pub fn layer<S: ByteSource + ?Sized>(
        &mut self,
        source: &S,
        layer: u16,
    ) -> Result<&PacketLayer, PacketError> {
        self.calculator.calculate_layer(source, layer)
    }

    /// Number of leading layers, at most `max_layers`, whose header and body bytes are all
    /// present, and the offset right after the last of them.
    ///
    /// Missing bytes are not an error: the answer just counts fewer layers.
    pub fn end_offset_of_last_complete_layer<S: ByteSource + ?Sized>(
        &mut self,
        source: &S,
        max_layers: u16,
    ) -> Result<CompleteLayers, PacketError> {
        let wanted = max_layers.min(self.num_quality_layers()) as usize;
        while self.calculator.layers().len() < wanted {
            match self.calculator.parse_next_layer(source) {
                Ok(_) => {}
                Err(PacketError::NeedMoreData) => break,
                Err(e) => return Err(e),
            }
        }

        // Headers may be known for layers whose bodies are still missing.
        let start = self.calculator.start_offset();
        let layers = self.calculator.layers();
        let mut complete = layers.len().min(wanted);
        while complete > 0 && !source.contains_range(start, layers[complete - 1].end()) {
            complete -= 1;
        }

        let end_offset = match complete {
            0 => start,
            n => layers[n - 1].end(),
        };
        debug!(
            "{} of {} quality layers complete, ending at {}",
            complete, wanted, end_offset
        );
        Ok(CompleteLayers {
            layers: complete as u16,
            end_offset,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::structure::{CodeblockStyle, CodingStyle, SubbandCodeblocks};

    fn cache(layers: u16) -> QualityLayersCache {
        QualityLayersCache::new(PrecinctStructure {
            subbands: vec![SubbandCodeblocks::new(1, 1)],
            num_quality_layers: layers,
            coding_style: CodingStyle::default(),
            codeblock_style: CodeblockStyle::default(),
        })
    }

    // Layer 0: one pass of 4 bytes. Layer 1: one more pass of 2 bytes. Layer 2: empty.
    fn packets() -> Vec<u8> {
        let mut bytes = crate::tests::pack_bits("1 1 1 0 0 100");
        bytes.extend_from_slice(&[1, 2, 3, 4]);
        bytes.extend_from_slice(&crate::tests::pack_bits("1 1 0 0 010"));
        bytes.extend_from_slice(&[5, 6]);
        bytes.push(0x00);
        bytes
    }

    #[test]
    fn test_all_layers_present() {
        let bytes = packets();
        let mut cache = cache(3);
        let complete = cache.end_offset_of_last_complete_layer(&bytes, 3).unwrap();
        assert_eq!(complete, CompleteLayers { layers: 3, end_offset: 9 });
        assert_eq!(cache.layers()[1].body_length, 2);
    }

    #[test]
    fn test_max_layers_bounds_the_answer() {
        let bytes = packets();
        let mut cache = cache(3);
        let complete = cache.end_offset_of_last_complete_layer(&bytes, 1).unwrap();
        assert_eq!(complete, CompleteLayers { layers: 1, end_offset: 5 });
        assert_eq!(cache.layers().len(), 1);
    }

    #[test]
    fn test_header_known_but_body_missing() {
        let mut bytes = packets();
        // drop the last body byte of layer 1 and the empty layer 2
        bytes.truncate(7);
        let mut cache = cache(3);
        let complete = cache.end_offset_of_last_complete_layer(&bytes, 3).unwrap();
        assert_eq!(complete, CompleteLayers { layers: 1, end_offset: 5 });
        assert_eq!(cache.layers().len(), 2);
    }

    #[test]
    fn test_resumes_without_reparsing() {
        let bytes = packets();
        let mut cache = cache(3);
        let partial = bytes[..5].to_vec();
        cache.end_offset_of_last_complete_layer(&partial, 3).unwrap();
        let operations = cache.operations();
        assert_eq!(cache.layers().len(), 1);

        let complete = cache.end_offset_of_last_complete_layer(&bytes, 3).unwrap();
        assert_eq!(complete.layers, 3);
        let resumed = cache.operations();

        // a second query with everything known reads nothing
        cache.end_offset_of_last_complete_layer(&bytes, 3).unwrap();
        assert_eq!(cache.operations(), resumed);
        assert!(resumed > operations);
    }

    #[test]
    fn test_nothing_arrived() {
        let bytes: Vec<u8> = Vec::new();
        let mut cache = cache(2);
        assert_eq!(
            cache.end_offset_of_last_complete_layer(&bytes, 2).unwrap(),
            CompleteLayers::default()
        );
    }
}
