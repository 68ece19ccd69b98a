use log::{debug, info};
use std::error;
use std::io;

use crate::structure::{
    CodeblockStyle, CodestreamStructure, CodingStyle, ComponentCoding, ComponentSampling,
    ImageGeometry, PrecinctSize, ProgressionOrder, TileCoding,
};
use crate::{
    CodestreamError, MarkerSymbol, MARKER_SYMBOL_COC, MARKER_SYMBOL_COD, MARKER_SYMBOL_EOC,
    MARKER_SYMBOL_SIZ, MARKER_SYMBOL_SOC, MARKER_SYMBOL_SOD, MARKER_SYMBOL_SOT,
};

const MAX_DECOMPOSITION_LEVELS: u8 = 32;

// A.6.1 - Coding style default (COD)
//
// Function: Describes the coding style, number of decomposition levels,
// and layering that is the default used for compressing all components of
// an image (if in the main header) or a tile (if in the tile-part header).
#[derive(Debug, Default)]
struct CodingStyleMarkerSegment {
    coding_style: [u8; 1],

    // Progression order
    progression_order: [u8; 1],

    // Number of layers
    no_layers: [u8; 2],

    // Multiple component transformation
    multiple_component_transformation: [u8; 1],

    coding_style_parameters: CodingStyleParameters,
}

// A.6.2 - Coding style component (COC)
#[derive(Debug, Default)]
struct CodingStyleComponentSegment {
    // Ccoc: The index of the component to which this marker segment relates.
    index: u16,

    // Scoc: Coding style for this component
    coding_style: [u8; 1],

    // SPcoc: Parameters for coding style designated in Scoc.
    coding_style_parameters: CodingStyleParameters,
}

// A.12 – Coding style default parameter values
#[derive(Debug, Default)]
struct CodingStyleParameters {
    // Number of decomposition levels, N_L, Zero implies no transformation
    no_decomposition_levels: [u8; 1],

    // Code-block width exponent offset value, xcb
    code_block_width: [u8; 1],

    // Code-block height exponent offset value, ycb
    code_block_height: [u8; 1],

    // Style of the code-block coding passes
    code_block_style: [u8; 1],

    // Wavelet transformation used.
    transformation: [u8; 1],

    // If Scod or Scoc = xxxx xxx0, this parameter is not present; otherwise
    // this indicates precinct width and height.
    precinct_size: Vec<u8>,
}

impl CodingStyleParameters {
    // A.18
    //
    // Code-block width and height exponent offset value xcb = value + 2 or ycb = value + 2.
    fn component_coding(&self) -> Result<ComponentCoding, Box<dyn error::Error>> {
        Ok(ComponentCoding {
            decomposition_levels: self.no_decomposition_levels[0],
            codeblock_width_exponent: (self.code_block_width[0] & 0b0000_1111) + 2,
            codeblock_height_exponent: (self.code_block_height[0] & 0b0000_1111) + 2,
            codeblock_style: CodeblockStyle::new(self.code_block_style[0])?,
            precinct_sizes: self
                .precinct_size
                .iter()
                .map(|value| PrecinctSize::new(*value))
                .collect(),
        })
    }
}

// Length of marker segment in bytes (not including the marker).
fn decode_length<R: io::Read>(reader: &mut R) -> Result<u16, Box<dyn error::Error>> {
    let mut length: [u8; 2] = [0; 2];
    reader.read_exact(&mut length)?;
    Ok(u16::from_be_bytes(length))
}

fn skip_segment<R: io::Read + io::Seek>(
    reader: &mut R,
    marker: MarkerSymbol,
) -> Result<(), Box<dyn error::Error>> {
    let offset = reader.stream_position()? - 2;
    let length = decode_length(reader)?;
    if length < 2 {
        return Err(CodestreamError::MarkerError {
            marker,
            error: format!("segment length {} at byte offset {}", length, offset),
        }
        .into());
    }
    debug!(
        "skipping marker 0x{:0>2X?}{:0>2X?} at byte offset {}",
        marker[0], marker[1], offset
    );
    reader.seek(io::SeekFrom::Current(length as i64 - 2))?;
    Ok(())
}

// A.5.1 - Image and tile size (SIZ)
fn decode_siz<R: io::Read + io::Seek>(
    reader: &mut R,
) -> Result<ImageGeometry, Box<dyn error::Error>> {
    info!("SIZ start at byte offset {}", reader.stream_position()? - 2);
    decode_length(reader)?;

    let mut u16_buffer: [u8; 2] = [0; 2];
    let mut u32_buffer: [u8; 4] = [0; 4];
    let mut read_u32 = |reader: &mut R| -> Result<u32, io::Error> {
        reader.read_exact(&mut u32_buffer)?;
        Ok(u32::from_be_bytes(u32_buffer))
    };

    // Rsiz
    reader.read_exact(&mut u16_buffer)?;

    let reference_grid_width = read_u32(reader)?;
    let reference_grid_height = read_u32(reader)?;
    let image_horizontal_offset = read_u32(reader)?;
    let image_vertical_offset = read_u32(reader)?;
    let reference_tile_width = read_u32(reader)?;
    let reference_tile_height = read_u32(reader)?;
    let tile_horizontal_offset = read_u32(reader)?;
    let tile_vertical_offset = read_u32(reader)?;

    // Csiz
    reader.read_exact(&mut u16_buffer)?;
    let no_components = u16::from_be_bytes(u16_buffer);

    let mut components = Vec::with_capacity(no_components as usize);
    for _ in 0..no_components {
        // Ssiz, XRsiz, YRsiz
        let mut component: [u8; 3] = [0; 3];
        reader.read_exact(&mut component)?;
        if component[1] == 0 || component[2] == 0 {
            return Err(CodestreamError::MarkerError {
                marker: MARKER_SYMBOL_SIZ,
                error: "component separation of zero".to_string(),
            }
            .into());
        }
        components.push(ComponentSampling {
            horizontal_separation: component[1],
            vertical_separation: component[2],
        });
    }

    // The tile grid offsets (XTOsiz, YTOsiz) are constrained to be no
    // greater than the image area offsets.
    // 0 ≤ XTOsiz ≤ XOsiz
    // 0 ≤ YTOsiz ≤ YOsiz
    //
    // Also, the tile size plus the tile offset shall be greater than the image
    // area offset.
    // XTsiz + XTOsiz > XOsiz
    // YTsiz + YTOsiz > YOsiz
    if tile_horizontal_offset > image_horizontal_offset
        || tile_vertical_offset > image_vertical_offset
        || reference_tile_width == 0
        || reference_tile_height == 0
        || reference_tile_width as u64 + tile_horizontal_offset as u64
            <= image_horizontal_offset as u64
        || reference_tile_height as u64 + tile_vertical_offset as u64
            <= image_vertical_offset as u64
        || reference_grid_width <= image_horizontal_offset
        || reference_grid_height <= image_vertical_offset
    {
        return Err(CodestreamError::MarkerError {
            marker: MARKER_SYMBOL_SIZ,
            error: format!(
                "invalid tiling: Xsiz = {}, Ysiz = {}, XOsiz = {}, YOsiz = {}, XTsiz = {}, YTsiz = {}, XTOsiz = {}, YTOsiz = {}",
                reference_grid_width,
                reference_grid_height,
                image_horizontal_offset,
                image_vertical_offset,
                reference_tile_width,
                reference_tile_height,
                tile_horizontal_offset,
                tile_vertical_offset,
            ),
        }
        .into());
    }
    info!("SIZ end at byte offset {}", reader.stream_position()?);

    Ok(ImageGeometry {
        reference_grid_width,
        reference_grid_height,
        image_horizontal_offset,
        image_vertical_offset,
        reference_tile_width,
        reference_tile_height,
        tile_horizontal_offset,
        tile_vertical_offset,
        components,
    })
}

fn decode_coding_style_parameters<R: io::Read + io::Seek>(
    reader: &mut R,
    marker: MarkerSymbol,
    coding_style: u8,
    coding_style_parameters: &mut CodingStyleParameters,
) -> Result<(), Box<dyn error::Error>> {
    reader.read_exact(&mut coding_style_parameters.no_decomposition_levels)?;
    // A.13 N_L is at most 32
    let no_decomposition_levels = coding_style_parameters.no_decomposition_levels[0];
    if no_decomposition_levels > MAX_DECOMPOSITION_LEVELS {
        return Err(CodestreamError::MarkerError {
            marker,
            error: format!("{} decomposition levels", no_decomposition_levels),
        }
        .into());
    }
    reader.read_exact(&mut coding_style_parameters.code_block_width)?;
    reader.read_exact(&mut coding_style_parameters.code_block_height)?;
    reader.read_exact(&mut coding_style_parameters.code_block_style)?;
    reader.read_exact(&mut coding_style_parameters.transformation)?;

    if coding_style & 0b0000_0001 == 1 {
        // The first parameter (8 bits) corresponds to the N_L LL sub-band.
        // Each successive parameter corresponds to each successive resolution level in order.
        coding_style_parameters.precinct_size =
            vec![0; coding_style_parameters.no_decomposition_levels[0] as usize + 1];
        reader.read_exact(&mut coding_style_parameters.precinct_size)?;
    }

    Ok(())
}

fn decode_cod<R: io::Read + io::Seek>(
    reader: &mut R,
) -> Result<CodingStyleMarkerSegment, Box<dyn error::Error>> {
    info!("COD start at byte offset {}", reader.stream_position()? - 2);
    decode_length(reader)?;
    let mut segment = CodingStyleMarkerSegment::default();

    reader.read_exact(&mut segment.coding_style)?;
    reader.read_exact(&mut segment.progression_order)?;
    reader.read_exact(&mut segment.no_layers)?;
    reader.read_exact(&mut segment.multiple_component_transformation)?;

    decode_coding_style_parameters(
        reader,
        MARKER_SYMBOL_COD,
        segment.coding_style[0],
        &mut segment.coding_style_parameters,
    )?;
    info!("COD end at byte offset {}", reader.stream_position()?);

    Ok(segment)
}

fn decode_coc<R: io::Read + io::Seek>(
    reader: &mut R,
    no_components: u16,
) -> Result<CodingStyleComponentSegment, Box<dyn error::Error>> {
    info!("COC start at byte offset {}", reader.stream_position()? - 2);
    decode_length(reader)?;
    let mut segment = CodingStyleComponentSegment::default();

    // Either 8 or 16 bits depending on Csiz value.
    segment.index = if no_components < 257 {
        let mut buffer: [u8; 1] = [0; 1];
        reader.read_exact(&mut buffer)?;
        buffer[0] as u16
    } else {
        let mut buffer: [u8; 2] = [0; 2];
        reader.read_exact(&mut buffer)?;
        u16::from_be_bytes(buffer)
    };
    if segment.index >= no_components {
        return Err(CodestreamError::MarkerError {
            marker: MARKER_SYMBOL_COC,
            error: format!(
                "component {} of {} components",
                segment.index, no_components
            ),
        }
        .into());
    }

    reader.read_exact(&mut segment.coding_style)?;

    decode_coding_style_parameters(
        reader,
        MARKER_SYMBOL_COC,
        segment.coding_style[0],
        &mut segment.coding_style_parameters,
    )?;
    info!("COC end at byte offset {}", reader.stream_position()?);

    Ok(segment)
}

fn tile_coding(
    segment: &CodingStyleMarkerSegment,
    no_components: u16,
) -> Result<TileCoding, Box<dyn error::Error>> {
    let component = segment.coding_style_parameters.component_coding()?;
    Ok(TileCoding {
        num_quality_layers: u16::from_be_bytes(segment.no_layers),
        progression_order: ProgressionOrder::new(segment.progression_order[0]),
        coding_style: CodingStyle::new(segment.coding_style[0])?,
        components: vec![component; no_components as usize],
    })
}

// Reads the next marker, None once the header bytes are exhausted.
fn read_marker<R: io::Read>(reader: &mut R) -> Result<Option<MarkerSymbol>, Box<dyn error::Error>> {
    let mut marker_type: MarkerSymbol = [0; 2];
    match reader.read_exact(&mut marker_type) {
        Ok(_) => Ok(Some(marker_type)),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// A.3 - Decodes the main header up to the first tile-part (or the end of the bytes given).
///
/// Only the marker segments affecting packet structure are interpreted, everything else is
/// skipped over by its length.
pub fn decode_main_header<R: io::Read + io::Seek>(
    reader: &mut R,
) -> Result<CodestreamStructure, Box<dyn error::Error>> {
    let mut marker_type: MarkerSymbol = [0; 2];

    // SOC (Required as the first marker)
    reader.read_exact(&mut marker_type)?;
    if marker_type != MARKER_SYMBOL_SOC {
        return Err(CodestreamError::MarkerUnexpected {
            marker: marker_type,
            offset: reader.stream_position()? - 2,
        }
        .into());
    }
    info!("SOC start at byte offset {}", reader.stream_position()? - 2);

    // SIZ (Required as the second marker segment)
    reader.read_exact(&mut marker_type)?;
    if marker_type != MARKER_SYMBOL_SIZ {
        return Err(CodestreamError::MarkerUnexpected {
            marker: marker_type,
            offset: reader.stream_position()? - 2,
        }
        .into());
    }
    let geometry = decode_siz(reader)?;
    let no_components = geometry.components.len() as u16;

    let mut coding_style_marker_segment = None;
    let mut coding_style_component_segments = Vec::new();
    while let Some(marker_type) = read_marker(reader)? {
        match marker_type {
            // COD (Required)
            MARKER_SYMBOL_COD => {
                coding_style_marker_segment = Some(decode_cod(reader)?);
            }

            // COC (Optional, no more than one COC per component)
            MARKER_SYMBOL_COC => {
                coding_style_component_segments.push(decode_coc(reader, no_components)?);
            }

            // Start of tile bit-stream
            MARKER_SYMBOL_SOT | MARKER_SYMBOL_EOC => break,

            [0xFF, _] => skip_segment(reader, marker_type)?,

            _ => {
                return Err(CodestreamError::MarkerUnexpected {
                    marker: marker_type,
                    offset: reader.stream_position()? - 2,
                }
                .into());
            }
        }
    }

    let coding_style_marker_segment =
        coding_style_marker_segment.ok_or(CodestreamError::MarkerMissing {
            marker: MARKER_SYMBOL_COD,
        })?;
    let mut defaults = tile_coding(&coding_style_marker_segment, no_components)?;
    for segment in coding_style_component_segments {
        defaults.components[segment.index as usize] =
            segment.coding_style_parameters.component_coding()?;
    }

    Ok(CodestreamStructure { geometry, defaults })
}

/// Decodes the marker segments of a tile header into the tile's coding parameters.
///
/// Tile-part COC overrides tile-part COD, which overrides the main header defaults.
pub fn decode_tile_header<R: io::Read + io::Seek>(
    reader: &mut R,
    structure: &CodestreamStructure,
) -> Result<TileCoding, Box<dyn error::Error>> {
    let no_components = structure.num_components();
    let mut coding = structure.defaults.clone();
    let mut coding_style_component_segments = Vec::new();

    while let Some(marker_type) = read_marker(reader)? {
        match marker_type {
            MARKER_SYMBOL_COD => {
                coding = tile_coding(&decode_cod(reader)?, no_components)?;
            }
            MARKER_SYMBOL_COC => {
                coding_style_component_segments.push(decode_coc(reader, no_components)?);
            }
            MARKER_SYMBOL_SOD => break,
            [0xFF, _] => skip_segment(reader, marker_type)?,
            _ => {
                return Err(CodestreamError::MarkerUnexpected {
                    marker: marker_type,
                    offset: reader.stream_position()? - 2,
                }
                .into());
            }
        }
    }

    for segment in coding_style_component_segments {
        coding.components[segment.index as usize] =
            segment.coding_style_parameters.component_coding()?;
    }
    Ok(coding)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::structure::Rect;

    // SOC, SIZ for a 256x128 single component image with 128x128 tiles, then COD with
    // SOP and EPH, 3 layers, 2 decomposition levels and 32x32 codeblocks.
    fn main_header(extra: &[u8]) -> Vec<u8> {
        let mut bytes = vec![0xFF, 0x4F];
        bytes.extend_from_slice(&[0xFF, 0x51, 0x00, 0x29, 0x00, 0x00]);
        for value in [256u32, 128, 0, 0, 128, 128, 0, 0] {
            bytes.extend_from_slice(&value.to_be_bytes());
        }
        bytes.extend_from_slice(&[0x00, 0x01, 0x07, 0x01, 0x01]);
        // COM, skipped
        bytes.extend_from_slice(&[0xFF, 0x64, 0x00, 0x05, 0x00, 0x01, 0x41]);
        bytes.extend_from_slice(&[
            0xFF, 0x52, 0x00, 0x0C, 0x06, 0x00, 0x00, 0x03, 0x00, 0x02, 0x03, 0x03, 0x00, 0x01,
        ]);
        bytes.extend_from_slice(extra);
        bytes
    }

    #[test]
    fn test_decode_main_header() {
        let bytes = main_header(&[]);
        let structure = decode_main_header(&mut io::Cursor::new(bytes)).unwrap();
        assert_eq!(structure.geometry.num_tiles(), 2);
        assert_eq!(structure.num_components(), 1);
        assert_eq!(structure.defaults.num_quality_layers, 3);
        assert!(structure.defaults.coding_style.sop);
        assert!(structure.defaults.coding_style.eph);
        assert_eq!(structure.defaults.components[0].decomposition_levels, 2);
        assert_eq!(structure.defaults.components[0].codeblock_width_exponent, 5);

        let tile = structure.tile(1).unwrap();
        assert_eq!(tile.bounds(), Rect::new(128, 0, 256, 128));
    }

    #[test]
    fn test_main_header_stops_at_sot() {
        let bytes = main_header(&[0xFF, 0x90, 0x00, 0x0A]);
        assert!(decode_main_header(&mut io::Cursor::new(bytes)).is_ok());
    }

    #[test]
    fn test_missing_cod() {
        let mut bytes = main_header(&[]);
        bytes.truncate(bytes.len() - 14);
        assert!(decode_main_header(&mut io::Cursor::new(bytes)).is_err());
    }

    #[test]
    fn test_missing_soc() {
        let bytes = vec![0xFF, 0x51, 0x00, 0x00];
        assert!(decode_main_header(&mut io::Cursor::new(bytes)).is_err());
    }

    #[test]
    fn test_tile_header_overrides() {
        let structure = decode_main_header(&mut io::Cursor::new(main_header(&[]))).unwrap();
        // COD with 1 layer and no SOP/EPH, followed by a COC switching to custom precincts
        let tile_header = vec![
            0xFF, 0x52, 0x00, 0x0C, 0x00, 0x00, 0x00, 0x01, 0x00, 0x02, 0x03, 0x03, 0x00, 0x01,
            0xFF, 0x53, 0x00, 0x0B, 0x00, 0x01, 0x01, 0x04, 0x04, 0x00, 0x00, 0x55, 0x66,
        ];
        let coding = decode_tile_header(&mut io::Cursor::new(tile_header), &structure).unwrap();
        assert_eq!(coding.num_quality_layers, 1);
        assert!(!coding.coding_style.eph);
        let component = &coding.components[0];
        assert_eq!(component.decomposition_levels, 1);
        assert_eq!(component.precinct_sizes.len(), 2);
        assert_eq!(component.precinct_size(1).width_exponent(), 6);

        let tile = structure.tile_with(0, coding).unwrap();
        assert_eq!(tile.precinct_grid(0, 1).unwrap(), (2, 2));
    }

    fn is_marker_error(error: &(dyn error::Error + 'static), expected: MarkerSymbol) -> bool {
        matches!(
            error.downcast_ref::<CodestreamError>(),
            Some(CodestreamError::MarkerError { marker, .. }) if *marker == expected
        )
    }

    #[test]
    fn test_too_many_decomposition_levels() {
        for levels in [33u8, 100, 255] {
            let mut bytes = main_header(&[]);
            // SPcod N_L of the main header COD
            let position = bytes.len() - 5;
            bytes[position] = levels;
            let error = decode_main_header(&mut io::Cursor::new(bytes)).unwrap_err();
            assert!(is_marker_error(error.as_ref(), MARKER_SYMBOL_COD));
        }

        let mut bytes = main_header(&[]);
        let position = bytes.len() - 5;
        bytes[position] = 32;
        let structure = decode_main_header(&mut io::Cursor::new(bytes)).unwrap();
        assert_eq!(structure.defaults.components[0].decomposition_levels, 32);
    }

    #[test]
    fn test_tile_header_too_many_decomposition_levels() {
        let structure = decode_main_header(&mut io::Cursor::new(main_header(&[]))).unwrap();
        let tile_header = vec![
            0xFF, 0x53, 0x00, 0x09, 0x00, 0x00, 0x40, 0x03, 0x03, 0x00, 0x01,
        ];
        let error =
            decode_tile_header(&mut io::Cursor::new(tile_header), &structure).unwrap_err();
        assert!(is_marker_error(error.as_ref(), MARKER_SYMBOL_COC));
    }
}
