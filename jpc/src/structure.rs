use std::cmp;
use std::ops::Range;

use crate::{CodestreamError, PacketError};

/// A rectangle on some grid, `x1` and `y1` exclusive.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Rect {
    pub x0: u32,
    pub y0: u32,
    pub x1: u32,
    pub y1: u32,
}

impl Rect {
    pub fn new(x0: u32, y0: u32, x1: u32, y1: u32) -> Self {
        Rect { x0, y0, x1, y1 }
    }

    pub fn width(&self) -> u32 {
        self.x1.saturating_sub(self.x0)
    }

    pub fn height(&self) -> u32 {
        self.y1.saturating_sub(self.y0)
    }

    pub fn is_empty(&self) -> bool {
        self.width() == 0 || self.height() == 0
    }

    pub fn intersect(&self, other: &Rect) -> Rect {
        let x0 = cmp::max(self.x0, other.x0);
        let y0 = cmp::max(self.y0, other.y0);
        Rect {
            x0,
            y0,
            x1: cmp::max(x0, cmp::min(self.x1, other.x1)),
            y1: cmp::max(y0, cmp::min(self.y1, other.y1)),
        }
    }
}

// ceil(value / 2^shift)
fn ceil_shift(value: u32, shift: u32) -> u32 {
    ((value as u64 + (1u64 << shift) - 1) >> shift) as u32
}

// floor(value / 2^shift)
fn floor_shift(value: u32, shift: u32) -> u32 {
    ((value as u64) >> shift) as u32
}

fn ceil_div(value: u32, divisor: u32) -> u32 {
    value.div_ceil(divisor.max(1))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressionOrder {
    // 0000 0000 Layer-resolution level-component-position progression
    LRLCPP,

    // 0000 0001 Resolution level-layer-component-position progression
    RLLCPP,

    // 0000 0010 Resolution level-position-component-layer progression
    RLPCLP,

    // 0000 0011 Position-component-resolution level-layer progression
    PCRLLP,

    // 0000 0100 Component-position-resolution level-layer progression
    CPRLLP,

    // All other values reserved
    Reserved { value: u8 },
}

impl ProgressionOrder {
    pub fn new(value: u8) -> ProgressionOrder {
        match value {
            0b0000_0000 => ProgressionOrder::LRLCPP,
            0b0000_0001 => ProgressionOrder::RLLCPP,
            0b0000_0010 => ProgressionOrder::RLPCLP,
            0b0000_0011 => ProgressionOrder::PCRLLP,
            0b0000_0100 => ProgressionOrder::CPRLLP,
            _ => ProgressionOrder::Reserved { value },
        }
    }
}

/// A.13 – Coding style parameter values for the Scod parameter.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CodingStyle {
    // xxxx xxx1 Entropy coder with precincts defined in SPcod
    pub custom_precincts: bool,

    // xxxx xx1x SOP marker segments may be used
    pub sop: bool,

    // xxxx x1xx EPH marker shall be used
    pub eph: bool,
}

impl CodingStyle {
    pub fn new(value: u8) -> Result<CodingStyle, PacketError> {
        if value & 0b1111_1000 != 0 {
            return Err(PacketError::InvalidCodingStyle { value });
        }
        Ok(CodingStyle {
            custom_precincts: value & 0b0000_0001 != 0,
            sop: value & 0b0000_0010 != 0,
            eph: value & 0b0000_0100 != 0,
        })
    }
}

/// A.19 – Code-block style for the SPcod and SPcoc parameters.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CodeblockStyle {
    // xxxx xxx1 Selective arithmetic coding bypass
    pub selective_bypass: bool,

    // xxxx xx1x Reset context probabilities on coding pass boundaries
    pub reset_probabilities: bool,

    // xxxx x1xx Termination on each coding pass
    pub termination_on_each_pass: bool,

    // xxxx 1xxx Vertically causal context
    pub vertically_causal: bool,

    // xxx1 xxxx Predictable termination
    pub predictable_termination: bool,

    // xx1x xxxx Segmentation symbols are used
    pub segmentation_symbols: bool,
}

impl CodeblockStyle {
    pub fn new(value: u8) -> Result<CodeblockStyle, PacketError> {
        if value & 0b1100_0000 != 0 {
            return Err(PacketError::InvalidCodeblockStyle { value });
        }
        Ok(CodeblockStyle {
            selective_bypass: value & 0b0000_0001 != 0,
            reset_probabilities: value & 0b0000_0010 != 0,
            termination_on_each_pass: value & 0b0000_0100 != 0,
            vertically_causal: value & 0b0000_1000 != 0,
            predictable_termination: value & 0b0001_0000 != 0,
            segmentation_symbols: value & 0b0010_0000 != 0,
        })
    }
}

/// A.21 – Precinct width and height for one resolution level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrecinctSize {
    value: u8,
}

impl PrecinctSize {
    pub fn new(value: u8) -> Self {
        PrecinctSize { value }
    }

    pub fn width_exponent(&self) -> u8 {
        // 4 LSBs are the precinct width exponent, PPx = value
        self.value & 0b0000_1111
    }

    pub fn height_exponent(&self) -> u8 {
        // 4 MSBs are the precinct height exponent PPy = value
        self.value >> 4
    }
}

impl Default for PrecinctSize {
    // Entropy coder, precincts with PPx = 15 and PPy = 15
    fn default() -> Self {
        PrecinctSize { value: 0xFF }
    }
}

/// Coding parameters of one tile-component (COD, possibly overridden by COC).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComponentCoding {
    pub decomposition_levels: u8,

    // xcb and ycb, the offset of 2 already applied
    pub codeblock_width_exponent: u8,
    pub codeblock_height_exponent: u8,

    pub codeblock_style: CodeblockStyle,

    // One entry per resolution level, empty for the default precinct size.
    pub precinct_sizes: Vec<PrecinctSize>,
}

impl ComponentCoding {
    pub fn precinct_size(&self, resolution: u8) -> PrecinctSize {
        self.precinct_sizes
            .get(resolution as usize)
            .copied()
            .unwrap_or_default()
    }
}

/// Coding parameters for a whole tile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TileCoding {
    pub num_quality_layers: u16,
    pub progression_order: ProgressionOrder,
    pub coding_style: CodingStyle,
    pub components: Vec<ComponentCoding>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ComponentSampling {
    // XRsiz
    pub horizontal_separation: u8,
    // YRsiz
    pub vertical_separation: u8,
}

/// Reference grid and tiling, as signalled in SIZ.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageGeometry {
    // Xsiz, Ysiz
    pub reference_grid_width: u32,
    pub reference_grid_height: u32,

    // XOsiz, YOsiz
    pub image_horizontal_offset: u32,
    pub image_vertical_offset: u32,

    // XTsiz, YTsiz
    pub reference_tile_width: u32,
    pub reference_tile_height: u32,

    // XTOsiz, YTOsiz
    pub tile_horizontal_offset: u32,
    pub tile_vertical_offset: u32,

    pub components: Vec<ComponentSampling>,
}

impl ImageGeometry {
    pub fn image_area(&self) -> Rect {
        Rect::new(
            self.image_horizontal_offset,
            self.image_vertical_offset,
            self.reference_grid_width,
            self.reference_grid_height,
        )
    }

    // numXtiles = ceil((Xsiz - XTOsiz) / XTsiz)
    pub fn num_x_tiles(&self) -> u32 {
        ceil_div(
            self.reference_grid_width - self.tile_horizontal_offset,
            self.reference_tile_width,
        )
    }

    // numYtiles = ceil((Ysiz - YTOsiz) / YTsiz)
    pub fn num_y_tiles(&self) -> u32 {
        ceil_div(
            self.reference_grid_height - self.tile_vertical_offset,
            self.reference_tile_height,
        )
    }

    pub fn num_tiles(&self) -> u32 {
        self.num_x_tiles() * self.num_y_tiles()
    }

    /// B-7 Tile bounds on the reference grid.
    pub fn tile_bounds(&self, tile: u32) -> Rect {
        // p = mod(t, numXtiles), q = floor(t / numXtiles)
        let p = tile % self.num_x_tiles();
        let q = tile / self.num_x_tiles();
        Rect {
            x0: cmp::max(
                self.tile_horizontal_offset + p * self.reference_tile_width,
                self.image_horizontal_offset,
            ),
            y0: cmp::max(
                self.tile_vertical_offset + q * self.reference_tile_height,
                self.image_vertical_offset,
            ),
            x1: cmp::min(
                self.tile_horizontal_offset + (p + 1) * self.reference_tile_width,
                self.reference_grid_width,
            ),
            y1: cmp::min(
                self.tile_vertical_offset + (q + 1) * self.reference_tile_height,
                self.reference_grid_height,
            ),
        }
    }

    /// Tile column and row ranges touching `region` (reference grid coordinates).
    pub fn tiles_intersecting(&self, region: &Rect) -> (Range<u32>, Range<u32>) {
        let area = region.intersect(&self.image_area());
        if area.is_empty() {
            return (0..0, 0..0);
        }
        let columns = (area.x0 - self.tile_horizontal_offset) / self.reference_tile_width
            ..ceil_div(
                area.x1 - self.tile_horizontal_offset,
                self.reference_tile_width,
            );
        let rows = (area.y0 - self.tile_vertical_offset) / self.reference_tile_height
            ..ceil_div(
                area.y1 - self.tile_vertical_offset,
                self.reference_tile_height,
            );
        (columns, rows)
    }
}

/// Everything the main header says about the codestream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodestreamStructure {
    pub geometry: ImageGeometry,
    pub defaults: TileCoding,
}

impl CodestreamStructure {
    pub fn num_components(&self) -> u16 {
        self.geometry.components.len() as u16
    }

    /// Structure of `tile` using the main header coding parameters.
    pub fn tile(&self, tile: u32) -> Result<TileStructure, CodestreamError> {
        self.tile_with(tile, self.defaults.clone())
    }

    /// Structure of `tile` using coding parameters overridden by its tile header.
    pub fn tile_with(
        &self,
        tile: u32,
        coding: TileCoding,
    ) -> Result<TileStructure, CodestreamError> {
        let num_tiles = self.geometry.num_tiles();
        if tile >= num_tiles {
            return Err(CodestreamError::TileIndexOutOfRange { tile, num_tiles });
        }
        Ok(TileStructure {
            index: tile,
            bounds: self.geometry.tile_bounds(tile),
            sampling: self.geometry.components.clone(),
            coding,
        })
    }
}

// Subband orientation offsets (xob, yob) for resolution levels above 0: HL, LH, HH.
const HIGH_PASS_SUBBANDS: [(u32, u32); 3] = [(1, 0), (0, 1), (1, 1)];

/// Geometry of one tile, per component and resolution level.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TileStructure {
    index: u32,
    bounds: Rect,
    sampling: Vec<ComponentSampling>,
    coding: TileCoding,
}

impl TileStructure {
    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn bounds(&self) -> Rect {
        self.bounds
    }

    pub fn coding(&self) -> &TileCoding {
        &self.coding
    }

    pub fn num_components(&self) -> u16 {
        self.sampling.len() as u16
    }

    pub fn num_quality_layers(&self) -> u16 {
        self.coding.num_quality_layers
    }

    fn component(&self, component: u16) -> Result<(&ComponentSampling, &ComponentCoding), CodestreamError> {
        match (
            self.sampling.get(component as usize),
            self.coding.components.get(component as usize),
        ) {
            (Some(sampling), Some(coding)) => Ok((sampling, coding)),
            _ => Err(CodestreamError::ComponentIndexOutOfRange {
                component,
                num_components: self.num_components(),
            }),
        }
    }

    fn resolution_checked(
        &self,
        component: u16,
        resolution: u8,
    ) -> Result<&ComponentCoding, CodestreamError> {
        let (_, coding) = self.component(component)?;
        if resolution > coding.decomposition_levels {
            return Err(CodestreamError::ResolutionOutOfRange {
                resolution,
                num_resolutions: coding.decomposition_levels + 1,
            });
        }
        Ok(coding)
    }

    pub fn num_resolutions(&self, component: u16) -> Result<u8, CodestreamError> {
        let (_, coding) = self.component(component)?;
        Ok(coding.decomposition_levels + 1)
    }

    /// B-12 Tile-component bounds.
    pub fn component_bounds(&self, component: u16) -> Result<Rect, CodestreamError> {
        let (sampling, _) = self.component(component)?;
        let dx = sampling.horizontal_separation as u32;
        let dy = sampling.vertical_separation as u32;
        Ok(Rect {
            x0: ceil_div(self.bounds.x0, dx),
            y0: ceil_div(self.bounds.y0, dy),
            x1: ceil_div(self.bounds.x1, dx),
            y1: ceil_div(self.bounds.y1, dy),
        })
    }

    /// B-14 Bounds of the tile-component at resolution level `resolution`.
    pub fn resolution_bounds(&self, component: u16, resolution: u8) -> Result<Rect, CodestreamError> {
        let coding = self.resolution_checked(component, resolution)?;
        let shift = (coding.decomposition_levels - resolution) as u32;
        let bounds = self.component_bounds(component)?;
        Ok(Rect {
            x0: ceil_shift(bounds.x0, shift),
            y0: ceil_shift(bounds.y0, shift),
            x1: ceil_shift(bounds.x1, shift),
            y1: ceil_shift(bounds.y1, shift),
        })
    }

    /// B-16 Number of precincts across and down at one resolution level.
    pub fn precinct_grid(&self, component: u16, resolution: u8) -> Result<(u32, u32), CodestreamError> {
        let coding = self.resolution_checked(component, resolution)?;
        let bounds = self.resolution_bounds(component, resolution)?;
        if bounds.is_empty() {
            return Ok((0, 0));
        }
        let size = coding.precinct_size(resolution);
        let ppx = size.width_exponent() as u32;
        let ppy = size.height_exponent() as u32;
        Ok((
            ceil_shift(bounds.x1, ppx) - floor_shift(bounds.x0, ppx),
            ceil_shift(bounds.y1, ppy) - floor_shift(bounds.y0, ppy),
        ))
    }

    pub fn num_precincts(&self, component: u16, resolution: u8) -> Result<u32, CodestreamError> {
        let (width, height) = self.precinct_grid(component, resolution)?;
        Ok(width * height)
    }

    /// Precinct columns and rows at `resolution` touching `region` (reference grid coordinates).
    pub fn precinct_range(
        &self,
        component: u16,
        resolution: u8,
        region: &Rect,
    ) -> Result<(Range<u32>, Range<u32>), CodestreamError> {
        let coding = self.resolution_checked(component, resolution)?;
        let (sampling, _) = self.component(component)?;
        let bounds = self.resolution_bounds(component, resolution)?;
        let shift = (coding.decomposition_levels - resolution) as u32;
        let dx = sampling.horizontal_separation as u32;
        let dy = sampling.vertical_separation as u32;

        let area = Rect {
            x0: ceil_shift(ceil_div(region.x0, dx), shift),
            y0: ceil_shift(ceil_div(region.y0, dy), shift),
            x1: ceil_shift(ceil_div(region.x1, dx), shift),
            y1: ceil_shift(ceil_div(region.y1, dy), shift),
        }
        .intersect(&bounds);
        if area.is_empty() {
            return Ok((0..0, 0..0));
        }

        let size = coding.precinct_size(resolution);
        let ppx = size.width_exponent() as u32;
        let ppy = size.height_exponent() as u32;
        let first_x = floor_shift(bounds.x0, ppx);
        let first_y = floor_shift(bounds.y0, ppy);
        Ok((
            floor_shift(area.x0, ppx) - first_x..ceil_shift(area.x1, ppx) - first_x,
            floor_shift(area.y0, ppy) - first_y..ceil_shift(area.y1, ppy) - first_y,
        ))
    }

    /// B-15 Subband bounds. `orientation` is (xob, yob); resolution 0 holds only the LL band.
    fn subband_bounds(
        &self,
        component: u16,
        resolution: u8,
        orientation: (u32, u32),
    ) -> Result<Rect, CodestreamError> {
        let coding = self.resolution_checked(component, resolution)?;
        if resolution == 0 {
            return self.resolution_bounds(component, 0);
        }
        let bounds = self.component_bounds(component)?;
        let nb = (coding.decomposition_levels - resolution + 1) as u32;
        let band = |value: u32, ob: u32| -> u32 {
            let shifted = value as i64 - ((1i64 << (nb - 1)) * ob as i64);
            let divisor = 1i64 << nb;
            // ceil division on a possibly negative numerator
            let quotient = shifted.div_euclid(divisor)
                + if shifted.rem_euclid(divisor) != 0 { 1 } else { 0 };
            quotient.max(0) as u32
        };
        Ok(Rect {
            x0: band(bounds.x0, orientation.0),
            y0: band(bounds.y0, orientation.1),
            x1: band(bounds.x1, orientation.0),
            y1: band(bounds.y1, orientation.1),
        })
    }

    /// Codeblock grids of every subband inside precinct `precinct` (raster index) of one
    /// resolution level.
    pub fn precinct_structure(
        &self,
        component: u16,
        resolution: u8,
        precinct: u32,
    ) -> Result<PrecinctStructure, CodestreamError> {
        let coding = self.resolution_checked(component, resolution)?;
        let (grid_width, grid_height) = self.precinct_grid(component, resolution)?;
        if precinct >= grid_width * grid_height {
            return Err(CodestreamError::PrecinctIndexOutOfRange {
                precinct,
                num_precincts: grid_width * grid_height,
            });
        }
        let bounds = self.resolution_bounds(component, resolution)?;
        let size = coding.precinct_size(resolution);
        let ppx = size.width_exponent() as u32;
        let ppy = size.height_exponent() as u32;

        let px = (floor_shift(bounds.x0, ppx) + precinct % grid_width) as u64;
        let py = (floor_shift(bounds.y0, ppy) + precinct / grid_width) as u64;
        let precinct_area = |shift: u32| -> Rect {
            let clamp = |value: u64| cmp::min(value, u32::MAX as u64) as u32;
            Rect {
                x0: clamp((px << ppx) >> shift),
                y0: clamp((py << ppy) >> shift),
                x1: clamp(((px + 1) << ppx) >> shift),
                y1: clamp(((py + 1) << ppy) >> shift),
            }
        };

        // B-17, B-18: xcb' = min(xcb, PPx - 1) above resolution 0
        let (area, xcb, ycb, orientations): (Rect, u32, u32, Vec<(u32, u32)>) = if resolution == 0
        {
            (
                precinct_area(0),
                cmp::min(coding.codeblock_width_exponent as u32, ppx),
                cmp::min(coding.codeblock_height_exponent as u32, ppy),
                vec![(0, 0)],
            )
        } else {
            (
                precinct_area(1),
                cmp::min(coding.codeblock_width_exponent as u32, ppx.saturating_sub(1)),
                cmp::min(coding.codeblock_height_exponent as u32, ppy.saturating_sub(1)),
                HIGH_PASS_SUBBANDS.to_vec(),
            )
        };

        let mut subbands = Vec::with_capacity(orientations.len());
        for orientation in orientations {
            let band = self.subband_bounds(component, resolution, orientation)?;
            let region = area.intersect(&band);
            subbands.push(if region.is_empty() {
                SubbandCodeblocks::default()
            } else {
                SubbandCodeblocks {
                    width: ceil_shift(region.x1, xcb) - floor_shift(region.x0, xcb),
                    height: ceil_shift(region.y1, ycb) - floor_shift(region.y0, ycb),
                }
            });
        }

        Ok(PrecinctStructure {
            subbands,
            num_quality_layers: self.coding.num_quality_layers,
            coding_style: self.coding.coding_style,
            codeblock_style: coding.codeblock_style,
        })
    }
}

/// Codeblock grid of one subband inside one precinct.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SubbandCodeblocks {
    pub width: u32,
    pub height: u32,
}

impl SubbandCodeblocks {
    pub fn new(width: u32, height: u32) -> Self {
        SubbandCodeblocks { width, height }
    }

    pub fn count(&self) -> usize {
        self.width as usize * self.height as usize
    }
}

/// What the packet header parser needs to know about one precinct.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrecinctStructure {
    pub subbands: Vec<SubbandCodeblocks>,
    pub num_quality_layers: u16,
    pub coding_style: CodingStyle,
    pub codeblock_style: CodeblockStyle,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn component(levels: u8, precinct_sizes: Vec<PrecinctSize>) -> ComponentCoding {
        ComponentCoding {
            decomposition_levels: levels,
            codeblock_width_exponent: 6,
            codeblock_height_exponent: 6,
            codeblock_style: CodeblockStyle::default(),
            precinct_sizes,
        }
    }

    fn structure(width: u32, height: u32, tile: u32, coding: ComponentCoding) -> CodestreamStructure {
        CodestreamStructure {
            geometry: ImageGeometry {
                reference_grid_width: width,
                reference_grid_height: height,
                image_horizontal_offset: 0,
                image_vertical_offset: 0,
                reference_tile_width: tile,
                reference_tile_height: tile,
                tile_horizontal_offset: 0,
                tile_vertical_offset: 0,
                components: vec![ComponentSampling {
                    horizontal_separation: 1,
                    vertical_separation: 1,
                }],
            },
            defaults: TileCoding {
                num_quality_layers: 3,
                progression_order: ProgressionOrder::LRLCPP,
                coding_style: CodingStyle::default(),
                components: vec![coding],
            },
        }
    }

    #[test]
    fn test_coding_style_values() {
        assert_eq!(
            CodingStyle::new(0b110).unwrap(),
            CodingStyle {
                custom_precincts: false,
                sop: true,
                eph: true
            }
        );
        assert_eq!(
            CodingStyle::new(0b1000),
            Err(PacketError::InvalidCodingStyle { value: 0b1000 })
        );
        assert!(CodeblockStyle::new(0b0100_0000).is_err());
        assert!(CodeblockStyle::new(0b0000_0101).unwrap().termination_on_each_pass);
    }

    #[test]
    fn test_tiles() {
        let s = structure(300, 200, 128, component(0, vec![]));
        assert_eq!(s.geometry.num_x_tiles(), 3);
        assert_eq!(s.geometry.num_y_tiles(), 2);
        assert_eq!(s.geometry.tile_bounds(5), Rect::new(256, 128, 300, 200));
        assert_eq!(
            s.geometry.tiles_intersecting(&Rect::new(100, 100, 140, 150)),
            (0..2, 0..2)
        );
        assert!(s.tile(6).is_err());
    }

    #[test]
    fn test_default_precincts_single_codeblock_grid() {
        // 128x128, 2 decomposition levels, 64x64 codeblocks, one precinct per resolution
        let s = structure(128, 128, 128, component(2, vec![]));
        let tile = s.tile(0).unwrap();
        assert_eq!(tile.resolution_bounds(0, 0).unwrap(), Rect::new(0, 0, 32, 32));
        assert_eq!(tile.resolution_bounds(0, 2).unwrap(), Rect::new(0, 0, 128, 128));
        for r in 0..3 {
            assert_eq!(tile.num_precincts(0, r).unwrap(), 1);
        }
        let p0 = tile.precinct_structure(0, 0, 0).unwrap();
        assert_eq!(p0.subbands, vec![SubbandCodeblocks::new(1, 1)]);
        let p2 = tile.precinct_structure(0, 2, 0).unwrap();
        // HL, LH, HH of the finest level are 64x64 each
        assert_eq!(p2.subbands, vec![SubbandCodeblocks::new(1, 1); 3]);
        assert_eq!(p2.num_quality_layers, 3);
    }

    #[test]
    fn test_custom_precincts() {
        // PPx = PPy = 5 at every level: 32x32 precincts, codeblocks clipped to 16x16 above r0
        let sizes = vec![PrecinctSize::new(0x55); 2];
        let s = structure(128, 128, 128, component(1, sizes));
        let tile = s.tile(0).unwrap();
        assert_eq!(tile.precinct_grid(0, 0).unwrap(), (2, 2));
        assert_eq!(tile.precinct_grid(0, 1).unwrap(), (4, 4));
        let p = tile.precinct_structure(0, 1, 5).unwrap();
        assert_eq!(p.subbands, vec![SubbandCodeblocks::new(1, 1); 3]);
        let p = tile.precinct_structure(0, 0, 3).unwrap();
        assert_eq!(p.subbands, vec![SubbandCodeblocks::new(1, 1)]);
        assert!(tile.precinct_structure(0, 1, 16).is_err());

        assert_eq!(
            tile.precinct_range(0, 1, &Rect::new(40, 0, 70, 10)).unwrap(),
            (1..3, 0..1)
        );
        assert_eq!(
            tile.precinct_range(0, 0, &Rect::new(40, 0, 70, 10)).unwrap(),
            (0..2, 0..1)
        );
    }

    #[test]
    fn test_empty_subband_has_no_codeblocks() {
        // a 1 pixel wide tile has nothing in the high-pass horizontal bands
        let s = structure(1, 8, 8, component(1, vec![]));
        let tile = s.tile(0).unwrap();
        let p = tile.precinct_structure(0, 1, 0).unwrap();
        assert_eq!(p.subbands[0].count(), 0); // HL
        assert_eq!(p.subbands[1], SubbandCodeblocks::new(1, 1)); // LH
        assert_eq!(p.subbands[2].count(), 0); // HH
    }
}
