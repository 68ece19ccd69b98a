use log::warn;
use std::ops::Range;
use std::sync::Arc;

use jpc::{CodestreamError, CodestreamStructure, Rect, TileStructure};

/// A window of interest on the reference grid, decoded `discard_levels` resolution levels below
/// full resolution.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Region {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
    pub discard_levels: u8,
}

impl Region {
    pub fn rect(&self) -> Rect {
        Rect::new(
            self.x,
            self.y,
            self.x.saturating_add(self.width),
            self.y.saturating_add(self.height),
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PrecinctPosition {
    pub tile: u32,
    pub component: u16,
    pub resolution: u8,
    /// Raster index within the resolution level's precinct grid.
    pub precinct: u32,
}

/// In-class identifier of a precinct databin (ISO/IEC 15444-9 A.3.2.1).
///
/// I = t + (c + s * num_components) * num_tiles, where s counts the precincts of the
/// tile-component over all lower resolution levels first.
pub fn precinct_in_class_id(
    structure: &CodestreamStructure,
    position: &PrecinctPosition,
) -> Result<u64, CodestreamError> {
    let tile = structure.tile(position.tile)?;
    let num_precincts = tile.num_precincts(position.component, position.resolution)?;
    if position.precinct >= num_precincts {
        return Err(CodestreamError::PrecinctIndexOutOfRange {
            precinct: position.precinct,
            num_precincts,
        });
    }

    let mut sequence = position.precinct as u64;
    for resolution in 0..position.resolution {
        sequence += tile.num_precincts(position.component, resolution)? as u64;
    }
    let num_tiles = structure.geometry.num_tiles() as u64;
    let num_components = structure.num_components() as u64;
    Ok(position.tile as u64 + (position.component as u64 + sequence * num_components) * num_tiles)
}

// Precincts of one resolution level of one tile-component that touch the region.
#[derive(Debug)]
struct PrecinctBlock {
    tile: u32,
    component: u16,
    resolution: u8,
    grid_width: u32,
    columns: Range<u32>,
    rows: Range<u32>,
    x: u32,
    y: u32,
}

impl PrecinctBlock {
    fn next(&mut self) -> Option<PrecinctPosition> {
        if self.columns.is_empty() || !self.rows.contains(&self.y) {
            return None;
        }
        let position = PrecinctPosition {
            tile: self.tile,
            component: self.component,
            resolution: self.resolution,
            precinct: self.y * self.grid_width + self.x,
        };
        self.x += 1;
        if self.x >= self.columns.end {
            self.x = self.columns.start;
            self.y += 1;
        }
        Some(position)
    }
}

/// Lazily walks every precinct touching a region: tile by tile, then component, resolution
/// level and precinct raster order.
///
/// Uses the main header coding parameters of each tile.
pub struct PrecinctIterator {
    structure: Arc<CodestreamStructure>,
    region: Rect,
    discard_levels: u8,
    tiles: Vec<u32>,
    // Next (tile list index, component, resolution) to open.
    next_stage: Option<(usize, u16, u8)>,
    tile: Option<TileStructure>,
    block: Option<PrecinctBlock>,
}

impl PrecinctIterator {
    pub fn new(structure: Arc<CodestreamStructure>, region: &Region) -> Self {
        let rect = region.rect();
        let (columns, rows) = structure.geometry.tiles_intersecting(&rect);
        let num_x_tiles = structure.geometry.num_x_tiles();
        let tiles: Vec<u32> = rows
            .flat_map(|row| columns.clone().map(move |column| row * num_x_tiles + column))
            .collect();
        let next_stage = if tiles.is_empty() || structure.num_components() == 0 {
            None
        } else {
            Some((0, 0, 0))
        };
        PrecinctIterator {
            structure,
            region: rect,
            discard_levels: region.discard_levels,
            tiles,
            next_stage,
            tile: None,
            block: None,
        }
    }

    fn tile_structure(&mut self, tile: u32) -> Option<&TileStructure> {
        if self.tile.as_ref().map(TileStructure::index) != Some(tile) {
            match self.structure.tile(tile) {
                Ok(structure) => self.tile = Some(structure),
                Err(e) => {
                    warn!("skipping tile {}: {}", tile, e);
                    self.tile = None;
                }
            }
        }
        self.tile.as_ref()
    }

    // Resolution levels kept after discarding, at least one.
    fn num_resolutions(&mut self, tile: u32, component: u16) -> u8 {
        let discard_levels = self.discard_levels;
        self.tile_structure(tile)
            .and_then(|tile| tile.num_resolutions(component).ok())
            .map_or(0, |levels| levels.saturating_sub(discard_levels).max(1))
    }

    // Takes the next stage and works out the one after it.
    fn advance(&mut self) -> Option<(usize, u16, u8)> {
        let (tile_index, component, resolution) = self.next_stage?;
        let tile = self.tiles[tile_index];
        self.next_stage = if resolution + 1 < self.num_resolutions(tile, component) {
            Some((tile_index, component, resolution + 1))
        } else if component + 1 < self.structure.num_components() {
            Some((tile_index, component + 1, 0))
        } else if tile_index + 1 < self.tiles.len() {
            Some((tile_index + 1, 0, 0))
        } else {
            None
        };
        Some((tile_index, component, resolution))
    }

    fn open_block(&mut self, tile: u32, component: u16, resolution: u8) -> Option<PrecinctBlock> {
        let region = self.region;
        let tile_structure = self.tile_structure(tile)?;
        let (grid_width, _) = tile_structure.precinct_grid(component, resolution).ok()?;
        let (columns, rows) = tile_structure
            .precinct_range(component, resolution, &region)
            .ok()?;
        Some(PrecinctBlock {
            tile,
            component,
            resolution,
            grid_width,
            x: columns.start,
            y: rows.start,
            columns,
            rows,
        })
    }
}

impl Iterator for PrecinctIterator {
    type Item = PrecinctPosition;

    fn next(&mut self) -> Option<PrecinctPosition> {
        loop {
            if let Some(position) = self.block.as_mut().and_then(PrecinctBlock::next) {
                return Some(position);
            }
            let (tile_index, component, resolution) = self.advance()?;
            let tile = self.tiles[tile_index];
            self.block = self.open_block(tile, component, resolution);
        }
    }
}
