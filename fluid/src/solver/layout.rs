use bevy::math::Vec2;
use bevy_log::{debug, warn};

use crate::constants::{MAX_TILES, MIN_FRAMEBUFFER_SIZE, PACKING_SCALE, PHANTOM_TILE};
use crate::packing::{normalize, pack, TileRect};

/// Spans the whole unit square and then some, so lookups outside every tile
/// still resolve.
const PHANTOM_RECT: TileRect = TileRect::new(-1.0, -1.0, 3.0, 3.0);

/// Atlas tiles of a solver's regions. Tile `0` is the phantom tile; tile
/// `i > 0` belongs to region `indices[i]`.
#[derive(Debug, Clone)]
pub(crate) struct TileLayout {
    rects: [TileRect; MAX_TILES],
    indices: [usize; MAX_TILES],
    count: usize,
    dirty: bool,
}

impl Default for TileLayout {
    fn default() -> Self {
        let mut rects = [TileRect::default(); MAX_TILES];
        rects[PHANTOM_TILE] = PHANTOM_RECT;
        Self {
            rects,
            indices: [0; MAX_TILES],
            count: 0,
            dirty: true,
        }
    }
}

impl TileLayout {
    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Packs one tile per region size and normalizes the result into the unit
    /// square, snapped to the coarsest framebuffer's texel grid.
    pub fn repack(&mut self, sizes: &[Vec2]) {
        let count = sizes.len().min(MAX_TILES - 1);
        self.rects[PHANTOM_TILE] = PHANTOM_RECT;
        for (i, size) in sizes.iter().take(count).enumerate() {
            self.rects[i + 1] = TileRect {
                position: Vec2::ZERO,
                size: *size * PACKING_SCALE,
            };
            self.indices[i + 1] = i;
        }

        let bounds = pack(&mut self.rects, &mut self.indices, 1, count, 0.0);
        normalize(
            &mut self.rects[1..=count],
            bounds,
            MIN_FRAMEBUFFER_SIZE as f32,
        );

        for tile in 1..=count {
            if self.rects[tile].area() <= 0.0 {
                warn!(
                    "Region {} is too small for an atlas tile and will not be simulated",
                    self.indices[tile]
                );
            }
        }

        self.count = count;
        self.dirty = false;
        debug!("Packed {} tiles into {:?}", count, bounds);
    }

    /// `(tile, region index)` of every packed tile.
    pub fn tiles(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        (1..=self.count).map(|tile| (tile, self.indices[tile]))
    }

    pub fn rect(&self, tile: usize) -> TileRect {
        self.rects.get(tile).copied().unwrap_or_default()
    }

    pub fn tile_of(&self, region_index: usize) -> Option<usize> {
        self.tiles()
            .find(|(_, index)| *index == region_index)
            .map(|(tile, _)| tile)
    }
}
