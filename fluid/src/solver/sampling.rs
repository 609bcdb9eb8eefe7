//! Per-tile texel addressing: wrapping, clamping and boundary-aware fetches
//! shared by every simulation pass.

use bevy::math::{BVec2, IVec2, Vec2, Vec4};

use crate::constants::{MAX_TILES, PHANTOM_TILE};
use crate::packing::PixelRect;
use crate::storage::{RgbaGrid, TileIdGrid};

use super::params::TileParams;

/// A tile's texel rect in one grid, with its boundary behaviour.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct TileBounds {
    pub rect: PixelRect,
    pub periodic: BVec2,
    pub solid: BVec2,
}

fn wrap_axis(v: i32, min: i32, size: i32, periodic: bool) -> i32 {
    if size <= 0 {
        min
    } else if periodic {
        min + (v - min).rem_euclid(size)
    } else {
        v.clamp(min, min + size - 1)
    }
}

impl TileBounds {
    pub fn wrap(&self, x: i32, y: i32) -> IVec2 {
        IVec2::new(
            wrap_axis(x, self.rect.min.x, self.rect.size.x, self.periodic.x),
            wrap_axis(y, self.rect.min.y, self.rect.size.y, self.periodic.y),
        )
    }

    /// Axes along which `(x, y)` lies beyond a non-periodic edge.
    pub fn outside(&self, x: i32, y: i32) -> BVec2 {
        let max = self.rect.max();
        BVec2::new(
            !self.periodic.x && (x < self.rect.min.x || x >= max.x),
            !self.periodic.y && (y < self.rect.min.y || y >= max.y),
        )
    }

    /// Axes along which `(x, y)` is the outermost texel next to a solid wall.
    pub fn on_solid_edge(&self, x: i32, y: i32) -> BVec2 {
        let max = self.rect.max() - IVec2::ONE;
        BVec2::new(
            self.solid.x && (x == self.rect.min.x || x == max.x),
            self.solid.y && (y == self.rect.min.y || y == max.y),
        )
    }

    #[inline]
    pub fn fetch(&self, grid: &RgbaGrid, x: i32, y: i32) -> Vec4 {
        let p = self.wrap(x, y);
        grid.get(p.x, p.y)
    }

    /// Velocity fetch where solid walls mirror the flow with its normal
    /// component negated.
    pub fn fetch_velocity(&self, grid: &RgbaGrid, x: i32, y: i32) -> Vec4 {
        let mut texel = self.fetch(grid, x, y);
        let outside = self.outside(x, y);
        if outside.x && self.solid.x {
            texel.x = -texel.x;
        }
        if outside.y && self.solid.y {
            texel.y = -texel.y;
        }
        texel
    }

    /// Pressure (`w`) fetch: Neumann at solid walls, zero past open edges.
    pub fn fetch_pressure(&self, grid: &RgbaGrid, x: i32, y: i32, center: f32) -> f32 {
        let outside = self.outside(x, y);
        if (outside & self.solid).any() {
            center
        } else if outside.any() {
            0.0
        } else {
            self.fetch(grid, x, y).w
        }
    }

    /// Bilinear sample at continuous pixel coordinates, never reading texels
    /// of another tile.
    pub fn sample(&self, grid: &RgbaGrid, p: Vec2) -> Vec4 {
        let f = p - Vec2::splat(0.5);
        let base = f.floor();
        let t = f - base;
        let (x0, y0) = (base.x as i32, base.y as i32);

        let a = self
            .fetch(grid, x0, y0)
            .lerp(self.fetch(grid, x0 + 1, y0), t.x);
        let b = self
            .fetch(grid, x0, y0 + 1)
            .lerp(self.fetch(grid, x0 + 1, y0 + 1), t.x);
        a.lerp(b, t.y)
    }

    /// Multiplier fading values out near non-periodic edges. `width` is a
    /// fraction of the tile and `rate` is per second.
    pub fn edge_falloff(&self, x: i32, y: i32, width: f32, rate: f32, dt: f32) -> f32 {
        if width <= 0.0 || rate <= 0.0 {
            return 1.0;
        }
        let uv = self.rect.normalized(x, y);
        let distance = uv.min(Vec2::ONE - uv);
        let mut factor = 1.0;
        if !self.periodic.x && distance.x < width {
            factor *= (-rate * dt * (1.0 - distance.x / width)).exp();
        }
        if !self.periodic.y && distance.y < width {
            factor *= (-rate * dt * (1.0 - distance.y / width)).exp();
        }
        factor
    }
}

/// Bounds of every active tile in both the velocity and the state grids.
#[derive(Debug, Clone)]
pub(crate) struct TileSet {
    pub velocity: [Option<TileBounds>; MAX_TILES],
    pub state: [Option<TileBounds>; MAX_TILES],
    pub supersampling: i32,
}

impl TileSet {
    pub fn new(params: &[TileParams; MAX_TILES], resolution: u32, supersampling: u32) -> Self {
        let mut velocity = [None; MAX_TILES];
        let mut state = [None; MAX_TILES];
        for (tile, tile_params) in params.iter().enumerate().skip(PHANTOM_TILE + 1) {
            if !tile_params.active {
                continue;
            }
            let rect = tile_params.rect.to_pixels(resolution);
            if rect.is_empty() {
                continue;
            }
            let bounds = |rect| TileBounds {
                rect,
                periodic: tile_params.periodic,
                solid: tile_params.solid,
            };
            velocity[tile] = Some(bounds(rect));
            state[tile] = Some(bounds(tile_params.rect.to_pixels(resolution * supersampling)));
        }
        Self {
            velocity,
            state,
            supersampling: supersampling.max(1) as i32,
        }
    }

    /// Writes the index of every active tile over its texels. Everything else
    /// is left as the phantom tile.
    pub fn stamp(&self, tile_id: &mut TileIdGrid) {
        tile_id.clear();
        for (tile, bounds) in self.velocity.iter().enumerate() {
            let Some(bounds) = bounds else {
                continue;
            };
            let max = bounds.rect.max();
            for y in bounds.rect.min.y..max.y {
                for x in bounds.rect.min.x..max.x {
                    tile_id.set(x, y, tile as u8);
                }
            }
        }
    }
}

/// Which set of tile bounds a pass addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Target {
    Velocity,
    State,
}

/// Runs `f` for every texel of `dst` belonging to an active tile. Texels of
/// the phantom tile are cleared.
pub(crate) fn run_pass(
    dst: &mut RgbaGrid,
    tile_id: &TileIdGrid,
    tiles: &TileSet,
    target: Target,
    mut f: impl FnMut(usize, &TileBounds, i32, i32) -> Vec4,
) {
    let (bounds, scale) = match target {
        Target::Velocity => (&tiles.velocity, 1),
        Target::State => (&tiles.state, tiles.supersampling),
    };
    let size = dst.size();
    for y in 0..size.y {
        for x in 0..size.x {
            let tile = tile_id.get(x / scale, y / scale) as usize;
            let value = match bounds.get(tile).copied().flatten() {
                Some(tile_bounds) if tile != PHANTOM_TILE => f(tile, &tile_bounds, x, y),
                _ => Vec4::ZERO,
            };
            dst.set(x, y, value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bounds(periodic: BVec2, solid: BVec2) -> TileBounds {
        TileBounds {
            rect: PixelRect {
                min: IVec2::new(4, 4),
                size: IVec2::new(8, 8),
            },
            periodic,
            solid,
        }
    }

    #[test]
    fn test_wrap_and_clamp() {
        let wrapped = bounds(BVec2::TRUE, BVec2::FALSE);
        assert_eq!(wrapped.wrap(3, 12), IVec2::new(11, 4));
        assert_eq!(wrapped.outside(3, 12), BVec2::FALSE);

        let clamped = bounds(BVec2::FALSE, BVec2::FALSE);
        assert_eq!(clamped.wrap(3, 12), IVec2::new(4, 11));
        assert_eq!(clamped.outside(3, 12), BVec2::TRUE);
    }

    #[test]
    fn test_solid_fetches() {
        let mut grid = RgbaGrid::new(16, 16);
        grid.fill(Vec4::new(1.0, 2.0, 0.0, 5.0));
        let walls = bounds(BVec2::FALSE, BVec2::new(true, false));

        assert_eq!(walls.fetch_velocity(&grid, 3, 6).x, -1.0);
        assert_eq!(walls.fetch_velocity(&grid, 6, 3).y, 2.0);
        // Neumann at the wall, zero past the open edge
        assert_eq!(walls.fetch_pressure(&grid, 3, 6, 7.0), 7.0);
        assert_eq!(walls.fetch_pressure(&grid, 6, 3, 7.0), 0.0);
        assert_eq!(walls.fetch_pressure(&grid, 6, 6, 7.0), 5.0);
        assert_eq!(walls.on_solid_edge(11, 4), BVec2::new(true, false));
    }

    #[test]
    fn test_sample_stays_in_tile() {
        let mut grid = RgbaGrid::new(16, 16);
        grid.fill(Vec4::splat(9.0));
        let tile = bounds(BVec2::FALSE, BVec2::FALSE);
        for y in 4..12 {
            for x in 4..12 {
                grid.set(x, y, Vec4::ONE);
            }
        }
        // Right on the tile border, neighbours outside are never read
        assert_eq!(tile.sample(&grid, Vec2::new(4.0, 4.0)), Vec4::ONE);
    }

    #[test]
    fn test_edge_falloff() {
        let tile = bounds(BVec2::new(true, false), BVec2::FALSE);
        // Periodic axis never fades
        assert_eq!(tile.edge_falloff(4, 8, 0.25, 10.0, 0.1), 1.0);
        assert!(tile.edge_falloff(8, 4, 0.25, 10.0, 0.1) < 1.0);
        assert_eq!(tile.edge_falloff(8, 8, 0.25, 10.0, 0.1), 1.0);
    }
}
