//! Shelf-style rectangle packing used to lay out region tiles in the atlas.
//!
//! Rects are sorted tallest first, then placed into the most recently created
//! free space they fit in. The first free space is as wide as a square of the
//! total area (plus some slack) and unbounded in height, so every rect fits.

use bevy::math::{IVec2, Rect, Vec2};

use crate::constants::PACKING_EFFICIENCY;
use crate::utils::floor_to_grid;

/// Axis-aligned rectangle given by its corner and extent.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct TileRect {
    pub position: Vec2,
    pub size: Vec2,
}

impl TileRect {
    pub const fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            position: Vec2::new(x, y),
            size: Vec2::new(width, height),
        }
    }

    pub fn max(&self) -> Vec2 {
        self.position + self.size
    }

    pub fn area(&self) -> f32 {
        self.size.x * self.size.y
    }

    /// Texels of a square grid of `resolution` covered by this rect.
    pub fn to_pixels(&self, resolution: u32) -> PixelRect {
        let res = resolution as f32;
        let min = (self.position * res).round().as_ivec2();
        let max = (self.max() * res).round().as_ivec2();
        PixelRect {
            min,
            size: max - min,
        }
    }

    pub fn overlaps(&self, other: &TileRect) -> bool {
        let a = self.max();
        let b = other.max();
        self.position.x < b.x
            && other.position.x < a.x
            && self.position.y < b.y
            && other.position.y < a.y
    }
}

/// Texel rectangle of a tile within one grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PixelRect {
    pub min: IVec2,
    pub size: IVec2,
}

impl PixelRect {
    pub fn max(&self) -> IVec2 {
        self.min + self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size.x <= 0 || self.size.y <= 0
    }

    pub fn contains(&self, p: IVec2) -> bool {
        p.cmpge(self.min).all() && p.cmplt(self.max()).all()
    }

    /// Position of a texel center relative to the rect, in `0..1`.
    pub fn normalized(&self, x: i32, y: i32) -> Vec2 {
        (Vec2::new(x as f32 + 0.5, y as f32 + 0.5) - self.min.as_vec2()) / self.size.as_vec2()
    }
}

/// Packs `rects[first..first + length]` tightly and returns the size of the
/// bounds they occupy.
///
/// The sub-range is sorted by descending height then width, and `indices` is
/// permuted alongside it so callers can map packed rects back to their owners.
/// Sizes are left untouched; only positions are written.
pub fn pack(
    rects: &mut [TileRect],
    indices: &mut [usize],
    first: usize,
    length: usize,
    margin: f32,
) -> Vec2 {
    let range = first..first + length;

    let mut pairs: Vec<(TileRect, usize)> = rects[range.clone()]
        .iter()
        .copied()
        .zip(indices[range.clone()].iter().copied())
        .collect();
    pairs.sort_by(|(a, _), (b, _)| {
        b.size
            .y
            .total_cmp(&a.size.y)
            .then(b.size.x.total_cmp(&a.size.x))
    });
    for (i, (rect, index)) in pairs.into_iter().enumerate() {
        rects[first + i] = rect;
        indices[first + i] = index;
    }

    let mut area = 0.0;
    let mut max_width: f32 = 0.0;
    for rect in &rects[range.clone()] {
        area += (rect.size.x + margin) * (rect.size.y + margin);
        max_width = max_width.max(rect.size.x + margin);
    }

    // Aim for a square-ish result, with room for imperfect utilization
    let start_width = (area / PACKING_EFFICIENCY).sqrt().ceil().max(max_width);

    let mut spaces: Vec<Rect> = vec![Rect {
        min: Vec2::ZERO,
        max: Vec2::new(start_width, f32::INFINITY),
    }];
    let mut bounds = Vec2::ZERO;

    for rect in &mut rects[range] {
        let w = rect.size.x + margin;
        let h = rect.size.y + margin;

        // Smaller spaces are at the end
        for s in (0..spaces.len()).rev() {
            let mut space = spaces[s];
            let space_size = space.size();
            if w > space_size.x || h > space_size.y {
                continue;
            }

            rect.position = space.min + Vec2::splat(margin);

            let same_width = w as i32 == space_size.x as i32;
            let same_height = h as i32 == space_size.y as i32;

            if same_width && same_height {
                spaces.swap_remove(s);
            } else {
                if same_height {
                    space.min.x += w;
                } else if same_width {
                    space.min.y += h;
                } else {
                    spaces.push(Rect {
                        min: Vec2::new(space.min.x + w, space.min.y),
                        max: Vec2::new(space.max.x, space.min.y + h),
                    });
                    space.min.y += h;
                }
                spaces[s] = space;
            }
            break;
        }

        bounds.x = bounds.x.max(rect.position.x + rect.size.x + margin);
        bounds.y = bounds.y.max(rect.position.y + rect.size.y + margin);
    }

    bounds
}

/// Scales packed rects into the unit square and snaps them onto a grid of
/// `1 / grid_steps` cells.
pub fn normalize(rects: &mut [TileRect], bounds: Vec2, grid_steps: f32) {
    let scale = bounds.max_element();
    if scale <= 0.0 {
        return;
    }
    for rect in rects {
        rect.position = floor_to_grid(rect.position / scale, grid_steps);
        rect.size = floor_to_grid(rect.size / scale, grid_steps);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn squares(count: usize, side: f32) -> (Vec<TileRect>, Vec<usize>) {
        let rects = vec![TileRect::new(0.0, 0.0, side, side); count];
        let indices = (0..count).collect();
        (rects, indices)
    }

    fn assert_no_overlaps(rects: &[TileRect]) {
        for (i, a) in rects.iter().enumerate() {
            for b in &rects[i + 1..] {
                assert!(!a.overlaps(b), "{:?} overlaps {:?}", a, b);
            }
        }
    }

    #[test]
    fn test_pack_single_rect() {
        let mut rects = vec![TileRect::new(0.0, 0.0, 10.0, 5.0)];
        let mut indices = vec![0];
        let bounds = pack(&mut rects, &mut indices, 0, 1, 0.0);

        assert_eq!(rects[0].position, Vec2::ZERO);
        assert_eq!(bounds, Vec2::new(10.0, 5.0));
    }

    #[test]
    fn test_pack_equal_squares_area_bounds() {
        for count in 1..=16 {
            let (mut rects, mut indices) = squares(count, 1024.0);
            let bounds = pack(&mut rects, &mut indices, 0, count, 0.0);

            let total_area = count as f32 * 1024.0 * 1024.0;
            assert!(bounds.x * bounds.y >= total_area);
            assert!(bounds.x * bounds.y <= 4.0 * total_area, "count {}", count);
            assert_no_overlaps(&rects);
        }
    }

    #[test]
    fn test_pack_sorts_and_permutes_indices() {
        let mut rects = vec![
            TileRect::new(0.0, 0.0, 1.0, 1.0),
            TileRect::new(0.0, 0.0, 3.0, 3.0),
            TileRect::new(0.0, 0.0, 2.0, 3.0),
        ];
        let mut indices = vec![0, 1, 2];
        pack(&mut rects, &mut indices, 0, 3, 0.0);

        assert_eq!(indices, vec![1, 2, 0]);
        assert_eq!(rects[0].size, Vec2::new(3.0, 3.0));
        assert_eq!(rects[1].size, Vec2::new(2.0, 3.0));
        assert_no_overlaps(&rects);
    }

    #[test]
    fn test_pack_sub_range_leaves_rest_untouched() {
        let mut rects = vec![
            TileRect::new(-1.0, -1.0, 3.0, 3.0),
            TileRect::new(0.0, 0.0, 4.0, 4.0),
            TileRect::new(0.0, 0.0, 4.0, 4.0),
        ];
        let mut indices = vec![0, 1, 2];
        pack(&mut rects, &mut indices, 1, 2, 0.0);

        assert_eq!(rects[0], TileRect::new(-1.0, -1.0, 3.0, 3.0));
        assert_eq!(indices[0], 0);
        assert_no_overlaps(&rects[1..]);
    }

    #[test]
    fn test_pack_with_margin() {
        let (mut rects, mut indices) = squares(4, 10.0);
        let bounds = pack(&mut rects, &mut indices, 0, 4, 2.0);

        for rect in &rects {
            assert!(rect.position.x >= 2.0 && rect.position.y >= 2.0);
        }
        assert!(bounds.x >= 24.0 && bounds.y >= 24.0);
        assert_no_overlaps(&rects);
    }

    #[test]
    fn test_normalize_round_trip() {
        let (mut rects, mut indices) = squares(4, 1024.0);
        let bounds = pack(&mut rects, &mut indices, 0, 4, 0.0);
        let packed = rects.clone();

        normalize(&mut rects, bounds, 32.0);
        let scale = bounds.max_element();
        for (normalized, original) in rects.iter().zip(&packed) {
            assert!(normalized.position.min_element() >= 0.0);
            assert!(normalized.max().max_element() <= 1.0);
            // Denormalizing is within one grid cell of the packed rect
            let cell = scale / 32.0;
            assert!((normalized.position * scale - original.position).abs().max_element() < cell);
            assert!((normalized.size * scale - original.size).abs().max_element() < cell);
        }
        assert_no_overlaps(&rects);
    }
}
