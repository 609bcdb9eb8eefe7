use bevy::math::{IVec2, Vec4};

/// Row-major 2D array of texels.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Grid<T> {
    width: u32,
    height: u32,
    data: Vec<T>,
}

pub type RgbaGrid = Grid<Vec4>;
pub type TileIdGrid = Grid<u8>;

impl<T: Copy + Default> Grid<T> {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            data: vec![T::default(); width as usize * height as usize],
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn size(&self) -> IVec2 {
        IVec2::new(self.width as i32, self.height as i32)
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    #[inline]
    fn index(&self, x: u32, y: u32) -> usize {
        y as usize * self.width as usize + x as usize
    }

    /// Texel at `(x, y)`, clamped to the grid edges.
    #[inline]
    pub fn get(&self, x: i32, y: i32) -> T {
        if self.data.is_empty() {
            return T::default();
        }
        let x = x.clamp(0, self.width as i32 - 1) as u32;
        let y = y.clamp(0, self.height as i32 - 1) as u32;
        self.data[self.index(x, y)]
    }

    /// Writes a texel. Out of range coordinates are ignored.
    #[inline]
    pub fn set(&mut self, x: i32, y: i32, value: T) {
        if x < 0 || y < 0 || x >= self.width as i32 || y >= self.height as i32 {
            return;
        }
        let i = self.index(x as u32, y as u32);
        self.data[i] = value;
    }

    pub fn fill(&mut self, value: T) {
        self.data.fill(value);
    }

    pub fn clear(&mut self) {
        self.fill(T::default());
    }

    pub fn data(&self) -> &[T] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [T] {
        &mut self.data
    }

    /// Copies `source` into this grid, scaling it to fit with nearest sampling.
    pub fn stretch_from(&mut self, source: &Grid<T>) {
        if source.is_empty() || self.is_empty() {
            return;
        }
        let (sw, sh) = (source.width as u64, source.height as u64);
        let (dw, dh) = (self.width as u64, self.height as u64);
        for y in 0..self.height {
            let sy = ((2 * y as u64 + 1) * sh / (2 * dh)) as u32;
            for x in 0..self.width {
                let sx = ((2 * x as u64 + 1) * sw / (2 * dw)) as u32;
                let i = self.index(x, y);
                self.data[i] = source.data[source.index(sx, sy)];
            }
        }
    }
}

impl RgbaGrid {
    /// Bilinear sample at continuous pixel coordinates, where texel `(i, j)`
    /// has its center at `(i + 0.5, j + 0.5)`.
    pub fn sample_bilinear(&self, px: f32, py: f32) -> Vec4 {
        let fx = px - 0.5;
        let fy = py - 0.5;
        let x0 = fx.floor();
        let y0 = fy.floor();
        let tx = fx - x0;
        let ty = fy - y0;
        let (x0, y0) = (x0 as i32, y0 as i32);

        let a = self.get(x0, y0).lerp(self.get(x0 + 1, y0), tx);
        let b = self.get(x0, y0 + 1).lerp(self.get(x0 + 1, y0 + 1), tx);
        a.lerp(b, ty)
    }

    /// Component-wise sum of every texel.
    pub fn sum(&self) -> Vec4 {
        self.data.iter().copied().sum()
    }
}
