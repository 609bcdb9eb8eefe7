//! Rasterizing a single splat into a tile of the density or velocity buffer.

use bevy::math::{Vec2, Vec4, Vec4Swizzles};
use noise::{NoiseFn, Perlin};
use serde::{Deserialize, Serialize};

use crate::packing::PixelRect;
use crate::storage::RgbaGrid;

/// Footprint of a splat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum BrushShape {
    /// Smooth falloff to zero at the rim.
    #[default]
    Disc,
    Gaussian,
    /// Hard-edged rectangle.
    Square,
}

impl BrushShape {
    /// Weight at `d`, where the brush's extents map to `|d| = 1`.
    pub fn footprint(&self, d: Vec2) -> f32 {
        match self {
            BrushShape::Disc => (1.0 - d.length_squared()).max(0.0),
            BrushShape::Gaussian => {
                let r2 = d.length_squared();
                if r2 < 1.0 {
                    (-4.0 * r2).exp()
                } else {
                    0.0
                }
            }
            BrushShape::Square => {
                if d.x.abs() <= 1.0 && d.y.abs() <= 1.0 {
                    1.0
                } else {
                    0.0
                }
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BlendFactor {
    Zero,
    One,
    SrcColor,
    OneMinusSrcColor,
    SrcAlpha,
    OneMinusSrcAlpha,
    DstColor,
    OneMinusDstColor,
    DstAlpha,
    OneMinusDstAlpha,
}

impl BlendFactor {
    fn weight(&self, src: Vec4, dst: Vec4) -> Vec4 {
        match self {
            BlendFactor::Zero => Vec4::ZERO,
            BlendFactor::One => Vec4::ONE,
            BlendFactor::SrcColor => src,
            BlendFactor::OneMinusSrcColor => Vec4::ONE - src,
            BlendFactor::SrcAlpha => Vec4::splat(src.w),
            BlendFactor::OneMinusSrcAlpha => Vec4::splat(1.0 - src.w),
            BlendFactor::DstColor => dst,
            BlendFactor::OneMinusDstColor => Vec4::ONE - dst,
            BlendFactor::DstAlpha => Vec4::splat(dst.w),
            BlendFactor::OneMinusDstAlpha => Vec4::splat(1.0 - dst.w),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum BlendOp {
    #[default]
    Add,
    Subtract,
    ReverseSubtract,
    Min,
    Max,
}

/// How splatted density combines with what is already in the buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BlendState {
    pub src: BlendFactor,
    pub dst: BlendFactor,
    pub op: BlendOp,
}

impl Default for BlendState {
    fn default() -> Self {
        Self {
            src: BlendFactor::SrcAlpha,
            dst: BlendFactor::OneMinusSrcAlpha,
            op: BlendOp::Add,
        }
    }
}

impl BlendState {
    pub fn blend(&self, src: Vec4, dst: Vec4) -> Vec4 {
        let s = src * self.src.weight(src, dst);
        let d = dst * self.dst.weight(src, dst);
        match self.op {
            BlendOp::Add => s + d,
            BlendOp::Subtract => s - d,
            BlendOp::ReverseSubtract => d - s,
            BlendOp::Min => src.min(dst),
            BlendOp::Max => src.max(dst),
        }
    }
}

/// Noise modulation of a splat.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NoiseParams {
    pub amount: f32,
    /// Speed at which the noise field scrolls over time. Zero keeps it still.
    pub offset: f32,
    pub tiling: f32,
}

impl Default for NoiseParams {
    fn default() -> Self {
        Self {
            amount: 0.0,
            offset: 0.0,
            tiling: 1.0,
        }
    }
}

impl NoiseParams {
    fn sample(&self, noise: &Perlin, uv: Vec2, time: f32) -> f32 {
        let p = uv * self.tiling;
        noise.get([p.x as f64, p.y as f64, (time * self.offset) as f64]) as f32
    }

    /// Curl of the scalar noise field, divergence-free by construction.
    fn curl(&self, noise: &Perlin, uv: Vec2, time: f32) -> Vec2 {
        const H: f32 = 0.01;
        let dx = self.sample(noise, uv + Vec2::new(H, 0.0), time)
            - self.sample(noise, uv - Vec2::new(H, 0.0), time);
        let dy = self.sample(noise, uv + Vec2::new(0.0, H), time)
            - self.sample(noise, uv - Vec2::new(0.0, H), time);
        Vec2::new(dy, -dx) / (2.0 * H)
    }
}

/// One splat placed in atlas UV space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Stamp {
    pub center: Vec2,
    /// Half of the splat's width and height.
    pub half_extents: Vec2,
    /// Radians, counter-clockwise.
    pub rotation: f32,
    pub shape: BrushShape,
}

impl Stamp {
    /// Calls `f(x, y, d, weight)` for every texel of `rect` the stamp covers,
    /// where `d` is the texel's offset from the center in atlas UV units.
    fn rasterize(&self, rect: PixelRect, resolution: u32, mut f: impl FnMut(i32, i32, Vec2, f32)) {
        let res = resolution as f32;
        let half = self.half_extents * res;
        if rect.is_empty() || half.x <= 0.0 || half.y <= 0.0 {
            return;
        }
        let center = self.center * res;
        let reach = half.length();
        let lo = ((center - reach).floor().as_ivec2()).max(rect.min);
        let hi = ((center + reach).ceil().as_ivec2()).min(rect.max());
        let (sin, cos) = (-self.rotation).sin_cos();

        for y in lo.y..hi.y {
            for x in lo.x..hi.x {
                let d = Vec2::new(x as f32 + 0.5, y as f32 + 0.5) - center;
                let local = Vec2::new(d.x * cos - d.y * sin, d.x * sin + d.y * cos) / half;
                let weight = self.shape.footprint(local);
                if weight > 0.0 {
                    f(x, y, d / res, weight);
                }
            }
        }
    }
}

/// Density splat parameters.
pub struct DensitySplat<'a> {
    pub color: Vec4,
    pub blend: BlendState,
    pub noise: NoiseParams,
    pub perlin: &'a Perlin,
    pub time: f32,
}

pub fn stamp_density(grid: &mut RgbaGrid, rect: PixelRect, stamp: &Stamp, splat: &DensitySplat) {
    let resolution = grid.width();
    stamp.rasterize(rect, resolution, |x, y, _, weight| {
        let mut src = splat.color * weight;
        if splat.noise.amount > 0.0 {
            let n = splat.noise.sample(splat.perlin, rect.normalized(x, y), splat.time);
            src *= (1.0 + splat.noise.amount * n).max(0.0);
        }
        let dst = grid.get(x, y);
        grid.set(x, y, splat.blend.blend(src, dst));
    });
}

/// Velocity splat parameters. Velocities are in atlas UV units per second.
pub struct VelocitySplat<'a> {
    pub linear: Vec2,
    /// Radians per second, counter-clockwise.
    pub angular: f32,
    pub weight: f32,
    pub noise: NoiseParams,
    pub perlin: &'a Perlin,
    pub time: f32,
}

pub fn stamp_velocity(grid: &mut RgbaGrid, rect: PixelRect, stamp: &Stamp, splat: &VelocitySplat) {
    let resolution = grid.width();
    stamp.rasterize(rect, resolution, |x, y, d, footprint| {
        let mut target = splat.linear + Vec2::new(-d.y, d.x) * splat.angular;
        if splat.noise.amount > 0.0 {
            target += splat.noise.curl(splat.perlin, rect.normalized(x, y), splat.time)
                * splat.noise.amount;
        }
        let texel = grid.get(x, y);
        let velocity = texel.xy().lerp(target, (splat.weight * footprint).clamp(0.0, 1.0));
        grid.set(x, y, Vec4::new(velocity.x, velocity.y, texel.z, texel.w));
    });
}
