//! Pressure solvers. Both read divergence from the `aux` channel of `a` and
//! leave the pressure in the `w` channel of `b`.

use bevy::math::Vec4;

use crate::storage::{RgbaGrid, TileIdGrid};

use super::sampling::{run_pass, Target, TileSet};

/// Reach of the separable kernel, in texels.
const KERNEL_RADIUS: i32 = 6;
const KERNEL_SIGMA: f32 = 3.0;
/// Maps the normalized kernel onto the magnitude of a Poisson solve.
const KERNEL_GAIN: f32 = 2.0 * KERNEL_SIGMA * KERNEL_SIGMA;

const BINOMIAL: [f32; 3] = [1.0, 2.0, 1.0];

fn kernel() -> [f32; (2 * KERNEL_RADIUS + 1) as usize] {
    let mut weights = [0.0; (2 * KERNEL_RADIUS + 1) as usize];
    for (i, weight) in weights.iter_mut().enumerate() {
        let d = i as f32 - KERNEL_RADIUS as f32;
        *weight = (-d * d / (2.0 * KERNEL_SIGMA * KERNEL_SIGMA)).exp();
    }
    let total: f32 = weights.iter().sum();
    weights.map(|weight| weight / total)
}

/// Ping-pong Jacobi relaxation of `laplacian(p) = divergence`, starting
/// from whatever pressure the texels already hold.
pub fn jacobi(a: &mut RgbaGrid, b: &mut RgbaGrid, tile_id: &TileIdGrid, tiles: &TileSet, iterations: u32) {
    for _ in 0..iterations {
        jacobi_pass(a, b, tile_id, tiles);
        jacobi_pass(b, a, tile_id, tiles);
    }
    b.data_mut().copy_from_slice(a.data());
}

fn jacobi_pass(src: &RgbaGrid, dst: &mut RgbaGrid, tile_id: &TileIdGrid, tiles: &TileSet) {
    run_pass(dst, tile_id, tiles, Target::Velocity, |_, bounds, x, y| {
        let center = src.get(x, y);
        let neighbours = bounds.fetch_pressure(src, x - 1, y, center.w)
            + bounds.fetch_pressure(src, x + 1, y, center.w)
            + bounds.fetch_pressure(src, x, y - 1, center.w)
            + bounds.fetch_pressure(src, x, y + 1, center.w);
        Vec4::new(center.x, center.y, center.z, (neighbours - center.z) * 0.25)
    });
}

/// Approximates the inverse laplacian with a separable kernel: a 3x3
/// prefilter of the divergence, then a horizontal and a vertical pass.
pub fn separable(a: &mut RgbaGrid, b: &mut RgbaGrid, tile_id: &TileIdGrid, tiles: &TileSet) {
    let weights = kernel();

    // a -> b: smoothed divergence into aux
    run_pass(b, tile_id, tiles, Target::Velocity, |_, bounds, x, y| {
        let center = a.get(x, y);
        let mut sum = 0.0;
        for (j, wy) in BINOMIAL.iter().enumerate() {
            for (i, wx) in BINOMIAL.iter().enumerate() {
                let texel = bounds.fetch(a, x + i as i32 - 1, y + j as i32 - 1);
                sum += texel.z * wx * wy;
            }
        }
        Vec4::new(center.x, center.y, sum / 16.0, center.w)
    });

    // b -> a: horizontal pass into w
    run_pass(a, tile_id, tiles, Target::Velocity, |_, bounds, x, y| {
        let center = b.get(x, y);
        let mut sum = 0.0;
        for (i, weight) in weights.iter().enumerate() {
            sum += bounds.fetch(b, x + i as i32 - KERNEL_RADIUS, y).z * weight;
        }
        Vec4::new(center.x, center.y, center.z, sum)
    });

    // a -> b: vertical pass, negated since pressure sinks where fluid spreads
    run_pass(b, tile_id, tiles, Target::Velocity, |_, bounds, x, y| {
        let center = a.get(x, y);
        let mut sum = 0.0;
        for (j, weight) in weights.iter().enumerate() {
            sum += bounds.fetch(a, x, y + j as i32 - KERNEL_RADIUS).w * weight;
        }
        Vec4::new(center.x, center.y, center.z, -KERNEL_GAIN * sum)
    });
}
