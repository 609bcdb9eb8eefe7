//! One simulation substep: the sequence of full-buffer passes advancing
//! every tile of a framebuffer.
//!
//! Each pass reads one grid and writes another, looking up the tile of every
//! texel in the tile-ID grid. Velocities are in atlas UV units per second, so
//! a texel travels `v * dt * resolution` pixels per substep.

use bevy::math::{Vec2, Vec4, Vec4Swizzles};

use crate::config::PressureSolver;
use crate::constants::MAX_TILES;
use crate::storage::{Framebuffer, RgbaGrid, TileIdGrid};

use super::params::TileParams;
use super::pressure;
use super::sampling::{run_pass, Target, TileSet};

/// Pressure settings of a substep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PressureSettings {
    pub solver: PressureSolver,
    pub iterations: u32,
}

fn texel_center(x: i32, y: i32) -> Vec2 {
    Vec2::new(x as f32 + 0.5, y as f32 + 0.5)
}

/// Advances every tile of `fb` by `dt` seconds.
pub fn simulation_step(
    fb: &mut Framebuffer,
    params: &[TileParams; MAX_TILES],
    dt: f32,
    pressure_settings: PressureSettings,
) {
    if !fb.is_allocated() {
        return;
    }
    let tiles = TileSet::new(params, fb.resolution(), fb.state_supersampling);
    tiles.stamp(&mut fb.tile_id);

    advect_state(&fb.state_a, &mut fb.state_b, &fb.velocity_a, &fb.tile_id, &tiles, params, dt);
    advect_velocity(&fb.velocity_a, &mut fb.velocity_b, &fb.tile_id, &tiles, params, dt);
    dissipate(&fb.state_b, &mut fb.state_a, &fb.tile_id, &tiles, params, dt);
    curl(&fb.velocity_b, &mut fb.velocity_a, &fb.tile_id, &tiles);
    gradient(&fb.state_a, &mut fb.state_b, &fb.tile_id, &tiles);
    fb.velocity_b.clear();
    apply_forces(&fb.velocity_a, &mut fb.velocity_b, &fb.state_b, &fb.tile_id, &tiles, params, dt);
    divergence(&fb.velocity_b, &mut fb.velocity_a, &fb.tile_id, &tiles);

    match pressure_settings.solver {
        PressureSolver::Separable => {
            pressure::separable(&mut fb.velocity_a, &mut fb.velocity_b, &fb.tile_id, &tiles)
        }
        PressureSolver::Iterative => pressure::jacobi(
            &mut fb.velocity_a,
            &mut fb.velocity_b,
            &fb.tile_id,
            &tiles,
            pressure_settings.iterations,
        ),
    }

    subtract_gradient(&fb.velocity_b, &mut fb.velocity_a, &fb.tile_id, &tiles, params);
}

/// Semi-Lagrangian advection of the state along the velocity field.
fn advect_state(
    src: &RgbaGrid,
    dst: &mut RgbaGrid,
    velocity: &RgbaGrid,
    tile_id: &TileIdGrid,
    tiles: &TileSet,
    params: &[TileParams; MAX_TILES],
    dt: f32,
) {
    let resolution = src.width() as f32;
    let ss = tiles.supersampling as f32;
    run_pass(dst, tile_id, tiles, Target::State, |tile, bounds, x, y| {
        let Some(velocity_bounds) = tiles.velocity[tile] else {
            return Vec4::ZERO;
        };
        let p = texel_center(x, y);
        let v = velocity_bounds.sample(velocity, p / ss).xy();
        let back = p - (v * dt - params[tile].offset) * resolution;
        bounds.sample(src, back)
    });
}

/// Self-advection of velocity. Pressure is carried over in place as the
/// next solve's starting guess.
fn advect_velocity(
    src: &RgbaGrid,
    dst: &mut RgbaGrid,
    tile_id: &TileIdGrid,
    tiles: &TileSet,
    params: &[TileParams; MAX_TILES],
    dt: f32,
) {
    let resolution = src.width() as f32;
    run_pass(dst, tile_id, tiles, Target::Velocity, |tile, bounds, x, y| {
        let p = texel_center(x, y);
        let center = src.get(x, y);
        let back = p - (center.xy() * dt - params[tile].offset) * resolution;
        let v = bounds.sample(src, back);
        Vec4::new(v.x, v.y, 0.0, center.w)
    });
}

fn dissipate(
    src: &RgbaGrid,
    dst: &mut RgbaGrid,
    tile_id: &TileIdGrid,
    tiles: &TileSet,
    params: &[TileParams; MAX_TILES],
    dt: f32,
) {
    run_pass(dst, tile_id, tiles, Target::State, |tile, bounds, x, y| {
        let tile_params = &params[tile];
        let rate = tile_params.dissipation * dt;
        let decay = Vec4::new(
            (-rate.x).exp(),
            (-rate.y).exp(),
            (-rate.z).exp(),
            (-rate.w).exp(),
        );
        let falloff = &tile_params.edge_falloff;
        let edge = bounds.edge_falloff(
            x,
            y,
            falloff.density_edge_width,
            falloff.density_falloff_rate,
            dt,
        );
        src.get(x, y) * decay * edge
    });
}

/// Vorticity into the velocity texel's `aux` channel.
fn curl(src: &RgbaGrid, dst: &mut RgbaGrid, tile_id: &TileIdGrid, tiles: &TileSet) {
    run_pass(dst, tile_id, tiles, Target::Velocity, |_, bounds, x, y| {
        let center = src.get(x, y);
        let left = bounds.fetch_velocity(src, x - 1, y);
        let right = bounds.fetch_velocity(src, x + 1, y);
        let bottom = bounds.fetch_velocity(src, x, y - 1);
        let top = bounds.fetch_velocity(src, x, y + 1);
        let curl = ((right.y - left.y) - (top.x - bottom.x)) * 0.5;
        Vec4::new(center.x, center.y, curl, center.w)
    });
}

/// Gradient and laplacian of the state alpha, as `(gx, gy, laplacian, a)`.
fn gradient(src: &RgbaGrid, dst: &mut RgbaGrid, tile_id: &TileIdGrid, tiles: &TileSet) {
    run_pass(dst, tile_id, tiles, Target::State, |_, bounds, x, y| {
        let center = src.get(x, y).w;
        let left = bounds.fetch(src, x - 1, y).w;
        let right = bounds.fetch(src, x + 1, y).w;
        let bottom = bounds.fetch(src, x, y - 1).w;
        let top = bounds.fetch(src, x, y + 1).w;
        Vec4::new(
            (right - left) * 0.5,
            (top - bottom) * 0.5,
            left + right + bottom + top - 4.0 * center,
            center,
        )
    });
}

/// Integrates every force acting on the fluid, then projects the velocity
/// onto solid walls.
fn apply_forces(
    src: &RgbaGrid,
    dst: &mut RgbaGrid,
    density_gradient: &RgbaGrid,
    tile_id: &TileIdGrid,
    tiles: &TileSet,
    params: &[TileParams; MAX_TILES],
    dt: f32,
) {
    let ss = tiles.supersampling as f32;
    run_pass(dst, tile_id, tiles, Target::Velocity, |tile, bounds, x, y| {
        let tile_params = &params[tile];
        let center = src.get(x, y);
        let mut v = center.xy() * tile_params.viscosity;

        let gradient = match tiles.state[tile] {
            Some(state_bounds) => state_bounds.sample(density_gradient, texel_center(x, y) * ss),
            None => Vec4::ZERO,
        };
        let temperature = gradient.w;

        v += (tile_params.external_force + tile_params.buoyancy * temperature) * dt;

        if tile_params.turbulence != 0.0 {
            let curl = center.z;
            let left = bounds.fetch(src, x - 1, y).z.abs();
            let right = bounds.fetch(src, x + 1, y).z.abs();
            let bottom = bounds.fetch(src, x, y - 1).z.abs();
            let top = bounds.fetch(src, x, y + 1).z.abs();
            let n = Vec2::new(right - left, top - bottom).normalize_or_zero();
            v += Vec2::new(n.y, -n.x) * curl * tile_params.turbulence * dt;
        }

        if tile_params.surface_tension != 0.0 {
            let normal = gradient.xy().normalize_or_zero();
            v -= normal * gradient.z * tile_params.surface_tension * dt;
        }

        if tile_params.adhesion != 0.0 {
            let grip = 1.0 - tile_params.adhesion * temperature.clamp(0.0, 1.0);
            v *= grip.max(0.0).powf(dt);
        }

        let falloff = &tile_params.edge_falloff;
        v *= bounds.edge_falloff(
            x,
            y,
            falloff.velocity_edge_width,
            falloff.velocity_falloff_rate,
            dt,
        );

        let walls = bounds.on_solid_edge(x, y);
        if walls.x {
            v.x = 0.0;
        }
        if walls.y {
            v.y = 0.0;
        }
        Vec4::new(v.x, v.y, 0.0, center.w)
    });
}

/// Divergence into the velocity texel's `aux` channel.
fn divergence(src: &RgbaGrid, dst: &mut RgbaGrid, tile_id: &TileIdGrid, tiles: &TileSet) {
    run_pass(dst, tile_id, tiles, Target::Velocity, |_, bounds, x, y| {
        let center = src.get(x, y);
        let left = bounds.fetch_velocity(src, x - 1, y);
        let right = bounds.fetch_velocity(src, x + 1, y);
        let bottom = bounds.fetch_velocity(src, x, y - 1);
        let top = bounds.fetch_velocity(src, x, y + 1);
        let divergence = ((right.x - left.x) + (top.y - bottom.y)) * 0.5;
        Vec4::new(center.x, center.y, divergence, center.w)
    });
}

/// Removes the pressure gradient from the velocity and re-enforces solid
/// walls.
fn subtract_gradient(
    src: &RgbaGrid,
    dst: &mut RgbaGrid,
    tile_id: &TileIdGrid,
    tiles: &TileSet,
    params: &[TileParams; MAX_TILES],
) {
    run_pass(dst, tile_id, tiles, Target::Velocity, |tile, bounds, x, y| {
        let center = src.get(x, y);
        let left = bounds.fetch_pressure(src, x - 1, y, center.w);
        let right = bounds.fetch_pressure(src, x + 1, y, center.w);
        let bottom = bounds.fetch_pressure(src, x, y - 1, center.w);
        let top = bounds.fetch_pressure(src, x, y + 1, center.w);
        let gradient = Vec2::new(right - left, top - bottom) * 0.5;

        let mut v = center.xy() - gradient * params[tile].pressure;
        let walls = bounds.on_solid_edge(x, y);
        if walls.x {
            v.x = 0.0;
        }
        if walls.y {
            v.y = 0.0;
        }
        Vec4::new(v.x, v.y, center.z, center.w)
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StorageConfig;
    use crate::packing::TileRect;
    use crate::region::{BoundaryConditions, BoundaryType};
    use crate::storage::FramebufferStorage;

    const SEPARABLE: PressureSettings = PressureSettings {
        solver: PressureSolver::Separable,
        iterations: 0,
    };

    fn framebuffer(resolution: u32, supersampling: u32) -> Framebuffer {
        let mut storage = FramebufferStorage::new(StorageConfig::default());
        let id = storage.request(resolution, supersampling);
        storage.get(id).unwrap().clone()
    }

    fn still_params(boundaries: BoundaryConditions) -> [TileParams; MAX_TILES] {
        let mut params = [TileParams::default(); MAX_TILES];
        params[1] = TileParams {
            active: true,
            rect: TileRect::new(0.0, 0.0, 1.0, 1.0),
            periodic: boundaries.periodic(),
            solid: boundaries.solid(),
            viscosity: 1.0,
            ..Default::default()
        };
        params
    }

    #[test]
    fn test_static_blob_keeps_its_mass() {
        let mut fb = framebuffer(32, 2);
        for y in 20..40 {
            for x in 24..36 {
                fb.state_a.set(x, y, Vec4::new(0.5, 0.25, 1.0, 1.0));
            }
        }
        let mass = fb.state_a.sum();
        let params = still_params(BoundaryConditions::default());

        for _ in 0..10 {
            simulation_step(&mut fb, &params, 0.008, SEPARABLE);
        }
        assert!((fb.state_a.sum() - mass).abs().max_element() < 1e-3);
        assert_eq!(fb.velocity_a.sum().truncate().truncate(), Vec2::ZERO);
    }

    fn edge_column_after_step(horizontal: BoundaryType) -> (Framebuffer, i32) {
        let mut fb = framebuffer(32, 1);
        let n = fb.resolution() as i32;
        let dt = 0.005;
        // One pixel per step to the right
        let speed = 1.0 / n as f32 / dt;
        fb.velocity_a.fill(Vec4::new(speed, 0.0, 0.0, 0.0));
        for y in 0..n {
            fb.state_a.set(n - 1, y, Vec4::ONE);
        }
        let params = still_params(BoundaryConditions {
            horizontal,
            vertical: BoundaryType::Open,
        });
        simulation_step(&mut fb, &params, dt, SEPARABLE);
        (fb, n)
    }

    #[test]
    fn test_periodic_edges_wrap() {
        let (fb, n) = edge_column_after_step(BoundaryType::Periodic);
        assert!((fb.state_a.get(0, n / 2).w - 1.0).abs() < 1e-4);
        assert!(fb.velocity_a.get(n - 1, n / 2).x > 0.0);
    }

    #[test]
    fn test_solid_edges_block_flow() {
        let (fb, n) = edge_column_after_step(BoundaryType::Solid);
        assert_eq!(fb.state_a.get(0, n / 2).w, 0.0);
        assert_eq!(fb.velocity_a.get(n - 1, n / 2).x, 0.0);
        assert_eq!(fb.velocity_a.get(0, n / 2).x, 0.0);
    }

    #[test]
    fn test_phantom_texels_cleared() {
        let mut fb = framebuffer(32, 1);
        fb.state_a.fill(Vec4::ONE);
        let mut params = still_params(BoundaryConditions::default());
        params[1].rect = TileRect::new(0.0, 0.0, 0.5, 1.0);
        simulation_step(&mut fb, &params, 0.008, SEPARABLE);

        assert_eq!(fb.tile_id.get(4, 4), 1);
        assert_eq!(fb.tile_id.get(20, 4), 0);
        assert_eq!(fb.state_a.get(20, 4), Vec4::ZERO);
        assert!((fb.state_a.get(4, 4).w - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_buoyancy_lifts_hot_fluid() {
        let mut fb = framebuffer(32, 1);
        for y in 12..20 {
            for x in 12..20 {
                fb.state_a.set(x, y, Vec4::new(0.0, 0.0, 0.0, 1.0));
            }
        }
        let mut params = still_params(BoundaryConditions::default());
        params[1].buoyancy = Vec2::new(0.0, 1.0);
        simulation_step(&mut fb, &params, 0.008, SEPARABLE);

        assert!(fb.velocity_a.get(16, 16).y > 0.0);
        assert_eq!(fb.velocity_a.get(2, 2).y, 0.0);
    }

    #[test]
    fn test_dissipation() {
        let mut fb = framebuffer(32, 1);
        fb.state_a.fill(Vec4::ONE);
        let mut params = still_params(BoundaryConditions::default());
        params[1].dissipation = Vec4::new(1.0, 0.0, 0.0, 0.0);
        simulation_step(&mut fb, &params, 0.5, SEPARABLE);

        let texel = fb.state_a.get(16, 16);
        assert!((texel.x - (-0.5f32).exp()).abs() < 1e-5);
        assert!((texel.y - 1.0).abs() < 1e-5);
    }
}
