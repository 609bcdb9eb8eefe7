use bevy::prelude::*;

use crate::packing::TileRect;
use crate::region::{EdgeFalloff, Region};

/// Per-tile coefficients for one substep, already converted into the tile's
/// UV space.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TileParams {
    pub active: bool,
    pub rect: TileRect,
    pub periodic: BVec2,
    pub solid: BVec2,
    pub pressure: f32,
    /// Velocity kept over the substep, `(1 - viscosity)^dt`.
    pub viscosity: f32,
    pub turbulence: f32,
    pub adhesion: f32,
    pub surface_tension: f32,
    pub dissipation: Vec4,
    pub edge_falloff: EdgeFalloff,
    /// Gravity plus external force minus inertia, in UV per second squared.
    pub external_force: Vec2,
    /// World up in UV space, times the buoyancy coefficient.
    pub buoyancy: Vec2,
    /// UV displacement of fluid that does not follow the region this substep.
    pub offset: Vec2,
}

impl TileParams {
    pub fn from_region(region: &Region, rect: TileRect, dt: f32) -> Self {
        let params = &region.params;
        let kinematics = region.kinematics();

        let force = params.gravity + params.external_force
            - kinematics.acceleration * params.acceleration_scale;
        let offset = region.world_vector_to_uv(kinematics.velocity * dt, &rect)
            * (1.0 - params.velocity_scale);

        Self {
            active: rect.area() > 0.0,
            rect,
            periodic: params.boundaries.periodic(),
            solid: params.boundaries.solid(),
            pressure: params.pressure,
            viscosity: (1.0 - params.viscosity.clamp(0.0, 1.0)).powf(dt),
            turbulence: params.turbulence,
            adhesion: params.adhesion,
            surface_tension: params.surface_tension,
            dissipation: params.dissipation,
            edge_falloff: params.edge_falloff,
            external_force: region.world_vector_to_uv(force, &rect).truncate(),
            buoyancy: region.world_vector_to_uv(Vec3::Y, &rect).truncate() * params.buoyancy,
            offset: offset.truncate(),
        }
    }
}
