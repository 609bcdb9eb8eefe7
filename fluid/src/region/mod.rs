//! Fluid regions: the placed surfaces a solver simulates.
//!
//! A region owns its placement in the world, a fixed local size and the
//! physical coefficients of the fluid it holds. Each registered region is
//! given one tile of the solver's atlas; the transforms in [`transform`] map
//! between the two spaces.
//!
//! ## Design Principles
//!
//! - The host writes `transform` every tick; velocity and acceleration are
//!   derived from it by finite differences, never set directly.
//! - Splat sources are referenced by [`SourceId`] and live outside the
//!   region, so one source can feed several regions.

pub mod collider;
pub mod transform;

use bevy::math::primitives::InfinitePlane3d;
use bevy::math::{Dir3, Ray3d};
use bevy::prelude::*;
use serde::{Deserialize, Serialize};

use crate::constants::EPSILON;
use crate::packing::TileRect;
use crate::splat::provider::TargetProvider;
use crate::splat::SourceId;
use crate::storage::FramebufferId;

pub use collider::{RayHit, SurfaceCollider, TriangleCollider};
pub use transform::Kinematics;

/// Behaviour of the fluid at a pair of opposite tile edges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum BoundaryType {
    /// Fluid leaves freely.
    #[default]
    Open,
    /// Walls with zero normal velocity.
    Solid,
    /// Fluid leaving one edge enters through the opposite one.
    Periodic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct BoundaryConditions {
    pub horizontal: BoundaryType,
    pub vertical: BoundaryType,
}

impl BoundaryConditions {
    pub fn periodic(&self) -> BVec2 {
        BVec2::new(
            self.horizontal == BoundaryType::Periodic,
            self.vertical == BoundaryType::Periodic,
        )
    }

    pub fn solid(&self) -> BVec2 {
        BVec2::new(
            self.horizontal == BoundaryType::Solid,
            self.vertical == BoundaryType::Solid,
        )
    }
}

/// Fade-out of density and velocity near non-periodic tile edges. Widths are
/// fractions of the tile, rates are per second.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct EdgeFalloff {
    pub density_edge_width: f32,
    pub density_falloff_rate: f32,
    pub velocity_edge_width: f32,
    pub velocity_falloff_rate: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum LookAtMode {
    /// Face away from the target, so the target sees the region's front.
    #[default]
    LookAt,
    /// Take the target's orientation.
    CopyOrientation,
}

/// Something the region keeps facing. The host updates `target` every tick.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LookAt {
    pub mode: LookAtMode,
    pub target: Transform,
}

/// Light used when rendering a region's volume.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum LightSource {
    Directional {
        direction: Vec3,
        color: Vec3,
        intensity: f32,
    },
    Point {
        position: Vec3,
        range: f32,
        color: Vec3,
        intensity: f32,
    },
}

/// Light expressed in the region's local space.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum LightParams {
    #[default]
    None,
    Directional {
        local_direction: Vec3,
        color: Vec3,
    },
    Point {
        local_position: Vec3,
        inverse_range_squared: f32,
        color: Vec3,
    },
}

/// What a renderer needs to draw a region this tick.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct RenderState {
    /// Atlas tile index, never the phantom tile once assigned.
    pub tile: usize,
    pub uv_rect: TileRect,
    pub framebuffer: Option<FramebufferId>,
    pub generation: u64,
    pub light: LightParams,
}

/// Physical coefficients and placement settings of a region.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegionParams {
    /// Local size. Only x and y are simulated.
    pub size: Vec3,
    pub boundaries: BoundaryConditions,
    pub edge_falloff: EdgeFalloff,
    /// Fraction (0-1) of the region's own velocity the fluid follows. At zero
    /// the region behaves as static and fluid is left behind as it moves.
    pub velocity_scale: f32,
    /// Fraction (0-1) of world-space inertia felt by the fluid.
    pub acceleration_scale: f32,
    pub gravity: Vec3,
    pub external_force: Vec3,
    /// 0-1
    pub pressure: f32,
    /// 0-1
    pub viscosity: f32,
    /// Vorticity confinement strength.
    pub turbulence: f32,
    /// 0-1
    pub adhesion: f32,
    /// 0-1
    pub surface_tension: f32,
    /// Upward force proportional to the density alpha (temperature).
    pub buoyancy: f32,
    /// Per-channel density loss per second.
    pub dissipation: Vec4,
    /// Density written by [`crate::solver::Solver::clear_region`].
    pub clear_color: Vec4,
}

impl Default for RegionParams {
    fn default() -> Self {
        Self {
            size: Vec3::ONE,
            boundaries: BoundaryConditions::default(),
            edge_falloff: EdgeFalloff::default(),
            velocity_scale: 1.0,
            acceleration_scale: 1.0,
            gravity: Vec3::ZERO,
            external_force: Vec3::ZERO,
            pressure: 1.0,
            viscosity: 0.0,
            turbulence: 5.0,
            adhesion: 0.0,
            surface_tension: 0.0,
            buoyancy: 1.0,
            dissipation: Vec4::ZERO,
            clear_color: Vec4::ZERO,
        }
    }
}

/// One placed fluid surface.
pub struct Region {
    pub transform: Transform,
    pub params: RegionParams,
    pub look_at: Option<LookAt>,
    /// Origin for splat projection rays. Without one, rays are cast along
    /// the region's normal.
    pub project_from: Option<Vec3>,
    pub collider: Option<Box<dyn SurfaceCollider>>,
    pub light_source: Option<LightSource>,
    /// Sources splatted into this region every tick.
    pub targets: Vec<SourceId>,
    /// Queried every tick for additional sources.
    pub providers: Vec<Box<dyn TargetProvider>>,
    kinematics: Kinematics,
    render_state: RenderState,
}

impl Region {
    pub fn new(transform: Transform, params: RegionParams) -> Self {
        Self {
            kinematics: Kinematics::new(&transform),
            transform,
            params,
            look_at: None,
            project_from: None,
            collider: None,
            light_source: None,
            targets: Vec::new(),
            providers: Vec::new(),
            render_state: RenderState::default(),
        }
    }

    pub fn with_targets(mut self, targets: impl IntoIterator<Item = SourceId>) -> Self {
        self.targets.extend(targets);
        self
    }

    pub fn with_provider(mut self, provider: impl TargetProvider + 'static) -> Self {
        self.providers.push(Box::new(provider));
        self
    }

    pub fn with_collider(mut self, collider: impl SurfaceCollider + 'static) -> Self {
        self.collider = Some(Box::new(collider));
        self
    }

    pub fn size(&self) -> Vec3 {
        self.params.size
    }

    pub fn kinematics(&self) -> &Kinematics {
        &self.kinematics
    }

    pub fn velocity(&self) -> Vec3 {
        self.kinematics.velocity
    }

    pub fn angular_velocity(&self) -> Vec3 {
        self.kinematics.angular_velocity
    }

    pub fn render_state(&self) -> &RenderState {
        &self.render_state
    }

    pub fn world_vector_to_uv(&self, vector: Vec3, rect: &TileRect) -> Vec3 {
        transform::world_vector_to_uv(&self.transform, self.params.size, vector, rect)
    }

    pub fn uv_vector_to_world(&self, vector: Vec3, rect: &TileRect) -> Vec3 {
        transform::uv_vector_to_world(&self.transform, self.params.size, vector, rect)
    }

    pub fn world_point_to_uv(&self, point: Vec3, rect: &TileRect) -> Vec3 {
        transform::world_point_to_uv(&self.transform, self.params.size, point, rect)
    }

    /// Turns the region toward its look-at target, if it has one.
    pub fn update_facing(&mut self) {
        let Some(look_at) = self.look_at else {
            return;
        };
        match look_at.mode {
            LookAtMode::LookAt => {
                let direction = look_at.target.translation - self.transform.translation;
                if direction.length_squared() > EPSILON {
                    self.transform.look_to(direction, Vec3::Y);
                }
            }
            LookAtMode::CopyOrientation => {
                self.transform.rotation = look_at.target.rotation;
            }
        }
    }

    pub(crate) fn update_kinematics(&mut self, dt: f32) {
        self.kinematics.update(&self.transform, dt);
    }

    pub(crate) fn end_tick(&mut self) {
        self.kinematics.end_tick(&self.transform);
    }

    pub(crate) fn set_render_state(
        &mut self,
        tile: usize,
        uv_rect: TileRect,
        framebuffer: Option<FramebufferId>,
        generation: u64,
    ) {
        let to_local = self.transform.compute_affine().inverse();
        let light = match self.light_source {
            None => LightParams::None,
            Some(LightSource::Directional {
                direction,
                color,
                intensity,
            }) => LightParams::Directional {
                local_direction: to_local.transform_vector3(direction).normalize_or_zero(),
                color: color * intensity,
            },
            Some(LightSource::Point {
                position,
                range,
                color,
                intensity,
            }) => LightParams::Point {
                local_position: to_local.transform_point3(position),
                inverse_range_squared: 1.0 / (range * range).max(EPSILON),
                color: color * intensity,
            },
        };
        self.render_state = RenderState {
            tile,
            uv_rect,
            framebuffer,
            generation,
            light,
        };
    }

    fn projection_origin(&self, target_position: Vec3) -> Vec3 {
        self.project_from
            .unwrap_or(target_position + *self.transform.local_z())
    }

    /// Projects a point onto the region's surface.
    ///
    /// Returns `(x, y, width, height)` where `x, y` are in region space
    /// centered on zero (`-0.5..0.5` across the region) and the extents are
    /// `projection_size` in the same units. With `scale_with_distance`, the
    /// size follows how large one world unit appears on the surface at the
    /// hit point.
    pub fn project_target(
        &self,
        target_position: Vec3,
        projection_size: Vec2,
        aspect_ratio: f32,
        scale_with_distance: bool,
    ) -> Option<Vec4> {
        const COLLIDER_PROBE: f32 = 0.01;

        let origin = self.projection_origin(target_position);
        let ray = Ray3d::new(origin, Dir3::new(target_position - origin).ok()?);
        let right = *self.transform.local_x();

        let (center, scale) = match &self.collider {
            Some(collider) => {
                let hit = collider.raycast(&self.transform, ray)?;
                let mut scale = 1.0;
                if scale_with_distance {
                    let probe = target_position + right * COLLIDER_PROBE;
                    let second = Dir3::new(probe - origin)
                        .ok()
                        .and_then(|dir| collider.raycast(&self.transform, Ray3d::new(origin, dir)));
                    if let Some(second) = second {
                        scale = hit.uv.distance(second.uv) / COLLIDER_PROBE;
                    }
                }
                (hit.uv - Vec2::splat(0.5), scale)
            }
            None => {
                let local = self.planar_hit(ray)?;
                let mut scale = 1.0;
                if scale_with_distance {
                    let second = Dir3::new(target_position + right - origin)
                        .ok()
                        .and_then(|dir| self.planar_hit(Ray3d::new(origin, dir)));
                    if let Some(second) = second {
                        scale = local.distance(second);
                    }
                }
                (local, scale)
            }
        };

        Some(Vec4::new(
            center.x,
            center.y,
            projection_size.x * scale * aspect_ratio,
            projection_size.y * scale,
        ))
    }

    /// Hit of a ray with the region's plane, in size-normalized local space.
    fn planar_hit(&self, ray: Ray3d) -> Option<Vec2> {
        let size = self.params.size.truncate();
        if size.x.abs() < EPSILON || size.y.abs() < EPSILON {
            return None;
        }
        let plane = InfinitePlane3d {
            normal: self.transform.local_z(),
        };
        let distance = ray.intersect_plane(self.transform.translation, plane)?;
        let point = ray.get_point(distance);
        let local = self
            .transform
            .compute_affine()
            .inverse()
            .transform_point3(point);
        Some(local.truncate() / size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::region::collider::TriangleCollider;

    fn plane_region(size: Vec3) -> Region {
        Region::new(
            Transform::default(),
            RegionParams {
                size,
                ..default()
            },
        )
    }

    #[test]
    fn test_default_params() {
        let params = RegionParams::default();
        assert_eq!(params.pressure, 1.0);
        assert_eq!(params.turbulence, 5.0);
        assert_eq!(params.buoyancy, 1.0);
        assert_eq!(params.velocity_scale, 1.0);
    }

    #[test]
    fn test_boundary_flags() {
        let boundaries = BoundaryConditions {
            horizontal: BoundaryType::Periodic,
            vertical: BoundaryType::Solid,
        };
        assert_eq!(boundaries.periodic(), BVec2::new(true, false));
        assert_eq!(boundaries.solid(), BVec2::new(false, true));
    }

    #[test]
    fn test_planar_projection() {
        let region = plane_region(Vec3::new(2.0, 4.0, 1.0));

        // A point hovering above the plane projects straight down onto it
        let projection = region
            .project_target(Vec3::new(0.5, 1.0, 0.3), Vec2::splat(0.1), 1.0, false)
            .unwrap();
        assert!((projection.x - 0.25).abs() < 1e-5);
        assert!((projection.y - 0.25).abs() < 1e-5);
        assert!((projection.z - 0.1).abs() < 1e-6);
    }

    #[test]
    fn test_planar_projection_scales_with_size() {
        let region = plane_region(Vec3::new(2.0, 2.0, 1.0));
        let projection = region
            .project_target(Vec3::ZERO, Vec2::splat(1.0), 2.0, true)
            .unwrap();
        // One world unit spans half of a region two units wide
        assert!((projection.w - 0.5).abs() < 1e-4);
        assert!((projection.z - 1.0).abs() < 1e-4);
    }

    #[test]
    fn test_collider_projection() {
        let region = plane_region(Vec3::new(2.0, 2.0, 1.0))
            .with_collider(TriangleCollider::quad(Vec2::new(2.0, 2.0)));

        let projection = region
            .project_target(Vec3::new(0.5, -0.5, 0.0), Vec2::splat(1.0), 1.0, true)
            .unwrap();
        assert!((projection.x - 0.25).abs() < 1e-4);
        assert!((projection.y + 0.25).abs() < 1e-4);
        assert!((projection.w - 0.5).abs() < 1e-3);
    }

    #[test]
    fn test_collider_scale_matches_planar() {
        // Splat sizes are in region space either way, so a flat collider
        // spanning a non-square region scales like the plane itself
        let size = Vec3::new(3.0, 1.5, 1.0);
        let planar = plane_region(size);
        let collider = plane_region(size).with_collider(TriangleCollider::quad(size.truncate()));

        let target = Vec3::new(0.3, 0.2, 0.0);
        let from_plane = planar
            .project_target(target, Vec2::ONE, 1.0, true)
            .unwrap();
        let from_collider = collider
            .project_target(target, Vec2::ONE, 1.0, true)
            .unwrap();

        assert!((from_plane - from_collider).abs().max_element() < 1e-3);
        assert!((from_collider.z - 1.0 / 3.0).abs() < 1e-3);
        assert!((from_collider.w - 1.0 / 3.0).abs() < 1e-3);
    }

    #[test]
    fn test_projection_misses_parallel_plane() {
        let mut region = plane_region(Vec3::ONE);
        region.project_from = Some(Vec3::new(-5.0, 0.0, 0.0));
        // Ray from project_from runs inside the plane
        assert!(region
            .project_target(Vec3::new(1.0, 0.0, 0.0), Vec2::ONE, 1.0, false)
            .is_none());
    }

    #[test]
    fn test_look_at_faces_away_from_target() {
        let mut region = plane_region(Vec3::ONE);
        region.look_at = Some(LookAt {
            mode: LookAtMode::LookAt,
            target: Transform::from_xyz(10.0, 0.0, 0.0),
        });
        region.update_facing();
        // Local +z points away from the target
        assert!((*region.transform.local_z() - Vec3::NEG_X).length() < 1e-5);

        region.look_at = Some(LookAt {
            mode: LookAtMode::CopyOrientation,
            target: Transform::from_rotation(Quat::from_rotation_y(0.5)),
        });
        region.update_facing();
        assert!(region.transform.rotation.angle_between(Quat::from_rotation_y(0.5)) < 1e-4);
    }

    #[test]
    fn test_render_state_light() {
        let mut region = plane_region(Vec3::ONE);
        region.transform = Transform::from_xyz(0.0, 1.0, 0.0);
        region.light_source = Some(LightSource::Point {
            position: Vec3::new(0.0, 3.0, 0.0),
            range: 2.0,
            color: Vec3::ONE,
            intensity: 2.0,
        });
        region.set_render_state(1, TileRect::new(0.0, 0.0, 1.0, 1.0), Some(0), 4);

        let state = region.render_state();
        assert_eq!(state.tile, 1);
        assert_eq!(state.generation, 4);
        match state.light {
            LightParams::Point {
                local_position,
                inverse_range_squared,
                color,
            } => {
                assert!((local_position - Vec3::new(0.0, 2.0, 0.0)).length() < 1e-5);
                assert!((inverse_range_squared - 0.25).abs() < 1e-6);
                assert_eq!(color, Vec3::splat(2.0));
            }
            other => panic!("unexpected light {:?}", other),
        }
    }
}
