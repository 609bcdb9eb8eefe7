//! Conversions between world space and a region's atlas tile, and the
//! finite-difference motion tracking of a region's transform.

use bevy::prelude::*;

use crate::constants::EPSILON;
use crate::packing::TileRect;

/// Maps a world-space vector into the tile's UV space.
///
/// Local x and y are scaled from region size to tile size; z is left in
/// local units.
pub fn world_vector_to_uv(transform: &Transform, size: Vec3, vector: Vec3, rect: &TileRect) -> Vec3 {
    if size.x.abs() < EPSILON || size.y.abs() < EPSILON {
        return Vec3::ZERO;
    }
    let local = transform.compute_affine().inverse().transform_vector3(vector);
    Vec3::new(
        local.x * rect.size.x / size.x,
        local.y * rect.size.y / size.y,
        local.z,
    )
}

/// Maps a tile UV vector back into world space.
pub fn uv_vector_to_world(transform: &Transform, size: Vec3, vector: Vec3, rect: &TileRect) -> Vec3 {
    if rect.size.x.abs() < EPSILON || rect.size.y.abs() < EPSILON {
        return Vec3::ZERO;
    }
    let local = Vec3::new(
        vector.x * size.x / rect.size.x,
        vector.y * size.y / rect.size.y,
        vector.z,
    );
    transform.compute_affine().transform_vector3(local)
}

/// Maps a world-space point to atlas UV coordinates inside the tile.
pub fn world_point_to_uv(transform: &Transform, size: Vec3, point: Vec3, rect: &TileRect) -> Vec3 {
    if size.x.abs() < EPSILON || size.y.abs() < EPSILON {
        return Vec3::ZERO;
    }
    let mut local = transform.compute_affine().inverse().transform_point3(point);
    local.x = (local.x + size.x * 0.5) * rect.size.x / size.x + rect.position.x;
    local.y = (local.y + size.y * 0.5) * rect.size.y / size.y + rect.position.y;
    local
}

/// Angular velocity that takes `from` to `to` in `dt` seconds.
pub fn angular_velocity(from: Quat, to: Quat, dt: f32) -> Vec3 {
    let delta = to * from.inverse();
    Vec3::new(delta.x, delta.y, delta.z) * 2.0 / dt
}

/// Velocity and acceleration of a transform, derived from where it was at
/// the end of the previous tick.
#[derive(Debug, Clone, Copy, Default)]
pub struct Kinematics {
    pub velocity: Vec3,
    pub angular_velocity: Vec3,
    pub acceleration: Vec3,
    old_position: Vec3,
    old_rotation: Quat,
    old_velocity: Vec3,
}

impl Kinematics {
    pub fn new(transform: &Transform) -> Self {
        Self {
            old_position: transform.translation,
            old_rotation: transform.rotation,
            ..default()
        }
    }

    /// Recomputes velocities and acceleration for a tick of length `dt`.
    pub fn update(&mut self, transform: &Transform, dt: f32) {
        if dt <= 0.0 {
            return;
        }
        self.velocity = (transform.translation - self.old_position) / dt;
        self.angular_velocity = angular_velocity(self.old_rotation, transform.rotation, dt);
        self.acceleration = (self.velocity - self.old_velocity) / dt;
    }

    /// Remembers the current state as the previous one for the next tick.
    pub fn end_tick(&mut self, transform: &Transform) {
        self.old_velocity = self.velocity;
        self.old_position = transform.translation;
        self.old_rotation = transform.rotation;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quarter_tile() -> TileRect {
        TileRect::new(0.5, 0.25, 0.5, 0.25)
    }

    #[test]
    fn test_world_point_to_uv_corners() {
        let transform = Transform::from_xyz(10.0, 0.0, 0.0);
        let size = Vec3::new(2.0, 1.0, 1.0);
        let rect = quarter_tile();

        let center = world_point_to_uv(&transform, size, Vec3::new(10.0, 0.0, 0.0), &rect);
        assert!((center.truncate() - Vec2::new(0.75, 0.375)).length() < 1e-5);

        let corner = world_point_to_uv(&transform, size, Vec3::new(9.0, -0.5, 0.0), &rect);
        assert!((corner.truncate() - rect.position).length() < 1e-5);
    }

    #[test]
    fn test_vector_round_trip() {
        let transform = Transform::from_rotation(Quat::from_rotation_z(0.7)).with_scale(Vec3::splat(2.0));
        let size = Vec3::new(3.0, 1.5, 1.0);
        let rect = quarter_tile();

        let world = Vec3::new(0.3, -1.2, 0.0);
        let uv = world_vector_to_uv(&transform, size, world, &rect);
        let back = uv_vector_to_world(&transform, size, uv, &rect);
        assert!((back - world).length() < 1e-4);
    }

    #[test]
    fn test_degenerate_size_maps_to_zero() {
        let transform = Transform::default();
        let v = world_vector_to_uv(&transform, Vec3::new(0.0, 1.0, 1.0), Vec3::ONE, &quarter_tile());
        assert_eq!(v, Vec3::ZERO);
    }

    #[test]
    fn test_kinematics_constant_velocity() {
        let mut transform = Transform::default();
        let mut kinematics = Kinematics::new(&transform);

        // Accelerating from rest to 1 unit per 0.5s
        transform.translation.x = 0.5;
        kinematics.update(&transform, 0.5);
        assert!((kinematics.velocity.x - 1.0).abs() < 1e-5);
        assert!((kinematics.acceleration.x - 2.0).abs() < 1e-5);
        kinematics.end_tick(&transform);

        // Same velocity again: no acceleration
        transform.translation.x = 1.0;
        kinematics.update(&transform, 0.5);
        assert!((kinematics.velocity.x - 1.0).abs() < 1e-5);
        assert!(kinematics.acceleration.length() < 1e-5);
    }

    #[test]
    fn test_angular_velocity_about_z() {
        let from = Quat::IDENTITY;
        let to = Quat::from_rotation_z(0.01);
        let w = angular_velocity(from, to, 0.01);
        // Small angles: 2 * sin(theta / 2) / dt ~= theta / dt
        assert!((w.z - 1.0).abs() < 1e-3);
        assert!(w.x.abs() < 1e-6 && w.y.abs() < 1e-6);
    }
}
