//! Ray casting against a region's surface, used to project splats onto
//! surfaces that are not flat.

use bevy::math::{Ray3d, Vec2, Vec3};
use bevy::prelude::Transform;

/// Where a ray hit a surface.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RayHit {
    pub point: Vec3,
    /// Surface texture coordinate at the hit, in `[0, 1]` across the region.
    pub uv: Vec2,
    pub distance: f32,
}

/// A surface rays can be cast against.
pub trait SurfaceCollider: Send + Sync {
    /// Casts a world-space ray against the surface placed at `transform`.
    fn raycast(&self, transform: &Transform, ray: Ray3d) -> Option<RayHit>;
}

/// Triangle mesh with per-vertex texture coordinates, in region-local space.
#[derive(Debug, Clone, Default)]
pub struct TriangleCollider {
    pub vertices: Vec<Vec3>,
    pub uvs: Vec<Vec2>,
    pub triangles: Vec<[u32; 3]>,
}

impl TriangleCollider {
    /// Flat rectangle in the local XY plane, centered on the origin, with uv
    /// `(0, 0)` at the `-x, -y` corner.
    pub fn quad(size: Vec2) -> Self {
        let h = size * 0.5;
        Self {
            vertices: vec![
                Vec3::new(-h.x, -h.y, 0.0),
                Vec3::new(h.x, -h.y, 0.0),
                Vec3::new(h.x, h.y, 0.0),
                Vec3::new(-h.x, h.y, 0.0),
            ],
            uvs: vec![
                Vec2::new(0.0, 0.0),
                Vec2::new(1.0, 0.0),
                Vec2::new(1.0, 1.0),
                Vec2::new(0.0, 1.0),
            ],
            triangles: vec![[0, 1, 2], [0, 2, 3]],
        }
    }

    /// Möller–Trumbore. Returns the ray parameter and barycentric `(u, v)`.
    fn intersect(origin: Vec3, direction: Vec3, a: Vec3, b: Vec3, c: Vec3) -> Option<(f32, f32, f32)> {
        const PARALLEL_EPSILON: f32 = 1e-8;

        let edge1 = b - a;
        let edge2 = c - a;
        let p = direction.cross(edge2);
        let det = edge1.dot(p);
        if det.abs() < PARALLEL_EPSILON {
            return None;
        }
        let inv_det = 1.0 / det;

        let s = origin - a;
        let u = s.dot(p) * inv_det;
        if !(0.0..=1.0).contains(&u) {
            return None;
        }
        let q = s.cross(edge1);
        let v = direction.dot(q) * inv_det;
        if v < 0.0 || u + v > 1.0 {
            return None;
        }
        let t = edge2.dot(q) * inv_det;
        (t >= 0.0).then_some((t, u, v))
    }
}

impl SurfaceCollider for TriangleCollider {
    fn raycast(&self, transform: &Transform, ray: Ray3d) -> Option<RayHit> {
        let to_world = transform.compute_affine();
        let to_local = to_world.inverse();
        let origin = to_local.transform_point3(ray.origin);
        // Unnormalized, so the ray parameter stays a world-space distance
        let direction = to_local.transform_vector3(*ray.direction);

        let mut closest: Option<(f32, Vec2)> = None;
        for [i0, i1, i2] in &self.triangles {
            let (i0, i1, i2) = (*i0 as usize, *i1 as usize, *i2 as usize);
            let (Some(a), Some(b), Some(c)) = (
                self.vertices.get(i0),
                self.vertices.get(i1),
                self.vertices.get(i2),
            ) else {
                continue;
            };
            let Some((t, u, v)) = Self::intersect(origin, direction, *a, *b, *c) else {
                continue;
            };
            if closest.is_some_and(|(best, _)| best <= t) {
                continue;
            }
            let uv_at = |i: usize| self.uvs.get(i).copied().unwrap_or(Vec2::ZERO);
            let uv = uv_at(i0) * (1.0 - u - v) + uv_at(i1) * u + uv_at(i2) * v;
            closest = Some((t, uv));
        }

        closest.map(|(distance, uv)| RayHit {
            point: ray.get_point(distance),
            uv,
            distance,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bevy::math::Dir3;

    #[test]
    fn test_quad_hit_uv() {
        let collider = TriangleCollider::quad(Vec2::new(2.0, 2.0));
        let transform = Transform::default();
        let ray = Ray3d::new(Vec3::new(0.5, -0.5, 3.0), Dir3::NEG_Z);

        let hit = collider.raycast(&transform, ray).unwrap();
        assert!((hit.distance - 3.0).abs() < 1e-5);
        assert!((hit.point - Vec3::new(0.5, -0.5, 0.0)).length() < 1e-5);
        assert!((hit.uv - Vec2::new(0.75, 0.25)).length() < 1e-5);
    }

    #[test]
    fn test_miss_outside_and_behind() {
        let collider = TriangleCollider::quad(Vec2::ONE);
        let transform = Transform::default();

        let outside = Ray3d::new(Vec3::new(2.0, 0.0, 1.0), Dir3::NEG_Z);
        assert!(collider.raycast(&transform, outside).is_none());

        let away = Ray3d::new(Vec3::new(0.0, 0.0, 1.0), Dir3::Z);
        assert!(collider.raycast(&transform, away).is_none());
    }

    #[test]
    fn test_transformed_collider() {
        let collider = TriangleCollider::quad(Vec2::ONE);
        let transform = Transform::from_xyz(0.0, 0.0, -5.0).with_scale(Vec3::splat(4.0));
        let ray = Ray3d::new(Vec3::new(1.0, 1.0, 0.0), Dir3::NEG_Z);

        let hit = collider.raycast(&transform, ray).unwrap();
        assert!((hit.distance - 5.0).abs() < 1e-4);
        // 1 world unit on a quad scaled to 4 units wide is a quarter across
        assert!((hit.uv - Vec2::new(0.75, 0.75)).length() < 1e-5);
    }
}
