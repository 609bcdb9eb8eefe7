//! Splat sources: emitters that inject density and velocity into regions.
//!
//! A source follows a host-driven transform. Every tick it works out how
//! many splats are due (per step, per second and per distance travelled) and
//! stamps them into each region it targets, interpolating between where it
//! was last tick and where it is now.
//!
//! ## Design Principles
//!
//! - Splat counts are computed once per tick in [`SplatSources::begin_tick`],
//!   so a source feeding several regions splats the same amount into each.
//! - Velocity injected is relative to the region, so a source riding along
//!   with a region does not stir it.
//! - Randomization uses a per-source seeded RNG to keep runs reproducible.

pub mod brush;
pub mod provider;
pub mod rate;

use std::f32::consts::{PI, TAU};

use bevy::prelude::*;
use noise::Perlin;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::constants::EPSILON;
use crate::packing::TileRect;
use crate::region::Region;
use crate::solver::RegionId;
use crate::storage::Framebuffer;

use brush::{
    stamp_density, stamp_velocity, BlendState, BrushShape, DensitySplat, NoiseParams, Stamp,
    VelocitySplat,
};
use rate::RateAccumulator;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SourceId(pub u32);

/// Emission, placement and weighting controls of a splat source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SplatSettings {
    /// Splats per simulation tick.
    pub rate_over_steps: u32,
    /// Splats per second.
    pub rate_over_time: f32,
    /// Splats per world unit travelled.
    pub rate_over_distance: f32,

    /// Splat at `position` (region space, centered on zero) instead of
    /// projecting the source onto the region.
    pub override_position: bool,
    pub position: Vec2,
    /// Radius of random jitter around the splat position. 0-1
    pub position_randomness: f32,

    /// Use `rotation` instead of following the source's roll.
    pub override_rotation: bool,
    /// Degrees.
    pub rotation: f32,
    /// 0-1, scaled to half a turn either way.
    pub rotation_randomness: f32,

    pub scale_with_distance: bool,
    /// Multiply the splat size by the source's largest scale component.
    pub scale_with_transform: bool,
    pub scale: Vec2,
    /// 0-1
    pub scale_randomness: f32,
    /// Width over height of the brush.
    pub aspect_ratio: f32,
    pub brush: BrushShape,

    /// 0-1
    pub velocity_weight: f32,
    pub max_relative_velocity: f32,
    /// Applied per component to the relative velocity.
    pub velocity_scale: Vec3,
    pub max_relative_angular_velocity: f32,
    pub angular_velocity_scale: f32,
    /// Constant velocity added regardless of motion.
    pub force: Vec3,
    /// Constant angular velocity added regardless of motion.
    pub torque: f32,
    pub velocity_noise: NoiseParams,

    /// 0-1
    pub density_weight: f32,
    pub color: Vec4,
    pub blend: BlendState,
    pub density_noise: NoiseParams,

    pub seed: u64,
}

impl Default for SplatSettings {
    fn default() -> Self {
        Self {
            rate_over_steps: 1,
            rate_over_time: 0.0,
            rate_over_distance: 0.0,
            override_position: false,
            position: Vec2::ZERO,
            position_randomness: 0.0,
            override_rotation: true,
            rotation: 0.0,
            rotation_randomness: 0.0,
            scale_with_distance: true,
            scale_with_transform: false,
            scale: Vec2::splat(0.1),
            scale_randomness: 0.0,
            aspect_ratio: 1.0,
            brush: BrushShape::Disc,
            velocity_weight: 1.0,
            max_relative_velocity: 8.0,
            velocity_scale: Vec3::ONE,
            max_relative_angular_velocity: 12.0,
            angular_velocity_scale: 1.0,
            force: Vec3::ZERO,
            torque: 0.0,
            velocity_noise: NoiseParams::default(),
            density_weight: 1.0,
            color: Vec4::ONE,
            blend: BlendState::default(),
            density_noise: NoiseParams::default(),
            seed: 0,
        }
    }
}

/// Passed to `on_splat` listeners once a source is done with a region.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SplatEvent {
    pub source: SourceId,
    pub region: RegionId,
    pub tile: usize,
    pub rect: TileRect,
    /// Number of splats stamped, possibly zero.
    pub splats: u32,
}

pub type SplatListener = Box<dyn FnMut(&SplatEvent) + Send + Sync>;

pub struct SplatSource {
    pub transform: Transform,
    pub settings: SplatSettings,
    pub enabled: bool,
    old_position: Vec3,
    old_rotation: Quat,
    tick_dt: f32,
    elapsed: f32,
    time_rate: RateAccumulator,
    distance_rate: RateAccumulator,
    pending_splats: u32,
    rng: StdRng,
    perlin: Perlin,
    listeners: Vec<SplatListener>,
}

impl SplatSource {
    pub fn new(transform: Transform, settings: SplatSettings) -> Self {
        Self {
            old_position: transform.translation,
            old_rotation: transform.rotation,
            transform,
            enabled: true,
            tick_dt: 0.0,
            elapsed: 0.0,
            time_rate: RateAccumulator::default(),
            distance_rate: RateAccumulator::default(),
            pending_splats: 0,
            rng: StdRng::seed_from_u64(settings.seed),
            perlin: Perlin::new(settings.seed as u32),
            settings,
            listeners: Vec::new(),
        }
    }

    /// Registers a callback fired every time this source finishes splatting
    /// into a region.
    pub fn on_splat(&mut self, listener: impl FnMut(&SplatEvent) + Send + Sync + 'static) {
        self.listeners.push(Box::new(listener));
    }

    pub fn velocity(&self) -> Vec3 {
        if self.tick_dt <= 0.0 {
            return Vec3::ZERO;
        }
        (self.transform.translation - self.old_position) / self.tick_dt
    }

    pub fn angular_velocity(&self) -> Vec3 {
        if self.tick_dt <= 0.0 {
            return Vec3::ZERO;
        }
        crate::region::transform::angular_velocity(self.old_rotation, self.transform.rotation, self.tick_dt)
    }

    /// Splats due this tick in every region this source targets.
    pub fn pending_splats(&self) -> u32 {
        self.pending_splats
    }

    fn begin_tick(&mut self, dt: f32) {
        self.tick_dt = dt;
        self.elapsed += dt;
        let settings = &self.settings;
        let time_splats = self.time_rate.accumulate(settings.rate_over_time, dt);
        let travelled = self.transform.translation.distance(self.old_position);
        let distance_splats = self
            .distance_rate
            .accumulate(settings.rate_over_distance, travelled);
        self.pending_splats = settings.rate_over_steps + time_splats + distance_splats;
    }

    fn end_tick(&mut self) {
        self.old_position = self.transform.translation;
        self.old_rotation = self.transform.rotation;
    }

    fn jitter(&mut self, amount: f32) -> f32 {
        if amount > 0.0 {
            self.rng.gen_range(-amount..=amount)
        } else {
            0.0
        }
    }

    fn random_in_unit_disc(&mut self) -> Vec2 {
        let angle = self.rng.gen_range(0.0..TAU);
        let radius = self.rng.gen::<f32>().sqrt();
        Vec2::from_angle(angle) * radius
    }

    /// Stamps this tick's splats into one region's tile.
    pub(crate) fn splat(
        &mut self,
        id: SourceId,
        region_id: RegionId,
        region: &Region,
        framebuffer: &mut Framebuffer,
        tile: usize,
        rect: TileRect,
    ) {
        if !self.enabled {
            return;
        }
        let settings = self.settings.clone();
        let params = &region.params;
        let region_rotation_inv = region.transform.rotation.inverse();
        let max_scale = self.transform.scale.max_element();

        // Motion relative to the region, in UV space
        let mut relative_velocity = region.world_vector_to_uv(
            self.velocity() - region.velocity() * params.velocity_scale,
            &rect,
        );
        let relative_angular = region.world_vector_to_uv(self.angular_velocity(), &rect).z
            - region.world_vector_to_uv(region.angular_velocity(), &rect).z * params.velocity_scale;

        let speed = relative_velocity.length();
        if speed > EPSILON {
            relative_velocity *= speed.min(settings.max_relative_velocity) / speed;
        }
        let linear = relative_velocity * settings.velocity_scale + settings.force;
        let angular = relative_angular.clamp(
            -settings.max_relative_angular_velocity,
            settings.max_relative_angular_velocity,
        ) * settings.angular_velocity_scale
            + settings.torque;

        let velocity_rect = rect.to_pixels(framebuffer.resolution());
        let state_rect = rect.to_pixels(framebuffer.state_resolution());
        let color = Vec4::new(
            settings.color.x,
            settings.color.y,
            settings.color.z,
            settings.color.w * settings.density_weight,
        );

        let total = self.pending_splats;
        let mut stamped = 0;
        for i in 1..=total {
            let t = i as f32 / total as f32;

            let random_offset = self.random_in_unit_disc() * settings.position_randomness;
            let random_scale = self.jitter(settings.scale_randomness) * 0.5;
            let random_rotation = self.jitter(settings.rotation_randomness) * PI;

            let orientation = if settings.override_rotation {
                settings.rotation.to_radians()
            } else {
                let rotation = region_rotation_inv * self.old_rotation.slerp(self.transform.rotation, t);
                -rotation.to_euler(EulerRot::YXZ).2
            };

            let mut projection_size = settings.scale + Vec2::splat(random_scale);
            if settings.scale_with_transform {
                projection_size *= max_scale;
            }

            let projection = if settings.override_position {
                Some(Vec4::new(
                    settings.position.x,
                    settings.position.y,
                    projection_size.x * settings.aspect_ratio,
                    projection_size.y,
                ))
            } else {
                let position = self.old_position.lerp(self.transform.translation, t);
                region.project_target(
                    position,
                    projection_size,
                    settings.aspect_ratio,
                    settings.scale_with_distance,
                )
            };
            let Some(projection) = projection else {
                continue;
            };

            let center = projection.xy() + random_offset;
            let stamp = Stamp {
                center: rect.position + (center + Vec2::splat(0.5)) * rect.size,
                half_extents: projection.zw() * 0.5 * rect.size,
                rotation: orientation + random_rotation,
                shape: settings.brush,
            };

            stamp_density(
                &mut framebuffer.state_a,
                state_rect,
                &stamp,
                &DensitySplat {
                    color,
                    blend: settings.blend,
                    noise: settings.density_noise,
                    perlin: &self.perlin,
                    time: self.elapsed,
                },
            );
            stamp_velocity(
                &mut framebuffer.velocity_a,
                velocity_rect,
                &stamp,
                &VelocitySplat {
                    linear: linear.truncate(),
                    angular,
                    weight: settings.velocity_weight,
                    noise: settings.velocity_noise,
                    perlin: &self.perlin,
                    time: self.elapsed,
                },
            );
            stamped += 1;
        }

        let event = SplatEvent {
            source: id,
            region: region_id,
            tile,
            rect,
            splats: stamped,
        };
        for listener in &mut self.listeners {
            listener(&event);
        }
    }
}

/// Arena owning every splat source. Ids are never reused.
#[derive(Default)]
pub struct SplatSources {
    slots: Vec<Option<SplatSource>>,
}

impl SplatSources {
    pub fn insert(&mut self, source: SplatSource) -> SourceId {
        self.slots.push(Some(source));
        SourceId((self.slots.len() - 1) as u32)
    }

    pub fn remove(&mut self, id: SourceId) -> Option<SplatSource> {
        self.slots.get_mut(id.0 as usize).and_then(Option::take)
    }

    pub fn get(&self, id: SourceId) -> Option<&SplatSource> {
        self.slots.get(id.0 as usize).and_then(Option::as_ref)
    }

    pub fn get_mut(&mut self, id: SourceId) -> Option<&mut SplatSource> {
        self.slots.get_mut(id.0 as usize).and_then(Option::as_mut)
    }

    pub fn iter(&self) -> impl Iterator<Item = (SourceId, &SplatSource)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| slot.as_ref().map(|source| (SourceId(i as u32), source)))
    }

    pub fn len(&self) -> usize {
        self.slots.iter().flatten().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Works out every source's splat count for a tick of length `dt`.
    pub fn begin_tick(&mut self, dt: f32) {
        for source in self.slots.iter_mut().flatten() {
            source.begin_tick(dt);
        }
    }

    /// Remembers where every source is, for next tick's motion.
    pub fn end_tick(&mut self) {
        for source in self.slots.iter_mut().flatten() {
            source.end_tick();
        }
    }
}
