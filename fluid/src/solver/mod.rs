//! The solver: advances up to [`MAX_REGIONS`] regions packed into one
//! framebuffer.
//!
//! Every tick the solver picks a level of detail, makes sure its framebuffer
//! matches it, repacks the atlas when regions came or went, splats sources
//! into their regions and then runs a fixed-timestep loop of simulation
//! substeps. Readable solvers finish by requesting an asynchronous copy of
//! the velocity field.
//!
//! ## Design Principles
//!
//! - The solver never holds onto its framebuffer: it keeps a
//!   [`FramebufferId`] and fetches the buffers from the storage each tick.
//! - Regions are owned by the solver and referenced by [`RegionId`], which is
//!   never reused.
//! - Per-tile coefficients travel as an explicit [`TileParams`] array, one
//!   per substep.

mod layout;
pub mod params;
mod pressure;
pub mod readback;
mod sampling;
pub mod step;

use bevy::prelude::*;
use bevy_log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::config::SolverConfig;
use crate::constants::{MAX_REGIONS, MAX_TILES};
use crate::lod::{FluidViewer, LodLevel};
use crate::packing::TileRect;
use crate::region::Region;
use crate::splat::{SourceId, SplatSources};
use crate::storage::{FramebufferId, FramebufferStorage, RgbaGrid};

use layout::TileLayout;
pub use params::TileParams;
pub use readback::{Readback, ReadbackError};
pub use step::PressureSettings;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RegionId(pub u32);

/// Passed to `on_step` listeners at the start of every substep.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepEvent {
    /// 1-based index of the substep within the tick.
    pub substep: u32,
    pub dt: f32,
}

pub type StepListener = Box<dyn FnMut(&StepEvent) + Send + Sync>;

/// Resolution and supersampling last asked of the storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FramebufferRequest {
    desired_resolution: u32,
    supersampling: u32,
}

pub struct Solver {
    /// Placement used for level of detail selection.
    pub transform: Transform,
    config: SolverConfig,
    regions: Vec<(RegionId, Region)>,
    next_region_id: u32,
    layout: TileLayout,
    framebuffer: Option<FramebufferId>,
    requested: Option<FramebufferRequest>,
    generation: u64,
    lod: LodLevel,
    readback: Readback,
    listeners: Vec<StepListener>,
}

impl Solver {
    pub fn new(config: SolverConfig) -> Self {
        Self {
            transform: Transform::default(),
            config: config.validated(),
            regions: Vec::new(),
            next_region_id: 0,
            layout: TileLayout::default(),
            framebuffer: None,
            requested: None,
            generation: 0,
            lod: LodLevel::default(),
            readback: Readback::default(),
            listeners: Vec::new(),
        }
    }

    pub fn config(&self) -> &SolverConfig {
        &self.config
    }

    /// Takes effect on the next update.
    pub fn set_config(&mut self, config: SolverConfig) {
        self.config = config.validated();
    }

    pub fn is_full(&self) -> bool {
        self.regions.len() >= MAX_REGIONS
    }

    pub fn region_count(&self) -> usize {
        self.regions.len()
    }

    /// Adds a region, handing it back if the solver is full.
    pub fn try_register(&mut self, region: Region) -> Result<RegionId, Region> {
        if self.is_full() {
            return Err(region);
        }
        let id = RegionId(self.next_region_id);
        self.next_region_id += 1;
        self.regions.push((id, region));
        self.layout.mark_dirty();
        debug!("Registered region {:?} ({} total)", id, self.regions.len());
        Ok(id)
    }

    pub fn unregister(&mut self, id: RegionId) -> Option<Region> {
        let index = self.index_of(id)?;
        let (_, region) = self.regions.remove(index);
        self.layout.mark_dirty();
        debug!("Unregistered region {:?}", id);
        Some(region)
    }

    fn index_of(&self, id: RegionId) -> Option<usize> {
        self.regions.iter().position(|(region_id, _)| *region_id == id)
    }

    pub fn region(&self, id: RegionId) -> Option<&Region> {
        self.index_of(id).map(|index| &self.regions[index].1)
    }

    pub fn region_mut(&mut self, id: RegionId) -> Option<&mut Region> {
        let index = self.index_of(id)?;
        Some(&mut self.regions[index].1)
    }

    pub fn regions(&self) -> impl Iterator<Item = (RegionId, &Region)> {
        self.regions.iter().map(|(id, region)| (*id, region))
    }

    /// Atlas rect of a region, as of the last repack.
    pub fn uv_rect(&self, id: RegionId) -> Option<TileRect> {
        let tile = self.layout.tile_of(self.index_of(id)?)?;
        Some(self.layout.rect(tile))
    }

    pub fn framebuffer(&self) -> Option<FramebufferId> {
        self.framebuffer
    }

    pub fn lod(&self) -> LodLevel {
        self.lod
    }

    /// Latest velocity copy, if the solver is readable and one has arrived.
    pub fn readback_image(&self) -> Option<&RgbaGrid> {
        self.readback.image()
    }

    /// Registers a callback fired at the start of every substep.
    pub fn on_step(&mut self, listener: impl FnMut(&StepEvent) + Send + Sync + 'static) {
        self.listeners.push(Box::new(listener));
    }

    /// Releases the framebuffer, letting the other solvers grow into the
    /// freed memory.
    pub fn dispose(&mut self, storage: &mut FramebufferStorage) {
        if let Some(id) = self.framebuffer.take() {
            storage.dispose(id, true);
        }
        self.requested = None;
        self.readback.invalidate();
    }

    /// Advances the simulation by `dt` seconds.
    pub fn update(
        &mut self,
        storage: &mut FramebufferStorage,
        sources: &mut SplatSources,
        dt: f32,
        viewer: Option<&FluidViewer>,
    ) {
        if dt <= 0.0 {
            return;
        }
        self.readback.poll(storage, self.framebuffer);

        let lod = LodLevel::select(self.config.lod.as_ref(), viewer, self.transform.translation);
        if lod != self.lod {
            debug!("Solver LOD changed from {:?} to {:?}", self.lod, lod);
            self.lod = lod;
        }
        self.sync_framebuffer(storage);

        self.repack_if_dirty();
        self.refresh_regions(dt);

        if !self.lod.is_culled() {
            if let Some(id) = self.framebuffer {
                self.splat(storage, sources, id);
                self.substeps(storage, id, dt);
                if self.config.readable {
                    self.readback.request(storage, id);
                }
            }
        }

        for (_, region) in &mut self.regions {
            region.end_tick();
        }
    }

    fn sync_framebuffer(&mut self, storage: &mut FramebufferStorage) {
        let culled = self.lod.is_culled();
        if culled && self.config.dispose_when_culled {
            if self.framebuffer.is_some() {
                warn!("Solver culled, releasing its framebuffer");
                self.dispose(storage);
            }
            return;
        }

        let request = FramebufferRequest {
            desired_resolution: self.lod.scaled_resolution(self.config.desired_resolution),
            supersampling: self.config.density_supersampling,
        };

        match self.framebuffer {
            Some(id) if storage.get(id).is_some() => {
                if self.requested != Some(request) {
                    storage.update_request(id, request.desired_resolution, request.supersampling);
                }
            }
            _ if culled => {
                self.framebuffer = None;
            }
            _ => {
                self.framebuffer = Some(storage.request(
                    request.desired_resolution,
                    request.supersampling,
                ));
            }
        }
        self.requested = self.framebuffer.map(|_| request);

        let generation = self
            .framebuffer
            .and_then(|id| storage.get(id))
            .map(|framebuffer| framebuffer.generation())
            .unwrap_or(0);
        if generation != self.generation {
            self.generation = generation;
            self.readback.invalidate();
        }
    }

    fn repack_if_dirty(&mut self) {
        if !self.layout.is_dirty() {
            return;
        }
        let sizes: Vec<Vec2> = self
            .regions
            .iter()
            .map(|(_, region)| region.size().truncate())
            .collect();
        self.layout.repack(&sizes);
    }

    fn refresh_regions(&mut self, dt: f32) {
        let framebuffer = self.framebuffer;
        let generation = self.generation;
        for (tile, index) in self.layout.tiles() {
            let rect = self.layout.rect(tile);
            let Some((_, region)) = self.regions.get_mut(index) else {
                continue;
            };
            region.update_facing();
            region.update_kinematics(dt);
            region.set_render_state(tile, rect, framebuffer, generation);
        }
    }

    fn splat(&mut self, storage: &mut FramebufferStorage, sources: &mut SplatSources, id: FramebufferId) {
        let Some(framebuffer) = storage.get_mut(id) else {
            return;
        };
        for (tile, index) in self.layout.tiles() {
            let rect = self.layout.rect(tile);
            let Some((region_id, region)) = self.regions.get(index) else {
                continue;
            };

            let mut targets: Vec<SourceId> = region.targets.clone();
            for provider in &region.providers {
                targets.extend(provider.targets(&region.transform, sources));
            }

            for source_id in targets {
                match sources.get_mut(source_id) {
                    Some(source) => source.splat(source_id, *region_id, region, framebuffer, tile, rect),
                    None => debug!("Region {:?} targets missing source {:?}", region_id, source_id),
                }
            }
        }
    }

    fn tile_params(&self, dt: f32) -> [TileParams; MAX_TILES] {
        let mut params = [TileParams::default(); MAX_TILES];
        for (tile, index) in self.layout.tiles() {
            if let Some((_, region)) = self.regions.get(index) {
                params[tile] = TileParams::from_region(region, self.layout.rect(tile), dt);
            }
        }
        params
    }

    fn substeps(&mut self, storage: &mut FramebufferStorage, id: FramebufferId, dt: f32) {
        let Some(framebuffer) = storage.get_mut(id) else {
            return;
        };
        let pressure = PressureSettings {
            solver: self.config.pressure_solver,
            iterations: self.config.pressure_iterations,
        };

        let mut remaining = dt;
        let mut steps = 0;
        while remaining > 0.0 && steps < self.config.max_substeps {
            steps += 1;
            let substep = remaining.min(self.config.max_timestep);
            remaining -= substep;

            let params = self.tile_params(substep);
            let event = StepEvent {
                substep: steps,
                dt: substep,
            };
            for listener in &mut self.listeners {
                listener(&event);
            }
            step::simulation_step(framebuffer, &params, substep, pressure);
        }
    }

    /// Fills a region's density with its clear color.
    pub fn clear_region(&mut self, storage: &mut FramebufferStorage, id: RegionId) -> bool {
        let Some(index) = self.index_of(id) else {
            return false;
        };
        self.repack_if_dirty();
        let Some(tile) = self.layout.tile_of(index) else {
            return false;
        };
        let Some(framebuffer) = self.framebuffer.and_then(|fb| storage.get_mut(fb)) else {
            return false;
        };

        let color = self.regions[index].1.params.clear_color;
        let rect = self
            .layout
            .rect(tile)
            .to_pixels(framebuffer.state_resolution());
        let max = rect.max();
        for y in rect.min.y..max.y {
            for x in rect.min.x..max.x {
                framebuffer.state_a.set(x, y, color);
            }
        }
        true
    }

    /// World-space fluid velocity at `point`, from the latest readback.
    pub fn velocity_at(&self, id: RegionId, point: Vec3) -> Option<Vec3> {
        if !self.config.readable {
            return None;
        }
        let image = self.readback.image()?;
        let region = self.region(id)?;
        let rect = self.uv_rect(id)?;

        let uv = region.world_point_to_uv(point, &rect);
        let resolution = image.width() as f32;
        let texel = image.sample_bilinear(uv.x * resolution, uv.y * resolution);
        Some(region.uv_vector_to_world(Vec3::new(texel.x, texel.y, 0.0), &rect))
    }
}
