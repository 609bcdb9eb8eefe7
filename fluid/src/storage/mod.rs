//! Memory-budgeted pool of simulation framebuffers.
//!
//! Every solver asks the storage for one framebuffer. The storage decides the
//! actual resolution so that the combined size of all live framebuffers stays
//! within [`StorageConfig::memory_budget_mb`].
//!
//! ## Design Principles
//!
//! - Framebuffers are referenced by [`FramebufferId`], never by pointer.
//!   Solvers look their framebuffer up again every tick.
//! - Resolutions are powers of two, never below [`MIN_FRAMEBUFFER_SIZE`].
//! - Every reallocation bumps the framebuffer's generation, so anything
//!   computed from the old buffers can be recognized as stale.

mod grid;

pub use grid::{Grid, RgbaGrid, TileIdGrid};

use bevy_log::{debug, info};

use crate::config::StorageConfig;
use crate::constants::{BYTES_PER_MEGABYTE, MIN_FRAMEBUFFER_SIZE};
use crate::utils::{format_bytes, prev_power_of_two};

pub type FramebufferId = usize;

/// The buffers one solver simulates into.
///
/// Velocity texels are `(vx, vy, aux, pressure)`, state texels are RGBA
/// density with alpha doubling as temperature.
#[derive(Debug, Clone)]
pub struct Framebuffer {
    pub velocity_a: RgbaGrid,
    pub velocity_b: RgbaGrid,
    pub state_a: RgbaGrid,
    pub state_b: RgbaGrid,
    pub tile_id: TileIdGrid,
    pub desired_resolution: u32,
    pub state_supersampling: u32,
    generation: u64,
}

impl Framebuffer {
    fn new(desired_resolution: u32, state_supersampling: u32) -> Self {
        Self {
            velocity_a: RgbaGrid::default(),
            velocity_b: RgbaGrid::default(),
            state_a: RgbaGrid::default(),
            state_b: RgbaGrid::default(),
            tile_id: TileIdGrid::default(),
            desired_resolution,
            state_supersampling: state_supersampling.max(1),
            generation: 0,
        }
    }

    /// Edge length of the velocity buffers. Zero until first allocated.
    pub fn resolution(&self) -> u32 {
        self.velocity_a.width()
    }

    pub fn state_resolution(&self) -> u32 {
        self.state_a.width()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_allocated(&self) -> bool {
        !self.velocity_a.is_empty()
    }

    /// Replaces all buffers with ones of the given resolution, carrying over
    /// the front buffers' contents.
    fn reallocate(&mut self, resolution: u32, generation: u64) -> bool {
        let state_resolution = resolution * self.state_supersampling;
        if self.is_allocated()
            && self.velocity_a.width() == resolution
            && self.state_a.width() == state_resolution
        {
            return false;
        }

        let mut velocity_a = RgbaGrid::new(resolution, resolution);
        let mut state_a = RgbaGrid::new(state_resolution, state_resolution);
        let mut tile_id = TileIdGrid::new(resolution, resolution);

        // Fresh grids start zeroed, so only existing contents need copying
        if self.is_allocated() {
            velocity_a.stretch_from(&self.velocity_a);
            state_a.stretch_from(&self.state_a);
            tile_id.stretch_from(&self.tile_id);
        }

        self.velocity_a = velocity_a;
        self.velocity_b = RgbaGrid::new(resolution, resolution);
        self.state_a = state_a;
        self.state_b = RgbaGrid::new(state_resolution, state_resolution);
        self.tile_id = tile_id;
        self.generation = generation;
        true
    }
}

/// Pool of framebuffers sharing one memory budget.
#[derive(Debug, Default)]
pub struct FramebufferStorage {
    config: StorageConfig,
    /// Disposed slots are left empty and reused by the next request.
    framebuffers: Vec<Option<Framebuffer>>,
    next_generation: u64,
}

impl FramebufferStorage {
    pub fn new(config: StorageConfig) -> Self {
        Self {
            config,
            framebuffers: Vec::new(),
            next_generation: 1,
        }
    }

    pub fn config(&self) -> &StorageConfig {
        &self.config
    }

    /// Changes the budget or precisions and resizes every framebuffer to match.
    pub fn set_config(&mut self, config: StorageConfig) {
        self.config = config;
        self.resize_all();
    }

    /// Requests a framebuffer of a given resolution. A smaller one may be
    /// allocated depending on the memory budget.
    pub fn request(&mut self, desired_resolution: u32, state_supersampling: u32) -> FramebufferId {
        let framebuffer = Framebuffer::new(desired_resolution, state_supersampling);

        let id = match self.framebuffers.iter().position(Option::is_none) {
            Some(id) => {
                self.framebuffers[id] = Some(framebuffer);
                id
            }
            None => {
                self.framebuffers.push(Some(framebuffer));
                self.framebuffers.len() - 1
            }
        };

        debug!(
            "Requested framebuffer {} at resolution {} (x{} state supersampling)",
            id, desired_resolution, state_supersampling
        );
        self.resize_all();
        id
    }

    /// Releases a framebuffer. With `expand`, the remaining framebuffers are
    /// reallocated to use the freed memory.
    pub fn dispose(&mut self, id: FramebufferId, expand: bool) {
        let Some(slot) = self.framebuffers.get_mut(id) else {
            return;
        };
        if slot.take().is_some() {
            debug!("Disposed framebuffer {}", id);
            if expand {
                self.resize_all();
            }
        }
    }

    pub fn get(&self, id: FramebufferId) -> Option<&Framebuffer> {
        self.framebuffers.get(id).and_then(Option::as_ref)
    }

    pub fn get_mut(&mut self, id: FramebufferId) -> Option<&mut Framebuffer> {
        self.framebuffers.get_mut(id).and_then(Option::as_mut)
    }

    /// Updates what a framebuffer asks for, resizing the pool when anything
    /// changed. Returns false if the framebuffer does not exist.
    pub fn update_request(
        &mut self,
        id: FramebufferId,
        desired_resolution: u32,
        state_supersampling: u32,
    ) -> bool {
        let Some(framebuffer) = self.get_mut(id) else {
            return false;
        };
        let state_supersampling = state_supersampling.max(1);
        if framebuffer.desired_resolution != desired_resolution
            || framebuffer.state_supersampling != state_supersampling
        {
            framebuffer.desired_resolution = desired_resolution;
            framebuffer.state_supersampling = state_supersampling;
            self.resize_all();
        }
        true
    }

    pub fn live_count(&self) -> usize {
        self.framebuffers.iter().flatten().count()
    }

    /// Maximum amount of velocity pixels all framebuffers may use together.
    pub fn pixel_budget(&self) -> f32 {
        let device = &self.config.device;
        let density_bpp = device.bytes_per_pixel(self.config.density_precision);
        let velocity_bpp = device.bytes_per_pixel(self.config.velocity_precision);
        let budget_bytes = self.config.memory_budget_mb as u64 * BYTES_PER_MEGABYTE;
        budget_bytes as f32 / (2 * (density_bpp + velocity_bpp)) as f32
    }

    /// Memory accounted against the budget. Supersampling is not included.
    pub fn budgeted_bytes(&self) -> u64 {
        let device = &self.config.device;
        let pair_bytes = 2
            * (device.bytes_per_pixel(self.config.density_precision)
                + device.bytes_per_pixel(self.config.velocity_precision));
        self.framebuffers
            .iter()
            .flatten()
            .map(|fb| fb.resolution() as u64 * fb.resolution() as u64 * pair_bytes)
            .sum()
    }

    /// Resizes all live framebuffers to share the memory budget in proportion
    /// to their desired resolution.
    pub fn resize_all(&mut self) {
        let pixel_budget = self.pixel_budget();
        let total_desired: f32 = self
            .framebuffers
            .iter()
            .flatten()
            .map(|fb| fb.desired_resolution as f32)
            .sum();

        for id in 0..self.framebuffers.len() {
            let generation = self.next_generation;
            let Some(framebuffer) = self.framebuffers[id].as_mut() else {
                continue;
            };

            let weight = if total_desired > 0.0 {
                framebuffer.desired_resolution as f32 / total_desired
            } else {
                0.0
            };
            let max_resolution = (pixel_budget * weight).sqrt().floor() as u32;
            let resolution = framebuffer.desired_resolution.min(max_resolution);
            let quantized = prev_power_of_two(resolution).max(MIN_FRAMEBUFFER_SIZE);

            if framebuffer.reallocate(quantized, generation) {
                self.next_generation += 1;
                info!(
                    "Allocated framebuffer {} at {}x{} (state {}x{})",
                    id,
                    quantized,
                    quantized,
                    framebuffer.state_resolution(),
                    framebuffer.state_resolution()
                );
            }
        }

        debug!(
            "Framebuffer storage: {} live, {} of {} budgeted",
            self.live_count(),
            format_bytes(self.budgeted_bytes()),
            format_bytes(self.config.memory_budget_mb as u64 * BYTES_PER_MEGABYTE)
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TexturePrecision;
    use bevy::math::Vec4;

    fn storage_with_budget(memory_budget_mb: u32) -> FramebufferStorage {
        FramebufferStorage::new(StorageConfig {
            memory_budget_mb,
            density_precision: TexturePrecision::Half,
            velocity_precision: TexturePrecision::Half,
            ..Default::default()
        })
    }

    #[test]
    fn test_budget_split_between_framebuffers() {
        // 1 MiB / (2 * (8 + 8)) = 32768 pixels
        let mut storage = storage_with_budget(1);
        assert_eq!(storage.pixel_budget(), 32768.0);

        let a = storage.request(256, 1);
        assert_eq!(storage.get(a).unwrap().resolution(), 128);

        let b = storage.request(256, 1);
        // Each gets half: sqrt(16384) = 128
        assert_eq!(storage.get(a).unwrap().resolution(), 128);
        assert_eq!(storage.get(b).unwrap().resolution(), 128);
        assert!(storage.budgeted_bytes() <= 1_048_576);
    }

    #[test]
    fn test_resolution_never_exceeds_desired() {
        let mut storage = storage_with_budget(64);
        let id = storage.request(100, 2);
        let fb = storage.get(id).unwrap();
        assert_eq!(fb.resolution(), 64);
        assert_eq!(fb.state_resolution(), 128);
        assert_eq!(fb.velocity_b.width(), fb.velocity_a.width());
        assert_eq!(fb.state_b.width(), fb.state_a.width());
    }

    #[test]
    fn test_minimum_framebuffer_size() {
        let mut storage = storage_with_budget(0);
        let id = storage.request(512, 1);
        assert_eq!(storage.get(id).unwrap().resolution(), MIN_FRAMEBUFFER_SIZE);
    }

    #[test]
    fn test_reuses_first_empty_slot() {
        let mut storage = storage_with_budget(32);
        let a = storage.request(64, 1);
        let b = storage.request(64, 1);
        let c = storage.request(64, 1);
        assert_eq!((a, b, c), (0, 1, 2));

        storage.dispose(b, true);
        assert!(storage.get(b).is_none());
        assert_eq!(storage.live_count(), 2);

        assert_eq!(storage.request(64, 1), 1);
        assert_eq!(storage.request(64, 1), 3);
    }

    #[test]
    fn test_dispose_expands_remaining() {
        // 2 MiB -> 65536 pixels
        let mut storage = storage_with_budget(2);
        let a = storage.request(256, 1);
        let b = storage.request(256, 1);
        // Shared: sqrt(32768) = 181 -> 128
        assert_eq!(storage.get(a).unwrap().resolution(), 128);

        // Without expansion the survivor keeps its size
        storage.dispose(b, false);
        assert_eq!(storage.get(a).unwrap().resolution(), 128);

        // Alone: sqrt(65536) = 256
        storage.resize_all();
        assert_eq!(storage.get(a).unwrap().resolution(), 256);

        let c = storage.request(256, 1);
        storage.dispose(c, true);
        assert_eq!(storage.get(a).unwrap().resolution(), 256);
    }

    #[test]
    fn test_unchanged_resolution_keeps_generation() {
        let mut storage = storage_with_budget(32);
        let id = storage.request(64, 1);
        let generation = storage.get(id).unwrap().generation();

        storage.resize_all();
        assert_eq!(storage.get(id).unwrap().generation(), generation);

        storage.update_request(id, 32, 1);
        assert!(storage.get(id).unwrap().generation() > generation);
    }

    #[test]
    fn test_supersampling_swap_keeps_state_scale() {
        let mut storage = storage_with_budget(32);
        let id = storage.request(64, 2);
        let generation = storage.get(id).unwrap().generation();
        assert_eq!(storage.get(id).unwrap().state_resolution(), 128);

        // Same state size, different velocity size
        storage.update_request(id, 128, 1);
        let fb = storage.get(id).unwrap();
        assert_eq!(fb.resolution(), 128);
        assert_eq!(fb.state_resolution(), 128);
        assert_eq!(fb.velocity_b.width(), 128);
        assert_eq!(fb.tile_id.width(), 128);
        assert!(fb.generation() > generation);
    }

    #[test]
    fn test_resize_preserves_contents() {
        let mut storage = storage_with_budget(32);
        let id = storage.request(64, 1);
        storage
            .get_mut(id)
            .unwrap()
            .velocity_a
            .fill(Vec4::new(1.0, 2.0, 0.0, 0.0));

        storage.update_request(id, 32, 1);
        let fb = storage.get(id).unwrap();
        assert_eq!(fb.resolution(), 32);
        assert!(fb
            .velocity_a
            .data()
            .iter()
            .all(|v| *v == Vec4::new(1.0, 2.0, 0.0, 0.0)));
        assert_eq!(fb.velocity_b.sum(), Vec4::ZERO);
    }

    #[test]
    fn test_dispose_unknown_id_is_ignored() {
        let mut storage = storage_with_budget(32);
        storage.dispose(7, true);
        assert_eq!(storage.live_count(), 0);
        assert!(!storage.update_request(7, 64, 1));
    }
}
