//! Fluid simulation configuration.
//!
//! Author-time settings for the buffer storage and for each solver, plus the
//! runtime [`FluidConfig`] resource read by the plugin every frame.

use bevy::prelude::*;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Compile-time defaults for the simulation settings.
pub mod constants {
    /// Memory budget shared by every framebuffer of one storage, in megabytes.
    pub const DEFAULT_MEMORY_BUDGET_MB: u32 = 32;

    /// Edge length requested for a solver's velocity buffers before budgeting.
    pub const DEFAULT_DESIRED_RESOLUTION: u32 = 128;

    /// Smallest resolution a solver may ask for.
    pub const MIN_DESIRED_RESOLUTION: u32 = 16;

    /// State buffers are this many times larger than velocity buffers.
    /// Range: 1-8
    pub const DEFAULT_DENSITY_SUPERSAMPLING: u32 = 2;
    pub const MAX_DENSITY_SUPERSAMPLING: u32 = 8;

    /// Largest amount of time advanced by a single substep (in seconds).
    pub const DEFAULT_MAX_TIMESTEP: f32 = 0.008;
    pub const MIN_TIMESTEP: f32 = 0.0001;

    /// Substeps taken at most per tick. Time beyond this is dropped.
    pub const DEFAULT_MAX_SUBSTEPS: u32 = 4;

    /// Jacobi iterations when the iterative pressure solver is selected.
    /// Range: 0-32
    pub const DEFAULT_PRESSURE_ITERATIONS: u32 = 3;
    pub const MAX_PRESSURE_ITERATIONS: u32 = 32;
}

use constants::*;

/// Storage precision of a simulation buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default, Reflect)]
pub enum TexturePrecision {
    /// 32-bit float RGBA.
    Float,
    /// 16-bit float RGBA.
    #[default]
    Half,
    /// 8-bit normalized RGBA.
    Fixed,
}

/// Which buffer formats the runtime can allocate.
///
/// Unsupported precisions fall back to 4 bytes per pixel when budgeting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceCaps {
    pub float_buffers: bool,
    pub half_buffers: bool,
}

impl Default for DeviceCaps {
    fn default() -> Self {
        Self {
            float_buffers: true,
            half_buffers: true,
        }
    }
}

impl DeviceCaps {
    /// Bytes used by one RGBA pixel of the given precision on this device.
    pub fn bytes_per_pixel(&self, precision: TexturePrecision) -> u64 {
        match precision {
            TexturePrecision::Float if self.float_buffers => 16,
            TexturePrecision::Half if self.half_buffers => 8,
            _ => 4,
        }
    }
}

/// Settings shared by every solver that allocates from one storage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Combined budget of all framebuffers, in megabytes. Supersampling is
    /// not taken into account.
    pub memory_budget_mb: u32,
    pub density_precision: TexturePrecision,
    pub velocity_precision: TexturePrecision,
    pub device: DeviceCaps,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            memory_budget_mb: DEFAULT_MEMORY_BUDGET_MB,
            density_precision: TexturePrecision::Half,
            velocity_precision: TexturePrecision::Half,
            device: DeviceCaps::default(),
        }
    }
}

/// Pressure projection algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default, Reflect)]
pub enum PressureSolver {
    /// One prefilter pass followed by a horizontal and a vertical 1D pass.
    #[default]
    Separable,
    /// Ping-pong Jacobi relaxation.
    Iterative,
}

/// Screen-height thresholds used to pick a level of detail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LodConfig {
    /// Relative screen height at which each LOD stops being used, from the
    /// most detailed level down. Below the last one the solver is culled.
    pub transition_heights: Vec<f32>,
    /// Distances are divided by this before computing screen height.
    pub lod_bias: f32,
}

impl Default for LodConfig {
    fn default() -> Self {
        Self {
            transition_heights: vec![0.6, 0.3, 0.1],
            lod_bias: 1.0,
        }
    }
}

/// Per-solver simulation settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverConfig {
    pub desired_resolution: u32,
    pub density_supersampling: u32,
    /// Release the framebuffer while culled by LOD.
    pub dispose_when_culled: bool,
    /// Copy velocity back for CPU-side sampling after every tick.
    pub readable: bool,
    pub max_timestep: f32,
    pub max_substeps: u32,
    pub pressure_solver: PressureSolver,
    pub pressure_iterations: u32,
    /// No LOD settings means the solver is always visible at full detail.
    pub lod: Option<LodConfig>,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            desired_resolution: DEFAULT_DESIRED_RESOLUTION,
            density_supersampling: DEFAULT_DENSITY_SUPERSAMPLING,
            dispose_when_culled: false,
            readable: false,
            max_timestep: DEFAULT_MAX_TIMESTEP,
            max_substeps: DEFAULT_MAX_SUBSTEPS,
            pressure_solver: PressureSolver::Separable,
            pressure_iterations: DEFAULT_PRESSURE_ITERATIONS,
            lod: None,
        }
    }
}

impl SolverConfig {
    /// Returns a copy with every setting clamped to its valid range.
    pub fn validated(&self) -> Self {
        Self {
            desired_resolution: self.desired_resolution.max(MIN_DESIRED_RESOLUTION),
            density_supersampling: self
                .density_supersampling
                .clamp(1, MAX_DENSITY_SUPERSAMPLING),
            max_timestep: self.max_timestep.max(MIN_TIMESTEP),
            max_substeps: self.max_substeps.max(1),
            pressure_iterations: self.pressure_iterations.min(MAX_PRESSURE_ITERATIONS),
            ..self.clone()
        }
    }
}

/// Runtime fluid configuration resource.
#[derive(Resource, Clone, Debug, Reflect)]
#[reflect(Resource)]
pub struct FluidConfig {
    /// Whether the plugin steps the simulation.
    pub enabled: bool,

    /// Multiplier applied to the frame delta before stepping.
    pub time_scale: f32,
}

impl Default for FluidConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            time_scale: 1.0,
        }
    }
}

/// Reads a RON file into any deserializable settings type.
pub fn load_ron<T: DeserializeOwned>(path: &Path) -> Result<T, Box<dyn std::error::Error>> {
    let contents: String = fs::read_to_string(path)?;
    let value: T = ron::de::from_str(&contents)?;
    Ok(value)
}
