//! Tiled 2.5D grid fluid simulation.
//!
//! Fluid lives in [`region::Region`]s: flat surfaces placed anywhere in the
//! world, each simulated as an independent 2D field. A [`solver::Solver`]
//! packs up to sixteen regions into the tiles of one shared framebuffer and
//! advances them together, while [`splat::SplatSource`]s inject density and
//! velocity. A [`world::FluidWorld`] owns the memory-budgeted
//! [`storage::FramebufferStorage`] every solver allocates from.

pub mod config;
pub mod constants;
pub mod lod;
pub mod packing;
pub mod plugin;
pub mod region;
pub mod solver;
pub mod splat;
pub mod storage;
pub mod utils;
pub mod world;

pub use config::{FluidConfig, SolverConfig, StorageConfig};
pub use lod::{FluidViewer, LodLevel};
pub use plugin::FluidPlugin;
pub use region::{Region, RegionParams};
pub use solver::{RegionId, Solver};
pub use splat::{SourceId, SplatSettings, SplatSource, SplatSources};
pub use world::{FluidWorld, SolverId, SolverStats};
