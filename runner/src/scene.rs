//! Scene files for the headless runner.
//!
//! A scene lists the splat sources (each with a scripted path), the solvers
//! and the regions they hold. Regions refer to sources by name.

use std::collections::HashMap;
use std::f32::consts::TAU;

use bevy::prelude::*;
use bevy_log::warn;
use fluxgrid::region::{Region, RegionParams};
use fluxgrid::splat::provider::TargetDetector;
use fluxgrid::{
    FluidViewer, FluidWorld, Solver, SolverConfig, SolverId, SourceId, SplatSettings, SplatSource,
    StorageConfig,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SceneDescription {
    pub storage: StorageConfig,
    pub viewer: Option<FluidViewer>,
    pub sources: Vec<SourceDescription>,
    pub solvers: Vec<SolverDescription>,
}

/// Position and orientation written in a scene file. Rotation is XYZ euler
/// angles in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Placement {
    pub translation: Vec3,
    pub rotation: Vec3,
    pub scale: Vec3,
}

impl Default for Placement {
    fn default() -> Self {
        Self {
            translation: Vec3::ZERO,
            rotation: Vec3::ZERO,
            scale: Vec3::ONE,
        }
    }
}

impl Placement {
    pub fn to_transform(&self) -> Transform {
        let radians = self.rotation * (TAU / 360.0);
        Transform {
            translation: self.translation,
            rotation: Quat::from_euler(EulerRot::XYZ, radians.x, radians.y, radians.z),
            scale: self.scale,
        }
    }
}

/// Scripted motion of an emitter.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum EmitterPath {
    Fixed {
        position: Vec3,
    },
    /// Circles around `center` in the XY plane once every `period` seconds.
    Circle {
        center: Vec3,
        radius: f32,
        period: f32,
    },
    /// Goes back and forth between two points, one round trip per `period`.
    Line {
        from: Vec3,
        to: Vec3,
        period: f32,
    },
}

impl Default for EmitterPath {
    fn default() -> Self {
        EmitterPath::Fixed {
            position: Vec3::ZERO,
        }
    }
}

impl EmitterPath {
    pub fn position_at(&self, time: f32) -> Vec3 {
        match *self {
            EmitterPath::Fixed { position } => position,
            EmitterPath::Circle {
                center,
                radius,
                period,
            } => {
                let angle = phase(time, period) * TAU;
                center + Vec3::new(angle.cos(), angle.sin(), 0.0) * radius
            }
            EmitterPath::Line { from, to, period } => {
                let t = phase(time, period);
                let ping_pong = 1.0 - (2.0 * t - 1.0).abs();
                from.lerp(to, ping_pong)
            }
        }
    }
}

fn phase(time: f32, period: f32) -> f32 {
    if period <= 0.0 {
        return 0.0;
    }
    (time / period).rem_euclid(1.0)
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceDescription {
    pub name: String,
    pub settings: SplatSettings,
    pub path: EmitterPath,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverDescription {
    pub config: SolverConfig,
    pub position: Vec3,
    pub regions: Vec<RegionDescription>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RegionDescription {
    pub placement: Placement,
    pub params: RegionParams,
    /// Names of the sources always splatted into this region.
    pub sources: Vec<String>,
    /// Also splat any source that wanders into this box.
    pub detector: Option<TargetDetector>,
}

/// An emitter the runner moves every frame.
#[derive(Debug, Clone, Copy)]
pub struct AnimatedEmitter {
    pub source: SourceId,
    pub path: EmitterPath,
}

/// Everything built from a scene.
pub struct LoadedScene {
    pub world: FluidWorld,
    pub emitters: Vec<AnimatedEmitter>,
    pub solvers: Vec<SolverId>,
}

impl SceneDescription {
    /// Builds the fluid world. `seed` replaces every source's own seed, offset
    /// by the source's index so no two sources share a sequence.
    pub fn build(&self, seed: Option<u64>) -> LoadedScene {
        let mut world = FluidWorld::new(self.storage.clone());
        let mut names: HashMap<&str, SourceId> = HashMap::new();
        let mut emitters = Vec::with_capacity(self.sources.len());

        for (index, description) in self.sources.iter().enumerate() {
            let mut settings = description.settings.clone();
            if let Some(seed) = seed {
                settings.seed = seed.wrapping_add(index as u64);
            }
            let transform = Transform::from_translation(description.path.position_at(0.0));
            let id = world.sources.insert(SplatSource::new(transform, settings));
            if names.insert(description.name.as_str(), id).is_some() {
                warn!("Duplicate source name '{}', the last one wins", description.name);
            }
            emitters.push(AnimatedEmitter {
                source: id,
                path: description.path,
            });
        }

        let mut solvers = Vec::with_capacity(self.solvers.len());
        for description in &self.solvers {
            let mut solver = Solver::new(description.config.clone());
            solver.transform = Transform::from_translation(description.position);

            for region_description in &description.regions {
                let targets = region_description.sources.iter().filter_map(|name| {
                    let id = names.get(name.as_str()).copied();
                    if id.is_none() {
                        warn!("Region refers to unknown source '{}'", name);
                    }
                    id
                });
                let mut region = Region::new(
                    region_description.placement.to_transform(),
                    region_description.params.clone(),
                )
                .with_targets(targets);
                if let Some(detector) = region_description.detector {
                    region = region.with_provider(detector);
                }
                if solver.try_register(region).is_err() {
                    warn!("Solver is full, skipped a region");
                }
            }
            solvers.push(world.add_solver(solver));
        }

        LoadedScene {
            world,
            emitters,
            solvers,
        }
    }
}
