//! The fluid world: one framebuffer storage shared by any number of solvers,
//! plus the splat sources feeding them.

use bevy::math::Vec4;
use bevy_ecs::resource::Resource;
use bevy_log::debug;
use serde::{Deserialize, Serialize};

use crate::config::StorageConfig;
use crate::lod::FluidViewer;
use crate::solver::Solver;
use crate::splat::SplatSources;
use crate::storage::FramebufferStorage;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SolverId(pub u32);

/// Summary of a solver's fields, for logging and tests.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SolverStats {
    /// Sum of every density texel.
    pub total_density: Vec4,
    /// Largest velocity magnitude, in atlas UV units per second.
    pub peak_speed: f32,
}

/// Resource containing every solver and splat source.
#[derive(Resource)]
pub struct FluidWorld {
    pub storage: FramebufferStorage,
    pub sources: SplatSources,
    solvers: Vec<(SolverId, Solver)>,
    next_solver_id: u32,
    ticks: u64,
}

impl FluidWorld {
    pub fn new(config: StorageConfig) -> Self {
        Self {
            storage: FramebufferStorage::new(config),
            sources: SplatSources::default(),
            solvers: Vec::new(),
            next_solver_id: 0,
            ticks: 0,
        }
    }

    pub fn add_solver(&mut self, solver: Solver) -> SolverId {
        let id = SolverId(self.next_solver_id);
        self.next_solver_id += 1;
        self.solvers.push((id, solver));
        debug!("Added solver {:?}", id);
        id
    }

    /// Removes a solver and frees its framebuffer for the others.
    pub fn remove_solver(&mut self, id: SolverId) -> Option<Solver> {
        let index = self.solvers.iter().position(|(solver_id, _)| *solver_id == id)?;
        let (_, mut solver) = self.solvers.remove(index);
        solver.dispose(&mut self.storage);
        debug!("Removed solver {:?}", id);
        Some(solver)
    }

    pub fn solver(&self, id: SolverId) -> Option<&Solver> {
        self.solvers
            .iter()
            .find(|(solver_id, _)| *solver_id == id)
            .map(|(_, solver)| solver)
    }

    pub fn solver_mut(&mut self, id: SolverId) -> Option<&mut Solver> {
        self.solvers
            .iter_mut()
            .find(|(solver_id, _)| *solver_id == id)
            .map(|(_, solver)| solver)
    }

    pub fn solvers(&self) -> impl Iterator<Item = (SolverId, &Solver)> {
        self.solvers.iter().map(|(id, solver)| (*id, solver))
    }

    /// Number of ticks stepped so far.
    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// Advances every solver by `dt` seconds. Sources work out their splat
    /// counts once for the whole tick.
    pub fn step(&mut self, dt: f32, viewer: Option<&FluidViewer>) {
        if dt <= 0.0 {
            return;
        }
        self.sources.begin_tick(dt);
        for (_, solver) in &mut self.solvers {
            solver.update(&mut self.storage, &mut self.sources, dt, viewer);
        }
        self.sources.end_tick();
        self.ticks += 1;
    }

    pub fn stats(&self, id: SolverId) -> Option<SolverStats> {
        let framebuffer = self.storage.get(self.solver(id)?.framebuffer()?)?;
        let peak_speed = framebuffer
            .velocity_a
            .data()
            .iter()
            .map(|texel| texel.truncate().truncate().length())
            .fold(0.0, f32::max);
        Some(SolverStats {
            total_density: framebuffer.state_a.sum(),
            peak_speed,
        })
    }
}

impl Default for FluidWorld {
    fn default() -> Self {
        Self::new(StorageConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bevy::prelude::*;
    use crate::config::SolverConfig;
    use crate::region::{Region, RegionParams};
    use crate::splat::{SplatSettings, SplatSource};

    fn solver_with_region(world: &mut FluidWorld, settings: SplatSettings) -> SolverId {
        let source = world
            .sources
            .insert(SplatSource::new(Transform::from_xyz(0.0, 0.0, 0.5), settings));
        let mut solver = Solver::new(SolverConfig {
            desired_resolution: 64,
            density_supersampling: 1,
            ..default()
        });
        solver
            .try_register(
                Region::new(Transform::default(), RegionParams::default()).with_targets([source]),
            )
            .ok()
            .unwrap();
        world.add_solver(solver)
    }

    #[test]
    fn test_step_feeds_density() {
        let mut world = FluidWorld::default();
        let id = solver_with_region(&mut world, SplatSettings::default());
        world.step(0.016, None);
        world.step(0.016, None);

        assert_eq!(world.ticks(), 2);
        let stats = world.stats(id).unwrap();
        assert!(stats.total_density.w > 0.0);
    }

    #[test]
    fn test_remove_solver_frees_memory() {
        let mut world = FluidWorld::default();
        let a = solver_with_region(&mut world, SplatSettings::default());
        let b = solver_with_region(&mut world, SplatSettings::default());
        world.step(0.016, None);
        assert_eq!(world.storage.live_count(), 2);

        world.solver_mut(a).unwrap().transform.translation = Vec3::X;
        assert!(world.remove_solver(a).is_some());
        assert_eq!(world.storage.live_count(), 1);
        assert!(world.solver(a).is_none());
        assert!(world.solver(b).is_some());
        assert!(world.remove_solver(a).is_none());
    }

    #[test]
    fn test_source_splats_every_region_equally() {
        let mut world = FluidWorld::default();
        let source = world.sources.insert(SplatSource::new(
            Transform::from_xyz(0.0, 0.0, 0.5),
            SplatSettings {
                rate_over_steps: 0,
                rate_over_time: 100.0,
                ..default()
            },
        ));
        let counts = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
        let sink = counts.clone();
        if let Some(source) = world.sources.get_mut(source) {
            source.on_splat(move |event| sink.lock().unwrap().push(event.splats));
        }

        let mut solver = Solver::new(SolverConfig::default());
        for _ in 0..2 {
            solver
                .try_register(
                    Region::new(Transform::default(), RegionParams::default())
                        .with_targets([source]),
                )
                .ok()
                .unwrap();
        }
        world.add_solver(solver);
        world.step(0.05, None);

        assert_eq!(*counts.lock().unwrap(), vec![5, 5]);
    }

    #[test]
    fn test_zero_dt_is_ignored() {
        let mut world = FluidWorld::default();
        solver_with_region(&mut world, SplatSettings::default());
        world.step(0.0, None);
        assert_eq!(world.ticks(), 0);
        assert_eq!(world.storage.live_count(), 0);
    }
}
