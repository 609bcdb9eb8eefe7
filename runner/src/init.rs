use std::time::Duration;

use bevy::prelude::*;
use bevy_app::ScheduleRunnerPlugin;
use bevy_log::{debug, info};
use fluxgrid::{FluidPlugin, FluidWorld, SolverId};

use crate::scene::{AnimatedEmitter, LoadedScene, SceneDescription};

/// Emitters moved along their paths every frame.
#[derive(Resource, Default)]
pub struct Emitters(pub Vec<AnimatedEmitter>);

/// Progress of the run towards its tick limit.
#[derive(Resource, Debug, Clone)]
pub struct RunState {
    pub ticks: u64,
    pub limit: u64,
    /// Stats are logged every this many ticks.
    pub report_every: u64,
    pub solvers: Vec<SolverId>,
}

pub struct RunSettings {
    pub ticks: u64,
    pub tick_rate: f64,
    pub seed: Option<u64>,
}

pub fn init(scene: SceneDescription, settings: RunSettings) {
    let mut app = App::new();
    app.add_plugins(
        MinimalPlugins.set(ScheduleRunnerPlugin::run_loop(Duration::from_secs_f64(
            1.0 / settings.tick_rate,
        ))),
    );
    app.add_plugins(bevy_log::LogPlugin::default());

    let viewer = scene.viewer;
    let LoadedScene {
        world,
        emitters,
        solvers,
    } = scene.build(settings.seed);

    info!(
        "Running {} solver(s) and {} source(s) for {} ticks at {} Hz",
        solvers.len(),
        emitters.len(),
        settings.ticks,
        settings.tick_rate
    );

    // Inserted before the plugin so init_resource keeps the scene's world
    app.insert_resource(world);
    if let Some(viewer) = viewer {
        app.insert_resource(viewer);
    }
    app.add_plugins(FluidPlugin);

    app.insert_resource(Emitters(emitters));
    app.insert_resource(RunState {
        ticks: 0,
        limit: settings.ticks,
        report_every: (settings.tick_rate.round() as u64).max(1),
        solvers,
    });
    register_systems(&mut app);

    app.run();
}

pub fn register_systems(app: &mut App) {
    app.add_systems(Update, animate_emitters);
    app.add_systems(Last, count_ticks);
}

fn animate_emitters(
    time: Res<Time>,
    emitters: Res<Emitters>,
    mut fluid_world: ResMut<FluidWorld>,
) {
    let elapsed = time.elapsed_secs();
    for emitter in &emitters.0 {
        if let Some(source) = fluid_world.sources.get_mut(emitter.source) {
            source.transform.translation = emitter.path.position_at(elapsed);
        }
    }
}

fn log_stats(fluid_world: &FluidWorld, state: &RunState) {
    for id in &state.solvers {
        match fluid_world.stats(*id) {
            Some(stats) => info!(
                "Tick {} solver {}: density {:.3} (alpha {:.3}), peak speed {:.3}",
                state.ticks,
                id.0,
                stats.total_density.truncate().element_sum(),
                stats.total_density.w,
                stats.peak_speed
            ),
            None => debug!("Tick {} solver {}: no framebuffer", state.ticks, id.0),
        }
    }
}

fn count_ticks(
    mut state: ResMut<RunState>,
    fluid_world: Res<FluidWorld>,
    mut ev_app_exit: EventWriter<AppExit>,
) {
    state.ticks += 1;
    if state.ticks % state.report_every == 0 {
        log_stats(&fluid_world, &state);
    }
    if state.ticks >= state.limit {
        log_stats(&fluid_world, &state);
        info!("Finished after {} ticks", state.ticks);
        ev_app_exit.write(AppExit::Success);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::{EmitterPath, SourceDescription};

    fn build_app(limit: u64) -> App {
        let mut app = App::new();
        app.init_resource::<Time>();
        app.add_plugins(FluidPlugin);
        app.insert_resource(RunState {
            ticks: 0,
            limit,
            report_every: 1,
            solvers: Vec::new(),
        });
        app.init_resource::<Emitters>();
        register_systems(&mut app);
        app
    }

    #[test]
    fn test_exits_after_tick_limit() {
        let mut app = build_app(3);
        for _ in 0..2 {
            app.update();
        }
        assert!(app.should_exit().is_none());
        app.update();
        assert_eq!(app.should_exit(), Some(AppExit::Success));
        assert_eq!(app.world().resource::<RunState>().ticks, 3);
    }

    #[test]
    fn test_emitters_follow_paths() {
        let mut app = build_app(100);
        let scene = SceneDescription {
            sources: vec![SourceDescription {
                path: EmitterPath::Fixed {
                    position: Vec3::new(0.0, 0.0, 2.0),
                },
                ..default()
            }],
            ..default()
        };
        let mut loaded = scene.build(None);
        let id = loaded.emitters[0].source;
        if let Some(source) = loaded.world.sources.get_mut(id) {
            source.transform.translation = Vec3::ZERO;
        }
        app.insert_resource(loaded.world);
        app.insert_resource(Emitters(loaded.emitters));
        app.update();

        let source = app
            .world()
            .resource::<FluidWorld>()
            .sources
            .get(id)
            .unwrap()
            .transform
            .translation;
        assert_eq!(source, Vec3::new(0.0, 0.0, 2.0));
    }
}
