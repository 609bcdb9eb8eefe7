//! Bevy plugin for fluid simulation integration.

use bevy::prelude::*;

use crate::config::FluidConfig;
use crate::lod::FluidViewer;
use crate::world::FluidWorld;

/// Plugin that adds grid fluid simulation to an app.
///
/// This plugin:
/// - Initializes the fluid world and its configuration
/// - Steps every solver once per frame, after game logic moved things
pub struct FluidPlugin;

impl Plugin for FluidPlugin {
    fn build(&self, app: &mut App) {
        app.init_resource::<FluidConfig>()
            .init_resource::<FluidWorld>()
            .register_type::<FluidConfig>()
            .add_systems(PostUpdate, step_fluid_world);
    }
}

/// System that steps the fluid world forward.
///
/// Runs in PostUpdate so region and source transforms written during Update
/// are seen this frame. The optional viewer drives level of detail.
fn step_fluid_world(
    mut fluid_world: ResMut<FluidWorld>,
    fluid_config: Res<FluidConfig>,
    time: Res<Time>,
    viewer: Option<Res<FluidViewer>>,
) {
    if !fluid_config.enabled {
        return;
    }

    let dt = time.delta_secs() * fluid_config.time_scale;
    fluid_world.step(dt, viewer.as_deref());
}
