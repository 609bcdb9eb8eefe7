/// Level of Detail (LOD) types and utilities for solvers.
///
/// LOD reduces simulation resolution for solvers that take up little of the screen:
/// - LOD 0: full desired resolution
/// - LOD n: desired resolution divided by n + 1
/// - Culled: below the last transition height, the solver is not simulated
use bevy::prelude::*;
use serde::{Deserialize, Serialize};

use crate::config::LodConfig;

/// How the viewer projects the scene, used to estimate on-screen size.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum ViewerProjection {
    Perspective { fov_y_degrees: f32 },
    Orthographic { half_height: f32 },
}

impl Default for ViewerProjection {
    fn default() -> Self {
        ViewerProjection::Perspective {
            fov_y_degrees: 60.0,
        }
    }
}

/// The point of view LOD is computed from. Without one, every solver runs at LOD 0.
#[derive(Resource, Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct FluidViewer {
    pub position: Vec3,
    pub projection: ViewerProjection,
}

/// Fraction of the viewport height covered by an object of `size` at `distance`.
pub fn relative_screen_height(projection: ViewerProjection, distance: f32, size: f32) -> f32 {
    match projection {
        ViewerProjection::Orthographic { half_height } => size * 0.5 / half_height,
        ViewerProjection::Perspective { fov_y_degrees } => {
            let half_angle = (fov_y_degrees.to_radians() * 0.5).tan();
            size * 0.5 / (distance * half_angle)
        }
    }
}

/// Level of Detail for a solver
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LodLevel {
    Visible(u32),
    /// Too small on screen. Carries the level count so that resolution keeps
    /// shrinking when buffers are not disposed.
    Culled(u32),
}

impl Default for LodLevel {
    fn default() -> Self {
        LodLevel::Visible(0)
    }
}

impl LodLevel {
    pub fn index(&self) -> u32 {
        match self {
            LodLevel::Visible(i) | LodLevel::Culled(i) => *i,
        }
    }

    pub fn is_culled(&self) -> bool {
        matches!(self, LodLevel::Culled(_))
    }

    /// Resolution this level asks for, given the full-detail resolution.
    pub fn scaled_resolution(&self, desired_resolution: u32) -> u32 {
        desired_resolution / (self.index() + 1)
    }

    /// Picks the first level whose transition height is reached.
    ///
    /// # Arguments
    /// * `relative_height` - Fraction of the screen covered by the solver
    /// * `transition_heights` - Thresholds from most to least detailed
    pub fn from_relative_height(relative_height: f32, transition_heights: &[f32]) -> Self {
        transition_heights
            .iter()
            .position(|&threshold| relative_height >= threshold)
            .map(|i| LodLevel::Visible(i as u32))
            .unwrap_or(LodLevel::Culled(transition_heights.len() as u32))
    }

    /// Level for a solver of unit size at `position`, seen from `viewer`.
    pub fn select(config: Option<&LodConfig>, viewer: Option<&FluidViewer>, position: Vec3) -> Self {
        let (Some(config), Some(viewer)) = (config, viewer) else {
            return LodLevel::Visible(0);
        };
        let distance = position.distance(viewer.position) / config.lod_bias.max(f32::EPSILON);
        let relative_height = relative_screen_height(viewer.projection, distance, 1.0);
        Self::from_relative_height(relative_height, &config.transition_heights)
    }
}
