//! Dynamic target providers: extra splat sources a region picks up each tick
//! on top of its fixed target list.

use bevy::prelude::*;
use serde::{Deserialize, Serialize};

use super::{SourceId, SplatSources};

/// Supplies the sources a region should splat this tick.
pub trait TargetProvider: Send + Sync {
    fn targets(&self, region: &Transform, sources: &SplatSources) -> Vec<SourceId>;
}

/// Provider backed by a list the host edits at will.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixedTargets {
    pub members: Vec<SourceId>,
}

impl TargetProvider for FixedTargets {
    fn targets(&self, _region: &Transform, sources: &SplatSources) -> Vec<SourceId> {
        self.members
            .iter()
            .copied()
            .filter(|id| sources.get(*id).is_some())
            .collect()
    }
}

/// Picks up every enabled source inside an axis-aligned box centered on the
/// region.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TargetDetector {
    pub size: Vec3,
    pub max_sources: usize,
}

impl Default for TargetDetector {
    fn default() -> Self {
        Self {
            size: Vec3::splat(0.5),
            max_sources: 32,
        }
    }
}

impl TargetProvider for TargetDetector {
    fn targets(&self, region: &Transform, sources: &SplatSources) -> Vec<SourceId> {
        let half = self.size * 0.5;
        sources
            .iter()
            .filter(|(_, source)| source.enabled)
            .filter(|(_, source)| {
                let offset = (source.transform.translation - region.translation).abs();
                offset.cmple(half).all()
            })
            .map(|(id, _)| id)
            .take(self.max_sources)
            .collect()
    }
}
