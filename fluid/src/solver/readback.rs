//! Asynchronous copies of a solver's velocity field for CPU-side queries.
//!
//! A snapshot of the velocity front buffer is handed to a task on the
//! [`AsyncComputeTaskPool`]. Finished copies are collected on later ticks
//! without blocking. A copy is only kept if the framebuffer it was taken
//! from still exists at the same generation.

use std::fmt;

use bevy::tasks::{AsyncComputeTaskPool, Task, TaskPool};
use bevy_log::{debug, error};
use futures_lite::future;

use crate::storage::{FramebufferId, FramebufferStorage, RgbaGrid};

#[derive(Debug, Clone, PartialEq)]
pub enum ReadbackError {
    /// The framebuffer had no allocated buffers.
    Empty,
    /// The velocity field held NaN or infinite values.
    NonFinite,
}

impl fmt::Display for ReadbackError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReadbackError::Empty => write!(f, "framebuffer is not allocated"),
            ReadbackError::NonFinite => write!(f, "velocity field is not finite"),
        }
    }
}

impl std::error::Error for ReadbackError {}

fn copy_velocity(snapshot: RgbaGrid) -> Result<RgbaGrid, ReadbackError> {
    if snapshot.is_empty() {
        return Err(ReadbackError::Empty);
    }
    if !snapshot.data().iter().all(|texel| texel.is_finite()) {
        return Err(ReadbackError::NonFinite);
    }
    Ok(snapshot)
}

struct PendingReadback {
    framebuffer: FramebufferId,
    generation: u64,
    task: Task<Result<RgbaGrid, ReadbackError>>,
}

/// Latest velocity image of a framebuffer, plus the copies in flight.
#[derive(Default)]
pub struct Readback {
    image: Option<RgbaGrid>,
    pending: Vec<PendingReadback>,
}

impl Readback {
    pub fn image(&self) -> Option<&RgbaGrid> {
        self.image.as_ref()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Starts copying the velocity front buffer of `id`.
    pub fn request(&mut self, storage: &FramebufferStorage, id: FramebufferId) {
        let Some(framebuffer) = storage.get(id) else {
            return;
        };
        let snapshot = framebuffer.velocity_a.clone();
        let task_pool = AsyncComputeTaskPool::get_or_init(TaskPool::new);
        self.pending.push(PendingReadback {
            framebuffer: id,
            generation: framebuffer.generation(),
            task: task_pool.spawn(async move { copy_velocity(snapshot) }),
        });
    }

    /// Collects finished copies. Copies of a framebuffer that is gone or has
    /// been reallocated since are dropped.
    pub fn poll(&mut self, storage: &FramebufferStorage, current: Option<FramebufferId>) {
        let mut index = 0;
        while index < self.pending.len() {
            let pending = &mut self.pending[index];
            let Some(result) = future::block_on(future::poll_once(&mut pending.task)) else {
                index += 1;
                continue;
            };
            let pending = self.pending.remove(index);

            let live_generation = current
                .filter(|id| *id == pending.framebuffer)
                .and_then(|id| storage.get(id))
                .map(|framebuffer| framebuffer.generation());
            if live_generation != Some(pending.generation) {
                debug!(
                    "Discarded stale readback of framebuffer {} (generation {})",
                    pending.framebuffer, pending.generation
                );
                continue;
            }

            match result {
                Ok(image) => self.image = Some(image),
                Err(err) => error!(
                    "Readback of framebuffer {} failed: {}",
                    pending.framebuffer, err
                ),
            }
        }
    }

    /// Forgets the current image and every copy in flight.
    pub fn invalidate(&mut self) {
        self.image = None;
        self.pending.clear();
    }
}
