//! Executor seam for background work
//!
//! Notification workers, poll drivers and heartbeats are started through a
//! [`Spawner`] handed in by the owner, so embedders choose the executor and
//! tests can run isolated instances.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

/// Boxed background task
pub type BoxTask = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// A spawner that can run futures in the background
pub trait Spawner: Send + Sync {
    /// Spawn a future; it runs to completion detached from the caller
    fn spawn(&self, task: BoxTask);
}

/// Spawner backed by smol's global executor
#[derive(Debug, Clone, Copy, Default)]
pub struct SmolSpawner;

impl Spawner for SmolSpawner {
    fn spawn(&self, task: BoxTask) {
        smol::spawn(task).detach();
    }
}

/// Sleep without tying the caller to a specific runtime
pub async fn sleep(duration: Duration) {
    async_io::Timer::after(duration).await;
}

/// Spawner that holds tasks back until [`release`](HeldSpawner::release)
#[cfg(test)]
#[derive(Default)]
pub(crate) struct HeldSpawner(std::sync::Mutex<Vec<BoxTask>>);

#[cfg(test)]
impl HeldSpawner {
    /// Start every held task on smol's global executor
    pub(crate) fn release(&self) {
        for task in crate::sync::lock(&self.0).drain(..) {
            smol::spawn(task).detach();
        }
    }
}

#[cfg(test)]
impl Spawner for HeldSpawner {
    fn spawn(&self, task: BoxTask) {
        crate::sync::lock(&self.0).push(task);
    }
}
