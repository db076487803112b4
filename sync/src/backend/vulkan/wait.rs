//! Queue waits carried into the next submission.
//!
//! A semaphore wait in Vulkan only holds back the batch it is submitted with,
//! so a queue-level wait is kept here until work is submitted to the queue.

use ash::vk;

/// Timeline waits not yet attached to a submission.
///
/// Stored as parallel arrays so they can be handed to `VkSubmitInfo` and
/// `VkTimelineSemaphoreSubmitInfo` without copying.
#[derive(Debug, Default)]
pub(crate) struct PendingWaits {
    semaphores: Vec<vk::Semaphore>,
    values: Vec<u64>,
    stages: Vec<vk::PipelineStageFlags>,
}

impl PendingWaits {
    /// Add a wait. A second wait on the same semaphore keeps the higher value.
    pub(crate) fn push(&mut self, semaphore: vk::Semaphore, value: u64) {
        if let Some(index) = self.semaphores.iter().position(|&s| s == semaphore) {
            self.values[index] = self.values[index].max(value);
        } else {
            self.semaphores.push(semaphore);
            self.values.push(value);
            self.stages.push(vk::PipelineStageFlags::ALL_COMMANDS);
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.semaphores.is_empty()
    }

    pub(crate) fn semaphores(&self) -> &[vk::Semaphore] {
        &self.semaphores
    }

    pub(crate) fn values(&self) -> &[u64] {
        &self.values
    }

    pub(crate) fn stages(&self) -> &[vk::PipelineStageFlags] {
        &self.stages
    }

    /// Remove and return every pending wait as (semaphore, value) pairs.
    pub(crate) fn take(&mut self) -> Vec<(vk::Semaphore, u64)> {
        self.stages.clear();
        self.semaphores
            .drain(..)
            .zip(self.values.drain(..))
            .collect()
    }
}
