//! Vulkan backend using timeline semaphores via ash.
//!
//! Requires Vulkan 1.2 (or `VK_KHR_timeline_semaphore`) with the
//! `timelineSemaphore` feature enabled on the device. The crate doesn't create
//! instances or devices: wrap handles owned by the renderer with
//! [`VulkanDevice::from_raw`] and [`VulkanQueue::from_raw`].
//!
//! | Fence concept | Vulkan object |
//! |---------------|---------------|
//! | Marker | `VkSemaphore` of type `VK_SEMAPHORE_TYPE_TIMELINE` |
//! | Signal | empty `vkQueueSubmit` with `VkTimelineSemaphoreSubmitInfo` |
//! | Queue wait | timeline wait attached to the next submission |
//! | Completed value | `vkGetSemaphoreCounterValue` |
//! | Completion event | armed (semaphore, value) pair waited with `vkWaitSemaphores` |
//!
//! # Queue Waits
//!
//! A Vulkan semaphore wait only holds back the batch it is part of. Queue waits
//! are therefore kept on the [`VulkanQueue`] and attached to the next batch
//! submitted through it: every later signal, and the first
//! [`VulkanQueue::submit`]. Renderers that build their own `VkSubmitInfo` must
//! merge [`VulkanQueue::take_pending_waits`] into it instead.

mod conversion;
mod wait;

use ash::vk;
use parking_lot::Mutex;

use crate::error::{SyncError, SyncResult};

use super::{CommandQueue, CompletionEvent, Device, GpuBackend, TimelineMarker};

use self::conversion::{convert_creation_result, convert_result};
use self::wait::PendingWaits;

/// Vulkan GPU backend.
#[derive(Debug)]
pub enum VulkanBackend {}

impl GpuBackend for VulkanBackend {
    type Queue = VulkanQueue;
    type Device = VulkanDevice;
    type Marker = VulkanMarker;
    type Event = VulkanEvent;

    fn name() -> &'static str {
        "Vulkan"
    }
}

/// Vulkan logical device wrapper.
#[derive(Clone)]
pub struct VulkanDevice {
    device: ash::Device,
}

impl VulkanDevice {
    /// Wrap an existing logical device.
    ///
    /// # Safety
    ///
    /// `device` must be a valid device with timeline semaphores enabled, and
    /// must outlive every object created through this wrapper.
    pub unsafe fn from_raw(device: ash::Device) -> Self {
        Self { device }
    }

    /// Get the underlying ash device.
    pub fn raw(&self) -> &ash::Device {
        &self.device
    }
}

impl Device<VulkanBackend> for VulkanDevice {
    fn create_marker(&self, initial_value: u64) -> SyncResult<VulkanMarker> {
        let mut type_info = vk::SemaphoreTypeCreateInfo::default()
            .semaphore_type(vk::SemaphoreType::TIMELINE)
            .initial_value(initial_value);
        let create_info = vk::SemaphoreCreateInfo::default().push_next(&mut type_info);

        let semaphore = unsafe { self.device.create_semaphore(&create_info, None) }
            .map_err(|e| convert_creation_result("Failed to create timeline semaphore", e))?;

        log::trace!(
            "VulkanBackend: created timeline semaphore {:?} (initial value: {})",
            semaphore,
            initial_value
        );

        Ok(VulkanMarker {
            device: self.device.clone(),
            semaphore,
        })
    }

    fn create_event(&self) -> SyncResult<VulkanEvent> {
        Ok(VulkanEvent {
            device: self.device.clone(),
            armed: Mutex::new(None),
        })
    }
}

/// Vulkan queue wrapper.
///
/// Submissions are serialized with an internal lock, as Vulkan requires
/// external synchronization of `vkQueueSubmit` on the same queue.
pub struct VulkanQueue {
    device: VulkanDevice,
    state: Mutex<QueueState>,
}

struct QueueState {
    queue: vk::Queue,
    pending_waits: PendingWaits,
}

impl VulkanQueue {
    /// Wrap an existing queue.
    ///
    /// # Safety
    ///
    /// `queue` must belong to `device`, and both must outlive the wrapper. All
    /// submissions to `queue` must go through this wrapper.
    pub unsafe fn from_raw(device: ash::Device, queue: vk::Queue) -> Self {
        Self {
            device: VulkanDevice { device },
            state: Mutex::new(QueueState {
                queue,
                pending_waits: PendingWaits::default(),
            }),
        }
    }

    /// Submit command buffers, held back by every pending queue wait.
    ///
    /// `fence` may be `vk::Fence::null()`.
    pub fn submit(
        &self,
        command_buffers: &[vk::CommandBuffer],
        fence: vk::Fence,
    ) -> SyncResult<()> {
        let mut state = self.state.lock();

        let mut timeline_info = vk::TimelineSemaphoreSubmitInfo::default()
            .wait_semaphore_values(state.pending_waits.values());
        let submit_info = vk::SubmitInfo::default()
            .wait_semaphores(state.pending_waits.semaphores())
            .wait_dst_stage_mask(state.pending_waits.stages())
            .command_buffers(command_buffers)
            .push_next(&mut timeline_info);

        unsafe {
            self.device
                .device
                .queue_submit(state.queue, &[submit_info], fence)
        }
        .map_err(|e| convert_result("Failed to submit command buffers", e))?;

        if !state.pending_waits.is_empty() {
            log::trace!(
                "VulkanBackend: {} queue waits attached to submission",
                state.pending_waits.semaphores().len()
            );
        }
        state.pending_waits.take();
        Ok(())
    }

    /// Remove the pending queue waits, as (semaphore, value) pairs.
    ///
    /// The caller must add them, with timeline wait values, to the next batch
    /// it submits to this queue.
    pub fn take_pending_waits(&self) -> Vec<(vk::Semaphore, u64)> {
        self.state.lock().pending_waits.take()
    }
}

impl CommandQueue<VulkanBackend> for VulkanQueue {
    fn device(&self) -> SyncResult<VulkanDevice> {
        Ok(self.device.clone())
    }

    // Pending queue waits are attached to the signal batch too, without being
    // consumed, so the signal never lands before an earlier wait is met.
    fn signal(&self, marker: &VulkanMarker, value: u64) -> SyncResult<()> {
        let state = self.state.lock();

        let semaphores = [marker.semaphore];
        let values = [value];
        let mut timeline_info = vk::TimelineSemaphoreSubmitInfo::default()
            .wait_semaphore_values(state.pending_waits.values())
            .signal_semaphore_values(&values);
        let submit_info = vk::SubmitInfo::default()
            .wait_semaphores(state.pending_waits.semaphores())
            .wait_dst_stage_mask(state.pending_waits.stages())
            .signal_semaphores(&semaphores)
            .push_next(&mut timeline_info);

        unsafe {
            self.device
                .device
                .queue_submit(state.queue, &[submit_info], vk::Fence::null())
        }
        .map_err(|e| convert_result("Failed to submit timeline signal", e))?;

        log::trace!(
            "VulkanBackend: signal {:?} to {}",
            marker.semaphore,
            value
        );
        Ok(())
    }

    fn wait(&self, marker: &VulkanMarker, value: u64) -> SyncResult<()> {
        self.state.lock().pending_waits.push(marker.semaphore, value);
        log::trace!(
            "VulkanBackend: wait {:?} for {} pending until next submission",
            marker.semaphore,
            value
        );
        Ok(())
    }
}

/// Timeline semaphore.
pub struct VulkanMarker {
    device: ash::Device,
    semaphore: vk::Semaphore,
}

impl VulkanMarker {
    /// Get the raw semaphore, e.g. to signal it from a regular submission.
    pub fn raw(&self) -> vk::Semaphore {
        self.semaphore
    }
}

impl TimelineMarker<VulkanBackend> for VulkanMarker {
    fn completed_value(&self) -> SyncResult<u64> {
        unsafe { self.device.get_semaphore_counter_value(self.semaphore) }
            .map_err(|e| convert_result("Failed to query semaphore counter", e))
    }

    fn notify_on_completion(&self, value: u64, event: &VulkanEvent) -> SyncResult<()> {
        *event.armed.lock() = Some((self.semaphore, value));
        Ok(())
    }
}

impl Drop for VulkanMarker {
    fn drop(&mut self) {
        log::trace!("VulkanBackend: destroying semaphore {:?}", self.semaphore);
        unsafe { self.device.destroy_semaphore(self.semaphore, None) };
    }
}

/// Host-side completion event.
///
/// Vulkan has no object a semaphore can set on completion, so the event
/// remembers which (semaphore, value) pair it was armed for and waits on the
/// semaphore directly.
pub struct VulkanEvent {
    device: ash::Device,
    armed: Mutex<Option<(vk::Semaphore, u64)>>,
}

impl CompletionEvent for VulkanEvent {
    fn wait(&self) -> SyncResult<()> {
        let Some((semaphore, value)) = *self.armed.lock() else {
            return Err(SyncError::Backend(
                "completion event waited on without being armed".to_string(),
            ));
        };

        let semaphores = [semaphore];
        let values = [value];
        let wait_info = vk::SemaphoreWaitInfo::default()
            .semaphores(&semaphores)
            .values(&values);
        unsafe { self.device.wait_semaphores(&wait_info, u64::MAX) }
            .map_err(|e| convert_result("Failed to wait for timeline semaphore", e))?;

        // Auto-reset.
        self.armed.lock().take();
        Ok(())
    }
}

static_assertions::assert_impl_all!(VulkanQueue: Send, Sync);
static_assertions::assert_impl_all!(VulkanMarker: Send, Sync);
static_assertions::assert_impl_all!(VulkanEvent: Send, Sync);
