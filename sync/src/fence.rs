//! Monotonic CPU/GPU fence.
//!
//! A [`Fence`] pairs a 64-bit counter on the host with a hardware marker that a
//! command queue advances as it executes. The host posts markers with
//! [`Fence::signal`] after submitting work and later asks whether, or waits
//! until, the queue got that far.
//!
//! ```text
//! host:   submit A  signal(1)  submit B  signal(2)  flush_gpu_queue() ──┐
//!                                                                       │ blocks
//! queue:  [A]───────[=1]───────[B]───────[=2]───────[=3] ───────────────┘
//! ```
//!
//! # Waiting
//!
//! | Operation | Blocks the host | Blocks a queue |
//! |-----------|-----------------|----------------|
//! | [`Fence::flush_gpu_queue`] | yes, until the queue drains | no |
//! | [`Fence::gpu_wait`] | no | the fence's own queue |
//! | [`gpu_wait_on`] | no | any queue of the same backend |
//!
//! Host waits have no timeout. A queue that never reaches the awaited value
//! stalls the host forever.
//!
//! # Thread Safety
//!
//! Signaling takes `&mut self`, so one thread owns the counter at a time.
//! Move the fence to a dedicated submission thread if several threads produce
//! work, rather than sharing it behind a lock.

use std::sync::Arc;

use crate::backend::{CommandQueue, CompletionEvent, Device, GpuBackend, TimelineMarker};
use crate::descriptor::{FenceDescriptor, OrderingCheck};
use crate::error::{SyncError, SyncResult};
use crate::value::FenceValue;

/// CPU/GPU synchronization primitive tracking one command queue.
///
/// # Example
///
/// ```ignore
/// let mut fence = Fence::<DummyBackend>::new(queue.clone())?;
///
/// queue.submit_work("upload")?;
/// let upload_done = fence.signal(FenceValue::Auto)?;
///
/// // Make the compute queue wait for the upload without blocking the CPU.
/// gpu_wait_on(&*compute_queue, &fence, FenceValue::Exact(upload_done))?;
///
/// // Before shutdown:
/// fence.flush_gpu_queue()?;
/// ```
pub struct Fence<B: GpuBackend> {
    queue: Arc<B::Queue>,
    marker: B::Marker,
    event: B::Event,
    /// Last value signaled from the host.
    current_value: u64,
    label: Option<String>,
    ordering_check: OrderingCheck,
}

impl<B: GpuBackend> Fence<B> {
    /// Create a fence for `queue` with default settings.
    ///
    /// # Errors
    ///
    /// Returns an error if the queue's device cannot be queried or the marker
    /// or completion event cannot be created.
    pub fn new(queue: Arc<B::Queue>) -> SyncResult<Self> {
        Self::with_descriptor(queue, &FenceDescriptor::default())
    }

    /// Create a fence for `queue` from a descriptor.
    ///
    /// # Errors
    ///
    /// Returns an error if the queue's device cannot be queried or the marker
    /// or completion event cannot be created. Anything created before the
    /// failure is released.
    pub fn with_descriptor(queue: Arc<B::Queue>, descriptor: &FenceDescriptor) -> SyncResult<Self> {
        let device = queue.device()?;
        let marker = device.create_marker(0)?;
        let event = device.create_event()?;

        log::debug!(
            "Created fence {:?} on {} backend",
            descriptor.label,
            B::name()
        );

        Ok(Self {
            queue,
            marker,
            event,
            current_value: 0,
            label: descriptor.label.clone(),
            ordering_check: descriptor.ordering_check,
        })
    }

    /// Get the debug label.
    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    /// Get the queue this fence signals on.
    pub fn queue(&self) -> &Arc<B::Queue> {
        &self.queue
    }

    /// Get the hardware marker.
    pub fn marker(&self) -> &B::Marker {
        &self.marker
    }

    /// Last value signaled from the host.
    pub fn current_value(&self) -> u64 {
        self.current_value
    }

    /// Highest value the queue has reached.
    pub fn completed_value(&self) -> SyncResult<u64> {
        self.marker.completed_value()
    }

    /// Check whether the queue has reached `value` (non-blocking).
    pub fn is_complete(&self, value: u64) -> SyncResult<bool> {
        Ok(self.completed_value()? >= value)
    }

    /// Post a new marker on the queue, after all work submitted so far.
    ///
    /// [`FenceValue::Auto`] signals the current value plus one. An explicit
    /// value must be greater than [`current_value`](Self::current_value);
    /// see [`OrderingCheck`] for what happens otherwise. The check runs before
    /// anything is submitted.
    ///
    /// Never blocks. Returns the signaled value.
    ///
    /// # Panics
    ///
    /// Panics on a non-increasing explicit value when the fence was created
    /// with [`OrderingCheck::Panic`].
    pub fn signal(&mut self, value: FenceValue) -> SyncResult<u64> {
        let next = match value {
            FenceValue::Auto => self.current_value.checked_add(1).ok_or_else(|| {
                SyncError::InvalidParameter("fence value overflow".to_string())
            })?,
            FenceValue::Exact(requested) if requested <= self.current_value => {
                return Err(self.ordering_violation(requested));
            }
            FenceValue::Exact(requested) => requested,
        };

        self.queue.signal(&self.marker, next)?;
        self.current_value = next;
        log::trace!("Fence {:?}: signaled {}", self.label, next);
        Ok(next)
    }

    /// Make this fence's own queue wait for `value` before running later work.
    ///
    /// [`FenceValue::Auto`] waits for the last signaled value. Never blocks the
    /// host. Queues already execute in submission order, so this is mostly
    /// useful through [`gpu_wait_on`] with another queue.
    pub fn gpu_wait(&self, value: FenceValue) -> SyncResult<()> {
        gpu_wait_on::<B>(&self.queue, self, value)
    }

    /// Make `queue` wait until this fence reaches `value`.
    ///
    /// Method form of [`gpu_wait_on`].
    pub fn queue_wait(&self, queue: &B::Queue, value: FenceValue) -> SyncResult<()> {
        gpu_wait_on::<B>(queue, self, value)
    }

    /// Signal a new value and block until the queue reaches it.
    ///
    /// When this returns, everything submitted to the queue before the call
    /// has finished executing. Returns the flushed value.
    pub fn flush_gpu_queue(&mut self) -> SyncResult<u64> {
        let value = self.signal(FenceValue::Auto)?;
        self.cpu_wait(FenceValue::Exact(value))?;
        Ok(value)
    }

    /// Block the calling thread until the queue reaches `value`.
    ///
    /// [`FenceValue::Auto`] waits for the last signaled value. Returns without
    /// blocking if the value has already been reached.
    pub(crate) fn cpu_wait(&self, value: FenceValue) -> SyncResult<()> {
        let target = value.resolve(self.current_value);
        let completed = self.marker.completed_value()?;
        if completed >= target {
            log::trace!(
                "Fence {:?}: {} already reached (completed {})",
                self.label,
                target,
                completed
            );
            return Ok(());
        }

        crate::profile_scope!("Fence::cpu_wait");
        log::trace!(
            "Fence {:?}: blocking until {} (completed {})",
            self.label,
            target,
            completed
        );
        self.marker.notify_on_completion(target, &self.event)?;
        self.event.wait()
    }

    fn ordering_violation(&self, requested: u64) -> SyncError {
        match self.ordering_check {
            OrderingCheck::Panic => panic!(
                "Fence {:?}: signal value {} is not greater than current value {}",
                self.label, requested, self.current_value
            ),
            OrderingCheck::Error => SyncError::NonMonotonicSignal {
                current: self.current_value,
                requested,
            },
        }
    }
}

/// Make `queue` wait until `fence` reaches `value` before running later work.
///
/// `queue` can be any queue of the fence's backend, typically one other than
/// the fence's own. [`FenceValue::Auto`] waits for the fence's last signaled
/// value. Never blocks the host.
pub fn gpu_wait_on<B: GpuBackend>(
    queue: &B::Queue,
    fence: &Fence<B>,
    value: FenceValue,
) -> SyncResult<()> {
    let target = value.resolve(fence.current_value);
    queue.wait(&fence.marker, target)?;
    log::trace!("Fence {:?}: queue wait for {} recorded", fence.label, target);
    Ok(())
}

impl<B: GpuBackend> std::fmt::Debug for Fence<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Fence")
            .field("backend", &B::name())
            .field("label", &self.label)
            .field("current_value", &self.current_value)
            .finish_non_exhaustive()
    }
}

impl<B: GpuBackend> Drop for Fence<B> {
    fn drop(&mut self) {
        if let Ok(completed) = self.marker.completed_value() {
            if completed < self.current_value {
                log::warn!(
                    "Fence {:?} dropped with work in flight (completed {}, signaled {})",
                    self.label,
                    completed,
                    self.current_value
                );
            }
        }
        log::debug!("Destroying fence {:?}", self.label);
    }
}

static_assertions::assert_impl_all!(Fence<crate::backend::dummy::DummyBackend>: Send, Sync);

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::backend::dummy::{DummyBackend, DummyDevice, DummyQueue, ExecutionMode, QueueCommand};

    fn deferred_fence() -> (DummyDevice, Arc<DummyQueue>, Fence<DummyBackend>) {
        let device = DummyDevice::new();
        let queue = device.create_queue(ExecutionMode::Deferred);
        let fence = Fence::<DummyBackend>::new(queue.clone()).unwrap();
        (device, queue, fence)
    }

    #[test]
    fn test_new_fence_starts_at_zero() {
        let (device, _queue, fence) = deferred_fence();
        assert_eq!(fence.current_value(), 0);
        assert_eq!(fence.completed_value().unwrap(), 0);
        assert!(fence.is_complete(0).unwrap());
        let stats = device.stats();
        assert_eq!(stats.live_markers(), 1);
        assert_eq!(stats.live_events(), 1);
    }

    #[test]
    fn test_auto_signal_increments_by_one() {
        let (_device, queue, mut fence) = deferred_fence();
        for expected in 1..=5 {
            assert_eq!(fence.signal(FenceValue::Auto).unwrap(), expected);
            assert_eq!(fence.current_value(), expected);
        }
        assert_eq!(queue.pending_len(), 5);
    }

    #[test]
    fn test_explicit_signal_sets_value() {
        let (_device, queue, mut fence) = deferred_fence();
        assert_eq!(fence.signal(FenceValue::Exact(10)).unwrap(), 10);
        assert_eq!(fence.signal(FenceValue::Auto).unwrap(), 11);

        let marker = fence.marker().id();
        assert_eq!(
            queue.submitted(),
            vec![
                QueueCommand::Signal { marker, value: 10 },
                QueueCommand::Signal { marker, value: 11 },
            ]
        );
    }

    #[test]
    #[should_panic(expected = "is not greater than current value")]
    fn test_non_increasing_signal_panics() {
        let (_device, _queue, mut fence) = deferred_fence();
        fence.signal(FenceValue::Exact(4)).unwrap();
        let _ = fence.signal(FenceValue::Exact(4));
    }

    #[test]
    fn test_non_increasing_signal_error_mode() {
        let device = DummyDevice::new();
        let queue = device.create_queue(ExecutionMode::Deferred);
        let descriptor = FenceDescriptor::new().with_ordering_check(OrderingCheck::Error);
        let mut fence = Fence::<DummyBackend>::with_descriptor(queue.clone(), &descriptor).unwrap();

        fence.signal(FenceValue::Exact(4)).unwrap();
        assert_eq!(
            fence.signal(FenceValue::Exact(2)),
            Err(SyncError::NonMonotonicSignal {
                current: 4,
                requested: 2
            })
        );
        assert_eq!(fence.current_value(), 4);
        // The rejected value never reached the queue.
        assert_eq!(queue.submitted().len(), 1);
    }

    #[test]
    fn test_cpu_wait_fast_path_does_not_block() {
        let device = DummyDevice::new();
        let queue = device.create_queue(ExecutionMode::Immediate);
        let mut fence = Fence::<DummyBackend>::new(queue).unwrap();

        fence.signal(FenceValue::Auto).unwrap();
        fence.signal(FenceValue::Auto).unwrap();
        fence.cpu_wait(FenceValue::Exact(1)).unwrap();
        fence.cpu_wait(FenceValue::Auto).unwrap();
        fence.cpu_wait(FenceValue::Exact(0)).unwrap();
        assert_eq!(device.stats().blocking_waits, 0);
    }

    #[test]
    fn test_cpu_wait_blocks_until_reached() {
        let (device, queue, mut fence) = deferred_fence();
        fence.signal(FenceValue::Auto).unwrap();
        fence.signal(FenceValue::Auto).unwrap();

        let consumer = queue.clone();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            consumer.execute_next();
            std::thread::sleep(Duration::from_millis(20));
            consumer.execute_next();
        });

        fence.cpu_wait(FenceValue::Exact(2)).unwrap();
        assert_eq!(fence.completed_value().unwrap(), 2);
        assert_eq!(device.stats().blocking_waits, 1);
        handle.join().unwrap();
    }

    #[test]
    fn test_flush_drains_queue() {
        let device = DummyDevice::new();
        let queue = device.create_queue(ExecutionMode::Immediate);
        let mut fence = Fence::<DummyBackend>::new(queue.clone()).unwrap();

        queue.submit_work("draw").unwrap();
        assert_eq!(fence.flush_gpu_queue().unwrap(), 1);
        assert_eq!(fence.completed_value().unwrap(), 1);
        assert_eq!(queue.pending_len(), 0);
    }

    #[test]
    fn test_gpu_wait_records_on_own_queue() {
        let (device, queue, mut fence) = deferred_fence();
        fence.signal(FenceValue::Auto).unwrap();
        fence.gpu_wait(FenceValue::Auto).unwrap();
        fence.gpu_wait(FenceValue::Exact(7)).unwrap();

        let marker = fence.marker().id();
        assert_eq!(
            queue.submitted()[1..],
            [
                QueueCommand::Wait { marker, value: 1 },
                QueueCommand::Wait { marker, value: 7 },
            ]
        );
        assert_eq!(device.stats().blocking_waits, 0);
    }

    #[test]
    fn test_construction_failure_releases_marker() {
        let device = DummyDevice::new();
        let queue = device.create_queue(ExecutionMode::Immediate);
        device.fail_event_creation(true);

        let result = Fence::<DummyBackend>::new(queue);
        assert!(matches!(result, Err(SyncError::ResourceCreationFailed(_))));

        let stats = device.stats();
        assert_eq!(stats.markers_created, 1);
        assert_eq!(stats.live_markers(), 0);
        assert_eq!(stats.events_created, 0);
    }

    #[test]
    fn test_auto_signal_past_max_is_rejected() {
        let device = DummyDevice::new();
        let queue = device.create_queue(ExecutionMode::Immediate);
        let mut fence = Fence::<DummyBackend>::new(queue.clone()).unwrap();

        assert_eq!(fence.signal(FenceValue::Exact(u64::MAX)).unwrap(), u64::MAX);
        assert_eq!(queue.submitted().len(), 1);

        assert!(matches!(
            fence.signal(FenceValue::Auto),
            Err(SyncError::InvalidParameter(_))
        ));
        assert!(matches!(
            fence.flush_gpu_queue(),
            Err(SyncError::InvalidParameter(_))
        ));
        assert_eq!(fence.current_value(), u64::MAX);
        // Nothing reached the queue after the explicit signal.
        assert_eq!(queue.submitted().len(), 1);
        assert_eq!(device.stats().blocking_waits, 0);
    }

    #[test]
    fn test_device_lost_propagates() {
        let (device, _queue, mut fence) = deferred_fence();
        device.remove();
        assert_eq!(fence.signal(FenceValue::Auto), Err(SyncError::DeviceLost));
        assert_eq!(fence.current_value(), 0);
        assert_eq!(fence.flush_gpu_queue(), Err(SyncError::DeviceLost));
    }
}
