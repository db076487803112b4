//! Bounded-depth fence.
//!
//! [`LinearFence`] keeps the last N signaled values in a ring and refuses to
//! run more than N batches ahead of the GPU. Each [`next`](LinearFence::next)
//! call retires the ring slot it is about to reuse, blocking if the GPU hasn't
//! reached the value stored there yet.
//!
//! ```text
//! depth = 2
//!
//! Slot 0: [1] ──► [3] ──► [5] ──►
//! Slot 1: [2] ──► [4] ──► [6] ──►
//!
//! next() #3 reuses slot 0 and waits for 1 before signaling 3.
//! ```
//!
//! Per-slot resources (command allocators, upload arenas) can be indexed by
//! [`slot`](LinearFence::slot) read before calling `next()`: once `next()`
//! returns, the GPU is done with whatever the slot held N calls ago.

use std::sync::Arc;

use crate::backend::GpuBackend;
use crate::descriptor::LinearFenceDescriptor;
use crate::error::{SyncError, SyncResult};
use crate::fence::Fence;
use crate::value::FenceValue;

/// Fence that bounds the number of batches in flight.
///
/// # Example
///
/// ```ignore
/// let mut frames = LinearFence::<DummyBackend>::new(queue.clone(), 2)?;
///
/// loop {
///     let slot = frames.slot();
///     record_frame(&mut allocators[slot]);
///     queue.submit_work("frame")?;
///     frames.next()?; // blocks if the GPU is two frames behind
/// }
///
/// frames.wait_idle()?;
/// ```
///
/// # Thread Safety
///
/// Like [`Fence`], advancing requires `&mut self` and the ring should be owned
/// by the submitting thread.
pub struct LinearFence<B: GpuBackend> {
    fence: Fence<B>,
    /// Value signaled into each slot. `None` if the slot hasn't been used yet.
    history: Box<[Option<u64>]>,
    /// Slot the next `next()` call reuses.
    cursor: usize,
}

impl<B: GpuBackend> LinearFence<B> {
    /// Create a ring of `depth` slots on `queue`.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::InvalidParameter`] if `depth` is 0, or any error
    /// from creating the underlying [`Fence`].
    pub fn new(queue: Arc<B::Queue>, depth: usize) -> SyncResult<Self> {
        Self::with_descriptor(queue, &LinearFenceDescriptor::new(depth))
    }

    /// Create a ring from a descriptor.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::InvalidParameter`] if the depth is 0, or any error
    /// from creating the underlying [`Fence`].
    pub fn with_descriptor(
        queue: Arc<B::Queue>,
        descriptor: &LinearFenceDescriptor,
    ) -> SyncResult<Self> {
        if descriptor.depth == 0 {
            return Err(SyncError::InvalidParameter(
                "linear fence depth must be at least 1".to_string(),
            ));
        }

        let fence = Fence::with_descriptor(queue, &descriptor.fence)?;
        log::debug!(
            "Created linear fence {:?} with depth {}",
            fence.label(),
            descriptor.depth
        );

        Ok(Self {
            fence,
            history: vec![None; descriptor.depth].into_boxed_slice(),
            cursor: 0,
        })
    }

    /// Advance to the next batch.
    ///
    /// Blocks until the GPU has reached the value signaled `depth` calls ago,
    /// then signals a new value into the freed slot and moves to the next
    /// slot. The first `depth` calls never block.
    ///
    /// Returns the newly signaled value.
    pub fn next(&mut self) -> SyncResult<u64> {
        if let Some(retired) = self.history[self.cursor] {
            if !self.fence.is_complete(retired)? {
                log::debug!(
                    "Linear fence {:?}: slot {} still busy, waiting for {}",
                    self.fence.label(),
                    self.cursor,
                    retired
                );
            }
            self.fence.cpu_wait(FenceValue::Exact(retired))?;
        }

        let value = self.fence.signal(FenceValue::Auto)?;
        self.history[self.cursor] = Some(value);
        log::trace!(
            "Linear fence {:?}: slot {} holds {}",
            self.fence.label(),
            self.cursor,
            value
        );
        self.cursor = (self.cursor + 1) % self.history.len();

        crate::plot_in_flight!("batches in flight", self.in_flight().unwrap_or(0));
        Ok(value)
    }

    /// Get the number of ring slots.
    pub fn depth(&self) -> usize {
        self.history.len()
    }

    /// Get the slot the next [`next`](Self::next) call retires and reuses.
    ///
    /// Returns a value from 0 to `depth - 1`.
    pub fn slot(&self) -> usize {
        self.cursor
    }

    /// Number of ring values signaled but not yet reached by the GPU.
    ///
    /// Never exceeds [`depth`](Self::depth).
    pub fn in_flight(&self) -> SyncResult<usize> {
        let completed = self.fence.completed_value()?;
        Ok(self
            .history
            .iter()
            .flatten()
            .filter(|&&value| value > completed)
            .count())
    }

    /// Check if a slot can be reused without blocking.
    ///
    /// Returns `true` if the slot's value was reached or the slot hasn't been
    /// used yet.
    ///
    /// # Panics
    ///
    /// Panics if `slot` is not less than [`depth`](Self::depth).
    pub fn is_slot_ready(&self, slot: usize) -> SyncResult<bool> {
        assert!(slot < self.history.len(), "Invalid slot index");

        match self.history[slot] {
            Some(value) => self.fence.is_complete(value),
            None => Ok(true),
        }
    }

    /// Get the underlying fence.
    pub fn fence(&self) -> &Fence<B> {
        &self.fence
    }

    /// Signal a value outside the ring. See [`Fence::signal`].
    ///
    /// The value is not tracked by a slot, but later `next()` calls continue
    /// from it.
    pub fn signal(&mut self, value: FenceValue) -> SyncResult<u64> {
        self.fence.signal(value)
    }

    /// Make the fence's queue wait for `value`. See [`Fence::gpu_wait`].
    pub fn gpu_wait(&self, value: FenceValue) -> SyncResult<()> {
        self.fence.gpu_wait(value)
    }

    /// Signal and block until the GPU drains. See [`Fence::flush_gpu_queue`].
    pub fn flush_gpu_queue(&mut self) -> SyncResult<u64> {
        self.fence.flush_gpu_queue()
    }

    /// Wait for all in-flight work to complete.
    ///
    /// Call this before destroying resources the ring protects.
    pub fn wait_idle(&mut self) -> SyncResult<()> {
        log::trace!(
            "Linear fence {:?}: waiting for GPU idle ({} slots)",
            self.fence.label(),
            self.history.len()
        );
        self.fence.flush_gpu_queue().map(|_| ())
    }

    /// Last value signaled from the host.
    pub fn current_value(&self) -> u64 {
        self.fence.current_value()
    }

    /// Highest value the GPU has reached.
    pub fn completed_value(&self) -> SyncResult<u64> {
        self.fence.completed_value()
    }
}

impl<B: GpuBackend> std::fmt::Debug for LinearFence<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LinearFence")
            .field("fence", &self.fence)
            .field("history", &self.history)
            .field("cursor", &self.cursor)
            .finish()
    }
}

static_assertions::assert_impl_all!(LinearFence<crate::backend::dummy::DummyBackend>: Send, Sync);

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::backend::dummy::{DummyBackend, DummyDevice, ExecutionMode};

    #[test]
    fn test_zero_depth_rejected() {
        let device = DummyDevice::new();
        let queue = device.create_queue(ExecutionMode::Immediate);
        let result = LinearFence::<DummyBackend>::new(queue, 0);
        assert!(matches!(result, Err(SyncError::InvalidParameter(_))));
        // Rejected before any resource was created.
        assert_eq!(device.stats().markers_created, 0);
    }

    #[test]
    fn test_new() {
        let device = DummyDevice::new();
        let queue = device.create_queue(ExecutionMode::Immediate);
        let ring = LinearFence::<DummyBackend>::new(queue, 3).unwrap();
        assert_eq!(ring.depth(), 3);
        assert_eq!(ring.slot(), 0);
        assert_eq!(ring.current_value(), 0);
        assert_eq!(ring.in_flight().unwrap(), 0);
    }

    #[test]
    fn test_slot_wraps() {
        let device = DummyDevice::new();
        let queue = device.create_queue(ExecutionMode::Immediate);
        let mut ring = LinearFence::<DummyBackend>::new(queue, 3).unwrap();

        let mut slots = Vec::new();
        for _ in 0..7 {
            slots.push(ring.slot());
            ring.next().unwrap();
        }
        assert_eq!(slots, vec![0, 1, 2, 0, 1, 2, 0]);
        assert_eq!(ring.current_value(), 7);
        assert_eq!(device.stats().blocking_waits, 0);
    }

    #[test]
    fn test_first_depth_calls_do_not_block() {
        let device = DummyDevice::new();
        let queue = device.create_queue(ExecutionMode::Deferred);
        let mut ring = LinearFence::<DummyBackend>::new(queue.clone(), 3).unwrap();

        assert_eq!(ring.next().unwrap(), 1);
        assert_eq!(ring.next().unwrap(), 2);
        assert_eq!(ring.next().unwrap(), 3);
        assert_eq!(ring.in_flight().unwrap(), 3);
        assert_eq!(ring.completed_value().unwrap(), 0);
        assert_eq!(device.stats().blocking_waits, 0);

        assert!(!ring.is_slot_ready(0).unwrap());
        queue.execute_next();
        assert!(ring.is_slot_ready(0).unwrap());
        assert_eq!(ring.in_flight().unwrap(), 2);

        // Slot 0 is free now, so this call doesn't block either.
        assert_eq!(ring.next().unwrap(), 4);
        assert_eq!(device.stats().blocking_waits, 0);
    }

    #[test]
    fn test_next_blocks_on_oldest_value() {
        let device = DummyDevice::new();
        let queue = device.create_queue(ExecutionMode::Deferred);
        let mut ring = LinearFence::<DummyBackend>::new(queue.clone(), 2).unwrap();

        assert_eq!(ring.next().unwrap(), 1);
        assert_eq!(ring.next().unwrap(), 2);

        let consumer = queue.clone();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(30));
            consumer.execute_next();
        });

        assert_eq!(ring.next().unwrap(), 3);
        handle.join().unwrap();

        assert_eq!(ring.completed_value().unwrap(), 1);
        assert_eq!(device.stats().blocking_waits, 1);
        assert_eq!(ring.in_flight().unwrap(), 2);
    }

    #[test]
    fn test_in_flight_never_exceeds_depth() {
        let device = DummyDevice::new();
        let queue = device.create_queue(ExecutionMode::Deferred);
        let mut ring = LinearFence::<DummyBackend>::new(queue.clone(), 2).unwrap();

        let consumer = queue.clone();
        let handle = std::thread::spawn(move || {
            let mut executed = 0;
            while executed < 10 {
                if let crate::backend::dummy::StepOutcome::Executed(_) = consumer.execute_next() {
                    executed += 1;
                } else {
                    std::thread::sleep(Duration::from_millis(1));
                }
            }
        });

        for expected in 1..=10 {
            assert_eq!(ring.next().unwrap(), expected);
            assert!(ring.in_flight().unwrap() <= ring.depth());
        }
        handle.join().unwrap();
        assert_eq!(ring.completed_value().unwrap(), 10);
        assert_eq!(ring.in_flight().unwrap(), 0);
    }

    #[test]
    fn test_wait_idle_drains() {
        let device = DummyDevice::new();
        let queue = device.create_queue(ExecutionMode::Immediate);
        let mut ring = LinearFence::<DummyBackend>::new(queue, 2).unwrap();

        ring.next().unwrap();
        ring.next().unwrap();
        ring.wait_idle().unwrap();
        assert_eq!(ring.current_value(), 3);
        assert_eq!(ring.completed_value().unwrap(), 3);
        assert!(ring.is_slot_ready(0).unwrap());
        assert!(ring.is_slot_ready(1).unwrap());
    }

    #[test]
    fn test_next_continues_after_explicit_signal() {
        let device = DummyDevice::new();
        let queue = device.create_queue(ExecutionMode::Immediate);
        let mut ring = LinearFence::<DummyBackend>::new(queue, 2).unwrap();

        ring.signal(FenceValue::Exact(10)).unwrap();
        assert_eq!(ring.next().unwrap(), 11);
    }

    #[test]
    fn test_next_past_max_leaves_ring_unchanged() {
        let device = DummyDevice::new();
        let queue = device.create_queue(ExecutionMode::Immediate);
        let mut ring = LinearFence::<DummyBackend>::new(queue.clone(), 2).unwrap();

        assert_eq!(ring.next().unwrap(), 1);
        ring.signal(FenceValue::Exact(u64::MAX)).unwrap();
        let submitted = queue.submitted().len();

        assert!(matches!(ring.next(), Err(SyncError::InvalidParameter(_))));
        assert!(matches!(
            ring.flush_gpu_queue(),
            Err(SyncError::InvalidParameter(_))
        ));
        assert!(matches!(ring.wait_idle(), Err(SyncError::InvalidParameter(_))));

        assert_eq!(ring.current_value(), u64::MAX);
        assert_eq!(ring.slot(), 1);
        assert_eq!(ring.history.as_ref(), &[Some(1), None]);
        assert_eq!(queue.submitted().len(), submitted);
    }

    #[test]
    #[should_panic(expected = "Invalid slot index")]
    fn test_is_slot_ready_out_of_range() {
        let device = DummyDevice::new();
        let queue = device.create_queue(ExecutionMode::Immediate);
        let ring = LinearFence::<DummyBackend>::new(queue, 2).unwrap();
        let _ = ring.is_slot_ready(2);
    }
}
