//! GPU backend abstraction layer.
//!
//! A fence only needs four things from the graphics API underneath it. Each is
//! a trait here so the same [`Fence`](crate::Fence) logic runs on top of any
//! backend:
//!
//! - [`CommandQueue`]: reports its owning device and accepts "signal marker to
//!   V" and "wait until marker reaches V" instructions
//! - [`Device`]: creates markers and completion events
//! - [`TimelineMarker`]: a monotonic 64-bit counter advanced by the queue
//! - [`CompletionEvent`]: an auto-reset object the host thread can block on
//!
//! # Available Backends
//!
//! - `dummy` (always available): in-process simulated queue for testing
//! - `vulkan-backend`: timeline semaphores via ash
//! - `d3d12-backend`: `ID3D12Fence` via the windows crate (Windows only)

pub mod dummy;

#[cfg(feature = "vulkan-backend")]
pub mod vulkan;

#[cfg(all(windows, feature = "d3d12-backend"))]
pub mod d3d12;

use crate::error::SyncResult;

/// Set of types a backend provides to the fence layer.
pub trait GpuBackend: Sized + 'static {
    /// Command queue that executes signal and wait instructions.
    type Queue: CommandQueue<Self>;
    /// Device owning queues and markers.
    type Device: Device<Self>;
    /// Hardware timeline marker.
    type Marker: TimelineMarker<Self>;
    /// Host-waitable completion event.
    type Event: CompletionEvent;

    /// Get the backend name.
    fn name() -> &'static str;
}

/// A queue of GPU instructions executed in submission order.
pub trait CommandQueue<B: GpuBackend> {
    /// Get the device that owns this queue.
    fn device(&self) -> SyncResult<B::Device>;

    /// Enqueue an instruction that sets `marker` to `value` once the queue
    /// reaches it. Must not block the calling thread.
    fn signal(&self, marker: &B::Marker, value: u64) -> SyncResult<()>;

    /// Enqueue an instruction that stalls this queue until `marker` reaches
    /// `value`. Work submitted to the queue afterwards, including later
    /// signals, must not start before that. Must not block the calling thread.
    fn wait(&self, marker: &B::Marker, value: u64) -> SyncResult<()>;
}

/// Factory for fence resources.
pub trait Device<B: GpuBackend> {
    /// Create a timeline marker starting at `initial_value`.
    fn create_marker(&self, initial_value: u64) -> SyncResult<B::Marker>;

    /// Create an unset, auto-reset completion event.
    fn create_event(&self) -> SyncResult<B::Event>;
}

/// Monotonic counter advanced by GPU queues.
pub trait TimelineMarker<B: GpuBackend> {
    /// Highest value the GPU has confirmed reaching.
    fn completed_value(&self) -> SyncResult<u64>;

    /// Arm `event` to fire once this marker reaches `value`.
    ///
    /// Fires immediately if the value has already been reached.
    fn notify_on_completion(&self, value: u64, event: &B::Event) -> SyncResult<()>;
}

/// Auto-reset event the host thread can block on.
pub trait CompletionEvent {
    /// Block the calling thread until the event fires, then reset it.
    ///
    /// There is no timeout.
    fn wait(&self) -> SyncResult<()>;
}
