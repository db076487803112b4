//! # RedLilium Sync
//!
//! CPU/GPU synchronization for RedLilium: monotonic fences shared between the
//! submitting thread and a GPU command queue.
//!
//! ## Overview
//!
//! This crate provides:
//! - [`Fence`] - 64-bit counter signaled by a queue, with host and queue waits
//! - [`LinearFence`] - Ring of fence values bounding the batches in flight
//! - [`backend`] - Traits for queue, device, marker and completion event
//! - Multiple backend support: Vulkan, D3D12, and Dummy (for testing)
//!
//! ## Example
//!
//! ```
//! use redlilium_sync::backend::dummy::{DummyDevice, ExecutionMode};
//! use redlilium_sync::{DummyBackend, LinearFence};
//!
//! let device = DummyDevice::new();
//! let queue = device.create_queue(ExecutionMode::Immediate);
//! let mut frames = LinearFence::<DummyBackend>::new(queue.clone(), 2).unwrap();
//!
//! for _ in 0..4 {
//!     queue.submit_work("frame").unwrap();
//!     frames.next().unwrap();
//! }
//!
//! frames.wait_idle().unwrap();
//! assert_eq!(frames.completed_value().unwrap(), 5);
//! ```

pub mod backend;
pub mod descriptor;
pub mod error;
pub mod fence;
pub mod linear;
pub mod profiling;
pub mod value;

// Re-export main types for convenience
pub use backend::dummy::DummyBackend;
pub use backend::{CommandQueue, CompletionEvent, Device, GpuBackend, TimelineMarker};
pub use descriptor::{FenceDescriptor, LinearFenceDescriptor, OrderingCheck};
pub use error::{SyncError, SyncResult};
pub use fence::{Fence, gpu_wait_on};
pub use linear::LinearFence;
pub use value::FenceValue;

#[cfg(feature = "vulkan-backend")]
pub use backend::vulkan::VulkanBackend;

#[cfg(all(windows, feature = "d3d12-backend"))]
pub use backend::d3d12::D3D12Backend;

/// Sync library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Initialize the sync subsystem.
pub fn init() {
    log::info!("RedLilium Sync v{} initialized", VERSION);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn test_dummy_backend() {
        assert_eq!(DummyBackend::name(), "Dummy");
    }
}
