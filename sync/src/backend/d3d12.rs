//! Direct3D 12 backend via the windows crate.
//!
//! Markers are `ID3D12Fence` objects and the completion event is a Win32
//! auto-reset event armed with `SetEventOnCompletion`. Devices and queues are
//! created by the renderer and handed over as COM pointers.

use windows::Win32::Foundation::{CloseHandle, E_OUTOFMEMORY, HANDLE, WAIT_OBJECT_0};
use windows::Win32::Graphics::Direct3D12::{
    ID3D12CommandQueue, ID3D12Device, ID3D12Fence, D3D12_FENCE_FLAG_NONE,
};
use windows::Win32::Graphics::Dxgi::{
    DXGI_ERROR_DEVICE_HUNG, DXGI_ERROR_DEVICE_REMOVED, DXGI_ERROR_DEVICE_RESET,
};
use windows::Win32::System::Threading::{CreateEventW, WaitForSingleObjectEx, INFINITE};
use windows::core::PCWSTR;

use crate::error::{SyncError, SyncResult};

use super::{CommandQueue, CompletionEvent, Device, GpuBackend, TimelineMarker};

/// Direct3D 12 GPU backend.
#[derive(Debug)]
pub enum D3D12Backend {}

impl GpuBackend for D3D12Backend {
    type Queue = D3D12Queue;
    type Device = D3D12Device;
    type Marker = D3D12Marker;
    type Event = D3D12Event;

    fn name() -> &'static str {
        "D3D12"
    }
}

/// Convert a failed D3D12 call into a [`SyncError`].
fn convert_error(context: &str, error: windows::core::Error) -> SyncError {
    let code = error.code();
    if code == DXGI_ERROR_DEVICE_REMOVED
        || code == DXGI_ERROR_DEVICE_RESET
        || code == DXGI_ERROR_DEVICE_HUNG
    {
        SyncError::DeviceLost
    } else if code == E_OUTOFMEMORY {
        SyncError::OutOfMemory
    } else {
        SyncError::Backend(format!("{}: {}", context, error))
    }
}

/// Reject values a fence cannot report as completed.
///
/// A removed device reports every fence at `u64::MAX`, so a fence that reached
/// that value would read as device loss.
fn check_signal_value(value: u64) -> SyncResult<()> {
    if value == u64::MAX {
        return Err(SyncError::InvalidParameter(
            "u64::MAX is reserved for device removal".to_string(),
        ));
    }
    Ok(())
}

/// Direct3D 12 device wrapper.
#[derive(Clone)]
pub struct D3D12Device {
    device: ID3D12Device,
}

impl D3D12Device {
    /// Wrap an existing device.
    pub fn new(device: ID3D12Device) -> Self {
        Self { device }
    }

    /// Get the underlying device.
    pub fn raw(&self) -> &ID3D12Device {
        &self.device
    }
}

impl Device<D3D12Backend> for D3D12Device {
    fn create_marker(&self, initial_value: u64) -> SyncResult<D3D12Marker> {
        let fence: ID3D12Fence =
            unsafe { self.device.CreateFence(initial_value, D3D12_FENCE_FLAG_NONE) }.map_err(
                |e| match convert_error("Failed to create fence", e) {
                    SyncError::Backend(message) => SyncError::ResourceCreationFailed(message),
                    error => error,
                },
            )?;

        log::trace!("D3D12Backend: created fence (initial value: {})", initial_value);
        Ok(D3D12Marker { fence })
    }

    fn create_event(&self) -> SyncResult<D3D12Event> {
        let handle = unsafe { CreateEventW(None, false, false, PCWSTR::null()) }.map_err(|e| {
            SyncError::ResourceCreationFailed(format!("Failed to create event: {}", e))
        })?;
        Ok(D3D12Event { handle })
    }
}

/// Direct3D 12 command queue wrapper.
pub struct D3D12Queue {
    queue: ID3D12CommandQueue,
}

impl D3D12Queue {
    /// Wrap an existing command queue.
    pub fn new(queue: ID3D12CommandQueue) -> Self {
        Self { queue }
    }

    /// Get the underlying command queue.
    pub fn raw(&self) -> &ID3D12CommandQueue {
        &self.queue
    }
}

impl CommandQueue<D3D12Backend> for D3D12Queue {
    fn device(&self) -> SyncResult<D3D12Device> {
        let mut device: Option<ID3D12Device> = None;
        unsafe { self.queue.GetDevice(&mut device) }
            .map_err(|e| convert_error("Failed to query queue device", e))?;
        device
            .map(D3D12Device::new)
            .ok_or_else(|| SyncError::Backend("queue returned no device".to_string()))
    }

    fn signal(&self, marker: &D3D12Marker, value: u64) -> SyncResult<()> {
        check_signal_value(value)?;
        unsafe { self.queue.Signal(&marker.fence, value) }
            .map_err(|e| convert_error("Failed to signal fence", e))?;
        log::trace!("D3D12Backend: signal to {}", value);
        Ok(())
    }

    fn wait(&self, marker: &D3D12Marker, value: u64) -> SyncResult<()> {
        unsafe { self.queue.Wait(&marker.fence, value) }
            .map_err(|e| convert_error("Failed to wait for fence", e))?;
        log::trace!("D3D12Backend: wait for {}", value);
        Ok(())
    }
}

/// `ID3D12Fence` marker.
pub struct D3D12Marker {
    fence: ID3D12Fence,
}

impl D3D12Marker {
    /// Get the underlying fence.
    pub fn raw(&self) -> &ID3D12Fence {
        &self.fence
    }
}

impl TimelineMarker<D3D12Backend> for D3D12Marker {
    fn completed_value(&self) -> SyncResult<u64> {
        // A removed device reports every fence as complete with all bits set.
        let value = unsafe { self.fence.GetCompletedValue() };
        if value == u64::MAX {
            return Err(SyncError::DeviceLost);
        }
        Ok(value)
    }

    fn notify_on_completion(&self, value: u64, event: &D3D12Event) -> SyncResult<()> {
        unsafe { self.fence.SetEventOnCompletion(value, event.handle) }
            .map_err(|e| convert_error("Failed to arm completion event", e))
    }
}

/// Win32 auto-reset event.
pub struct D3D12Event {
    handle: HANDLE,
}

impl CompletionEvent for D3D12Event {
    fn wait(&self) -> SyncResult<()> {
        let result = unsafe { WaitForSingleObjectEx(self.handle, INFINITE, false) };
        if result != WAIT_OBJECT_0 {
            return Err(SyncError::Backend(format!(
                "WaitForSingleObjectEx returned {:?}",
                result
            )));
        }
        Ok(())
    }
}

impl Drop for D3D12Event {
    fn drop(&mut self) {
        let _ = unsafe { CloseHandle(self.handle) };
    }
}

// SAFETY: D3D12 devices, queues and fences are free-threaded, and a Win32 event
// handle may be waited on and closed from any thread.
unsafe impl Send for D3D12Device {}
unsafe impl Sync for D3D12Device {}
unsafe impl Send for D3D12Queue {}
unsafe impl Sync for D3D12Queue {}
unsafe impl Send for D3D12Marker {}
unsafe impl Sync for D3D12Marker {}
unsafe impl Send for D3D12Event {}
unsafe impl Sync for D3D12Event {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_max_value_rejected() {
        assert!(check_signal_value(0).is_ok());
        assert!(check_signal_value(u64::MAX - 1).is_ok());
        assert!(matches!(
            check_signal_value(u64::MAX),
            Err(SyncError::InvalidParameter(_))
        ));
    }

    #[test]
    fn test_convert_error() {
        assert_eq!(
            convert_error("signal", DXGI_ERROR_DEVICE_REMOVED.into()),
            SyncError::DeviceLost
        );
        assert_eq!(
            convert_error("signal", E_OUTOFMEMORY.into()),
            SyncError::OutOfMemory
        );
        assert!(matches!(
            convert_error("signal", windows::Win32::Foundation::E_INVALIDARG.into()),
            SyncError::Backend(message) if message.starts_with("signal: ")
        ));
    }
}
