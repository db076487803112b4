//! Conversion of Vulkan results into sync errors.

use ash::vk;

use crate::error::SyncError;

/// Convert a failed Vulkan call into a [`SyncError`].
///
/// `context` names the operation and ends up in the message of errors that
/// have no dedicated variant.
pub(crate) fn convert_result(context: &str, result: vk::Result) -> SyncError {
    match result {
        vk::Result::ERROR_DEVICE_LOST => SyncError::DeviceLost,
        vk::Result::ERROR_OUT_OF_HOST_MEMORY | vk::Result::ERROR_OUT_OF_DEVICE_MEMORY => {
            SyncError::OutOfMemory
        }
        other => SyncError::Backend(format!("{}: {:?}", context, other)),
    }
}

/// Like [`convert_result`], but reports unclassified failures as
/// [`SyncError::ResourceCreationFailed`].
pub(crate) fn convert_creation_result(context: &str, result: vk::Result) -> SyncError {
    match convert_result(context, result) {
        SyncError::Backend(message) => SyncError::ResourceCreationFailed(message),
        error => error,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_lost() {
        assert_eq!(
            convert_result("submit", vk::Result::ERROR_DEVICE_LOST),
            SyncError::DeviceLost
        );
    }

    #[test]
    fn test_out_of_memory() {
        assert_eq!(
            convert_result("submit", vk::Result::ERROR_OUT_OF_HOST_MEMORY),
            SyncError::OutOfMemory
        );
        assert_eq!(
            convert_creation_result("semaphore", vk::Result::ERROR_OUT_OF_DEVICE_MEMORY),
            SyncError::OutOfMemory
        );
    }

    #[test]
    fn test_other_errors_keep_context() {
        assert_eq!(
            convert_result("wait", vk::Result::TIMEOUT),
            SyncError::Backend("wait: TIMEOUT".to_string())
        );
        assert_eq!(
            convert_creation_result("semaphore", vk::Result::ERROR_INITIALIZATION_FAILED),
            SyncError::ResourceCreationFailed(
                "semaphore: ERROR_INITIALIZATION_FAILED".to_string()
            )
        );
    }
}
