use std::fmt;

/// Failure codes returned by every fallible entry point.
///
/// Success is `Ok(..)`; nothing in the crate panics on these conditions and
/// nothing retries on the caller's behalf.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GpuError {
    /// The object (command buffer recording, pipeline, mapping) is already set up.
    AlreadyInitialised,
    /// A prerequisite is missing: no layout, no recording in progress, nothing to submit.
    NotInitialised,
    /// Bad or incomplete creation parameters, shader compile or link failure.
    InvalidData,
    /// The backend or API level does not provide the requested capability.
    UnsupportedRequest,
    /// A native call failed for a reason that has no better classification.
    UnknownError,
    /// A handle or parameter was invalid: released resource, stale pipeline handle.
    InvalidArgument,
}

impl GpuError {
    pub fn as_str(&self) -> &'static str {
        match self {
            GpuError::AlreadyInitialised => "AlreadyInitialised",
            GpuError::NotInitialised => "NotInitialised",
            GpuError::InvalidData => "InvalidData",
            GpuError::UnsupportedRequest => "UnsupportedRequest",
            GpuError::UnknownError => "UnknownError",
            GpuError::InvalidArgument => "InvalidArgument",
        }
    }
}

impl fmt::Display for GpuError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "GPU error: {}", self.as_str())
    }
}

impl std::error::Error for GpuError {}

/// Convenient crate-wide result type.
pub type Result<T, E = GpuError> = std::result::Result<T, E>;

#[cfg(feature = "pipestate-vulkan")]
impl From<ash::vk::Result> for GpuError {
    fn from(res: ash::vk::Result) -> Self {
        use ash::vk;
        log::error!("Vulkan call failed: {}", res);
        match res {
            vk::Result::ERROR_INITIALIZATION_FAILED => GpuError::NotInitialised,
            vk::Result::ERROR_FEATURE_NOT_PRESENT
            | vk::Result::ERROR_EXTENSION_NOT_PRESENT
            | vk::Result::ERROR_LAYER_NOT_PRESENT
            | vk::Result::ERROR_INCOMPATIBLE_DRIVER
            | vk::Result::ERROR_FORMAT_NOT_SUPPORTED => GpuError::UnsupportedRequest,
            _ => GpuError::UnknownError,
        }
    }
}

#[cfg(feature = "pipestate-vulkan")]
impl From<ash::LoadingError> for GpuError {
    fn from(res: ash::LoadingError) -> Self {
        log::error!("unable to load the Vulkan library: {}", res);
        GpuError::UnsupportedRequest
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_names_the_code() {
        assert_eq!(
            GpuError::InvalidData.to_string(),
            "GPU error: InvalidData"
        );
    }

    #[cfg(feature = "pipestate-vulkan")]
    #[test]
    fn vulkan_results_map_onto_taxonomy() {
        use ash::vk;
        assert_eq!(
            GpuError::from(vk::Result::ERROR_FEATURE_NOT_PRESENT),
            GpuError::UnsupportedRequest
        );
        assert_eq!(
            GpuError::from(vk::Result::ERROR_DEVICE_LOST),
            GpuError::UnknownError
        );
    }
}
