#![deny(unsafe_op_in_unsafe_fn)]

//! Headless Vulkan compute-dispatch harness.
//!
//! The harness verifies that the validation layer and both debug extensions
//! are present, creates an instance with shader-printf capture enabled,
//! bridges the two asynchronous diagnostic channels into [`log`], selects a
//! compute-capable queue family, then runs each supplied SPIR-V module
//! through a single one-shot dispatch and tears everything down in reverse
//! creation order.

pub mod capability;
pub mod device;
pub mod diagnostics;
pub mod dispatch;
pub mod harness;
pub mod instance;
mod util;

use std::ffi::CStr;

use ash::vk;
use thiserror::Error;

pub use crate::device::{Device, QueueFamilySelection};
pub use crate::diagnostics::{DiagnosticsBridge, DiagnosticsFilter};
pub use crate::dispatch::{CommandResources, PipelineResources, GROUP_COUNT_X};
pub use crate::instance::Instance;

/// Instance layer hosting both diagnostic channels.
pub const LAYER_NAME_VALIDATION: &[u8] = b"VK_LAYER_KHRONOS_validation\0";

/// The layers the harness refuses to run without.
pub fn required_layers() -> [&'static CStr; 1] {
    [CStr::from_bytes_with_nul(LAYER_NAME_VALIDATION).unwrap()]
}

/// The instance extensions the harness refuses to run without: debug utils
/// feeds the severity-tagged channel, debug report the flag-tagged one.
pub fn required_extensions() -> [&'static CStr; 2] {
    [vk::ExtDebugUtilsFn::name(), vk::ExtDebugReportFn::name()]
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to load the Vulkan library: {0}")]
    Library(#[from] ash::LoadingError),

    #[error("required instance layers or extensions are unavailable")]
    MissingCapabilities,

    #[error("debug entry point {0} is not exposed by the instance")]
    MissingEntryPoint(&'static str),

    #[error("no compute-capable device")]
    NoComputeDevice,

    #[error("initialization failed: no queue family exposes compute")]
    NoComputeQueueFamily,

    #[error("{call} failed at {file}:{line}: {result}")]
    Vulkan {
        call: &'static str,
        result: vk::Result,
        file: &'static str,
        line: u32,
    },
}

impl Error {
    /// Wraps a failed driver call together with the source location of the
    /// wrapping site.
    #[track_caller]
    pub(crate) fn vulkan(call: &'static str, result: vk::Result) -> Error {
        let location = std::panic::Location::caller();

        Error::Vulkan {
            call,
            result,
            file: location.file(),
            line: location.line(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vulkan_error_names_call_and_location() {
        let err = Error::vulkan("vkCreateThing", vk::Result::ERROR_DEVICE_LOST);

        match err {
            Error::Vulkan {
                call, file, line, ..
            } => {
                assert_eq!(call, "vkCreateThing");
                assert!(file.ends_with("lib.rs"));
                assert_ne!(line, 0);
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn required_names_are_nul_terminated() {
        assert_eq!(
            required_layers()[0].to_bytes(),
            &b"VK_LAYER_KHRONOS_validation"[..]
        );
        assert_eq!(required_extensions().len(), 2);
    }
}
