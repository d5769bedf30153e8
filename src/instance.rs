//! Headless instance creation.

use std::ffi::CStr;
use std::os::raw::c_char;

use arrayvec::ArrayVec;
use ash::vk;

use crate::Error;

// Validation layer plus the two debug extensions; nothing else is ever
// requested by the harness.
const MAX_ENABLED_NAMES: usize = 4;

/// An owned Vulkan instance, created without any presentation surface.
///
/// The instance is the root every other handle depends on; it is created
/// once and destroyed last.
pub struct Instance {
    // NOTE: the loader must outlive every API call made through `raw`, and
    // `drop` destroys `raw` before either field is released.
    raw: ash::Instance,
    entry: ash::Entry,
}

impl Instance {
    /// Creates an instance with the given layers and extensions enabled and
    /// shader-printf capture switched on.
    ///
    /// The printf feature rides the create-info extension chain rather than
    /// a separate call, so messages emitted by in-shader print statements
    /// reach the diagnostic channels from the first dispatch onward.
    pub fn create(
        entry: ash::Entry,
        app_name: &CStr,
        layers: &[&CStr],
        extensions: &[&CStr],
    ) -> Result<Instance, Error> {
        let app_info = vk::ApplicationInfo::builder()
            .application_name(app_name)
            .application_version(0)
            .engine_name(CStr::from_bytes_with_nul(b"\0").unwrap())
            .engine_version(0)
            .api_version(vk::API_VERSION_1_2);

        let enabled_features = [vk::ValidationFeatureEnableEXT::DEBUG_PRINTF];
        let mut validation_features =
            vk::ValidationFeaturesEXT::builder().enabled_validation_features(&enabled_features);

        let layer_ptrs: ArrayVec<*const c_char, MAX_ENABLED_NAMES> =
            layers.iter().map(|name| name.as_ptr()).collect();
        let extension_ptrs: ArrayVec<*const c_char, MAX_ENABLED_NAMES> =
            extensions.iter().map(|name| name.as_ptr()).collect();

        let create_info = vk::InstanceCreateInfo::builder()
            .application_info(&app_info)
            .enabled_layer_names(&layer_ptrs)
            .enabled_extension_names(&extension_ptrs)
            .push_next(&mut validation_features);

        // Safety: all pointers in the create-info chain outlive the call.
        let raw = unsafe { entry.create_instance(&create_info, None) }
            .map_err(|err| Error::vulkan("vkCreateInstance", err))?;

        log::info!("created headless instance with printf capture enabled");

        Ok(Instance { raw, entry })
    }

    pub fn handle(&self) -> &ash::Instance {
        &self.raw
    }

    pub fn raw_handle(&self) -> vk::Instance {
        self.raw.handle()
    }

    pub fn entry(&self) -> &ash::Entry {
        &self.entry
    }
}

impl Drop for Instance {
    fn drop(&mut self) {
        // Safety: the harness tears down all child objects before the
        // instance binding goes out of scope, and no allocation callbacks
        // were provided at creation.
        unsafe { self.raw.destroy_instance(None) };
    }
}
