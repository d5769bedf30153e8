//! Pre-flight capability checks.
//!
//! Both checks run before any privileged object is created; a missing name
//! means the harness never attempts partial setup.

use std::ffi::CStr;

use crate::util::fixed_cstr;

/// Returns true iff every name in `required` appears in `available`.
///
/// Matching is exact and case-sensitive; order does not matter. An empty
/// `required` set trivially passes.
fn contains_all(required: &[&CStr], available: &[&CStr]) -> bool {
    required.iter().all(|&name| {
        let found = available.contains(&name);
        if !found {
            log::warn!("Required name not found: {}", name.to_string_lossy());
        }
        found
    })
}

/// Checks that every requested instance layer is available.
pub fn verify_layers(entry: &ash::Entry, required: &[&CStr]) -> bool {
    if required.is_empty() {
        return true;
    }

    let properties = match entry.enumerate_instance_layer_properties() {
        Ok(properties) => properties,
        Err(err) => {
            log::error!("vkEnumerateInstanceLayerProperties failed: {}", err);
            return false;
        }
    };

    let available: Vec<&CStr> = properties
        .iter()
        .filter_map(|props| fixed_cstr(&props.layer_name))
        .collect();

    contains_all(required, &available)
}

/// Checks that every requested instance extension is available.
pub fn verify_extensions(entry: &ash::Entry, required: &[&CStr]) -> bool {
    if required.is_empty() {
        return true;
    }

    let properties = match entry.enumerate_instance_extension_properties(None) {
        Ok(properties) => properties,
        Err(err) => {
            log::error!("vkEnumerateInstanceExtensionProperties failed: {}", err);
            return false;
        }
    };

    let available: Vec<&CStr> = properties
        .iter()
        .filter_map(|props| fixed_cstr(&props.extension_name))
        .collect();

    contains_all(required, &available)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cstr(bytes: &'static [u8]) -> &'static CStr {
        CStr::from_bytes_with_nul(bytes).unwrap()
    }

    #[test]
    fn empty_request_trivially_passes() {
        assert!(contains_all(&[], &[]));
        assert!(contains_all(&[], &[cstr(b"VK_LAYER_KHRONOS_validation\0")]));
    }

    #[test]
    fn all_present_in_any_order() {
        let available = [cstr(b"b\0"), cstr(b"c\0"), cstr(b"a\0")];
        assert!(contains_all(&[cstr(b"a\0"), cstr(b"b\0")], &available));
    }

    #[test]
    fn one_missing_name_fails() {
        let available = [cstr(b"VK_EXT_debug_utils\0")];
        assert!(!contains_all(
            &[cstr(b"VK_EXT_debug_utils\0"), cstr(b"VK_EXT_debug_report\0")],
            &available,
        ));
    }

    #[test]
    fn match_is_case_sensitive() {
        let available = [cstr(b"vk_layer_khronos_validation\0")];
        assert!(!contains_all(
            &[cstr(b"VK_LAYER_KHRONOS_validation\0")],
            &available,
        ));
    }
}
