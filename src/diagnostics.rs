//! Bridges the driver's asynchronous diagnostic streams into [`log`].
//!
//! Two callbacks are registered against the instance: a debug-utils
//! messenger carrying severity-tagged messages and a debug-report callback
//! carrying flag-tagged ones. Shader printf output arrives on both. The
//! callbacks may be invoked by the driver on any thread, so they behave like
//! interrupt handlers: re-entrant, non-blocking, and limited to a single
//! synchronous log write.

use std::borrow::Cow;
use std::ffi::{CStr, CString};
use std::mem;
use std::os::raw::{c_char, c_void};
use std::ptr;

use ash::vk;

use crate::instance::Instance;
use crate::Error;

/// Controls which driver messages reach the log.
///
/// The mode is fixed at registration for the lifetime of the bridge.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum DiagnosticsFilter {
    /// Forward every message on both channels.
    ShowAll,
    /// Forward only messages originating from in-shader print statements.
    PrintfOnly,
}

type CreateMessengerFn = unsafe extern "system" fn(
    vk::Instance,
    *const vk::DebugUtilsMessengerCreateInfoEXT,
    *const vk::AllocationCallbacks,
    *mut vk::DebugUtilsMessengerEXT,
) -> vk::Result;

type DestroyMessengerFn = unsafe extern "system" fn(
    vk::Instance,
    vk::DebugUtilsMessengerEXT,
    *const vk::AllocationCallbacks,
);

type CreateReportFn = unsafe extern "system" fn(
    vk::Instance,
    *const vk::DebugReportCallbackCreateInfoEXT,
    *const vk::AllocationCallbacks,
    *mut vk::DebugReportCallbackEXT,
) -> vk::Result;

type DestroyReportFn = unsafe extern "system" fn(
    vk::Instance,
    vk::DebugReportCallbackEXT,
    *const vk::AllocationCallbacks,
);

/// Debug entry points resolved from the instance by name.
///
/// The loader only exposes these when `VK_EXT_debug_utils` and
/// `VK_EXT_debug_report` are enabled, so resolution doubles as capability
/// negotiation: a missing entry point is a typed initialization error, not a
/// null pointer waiting to be called.
pub struct DebugEntryPoints {
    create_messenger: CreateMessengerFn,
    destroy_messenger: DestroyMessengerFn,
    create_report: CreateReportFn,
    destroy_report: DestroyReportFn,
}

fn resolve_symbol(
    entry: &ash::Entry,
    instance: vk::Instance,
    name: &'static str,
) -> Result<unsafe extern "system" fn(), Error> {
    let symbol = CString::new(name).unwrap();

    // Safety: the instance handle is live for the duration of the call.
    let addr = unsafe { entry.get_instance_proc_addr(instance, symbol.as_ptr()) };

    addr.ok_or(Error::MissingEntryPoint(name))
}

impl DebugEntryPoints {
    pub fn resolve(entry: &ash::Entry, instance: vk::Instance) -> Result<DebugEntryPoints, Error> {
        // Safety: each address is transmuted to the prototype documented for
        // the symbol it was resolved under.
        unsafe {
            Ok(DebugEntryPoints {
                create_messenger: mem::transmute(resolve_symbol(
                    entry,
                    instance,
                    "vkCreateDebugUtilsMessengerEXT",
                )?),
                destroy_messenger: mem::transmute(resolve_symbol(
                    entry,
                    instance,
                    "vkDestroyDebugUtilsMessengerEXT",
                )?),
                create_report: mem::transmute(resolve_symbol(
                    entry,
                    instance,
                    "vkCreateDebugReportCallbackEXT",
                )?),
                destroy_report: mem::transmute(resolve_symbol(
                    entry,
                    instance,
                    "vkDestroyDebugReportCallbackEXT",
                )?),
            })
        }
    }
}

fn filter_from_user_data(user_data: *mut c_void) -> DiagnosticsFilter {
    if user_data.is_null() {
        return DiagnosticsFilter::ShowAll;
    }

    // Safety: registration stores the filter behind a pointer that stays
    // valid for as long as the callbacks remain registered.
    unsafe { *user_data.cast::<DiagnosticsFilter>() }
}

fn utils_message_passes(filter: DiagnosticsFilter, ty: vk::DebugUtilsMessageTypeFlagsEXT) -> bool {
    match filter {
        DiagnosticsFilter::ShowAll => true,
        // Shader printf arrives as a validation-typed message; general and
        // performance chatter is dropped.
        DiagnosticsFilter::PrintfOnly => ty == vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION,
    }
}

fn report_message_passes(
    filter: DiagnosticsFilter,
    flags: vk::DebugReportFlagsEXT,
    message: &str,
) -> bool {
    match filter {
        DiagnosticsFilter::ShowAll => true,
        // On this channel printf output is informational and prefixed by the
        // layer; both conditions are required.
        DiagnosticsFilter::PrintfOnly => {
            flags == vk::DebugReportFlagsEXT::INFORMATION && message.contains("Validation")
        }
    }
}

fn utils_level(severity: vk::DebugUtilsMessageSeverityFlagsEXT) -> log::Level {
    match severity {
        vk::DebugUtilsMessageSeverityFlagsEXT::ERROR => log::Level::Error,
        vk::DebugUtilsMessageSeverityFlagsEXT::WARNING => log::Level::Warn,
        vk::DebugUtilsMessageSeverityFlagsEXT::INFO => log::Level::Info,
        vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE => log::Level::Trace,
        // Unknown severities are logged rather than dropped.
        _ => log::Level::Warn,
    }
}

fn report_level(flags: vk::DebugReportFlagsEXT) -> log::Level {
    match flags {
        vk::DebugReportFlagsEXT::ERROR => log::Level::Error,
        vk::DebugReportFlagsEXT::WARNING => log::Level::Warn,
        vk::DebugReportFlagsEXT::PERFORMANCE_WARNING => log::Level::Warn,
        vk::DebugReportFlagsEXT::INFORMATION => log::Level::Info,
        vk::DebugReportFlagsEXT::DEBUG => log::Level::Debug,
        _ => log::Level::Warn,
    }
}

/// # Safety
///
/// `ptr` must be null or point to a NUL-terminated string that stays valid
/// for the duration of the call.
unsafe fn lossy_cstr<'a>(ptr: *const c_char) -> Cow<'a, str> {
    if ptr.is_null() {
        return Cow::Borrowed("");
    }

    // Safety: checked non-null; the caller guarantees termination.
    unsafe { CStr::from_ptr(ptr) }.to_string_lossy()
}

unsafe extern "system" fn debug_utils_callback(
    severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    ty: vk::DebugUtilsMessageTypeFlagsEXT,
    callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    user_data: *mut c_void,
) -> vk::Bool32 {
    // Via the spec: "The application should always return VK_FALSE", leaving
    // the message available to other registered listeners.

    if std::thread::panicking() {
        return vk::FALSE;
    }

    if !utils_message_passes(filter_from_user_data(user_data), ty) {
        return vk::FALSE;
    }

    // Safety: the driver passes valid callback data for the duration of the
    // call; nothing is retained past it.
    let data = unsafe { &*callback_data };
    let message = unsafe { lossy_cstr(data.p_message) };

    if data.p_message_id_name.is_null() {
        log::log!(
            target: "vulkan::debug",
            utils_level(severity),
            "{:?} [0x{:X}] : {}",
            ty,
            data.message_id_number,
            message,
        );
    } else {
        let id_name = unsafe { lossy_cstr(data.p_message_id_name) };
        log::log!(
            target: "vulkan::debug",
            utils_level(severity),
            "{:?} [{} (0x{:X})] : {}",
            ty,
            id_name,
            data.message_id_number,
            message,
        );
    }

    vk::FALSE
}

unsafe extern "system" fn debug_report_callback(
    flags: vk::DebugReportFlagsEXT,
    _object_type: vk::DebugReportObjectTypeEXT,
    _object: u64,
    _location: usize,
    message_code: i32,
    p_layer_prefix: *const c_char,
    p_message: *const c_char,
    user_data: *mut c_void,
) -> vk::Bool32 {
    if std::thread::panicking() {
        return vk::FALSE;
    }

    let message = unsafe { lossy_cstr(p_message) };
    if !report_message_passes(filter_from_user_data(user_data), flags, &message) {
        return vk::FALSE;
    }

    let layer_prefix = unsafe { lossy_cstr(p_layer_prefix) };
    log::log!(
        target: "vulkan::report",
        report_level(flags),
        "[{:?}] {} (0x{:X}): {}",
        flags,
        layer_prefix,
        message_code,
        message,
    );

    vk::FALSE
}

/// The two diagnostic sinks registered against an instance.
///
/// Borrowing the instance pins the teardown order: the bridge cannot outlive
/// the instance it is registered on.
pub struct DiagnosticsBridge<'a> {
    instance: &'a Instance,
    entry_points: DebugEntryPoints,
    messenger: vk::DebugUtilsMessengerEXT,
    report_callback: vk::DebugReportCallbackEXT,
    // Callbacks read the filter through their user-data pointer, so it has
    // to sit at a stable heap address for the bridge's lifetime.
    _filter: Box<DiagnosticsFilter>,
}

impl<'a> DiagnosticsBridge<'a> {
    /// Registers both sinks, subscribed to every severity and flag the
    /// driver can deliver; filtering happens in the callbacks.
    pub fn register(
        instance: &'a Instance,
        filter: DiagnosticsFilter,
    ) -> Result<DiagnosticsBridge<'a>, Error> {
        let entry_points = DebugEntryPoints::resolve(instance.entry(), instance.raw_handle())?;

        let filter = Box::new(filter);
        let user_data = &*filter as *const DiagnosticsFilter as *mut c_void;

        let messenger_info = vk::DebugUtilsMessengerCreateInfoEXT::builder()
            .message_severity(
                vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE
                    | vk::DebugUtilsMessageSeverityFlagsEXT::INFO
                    | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                    | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
            )
            .message_type(
                vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                    | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                    | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
            )
            .pfn_user_callback(Some(debug_utils_callback))
            .user_data(user_data)
            .build();

        let mut messenger = vk::DebugUtilsMessengerEXT::null();

        // Safety: the create info outlives the call and the entry point was
        // resolved from this instance.
        let result = unsafe {
            (entry_points.create_messenger)(
                instance.raw_handle(),
                &messenger_info,
                ptr::null(),
                &mut messenger,
            )
        };
        result
            .result()
            .map_err(|err| Error::vulkan("vkCreateDebugUtilsMessengerEXT", err))?;

        let report_info = vk::DebugReportCallbackCreateInfoEXT::builder()
            .flags(
                vk::DebugReportFlagsEXT::INFORMATION
                    | vk::DebugReportFlagsEXT::WARNING
                    | vk::DebugReportFlagsEXT::PERFORMANCE_WARNING
                    | vk::DebugReportFlagsEXT::ERROR
                    | vk::DebugReportFlagsEXT::DEBUG,
            )
            .pfn_callback(Some(debug_report_callback))
            .user_data(user_data)
            .build();

        let mut report_callback = vk::DebugReportCallbackEXT::null();

        // Safety: as above.
        let result = unsafe {
            (entry_points.create_report)(
                instance.raw_handle(),
                &report_info,
                ptr::null(),
                &mut report_callback,
            )
        };
        if let Err(err) = result.result() {
            // Safety: the messenger was created above and is not used again.
            unsafe {
                (entry_points.destroy_messenger)(instance.raw_handle(), messenger, ptr::null());
            }
            return Err(Error::vulkan("vkCreateDebugReportCallbackEXT", err));
        }

        log::info!("registered both diagnostic channels ({:?})", *filter);

        Ok(DiagnosticsBridge {
            instance,
            entry_points,
            messenger,
            report_callback,
            _filter: filter,
        })
    }
}

impl Drop for DiagnosticsBridge<'_> {
    fn drop(&mut self) {
        // Null handles are silently skipped; teardown is deliberately more
        // permissive than registration.
        unsafe {
            if self.report_callback != vk::DebugReportCallbackEXT::null() {
                // Safety: handle was created on this instance; not used again.
                (self.entry_points.destroy_report)(
                    self.instance.raw_handle(),
                    self.report_callback,
                    ptr::null(),
                );
            }

            if self.messenger != vk::DebugUtilsMessengerEXT::null() {
                // Safety: as above.
                (self.entry_points.destroy_messenger)(
                    self.instance.raw_handle(),
                    self.messenger,
                    ptr::null(),
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn show_all_passes_every_type() {
        for ty in [
            vk::DebugUtilsMessageTypeFlagsEXT::GENERAL,
            vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION,
            vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
        ]
        .iter()
        {
            assert!(utils_message_passes(DiagnosticsFilter::ShowAll, *ty));
        }
    }

    #[test]
    fn printf_only_keeps_exactly_validation() {
        let filter = DiagnosticsFilter::PrintfOnly;

        assert!(utils_message_passes(
            filter,
            vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
        ));
        assert!(!utils_message_passes(
            filter,
            vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
        ));
        assert!(!utils_message_passes(
            filter,
            vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE
        ));
        // Mixed type bits are not an exact match and are dropped.
        assert!(!utils_message_passes(
            filter,
            vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                | vk::DebugUtilsMessageTypeFlagsEXT::GENERAL,
        ));
    }

    #[test]
    fn report_filter_requires_both_conditions() {
        let filter = DiagnosticsFilter::PrintfOnly;
        let info = vk::DebugReportFlagsEXT::INFORMATION;

        assert!(report_message_passes(
            filter,
            info,
            "Validation Information: [ UNASSIGNED-DEBUG-PRINTF ] foo"
        ));
        assert!(!report_message_passes(filter, info, "loader message"));
        assert!(!report_message_passes(
            filter,
            vk::DebugReportFlagsEXT::WARNING,
            "Validation Warning: bar"
        ));
        assert!(!report_message_passes(
            filter,
            info | vk::DebugReportFlagsEXT::DEBUG,
            "Validation Information: baz"
        ));
    }

    #[test]
    fn show_all_report_ignores_conditions() {
        assert!(report_message_passes(
            DiagnosticsFilter::ShowAll,
            vk::DebugReportFlagsEXT::DEBUG,
            "anything"
        ));
    }

    #[test]
    fn severity_maps_like_the_log_levels() {
        assert_eq!(
            utils_level(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR),
            log::Level::Error
        );
        assert_eq!(
            utils_level(vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE),
            log::Level::Trace
        );
        // Unknown severity bits still log.
        assert_eq!(
            utils_level(vk::DebugUtilsMessageSeverityFlagsEXT::empty()),
            log::Level::Warn
        );
    }

    #[test]
    fn report_flags_map_to_levels() {
        assert_eq!(
            report_level(vk::DebugReportFlagsEXT::INFORMATION),
            log::Level::Info
        );
        assert_eq!(
            report_level(vk::DebugReportFlagsEXT::PERFORMANCE_WARNING),
            log::Level::Warn
        );
        assert_eq!(
            report_level(vk::DebugReportFlagsEXT::DEBUG),
            log::Level::Debug
        );
    }

    #[test]
    fn null_user_data_defaults_to_show_all() {
        assert_eq!(
            filter_from_user_data(std::ptr::null_mut()),
            DiagnosticsFilter::ShowAll
        );
    }
}
