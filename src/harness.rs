//! End-to-end orchestration.
//!
//! Every step is fatal on first failure; `?` unwinds whatever was already
//! created because locals drop last-in first-out, which is exactly the
//! required teardown order (device, then diagnostics, then instance).

use std::ffi::CStr;

use crate::capability;
use crate::device::{self, Device};
use crate::diagnostics::{DiagnosticsBridge, DiagnosticsFilter};
use crate::dispatch::{self, CommandResources, PipelineResources};
use crate::instance::Instance;
use crate::{required_extensions, required_layers, Error};

const APP_NAME: &[u8] = b"vkprobe\0";

/// Runs the whole harness: capability checks, instance and diagnostics
/// setup, queue selection on device index 0, then one build + dispatch +
/// teardown cycle per supplied program blob.
pub fn run(programs: &[Vec<u32>], filter: DiagnosticsFilter) -> Result<(), Error> {
    // Safety: the loader is used from this thread only.
    let entry = unsafe { ash::Entry::load() }?;

    let layers = required_layers();
    let extensions = required_extensions();

    // Both checks run even if the first fails, matching the one-shot
    // pre-flight report.
    let layers_ok = capability::verify_layers(&entry, &layers);
    let extensions_ok = capability::verify_extensions(&entry, &extensions);
    if !(layers_ok && extensions_ok) {
        return Err(Error::MissingCapabilities);
    }

    let app_name = CStr::from_bytes_with_nul(APP_NAME).unwrap();
    let instance = Instance::create(entry, app_name, &layers, &extensions)?;

    // Registered before any operation that can emit messages, dropped after
    // the device but before the instance.
    let _bridge = DiagnosticsBridge::register(&instance, filter)?;

    let phys_devices = device::enumerate_physical_devices(&instance)?;
    let phys_device = *phys_devices.first().ok_or(Error::NoComputeDevice)?;

    let families = device::queue_family_properties(&instance, phys_device);
    let selection = device::select_compute_queue_family(&families)?;

    let device = Device::create(&instance, phys_device, selection.index)?;

    for (index, code) in programs.iter().enumerate() {
        log::info!("dispatching program {} ({} words)", index, code.len());
        run_program(&device, selection.index, code)?;
    }

    Ok(())
}

/// One build + dispatch cycle. Teardown runs on success and failure alike,
/// command resources first, so a failed step still releases whatever the
/// earlier steps created.
fn run_program(device: &Device, queue_family_index: u32, code: &[u32]) -> Result<(), Error> {
    let mut pipeline = PipelineResources::empty();
    let mut commands = CommandResources::empty();

    let result = dispatch::build_pipeline(device, code, &mut pipeline)
        .and_then(|()| dispatch::dispatch(device, queue_family_index, &pipeline, &mut commands));

    commands.destroy_with(device);
    pipeline.destroy_with(device);

    result
}
