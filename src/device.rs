//! Physical device enumeration, compute queue selection, and the logical
//! device.

use ash::vk;

use crate::instance::Instance;
use crate::Error;

/// Queue family chosen for dispatch, with the capability bits it advertises.
///
/// Derived once from the device's queue family properties and immutable
/// thereafter.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct QueueFamilySelection {
    pub index: u32,
    pub flags: vk::QueueFlags,
}

/// Materializes the instance's device list in one shot.
///
/// An empty list is not an error at this layer; the caller decides whether
/// zero devices is fatal.
pub fn enumerate_physical_devices(instance: &Instance) -> Result<Vec<vk::PhysicalDevice>, Error> {
    // Safety: no external synchronization requirement.
    unsafe { instance.handle().enumerate_physical_devices() }
        .map_err(|err| Error::vulkan("vkEnumeratePhysicalDevices", err))
}

/// Reports the queue families exposed by a physical device.
pub fn queue_family_properties(
    instance: &Instance,
    phys_device: vk::PhysicalDevice,
) -> Vec<vk::QueueFamilyProperties> {
    // Safety: no external synchronization requirement.
    unsafe {
        instance
            .handle()
            .get_physical_device_queue_family_properties(phys_device)
    }
}

// Transfer and sparse-binding bits say nothing about whether a family suits
// compute work, so neither check consults them.
fn is_dedicated_compute(props: &vk::QueueFamilyProperties) -> bool {
    props.queue_flags.contains(vk::QueueFlags::COMPUTE)
        && !props.queue_flags.contains(vk::QueueFlags::GRAPHICS)
}

fn is_compute_capable(props: &vk::QueueFamilyProperties) -> bool {
    props.queue_flags.contains(vk::QueueFlags::COMPUTE)
}

/// Picks the queue family to dispatch on, in two tiers.
///
/// A family with COMPUTE but not GRAPHICS wins because it is not contended
/// by render scheduling; failing that, any compute-capable family will do
/// (the common integrated/discrete combined-queue topology). Within a tier,
/// the first family in enumeration order wins.
pub fn select_compute_queue_family(
    families: &[vk::QueueFamilyProperties],
) -> Result<QueueFamilySelection, Error> {
    enum QueueSelection {
        Dedicated(u32),
        General(u32),
    }

    let mut compute_queue = None;

    for (index, qf) in families.iter().enumerate() {
        match compute_queue {
            // Already have a dedicated queue.
            Some(QueueSelection::Dedicated(_)) => (),

            Some(QueueSelection::General(_)) => {
                if is_dedicated_compute(qf) {
                    compute_queue = Some(QueueSelection::Dedicated(index as u32));
                }
            }

            None => {
                if is_dedicated_compute(qf) {
                    compute_queue = Some(QueueSelection::Dedicated(index as u32));
                } else if is_compute_capable(qf) {
                    compute_queue = Some(QueueSelection::General(index as u32));
                }
            }
        }
    }

    let index = match compute_queue {
        Some(QueueSelection::Dedicated(d)) => {
            log::info!("Using compute-only queue family (index = {})", d);
            d
        }
        Some(QueueSelection::General(g)) => {
            log::info!("Using combined graphics+compute queue family (index = {})", g);
            g
        }
        None => return Err(Error::NoComputeQueueFamily),
    };

    Ok(QueueFamilySelection {
        index,
        flags: families[index as usize].queue_flags,
    })
}

/// An owned logical device with a single queue from the selected family.
pub struct Device {
    raw: ash::Device,
}

impl Device {
    /// Creates the logical device. No layers, extensions, or features are
    /// enabled; the harness only needs one queue.
    pub fn create(
        instance: &Instance,
        phys_device: vk::PhysicalDevice,
        queue_family_index: u32,
    ) -> Result<Device, Error> {
        let priorities = [1.0];
        let queue_infos = [vk::DeviceQueueCreateInfo::builder()
            .queue_family_index(queue_family_index)
            .queue_priorities(&priorities)
            .build()];

        let create_info = vk::DeviceCreateInfo::builder().queue_create_infos(&queue_infos);

        // Safety: the queue family index comes from this physical device's
        // enumeration.
        let raw = unsafe {
            instance
                .handle()
                .create_device(phys_device, &create_info, None)
        }
        .map_err(|err| Error::vulkan("vkCreateDevice", err))?;

        log::info!(
            "Successfully created logical device (queue family {}).",
            queue_family_index
        );

        Ok(Device { raw })
    }

    pub fn handle(&self) -> &ash::Device {
        &self.raw
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        // Safety:
        // - The harness destroys all child objects before the device binding
        //   goes out of scope.
        // - No allocation callbacks were provided at creation.
        unsafe { self.raw.destroy_device(None) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn family(flags: vk::QueueFlags) -> vk::QueueFamilyProperties {
        vk::QueueFamilyProperties {
            queue_flags: flags,
            queue_count: 1,
            ..Default::default()
        }
    }

    #[test]
    fn dedicated_compute_beats_combined() {
        let families = [
            family(vk::QueueFlags::GRAPHICS),
            family(vk::QueueFlags::COMPUTE),
            family(vk::QueueFlags::COMPUTE | vk::QueueFlags::GRAPHICS),
        ];

        let selection = select_compute_queue_family(&families).unwrap();
        assert_eq!(selection.index, 1);
        assert_eq!(selection.flags, vk::QueueFlags::COMPUTE);
    }

    #[test]
    fn combined_family_is_the_fallback() {
        let families = [
            family(vk::QueueFlags::GRAPHICS),
            family(vk::QueueFlags::COMPUTE | vk::QueueFlags::GRAPHICS),
        ];

        assert_eq!(select_compute_queue_family(&families).unwrap().index, 1);
    }

    #[test]
    fn no_compute_family_is_initialization_failure() {
        let families = [family(vk::QueueFlags::GRAPHICS), family(vk::QueueFlags::TRANSFER)];

        let err = select_compute_queue_family(&families).unwrap_err();
        assert!(matches!(&err, Error::NoComputeQueueFamily));
        assert!(err.to_string().contains("initialization failed"));
    }

    #[test]
    fn transfer_and_sparse_bits_are_ignored() {
        // The second family still counts as dedicated compute even though it
        // also moves data and binds sparse memory.
        let families = [
            family(vk::QueueFlags::COMPUTE | vk::QueueFlags::GRAPHICS),
            family(
                vk::QueueFlags::COMPUTE
                    | vk::QueueFlags::TRANSFER
                    | vk::QueueFlags::SPARSE_BINDING,
            ),
        ];

        assert_eq!(select_compute_queue_family(&families).unwrap().index, 1);
    }

    #[test]
    fn first_match_wins_within_a_tier() {
        let families = [
            family(vk::QueueFlags::COMPUTE),
            family(vk::QueueFlags::COMPUTE),
        ];

        assert_eq!(select_compute_queue_family(&families).unwrap().index, 0);
    }

    #[test]
    fn empty_enumeration_fails_selection() {
        assert!(select_compute_queue_family(&[]).is_err());
    }
}
