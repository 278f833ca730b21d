use anyhow::{anyhow, Result};
use log::*;
use std::collections::HashSet;
use thiserror::Error;
use vulkanalia::vk::{self, DeviceV1_0, HasBuilder, InstanceV1_0, KhrSurfaceExtension};
use vulkanalia::{Device, Entry};

use super::{constants, instance::VulkanInstance};

const DEVICE_EXTENSIONS: &[vk::ExtensionName] = &[vk::KHR_SWAPCHAIN_EXTENSION.name];

/// A capability the selected device turned out to be missing. Always
/// fatal, never retried: it means the environment cannot run us.
#[derive(Debug, Error)]
#[error("Missing {0}.")]
pub struct SuitabilityError(pub &'static str);

/// The logical device plus everything resolved while selecting it:
/// queue handles and family indices, the memory-type table consumed by
/// all later allocations, and the command pool.
#[derive(Debug)]
pub struct VulkanDevice {
    pub physical_device: vk::PhysicalDevice,
    pub vk_device: Device,
    pub graphics_queue: vk::Queue,
    pub present_queue: vk::Queue,
    pub graphics_family: u32,
    pub present_family: u32,
    pub memory: vk::PhysicalDeviceMemoryProperties,
    pub command_pool: vk::CommandPool,
}

impl VulkanDevice {
    pub unsafe fn new(
        entry: &Entry,
        instance: &VulkanInstance,
        surface: vk::SurfaceKHR,
    ) -> Result<VulkanDevice> {
        let physical_device = VulkanDevice::pick_physical_device(instance, surface)?;
        let indices = QueueFamilyIndices::get(instance, surface, physical_device)?;

        // Both families must be resolved before any queue is fetched.
        let mut unique_families = HashSet::new();
        unique_families.insert(indices.graphics);
        unique_families.insert(indices.present);

        let queue_priorities = &[1.0];
        let queue_infos = unique_families
            .iter()
            .map(|&family| {
                vk::DeviceQueueCreateInfo::builder()
                    .queue_family_index(family)
                    .queue_priorities(queue_priorities)
                    .build()
            })
            .collect::<Vec<_>>();

        let layers = if constants::VALIDATION_ENABLED {
            vec![constants::VALIDATION_LAYER.as_ptr()]
        } else {
            vec![]
        };

        let mut extensions = DEVICE_EXTENSIONS
            .iter()
            .map(|e| e.as_ptr())
            .collect::<Vec<_>>();

        // Required by Vulkan SDK on macOS since 1.3.216.
        if cfg!(target_os = "macos") && entry.version()? >= constants::PORTABILITY_MACOS_VERSION {
            extensions.push(vk::KHR_PORTABILITY_SUBSET_EXTENSION.name.as_ptr());
        }

        let features = vk::PhysicalDeviceFeatures::builder();

        let info = vk::DeviceCreateInfo::builder()
            .queue_create_infos(&queue_infos)
            .enabled_layer_names(&layers)
            .enabled_extension_names(&extensions)
            .enabled_features(&features);

        let device = instance
            .vk_instance
            .create_device(physical_device, &info, None)?;

        let graphics_queue = device.get_device_queue(indices.graphics, 0);
        let present_queue = device.get_device_queue(indices.present, 0);

        let memory = instance
            .vk_instance
            .get_physical_device_memory_properties(physical_device);

        let pool_info = vk::CommandPoolCreateInfo::builder()
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER)
            .queue_family_index(indices.graphics);
        let command_pool = device.create_command_pool(&pool_info, None)?;

        info!("Logical device and queues created.");

        Ok(VulkanDevice {
            physical_device,
            vk_device: device,
            graphics_queue,
            present_queue,
            graphics_family: indices.graphics,
            present_family: indices.present,
            memory,
            command_pool,
        })
    }

    /// First enumerated device passing the suitability check; no scoring
    /// heuristic, so selection is deterministic and side-effect-free.
    unsafe fn pick_physical_device(
        instance: &VulkanInstance,
        surface: vk::SurfaceKHR,
    ) -> Result<vk::PhysicalDevice> {
        for physical_device in instance.vk_instance.enumerate_physical_devices()? {
            let properties = instance
                .vk_instance
                .get_physical_device_properties(physical_device);

            if let Err(error) = VulkanDevice::check_physical_device(instance, surface, physical_device)
            {
                warn!(
                    "Skipping physical device (`{}`): {}",
                    properties.device_name, error
                );
            } else {
                info!("Selected physical device (`{}`).", properties.device_name);
                return Ok(physical_device);
            }
        }
        Err(anyhow!("Failed to find suitable physical device."))
    }

    unsafe fn check_physical_device(
        instance: &VulkanInstance,
        surface: vk::SurfaceKHR,
        physical_device: vk::PhysicalDevice,
    ) -> Result<()> {
        QueueFamilyIndices::get(instance, surface, physical_device)?;
        VulkanDevice::check_physical_device_extensions(instance, physical_device)?;
        Ok(())
    }

    unsafe fn check_physical_device_extensions(
        instance: &VulkanInstance,
        physical_device: vk::PhysicalDevice,
    ) -> Result<()> {
        let available = instance
            .vk_instance
            .enumerate_device_extension_properties(physical_device, None)?
            .iter()
            .map(|e| e.extension_name)
            .collect::<HashSet<_>>();
        if DEVICE_EXTENSIONS.iter().all(|e| available.contains(e)) {
            Ok(())
        } else {
            Err(anyhow!(SuitabilityError("required device extensions")))
        }
    }

    pub unsafe fn destroy(&mut self) {
        self.vk_device.destroy_command_pool(self.command_pool, None);
        self.vk_device.destroy_device(None);
    }
}

#[derive(Copy, Clone, Debug)]
pub struct QueueFamilyIndices {
    pub graphics: u32,
    pub present: u32,
}

impl QueueFamilyIndices {
    /// One family advertising graphics and one able to present to the
    /// surface; the two may differ. Absence of either is fatal.
    pub unsafe fn get(
        instance: &VulkanInstance,
        surface: vk::SurfaceKHR,
        physical_device: vk::PhysicalDevice,
    ) -> Result<Self> {
        let properties = instance
            .vk_instance
            .get_physical_device_queue_family_properties(physical_device);

        let graphics = properties
            .iter()
            .position(|p| p.queue_flags.contains(vk::QueueFlags::GRAPHICS))
            .map(|i| i as u32);

        let mut present = None;
        for (index, _) in properties.iter().enumerate() {
            if instance.vk_instance.get_physical_device_surface_support_khr(
                physical_device,
                index as u32,
                surface,
            )? {
                present = Some(index as u32);
                break;
            }
        }

        if let (Some(graphics), Some(present)) = (graphics, present) {
            Ok(Self { graphics, present })
        } else {
            Err(anyhow!(SuitabilityError(
                "required queue families (graphics + present)"
            )))
        }
    }
}

/// Scans the memory-type table for the lowest-indexed entry whose bit is
/// set in `type_bits` and whose property flags are a superset of
/// `properties`. The table is tiny (at most 32 entries by API contract),
/// so a linear scan is fine.
pub fn find_memory_type(
    memory: &vk::PhysicalDeviceMemoryProperties,
    type_bits: u32,
    properties: vk::MemoryPropertyFlags,
) -> Option<u32> {
    (0..memory.memory_type_count).find(|i| {
        let allowed = type_bits & (1 << i) != 0;
        let flags = memory.memory_types[*i as usize].property_flags;
        allowed && flags.contains(properties)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(flags: &[vk::MemoryPropertyFlags]) -> vk::PhysicalDeviceMemoryProperties {
        let mut memory = vk::PhysicalDeviceMemoryProperties::default();
        memory.memory_type_count = flags.len() as u32;
        for (i, &f) in flags.iter().enumerate() {
            memory.memory_types[i].property_flags = f;
        }
        memory
    }

    const HOST: vk::MemoryPropertyFlags = vk::MemoryPropertyFlags::HOST_VISIBLE;
    const LOCAL: vk::MemoryPropertyFlags = vk::MemoryPropertyFlags::DEVICE_LOCAL;

    #[test]
    fn picks_lowest_satisfying_index() {
        let memory = table(&[LOCAL, HOST, HOST]);
        assert_eq!(find_memory_type(&memory, 0b111, HOST), Some(1));
    }

    #[test]
    fn respects_the_type_bitmask() {
        let memory = table(&[HOST, HOST]);
        // Entry 0 satisfies the flags but is excluded by the mask.
        assert_eq!(find_memory_type(&memory, 0b10, HOST), Some(1));
    }

    #[test]
    fn requires_a_superset_of_flags() {
        let combined = LOCAL | HOST;
        let memory = table(&[LOCAL, combined]);
        assert_eq!(find_memory_type(&memory, 0b11, combined), Some(1));
        // A partial match is not a match.
        assert_eq!(
            find_memory_type(&memory, 0b01, combined),
            None
        );
    }

    #[test]
    fn reports_not_found() {
        let memory = table(&[LOCAL]);
        assert_eq!(find_memory_type(&memory, 0b1, HOST), None);
        assert_eq!(find_memory_type(&memory, 0, LOCAL), None);
    }

    #[test]
    fn empty_flags_match_any_allowed_entry() {
        let memory = table(&[LOCAL, HOST]);
        assert_eq!(
            find_memory_type(&memory, 0b10, vk::MemoryPropertyFlags::empty()),
            Some(1)
        );
    }
}
