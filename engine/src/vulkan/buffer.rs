use anyhow::Result;
use thiserror::Error;
use vulkanalia::vk::{self, DeviceV1_0, Handle, HasBuilder};

use super::device::{find_memory_type, VulkanDevice};

/// The caller asked to write past the buffer's allocated range. This is
/// a programming error in the caller, not an environment problem, so it
/// is never retried and nothing is written.
#[derive(Debug, Error)]
#[error("write of {requested} bytes exceeds buffer range of {capacity} bytes")]
pub struct WriteOverflow {
    pub requested: u64,
    pub capacity: u64,
}

/// No entry in the memory-type table satisfies the request. Reported
/// once as fatal; no fallback type is attempted.
#[derive(Debug, Error)]
#[error("no memory type matches bits {type_bits:#b} with properties {required:?}")]
pub struct NoCompatibleMemory {
    pub type_bits: u32,
    pub required: vk::MemoryPropertyFlags,
}

pub(crate) fn check_write_bounds(capacity: u64, requested: u64) -> Result<(), WriteOverflow> {
    if requested > capacity {
        Err(WriteOverflow {
            requested,
            capacity,
        })
    } else {
        Ok(())
    }
}

/// A buffer with its backing memory. The constructor performs the whole
/// create -> query requirements -> find type -> allocate -> bind chain,
/// so call sites cannot get the ordering wrong.
#[derive(Debug)]
pub struct DataBuffer {
    pub buffer: vk::Buffer,
    memory: vk::DeviceMemory,
    pub range: vk::DeviceSize,
}

impl DataBuffer {
    pub unsafe fn new(
        device: &VulkanDevice,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        properties: vk::MemoryPropertyFlags,
    ) -> Result<Self> {
        let info = vk::BufferCreateInfo::builder()
            .size(size)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);
        let buffer = device.vk_device.create_buffer(&info, None)?;

        let requirements = device.vk_device.get_buffer_memory_requirements(buffer);
        let memory = allocate_memory(device, requirements, properties)?;
        device.vk_device.bind_buffer_memory(buffer, memory, 0)?;

        Ok(Self {
            buffer,
            memory,
            range: size,
        })
    }

    /// Map, copy, unmap. The memory is host-visible and host-coherent by
    /// construction, so no explicit flush is needed.
    pub unsafe fn update(&self, device: &VulkanDevice, bytes: &[u8]) -> Result<()> {
        check_write_bounds(self.range, bytes.len() as u64)?;

        let ptr = device.vk_device.map_memory(
            self.memory,
            0,
            bytes.len() as u64,
            vk::MemoryMapFlags::empty(),
        )?;
        std::ptr::copy_nonoverlapping(bytes.as_ptr(), ptr.cast(), bytes.len());
        device.vk_device.unmap_memory(self.memory);

        Ok(())
    }

    pub unsafe fn destroy(&self, device: &VulkanDevice) {
        device.vk_device.destroy_buffer(self.buffer, None);
        device.vk_device.free_memory(self.memory, None);
    }
}

/// An image with its backing memory and, once `create_view` has run, a
/// view. Same mandatory ordering as `DataBuffer`.
#[derive(Debug)]
pub struct ImageBuffer {
    pub format: vk::Format,
    pub image: vk::Image,
    memory: vk::DeviceMemory,
    pub view: vk::ImageView,
    pub size: vk::DeviceSize,
}

impl ImageBuffer {
    pub unsafe fn new(
        device: &VulkanDevice,
        width: u32,
        height: u32,
        format: vk::Format,
        tiling: vk::ImageTiling,
        initial_layout: vk::ImageLayout,
        usage: vk::ImageUsageFlags,
        properties: vk::MemoryPropertyFlags,
    ) -> Result<Self> {
        let info = vk::ImageCreateInfo::builder()
            .image_type(vk::ImageType::_2D)
            .extent(vk::Extent3D {
                width,
                height,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(1)
            .format(format)
            .tiling(tiling)
            .initial_layout(initial_layout)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .samples(vk::SampleCountFlags::_1);
        let image = device.vk_device.create_image(&info, None)?;

        let requirements = device.vk_device.get_image_memory_requirements(image);
        let memory = allocate_memory(device, requirements, properties)?;
        device.vk_device.bind_image_memory(image, memory, 0)?;

        Ok(Self {
            format,
            image,
            memory,
            view: vk::ImageView::null(),
            size: requirements.size,
        })
    }

    pub unsafe fn create_view(
        &mut self,
        device: &VulkanDevice,
        aspects: vk::ImageAspectFlags,
    ) -> Result<()> {
        let subresource_range = vk::ImageSubresourceRange::builder()
            .aspect_mask(aspects)
            .base_mip_level(0)
            .level_count(1)
            .base_array_layer(0)
            .layer_count(1);
        let info = vk::ImageViewCreateInfo::builder()
            .image(self.image)
            .view_type(vk::ImageViewType::_2D)
            .format(self.format)
            .subresource_range(subresource_range);

        self.view = device.vk_device.create_image_view(&info, None)?;
        Ok(())
    }

    /// Map, copy, unmap for host-visible staging images.
    pub unsafe fn write(&self, device: &VulkanDevice, bytes: &[u8]) -> Result<()> {
        check_write_bounds(self.size, bytes.len() as u64)?;

        let ptr = device.vk_device.map_memory(
            self.memory,
            0,
            self.size,
            vk::MemoryMapFlags::empty(),
        )?;
        std::ptr::copy_nonoverlapping(bytes.as_ptr(), ptr.cast(), bytes.len());
        device.vk_device.unmap_memory(self.memory);

        Ok(())
    }

    /// Row-by-row variant for staging images whose row pitch exceeds the
    /// tightly-packed width.
    pub unsafe fn write_rows(
        &self,
        device: &VulkanDevice,
        bytes: &[u8],
        row_bytes: usize,
        rows: usize,
        row_pitch: usize,
    ) -> Result<()> {
        check_write_bounds(self.size, (rows * row_pitch) as u64)?;

        let ptr = device.vk_device.map_memory(
            self.memory,
            0,
            self.size,
            vk::MemoryMapFlags::empty(),
        )?;
        let base = ptr.cast::<u8>();
        for row in 0..rows {
            std::ptr::copy_nonoverlapping(
                bytes.as_ptr().add(row * row_bytes),
                base.add(row * row_pitch),
                row_bytes,
            );
        }
        device.vk_device.unmap_memory(self.memory);

        Ok(())
    }

    pub unsafe fn destroy(&self, device: &VulkanDevice) {
        if !self.view.is_null() {
            device.vk_device.destroy_image_view(self.view, None);
        }
        device.vk_device.destroy_image(self.image, None);
        device.vk_device.free_memory(self.memory, None);
    }
}

unsafe fn allocate_memory(
    device: &VulkanDevice,
    requirements: vk::MemoryRequirements,
    properties: vk::MemoryPropertyFlags,
) -> Result<vk::DeviceMemory> {
    let index = find_memory_type(&device.memory, requirements.memory_type_bits, properties)
        .ok_or(NoCompatibleMemory {
            type_bits: requirements.memory_type_bits,
            required: properties,
        })?;

    let info = vk::MemoryAllocateInfo::builder()
        .allocation_size(requirements.size)
        .memory_type_index(index);

    Ok(device.vk_device.allocate_memory(&info, None)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_within_bounds_is_accepted() {
        assert!(check_write_bounds(64, 64).is_ok());
        assert!(check_write_bounds(64, 0).is_ok());
    }

    #[test]
    fn oversized_write_is_rejected() {
        let err = check_write_bounds(64, 65).unwrap_err();
        assert_eq!(err.requested, 65);
        assert_eq!(err.capacity, 64);
        assert!(err.to_string().contains("exceeds"));
    }
}
