use anyhow::Result;
use log::*;
use vulkanalia::vk::{self, DeviceV1_0, HasBuilder};

use super::buffer::ImageBuffer;
use super::command::{copy_image, transition_image_layout};
use super::device::VulkanDevice;
use crate::assets::ImageData;

const TEXTURE_FORMAT: vk::Format = vk::Format::R8G8B8A8_UNORM;

/// A sampled 2D texture. Uploaded at startup through a host-visible
/// staging image and never written again.
pub struct Texture {
    image: ImageBuffer,
    pub view: vk::ImageView,
    pub sampler: vk::Sampler,
}

impl Texture {
    pub unsafe fn new(device: &VulkanDevice, data: &ImageData) -> Result<Texture> {
        // Both images are linear and host-visible; the staging one is
        // filled by the host, the destination one is sampled after a
        // device-side copy settles its layout.
        let staging = ImageBuffer::new(
            device,
            data.width,
            data.height,
            TEXTURE_FORMAT,
            vk::ImageTiling::LINEAR,
            vk::ImageLayout::PREINITIALIZED,
            vk::ImageUsageFlags::TRANSFER_SRC,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        )?;
        let mut image = ImageBuffer::new(
            device,
            data.width,
            data.height,
            TEXTURE_FORMAT,
            vk::ImageTiling::LINEAR,
            vk::ImageLayout::PREINITIALIZED,
            vk::ImageUsageFlags::TRANSFER_DST | vk::ImageUsageFlags::SAMPLED,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        )?;

        // Linear tiling may pad each row; honor the reported pitch.
        let subresource = vk::ImageSubresource::builder()
            .aspect_mask(vk::ImageAspectFlags::COLOR)
            .mip_level(0)
            .array_layer(0);
        let layout = device
            .vk_device
            .get_image_subresource_layout(staging.image, &subresource);

        let row_bytes = data.width as usize * 4;
        if layout.row_pitch as usize == row_bytes {
            staging.write(device, &data.pixels)?;
        } else {
            staging.write_rows(
                device,
                &data.pixels,
                row_bytes,
                data.height as usize,
                layout.row_pitch as usize,
            )?;
        }

        transition_image_layout(
            device,
            staging.image,
            vk::ImageAspectFlags::COLOR,
            vk::ImageLayout::PREINITIALIZED,
            vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
        )?;
        transition_image_layout(
            device,
            image.image,
            vk::ImageAspectFlags::COLOR,
            vk::ImageLayout::PREINITIALIZED,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        )?;
        copy_image(device, staging.image, image.image, data.width, data.height)?;
        transition_image_layout(
            device,
            image.image,
            vk::ImageAspectFlags::COLOR,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        )?;

        staging.destroy(device);

        image.create_view(device, vk::ImageAspectFlags::COLOR)?;

        let info = vk::SamplerCreateInfo::builder()
            .mag_filter(vk::Filter::LINEAR)
            .min_filter(vk::Filter::LINEAR)
            .address_mode_u(vk::SamplerAddressMode::REPEAT)
            .address_mode_v(vk::SamplerAddressMode::REPEAT)
            .address_mode_w(vk::SamplerAddressMode::REPEAT)
            .anisotropy_enable(false)
            .max_anisotropy(1.0)
            .border_color(vk::BorderColor::INT_OPAQUE_WHITE)
            .unnormalized_coordinates(false)
            .compare_enable(false)
            .mipmap_mode(vk::SamplerMipmapMode::NEAREST);
        let sampler = device.vk_device.create_sampler(&info, None)?;

        info!("Texture uploaded: {}x{}.", data.width, data.height);

        let view = image.view;
        Ok(Texture {
            image,
            view,
            sampler,
        })
    }

    pub unsafe fn destroy(&mut self, device: &VulkanDevice) {
        device.vk_device.destroy_sampler(self.sampler, None);
        self.image.destroy(device);
    }
}
