use anyhow::{anyhow, Result};
use log::*;
use vulkanalia::vk::{self, DeviceV1_0, Handle, HasBuilder, KhrSurfaceExtension, KhrSwapchainExtension};
use vulkanalia::window as vk_window;
use winit::window::Window;

use super::buffer::ImageBuffer;
use super::command::transition_image_layout;
use super::constants;
use super::device::VulkanDevice;
use super::instance::VulkanInstance;

pub unsafe fn bind_surface(instance: &VulkanInstance, window: &Window) -> Result<vk::SurfaceKHR> {
    let surface = vk_window::create_surface(&instance.vk_instance, window, window)?;
    Ok(surface)
}

/// First advertised surface format, unless the implementation leaves the
/// choice to us by reporting a single UNDEFINED entry. An empty list is
/// also fatal since there is nothing to render into.
pub(crate) fn negotiate_format(
    formats: &[vk::SurfaceFormatKHR],
) -> Result<(vk::Format, vk::ColorSpaceKHR)> {
    match formats {
        [] => Err(anyhow!("Surface reports no formats.")),
        [only] if only.format == vk::Format::UNDEFINED => {
            Err(anyhow!("Surface leaves the format undefined."))
        }
        [first, ..] => Ok((first.format, first.color_space)),
    }
}

/// Mailbox when available, otherwise immediate, otherwise FIFO, which
/// every implementation must support.
pub(crate) fn choose_present_mode(modes: &[vk::PresentModeKHR]) -> vk::PresentModeKHR {
    if modes.contains(&vk::PresentModeKHR::MAILBOX) {
        vk::PresentModeKHR::MAILBOX
    } else if modes.contains(&vk::PresentModeKHR::IMMEDIATE) {
        vk::PresentModeKHR::IMMEDIATE
    } else {
        vk::PresentModeKHR::FIFO
    }
}

/// Requested dimensions clamped component-wise into the supported
/// range; the u32::MAX sentinel means the extent must match the window,
/// in which case the maximum reported extent is used instead of the
/// request.
pub(crate) fn compute_extent(
    capabilities: &vk::SurfaceCapabilitiesKHR,
    width: u32,
    height: u32,
) -> vk::Extent2D {
    if capabilities.current_extent.width == u32::MAX {
        capabilities.max_image_extent
    } else {
        vk::Extent2D {
            width: width.clamp(
                capabilities.min_image_extent.width,
                capabilities.max_image_extent.width,
            ),
            height: height.clamp(
                capabilities.min_image_extent.height,
                capabilities.max_image_extent.height,
            ),
        }
    }
}

/// The presentation chain: surface, swapchain, per-image views, the
/// shared depth attachment and, once the render pass exists, one
/// framebuffer per image.
pub struct VulkanSwapchain {
    pub surface: vk::SurfaceKHR,
    pub format: vk::Format,
    pub extent: vk::Extent2D,
    pub swapchain: vk::SwapchainKHR,
    pub images: Vec<vk::Image>,
    pub views: Vec<vk::ImageView>,
    pub depth: ImageBuffer,
    pub framebuffers: Vec<vk::Framebuffer>,
}

impl VulkanSwapchain {
    pub unsafe fn new(
        instance: &VulkanInstance,
        device: &VulkanDevice,
        surface: vk::SurfaceKHR,
        width: u32,
        height: u32,
    ) -> Result<VulkanSwapchain> {
        let capabilities = instance
            .vk_instance
            .get_physical_device_surface_capabilities_khr(device.physical_device, surface)?;
        let formats = instance
            .vk_instance
            .get_physical_device_surface_formats_khr(device.physical_device, surface)?;
        let present_modes = instance
            .vk_instance
            .get_physical_device_surface_present_modes_khr(device.physical_device, surface)?;

        if present_modes.is_empty() {
            return Err(anyhow!("Surface reports no present modes."));
        }

        let (format, color_space) = negotiate_format(&formats)?;
        let present_mode = choose_present_mode(&present_modes);
        let extent = compute_extent(&capabilities, width, height);

        // min_image_count of zero means no upper bound from our side.
        let image_count = capabilities.min_image_count.max(1);

        let queue_families = &[device.graphics_family, device.present_family];
        let mut info = vk::SwapchainCreateInfoKHR::builder()
            .surface(surface)
            .min_image_count(image_count)
            .image_format(format)
            .image_color_space(color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .pre_transform(capabilities.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true)
            .old_swapchain(vk::SwapchainKHR::null());

        info = if device.graphics_family != device.present_family {
            info.image_sharing_mode(vk::SharingMode::CONCURRENT)
                .queue_family_indices(queue_families)
        } else {
            info.image_sharing_mode(vk::SharingMode::EXCLUSIVE)
        };

        let swapchain = device.vk_device.create_swapchain_khr(&info, None)?;
        let images = device.vk_device.get_swapchain_images_khr(swapchain)?;

        info!(
            "Swapchain created: {} images, {:?}, {:?}, {}x{}.",
            images.len(),
            format,
            present_mode,
            extent.width,
            extent.height
        );

        let views = images
            .iter()
            .map(|&image| {
                let subresource_range = vk::ImageSubresourceRange::builder()
                    .aspect_mask(vk::ImageAspectFlags::COLOR)
                    .base_mip_level(0)
                    .level_count(1)
                    .base_array_layer(0)
                    .layer_count(1);
                let info = vk::ImageViewCreateInfo::builder()
                    .image(image)
                    .view_type(vk::ImageViewType::_2D)
                    .format(format)
                    .subresource_range(subresource_range);
                device.vk_device.create_image_view(&info, None)
            })
            .collect::<Result<Vec<_>, _>>()?;

        // Seed every image into a known layout before the first frame.
        for &image in &images {
            transition_image_layout(
                device,
                image,
                vk::ImageAspectFlags::COLOR,
                vk::ImageLayout::UNDEFINED,
                vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            )?;
        }

        let mut depth = ImageBuffer::new(
            device,
            extent.width,
            extent.height,
            constants::DEPTH_FORMAT,
            vk::ImageTiling::OPTIMAL,
            vk::ImageLayout::UNDEFINED,
            vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
            vk::MemoryPropertyFlags::empty(),
        )?;
        depth.create_view(device, vk::ImageAspectFlags::DEPTH)?;

        Ok(VulkanSwapchain {
            surface,
            format,
            extent,
            swapchain,
            images,
            views,
            depth,
            framebuffers: Vec::new(),
        })
    }

    /// One framebuffer per swapchain image, all sharing the depth view.
    /// Depth works as a shared attachment because frames are serialized
    /// by the in-flight fences before the depth test runs.
    pub unsafe fn create_framebuffers(
        &mut self,
        device: &VulkanDevice,
        render_pass: vk::RenderPass,
    ) -> Result<()> {
        self.framebuffers = self
            .views
            .iter()
            .map(|&view| {
                let attachments = &[view, self.depth.view];
                let info = vk::FramebufferCreateInfo::builder()
                    .render_pass(render_pass)
                    .attachments(attachments)
                    .width(self.extent.width)
                    .height(self.extent.height)
                    .layers(1);
                device.vk_device.create_framebuffer(&info, None)
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(())
    }

    pub fn aspect_ratio(&self) -> f32 {
        self.extent.width as f32 / self.extent.height as f32
    }

    pub unsafe fn destroy(&mut self, instance: &VulkanInstance, device: &VulkanDevice) {
        for &framebuffer in &self.framebuffers {
            device.vk_device.destroy_framebuffer(framebuffer, None);
        }
        self.depth.destroy(device);
        for &view in &self.views {
            device.vk_device.destroy_image_view(view, None);
        }
        device.vk_device.destroy_swapchain_khr(self.swapchain, None);
        instance.vk_instance.destroy_surface_khr(self.surface, None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn surface_format(format: vk::Format) -> vk::SurfaceFormatKHR {
        vk::SurfaceFormatKHR {
            format,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        }
    }

    #[test]
    fn first_format_wins() {
        let formats = [
            surface_format(vk::Format::B8G8R8A8_UNORM),
            surface_format(vk::Format::R8G8B8A8_UNORM),
        ];
        let (format, color_space) = negotiate_format(&formats).unwrap();
        assert_eq!(format, vk::Format::B8G8R8A8_UNORM);
        assert_eq!(color_space, vk::ColorSpaceKHR::SRGB_NONLINEAR);
    }

    #[test]
    fn undefined_only_format_is_fatal() {
        let formats = [surface_format(vk::Format::UNDEFINED)];
        assert!(negotiate_format(&formats).is_err());
        assert!(negotiate_format(&[]).is_err());
    }

    #[test]
    fn undefined_is_fine_when_not_alone() {
        let formats = [
            surface_format(vk::Format::UNDEFINED),
            surface_format(vk::Format::B8G8R8A8_UNORM),
        ];
        let (format, _) = negotiate_format(&formats).unwrap();
        assert_eq!(format, vk::Format::UNDEFINED);
    }

    #[test]
    fn present_mode_preference_order() {
        assert_eq!(
            choose_present_mode(&[
                vk::PresentModeKHR::FIFO,
                vk::PresentModeKHR::MAILBOX,
                vk::PresentModeKHR::IMMEDIATE,
            ]),
            vk::PresentModeKHR::MAILBOX
        );
        assert_eq!(
            choose_present_mode(&[vk::PresentModeKHR::FIFO, vk::PresentModeKHR::IMMEDIATE]),
            vk::PresentModeKHR::IMMEDIATE
        );
        assert_eq!(
            choose_present_mode(&[vk::PresentModeKHR::FIFO]),
            vk::PresentModeKHR::FIFO
        );
    }

    #[test]
    fn requested_extent_is_clamped_into_the_supported_range() {
        let mut capabilities = vk::SurfaceCapabilitiesKHR::default();
        capabilities.current_extent = vk::Extent2D {
            width: 640,
            height: 480,
        };
        capabilities.min_image_extent = vk::Extent2D {
            width: 100,
            height: 100,
        };
        capabilities.max_image_extent = vk::Extent2D {
            width: 400,
            height: 400,
        };

        let extent = compute_extent(&capabilities, 500, 50);
        assert_eq!(extent.width, 400);
        assert_eq!(extent.height, 100);

        let extent = compute_extent(&capabilities, 250, 250);
        assert_eq!(extent.width, 250);
        assert_eq!(extent.height, 250);
    }

    #[test]
    fn sentinel_extent_uses_the_maximum_reported() {
        let mut capabilities = vk::SurfaceCapabilitiesKHR::default();
        capabilities.current_extent = vk::Extent2D {
            width: u32::MAX,
            height: u32::MAX,
        };
        capabilities.min_image_extent = vk::Extent2D {
            width: 100,
            height: 100,
        };
        capabilities.max_image_extent = vk::Extent2D {
            width: 400,
            height: 400,
        };

        let extent = compute_extent(&capabilities, 250, 250);
        assert_eq!(extent.width, 400);
        assert_eq!(extent.height, 400);
    }
}
