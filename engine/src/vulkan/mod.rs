use anyhow::Result;
use log::*;
use vulkanalia::vk::{self, DeviceV1_0};
use winit::window::Window;

use crate::assets::ImageData;
use crate::mesh::Mesh;
use crate::scene::SceneUniform;
use crate::EngineConfig;

mod buffer;
mod command;
mod constants;
mod device;
mod frame;
mod instance;
mod pipeline;
mod swapchain;
mod texture;

use buffer::DataBuffer;
use device::VulkanDevice;
use frame::FrameOrchestrator;
use instance::VulkanInstance;
use pipeline::VulkanPipeline;
use swapchain::VulkanSwapchain;
use texture::Texture;

/// The whole Vulkan side, built in dependency order and torn down in
/// reverse. Each stage only sees stages created before it.
pub struct VulkanRenderer {
    instance: VulkanInstance,
    device: VulkanDevice,
    swapchain: VulkanSwapchain,
    pipeline: VulkanPipeline,
    vertices: DataBuffer,
    vertex_count: u32,
    texture: Texture,
    frames: FrameOrchestrator,
}

impl VulkanRenderer {
    pub unsafe fn new(
        window: &Window,
        config: &EngineConfig,
        mesh: &Mesh,
        image: &ImageData,
    ) -> Result<VulkanRenderer> {
        let instance = VulkanInstance::new(window, &config.title)?;
        let surface = swapchain::bind_surface(&instance, window)?;
        let device = VulkanDevice::new(&instance.entry, &instance, surface)?;
        let mut swapchain =
            VulkanSwapchain::new(&instance, &device, surface, config.width, config.height)?;
        let pipeline = VulkanPipeline::new(
            &device,
            swapchain.format,
            &config.vertex_shader,
            &config.fragment_shader,
        )?;
        swapchain.create_framebuffers(&device, pipeline.render_pass)?;

        let vertices = DataBuffer::new(
            &device,
            mesh.byte_len() as u64,
            vk::BufferUsageFlags::VERTEX_BUFFER,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        )?;
        vertices.update(&device, mesh.bytes())?;

        let texture = Texture::new(&device, image)?;
        let frames = FrameOrchestrator::new(&device, &pipeline, &texture, swapchain.images.len())?;

        info!("Renderer initialized.");

        Ok(VulkanRenderer {
            instance,
            device,
            swapchain,
            pipeline,
            vertices,
            vertex_count: mesh.vertex_count(),
            texture,
            frames,
        })
    }

    pub unsafe fn render(&mut self, uniform: &SceneUniform) -> Result<()> {
        self.frames.render(
            &self.device,
            &self.swapchain,
            &self.pipeline,
            &self.vertices,
            self.vertex_count,
            uniform,
        )
    }

    pub fn aspect_ratio(&self) -> f32 {
        self.swapchain.aspect_ratio()
    }

    pub unsafe fn destroy(&mut self) {
        // The GPU must be idle before anything it may reference goes away.
        if self.device.vk_device.device_wait_idle().is_err() {
            warn!("device_wait_idle failed during teardown.");
        }

        self.frames.destroy(&self.device);
        self.texture.destroy(&self.device);
        self.vertices.destroy(&self.device);
        self.pipeline.destroy(&self.device);
        self.swapchain.destroy(&self.instance, &self.device);
        self.device.destroy();
        self.instance.destroy();
    }
}
