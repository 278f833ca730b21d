use anyhow::Result;
use log::*;
use vulkanalia::vk::{self, DeviceV1_0, Handle, HasBuilder, KhrSwapchainExtension};

use super::buffer::DataBuffer;
use super::constants;
use super::device::VulkanDevice;
use super::pipeline::VulkanPipeline;
use super::swapchain::VulkanSwapchain;
use super::texture::Texture;
use crate::scene::SceneUniform;

/// Everything one in-flight frame owns: its uniform buffer, the
/// descriptor set pointing at it, a command buffer and the three
/// synchronization objects of the acquire/submit/present chain.
struct FrameSlot {
    uniform: DataBuffer,
    descriptor_set: vk::DescriptorSet,
    command_buffer: vk::CommandBuffer,
    image_available: vk::Semaphore,
    render_finished: vk::Semaphore,
    in_flight: vk::Fence,
}

/// Rotates through `MAX_FRAMES_IN_FLIGHT` slots so the CPU can prepare
/// one frame while the GPU finishes the previous one. The in-flight
/// fence gates every per-slot resource, including the uniform buffer,
/// so nothing is rewritten while the GPU may still read it.
pub struct FrameOrchestrator {
    descriptor_pool: vk::DescriptorPool,
    slots: Vec<FrameSlot>,
    /// Fence of the slot last submitted against each swapchain image,
    /// null until the image has been used once.
    images_in_flight: Vec<vk::Fence>,
    current: usize,
}

impl FrameOrchestrator {
    pub unsafe fn new(
        device: &VulkanDevice,
        pipeline: &VulkanPipeline,
        texture: &Texture,
        image_count: usize,
    ) -> Result<FrameOrchestrator> {
        let count = constants::MAX_FRAMES_IN_FLIGHT as u32;

        let ubo_size = vk::DescriptorPoolSize::builder()
            .type_(vk::DescriptorType::UNIFORM_BUFFER)
            .descriptor_count(count);
        let sampler_size = vk::DescriptorPoolSize::builder()
            .type_(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
            .descriptor_count(count);
        let pool_sizes = &[ubo_size, sampler_size];
        let info = vk::DescriptorPoolCreateInfo::builder()
            .pool_sizes(pool_sizes)
            .max_sets(count);
        let descriptor_pool = device.vk_device.create_descriptor_pool(&info, None)?;

        let set_layouts = vec![pipeline.descriptor_set_layout; constants::MAX_FRAMES_IN_FLIGHT];
        let info = vk::DescriptorSetAllocateInfo::builder()
            .descriptor_pool(descriptor_pool)
            .set_layouts(&set_layouts);
        let descriptor_sets = device.vk_device.allocate_descriptor_sets(&info)?;

        let info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(device.command_pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(count);
        let command_buffers = device.vk_device.allocate_command_buffers(&info)?;

        let mut slots = Vec::with_capacity(constants::MAX_FRAMES_IN_FLIGHT);
        for frame in 0..constants::MAX_FRAMES_IN_FLIGHT {
            let uniform = DataBuffer::new(
                device,
                std::mem::size_of::<SceneUniform>() as u64,
                vk::BufferUsageFlags::UNIFORM_BUFFER,
                vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
            )?;

            let buffer_info = vk::DescriptorBufferInfo::builder()
                .buffer(uniform.buffer)
                .offset(0)
                .range(uniform.range);
            let buffer_infos = &[buffer_info];
            let ubo_write = vk::WriteDescriptorSet::builder()
                .dst_set(descriptor_sets[frame])
                .dst_binding(0)
                .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
                .buffer_info(buffer_infos);

            let image_info = vk::DescriptorImageInfo::builder()
                .image_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)
                .image_view(texture.view)
                .sampler(texture.sampler);
            let image_infos = &[image_info];
            let sampler_write = vk::WriteDescriptorSet::builder()
                .dst_set(descriptor_sets[frame])
                .dst_binding(1)
                .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
                .image_info(image_infos);

            device
                .vk_device
                .update_descriptor_sets(&[ubo_write, sampler_write], &[] as &[vk::CopyDescriptorSet]);

            let semaphore_info = vk::SemaphoreCreateInfo::builder();
            // Signaled so the first wait on a never-submitted slot passes.
            let fence_info = vk::FenceCreateInfo::builder().flags(vk::FenceCreateFlags::SIGNALED);

            slots.push(FrameSlot {
                uniform,
                descriptor_set: descriptor_sets[frame],
                command_buffer: command_buffers[frame],
                image_available: device.vk_device.create_semaphore(&semaphore_info, None)?,
                render_finished: device.vk_device.create_semaphore(&semaphore_info, None)?,
                in_flight: device.vk_device.create_fence(&fence_info, None)?,
            });
        }

        info!(
            "Frame orchestration ready: {} slots over {} swapchain images.",
            constants::MAX_FRAMES_IN_FLIGHT,
            image_count
        );

        Ok(FrameOrchestrator {
            descriptor_pool,
            slots,
            images_in_flight: vec![vk::Fence::null(); image_count],
            current: 0,
        })
    }

    /// One pass of the frame protocol: fence wait, acquire, per-image
    /// fence wait, uniform update, record, submit, present, advance.
    pub unsafe fn render(
        &mut self,
        device: &VulkanDevice,
        swapchain: &VulkanSwapchain,
        pipeline: &VulkanPipeline,
        vertices: &DataBuffer,
        vertex_count: u32,
        uniform: &SceneUniform,
    ) -> Result<()> {
        let slot = &self.slots[self.current];

        wait_bounded(device, slot.in_flight)?;

        let (image_index, _) = device.vk_device.acquire_next_image_khr(
            swapchain.swapchain,
            u64::MAX,
            slot.image_available,
            vk::Fence::null(),
        )?;
        let image_index = image_index as usize;

        // A previous slot may still be rendering into this image.
        let previous_owner = claim_image(&mut self.images_in_flight, image_index, slot.in_flight);
        if !previous_owner.is_null() {
            wait_bounded(device, previous_owner)?;
        }

        // Safe to rewrite now that the fence proved the GPU is done
        // with this slot.
        slot.uniform.update(device, uniform.bytes())?;

        record_commands(
            device,
            swapchain,
            pipeline,
            slot,
            vertices,
            vertex_count,
            image_index,
        )?;

        device.vk_device.reset_fences(&[slot.in_flight])?;

        let wait_semaphores = &[slot.image_available];
        let wait_stages = &[vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let command_buffers = &[slot.command_buffer];
        let signal_semaphores = &[slot.render_finished];
        let submit_info = vk::SubmitInfo::builder()
            .wait_semaphores(wait_semaphores)
            .wait_dst_stage_mask(wait_stages)
            .command_buffers(command_buffers)
            .signal_semaphores(signal_semaphores);

        device
            .vk_device
            .queue_submit(device.graphics_queue, &[submit_info], slot.in_flight)?;

        let swapchains = &[swapchain.swapchain];
        let image_indices = &[image_index as u32];
        let present_info = vk::PresentInfoKHR::builder()
            .wait_semaphores(signal_semaphores)
            .swapchains(swapchains)
            .image_indices(image_indices);

        device
            .vk_device
            .queue_present_khr(device.present_queue, &present_info)?;

        self.current = (self.current + 1) % constants::MAX_FRAMES_IN_FLIGHT;

        Ok(())
    }

    pub unsafe fn destroy(&mut self, device: &VulkanDevice) {
        for slot in &self.slots {
            device.vk_device.destroy_fence(slot.in_flight, None);
            device.vk_device.destroy_semaphore(slot.render_finished, None);
            device.vk_device.destroy_semaphore(slot.image_available, None);
            slot.uniform.destroy(device);
        }
        device
            .vk_device
            .destroy_descriptor_pool(self.descriptor_pool, None);
    }
}

/// Records `fence` as the owner of the swapchain image at `image_index`
/// and returns the previous owner, null when the image was free. The
/// caller must wait on a non-null previous owner before rendering into
/// the image.
fn claim_image(
    images_in_flight: &mut [vk::Fence],
    image_index: usize,
    fence: vk::Fence,
) -> vk::Fence {
    let previous = images_in_flight[image_index];
    images_in_flight[image_index] = fence;
    previous
}

/// Waits in bounded slices so a wedged GPU cannot hang the process
/// silently; only a TIMEOUT result loops.
unsafe fn wait_bounded(device: &VulkanDevice, fence: vk::Fence) -> Result<()> {
    loop {
        match device
            .vk_device
            .wait_for_fences(&[fence], true, constants::FENCE_TIMEOUT_NS)
        {
            Ok(vk::SuccessCode::TIMEOUT) => continue,
            Ok(_) => return Ok(()),
            Err(e) => return Err(e.into()),
        }
    }
}

unsafe fn record_commands(
    device: &VulkanDevice,
    swapchain: &VulkanSwapchain,
    pipeline: &VulkanPipeline,
    slot: &FrameSlot,
    vertices: &DataBuffer,
    vertex_count: u32,
    image_index: usize,
) -> Result<()> {
    // Begin on a pool with RESET_COMMAND_BUFFER implicitly resets.
    let info = vk::CommandBufferBeginInfo::builder();
    device
        .vk_device
        .begin_command_buffer(slot.command_buffer, &info)?;

    let color_clear = vk::ClearValue {
        color: vk::ClearColorValue {
            float32: [0.0, 0.0, 0.0, 1.0],
        },
    };
    let depth_clear = vk::ClearValue {
        depth_stencil: vk::ClearDepthStencilValue {
            depth: 1.0,
            stencil: 0,
        },
    };
    let clear_values = &[color_clear, depth_clear];

    let render_area = vk::Rect2D {
        offset: vk::Offset2D { x: 0, y: 0 },
        extent: swapchain.extent,
    };
    let info = vk::RenderPassBeginInfo::builder()
        .render_pass(pipeline.render_pass)
        .framebuffer(swapchain.framebuffers[image_index])
        .render_area(render_area)
        .clear_values(clear_values);

    device.vk_device.cmd_begin_render_pass(
        slot.command_buffer,
        &info,
        vk::SubpassContents::INLINE,
    );

    let viewport = vk::Viewport {
        x: 0.0,
        y: 0.0,
        width: swapchain.extent.width as f32,
        height: swapchain.extent.height as f32,
        min_depth: 0.0,
        max_depth: 1.0,
    };
    device
        .vk_device
        .cmd_set_viewport(slot.command_buffer, 0, &[viewport]);
    device
        .vk_device
        .cmd_set_scissor(slot.command_buffer, 0, &[render_area]);

    device.vk_device.cmd_bind_pipeline(
        slot.command_buffer,
        vk::PipelineBindPoint::GRAPHICS,
        pipeline.pipeline,
    );
    device
        .vk_device
        .cmd_bind_vertex_buffers(slot.command_buffer, 0, &[vertices.buffer], &[0]);
    device.vk_device.cmd_bind_descriptor_sets(
        slot.command_buffer,
        vk::PipelineBindPoint::GRAPHICS,
        pipeline.pipeline_layout,
        0,
        &[slot.descriptor_set],
        &[],
    );
    device
        .vk_device
        .cmd_draw(slot.command_buffer, vertex_count, 1, 0, 0);

    device.vk_device.cmd_end_render_pass(slot.command_buffer);
    device.vk_device.end_command_buffer(slot.command_buffer)?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn image_claim_reports_the_previous_owner() {
        let mut images = vec![vk::Fence::null(); 2];
        let first = vk::Fence::from_raw(1);
        let second = vk::Fence::from_raw(2);

        assert!(claim_image(&mut images, 0, first).is_null());
        assert_eq!(claim_image(&mut images, 0, second), first);
        assert_eq!(images[0], second);
        assert!(images[1].is_null());
    }

    // Models the per-frame protocol over more frames than slots: the
    // slot's own fence is waited at the top of every frame, and a
    // non-null claim result is waited before the image is reused. Under
    // those two waits no slot ever carries two unresolved submissions.
    #[test]
    fn slots_never_carry_two_unresolved_submissions() {
        const SLOTS: usize = constants::MAX_FRAMES_IN_FLIGHT;
        let fences = [vk::Fence::from_raw(1), vk::Fence::from_raw(2)];
        let mut images = vec![vk::Fence::null(); 3];
        let mut unresolved = [false; SLOTS];
        let mut current = 0;

        for frame in 0..12 {
            // Waiting the slot's own fence resolves its previous use.
            unresolved[current] = false;

            let image_index = frame % images.len();
            let previous = claim_image(&mut images, image_index, fences[current]);
            for (slot, &fence) in fences.iter().enumerate() {
                if previous == fence {
                    unresolved[slot] = false;
                }
            }

            assert!(
                !unresolved[current],
                "slot {current} reused while in flight"
            );
            unresolved[current] = true;
            current = (current + 1) % SLOTS;
        }
    }
}
