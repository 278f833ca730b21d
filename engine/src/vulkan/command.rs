use anyhow::Result;
use thiserror::Error;
use vulkanalia::vk::{self, DeviceV1_0, Handle, HasBuilder};

use super::device::VulkanDevice;

/// The transition table below is closed: a pair outside it is a code
/// defect, not a runtime condition.
#[derive(Debug, Error)]
#[error("no transition rule for {old:?} -> {new:?}")]
pub struct UnsupportedTransition {
    pub old: vk::ImageLayout,
    pub new: vk::ImageLayout,
}

type TransitionMasks = (
    vk::AccessFlags,
    vk::AccessFlags,
    vk::PipelineStageFlags,
    vk::PipelineStageFlags,
);

/// Source/destination access masks and pipeline stages for every layout
/// pair this renderer performs.
pub(crate) fn transition_masks(
    old: vk::ImageLayout,
    new: vk::ImageLayout,
) -> Result<TransitionMasks, UnsupportedTransition> {
    match (old, new) {
        (vk::ImageLayout::PREINITIALIZED, vk::ImageLayout::TRANSFER_SRC_OPTIMAL) => Ok((
            vk::AccessFlags::HOST_WRITE,
            vk::AccessFlags::TRANSFER_READ,
            vk::PipelineStageFlags::HOST,
            vk::PipelineStageFlags::TRANSFER,
        )),
        (vk::ImageLayout::PREINITIALIZED, vk::ImageLayout::TRANSFER_DST_OPTIMAL) => Ok((
            vk::AccessFlags::HOST_WRITE,
            vk::AccessFlags::TRANSFER_WRITE,
            vk::PipelineStageFlags::HOST,
            vk::PipelineStageFlags::TRANSFER,
        )),
        (vk::ImageLayout::UNDEFINED, vk::ImageLayout::TRANSFER_DST_OPTIMAL) => Ok((
            vk::AccessFlags::empty(),
            vk::AccessFlags::TRANSFER_WRITE,
            vk::PipelineStageFlags::TOP_OF_PIPE,
            vk::PipelineStageFlags::TRANSFER,
        )),
        // Fresh swapchain images; no hazard because they hold no data yet.
        (vk::ImageLayout::UNDEFINED, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL) => Ok((
            vk::AccessFlags::empty(),
            vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
            vk::PipelineStageFlags::TOP_OF_PIPE,
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
        )),
        (vk::ImageLayout::TRANSFER_DST_OPTIMAL, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL) => Ok((
            vk::AccessFlags::TRANSFER_WRITE,
            vk::AccessFlags::SHADER_READ,
            vk::PipelineStageFlags::TRANSFER,
            vk::PipelineStageFlags::FRAGMENT_SHADER,
        )),
        _ => Err(UnsupportedTransition { old, new }),
    }
}

/// Allocates and begins a command buffer flagged for a single use.
pub unsafe fn begin_one_shot(device: &VulkanDevice) -> Result<vk::CommandBuffer> {
    let info = vk::CommandBufferAllocateInfo::builder()
        .level(vk::CommandBufferLevel::PRIMARY)
        .command_pool(device.command_pool)
        .command_buffer_count(1);
    let command_buffer = device.vk_device.allocate_command_buffers(&info)?[0];

    let info =
        vk::CommandBufferBeginInfo::builder().flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
    device.vk_device.begin_command_buffer(command_buffer, &info)?;

    Ok(command_buffer)
}

/// Submits with no semaphores and blocks until the queue drains.
/// Setup-time only; never called inside the frame loop.
pub unsafe fn submit_and_wait(device: &VulkanDevice, command_buffer: vk::CommandBuffer) -> Result<()> {
    device.vk_device.end_command_buffer(command_buffer)?;

    let command_buffers = &[command_buffer];
    let info = vk::SubmitInfo::builder().command_buffers(command_buffers);

    device
        .vk_device
        .queue_submit(device.graphics_queue, &[info], vk::Fence::null())?;
    device.vk_device.queue_wait_idle(device.graphics_queue)?;

    device
        .vk_device
        .free_command_buffers(device.command_pool, &[command_buffer]);

    Ok(())
}

pub unsafe fn transition_image_layout(
    device: &VulkanDevice,
    image: vk::Image,
    aspects: vk::ImageAspectFlags,
    old_layout: vk::ImageLayout,
    new_layout: vk::ImageLayout,
) -> Result<()> {
    let (src_access, dst_access, src_stage, dst_stage) = transition_masks(old_layout, new_layout)?;

    let command_buffer = begin_one_shot(device)?;

    let subresource = vk::ImageSubresourceRange::builder()
        .aspect_mask(aspects)
        .base_mip_level(0)
        .level_count(1)
        .base_array_layer(0)
        .layer_count(1);

    let barrier = vk::ImageMemoryBarrier::builder()
        .old_layout(old_layout)
        .new_layout(new_layout)
        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .image(image)
        .subresource_range(subresource)
        .src_access_mask(src_access)
        .dst_access_mask(dst_access);

    device.vk_device.cmd_pipeline_barrier(
        command_buffer,
        src_stage,
        dst_stage,
        vk::DependencyFlags::empty(),
        &[] as &[vk::MemoryBarrier],
        &[] as &[vk::BufferMemoryBarrier],
        &[barrier],
    );

    submit_and_wait(device, command_buffer)
}

/// Single full-extent color copy, used for the staging -> sampled
/// texture upload.
pub unsafe fn copy_image(
    device: &VulkanDevice,
    src: vk::Image,
    dst: vk::Image,
    width: u32,
    height: u32,
) -> Result<()> {
    let command_buffer = begin_one_shot(device)?;

    let subresource = vk::ImageSubresourceLayers::builder()
        .aspect_mask(vk::ImageAspectFlags::COLOR)
        .mip_level(0)
        .base_array_layer(0)
        .layer_count(1)
        .build();

    let region = vk::ImageCopy::builder()
        .src_subresource(subresource)
        .dst_subresource(subresource)
        .src_offset(vk::Offset3D { x: 0, y: 0, z: 0 })
        .dst_offset(vk::Offset3D { x: 0, y: 0, z: 0 })
        .extent(vk::Extent3D {
            width,
            height,
            depth: 1,
        });

    device.vk_device.cmd_copy_image(
        command_buffer,
        src,
        vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
        dst,
        vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        &[region],
    );

    submit_and_wait(device, command_buffer)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enumerated_pairs_have_rules() {
        let pairs = [
            (
                vk::ImageLayout::PREINITIALIZED,
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
            ),
            (
                vk::ImageLayout::PREINITIALIZED,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            ),
            (
                vk::ImageLayout::UNDEFINED,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            ),
            (
                vk::ImageLayout::UNDEFINED,
                vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            ),
            (
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            ),
        ];
        for (old, new) in pairs {
            assert!(transition_masks(old, new).is_ok(), "{old:?} -> {new:?}");
        }
    }

    #[test]
    fn staging_upload_waits_on_host_writes() {
        let (src_access, _, src_stage, _) = transition_masks(
            vk::ImageLayout::PREINITIALIZED,
            vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
        )
        .unwrap();
        assert_eq!(src_access, vk::AccessFlags::HOST_WRITE);
        assert_eq!(src_stage, vk::PipelineStageFlags::HOST);
    }

    #[test]
    fn unlisted_pair_is_rejected() {
        let err = transition_masks(
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            vk::ImageLayout::PREINITIALIZED,
        )
        .unwrap_err();
        assert_eq!(err.old, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);
        assert_eq!(err.new, vk::ImageLayout::PREINITIALIZED);
    }
}
