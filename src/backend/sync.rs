// Synchronization primitives
//
// Fences, semaphores for GPU-CPU and GPU-GPU sync, and the Vulkan side of
// the frame timeline that drives them.

use anyhow::{Context, Result};
use ash::vk;

use super::device::VulkanDevice;
use super::lifetime::{DeletionQueue, ResourceKind};
use super::swapchain::{Acquired, Swapchain};
use crate::frame::{FrameError, FrameTimeline};

/// Submissions wait for the acquired image only where color is written.
const WAIT_STAGES: [vk::PipelineStageFlags; 1] = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];

/// Frame synchronization - one per frame in flight
pub struct FrameSync {
    pub image_available: vk::Semaphore,
    pub render_finished: vk::Semaphore,
    pub in_flight_fence: vk::Fence,
}

impl FrameSync {
    pub fn new(device: &VulkanDevice, teardown: &mut DeletionQueue) -> Result<Self> {
        Ok(Self {
            image_available: Self::create_semaphore(device, teardown)?,
            render_finished: Self::create_semaphore(device, teardown)?,
            in_flight_fence: Self::create_fence(device, teardown)?,
        })
    }

    fn create_semaphore(device: &VulkanDevice, teardown: &mut DeletionQueue) -> Result<vk::Semaphore> {
        let semaphore_info = vk::SemaphoreCreateInfo::default();
        let semaphore = unsafe { device.device.create_semaphore(&semaphore_info, None) }
            .context("Failed to create semaphore")?;

        let owner = device.device.clone();
        teardown.push(ResourceKind::FrameSync, move || unsafe {
            owner.destroy_semaphore(semaphore, None);
        })?;
        Ok(semaphore)
    }

    fn create_fence(device: &VulkanDevice, teardown: &mut DeletionQueue) -> Result<vk::Fence> {
        // Start signaled so the first wait on each slot returns at once
        let fence_info = vk::FenceCreateInfo::default().flags(vk::FenceCreateFlags::SIGNALED);
        let fence = unsafe { device.device.create_fence(&fence_info, None) }
            .context("Failed to create fence")?;

        let owner = device.device.clone();
        teardown.push(ResourceKind::FrameSync, move || unsafe {
            owner.destroy_fence(fence, None);
        })?;
        Ok(fence)
    }
}

/// Frame timeline backed by the real device, swapchain and sync objects.
pub struct SwapchainTimeline<'a> {
    device: &'a VulkanDevice,
    swapchain: &'a Swapchain,
    frames: &'a [FrameSync],
}

impl<'a> SwapchainTimeline<'a> {
    pub fn new(device: &'a VulkanDevice, swapchain: &'a Swapchain, frames: &'a [FrameSync]) -> Self {
        Self {
            device,
            swapchain,
            frames,
        }
    }
}

impl FrameTimeline for SwapchainTimeline<'_> {
    type CommandBuffer = vk::CommandBuffer;

    fn wait_for_slot(&mut self, slot: usize) -> Result<(), FrameError> {
        let fences = [self.frames[slot].in_flight_fence];
        unsafe { self.device.device.wait_for_fences(&fences, true, u64::MAX) }.map_err(|result| {
            FrameError::Device {
                stage: "fence wait",
                result,
            }
        })
    }

    fn reset_slot(&mut self, slot: usize) -> Result<(), FrameError> {
        let fences = [self.frames[slot].in_flight_fence];
        unsafe { self.device.device.reset_fences(&fences) }.map_err(|result| FrameError::Device {
            stage: "fence reset",
            result,
        })
    }

    fn acquire_image(&mut self, slot: usize) -> Result<Acquired, FrameError> {
        self.swapchain
            .acquire_next_image(self.frames[slot].image_available)
            .map_err(FrameError::Acquire)
    }

    fn submit(&mut self, slot: usize, command_buffer: vk::CommandBuffer) -> Result<(), FrameError> {
        let sync = &self.frames[slot];
        let wait_semaphores = [sync.image_available];
        let signal_semaphores = [sync.render_finished];
        let command_buffers = [command_buffer];

        let submit_info = vk::SubmitInfo::default()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&WAIT_STAGES)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores);

        unsafe {
            self.device.device.queue_submit(
                self.device.graphics_queue,
                &[submit_info],
                sync.in_flight_fence,
            )
        }
        .map_err(|result| FrameError::Device {
            stage: "queue submit",
            result,
        })
    }

    fn present(&mut self, slot: usize, image_index: u32) -> Result<(), FrameError> {
        let wait_semaphores = [self.frames[slot].render_finished];
        match self
            .swapchain
            .present(self.device.present_queue, image_index, &wait_semaphores)
        {
            Ok(false) => Ok(()),
            Ok(true) => {
                log::debug!("Presented image {} on a suboptimal swapchain", image_index);
                Ok(())
            }
            // No recreation path; the next acquire reports it for real.
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                log::warn!("Swapchain out of date after presenting image {}", image_index);
                Ok(())
            }
            Err(result) => Err(FrameError::Device {
                stage: "present",
                result,
            }),
        }
    }
}
