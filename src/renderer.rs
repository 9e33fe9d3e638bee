// =============================================================================
// RENDERER - everything between the window and the frame loop
// =============================================================================
//
// Builds every Vulkan object once, in dependency order, and registers each
// one with the deletion queue as it goes:
//
//   instance -> debug messenger -> surface -> device -> allocator
//     -> swapchain + views -> command pool -> frame sync
//     -> shader modules -> render pass -> pipeline -> framebuffers
//     -> vertex buffer -> command buffers (recorded once)
//
// Teardown is the same list backwards. If any step fails, the queue releases
// whatever was already built before the error reaches the caller.

use anyhow::{Context, Result};
use ash::vk;
use std::path::Path;
use winit::window::Window;

use crate::backend::debug::{self, DebugSink};
use crate::backend::lifetime::ResourceKind;
use crate::backend::shader::{self, ShaderStage};
use crate::backend::{buffer, pipeline};
use crate::backend::{DeletionQueue, FrameSync, Swapchain, SwapchainTimeline, VulkanDevice};
use crate::config::Config;
use crate::frame::{FrameError, FrameLoop, FrameOutcome};

/// What the recorded command buffers draw with.
struct DrawTargets<'a> {
    render_pass: vk::RenderPass,
    framebuffers: &'a [vk::Framebuffer],
    pipeline: vk::Pipeline,
    vertex_buffer: vk::Buffer,
    extent: vk::Extent2D,
    clear_color: [f32; 4],
}

pub struct Renderer {
    frame_loop: FrameLoop<vk::CommandBuffer>,
    frame_sync: Vec<FrameSync>,
    swapchain: Swapchain,
    device: VulkanDevice,
    teardown: DeletionQueue,
}

impl Renderer {
    pub fn new(window: &Window, config: &Config) -> Result<Self> {
        log::info!("Initializing Vulkan...");
        let mut teardown = DeletionQueue::new();

        // Step 1: Device, surface and validation
        let debug_sink = debug_sink(config)?;
        let device = VulkanDevice::new(
            window,
            &config.window.title,
            debug_sink,
            config.debug.verbose_validation,
            &mut teardown,
        )?;
        let allocator = buffer::create_allocator(&device, &mut teardown)?;

        // Step 2: Swapchain
        let size = window.inner_size();
        let swapchain = Swapchain::new(
            &device,
            size.width,
            size.height,
            config.present_mode(),
            &mut teardown,
        )?;

        // Step 3: Command pool and per-slot sync objects
        let command_pool = create_command_pool(&device, &mut teardown)?;
        let frame_sync = (0..config.graphics.frames_in_flight.max(1))
            .map(|_| FrameSync::new(&device, &mut teardown))
            .collect::<Result<Vec<_>>>()?;

        // Step 4: Pipeline
        let resource_dir = Path::new(&config.resources.dir);
        let vert_code = shader::load_stage(resource_dir, ShaderStage::Vertex)?;
        let frag_code = shader::load_stage(resource_dir, ShaderStage::Fragment)?;
        let vert_shader = shader::create_shader_module(&device, &vert_code, &mut teardown)?;
        let frag_shader = shader::create_shader_module(&device, &frag_code, &mut teardown)?;

        let render_pass = pipeline::create_render_pass(&device, swapchain.format, &mut teardown)?;
        let graphics_pipeline = pipeline::create_graphics_pipeline(
            &device,
            render_pass,
            swapchain.extent,
            vert_shader,
            frag_shader,
            &mut teardown,
        )?;
        let framebuffers = pipeline::create_framebuffers(
            &device,
            &swapchain.image_views,
            render_pass,
            swapchain.extent,
            &mut teardown,
        )?;

        // Step 5: Geometry
        let vertex_buffer = buffer::upload_vertex_buffer(
            &device,
            &allocator,
            &pipeline::TRIANGLE_VERTICES,
            &mut teardown,
        )?;
        drop(allocator);

        // Step 6: One command buffer per swapchain image, recorded once
        let command_buffers =
            allocate_command_buffers(&device, command_pool, swapchain.image_count())?;
        record_command_buffers(
            &device.device,
            &command_buffers,
            &DrawTargets {
                render_pass,
                framebuffers: &framebuffers,
                pipeline: graphics_pipeline,
                vertex_buffer,
                extent: swapchain.extent,
                clear_color: config.graphics.clear_color,
            },
        )?;

        let frame_loop = FrameLoop::new(frame_sync.len(), command_buffers);

        log::info!(
            "Vulkan initialized: {} swapchain images ({:?}), {} frames in flight, {} handles owned",
            swapchain.image_count(),
            swapchain.present_mode,
            frame_loop.frames_in_flight(),
            teardown.len()
        );

        Ok(Self {
            frame_loop,
            frame_sync,
            swapchain,
            device,
            teardown,
        })
    }

    /// Render one frame. Every error is fatal to the application.
    pub fn draw_frame(&mut self) -> Result<FrameOutcome, FrameError> {
        let mut timeline = SwapchainTimeline::new(&self.device, &self.swapchain, &self.frame_sync);
        self.frame_loop.draw(&mut timeline)
    }

    pub fn frames_presented(&self) -> u64 {
        self.frame_loop.frames_presented()
    }
}

impl Drop for Renderer {
    fn drop(&mut self) {
        log::info!("Cleaning up Vulkan resources...");

        // Nothing may be destroyed while the GPU still uses it
        if let Err(e) = self.device.wait_idle() {
            log::warn!("Device wait failed during cleanup: {:#}", e);
        }
        self.teardown.flush();

        log::info!("Cleanup complete");
    }
}

/// Validation output goes to the log, and to a file when configured.
fn debug_sink(config: &Config) -> Result<Option<DebugSink>> {
    if !config.validation_enabled() {
        return Ok(None);
    }

    let sink = if config.debug.log_to_file {
        debug::file_sink(Path::new(&config.debug.log_file))?
    } else {
        debug::log_sink()
    };
    Ok(Some(sink))
}

fn create_command_pool(device: &VulkanDevice, teardown: &mut DeletionQueue) -> Result<vk::CommandPool> {
    // No RESET flag: buffers are recorded once and never reset
    let pool_info =
        vk::CommandPoolCreateInfo::default().queue_family_index(device.queue_families.graphics);

    let pool = unsafe { device.device.create_command_pool(&pool_info, None) }
        .context("Failed to create command pool")?;

    // Destroying the pool also frees its command buffers
    let owner = device.device.clone();
    teardown.push(ResourceKind::CommandPool, move || unsafe {
        owner.destroy_command_pool(pool, None);
    })?;

    Ok(pool)
}

fn allocate_command_buffers(
    device: &VulkanDevice,
    pool: vk::CommandPool,
    count: usize,
) -> Result<Vec<vk::CommandBuffer>> {
    let alloc_info = vk::CommandBufferAllocateInfo::default()
        .command_pool(pool)
        .level(vk::CommandBufferLevel::PRIMARY)
        .command_buffer_count(count as u32);

    unsafe { device.device.allocate_command_buffers(&alloc_info) }
        .context("Failed to allocate command buffers")
}

/// Record the whole frame into each command buffer.
///
/// SIMULTANEOUS_USE lets a buffer be resubmitted while an earlier submission
/// of it is still pending, which happens when two slots acquire the same image.
fn record_command_buffers(
    device: &ash::Device,
    command_buffers: &[vk::CommandBuffer],
    targets: &DrawTargets<'_>,
) -> Result<()> {
    let clear_values = [vk::ClearValue {
        color: vk::ClearColorValue {
            float32: targets.clear_color,
        },
    }];
    let render_area = vk::Rect2D {
        offset: vk::Offset2D { x: 0, y: 0 },
        extent: targets.extent,
    };

    for (&cmd, &framebuffer) in command_buffers.iter().zip(targets.framebuffers) {
        let begin_info = vk::CommandBufferBeginInfo::default()
            .flags(vk::CommandBufferUsageFlags::SIMULTANEOUS_USE);

        let render_pass_info = vk::RenderPassBeginInfo::default()
            .render_pass(targets.render_pass)
            .framebuffer(framebuffer)
            .render_area(render_area)
            .clear_values(&clear_values);

        unsafe {
            device
                .begin_command_buffer(cmd, &begin_info)
                .context("Failed to begin command buffer")?;

            device.cmd_begin_render_pass(cmd, &render_pass_info, vk::SubpassContents::INLINE);
            device.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, targets.pipeline);
            device.cmd_bind_vertex_buffers(cmd, 0, &[targets.vertex_buffer], &[0]);
            device.cmd_draw(cmd, pipeline::TRIANGLE_VERTICES.len() as u32, 1, 0, 0);
            device.cmd_end_render_pass(cmd);

            device
                .end_command_buffer(cmd)
                .context("Failed to end command buffer")?;
        }
    }

    log::info!("Recorded {} command buffers", command_buffers.len());
    Ok(())
}
