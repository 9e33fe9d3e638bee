// Graphics pipeline creation
//
// The graphics pipeline defines how vertices are processed and rasterized.
// It includes: vertex input, shaders, rasterization and blending. There is
// no depth buffer, no descriptor set and no push constant; the triangle is
// drawn straight into the swapchain image.

use anyhow::{Context, Result};
use ash::vk;
use bytemuck::{Pod, Zeroable};
use glam::{Vec2, Vec3};
use std::mem::{offset_of, size_of};

use super::device::VulkanDevice;
use super::lifetime::{DeletionQueue, ResourceKind};
use super::shader::ShaderStage;

/// Interleaved vertex: clip-space position then RGB color.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    pub pos: Vec2,
    pub color: Vec3,
}

impl Vertex {
    pub const fn new(pos: Vec2, color: Vec3) -> Self {
        Self { pos, color }
    }
}

const GREEN: Vec3 = Vec3::new(0.0, 1.0, 0.0);

/// Clockwise in clip space, which is the front face below.
pub const TRIANGLE_VERTICES: [Vertex; 3] = [
    Vertex::new(Vec2::new(0.0, -0.5), GREEN),
    Vertex::new(Vec2::new(0.5, 0.5), GREEN),
    Vertex::new(Vec2::new(-0.5, 0.5), GREEN),
];

/// Binding 0 carries `Vertex`; location 0 is `pos`, location 1 is `color`.
pub fn vertex_input_descriptions() -> (
    [vk::VertexInputBindingDescription; 1],
    [vk::VertexInputAttributeDescription; 2],
) {
    let binding = vk::VertexInputBindingDescription::default()
        .binding(0)
        .stride(size_of::<Vertex>() as u32)
        .input_rate(vk::VertexInputRate::VERTEX);

    let position_attr = vk::VertexInputAttributeDescription::default()
        .binding(0)
        .location(0)
        .format(vk::Format::R32G32_SFLOAT)
        .offset(offset_of!(Vertex, pos) as u32);

    let color_attr = vk::VertexInputAttributeDescription::default()
        .binding(0)
        .location(1)
        .format(vk::Format::R32G32B32_SFLOAT)
        .offset(offset_of!(Vertex, color) as u32);

    ([binding], [position_attr, color_attr])
}

/// Create a render pass with a single color attachment (the swapchain image)
pub fn create_render_pass(
    device: &VulkanDevice,
    format: vk::Format,
    teardown: &mut DeletionQueue,
) -> Result<vk::RenderPass> {
    let color_attachment = vk::AttachmentDescription::default()
        .format(format)
        .samples(vk::SampleCountFlags::TYPE_1)
        .load_op(vk::AttachmentLoadOp::CLEAR)
        .store_op(vk::AttachmentStoreOp::STORE)
        .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
        .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
        .initial_layout(vk::ImageLayout::UNDEFINED)
        .final_layout(vk::ImageLayout::PRESENT_SRC_KHR);

    let color_attachment_ref = vk::AttachmentReference::default()
        .attachment(0)
        .layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL);

    let color_attachments = [color_attachment_ref];
    let subpass = vk::SubpassDescription::default()
        .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
        .color_attachments(&color_attachments);

    // The layout transition must wait for the acquire semaphore, which is
    // waited on at COLOR_ATTACHMENT_OUTPUT.
    let dependency = vk::SubpassDependency::default()
        .src_subpass(vk::SUBPASS_EXTERNAL)
        .dst_subpass(0)
        .src_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
        .src_access_mask(vk::AccessFlags::empty())
        .dst_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
        .dst_access_mask(vk::AccessFlags::COLOR_ATTACHMENT_WRITE);

    let attachments = [color_attachment];
    let subpasses = [subpass];
    let dependencies = [dependency];

    let render_pass_info = vk::RenderPassCreateInfo::default()
        .attachments(&attachments)
        .subpasses(&subpasses)
        .dependencies(&dependencies);

    let render_pass = unsafe { device.device.create_render_pass(&render_pass_info, None) }
        .context("Failed to create render pass")?;

    let owner = device.device.clone();
    teardown.push(ResourceKind::RenderPass, move || unsafe {
        owner.destroy_render_pass(render_pass, None);
    })?;

    Ok(render_pass)
}

/// Create one framebuffer per swapchain image view
pub fn create_framebuffers(
    device: &VulkanDevice,
    image_views: &[vk::ImageView],
    render_pass: vk::RenderPass,
    extent: vk::Extent2D,
    teardown: &mut DeletionQueue,
) -> Result<Vec<vk::Framebuffer>> {
    let mut framebuffers = Vec::with_capacity(image_views.len());

    for &image_view in image_views {
        let attachments = [image_view];
        let framebuffer_info = vk::FramebufferCreateInfo::default()
            .render_pass(render_pass)
            .attachments(&attachments)
            .width(extent.width)
            .height(extent.height)
            .layers(1);

        let framebuffer = unsafe { device.device.create_framebuffer(&framebuffer_info, None) }
            .context("Failed to create framebuffer")?;

        let owner = device.device.clone();
        teardown.push(ResourceKind::Framebuffer, move || unsafe {
            owner.destroy_framebuffer(framebuffer, None);
        })?;

        framebuffers.push(framebuffer);
    }

    Ok(framebuffers)
}

/// Create the triangle pipeline with a fixed viewport covering `extent`.
///
/// The pipeline and its (empty) layout share one teardown entry.
pub fn create_graphics_pipeline(
    device: &VulkanDevice,
    render_pass: vk::RenderPass,
    extent: vk::Extent2D,
    vert_shader: vk::ShaderModule,
    frag_shader: vk::ShaderModule,
    teardown: &mut DeletionQueue,
) -> Result<vk::Pipeline> {
    let shader_stages = [
        vk::PipelineShaderStageCreateInfo::default()
            .stage(ShaderStage::Vertex.flags())
            .module(vert_shader)
            .name(c"main"),
        vk::PipelineShaderStageCreateInfo::default()
            .stage(ShaderStage::Fragment.flags())
            .module(frag_shader)
            .name(c"main"),
    ];

    let (bindings, attributes) = vertex_input_descriptions();
    let vertex_input_info = vk::PipelineVertexInputStateCreateInfo::default()
        .vertex_binding_descriptions(&bindings)
        .vertex_attribute_descriptions(&attributes);

    let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::default()
        .topology(vk::PrimitiveTopology::TRIANGLE_LIST)
        .primitive_restart_enable(false);

    // Static viewport and scissor; the window never resizes
    let viewports = [vk::Viewport {
        x: 0.0,
        y: 0.0,
        width: extent.width as f32,
        height: extent.height as f32,
        min_depth: 0.0,
        max_depth: 1.0,
    }];
    let scissors = [vk::Rect2D {
        offset: vk::Offset2D { x: 0, y: 0 },
        extent,
    }];
    let viewport_state = vk::PipelineViewportStateCreateInfo::default()
        .viewports(&viewports)
        .scissors(&scissors);

    let rasterizer = vk::PipelineRasterizationStateCreateInfo::default()
        .depth_clamp_enable(false)
        .rasterizer_discard_enable(false)
        .polygon_mode(vk::PolygonMode::FILL)
        .line_width(1.0)
        .cull_mode(vk::CullModeFlags::BACK)
        .front_face(vk::FrontFace::CLOCKWISE)
        .depth_bias_enable(false);

    let multisampling = vk::PipelineMultisampleStateCreateInfo::default()
        .sample_shading_enable(false)
        .rasterization_samples(vk::SampleCountFlags::TYPE_1);

    // Opaque, no blending
    let color_blend_attachments = [vk::PipelineColorBlendAttachmentState::default()
        .color_write_mask(vk::ColorComponentFlags::RGBA)
        .blend_enable(false)];
    let color_blending = vk::PipelineColorBlendStateCreateInfo::default()
        .logic_op_enable(false)
        .attachments(&color_blend_attachments);

    let layout_info = vk::PipelineLayoutCreateInfo::default();
    let pipeline_layout = unsafe { device.device.create_pipeline_layout(&layout_info, None) }
        .context("Failed to create pipeline layout")?;

    let pipeline_info = vk::GraphicsPipelineCreateInfo::default()
        .stages(&shader_stages)
        .vertex_input_state(&vertex_input_info)
        .input_assembly_state(&input_assembly)
        .viewport_state(&viewport_state)
        .rasterization_state(&rasterizer)
        .multisample_state(&multisampling)
        .color_blend_state(&color_blending)
        .layout(pipeline_layout)
        .render_pass(render_pass)
        .subpass(0);

    let created = unsafe {
        device
            .device
            .create_graphics_pipelines(vk::PipelineCache::null(), &[pipeline_info], None)
    };

    let pipeline = match created {
        Ok(pipelines) => pipelines[0],
        Err((_, result)) => {
            unsafe { device.device.destroy_pipeline_layout(pipeline_layout, None) };
            return Err(result).context("Failed to create graphics pipeline");
        }
    };

    let owner = device.device.clone();
    teardown.push(ResourceKind::Pipeline, move || unsafe {
        owner.destroy_pipeline(pipeline, None);
        owner.destroy_pipeline_layout(pipeline_layout, None);
    })?;

    log::info!(
        "Graphics pipeline created ({}x{} viewport)",
        extent.width,
        extent.height
    );

    Ok(pipeline)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vertex_is_tightly_packed() {
        assert_eq!(size_of::<Vertex>(), 20);
        assert_eq!(offset_of!(Vertex, pos), 0);
        assert_eq!(offset_of!(Vertex, color), 8);
    }

    #[test]
    fn input_descriptions_match_shader_locations() {
        let ([binding], [pos, color]) = vertex_input_descriptions();

        assert_eq!(binding.binding, 0);
        assert_eq!(binding.stride, 20);
        assert_eq!(binding.input_rate, vk::VertexInputRate::VERTEX);

        assert_eq!((pos.location, pos.offset), (0, 0));
        assert_eq!(pos.format, vk::Format::R32G32_SFLOAT);
        assert_eq!((color.location, color.offset), (1, 8));
        assert_eq!(color.format, vk::Format::R32G32B32_SFLOAT);
    }

    #[test]
    fn triangle_bytes_follow_vertex_layout() {
        let bytes: &[u8] = bytemuck::cast_slice(&TRIANGLE_VERTICES);
        assert_eq!(bytes.len(), 60);

        let floats: &[f32] = bytemuck::cast_slice(&TRIANGLE_VERTICES);
        assert_eq!(&floats[..5], &[0.0, -0.5, 0.0, 1.0, 0.0]);
        assert_eq!(&floats[5..7], &[0.5, 0.5]);
        assert_eq!(&floats[10..12], &[-0.5, 0.5]);
    }

    #[test]
    fn triangle_winds_clockwise_on_screen() {
        // Vulkan clip space has y pointing down, so a positive signed area
        // in (x, y) is clockwise on screen.
        let [a, b, c] = TRIANGLE_VERTICES.map(|v| v.pos);
        let area = (b - a).perp_dot(c - a);
        assert!(area > 0.0);
    }
}
