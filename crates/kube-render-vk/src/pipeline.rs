// SPDX-License-Identifier: CEPL-1.0
//! Render pass, descriptor layout and the two fixed graphics pipelines.

use crate::handle::Owned;
use crate::mesh::Vertex;
use crate::overlay::OverlayVertex;
use crate::shaders::ShaderPair;
use anyhow::{anyhow, Context, Result};
use ash::vk;
use std::sync::Arc;

/// One subpass, color + depth. The external dependency keeps attachment writes
/// behind image acquisition.
pub fn build_render_pass(
    device: &Arc<ash::Device>,
    color_format: vk::Format,
    depth_format: vk::Format,
) -> Result<Owned<vk::RenderPass>> {
    let attachments = [
        vk::AttachmentDescription::default()
            .format(color_format)
            .samples(vk::SampleCountFlags::TYPE_1)
            .load_op(vk::AttachmentLoadOp::CLEAR)
            .store_op(vk::AttachmentStoreOp::STORE)
            .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
            .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .final_layout(vk::ImageLayout::PRESENT_SRC_KHR),
        vk::AttachmentDescription::default()
            .format(depth_format)
            .samples(vk::SampleCountFlags::TYPE_1)
            .load_op(vk::AttachmentLoadOp::CLEAR)
            .store_op(vk::AttachmentStoreOp::DONT_CARE)
            .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
            .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .final_layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL),
    ];
    let color_ref = [vk::AttachmentReference {
        attachment: 0,
        layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
    }];
    let depth_ref = vk::AttachmentReference {
        attachment: 1,
        layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
    };
    let subpass = [vk::SubpassDescription::default()
        .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
        .color_attachments(&color_ref)
        .depth_stencil_attachment(&depth_ref)];

    let dependency = [external_dependency()];

    let info = vk::RenderPassCreateInfo::default()
        .attachments(&attachments)
        .subpasses(&subpass)
        .dependencies(&dependency);
    let pass = unsafe { device.create_render_pass(&info, None) }.context("create render pass")?;
    Ok(Owned::new(device, pass))
}

/// Set 0: binding 0 = per-image uniform block (vertex), binding 1 = texture (fragment).
/// Attachment writes wait for the acquire semaphore's stage. The one depth
/// image is shared by both frames in flight, so the previous frame's depth
/// writes must also land before this frame clears it.
pub fn external_dependency() -> vk::SubpassDependency {
    let dst_stages = vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
        | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS;
    vk::SubpassDependency::default()
        .src_subpass(vk::SUBPASS_EXTERNAL)
        .dst_subpass(0)
        .src_stage_mask(dst_stages | vk::PipelineStageFlags::LATE_FRAGMENT_TESTS)
        .src_access_mask(vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE)
        .dst_stage_mask(dst_stages)
        .dst_access_mask(
            vk::AccessFlags::COLOR_ATTACHMENT_WRITE
                | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
        )
}

pub fn build_descriptor_set_layout(
    device: &Arc<ash::Device>,
) -> Result<Owned<vk::DescriptorSetLayout>> {
    let bindings = [
        vk::DescriptorSetLayoutBinding::default()
            .binding(0)
            .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
            .descriptor_count(1)
            .stage_flags(vk::ShaderStageFlags::VERTEX),
        vk::DescriptorSetLayoutBinding::default()
            .binding(1)
            .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
            .descriptor_count(1)
            .stage_flags(vk::ShaderStageFlags::FRAGMENT),
    ];
    let info = vk::DescriptorSetLayoutCreateInfo::default().bindings(&bindings);
    let layout = unsafe { device.create_descriptor_set_layout(&info, None) }
        .context("create descriptor set layout")?;
    Ok(Owned::new(device, layout))
}

fn shader_module(device: &Arc<ash::Device>, words: &[u32]) -> Result<Owned<vk::ShaderModule>> {
    let info = vk::ShaderModuleCreateInfo::default().code(words);
    let module =
        unsafe { device.create_shader_module(&info, None) }.context("create shader module")?;
    Ok(Owned::new(device, module))
}

/// Fixed-function knobs that differ between the scene and the overlay.
pub struct PipelineDesc<'a> {
    pub shaders: &'a ShaderPair,
    pub bindings: &'a [vk::VertexInputBindingDescription],
    pub attributes: &'a [vk::VertexInputAttributeDescription],
    pub set_layouts: &'a [vk::DescriptorSetLayout],
    pub cull: vk::CullModeFlags,
    pub depth: bool,
}

// Drop order matters: pipeline before its layout.
pub struct GraphicsPipeline {
    pub pipeline: Owned<vk::Pipeline>,
    pub layout: Owned<vk::PipelineLayout>,
}

pub fn build_graphics_pipeline(
    device: &Arc<ash::Device>,
    render_pass: vk::RenderPass,
    extent: vk::Extent2D,
    desc: &PipelineDesc<'_>,
) -> Result<GraphicsPipeline> {
    let vert = shader_module(device, &desc.shaders.vert).context("vertex stage")?;
    let frag = shader_module(device, &desc.shaders.frag).context("fragment stage")?;
    let stages = [
        vk::PipelineShaderStageCreateInfo::default()
            .stage(vk::ShaderStageFlags::VERTEX)
            .module(vert.raw())
            .name(c"main"),
        vk::PipelineShaderStageCreateInfo::default()
            .stage(vk::ShaderStageFlags::FRAGMENT)
            .module(frag.raw())
            .name(c"main"),
    ];

    let vertex_input = vk::PipelineVertexInputStateCreateInfo::default()
        .vertex_binding_descriptions(desc.bindings)
        .vertex_attribute_descriptions(desc.attributes);
    let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::default()
        .topology(vk::PrimitiveTopology::TRIANGLE_LIST);

    let viewport = [vk::Viewport {
        x: 0.0,
        y: 0.0,
        width: extent.width as f32,
        height: extent.height as f32,
        min_depth: 0.0,
        max_depth: 1.0,
    }];
    let scissor = [vk::Rect2D {
        offset: vk::Offset2D { x: 0, y: 0 },
        extent,
    }];
    let viewport_state = vk::PipelineViewportStateCreateInfo::default()
        .viewports(&viewport)
        .scissors(&scissor);

    let raster = vk::PipelineRasterizationStateCreateInfo::default()
        .polygon_mode(vk::PolygonMode::FILL)
        .cull_mode(desc.cull)
        .front_face(vk::FrontFace::COUNTER_CLOCKWISE)
        .line_width(1.0);
    let multisample = vk::PipelineMultisampleStateCreateInfo::default()
        .rasterization_samples(vk::SampleCountFlags::TYPE_1);
    let depth_stencil = vk::PipelineDepthStencilStateCreateInfo::default()
        .depth_test_enable(desc.depth)
        .depth_write_enable(desc.depth)
        .depth_compare_op(if desc.depth {
            vk::CompareOp::LESS
        } else {
            vk::CompareOp::ALWAYS
        });
    let blend_attachment = [vk::PipelineColorBlendAttachmentState::default()
        .blend_enable(false)
        .color_write_mask(vk::ColorComponentFlags::RGBA)];
    let blend = vk::PipelineColorBlendStateCreateInfo::default().attachments(&blend_attachment);

    let layout_info = vk::PipelineLayoutCreateInfo::default().set_layouts(desc.set_layouts);
    let layout = Owned::new(
        device,
        unsafe { device.create_pipeline_layout(&layout_info, None) }
            .context("create pipeline layout")?,
    );

    let info = vk::GraphicsPipelineCreateInfo::default()
        .stages(&stages)
        .vertex_input_state(&vertex_input)
        .input_assembly_state(&input_assembly)
        .viewport_state(&viewport_state)
        .rasterization_state(&raster)
        .multisample_state(&multisample)
        .depth_stencil_state(&depth_stencil)
        .color_blend_state(&blend)
        .layout(layout.raw())
        .render_pass(render_pass)
        .subpass(0);
    let pipelines = unsafe {
        device.create_graphics_pipelines(vk::PipelineCache::null(), &[info], None)
    }
    .map_err(|(_, e)| anyhow!("create graphics pipeline: {e:?}"))?;
    let pipeline = pipelines
        .into_iter()
        .next()
        .ok_or_else(|| anyhow!("create graphics pipeline: no pipeline returned"))?;

    // Shader modules go out of scope here; the pipeline keeps its own copy.
    Ok(GraphicsPipeline {
        pipeline: Owned::new(device, pipeline),
        layout,
    })
}

/// Textured cube: back-face culling, depth test + write.
pub fn scene_pipeline(
    device: &Arc<ash::Device>,
    render_pass: vk::RenderPass,
    set_layout: vk::DescriptorSetLayout,
    extent: vk::Extent2D,
    shaders: &ShaderPair,
) -> Result<GraphicsPipeline> {
    let bindings = [Vertex::binding()];
    let attributes = Vertex::attributes();
    let set_layouts = [set_layout];
    build_graphics_pipeline(
        device,
        render_pass,
        extent,
        &PipelineDesc {
            shaders,
            bindings: &bindings,
            attributes: &attributes,
            set_layouts: &set_layouts,
            cull: vk::CullModeFlags::BACK,
            depth: true,
        },
    )
    .context("scene pipeline")
}

/// HUD text: no culling, no depth, no descriptors.
pub fn overlay_pipeline(
    device: &Arc<ash::Device>,
    render_pass: vk::RenderPass,
    extent: vk::Extent2D,
    shaders: &ShaderPair,
) -> Result<GraphicsPipeline> {
    let bindings = [OverlayVertex::binding()];
    let attributes = OverlayVertex::attributes();
    build_graphics_pipeline(
        device,
        render_pass,
        extent,
        &PipelineDesc {
            shaders,
            bindings: &bindings,
            attributes: &attributes,
            set_layouts: &[],
            cull: vk::CullModeFlags::NONE,
            depth: false,
        },
    )
    .context("overlay pipeline")
}
