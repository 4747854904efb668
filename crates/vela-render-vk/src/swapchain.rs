// SPDX-License-Identifier: CEPL-1.0
//! Swapchain manager: presentable images plus the views, render pass and
//! framebuffers derived from them, rebuilt together as one generation.

use ash::khr::{surface, swapchain};
use ash::vk;
use tracing::{debug, info};
use vela_render::{AcquireOutcome, PresentOutcome, RenderSize};

use crate::device::{DeviceContext, QueueFamilies};
use crate::error::{VkError, VkResult, VkResultExt};
use crate::instance::InstanceContext;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PresentPreference {
    #[default]
    Mailbox,
    Fifo,
}

/// Everything the surface reports for one physical device.
#[derive(Clone, Debug)]
pub struct SurfaceSupport {
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    pub formats: Vec<vk::SurfaceFormatKHR>,
    pub present_modes: Vec<vk::PresentModeKHR>,
}

impl SurfaceSupport {
    pub(crate) unsafe fn query(
        loader: &surface::Instance,
        phys: vk::PhysicalDevice,
        surface: vk::SurfaceKHR,
    ) -> VkResult<Self> {
        Ok(SurfaceSupport {
            capabilities: loader
                .get_physical_device_surface_capabilities(phys, surface)
                .vk("vkGetPhysicalDeviceSurfaceCapabilitiesKHR")?,
            formats: loader
                .get_physical_device_surface_formats(phys, surface)
                .vk("vkGetPhysicalDeviceSurfaceFormatsKHR")?,
            present_modes: loader
                .get_physical_device_surface_present_modes(phys, surface)
                .vk("vkGetPhysicalDeviceSurfacePresentModesKHR")?,
        })
    }

    pub fn is_adequate(&self) -> bool {
        !self.formats.is_empty() && !self.present_modes.is_empty()
    }
}

// --- Pure selection ---

/// BGRA8 sRGB with the non-linear sRGB color space, else the first reported.
pub fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> Option<vk::SurfaceFormatKHR> {
    formats
        .iter()
        .copied()
        .find(|f| {
            f.format == vk::Format::B8G8R8A8_SRGB
                && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
        })
        .or_else(|| formats.first().copied())
}

/// FIFO is always available, so it is the fallback.
pub fn choose_present_mode(
    modes: &[vk::PresentModeKHR],
    pref: PresentPreference,
) -> vk::PresentModeKHR {
    match pref {
        PresentPreference::Mailbox if modes.contains(&vk::PresentModeKHR::MAILBOX) => {
            vk::PresentModeKHR::MAILBOX
        }
        _ => vk::PresentModeKHR::FIFO,
    }
}

/// `current_extent` verbatim unless its width is the u32::MAX sentinel, in
/// which case the drawable size clamped into the min/max extent.
pub fn choose_extent(caps: &vk::SurfaceCapabilitiesKHR, drawable: RenderSize) -> vk::Extent2D {
    if caps.current_extent.width != u32::MAX {
        return caps.current_extent;
    }
    vk::Extent2D {
        width: drawable
            .width
            .clamp(caps.min_image_extent.width, caps.max_image_extent.width),
        height: drawable
            .height
            .clamp(caps.min_image_extent.height, caps.max_image_extent.height),
    }
}

/// One more than the minimum when the surface allows a range, capped at the
/// maximum. A maximum of 0 means unbounded.
pub fn choose_image_count(caps: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let min = caps.min_image_count;
    let max = caps.max_image_count;
    if max == 0 {
        min + 1
    } else if min != max {
        (min + 1).min(max)
    } else {
        max
    }
}

/// Concurrent across graphics and present when they differ.
pub fn sharing(families: &QueueFamilies) -> (vk::SharingMode, Vec<u32>) {
    if families.graphics != families.present {
        (
            vk::SharingMode::CONCURRENT,
            vec![families.graphics, families.present],
        )
    } else {
        (vk::SharingMode::EXCLUSIVE, Vec::new())
    }
}

pub fn color_attachment(format: vk::Format) -> vk::AttachmentDescription {
    vk::AttachmentDescription {
        format,
        samples: vk::SampleCountFlags::TYPE_1,
        load_op: vk::AttachmentLoadOp::CLEAR,
        store_op: vk::AttachmentStoreOp::STORE,
        stencil_load_op: vk::AttachmentLoadOp::DONT_CARE,
        stencil_store_op: vk::AttachmentStoreOp::DONT_CARE,
        initial_layout: vk::ImageLayout::UNDEFINED,
        final_layout: vk::ImageLayout::PRESENT_SRC_KHR,
        ..Default::default()
    }
}

/// Color output of subpass 0 waits for whatever external work (the previous
/// present of this image) last touched the attachment.
pub fn color_subpass_dependency() -> vk::SubpassDependency {
    vk::SubpassDependency {
        src_subpass: vk::SUBPASS_EXTERNAL,
        dst_subpass: 0,
        src_stage_mask: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
        dst_stage_mask: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
        src_access_mask: vk::AccessFlags::empty(),
        dst_access_mask: vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
        ..Default::default()
    }
}

// --- Generation ---

/// One swapchain handle and everything derived from its images.
struct Generation {
    handle: vk::SwapchainKHR,
    format: vk::SurfaceFormatKHR,
    present_mode: vk::PresentModeKHR,
    extent: vk::Extent2D,
    images: Vec<vk::Image>,
    views: Vec<vk::ImageView>,
    render_pass: vk::RenderPass,
    framebuffers: Vec<vk::Framebuffer>,
}

/// Handles taken out of a generation, listed in destruction order.
struct RetiredHandles {
    framebuffers: Vec<vk::Framebuffer>,
    render_pass: vk::RenderPass,
    views: Vec<vk::ImageView>,
    swapchain: vk::SwapchainKHR,
}

impl Generation {
    fn empty(
        handle: vk::SwapchainKHR,
        format: vk::SurfaceFormatKHR,
        present_mode: vk::PresentModeKHR,
        extent: vk::Extent2D,
    ) -> Self {
        Generation {
            handle,
            format,
            present_mode,
            extent,
            images: Vec::new(),
            views: Vec::new(),
            render_pass: vk::RenderPass::null(),
            framebuffers: Vec::new(),
        }
    }

    /// Leaves every handle null and every vec empty, so a second teardown
    /// of the same generation destroys nothing.
    fn retire(&mut self) -> RetiredHandles {
        self.images.clear();
        RetiredHandles {
            framebuffers: std::mem::take(&mut self.framebuffers),
            render_pass: std::mem::replace(&mut self.render_pass, vk::RenderPass::null()),
            views: std::mem::take(&mut self.views),
            swapchain: std::mem::replace(&mut self.handle, vk::SwapchainKHR::null()),
        }
    }
}

unsafe fn create_render_pass(device: &ash::Device, format: vk::Format) -> VkResult<vk::RenderPass> {
    let color_att = color_attachment(format);
    let att_ref = vk::AttachmentReference {
        attachment: 0,
        layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
    };
    let subpass = vk::SubpassDescription {
        pipeline_bind_point: vk::PipelineBindPoint::GRAPHICS,
        color_attachment_count: 1,
        p_color_attachments: &att_ref,
        ..Default::default()
    };
    let dependency = color_subpass_dependency();

    let rp_info = vk::RenderPassCreateInfo {
        s_type: vk::StructureType::RENDER_PASS_CREATE_INFO,
        attachment_count: 1,
        p_attachments: &color_att,
        subpass_count: 1,
        p_subpasses: &subpass,
        dependency_count: 1,
        p_dependencies: &dependency,
        ..Default::default()
    };
    device
        .create_render_pass(&rp_info, None)
        .vk("vkCreateRenderPass")
}

unsafe fn build_generation(
    inst: &InstanceContext,
    dev: &DeviceContext,
    loader: &swapchain::Device,
    size: RenderSize,
    pref: PresentPreference,
) -> VkResult<Generation> {
    let device = &dev.device;

    // --- Query surface capabilities / formats / present modes ---
    let support = SurfaceSupport::query(&inst.surface_loader, dev.physical, inst.surface)?;
    let caps = &support.capabilities;

    // --- Choose format, present mode, extent, image count ---
    let format = choose_surface_format(&support.formats).ok_or(VkError::NoSurfaceFormat)?;
    let present_mode = choose_present_mode(&support.present_modes, pref);
    let extent = choose_extent(caps, size);
    let image_count = choose_image_count(caps);
    let (sharing_mode, family_indices) = sharing(&dev.families);

    // --- Swapchain create info (no old-swapchain handoff) ---
    let swap_info = vk::SwapchainCreateInfoKHR {
        s_type: vk::StructureType::SWAPCHAIN_CREATE_INFO_KHR,
        surface: inst.surface,
        min_image_count: image_count,
        image_format: format.format,
        image_color_space: format.color_space,
        image_extent: extent,
        image_array_layers: 1,
        image_usage: vk::ImageUsageFlags::COLOR_ATTACHMENT,
        image_sharing_mode: sharing_mode,
        queue_family_index_count: family_indices.len() as u32,
        p_queue_family_indices: family_indices.as_ptr(),
        pre_transform: caps.current_transform,
        composite_alpha: vk::CompositeAlphaFlagsKHR::OPAQUE,
        present_mode,
        clipped: vk::TRUE,
        old_swapchain: vk::SwapchainKHR::null(),
        ..Default::default()
    };
    let handle = loader
        .create_swapchain(&swap_info, None)
        .vk("vkCreateSwapchainKHR")?;
    // from here on a failure tears down whatever was built
    let mut g = Generation::empty(handle, format, present_mode, extent);
    if let Err(e) = populate_generation(device, loader, &mut g) {
        destroy_generation(device, loader, &mut g);
        return Err(e);
    }

    info!(
        "swapchain ready: {}x{}, {:?}/{:?}, {:?}, {} images",
        extent.width,
        extent.height,
        format.format,
        format.color_space,
        present_mode,
        g.images.len()
    );
    Ok(g)
}

/// Images, one view each, the render pass, then one framebuffer per view.
unsafe fn populate_generation(
    device: &ash::Device,
    loader: &swapchain::Device,
    g: &mut Generation,
) -> VkResult<()> {
    g.images = loader
        .get_swapchain_images(g.handle)
        .vk("vkGetSwapchainImagesKHR")?;

    // --- One view per image ---
    g.views.reserve(g.images.len());
    for &image in &g.images {
        let iv_info = vk::ImageViewCreateInfo {
            s_type: vk::StructureType::IMAGE_VIEW_CREATE_INFO,
            image,
            view_type: vk::ImageViewType::TYPE_2D,
            format: g.format.format,
            components: vk::ComponentMapping::default(),
            subresource_range: vk::ImageSubresourceRange {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                base_mip_level: 0,
                level_count: 1,
                base_array_layer: 0,
                layer_count: 1,
            },
            ..Default::default()
        };
        g.views.push(
            device
                .create_image_view(&iv_info, None)
                .vk("vkCreateImageView")?,
        );
    }

    // --- Render pass + one framebuffer per view ---
    g.render_pass = create_render_pass(device, g.format.format)?;
    g.framebuffers.reserve(g.views.len());
    for view in &g.views {
        let fb_info = vk::FramebufferCreateInfo {
            s_type: vk::StructureType::FRAMEBUFFER_CREATE_INFO,
            render_pass: g.render_pass,
            attachment_count: 1,
            p_attachments: view,
            width: g.extent.width,
            height: g.extent.height,
            layers: 1,
            ..Default::default()
        };
        g.framebuffers.push(
            device
                .create_framebuffer(&fb_info, None)
                .vk("vkCreateFramebuffer")?,
        );
    }
    Ok(())
}

// STRICT TEARDOWN ORDER: framebuffers -> render pass -> views -> swapchain.
// Images belong to the presentation engine and are not destroyed here.
unsafe fn destroy_generation(device: &ash::Device, loader: &swapchain::Device, g: &mut Generation) {
    let retired = g.retire();
    for fb in retired.framebuffers {
        device.destroy_framebuffer(fb, None);
    }
    device.destroy_render_pass(retired.render_pass, None);
    for view in retired.views {
        device.destroy_image_view(view, None);
    }
    loader.destroy_swapchain(retired.swapchain, None);
}

pub struct Swapchain {
    loader: swapchain::Device,
    current: Generation,
    preference: PresentPreference,
    generation: u64,
}

impl Swapchain {
    pub(crate) unsafe fn new(
        inst: &InstanceContext,
        dev: &DeviceContext,
        size: RenderSize,
        preference: PresentPreference,
    ) -> VkResult<Self> {
        let loader = swapchain::Device::new(&inst.instance, &dev.device);
        let current = build_generation(inst, dev, &loader, size, preference)?;
        Ok(Swapchain {
            loader,
            current,
            preference,
            generation: 0,
        })
    }

    /// Waits for the device to go idle, tears the current generation down
    /// and builds a new one for `size`. Frame slots are untouched.
    pub(crate) unsafe fn recreate(
        &mut self,
        inst: &InstanceContext,
        dev: &DeviceContext,
        size: RenderSize,
    ) -> VkResult<()> {
        dev.wait_idle()?;
        destroy_generation(&dev.device, &self.loader, &mut self.current);
        self.current = build_generation(inst, dev, &self.loader, size, self.preference)?;
        self.generation += 1;
        debug!("swapchain generation {}", self.generation);
        Ok(())
    }

    /// Out-of-date is an outcome, not an error. Suboptimal still hands back
    /// an image, with the semaphore signaled.
    pub(crate) unsafe fn acquire(&self, image_available: vk::Semaphore) -> VkResult<AcquireOutcome> {
        match self.loader.acquire_next_image(
            self.current.handle,
            u64::MAX,
            image_available,
            vk::Fence::null(),
        ) {
            Ok((image_index, suboptimal)) => Ok(AcquireOutcome::Acquired {
                image_index,
                suboptimal,
            }),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(AcquireOutcome::OutOfDate),
            Err(result) => Err(VkError::Vulkan {
                call: "vkAcquireNextImageKHR",
                result,
            }),
        }
    }

    pub(crate) unsafe fn present(
        &self,
        queue: vk::Queue,
        render_finished: vk::Semaphore,
        image_index: u32,
    ) -> VkResult<PresentOutcome> {
        let present = vk::PresentInfoKHR {
            s_type: vk::StructureType::PRESENT_INFO_KHR,
            wait_semaphore_count: 1,
            p_wait_semaphores: &render_finished,
            swapchain_count: 1,
            p_swapchains: &self.current.handle,
            p_image_indices: &image_index,
            ..Default::default()
        };
        match self.loader.queue_present(queue, &present) {
            Ok(false) => Ok(PresentOutcome::Presented),
            Ok(true) => Ok(PresentOutcome::Suboptimal),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(PresentOutcome::OutOfDate),
            Err(result) => Err(VkError::Vulkan {
                call: "vkQueuePresentKHR",
                result,
            }),
        }
    }

    pub(crate) unsafe fn destroy(&mut self, device: &ash::Device) {
        destroy_generation(device, &self.loader, &mut self.current);
    }

    pub fn format(&self) -> vk::Format {
        self.current.format.format
    }

    pub fn present_mode(&self) -> vk::PresentModeKHR {
        self.current.present_mode
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.current.extent
    }

    pub fn image_count(&self) -> usize {
        self.current.images.len()
    }

    pub fn render_pass(&self) -> vk::RenderPass {
        self.current.render_pass
    }

    pub(crate) fn framebuffer(&self, image_index: u32) -> vk::Framebuffer {
        self.current.framebuffers[image_index as usize]
    }

    /// Bumped on every successful recreate.
    pub fn generation(&self) -> u64 {
        self.generation
    }
}
