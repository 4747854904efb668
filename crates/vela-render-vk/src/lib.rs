// SPDX-License-Identifier: CEPL-1.0
//! Vulkan backend: device context, swapchain generations, frame slots and
//! per-slot command recording behind [`vela_render::FrameBackend`].

mod buffer;
mod command;
mod device;
mod error;
mod instance;
mod mesh;
mod pipeline;
mod swapchain;
mod sync;
mod transfer;

use anyhow::{Context, Result};
use ash::vk;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use tracing::{debug, info};
use vela_render::{
    AcquireOutcome, DrawItem, FrameBackend, MeshId, PresentOutcome, RenderSize, Vertex,
    MAX_FRAMES_IN_FLIGHT,
};

pub use buffer::find_memory_type;
pub use device::{
    find_queue_families, pick_best, rate_device, DeviceCandidate, DeviceContext, QueueFamilies,
    DISCRETE_GPU_BONUS,
};
pub use error::{VkError, VkResult};
pub use instance::{filter_layers, InstanceContext};
pub use pipeline::{load_spirv, vertex_layout, ShaderPaths, PUSH_CONSTANT_SIZE};
pub use swapchain::{
    choose_extent, choose_image_count, choose_present_mode, choose_surface_format,
    color_attachment, color_subpass_dependency, sharing, PresentPreference, SurfaceSupport,
};

use command::{CommandRecorder, RecordTarget};
use mesh::MeshRegistry;
use pipeline::GraphicsPipeline;
use swapchain::Swapchain;
use sync::{create_frame_slots, destroy_frame_slots, FrameSlot};
use transfer::TransferContext;

#[derive(Clone, Debug)]
pub struct RendererOptions {
    pub app_name: String,
    pub validation: bool,
    pub validation_layers: Vec<String>,
    pub present: PresentPreference,
    pub clear_color: [f32; 4],
    pub frames_in_flight: usize,
    /// Without shaders every frame is recorded clear-only.
    pub shaders: Option<ShaderPaths>,
}

impl Default for RendererOptions {
    fn default() -> Self {
        RendererOptions {
            app_name: "vela".to_owned(),
            validation: cfg!(debug_assertions),
            validation_layers: vec!["VK_LAYER_KHRONOS_validation".to_owned()],
            present: PresentPreference::Mailbox,
            clear_color: [0.02, 0.02, 0.04, 1.0],
            frames_in_flight: MAX_FRAMES_IN_FLIGHT,
            shaders: None,
        }
    }
}

/// Slots, per-slot command buffers and the upload context. Built as a unit
/// so a failure part way through leaves nothing behind.
struct FrameResources {
    slots: Vec<FrameSlot>,
    recorder: CommandRecorder,
    transfer: TransferContext,
}

impl FrameResources {
    unsafe fn new(dev: &DeviceContext, count: usize) -> VkResult<Self> {
        let d = &dev.device;
        let mut slots = create_frame_slots(d, count)?;
        let mut recorder = match CommandRecorder::new(d, dev.families.graphics, slots.len()) {
            Ok(r) => r,
            Err(e) => {
                destroy_frame_slots(d, &mut slots);
                return Err(e);
            }
        };
        match TransferContext::new(dev) {
            Ok(transfer) => Ok(FrameResources {
                slots,
                recorder,
                transfer,
            }),
            Err(e) => {
                recorder.destroy(d);
                destroy_frame_slots(d, &mut slots);
                Err(e)
            }
        }
    }
}

fn clear_value(rgba: [f32; 4]) -> vk::ClearValue {
    vk::ClearValue {
        color: vk::ClearColorValue { float32: rgba },
    }
}

pub struct VkRenderer {
    slots: Vec<FrameSlot>,
    recorder: CommandRecorder,
    transfer: TransferContext,
    meshes: MeshRegistry,
    pipeline: Option<GraphicsPipeline>,
    shader_code: Option<(Vec<u32>, Vec<u32>)>,
    swapchain: Swapchain,
    clear: vk::ClearValue,

    // STRICT DROP ORDER: device before instance (field order)
    device: DeviceContext,
    instance: InstanceContext,
}

impl VkRenderer {
    // STRICT ORDER:
    // 1) instance + surface (+ debug messenger)
    // 2) physical/logical device rated against that surface
    // 3) swapchain generation 0 (render pass + framebuffers)
    // 4) pipeline against that render pass
    // 5) frame slots, command pool/buffers, transfer context
    pub fn new(
        window: &dyn HasWindowHandle,
        display: &dyn HasDisplayHandle,
        size: RenderSize,
        opts: &RendererOptions,
    ) -> VkResult<Self> {
        // Loaded before any Vulkan object so a bad path fails cheaply.
        let shader_code = match &opts.shaders {
            Some(paths) => Some((load_spirv(&paths.vertex)?, load_spirv(&paths.fragment)?)),
            None => None,
        };

        let instance = InstanceContext::new(
            window,
            display,
            &opts.app_name,
            opts.validation,
            &opts.validation_layers,
        )?;
        let device = DeviceContext::new(&instance)?;
        let d = &device.device;

        unsafe {
            let mut swapchain = Swapchain::new(&instance, &device, size, opts.present)?;

            let pipeline = match &shader_code {
                Some((vs, fs)) => {
                    match GraphicsPipeline::new(d, swapchain.render_pass(), swapchain.format(), vs, fs) {
                        Ok(p) => Some(p),
                        Err(e) => {
                            swapchain.destroy(d);
                            return Err(e);
                        }
                    }
                }
                None => None,
            };

            let frames = match FrameResources::new(&device, opts.frames_in_flight.max(1)) {
                Ok(f) => f,
                Err(e) => {
                    if let Some(mut p) = pipeline {
                        p.destroy(d);
                    }
                    swapchain.destroy(d);
                    return Err(e);
                }
            };
            let FrameResources {
                slots,
                recorder,
                transfer,
            } = frames;

            info!(
                "Vulkan renderer ready on {} ({}x{}, {:?}, {:?}, {} images, {} slots)",
                device.name(),
                swapchain.extent().width,
                swapchain.extent().height,
                swapchain.format(),
                swapchain.present_mode(),
                swapchain.image_count(),
                slots.len()
            );

            Ok(VkRenderer {
                slots,
                recorder,
                transfer,
                meshes: MeshRegistry::default(),
                pipeline,
                shader_code,
                swapchain,
                clear: clear_value(opts.clear_color),
                device,
                instance,
            })
        }
    }

    /// Uploads a mesh through the transfer queue. Blocks until the copy lands.
    pub fn upload_mesh(&mut self, vertices: &[Vertex], indices: &[u32]) -> VkResult<MeshId> {
        unsafe {
            self.meshes
                .upload(&self.device, &self.transfer, vertices, indices)
        }
    }

    pub fn mesh_count(&self) -> usize {
        self.meshes.len()
    }

    pub fn set_clear_color(&mut self, rgba: [f32; 4]) {
        self.clear = clear_value(rgba);
    }

    pub fn extent(&self) -> RenderSize {
        let e = self.swapchain.extent();
        RenderSize::new(e.width, e.height)
    }

    pub fn device_name(&self) -> &str {
        self.device.name()
    }

    pub fn swapchain_generation(&self) -> u64 {
        self.swapchain.generation()
    }

    pub fn has_pipeline(&self) -> bool {
        self.pipeline.is_some()
    }
}

impl FrameBackend for VkRenderer {
    fn frame_slots(&self) -> usize {
        self.slots.len()
    }

    fn wait_for_slot(&mut self, slot: usize) -> Result<()> {
        unsafe {
            self.device
                .device
                .wait_for_fences(&[self.slots[slot].in_flight], true, u64::MAX)
                .context("wait_for_fences")
        }
    }

    fn acquire_image(&mut self, slot: usize) -> Result<AcquireOutcome> {
        unsafe {
            Ok(self
                .swapchain
                .acquire(self.slots[slot].image_available)?)
        }
    }

    fn reset_slot_fence(&mut self, slot: usize) -> Result<()> {
        unsafe {
            self.device
                .device
                .reset_fences(&[self.slots[slot].in_flight])
                .context("reset_fences")
        }
    }

    fn record(&mut self, slot: usize, image_index: u32, draws: &[DrawItem]) -> Result<()> {
        let target = RecordTarget {
            render_pass: self.swapchain.render_pass(),
            framebuffer: self.swapchain.framebuffer(image_index),
            extent: self.swapchain.extent(),
        };
        unsafe {
            self.recorder.record(
                &self.device.device,
                slot,
                &target,
                self.clear,
                self.pipeline.as_ref(),
                &self.meshes,
                draws,
            )?;
        }
        Ok(())
    }

    fn submit(&mut self, slot: usize) -> Result<()> {
        let s = &self.slots[slot];
        let cmd = self.recorder.buffer(slot);
        let wait_stage = vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT;
        let submit = vk::SubmitInfo {
            s_type: vk::StructureType::SUBMIT_INFO,
            wait_semaphore_count: 1,
            p_wait_semaphores: &s.image_available,
            p_wait_dst_stage_mask: &wait_stage,
            command_buffer_count: 1,
            p_command_buffers: &cmd,
            signal_semaphore_count: 1,
            p_signal_semaphores: &s.render_finished,
            ..Default::default()
        };
        unsafe {
            self.device
                .device
                .queue_submit(
                    self.device.graphics_queue,
                    std::slice::from_ref(&submit),
                    s.in_flight,
                )
                .context("queue_submit")
        }
    }

    fn present(&mut self, slot: usize, image_index: u32) -> Result<PresentOutcome> {
        unsafe {
            Ok(self.swapchain.present(
                self.device.present_queue,
                self.slots[slot].render_finished,
                image_index,
            )?)
        }
    }

    fn recreate_swapchain(&mut self, size: RenderSize) -> Result<()> {
        unsafe {
            self.swapchain
                .recreate(&self.instance, &self.device, size)
                .context("recreate swapchain")?;

            let format = self.swapchain.format();
            let stale = self
                .pipeline
                .as_ref()
                .is_some_and(|p| p.color_format() != format);
            if stale {
                if let Some(mut old) = self.pipeline.take() {
                    old.destroy(&self.device.device);
                }
                if let Some((vs, fs)) = &self.shader_code {
                    let p = GraphicsPipeline::new(
                        &self.device.device,
                        self.swapchain.render_pass(),
                        format,
                        vs,
                        fs,
                    )
                    .context("rebuild pipeline")?;
                    self.pipeline = Some(p);
                }
            }
        }
        let e = self.swapchain.extent();
        info!(
            "swapchain recreated: generation {} ({}x{}, {} images)",
            self.swapchain.generation(),
            e.width,
            e.height,
            self.swapchain.image_count()
        );
        Ok(())
    }

    fn wait_idle(&mut self) -> Result<()> {
        self.device.wait_idle().context("device_wait_idle")
    }
}

impl Drop for VkRenderer {
    // STRICT TEARDOWN ORDER:
    // 1) wait idle (nothing in flight references anything below)
    // 2) frame slots, command pools
    // 3) meshes, pipeline
    // 4) swapchain generation (framebuffers -> render pass -> views -> swapchain)
    // 5) device, then surface/messenger/instance (field drop order)
    fn drop(&mut self) {
        let d = &self.device.device;
        unsafe {
            d.device_wait_idle().ok();
            destroy_frame_slots(d, &mut self.slots);
            self.recorder.destroy(d);
            self.transfer.destroy(d);
            self.meshes.destroy(d);
            if let Some(mut p) = self.pipeline.take() {
                p.destroy(d);
            }
            self.swapchain.destroy(d);
        }
        debug!("renderer resources destroyed");
    }
}
