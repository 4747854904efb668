// SPDX-License-Identifier: CEPL-1.0
//! GPU selection and the logical device.

use std::ffi::{c_char, CStr};

use ash::khr::swapchain;
use ash::vk;
use tracing::{debug, info};

use crate::error::{VkError, VkResult, VkResultExt};
use crate::instance::InstanceContext;
use crate::swapchain::SurfaceSupport;

/// Added to a discrete GPU's score. Larger than any `maxImageDimension2D`
/// a real device reports, so a discrete GPU always outranks an integrated one.
pub const DISCRETE_GPU_BONUS: u32 = 1_000_000;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QueueFamilies {
    pub graphics: u32,
    pub present: u32,
    /// Dedicated transfer family when the device has one, else `graphics`.
    pub transfer: u32,
}

impl QueueFamilies {
    /// Each family once, in graphics, present, transfer order.
    pub fn unique(&self) -> Vec<u32> {
        let mut out = vec![self.graphics];
        for f in [self.present, self.transfer] {
            if !out.contains(&f) {
                out.push(f);
            }
        }
        out
    }

    pub fn has_dedicated_transfer(&self) -> bool {
        self.transfer != self.graphics
    }
}

/// Graphics: first family with GRAPHICS. Present: the graphics family when it
/// can present, else the first family that can. Transfer: first family with
/// TRANSFER but without GRAPHICS, else the graphics family.
pub fn find_queue_families(
    props: &[vk::QueueFamilyProperties],
    supports_present: impl Fn(u32) -> bool,
) -> Option<QueueFamilies> {
    let usable = |i: &usize| props[*i].queue_count > 0;
    let indices = || (0..props.len()).filter(usable);

    let graphics = indices().find(|&i| props[i].queue_flags.contains(vk::QueueFlags::GRAPHICS))? as u32;

    let present = if supports_present(graphics) {
        graphics
    } else {
        indices().map(|i| i as u32).find(|&i| supports_present(i))?
    };

    let transfer = indices()
        .find(|&i| {
            let flags = props[i].queue_flags;
            flags.contains(vk::QueueFlags::TRANSFER) && !flags.contains(vk::QueueFlags::GRAPHICS)
        })
        .map_or(graphics, |i| i as u32);

    Some(QueueFamilies {
        graphics,
        present,
        transfer,
    })
}

/// What the rating needs to know about one physical device.
#[derive(Clone, Debug)]
pub struct DeviceCandidate {
    pub name: String,
    pub device_type: vk::PhysicalDeviceType,
    pub max_image_dimension_2d: u32,
    pub queue_families: Option<QueueFamilies>,
    pub has_swapchain_extension: bool,
    pub surface_adequate: bool,
    pub geometry_shader: bool,
}

impl DeviceCandidate {
    pub fn rejection(&self) -> Option<&'static str> {
        if self.queue_families.is_none() {
            Some("no graphics or present queue family")
        } else if !self.has_swapchain_extension {
            Some("VK_KHR_swapchain unsupported")
        } else if !self.surface_adequate {
            Some("no surface formats or present modes")
        } else if !self.geometry_shader {
            Some("geometryShader feature missing")
        } else {
            None
        }
    }
}

/// 0 disqualifies.
pub fn rate_device(c: &DeviceCandidate) -> u32 {
    if c.rejection().is_some() {
        return 0;
    }
    let bonus = if c.device_type == vk::PhysicalDeviceType::DISCRETE_GPU {
        DISCRETE_GPU_BONUS
    } else {
        0
    };
    bonus.saturating_add(c.max_image_dimension_2d)
}

/// Index and score of the best candidate. Ties go to the earliest.
pub fn pick_best(candidates: &[DeviceCandidate]) -> Option<(usize, u32)> {
    candidates
        .iter()
        .enumerate()
        .map(|(i, c)| (i, rate_device(c)))
        .filter(|&(_, score)| score > 0)
        .fold(None, |best, (i, score)| match best {
            Some((_, s)) if s >= score => best,
            _ => Some((i, score)),
        })
}

fn device_type_name(t: vk::PhysicalDeviceType) -> &'static str {
    match t {
        vk::PhysicalDeviceType::DISCRETE_GPU => "discrete",
        vk::PhysicalDeviceType::INTEGRATED_GPU => "integrated",
        vk::PhysicalDeviceType::VIRTUAL_GPU => "virtual",
        vk::PhysicalDeviceType::CPU => "cpu",
        _ => "other",
    }
}

unsafe fn describe(inst: &InstanceContext, phys: vk::PhysicalDevice) -> VkResult<DeviceCandidate> {
    let instance = &inst.instance;
    let props = instance.get_physical_device_properties(phys);
    let features = instance.get_physical_device_features(phys);
    let qprops = instance.get_physical_device_queue_family_properties(phys);

    let queue_families = find_queue_families(&qprops, |i| {
        inst.surface_loader
            .get_physical_device_surface_support(phys, i, inst.surface)
            .unwrap_or(false)
    });

    let has_swapchain_extension = instance
        .enumerate_device_extension_properties(phys)
        .vk("vkEnumerateDeviceExtensionProperties")?
        .iter()
        .any(|e| CStr::from_ptr(e.extension_name.as_ptr()) == swapchain::NAME);

    let surface_adequate = has_swapchain_extension
        && SurfaceSupport::query(&inst.surface_loader, phys, inst.surface)?.is_adequate();

    Ok(DeviceCandidate {
        name: CStr::from_ptr(props.device_name.as_ptr())
            .to_string_lossy()
            .into_owned(),
        device_type: props.device_type,
        max_image_dimension_2d: props.limits.max_image_dimension2_d,
        queue_families,
        has_swapchain_extension,
        surface_adequate,
        geometry_shader: features.geometry_shader == vk::TRUE,
    })
}

/// The chosen GPU and its logical device. Dropping destroys the device;
/// every object created from it must already be gone.
pub struct DeviceContext {
    pub(crate) physical: vk::PhysicalDevice,
    pub(crate) device: ash::Device,
    pub(crate) families: QueueFamilies,
    pub(crate) graphics_queue: vk::Queue,
    pub(crate) present_queue: vk::Queue,
    pub(crate) transfer_queue: vk::Queue,
    pub(crate) memory: vk::PhysicalDeviceMemoryProperties,
    name: String,
}

impl DeviceContext {
    pub fn new(inst: &InstanceContext) -> VkResult<Self> {
        unsafe {
            let physical_devices = inst
                .instance
                .enumerate_physical_devices()
                .vk("vkEnumeratePhysicalDevices")?;
            if physical_devices.is_empty() {
                return Err(VkError::NoGpu);
            }

            let mut candidates = Vec::with_capacity(physical_devices.len());
            for &phys in &physical_devices {
                let c = describe(inst, phys)?;
                match c.rejection() {
                    Some(reason) => debug!("GPU {} rejected: {reason}", c.name),
                    None => debug!("GPU {} scored {}", c.name, rate_device(&c)),
                }
                candidates.push(c);
            }

            let (best, score) = pick_best(&candidates).ok_or(VkError::NoSuitableGpu)?;
            let chosen = &candidates[best];
            let families = chosen.queue_families.ok_or(VkError::NoSuitableGpu)?;
            let physical = physical_devices[best];
            info!(
                "Picked GPU: {} ({}, score {score}, families {:?})",
                chosen.name,
                device_type_name(chosen.device_type),
                families
            );

            // --- One queue per unique family ---
            let priorities = [1.0_f32];
            let queue_infos: Vec<vk::DeviceQueueCreateInfo> = families
                .unique()
                .into_iter()
                .map(|family| vk::DeviceQueueCreateInfo {
                    s_type: vk::StructureType::DEVICE_QUEUE_CREATE_INFO,
                    queue_family_index: family,
                    queue_count: 1,
                    p_queue_priorities: priorities.as_ptr(),
                    ..Default::default()
                })
                .collect();

            let device_exts: [*const c_char; 1] = [swapchain::NAME.as_ptr()];
            let dinfo = vk::DeviceCreateInfo {
                s_type: vk::StructureType::DEVICE_CREATE_INFO,
                queue_create_info_count: queue_infos.len() as u32,
                p_queue_create_infos: queue_infos.as_ptr(),
                enabled_extension_count: device_exts.len() as u32,
                pp_enabled_extension_names: device_exts.as_ptr(),
                ..Default::default()
            };
            let device = inst
                .instance
                .create_device(physical, &dinfo, None)
                .vk("vkCreateDevice")?;

            let graphics_queue = device.get_device_queue(families.graphics, 0);
            let present_queue = device.get_device_queue(families.present, 0);
            let transfer_queue = device.get_device_queue(families.transfer, 0);
            let memory = inst
                .instance
                .get_physical_device_memory_properties(physical);

            Ok(DeviceContext {
                physical,
                device,
                families,
                graphics_queue,
                present_queue,
                transfer_queue,
                memory,
                name: chosen.name.clone(),
            })
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn families(&self) -> QueueFamilies {
        self.families
    }

    pub(crate) fn wait_idle(&self) -> VkResult<()> {
        unsafe { self.device.device_wait_idle().vk("vkDeviceWaitIdle") }
    }
}

impl Drop for DeviceContext {
    fn drop(&mut self) {
        unsafe {
            self.device.device_wait_idle().ok();
            self.device.destroy_device(None);
        }
        debug!("logical device destroyed");
    }
}
