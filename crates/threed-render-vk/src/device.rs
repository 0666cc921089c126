// SPDX-License-Identifier: CEPL-1.0
//! Physical-device capability queries, selection and logical device creation.
use crate::error::VkError;
use crate::instance::fixed_name;
use anyhow::{Context, Result};
use ash::khr::{surface, swapchain};
use ash::prelude::VkResult;
use ash::vk;
use std::ffi::{c_char, CStr};

pub const DEVICE_EXTENSIONS: &[&CStr] = &[swapchain::NAME];

/// Tried in order; the first with optimal-tiling depth attachment support wins.
pub const DEPTH_FORMAT_CANDIDATES: [vk::Format; 3] = [
    vk::Format::D32_SFLOAT,
    vk::Format::D32_SFLOAT_S8_UINT,
    vk::Format::D24_UNORM_S8_UINT,
];

/// Format textures are uploaded in; mip blits need linear filtering on it.
pub const TEXTURE_FORMAT: vk::Format = vk::Format::R8G8B8A8_SRGB;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct QueueFamilyIndices {
    pub graphics: Option<u32>,
    pub present: Option<u32>,
}

impl QueueFamilyIndices {
    pub fn is_complete(&self) -> bool {
        self.graphics.is_some() && self.present.is_some()
    }

    pub fn pair(&self) -> Option<(u32, u32)> {
        Some((self.graphics?, self.present?))
    }

    /// Distinct family indices, graphics first.
    pub fn unique(&self) -> Vec<u32> {
        let mut out = Vec::with_capacity(2);
        for idx in [self.graphics, self.present].into_iter().flatten() {
            if !out.contains(&idx) {
                out.push(idx);
            }
        }
        out
    }
}

/// First graphics-capable family and first family that can present.
/// A failing present query counts as "cannot present".
pub fn find_queue_families(
    families: &[vk::QueueFamilyProperties],
    mut can_present: impl FnMut(u32) -> VkResult<bool>,
) -> QueueFamilyIndices {
    let mut out = QueueFamilyIndices::default();
    for (i, family) in families.iter().enumerate() {
        let i = i as u32;
        if family.queue_count == 0 {
            continue;
        }
        if out.graphics.is_none() && family.queue_flags.contains(vk::QueueFlags::GRAPHICS) {
            out.graphics = Some(i);
        }
        if out.present.is_none() {
            match can_present(i) {
                Ok(true) => out.present = Some(i),
                Ok(false) => {}
                Err(e) => tracing::warn!("present support query for family {i} failed: {e:?}"),
            }
        }
        if out.is_complete() {
            break;
        }
    }
    out
}

#[derive(Clone, Debug, Default)]
pub struct SwapchainSupport {
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    /// Each surface format together with the device's properties for it.
    pub formats: Vec<(vk::SurfaceFormatKHR, vk::FormatProperties)>,
    pub present_modes: Vec<vk::PresentModeKHR>,
}

impl SwapchainSupport {
    pub unsafe fn query(
        instance: &ash::Instance,
        surface_loader: &surface::Instance,
        pd: vk::PhysicalDevice,
        surface: vk::SurfaceKHR,
    ) -> VkResult<Self> {
        let capabilities = surface_loader.get_physical_device_surface_capabilities(pd, surface)?;
        let formats = surface_loader
            .get_physical_device_surface_formats(pd, surface)?
            .into_iter()
            .map(|f| (f, instance.get_physical_device_format_properties(pd, f.format)))
            .collect();
        let present_modes = surface_loader.get_physical_device_surface_present_modes(pd, surface)?;
        Ok(Self {
            capabilities,
            formats,
            present_modes,
        })
    }

    pub fn is_adequate(&self) -> bool {
        !self.formats.is_empty() && !self.present_modes.is_empty()
    }

    pub fn surface_formats(&self) -> Vec<vk::SurfaceFormatKHR> {
        self.formats.iter().map(|(f, _)| *f).collect()
    }
}

/// Everything selection and later stages need to know about one GPU.
#[derive(Clone, Debug)]
pub struct PhysicalDeviceInfo {
    pub handle: vk::PhysicalDevice,
    pub name: String,
    pub properties: vk::PhysicalDeviceProperties,
    pub features: vk::PhysicalDeviceFeatures,
    pub memory: vk::PhysicalDeviceMemoryProperties,
    pub queue_families: Vec<vk::QueueFamilyProperties>,
    pub extensions: Vec<String>,
    pub indices: QueueFamilyIndices,
    pub swapchain: SwapchainSupport,
    pub max_samples: vk::SampleCountFlags,
    pub depth_format: Option<vk::Format>,
    pub texture_linear_blit: bool,
}

impl PhysicalDeviceInfo {
    pub fn has_extension(&self, name: &CStr) -> bool {
        let name = name.to_string_lossy();
        self.extensions.iter().any(|e| *e == name)
    }

    /// Why this device cannot be used; empty when it is suitable.
    pub fn unsuitable_reasons(&self) -> Vec<&'static str> {
        let mut reasons = Vec::new();
        if self.features.geometry_shader != vk::TRUE {
            reasons.push("no geometry shader");
        }
        if self.features.sampler_anisotropy != vk::TRUE {
            reasons.push("no sampler anisotropy");
        }
        if !self.indices.is_complete() {
            reasons.push("missing graphics or present queue family");
        }
        if !DEVICE_EXTENSIONS.iter().all(|e| self.has_extension(e)) {
            reasons.push("VK_KHR_swapchain not supported");
        }
        if !self.swapchain.is_adequate() {
            reasons.push("no surface formats or present modes");
        }
        if self.depth_format.is_none() {
            reasons.push("no depth format");
        }
        reasons
    }

    pub fn is_suitable(&self) -> bool {
        self.unsuitable_reasons().is_empty()
    }
}

/// Highest sample count both color and depth framebuffers support.
pub fn max_usable_sample_count(limits: &vk::PhysicalDeviceLimits) -> vk::SampleCountFlags {
    let counts =
        limits.framebuffer_color_sample_counts & limits.framebuffer_depth_sample_counts;
    [
        vk::SampleCountFlags::TYPE_64,
        vk::SampleCountFlags::TYPE_32,
        vk::SampleCountFlags::TYPE_16,
        vk::SampleCountFlags::TYPE_8,
        vk::SampleCountFlags::TYPE_4,
        vk::SampleCountFlags::TYPE_2,
    ]
    .into_iter()
    .find(|&c| counts.contains(c))
    .unwrap_or(vk::SampleCountFlags::TYPE_1)
}

/// `requested == 0` takes `max`; otherwise the largest count not above either.
pub fn choose_sample_count(requested: u32, max: vk::SampleCountFlags) -> vk::SampleCountFlags {
    if requested == 0 {
        return max;
    }
    let cap = requested.min(max.as_raw());
    let mut count = 1u32;
    while count * 2 <= cap {
        count *= 2;
    }
    vk::SampleCountFlags::from_raw(count)
}

pub fn find_depth_format(
    format_properties: impl Fn(vk::Format) -> vk::FormatProperties,
) -> Option<vk::Format> {
    DEPTH_FORMAT_CANDIDATES.into_iter().find(|&f| {
        format_properties(f)
            .optimal_tiling_features
            .contains(vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT)
    })
}

pub fn has_stencil_component(format: vk::Format) -> bool {
    matches!(
        format,
        vk::Format::D32_SFLOAT_S8_UINT | vk::Format::D24_UNORM_S8_UINT
    )
}

unsafe fn describe(
    instance: &ash::Instance,
    surface_loader: &surface::Instance,
    surface: vk::SurfaceKHR,
    pd: vk::PhysicalDevice,
) -> Result<PhysicalDeviceInfo> {
    let properties = instance.get_physical_device_properties(pd);
    let name = fixed_name(&properties.device_name)
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "<unnamed>".to_string());
    let features = instance.get_physical_device_features(pd);
    let memory = instance.get_physical_device_memory_properties(pd);
    let queue_families = instance.get_physical_device_queue_family_properties(pd);
    let extensions = instance
        .enumerate_device_extension_properties(pd)
        .context("enumerate_device_extension_properties")?
        .iter()
        .filter_map(|e| fixed_name(&e.extension_name))
        .map(|n| n.to_string_lossy().into_owned())
        .collect();

    let indices = find_queue_families(&queue_families, |i| {
        surface_loader.get_physical_device_surface_support(pd, i, surface)
    });

    let swapchain = SwapchainSupport::query(instance, surface_loader, pd, surface)
        .unwrap_or_else(|e| {
            tracing::warn!("{name}: surface query failed: {e:?}");
            SwapchainSupport::default()
        });

    let depth_format = find_depth_format(|f| instance.get_physical_device_format_properties(pd, f));
    let texture_linear_blit = instance
        .get_physical_device_format_properties(pd, TEXTURE_FORMAT)
        .optimal_tiling_features
        .contains(vk::FormatFeatureFlags::SAMPLED_IMAGE_FILTER_LINEAR);

    Ok(PhysicalDeviceInfo {
        handle: pd,
        name,
        max_samples: max_usable_sample_count(&properties.limits),
        properties,
        features,
        memory,
        queue_families,
        extensions,
        indices,
        swapchain,
        depth_format,
        texture_linear_blit,
    })
}

pub unsafe fn enumerate_physical_devices(
    instance: &ash::Instance,
    surface_loader: &surface::Instance,
    surface: vk::SurfaceKHR,
) -> Result<Vec<PhysicalDeviceInfo>> {
    instance
        .enumerate_physical_devices()
        .context("enumerate_physical_devices")?
        .into_iter()
        .map(|pd| describe(instance, surface_loader, surface, pd))
        .collect()
}

/// First suitable device in enumeration order.
pub fn pick_physical_device(
    devices: Vec<PhysicalDeviceInfo>,
) -> Result<PhysicalDeviceInfo, VkError> {
    for info in devices {
        let reasons = info.unsuitable_reasons();
        if reasons.is_empty() {
            tracing::info!(
                "using GPU '{}' ({:?}, max samples {:?}, depth {:?})",
                info.name,
                info.properties.device_type,
                info.max_samples,
                info.depth_format
            );
            return Ok(info);
        }
        tracing::info!("skipping GPU '{}': {}", info.name, reasons.join(", "));
    }
    Err(VkError::NoSuitableDevice)
}

/// Logical device plus its queues. Dropping waits for idle and destroys it.
pub struct DeviceContext {
    pub device: ash::Device,
    pub physical: PhysicalDeviceInfo,
    pub graphics_family: u32,
    pub present_family: u32,
    pub graphics_queue: vk::Queue,
    pub present_queue: vk::Queue,
    pub swapchain_loader: swapchain::Device,
    pub sample_shading: bool,
}

impl DeviceContext {
    pub unsafe fn new(
        instance: &ash::Instance,
        physical: PhysicalDeviceInfo,
        want_sample_shading: bool,
    ) -> Result<Self> {
        let (graphics_family, present_family) =
            physical.indices.pair().ok_or(VkError::NoSuitableDevice)?;

        let priority = [1.0f32];
        let queue_infos: Vec<vk::DeviceQueueCreateInfo> = physical
            .indices
            .unique()
            .into_iter()
            .map(|family| vk::DeviceQueueCreateInfo {
                s_type: vk::StructureType::DEVICE_QUEUE_CREATE_INFO,
                queue_family_index: family,
                queue_count: 1,
                p_queue_priorities: priority.as_ptr(),
                ..Default::default()
            })
            .collect();

        let sample_shading =
            want_sample_shading && physical.features.sample_rate_shading == vk::TRUE;
        if want_sample_shading && !sample_shading {
            tracing::warn!("sample shading requested but unsupported by '{}'", physical.name);
        }
        let features = vk::PhysicalDeviceFeatures {
            sampler_anisotropy: vk::TRUE,
            sample_rate_shading: if sample_shading { vk::TRUE } else { vk::FALSE },
            ..Default::default()
        };

        let ext_ptrs: Vec<*const c_char> = DEVICE_EXTENSIONS.iter().map(|e| e.as_ptr()).collect();
        let create_info = vk::DeviceCreateInfo {
            s_type: vk::StructureType::DEVICE_CREATE_INFO,
            queue_create_info_count: queue_infos.len() as u32,
            p_queue_create_infos: queue_infos.as_ptr(),
            enabled_extension_count: ext_ptrs.len() as u32,
            pp_enabled_extension_names: ext_ptrs.as_ptr(),
            p_enabled_features: &features,
            ..Default::default()
        };

        let device = instance
            .create_device(physical.handle, &create_info, None)
            .context("create_device")?;
        let graphics_queue = device.get_device_queue(graphics_family, 0);
        let present_queue = device.get_device_queue(present_family, 0);
        let swapchain_loader = swapchain::Device::new(instance, &device);

        tracing::info!(
            "device ready: graphics family {graphics_family}, present family {present_family}"
        );
        Ok(Self {
            device,
            physical,
            graphics_family,
            present_family,
            graphics_queue,
            present_queue,
            swapchain_loader,
            sample_shading,
        })
    }
}

impl Drop for DeviceContext {
    fn drop(&mut self) {
        unsafe {
            self.device.device_wait_idle().ok();
            self.device.destroy_device(None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn family(flags: vk::QueueFlags) -> vk::QueueFamilyProperties {
        vk::QueueFamilyProperties {
            queue_flags: flags,
            queue_count: 1,
            ..Default::default()
        }
    }

    fn suitable_info() -> PhysicalDeviceInfo {
        PhysicalDeviceInfo {
            handle: vk::PhysicalDevice::null(),
            name: "test gpu".into(),
            properties: vk::PhysicalDeviceProperties::default(),
            features: vk::PhysicalDeviceFeatures {
                geometry_shader: vk::TRUE,
                sampler_anisotropy: vk::TRUE,
                ..Default::default()
            },
            memory: vk::PhysicalDeviceMemoryProperties::default(),
            queue_families: vec![family(vk::QueueFlags::GRAPHICS)],
            extensions: vec!["VK_KHR_swapchain".into()],
            indices: QueueFamilyIndices {
                graphics: Some(0),
                present: Some(0),
            },
            swapchain: SwapchainSupport {
                capabilities: vk::SurfaceCapabilitiesKHR::default(),
                formats: vec![(
                    vk::SurfaceFormatKHR::default(),
                    vk::FormatProperties::default(),
                )],
                present_modes: vec![vk::PresentModeKHR::FIFO],
            },
            max_samples: vk::SampleCountFlags::TYPE_4,
            depth_format: Some(vk::Format::D32_SFLOAT),
            texture_linear_blit: true,
        }
    }

    #[test]
    fn queue_families_can_be_split() {
        let families = [
            family(vk::QueueFlags::COMPUTE),
            family(vk::QueueFlags::GRAPHICS),
            family(vk::QueueFlags::TRANSFER),
        ];
        let idx = find_queue_families(&families, |i| Ok(i == 2));
        assert_eq!(idx.graphics, Some(1));
        assert_eq!(idx.present, Some(2));
        assert_eq!(idx.unique(), vec![1, 2]);
    }

    #[test]
    fn shared_family_is_listed_once() {
        let families = [family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE)];
        let idx = find_queue_families(&families, |_| Ok(true));
        assert_eq!(idx.pair(), Some((0, 0)));
        assert_eq!(idx.unique(), vec![0]);
    }

    #[test]
    fn present_query_errors_count_as_unsupported() {
        let families = [family(vk::QueueFlags::GRAPHICS)];
        let idx = find_queue_families(&families, |_| Err(vk::Result::ERROR_SURFACE_LOST_KHR));
        assert_eq!(idx.graphics, Some(0));
        assert_eq!(idx.present, None);
        assert!(!idx.is_complete());
    }

    #[test]
    fn suitability_checks_each_requirement() {
        assert!(suitable_info().is_suitable());

        let mut no_geom = suitable_info();
        no_geom.features.geometry_shader = vk::FALSE;
        assert_eq!(no_geom.unsuitable_reasons(), vec!["no geometry shader"]);

        let mut no_swapchain = suitable_info();
        no_swapchain.extensions.clear();
        assert!(!no_swapchain.is_suitable());

        let mut no_modes = suitable_info();
        no_modes.swapchain.present_modes.clear();
        assert!(!no_modes.is_suitable());

        let mut no_present = suitable_info();
        no_present.indices.present = None;
        assert!(!no_present.is_suitable());
    }

    #[test]
    fn picks_first_suitable_device() {
        let mut bad = suitable_info();
        bad.name = "bad".into();
        bad.features.sampler_anisotropy = vk::FALSE;
        let mut good = suitable_info();
        good.name = "good".into();
        let mut later = suitable_info();
        later.name = "later".into();

        let picked = pick_physical_device(vec![bad, good, later]).expect("suitable device");
        assert_eq!(picked.name, "good");
    }

    #[test]
    fn no_suitable_device_is_an_error() {
        let mut bad = suitable_info();
        bad.swapchain.formats.clear();
        assert!(matches!(
            pick_physical_device(vec![bad]),
            Err(VkError::NoSuitableDevice)
        ));
        assert!(matches!(
            pick_physical_device(Vec::new()),
            Err(VkError::NoSuitableDevice)
        ));
    }

    #[test]
    fn sample_count_is_common_maximum() {
        let limits = vk::PhysicalDeviceLimits {
            framebuffer_color_sample_counts: vk::SampleCountFlags::TYPE_1
                | vk::SampleCountFlags::TYPE_2
                | vk::SampleCountFlags::TYPE_4
                | vk::SampleCountFlags::TYPE_8,
            framebuffer_depth_sample_counts: vk::SampleCountFlags::TYPE_1
                | vk::SampleCountFlags::TYPE_2
                | vk::SampleCountFlags::TYPE_4,
            ..Default::default()
        };
        assert_eq!(max_usable_sample_count(&limits), vk::SampleCountFlags::TYPE_4);
        assert_eq!(
            max_usable_sample_count(&vk::PhysicalDeviceLimits::default()),
            vk::SampleCountFlags::TYPE_1
        );
    }

    #[test]
    fn requested_samples_are_capped() {
        let max = vk::SampleCountFlags::TYPE_8;
        assert_eq!(choose_sample_count(0, max), max);
        assert_eq!(choose_sample_count(1, max), vk::SampleCountFlags::TYPE_1);
        assert_eq!(choose_sample_count(6, max), vk::SampleCountFlags::TYPE_4);
        assert_eq!(choose_sample_count(64, max), vk::SampleCountFlags::TYPE_8);
    }

    #[test]
    fn depth_format_takes_first_supported_candidate() {
        let supports = |wanted: vk::Format| {
            move |f: vk::Format| vk::FormatProperties {
                optimal_tiling_features: if f == wanted {
                    vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT
                } else {
                    vk::FormatFeatureFlags::empty()
                },
                ..Default::default()
            }
        };
        assert_eq!(
            find_depth_format(supports(vk::Format::D24_UNORM_S8_UINT)),
            Some(vk::Format::D24_UNORM_S8_UINT)
        );
        assert_eq!(
            find_depth_format(|_| vk::FormatProperties {
                optimal_tiling_features: vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT,
                ..Default::default()
            }),
            Some(vk::Format::D32_SFLOAT)
        );
        assert_eq!(find_depth_format(|_| vk::FormatProperties::default()), None);
        assert!(has_stencil_component(vk::Format::D24_UNORM_S8_UINT));
        assert!(!has_stencil_component(vk::Format::D32_SFLOAT));
    }
}
