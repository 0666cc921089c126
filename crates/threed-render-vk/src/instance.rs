// SPDX-License-Identifier: CEPL-1.0
//! Instance, surface and validation plumbing.
use crate::error::VkError;
use anyhow::{anyhow, Context, Result};
use ash::ext::debug_utils;
use ash::khr::surface;
use ash::{vk, Entry};
use raw_window_handle::{HasDisplayHandle, HasWindowHandle, RawDisplayHandle};
use std::ffi::{c_char, c_void, CStr};

pub const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";
const APP_NAME: &CStr = c"threed";

/// Reads a NUL-terminated name out of a fixed-size Vulkan char array.
pub fn fixed_name(raw: &[c_char]) -> Option<&CStr> {
    CStr::from_bytes_until_nul(bytemuck::cast_slice(raw)).ok()
}

/// Names in `wanted` that are absent from `available`.
pub fn missing_names(available: &[&CStr], wanted: &[&CStr]) -> Vec<String> {
    wanted
        .iter()
        .filter(|w| !available.contains(w))
        .map(|w| w.to_string_lossy().into_owned())
        .collect()
}

unsafe extern "system" fn debug_callback(
    severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    types: vk::DebugUtilsMessageTypeFlagsEXT,
    data: *const vk::DebugUtilsMessengerCallbackDataEXT<'_>,
    _user: *mut c_void,
) -> vk::Bool32 {
    if data.is_null() || (*data).p_message.is_null() {
        return vk::FALSE;
    }
    let msg = CStr::from_ptr((*data).p_message).to_string_lossy();
    if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR) {
        tracing::error!("[vulkan {types:?}] {msg}");
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING) {
        tracing::warn!("[vulkan {types:?}] {msg}");
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::INFO) {
        tracing::info!("[vulkan {types:?}] {msg}");
    } else {
        tracing::debug!("[vulkan {types:?}] {msg}");
    }
    vk::FALSE
}

fn debug_messenger_info() -> vk::DebugUtilsMessengerCreateInfoEXT<'static> {
    vk::DebugUtilsMessengerCreateInfoEXT {
        s_type: vk::StructureType::DEBUG_UTILS_MESSENGER_CREATE_INFO_EXT,
        message_severity: vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE
            | vk::DebugUtilsMessageSeverityFlagsEXT::INFO
            | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
            | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
        message_type: vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
            | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
            | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
        pfn_user_callback: Some(debug_callback),
        ..Default::default()
    }
}

/// Instance-scoped objects. Dropping destroys surface, messenger, then instance.
pub struct InstanceContext {
    pub entry: Entry,
    pub instance: ash::Instance,
    pub surface_loader: surface::Instance,
    pub surface: vk::SurfaceKHR,
    debug: Option<(debug_utils::Instance, vk::DebugUtilsMessengerEXT)>,
}

impl InstanceContext {
    // STRICT ORDER: instance, messenger, surface. Devices are picked against this surface.
    pub unsafe fn new(
        window: &dyn HasWindowHandle,
        display: &dyn HasDisplayHandle,
        validation: bool,
    ) -> Result<Self> {
        let dh = display
            .display_handle()
            .map_err(|e| anyhow!("{e}"))?
            .as_raw();
        let wh = window.window_handle().map_err(|e| anyhow!("{e}"))?.as_raw();

        let entry = Entry::load().context("load Vulkan loader")?;
        let (instance, validation) = create_instance(&entry, dh, validation)?;
        let surface_loader = surface::Instance::new(&entry, &instance);

        let mut ctx = InstanceContext {
            entry,
            instance,
            surface_loader,
            surface: vk::SurfaceKHR::null(),
            debug: None,
        };

        if validation {
            let loader = debug_utils::Instance::new(&ctx.entry, &ctx.instance);
            match loader.create_debug_utils_messenger(&debug_messenger_info(), None) {
                Ok(m) => ctx.debug = Some((loader, m)),
                Err(e) => tracing::warn!("debug messenger unavailable: {e:?}"),
            }
        }

        ctx.surface = ash_window::create_surface(&ctx.entry, &ctx.instance, dh, wh, None)
            .context("ash_window::create_surface")?;
        Ok(ctx)
    }

    pub fn validation_enabled(&self) -> bool {
        self.debug.is_some()
    }
}

impl Drop for InstanceContext {
    fn drop(&mut self) {
        unsafe {
            if let Some(surface) = crate::take_handle(&mut self.surface) {
                self.surface_loader.destroy_surface(surface, None);
            }
            if let Some((loader, messenger)) = self.debug.take() {
                loader.destroy_debug_utils_messenger(messenger, None);
            }
            self.instance.destroy_instance(None);
        }
    }
}

/// Returns the instance and whether validation actually got enabled.
unsafe fn create_instance(
    entry: &Entry,
    display_raw: RawDisplayHandle,
    want_validation: bool,
) -> Result<(ash::Instance, bool)> {
    let platform = ash_window::enumerate_required_extensions(display_raw)
        .context("enumerate_required_extensions")?;
    let platform: Vec<&CStr> = platform.iter().map(|&p| CStr::from_ptr(p)).collect();

    let ext_props = entry
        .enumerate_instance_extension_properties(None)
        .context("enumerate_instance_extension_properties")?;
    let available_exts: Vec<&CStr> = ext_props
        .iter()
        .filter_map(|e| fixed_name(&e.extension_name))
        .collect();

    let missing = missing_names(&available_exts, &platform);
    if !missing.is_empty() {
        return Err(VkError::MissingInstanceExtensions(missing).into());
    }

    let mut validation = want_validation;
    if validation {
        let layer_props = entry
            .enumerate_instance_layer_properties()
            .context("enumerate_instance_layer_properties")?;
        let layers: Vec<&CStr> = layer_props
            .iter()
            .filter_map(|l| fixed_name(&l.layer_name))
            .collect();
        let mut missing = missing_names(&layers, &[VALIDATION_LAYER]);
        missing.extend(missing_names(&available_exts, &[debug_utils::NAME]));
        if !missing.is_empty() {
            tracing::warn!("validation requested but {missing:?} missing; continuing without it");
            validation = false;
        }
    }

    let mut extensions: Vec<*const c_char> = platform.iter().map(|n| n.as_ptr()).collect();
    let mut layers: Vec<*const c_char> = Vec::new();
    if validation {
        extensions.push(debug_utils::NAME.as_ptr());
        layers.push(VALIDATION_LAYER.as_ptr());
    }

    let app_info = vk::ApplicationInfo {
        s_type: vk::StructureType::APPLICATION_INFO,
        p_application_name: APP_NAME.as_ptr(),
        application_version: vk::make_api_version(0, 0, 1, 0),
        p_engine_name: APP_NAME.as_ptr(),
        engine_version: vk::make_api_version(0, 0, 1, 0),
        api_version: vk::API_VERSION_1_0,
        ..Default::default()
    };

    // Covers instance creation/destruction, which the messenger proper cannot see.
    let mut debug_info = debug_messenger_info();
    let create_info = vk::InstanceCreateInfo {
        s_type: vk::StructureType::INSTANCE_CREATE_INFO,
        p_next: if validation {
            (&mut debug_info as *mut vk::DebugUtilsMessengerCreateInfoEXT).cast()
        } else {
            std::ptr::null()
        },
        p_application_info: &app_info,
        enabled_extension_count: extensions.len() as u32,
        pp_enabled_extension_names: extensions.as_ptr(),
        enabled_layer_count: layers.len() as u32,
        pp_enabled_layer_names: layers.as_ptr(),
        ..Default::default()
    };

    let instance = entry
        .create_instance(&create_info, None)
        .context("create_instance")?;
    tracing::info!(
        "instance created: {} extensions, validation={}",
        extensions.len(),
        validation
    );
    Ok((instance, validation))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn props(name: &CStr) -> vk::ExtensionProperties {
        let mut p = vk::ExtensionProperties::default();
        for (dst, &src) in p.extension_name.iter_mut().zip(name.to_bytes()) {
            *dst = src as c_char;
        }
        p
    }

    #[test]
    fn fixed_name_stops_at_nul() {
        let p = props(c"VK_KHR_surface");
        assert_eq!(fixed_name(&p.extension_name), Some(c"VK_KHR_surface"));
    }

    #[test]
    fn fixed_name_rejects_unterminated() {
        let raw = [b'a' as c_char; 4];
        assert_eq!(fixed_name(&raw), None);
    }

    #[test]
    fn missing_names_reports_only_absent() {
        let available = [c"VK_KHR_surface", c"VK_KHR_xcb_surface"];
        let wanted = [c"VK_KHR_surface", c"VK_KHR_wayland_surface"];
        assert_eq!(
            missing_names(&available, &wanted),
            vec!["VK_KHR_wayland_surface".to_string()]
        );
        assert!(missing_names(&available, &available).is_empty());
    }
}
