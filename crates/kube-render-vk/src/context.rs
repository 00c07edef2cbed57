// SPDX-License-Identifier: CEPL-1.0
//! Device & surface negotiation.

use crate::error::VkError;
use anyhow::{Context, Result};
use ash::ext::debug_utils;
use ash::khr::{surface, swapchain};
use ash::{vk, Entry, Instance};
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use std::ffi::{c_char, c_void, CStr, CString};
use std::sync::Arc;
use tracing::{debug, error, info, trace, warn};

pub const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";
pub const REQUIRED_DEVICE_EXTENSIONS: [&CStr; 1] = [swapchain::NAME];

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct QueueFamilyIndices {
    pub graphics: Option<u32>,
    pub present: Option<u32>,
}

impl QueueFamilyIndices {
    pub fn complete(&self) -> Option<QueueFamilies> {
        Some(QueueFamilies {
            graphics: self.graphics?,
            present: self.present?,
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QueueFamilies {
    pub graphics: u32,
    pub present: u32,
}

impl QueueFamilies {
    pub fn is_shared(&self) -> bool {
        self.graphics == self.present
    }

    /// One entry per distinct family, graphics first.
    pub fn unique(&self) -> Vec<u32> {
        if self.is_shared() {
            vec![self.graphics]
        } else {
            vec![self.graphics, self.present]
        }
    }

    /// Sharing mode for images touched by both queues.
    pub fn sharing(&self) -> (vk::SharingMode, Vec<u32>) {
        if self.is_shared() {
            (vk::SharingMode::EXCLUSIVE, Vec::new())
        } else {
            (vk::SharingMode::CONCURRENT, self.unique())
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct QueueFamilySupport {
    pub graphics: bool,
    pub present: bool,
}

/// Walks families in order and stops as soon as both roles have a home.
pub fn find_queue_families(families: &[QueueFamilySupport]) -> QueueFamilyIndices {
    let mut found = QueueFamilyIndices::default();
    for (i, family) in families.iter().enumerate() {
        if family.graphics {
            found.graphics = Some(i as u32);
        }
        if family.present {
            found.present = Some(i as u32);
        }
        if found.complete().is_some() {
            break;
        }
    }
    found
}

/// What selection needs to know about one physical device.
#[derive(Clone, Debug)]
pub struct DeviceCandidate {
    pub name: String,
    pub device_type: vk::PhysicalDeviceType,
    pub queue_families: Vec<QueueFamilySupport>,
    pub extensions: Vec<CString>,
    pub surface_format_count: usize,
    pub present_mode_count: usize,
}

impl DeviceCandidate {
    pub fn has_extensions(&self, required: &[&CStr]) -> bool {
        required
            .iter()
            .all(|want| self.extensions.iter().any(|have| have.as_c_str() == *want))
    }

    /// Queue families if the device can drive the surface at all.
    pub fn suitability(&self) -> Option<QueueFamilies> {
        let families = find_queue_families(&self.queue_families).complete()?;
        let ok = self.has_extensions(&REQUIRED_DEVICE_EXTENSIONS)
            && self.surface_format_count > 0
            && self.present_mode_count > 0;
        ok.then_some(families)
    }
}

pub fn device_score(kind: vk::PhysicalDeviceType) -> u32 {
    match kind {
        vk::PhysicalDeviceType::DISCRETE_GPU => 1000,
        vk::PhysicalDeviceType::INTEGRATED_GPU => 500,
        _ => 100,
    }
}

/// Highest score among the suitable candidates; the first one seen wins a tie.
pub fn select_device(candidates: &[DeviceCandidate]) -> Result<(usize, QueueFamilies), VkError> {
    let mut best: Option<(usize, QueueFamilies, u32)> = None;
    for (i, candidate) in candidates.iter().enumerate() {
        let Some(families) = candidate.suitability() else {
            debug!("skip device {:?}: not suitable", candidate.name);
            continue;
        };
        let score = device_score(candidate.device_type);
        if best.map_or(true, |(_, _, s)| score > s) {
            best = Some((i, families, score));
        }
    }
    best.map(|(i, families, _)| (i, families))
        .ok_or(VkError::NoSuitableDevice {
            candidates: candidates.len(),
        })
}

unsafe extern "system" fn debug_callback(
    severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    kind: vk::DebugUtilsMessageTypeFlagsEXT,
    data: *const vk::DebugUtilsMessengerCallbackDataEXT<'_>,
    _user: *mut c_void,
) -> vk::Bool32 {
    let msg = if data.is_null() || unsafe { (*data).p_message.is_null() } {
        std::borrow::Cow::Borrowed("<no message>")
    } else {
        unsafe { CStr::from_ptr((*data).p_message) }.to_string_lossy()
    };
    if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR) {
        error!("[vk][{kind:?}] {msg}");
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING) {
        warn!("[vk][{kind:?}] {msg}");
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::INFO) {
        info!("[vk][{kind:?}] {msg}");
    } else {
        trace!("[vk][{kind:?}] {msg}");
    }
    vk::FALSE
}

#[derive(Clone, Copy, Debug)]
pub struct NegotiateOptions {
    pub validation: bool,
}

// Instance-level objects. Dropped after the logical device is gone.
struct InstanceScope {
    entry: Entry,
    instance: Instance,
    debug: Option<(debug_utils::Instance, vk::DebugUtilsMessengerEXT)>,
    surface_loader: surface::Instance,
    surface: vk::SurfaceKHR,
}

impl Drop for InstanceScope {
    fn drop(&mut self) {
        unsafe {
            // Destroying a null surface is a no-op, so a half-built scope unwinds cleanly.
            self.surface_loader.destroy_surface(self.surface, None);
            if let Some((loader, messenger)) = self.debug.take() {
                loader.destroy_debug_utils_messenger(messenger, None);
            }
            self.instance.destroy_instance(None);
        }
        debug!("instance destroyed");
    }
}

/// Instance, surface, chosen GPU, logical device and its two queues.
pub struct DeviceContext {
    pub device: Arc<ash::Device>,
    pub physical: vk::PhysicalDevice,
    pub families: QueueFamilies,
    pub graphics_queue: vk::Queue,
    pub present_queue: vk::Queue,
    pub swapchain_loader: swapchain::Device,
    memory: vk::PhysicalDeviceMemoryProperties,
    scope: InstanceScope,
}

impl DeviceContext {
    /// Runs the full negotiation. Any failure is fatal and names the failed step.
    pub fn negotiate(
        window: &dyn HasWindowHandle,
        display: &dyn HasDisplayHandle,
        opts: NegotiateOptions,
    ) -> Result<Self> {
        unsafe { negotiate(window, display, opts) }
    }

    pub fn surface(&self) -> vk::SurfaceKHR {
        self.scope.surface
    }

    pub fn memory_types(&self) -> &[vk::MemoryType] {
        &self.memory.memory_types[..self.memory.memory_type_count as usize]
    }

    pub fn surface_capabilities(&self) -> Result<vk::SurfaceCapabilitiesKHR> {
        unsafe {
            self.scope
                .surface_loader
                .get_physical_device_surface_capabilities(self.physical, self.scope.surface)
        }
        .context("query surface capabilities")
    }

    pub fn surface_formats(&self) -> Result<Vec<vk::SurfaceFormatKHR>> {
        unsafe {
            self.scope
                .surface_loader
                .get_physical_device_surface_formats(self.physical, self.scope.surface)
        }
        .context("query surface formats")
    }

    pub fn present_modes(&self) -> Result<Vec<vk::PresentModeKHR>> {
        unsafe {
            self.scope
                .surface_loader
                .get_physical_device_surface_present_modes(self.physical, self.scope.surface)
        }
        .context("query present modes")
    }

    pub fn format_features(&self, format: vk::Format) -> vk::FormatFeatureFlags {
        unsafe {
            self.scope
                .instance
                .get_physical_device_format_properties(self.physical, format)
        }
        .optimal_tiling_features
    }

    pub fn wait_idle(&self) -> Result<()> {
        unsafe { self.device.device_wait_idle() }.context("device wait idle")
    }
}

impl Drop for DeviceContext {
    fn drop(&mut self) {
        if Arc::strong_count(&self.device) > 1 {
            warn!(
                "{} device handle(s) still alive at device teardown",
                Arc::strong_count(&self.device) - 1
            );
        }
        unsafe {
            let _ = self.device.device_wait_idle();
            self.device.destroy_device(None);
        }
        debug!("logical device destroyed");
        // `scope` drops next: surface, messenger, instance.
    }
}

unsafe fn validation_available(entry: &Entry) -> bool {
    match unsafe { entry.enumerate_instance_layer_properties() } {
        Ok(layers) => layers
            .iter()
            .any(|l| l.layer_name_as_c_str().is_ok_and(|n| n == VALIDATION_LAYER)),
        Err(e) => {
            warn!("enumerate instance layers: {e:?}");
            false
        }
    }
}

unsafe fn create_messenger(
    entry: &Entry,
    instance: &Instance,
) -> Option<(debug_utils::Instance, vk::DebugUtilsMessengerEXT)> {
    let loader = debug_utils::Instance::new(entry, instance);
    let ci = vk::DebugUtilsMessengerCreateInfoEXT::default()
        .message_severity(
            vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE
                | vk::DebugUtilsMessageSeverityFlagsEXT::INFO
                | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
        )
        .message_type(
            vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
        )
        .pfn_user_callback(Some(debug_callback));
    match unsafe { loader.create_debug_utils_messenger(&ci, None) } {
        Ok(messenger) => Some((loader, messenger)),
        Err(e) => {
            warn!("debug messenger unavailable: {e:?}");
            None
        }
    }
}

unsafe fn describe_device(
    scope: &InstanceScope,
    phys: vk::PhysicalDevice,
) -> Result<DeviceCandidate> {
    let instance = &scope.instance;
    let props = unsafe { instance.get_physical_device_properties(phys) };
    let name = props
        .device_name_as_c_str()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    let queue_families = unsafe { instance.get_physical_device_queue_family_properties(phys) }
        .iter()
        .enumerate()
        .map(|(i, family)| QueueFamilySupport {
            graphics: family.queue_flags.contains(vk::QueueFlags::GRAPHICS),
            present: unsafe {
                scope.surface_loader.get_physical_device_surface_support(
                    phys,
                    i as u32,
                    scope.surface,
                )
            }
            .unwrap_or(false),
        })
        .collect();

    let extensions = unsafe { instance.enumerate_device_extension_properties(phys) }
        .with_context(|| format!("enumerate extensions of {name}"))?
        .iter()
        .filter_map(|e| e.extension_name_as_c_str().ok().map(CStr::to_owned))
        .collect();

    let loader = &scope.surface_loader;
    let surface_format_count =
        unsafe { loader.get_physical_device_surface_formats(phys, scope.surface) }
            .map_or(0, |v| v.len());
    let present_mode_count =
        unsafe { loader.get_physical_device_surface_present_modes(phys, scope.surface) }
            .map_or(0, |v| v.len());

    Ok(DeviceCandidate {
        name,
        device_type: props.device_type,
        queue_families,
        extensions,
        surface_format_count,
        present_mode_count,
    })
}

// STRICT ORDER: surface extensions → layers → instance → messenger → surface
// → device selection → logical device → queues.
unsafe fn negotiate(
    window: &dyn HasWindowHandle,
    display: &dyn HasDisplayHandle,
    opts: NegotiateOptions,
) -> Result<DeviceContext> {
    // 1) The windowing layer must be able to hand us a surface.
    let display_raw = display
        .display_handle()
        .context("negotiate: display handle")?
        .as_raw();
    let window_raw = window
        .window_handle()
        .context("negotiate: window handle")?
        .as_raw();
    let surface_exts = ash_window::enumerate_required_extensions(display_raw)
        .context("negotiate: required surface extensions")?;

    // 2) Validation is best effort.
    let entry = Entry::linked();
    let validation = opts.validation && {
        let ok = unsafe { validation_available(&entry) };
        if !ok {
            warn!("validation requested but {VALIDATION_LAYER:?} is not installed; continuing without it");
        }
        ok
    };

    // 3) Instance
    let app_info = vk::ApplicationInfo::default()
        .application_name(c"Kube Vulkan")
        .engine_name(c"kube")
        .api_version(vk::API_VERSION_1_0);
    let mut exts: Vec<*const c_char> = surface_exts.to_vec();
    let mut layers: Vec<*const c_char> = Vec::new();
    if validation {
        exts.push(debug_utils::NAME.as_ptr());
        layers.push(VALIDATION_LAYER.as_ptr());
    }
    let ci = vk::InstanceCreateInfo::default()
        .application_info(&app_info)
        .enabled_extension_names(&exts)
        .enabled_layer_names(&layers);
    let instance =
        unsafe { entry.create_instance(&ci, None) }.context("negotiate: create instance")?;

    // 4) Debug messenger
    let debug = if validation {
        unsafe { create_messenger(&entry, &instance) }
    } else {
        None
    };

    let surface_loader = surface::Instance::new(&entry, &instance);
    let mut scope = InstanceScope {
        entry,
        instance,
        debug,
        surface_loader,
        surface: vk::SurfaceKHR::null(),
    };

    // 5) Surface
    scope.surface = unsafe {
        ash_window::create_surface(&scope.entry, &scope.instance, display_raw, window_raw, None)
    }
    .context("negotiate: create surface")?;

    // 6–7) Filter + score
    let physicals = unsafe { scope.instance.enumerate_physical_devices() }
        .context("negotiate: enumerate physical devices")?;
    let candidates = physicals
        .iter()
        .map(|&p| unsafe { describe_device(&scope, p) })
        .collect::<Result<Vec<_>>>()
        .context("negotiate: describe physical devices")?;
    let (chosen, families) = select_device(&candidates).context("negotiate: select device")?;
    let physical = physicals[chosen];
    info!(
        "device = {} ({:?}), graphics family {}, present family {}",
        candidates[chosen].name,
        candidates[chosen].device_type,
        families.graphics,
        families.present
    );

    // 8) Logical device, one queue per distinct family
    let priorities = [1.0f32];
    let queue_infos: Vec<_> = families
        .unique()
        .into_iter()
        .map(|family| {
            vk::DeviceQueueCreateInfo::default()
                .queue_family_index(family)
                .queue_priorities(&priorities)
        })
        .collect();
    let ext_names: Vec<*const c_char> =
        REQUIRED_DEVICE_EXTENSIONS.iter().map(|e| e.as_ptr()).collect();
    let features = vk::PhysicalDeviceFeatures::default();
    let device_ci = vk::DeviceCreateInfo::default()
        .queue_create_infos(&queue_infos)
        .enabled_extension_names(&ext_names)
        .enabled_features(&features);
    let device = unsafe { scope.instance.create_device(physical, &device_ci, None) }
        .context("negotiate: create logical device")?;

    // 9) Queues
    let graphics_queue = unsafe { device.get_device_queue(families.graphics, 0) };
    let present_queue = unsafe { device.get_device_queue(families.present, 0) };

    let memory = unsafe {
        scope
            .instance
            .get_physical_device_memory_properties(physical)
    };
    let swapchain_loader = swapchain::Device::new(&scope.instance, &device);

    Ok(DeviceContext {
        device: Arc::new(device),
        physical,
        families,
        graphics_queue,
        present_queue,
        swapchain_loader,
        memory,
        scope,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const BOTH: QueueFamilySupport = QueueFamilySupport {
        graphics: true,
        present: true,
    };
    const GFX: QueueFamilySupport = QueueFamilySupport {
        graphics: true,
        present: false,
    };
    const PRESENT: QueueFamilySupport = QueueFamilySupport {
        graphics: false,
        present: true,
    };
    const NONE: QueueFamilySupport = QueueFamilySupport {
        graphics: false,
        present: false,
    };

    fn candidate(
        kind: vk::PhysicalDeviceType,
        families: &[QueueFamilySupport],
        swapchain_ext: bool,
        formats: usize,
        modes: usize,
    ) -> DeviceCandidate {
        let mut extensions = vec![c"VK_KHR_maintenance1".to_owned()];
        if swapchain_ext {
            extensions.push(swapchain::NAME.to_owned());
        }
        DeviceCandidate {
            name: format!("{kind:?}"),
            device_type: kind,
            queue_families: families.to_vec(),
            extensions,
            surface_format_count: formats,
            present_mode_count: modes,
        }
    }

    #[test]
    fn queue_families_stop_once_both_found() {
        let found = find_queue_families(&[GFX, PRESENT, BOTH]);
        assert_eq!(found.complete(), Some(QueueFamilies { graphics: 0, present: 1 }));

        let found = find_queue_families(&[GFX, BOTH]);
        assert_eq!(found.complete(), Some(QueueFamilies { graphics: 1, present: 1 }));

        assert_eq!(find_queue_families(&[GFX, NONE]).complete(), None);
        assert_eq!(find_queue_families(&[]).complete(), None);
    }

    #[test]
    fn sharing_follows_family_split() {
        let shared = QueueFamilies { graphics: 2, present: 2 };
        assert_eq!(shared.unique(), vec![2]);
        assert_eq!(shared.sharing(), (vk::SharingMode::EXCLUSIVE, vec![]));

        let split = QueueFamilies { graphics: 0, present: 3 };
        assert_eq!(split.unique(), vec![0, 3]);
        assert_eq!(split.sharing(), (vk::SharingMode::CONCURRENT, vec![0, 3]));
    }

    #[test]
    fn discrete_beats_integrated_beats_other() {
        let list = [
            candidate(vk::PhysicalDeviceType::CPU, &[BOTH], true, 1, 1),
            candidate(vk::PhysicalDeviceType::INTEGRATED_GPU, &[BOTH], true, 1, 1),
            candidate(vk::PhysicalDeviceType::DISCRETE_GPU, &[GFX, PRESENT], true, 1, 1),
        ];
        let (i, families) = select_device(&list).unwrap();
        assert_eq!(i, 2);
        assert_eq!(families, QueueFamilies { graphics: 0, present: 1 });
    }

    #[test]
    fn first_seen_wins_ties() {
        let list = [
            candidate(vk::PhysicalDeviceType::INTEGRATED_GPU, &[BOTH], true, 1, 1),
            candidate(vk::PhysicalDeviceType::INTEGRATED_GPU, &[BOTH], true, 4, 4),
        ];
        assert_eq!(select_device(&list).unwrap().0, 0);
    }

    #[test]
    fn empty_list_is_no_suitable_device() {
        assert!(matches!(
            select_device(&[]),
            Err(VkError::NoSuitableDevice { candidates: 0 })
        ));
    }

    // Every combination of capabilities over a small fixture space: the selected
    // device is always one that has everything, and a fully capable device is
    // always found when one exists.
    #[test]
    fn never_selects_an_incapable_device() {
        let family_sets: [&[QueueFamilySupport]; 5] =
            [&[], &[NONE], &[GFX], &[PRESENT], &[BOTH]];
        let kinds = [
            vk::PhysicalDeviceType::DISCRETE_GPU,
            vk::PhysicalDeviceType::INTEGRATED_GPU,
            vk::PhysicalDeviceType::OTHER,
        ];
        let mut pool = Vec::new();
        for kind in kinds {
            for families in family_sets {
                for ext in [false, true] {
                    for formats in [0, 2] {
                        for modes in [0, 1] {
                            pool.push(candidate(kind, families, ext, formats, modes));
                        }
                    }
                }
            }
        }

        // Sliding windows of three give varied mixes and orders.
        for window in pool.windows(3) {
            let capable: Vec<bool> = window.iter().map(|c| c.suitability().is_some()).collect();
            match select_device(window) {
                Ok((i, _)) => {
                    let c = &window[i];
                    assert!(capable[i]);
                    assert!(c.has_extensions(&REQUIRED_DEVICE_EXTENSIONS));
                    assert!(c.surface_format_count > 0 && c.present_mode_count > 0);
                    let f = find_queue_families(&c.queue_families);
                    assert!(f.graphics.is_some() && f.present.is_some());
                    for (j, other) in window.iter().enumerate() {
                        if capable[j] {
                            assert!(device_score(other.device_type) <= device_score(c.device_type));
                        }
                    }
                }
                Err(VkError::NoSuitableDevice { candidates }) => {
                    assert_eq!(candidates, 3);
                    assert!(capable.iter().all(|ok| !ok));
                }
                Err(e) => panic!("unexpected {e}"),
            }
        }
    }
}
