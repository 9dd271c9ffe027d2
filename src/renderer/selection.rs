//! Pure decisions made while bringing up the device and its swapchain.

use crate::error::RenderError;
use crate::renderer::backend::{
    ColorSpace, Extent2d, MemoryProperties, MemoryType, PhysicalDeviceInfo, PhysicalDeviceType,
    PixelFormat, PresentMode, SurfaceCapabilities, SurfaceFormat,
};

const QUEUE_FAMILY_SCORE: u32 = 10;
const SWAPCHAIN_EXTENSION_SCORE: u32 = 10;
const SWAPCHAIN_SUPPORT_SCORE: u32 = 10;
const DISCRETE_GPU_BONUS: u32 = 1;

pub fn score_physical_device(device: &PhysicalDeviceInfo) -> u32 {
    let mut score = 0;

    if device.queue_families.is_complete() {
        score += QUEUE_FAMILY_SCORE;
    }
    if device.supports_swapchain {
        score += SWAPCHAIN_EXTENSION_SCORE;
    }
    if device.swapchain_support.is_adequate() {
        score += SWAPCHAIN_SUPPORT_SCORE;
    }
    // Only breaks ties between otherwise usable devices.
    if score > 0 && device.device_type == PhysicalDeviceType::Discrete {
        score += DISCRETE_GPU_BONUS;
    }

    score
}

/// Picks the highest scoring device; the first one wins ties.
pub fn select_physical_device(
    candidates: &[PhysicalDeviceInfo],
) -> Result<&PhysicalDeviceInfo, RenderError> {
    let mut best: Option<(&PhysicalDeviceInfo, u32)> = None;

    for candidate in candidates {
        let score = score_physical_device(candidate);
        log::debug!("GPU candidate {:?} scored {}", candidate.name, score);
        if best.map_or(true, |(_, best_score)| score > best_score) {
            best = Some((candidate, score));
        }
    }

    match best {
        Some((device, score)) if score > 0 && device.queue_families.is_complete() => Ok(device),
        _ => Err(RenderError::NoSuitableDevice),
    }
}

pub fn choose_surface_format(available: &[SurfaceFormat]) -> Result<SurfaceFormat, RenderError> {
    available
        .iter()
        .copied()
        .find(|candidate| {
            matches!(
                candidate.format,
                PixelFormat::Bgra8Unorm | PixelFormat::Rgba8Unorm
            ) && candidate.color_space == ColorSpace::SrgbNonLinear
        })
        .or_else(|| available.first().copied())
        .ok_or(RenderError::NoSurfaceFormat)
}

pub fn choose_present_mode(preferred: PresentMode, available: &[PresentMode]) -> PresentMode {
    if available.contains(&preferred) {
        preferred
    } else {
        PresentMode::Fifo
    }
}

pub fn choose_extent(capabilities: &SurfaceCapabilities, framebuffer: Extent2d) -> Extent2d {
    if let Some(current) = capabilities.current_extent {
        return current;
    }

    let min = capabilities.min_image_extent;
    let max = capabilities.max_image_extent;
    Extent2d {
        width: framebuffer.width.clamp(min.width, max.width.max(min.width)),
        height: framebuffer.height.clamp(min.height, max.height.max(min.height)),
    }
}

pub fn choose_image_count(capabilities: &SurfaceCapabilities) -> u32 {
    let desired = capabilities.min_image_count + 1;
    if capabilities.max_image_count > 0 {
        desired.min(capabilities.max_image_count)
    } else {
        desired
    }
}

/// Returns the first name in `required` that `supported` lacks.
pub fn first_missing<'a>(required: &'a [String], supported: &[String]) -> Option<&'a str> {
    required
        .iter()
        .find(|name| !supported.contains(name))
        .map(String::as_str)
}

pub fn find_memory_type(
    memory_types: &[MemoryType],
    type_bits: u32,
    properties: MemoryProperties,
) -> Result<u32, RenderError> {
    memory_types
        .iter()
        .enumerate()
        .find(|(index, memory_type)| {
            *index < 32
                && type_bits & (1 << index) != 0
                && memory_type.properties.contains(properties)
        })
        .map(|(index, _)| index as u32)
        .ok_or_else(|| RenderError::NoSuitableMemoryType {
            type_bits,
            properties: format!("{properties:?}"),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::backend::{QueueFamilies, SwapchainSupport};

    fn capabilities() -> SurfaceCapabilities {
        SurfaceCapabilities {
            current_extent: None,
            min_image_extent: Extent2d::new(1, 1),
            max_image_extent: Extent2d::new(4096, 4096),
            min_image_count: 2,
            max_image_count: 3,
        }
    }

    fn gpu(name: &str, device_type: PhysicalDeviceType) -> PhysicalDeviceInfo {
        PhysicalDeviceInfo {
            index: 0,
            name: name.to_string(),
            device_type,
            queue_families: QueueFamilies {
                graphics: Some(0),
                present: Some(0),
            },
            supports_swapchain: true,
            swapchain_support: SwapchainSupport {
                capabilities: capabilities(),
                formats: vec![SurfaceFormat {
                    format: PixelFormat::Bgra8Unorm,
                    color_space: ColorSpace::SrgbNonLinear,
                }],
                present_modes: vec![PresentMode::Fifo],
            },
            max_sampler_anisotropy: 16.0,
        }
    }

    #[test]
    fn complete_device_scores_thirty_plus_discrete_bonus() {
        assert_eq!(
            score_physical_device(&gpu("igpu", PhysicalDeviceType::Integrated)),
            30
        );
        assert_eq!(
            score_physical_device(&gpu("dgpu", PhysicalDeviceType::Discrete)),
            31
        );
    }

    #[test]
    fn discrete_bonus_needs_a_positive_score() {
        let mut useless = gpu("dgpu", PhysicalDeviceType::Discrete);
        useless.queue_families = QueueFamilies::default();
        useless.supports_swapchain = false;
        useless.swapchain_support.formats.clear();
        assert_eq!(score_physical_device(&useless), 0);
    }

    #[test]
    fn selection_prefers_discrete_and_keeps_first_on_ties() {
        let mut first = gpu("first", PhysicalDeviceType::Integrated);
        first.index = 0;
        let mut second = gpu("second", PhysicalDeviceType::Integrated);
        second.index = 1;
        let mut third = gpu("third", PhysicalDeviceType::Discrete);
        third.index = 2;

        let tied = [first.clone(), second.clone()];
        assert_eq!(select_physical_device(&tied).unwrap().name, "first");

        let all = [first, second, third];
        assert_eq!(select_physical_device(&all).unwrap().index, 2);
    }

    #[test]
    fn selection_rejects_devices_without_queue_families() {
        let mut no_present = gpu("headless", PhysicalDeviceType::Discrete);
        no_present.queue_families.present = None;
        assert!(matches!(
            select_physical_device(&[no_present]),
            Err(RenderError::NoSuitableDevice)
        ));
        assert!(matches!(
            select_physical_device(&[]),
            Err(RenderError::NoSuitableDevice)
        ));
    }

    #[test]
    fn surface_format_prefers_unorm_srgb_nonlinear() {
        let available = [
            SurfaceFormat {
                format: PixelFormat::Rgba16Float,
                color_space: ColorSpace::ExtendedSrgbLinear,
            },
            SurfaceFormat {
                format: PixelFormat::Rgba8Unorm,
                color_space: ColorSpace::SrgbNonLinear,
            },
        ];
        assert_eq!(
            choose_surface_format(&available).unwrap().format,
            PixelFormat::Rgba8Unorm
        );
    }

    #[test]
    fn surface_format_falls_back_to_first() {
        let available = [SurfaceFormat {
            format: PixelFormat::Bgra8UnormSrgb,
            color_space: ColorSpace::SrgbNonLinear,
        }];
        assert_eq!(choose_surface_format(&available).unwrap(), available[0]);
        assert!(matches!(
            choose_surface_format(&[]),
            Err(RenderError::NoSurfaceFormat)
        ));
    }

    #[test]
    fn present_mode_uses_preference_or_fifo() {
        let available = [PresentMode::Fifo, PresentMode::Mailbox];
        assert_eq!(
            choose_present_mode(PresentMode::Mailbox, &available),
            PresentMode::Mailbox
        );
        assert_eq!(
            choose_present_mode(PresentMode::Immediate, &available),
            PresentMode::Fifo
        );
    }

    #[test]
    fn extent_uses_current_extent_when_defined() {
        let caps = SurfaceCapabilities {
            current_extent: Some(Extent2d::new(800, 600)),
            ..capabilities()
        };
        assert_eq!(
            choose_extent(&caps, Extent2d::new(1920, 1080)),
            Extent2d::new(800, 600)
        );
    }

    #[test]
    fn extent_clamps_framebuffer_size_when_undefined() {
        let caps = SurfaceCapabilities {
            min_image_extent: Extent2d::new(64, 64),
            max_image_extent: Extent2d::new(1024, 768),
            ..capabilities()
        };
        assert_eq!(
            choose_extent(&caps, Extent2d::new(2000, 10)),
            Extent2d::new(1024, 64)
        );
    }

    #[test]
    fn image_count_is_one_above_minimum_within_bounds() {
        assert_eq!(choose_image_count(&capabilities()), 3);

        let tight = SurfaceCapabilities {
            min_image_count: 3,
            max_image_count: 3,
            ..capabilities()
        };
        assert_eq!(choose_image_count(&tight), 3);

        let unbounded = SurfaceCapabilities {
            max_image_count: 0,
            ..capabilities()
        };
        assert_eq!(choose_image_count(&unbounded), 3);
    }

    #[test]
    fn missing_extension_is_named() {
        let required = vec!["surface".to_string(), "xlib_surface".to_string()];
        let supported = vec!["surface".to_string()];
        assert_eq!(first_missing(&required, &supported), Some("xlib_surface"));
        assert_eq!(first_missing(&required[..1], &supported), None);
    }

    #[test]
    fn memory_type_respects_bits_and_properties() {
        let types = [
            MemoryType {
                properties: MemoryProperties::DEVICE_LOCAL,
            },
            MemoryType {
                properties: MemoryProperties::HOST_VISIBLE | MemoryProperties::HOST_COHERENT,
            },
        ];

        assert_eq!(
            find_memory_type(&types, 0b11, MemoryProperties::HOST_VISIBLE).unwrap(),
            1
        );
        assert_eq!(
            find_memory_type(&types, 0b11, MemoryProperties::DEVICE_LOCAL).unwrap(),
            0
        );
        assert!(find_memory_type(&types, 0b01, MemoryProperties::HOST_VISIBLE).is_err());
    }
}
