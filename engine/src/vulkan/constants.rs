use vulkanalia::{vk, Version};

pub const PORTABILITY_MACOS_VERSION: Version = Version::new(1, 3, 216);
pub const VALIDATION_ENABLED: bool = cfg!(debug_assertions);
pub const VALIDATION_LAYER: vk::ExtensionName =
    vk::ExtensionName::from_bytes(b"VK_LAYER_KHRONOS_validation");

/// Number of frame slots the CPU may have in flight at once.
pub const MAX_FRAMES_IN_FLIGHT: usize = 2;

/// Bounded fence wait; a TIMEOUT result is retried, anything else is fatal.
pub const FENCE_TIMEOUT_NS: u64 = 100_000_000;

pub const DEPTH_FORMAT: vk::Format = vk::Format::D16_UNORM;
