// Backend module - Vulkan abstraction layer
//
// Design: Thin wrapper around ash. Every handle is registered with a
// `DeletionQueue` right after creation, so teardown order is fixed by
// creation order and error paths release what was already built.

pub mod buffer;
pub mod debug;
pub mod device;
pub mod lifetime;
pub mod pipeline;
pub mod shader;
pub mod swapchain;
pub mod sync;

pub use device::VulkanDevice;
pub use lifetime::DeletionQueue;
pub use swapchain::Swapchain;
pub use sync::{FrameSync, SwapchainTimeline};
