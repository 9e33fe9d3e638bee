// Buffer utilities
//
// Buffer memory comes from gpu-allocator instead of hand-picked memory types.
// The allocator itself lives in the deletion queue so it is dropped after the
// last buffer is freed and before the device goes away.

use anyhow::{Context, Result};
use ash::vk;
use gpu_allocator::vulkan::{
    AllocationCreateDesc, AllocationScheme, Allocator, AllocatorCreateDesc,
};
use gpu_allocator::MemoryLocation;
use parking_lot::Mutex;
use std::sync::Arc;

use super::device::VulkanDevice;
use super::lifetime::{DeletionQueue, ResourceKind};
use super::pipeline::Vertex;

pub type SharedAllocator = Arc<Mutex<Allocator>>;

pub fn create_allocator(
    device: &VulkanDevice,
    teardown: &mut DeletionQueue,
) -> Result<SharedAllocator> {
    let allocator = Allocator::new(&AllocatorCreateDesc {
        instance: device.instance.clone(),
        device: device.device.clone(),
        physical_device: device.physical_device,
        debug_settings: Default::default(),
        buffer_device_address: false,
        allocation_sizes: Default::default(),
    })
    .context("Failed to create GPU allocator")?;

    let allocator = Arc::new(Mutex::new(allocator));

    let owned = Arc::clone(&allocator);
    teardown.push(ResourceKind::Allocator, move || {
        if Arc::strong_count(&owned) > 1 {
            log::warn!("GPU allocator still shared at teardown");
        }
        drop(owned);
    })?;

    Ok(allocator)
}

/// Create a host-visible vertex buffer holding `vertices`.
pub fn upload_vertex_buffer(
    device: &VulkanDevice,
    allocator: &SharedAllocator,
    vertices: &[Vertex],
    teardown: &mut DeletionQueue,
) -> Result<vk::Buffer> {
    let bytes: &[u8] = bytemuck::cast_slice(vertices);

    let buffer_info = vk::BufferCreateInfo::default()
        .size(bytes.len() as vk::DeviceSize)
        .usage(vk::BufferUsageFlags::VERTEX_BUFFER)
        .sharing_mode(vk::SharingMode::EXCLUSIVE);

    let buffer = unsafe { device.device.create_buffer(&buffer_info, None) }
        .context("Failed to create vertex buffer")?;

    let requirements = unsafe { device.device.get_buffer_memory_requirements(buffer) };

    let allocated = allocator.lock().allocate(&AllocationCreateDesc {
        name: "triangle vertices",
        requirements,
        location: MemoryLocation::CpuToGpu,
        linear: true,
        allocation_scheme: AllocationScheme::GpuAllocatorManaged,
    });
    let mut allocation = match allocated {
        Ok(allocation) => allocation,
        Err(err) => {
            unsafe { device.device.destroy_buffer(buffer, None) };
            return Err(err).context("Failed to allocate vertex buffer memory");
        }
    };

    let filled = (|| -> Result<()> {
        unsafe {
            device
                .device
                .bind_buffer_memory(buffer, allocation.memory(), allocation.offset())
        }
        .context("Failed to bind vertex buffer memory")?;

        let mapped = allocation
            .mapped_slice_mut()
            .context("Vertex buffer memory is not host mapped")?;
        mapped[..bytes.len()].copy_from_slice(bytes);
        Ok(())
    })();

    if let Err(err) = filled {
        unsafe { device.device.destroy_buffer(buffer, None) };
        if let Err(free_err) = allocator.lock().free(allocation) {
            log::warn!("Failed to free vertex buffer memory: {}", free_err);
        }
        return Err(err);
    }

    let owner = device.device.clone();
    let allocator = Arc::clone(allocator);
    teardown.push(ResourceKind::VertexBuffer, move || {
        unsafe { owner.destroy_buffer(buffer, None) };
        if let Err(err) = allocator.lock().free(allocation) {
            log::warn!("Failed to free vertex buffer memory: {}", err);
        }
    })?;

    log::info!("Vertex buffer uploaded: {} vertices, {} bytes", vertices.len(), bytes.len());

    Ok(buffer)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocation_desc_takes_our_memory_requirements() {
        let requirements = vk::MemoryRequirements {
            size: std::mem::size_of_val(&crate::backend::pipeline::TRIANGLE_VERTICES) as u64,
            alignment: 4,
            memory_type_bits: 0b1011,
        };

        let desc = AllocationCreateDesc {
            name: "triangle vertices",
            requirements,
            location: MemoryLocation::CpuToGpu,
            linear: true,
            allocation_scheme: AllocationScheme::GpuAllocatorManaged,
        };

        assert_eq!(desc.requirements.size, 60);
        assert_eq!(desc.requirements.memory_type_bits, 0b1011);
        assert_eq!(desc.location, MemoryLocation::CpuToGpu);
    }
}
