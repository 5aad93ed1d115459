use ash::vk;

use crate::gpu::driver::state::Layout;
use crate::gpu::driver::types::{BufferUsage, MemoryVisibility};

/// Memory heap an allocation is placed in.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum MemoryLocation {
    /// Fastest for the GPU; only reachable from the host through staging
    /// copies.
    DeviceLocal,
    /// Mappable by the host.
    HostVisible,
}

impl MemoryLocation {
    /// Anything the host wants to map lands in host-visible memory, and so
    /// do pure transfer sources since their only job is to be written by the
    /// host and copied from.
    pub fn choose(usage: BufferUsage, visibility: MemoryVisibility) -> Self {
        if visibility == MemoryVisibility::CpuAndGpu || usage == BufferUsage::TRANSFER_SRC {
            MemoryLocation::HostVisible
        } else {
            MemoryLocation::DeviceLocal
        }
    }

    pub fn allocation_info(self) -> vk_mem::AllocationCreateInfo {
        match self {
            MemoryLocation::HostVisible => vk_mem::AllocationCreateInfo {
                usage: vk_mem::MemoryUsage::AutoPreferHost,
                flags: vk_mem::AllocationCreateFlags::HOST_ACCESS_RANDOM,
                ..Default::default()
            },
            MemoryLocation::DeviceLocal => vk_mem::AllocationCreateInfo {
                usage: vk_mem::MemoryUsage::AutoPreferDevice,
                flags: vk_mem::AllocationCreateFlags::empty(),
                ..Default::default()
            },
        }
    }

    pub fn is_host_visible(self) -> bool {
        self == MemoryLocation::HostVisible
    }
}

#[derive(Debug)]
pub struct BufferAllocation {
    pub buffer: vk::Buffer,
    pub allocation: vk_mem::Allocation,
    pub location: MemoryLocation,
    pub size: u64,
}

#[derive(Debug)]
pub struct ImageAllocation {
    pub image: vk::Image,
    pub allocation: vk_mem::Allocation,
    /// Covers every mip level; used for attachments and sampling.
    pub view: vk::ImageView,
    pub aspect: vk::ImageAspectFlags,
    pub mip_levels: u32,
    /// Layout the image was left in by its creation-time upload.
    pub initial_layout: Layout,
}

impl ImageAllocation {
    pub fn full_range(&self) -> vk::ImageSubresourceRange {
        vk::ImageSubresourceRange {
            aspect_mask: self.aspect,
            base_mip_level: 0,
            level_count: self.mip_levels,
            base_array_layer: 0,
            layer_count: 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_access_decides_the_heap() {
        assert_eq!(
            MemoryLocation::choose(BufferUsage::VERTEX, MemoryVisibility::Gpu),
            MemoryLocation::DeviceLocal
        );
        assert_eq!(
            MemoryLocation::choose(BufferUsage::VERTEX, MemoryVisibility::CpuAndGpu),
            MemoryLocation::HostVisible
        );
        assert_eq!(
            MemoryLocation::choose(BufferUsage::TRANSFER_SRC, MemoryVisibility::Gpu),
            MemoryLocation::HostVisible
        );
        assert_eq!(
            MemoryLocation::choose(
                BufferUsage::TRANSFER_SRC | BufferUsage::STORAGE,
                MemoryVisibility::Gpu
            ),
            MemoryLocation::DeviceLocal
        );
    }

    #[test]
    fn only_host_memory_is_mappable() {
        let info = MemoryLocation::HostVisible.allocation_info();
        assert!(info
            .flags
            .contains(vk_mem::AllocationCreateFlags::HOST_ACCESS_RANDOM));
        assert!(!MemoryLocation::DeviceLocal.is_host_visible());
    }
}
