use ash::{vk, Device};

use crate::gpu::error::Result;

/// Thin wrapper around a Vulkan command pool.
///
/// Hands out primary command buffers already in the recording state and
/// takes them back once the GPU is done with them. Returned buffers are
/// reset lazily, the next time they are handed out.
pub struct CommandPool {
    device: Device,
    raw: vk::CommandPool,
    free: Vec<vk::CommandBuffer>,
    allocated: usize,
}

impl CommandPool {
    pub(super) fn new(device: &Device, family: u32) -> Result<Self> {
        let ci = vk::CommandPoolCreateInfo::builder()
            .queue_family_index(family)
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER)
            .build();
        let raw = unsafe { device.create_command_pool(&ci, None)? };
        Ok(Self {
            device: device.clone(),
            raw,
            free: Vec::new(),
            allocated: 0,
        })
    }

    fn alloc(&mut self) -> Result<vk::CommandBuffer> {
        if let Some(buf) = self.free.pop() {
            unsafe {
                self.device
                    .reset_command_buffer(buf, vk::CommandBufferResetFlags::empty())?;
            }
            return Ok(buf);
        }

        let cmd = unsafe {
            self.device.allocate_command_buffers(
                &vk::CommandBufferAllocateInfo::builder()
                    .command_pool(self.raw)
                    .level(vk::CommandBufferLevel::PRIMARY)
                    .command_buffer_count(1)
                    .build(),
            )?
        };
        self.allocated += 1;
        Ok(cmd[0])
    }

    /// A primary command buffer, begun for a single submission.
    pub fn begin(&mut self) -> Result<vk::CommandBuffer> {
        let cmd = self.alloc()?;
        let begun = unsafe {
            self.device.begin_command_buffer(
                cmd,
                &vk::CommandBufferBeginInfo::builder()
                    .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT)
                    .build(),
            )
        };
        if let Err(err) = begun {
            self.free.push(cmd);
            return Err(err.into());
        }
        Ok(cmd)
    }

    /// Returns a command buffer whose submission has completed.
    pub fn recycle(&mut self, cmd: vk::CommandBuffer) {
        self.free.push(cmd);
    }

    /// Command buffers currently handed out.
    pub fn outstanding(&self) -> usize {
        self.allocated - self.free.len()
    }

    /// Destroys the native pool. Every command buffer allocated from it
    /// becomes invalid.
    pub fn destroy(&mut self) {
        if self.raw == vk::CommandPool::null() {
            return;
        }
        unsafe {
            self.device.destroy_command_pool(self.raw, None);
        }
        self.raw = vk::CommandPool::null();
        self.free.clear();
        self.allocated = 0;
    }
}
