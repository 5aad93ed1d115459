use super::driver::types::*;
use super::resource::{Buffer, Fence, Image, PipelineLayout, RenderPass, Sampler, Semaphore};

#[cfg(feature = "pipestate-serde")]
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy)]
pub struct BufferInfo<'a> {
    pub debug_name: &'a str,
    pub byte_size: u64,
    pub visibility: MemoryVisibility,
    pub usage: BufferUsage,
    pub initial_data: Option<&'a [u8]>,
}

impl<'a> Default for BufferInfo<'a> {
    fn default() -> Self {
        Self {
            debug_name: "",
            byte_size: 1024,
            visibility: MemoryVisibility::CpuAndGpu,
            usage: BufferUsage::UNIFORM,
            initial_data: None,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ImageInfo<'a> {
    pub debug_name: &'a str,
    pub dim: [u32; 3],
    pub format: Format,
    pub mip_levels: u32,
    pub usage: ImageUsage,
    pub initial_data: Option<&'a [u8]>,
}

impl<'a> Default for ImageInfo<'a> {
    fn default() -> Self {
        Self {
            debug_name: "",
            dim: [1280, 1024, 1],
            format: Format::RGBA8Unorm,
            mip_levels: 1,
            usage: ImageUsage::SAMPLED | ImageUsage::TRANSFER_DST,
            initial_data: None,
        }
    }
}

/// Shader code handed over by an external compiler. The implicit backend
/// consumes GLSL source, the explicit backend SPIR-V words.
#[derive(Debug, Clone, Copy)]
pub enum ShaderCode<'a> {
    Glsl(&'a str),
    Spirv(&'a [u32]),
}

#[derive(Debug, Clone, Copy)]
pub struct ShaderInfo<'a> {
    pub debug_name: &'a str,
    pub stage: ShaderStage,
    pub code: ShaderCode<'a>,
}

#[cfg_attr(feature = "pipestate-serde", derive(Serialize, Deserialize))]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SamplerInfo {
    pub min_filter: Filter,
    pub mag_filter: Filter,
    pub address_mode: SamplerAddressMode,
}

#[cfg_attr(feature = "pipestate-serde", derive(Serialize, Deserialize))]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AttachmentInfo {
    pub format: Format,
    pub load_op: LoadOp,
    pub store_op: StoreOp,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct RenderPassInfo<'a> {
    pub debug_name: &'a str,
    pub color_attachments: &'a [AttachmentInfo],
    pub depth_stencil_attachment: Option<AttachmentInfo>,
}

#[derive(Debug, Clone, Copy)]
pub struct FramebufferInfo<'a> {
    pub debug_name: &'a str,
    pub render_pass: &'a RenderPass,
    pub color_attachments: &'a [Image],
    pub depth_stencil_attachment: Option<&'a Image>,
    pub extent: [u32; 2],
}

#[cfg_attr(feature = "pipestate-serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DescriptorBindingInfo {
    pub binding: u32,
    pub ty: DescriptorType,
    pub stages: ShaderStageFlags,
    pub count: u32,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct PipelineLayoutInfo<'a> {
    pub debug_name: &'a str,
    pub sets: &'a [&'a [DescriptorBindingInfo]],
    pub push_constant_bytes: u32,
}

#[derive(Debug, Clone)]
pub enum DescriptorResource {
    Buffer {
        buffer: Buffer,
        offset: u64,
        range: u64,
    },
    ImageSampler {
        image: Image,
        sampler: Sampler,
    },
}

#[derive(Debug, Clone)]
pub struct DescriptorWrite {
    pub binding: u32,
    pub ty: DescriptorType,
    pub resource: DescriptorResource,
}

#[derive(Debug, Clone, Copy)]
pub struct DescriptorSetInfo<'a> {
    pub debug_name: &'a str,
    pub layout: &'a PipelineLayout,
    pub set: u32,
    pub writes: &'a [DescriptorWrite],
}

/// Synchronization attached to a submission. Semaphores order GPU work
/// only; the fence is what the CPU waits on.
#[derive(Debug, Default, Clone, Copy)]
pub struct SubmitInfo<'a> {
    pub wait_semaphores: &'a [Semaphore],
    pub signal_semaphores: &'a [Semaphore],
    pub fence: Option<&'a Fence>,
}

/// Context-wide settings.
#[derive(Debug, Clone)]
pub struct ContextInfo {
    pub debug_name: String,
    /// Request API validation on the explicit backend. `PIPESTATE_VALIDATION=1`
    /// in the environment forces it on.
    pub validation: bool,
    /// Longest parent chain a graphics pipeline may sit at the end of.
    pub max_pipeline_depth: usize,
    /// Check the native error flag after every implicit-backend call. Only
    /// honored in debug builds.
    pub debug_native_errors: bool,
}

impl Default for ContextInfo {
    fn default() -> Self {
        Self {
            debug_name: "pipestate".to_string(),
            validation: false,
            max_pipeline_depth: crate::gpu::pipeline::MAX_PIPELINE_DEPTH,
            debug_native_errors: true,
        }
    }
}

impl ContextInfo {
    pub fn validation_requested(&self) -> bool {
        self.validation
            || std::env::var("PIPESTATE_VALIDATION")
                .map(|v| v == "1")
                .unwrap_or(false)
    }
}
