//===----------------------------------------------------------------------===//
// Command definitions
//===----------------------------------------------------------------------===//

use std::sync::Arc;

use smallvec::SmallVec;

use crate::gpu::driver::state::Layout;
use crate::gpu::driver::types::*;
use crate::gpu::pipeline::{ComputePipeline, GraphicsPipeline};
use crate::gpu::resource::{Buffer, DescriptorSet, Framebuffer, Image, PipelineBindPoint};
use crate::utils::Handle;

/// Largest inline upload an `UpdateBuffer` command may carry.
pub const MAX_INLINE_UPDATE: usize = 65536;

#[derive(Debug, Clone)]
pub struct RenderPassBegin {
    pub framebuffer: Framebuffer,
    /// One per attachment, color attachments first. Only read for
    /// attachments whose load op is `Clear`.
    pub clear_values: SmallVec<[ClearValue; 4]>,
    pub area: Rect2D,
}

#[derive(Debug, Clone)]
pub struct ImageBarrier {
    pub image: Image,
    pub new_layout: Layout,
}

#[derive(Debug, Clone, Default)]
pub struct BarrierInfo {
    pub images: SmallVec<[ImageBarrier; 4]>,
    /// Make all prior shader writes visible to later commands.
    pub memory: bool,
}

/// One recorded operation. Parameters are captured by value or by shared
/// resource handle, so a command never points into caller memory.
#[derive(Debug, Clone)]
pub enum Command {
    BindPipeline(Handle<GraphicsPipeline>),
    BindComputePipeline(Handle<ComputePipeline>),
    /// Remember whatever pipeline is bound right now.
    PushPipeline,
    /// Rebind the pipeline saved by the matching `PushPipeline`.
    PopPipeline,
    /// Unbind the graphics pipeline and put its state back to defaults.
    ResetPipeline,
    BindVertexBuffers {
        first_binding: u32,
        buffers: SmallVec<[(Buffer, u64); 4]>,
    },
    BindIndexBuffer {
        buffer: Buffer,
        offset: u64,
        index_type: IndexType,
    },
    BindDescriptorSets {
        bind_point: PipelineBindPoint,
        first_set: u32,
        sets: SmallVec<[DescriptorSet; 4]>,
    },
    Draw(DrawArgs),
    DrawIndexed(DrawIndexedArgs),
    Dispatch(DispatchArgs),
    BeginRenderPass(RenderPassBegin),
    EndRenderPass,
    ClearColorAttachment {
        attachment: u32,
        color: [f32; 4],
        area: Option<Rect2D>,
    },
    ClearDepthStencilAttachment {
        depth: Option<f32>,
        stencil: Option<u32>,
        area: Option<Rect2D>,
    },
    PipelineBarrier(BarrierInfo),
    /// `location` is the uniform location on the implicit backend and the
    /// push-constant byte offset on the explicit one.
    PushUniform {
        location: u32,
        stages: ShaderStageFlags,
        value: UniformValue,
    },
    SetViewport(Viewport),
    SetScissor(Rect2D),
    SetBlendConstants([f32; 4]),
    SetLineWidth(f32),
    SetStencilReference {
        face: StencilFace,
        reference: u32,
    },
    SetStencilCompareMask {
        face: StencilFace,
        mask: u32,
    },
    SetStencilWriteMask {
        face: StencilFace,
        mask: u32,
    },
    SetDepthBias {
        constant_factor: f32,
        slope_factor: f32,
        clamp: f32,
    },
    UpdateBuffer {
        buffer: Buffer,
        offset: u64,
        data: Arc<[u8]>,
    },
    ExecuteSecondary(Arc<[Command]>),
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::BindPipeline(_) => "BindPipeline",
            Command::BindComputePipeline(_) => "BindComputePipeline",
            Command::PushPipeline => "PushPipeline",
            Command::PopPipeline => "PopPipeline",
            Command::ResetPipeline => "ResetPipeline",
            Command::BindVertexBuffers { .. } => "BindVertexBuffers",
            Command::BindIndexBuffer { .. } => "BindIndexBuffer",
            Command::BindDescriptorSets { .. } => "BindDescriptorSets",
            Command::Draw(_) => "Draw",
            Command::DrawIndexed(_) => "DrawIndexed",
            Command::Dispatch(_) => "Dispatch",
            Command::BeginRenderPass(_) => "BeginRenderPass",
            Command::EndRenderPass => "EndRenderPass",
            Command::ClearColorAttachment { .. } => "ClearColorAttachment",
            Command::ClearDepthStencilAttachment { .. } => "ClearDepthStencilAttachment",
            Command::PipelineBarrier(_) => "PipelineBarrier",
            Command::PushUniform { .. } => "PushUniform",
            Command::SetViewport(_) => "SetViewport",
            Command::SetScissor(_) => "SetScissor",
            Command::SetBlendConstants(_) => "SetBlendConstants",
            Command::SetLineWidth(_) => "SetLineWidth",
            Command::SetStencilReference { .. } => "SetStencilReference",
            Command::SetStencilCompareMask { .. } => "SetStencilCompareMask",
            Command::SetStencilWriteMask { .. } => "SetStencilWriteMask",
            Command::SetDepthBias { .. } => "SetDepthBias",
            Command::UpdateBuffer { .. } => "UpdateBuffer",
            Command::ExecuteSecondary(_) => "ExecuteSecondary",
        }
    }

    /// Whether any resource this command uses was released after recording.
    pub fn references_released(&self) -> bool {
        match self {
            Command::BindVertexBuffers { buffers, .. } => {
                buffers.iter().any(|(b, _)| !b.is_valid())
            }
            Command::BindIndexBuffer { buffer, .. } | Command::UpdateBuffer { buffer, .. } => {
                !buffer.is_valid()
            }
            Command::BindDescriptorSets { sets, .. } => sets.iter().any(|s| !s.is_valid()),
            Command::BeginRenderPass(begin) => {
                let fb = &begin.framebuffer;
                !fb.is_valid()
                    || fb
                        .desc()
                        .color_attachments
                        .iter()
                        .chain(fb.desc().depth_stencil_attachment.iter())
                        .any(|i| !i.is_valid())
            }
            Command::PipelineBarrier(barrier) => barrier.images.iter().any(|b| !b.image.is_valid()),
            _ => false,
        }
    }

    pub fn is_draw(&self) -> bool {
        matches!(self, Command::Draw(_) | Command::DrawIndexed(_))
    }
}
