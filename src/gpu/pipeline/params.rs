//! Creation parameters for graphics and compute pipelines.
//!
//! Fields left empty (`None`, an empty attachment list, missing shader
//! stages) are inherited from the parent pipeline when one is given.

use crate::gpu::driver::types::*;
use crate::gpu::resource::{PipelineLayout, RenderPass, Shader};
use crate::utils::Handle;

use super::fragment::DepthBias;
use super::GraphicsPipeline;

#[cfg(feature = "pipestate-serde")]
use serde::{Deserialize, Serialize};

#[cfg_attr(feature = "pipestate-serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StencilFaceState {
    pub fail_op: StencilOp,
    pub depth_fail_op: StencilOp,
    pub pass_op: StencilOp,
    pub compare_op: CompareOp,
    pub reference: u32,
    pub compare_mask: u32,
    pub write_mask: u32,
}

impl Default for StencilFaceState {
    fn default() -> Self {
        Self {
            fail_op: StencilOp::Keep,
            depth_fail_op: StencilOp::Keep,
            pass_op: StencilOp::Keep,
            compare_op: CompareOp::Always,
            reference: 0,
            compare_mask: !0,
            write_mask: !0,
        }
    }
}

#[cfg_attr(feature = "pipestate-serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DepthStencilState {
    pub depth_test: bool,
    pub depth_write: bool,
    pub depth_compare: CompareOp,
    pub depth_bias: DepthBias,
    pub stencil_test: bool,
    pub front: StencilFaceState,
    pub back: StencilFaceState,
}

impl Default for DepthStencilState {
    fn default() -> Self {
        Self {
            depth_test: false,
            depth_write: true,
            depth_compare: CompareOp::Less,
            depth_bias: DepthBias::default(),
            stencil_test: false,
            front: StencilFaceState::default(),
            back: StencilFaceState::default(),
        }
    }
}

#[cfg_attr(feature = "pipestate-serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ColorBlendAttachment {
    pub blend_enable: bool,
    pub src_color_factor: BlendFactor,
    pub dst_color_factor: BlendFactor,
    pub color_op: BlendOp,
    pub src_alpha_factor: BlendFactor,
    pub dst_alpha_factor: BlendFactor,
    pub alpha_op: BlendOp,
    pub write_mask: ColorWriteMask,
}

impl Default for ColorBlendAttachment {
    fn default() -> Self {
        Self {
            blend_enable: false,
            src_color_factor: BlendFactor::One,
            dst_color_factor: BlendFactor::Zero,
            color_op: BlendOp::Add,
            src_alpha_factor: BlendFactor::One,
            dst_alpha_factor: BlendFactor::Zero,
            alpha_op: BlendOp::Add,
            write_mask: ColorWriteMask::RGBA,
        }
    }
}

impl ColorBlendAttachment {
    /// Classic `src * a + dst * (1 - a)` blending.
    pub fn alpha_blended() -> Self {
        Self {
            blend_enable: true,
            src_color_factor: BlendFactor::SrcAlpha,
            dst_color_factor: BlendFactor::OneMinusSrcAlpha,
            src_alpha_factor: BlendFactor::One,
            dst_alpha_factor: BlendFactor::OneMinusSrcAlpha,
            ..Default::default()
        }
    }
}

/// Per-attachment blending. The implicit backend supports one blend state
/// for all attachments and uses the first entry.
#[cfg_attr(feature = "pipestate-serde", derive(Serialize, Deserialize))]
#[derive(Debug, Default, Clone, PartialEq, Eq, Hash)]
pub struct ColorBlendState {
    pub attachments: Vec<ColorBlendAttachment>,
}

impl ColorBlendState {
    pub fn single(attachment: ColorBlendAttachment) -> Self {
        Self {
            attachments: vec![attachment],
        }
    }
}

#[cfg_attr(feature = "pipestate-serde", derive(Serialize, Deserialize))]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RasterizerState {
    pub cull_mode: CullMode,
    pub front_face: FrontFace,
}

#[cfg_attr(feature = "pipestate-serde", derive(Serialize, Deserialize))]
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct ViewportState {
    /// Static viewport. `None` leaves it to `set_viewport` commands.
    pub viewport: Option<Viewport>,
    /// Static scissor rectangle. `None` leaves it to `set_scissor` commands.
    pub scissor: Option<Rect2D>,
    pub scissor_test: bool,
}

#[cfg_attr(feature = "pipestate-serde", derive(Serialize, Deserialize))]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InputAssemblyState {
    pub topology: PrimitiveTopology,
}

#[cfg_attr(feature = "pipestate-serde", derive(Serialize, Deserialize))]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VertexBindingInfo {
    pub binding: u32,
    pub stride: u32,
    pub rate: VertexRate,
}

#[cfg_attr(feature = "pipestate-serde", derive(Serialize, Deserialize))]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VertexAttributeInfo {
    pub location: u32,
    pub binding: u32,
    pub format: VertexFormat,
    pub offset: u32,
}

#[cfg_attr(feature = "pipestate-serde", derive(Serialize, Deserialize))]
#[derive(Debug, Default, Clone, PartialEq, Eq, Hash)]
pub struct VertexInputState {
    pub bindings: Vec<VertexBindingInfo>,
    pub attributes: Vec<VertexAttributeInfo>,
}

impl VertexInputState {
    pub fn binding(&self, binding: u32) -> Option<&VertexBindingInfo> {
        self.bindings.iter().find(|b| b.binding == binding)
    }
}

#[cfg_attr(feature = "pipestate-serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TessellationState {
    pub patch_control_points: u32,
}

impl Default for TessellationState {
    fn default() -> Self {
        Self {
            patch_control_points: 3,
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct ShaderStages {
    pub vertex: Option<Shader>,
    pub fragment: Option<Shader>,
    pub geometry: Option<Shader>,
    pub tess_control: Option<Shader>,
    pub tess_evaluation: Option<Shader>,
}

impl ShaderStages {
    pub fn new(vertex: &Shader, fragment: &Shader) -> Self {
        Self {
            vertex: Some(vertex.clone()),
            fragment: Some(fragment.clone()),
            ..Default::default()
        }
    }

    pub fn is_complete(&self) -> bool {
        self.vertex.is_some() && self.fragment.is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.iter().next().is_none()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Shader> {
        [
            &self.vertex,
            &self.tess_control,
            &self.tess_evaluation,
            &self.geometry,
            &self.fragment,
        ]
        .into_iter()
        .flatten()
    }

    /// Stages given here win; the rest come from `parent`.
    pub fn merged_with(&self, parent: &ShaderStages) -> ShaderStages {
        ShaderStages {
            vertex: self.vertex.clone().or_else(|| parent.vertex.clone()),
            fragment: self.fragment.clone().or_else(|| parent.fragment.clone()),
            geometry: self.geometry.clone().or_else(|| parent.geometry.clone()),
            tess_control: self
                .tess_control
                .clone()
                .or_else(|| parent.tess_control.clone()),
            tess_evaluation: self
                .tess_evaluation
                .clone()
                .or_else(|| parent.tess_evaluation.clone()),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct GraphicsPipelineInfo {
    pub debug_name: String,
    pub depth_stencil: DepthStencilState,
    pub color_blend: ColorBlendState,
    pub rasterizer: RasterizerState,
    pub viewport: ViewportState,
    pub input_assembly: InputAssemblyState,
    pub vertex_input: VertexInputState,
    pub tessellation: Option<TessellationState>,
    pub shader_stages: ShaderStages,
    pub layout: Option<PipelineLayout>,
    /// Required by the explicit backend, ignored by the implicit one.
    pub render_pass: Option<RenderPass>,
    pub subpass: u32,
    /// Pipeline whose applied state this one may reuse at bind time.
    pub parent: Option<Handle<GraphicsPipeline>>,
    /// Whether other pipelines may name this one as their parent.
    pub parentable: bool,
}

#[derive(Debug, Clone, Default)]
pub struct ComputePipelineInfo {
    pub debug_name: String,
    pub shader: Option<Shader>,
    pub layout: Option<PipelineLayout>,
}
