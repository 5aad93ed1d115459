pub mod cmd;
pub mod context;
pub mod driver;
pub mod error;
pub mod gles;
pub mod pipeline;
pub mod resource;
pub mod structs;
pub mod tracker;
#[cfg(feature = "pipestate-vulkan")]
pub mod vulkan;

pub use cmd::{
    BarrierInfo, Command, CommandBuffer, CommandBufferLevel, CommandBufferState, CommandRecorder,
    ImageBarrier, RenderPassBegin,
};
pub use context::{Context, ImmediateRecorder};
pub use driver::state::{Layout, LayoutTransition};
pub use driver::types::*;
pub use error::{GpuError, Result};
pub use pipeline::{
    BindReport, ColorBlendAttachment, ColorBlendState, ComputePipeline, ComputePipelineInfo,
    DepthStencilState, FragmentKind, GraphicsPipeline, GraphicsPipelineInfo, InputAssemblyState,
    PipelineRelation, RasterizerState, ShaderStages, StencilFaceState, TessellationState,
    VertexAttributeInfo, VertexBindingInfo, VertexInputState, ViewportState, MAX_PIPELINE_DEPTH,
};
pub use resource::*;
pub use structs::*;
pub use tracker::{BoundPipeline, RenderStateTracker};

use pipeline::FragmentValue;
use tracker::RenderStateTracker as Tracker;

/// The two programming models a context can drive.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum BackendKind {
    /// Global state machine: pipeline state is set piecewise and diffed.
    Implicit,
    /// Monolithic pipeline objects and recorded native command buffers.
    Explicit,
}

/// Native side of a [`Context`].
///
/// A backend owns every literal API call. The context decides what has to
/// happen and hands the backend the render-state tracker so every setter can
/// compare against the cached value before issuing anything.
pub trait Backend: Send {
    fn kind(&self) -> BackendKind;
    fn capabilities(&self) -> Capabilities;

    fn create_buffer(&mut self, info: &BufferInfo) -> Result<NativeObject>;
    fn create_image(&mut self, tracker: &mut Tracker, info: &ImageInfo) -> Result<NativeObject>;
    fn create_shader(&mut self, info: &ShaderInfo) -> Result<NativeObject>;
    fn create_sampler(&mut self, info: &SamplerInfo) -> Result<NativeObject>;
    fn create_render_pass(&mut self, info: &RenderPassInfo) -> Result<NativeObject>;
    fn create_framebuffer(
        &mut self,
        tracker: &mut Tracker,
        info: &FramebufferInfo,
    ) -> Result<NativeObject>;
    fn create_pipeline_layout(&mut self, info: &PipelineLayoutInfo) -> Result<NativeObject>;
    fn create_descriptor_set(&mut self, info: &DescriptorSetInfo) -> Result<NativeObject>;
    fn create_fence(&mut self, signaled: bool) -> Result<NativeObject>;
    fn create_semaphore(&mut self) -> Result<NativeObject>;

    /// Links shader stages into one program. The explicit backend has no
    /// program objects and returns [`NativeObject::Null`].
    fn link_program(&mut self, stages: &[Shader]) -> Result<NativeObject>;
    /// Builds the monolithic native pipeline, if the backend has such a
    /// thing.
    fn create_graphics_pipeline(&mut self, pipeline: &GraphicsPipeline) -> Result<NativeObject>;
    fn create_compute_pipeline(
        &mut self,
        info: &ComputePipelineInfo,
        program: &Program,
    ) -> Result<NativeObject>;

    /// Deletes a native object whose last handle went away.
    fn release(&mut self, tracker: &mut Tracker, release: &PendingRelease);

    fn map_buffer(&mut self, buffer: &Buffer) -> Result<*mut u8>;
    fn unmap_buffer(&mut self, buffer: &Buffer) -> Result<()>;

    /// Sets one piece of pipeline state through the tracker.
    fn apply_fragment(&mut self, tracker: &mut Tracker, value: &FragmentValue);
    /// Binds a monolithic pipeline object.
    fn bind_pipeline_object(
        &mut self,
        tracker: &mut Tracker,
        bind_point: PipelineBindPoint,
        pipeline: &PipelineObject,
    ) -> Result<()>;

    /// Called before the commands of a submission are executed.
    fn begin_submission(&mut self, tracker: &mut Tracker) -> Result<()>;
    fn execute(&mut self, tracker: &mut Tracker, cmd: &Command) -> Result<()>;
    /// Called after the commands of a submission were executed.
    fn end_submission(&mut self, tracker: &mut Tracker, submit: &SubmitInfo) -> Result<()>;

    fn wait_fence(&mut self, fence: &Fence, timeout_ns: u64) -> Result<()>;
    fn fence_status(&mut self, fence: &Fence) -> Result<bool>;
    fn reset_fence(&mut self, fence: &Fence) -> Result<()>;
    fn wait_idle(&mut self) -> Result<()>;
}
