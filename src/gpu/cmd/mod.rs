mod command;
pub use command::*;

use std::sync::Arc;

use smallvec::SmallVec;

use crate::gpu::driver::state::Layout;
use crate::gpu::driver::types::*;
use crate::gpu::error::{GpuError, Result};
use crate::gpu::pipeline::{ComputePipeline, GraphicsPipeline};
use crate::gpu::resource::{Buffer, DescriptorSet, Framebuffer, Image, PipelineBindPoint};
use crate::utils::Handle;

#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub enum CommandBufferState {
    #[default]
    Initial,
    Recording,
    Executable,
    /// Submitted to the explicit backend and possibly still in flight.
    Pending,
}

#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub enum CommandBufferLevel {
    #[default]
    Primary,
    /// Only runs from inside a primary buffer.
    Secondary,
}

/// Deferred list of commands, executed in recorded order on submission.
#[derive(Debug, Default)]
pub struct CommandBuffer {
    debug_name: String,
    level: CommandBufferLevel,
    state: CommandBufferState,
    commands: Vec<Command>,
    in_render_pass: bool,
}

impl CommandBuffer {
    pub fn new(debug_name: &str, level: CommandBufferLevel) -> Self {
        Self {
            debug_name: debug_name.to_string(),
            level,
            ..Default::default()
        }
    }

    pub fn primary(debug_name: &str) -> Self {
        Self::new(debug_name, CommandBufferLevel::Primary)
    }

    pub fn secondary(debug_name: &str) -> Self {
        Self::new(debug_name, CommandBufferLevel::Secondary)
    }

    pub fn debug_name(&self) -> &str {
        &self.debug_name
    }

    pub fn level(&self) -> CommandBufferLevel {
        self.level
    }

    pub fn state(&self) -> CommandBufferState {
        self.state
    }

    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Starts recording. Previous contents of an executable or pending
    /// buffer are discarded.
    pub fn begin(&mut self) -> Result<()> {
        match self.state {
            CommandBufferState::Recording => {
                log::error!("command buffer '{}' is already recording", self.debug_name);
                Err(GpuError::AlreadyInitialised)
            }
            _ => {
                self.commands.clear();
                self.in_render_pass = false;
                self.state = CommandBufferState::Recording;
                Ok(())
            }
        }
    }

    pub fn end(&mut self) -> Result<()> {
        if self.state != CommandBufferState::Recording {
            return Err(GpuError::NotInitialised);
        }
        if self.in_render_pass {
            log::error!(
                "command buffer '{}' ended inside a render pass",
                self.debug_name
            );
            return Err(GpuError::InvalidArgument);
        }
        self.state = CommandBufferState::Executable;
        Ok(())
    }

    /// Drops every recorded command and returns to `Initial`.
    pub fn reset(&mut self) {
        self.commands.clear();
        self.in_render_pass = false;
        self.state = CommandBufferState::Initial;
    }

    pub(crate) fn mark_pending(&mut self) {
        self.state = CommandBufferState::Pending;
    }

    pub fn is_submittable(&self) -> bool {
        matches!(
            self.state,
            CommandBufferState::Executable | CommandBufferState::Pending
        )
    }
}

/// Checks render pass nesting for a command about to be recorded.
pub(crate) fn check_render_pass_nesting(in_render_pass: &mut bool, cmd: &Command) -> Result<()> {
    match cmd {
        Command::BeginRenderPass(_) if *in_render_pass => {
            log::error!("render pass begun inside another render pass");
            Err(GpuError::InvalidArgument)
        }
        Command::BeginRenderPass(_) => {
            *in_render_pass = true;
            Ok(())
        }
        Command::EndRenderPass if !*in_render_pass => {
            log::error!("render pass ended without being begun");
            Err(GpuError::InvalidArgument)
        }
        Command::EndRenderPass => {
            *in_render_pass = false;
            Ok(())
        }
        _ => Ok(()),
    }
}

/// Surface shared by deferred command buffers and immediate execution.
///
/// Every method validates its resources when it is called: recording a
/// released resource fails with [`GpuError::InvalidArgument`] right away.
pub trait CommandRecorder {
    fn record(&mut self, cmd: Command) -> Result<()>;

    fn bind_pipeline(&mut self, pipeline: Handle<GraphicsPipeline>) -> Result<()> {
        self.record(Command::BindPipeline(pipeline))
    }

    fn bind_compute_pipeline(&mut self, pipeline: Handle<ComputePipeline>) -> Result<()> {
        self.record(Command::BindComputePipeline(pipeline))
    }

    fn push_pipeline(&mut self) -> Result<()> {
        self.record(Command::PushPipeline)
    }

    fn pop_pipeline(&mut self) -> Result<()> {
        self.record(Command::PopPipeline)
    }

    fn reset_pipeline(&mut self) -> Result<()> {
        self.record(Command::ResetPipeline)
    }

    fn bind_vertex_buffer(&mut self, binding: u32, buffer: &Buffer, offset: u64) -> Result<()> {
        self.bind_vertex_buffers(binding, &[(buffer, offset)])
    }

    fn bind_vertex_buffers(&mut self, first_binding: u32, buffers: &[(&Buffer, u64)]) -> Result<()> {
        for (buffer, _) in buffers {
            buffer.ensure_valid()?;
            if !buffer.desc().usage.contains(BufferUsage::VERTEX) {
                log::warn!(
                    "buffer '{}' bound as vertex buffer without VERTEX usage",
                    buffer.desc().debug_name
                );
            }
        }
        self.record(Command::BindVertexBuffers {
            first_binding,
            buffers: buffers.iter().map(|(b, o)| ((*b).clone(), *o)).collect(),
        })
    }

    fn bind_index_buffer(&mut self, buffer: &Buffer, offset: u64, index_type: IndexType) -> Result<()> {
        buffer.ensure_valid()?;
        self.record(Command::BindIndexBuffer {
            buffer: buffer.clone(),
            offset,
            index_type,
        })
    }

    fn bind_descriptor_sets(
        &mut self,
        bind_point: PipelineBindPoint,
        first_set: u32,
        sets: &[&DescriptorSet],
    ) -> Result<()> {
        for set in sets {
            set.ensure_valid()?;
        }
        self.record(Command::BindDescriptorSets {
            bind_point,
            first_set,
            sets: sets.iter().map(|s| (*s).clone()).collect(),
        })
    }

    fn draw(&mut self, args: DrawArgs) -> Result<()> {
        self.record(Command::Draw(args))
    }

    fn draw_indexed(&mut self, args: DrawIndexedArgs) -> Result<()> {
        self.record(Command::DrawIndexed(args))
    }

    fn dispatch(&mut self, x: u32, y: u32, z: u32) -> Result<()> {
        self.record(Command::Dispatch(DispatchArgs { x, y, z }))
    }

    fn begin_render_pass(
        &mut self,
        framebuffer: &Framebuffer,
        clear_values: &[ClearValue],
        area: Rect2D,
    ) -> Result<()> {
        framebuffer.ensure_valid()?;
        for image in framebuffer
            .desc()
            .color_attachments
            .iter()
            .chain(framebuffer.desc().depth_stencil_attachment.iter())
        {
            image.ensure_valid()?;
        }
        self.record(Command::BeginRenderPass(RenderPassBegin {
            framebuffer: framebuffer.clone(),
            clear_values: clear_values.iter().copied().collect(),
            area,
        }))
    }

    fn end_render_pass(&mut self) -> Result<()> {
        self.record(Command::EndRenderPass)
    }

    fn clear_color_attachment(
        &mut self,
        attachment: u32,
        color: [f32; 4],
        area: Option<Rect2D>,
    ) -> Result<()> {
        self.record(Command::ClearColorAttachment {
            attachment,
            color,
            area,
        })
    }

    fn clear_depth_stencil_attachment(
        &mut self,
        depth: Option<f32>,
        stencil: Option<u32>,
        area: Option<Rect2D>,
    ) -> Result<()> {
        if depth.is_none() && stencil.is_none() {
            return Err(GpuError::InvalidArgument);
        }
        self.record(Command::ClearDepthStencilAttachment {
            depth,
            stencil,
            area,
        })
    }

    fn pipeline_barrier(&mut self, images: &[(&Image, Layout)], memory: bool) -> Result<()> {
        for (image, layout) in images {
            image.ensure_valid()?;
            if *layout == Layout::Undefined {
                return Err(GpuError::InvalidArgument);
            }
        }
        self.record(Command::PipelineBarrier(BarrierInfo {
            images: images
                .iter()
                .map(|(image, layout)| ImageBarrier {
                    image: (*image).clone(),
                    new_layout: *layout,
                })
                .collect::<SmallVec<_>>(),
            memory,
        }))
    }

    fn push_uniform(&mut self, location: u32, stages: ShaderStageFlags, value: UniformValue) -> Result<()> {
        self.record(Command::PushUniform {
            location,
            stages,
            value,
        })
    }

    fn set_viewport(&mut self, viewport: Viewport) -> Result<()> {
        self.record(Command::SetViewport(viewport))
    }

    fn set_scissor(&mut self, scissor: Rect2D) -> Result<()> {
        self.record(Command::SetScissor(scissor))
    }

    fn set_blend_constants(&mut self, constants: [f32; 4]) -> Result<()> {
        self.record(Command::SetBlendConstants(constants))
    }

    fn set_line_width(&mut self, width: f32) -> Result<()> {
        if !(width > 0.0) {
            return Err(GpuError::InvalidArgument);
        }
        self.record(Command::SetLineWidth(width))
    }

    fn set_stencil_reference(&mut self, face: StencilFace, reference: u32) -> Result<()> {
        self.record(Command::SetStencilReference { face, reference })
    }

    fn set_stencil_compare_mask(&mut self, face: StencilFace, mask: u32) -> Result<()> {
        self.record(Command::SetStencilCompareMask { face, mask })
    }

    fn set_stencil_write_mask(&mut self, face: StencilFace, mask: u32) -> Result<()> {
        self.record(Command::SetStencilWriteMask { face, mask })
    }

    fn set_depth_bias(&mut self, constant_factor: f32, slope_factor: f32, clamp: f32) -> Result<()> {
        self.record(Command::SetDepthBias {
            constant_factor,
            slope_factor,
            clamp,
        })
    }

    /// Small inline upload. `data` must be a multiple of four bytes and at
    /// most [`MAX_INLINE_UPDATE`] long.
    fn update_buffer(&mut self, buffer: &Buffer, offset: u64, data: &[u8]) -> Result<()> {
        buffer.ensure_valid()?;
        if data.is_empty()
            || data.len() > MAX_INLINE_UPDATE
            || data.len() % 4 != 0
            || offset % 4 != 0
            || offset + data.len() as u64 > buffer.desc().byte_size
        {
            log::error!(
                "update of {} bytes at offset {} does not fit buffer '{}'",
                data.len(),
                offset,
                buffer.desc().debug_name
            );
            return Err(GpuError::InvalidArgument);
        }
        self.record(Command::UpdateBuffer {
            buffer: buffer.clone(),
            offset,
            data: Arc::from(data),
        })
    }

    /// Runs the commands of an executable secondary buffer in place.
    fn execute_secondary(&mut self, secondary: &CommandBuffer) -> Result<()> {
        if secondary.level() != CommandBufferLevel::Secondary {
            return Err(GpuError::InvalidArgument);
        }
        if !secondary.is_submittable() {
            return Err(GpuError::NotInitialised);
        }
        self.record(Command::ExecuteSecondary(Arc::from(secondary.commands())))
    }
}

impl CommandRecorder for CommandBuffer {
    fn record(&mut self, cmd: Command) -> Result<()> {
        if self.state != CommandBufferState::Recording {
            log::error!(
                "{} recorded into command buffer '{}' outside of begin/end",
                cmd.name(),
                self.debug_name
            );
            return Err(GpuError::NotInitialised);
        }
        if self.level == CommandBufferLevel::Secondary && matches!(cmd, Command::ExecuteSecondary(_)) {
            return Err(GpuError::InvalidArgument);
        }
        check_render_pass_nesting(&mut self.in_render_pass, &cmd)?;
        self.commands.push(cmd);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::resource::{BufferDesc, ContextShared, NativeObject, Resource};
    use std::sync::atomic::AtomicBool;

    fn buffer(ctx: &Arc<ContextShared>, byte_size: u64) -> Buffer {
        Resource::new(
            ctx,
            NativeObject::Null,
            BufferDesc {
                debug_name: "buf".into(),
                byte_size,
                usage: BufferUsage::VERTEX,
                visibility: MemoryVisibility::Gpu,
                mapped: AtomicBool::new(false),
            },
        )
    }

    #[test]
    fn state_machine() {
        let mut cmd = CommandBuffer::primary("test");
        assert_eq!(cmd.state(), CommandBufferState::Initial);
        assert_eq!(cmd.draw(DrawArgs::default()), Err(GpuError::NotInitialised));
        assert_eq!(cmd.end(), Err(GpuError::NotInitialised));

        cmd.begin().unwrap();
        assert_eq!(cmd.begin(), Err(GpuError::AlreadyInitialised));
        cmd.draw(DrawArgs::default()).unwrap();
        cmd.end().unwrap();
        assert_eq!(cmd.state(), CommandBufferState::Executable);
        assert_eq!(cmd.len(), 1);

        cmd.begin().unwrap();
        assert!(cmd.is_empty());
    }

    #[test]
    fn released_resources_are_rejected_at_record_time() {
        let ctx = Arc::new(ContextShared::new("cmd"));
        let buf = buffer(&ctx, 64);
        buf.destroy();

        let mut cmd = CommandBuffer::primary("test");
        cmd.begin().unwrap();
        assert_eq!(
            cmd.bind_vertex_buffer(0, &buf, 0),
            Err(GpuError::InvalidArgument)
        );
        assert!(cmd.is_empty());
    }

    #[test]
    fn render_passes_do_not_nest() {
        let mut cmd = CommandBuffer::primary("test");
        cmd.begin().unwrap();
        assert_eq!(cmd.end_render_pass(), Err(GpuError::InvalidArgument));
        cmd.record(Command::EndRenderPass).unwrap_err();
    }

    #[test]
    fn inline_updates_must_fit() {
        let ctx = Arc::new(ContextShared::new("cmd"));
        let buf = buffer(&ctx, 16);
        let mut cmd = CommandBuffer::primary("test");
        cmd.begin().unwrap();
        cmd.update_buffer(&buf, 0, &[0u8; 16]).unwrap();
        assert_eq!(
            cmd.update_buffer(&buf, 8, &[0u8; 16]),
            Err(GpuError::InvalidArgument)
        );
        assert_eq!(
            cmd.update_buffer(&buf, 0, &[0u8; 3]),
            Err(GpuError::InvalidArgument)
        );
    }

    #[test]
    fn secondaries_run_from_primaries_only() {
        let mut secondary = CommandBuffer::secondary("inner");
        let mut primary = CommandBuffer::primary("outer");
        primary.begin().unwrap();
        assert_eq!(
            primary.execute_secondary(&secondary),
            Err(GpuError::NotInitialised)
        );

        secondary.begin().unwrap();
        secondary.set_line_width(2.0).unwrap();
        secondary.end().unwrap();
        primary.execute_secondary(&secondary).unwrap();
        assert_eq!(primary.commands()[0].name(), "ExecuteSecondary");

        assert_eq!(
            primary.execute_secondary(&CommandBuffer::primary("p")),
            Err(GpuError::InvalidArgument)
        );
    }
}
