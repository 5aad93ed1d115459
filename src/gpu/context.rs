use std::sync::atomic::Ordering;
use std::sync::Arc;

use bytemuck::Pod;

use super::cmd::{check_render_pass_nesting, Command, CommandBuffer, CommandBufferLevel, CommandRecorder};
use super::driver::types::*;
use super::error::{GpuError, Result};
use super::gles::{GlesApi, GlesBackend};
use super::pipeline::fragment::{restore_default, FragmentValue};
use super::pipeline::relation::{
    classify, common_ancestor, plan_transition, BindReport, FragmentOp, PipelineRelation,
    TransitionPlan,
};
use super::pipeline::{
    build_graphics, ComputePipeline, ComputePipelineInfo, GraphicsPipeline, GraphicsPipelineInfo,
};
use super::resource::*;
use super::structs::*;
use super::tracker::{BoundPipeline, RenderStateTracker};
use super::{Backend, BackendKind};
use crate::utils::{Handle, Pool};

/// One GPU context: a backend, the render-state tracker that mirrors its
/// native state, and the pipelines created on it.
///
/// A context is used from one thread at a time. Resources created from it
/// may be dropped anywhere; their native objects are released the next time
/// the context synchronizes.
pub struct Context {
    info: ContextInfo,
    backend: Box<dyn Backend>,
    shared: Arc<ContextShared>,
    tracker: RenderStateTracker,
    pipelines: Pool<GraphicsPipeline>,
    compute_pipelines: Pool<ComputePipeline>,
    pipeline_stack: Vec<BoundPipeline>,
    in_render_pass: bool,
    live_resources: usize,
}

impl Context {
    pub fn new(backend: Box<dyn Backend>, info: &ContextInfo) -> Self {
        log::debug!(
            "context '{}' created on the {:?} backend",
            info.debug_name,
            backend.kind()
        );
        Self {
            info: info.clone(),
            backend,
            shared: Arc::new(ContextShared::new(&info.debug_name)),
            tracker: RenderStateTracker::new(),
            pipelines: Pool::default(),
            compute_pipelines: Pool::new(8),
            pipeline_stack: Vec::new(),
            in_render_pass: false,
            live_resources: 0,
        }
    }

    /// A context on the implicit backend, driving `api` for every native
    /// call.
    pub fn gles(api: impl GlesApi + 'static, info: &ContextInfo) -> Result<Self> {
        let backend = GlesBackend::new(Box::new(api), info)?;
        Ok(Self::new(Box::new(backend), info))
    }

    /// A context on the explicit backend without any presentation support.
    #[cfg(feature = "pipestate-vulkan")]
    pub fn headless(info: &ContextInfo) -> Result<Self> {
        let backend = super::vulkan::VulkanBackend::headless(info)?;
        Ok(Self::new(Box::new(backend), info))
    }

    pub fn name(&self) -> &str {
        &self.info.debug_name
    }

    pub fn backend_kind(&self) -> BackendKind {
        self.backend.kind()
    }

    pub fn capabilities(&self) -> Capabilities {
        self.backend.capabilities()
    }

    pub fn tracker(&self) -> &RenderStateTracker {
        &self.tracker
    }

    pub fn bound_pipeline(&self) -> BoundPipeline {
        self.tracker.bound_pipeline
    }

    pub fn pipeline(&self, handle: Handle<GraphicsPipeline>) -> Option<&GraphicsPipeline> {
        self.pipelines.get_ref(handle)
    }

    pub fn compute_pipeline(&self, handle: Handle<ComputePipeline>) -> Option<&ComputePipeline> {
        self.compute_pipelines.get_ref(handle)
    }

    fn wrap<D: ResourceDesc>(&mut self, raw: NativeObject, desc: D) -> Resource<D> {
        self.live_resources += 1;
        Resource::new(&self.shared, raw, desc)
    }

    ////////////////////////////////////////////////////////////////////////////
    // Resources
    ////////////////////////////////////////////////////////////////////////////

    pub fn create_buffer(&mut self, info: &BufferInfo) -> Result<Buffer> {
        if info.byte_size == 0 {
            return Err(GpuError::InvalidArgument);
        }
        if let Some(data) = info.initial_data {
            if data.len() as u64 > info.byte_size {
                log::error!(
                    "buffer '{}': {} bytes of initial data for a {} byte buffer",
                    info.debug_name,
                    data.len(),
                    info.byte_size
                );
                return Err(GpuError::InvalidArgument);
            }
        }

        let raw = self.backend.create_buffer(info)?;
        log::debug!("created buffer '{}' ({} bytes)", info.debug_name, info.byte_size);
        Ok(self.wrap(
            raw,
            BufferDesc {
                debug_name: info.debug_name.to_string(),
                byte_size: info.byte_size,
                usage: info.usage,
                visibility: info.visibility,
                mapped: Default::default(),
            },
        ))
    }

    pub fn create_image(&mut self, info: &ImageInfo) -> Result<Image> {
        if info.dim.iter().any(|d| *d == 0) || info.mip_levels == 0 {
            return Err(GpuError::InvalidArgument);
        }
        if info.format == Format::Unknown {
            return Err(GpuError::InvalidData);
        }
        if let Some(data) = info.initial_data {
            let needed = info.dim.iter().map(|d| *d as u64).product::<u64>()
                * info.format.bytes_per_pixel() as u64;
            if (data.len() as u64) < needed {
                log::error!(
                    "image '{}': {} bytes of initial data, {} needed",
                    info.debug_name,
                    data.len(),
                    needed
                );
                return Err(GpuError::InvalidData);
            }
        }

        let raw = self.backend.create_image(&mut self.tracker, info)?;
        log::debug!("created image '{}' {:?}", info.debug_name, info.dim);
        Ok(self.wrap(
            raw,
            ImageDesc {
                debug_name: info.debug_name.to_string(),
                dim: info.dim,
                format: info.format,
                mip_levels: info.mip_levels,
                usage: info.usage,
            },
        ))
    }

    pub fn create_shader(&mut self, info: &ShaderInfo) -> Result<Shader> {
        let raw = self.backend.create_shader(info)?;
        log::debug!("created {:?} shader '{}'", info.stage, info.debug_name);
        Ok(self.wrap(
            raw,
            ShaderDesc {
                debug_name: info.debug_name.to_string(),
                stage: info.stage,
            },
        ))
    }

    pub fn create_sampler(&mut self, info: &SamplerInfo) -> Result<Sampler> {
        let raw = self.backend.create_sampler(info)?;
        Ok(self.wrap(raw, SamplerDesc { info: *info }))
    }

    pub fn create_render_pass(&mut self, info: &RenderPassInfo) -> Result<RenderPass> {
        if info.color_attachments.len() > 8 {
            return Err(GpuError::UnsupportedRequest);
        }
        if let Some(depth) = &info.depth_stencil_attachment {
            if !depth.format.is_depth() {
                return Err(GpuError::InvalidArgument);
            }
        }
        if info
            .color_attachments
            .iter()
            .any(|a| a.format.is_depth() || a.format == Format::Unknown)
        {
            return Err(GpuError::InvalidArgument);
        }

        let raw = self.backend.create_render_pass(info)?;
        Ok(self.wrap(
            raw,
            RenderPassDesc {
                debug_name: info.debug_name.to_string(),
                color_attachments: info.color_attachments.to_vec(),
                depth_stencil_attachment: info.depth_stencil_attachment,
            },
        ))
    }

    pub fn create_framebuffer(&mut self, info: &FramebufferInfo) -> Result<Framebuffer> {
        info.render_pass.ensure_valid()?;
        for image in info
            .color_attachments
            .iter()
            .chain(info.depth_stencil_attachment.into_iter())
        {
            image.ensure_valid()?;
        }

        let pass = info.render_pass.desc();
        if pass.color_attachments.len() != info.color_attachments.len()
            || pass.depth_stencil_attachment.is_some() != info.depth_stencil_attachment.is_some()
        {
            log::error!(
                "framebuffer '{}' does not match the attachments of render pass '{}'",
                info.debug_name,
                pass.debug_name
            );
            return Err(GpuError::InvalidArgument);
        }

        let raw = self.backend.create_framebuffer(&mut self.tracker, info)?;
        Ok(self.wrap(
            raw,
            FramebufferDesc {
                debug_name: info.debug_name.to_string(),
                render_pass: info.render_pass.clone(),
                color_attachments: info.color_attachments.to_vec(),
                depth_stencil_attachment: info.depth_stencil_attachment.cloned(),
                extent: info.extent,
            },
        ))
    }

    pub fn create_pipeline_layout(&mut self, info: &PipelineLayoutInfo) -> Result<PipelineLayout> {
        let raw = self.backend.create_pipeline_layout(info)?;
        Ok(self.wrap(
            raw,
            PipelineLayoutDesc {
                debug_name: info.debug_name.to_string(),
                sets: info.sets.iter().map(|s| s.to_vec()).collect(),
                push_constant_bytes: info.push_constant_bytes,
            },
        ))
    }

    pub fn create_descriptor_set(&mut self, info: &DescriptorSetInfo) -> Result<DescriptorSet> {
        info.layout.ensure_valid()?;
        let Some(bindings) = info.layout.desc().sets.get(info.set as usize) else {
            log::error!(
                "descriptor set '{}' uses set {} which layout '{}' does not declare",
                info.debug_name,
                info.set,
                info.layout.desc().debug_name
            );
            return Err(GpuError::InvalidArgument);
        };

        for write in info.writes {
            if !bindings
                .iter()
                .any(|b| b.binding == write.binding && b.ty == write.ty)
            {
                log::error!(
                    "descriptor set '{}' writes binding {} as {:?}, which the layout does not declare",
                    info.debug_name,
                    write.binding,
                    write.ty
                );
                return Err(GpuError::InvalidArgument);
            }
            match &write.resource {
                DescriptorResource::Buffer { buffer, .. } => buffer.ensure_valid()?,
                DescriptorResource::ImageSampler { image, sampler } => {
                    image.ensure_valid()?;
                    sampler.ensure_valid()?;
                }
            }
        }

        let raw = self.backend.create_descriptor_set(info)?;
        Ok(self.wrap(
            raw,
            DescriptorSetDesc {
                debug_name: info.debug_name.to_string(),
                layout: info.layout.clone(),
                set: info.set,
                writes: info.writes.to_vec(),
            },
        ))
    }

    pub fn create_fence(&mut self, signaled: bool) -> Result<Fence> {
        let raw = self.backend.create_fence(signaled)?;
        Ok(self.wrap(raw, FenceDesc))
    }

    pub fn create_semaphore(&mut self) -> Result<Semaphore> {
        let raw = self.backend.create_semaphore()?;
        Ok(self.wrap(raw, SemaphoreDesc))
    }

    /// Maps a host-visible buffer and views its memory as `T`s.
    pub fn map_buffer<T: Pod>(&mut self, buffer: &Buffer) -> Result<&mut [T]> {
        buffer.ensure_valid()?;
        let desc = buffer.desc();
        if !desc.is_host_visible() {
            log::error!("buffer '{}' is not host visible", desc.debug_name);
            return Err(GpuError::UnsupportedRequest);
        }
        if desc.mapped.swap(true, Ordering::AcqRel) {
            log::error!("buffer '{}' is already mapped", desc.debug_name);
            return Err(GpuError::InvalidArgument);
        }

        let ptr = match self.backend.map_buffer(buffer) {
            Ok(ptr) if !ptr.is_null() => ptr,
            Ok(_) => {
                desc.mapped.store(false, Ordering::Release);
                return Err(GpuError::UnknownError);
            }
            Err(err) => {
                desc.mapped.store(false, Ordering::Release);
                return Err(err);
            }
        };

        // SAFETY: the backend mapped `byte_size` bytes at `ptr`, and they stay
        // mapped until `unmap_buffer`, which needs `&mut self` again.
        let bytes = unsafe { std::slice::from_raw_parts_mut(ptr, desc.byte_size as usize) };
        match bytemuck::try_cast_slice_mut(bytes) {
            Ok(view) => Ok(view),
            Err(err) => {
                log::error!("cannot view buffer '{}' as requested: {}", desc.debug_name, err);
                desc.mapped.store(false, Ordering::Release);
                let _ = self.backend.unmap_buffer(buffer);
                Err(GpuError::InvalidArgument)
            }
        }
    }

    pub fn unmap_buffer(&mut self, buffer: &Buffer) -> Result<()> {
        buffer.ensure_valid()?;
        let desc = buffer.desc();
        if !desc.mapped.swap(false, Ordering::AcqRel) {
            log::error!("buffer '{}' is not mapped", desc.debug_name);
            return Err(GpuError::InvalidArgument);
        }
        self.backend.unmap_buffer(buffer)
    }

    /// Hands every native object whose last handle went away back to the
    /// backend.
    pub fn collect_garbage(&mut self) {
        for release in self.shared.take_releases() {
            log::trace!("releasing {} #{}", release.kind.as_str(), release.id.value());
            self.backend.release(&mut self.tracker, &release);
            self.live_resources = self.live_resources.saturating_sub(1);
        }
    }

    /// Destroys `resource` and releases its native object before returning.
    pub fn destroy_resource<D: ResourceDesc>(&mut self, resource: &Resource<D>) {
        resource.destroy();
        self.collect_garbage();
    }

    /// Native objects created on this context and not released yet.
    pub fn live_resource_count(&mut self) -> usize {
        self.collect_garbage();
        self.live_resources
    }

    ////////////////////////////////////////////////////////////////////////////
    // Pipelines
    ////////////////////////////////////////////////////////////////////////////

    pub fn create_graphics_pipeline(
        &mut self,
        info: &GraphicsPipelineInfo,
    ) -> Result<Handle<GraphicsPipeline>> {
        let parent = match info.parent {
            Some(handle) => match self.pipelines.get_ref(handle) {
                Some(pipeline) => Some((handle, pipeline)),
                None => {
                    log::error!(
                        "pipeline '{}' names a parent that no longer exists",
                        info.debug_name
                    );
                    return Err(GpuError::InvalidArgument);
                }
            },
            None => None,
        };

        let backend = &mut self.backend;
        let shared = &self.shared;
        let live = &mut self.live_resources;
        let mut pipeline = build_graphics(info, parent, self.info.max_pipeline_depth, |stages| {
            let stages: Vec<Shader> = stages.iter().cloned().collect();
            for shader in &stages {
                shader.ensure_valid()?;
            }
            let raw = backend.link_program(&stages)?;
            *live += 1;
            Ok(Resource::new(shared, raw, ProgramDesc { stages }))
        })?;

        if self.backend.kind() == BackendKind::Explicit {
            let raw = self.backend.create_graphics_pipeline(&pipeline)?;
            pipeline.native = Some(self.wrap(
                raw,
                PipelineObjectDesc {
                    bind_point: PipelineBindPoint::Graphics,
                },
            ));
        }

        let handle = self.pipelines.insert(pipeline).ok_or_else(|| {
            log::error!("out of pipeline slots");
            GpuError::UnknownError
        })?;
        Ok(handle)
    }

    /// Destroys a pipeline. Children stay usable: they keep their own
    /// fragments and treat the missing parent as no parent at all.
    pub fn destroy_graphics_pipeline(&mut self, handle: Handle<GraphicsPipeline>) -> Result<()> {
        let pipeline = self
            .pipelines
            .release(handle)
            .ok_or(GpuError::InvalidArgument)?;
        if self.tracker.bound_pipeline == BoundPipeline::Graphics(handle) {
            self.tracker.bound_pipeline = BoundPipeline::None;
        }
        log::debug!("destroyed pipeline '{}'", pipeline.info.debug_name);
        drop(pipeline);
        self.collect_garbage();
        Ok(())
    }

    pub fn create_compute_pipeline(
        &mut self,
        info: &ComputePipelineInfo,
    ) -> Result<Handle<ComputePipeline>> {
        if !self.backend.capabilities().compute {
            return Err(GpuError::UnsupportedRequest);
        }
        if info.layout.is_none() {
            log::error!("compute pipeline '{}' has no pipeline layout", info.debug_name);
            return Err(GpuError::NotInitialised);
        }
        let shader = match &info.shader {
            Some(shader) if shader.desc().stage == ShaderStage::Compute => shader.clone(),
            _ => {
                log::error!("compute pipeline '{}' needs a compute shader", info.debug_name);
                return Err(GpuError::InvalidData);
            }
        };
        shader.ensure_valid()?;

        let stages = vec![shader];
        let raw = self.backend.link_program(&stages)?;
        let program = self.wrap(raw, ProgramDesc { stages });

        let native = if self.backend.kind() == BackendKind::Explicit {
            let raw = self.backend.create_compute_pipeline(info, &program)?;
            Some(self.wrap(
                raw,
                PipelineObjectDesc {
                    bind_point: PipelineBindPoint::Compute,
                },
            ))
        } else {
            None
        };

        self.compute_pipelines
            .insert(ComputePipeline {
                info: info.clone(),
                program,
                native,
            })
            .ok_or(GpuError::UnknownError)
    }

    pub fn destroy_compute_pipeline(&mut self, handle: Handle<ComputePipeline>) -> Result<()> {
        self.compute_pipelines
            .release(handle)
            .ok_or(GpuError::InvalidArgument)?;
        if self.tracker.bound_pipeline == BoundPipeline::Compute(handle) {
            self.tracker.bound_pipeline = BoundPipeline::None;
        }
        self.collect_garbage();
        Ok(())
    }

    /// The bound graphics pipeline, if it still exists.
    fn current_graphics(&self) -> Option<Handle<GraphicsPipeline>> {
        match self.tracker.bound_pipeline {
            BoundPipeline::Graphics(h) if self.pipelines.is_live(h) => Some(h),
            _ => None,
        }
    }

    /// Binds a graphics pipeline, touching only the state that differs from
    /// what the previously bound pipeline left behind.
    pub fn bind_graphics_pipeline(&mut self, handle: Handle<GraphicsPipeline>) -> Result<BindReport> {
        let max_depth = self.info.max_pipeline_depth;
        let current = self.current_graphics();
        let candidate = self.pipelines.get_ref(handle).ok_or_else(|| {
            log::error!("bind of a destroyed pipeline");
            GpuError::InvalidArgument
        })?;
        let relation = classify(&self.pipelines, current, Some(handle), max_depth);

        if self.backend.kind() == BackendKind::Explicit {
            let native = candidate.native.clone().ok_or(GpuError::NotInitialised)?;
            let dynamic: Vec<FragmentValue> = candidate
                .container
                .iter()
                .filter(|f| {
                    matches!(
                        f.value(),
                        FragmentValue::Viewport(_) | FragmentValue::Scissor(_)
                    )
                })
                .map(|f| f.value().clone())
                .collect();

            self.backend.bind_pipeline_object(
                &mut self.tracker,
                PipelineBindPoint::Graphics,
                &native,
            )?;
            for value in &dynamic {
                self.backend.apply_fragment(&mut self.tracker, value);
            }
            self.tracker.bound_pipeline = BoundPipeline::Graphics(handle);
            self.tracker.dirty.clear();
            return Ok(BindReport {
                relation,
                applied: usize::from(relation != PipelineRelation::Identity),
                restored: 0,
            });
        }

        let ancestor = match (relation, current) {
            (PipelineRelation::Siblings, Some(current)) => {
                common_ancestor(&self.pipelines, current, handle, max_depth)
            }
            _ => None,
        };
        let plan = plan_transition(
            relation,
            current
                .and_then(|h| self.pipelines.get_ref(h))
                .map(|p| &p.container),
            Some(&candidate.container),
            ancestor
                .and_then(|h| self.pipelines.get_ref(h))
                .map(|p| &p.container),
            self.tracker.dirty,
        );

        self.run_plan(&plan);
        self.tracker.bound_pipeline = BoundPipeline::Graphics(handle);
        self.tracker.dirty.clear();

        let report = plan.report();
        log::trace!(
            "bound pipeline {:#x}: {:?}, {} applied, {} restored",
            handle.raw(),
            report.relation,
            report.applied,
            report.restored
        );
        Ok(report)
    }

    fn run_plan(&mut self, plan: &TransitionPlan) {
        let backend = self.backend.as_mut();
        let tracker = &mut self.tracker;
        for op in &plan.ops {
            match op {
                FragmentOp::Apply(f) | FragmentOp::Restore(f) => f.apply(backend, tracker),
                FragmentOp::Unset(f) => f.unset(backend, tracker),
                FragmentOp::Reset(kind) => restore_default(*kind, backend, tracker),
            }
        }
    }

    pub fn bind_compute_pipeline(&mut self, handle: Handle<ComputePipeline>) -> Result<()> {
        let pipeline = self
            .compute_pipelines
            .get_ref(handle)
            .ok_or(GpuError::InvalidArgument)?;

        match (&pipeline.native, self.backend.kind()) {
            (Some(native), BackendKind::Explicit) => {
                let native = native.clone();
                self.backend.bind_pipeline_object(
                    &mut self.tracker,
                    PipelineBindPoint::Compute,
                    &native,
                )?;
            }
            (_, BackendKind::Explicit) => return Err(GpuError::NotInitialised),
            (_, BackendKind::Implicit) => {
                let value = FragmentValue::ShaderProgram(Some(pipeline.program.clone()));
                self.backend.apply_fragment(&mut self.tracker, &value);
            }
        }

        self.tracker.bound_pipeline = BoundPipeline::Compute(handle);
        Ok(())
    }

    /// Unbinds the graphics pipeline and puts every piece of state it set
    /// back to its default.
    pub fn reset_pipeline(&mut self) -> BindReport {
        let current = self.current_graphics();
        let relation = classify(&self.pipelines, current, None, self.info.max_pipeline_depth);

        let report = if self.backend.kind() == BackendKind::Implicit {
            let plan = plan_transition(
                relation,
                current
                    .and_then(|h| self.pipelines.get_ref(h))
                    .map(|p| &p.container),
                None,
                None,
                self.tracker.dirty,
            );
            self.run_plan(&plan);
            plan.report()
        } else {
            BindReport::unchanged(relation)
        };

        self.tracker.bound_pipeline = BoundPipeline::None;
        self.tracker.dirty.clear();
        report
    }

    /// Saves whatever pipeline is bound right now.
    pub fn push_pipeline(&mut self) {
        self.pipeline_stack.push(self.tracker.bound_pipeline);
    }

    /// Rebinds the pipeline saved by the matching [`Context::push_pipeline`].
    pub fn pop_pipeline(&mut self) -> Result<()> {
        let Some(saved) = self.pipeline_stack.pop() else {
            log::error!("pipeline stack popped while empty");
            return Ok(());
        };

        match saved {
            BoundPipeline::Graphics(h) if self.pipelines.is_live(h) => {
                self.bind_graphics_pipeline(h).map(|_| ())
            }
            BoundPipeline::Compute(h) if self.compute_pipelines.is_live(h) => {
                self.bind_compute_pipeline(h)
            }
            BoundPipeline::None => {
                self.reset_pipeline();
                Ok(())
            }
            _ => {
                log::warn!("saved pipeline was destroyed before it could be restored");
                self.reset_pipeline();
                Ok(())
            }
        }
    }

    /// How switching from `current` to `candidate` would be classified.
    pub fn relation(
        &self,
        current: Option<Handle<GraphicsPipeline>>,
        candidate: Option<Handle<GraphicsPipeline>>,
    ) -> PipelineRelation {
        classify(&self.pipelines, current, candidate, self.info.max_pipeline_depth)
    }

    pub fn pipeline_stack_depth(&self) -> usize {
        self.pipeline_stack.len()
    }

    ////////////////////////////////////////////////////////////////////////////
    // Execution
    ////////////////////////////////////////////////////////////////////////////

    /// Records straight into the context: every command runs as it is
    /// recorded. Only the implicit backend can do this.
    pub fn immediate(&mut self) -> Result<ImmediateRecorder<'_>> {
        if self.backend.kind() == BackendKind::Explicit {
            return Err(GpuError::UnsupportedRequest);
        }
        Ok(ImmediateRecorder { ctx: self })
    }

    fn check_capability(&self, cmd: &Command) -> bool {
        let caps = self.backend.capabilities();
        let supported = match cmd {
            Command::Draw(_) | Command::DrawIndexed(_) => caps.graphics,
            Command::Dispatch(_) => caps.compute,
            _ => true,
        };
        if !supported {
            debug_assert!(
                false,
                "{} issued on a context without the capability for it",
                cmd.name()
            );
            log::warn!("{} skipped: context lacks the capability", cmd.name());
        }
        supported
    }

    pub(crate) fn execute_command(&mut self, cmd: &Command) -> Result<()> {
        if cmd.references_released() {
            log::warn!("{} skipped: it uses a released resource", cmd.name());
            return Ok(());
        }
        if !self.check_capability(cmd) {
            return Ok(());
        }

        match cmd {
            Command::BindPipeline(h) => self.bind_graphics_pipeline(*h).map(|_| ()),
            Command::BindComputePipeline(h) => self.bind_compute_pipeline(*h),
            Command::PushPipeline => {
                self.push_pipeline();
                Ok(())
            }
            Command::PopPipeline => self.pop_pipeline(),
            Command::ResetPipeline => {
                self.reset_pipeline();
                Ok(())
            }
            Command::ExecuteSecondary(commands) => {
                commands.iter().try_for_each(|c| self.execute_command(c))
            }
            Command::Draw(_) | Command::DrawIndexed(_)
                if !matches!(self.tracker.bound_pipeline, BoundPipeline::Graphics(_)) =>
            {
                log::error!("{} without a bound graphics pipeline", cmd.name());
                Err(GpuError::NotInitialised)
            }
            Command::Dispatch(_)
                if !matches!(self.tracker.bound_pipeline, BoundPipeline::Compute(_)) =>
            {
                log::error!("dispatch without a bound compute pipeline");
                Err(GpuError::NotInitialised)
            }
            _ => self.backend.execute(&mut self.tracker, cmd),
        }
    }

    /// Executes a primary command buffer.
    ///
    /// The implicit backend runs the commands synchronously. The explicit
    /// backend records them into a native command buffer and submits it; the
    /// buffer stays `Pending` until it is recorded again.
    pub fn submit(&mut self, cmd: &mut CommandBuffer, submit: &SubmitInfo) -> Result<()> {
        if cmd.level() == CommandBufferLevel::Secondary {
            log::error!("secondary command buffer '{}' submitted directly", cmd.debug_name());
            return Err(GpuError::InvalidArgument);
        }
        if !cmd.is_submittable() {
            log::error!("command buffer '{}' submitted before end()", cmd.debug_name());
            return Err(GpuError::NotInitialised);
        }
        for semaphore in submit.wait_semaphores.iter().chain(submit.signal_semaphores) {
            semaphore.ensure_valid()?;
        }
        if let Some(fence) = submit.fence {
            fence.ensure_valid()?;
        }

        self.collect_garbage();
        self.backend.begin_submission(&mut self.tracker)?;
        let executed = cmd
            .commands()
            .iter()
            .try_for_each(|c| self.execute_command(c));
        if let Err(err) = &executed {
            log::error!("submission of '{}' stopped early: {}", cmd.debug_name(), err);
        }
        let ended = self.backend.end_submission(&mut self.tracker, submit);
        executed?;
        ended?;

        if self.backend.kind() == BackendKind::Explicit {
            cmd.mark_pending();
        }
        Ok(())
    }

    pub fn wait_fence(&mut self, fence: &Fence, timeout_ns: u64) -> Result<()> {
        fence.ensure_valid()?;
        self.backend.wait_fence(fence, timeout_ns)?;
        self.collect_garbage();
        Ok(())
    }

    /// Non-blocking: whether the fence has been signaled.
    pub fn fence_status(&mut self, fence: &Fence) -> Result<bool> {
        fence.ensure_valid()?;
        self.backend.fence_status(fence)
    }

    pub fn reset_fence(&mut self, fence: &Fence) -> Result<()> {
        fence.ensure_valid()?;
        self.backend.reset_fence(fence)
    }

    pub fn wait_idle(&mut self) -> Result<()> {
        self.backend.wait_idle()?;
        self.collect_garbage();
        Ok(())
    }
}

impl Drop for Context {
    fn drop(&mut self) {
        if let Err(err) = self.backend.wait_idle() {
            log::warn!("context '{}' torn down without idling: {}", self.info.debug_name, err);
        }
        self.pipelines.drain_with(drop);
        self.compute_pipelines.drain_with(drop);
        self.collect_garbage();
        if self.live_resources > 0 {
            log::debug!(
                "context '{}' torn down with {} resources still referenced",
                self.info.debug_name,
                self.live_resources
            );
        }
    }
}

/// Executes commands as they are recorded.
pub struct ImmediateRecorder<'a> {
    ctx: &'a mut Context,
}

impl ImmediateRecorder<'_> {
    pub fn context(&mut self) -> &mut Context {
        self.ctx
    }
}

impl CommandRecorder for ImmediateRecorder<'_> {
    fn record(&mut self, cmd: Command) -> Result<()> {
        check_render_pass_nesting(&mut self.ctx.in_render_pass, &cmd)?;
        self.ctx.execute_command(&cmd)
    }
}
