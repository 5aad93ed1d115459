//! Implicit backend: a GL ES 3.x state machine driven piecewise.
//!
//! Pipelines have no native counterpart here. Binding one applies its state
//! fragments through [`Backend::apply_fragment`], and every setter compares
//! against the render-state tracker before touching the driver.

pub mod api;
pub mod conversions;
#[cfg(feature = "pipestate-gl")]
pub mod native;
pub mod null;

use std::collections::HashMap;

pub use api::GlesApi;
#[cfg(feature = "pipestate-gl")]
pub use native::LoadedGles;
pub use null::{CallLog, GlCall, NullGles};

use api::*;
use conversions::*;

use super::cmd::Command;
use super::driver::types::*;
use super::error::{GpuError, Result};
use super::pipeline::{ComputePipelineInfo, FragmentKind, FragmentValue, GraphicsPipeline};
use super::resource::*;
use super::structs::*;
use super::tracker::{slot, AttributePointer, BufferBinding, IndexBinding, Tracked};
use super::tracker::RenderStateTracker as Tracker;
use super::{Backend, BackendKind};

const STENCIL_FACES: [GLenum; 2] = [FRONT, BACK];

fn toggle(gl: &mut dyn GlesApi, cap: GLenum, on: bool) {
    if on {
        gl.enable(cap);
    } else {
        gl.disable(cap);
    }
}

fn set_color_mask(gl: &mut dyn GlesApi, mask: ColorWriteMask) {
    gl.color_mask(
        mask.contains(ColorWriteMask::R),
        mask.contains(ColorWriteMask::G),
        mask.contains(ColorWriteMask::B),
        mask.contains(ColorWriteMask::A),
    );
}

fn set_scissor(gl: &mut dyn GlesApi, rect: &Rect2D) {
    gl.scissor(rect.x, rect.y, rect.w as i32, rect.h as i32);
}

/// Applies one fragment value, issuing native calls only for what differs
/// from the tracker.
fn apply_value(gl: &mut dyn GlesApi, caps: &Capabilities, t: &mut Tracker, value: &FragmentValue) {
    match value {
        FragmentValue::ShaderProgram(program) => {
            let name = program.as_ref().map_or(0, |p| p.raw().gl_name());
            t.program
                .update(program.as_ref().map(|p| p.id()), |_| gl.use_program(name));
        }
        FragmentValue::DepthTest(on) => {
            t.depth_test.update(*on, |on| toggle(gl, DEPTH_TEST, *on));
        }
        FragmentValue::DepthWrite(on) => {
            t.depth_write.update(*on, |on| gl.depth_mask(*on));
        }
        FragmentValue::DepthFunc(op) => {
            t.depth_func.update(*op, |op| gl.depth_func(compare_op(*op)));
        }
        FragmentValue::DepthBias(bias) => {
            let was_enabled = t.depth_bias.get().map(|b| b.enable);
            t.depth_bias.update(*bias, |bias| {
                if was_enabled != Some(bias.enable) {
                    toggle(gl, POLYGON_OFFSET_FILL, bias.enable);
                }
                if bias.enable {
                    gl.polygon_offset(bias.slope_factor, bias.constant_factor);
                }
            });
        }
        FragmentValue::StencilTest(on) => {
            t.stencil_test.update(*on, |on| toggle(gl, STENCIL_TEST, *on));
        }
        FragmentValue::StencilOpFront(ops) | FragmentValue::StencilOpBack(ops) => {
            let face = usize::from(value.kind() == FragmentKind::StencilOpBack);
            t.stencil_ops[face].update(*ops, |ops| {
                gl.stencil_op_separate(
                    STENCIL_FACES[face],
                    stencil_op(ops.fail),
                    stencil_op(ops.depth_fail),
                    stencil_op(ops.pass),
                )
            });
        }
        FragmentValue::StencilFuncFront(func) | FragmentValue::StencilFuncBack(func) => {
            let face = usize::from(value.kind() == FragmentKind::StencilFuncBack);
            t.stencil_func[face].update(*func, |func| {
                gl.stencil_func_separate(
                    STENCIL_FACES[face],
                    compare_op(func.compare),
                    func.reference as i32,
                    func.read_mask,
                )
            });
        }
        FragmentValue::StencilWriteMaskFront(mask) | FragmentValue::StencilWriteMaskBack(mask) => {
            let face = usize::from(value.kind() == FragmentKind::StencilWriteMaskBack);
            t.stencil_write_mask[face]
                .update(*mask, |m| gl.stencil_mask_separate(STENCIL_FACES[face], *m));
        }
        FragmentValue::PolygonCulling(mode) => {
            let was_culling = t.cull_mode.get().map(|m| *m != CullMode::None);
            t.cull_mode.update(*mode, |mode| match cull_face(*mode) {
                Some(face) => {
                    if was_culling != Some(true) {
                        gl.enable(CULL_FACE);
                    }
                    gl.cull_face(face);
                }
                None => gl.disable(CULL_FACE),
            });
        }
        FragmentValue::PolygonWinding(face) => {
            t.front_face.update(*face, |face| gl.front_face(front_face(*face)));
        }
        FragmentValue::BlendEnable(on) => {
            t.blend_enable.update(*on, |on| toggle(gl, BLEND, *on));
        }
        FragmentValue::BlendFactors(f) => {
            t.blend_factors.update(*f, |f| {
                gl.blend_func_separate(
                    blend_factor(f.src_color),
                    blend_factor(f.dst_color),
                    blend_factor(f.src_alpha),
                    blend_factor(f.dst_alpha),
                )
            });
        }
        FragmentValue::BlendOp(ops) => {
            t.blend_ops.update(*ops, |ops| {
                gl.blend_equation_separate(blend_op(ops.color), blend_op(ops.alpha))
            });
        }
        FragmentValue::ColorWriteMask(mask) => {
            t.color_write_mask.update(*mask, |mask| set_color_mask(gl, *mask));
        }
        FragmentValue::ScissorTest(on) => {
            t.scissor_test.update(*on, |on| toggle(gl, SCISSOR_TEST, *on));
        }
        FragmentValue::Viewport(viewport) => {
            let depth = t.viewport.get().map(|v| (v.min_depth, v.max_depth));
            t.viewport.update(*viewport, |v| {
                gl.viewport(v.x as i32, v.y as i32, v.width as i32, v.height as i32);
                if depth != Some((v.min_depth, v.max_depth)) {
                    gl.depth_range(v.min_depth, v.max_depth);
                }
            });
        }
        FragmentValue::Scissor(rect) => {
            t.scissor.update(*rect, |rect| set_scissor(gl, rect));
        }
        FragmentValue::PrimitiveTopology(topology) => t.topology = *topology,
        FragmentValue::VertexInput(input) => t.vertex_input = Some(input.clone()),
        FragmentValue::TessPatchControlPoints(points) => {
            if caps.tessellation {
                t.patch_control_points
                    .update(*points, |points| gl.patch_parameter(*points as i32));
            }
        }
    }
}

/// State a clear overrides, saved so it can be put back afterwards.
struct ClearState {
    color_mask: Option<ColorWriteMask>,
    depth_write: Option<bool>,
    stencil_write: [Option<u32>; 2],
    scissor_test: Option<bool>,
    scissor: Option<Rect2D>,
}

impl ClearState {
    fn save(t: &Tracker) -> Self {
        Self {
            color_mask: t.color_write_mask.get().copied(),
            depth_write: t.depth_write.get().copied(),
            stencil_write: [
                t.stencil_write_mask[0].get().copied(),
                t.stencil_write_mask[1].get().copied(),
            ],
            scissor_test: t.scissor_test.get().copied(),
            scissor: t.scissor.get().copied(),
        }
    }

    /// Write masks open for whatever is cleared, scissor limited to `area`.
    fn force(
        gl: &mut dyn GlesApi,
        t: &mut Tracker,
        area: Option<Rect2D>,
        color: bool,
        depth: bool,
        stencil: bool,
    ) {
        if color {
            t.color_write_mask
                .update(ColorWriteMask::RGBA, |m| set_color_mask(gl, *m));
        }
        if depth {
            t.depth_write.update(true, |w| gl.depth_mask(*w));
        }
        if stencil {
            for (face, mask) in t.stencil_write_mask.iter_mut().enumerate() {
                mask.update(!0, |m| gl.stencil_mask_separate(STENCIL_FACES[face], *m));
            }
        }
        match area {
            Some(rect) => {
                t.scissor_test.update(true, |on| toggle(gl, SCISSOR_TEST, *on));
                t.scissor.update(rect, |rect| set_scissor(gl, rect));
            }
            None => {
                t.scissor_test.update(false, |on| toggle(gl, SCISSOR_TEST, *on));
            }
        }
    }

    /// Puts saved values back. Values that were unknown before the clear
    /// stay as forced and are flagged for the next pipeline bind.
    fn restore(self, gl: &mut dyn GlesApi, t: &mut Tracker) {
        match self.color_mask {
            Some(mask) => {
                t.color_write_mask.update(mask, |m| set_color_mask(gl, *m));
            }
            None => t.dirty.insert(FragmentKind::ColorWriteMask),
        }
        match self.depth_write {
            Some(write) => {
                t.depth_write.update(write, |w| gl.depth_mask(*w));
            }
            None => t.dirty.insert(FragmentKind::DepthWrite),
        }
        for (face, saved) in self.stencil_write.into_iter().enumerate() {
            match saved {
                Some(mask) => {
                    t.stencil_write_mask[face]
                        .update(mask, |m| gl.stencil_mask_separate(STENCIL_FACES[face], *m));
                }
                None => t.dirty.insert(stencil_write_mask_kind(face)),
            }
        }
        match self.scissor_test {
            Some(on) => {
                t.scissor_test.update(on, |on| toggle(gl, SCISSOR_TEST, *on));
            }
            None => t.dirty.insert(FragmentKind::ScissorTest),
        }
        match self.scissor {
            Some(rect) => {
                t.scissor.update(rect, |rect| set_scissor(gl, rect));
            }
            None => t.dirty.insert(FragmentKind::Scissor),
        }
    }
}

#[derive(Debug, Default)]
struct FenceState {
    sync: Option<u64>,
    signaled: bool,
}

pub struct GlesBackend {
    gl: Box<dyn GlesApi>,
    caps: Capabilities,
    check_errors: bool,
    fences: HashMap<u32, FenceState>,
    next_fence: u32,
}

impl GlesBackend {
    pub fn new(gl: Box<dyn GlesApi>, info: &ContextInfo) -> Result<Self> {
        let caps = gl.capabilities();
        if !caps.graphics && !caps.compute {
            log::error!("GL context '{}' can neither draw nor dispatch", info.debug_name);
            return Err(GpuError::UnsupportedRequest);
        }
        log::debug!("GL ES backend for '{}': {:?}", info.debug_name, caps);

        Ok(Self {
            gl,
            caps,
            check_errors: info.debug_native_errors,
            fences: HashMap::new(),
            next_fence: 1,
        })
    }

    /// Drains the native error flags and logs each with the calling
    /// operation. Debug builds only.
    #[track_caller]
    fn check(&mut self, op: &str) {
        if !cfg!(debug_assertions) || !self.check_errors {
            return;
        }
        // A lost context may report the same flag forever.
        for _ in 0..8 {
            let code = self.gl.get_error();
            if code == NO_ERROR {
                break;
            }
            let at = std::panic::Location::caller();
            log::error!(
                "{} ({:#06x}) raised by {} at {}:{}",
                error_name(code),
                code,
                op,
                at.file(),
                at.line()
            );
        }
    }

    fn clear_color(&mut self, t: &mut Tracker, attachment: u32, color: [f32; 4], area: Option<Rect2D>) {
        let saved = ClearState::save(t);
        let gl = self.gl.as_mut();
        ClearState::force(gl, t, area, true, false, false);
        gl.clear_buffer_color(attachment as i32, color);
        saved.restore(gl, t);
    }

    fn clear_depth_stencil(
        &mut self,
        t: &mut Tracker,
        depth: Option<f32>,
        stencil: Option<u32>,
        area: Option<Rect2D>,
    ) {
        let saved = ClearState::save(t);
        let gl = self.gl.as_mut();
        ClearState::force(gl, t, area, false, depth.is_some(), stencil.is_some());

        let mut mask = 0;
        if let Some(depth) = depth {
            t.clear_depth.update(depth, |d| gl.clear_depth(*d));
            mask |= DEPTH_BUFFER_BIT;
        }
        if let Some(stencil) = stencil {
            t.clear_stencil.update(stencil, |s| gl.clear_stencil(*s as i32));
            mask |= STENCIL_BUFFER_BIT;
        }
        gl.clear(mask);
        saved.restore(gl, t);
    }

    fn begin_render_pass(&mut self, t: &mut Tracker, begin: &super::cmd::RenderPassBegin) {
        let framebuffer = &begin.framebuffer;
        let name = framebuffer.raw().gl_name();
        let gl = self.gl.as_mut();
        t.framebuffer
            .update(Some(framebuffer.id()), |_| gl.bind_framebuffer(FRAMEBUFFER, name));

        let pass = framebuffer.desc().render_pass.desc();
        for (i, attachment) in pass.color_attachments.iter().enumerate() {
            if attachment.load_op != LoadOp::Clear {
                continue;
            }
            let color = match begin.clear_values.get(i) {
                Some(ClearValue::Color(color)) => *color,
                _ => [0.0; 4],
            };
            self.clear_color(t, i as u32, color, Some(begin.area));
        }

        if let Some(attachment) = &pass.depth_stencil_attachment {
            if attachment.load_op == LoadOp::Clear {
                let (depth, stencil) = match begin.clear_values.get(pass.color_attachments.len()) {
                    Some(ClearValue::DepthStencil { depth, stencil }) => (*depth, *stencil),
                    _ => (1.0, 0),
                };
                let stencil = attachment.format.has_stencil().then_some(stencil);
                self.clear_depth_stencil(t, Some(depth), stencil, Some(begin.area));
            }
        }
    }

    fn bind_descriptor_set(&mut self, t: &mut Tracker, set: &DescriptorSet) {
        let gl = self.gl.as_mut();
        for write in &set.desc().writes {
            let binding = write.binding;
            match &write.resource {
                DescriptorResource::Buffer {
                    buffer,
                    offset,
                    range,
                } => {
                    let Some(target) = descriptor_target(write.ty) else {
                        continue;
                    };
                    let range = if *range == 0 {
                        buffer.desc().byte_size.saturating_sub(*offset)
                    } else {
                        *range
                    };
                    let table = match write.ty {
                        DescriptorType::StorageBuffer => &mut t.storage_buffers,
                        DescriptorType::AtomicCounterBuffer => &mut t.atomic_buffers,
                        _ => &mut t.uniform_buffers,
                    };
                    let value = BufferBinding {
                        id: buffer.id(),
                        raw: buffer.raw(),
                        offset: *offset,
                        range,
                    };
                    slot(table, binding as usize, Tracked::new(None)).update(Some(value), |_| {
                        gl.bind_buffer_range(target, binding, value.raw.gl_name(), value.offset, range)
                    });
                }
                DescriptorResource::ImageSampler { image, sampler } => {
                    let texture = slot(&mut t.textures, binding as usize, Tracked::new(None));
                    if texture.get() != Some(&Some(image.id())) {
                        t.active_texture_unit
                            .update(binding, |unit| gl.active_texture(*unit));
                        let raw = image.raw();
                        texture.update(Some(image.id()), |_| {
                            gl.bind_texture(raw.gl_target(), raw.gl_name())
                        });
                    }
                    let name = sampler.raw().gl_name();
                    slot(&mut t.samplers, binding as usize, Tracked::new(None))
                        .update(Some(sampler.id()), |_| gl.bind_sampler(binding, name));
                }
            }
        }
    }

    /// Points every attribute of the bound vertex input at its vertex buffer
    /// and runs the enable phase of the attribute bitfields.
    fn bind_vertex_attributes(&mut self, t: &mut Tracker) -> Result<()> {
        let Some(input) = t.vertex_input.clone() else {
            return Ok(());
        };

        let mut pointers = smallvec::SmallVec::<[(u32, AttributePointer, u32); 8]>::new();
        for attribute in &input.attributes {
            let Some(binding) = input.binding(attribute.binding) else {
                log::error!(
                    "attribute {} reads binding {}, which the vertex input does not declare",
                    attribute.location,
                    attribute.binding
                );
                return Err(GpuError::InvalidData);
            };
            let Some(buffer) = t.bound_vertex_buffer(attribute.binding) else {
                log::error!(
                    "attribute {} reads binding {}, which has no vertex buffer bound",
                    attribute.location,
                    attribute.binding
                );
                return Err(GpuError::NotInitialised);
            };
            if attribute.location >= self.caps.max_vertex_attributes.min(32) {
                return Err(GpuError::UnsupportedRequest);
            }
            let pointer = AttributePointer {
                buffer: buffer.id,
                format: attribute.format,
                stride: binding.stride,
                offset: buffer.offset + attribute.offset as u64,
                rate: binding.rate,
            };
            pointers.push((attribute.location, pointer, buffer.raw.gl_name()));
        }

        let gl = self.gl.as_mut();
        for (location, pointer, buffer_name) in pointers {
            let array_buffer = &mut t.array_buffer;
            slot(&mut t.attribute_pointers, location as usize, Tracked::unknown()).update(
                pointer,
                |p| {
                    array_buffer.update(Some(p.buffer), |_| gl.bind_buffer(ARRAY_BUFFER, buffer_name));
                    let (size, ty) = vertex_format(p.format);
                    if p.format.is_integer() {
                        gl.vertex_attrib_i_pointer(location, size, ty, p.stride as i32, p.offset);
                    } else {
                        gl.vertex_attrib_pointer(
                            location,
                            size,
                            ty,
                            p.format.is_normalized(),
                            p.stride as i32,
                            p.offset,
                        );
                    }
                    let divisor = match p.rate {
                        VertexRate::Vertex => 0,
                        VertexRate::Instance => 1,
                    };
                    gl.vertex_attrib_divisor(location, divisor);
                },
            );
            t.attributes
                .enable(location, |i| gl.enable_vertex_attrib_array(i));
        }
        Ok(())
    }

    fn finish_draw(&mut self, t: &mut Tracker) {
        let gl = self.gl.as_mut();
        t.attributes
            .disable_unneeded(|i| gl.disable_vertex_attrib_array(i));
    }

    fn fence_state(&mut self, fence: &Fence) -> Result<&mut FenceState> {
        self.fences
            .get_mut(&fence.raw().gl_name())
            .ok_or(GpuError::InvalidArgument)
    }
}

impl Backend for GlesBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Implicit
    }

    fn capabilities(&self) -> Capabilities {
        self.caps
    }

    fn create_buffer(&mut self, info: &BufferInfo) -> Result<NativeObject> {
        let gl = self.gl.as_mut();
        let name = gl.gen_buffer();
        gl.bind_buffer(COPY_WRITE_BUFFER, name);
        gl.buffer_data(
            COPY_WRITE_BUFFER,
            info.byte_size as usize,
            buffer_usage_hint(info.visibility),
        );
        if let Some(data) = info.initial_data {
            gl.buffer_sub_data(COPY_WRITE_BUFFER, 0, data);
        }
        self.check("create_buffer");

        Ok(NativeObject::Gl {
            name,
            target: buffer_target(info.usage),
        })
    }

    fn create_image(&mut self, t: &mut Tracker, info: &ImageInfo) -> Result<NativeObject> {
        let Some(internal) = internal_format(info.format) else {
            return Err(GpuError::InvalidData);
        };
        let target = texture_target(info.dim);
        let attachment = ImageUsage::COLOR_ATTACHMENT | ImageUsage::DEPTH_STENCIL_ATTACHMENT;
        if target == TEXTURE_3D && (info.format.is_depth() || info.usage.intersects(attachment)) {
            log::error!("image '{}': 3D images cannot be attachments", info.debug_name);
            return Err(GpuError::UnsupportedRequest);
        }

        let gl = self.gl.as_mut();
        let name = gl.gen_texture();
        gl.bind_texture(target, name);
        gl.tex_storage(target, info.mip_levels, internal, info.dim);
        if let Some(data) = info.initial_data {
            let (format, ty) = pixel_transfer(info.format);
            gl.tex_sub_image(target, 0, info.dim, format, ty, data);
        }

        // The upload replaced whatever the active unit had bound.
        match t.active_texture_unit.get().copied() {
            Some(unit) => {
                if let Some(texture) = t.textures.get_mut(unit as usize) {
                    texture.invalidate();
                }
            }
            None => t.textures.iter_mut().for_each(Tracked::invalidate),
        }
        self.check("create_image");

        Ok(NativeObject::Gl { name, target })
    }

    fn create_shader(&mut self, info: &ShaderInfo) -> Result<NativeObject> {
        let source = match info.code {
            ShaderCode::Glsl(source) => source,
            ShaderCode::Spirv(_) => {
                log::error!("shader '{}': SPIR-V cannot be loaded on GL ES", info.debug_name);
                return Err(GpuError::UnsupportedRequest);
            }
        };
        let supported = match info.stage {
            ShaderStage::Geometry => self.caps.geometry_shaders,
            ShaderStage::TessControl | ShaderStage::TessEvaluation => self.caps.tessellation,
            ShaderStage::Compute => self.caps.compute,
            ShaderStage::Vertex | ShaderStage::Fragment => self.caps.graphics,
        };
        if !supported {
            log::error!(
                "shader '{}': {:?} shaders are not supported by this context",
                info.debug_name,
                info.stage
            );
            return Err(GpuError::UnsupportedRequest);
        }

        let ty = shader_type(info.stage);
        let gl = self.gl.as_mut();
        let name = gl.create_shader(ty);
        gl.shader_source(name, source);
        let compiled = gl.compile_shader(name);
        if let Err(info_log) = compiled {
            log::error!("shader '{}' failed to compile:\n{}", info.debug_name, info_log);
            gl.delete_shader(name);
            self.check("create_shader");
            return Err(GpuError::InvalidData);
        }
        self.check("create_shader");

        Ok(NativeObject::Gl { name, target: ty })
    }

    fn create_sampler(&mut self, info: &SamplerInfo) -> Result<NativeObject> {
        let gl = self.gl.as_mut();
        let name = gl.gen_sampler();
        gl.sampler_parameter(name, TEXTURE_MIN_FILTER, filter(info.min_filter));
        gl.sampler_parameter(name, TEXTURE_MAG_FILTER, filter(info.mag_filter));
        let wrap = address_mode(info.address_mode);
        for pname in [TEXTURE_WRAP_S, TEXTURE_WRAP_T, TEXTURE_WRAP_R] {
            gl.sampler_parameter(name, pname, wrap);
        }
        self.check("create_sampler");
        Ok(NativeObject::Gl { name, target: 0 })
    }

    /// Render passes only exist as a description here; `begin_render_pass`
    /// reads their load ops.
    fn create_render_pass(&mut self, _info: &RenderPassInfo) -> Result<NativeObject> {
        Ok(NativeObject::Null)
    }

    fn create_framebuffer(&mut self, t: &mut Tracker, info: &FramebufferInfo) -> Result<NativeObject> {
        if info.color_attachments.is_empty() && info.depth_stencil_attachment.is_none() {
            // Name 0 is the window system's framebuffer.
            return Ok(NativeObject::Gl {
                name: 0,
                target: FRAMEBUFFER,
            });
        }

        let gl = self.gl.as_mut();
        let name = gl.gen_framebuffer();
        gl.bind_framebuffer(FRAMEBUFFER, name);
        t.framebuffer.invalidate();

        let mut draw_buffers = smallvec::SmallVec::<[GLenum; 8]>::new();
        for (i, image) in info.color_attachments.iter().enumerate() {
            let attachment = COLOR_ATTACHMENT0 + i as GLenum;
            let raw = image.raw();
            gl.framebuffer_texture_2d(FRAMEBUFFER, attachment, raw.gl_target(), raw.gl_name(), 0);
            draw_buffers.push(attachment);
        }
        if let Some(image) = info.depth_stencil_attachment {
            let attachment = if image.desc().format.has_stencil() {
                DEPTH_STENCIL_ATTACHMENT
            } else {
                DEPTH_ATTACHMENT
            };
            let raw = image.raw();
            gl.framebuffer_texture_2d(FRAMEBUFFER, attachment, raw.gl_target(), raw.gl_name(), 0);
        }
        gl.draw_buffers(&draw_buffers);

        let status = gl.check_framebuffer_status(FRAMEBUFFER);
        if status != FRAMEBUFFER_COMPLETE {
            log::error!(
                "framebuffer '{}' is incomplete (status {:#06x})",
                info.debug_name,
                status
            );
            gl.delete_framebuffer(name);
            self.check("create_framebuffer");
            return Err(GpuError::UnsupportedRequest);
        }
        self.check("create_framebuffer");

        Ok(NativeObject::Gl {
            name,
            target: FRAMEBUFFER,
        })
    }

    /// Bindings are addressed by binding index alone; the set number is
    /// ignored.
    fn create_pipeline_layout(&mut self, _info: &PipelineLayoutInfo) -> Result<NativeObject> {
        Ok(NativeObject::Null)
    }

    fn create_descriptor_set(&mut self, _info: &DescriptorSetInfo) -> Result<NativeObject> {
        Ok(NativeObject::Null)
    }

    fn create_fence(&mut self, signaled: bool) -> Result<NativeObject> {
        let name = self.next_fence;
        self.next_fence += 1;
        self.fences.insert(
            name,
            FenceState {
                sync: None,
                signaled,
            },
        );
        Ok(NativeObject::Gl { name, target: 0 })
    }

    /// Work on one GL context executes in submission order, so semaphores
    /// need no native object.
    fn create_semaphore(&mut self) -> Result<NativeObject> {
        Ok(NativeObject::Null)
    }

    fn link_program(&mut self, stages: &[Shader]) -> Result<NativeObject> {
        let gl = self.gl.as_mut();
        let program = gl.create_program();
        for shader in stages {
            gl.attach_shader(program, shader.raw().gl_name());
        }
        let linked = gl.link_program(program);
        if let Err(info_log) = linked {
            let names: Vec<&str> = stages.iter().map(|s| s.desc().debug_name.as_str()).collect();
            log::error!("program from {:?} failed to link:\n{}", names, info_log);
            gl.delete_program(program);
            self.check("link_program");
            return Err(GpuError::InvalidData);
        }
        self.check("link_program");

        Ok(NativeObject::Gl {
            name: program,
            target: 0,
        })
    }

    fn create_graphics_pipeline(&mut self, _pipeline: &GraphicsPipeline) -> Result<NativeObject> {
        Err(GpuError::UnsupportedRequest)
    }

    fn create_compute_pipeline(
        &mut self,
        _info: &ComputePipelineInfo,
        _program: &Program,
    ) -> Result<NativeObject> {
        Err(GpuError::UnsupportedRequest)
    }

    // Tracker entries are keyed by resource id, which is never reused, so a
    // stale entry for a deleted object can at worst cost one extra call.
    fn release(&mut self, _t: &mut Tracker, release: &PendingRelease) {
        let name = release.raw.gl_name();
        let gl = self.gl.as_mut();
        match release.kind {
            ResourceKind::Buffer => gl.delete_buffer(name),
            ResourceKind::Image => gl.delete_texture(name),
            ResourceKind::Shader => gl.delete_shader(name),
            ResourceKind::Program => gl.delete_program(name),
            ResourceKind::Sampler => gl.delete_sampler(name),
            ResourceKind::Framebuffer if name != 0 => gl.delete_framebuffer(name),
            ResourceKind::Fence => {
                if let Some(FenceState {
                    sync: Some(sync), ..
                }) = self.fences.remove(&name)
                {
                    gl.delete_sync(sync);
                }
            }
            _ => {}
        }
        self.check("release");
    }

    fn map_buffer(&mut self, buffer: &Buffer) -> Result<*mut u8> {
        let gl = self.gl.as_mut();
        gl.bind_buffer(COPY_WRITE_BUFFER, buffer.raw().gl_name());
        let ptr = gl.map_buffer_range(
            COPY_WRITE_BUFFER,
            0,
            buffer.desc().byte_size as usize,
            MAP_READ_BIT | MAP_WRITE_BIT,
        );
        self.check("map_buffer");
        if ptr.is_null() {
            Err(GpuError::UnknownError)
        } else {
            Ok(ptr)
        }
    }

    fn unmap_buffer(&mut self, buffer: &Buffer) -> Result<()> {
        let gl = self.gl.as_mut();
        gl.bind_buffer(COPY_WRITE_BUFFER, buffer.raw().gl_name());
        let intact = gl.unmap_buffer(COPY_WRITE_BUFFER);
        self.check("unmap_buffer");
        if intact {
            Ok(())
        } else {
            log::error!("contents of buffer '{}' were lost while mapped", buffer.desc().debug_name);
            Err(GpuError::UnknownError)
        }
    }

    #[track_caller]
    fn apply_fragment(&mut self, t: &mut Tracker, value: &FragmentValue) {
        apply_value(self.gl.as_mut(), &self.caps, t, value);
        self.check("apply_fragment");
    }

    fn bind_pipeline_object(
        &mut self,
        _t: &mut Tracker,
        _bind_point: PipelineBindPoint,
        _pipeline: &PipelineObject,
    ) -> Result<()> {
        Err(GpuError::UnsupportedRequest)
    }

    fn begin_submission(&mut self, _t: &mut Tracker) -> Result<()> {
        Ok(())
    }

    fn execute(&mut self, t: &mut Tracker, cmd: &Command) -> Result<()> {
        match cmd {
            Command::BindVertexBuffers {
                first_binding,
                buffers,
            } => {
                for (i, (buffer, offset)) in buffers.iter().enumerate() {
                    t.set_vertex_buffer(
                        first_binding + i as u32,
                        BufferBinding {
                            id: buffer.id(),
                            raw: buffer.raw(),
                            offset: *offset,
                            range: buffer.desc().byte_size.saturating_sub(*offset),
                        },
                    );
                }
            }
            Command::BindIndexBuffer {
                buffer,
                offset,
                index_type,
            } => {
                let gl = self.gl.as_mut();
                let bound = t.index_buffer.get().copied().flatten().map(|b| b.id);
                let name = buffer.raw().gl_name();
                t.index_buffer.update(
                    Some(IndexBinding {
                        id: buffer.id(),
                        raw: buffer.raw(),
                        offset: *offset,
                        index_type: *index_type,
                    }),
                    |_| {
                        if bound != Some(buffer.id()) {
                            gl.bind_buffer(ELEMENT_ARRAY_BUFFER, name);
                        }
                    },
                );
            }
            Command::BindDescriptorSets { sets, .. } => {
                for set in sets {
                    self.bind_descriptor_set(t, set);
                }
            }
            Command::Draw(args) => {
                self.bind_vertex_attributes(t)?;
                if args.first_instance != 0 {
                    log::warn!("first_instance {} ignored on GL ES", args.first_instance);
                }
                self.gl.draw_arrays_instanced(
                    primitive_mode(t.topology),
                    args.first_vertex as i32,
                    args.vertex_count as i32,
                    args.instance_count as i32,
                );
                self.finish_draw(t);
            }
            Command::DrawIndexed(args) => {
                let Some(index) = t.index_buffer.get().copied().flatten() else {
                    log::error!("indexed draw without an index buffer");
                    return Err(GpuError::NotInitialised);
                };
                self.bind_vertex_attributes(t)?;
                if args.first_instance != 0 {
                    log::warn!("first_instance {} ignored on GL ES", args.first_instance);
                }
                self.gl.draw_elements_instanced_base_vertex(
                    primitive_mode(t.topology),
                    args.index_count as i32,
                    index_type(index.index_type),
                    index.offset + args.first_index as u64 * index.index_type.size(),
                    args.instance_count as i32,
                    args.vertex_offset,
                );
                self.finish_draw(t);
            }
            Command::Dispatch(args) => self.gl.dispatch_compute(args.x, args.y, args.z),
            Command::BeginRenderPass(begin) => self.begin_render_pass(t, begin),
            Command::EndRenderPass => {}
            Command::ClearColorAttachment {
                attachment,
                color,
                area,
            } => self.clear_color(t, *attachment, *color, *area),
            Command::ClearDepthStencilAttachment {
                depth,
                stencil,
                area,
            } => self.clear_depth_stencil(t, *depth, *stencil, *area),
            Command::PipelineBarrier(barrier) => {
                let bits = if barrier.memory {
                    ALL_BARRIER_BITS
                } else if !barrier.images.is_empty() {
                    TEXTURE_FETCH_BARRIER_BIT
                        | SHADER_IMAGE_ACCESS_BARRIER_BIT
                        | FRAMEBUFFER_BARRIER_BIT
                } else {
                    0
                };
                if bits != 0 && self.caps.memory_barriers {
                    self.gl.memory_barrier(bits);
                }
            }
            Command::PushUniform {
                location, value, ..
            } => self.gl.uniform(*location as i32, value),
            Command::SetViewport(viewport) => {
                apply_value(self.gl.as_mut(), &self.caps, t, &FragmentValue::Viewport(*viewport));
                t.dirty.insert(FragmentKind::Viewport);
            }
            Command::SetScissor(rect) => {
                apply_value(self.gl.as_mut(), &self.caps, t, &FragmentValue::Scissor(*rect));
                t.dirty.insert(FragmentKind::Scissor);
            }
            Command::SetBlendConstants(color) => {
                let gl = self.gl.as_mut();
                t.blend_constants.update(*color, |c| gl.blend_color(*c));
            }
            Command::SetLineWidth(width) => {
                let gl = self.gl.as_mut();
                t.line_width.update(*width, |w| gl.line_width(*w));
            }
            Command::SetStencilReference { face, reference } => {
                for i in Tracker::stencil_faces(*face) {
                    let mut func = t.stencil_func[i].get().copied().unwrap_or_default();
                    func.reference = *reference;
                    apply_value(self.gl.as_mut(), &self.caps, t, &stencil_func_value(i, func));
                    t.dirty.insert(stencil_func_kind(i));
                }
            }
            Command::SetStencilCompareMask { face, mask } => {
                for i in Tracker::stencil_faces(*face) {
                    let mut func = t.stencil_func[i].get().copied().unwrap_or_default();
                    func.read_mask = *mask;
                    apply_value(self.gl.as_mut(), &self.caps, t, &stencil_func_value(i, func));
                    t.dirty.insert(stencil_func_kind(i));
                }
            }
            Command::SetStencilWriteMask { face, mask } => {
                let gl = self.gl.as_mut();
                for i in Tracker::stencil_faces(*face) {
                    t.stencil_write_mask[i]
                        .update(*mask, |m| gl.stencil_mask_separate(STENCIL_FACES[i], *m));
                    t.dirty.insert(stencil_write_mask_kind(i));
                }
            }
            Command::SetDepthBias {
                constant_factor,
                slope_factor,
                clamp,
            } => {
                if *clamp != 0.0 {
                    log::warn!("depth bias clamp {} ignored on GL ES", clamp);
                }
                let mut bias = t.depth_bias.get().copied().unwrap_or_default();
                bias.constant_factor = *constant_factor;
                bias.slope_factor = *slope_factor;
                bias.clamp = *clamp;
                apply_value(self.gl.as_mut(), &self.caps, t, &FragmentValue::DepthBias(bias));
                t.dirty.insert(FragmentKind::DepthBias);
            }
            Command::UpdateBuffer {
                buffer,
                offset,
                data,
            } => {
                let gl = self.gl.as_mut();
                gl.bind_buffer(COPY_WRITE_BUFFER, buffer.raw().gl_name());
                gl.buffer_sub_data(COPY_WRITE_BUFFER, *offset as usize, data);
            }
            Command::BindPipeline(_)
            | Command::BindComputePipeline(_)
            | Command::PushPipeline
            | Command::PopPipeline
            | Command::ResetPipeline
            | Command::ExecuteSecondary(_) => {
                log::warn!("{} reached the GL backend and was ignored", cmd.name());
            }
        }
        self.check(cmd.name());
        Ok(())
    }

    fn end_submission(&mut self, _t: &mut Tracker, submit: &SubmitInfo) -> Result<()> {
        if let Some(fence) = submit.fence {
            let sync = self.gl.fence_sync();
            let state = self.fences.entry(fence.raw().gl_name()).or_default();
            if let Some(previous) = state.sync.replace(sync) {
                self.gl.delete_sync(previous);
            }
            state.signaled = false;
        }
        self.gl.flush();
        self.check("end_submission");
        Ok(())
    }

    fn wait_fence(&mut self, fence: &Fence, timeout_ns: u64) -> Result<()> {
        let state = self.fence_state(fence)?;
        if state.signaled {
            return Ok(());
        }
        let Some(sync) = state.sync else {
            log::error!("waiting on a fence no submission will signal");
            return Err(GpuError::NotInitialised);
        };

        match self.gl.client_wait_sync(sync, timeout_ns) {
            ALREADY_SIGNALED | CONDITION_SATISFIED => {
                self.gl.delete_sync(sync);
                let state = self.fence_state(fence)?;
                state.sync = None;
                state.signaled = true;
                Ok(())
            }
            TIMEOUT_EXPIRED => {
                log::warn!("fence wait timed out after {} ns", timeout_ns);
                Err(GpuError::UnknownError)
            }
            status => {
                log::error!("fence wait failed with status {:#06x}", status);
                self.check("wait_fence");
                Err(GpuError::UnknownError)
            }
        }
    }

    fn fence_status(&mut self, fence: &Fence) -> Result<bool> {
        let state = self.fence_state(fence)?;
        if state.signaled {
            return Ok(true);
        }
        let Some(sync) = state.sync else {
            return Ok(false);
        };
        match self.gl.client_wait_sync(sync, 0) {
            ALREADY_SIGNALED | CONDITION_SATISFIED => {
                self.gl.delete_sync(sync);
                let state = self.fence_state(fence)?;
                state.sync = None;
                state.signaled = true;
                Ok(true)
            }
            WAIT_FAILED => Err(GpuError::UnknownError),
            _ => Ok(false),
        }
    }

    fn reset_fence(&mut self, fence: &Fence) -> Result<()> {
        let state = self.fence_state(fence)?;
        state.signaled = false;
        if let Some(sync) = state.sync.take() {
            self.gl.delete_sync(sync);
        }
        Ok(())
    }

    fn wait_idle(&mut self) -> Result<()> {
        self.gl.finish();
        for state in self.fences.values_mut() {
            if let Some(sync) = state.sync.take() {
                self.gl.delete_sync(sync);
                state.signaled = true;
            }
        }
        self.check("wait_idle");
        Ok(())
    }
}

fn stencil_func_kind(face: usize) -> FragmentKind {
    if face == 0 {
        FragmentKind::StencilFuncFront
    } else {
        FragmentKind::StencilFuncBack
    }
}

fn stencil_write_mask_kind(face: usize) -> FragmentKind {
    if face == 0 {
        FragmentKind::StencilWriteMaskFront
    } else {
        FragmentKind::StencilWriteMaskBack
    }
}

fn stencil_func_value(face: usize, func: super::pipeline::fragment::StencilFunc) -> FragmentValue {
    if face == 0 {
        FragmentValue::StencilFuncFront(func)
    } else {
        FragmentValue::StencilFuncBack(func)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::pipeline::fragment::DepthBias;

    fn backend() -> (GlesBackend, CallLog, Tracker) {
        let gles = NullGles::new();
        let log = gles.log();
        let backend = GlesBackend::new(Box::new(gles), &ContextInfo::default()).unwrap();
        (backend, log, Tracker::new())
    }

    #[test]
    fn fresh_defaults_issue_nothing() {
        let (mut gl, log, mut t) = backend();
        for kind in FragmentKind::ALL {
            if let Some(value) = FragmentValue::default_for(kind) {
                gl.apply_fragment(&mut t, &value);
            }
        }
        assert!(log.is_empty(), "{:?}", log.calls());
    }

    #[test]
    fn culling_enables_once() {
        let (mut gl, log, mut t) = backend();
        gl.apply_fragment(&mut t, &FragmentValue::PolygonCulling(CullMode::Back));
        gl.apply_fragment(&mut t, &FragmentValue::PolygonCulling(CullMode::Front));
        assert_eq!(log.count("enable"), 1);
        assert_eq!(log.count("cull_face"), 2);

        gl.apply_fragment(&mut t, &FragmentValue::PolygonCulling(CullMode::None));
        assert_eq!(log.named("disable")[0].arg(0), Some(CULL_FACE as f64));
    }

    #[test]
    fn depth_bias_toggles_offset_fill() {
        let (mut gl, log, mut t) = backend();
        let bias = DepthBias {
            enable: true,
            constant_factor: 2.0,
            slope_factor: 1.0,
            clamp: 0.0,
        };
        gl.apply_fragment(&mut t, &FragmentValue::DepthBias(bias));
        assert_eq!(log.named("enable")[0].arg(0), Some(POLYGON_OFFSET_FILL as f64));
        assert_eq!(log.named("polygon_offset")[0].args, vec![1.0, 2.0]);

        log.clear();
        gl.execute(
            &mut t,
            &Command::SetDepthBias {
                constant_factor: 4.0,
                slope_factor: 1.0,
                clamp: 0.0,
            },
        )
        .unwrap();
        assert_eq!(log.count("enable"), 0);
        assert_eq!(log.count("polygon_offset"), 1);
        assert!(t.dirty.contains(FragmentKind::DepthBias));
    }

    #[test]
    fn clear_restores_write_masks() {
        let (mut gl, log, mut t) = backend();
        gl.apply_fragment(&mut t, &FragmentValue::ColorWriteMask(ColorWriteMask::R));
        gl.apply_fragment(&mut t, &FragmentValue::Scissor(Rect2D { x: 0, y: 0, w: 8, h: 8 }));
        log.clear();

        let area = Rect2D { x: 0, y: 0, w: 4, h: 4 };
        gl.execute(
            &mut t,
            &Command::ClearColorAttachment {
                attachment: 0,
                color: [1.0; 4],
                area: Some(area),
            },
        )
        .unwrap();

        assert_eq!(log.count("clear_buffer_color"), 1);
        assert_eq!(log.count("color_mask"), 2);
        assert_eq!(log.count("scissor"), 2);
        assert_eq!(t.color_write_mask.get(), Some(&ColorWriteMask::R));
        assert_eq!(t.scissor_test.get(), Some(&false));
        assert_eq!(t.scissor.get().map(|r| r.w), Some(8));
        assert!(t.dirty.is_empty());
    }

    #[test]
    fn stencil_reference_keeps_compare_and_mask() {
        let (mut gl, log, mut t) = backend();
        gl.execute(
            &mut t,
            &Command::SetStencilReference {
                face: StencilFace::FRONT_AND_BACK,
                reference: 7,
            },
        )
        .unwrap();

        let calls = log.named("stencil_func_separate");
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].args, vec![FRONT as f64, ALWAYS as f64, 7.0, u32::MAX as f64]);
        assert_eq!(calls[1].arg(0), Some(BACK as f64));
        assert!(t.dirty.contains(FragmentKind::StencilFuncBack));
    }

    #[test]
    fn fences_need_a_submission() {
        let (mut gl, _log, mut t) = backend();
        let ctx = std::sync::Arc::new(ContextShared::new("fences"));
        let raw = gl.create_fence(false).unwrap();
        let fence: Fence = Resource::new(&ctx, raw, FenceDesc);

        assert_eq!(gl.wait_fence(&fence, 0), Err(GpuError::NotInitialised));
        assert_eq!(gl.fence_status(&fence), Ok(false));

        gl.end_submission(
            &mut t,
            &SubmitInfo {
                fence: Some(&fence),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(gl.wait_fence(&fence, 1_000), Ok(()));
        assert_eq!(gl.fence_status(&fence), Ok(true));

        gl.reset_fence(&fence).unwrap();
        assert_eq!(gl.fence_status(&fence), Ok(false));
    }
}
