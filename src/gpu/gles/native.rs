//! [`GlesApi`] over a real driver, using the `gl` crate's loaded function
//! pointers.

use std::ffi::c_void;

use gl::types::{GLboolean, GLchar, GLint, GLsizei, GLsync};

use super::api::*;
use crate::gpu::driver::types::{Capabilities, UniformValue};

fn boolean(value: bool) -> GLboolean {
    if value {
        gl::TRUE
    } else {
        gl::FALSE
    }
}

/// The driver of the native context current on this thread.
///
/// GL function pointers are process-global, so this type only carries what
/// was queried at load time plus the vertex array object every draw uses.
pub struct LoadedGles {
    caps: Capabilities,
    vertex_array: u32,
}

impl LoadedGles {
    /// Loads every entry point through `loader` (usually the windowing
    /// library's `get_proc_address`). The native context must be current.
    pub fn load(mut loader: impl FnMut(&str) -> *const c_void) -> Self {
        gl::load_with(|symbol| loader(symbol));

        let get = |pname| {
            let mut value: GLint = 0;
            // SAFETY: the context is current and `value` outlives the call.
            unsafe { gl::GetIntegerv(pname, &mut value) };
            value.max(0) as u32
        };

        let version = (get(gl::MAJOR_VERSION), get(gl::MINOR_VERSION));
        let caps = Capabilities {
            graphics: true,
            compute: version >= (4, 3),
            geometry_shaders: version >= (3, 2),
            tessellation: version >= (4, 0),
            memory_barriers: version >= (4, 2),
            max_vertex_attributes: get(gl::MAX_VERTEX_ATTRIBS).min(32),
            max_texture_units: get(gl::MAX_COMBINED_TEXTURE_IMAGE_UNITS),
            max_buffer_bindings: get(gl::MAX_UNIFORM_BUFFER_BINDINGS),
        };
        log::debug!("loaded GL {}.{}: {:?}", version.0, version.1, caps);

        let mut vertex_array = 0;
        // SAFETY: the context is current; the array stays bound for the
        // lifetime of this device.
        unsafe {
            gl::GenVertexArrays(1, &mut vertex_array);
            gl::BindVertexArray(vertex_array);
        }

        Self { caps, vertex_array }
    }

    fn info_log(
        name: u32,
        get_iv: unsafe fn(u32, u32, *mut GLint),
        get_log: unsafe fn(u32, GLsizei, *mut GLsizei, *mut GLchar),
    ) -> String {
        let mut len: GLint = 0;
        // SAFETY: `name` is a live shader or program and the buffer is sized
        // from the length the driver reported.
        unsafe {
            get_iv(name, gl::INFO_LOG_LENGTH, &mut len);
            let mut buf = vec![0u8; len.max(1) as usize];
            let mut written: GLsizei = 0;
            get_log(name, len, &mut written, buf.as_mut_ptr() as *mut GLchar);
            buf.truncate(written.max(0) as usize);
            String::from_utf8_lossy(&buf).into_owned()
        }
    }
}

impl Drop for LoadedGles {
    fn drop(&mut self) {
        // SAFETY: the array was created by `load` on this context.
        unsafe { gl::DeleteVertexArrays(1, &self.vertex_array) };
    }
}

// Every method forwards to the GL function of the same name. The caller
// keeps the native context current and passes names it created.
impl GlesApi for LoadedGles {
    fn capabilities(&self) -> Capabilities {
        self.caps
    }

    fn get_error(&mut self) -> GLenum {
        unsafe { gl::GetError() }
    }

    fn enable(&mut self, cap: GLenum) {
        unsafe { gl::Enable(cap) }
    }

    fn disable(&mut self, cap: GLenum) {
        unsafe { gl::Disable(cap) }
    }

    fn depth_mask(&mut self, write: bool) {
        unsafe { gl::DepthMask(boolean(write)) }
    }

    fn depth_func(&mut self, func: GLenum) {
        unsafe { gl::DepthFunc(func) }
    }

    fn polygon_offset(&mut self, factor: f32, units: f32) {
        unsafe { gl::PolygonOffset(factor, units) }
    }

    fn stencil_op_separate(&mut self, face: GLenum, fail: GLenum, depth_fail: GLenum, pass: GLenum) {
        unsafe { gl::StencilOpSeparate(face, fail, depth_fail, pass) }
    }

    fn stencil_func_separate(&mut self, face: GLenum, func: GLenum, reference: i32, mask: u32) {
        unsafe { gl::StencilFuncSeparate(face, func, reference, mask) }
    }

    fn stencil_mask_separate(&mut self, face: GLenum, mask: u32) {
        unsafe { gl::StencilMaskSeparate(face, mask) }
    }

    fn cull_face(&mut self, mode: GLenum) {
        unsafe { gl::CullFace(mode) }
    }

    fn front_face(&mut self, mode: GLenum) {
        unsafe { gl::FrontFace(mode) }
    }

    fn blend_func_separate(
        &mut self,
        src_rgb: GLenum,
        dst_rgb: GLenum,
        src_alpha: GLenum,
        dst_alpha: GLenum,
    ) {
        unsafe { gl::BlendFuncSeparate(src_rgb, dst_rgb, src_alpha, dst_alpha) }
    }

    fn blend_equation_separate(&mut self, rgb: GLenum, alpha: GLenum) {
        unsafe { gl::BlendEquationSeparate(rgb, alpha) }
    }

    fn blend_color(&mut self, color: [f32; 4]) {
        unsafe { gl::BlendColor(color[0], color[1], color[2], color[3]) }
    }

    fn color_mask(&mut self, r: bool, g: bool, b: bool, a: bool) {
        unsafe { gl::ColorMask(boolean(r), boolean(g), boolean(b), boolean(a)) }
    }

    fn viewport(&mut self, x: i32, y: i32, width: i32, height: i32) {
        unsafe { gl::Viewport(x, y, width, height) }
    }

    fn depth_range(&mut self, near: f32, far: f32) {
        unsafe { gl::DepthRangef(near, far) }
    }

    fn scissor(&mut self, x: i32, y: i32, width: i32, height: i32) {
        unsafe { gl::Scissor(x, y, width, height) }
    }

    fn line_width(&mut self, width: f32) {
        unsafe { gl::LineWidth(width) }
    }

    fn patch_parameter(&mut self, vertices: i32) {
        unsafe { gl::PatchParameteri(gl::PATCH_VERTICES, vertices) }
    }

    fn clear_buffer_color(&mut self, draw_buffer: i32, color: [f32; 4]) {
        unsafe { gl::ClearBufferfv(gl::COLOR, draw_buffer, color.as_ptr()) }
    }

    fn clear_depth(&mut self, depth: f32) {
        unsafe { gl::ClearDepthf(depth) }
    }

    fn clear_stencil(&mut self, stencil: i32) {
        unsafe { gl::ClearStencil(stencil) }
    }

    fn clear(&mut self, mask: GLenum) {
        unsafe { gl::Clear(mask) }
    }

    fn gen_buffer(&mut self) -> u32 {
        let mut name = 0;
        unsafe { gl::GenBuffers(1, &mut name) };
        name
    }

    fn delete_buffer(&mut self, name: u32) {
        unsafe { gl::DeleteBuffers(1, &name) }
    }

    fn bind_buffer(&mut self, target: GLenum, name: u32) {
        unsafe { gl::BindBuffer(target, name) }
    }

    fn buffer_data(&mut self, target: GLenum, size: usize, usage: GLenum) {
        unsafe { gl::BufferData(target, size as isize, std::ptr::null(), usage) }
    }

    fn buffer_sub_data(&mut self, target: GLenum, offset: usize, data: &[u8]) {
        unsafe {
            gl::BufferSubData(
                target,
                offset as isize,
                data.len() as isize,
                data.as_ptr() as *const c_void,
            )
        }
    }

    fn bind_buffer_range(&mut self, target: GLenum, index: u32, name: u32, offset: u64, size: u64) {
        unsafe { gl::BindBufferRange(target, index, name, offset as isize, size as isize) }
    }

    fn map_buffer_range(
        &mut self,
        target: GLenum,
        offset: usize,
        length: usize,
        access: GLenum,
    ) -> *mut u8 {
        unsafe { gl::MapBufferRange(target, offset as isize, length as isize, access) as *mut u8 }
    }

    fn unmap_buffer(&mut self, target: GLenum) -> bool {
        unsafe { gl::UnmapBuffer(target) == gl::TRUE }
    }

    fn gen_texture(&mut self) -> u32 {
        let mut name = 0;
        unsafe { gl::GenTextures(1, &mut name) };
        name
    }

    fn delete_texture(&mut self, name: u32) {
        unsafe { gl::DeleteTextures(1, &name) }
    }

    fn active_texture(&mut self, unit: u32) {
        unsafe { gl::ActiveTexture(gl::TEXTURE0 + unit) }
    }

    fn bind_texture(&mut self, target: GLenum, name: u32) {
        unsafe { gl::BindTexture(target, name) }
    }

    fn tex_storage(&mut self, target: GLenum, levels: u32, internal_format: GLenum, dim: [u32; 3]) {
        let [w, h, d] = dim.map(|v| v as GLsizei);
        unsafe {
            if target == gl::TEXTURE_3D {
                gl::TexStorage3D(target, levels as GLsizei, internal_format, w, h, d)
            } else {
                gl::TexStorage2D(target, levels as GLsizei, internal_format, w, h)
            }
        }
    }

    fn tex_sub_image(
        &mut self,
        target: GLenum,
        level: u32,
        dim: [u32; 3],
        format: GLenum,
        ty: GLenum,
        data: &[u8],
    ) {
        let [w, h, d] = dim.map(|v| v as GLsizei);
        let pixels = data.as_ptr() as *const c_void;
        unsafe {
            if target == gl::TEXTURE_3D {
                gl::TexSubImage3D(target, level as GLint, 0, 0, 0, w, h, d, format, ty, pixels)
            } else {
                gl::TexSubImage2D(target, level as GLint, 0, 0, w, h, format, ty, pixels)
            }
        }
    }

    fn gen_sampler(&mut self) -> u32 {
        let mut name = 0;
        unsafe { gl::GenSamplers(1, &mut name) };
        name
    }

    fn delete_sampler(&mut self, name: u32) {
        unsafe { gl::DeleteSamplers(1, &name) }
    }

    fn bind_sampler(&mut self, unit: u32, name: u32) {
        unsafe { gl::BindSampler(unit, name) }
    }

    fn sampler_parameter(&mut self, name: u32, pname: GLenum, value: GLenum) {
        unsafe { gl::SamplerParameteri(name, pname, value as GLint) }
    }

    fn gen_framebuffer(&mut self) -> u32 {
        let mut name = 0;
        unsafe { gl::GenFramebuffers(1, &mut name) };
        name
    }

    fn delete_framebuffer(&mut self, name: u32) {
        unsafe { gl::DeleteFramebuffers(1, &name) }
    }

    fn bind_framebuffer(&mut self, target: GLenum, name: u32) {
        unsafe { gl::BindFramebuffer(target, name) }
    }

    fn framebuffer_texture_2d(
        &mut self,
        target: GLenum,
        attachment: GLenum,
        tex_target: GLenum,
        texture: u32,
        level: i32,
    ) {
        unsafe { gl::FramebufferTexture2D(target, attachment, tex_target, texture, level) }
    }

    fn check_framebuffer_status(&mut self, target: GLenum) -> GLenum {
        unsafe { gl::CheckFramebufferStatus(target) }
    }

    fn draw_buffers(&mut self, buffers: &[GLenum]) {
        unsafe { gl::DrawBuffers(buffers.len() as GLsizei, buffers.as_ptr()) }
    }

    fn create_shader(&mut self, ty: GLenum) -> u32 {
        unsafe { gl::CreateShader(ty) }
    }

    fn delete_shader(&mut self, name: u32) {
        unsafe { gl::DeleteShader(name) }
    }

    fn shader_source(&mut self, name: u32, source: &str) {
        let ptr = source.as_ptr() as *const GLchar;
        let len = source.len() as GLint;
        unsafe { gl::ShaderSource(name, 1, &ptr, &len) }
    }

    fn compile_shader(&mut self, name: u32) -> Result<(), String> {
        let mut status: GLint = 0;
        unsafe {
            gl::CompileShader(name);
            gl::GetShaderiv(name, gl::COMPILE_STATUS, &mut status);
        }
        if status == gl::TRUE as GLint {
            Ok(())
        } else {
            Err(Self::info_log(
                name,
                gl::GetShaderiv,
                gl::GetShaderInfoLog,
            ))
        }
    }

    fn create_program(&mut self) -> u32 {
        unsafe { gl::CreateProgram() }
    }

    fn delete_program(&mut self, name: u32) {
        unsafe { gl::DeleteProgram(name) }
    }

    fn attach_shader(&mut self, program: u32, shader: u32) {
        unsafe { gl::AttachShader(program, shader) }
    }

    fn link_program(&mut self, program: u32) -> Result<(), String> {
        let mut status: GLint = 0;
        unsafe {
            gl::LinkProgram(program);
            gl::GetProgramiv(program, gl::LINK_STATUS, &mut status);
        }
        if status == gl::TRUE as GLint {
            Ok(())
        } else {
            Err(Self::info_log(
                program,
                gl::GetProgramiv,
                gl::GetProgramInfoLog,
            ))
        }
    }

    fn use_program(&mut self, program: u32) {
        unsafe { gl::UseProgram(program) }
    }

    fn uniform(&mut self, location: i32, value: &UniformValue) {
        unsafe {
            match value {
                UniformValue::Float(v) => gl::Uniform1f(location, *v),
                UniformValue::Vec2(v) => gl::Uniform2fv(location, 1, v.as_ptr()),
                UniformValue::Vec3(v) => gl::Uniform3fv(location, 1, v.as_ptr()),
                UniformValue::Vec4(v) => gl::Uniform4fv(location, 1, v.as_ptr()),
                UniformValue::Int(v) => gl::Uniform1i(location, *v),
                UniformValue::UInt(v) => gl::Uniform1ui(location, *v),
                UniformValue::Mat4(v) => gl::UniformMatrix4fv(location, 1, gl::FALSE, v.as_ptr()),
            }
        }
    }

    fn enable_vertex_attrib_array(&mut self, index: u32) {
        unsafe { gl::EnableVertexAttribArray(index) }
    }

    fn disable_vertex_attrib_array(&mut self, index: u32) {
        unsafe { gl::DisableVertexAttribArray(index) }
    }

    fn vertex_attrib_pointer(
        &mut self,
        index: u32,
        size: i32,
        ty: GLenum,
        normalized: bool,
        stride: i32,
        offset: u64,
    ) {
        unsafe {
            gl::VertexAttribPointer(
                index,
                size,
                ty,
                boolean(normalized),
                stride,
                offset as usize as *const c_void,
            )
        }
    }

    fn vertex_attrib_i_pointer(&mut self, index: u32, size: i32, ty: GLenum, stride: i32, offset: u64) {
        unsafe { gl::VertexAttribIPointer(index, size, ty, stride, offset as usize as *const c_void) }
    }

    fn vertex_attrib_divisor(&mut self, index: u32, divisor: u32) {
        unsafe { gl::VertexAttribDivisor(index, divisor) }
    }

    fn draw_arrays_instanced(&mut self, mode: GLenum, first: i32, count: i32, instances: i32) {
        unsafe { gl::DrawArraysInstanced(mode, first, count, instances) }
    }

    fn draw_elements_instanced_base_vertex(
        &mut self,
        mode: GLenum,
        count: i32,
        ty: GLenum,
        offset: u64,
        instances: i32,
        base_vertex: i32,
    ) {
        unsafe {
            gl::DrawElementsInstancedBaseVertex(
                mode,
                count,
                ty,
                offset as usize as *const c_void,
                instances,
                base_vertex,
            )
        }
    }

    fn dispatch_compute(&mut self, x: u32, y: u32, z: u32) {
        unsafe { gl::DispatchCompute(x, y, z) }
    }

    fn memory_barrier(&mut self, barriers: GLenum) {
        unsafe { gl::MemoryBarrier(barriers) }
    }

    fn fence_sync(&mut self) -> u64 {
        unsafe { gl::FenceSync(gl::SYNC_GPU_COMMANDS_COMPLETE, 0) as usize as u64 }
    }

    fn client_wait_sync(&mut self, sync: u64, timeout_ns: u64) -> GLenum {
        unsafe {
            gl::ClientWaitSync(
                sync as usize as GLsync,
                gl::SYNC_FLUSH_COMMANDS_BIT,
                timeout_ns,
            )
        }
    }

    fn delete_sync(&mut self, sync: u64) {
        unsafe { gl::DeleteSync(sync as usize as GLsync) }
    }

    fn flush(&mut self) {
        unsafe { gl::Flush() }
    }

    fn finish(&mut self) {
        unsafe { gl::Finish() }
    }
}
