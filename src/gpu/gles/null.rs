//! A GL device without a GPU.
//!
//! [`NullGles`] accepts every call, keeps just enough host state to make
//! buffer mapping and shader linking behave, and appends each call to a
//! shared [`CallLog`]. Tests hold on to the log and count native calls while
//! the device itself lives inside a context.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use super::api::*;
use crate::gpu::driver::types::{Capabilities, UniformValue};

/// One recorded native call. Integer and float arguments are both widened
/// to `f64`.
#[derive(Debug, Clone, PartialEq)]
pub struct GlCall {
    pub name: &'static str,
    pub args: Vec<f64>,
}

impl GlCall {
    pub fn arg(&self, index: usize) -> Option<f64> {
        self.args.get(index).copied()
    }
}

#[derive(Debug, Clone, Default)]
pub struct CallLog {
    calls: Arc<Mutex<Vec<GlCall>>>,
}

impl CallLog {
    fn lock(&self) -> MutexGuard<'_, Vec<GlCall>> {
        match self.calls.lock() {
            Ok(calls) => calls,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn push(&self, name: &'static str, args: &[f64]) {
        self.lock().push(GlCall {
            name,
            args: args.to_vec(),
        });
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    pub fn calls(&self) -> Vec<GlCall> {
        self.lock().clone()
    }

    /// How many calls of the GL function `name` were made.
    pub fn count(&self, name: &str) -> usize {
        self.lock().iter().filter(|c| c.name == name).count()
    }

    pub fn named(&self, name: &str) -> Vec<GlCall> {
        self.lock()
            .iter()
            .filter(|c| c.name == name)
            .cloned()
            .collect()
    }
}

pub struct NullGles {
    caps: Capabilities,
    log: CallLog,
    next_name: u32,
    next_sync: u64,
    bound_buffers: HashMap<GLenum, u32>,
    /// Buffer contents, kept in `u64` words so mapped views of any plain
    /// scalar type are aligned.
    buffers: HashMap<u32, Vec<u64>>,
    shaders: HashMap<u32, String>,
    programs: HashMap<u32, Vec<u32>>,
}

impl Default for NullGles {
    fn default() -> Self {
        Self::new()
    }
}

impl NullGles {
    pub fn new() -> Self {
        Self {
            caps: Capabilities::default(),
            log: CallLog::default(),
            next_name: 1,
            next_sync: 1,
            bound_buffers: HashMap::new(),
            buffers: HashMap::new(),
            shaders: HashMap::new(),
            programs: HashMap::new(),
        }
    }

    pub fn with_capabilities(mut self, caps: Capabilities) -> Self {
        self.caps = caps;
        self
    }

    /// A device that only draws.
    pub fn without_compute(self) -> Self {
        let caps = Capabilities {
            compute: false,
            memory_barriers: false,
            ..self.caps
        };
        self.with_capabilities(caps)
    }

    /// Handle to the call log. Stays readable after the device moved into a
    /// context.
    pub fn log(&self) -> CallLog {
        self.log.clone()
    }

    fn record(&self, name: &'static str, args: &[f64]) {
        self.log.push(name, args);
    }

    fn gen_name(&mut self) -> u32 {
        let name = self.next_name;
        self.next_name += 1;
        name
    }

    fn bound_storage(&mut self, target: GLenum) -> Option<&mut Vec<u64>> {
        let name = *self.bound_buffers.get(&target)?;
        self.buffers.get_mut(&name)
    }
}

fn flag(value: bool) -> f64 {
    if value {
        1.0
    } else {
        0.0
    }
}

impl GlesApi for NullGles {
    fn capabilities(&self) -> Capabilities {
        self.caps
    }

    fn get_error(&mut self) -> GLenum {
        NO_ERROR
    }

    fn enable(&mut self, cap: GLenum) {
        self.record("enable", &[cap as f64]);
    }

    fn disable(&mut self, cap: GLenum) {
        self.record("disable", &[cap as f64]);
    }

    fn depth_mask(&mut self, write: bool) {
        self.record("depth_mask", &[flag(write)]);
    }

    fn depth_func(&mut self, func: GLenum) {
        self.record("depth_func", &[func as f64]);
    }

    fn polygon_offset(&mut self, factor: f32, units: f32) {
        self.record("polygon_offset", &[factor as f64, units as f64]);
    }

    fn stencil_op_separate(&mut self, face: GLenum, fail: GLenum, depth_fail: GLenum, pass: GLenum) {
        self.record(
            "stencil_op_separate",
            &[face as f64, fail as f64, depth_fail as f64, pass as f64],
        );
    }

    fn stencil_func_separate(&mut self, face: GLenum, func: GLenum, reference: i32, mask: u32) {
        self.record(
            "stencil_func_separate",
            &[face as f64, func as f64, reference as f64, mask as f64],
        );
    }

    fn stencil_mask_separate(&mut self, face: GLenum, mask: u32) {
        self.record("stencil_mask_separate", &[face as f64, mask as f64]);
    }

    fn cull_face(&mut self, mode: GLenum) {
        self.record("cull_face", &[mode as f64]);
    }

    fn front_face(&mut self, mode: GLenum) {
        self.record("front_face", &[mode as f64]);
    }

    fn blend_func_separate(
        &mut self,
        src_rgb: GLenum,
        dst_rgb: GLenum,
        src_alpha: GLenum,
        dst_alpha: GLenum,
    ) {
        self.record(
            "blend_func_separate",
            &[src_rgb as f64, dst_rgb as f64, src_alpha as f64, dst_alpha as f64],
        );
    }

    fn blend_equation_separate(&mut self, rgb: GLenum, alpha: GLenum) {
        self.record("blend_equation_separate", &[rgb as f64, alpha as f64]);
    }

    fn blend_color(&mut self, color: [f32; 4]) {
        self.record("blend_color", &color.map(f64::from));
    }

    fn color_mask(&mut self, r: bool, g: bool, b: bool, a: bool) {
        self.record("color_mask", &[flag(r), flag(g), flag(b), flag(a)]);
    }

    fn viewport(&mut self, x: i32, y: i32, width: i32, height: i32) {
        self.record("viewport", &[x as f64, y as f64, width as f64, height as f64]);
    }

    fn depth_range(&mut self, near: f32, far: f32) {
        self.record("depth_range", &[near as f64, far as f64]);
    }

    fn scissor(&mut self, x: i32, y: i32, width: i32, height: i32) {
        self.record("scissor", &[x as f64, y as f64, width as f64, height as f64]);
    }

    fn line_width(&mut self, width: f32) {
        self.record("line_width", &[width as f64]);
    }

    fn patch_parameter(&mut self, vertices: i32) {
        self.record("patch_parameter", &[vertices as f64]);
    }

    fn clear_buffer_color(&mut self, draw_buffer: i32, color: [f32; 4]) {
        let [r, g, b, a] = color.map(f64::from);
        self.record("clear_buffer_color", &[draw_buffer as f64, r, g, b, a]);
    }

    fn clear_depth(&mut self, depth: f32) {
        self.record("clear_depth", &[depth as f64]);
    }

    fn clear_stencil(&mut self, stencil: i32) {
        self.record("clear_stencil", &[stencil as f64]);
    }

    fn clear(&mut self, mask: GLenum) {
        self.record("clear", &[mask as f64]);
    }

    fn gen_buffer(&mut self) -> u32 {
        let name = self.gen_name();
        self.buffers.insert(name, Vec::new());
        self.record("gen_buffer", &[name as f64]);
        name
    }

    fn delete_buffer(&mut self, name: u32) {
        self.buffers.remove(&name);
        self.bound_buffers.retain(|_, bound| *bound != name);
        self.record("delete_buffer", &[name as f64]);
    }

    fn bind_buffer(&mut self, target: GLenum, name: u32) {
        self.bound_buffers.insert(target, name);
        self.record("bind_buffer", &[target as f64, name as f64]);
    }

    fn buffer_data(&mut self, target: GLenum, size: usize, usage: GLenum) {
        if let Some(storage) = self.bound_storage(target) {
            *storage = vec![0u64; (size + 7) / 8];
        }
        self.record("buffer_data", &[target as f64, size as f64, usage as f64]);
    }

    fn buffer_sub_data(&mut self, target: GLenum, offset: usize, data: &[u8]) {
        if let Some(storage) = self.bound_storage(target) {
            let bytes: &mut [u8] = bytemuck::cast_slice_mut(storage.as_mut_slice());
            if let Some(dst) = bytes.get_mut(offset..offset + data.len()) {
                dst.copy_from_slice(data);
            }
        }
        self.record("buffer_sub_data", &[target as f64, offset as f64, data.len() as f64]);
    }

    fn bind_buffer_range(&mut self, target: GLenum, index: u32, name: u32, offset: u64, size: u64) {
        self.record(
            "bind_buffer_range",
            &[target as f64, index as f64, name as f64, offset as f64, size as f64],
        );
    }

    fn map_buffer_range(
        &mut self,
        target: GLenum,
        offset: usize,
        length: usize,
        access: GLenum,
    ) -> *mut u8 {
        self.record(
            "map_buffer_range",
            &[target as f64, offset as f64, length as f64, access as f64],
        );
        match self.bound_storage(target) {
            Some(storage) => {
                let bytes: &mut [u8] = bytemuck::cast_slice_mut(storage.as_mut_slice());
                match bytes.get_mut(offset..offset + length) {
                    Some(range) => range.as_mut_ptr(),
                    None => std::ptr::null_mut(),
                }
            }
            None => std::ptr::null_mut(),
        }
    }

    fn unmap_buffer(&mut self, target: GLenum) -> bool {
        self.record("unmap_buffer", &[target as f64]);
        true
    }

    fn gen_texture(&mut self) -> u32 {
        let name = self.gen_name();
        self.record("gen_texture", &[name as f64]);
        name
    }

    fn delete_texture(&mut self, name: u32) {
        self.record("delete_texture", &[name as f64]);
    }

    fn active_texture(&mut self, unit: u32) {
        self.record("active_texture", &[unit as f64]);
    }

    fn bind_texture(&mut self, target: GLenum, name: u32) {
        self.record("bind_texture", &[target as f64, name as f64]);
    }

    fn tex_storage(&mut self, target: GLenum, levels: u32, internal_format: GLenum, dim: [u32; 3]) {
        self.record(
            "tex_storage",
            &[
                target as f64,
                levels as f64,
                internal_format as f64,
                dim[0] as f64,
                dim[1] as f64,
                dim[2] as f64,
            ],
        );
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
        self.record(
            "tex_sub_image",
            &[
                target as f64,
                level as f64,
                dim[0] as f64,
                dim[1] as f64,
                dim[2] as f64,
                format as f64,
                ty as f64,
                data.len() as f64,
            ],
        );
    }

    fn gen_sampler(&mut self) -> u32 {
        let name = self.gen_name();
        self.record("gen_sampler", &[name as f64]);
        name
    }

    fn delete_sampler(&mut self, name: u32) {
        self.record("delete_sampler", &[name as f64]);
    }

    fn bind_sampler(&mut self, unit: u32, name: u32) {
        self.record("bind_sampler", &[unit as f64, name as f64]);
    }

    fn sampler_parameter(&mut self, name: u32, pname: GLenum, value: GLenum) {
        self.record("sampler_parameter", &[name as f64, pname as f64, value as f64]);
    }

    fn gen_framebuffer(&mut self) -> u32 {
        let name = self.gen_name();
        self.record("gen_framebuffer", &[name as f64]);
        name
    }

    fn delete_framebuffer(&mut self, name: u32) {
        self.record("delete_framebuffer", &[name as f64]);
    }

    fn bind_framebuffer(&mut self, target: GLenum, name: u32) {
        self.record("bind_framebuffer", &[target as f64, name as f64]);
    }

    fn framebuffer_texture_2d(
        &mut self,
        target: GLenum,
        attachment: GLenum,
        tex_target: GLenum,
        texture: u32,
        level: i32,
    ) {
        self.record(
            "framebuffer_texture_2d",
            &[
                target as f64,
                attachment as f64,
                tex_target as f64,
                texture as f64,
                level as f64,
            ],
        );
    }

    fn check_framebuffer_status(&mut self, target: GLenum) -> GLenum {
        self.record("check_framebuffer_status", &[target as f64]);
        FRAMEBUFFER_COMPLETE
    }

    fn draw_buffers(&mut self, buffers: &[GLenum]) {
        let args: Vec<f64> = buffers.iter().map(|b| *b as f64).collect();
        self.record("draw_buffers", &args);
    }

    fn create_shader(&mut self, ty: GLenum) -> u32 {
        let name = self.gen_name();
        self.shaders.insert(name, String::new());
        self.record("create_shader", &[ty as f64, name as f64]);
        name
    }

    fn delete_shader(&mut self, name: u32) {
        self.shaders.remove(&name);
        self.record("delete_shader", &[name as f64]);
    }

    fn shader_source(&mut self, name: u32, source: &str) {
        self.shaders.insert(name, source.to_string());
        self.record("shader_source", &[name as f64]);
    }

    /// Sources containing `#error` fail to compile.
    fn compile_shader(&mut self, name: u32) -> Result<(), String> {
        self.record("compile_shader", &[name as f64]);
        match self.shaders.get(&name) {
            Some(source) if source.contains("#error") => {
                Err(format!("0:1: '#error' : shader {} requested an error", name))
            }
            Some(_) => Ok(()),
            None => Err(format!("no shader named {}", name)),
        }
    }

    fn create_program(&mut self) -> u32 {
        let name = self.gen_name();
        self.programs.insert(name, Vec::new());
        self.record("create_program", &[name as f64]);
        name
    }

    fn delete_program(&mut self, name: u32) {
        self.programs.remove(&name);
        self.record("delete_program", &[name as f64]);
    }

    fn attach_shader(&mut self, program: u32, shader: u32) {
        if let Some(attached) = self.programs.get_mut(&program) {
            attached.push(shader);
        }
        self.record("attach_shader", &[program as f64, shader as f64]);
    }

    /// Programs with a stage mentioning `undefined_symbol` fail to link.
    fn link_program(&mut self, program: u32) -> Result<(), String> {
        self.record("link_program", &[program as f64]);
        let Some(attached) = self.programs.get(&program) else {
            return Err(format!("no program named {}", program));
        };
        let unresolved = attached.iter().any(|s| {
            self.shaders
                .get(s)
                .map_or(false, |src| src.contains("undefined_symbol"))
        });
        if unresolved {
            Err("error: undefined reference to `undefined_symbol`".to_string())
        } else {
            Ok(())
        }
    }

    fn use_program(&mut self, program: u32) {
        self.record("use_program", &[program as f64]);
    }

    fn uniform(&mut self, location: i32, value: &UniformValue) {
        let mut args = vec![location as f64];
        match value {
            UniformValue::Int(v) => args.push(*v as f64),
            UniformValue::UInt(v) => args.push(*v as f64),
            _ => args.extend(
                bytemuck::cast_slice::<u8, f32>(value.bytes())
                    .iter()
                    .map(|v| *v as f64),
            ),
        }
        self.record("uniform", &args);
    }

    fn enable_vertex_attrib_array(&mut self, index: u32) {
        self.record("enable_vertex_attrib_array", &[index as f64]);
    }

    fn disable_vertex_attrib_array(&mut self, index: u32) {
        self.record("disable_vertex_attrib_array", &[index as f64]);
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
        self.record(
            "vertex_attrib_pointer",
            &[
                index as f64,
                size as f64,
                ty as f64,
                flag(normalized),
                stride as f64,
                offset as f64,
            ],
        );
    }

    fn vertex_attrib_i_pointer(&mut self, index: u32, size: i32, ty: GLenum, stride: i32, offset: u64) {
        self.record(
            "vertex_attrib_i_pointer",
            &[index as f64, size as f64, ty as f64, stride as f64, offset as f64],
        );
    }

    fn vertex_attrib_divisor(&mut self, index: u32, divisor: u32) {
        self.record("vertex_attrib_divisor", &[index as f64, divisor as f64]);
    }

    fn draw_arrays_instanced(&mut self, mode: GLenum, first: i32, count: i32, instances: i32) {
        self.record(
            "draw_arrays_instanced",
            &[mode as f64, first as f64, count as f64, instances as f64],
        );
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
        self.record(
            "draw_elements_instanced_base_vertex",
            &[
                mode as f64,
                count as f64,
                ty as f64,
                offset as f64,
                instances as f64,
                base_vertex as f64,
            ],
        );
    }

    fn dispatch_compute(&mut self, x: u32, y: u32, z: u32) {
        self.record("dispatch_compute", &[x as f64, y as f64, z as f64]);
    }

    fn memory_barrier(&mut self, barriers: GLenum) {
        self.record("memory_barrier", &[barriers as f64]);
    }

    fn fence_sync(&mut self) -> u64 {
        let sync = self.next_sync;
        self.next_sync += 1;
        self.record("fence_sync", &[sync as f64]);
        sync
    }

    /// Work on the null device completes immediately.
    fn client_wait_sync(&mut self, sync: u64, timeout_ns: u64) -> GLenum {
        self.record("client_wait_sync", &[sync as f64, timeout_ns as f64]);
        ALREADY_SIGNALED
    }

    fn delete_sync(&mut self, sync: u64) {
        self.record("delete_sync", &[sync as f64]);
    }

    fn flush(&mut self) {
        self.record("flush", &[]);
    }

    fn finish(&mut self) {
        self.record("finish", &[]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_outlives_moves() {
        let mut gles = NullGles::new();
        let log = gles.log();
        gles.enable(DEPTH_TEST);

        let mut boxed: Box<dyn GlesApi> = Box::new(gles);
        boxed.disable(DEPTH_TEST);
        boxed.get_error();

        assert_eq!(log.len(), 2);
        assert_eq!(log.count("enable"), 1);
        assert_eq!(log.named("disable")[0].arg(0), Some(DEPTH_TEST as f64));
    }

    #[test]
    fn mapped_storage_holds_uploads() {
        let mut gles = NullGles::new();
        let name = gles.gen_buffer();
        gles.bind_buffer(COPY_WRITE_BUFFER, name);
        gles.buffer_data(COPY_WRITE_BUFFER, 12, DYNAMIC_DRAW);
        gles.buffer_sub_data(COPY_WRITE_BUFFER, 4, &[1, 2, 3, 4]);

        let ptr = gles.map_buffer_range(COPY_WRITE_BUFFER, 0, 12, MAP_READ_BIT);
        assert!(!ptr.is_null());
        assert_eq!(ptr as usize % 8, 0);
        // SAFETY: the range was just mapped from 12 bytes of shadow storage.
        let bytes = unsafe { std::slice::from_raw_parts(ptr, 12) };
        assert_eq!(&bytes[4..8], &[1, 2, 3, 4]);

        assert!(gles
            .map_buffer_range(COPY_WRITE_BUFFER, 8, 16, MAP_READ_BIT)
            .is_null());
    }

    #[test]
    fn compile_and_link_failures_are_reported() {
        let mut gles = NullGles::new();
        let bad = gles.create_shader(VERTEX_SHADER);
        gles.shader_source(bad, "#error nope");
        assert!(gles.compile_shader(bad).is_err());

        let vs = gles.create_shader(VERTEX_SHADER);
        gles.shader_source(vs, "void main() { undefined_symbol(); }");
        assert!(gles.compile_shader(vs).is_ok());
        let program = gles.create_program();
        gles.attach_shader(program, vs);
        assert!(gles.link_program(program).is_err());
    }
}
