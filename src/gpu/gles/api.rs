//! The GL ES 3.x entry points the implicit backend calls.
//!
//! Everything the backend does to the native state machine goes through
//! [`GlesApi`], so the backend can be driven by a real driver
//! ([`super::LoadedGles`]) or by a recording device ([`super::NullGles`]).

use crate::gpu::driver::types::{Capabilities, UniformValue};

pub type GLenum = u32;

pub const NO_ERROR: GLenum = 0;
pub const INVALID_ENUM: GLenum = 0x0500;
pub const INVALID_VALUE: GLenum = 0x0501;
pub const INVALID_OPERATION: GLenum = 0x0502;
pub const OUT_OF_MEMORY: GLenum = 0x0505;
pub const INVALID_FRAMEBUFFER_OPERATION: GLenum = 0x0506;

// Capabilities toggled with glEnable / glDisable.
pub const CULL_FACE: GLenum = 0x0B44;
pub const DEPTH_TEST: GLenum = 0x0B71;
pub const STENCIL_TEST: GLenum = 0x0B90;
pub const BLEND: GLenum = 0x0BE2;
pub const SCISSOR_TEST: GLenum = 0x0C11;
pub const POLYGON_OFFSET_FILL: GLenum = 0x8037;

pub const NEVER: GLenum = 0x0200;
pub const LESS: GLenum = 0x0201;
pub const EQUAL: GLenum = 0x0202;
pub const LEQUAL: GLenum = 0x0203;
pub const GREATER: GLenum = 0x0204;
pub const NOTEQUAL: GLenum = 0x0205;
pub const GEQUAL: GLenum = 0x0206;
pub const ALWAYS: GLenum = 0x0207;

pub const ZERO: GLenum = 0;
pub const ONE: GLenum = 1;
pub const KEEP: GLenum = 0x1E00;
pub const REPLACE: GLenum = 0x1E01;
pub const INCR: GLenum = 0x1E02;
pub const DECR: GLenum = 0x1E03;
pub const INVERT: GLenum = 0x150A;
pub const INCR_WRAP: GLenum = 0x8507;
pub const DECR_WRAP: GLenum = 0x8508;

pub const FRONT: GLenum = 0x0404;
pub const BACK: GLenum = 0x0405;
pub const FRONT_AND_BACK: GLenum = 0x0408;
pub const CW: GLenum = 0x0900;
pub const CCW: GLenum = 0x0901;

pub const SRC_COLOR: GLenum = 0x0300;
pub const ONE_MINUS_SRC_COLOR: GLenum = 0x0301;
pub const SRC_ALPHA: GLenum = 0x0302;
pub const ONE_MINUS_SRC_ALPHA: GLenum = 0x0303;
pub const DST_ALPHA: GLenum = 0x0304;
pub const ONE_MINUS_DST_ALPHA: GLenum = 0x0305;
pub const DST_COLOR: GLenum = 0x0306;
pub const ONE_MINUS_DST_COLOR: GLenum = 0x0307;
pub const SRC_ALPHA_SATURATE: GLenum = 0x0308;
pub const CONSTANT_COLOR: GLenum = 0x8001;
pub const ONE_MINUS_CONSTANT_COLOR: GLenum = 0x8002;
pub const CONSTANT_ALPHA: GLenum = 0x8003;
pub const ONE_MINUS_CONSTANT_ALPHA: GLenum = 0x8004;

pub const FUNC_ADD: GLenum = 0x8006;
pub const MIN: GLenum = 0x8007;
pub const MAX: GLenum = 0x8008;
pub const FUNC_SUBTRACT: GLenum = 0x800A;
pub const FUNC_REVERSE_SUBTRACT: GLenum = 0x800B;

pub const POINTS: GLenum = 0x0000;
pub const LINES: GLenum = 0x0001;
pub const LINE_STRIP: GLenum = 0x0003;
pub const TRIANGLES: GLenum = 0x0004;
pub const TRIANGLE_STRIP: GLenum = 0x0005;
pub const TRIANGLE_FAN: GLenum = 0x0006;
pub const PATCHES: GLenum = 0x000E;

pub const UNSIGNED_BYTE: GLenum = 0x1401;
pub const UNSIGNED_SHORT: GLenum = 0x1403;
pub const INT: GLenum = 0x1404;
pub const UNSIGNED_INT: GLenum = 0x1405;
pub const FLOAT: GLenum = 0x1406;
pub const HALF_FLOAT: GLenum = 0x140B;
pub const UNSIGNED_INT_24_8: GLenum = 0x84FA;

pub const ARRAY_BUFFER: GLenum = 0x8892;
pub const ELEMENT_ARRAY_BUFFER: GLenum = 0x8893;
pub const UNIFORM_BUFFER: GLenum = 0x8A11;
pub const COPY_WRITE_BUFFER: GLenum = 0x8F37;
pub const DRAW_INDIRECT_BUFFER: GLenum = 0x8F3F;
pub const SHADER_STORAGE_BUFFER: GLenum = 0x90D2;
pub const ATOMIC_COUNTER_BUFFER: GLenum = 0x92C0;

pub const STATIC_DRAW: GLenum = 0x88E4;
pub const DYNAMIC_DRAW: GLenum = 0x88E8;

pub const MAP_READ_BIT: GLenum = 0x0001;
pub const MAP_WRITE_BIT: GLenum = 0x0002;

pub const TEXTURE_2D: GLenum = 0x0DE1;
pub const TEXTURE_3D: GLenum = 0x806F;
pub const TEXTURE_MAG_FILTER: GLenum = 0x2800;
pub const TEXTURE_MIN_FILTER: GLenum = 0x2801;
pub const TEXTURE_WRAP_S: GLenum = 0x2802;
pub const TEXTURE_WRAP_T: GLenum = 0x2803;
pub const TEXTURE_WRAP_R: GLenum = 0x8072;
pub const NEAREST: GLenum = 0x2600;
pub const LINEAR: GLenum = 0x2601;
pub const REPEAT: GLenum = 0x2901;
pub const MIRRORED_REPEAT: GLenum = 0x8370;
pub const CLAMP_TO_EDGE: GLenum = 0x812F;

pub const R8: GLenum = 0x8229;
pub const RG8: GLenum = 0x822B;
pub const RGBA8: GLenum = 0x8058;
pub const SRGB8_ALPHA8: GLenum = 0x8C43;
pub const R32F: GLenum = 0x822E;
pub const RGBA16F: GLenum = 0x881A;
pub const RGBA32F: GLenum = 0x8814;
pub const DEPTH_COMPONENT16: GLenum = 0x81A5;
pub const DEPTH_COMPONENT32F: GLenum = 0x8CAC;
pub const DEPTH24_STENCIL8: GLenum = 0x88F0;

pub const RED: GLenum = 0x1903;
pub const RG: GLenum = 0x8227;
pub const RGBA: GLenum = 0x1908;
pub const BGRA: GLenum = 0x80E1;
pub const DEPTH_COMPONENT: GLenum = 0x1902;
pub const DEPTH_STENCIL: GLenum = 0x84F9;

pub const FRAMEBUFFER: GLenum = 0x8D40;
pub const COLOR_ATTACHMENT0: GLenum = 0x8CE0;
pub const DEPTH_ATTACHMENT: GLenum = 0x8D00;
pub const DEPTH_STENCIL_ATTACHMENT: GLenum = 0x821A;
pub const FRAMEBUFFER_COMPLETE: GLenum = 0x8CD5;

/// Buffer selectors of `glClearBuffer*`.
pub const COLOR: GLenum = 0x1800;

pub const DEPTH_BUFFER_BIT: GLenum = 0x0100;
pub const STENCIL_BUFFER_BIT: GLenum = 0x0400;

pub const VERTEX_SHADER: GLenum = 0x8B31;
pub const FRAGMENT_SHADER: GLenum = 0x8B30;
pub const GEOMETRY_SHADER: GLenum = 0x8DD9;
pub const TESS_EVALUATION_SHADER: GLenum = 0x8E87;
pub const TESS_CONTROL_SHADER: GLenum = 0x8E88;
pub const COMPUTE_SHADER: GLenum = 0x91B9;

pub const TEXTURE_FETCH_BARRIER_BIT: GLenum = 0x0008;
pub const SHADER_IMAGE_ACCESS_BARRIER_BIT: GLenum = 0x0020;
pub const FRAMEBUFFER_BARRIER_BIT: GLenum = 0x0400;
pub const ALL_BARRIER_BITS: GLenum = 0xFFFF_FFFF;

pub const ALREADY_SIGNALED: GLenum = 0x911A;
pub const TIMEOUT_EXPIRED: GLenum = 0x911B;
pub const CONDITION_SATISFIED: GLenum = 0x911C;
pub const WAIT_FAILED: GLenum = 0x911D;

pub fn error_name(code: GLenum) -> &'static str {
    match code {
        NO_ERROR => "GL_NO_ERROR",
        INVALID_ENUM => "GL_INVALID_ENUM",
        INVALID_VALUE => "GL_INVALID_VALUE",
        INVALID_OPERATION => "GL_INVALID_OPERATION",
        OUT_OF_MEMORY => "GL_OUT_OF_MEMORY",
        INVALID_FRAMEBUFFER_OPERATION => "GL_INVALID_FRAMEBUFFER_OPERATION",
        _ => "unknown GL error",
    }
}

/// Native entry points of a GL ES 3.x context.
///
/// Methods mirror the GL function of the same name. Object names are plain
/// `u32`s and sync objects are carried as opaque `u64`s. Implementations
/// must be called from the thread that owns the native context.
pub trait GlesApi: Send {
    fn capabilities(&self) -> Capabilities;
    fn get_error(&mut self) -> GLenum;

    fn enable(&mut self, cap: GLenum);
    fn disable(&mut self, cap: GLenum);
    fn depth_mask(&mut self, write: bool);
    fn depth_func(&mut self, func: GLenum);
    fn polygon_offset(&mut self, factor: f32, units: f32);
    fn stencil_op_separate(&mut self, face: GLenum, fail: GLenum, depth_fail: GLenum, pass: GLenum);
    fn stencil_func_separate(&mut self, face: GLenum, func: GLenum, reference: i32, mask: u32);
    fn stencil_mask_separate(&mut self, face: GLenum, mask: u32);
    fn cull_face(&mut self, mode: GLenum);
    fn front_face(&mut self, mode: GLenum);
    fn blend_func_separate(
        &mut self,
        src_rgb: GLenum,
        dst_rgb: GLenum,
        src_alpha: GLenum,
        dst_alpha: GLenum,
    );
    fn blend_equation_separate(&mut self, rgb: GLenum, alpha: GLenum);
    fn blend_color(&mut self, color: [f32; 4]);
    fn color_mask(&mut self, r: bool, g: bool, b: bool, a: bool);
    fn viewport(&mut self, x: i32, y: i32, width: i32, height: i32);
    fn depth_range(&mut self, near: f32, far: f32);
    fn scissor(&mut self, x: i32, y: i32, width: i32, height: i32);
    fn line_width(&mut self, width: f32);
    fn patch_parameter(&mut self, vertices: i32);

    fn clear_buffer_color(&mut self, draw_buffer: i32, color: [f32; 4]);
    fn clear_depth(&mut self, depth: f32);
    fn clear_stencil(&mut self, stencil: i32);
    fn clear(&mut self, mask: GLenum);

    fn gen_buffer(&mut self) -> u32;
    fn delete_buffer(&mut self, name: u32);
    fn bind_buffer(&mut self, target: GLenum, name: u32);
    /// Allocates `size` bytes for the buffer bound to `target`.
    fn buffer_data(&mut self, target: GLenum, size: usize, usage: GLenum);
    fn buffer_sub_data(&mut self, target: GLenum, offset: usize, data: &[u8]);
    fn bind_buffer_range(&mut self, target: GLenum, index: u32, name: u32, offset: u64, size: u64);
    /// Maps part of the buffer bound to `target`. Null on failure.
    fn map_buffer_range(&mut self, target: GLenum, offset: usize, length: usize, access: GLenum)
        -> *mut u8;
    /// False if the buffer contents were lost while mapped.
    fn unmap_buffer(&mut self, target: GLenum) -> bool;

    fn gen_texture(&mut self) -> u32;
    fn delete_texture(&mut self, name: u32);
    /// Selects texture unit `unit` (not `GL_TEXTURE0 + unit`).
    fn active_texture(&mut self, unit: u32);
    fn bind_texture(&mut self, target: GLenum, name: u32);
    fn tex_storage(&mut self, target: GLenum, levels: u32, internal_format: GLenum, dim: [u32; 3]);
    fn tex_sub_image(
        &mut self,
        target: GLenum,
        level: u32,
        dim: [u32; 3],
        format: GLenum,
        ty: GLenum,
        data: &[u8],
    );

    fn gen_sampler(&mut self) -> u32;
    fn delete_sampler(&mut self, name: u32);
    fn bind_sampler(&mut self, unit: u32, name: u32);
    fn sampler_parameter(&mut self, name: u32, pname: GLenum, value: GLenum);

    fn gen_framebuffer(&mut self) -> u32;
    fn delete_framebuffer(&mut self, name: u32);
    fn bind_framebuffer(&mut self, target: GLenum, name: u32);
    fn framebuffer_texture_2d(
        &mut self,
        target: GLenum,
        attachment: GLenum,
        tex_target: GLenum,
        texture: u32,
        level: i32,
    );
    fn check_framebuffer_status(&mut self, target: GLenum) -> GLenum;
    fn draw_buffers(&mut self, buffers: &[GLenum]);

    fn create_shader(&mut self, ty: GLenum) -> u32;
    fn delete_shader(&mut self, name: u32);
    fn shader_source(&mut self, name: u32, source: &str);
    /// Returns the info log on failure.
    fn compile_shader(&mut self, name: u32) -> Result<(), String>;
    fn create_program(&mut self) -> u32;
    fn delete_program(&mut self, name: u32);
    fn attach_shader(&mut self, program: u32, shader: u32);
    /// Returns the info log on failure.
    fn link_program(&mut self, program: u32) -> Result<(), String>;
    fn use_program(&mut self, program: u32);
    fn uniform(&mut self, location: i32, value: &UniformValue);

    fn enable_vertex_attrib_array(&mut self, index: u32);
    fn disable_vertex_attrib_array(&mut self, index: u32);
    fn vertex_attrib_pointer(
        &mut self,
        index: u32,
        size: i32,
        ty: GLenum,
        normalized: bool,
        stride: i32,
        offset: u64,
    );
    fn vertex_attrib_i_pointer(&mut self, index: u32, size: i32, ty: GLenum, stride: i32, offset: u64);
    fn vertex_attrib_divisor(&mut self, index: u32, divisor: u32);

    fn draw_arrays_instanced(&mut self, mode: GLenum, first: i32, count: i32, instances: i32);
    fn draw_elements_instanced_base_vertex(
        &mut self,
        mode: GLenum,
        count: i32,
        ty: GLenum,
        offset: u64,
        instances: i32,
        base_vertex: i32,
    );
    fn dispatch_compute(&mut self, x: u32, y: u32, z: u32);
    fn memory_barrier(&mut self, barriers: GLenum);

    fn fence_sync(&mut self) -> u64;
    fn client_wait_sync(&mut self, sync: u64, timeout_ns: u64) -> GLenum;
    fn delete_sync(&mut self, sync: u64);
    fn flush(&mut self);
    fn finish(&mut self);
}
