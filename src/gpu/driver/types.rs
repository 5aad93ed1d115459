//! Backend-neutral vocabulary shared by pipeline descriptions, the tracker
//! and both backend adapters.

use bitflags::bitflags;
use bytemuck::{Pod, Zeroable};

#[cfg(feature = "pipestate-serde")]
use serde::{Deserialize, Serialize};

#[cfg_attr(feature = "pipestate-serde", derive(Serialize, Deserialize))]
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Format {
    #[default]
    Unknown,
    R8Unorm,
    RG8Unorm,
    RGBA8Unorm,
    RGBA8Srgb,
    BGRA8Unorm,
    R32Float,
    RGBA16Float,
    RGBA32Float,
    D16,
    D32Float,
    D24S8,
}

impl Format {
    pub fn is_depth(&self) -> bool {
        matches!(self, Format::D16 | Format::D32Float | Format::D24S8)
    }

    pub fn has_stencil(&self) -> bool {
        matches!(self, Format::D24S8)
    }

    pub fn bytes_per_pixel(&self) -> u32 {
        match self {
            Format::Unknown => 0,
            Format::R8Unorm => 1,
            Format::RG8Unorm | Format::D16 => 2,
            Format::RGBA8Unorm
            | Format::RGBA8Srgb
            | Format::BGRA8Unorm
            | Format::R32Float
            | Format::D32Float
            | Format::D24S8 => 4,
            Format::RGBA16Float => 8,
            Format::RGBA32Float => 16,
        }
    }
}

#[cfg_attr(feature = "pipestate-serde", derive(Serialize, Deserialize))]
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Hash)]
pub enum IndexType {
    U16,
    #[default]
    U32,
}

impl IndexType {
    pub fn size(&self) -> u64 {
        match self {
            IndexType::U16 => 2,
            IndexType::U32 => 4,
        }
    }
}

/// Layout of a single vertex attribute as the shader consumes it.
#[cfg_attr(feature = "pipestate-serde", derive(Serialize, Deserialize))]
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Hash)]
pub enum VertexFormat {
    Float,
    Vec2,
    #[default]
    Vec3,
    Vec4,
    UByte4Norm,
    Int,
    UInt,
}

impl VertexFormat {
    pub fn components(&self) -> u32 {
        match self {
            VertexFormat::Float | VertexFormat::Int | VertexFormat::UInt => 1,
            VertexFormat::Vec2 => 2,
            VertexFormat::Vec3 => 3,
            VertexFormat::Vec4 | VertexFormat::UByte4Norm => 4,
        }
    }

    pub fn size(&self) -> u32 {
        match self {
            VertexFormat::UByte4Norm => 4,
            other => other.components() * 4,
        }
    }

    pub fn is_normalized(&self) -> bool {
        matches!(self, VertexFormat::UByte4Norm)
    }

    pub fn is_integer(&self) -> bool {
        matches!(self, VertexFormat::Int | VertexFormat::UInt)
    }
}

#[cfg_attr(feature = "pipestate-serde", derive(Serialize, Deserialize))]
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Hash)]
pub enum VertexRate {
    #[default]
    Vertex,
    Instance,
}

#[cfg_attr(feature = "pipestate-serde", derive(Serialize, Deserialize))]
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Hash)]
pub enum CompareOp {
    Never,
    #[default]
    Less,
    Equal,
    LessOrEqual,
    Greater,
    NotEqual,
    GreaterOrEqual,
    Always,
}

#[cfg_attr(feature = "pipestate-serde", derive(Serialize, Deserialize))]
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Hash)]
pub enum StencilOp {
    #[default]
    Keep,
    Zero,
    Replace,
    IncrementClamp,
    DecrementClamp,
    Invert,
    IncrementWrap,
    DecrementWrap,
}

#[cfg_attr(feature = "pipestate-serde", derive(Serialize, Deserialize))]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum BlendFactor {
    Zero,
    One,
    SrcColor,
    OneMinusSrcColor,
    DstColor,
    OneMinusDstColor,
    SrcAlpha,
    OneMinusSrcAlpha,
    DstAlpha,
    OneMinusDstAlpha,
    ConstantColor,
    OneMinusConstantColor,
    ConstantAlpha,
    OneMinusConstantAlpha,
    SrcAlphaSaturate,
}

#[cfg_attr(feature = "pipestate-serde", derive(Serialize, Deserialize))]
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Hash)]
pub enum BlendOp {
    #[default]
    Add,
    Subtract,
    ReverseSubtract,
    Min,
    Max,
}

#[cfg_attr(feature = "pipestate-serde", derive(Serialize, Deserialize))]
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Hash)]
pub enum CullMode {
    #[default]
    None,
    Front,
    Back,
    FrontAndBack,
}

#[cfg_attr(feature = "pipestate-serde", derive(Serialize, Deserialize))]
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Hash)]
pub enum FrontFace {
    #[default]
    CounterClockwise,
    Clockwise,
}

#[cfg_attr(feature = "pipestate-serde", derive(Serialize, Deserialize))]
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Hash)]
pub enum PrimitiveTopology {
    PointList,
    LineList,
    LineStrip,
    #[default]
    TriangleList,
    TriangleStrip,
    TriangleFan,
    PatchList,
}

bitflags! {
    #[cfg_attr(feature = "pipestate-serde", derive(Serialize, Deserialize))]
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ColorWriteMask: u8 {
        const R = 0x1;
        const G = 0x2;
        const B = 0x4;
        const A = 0x8;
        const RGBA = Self::R.bits() | Self::G.bits() | Self::B.bits() | Self::A.bits();
    }
}

impl Default for ColorWriteMask {
    fn default() -> Self {
        ColorWriteMask::RGBA
    }
}

#[cfg_attr(feature = "pipestate-serde", derive(Serialize, Deserialize))]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ShaderStage {
    Vertex,
    Fragment,
    Geometry,
    TessControl,
    TessEvaluation,
    Compute,
}

bitflags! {
    #[cfg_attr(feature = "pipestate-serde", derive(Serialize, Deserialize))]
    #[derive(Default, Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ShaderStageFlags: u32 {
        const VERTEX = 0x1;
        const FRAGMENT = 0x2;
        const GEOMETRY = 0x4;
        const TESS_CONTROL = 0x8;
        const TESS_EVALUATION = 0x10;
        const COMPUTE = 0x20;
        const ALL_GRAPHICS = 0x1f;
    }
}

impl From<ShaderStage> for ShaderStageFlags {
    fn from(stage: ShaderStage) -> Self {
        match stage {
            ShaderStage::Vertex => ShaderStageFlags::VERTEX,
            ShaderStage::Fragment => ShaderStageFlags::FRAGMENT,
            ShaderStage::Geometry => ShaderStageFlags::GEOMETRY,
            ShaderStage::TessControl => ShaderStageFlags::TESS_CONTROL,
            ShaderStage::TessEvaluation => ShaderStageFlags::TESS_EVALUATION,
            ShaderStage::Compute => ShaderStageFlags::COMPUTE,
        }
    }
}

bitflags! {
    #[cfg_attr(feature = "pipestate-serde", derive(Serialize, Deserialize))]
    #[derive(Default, Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct BufferUsage: u32 {
        const VERTEX = 0x1;
        const INDEX = 0x2;
        const UNIFORM = 0x4;
        const STORAGE = 0x8;
        const ATOMIC_COUNTER = 0x10;
        const INDIRECT = 0x20;
        const TRANSFER_SRC = 0x40;
        const TRANSFER_DST = 0x80;
    }
}

bitflags! {
    #[cfg_attr(feature = "pipestate-serde", derive(Serialize, Deserialize))]
    #[derive(Default, Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ImageUsage: u32 {
        const SAMPLED = 0x1;
        const STORAGE = 0x2;
        const COLOR_ATTACHMENT = 0x4;
        const DEPTH_STENCIL_ATTACHMENT = 0x8;
        const TRANSFER_SRC = 0x10;
        const TRANSFER_DST = 0x20;
    }
}

/// Where the client wants to read and write a resource from.
#[cfg_attr(feature = "pipestate-serde", derive(Serialize, Deserialize))]
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Hash)]
pub enum MemoryVisibility {
    #[default]
    Gpu,
    CpuAndGpu,
}

bitflags! {
    #[cfg_attr(feature = "pipestate-serde", derive(Serialize, Deserialize))]
    #[derive(Default, Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct StencilFace: u8 {
        const FRONT = 0x1;
        const BACK = 0x2;
        const FRONT_AND_BACK = 0x3;
    }
}

#[cfg_attr(feature = "pipestate-serde", derive(Serialize, Deserialize))]
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Filter {
    Nearest,
    #[default]
    Linear,
}

#[cfg_attr(feature = "pipestate-serde", derive(Serialize, Deserialize))]
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Hash)]
pub enum SamplerAddressMode {
    #[default]
    Repeat,
    MirroredRepeat,
    ClampToEdge,
}

#[cfg_attr(feature = "pipestate-serde", derive(Serialize, Deserialize))]
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Hash)]
pub enum LoadOp {
    Load,
    #[default]
    Clear,
    DontCare,
}

#[cfg_attr(feature = "pipestate-serde", derive(Serialize, Deserialize))]
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Hash)]
pub enum StoreOp {
    #[default]
    Store,
    DontCare,
}

#[cfg_attr(feature = "pipestate-serde", derive(Serialize, Deserialize))]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum DescriptorType {
    UniformBuffer,
    StorageBuffer,
    AtomicCounterBuffer,
    CombinedImageSampler,
}

#[cfg_attr(feature = "pipestate-serde", derive(Serialize, Deserialize))]
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Hash)]
pub struct Rect2D {
    pub x: i32,
    pub y: i32,
    pub w: u32,
    pub h: u32,
}

#[cfg_attr(feature = "pipestate-serde", derive(Serialize, Deserialize))]
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Viewport {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub min_depth: f32,
    pub max_depth: f32,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            width: 0.0,
            height: 0.0,
            min_depth: 0.0,
            max_depth: 1.0,
        }
    }
}

impl Viewport {
    pub fn from_extent(width: u32, height: u32) -> Self {
        Self {
            width: width as f32,
            height: height as f32,
            ..Default::default()
        }
    }
}

#[cfg_attr(feature = "pipestate-serde", derive(Serialize, Deserialize))]
#[derive(Debug, Copy, Clone, PartialEq)]
pub enum ClearValue {
    Color([f32; 4]),
    DepthStencil { depth: f32, stencil: u32 },
}

impl Default for ClearValue {
    fn default() -> Self {
        ClearValue::Color([0.0, 0.0, 0.0, 0.0])
    }
}

/// Value uploaded by a push-uniform command. The explicit backend writes the
/// raw bytes as push constants, the implicit backend issues the matching
/// `glUniform*` call.
#[cfg_attr(feature = "pipestate-serde", derive(Serialize, Deserialize))]
#[derive(Debug, Copy, Clone, PartialEq)]
pub enum UniformValue {
    Float(f32),
    Vec2([f32; 2]),
    Vec3([f32; 3]),
    Vec4([f32; 4]),
    Int(i32),
    UInt(u32),
    Mat4([f32; 16]),
}

impl UniformValue {
    pub fn bytes(&self) -> &[u8] {
        match self {
            UniformValue::Float(v) => bytemuck::bytes_of(v),
            UniformValue::Vec2(v) => bytemuck::cast_slice(&v[..]),
            UniformValue::Vec3(v) => bytemuck::cast_slice(&v[..]),
            UniformValue::Vec4(v) => bytemuck::cast_slice(&v[..]),
            UniformValue::Int(v) => bytemuck::bytes_of(v),
            UniformValue::UInt(v) => bytemuck::bytes_of(v),
            UniformValue::Mat4(v) => bytemuck::cast_slice(&v[..]),
        }
    }
}

/// Draw parameters, laid out so the explicit backend can hand them to an
/// indirect buffer unchanged.
#[repr(C)]
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Hash, Pod, Zeroable)]
pub struct DrawArgs {
    pub vertex_count: u32,
    pub instance_count: u32,
    pub first_vertex: u32,
    pub first_instance: u32,
}

#[repr(C)]
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Hash, Pod, Zeroable)]
pub struct DrawIndexedArgs {
    pub index_count: u32,
    pub instance_count: u32,
    pub first_index: u32,
    pub vertex_offset: i32,
    pub first_instance: u32,
}

#[repr(C)]
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Hash, Pod, Zeroable)]
pub struct DispatchArgs {
    pub x: u32,
    pub y: u32,
    pub z: u32,
}

/// What a context can do. Drawing without `graphics` or dispatching without
/// `compute` is a caller error.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Capabilities {
    pub graphics: bool,
    pub compute: bool,
    pub geometry_shaders: bool,
    pub tessellation: bool,
    pub memory_barriers: bool,
    pub max_vertex_attributes: u32,
    pub max_texture_units: u32,
    pub max_buffer_bindings: u32,
}

impl Default for Capabilities {
    fn default() -> Self {
        Self {
            graphics: true,
            compute: true,
            geometry_shaders: false,
            tessellation: false,
            memory_barriers: true,
            max_vertex_attributes: 16,
            max_texture_units: 16,
            max_buffer_bindings: 24,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uniform_bytes_cover_the_value() {
        assert_eq!(UniformValue::Float(1.0).bytes().len(), 4);
        assert_eq!(UniformValue::Vec3([0.0; 3]).bytes().len(), 12);
        assert_eq!(UniformValue::Mat4([0.0; 16]).bytes().len(), 64);
        assert_eq!(UniformValue::UInt(0xdead_beef).bytes(), &0xdead_beef_u32.to_ne_bytes());
    }

    #[test]
    fn vertex_formats_report_sizes() {
        assert_eq!(VertexFormat::Vec4.size(), 16);
        assert_eq!(VertexFormat::UByte4Norm.size(), 4);
        assert!(VertexFormat::UByte4Norm.is_normalized());
        assert!(VertexFormat::UInt.is_integer());
    }
}
