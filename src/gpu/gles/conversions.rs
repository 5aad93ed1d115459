use super::api::*;
use crate::gpu::driver::types::*;

pub fn compare_op(op: CompareOp) -> GLenum {
    match op {
        CompareOp::Never => NEVER,
        CompareOp::Less => LESS,
        CompareOp::Equal => EQUAL,
        CompareOp::LessOrEqual => LEQUAL,
        CompareOp::Greater => GREATER,
        CompareOp::NotEqual => NOTEQUAL,
        CompareOp::GreaterOrEqual => GEQUAL,
        CompareOp::Always => ALWAYS,
    }
}

pub fn stencil_op(op: StencilOp) -> GLenum {
    match op {
        StencilOp::Keep => KEEP,
        StencilOp::Zero => ZERO,
        StencilOp::Replace => REPLACE,
        StencilOp::IncrementClamp => INCR,
        StencilOp::DecrementClamp => DECR,
        StencilOp::Invert => INVERT,
        StencilOp::IncrementWrap => INCR_WRAP,
        StencilOp::DecrementWrap => DECR_WRAP,
    }
}

pub fn blend_factor(factor: BlendFactor) -> GLenum {
    match factor {
        BlendFactor::Zero => ZERO,
        BlendFactor::One => ONE,
        BlendFactor::SrcColor => SRC_COLOR,
        BlendFactor::OneMinusSrcColor => ONE_MINUS_SRC_COLOR,
        BlendFactor::DstColor => DST_COLOR,
        BlendFactor::OneMinusDstColor => ONE_MINUS_DST_COLOR,
        BlendFactor::SrcAlpha => SRC_ALPHA,
        BlendFactor::OneMinusSrcAlpha => ONE_MINUS_SRC_ALPHA,
        BlendFactor::DstAlpha => DST_ALPHA,
        BlendFactor::OneMinusDstAlpha => ONE_MINUS_DST_ALPHA,
        BlendFactor::ConstantColor => CONSTANT_COLOR,
        BlendFactor::OneMinusConstantColor => ONE_MINUS_CONSTANT_COLOR,
        BlendFactor::ConstantAlpha => CONSTANT_ALPHA,
        BlendFactor::OneMinusConstantAlpha => ONE_MINUS_CONSTANT_ALPHA,
        BlendFactor::SrcAlphaSaturate => SRC_ALPHA_SATURATE,
    }
}

pub fn blend_op(op: BlendOp) -> GLenum {
    match op {
        BlendOp::Add => FUNC_ADD,
        BlendOp::Subtract => FUNC_SUBTRACT,
        BlendOp::ReverseSubtract => FUNC_REVERSE_SUBTRACT,
        BlendOp::Min => MIN,
        BlendOp::Max => MAX,
    }
}

/// `None` for [`CullMode::None`], which is expressed by disabling
/// `GL_CULL_FACE`.
pub fn cull_face(mode: CullMode) -> Option<GLenum> {
    match mode {
        CullMode::None => None,
        CullMode::Front => Some(FRONT),
        CullMode::Back => Some(BACK),
        CullMode::FrontAndBack => Some(FRONT_AND_BACK),
    }
}

pub fn front_face(face: FrontFace) -> GLenum {
    match face {
        FrontFace::CounterClockwise => CCW,
        FrontFace::Clockwise => CW,
    }
}

pub fn primitive_mode(topology: PrimitiveTopology) -> GLenum {
    match topology {
        PrimitiveTopology::PointList => POINTS,
        PrimitiveTopology::LineList => LINES,
        PrimitiveTopology::LineStrip => LINE_STRIP,
        PrimitiveTopology::TriangleList => TRIANGLES,
        PrimitiveTopology::TriangleStrip => TRIANGLE_STRIP,
        PrimitiveTopology::TriangleFan => TRIANGLE_FAN,
        PrimitiveTopology::PatchList => PATCHES,
    }
}

/// Component count and component type of a vertex attribute.
pub fn vertex_format(format: VertexFormat) -> (i32, GLenum) {
    let ty = match format {
        VertexFormat::UByte4Norm => UNSIGNED_BYTE,
        VertexFormat::Int => INT,
        VertexFormat::UInt => UNSIGNED_INT,
        _ => FLOAT,
    };
    (format.components() as i32, ty)
}

pub fn index_type(ty: IndexType) -> GLenum {
    match ty {
        IndexType::U16 => UNSIGNED_SHORT,
        IndexType::U32 => UNSIGNED_INT,
    }
}

pub fn shader_type(stage: ShaderStage) -> GLenum {
    match stage {
        ShaderStage::Vertex => VERTEX_SHADER,
        ShaderStage::Fragment => FRAGMENT_SHADER,
        ShaderStage::Geometry => GEOMETRY_SHADER,
        ShaderStage::TessControl => TESS_CONTROL_SHADER,
        ShaderStage::TessEvaluation => TESS_EVALUATION_SHADER,
        ShaderStage::Compute => COMPUTE_SHADER,
    }
}

/// Sized internal format used for immutable texture storage. `BGRA8Unorm`
/// is stored as RGBA8 and swizzled on upload.
pub fn internal_format(format: Format) -> Option<GLenum> {
    Some(match format {
        Format::Unknown => return None,
        Format::R8Unorm => R8,
        Format::RG8Unorm => RG8,
        Format::RGBA8Unorm | Format::BGRA8Unorm => RGBA8,
        Format::RGBA8Srgb => SRGB8_ALPHA8,
        Format::R32Float => R32F,
        Format::RGBA16Float => RGBA16F,
        Format::RGBA32Float => RGBA32F,
        Format::D16 => DEPTH_COMPONENT16,
        Format::D32Float => DEPTH_COMPONENT32F,
        Format::D24S8 => DEPTH24_STENCIL8,
    })
}

/// Client-side format and type for uploading pixels of `format`.
pub fn pixel_transfer(format: Format) -> (GLenum, GLenum) {
    match format {
        Format::Unknown | Format::RGBA8Unorm | Format::RGBA8Srgb => (RGBA, UNSIGNED_BYTE),
        Format::R8Unorm => (RED, UNSIGNED_BYTE),
        Format::RG8Unorm => (RG, UNSIGNED_BYTE),
        Format::BGRA8Unorm => (BGRA, UNSIGNED_BYTE),
        Format::R32Float => (RED, FLOAT),
        Format::RGBA16Float => (RGBA, HALF_FLOAT),
        Format::RGBA32Float => (RGBA, FLOAT),
        Format::D16 => (DEPTH_COMPONENT, UNSIGNED_SHORT),
        Format::D32Float => (DEPTH_COMPONENT, FLOAT),
        Format::D24S8 => (DEPTH_STENCIL, UNSIGNED_INT_24_8),
    }
}

pub fn texture_target(dim: [u32; 3]) -> GLenum {
    if dim[2] > 1 {
        TEXTURE_3D
    } else {
        TEXTURE_2D
    }
}

pub fn filter(filter: Filter) -> GLenum {
    match filter {
        Filter::Nearest => NEAREST,
        Filter::Linear => LINEAR,
    }
}

pub fn address_mode(mode: SamplerAddressMode) -> GLenum {
    match mode {
        SamplerAddressMode::Repeat => REPEAT,
        SamplerAddressMode::MirroredRepeat => MIRRORED_REPEAT,
        SamplerAddressMode::ClampToEdge => CLAMP_TO_EDGE,
    }
}

/// Bind target a buffer is remembered under. Uploads never use it; they go
/// through `GL_COPY_WRITE_BUFFER` so no tracked binding is disturbed.
pub fn buffer_target(usage: BufferUsage) -> GLenum {
    if usage.contains(BufferUsage::VERTEX) {
        ARRAY_BUFFER
    } else if usage.contains(BufferUsage::INDEX) {
        ELEMENT_ARRAY_BUFFER
    } else if usage.contains(BufferUsage::STORAGE) {
        SHADER_STORAGE_BUFFER
    } else if usage.contains(BufferUsage::ATOMIC_COUNTER) {
        ATOMIC_COUNTER_BUFFER
    } else if usage.contains(BufferUsage::INDIRECT) {
        DRAW_INDIRECT_BUFFER
    } else {
        UNIFORM_BUFFER
    }
}

pub fn buffer_usage_hint(visibility: MemoryVisibility) -> GLenum {
    match visibility {
        MemoryVisibility::Gpu => STATIC_DRAW,
        MemoryVisibility::CpuAndGpu => DYNAMIC_DRAW,
    }
}

pub fn descriptor_target(ty: DescriptorType) -> Option<GLenum> {
    match ty {
        DescriptorType::UniformBuffer => Some(UNIFORM_BUFFER),
        DescriptorType::StorageBuffer => Some(SHADER_STORAGE_BUFFER),
        DescriptorType::AtomicCounterBuffer => Some(ATOMIC_COUNTER_BUFFER),
        DescriptorType::CombinedImageSampler => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn culling_none_disables() {
        assert_eq!(cull_face(CullMode::None), None);
        assert_eq!(cull_face(CullMode::Back), Some(BACK));
    }

    #[test]
    fn integer_attributes_keep_their_type() {
        assert_eq!(vertex_format(VertexFormat::UInt), (1, UNSIGNED_INT));
        assert_eq!(vertex_format(VertexFormat::Vec3), (3, FLOAT));
        assert_eq!(vertex_format(VertexFormat::UByte4Norm), (4, UNSIGNED_BYTE));
    }

    #[test]
    fn unknown_format_has_no_storage() {
        assert!(internal_format(Format::Unknown).is_none());
        assert_eq!(internal_format(Format::D24S8), Some(DEPTH24_STENCIL8));
    }
}
