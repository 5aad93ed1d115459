use ash::vk;

use crate::gpu::driver::types::*;
use crate::gpu::resource::PipelineBindPoint;

pub fn format(format: Format) -> vk::Format {
    match format {
        Format::Unknown => vk::Format::UNDEFINED,
        Format::R8Unorm => vk::Format::R8_UNORM,
        Format::RG8Unorm => vk::Format::R8G8_UNORM,
        Format::RGBA8Unorm => vk::Format::R8G8B8A8_UNORM,
        Format::RGBA8Srgb => vk::Format::R8G8B8A8_SRGB,
        Format::BGRA8Unorm => vk::Format::B8G8R8A8_UNORM,
        Format::R32Float => vk::Format::R32_SFLOAT,
        Format::RGBA16Float => vk::Format::R16G16B16A16_SFLOAT,
        Format::RGBA32Float => vk::Format::R32G32B32A32_SFLOAT,
        Format::D16 => vk::Format::D16_UNORM,
        Format::D32Float => vk::Format::D32_SFLOAT,
        Format::D24S8 => vk::Format::D24_UNORM_S8_UINT,
    }
}

pub fn aspect_mask(format: Format) -> vk::ImageAspectFlags {
    if format.has_stencil() {
        vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
    } else if format.is_depth() {
        vk::ImageAspectFlags::DEPTH
    } else {
        vk::ImageAspectFlags::COLOR
    }
}

pub fn vertex_format(format: VertexFormat) -> vk::Format {
    match format {
        VertexFormat::Float => vk::Format::R32_SFLOAT,
        VertexFormat::Vec2 => vk::Format::R32G32_SFLOAT,
        VertexFormat::Vec3 => vk::Format::R32G32B32_SFLOAT,
        VertexFormat::Vec4 => vk::Format::R32G32B32A32_SFLOAT,
        VertexFormat::UByte4Norm => vk::Format::R8G8B8A8_UNORM,
        VertexFormat::Int => vk::Format::R32_SINT,
        VertexFormat::UInt => vk::Format::R32_UINT,
    }
}

pub fn vertex_rate(rate: VertexRate) -> vk::VertexInputRate {
    match rate {
        VertexRate::Vertex => vk::VertexInputRate::VERTEX,
        VertexRate::Instance => vk::VertexInputRate::INSTANCE,
    }
}

/// Every buffer can be the target of a staging copy or an inline update.
pub fn buffer_usage(usage: BufferUsage) -> vk::BufferUsageFlags {
    let mut flags = vk::BufferUsageFlags::TRANSFER_DST;
    if usage.contains(BufferUsage::VERTEX) {
        flags |= vk::BufferUsageFlags::VERTEX_BUFFER;
    }
    if usage.contains(BufferUsage::INDEX) {
        flags |= vk::BufferUsageFlags::INDEX_BUFFER;
    }
    if usage.contains(BufferUsage::UNIFORM) {
        flags |= vk::BufferUsageFlags::UNIFORM_BUFFER;
    }
    if usage.intersects(BufferUsage::STORAGE | BufferUsage::ATOMIC_COUNTER) {
        flags |= vk::BufferUsageFlags::STORAGE_BUFFER;
    }
    if usage.contains(BufferUsage::INDIRECT) {
        flags |= vk::BufferUsageFlags::INDIRECT_BUFFER;
    }
    if usage.contains(BufferUsage::TRANSFER_SRC) {
        flags |= vk::BufferUsageFlags::TRANSFER_SRC;
    }
    flags
}

pub fn image_usage(usage: ImageUsage) -> vk::ImageUsageFlags {
    let mut flags = vk::ImageUsageFlags::empty();
    if usage.contains(ImageUsage::SAMPLED) {
        flags |= vk::ImageUsageFlags::SAMPLED;
    }
    if usage.contains(ImageUsage::STORAGE) {
        flags |= vk::ImageUsageFlags::STORAGE;
    }
    if usage.contains(ImageUsage::COLOR_ATTACHMENT) {
        flags |= vk::ImageUsageFlags::COLOR_ATTACHMENT;
    }
    if usage.contains(ImageUsage::DEPTH_STENCIL_ATTACHMENT) {
        flags |= vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT;
    }
    if usage.contains(ImageUsage::TRANSFER_SRC) {
        flags |= vk::ImageUsageFlags::TRANSFER_SRC;
    }
    if usage.contains(ImageUsage::TRANSFER_DST) {
        flags |= vk::ImageUsageFlags::TRANSFER_DST;
    }
    flags
}

pub fn shader_stage(stage: ShaderStage) -> vk::ShaderStageFlags {
    match stage {
        ShaderStage::Vertex => vk::ShaderStageFlags::VERTEX,
        ShaderStage::Fragment => vk::ShaderStageFlags::FRAGMENT,
        ShaderStage::Geometry => vk::ShaderStageFlags::GEOMETRY,
        ShaderStage::TessControl => vk::ShaderStageFlags::TESSELLATION_CONTROL,
        ShaderStage::TessEvaluation => vk::ShaderStageFlags::TESSELLATION_EVALUATION,
        ShaderStage::Compute => vk::ShaderStageFlags::COMPUTE,
    }
}

pub fn shader_stage_flags(stages: ShaderStageFlags) -> vk::ShaderStageFlags {
    const PAIRS: [(ShaderStageFlags, vk::ShaderStageFlags); 6] = [
        (ShaderStageFlags::VERTEX, vk::ShaderStageFlags::VERTEX),
        (ShaderStageFlags::FRAGMENT, vk::ShaderStageFlags::FRAGMENT),
        (ShaderStageFlags::GEOMETRY, vk::ShaderStageFlags::GEOMETRY),
        (
            ShaderStageFlags::TESS_CONTROL,
            vk::ShaderStageFlags::TESSELLATION_CONTROL,
        ),
        (
            ShaderStageFlags::TESS_EVALUATION,
            vk::ShaderStageFlags::TESSELLATION_EVALUATION,
        ),
        (ShaderStageFlags::COMPUTE, vk::ShaderStageFlags::COMPUTE),
    ];

    PAIRS
        .iter()
        .filter(|(ours, _)| stages.contains(*ours))
        .fold(vk::ShaderStageFlags::empty(), |acc, (_, theirs)| acc | *theirs)
}

pub fn compare_op(op: CompareOp) -> vk::CompareOp {
    match op {
        CompareOp::Never => vk::CompareOp::NEVER,
        CompareOp::Less => vk::CompareOp::LESS,
        CompareOp::Equal => vk::CompareOp::EQUAL,
        CompareOp::LessOrEqual => vk::CompareOp::LESS_OR_EQUAL,
        CompareOp::Greater => vk::CompareOp::GREATER,
        CompareOp::NotEqual => vk::CompareOp::NOT_EQUAL,
        CompareOp::GreaterOrEqual => vk::CompareOp::GREATER_OR_EQUAL,
        CompareOp::Always => vk::CompareOp::ALWAYS,
    }
}

pub fn stencil_op(op: StencilOp) -> vk::StencilOp {
    match op {
        StencilOp::Keep => vk::StencilOp::KEEP,
        StencilOp::Zero => vk::StencilOp::ZERO,
        StencilOp::Replace => vk::StencilOp::REPLACE,
        StencilOp::IncrementClamp => vk::StencilOp::INCREMENT_AND_CLAMP,
        StencilOp::DecrementClamp => vk::StencilOp::DECREMENT_AND_CLAMP,
        StencilOp::Invert => vk::StencilOp::INVERT,
        StencilOp::IncrementWrap => vk::StencilOp::INCREMENT_AND_WRAP,
        StencilOp::DecrementWrap => vk::StencilOp::DECREMENT_AND_WRAP,
    }
}

pub fn blend_factor(factor: BlendFactor) -> vk::BlendFactor {
    match factor {
        BlendFactor::Zero => vk::BlendFactor::ZERO,
        BlendFactor::One => vk::BlendFactor::ONE,
        BlendFactor::SrcColor => vk::BlendFactor::SRC_COLOR,
        BlendFactor::OneMinusSrcColor => vk::BlendFactor::ONE_MINUS_SRC_COLOR,
        BlendFactor::DstColor => vk::BlendFactor::DST_COLOR,
        BlendFactor::OneMinusDstColor => vk::BlendFactor::ONE_MINUS_DST_COLOR,
        BlendFactor::SrcAlpha => vk::BlendFactor::SRC_ALPHA,
        BlendFactor::OneMinusSrcAlpha => vk::BlendFactor::ONE_MINUS_SRC_ALPHA,
        BlendFactor::DstAlpha => vk::BlendFactor::DST_ALPHA,
        BlendFactor::OneMinusDstAlpha => vk::BlendFactor::ONE_MINUS_DST_ALPHA,
        BlendFactor::ConstantColor => vk::BlendFactor::CONSTANT_COLOR,
        BlendFactor::OneMinusConstantColor => vk::BlendFactor::ONE_MINUS_CONSTANT_COLOR,
        BlendFactor::ConstantAlpha => vk::BlendFactor::CONSTANT_ALPHA,
        BlendFactor::OneMinusConstantAlpha => vk::BlendFactor::ONE_MINUS_CONSTANT_ALPHA,
        BlendFactor::SrcAlphaSaturate => vk::BlendFactor::SRC_ALPHA_SATURATE,
    }
}

pub fn blend_op(op: BlendOp) -> vk::BlendOp {
    match op {
        BlendOp::Add => vk::BlendOp::ADD,
        BlendOp::Subtract => vk::BlendOp::SUBTRACT,
        BlendOp::ReverseSubtract => vk::BlendOp::REVERSE_SUBTRACT,
        BlendOp::Min => vk::BlendOp::MIN,
        BlendOp::Max => vk::BlendOp::MAX,
    }
}

pub fn color_write_mask(mask: ColorWriteMask) -> vk::ColorComponentFlags {
    let mut flags = vk::ColorComponentFlags::empty();
    if mask.contains(ColorWriteMask::R) {
        flags |= vk::ColorComponentFlags::R;
    }
    if mask.contains(ColorWriteMask::G) {
        flags |= vk::ColorComponentFlags::G;
    }
    if mask.contains(ColorWriteMask::B) {
        flags |= vk::ColorComponentFlags::B;
    }
    if mask.contains(ColorWriteMask::A) {
        flags |= vk::ColorComponentFlags::A;
    }
    flags
}

pub fn cull_mode(mode: CullMode) -> vk::CullModeFlags {
    match mode {
        CullMode::None => vk::CullModeFlags::NONE,
        CullMode::Front => vk::CullModeFlags::FRONT,
        CullMode::Back => vk::CullModeFlags::BACK,
        CullMode::FrontAndBack => vk::CullModeFlags::FRONT_AND_BACK,
    }
}

pub fn front_face(face: FrontFace) -> vk::FrontFace {
    match face {
        FrontFace::CounterClockwise => vk::FrontFace::COUNTER_CLOCKWISE,
        FrontFace::Clockwise => vk::FrontFace::CLOCKWISE,
    }
}

pub fn topology(topology: PrimitiveTopology) -> vk::PrimitiveTopology {
    match topology {
        PrimitiveTopology::PointList => vk::PrimitiveTopology::POINT_LIST,
        PrimitiveTopology::LineList => vk::PrimitiveTopology::LINE_LIST,
        PrimitiveTopology::LineStrip => vk::PrimitiveTopology::LINE_STRIP,
        PrimitiveTopology::TriangleList => vk::PrimitiveTopology::TRIANGLE_LIST,
        PrimitiveTopology::TriangleStrip => vk::PrimitiveTopology::TRIANGLE_STRIP,
        PrimitiveTopology::TriangleFan => vk::PrimitiveTopology::TRIANGLE_FAN,
        PrimitiveTopology::PatchList => vk::PrimitiveTopology::PATCH_LIST,
    }
}

pub fn index_type(ty: IndexType) -> vk::IndexType {
    match ty {
        IndexType::U16 => vk::IndexType::UINT16,
        IndexType::U32 => vk::IndexType::UINT32,
    }
}

pub fn filter(filter: Filter) -> vk::Filter {
    match filter {
        Filter::Nearest => vk::Filter::NEAREST,
        Filter::Linear => vk::Filter::LINEAR,
    }
}

pub fn address_mode(mode: SamplerAddressMode) -> vk::SamplerAddressMode {
    match mode {
        SamplerAddressMode::Repeat => vk::SamplerAddressMode::REPEAT,
        SamplerAddressMode::MirroredRepeat => vk::SamplerAddressMode::MIRRORED_REPEAT,
        SamplerAddressMode::ClampToEdge => vk::SamplerAddressMode::CLAMP_TO_EDGE,
    }
}

pub fn load_op(op: LoadOp) -> vk::AttachmentLoadOp {
    match op {
        LoadOp::Load => vk::AttachmentLoadOp::LOAD,
        LoadOp::Clear => vk::AttachmentLoadOp::CLEAR,
        LoadOp::DontCare => vk::AttachmentLoadOp::DONT_CARE,
    }
}

pub fn store_op(op: StoreOp) -> vk::AttachmentStoreOp {
    match op {
        StoreOp::Store => vk::AttachmentStoreOp::STORE,
        StoreOp::DontCare => vk::AttachmentStoreOp::DONT_CARE,
    }
}

/// Atomic counters have no descriptor type of their own and are bound as
/// storage buffers.
pub fn descriptor_type(ty: DescriptorType) -> vk::DescriptorType {
    match ty {
        DescriptorType::UniformBuffer => vk::DescriptorType::UNIFORM_BUFFER,
        DescriptorType::StorageBuffer | DescriptorType::AtomicCounterBuffer => {
            vk::DescriptorType::STORAGE_BUFFER
        }
        DescriptorType::CombinedImageSampler => vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
    }
}

pub fn bind_point(point: PipelineBindPoint) -> vk::PipelineBindPoint {
    match point {
        PipelineBindPoint::Graphics => vk::PipelineBindPoint::GRAPHICS,
        PipelineBindPoint::Compute => vk::PipelineBindPoint::COMPUTE,
    }
}

/// Front is index 0, back is index 1, matching the tracker's per-face
/// arrays.
pub fn stencil_face(index: usize) -> vk::StencilFaceFlags {
    if index == 0 {
        vk::StencilFaceFlags::FRONT
    } else {
        vk::StencilFaceFlags::BACK
    }
}

pub fn viewport(v: &Viewport) -> vk::Viewport {
    vk::Viewport {
        x: v.x,
        y: v.y,
        width: v.width,
        height: v.height,
        min_depth: v.min_depth,
        max_depth: v.max_depth,
    }
}

pub fn rect(r: &Rect2D) -> vk::Rect2D {
    vk::Rect2D {
        offset: vk::Offset2D { x: r.x, y: r.y },
        extent: vk::Extent2D {
            width: r.w,
            height: r.h,
        },
    }
}

pub fn clear_value(value: &ClearValue) -> vk::ClearValue {
    match value {
        ClearValue::Color(color) => vk::ClearValue {
            color: vk::ClearColorValue { float32: *color },
        },
        ClearValue::DepthStencil { depth, stencil } => vk::ClearValue {
            depth_stencil: vk::ClearDepthStencilValue {
                depth: *depth,
                stencil: *stencil,
            },
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn depth_formats_pick_their_aspects() {
        assert_eq!(aspect_mask(Format::RGBA8Unorm), vk::ImageAspectFlags::COLOR);
        assert_eq!(aspect_mask(Format::D32Float), vk::ImageAspectFlags::DEPTH);
        assert_eq!(
            aspect_mask(Format::D24S8),
            vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
        );
    }

    #[test]
    fn buffers_always_accept_transfers() {
        let flags = buffer_usage(BufferUsage::VERTEX);
        assert!(flags.contains(vk::BufferUsageFlags::TRANSFER_DST));
        assert!(flags.contains(vk::BufferUsageFlags::VERTEX_BUFFER));
        assert!(!flags.contains(vk::BufferUsageFlags::INDEX_BUFFER));

        let atomics = buffer_usage(BufferUsage::ATOMIC_COUNTER);
        assert!(atomics.contains(vk::BufferUsageFlags::STORAGE_BUFFER));
    }

    #[test]
    fn stage_flags_translate_bit_by_bit() {
        let flags = shader_stage_flags(ShaderStageFlags::VERTEX | ShaderStageFlags::COMPUTE);
        assert_eq!(
            flags,
            vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::COMPUTE
        );
        assert_eq!(
            shader_stage_flags(ShaderStageFlags::ALL_GRAPHICS),
            vk::ShaderStageFlags::ALL_GRAPHICS
        );
    }

    #[test]
    fn partial_write_masks() {
        let mask = color_write_mask(ColorWriteMask::R | ColorWriteMask::A);
        assert_eq!(mask, vk::ColorComponentFlags::R | vk::ColorComponentFlags::A);
    }
}
