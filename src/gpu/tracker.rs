//! Per-context cache of the last value applied to every tracked binding
//! point.
//!
//! No native state call is issued, and no entry written, unless the new
//! value differs from the cached one. Backends route every setter through
//! [`Tracked::update`], which only records the value after the native call
//! was made.

use std::sync::Arc;

use crate::gpu::driver::types::*;
use crate::gpu::pipeline::fragment::{
    BlendFactors, BlendOps, DepthBias, FragmentMask, StencilFunc, StencilOps,
};
use crate::gpu::pipeline::params::VertexInputState;
use crate::gpu::pipeline::{ComputePipeline, GraphicsPipeline};
use crate::gpu::resource::{NativeObject, ResourceId};
use crate::utils::Handle;

/// A cached value. `None` means unknown, so the next update always issues.
#[derive(Debug, Clone, PartialEq)]
pub struct Tracked<T> {
    value: Option<T>,
}

impl<T> Default for Tracked<T> {
    fn default() -> Self {
        Self { value: None }
    }
}

impl<T: PartialEq> Tracked<T> {
    pub fn new(value: T) -> Self {
        Self { value: Some(value) }
    }

    pub fn unknown() -> Self {
        Self { value: None }
    }

    pub fn get(&self) -> Option<&T> {
        self.value.as_ref()
    }

    /// Calls `issue` and records `value` if it differs from the cache.
    /// Returns whether a native call was issued.
    pub fn update(&mut self, value: T, issue: impl FnOnce(&T)) -> bool {
        if self.value.as_ref() == Some(&value) {
            return false;
        }
        issue(&value);
        self.value = Some(value);
        true
    }

    pub fn invalidate(&mut self) {
        self.value = None;
    }
}

/// Grows `table` so `index` is addressable and returns that slot.
pub fn slot<T: PartialEq + Clone>(
    table: &mut Vec<Tracked<T>>,
    index: usize,
    initial: Tracked<T>,
) -> &mut Tracked<T> {
    if table.len() <= index {
        table.resize(index + 1, initial);
    }
    &mut table[index]
}

/// What pipeline the context last bound.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub enum BoundPipeline {
    #[default]
    None,
    Graphics(Handle<GraphicsPipeline>),
    Compute(Handle<ComputePipeline>),
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct BufferBinding {
    pub id: ResourceId,
    pub raw: NativeObject,
    pub offset: u64,
    pub range: u64,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct IndexBinding {
    pub id: ResourceId,
    pub raw: NativeObject,
    pub offset: u64,
    pub index_type: IndexType,
}

/// Where one vertex attribute currently sources its data from.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct AttributePointer {
    pub buffer: ResourceId,
    pub format: VertexFormat,
    pub stride: u32,
    pub offset: u64,
    pub rate: VertexRate,
}

/// Two-phase vertex attribute enable bitfields.
///
/// During draw setup every attribute the draw reads is marked and enabled if
/// it was off. After the draw, attributes that were on but not marked are
/// switched off and the marks become the new enabled set. Draws with
/// overlapping attribute sets therefore never toggle the shared ones.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct AttributeEnables {
    to_enable: u32,
    enabled: u32,
}

impl AttributeEnables {
    pub fn enable(&mut self, index: u32, issue: impl FnOnce(u32)) {
        debug_assert!(index < 32, "vertex attribute {} out of range", index);
        let bit = 1u32 << index;
        self.to_enable |= bit;
        if self.enabled & bit == 0 {
            issue(index);
            self.enabled |= bit;
        }
    }

    pub fn disable_unneeded(&mut self, mut issue: impl FnMut(u32)) {
        let stale = self.enabled & !self.to_enable;
        for index in 0..32 {
            if stale & (1 << index) != 0 {
                issue(index);
            }
        }
        self.enabled = self.to_enable;
        self.to_enable = 0;
    }

    pub fn enabled(&self) -> u32 {
        self.enabled
    }

    pub fn pending(&self) -> u32 {
        self.to_enable
    }
}

pub struct RenderStateTracker {
    pub bound_pipeline: BoundPipeline,
    /// Fragment kinds whose native state was changed behind the bound
    /// pipeline's back (dynamic state, clears). The diff engine re-applies
    /// these even when the fragment is shared.
    pub dirty: FragmentMask,

    pub program: Tracked<Option<ResourceId>>,
    pub pipeline_object: Tracked<Option<ResourceId>>,

    pub depth_test: Tracked<bool>,
    pub depth_write: Tracked<bool>,
    pub depth_func: Tracked<CompareOp>,
    pub depth_bias: Tracked<DepthBias>,
    pub stencil_test: Tracked<bool>,
    /// Indexed front, back.
    pub stencil_ops: [Tracked<StencilOps>; 2],
    pub stencil_func: [Tracked<StencilFunc>; 2],
    pub stencil_write_mask: [Tracked<u32>; 2],
    pub cull_mode: Tracked<CullMode>,
    pub front_face: Tracked<FrontFace>,
    pub blend_enable: Tracked<bool>,
    pub blend_factors: Tracked<BlendFactors>,
    pub blend_ops: Tracked<BlendOps>,
    pub color_write_mask: Tracked<ColorWriteMask>,
    pub scissor_test: Tracked<bool>,

    pub viewport: Tracked<Viewport>,
    pub scissor: Tracked<Rect2D>,
    pub blend_constants: Tracked<[f32; 4]>,
    pub line_width: Tracked<f32>,
    pub patch_control_points: Tracked<u32>,
    pub clear_depth: Tracked<f32>,
    pub clear_stencil: Tracked<u32>,

    /// Consumed by draws; not native state on either backend.
    pub topology: PrimitiveTopology,
    pub vertex_input: Option<Arc<VertexInputState>>,
    /// Vertex buffers per binding slot, resolved into attribute pointers at
    /// draw time on the implicit backend.
    pub vertex_buffers: Vec<Option<BufferBinding>>,

    pub framebuffer: Tracked<Option<ResourceId>>,
    pub array_buffer: Tracked<Option<ResourceId>>,
    pub index_buffer: Tracked<Option<IndexBinding>>,
    pub uniform_buffers: Vec<Tracked<Option<BufferBinding>>>,
    pub storage_buffers: Vec<Tracked<Option<BufferBinding>>>,
    pub atomic_buffers: Vec<Tracked<Option<BufferBinding>>>,
    pub active_texture_unit: Tracked<u32>,
    pub textures: Vec<Tracked<Option<ResourceId>>>,
    pub samplers: Vec<Tracked<Option<ResourceId>>>,
    pub descriptor_sets: Vec<Tracked<Option<ResourceId>>>,
    pub attribute_pointers: Vec<Tracked<AttributePointer>>,
    pub attributes: AttributeEnables,
}

impl Default for RenderStateTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl RenderStateTracker {
    /// A tracker matching the initial state of a freshly created implicit
    /// context.
    pub fn new() -> Self {
        Self {
            bound_pipeline: BoundPipeline::None,
            dirty: FragmentMask::empty(),
            program: Tracked::new(None),
            pipeline_object: Tracked::new(None),
            depth_test: Tracked::new(false),
            depth_write: Tracked::new(true),
            depth_func: Tracked::new(CompareOp::Less),
            depth_bias: Tracked::new(DepthBias::default()),
            stencil_test: Tracked::new(false),
            stencil_ops: [
                Tracked::new(StencilOps::default()),
                Tracked::new(StencilOps::default()),
            ],
            stencil_func: [
                Tracked::new(StencilFunc::default()),
                Tracked::new(StencilFunc::default()),
            ],
            stencil_write_mask: [Tracked::new(!0), Tracked::new(!0)],
            cull_mode: Tracked::new(CullMode::None),
            front_face: Tracked::new(FrontFace::CounterClockwise),
            blend_enable: Tracked::new(false),
            blend_factors: Tracked::new(BlendFactors::default()),
            blend_ops: Tracked::new(BlendOps::default()),
            color_write_mask: Tracked::new(ColorWriteMask::RGBA),
            scissor_test: Tracked::new(false),
            viewport: Tracked::unknown(),
            scissor: Tracked::unknown(),
            blend_constants: Tracked::new([0.0; 4]),
            line_width: Tracked::new(1.0),
            patch_control_points: Tracked::new(3),
            clear_depth: Tracked::new(1.0),
            clear_stencil: Tracked::new(0),
            topology: PrimitiveTopology::TriangleList,
            vertex_input: None,
            vertex_buffers: Vec::new(),
            framebuffer: Tracked::new(None),
            array_buffer: Tracked::new(None),
            index_buffer: Tracked::new(None),
            uniform_buffers: Vec::new(),
            storage_buffers: Vec::new(),
            atomic_buffers: Vec::new(),
            active_texture_unit: Tracked::new(0),
            textures: Vec::new(),
            samplers: Vec::new(),
            descriptor_sets: Vec::new(),
            attribute_pointers: Vec::new(),
            attributes: AttributeEnables::default(),
        }
    }

    /// Forgets every cached value. The explicit backend calls this whenever
    /// it starts a native command buffer, since bound state does not carry
    /// over between them.
    pub fn invalidate(&mut self) {
        *self = Self {
            bound_pipeline: BoundPipeline::None,
            dirty: FragmentMask::empty(),
            program: Tracked::unknown(),
            pipeline_object: Tracked::unknown(),
            depth_test: Tracked::unknown(),
            depth_write: Tracked::unknown(),
            depth_func: Tracked::unknown(),
            depth_bias: Tracked::unknown(),
            stencil_test: Tracked::unknown(),
            stencil_ops: [Tracked::unknown(), Tracked::unknown()],
            stencil_func: [Tracked::unknown(), Tracked::unknown()],
            stencil_write_mask: [Tracked::unknown(), Tracked::unknown()],
            cull_mode: Tracked::unknown(),
            front_face: Tracked::unknown(),
            blend_enable: Tracked::unknown(),
            blend_factors: Tracked::unknown(),
            blend_ops: Tracked::unknown(),
            color_write_mask: Tracked::unknown(),
            scissor_test: Tracked::unknown(),
            viewport: Tracked::unknown(),
            scissor: Tracked::unknown(),
            blend_constants: Tracked::unknown(),
            line_width: Tracked::unknown(),
            patch_control_points: Tracked::unknown(),
            clear_depth: Tracked::unknown(),
            clear_stencil: Tracked::unknown(),
            framebuffer: Tracked::unknown(),
            array_buffer: Tracked::unknown(),
            index_buffer: Tracked::unknown(),
            active_texture_unit: Tracked::unknown(),
            ..Self::new()
        };
    }

    pub fn stencil_faces(face: StencilFace) -> impl Iterator<Item = usize> {
        let mut faces = smallvec::SmallVec::<[usize; 2]>::new();
        if face.contains(StencilFace::FRONT) {
            faces.push(0);
        }
        if face.contains(StencilFace::BACK) {
            faces.push(1);
        }
        faces.into_iter()
    }

    pub fn bound_vertex_buffer(&self, binding: u32) -> Option<BufferBinding> {
        self.vertex_buffers.get(binding as usize).copied().flatten()
    }

    pub fn set_vertex_buffer(&mut self, binding: u32, value: BufferBinding) {
        let index = binding as usize;
        if self.vertex_buffers.len() <= index {
            self.vertex_buffers.resize(index + 1, None);
        }
        self.vertex_buffers[index] = Some(value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeated_values_issue_once() {
        let mut tracker = RenderStateTracker::new();
        let mut calls = 0;
        let v = Viewport::from_extent(64, 64);
        let w = Viewport::from_extent(32, 32);

        tracker.viewport.update(v, |_| calls += 1);
        tracker.viewport.update(v, |_| calls += 1);
        assert_eq!(calls, 1);

        tracker.viewport.update(w, |_| calls += 1);
        assert_eq!(calls, 2);
    }

    #[test]
    fn defaults_match_fresh_context() {
        let mut tracker = RenderStateTracker::new();
        let mut calls = 0;
        tracker.depth_test.update(false, |_| calls += 1);
        tracker.depth_write.update(true, |_| calls += 1);
        tracker.cull_mode.update(CullMode::None, |_| calls += 1);
        assert_eq!(calls, 0);

        tracker.invalidate();
        tracker.depth_test.update(false, |_| calls += 1);
        assert_eq!(calls, 1);
    }

    #[test]
    fn overlapping_attribute_sets_toggle_only_the_difference() {
        let mut attrs = AttributeEnables::default();
        let mut enabled = Vec::new();
        let mut disabled = Vec::new();

        for i in [0, 1, 2] {
            attrs.enable(i, |i| enabled.push(i));
        }
        attrs.disable_unneeded(|i| disabled.push(i));
        assert_eq!(enabled, vec![0, 1, 2]);
        assert!(disabled.is_empty());

        enabled.clear();
        for i in [1, 2, 3] {
            attrs.enable(i, |i| enabled.push(i));
        }
        attrs.disable_unneeded(|i| disabled.push(i));
        assert_eq!(enabled, vec![3]);
        assert_eq!(disabled, vec![0]);
        assert_eq!(attrs.enabled(), 0b1110);
        assert_eq!(attrs.pending(), 0);
    }

    #[test]
    fn slots_grow_on_demand() {
        let mut table: Vec<Tracked<Option<u32>>> = Vec::new();
        let mut calls = 0;
        slot(&mut table, 3, Tracked::new(None)).update(Some(7), |_| calls += 1);
        slot(&mut table, 3, Tracked::new(None)).update(Some(7), |_| calls += 1);
        assert_eq!(table.len(), 4);
        assert_eq!(calls, 1);
    }
}
