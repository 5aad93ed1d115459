//! Orthogonal pieces of pipeline state.
//!
//! Every fragment carries one [`FragmentValue`] and optionally a weak link to
//! the fragment of the same kind in the parent pipeline. The link is lookup
//! only: a fragment never keeps its parent alive.

use std::sync::{Arc, Weak};

use crate::gpu::driver::types::*;
use crate::gpu::resource::Program;
use crate::gpu::tracker::RenderStateTracker;
use crate::gpu::Backend;

use super::params::VertexInputState;

#[cfg(feature = "pipestate-serde")]
use serde::{Deserialize, Serialize};

#[cfg_attr(feature = "pipestate-serde", derive(Serialize, Deserialize))]
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct DepthBias {
    pub enable: bool,
    pub constant_factor: f32,
    pub slope_factor: f32,
    pub clamp: f32,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StencilOps {
    pub fail: StencilOp,
    pub depth_fail: StencilOp,
    pub pass: StencilOp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StencilFunc {
    pub compare: CompareOp,
    pub reference: u32,
    pub read_mask: u32,
}

impl Default for StencilFunc {
    fn default() -> Self {
        Self {
            compare: CompareOp::Always,
            reference: 0,
            read_mask: !0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlendFactors {
    pub src_color: BlendFactor,
    pub dst_color: BlendFactor,
    pub src_alpha: BlendFactor,
    pub dst_alpha: BlendFactor,
}

impl Default for BlendFactors {
    fn default() -> Self {
        Self {
            src_color: BlendFactor::One,
            dst_color: BlendFactor::Zero,
            src_alpha: BlendFactor::One,
            dst_alpha: BlendFactor::Zero,
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlendOps {
    pub color: BlendOp,
    pub alpha: BlendOp,
}

/// Identity key of a fragment. Declaration order is the sort order of every
/// state container.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum FragmentKind {
    ShaderProgram,
    DepthTest,
    DepthWrite,
    DepthFunc,
    DepthBias,
    StencilTest,
    StencilOpFront,
    StencilOpBack,
    StencilFuncFront,
    StencilFuncBack,
    StencilWriteMaskFront,
    StencilWriteMaskBack,
    PolygonCulling,
    PolygonWinding,
    BlendEnable,
    BlendFactors,
    BlendOp,
    ColorWriteMask,
    ScissorTest,
    Viewport,
    Scissor,
    PrimitiveTopology,
    VertexInput,
    TessPatchControlPoints,
}

impl FragmentKind {
    pub const ALL: [FragmentKind; 24] = [
        FragmentKind::ShaderProgram,
        FragmentKind::DepthTest,
        FragmentKind::DepthWrite,
        FragmentKind::DepthFunc,
        FragmentKind::DepthBias,
        FragmentKind::StencilTest,
        FragmentKind::StencilOpFront,
        FragmentKind::StencilOpBack,
        FragmentKind::StencilFuncFront,
        FragmentKind::StencilFuncBack,
        FragmentKind::StencilWriteMaskFront,
        FragmentKind::StencilWriteMaskBack,
        FragmentKind::PolygonCulling,
        FragmentKind::PolygonWinding,
        FragmentKind::BlendEnable,
        FragmentKind::BlendFactors,
        FragmentKind::BlendOp,
        FragmentKind::ColorWriteMask,
        FragmentKind::ScissorTest,
        FragmentKind::Viewport,
        FragmentKind::Scissor,
        FragmentKind::PrimitiveTopology,
        FragmentKind::VertexInput,
        FragmentKind::TessPatchControlPoints,
    ];

    fn bit(self) -> u32 {
        1 << (self as u8 as u32)
    }
}

/// Set of fragment kinds.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct FragmentMask(u32);

impl FragmentMask {
    pub const fn empty() -> Self {
        FragmentMask(0)
    }

    pub fn insert(&mut self, kind: FragmentKind) {
        self.0 |= kind.bit();
    }

    pub fn remove(&mut self, kind: FragmentKind) {
        self.0 &= !kind.bit();
    }

    pub fn contains(&self, kind: FragmentKind) -> bool {
        self.0 & kind.bit() != 0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn clear(&mut self) {
        self.0 = 0;
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FragmentValue {
    /// `None` is the "no program" default.
    ShaderProgram(Option<Program>),
    DepthTest(bool),
    DepthWrite(bool),
    DepthFunc(CompareOp),
    DepthBias(DepthBias),
    StencilTest(bool),
    StencilOpFront(StencilOps),
    StencilOpBack(StencilOps),
    StencilFuncFront(StencilFunc),
    StencilFuncBack(StencilFunc),
    StencilWriteMaskFront(u32),
    StencilWriteMaskBack(u32),
    PolygonCulling(CullMode),
    PolygonWinding(FrontFace),
    BlendEnable(bool),
    BlendFactors(BlendFactors),
    BlendOp(BlendOps),
    ColorWriteMask(ColorWriteMask),
    ScissorTest(bool),
    Viewport(Viewport),
    Scissor(Rect2D),
    PrimitiveTopology(PrimitiveTopology),
    VertexInput(Arc<VertexInputState>),
    TessPatchControlPoints(u32),
}

impl FragmentValue {
    pub fn kind(&self) -> FragmentKind {
        match self {
            FragmentValue::ShaderProgram(_) => FragmentKind::ShaderProgram,
            FragmentValue::DepthTest(_) => FragmentKind::DepthTest,
            FragmentValue::DepthWrite(_) => FragmentKind::DepthWrite,
            FragmentValue::DepthFunc(_) => FragmentKind::DepthFunc,
            FragmentValue::DepthBias(_) => FragmentKind::DepthBias,
            FragmentValue::StencilTest(_) => FragmentKind::StencilTest,
            FragmentValue::StencilOpFront(_) => FragmentKind::StencilOpFront,
            FragmentValue::StencilOpBack(_) => FragmentKind::StencilOpBack,
            FragmentValue::StencilFuncFront(_) => FragmentKind::StencilFuncFront,
            FragmentValue::StencilFuncBack(_) => FragmentKind::StencilFuncBack,
            FragmentValue::StencilWriteMaskFront(_) => FragmentKind::StencilWriteMaskFront,
            FragmentValue::StencilWriteMaskBack(_) => FragmentKind::StencilWriteMaskBack,
            FragmentValue::PolygonCulling(_) => FragmentKind::PolygonCulling,
            FragmentValue::PolygonWinding(_) => FragmentKind::PolygonWinding,
            FragmentValue::BlendEnable(_) => FragmentKind::BlendEnable,
            FragmentValue::BlendFactors(_) => FragmentKind::BlendFactors,
            FragmentValue::BlendOp(_) => FragmentKind::BlendOp,
            FragmentValue::ColorWriteMask(_) => FragmentKind::ColorWriteMask,
            FragmentValue::ScissorTest(_) => FragmentKind::ScissorTest,
            FragmentValue::Viewport(_) => FragmentKind::Viewport,
            FragmentValue::Scissor(_) => FragmentKind::Scissor,
            FragmentValue::PrimitiveTopology(_) => FragmentKind::PrimitiveTopology,
            FragmentValue::VertexInput(_) => FragmentKind::VertexInput,
            FragmentValue::TessPatchControlPoints(_) => FragmentKind::TessPatchControlPoints,
        }
    }

    /// Documented default of a kind, which equals the state of a fresh
    /// implicit context. Viewport and scissor have none: they are dynamic
    /// state owned by commands once no pipeline pins them.
    pub fn default_for(kind: FragmentKind) -> Option<FragmentValue> {
        Some(match kind {
            FragmentKind::ShaderProgram => FragmentValue::ShaderProgram(None),
            FragmentKind::DepthTest => FragmentValue::DepthTest(false),
            FragmentKind::DepthWrite => FragmentValue::DepthWrite(true),
            FragmentKind::DepthFunc => FragmentValue::DepthFunc(CompareOp::Less),
            FragmentKind::DepthBias => FragmentValue::DepthBias(DepthBias::default()),
            FragmentKind::StencilTest => FragmentValue::StencilTest(false),
            FragmentKind::StencilOpFront => FragmentValue::StencilOpFront(StencilOps::default()),
            FragmentKind::StencilOpBack => FragmentValue::StencilOpBack(StencilOps::default()),
            FragmentKind::StencilFuncFront => {
                FragmentValue::StencilFuncFront(StencilFunc::default())
            }
            FragmentKind::StencilFuncBack => FragmentValue::StencilFuncBack(StencilFunc::default()),
            FragmentKind::StencilWriteMaskFront => FragmentValue::StencilWriteMaskFront(!0),
            FragmentKind::StencilWriteMaskBack => FragmentValue::StencilWriteMaskBack(!0),
            FragmentKind::PolygonCulling => FragmentValue::PolygonCulling(CullMode::None),
            FragmentKind::PolygonWinding => {
                FragmentValue::PolygonWinding(FrontFace::CounterClockwise)
            }
            FragmentKind::BlendEnable => FragmentValue::BlendEnable(false),
            FragmentKind::BlendFactors => FragmentValue::BlendFactors(BlendFactors::default()),
            FragmentKind::BlendOp => FragmentValue::BlendOp(BlendOps::default()),
            FragmentKind::ColorWriteMask => FragmentValue::ColorWriteMask(ColorWriteMask::RGBA),
            FragmentKind::ScissorTest => FragmentValue::ScissorTest(false),
            FragmentKind::Viewport | FragmentKind::Scissor => return None,
            FragmentKind::PrimitiveTopology => {
                FragmentValue::PrimitiveTopology(PrimitiveTopology::TriangleList)
            }
            FragmentKind::VertexInput => {
                FragmentValue::VertexInput(Arc::new(VertexInputState::default()))
            }
            FragmentKind::TessPatchControlPoints => FragmentValue::TessPatchControlPoints(3),
        })
    }
}

#[derive(Debug)]
pub struct StateFragment {
    value: FragmentValue,
    parent: Weak<StateFragment>,
}

impl StateFragment {
    pub fn new(value: FragmentValue) -> Self {
        Self {
            value,
            parent: Weak::new(),
        }
    }

    /// A fragment overriding `parent`, the same kind in the parent pipeline.
    pub fn linked(value: FragmentValue, parent: &Arc<StateFragment>) -> Self {
        debug_assert_eq!(value.kind(), parent.kind());
        Self {
            value,
            parent: Arc::downgrade(parent),
        }
    }

    pub fn kind(&self) -> FragmentKind {
        self.value.kind()
    }

    pub fn value(&self) -> &FragmentValue {
        &self.value
    }

    /// The parent pipeline's fragment, if it is still alive.
    pub fn parent(&self) -> Option<Arc<StateFragment>> {
        self.parent.upgrade()
    }

    pub fn has_parent_link(&self) -> bool {
        self.parent.strong_count() > 0
    }

    pub fn apply(&self, backend: &mut dyn Backend, tracker: &mut RenderStateTracker) {
        backend.apply_fragment(tracker, &self.value);
    }

    /// Undoes this fragment: applies the linked parent's value, or the
    /// kind's default when there is no live parent.
    pub fn unset(&self, backend: &mut dyn Backend, tracker: &mut RenderStateTracker) {
        match self.parent() {
            Some(parent) => parent.apply(backend, tracker),
            None => restore_default(self.kind(), backend, tracker),
        }
    }
}

pub fn restore_default(
    kind: FragmentKind,
    backend: &mut dyn Backend,
    tracker: &mut RenderStateTracker,
) {
    if let Some(value) = FragmentValue::default_for(kind) {
        backend.apply_fragment(tracker, &value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_sort_in_declaration_order() {
        let mut sorted = FragmentKind::ALL;
        sorted.sort();
        assert_eq!(sorted, FragmentKind::ALL);
        assert_eq!(sorted[0], FragmentKind::ShaderProgram);
    }

    #[test]
    fn every_kind_round_trips_through_its_default() {
        for kind in FragmentKind::ALL {
            if let Some(value) = FragmentValue::default_for(kind) {
                assert_eq!(value.kind(), kind);
            }
        }
        assert!(FragmentValue::default_for(FragmentKind::Viewport).is_none());
    }

    #[test]
    fn parent_link_does_not_own() {
        let parent = Arc::new(StateFragment::new(FragmentValue::DepthTest(true)));
        let child = StateFragment::linked(FragmentValue::DepthTest(false), &parent);
        assert!(child.has_parent_link());

        drop(parent);
        assert!(!child.has_parent_link());
        assert!(child.parent().is_none());
    }

    #[test]
    fn mask_tracks_kinds() {
        let mut mask = FragmentMask::empty();
        mask.insert(FragmentKind::Viewport);
        mask.insert(FragmentKind::ShaderProgram);
        assert!(mask.contains(FragmentKind::Viewport));
        assert!(!mask.contains(FragmentKind::Scissor));
        mask.remove(FragmentKind::Viewport);
        assert!(!mask.contains(FragmentKind::Viewport));
        mask.clear();
        assert!(mask.is_empty());
    }
}
