//! Pipeline relationship classification and the fragment diff engine.
//!
//! Binding a pipeline on the implicit backend only touches the fragments
//! that differ from the state left behind by the previously bound one. How
//! much can be skipped depends on how the two pipelines relate through
//! their parent links, which is what [`classify`] works out.

use std::sync::Arc;

use smallvec::SmallVec;

use crate::utils::{Handle, Pool};

use super::container::StateContainer;
use super::fragment::{FragmentKind, FragmentMask, StateFragment};
use super::GraphicsPipeline;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum PipelineRelation {
    Identity,
    NullToNull,
    NullToPipeline,
    PipelineToNull,
    /// The candidate descends from the current pipeline.
    FatherChild,
    /// The current pipeline descends from the candidate.
    ChildFather,
    /// Different pipelines sharing a root, neither an ancestor of the other.
    Siblings,
    Unrelated,
}

/// Parent lookup over whatever stores the pipelines.
pub trait ParentLookup {
    /// The live parent of `pipeline`, if any. A parent that was destroyed
    /// counts as no parent.
    fn parent_of(&self, pipeline: Handle<GraphicsPipeline>) -> Option<Handle<GraphicsPipeline>>;
}

impl ParentLookup for Pool<GraphicsPipeline> {
    fn parent_of(&self, pipeline: Handle<GraphicsPipeline>) -> Option<Handle<GraphicsPipeline>> {
        let parent = self.get_ref(pipeline)?.parent?;
        self.is_live(parent).then_some(parent)
    }
}

type Chain = SmallVec<[Handle<GraphicsPipeline>; 8]>;

/// Ancestors of `from`, nearest first. `None` if the chain is longer than
/// `max_depth`.
fn ancestry<G: ParentLookup + ?Sized>(
    graph: &G,
    from: Handle<GraphicsPipeline>,
    max_depth: usize,
) -> Option<Chain> {
    let mut chain = Chain::new();
    let mut at = from;
    while let Some(parent) = graph.parent_of(at) {
        if chain.len() >= max_depth {
            return None;
        }
        chain.push(parent);
        at = parent;
    }
    Some(chain)
}

pub fn classify<G: ParentLookup + ?Sized>(
    graph: &G,
    current: Option<Handle<GraphicsPipeline>>,
    candidate: Option<Handle<GraphicsPipeline>>,
    max_depth: usize,
) -> PipelineRelation {
    let (current, candidate) = match (current, candidate) {
        (None, None) => return PipelineRelation::NullToNull,
        (None, Some(_)) => return PipelineRelation::NullToPipeline,
        (Some(_), None) => return PipelineRelation::PipelineToNull,
        (Some(a), Some(b)) if a == b => return PipelineRelation::Identity,
        (Some(a), Some(b)) => (a, b),
    };

    let Some(candidate_chain) = ancestry(graph, candidate, max_depth) else {
        return PipelineRelation::Unrelated;
    };
    if candidate_chain.contains(&current) {
        return PipelineRelation::FatherChild;
    }

    let Some(current_chain) = ancestry(graph, current, max_depth) else {
        return PipelineRelation::Unrelated;
    };
    if current_chain.contains(&candidate) {
        return PipelineRelation::ChildFather;
    }

    let current_root = current_chain.last().copied().unwrap_or(current);
    let candidate_root = candidate_chain.last().copied().unwrap_or(candidate);
    if current_root == candidate_root {
        PipelineRelation::Siblings
    } else {
        PipelineRelation::Unrelated
    }
}

/// Nearest pipeline that is an ancestor of both `a` and `b`.
pub fn common_ancestor<G: ParentLookup + ?Sized>(
    graph: &G,
    a: Handle<GraphicsPipeline>,
    b: Handle<GraphicsPipeline>,
    max_depth: usize,
) -> Option<Handle<GraphicsPipeline>> {
    let a_chain = ancestry(graph, a, max_depth)?;
    let b_chain = ancestry(graph, b, max_depth)?;
    b_chain.into_iter().find(|h| a_chain.contains(h))
}

/// One step of a pipeline switch.
#[derive(Debug, Clone)]
pub enum FragmentOp {
    /// Apply a fragment of the incoming pipeline.
    Apply(Arc<StateFragment>),
    /// Undo a fragment of the outgoing pipeline through its parent link.
    Unset(Arc<StateFragment>),
    /// Apply a fragment of the incoming pipeline to put back state the
    /// outgoing pipeline had overridden.
    Restore(Arc<StateFragment>),
    /// Put the kind back to its default value.
    Reset(FragmentKind),
}

impl FragmentOp {
    pub fn kind(&self) -> FragmentKind {
        match self {
            FragmentOp::Apply(f) | FragmentOp::Unset(f) | FragmentOp::Restore(f) => f.kind(),
            FragmentOp::Reset(kind) => *kind,
        }
    }

    pub fn is_apply(&self) -> bool {
        matches!(self, FragmentOp::Apply(_))
    }
}

#[derive(Debug, Clone)]
pub struct TransitionPlan {
    pub relation: PipelineRelation,
    pub ops: Vec<FragmentOp>,
}

impl TransitionPlan {
    pub fn applied(&self) -> usize {
        self.ops.iter().filter(|op| op.is_apply()).count()
    }

    pub fn restored(&self) -> usize {
        self.ops.len() - self.applied()
    }

    pub fn report(&self) -> BindReport {
        BindReport {
            relation: self.relation,
            applied: self.applied(),
            restored: self.restored(),
        }
    }
}

/// What a pipeline bind did.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct BindReport {
    pub relation: PipelineRelation,
    /// Fragments of the incoming pipeline that were applied.
    pub applied: usize,
    /// Fragments that were unset, restored or reset to their default.
    pub restored: usize,
}

impl BindReport {
    pub fn unchanged(relation: PipelineRelation) -> Self {
        Self {
            relation,
            applied: 0,
            restored: 0,
        }
    }

    pub fn total(&self) -> usize {
        self.applied + self.restored
    }
}

fn same(a: Option<&Arc<StateFragment>>, b: Option<&Arc<StateFragment>>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => Arc::ptr_eq(a, b),
        (None, None) => true,
        _ => false,
    }
}

/// Moves the state from `a` back to `b`, preferring `a`'s own parent link.
fn restore_toward(
    kind: FragmentKind,
    a: Option<&Arc<StateFragment>>,
    b: Option<&Arc<StateFragment>>,
) -> Option<FragmentOp> {
    match (a, b) {
        (Some(a), Some(b)) if a.parent().map_or(false, |p| Arc::ptr_eq(&p, b)) => {
            Some(FragmentOp::Unset(a.clone()))
        }
        (_, Some(b)) => Some(FragmentOp::Restore(b.clone())),
        (Some(_), None) => Some(FragmentOp::Reset(kind)),
        (None, None) => None,
    }
}

/// Computes the fragment operations that turn the state left by `current`
/// into the state of `candidate`.
///
/// `ancestor` is the nearest common ancestor for [`PipelineRelation::Siblings`].
/// Kinds in `dirty` were changed outside of pipeline binds and are never
/// skipped.
pub fn plan_transition(
    relation: PipelineRelation,
    current: Option<&StateContainer>,
    candidate: Option<&StateContainer>,
    ancestor: Option<&StateContainer>,
    dirty: FragmentMask,
) -> TransitionPlan {
    let mut ops = Vec::new();
    // Siblings: every unset up to the ancestor runs before the way down.
    let mut descent = Vec::new();

    for kind in FragmentKind::ALL {
        let a = current.and_then(|c| c.get(kind));
        let b = candidate.and_then(|c| c.get(kind));
        let is_dirty = dirty.contains(kind);

        let op = match relation {
            PipelineRelation::NullToNull => None,
            PipelineRelation::Identity => match b {
                Some(b) if is_dirty => Some(FragmentOp::Apply(b.clone())),
                _ => None,
            },
            PipelineRelation::NullToPipeline => b.map(|b| FragmentOp::Apply(b.clone())),
            PipelineRelation::PipelineToNull => a.map(|_| FragmentOp::Reset(kind)),
            PipelineRelation::Unrelated => match (a, b) {
                (_, Some(b)) => Some(FragmentOp::Apply(b.clone())),
                (Some(_), None) => Some(FragmentOp::Reset(kind)),
                (None, None) => None,
            },
            PipelineRelation::FatherChild => {
                if same(a, b) && !is_dirty {
                    None
                } else {
                    match (a, b) {
                        (_, Some(b)) => Some(FragmentOp::Apply(b.clone())),
                        (Some(_), None) => Some(FragmentOp::Reset(kind)),
                        (None, None) => None,
                    }
                }
            }
            PipelineRelation::ChildFather => {
                if same(a, b) && !is_dirty {
                    None
                } else {
                    restore_toward(kind, a, b)
                }
            }
            PipelineRelation::Siblings => {
                let c = ancestor.and_then(|c| c.get(kind));
                if !same(a, c) {
                    ops.extend(restore_toward(kind, a, c));
                }
                if !same(b, c) {
                    descent.push(match b {
                        Some(b) => FragmentOp::Apply(b.clone()),
                        None => FragmentOp::Reset(kind),
                    });
                } else if let Some(b) = b.filter(|_| is_dirty && same(a, c)) {
                    descent.push(FragmentOp::Apply(b.clone()));
                }
                None
            }
        };

        ops.extend(op);
    }
    ops.append(&mut descent);

    TransitionPlan { relation, ops }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::driver::types::{CompareOp, CullMode};
    use crate::gpu::pipeline::container::FragmentSeed;
    use crate::gpu::pipeline::fragment::FragmentValue;
    use crate::gpu::pipeline::params::*;

    /// Parent table indexed by slot.
    struct Tree(Vec<Option<u16>>);

    fn h(slot: u16) -> Handle<GraphicsPipeline> {
        Handle::new(slot, 0)
    }

    impl ParentLookup for Tree {
        fn parent_of(&self, p: Handle<GraphicsPipeline>) -> Option<Handle<GraphicsPipeline>> {
            self.0.get(p.slot as usize).copied().flatten().map(h)
        }
    }

    //      0        4
    //     / \       |
    //    1   2      5
    //    |
    //    3
    fn tree() -> Tree {
        Tree(vec![None, Some(0), Some(0), Some(1), None, Some(4)])
    }

    #[test]
    fn classifies_every_relation() {
        let t = tree();
        let c = |a: Option<u16>, b: Option<u16>| classify(&t, a.map(h), b.map(h), 16);

        assert_eq!(c(None, None), PipelineRelation::NullToNull);
        assert_eq!(c(None, Some(1)), PipelineRelation::NullToPipeline);
        assert_eq!(c(Some(1), None), PipelineRelation::PipelineToNull);
        assert_eq!(c(Some(1), Some(1)), PipelineRelation::Identity);
        assert_eq!(c(Some(0), Some(1)), PipelineRelation::FatherChild);
        assert_eq!(c(Some(0), Some(3)), PipelineRelation::FatherChild);
        assert_eq!(c(Some(3), Some(0)), PipelineRelation::ChildFather);
        assert_eq!(c(Some(1), Some(2)), PipelineRelation::Siblings);
        assert_eq!(c(Some(3), Some(2)), PipelineRelation::Siblings);
        assert_eq!(c(Some(3), Some(5)), PipelineRelation::Unrelated);
        assert_eq!(c(Some(0), Some(4)), PipelineRelation::Unrelated);
    }

    #[test]
    fn chains_past_the_bound_are_unrelated() {
        let t = tree();
        assert_eq!(
            classify(&t, Some(h(0)), Some(h(3)), 1),
            PipelineRelation::Unrelated
        );
    }

    #[test]
    fn nearest_common_ancestor() {
        let t = tree();
        assert_eq!(common_ancestor(&t, h(3), h(2), 16), Some(h(0)));
        assert_eq!(common_ancestor(&t, h(3), h(5), 16), None);
    }

    fn base_info() -> GraphicsPipelineInfo {
        GraphicsPipelineInfo {
            color_blend: ColorBlendState::single(ColorBlendAttachment::default()),
            ..Default::default()
        }
    }

    fn build(info: &GraphicsPipelineInfo, parent: Option<&StateContainer>) -> StateContainer {
        StateContainer::build(
            info,
            FragmentSeed::Own(FragmentValue::ShaderProgram(None)),
            parent,
        )
    }

    #[test]
    fn father_child_applies_only_overrides() {
        let q = build(&base_info(), None);
        let mut info = base_info();
        info.depth_stencil.depth_test = true;
        info.rasterizer.cull_mode = CullMode::Back;
        let p = build(&info, Some(&q));

        let down = plan_transition(
            PipelineRelation::FatherChild,
            Some(&q),
            Some(&p),
            None,
            FragmentMask::empty(),
        );
        assert_eq!(down.applied(), 2);
        assert_eq!(down.restored(), 0);

        let up = plan_transition(
            PipelineRelation::ChildFather,
            Some(&p),
            Some(&q),
            None,
            FragmentMask::empty(),
        );
        assert_eq!(up.applied(), 0);
        assert_eq!(up.restored(), 2);
        assert!(up.ops.iter().all(|op| matches!(op, FragmentOp::Unset(_))));
    }

    #[test]
    fn dirty_kinds_are_reapplied() {
        let q = build(&base_info(), None);
        let mut dirty = FragmentMask::empty();
        dirty.insert(FragmentKind::DepthTest);

        let plan = plan_transition(PipelineRelation::Identity, Some(&q), Some(&q), None, dirty);
        assert_eq!(plan.ops.len(), 1);
        assert_eq!(plan.ops[0].kind(), FragmentKind::DepthTest);
    }

    #[test]
    fn unrelated_applies_everything() {
        let a = build(&base_info(), None);
        let b = build(&base_info(), None);
        let plan = plan_transition(
            PipelineRelation::Unrelated,
            Some(&a),
            Some(&b),
            None,
            FragmentMask::empty(),
        );
        assert_eq!(plan.applied(), b.len());
    }

    #[test]
    fn siblings_go_through_the_ancestor() {
        let q = build(&base_info(), None);
        let mut one = base_info();
        one.depth_stencil.depth_test = true;
        let p1 = build(&one, Some(&q));
        let mut two = base_info();
        two.rasterizer.cull_mode = CullMode::Front;
        let p2 = build(&two, Some(&q));

        let plan = plan_transition(
            PipelineRelation::Siblings,
            Some(&p1),
            Some(&p2),
            Some(&q),
            FragmentMask::empty(),
        );
        assert_eq!(plan.applied(), 1);
        assert_eq!(plan.restored(), 1);
        assert!(matches!(plan.ops[0], FragmentOp::Unset(_)));
        assert!(plan.ops[1].is_apply());
    }

    #[test]
    fn siblings_overriding_the_same_kind_unset_then_apply() {
        let q = build(&base_info(), None);
        let mut one = base_info();
        one.depth_stencil.depth_compare = CompareOp::Greater;
        one.depth_stencil.depth_test = true;
        let p1 = build(&one, Some(&q));
        let mut two = base_info();
        two.depth_stencil.depth_compare = CompareOp::Equal;
        let p2 = build(&two, Some(&q));

        let plan = plan_transition(
            PipelineRelation::Siblings,
            Some(&p1),
            Some(&p2),
            Some(&q),
            FragmentMask::empty(),
        );
        let kinds: Vec<_> = plan.ops.iter().map(|op| (op.kind(), op.is_apply())).collect();
        assert_eq!(
            kinds,
            vec![
                (FragmentKind::DepthTest, false),
                (FragmentKind::DepthFunc, false),
                (FragmentKind::DepthFunc, true),
            ]
        );
    }
}
