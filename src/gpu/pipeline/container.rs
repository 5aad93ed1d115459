use std::sync::Arc;

use crate::gpu::resource::Program;

use super::fragment::*;
use super::params::GraphicsPipelineInfo;

/// Where the value of one fragment comes from while a container is built.
#[derive(Debug, Clone)]
pub enum FragmentSeed {
    /// Reuse an existing fragment as is. Used for the program fragment when a
    /// child inherits its parent's shader stages.
    Shared(Arc<StateFragment>),
    Own(FragmentValue),
}

impl FragmentSeed {
    fn kind(&self) -> FragmentKind {
        match self {
            FragmentSeed::Shared(f) => f.kind(),
            FragmentSeed::Own(v) => v.kind(),
        }
    }
}

/// The fragments of one pipeline, sorted by kind with no kind repeated.
#[derive(Debug, Default, Clone)]
pub struct StateContainer {
    fragments: Vec<Arc<StateFragment>>,
}

impl StateContainer {
    /// Builds the container for fully resolved pipeline parameters.
    ///
    /// With a `parent`, every category whose value equals the parent's reuses
    /// the parent's fragment. Differing categories get a fresh fragment
    /// linked to the parent's fragment of the same kind.
    pub fn build(
        info: &GraphicsPipelineInfo,
        program: FragmentSeed,
        parent: Option<&StateContainer>,
    ) -> Self {
        let mut seeds = Vec::with_capacity(FragmentKind::ALL.len());
        seeds.push(program);
        depth_stencil_fragments(info, &mut seeds);
        rasterizer_fragments(info, &mut seeds);
        color_blend_fragments(info, &mut seeds);
        viewport_fragments(info, &mut seeds);
        input_fragments(info, &mut seeds);
        tessellation_fragments(info, &mut seeds);

        let mut fragments: Vec<Arc<StateFragment>> = seeds
            .into_iter()
            .map(|seed| share_if_equal(seed, parent))
            .collect();
        fragments.sort_by_key(|f| f.kind());
        debug_assert!(fragments.windows(2).all(|w| w[0].kind() < w[1].kind()));

        let mut container = Self { fragments };
        if let Some(parent) = parent {
            container.link_to(parent);
        }
        container
    }

    /// Lock-step walk over both sorted lists, turning every fragment that
    /// overrides a parent fragment of the same kind into a linked one.
    fn link_to(&mut self, parent: &StateContainer) {
        let mut theirs = parent.fragments.iter().peekable();
        for ours in self.fragments.iter_mut() {
            while theirs
                .peek()
                .map_or(false, |p| p.kind() < ours.kind())
            {
                theirs.next();
            }
            let Some(&p) = theirs.peek() else {
                break;
            };
            if p.kind() != ours.kind() || Arc::ptr_eq(p, ours) || ours.has_parent_link() {
                continue;
            }
            *ours = Arc::new(StateFragment::linked(ours.value().clone(), p));
        }
    }

    pub fn get(&self, kind: FragmentKind) -> Option<&Arc<StateFragment>> {
        self.fragments
            .binary_search_by_key(&kind, |f| f.kind())
            .ok()
            .map(|i| &self.fragments[i])
    }

    pub fn fragments(&self) -> &[Arc<StateFragment>] {
        &self.fragments
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<StateFragment>> {
        self.fragments.iter()
    }

    pub fn len(&self) -> usize {
        self.fragments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fragments.is_empty()
    }

    /// The linked program, if the pipeline has one.
    pub fn program(&self) -> Option<&Program> {
        match self.get(FragmentKind::ShaderProgram)?.value() {
            FragmentValue::ShaderProgram(p) => p.as_ref(),
            _ => None,
        }
    }

    /// Number of fragments shared by pointer with `other`.
    pub fn shared_with(&self, other: &StateContainer) -> usize {
        self.fragments
            .iter()
            .filter(|f| {
                other
                    .get(f.kind())
                    .map_or(false, |o| Arc::ptr_eq(o, f))
            })
            .count()
    }
}

fn share_if_equal(seed: FragmentSeed, parent: Option<&StateContainer>) -> Arc<StateFragment> {
    match seed {
        FragmentSeed::Shared(fragment) => fragment,
        FragmentSeed::Own(value) => match parent.and_then(|p| p.get(value.kind())) {
            Some(theirs) if *theirs.value() == value => theirs.clone(),
            _ => Arc::new(StateFragment::new(value)),
        },
    }
}

fn depth_stencil_fragments(info: &GraphicsPipelineInfo, out: &mut Vec<FragmentSeed>) {
    let ds = &info.depth_stencil;
    let ops = |face: &super::params::StencilFaceState| StencilOps {
        fail: face.fail_op,
        depth_fail: face.depth_fail_op,
        pass: face.pass_op,
    };
    let func = |face: &super::params::StencilFaceState| StencilFunc {
        compare: face.compare_op,
        reference: face.reference,
        read_mask: face.compare_mask,
    };

    out.extend(
        [
            FragmentValue::DepthTest(ds.depth_test),
            FragmentValue::DepthWrite(ds.depth_write),
            FragmentValue::DepthFunc(ds.depth_compare),
            FragmentValue::DepthBias(ds.depth_bias),
            FragmentValue::StencilTest(ds.stencil_test),
            FragmentValue::StencilOpFront(ops(&ds.front)),
            FragmentValue::StencilOpBack(ops(&ds.back)),
            FragmentValue::StencilFuncFront(func(&ds.front)),
            FragmentValue::StencilFuncBack(func(&ds.back)),
            FragmentValue::StencilWriteMaskFront(ds.front.write_mask),
            FragmentValue::StencilWriteMaskBack(ds.back.write_mask),
        ]
        .into_iter()
        .map(FragmentSeed::Own),
    );
}

fn rasterizer_fragments(info: &GraphicsPipelineInfo, out: &mut Vec<FragmentSeed>) {
    out.push(FragmentSeed::Own(FragmentValue::PolygonCulling(
        info.rasterizer.cull_mode,
    )));
    out.push(FragmentSeed::Own(FragmentValue::PolygonWinding(
        info.rasterizer.front_face,
    )));
}

// The implicit backend has a single blend state; attachment 0 drives it.
fn color_blend_fragments(info: &GraphicsPipelineInfo, out: &mut Vec<FragmentSeed>) {
    let Some(blend) = info.color_blend.attachments.first() else {
        return;
    };

    out.extend(
        [
            FragmentValue::BlendEnable(blend.blend_enable),
            FragmentValue::BlendFactors(BlendFactors {
                src_color: blend.src_color_factor,
                dst_color: blend.dst_color_factor,
                src_alpha: blend.src_alpha_factor,
                dst_alpha: blend.dst_alpha_factor,
            }),
            FragmentValue::BlendOp(BlendOps {
                color: blend.color_op,
                alpha: blend.alpha_op,
            }),
            FragmentValue::ColorWriteMask(blend.write_mask),
        ]
        .into_iter()
        .map(FragmentSeed::Own),
    );
}

fn viewport_fragments(info: &GraphicsPipelineInfo, out: &mut Vec<FragmentSeed>) {
    let vp = &info.viewport;
    out.push(FragmentSeed::Own(FragmentValue::ScissorTest(vp.scissor_test)));
    if let Some(viewport) = vp.viewport {
        out.push(FragmentSeed::Own(FragmentValue::Viewport(viewport)));
    }
    if let Some(scissor) = vp.scissor {
        out.push(FragmentSeed::Own(FragmentValue::Scissor(scissor)));
    }
}

fn input_fragments(info: &GraphicsPipelineInfo, out: &mut Vec<FragmentSeed>) {
    out.push(FragmentSeed::Own(FragmentValue::PrimitiveTopology(
        info.input_assembly.topology,
    )));
    out.push(FragmentSeed::Own(FragmentValue::VertexInput(Arc::new(
        info.vertex_input.clone(),
    ))));
}

fn tessellation_fragments(info: &GraphicsPipelineInfo, out: &mut Vec<FragmentSeed>) {
    if let Some(tess) = info.tessellation {
        out.push(FragmentSeed::Own(FragmentValue::TessPatchControlPoints(
            tess.patch_control_points,
        )));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::driver::types::*;
    use crate::gpu::pipeline::params::*;

    fn info() -> GraphicsPipelineInfo {
        GraphicsPipelineInfo {
            color_blend: ColorBlendState::single(ColorBlendAttachment::default()),
            ..Default::default()
        }
    }

    fn no_program() -> FragmentSeed {
        FragmentSeed::Own(FragmentValue::ShaderProgram(None))
    }

    #[test]
    fn fragments_are_sorted_and_unique() {
        let container = StateContainer::build(&info(), no_program(), None);
        let kinds: Vec<_> = container.iter().map(|f| f.kind()).collect();
        let mut sorted = kinds.clone();
        sorted.sort();
        sorted.dedup();
        assert_eq!(kinds, sorted);
        assert_eq!(kinds[0], FragmentKind::ShaderProgram);
        // No static viewport, scissor or tessellation state.
        assert_eq!(container.len(), FragmentKind::ALL.len() - 3);
    }

    #[test]
    fn child_shares_equal_fragments_and_links_the_rest() {
        let parent = StateContainer::build(&info(), no_program(), None);

        let mut child_info = info();
        child_info.depth_stencil.depth_test = true;
        child_info.rasterizer.cull_mode = CullMode::Back;
        let child = StateContainer::build(&child_info, no_program(), Some(&parent));

        assert_eq!(child.len(), parent.len());
        assert_eq!(child.shared_with(&parent), parent.len() - 2);

        let depth = child.get(FragmentKind::DepthTest).unwrap();
        assert_eq!(*depth.value(), FragmentValue::DepthTest(true));
        let linked = depth.parent().unwrap();
        assert!(Arc::ptr_eq(&linked, parent.get(FragmentKind::DepthTest).unwrap()));
    }

    #[test]
    fn kinds_missing_from_the_parent_stay_unlinked() {
        let parent = StateContainer::build(&info(), no_program(), None);

        let mut child_info = info();
        child_info.viewport.viewport = Some(Viewport::from_extent(16, 16));
        let child = StateContainer::build(&child_info, no_program(), Some(&parent));

        let viewport = child.get(FragmentKind::Viewport).unwrap();
        assert!(viewport.parent().is_none());
        assert!(parent.get(FragmentKind::Viewport).is_none());
    }

    #[test]
    fn shared_seed_is_kept_by_pointer() {
        let program = Arc::new(StateFragment::new(FragmentValue::ShaderProgram(None)));
        let container =
            StateContainer::build(&info(), FragmentSeed::Shared(program.clone()), None);
        assert!(Arc::ptr_eq(
            container.get(FragmentKind::ShaderProgram).unwrap(),
            &program
        ));
    }
}
