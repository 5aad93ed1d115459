pub mod container;
pub mod fragment;
pub mod params;
pub mod relation;

pub use container::*;
pub use fragment::{FragmentKind, FragmentMask, FragmentValue, StateFragment};
pub use params::*;
pub use relation::{BindReport, PipelineRelation};

use crate::gpu::error::{GpuError, Result};
use crate::gpu::resource::{PipelineLayout, PipelineObject, Program};
use crate::utils::Handle;

/// Longest parent chain a pipeline may end. Keeps relationship walks
/// bounded and rules out cycles.
pub const MAX_PIPELINE_DEPTH: usize = 16;

/// A graphics pipeline owned by a context's pipeline arena.
#[derive(Debug)]
pub struct GraphicsPipeline {
    pub(crate) info: GraphicsPipelineInfo,
    pub(crate) container: StateContainer,
    pub(crate) parent: Option<Handle<GraphicsPipeline>>,
    pub(crate) depth: usize,
    pub(crate) native: Option<PipelineObject>,
}

impl GraphicsPipeline {
    /// Creation parameters with everything inherited from the parent filled
    /// in.
    pub fn info(&self) -> &GraphicsPipelineInfo {
        &self.info
    }

    pub fn container(&self) -> &StateContainer {
        &self.container
    }

    pub fn parent(&self) -> Option<Handle<GraphicsPipeline>> {
        self.parent
    }

    /// Number of ancestors.
    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn is_parentable(&self) -> bool {
        self.info.parentable
    }

    pub fn program(&self) -> Option<&Program> {
        self.container.program()
    }

    pub fn layout(&self) -> Option<&PipelineLayout> {
        self.info.layout.as_ref()
    }

    /// The monolithic native pipeline. Only the explicit backend has one.
    pub fn native(&self) -> Option<&PipelineObject> {
        self.native.as_ref()
    }
}

#[derive(Debug)]
pub struct ComputePipeline {
    pub(crate) info: ComputePipelineInfo,
    pub(crate) program: Program,
    pub(crate) native: Option<PipelineObject>,
}

impl ComputePipeline {
    pub fn info(&self) -> &ComputePipelineInfo {
        &self.info
    }

    pub fn program(&self) -> &Program {
        &self.program
    }

    pub fn native(&self) -> Option<&PipelineObject> {
        self.native.as_ref()
    }
}

/// Fills in every field `info` leaves empty from the parent's resolved
/// parameters and checks that the result is complete enough to build.
pub fn resolve_info(
    info: &GraphicsPipelineInfo,
    parent: Option<&GraphicsPipeline>,
) -> Result<GraphicsPipelineInfo> {
    let mut resolved = info.clone();

    if let Some(parent) = parent {
        let theirs = &parent.info;
        if resolved.layout.is_none() {
            resolved.layout = theirs.layout.clone();
        }
        if resolved.color_blend.attachments.is_empty() {
            resolved.color_blend = theirs.color_blend.clone();
        }
        if resolved.render_pass.is_none() {
            resolved.render_pass = theirs.render_pass.clone();
            resolved.subpass = theirs.subpass;
        }
        if resolved.tessellation.is_none() {
            resolved.tessellation = theirs.tessellation;
        }
        if resolved.viewport.viewport.is_none() {
            resolved.viewport.viewport = theirs.viewport.viewport;
        }
        if resolved.viewport.scissor.is_none() {
            resolved.viewport.scissor = theirs.viewport.scissor;
        }
        if resolved.vertex_input.bindings.is_empty() && resolved.vertex_input.attributes.is_empty()
        {
            resolved.vertex_input = theirs.vertex_input.clone();
        }
        resolved.shader_stages = info.shader_stages.merged_with(&theirs.shader_stages);
    }

    if resolved.layout.is_none() {
        log::error!("pipeline '{}' has no pipeline layout", info.debug_name);
        return Err(GpuError::NotInitialised);
    }
    if resolved.color_blend.attachments.is_empty() {
        log::error!(
            "pipeline '{}' has no color blend attachment state",
            info.debug_name
        );
        return Err(GpuError::NotInitialised);
    }
    if !resolved.shader_stages.is_complete() {
        log::error!(
            "pipeline '{}' needs a vertex and a fragment stage, directly or through its parent",
            info.debug_name
        );
        return Err(GpuError::InvalidData);
    }

    Ok(resolved)
}

/// Builds a graphics pipeline.
///
/// `link` turns the resolved shader stages into a program. It is not called
/// when the pipeline names no stages of its own and shares its parent's
/// program fragment instead.
pub fn build_graphics(
    info: &GraphicsPipelineInfo,
    parent: Option<(Handle<GraphicsPipeline>, &GraphicsPipeline)>,
    max_depth: usize,
    link: impl FnOnce(&ShaderStages) -> Result<Program>,
) -> Result<GraphicsPipeline> {
    let depth = match parent {
        Some((_, p)) if !p.is_parentable() => {
            log::error!(
                "pipeline '{}' names '{}' as parent, which is not parentable",
                info.debug_name,
                p.info.debug_name
            );
            return Err(GpuError::InvalidArgument);
        }
        Some((_, p)) if p.depth + 1 > max_depth => {
            log::error!(
                "pipeline '{}' would sit {} levels below its root (limit {})",
                info.debug_name,
                p.depth + 1,
                max_depth
            );
            return Err(GpuError::InvalidArgument);
        }
        Some((_, p)) => p.depth + 1,
        None => 0,
    };

    let parent_pipeline = parent.map(|(_, p)| p);
    let resolved = resolve_info(info, parent_pipeline)?;

    let inherited_program = parent_pipeline
        .filter(|_| info.shader_stages.is_empty())
        .and_then(|p| p.container.get(FragmentKind::ShaderProgram));

    let seed = match inherited_program {
        Some(fragment) => FragmentSeed::Shared(fragment.clone()),
        None => {
            let program = link(&resolved.shader_stages)?;
            FragmentSeed::Own(FragmentValue::ShaderProgram(Some(program)))
        }
    };

    let container = StateContainer::build(&resolved, seed, parent_pipeline.map(|p| &p.container));

    log::debug!(
        "built pipeline '{}' with {} fragments ({} shared with parent)",
        info.debug_name,
        container.len(),
        parent_pipeline.map_or(0, |p| container.shared_with(&p.container))
    );

    Ok(GraphicsPipeline {
        info: resolved,
        container,
        parent: parent.map(|(h, _)| h),
        depth,
        native: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::driver::types::*;
    use crate::gpu::resource::*;
    use std::sync::Arc;

    struct Fixture {
        ctx: Arc<ContextShared>,
        layout: PipelineLayout,
        vs: Shader,
        fs: Shader,
    }

    impl Fixture {
        fn new() -> Self {
            let ctx = Arc::new(ContextShared::new("pipeline-tests"));
            let layout = Resource::new(
                &ctx,
                NativeObject::Null,
                PipelineLayoutDesc {
                    debug_name: "layout".into(),
                    sets: Vec::new(),
                    push_constant_bytes: 0,
                },
            );
            let shader = |stage| {
                Resource::new(
                    &ctx,
                    NativeObject::Null,
                    ShaderDesc {
                        debug_name: String::new(),
                        stage,
                    },
                )
            };
            let vs = shader(ShaderStage::Vertex);
            let fs = shader(ShaderStage::Fragment);
            Self { ctx, layout, vs, fs }
        }

        fn root_info(&self) -> GraphicsPipelineInfo {
            GraphicsPipelineInfo {
                debug_name: "root".into(),
                layout: Some(self.layout.clone()),
                color_blend: ColorBlendState::single(ColorBlendAttachment::default()),
                shader_stages: ShaderStages::new(&self.vs, &self.fs),
                parentable: true,
                ..Default::default()
            }
        }

        fn link(&self, stages: &ShaderStages) -> Result<Program> {
            Ok(Resource::new(
                &self.ctx,
                NativeObject::Null,
                ProgramDesc {
                    stages: stages.iter().cloned().collect(),
                },
            ))
        }
    }

    #[test]
    fn missing_layout_is_not_initialised() {
        let f = Fixture::new();
        let mut info = f.root_info();
        info.layout = None;
        let err = build_graphics(&info, None, MAX_PIPELINE_DEPTH, |s| f.link(s)).unwrap_err();
        assert_eq!(err, GpuError::NotInitialised);
    }

    #[test]
    fn missing_stages_without_parent_is_invalid_data() {
        let f = Fixture::new();
        let mut info = f.root_info();
        info.shader_stages.fragment = None;
        let err = build_graphics(&info, None, MAX_PIPELINE_DEPTH, |s| f.link(s)).unwrap_err();
        assert_eq!(err, GpuError::InvalidData);
    }

    #[test]
    fn child_inherits_program_layout_and_blend() {
        let f = Fixture::new();
        let root = build_graphics(&f.root_info(), None, MAX_PIPELINE_DEPTH, |s| f.link(s)).unwrap();
        let root_handle = Handle::new(0, 0);

        let child_info = GraphicsPipelineInfo {
            debug_name: "child".into(),
            depth_stencil: DepthStencilState {
                depth_test: true,
                ..Default::default()
            },
            parent: Some(root_handle),
            ..Default::default()
        };
        let child = build_graphics(
            &child_info,
            Some((root_handle, &root)),
            MAX_PIPELINE_DEPTH,
            |_| panic!("child has no stages of its own"),
        )
        .unwrap();

        assert_eq!(child.depth(), 1);
        assert_eq!(child.layout(), root.layout());
        assert_eq!(child.program(), root.program());
        assert_eq!(
            child.container().shared_with(root.container()),
            root.container().len() - 1
        );
    }

    #[test]
    fn non_parentable_parent_is_rejected() {
        let f = Fixture::new();
        let mut info = f.root_info();
        info.parentable = false;
        let root = build_graphics(&info, None, MAX_PIPELINE_DEPTH, |s| f.link(s)).unwrap();

        let err = build_graphics(
            &GraphicsPipelineInfo::default(),
            Some((Handle::new(0, 0), &root)),
            MAX_PIPELINE_DEPTH,
            |s| f.link(s),
        )
        .unwrap_err();
        assert_eq!(err, GpuError::InvalidArgument);
    }

    #[test]
    fn depth_limit_is_enforced() {
        let f = Fixture::new();
        let root = build_graphics(&f.root_info(), None, 1, |s| f.link(s)).unwrap();
        let mut child_info = f.root_info();
        child_info.debug_name = "child".into();
        let child =
            build_graphics(&child_info, Some((Handle::new(0, 0), &root)), 1, |s| f.link(s))
                .unwrap();

        let err = build_graphics(&child_info, Some((Handle::new(1, 0), &child)), 1, |s| {
            f.link(s)
        })
        .unwrap_err();
        assert_eq!(err, GpuError::InvalidArgument);
    }
}
