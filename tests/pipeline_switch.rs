mod common;

use common::Fixture;
use pipestate::gles::api::{BACK, CULL_FACE, DEPTH_TEST, EQUAL, FRONT, LESS};
use pipestate::*;

const UNRESOLVED_SRC: &str = r"#version 310 es
precision mediump float;
layout(location = 0) out vec4 color;
vec4 undefined_symbol();
void main() { color = undefined_symbol(); }
";

/// Root `q` with two children: `p1` turns on depth testing, `p2` culls back
/// faces.
fn family(f: &mut Fixture) -> [Handle<GraphicsPipeline>; 3] {
    let q = f.pipeline(&f.root_info("q"));

    let mut one = f.child_info("p1", q);
    one.depth_stencil.depth_test = true;
    let p1 = f.pipeline(&one);

    let mut two = f.child_info("p2", q);
    two.rasterizer.cull_mode = CullMode::Back;
    let p2 = f.pipeline(&two);

    [q, p1, p2]
}

#[test]
fn binding_twice_issues_nothing_the_second_time() {
    let mut f = Fixture::new();
    let p = f.pipeline(&f.root_info("p"));

    let first = f.ctx.bind_graphics_pipeline(p).unwrap();
    assert_eq!(first.relation, PipelineRelation::NullToPipeline);
    assert_eq!(first.applied, f.fragments(p));
    assert!(!f.log.is_empty());

    f.log.clear();
    let second = f.ctx.bind_graphics_pipeline(p).unwrap();
    assert_eq!(second.relation, PipelineRelation::Identity);
    assert_eq!(second.total(), 0);
    assert!(f.log.is_empty(), "{:?}", f.log.calls());
}

#[test]
fn parent_and_child_classify_both_ways() {
    let mut f = Fixture::new();
    let [q, p1, _] = family(&mut f);

    let c = |a, b| f.ctx.relation(Some(a), Some(b));
    assert_eq!(c(q, q), PipelineRelation::Identity);
    assert_eq!(c(q, p1), PipelineRelation::FatherChild);
    assert_eq!(c(p1, q), PipelineRelation::ChildFather);
}

#[test]
fn child_applies_only_what_it_overrides() {
    let mut f = Fixture::new();
    let [q, p1, _] = family(&mut f);

    f.ctx.bind_graphics_pipeline(q).unwrap();
    f.log.clear();

    let down = f.ctx.bind_graphics_pipeline(p1).unwrap();
    assert_eq!(down.relation, PipelineRelation::FatherChild);
    assert_eq!(down.applied, 1);
    assert_eq!(down.restored, 0);
    assert_eq!(f.log.len(), 1);
    assert_eq!(f.log.named("enable")[0].arg(0), Some(DEPTH_TEST as f64));

    f.log.clear();
    let up = f.ctx.bind_graphics_pipeline(q).unwrap();
    assert_eq!(up.relation, PipelineRelation::ChildFather);
    assert_eq!(up.applied, 0);
    assert_eq!(up.restored, 1);
    assert_eq!(f.log.len(), 1);
    assert_eq!(f.log.named("disable")[0].arg(0), Some(DEPTH_TEST as f64));
}

#[test]
fn leaving_a_child_resets_what_the_parent_never_set() {
    let mut f = Fixture::new();
    let q = f.pipeline(&f.root_info("q"));
    let mut info = f.child_info("scissored", q);
    info.viewport.scissor_test = true;
    info.viewport.scissor = Some(Rect2D { x: 0, y: 0, w: 16, h: 16 });
    let p = f.pipeline(&info);
    assert_eq!(f.fragments(p), f.fragments(q) + 1);

    f.ctx.bind_graphics_pipeline(q).unwrap();
    let down = f.ctx.bind_graphics_pipeline(p).unwrap();
    assert_eq!(down.applied, 2);

    f.log.clear();
    let up = f.ctx.bind_graphics_pipeline(q).unwrap();
    assert_eq!(up.restored, 2);
    // Scissor test goes back to the parent's value; the rectangle has no
    // default and is left alone.
    assert_eq!(f.log.count("disable"), 1);
    assert_eq!(f.log.count("scissor"), 0);
    assert_eq!(f.ctx.tracker().scissor_test.get(), Some(&false));
}

#[test]
fn siblings_cost_an_unset_plus_an_apply() {
    let mut f = Fixture::new();
    let [q, p1, p2] = family(&mut f);
    assert_eq!(
        f.ctx.relation(Some(p1), Some(p2)),
        PipelineRelation::Siblings
    );

    f.ctx.bind_graphics_pipeline(p1).unwrap();
    f.log.clear();
    let across = f.ctx.bind_graphics_pipeline(p2).unwrap();
    assert_eq!(across.relation, PipelineRelation::Siblings);
    assert!(across.total() <= f.fragments(p2));
    let sideways = f.log.len();
    assert_eq!(f.log.named("disable")[0].arg(0), Some(DEPTH_TEST as f64));
    assert_eq!(f.log.named("enable")[0].arg(0), Some(CULL_FACE as f64));

    f.ctx.bind_graphics_pipeline(p1).unwrap();
    f.log.clear();
    f.ctx.bind_graphics_pipeline(q).unwrap();
    let up = f.log.len();
    f.log.clear();
    f.ctx.bind_graphics_pipeline(p2).unwrap();
    let down = f.log.len();

    assert_eq!(sideways, up + down);
}

#[test]
fn siblings_overriding_the_same_kind_pass_through_the_parent() {
    let mut f = Fixture::new();
    let q = f.pipeline(&f.root_info("q"));
    let mut one = f.child_info("greater", q);
    one.depth_stencil.depth_compare = CompareOp::Greater;
    let p1 = f.pipeline(&one);
    let mut two = f.child_info("equal", q);
    two.depth_stencil.depth_compare = CompareOp::Equal;
    let p2 = f.pipeline(&two);

    f.ctx.bind_graphics_pipeline(p1).unwrap();
    f.log.clear();
    let across = f.ctx.bind_graphics_pipeline(p2).unwrap();
    assert_eq!(across.relation, PipelineRelation::Siblings);
    assert_eq!(across.restored, 1);
    assert_eq!(across.applied, 1);
    let funcs: Vec<_> = f
        .log
        .named("depth_func")
        .iter()
        .filter_map(|c| c.arg(0))
        .collect();
    assert_eq!(funcs, vec![LESS as f64, EQUAL as f64]);
    assert_eq!(f.ctx.tracker().depth_func.get(), Some(&CompareOp::Equal));
    let sideways = f.log.len();

    f.ctx.bind_graphics_pipeline(p1).unwrap();
    f.log.clear();
    f.ctx.bind_graphics_pipeline(q).unwrap();
    let up = f.log.len();
    f.log.clear();
    f.ctx.bind_graphics_pipeline(p2).unwrap();
    let down = f.log.len();

    assert_eq!(sideways, up + down);
}

#[test]
fn stencil_write_mask_follows_the_bound_pipeline() {
    let mut f = Fixture::new();
    let q = f.pipeline(&f.root_info("q"));
    let mut info = f.child_info("masked", q);
    info.depth_stencil.stencil_test = true;
    info.depth_stencil.front.write_mask = 0x0f;
    info.depth_stencil.back.write_mask = 0x0f;
    let p = f.pipeline(&info);
    assert_eq!(f.fragments(p), f.fragments(q));

    f.ctx.bind_graphics_pipeline(q).unwrap();
    f.log.clear();
    let down = f.ctx.bind_graphics_pipeline(p).unwrap();
    assert_eq!(down.applied, 3);
    let masks = f.log.named("stencil_mask_separate");
    assert_eq!(masks.len(), 2);
    assert_eq!(masks[0].args, vec![FRONT as f64, 15.0]);
    assert_eq!(masks[1].args, vec![BACK as f64, 15.0]);
    assert_eq!(f.ctx.tracker().stencil_write_mask[0].get(), Some(&0x0f));

    f.log.clear();
    let up = f.ctx.bind_graphics_pipeline(q).unwrap();
    assert_eq!(up.restored, 3);
    assert_eq!(f.log.count("stencil_mask_separate"), 2);
    assert_eq!(f.ctx.tracker().stencil_write_mask[0].get(), Some(&!0));
    assert_eq!(f.ctx.tracker().stencil_write_mask[1].get(), Some(&!0));
}

#[test]
fn a_program_that_fails_to_link_leaves_nothing_behind() {
    let mut f = Fixture::new();
    let unresolved = f
        .ctx
        .create_shader(&ShaderInfo {
            debug_name: "unresolved",
            stage: ShaderStage::Fragment,
            code: ShaderCode::Glsl(UNRESOLVED_SRC),
        })
        .unwrap();
    let mut info = f.root_info("unlinkable");
    info.shader_stages = ShaderStages::new(&f.vertex, &unresolved);
    let before = f.ctx.live_resource_count();
    f.log.clear();

    assert_eq!(
        f.ctx.create_graphics_pipeline(&info),
        Err(GpuError::InvalidData)
    );
    assert_eq!(f.ctx.live_resource_count(), before);
    assert_eq!(f.log.count("link_program"), 1);
    assert_eq!(f.log.count("delete_program"), 1);

    // The failure leaves the context usable.
    let p = f.pipeline(&f.root_info("linkable"));
    f.ctx.bind_graphics_pipeline(p).unwrap();
}

#[test]
fn unrelated_pipelines_apply_everything() {
    let mut f = Fixture::new();
    let a = f.pipeline(&f.root_info("a"));
    let mut info = f.root_info("b");
    info.depth_stencil.depth_compare = CompareOp::LessOrEqual;
    let b = f.pipeline(&info);

    f.ctx.bind_graphics_pipeline(a).unwrap();
    let report = f.ctx.bind_graphics_pipeline(b).unwrap();
    assert_eq!(report.relation, PipelineRelation::Unrelated);
    assert_eq!(report.applied, f.fragments(b));
}

#[test]
fn children_outlive_their_parent() {
    let mut f = Fixture::new();
    let [q, p1, p2] = family(&mut f);

    f.ctx.destroy_graphics_pipeline(q).unwrap();
    assert!(f.ctx.pipeline(q).is_none());
    assert!(f.ctx.pipeline(p1).unwrap().parent().is_some());

    f.ctx.bind_graphics_pipeline(p1).unwrap();
    let report = f.ctx.bind_graphics_pipeline(p2).unwrap();
    assert_eq!(report.relation, PipelineRelation::Unrelated);
    assert_eq!(f.ctx.tracker().depth_test.get(), Some(&false));
    assert_eq!(f.ctx.tracker().cull_mode.get(), Some(&CullMode::Back));

    let mut orphan = f.child_info("orphan", q);
    orphan.depth_stencil.depth_write = false;
    assert_eq!(
        f.ctx.create_graphics_pipeline(&orphan),
        Err(GpuError::InvalidArgument)
    );
}

#[test]
fn destroying_the_bound_pipeline_unbinds_it() {
    let mut f = Fixture::new();
    let [_, p1, _] = family(&mut f);

    f.ctx.bind_graphics_pipeline(p1).unwrap();
    f.ctx.destroy_graphics_pipeline(p1).unwrap();
    assert_eq!(f.ctx.bound_pipeline(), BoundPipeline::None);
    assert_eq!(
        f.ctx.bind_graphics_pipeline(p1),
        Err(GpuError::InvalidArgument)
    );
}

#[test]
fn reset_puts_defaults_back() {
    let mut f = Fixture::new();
    let [_, p1, _] = family(&mut f);

    f.ctx.bind_graphics_pipeline(p1).unwrap();
    f.log.clear();
    let report = f.ctx.reset_pipeline();
    assert_eq!(report.relation, PipelineRelation::PipelineToNull);
    assert_eq!(f.log.named("disable")[0].arg(0), Some(DEPTH_TEST as f64));
    assert_eq!(f.log.count("use_program"), 1);
    assert_eq!(f.ctx.bound_pipeline(), BoundPipeline::None);

    f.log.clear();
    assert_eq!(f.ctx.reset_pipeline().relation, PipelineRelation::NullToNull);
    assert!(f.log.is_empty());
}

#[test]
fn push_and_pop_restore_the_saved_pipeline() {
    let mut f = Fixture::new();
    let [_, p1, p2] = family(&mut f);

    f.ctx.bind_graphics_pipeline(p1).unwrap();
    f.ctx.push_pipeline();
    f.ctx.bind_graphics_pipeline(p2).unwrap();
    assert_eq!(f.ctx.pipeline_stack_depth(), 1);

    f.ctx.pop_pipeline().unwrap();
    assert_eq!(f.ctx.bound_pipeline(), BoundPipeline::Graphics(p1));
    assert_eq!(f.ctx.tracker().depth_test.get(), Some(&true));
    assert_eq!(f.ctx.tracker().cull_mode.get(), Some(&CullMode::None));
    assert_eq!(f.ctx.pipeline_stack_depth(), 0);

    // An unmatched pop is reported and ignored.
    f.ctx.pop_pipeline().unwrap();
    assert_eq!(f.ctx.bound_pipeline(), BoundPipeline::Graphics(p1));
}
