mod common;

use common::Fixture;
use pipestate::*;

fn viewport(width: f32) -> Viewport {
    Viewport {
        x: 0.0,
        y: 0.0,
        width,
        height: 480.0,
        min_depth: 0.0,
        max_depth: 1.0,
    }
}

fn triangle(vertex_count: u32) -> DrawArgs {
    DrawArgs {
        vertex_count,
        instance_count: 1,
        ..Default::default()
    }
}

/// A root pipeline reading one vec4 per attribute location from binding 0.
fn with_attributes(f: &mut Fixture, name: &str, locations: &[u32]) -> Handle<GraphicsPipeline> {
    let mut info = f.root_info(name);
    info.vertex_input = VertexInputState {
        bindings: vec![VertexBindingInfo {
            binding: 0,
            stride: 64,
            ..Default::default()
        }],
        attributes: locations
            .iter()
            .map(|&location| VertexAttributeInfo {
                location,
                binding: 0,
                format: VertexFormat::Vec4,
                offset: location * 16,
            })
            .collect(),
    };
    f.pipeline(&info)
}

fn enabled(f: &Fixture) -> Vec<f64> {
    f.log
        .named("enable_vertex_attrib_array")
        .iter()
        .filter_map(|c| c.arg(0))
        .collect()
}

fn disabled(f: &Fixture) -> Vec<f64> {
    f.log
        .named("disable_vertex_attrib_array")
        .iter()
        .filter_map(|c| c.arg(0))
        .collect()
}

#[test]
fn repeated_viewport_is_issued_once() {
    let mut f = Fixture::new();
    {
        let mut rec = f.ctx.immediate().unwrap();
        rec.set_viewport(viewport(640.0)).unwrap();
        rec.set_viewport(viewport(640.0)).unwrap();
    }
    assert_eq!(f.log.count("viewport"), 1);
    assert_eq!(f.log.count("depth_range"), 1);

    f.ctx
        .immediate()
        .unwrap()
        .set_viewport(viewport(800.0))
        .unwrap();
    assert_eq!(f.log.count("viewport"), 2);
    // Depth range did not move.
    assert_eq!(f.log.count("depth_range"), 1);
    assert_eq!(f.ctx.tracker().viewport.get(), Some(&viewport(800.0)));
}

#[test]
fn dynamic_setters_skip_unchanged_values() {
    let mut f = Fixture::new();
    let mut rec = f.ctx.immediate().unwrap();
    rec.set_line_width(1.0).unwrap();
    rec.set_blend_constants([0.0; 4]).unwrap();
    rec.set_blend_constants([1.0, 0.0, 0.0, 1.0]).unwrap();
    rec.set_blend_constants([1.0, 0.0, 0.0, 1.0]).unwrap();
    drop(rec);

    assert_eq!(f.log.count("line_width"), 0);
    assert_eq!(f.log.count("blend_color"), 1);
}

#[test]
fn dynamic_viewport_is_undone_by_a_rebind() {
    let mut f = Fixture::new();
    let mut info = f.root_info("fixed viewport");
    info.viewport.viewport = Some(viewport(640.0));
    let p = f.pipeline(&info);

    f.ctx.bind_graphics_pipeline(p).unwrap();
    assert_eq!(f.log.count("viewport"), 1);

    f.ctx
        .immediate()
        .unwrap()
        .set_viewport(viewport(320.0))
        .unwrap();
    f.log.clear();

    let report = f.ctx.bind_graphics_pipeline(p).unwrap();
    assert_eq!(report.relation, PipelineRelation::Identity);
    assert_eq!(report.applied, 1);
    assert_eq!(f.log.count("viewport"), 1);
    assert_eq!(f.log.named("viewport")[0].arg(2), Some(640.0));

    f.log.clear();
    f.ctx.bind_graphics_pipeline(p).unwrap();
    assert!(f.log.is_empty());
}

#[test]
fn dynamic_stencil_write_mask_is_undone_by_a_rebind() {
    let mut f = Fixture::new();
    let mut info = f.root_info("masked");
    info.depth_stencil.stencil_test = true;
    info.depth_stencil.front.write_mask = 0x0f;
    let p = f.pipeline(&info);
    f.ctx.bind_graphics_pipeline(p).unwrap();

    f.ctx
        .immediate()
        .unwrap()
        .set_stencil_write_mask(StencilFace::FRONT, 0xff)
        .unwrap();
    assert_eq!(f.ctx.tracker().stencil_write_mask[0].get(), Some(&0xff));
    f.log.clear();

    let report = f.ctx.bind_graphics_pipeline(p).unwrap();
    assert_eq!(report.relation, PipelineRelation::Identity);
    assert_eq!(report.applied, 1);
    let masks = f.log.named("stencil_mask_separate");
    assert_eq!(masks.len(), 1);
    assert_eq!(masks[0].arg(1), Some(15.0));
    assert_eq!(f.ctx.tracker().stencil_write_mask[0].get(), Some(&0x0f));
}

#[test]
fn overlapping_attribute_sets_only_toggle_the_difference() {
    let mut f = Fixture::new();
    let a = with_attributes(&mut f, "a", &[0, 1, 2]);
    let b = with_attributes(&mut f, "b", &[1, 2, 3]);
    let vertices = f.vertex_buffer(64 * 3);

    let mut rec = f.ctx.immediate().unwrap();
    rec.bind_vertex_buffer(0, &vertices, 0).unwrap();
    rec.bind_pipeline(a).unwrap();
    rec.draw(triangle(3)).unwrap();
    drop(rec);

    assert_eq!(enabled(&f), vec![0.0, 1.0, 2.0]);
    assert!(disabled(&f).is_empty());
    assert_eq!(f.ctx.tracker().attributes.enabled(), 0b0111);

    f.log.clear();
    let mut rec = f.ctx.immediate().unwrap();
    rec.bind_pipeline(b).unwrap();
    rec.draw(triangle(3)).unwrap();
    drop(rec);

    assert_eq!(enabled(&f), vec![3.0]);
    assert_eq!(disabled(&f), vec![0.0]);
    assert_eq!(f.ctx.tracker().attributes.enabled(), 0b1110);
    assert_eq!(f.ctx.tracker().attributes.pending(), 0);

    f.log.clear();
    f.ctx.immediate().unwrap().draw(triangle(3)).unwrap();
    assert!(enabled(&f).is_empty());
    assert!(disabled(&f).is_empty());
    assert_eq!(f.log.count("vertex_attrib_pointer"), 0);
    assert_eq!(f.log.count("draw_arrays_instanced"), 1);
}

#[test]
fn attributes_need_a_vertex_buffer() {
    let mut f = Fixture::new();
    let p = with_attributes(&mut f, "unfed", &[0]);

    let mut rec = f.ctx.immediate().unwrap();
    rec.bind_pipeline(p).unwrap();
    assert_eq!(rec.draw(triangle(3)), Err(GpuError::NotInitialised));
    drop(rec);
    assert_eq!(f.log.count("draw_arrays_instanced"), 0);
}

#[test]
fn drawing_needs_a_pipeline() {
    let mut f = Fixture::new();
    assert_eq!(
        f.ctx.immediate().unwrap().draw(triangle(3)),
        Err(GpuError::NotInitialised)
    );
}
