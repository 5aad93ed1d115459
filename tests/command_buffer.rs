mod common;

use common::Fixture;
use pipestate::gles::NullGles;
use pipestate::*;

const COMPUTE_SRC: &str = r"#version 310 es
layout(local_size_x = 64) in;
void main() {}
";

fn recorded(name: &str, f: impl FnOnce(&mut CommandBuffer)) -> CommandBuffer {
    let mut cmd = CommandBuffer::primary(name);
    cmd.begin().unwrap();
    f(&mut cmd);
    cmd.end().unwrap();
    cmd
}

#[test]
fn commands_run_on_submit() {
    let mut f = Fixture::new();
    let p = f.pipeline(&f.root_info("p"));

    let mut cmd = recorded("deferred", |cmd| {
        cmd.bind_pipeline(p).unwrap();
        cmd.set_line_width(2.0).unwrap();
    });
    assert_eq!(cmd.len(), 2);
    assert!(f.log.is_empty());
    assert_eq!(f.ctx.bound_pipeline(), BoundPipeline::None);

    f.ctx.submit(&mut cmd, &SubmitInfo::default()).unwrap();
    assert_eq!(f.ctx.bound_pipeline(), BoundPipeline::Graphics(p));
    assert_eq!(f.log.count("line_width"), 1);
    // The implicit backend finishes the work inside submit.
    assert_eq!(cmd.state(), CommandBufferState::Executable);
}

#[test]
fn recording_again_discards_earlier_commands() {
    let mut f = Fixture::new();
    let mut cmd = recorded("first", |cmd| {
        cmd.set_blend_constants([1.0; 4]).unwrap();
        cmd.set_blend_constants([0.5; 4]).unwrap();
    });
    f.ctx.submit(&mut cmd, &SubmitInfo::default()).unwrap();
    assert_eq!(f.log.count("blend_color"), 2);

    cmd.begin().unwrap();
    assert!(cmd.is_empty());
    cmd.set_line_width(3.0).unwrap();
    cmd.end().unwrap();
    assert_eq!(cmd.len(), 1);

    f.log.clear();
    f.ctx.submit(&mut cmd, &SubmitInfo::default()).unwrap();
    assert_eq!(f.log.count("blend_color"), 0);
    assert_eq!(f.log.count("line_width"), 1);
}

#[test]
fn recording_follows_begin_and_end() {
    let mut f = Fixture::new();
    let mut cmd = CommandBuffer::primary("states");
    assert_eq!(cmd.state(), CommandBufferState::Initial);
    assert_eq!(cmd.set_line_width(2.0), Err(GpuError::NotInitialised));

    cmd.begin().unwrap();
    assert_eq!(cmd.begin(), Err(GpuError::AlreadyInitialised));
    cmd.set_line_width(2.0).unwrap();
    assert_eq!(
        f.ctx.submit(&mut cmd, &SubmitInfo::default()),
        Err(GpuError::NotInitialised)
    );

    cmd.end().unwrap();
    assert_eq!(cmd.end(), Err(GpuError::NotInitialised));
    f.ctx.submit(&mut cmd, &SubmitInfo::default()).unwrap();

    cmd.reset();
    assert_eq!(cmd.state(), CommandBufferState::Initial);
    assert!(cmd.is_empty());
}

#[test]
fn secondaries_run_inside_a_primary() {
    let mut f = Fixture::new();
    let mut secondary = CommandBuffer::secondary("inner");
    secondary.begin().unwrap();
    secondary.set_line_width(4.0).unwrap();
    secondary.end().unwrap();

    assert_eq!(
        f.ctx.submit(&mut secondary, &SubmitInfo::default()),
        Err(GpuError::InvalidArgument)
    );

    let mut primary = recorded("outer", |cmd| {
        cmd.execute_secondary(&secondary).unwrap();
        cmd.set_blend_constants([1.0; 4]).unwrap();
    });
    f.ctx.submit(&mut primary, &SubmitInfo::default()).unwrap();

    let names: Vec<&str> = f.log.calls().iter().map(|c| c.name).collect();
    let line = names.iter().position(|n| *n == "line_width").unwrap();
    let blend = names.iter().position(|n| *n == "blend_color").unwrap();
    assert!(line < blend);
}

#[test]
fn fences_signal_once_the_work_is_done() {
    let mut f = Fixture::new();
    let fence = f.ctx.create_fence(false).unwrap();
    assert_eq!(f.ctx.fence_status(&fence), Ok(false));
    assert_eq!(
        f.ctx.wait_fence(&fence, 0),
        Err(GpuError::NotInitialised)
    );

    let mut cmd = recorded("fenced", |cmd| {
        cmd.set_line_width(2.0).unwrap();
    });
    f.ctx
        .submit(
            &mut cmd,
            &SubmitInfo {
                fence: Some(&fence),
                ..Default::default()
            },
        )
        .unwrap();
    assert_eq!(f.log.count("fence_sync"), 1);

    f.ctx.wait_fence(&fence, u64::MAX).unwrap();
    assert_eq!(f.ctx.fence_status(&fence), Ok(true));

    f.ctx.reset_fence(&fence).unwrap();
    assert_eq!(f.ctx.fence_status(&fence), Ok(false));

    let signaled = f.ctx.create_fence(true).unwrap();
    f.ctx.wait_fence(&signaled, 0).unwrap();
}

#[test]
fn dispatch_runs_the_bound_compute_pipeline() {
    let mut f = Fixture::new();
    let shader = f
        .ctx
        .create_shader(&ShaderInfo {
            debug_name: "cs",
            stage: ShaderStage::Compute,
            code: ShaderCode::Glsl(COMPUTE_SRC),
        })
        .unwrap();
    let pipeline = f
        .ctx
        .create_compute_pipeline(&ComputePipelineInfo {
            debug_name: "fill".to_string(),
            shader: Some(shader),
            layout: Some(f.layout.clone()),
        })
        .unwrap();
    f.log.clear();

    let mut rec = f.ctx.immediate().unwrap();
    assert_eq!(rec.dispatch(1, 1, 1), Err(GpuError::NotInitialised));
    rec.bind_compute_pipeline(pipeline).unwrap();
    rec.dispatch(4, 2, 1).unwrap();
    drop(rec);

    let dispatches = f.log.named("dispatch_compute");
    assert_eq!(dispatches.len(), 1);
    assert_eq!(dispatches[0].args, vec![4.0, 2.0, 1.0]);
    assert_eq!(
        f.ctx.bound_pipeline(),
        BoundPipeline::Compute(pipeline)
    );
}

#[test]
fn compute_pipelines_need_the_capability() {
    let mut f = Fixture::with_device(NullGles::new().without_compute());
    assert!(!f.ctx.capabilities().compute);
    let shader = f.ctx.create_shader(&ShaderInfo {
        debug_name: "cs",
        stage: ShaderStage::Compute,
        code: ShaderCode::Glsl(COMPUTE_SRC),
    });
    assert_eq!(shader.err(), Some(GpuError::UnsupportedRequest));
    assert_eq!(
        f.ctx
            .create_compute_pipeline(&ComputePipelineInfo {
                debug_name: "fill".to_string(),
                shader: None,
                layout: Some(f.layout.clone()),
            })
            .err(),
        Some(GpuError::UnsupportedRequest)
    );
}

#[test]
#[cfg_attr(debug_assertions, should_panic(expected = "capability"))]
fn dispatch_without_compute_is_dropped() {
    let mut f = Fixture::with_device(NullGles::new().without_compute());
    let result = f.ctx.immediate().unwrap().dispatch(1, 1, 1);
    assert_eq!(result, Ok(()));
    assert_eq!(f.log.count("dispatch_compute"), 0);
}
