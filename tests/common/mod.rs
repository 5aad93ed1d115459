#![allow(dead_code)]

use pipestate::gles::null::{CallLog, NullGles};
use pipestate::*;

pub const VERTEX_SRC: &str = r"#version 310 es
layout(location = 0) in vec3 position;
void main() { gl_Position = vec4(position, 1.0); }
";

pub const FRAGMENT_SRC: &str = r"#version 310 es
precision mediump float;
layout(location = 0) out vec4 color;
void main() { color = vec4(1.0); }
";

/// A context on the null GL device plus everything a graphics pipeline
/// needs, so tests only spell out the state they care about.
pub struct Fixture {
    pub ctx: Context,
    pub log: CallLog,
    pub vertex: Shader,
    pub fragment: Shader,
    pub layout: PipelineLayout,
}

impl Fixture {
    pub fn new() -> Self {
        Self::with_device(NullGles::new())
    }

    pub fn with_device(gles: NullGles) -> Self {
        let _ = env_logger::builder().is_test(true).try_init();

        let log = gles.log();
        let mut ctx = Context::gles(
            gles,
            &ContextInfo {
                debug_name: "tests".to_string(),
                ..Default::default()
            },
        )
        .unwrap();

        let vertex = ctx
            .create_shader(&ShaderInfo {
                debug_name: "vs",
                stage: ShaderStage::Vertex,
                code: ShaderCode::Glsl(VERTEX_SRC),
            })
            .unwrap();
        let fragment = ctx
            .create_shader(&ShaderInfo {
                debug_name: "fs",
                stage: ShaderStage::Fragment,
                code: ShaderCode::Glsl(FRAGMENT_SRC),
            })
            .unwrap();
        let layout = ctx
            .create_pipeline_layout(&PipelineLayoutInfo {
                debug_name: "layout",
                ..Default::default()
            })
            .unwrap();

        log.clear();
        Self {
            ctx,
            log,
            vertex,
            fragment,
            layout,
        }
    }

    /// Complete parameters for a root pipeline with default state.
    pub fn root_info(&self, name: &str) -> GraphicsPipelineInfo {
        GraphicsPipelineInfo {
            debug_name: name.to_string(),
            color_blend: ColorBlendState::single(ColorBlendAttachment::default()),
            shader_stages: ShaderStages::new(&self.vertex, &self.fragment),
            layout: Some(self.layout.clone()),
            parentable: true,
            ..Default::default()
        }
    }

    /// Parameters for a child of `parent` that inherits everything it does
    /// not override.
    pub fn child_info(&self, name: &str, parent: Handle<GraphicsPipeline>) -> GraphicsPipelineInfo {
        GraphicsPipelineInfo {
            debug_name: name.to_string(),
            parent: Some(parent),
            parentable: true,
            ..Default::default()
        }
    }

    pub fn pipeline(&mut self, info: &GraphicsPipelineInfo) -> Handle<GraphicsPipeline> {
        let handle = self.ctx.create_graphics_pipeline(info).unwrap();
        self.log.clear();
        handle
    }

    /// Fragment count of a pipeline.
    pub fn fragments(&self, pipeline: Handle<GraphicsPipeline>) -> usize {
        self.ctx.pipeline(pipeline).unwrap().container().len()
    }

    pub fn vertex_buffer(&mut self, bytes: u64) -> Buffer {
        let buffer = self
            .ctx
            .create_buffer(&BufferInfo {
                debug_name: "vertices",
                byte_size: bytes,
                usage: BufferUsage::VERTEX,
                ..Default::default()
            })
            .unwrap();
        self.log.clear();
        buffer
    }
}
