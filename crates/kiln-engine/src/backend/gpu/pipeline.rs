//! Key → wgpu state translation.
//!
//! wgpu bakes depth-stencil state into the render pipeline, so a compiled
//! pipeline is a template and the concrete `wgpu::RenderPipeline` for each
//! depth-stencil object it meets is built on first use and memoized.
//! Builds run inside a validation error scope, so a rejected state comes back
//! as [`BackendError::Compilation`] and is never memoized.

use std::sync::Arc;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;

use crate::encoder::FRONT_FACE;
use crate::error::BackendError;
use crate::key::{DepthStencilKey, PipelineKey};
use crate::state::tokens;
use crate::vertex::VertexLayoutDesc;

pub const DEPTH_STENCIL_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth24PlusStencil8;

#[derive(Debug)]
pub struct PipelineTemplate {
    pub key: PipelineKey,
    vertex_stride: u64,
    attributes: Vec<wgpu::VertexAttribute>,
    color_target: wgpu::ColorTargetState,
    primitive: wgpu::PrimitiveState,
    multisample: wgpu::MultisampleState,
    variants: Mutex<FxHashMap<DepthStencilKey, Arc<wgpu::RenderPipeline>>>,
}

#[derive(Debug, Clone)]
pub struct WgpuDepthStencil {
    pub key: DepthStencilKey,
    pub state: wgpu::DepthStencilState,
}

impl WgpuDepthStencil {
    pub fn new(key: &DepthStencilKey) -> Self {
        Self {
            key: *key,
            state: depth_stencil_state(key),
        }
    }
}

fn is_float_input(format: wgpu::VertexFormat) -> bool {
    use wgpu::VertexFormat as F;
    !matches!(
        format,
        F::Uint8x2
            | F::Uint8x4
            | F::Sint8x2
            | F::Sint8x4
            | F::Uint16x2
            | F::Uint16x4
            | F::Sint16x2
            | F::Sint16x4
            | F::Uint32
            | F::Uint32x2
            | F::Uint32x3
            | F::Uint32x4
            | F::Sint32
            | F::Sint32x2
            | F::Sint32x3
            | F::Sint32x4
    )
}

impl PipelineTemplate {
    pub fn new(key: &PipelineKey, layout: Option<&VertexLayoutDesc>) -> Result<Self, BackendError> {
        let (vertex_stride, attributes) = match layout {
            Some(desc) => {
                // The shader reads location 0 as vec4<f32>.
                match desc.elements.iter().find(|e| e.shader_location == 0) {
                    Some(e) if is_float_input(e.format) => {}
                    Some(e) => {
                        return Err(BackendError::Compilation(format!(
                            "location 0 must be float-typed, got {:?}",
                            e.format
                        )));
                    }
                    None => {
                        return Err(BackendError::Compilation(
                            "vertex layout has no attribute at location 0".into(),
                        ));
                    }
                }
                (desc.stride, desc.attributes())
            }
            None => (0, Vec::new()),
        };

        let blend = key.blend.enabled.then(|| wgpu::BlendState {
            color: tokens::blend_component(key.blend.src_rgb, key.blend.dst_rgb, key.blend.equation_rgb),
            alpha: tokens::blend_component(
                key.blend.src_alpha,
                key.blend.dst_alpha,
                key.blend.equation_alpha,
            ),
        });

        Ok(Self {
            key: *key,
            vertex_stride,
            attributes,
            color_target: wgpu::ColorTargetState {
                format: key.color_format,
                blend,
                write_mask: wgpu::ColorWrites::ALL,
            },
            primitive: wgpu::PrimitiveState {
                topology: key.topology,
                strip_index_format: None,
                front_face: FRONT_FACE,
                cull_mode: tokens::cull_mode(key.raster.cull_enabled, key.raster.cull_face),
                unclipped_depth: false,
                polygon_mode: wgpu::PolygonMode::Fill,
                conservative: false,
            },
            multisample: wgpu::MultisampleState {
                count: key.sample_count,
                mask: !0,
                alpha_to_coverage_enabled: false,
            },
            variants: Mutex::new(FxHashMap::default()),
        })
    }

    pub fn has_vertex_input(&self) -> bool {
        !self.attributes.is_empty()
    }

    /// Returns the render pipeline for `depth_stencil`, building it once.
    pub fn realize(
        &self,
        device: &wgpu::Device,
        shader: &wgpu::ShaderModule,
        layout: &wgpu::PipelineLayout,
        depth_stencil: &WgpuDepthStencil,
        label: Option<&str>,
    ) -> Result<Arc<wgpu::RenderPipeline>, BackendError> {
        let mut variants = self.variants.lock();
        if let Some(pipeline) = variants.get(&depth_stencil.key) {
            return Ok(pipeline.clone());
        }

        let buffers = [wgpu::VertexBufferLayout {
            array_stride: self.vertex_stride,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &self.attributes,
        }];
        let (entry_point, buffers): (&str, &[wgpu::VertexBufferLayout]) = if self.has_vertex_input() {
            ("vs_main", &buffers)
        } else {
            ("vs_generated", &[])
        };

        let scope = device.push_error_scope(wgpu::ErrorFilter::Validation);
        let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label,
            layout: Some(layout),
            vertex: wgpu::VertexState {
                module: shader,
                entry_point: Some(entry_point),
                compilation_options: Default::default(),
                buffers,
            },
            fragment: Some(wgpu::FragmentState {
                module: shader,
                entry_point: Some("fs_main"),
                compilation_options: Default::default(),
                targets: &[Some(self.color_target.clone())],
            }),
            primitive: self.primitive,
            depth_stencil: Some(depth_stencil.state.clone()),
            multisample: self.multisample,
            multiview_mask: None,
            cache: None,
        });
        if let Some(err) = pollster::block_on(scope.pop()) {
            return Err(BackendError::Compilation(format!(
                "pipeline {:#018x} x depth-stencil {:#018x}: {err}",
                self.key.diagnostic_hash(),
                depth_stencil.key.diagnostic_hash()
            )));
        }

        let pipeline = Arc::new(pipeline);
        log::debug!(
            "realized pipeline {:#018x} x depth-stencil {:#018x}",
            self.key.diagnostic_hash(),
            depth_stencil.key.diagnostic_hash()
        );
        variants.insert(depth_stencil.key, pipeline.clone());
        Ok(pipeline)
    }
}

fn stencil_face(key: &DepthStencilKey) -> wgpu::StencilFaceState {
    wgpu::StencilFaceState {
        compare: tokens::compare_function(key.stencil.func),
        fail_op: tokens::stencil_operation(key.stencil.fail_op),
        depth_fail_op: tokens::stencil_operation(key.stencil.depth_fail_op),
        pass_op: tokens::stencil_operation(key.stencil.pass_op),
    }
}

/// Legacy depth writes only happen while the depth test is enabled.
pub fn depth_stencil_state(key: &DepthStencilKey) -> wgpu::DepthStencilState {
    let depth = &key.depth;
    let stencil = if key.stencil.enabled {
        let face = stencil_face(key);
        wgpu::StencilState {
            front: face,
            back: face,
            read_mask: key.stencil.read_mask & 0xFF,
            write_mask: key.stencil.write_mask & 0xFF,
        }
    } else {
        wgpu::StencilState::default()
    };

    wgpu::DepthStencilState {
        format: DEPTH_STENCIL_FORMAT,
        depth_write_enabled: depth.test_enabled && depth.write_enabled,
        depth_compare: if depth.test_enabled {
            tokens::compare_function(depth.compare)
        } else {
            wgpu::CompareFunction::Always
        },
        stencil,
        bias: wgpu::DepthBiasState::default(),
    }
}
