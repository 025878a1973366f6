//! Cache keys derived from the render-state snapshot.
//!
//! The two keys read disjoint parts of the snapshot: [`PipelineKey`] covers
//! blend and raster state plus draw-target parameters, [`DepthStencilKey`]
//! covers depth and stencil state. The stencil reference value is not part
//! of either key; it is emitted per draw as dynamic state.

use std::hash::{Hash, Hasher};

use xxhash_rust::xxh3::Xxh3;

use crate::state::{BlendState, DepthState, RasterState, RenderStateSnapshot};
use crate::vertex::VertexLayoutHandle;

const DIAGNOSTIC_SEED: u64 = 0x6b69_6c6e;

fn diagnostic_hash(value: &impl Hash) -> u64 {
    let mut hasher = Xxh3::with_seed(DIAGNOSTIC_SEED);
    value.hash(&mut hasher);
    hasher.finish()
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct PipelineKey {
    pub blend: BlendState,
    pub raster: RasterState,
    pub color_format: wgpu::TextureFormat,
    pub sample_count: u32,
    pub topology: wgpu::PrimitiveTopology,
    pub vertex_layout: Option<VertexLayoutHandle>,
}

impl PipelineKey {
    /// Order-sensitive 64-bit hash for log correlation. Cache identity uses
    /// full equality, never this value.
    pub fn diagnostic_hash(&self) -> u64 {
        diagnostic_hash(self)
    }
}

/// Stencil fields that shape the compiled depth-stencil object.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct StencilKey {
    pub enabled: bool,
    pub func: u32,
    pub read_mask: u32,
    pub write_mask: u32,
    pub fail_op: u32,
    pub depth_fail_op: u32,
    pub pass_op: u32,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct DepthStencilKey {
    pub depth: DepthState,
    pub stencil: StencilKey,
}

impl DepthStencilKey {
    pub fn diagnostic_hash(&self) -> u64 {
        diagnostic_hash(self)
    }
}

/// Draw-invariant parameters that complete a [`PipelineKey`].
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct DrawTarget {
    pub color_format: wgpu::TextureFormat,
    pub sample_count: u32,
    pub topology: wgpu::PrimitiveTopology,
    pub vertex_layout: Option<VertexLayoutHandle>,
}

pub fn make_pipeline_key(snapshot: &RenderStateSnapshot, target: &DrawTarget) -> PipelineKey {
    PipelineKey {
        blend: snapshot.blend,
        raster: snapshot.raster,
        color_format: target.color_format,
        sample_count: target.sample_count.max(1),
        topology: target.topology,
        vertex_layout: target.vertex_layout,
    }
}

pub fn make_depth_stencil_key(snapshot: &RenderStateSnapshot) -> DepthStencilKey {
    let s = &snapshot.stencil;
    DepthStencilKey {
        depth: snapshot.depth,
        stencil: StencilKey {
            enabled: s.enabled,
            func: s.func,
            read_mask: s.read_mask,
            write_mask: s.write_mask,
            fail_op: s.fail_op,
            depth_fail_op: s.depth_fail_op,
            pass_op: s.pass_op,
        },
    }
}
