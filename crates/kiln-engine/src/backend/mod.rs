//! Backend seam.
//!
//! The state tracker, caches and allocator are backend-agnostic. A
//! [`Backend`] compiles cache keys into objects, owns GPU memory and turns
//! [`EncoderConfig`]s into recorded work.
//!
//! Two implementations ship with the crate: [`headless`] (CPU memory,
//! records everything it is asked to do) and [`gpu`] (wgpu device, queue and surface).

pub mod headless;
pub mod gpu;

use crate::encoder::EncoderConfig;
use crate::error::BackendError;
use crate::key::{DepthStencilKey, PipelineKey};
use crate::vertex::VertexLayoutDesc;

/// Geometry pushed to the presentation surface on resize.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct SurfaceGeometry {
    pub width: u32,
    pub height: u32,
    pub scale: f32,
    pub fullscreen: bool,
}

/// Handle on the host-visible drawable surface.
///
/// Methods are only ever invoked on the UI thread.
pub trait PresentationSurface: Send + 'static {
    fn apply_geometry(&self, geometry: SurfaceGeometry);
    fn detach(&self);
}

/// A byte range of a backend buffer bound for one draw.
#[derive(Debug)]
pub struct BufferBinding<'a, Buf> {
    pub buffer: &'a Buf,
    pub offset: u64,
    pub size: u64,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum DrawKind {
    Vertices { first: u32, count: u32 },
    Indexed { count: u32, format: wgpu::IndexFormat },
}

/// Everything a backend needs to record one draw besides the encoder
/// configuration.
#[derive(Debug)]
pub struct DrawCall<'a, Buf> {
    pub kind: DrawKind,
    pub vertex: Option<BufferBinding<'a, Buf>>,
    pub index: Option<BufferBinding<'a, Buf>>,
}

pub type BackendEncoderConfig<B> =
    EncoderConfig<<B as Backend>::Pipeline, <B as Backend>::DepthStencil>;

pub trait Backend: Send + 'static {
    type Pipeline: Clone + std::fmt::Debug + Send;
    type DepthStencil: Clone + std::fmt::Debug + Send;
    type Buffer: std::fmt::Debug + Send;
    type VertexLayout: Send;
    type Surface: PresentationSurface;

    // ── objects ──────────────────────────────────────────────────────────

    fn compile_pipeline(
        &mut self,
        key: &PipelineKey,
        layout: Option<&Self::VertexLayout>,
    ) -> Result<Self::Pipeline, BackendError>;

    fn compile_depth_stencil(
        &mut self,
        key: &DepthStencilKey,
    ) -> Result<Self::DepthStencil, BackendError>;

    fn create_vertex_layout(
        &mut self,
        desc: &VertexLayoutDesc,
    ) -> Result<Self::VertexLayout, BackendError>;

    // ── memory ───────────────────────────────────────────────────────────

    fn create_buffer(&mut self, size: u64, label: Option<&str>) -> Result<Self::Buffer, BackendError>;

    /// Granule that write and copy offsets and lengths must be multiples of.
    fn copy_alignment(&self) -> u64 {
        1
    }

    fn write_buffer(
        &mut self,
        buffer: &Self::Buffer,
        offset: u64,
        bytes: &[u8],
    ) -> Result<(), BackendError>;

    /// Records a buffer-to-buffer copy ordered before any later draw.
    fn copy_buffer(
        &mut self,
        src: &Self::Buffer,
        src_offset: u64,
        dst: &Self::Buffer,
        dst_offset: u64,
        len: u64,
    ) -> Result<(), BackendError>;

    // ── frame ────────────────────────────────────────────────────────────

    fn surface(&self) -> Self::Surface;

    /// Recreates size-dependent targets (depth/stencil, multisample color).
    fn resize_targets(&mut self, width: u32, height: u32) -> Result<(), BackendError>;

    fn clear(&mut self, color: wgpu::Color) -> Result<(), BackendError>;

    fn encode_draw(
        &mut self,
        config: &BackendEncoderConfig<Self>,
        draw: &DrawCall<'_, Self::Buffer>,
    ) -> Result<(), BackendError>
    where
        Self: Sized;

    /// Hands all recorded work to the device. One call per submitted unit.
    fn submit(&mut self) -> Result<(), BackendError>;

    fn present(&mut self) -> Result<(), BackendError>;
}

/// Backends whose buffer memory can be read back synchronously.
pub trait Readback: Backend {
    fn read_buffer(&self, buffer: &Self::Buffer, offset: u64, len: u64) -> Option<Vec<u8>>;
}
