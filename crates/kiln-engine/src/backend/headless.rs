//! CPU-only backend.
//!
//! Buffers live in host memory and can be read back. Compiled objects are
//! plain records of the key they were built from. Every clear and draw is
//! recorded, grouped by submission, so callers can inspect exactly what
//! reached the "device".

use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use super::{Backend, BackendEncoderConfig, DrawCall, DrawKind, PresentationSurface, Readback, SurfaceGeometry};
use crate::encoder::EncoderCommand;
use crate::error::BackendError;
use crate::key::{DepthStencilKey, PipelineKey};
use crate::vertex::VertexLayoutDesc;

#[derive(Debug, Clone, PartialEq)]
pub struct HeadlessPipeline {
    pub id: u32,
    pub key: PipelineKey,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HeadlessDepthStencil {
    pub id: u32,
    pub key: DepthStencilKey,
}

#[derive(Debug, Clone)]
pub struct HeadlessBuffer {
    id: u64,
    data: Arc<Mutex<Vec<u8>>>,
}

impl HeadlessBuffer {
    pub fn id(&self) -> u64 {
        self.id
    }
}

#[derive(Debug, Clone)]
pub struct HeadlessVertexLayout {
    pub desc: VertexLayoutDesc,
}

/// One clear or draw as seen by the backend.
#[derive(Debug, Clone, PartialEq)]
pub enum RecordedWork {
    Clear(wgpu::Color),
    Draw {
        commands: Vec<EncoderCommand<HeadlessPipeline, HeadlessDepthStencil>>,
        kind: DrawKind,
        vertex: Option<(u64, u64)>,
        index: Option<(u64, u64)>,
    },
}

#[derive(Debug, Clone, Default)]
pub struct SurfaceLog {
    /// Geometry updates with the name of the thread that applied them.
    pub geometry: Vec<(SurfaceGeometry, Option<String>)>,
    /// Thread that detached the surface, once detached.
    pub detached_on: Option<Option<String>>,
}

#[derive(Debug, Clone, Default)]
pub struct HeadlessSurface {
    log: Arc<Mutex<SurfaceLog>>,
}

impl HeadlessSurface {
    pub fn log(&self) -> SurfaceLog {
        self.log.lock().clone()
    }
}

fn current_thread_name() -> Option<String> {
    std::thread::current().name().map(str::to_owned)
}

impl PresentationSurface for HeadlessSurface {
    fn apply_geometry(&self, geometry: SurfaceGeometry) {
        self.log.lock().geometry.push((geometry, current_thread_name()));
    }

    fn detach(&self) {
        self.log.lock().detached_on = Some(current_thread_name());
    }
}

#[derive(Debug, Default)]
pub struct HeadlessBackend {
    next_id: u64,
    buffers: Vec<Weak<Mutex<Vec<u8>>>>,
    pipeline_compiles: u32,
    depth_stencil_compiles: u32,
    failing_pipelines: u32,
    failing_depth_stencils: u32,
    failing_encodes: u32,
    copies: u64,
    pending: Vec<RecordedWork>,
    submitted: Vec<Vec<RecordedWork>>,
    presents: u64,
    target_size: (u32, u32),
    surface: HeadlessSurface,
    copy_alignment: u64,
}

impl HeadlessBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rejects writes and copies whose offset or length is not a multiple
    /// of `alignment`, the way GPU queues do.
    pub fn with_copy_alignment(alignment: u64) -> Self {
        Self {
            copy_alignment: alignment,
            ..Self::default()
        }
    }

    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    /// Makes the next `n` pipeline compilations fail.
    pub fn fail_next_pipeline_compiles(&mut self, n: u32) {
        self.failing_pipelines = n;
    }

    pub fn fail_next_depth_stencil_compiles(&mut self, n: u32) {
        self.failing_depth_stencils = n;
    }

    /// Makes the next `n` draw encodings fail after recording part of
    /// their commands.
    pub fn fail_next_encodes(&mut self, n: u32) {
        self.failing_encodes = n;
    }

    /// Compilation attempts, failed ones included.
    pub fn pipeline_compilations(&self) -> u32 {
        self.pipeline_compiles
    }

    pub fn depth_stencil_compilations(&self) -> u32 {
        self.depth_stencil_compiles
    }

    /// Buffers still referenced by someone.
    pub fn buffer_count(&self) -> usize {
        self.buffers.iter().filter(|b| b.strong_count() > 0).count()
    }

    pub fn copy_count(&self) -> u64 {
        self.copies
    }

    pub fn submissions(&self) -> usize {
        self.submitted.len()
    }

    pub fn submitted(&self) -> &[Vec<RecordedWork>] {
        &self.submitted
    }

    pub fn presents(&self) -> u64 {
        self.presents
    }

    pub fn target_size(&self) -> (u32, u32) {
        self.target_size
    }

    pub fn surface_log(&self) -> SurfaceLog {
        self.surface.log()
    }
}

fn check_granule(alignment: u64, offset: u64, len: u64) -> Result<(), BackendError> {
    if alignment > 1 && (offset % alignment != 0 || len % alignment != 0) {
        return Err(BackendError::InvalidArgument(format!(
            "offset {offset} and length {len} must be multiples of {alignment}"
        )));
    }
    Ok(())
}

fn check_range(len: usize, offset: u64, size: u64) -> Result<std::ops::Range<usize>, BackendError> {
    let end = offset
        .checked_add(size)
        .filter(|&end| end <= len as u64)
        .ok_or_else(|| {
            BackendError::InvalidArgument(format!("range {offset}+{size} outside buffer of {len} bytes"))
        })?;
    Ok(offset as usize..end as usize)
}

impl Backend for HeadlessBackend {
    type Pipeline = HeadlessPipeline;
    type DepthStencil = HeadlessDepthStencil;
    type Buffer = HeadlessBuffer;
    type VertexLayout = HeadlessVertexLayout;
    type Surface = HeadlessSurface;

    fn compile_pipeline(
        &mut self,
        key: &PipelineKey,
        _layout: Option<&Self::VertexLayout>,
    ) -> Result<Self::Pipeline, BackendError> {
        self.pipeline_compiles += 1;
        if self.failing_pipelines > 0 {
            self.failing_pipelines -= 1;
            return Err(BackendError::Compilation("injected pipeline failure".into()));
        }
        Ok(HeadlessPipeline {
            id: self.pipeline_compiles,
            key: *key,
        })
    }

    fn compile_depth_stencil(&mut self, key: &DepthStencilKey) -> Result<Self::DepthStencil, BackendError> {
        self.depth_stencil_compiles += 1;
        if self.failing_depth_stencils > 0 {
            self.failing_depth_stencils -= 1;
            return Err(BackendError::Compilation("injected depth-stencil failure".into()));
        }
        Ok(HeadlessDepthStencil {
            id: self.depth_stencil_compiles,
            key: *key,
        })
    }

    fn create_vertex_layout(&mut self, desc: &VertexLayoutDesc) -> Result<Self::VertexLayout, BackendError> {
        Ok(HeadlessVertexLayout { desc: desc.clone() })
    }

    fn create_buffer(&mut self, size: u64, _label: Option<&str>) -> Result<Self::Buffer, BackendError> {
        let len = usize::try_from(size)
            .ok()
            .filter(|&len| len <= isize::MAX as usize)
            .ok_or_else(|| BackendError::Resource(format!("{size} bytes exceed host memory")))?;
        let mut bytes = Vec::new();
        bytes
            .try_reserve_exact(len)
            .map_err(|err| BackendError::Resource(format!("{size} bytes: {err}")))?;
        bytes.resize(len, 0);
        let data = Arc::new(Mutex::new(bytes));
        self.buffers.retain(|b| b.strong_count() > 0);
        self.buffers.push(Arc::downgrade(&data));
        Ok(HeadlessBuffer {
            id: self.next_id(),
            data,
        })
    }

    fn copy_alignment(&self) -> u64 {
        self.copy_alignment.max(1)
    }

    fn write_buffer(&mut self, buffer: &Self::Buffer, offset: u64, bytes: &[u8]) -> Result<(), BackendError> {
        check_granule(self.copy_alignment, offset, bytes.len() as u64)?;
        let mut data = buffer.data.lock();
        let range = check_range(data.len(), offset, bytes.len() as u64)?;
        data[range].copy_from_slice(bytes);
        Ok(())
    }

    fn copy_buffer(
        &mut self,
        src: &Self::Buffer,
        src_offset: u64,
        dst: &Self::Buffer,
        dst_offset: u64,
        len: u64,
    ) -> Result<(), BackendError> {
        check_granule(self.copy_alignment, src_offset, len)?;
        check_granule(self.copy_alignment, dst_offset, len)?;
        let bytes = {
            let src = src.data.lock();
            let range = check_range(src.len(), src_offset, len)?;
            src[range].to_vec()
        };
        self.write_buffer(dst, dst_offset, &bytes)?;
        self.copies += 1;
        Ok(())
    }

    fn surface(&self) -> Self::Surface {
        self.surface.clone()
    }

    fn resize_targets(&mut self, width: u32, height: u32) -> Result<(), BackendError> {
        self.target_size = (width, height);
        Ok(())
    }

    fn clear(&mut self, color: wgpu::Color) -> Result<(), BackendError> {
        self.pending.push(RecordedWork::Clear(color));
        Ok(())
    }

    fn encode_draw(
        &mut self,
        config: &BackendEncoderConfig<Self>,
        draw: &DrawCall<'_, Self::Buffer>,
    ) -> Result<(), BackendError> {
        if matches!(draw.kind, DrawKind::Indexed { .. }) && draw.index.is_none() {
            return Err(BackendError::InvalidArgument("indexed draw without index buffer".into()));
        }
        if self.failing_encodes > 0 {
            self.failing_encodes -= 1;
            self.pending.push(RecordedWork::Draw {
                commands: config.commands()[..1].to_vec(),
                kind: draw.kind,
                vertex: None,
                index: None,
            });
            return Err(BackendError::Resource("injected encode failure".into()));
        }
        self.pending.push(RecordedWork::Draw {
            commands: config.commands().to_vec(),
            kind: draw.kind,
            vertex: draw.vertex.as_ref().map(|b| (b.buffer.id, b.offset)),
            index: draw.index.as_ref().map(|b| (b.buffer.id, b.offset)),
        });
        Ok(())
    }

    fn submit(&mut self) -> Result<(), BackendError> {
        self.submitted.push(std::mem::take(&mut self.pending));
        Ok(())
    }

    fn present(&mut self) -> Result<(), BackendError> {
        self.presents += 1;
        Ok(())
    }
}

impl Readback for HeadlessBackend {
    fn read_buffer(&self, buffer: &Self::Buffer, offset: u64, len: u64) -> Option<Vec<u8>> {
        let data = buffer.data.lock();
        let range = check_range(data.len(), offset, len).ok()?;
        Some(data[range].to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dropped_buffers_release_memory() {
        let mut backend = HeadlessBackend::new();
        let a = backend.create_buffer(16, None).unwrap();
        let b = backend.create_buffer(16, None).unwrap();
        assert_eq!(backend.buffer_count(), 2);
        drop(a);
        assert_eq!(backend.buffer_count(), 1);
        assert_ne!(b.id(), 0);
    }

    #[test]
    fn out_of_range_writes_are_rejected() {
        let mut backend = HeadlessBackend::new();
        let buf = backend.create_buffer(8, None).unwrap();
        assert!(backend.write_buffer(&buf, 4, &[0; 8]).is_err());
        assert!(backend.write_buffer(&buf, u64::MAX, &[0; 1]).is_err());
        backend.write_buffer(&buf, 4, &[1, 2, 3, 4]).unwrap();
        assert_eq!(backend.read_buffer(&buf, 4, 4), Some(vec![1, 2, 3, 4]));
    }

    #[test]
    fn oversized_buffers_fail_without_allocating() {
        let mut backend = HeadlessBackend::new();
        assert!(matches!(
            backend.create_buffer(u64::MAX / 2 + 1, None),
            Err(BackendError::Resource(_))
        ));
        assert_eq!(backend.buffer_count(), 0);
    }

    #[test]
    fn aligned_backend_rejects_partial_granules() {
        let mut backend = HeadlessBackend::with_copy_alignment(4);
        let buf = backend.create_buffer(16, None).unwrap();
        assert!(backend.write_buffer(&buf, 2, &[0; 4]).is_err());
        assert!(backend.write_buffer(&buf, 0, &[0; 6]).is_err());
        assert!(backend.copy_buffer(&buf, 0, &buf, 8, 3).is_err());
        backend.write_buffer(&buf, 4, &[9; 8]).unwrap();
        assert_eq!(backend.copy_alignment(), 4);
    }

    #[test]
    fn submissions_group_pending_work() {
        let mut backend = HeadlessBackend::new();
        backend.clear(wgpu::Color::BLACK).unwrap();
        backend.submit().unwrap();
        backend.submit().unwrap();
        assert_eq!(backend.submitted()[0], vec![RecordedWork::Clear(wgpu::Color::BLACK)]);
        assert!(backend.submitted()[1].is_empty());
    }
}
