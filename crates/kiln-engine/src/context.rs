//! The rendering context.
//!
//! One [`Context`] owns every piece of mutable rendering state: the state
//! tracker, both object caches, the buffer allocator, the vertex layout
//! registry, the frame encoder and the backend. All of it sits behind one
//! mutex held for the full duration of each operation. At most one context
//! is alive per process.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::backend::{Backend, DrawCall, DrawKind, PresentationSurface, Readback, SurfaceGeometry};
use crate::buffer::{BufferAllocator, BufferHandle, BufferUsage};
use crate::cache::{CacheStats, ObjectCache};
use crate::config::{ContextConfig, DebugFlags};
use crate::encoder::{FrameEncoder, FrameSerial};
use crate::error::{BackendError, Error, Result};
use crate::key::DrawTarget;
use crate::state::tokens;
use crate::state::{RenderStateSnapshot, StateTracker, StencilState};
use crate::ui::{UiDispatcher, run_on_ui};
use crate::vertex::{VertexLayoutHandle, VertexLayoutRegistry};

static ACTIVE_CONTEXT: Mutex<Option<u64>> = parking_lot::const_mutex(None);
static NEXT_CONTEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Claim on the process-wide context slot, released on drop.
struct RegistrySlot(u64);

impl RegistrySlot {
    fn claim() -> Result<Self> {
        let mut active = ACTIVE_CONTEXT.lock();
        if active.is_some() {
            return Err(Error::AlreadyInitialized);
        }
        let id = NEXT_CONTEXT_ID.fetch_add(1, Ordering::Relaxed);
        *active = Some(id);
        Ok(RegistrySlot(id))
    }
}

impl Drop for RegistrySlot {
    fn drop(&mut self) {
        let mut active = ACTIVE_CONTEXT.lock();
        if *active == Some(self.0) {
            *active = None;
        }
    }
}

#[derive(Debug, Default, Copy, Clone)]
struct DrawBindings {
    vertex: Option<(BufferHandle, VertexLayoutHandle)>,
    index: Option<BufferHandle>,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ContextStats {
    pub revision: u64,
    pub frame_serial: u64,
    pub cache: CacheStats,
    pub live_buffers: usize,
    pub vertex_layouts: usize,
    pub staging_capacity: u64,
}

struct Inner<B: Backend> {
    config: ContextConfig,
    tracker: StateTracker,
    cache: ObjectCache<B>,
    buffers: BufferAllocator<B>,
    layouts: VertexLayoutRegistry<B>,
    encoder: FrameEncoder,
    bindings: DrawBindings,
    backend: B,
}

pub struct Context<B: Backend> {
    inner: Mutex<Inner<B>>,
    ui: Arc<dyn UiDispatcher>,
    slot: RegistrySlot,
}

impl<B: Backend> Context<B> {
    /// Creates the process's rendering context.
    ///
    /// `create_backend` runs on the UI thread. Fails with
    /// [`Error::AlreadyInitialized`] while another context is alive, without
    /// touching it.
    pub fn initialize<F>(config: ContextConfig, ui: Arc<dyn UiDispatcher>, create_backend: F) -> Result<Self>
    where
        F: FnOnce(&ContextConfig) -> Result<B, BackendError> + Send + 'static,
    {
        let slot = RegistrySlot::claim()?;

        if config.width <= 0 || config.height <= 0 {
            return Err(Error::invalid(format!(
                "drawable size must be positive, got {}x{}",
                config.width, config.height
            )));
        }

        let backend_config = config.clone();
        let mut backend = run_on_ui(ui.as_ref(), move || create_backend(&backend_config))?
            .map_err(|err| Error::InitializationFailed(err.to_string()))?;
        backend
            .resize_targets(config.width as u32, config.height as u32)
            .map_err(|err| Error::InitializationFailed(err.to_string()))?;

        log::info!(
            "context {} initialized: {}x{}, {:?}, {} sample(s), debug {:?}",
            slot.0,
            config.width,
            config.height,
            config.color_format,
            config.effective_sample_count(),
            config.debug_flags
        );

        let inner = Inner {
            tracker: StateTracker::new(),
            cache: ObjectCache::new(),
            buffers: BufferAllocator::new(
                config.staging_capacity,
                config.debug_flags.contains(DebugFlags::LABELS),
            ),
            layouts: VertexLayoutRegistry::new(),
            encoder: FrameEncoder::new(),
            bindings: DrawBindings::default(),
            backend,
            config,
        };

        Ok(Context {
            inner: Mutex::new(inner),
            ui,
            slot,
        })
    }

    /// Detaches the surface on the UI thread, releases every resource and
    /// frees the process-wide slot.
    pub fn shutdown(self) {
        drop(self);
    }

    // ── surface ─────────────────────────────────────────────────────────

    /// Non-positive `scale` is treated as 1.
    pub fn resize(&self, width: i32, height: i32, scale: f32, fullscreen: bool) -> Result<()> {
        if width <= 0 || height <= 0 {
            return Err(Error::invalid(format!("resize to {width}x{height}")));
        }
        let scale = if scale > 0.0 { scale } else { 1.0 };
        let geometry = SurfaceGeometry {
            width: width as u32,
            height: height as u32,
            scale,
            fullscreen,
        };

        let mut inner = self.inner.lock();
        let surface = inner.backend.surface();
        run_on_ui(self.ui.as_ref(), move || surface.apply_geometry(geometry))?;
        inner.backend.resize_targets(geometry.width, geometry.height)?;
        inner.config.width = width;
        inner.config.height = height;

        log::info!("resized to {width}x{height} (scale {scale}, fullscreen {fullscreen})");
        Ok(())
    }

    /// Clears the color target. Components are clamped to `[0, 1]`.
    pub fn render_clear(&self, r: f32, g: f32, b: f32, a: f32) -> Result<()> {
        let clamp = |c: f32| if c.is_nan() { 0.0 } else { f64::from(c.clamp(0.0, 1.0)) };
        let color = wgpu::Color {
            r: clamp(r),
            g: clamp(g),
            b: clamp(b),
            a: clamp(a),
        };

        let mut inner = self.inner.lock();
        let Inner { backend, encoder, .. } = &mut *inner;
        let encoded = backend.clear(color).map_err(Error::from);
        let submitted = encoder.submit_frame(backend);
        encoded.and(submitted).map(|_| ())
    }

    pub fn present(&self) -> Result<()> {
        self.inner.lock().backend.present()?;
        Ok(())
    }

    // ── render state ────────────────────────────────────────────────────

    pub fn set_blend_enabled(&self, enabled: bool) -> bool {
        self.inner.lock().tracker.set_blend_enabled(enabled)
    }

    pub fn set_blend_func(&self, src_rgb: u32, dst_rgb: u32, src_alpha: u32, dst_alpha: u32) -> bool {
        self.inner
            .lock()
            .tracker
            .set_blend_func(src_rgb, dst_rgb, src_alpha, dst_alpha)
    }

    pub fn set_blend_equation(&self, rgb: u32, alpha: u32) -> bool {
        self.inner.lock().tracker.set_blend_equation(rgb, alpha)
    }

    pub fn set_depth_state(&self, test_enabled: bool, write_enabled: bool, compare: u32) -> bool {
        self.inner
            .lock()
            .tracker
            .set_depth_state(test_enabled, write_enabled, compare)
    }

    pub fn set_stencil_state(&self, stencil: StencilState) -> bool {
        self.inner.lock().tracker.set_stencil_state(stencil)
    }

    pub fn set_cull_state(&self, enabled: bool, face: u32) -> bool {
        self.inner.lock().tracker.set_cull_state(enabled, face)
    }

    pub fn set_scissor(&self, enabled: bool, x: i32, y: i32, width: i32, height: i32) -> bool {
        self.inner.lock().tracker.set_scissor(enabled, x, y, width, height)
    }

    pub fn set_viewport(
        &self,
        x: i32,
        y: i32,
        width: i32,
        height: i32,
        min_depth: f32,
        max_depth: f32,
    ) -> Result<bool> {
        self.inner
            .lock()
            .tracker
            .set_viewport(x, y, width, height, min_depth, max_depth)
    }

    pub fn snapshot(&self) -> RenderStateSnapshot {
        *self.inner.lock().tracker.snapshot()
    }

    pub fn revision(&self) -> u64 {
        self.inner.lock().tracker.revision()
    }

    // ── buffers and layouts ─────────────────────────────────────────────

    /// `usage` is the boundary token: 0 static, 1 dynamic.
    pub fn create_buffer(&self, usage: i32, size: i64, initial_data: Option<&[u8]>) -> Result<BufferHandle> {
        let usage = BufferUsage::from_token(usage)?;
        let mut inner = self.inner.lock();
        let Inner { backend, buffers, .. } = &mut *inner;
        buffers.create_buffer(backend, usage, size, initial_data)
    }

    pub fn update_buffer(&self, buffer: BufferHandle, offset: i64, data: Option<&[u8]>, length: i64) -> Result<()> {
        let mut inner = self.inner.lock();
        let Inner {
            backend,
            buffers,
            encoder,
            ..
        } = &mut *inner;
        buffers.update_buffer(backend, buffer, offset, data, length, encoder.serial())
    }

    /// Also drops any draw binding that referenced the buffer.
    pub fn destroy_buffer(&self, buffer: BufferHandle) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.buffers.destroy_buffer(buffer)?;
        let bindings = &mut inner.bindings;
        if bindings.vertex.is_some_and(|(b, _)| b == buffer) {
            bindings.vertex = None;
        }
        if bindings.index == Some(buffer) {
            bindings.index = None;
        }
        Ok(())
    }

    pub fn register_vertex_descriptor(
        &self,
        stride: i32,
        attribute_count: i32,
        packed: &[u8],
    ) -> Result<VertexLayoutHandle> {
        let mut inner = self.inner.lock();
        let Inner { backend, layouts, .. } = &mut *inner;
        layouts.register(backend, stride, attribute_count, packed)
    }

    pub fn bind_vertex_buffer(&self, buffer: BufferHandle, layout: VertexLayoutHandle) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.buffers.record(buffer).is_none() {
            return Err(Error::invalid(format!("unknown buffer {}", buffer.to_raw())));
        }
        if inner.layouts.get(layout).is_none() {
            return Err(Error::invalid(format!("unknown vertex layout {}", layout.to_raw())));
        }
        inner.bindings.vertex = Some((buffer, layout));
        Ok(())
    }

    pub fn bind_index_buffer(&self, buffer: BufferHandle) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.buffers.record(buffer).is_none() {
            return Err(Error::invalid(format!("unknown buffer {}", buffer.to_raw())));
        }
        inner.bindings.index = Some(buffer);
        Ok(())
    }

    // ── draws ───────────────────────────────────────────────────────────

    /// Draws `count` vertices starting at `first`. A zero count is a no-op.
    pub fn draw(&self, mode: u32, first: i32, count: i32) -> Result<()> {
        let topology = tokens::primitive_topology(mode)?;
        if first < 0 || count < 0 {
            return Err(Error::invalid(format!("draw range {first}+{count}")));
        }
        if count == 0 {
            return Ok(());
        }
        let kind = DrawKind::Vertices {
            first: first as u32,
            count: count as u32,
        };
        self.draw_unit(topology, kind)
    }

    /// Draws `count` indices from the bound index buffer.
    pub fn draw_indexed(&self, mode: u32, count: i32, index_type: u32) -> Result<()> {
        let topology = tokens::primitive_topology(mode)?;
        let format = tokens::index_format(index_type)?;
        if count < 0 {
            return Err(Error::invalid(format!("negative index count {count}")));
        }
        if count == 0 {
            return Ok(());
        }
        let kind = DrawKind::Indexed {
            count: count as u32,
            format,
        };
        self.draw_unit(topology, kind)
    }

    fn draw_unit(&self, topology: wgpu::PrimitiveTopology, kind: DrawKind) -> Result<()> {
        let mut inner = self.inner.lock();
        let Inner {
            config,
            tracker,
            cache,
            buffers,
            layouts,
            encoder,
            bindings,
            backend,
        } = &mut *inner;
        let serial = encoder.serial();

        if matches!(kind, DrawKind::Indexed { .. }) && bindings.index.is_none() {
            return Err(Error::invalid("indexed draw without a bound index buffer"));
        }
        let vertex = bindings
            .vertex
            .map(|(buffer, _)| buffers.binding(buffer, serial))
            .transpose()?;
        let index = bindings
            .index
            .map(|buffer| buffers.binding(buffer, serial))
            .transpose()?;
        let layout_handle = bindings.vertex.map(|(_, layout)| layout);
        let layout = match layout_handle {
            Some(handle) => Some(
                &layouts
                    .get(handle)
                    .ok_or_else(|| Error::invalid(format!("unknown vertex layout {}", handle.to_raw())))?
                    .layout,
            ),
            None => None,
        };

        let target = DrawTarget {
            color_format: config.color_format,
            sample_count: config.effective_sample_count(),
            topology,
            vertex_layout: layout_handle,
        };
        let encoder_config = encoder.configure_draw(tracker.snapshot(), &target, cache, backend, layout)?;

        let draw = DrawCall { kind, vertex, index };
        let encoded = backend.encode_draw(&encoder_config, &draw).map_err(Error::from);
        // Submit even when encoding failed part way through the unit.
        let submitted = encoder.submit_frame(backend);
        encoded.and(submitted).map(|_| ())
    }

    // ── diagnostics ─────────────────────────────────────────────────────

    pub fn frame_serial(&self) -> FrameSerial {
        self.inner.lock().encoder.serial()
    }

    pub fn config(&self) -> ContextConfig {
        self.inner.lock().config.clone()
    }

    pub fn stats(&self) -> ContextStats {
        let inner = self.inner.lock();
        ContextStats {
            revision: inner.tracker.revision(),
            frame_serial: inner.encoder.serial().get(),
            cache: inner.cache.stats(),
            live_buffers: inner.buffers.live_buffers(),
            vertex_layouts: inner.layouts.len(),
            staging_capacity: inner.buffers.staging_capacity(),
        }
    }

    pub fn with_backend<R>(&self, f: impl FnOnce(&B) -> R) -> R {
        f(&self.inner.lock().backend)
    }

    pub fn with_backend_mut<R>(&self, f: impl FnOnce(&mut B) -> R) -> R {
        f(&mut self.inner.lock().backend)
    }
}

impl<B: Readback> Context<B> {
    /// Reads the logical bytes of one slot of `buffer`.
    pub fn read_buffer_slot(&self, buffer: BufferHandle, slot: u32) -> Result<Vec<u8>> {
        let inner = self.inner.lock();
        let record = inner
            .buffers
            .record(buffer)
            .ok_or_else(|| Error::invalid(format!("unknown buffer {}", buffer.to_raw())))?;
        if slot >= record.slot_count {
            return Err(Error::invalid(format!("slot {slot} of {}", record.slot_count)));
        }
        inner
            .backend
            .read_buffer(&record.buffer, record.slot_offset(slot), record.size)
            .ok_or_else(|| Error::invalid("buffer is not readable"))
    }
}

impl<B: Backend> Drop for Context<B> {
    fn drop(&mut self) {
        let surface = self.inner.get_mut().backend.surface();
        if let Err(err) = run_on_ui(self.ui.as_ref(), move || surface.detach()) {
            log::warn!("surface detach failed: {err}");
        }
        log::info!("context {} shut down", self.slot.0);
    }
}
