//! wgpu backend.
//!
//! Owns the instance/adapter/device/queue and the presentation surface.
//! Every clear and draw records one render pass into the frame encoder;
//! `submit` hands the encoder to the queue and `present` releases the
//! drawable. Staging copies are submitted immediately so they stay ordered
//! with the queue writes that fill the staging ring.

mod init;
mod pipeline;
mod surface;

use std::sync::Arc;

use anyhow::{Context as _, Result};

pub use init::{PASSTHROUGH_WGSL, WgpuInit};
pub use pipeline::{DEPTH_STENCIL_FORMAT, PipelineTemplate, WgpuDepthStencil};
pub use surface::WgpuSurface;

use self::surface::choose_alpha_mode;
use super::{Backend, BackendEncoderConfig, DrawCall, DrawKind};
use crate::config::{ContextConfig, DebugFlags};
use crate::encoder::{EncoderCommand, ScissorRect, ViewportRect};
use crate::error::BackendError;
use crate::key::{DepthStencilKey, PipelineKey, make_depth_stencil_key};
use crate::state::RenderStateSnapshot;
use crate::vertex::VertexLayoutDesc;

/// Copy offsets and sizes must be multiples of this.
const COPY_ALIGNMENT: u64 = wgpu::COPY_BUFFER_ALIGNMENT;

struct FrameTargets {
    width: u32,
    height: u32,
    depth_view: wgpu::TextureView,
    msaa_view: Option<wgpu::TextureView>,
}

struct AcquiredFrame {
    surface_texture: wgpu::SurfaceTexture,
    view: wgpu::TextureView,
}

pub struct WgpuBackend {
    adapter: wgpu::Adapter,
    device: Arc<wgpu::Device>,
    queue: Arc<wgpu::Queue>,
    surface: WgpuSurface,
    shader: wgpu::ShaderModule,
    pipeline_layout: wgpu::PipelineLayout,
    color_format: wgpu::TextureFormat,
    sample_count: u32,
    labels: bool,
    targets: Option<FrameTargets>,
    frame: Option<AcquiredFrame>,
    encoder: Option<wgpu::CommandEncoder>,
}

impl WgpuBackend {
    /// Creates the device and configures `target` as the presentation
    /// surface. Adapter/device acquisition is asynchronous under wgpu.
    pub async fn new(
        target: impl Into<wgpu::SurfaceTarget<'static>>,
        config: &ContextConfig,
        init: WgpuInit,
    ) -> Result<Self> {
        anyhow::ensure!(
            config.width > 0 && config.height > 0,
            "drawable has zero size"
        );
        let flags = if config.debug_flags.contains(DebugFlags::VALIDATION) {
            wgpu::InstanceFlags::VALIDATION | wgpu::InstanceFlags::DEBUG
        } else {
            wgpu::InstanceFlags::empty()
        };
        let labels = config.debug_flags.contains(DebugFlags::LABELS);

        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            flags,
            ..Default::default()
        });

        let surface = instance
            .create_surface(target)
            .context("failed to create wgpu surface")?;

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: init.power_preference,
                compatible_surface: Some(&surface),
                force_fallback_adapter: false,
            })
            .await
            .context("failed to find a suitable GPU adapter")?;

        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: labels.then_some("kiln device"),
                required_features: init.required_features,
                required_limits: init.required_limits.clone(),
                experimental_features: wgpu::ExperimentalFeatures::disabled(),
                memory_hints: wgpu::MemoryHints::Performance,
                trace: wgpu::Trace::Off,
            })
            .await
            .context("failed to create wgpu device/queue")?;

        let caps = surface.get_capabilities(&adapter);
        anyhow::ensure!(
            caps.formats.contains(&config.color_format),
            "color format {:?} not supported by the surface (supported: {:?})",
            config.color_format,
            caps.formats
        );
        let sample_count = config.effective_sample_count();
        anyhow::ensure!(
            adapter
                .get_texture_format_features(config.color_format)
                .flags
                .sample_count_supported(sample_count),
            "{sample_count}x multisampling not supported for {:?}",
            config.color_format
        );

        let surface_config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format: config.color_format,
            width: config.width as u32,
            height: config.height as u32,
            present_mode: init.present_mode,
            alpha_mode: choose_alpha_mode(&caps, init.alpha_mode),
            view_formats: vec![],
            desired_maximum_frame_latency: init.desired_maximum_frame_latency,
        };

        let device = Arc::new(device);
        let queue = Arc::new(queue);
        let surface = WgpuSurface::new(surface, device.clone(), surface_config);

        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: labels.then_some("kiln shader"),
            source: wgpu::ShaderSource::Wgsl(init.shader_source.clone()),
        });
        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: labels.then_some("kiln pipeline layout"),
            bind_group_layouts: &[],
            immediate_size: 0,
        });

        log::info!(
            "wgpu backend ready: {} ({:?})",
            adapter.get_info().name,
            adapter.get_info().backend
        );

        Ok(Self {
            adapter,
            device,
            queue,
            surface,
            shader,
            pipeline_layout,
            color_format: config.color_format,
            sample_count,
            labels,
            targets: None,
            frame: None,
            encoder: None,
        })
    }

    /// Backend factory for [`Context::initialize`](crate::Context::initialize).
    pub fn factory<T>(
        target: T,
        init: WgpuInit,
    ) -> impl FnOnce(&ContextConfig) -> std::result::Result<Self, BackendError> + Send + 'static
    where
        T: Into<wgpu::SurfaceTarget<'static>> + Send + 'static,
    {
        move |config: &ContextConfig| {
            pollster::block_on(Self::new(target, config, init))
                .map_err(|err| BackendError::Resource(format!("{err:#}")))
        }
    }

    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    pub fn adapter_info(&self) -> wgpu::AdapterInfo {
        self.adapter.get_info()
    }

    fn label<'a>(&self, label: &'a str) -> Option<&'a str> {
        self.labels.then_some(label)
    }

    fn ensure_frame(&mut self) -> std::result::Result<(), BackendError> {
        if self.frame.is_none() {
            let surface_texture = self.surface.acquire()?;
            let view = surface_texture
                .texture
                .create_view(&wgpu::TextureViewDescriptor::default());
            self.frame = Some(AcquiredFrame { surface_texture, view });
        }
        if self.encoder.is_none() {
            let label = self.label("kiln frame encoder");
            self.encoder = Some(
                self.device
                    .create_command_encoder(&wgpu::CommandEncoderDescriptor { label }),
            );
        }
        Ok(())
    }

    /// Records one render pass. `clear` selects clear vs load for every
    /// attachment.
    fn begin_pass(&mut self, clear: Option<wgpu::Color>) -> std::result::Result<wgpu::RenderPass<'_>, BackendError> {
        self.ensure_frame()?;
        let (Some(frame), Some(targets), Some(encoder)) = (&self.frame, &self.targets, &mut self.encoder) else {
            return Err(BackendError::Resource("render targets are not ready".into()));
        };

        let (view, resolve_target) = match &targets.msaa_view {
            Some(msaa) => (msaa, Some(&frame.view)),
            None => (&frame.view, None),
        };
        let color_load = clear.map_or(wgpu::LoadOp::Load, wgpu::LoadOp::Clear);
        let depth_load = clear.map_or(wgpu::LoadOp::Load, |_| wgpu::LoadOp::Clear(1.0));
        let stencil_load = clear.map_or(wgpu::LoadOp::Load, |_| wgpu::LoadOp::Clear(0));

        Ok(encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: self.labels.then_some("kiln pass"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view,
                resolve_target,
                ops: wgpu::Operations {
                    load: color_load,
                    store: wgpu::StoreOp::Store,
                },
                depth_slice: None,
            })],
            depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                view: &targets.depth_view,
                depth_ops: Some(wgpu::Operations {
                    load: depth_load,
                    store: wgpu::StoreOp::Store,
                }),
                stencil_ops: Some(wgpu::Operations {
                    load: stencil_load,
                    store: wgpu::StoreOp::Store,
                }),
            }),
            timestamp_writes: None,
            occlusion_query_set: None,
            multiview_mask: None,
        }))
    }

    fn check_aligned(offset: u64, len: u64) -> std::result::Result<(), BackendError> {
        if offset % COPY_ALIGNMENT != 0 || len % COPY_ALIGNMENT != 0 {
            return Err(BackendError::InvalidArgument(format!(
                "offset {offset} and length {len} must be multiples of {COPY_ALIGNMENT}"
            )));
        }
        Ok(())
    }
}

/// Converts a lower-left-origin rectangle into wgpu's top-left space,
/// clipped to the target. `None` when nothing is left.
fn flip_and_clip(x: f32, y: f32, w: f32, h: f32, target: (u32, u32)) -> Option<[f32; 4]> {
    let (tw, th) = (target.0 as f32, target.1 as f32);
    let top = th - (y + h);
    let x0 = x.max(0.0);
    let y0 = top.max(0.0);
    let x1 = (x + w).min(tw);
    let y1 = (top + h).min(th);
    (x1 > x0 && y1 > y0).then_some([x0, y0, x1 - x0, y1 - y0])
}

/// Flips a lower-left-origin viewport into top-left space without clipping,
/// so the NDC to window mapping survives a partly off-target viewport.
/// Rasterization stops at the target edge on its own.
fn flip_viewport(x: f32, y: f32, w: f32, h: f32, target_height: u32) -> [f32; 4] {
    [x, target_height as f32 - (y + h), w, h]
}

/// Device bounds on viewport placement: size up to the largest 2D texture,
/// origin within twice that on either side.
fn viewport_in_bounds([x, y, w, h]: [f32; 4], max_dimension: u32) -> bool {
    let max = max_dimension as f32;
    let range = max * 2.0;
    (0.0..=max).contains(&w)
        && (0.0..=max).contains(&h)
        && x >= -range
        && y >= -range
        && x + w <= range - 1.0
        && y + h <= range - 1.0
}

impl Backend for WgpuBackend {
    type Pipeline = Arc<PipelineTemplate>;
    type DepthStencil = WgpuDepthStencil;
    type Buffer = wgpu::Buffer;
    type VertexLayout = VertexLayoutDesc;
    type Surface = WgpuSurface;

    fn compile_pipeline(
        &mut self,
        key: &PipelineKey,
        layout: Option<&Self::VertexLayout>,
    ) -> std::result::Result<Self::Pipeline, BackendError> {
        if key.color_format != self.color_format || key.sample_count != self.sample_count {
            return Err(BackendError::Compilation(format!(
                "pipeline targets {:?} x{} but the surface is {:?} x{}",
                key.color_format, key.sample_count, self.color_format, self.sample_count
            )));
        }
        let template = Arc::new(PipelineTemplate::new(key, layout)?);
        // Builds the default depth-stencil variant so the device validates
        // the blend and target state on this path.
        let default_depth_stencil = WgpuDepthStencil::new(&make_depth_stencil_key(&RenderStateSnapshot::default()));
        template.realize(
            &self.device,
            &self.shader,
            &self.pipeline_layout,
            &default_depth_stencil,
            self.label("kiln pipeline"),
        )?;
        Ok(template)
    }

    fn compile_depth_stencil(
        &mut self,
        key: &DepthStencilKey,
    ) -> std::result::Result<Self::DepthStencil, BackendError> {
        Ok(WgpuDepthStencil::new(key))
    }

    fn create_vertex_layout(
        &mut self,
        desc: &VertexLayoutDesc,
    ) -> std::result::Result<Self::VertexLayout, BackendError> {
        if desc.stride % wgpu::VERTEX_STRIDE_ALIGNMENT != 0 {
            return Err(BackendError::InvalidArgument(format!(
                "vertex stride {} must be a multiple of {}",
                desc.stride,
                wgpu::VERTEX_STRIDE_ALIGNMENT
            )));
        }
        Ok(desc.clone())
    }

    fn create_buffer(&mut self, size: u64, label: Option<&str>) -> std::result::Result<Self::Buffer, BackendError> {
        let limit = self.device.limits().max_buffer_size;
        if size > limit {
            return Err(BackendError::Resource(format!(
                "{size} bytes exceeds the device buffer limit of {limit}"
            )));
        }
        Ok(self.device.create_buffer(&wgpu::BufferDescriptor {
            label,
            size,
            usage: wgpu::BufferUsages::VERTEX
                | wgpu::BufferUsages::INDEX
                | wgpu::BufferUsages::COPY_DST
                | wgpu::BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        }))
    }

    fn copy_alignment(&self) -> u64 {
        COPY_ALIGNMENT
    }

    fn write_buffer(
        &mut self,
        buffer: &Self::Buffer,
        offset: u64,
        bytes: &[u8],
    ) -> std::result::Result<(), BackendError> {
        Self::check_aligned(offset, bytes.len() as u64)?;
        self.queue.write_buffer(buffer, offset, bytes);
        Ok(())
    }

    fn copy_buffer(
        &mut self,
        src: &Self::Buffer,
        src_offset: u64,
        dst: &Self::Buffer,
        dst_offset: u64,
        len: u64,
    ) -> std::result::Result<(), BackendError> {
        Self::check_aligned(src_offset, len)?;
        Self::check_aligned(dst_offset, len)?;
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: self.label("kiln upload encoder"),
            });
        encoder.copy_buffer_to_buffer(src, src_offset, dst, dst_offset, len);
        self.queue.submit(std::iter::once(encoder.finish()));
        Ok(())
    }

    fn surface(&self) -> Self::Surface {
        self.surface.clone()
    }

    fn resize_targets(&mut self, width: u32, height: u32) -> std::result::Result<(), BackendError> {
        if width == 0 || height == 0 {
            return Err(BackendError::InvalidArgument(format!("targets of {width}x{height}")));
        }
        // A drawable acquired at the old size is stale.
        self.frame = None;

        let size = wgpu::Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        };
        let depth = self.device.create_texture(&wgpu::TextureDescriptor {
            label: self.label("kiln depth-stencil"),
            size,
            mip_level_count: 1,
            sample_count: self.sample_count,
            dimension: wgpu::TextureDimension::D2,
            format: DEPTH_STENCIL_FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            view_formats: &[],
        });
        let msaa_view = (self.sample_count > 1).then(|| {
            self.device
                .create_texture(&wgpu::TextureDescriptor {
                    label: self.label("kiln msaa color"),
                    size,
                    mip_level_count: 1,
                    sample_count: self.sample_count,
                    dimension: wgpu::TextureDimension::D2,
                    format: self.color_format,
                    usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
                    view_formats: &[],
                })
                .create_view(&wgpu::TextureViewDescriptor::default())
        });

        self.targets = Some(FrameTargets {
            width,
            height,
            depth_view: depth.create_view(&wgpu::TextureViewDescriptor::default()),
            msaa_view,
        });
        log::debug!("render targets {width}x{height} ({}x msaa)", self.sample_count);
        Ok(())
    }

    fn clear(&mut self, color: wgpu::Color) -> std::result::Result<(), BackendError> {
        let pass = self.begin_pass(Some(color))?;
        drop(pass);
        Ok(())
    }

    fn encode_draw(
        &mut self,
        config: &BackendEncoderConfig<Self>,
        draw: &DrawCall<'_, Self::Buffer>,
    ) -> std::result::Result<(), BackendError> {
        let (Some(template), Some(depth_stencil)) = (config.pipeline(), config.depth_stencil()) else {
            return Err(BackendError::InvalidArgument("encoder config lacks pipeline state".into()));
        };
        if template.has_vertex_input() && draw.vertex.is_none() {
            return Err(BackendError::InvalidArgument("pipeline expects a vertex buffer".into()));
        }
        let target_size = match &self.targets {
            Some(t) => (t.width, t.height),
            None => return Err(BackendError::Resource("render targets are not ready".into())),
        };
        let max_dimension = self.device.limits().max_texture_dimension_2d;
        let label = self.label("kiln pipeline");
        let pipeline = template.realize(&self.device, &self.shader, &self.pipeline_layout, depth_stencil, label)?;

        let mut pass = self.begin_pass(None)?;
        pass.set_pipeline(&pipeline);

        for command in config.commands() {
            match command {
                // Baked into the pipeline.
                EncoderCommand::SetPipeline(_)
                | EncoderCommand::SetDepthStencil(_)
                | EncoderCommand::SetCullMode(_)
                | EncoderCommand::SetFrontFace(_) => {}
                EncoderCommand::SetScissorRect(ScissorRect { x, y, width, height }) => {
                    let Some([sx, sy, sw, sh]) =
                        flip_and_clip(*x as f32, *y as f32, *width as f32, *height as f32, target_size)
                    else {
                        // Fully clipped; nothing to draw.
                        return Ok(());
                    };
                    pass.set_scissor_rect(sx as u32, sy as u32, sw as u32, sh as u32);
                }
                EncoderCommand::SetViewport(ViewportRect {
                    x,
                    y,
                    width,
                    height,
                    min_depth,
                    max_depth,
                }) => {
                    let rect = flip_viewport(*x, *y, *width, *height, target_size.1);
                    if !viewport_in_bounds(rect, max_dimension) {
                        return Err(BackendError::InvalidArgument(format!(
                            "viewport {rect:?} outside the device range"
                        )));
                    }
                    let [vx, vy, vw, vh] = rect;
                    pass.set_viewport(vx, vy, vw, vh, *min_depth, *max_depth);
                }
                EncoderCommand::SetStencilReference(reference) => pass.set_stencil_reference(*reference),
            }
        }

        if let Some(vertex) = &draw.vertex {
            pass.set_vertex_buffer(0, vertex.buffer.slice(vertex.offset..vertex.offset + vertex.size));
        }
        match draw.kind {
            DrawKind::Vertices { first, count } => {
                pass.draw(first..first + count, 0..1);
            }
            DrawKind::Indexed { count, format } => {
                let Some(index) = &draw.index else {
                    return Err(BackendError::InvalidArgument("indexed draw without index buffer".into()));
                };
                pass.set_index_buffer(index.buffer.slice(index.offset..index.offset + index.size), format);
                pass.draw_indexed(0..count, 0, 0..1);
            }
        }
        Ok(())
    }

    fn submit(&mut self) -> std::result::Result<(), BackendError> {
        match self.encoder.take() {
            Some(encoder) => {
                self.queue.submit(std::iter::once(encoder.finish()));
            }
            None => {
                self.queue.submit(std::iter::empty());
            }
        }
        Ok(())
    }

    fn present(&mut self) -> std::result::Result<(), BackendError> {
        if let Some(frame) = self.frame.take() {
            drop(frame.view);
            frame.surface_texture.present();
        }
        Ok(())
    }
}
