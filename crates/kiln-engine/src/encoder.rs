//! Per-draw encoder configuration.
//!
//! [`FrameEncoder::configure_draw`] turns the current snapshot into an
//! ordered command list: pipeline, depth-stencil, cull mode, front face,
//! scissor (when enabled), viewport, stencil reference (when enabled).
//! [`FrameEncoder::submit_frame`] is the only place the frame serial moves.

use crate::backend::{Backend, BackendEncoderConfig};
use crate::cache::ObjectCache;
use crate::error::{Error, Result};
use crate::key::{DepthStencilKey, DrawTarget, PipelineKey, make_depth_stencil_key, make_pipeline_key};
use crate::state::RenderStateSnapshot;
use crate::state::tokens;

/// Monotonic count of submitted frames. Wraps on overflow.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FrameSerial(u64);

impl FrameSerial {
    pub fn get(self) -> u64 {
        self.0
    }

    pub fn advance(&mut self) {
        self.0 = self.0.wrapping_add(1);
    }

    /// Ring slot selected by this serial for a buffer with `slot_count` slots.
    pub fn slot(self, slot_count: u32) -> u32 {
        (self.0 % u64::from(slot_count.max(1))) as u32
    }
}

/// Scissor rectangle, lower-left origin.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ScissorRect {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

/// Viewport, lower-left origin.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct ViewportRect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub min_depth: f32,
    pub max_depth: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum EncoderCommand<P, D> {
    SetPipeline(P),
    SetDepthStencil(D),
    SetCullMode(Option<wgpu::Face>),
    SetFrontFace(wgpu::FrontFace),
    SetScissorRect(ScissorRect),
    SetViewport(ViewportRect),
    SetStencilReference(u32),
}

/// Resolved state for one draw, in emission order.
#[derive(Debug, Clone)]
pub struct EncoderConfig<P, D> {
    pub pipeline_key: PipelineKey,
    pub depth_stencil_key: DepthStencilKey,
    commands: Vec<EncoderCommand<P, D>>,
}

impl<P, D> EncoderConfig<P, D> {
    pub fn commands(&self) -> &[EncoderCommand<P, D>] {
        &self.commands
    }

    pub fn pipeline(&self) -> Option<&P> {
        self.commands.iter().find_map(|c| match c {
            EncoderCommand::SetPipeline(p) => Some(p),
            _ => None,
        })
    }

    pub fn depth_stencil(&self) -> Option<&D> {
        self.commands.iter().find_map(|c| match c {
            EncoderCommand::SetDepthStencil(d) => Some(d),
            _ => None,
        })
    }
}

/// Front-face winding emitted for every draw.
pub const FRONT_FACE: wgpu::FrontFace = wgpu::FrontFace::Ccw;

fn validate(snapshot: &RenderStateSnapshot) -> Result<()> {
    let vp = &snapshot.viewport;
    if vp.width <= 0 || vp.height <= 0 {
        return Err(Error::invalid(format!(
            "viewport {}x{} has no area",
            vp.width, vp.height
        )));
    }
    if vp.min_depth > vp.max_depth {
        return Err(Error::invalid("viewport depth range is inverted"));
    }
    let sc = &snapshot.scissor;
    if sc.enabled && (sc.width <= 0 || sc.height <= 0) {
        return Err(Error::invalid(format!(
            "scissor {}x{} has no area",
            sc.width, sc.height
        )));
    }
    Ok(())
}

#[derive(Debug, Default)]
pub struct FrameEncoder {
    serial: FrameSerial,
}

impl FrameEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn serial(&self) -> FrameSerial {
        self.serial
    }

    /// Validates the snapshot, resolves both cached objects and builds the
    /// command list. Touches the backend only to compile cache misses.
    pub fn configure_draw<B: Backend>(
        &self,
        snapshot: &RenderStateSnapshot,
        target: &DrawTarget,
        cache: &mut ObjectCache<B>,
        backend: &mut B,
        layout: Option<&B::VertexLayout>,
    ) -> Result<BackendEncoderConfig<B>> {
        validate(snapshot)?;

        let pipeline_key = make_pipeline_key(snapshot, target);
        let depth_stencil_key = make_depth_stencil_key(snapshot);

        let pipeline = cache.get_or_create_pipeline(backend, &pipeline_key, layout)?;
        let depth_stencil = cache.get_or_create_depth_stencil(backend, &depth_stencil_key)?;

        let mut commands = Vec::with_capacity(7);
        commands.push(EncoderCommand::SetPipeline(pipeline));
        commands.push(EncoderCommand::SetDepthStencil(depth_stencil));
        commands.push(EncoderCommand::SetCullMode(tokens::cull_mode(
            snapshot.raster.cull_enabled,
            snapshot.raster.cull_face,
        )));
        commands.push(EncoderCommand::SetFrontFace(FRONT_FACE));

        let sc = &snapshot.scissor;
        if sc.enabled {
            commands.push(EncoderCommand::SetScissorRect(ScissorRect {
                x: sc.x,
                y: sc.y,
                width: sc.width as u32,
                height: sc.height as u32,
            }));
        }

        let vp = &snapshot.viewport;
        commands.push(EncoderCommand::SetViewport(ViewportRect {
            x: vp.x as f32,
            y: vp.y as f32,
            width: vp.width as f32,
            height: vp.height as f32,
            min_depth: vp.min_depth,
            max_depth: vp.max_depth,
        }));

        let st = &snapshot.stencil;
        if st.enabled {
            commands.push(EncoderCommand::SetStencilReference(st.reference.clamp(0, 0xFF) as u32));
        }

        Ok(EncoderConfig {
            pipeline_key,
            depth_stencil_key,
            commands,
        })
    }

    /// Submits one unit of work and advances the serial. Called exactly
    /// once per unit, including units whose encoding failed part way.
    pub fn submit_frame<B: Backend>(&mut self, backend: &mut B) -> Result<FrameSerial> {
        backend.submit()?;
        self.serial.advance();
        log::debug!("frame serial -> {}", self.serial.get());
        Ok(self.serial)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::headless::{HeadlessBackend, HeadlessDepthStencil, HeadlessPipeline};
    use crate::state::StateTracker;
    use crate::state::tokens::gl;

    type Command = EncoderCommand<HeadlessPipeline, HeadlessDepthStencil>;

    fn target() -> DrawTarget {
        DrawTarget {
            color_format: wgpu::TextureFormat::Rgba8Unorm,
            sample_count: 1,
            topology: wgpu::PrimitiveTopology::TriangleList,
            vertex_layout: None,
        }
    }

    fn kinds(commands: &[Command]) -> Vec<&'static str> {
        commands
            .iter()
            .map(|c| match c {
                EncoderCommand::SetPipeline(_) => "pipeline",
                EncoderCommand::SetDepthStencil(_) => "depth_stencil",
                EncoderCommand::SetCullMode(_) => "cull",
                EncoderCommand::SetFrontFace(_) => "front_face",
                EncoderCommand::SetScissorRect(_) => "scissor",
                EncoderCommand::SetViewport(_) => "viewport",
                EncoderCommand::SetStencilReference(_) => "stencil_ref",
            })
            .collect()
    }

    #[test]
    fn default_state_emits_minimal_sequence() {
        let mut backend = HeadlessBackend::new();
        let mut cache = ObjectCache::new();
        let tracker = StateTracker::new();
        let cfg = FrameEncoder::new()
            .configure_draw(tracker.snapshot(), &target(), &mut cache, &mut backend, None)
            .unwrap();

        assert_eq!(
            kinds(cfg.commands()),
            ["pipeline", "depth_stencil", "cull", "front_face", "viewport"]
        );
        assert_eq!(cfg.commands()[2], EncoderCommand::SetCullMode(Some(wgpu::Face::Back)));
        assert_eq!(cfg.commands()[3], EncoderCommand::SetFrontFace(wgpu::FrontFace::Ccw));
    }

    #[test]
    fn scissor_and_stencil_reference_follow_their_enables() {
        let mut backend = HeadlessBackend::new();
        let mut cache = ObjectCache::new();
        let mut tracker = StateTracker::new();
        tracker.set_cull_state(false, gl::BACK);
        tracker.set_scissor(true, 2, 3, 40, 50);
        tracker.set_stencil_state(crate::state::StencilState {
            enabled: true,
            reference: 300,
            ..Default::default()
        });

        let cfg = FrameEncoder::new()
            .configure_draw(tracker.snapshot(), &target(), &mut cache, &mut backend, None)
            .unwrap();
        assert_eq!(
            kinds(cfg.commands()),
            ["pipeline", "depth_stencil", "cull", "front_face", "scissor", "viewport", "stencil_ref"]
        );
        assert_eq!(cfg.commands()[2], EncoderCommand::SetCullMode(None));
        assert_eq!(cfg.commands()[6], EncoderCommand::SetStencilReference(0xFF));
    }

    #[test]
    fn compilation_failure_reports_initialization_failed() {
        let mut backend = HeadlessBackend::new();
        backend.fail_next_depth_stencil_compiles(1);
        let mut cache = ObjectCache::new();
        let tracker = StateTracker::new();
        let err = FrameEncoder::new()
            .configure_draw(tracker.snapshot(), &target(), &mut cache, &mut backend, None)
            .unwrap_err();
        assert_eq!(err.status(), crate::Status::InitializationFailed);
    }

    #[test]
    fn submit_advances_serial_once() {
        let mut backend = HeadlessBackend::new();
        let mut encoder = FrameEncoder::new();
        assert_eq!(encoder.serial().get(), 0);
        encoder.submit_frame(&mut backend).unwrap();
        assert_eq!(encoder.serial().get(), 1);
        assert_eq!(backend.submissions(), 1);
    }

    #[test]
    fn serial_selects_slots_modulo_count() {
        let mut s = FrameSerial::default();
        let slots: Vec<u32> = (0..5)
            .map(|_| {
                let slot = s.slot(3);
                s.advance();
                slot
            })
            .collect();
        assert_eq!(slots, [0, 1, 2, 0, 1]);
        assert_eq!(FrameSerial(u64::MAX).slot(1), 0);
    }
}
