use std::borrow::Cow;

/// Built-in shader: passes `@location(0)` through as clip position, or
/// generates a full-screen triangle when no vertex layout is bound.
pub const PASSTHROUGH_WGSL: &str = include_str!("passthrough.wgsl");

/// Initialization parameters for the wgpu backend.
#[derive(Debug, Clone)]
pub struct WgpuInit {
    /// FIFO is broadly supported and the safe default.
    pub present_mode: wgpu::PresentMode,

    /// Used when supported by the surface; otherwise the first supported mode.
    pub alpha_mode: Option<wgpu::CompositeAlphaMode>,

    pub power_preference: wgpu::PowerPreference,

    pub required_features: wgpu::Features,
    pub required_limits: wgpu::Limits,

    /// Hint only; support depends on platform/backend.
    pub desired_maximum_frame_latency: u32,

    /// WGSL source providing `vs_main` (position at location 0),
    /// `vs_generated` (no vertex input) and `fs_main`.
    pub shader_source: Cow<'static, str>,
}

impl Default for WgpuInit {
    fn default() -> Self {
        Self {
            present_mode: wgpu::PresentMode::Fifo,
            alpha_mode: None,
            power_preference: wgpu::PowerPreference::HighPerformance,
            required_features: wgpu::Features::empty(),
            required_limits: wgpu::Limits::default(),
            desired_maximum_frame_latency: 2,
            shader_source: Cow::Borrowed(PASSTHROUGH_WGSL),
        }
    }
}
