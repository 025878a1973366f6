//! Context configuration.

use bitflags::bitflags;

bitflags! {
    /// Debug behavior requested at initialization.
    #[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Default)]
    pub struct DebugFlags: u32 {
        /// Enable backend API validation.
        const VALIDATION = 1;
        /// Attach debug labels to backend objects.
        const LABELS = 2;
    }
}

impl DebugFlags {
    /// Reads `KILN_DEBUG_VALIDATION` / `KILN_DEBUG_LABELS` ("1", "true", "on").
    pub fn from_env() -> Self {
        let mut flags = DebugFlags::empty();
        if env_enabled("KILN_DEBUG_VALIDATION") {
            flags |= DebugFlags::VALIDATION;
        }
        if env_enabled("KILN_DEBUG_LABELS") {
            flags |= DebugFlags::LABELS;
        }
        flags
    }

    /// Interprets the raw boundary integer; unknown bits are dropped.
    pub fn from_raw(bits: i32) -> Self {
        DebugFlags::from_bits_truncate(bits as u32)
    }
}

fn env_enabled(name: &str) -> bool {
    std::env::var(name)
        .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "on" | "yes"))
        .unwrap_or(false)
}

/// Parameters for [`Context::initialize`](crate::Context::initialize).
#[derive(Debug, Clone)]
pub struct ContextConfig {
    /// Drawable width in pixels. Must be positive.
    pub width: i32,
    /// Drawable height in pixels. Must be positive.
    pub height: i32,
    pub debug_flags: DebugFlags,
    /// Color target format baked into every pipeline key.
    pub color_format: wgpu::TextureFormat,
    /// Multisample count; values below 1 are treated as 1.
    pub sample_count: u32,
    /// Initial staging ring capacity in bytes. Grows on demand.
    pub staging_capacity: u64,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            width: 1,
            height: 1,
            debug_flags: DebugFlags::empty(),
            color_format: wgpu::TextureFormat::Bgra8UnormSrgb,
            sample_count: 1,
            staging_capacity: 1 << 20,
        }
    }
}

impl ContextConfig {
    pub fn with_size(width: i32, height: i32) -> Self {
        Self {
            width,
            height,
            ..Self::default()
        }
    }

    pub fn with_debug_flags(mut self, flags: DebugFlags) -> Self {
        self.debug_flags = flags;
        self
    }

    pub(crate) fn effective_sample_count(&self) -> u32 {
        self.sample_count.max(1)
    }
}
