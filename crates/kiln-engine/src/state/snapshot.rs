use super::tokens::gl;

/// Blend aspect. Factor and equation fields hold raw legacy tokens.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct BlendState {
    pub enabled: bool,
    pub src_rgb: u32,
    pub dst_rgb: u32,
    pub src_alpha: u32,
    pub dst_alpha: u32,
    pub equation_rgb: u32,
    pub equation_alpha: u32,
}

impl Default for BlendState {
    fn default() -> Self {
        Self {
            enabled: false,
            src_rgb: gl::ONE,
            dst_rgb: gl::ZERO,
            src_alpha: gl::ONE,
            dst_alpha: gl::ZERO,
            equation_rgb: gl::FUNC_ADD,
            equation_alpha: gl::FUNC_ADD,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct DepthState {
    pub test_enabled: bool,
    pub write_enabled: bool,
    pub compare: u32,
}

impl Default for DepthState {
    fn default() -> Self {
        Self {
            test_enabled: false,
            write_enabled: true,
            compare: gl::LEQUAL,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct StencilState {
    pub enabled: bool,
    pub func: u32,
    pub reference: i32,
    pub read_mask: u32,
    pub write_mask: u32,
    pub fail_op: u32,
    pub depth_fail_op: u32,
    pub pass_op: u32,
}

impl Default for StencilState {
    fn default() -> Self {
        Self {
            enabled: false,
            func: gl::ALWAYS,
            reference: 0,
            read_mask: 0xFF,
            write_mask: 0xFF,
            fail_op: gl::KEEP,
            depth_fail_op: gl::KEEP,
            pass_op: gl::KEEP,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct RasterState {
    pub cull_enabled: bool,
    pub cull_face: u32,
}

impl Default for RasterState {
    fn default() -> Self {
        Self {
            cull_enabled: true,
            cull_face: gl::BACK,
        }
    }
}

/// Scissor rectangle in lower-left-origin pixel coordinates.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct ScissorState {
    pub enabled: bool,
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl Default for ScissorState {
    fn default() -> Self {
        Self {
            enabled: false,
            x: 0,
            y: 0,
            width: 1,
            height: 1,
        }
    }
}

/// Viewport rectangle in lower-left-origin pixel coordinates.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct ViewportState {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
    pub min_depth: f32,
    pub max_depth: f32,
}

impl Default for ViewportState {
    fn default() -> Self {
        Self {
            x: 0,
            y: 0,
            width: 1,
            height: 1,
            min_depth: 0.0,
            max_depth: 1.0,
        }
    }
}

/// Complete legacy render state at one point in time.
///
/// Replaced wholesale on every mutating setter; compared field-wise.
#[derive(Debug, Copy, Clone, PartialEq, Default)]
pub struct RenderStateSnapshot {
    pub blend: BlendState,
    pub depth: DepthState,
    pub stencil: StencilState,
    pub raster: RasterState,
    pub scissor: ScissorState,
    pub viewport: ViewportState,
}
