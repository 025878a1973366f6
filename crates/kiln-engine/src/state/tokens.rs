//! Legacy enum tokens → wgpu translation tables.
//!
//! Tables that describe *how* to render (blend factor/equation, compare
//! function, stencil op, cull face) fall back to a neutral value on unknown
//! tokens and warn once per table. Tables that describe *what* to render
//! (primitive mode, index type) reject unknown tokens.

use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::{Error, Result};

/// Legacy token values.
pub mod gl {
    pub const ZERO: u32 = 0;
    pub const ONE: u32 = 1;
    pub const SRC_COLOR: u32 = 0x0300;
    pub const ONE_MINUS_SRC_COLOR: u32 = 0x0301;
    pub const SRC_ALPHA: u32 = 0x0302;
    pub const ONE_MINUS_SRC_ALPHA: u32 = 0x0303;
    pub const DST_ALPHA: u32 = 0x0304;
    pub const ONE_MINUS_DST_ALPHA: u32 = 0x0305;
    pub const DST_COLOR: u32 = 0x0306;
    pub const ONE_MINUS_DST_COLOR: u32 = 0x0307;
    pub const SRC_ALPHA_SATURATE: u32 = 0x0308;
    pub const CONSTANT_COLOR: u32 = 0x8001;
    pub const ONE_MINUS_CONSTANT_COLOR: u32 = 0x8002;
    pub const CONSTANT_ALPHA: u32 = 0x8003;
    pub const ONE_MINUS_CONSTANT_ALPHA: u32 = 0x8004;

    pub const FUNC_ADD: u32 = 0x8006;
    pub const MIN: u32 = 0x8007;
    pub const MAX: u32 = 0x8008;
    pub const FUNC_SUBTRACT: u32 = 0x800A;
    pub const FUNC_REVERSE_SUBTRACT: u32 = 0x800B;

    pub const NEVER: u32 = 0x0200;
    pub const LESS: u32 = 0x0201;
    pub const EQUAL: u32 = 0x0202;
    pub const LEQUAL: u32 = 0x0203;
    pub const GREATER: u32 = 0x0204;
    pub const NOTEQUAL: u32 = 0x0205;
    pub const GEQUAL: u32 = 0x0206;
    pub const ALWAYS: u32 = 0x0207;

    pub const KEEP: u32 = 0x1E00;
    pub const REPLACE: u32 = 0x1E01;
    pub const INCR: u32 = 0x1E02;
    pub const DECR: u32 = 0x1E03;
    pub const INVERT: u32 = 0x150A;
    pub const INCR_WRAP: u32 = 0x8507;
    pub const DECR_WRAP: u32 = 0x8508;

    pub const FRONT: u32 = 0x0404;
    pub const BACK: u32 = 0x0405;
    pub const FRONT_AND_BACK: u32 = 0x0408;

    pub const POINTS: u32 = 0x0000;
    pub const LINES: u32 = 0x0001;
    pub const LINE_LOOP: u32 = 0x0002;
    pub const LINE_STRIP: u32 = 0x0003;
    pub const TRIANGLES: u32 = 0x0004;
    pub const TRIANGLE_STRIP: u32 = 0x0005;
    pub const TRIANGLE_FAN: u32 = 0x0006;

    pub const BYTE: u32 = 0x1400;
    pub const UNSIGNED_BYTE: u32 = 0x1401;
    pub const SHORT: u32 = 0x1402;
    pub const UNSIGNED_SHORT: u32 = 0x1403;
    pub const INT: u32 = 0x1404;
    pub const UNSIGNED_INT: u32 = 0x1405;
    pub const FLOAT: u32 = 0x1406;
}

static WARNED_BLEND_FACTOR: AtomicBool = AtomicBool::new(false);
static WARNED_BLEND_EQUATION: AtomicBool = AtomicBool::new(false);
static WARNED_COMPARE: AtomicBool = AtomicBool::new(false);
static WARNED_STENCIL_OP: AtomicBool = AtomicBool::new(false);
static WARNED_CULL_FACE: AtomicBool = AtomicBool::new(false);

fn warn_fallback(flag: &AtomicBool, table: &str, token: u32, fallback: &dyn std::fmt::Debug) {
    if !flag.swap(true, Ordering::Relaxed) {
        log::warn!("unknown {table} token {token:#06x}; using {fallback:?} (reported once)");
    }
}

// ── blend ────────────────────────────────────────────────────────────────

pub fn blend_factor(token: u32) -> wgpu::BlendFactor {
    use wgpu::BlendFactor as F;
    match token {
        gl::ZERO => F::Zero,
        gl::ONE => F::One,
        gl::SRC_COLOR => F::Src,
        gl::ONE_MINUS_SRC_COLOR => F::OneMinusSrc,
        gl::SRC_ALPHA => F::SrcAlpha,
        gl::ONE_MINUS_SRC_ALPHA => F::OneMinusSrcAlpha,
        gl::DST_ALPHA => F::DstAlpha,
        gl::ONE_MINUS_DST_ALPHA => F::OneMinusDstAlpha,
        gl::DST_COLOR => F::Dst,
        gl::ONE_MINUS_DST_COLOR => F::OneMinusDst,
        gl::SRC_ALPHA_SATURATE => F::SrcAlphaSaturated,
        // wgpu has a single blend constant; alpha variants share it.
        gl::CONSTANT_COLOR | gl::CONSTANT_ALPHA => F::Constant,
        gl::ONE_MINUS_CONSTANT_COLOR | gl::ONE_MINUS_CONSTANT_ALPHA => F::OneMinusConstant,
        other => {
            warn_fallback(&WARNED_BLEND_FACTOR, "blend factor", other, &F::One);
            F::One
        }
    }
}

pub fn blend_operation(token: u32) -> wgpu::BlendOperation {
    use wgpu::BlendOperation as Op;
    match token {
        gl::FUNC_ADD => Op::Add,
        gl::FUNC_SUBTRACT => Op::Subtract,
        gl::FUNC_REVERSE_SUBTRACT => Op::ReverseSubtract,
        gl::MIN => Op::Min,
        gl::MAX => Op::Max,
        other => {
            warn_fallback(&WARNED_BLEND_EQUATION, "blend equation", other, &Op::Add);
            Op::Add
        }
    }
}

/// Builds one blend component.
///
/// Min/Max ignore factors in the legacy model; wgpu requires them to be One.
pub fn blend_component(src: u32, dst: u32, equation: u32) -> wgpu::BlendComponent {
    let operation = blend_operation(equation);
    let (src_factor, dst_factor) = match operation {
        wgpu::BlendOperation::Min | wgpu::BlendOperation::Max => {
            (wgpu::BlendFactor::One, wgpu::BlendFactor::One)
        }
        _ => (blend_factor(src), blend_factor(dst)),
    };
    wgpu::BlendComponent {
        src_factor,
        dst_factor,
        operation,
    }
}

// ── depth / stencil ─────────────────────────────────────────────────────

pub fn compare_function(token: u32) -> wgpu::CompareFunction {
    use wgpu::CompareFunction as C;
    match token {
        gl::NEVER => C::Never,
        gl::LESS => C::Less,
        gl::EQUAL => C::Equal,
        gl::LEQUAL => C::LessEqual,
        gl::GREATER => C::Greater,
        gl::NOTEQUAL => C::NotEqual,
        gl::GEQUAL => C::GreaterEqual,
        gl::ALWAYS => C::Always,
        other => {
            warn_fallback(&WARNED_COMPARE, "compare function", other, &C::Always);
            C::Always
        }
    }
}

pub fn stencil_operation(token: u32) -> wgpu::StencilOperation {
    use wgpu::StencilOperation as S;
    match token {
        gl::KEEP => S::Keep,
        gl::ZERO => S::Zero,
        gl::REPLACE => S::Replace,
        gl::INCR => S::IncrementClamp,
        gl::DECR => S::DecrementClamp,
        gl::INVERT => S::Invert,
        gl::INCR_WRAP => S::IncrementWrap,
        gl::DECR_WRAP => S::DecrementWrap,
        other => {
            warn_fallback(&WARNED_STENCIL_OP, "stencil op", other, &S::Keep);
            S::Keep
        }
    }
}

// ── raster ──────────────────────────────────────────────────────────────

/// Translates the cull-face token. FRONT_AND_BACK has no wgpu equivalent
/// and takes the fallback.
pub fn cull_face(token: u32) -> wgpu::Face {
    match token {
        gl::FRONT => wgpu::Face::Front,
        gl::BACK => wgpu::Face::Back,
        other => {
            warn_fallback(&WARNED_CULL_FACE, "cull face", other, &wgpu::Face::Back);
            wgpu::Face::Back
        }
    }
}

pub fn cull_mode(enabled: bool, face: u32) -> Option<wgpu::Face> {
    enabled.then(|| cull_face(face))
}

// ── draw ────────────────────────────────────────────────────────────────

pub fn primitive_topology(mode: u32) -> Result<wgpu::PrimitiveTopology> {
    use wgpu::PrimitiveTopology as T;
    match mode {
        gl::POINTS => Ok(T::PointList),
        gl::LINES => Ok(T::LineList),
        gl::LINE_STRIP => Ok(T::LineStrip),
        gl::TRIANGLES => Ok(T::TriangleList),
        gl::TRIANGLE_STRIP => Ok(T::TriangleStrip),
        gl::LINE_LOOP | gl::TRIANGLE_FAN => Err(Error::invalid(format!(
            "primitive mode {mode:#x} has no native topology"
        ))),
        other => Err(Error::invalid(format!("unknown primitive mode {other:#x}"))),
    }
}

pub fn index_format(token: u32) -> Result<wgpu::IndexFormat> {
    match token {
        gl::UNSIGNED_SHORT => Ok(wgpu::IndexFormat::Uint16),
        gl::UNSIGNED_INT => Ok(wgpu::IndexFormat::Uint32),
        other => Err(Error::invalid(format!("unsupported index type {other:#x}"))),
    }
}
