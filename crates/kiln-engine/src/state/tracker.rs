use crate::error::{Error, Result};

use super::snapshot::{RenderStateSnapshot, ScissorState, StencilState, ViewportState};

/// Owns the live render-state snapshot.
///
/// Every setter builds a candidate snapshot, compares it with the current
/// one and only replaces it (bumping the revision) when something differs.
/// Setters never touch the backend.
#[derive(Debug, Default)]
pub struct StateTracker {
    snapshot: RenderStateSnapshot,
    revision: u64,
}

impl StateTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> &RenderStateSnapshot {
        &self.snapshot
    }

    /// Number of setter calls that actually changed the snapshot.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    fn update(&mut self, edit: impl FnOnce(&mut RenderStateSnapshot)) -> bool {
        let mut candidate = self.snapshot;
        edit(&mut candidate);
        if candidate == self.snapshot {
            return false;
        }
        self.snapshot = candidate;
        self.revision += 1;
        true
    }

    pub fn set_blend_enabled(&mut self, enabled: bool) -> bool {
        self.update(|s| s.blend.enabled = enabled)
    }

    pub fn set_blend_func(&mut self, src_rgb: u32, dst_rgb: u32, src_alpha: u32, dst_alpha: u32) -> bool {
        self.update(|s| {
            s.blend.src_rgb = src_rgb;
            s.blend.dst_rgb = dst_rgb;
            s.blend.src_alpha = src_alpha;
            s.blend.dst_alpha = dst_alpha;
        })
    }

    pub fn set_blend_equation(&mut self, rgb: u32, alpha: u32) -> bool {
        self.update(|s| {
            s.blend.equation_rgb = rgb;
            s.blend.equation_alpha = alpha;
        })
    }

    pub fn set_depth_state(&mut self, test_enabled: bool, write_enabled: bool, compare: u32) -> bool {
        self.update(|s| {
            s.depth.test_enabled = test_enabled;
            s.depth.write_enabled = write_enabled;
            s.depth.compare = compare;
        })
    }

    pub fn set_stencil_state(&mut self, stencil: StencilState) -> bool {
        self.update(|s| s.stencil = stencil)
    }

    pub fn set_cull_state(&mut self, enabled: bool, face: u32) -> bool {
        self.update(|s| {
            s.raster.cull_enabled = enabled;
            s.raster.cull_face = face;
        })
    }

    /// Width and height are floored at 1.
    pub fn set_scissor(&mut self, enabled: bool, x: i32, y: i32, width: i32, height: i32) -> bool {
        self.update(|s| {
            s.scissor = ScissorState {
                enabled,
                x,
                y,
                width: width.max(1),
                height: height.max(1),
            }
        })
    }

    /// Width and height are floored at 1 and the depth range is clamped to
    /// `[0, 1]`. An inverted or NaN depth range is rejected without mutating.
    pub fn set_viewport(
        &mut self,
        x: i32,
        y: i32,
        width: i32,
        height: i32,
        min_depth: f32,
        max_depth: f32,
    ) -> Result<bool> {
        if min_depth.is_nan() || max_depth.is_nan() {
            return Err(Error::invalid("viewport depth range contains NaN"));
        }
        let min_depth = min_depth.clamp(0.0, 1.0);
        let max_depth = max_depth.clamp(0.0, 1.0);
        if min_depth > max_depth {
            return Err(Error::invalid(format!(
                "viewport min depth {min_depth} exceeds max depth {max_depth}"
            )));
        }

        Ok(self.update(|s| {
            s.viewport = ViewportState {
                x,
                y,
                width: width.max(1),
                height: height.max(1),
                min_depth,
                max_depth,
            }
        }))
    }
}
