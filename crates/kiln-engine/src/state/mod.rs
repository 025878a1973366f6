//! Legacy render state.
//!
//! `snapshot` holds the plain-data records, `tracker` owns the live snapshot
//! and its revision, and `tokens` translates legacy enum tokens into wgpu
//! values.

pub mod snapshot;
pub mod tokens;
pub mod tracker;

pub use snapshot::{
    BlendState, DepthState, RasterState, RenderStateSnapshot, ScissorState, StencilState,
    ViewportState,
};
pub use tracker::StateTracker;
