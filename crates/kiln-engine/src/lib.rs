//! Kiln engine crate.
//!
//! Translates a legacy immediate-mode render-state API (blend, depth,
//! stencil, raster, scissor and viewport setters followed by draws) onto
//! precompiled pipeline objects and explicitly encoded GPU work.

pub mod backend;
pub mod buffer;
pub mod cache;
pub mod config;
pub mod encoder;
pub mod error;
pub mod key;
pub mod logging;
pub mod state;
pub mod ui;
pub mod vertex;

mod context;

pub use buffer::{BufferHandle, BufferUsage};
pub use config::{ContextConfig, DebugFlags};
pub use context::{Context, ContextStats};
pub use error::{BackendError, Error, Result, Status};
pub use state::{RenderStateSnapshot, StencilState};
pub use vertex::VertexLayoutHandle;
