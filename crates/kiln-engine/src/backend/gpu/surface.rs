use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;

use crate::backend::{PresentationSurface, SurfaceGeometry};
use crate::error::BackendError;

pub(crate) fn choose_alpha_mode(
    caps: &wgpu::SurfaceCapabilities,
    requested: Option<wgpu::CompositeAlphaMode>,
) -> wgpu::CompositeAlphaMode {
    requested
        .filter(|m| caps.alpha_modes.contains(m))
        .or_else(|| caps.alpha_modes.first().copied())
        .unwrap_or(wgpu::CompositeAlphaMode::Auto)
}

struct Shared {
    surface: wgpu::Surface<'static>,
    device: Arc<wgpu::Device>,
    config: Mutex<wgpu::SurfaceConfiguration>,
    detached: AtomicBool,
}

/// Shared handle on the configured wgpu surface.
///
/// The backend acquires frames through it; the UI thread reconfigures it
/// on resize and detaches it on shutdown.
#[derive(Clone)]
pub struct WgpuSurface {
    shared: Arc<Shared>,
}

impl WgpuSurface {
    pub(crate) fn new(
        surface: wgpu::Surface<'static>,
        device: Arc<wgpu::Device>,
        config: wgpu::SurfaceConfiguration,
    ) -> Self {
        surface.configure(&device, &config);
        Self {
            shared: Arc::new(Shared {
                surface,
                device,
                config: Mutex::new(config),
                detached: AtomicBool::new(false),
            }),
        }
    }

    pub fn format(&self) -> wgpu::TextureFormat {
        self.shared.config.lock().format
    }

    pub fn size(&self) -> (u32, u32) {
        let config = self.shared.config.lock();
        (config.width, config.height)
    }

    /// Acquires the next drawable. Lost or outdated surfaces are
    /// reconfigured and the frame is skipped.
    pub(crate) fn acquire(&self) -> Result<wgpu::SurfaceTexture, BackendError> {
        if self.shared.detached.load(Ordering::Acquire) {
            return Err(BackendError::Resource("surface is detached".into()));
        }
        match self.shared.surface.get_current_texture() {
            Ok(texture) => Ok(texture),
            Err(wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated) => {
                let config = self.shared.config.lock();
                self.shared.surface.configure(&self.shared.device, &config);
                Err(BackendError::Resource("surface reconfigured; frame skipped".into()))
            }
            Err(wgpu::SurfaceError::OutOfMemory) => {
                Err(BackendError::Resource("out of memory acquiring surface texture".into()))
            }
            Err(err) => Err(BackendError::Resource(format!("surface texture unavailable: {err}"))),
        }
    }
}

impl PresentationSurface for WgpuSurface {
    fn apply_geometry(&self, geometry: SurfaceGeometry) {
        if self.shared.detached.load(Ordering::Acquire) {
            return;
        }
        // Zero-sized configuration is invalid; keep the previous one.
        if geometry.width == 0 || geometry.height == 0 {
            return;
        }
        let mut config = self.shared.config.lock();
        config.width = geometry.width;
        config.height = geometry.height;
        self.shared.surface.configure(&self.shared.device, &config);
    }

    fn detach(&self) {
        self.shared.detached.store(true, Ordering::Release);
    }
}
