//! Memoizing object caches.
//!
//! Pipeline and depth-stencil objects are compiled lazily on first request
//! and kept for the lifetime of the context. Keys are small and bounded by
//! the legacy token space, so nothing is evicted. Failed compilations are
//! not cached; the next identical request compiles again.

use rustc_hash::FxHashMap;

use crate::backend::Backend;
use crate::error::{Error, ObjectKind, Result};
use crate::key::{DepthStencilKey, PipelineKey};

#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct CacheStats {
    pub pipelines: usize,
    pub depth_stencils: usize,
    pub hits: u64,
    pub misses: u64,
    pub failures: u64,
}

pub struct ObjectCache<B: Backend> {
    pipelines: FxHashMap<PipelineKey, B::Pipeline>,
    depth_stencils: FxHashMap<DepthStencilKey, B::DepthStencil>,
    hits: u64,
    misses: u64,
    failures: u64,
}

impl<B: Backend> Default for ObjectCache<B> {
    fn default() -> Self {
        Self::new()
    }
}

impl<B: Backend> ObjectCache<B> {
    pub fn new() -> Self {
        Self {
            pipelines: FxHashMap::default(),
            depth_stencils: FxHashMap::default(),
            hits: 0,
            misses: 0,
            failures: 0,
        }
    }

    pub fn get_or_create_pipeline(
        &mut self,
        backend: &mut B,
        key: &PipelineKey,
        layout: Option<&B::VertexLayout>,
    ) -> Result<B::Pipeline> {
        if let Some(pipeline) = self.pipelines.get(key) {
            self.hits += 1;
            return Ok(pipeline.clone());
        }

        self.misses += 1;
        let key_hash = key.diagnostic_hash();
        log::debug!("pipeline cache miss (key {key_hash:#018x})");

        match backend.compile_pipeline(key, layout) {
            Ok(pipeline) => {
                self.pipelines.insert(*key, pipeline.clone());
                Ok(pipeline)
            }
            Err(err) => {
                self.failures += 1;
                log::warn!("pipeline compilation failed (key {key_hash:#018x}): {err}");
                Err(Error::Compilation {
                    object: ObjectKind::Pipeline,
                    key_hash,
                    reason: err.to_string(),
                })
            }
        }
    }

    pub fn get_or_create_depth_stencil(
        &mut self,
        backend: &mut B,
        key: &DepthStencilKey,
    ) -> Result<B::DepthStencil> {
        if let Some(ds) = self.depth_stencils.get(key) {
            self.hits += 1;
            return Ok(ds.clone());
        }

        self.misses += 1;
        let key_hash = key.diagnostic_hash();
        log::debug!("depth-stencil cache miss (key {key_hash:#018x})");

        match backend.compile_depth_stencil(key) {
            Ok(ds) => {
                self.depth_stencils.insert(*key, ds.clone());
                Ok(ds)
            }
            Err(err) => {
                self.failures += 1;
                log::warn!("depth-stencil compilation failed (key {key_hash:#018x}): {err}");
                Err(Error::Compilation {
                    object: ObjectKind::DepthStencil,
                    key_hash,
                    reason: err.to_string(),
                })
            }
        }
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            pipelines: self.pipelines.len(),
            depth_stencils: self.depth_stencils.len(),
            hits: self.hits,
            misses: self.misses,
            failures: self.failures,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::headless::HeadlessBackend;
    use crate::key::{DrawTarget, make_depth_stencil_key, make_pipeline_key};
    use crate::state::RenderStateSnapshot;
    use crate::state::tokens::gl;

    fn keys(snapshot: &RenderStateSnapshot) -> (PipelineKey, DepthStencilKey) {
        let target = DrawTarget {
            color_format: wgpu::TextureFormat::Rgba8Unorm,
            sample_count: 1,
            topology: wgpu::PrimitiveTopology::TriangleList,
            vertex_layout: None,
        };
        (make_pipeline_key(snapshot, &target), make_depth_stencil_key(snapshot))
    }

    #[test]
    fn equal_keys_compile_once() {
        let mut backend = HeadlessBackend::new();
        let mut cache = ObjectCache::<HeadlessBackend>::new();
        let (pk, dk) = keys(&RenderStateSnapshot::default());

        let a = cache.get_or_create_pipeline(&mut backend, &pk, None).unwrap();
        let b = cache.get_or_create_pipeline(&mut backend, &pk, None).unwrap();
        assert_eq!(a, b);
        cache.get_or_create_depth_stencil(&mut backend, &dk).unwrap();
        cache.get_or_create_depth_stencil(&mut backend, &dk).unwrap();

        assert_eq!(backend.pipeline_compilations(), 1);
        assert_eq!(backend.depth_stencil_compilations(), 1);
        let stats = cache.stats();
        assert_eq!((stats.hits, stats.misses), (2, 2));
    }

    #[test]
    fn distinct_keys_compile_separately() {
        let mut backend = HeadlessBackend::new();
        let mut cache = ObjectCache::<HeadlessBackend>::new();
        let plain = RenderStateSnapshot::default();
        let mut blended = plain;
        blended.blend.enabled = true;
        blended.blend.src_rgb = gl::SRC_ALPHA;

        cache.get_or_create_pipeline(&mut backend, &keys(&plain).0, None).unwrap();
        cache.get_or_create_pipeline(&mut backend, &keys(&blended).0, None).unwrap();
        assert_eq!(backend.pipeline_compilations(), 2);
        assert_eq!(cache.stats().pipelines, 2);
    }

    #[test]
    fn failures_are_not_cached() {
        let mut backend = HeadlessBackend::new();
        backend.fail_next_pipeline_compiles(1);
        let mut cache = ObjectCache::<HeadlessBackend>::new();
        let (pk, _) = keys(&RenderStateSnapshot::default());

        let err = cache.get_or_create_pipeline(&mut backend, &pk, None).unwrap_err();
        assert!(matches!(
            err,
            Error::Compilation {
                object: ObjectKind::Pipeline,
                ..
            }
        ));
        assert_eq!(cache.stats().pipelines, 0);

        cache.get_or_create_pipeline(&mut backend, &pk, None).unwrap();
        assert_eq!(backend.pipeline_compilations(), 2);
        assert_eq!(cache.stats().failures, 1);
    }
}
