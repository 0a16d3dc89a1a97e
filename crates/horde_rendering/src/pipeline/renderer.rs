//! Renderer orchestrator.

use std::time::Instant;

use tracing::{debug, info, trace, warn};

use super::resources::PipelineBuffers;
use super::state::RendererState;
use super::stats::{DrawPath, RenderStats};
use crate::config::{RendererConfig, SubmitMode};
use crate::culling::{CullingStage, Frustum};
use crate::device::GpuDevice;
use crate::draw::{DrawBackend, DrawSubmitter};
use crate::error::{RenderError, RenderResult};
use crate::instancing::{ArgumentBuilder, GeometryProvider, Instance, InstanceStore, ModelDesc, ModelTable};

struct Scene<B> {
    models: ModelTable,
    store: InstanceStore,
    path: DrawPath,
    buffers: Option<PipelineBuffers<B>>,
}

/// Multi-model instanced renderer.
///
/// Per frame, on the caller's thread and in this order: cull, build args,
/// submit, draw. The control thread never waits on the GPU.
pub struct InstancedRenderer<D: GpuDevice> {
    device: D,
    config: RendererConfig,
    state: RendererState,
    scene: Option<Scene<D::Buffer>>,
    culling: CullingStage,
    args: ArgumentBuilder,
    submitter: DrawSubmitter,
    visible_scratch: Vec<u32>,
    stats: RenderStats,
    frames: u64,
}

impl<D: GpuDevice> InstancedRenderer<D> {
    /// Creates an uninitialized renderer.
    #[must_use]
    pub fn new(device: D, config: RendererConfig) -> Self {
        Self {
            device,
            config,
            state: RendererState::Uninitialized,
            scene: None,
            culling: CullingStage::new(),
            args: ArgumentBuilder::new(),
            submitter: DrawSubmitter::new(),
            visible_scratch: Vec::new(),
            stats: RenderStats::default(),
            frames: 0,
        }
    }

    /// Builds models and a generated population, allocates buffers and
    /// moves to `Ready`.
    ///
    /// On any error the renderer stays `Uninitialized` with nothing allocated.
    ///
    /// # Errors
    ///
    /// - [`RenderError::Configuration`] for invalid models or config
    /// - [`RenderError::CapacityOverflow`] if a model outgrows its visible set
    /// - [`RenderError::BackendUnavailable`] if indirect is forced but unsupported
    /// - [`RenderError::DeviceLost`] if buffers cannot be created
    pub fn setup<K: DrawBackend<D::Buffer>>(
        &mut self,
        models: &[ModelDesc],
        geometry: &impl GeometryProvider,
        backend: &K,
    ) -> RenderResult<()> {
        self.require(RendererState::Uninitialized)?;
        let table = ModelTable::build(models, geometry, self.config.instances_per_model)?;
        let store = InstanceStore::initialize(&table, &self.config)?;
        self.finish_setup(table, store, backend)
    }

    /// Like [`InstancedRenderer::setup`], with caller-supplied instances.
    ///
    /// Each model's visible set holds `instances_per_model` entries.
    ///
    /// # Errors
    ///
    /// As [`InstancedRenderer::setup`].
    pub fn setup_with_instances<K: DrawBackend<D::Buffer>>(
        &mut self,
        models: &[ModelDesc],
        geometry: &impl GeometryProvider,
        instances: &[Instance],
        backend: &K,
    ) -> RenderResult<()> {
        self.require(RendererState::Uninitialized)?;
        self.config.validate(models.len())?;
        let table = ModelTable::build(models, geometry, self.config.instances_per_model)?;
        let store = InstanceStore::from_instances(&table, instances, self.config.max_total_instances)?;
        self.finish_setup(table, store, backend)
    }

    fn finish_setup<K: DrawBackend<D::Buffer>>(
        &mut self,
        models: ModelTable,
        store: InstanceStore,
        backend: &K,
    ) -> RenderResult<()> {
        models.validate_capacity(store.model_counts())?;
        let path = self.select_path(backend)?;

        let buffers = match path {
            DrawPath::Indirect => {
                let buffers = PipelineBuffers::create(&mut self.device, &models, &store)?;
                if let Err(err) = self.device.submit() {
                    buffers.release(&mut self.device);
                    return Err(err);
                }
                Some(buffers)
            }
            DrawPath::Batched => None,
        };

        info!(
            models = models.count(),
            instances = store.len(),
            path = path.name(),
            seed = store.seed(),
            "instanced renderer ready"
        );
        self.scene = Some(Scene { models, store, path, buffers });
        self.frames = 0;
        self.stats = RenderStats::default();
        self.state = RendererState::Ready;
        Ok(())
    }

    fn select_path<K: DrawBackend<D::Buffer>>(&self, backend: &K) -> RenderResult<DrawPath> {
        let device = self.device.supports_indirect();
        let draw = backend.supports_indirect();
        match self.config.submit_mode {
            SubmitMode::Batched => Ok(DrawPath::Batched),
            SubmitMode::Indirect if device && draw => Ok(DrawPath::Indirect),
            SubmitMode::Indirect => Err(RenderError::BackendUnavailable(format!(
                "device indirect: {device}, backend indirect: {draw}"
            ))),
            SubmitMode::Auto if device && draw => Ok(DrawPath::Indirect),
            SubmitMode::Auto => {
                warn!(device, backend = draw, "indirect draw unavailable, using batched draws");
                Ok(DrawPath::Batched)
            }
        }
    }

    /// Renders one frame against `frustum`.
    ///
    /// A lost device releases every buffer and leaves the renderer
    /// `Uninitialized`; run setup again.
    ///
    /// # Errors
    ///
    /// - [`RenderError::UseAfterDispose`] after `dispose`
    /// - [`RenderError::InvalidState`] before setup
    /// - [`RenderError::Configuration`] for a degenerate frustum
    /// - [`RenderError::DeviceLost`] if the submit fails
    /// - backend errors from the draw calls
    pub fn render_frame<K: DrawBackend<D::Buffer>>(
        &mut self,
        frustum: &Frustum,
        backend: &mut K,
    ) -> RenderResult<RenderStats> {
        self.require(RendererState::Ready)?;
        if !frustum.is_valid() {
            return Err(RenderError::Configuration("frustum has degenerate or non-finite planes".into()));
        }

        self.state = RendererState::PerFrameCycle;
        let start = Instant::now();
        let result = self.run_frame(frustum, backend);

        match result {
            Ok(mut stats) => {
                self.frames += 1;
                stats.frame_index = self.frames;
                stats.frame_time_ms = start.elapsed().as_secs_f32() * 1000.0;
                self.stats = stats;
                self.state = RendererState::Ready;
                trace!(frame = stats.frame_index, draw_calls = stats.draw_calls, "frame rendered");
                Ok(stats)
            }
            Err(err) if err.requires_reinit() => {
                warn!(%err, "device lost during frame, releasing resources");
                self.teardown();
                Err(err)
            }
            Err(err) => {
                self.state = RendererState::Ready;
                Err(err)
            }
        }
    }

    fn run_frame<K: DrawBackend<D::Buffer>>(&mut self, frustum: &Frustum, backend: &mut K) -> RenderResult<RenderStats> {
        let Self { device, config, scene, culling, args, submitter, visible_scratch, .. } = self;
        let Some(scene) = scene.as_ref() else {
            return Err(RenderError::InvalidState { expected: "ready", actual: "uninitialized" });
        };
        let model_count = scene.models.count();
        let mut stats = RenderStats {
            path: scene.path,
            models_drawn: model_count,
            total_instances: scene.store.len(),
            ..RenderStats::default()
        };

        backend.begin_frame();
        match (&scene.buffers, scene.path) {
            (Some(buffers), DrawPath::Indirect) => {
                culling.cull(device, frustum, &buffers.bindings(), scene.store.len(), model_count);
                args.build_args(device, &buffers.counters, &buffers.args, model_count);
                device.submit()?;
                stats.draw_calls = submitter.submit_indirect(
                    backend,
                    &scene.models,
                    &scene.store,
                    &buffers.args,
                    &buffers.instances,
                    &buffers.visible,
                )?;
            }
            _ => {
                submitter.begin_batched();
                let mut visible = 0;
                for model in scene.models.models() {
                    CullingStage::cull_host(frustum, &scene.store, model.id, visible_scratch);
                    #[allow(clippy::cast_possible_truncation)]
                    let count = visible_scratch.len() as u32;
                    visible += count;
                    stats.draw_calls += submitter.submit_batched(
                        backend,
                        &scene.models,
                        &scene.store,
                        model.id,
                        visible_scratch.as_slice(),
                        config.max_instances_per_batch,
                    )?;
                }
                stats.visible_instances = Some(visible);
            }
        }
        Ok(stats)
    }

    /// Regenerates the population from `seed` with the same counts.
    ///
    /// Visible sets are invalidated before the next cull.
    ///
    /// # Errors
    ///
    /// [`RenderError::UseAfterDispose`], [`RenderError::InvalidState`] before
    /// setup, or [`RenderError::DeviceLost`] (renderer left `Uninitialized`).
    pub fn rebuild(&mut self, seed: u64) -> RenderResult<()> {
        self.require(RendererState::Ready)?;
        let Self { device, config, scene, .. } = self;
        let Some(scene) = scene.as_mut() else {
            return Err(RenderError::InvalidState { expected: "ready", actual: "uninitialized" });
        };
        scene.store.rebuild(&scene.models, config, seed)?;

        if let Some(buffers) = &scene.buffers {
            buffers.upload_population(device, &scene.models, &scene.store);
            if let Err(err) = device.submit() {
                warn!(%err, "device lost during rebuild, releasing resources");
                self.teardown();
                return Err(err);
            }
        }
        debug!(seed, "population rebuilt");
        Ok(())
    }

    /// Releases resources and returns to `Uninitialized` so setup can run
    /// again, e.g. with different counts via [`InstancedRenderer::reconfigure`].
    ///
    /// # Errors
    ///
    /// [`RenderError::UseAfterDispose`] after `dispose`.
    pub fn reset(&mut self) -> RenderResult<()> {
        if self.state == RendererState::Disposed {
            return Err(RenderError::UseAfterDispose);
        }
        self.teardown();
        Ok(())
    }

    /// Replaces the config. Only valid while `Uninitialized`.
    ///
    /// # Errors
    ///
    /// [`RenderError::UseAfterDispose`] or [`RenderError::InvalidState`].
    pub fn reconfigure(&mut self, config: RendererConfig) -> RenderResult<()> {
        self.require(RendererState::Uninitialized)?;
        self.config = config;
        Ok(())
    }

    /// Releases every buffer and moves to `Disposed` for good.
    ///
    /// # Errors
    ///
    /// [`RenderError::UseAfterDispose`] if already disposed.
    pub fn dispose(&mut self) -> RenderResult<()> {
        if self.state == RendererState::Disposed {
            return Err(RenderError::UseAfterDispose);
        }
        self.release_scene();
        self.state = RendererState::Disposed;
        info!(frames = self.frames, "instanced renderer disposed");
        Ok(())
    }

    fn teardown(&mut self) {
        self.release_scene();
        self.state = RendererState::Uninitialized;
    }

    fn release_scene(&mut self) {
        if let Some(buffers) = self.scene.take().and_then(|s| s.buffers) {
            buffers.release(&mut self.device);
        }
    }

    fn require(&self, expected: RendererState) -> RenderResult<()> {
        match self.state {
            s if s == expected => Ok(()),
            RendererState::Disposed => Err(RenderError::UseAfterDispose),
            actual => Err(RenderError::InvalidState { expected: expected.name(), actual: actual.name() }),
        }
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> RendererState {
        self.state
    }

    /// Stats of the last rendered frame.
    #[must_use]
    pub fn stats(&self) -> RenderStats {
        self.stats
    }

    /// Path chosen at setup.
    #[must_use]
    pub fn path(&self) -> Option<DrawPath> {
        self.scene.as_ref().map(|s| s.path)
    }

    /// Model table, once set up.
    #[must_use]
    pub fn models(&self) -> Option<&ModelTable> {
        self.scene.as_ref().map(|s| &s.models)
    }

    /// Instance store, once set up.
    #[must_use]
    pub fn store(&self) -> Option<&InstanceStore> {
        self.scene.as_ref().map(|s| &s.store)
    }

    /// GPU buffers of the indirect path.
    #[must_use]
    pub fn buffers(&self) -> Option<&PipelineBuffers<D::Buffer>> {
        self.scene.as_ref().and_then(|s| s.buffers.as_ref())
    }

    /// Active config.
    #[must_use]
    pub fn config(&self) -> &RendererConfig {
        &self.config
    }

    /// The device.
    #[must_use]
    pub fn device(&self) -> &D {
        &self.device
    }

    /// The device, mutably.
    pub fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }
}

impl<D: GpuDevice> Drop for InstancedRenderer<D> {
    fn drop(&mut self) {
        self.release_scene();
    }
}

impl<D: GpuDevice + std::fmt::Debug> std::fmt::Debug for InstancedRenderer<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstancedRenderer")
            .field("device", &self.device)
            .field("state", &self.state)
            .field("path", &self.path())
            .field("frames", &self.frames)
            .finish_non_exhaustive()
    }
}
