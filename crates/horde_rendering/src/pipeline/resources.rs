//! GPU buffers owned by the renderer.

use tracing::info;

use crate::device::{BufferDesc, BufferRole, CullBindings, GpuDevice};
use crate::error::{RenderError, RenderResult};
use crate::instancing::{ArgumentBuilder, CullParams, DrawIndexedIndirectArgs, GpuInstance, InstanceStore, ModelSlot, ModelTable};

/// Every buffer of the indirect path, allocated once at setup.
///
/// `release` consumes the set, so each buffer is freed exactly once.
#[derive(Debug)]
pub struct PipelineBuffers<B> {
    /// `CullParams` uniform.
    pub params: B,
    /// Instance store.
    pub instances: B,
    /// Model slots.
    pub models: B,
    /// Per-model visible counters.
    pub counters: B,
    /// Visible sets.
    pub visible: B,
    /// Indirect args, one record per model.
    pub args: B,
}

impl<B: Clone> PipelineBuffers<B> {
    /// Allocates and fills every buffer. Uploads land before the next submit.
    ///
    /// On failure, buffers created so far are released.
    ///
    /// # Errors
    ///
    /// Whatever buffer creation returns.
    pub fn create<D: GpuDevice<Buffer = B>>(
        device: &mut D,
        models: &ModelTable,
        store: &InstanceStore,
    ) -> RenderResult<Self> {
        let model_count = u64::from(models.count());
        let descs = [
            BufferDesc { label: "Cull Params", size: std::mem::size_of::<CullParams>() as u64, role: BufferRole::Uniform },
            BufferDesc {
                label: "Instance Store",
                size: u64::from(store.len()).max(1) * GpuInstance::SIZE as u64,
                role: BufferRole::InstanceStore,
            },
            BufferDesc {
                label: "Model Slots",
                size: model_count * std::mem::size_of::<ModelSlot>() as u64,
                role: BufferRole::ModelTable,
            },
            BufferDesc { label: "Visible Counters", size: model_count * 4, role: BufferRole::Counters },
            BufferDesc {
                label: "Visible Sets",
                size: u64::from(models.visible_capacity()).max(1) * 4,
                role: BufferRole::VisibleSets,
            },
            BufferDesc {
                label: "Indirect Args",
                size: model_count * DrawIndexedIndirectArgs::SIZE,
                role: BufferRole::IndirectArgs,
            },
        ];

        let mut created = Vec::with_capacity(descs.len());
        for desc in &descs {
            match device.create_buffer(desc) {
                Ok(buffer) => created.push(buffer),
                Err(err) => {
                    for buffer in created {
                        device.release_buffer(buffer);
                    }
                    return Err(err);
                }
            }
        }
        let [params, instances, slots, counters, visible, args]: [B; 6] = created
            .try_into()
            .map_err(|_| RenderError::Configuration("pipeline buffer set incomplete".into()))?;
        let buffers = Self { params, instances, models: slots, counters, visible, args };

        let slots: Vec<ModelSlot> = models.models().iter().map(|m| m.slot()).collect();
        device.write_buffer(&buffers.models, 0, bytemuck::cast_slice(&slots));
        buffers.upload_population(device, models, store);

        let total: u64 = descs.iter().map(|d| d.size).sum();
        info!(buffers = descs.len(), bytes = total, models = model_count, instances = store.len(), "pipeline buffers allocated");
        Ok(buffers)
    }

    /// Re-uploads the instance store and invalidates every visible set:
    /// counters and visible sets cleared, args reset to zero instances.
    pub fn upload_population<D: GpuDevice<Buffer = B>>(&self, device: &mut D, models: &ModelTable, store: &InstanceStore) {
        device.write_buffer(&self.instances, 0, store.as_bytes());
        device.write_buffer(&self.args, 0, bytemuck::cast_slice(&ArgumentBuilder::initial_args(models)));
        device.clear_buffer(&self.counters);
        device.clear_buffer(&self.visible);
    }

    /// Bindings for the cull kernel.
    #[must_use]
    pub fn bindings(&self) -> CullBindings<'_, B> {
        CullBindings {
            params: &self.params,
            instances: &self.instances,
            models: &self.models,
            counters: &self.counters,
            visible: &self.visible,
        }
    }

    /// Frees every buffer.
    pub fn release<D: GpuDevice<Buffer = B>>(self, device: &mut D) {
        for buffer in [self.params, self.instances, self.models, self.counters, self.visible, self.args] {
            device.release_buffer(buffer);
        }
    }
}
