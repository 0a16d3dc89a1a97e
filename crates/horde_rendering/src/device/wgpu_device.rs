//! `wgpu` implementation of the device seam.

use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, error, info, trace, warn};

use super::{BufferDesc, BufferRole, CullBindings, GpuDevice};
use crate::culling::shaders::{CULL_ENTRY_POINT, CULL_SHADER_WGSL};
use crate::error::{RenderError, RenderResult};

type BindGroupKey = [usize; 5];

/// Whether the indirect path can run: indirect execution, storage buffers
/// in the vertex stage for the visible-set fetch, and a non-zero
/// `first_instance` in the args.
fn indirect_supported(downlevel: wgpu::DownlevelFlags, features: wgpu::Features) -> bool {
    downlevel.contains(wgpu::DownlevelFlags::INDIRECT_EXECUTION | wgpu::DownlevelFlags::VERTEX_STORAGE)
        && features.contains(wgpu::Features::INDIRECT_FIRST_INSTANCE)
}

fn loss_handler(lost: Arc<AtomicBool>) -> impl Fn(wgpu::DeviceLostReason, String) + Send + 'static {
    move |reason, message| {
        error!(?reason, %message, "wgpu device lost");
        lost.store(true, Ordering::Release);
    }
}

/// Compute-capable `wgpu` device with one command encoder per frame.
pub struct WgpuDevice {
    device: Arc<wgpu::Device>,
    queue: Arc<wgpu::Queue>,
    indirect: bool,
    lost: Arc<AtomicBool>,
    cull_layout: wgpu::BindGroupLayout,
    cull_pipeline: wgpu::ComputePipeline,
    bind_groups: HashMap<BindGroupKey, wgpu::BindGroup>,
    encoder: Option<wgpu::CommandEncoder>,
}

impl WgpuDevice {
    /// Wraps an open device.
    ///
    /// Indirect draws need the adapter's `INDIRECT_EXECUTION` and
    /// `VERTEX_STORAGE` downlevel flags and the `INDIRECT_FIRST_INSTANCE`
    /// feature on the device, since every model's args point
    /// `first_instance` at its visible set partition.
    ///
    /// Device loss and out-of-memory both mark the device lost.
    #[must_use]
    pub fn new(adapter: &wgpu::Adapter, device: Arc<wgpu::Device>, queue: Arc<wgpu::Queue>) -> Self {
        let indirect = indirect_supported(adapter.get_downlevel_capabilities().flags, device.features());

        let lost = Arc::new(AtomicBool::new(false));
        device.set_device_lost_callback(loss_handler(Arc::clone(&lost)));
        let flag = Arc::clone(&lost);
        device.on_uncaptured_error(Box::new(move |err| match err {
            wgpu::Error::OutOfMemory { .. } => {
                error!("wgpu device out of memory, treating as lost");
                flag.store(true, Ordering::Release);
            }
            other => error!(%other, "wgpu validation error"),
        }));

        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Frustum Cull Shader"),
            source: wgpu::ShaderSource::Wgsl(Cow::Borrowed(CULL_SHADER_WGSL)),
        });

        let storage = |binding: u32, read_only: bool| wgpu::BindGroupLayoutEntry {
            binding,
            visibility: wgpu::ShaderStages::COMPUTE,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Storage { read_only },
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        };
        let cull_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Cull Bind Group Layout"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
                storage(1, true),
                storage(2, true),
                storage(3, false),
                storage(4, false),
            ],
        });

        let layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Cull Pipeline Layout"),
            bind_group_layouts: &[&cull_layout],
            push_constant_ranges: &[],
        });
        let cull_pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some("Frustum Cull Pipeline"),
            layout: Some(&layout),
            module: &shader,
            entry_point: CULL_ENTRY_POINT,
        });

        info!(indirect, "wgpu device ready");
        Self {
            device,
            queue,
            indirect,
            lost,
            cull_layout,
            cull_pipeline,
            bind_groups: HashMap::new(),
            encoder: None,
        }
    }

    /// The wrapped device.
    #[must_use]
    pub fn device(&self) -> &Arc<wgpu::Device> {
        &self.device
    }

    /// The wrapped queue.
    #[must_use]
    pub fn queue(&self) -> &Arc<wgpu::Queue> {
        &self.queue
    }

    /// Marks the device lost, e.g. from a surface error the caller observed.
    pub fn mark_lost(&self) {
        self.lost.store(true, Ordering::Release);
    }

    fn is_lost(&self) -> bool {
        self.lost.load(Ordering::Acquire)
    }

    fn encoder(&mut self) -> &mut wgpu::CommandEncoder {
        let device = &self.device;
        self.encoder.get_or_insert_with(|| {
            device.create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some("Instancing Encoder") })
        })
    }

    fn usage(role: BufferRole) -> wgpu::BufferUsages {
        use wgpu::BufferUsages as U;
        match role {
            BufferRole::Uniform => U::UNIFORM | U::COPY_DST,
            BufferRole::InstanceStore | BufferRole::VisibleSets => U::STORAGE | U::COPY_DST,
            BufferRole::ModelTable => U::STORAGE | U::COPY_DST,
            BufferRole::Counters => U::STORAGE | U::COPY_SRC | U::COPY_DST,
            BufferRole::IndirectArgs => U::INDIRECT | U::STORAGE | U::COPY_DST,
        }
    }
}

impl std::fmt::Debug for WgpuDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WgpuDevice")
            .field("indirect", &self.indirect)
            .field("lost", &self.is_lost())
            .field("bind_groups", &self.bind_groups.len())
            .finish_non_exhaustive()
    }
}

fn key(buffer: &Arc<wgpu::Buffer>) -> usize {
    Arc::as_ptr(buffer) as usize
}

impl GpuDevice for WgpuDevice {
    type Buffer = Arc<wgpu::Buffer>;

    fn supports_indirect(&self) -> bool {
        self.indirect
    }

    fn create_buffer(&mut self, desc: &BufferDesc) -> RenderResult<Self::Buffer> {
        if self.is_lost() {
            return Err(RenderError::DeviceLost(format!("cannot create '{}'", desc.label)));
        }
        // Zero-sized bindings are invalid
        let size = desc.size.max(4);
        debug!(label = desc.label, role = desc.role.name(), size, "wgpu buffer created");
        Ok(Arc::new(self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(desc.label),
            size,
            usage: Self::usage(desc.role),
            mapped_at_creation: false,
        })))
    }

    fn write_buffer(&mut self, buffer: &Self::Buffer, offset: u64, data: &[u8]) {
        if !data.is_empty() {
            self.queue.write_buffer(buffer, offset, data);
        }
    }

    fn clear_buffer(&mut self, buffer: &Self::Buffer) {
        self.encoder().clear_buffer(buffer, 0, None);
    }

    fn dispatch_cull(&mut self, bindings: &CullBindings<'_, Self::Buffer>, workgroups: u32) {
        let id = [
            key(bindings.params),
            key(bindings.instances),
            key(bindings.models),
            key(bindings.counters),
            key(bindings.visible),
        ];
        if !self.bind_groups.contains_key(&id) {
            let group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("Cull Bind Group"),
                layout: &self.cull_layout,
                entries: &[
                    wgpu::BindGroupEntry { binding: 0, resource: bindings.params.as_entire_binding() },
                    wgpu::BindGroupEntry { binding: 1, resource: bindings.instances.as_entire_binding() },
                    wgpu::BindGroupEntry { binding: 2, resource: bindings.models.as_entire_binding() },
                    wgpu::BindGroupEntry { binding: 3, resource: bindings.counters.as_entire_binding() },
                    wgpu::BindGroupEntry { binding: 4, resource: bindings.visible.as_entire_binding() },
                ],
            });
            self.bind_groups.insert(id, group);
        }

        let device = &self.device;
        let encoder = self.encoder.get_or_insert_with(|| {
            device.create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some("Instancing Encoder") })
        });
        let Some(group) = self.bind_groups.get(&id) else {
            return;
        };
        let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: Some("Frustum Cull Pass"),
            timestamp_writes: None,
        });
        pass.set_pipeline(&self.cull_pipeline);
        pass.set_bind_group(0, group, &[]);
        pass.dispatch_workgroups(workgroups, 1, 1);
    }

    fn copy_buffer(&mut self, src: &Self::Buffer, src_offset: u64, dst: &Self::Buffer, dst_offset: u64, size: u64) {
        self.encoder().copy_buffer_to_buffer(src, src_offset, dst, dst_offset, size);
    }

    fn submit(&mut self) -> RenderResult<()> {
        let encoder = self.encoder.take();
        if self.is_lost() {
            warn!("wgpu device lost, frame discarded");
            return Err(RenderError::DeviceLost("wgpu device lost".into()));
        }
        if let Some(encoder) = encoder {
            self.queue.submit(std::iter::once(encoder.finish()));
            trace!("wgpu submit");
        }
        Ok(())
    }

    fn release_buffer(&mut self, buffer: Self::Buffer) {
        let k = key(&buffer);
        self.bind_groups.retain(|id, _| !id.contains(&k));
        buffer.destroy();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_indirect_needs_vertex_storage() {
        let full = wgpu::DownlevelFlags::INDIRECT_EXECUTION | wgpu::DownlevelFlags::VERTEX_STORAGE;
        let first_instance = wgpu::Features::INDIRECT_FIRST_INSTANCE;

        assert!(indirect_supported(full, first_instance));
        assert!(indirect_supported(wgpu::DownlevelFlags::all(), first_instance));
        assert!(!indirect_supported(wgpu::DownlevelFlags::INDIRECT_EXECUTION, first_instance));
        assert!(!indirect_supported(wgpu::DownlevelFlags::VERTEX_STORAGE, first_instance));
        assert!(!indirect_supported(full, wgpu::Features::empty()));
    }

    #[test]
    fn test_device_loss_sets_flag() {
        let lost = Arc::new(AtomicBool::new(false));
        let handler = loss_handler(Arc::clone(&lost));
        assert!(!lost.load(Ordering::Acquire));

        handler(wgpu::DeviceLostReason::Destroyed, "adapter removed".into());
        assert!(lost.load(Ordering::Acquire));
    }
}
