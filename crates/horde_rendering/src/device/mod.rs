//! GPU device seam.
//!
//! The pipeline talks to the GPU through [`GpuDevice`]: buffer lifetime,
//! queue writes, and the three commands a frame needs (clear, cull dispatch,
//! buffer copy). Commands are recorded in call order and executed in that
//! order on [`GpuDevice::submit`]; writes issued before a submit land before
//! any command of that submit. Nothing here reads GPU memory back.
//!
//! Implementations:
//! - [`SoftDevice`] - CPU device with atomic-word buffers and parallel lanes
//! - [`WgpuDevice`] - `wgpu` storage buffers and a compute pipeline

mod soft;
mod wgpu_device;

pub use soft::{SoftBuffer, SoftDevice, SoftDrawBackend, SoftDrawCall, TimelineEvent};
pub use wgpu_device::WgpuDevice;

use crate::error::RenderResult;

/// What a buffer is used for. Decides usage flags and bind slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferRole {
    /// Per-frame uniforms (`CullParams`).
    Uniform,
    /// Flat instance store, read-only after upload.
    InstanceStore,
    /// Per-model routing slots.
    ModelTable,
    /// Per-model visible counters (atomic).
    Counters,
    /// Visible sets, one partition per model.
    VisibleSets,
    /// Draw arguments for indirect draws.
    IndirectArgs,
}

impl BufferRole {
    /// Lowercase name for logs.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Uniform => "uniform",
            Self::InstanceStore => "instance_store",
            Self::ModelTable => "model_table",
            Self::Counters => "counters",
            Self::VisibleSets => "visible_sets",
            Self::IndirectArgs => "indirect_args",
        }
    }
}

/// Buffer creation parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferDesc {
    /// Debug label.
    pub label: &'static str,
    /// Size in bytes; a multiple of 4.
    pub size: u64,
    /// Usage.
    pub role: BufferRole,
}

/// Resources bound to the cull kernel for one dispatch.
#[derive(Debug)]
pub struct CullBindings<'a, B> {
    /// `CullParams` uniform.
    pub params: &'a B,
    /// Instance store.
    pub instances: &'a B,
    /// Model slots.
    pub models: &'a B,
    /// Per-model counters.
    pub counters: &'a B,
    /// Visible sets.
    pub visible: &'a B,
}

/// A GPU with a single in-order execution queue.
pub trait GpuDevice {
    /// Buffer handle. Cloning shares the same GPU allocation.
    type Buffer: Clone;

    /// Whether the device can execute indirect draws.
    fn supports_indirect(&self) -> bool;

    /// Allocates a zero-initialised buffer.
    ///
    /// # Errors
    ///
    /// [`crate::RenderError::DeviceLost`] if the device is gone.
    fn create_buffer(&mut self, desc: &BufferDesc) -> RenderResult<Self::Buffer>;

    /// Queues a write of `data` at `offset`, applied before the next submit's commands.
    fn write_buffer(&mut self, buffer: &Self::Buffer, offset: u64, data: &[u8]);

    /// Records a clear of the whole buffer to zero.
    fn clear_buffer(&mut self, buffer: &Self::Buffer);

    /// Records one cull dispatch of `workgroups` workgroups.
    fn dispatch_cull(&mut self, bindings: &CullBindings<'_, Self::Buffer>, workgroups: u32);

    /// Records a buffer-to-buffer copy.
    fn copy_buffer(&mut self, src: &Self::Buffer, src_offset: u64, dst: &Self::Buffer, dst_offset: u64, size: u64);

    /// Submits everything recorded since the last submit.
    ///
    /// Does not wait for completion.
    ///
    /// # Errors
    ///
    /// [`crate::RenderError::DeviceLost`] if the device was lost; recorded
    /// commands are discarded.
    fn submit(&mut self) -> RenderResult<()>;

    /// Frees a buffer. Taking it by value makes a second release impossible
    /// through the same handle.
    fn release_buffer(&mut self, buffer: Self::Buffer);
}
