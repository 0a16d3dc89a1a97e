//! Draw submission.
//!
//! The submitter talks to the renderer's draw layer through [`DrawBackend`],
//! which has exactly two entry points: one indirect draw per model, or one
//! direct instanced draw per batch.

mod submitter;
mod wgpu_backend;

pub use submitter::{batch_ranges, DrawSubmitter};
pub use wgpu_backend::{MeshVertex, WgpuDrawBackend, BATCH_INSTANCE_STRIDE};

use horde_shared::{Mat4, Vec4, MAX_INSTANCES_PER_DRAW_CALL};

use crate::culling::Aabb;
use crate::error::RenderResult;
use crate::instancing::{GeometryHandle, MaterialHandle};

/// Per-draw flags passed through to the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct DrawFlags(pub u32);

impl DrawFlags {
    /// No flags.
    pub const NONE: Self = Self(0);
    /// Instance count comes from GPU culling.
    pub const GPU_CULLED: Self = Self(1 << 0);
    /// Per-instance colors are present.
    pub const COLORED: Self = Self(1 << 1);

    /// True if every bit of `other` is set.
    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for DrawFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// One indirect draw: everything the backend needs to draw a model whose
/// instance count lives in GPU memory.
#[derive(Debug)]
pub struct IndirectDraw<'a, B> {
    /// Model id.
    pub model: u32,
    /// Mesh to draw.
    pub geometry: GeometryHandle,
    /// Material to draw with.
    pub material: MaterialHandle,
    /// Bounds of every instance of the model.
    pub bounds: Aabb,
    /// Indirect args buffer.
    pub args: &'a B,
    /// Byte offset of this model's args record.
    pub args_offset: u64,
    /// Instance store, indexed through `visible`.
    pub instances: &'a B,
    /// Visible sets; `first_instance` in the args points at this model's partition.
    pub visible: &'a B,
    /// Draw flags.
    pub flags: DrawFlags,
}

/// One direct instanced draw of at most `max_instances_per_call` instances.
#[derive(Debug, Clone, Copy)]
pub struct BatchDraw<'a> {
    /// Model id.
    pub model: u32,
    /// Mesh to draw.
    pub geometry: GeometryHandle,
    /// Material to draw with.
    pub material: MaterialHandle,
    /// Transforms, one per instance.
    pub transforms: &'a [Mat4],
    /// Colors, parallel to `transforms` when present.
    pub colors: Option<&'a [Vec4]>,
    /// Position of this batch within the model's draws this frame.
    pub batch_index: u32,
    /// Draw flags.
    pub flags: DrawFlags,
}

impl BatchDraw<'_> {
    /// Instances in the batch.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn count(&self) -> u32 {
        self.transforms.len() as u32
    }
}

/// The draw layer under the submitter.
///
/// A zero-instance draw is valid on both paths and must be a no-op.
pub trait DrawBackend<B> {
    /// Whether indirect draws can be executed.
    fn supports_indirect(&self) -> bool;

    /// Hard per-call instance limit of the direct path.
    fn max_instances_per_call(&self) -> u32 {
        MAX_INSTANCES_PER_DRAW_CALL
    }

    /// Called once before the first draw of a frame.
    fn begin_frame(&mut self) {}

    /// Records one indirect draw.
    ///
    /// # Errors
    ///
    /// Backend-specific; propagated to the renderer's caller.
    fn draw_indexed_indirect(&mut self, draw: &IndirectDraw<'_, B>) -> RenderResult<()>;

    /// Records one direct instanced draw.
    ///
    /// # Errors
    ///
    /// Backend-specific; propagated to the renderer's caller.
    fn draw_instanced(&mut self, draw: &BatchDraw<'_>) -> RenderResult<()>;
}
