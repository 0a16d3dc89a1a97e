//! Draw submitter.
//!
//! Indirect path: one draw per model, instance count read from its args
//! record. Batched path: a model's visible instances split into calls of at
//! most `max_per_call`, each a contiguous slice.

use std::ops::Range;

use horde_shared::{Mat4, Vec4};
use tracing::trace;

use super::{BatchDraw, DrawBackend, DrawFlags, IndirectDraw};
use crate::error::RenderResult;
use crate::instancing::{ArgumentBuilder, GpuInstance, InstanceStore, ModelTable};

/// Splits `count` instances into ranges of at most `max_per_call`.
///
/// Zero instances still yields one empty range, so a model with nothing
/// visible gets its (no-op) draw like on the indirect path.
pub fn batch_ranges(count: u32, max_per_call: u32) -> impl Iterator<Item = Range<u32>> {
    let max = max_per_call.max(1);
    let batches = count.div_ceil(max).max(1);
    (0..batches).map(move |b| {
        let start = b * max;
        start..count.min(start + max)
    })
}

/// Issues draws for every model.
///
/// Scratch vectors are reused across frames.
#[derive(Debug, Default)]
pub struct DrawSubmitter {
    transforms: Vec<Mat4>,
    colors: Vec<Vec4>,
    draw_calls: u32,
}

impl DrawSubmitter {
    /// Creates a new submitter.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Draw calls issued by the last submit.
    #[must_use]
    pub fn draw_calls(&self) -> u32 {
        self.draw_calls
    }

    /// One indirect draw per model.
    ///
    /// # Errors
    ///
    /// Whatever the backend returns.
    pub fn submit_indirect<B, K: DrawBackend<B>>(
        &mut self,
        backend: &mut K,
        models: &ModelTable,
        store: &InstanceStore,
        args: &B,
        instances: &B,
        visible: &B,
    ) -> RenderResult<u32> {
        self.draw_calls = 0;
        for model in models.models() {
            let draw = IndirectDraw {
                model: model.id,
                geometry: model.geometry,
                material: model.material,
                bounds: store.model_bounds(model.id),
                args,
                args_offset: ArgumentBuilder::args_offset(model.id),
                instances,
                visible,
                flags: DrawFlags::GPU_CULLED,
            };
            backend.draw_indexed_indirect(&draw)?;
            self.draw_calls += 1;
        }
        trace!(draw_calls = self.draw_calls, "indirect draws submitted");
        Ok(self.draw_calls)
    }

    /// Batched direct draws of one model's visible instances.
    ///
    /// `visible` holds instance store indices. Returns the calls issued.
    ///
    /// # Errors
    ///
    /// Whatever the backend returns.
    pub fn submit_batched<B, K: DrawBackend<B>>(
        &mut self,
        backend: &mut K,
        models: &ModelTable,
        store: &InstanceStore,
        model: u32,
        visible: &[u32],
        max_per_call: u32,
    ) -> RenderResult<u32> {
        let Some(entry) = models.get(model) else {
            return Ok(0);
        };

        self.transforms.clear();
        self.colors.clear();
        let mut colored = false;
        for instance in visible.iter().filter_map(|&i| store.instance(i)) {
            self.transforms.push(Mat4 { cols: instance.transform });
            self.colors.push(Vec4::from_array(instance.color));
            colored |= instance.flags & GpuInstance::FLAG_HAS_COLOR != 0;
        }

        let cap = max_per_call.min(backend.max_instances_per_call());
        #[allow(clippy::cast_possible_truncation)]
        let count = self.transforms.len() as u32;
        let flags = if colored { DrawFlags::COLORED } else { DrawFlags::NONE };

        let mut calls = 0;
        for (batch_index, range) in (0u32..).zip(batch_ranges(count, cap)) {
            let slice = range.start as usize..range.end as usize;
            backend.draw_instanced(&BatchDraw {
                model,
                geometry: entry.geometry,
                material: entry.material,
                transforms: &self.transforms[slice.clone()],
                colors: colored.then(|| &self.colors[slice]),
                batch_index,
                flags,
            })?;
            calls += 1;
        }
        self.draw_calls += calls;
        Ok(calls)
    }

    /// Resets the per-frame call counter before a batched frame.
    pub fn begin_batched(&mut self) {
        self.draw_calls = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_batch_sizes() {
        let sizes: Vec<u32> = batch_ranges(2500, 1023).map(|r| r.end - r.start).collect();
        assert_eq!(sizes, vec![1023, 1023, 454]);
    }

    #[test]
    fn test_batches_cover_everything_once() {
        let ranges: Vec<_> = batch_ranges(2046, 1023).collect();
        assert_eq!(ranges, vec![0..1023, 1023..2046]);

        let flattened: Vec<u32> = batch_ranges(10, 3).flatten().collect();
        assert_eq!(flattened, (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn test_zero_count_yields_one_empty_batch() {
        let ranges: Vec<_> = batch_ranges(0, 1023).collect();
        assert_eq!(ranges, vec![0..0]);
    }
}
