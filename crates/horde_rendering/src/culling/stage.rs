//! Culling stage: clear counters, upload planes, dispatch the kernel.

use horde_shared::CULL_WORKGROUP_SIZE;
use tracing::trace;

use super::frustum::{sphere_in_planes, Frustum};
use crate::device::{CullBindings, GpuDevice};
use crate::instancing::{CullParams, InstanceStore};

/// Records the per-frame cull on a device.
///
/// Every `cull` resets all per-model counters before the dispatch on the same
/// queue, so counts from an earlier frame never survive into this one.
#[derive(Debug, Default)]
pub struct CullingStage {
    params: CullParams,
    dispatches: u64,
}

impl CullingStage {
    /// Creates a new culling stage.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Workgroups needed to give every instance one lane.
    #[must_use]
    pub const fn workgroups(instance_count: u32) -> u32 {
        instance_count.div_ceil(CULL_WORKGROUP_SIZE)
    }

    /// Records params upload, counter clear and the cull dispatch.
    ///
    /// With zero instances the dispatch is skipped; the cleared counters
    /// still yield zero-instance draws.
    pub fn cull<D: GpuDevice>(
        &mut self,
        device: &mut D,
        frustum: &Frustum,
        bindings: &CullBindings<'_, D::Buffer>,
        instance_count: u32,
        model_count: u32,
    ) {
        self.params = CullParams {
            planes: frustum.as_arrays(),
            instance_count,
            model_count,
            _pad: [0; 2],
        };
        device.write_buffer(bindings.params, 0, bytemuck::bytes_of(&self.params));
        device.clear_buffer(bindings.counters);

        let workgroups = Self::workgroups(instance_count);
        if workgroups > 0 {
            device.dispatch_cull(bindings, workgroups);
            self.dispatches += 1;
        }
        trace!(instance_count, model_count, workgroups, "cull recorded");
    }

    /// Last params written.
    #[must_use]
    pub fn params(&self) -> &CullParams {
        &self.params
    }

    /// Dispatches recorded so far.
    #[must_use]
    pub fn dispatches(&self) -> u64 {
        self.dispatches
    }

    /// Host-side cull of one model, same test as the kernel.
    ///
    /// Fills `out` with instance store indices in store order.
    pub fn cull_host(frustum: &Frustum, store: &InstanceStore, model: u32, out: &mut Vec<u32>) {
        out.clear();
        let planes = frustum.as_arrays();
        out.extend(store.model_instances(model).iter().copied().filter(|&index| {
            store.instance(index).is_some_and(|inst| {
                let [x, y, z, radius] = inst.bounds;
                sphere_in_planes(&planes, [x, y, z], radius)
            })
        }));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_workgroup_rounding() {
        assert_eq!(CullingStage::workgroups(0), 0);
        assert_eq!(CullingStage::workgroups(1), 1);
        assert_eq!(CullingStage::workgroups(64), 1);
        assert_eq!(CullingStage::workgroups(65), 2);
        assert_eq!(CullingStage::workgroups(3000), 47);
    }
}
