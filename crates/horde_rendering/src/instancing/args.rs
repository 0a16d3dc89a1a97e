//! Argument builder.
//!
//! Copies each model's visible counter into the `instance_count` field of its
//! indirect args record. The copy is recorded on the same queue as the cull,
//! after it, so the draw never sees a count from another frame.

use tracing::trace;

use super::instance_data::DrawIndexedIndirectArgs;
use super::model::ModelTable;
use crate::device::GpuDevice;

const COUNTER_SIZE: u64 = std::mem::size_of::<u32>() as u64;

/// Records the counter-to-args copies.
#[derive(Debug, Default, Clone, Copy)]
pub struct ArgumentBuilder;

impl ArgumentBuilder {
    /// Creates a new argument builder.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Initial args for every model; static fields set, counts zero.
    #[must_use]
    pub fn initial_args(models: &ModelTable) -> Vec<DrawIndexedIndirectArgs> {
        models.models().iter().map(|m| m.initial_args()).collect()
    }

    /// Byte offset of a model's args record.
    #[must_use]
    pub const fn args_offset(model: u32) -> u64 {
        model as u64 * DrawIndexedIndirectArgs::SIZE
    }

    /// Records one 4-byte copy per model. No other args field is touched.
    pub fn build_args<D: GpuDevice>(&self, device: &mut D, counters: &D::Buffer, args: &D::Buffer, model_count: u32) {
        for model in 0..model_count {
            device.copy_buffer(
                counters,
                u64::from(model) * COUNTER_SIZE,
                args,
                Self::args_offset(model) + DrawIndexedIndirectArgs::INSTANCE_COUNT_OFFSET,
                COUNTER_SIZE,
            );
        }
        trace!(model_count, "args build recorded");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{BufferDesc, BufferRole, SoftDevice};

    #[test]
    fn test_copies_only_instance_count() {
        let mut device = SoftDevice::new();
        let counters = device
            .create_buffer(&BufferDesc { label: "counters", size: 8, role: BufferRole::Counters })
            .unwrap();
        let args = device
            .create_buffer(&BufferDesc { label: "args", size: DrawIndexedIndirectArgs::SIZE * 2, role: BufferRole::IndirectArgs })
            .unwrap();

        let initial = [
            DrawIndexedIndirectArgs { index_count: 36, instance_count: 999, first_index: 0, base_vertex: 0, first_instance: 0 },
            DrawIndexedIndirectArgs { index_count: 6, instance_count: 999, first_index: 36, base_vertex: 24, first_instance: 10 },
        ];
        device.write_buffer(&args, 0, bytemuck::cast_slice(&initial));
        device.write_buffer(&counters, 0, bytemuck::cast_slice(&[7u32, 0]));
        ArgumentBuilder::new().build_args(&mut device, &counters, &args, 2);
        device.submit().unwrap();

        let records: Vec<DrawIndexedIndirectArgs> = args.read_records();
        assert_eq!(records[0], DrawIndexedIndirectArgs { instance_count: 7, ..initial[0] });
        assert_eq!(records[1], DrawIndexedIndirectArgs { instance_count: 0, ..initial[1] });
    }
}
