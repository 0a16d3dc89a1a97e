//! Instance data structures for GPU upload.
//!
//! Every struct here is shared byte-for-byte with the WGSL in
//! [`crate::culling::shaders`]; field order and padding must match.

use bytemuck::{Pod, Zeroable};
use horde_shared::{Mat4, Vec3, Vec4, FRUSTUM_PLANE_COUNT};

/// One instance as the caller sees it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Instance {
    /// Object-to-world transform.
    pub transform: Mat4,
    /// Index into the model table.
    pub model_id: u32,
    /// Optional per-instance tint.
    pub color: Option<Vec4>,
}

/// Per-instance record in the instance store buffer.
///
/// Uploaded once at setup (or rebuild) and only read afterwards.
/// 112 bytes, 16-byte aligned for `array<Instance>` in WGSL.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable)]
pub struct GpuInstance {
    /// Object-to-world matrix, column-major.
    pub transform: [[f32; 4]; 4],
    /// RGBA tint; white when the instance has no color.
    pub color: [f32; 4],
    /// World-space bounding sphere: center in xyz, radius in w.
    pub bounds: [f32; 4],
    /// Model this instance belongs to. The routing key for culling.
    pub model_id: u32,
    /// See `FLAG_*`.
    pub flags: u32,
    /// Padding for alignment.
    pub _pad: [u32; 2],
}

impl GpuInstance {
    /// Size in bytes.
    pub const SIZE: usize = std::mem::size_of::<Self>();

    /// Flag: `color` was supplied by the caller.
    pub const FLAG_HAS_COLOR: u32 = 1 << 0;

    /// Packs an instance, deriving its bounding sphere from the model radius.
    #[must_use]
    pub fn from_instance(instance: &Instance, model_radius: f32) -> Self {
        let center = instance.transform.translation();
        let radius = model_radius * instance.transform.max_axis_scale();
        let (color, flags) = match instance.color {
            Some(c) => (c.to_array(), Self::FLAG_HAS_COLOR),
            None => (Vec4::WHITE.to_array(), 0),
        };

        Self {
            transform: instance.transform.cols,
            color,
            bounds: [center.x, center.y, center.z, radius],
            model_id: instance.model_id,
            flags,
            _pad: [0; 2],
        }
    }

    /// Unpacks back into the caller-facing form.
    #[must_use]
    pub fn to_instance(&self) -> Instance {
        Instance {
            transform: Mat4 { cols: self.transform },
            model_id: self.model_id,
            color: (self.flags & Self::FLAG_HAS_COLOR != 0).then(|| Vec4::from_array(self.color)),
        }
    }

    /// Bounding sphere center.
    #[must_use]
    pub fn center(&self) -> Vec3 {
        Vec4::from_array(self.bounds).truncate()
    }

    /// Bounding sphere radius.
    #[must_use]
    pub fn radius(&self) -> f32 {
        self.bounds[3]
    }
}

/// Per-model routing entry read by the culling kernel.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct ModelSlot {
    /// First element of this model's visible set in the shared visible buffer.
    pub visible_base: u32,
    /// Elements reserved for this model's visible set.
    pub capacity: u32,
    /// Padding for alignment.
    pub _pad: [u32; 2],
}

/// DrawIndexedIndirect arguments - `instance_count` is filled on the GPU.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct DrawIndexedIndirectArgs {
    /// Indices per instance.
    pub index_count: u32,
    /// Number of instances to draw (copied from the visible counter).
    pub instance_count: u32,
    /// First index.
    pub first_index: u32,
    /// Base vertex.
    pub base_vertex: i32,
    /// First instance; set to the model's visible base.
    pub first_instance: u32,
}

impl DrawIndexedIndirectArgs {
    /// Size in bytes of one record.
    pub const SIZE: u64 = std::mem::size_of::<Self>() as u64;

    /// Byte offset of `instance_count` inside a record.
    pub const INSTANCE_COUNT_OFFSET: u64 = 4;
}

/// Culling uniforms, rewritten once per frame.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable)]
pub struct CullParams {
    /// Frustum planes (6 planes, ABCD each).
    pub planes: [[f32; 4]; FRUSTUM_PLANE_COUNT],
    /// Instances in the store.
    pub instance_count: u32,
    /// Models in the table.
    pub model_count: u32,
    /// Padding for alignment.
    pub _pad: [u32; 2],
}

#[cfg(test)]
mod tests {
    use super::*;
    use horde_shared::Quaternion;

    #[test]
    fn test_gpu_layout_sizes() {
        assert_eq!(GpuInstance::SIZE, 112);
        assert_eq!(GpuInstance::SIZE % 16, 0);
        assert_eq!(std::mem::size_of::<ModelSlot>(), 16);
        assert_eq!(DrawIndexedIndirectArgs::SIZE, 20);
        assert_eq!(std::mem::size_of::<CullParams>(), 112);
    }

    #[test]
    fn test_instance_count_offset() {
        let args = DrawIndexedIndirectArgs { instance_count: 0xABCD, ..Default::default() };
        let bytes = bytemuck::bytes_of(&args);
        let offset = DrawIndexedIndirectArgs::INSTANCE_COUNT_OFFSET as usize;
        assert_eq!(&bytes[offset..offset + 4], &0xABCDu32.to_ne_bytes());
    }

    #[test]
    fn test_bounds_follow_transform_scale() {
        let instance = Instance {
            transform: Mat4::from_trs(Vec3::new(1.0, 2.0, 3.0), Quaternion::IDENTITY, Vec3::new(1.0, 3.0, 1.0)),
            model_id: 4,
            color: Some(Vec4::new(1.0, 0.0, 0.0, 1.0)),
        };
        let gpu = GpuInstance::from_instance(&instance, 0.5);

        assert_eq!(gpu.center(), Vec3::new(1.0, 2.0, 3.0));
        assert!((gpu.radius() - 1.5).abs() < 1e-5);
        assert_eq!(gpu.flags, GpuInstance::FLAG_HAS_COLOR);
        assert_eq!(gpu.to_instance(), instance);
    }

    #[test]
    fn test_uncolored_instance_is_white() {
        let instance = Instance { transform: Mat4::IDENTITY, model_id: 0, color: None };
        let gpu = GpuInstance::from_instance(&instance, 1.0);
        assert_eq!(gpu.color, [1.0; 4]);
        assert_eq!(gpu.to_instance().color, None);
    }
}
