//! `wgpu` draw backend.
//!
//! Draws are recorded during the frame and encoded into a caller-owned
//! render pass afterwards:
//!
//! ```text
//! backend.set_view_projection(&view_proj);
//! renderer.render_frame(&frustum, &mut backend)?;
//! backend.prepare();
//! backend.encode(&mut pass);
//! ```
//!
//! Meshes share one vertex and one index buffer. Materials are tints in a
//! uniform buffer addressed with a dynamic offset.

use std::borrow::Cow;
use std::ops::Range;
use std::sync::Arc;

use bytemuck::{Pod, Zeroable};
use horde_shared::{Mat4, Vec4};
use tracing::{debug, trace};

use super::{BatchDraw, DrawBackend, IndirectDraw};
use crate::culling::shaders::{FS_ENTRY_POINT, INSTANCE_SHADER_WGSL, VS_BATCHED_ENTRY_POINT, VS_INDIRECT_ENTRY_POINT};
use crate::device::WgpuDevice;
use crate::error::{RenderError, RenderResult};
use crate::instancing::{GeometryHandle, GeometryProvider, MaterialHandle, MeshRange, StaticGeometry};

/// Materials the backend can hold.
pub const MAX_MATERIALS: u32 = 64;

/// Dynamic uniform offsets must be 256-byte aligned.
const MATERIAL_STRIDE: u64 = 256;

/// Mesh vertex - position and normal.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct MeshVertex {
    /// Position in object space.
    pub position: [f32; 3],
    /// Normal.
    pub normal: [f32; 3],
}

impl MeshVertex {
    /// Vertex attributes.
    pub const ATTRIBS: [wgpu::VertexAttribute; 2] = wgpu::vertex_attr_array![
        0 => Float32x3,  // position
        1 => Float32x3,  // normal
    ];

    /// Vertex buffer layout descriptor.
    #[must_use]
    pub fn desc() -> wgpu::VertexBufferLayout<'static> {
        wgpu::VertexBufferLayout {
            array_stride: std::mem::size_of::<Self>() as wgpu::BufferAddress,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &Self::ATTRIBS,
        }
    }
}

/// Per-instance vertex data of the batched path.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
struct BatchInstance {
    transform: [[f32; 4]; 4],
    color: [f32; 4],
}

/// Byte stride of one batched instance.
pub const BATCH_INSTANCE_STRIDE: u64 = std::mem::size_of::<BatchInstance>() as u64;

impl BatchInstance {
    const ATTRIBS: [wgpu::VertexAttribute; 5] = wgpu::vertex_attr_array![
        2 => Float32x4,  // transform col 0
        3 => Float32x4,  // transform col 1
        4 => Float32x4,  // transform col 2
        5 => Float32x4,  // transform col 3
        6 => Float32x4,  // color
    ];

    fn desc() -> wgpu::VertexBufferLayout<'static> {
        wgpu::VertexBufferLayout {
            array_stride: BATCH_INSTANCE_STRIDE,
            step_mode: wgpu::VertexStepMode::Instance,
            attributes: &Self::ATTRIBS,
        }
    }
}

/// Instance and visible buffers a bind group was built from. Holding the
/// `Arc`s keeps them alive, so identity comparison cannot match a new buffer
/// at a reused address.
type BufferPair = [Arc<wgpu::Buffer>; 2];

fn same_buffers<T>(cached: &[Arc<T>; 2], current: [&Arc<T>; 2]) -> bool {
    Arc::ptr_eq(&cached[0], current[0]) && Arc::ptr_eq(&cached[1], current[1])
}

#[derive(Debug, Clone)]
enum RecordedDraw {
    Indirect { material: u32, args_offset: u64 },
    Batch { material: u32, mesh: MeshRange, instances: Range<u32> },
}

/// Records draws and encodes them into a render pass.
pub struct WgpuDrawBackend {
    device: Arc<wgpu::Device>,
    queue: Arc<wgpu::Queue>,
    indirect: bool,
    max_per_call: u32,

    geometry: StaticGeometry,
    vertices: Vec<MeshVertex>,
    indices: Vec<u32>,
    geometry_dirty: bool,
    vertex_buffer: Option<wgpu::Buffer>,
    index_buffer: Option<wgpu::Buffer>,

    camera_buffer: wgpu::Buffer,
    material_buffer: wgpu::Buffer,
    material_count: u32,
    frame_group: wgpu::BindGroup,
    instance_layout: wgpu::BindGroupLayout,
    instance_group: Option<(BufferPair, wgpu::BindGroup)>,
    indirect_pipeline: wgpu::RenderPipeline,
    batched_pipeline: wgpu::RenderPipeline,

    batch_data: Vec<BatchInstance>,
    batch_buffer: Option<wgpu::Buffer>,
    args: Option<Arc<wgpu::Buffer>>,
    draws: Vec<RecordedDraw>,
}

impl WgpuDrawBackend {
    /// Builds the render pipelines for the given target formats.
    ///
    /// Indirect support matches `device`; material 0 is white.
    #[must_use]
    pub fn new(
        device: &WgpuDevice,
        color_format: wgpu::TextureFormat,
        depth_format: Option<wgpu::TextureFormat>,
    ) -> Self {
        use crate::device::GpuDevice;

        let gpu = Arc::clone(device.device());
        let queue = Arc::clone(device.queue());

        let shader = gpu.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Instance Shader"),
            source: wgpu::ShaderSource::Wgsl(Cow::Borrowed(INSTANCE_SHADER_WGSL)),
        });

        let camera_buffer = gpu.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Camera Uniform"),
            size: std::mem::size_of::<Mat4>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let material_buffer = gpu.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Material Tints"),
            size: u64::from(MAX_MATERIALS) * MATERIAL_STRIDE,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let uniform = |binding: u32, dynamic: bool| wgpu::BindGroupLayoutEntry {
            binding,
            visibility: wgpu::ShaderStages::VERTEX,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Uniform,
                has_dynamic_offset: dynamic,
                min_binding_size: None,
            },
            count: None,
        };
        let frame_layout = gpu.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Instance Frame Layout"),
            entries: &[uniform(0, false), uniform(1, true)],
        });
        let storage = |binding: u32| wgpu::BindGroupLayoutEntry {
            binding,
            visibility: wgpu::ShaderStages::VERTEX,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Storage { read_only: true },
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        };
        let instance_layout = gpu.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Instance Fetch Layout"),
            entries: &[storage(0), storage(1)],
        });

        let frame_group = gpu.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Instance Frame Bind Group"),
            layout: &frame_layout,
            entries: &[
                wgpu::BindGroupEntry { binding: 0, resource: camera_buffer.as_entire_binding() },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                        buffer: &material_buffer,
                        offset: 0,
                        size: wgpu::BufferSize::new(std::mem::size_of::<Vec4>() as u64),
                    }),
                },
            ],
        });

        let indirect_layout = gpu.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Indirect Instance Pipeline Layout"),
            bind_group_layouts: &[&frame_layout, &instance_layout],
            push_constant_ranges: &[],
        });
        let batched_layout = gpu.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Batched Instance Pipeline Layout"),
            bind_group_layouts: &[&frame_layout],
            push_constant_ranges: &[],
        });

        let targets = [Some(wgpu::ColorTargetState {
            format: color_format,
            blend: Some(wgpu::BlendState::REPLACE),
            write_mask: wgpu::ColorWrites::ALL,
        })];
        let depth_stencil = depth_format.map(|format| wgpu::DepthStencilState {
            format,
            depth_write_enabled: true,
            depth_compare: wgpu::CompareFunction::Less,
            stencil: wgpu::StencilState::default(),
            bias: wgpu::DepthBiasState::default(),
        });
        let pipeline = |label: &str,
                        layout: &wgpu::PipelineLayout,
                        entry_point: &str,
                        buffers: &[wgpu::VertexBufferLayout<'_>]| {
            gpu.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some(label),
                layout: Some(layout),
                vertex: wgpu::VertexState { module: &shader, entry_point, buffers },
                primitive: wgpu::PrimitiveState {
                    topology: wgpu::PrimitiveTopology::TriangleList,
                    front_face: wgpu::FrontFace::Ccw,
                    cull_mode: Some(wgpu::Face::Back),
                    ..Default::default()
                },
                depth_stencil: depth_stencil.clone(),
                multisample: wgpu::MultisampleState::default(),
                fragment: Some(wgpu::FragmentState {
                    module: &shader,
                    entry_point: FS_ENTRY_POINT,
                    targets: &targets,
                }),
                multiview: None,
            })
        };
        let indirect_pipeline =
            pipeline("Indirect Instance Pipeline", &indirect_layout, VS_INDIRECT_ENTRY_POINT, &[MeshVertex::desc()]);
        let batched_pipeline = pipeline(
            "Batched Instance Pipeline",
            &batched_layout,
            VS_BATCHED_ENTRY_POINT,
            &[MeshVertex::desc(), BatchInstance::desc()],
        );

        queue.write_buffer(&camera_buffer, 0, bytemuck::bytes_of(&Mat4::IDENTITY));
        queue.write_buffer(&material_buffer, 0, bytemuck::bytes_of(&Vec4::WHITE));

        Self {
            device: gpu,
            queue,
            indirect: device.supports_indirect(),
            max_per_call: horde_shared::MAX_INSTANCES_PER_DRAW_CALL,
            geometry: StaticGeometry::new(),
            vertices: Vec::new(),
            indices: Vec::new(),
            geometry_dirty: false,
            vertex_buffer: None,
            index_buffer: None,
            camera_buffer,
            material_buffer,
            material_count: 1,
            frame_group,
            instance_layout,
            instance_group: None,
            indirect_pipeline,
            batched_pipeline,
            batch_data: Vec::new(),
            batch_buffer: None,
            args: None,
            draws: Vec::new(),
        }
    }

    /// Overrides the per-call instance cap of the batched path.
    #[must_use]
    pub fn with_max_instances_per_call(mut self, max: u32) -> Self {
        self.max_per_call = max.max(1);
        self
    }

    /// Adds a mesh to the shared buffers.
    ///
    /// # Errors
    ///
    /// [`RenderError::Configuration`] if `indices` is empty or the buffers
    /// would exceed `u32` addressing.
    pub fn add_mesh(&mut self, vertices: &[MeshVertex], indices: &[u32]) -> RenderResult<GeometryHandle> {
        if indices.is_empty() {
            return Err(RenderError::Configuration("mesh has no indices".into()));
        }
        let too_big = || RenderError::Configuration("mesh buffers exceed u32 range".into());
        let base_vertex = u32::try_from(self.vertices.len()).map_err(|_| too_big())?;
        let index_start = u32::try_from(self.indices.len()).map_err(|_| too_big())?;
        let index_count = u32::try_from(indices.len()).map_err(|_| too_big())?;

        let bounding_radius = vertices
            .iter()
            .map(|v| v.position.iter().map(|c| c * c).sum::<f32>().sqrt())
            .fold(0.0f32, f32::max);

        self.vertices.extend_from_slice(vertices);
        self.indices.extend_from_slice(indices);
        self.geometry_dirty = true;
        let handle = self.geometry.push(MeshRange { index_count, index_start, base_vertex, bounding_radius });
        debug!(?handle, index_count, bounding_radius, "mesh added");
        Ok(handle)
    }

    /// Adds a material tint.
    ///
    /// # Errors
    ///
    /// [`RenderError::Configuration`] once [`MAX_MATERIALS`] are in use.
    pub fn add_material(&mut self, tint: Vec4) -> RenderResult<MaterialHandle> {
        if self.material_count >= MAX_MATERIALS {
            return Err(RenderError::Configuration(format!("more than {MAX_MATERIALS} materials")));
        }
        let handle = MaterialHandle(self.material_count);
        self.queue.write_buffer(
            &self.material_buffer,
            u64::from(handle.0) * MATERIAL_STRIDE,
            bytemuck::bytes_of(&tint),
        );
        self.material_count += 1;
        Ok(handle)
    }

    /// Sets the camera used by both pipelines.
    pub fn set_view_projection(&self, view_proj: &Mat4) {
        self.queue.write_buffer(&self.camera_buffer, 0, bytemuck::bytes_of(view_proj));
    }

    /// Uploads mesh data and this frame's batched instances.
    pub fn prepare(&mut self) {
        if self.geometry_dirty {
            let vertices = self.upload("Mesh Vertices", bytemuck::cast_slice(&self.vertices), wgpu::BufferUsages::VERTEX);
            let indices = self.upload("Mesh Indices", bytemuck::cast_slice(&self.indices), wgpu::BufferUsages::INDEX);
            for old in [self.vertex_buffer.replace(vertices), self.index_buffer.replace(indices)].into_iter().flatten() {
                old.destroy();
            }
            self.geometry_dirty = false;
        }

        if self.batch_data.is_empty() {
            return;
        }
        let bytes: &[u8] = bytemuck::cast_slice(&self.batch_data);
        let fits = self.batch_buffer.as_ref().is_some_and(|b| b.size() >= bytes.len() as u64);
        if fits {
            if let Some(buffer) = &self.batch_buffer {
                self.queue.write_buffer(buffer, 0, bytes);
            }
        } else {
            // Grow to the next power of two to avoid reallocating every frame
            let size = (bytes.len() as u64).next_power_of_two();
            let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("Batch Instances"),
                size,
                usage: wgpu::BufferUsages::VERTEX | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            });
            self.queue.write_buffer(&buffer, 0, bytes);
            if let Some(old) = self.batch_buffer.replace(buffer) {
                old.destroy();
            }
        }
        trace!(instances = self.batch_data.len(), "batch instances uploaded");
    }

    fn upload(&self, label: &str, bytes: &[u8], usage: wgpu::BufferUsages) -> wgpu::Buffer {
        let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(label),
            size: (bytes.len() as u64).max(4),
            usage: usage | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        self.queue.write_buffer(&buffer, 0, bytes);
        buffer
    }

    /// Draws recorded this frame.
    #[must_use]
    pub fn recorded_draws(&self) -> usize {
        self.draws.len()
    }

    /// Encodes every recorded draw. Call [`WgpuDrawBackend::prepare`] first.
    #[allow(clippy::cast_possible_truncation)]
    pub fn encode<'a>(&'a self, pass: &mut wgpu::RenderPass<'a>) {
        let (Some(vertices), Some(indices)) = (&self.vertex_buffer, &self.index_buffer) else {
            return;
        };
        pass.set_vertex_buffer(0, vertices.slice(..));
        pass.set_index_buffer(indices.slice(..), wgpu::IndexFormat::Uint32);

        for draw in &self.draws {
            match draw {
                RecordedDraw::Indirect { material, args_offset } => {
                    let (Some(args), Some((_, group))) = (&self.args, &self.instance_group) else {
                        continue;
                    };
                    pass.set_pipeline(&self.indirect_pipeline);
                    pass.set_bind_group(0, &self.frame_group, &[(u64::from(*material) * MATERIAL_STRIDE) as u32]);
                    pass.set_bind_group(1, group, &[]);
                    pass.draw_indexed_indirect(args, *args_offset);
                }
                RecordedDraw::Batch { material, mesh, instances } => {
                    let Some(batch) = &self.batch_buffer else {
                        continue;
                    };
                    pass.set_pipeline(&self.batched_pipeline);
                    pass.set_bind_group(0, &self.frame_group, &[(u64::from(*material) * MATERIAL_STRIDE) as u32]);
                    pass.set_vertex_buffer(1, batch.slice(..));
                    pass.draw_indexed(
                        mesh.index_start..mesh.index_start + mesh.index_count,
                        mesh.base_vertex as i32,
                        instances.clone(),
                    );
                }
            }
        }
    }

    fn material_index(&self, material: MaterialHandle) -> u32 {
        if material.0 < self.material_count {
            material.0
        } else {
            0
        }
    }
}

impl std::fmt::Debug for WgpuDrawBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WgpuDrawBackend")
            .field("indirect", &self.indirect)
            .field("meshes", &self.geometry)
            .field("materials", &self.material_count)
            .field("draws", &self.draws.len())
            .finish_non_exhaustive()
    }
}

impl GeometryProvider for WgpuDrawBackend {
    fn index_count(&self, geometry: GeometryHandle) -> u32 {
        self.geometry.index_count(geometry)
    }

    fn index_start(&self, geometry: GeometryHandle) -> u32 {
        self.geometry.index_start(geometry)
    }

    fn base_vertex(&self, geometry: GeometryHandle) -> u32 {
        self.geometry.base_vertex(geometry)
    }

    fn bounding_radius(&self, geometry: GeometryHandle) -> f32 {
        self.geometry.bounding_radius(geometry)
    }
}

impl DrawBackend<Arc<wgpu::Buffer>> for WgpuDrawBackend {
    fn supports_indirect(&self) -> bool {
        self.indirect
    }

    fn max_instances_per_call(&self) -> u32 {
        self.max_per_call
    }

    fn begin_frame(&mut self) {
        self.draws.clear();
        self.batch_data.clear();
        self.args = None;
    }

    fn draw_indexed_indirect(&mut self, draw: &IndirectDraw<'_, Arc<wgpu::Buffer>>) -> RenderResult<()> {
        if !self.indirect {
            return Err(RenderError::BackendUnavailable("indirect draws not supported".into()));
        }
        let current = [draw.instances, draw.visible];
        if !self.instance_group.as_ref().is_some_and(|(cached, _)| same_buffers(cached, current)) {
            let group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("Instance Fetch Bind Group"),
                layout: &self.instance_layout,
                entries: &[
                    wgpu::BindGroupEntry { binding: 0, resource: draw.instances.as_entire_binding() },
                    wgpu::BindGroupEntry { binding: 1, resource: draw.visible.as_entire_binding() },
                ],
            });
            self.instance_group = Some(([Arc::clone(draw.instances), Arc::clone(draw.visible)], group));
        }
        if !self.args.as_ref().is_some_and(|args| Arc::ptr_eq(args, draw.args)) {
            self.args = Some(Arc::clone(draw.args));
        }
        self.draws.push(RecordedDraw::Indirect {
            material: self.material_index(draw.material),
            args_offset: draw.args_offset,
        });
        Ok(())
    }

    #[allow(clippy::cast_possible_truncation)]
    fn draw_instanced(&mut self, draw: &BatchDraw<'_>) -> RenderResult<()> {
        if draw.count() > self.max_per_call {
            return Err(RenderError::Configuration(format!(
                "batch of {} exceeds per-call cap {}",
                draw.count(),
                self.max_per_call
            )));
        }
        if draw.count() == 0 {
            return Ok(());
        }
        let mesh = *self
            .geometry
            .get(draw.geometry)
            .ok_or_else(|| RenderError::Configuration(format!("unknown geometry {:?}", draw.geometry)))?;

        let first = self.batch_data.len() as u32;
        for (i, transform) in draw.transforms.iter().enumerate() {
            let color = draw.colors.and_then(|c| c.get(i)).copied().unwrap_or(Vec4::WHITE);
            self.batch_data.push(BatchInstance { transform: transform.cols, color: color.to_array() });
        }
        self.draws.push(RecordedDraw::Batch {
            material: self.material_index(draw.material),
            mesh,
            instances: first..first + draw.count(),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vertex_layouts() {
        assert_eq!(MeshVertex::desc().array_stride, 24);
        assert_eq!(BATCH_INSTANCE_STRIDE, 80);
        assert_eq!(BatchInstance::desc().step_mode, wgpu::VertexStepMode::Instance);
        assert_eq!(BatchInstance::ATTRIBS[4].offset, 64);
    }

    #[test]
    fn test_cached_buffers_compare_by_identity() {
        let instances = Arc::new(vec![0u8; 64]);
        let visible = Arc::new(vec![0u8; 64]);
        let cached = [Arc::clone(&instances), Arc::clone(&visible)];
        assert!(same_buffers(&cached, [&instances, &visible]));

        // Recreated after a reset: same contents and sizes, different buffers
        drop((instances, visible));
        let instances = Arc::new(vec![0u8; 64]);
        let visible = Arc::new(vec![0u8; 64]);
        assert!(!same_buffers(&cached, [&instances, &visible]));
        assert_eq!(Arc::strong_count(&cached[0]), 1);
    }
}
