//! # HORDE Rendering
//!
//! GPU-driven multi-model instanced rendering:
//! - Millions of instances across many meshes in one flat instance store
//! - Frustum culling on the GPU, no count ever read back
//! - One indirect draw per model, instance count written by the GPU
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                        PER-FRAME CYCLE                           │
//! ├──────────────────────────────────────────────────────────────────┤
//! │  Instance Store ──→ Cull Kernel ──→ Visible Sets + Counters      │
//! │                         (clear counters, six-plane sphere test)  │
//! │                                          ↓                       │
//! │                    copy counter → args.instance_count            │
//! │                                          ↓                       │
//! │              draw_indexed_indirect, one per model                │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Without indirect support the same sphere test runs on the host and each
//! model is drawn in batches of at most [`MAX_INSTANCES_PER_DRAW_CALL`].
//!
//! ## Usage
//!
//! ```no_run
//! use horde_rendering::{
//!     Frustum, InstancedRenderer, MeshRange, ModelDesc, RendererConfig, SoftDevice, StaticGeometry,
//! };
//! use horde_shared::Vec3;
//!
//! # fn main() -> horde_rendering::RenderResult<()> {
//! let mut geometry = StaticGeometry::new();
//! let cube = geometry.push(MeshRange { index_count: 36, index_start: 0, base_vertex: 0, bounding_radius: 0.87 });
//!
//! let device = SoftDevice::new();
//! let mut backend = device.draw_backend();
//! let mut renderer = InstancedRenderer::new(device, RendererConfig::default());
//! renderer.setup(&[ModelDesc::new(cube)], &geometry, &backend)?;
//!
//! let frustum = Frustum::from_box(Vec3::new(-50.0, -50.0, -50.0), Vec3::new(50.0, 50.0, 50.0));
//! let stats = renderer.render_frame(&frustum, &mut backend)?;
//! assert_eq!(stats.draw_calls, 1);
//!
//! renderer.dispose()?;
//! # Ok(())
//! # }
//! ```
//!
//! ## MANDATE
//!
//! - Counters are cleared before every dispatch on the same queue
//! - The per-frame cycle never blocks on the GPU
//! - Every buffer is released exactly once

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod culling;
pub mod device;
pub mod draw;
pub mod error;
pub mod instancing;
pub mod pipeline;

pub use config::{PlacementPolicy, RendererConfig, SubmitMode};
pub use culling::{Aabb, CullingStage, Frustum, Plane};
pub use device::{BufferDesc, BufferRole, CullBindings, GpuDevice, SoftDevice, SoftDrawBackend, WgpuDevice};
pub use draw::{BatchDraw, DrawBackend, DrawFlags, DrawSubmitter, IndirectDraw, WgpuDrawBackend};
pub use error::{RenderError, RenderResult};
pub use horde_shared::MAX_INSTANCES_PER_DRAW_CALL;
pub use instancing::{
    ArgumentBuilder, GeometryHandle, GeometryProvider, Instance, InstanceStore, MaterialHandle, MeshRange, ModelDesc,
    ModelTable, StaticGeometry,
};
pub use pipeline::{DrawPath, InstancedRenderer, RenderStats, RendererState};
