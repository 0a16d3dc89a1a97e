//! GPU instancing data: instance store, model table and indirect args.
//!
//! ## Key Concepts
//!
//! - **Instance Store**: one flat read-only buffer for every model's instances
//! - **Visible Sets**: per-model append lists filled by the cull kernel
//! - **Indirect Args**: per-model draw records whose instance count never
//!   leaves the GPU

mod args;
mod instance_data;
mod model;
pub mod placement;
mod store;

pub use args::ArgumentBuilder;
pub use instance_data::{CullParams, DrawIndexedIndirectArgs, GpuInstance, Instance, ModelSlot};
pub use model::{
    GeometryHandle, GeometryProvider, MaterialHandle, MeshRange, Model, ModelDesc, ModelTable, StaticGeometry,
};
pub use store::InstanceStore;
