//! Frustum culling.
//!
//! Instances are tested as bounding spheres against six half-spaces on the
//! GPU; survivors are appended to their model's visible set.

mod frustum;
pub mod shaders;
mod stage;

pub use frustum::{sphere_in_planes, Aabb, Frustum, Plane};
pub use stage::CullingStage;
