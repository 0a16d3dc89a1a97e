//! # HORDE Shared
//!
//! Common types used by the renderer and by the systems that feed it
//! (camera, gameplay, tooling).
//!
//! ## CRITICAL RULE
//!
//! This crate must NEVER depend on:
//! - `wgpu`
//! - `raw-window-handle`
//! - Any GPU or window-related crate
//!
//! If you need graphics types, put them in `horde_rendering`.

#![deny(missing_docs)]
#![deny(unsafe_code)]

pub mod constants;
pub mod math;

pub use constants::{
    CULL_WORKGROUP_SIZE, DEFAULT_MAX_INSTANCES, FRUSTUM_PLANE_COUNT, MAX_INSTANCES_PER_DRAW_CALL,
};
pub use math::{Mat4, Quaternion, Vec3, Vec4};
