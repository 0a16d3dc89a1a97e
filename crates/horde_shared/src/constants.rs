//! # Renderer Constants
//!
//! Limits shared by every backend. Backends may lower the per-call limit
//! through configuration, never raise it above what the platform accepts.

// =============================================================================
// DRAW LIMITS
// =============================================================================

/// Maximum instances a single direct (non-indirect) instanced draw may carry.
///
/// This is the classic per-call cap of instanced draw APIs that upload the
/// transform array as a constant block.
pub const MAX_INSTANCES_PER_DRAW_CALL: u32 = 1023;

/// Default hard cap on the total instance population across all models.
/// 1 million instances keeps the instance store under 128MB.
pub const DEFAULT_MAX_INSTANCES: u32 = 1_000_000;

// =============================================================================
// CULLING
// =============================================================================

/// Lanes per workgroup of the culling compute kernel.
///
/// Must match `@workgroup_size` in the WGSL kernel.
pub const CULL_WORKGROUP_SIZE: u32 = 64;

/// A view frustum is always six half-spaces.
pub const FRUSTUM_PLANE_COUNT: usize = 6;
