//! Render pipeline orchestration.
//!
//! Owns the device, the model table, the instance store and every GPU
//! buffer, and runs the per-frame cycle: cull, build args, submit, draw.

mod renderer;
mod resources;
mod state;
mod stats;

pub use renderer::InstancedRenderer;
pub use resources::PipelineBuffers;
pub use state::RendererState;
pub use stats::{DrawPath, RenderStats};
