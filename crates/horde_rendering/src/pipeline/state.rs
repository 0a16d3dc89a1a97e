//! Renderer lifecycle.

/// Lifecycle state of an [`super::InstancedRenderer`].
///
/// ```text
/// Uninitialized --setup--> Ready --render_frame--> PerFrameCycle --> Ready
///       ^                    |
///       +------reset---------+          any --dispose--> Disposed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum RendererState {
    /// No GPU resources; setup may run.
    #[default]
    Uninitialized,
    /// Resources allocated, waiting for a frame.
    Ready,
    /// Inside `render_frame`.
    PerFrameCycle,
    /// Released for good.
    Disposed,
}

impl RendererState {
    /// Lowercase name for logs and errors.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Uninitialized => "uninitialized",
            Self::Ready => "ready",
            Self::PerFrameCycle => "per_frame_cycle",
            Self::Disposed => "disposed",
        }
    }
}
