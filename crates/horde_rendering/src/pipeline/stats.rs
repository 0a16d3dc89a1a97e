//! Rendering statistics.

/// Which draw path a frame used.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DrawPath {
    /// GPU cull, one indirect draw per model.
    #[default]
    Indirect,
    /// Host cull, direct draws in capped batches.
    Batched,
}

impl DrawPath {
    /// Lowercase name for logs.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Indirect => "indirect",
            Self::Batched => "batched",
        }
    }
}

/// Statistics from a render frame.
///
/// Instance totals are only known on the batched path; the indirect path
/// never reads GPU counts back.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RenderStats {
    /// Frames rendered since setup, this one included.
    pub frame_index: u64,
    /// Path used.
    pub path: DrawPath,
    /// Number of draw calls.
    pub draw_calls: u32,
    /// Models drawn.
    pub models_drawn: u32,
    /// Instances in the store.
    pub total_instances: u32,
    /// Visible instances (batched path only).
    pub visible_instances: Option<u32>,
    /// Host time spent recording the frame, in milliseconds.
    pub frame_time_ms: f32,
}

impl RenderStats {
    /// Fraction of instances culled (batched path only).
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn culled_ratio(&self) -> Option<f32> {
        let visible = self.visible_instances?;
        (self.total_instances > 0).then(|| 1.0 - visible as f32 / self.total_instances as f32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_culled_ratio() {
        let stats = RenderStats { total_instances: 200, visible_instances: Some(50), ..RenderStats::default() };
        assert_eq!(stats.culled_ratio(), Some(0.75));
        assert_eq!(RenderStats::default().culled_ratio(), None);
    }
}
