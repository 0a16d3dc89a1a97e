//! # Renderer Error Types
//!
//! All errors the instancing pipeline can surface to its caller.

use thiserror::Error;

/// Errors that can occur while setting up or running the renderer.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RenderError {
    /// Invalid model table, instance counts or renderer configuration.
    ///
    /// Fatal at setup: the renderer stays `Uninitialized`.
    #[error("invalid configuration: {0}")]
    Configuration(String),

    /// A model holds more instances than its visible set can append.
    ///
    /// GPU append has no bounds-checked failure path, so this is only ever
    /// raised at setup, before the first cull.
    #[error("visible set overflow: model {model} has {instances} instances, capacity {capacity}")]
    CapacityOverflow {
        /// The offending model.
        model: u32,
        /// Instances routed to that model.
        instances: u32,
        /// Capacity allocated for its visible set.
        capacity: u32,
    },

    /// Indirect draw is not supported by the device or draw backend.
    ///
    /// Recoverable by switching to the batched direct path.
    #[error("indirect draw unavailable: {0}")]
    BackendUnavailable(String),

    /// The renderer was used after `dispose()`.
    #[error("renderer used after dispose")]
    UseAfterDispose,

    /// A per-frame call was made in the wrong lifecycle state.
    #[error("invalid renderer state: expected {expected}, found {actual}")]
    InvalidState {
        /// State the call requires.
        expected: &'static str,
        /// State the renderer was in.
        actual: &'static str,
    },

    /// The device was lost or its resources invalidated.
    ///
    /// All GPU resources have been released; run setup again.
    #[error("device lost: {0}")]
    DeviceLost(String),

    /// A TOML configuration file could not be read or parsed.
    #[error("config parse error: {0}")]
    ConfigParse(String),
}

impl RenderError {
    /// True when the caller must re-run setup before rendering again.
    #[must_use]
    pub const fn requires_reinit(&self) -> bool {
        matches!(self, Self::DeviceLost(_))
    }

    /// True when the error has a defined fallback (batched draws).
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(self, Self::BackendUnavailable(_))
    }
}

/// Result type for renderer operations.
pub type RenderResult<T> = Result<T, RenderError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        assert!(RenderError::DeviceLost("removed".into()).requires_reinit());
        assert!(!RenderError::UseAfterDispose.requires_reinit());
        assert!(RenderError::BackendUnavailable("no indirect".into()).is_recoverable());
        assert!(!RenderError::Configuration("zero".into()).is_recoverable());
    }

    #[test]
    fn test_overflow_message() {
        let err = RenderError::CapacityOverflow { model: 2, instances: 10, capacity: 8 };
        assert_eq!(
            err.to_string(),
            "visible set overflow: model 2 has 10 instances, capacity 8"
        );
    }
}
