//! Error types for the audio engine.
//!
//! Every public operation resolves to either success or an [`EngineError`].
//! Besides the usual `Display`/`Error` machinery, each variant maps onto a
//! stable integer code in the −1000…−8999 range via [`EngineError::code`],
//! grouped by subsystem:
//!
//! - −1000s: general / initialization
//! - −2000s: device
//! - −3000s: playout
//! - −4000s: recording
//! - −5000s: engine state
//! - −6000s: resource
//! - −7000s: render mode
//! - −8000s: voice processing
//!
//! Observer rejections are the exception: the observer's own non-zero code is
//! propagated unchanged.

use thiserror::Error;

use crate::graph::GraphNode;

/// Result type alias for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Errors produced by the audio engine.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum EngineError {
    /// A graph or backend operation failed for an unclassified reason.
    #[error("audio graph operation failed: {reason}")]
    GraphFailure {
        /// What the graph reported.
        reason: String,
    },

    /// Engine initialization failed.
    #[error("engine initialization failed: {reason}")]
    InitFailure {
        /// What went wrong during init.
        reason: String,
    },

    /// The operation requires `init()` first.
    #[error("engine is not initialized")]
    NotInitialized,

    /// A device index or id did not resolve to a known device.
    #[error("audio device not found")]
    DeviceNotFound,

    /// The output node reported an unusable hardware format.
    #[error("playout device not available")]
    PlayoutDeviceNotAvailable,

    /// The input node reported an unusable hardware format.
    #[error("recording device not available")]
    RecordingDeviceNotAvailable,

    /// The requested state violates a precondition; nothing was mutated.
    #[error("state transition rejected: {reason}")]
    StateTransitionRejected {
        /// The violated precondition.
        reason: String,
    },

    /// The engine object refused to start after exhausting all retries.
    #[error("engine start failed after {attempts} attempts")]
    StartFailedAfterRetries {
        /// Number of attempts made.
        attempts: u32,
    },

    /// An allocation or thread spawn failed.
    #[error("resource allocation failed: {reason}")]
    ResourceFailure {
        /// What could not be allocated.
        reason: String,
    },

    /// The operation does not apply to the current rendering mode.
    #[error("render mode mismatch")]
    RenderModeMismatch,

    /// Configuring or driving manual rendering failed.
    #[error("manual rendering failure: {reason}")]
    ManualRenderingFailure {
        /// What the manual-rendering engine reported.
        reason: String,
    },

    /// Toggling voice processing on the input node failed.
    #[error("voice processing failure: {reason}")]
    VoiceProcessingFailure {
        /// What the input node reported.
        reason: String,
    },

    /// A detach targeted a node that is not attached. Appliers treat this as
    /// recoverable and log it.
    #[error("node {node:?} is not attached")]
    NodeNotAttached {
        /// The node that was not attached.
        node: GraphNode,
    },

    /// An observer callback returned a non-zero code; the transition was
    /// rolled back and the code is surfaced unchanged.
    #[error("observer rejected transition with code {code}")]
    ObserverRejected {
        /// The observer's verbatim return value.
        code: i32,
    },
}

impl EngineError {
    /// The stable integer code for this error.
    ///
    /// Success is 0 by convention; every error is negative. Observer
    /// rejections return the observer's own code.
    pub fn code(&self) -> i32 {
        match self {
            EngineError::GraphFailure { .. } => -1000,
            EngineError::InitFailure { .. } => -1001,
            EngineError::NotInitialized => -1003,
            EngineError::DeviceNotFound => -2000,
            EngineError::PlayoutDeviceNotAvailable => -3010,
            EngineError::RecordingDeviceNotAvailable => -4010,
            EngineError::StateTransitionRejected { .. } => -5000,
            EngineError::StartFailedAfterRetries { .. } => -5001,
            EngineError::ResourceFailure { .. } => -6000,
            EngineError::RenderModeMismatch => -7000,
            EngineError::ManualRenderingFailure { .. } => -7001,
            EngineError::VoiceProcessingFailure { .. } => -8000,
            EngineError::NodeNotAttached { .. } => -1000,
            EngineError::ObserverRejected { code } => *code,
        }
    }

    /// Whether this error is recoverable inside an applier (logged, not
    /// fatal to the transition).
    pub fn is_recoverable(&self) -> bool {
        matches!(self, EngineError::NodeNotAttached { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_are_negative_and_grouped() {
        assert_eq!(EngineError::NotInitialized.code(), -1003);
        assert_eq!(EngineError::DeviceNotFound.code(), -2000);
        assert_eq!(EngineError::PlayoutDeviceNotAvailable.code(), -3010);
        assert_eq!(EngineError::RecordingDeviceNotAvailable.code(), -4010);
        assert_eq!(
            EngineError::StateTransitionRejected {
                reason: "running without enabled".into()
            }
            .code(),
            -5000
        );
        assert_eq!(EngineError::RenderModeMismatch.code(), -7000);
    }

    #[test]
    fn test_observer_code_passes_through() {
        let err = EngineError::ObserverRejected { code: -42 };
        assert_eq!(err.code(), -42);
    }

    #[test]
    fn test_node_not_attached_is_recoverable() {
        let err = EngineError::NodeNotAttached {
            node: GraphNode::MainMixer,
        };
        assert!(err.is_recoverable());
        assert!(!EngineError::DeviceNotFound.is_recoverable());
    }
}
