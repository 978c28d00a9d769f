//! Error types for the animation core

/// A precondition the caller violated
///
/// These mark ordering bugs (reading bones before they were set up this
/// frame, talking to a ragdoll before physics owns it). Callers recover by
/// falling back to the reference pose or the last animated pose.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InvalidStateError {
    /// Bone access is currently disallowed for this class of model
    #[error("Bone access denied for {} models", model_kind(.view_model))]
    BoneAccessDenied { view_model: bool },

    /// The bone's mask bit was not computed in the given epoch
    #[error("Bone {bone} was not computed in epoch {epoch}")]
    BonesNotComputed { bone: usize, epoch: u64 },

    /// Bones were computed in an older epoch
    #[error("Bones are stale (computed in epoch {computed}, current {current})")]
    BonesStale { computed: u64, current: u64 },

    /// Physics has not produced a position for the ragdoll yet
    #[error("Ragdoll is not ready")]
    RagdollNotReady,

    /// Ragdoll operation on an entity that is not a ragdoll
    #[error("Entity is not a ragdoll")]
    NotARagdoll,
}

fn model_kind(view_model: &bool) -> &'static str {
    if *view_model {
        "view"
    } else {
        "normal"
    }
}

/// Error type for animation operations
#[derive(Debug, thiserror::Error)]
pub enum AnimError {
    #[error(transparent)]
    InvalidState(#[from] InvalidStateError),

    /// No model registered under this name or handle
    #[error("Model not found: {0}")]
    ModelNotFound(String),

    /// Model data failed validation on registration
    #[error("Invalid model {model}: {reason}")]
    InvalidModel { model: String, reason: String },

    #[error("Bone index {index} out of range ({count} bones)")]
    BoneOutOfRange { index: usize, count: usize },

    #[error("Attachment index {index} out of range ({count} attachments)")]
    AttachmentOutOfRange { index: usize, count: usize },

    #[error("Sequence {sequence} out of range ({count} sequences)")]
    SequenceOutOfRange { sequence: i32, count: usize },

    /// Entity handle refers to a destroyed entity
    #[error("Stale entity handle")]
    StaleHandle,

    /// Entity has no model set
    #[error("Entity has no model")]
    NoModel,

    /// Failed to parse model JSON
    #[error("Failed to parse model: {0}")]
    Registry(#[from] serde_json::Error),
}

/// Result type for animation operations
pub type AnimResult<T> = Result<T, AnimError>;
