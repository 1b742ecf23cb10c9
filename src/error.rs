use thiserror::Error;

/// Reasons the flock simulation can refuse to run
#[derive(Debug, Clone, Error, PartialEq)]
pub enum FlockError {
    #[error("the render adapter cannot run compute shaders")]
    ComputeShadersUnsupported,

    #[error("texture format {format} cannot be used as a {usage} on this adapter")]
    StorageFormatUnsupported {
        format: &'static str,
        usage: &'static str,
    },

    #[error("no render sub-app is available to host the compute passes")]
    RendererUnavailable,

    #[error("{kernel} kernel failed to compile: {reason}")]
    PipelineFailed { kernel: &'static str, reason: String },

    #[error("invalid flock configuration: {0}")]
    InvalidConfig(String),
}
