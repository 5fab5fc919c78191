// error.rs — Dispatcher-level error type.
//
// The kernels themselves are total functions and never fail. Everything in
// here is detected ONCE per batch, before the first pixel is touched, so the
// per-pixel hot loop stays free of checks.

/// Errors raised while validating a frame batch or running a collaborator.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// A configured width or height is zero.
    #[error("{what} must be non-zero")]
    ZeroDimension { what: &'static str },

    /// A caller-supplied buffer does not match the configured dimensions.
    #[error("{buffer} buffer has {actual} elements, expected {expected}")]
    BufferSize {
        buffer: &'static str,
        expected: usize,
        actual: usize,
    },

    /// A plane is too short for the largest index its strides produce.
    #[error("{plane} plane holds {actual} bytes but the kernel reads up to index {required}")]
    PlaneTooSmall {
        plane: &'static str,
        required: usize,
        actual: usize,
    },

    /// A row stride is smaller than the row it has to hold.
    #[error("{plane} row stride {stride} is smaller than the minimum {min}")]
    StrideTooSmall {
        plane: &'static str,
        stride: usize,
        min: usize,
    },

    /// A configuration document could not be read or parsed.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// The external inference collaborator failed.
    #[error("segmenter failed: {0}")]
    Segmenter(String),
}

pub type Result<T> = std::result::Result<T, PipelineError>;

/// Fail with `BufferSize` unless `actual == expected`.
#[inline]
pub(crate) fn check_len(buffer: &'static str, expected: usize, actual: usize) -> Result<()> {
    if actual == expected {
        Ok(())
    } else {
        Err(PipelineError::BufferSize { buffer, expected, actual })
    }
}
