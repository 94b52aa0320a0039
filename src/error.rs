use thiserror::Error;

/// Errors raised by the concurrency toolkit.
///
/// Variant names are the error *kinds*, not a map of every call site that can
/// fail; several components compose the same kind (e.g. `InvalidArgument`
/// covers non-positive rates and non-power-of-two widths alike).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ToolkitError {
    #[error("promise already satisfied")]
    AlreadySatisfied,

    #[error("future has no shared state")]
    Uninitialized,

    #[error("hazard pointer slot index out of range: {0}")]
    InvalidSlot(usize),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("logic error: {0}")]
    LogicError(String),

    #[error("continuation panicked: {0}")]
    UserException(String),
}

pub type Result<T> = std::result::Result<T, ToolkitError>;

/// Renders a caught panic payload the way a continuation's `catch_unwind`
/// boundary needs to: panic payloads are `Any`, not `Display`.
pub(crate) fn describe_panic(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
