//! Error types for the worker boundary layer.

/// Errors reported to callers of [`crate::WorkerHandle`] operations.
///
/// Double dispose and registry corruption are deliberately *not* variants:
/// they indicate a native double-free hazard and are treated as fatal
/// (panics), never as recoverable errors.
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    /// An operation was attempted on a handle after `dispose()`.
    #[error("worker has been disposed")]
    UseAfterDispose,

    /// The engine reported a compile or runtime failure. Carries the engine
    /// diagnostic text. The worker remains usable.
    #[error("script error: {0}")]
    Execution(String),

    /// One or more imports could not be resolved while loading a module
    /// graph. Nothing from the failed graph is left callable.
    #[error("module resolution failed: {0}")]
    ModuleResolution(String),

    /// Invalid [`crate::WorkerOptions`].
    #[error("invalid worker options: {0}")]
    Config(String),

    /// The worker thread went away while a request was in flight.
    #[error("worker channel closed")]
    ChannelClosed,

    /// The worker thread could not be spawned.
    #[error("failed to spawn worker thread: {0}")]
    SpawnFailed(#[from] std::io::Error),
}
