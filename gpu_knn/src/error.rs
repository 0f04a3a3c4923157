use thiserror::Error;

/// Failures of the brute-force routine and of the device underneath it.
#[derive(Debug, Error)]
pub enum GpuError {
    #[error("no compatible GPU adapter found")]
    NoAdapter,
    #[error("failed to acquire a GPU device: {0}")]
    RequestDevice(String),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("{what} needs {size} bytes but the device allows at most {limit}")]
    BufferTooLarge {
        what: &'static str,
        size: u64,
        limit: u64,
    },
    #[error("GPU validation error: {0}")]
    Validation(String),
    #[error("failed to map read-back buffer")]
    Map(#[from] wgpu::BufferAsyncError),
    #[error("read-back was dropped before the device answered")]
    ReadbackCancelled,
    #[error("malformed output: {0}")]
    MalformedOutput(String),
}

pub type Result<T, E = GpuError> = std::result::Result<T, E>;
