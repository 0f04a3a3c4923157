use gpu_knn::GpuError;
use thiserror::Error;

/// Everything that can go wrong in a KNN query.
///
/// Every variant is fatal to the call that produced it: no partial results are returned.
#[derive(Debug, Error)]
pub enum KnnError {
    /// Query and reference points have different dimensionality.
    #[error("query points have {query} dimensions but reference points have {reference}")]
    ShapeMismatch { query: usize, reference: usize },
    /// A numeric parameter is out of range, e.g. `k` larger than the reference set.
    #[error("invalid {name}: {reason}")]
    InvalidParameter { name: &'static str, reason: String },
    /// The requested index structure is not one we know how to build.
    #[error("unknown KNN search approach `{0}` (expected `kdtree` or `balltree`)")]
    UnsupportedOption(String),
    /// The spatial-index library rejected the input.
    #[error("spatial index failure: {0}")]
    Index(String),
    /// The brute-force routine or the device underneath it failed.
    #[error(transparent)]
    Gpu(#[from] GpuError),
}

pub type Result<T, E = KnnError> = std::result::Result<T, E>;
