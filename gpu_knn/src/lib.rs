//! Brute-force k-nearest-neighbor search under the Chebyshev (maximum-norm) distance.
//!
//! The interface follows the layout of the classic CUDA kNN routine:
//!
//! - input point sets are *dimension-major*: a set of `n` points in `d` dimensions is a flat
//!   `d * n` buffer where `data[j * n + i]` is coordinate `j` of point `i`;
//! - outputs are `k * n_query` buffers in the same orientation: `dist[i * n_query + q]` is the
//!   distance from query `q` to its `i`-th nearest reference point;
//! - reference indices are **1-based**.
//!
//! Two backends implement [`BruteForceKnn`] with identical semantics: [`WgpuKnn`] runs a WGSL
//! compute kernel, and [`HostKnn`] runs the same scan on the CPU.

#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod device;
mod error;
mod host;

pub use device::WgpuKnn;
pub use error::{GpuError, Result};
pub use host::HostKnn;

/// Output of a brute-force query.
///
/// Both buffers have `k * n_query` entries in dimension-major order.
#[derive(Clone, Debug, PartialEq)]
pub struct KnnOutput {
    /// Chebyshev distances, ascending along each query's column.
    pub dist: Box<[f32]>,
    /// 1-based indices into the reference set.
    pub ind: Box<[u32]>,
}

/// A brute-force Chebyshev k-nearest-neighbor routine.
pub trait BruteForceKnn {
    /// Find the `k` nearest points of `reference` for every point of `query`.
    ///
    /// `reference` and `query` are dimension-major buffers of `dim`-dimensional points.
    ///
    /// # Errors
    ///
    /// Returns [`GpuError::InvalidInput`] if the buffers do not describe whole points, if `dim` is
    /// zero, or if `k` is zero or larger than the number of reference points.
    /// Backends may return other variants for device failures.
    fn knn(&self, reference: &[f32], query: &[f32], dim: usize, k: usize) -> Result<KnnOutput>;
}

/// Dimensions of a single query, resolved from the raw buffers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct Shape {
    pub n_ref: usize,
    pub n_query: usize,
    pub dim: usize,
    pub k: usize,
}

impl Shape {
    /// Check that the raw buffers and `k` describe a well-formed query.
    pub(crate) fn resolve(reference: &[f32], query: &[f32], dim: usize, k: usize) -> Result<Self> {
        if dim == 0 {
            return Err(GpuError::InvalidInput("dimension must be nonzero".into()));
        }
        if reference.len() % dim != 0 {
            return Err(GpuError::InvalidInput(format!(
                "reference buffer of length {} does not hold whole {dim}-dimensional points",
                reference.len()
            )));
        }
        if query.len() % dim != 0 {
            return Err(GpuError::InvalidInput(format!(
                "query buffer of length {} does not hold whole {dim}-dimensional points",
                query.len()
            )));
        }
        let n_ref = reference.len() / dim;
        if k == 0 || k > n_ref {
            return Err(GpuError::InvalidInput(format!(
                "k={k} must be between 1 and the number of reference points {n_ref}"
            )));
        }
        if u32::try_from(n_ref).is_err() {
            return Err(GpuError::InvalidInput(format!(
                "{n_ref} reference points cannot be indexed by u32"
            )));
        }

        Ok(Self {
            n_ref,
            n_query: query.len() / dim,
            dim,
            k,
        })
    }

    /// Number of entries in each output buffer.
    pub(crate) const fn output_len(&self) -> usize {
        self.k * self.n_query
    }
}
