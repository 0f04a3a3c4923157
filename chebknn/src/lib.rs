//! K-nearest-neighbor queries under the Chebyshev (maximum-norm) distance.
//!
//! Two entry points answer the same question with different machinery:
//!
//! - [`knn_tree`] builds a k-d tree or a ball tree over the reference set and queries it in
//!   double precision. This is the trusted reference.
//! - [`knn_gpu`] runs a brute-force scan on the GPU in single precision.
//!
//! Both take a query set of shape `(n_q, d)` and a reference set of shape `(n_r, d)` and return
//! [`Neighbors`] of shape `(n_q, k)`, each row sorted by ascending distance and indexing rows of
//! the reference set from zero.

#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod error;
pub mod gpu;
mod metric;
mod neighbors;
pub mod tree;
mod validation;

pub use error::{KnnError, Result};
pub use gpu::{knn_gpu, knn_gpu_with};
pub use metric::{chebyshev, Chebyshev};
pub use neighbors::Neighbors;
pub use tree::{knn_tree, knn_tree_by_name, Approach};
pub use validation::{validate_finite, validate_k, validate_matching_dims};

pub use gpu_knn::{BruteForceKnn, GpuError, HostKnn, WgpuKnn};
