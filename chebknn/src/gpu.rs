//! Adapter from row-major point sets to the dimension-major, 1-based brute-force routine.

use gpu_knn::{BruteForceKnn, GpuError, WgpuKnn};
use ndarray::{Array2, ArrayView2};
use tracing::debug;

use crate::{validation::validate_query, Neighbors, Result};

/// Find the `k` nearest reference points of every query point by brute force on the GPU.
///
/// Coordinates are cast to `f32` before the device sees them, so distances are single
/// precision. A fresh [`WgpuKnn`] is acquired for every call; use [`knn_gpu_with`] to reuse one.
///
/// # Errors
///
/// - [`crate::KnnError::ShapeMismatch`] and [`crate::KnnError::InvalidParameter`] as for
///   [`crate::knn_tree`] (including non-finite coordinates), checked before any device is
///   touched;
/// - [`crate::KnnError::Gpu`] if no device is available or the routine fails.
pub fn knn_gpu<A>(
    query: ArrayView2<'_, A>,
    reference: ArrayView2<'_, A>,
    k: usize,
) -> Result<Neighbors<f32>>
where
    A: Copy + Into<f64>,
{
    validate_query(&query, &reference, k)?;
    let backend = WgpuKnn::new()?;
    debug!(adapter = backend.adapter_name(), "acquired GPU");
    knn_gpu_with(&backend, query, reference, k)
}

/// Like [`knn_gpu`], but on a caller-provided brute-force routine.
///
/// The adapter transposes both point sets to dimension-major `f32` buffers, runs `backend`,
/// transposes its `(k, n_q)` outputs back to `(n_q, k)` and shifts the 1-based indices to 0-based.
///
/// # Errors
///
/// As [`knn_gpu`]. An index outside `1..=n_r` in the routine's output is reported as
/// [`GpuError::MalformedOutput`].
pub fn knn_gpu_with<A, B>(
    backend: &B,
    query: ArrayView2<'_, A>,
    reference: ArrayView2<'_, A>,
    k: usize,
) -> Result<Neighbors<f32>>
where
    A: Copy + Into<f64>,
    B: BruteForceKnn + ?Sized,
{
    validate_query(&query, &reference, k)?;
    let dim = reference.ncols();
    let n_query = query.nrows();
    let n_reference = reference.nrows();

    let reference_dm = dimension_major(reference);
    let query_dm = dimension_major(query);

    debug!(n_query, n_reference, dim, k, "running brute-force KNN");
    let out = backend.knn(&reference_dm, &query_dm, dim, k)?;

    let distances = Array2::from_shape_vec((k, n_query), out.dist.into_vec())
        .map_err(|e| GpuError::MalformedOutput(format!("distance buffer: {e}")))?;
    let indices = Array2::from_shape_vec((k, n_query), out.ind.into_vec())
        .map_err(|e| GpuError::MalformedOutput(format!("index buffer: {e}")))?;

    if let Some(&bad) = indices
        .iter()
        .find(|&&i| i == 0 || i as usize > n_reference)
    {
        return Err(GpuError::MalformedOutput(format!(
            "index {bad} is outside 1..={n_reference}"
        ))
        .into());
    }

    Ok(Neighbors {
        distances: distances.t().as_standard_layout().into_owned(),
        indices: indices.t().mapv(|i| i as usize - 1),
    })
}

/// Flatten `points` of shape `(n, d)` so coordinate `j` of point `i` lands at `j * n + i`.
#[allow(clippy::cast_possible_truncation)]
fn dimension_major<A: Copy + Into<f64>>(points: ArrayView2<'_, A>) -> Vec<f32> {
    points.t().iter().map(|&x| x.into() as f32).collect()
}
