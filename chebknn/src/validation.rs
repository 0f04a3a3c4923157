//! Input validation shared by every query entry point.

use ndarray::ArrayView2;

use crate::{KnnError, Result};

/// Validate that query and reference points share a nonzero dimensionality.
///
/// Returns that dimensionality.
///
/// # Errors
///
/// [`KnnError::ShapeMismatch`] if the dimensionalities differ and [`KnnError::InvalidParameter`]
/// if the points are zero-dimensional.
pub fn validate_matching_dims(query_dim: usize, reference_dim: usize) -> Result<usize> {
    if query_dim != reference_dim {
        return Err(KnnError::ShapeMismatch {
            query: query_dim,
            reference: reference_dim,
        });
    }
    if query_dim == 0 {
        return Err(KnnError::InvalidParameter {
            name: "points",
            reason: "points must have at least one dimension".into(),
        });
    }
    Ok(query_dim)
}

/// Validate `k` against the size of the reference set.
///
/// # Errors
///
/// [`KnnError::InvalidParameter`] if `k` is zero or exceeds `n_reference`.
pub fn validate_k(k: usize, n_reference: usize) -> Result<()> {
    if k == 0 {
        return Err(KnnError::InvalidParameter {
            name: "k",
            reason: "k must be at least 1".into(),
        });
    }
    if k > n_reference {
        return Err(KnnError::InvalidParameter {
            name: "k",
            reason: format!("k={k} is larger than the number of reference points {n_reference}"),
        });
    }
    Ok(())
}

/// Validate that every coordinate of `points` is finite.
///
/// `role` names the point set in the error message.
///
/// # Errors
///
/// [`KnnError::InvalidParameter`] naming the first point with a NaN or infinite coordinate.
pub fn validate_finite<A>(points: &ArrayView2<'_, A>, role: &str) -> Result<()>
where
    A: Copy + Into<f64>,
{
    match points
        .rows()
        .into_iter()
        .position(|row| !row.iter().all(|&x| x.into().is_finite()))
    {
        Some(i) => Err(KnnError::InvalidParameter {
            name: "points",
            reason: format!("{role} point {i} has a non-finite coordinate"),
        }),
        None => Ok(()),
    }
}

/// Run every check a query needs, in order: dimensionality, `k`, then finiteness.
pub(crate) fn validate_query<A>(
    query: &ArrayView2<'_, A>,
    reference: &ArrayView2<'_, A>,
    k: usize,
) -> Result<()>
where
    A: Copy + Into<f64>,
{
    validate_matching_dims(query.ncols(), reference.ncols())?;
    validate_k(k, reference.nrows())?;
    validate_finite(reference, "reference")?;
    validate_finite(query, "query")
}
