//! KNN queries answered by a spatial tree over the reference set.
//!
//! The trees come from external crates: [`kdtree::KdTree`] for k-d trees and
//! [`petal_neighbors::BallTree`] for ball trees. This module only widens the inputs to `f64`,
//! builds the requested structure once, and collects its answers into [`Neighbors`].

use std::{fmt, str::FromStr};

use kdtree::KdTree;
use ndarray::{Array2, ArrayView1, ArrayView2};
use petal_neighbors::BallTree;
use tracing::debug;

use crate::{
    metric::{chebyshev, Chebyshev},
    validation::validate_query,
    KnnError, Neighbors, Result,
};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
/// Which spatial index answers a [`knn_tree`] query.
pub enum Approach {
    #[default]
    KdTree,
    BallTree,
}

impl FromStr for Approach {
    type Err = KnnError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "kdtree" | "kd_tree" => Ok(Self::KdTree),
            "balltree" | "ball_tree" => Ok(Self::BallTree),
            _ => Err(KnnError::UnsupportedOption(s.to_owned())),
        }
    }
}

impl fmt::Display for Approach {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::KdTree => "kdtree",
            Self::BallTree => "balltree",
        })
    }
}

/// Find the `k` nearest reference points of every query point using a spatial tree.
///
/// Inputs are widened to `f64`; distances are Chebyshev distances in `f64`.
///
/// # Errors
///
/// - [`KnnError::ShapeMismatch`] if `query` and `reference` have different numbers of columns;
/// - [`KnnError::InvalidParameter`] if `k` is zero, `k` exceeds the number of reference points,
///   the points are zero-dimensional, or any coordinate is NaN or infinite;
/// - [`KnnError::Index`] if the tree library fails.
pub fn knn_tree<A>(
    query: ArrayView2<'_, A>,
    reference: ArrayView2<'_, A>,
    k: usize,
    approach: Approach,
) -> Result<Neighbors<f64>>
where
    A: Copy + Into<f64>,
{
    validate_query(&query, &reference, k)?;

    let query = query.mapv(Into::into);
    let reference = reference.mapv(Into::into);

    debug!(
        %approach,
        n_query = query.nrows(),
        n_reference = reference.nrows(),
        dim = reference.ncols(),
        k,
        "running tree-based KNN"
    );

    match approach {
        Approach::KdTree => kd_tree_knn(&query, &reference, k),
        Approach::BallTree => ball_tree_knn(&query, reference, k),
    }
}

/// Like [`knn_tree`], but with the index structure named by a string (`"kdtree"` or
/// `"balltree"`).
///
/// The shape and `k` checks run before the name is looked at.
///
/// # Errors
///
/// As [`knn_tree`], plus [`KnnError::UnsupportedOption`] for an unknown name.
pub fn knn_tree_by_name<A>(
    query: ArrayView2<'_, A>,
    reference: ArrayView2<'_, A>,
    k: usize,
    approach: &str,
) -> Result<Neighbors<f64>>
where
    A: Copy + Into<f64>,
{
    validate_query(&query, &reference, k)?;
    knn_tree(query, reference, k, approach.parse()?)
}

fn kd_tree_knn(query: &Array2<f64>, reference: &Array2<f64>, k: usize) -> Result<Neighbors<f64>> {
    let mut tree = KdTree::new(reference.ncols());
    for (i, point) in reference.rows().into_iter().enumerate() {
        tree.add(point.to_vec(), i)
            .map_err(|e| KnnError::Index(format!("cannot index reference point {i}: {e:?}")))?;
    }

    collect_rows(query, k, |q, point| {
        let found = tree
            .nearest(&point.to_vec(), k, &chebyshev)
            .map_err(|e| KnnError::Index(format!("cannot query point {q}: {e:?}")))?;
        Ok(found.into_iter().map(|(d, &i)| (d, i)).collect())
    })
}

fn ball_tree_knn(query: &Array2<f64>, reference: Array2<f64>, k: usize) -> Result<Neighbors<f64>> {
    let tree = BallTree::new(reference, Chebyshev)
        .map_err(|e| KnnError::Index(format!("cannot build ball tree: {e:?}")))?;

    collect_rows(query, k, |_, point| {
        let (indices, distances) = tree.query(&point, k);
        Ok(distances.into_iter().zip(indices).collect())
    })
}

/// Ask `find` for the neighbors of each query row and pack the answers into [`Neighbors`].
///
/// Each answer is sorted by distance (stably, so the library's own order of equal distances is
/// kept) and must contain exactly `k` entries.
fn collect_rows<F>(query: &Array2<f64>, k: usize, mut find: F) -> Result<Neighbors<f64>>
where
    F: FnMut(usize, ArrayView1<'_, f64>) -> Result<Vec<(f64, usize)>>,
{
    let n_query = query.nrows();
    let mut distances = Array2::zeros((n_query, k));
    let mut indices = Array2::zeros((n_query, k));

    for (q, point) in query.rows().into_iter().enumerate() {
        let mut found = find(q, point)?;
        if found.len() != k {
            return Err(KnnError::Index(format!(
                "asked for {k} neighbors of point {q} but the index returned {}",
                found.len()
            )));
        }
        found.sort_by(|a, b| a.0.total_cmp(&b.0));

        for (i, (d, idx)) in found.into_iter().enumerate() {
            distances[[q, i]] = d;
            indices[[q, i]] = idx;
        }
    }

    Ok(Neighbors { distances, indices })
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;
    use ndarray::{array, Array2};
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha20Rng;

    use super::*;

    const APPROACHES: [Approach; 2] = [Approach::KdTree, Approach::BallTree];

    fn random_points(rng: &mut impl Rng, n: usize, d: usize) -> Array2<f64> {
        Array2::from_shape_simple_fn((n, d), || rng.random_range(0.0..1.0))
    }

    /// Exhaustive Chebyshev scan: sorted `(distance, index)` pairs for one query point.
    fn brute_force(point: &[f64], reference: &Array2<f64>) -> Vec<(f64, usize)> {
        let mut all: Vec<_> = reference
            .rows()
            .into_iter()
            .enumerate()
            .map(|(i, r)| (chebyshev(point, &r.to_vec()), i))
            .collect();
        all.sort_by(|a, b| a.0.total_cmp(&b.0));
        all
    }

    #[test]
    fn parse_approach() {
        assert_eq!("kdtree".parse::<Approach>().unwrap(), Approach::KdTree);
        assert_eq!("BallTree".parse::<Approach>().unwrap(), Approach::BallTree);
        assert_eq!("ball_tree".parse::<Approach>().unwrap(), Approach::BallTree);
        assert!(matches!(
            "brute".parse::<Approach>(),
            Err(KnnError::UnsupportedOption(name)) if name == "brute"
        ));
        assert_eq!(Approach::BallTree.to_string(), "balltree");
        assert_eq!(
            Approach::KdTree.to_string().parse::<Approach>().unwrap(),
            Approach::KdTree
        );
    }

    #[test]
    fn points_find_themselves() {
        let points = array![[1.0, 2.0, 3.0, 4.0, 5.0], [1.0, 3.0, 5.0, 7.0, 9.0]];
        for approach in APPROACHES {
            let n = knn_tree(points.view(), points.view(), 1, approach).unwrap();
            println!("{approach}: {n:?}");
            assert_eq!(n.indices, array![[0], [1]]);
            assert_eq!(n.distances, array![[0.0], [0.0]]);
        }
    }

    #[test]
    fn both_neighbors() {
        let points = array![[1.0, 2.0, 3.0, 4.0, 5.0], [1.0, 3.0, 5.0, 7.0, 9.0]];
        for approach in APPROACHES {
            let n = knn_tree(points.view(), points.view(), 2, approach).unwrap();
            assert_eq!(n.indices, array![[0, 1], [1, 0]]);
            assert_eq!(n.distances, array![[0.0, 4.0], [0.0, 4.0]]);
        }
    }

    #[test]
    fn single_precision_input() {
        let reference = array![[0.0f32, 0.0], [1.0, 0.0], [0.0, 1.0], [1.0, 1.0]];
        let query = array![[0.1f32, 0.1], [0.9, 0.6]];
        for approach in APPROACHES {
            let n = knn_tree(query.view(), reference.view(), 2, approach).unwrap();
            assert_eq!(n.indices.row(0)[0], 0);
            assert_eq!(n.indices.row(1)[0], 3);
            assert_abs_diff_eq!(n.distances[[1, 0]], 0.4, epsilon = 1e-6);
        }
    }

    #[test]
    fn shape_mismatch() {
        let query = Array2::<f64>::zeros((3, 4));
        let reference = Array2::<f64>::zeros((10, 5));
        for approach in APPROACHES {
            assert!(matches!(
                knn_tree(query.view(), reference.view(), 1, approach),
                Err(KnnError::ShapeMismatch {
                    query: 4,
                    reference: 5
                })
            ));
        }
    }

    #[test]
    fn k_too_large() {
        let points = Array2::<f64>::zeros((3, 2));
        for approach in APPROACHES {
            assert!(matches!(
                knn_tree(points.view(), points.view(), 4, approach),
                Err(KnnError::InvalidParameter { name: "k", .. })
            ));
        }
    }

    #[test]
    fn by_name() {
        let points = array![[0.0, 0.0], [2.0, 2.0], [5.0, 1.0]];
        let n = knn_tree_by_name(points.view(), points.view(), 3, "balltree").unwrap();
        assert_eq!(n.indices.column(0).to_vec(), vec![0, 1, 2]);

        assert!(matches!(
            knn_tree_by_name(points.view(), points.view(), 1, "octree"),
            Err(KnnError::UnsupportedOption(_))
        ));
        // parameter errors are reported ahead of the unknown name
        assert!(matches!(
            knn_tree_by_name(points.view(), points.view(), 4, "octree"),
            Err(KnnError::InvalidParameter { .. })
        ));
    }

    #[test]
    fn empty_query_set() {
        let reference = array![[0.0, 0.0], [1.0, 1.0]];
        let query = Array2::<f64>::zeros((0, 2));
        for approach in APPROACHES {
            let n = knn_tree(query.view(), reference.view(), 2, approach).unwrap();
            assert_eq!(n.distances.dim(), (0, 2));
            assert_eq!(n.indices.dim(), (0, 2));
        }
    }

    #[test]
    fn non_finite_point() {
        let reference = array![[0.0, f64::NAN], [1.0, 1.0], [3.0, 3.0]];
        let query = array![[0.0, 0.0]];
        let inf_reference = array![[0.0, f64::INFINITY], [1.0, 1.0], [3.0, 3.0]];
        let nan_query = array![[0.0, f64::NAN]];
        let finite = array![[1.0, 1.0], [3.0, 3.0]];

        for approach in APPROACHES {
            for (q, r) in [
                (query.view(), reference.view()),
                (query.view(), inf_reference.view()),
                (nan_query.view(), finite.view()),
            ] {
                assert!(matches!(
                    knn_tree(q, r, 1, approach),
                    Err(KnnError::InvalidParameter { name: "points", .. })
                ));
            }
        }
    }

    #[test]
    fn matches_brute_force() {
        let mut rng = ChaCha20Rng::seed_from_u64(2707);
        let reference = random_points(&mut rng, 500, 6);
        let query = random_points(&mut rng, 60, 6);
        let k = 8;

        for approach in APPROACHES {
            let n = knn_tree(query.view(), reference.view(), k, approach).unwrap();
            assert_eq!(n.distances.dim(), (60, k));

            for (q, point) in query.rows().into_iter().enumerate() {
                let expected = brute_force(&point.to_vec(), &reference);
                for (i, (d, idx)) in n.row(q).enumerate() {
                    // distances are exact; indices only differ on ties, which random data lacks
                    assert_abs_diff_eq!(d, expected[i].0);
                    assert_eq!(idx, expected[i].1);
                }
            }
        }
    }

    #[test]
    fn rows_are_sorted() {
        let mut rng = ChaCha20Rng::seed_from_u64(1);
        let reference = random_points(&mut rng, 300, 3);
        let query = random_points(&mut rng, 40, 3);

        for approach in APPROACHES {
            let n = knn_tree(query.view(), reference.view(), 12, approach).unwrap();
            for row in n.distances.rows() {
                assert!(row.iter().zip(row.iter().skip(1)).all(|(a, b)| a <= b));
            }
        }
    }

    #[test]
    fn self_query_is_nearest() {
        let mut rng = ChaCha20Rng::seed_from_u64(99);
        let points = random_points(&mut rng, 200, 16);

        for approach in APPROACHES {
            let n = knn_tree(points.view(), points.view(), 3, approach).unwrap();
            for q in 0..points.nrows() {
                assert_eq!(n.indices[[q, 0]], q);
                assert_abs_diff_eq!(n.distances[[q, 0]], 0.0);
            }
        }
    }
}
