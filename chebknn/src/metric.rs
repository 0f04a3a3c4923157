//! The Chebyshev (maximum-norm, L-infinity) distance.

use ndarray::ArrayView1;
use petal_neighbors::distance::Metric;

#[must_use]
/// Chebyshev distance between two points of equal dimension: the largest per-axis difference.
pub fn chebyshev(a: &[f64], b: &[f64]) -> f64 {
    a.iter()
        .zip(b)
        .map(|(x1, x2)| (x1 - x2).abs())
        .fold(0.0, f64::max)
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
/// Chebyshev metric for [`petal_neighbors::BallTree`].
///
/// The metric has no cheaper "reduced" form, so reduced and true distances coincide.
pub struct Chebyshev;

impl Metric<f64> for Chebyshev {
    fn distance(&self, x1: &ArrayView1<f64>, x2: &ArrayView1<f64>) -> f64 {
        x1.iter()
            .zip(x2)
            .map(|(a, b)| (a - b).abs())
            .fold(0.0, f64::max)
    }

    fn rdistance(&self, x1: &ArrayView1<f64>, x2: &ArrayView1<f64>) -> f64 {
        self.distance(x1, x2)
    }

    fn rdistance_to_distance(&self, d: f64) -> f64 {
        d
    }

    fn distance_to_rdistance(&self, d: f64) -> f64 {
        d
    }
}
