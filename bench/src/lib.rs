use std::{
    fmt,
    path::Path,
    str::FromStr,
    time::{Duration, Instant},
};

use anyhow::{anyhow, bail, ensure, Context};
use chebknn::{chebyshev, validate_finite, validate_k, validate_matching_dims, Neighbors};
use ndarray::{Array2, ArrayView2};
use rand::Rng;
use rand_distr::{Distribution as _, Normal};
use serde::Serialize;
use tracing_subscriber::{filter::LevelFilter, fmt as tracing_fmt, prelude::*, EnvFilter};

/// Mean of the normal point distribution, matching the uniform distribution's mean.
const NORMAL_MEAN: f64 = 0.5;
/// Standard deviation of the normal point distribution.
const NORMAL_STD_DEV: f64 = 0.25;

/// Install a subscriber logging to stdout and honoring `RUST_LOG`, defaulting to `info`.
pub fn init_subscriber() {
    let filter_layer = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy();

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(tracing_fmt::layer().with_target(true))
        .init();
}

/// Install a subscriber for the current test thread only, writing through the test harness.
pub fn init_test_subscriber() -> tracing::subscriber::DefaultGuard {
    let filter_layer = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy();

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(tracing_fmt::layer().with_target(true).with_test_writer())
        .set_default()
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
/// How randomly generated coordinates are distributed.
pub enum Distribution {
    /// Uniform on `[0, 1)`.
    #[default]
    Uniform,
    /// Normal around the center of the unit cube.
    Normal,
}

impl FromStr for Distribution {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "uniform" => Ok(Self::Uniform),
            "normal" | "gaussian" => Ok(Self::Normal),
            _ => bail!("unknown distribution `{s}` (expected `uniform` or `normal`)"),
        }
    }
}

impl fmt::Display for Distribution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Uniform => "uniform",
            Self::Normal => "normal",
        })
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
/// Which brute-force backend answers the GPU side of a comparison.
pub enum BackendKind {
    #[default]
    Wgpu,
    Host,
}

impl FromStr for BackendKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "wgpu" | "gpu" => Ok(Self::Wgpu),
            "host" | "cpu" => Ok(Self::Host),
            _ => bail!("unknown backend `{s}` (expected `wgpu` or `host`)"),
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Wgpu => "wgpu",
            Self::Host => "host",
        })
    }
}

/// Generate `n` random points of dimension `d`.
///
/// # Errors
///
/// Fails only if the normal distribution's parameters are rejected.
pub fn random_points(
    rng: &mut impl Rng,
    n: usize,
    d: usize,
    distribution: Distribution,
) -> anyhow::Result<Array2<f64>> {
    Ok(match distribution {
        Distribution::Uniform => Array2::from_shape_simple_fn((n, d), || rng.random_range(0.0..1.0)),
        Distribution::Normal => {
            let normal = Normal::new(NORMAL_MEAN, NORMAL_STD_DEV)
                .map_err(|e| anyhow!("bad normal distribution: {e}"))?;
            Array2::from_shape_simple_fn((n, d), || normal.sample(rng))
        }
    })
}

/// Load a point set from a CSV file: one point per line, coordinates separated by commas.
///
/// The dimensionality is taken from the first line. Blank lines are skipped.
///
/// # Errors
///
/// Fails if the file cannot be read, a coordinate does not parse, a line has a different
/// number of coordinates from the first, or the file holds no points.
pub fn parse_points_csv(p: impl AsRef<Path>) -> anyhow::Result<Array2<f64>> {
    let p = p.as_ref();
    let text = std::fs::read_to_string(p).with_context(|| format!("reading {}", p.display()))?;

    let mut coords = Vec::new();
    let mut dim = None;
    let mut n = 0;
    for (lineno, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let before = coords.len();
        for field in line.split(',') {
            let x = field.trim().parse::<f64>().with_context(|| {
                format!("{}:{}: bad coordinate `{field}`", p.display(), lineno + 1)
            })?;
            coords.push(x);
        }
        let width = coords.len() - before;
        let d = *dim.get_or_insert(width);
        ensure!(
            width == d,
            "{}:{}: expected {d} coordinates, found {width}",
            p.display(),
            lineno + 1
        );
        n += 1;
    }

    let Some(d) = dim else {
        bail!("{} contains no points", p.display());
    };
    Ok(Array2::from_shape_vec((n, d), coords)?)
}

pub fn stopwatch<F: FnOnce() -> R, R>(f: F) -> (R, Duration) {
    let tic = Instant::now();
    let r = f();
    (r, Instant::now().duration_since(tic))
}

/// Exact KNN by scanning every reference point. Ties go to the lower reference index.
///
/// # Errors
///
/// Rejects the same inputs as [`chebknn::knn_tree`]: mismatched dimensionality, `k` out of
/// range, or non-finite coordinates.
pub fn exhaustive_knn(
    query: ArrayView2<'_, f64>,
    reference: ArrayView2<'_, f64>,
    k: usize,
) -> chebknn::Result<Neighbors<f64>> {
    validate_matching_dims(query.ncols(), reference.ncols())?;
    validate_k(k, reference.nrows())?;
    validate_finite(&reference, "reference")?;
    validate_finite(&query, "query")?;

    let mut distances = Array2::zeros((query.nrows(), k));
    let mut indices = Array2::zeros((query.nrows(), k));
    for (q, point) in query.rows().into_iter().enumerate() {
        let point = point.to_vec();
        let mut all: Vec<(f64, usize)> = reference
            .rows()
            .into_iter()
            .enumerate()
            .map(|(i, r)| (chebyshev(&point, &r.to_vec()), i))
            .collect();
        all.sort_by(|a, b| a.0.total_cmp(&b.0));
        for (i, &(d, idx)) in all.iter().take(k).enumerate() {
            distances[[q, i]] = d;
            indices[[q, i]] = idx;
        }
    }
    Ok(Neighbors { distances, indices })
}

/// Number of entries in each row of `distances` strictly below `threshold`.
#[must_use]
pub fn count_within(distances: ArrayView2<'_, f64>, threshold: f64) -> Vec<usize> {
    distances
        .rows()
        .into_iter()
        .map(|row| row.iter().filter(|&&d| d < threshold).count())
        .collect()
}

#[derive(Clone, Debug, PartialEq, Serialize)]
/// How a tree-based result and a brute-force result for the same query differ.
pub struct Comparison {
    /// For each query point, how many tree-based neighbor distances fall below the threshold.
    pub within_threshold: Vec<usize>,
    /// Sum of `tree_index - gpu_index` over every entry.
    pub index_diff_sum: i64,
    /// Entries whose indices differ.
    pub mismatched_entries: usize,
    /// Query points with at least one differing index.
    pub mismatched_rows: usize,
    /// Largest absolute difference between corresponding distances.
    pub max_distance_diff: f64,
}

impl Comparison {
    /// Compare two results of the same query.
    ///
    /// # Errors
    ///
    /// Fails if the results have different shapes.
    #[allow(clippy::cast_possible_wrap)]
    pub fn new(
        tree: &Neighbors<f64>,
        gpu: &Neighbors<f32>,
        threshold: f64,
    ) -> anyhow::Result<Self> {
        ensure!(
            tree.indices.dim() == gpu.indices.dim(),
            "tree result has shape {:?} but GPU result has shape {:?}",
            tree.indices.dim(),
            gpu.indices.dim()
        );

        let index_diff_sum = tree
            .indices
            .iter()
            .zip(gpu.indices.iter())
            .map(|(&t, &g)| t as i64 - g as i64)
            .sum();

        let mut mismatched_entries = 0;
        let mut mismatched_rows = 0;
        for (t, g) in tree.indices.rows().into_iter().zip(gpu.indices.rows()) {
            let differing = t.iter().zip(g.iter()).filter(|(a, b)| a != b).count();
            mismatched_entries += differing;
            mismatched_rows += usize::from(differing > 0);
        }

        let max_distance_diff = tree
            .distances
            .iter()
            .zip(gpu.distances.iter())
            .map(|(&t, &g)| (t - f64::from(g)).abs())
            .fold(0.0, f64::max);

        Ok(Self {
            within_threshold: count_within(tree.distances.view(), threshold),
            index_diff_sum,
            mismatched_entries,
            mismatched_rows,
            max_distance_diff,
        })
    }
}
