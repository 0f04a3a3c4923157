//! Run tree-based and brute-force Chebyshev KNN on the same data and report how they differ.
//!
//! Usage:
//!   cargo run --release --bin compare
//!
//! With data from disk and the host backend:
//!   cargo run --release --bin compare -- --query-csv q.csv --reference-csv r.csv --backend host

use std::path::PathBuf;

use anyhow::Context;
use bench::{
    init_subscriber, parse_points_csv, random_points, stopwatch, BackendKind, Comparison,
    Distribution,
};
use chebknn::{knn_gpu_with, knn_tree, Approach, BruteForceKnn, HostKnn, WgpuKnn};
use clap::Parser;
use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;
use serde::Serialize;
use tracing::{error, info};

#[derive(Debug, Parser)]
#[command(name = "compare")]
#[command(about = "Compare tree-based and brute-force Chebyshev KNN")]
struct CompareArgs {
    /// Number of random query points
    #[arg(long, default_value = "1000")]
    n_query: usize,

    /// Number of random reference points
    #[arg(long, default_value = "4000")]
    n_reference: usize,

    /// Dimension of the random points
    #[arg(long, default_value = "128")]
    dim: usize,

    /// Number of neighbors to retrieve
    #[arg(short, default_value = "10")]
    k: usize,

    /// Distance below which a neighbor is counted as close
    #[arg(long, default_value = "0.75")]
    threshold: f64,

    /// Seed for the random point generator
    #[arg(long, default_value = "2707")]
    seed: u64,

    /// Spatial index for the tree-based query <kdtree/balltree>
    #[arg(long, default_value = "kdtree")]
    approach: Approach,

    /// Brute-force backend <wgpu/host>
    #[arg(long, default_value = "wgpu")]
    backend: BackendKind,

    /// Distribution of random coordinates <uniform/normal>
    #[arg(long, default_value = "uniform")]
    distribution: Distribution,

    /// Load query points from a CSV file instead of generating them
    #[arg(long)]
    query_csv: Option<PathBuf>,

    /// Load reference points from a CSV file instead of generating them
    #[arg(long)]
    reference_csv: Option<PathBuf>,

    /// Print both neighbor results in full
    #[arg(long)]
    print_results: bool,

    /// Write a JSON report to this path
    #[arg(long)]
    json: Option<PathBuf>,
}

#[derive(Serialize)]
struct CompareReport {
    n_query: usize,
    n_reference: usize,
    dim: usize,
    k: usize,
    threshold: f64,
    seed: u64,
    approach: String,
    backend: String,
    device: String,
    tree_ms: f64,
    gpu_ms: f64,
    #[serde(flatten)]
    comparison: Comparison,
}

fn main() -> anyhow::Result<()> {
    init_subscriber();
    let args = CompareArgs::parse();

    run(&args).inspect_err(|e| error!("{e:#}"))
}

fn run(args: &CompareArgs) -> anyhow::Result<()> {
    let mut rng = ChaCha20Rng::seed_from_u64(args.seed);

    let query = match &args.query_csv {
        Some(p) => parse_points_csv(p)?,
        None => random_points(&mut rng, args.n_query, args.dim, args.distribution)?,
    };
    let reference = match &args.reference_csv {
        Some(p) => parse_points_csv(p)?,
        None => random_points(&mut rng, args.n_reference, args.dim, args.distribution)?,
    };
    info!(
        n_query = query.nrows(),
        n_reference = reference.nrows(),
        dim = reference.ncols(),
        k = args.k,
        "loaded point sets"
    );

    let (backend, device) = match args.backend {
        BackendKind::Wgpu => {
            let gpu = WgpuKnn::new().context("acquiring a GPU (try `--backend host`)")?;
            let name = gpu.adapter_name().to_owned();
            (Box::new(gpu) as Box<dyn BruteForceKnn>, name)
        }
        BackendKind::Host => (Box::new(HostKnn) as Box<dyn BruteForceKnn>, "host".to_owned()),
    };
    info!(%device, "using brute-force backend {}", args.backend);

    let (tree, tree_time) =
        stopwatch(|| knn_tree(query.view(), reference.view(), args.k, args.approach));
    let tree = tree.context("tree-based query")?;
    info!("{} query took {tree_time:?}", args.approach);

    let (gpu, gpu_time) =
        stopwatch(|| knn_gpu_with(backend.as_ref(), query.view(), reference.view(), args.k));
    let gpu = gpu.context("brute-force query")?;
    info!("brute-force query took {gpu_time:?}");

    if args.print_results {
        println!("tree distances:\n{}", tree.distances);
        println!("tree indices:\n{}", tree.indices);
        println!("brute-force distances:\n{}", gpu.distances);
        println!("brute-force indices:\n{}", gpu.indices);
    }

    let comparison = Comparison::new(&tree, &gpu, args.threshold)?;
    println!(
        "of {} neighbors, closer than {} per query point: {:?}",
        tree.k(),
        args.threshold,
        comparison.within_threshold
    );
    let nearest = tree.nearest_distances();
    println!(
        "nearest-neighbor distance: min {:.4}, mean {:.4}, max {:.4}",
        nearest.fold(f64::INFINITY, |a, &b| a.min(b)),
        nearest.mean().unwrap_or(f64::NAN),
        nearest.fold(0.0, |a: f64, &b| a.max(b))
    );
    println!("sum of index differences: {}", comparison.index_diff_sum);
    println!(
        "differing indices: {} entries in {} of {} query points",
        comparison.mismatched_entries,
        comparison.mismatched_rows,
        tree.n_queries()
    );
    println!(
        "largest distance difference: {:e}",
        comparison.max_distance_diff
    );

    if let Some(path) = &args.json {
        let report = CompareReport {
            n_query: query.nrows(),
            n_reference: reference.nrows(),
            dim: reference.ncols(),
            k: args.k,
            threshold: args.threshold,
            seed: args.seed,
            approach: args.approach.to_string(),
            backend: args.backend.to_string(),
            device,
            tree_ms: tree_time.as_secs_f64() * 1e3,
            gpu_ms: gpu_time.as_secs_f64() * 1e3,
            comparison,
        };
        let json = serde_json::to_string_pretty(&report)?;
        std::fs::write(path, json).with_context(|| format!("writing {}", path.display()))?;
        info!("wrote report to {}", path.display());
    }

    Ok(())
}
