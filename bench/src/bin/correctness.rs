use anyhow::{ensure, Context};
use bench::{exhaustive_knn, init_subscriber, random_points, Distribution};
use chebknn::{knn_gpu_with, knn_tree, Approach, BruteForceKnn, HostKnn, Neighbors, WgpuKnn};
use clap::Parser;
use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;
use tracing::{error, info, warn};

/// Largest distance error tolerated from the single-precision backends.
const F32_TOLERANCE: f64 = 1e-5;

#[derive(Debug, Parser)]
#[command(name = "correctness")]
#[command(about = "Check every KNN method against an exhaustive Chebyshev scan")]
struct CorrectnessArgs {
    /// Number of reference points
    #[arg(long, default_value = "4096")]
    n_reference: usize,

    /// Number of query points
    #[arg(long, default_value = "512")]
    n_query: usize,

    /// Dimension of the points
    #[arg(long, default_value = "8")]
    dim: usize,

    /// Number of neighbors to retrieve
    #[arg(short, default_value = "16")]
    k: usize,

    /// Seed for the random point generator
    #[arg(long, default_value = "2707")]
    seed: u64,

    /// Distribution of random coordinates <uniform/normal>
    #[arg(long, default_value = "uniform")]
    distribution: Distribution,

    /// Fail instead of skipping the wgpu backend when no GPU is available
    #[arg(long)]
    require_gpu: bool,
}

fn main() -> anyhow::Result<()> {
    init_subscriber();
    let args = CorrectnessArgs::parse();

    run(&args).inspect_err(|e| error!("{e:#}"))
}

fn run(args: &CorrectnessArgs) -> anyhow::Result<()> {
    let mut rng = ChaCha20Rng::seed_from_u64(args.seed);
    let reference = random_points(&mut rng, args.n_reference, args.dim, args.distribution)?;
    let query = random_points(&mut rng, args.n_query, args.dim, args.distribution)?;

    info!("computing exhaustive answers...");
    let exact = exhaustive_knn(query.view(), reference.view(), args.k)?;

    for approach in [Approach::KdTree, Approach::BallTree] {
        let found = knn_tree(query.view(), reference.view(), args.k, approach)?;
        // same metric in the same precision, so distances must agree exactly
        ensure!(
            found.distances == exact.distances,
            "{approach} distances disagree with the exhaustive scan"
        );
        report_index_mismatches(&approach.to_string(), &found, &exact);
        info!("{approach}: ok");
    }

    let mut backends: Vec<(&str, Box<dyn BruteForceKnn>)> =
        vec![("host", Box::new(HostKnn) as Box<dyn BruteForceKnn>)];
    match WgpuKnn::new() {
        Ok(gpu) => {
            info!("testing wgpu on {}", gpu.adapter_name());
            backends.push(("wgpu", Box::new(gpu) as Box<dyn BruteForceKnn>));
        }
        Err(e) if !args.require_gpu => warn!("skipping wgpu backend: {e}"),
        Err(e) => return Err(e).context("acquiring a GPU"),
    }

    for (name, backend) in &backends {
        let found = knn_gpu_with(backend.as_ref(), query.view(), reference.view(), args.k)?;
        for (q, (f_row, e_row)) in found
            .distances
            .rows()
            .into_iter()
            .zip(exact.distances.rows())
            .enumerate()
        {
            for (&f, &e) in f_row.iter().zip(e_row.iter()) {
                ensure!(
                    (f64::from(f) - e).abs() <= F32_TOLERANCE,
                    "{name}: query {q} has distance {f} but the exhaustive scan found {e}"
                );
            }
        }
        report_index_mismatches(name, &found, &exact);
        info!("{name}: ok");
    }

    Ok(())
}

/// Differing indices at equal distances are ties, not errors; log how many there were.
fn report_index_mismatches<A>(name: &str, found: &Neighbors<A>, exact: &Neighbors<f64>) {
    let n = found
        .indices
        .iter()
        .zip(exact.indices.iter())
        .filter(|(a, b)| a != b)
        .count();
    if n > 0 {
        warn!("{name}: {n} neighbor indices differ from the exhaustive scan (ties)");
    }
}
