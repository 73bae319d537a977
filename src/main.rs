use std::{
    path::{Path, PathBuf},
    time::Instant,
};

use anyhow::Context;
use clap::Parser;
use kmeans_compress::{Config, EmptyClusterPolicy, Error, KMeans, PaletteEntry, adapter};
use rayon::prelude::*;
use serde::Serialize;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use walkdir::WalkDir;

/// Reduce images to a handful of colors with k-means clustering.
#[derive(Parser, Debug)]
#[command(name = "kmeans-compress", version, about)]
struct Cli {
    /// Image files, or directories to search for images
    #[arg(required = true)]
    inputs: Vec<PathBuf>,

    /// Number of output colors
    #[arg(short)]
    k: Option<usize>,

    /// Seed for centroid initialization
    #[arg(long)]
    seed: Option<u64>,

    /// Give up after this many iterations and keep the best result so far
    #[arg(long)]
    max_iterations: Option<usize>,

    /// Stop once no centroid moves further than this
    #[arg(long)]
    threshold: Option<f64>,

    /// Move empty clusters onto a random pixel instead of leaving them in place
    #[arg(long)]
    reseed_empty: bool,

    /// JSON file with default settings, flags take precedence
    #[arg(long)]
    config: Option<PathBuf>,

    /// Where to write compressed images
    #[arg(short, long, default_value = "compressed")]
    out_dir: PathBuf,

    /// Write each image's palette to this JSON file
    #[arg(long)]
    report: Option<PathBuf>,
}

impl Cli {
    fn config(&self) -> anyhow::Result<Config> {
        let mut config = match &self.config {
            Some(path) => {
                let json = std::fs::read_to_string(path)
                    .with_context(|| format!("Reading config {}", path.display()))?;
                Config::from_json(&json)
                    .with_context(|| format!("Parsing config {}", path.display()))?
            }
            None => Config::default(),
        };

        if let Some(k) = self.k {
            config.k = k;
        }
        if let Some(seed) = self.seed {
            config.seed = Some(seed);
        }
        if let Some(max_iterations) = self.max_iterations {
            config.max_iterations = max_iterations;
        }
        if let Some(threshold) = self.threshold {
            config.threshold = threshold;
        }
        if self.reseed_empty {
            config.empty_cluster = EmptyClusterPolicy::Reseed;
        }

        config.validate()?;
        Ok(config)
    }
}

#[derive(Debug, Serialize)]
struct ImageReport {
    input: PathBuf,
    output: PathBuf,
    iterations: usize,
    converged: bool,
    palette: Vec<PaletteEntry>,
}

/// Expands directories into the images they contain.
fn collect_inputs(inputs: &[PathBuf]) -> anyhow::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for input in inputs {
        if !input.is_dir() {
            files.push(input.clone());
            continue;
        }

        for entry in WalkDir::new(input).sort_by_file_name() {
            let entry = entry?;
            if entry.file_type().is_file() && adapter::is_supported(entry.path()) {
                files.push(entry.into_path());
            }
        }
    }
    Ok(files)
}

fn output_path(out_dir: &Path, input: &Path) -> PathBuf {
    let stem = input.file_stem().unwrap_or_default().to_string_lossy();
    out_dir.join(format!("{}.png", stem))
}

fn compress_file(kmeans: &KMeans, input: &Path, out_dir: &Path) -> anyhow::Result<ImageReport> {
    let start = Instant::now();
    let buffer = adapter::read_buffer(input)?;

    let result = match kmeans.run(&buffer) {
        Ok(result) => result,
        Err(Error::NonConvergence {
            iterations,
            best_effort,
        }) => {
            warn!(
                input = %input.display(),
                iterations,
                "did not converge, writing best effort"
            );
            *best_effort
        }
        Err(e) => {
            return Err(e).with_context(|| format!("Clustering {}", input.display()));
        }
    };

    let output = output_path(out_dir, input);
    let palette = result.palette();
    adapter::write_png(&output, result.output)?;

    info!(
        input = %input.display(),
        output = %output.display(),
        iterations = result.iterations,
        colors = palette.len(),
        elapsed_ms = start.elapsed().as_millis() as u64,
        "compressed"
    );

    Ok(ImageReport {
        input: input.to_path_buf(),
        output,
        iterations: result.iterations,
        converged: result.converged,
        palette,
    })
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "kmeans_compress=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().without_time())
        .init();

    let cli = Cli::parse();
    let kmeans = KMeans::new(cli.config()?)?;
    let inputs = collect_inputs(&cli.inputs)?;
    anyhow::ensure!(!inputs.is_empty(), "No images found in the given inputs");

    let reports = inputs
        .par_iter()
        .filter_map(|input| match compress_file(&kmeans, input, &cli.out_dir) {
            Ok(report) => Some(report),
            Err(e) => {
                error!("Error while compressing {}: {:?}", input.display(), e);
                None
            }
        })
        .collect::<Vec<_>>();

    if let Some(path) = &cli.report {
        let json = serde_json::to_string_pretty(&reports)?;
        std::fs::write(path, json).with_context(|| format!("Writing {}", path.display()))?;
    }

    anyhow::ensure!(
        reports.len() == inputs.len(),
        "{} of {} images failed",
        inputs.len() - reports.len(),
        inputs.len()
    );

    Ok(())
}
