//! K-means color clustering over raw RGBA buffers.
//!
//! One run goes: sample `k` starting centroids, then repeatedly assign every
//! pixel to its nearest centroid and move each centroid to the mean of its
//! pixels, until no centroid moves further than the configured threshold.

use std::collections::HashMap;

use image::Rgb;
use rand::Rng;
use rayon::prelude::*;
use serde::Serialize;
use tracing::{Level, debug, info, warn};

use crate::buffer::{CHANNELS, PixelBuffer};
use crate::color::{Color, dist_sq, distance};
use crate::config::{Config, EmptyClusterPolicy};
use crate::error::{Error, Result};

/// Centroid colors, indexed by cluster id.
pub type CentroidSet = Vec<Color>;

/// One cluster id per pixel.
pub type Assignment = Vec<usize>;

const OPAQUE: u8 = u8::MAX;

fn check_input(buffer: &PixelBuffer, k: usize) -> Result<()> {
    if k == 0 {
        return Err(Error::invalid("k must be at least 1"));
    }
    if buffer.is_empty() {
        return Err(Error::invalid("pixel buffer holds no pixels"));
    }
    Ok(())
}

fn check_assignment(buffer: &PixelBuffer, assignment: &[usize], k: usize) -> Result<()> {
    if assignment.len() != buffer.pixel_count() {
        return Err(Error::invalid(format!(
            "assignment covers {} pixels, buffer has {}",
            assignment.len(),
            buffer.pixel_count()
        )));
    }
    if let Some(&cluster) = assignment.par_iter().find_any(|&&c| c >= k) {
        return Err(Error::invalid(format!(
            "cluster id {} out of range for k = {}",
            cluster, k
        )));
    }
    Ok(())
}

/// Picks `k` centroids, each copied from a uniformly random pixel.
///
/// Pixels are drawn with replacement, so duplicate centroids are possible.
pub fn initialize_centroids<R: Rng + ?Sized>(
    buffer: &PixelBuffer,
    k: usize,
    rng: &mut R,
) -> Result<CentroidSet> {
    check_input(buffer, k)?;
    let n = buffer.pixel_count();
    Ok((0..k).map(|_| buffer.color(rng.random_range(0..n))).collect())
}

/// Index of the nearest centroid, the lowest index wins ties.
fn nearest(color: Color, centroids: &[Color]) -> usize {
    let mut min_dist = f64::INFINITY;
    let mut min_i = 0;

    for (i, centroid) in centroids.iter().enumerate() {
        let d = distance(color, *centroid);
        if d < min_dist {
            min_dist = d;
            min_i = i;
        }
    }

    min_i
}

/// Maps every pixel to its nearest centroid.
pub fn assign_clusters(buffer: &PixelBuffer, centroids: &[Color]) -> Result<Assignment> {
    check_input(buffer, centroids.len())?;

    Ok(buffer
        .data()
        .par_chunks_exact(CHANNELS)
        .map(|px| nearest(Color::from_pixel(px), centroids))
        .collect())
}

/// Per-cluster channel sums. Integer sums keep the mean independent of how
/// the pixels were split across workers.
#[derive(Clone, Copy, Debug, Default)]
struct Accumulator {
    r: u64,
    g: u64,
    b: u64,
    count: u64,
}

impl Accumulator {
    fn add(&mut self, px: &[u8]) {
        self.r += px[0] as u64;
        self.g += px[1] as u64;
        self.b += px[2] as u64;
        self.count += 1;
    }

    fn merge(self, other: Self) -> Self {
        Self {
            r: self.r + other.r,
            g: self.g + other.g,
            b: self.b + other.b,
            count: self.count + other.count,
        }
    }

    fn mean(&self) -> Option<Color> {
        if self.count == 0 {
            return None;
        }
        let n = self.count as f64;
        Some(Color::new(
            self.r as f64 / n,
            self.g as f64 / n,
            self.b as f64 / n,
        ))
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Update {
    pub centroids: CentroidSet,
    /// Clusters that received no pixels.
    pub empty: Vec<usize>,
}

/// Moves every centroid to the mean color of its assigned pixels.
///
/// `previous` supplies `k` and the fallback positions for empty clusters
/// under [`EmptyClusterPolicy::Retain`].
pub fn update_centroids<R: Rng + ?Sized>(
    buffer: &PixelBuffer,
    assignment: &[usize],
    previous: &[Color],
    policy: EmptyClusterPolicy,
    rng: &mut R,
) -> Result<Update> {
    let k = previous.len();
    check_input(buffer, k)?;
    check_assignment(buffer, assignment, k)?;

    let sums = buffer
        .data()
        .par_chunks_exact(CHANNELS)
        .zip(assignment.par_iter())
        .fold(
            || vec![Accumulator::default(); k],
            |mut acc, (px, &cluster)| {
                acc[cluster].add(px);
                acc
            },
        )
        .reduce(
            || vec![Accumulator::default(); k],
            |a, b| a.into_iter().zip(b).map(|(a, b)| a.merge(b)).collect(),
        );

    let mut empty = Vec::new();
    let centroids = sums
        .iter()
        .enumerate()
        .map(|(i, acc)| match acc.mean() {
            Some(mean) => mean,
            None => {
                empty.push(i);
                match policy {
                    EmptyClusterPolicy::Retain => {
                        debug!(cluster = i, "empty cluster, keeping previous centroid");
                        previous[i]
                    }
                    EmptyClusterPolicy::Reseed => {
                        let color = buffer.color(rng.random_range(0..buffer.pixel_count()));
                        debug!(
                            cluster = i,
                            ?color,
                            "empty cluster, reseeding from a random pixel"
                        );
                        color
                    }
                }
            }
        })
        .collect();

    Ok(Update { centroids, empty })
}

/// True when no centroid moved further than `threshold`.
pub fn has_converged(old: &[Color], new: &[Color], threshold: f64) -> Result<bool> {
    if old.len() != new.len() {
        return Err(Error::invalid(format!(
            "cannot compare {} centroids against {}",
            old.len(),
            new.len()
        )));
    }
    Ok(old
        .iter()
        .zip(new)
        .all(|(a, b)| distance(*a, *b) <= threshold))
}

fn max_shift(old: &[Color], new: &[Color]) -> f64 {
    old.iter()
        .zip(new)
        .map(|(a, b)| distance(*a, *b))
        .fold(0., f64::max)
}

/// Sum of squared distances from each pixel to its assigned centroid.
pub fn inertia(
    buffer: &PixelBuffer,
    assignment: &[usize],
    centroids: &[Color],
) -> Result<f64> {
    check_assignment(buffer, assignment, centroids.len())?;

    Ok(buffer
        .colors()
        .zip(assignment)
        .map(|(color, &cluster)| dist_sq(color, centroids[cluster]))
        .sum())
}

/// Renders every pixel in its cluster's rounded color, fully opaque.
///
/// Only the dimensions of `buffer` are used, colors come from `assignment`.
pub fn reconstruct(
    buffer: &PixelBuffer,
    assignment: &[usize],
    centroids: &[Color],
) -> Result<PixelBuffer> {
    check_assignment(buffer, assignment, centroids.len())?;

    let palette = centroids
        .iter()
        .map(|c| {
            let Rgb([r, g, b]) = c.to_rgb8();
            [r, g, b, OPAQUE]
        })
        .collect::<Vec<_>>();

    let mut data = vec![0u8; buffer.data().len()];
    data.par_chunks_exact_mut(CHANNELS)
        .zip(assignment.par_iter())
        .for_each(|(px, &cluster)| px.copy_from_slice(&palette[cluster]));

    PixelBuffer::new(buffer.width(), buffer.height(), data)
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct PaletteEntry {
    pub color: [u8; 3],
    pub hex: String,
    pub pixels: usize,
}

/// The result of one clustering run.
#[derive(Clone, Debug, PartialEq)]
pub struct Quantization {
    pub centroids: CentroidSet,
    pub assignment: Assignment,
    /// Completed update rounds.
    pub iterations: usize,
    pub converged: bool,
    /// Number of times a cluster came out of an update with no pixels.
    pub empty_clusters: usize,
    pub inertia: f64,
    pub output: PixelBuffer,
}

impl Quantization {
    /// Distinct output colors with their pixel counts, most used first.
    pub fn palette(&self) -> Vec<PaletteEntry> {
        let mut counts = HashMap::<[u8; 3], usize>::new();
        let mut sizes = vec![0usize; self.centroids.len()];
        for &cluster in &self.assignment {
            sizes[cluster] += 1;
        }
        for (centroid, size) in self.centroids.iter().zip(sizes) {
            if size > 0 {
                *counts.entry(centroid.to_rgb8().0).or_default() += size;
            }
        }

        let mut palette = counts
            .into_iter()
            .map(|(color @ [r, g, b], pixels)| PaletteEntry {
                color,
                hex: format!("#{:02x}{:02x}{:02x}", r, g, b),
                pixels,
            })
            .collect::<Vec<_>>();
        palette.sort_by(|a, b| b.pixels.cmp(&a.pixels).then(a.color.cmp(&b.color)));
        palette
    }
}

/// Runs the assign/update loop configured by a [`Config`].
#[derive(Clone, Debug)]
pub struct KMeans {
    config: Config,
}

impl KMeans {
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Clusters `buffer` with an RNG seeded from the config.
    pub fn run(&self, buffer: &PixelBuffer) -> Result<Quantization> {
        let mut rng = self.config.rng();
        self.run_with_rng(buffer, &mut rng)
    }

    pub fn run_with_rng<R: Rng + ?Sized>(
        &self,
        buffer: &PixelBuffer,
        rng: &mut R,
    ) -> Result<Quantization> {
        self.run_with_cancel(buffer, rng, || false)
    }

    /// Like [`KMeans::run_with_rng`], but polls `should_cancel` at the top of
    /// every iteration and stops with [`Error::Cancelled`] once it returns true.
    pub fn run_with_cancel<R, F>(
        &self,
        buffer: &PixelBuffer,
        rng: &mut R,
        should_cancel: F,
    ) -> Result<Quantization>
    where
        R: Rng + ?Sized,
        F: FnMut() -> bool,
    {
        let centroids = initialize_centroids(buffer, self.config.k, rng)?;
        self.iterate(buffer, centroids, rng, should_cancel)
    }

    /// Starts from caller-supplied centroids instead of random samples.
    pub fn run_from<R: Rng + ?Sized>(
        &self,
        buffer: &PixelBuffer,
        initial: CentroidSet,
        rng: &mut R,
    ) -> Result<Quantization> {
        if initial.len() != self.config.k {
            return Err(Error::invalid(format!(
                "expected {} initial centroids, got {}",
                self.config.k,
                initial.len()
            )));
        }
        self.iterate(buffer, initial, rng, || false)
    }

    fn iterate<R, F>(
        &self,
        buffer: &PixelBuffer,
        initial: CentroidSet,
        rng: &mut R,
        mut should_cancel: F,
    ) -> Result<Quantization>
    where
        R: Rng + ?Sized,
        F: FnMut() -> bool,
    {
        let Config {
            threshold,
            max_iterations,
            empty_cluster,
            ..
        } = self.config;

        if should_cancel() {
            debug!("cancelled before the first iteration");
            return Err(Error::Cancelled { iterations: 0 });
        }

        let mut centroids = initial;
        let mut assignment = assign_clusters(buffer, &centroids)?;
        let mut iterations = 0;
        let mut empty_clusters = 0;

        loop {
            let update = update_centroids(buffer, &assignment, &centroids, empty_cluster, rng)?;
            iterations += 1;
            empty_clusters += update.empty.len();

            if tracing::enabled!(Level::DEBUG) {
                let inertia = inertia(buffer, &assignment, &update.centroids)?;
                debug!(
                    iteration = iterations,
                    shift = max_shift(&centroids, &update.centroids),
                    inertia,
                    empty = update.empty.len(),
                    "updated centroids"
                );
            }

            if has_converged(&centroids, &update.centroids, threshold)? {
                info!(iterations, k = centroids.len(), "converged");
                return self.finish(
                    buffer,
                    update.centroids,
                    assignment,
                    iterations,
                    true,
                    empty_clusters,
                );
            }
            centroids = update.centroids;

            if iterations >= max_iterations {
                warn!(iterations, "no convergence within the iteration cap");
                let best_effort =
                    self.finish(buffer, centroids, assignment, iterations, false, empty_clusters)?;
                return Err(Error::NonConvergence {
                    iterations,
                    best_effort: Box::new(best_effort),
                });
            }

            if should_cancel() {
                debug!(iterations, "cancelled");
                return Err(Error::Cancelled { iterations });
            }

            assignment = assign_clusters(buffer, &centroids)?;
        }
    }

    fn finish(
        &self,
        buffer: &PixelBuffer,
        centroids: CentroidSet,
        assignment: Assignment,
        iterations: usize,
        converged: bool,
        empty_clusters: usize,
    ) -> Result<Quantization> {
        let output = reconstruct(buffer, &assignment, &centroids)?;
        let inertia = inertia(buffer, &assignment, &centroids)?;
        Ok(Quantization {
            centroids,
            assignment,
            iterations,
            converged,
            empty_clusters,
            inertia,
            output,
        })
    }
}
