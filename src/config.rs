use rand::{SeedableRng, rngs::StdRng};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// What the updater does with a centroid that received no pixels.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmptyClusterPolicy {
    /// Keep the centroid where it was.
    #[default]
    Retain,
    /// Move the centroid onto a uniformly random pixel.
    Reseed,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct Config {
    /// Number of clusters / output colors.
    pub k: usize,
    /// A run has converged once no centroid moves further than this.
    pub threshold: f64,
    pub max_iterations: usize,
    /// Seed for centroid initialization, runs are not reproducible without it.
    pub seed: Option<u64>,
    pub empty_cluster: EmptyClusterPolicy,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            k: 8,
            threshold: 1.,
            max_iterations: 100,
            seed: None,
            empty_cluster: EmptyClusterPolicy::Retain,
        }
    }
}

impl Config {
    pub fn with_k(k: usize) -> Self {
        Self {
            k,
            ..Self::default()
        }
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| Error::invalid(format!("malformed config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.k == 0 {
            return Err(Error::invalid("k must be at least 1"));
        }
        if self.max_iterations == 0 {
            return Err(Error::invalid("max_iterations must be at least 1"));
        }
        if !self.threshold.is_finite() || self.threshold < 0. {
            return Err(Error::invalid(format!(
                "threshold must be a finite, non-negative number, got {}",
                self.threshold
            )));
        }
        Ok(())
    }

    pub fn rng(&self) -> StdRng {
        match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        }
    }
}
