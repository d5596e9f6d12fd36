use crate::error::{Result, SamplerError};
use crate::topic_tree::TreePriors;
use serde::{Deserialize, Serialize};
use std::path::Path;

pub use crate::topic_tree::PathAssumption;

/// Global scalar hyperparameters; the ones slice sampling may update
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Hyperparameters {
    /// restaurant (sentence -> table) concentration
    pub alpha: f64,
    /// response noise variance
    pub rho: f64,
    /// GEM mean of the level distribution
    pub gem_mean: f64,
    /// GEM scale of the level distribution
    pub gem_scale: f64,
    /// prior mean of lexical weights
    pub tau_mean: f64,
    /// prior variance of lexical weights
    pub tau_scale: f64,
}

impl Default for Hyperparameters {
    fn default() -> Self {
        Self {
            alpha: 1.0,
            rho: 1.0,
            gem_mean: 0.3,
            gem_scale: 50.0,
            tau_mean: 0.0,
            tau_scale: 1.0,
        }
    }
}

impl Hyperparameters {
    pub const NAMES: [&'static str; 6] = ["alpha", "rho", "gem_mean", "gem_scale", "tau_mean", "tau_scale"];

    pub fn to_array(&self) -> [f64; 6] {
        [
            self.alpha,
            self.rho,
            self.gem_mean,
            self.gem_scale,
            self.tau_mean,
            self.tau_scale,
        ]
    }

    pub fn from_array(x: [f64; 6]) -> Self {
        Self {
            alpha: x[0],
            rho: x[1],
            gem_mean: x[2],
            gem_scale: x[3],
            tau_mean: x[4],
            tau_scale: x[5],
        }
    }

    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("alpha", self.alpha),
            ("rho", self.rho),
            ("gem_scale", self.gem_scale),
            ("tau_scale", self.tau_scale),
        ];
        for (name, x) in positive {
            if !(x > 0.0 && x.is_finite()) {
                return Err(SamplerError::Config(format!("{} must be positive, got {}", name, x)));
            }
        }
        if !(self.gem_mean > 0.0 && self.gem_mean < 1.0) {
            return Err(SamplerError::Config(format!(
                "gem_mean must lie in (0, 1), got {}",
                self.gem_mean
            )));
        }
        if !self.tau_mean.is_finite() {
            return Err(SamplerError::Config("tau_mean must be finite".into()));
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SamplerConfig {
    /// tree height L
    pub height: usize,
    /// Dirichlet concentration per symbol at each level (scaled by V)
    pub betas: Vec<f64>,
    /// nCRP concentration at each internal level
    pub gammas: Vec<f64>,
    /// prior means of node regression coefficients
    pub mus: Vec<f64>,
    /// prior variances of node regression coefficients
    pub sigmas: Vec<f64>,
    pub hyper: Hyperparameters,
    /// L1 strength of the lexical regression; 0 disables lexical weights
    pub lexical_l1: f64,
    pub burn_in: usize,
    pub max_iter: usize,
    pub lag: usize,
    pub path_assumption: PathAssumption,
    pub optimize_hyperparameters: bool,
    /// validate every k iterations; 0 only at start and end
    pub validate_every: usize,
    pub seed: u64,
}

impl SamplerConfig {
    /// Default configuration for a tree of the given height.
    ///
    /// With L = 3 this gives betas `[1, 1/2, 1/3]`, gammas `[1, 1/2]` and
    /// sigmas `[1e-4, 0.5, 1]`; every `mus` entry is `mean_response`.
    pub fn with_height(height: usize, mean_response: f64) -> Self {
        let betas = (0..height).map(|l| 1.0 / (l + 1) as f64).collect();
        let gammas = (0..height.saturating_sub(1)).map(|l| 1.0 / (l + 1) as f64).collect();
        let sigmas = (0..height)
            .map(|l| {
                if l == 0 {
                    1e-4
                } else {
                    l as f64 / (height - 1) as f64
                }
            })
            .collect();
        Self {
            height,
            betas,
            gammas,
            mus: vec![mean_response; height],
            sigmas,
            hyper: Hyperparameters::default(),
            lexical_l1: 500.0,
            burn_in: 250,
            max_iter: 500,
            lag: 25,
            path_assumption: PathAssumption::Maximal,
            optimize_hyperparameters: false,
            validate_every: 0,
            seed: 42,
        }
    }

    pub fn validate(&self) -> Result<()> {
        let l = self.height;
        if l < 2 {
            return Err(SamplerError::Config(format!("tree height must be at least 2, got {}", l)));
        }
        let lengths = [
            ("betas", self.betas.len(), l),
            ("gammas", self.gammas.len(), l - 1),
            ("mus", self.mus.len(), l),
            ("sigmas", self.sigmas.len(), l),
        ];
        for (name, got, expected) in lengths {
            if got != expected {
                return Err(SamplerError::Config(format!(
                    "{} has {} entries, expected {}",
                    name, got, expected
                )));
            }
        }
        for (name, xs) in [("betas", &self.betas), ("gammas", &self.gammas), ("sigmas", &self.sigmas)] {
            if let Some(x) = xs.iter().find(|&&x| !(x > 0.0 && x.is_finite())) {
                return Err(SamplerError::Config(format!("{} must be positive, found {}", name, x)));
            }
        }
        if self.mus.iter().any(|x| !x.is_finite()) {
            return Err(SamplerError::Config("mus must be finite".into()));
        }
        if !(self.lexical_l1 >= 0.0 && self.lexical_l1.is_finite()) {
            return Err(SamplerError::Config(format!(
                "lexical_l1 must be non-negative, got {}",
                self.lexical_l1
            )));
        }
        if self.lag == 0 {
            return Err(SamplerError::Config("lag must be at least 1".into()));
        }
        self.hyper.validate()
    }

    pub fn tree_priors(&self) -> TreePriors {
        TreePriors {
            betas: self.betas.clone(),
            gammas: self.gammas.clone(),
            mus: self.mus.clone(),
            sigmas: self.sigmas.clone(),
        }
    }

    pub fn to_json_file(&self, path: &Path) -> Result<()> {
        let file = std::fs::File::create(path)?;
        serde_json::to_writer_pretty(std::io::BufWriter::new(file), self)?;
        Ok(())
    }

    pub fn from_json_file(path: &Path) -> Result<Self> {
        let file = std::fs::File::open(path)?;
        let config: Self = serde_json::from_reader(std::io::BufReader::new(file))
            .map_err(|e| SamplerError::Config(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SamplerConfig::with_height(3, 0.5);
        assert_eq!(config.betas, vec![1.0, 0.5, 1.0 / 3.0]);
        assert_eq!(config.gammas, vec![1.0, 0.5]);
        assert_eq!(config.sigmas, vec![1e-4, 0.5, 1.0]);
        assert_eq!(config.mus, vec![0.5; 3]);
        config.validate().unwrap();
    }

    #[test]
    fn test_rejects_bad_vectors() {
        let mut config = SamplerConfig::with_height(3, 0.0);
        config.gammas.push(1.0);
        assert!(matches!(config.validate(), Err(SamplerError::Config(_))));

        let mut config = SamplerConfig::with_height(3, 0.0);
        config.sigmas[1] = 0.0;
        assert!(config.validate().is_err());

        let mut config = SamplerConfig::with_height(3, 0.0);
        config.hyper.gem_mean = 1.0;
        assert!(config.validate().is_err());

        assert!(SamplerConfig::with_height(1, 0.0).validate().is_err());
    }

    #[test]
    fn test_json_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let mut config = SamplerConfig::with_height(4, 0.1234567890123);
        config.path_assumption = PathAssumption::Minimal;
        config.to_json_file(&path).unwrap();
        assert_eq!(SamplerConfig::from_json_file(&path).unwrap(), config);
    }
}
