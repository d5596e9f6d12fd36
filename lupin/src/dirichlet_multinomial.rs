//! Collapsed Dirichlet-multinomial count model (Pólya urn).
//!
//! Every likelihood the sampler evaluates goes through this type: a
//! per-symbol occurrence count over a fixed alphabet together with a
//! symmetric Dirichlet prior of total mass `concentration`.

use crate::error::{Result, SamplerError};
use serde::{Deserialize, Serialize};
use special::Gamma as SpecialGamma;
use std::collections::BTreeMap;

/// Sparse multiset of symbols: symbol -> number of occurrences
pub type SymbolCounts = BTreeMap<usize, u32>;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DirMult {
    counts: Vec<u32>,
    count_sum: u32,
    concentration: f64,
}

impl DirMult {
    /// Empty counts under a uniform center
    pub fn uniform(dim: usize, concentration: f64) -> Self {
        Self {
            counts: vec![0; dim],
            count_sum: 0,
            concentration,
        }
    }

    pub fn dim(&self) -> usize {
        self.counts.len()
    }

    pub fn concentration(&self) -> f64 {
        self.concentration
    }

    pub fn count(&self, symbol: usize) -> u32 {
        self.counts[symbol]
    }

    pub fn counts(&self) -> &[u32] {
        &self.counts
    }

    pub fn count_sum(&self) -> u32 {
        self.count_sum
    }

    /// Same prior, all counts zero
    pub fn cleared(&self) -> Self {
        Self {
            counts: vec![0; self.counts.len()],
            count_sum: 0,
            concentration: self.concentration,
        }
    }

    /// Prior mass `concentration / dim` of every symbol
    pub fn prior(&self) -> f64 {
        self.concentration / self.counts.len() as f64
    }

    pub fn increment(&mut self, symbol: usize) -> Result<()> {
        self.change_count(symbol, 1)
    }

    pub fn decrement(&mut self, symbol: usize) -> Result<()> {
        self.change_count(symbol, -1)
    }

    /// Adjust the count of `symbol` by `delta`; counts never go negative.
    pub fn change_count(&mut self, symbol: usize, delta: i64) -> Result<()> {
        if symbol >= self.counts.len() {
            return Err(SamplerError::InvalidState(format!(
                "symbol {} outside alphabet of size {}",
                symbol,
                self.counts.len()
            )));
        }
        let updated = self.counts[symbol] as i64 + delta;
        if updated < 0 {
            return Err(SamplerError::InvalidState(format!(
                "count of symbol {} would become {}",
                symbol, updated
            )));
        }
        self.counts[symbol] = updated as u32;
        self.count_sum = (self.count_sum as i64 + delta) as u32;
        Ok(())
    }

    pub fn add_observations(&mut self, obs: &SymbolCounts) -> Result<()> {
        for (&symbol, &n) in obs {
            self.change_count(symbol, n as i64)?;
        }
        Ok(())
    }

    pub fn remove_observations(&mut self, obs: &SymbolCounts) -> Result<()> {
        for (&symbol, &n) in obs {
            self.change_count(symbol, -(n as i64))?;
        }
        Ok(())
    }

    /// Single-symbol predictive probability
    /// `log((n_k + a / V) / (N + a))`
    pub fn point_log_likelihood(&self, symbol: usize) -> f64 {
        ((self.counts[symbol] as f64 + self.prior())
            / (self.count_sum as f64 + self.concentration))
            .ln()
    }

    /// Log probability of drawing `obs` one after another from the urn
    pub fn joint_log_likelihood(&self, obs: &SymbolCounts) -> f64 {
        sequential_log_likelihood(
            obs,
            self.concentration,
            self.count_sum,
            |k| self.counts[k],
            |_| 1.0 / self.counts.len() as f64,
        )
    }

    /// Closed-form log marginal of the counts themselves
    pub fn log_marginal(&self) -> f64 {
        let a = self.concentration;
        let mut llh = a.ln_gamma().0 - (a + self.count_sum as f64).ln_gamma().0;
        for (k, &n) in self.counts.iter().enumerate() {
            if n > 0 {
                let ak = self.prior();
                llh += (ak + n as f64).ln_gamma().0 - ak.ln_gamma().0;
            }
        }
        llh
    }

    /// Smoothed distribution `(n_k + a / V) / (N + a)`
    pub fn posterior_mean(&self) -> Vec<f64> {
        let denom = self.count_sum as f64 + self.concentration;
        (0..self.dim())
            .map(|k| (self.counts[k] as f64 + self.prior()) / denom)
            .collect()
    }
}

/// Urn probability of `obs` under a prior with no data, centered at
/// `center` (uniform when `None`).
pub fn prior_log_likelihood(
    obs: &SymbolCounts,
    concentration: f64,
    dim: usize,
    center: Option<&[f64]>,
) -> f64 {
    let uniform = 1.0 / dim as f64;
    sequential_log_likelihood(
        obs,
        concentration,
        0,
        |_| 0,
        |k| center.map_or(uniform, |c| c[k]),
    )
}

fn sequential_log_likelihood(
    obs: &SymbolCounts,
    concentration: f64,
    count_sum: u32,
    count: impl Fn(usize) -> u32,
    center: impl Fn(usize) -> f64,
) -> f64 {
    let mut llh = 0.0;
    let mut j = 0u32;
    for (&k, &n) in obs {
        let base = concentration * center(k) + count(k) as f64;
        for i in 0..n {
            llh += (base + i as f64).ln() - (concentration + (count_sum + j) as f64).ln();
            j += 1;
        }
    }
    llh
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn obs(pairs: &[(usize, u32)]) -> SymbolCounts {
        pairs.iter().cloned().collect()
    }

    #[test]
    fn test_counts_never_negative() {
        let mut dm = DirMult::uniform(4, 2.0);
        dm.increment(1).unwrap();
        dm.decrement(1).unwrap();
        assert!(matches!(dm.decrement(1), Err(SamplerError::InvalidState(_))));
        assert_eq!(dm.count(1), 0);
        assert_eq!(dm.count_sum(), 0);
        assert!(dm.increment(9).is_err());
    }

    #[test]
    fn test_point_likelihood() {
        let mut dm = DirMult::uniform(4, 2.0);
        dm.change_count(0, 3).unwrap();
        // (3 + 0.5) / (3 + 2)
        assert_abs_diff_eq!(dm.point_log_likelihood(0), (3.5f64 / 5.0).ln(), epsilon = 1e-12);
        assert_abs_diff_eq!(dm.point_log_likelihood(2), (0.5f64 / 5.0).ln(), epsilon = 1e-12);
        let total: f64 = dm.posterior_mean().iter().sum();
        assert_abs_diff_eq!(total, 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_joint_matches_sequential_updates() {
        let mut dm = DirMult::uniform(3, 3.0);
        dm.change_count(2, 4).unwrap();
        let o = obs(&[(0, 2), (2, 1)]);
        let joint = dm.joint_log_likelihood(&o);

        let mut tmp = dm.clone();
        let mut seq = 0.0;
        for (&k, &n) in &o {
            for _ in 0..n {
                seq += tmp.point_log_likelihood(k);
                tmp.increment(k).unwrap();
            }
        }
        assert_abs_diff_eq!(joint, seq, epsilon = 1e-12);
    }

    #[test]
    fn test_marginal_matches_joint_from_empty() {
        let mut dm = DirMult::uniform(5, 1.5);
        let o = obs(&[(0, 3), (1, 1), (4, 2)]);
        let from_empty = dm.joint_log_likelihood(&o);
        dm.add_observations(&o).unwrap();
        assert_abs_diff_eq!(dm.log_marginal(), from_empty, epsilon = 1e-10);
        assert_abs_diff_eq!(
            prior_log_likelihood(&o, 1.5, 5, None),
            from_empty,
            epsilon = 1e-12
        );
        dm.remove_observations(&o).unwrap();
        assert_eq!(dm, DirMult::uniform(5, 1.5));
    }
}
