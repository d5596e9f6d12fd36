//! Truncated GEM(mean, scale) distribution over tree levels.
//!
//! A token stops at level `l` with probability
//! `(m π + n_l) / (π + n_{≥l})` after passing every shallower level with
//! `((1 - m) π + n_{>j}) / (π + n_{≥j})`; the deepest level takes the
//! remaining stick.

use crate::error::{Result, SamplerError};
use serde::{Deserialize, Serialize};
use special::Beta as SpecialBeta;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TruncatedStickBreaking {
    counts: Vec<u32>,
    mean: f64,
    scale: f64,
}

impl TruncatedStickBreaking {
    pub fn new(num_levels: usize, mean: f64, scale: f64) -> Self {
        Self {
            counts: vec![0; num_levels],
            mean,
            scale,
        }
    }

    pub fn num_levels(&self) -> usize {
        self.counts.len()
    }

    pub fn count(&self, level: usize) -> u32 {
        self.counts[level]
    }

    pub fn counts(&self) -> &[u32] {
        &self.counts
    }

    pub fn count_sum(&self) -> u32 {
        self.counts.iter().sum()
    }

    pub fn mean(&self) -> f64 {
        self.mean
    }

    pub fn scale(&self) -> f64 {
        self.scale
    }

    pub fn set_parameters(&mut self, mean: f64, scale: f64) {
        self.mean = mean;
        self.scale = scale;
    }

    pub fn increment(&mut self, level: usize) -> Result<()> {
        self.change_count(level, 1)
    }

    pub fn decrement(&mut self, level: usize) -> Result<()> {
        self.change_count(level, -1)
    }

    pub fn change_count(&mut self, level: usize, delta: i64) -> Result<()> {
        let updated = self
            .counts
            .get(level)
            .map(|&c| c as i64 + delta)
            .ok_or_else(|| SamplerError::InvalidState(format!("no level {}", level)))?;
        if updated < 0 {
            return Err(SamplerError::InvalidState(format!(
                "level {} count would become {}",
                level, updated
            )));
        }
        self.counts[level] = updated as u32;
        Ok(())
    }

    pub fn increase_counts(&mut self, level_counts: &[u32]) -> Result<()> {
        for (l, &n) in level_counts.iter().enumerate() {
            self.change_count(l, n as i64)?;
        }
        Ok(())
    }

    pub fn decrease_counts(&mut self, level_counts: &[u32]) -> Result<()> {
        for (l, &n) in level_counts.iter().enumerate() {
            self.change_count(l, -(n as i64))?;
        }
        Ok(())
    }

    /// Predictive log probability that the next token stops at `level`
    pub fn log_prob(&self, level: usize) -> f64 {
        let last = self.counts.len() - 1;
        let (stop, go) = (self.mean * self.scale, (1.0 - self.mean) * self.scale);

        let mut at_or_below: u32 = self.counts.iter().sum();
        let mut lp = 0.0;
        for j in 0..level.min(last) {
            let below = at_or_below - self.counts[j];
            lp += ((go + below as f64) / (self.scale + at_or_below as f64)).ln();
            at_or_below = below;
        }
        if level < last {
            lp += ((stop + self.counts[level] as f64) / (self.scale + at_or_below as f64)).ln();
        }
        lp
    }

    /// Log probability of a batch of new tokens with per-level counts
    /// `level_counts`, given the tokens already recorded here.
    pub fn log_prob_counts(&self, level_counts: &[u32]) -> f64 {
        self.beta_bernoulli(level_counts, &self.counts)
    }

    /// Log probability of the recorded counts under an empty stick
    pub fn log_likelihood(&self) -> f64 {
        let empty = vec![0; self.counts.len()];
        self.beta_bernoulli(&self.counts, &empty)
    }

    /// Product over levels of Beta-Bernoulli sequence probabilities:
    /// `new` stop-or-go outcomes on top of `base` outcomes.
    fn beta_bernoulli(&self, new: &[u32], base: &[u32]) -> f64 {
        let last = self.counts.len() - 1;
        let (stop, go) = (self.mean * self.scale, (1.0 - self.mean) * self.scale);

        let mut new_below: u32 = new.iter().sum();
        let mut base_below: u32 = base.iter().sum();
        let mut lp = 0.0;
        for j in 0..last {
            new_below -= new[j];
            base_below -= base[j];
            if new[j] == 0 && new_below == 0 {
                break;
            }
            let a = stop + base[j] as f64;
            let b = go + base_below as f64;
            lp += (a + new[j] as f64).ln_beta(b + new_below as f64) - a.ln_beta(b);
        }
        lp
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_levels_normalize() {
        let mut stick = TruncatedStickBreaking::new(4, 0.3, 50.0);
        for (l, n) in [(0, 5), (1, 2), (3, 7)] {
            stick.change_count(l, n).unwrap();
        }
        let total: f64 = (0..4).map(|l| stick.log_prob(l).exp()).sum();
        assert_abs_diff_eq!(total, 1.0, epsilon = 1e-12);

        let empty = TruncatedStickBreaking::new(1, 0.3, 50.0);
        assert_abs_diff_eq!(empty.log_prob(0), 0.0);
    }

    #[test]
    fn test_batch_equals_sequential() {
        let mut stick = TruncatedStickBreaking::new(3, 0.4, 10.0);
        stick.increase_counts(&[2, 1, 0]).unwrap();

        let batch = [1, 0, 2];
        let joint = stick.log_prob_counts(&batch);

        let mut tmp = stick.clone();
        let mut seq = 0.0;
        for (l, &n) in batch.iter().enumerate() {
            for _ in 0..n {
                seq += tmp.log_prob(l);
                tmp.increment(l).unwrap();
            }
        }
        assert_abs_diff_eq!(joint, seq, epsilon = 1e-10);

        let own = TruncatedStickBreaking::new(3, 0.4, 10.0).log_prob_counts(&[2, 1, 0]);
        assert_abs_diff_eq!(stick.log_likelihood(), own, epsilon = 1e-12);
    }

    #[test]
    fn test_no_negative_counts() {
        let mut stick = TruncatedStickBreaking::new(2, 0.5, 1.0);
        assert!(stick.decrement(0).is_err());
        assert!(stick.increment(2).is_err());
        stick.increase_counts(&[1, 1]).unwrap();
        assert!(stick.decrease_counts(&[2, 0]).is_err());
    }
}
