use crate::traits::ChainSample;

/// Collected MCMC samples with log-likelihoods.
#[derive(Clone, Debug)]
pub struct McmcChain<P: ChainSample> {
    /// Recorded samples in the order they were drawn
    pub samples: Vec<P>,
    /// Log density paired with each sample
    pub log_likelihoods: Vec<f64>,
}

impl<P: ChainSample> Default for McmcChain<P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P: ChainSample> McmcChain<P> {
    /// An empty chain
    pub fn new() -> Self {
        Self {
            samples: vec![],
            log_likelihoods: vec![],
        }
    }

    /// Record one sample
    pub fn push(&mut self, sample: P, log_likelihood: f64) {
        self.samples.push(sample);
        self.log_likelihoods.push(log_likelihood);
    }

    /// Append every sample of another chain
    pub fn extend(&mut self, other: McmcChain<P>) {
        self.samples.extend(other.samples);
        self.log_likelihoods.extend(other.log_likelihoods);
    }

    /// Number of recorded samples
    pub fn n_samples(&self) -> usize {
        self.samples.len()
    }

    /// Element-wise posterior mean across samples.
    pub fn posterior_mean(&self) -> Vec<f64> {
        let n = self.n_samples();
        if n == 0 {
            return vec![];
        }
        let d = self.samples[0].dim();
        let mut mean = vec![0.0; d];
        for sample in &self.samples {
            for (m, &v) in mean.iter_mut().zip(sample.as_slice()) {
                *m += v;
            }
        }
        let inv_n = 1.0 / n as f64;
        for m in &mut mean {
            *m *= inv_n;
        }
        mean
    }

    /// Element-wise posterior variance across samples.
    pub fn posterior_variance(&self) -> Vec<f64> {
        let n = self.n_samples();
        if n < 2 {
            return vec![];
        }
        let mean = self.posterior_mean();
        let mut var = vec![0.0; mean.len()];
        for sample in &self.samples {
            for ((v, &x), &m) in var.iter_mut().zip(sample.as_slice()).zip(&mean) {
                *v += (x - m) * (x - m);
            }
        }
        let inv = 1.0 / (n - 1) as f64;
        for v in &mut var {
            *v *= inv;
        }
        var
    }

    /// Element-wise quantile (0 <= q <= 1) across samples.
    pub fn quantile(&self, q: f64) -> Vec<f64> {
        let n = self.n_samples();
        if n == 0 {
            return vec![];
        }
        let d = self.samples[0].dim();

        let mut vals = vec![Vec::with_capacity(n); d];
        for sample in &self.samples {
            for (i, &x) in sample.as_slice().iter().enumerate() {
                vals[i].push(x);
            }
        }

        vals.into_iter()
            .map(|mut col| {
                col.sort_unstable_by(f64::total_cmp);
                let idx = (q * (n - 1) as f64).clamp(0.0, (n - 1) as f64);
                let lo = idx.floor() as usize;
                let hi = idx.ceil() as usize;
                if lo == hi {
                    col[lo]
                } else {
                    let frac = idx - lo as f64;
                    col[lo] * (1.0 - frac) + col[hi] * frac
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_summaries() {
        let mut chain = McmcChain::new();
        for i in 0..5 {
            chain.push(vec![i as f64, 2.0 * i as f64], 0.0);
        }
        let mean = chain.posterior_mean();
        assert_abs_diff_eq!(mean[0], 2.0);
        assert_abs_diff_eq!(mean[1], 4.0);

        let var = chain.posterior_variance();
        assert_abs_diff_eq!(var[0], 2.5);
        assert_abs_diff_eq!(var[1], 10.0);

        let median = chain.quantile(0.5);
        assert_abs_diff_eq!(median[0], 2.0);
        let q = chain.quantile(0.125);
        assert_abs_diff_eq!(q[0], 0.5);
    }

    #[test]
    fn test_empty_chain() {
        let chain: McmcChain<Vec<f64>> = McmcChain::new();
        assert!(chain.posterior_mean().is_empty());
        assert!(chain.posterior_variance().is_empty());
        assert!(chain.quantile(0.5).is_empty());
    }
}
