use rand::Rng;

const MAX_SHRINK: usize = 200;

/// Univariate slice sampler with stepping out and shrinkage
/// (Neal, 2003).
#[derive(Clone, Copy, Debug)]
pub struct SliceSampler {
    /// Initial bracket width
    pub width: f64,
    /// Bound on stepping-out expansions
    pub max_steps: usize,
}

impl Default for SliceSampler {
    fn default() -> Self {
        Self::new(1.0, 10)
    }
}

impl SliceSampler {
    /// Sampler with bracket `width` and at most `max_steps` expansions
    pub fn new(width: f64, max_steps: usize) -> Self {
        Self { width, max_steps }
    }

    /// One transition from `current`. Returns `(new_value, new_lnpdf)`.
    ///
    /// - `lnpdf`: unnormalized log density; `-inf` outside the support
    /// - `cur_lnpdf`: cached log density at `current`
    pub fn step(
        &self,
        current: f64,
        lnpdf: &impl Fn(f64) -> f64,
        cur_lnpdf: f64,
        rng: &mut impl Rng,
    ) -> (f64, f64) {
        if !cur_lnpdf.is_finite() {
            return (current, cur_lnpdf);
        }
        let width = self.width;

        // 1. vertical level defining the slice
        let u: f64 = rng.random();
        let hh = u.ln() + cur_lnpdf;

        // 2. randomly positioned bracket, then step out
        let mut lo = current - width * rng.random::<f64>();
        let mut hi = lo + width;
        let mut j = (self.max_steps as f64 * rng.random::<f64>()).floor() as usize;
        let mut k = self.max_steps.saturating_sub(1).saturating_sub(j);

        while j > 0 && lnpdf(lo) > hh {
            lo -= width;
            j -= 1;
        }
        while k > 0 && lnpdf(hi) > hh {
            hi += width;
            k -= 1;
        }

        // 3. shrink the bracket towards the current point
        for _ in 0..MAX_SHRINK {
            let proposal = rng.random_range(lo..hi);
            let new_lnpdf = lnpdf(proposal);

            if new_lnpdf > hh {
                return (proposal, new_lnpdf);
            }

            if proposal < current {
                lo = proposal;
            } else {
                hi = proposal;
            }
            if hi - lo <= f64::EPSILON * current.abs().max(1.0) {
                break;
            }
        }
        (current, cur_lnpdf)
    }

    /// One transition from `current`, evaluating its log density first
    pub fn sample(&self, current: f64, lnpdf: &impl Fn(f64) -> f64, rng: &mut impl Rng) -> f64 {
        self.step(current, lnpdf, lnpdf(current), rng).0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::McmcChain;
    use rand::rngs::SmallRng;
    use rand::SeedableRng;

    fn run_chain(
        sampler: &SliceSampler,
        lnpdf: &impl Fn(f64) -> f64,
        init: f64,
        warmup: usize,
        n_samples: usize,
        seed: u64,
    ) -> McmcChain<[f64; 1]> {
        let mut rng = SmallRng::seed_from_u64(seed);
        let mut chain = McmcChain::new();
        let (mut x, mut lp) = (init, lnpdf(init));
        for i in 0..(warmup + n_samples) {
            (x, lp) = sampler.step(x, lnpdf, lp, &mut rng);
            if i >= warmup {
                chain.push([x], lp);
            }
        }
        chain
    }

    /// Gaussian target with mean 1.5 and variance 0.25
    #[test]
    fn test_gaussian_target() {
        let lnpdf = |x: f64| -0.5 * (x - 1.5) * (x - 1.5) / 0.25;
        let chain = run_chain(&SliceSampler::new(1.0, 10), &lnpdf, 0.0, 500, 10_000, 123);
        let mean = chain.posterior_mean();
        let var = chain.posterior_variance();
        assert!((mean[0] - 1.5).abs() < 0.05, "mean: {}", mean[0]);
        assert!((var[0] - 0.25).abs() < 0.05, "var: {}", var[0]);
    }

    /// Exponential(2) restricted to x > 0
    #[test]
    fn test_bounded_support() {
        let lnpdf = |x: f64| if x > 0.0 { -2.0 * x } else { f64::NEG_INFINITY };
        let chain = run_chain(&SliceSampler::default(), &lnpdf, 1.0, 500, 10_000, 42);
        assert!(chain.samples.iter().all(|s| s[0] > 0.0));
        let mean = chain.posterior_mean();
        assert!((mean[0] - 0.5).abs() < 0.05, "mean: {}", mean[0]);
    }

    #[test]
    fn test_outside_support_is_fixed_point() {
        let mut rng = SmallRng::seed_from_u64(1);
        let lnpdf = |_: f64| f64::NEG_INFINITY;
        let (x, lp) = SliceSampler::default().step(3.0, &lnpdf, f64::NEG_INFINITY, &mut rng);
        assert_eq!(x, 3.0);
        assert_eq!(lp, f64::NEG_INFINITY);
        assert_eq!(SliceSampler::default().sample(3.0, &lnpdf, &mut rng), 3.0);
    }
}
