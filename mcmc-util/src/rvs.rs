use rand::Rng;
use rand_distr::{Distribution, Gamma, StandardNormal};

const LN_SQRT_2PI: f64 = 0.918_938_533_204_672_7;

/// Numerically stable `log(Σ exp(x_i))`.
///
/// Returns negative infinity for an empty slice or when every entry is
/// negative infinity.
pub fn log_sum_exp(log_values: &[f64]) -> f64 {
    let max = log_values.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    if !max.is_finite() {
        return max;
    }
    let total: f64 = log_values.iter().map(|&x| (x - max).exp()).sum();
    max + total.ln()
}

/// Subtract the maximum, exponentiate and normalize.
///
/// If no entry is finite the result is uniform.
pub fn normalize_log_probs(log_probs: &[f64]) -> Vec<f64> {
    let max = log_probs.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    let weights: Vec<f64> = log_probs.iter().map(|lp| (lp - max).exp()).collect();
    let total: f64 = weights.iter().sum();

    if total <= 0.0 || !total.is_finite() {
        let n = log_probs.len().max(1) as f64;
        return vec![1.0 / n; log_probs.len()];
    }
    weights.into_iter().map(|w| w / total).collect()
}

/// Draw an index from `categorical(softmax(log_probs))`.
///
/// The log weights need not be normalized. `log_probs` must not be empty.
pub fn sample_categorical_log<R: Rng + ?Sized>(log_probs: &[f64], rng: &mut R) -> usize {
    let max = log_probs.iter().cloned().fold(f64::NEG_INFINITY, f64::max);

    let weights: Vec<f64> = log_probs.iter().map(|lp| (lp - max).exp()).collect();
    let total: f64 = weights.iter().sum();

    if total <= 0.0 || !total.is_finite() {
        // Fallback: uniform
        return rng.random_range(0..log_probs.len());
    }

    let u: f64 = rng.random::<f64>() * total;
    let mut cum = 0.0;
    for (i, &w) in weights.iter().enumerate() {
        cum += w;
        if cum >= u {
            return i;
        }
    }

    weights.len() - 1
}

/// Gaussian log density `log N(x | mean, sd²)`
pub fn log_normal_density(x: f64, mean: f64, sd: f64) -> f64 {
    let z = (x - mean) / sd;
    -0.5 * z * z - sd.ln() - LN_SQRT_2PI
}

/// One draw from `N(mean, variance)`
pub fn sample_gaussian<R: Rng + ?Sized>(mean: f64, variance: f64, rng: &mut R) -> f64 {
    let z: f64 = StandardNormal.sample(rng);
    mean + variance.max(0.0).sqrt() * z
}

/// One draw from `Dirichlet(alpha)` via normalized Gamma variates.
///
/// Components are floored at the smallest positive normal `f64` so that
/// their logarithms stay finite.
pub fn sample_dirichlet<R: Rng + ?Sized>(alpha: &[f64], rng: &mut R) -> Vec<f64> {
    let mut draws: Vec<f64> = alpha
        .iter()
        .map(|&a| match Gamma::new(a, 1.0) {
            Ok(gamma) if a > 0.0 => gamma.sample(rng),
            _ => 0.0,
        })
        .collect();

    let total: f64 = draws.iter().sum();
    if total <= 0.0 || !total.is_finite() {
        let alpha_sum: f64 = alpha.iter().map(|a| a.max(0.0)).sum();
        draws = if alpha_sum > 0.0 {
            alpha.iter().map(|a| a.max(0.0) / alpha_sum).collect()
        } else {
            vec![1.0 / alpha.len().max(1) as f64; alpha.len()]
        };
    }

    for x in draws.iter_mut() {
        *x = x.max(f64::MIN_POSITIVE);
    }
    let total: f64 = draws.iter().sum();
    draws.iter_mut().for_each(|x| *x /= total);
    draws
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use rand::rngs::SmallRng;
    use rand::SeedableRng;

    #[test]
    fn test_log_sum_exp() {
        let xs = [0.1f64.ln(), 0.2f64.ln(), 0.7f64.ln()];
        assert_abs_diff_eq!(log_sum_exp(&xs), 0.0, epsilon = 1e-12);
        assert_eq!(log_sum_exp(&[]), f64::NEG_INFINITY);
        assert_eq!(log_sum_exp(&[f64::NEG_INFINITY, -2.0]), -2.0);
    }

    #[test]
    fn test_normalize_large_offsets() {
        let probs = normalize_log_probs(&[-1000.0, -1001.0, -1002.0]);
        let total: f64 = probs.iter().sum();
        assert_abs_diff_eq!(total, 1.0, epsilon = 1e-12);
        assert!(probs[0] > probs[1] && probs[1] > probs[2]);
    }

    #[test]
    fn test_categorical_frequencies() {
        let mut rng = SmallRng::seed_from_u64(7);
        let log_probs = [0.5f64.ln(), 0.25f64.ln(), 0.25f64.ln()];
        let mut counts = [0usize; 3];
        let n = 20_000;
        for _ in 0..n {
            counts[sample_categorical_log(&log_probs, &mut rng)] += 1;
        }
        assert_abs_diff_eq!(counts[0] as f64 / n as f64, 0.5, epsilon = 0.02);
        assert_abs_diff_eq!(counts[1] as f64 / n as f64, 0.25, epsilon = 0.02);
    }

    #[test]
    fn test_gaussian_density() {
        assert_abs_diff_eq!(
            log_normal_density(0.0, 0.0, 1.0),
            -LN_SQRT_2PI,
            epsilon = 1e-15
        );
        assert_abs_diff_eq!(
            log_normal_density(3.0, 1.0, 2.0),
            -0.5 - 2f64.ln() - LN_SQRT_2PI,
            epsilon = 1e-12
        );
    }

    #[test]
    fn test_dirichlet_on_simplex() {
        let mut rng = SmallRng::seed_from_u64(3);
        for _ in 0..100 {
            let p = sample_dirichlet(&[1e-3, 2.0, 0.0, 5.0], &mut rng);
            assert_eq!(p.len(), 4);
            assert!(p.iter().all(|&x| x > 0.0));
            assert_abs_diff_eq!(p.iter().sum::<f64>(), 1.0, epsilon = 1e-12);
        }
    }
}
