use crate::state::SamplerState;
use mcmc_util::log_normal_density;

/// Additive pieces of the joint log-likelihood of a sampler state
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct LogLikelihoodTerms {
    /// Dirichlet-multinomial marginals of every node
    pub words: f64,
    /// nCRP (Ewens) probability of the tree's customer splits
    pub tree: f64,
    /// stick-breaking likelihood of every table's level counts
    pub sticks: f64,
    /// Gaussian prior of node regression coefficients
    pub regression: f64,
    /// response likelihood; zero without responses
    pub responses: f64,
    /// Ewens probability of each restaurant's seating
    pub restaurants: f64,
}

impl LogLikelihoodTerms {
    pub fn compute(state: &SamplerState, responses: Option<&[f64]>) -> Self {
        let tree = &state.tree;
        let sticks = state
            .restaurants
            .iter()
            .flat_map(|r| r.tables())
            .map(|t| t.stick().log_likelihood())
            .sum();
        let restaurants = state
            .restaurants
            .iter()
            .map(|r| r.joint_assignment_log_probability(state.hyper.alpha))
            .sum();

        Self {
            words: tree.word_log_likelihood(),
            tree: tree.tree_log_prior(),
            sticks,
            regression: tree.regression_log_prior(),
            responses: responses.map_or(0.0, |y| response_log_likelihood(state, y, state.hyper.rho)),
            restaurants,
        }
    }

    pub fn total(&self) -> f64 {
        self.words + self.tree + self.sticks + self.regression + self.responses + self.restaurants
    }
}

/// `Σ_d log N(y_d | prediction_d, rho)`
pub fn response_log_likelihood(state: &SamplerState, responses: &[f64], rho: f64) -> f64 {
    let sd = rho.sqrt();
    state
        .predictions()
        .iter()
        .zip(responses)
        .map(|(&mean, &y)| log_normal_density(y, mean, sd))
        .sum()
}

/// Mean squared error and Pearson correlation of predictions
pub fn regression_fit(truth: &[f64], predicted: &[f64]) -> (f64, f64) {
    let n = truth.len().min(predicted.len());
    if n == 0 {
        return (0.0, 0.0);
    }
    let nf = n as f64;
    let mse = truth
        .iter()
        .zip(predicted)
        .map(|(y, p)| (y - p) * (y - p))
        .sum::<f64>()
        / nf;

    let mean_y = truth[..n].iter().sum::<f64>() / nf;
    let mean_p = predicted[..n].iter().sum::<f64>() / nf;
    let (mut sxy, mut sxx, mut syy) = (0.0, 0.0, 0.0);
    for (y, p) in truth.iter().zip(predicted) {
        let (dy, dp) = (y - mean_y, p - mean_p);
        sxy += dy * dp;
        sxx += dp * dp;
        syy += dy * dy;
    }
    let denom = (sxx * syy).sqrt();
    let corr = if denom > 0.0 { sxy / denom } else { 0.0 };
    (mse, corr)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_regression_fit() {
        let truth = [1.0, 2.0, 3.0];
        let (mse, corr) = regression_fit(&truth, &[1.0, 2.0, 3.0]);
        assert_abs_diff_eq!(mse, 0.0);
        assert_abs_diff_eq!(corr, 1.0, epsilon = 1e-12);

        let (mse, corr) = regression_fit(&truth, &[3.0, 2.0, 1.0]);
        assert_abs_diff_eq!(mse, 8.0 / 3.0, epsilon = 1e-12);
        assert_abs_diff_eq!(corr, -1.0, epsilon = 1e-12);

        let (_, corr) = regression_fit(&truth, &[2.0, 2.0, 2.0]);
        assert_eq!(corr, 0.0);
    }
}
