//! Slice sampling of the global hyperparameters.
//!
//! Each scalar is moved in an unconstrained coordinate (log for the
//! positive ones, logit for the GEM mean, identity for the lexical prior
//! mean) under a wide Gaussian prior on that coordinate.

use crate::config::Hyperparameters;
use crate::likelihood::response_log_likelihood;
use crate::state::SamplerState;
use mcmc_util::{log_normal_density, SliceSampler};
use rand::Rng;

const PRIOR_SD: f64 = 5.0;
const SLICE: SliceSampler = SliceSampler {
    width: 1.0,
    max_steps: 20,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Transform {
    Log,
    Logit,
    Identity,
}

/// Coordinate of each entry of `Hyperparameters::to_array`
const TRANSFORMS: [Transform; 6] = [
    Transform::Log,
    Transform::Log,
    Transform::Logit,
    Transform::Log,
    Transform::Identity,
    Transform::Log,
];

impl Transform {
    fn forward(self, x: f64) -> f64 {
        match self {
            Transform::Log => x.ln(),
            Transform::Logit => (x / (1.0 - x)).ln(),
            Transform::Identity => x,
        }
    }

    fn inverse(self, u: f64) -> f64 {
        match self {
            Transform::Log => u.exp(),
            Transform::Logit => 1.0 / (1.0 + (-u).exp()),
            Transform::Identity => u,
        }
    }

    /// `log |dx/du|`
    fn log_jacobian(self, u: f64) -> f64 {
        match self {
            Transform::Log => u,
            Transform::Logit => {
                let x = self.inverse(u);
                x.ln() + (1.0 - x).ln()
            }
            Transform::Identity => 0.0,
        }
    }
}

/// Log density of the state's hyperparameter-dependent terms under
/// `hyper`: restaurant seatings (alpha), table sticks (GEM mean and
/// scale), responses (rho), and lexical weights (tau mean and scale).
pub fn hyperparameter_log_density(state: &SamplerState, responses: Option<&[f64]>, hyper: &Hyperparameters) -> f64 {
    if hyper.validate().is_err() {
        return f64::NEG_INFINITY;
    }

    let seating: f64 = state
        .restaurants
        .iter()
        .map(|r| r.joint_assignment_log_probability(hyper.alpha))
        .sum();

    let sticks: f64 = state
        .restaurants
        .iter()
        .flat_map(|r| r.tables())
        .map(|t| {
            let mut stick = t.stick().clone();
            stick.set_parameters(hyper.gem_mean, hyper.gem_scale);
            stick.log_likelihood()
        })
        .sum();

    let response = responses.map_or(0.0, |y| response_log_likelihood(state, y, hyper.rho));

    let tau_sd = hyper.tau_scale.sqrt();
    let lexical: f64 = state
        .lexical_weights
        .values()
        .map(|&w| log_normal_density(w, hyper.tau_mean, tau_sd))
        .sum();

    seating + sticks + response + lexical
}

/// One coordinate-wise slice-sampling sweep over all hyperparameters
pub fn slice_sample_hyperparameters(
    state: &SamplerState,
    responses: Option<&[f64]>,
    rng: &mut impl Rng,
) -> Hyperparameters {
    let mut x = state.hyper.to_array();

    for i in 0..x.len() {
        let transform = TRANSFORMS[i];
        let lnpdf = |u: f64| {
            let mut proposal = x;
            proposal[i] = transform.inverse(u);
            let h = Hyperparameters::from_array(proposal);
            hyperparameter_log_density(state, responses, &h)
                + transform.log_jacobian(u)
                + log_normal_density(u, 0.0, PRIOR_SD)
        };
        let u = SLICE.sample(transform.forward(x[i]), &lnpdf, rng);
        x[i] = transform.inverse(u);
    }

    Hyperparameters::from_array(x)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_transforms_invert() {
        for (t, x) in [
            (Transform::Log, 2.5),
            (Transform::Logit, 0.3),
            (Transform::Identity, -1.25),
        ] {
            assert_abs_diff_eq!(t.inverse(t.forward(x)), x, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_logit_jacobian() {
        let t = Transform::Logit;
        let u = 0.4;
        let h = 1e-6;
        let numeric = ((t.inverse(u + h) - t.inverse(u - h)) / (2.0 * h)).ln();
        assert_abs_diff_eq!(t.log_jacobian(u), numeric, epsilon = 1e-6);
    }
}
