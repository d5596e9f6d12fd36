//! Dense linear regression solvers for the response model.

use crate::error::{Result, SamplerError};
use nalgebra::{DMatrix, DVector};

const LASSO_MAX_ITER: usize = 1000;
const LASSO_TOL: f64 = 1e-9;

/// L1-regularized least squares by cyclic coordinate descent:
///
/// `argmin_w ½‖y - X w‖² + λ ‖w‖₁`
pub fn lasso(x: &DMatrix<f64>, y: &DVector<f64>, lambda: f64) -> Result<DVector<f64>> {
    check_shapes(x, y)?;
    let p = x.ncols();
    let col_sq: Vec<f64> = (0..p).map(|j| x.column(j).norm_squared()).collect();

    let mut w = DVector::<f64>::zeros(p);
    let mut resid = y.clone();

    for _iter in 0..LASSO_MAX_ITER {
        let mut max_delta: f64 = 0.0;
        for j in 0..p {
            if col_sq[j] <= 0.0 {
                continue;
            }
            let xj = x.column(j);
            let rho_j = xj.dot(&resid) + col_sq[j] * w[j];
            let w_new = soft_threshold(rho_j, lambda) / col_sq[j];
            let delta = w_new - w[j];
            if delta != 0.0 {
                resid.axpy(-delta, &xj, 1.0);
                w[j] = w_new;
                max_delta = max_delta.max(delta.abs());
            }
        }
        if max_delta < LASSO_TOL {
            break;
        }
    }

    if w.iter().any(|v| !v.is_finite()) {
        return Err(SamplerError::RegressionFailure(
            "lasso produced non-finite coefficients".into(),
        ));
    }
    Ok(w)
}

/// Ridge regression with per-feature penalties and prior means:
///
/// `argmin_w ‖y - X w‖² + Σ_j λ_j (w_j - m_j)²`
pub fn weighted_ridge(
    x: &DMatrix<f64>,
    y: &DVector<f64>,
    lambdas: &[f64],
    prior_means: &[f64],
) -> Result<DVector<f64>> {
    check_shapes(x, y)?;
    let p = x.ncols();
    if lambdas.len() != p || prior_means.len() != p {
        return Err(SamplerError::RegressionFailure(format!(
            "{} features but {} penalties and {} prior means",
            p,
            lambdas.len(),
            prior_means.len()
        )));
    }

    let mut xtx = x.transpose() * x;
    let mut xty = x.transpose() * y;
    for j in 0..p {
        xtx[(j, j)] += lambdas[j];
        xty[j] += lambdas[j] * prior_means[j];
    }

    let sol = match xtx.clone().cholesky() {
        Some(chol) => chol.solve(&xty),
        None => xtx.lu().solve(&xty).ok_or_else(|| {
            SamplerError::RegressionFailure("ridge normal equations are singular".into())
        })?,
    };

    if sol.iter().any(|v| !v.is_finite()) {
        return Err(SamplerError::RegressionFailure(
            "ridge produced non-finite coefficients".into(),
        ));
    }
    Ok(sol)
}

fn soft_threshold(z: f64, lambda: f64) -> f64 {
    if z > lambda {
        z - lambda
    } else if z < -lambda {
        z + lambda
    } else {
        0.0
    }
}

fn check_shapes(x: &DMatrix<f64>, y: &DVector<f64>) -> Result<()> {
    if x.nrows() != y.len() {
        return Err(SamplerError::RegressionFailure(format!(
            "design has {} rows, response has {}",
            x.nrows(),
            y.len()
        )));
    }
    if y.iter().chain(x.iter()).any(|v| !v.is_finite()) {
        return Err(SamplerError::RegressionFailure(
            "non-finite entries in design or response".into(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn design() -> (DMatrix<f64>, DVector<f64>) {
        let x = DMatrix::from_row_slice(5, 2, &[1.0, 0.0, 0.0, 1.0, 1.0, 1.0, 2.0, 0.5, 0.5, 2.0]);
        let w = DVector::from_vec(vec![1.5, -2.0]);
        let y = &x * &w;
        (x, y)
    }

    #[test]
    fn test_lasso_without_penalty_is_least_squares() {
        let (x, y) = design();
        let w = lasso(&x, &y, 0.0).unwrap();
        assert_abs_diff_eq!(w[0], 1.5, epsilon = 1e-6);
        assert_abs_diff_eq!(w[1], -2.0, epsilon = 1e-6);
    }

    #[test]
    fn test_lasso_large_penalty_zeroes_everything() {
        let (x, y) = design();
        let w = lasso(&x, &y, 1e6).unwrap();
        assert!(w.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_ridge_shrinks_towards_prior_mean() {
        let (x, y) = design();
        let free = weighted_ridge(&x, &y, &[1e-12, 1e-12], &[0.0, 0.0]).unwrap();
        assert_abs_diff_eq!(free[0], 1.5, epsilon = 1e-6);

        let pinned = weighted_ridge(&x, &y, &[1e12, 1.0], &[0.25, 0.0]).unwrap();
        assert_abs_diff_eq!(pinned[0], 0.25, epsilon = 1e-6);
    }

    #[test]
    fn test_shape_errors() {
        let (x, _) = design();
        let y = DVector::from_vec(vec![1.0, 2.0]);
        assert!(matches!(
            lasso(&x, &y, 1.0),
            Err(SamplerError::RegressionFailure(_))
        ));
        let (x, y) = design();
        assert!(weighted_ridge(&x, &y, &[1.0], &[0.0, 0.0]).is_err());
    }
}
