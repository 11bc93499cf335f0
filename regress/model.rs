//! Bayesian linear regression posterior with analytical gradients.
//!
//! ```text
//! intercept ~ Normal(0, intercept_sd)
//! beta_j    ~ Normal(0, slope_sd)
//! sigma     ~ HalfNormal(sigma_sd)
//! y_i       ~ Normal(intercept + x_i · beta, sigma)
//! ```
//!
//! The sampler works on the unconstrained vector
//! `θ = [intercept, beta_1..beta_p, s]` with `sigma = exp(s)`; the
//! log-Jacobian `s` is part of the density.

use ndarray::{Array1, Array2, ArrayView1, ArrayViewMut1, s};
use std::f64::consts::{LN_2, PI};

use crate::config::PriorConfig;
use crate::design::DesignMatrix;
use crate::sampler::{LogDensity, PosteriorModel};

pub const INTERCEPT_NAME: &str = "intercept";
pub const SIGMA_NAME: &str = "sigma";

/// Name under which the slope of a design column is reported.
pub fn slope_name(column: &str) -> String {
    format!("beta_{column}")
}

fn normal_logpdf(x: f64, sd: f64) -> f64 {
    -0.5 * (x / sd).powi(2) - sd.ln() - 0.5 * (2.0 * PI).ln()
}

fn positive_or_one(value: f64) -> f64 {
    if value.is_finite() && value > 0.0 { value } else { 1.0 }
}

/// Posterior target for one outcome column.
#[derive(Debug, Clone)]
pub struct RegressionPosterior {
    /// Design matrix X [n_obs, n_predictors]
    x: Array2<f64>,
    /// Response vector y [n_obs]
    y: Array1<f64>,
    priors: PriorConfig,
    slope_names: Vec<String>,
}

impl RegressionPosterior {
    pub fn new(design: &DesignMatrix, priors: &PriorConfig) -> Self {
        Self {
            x: design.x.clone(),
            y: design.y.clone(),
            priors: priors.clone(),
            slope_names: design.columns.iter().map(|c| slope_name(&c.name)).collect(),
        }
    }

    pub fn n_predictors(&self) -> usize {
        self.x.ncols()
    }

    pub fn slope_names(&self) -> &[String] {
        &self.slope_names
    }

    fn split<'a>(&self, theta: ArrayView1<'a, f64>) -> (f64, ArrayView1<'a, f64>, f64) {
        let p = self.n_predictors();
        let (intercept, log_sigma) = (theta[0], theta[p + 1]);
        (intercept, theta.slice_move(s![1..=p]), log_sigma)
    }

    /// Residuals y - intercept - X·beta.
    fn residuals(&self, intercept: f64, beta: ArrayView1<f64>) -> Array1<f64> {
        let mut r = &self.y - &self.x.dot(&beta);
        r -= intercept;
        r
    }
}

impl LogDensity for RegressionPosterior {
    fn dim(&self) -> usize {
        self.n_predictors() + 2
    }

    fn logp_and_grad(&self, position: ArrayView1<f64>) -> (f64, Array1<f64>) {
        let (intercept, beta, log_sigma) = self.split(position);
        let n = self.y.len() as f64;
        let sigma = log_sigma.exp();
        let sigma2 = sigma * sigma;
        let PriorConfig {
            slope_sd,
            intercept_sd,
            sigma_sd,
        } = self.priors;

        let r = self.residuals(intercept, beta);
        let ss = r.dot(&r);

        // Normal likelihood
        let log_lik = -n * log_sigma - 0.5 * n * (2.0 * PI).ln() - 0.5 * ss / sigma2;

        // Priors, plus the log-Jacobian of sigma = exp(s)
        let log_prior_intercept = normal_logpdf(intercept, intercept_sd);
        let log_prior_beta: f64 = beta.iter().map(|&b| normal_logpdf(b, slope_sd)).sum();
        let log_prior_sigma = LN_2 + normal_logpdf(sigma, sigma_sd) + log_sigma;

        let logp = log_lik + log_prior_intercept + log_prior_beta + log_prior_sigma;

        let p = self.n_predictors();
        let mut grad = Array1::<f64>::zeros(p + 2);
        grad[0] = r.sum() / sigma2 - intercept / (intercept_sd * intercept_sd);
        let grad_beta = self.x.t().dot(&r) / sigma2 - &beta / (slope_sd * slope_sd);
        grad.slice_mut(s![1..=p]).assign(&grad_beta);
        grad[p + 1] = -n + ss / sigma2 - sigma2 / (sigma_sd * sigma_sd) + 1.0;

        (logp, grad)
    }

    /// Centered on the mean response with flat slopes and sigma at the
    /// response spread. Scales are the least-squares standard errors the
    /// coefficients would have with uncorrelated predictors.
    fn reference_point(&self) -> (Array1<f64>, Array1<f64>) {
        let p = self.n_predictors();
        let root_n = (self.y.len().max(1) as f64).sqrt();
        let spread = positive_or_one(self.y.std(0.0));

        let mut center = Array1::<f64>::zeros(p + 2);
        center[0] = self.y.mean().unwrap_or(0.0);
        center[p + 1] = spread.ln();

        let mut scale = Array1::<f64>::zeros(p + 2);
        scale[0] = spread / root_n;
        for (j, column) in self.x.columns().into_iter().enumerate() {
            scale[j + 1] = spread / (root_n * positive_or_one(column.std(0.0)));
        }
        scale[p + 1] = 1.0 / (root_n * std::f64::consts::SQRT_2);

        (center, scale)
    }
}

impl PosteriorModel for RegressionPosterior {
    fn parameter_names(&self) -> Vec<String> {
        let mut names = Vec::with_capacity(self.dim());
        names.push(INTERCEPT_NAME.to_string());
        names.extend(self.slope_names.iter().cloned());
        names.push(SIGMA_NAME.to_string());
        names
    }

    fn constrain(&self, position: ArrayView1<f64>) -> Array1<f64> {
        let mut out = position.to_owned();
        let last = out.len() - 1;
        out[last] = out[last].exp();
        out
    }

    fn n_observations(&self) -> usize {
        self.y.len()
    }

    fn pointwise_log_likelihood(&self, position: ArrayView1<f64>, mut out: ArrayViewMut1<f64>) {
        let (intercept, beta, log_sigma) = self.split(position);
        let sigma = log_sigma.exp();
        let r = self.residuals(intercept, beta);
        for (o, &ri) in out.iter_mut().zip(r.iter()) {
            *o = normal_logpdf(ri, sigma);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::design::{DesignColumn, DesignColumnKind};
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    fn toy_design() -> DesignMatrix {
        DesignMatrix {
            outcome: "score".to_string(),
            x: array![[0.5, -1.0], [-0.3, 0.2], [1.2, 1.0], [-1.4, -0.2]],
            y: array![2.0, 1.0, 3.5, -0.5],
            columns: vec![
                DesignColumn {
                    name: "age".to_string(),
                    kind: DesignColumnKind::GroupIndicator,
                },
                DesignColumn {
                    name: "group".to_string(),
                    kind: DesignColumnKind::GroupIndicator,
                },
            ],
            source_rows: vec![0, 1, 2, 3],
        }
    }

    #[test]
    fn parameter_layout() {
        let model = RegressionPosterior::new(&toy_design(), &PriorConfig::default());
        assert_eq!(model.dim(), 4);
        assert_eq!(
            model.parameter_names(),
            vec!["intercept", "beta_age", "beta_group", "sigma"]
        );
        let constrained = model.constrain(array![1.0, 2.0, 3.0, 0.0].view());
        assert_eq!(constrained.to_vec(), vec![1.0, 2.0, 3.0, 1.0]);
    }

    #[test]
    fn log_density_matches_direct_computation() {
        let design = toy_design();
        let priors = PriorConfig::default();
        let model = RegressionPosterior::new(&design, &priors);
        let theta = array![0.3, 1.1, -0.4, 0.2];
        let (logp, _) = model.logp_and_grad(theta.view());

        let sigma = 0.2f64.exp();
        let mut expected = 0.0;
        for i in 0..4 {
            let mu = 0.3 + 1.1 * design.x[[i, 0]] - 0.4 * design.x[[i, 1]];
            expected += normal_logpdf(design.y[i] - mu, sigma);
        }
        expected += normal_logpdf(0.3, 10.0);
        expected += normal_logpdf(1.1, 5.0) + normal_logpdf(-0.4, 5.0);
        expected += LN_2 + normal_logpdf(sigma, 5.0) + 0.2;

        assert_abs_diff_eq!(logp, expected, epsilon = 1e-10);

        let mut pointwise = Array1::<f64>::zeros(4);
        model.pointwise_log_likelihood(theta.view(), pointwise.view_mut());
        let log_prior = normal_logpdf(0.3, 10.0)
            + normal_logpdf(1.1, 5.0)
            + normal_logpdf(-0.4, 5.0)
            + LN_2
            + normal_logpdf(sigma, 5.0)
            + 0.2;
        assert_abs_diff_eq!(pointwise.sum() + log_prior, logp, epsilon = 1e-10);
    }

    #[test]
    fn reference_point_sits_at_the_response() {
        let design = toy_design();
        let model = RegressionPosterior::new(&design, &PriorConfig::default());
        let (center, scale) = model.reference_point();
        assert_eq!(center.len(), model.dim());
        assert_eq!(scale.len(), model.dim());
        assert_abs_diff_eq!(center[0], 1.5, epsilon = 1e-12);
        assert_eq!(center[1], 0.0);
        assert_abs_diff_eq!(center[3], design.y.std(0.0).ln(), epsilon = 1e-12);
        assert!(scale.iter().all(|&s| s.is_finite() && s > 0.0));
        // Wider predictors get tighter slope scales.
        assert!(scale[1] < scale[2]);
    }

    #[test]
    fn reference_point_survives_constant_response() {
        let mut design = toy_design();
        design.y.fill(4.0);
        design.x.column_mut(1).fill(1.0);
        let model = RegressionPosterior::new(&design, &PriorConfig::default());
        let (center, scale) = model.reference_point();
        assert_eq!(center[3], 0.0);
        assert!(scale.iter().all(|&s| s.is_finite() && s > 0.0));
    }

    #[test]
    fn gradient_matches_finite_difference() {
        let model = RegressionPosterior::new(&toy_design(), &PriorConfig::default());
        let theta = array![0.3, 1.1, -0.4, -0.5];
        let (_, grad) = model.logp_and_grad(theta.view());

        let eps = 1e-6;
        for i in 0..theta.len() {
            let mut plus = theta.clone();
            let mut minus = theta.clone();
            plus[i] += eps;
            minus[i] -= eps;
            let (logp_plus, _) = model.logp_and_grad(plus.view());
            let (logp_minus, _) = model.logp_and_grad(minus.view());
            let fd = (logp_plus - logp_minus) / (2.0 * eps);
            let rel_error = (grad[i] - fd).abs() / grad[i].abs().max(1.0);
            assert!(
                rel_error < 1e-5,
                "gradient mismatch at {i}: analytical={}, fd={fd}",
                grad[i]
            );
        }
    }
}
