//! MCMC convergence diagnostics on a (chain, draw) array.
//!
//! Effective sample size and R-hat follow the rank-normalized split-chain
//! estimators of Vehtari et al. (2021). Every estimator returns `NaN` when
//! the draws cannot support it: fewer than four draws per chain, non-finite
//! values, or a constant trace.

use ndarray::{Array2, ArrayView2, Axis, concatenate, s};

use crate::report::summary::PosteriorSummary;
use crate::sampler::PosteriorTrace;

/// Convergence thresholds that trigger a warning after sampling.
pub const RHAT_WARN_THRESHOLD: f64 = 1.01;
pub const ESS_PER_CHAIN_WARN_THRESHOLD: f64 = 100.0;

// =============================================================================
// Small numeric helpers
// =============================================================================

/// Inverse of the standard normal CDF (Acklam's rational approximation,
/// relative error below 1.2e-9).
pub fn normal_quantile(p: f64) -> f64 {
    if !(0.0..=1.0).contains(&p) || p.is_nan() {
        return f64::NAN;
    }
    if p == 0.0 {
        return f64::NEG_INFINITY;
    }
    if p == 1.0 {
        return f64::INFINITY;
    }

    const A: [f64; 6] = [
        -3.969_683_028_665_376e1,
        2.209_460_984_245_205e2,
        -2.759_285_104_469_687e2,
        1.383_577_518_672_69e2,
        -3.066_479_806_614_716e1,
        2.506_628_277_459_239,
    ];
    const B: [f64; 5] = [
        -5.447_609_879_822_406e1,
        1.615_858_368_580_409e2,
        -1.556_989_798_598_866e2,
        6.680_131_188_771_972e1,
        -1.328_068_155_288_572e1,
    ];
    const C: [f64; 6] = [
        -7.784_894_002_430_293e-3,
        -3.223_964_580_411_365e-1,
        -2.400_758_277_161_838,
        -2.549_732_539_343_734,
        4.374_664_141_464_968,
        2.938_163_982_698_783,
    ];
    const D: [f64; 4] = [
        7.784_695_709_041_462e-3,
        3.224_671_290_700_398e-1,
        2.445_134_137_142_996,
        3.754_408_661_907_416,
    ];
    const P_LOW: f64 = 0.024_25;

    if p < P_LOW {
        let q = (-2.0 * p.ln()).sqrt();
        (((((C[0] * q + C[1]) * q + C[2]) * q + C[3]) * q + C[4]) * q + C[5])
            / ((((D[0] * q + D[1]) * q + D[2]) * q + D[3]) * q + 1.0)
    } else if p <= 1.0 - P_LOW {
        let q = p - 0.5;
        let r = q * q;
        (((((A[0] * r + A[1]) * r + A[2]) * r + A[3]) * r + A[4]) * r + A[5]) * q
            / (((((B[0] * r + B[1]) * r + B[2]) * r + B[3]) * r + B[4]) * r + 1.0)
    } else {
        let q = (-2.0 * (1.0 - p).ln()).sqrt();
        -(((((C[0] * q + C[1]) * q + C[2]) * q + C[3]) * q + C[4]) * q + C[5])
            / ((((D[0] * q + D[1]) * q + D[2]) * q + D[3]) * q + 1.0)
    }
}

/// 1-based ranks with ties given their average rank.
pub fn average_ranks(values: &[f64]) -> Vec<f64> {
    let mut order: Vec<usize> = (0..values.len()).collect();
    order.sort_by(|&a, &b| values[a].total_cmp(&values[b]));

    let mut ranks = vec![0.0; values.len()];
    let mut start = 0;
    while start < order.len() {
        let mut end = start + 1;
        while end < order.len() && values[order[end]] == values[order[start]] {
            end += 1;
        }
        // Positions start..end share ranks start+1..=end.
        let rank = (start + 1 + end) as f64 / 2.0;
        for &idx in &order[start..end] {
            ranks[idx] = rank;
        }
        start = end;
    }
    ranks
}

/// Quantile with linear interpolation between order statistics.
pub fn quantile(values: &[f64], prob: f64) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    quantile_sorted(&sorted, prob)
}

pub fn quantile_sorted(sorted: &[f64], prob: f64) -> f64 {
    if sorted.is_empty() {
        return f64::NAN;
    }
    let h = (sorted.len() - 1) as f64 * prob.clamp(0.0, 1.0);
    let lo = h.floor() as usize;
    let hi = h.ceil() as usize;
    sorted[lo] + (h - lo as f64) * (sorted[hi] - sorted[lo])
}

fn mean(values: impl Iterator<Item = f64>) -> f64 {
    let (sum, n) = values.fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
    sum / n as f64
}

/// Sample variance (ddof = 1).
fn sample_variance(values: &[f64]) -> f64 {
    let m = mean(values.iter().copied());
    values.iter().map(|v| (v - m) * (v - m)).sum::<f64>() / (values.len() as f64 - 1.0)
}

pub fn sample_sd(draws: ArrayView2<f64>) -> f64 {
    let flat: Vec<f64> = draws.iter().copied().collect();
    sample_variance(&flat).sqrt()
}

// =============================================================================
// Chain transforms
// =============================================================================

/// Splits each chain into its first and last halves, doubling the chain count.
/// The middle draw of an odd-length chain is discarded.
pub fn split_chains(draws: ArrayView2<f64>) -> Array2<f64> {
    let half = draws.ncols() / 2;
    let n = draws.ncols();
    concatenate(
        Axis(0),
        &[draws.slice(s![.., ..half]), draws.slice(s![.., n - half..])],
    )
    .unwrap_or_else(|_| draws.to_owned())
}

/// Replaces every draw by the normal score of its pooled rank.
pub fn z_scale(draws: ArrayView2<f64>) -> Array2<f64> {
    let flat: Vec<f64> = draws.iter().copied().collect();
    let ranks = average_ranks(&flat);
    let size = flat.len() as f64;
    let z: Vec<f64> = ranks
        .iter()
        .map(|r| normal_quantile((r - 0.375) / (size + 0.25)))
        .collect();
    Array2::from_shape_vec(draws.raw_dim(), z).unwrap_or_else(|_| draws.to_owned())
}

fn is_usable(draws: ArrayView2<f64>) -> bool {
    if draws.nrows() < 1 || draws.ncols() < 4 {
        return false;
    }
    if !draws.iter().all(|v| v.is_finite()) {
        return false;
    }
    let first = draws[[0, 0]];
    draws.iter().any(|&v| v != first)
}

// =============================================================================
// Effective sample size
// =============================================================================

/// Biased autocovariance of one centered chain at `lag`.
fn autocov_at(centered: &[f64], lag: usize) -> f64 {
    let n = centered.len();
    centered[..n - lag]
        .iter()
        .zip(&centered[lag..])
        .map(|(a, b)| a * b)
        .sum::<f64>()
        / n as f64
}

/// Multi-chain ESS with Geyer's initial monotone sequence estimator.
pub fn ess(draws: ArrayView2<f64>) -> f64 {
    if !is_usable(draws) {
        return f64::NAN;
    }
    let (n_chain, n_draw) = draws.dim();
    let n = n_draw as f64;

    let chain_means: Vec<f64> = draws
        .outer_iter()
        .map(|row| mean(row.iter().copied()))
        .collect();
    let centered: Vec<Vec<f64>> = draws
        .outer_iter()
        .zip(&chain_means)
        .map(|(row, m)| row.iter().map(|v| v - m).collect())
        .collect();
    let mean_acov = |lag: usize| mean(centered.iter().map(|c| autocov_at(c, lag)));

    let mean_var = mean_acov(0) * n / (n - 1.0);
    let mut var_plus = mean_var * (n - 1.0) / n;
    if n_chain > 1 {
        var_plus += sample_variance(&chain_means);
    }

    let mut rho = vec![0.0; n_draw];
    let mut rho_even = 1.0;
    rho[0] = rho_even;
    let mut rho_odd = 1.0 - (mean_var - mean_acov(1)) / var_plus;
    rho[1] = rho_odd;

    let mut t = 1usize;
    while t < n_draw - 3 && rho_even + rho_odd > 0.0 {
        rho_even = 1.0 - (mean_var - mean_acov(t + 1)) / var_plus;
        rho_odd = 1.0 - (mean_var - mean_acov(t + 2)) / var_plus;
        if rho_even + rho_odd >= 0.0 {
            rho[t + 1] = rho_even;
            rho[t + 2] = rho_odd;
        }
        t += 2;
    }
    // May be -1 when the very first pair is already negative.
    let max_t = t as isize - 2;
    if rho_even > 0.0 {
        rho[(max_t + 1) as usize] = rho_even;
    }

    // Enforce a monotone sequence of pair sums.
    let mut t = 1isize;
    while t <= max_t - 2 {
        let i = t as usize;
        if rho[i + 1] + rho[i + 2] > rho[i - 1] + rho[i] {
            rho[i + 1] = (rho[i - 1] + rho[i]) / 2.0;
            rho[i + 2] = rho[i + 1];
        }
        t += 2;
    }

    let total = (n_chain * n_draw) as f64;
    let head = (max_t + 1) as usize;
    let tau_hat = -1.0 + 2.0 * rho[..head].iter().sum::<f64>() + rho[head];
    let tau_hat = tau_hat.max(1.0 / total.log10());
    total / tau_hat
}

pub fn ess_bulk(draws: ArrayView2<f64>) -> f64 {
    let split = split_chains(draws);
    if !is_usable(split.view()) {
        return f64::NAN;
    }
    ess(z_scale(split.view()).view())
}

pub fn ess_mean(draws: ArrayView2<f64>) -> f64 {
    ess(split_chains(draws).view())
}

pub fn ess_sd(draws: ArrayView2<f64>) -> f64 {
    let split = split_chains(draws);
    let squared = split.mapv(|v| v * v);
    ess(split.view()).min(ess(squared.view()))
}

/// ESS of the indicator `draw <= quantile(prob)`.
pub fn ess_quantile(draws: ArrayView2<f64>, prob: f64) -> f64 {
    let flat: Vec<f64> = draws.iter().copied().collect();
    if !flat.iter().all(|v| v.is_finite()) {
        return f64::NAN;
    }
    let cut = quantile(&flat, prob);
    let indicator = draws.mapv(|v| if v <= cut { 1.0 } else { 0.0 });
    ess(split_chains(indicator.view()).view())
}

/// Minimum of the 5% and 95% quantile ESS.
pub fn ess_tail(draws: ArrayView2<f64>) -> f64 {
    ess_quantile(draws, 0.05).min(ess_quantile(draws, 0.95))
}

// =============================================================================
// R-hat and Monte-Carlo standard errors
// =============================================================================

/// Classic potential scale reduction on already split chains.
fn rhat_plain(draws: ArrayView2<f64>) -> f64 {
    let n = draws.ncols() as f64;
    let chain_means: Vec<f64> = draws
        .outer_iter()
        .map(|row| mean(row.iter().copied()))
        .collect();
    let chain_vars: Vec<f64> = draws
        .outer_iter()
        .map(|row| sample_variance(&row.to_vec()))
        .collect();
    let between = n * sample_variance(&chain_means);
    let within = mean(chain_vars.iter().copied());
    ((between / within + n - 1.0) / n).sqrt()
}

/// Rank-normalized split R-hat: the larger of the bulk and folded (tail) values.
pub fn rhat(draws: ArrayView2<f64>) -> f64 {
    let split = split_chains(draws);
    if !is_usable(split.view()) {
        return f64::NAN;
    }
    let bulk = rhat_plain(z_scale(split.view()).view());

    let flat: Vec<f64> = draws.iter().copied().collect();
    let median = quantile(&flat, 0.5);
    let folded = split_chains(draws.mapv(|v| (v - median).abs()).view());
    let tail = if is_usable(folded.view()) {
        rhat_plain(z_scale(folded.view()).view())
    } else {
        f64::NAN
    };
    bulk.max(tail)
}

pub fn mcse_mean(draws: ArrayView2<f64>) -> f64 {
    sample_sd(draws) / ess_mean(draws).sqrt()
}

pub fn mcse_sd(draws: ArrayView2<f64>) -> f64 {
    let ess = ess_sd(draws);
    let factor = (std::f64::consts::E * (1.0 - 1.0 / ess).powf(ess - 1.0) - 1.0).sqrt();
    sample_sd(draws) * factor
}

// =============================================================================
// Sampler warnings
// =============================================================================

/// Human-readable warnings about sampler health for one fit.
pub fn convergence_warnings(trace: &PosteriorTrace, summary: &PosteriorSummary) -> Vec<String> {
    let mut warnings = Vec::new();

    let non_finite = trace.non_finite_evaluations();
    if non_finite > 0 {
        warnings.push(format!(
            "{non_finite} leapfrog steps reached a non-finite log density and ended their trajectory. \
             Increase `target_accept` or check the data for extreme values."
        ));
    }

    if trace.n_chains() < 2 {
        warnings.push(
            "Only one chain was sampled, this makes it impossible to run some convergence checks."
                .to_string(),
        );
        return warnings;
    }

    let high_rhat: Vec<&str> = summary
        .rows
        .iter()
        .filter(|row| !(row.r_hat <= RHAT_WARN_THRESHOLD))
        .map(|row| row.name.as_str())
        .collect();
    if !high_rhat.is_empty() {
        warnings.push(format!(
            "The rhat statistic is larger than {RHAT_WARN_THRESHOLD} for {}. \
             This indicates problems during sampling.",
            high_rhat.join(", ")
        ));
    }

    let min_ess = ESS_PER_CHAIN_WARN_THRESHOLD * trace.n_chains() as f64;
    let low_ess: Vec<&str> = summary
        .rows
        .iter()
        .filter(|row| !(row.ess_bulk >= min_ess))
        .map(|row| row.name.as_str())
        .collect();
    if !low_ess.is_empty() {
        warnings.push(format!(
            "The effective sample size per chain is smaller than {ESS_PER_CHAIN_WARN_THRESHOLD} for {}. \
             A higher number is needed for reliable rhat and ess computation.",
            low_ess.join(", ")
        ));
    }

    warnings
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use rand_distr::StandardNormal;

    fn iid_chains(n_chains: usize, n_draws: usize, seed: u64) -> Array2<f64> {
        let mut rng = StdRng::seed_from_u64(seed);
        Array2::from_shape_fn((n_chains, n_draws), |_| rng.sample::<f64, _>(StandardNormal))
    }

    #[test]
    fn normal_quantile_known_values() {
        assert_abs_diff_eq!(normal_quantile(0.5), 0.0, epsilon = 1e-9);
        assert_abs_diff_eq!(normal_quantile(0.975), 1.959_963_985, epsilon = 1e-6);
        assert_abs_diff_eq!(normal_quantile(0.025), -1.959_963_985, epsilon = 1e-6);
        assert_abs_diff_eq!(normal_quantile(0.001), -3.090_232_306, epsilon = 1e-6);
        assert!(normal_quantile(0.0).is_infinite());
    }

    #[test]
    fn ranks_average_ties() {
        let ranks = average_ranks(&[3.0, 1.0, 3.0, 2.0]);
        assert_eq!(ranks, vec![3.5, 1.0, 3.5, 2.0]);
    }

    #[test]
    fn quantile_interpolates() {
        let v = [1.0, 2.0, 3.0, 4.0, 5.0];
        assert_abs_diff_eq!(quantile(&v, 0.5), 3.0);
        assert_abs_diff_eq!(quantile(&v, 0.25), 2.0);
        assert_abs_diff_eq!(quantile(&v, 0.1), 1.4, epsilon = 1e-12);
    }

    #[test]
    fn split_chains_halves_each_chain() {
        let draws = Array2::from_shape_vec((1, 5), vec![1.0, 2.0, 3.0, 4.0, 5.0]).unwrap();
        let split = split_chains(draws.view());
        assert_eq!(split.dim(), (2, 2));
        assert_eq!(split.row(0).to_vec(), vec![1.0, 2.0]);
        assert_eq!(split.row(1).to_vec(), vec![4.0, 5.0]);
    }

    #[test]
    fn ess_of_independent_draws_is_near_draw_count() {
        let draws = iid_chains(4, 1000, 1);
        let total = 4000.0;
        for value in [ess_bulk(draws.view()), ess_mean(draws.view()), ess_tail(draws.view())] {
            assert!(value > 0.75 * total && value < 1.3 * total, "ess = {value}");
        }
    }

    #[test]
    fn ess_of_autocorrelated_draws_is_small() {
        // AR(1) with coefficient 0.95 has ESS ≈ n (1 - 0.95) / (1 + 0.95).
        let mut rng = StdRng::seed_from_u64(2);
        let mut draws = Array2::<f64>::zeros((4, 2000));
        for mut chain in draws.outer_iter_mut() {
            let mut x = 0.0;
            for v in chain.iter_mut() {
                x = 0.95 * x + rng.sample::<f64, _>(StandardNormal);
                *v = x;
            }
        }
        let value = ess_mean(draws.view());
        assert!(value < 800.0, "ess = {value}");
    }

    #[test]
    fn rhat_near_one_for_mixed_chains() {
        let draws = iid_chains(4, 1000, 3);
        let value = rhat(draws.view());
        assert!((value - 1.0).abs() < 0.01, "rhat = {value}");
    }

    #[test]
    fn rhat_large_for_shifted_chains() {
        let mut draws = iid_chains(4, 500, 4);
        draws.row_mut(3).mapv_inplace(|v| v + 5.0);
        assert!(rhat(draws.view()) > 1.5);
    }

    #[test]
    fn degenerate_input_gives_nan() {
        let constant = Array2::<f64>::from_elem((2, 100), 1.0);
        assert!(ess_bulk(constant.view()).is_nan());
        assert!(rhat(constant.view()).is_nan());
        let short = Array2::<f64>::zeros((2, 3));
        assert!(ess(short.view()).is_nan());
    }

    #[test]
    fn mcse_mean_scales_with_ess() {
        let draws = iid_chains(4, 1000, 5);
        let expected = sample_sd(draws.view()) / ess_mean(draws.view()).sqrt();
        assert_abs_diff_eq!(mcse_mean(draws.view()), expected, epsilon = 1e-12);
        assert!(mcse_sd(draws.view()) > 0.0 && mcse_sd(draws.view()) < 0.05);
    }

    fn single_parameter_trace(draws: &Array2<f64>, non_finite: usize) -> PosteriorTrace {
        let (n_chains, n_draws) = draws.dim();
        let samples = draws
            .clone()
            .into_shape_with_order((n_chains, n_draws, 1))
            .unwrap();
        let log_likelihood = ndarray::Array3::<f64>::zeros((n_chains, n_draws, 1));
        PosteriorTrace::new(vec!["mu".to_string()], samples, log_likelihood, non_finite).unwrap()
    }

    fn warnings_for(draws: &Array2<f64>, non_finite: usize) -> Vec<String> {
        let trace = single_parameter_trace(draws, non_finite);
        let summary = crate::report::summarize(&trace, 0.95);
        convergence_warnings(&trace, &summary)
    }

    #[test]
    fn well_mixed_chains_raise_no_warning() {
        let warnings = warnings_for(&iid_chains(4, 1000, 3), 0);
        assert!(warnings.is_empty(), "{warnings:?}");
    }

    #[test]
    fn non_finite_evaluations_are_reported() {
        let warnings = warnings_for(&iid_chains(4, 1000, 3), 5);
        assert_eq!(warnings.len(), 1, "{warnings:?}");
        assert!(warnings[0].starts_with("5 leapfrog steps"));
    }

    #[test]
    fn shifted_chain_raises_rhat_warning() {
        let mut draws = iid_chains(4, 500, 4);
        draws.row_mut(3).mapv_inplace(|v| v + 5.0);
        let warnings = warnings_for(&draws, 0);
        assert!(
            warnings
                .iter()
                .any(|w| w.starts_with("The rhat statistic is larger than 1.01 for mu")),
            "{warnings:?}"
        );
    }

    #[test]
    fn sticky_chains_raise_ess_warning() {
        let mut rng = StdRng::seed_from_u64(8);
        let mut draws = Array2::<f64>::zeros((4, 200));
        for mut chain in draws.rows_mut() {
            let mut previous = 0.0;
            for value in chain.iter_mut() {
                previous = 0.99 * previous + 0.1 * rng.sample::<f64, _>(StandardNormal);
                *value = previous;
            }
        }
        let warnings = warnings_for(&draws, 0);
        assert!(
            warnings
                .iter()
                .any(|w| w.starts_with("The effective sample size per chain is smaller than 100 for mu")),
            "{warnings:?}"
        );
    }

    #[test]
    fn single_chain_skips_between_chain_checks() {
        let warnings = warnings_for(&iid_chains(1, 1000, 6), 0);
        assert_eq!(warnings.len(), 1, "{warnings:?}");
        assert!(warnings[0].starts_with("Only one chain was sampled"));
    }
}
