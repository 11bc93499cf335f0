//! Posterior summary table and sign probabilities.

use itertools::Itertools;
use rayon::prelude::*;
use std::fmt;

use crate::report::diagnostics::{
    ess_bulk, ess_tail, mcse_mean, mcse_sd, quantile_sorted, rhat, sample_sd,
};
use crate::sampler::PosteriorTrace;

/// Highest-density interval: the narrowest window holding `prob` of the draws.
pub fn hdi(values: &[f64], prob: f64) -> (f64, f64) {
    if values.is_empty() {
        return (f64::NAN, f64::NAN);
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    hdi_sorted(&sorted, prob)
}

fn hdi_sorted(sorted: &[f64], prob: f64) -> (f64, f64) {
    let n = sorted.len();
    let width_idx = ((prob * n as f64).floor() as usize).min(n - 1);
    let n_intervals = n - width_idx;
    let best = (0..n_intervals)
        .min_by(|&a, &b| {
            let wa = sorted[a + width_idx] - sorted[a];
            let wb = sorted[b + width_idx] - sorted[b];
            wa.total_cmp(&wb)
        })
        .unwrap_or(0);
    (sorted[best], sorted[best + width_idx])
}

/// One line of the summary table.
#[derive(Debug, Clone, PartialEq)]
pub struct SummaryRow {
    pub name: String,
    pub mean: f64,
    pub sd: f64,
    pub hdi_lower: f64,
    pub hdi_upper: f64,
    pub mcse_mean: f64,
    pub mcse_sd: f64,
    pub ess_bulk: f64,
    pub ess_tail: f64,
    pub r_hat: f64,
    pub median: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PosteriorSummary {
    pub hdi_prob: f64,
    pub rows: Vec<SummaryRow>,
}

impl PosteriorSummary {
    pub fn row(&self, name: &str) -> Option<&SummaryRow> {
        self.rows.iter().find(|r| r.name == name)
    }
}

/// Summarises every parameter of the trace.
pub fn summarize(trace: &PosteriorTrace, hdi_prob: f64) -> PosteriorSummary {
    let rows = (0..trace.parameter_names().len())
        .into_par_iter()
        .map(|idx| {
            let draws = trace.parameter_at(idx);
            let mut sorted: Vec<f64> = draws.iter().copied().collect();
            sorted.sort_by(|a, b| a.total_cmp(b));
            let mean = sorted.iter().sum::<f64>() / sorted.len() as f64;
            let (hdi_lower, hdi_upper) = if sorted.is_empty() {
                (f64::NAN, f64::NAN)
            } else {
                hdi_sorted(&sorted, hdi_prob)
            };
            SummaryRow {
                name: trace.parameter_names()[idx].clone(),
                mean,
                sd: sample_sd(draws),
                hdi_lower,
                hdi_upper,
                mcse_mean: mcse_mean(draws),
                mcse_sd: mcse_sd(draws),
                ess_bulk: ess_bulk(draws),
                ess_tail: ess_tail(draws),
                r_hat: rhat(draws),
                median: quantile_sorted(&sorted, 0.5),
            }
        })
        .collect();

    PosteriorSummary { hdi_prob, rows }
}

/// `hdi_2.5%`-style label for one edge of the interval.
fn hdi_label(percent: f64) -> String {
    let text = format!("{percent:.2}");
    let text = text.trim_end_matches('0').trim_end_matches('.');
    format!("hdi_{text}%")
}

fn format_ess(value: f64) -> String {
    if value.is_finite() {
        format!("{value:.0}")
    } else {
        "nan".to_string()
    }
}

impl fmt::Display for PosteriorSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tail = (1.0 - self.hdi_prob) / 2.0 * 100.0;
        let headers = [
            "mean".to_string(),
            "sd".to_string(),
            hdi_label(tail),
            hdi_label(100.0 - tail),
            "mcse_mean".to_string(),
            "mcse_sd".to_string(),
            "ess_bulk".to_string(),
            "ess_tail".to_string(),
            "r_hat".to_string(),
            "median".to_string(),
        ];

        let cells: Vec<Vec<String>> = self
            .rows
            .iter()
            .map(|r| {
                vec![
                    format!("{:.3}", r.mean),
                    format!("{:.3}", r.sd),
                    format!("{:.3}", r.hdi_lower),
                    format!("{:.3}", r.hdi_upper),
                    format!("{:.3}", r.mcse_mean),
                    format!("{:.3}", r.mcse_sd),
                    format_ess(r.ess_bulk),
                    format_ess(r.ess_tail),
                    format!("{:.2}", r.r_hat),
                    format!("{:.3}", r.median),
                ]
            })
            .collect();

        let name_width = self
            .rows
            .iter()
            .map(|r| r.name.chars().count())
            .max()
            .unwrap_or(0);
        let widths: Vec<usize> = headers
            .iter()
            .enumerate()
            .map(|(col, h)| {
                cells
                    .iter()
                    .map(|row| row[col].len())
                    .chain(std::iter::once(h.len()))
                    .max()
                    .unwrap_or(0)
            })
            .collect();

        writeln!(
            f,
            "{:name_width$}  {}",
            "",
            headers
                .iter()
                .zip(widths.iter().copied())
                .map(|(h, w)| format!("{h:>w$}"))
                .join("  ")
        )?;
        for (row, values) in self.rows.iter().zip(&cells) {
            writeln!(
                f,
                "{:<name_width$}  {}",
                row.name,
                values
                    .iter()
                    .zip(widths.iter().copied())
                    .map(|(v, w)| format!("{v:>w$}"))
                    .join("  ")
            )?;
        }
        Ok(())
    }
}

/// Posterior mass strictly above and strictly below zero for one coefficient.
#[derive(Debug, Clone, PartialEq)]
pub struct SignProbability {
    pub name: String,
    pub positive: f64,
    pub negative: f64,
}

impl fmt::Display for SignProbability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: P(β > 0) = {:.3}, P(β < 0) = {:.3}",
            self.name, self.positive, self.negative
        )
    }
}

/// Sign probabilities for the named parameters, pooled over all chains.
/// Names absent from the trace are skipped.
pub fn sign_probabilities(trace: &PosteriorTrace, names: &[String]) -> Vec<SignProbability> {
    names
        .iter()
        .filter_map(|name| {
            let draws = trace.parameter(name)?;
            let total = draws.len() as f64;
            let positive = draws.iter().filter(|&&v| v > 0.0).count() as f64;
            let negative = draws.iter().filter(|&&v| v < 0.0).count() as f64;
            Some(SignProbability {
                name: name.clone(),
                positive: positive / total,
                negative: negative / total,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::Array3;

    /// Two chains of 200 draws: the first parameter is a ramp over
    /// [-0.5, 1.49], the second is all zeros except two negative draws.
    fn ramp_trace_named(first: &str, second: &str) -> PosteriorTrace {
        let (n_chains, n_draws) = (2, 200);
        let samples = Array3::from_shape_fn((n_chains, n_draws, 2), |(c, d, p)| {
            let i = (c * n_draws + d) as f64;
            match p {
                0 => i / 200.0 - 0.5,
                _ if c == 0 && d < 2 => -1.0,
                _ => 0.0,
            }
        });
        PosteriorTrace::new(
            vec![first.to_string(), second.to_string()],
            samples,
            Array3::zeros((n_chains, n_draws, 1)),
            0,
        )
        .unwrap()
    }

    fn ramp_trace() -> PosteriorTrace {
        ramp_trace_named("beta_a", "beta_b")
    }

    #[test]
    fn hdi_of_uniform_grid_has_expected_width() {
        let grid: Vec<f64> = (0..1000).map(|i| i as f64 / 1000.0).collect();
        let (lo, hi) = hdi(&grid, 0.95);
        assert_abs_diff_eq!(hi - lo, 0.95, epsilon = 1e-9);
    }

    #[test]
    fn hdi_prefers_dense_region() {
        let mut values = vec![0.0; 95];
        values.extend((0..5).map(|i| 100.0 + i as f64));
        let (lo, hi) = hdi(&values, 0.9);
        assert_eq!((lo, hi), (0.0, 0.0));
    }

    #[test]
    fn sign_probabilities_are_strict() {
        let trace = ramp_trace();
        let probs = sign_probabilities(
            &trace,
            &["beta_a".to_string(), "beta_b".to_string(), "missing".to_string()],
        );
        assert_eq!(probs.len(), 2);
        // Ramp values i/200 - 0.5 for i in 0..400: 100 below zero, one at zero.
        assert_abs_diff_eq!(probs[0].negative, 100.0 / 400.0);
        assert_abs_diff_eq!(probs[0].positive, 299.0 / 400.0);
        assert_abs_diff_eq!(probs[1].positive, 0.0);
        assert_abs_diff_eq!(probs[1].negative, 2.0 / 400.0);
        for p in &probs {
            assert!(p.positive + p.negative <= 1.0);
        }
    }

    #[test]
    fn sign_probability_line_format() {
        let line = SignProbability {
            name: "beta_age".to_string(),
            positive: 0.9731,
            negative: 0.0269,
        }
        .to_string();
        assert_eq!(line, "beta_age: P(β > 0) = 0.973, P(β < 0) = 0.027");
    }

    #[test]
    fn summary_rows_and_table() {
        let trace = ramp_trace();
        let summary = summarize(&trace, 0.95);
        assert_eq!(summary.rows.len(), 2);
        let row = summary.row("beta_a").unwrap();
        assert_abs_diff_eq!(row.mean, (399.0 / 2.0) / 200.0 - 0.5, epsilon = 1e-12);
        assert_abs_diff_eq!(row.median, row.mean, epsilon = 1e-12);
        assert!(row.hdi_lower < row.hdi_upper);

        let table = summary.to_string();
        let header = table.lines().next().unwrap();
        assert!(header.contains("hdi_2.5%"));
        assert!(header.contains("hdi_97.5%"));
        assert!(header.contains("median"));
        assert_eq!(table.lines().count(), 3);
        assert!(table.lines().nth(1).unwrap().starts_with("beta_a"));
    }

    #[test]
    fn table_aligns_non_ascii_names() {
        let summary = summarize(&ramp_trace_named("beta_教育年数", "beta_b"), 0.95);
        let table = summary.to_string();
        let widths: Vec<usize> = table.lines().map(|l| l.chars().count()).collect();
        assert_eq!(widths.len(), 3);
        assert!(widths.iter().all(|&w| w == widths[0]), "{table}");
        assert!(table.lines().next().unwrap().starts_with(&" ".repeat(11)));
    }

    #[test]
    fn hdi_labels() {
        assert_eq!(hdi_label(2.5), "hdi_2.5%");
        assert_eq!(hdi_label(5.0), "hdi_5%");
        assert_eq!(hdi_label(97.5), "hdi_97.5%");
    }
}
