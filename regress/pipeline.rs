//! One outcome column, end to end: design matrix, posterior sampling,
//! summary and sign probabilities.

use std::time::Instant;
use thiserror::Error;

use crate::config::AnalysisConfig;
use crate::data::{DataError, ObservationTable};
use crate::design::{DesignError, DesignMatrix, prepare_outcome};
use crate::model::RegressionPosterior;
use crate::report::{
    PosteriorSummary, SignProbability, convergence_warnings, sign_probabilities, summarize,
};
use crate::sampler::{PosteriorTrace, SamplingError, run_nuts_sampling};

#[derive(Error, Debug)]
pub enum AnalysisError {
    #[error("Failed to load the observation table: {0}")]
    Data(#[from] DataError),
    #[error("Failed to prepare the design matrix: {0}")]
    Design(#[from] DesignError),
    #[error("Posterior sampling failed: {0}")]
    Sampling(#[from] SamplingError),
}

/// Everything reported for one outcome column.
#[derive(Debug)]
pub struct OutcomeReport {
    pub outcome: String,
    pub design: DesignMatrix,
    pub trace: PosteriorTrace,
    pub summary: PosteriorSummary,
    pub sign_probabilities: Vec<SignProbability>,
    pub warnings: Vec<String>,
}

/// Fits the regression for `outcome` and builds its report.
pub fn analyze_outcome(
    table: &ObservationTable,
    outcome: &str,
    config: &AnalysisConfig,
) -> Result<OutcomeReport, AnalysisError> {
    let start = Instant::now();
    let design = prepare_outcome(table, outcome, &config.columns)?;
    let model = RegressionPosterior::new(&design, &config.priors);

    let raw = run_nuts_sampling(&model, &config.sampler)?;
    let trace = PosteriorTrace::from_draws(&model, &raw)?;

    let summary = summarize(&trace, config.report.hdi_prob);
    let sign_probabilities = sign_probabilities(&trace, model.slope_names());
    let warnings = convergence_warnings(&trace, &summary);
    for warning in &warnings {
        log::warn!("{outcome}: {warning}");
    }

    log::info!(
        "Finished '{}' in {:.2}s ({} rows x {} predictors, {} chains x {} draws)",
        outcome,
        start.elapsed().as_secs_f64(),
        design.n_rows(),
        design.n_predictors(),
        trace.n_chains(),
        trace.n_draws()
    );

    Ok(OutcomeReport {
        outcome: outcome.to_string(),
        design,
        trace,
        summary,
        sign_probabilities,
        warnings,
    })
}

/// Outcome columns to analyse, in table order. An empty `selected` means all.
pub fn selected_outcomes(
    table: &ObservationTable,
    selected: &[String],
) -> Result<Vec<String>, AnalysisError> {
    if let Some(unknown) = selected
        .iter()
        .find(|name| table.outcome(name).is_none())
    {
        return Err(DesignError::UnknownOutcome(unknown.clone()).into());
    }
    Ok(table
        .outcome_names()
        .into_iter()
        .filter(|name| selected.is_empty() || selected.iter().any(|s| s.as_str() == *name))
        .map(str::to_string)
        .collect())
}
