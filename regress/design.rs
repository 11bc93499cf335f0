//! # Design Matrix Construction
//!
//! Turns one outcome column of the [`ObservationTable`] into a response vector
//! and an aligned numeric design matrix. A fresh working frame is derived for
//! every outcome: rows with a missing outcome are dropped first, and all
//! encoding and scaling decisions are taken on the rows that remain.
//!
//! Column order is fixed: standardized age, standardized education, one
//! indicator per non-reference sex level, then the group indicator.

use ndarray::{Array1, Array2};
use std::collections::BTreeSet;
use std::fmt;
use thiserror::Error;

use crate::config::ColumnSchema;
use crate::data::ObservationTable;

#[derive(Error, Debug, PartialEq)]
pub enum DesignError {
    #[error("Outcome column '{0}' does not exist in the table.")]
    UnknownOutcome(String),
    #[error(
        "Outcome column '{0}' has no observed values; refusing to fit a model to an empty response."
    )]
    EmptyResponse(String),
    #[error("Predictor '{column}' is missing at row {row} while fitting outcome '{outcome}'.")]
    MissingPredictor {
        column: String,
        row: usize,
        outcome: String,
    },
    #[error(
        "Group label '{label}' at row {row} is neither '{positive}' nor '{negative}'."
    )]
    UnknownGroupLabel {
        label: String,
        row: usize,
        positive: String,
        negative: String,
    },
}

/// How a design column was derived from the table.
#[derive(Debug, Clone, PartialEq)]
pub enum DesignColumnKind {
    /// A continuous predictor centred and scaled on the retained rows.
    Standardized(StandardScaler),
    /// One non-reference level of the sex factor.
    SexIndicator { level: String },
    /// 1 for the positive group label, 0 for the negative one.
    GroupIndicator,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DesignColumn {
    pub name: String,
    pub kind: DesignColumnKind,
}

impl fmt::Display for DesignColumn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// Zero-mean, unit-variance scaling with the population standard deviation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StandardScaler {
    pub mean: f64,
    pub scale: f64,
}

impl StandardScaler {
    /// Fits the scaler. A constant column gets a scale of 1 so it maps to zeros.
    pub fn fit(values: &[f64]) -> Self {
        if values.is_empty() {
            return Self {
                mean: 0.0,
                scale: 1.0,
            };
        }
        let n = values.len() as f64;
        let mean = values.iter().sum::<f64>() / n;
        let variance = values.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / n;
        let std = variance.sqrt();
        let scale = if std > f64::EPSILON * mean.abs().max(1.0) {
            std
        } else {
            1.0
        };
        Self { mean, scale }
    }

    pub fn transform(&self, value: f64) -> f64 {
        (value - self.mean) / self.scale
    }
}

/// The prepared inputs for one outcome column.
#[derive(Debug, Clone)]
pub struct DesignMatrix {
    pub outcome: String,
    /// Numeric predictors, one row per retained subject.
    pub x: Array2<f64>,
    /// Observed outcome values, aligned with the rows of `x`.
    pub y: Array1<f64>,
    pub columns: Vec<DesignColumn>,
    /// Row of the original table behind each retained row.
    pub source_rows: Vec<usize>,
}

impl DesignMatrix {
    pub fn n_rows(&self) -> usize {
        self.x.nrows()
    }

    pub fn n_predictors(&self) -> usize {
        self.x.ncols()
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }
}

/// Builds the design matrix and response for `outcome`.
pub fn prepare_outcome(
    table: &ObservationTable,
    outcome: &str,
    schema: &ColumnSchema,
) -> Result<DesignMatrix, DesignError> {
    let column = table
        .outcome(outcome)
        .ok_or_else(|| DesignError::UnknownOutcome(outcome.to_string()))?;

    let source_rows: Vec<usize> = column
        .values
        .iter()
        .enumerate()
        .filter_map(|(row, value)| value.map(|_| row))
        .collect();

    if source_rows.is_empty() {
        return Err(DesignError::EmptyResponse(outcome.to_string()));
    }

    let y: Array1<f64> = source_rows
        .iter()
        .filter_map(|&row| column.values[row])
        .collect();

    let missing = |name: &str, row: usize| DesignError::MissingPredictor {
        column: name.to_string(),
        row: row + 1,
        outcome: outcome.to_string(),
    };

    let age: Vec<f64> = source_rows
        .iter()
        .map(|&row| table.age[row].ok_or_else(|| missing(&schema.age, row)))
        .collect::<Result<_, _>>()?;
    let education: Vec<f64> = source_rows
        .iter()
        .map(|&row| table.education[row].ok_or_else(|| missing(&schema.education, row)))
        .collect::<Result<_, _>>()?;
    let sex: Vec<&str> = source_rows
        .iter()
        .map(|&row| {
            table.sex[row]
                .as_deref()
                .ok_or_else(|| missing(&schema.sex, row))
        })
        .collect::<Result<_, _>>()?;
    let group: Vec<f64> = source_rows
        .iter()
        .map(|&row| encode_group(table.group[row].as_deref(), row, schema))
        .collect::<Result<_, _>>()?;

    let sex_levels = indicator_levels(&sex);
    warn_on_dropped_levels(table, &sex, &sex_levels, outcome);

    let age_scaler = StandardScaler::fit(&age);
    let education_scaler = StandardScaler::fit(&education);

    let mut columns = Vec::with_capacity(3 + sex_levels.len());
    columns.push(DesignColumn {
        name: schema.age.clone(),
        kind: DesignColumnKind::Standardized(age_scaler),
    });
    columns.push(DesignColumn {
        name: schema.education.clone(),
        kind: DesignColumnKind::Standardized(education_scaler),
    });
    for level in &sex_levels {
        columns.push(DesignColumn {
            name: format!("{}[{}]", schema.sex, level),
            kind: DesignColumnKind::SexIndicator {
                level: level.to_string(),
            },
        });
    }
    columns.push(DesignColumn {
        name: schema.group.clone(),
        kind: DesignColumnKind::GroupIndicator,
    });

    let n = source_rows.len();
    let mut x = Array2::<f64>::zeros((n, columns.len()));
    for i in 0..n {
        x[[i, 0]] = age_scaler.transform(age[i]);
        x[[i, 1]] = education_scaler.transform(education[i]);
        for (offset, level) in sex_levels.iter().enumerate() {
            if sex[i] == *level {
                x[[i, 2 + offset]] = 1.0;
            }
        }
        x[[i, columns.len() - 1]] = group[i];
    }

    log::info!(
        "Prepared '{}': {} of {} rows retained, {} predictors {:?}",
        outcome,
        n,
        table.n_rows(),
        columns.len(),
        columns.iter().map(|c| c.name.as_str()).collect::<Vec<_>>()
    );

    Ok(DesignMatrix {
        outcome: outcome.to_string(),
        x,
        y,
        columns,
        source_rows,
    })
}

fn encode_group(label: Option<&str>, row: usize, schema: &ColumnSchema) -> Result<f64, DesignError> {
    match label {
        Some(value) if value == schema.group_positive => Ok(1.0),
        Some(value) if value == schema.group_negative => Ok(0.0),
        other => Err(DesignError::UnknownGroupLabel {
            label: other.unwrap_or("<missing>").to_string(),
            row: row + 1,
            positive: schema.group_positive.clone(),
            negative: schema.group_negative.clone(),
        }),
    }
}

/// Sorted distinct levels with the first (reference) level removed.
fn indicator_levels<'a>(values: &[&'a str]) -> Vec<&'a str> {
    let levels: BTreeSet<&str> = values.iter().copied().collect();
    levels.into_iter().skip(1).collect()
}

/// Sex levels present somewhere in the table but absent from the retained rows.
fn dropped_sex_levels<'a>(table: &'a ObservationTable, retained: &[&str]) -> Vec<&'a str> {
    let retained: BTreeSet<&str> = retained.iter().copied().collect();
    let all_levels: BTreeSet<&str> = table.sex.iter().filter_map(|s| s.as_deref()).collect();
    all_levels
        .into_iter()
        .filter(|level| !retained.contains(level))
        .collect()
}

fn warn_on_dropped_levels(table: &ObservationTable, retained: &[&str], kept: &[&str], outcome: &str) {
    let dropped = dropped_sex_levels(table, retained);
    if !dropped.is_empty() {
        log::warn!(
            "Outcome '{}': sex level(s) {:?} have no rows left after dropping missing values; \
             the design has {} sex indicator column(s).",
            outcome,
            dropped,
            kept.len()
        );
    }
}
