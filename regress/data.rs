//! # Data Loading Module
//!
//! This module is the entry point for the assessment table. It reads a
//! delimited file with polars, checks the columns named by the
//! [`ColumnSchema`], and converts them into an [`ObservationTable`] of plain
//! Rust vectors. Everything downstream works on that table and never touches
//! polars directly.
//!
//! - Missing values are expected in outcome columns and are kept as `None`.
//!   Empty cells, the usual `NA`/`NaN` spellings, and non-finite floats are all
//!   treated as missing.
//! - Non-numeric text in a numeric column is a user error and is reported
//!   with the offending value.

use polars::prelude::*;
use std::collections::HashSet;
use std::fs::File;
use std::path::Path;
use thiserror::Error;

use crate::config::ColumnSchema;

/// Tokens that count as a missing value when a numeric column was read as text.
const MISSING_TOKENS: [&str; 8] = ["", "NA", "N/A", "NaN", "nan", "null", "NULL", "None"];

/// One outcome score column with its missing cells preserved.
#[derive(Debug, Clone, PartialEq)]
pub struct OutcomeColumn {
    pub name: String,
    pub values: Vec<Option<f64>>,
}

impl OutcomeColumn {
    /// Number of present values.
    pub fn observed_count(&self) -> usize {
        self.values.iter().filter(|v| v.is_some()).count()
    }
}

/// The full assessment table, one entry per subject in every vector.
#[derive(Debug, Clone, PartialEq)]
pub struct ObservationTable {
    pub age: Vec<Option<f64>>,
    pub sex: Vec<Option<String>>,
    pub education: Vec<Option<f64>>,
    pub group: Vec<Option<String>>,
    pub outcomes: Vec<OutcomeColumn>,
}

impl ObservationTable {
    /// Number of subjects.
    pub fn n_rows(&self) -> usize {
        self.age.len()
    }

    pub fn outcome(&self, name: &str) -> Option<&OutcomeColumn> {
        self.outcomes.iter().find(|column| column.name == name)
    }

    pub fn outcome_names(&self) -> Vec<&str> {
        self.outcomes.iter().map(|column| column.name.as_str()).collect()
    }
}

/// A comprehensive error type for all data loading failures.
#[derive(Error, Debug)]
pub enum DataError {
    #[error("Error from the underlying Polars DataFrame library: {0}")]
    PolarsError(#[from] PolarsError),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error(
        "The required column '{0}' was not found in the input file. Please check spelling and case."
    )]
    ColumnNotFound(String),
    #[error(
        "The column '{column_name}' must be numeric, but row {row} contains '{value}'."
    )]
    NonNumericValue {
        column_name: String,
        row: usize,
        value: String,
    },
    #[error(
        "The column '{column_name}' has unsupported type {found_type}; expected numbers or text."
    )]
    ColumnWrongType {
        column_name: String,
        found_type: String,
    },
    #[error(
        "The input file has {found} columns, so no outcome columns start at position {first_outcome_index}."
    )]
    NoOutcomeColumns {
        found: usize,
        first_outcome_index: usize,
    },
}

/// Loads the assessment table from `path`.
///
/// Files ending in `.tsv` or `.txt` are read tab-separated; anything else is
/// read as comma-separated. Every column is read as text and parsed here, so a
/// missing marker or a decimal far down a column cannot break type inference.
pub fn load_observation_table(
    path: &Path,
    schema: &ColumnSchema,
) -> Result<ObservationTable, DataError> {
    log::info!("Loading data from '{}'", path.display());

    let df = CsvReader::new(File::open(path)?)
        .with_options(
            CsvReadOptions::default()
                .with_has_header(true)
                .with_infer_schema_length(Some(0))
                .with_parse_options(
                    CsvParseOptions::default().with_separator(separator_for(path)),
                ),
        )
        .finish()?;

    log::info!(
        "Successfully loaded data file ({} rows, {} columns).",
        df.height(),
        df.width()
    );

    table_from_frame(&df, schema)
}

/// Converts an already-loaded frame into an [`ObservationTable`].
pub fn table_from_frame(
    df: &DataFrame,
    schema: &ColumnSchema,
) -> Result<ObservationTable, DataError> {
    let column_names: Vec<String> = df
        .get_column_names()
        .into_iter()
        .map(|name| name.to_string())
        .collect();
    let present: HashSet<&str> = column_names.iter().map(|s| s.as_str()).collect();

    for required in schema.required_columns() {
        if !present.contains(required) {
            return Err(DataError::ColumnNotFound(required.to_string()));
        }
    }

    if column_names.len() <= schema.first_outcome_index {
        return Err(DataError::NoOutcomeColumns {
            found: column_names.len(),
            first_outcome_index: schema.first_outcome_index,
        });
    }

    let age = numeric_column(df, &schema.age)?;
    let sex = text_column(df, &schema.sex)?;
    let education = numeric_column(df, &schema.education)?;
    let group = text_column(df, &schema.group)?;

    let mut outcomes = Vec::with_capacity(column_names.len() - schema.first_outcome_index);
    for name in &column_names[schema.first_outcome_index..] {
        outcomes.push(OutcomeColumn {
            name: name.clone(),
            values: numeric_column(df, name)?,
        });
    }

    log::info!(
        "Found {} outcome columns: {:?}",
        outcomes.len(),
        outcomes.iter().map(|c| c.name.as_str()).collect::<Vec<_>>()
    );

    Ok(ObservationTable {
        age,
        sex,
        education,
        group,
        outcomes,
    })
}

fn separator_for(path: &Path) -> u8 {
    match path.extension().and_then(|ext| ext.to_str()) {
        Some(ext) if ext.eq_ignore_ascii_case("tsv") || ext.eq_ignore_ascii_case("txt") => b'\t',
        _ => b',',
    }
}

fn is_missing_token(value: &str) -> bool {
    let trimmed = value.trim();
    MISSING_TOKENS.contains(&trimmed)
}

/// Reads a column as numbers, keeping missing cells as `None`.
fn numeric_column(df: &DataFrame, column_name: &str) -> Result<Vec<Option<f64>>, DataError> {
    let column = df.column(column_name)?;
    match column.dtype() {
        DataType::String => {
            let mut values = Vec::with_capacity(column.len());
            for (row, cell) in column.str()?.into_iter().enumerate() {
                let parsed = match cell {
                    None => None,
                    Some(text) if is_missing_token(text) => None,
                    Some(text) => {
                        let number: f64 =
                            text.trim().parse().map_err(|_| DataError::NonNumericValue {
                                column_name: column_name.to_string(),
                                row: row + 1,
                                value: text.to_string(),
                            })?;
                        number.is_finite().then_some(number)
                    }
                };
                values.push(parsed);
            }
            Ok(values)
        }
        other => {
            let casted = column
                .cast(&DataType::Float64)
                .map_err(|_| DataError::ColumnWrongType {
                    column_name: column_name.to_string(),
                    found_type: format!("{other:?}"),
                })?;
            Ok(casted
                .f64()?
                .into_iter()
                .map(|cell| cell.filter(|value| value.is_finite()))
                .collect())
        }
    }
}

/// Reads a categorical column as trimmed text, keeping missing cells as `None`.
fn text_column(df: &DataFrame, column_name: &str) -> Result<Vec<Option<String>>, DataError> {
    let column = df.column(column_name)?;
    let casted = column.cast(&DataType::String)?;
    Ok(casted
        .str()?
        .into_iter()
        .map(|cell| {
            cell.map(str::trim)
                .filter(|text| !is_missing_token(text))
                .map(str::to_string)
        })
        .collect())
}
