use polars::prelude::*;

use crate::error::{PipelineError, PipelineResult};
use crate::loader::{DROPOFF_ZONE_COLUMN, DURATION_COLUMN, PICKUP_ZONE_COLUMN};

pub const NUMERIC_FEATURES: [&str; 3] = ["trip_distance", "extra", "fare_amount"];
pub const CATEGORICAL_FEATURES: [&str; 2] = [PICKUP_ZONE_COLUMN, DROPOFF_ZONE_COLUMN];

/// Model input columns, in matrix order.
pub const FEATURE_COLUMNS: [&str; 5] = [
    NUMERIC_FEATURES[0],
    NUMERIC_FEATURES[1],
    NUMERIC_FEATURES[2],
    CATEGORICAL_FEATURES[0],
    CATEGORICAL_FEATURES[1],
];

pub const LABEL_COLUMN: &str = DURATION_COLUMN;

/// Fixed-column model input: three `Float64` columns then two `String` columns.
#[derive(Debug, Clone)]
pub struct FeatureMatrix {
    frame: DataFrame,
}

impl FeatureMatrix {
    /// Slice the feature columns out of a trip table.
    ///
    /// `split` names the table in the `MissingColumn` error.
    pub fn from_table(table: &DataFrame, split: &'static str) -> PipelineResult<Self> {
        let mut columns = Vec::with_capacity(FEATURE_COLUMNS.len());
        for name in NUMERIC_FEATURES {
            columns.push(require(table, name, split)?.cast(&DataType::Float64)?);
        }
        for name in CATEGORICAL_FEATURES {
            columns.push(require(table, name, split)?.cast(&DataType::String)?);
        }

        Ok(Self {
            frame: DataFrame::new(columns)?,
        })
    }

    pub fn frame(&self) -> &DataFrame {
        &self.frame
    }

    pub fn height(&self) -> usize {
        self.frame.height()
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.frame.get_column_names()
    }
}

impl PartialEq for FeatureMatrix {
    fn eq(&self, other: &Self) -> bool {
        self.frame.equals_missing(&other.frame)
    }
}

/// Target durations aligned row-for-row with a [`FeatureMatrix`].
#[derive(Debug, Clone, PartialEq, Default)]
pub struct LabelVector {
    values: Vec<f64>,
}

impl LabelVector {
    pub fn new(values: Vec<f64>) -> Self {
        Self { values }
    }

    /// Read the `duration` column; nulls become NaN.
    pub fn from_table(table: &DataFrame, split: &'static str) -> PipelineResult<Self> {
        let labels = require(table, LABEL_COLUMN, split)?.cast(&DataType::Float64)?;
        let values = labels
            .f64()?
            .into_iter()
            .map(|value| value.unwrap_or(f64::NAN))
            .collect();
        Ok(Self { values })
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl From<Vec<f64>> for LabelVector {
    fn from(values: Vec<f64>) -> Self {
        Self::new(values)
    }
}

/// Train and validation splits ready for fitting.
#[derive(Debug, Clone, PartialEq)]
pub struct Datasets {
    pub train_features: FeatureMatrix,
    pub validation_features: FeatureMatrix,
    pub train_labels: LabelVector,
    pub validation_labels: LabelVector,
}

/// Split loaded trip tables into feature matrices and label vectors.
///
/// Pure: calling it again with the same tables yields identical output, which
/// is what lets the pipeline retry it.
pub fn build_datasets(train: &DataFrame, validation: &DataFrame) -> PipelineResult<Datasets> {
    let datasets = Datasets {
        train_features: FeatureMatrix::from_table(train, "train")?,
        validation_features: FeatureMatrix::from_table(validation, "validation")?,
        train_labels: LabelVector::from_table(train, "train")?,
        validation_labels: LabelVector::from_table(validation, "validation")?,
    };

    tracing::info!(
        "Built datasets: {} train rows, {} validation rows, features {:?}",
        datasets.train_features.height(),
        datasets.validation_features.height(),
        FEATURE_COLUMNS
    );
    Ok(datasets)
}

fn require<'a>(table: &'a DataFrame, column: &str, split: &'static str) -> PipelineResult<&'a Series> {
    table.column(column).map_err(|_| PipelineError::MissingColumn {
        column: column.to_string(),
        table: split,
    })
}
