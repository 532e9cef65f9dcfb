//! Numeric encoding of feature matrices.
//!
//! Tree learners work on dense `f64` rows, so the text zone identifiers are
//! mapped to ordinal codes learned from the training split.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::dataset::{FeatureMatrix, CATEGORICAL_FEATURES, FEATURE_COLUMNS, NUMERIC_FEATURES};
use crate::error::PipelineResult;

/// Row-major matrix of encoded features. Missing values are NaN.
#[derive(Debug, Clone, PartialEq)]
pub struct DenseMatrix {
    n_rows: usize,
    n_cols: usize,
    values: Vec<f64>,
}

impl DenseMatrix {
    pub fn from_rows(n_cols: usize, values: Vec<f64>) -> Self {
        assert!(n_cols > 0 && values.len() % n_cols == 0, "ragged dense matrix");
        Self {
            n_rows: values.len() / n_cols,
            n_cols,
            values,
        }
    }

    pub fn n_rows(&self) -> usize {
        self.n_rows
    }

    pub fn n_cols(&self) -> usize {
        self.n_cols
    }

    pub fn row(&self, index: usize) -> &[f64] {
        let start = index * self.n_cols;
        &self.values[start..start + self.n_cols]
    }

    pub fn rows(&self) -> impl Iterator<Item = &[f64]> {
        self.values.chunks_exact(self.n_cols)
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }
}

/// Ordinal codes for one categorical column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct CategoryCodes {
    column: String,
    codes: BTreeMap<String, u32>,
}

/// Maps a [`FeatureMatrix`] to a [`DenseMatrix`].
///
/// Numeric columns pass through. Categories seen in training get codes in
/// numeric order when they are integers (zone ids), text order otherwise;
/// unseen categories and nulls encode as missing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureEncoder {
    categories: Vec<CategoryCodes>,
}

impl FeatureEncoder {
    pub fn fit(features: &FeatureMatrix) -> PipelineResult<Self> {
        let mut categories = Vec::with_capacity(CATEGORICAL_FEATURES.len());
        for column in CATEGORICAL_FEATURES {
            let mut distinct: Vec<&str> = features
                .frame()
                .column(column)?
                .str()?
                .into_iter()
                .flatten()
                .collect();
            distinct.sort_by(|a, b| compare_categories(a, b));
            distinct.dedup();

            let codes = distinct
                .into_iter()
                .enumerate()
                .map(|(code, value)| (value.to_string(), code as u32))
                .collect();
            categories.push(CategoryCodes {
                column: column.to_string(),
                codes,
            });
        }
        Ok(Self { categories })
    }

    pub fn transform(&self, features: &FeatureMatrix) -> PipelineResult<DenseMatrix> {
        let frame = features.frame();
        let mut columns: Vec<Vec<f64>> = Vec::with_capacity(FEATURE_COLUMNS.len());

        for name in NUMERIC_FEATURES {
            let column = frame
                .column(name)?
                .f64()?
                .into_iter()
                .map(|value| value.unwrap_or(f64::NAN))
                .collect();
            columns.push(column);
        }
        for category in &self.categories {
            let column = frame
                .column(&category.column)?
                .str()?
                .into_iter()
                .map(|value| {
                    value
                        .and_then(|value| category.codes.get(value))
                        .map_or(f64::NAN, |code| f64::from(*code))
                })
                .collect();
            columns.push(column);
        }

        let n_rows = features.height();
        let mut values = Vec::with_capacity(n_rows * columns.len());
        for row in 0..n_rows {
            values.extend(columns.iter().map(|column| column[row]));
        }
        Ok(DenseMatrix::from_rows(columns.len(), values))
    }
}

fn compare_categories(a: &str, b: &str) -> Ordering {
    match (a.parse::<i64>(), b.parse::<i64>()) {
        (Ok(a), Ok(b)) => a.cmp(&b),
        (Ok(_), Err(_)) => Ordering::Less,
        (Err(_), Ok(_)) => Ordering::Greater,
        (Err(_), Err(_)) => a.cmp(b),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use polars::prelude::*;

    fn features(pickup: &[Option<&str>], dropoff: &[Option<&str>]) -> FeatureMatrix {
        let rows = pickup.len();
        let table = df!(
            "trip_distance" => (0..rows).map(|i| i as f64).collect::<Vec<_>>(),
            "extra" => vec![Some(0.5); rows],
            "fare_amount" => (0..rows).map(|i| i as f64 * 3.0).collect::<Vec<_>>(),
            "PULocationID" => pickup,
            "DOLocationID" => dropoff
        )
        .unwrap();
        FeatureMatrix::from_table(&table, "test").unwrap()
    }

    #[test]
    fn zone_codes_follow_numeric_order() {
        let train = features(
            &[Some("100"), Some("7"), Some("25"), Some("7")],
            &[Some("1"), Some("1"), Some("1"), Some("1")],
        );
        let encoder = FeatureEncoder::fit(&train).unwrap();
        let dense = encoder.transform(&train).unwrap();

        let pickup_codes: Vec<f64> = dense.rows().map(|row| row[3]).collect();
        assert_eq!(pickup_codes, vec![2.0, 0.0, 1.0, 0.0]);
        let dropoff_codes: Vec<f64> = dense.rows().map(|row| row[4]).collect();
        assert_eq!(dropoff_codes, vec![0.0; 4]);
    }

    #[test]
    fn unseen_and_null_categories_are_missing() {
        let train = features(&[Some("10"), Some("20")], &[Some("5"), Some("6")]);
        let validation = features(&[Some("30"), None], &[Some("6"), Some("5")]);
        let encoder = FeatureEncoder::fit(&train).unwrap();
        let dense = encoder.transform(&validation).unwrap();

        assert!(dense.row(0)[3].is_nan());
        assert!(dense.row(1)[3].is_nan());
        assert_eq!(dense.row(0)[4], 1.0);
        assert_eq!(dense.row(1)[4], 0.0);
    }

    #[test]
    fn numeric_columns_pass_through_in_order() {
        let train = features(&[Some("1"), Some("2"), Some("3")], &[Some("1"), Some("2"), Some("3")]);
        let dense = FeatureEncoder::fit(&train).unwrap().transform(&train).unwrap();

        assert_eq!(dense.n_rows(), 3);
        assert_eq!(dense.n_cols(), 5);
        assert_eq!(&dense.row(2)[..3], &[2.0, 0.5, 6.0]);
    }

    #[test]
    fn text_categories_sort_after_numbers() {
        assert_eq!(compare_categories("9", "10"), Ordering::Less);
        assert_eq!(compare_categories("10", "airport"), Ordering::Less);
        assert_eq!(compare_categories("airport", "midtown"), Ordering::Less);
    }
}
