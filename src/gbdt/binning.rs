//! Feature quantisation for histogram split finding.

use crate::features::DenseMatrix;

/// Bin index marking a missing (NaN) value.
pub const MISSING_BIN: u16 = u16::MAX;

/// Maps the values of one feature to ordered bins.
///
/// Bin `i` holds values `v` with `cuts[i - 1] < v <= cuts[i]`, so a split
/// "bin <= i" is the same as "value <= cuts[i]" on raw values.
#[derive(Debug, Clone, PartialEq)]
pub struct BinMapper {
    cuts: Vec<f64>,
}

impl BinMapper {
    /// Choose at most `max_bin` bins for the given values.
    ///
    /// With few distinct values every value gets its own bin and cuts sit at
    /// the midpoints. Otherwise cuts are placed at quantiles. Non-finite values
    /// never become cuts.
    pub fn fit(values: impl IntoIterator<Item = f64>, max_bin: usize) -> Self {
        let mut sorted: Vec<f64> = values.into_iter().filter(|v| v.is_finite()).collect();
        sorted.sort_by(f64::total_cmp);

        let mut distinct = sorted.clone();
        distinct.dedup();

        let mut cuts: Vec<f64> = if distinct.len() <= max_bin {
            distinct
                .windows(2)
                .map(|pair| pair[0] / 2.0 + pair[1] / 2.0)
                .collect()
        } else {
            let n = sorted.len();
            (1..max_bin).map(|k| sorted[k * n / max_bin]).collect()
        };
        cuts.dedup();
        // A cut at the maximum would leave the last bin empty.
        if let (Some(&last_cut), Some(&max)) = (cuts.last(), sorted.last()) {
            if last_cut >= max {
                cuts.pop();
            }
        }

        Self { cuts }
    }

    pub fn n_bins(&self) -> usize {
        self.cuts.len() + 1
    }

    pub fn bin(&self, value: f64) -> u16 {
        if value.is_nan() {
            MISSING_BIN
        } else {
            self.cuts.partition_point(|&cut| cut < value) as u16
        }
    }

    /// Raw-value threshold equivalent to "bin <= `bin`".
    pub fn threshold(&self, bin: usize) -> f64 {
        self.cuts[bin]
    }
}

/// Column-major bin indices for a training matrix.
#[derive(Debug, Clone)]
pub struct BinnedMatrix {
    n_rows: usize,
    mappers: Vec<BinMapper>,
    bins: Vec<u16>,
}

impl BinnedMatrix {
    pub fn from_dense(matrix: &DenseMatrix, max_bin: usize) -> Self {
        let n_rows = matrix.n_rows();
        let n_features = matrix.n_cols();
        let mut mappers = Vec::with_capacity(n_features);
        let mut bins = Vec::with_capacity(n_rows * n_features);

        for feature in 0..n_features {
            let column: Vec<f64> = matrix.rows().map(|row| row[feature]).collect();
            let mapper = BinMapper::fit(column.iter().copied(), max_bin);
            bins.extend(column.iter().map(|&value| mapper.bin(value)));
            mappers.push(mapper);
        }

        Self {
            n_rows,
            mappers,
            bins,
        }
    }

    pub fn n_rows(&self) -> usize {
        self.n_rows
    }

    pub fn n_features(&self) -> usize {
        self.mappers.len()
    }

    pub fn mapper(&self, feature: usize) -> &BinMapper {
        &self.mappers[feature]
    }

    pub fn feature_bins(&self, feature: usize) -> &[u16] {
        let start = feature * self.n_rows;
        &self.bins[start..start + self.n_rows]
    }
}
