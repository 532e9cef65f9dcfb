//! Trip record loading.
//!
//! Reads a monthly trip file, derives the `duration` target in minutes and
//! drops trips outside the plausible 1 to 60 minute window.

use std::fs::File;
use std::path::Path;

use chrono::NaiveDateTime;
use polars::prelude::*;
use tracing::info;

use crate::error::{PipelineError, PipelineResult};

pub const PICKUP_COLUMN: &str = "lpep_pickup_datetime";
pub const DROPOFF_COLUMN: &str = "lpep_dropoff_datetime";
pub const PICKUP_ZONE_COLUMN: &str = "PULocationID";
pub const DROPOFF_ZONE_COLUMN: &str = "DOLocationID";
pub const DURATION_COLUMN: &str = "duration";

pub const MIN_DURATION_MINUTES: f64 = 1.0;
pub const MAX_DURATION_MINUTES: f64 = 60.0;

const MICROS_PER_MINUTE: f64 = 60_000_000.0;
const MICROS_PER_DAY: i64 = 86_400_000_000;

const TIMESTAMP_FORMATS: [&str; 4] = [
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
];

/// Load a Parquet or CSV trip file and prepare it for training.
pub fn load_trip_data(path: impl AsRef<Path>) -> PipelineResult<DataFrame> {
    let path = path.as_ref();
    let source_name = path.display().to_string();

    let raw = read_table(path)?;
    info!(
        "Loaded {} rows and {} columns from {}",
        raw.height(),
        raw.width(),
        source_name
    );

    prepare_trips(raw, &source_name)
}

fn read_table(path: &Path) -> PipelineResult<DataFrame> {
    let source_name = path.display().to_string();
    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase);

    let frame = match extension.as_deref() {
        Some("parquet") => ParquetReader::new(File::open(path)?).finish(),
        Some("csv") => CsvReader::new(File::open(path)?).has_header(true).finish(),
        _ => {
            return Err(PipelineError::data_format(
                source_name,
                "expected a .parquet or .csv file",
            ))
        }
    };

    frame.map_err(|err| PipelineError::data_format(source_name, err.to_string()))
}

/// Derive `duration`, filter outliers and normalise column types.
///
/// Timestamps end up as microsecond datetimes and zone identifiers as text.
/// Rows with a null timestamp are dropped along with those outside
/// `[MIN_DURATION_MINUTES, MAX_DURATION_MINUTES]`. Running this on its own
/// output keeps the same rows.
pub fn prepare_trips(mut trips: DataFrame, source_name: &str) -> PipelineResult<DataFrame> {
    let pickup = timestamp_micros(&trips, PICKUP_COLUMN, source_name)?;
    let dropoff = timestamp_micros(&trips, DROPOFF_COLUMN, source_name)?;
    for zone in [PICKUP_ZONE_COLUMN, DROPOFF_ZONE_COLUMN] {
        require_column(&trips, zone, source_name)?;
    }

    let durations: Vec<Option<f64>> = pickup
        .iter()
        .zip(&dropoff)
        .map(|(pickup, dropoff)| match (pickup, dropoff) {
            (Some(start), Some(end)) => Some((end - start) as f64 / MICROS_PER_MINUTE),
            _ => None,
        })
        .collect();
    let keep: Vec<bool> = durations
        .iter()
        .map(|duration| duration.is_some_and(is_valid_duration))
        .collect();

    trips.with_column(datetime_series(PICKUP_COLUMN, pickup)?)?;
    trips.with_column(datetime_series(DROPOFF_COLUMN, dropoff)?)?;
    trips.with_column(Series::new(DURATION_COLUMN, durations))?;
    for zone in [PICKUP_ZONE_COLUMN, DROPOFF_ZONE_COLUMN] {
        let as_text = trips.column(zone)?.cast(&DataType::String)?;
        trips.with_column(as_text)?;
    }

    let mask = BooleanChunked::from_slice("keep", &keep);
    let filtered = trips.filter(&mask)?;
    info!(
        "Kept {} of {} trips from {} with duration in [{}, {}] minutes",
        filtered.height(),
        keep.len(),
        source_name,
        MIN_DURATION_MINUTES,
        MAX_DURATION_MINUTES
    );

    Ok(filtered)
}

pub fn is_valid_duration(minutes: f64) -> bool {
    (MIN_DURATION_MINUTES..=MAX_DURATION_MINUTES).contains(&minutes)
}

fn require_column<'a>(
    trips: &'a DataFrame,
    column: &str,
    source_name: &str,
) -> PipelineResult<&'a Series> {
    trips.column(column).map_err(|_| {
        PipelineError::data_format(source_name, format!("missing required column `{column}`"))
    })
}

/// Read a timestamp column as microseconds since the epoch.
fn timestamp_micros(
    trips: &DataFrame,
    column: &str,
    source_name: &str,
) -> PipelineResult<Vec<Option<i64>>> {
    let series = require_column(trips, column, source_name)?;

    match series.dtype() {
        DataType::Datetime(unit, _) => {
            let unit = *unit;
            let physical = series.cast(&DataType::Int64)?;
            let values = physical
                .i64()?
                .into_iter()
                .map(|value| value.map(|value| to_micros(value, unit)))
                .collect();
            Ok(values)
        }
        DataType::Date => {
            let physical = series.cast(&DataType::Int32)?;
            let values = physical
                .i32()?
                .into_iter()
                .map(|days| days.map(|days| i64::from(days) * MICROS_PER_DAY))
                .collect();
            Ok(values)
        }
        DataType::String => series
            .str()?
            .into_iter()
            .map(|text| match text.map(str::trim) {
                None | Some("") => Ok(None),
                Some(text) => parse_timestamp(text).map(Some).ok_or_else(|| {
                    PipelineError::data_format(
                        source_name,
                        format!("column `{column}` has unparsable timestamp `{text}`"),
                    )
                }),
            })
            .collect(),
        other => Err(PipelineError::data_format(
            source_name,
            format!("column `{column}` has type {other}, expected a timestamp"),
        )),
    }
}

fn to_micros(value: i64, unit: TimeUnit) -> i64 {
    match unit {
        TimeUnit::Nanoseconds => value / 1_000,
        TimeUnit::Microseconds => value,
        TimeUnit::Milliseconds => value * 1_000,
    }
}

fn parse_timestamp(text: &str) -> Option<i64> {
    TIMESTAMP_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(text, format).ok())
        .map(|timestamp| timestamp.and_utc().timestamp_micros())
}

fn datetime_series(name: &str, micros: Vec<Option<i64>>) -> PolarsResult<Series> {
    Series::new(name, micros).cast(&DataType::Datetime(TimeUnit::Microseconds, None))
}
