use std::path::Path;

use tracing::info;

use crate::config::dataset_name;
use crate::error::PipelineResult;

/// Make sure the trip file at `path` exists, fetching it from `base_url` if not.
///
/// The remote file name is the local file name, so `data/green_tripdata_2021-01.parquet`
/// is fetched from `<base_url>/green_tripdata_2021-01.parquet`.
pub fn ensure_trip_file(path: &Path, base_url: &str) -> PipelineResult<()> {
    if path.exists() {
        return Ok(());
    }

    let url = trip_file_url(base_url, path);
    info!("Downloading {} to {}", url, path.display());

    // error_for_status turns 404s for unpublished months into errors
    let response = reqwest::blocking::get(&url)?.error_for_status()?;
    let bytes = response.bytes()?;

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, &bytes)?;

    info!("Downloaded {} bytes", bytes.len());
    Ok(())
}

fn trip_file_url(base_url: &str, path: &Path) -> String {
    format!("{}/{}", base_url.trim_end_matches('/'), dataset_name(path))
}
