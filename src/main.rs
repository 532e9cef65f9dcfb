use trip_duration_predictor::{logging, nyc_duration_flow};

// training script and entry point
// Steps
// 1. Read trip_duration.toml if present, otherwise use the defaults
// 2. Load the January (train) and February (validation) trip files
// 3. Build feature matrices and label vectors, retried up to 3 times
// 4. Fit the boosted-tree model and record the run in the tracking store
// 5. Re-evaluate the model on the validation split

fn main() -> anyhow::Result<()> {
    logging::init()?;
    nyc_duration_flow()
}
