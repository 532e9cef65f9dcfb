//! Seams between the pipeline and the learners behind it.

use crate::dataset::{Datasets, FeatureMatrix, LabelVector};
use crate::error::PipelineResult;

/// Serialized model stored as a run artifact.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelArtifact {
    pub file_name: String,
    pub bytes: Vec<u8>,
}

/// A fitted regressor. Immutable once training returns it.
pub trait Model {
    fn predict(&self, features: &FeatureMatrix) -> PipelineResult<LabelVector>;

    fn to_artifact(&self) -> PipelineResult<ModelArtifact>;

    /// Zero-based boosting round the model was truncated to, if any.
    fn best_iteration(&self) -> Option<usize> {
        None
    }
}

/// A learner that fits a [`Model`] on the train split, monitoring the
/// validation split for early stopping.
pub trait Regressor {
    type Model: Model;

    /// Value of the run's `booster` tag.
    fn name(&self) -> &'static str;

    /// Hyperparameters recorded on the tracking run.
    fn tracked_params(&self) -> Vec<(&'static str, String)>;

    fn fit(&self, datasets: &Datasets) -> PipelineResult<Self::Model>;
}
