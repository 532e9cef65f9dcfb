use crate::dataset::{FeatureMatrix, LabelVector};
use crate::error::{PipelineError, PipelineResult};
use crate::metrics::rmse;
use crate::model::Model;

/// RMSE of `model` on a held-out split.
///
/// Deterministic for a deterministic model; it shares no state with training.
pub fn estimate_quality<M: Model + ?Sized>(
    model: &M,
    features: &FeatureMatrix,
    labels: &LabelVector,
) -> PipelineResult<f64> {
    let predictions = model.predict(features)?;
    if predictions.len() != labels.len() {
        return Err(PipelineError::Prediction(format!(
            "model returned {} predictions for {} labels",
            predictions.len(),
            labels.len()
        )));
    }

    let score = rmse(predictions.values(), labels.values());
    tracing::info!("Held-out rmse: {score:.4}");
    Ok(score)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ModelArtifact;
    use polars::prelude::*;

    /// Predicts a constant for every row.
    struct ConstantModel(f64);

    impl Model for ConstantModel {
        fn predict(&self, features: &FeatureMatrix) -> PipelineResult<LabelVector> {
            Ok(vec![self.0; features.height()].into())
        }

        fn to_artifact(&self) -> PipelineResult<ModelArtifact> {
            Ok(ModelArtifact {
                file_name: "constant.txt".to_string(),
                bytes: self.0.to_string().into_bytes(),
            })
        }
    }

    fn features(rows: usize) -> FeatureMatrix {
        let table = df!(
            "trip_distance" => vec![1.0; rows],
            "extra" => vec![0.0; rows],
            "fare_amount" => vec![5.0; rows],
            "PULocationID" => vec!["1"; rows],
            "DOLocationID" => vec!["2"; rows]
        )
        .unwrap();
        FeatureMatrix::from_table(&table, "validation").unwrap()
    }

    #[test]
    fn scores_predictions_against_labels() {
        let labels = LabelVector::new(vec![8.0, 12.0]);
        let score = estimate_quality(&ConstantModel(10.0), &features(2), &labels).unwrap();
        assert_eq!(score, 2.0);
    }

    #[test]
    fn misaligned_labels_are_rejected() {
        let labels = LabelVector::new(vec![8.0]);
        let err = estimate_quality(&ConstantModel(10.0), &features(2), &labels).unwrap_err();
        assert!(matches!(err, PipelineError::Prediction(_)));
    }
}
