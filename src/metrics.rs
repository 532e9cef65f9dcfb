/// Root mean squared error: `sqrt(mean((pred - label)²))`.
///
/// Returns 0 for empty input. Callers check that the slices are aligned.
pub fn rmse(predictions: &[f64], labels: &[f64]) -> f64 {
    debug_assert_eq!(predictions.len(), labels.len());
    if predictions.is_empty() {
        return 0.0;
    }

    let sum_sq: f64 = predictions
        .iter()
        .zip(labels)
        .map(|(pred, label)| {
            let diff = pred - label;
            diff * diff
        })
        .sum();
    (sum_sq / predictions.len() as f64).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn perfect_predictions_have_zero_error() {
        assert_eq!(rmse(&[1.0, 2.0, 3.0], &[1.0, 2.0, 3.0]), 0.0);
    }

    #[test]
    fn matches_hand_computed_value() {
        // errors 1, -2, 2 -> mse 3
        assert_abs_diff_eq!(rmse(&[2.0, 0.0, 5.0], &[1.0, 2.0, 3.0]), 3f64.sqrt(), epsilon = 1e-12);
    }

    #[test]
    fn empty_input_is_zero() {
        assert_eq!(rmse(&[], &[]), 0.0);
    }
}
