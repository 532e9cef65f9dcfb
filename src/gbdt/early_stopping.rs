//! Patience-based early stopping on a validation metric.

/// Tracks the best validation score and signals when it has not improved for
/// `patience` consecutive rounds. Lower scores are better.
#[derive(Debug, Clone)]
pub struct EarlyStopping {
    patience: usize,
    best_value: Option<f64>,
    best_round: usize,
    current_round: usize,
}

impl EarlyStopping {
    pub fn new(patience: usize) -> Self {
        Self {
            patience,
            best_value: None,
            best_round: 0,
            current_round: 0,
        }
    }

    /// Record the score of the next round.
    ///
    /// Returns `true` once `patience` rounds have passed since the best one.
    /// Only a strictly lower score counts as an improvement.
    pub fn should_stop(&mut self, value: f64) -> bool {
        if self.best_value.map_or(true, |best| value < best) {
            self.best_value = Some(value);
            self.best_round = self.current_round;
        }
        self.current_round += 1;

        self.current_round - self.best_round > self.patience
    }

    pub fn best_value(&self) -> Option<f64> {
        self.best_value
    }

    /// Zero-based round of the best score.
    pub fn best_round(&self) -> usize {
        self.best_round
    }
}
