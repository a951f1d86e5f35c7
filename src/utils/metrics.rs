//! Metrics Module for Model Evaluation
//!
//! Confusion matrix and the per-class recall derived from it.

use serde::{Deserialize, Serialize};

/// Confusion matrix over `num_classes` labels
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfusionMatrix {
    /// Number of classes
    pub num_classes: usize,

    /// Matrix data (row = actual, column = predicted)
    /// Stored as a flat vector in row-major order
    pub matrix: Vec<usize>,
}

impl Default for ConfusionMatrix {
    fn default() -> Self {
        Self::new(0)
    }
}

impl ConfusionMatrix {
    /// Create a new empty confusion matrix
    pub fn new(num_classes: usize) -> Self {
        Self {
            num_classes,
            matrix: vec![0; num_classes * num_classes],
        }
    }

    /// Create confusion matrix from predictions and ground truth
    pub fn from_predictions(
        predictions: &[usize],
        ground_truth: &[usize],
        num_classes: usize,
    ) -> Self {
        let mut cm = Self::new(num_classes);

        for (&pred, &actual) in predictions.iter().zip(ground_truth.iter()) {
            cm.add(actual, pred);
        }

        cm
    }

    /// Add a single prediction to the matrix
    pub fn add(&mut self, actual: usize, predicted: usize) {
        if actual < self.num_classes && predicted < self.num_classes {
            let idx = actual * self.num_classes + predicted;
            self.matrix[idx] += 1;
        }
    }

    /// Get the count at (actual, predicted)
    pub fn get(&self, actual: usize, predicted: usize) -> usize {
        if actual < self.num_classes && predicted < self.num_classes {
            self.matrix[actual * self.num_classes + predicted]
        } else {
            0
        }
    }

    /// Get the total count
    pub fn total(&self) -> usize {
        self.matrix.iter().sum()
    }

    /// Get the number of correct predictions (diagonal sum)
    pub fn correct(&self) -> usize {
        (0..self.num_classes).map(|i| self.get(i, i)).sum()
    }

    /// Get overall accuracy
    pub fn accuracy(&self) -> f64 {
        let total = self.total();
        if total > 0 {
            self.correct() as f64 / total as f64
        } else {
            0.0
        }
    }

    /// Fraction of each actual class that was predicted correctly.
    /// Classes without samples report `None`.
    pub fn per_class_recall(&self) -> Vec<Option<f64>> {
        (0..self.num_classes)
            .map(|row| {
                let support: usize = (0..self.num_classes).map(|col| self.get(row, col)).sum();
                if support > 0 {
                    Some(self.get(row, row) as f64 / support as f64)
                } else {
                    None
                }
            })
            .collect()
    }

    /// Render the matrix as a small table with the given class names
    pub fn display(&self, class_names: &[String]) -> String {
        let mut output = String::from("Confusion matrix (rows=actual, cols=predicted):\n");
        let width = class_names
            .iter()
            .map(|n| n.len())
            .max()
            .unwrap_or(0)
            .max(6);

        output.push_str(&format!("{:width$}", "", width = width));
        for col in 0..self.num_classes {
            let name = class_names.get(col).map(String::as_str).unwrap_or("?");
            output.push_str(&format!(" {:>width$}", name, width = width));
        }
        output.push('\n');

        for row in 0..self.num_classes {
            let name = class_names.get(row).map(String::as_str).unwrap_or("?");
            output.push_str(&format!("{:width$}", name, width = width));
            for col in 0..self.num_classes {
                output.push_str(&format!(" {:>width$}", self.get(row, col), width = width));
            }
            output.push('\n');
        }

        output
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_confusion_matrix_counts() {
        let predictions = vec![0, 1, 1, 0, 1];
        let ground_truth = vec![0, 1, 0, 0, 1];

        let cm = ConfusionMatrix::from_predictions(&predictions, &ground_truth, 2);

        assert_eq!(cm.get(0, 0), 2);
        assert_eq!(cm.get(0, 1), 1);
        assert_eq!(cm.get(1, 1), 2);
        assert_eq!(cm.total(), 5);
        assert_eq!(cm.correct(), 4);
        assert!((cm.accuracy() - 0.8).abs() < 1e-9);
    }

    #[test]
    fn test_per_class_recall_skips_empty_classes() {
        let cm = ConfusionMatrix::from_predictions(&[0, 0, 1], &[0, 0, 0], 3);
        let recall = cm.per_class_recall();

        assert!((recall[0].unwrap() - 2.0 / 3.0).abs() < 1e-9);
        assert_eq!(recall[1], None);
        assert_eq!(recall[2], None);
    }

    #[test]
    fn test_out_of_range_labels_are_ignored() {
        let mut cm = ConfusionMatrix::new(2);
        cm.add(5, 0);
        cm.add(0, 7);
        assert_eq!(cm.total(), 0);
        assert_eq!(cm.accuracy(), 0.0);
    }

    #[test]
    fn test_display_contains_class_names() {
        let cm = ConfusionMatrix::from_predictions(&[0, 1], &[0, 1], 2);
        let rendered = cm.display(&["cat".to_string(), "dog".to_string()]);
        assert!(rendered.contains("cat"));
        assert!(rendered.contains("dog"));
    }
}
