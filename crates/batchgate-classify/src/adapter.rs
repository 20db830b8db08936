//! `ClassifierAdapter` — logits model → per-item `Classification`.

use std::collections::{BTreeMap, HashSet};

use batchgate_core::ExecutionAdapter;
use serde::Serialize;
use tracing::debug;

use crate::error::ClassifyError;
use crate::softmax::{argmax, round4, softmax};

/// Labels flagged by default (compared case-insensitively).
pub const DEFAULT_FLAGGED_LABELS: &[&str] = &["nsfw", "unsafe", "adult", "porn", "hentai", "sexy"];

/// A loaded model producing raw scores.
///
/// Loading, preprocessing and the forward pass itself live behind this trait.
pub trait LogitsModel: Send + Sync + 'static {
    type Input: Clone + Send + 'static;

    /// One row of logits per input, in input order.
    fn forward(&self, inputs: &[Self::Input]) -> anyhow::Result<Vec<Vec<f32>>>;

    /// Label for each logit column.
    fn labels(&self) -> &[String];
}

/// Result for one classified item, in the handler's wire shape.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Classification {
    #[serde(rename = "is_nsfw")]
    pub flagged: bool,
    pub predicted_class: String,
    pub confidence: f64,
    pub scores: BTreeMap<String, f64>,
}

/// Wraps a [`LogitsModel`] as an [`ExecutionAdapter`].
pub struct ClassifierAdapter<M> {
    model: M,
    flagged: HashSet<String>,
}

impl<M: LogitsModel> ClassifierAdapter<M> {
    pub fn new(model: M) -> Self {
        Self {
            model,
            flagged: DEFAULT_FLAGGED_LABELS.iter().map(|l| l.to_string()).collect(),
        }
    }

    /// Replace the set of labels that mark an item as flagged.
    pub fn with_flagged_labels<I, S>(mut self, labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.flagged = labels
            .into_iter()
            .map(|l| l.as_ref().to_lowercase())
            .collect();
        self
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    /// Classify one row of logits. `row` is only used in error messages.
    pub fn classify_row(&self, row: usize, logits: &[f32]) -> Result<Classification, ClassifyError> {
        let labels = self.model.labels();
        if labels.is_empty() {
            return Err(ClassifyError::NoLabels);
        }
        if logits.len() != labels.len() {
            return Err(ClassifyError::RowWidth {
                row,
                expected: labels.len(),
                actual: logits.len(),
            });
        }
        if logits.iter().any(|x| !x.is_finite()) {
            return Err(ClassifyError::NonFinite { row });
        }

        let probs = softmax(logits);
        let best = argmax(&probs).ok_or(ClassifyError::NoLabels)?;
        let predicted_class = labels[best].clone();
        let flagged = self.flagged.contains(&predicted_class.to_lowercase());
        let scores = labels
            .iter()
            .zip(&probs)
            .map(|(label, &p)| (label.clone(), round4(p)))
            .collect();

        Ok(Classification {
            flagged,
            predicted_class,
            confidence: round4(probs[best]),
            scores,
        })
    }
}

impl<M: LogitsModel> ExecutionAdapter for ClassifierAdapter<M> {
    type Input = M::Input;
    type Output = Classification;

    fn execute(&self, inputs: Vec<M::Input>) -> anyhow::Result<Vec<Classification>> {
        let rows = self.model.forward(&inputs)?;
        if rows.len() != inputs.len() {
            return Err(ClassifyError::RowCount {
                expected: inputs.len(),
                actual: rows.len(),
            }
            .into());
        }

        let results = rows
            .iter()
            .enumerate()
            .map(|(i, logits)| self.classify_row(i, logits))
            .collect::<Result<Vec<_>, _>>()?;
        debug!(
            size = results.len(),
            flagged = results.iter().filter(|c| c.flagged).count(),
            "classified batch"
        );
        Ok(results)
    }

    fn name(&self) -> &str {
        "classifier"
    }
}

/// `n` placeholder inputs for [`RequestGate::warm_up`](batchgate_core::RequestGate::warm_up),
/// typically blank images at the model's input size.
pub fn warmup_inputs<T, F>(n: usize, make: F) -> Vec<T>
where
    F: FnMut() -> T,
{
    std::iter::repeat_with(make).take(n).collect()
}
