use std::collections::HashSet;
use std::path::Path;

use bitflags::bitflags;
use bstr::ByteSlice;
use cqdb::CQDB;
use ndarray::Array2;

use crate::dataset::LabelSet;
use crate::dictionary::Dictionary;
use crate::error::{Error, Result};
use crate::matrix::LabelMatrix;
use crate::model_writer::ModelWriter;
use crate::train::likelihood::{posterior_into, WorkerTerms};

pub(crate) const MAGIC: &[u8; 4] = b"lLBM";
pub(crate) const MODEL_TYPE: &[u8; 4] = b"GENM";
pub(crate) const VERSION: u32 = 1;
pub(crate) const HEADER_SIZE: usize = 48;
pub(crate) const CHUNK_SIZE: usize = 12;

bitflags! {
    /// Optional model components recorded in the file header
    #[derive(Default)]
    pub(crate) struct ModelFlags: u32 {
        /// Per-worker propensity weights follow the accuracy weights
        const PROPENSITY = 0x01;
    }
}

#[inline]
fn unpack_u32(buf: &[u8], index: usize) -> Result<u32> {
    buf.get(index..index + 4)
        .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .ok_or(Error::InvalidModel("not enough data for unpacking u32"))
}

#[inline]
fn unpack_f64(buf: &[u8], index: usize) -> Result<f64> {
    buf.get(index..index + 8)
        .map(|b| f64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]))
        .ok_or(Error::InvalidModel("not enough data for unpacking f64"))
}

/// One row where the predicted class differs from gold
#[derive(Debug, Clone, PartialEq)]
pub struct Mismatch {
    /// Row index in the scored matrix
    pub row: usize,
    /// Item identifier of the row
    pub item: String,
    /// Predicted code, `None` when there was nothing to predict from
    pub predicted: Option<u32>,
    /// Gold code
    pub gold: u32,
}

/// Accuracy of predictions against gold labels
#[derive(Debug, Clone, PartialEq)]
pub struct Score {
    /// `correct / total`, `0.0` when no row has gold
    pub accuracy: f64,
    pub correct: usize,
    /// Rows with a gold label
    pub total: usize,
    pub mismatches: Vec<Mismatch>,
}

impl Score {
    /// Compare predictions with gold, skipping rows without gold
    pub(crate) fn from_predictions(
        matrix: &LabelMatrix,
        predicted: &[Option<u32>],
        gold: &[Option<u32>],
    ) -> Self {
        let mut correct = 0;
        let mut total = 0;
        let mut mismatches = Vec::new();
        for (row, (&pred, &truth)) in predicted.iter().zip(gold.iter()).enumerate() {
            let Some(truth) = truth else { continue };
            total += 1;
            if pred == Some(truth) {
                correct += 1;
            } else {
                mismatches.push(Mismatch {
                    row,
                    item: matrix.item_id(row).unwrap_or_default().to_string(),
                    predicted: pred,
                    gold: truth,
                });
            }
        }
        let accuracy = if total > 0 {
            correct as f64 / total as f64
        } else {
            0.0
        };
        Self {
            accuracy,
            correct,
            total,
            mismatches,
        }
    }
}

/// A fitted generative label model
///
/// Holds one accuracy weight per worker (and one propensity weight when
/// propensity was modeled). Workers are identified by name, so the model can
/// be applied to any matrix whose columns share worker identifiers with the
/// training matrix; unknown workers are ignored.
#[derive(Debug, Clone, PartialEq)]
pub struct LabelModel {
    cardinality: usize,
    workers: Dictionary,
    classes: Option<LabelSet>,
    accuracy: Vec<f64>,
    propensity: Option<Vec<f64>>,
}

impl LabelModel {
    pub(crate) fn new(
        cardinality: usize,
        workers: Dictionary,
        accuracy: Vec<f64>,
        propensity: Option<Vec<f64>>,
    ) -> Self {
        Self {
            cardinality,
            workers,
            classes: None,
            accuracy,
            propensity,
        }
    }

    /// Build a model from known weights, one accuracy (and optionally one
    /// propensity) weight per worker in dictionary order.
    pub fn from_weights(
        cardinality: usize,
        workers: Dictionary,
        accuracy: Vec<f64>,
        propensity: Option<Vec<f64>>,
    ) -> Result<Self> {
        if cardinality < 2 {
            return Err(Error::Cardinality(format!(
                "cardinality {} is below 2",
                cardinality
            )));
        }
        if accuracy.len() != workers.len() {
            return Err(Error::LengthMismatch {
                expected: workers.len(),
                actual: accuracy.len(),
            });
        }
        if let Some(p) = &propensity {
            if p.len() != workers.len() {
                return Err(Error::LengthMismatch {
                    expected: workers.len(),
                    actual: p.len(),
                });
            }
        }
        if accuracy
            .iter()
            .chain(propensity.iter().flatten())
            .any(|w| !w.is_finite())
        {
            return Err(Error::param("worker weights must be finite"));
        }
        Ok(Self::new(cardinality, workers, accuracy, propensity))
    }

    /// Attach class names; the label set must have exactly `cardinality` classes
    pub fn with_labels(mut self, labels: LabelSet) -> Result<Self> {
        if labels.len() != self.cardinality {
            return Err(Error::Cardinality(format!(
                "label set has {} classes, model has {}",
                labels.len(),
                self.cardinality
            )));
        }
        self.classes = Some(labels);
        Ok(self)
    }

    /// Number of classes
    pub fn cardinality(&self) -> usize {
        self.cardinality
    }

    /// Worker dictionary (model index ↔ worker id)
    pub fn workers(&self) -> &Dictionary {
        &self.workers
    }

    pub fn labels(&self) -> Option<&LabelSet> {
        self.classes.as_ref()
    }

    /// Raw accuracy weights, one per worker
    pub fn accuracy_weights(&self) -> &[f64] {
        &self.accuracy
    }

    /// Raw propensity weights when propensity was modeled
    pub fn propensity_weights(&self) -> Option<&[f64]> {
        self.propensity.as_deref()
    }

    fn terms(&self, j: usize) -> WorkerTerms {
        let p = self.propensity.as_ref().map(|p| p[j]);
        WorkerTerms::new(self.accuracy[j], p, self.cardinality)
    }

    /// Estimated probability that each worker's vote is correct, given that they voted
    pub fn worker_accuracies(&self) -> Vec<f64> {
        (0..self.accuracy.len())
            .map(|j| {
                let terms = WorkerTerms::new(self.accuracy[j], None, self.cardinality);
                terms.p_correct
            })
            .collect()
    }

    /// Estimated probability that each worker votes at all
    pub fn propensities(&self) -> Option<Vec<f64>> {
        self.propensity
            .as_ref()
            .map(|p| (0..p.len()).map(|j| self.terms(j).p_vote).collect())
    }

    /// Map matrix columns to model worker indices
    fn column_map(&self, matrix: &LabelMatrix) -> Vec<Option<usize>> {
        (0..matrix.num_workers())
            .map(|col| {
                matrix
                    .worker_id(col)
                    .and_then(|id| self.workers.get(id))
                    .map(|j| j as usize)
            })
            .collect()
    }

    /// Posterior distribution over the classes for every row
    ///
    /// Rows without votes from known workers get the uniform distribution.
    pub fn marginals(&self, matrix: &LabelMatrix) -> Result<Array2<f64>> {
        let max_code = matrix.max_code() as usize;
        if max_code > self.cardinality {
            return Err(Error::Cardinality(format!(
                "label code {} exceeds cardinality {}",
                max_code, self.cardinality
            )));
        }

        let columns = self.column_map(matrix);
        let mut marginals = Array2::zeros((matrix.num_items(), self.cardinality));
        let mut scores = vec![0.0; self.cardinality];
        for row in 0..matrix.num_items() {
            let votes = matrix.row(row).iter().filter_map(|&(col, code)| {
                columns[col as usize].map(|j| (self.accuracy[j], code))
            });
            posterior_into(votes, &mut scores);
            for (dst, &p) in marginals.row_mut(row).iter_mut().zip(scores.iter()) {
                *dst = p;
            }
        }
        Ok(marginals)
    }

    /// Maximum-a-posteriori class code per row; ties go to the lowest code
    pub fn predict(&self, matrix: &LabelMatrix) -> Result<Vec<u32>> {
        let marginals = self.marginals(matrix)?;
        Ok(marginals
            .outer_iter()
            .map(|probs| {
                let mut best = 0;
                for (y, &p) in probs.iter().enumerate() {
                    if p > probs[best] {
                        best = y;
                    }
                }
                best as u32 + 1
            })
            .collect())
    }

    /// Score MAP predictions against gold codes aligned to the matrix rows
    pub fn score(&self, matrix: &LabelMatrix, gold: &[Option<u32>]) -> Result<Score> {
        if gold.len() != matrix.num_items() {
            return Err(Error::LengthMismatch {
                expected: matrix.num_items(),
                actual: gold.len(),
            });
        }

        let distinct: HashSet<u32> = gold.iter().flatten().copied().collect();
        if !distinct.is_empty() && distinct.len() != self.cardinality {
            tracing::warn!(
                gold_classes = distinct.len(),
                cardinality = self.cardinality,
                "cardinality mismatch between model and gold labels"
            );
        }

        let predicted: Vec<Option<u32>> = self.predict(matrix)?.into_iter().map(Some).collect();
        Ok(Score::from_predictions(matrix, &predicted, gold))
    }

    /// Write the model to a file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        ModelWriter::write(path.as_ref(), self)
    }

    pub(crate) fn flags(&self) -> ModelFlags {
        let mut flags = ModelFlags::default();
        if self.propensity.is_some() {
            flags |= ModelFlags::PROPENSITY;
        }
        flags
    }

    /// Create a model from a model file in memory
    pub fn from_bytes(buf: &[u8]) -> Result<Self> {
        if buf.len() < HEADER_SIZE {
            return Err(Error::InvalidModel("file too small"));
        }
        if &buf[0..4] != MAGIC {
            return Err(Error::InvalidModel("magic mismatch"));
        }
        let size = unpack_u32(buf, 4)? as usize;
        if size != buf.len() {
            return Err(Error::InvalidModel("size mismatch"));
        }
        if &buf[8..12] != MODEL_TYPE {
            return Err(Error::InvalidModel("unknown model type"));
        }
        if unpack_u32(buf, 12)? != VERSION {
            return Err(Error::InvalidModel("unsupported version"));
        }
        let flags = ModelFlags::from_bits(unpack_u32(buf, 16)?)
            .ok_or(Error::InvalidModel("unknown flags"))?;
        let cardinality = unpack_u32(buf, 20)? as usize;
        let num_workers = unpack_u32(buf, 24)? as usize;
        let off_params = unpack_u32(buf, 28)? as usize;
        let off_workers = unpack_u32(buf, 32)? as usize;
        let off_labels = unpack_u32(buf, 36)? as usize;
        if cardinality < 2 {
            return Err(Error::InvalidModel("cardinality below 2"));
        }

        // Parameter chunk
        if buf.get(off_params..off_params + 4) != Some(b"PARM".as_slice()) {
            return Err(Error::InvalidModel("missing parameter chunk"));
        }
        let num_params = unpack_u32(buf, off_params + 8)? as usize;
        let expected = if flags.contains(ModelFlags::PROPENSITY) {
            2 * num_workers
        } else {
            num_workers
        };
        if num_params != expected {
            return Err(Error::InvalidModel("parameter count mismatch"));
        }
        let params = (0..num_params)
            .map(|i| unpack_f64(buf, off_params + CHUNK_SIZE + 8 * i))
            .collect::<Result<Vec<f64>>>()?;

        let workers = read_dictionary(buf, off_workers, num_workers)?;
        let labels = if off_labels == 0 {
            None
        } else {
            let names = read_dictionary(buf, off_labels, cardinality)?;
            Some(LabelSet::new(names.iter().map(|(name, _)| name)))
        };

        let mut accuracy = params;
        let propensity = flags
            .contains(ModelFlags::PROPENSITY)
            .then(|| accuracy.split_off(num_workers));
        let model = Self::from_weights(cardinality, workers, accuracy, propensity)
            .map_err(|_| Error::InvalidModel("invalid worker weights"))?;
        match labels {
            Some(labels) => model.with_labels(labels),
            None => Ok(model),
        }
    }
}

/// Read `count` ids of a CQDB chunk back into a dictionary
fn read_dictionary(buf: &[u8], offset: usize, count: usize) -> Result<Dictionary> {
    let chunk = buf
        .get(offset..)
        .ok_or(Error::InvalidModel("dictionary offset out of range"))?;
    let db = CQDB::new(chunk)?;
    let mut dict = Dictionary::new();
    for id in 0..count as u32 {
        let name = db
            .to_str(id)
            .and_then(|s| s.to_str().ok())
            .ok_or(Error::InvalidModel("missing dictionary entry"))?;
        if dict.get_or_insert(name) != id {
            return Err(Error::InvalidModel("duplicate dictionary entry"));
        }
    }
    Ok(dict)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::train::Trainer;

    fn matrix() -> LabelMatrix {
        LabelMatrix::from_rows(
            ["silent"],
            vec![
                ("item1", "w1", 1),
                ("item1", "w2", 1),
                ("item1", "w3", 2),
                ("item2", "w1", 2),
                ("item2", "w2", 2),
                ("item2", "w3", 2),
                ("item3", "w1", 1),
                ("item3", "w2", 2),
                ("item3", "w3", 1),
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_equal_accuracies_reduce_to_majority_vote() {
        let matrix = matrix();
        let workers: Dictionary = ["w1", "w2", "w3"].into_iter().collect();
        let model = LabelModel::new(2, workers, vec![0.7; 3], None);
        assert_eq!(model.predict(&matrix).unwrap(), vec![1, 1, 2, 1]);
    }

    #[test]
    fn test_unknown_workers_are_ignored() {
        let workers: Dictionary = ["w1"].into_iter().collect();
        let model = LabelModel::new(2, workers, vec![2.0], None);
        let matrix = LabelMatrix::from_votes(vec![("a", "w1", 2), ("a", "stranger", 1)]).unwrap();
        let marginals = model.marginals(&matrix).unwrap();
        let expected = 2f64.exp() / (2f64.exp() + 1.0);
        assert!((marginals[[0, 1]] - expected).abs() < 1e-12);
    }

    #[test]
    fn test_marginals_reject_codes_above_cardinality() {
        let workers: Dictionary = ["w1"].into_iter().collect();
        let model = LabelModel::new(2, workers, vec![1.0], None);
        let matrix = LabelMatrix::from_votes(vec![("a", "w1", 3)]).unwrap();
        assert!(matches!(model.marginals(&matrix), Err(Error::Cardinality(_))));
    }

    #[test]
    fn test_score_reports_mismatches() {
        let matrix = matrix();
        let workers: Dictionary = ["w1", "w2", "w3"].into_iter().collect();
        let model = LabelModel::new(2, workers, vec![1.0; 3], None);
        let score = model
            .score(&matrix, &[None, Some(1), Some(2), Some(2)])
            .unwrap();
        assert_eq!(score.total, 3);
        assert_eq!(score.correct, 2);
        assert_eq!(score.mismatches.len(), 1);
        assert_eq!(score.mismatches[0].row, 3);
        assert_eq!(score.mismatches[0].item, "item3");
        assert_eq!(score.mismatches[0].predicted, Some(1));
        assert!((score.accuracy - 2.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_flags() {
        let workers: Dictionary = ["w1"].into_iter().collect();
        let plain = LabelModel::new(2, workers.clone(), vec![1.0], None);
        assert!(plain.flags().is_empty());
        let with_propensity = LabelModel::new(2, workers, vec![1.0], Some(vec![0.0]));
        assert_eq!(with_propensity.flags(), ModelFlags::PROPENSITY);
        assert_eq!(with_propensity.propensities().unwrap().len(), 1);
    }

    #[test]
    fn test_from_bytes_rejects_garbage() {
        assert!(matches!(
            LabelModel::from_bytes(b"lLBM"),
            Err(Error::InvalidModel(_))
        ));
        let mut buf = vec![0u8; HEADER_SIZE];
        buf[0..4].copy_from_slice(b"nope");
        assert!(matches!(
            LabelModel::from_bytes(&buf),
            Err(Error::InvalidModel("magic mismatch"))
        ));
    }

    #[test]
    fn test_trained_model_round_trips_through_file() {
        let matrix = matrix();
        let model = Trainer::lbfgs()
            .with_propensity(true)
            .with_epochs(30)
            .unwrap()
            .train(&matrix)
            .unwrap()
            .with_labels(LabelSet::new(["negative", "positive"]))
            .unwrap();

        let file = tempfile::NamedTempFile::new().unwrap();
        model.save(file.path()).unwrap();
        let buf = std::fs::read(file.path()).unwrap();
        let loaded = LabelModel::from_bytes(&buf).unwrap();
        assert_eq!(loaded, model);
    }

    #[test]
    fn test_from_bytes_rejects_non_finite_weights() {
        let model = Trainer::lbfgs().with_epochs(10).unwrap().train(&matrix()).unwrap();
        let file = tempfile::NamedTempFile::new().unwrap();
        model.save(file.path()).unwrap();
        let mut buf = std::fs::read(file.path()).unwrap();
        assert!(LabelModel::from_bytes(&buf).is_ok());

        let off_params = unpack_u32(&buf, 28).unwrap() as usize;
        assert_eq!(&buf[off_params..off_params + 4], b"PARM");
        let first = off_params + CHUNK_SIZE;
        for bad in [f64::NAN, f64::INFINITY] {
            buf[first..first + 8].copy_from_slice(&bad.to_le_bytes());
            assert!(matches!(
                LabelModel::from_bytes(&buf),
                Err(Error::InvalidModel("invalid worker weights"))
            ));
        }
    }
}
