//! Downstream text classifier trained on soft labels

use ndarray::Array2;

use crate::attribute::featurize;
use crate::dictionary::Dictionary;
use crate::error::{Error, Result};
use crate::train::lbfgs_outcome;
use crate::train::likelihood::logsumexp;

/// Downstream classifier parameters.
#[derive(Debug, Clone)]
pub struct ClassifierParams {
    epochs: usize,
    c2: f64,
    min_freq: usize,
    bigrams: bool,
}

impl Default for ClassifierParams {
    fn default() -> Self {
        Self {
            epochs: 100,
            c2: 0.1,
            min_freq: 1,
            bigrams: false,
        }
    }
}

impl ClassifierParams {
    pub fn epochs(&self) -> usize {
        self.epochs
    }

    pub fn set_epochs(&mut self, epochs: usize) -> Result<()> {
        if epochs < 1 {
            return Err(Error::param("epochs must be at least 1"));
        }
        self.epochs = epochs;
        Ok(())
    }

    pub fn c2(&self) -> f64 {
        self.c2
    }

    pub fn set_c2(&mut self, c2: f64) -> Result<()> {
        if !(c2 >= 0.0 && c2.is_finite()) {
            return Err(Error::param("c2 must be non-negative"));
        }
        self.c2 = c2;
        Ok(())
    }

    pub fn min_freq(&self) -> usize {
        self.min_freq
    }

    /// Minimum number of training texts a token must appear in
    pub fn set_min_freq(&mut self, min_freq: usize) -> Result<()> {
        if min_freq < 1 {
            return Err(Error::param("min_freq must be at least 1"));
        }
        self.min_freq = min_freq;
        Ok(())
    }

    pub fn bigrams(&self) -> bool {
        self.bigrams
    }

    pub fn set_bigrams(&mut self, enabled: bool) {
        self.bigrams = enabled;
    }
}

/// Multinomial logistic regression over bag-of-words attributes
///
/// Training minimizes the cross-entropy against probability targets, so the
/// marginals of a label model can be used directly without hardening them.
#[derive(Debug, Clone)]
pub struct SoftmaxClassifier {
    vocab: Dictionary,
    cardinality: usize,
    bigrams: bool,
    /// `[feature * K + class]`, followed by `K` bias weights
    weights: Vec<f64>,
}

type SparseDoc = Vec<(usize, f64)>;

impl SoftmaxClassifier {
    /// Train on texts and their class distributions (one row per text)
    pub fn fit<S: AsRef<str>>(
        texts: &[S],
        targets: &Array2<f64>,
        params: &ClassifierParams,
    ) -> Result<Self> {
        if texts.len() != targets.nrows() {
            return Err(Error::LengthMismatch {
                expected: texts.len(),
                actual: targets.nrows(),
            });
        }
        if texts.is_empty() {
            return Err(Error::EmptyMatrix("no training items"));
        }
        let k = targets.ncols();
        if k < 2 {
            return Err(Error::Cardinality(format!(
                "targets have {} classes, need at least 2",
                k
            )));
        }
        for row in targets.outer_iter() {
            let sum: f64 = row.sum();
            if row.iter().any(|&p| !(p >= 0.0)) || (sum - 1.0).abs() > 1e-6 {
                return Err(Error::param("targets must be probability distributions"));
            }
        }

        let featurized: Vec<_> = texts
            .iter()
            .map(|text| featurize(text.as_ref(), params.bigrams()))
            .collect();

        // Document frequency in first-seen order
        let mut seen = Dictionary::new();
        let mut doc_freq: Vec<usize> = Vec::new();
        for attrs in &featurized {
            for attr in attrs {
                let id = seen.get_or_insert(&attr.name) as usize;
                if id == doc_freq.len() {
                    doc_freq.push(0);
                }
                doc_freq[id] += 1;
            }
        }
        let vocab: Dictionary = seen
            .iter()
            .filter(|&(_, id)| doc_freq[id as usize] >= params.min_freq())
            .map(|(name, _)| name)
            .collect();

        let mut model = Self {
            vocab,
            cardinality: k,
            bigrams: params.bigrams(),
            weights: Vec::new(),
        };
        let docs: Vec<SparseDoc> = featurized
            .iter()
            .map(|attrs| {
                attrs
                    .iter()
                    .filter_map(|a| model.vocab.get(&a.name).map(|f| (f as usize, a.value)))
                    .collect()
            })
            .collect();

        let num_features = model.vocab.len();
        let bias = num_features * k;
        let c2 = params.c2();
        let mut weights = vec![0.0; bias + k];
        let mut scores = vec![0.0; k];
        let mut diverged = false;
        let mut niter = 0;

        tracing::debug!(
            texts = docs.len(),
            features = num_features,
            classes = k,
            "training soft-label classifier"
        );

        let evaluate = |x: &[f64], gx: &mut [f64]| -> anyhow::Result<f64> {
            gx.fill(0.0);
            let mut loss = 0.0;
            for (doc, target) in docs.iter().zip(targets.outer_iter()) {
                scores.copy_from_slice(&x[bias..]);
                for &(f, v) in doc {
                    for y in 0..k {
                        scores[y] += v * x[f * k + y];
                    }
                }
                let log_z = logsumexp(&scores);
                for y in 0..k {
                    let p = (scores[y] - log_z).exp();
                    let diff = p - target[y];
                    loss -= target[y] * (scores[y] - log_z);
                    gx[bias + y] += diff;
                    for &(f, v) in doc {
                        gx[f * k + y] += v * diff;
                    }
                }
            }
            if c2 > 0.0 {
                for i in 0..bias {
                    gx[i] += 2.0 * c2 * x[i];
                    loss += c2 * x[i] * x[i];
                }
            }
            if !loss.is_finite() {
                diverged = true;
                anyhow::bail!("non-finite loss");
            }
            Ok(loss)
        };

        let result = liblbfgs::lbfgs()
            .with_max_iterations(params.epochs())
            .minimize(&mut weights, evaluate, |prgr: &liblbfgs::Progress| {
                niter = prgr.niter;
                false
            })
            .map(|report| report.fx);
        if let Some(loss) = lbfgs_outcome("classifier", result, diverged, niter)? {
            tracing::debug!(loss, "classifier training finished");
        }

        model.weights = weights;
        Ok(model)
    }

    /// Number of classes
    pub fn cardinality(&self) -> usize {
        self.cardinality
    }

    /// Number of features kept from the training texts
    pub fn vocabulary_size(&self) -> usize {
        self.vocab.len()
    }

    /// Class distribution for every text; unseen tokens are ignored
    pub fn predict_proba<S: AsRef<str>>(&self, texts: &[S]) -> Array2<f64> {
        let k = self.cardinality;
        let bias = self.vocab.len() * k;
        let mut probs = Array2::zeros((texts.len(), k));
        let mut scores = vec![0.0; k];
        for (i, text) in texts.iter().enumerate() {
            scores.copy_from_slice(&self.weights[bias..]);
            for attr in featurize(text.as_ref(), self.bigrams) {
                if let Some(f) = self.vocab.get(&attr.name) {
                    let f = f as usize;
                    for y in 0..k {
                        scores[y] += attr.value * self.weights[f * k + y];
                    }
                }
            }
            let log_z = logsumexp(&scores);
            for y in 0..k {
                probs[[i, y]] = (scores[y] - log_z).exp();
            }
        }
        probs
    }

    /// Most probable class code (`1..=K`) per text; ties go to the lowest code
    pub fn predict<S: AsRef<str>>(&self, texts: &[S]) -> Vec<u32> {
        self.predict_proba(texts)
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
            .collect()
    }

    /// Accuracy against hard class codes
    pub fn score<S: AsRef<str>>(&self, texts: &[S], labels: &[u32]) -> Result<f64> {
        if texts.len() != labels.len() {
            return Err(Error::LengthMismatch {
                expected: texts.len(),
                actual: labels.len(),
            });
        }
        if texts.is_empty() {
            return Ok(0.0);
        }
        let correct = self
            .predict(texts)
            .iter()
            .zip(labels)
            .filter(|(p, l)| p == l)
            .count();
        Ok(correct as f64 / texts.len() as f64)
    }
}

#[cfg(test)]
mod tests {
    use ndarray::array;

    use super::*;

    #[test]
    fn test_classifier_params_validation() {
        let mut params = ClassifierParams::default();
        assert_eq!(
            params.set_c2(-1.0).unwrap_err().to_string(),
            "c2 must be non-negative"
        );
        assert!(params.set_epochs(0).is_err());
        assert!(params.set_min_freq(0).is_err());
        assert!(params.set_min_freq(2).is_ok());
    }

    #[test]
    fn test_fit_rejects_misaligned_targets() {
        let texts = ["sunny", "rain"];
        let targets = array![[1.0, 0.0]];
        let err = SoftmaxClassifier::fit(&texts, &targets, &ClassifierParams::default());
        assert!(matches!(err, Err(Error::LengthMismatch { .. })));

        let targets = array![[0.7, 0.7], [0.5, 0.5]];
        assert!(SoftmaxClassifier::fit(&texts, &targets, &ClassifierParams::default()).is_err());
    }

    #[test]
    fn test_min_freq_prunes_vocabulary() {
        let texts = ["sunny day", "sunny morning", "rain"];
        let targets = array![[1.0, 0.0], [1.0, 0.0], [0.0, 1.0]];
        let mut params = ClassifierParams::default();
        params.set_min_freq(2).unwrap();
        params.set_epochs(5).unwrap();
        let clf = SoftmaxClassifier::fit(&texts, &targets, &params).unwrap();
        assert_eq!(clf.vocabulary_size(), 1);
    }

    #[test]
    fn test_fit_on_soft_targets() {
        let texts = [
            "sunny and warm",
            "lovely sunny day",
            "warm sunshine",
            "cold rain again",
            "rain and storm",
            "storm warning cold",
        ];
        let targets = array![
            [0.9, 0.1],
            [0.8, 0.2],
            [0.7, 0.3],
            [0.2, 0.8],
            [0.1, 0.9],
            [0.3, 0.7],
        ];
        let clf = SoftmaxClassifier::fit(&texts, &targets, &ClassifierParams::default()).unwrap();
        assert_eq!(clf.cardinality(), 2);

        let probs = clf.predict_proba(&["sunny", "storm", "unseen words"]);
        for row in probs.outer_iter() {
            assert!((row.sum() - 1.0).abs() < 1e-9);
        }
        assert!(probs[[0, 0]] > 0.5);
        assert!(probs[[1, 1]] > 0.5);

        let accuracy = clf.score(&texts, &[1, 1, 1, 2, 2, 2]).unwrap();
        assert_eq!(accuracy, 1.0);
    }
}
