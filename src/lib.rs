//! Aggregation of noisy crowd labels
//!
//! Several workers each label a subset of items with one of `K` classes. This
//! crate turns those votes into a label matrix, fits a generative model of
//! worker accuracy on it, and produces a posterior distribution over the
//! true class of every item. Majority vote and average worker accuracy are
//! provided as baselines, and a soft-label text classifier can be trained on
//! the posteriors.
//!
//! # Examples
//!
//! ## Training
//!
//! ```no_run
//! use crowdlabel::train::Trainer;
//! use crowdlabel::{baseline, Corpus, MatrixBuilder, Split};
//!
//! let mut corpus = Corpus::new();
//! corpus.read_votes(std::fs::File::open("votes.tsv")?)?;
//! corpus.read_gold(std::fs::File::open("gold.tsv")?)?;
//! corpus.restrict_to_gold();
//! corpus.assign_splits(0.1, 0.2, 42)?;
//!
//! let labels = corpus.label_set();
//! let train = MatrixBuilder::new(&labels).build(&corpus, Split::Train)?;
//!
//! let mut trainer = Trainer::lbfgs().with_cardinality(labels.len())?;
//! trainer.set("reg_param", "0.01")?;
//! let model = trainer.train(&train)?.with_labels(labels.clone())?;
//!
//! let gold = corpus.gold_codes(&train, &labels);
//! println!("model: {:.3}", model.score(&train, &gold)?.accuracy);
//! println!("majority vote: {:.3}", baseline::majority_vote_accuracy(&train, &gold)?);
//! model.save("model.lblm")?;
//! # Ok::<(), crowdlabel::Error>(())
//! ```
//!
//! ## Prediction
//!
//! ```no_run
//! use crowdlabel::{LabelMatrix, LabelModel};
//!
//! let model = LabelModel::from_bytes(&std::fs::read("model.lblm")?)?;
//! let matrix = LabelMatrix::from_votes(vec![("t1", "w1", 2), ("t1", "w2", 1)])?;
//! let marginals = model.marginals(&matrix)?;
//! # Ok::<(), crowdlabel::Error>(())
//! ```

mod attribute;
pub mod baseline;
mod classifier;
mod dataset;
mod dictionary;
mod error;
mod matrix;
mod model;
mod model_writer;

/// Training module containing the optimizers for label models
pub mod train;

// Re-export main types
pub use self::attribute::{featurize, tokenize, Attribute};
pub use self::classifier::{ClassifierParams, SoftmaxClassifier};
pub use self::dataset::{Corpus, Item, LabelSet, Split, Vote};
pub use self::dictionary::Dictionary;
pub use self::error::{Error, Result};
pub use self::matrix::{DuplicatePolicy, LabelMatrix, MatrixBuilder};
pub use self::model::{LabelModel, Mismatch, Score};

// Re-export training types for convenience
pub use self::train::{Regularization, Trainer};
