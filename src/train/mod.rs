//! Training module for generative label models
//!
//! The marginal likelihood of the observed votes is minimized with either
//! L-BFGS (OWL-QN when an L1 penalty is requested) or stochastic gradient
//! descent over shuffled items.

pub(crate) mod likelihood;
mod trainer;

pub(crate) use self::trainer::lbfgs_outcome;

// Re-export public types
pub use self::trainer::{
    Lbfgs, LbfgsParams, LineSearchAlgorithm, ParamSet, Regularization, Sgd, SgdParams, Trainer,
    TrainingAlgorithm,
};
