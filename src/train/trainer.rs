use std::fmt::Debug;
use std::str::FromStr;

use super::likelihood::Objective;
use crate::error::{Error, Result};
use crate::matrix::LabelMatrix;
use crate::model::LabelModel;

mod lbfgs;
mod sgd;

pub(crate) use self::lbfgs::lbfgs_outcome;
pub use self::lbfgs::{LbfgsParams, LineSearchAlgorithm};
pub use self::sgd::SgdParams;

/// Training algorithm marker for L-BFGS (OWL-QN under L1).
#[derive(Debug, Clone, Copy)]
pub struct Lbfgs;

/// Training algorithm marker for stochastic gradient descent.
#[derive(Debug, Clone, Copy)]
pub struct Sgd;

/// Norm of the penalty on worker accuracy weights
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Regularization {
    L1,
    #[default]
    L2,
}

impl Regularization {
    fn as_str(self) -> &'static str {
        match self {
            Self::L1 => "l1",
            Self::L2 => "l2",
        }
    }
}

impl FromStr for Regularization {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "l1" | "1" => Ok(Self::L1),
            "l2" | "2" => Ok(Self::L2),
            _ => Err(Error::param(format!("invalid regularization: {:?}", s))),
        }
    }
}

/// String-keyed access to algorithm parameters
pub trait ParamSet {
    /// Set a parameter; returns `Ok(false)` when the name is not recognized
    fn set(&mut self, name: &str, value: &str) -> Result<bool>;

    /// Get a parameter as a string, `None` when the name is not recognized
    fn get(&self, name: &str) -> Option<String>;
}

/// Training algorithm interface.
pub trait TrainingAlgorithm {
    type Params: Default + Debug + ParamSet;

    /// Minimize the objective in place, starting from `weights`
    fn train(trainer: &Trainer<Self>, objective: &mut Objective, weights: &mut [f64]) -> Result<()>
    where
        Self: Sized;
}

pub(crate) fn parse_value<T: FromStr>(name: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| Error::param(format!("invalid value for {}: {:?}", name, value)))
}

/// Generative label model trainer
#[derive(Debug)]
pub struct Trainer<A: TrainingAlgorithm> {
    /// Explicit number of classes, inferred from the matrix when unset
    cardinality: Option<usize>,
    /// Model each worker's tendency to vote at all
    propensity: bool,
    /// Initial accuracy weight of every worker
    init_acc: f64,
    /// Penalty norm
    regularization: Regularization,
    /// Penalty strength
    reg_param: f64,
    /// Enable verbose output
    verbose: bool,
    /// Training parameters
    params: A::Params,
}

impl<A: TrainingAlgorithm> Trainer<A> {
    /// Create a new trainer
    pub fn new() -> Self {
        Self {
            cardinality: None,
            propensity: false,
            init_acc: 1.0,
            regularization: Regularization::default(),
            reg_param: 0.1,
            verbose: false,
            params: A::Params::default(),
        }
    }

    /// Enable or disable verbose output
    pub fn verbose(&mut self, enabled: bool) -> &mut Self {
        self.verbose = enabled;
        self
    }

    pub(crate) fn is_verbose(&self) -> bool {
        self.verbose
    }

    /// Get training parameters
    pub fn params(&self) -> &A::Params {
        &self.params
    }

    /// Get training parameters for mutation
    pub fn params_mut(&mut self) -> &mut A::Params {
        &mut self.params
    }

    pub fn cardinality(&self) -> Option<usize> {
        self.cardinality
    }

    /// Fix the number of classes instead of inferring it from the matrix
    pub fn set_cardinality(&mut self, cardinality: Option<usize>) -> Result<()> {
        if matches!(cardinality, Some(k) if k < 2) {
            return Err(Error::param("cardinality must be at least 2"));
        }
        self.cardinality = cardinality;
        Ok(())
    }

    pub fn propensity(&self) -> bool {
        self.propensity
    }

    pub fn set_propensity(&mut self, enabled: bool) {
        self.propensity = enabled;
    }

    pub fn init_acc(&self) -> f64 {
        self.init_acc
    }

    pub fn set_init_acc(&mut self, init_acc: f64) -> Result<()> {
        if !(init_acc > 0.0 && init_acc.is_finite()) {
            return Err(Error::param("init_acc must be positive"));
        }
        self.init_acc = init_acc;
        Ok(())
    }

    pub fn regularization(&self) -> Regularization {
        self.regularization
    }

    pub fn set_regularization(&mut self, regularization: Regularization) {
        self.regularization = regularization;
    }

    pub fn reg_param(&self) -> f64 {
        self.reg_param
    }

    pub fn set_reg_param(&mut self, reg_param: f64) -> Result<()> {
        if !(reg_param >= 0.0 && reg_param.is_finite()) {
            return Err(Error::param("reg_param must be non-negative"));
        }
        self.reg_param = reg_param;
        Ok(())
    }

    /// L1 and L2 penalty strengths implied by the regularization settings
    pub(crate) fn penalties(&self) -> (f64, f64) {
        match self.regularization {
            Regularization::L1 => (self.reg_param, 0.0),
            Regularization::L2 => (0.0, self.reg_param),
        }
    }

    /// Set cardinality (builder pattern)
    pub fn with_cardinality(mut self, cardinality: usize) -> Result<Self> {
        self.set_cardinality(Some(cardinality))?;
        Ok(self)
    }

    /// Enable propensity modeling (builder pattern)
    pub fn with_propensity(mut self, enabled: bool) -> Self {
        self.set_propensity(enabled);
        self
    }

    /// Set initial accuracy weight (builder pattern)
    pub fn with_init_acc(mut self, init_acc: f64) -> Result<Self> {
        self.set_init_acc(init_acc)?;
        Ok(self)
    }

    /// Set regularization norm and strength (builder pattern)
    pub fn with_regularization(
        mut self,
        regularization: Regularization,
        reg_param: f64,
    ) -> Result<Self> {
        self.set_reg_param(reg_param)?;
        self.set_regularization(regularization);
        Ok(self)
    }

    /// Set a parameter by name
    pub fn set(&mut self, name: &str, value: &str) -> Result<()> {
        match name {
            "cardinality" => {
                let cardinality = match value.trim() {
                    "" | "auto" => None,
                    v => Some(parse_value(name, v)?),
                };
                self.set_cardinality(cardinality)
            }
            "propensity" => {
                self.set_propensity(parse_value(name, value)?);
                Ok(())
            }
            "init_acc" => self.set_init_acc(parse_value(name, value)?),
            "reg_type" => {
                self.set_regularization(value.parse()?);
                Ok(())
            }
            "reg_param" => self.set_reg_param(parse_value(name, value)?),
            _ => {
                if self.params.set(name, value)? {
                    Ok(())
                } else {
                    Err(Error::UnknownParam(name.to_string()))
                }
            }
        }
    }

    /// Get a parameter by name
    pub fn get(&self, name: &str) -> Result<String> {
        let value = match name {
            "cardinality" => Some(
                self.cardinality
                    .map_or_else(|| "auto".to_string(), |k| k.to_string()),
            ),
            "propensity" => Some(self.propensity.to_string()),
            "init_acc" => Some(self.init_acc.to_string()),
            "reg_type" => Some(self.regularization.as_str().to_string()),
            "reg_param" => Some(self.reg_param.to_string()),
            _ => self.params.get(name),
        };
        value.ok_or_else(|| Error::UnknownParam(name.to_string()))
    }

    /// Resolve the number of classes against the codes present in a matrix
    fn resolve_cardinality(&self, matrix: &LabelMatrix) -> Result<usize> {
        let observed = matrix.max_code() as usize;
        match self.cardinality {
            Some(k) if observed > k => Err(Error::Cardinality(format!(
                "label code {} exceeds cardinality {}",
                observed, k
            ))),
            Some(k) => {
                if observed < k {
                    tracing::warn!(
                        observed,
                        expected = k,
                        "highest label codes never observed in the matrix"
                    );
                }
                Ok(k)
            }
            None => {
                let distinct = matrix.distinct_codes();
                if distinct < 2 {
                    return Err(Error::Cardinality(format!(
                        "cannot infer cardinality from {} distinct label code(s)",
                        distinct
                    )));
                }
                Ok(observed)
            }
        }
    }

    /// Fit worker parameters on a label matrix
    pub fn train(&self, matrix: &LabelMatrix) -> Result<LabelModel> {
        if matrix.num_items() == 0 {
            return Err(Error::EmptyMatrix("no items"));
        }
        if matrix.num_votes() == 0 {
            return Err(Error::EmptyMatrix("no votes"));
        }
        let cardinality = self.resolve_cardinality(matrix)?;

        let mut objective = Objective::new(matrix, cardinality, self.propensity);
        let num_workers = objective.num_workers();
        let mut weights = vec![0.0; objective.num_params()];
        weights[..num_workers].fill(self.init_acc);

        tracing::debug!(
            items = matrix.num_items(),
            workers = num_workers,
            votes = matrix.num_votes(),
            cardinality,
            propensity = self.propensity,
            "training label model"
        );

        A::train(self, &mut objective, &mut weights)?;

        if weights.iter().any(|w| !w.is_finite()) {
            return Err(Error::Optimizer("non-finite worker weights".to_string()));
        }

        let propensity = self.propensity.then(|| weights[num_workers..].to_vec());
        weights.truncate(num_workers);
        Ok(LabelModel::new(
            cardinality,
            matrix.workers().clone(),
            weights,
            propensity,
        ))
    }
}

impl Trainer<Lbfgs> {
    /// Create a new L-BFGS trainer
    pub fn lbfgs() -> Self {
        Self::new()
    }

    /// Set number of epochs (builder pattern)
    pub fn with_epochs(mut self, epochs: usize) -> Result<Self> {
        self.params.set_epochs(epochs)?;
        Ok(self)
    }

    /// Set convergence epsilon (builder pattern)
    pub fn with_epsilon(mut self, epsilon: f64) -> Result<Self> {
        self.params.set_epsilon(epsilon)?;
        Ok(self)
    }
}

impl Trainer<Sgd> {
    /// Create a new SGD trainer
    pub fn sgd() -> Self {
        Self::new()
    }

    /// Set number of epochs (builder pattern)
    pub fn with_epochs(mut self, epochs: usize) -> Result<Self> {
        self.params.set_epochs(epochs)?;
        Ok(self)
    }

    /// Set initial step size (builder pattern)
    pub fn with_step_size(mut self, step_size: f64) -> Result<Self> {
        self.params.set_step_size(step_size)?;
        Ok(self)
    }

    /// Set per-epoch step size decay (builder pattern)
    pub fn with_decay(mut self, decay: f64) -> Result<Self> {
        self.params.set_decay(decay)?;
        Ok(self)
    }

    /// Fix the shuffle seed (builder pattern)
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.params.set_seed(Some(seed));
        self
    }
}

impl<A: TrainingAlgorithm> Default for Trainer<A> {
    fn default() -> Self {
        Self::new()
    }
}
