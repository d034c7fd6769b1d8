use std::str::FromStr;

use super::super::likelihood::Objective;
use super::{parse_value, Lbfgs, ParamSet, Trainer, TrainingAlgorithm};
use crate::error::{Error, Result};

/// Line search algorithm for L-BFGS optimization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LineSearchAlgorithm {
    /// More-Thuente line search
    #[default]
    MoreThuente,
    /// Backtracking with Armijo condition
    BacktrackingArmijo,
    /// Backtracking with Wolfe condition
    BacktrackingWolfe,
    /// Backtracking with strong Wolfe condition
    BacktrackingStrongWolfe,
}

impl LineSearchAlgorithm {
    fn to_liblbfgs_str(self) -> &'static str {
        match self {
            Self::MoreThuente => "MoreThuente",
            Self::BacktrackingArmijo => "BacktrackingArmijo",
            Self::BacktrackingWolfe => "BacktrackingWolfe",
            Self::BacktrackingStrongWolfe => "BacktrackingStrongWolfe",
        }
    }
}

impl FromStr for LineSearchAlgorithm {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "MoreThuente" => Ok(Self::MoreThuente),
            "BacktrackingArmijo" => Ok(Self::BacktrackingArmijo),
            "BacktrackingWolfe" | "Backtracking" => Ok(Self::BacktrackingWolfe),
            "BacktrackingStrongWolfe" => Ok(Self::BacktrackingStrongWolfe),
            _ => Err(Error::param(format!("invalid line search: {:?}", s))),
        }
    }
}

/// L-BFGS training parameters.
#[derive(Debug, Clone)]
pub struct LbfgsParams {
    epochs: usize,
    epsilon: f64,
    period: usize,
    delta: f64,
    linesearch: LineSearchAlgorithm,
    max_linesearch: usize,
}

impl Default for LbfgsParams {
    fn default() -> Self {
        Self {
            epochs: 100,
            epsilon: 1e-5,
            period: 10,
            delta: 1e-6,
            linesearch: LineSearchAlgorithm::default(),
            max_linesearch: 20,
        }
    }
}

impl LbfgsParams {
    pub fn epochs(&self) -> usize {
        self.epochs
    }

    /// Set the maximum number of L-BFGS iterations
    pub fn set_epochs(&mut self, epochs: usize) -> Result<()> {
        if epochs < 1 {
            return Err(Error::param("epochs must be at least 1"));
        }
        self.epochs = epochs;
        Ok(())
    }

    pub fn epsilon(&self) -> f64 {
        self.epsilon
    }

    pub fn set_epsilon(&mut self, epsilon: f64) -> Result<()> {
        if !(epsilon >= 0.0) {
            return Err(Error::param("epsilon must be non-negative"));
        }
        self.epsilon = epsilon;
        Ok(())
    }

    pub fn period(&self) -> usize {
        self.period
    }

    /// Set the period for delta-based convergence test.
    ///
    /// Setting period to 0 disables the delta-based convergence test
    /// (only gradient-based epsilon test is used).
    pub fn set_period(&mut self, period: usize) {
        self.period = period;
    }

    pub fn delta(&self) -> f64 {
        self.delta
    }

    pub fn set_delta(&mut self, delta: f64) -> Result<()> {
        if !(delta >= 0.0) {
            return Err(Error::param("delta must be non-negative"));
        }
        self.delta = delta;
        Ok(())
    }

    pub fn linesearch(&self) -> LineSearchAlgorithm {
        self.linesearch
    }

    pub fn set_linesearch(&mut self, linesearch: LineSearchAlgorithm) {
        self.linesearch = linesearch;
    }

    pub fn max_linesearch(&self) -> usize {
        self.max_linesearch
    }

    pub fn set_max_linesearch(&mut self, max_linesearch: usize) -> Result<()> {
        if max_linesearch == 0 {
            return Err(Error::param("max_linesearch must be positive"));
        }
        self.max_linesearch = max_linesearch;
        Ok(())
    }
}

impl ParamSet for LbfgsParams {
    fn set(&mut self, name: &str, value: &str) -> Result<bool> {
        match name {
            "epochs" | "max_iterations" => self.set_epochs(parse_value(name, value)?)?,
            "epsilon" => self.set_epsilon(parse_value(name, value)?)?,
            "period" => self.set_period(parse_value(name, value)?),
            "delta" => self.set_delta(parse_value(name, value)?)?,
            "linesearch" => self.set_linesearch(value.trim().parse()?),
            "max_linesearch" => self.set_max_linesearch(parse_value(name, value)?)?,
            _ => return Ok(false),
        }
        Ok(true)
    }

    fn get(&self, name: &str) -> Option<String> {
        let value = match name {
            "epochs" | "max_iterations" => self.epochs.to_string(),
            "epsilon" => self.epsilon.to_string(),
            "period" => self.period.to_string(),
            "delta" => self.delta.to_string(),
            "linesearch" => self.linesearch.to_liblbfgs_str().to_string(),
            "max_linesearch" => self.max_linesearch.to_string(),
            _ => return None,
        };
        Some(value)
    }
}

/// Turn the outcome of a liblbfgs run into the final loss or an optimizer error.
///
/// `niter` is the last iteration count seen by the progress callback. liblbfgs
/// reports 1 before its first line search, so a failure with `niter < 2` means
/// the weights never moved from their initial values. Later failures keep the
/// last iterate and yield `None`.
pub(crate) fn lbfgs_outcome(
    what: &str,
    result: anyhow::Result<f64>,
    diverged: bool,
    niter: usize,
) -> Result<Option<f64>> {
    match result {
        Ok(loss) => Ok(Some(loss)),
        Err(e) if diverged => Err(Error::Optimizer(format!("{} diverged: {}", what, e))),
        Err(e) if niter < 2 => Err(Error::Optimizer(format!(
            "{} made no progress: {}",
            what, e
        ))),
        Err(e) => {
            tracing::warn!(error = %e, iterations = niter - 1, "{} stopped early", what);
            Ok(None)
        }
    }
}

impl TrainingAlgorithm for Lbfgs {
    type Params = LbfgsParams;

    fn train(trainer: &Trainer<Self>, objective: &mut Objective, weights: &mut [f64]) -> Result<()> {
        trainer.train_lbfgs(objective, weights)
    }
}

impl Trainer<Lbfgs> {
    /// Train using L-BFGS algorithm
    pub(super) fn train_lbfgs(&self, objective: &mut Objective, weights: &mut [f64]) -> Result<()> {
        let num_workers = objective.num_workers();
        let (c1, c2) = self.penalties();
        let epochs = self.params.epochs();
        let epsilon = self.params.epsilon();
        let period = self.params.period();
        let delta = self.params.delta();
        let linesearch = self.params.linesearch();
        let max_linesearch = self.params.max_linesearch();
        let verbose = self.is_verbose();

        if verbose {
            tracing::info!(c1, c2, epochs, "training with L-BFGS");
        }

        let mut diverged = false;
        let mut niter = 0;

        // Objective function: negative marginal log-likelihood + L2 regularization
        let evaluate = |x: &[f64], gx: &mut [f64]| -> anyhow::Result<f64> {
            let mut loss = objective.evaluate(x, gx);

            // Only accuracy weights are penalized; propensities follow them in `x`
            if c2 > 0.0 {
                let two_c2 = c2 * 2.0;
                for i in 0..num_workers {
                    gx[i] += two_c2 * x[i];
                    loss += c2 * x[i] * x[i];
                }
            }

            if !loss.is_finite() {
                diverged = true;
                anyhow::bail!("non-finite loss");
            }
            Ok(loss)
        };

        let progress = |prgr: &liblbfgs::Progress| -> bool {
            niter = prgr.niter;
            if verbose {
                tracing::info!(
                    "Iteration {}: loss = {:.6}, ||x|| = {:.6}, ||g|| = {:.6}",
                    prgr.niter,
                    prgr.fx,
                    prgr.xnorm,
                    prgr.gnorm
                );
            }
            false // continue optimization
        };

        let mut lbfgs = liblbfgs::lbfgs()
            .with_max_iterations(epochs)
            .with_epsilon(epsilon)
            .with_fx_delta(delta, period)
            .with_max_linesearch(max_linesearch);

        // OWL-QN only supports backtracking line search
        if c1 > 0.0 {
            lbfgs = lbfgs
                .with_linesearch_algorithm("BacktrackingStrongWolfe")
                .with_orthantwise(c1, 0, num_workers);
        } else {
            lbfgs = lbfgs.with_linesearch_algorithm(linesearch.to_liblbfgs_str());
        }

        let result = lbfgs
            .minimize(weights, evaluate, progress)
            .map(|report| report.fx);
        if let Some(loss) = lbfgs_outcome("L-BFGS", result, diverged, niter)? {
            tracing::debug!(loss, "L-BFGS finished");
        }
        Ok(())
    }
}
