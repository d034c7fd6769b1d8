use rand::seq::SliceRandom;
use rand::{rngs::StdRng, SeedableRng};

use super::super::likelihood::Objective;
use super::{parse_value, ParamSet, Sgd, Trainer, TrainingAlgorithm};
use crate::error::{Error, Result};

/// SGD training parameters.
#[derive(Debug, Clone)]
pub struct SgdParams {
    epochs: usize,
    step_size: f64,
    decay: f64,
    period: usize,
    delta: f64,
    seed: Option<u64>,
}

impl Default for SgdParams {
    fn default() -> Self {
        Self {
            epochs: 100,
            step_size: 0.01,
            decay: 0.99,
            period: 10,
            delta: 1e-6,
            seed: None,
        }
    }
}

impl SgdParams {
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

    pub fn step_size(&self) -> f64 {
        self.step_size
    }

    pub fn set_step_size(&mut self, step_size: f64) -> Result<()> {
        if !(step_size > 0.0 && step_size.is_finite()) {
            return Err(Error::param("step_size must be positive"));
        }
        self.step_size = step_size;
        Ok(())
    }

    pub fn decay(&self) -> f64 {
        self.decay
    }

    /// Set the factor the step size is multiplied by after every epoch
    pub fn set_decay(&mut self, decay: f64) -> Result<()> {
        if !(decay > 0.0 && decay <= 1.0) {
            return Err(Error::param("decay must be in (0, 1]"));
        }
        self.decay = decay;
        Ok(())
    }

    pub fn period(&self) -> usize {
        self.period
    }

    pub fn set_period(&mut self, period: usize) -> Result<()> {
        if period == 0 {
            return Err(Error::param("period must be positive"));
        }
        self.period = period;
        Ok(())
    }

    pub fn delta(&self) -> f64 {
        self.delta
    }

    pub fn set_delta(&mut self, delta: f64) -> Result<()> {
        if !(delta > 0.0) {
            return Err(Error::param("delta must be positive"));
        }
        self.delta = delta;
        Ok(())
    }

    pub fn seed(&self) -> Option<u64> {
        self.seed
    }

    pub fn set_seed(&mut self, seed: Option<u64>) {
        self.seed = seed;
    }
}

impl ParamSet for SgdParams {
    fn set(&mut self, name: &str, value: &str) -> Result<bool> {
        match name {
            "epochs" | "max_iterations" => self.set_epochs(parse_value(name, value)?)?,
            "step_size" => self.set_step_size(parse_value(name, value)?)?,
            "decay" => self.set_decay(parse_value(name, value)?)?,
            "period" => self.set_period(parse_value(name, value)?)?,
            "delta" => self.set_delta(parse_value(name, value)?)?,
            "seed" => self.set_seed(Some(parse_value(name, value)?)),
            _ => return Ok(false),
        }
        Ok(true)
    }

    fn get(&self, name: &str) -> Option<String> {
        let value = match name {
            "epochs" | "max_iterations" => self.epochs.to_string(),
            "step_size" => self.step_size.to_string(),
            "decay" => self.decay.to_string(),
            "period" => self.period.to_string(),
            "delta" => self.delta.to_string(),
            "seed" => self.seed.map_or_else(|| "none".to_string(), |s| s.to_string()),
            _ => return None,
        };
        Some(value)
    }
}

impl TrainingAlgorithm for Sgd {
    type Params = SgdParams;

    fn train(trainer: &Trainer<Self>, objective: &mut Objective, weights: &mut [f64]) -> Result<()> {
        trainer.train_sgd(objective, weights)
    }
}

impl Trainer<Sgd> {
    /// Train using stochastic gradient descent over shuffled items
    pub(super) fn train_sgd(&self, objective: &mut Objective, weights: &mut [f64]) -> Result<()> {
        let num_workers = objective.num_workers();
        let num_items = objective.num_items();
        let (c1, c2) = self.penalties();
        let epochs = self.params.epochs();
        let period = self.params.period();
        let delta = self.params.delta();
        let verbose = self.is_verbose();

        // Each item carries 1/N of the penalty
        let lambda1 = c1 / num_items as f64;
        let lambda2 = 2.0 * c2 / num_items as f64;

        if verbose {
            tracing::info!(c1, c2, epochs, "training with SGD");
        }

        let mut rng = match self.params.seed() {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        let mut indices: Vec<usize> = (0..num_items).collect();
        let mut gradient = vec![0.0; weights.len()];
        let mut objective_history = vec![0.0; period];
        let mut best_objective = f64::INFINITY;
        let mut best_weights = weights.to_vec();
        let mut eta = self.params.step_size();

        for epoch in 1..=epochs {
            indices.shuffle(&mut rng);

            let mut sum_loss = 0.0;
            for &row in &indices {
                sum_loss += objective.evaluate_row(row, weights, &mut gradient);
                for (w, g) in weights.iter_mut().zip(gradient.iter()) {
                    *w -= eta * g;
                }
                for w in &mut weights[..num_workers] {
                    if lambda2 > 0.0 {
                        *w *= (1.0 - eta * lambda2).max(0.0);
                    }
                    if lambda1 > 0.0 {
                        // Proximal step for the L1 penalty
                        *w = w.signum() * (w.abs() - eta * lambda1).max(0.0);
                    }
                }
            }

            if !sum_loss.is_finite() {
                return Err(Error::Optimizer(format!(
                    "SGD overflow loss at epoch {}",
                    epoch
                )));
            }

            let accuracy = &weights[..num_workers];
            let norm1: f64 = accuracy.iter().map(|w| w.abs()).sum();
            let norm2: f64 = accuracy.iter().map(|w| w * w).sum();
            sum_loss += c1 * norm1 + c2 * norm2;

            if verbose {
                tracing::info!(
                    "Epoch {}: loss = {:.6}, weight_norm = {:.6}, step = {:.6}",
                    epoch,
                    sum_loss,
                    norm2.sqrt(),
                    eta
                );
            }

            if sum_loss < best_objective {
                best_objective = sum_loss;
                best_weights.copy_from_slice(weights);
            }

            let improvement = if epoch > period {
                let prev = objective_history[(epoch - 1) % period];
                (prev - sum_loss) / sum_loss
            } else {
                delta
            };
            objective_history[(epoch - 1) % period] = sum_loss;

            if epoch > period && improvement < delta {
                tracing::debug!(epoch, "SGD converged");
                break;
            }

            eta *= self.params.decay();
        }

        weights.copy_from_slice(&best_weights);
        tracing::debug!(loss = best_objective, "SGD finished");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sgd_params_validation() {
        let mut params = SgdParams::default();
        assert!(params.set_step_size(0.0).is_err());
        assert!(params.set_decay(1.5).is_err());
        assert!(params.set_decay(0.0).is_err());
        assert!(params.set_period(0).is_err());
        assert!(params.set_delta(0.0).is_err());
        assert!(params.set_decay(1.0).is_ok());
    }

    #[test]
    fn test_sgd_param_set() {
        let mut params = SgdParams::default();
        assert!(params.set("seed", "42").unwrap());
        assert_eq!(params.seed(), Some(42));
        assert!(params.set("decay", "0.5").unwrap());
        assert_eq!(params.get("decay").as_deref(), Some("0.5"));
        assert!(params.set("step_size", "fast").is_err());
        assert!(!params.set("linesearch", "MoreThuente").unwrap());
    }
}
