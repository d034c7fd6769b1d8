use crate::matrix::LabelMatrix;

/// Log-sum-exp trick for numerical stability.
///
/// Returns NEG_INFINITY for empty arrays or arrays where all values are NEG_INFINITY.
pub fn logsumexp(values: &[f64]) -> f64 {
    if values.is_empty() {
        return f64::NEG_INFINITY;
    }
    let max_val = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if max_val.is_infinite() {
        return max_val;
    }
    let sum: f64 = values.iter().map(|&v| (v - max_val).exp()).sum();
    max_val + sum.ln()
}

fn log_add_exp(a: f64, b: f64) -> f64 {
    let max_val = a.max(b);
    if max_val == f64::NEG_INFINITY {
        return max_val;
    }
    max_val + ((a - max_val).exp() + (b - max_val).exp()).ln()
}

/// Fill `out` with the posterior over classes given `(accuracy weight, code)`
/// pairs and return the log normalizer of the unnormalized scores.
///
/// With no votes every score is zero and the posterior is uniform.
pub fn posterior_into<I>(votes: I, out: &mut [f64]) -> f64
where
    I: IntoIterator<Item = (f64, u32)>,
{
    out.fill(0.0);
    for (weight, code) in votes {
        out[code as usize - 1] += weight;
    }
    let log_z = logsumexp(out);
    for v in out.iter_mut() {
        *v = (*v - log_z).exp();
    }
    log_z
}

/// Normalizer of one worker's vote distribution and its derivatives
#[derive(Debug, Clone, Copy, Default)]
pub struct WorkerTerms {
    /// log Z_j
    pub log_norm: f64,
    /// d log Z_j / d w_j: probability of a correct vote
    pub p_correct: f64,
    /// d log Z_j / d p_j: probability of voting at all
    pub p_vote: f64,
}

impl WorkerTerms {
    /// Terms for accuracy weight `w`, optional propensity weight `p` and `k` classes.
    ///
    /// Without propensity only cast votes are modeled:
    /// `P(v | y) = exp(w·[v = y]) / (exp(w) + k - 1)`.
    /// With propensity abstention is an outcome too:
    /// `P(v | y) = exp(w·[v = y] + p·[v ≠ 0]) / (1 + exp(p)·(exp(w) + k - 1))`.
    pub fn new(w: f64, p: Option<f64>, k: usize) -> Self {
        let log_vote_mass = log_add_exp(w, ((k - 1) as f64).ln());
        match p {
            None => Self {
                log_norm: log_vote_mass,
                p_correct: (w - log_vote_mass).exp(),
                p_vote: 1.0,
            },
            Some(p) => {
                let log_norm = log_add_exp(0.0, p + log_vote_mass);
                Self {
                    log_norm,
                    p_correct: (p + w - log_norm).exp(),
                    p_vote: (p + log_vote_mass - log_norm).exp(),
                }
            }
        }
    }
}

/// Negative marginal log-likelihood of a label matrix and its gradient
///
/// Parameters are laid out as `[w_0 .. w_{m-1}]`, followed by
/// `[p_0 .. p_{m-1}]` when propensity is modeled.
pub struct Objective<'a> {
    matrix: &'a LabelMatrix,
    cardinality: usize,
    propensity: bool,
    coverage: Vec<usize>,
    terms: Vec<WorkerTerms>,
    scores: Vec<f64>,
}

impl<'a> Objective<'a> {
    pub fn new(matrix: &'a LabelMatrix, cardinality: usize, propensity: bool) -> Self {
        Self {
            matrix,
            cardinality,
            propensity,
            coverage: matrix.coverage(),
            terms: vec![WorkerTerms::default(); matrix.num_workers()],
            scores: vec![0.0; cardinality],
        }
    }

    pub fn num_workers(&self) -> usize {
        self.matrix.num_workers()
    }

    pub fn num_items(&self) -> usize {
        self.matrix.num_items()
    }

    pub fn num_params(&self) -> usize {
        if self.propensity {
            2 * self.num_workers()
        } else {
            self.num_workers()
        }
    }

    fn propensity_of(&self, x: &[f64], j: usize) -> Option<f64> {
        self.propensity.then(|| x[self.num_workers() + j])
    }

    fn update_terms(&mut self, x: &[f64]) {
        for j in 0..self.num_workers() {
            self.terms[j] = WorkerTerms::new(x[j], self.propensity_of(x, j), self.cardinality);
        }
    }

    /// Posterior of one row into the scratch buffer; returns the log normalizer
    fn row_posterior(&mut self, row: usize, x: &[f64]) -> f64 {
        let matrix = self.matrix;
        let entries = matrix.row(row);
        posterior_into(
            entries.iter().map(|&(col, code)| (x[col as usize], code)),
            &mut self.scores,
        )
    }

    /// Full-batch loss, writing the gradient into `g`
    pub fn evaluate(&mut self, x: &[f64], g: &mut [f64]) -> f64 {
        let m = self.num_workers();
        let n = self.num_items() as f64;
        let log_k = (self.cardinality as f64).ln();

        self.update_terms(x);
        g.fill(0.0);

        let mut loss = 0.0;
        for row in 0..self.num_items() {
            let log_z = self.row_posterior(row, x);
            loss += log_k - log_z;
            for &(col, code) in self.matrix.row(row) {
                g[col as usize] -= self.scores[code as usize - 1];
            }
        }

        for j in 0..m {
            let terms = self.terms[j];
            let cov = self.coverage[j] as f64;
            if self.propensity {
                loss += n * terms.log_norm - cov * x[m + j];
                g[j] += n * terms.p_correct;
                g[m + j] = n * terms.p_vote - cov;
            } else {
                loss += cov * terms.log_norm;
                g[j] += cov * terms.p_correct;
            }
        }
        loss
    }

    /// Loss of a single row, writing its gradient into `g`
    pub fn evaluate_row(&mut self, row: usize, x: &[f64], g: &mut [f64]) -> f64 {
        let m = self.num_workers();
        let k = self.cardinality;
        let log_z = self.row_posterior(row, x);
        let mut loss = (k as f64).ln() - log_z;

        g.fill(0.0);
        if self.propensity {
            for j in 0..m {
                let terms = WorkerTerms::new(x[j], Some(x[m + j]), k);
                loss += terms.log_norm;
                g[j] = terms.p_correct;
                g[m + j] = terms.p_vote;
            }
            for &(col, code) in self.matrix.row(row) {
                let j = col as usize;
                loss -= x[m + j];
                g[j] -= self.scores[code as usize - 1];
                g[m + j] -= 1.0;
            }
        } else {
            for &(col, code) in self.matrix.row(row) {
                let j = col as usize;
                let terms = WorkerTerms::new(x[j], None, k);
                loss += terms.log_norm;
                g[j] = terms.p_correct - self.scores[code as usize - 1];
            }
        }
        loss
    }
}
