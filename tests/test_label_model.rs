use std::io;
use std::sync::{Arc, Mutex};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crowdlabel::train::Trainer;
use crowdlabel::{baseline, Dictionary, Error, LabelMatrix, LabelModel, Regularization};

/// Simulate `items` items with uniform true classes in `1..=k`. Each worker
/// votes with probability `rate` and is correct with probability `accuracy`;
/// wrong votes are spread uniformly over the other classes.
fn simulate(
    items: usize,
    k: u32,
    workers: &[(f64, f64)],
    seed: u64,
) -> (LabelMatrix, Vec<Option<u32>>) {
    let mut rng = StdRng::seed_from_u64(seed);
    let names: Vec<String> = (0..items).map(|i| format!("item{}", i)).collect();
    let mut truth = Vec::with_capacity(items);
    let mut votes = Vec::new();
    for name in &names {
        let y = rng.gen_range(1..=k);
        truth.push(Some(y));
        for (w, &(accuracy, rate)) in workers.iter().enumerate() {
            if !rng.gen_bool(rate) {
                continue;
            }
            let code = if rng.gen_bool(accuracy) {
                y
            } else {
                let wrong = rng.gen_range(1..k);
                if wrong >= y {
                    wrong + 1
                } else {
                    wrong
                }
            };
            votes.push((name.clone(), format!("worker{}", w), code));
        }
    }
    let matrix = LabelMatrix::from_rows(&names, votes).unwrap();
    (matrix, truth)
}

fn scenario() -> LabelMatrix {
    LabelMatrix::from_votes(vec![
        ("item1", "w1", 1),
        ("item1", "w2", 1),
        ("item1", "w3", 2),
        ("item2", "w1", 2),
        ("item2", "w2", 2),
        ("item2", "w3", 2),
        ("item3", "w1", 1),
        ("item3", "w2", 2),
        ("item3", "w3", 1),
    ])
    .unwrap()
}

fn entropy(row: ndarray::ArrayView1<f64>) -> f64 {
    row.iter().filter(|&&p| p > 0.0).map(|&p| -p * p.ln()).sum()
}

#[test]
fn test_marginals_are_distributions() {
    let matrix = scenario();
    let model = Trainer::lbfgs().train(&matrix).unwrap();
    assert_eq!(model.cardinality(), 2);

    let marginals = model.marginals(&matrix).unwrap();
    assert_eq!(marginals.dim(), (3, 2));
    for row in marginals.outer_iter() {
        assert!((row.sum() - 1.0).abs() < 1e-9);
        assert!(row.iter().all(|&p| (0.0..=1.0).contains(&p)));
    }
    assert_eq!(model.predict(&matrix).unwrap(), vec![1, 2, 1]);
}

#[test]
fn test_zero_vote_row_is_uniform() {
    let matrix = LabelMatrix::from_rows(
        ["item1", "item2", "silent"],
        vec![
            ("item1", "w1", 1),
            ("item1", "w2", 1),
            ("item2", "w1", 3),
            ("item2", "w2", 2),
        ],
    )
    .unwrap();
    let model = Trainer::lbfgs().train(&matrix).unwrap();
    let marginals = model.marginals(&matrix).unwrap();
    assert_eq!(model.cardinality(), 3);

    let silent = marginals.row(2);
    for &p in silent.iter() {
        assert!((p - 1.0 / 3.0).abs() < 1e-12);
    }
    let max_entropy = entropy(silent);
    for row in marginals.outer_iter() {
        assert!(entropy(row) <= max_entropy + 1e-12);
    }
}

#[test]
fn test_reliable_workers_get_higher_accuracy() {
    let workers = [(0.9, 1.0), (0.85, 1.0), (0.9, 1.0), (0.5, 1.0), (0.5, 1.0)];
    let (matrix, truth) = simulate(600, 2, &workers, 11);
    let model = Trainer::lbfgs()
        .with_regularization(Regularization::L2, 0.01)
        .unwrap()
        .train(&matrix)
        .unwrap();

    let estimated = model.worker_accuracies();
    for good in 0..3 {
        for bad in 3..5 {
            assert!(
                estimated[good] > estimated[bad],
                "worker{} ({}) should beat worker{} ({})",
                good,
                estimated[good],
                bad,
                estimated[bad]
            );
        }
    }

    let score = model.score(&matrix, &truth).unwrap();
    let majority = baseline::majority_vote_accuracy(&matrix, &truth).unwrap();
    assert!(score.accuracy >= majority - 0.01);
    assert!(score.accuracy > 0.9);
}

#[test]
fn test_sgd_recovers_truth() {
    let workers = [(0.8, 0.9), (0.75, 0.9), (0.7, 0.9), (0.8, 0.9)];
    let (matrix, truth) = simulate(400, 3, &workers, 5);
    let model = Trainer::sgd()
        .with_epochs(30)
        .unwrap()
        .with_seed(3)
        .train(&matrix)
        .unwrap();
    assert!(model.accuracy_weights().iter().all(|w| w.is_finite()));
    let score = model.score(&matrix, &truth).unwrap();
    assert!(score.accuracy > 0.85, "accuracy {}", score.accuracy);

    // Fixed seed, identical result
    let again = Trainer::sgd()
        .with_epochs(30)
        .unwrap()
        .with_seed(3)
        .train(&matrix)
        .unwrap();
    assert_eq!(again.accuracy_weights(), model.accuracy_weights());
}

#[test]
fn test_l1_shrinks_uninformative_workers() {
    let workers = [(0.9, 1.0), (0.9, 1.0), (0.5, 1.0)];
    let (matrix, _) = simulate(500, 2, &workers, 21);
    let model = Trainer::lbfgs()
        .with_regularization(Regularization::L1, 5.0)
        .unwrap()
        .train(&matrix)
        .unwrap();
    let weights = model.accuracy_weights();
    assert!(weights.iter().all(|w| w.is_finite()));
    assert!(weights[2].abs() < weights[0]);
    assert!(weights[2].abs() < weights[1]);
}

#[test]
fn test_propensity_tracks_voting_rate() {
    let workers = [(0.8, 0.95), (0.8, 0.3), (0.8, 0.9)];
    let (matrix, _) = simulate(500, 2, &workers, 8);
    let model = Trainer::lbfgs()
        .with_propensity(true)
        .train(&matrix)
        .unwrap();

    let propensities = model.propensities().unwrap();
    assert_eq!(propensities.len(), 3);
    assert!(propensities.iter().all(|&p| p > 0.0 && p < 1.0));
    assert!(propensities[1] < propensities[0]);
    assert!(propensities[1] < propensities[2]);

    let marginals = model.marginals(&matrix).unwrap();
    for row in marginals.outer_iter() {
        assert!((row.sum() - 1.0).abs() < 1e-9);
    }
}

#[test]
fn test_explicit_cardinality_covers_unseen_classes() {
    let matrix = scenario();
    let model = Trainer::lbfgs()
        .with_cardinality(4)
        .unwrap()
        .train(&matrix)
        .unwrap();
    let marginals = model.marginals(&matrix).unwrap();
    assert_eq!(marginals.ncols(), 4);
    // Unseen classes only get the leftover mass
    for row in marginals.outer_iter() {
        assert!(row[2] < row[0].max(row[1]));
        assert!((row[2] - row[3]).abs() < 1e-12);
    }
}

#[test]
fn test_model_applies_to_other_matrices() {
    let model = Trainer::lbfgs().train(&scenario()).unwrap();
    let other = LabelMatrix::from_votes(vec![
        ("fresh", "w2", 2),
        ("fresh", "w1", 2),
        ("fresh", "newcomer", 1),
    ])
    .unwrap();
    assert_eq!(model.predict(&other).unwrap(), vec![2]);
}

#[test]
fn test_training_failures() {
    let empty = LabelMatrix::default();
    assert!(matches!(
        Trainer::lbfgs().train(&empty),
        Err(Error::EmptyMatrix(_))
    ));

    let matrix = scenario();
    let small = Trainer::lbfgs().with_cardinality(2).unwrap();
    let wide = LabelMatrix::from_votes(vec![("a", "w1", 1), ("a", "w2", 3)]).unwrap();
    assert!(matches!(small.train(&wide), Err(Error::Cardinality(_))));

    let model = small.train(&matrix).unwrap();
    assert!(matches!(model.marginals(&wide), Err(Error::Cardinality(_))));
    assert!(matches!(
        model.score(&matrix, &[Some(1)]),
        Err(Error::LengthMismatch {
            expected: 3,
            actual: 1
        })
    ));
}

/// Log sink shared with a test subscriber
#[derive(Clone, Default)]
struct LogBuffer(Arc<Mutex<Vec<u8>>>);

impl io::Write for LogBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl LogBuffer {
    fn contents(&self) -> String {
        String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
    }
}

fn captured<T>(f: impl FnOnce() -> T) -> (T, String) {
    let logs = LogBuffer::default();
    let writer = logs.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(move || writer.clone())
        .with_ansi(false)
        .with_max_level(tracing::Level::WARN)
        .finish();
    let value = tracing::subscriber::with_default(subscriber, f);
    (value, logs.contents())
}

#[test]
fn test_score_warns_on_cardinality_mismatch() {
    let matrix = scenario();
    let workers: Dictionary = ["w1", "w2", "w3"].into_iter().collect();
    let model = LabelModel::from_weights(3, workers, vec![1.0; 3], None).unwrap();

    // Gold covers classes 1 and 2 of a 3-class model
    let gold = vec![Some(1), Some(2), Some(1)];
    let (score, logs) = captured(|| model.score(&matrix, &gold).unwrap());
    assert_eq!(score.total, 3);
    assert!(logs.contains("WARN"), "logs: {}", logs);
    assert!(
        logs.contains("cardinality mismatch between model and gold labels"),
        "logs: {}",
        logs
    );
    assert!(logs.contains("gold_classes=2"), "logs: {}", logs);

    // Gold covering every class stays quiet
    let gold = vec![Some(1), Some(2), Some(3)];
    let (_, logs) = captured(|| model.score(&matrix, &gold).unwrap());
    assert!(!logs.contains("cardinality mismatch"), "logs: {}", logs);
}
