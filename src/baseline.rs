//! Read-only comparators for the generative label model

use crate::error::{Error, Result};
use crate::matrix::LabelMatrix;
use crate::model::Score;

/// Most frequent vote per row; ties go to the lowest code, rows without
/// votes yield `None`.
pub fn majority_vote(matrix: &LabelMatrix) -> Vec<Option<u32>> {
    let mut counts = vec![0usize; matrix.max_code() as usize + 1];
    (0..matrix.num_items())
        .map(|row| {
            counts.fill(0);
            for &(_, code) in matrix.row(row) {
                counts[code as usize] += 1;
            }
            let mut best: Option<(u32, usize)> = None;
            for (code, &count) in counts.iter().enumerate().skip(1) {
                if count > 0 && best.map_or(true, |(_, top)| count > top) {
                    best = Some((code as u32, count));
                }
            }
            best.map(|(code, _)| code)
        })
        .collect()
}

/// Score majority vote against gold; rows without gold are skipped and rows
/// without votes count as mistakes.
pub fn majority_vote_score(matrix: &LabelMatrix, gold: &[Option<u32>]) -> Result<Score> {
    check_gold_len(matrix, gold)?;
    Ok(Score::from_predictions(matrix, &majority_vote(matrix), gold))
}

/// Fraction of gold rows where the majority vote is correct
pub fn majority_vote_accuracy(matrix: &LabelMatrix, gold: &[Option<u32>]) -> Result<f64> {
    majority_vote_score(matrix, gold).map(|score| score.accuracy)
}

/// Empirical accuracy of each worker over the gold rows they voted on
pub fn worker_accuracies(matrix: &LabelMatrix, gold: &[Option<u32>]) -> Result<Vec<Option<f64>>> {
    check_gold_len(matrix, gold)?;
    let mut correct = vec![0usize; matrix.num_workers()];
    let mut total = vec![0usize; matrix.num_workers()];
    for (row, truth) in gold.iter().enumerate() {
        let Some(truth) = truth else { continue };
        for &(col, code) in matrix.row(row) {
            total[col as usize] += 1;
            if code == *truth {
                correct[col as usize] += 1;
            }
        }
    }
    Ok(correct
        .into_iter()
        .zip(total)
        .map(|(c, t)| (t > 0).then(|| c as f64 / t as f64))
        .collect())
}

/// Mean accuracy over the workers with at least one scored vote
pub fn average_worker_accuracy(matrix: &LabelMatrix, gold: &[Option<u32>]) -> Result<Option<f64>> {
    let scored: Vec<f64> = worker_accuracies(matrix, gold)?.into_iter().flatten().collect();
    if scored.is_empty() {
        return Ok(None);
    }
    Ok(Some(scored.iter().sum::<f64>() / scored.len() as f64))
}

fn check_gold_len(matrix: &LabelMatrix, gold: &[Option<u32>]) -> Result<()> {
    if gold.len() != matrix.num_items() {
        return Err(Error::LengthMismatch {
            expected: matrix.num_items(),
            actual: gold.len(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_majority_vote_scenario() {
        let matrix = LabelMatrix::from_votes(vec![
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
        .unwrap();
        assert_eq!(majority_vote(&matrix), vec![Some(1), Some(2), Some(1)]);
    }

    #[test]
    fn test_majority_vote_tie_goes_to_lowest_code() {
        let matrix = LabelMatrix::from_votes(vec![
            ("a", "w1", 3),
            ("a", "w2", 2),
            ("b", "w1", 2),
            ("b", "w2", 1),
            ("b", "w3", 2),
            ("b", "w4", 1),
        ])
        .unwrap();
        assert_eq!(majority_vote(&matrix), vec![Some(2), Some(1)]);
    }

    #[test]
    fn test_majority_vote_empty_row() {
        let matrix = LabelMatrix::from_rows(["silent"], vec![("a", "w1", 1)]).unwrap();
        assert_eq!(majority_vote(&matrix), vec![None, Some(1)]);

        let score = majority_vote_score(&matrix, &[Some(1), Some(1)]).unwrap();
        assert_eq!(score.correct, 1);
        assert_eq!(score.total, 2);
        assert_eq!(score.mismatches.len(), 1);
        assert_eq!(score.mismatches[0].item, "silent");
    }

    #[test]
    fn test_worker_accuracies() {
        let matrix = LabelMatrix::from_votes(vec![
            ("a", "w1", 1),
            ("a", "w2", 2),
            ("b", "w1", 2),
            ("b", "w2", 2),
            ("c", "w3", 1),
        ])
        .unwrap();
        let gold = [Some(1), Some(2), None];
        let accs = worker_accuracies(&matrix, &gold).unwrap();
        assert_eq!(accs, vec![Some(1.0), Some(0.5), None]);
        assert_eq!(average_worker_accuracy(&matrix, &gold).unwrap(), Some(0.75));
    }

    #[test]
    fn test_gold_length_is_checked() {
        let matrix = LabelMatrix::from_votes(vec![("a", "w1", 1)]).unwrap();
        assert!(matches!(
            majority_vote_accuracy(&matrix, &[]),
            Err(Error::LengthMismatch { .. })
        ));
    }
}
