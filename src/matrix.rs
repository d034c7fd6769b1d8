use std::collections::{HashMap, HashSet};

use ndarray::Array2;

use crate::dataset::{Corpus, LabelSet, Split};
use crate::dictionary::Dictionary;
use crate::error::{Error, Result};

/// How a repeated `(item, worker)` pair with a different label is handled
///
/// Identical repeats are always collapsed into one vote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DuplicatePolicy {
    /// Fail with [`Error::ConflictingVote`]
    #[default]
    Reject,
    /// Keep the first-seen vote and log the conflict
    KeepFirst,
}

/// Sparse item × worker matrix of vote codes
///
/// Each row holds `(column, code)` entries sorted by column. Codes are in
/// `1..=K`; a missing entry means the worker did not vote on the item.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LabelMatrix {
    rows: Vec<Vec<(u32, u32)>>,
    items: Dictionary,
    workers: Dictionary,
    num_votes: usize,
    conflicts: usize,
}

impl LabelMatrix {
    /// Build a matrix from `(item, worker, code)` triples, rows and columns in
    /// first-seen order. Conflicting repeats are rejected.
    pub fn from_votes<I, A, B>(votes: I) -> Result<Self>
    where
        I: IntoIterator<Item = (A, B, u32)>,
        A: AsRef<str>,
        B: AsRef<str>,
    {
        Self::from_rows(std::iter::empty::<&str>(), votes)
    }

    /// Build a matrix whose first rows are `items` in the given order, with
    /// votes on unlisted items appended as further rows. Listed items without
    /// votes become all-zero rows.
    pub fn from_rows<R, S, I, A, B>(items: R, votes: I) -> Result<Self>
    where
        R: IntoIterator<Item = S>,
        S: AsRef<str>,
        I: IntoIterator<Item = (A, B, u32)>,
        A: AsRef<str>,
        B: AsRef<str>,
    {
        let mut acc = Accumulator::new(DuplicatePolicy::Reject);
        for item in items {
            acc.add_row(item.as_ref());
        }
        for (item, worker, code) in votes {
            if code == 0 {
                return Err(Error::param("vote code 0 is reserved for \"no vote\""));
            }
            let row = acc.add_row(item.as_ref());
            acc.add_vote(row, worker.as_ref(), code)?;
        }
        Ok(acc.finish())
    }

    /// Number of rows (items)
    pub fn num_items(&self) -> usize {
        self.rows.len()
    }

    /// Number of columns (workers)
    pub fn num_workers(&self) -> usize {
        self.workers.len()
    }

    /// Number of non-zero cells
    pub fn num_votes(&self) -> usize {
        self.num_votes
    }

    /// Number of conflicting repeats resolved by keeping the first vote
    pub fn conflicts(&self) -> usize {
        self.conflicts
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Non-zero `(column, code)` entries of a row
    ///
    /// # Panics
    ///
    /// Panics if `row >= self.num_items()`.
    pub fn row(&self, row: usize) -> &[(u32, u32)] {
        &self.rows[row]
    }

    /// Cell value; `0` when the worker did not vote
    pub fn get(&self, row: usize, col: usize) -> u32 {
        self.rows
            .get(row)
            .and_then(|entries| {
                entries
                    .binary_search_by_key(&(col as u32), |&(c, _)| c)
                    .ok()
                    .map(|pos| entries[pos].1)
            })
            .unwrap_or(0)
    }

    /// Item identifier of a row
    pub fn item_id(&self, row: usize) -> Option<&str> {
        self.items.get_name(row as u32)
    }

    /// Worker identifier of a column
    pub fn worker_id(&self, col: usize) -> Option<&str> {
        self.workers.get_name(col as u32)
    }

    /// Row of an item identifier
    pub fn row_of(&self, item: &str) -> Option<usize> {
        self.items.get(item).map(|row| row as usize)
    }

    /// Column of a worker identifier
    pub fn col_of(&self, worker: &str) -> Option<usize> {
        self.workers.get(worker).map(|col| col as usize)
    }

    /// Column ↔ worker dictionary
    pub fn workers(&self) -> &Dictionary {
        &self.workers
    }

    /// Largest code stored in the matrix, `0` if there are no votes
    pub fn max_code(&self) -> u32 {
        self.rows
            .iter()
            .flat_map(|entries| entries.iter().map(|&(_, code)| code))
            .max()
            .unwrap_or(0)
    }

    /// Number of different codes stored in the matrix
    pub fn distinct_codes(&self) -> usize {
        self.rows
            .iter()
            .flat_map(|entries| entries.iter().map(|&(_, code)| code))
            .collect::<HashSet<u32>>()
            .len()
    }

    /// Number of votes cast by each worker
    pub fn coverage(&self) -> Vec<usize> {
        let mut counts = vec![0; self.num_workers()];
        for entries in &self.rows {
            for &(col, _) in entries {
                counts[col as usize] += 1;
            }
        }
        counts
    }

    /// Dense copy, zeros where no vote was cast
    pub fn to_dense(&self) -> Array2<u32> {
        let mut dense = Array2::zeros((self.num_items(), self.num_workers()));
        for (row, entries) in self.rows.iter().enumerate() {
            for &(col, code) in entries {
                dense[[row, col as usize]] = code;
            }
        }
        dense
    }

    /// Re-derive the `(item, worker, code)` triples from the non-zero cells
    pub fn votes(&self) -> impl Iterator<Item = (&str, &str, u32)> + '_ {
        self.rows.iter().enumerate().flat_map(move |(row, entries)| {
            entries.iter().filter_map(move |&(col, code)| {
                Some((
                    self.items.get_name(row as u32)?,
                    self.workers.get_name(col)?,
                    code,
                ))
            })
        })
    }
}

/// Builds label matrices for one data split of a [`Corpus`]
#[derive(Debug, Clone)]
pub struct MatrixBuilder<'a> {
    labels: &'a LabelSet,
    policy: DuplicatePolicy,
}

impl<'a> MatrixBuilder<'a> {
    pub fn new(labels: &'a LabelSet) -> Self {
        Self {
            labels,
            policy: DuplicatePolicy::default(),
        }
    }

    /// Set the duplicate vote policy (builder pattern)
    pub fn duplicate_policy(mut self, policy: DuplicatePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Build the matrix of one split: one row per active item of the split in
    /// arena order, one column per worker who voted within the split.
    pub fn build(&self, corpus: &Corpus, split: Split) -> Result<LabelMatrix> {
        self.build_filtered(corpus, |iid| corpus.split_of(iid) == split)
    }

    /// Build the matrix over every active item regardless of split
    pub fn build_all(&self, corpus: &Corpus) -> Result<LabelMatrix> {
        self.build_filtered(corpus, |_| true)
    }

    fn build_filtered<F>(&self, corpus: &Corpus, keep: F) -> Result<LabelMatrix>
    where
        F: Fn(u32) -> bool,
    {
        let mut acc = Accumulator::new(self.policy);
        let mut rows = HashMap::new();
        for (iid, item) in corpus.active_items() {
            if keep(iid) {
                rows.insert(iid, acc.add_row(&item.id));
            }
        }

        for vote in corpus.votes() {
            let Some(&row) = rows.get(&vote.item) else {
                continue;
            };
            // Vote ids are always interned by the corpus itself
            let (Some(worker), Some(label)) =
                (corpus.worker_name(vote.worker), corpus.class_name(vote.class))
            else {
                continue;
            };
            let code = self
                .labels
                .code(label)
                .ok_or_else(|| Error::UnknownLabel(label.to_string()))?;
            acc.add_vote(row, worker, code)?;
        }

        let matrix = acc.finish();
        tracing::debug!(
            items = matrix.num_items(),
            workers = matrix.num_workers(),
            votes = matrix.num_votes(),
            "built label matrix"
        );
        Ok(matrix)
    }
}

struct Accumulator {
    policy: DuplicatePolicy,
    items: Dictionary,
    workers: Dictionary,
    cells: Vec<HashMap<u32, u32>>,
    conflicts: usize,
}

impl Accumulator {
    fn new(policy: DuplicatePolicy) -> Self {
        Self {
            policy,
            items: Dictionary::new(),
            workers: Dictionary::new(),
            cells: Vec::new(),
            conflicts: 0,
        }
    }

    fn add_row(&mut self, item: &str) -> usize {
        let row = self.items.get_or_insert(item) as usize;
        if row == self.cells.len() {
            self.cells.push(HashMap::new());
        }
        row
    }

    fn add_vote(&mut self, row: usize, worker: &str, code: u32) -> Result<()> {
        let col = self.workers.get_or_insert(worker);
        let existing = self.cells[row].get(&col).copied();
        match existing {
            None => {
                self.cells[row].insert(col, code);
            }
            Some(first) if first == code => {}
            Some(first) => {
                let item = self.items.get_name(row as u32).unwrap_or_default();
                match self.policy {
                    DuplicatePolicy::Reject => {
                        return Err(Error::ConflictingVote {
                            item: item.to_string(),
                            worker: worker.to_string(),
                            first,
                            second: code,
                        });
                    }
                    DuplicatePolicy::KeepFirst => {
                        tracing::warn!(
                            item,
                            worker,
                            first,
                            second = code,
                            "conflicting vote, keeping the first"
                        );
                        self.conflicts += 1;
                    }
                }
            }
        }
        Ok(())
    }

    fn finish(self) -> LabelMatrix {
        let mut num_votes = 0;
        let rows = self
            .cells
            .into_iter()
            .map(|cells| {
                let mut entries: Vec<(u32, u32)> = cells.into_iter().collect();
                entries.sort_unstable();
                num_votes += entries.len();
                entries
            })
            .collect();
        LabelMatrix {
            rows,
            items: self.items,
            workers: self.workers,
            num_votes,
            conflicts: self.conflicts,
        }
    }
}
