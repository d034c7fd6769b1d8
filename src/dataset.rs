use std::io::Read;

use bstr::ByteSlice;
use rand::seq::SliceRandom;
use rand::{rngs::StdRng, SeedableRng};

use crate::dictionary::Dictionary;
use crate::error::{Error, Result};
use crate::matrix::LabelMatrix;

/// Data split an item belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Split {
    #[default]
    Train,
    Dev,
    Test,
}

/// A unit to be labeled
#[derive(Debug, Clone, PartialEq)]
pub struct Item {
    /// External item identifier
    pub id: String,
    /// Raw text of the item
    pub text: String,
}

/// One worker's claimed class for one item
///
/// All fields are ids into the owning [`Corpus`]'s arenas.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Vote {
    pub item: u32,
    pub worker: u32,
    pub class: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Gold {
    class: u32,
    valid: bool,
}

/// Explicit enumeration of the label classes
///
/// Class names are sorted and coded `1..=K`; code `0` means "no vote" and is
/// never assigned to a class.
#[derive(Debug, Clone, PartialEq)]
pub struct LabelSet {
    names: Dictionary,
}

impl LabelSet {
    /// Build a label set from class names; duplicates are merged
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut names: Vec<String> = names.into_iter().map(|s| s.as_ref().to_string()).collect();
        names.sort();
        names.dedup();
        Self {
            names: names.into_iter().collect(),
        }
    }

    /// Number of classes (the cardinality `K`)
    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Code (`1..=K`) of a class name
    pub fn code(&self, name: &str) -> Option<u32> {
        self.names.get(name).map(|id| id + 1)
    }

    /// Class name of a code
    pub fn name(&self, code: u32) -> Option<&str> {
        code.checked_sub(1).and_then(|id| self.names.get_name(id))
    }

    /// Iterate over `(name, code)` pairs in code order
    pub fn iter(&self) -> impl Iterator<Item = (&str, u32)> + '_ {
        self.names.iter().map(|(name, id)| (name, id + 1))
    }
}

/// In-memory record store for items, votes and gold labels
///
/// A corpus is created by the caller, filled once, and then only read by the
/// matrix builder and evaluation code.
#[derive(Debug, Clone, Default)]
pub struct Corpus {
    item_ids: Dictionary,
    items: Vec<Item>,
    active: Vec<bool>,
    splits: Vec<Split>,
    gold: Vec<Option<Gold>>,
    workers: Dictionary,
    classes: Dictionary,
    votes: Vec<Vote>,
}

impl Corpus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Intern an item, returning its arena id. The first non-empty text wins.
    pub fn add_item(&mut self, id: &str, text: &str) -> u32 {
        let iid = self.item_ids.get_or_insert(id);
        let idx = iid as usize;
        if idx == self.items.len() {
            self.items.push(Item {
                id: id.to_string(),
                text: text.to_string(),
            });
            self.active.push(true);
            self.splits.push(Split::default());
            self.gold.push(None);
        } else if self.items[idx].text.is_empty() && !text.is_empty() {
            self.items[idx].text = text.to_string();
        }
        iid
    }

    /// Append a vote. Every record is kept, duplicates included; the matrix
    /// builder decides how conflicting repeats are handled.
    pub fn add_vote(&mut self, item: &str, worker: &str, label: &str) {
        let item = self.add_item(item, "");
        let worker = self.workers.get_or_insert(worker);
        let class = self.classes.get_or_insert(label);
        self.votes.push(Vote {
            item,
            worker,
            class,
        });
    }

    /// Record the gold label of an item. Invalid rows are kept but never joined.
    pub fn add_gold(&mut self, item: &str, label: &str, valid: bool) {
        let iid = self.add_item(item, "") as usize;
        let class = self.classes.get_or_insert(label);
        self.gold[iid] = Some(Gold { class, valid });
    }

    /// Read tab-separated vote records: `item_id, worker_id, label[, text]`
    pub fn read_votes<R: Read>(&mut self, mut reader: R) -> Result<usize> {
        let mut buf = Vec::new();
        reader.read_to_end(&mut buf)?;
        let mut count = 0;
        for (lineno, fields) in records(&buf) {
            let fields = fields?;
            if fields.len() < 3 {
                return Err(Error::Parse {
                    line: lineno,
                    message: format!("expected at least 3 fields, got {}", fields.len()),
                });
            }
            if fields[0] == "item_id" {
                continue;
            }
            let (item, worker, label) = (fields[0], fields[1], fields[2]);
            if item.is_empty() || worker.is_empty() || label.is_empty() {
                return Err(Error::Parse {
                    line: lineno,
                    message: "item, worker and label must be non-empty".to_string(),
                });
            }
            let text = fields.get(3).copied().unwrap_or("");
            self.add_item(item, text);
            self.add_vote(item, worker, label);
            count += 1;
        }
        tracing::debug!(votes = count, "read vote records");
        Ok(count)
    }

    /// Read tab-separated gold records: `item_id, label, valid`
    pub fn read_gold<R: Read>(&mut self, mut reader: R) -> Result<usize> {
        let mut buf = Vec::new();
        reader.read_to_end(&mut buf)?;
        let mut count = 0;
        for (lineno, fields) in records(&buf) {
            let fields = fields?;
            if fields.len() != 3 {
                return Err(Error::Parse {
                    line: lineno,
                    message: format!("expected 3 fields, got {}", fields.len()),
                });
            }
            if fields[0] == "item_id" {
                continue;
            }
            let valid = parse_flag(fields[2]).ok_or_else(|| Error::Parse {
                line: lineno,
                message: format!("invalid validity flag {:?}", fields[2]),
            })?;
            self.add_gold(fields[0], fields[1], valid);
            count += 1;
        }
        tracing::debug!(gold = count, "read gold records");
        Ok(count)
    }

    /// Exclude items without a valid gold label and drop their votes.
    ///
    /// Returns the number of items excluded.
    pub fn restrict_to_gold(&mut self) -> usize {
        let mut excluded = 0;
        for (idx, active) in self.active.iter_mut().enumerate() {
            let joined = matches!(self.gold[idx], Some(Gold { valid: true, .. }));
            if *active && !joined {
                *active = false;
                excluded += 1;
            }
        }
        let active = &self.active;
        self.votes.retain(|vote| active[vote.item as usize]);
        if excluded > 0 {
            tracing::debug!(excluded, "excluded items without valid gold");
        }
        excluded
    }

    /// Build the class enumeration from every label seen in votes and gold
    pub fn label_set(&self) -> LabelSet {
        LabelSet::new(self.classes.iter().map(|(name, _)| name))
    }

    /// Shuffle active items with a fixed seed and assign them to splits
    pub fn assign_splits(&mut self, dev_fraction: f64, test_fraction: f64, seed: u64) -> Result<()> {
        if !(0.0..=1.0).contains(&dev_fraction) {
            return Err(Error::param("dev_fraction must be in [0, 1]"));
        }
        if !(0.0..=1.0).contains(&test_fraction) {
            return Err(Error::param("test_fraction must be in [0, 1]"));
        }
        if dev_fraction + test_fraction > 1.0 {
            return Err(Error::param("dev_fraction + test_fraction must not exceed 1"));
        }

        let mut indices: Vec<usize> = (0..self.items.len()).filter(|&i| self.active[i]).collect();
        let mut rng = StdRng::seed_from_u64(seed);
        indices.shuffle(&mut rng);

        let num_test = (indices.len() as f64 * test_fraction).round() as usize;
        let num_dev = ((indices.len() as f64 * dev_fraction).round() as usize)
            .min(indices.len() - num_test);
        for (rank, &idx) in indices.iter().enumerate() {
            self.splits[idx] = if rank < num_test {
                Split::Test
            } else if rank < num_test + num_dev {
                Split::Dev
            } else {
                Split::Train
            };
        }
        Ok(())
    }

    /// Active items of a split, in arena order
    pub fn items_in(&self, split: Split) -> impl Iterator<Item = (u32, &Item)> + '_ {
        self.active_items()
            .filter(move |(iid, _)| self.splits[*iid as usize] == split)
    }

    /// All active items, in arena order
    pub fn active_items(&self) -> impl Iterator<Item = (u32, &Item)> + '_ {
        self.items
            .iter()
            .enumerate()
            .filter(move |(idx, _)| self.active[*idx])
            .map(|(idx, item)| (idx as u32, item))
    }

    pub fn split_of(&self, item: u32) -> Split {
        self.splits[item as usize]
    }

    pub fn votes(&self) -> &[Vote] {
        &self.votes
    }

    pub fn item(&self, id: u32) -> Option<&Item> {
        self.items.get(id as usize)
    }

    pub fn item_index(&self, id: &str) -> Option<u32> {
        self.item_ids.get(id)
    }

    pub fn worker_name(&self, id: u32) -> Option<&str> {
        self.workers.get_name(id)
    }

    pub fn class_name(&self, id: u32) -> Option<&str> {
        self.classes.get_name(id)
    }

    pub fn num_items(&self) -> usize {
        self.items.len()
    }

    pub fn num_workers(&self) -> usize {
        self.workers.len()
    }

    /// Valid gold label of an item, by name
    pub fn gold_label(&self, item: &str) -> Option<&str> {
        let iid = self.item_ids.get(item)?;
        match self.gold[iid as usize] {
            Some(Gold { class, valid: true }) => self.classes.get_name(class),
            _ => None,
        }
    }

    /// Gold codes aligned to the rows of a label matrix
    pub fn gold_codes(&self, matrix: &LabelMatrix, labels: &LabelSet) -> Vec<Option<u32>> {
        (0..matrix.num_items())
            .map(|row| {
                matrix
                    .item_id(row)
                    .and_then(|id| self.gold_label(id))
                    .and_then(|name| labels.code(name))
            })
            .collect()
    }

    /// Item texts aligned to the rows of a label matrix
    pub fn texts(&self, matrix: &LabelMatrix) -> Vec<&str> {
        (0..matrix.num_items())
            .map(|row| {
                matrix
                    .item_id(row)
                    .and_then(|id| self.item_ids.get(id))
                    .map(|iid| self.items[iid as usize].text.as_str())
                    .unwrap_or("")
            })
            .collect()
    }
}

type Record<'a> = (usize, Result<Vec<&'a str>>);

/// Split a buffer into tab-separated records, skipping blanks and comments
fn records(buf: &[u8]) -> impl Iterator<Item = Record<'_>> + '_ {
    buf.lines()
        .enumerate()
        .map(|(idx, line)| (idx + 1, line.trim()))
        .filter(|(_, line)| !line.is_empty() && !line.starts_with(b"#"))
        .map(|(lineno, line)| {
            let fields = line
                .split_str("\t")
                .map(|field| {
                    field.to_str().map(str::trim).map_err(|_| Error::Parse {
                        line: lineno,
                        message: "invalid UTF-8".to_string(),
                    })
                })
                .collect::<Result<Vec<_>>>();
            (lineno, fields)
        })
}

fn parse_flag(s: &str) -> Option<bool> {
    match s.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" => Some(true),
        "0" | "false" | "no" => Some(false),
        _ => None,
    }
}
