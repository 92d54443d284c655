use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap};

#[derive(Debug, Clone, Copy)]
struct IndexKey {
    score: f64,
    arm: usize,
}

/// Highest score first, then lowest arm index (creation order).
impl Ord for IndexKey {
    fn cmp(&self, other: &Self) -> Ordering {
        other.score.total_cmp(&self.score).then(self.arm.cmp(&other.arm))
    }
}

impl PartialOrd for IndexKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for IndexKey {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for IndexKey {}

/// Arms ordered by index score.
///
/// An arm is in the index only while it waits to be selected: it leaves on
/// selection and comes back with a fresh score once its evaluation is
/// observed.
#[derive(Debug, Default)]
pub struct ArmIndex {
    ordered: BTreeSet<IndexKey>,
    scores: HashMap<usize, f64>,
}

impl ArmIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or rescore `arm`.
    pub fn insert(&mut self, arm: usize, score: f64) {
        self.remove(arm);
        self.ordered.insert(IndexKey { score, arm });
        self.scores.insert(arm, score);
    }

    pub fn remove(&mut self, arm: usize) -> bool {
        match self.scores.remove(&arm) {
            Some(score) => self.ordered.remove(&IndexKey { score, arm }),
            None => false,
        }
    }

    pub fn score(&self, arm: usize) -> Option<f64> {
        self.scores.get(&arm).copied()
    }

    pub fn contains(&self, arm: usize) -> bool {
        self.scores.contains_key(&arm)
    }

    pub fn peek(&self) -> Option<(usize, f64)> {
        self.ordered.first().map(|key| (key.arm, key.score))
    }

    /// Take the best arm unless every arm left is retired (`-inf`).
    pub fn pop_selectable(&mut self) -> Option<(usize, f64)> {
        let (arm, score) = self.peek()?;
        if score == f64::NEG_INFINITY {
            return None;
        }
        self.remove(arm);
        Some((arm, score))
    }

    pub fn len(&self) -> usize {
        self.scores.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scores.is_empty()
    }
}
