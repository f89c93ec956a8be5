//! Majority-vote smoothing of per-batch labels.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::types::ActivityLabel;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregatorConfig {
    /// Number of recent labels considered.
    pub history: usize,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self { history: 3 }
    }
}

/// Rolling label history with a sticky majority vote.
///
/// - The label with the most votes in the history wins.
/// - On a tie the previously reported label is kept if it is among the tied
///   labels; otherwise the most recent of the tied labels wins.
/// - System labels (`UNCALIBRATED`, `UNKNOWN`, `IDLE`, `ERROR`) only win when
///   the history holds no real activity.
/// - An empty history reports `UNKNOWN`.
#[derive(Debug, Clone)]
pub struct Aggregator {
    capacity: usize,
    history: VecDeque<ActivityLabel>,
    reported: ActivityLabel,
}

impl Aggregator {
    pub fn new(config: &AggregatorConfig) -> Self {
        let capacity = config.history.max(1);
        Self {
            capacity,
            history: VecDeque::with_capacity(capacity),
            reported: ActivityLabel::Unknown,
        }
    }

    /// Push a label and return the smoothed label.
    pub fn add(&mut self, label: ActivityLabel) -> ActivityLabel {
        if self.history.len() == self.capacity {
            self.history.pop_front();
        }
        self.history.push_back(label);
        self.reported = self.vote();
        self.reported
    }

    /// Smoothed label for the current history.
    pub fn current(&self) -> ActivityLabel {
        self.reported
    }

    pub fn len(&self) -> usize {
        self.history.len()
    }

    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }

    pub fn reset(&mut self) {
        self.history.clear();
        self.reported = ActivityLabel::Unknown;
    }

    fn vote(&self) -> ActivityLabel {
        let has_real = self.history.iter().any(|l| !l.is_system());
        let eligible = |l: &ActivityLabel| !has_real || !l.is_system();

        // (label, votes, position of most recent vote)
        let mut tally: Vec<(ActivityLabel, usize, usize)> = Vec::new();
        for (pos, label) in self.history.iter().enumerate().filter(|&(_, l)| eligible(l)) {
            match tally.iter_mut().find(|(l, _, _)| l == label) {
                Some(entry) => {
                    entry.1 += 1;
                    entry.2 = pos;
                }
                None => tally.push((*label, 1, pos)),
            }
        }

        let top = match tally.iter().map(|(_, votes, _)| *votes).max() {
            Some(top) => top,
            None => return ActivityLabel::Unknown,
        };
        let tied: Vec<&(ActivityLabel, usize, usize)> =
            tally.iter().filter(|(_, votes, _)| *votes == top).collect();
        if tied.len() > 1 && tied.iter().any(|(l, _, _)| *l == self.reported) {
            return self.reported;
        }
        tied.iter()
            .max_by_key(|(_, _, pos)| *pos)
            .map(|(l, _, _)| *l)
            .unwrap_or(ActivityLabel::Unknown)
    }
}
