//! Static assignment of k-points to process groups.
//!
//! Pure integer arithmetic: the answer depends only on `(nk, groups, group)`.

use std::ops::Range;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartitionStrategy {
    /// `k = group, group + groups, ...`
    #[default]
    Strided,
    /// One contiguous run per group, the remainder going to the earliest groups.
    Contiguous,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KPartition {
    nk: usize,
    groups: usize,
    strategy: PartitionStrategy,
}

impl KPartition {
    pub fn new(nk: usize, groups: usize, strategy: PartitionStrategy) -> Self {
        assert!(groups > 0, "partition needs at least one group");
        Self {
            nk,
            groups,
            strategy,
        }
    }

    pub fn nk(&self) -> usize {
        self.nk
    }

    pub fn groups(&self) -> usize {
        self.groups
    }

    pub fn strategy(&self) -> PartitionStrategy {
        self.strategy
    }

    /// `[start, end)` owned by `group` under the contiguous split.
    pub fn contiguous(&self, group: usize) -> Range<usize> {
        assert!(group < self.groups, "group {group} out of range");
        let base = self.nk / self.groups;
        let rem = self.nk % self.groups;
        let (start, mut end) = if group < rem {
            ((base + 1) * group, (base + 1) * (group + 1))
        } else {
            (base * group + rem, base * (group + 1) + rem)
        };
        if group == self.groups - 1 {
            end = self.nk;
        }
        start..end
    }

    /// `group, group + groups, ...` below `nk`.
    pub fn strided(&self, group: usize) -> impl Iterator<Item = usize> {
        assert!(group < self.groups, "group {group} out of range");
        (group..self.nk).step_by(self.groups)
    }

    /// k-points owned by `group` under the configured strategy, ascending.
    pub fn owned(&self, group: usize) -> Vec<usize> {
        match self.strategy {
            PartitionStrategy::Strided => self.strided(group).collect(),
            PartitionStrategy::Contiguous => self.contiguous(group).collect(),
        }
    }

    /// Group owning k-point `k`.
    pub fn owner(&self, k: usize) -> usize {
        assert!(k < self.nk, "k-point {k} out of range");
        match self.strategy {
            PartitionStrategy::Strided => k % self.groups,
            PartitionStrategy::Contiguous => (0..self.groups)
                .find(|&g| self.contiguous(g).contains(&k))
                .unwrap_or(self.groups - 1),
        }
    }

    /// Exchange rounds needed so every group handles its k-points one per round.
    pub fn rounds(&self) -> usize {
        match self.strategy {
            PartitionStrategy::Strided => self.nk.div_ceil(self.groups),
            PartitionStrategy::Contiguous => (0..self.groups)
                .map(|g| self.contiguous(g).len())
                .max()
                .unwrap_or(0),
        }
    }

    /// The k-point `group` handles in `round`, if any.
    pub fn k_in_round(&self, group: usize, round: usize) -> Option<usize> {
        match self.strategy {
            PartitionStrategy::Strided => {
                let k = group + round * self.groups;
                (k < self.nk).then_some(k)
            }
            PartitionStrategy::Contiguous => {
                let range = self.contiguous(group);
                let k = range.start + round;
                range.contains(&k).then_some(k)
            }
        }
    }
}
