#![cfg(test)]

use proptest::prelude::*;

use super::partition::{KPartition, PartitionStrategy};

fn assert_exact_cover(partition: &KPartition) {
    let mut hits = vec![0usize; partition.nk()];
    for group in 0..partition.groups() {
        for k in partition.owned(group) {
            hits[k] += 1;
            assert_eq!(partition.owner(k), group);
        }
    }
    assert!(hits.iter().all(|&h| h == 1), "hits = {hits:?}");
}

#[test]
fn strided_assignment_steps_by_group_count() {
    let partition = KPartition::new(7, 3, PartitionStrategy::Strided);
    assert_eq!(partition.owned(0), vec![0, 3, 6]);
    assert_eq!(partition.owned(1), vec![1, 4]);
    assert_eq!(partition.owned(2), vec![2, 5]);
    assert_eq!(partition.rounds(), 3);
    assert_eq!(partition.k_in_round(1, 1), Some(4));
    assert_eq!(partition.k_in_round(1, 2), None);
}

#[test]
fn contiguous_split_gives_remainder_to_earliest_groups() {
    let partition = KPartition::new(10, 4, PartitionStrategy::Contiguous);
    assert_eq!(partition.contiguous(0), 0..3);
    assert_eq!(partition.contiguous(1), 3..6);
    assert_eq!(partition.contiguous(2), 6..8);
    assert_eq!(partition.contiguous(3), 8..10);
    assert_eq!(partition.rounds(), 3);
    assert_eq!(partition.k_in_round(2, 1), Some(7));
    assert_eq!(partition.k_in_round(2, 2), None);
}

#[test]
fn more_groups_than_k_points_leaves_trailing_groups_idle() {
    for strategy in [PartitionStrategy::Strided, PartitionStrategy::Contiguous] {
        let partition = KPartition::new(2, 4, strategy);
        assert_eq!(partition.rounds(), 1);
        assert!(partition.owned(3).is_empty());
        assert_exact_cover(&partition);
    }
}

#[test]
fn zero_k_points_need_no_rounds() {
    let partition = KPartition::new(0, 3, PartitionStrategy::Strided);
    assert_eq!(partition.rounds(), 0);
    assert!(partition.owned(0).is_empty());
}

#[test]
fn strided_is_the_default_strategy() {
    assert_eq!(PartitionStrategy::default(), PartitionStrategy::Strided);
}

proptest! {
    #[test]
    fn both_strategies_cover_every_k_exactly_once(nk in 0usize..64, groups in 1usize..12) {
        for strategy in [PartitionStrategy::Strided, PartitionStrategy::Contiguous] {
            assert_exact_cover(&KPartition::new(nk, groups, strategy));
        }
    }

    #[test]
    fn rounds_enumerate_each_groups_share_in_order(nk in 0usize..64, groups in 1usize..12) {
        for strategy in [PartitionStrategy::Strided, PartitionStrategy::Contiguous] {
            let partition = KPartition::new(nk, groups, strategy);
            for group in 0..groups {
                let by_round: Vec<usize> = (0..partition.rounds())
                    .filter_map(|round| partition.k_in_round(group, round))
                    .collect();
                prop_assert_eq!(by_round, partition.owned(group));
            }
        }
    }
}
