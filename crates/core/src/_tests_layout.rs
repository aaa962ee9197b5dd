#![cfg(test)]

use std::collections::BTreeSet;

use super::grid::Grid;
use super::layout::{Decomposition, FieldLayout, Transform};

fn coords_of(layout: &FieldLayout) -> Vec<[usize; 3]> {
    layout.samples().map(|s| s.coords).collect()
}

fn assert_doubling_consistent(layout: &FieldLayout) {
    for sample in layout.samples() {
        assert_eq!(
            sample.mirror.is_some(),
            layout.is_doubled(sample.index),
            "mirror/doubling disagree at index {} ({:?})",
            sample.index,
            layout.decomposition()
        );
    }
}

#[test]
fn serial_complex_layout_uses_x_major_indexing() {
    let grid = Grid::new(3, 4, 2, 1.0, 1.0, 1.0);
    let layout = FieldLayout::serial(grid, Transform::Complex);
    assert_eq!(layout.len(), grid.len());
    for sample in layout.samples() {
        let [i, j, k] = sample.coords;
        assert_eq!(sample.index, (i * grid.ny + j) * grid.nz + k);
        assert!(sample.mirror.is_none());
    }
    let unique: BTreeSet<_> = coords_of(&layout).into_iter().collect();
    assert_eq!(unique.len(), grid.len());
}

#[test]
fn slab_rows_split_with_remainder_to_earliest_ranks() {
    let grid = Grid::planar(5, 10, 1.0, 1.0);
    let expected = [(4, 0), (3, 4), (3, 7)];
    for (rank, &(local_ny, local_y_start)) in expected.iter().enumerate() {
        let layout = FieldLayout::slab(grid, Transform::Complex, rank, 3);
        assert_eq!(
            layout.decomposition(),
            Decomposition::Slab {
                local_ny,
                local_y_start
            }
        );
        assert_eq!(layout.len(), grid.nx * local_ny);
    }
}

#[test]
fn complex_slabs_cover_the_grid_exactly_once() {
    let grid = Grid::planar(4, 7, 1.0, 1.0);
    let mut seen = BTreeSet::new();
    let mut total = 0;
    for rank in 0..3 {
        let layout = FieldLayout::slab(grid, Transform::Complex, rank, 3);
        for sample in layout.samples() {
            let [i, j, _] = sample.coords;
            let Decomposition::Slab { local_y_start, .. } = layout.decomposition() else {
                unreachable!("slab layout expected");
            };
            assert_eq!(sample.index, (j - local_y_start) * grid.nx + i);
            seen.insert(sample.coords);
            total += 1;
        }
    }
    assert_eq!(total, grid.len());
    assert_eq!(seen.len(), grid.len());
}

#[test]
fn real_serial_planar_layout_halves_last_axis() {
    let grid = Grid::planar(4, 6, 1.0, 1.0);
    let layout = FieldLayout::serial(grid, Transform::RealToComplex);
    assert_eq!(layout.last_dim(), 6);
    assert_eq!(layout.last_dim_stored(), 4);
    assert_eq!(layout.len(), 16);

    let sample = layout.sample(4 + 1);
    assert_eq!(sample.coords, [1, 1, 0]);
    assert_eq!(sample.mirror, Some([3, 5, 0]));

    // Zero and Nyquist columns stand for themselves.
    assert!(layout.sample(4).mirror.is_none());
    assert!(layout.sample(4 + 3).mirror.is_none());
    assert_doubling_consistent(&layout);
}

#[test]
fn real_serial_volume_layout_maps_other_dims_to_xy() {
    let grid = Grid::new(2, 3, 4, 1.0, 1.0, 1.0);
    let layout = FieldLayout::serial(grid, Transform::RealToComplex);
    assert_eq!(layout.last_dim(), 4);
    assert_eq!(layout.len(), 6 * 3);
    let sample = layout.sample(4 * 3 + 1);
    assert_eq!(sample.coords, [1, 1, 1]);
    assert_eq!(sample.mirror, Some([1, 2, 3]));
    assert_doubling_consistent(&layout);
}

#[test]
fn real_serial_line_layout_uses_x_as_last_axis() {
    let grid = Grid::new(8, 1, 1, 1.0, 1.0, 1.0);
    let layout = FieldLayout::serial(grid, Transform::RealToComplex);
    assert_eq!(layout.len(), 5);
    assert_eq!(layout.sample(3).coords, [3, 0, 0]);
    assert_eq!(layout.sample(3).mirror, Some([5, 0, 0]));
    assert!(layout.sample(4).mirror.is_none());
    assert_doubling_consistent(&layout);
}

#[test]
fn real_slabs_reproduce_the_serial_sample_set() {
    let grid = Grid::planar(4, 6, 1.0, 1.0);
    let serial: BTreeSet<_> = FieldLayout::serial(grid, Transform::RealToComplex)
        .samples()
        .map(|s| (s.coords, s.mirror))
        .collect();

    let mut distributed = BTreeSet::new();
    for rank in 0..2 {
        let layout = FieldLayout::slab(grid, Transform::RealToComplex, rank, 2);
        assert_doubling_consistent(&layout);
        for sample in layout.samples() {
            assert!(distributed.insert((sample.coords, sample.mirror)));
        }
    }
    assert_eq!(serial, distributed);
}

#[test]
fn real_volume_slabs_split_y_and_halve_z() {
    let grid = Grid::new(2, 4, 6, 1.0, 1.0, 1.0);
    let mut count = 0;
    for rank in 0..2 {
        let layout = FieldLayout::slab(grid, Transform::RealToComplex, rank, 2);
        assert_eq!(layout.len(), 2 * 2 * 4);
        assert_doubling_consistent(&layout);
        count += layout.len();
    }
    assert_eq!(count, FieldLayout::serial(grid, Transform::RealToComplex).len());
}

#[test]
fn mirror_coords_wrap_nonzero_axes() {
    let layout = FieldLayout::serial(Grid::new(4, 6, 8, 1.0, 1.0, 1.0), Transform::Complex);
    assert_eq!(layout.mirror_coords([0, 0, 0]), [0, 0, 0]);
    assert_eq!(layout.mirror_coords([1, 0, 7]), [3, 0, 1]);
}

#[test]
#[should_panic(expected = "real-to-complex slabs need a grid of rank 2 or more")]
fn real_slab_rejects_line_grids() {
    let _ = FieldLayout::slab(Grid::new(8, 1, 1, 1.0, 1.0, 1.0), Transform::RealToComplex, 0, 1);
}
