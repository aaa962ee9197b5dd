#![cfg(test)]

use approx::assert_relative_eq;

use super::grid::Grid;
use super::material::{DensityGrid, MaterialModel};

fn two_by_two() -> (Grid, DensityGrid) {
    let grid = Grid::planar(8, 8, 1.0, 1.0);
    let mut material = DensityGrid::covering(&grid, [2, 2, 1], 1.0, 13.0, 0.5);
    material.set_design(&[0.0, 0.25, 0.5, 1.0]);
    (grid, material)
}

#[test]
fn grid_nodes_fall_into_their_cells() {
    let (grid, material) = two_by_two();
    assert_relative_eq!(material.epsilon_at(grid.point([0, 0, 0])), 1.0);
    assert_relative_eq!(material.epsilon_at(grid.point([3, 3, 0])), 1.0);
    assert_relative_eq!(material.epsilon_at(grid.point([4, 0, 0])), 4.0);
    assert_relative_eq!(material.epsilon_at(grid.point([0, 4, 0])), 7.0);
    assert_relative_eq!(material.epsilon_at(grid.point([7, 7, 0])), 13.0);
}

#[test]
fn gradient_is_contrast_in_the_owning_cell_only() {
    let (grid, material) = two_by_two();
    let mut out = vec![0.0; 4];
    material.add_gradient_at(grid.point([5, 6, 0]), 2.0, &mut out);
    assert_eq!(out, vec![0.0, 0.0, 0.0, 24.0]);
    material.add_gradient_at(grid.point([1, 1, 0]), -1.0, &mut out);
    assert_eq!(out, vec![-12.0, 0.0, 0.0, 24.0]);
}

#[test]
fn gradient_matches_finite_difference_of_epsilon() {
    let (grid, mut material) = two_by_two();
    let p = grid.point([6, 2, 0]);
    let mut analytic = vec![0.0; 4];
    material.add_gradient_at(p, 1.0, &mut analytic);

    let base = material.design();
    let h = 1e-6;
    for j in 0..4 {
        let mut plus = base.clone();
        plus[j] += h;
        material.set_design(&plus);
        let eps_plus = material.epsilon_at(p);
        let mut minus = base.clone();
        minus[j] -= h;
        material.set_design(&minus);
        let eps_minus = material.epsilon_at(p);
        assert_relative_eq!((eps_plus - eps_minus) / (2.0 * h), analytic[j], epsilon = 1e-6);
    }
}

#[test]
fn points_outside_the_cell_wrap_periodically() {
    let (grid, material) = two_by_two();
    let inside = grid.point([1, 5, 0]);
    let shifted = [inside[0] + 1.0, inside[1] - 2.0, 0.0];
    assert_relative_eq!(material.epsilon_at(inside), material.epsilon_at(shifted));
}

#[test]
fn save_writes_json_design() {
    let (_, material) = two_by_two();
    let mut buf = Vec::new();
    material.save(&mut buf).expect("in-memory write");
    let parsed: DensityGrid = serde_json::from_slice(&buf).expect("valid json");
    assert_eq!(parsed.values, material.values);
    assert_eq!(parsed.cells, [2, 2, 1]);
}

#[test]
#[should_panic(expected = "design length mismatch")]
fn set_design_rejects_wrong_length() {
    let (_, mut material) = two_by_two();
    material.set_design(&[0.1, 0.2]);
}
