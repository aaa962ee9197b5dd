//! Dense infeasible primal-dual interior-point backend.
//!
//! The problem is first brought to the standard form
//!
//! ```text
//! min  c'x + f'w + sum_j <C_j, X_j> + const
//! s.t. A x + F w + sum_j A_j(X_j) = b,    x >= 0,  w free,  X_j psd
//! ```
//!
//! by shifting lower-bounded variables, negating upper-bounded ones,
//! substituting fixed ones and adding a slack column for every one-sided
//! row. Free variables stay free and enter the Newton system through an
//! augmented block. Directions use the HKM scaling; primal and dual step
//! lengths are chosen independently.
//!
//! Everything is dense, which is adequate for the few hundred rows an outer
//! iteration of the gap optimizer produces.

use log::{debug, trace, warn};
use nalgebra::{DMatrix, DVector, SymmetricEigen};
use serde::{Deserialize, Serialize};

use crate::problem::{Bound, SdpError, SdpProblem};
use crate::solver::{SdpSolution, SdpSolver, SolutionStatus};

/// Residual ratio below which a stalled solve still counts as near optimal.
const NEAR_OPTIMAL_FACTOR: f64 = 1e3;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IpmSettings {
    pub max_iterations: usize,
    /// Relative infeasibility and duality-gap target.
    pub tolerance: f64,
    /// Fraction of the distance to the cone boundary taken per step.
    pub step_fraction: f64,
    /// Centering parameter sigma.
    pub centering: f64,
    /// Iterate magnitude treated as divergence.
    pub divergence: f64,
}

impl Default for IpmSettings {
    fn default() -> Self {
        Self {
            max_iterations: 100,
            tolerance: 1e-8,
            step_fraction: 0.95,
            centering: 0.1,
            divergence: 1e10,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct InteriorPointSolver {
    settings: IpmSettings,
}

impl InteriorPointSolver {
    pub fn new(settings: IpmSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &IpmSettings {
        &self.settings
    }
}

impl SdpSolver for InteriorPointSolver {
    fn solve(&mut self, problem: &SdpProblem) -> Result<SdpSolution, SdpError> {
        let form = StandardForm::build(problem)?;
        debug!(
            "[sdp] {} rows, {} nonnegative, {} free, {} psd blocks (dims {:?})",
            form.b.len(),
            form.c.len(),
            form.cf.len(),
            form.blocks.len(),
            form.blocks.iter().map(|b| b.dim).collect::<Vec<_>>()
        );
        Ok(run(&form, &self.settings))
    }
}

// ============================================================================
// Standard form
// ============================================================================

/// Where an original scalar variable lives after the transformation.
#[derive(Debug, Clone, Copy)]
enum Recover {
    Shifted { col: usize, offset: f64 },
    Negated { col: usize, offset: f64 },
    Fixed(f64),
    Free(usize),
}

#[derive(Debug)]
struct ConeBlock {
    dim: usize,
    c: DMatrix<f64>,
    /// Nonzero row coefficients `(row, A_ij)`.
    rows: Vec<(usize, DMatrix<f64>)>,
}

#[derive(Debug)]
struct StandardForm {
    b: DVector<f64>,
    a: DMatrix<f64>,
    c: DVector<f64>,
    f: DMatrix<f64>,
    cf: DVector<f64>,
    blocks: Vec<ConeBlock>,
    constant: f64,
    recover: Vec<Recover>,
}

type Column = (Vec<(usize, f64)>, f64);

impl StandardForm {
    fn build(problem: &SdpProblem) -> Result<Self, SdpError> {
        let m = problem.num_cons();
        if m == 0 {
            return Err(SdpError::NoConstraints);
        }
        let n = problem.num_vars();

        let mut columns: Vec<Vec<(usize, f64)>> = vec![Vec::new(); n];
        for i in 0..m {
            for (j, v) in problem.row(i) {
                columns[j].push((i, v));
            }
        }

        let mut b = DVector::zeros(m);
        let mut nonneg: Vec<Column> = Vec::new();
        let mut free: Vec<Column> = Vec::new();
        for i in 0..m {
            b[i] = match problem.con_bound(i) {
                Bound::Fixed(v) => v,
                Bound::Lower(v) => {
                    nonneg.push((vec![(i, -1.0)], 0.0));
                    v
                }
                Bound::Upper(v) => {
                    nonneg.push((vec![(i, 1.0)], 0.0));
                    v
                }
                Bound::Free => return Err(SdpError::FreeConstraint { index: i }),
            };
        }

        let mut constant = problem.c_fixed();
        let mut recover = Vec::with_capacity(n);
        for (j, column) in columns.into_iter().enumerate() {
            let cost = problem.c()[j];
            let shift = match problem.var_bound(j) {
                Bound::Lower(v) | Bound::Upper(v) | Bound::Fixed(v) => v,
                Bound::Free => 0.0,
            };
            constant += cost * shift;
            for &(i, a) in &column {
                b[i] -= a * shift;
            }
            match problem.var_bound(j) {
                Bound::Lower(offset) => {
                    recover.push(Recover::Shifted {
                        col: nonneg.len(),
                        offset,
                    });
                    nonneg.push((column, cost));
                }
                Bound::Upper(offset) => {
                    recover.push(Recover::Negated {
                        col: nonneg.len(),
                        offset,
                    });
                    let negated = column.into_iter().map(|(i, a)| (i, -a)).collect();
                    nonneg.push((negated, -cost));
                }
                Bound::Fixed(v) => recover.push(Recover::Fixed(v)),
                Bound::Free => {
                    recover.push(Recover::Free(free.len()));
                    free.push((column, cost));
                }
            }
        }

        let (a, c) = dense_columns(m, &nonneg);
        let (f, cf) = dense_columns(m, &free);

        let blocks = (0..problem.num_barvars())
            .map(|j| {
                let rows = problem
                    .bar_a_rows(j)
                    .into_iter()
                    .filter_map(|i| problem.bar_a_dense(i, j).map(|a| (i, a)))
                    .collect();
                ConeBlock {
                    dim: problem.bar_dim(j).unwrap_or(0),
                    c: problem.bar_c_dense(j),
                    rows,
                }
            })
            .collect();

        Ok(Self {
            b,
            a,
            c,
            f,
            cf,
            blocks,
            constant,
            recover,
        })
    }

    fn cone_dim(&self) -> usize {
        self.c.len() + self.blocks.iter().map(|b| b.dim).sum::<usize>()
    }

    /// `sum_i y_i A_ij` for block `j`.
    fn adjoint(&self, block: usize, y: &DVector<f64>) -> DMatrix<f64> {
        let blk = &self.blocks[block];
        let mut out = DMatrix::zeros(blk.dim, blk.dim);
        for (i, a) in &blk.rows {
            out += a * y[*i];
        }
        out
    }

    fn residuals(&self, it: &Iterate) -> Residuals {
        let mut rp = &self.b - &self.a * &it.x - &self.f * &it.w;
        for (blk, x) in self.blocks.iter().zip(&it.xs) {
            for (i, a) in &blk.rows {
                rp[*i] -= a.dot(x);
            }
        }
        let rd = &self.c - self.a.tr_mul(&it.y) - &it.z;
        let rf = &self.cf - self.f.tr_mul(&it.y);
        let rds = self
            .blocks
            .iter()
            .enumerate()
            .map(|(j, blk)| &blk.c - self.adjoint(j, &it.y) - &it.zs[j])
            .collect();
        Residuals { rp, rd, rf, rds }
    }

    fn primal_objective(&self, it: &Iterate) -> f64 {
        let bar: f64 = self
            .blocks
            .iter()
            .zip(&it.xs)
            .map(|(blk, x)| blk.c.dot(x))
            .sum();
        self.c.dot(&it.x) + self.cf.dot(&it.w) + bar + self.constant
    }

    fn dual_objective(&self, it: &Iterate) -> f64 {
        self.b.dot(&it.y) + self.constant
    }

    fn recover_x(&self, it: &Iterate) -> Vec<f64> {
        self.recover
            .iter()
            .map(|r| match *r {
                Recover::Shifted { col, offset } => offset + it.x[col],
                Recover::Negated { col, offset } => offset - it.x[col],
                Recover::Fixed(v) => v,
                Recover::Free(col) => it.w[col],
            })
            .collect()
    }
}

fn dense_columns(m: usize, columns: &[Column]) -> (DMatrix<f64>, DVector<f64>) {
    let mut a = DMatrix::zeros(m, columns.len());
    let mut c = DVector::zeros(columns.len());
    for (j, (entries, cost)) in columns.iter().enumerate() {
        for &(i, v) in entries {
            a[(i, j)] += v;
        }
        c[j] = *cost;
    }
    (a, c)
}

// ============================================================================
// Iteration
// ============================================================================

struct Iterate {
    x: DVector<f64>,
    z: DVector<f64>,
    w: DVector<f64>,
    y: DVector<f64>,
    xs: Vec<DMatrix<f64>>,
    zs: Vec<DMatrix<f64>>,
}

impl Iterate {
    fn initial(form: &StandardForm) -> Self {
        let identities = || {
            form.blocks
                .iter()
                .map(|b| DMatrix::identity(b.dim, b.dim))
                .collect::<Vec<_>>()
        };
        Self {
            x: DVector::from_element(form.c.len(), 1.0),
            z: DVector::from_element(form.c.len(), 1.0),
            w: DVector::zeros(form.cf.len()),
            y: DVector::zeros(form.b.len()),
            xs: identities(),
            zs: identities(),
        }
    }

    fn complementarity(&self) -> f64 {
        self.x.dot(&self.z)
            + self
                .xs
                .iter()
                .zip(&self.zs)
                .map(|(x, z)| x.dot(z))
                .sum::<f64>()
    }

    fn primal_magnitude(&self) -> f64 {
        let blocks = self.xs.iter().map(|x| x.norm()).fold(0.0, f64::max);
        max_abs(self.x.iter()).max(max_abs(self.w.iter())).max(blocks)
    }
}

struct Residuals {
    rp: DVector<f64>,
    rd: DVector<f64>,
    rf: DVector<f64>,
    rds: Vec<DMatrix<f64>>,
}

/// Scaled stopping measures of one iterate.
#[derive(Debug, Clone, Copy)]
struct Measures {
    primal_infeasibility: f64,
    dual_infeasibility: f64,
    gap: f64,
    mu: f64,
}

impl Measures {
    fn converged(&self, tol: f64) -> bool {
        self.primal_infeasibility <= tol && self.dual_infeasibility <= tol && self.gap <= tol
    }

    fn is_finite(&self) -> bool {
        self.primal_infeasibility.is_finite()
            && self.dual_infeasibility.is_finite()
            && self.gap.is_finite()
            && self.mu.is_finite()
    }
}

fn max_abs<'a>(values: impl Iterator<Item = &'a f64>) -> f64 {
    values.fold(0.0, |acc, v| acc.max(v.abs()))
}

fn symmetrize(m: DMatrix<f64>) -> DMatrix<f64> {
    let t = m.transpose();
    (m + t) * 0.5
}

fn run(form: &StandardForm, settings: &IpmSettings) -> SdpSolution {
    let cone_dim = form.cone_dim();
    let b_scale = 1.0 + form.b.norm();
    let c_scale = 1.0
        + form.c.norm()
        + form.cf.norm()
        + form.blocks.iter().map(|b| b.c.norm()).sum::<f64>();

    let mut it = Iterate::initial(form);
    let mut sigma = settings.centering;
    let mut status = SolutionStatus::Unknown;
    let mut iterations = 0;

    loop {
        let res = form.residuals(&it);
        let pobj = form.primal_objective(&it);
        let dobj = form.dual_objective(&it);
        let dual_sq = res.rd.norm_squared()
            + res.rf.norm_squared()
            + res.rds.iter().map(|r| r.norm_squared()).sum::<f64>();
        let measures = Measures {
            primal_infeasibility: res.rp.norm() / b_scale,
            dual_infeasibility: dual_sq.sqrt() / c_scale,
            gap: (pobj - dobj).abs() / (1.0 + pobj.abs() + dobj.abs()),
            mu: if cone_dim > 0 {
                it.complementarity() / cone_dim as f64
            } else {
                0.0
            },
        };
        trace!(
            "[sdp] iter {iterations:3}: pinf={:.2e} dinf={:.2e} gap={:.2e} mu={:.2e}",
            measures.primal_infeasibility,
            measures.dual_infeasibility,
            measures.gap,
            measures.mu
        );

        if !measures.is_finite() {
            warn!("[sdp] non-finite iterate at iteration {iterations}");
            break;
        }
        if measures.converged(settings.tolerance) {
            status = SolutionStatus::Optimal;
            break;
        }
        if max_abs(it.y.iter()) > settings.divergence {
            status = SolutionStatus::PrimalInfeasibleCertificate;
            break;
        }
        if it.primal_magnitude() > settings.divergence {
            status = SolutionStatus::DualInfeasibleCertificate;
            break;
        }
        let near = measures.converged(settings.tolerance * NEAR_OPTIMAL_FACTOR);
        if iterations >= settings.max_iterations {
            if near {
                status = SolutionStatus::NearOptimal;
            }
            break;
        }

        match newton_step(form, &mut it, &res, sigma * measures.mu, settings.step_fraction) {
            Some(alpha) => {
                // short steps mean the iterate hugs the boundary; recenter
                sigma = if alpha < 0.2 {
                    settings.centering.max(0.5)
                } else {
                    settings.centering
                };
            }
            None => {
                warn!("[sdp] Newton system breakdown at iteration {iterations}");
                if near {
                    status = SolutionStatus::NearOptimal;
                }
                break;
            }
        }
        iterations += 1;
    }

    let solution = SdpSolution {
        status,
        x: form.recover_x(&it),
        y: it.y.iter().copied().collect(),
        primal_objective: form.primal_objective(&it),
        dual_objective: form.dual_objective(&it),
        iterations,
    };
    debug!(
        "[sdp] {} after {} iterations: primal {:.6e}, dual {:.6e}",
        solution.status, solution.iterations, solution.primal_objective, solution.dual_objective
    );
    solution
}

/// One HKM step; returns the smaller of the two step lengths taken, or
/// `None` if a factorization failed.
fn newton_step(
    form: &StandardForm,
    it: &mut Iterate,
    res: &Residuals,
    target: f64,
    step_fraction: f64,
) -> Option<f64> {
    let m = form.b.len();
    let nw = form.cf.len();

    // Nonnegative block: dx = target/z - x - d (rd - A'dy), d = x/z.
    let d = it.x.component_div(&it.z);
    let lp_base = DVector::from_iterator(
        it.x.len(),
        (0..it.x.len()).map(|j| target / it.z[j] - it.x[j] - d[j] * res.rd[j]),
    );
    let mut scaled = form.a.clone();
    for (j, mut col) in scaled.column_iter_mut().enumerate() {
        col *= d[j];
    }
    let mut schur = &scaled * form.a.transpose();
    let mut rhs = &res.rp - &form.a * &lp_base;

    // PSD blocks: dX = G + X (A'dy) Z^-1, G = target Z^-1 - X - X Rd Z^-1.
    let mut z_inverses = Vec::with_capacity(form.blocks.len());
    for (j, blk) in form.blocks.iter().enumerate() {
        let z_inv = it.zs[j].clone().cholesky()?.inverse();
        let x = &it.xs[j];
        let g = &z_inv * target - x - x * &res.rds[j] * &z_inv;
        let products: Vec<DMatrix<f64>> = blk.rows.iter().map(|(_, a)| x * a * &z_inv).collect();
        for ((i, _), p) in blk.rows.iter().zip(&products) {
            for (k, a) in &blk.rows {
                schur[(*k, *i)] += a.dot(p);
            }
        }
        for (i, a) in &blk.rows {
            rhs[*i] -= a.dot(&g);
        }
        z_inverses.push(z_inv);
    }
    let schur = symmetrize(schur);

    let size = m + nw;
    let mut system = DMatrix::zeros(size, size);
    system.view_mut((0, 0), (m, m)).copy_from(&schur);
    system.view_mut((0, m), (m, nw)).copy_from(&form.f);
    system.view_mut((m, 0), (nw, m)).copy_from(&form.f.transpose());
    let mut full_rhs = DVector::zeros(size);
    full_rhs.rows_mut(0, m).copy_from(&rhs);
    full_rhs.rows_mut(m, nw).copy_from(&res.rf);
    let solution = system.lu().solve(&full_rhs)?;
    if !solution.iter().all(|v| v.is_finite()) {
        return None;
    }
    let dy = solution.rows(0, m).into_owned();
    let dw = solution.rows(m, nw).into_owned();

    let dz = &res.rd - form.a.tr_mul(&dy);
    let dx = DVector::from_iterator(
        it.x.len(),
        (0..it.x.len()).map(|j| target / it.z[j] - it.x[j] - d[j] * dz[j]),
    );
    let mut dzs = Vec::with_capacity(form.blocks.len());
    let mut dxs = Vec::with_capacity(form.blocks.len());
    for (j, z_inv) in z_inverses.iter().enumerate() {
        let dz_j = &res.rds[j] - form.adjoint(j, &dy);
        let x = &it.xs[j];
        let dx_j = symmetrize(z_inv * target - x - x * &dz_j * z_inv);
        dzs.push(dz_j);
        dxs.push(dx_j);
    }

    let mut primal_max = max_linear_step(&it.x, &dx);
    let mut dual_max = max_linear_step(&it.z, &dz);
    for j in 0..form.blocks.len() {
        primal_max = primal_max.min(max_psd_step(&it.xs[j], &dxs[j])?);
        dual_max = dual_max.min(max_psd_step(&it.zs[j], &dzs[j])?);
    }
    let alpha_p = (step_fraction * primal_max).min(1.0);
    let alpha_d = (step_fraction * dual_max).min(1.0);

    it.x += &dx * alpha_p;
    it.w += &dw * alpha_p;
    it.y += &dy * alpha_d;
    it.z += &dz * alpha_d;
    for j in 0..form.blocks.len() {
        let x = &it.xs[j] + &dxs[j] * alpha_p;
        let z = &it.zs[j] + &dzs[j] * alpha_d;
        it.xs[j] = symmetrize(x);
        it.zs[j] = symmetrize(z);
    }
    Some(alpha_p.min(alpha_d))
}

/// Largest `alpha` keeping `v + alpha dv >= 0`.
fn max_linear_step(v: &DVector<f64>, dv: &DVector<f64>) -> f64 {
    v.iter()
        .zip(dv.iter())
        .filter(|&(_, &d)| d < 0.0)
        .map(|(&x, &d)| -x / d)
        .fold(f64::INFINITY, f64::min)
}

/// Largest `alpha` keeping `X + alpha dX` positive semidefinite.
fn max_psd_step(x: &DMatrix<f64>, dx: &DMatrix<f64>) -> Option<f64> {
    if x.nrows() == 0 {
        return Some(f64::INFINITY);
    }
    let l = x.clone().cholesky()?.l();
    let half = l.solve_lower_triangular(dx)?;
    let scaled = symmetrize(l.solve_lower_triangular(&half.transpose())?);
    if !scaled.iter().all(|v| v.is_finite()) {
        return None;
    }
    let eig = SymmetricEigen::try_new(scaled, f64::EPSILON, 1000)?;
    let lambda_min = eig.eigenvalues.iter().copied().fold(f64::INFINITY, f64::min);
    Some(if lambda_min >= 0.0 {
        f64::INFINITY
    } else {
        -1.0 / lambda_min
    })
}
