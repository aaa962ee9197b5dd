//! Near-degenerate subspaces bracketing the gap, and the running gap bounds.

use std::ops::RangeInclusive;

use serde::{Deserialize, Serialize};

/// First index `i` with `v[i] * scale + shift > 0`, or `v.len()` if none.
pub fn find_first_positive(v: &[f64], scale: f64, shift: f64) -> usize {
    v.iter()
        .position(|&x| x * scale + shift > 0.0)
        .unwrap_or(v.len())
}

/// Last index `i` with `v[i] * scale + shift > 0`, or `v.len()` if none.
pub fn find_last_positive(v: &[f64], scale: f64, shift: f64) -> usize {
    v.iter()
        .rposition(|&x| x * scale + shift > 0.0)
        .unwrap_or(v.len())
}

/// Which side of the gap a subspace sits on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Subspace {
    Lower,
    Upper,
}

impl Subspace {
    pub const BOTH: [Subspace; 2] = [Subspace::Lower, Subspace::Upper];

    /// Sign applied to the eigenvalue sensitivities of this side.
    pub fn scale(self) -> f64 {
        match self {
            Subspace::Lower => -1.0,
            Subspace::Upper => 1.0,
        }
    }
}

/// Number of bands kept on each side of the gap at one k-point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubspaceSizes {
    pub band1: usize,
    pub band2: usize,
    pub nl: usize,
    pub nu: usize,
}

impl SubspaceSizes {
    /// Size the subspaces from squared frequencies sorted ascending.
    ///
    /// Bands are 1-based. The lower subspace collects the bands within a
    /// relative `low_tol` below `band1`, the upper one the bands within
    /// `upp_tol` above `band2`. A lower search that finds nothing keeps every
    /// band up to `band1`; an upper search that finds nothing keeps every band
    /// from `band2` on. Both sizes are at least 1.
    pub fn from_spectrum(
        eigenvalues: &[f64],
        band1: usize,
        band2: usize,
        low_tol: f64,
        upp_tol: f64,
    ) -> Self {
        let num_bands = eigenvalues.len();
        assert!(
            band1 >= 1 && band1 < band2 && band2 <= num_bands,
            "gap bands must satisfy 1 <= band1 < band2 <= {num_bands}"
        );
        let lower_ref = eigenvalues[band1 - 1];
        let upper_ref = eigenvalues[band2 - 1];

        let last_below = find_last_positive(eigenvalues, -1.0, lower_ref * (1.0 - low_tol));
        let nl = if last_below == num_bands {
            band1
        } else {
            (band1 - 1).saturating_sub(last_below)
        };

        let first_above = find_first_positive(eigenvalues, 1.0, -upper_ref * (1.0 + upp_tol));
        let nu = first_above.saturating_sub(band2 - 1);

        Self {
            band1,
            band2,
            nl: nl.clamp(1, band1),
            nu: nu.clamp(1, num_bands - band2 + 1),
        }
    }

    pub fn size(&self, side: Subspace) -> usize {
        match side {
            Subspace::Lower => self.nl,
            Subspace::Upper => self.nu,
        }
    }

    /// 1-based bands spanned by `side`.
    pub fn bands(&self, side: Subspace) -> RangeInclusive<usize> {
        match side {
            Subspace::Lower => (self.band1 + 1 - self.nl)..=self.band1,
            Subspace::Upper => self.band2..=(self.band2 + self.nu - 1),
        }
    }
}

/// Largest lower-band and smallest upper-band eigenvalue seen so far.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GapBounds {
    pub lambda_l: f64,
    pub lambda_u: f64,
}

impl Default for GapBounds {
    fn default() -> Self {
        Self {
            lambda_l: 0.0,
            lambda_u: 100.0,
        }
    }
}

impl GapBounds {
    /// Bounds carried by one spectrum of squared frequencies.
    pub fn from_spectrum(eigenvalues: &[f64], band1: usize, band2: usize) -> Self {
        let mut bounds = Self::default();
        bounds.merge(Self {
            lambda_l: eigenvalues[band1 - 1],
            lambda_u: eigenvalues[band2 - 1],
        });
        bounds
    }

    pub fn merge(&mut self, other: GapBounds) {
        self.lambda_l = self.lambda_l.max(other.lambda_l);
        self.lambda_u = self.lambda_u.min(other.lambda_u);
    }

    /// Relative gap in squared frequency.
    pub fn eigen_gap(&self) -> f64 {
        2.0 * (self.lambda_u - self.lambda_l) / (self.lambda_l + self.lambda_u)
    }

    /// Relative gap in frequency.
    pub fn freq_gap(&self) -> f64 {
        let omega_l = self.lambda_l.max(0.0).sqrt();
        let omega_u = self.lambda_u.max(0.0).sqrt();
        2.0 * (omega_u - omega_l) / (omega_l + omega_u)
    }
}
