//! Three-component complex field storage over the local samples of a layout.
//!
//! Components are interleaved: sample `i` owns entries `3*i .. 3*i + 3`.

use num_complex::Complex64;

use crate::layout::FieldLayout;

/// Hermitian product accumulated over the local samples of two fields.
pub type Energy = Complex64;

#[derive(Debug, Clone)]
pub struct VectorField {
    samples: usize,
    data: Vec<Complex64>,
}

impl VectorField {
    pub fn zeros(samples: usize) -> Self {
        Self {
            samples,
            data: vec![Complex64::default(); 3 * samples],
        }
    }

    pub fn for_layout(layout: &FieldLayout) -> Self {
        Self::zeros(layout.len())
    }

    pub fn from_vec(samples: usize, data: Vec<Complex64>) -> Self {
        assert_eq!(
            data.len(),
            3 * samples,
            "data length must be three components per sample"
        );
        Self { samples, data }
    }

    pub fn samples(&self) -> usize {
        self.samples
    }

    pub fn as_slice(&self) -> &[Complex64] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [Complex64] {
        &mut self.data
    }

    #[inline]
    pub fn vector(&self, index: usize) -> [Complex64; 3] {
        let base = 3 * index;
        [self.data[base], self.data[base + 1], self.data[base + 2]]
    }

    #[inline]
    pub fn set_vector(&mut self, index: usize, value: [Complex64; 3]) {
        let base = 3 * index;
        self.data[base..base + 3].copy_from_slice(&value);
    }

    pub fn fill(&mut self, value: Complex64) {
        self.data.fill(value);
    }

    pub fn scale(&mut self, alpha: f64) {
        for value in &mut self.data {
            *value *= alpha;
        }
    }
}

/// Per-sample product `conj(f1) . f2`, one complex value per local sample.
///
/// Produced by consuming the first field, whose storage is reused.
#[derive(Debug, Clone)]
pub struct EnergyDensity {
    data: Vec<Complex64>,
}

impl EnergyDensity {
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_slice(&self) -> &[Complex64] {
        &self.data
    }
}

#[inline]
fn hermitian_dot(a: [Complex64; 3], b: [Complex64; 3]) -> Complex64 {
    a[0].conj() * b[0] + a[1].conj() * b[1] + a[2].conj() * b[2]
}

/// Local (unreduced) Hermitian energy `sum conj(f1) . f2`.
///
/// Samples standing in for a conjugate-symmetric partner are counted a second
/// time with the imaginary part flipped.
pub fn field_energy(layout: &FieldLayout, field1: &VectorField, field2: &VectorField) -> Energy {
    assert_eq!(field1.samples(), layout.len(), "field1 does not match layout");
    assert_eq!(field2.samples(), layout.len(), "field2 does not match layout");
    let mut sum = Complex64::default();
    for i in 0..layout.len() {
        let product = hermitian_dot(field1.vector(i), field2.vector(i));
        sum += product;
        if layout.is_doubled(i) {
            sum += product.conj();
        }
    }
    sum
}

/// Same reduction as [`field_energy`], but `field1` is consumed and its buffer
/// becomes the per-sample product.
///
/// Sample `i` is written to slot `i`, which always precedes the `3*i` slots
/// still to be read.
pub fn into_energy_density(
    layout: &FieldLayout,
    field1: VectorField,
    field2: &VectorField,
) -> (Energy, EnergyDensity) {
    assert_eq!(field1.samples(), layout.len(), "field1 does not match layout");
    assert_eq!(field2.samples(), layout.len(), "field2 does not match layout");
    let samples = field1.samples;
    let mut data = field1.data;
    let mut sum = Complex64::default();
    for i in 0..samples {
        let base = 3 * i;
        let lhs = [data[base], data[base + 1], data[base + 2]];
        let product = hermitian_dot(lhs, field2.vector(i));
        sum += product;
        if layout.is_doubled(i) {
            sum += product.conj();
        }
        data[i] = product;
    }
    data.truncate(samples);
    (sum, EnergyDensity { data })
}
