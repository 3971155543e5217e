//! Shared fixtures and float comparisons.

use ndarray::{Array1, Array3};

use crate::coords::{WaveCoord, Wcs};
use crate::data::{Cube, Spectrum};

/// Assert that two values agree within `tol`.
#[track_caller]
pub fn assert_close(a: f64, b: f64, tol: f64) {
    assert!((a - b).abs() <= tol, "{} != {} (tolerance {})", a, b, tol);
}

/// Assert that two sequences agree element-wise within `tol`.
#[track_caller]
pub fn assert_all_close<'a>(
    a: impl IntoIterator<Item = &'a f64>,
    b: impl IntoIterator<Item = &'a f64>,
    tol: f64,
) {
    let a: Vec<f64> = a.into_iter().copied().collect();
    let b: Vec<f64> = b.into_iter().copied().collect();
    assert_eq!(a.len(), b.len(), "lengths differ");
    for (i, (x, y)) in a.iter().zip(&b).enumerate() {
        assert!((x - y).abs() <= tol, "element {}: {} != {} (tolerance {})", i, x, y, tol);
    }
}

/// Wavelength axis starting at 1 with a unit step.
pub fn unit_wave() -> WaveCoord {
    WaveCoord::new(1.0, 1.0, 1.0, None)
}

/// Spatial grid whose pixel (j, i) lies at world (j, i).
pub fn unit_wcs() -> Wcs {
    Wcs::linear([1.0, 1.0], [0.0, 0.0], [1.0, 1.0], [0, 0])
}

/// A (10, 6, 5) cube of ones with unit coordinates.
pub fn ones_cube() -> Cube {
    Cube::new(Array3::ones((10, 6, 5)))
        .with_wave(unit_wave())
        .with_wcs(unit_wcs())
}

/// A (10, 6, 5) cube with distinct, non-zero values and a variance.
pub fn ramp_cube() -> Cube {
    let data = Array3::from_shape_fn((10, 6, 5), |(k, j, i)| 1.0 + (k * 100 + j * 10 + i) as f64);
    Cube::new(data.clone())
        .with_var(data.mapv(|v| 0.01 * v))
        .expect("variance matches data")
        .with_wave(unit_wave())
        .with_wcs(unit_wcs())
}

/// A 10-pixel spectrum on the same wavelength axis as the cubes.
pub fn ramp_spectrum() -> Spectrum {
    Spectrum::new(Array1::from_shape_fn(10, |k| 0.5 + k as f64))
        .with_var(Array1::from_elem(10, 0.2))
        .expect("variance matches data")
        .with_wave(unit_wave())
}
