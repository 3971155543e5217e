//! Pixel ↔ world coordinate descriptors.
//!
//! [`WaveCoord`] describes the spectral axis, [`Wcs`] the two spatial axes.
//! Both are plain values: slicing and rebinning return new descriptors and
//! never modify the original.

mod wave;
mod wcs;

pub use wave::WaveCoord;
pub use wcs::{Projection, Wcs};

/// Default absolute tolerance for descriptor comparisons.
pub const DEFAULT_TOLERANCE: f64 = 1e-9;

pub(crate) fn close(a: f64, b: f64, tolerance: f64) -> bool {
    (a - b).abs() <= tolerance.max(tolerance * a.abs().max(b.abs()))
}

/// Reference pixel of a grid rebinned by `factor`, keeping the world position
/// of each output pixel at the centre of its block. Reference pixels are
/// 1-based.
pub(crate) fn rebinned_crpix(crpix: f64, factor: usize) -> f64 {
    let f = factor as f64;
    (crpix - (f + 1.0) / 2.0) / f + 1.0
}
