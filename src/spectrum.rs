//! Operations specific to one-dimensional spectra.

use std::ops::Range;

use ndarray::Array1;

use crate::coords::WaveCoord;
use crate::data::{DataArray, Rank, Sel, Selection, Spectrum};
use crate::error::{DataError, Result};

/// Pixel span `[int(pixel(lmin)), int(pixel(lmax))]` of a wavelength range,
/// clamped to an axis of `n` pixels.
pub(crate) fn lambda_span(wave: &WaveCoord, lmin: f64, lmax: f64, n: usize) -> Result<Range<usize>> {
    let (lo, hi) = (wave.pixel(lmin), wave.pixel(lmax));
    let (lo, hi) = (lo.min(hi), lo.max(hi));
    let start = lo.trunc().max(0.0) as usize;
    let end = if hi < 0.0 { 0 } else { (hi.trunc() as usize + 1).min(n) };
    if start >= end {
        return Err(DataError::empty_selection(format!(
            "wavelength range {}..{} is outside the axis",
            lmin, lmax
        )));
    }
    Ok(start..end)
}

/// Nearest-pixel span of `lmin..=lmax`. A range that collapses to one pixel
/// or less is rejected.
pub(crate) fn nearest_span(wave: &WaveCoord, lmin: f64, lmax: f64) -> Result<Range<usize>> {
    let a = wave.pixel_nearest(lmin);
    let b = wave.pixel_nearest(lmax);
    let (start, end) = (a.min(b), a.max(b) + 1);
    if a == b {
        let message = if lmin == lmax {
            "minimum and maximum wavelengths are equal"
        } else {
            "minimum and maximum wavelengths are outside the axis range"
        };
        return Err(DataError::invalid_argument(message));
    }
    Ok(start..end)
}

/// Wavelength bounds of a masking request, as pixel limits `[start, end)`.
pub(crate) fn mask_span(wave: Option<&WaveCoord>, lmin: Option<f64>, lmax: Option<f64>, n: usize) -> Result<Range<usize>> {
    if lmin.is_none() && lmax.is_none() {
        return Ok(0..n);
    }
    let wave = wave.ok_or(DataError::MissingCoordinates {
        operation: "mask_region",
        which: "spectral",
    })?;
    let start = lmin.map_or(0, |l| wave.pixel_nearest(l));
    let end = lmax.map_or(n, |l| wave.pixel_nearest(l) + 1);
    Ok(start..end.max(start))
}

impl<D: Rank> DataArray<D> {
    pub(crate) fn require_wave(&self, operation: &'static str) -> Result<&WaveCoord> {
        self.wave().ok_or(DataError::MissingCoordinates {
            operation,
            which: "spectral",
        })
    }
}

impl Spectrum {
    /// Attach spectral coordinates (builder style). A length mismatch is
    /// repaired and reported.
    pub fn with_wave(mut self, wave: WaveCoord) -> Self {
        self.attach_wave(Some(wave));
        self
    }

    /// Wavelength of every pixel.
    pub fn wavelengths(&self) -> Result<Array1<f64>> {
        Ok(self.require_wave("wavelengths")?.coords())
    }

    /// Wavelength of the first pixel.
    pub fn get_start(&self) -> Result<f64> {
        Ok(self.require_wave("get_start")?.get_start())
    }

    /// Wavelength of the last pixel.
    pub fn get_end(&self) -> Result<f64> {
        Ok(self.require_wave("get_end")?.get_end())
    }

    /// Step between pixels.
    pub fn get_step(&self) -> Result<f64> {
        Ok(self.require_wave("get_step")?.get_step())
    }

    /// Minimum and maximum wavelengths.
    pub fn get_range(&self) -> Result<(f64, f64)> {
        Ok(self.require_wave("get_range")?.get_range())
    }

    /// Pixels covering `lmin..=lmax`. A single pixel is returned as an
    /// [`Selection::Element`], anything wider as a [`Selection::Spectrum`].
    pub fn get_lambda(&self, lmin: f64, lmax: f64) -> Result<Selection> {
        let wave = self.require_wave("get_lambda")?;
        let span = lambda_span(wave, lmin, lmax, self.len())?;
        if span.len() == 1 {
            self.select(&[Sel::At(span.start)])
        } else {
            self.select(&[Sel::Span(span)])
        }
    }

    /// Sub-spectrum between the pixels nearest to `lmin` and `lmax`.
    pub fn truncate(&self, lmin: f64, lmax: f64) -> Result<Spectrum> {
        let wave = self.require_wave("truncate")?;
        let span = nearest_span(wave, lmin, lmax)?;
        self.slice_ranges(&[span])
    }

    /// Mask the pixels between `lmin` and `lmax` (or, with
    /// `inside == false`, every pixel outside them). A missing bound extends
    /// to the end of the axis.
    pub fn mask_region(&mut self, lmin: Option<f64>, lmax: Option<f64>, inside: bool) -> Result<()> {
        let n = self.len();
        let span = mask_span(self.wave(), lmin, lmax, n)?;
        let selection = Array1::from_shape_fn(n, |k| span.contains(&k) == inside);
        self.mask_selection(&selection)
    }
}
