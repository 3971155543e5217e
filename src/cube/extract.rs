//! Aperture, sub-cube and bandpass extraction.

use std::cmp::Ordering;

use ndarray::{Array1, ArrayView1, Axis, Zip};

use crate::coords::WaveCoord;
use crate::cube::repeat_planes;
use crate::data::{Cube, Element, Image, Reduction, Region, RegionUnits, Spectrum};
use crate::error::{DataError, Result};
use crate::image::{centred_box, pixel_frame};

/// Integral of a piecewise-linear curve over `[a, b]`. The curve is zero
/// outside its first and last sample.
fn integrate(wavelengths: &[f64], sensitivities: &[f64], a: f64, b: f64) -> f64 {
    let mut total = 0.0;
    for i in 0..wavelengths.len().saturating_sub(1) {
        let (w0, w1) = (wavelengths[i], wavelengths[i + 1]);
        let lo = a.max(w0);
        let hi = b.min(w1);
        if lo >= hi {
            continue;
        }
        let slope = (sensitivities[i + 1] - sensitivities[i]) / (w1 - w0);
        let at = |w: f64| sensitivities[i] + slope * (w - w0);
        total += 0.5 * (at(lo) + at(hi)) * (hi - lo);
    }
    total
}

/// Weight of every spectral pixel: the sensitivity curve integrated over the
/// pixel's width.
pub(crate) fn bandpass_weights(
    wave: &WaveCoord,
    n: usize,
    wavelengths: &[f64],
    sensitivities: &[f64],
) -> Result<Array1<f64>> {
    if wavelengths.len() != sensitivities.len() {
        return Err(DataError::invalid_argument(format!(
            "{} wavelengths but {} sensitivities",
            wavelengths.len(),
            sensitivities.len()
        )));
    }
    if wavelengths.len() < 2 {
        return Err(DataError::invalid_argument(
            "a sensitivity curve needs at least two samples",
        ));
    }
    if wavelengths
        .windows(2)
        .any(|w| w[1].partial_cmp(&w[0]) != Some(Ordering::Greater)) {
        return Err(DataError::invalid_argument(
            "sensitivity curve wavelengths must be strictly increasing",
        ));
    }
    let width = wave.cdelt.abs();
    let weights = Array1::from_shape_fn(n, |k| {
        let c = wave.coord(k as f64);
        integrate(wavelengths, sensitivities, c - width / 2.0, c + width / 2.0)
    });
    if !weights.iter().any(|&w| w > 0.0) {
        return Err(DataError::empty_selection(format!(
            "sensitivity curve {}..{} does not overlap the wavelength axis",
            wavelengths[0],
            wavelengths[wavelengths.len() - 1]
        )));
    }
    Ok(weights)
}

/// Weighted combination of one spectrum over its unmasked, positively
/// weighted samples.
fn weighted(
    data: ArrayView1<'_, f64>,
    mask: ArrayView1<'_, bool>,
    var: Option<ArrayView1<'_, f64>>,
    weights: &Array1<f64>,
    sum: bool,
) -> Element {
    let (mut sw, mut swx, mut sw2v) = (0.0, 0.0, 0.0);
    for (k, &w) in weights.iter().enumerate() {
        if w <= 0.0 || mask[k] {
            continue;
        }
        sw += w;
        swx += w * data[k];
        if let Some(var) = &var {
            sw2v += w * w * var[k];
        }
    }
    if sw == 0.0 {
        return Element {
            value: 0.0,
            masked: true,
            var: var.map(|_| 0.0),
        };
    }
    let (value, v) = if sum { (swx, sw2v) } else { (swx / sw, sw2v / (sw * sw)) };
    Element {
        value,
        masked: false,
        var: var.map(|_| v),
    }
}

impl Cube {
    /// Sub-cube of `size` (full width) around `center`, both in the units
    /// given, optionally restricted to the planes nearest to a wavelength
    /// range. The box is clamped to the cube.
    pub fn subcube(
        &self,
        center: (f64, f64),
        size: f64,
        lbda: Option<(f64, f64)>,
        units: RegionUnits,
    ) -> Result<Cube> {
        let (center, size) = pixel_frame(self.wcs(), center, size, units, "subcube")?;
        let (ny, nx) = self.spatial_shape();
        let (rows, cols) = centred_box(center, size, ny, nx)?;
        let planes = match lbda {
            None => 0..self.n_planes(),
            Some((l1, l2)) => {
                let wave = self.require_wave("subcube")?;
                let a = wave.pixel_nearest(l1);
                let b = wave.pixel_nearest(l2);
                a.min(b)..a.max(b) + 1
            }
        };
        self.slice_ranges(&[planes, rows, cols])
    }

    /// Smallest sub-cube enclosing a circle, with every spaxel outside the
    /// circle masked.
    pub fn subcube_circle_aperture(&self, center: (f64, f64), radius: f64, units: RegionUnits) -> Result<Cube> {
        let (pix_center, [radius_pix, _]) = pixel_frame(self.wcs(), center, radius, units, "subcube_circle_aperture")?;
        let (ny, nx) = self.spatial_shape();
        let circle = Region::circle(pix_center, radius_pix);
        let off_grid = |c: f64, n: usize| c + radius_pix <= -0.5 || c - radius_pix >= n as f64 - 0.5;
        if ny == 0 || nx == 0 || off_grid(pix_center.0, ny) || off_grid(pix_center.1, nx) {
            return Err(DataError::empty_selection(format!(
                "circle of radius {} around {:?} is outside the {}x{} grid",
                radius_pix, pix_center, ny, nx
            )));
        }
        let (rows, cols) = circle.bounding_box(ny, nx);
        let mut sub = self.slice_ranges(&[0..self.n_planes(), rows.clone(), cols.clone()])?;
        let local = Region::circle(
            (pix_center.0 - rows.start as f64, pix_center.1 - cols.start as f64),
            radius_pix,
        );
        let (sy, sx) = sub.spatial_shape();
        let outside = repeat_planes(&local.mask(sy, sx, false), sub.n_planes());
        sub.mask_selection(&outside)?;
        Ok(sub)
    }

    /// Spectrum summed over a circular aperture.
    ///
    /// With `radius <= 0` the spectrum of the spaxel nearest to `center` is
    /// returned instead. Variance is the sum of the unmasked variances.
    pub fn aperture(&self, center: (f64, f64), radius: f64, units: RegionUnits) -> Result<Spectrum> {
        if radius > 0.0 {
            let sub = self.subcube_circle_aperture(center, radius, units)?;
            return sub.collapse_spatial(Reduction::Sum);
        }
        let (pix, _) = pixel_frame(self.wcs(), center, 0.0, units, "aperture")?;
        let (ny, nx) = self.spatial_shape();
        let (p, q) = ((pix.0 + 0.5).floor(), (pix.1 + 0.5).floor());
        for (axis, index, len) in [(1, p, ny), (2, q, nx)] {
            if index < 0.0 || index >= len as f64 {
                return Err(DataError::IndexOutOfBounds {
                    axis,
                    index: index.max(0.0) as usize,
                    len,
                });
            }
        }
        self.spectrum(p as usize, q as usize)
    }

    /// Image weighted by a piecewise-linear sensitivity curve.
    ///
    /// Each plane is weighted by the curve integrated over its wavelength
    /// width. A spaxel's value is `Σ(w·x) / Σw` (or `Σ(w·x)` with `sum`) over
    /// its unmasked samples, with variance `Σ(w²·σ²) / (Σw)²` (or
    /// `Σ(w²·σ²)`). A spaxel is masked only when every weighted sample is
    /// masked.
    pub fn bandpass_image(&self, wavelengths: &[f64], sensitivities: &[f64], sum: bool) -> Result<Image> {
        let wave = self.require_wave("bandpass_image")?;
        let weights = bandpass_weights(wave, self.n_planes(), wavelengths, sensitivities)?;
        let (lmin, lmax) = wave.get_range();
        let half = wave.cdelt.abs() / 2.0;
        if wavelengths[0] < lmin - half || wavelengths[wavelengths.len() - 1] > lmax + half {
            log::warn!(
                "Sensitivity curve {}..{} extends beyond the cube's wavelength range {}..{}",
                wavelengths[0],
                wavelengths[wavelengths.len() - 1],
                lmin - half,
                lmax + half
            );
        }

        let data = self.data()?;
        let var = self.var()?;
        let elements = match var {
            Some(var) => Zip::from(data.data().lanes(Axis(0)))
                .and(data.mask().lanes(Axis(0)))
                .and(var.lanes(Axis(0)))
                .map_collect(|d, m, v| weighted(d, m, Some(v), &weights, sum)),
            None => Zip::from(data.data().lanes(Axis(0)))
                .and(data.mask().lanes(Axis(0)))
                .map_collect(|d, m| weighted(d, m, None, &weights, sum)),
        };
        let (values, var) = super::unzip_elements(elements, var.is_some())?;
        self.derive(values, var, self.wcs().cloned(), None)
    }
}
