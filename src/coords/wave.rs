//! Linear spectral coordinate.

use std::ops::Range;

use ndarray::Array1;

use crate::coords::{close, rebinned_crpix};
use crate::data::Header;
use crate::units::Unit;

/// Linear mapping between spectral pixel index and wavelength.
///
/// `crpix` is the 1-based reference pixel, as in FITS headers, so the
/// wavelength of the 0-based pixel `k` is `(k + 1 - crpix) * cdelt + crval`.
#[derive(Debug, Clone, PartialEq)]
pub struct WaveCoord {
    /// Reference pixel (1-based)
    pub crpix: f64,
    /// Step between pixels
    pub cdelt: f64,
    /// Wavelength at the reference pixel
    pub crval: f64,
    /// Wavelength unit
    pub cunit: Option<Unit>,
    /// Axis type, "AWAV" for air wavelengths
    pub ctype: String,
    /// Number of pixels described
    pub shape: Option<usize>,
}

impl Default for WaveCoord {
    fn default() -> Self {
        Self {
            crpix: 1.0,
            cdelt: 1.0,
            crval: 1.0,
            cunit: None,
            ctype: "LINEAR".to_string(),
            shape: None,
        }
    }
}

impl WaveCoord {
    /// Create a descriptor.
    ///
    /// # Arguments
    /// * `crpix` - 1-based reference pixel
    /// * `cdelt` - step between pixels
    /// * `crval` - wavelength of the reference pixel
    /// * `shape` - number of pixels
    pub fn new(crpix: f64, cdelt: f64, crval: f64, shape: Option<usize>) -> Self {
        Self {
            crpix,
            cdelt,
            crval,
            shape,
            ..Self::default()
        }
    }

    /// Set the wavelength unit.
    pub fn with_unit(mut self, unit: Unit) -> Self {
        self.cunit = Some(unit);
        self
    }

    /// Wavelength of a (fractional) 0-based pixel.
    pub fn coord(&self, pixel: f64) -> f64 {
        (pixel + 1.0 - self.crpix) * self.cdelt + self.crval
    }

    /// Wavelengths of every pixel.
    pub fn coords(&self) -> Array1<f64> {
        let n = self.shape.unwrap_or(0);
        Array1::from_shape_fn(n, |k| self.coord(k as f64))
    }

    /// Fractional 0-based pixel of a wavelength.
    pub fn pixel(&self, lambda: f64) -> f64 {
        (lambda - self.crval) / self.cdelt + self.crpix - 1.0
    }

    /// Nearest pixel index of a wavelength, clamped to the axis.
    pub fn pixel_nearest(&self, lambda: f64) -> usize {
        let p = (self.pixel(lambda) + 0.5).floor();
        let max = self.shape.unwrap_or(1).saturating_sub(1) as f64;
        p.clamp(0.0, max) as usize
    }

    /// Descriptor of the pixel sub-range `range`.
    pub fn slice(&self, range: Range<usize>) -> Self {
        Self {
            crpix: self.crpix - range.start as f64,
            shape: Some(range.end.saturating_sub(range.start)),
            ..self.clone()
        }
    }

    /// Descriptor after averaging blocks of `factor` pixels.
    ///
    /// Pixel 0 of the result lies at the mean wavelength of source pixels
    /// `0..factor`.
    pub fn rebin(&self, factor: usize) -> Self {
        let factor = factor.max(1);
        Self {
            crpix: rebinned_crpix(self.crpix, factor),
            cdelt: self.cdelt * factor as f64,
            shape: self.shape.map(|n| n / factor),
            ..self.clone()
        }
    }

    /// Wavelength of the first pixel.
    pub fn get_start(&self) -> f64 {
        self.coord(0.0)
    }

    /// Wavelength of the last pixel.
    pub fn get_end(&self) -> f64 {
        self.coord(self.shape.unwrap_or(1).saturating_sub(1) as f64)
    }

    /// Step between pixels.
    pub fn get_step(&self) -> f64 {
        self.cdelt
    }

    /// Minimum and maximum wavelengths.
    pub fn get_range(&self) -> (f64, f64) {
        let (a, b) = (self.get_start(), self.get_end());
        (a.min(b), a.max(b))
    }

    /// Same start, step, length and unit within `tolerance`.
    pub fn is_equal(&self, other: &WaveCoord, tolerance: f64) -> bool {
        let units_match = match (&self.cunit, &other.cunit) {
            (Some(a), Some(b)) => a.is_equivalent(b),
            (None, None) => true,
            _ => false,
        };
        units_match
            && self.shape == other.shape
            && close(self.get_start(), other.get_start(), tolerance)
            && close(self.cdelt, other.cdelt, tolerance)
    }

    /// Read the descriptor of FITS axis `axis` (1-based) from a header.
    ///
    /// Returns `None` when the header has no reference value for that axis.
    pub fn from_header(header: &Header, axis: usize) -> Option<Self> {
        let crval = header.get_f64(&format!("CRVAL{axis}"))?;
        let cdelt = header
            .get_f64(&format!("CD{axis}_{axis}"))
            .or_else(|| header.get_f64(&format!("CDELT{axis}")))
            .unwrap_or(1.0);
        let crpix = header.get_f64(&format!("CRPIX{axis}")).unwrap_or(1.0);
        let cunit = header
            .get_str(&format!("CUNIT{axis}"))
            .and_then(|s| match Unit::parse(s) {
                Ok(u) => Some(u),
                Err(e) => {
                    log::warn!("Ignoring spectral unit: {}", e);
                    None
                }
            });
        let ctype = header
            .get_str(&format!("CTYPE{axis}"))
            .unwrap_or("LINEAR")
            .to_string();
        Some(Self {
            crpix,
            cdelt,
            crval,
            cunit,
            ctype,
            shape: header.get_usize(&format!("NAXIS{axis}")),
        })
    }

    /// Write the descriptor as cards for FITS axis `axis` (1-based).
    pub fn to_header(&self, header: &mut Header, axis: usize) {
        header.set(format!("CRPIX{axis}"), self.crpix);
        header.set(format!("CDELT{axis}"), self.cdelt);
        header.set(format!("CRVAL{axis}"), self.crval);
        header.set(format!("CTYPE{axis}"), self.ctype.clone());
        if let Some(unit) = &self.cunit {
            header.set(format!("CUNIT{axis}"), unit.to_string());
        }
        if let Some(n) = self.shape {
            header.set(format!("NAXIS{axis}"), n);
        }
    }
}
