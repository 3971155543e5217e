//! Spatial world coordinate system.
//!
//! Axes are ordered (y, x) everywhere, matching the array layout
//! `data[[y, x]]`. For sky data y is declination and x is right ascension.

use std::ops::Range;

use crate::coords::{close, rebinned_crpix};
use crate::data::Header;
use crate::units::Unit;

/// How intermediate coordinates map to world coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Projection {
    /// World coordinates are the intermediate coordinates plus `crval`
    #[default]
    Linear,
    /// Gnomonic (tangent plane) projection around `crval` (dec, ra) in degrees
    Tan,
}

/// Spatial coordinate descriptor.
///
/// Pixel to world:
///
/// 1. Offset from the reference pixel: `(dy, dx) = (y + 1 - crpix[0], x + 1 - crpix[1])`
/// 2. Intermediate coordinates: `(v, u) = cd × (dy, dx)`
/// 3. World: `crval + (v, u)` for [`Projection::Linear`], de-projection of
///    the tangent plane for [`Projection::Tan`]
///
/// `cd[i][j]` is the derivative of world axis `i` with respect to pixel axis
/// `j`, both in (y, x) order.
#[derive(Debug, Clone, PartialEq)]
pub struct Wcs {
    /// Reference pixel (1-based, y then x)
    pub crpix: [f64; 2],
    /// World coordinates of the reference pixel
    pub crval: [f64; 2],
    /// Linear transformation matrix
    pub cd: [[f64; 2]; 2],
    /// Number of pixels along y and x
    pub naxis: [usize; 2],
    /// World coordinate unit
    pub cunit: Option<Unit>,
    /// Projection type
    pub projection: Projection,
}

impl Default for Wcs {
    fn default() -> Self {
        Self::linear([1.0, 1.0], [0.0, 0.0], [1.0, 1.0], [0, 0])
    }
}

impl Wcs {
    /// Axis-aligned linear descriptor.
    ///
    /// # Arguments
    /// * `crpix` - 1-based reference pixel (y, x)
    /// * `crval` - world coordinates of the reference pixel (y, x)
    /// * `cdelt` - step along y and x
    /// * `naxis` - number of pixels (ny, nx)
    pub fn linear(crpix: [f64; 2], crval: [f64; 2], cdelt: [f64; 2], naxis: [usize; 2]) -> Self {
        Self {
            crpix,
            crval,
            cd: [[cdelt[0], 0.0], [0.0, cdelt[1]]],
            naxis,
            cunit: None,
            projection: Projection::Linear,
        }
    }

    /// Sky descriptor with a gnomonic projection.
    ///
    /// # Arguments
    /// * `crpix` - 1-based reference pixel (y, x)
    /// * `crval` - (dec, ra) of the reference pixel in degrees
    /// * `cdelt` - signed step along y and x in degrees (x is usually negative)
    /// * `rot` - rotation angle in degrees, counter-clockwise
    /// * `naxis` - number of pixels (ny, nx)
    pub fn sky(
        crpix: [f64; 2],
        crval: [f64; 2],
        cdelt: [f64; 2],
        rot: f64,
        naxis: [usize; 2],
    ) -> Self {
        let (sin_r, cos_r) = rot.to_radians().sin_cos();
        Self {
            crpix,
            crval,
            cd: [
                [cdelt[0] * cos_r, cdelt[1].abs() * sin_r],
                [-cdelt[0] * sin_r * cdelt[1].signum(), cdelt[1] * cos_r],
            ],
            naxis,
            cunit: Unit::parse("deg").ok(),
            projection: Projection::Tan,
        }
    }

    fn intermediate_to_world(&self, v: f64, u: f64) -> (f64, f64) {
        match self.projection {
            Projection::Linear => (self.crval[0] + v, self.crval[1] + u),
            Projection::Tan => {
                let (xi, eta) = (u.to_radians(), v.to_radians());
                let ra0 = self.crval[1].to_radians();
                let (sin_dec0, cos_dec0) = self.crval[0].to_radians().sin_cos();
                let denom = cos_dec0 - eta * sin_dec0;
                let ra = ra0 + xi.atan2(denom);
                let dec = (sin_dec0 + eta * cos_dec0).atan2((xi * xi + denom * denom).sqrt());
                let ra = ra.to_degrees().rem_euclid(360.0);
                (dec.to_degrees(), ra)
            }
        }
    }

    fn world_to_intermediate(&self, wy: f64, wx: f64) -> (f64, f64) {
        match self.projection {
            Projection::Linear => (wy - self.crval[0], wx - self.crval[1]),
            Projection::Tan => {
                let (sin_dec, cos_dec) = wy.to_radians().sin_cos();
                let (sin_dec0, cos_dec0) = self.crval[0].to_radians().sin_cos();
                let (sin_dra, cos_dra) = (wx - self.crval[1]).to_radians().sin_cos();
                let d = sin_dec * sin_dec0 + cos_dec * cos_dec0 * cos_dra;
                let xi = cos_dec * sin_dra / d;
                let eta = (sin_dec * cos_dec0 - cos_dec * sin_dec0 * cos_dra) / d;
                (eta.to_degrees(), xi.to_degrees())
            }
        }
    }

    /// World coordinates (y, x) of a fractional 0-based pixel (y, x).
    pub fn pix2sky(&self, y: f64, x: f64) -> (f64, f64) {
        let dy = y + 1.0 - self.crpix[0];
        let dx = x + 1.0 - self.crpix[1];
        let v = self.cd[0][0] * dy + self.cd[0][1] * dx;
        let u = self.cd[1][0] * dy + self.cd[1][1] * dx;
        self.intermediate_to_world(v, u)
    }

    /// Fractional 0-based pixel (y, x) of world coordinates (y, x).
    pub fn sky2pix(&self, wy: f64, wx: f64) -> (f64, f64) {
        let (v, u) = self.world_to_intermediate(wy, wx);
        let det = self.cd[0][0] * self.cd[1][1] - self.cd[0][1] * self.cd[1][0];
        let dy = (self.cd[1][1] * v - self.cd[0][1] * u) / det;
        let dx = (-self.cd[1][0] * v + self.cd[0][0] * u) / det;
        (dy + self.crpix[0] - 1.0, dx + self.crpix[1] - 1.0)
    }

    /// Nearest pixel of world coordinates, clamped to the grid.
    pub fn sky2pix_nearest(&self, wy: f64, wx: f64) -> (usize, usize) {
        let (py, px) = self.sky2pix(wy, wx);
        let clamp = |p: f64, n: usize| (p + 0.5).floor().clamp(0.0, n.saturating_sub(1) as f64) as usize;
        (clamp(py, self.naxis[0]), clamp(px, self.naxis[1]))
    }

    /// Descriptor of the sub-grid `rows × cols`.
    pub fn slice(&self, rows: Range<usize>, cols: Range<usize>) -> Self {
        Self {
            crpix: [
                self.crpix[0] - rows.start as f64,
                self.crpix[1] - cols.start as f64,
            ],
            naxis: [
                rows.end.saturating_sub(rows.start),
                cols.end.saturating_sub(cols.start),
            ],
            ..self.clone()
        }
    }

    /// Descriptor after combining blocks of `factor[0] × factor[1]` pixels.
    ///
    /// The reference point is kept and only the reference pixel moves, so the
    /// result is exact for both projections.
    pub fn rebin(&self, factor: [usize; 2]) -> Self {
        let fy = factor[0].max(1);
        let fx = factor[1].max(1);
        let mut cd = self.cd;
        for row in &mut cd {
            row[0] *= fy as f64;
            row[1] *= fx as f64;
        }
        Self {
            crpix: [rebinned_crpix(self.crpix[0], fy), rebinned_crpix(self.crpix[1], fx)],
            cd,
            naxis: [self.naxis[0] / fy, self.naxis[1] / fx],
            ..self.clone()
        }
    }

    /// Pixel size along y and x (absolute values).
    pub fn get_step(&self) -> [f64; 2] {
        [
            self.cd[0][0].hypot(self.cd[1][0]),
            self.cd[0][1].hypot(self.cd[1][1]),
        ]
    }

    /// Rotation angle in degrees.
    pub fn get_rot(&self) -> f64 {
        let det = self.cd[0][0] * self.cd[1][1] - self.cd[0][1] * self.cd[1][0];
        let sign = if det < 0.0 { -1.0 } else { 1.0 };
        (sign * -self.cd[1][0]).atan2(self.cd[0][0]).to_degrees()
    }

    /// True when the pixel axes are aligned with the world axes.
    pub fn is_axis_aligned(&self) -> bool {
        self.cd[0][1] == 0.0 && self.cd[1][0] == 0.0
    }

    /// World coordinates of pixel (0, 0).
    pub fn get_start(&self) -> (f64, f64) {
        self.pix2sky(0.0, 0.0)
    }

    /// World coordinates of the last pixel.
    pub fn get_end(&self) -> (f64, f64) {
        self.pix2sky(
            self.naxis[0].saturating_sub(1) as f64,
            self.naxis[1].saturating_sub(1) as f64,
        )
    }

    /// Bounding box `[ymin, xmin, ymax, xmax]` of the pixel centres.
    pub fn get_range(&self) -> [f64; 4] {
        let ny = self.naxis[0].saturating_sub(1) as f64;
        let nx = self.naxis[1].saturating_sub(1) as f64;
        let corners = [
            self.pix2sky(0.0, 0.0),
            self.pix2sky(0.0, nx),
            self.pix2sky(ny, 0.0),
            self.pix2sky(ny, nx),
        ];
        let mut range = [f64::INFINITY, f64::INFINITY, f64::NEG_INFINITY, f64::NEG_INFINITY];
        for (y, x) in corners {
            range[0] = range[0].min(y);
            range[1] = range[1].min(x);
            range[2] = range[2].max(y);
            range[3] = range[3].max(x);
        }
        range
    }

    /// Same grid size, start, step and rotation within `tolerance`.
    pub fn is_equal(&self, other: &Wcs, tolerance: f64) -> bool {
        let (sa, sb) = (self.get_start(), other.get_start());
        let (da, db) = (self.get_step(), other.get_step());
        self.naxis == other.naxis
            && self.projection == other.projection
            && close(sa.0, sb.0, tolerance)
            && close(sa.1, sb.1, tolerance)
            && close(da[0], db[0], tolerance)
            && close(da[1], db[1], tolerance)
            && close(self.get_rot(), other.get_rot(), tolerance.max(1e-6))
    }

    /// Read the spatial descriptor (FITS axes 1 = x, 2 = y) from a header.
    ///
    /// Returns `None` when neither reference values nor steps are present.
    pub fn from_header(header: &Header) -> Option<Self> {
        let has_cards = ["CRVAL1", "CRVAL2", "CD1_1", "CDELT1"]
            .iter()
            .any(|k| header.contains(k));
        if !has_cards {
            return None;
        }
        let get = |key: &str, default: f64| header.get_f64(key).unwrap_or(default);

        let cd = if header.contains("CD1_1") || header.contains("CD2_2") {
            [
                [get("CD2_2", 1.0), get("CD2_1", 0.0)],
                [get("CD1_2", 0.0), get("CD1_1", 1.0)],
            ]
        } else {
            [[get("CDELT2", 1.0), 0.0], [0.0, get("CDELT1", 1.0)]]
        };
        let is_tan = header
            .get_str("CTYPE1")
            .is_some_and(|t| t.ends_with("TAN"));
        let cunit = header
            .get_str("CUNIT1")
            .and_then(|s| Unit::parse(s).ok());

        Some(Self {
            crpix: [get("CRPIX2", 1.0), get("CRPIX1", 1.0)],
            crval: [get("CRVAL2", 0.0), get("CRVAL1", 0.0)],
            cd,
            naxis: [
                header.get_usize("NAXIS2").unwrap_or(0),
                header.get_usize("NAXIS1").unwrap_or(0),
            ],
            cunit,
            projection: if is_tan { Projection::Tan } else { Projection::Linear },
        })
    }

    /// Write the descriptor as FITS cards (axes 1 = x, 2 = y).
    pub fn to_header(&self, header: &mut Header) {
        header.set("CRPIX1", self.crpix[1]);
        header.set("CRPIX2", self.crpix[0]);
        header.set("CRVAL1", self.crval[1]);
        header.set("CRVAL2", self.crval[0]);
        header.set("CD1_1", self.cd[1][1]);
        header.set("CD1_2", self.cd[1][0]);
        header.set("CD2_1", self.cd[0][1]);
        header.set("CD2_2", self.cd[0][0]);
        header.set("NAXIS1", self.naxis[1]);
        header.set("NAXIS2", self.naxis[0]);
        let (c1, c2) = match self.projection {
            Projection::Tan => ("RA---TAN", "DEC--TAN"),
            Projection::Linear => ("LINEAR", "LINEAR"),
        };
        header.set("CTYPE1", c1);
        header.set("CTYPE2", c2);
        if let Some(unit) = &self.cunit {
            header.set("CUNIT1", unit.to_string());
            header.set("CUNIT2", unit.to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coords::DEFAULT_TOLERANCE;

    fn sky_wcs() -> Wcs {
        Wcs::sky([20.0, 25.0], [-30.0, 150.0], [0.2 / 3600.0, -0.2 / 3600.0], 0.0, [40, 50])
    }

    #[test]
    fn test_linear_mapping() {
        let wcs = Wcs::linear([1.0, 1.0], [10.0, 20.0], [0.5, 2.0], [6, 5]);
        assert_eq!(wcs.pix2sky(0.0, 0.0), (10.0, 20.0));
        assert_eq!(wcs.pix2sky(2.0, 3.0), (11.0, 26.0));
        assert_eq!(wcs.sky2pix(11.0, 26.0), (2.0, 3.0));
        assert_eq!(wcs.get_end(), (12.5, 28.0));
        assert_eq!(wcs.get_step(), [0.5, 2.0]);
    }

    #[test]
    fn test_tan_round_trip() {
        let wcs = sky_wcs();
        let (dec, ra) = wcs.pix2sky(19.0, 24.0);
        assert!((dec + 30.0).abs() < 1e-12);
        assert!((ra - 150.0).abs() < 1e-12);
        for &(y, x) in &[(0.0, 0.0), (39.0, 49.0), (3.5, 17.25)] {
            let (dec, ra) = wcs.pix2sky(y, x);
            let (py, px) = wcs.sky2pix(dec, ra);
            assert!((py - y).abs() < 1e-8);
            assert!((px - x).abs() < 1e-8);
        }
    }

    #[test]
    fn test_rotation() {
        let wcs = Wcs::sky([1.0, 1.0], [0.0, 10.0], [1e-4, -1e-4], 30.0, [10, 10]);
        assert!((wcs.get_rot() - 30.0).abs() < 1e-9);
        let step = wcs.get_step();
        assert!((step[0] - 1e-4).abs() < 1e-15);
        assert!((step[1] - 1e-4).abs() < 1e-15);
        assert!(!wcs.is_axis_aligned());
    }

    #[test]
    fn test_slice_round_trip() {
        let wcs = sky_wcs();
        let sub = wcs.slice(5..30, 7..12);
        assert_eq!(sub.naxis, [25, 5]);
        let a = sub.pix2sky(0.0, 0.0);
        let b = wcs.pix2sky(5.0, 7.0);
        assert!((a.0 - b.0).abs() < 1e-12 && (a.1 - b.1).abs() < 1e-12);
    }

    #[test]
    fn test_rebin_centres_blocks() {
        let wcs = Wcs::linear([1.0, 1.0], [0.0, 0.0], [1.0, 1.0], [6, 5]);
        let r = wcs.rebin([2, 2]);
        assert_eq!(r.naxis, [3, 2]);
        assert_eq!(r.get_start(), (0.5, 0.5));
        assert_eq!(r.get_step(), [2.0, 2.0]);

        let sky = sky_wcs();
        let rs = sky.rebin([2, 5]);
        let a = rs.pix2sky(3.0, 2.0);
        let b = sky.pix2sky(6.5, 12.0);
        assert!((a.0 - b.0).abs() < 1e-10 && (a.1 - b.1).abs() < 1e-10);
    }

    #[test]
    fn test_is_equal() {
        let a = sky_wcs();
        assert!(a.is_equal(&sky_wcs(), DEFAULT_TOLERANCE));
        assert!(!a.is_equal(&a.slice(1..40, 0..50), DEFAULT_TOLERANCE));
        let shifted = Wcs {
            crval: [-30.0, 150.001],
            ..sky_wcs()
        };
        assert!(!a.is_equal(&shifted, DEFAULT_TOLERANCE));
    }

    #[test]
    fn test_header_round_trip() {
        let wcs = Wcs::sky([1.0, 1.0], [0.0, 10.0], [1e-4, -1e-4], 30.0, [10, 12]);
        let mut header = Header::new();
        wcs.to_header(&mut header);
        let back = Wcs::from_header(&header).unwrap();
        assert_eq!(back.projection, Projection::Tan);
        assert_eq!(back.naxis, [10, 12]);
        assert!(wcs.is_equal(&back, DEFAULT_TOLERANCE));
        assert!(Wcs::from_header(&Header::new()).is_none());
    }
}
