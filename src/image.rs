//! Operations specific to two-dimensional spatial arrays.

use std::ops::Range;

use ndarray::Array2;

use crate::coords::Wcs;
use crate::data::{DataArray, Image, Rank, Region, RegionUnits};
use crate::error::{DataError, Result};

/// Snap values that are within rounding noise of an integer.
fn snap(v: f64) -> f64 {
    if (v - v.round()).abs() < 1e-6 { v.round() } else { v }
}

/// Pixel rows and columns covering the world box `min..=max` (y, x).
///
/// The four corners are projected to pixels; the result spans the truncated
/// minimum to the truncated maximum, clamped to the `ny × nx` grid.
pub(crate) fn box_pixels(
    wcs: &Wcs,
    min: [f64; 2],
    max: [f64; 2],
    ny: usize,
    nx: usize,
) -> Result<(Range<usize>, Range<usize>)> {
    let corners = [
        wcs.sky2pix(min[0], min[1]),
        wcs.sky2pix(min[0], max[1]),
        wcs.sky2pix(max[0], min[1]),
        wcs.sky2pix(max[0], max[1]),
    ];
    let (mut lo, mut hi) = ([f64::INFINITY; 2], [f64::NEG_INFINITY; 2]);
    for (py, px) in corners {
        for (axis, p) in [snap(py), snap(px)].into_iter().enumerate() {
            lo[axis] = lo[axis].min(p);
            hi[axis] = hi[axis].max(p);
        }
    }
    let bounds = |lo: f64, hi: f64, n: usize| {
        let start = lo.trunc().max(0.0) as usize;
        let end = if hi < 0.0 { 0 } else { (hi.trunc() as usize + 1).min(n) };
        start..end
    };
    let rows = bounds(lo[0], hi[0], ny);
    let cols = bounds(lo[1], hi[1], nx);
    if rows.is_empty() || cols.is_empty() {
        return Err(DataError::empty_selection(format!(
            "box {:?}..{:?} does not overlap the {}x{} grid",
            min, max, ny, nx
        )));
    }
    Ok((rows, cols))
}

/// Pixels of the grid described by `wcs` whose world position lies outside
/// `min..=max`.
pub(crate) fn outside_box(wcs: &Wcs, min: [f64; 2], max: [f64; 2], tolerance: f64) -> Array2<bool> {
    let [ny, nx] = wcs.naxis;
    Array2::from_shape_fn((ny, nx), |(j, i)| {
        let (y, x) = wcs.pix2sky(j as f64, i as f64);
        y < min[0] - tolerance || y > max[0] + tolerance || x < min[1] - tolerance || x > max[1] + tolerance
    })
}

/// Rows and columns of a square box of `size` pixels centred on a
/// fractional pixel, clamped to the grid.
pub(crate) fn centred_box(
    center: (f64, f64),
    size: [f64; 2],
    ny: usize,
    nx: usize,
) -> Result<(Range<usize>, Range<usize>)> {
    let bounds = |c: f64, s: f64, n: usize| {
        let len = (s + 0.5).floor().max(1.0) as usize;
        let start = (c - s / 2.0 + 0.5).floor();
        let end = start + len as f64;
        let start = start.clamp(0.0, n as f64) as usize;
        let end = end.clamp(0.0, n as f64) as usize;
        start..end
    };
    let rows = bounds(center.0, size[0], ny);
    let cols = bounds(center.1, size[1], nx);
    if rows.is_empty() || cols.is_empty() {
        return Err(DataError::empty_selection(format!(
            "box of {:?} pixels around {:?} is outside the {}x{} grid",
            size, center, ny, nx
        )));
    }
    Ok((rows, cols))
}

/// Express a centre and a length (full width or radius) in pixels.
pub(crate) fn pixel_frame(
    wcs: Option<&Wcs>,
    center: (f64, f64),
    length: f64,
    units: RegionUnits,
    operation: &'static str,
) -> Result<((f64, f64), [f64; 2])> {
    match units {
        RegionUnits::Pixel => Ok((center, [length, length])),
        RegionUnits::World => {
            let wcs = wcs.ok_or(DataError::MissingCoordinates {
                operation,
                which: "spatial",
            })?;
            let [sy, sx] = wcs.get_step();
            Ok((wcs.sky2pix(center.0, center.1), [length / sy, length / sx]))
        }
    }
}

impl<D: Rank> DataArray<D> {
    pub(crate) fn require_wcs(&self, operation: &'static str) -> Result<&Wcs> {
        self.wcs().ok_or(DataError::MissingCoordinates {
            operation,
            which: "spatial",
        })
    }
}

impl Image {
    /// Attach spatial coordinates (builder style). A size mismatch is repaired
    /// and reported.
    pub fn with_wcs(mut self, wcs: Wcs) -> Self {
        self.attach_wcs(Some(wcs));
        self
    }

    /// World coordinates (y, x) of pixel (0, 0).
    pub fn get_start(&self) -> Result<(f64, f64)> {
        Ok(self.require_wcs("get_start")?.get_start())
    }

    /// World coordinates (y, x) of the last pixel.
    pub fn get_end(&self) -> Result<(f64, f64)> {
        Ok(self.require_wcs("get_end")?.get_end())
    }

    /// Pixel size (y, x) in world units.
    pub fn get_step(&self) -> Result<[f64; 2]> {
        Ok(self.require_wcs("get_step")?.get_step())
    }

    /// World bounding box `[ymin, xmin, ymax, xmax]`.
    pub fn get_range(&self) -> Result<[f64; 4]> {
        Ok(self.require_wcs("get_range")?.get_range())
    }

    /// Rotation angle in degrees.
    pub fn get_rot(&self) -> Result<f64> {
        Ok(self.require_wcs("get_rot")?.get_rot())
    }

    /// Mask the pixels inside (or, with `inside == false`, outside) a region.
    /// The existing mask is kept.
    pub fn mask_region(&mut self, region: &Region, inside: bool) -> Result<()> {
        let region = region.to_pixels(self.wcs())?;
        let (ny, nx) = (self.shape()[0], self.shape()[1]);
        let mask = region.mask(ny, nx, inside);
        self.mask_selection(&mask)
    }

    /// Sub-image covering the world box `min..=max` (y, x).
    ///
    /// With `mask`, pixels of the sub-image whose world position falls outside
    /// the box (possible at the rounded edges or with a rotated grid) are
    /// masked.
    pub fn truncate(&self, min: [f64; 2], max: [f64; 2], mask: bool) -> Result<Image> {
        let wcs = self.require_wcs("truncate")?;
        let (rows, cols) = box_pixels(wcs, min, max, self.shape()[0], self.shape()[1])?;
        let mut out = self.slice_ranges(&[rows, cols])?;
        if mask {
            if let Some(sub) = out.wcs() {
                let outside = outside_box(sub, min, max, self.tolerance());
                out.mask_selection(&outside)?;
            }
        }
        Ok(out)
    }

    /// Sub-image of `size` (full width) around `center`, both in the units
    /// given.
    pub fn subimage(&self, center: (f64, f64), size: f64, units: RegionUnits) -> Result<Image> {
        let (center, size) = pixel_frame(self.wcs(), center, size, units, "subimage")?;
        let (rows, cols) = centred_box(center, size, self.shape()[0], self.shape()[1])?;
        self.slice_ranges(&[rows, cols])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    fn grid() -> Image {
        Image::new(Array2::from_shape_fn((6, 5), |(j, i)| (j * 10 + i) as f64))
            .with_wcs(Wcs::linear([1.0, 1.0], [0.0, 0.0], [1.0, 1.0], [0, 0]))
    }

    #[test]
    fn test_truncate_matches_box() {
        let ima = grid();
        let out = ima.truncate([0.0, 1.0], [1.0, 3.0], true).unwrap();
        assert_eq!(out.shape(), &[2, 3]);
        assert_eq!(out.get_start().unwrap(), (0.0, 1.0));
        assert_eq!(out.get_end().unwrap(), (1.0, 3.0));
        assert_eq!(out.data().unwrap().count_masked(), 0);
    }

    #[test]
    fn test_truncate_masks_rounded_edges() {
        let ima = grid();
        let out = ima.truncate([0.5, 1.2], [2.0, 2.5], true).unwrap();
        // rows 0..=2 and columns 1..=2 are covered by the pixel box
        assert_eq!(out.shape(), &[3, 2]);
        let mask = out.data().unwrap().mask().clone();
        assert!(mask[[0, 0]] && mask[[0, 1]] && mask[[1, 0]]);
        assert!(!mask[[1, 1]] && !mask[[2, 1]]);

        let plain = ima.truncate([0.5, 1.2], [2.0, 2.5], false).unwrap();
        assert_eq!(plain.data().unwrap().count_masked(), 0);
    }

    #[test]
    fn test_truncate_outside_grid() {
        let ima = grid();
        assert!(matches!(
            ima.truncate([10.0, 10.0], [12.0, 12.0], false),
            Err(DataError::EmptySelection { .. })
        ));
        assert!(matches!(
            Image::new(Array2::zeros((2, 2))).truncate([0.0, 0.0], [1.0, 1.0], false),
            Err(DataError::MissingCoordinates { .. })
        ));
    }

    #[test]
    fn test_mask_region_keeps_existing_mask() {
        let mut ima = grid();
        ima.mask_region(&Region::circle((0.0, 0.0), 0.5), true).unwrap();
        assert_eq!(ima.data().unwrap().count_masked(), 1);
        ima.mask_region(&Region::circle((5.0, 4.0), 1.1), true).unwrap();
        assert_eq!(ima.data().unwrap().count_masked(), 1 + 3);
        ima.mask_region(&Region::rectangle((2.0, 2.0), 1.0, 1.0), false).unwrap();
        assert_eq!(ima.data().unwrap().count_masked(), 30 - 9);
    }

    #[test]
    fn test_subimage() {
        let ima = grid();
        let sub = ima.subimage((2.0, 2.8), 2.0, RegionUnits::Pixel).unwrap();
        assert_eq!(sub.shape(), &[2, 2]);
        assert_eq!(sub.get_start().unwrap(), (1.0, 2.0));
        let world = ima.subimage((2.0, 2.8), 2.0, RegionUnits::World).unwrap();
        assert_eq!(world.shape(), &[2, 2]);
    }
}
