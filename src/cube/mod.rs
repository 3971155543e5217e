//! Operations specific to three-dimensional (wavelength, y, x) cubes.
//!
//! Besides the rank-generic operations of
//! [`DataArray`](crate::data::DataArray), a cube supports:
//! - reductions over the spectral axis (giving an [`Image`]) or over both
//!   spatial axes (giving a [`Spectrum`])
//! - wavelength and world-box sub-selection, region masking
//! - aperture, sub-cube and bandpass extraction (see `extract`)
//! - iteration over spectra or planes and parallel mapping (see `iter`)

mod extract;
mod iter;

use ndarray::{Array, Array1, Array2, Array3, Axis, Dimension, Zip, s};

use crate::coords::{WaveCoord, Wcs};
use crate::data::{Cube, Element, Image, MaskedArray, Reduction, Region, Sel, Selection, Spectrum, reduce};
use crate::error::{DataError, Result};
use crate::image::{box_pixels, outside_box};
use crate::spectrum::{lambda_span, nearest_span};

pub use iter::{
    ImageIter, ImageMapOutput, MapOptions, Positional, ProgressFn, SpectrumIter, SpectrumMapOutput,
};

/// Split reduced elements into values, mask and (optional) variance.
fn unzip_elements<D: Dimension>(
    elements: Array<Element, D>,
    with_var: bool,
) -> Result<(MaskedArray<D>, Option<Array<f64, D>>)> {
    let values = elements.map(|e| e.value);
    let mask = elements.map(|e| e.masked);
    let var = with_var.then(|| elements.map(|e| e.var.unwrap_or(0.0)));
    Ok((MaskedArray::new(values, mask)?, var))
}

impl Cube {
    /// Attach spectral coordinates (builder style). A length mismatch is
    /// repaired and reported.
    pub fn with_wave(mut self, wave: WaveCoord) -> Self {
        self.attach_wave(Some(wave));
        self
    }

    /// Attach spatial coordinates (builder style). A size mismatch is
    /// repaired and reported.
    pub fn with_wcs(mut self, wcs: Wcs) -> Self {
        self.attach_wcs(Some(wcs));
        self
    }

    /// Number of wavelength planes.
    pub fn n_planes(&self) -> usize {
        self.shape()[0]
    }

    /// Spatial shape (ny, nx).
    pub fn spatial_shape(&self) -> (usize, usize) {
        (self.shape()[1], self.shape()[2])
    }

    /// The spectrum at spaxel `(p, q)`.
    pub fn spectrum(&self, p: usize, q: usize) -> Result<Spectrum> {
        match self.select(&[Sel::All, Sel::At(p), Sel::At(q)])? {
            Selection::Spectrum(sp) => Ok(sp),
            other => Err(DataError::UnsupportedCombination {
                left: "spectrum",
                right: other.kind(),
            }),
        }
    }

    /// Wavelength plane `k`.
    pub fn plane(&self, k: usize) -> Result<Image> {
        match self.select(&[Sel::At(k), Sel::All, Sel::All])? {
            Selection::Image(ima) => Ok(ima),
            other => Err(DataError::UnsupportedCombination {
                left: "image",
                right: other.kind(),
            }),
        }
    }

    /// World coordinates `[λ, y, x]` of the first element.
    pub fn get_start(&self) -> Result<[f64; 3]> {
        let wave = self.require_wave("get_start")?;
        let (y, x) = self.require_wcs("get_start")?.get_start();
        Ok([wave.get_start(), y, x])
    }

    /// World coordinates `[λ, y, x]` of the last element.
    pub fn get_end(&self) -> Result<[f64; 3]> {
        let wave = self.require_wave("get_end")?;
        let (y, x) = self.require_wcs("get_end")?.get_end();
        Ok([wave.get_end(), y, x])
    }

    /// Steps `[λ, y, x]`.
    pub fn get_step(&self) -> Result<[f64; 3]> {
        let wave = self.require_wave("get_step")?;
        let [sy, sx] = self.require_wcs("get_step")?.get_step();
        Ok([wave.get_step(), sy, sx])
    }

    /// Bounding box `[λmin, ymin, xmin, λmax, ymax, xmax]`.
    pub fn get_range(&self) -> Result<[f64; 6]> {
        let (lmin, lmax) = self.require_wave("get_range")?.get_range();
        let [ymin, xmin, ymax, xmax] = self.require_wcs("get_range")?.get_range();
        Ok([lmin, ymin, xmin, lmax, ymax, xmax])
    }

    /// Rotation angle of the spatial grid in degrees.
    pub fn get_rot(&self) -> Result<f64> {
        Ok(self.require_wcs("get_rot")?.get_rot())
    }

    /// Reduce every spectrum to one value, giving an image.
    ///
    /// A spaxel is masked when all its samples are masked.
    pub fn collapse_wave(&self, reduction: Reduction) -> Result<Image> {
        let data = self.data()?;
        let var = self.var()?;
        let elements = match var {
            Some(var) => Zip::from(data.data().lanes(Axis(0)))
                .and(data.mask().lanes(Axis(0)))
                .and(var.lanes(Axis(0)))
                .map_collect(|d, m, v| reduce(d, m, Some(v), reduction)),
            None => Zip::from(data.data().lanes(Axis(0)))
                .and(data.mask().lanes(Axis(0)))
                .map_collect(|d, m| reduce(d, m, None, reduction)),
        };
        let keep_var = var.is_some() && reduction != Reduction::Median;
        let (values, var) = unzip_elements(elements, keep_var)?;
        self.derive(values, var, self.wcs().cloned(), None)
    }

    /// Reduce every plane to one value, giving a spectrum.
    pub fn collapse_spatial(&self, reduction: Reduction) -> Result<Spectrum> {
        let data = self.data()?;
        let var = self.var()?;
        let elements: Vec<Element> = (0..self.n_planes())
            .map(|k| {
                let d = data.data().index_axis(Axis(0), k);
                let m = data.mask().index_axis(Axis(0), k);
                let v = var.map(|v| v.index_axis(Axis(0), k));
                reduce(d, m, v, reduction)
            })
            .collect();
        let keep_var = var.is_some() && reduction != Reduction::Median;
        let (values, var) = unzip_elements(Array1::from_vec(elements), keep_var)?;
        self.derive(values, var, None, self.wave().cloned())
    }

    /// Planes covering `lmin..=lmax`. A single plane is returned as an
    /// [`Selection::Image`], anything wider as a [`Selection::Cube`].
    pub fn get_lambda(&self, lmin: f64, lmax: f64) -> Result<Selection> {
        let wave = self.require_wave("get_lambda")?;
        let span = lambda_span(wave, lmin, lmax, self.n_planes())?;
        if span.len() == 1 {
            self.select(&[Sel::At(span.start), Sel::All, Sel::All])
        } else {
            self.select(&[Sel::Span(span), Sel::All, Sel::All])
        }
    }

    /// Sum (`is_sum`) or mean of the planes between the pixels nearest to
    /// `l1` and `l2`, inclusive.
    pub fn get_image(&self, wave_range: (f64, f64), is_sum: bool) -> Result<Image> {
        let wave = self.require_wave("get_image")?;
        let a = wave.pixel_nearest(wave_range.0);
        let b = wave.pixel_nearest(wave_range.1);
        let (ny, nx) = self.spatial_shape();
        let planes = self.slice_ranges(&[a.min(b)..a.max(b) + 1, 0..ny, 0..nx])?;
        log::debug!(
            "Combining planes {}..={} of a {:?} cube",
            a.min(b),
            a.max(b),
            self.shape()
        );
        planes.collapse_wave(if is_sum { Reduction::Sum } else { Reduction::Mean })
    }

    /// Sub-cube covering the world box `min..=max`, both given as `[λ, y, x]`.
    ///
    /// The spectral bounds snap to the nearest pixels; a range that collapses
    /// to a single plane is rejected. With `mask`, spaxels whose world
    /// position falls outside the spatial box are masked in every plane.
    pub fn truncate(&self, min: [f64; 3], max: [f64; 3], mask: bool) -> Result<Cube> {
        let wave = self.require_wave("truncate")?;
        let wcs = self.require_wcs("truncate")?;
        let planes = nearest_span(wave, min[0], max[0])?;
        let (ny, nx) = self.spatial_shape();
        let (rows, cols) = box_pixels(wcs, [min[1], min[2]], [max[1], max[2]], ny, nx)?;
        let mut out = self.slice_ranges(&[planes, rows, cols])?;
        if mask {
            if let Some(sub) = out.wcs() {
                let outside = outside_box(sub, [min[1], min[2]], [max[1], max[2]], self.tolerance());
                let selection = repeat_planes(&outside, out.n_planes());
                out.mask_selection(&selection)?;
            }
        }
        Ok(out)
    }

    /// Mask a spatial region, optionally restricted to a wavelength range.
    ///
    /// With `inside`, the region's spaxels are masked in the planes of the
    /// wavelength range. Otherwise every plane outside the range is masked
    /// completely and the planes inside it are masked outside the region.
    /// The wavelength range runs from the pixel nearest to its lower bound up
    /// to, but excluding, the pixel nearest to its upper bound.
    pub fn mask_region(&mut self, region: &Region, lbda: Option<(f64, f64)>, inside: bool) -> Result<()> {
        let region = region.to_pixels(self.wcs())?;
        let (ny, nx) = self.spatial_shape();
        let n = self.n_planes();
        let planes = match lbda {
            None => 0..n,
            Some((l1, l2)) => {
                let wave = self.require_wave("mask_region")?;
                let a = wave.pixel_nearest(l1);
                let b = wave.pixel_nearest(l2);
                a.min(b)..a.max(b)
            }
        };
        let hit = region.mask(ny, nx, true);
        let selection = Array3::from_shape_fn((n, ny, nx), |(k, j, i)| {
            let in_range = planes.contains(&k);
            if inside {
                in_range && hit[[j, i]]
            } else {
                !in_range || !hit[[j, i]]
            }
        });
        self.mask_selection(&selection)
    }

    fn conversion_to_self(&self, unit: Option<&crate::units::Unit>) -> Result<f64> {
        Ok(match (self.unit(), unit) {
            (Some(to), Some(from)) => from.conversion_factor(to)?,
            _ => 1.0,
        })
    }

    /// Overwrite plane `k` with an image, converting it into the cube's unit.
    ///
    /// The variance plane is replaced when both sides track variance.
    pub fn set_plane(&mut self, k: usize, image: &Image) -> Result<()> {
        let (ny, nx) = self.spatial_shape();
        if k >= self.n_planes() {
            return Err(DataError::IndexOutOfBounds {
                axis: 0,
                index: k,
                len: self.n_planes(),
            });
        }
        if image.shape() != &[ny, nx] {
            return Err(DataError::shape_mismatch("set_plane", &[ny, nx], image.shape()));
        }
        let factor = self.conversion_to_self(image.unit())?;
        let src = image.data()?.clone();
        let src_var = image.var()?.cloned();
        let (mut values, mut mask) = self.masked_mut()?.parts_mut();
        values.index_axis_mut(Axis(0), k).assign(&src.data().mapv(|v| v * factor));
        mask.index_axis_mut(Axis(0), k).assign(src.mask());
        if let (Some(mut var), Some(src_var)) = (self.var_mut()?, src_var) {
            var.index_axis_mut(Axis(0), k).assign(&src_var.mapv(|v| v * factor * factor));
        }
        Ok(())
    }

    /// Overwrite the spectrum at spaxel `(p, q)`, converting it into the
    /// cube's unit.
    pub fn set_spectrum(&mut self, p: usize, q: usize, spectrum: &Spectrum) -> Result<()> {
        let (ny, nx) = self.spatial_shape();
        for (axis, index, len) in [(1, p, ny), (2, q, nx)] {
            if index >= len {
                return Err(DataError::IndexOutOfBounds { axis, index, len });
            }
        }
        if spectrum.len() != self.n_planes() {
            return Err(DataError::shape_mismatch(
                "set_spectrum",
                &[self.n_planes()],
                spectrum.shape(),
            ));
        }
        let factor = self.conversion_to_self(spectrum.unit())?;
        let src = spectrum.data()?.clone();
        let src_var = spectrum.var()?.cloned();
        let (mut values, mut mask) = self.masked_mut()?.parts_mut();
        values.slice_mut(s![.., p, q]).assign(&src.data().mapv(|v| v * factor));
        mask.slice_mut(s![.., p, q]).assign(src.mask());
        if let (Some(mut var), Some(src_var)) = (self.var_mut()?, src_var) {
            var.slice_mut(s![.., p, q]).assign(&src_var.mapv(|v| v * factor * factor));
        }
        Ok(())
    }

    /// Associated image by name.
    pub fn ima(&self, name: &str) -> Option<&Image> {
        self.images().get(name)
    }

    /// Names of the associated images, sorted.
    pub fn ima_names(&self) -> Vec<&str> {
        self.images().keys().map(String::as_str).collect()
    }

    /// Attach an associated image. Its shape must match the spatial shape.
    pub fn set_ima(&mut self, name: impl Into<String>, image: Image) -> Result<()> {
        let (ny, nx) = self.spatial_shape();
        if image.shape() != &[ny, nx] {
            return Err(DataError::shape_mismatch("associated image", &[ny, nx], image.shape()));
        }
        self.images_mut().insert(name.into(), image);
        Ok(())
    }

    /// Detach an associated image.
    pub fn remove_ima(&mut self, name: &str) -> Option<Image> {
        self.images_mut().remove(name)
    }
}

/// Uniform mask of a spatial selection, repeated over `n` planes.
pub(crate) fn repeat_planes(mask: &Array2<bool>, n: usize) -> Array3<bool> {
    let (ny, nx) = mask.dim();
    Array3::from_shape_fn((n, ny, nx), |(_, j, i)| mask[[j, i]])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::units::Unit;
    use ndarray::Array3;

    pub(super) fn cube_10_6_5() -> Cube {
        Cube::new(Array3::from_shape_fn((10, 6, 5), |(k, j, i)| (k * 100 + j * 10 + i) as f64))
            .with_wave(WaveCoord::new(1.0, 1.0, 1.0, None))
            .with_wcs(Wcs::linear([1.0, 1.0], [0.0, 0.0], [1.0, 1.0], [0, 0]))
    }

    #[test]
    fn test_collapse_spatial_of_ones() {
        let cube = Cube::new(Array3::ones((10, 6, 5)))
            .with_wave(WaveCoord::new(1.0, 1.0, 1.0, None))
            .with_var(Array3::from_elem((10, 6, 5), 0.5))
            .unwrap();
        let sp = cube.collapse_spatial(Reduction::Sum).unwrap();
        assert_eq!(sp.len(), 10);
        assert!(sp.data().unwrap().data().iter().all(|&v| v == 30.0));
        assert!(sp.var().unwrap().unwrap().iter().all(|&v| v == 15.0));
        assert_eq!(sp.get_start().unwrap(), 1.0);

        let mean = cube.collapse_spatial(Reduction::Mean).unwrap();
        assert!((mean.var().unwrap().unwrap()[0] - 15.0 / 900.0).abs() < 1e-15);
        assert!(cube.collapse_spatial(Reduction::Median).unwrap().var().unwrap().is_none());
    }

    #[test]
    fn test_collapse_wave_masks_empty_spaxels() {
        let mut cube = cube_10_6_5();
        let mut selection = Array3::from_elem((10, 6, 5), false);
        selection.slice_mut(s![.., 2, 3]).fill(true);
        selection[[0, 0, 0]] = true;
        cube.mask_selection(&selection).unwrap();

        let ima = cube.collapse_wave(Reduction::Mean).unwrap();
        assert_eq!(ima.shape(), &[6, 5]);
        assert!(ima.element(&[2, 3]).unwrap().masked);
        // planes 1..10 of spaxel (0, 0): mean of 100..=900
        assert_eq!(ima.element(&[0, 0]).unwrap().value, 500.0);
        assert_eq!(ima.element(&[1, 1]).unwrap().value, 461.0);
        assert!(ima.wcs().is_some() && ima.wave().is_none());
    }

    #[test]
    fn test_get_lambda_and_get_image() {
        let cube = cube_10_6_5();
        match cube.get_lambda(3.0, 5.5).unwrap() {
            Selection::Cube(sub) => {
                assert_eq!(sub.shape(), &[3, 6, 5]);
                assert_eq!(sub.get_start().unwrap()[0], 3.0);
            }
            other => panic!("unexpected selection {:?}", other),
        }
        assert!(matches!(cube.get_lambda(4.0, 4.2).unwrap(), Selection::Image(_)));

        let sum = cube.get_image((2.0, 3.0), true).unwrap();
        assert_eq!(sum.element(&[0, 0]).unwrap().value, 100.0 + 200.0);
        let mean = cube.get_image((3.0, 2.0), false).unwrap();
        assert_eq!(mean.element(&[1, 2]).unwrap().value, 162.0);
    }

    #[test]
    fn test_truncate_to_world_box() {
        let cube = cube_10_6_5();
        let out = cube.truncate([2.0, 0.0, 1.0], [5.0, 1.0, 3.0], true).unwrap();
        assert_eq!(out.shape(), &[4, 2, 3]);
        assert_eq!(out.get_start().unwrap(), [2.0, 0.0, 1.0]);
        assert_eq!(out.get_end().unwrap(), [5.0, 1.0, 3.0]);
        assert_eq!(out.data().unwrap().count_masked(), 0);
        assert_eq!(out.element(&[0, 0, 0]).unwrap().value, 101.0);

        assert!(cube.truncate([2.0, 0.0, 1.0], [2.0, 1.0, 3.0], false).is_err());
    }

    #[test]
    fn test_truncate_masks_outside_pixels() {
        let cube = cube_10_6_5();
        let out = cube.truncate([2.0, 0.5, 1.0], [5.0, 2.0, 3.0], true).unwrap();
        assert_eq!(out.shape(), &[4, 3, 3]);
        // row 0 lies at y = 0 < 0.5 in every plane
        assert_eq!(out.data().unwrap().count_masked(), 4 * 3);
        assert!(out.element(&[3, 0, 2]).unwrap().masked);
        assert!(!out.element(&[3, 1, 2]).unwrap().masked);
    }

    #[test]
    fn test_mask_region_inside_and_outside() {
        let region = Region::circle((2.0, 2.0), 1.0);
        let mut inside = cube_10_6_5();
        inside.mask_region(&region, Some((2.0, 5.0)), true).unwrap();
        let per_plane = region.mask(6, 5, true).iter().filter(|&&m| m).count();
        assert_eq!(inside.data().unwrap().count_masked(), 3 * per_plane);
        assert!(inside.element(&[1, 2, 2]).unwrap().masked);
        assert!(!inside.element(&[4, 2, 2]).unwrap().masked);

        let mut outside = cube_10_6_5();
        outside.mask_region(&region, Some((2.0, 5.0)), false).unwrap();
        assert_eq!(
            outside.data().unwrap().count_masked(),
            7 * 30 + 3 * (30 - per_plane)
        );

        let mut all = cube_10_6_5();
        all.mask_region(&region, None, true).unwrap();
        assert_eq!(all.data().unwrap().count_masked(), 10 * per_plane);
    }

    #[test]
    fn test_set_plane_and_spectrum() {
        let mut cube = cube_10_6_5()
            .with_unit(Unit::parse("ct").unwrap())
            .with_var(Array3::zeros((10, 6, 5)))
            .unwrap();
        let ima = Image::new(Array2::from_elem((6, 5), 3.0))
            .with_unit(Unit::parse("2 ct").unwrap())
            .with_var(Array2::from_elem((6, 5), 1.0))
            .unwrap();
        cube.set_plane(4, &ima).unwrap();
        assert_eq!(cube.element(&[4, 5, 4]).unwrap().value, 6.0);
        assert_eq!(cube.element(&[4, 5, 4]).unwrap().var, Some(4.0));

        let sp = Spectrum::new(Array1::from_elem(10, -1.0));
        cube.set_spectrum(1, 2, &sp).unwrap();
        assert_eq!(cube.element(&[9, 1, 2]).unwrap().value, -1.0);
        assert_eq!(cube.element(&[9, 1, 2]).unwrap().var, Some(0.0));

        assert!(cube.set_plane(10, &ima).is_err());
        assert!(cube.set_spectrum(0, 0, &Spectrum::new(Array1::zeros(3))).is_err());
        let metres = Image::new(Array2::zeros((6, 5))).with_unit(Unit::parse("m").unwrap());
        assert!(matches!(cube.set_plane(0, &metres), Err(DataError::Unit(_))));
    }

    #[test]
    fn test_associated_images() {
        let mut cube = cube_10_6_5();
        cube.set_ima("WHITE", Image::new(Array2::zeros((6, 5)))).unwrap();
        assert!(cube.set_ima("BAD", Image::new(Array2::zeros((2, 2)))).is_err());
        assert_eq!(cube.ima_names(), vec!["WHITE"]);
        assert!(cube.ima("WHITE").is_some());
        assert!(cube.remove_ima("WHITE").is_some());
        assert!(cube.ima_names().is_empty());
    }
}
