//! End-to-end scenarios on small synthetic cubes.

use ndarray::{Array1, Array3, s};

use super::helpers::{assert_all_close, assert_close, ones_cube, unit_wave, unit_wcs};
use crate::coords::WaveCoord;
use crate::cube::MapOptions;
use crate::data::{Cube, Reduction, Region, RegionUnits, Spectrum};
use crate::error::DataError;

#[test]
fn test_spatial_sum_of_ones() {
    let cube = ones_cube();
    let sp = cube.collapse_spatial(Reduction::Sum).unwrap();
    assert_eq!(sp.len(), 10);
    assert_all_close(sp.data().unwrap().data(), &Array1::from_elem(10, 30.0), 0.0);
    assert_eq!(sp.wave().unwrap().get_start(), 1.0);
}

#[test]
fn test_cube_plus_spectrum_broadcasts_along_wavelength() {
    let cube = ones_cube();
    let v = Array1::from_shape_fn(10, |k| (k as f64).powi(2) - 3.0);
    let sp = Spectrum::new(v.clone()).with_wave(unit_wave());

    for result in [(&cube + &sp).unwrap(), (&sp + &cube).unwrap()] {
        assert_eq!(result.shape(), &[10, 6, 5]);
        for ((k, _, _), value) in result.data().unwrap().data().indexed_iter() {
            assert_eq!(*value, 1.0 + v[k]);
        }
        assert!(result.wcs().is_some());
    }
}

#[test]
fn test_bandpass_with_partially_masked_spaxel() {
    let data = Array3::from_shape_fn((7, 2, 3), |(k, _, _)| k as f64);
    let mut mask = Array3::from_elem((7, 2, 3), false);
    // one interior sample of spaxel (0, 1)
    mask[[2, 0, 1]] = true;
    // every sample of spaxel (1, 2)
    mask.slice_mut(s![.., 1, 2]).fill(true);
    let cube = Cube::new(data)
        .with_mask(mask)
        .unwrap()
        .with_var(Array3::from_elem((7, 2, 3), 1.0))
        .unwrap()
        .with_wave(WaveCoord::new(1.0, 1.0, 0.0, None))
        .with_wcs(unit_wcs());

    // trapezoid rising over [0.5, 1.5] and falling over [4.5, 5.5]
    let ima = cube
        .bandpass_image(&[0.5, 1.5, 4.5, 5.5], &[0.0, 1.0, 1.0, 0.0], false)
        .unwrap();

    let masked: Vec<bool> = ima.data().unwrap().mask().iter().copied().collect();
    assert_eq!(masked, vec![false, false, false, false, false, true]);

    // weights 0, 0.5, 1, 1, 1, 0.5, 0
    assert_close(ima.element(&[0, 0]).unwrap().value, 3.0, 1e-12);
    let expected = (0.5 * 1.0 + 3.0 + 4.0 + 0.5 * 5.0) / 3.0;
    assert_close(ima.element(&[0, 1]).unwrap().value, expected, 1e-12);
    assert_close(ima.element(&[0, 1]).unwrap().var.unwrap(), 2.5 / 9.0, 1e-12);
    assert_close(ima.element(&[0, 0]).unwrap().var.unwrap(), 3.5 / 16.0, 1e-12);
    assert!(ima.element(&[1, 2]).unwrap().masked);
}

#[test]
fn test_truncate_matches_requested_box() {
    let cube = ones_cube();
    let out = cube.truncate([3.0, 1.0, 0.0], [6.0, 3.0, 2.0], true).unwrap();
    assert_eq!(out.get_start().unwrap(), [3.0, 1.0, 0.0]);
    assert_eq!(out.get_end().unwrap(), [6.0, 3.0, 2.0]);
    assert_eq!(out.data().unwrap().count_masked(), 0);

    // a box whose corners fall between pixel centres
    let out = cube.truncate([3.0, 1.4, 0.6], [6.0, 3.0, 2.0], true).unwrap();
    assert_eq!(out.shape(), &[4, 3, 3]);
    assert_eq!(out.get_start().unwrap(), [3.0, 1.0, 0.0]);
    let plane = out.data().unwrap().mask().slice(s![0, .., ..]).to_owned();
    // row y = 1 and column x = 0 lie outside the requested box
    assert!(plane.row(0).iter().all(|&m| m));
    assert!(plane.column(0).iter().all(|&m| m));
    assert_eq!(plane.iter().filter(|&&m| !m).count(), 4);

    let unmasked = cube.truncate([3.0, 1.4, 0.6], [6.0, 3.0, 2.0], false).unwrap();
    assert_eq!(unmasked.data().unwrap().count_masked(), 0);
}

#[test]
fn test_aperture_then_normalise_cube() {
    let cube = super::helpers::ramp_cube();
    let sp = cube.aperture((3.0, 2.0), 1.5, RegionUnits::Pixel).unwrap();
    // spaxels strictly within 1.5 pixels of (3, 2)
    let n = Region::circle((3.0, 2.0), 1.5)
        .mask(6, 5, true)
        .iter()
        .filter(|&&m| m)
        .count();
    assert_eq!(n, 9);
    assert_close(sp.element(&[0]).unwrap().value, 9.0 * (1.0 + 32.0), 1e-9);

    let normalised = (&cube / &sp).unwrap();
    assert_close(
        normalised.element(&[0, 3, 2]).unwrap().value,
        33.0 / (9.0 * 33.0),
        1e-12,
    );
    assert!(normalised.var().unwrap().is_some());
}

#[test]
fn test_map_spectra_matches_sequential_loop() {
    let cube = super::helpers::ramp_cube();
    let continuum: crate::data::Image = cube
        .map_spectra(
            |sp| sp.median().map(|m| m.unwrap_or(f64::NAN)),
            &MapOptions::default().with_workers(3),
        )
        .unwrap();
    for item in cube.iter_spectra() {
        let (sp, (p, q)) = item.unwrap();
        assert_eq!(
            continuum.element(&[p, q]).unwrap().value,
            sp.median().unwrap().unwrap()
        );
    }

    let subtracted = (&cube - &continuum).unwrap();
    let median_of_residual = subtracted.spectrum(2, 3).unwrap().median().unwrap().unwrap();
    assert_close(median_of_residual, 0.0, 1e-9);
}

#[test]
fn test_image_with_spectrum_is_rejected() {
    let cube = ones_cube();
    let ima = cube.plane(0).unwrap();
    let sp = cube.spectrum(0, 0).unwrap();
    let err = crate::arithmetic::binary(
        crate::arithmetic::BinaryOp::Add,
        (&ima).into(),
        (&sp).into(),
    )
    .unwrap_err();
    assert!(matches!(err, DataError::UnsupportedCombination { .. }));
}
