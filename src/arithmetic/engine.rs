//! Binary combination of arrays with broadcasting, unit conversion and
//! variance propagation.

use ndarray::{Array, ArrayView, Axis, Dimension, Zip};

use crate::arithmetic::{AnyArray, ArrayRef, BinaryOp};
use crate::data::{Cube, DataArray, Image, MaskedArray, Rank, Spectrum};
use crate::error::{DataError, Result};
use crate::units::Unit;

/// One side of a combination, already aligned with the result shape.
struct Operand<'a, D: Dimension> {
    data: ArrayView<'a, f64, D>,
    mask: ArrayView<'a, bool, D>,
    var: Option<ArrayView<'a, f64, D>>,
    /// Unit conversion applied to values (squared for variance)
    factor: f64,
}

/// Combine two arrays of any kind.
///
/// Fails with [`DataError::UnsupportedCombination`] for an image with a
/// spectrum, [`DataError::ShapeMismatch`] when the aligned axes differ and
/// [`DataError::IncompatibleCoordinates`] when both operands describe the
/// same axis differently.
pub fn binary(op: BinaryOp, left: ArrayRef<'_>, right: ArrayRef<'_>) -> Result<AnyArray> {
    Ok(match (left, right) {
        (ArrayRef::Spectrum(a), ArrayRef::Spectrum(b)) => AnyArray::Spectrum(same_rank(op, a, b)?),
        (ArrayRef::Image(a), ArrayRef::Image(b)) => AnyArray::Image(same_rank(op, a, b)?),
        (ArrayRef::Cube(a), ArrayRef::Cube(b)) => AnyArray::Cube(same_rank(op, a, b)?),
        (ArrayRef::Cube(c), ArrayRef::Spectrum(s)) => AnyArray::Cube(cube_spectrum(op, c, s, false)?),
        (ArrayRef::Spectrum(s), ArrayRef::Cube(c)) => AnyArray::Cube(cube_spectrum(op, c, s, true)?),
        (ArrayRef::Cube(c), ArrayRef::Image(i)) => AnyArray::Cube(cube_image(op, c, i, false)?),
        (ArrayRef::Image(i), ArrayRef::Cube(c)) => AnyArray::Cube(cube_image(op, c, i, true)?),
        (ArrayRef::Image(_), ArrayRef::Spectrum(_)) | (ArrayRef::Spectrum(_), ArrayRef::Image(_)) => {
            return Err(DataError::UnsupportedCombination {
                left: left.kind(),
                right: right.kind(),
            });
        }
    })
}

/// Element-wise combination of two arrays of the same rank.
pub(crate) fn same_rank<D: Rank>(
    op: BinaryOp,
    a: &DataArray<D>,
    b: &DataArray<D>,
) -> Result<DataArray<D>> {
    if a.shape() != b.shape() {
        return Err(DataError::shape_mismatch(
            format!("{} {} {}", D::KIND, op.symbol(), D::KIND),
            a.shape(),
            b.shape(),
        ));
    }
    check_coordinates(a, b)?;
    let (factor, unit) = plan_units(op, a.unit(), b.unit(), false)?;

    let ad = a.data()?;
    let bd = b.data()?;
    let left = Operand {
        data: ad.data().view(),
        mask: ad.mask().view(),
        var: a.var()?.map(|v| v.view()),
        factor: 1.0,
    };
    let right = Operand {
        data: bd.data().view(),
        mask: bd.mask().view(),
        var: b.var()?.map(|v| v.view()),
        factor,
    };
    finish(a, op, left, right, unit)
}

/// Cube with a spectrum aligned on the wavelength axis. With `swapped` the
/// spectrum is the left operand.
pub(crate) fn cube_spectrum(op: BinaryOp, cube: &Cube, sp: &Spectrum, swapped: bool) -> Result<Cube> {
    if cube.shape()[0] != sp.shape()[0] {
        return Err(DataError::shape_mismatch(
            "cube and spectrum wavelength axes",
            &cube.shape()[..1],
            sp.shape(),
        ));
    }
    check_coordinates(cube, sp)?;
    broadcast_combine(op, cube, sp, &[1, 2], swapped)
}

/// Cube with an image aligned on the spatial axes. With `swapped` the image
/// is the left operand.
pub(crate) fn cube_image(op: BinaryOp, cube: &Cube, ima: &Image, swapped: bool) -> Result<Cube> {
    if cube.shape()[1..] != *ima.shape() {
        return Err(DataError::shape_mismatch(
            "cube and image spatial axes",
            &cube.shape()[1..],
            ima.shape(),
        ));
    }
    check_coordinates(cube, ima)?;
    broadcast_combine(op, cube, ima, &[0], swapped)
}

/// Combine a cube with a lower-rank array expanded by inserting `axes`.
fn broadcast_combine<E: Rank>(
    op: BinaryOp,
    cube: &Cube,
    lower: &DataArray<E>,
    axes: &[usize],
    swapped: bool,
) -> Result<Cube> {
    let (factor, unit) = plan_units(op, cube.unit(), lower.unit(), swapped)?;
    let cd = cube.data()?;
    let dim = cd.data().raw_dim();

    let ld = lower.data()?;
    let data = expand(ld.data(), axes, &dim)?;
    let mask = expand(ld.mask(), axes, &dim)?;
    let var = match lower.var()? {
        Some(v) => Some(expand(v, axes, &dim)?),
        None => None,
    };

    let high = Operand {
        data: cd.data().view(),
        mask: cd.mask().view(),
        var: cube.var()?.map(|v| v.view()),
        factor: 1.0,
    };
    let low = Operand {
        data: data.view(),
        mask: mask.view(),
        var: var.as_ref().map(|v| v.view()),
        factor,
    };
    log::trace!(
        "Broadcasting {} {:?} against cube {:?}",
        E::KIND,
        lower.shape(),
        cube.shape()
    );
    if swapped {
        finish(cube, op, low, high, unit)
    } else {
        finish(cube, op, high, low, unit)
    }
}

/// Insert length-one `axes` into `array` and broadcast to `dim`.
fn expand<A: Clone, E: Dimension, D: Dimension>(
    array: &Array<A, E>,
    axes: &[usize],
    dim: &D,
) -> Result<Array<A, D>> {
    let mut view = array.view().into_dyn();
    for &axis in axes {
        view = view.insert_axis(Axis(axis));
    }
    let view = view.into_dimensionality::<D>()?;
    let broadcast = view
        .broadcast(dim.clone())
        .ok_or_else(|| DataError::shape_mismatch("broadcast", dim.slice(), array.shape()))?;
    Ok(broadcast.to_owned())
}

/// Both operands must agree on every coordinate descriptor they both carry.
fn check_coordinates<D: Rank, E: Rank>(a: &DataArray<D>, b: &DataArray<E>) -> Result<()> {
    let tolerance = a.tolerance();
    if let (Some(wa), Some(wb)) = (a.wave(), b.wave()) {
        if !wa.is_equal(wb, tolerance) {
            return Err(DataError::IncompatibleCoordinates { axis: "spectral" });
        }
    }
    if let (Some(wa), Some(wb)) = (a.wcs(), b.wcs()) {
        if !wa.is_equal(wb, tolerance) {
            return Err(DataError::IncompatibleCoordinates { axis: "spatial" });
        }
    }
    Ok(())
}

/// Conversion factor for the operand that is not the reference, and the unit
/// of the result.
///
/// Sums and differences convert the other operand into the reference unit and
/// fail when the units are incompatible. Products and quotients convert when
/// the units are compatible and otherwise compose them.
fn plan_units(
    op: BinaryOp,
    reference: Option<&Unit>,
    other: Option<&Unit>,
    swapped: bool,
) -> Result<(f64, Option<Unit>)> {
    match (reference, other) {
        (None, None) => Ok((1.0, None)),
        (Some(r), Some(o)) => {
            let factor = match o.conversion_factor(r) {
                Ok(f) => Some(f),
                Err(e) if op.is_additive() => return Err(e.into()),
                Err(_) => None,
            };
            let o = if factor.is_some() { r } else { o };
            let (l, rt) = if swapped { (o, r) } else { (r, o) };
            let unit = match op {
                BinaryOp::Add | BinaryOp::Sub => r.clone(),
                BinaryOp::Mul => l.multiply(rt),
                BinaryOp::Div => l.divide(rt),
            };
            Ok((factor.unwrap_or(1.0), Some(unit)))
        }
        (Some(u), None) | (None, Some(u)) => {
            let denominator = op == BinaryOp::Div && (reference.is_some() == swapped);
            let unit = if denominator {
                Unit::dimensionless().divide(u)
            } else {
                u.clone()
            };
            Ok((1.0, Some(unit)))
        }
    }
}

/// Compute values, mask and variance of `left ∘ right` and wrap them with
/// the coordinates and headers of `reference`.
fn finish<D: Rank>(
    reference: &DataArray<D>,
    op: BinaryOp,
    left: Operand<'_, D>,
    right: Operand<'_, D>,
    unit: Option<Unit>,
) -> Result<DataArray<D>> {
    let (fl, fr) = (left.factor, right.factor);
    let data = Zip::from(&left.data)
        .and(&right.data)
        .map_collect(|&a, &b| op.apply(a * fl, b * fr));
    let mask = Zip::from(&left.mask)
        .and(&right.mask)
        .map_collect(|&a, &b| a || b);

    let var = match (&left.var, &right.var) {
        (None, None) => None,
        (Some(va), Some(vb)) => Some(
            Zip::from(&left.data)
                .and(&right.data)
                .and(va)
                .and(vb)
                .map_collect(|&a, &b, &sa, &sb| {
                    op.variance(a * fl, b * fr, sa * fl * fl, sb * fr * fr)
                }),
        ),
        (Some(va), None) => Some(
            Zip::from(&left.data)
                .and(&right.data)
                .and(va)
                .map_collect(|&a, &b, &sa| op.variance(a * fl, b * fr, sa * fl * fl, 0.0)),
        ),
        (None, Some(vb)) => Some(
            Zip::from(&left.data)
                .and(&right.data)
                .and(vb)
                .map_collect(|&a, &b, &sb| op.variance(a * fl, b * fr, 0.0, sb * fr * fr)),
        ),
    };

    let mut out = reference.derive(
        MaskedArray::new(data, mask)?,
        var,
        reference.wcs().cloned(),
        reference.wave().cloned(),
    )?;
    out.set_unit(unit);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coords::{WaveCoord, Wcs};
    use ndarray::{Array1, Array2, Array3, arr1};

    fn cube(value: f64) -> Cube {
        Cube::new(Array3::from_elem((10, 6, 5), value))
            .with_wave(WaveCoord::new(1.0, 1.0, 1.0, None))
            .with_wcs(Wcs::default())
    }

    #[test]
    fn test_cube_plus_spectrum_broadcasts_on_wavelength() {
        let values = Array1::from_shape_fn(10, |k| k as f64 * 0.5);
        let sp = Spectrum::new(values.clone()).with_wave(WaveCoord::new(1.0, 1.0, 1.0, None));
        let c = cube(1.0);
        let out = binary(BinaryOp::Add, ArrayRef::Cube(&c), ArrayRef::Spectrum(&sp))
            .unwrap()
            .into_cube()
            .unwrap();
        for ((k, _, _), &v) in out.data().unwrap().data().indexed_iter() {
            assert_eq!(v, 1.0 + values[k]);
        }
    }

    #[test]
    fn test_cube_times_image_broadcasts_spatially() {
        let ima = Image::new(Array2::from_shape_fn((6, 5), |(j, i)| (j * 5 + i) as f64))
            .with_var(Array2::from_elem((6, 5), 1.0))
            .unwrap();
        let c = cube(2.0);
        let out = cube_image(BinaryOp::Mul, &c, &ima, false).unwrap();
        assert_eq!(out.element(&[3, 1, 2]).unwrap().value, 14.0);
        // cube variance untracked, so σ² = σb² · a²
        assert_eq!(out.element(&[3, 1, 2]).unwrap().var, Some(4.0));
    }

    #[test]
    fn test_swapped_operands_keep_order() {
        let sp = Spectrum::new(Array1::from_elem(10, 5.0));
        let c = cube(2.0);
        let diff = cube_spectrum(BinaryOp::Sub, &c, &sp, true).unwrap();
        assert_eq!(diff.element(&[0, 0, 0]).unwrap().value, 3.0);
        let ratio = cube_spectrum(BinaryOp::Div, &c, &sp, true).unwrap();
        assert_eq!(ratio.element(&[9, 5, 4]).unwrap().value, 2.5);
        assert!(ratio.wcs().is_some());
    }

    #[test]
    fn test_image_with_spectrum_is_rejected() {
        let sp = Spectrum::new(Array1::zeros(5));
        let ima = Image::new(Array2::zeros((5, 5)));
        assert!(matches!(
            binary(BinaryOp::Add, ArrayRef::Image(&ima), ArrayRef::Spectrum(&sp)),
            Err(DataError::UnsupportedCombination { left: "image", right: "spectrum" })
        ));
        assert!(binary(BinaryOp::Add, ArrayRef::Spectrum(&sp), ArrayRef::Image(&ima)).is_err());
    }

    #[test]
    fn test_shape_and_coordinate_checks() {
        let a = Spectrum::new(Array1::zeros(4));
        let b = Spectrum::new(Array1::zeros(5));
        assert!(matches!(
            same_rank(BinaryOp::Add, &a, &b),
            Err(DataError::ShapeMismatch { .. })
        ));

        let a = Spectrum::new(Array1::zeros(4)).with_wave(WaveCoord::new(1.0, 1.0, 4000.0, None));
        let b = Spectrum::new(Array1::zeros(4)).with_wave(WaveCoord::new(1.0, 1.25, 4000.0, None));
        assert!(matches!(
            same_rank(BinaryOp::Add, &a, &b),
            Err(DataError::IncompatibleCoordinates { axis: "spectral" })
        ));

        // a missing descriptor on one side is not a conflict
        let c = Spectrum::new(Array1::zeros(4));
        assert!(same_rank(BinaryOp::Add, &a, &c).is_ok());
    }

    #[test]
    fn test_masks_are_combined() {
        let a = Spectrum::new(arr1(&[1.0, 2.0, 3.0]))
            .with_mask(arr1(&[true, false, false]))
            .unwrap();
        let b = Spectrum::new(arr1(&[1.0, 0.0, 1.0]));
        let out = same_rank(BinaryOp::Div, &a, &b).unwrap();
        // division by zero produces a non-finite value, which is masked too
        assert_eq!(out.data().unwrap().mask(), &arr1(&[true, true, false]));
    }

    #[test]
    fn test_unit_conversion_of_second_operand() {
        let a = Spectrum::new(arr1(&[1.0, 1.0]))
            .with_var(arr1(&[1.0, 1.0]))
            .unwrap()
            .with_unit(Unit::parse("1e-20 erg/s/cm2/Angstrom").unwrap());
        let b = Spectrum::new(arr1(&[1.0, 2.0]))
            .with_var(arr1(&[1.0, 1.0]))
            .unwrap()
            .with_unit(Unit::parse("1e-19 erg/s/cm2/Angstrom").unwrap());
        let out = same_rank(BinaryOp::Add, &a, &b).unwrap();
        let values = out.data().unwrap().data().clone();
        assert!((values[0] - 11.0).abs() < 1e-9);
        assert!((values[1] - 21.0).abs() < 1e-9);
        assert!((out.var().unwrap().unwrap()[0] - 101.0).abs() < 1e-9);
        assert!(out.unit().unwrap().is_equivalent(a.unit().unwrap()));

        let ct = Spectrum::new(arr1(&[1.0, 1.0])).with_unit(Unit::parse("ct").unwrap());
        assert!(matches!(same_rank(BinaryOp::Sub, &a, &ct), Err(DataError::Unit(_))));
        let product = same_rank(BinaryOp::Mul, &a, &ct).unwrap();
        assert!(!product.unit().unwrap().is_equivalent(a.unit().unwrap()));
    }

    #[test]
    fn test_unit_of_quotient() {
        let (_, unit) = plan_units(BinaryOp::Div, None, Some(&Unit::parse("s").unwrap()), false).unwrap();
        assert!(unit.unwrap().is_equivalent(&Unit::parse("s^-1").unwrap()));
        let (_, unit) = plan_units(BinaryOp::Div, None, Some(&Unit::parse("s").unwrap()), true).unwrap();
        assert!(unit.unwrap().is_equivalent(&Unit::parse("s").unwrap()));
    }
}
