//! Operator overloads, scalar operations and unary functions.
//!
//! Operators work on references and return `Result`, since combining arrays
//! can fail and may read lazily loaded values:
//!
//! ```rust,ignore
//! let diff = (&cube - &spectrum)?;
//! let scaled = (&diff * 2.0)?;
//! ```

use std::ops::{Add, Div, Mul, Neg, Sub};

use ndarray::Zip;

use crate::arithmetic::engine::{cube_image, cube_spectrum, same_rank};
use crate::arithmetic::{ArrayKind, BinaryOp, binary};
use crate::data::{Cube, DataArray, Image, MaskedArray, Rank, Spectrum};
use crate::error::Result;
use crate::units::Unit;

impl<D: Rank> DataArray<D> {
    /// Combine with a plain number. With `reversed` the number is the left
    /// operand (`k - a`, `k / a`).
    pub fn combine_scalar(&self, op: BinaryOp, k: f64, reversed: bool) -> Result<Self> {
        let data = self.data()?;
        let values = data.data().mapv(|a| if reversed { op.apply(k, a) } else { op.apply(a, k) });
        let var = match self.var()? {
            None => None,
            Some(var) => Some(match (op, reversed) {
                (BinaryOp::Add | BinaryOp::Sub, _) => var.clone(),
                (BinaryOp::Mul, _) => var.mapv(|v| v * k * k),
                (BinaryOp::Div, false) => var.mapv(|v| v / (k * k)),
                (BinaryOp::Div, true) => Zip::from(var)
                    .and(data.data())
                    .map_collect(|&v, &a| k * k * v / (a * a * a * a)),
            }),
        };
        let mut out = self.derive(
            MaskedArray::new(values, data.mask().clone())?,
            var,
            self.wcs().cloned(),
            self.wave().cloned(),
        )?;
        if op == BinaryOp::Div && reversed {
            out.set_unit(self.unit().map(|u| Unit::dimensionless().divide(u)));
        }
        Ok(out)
    }

    /// Combine with another array in place.
    ///
    /// The result must have the rank of `self`, so a spectrum or image can
    /// not absorb a cube.
    pub fn combine_in_place<E: ArrayKind>(&mut self, op: BinaryOp, other: &DataArray<E>) -> Result<()>
    where
        D: ArrayKind,
    {
        let result = binary(op, D::as_array_ref(self), E::as_array_ref(other))?;
        let result = D::from_any(result)?;
        self.replace_values(result)
    }

    /// Combine with a plain number in place.
    pub fn combine_scalar_in_place(&mut self, op: BinaryOp, k: f64) -> Result<()> {
        let result = self.combine_scalar(op, k, false)?;
        self.replace_values(result)
    }

    fn replace_values(&mut self, result: DataArray<D>) -> Result<()> {
        let var = result.var()?.cloned();
        let unit = result.unit().cloned();
        self.set_data(result.data()?.clone());
        self.set_var(var)?;
        self.set_unit(unit);
        Ok(())
    }

    fn map_values(&self, f: impl Fn(f64) -> f64, var: Option<ndarray::Array<f64, D>>, unit: Option<Unit>) -> Result<Self> {
        let data = self.data()?;
        let mut out = self.derive(
            MaskedArray::new(data.data().mapv(f), data.mask().clone())?,
            var,
            self.wcs().cloned(),
            self.wave().cloned(),
        )?;
        out.set_unit(unit);
        Ok(out)
    }

    /// Square root. Negative values become masked.
    ///
    /// Variance is `σ² / (4a)`, which keeps `σ / value` at half its input
    /// ratio.
    pub fn sqrt(&self) -> Result<Self> {
        let var = match self.var()? {
            Some(var) => Some(
                Zip::from(var)
                    .and(self.data()?.data())
                    .map_collect(|&v, &a| v / (4.0 * a)),
            ),
            None => None,
        };
        self.map_values(f64::sqrt, var, self.unit().map(Unit::sqrt))
    }

    /// Absolute value. Variance is not propagated.
    pub fn abs(&self) -> Result<Self> {
        self.map_values(f64::abs, None, self.unit().cloned())
    }

    /// Raise to a power. Variance is not propagated.
    pub fn pow(&self, exponent: f64) -> Result<Self> {
        self.map_values(
            |a| a.powf(exponent),
            None,
            self.unit().map(|u| u.powf(exponent)),
        )
    }
}

impl<D: Rank> Neg for &DataArray<D> {
    type Output = Result<DataArray<D>>;

    fn neg(self) -> Self::Output {
        self.combine_scalar(BinaryOp::Mul, -1.0, false)
    }
}

macro_rules! binary_ops {
    ($($trait:ident $method:ident $op:expr;)*) => {$(
        impl<D: Rank> $trait<&DataArray<D>> for &DataArray<D> {
            type Output = Result<DataArray<D>>;

            fn $method(self, rhs: &DataArray<D>) -> Self::Output {
                same_rank($op, self, rhs)
            }
        }

        impl $trait<&Spectrum> for &Cube {
            type Output = Result<Cube>;

            fn $method(self, rhs: &Spectrum) -> Self::Output {
                cube_spectrum($op, self, rhs, false)
            }
        }

        impl $trait<&Cube> for &Spectrum {
            type Output = Result<Cube>;

            fn $method(self, rhs: &Cube) -> Self::Output {
                cube_spectrum($op, rhs, self, true)
            }
        }

        impl $trait<&Image> for &Cube {
            type Output = Result<Cube>;

            fn $method(self, rhs: &Image) -> Self::Output {
                cube_image($op, self, rhs, false)
            }
        }

        impl $trait<&Cube> for &Image {
            type Output = Result<Cube>;

            fn $method(self, rhs: &Cube) -> Self::Output {
                cube_image($op, rhs, self, true)
            }
        }

        impl<D: Rank> $trait<f64> for &DataArray<D> {
            type Output = Result<DataArray<D>>;

            fn $method(self, rhs: f64) -> Self::Output {
                self.combine_scalar($op, rhs, false)
            }
        }

        impl<D: Rank> $trait<&DataArray<D>> for f64 {
            type Output = Result<DataArray<D>>;

            fn $method(self, rhs: &DataArray<D>) -> Self::Output {
                rhs.combine_scalar($op, self, true)
            }
        }
    )*};
}

binary_ops! {
    Add add BinaryOp::Add;
    Sub sub BinaryOp::Sub;
    Mul mul BinaryOp::Mul;
    Div div BinaryOp::Div;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coords::WaveCoord;
    use ndarray::{Array1, Array3, arr1};

    fn noisy(values: &[f64], var: &[f64]) -> Spectrum {
        Spectrum::new(arr1(values)).with_var(arr1(var)).unwrap()
    }

    #[test]
    fn test_scalar_variance_scaling() {
        let a = noisy(&[1.0, 2.0, 4.0], &[0.5, 1.0, 2.0]);
        let times = (&a * 3.0).unwrap();
        assert_eq!(times.var().unwrap().unwrap(), &arr1(&[4.5, 9.0, 18.0]));
        let over = (&a / 2.0).unwrap();
        assert_eq!(over.var().unwrap().unwrap(), &arr1(&[0.125, 0.25, 0.5]));
        let plus = (&a + 10.0).unwrap();
        assert_eq!(plus.var().unwrap().unwrap(), a.var().unwrap().unwrap());
        assert_eq!(plus.data().unwrap().data(), &arr1(&[11.0, 12.0, 14.0]));

        let bare = Spectrum::new(arr1(&[1.0, 2.0]));
        assert!((&bare * 3.0).unwrap().var().unwrap().is_none());
        assert!((&bare / 3.0).unwrap().var().unwrap().is_none());
    }

    #[test]
    fn test_reversed_scalar_operations() {
        let a = noisy(&[1.0, 2.0], &[1.0, 1.0]);
        let minus = (5.0 - &a).unwrap();
        assert_eq!(minus.data().unwrap().data(), &arr1(&[4.0, 3.0]));
        let inverse = (2.0 / &a).unwrap();
        assert_eq!(inverse.data().unwrap().data(), &arr1(&[2.0, 1.0]));
        // k² σ² / a⁴
        assert_eq!(inverse.var().unwrap().unwrap(), &arr1(&[4.0, 0.25]));
    }

    #[test]
    fn test_antisymmetry() {
        let a = noisy(&[1.0, 2.0, 3.0], &[0.1, 0.2, 0.3]);
        let b = noisy(&[4.0, 8.0, 0.5], &[1.0, 2.0, 3.0]);
        let ab = (&a - &b).unwrap();
        let ba = (&b - &a).unwrap();
        let neg = (-&ba).unwrap();
        assert_eq!(ab.data().unwrap().data(), neg.data().unwrap().data());
        assert_eq!(ab.var().unwrap(), neg.var().unwrap());

        let q = (&a / &b).unwrap();
        let r = (1.0 / &(&b / &a).unwrap()).unwrap();
        for (x, y) in q.data().unwrap().data().iter().zip(r.data().unwrap().data()) {
            assert!((x - y).abs() < 1e-12);
        }
    }

    #[test]
    fn test_product_variance_with_one_side_unknown() {
        let a = noisy(&[2.0, 3.0], &[1.0, 2.0]);
        let b = Spectrum::new(arr1(&[5.0, 7.0]));
        let out = (&a * &b).unwrap();
        assert_eq!(out.var().unwrap().unwrap(), &arr1(&[25.0, 98.0]));
        let out = (&b * &b).unwrap();
        assert!(out.var().unwrap().is_none());
    }

    #[test]
    fn test_unary_functions() {
        let a = noisy(&[4.0, -1.0], &[0.8, 1.0]);
        let root = a.sqrt().unwrap();
        assert_eq!(root.element(&[0]).unwrap().value, 2.0);
        assert_eq!(root.element(&[0]).unwrap().var, Some(0.05));
        assert!(root.element(&[1]).unwrap().masked);
        // relative uncertainty halves
        let rel_in = 0.8f64.sqrt() / 4.0;
        let rel_out = 0.05f64.sqrt() / 2.0;
        assert!((rel_out - rel_in / 2.0).abs() < 1e-12);

        assert!(a.abs().unwrap().var().unwrap().is_none());
        let squared = a.pow(2.0).unwrap();
        assert_eq!(squared.data().unwrap().data(), &arr1(&[16.0, 1.0]));
        assert!(squared.var().unwrap().is_none());
    }

    #[test]
    fn test_cross_rank_operators() {
        let cube = Cube::new(Array3::ones((3, 2, 2))).with_wave(WaveCoord::new(1.0, 1.0, 1.0, None));
        let sp = Spectrum::new(Array1::from_vec(vec![1.0, 2.0, 3.0]));
        let sum = (&cube + &sp).unwrap();
        assert_eq!(sum.element(&[2, 1, 1]).unwrap().value, 4.0);
        let swapped = (&sp - &cube).unwrap();
        assert_eq!(swapped.element(&[2, 0, 1]).unwrap().value, 2.0);
        assert!(swapped.wave().is_some());
    }

    #[test]
    fn test_in_place_combination() {
        let mut cube = Cube::new(Array3::ones((3, 2, 2)));
        let sp = Spectrum::new(Array1::from_vec(vec![1.0, 2.0, 3.0]));
        cube.combine_in_place(BinaryOp::Mul, &sp).unwrap();
        assert_eq!(cube.element(&[1, 0, 0]).unwrap().value, 2.0);
        cube.combine_scalar_in_place(BinaryOp::Add, 1.0).unwrap();
        assert_eq!(cube.element(&[2, 1, 1]).unwrap().value, 4.0);

        let mut small = sp.copy().unwrap();
        assert!(small.combine_in_place(BinaryOp::Add, &cube).is_err());
        assert_eq!(small.data().unwrap().data(), sp.data().unwrap().data());
    }
}
