//! Arithmetic between spectra, images, cubes and plain numbers.
//!
//! Binary operations dispatch on the closed set of operand kinds:
//!
//! | Left | Right | Result | Alignment |
//! |---|---|---|---|
//! | same kind | same kind | same kind | element-wise, shapes must match |
//! | cube | spectrum | cube | spectrum along the wavelength axis |
//! | cube | image | cube | image along the two spatial axes |
//! | image | spectrum | error | unsupported |
//!
//! A lower-rank left operand is swapped to the right and the result is
//! computed in the written operand order, so `s - c == -(c - s)` exactly.
//!
//! Variance follows first-order propagation (untracked variance counts as
//! exact):
//!
//! | Operation | Variance |
//! |---|---|
//! | `a ± b` | `σa² + σb²` |
//! | `a × b` | `σb²·a² + σa²·b²` |
//! | `a / b` | `(σb²·a² + σa²·b²) / b⁴` |
//! | `a × k`, `a / k` | `σa²·k²`, `σa² / k²` |
//! | `k / a` | `k²·σa² / a⁴` |
//! | `√a` | `σa² / (4a)` |
//! | `aⁿ`, `|a|` | not propagated |

mod engine;
mod ops;

use ndarray::{Ix1, Ix2, Ix3};

use crate::data::{Cube, DataArray, Image, Rank, Spectrum};
use crate::error::{DataError, Result};

pub use engine::binary;

/// A binary arithmetic operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    /// Addition
    Add,
    /// Subtraction
    Sub,
    /// Multiplication
    Mul,
    /// Division
    Div,
}

impl BinaryOp {
    /// Apply to two values.
    pub fn apply(self, a: f64, b: f64) -> f64 {
        match self {
            BinaryOp::Add => a + b,
            BinaryOp::Sub => a - b,
            BinaryOp::Mul => a * b,
            BinaryOp::Div => a / b,
        }
    }

    /// Variance of `a ∘ b` from the operand variances. An untracked variance
    /// is passed as zero.
    pub fn variance(self, a: f64, b: f64, var_a: f64, var_b: f64) -> f64 {
        match self {
            BinaryOp::Add | BinaryOp::Sub => var_a + var_b,
            BinaryOp::Mul => var_b * a * a + var_a * b * b,
            BinaryOp::Div => (var_b * a * a + var_a * b * b) / (b * b * b * b),
        }
    }

    /// True for addition and subtraction.
    pub fn is_additive(self) -> bool {
        matches!(self, BinaryOp::Add | BinaryOp::Sub)
    }

    fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
        }
    }
}

/// Borrowed operand of any kind.
#[derive(Debug, Clone, Copy)]
pub enum ArrayRef<'a> {
    /// Rank 1
    Spectrum(&'a Spectrum),
    /// Rank 2
    Image(&'a Image),
    /// Rank 3
    Cube(&'a Cube),
}

/// Owned array of any kind, as returned by [`binary`].
#[derive(Debug, Clone)]
pub enum AnyArray {
    /// Rank 1
    Spectrum(Spectrum),
    /// Rank 2
    Image(Image),
    /// Rank 3
    Cube(Cube),
}

impl ArrayRef<'_> {
    /// Kind of the operand.
    pub fn kind(&self) -> &'static str {
        match self {
            ArrayRef::Spectrum(_) => Ix1::KIND,
            ArrayRef::Image(_) => Ix2::KIND,
            ArrayRef::Cube(_) => Ix3::KIND,
        }
    }
}

impl AnyArray {
    /// Borrow as an operand.
    pub fn as_array_ref(&self) -> ArrayRef<'_> {
        match self {
            AnyArray::Spectrum(a) => ArrayRef::Spectrum(a),
            AnyArray::Image(a) => ArrayRef::Image(a),
            AnyArray::Cube(a) => ArrayRef::Cube(a),
        }
    }

    /// Kind of the array.
    pub fn kind(&self) -> &'static str {
        self.as_array_ref().kind()
    }

    /// Shape of the array.
    pub fn shape(&self) -> &[usize] {
        match self {
            AnyArray::Spectrum(a) => a.shape(),
            AnyArray::Image(a) => a.shape(),
            AnyArray::Cube(a) => a.shape(),
        }
    }

    /// The spectrum, if this is one.
    pub fn into_spectrum(self) -> Option<Spectrum> {
        match self {
            AnyArray::Spectrum(a) => Some(a),
            _ => None,
        }
    }

    /// The image, if this is one.
    pub fn into_image(self) -> Option<Image> {
        match self {
            AnyArray::Image(a) => Some(a),
            _ => None,
        }
    }

    /// The cube, if this is one.
    pub fn into_cube(self) -> Option<Cube> {
        match self {
            AnyArray::Cube(a) => Some(a),
            _ => None,
        }
    }
}

/// Ranks that map onto one variant of [`ArrayRef`] and [`AnyArray`].
pub trait ArrayKind: Rank {
    /// Borrow an array as an operand.
    fn as_array_ref(array: &DataArray<Self>) -> ArrayRef<'_>;

    /// Recover an array of this rank.
    fn from_any(array: AnyArray) -> Result<DataArray<Self>>;
}

macro_rules! array_kind {
    ($dim:ty, $variant:ident) => {
        impl ArrayKind for $dim {
            fn as_array_ref(array: &DataArray<Self>) -> ArrayRef<'_> {
                ArrayRef::$variant(array)
            }

            fn from_any(array: AnyArray) -> Result<DataArray<Self>> {
                match array {
                    AnyArray::$variant(a) => Ok(a),
                    other => Err(DataError::UnsupportedCombination {
                        left: <$dim as Rank>::KIND,
                        right: other.kind(),
                    }),
                }
            }
        }

        impl<'a> From<&'a DataArray<$dim>> for ArrayRef<'a> {
            fn from(array: &'a DataArray<$dim>) -> Self {
                ArrayRef::$variant(array)
            }
        }

        impl From<DataArray<$dim>> for AnyArray {
            fn from(array: DataArray<$dim>) -> Self {
                AnyArray::$variant(array)
            }
        }
    };
}

array_kind!(Ix1, Spectrum);
array_kind!(Ix2, Image);
array_kind!(Ix3, Cube);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_variance_rules() {
        assert_eq!(BinaryOp::Add.variance(1.0, 2.0, 0.5, 0.25), 0.75);
        assert_eq!(BinaryOp::Sub.variance(1.0, 2.0, 0.5, 0.0), 0.5);
        // 0.25 * 9 + 0.5 * 4
        assert_eq!(BinaryOp::Mul.variance(3.0, 2.0, 0.5, 0.25), 4.25);
        assert_eq!(BinaryOp::Div.variance(3.0, 2.0, 0.5, 0.25), 4.25 / 16.0);
    }

    #[test]
    fn test_any_array_accessors() {
        let any = AnyArray::from(Spectrum::new(ndarray::arr1(&[1.0, 2.0])));
        assert_eq!(any.kind(), "spectrum");
        assert_eq!(any.shape(), &[2]);
        assert!(Ix2::from_any(any.clone()).is_err());
        assert!(any.into_spectrum().is_some());
    }
}
