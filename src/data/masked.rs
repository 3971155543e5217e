//! Data values paired with a per-element mask.

use ndarray::{Array, ArrayView, ArrayViewMut, Dimension, Zip};

use crate::error::{DataError, Result};

/// Values plus a boolean mask of the same shape (`true` = excluded).
///
/// Masked elements keep their value: arithmetic still computes them, but
/// reductions skip them and the mask is carried into every result.
#[derive(Debug, Clone, PartialEq)]
pub struct MaskedArray<D: Dimension> {
    data: Array<f64, D>,
    mask: Array<bool, D>,
}

/// How a set of unmasked values is combined.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reduction {
    /// Sum of values
    Sum,
    /// Arithmetic mean
    Mean,
    /// Median (mean of the two central values for even counts)
    Median,
}

/// A single value with its mask bit and variance, as produced by a reduction
/// or an element selection.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Element {
    /// Combined value (0 when every element is masked)
    pub value: f64,
    /// True when every element of the group is masked
    pub masked: bool,
    /// Combined variance, when variance was supplied and the reduction propagates it
    pub var: Option<f64>,
}

impl<D: Dimension> MaskedArray<D> {
    /// Pair values with a mask, then mask every non-finite value.
    pub fn new(data: Array<f64, D>, mask: Array<bool, D>) -> Result<Self> {
        if data.shape() != mask.shape() {
            return Err(DataError::shape_mismatch("mask", data.shape(), mask.shape()));
        }
        let mut masked = Self { data, mask };
        masked.mask_invalid();
        Ok(masked)
    }

    /// Wrap values, masking only the non-finite ones.
    pub fn from_data(data: Array<f64, D>) -> Self {
        let mask = data.mapv(|v| !v.is_finite());
        Self { data, mask }
    }

    /// Values (masked elements included).
    pub fn data(&self) -> &Array<f64, D> {
        &self.data
    }

    /// Mutable values. Call [`MaskedArray::mask_invalid`] after writing
    /// non-finite values.
    pub fn data_mut(&mut self) -> ArrayViewMut<'_, f64, D> {
        self.data.view_mut()
    }

    /// Mask (`true` = excluded).
    pub fn mask(&self) -> &Array<bool, D> {
        &self.mask
    }

    /// Mutable mask.
    pub fn mask_mut(&mut self) -> ArrayViewMut<'_, bool, D> {
        self.mask.view_mut()
    }

    /// Both arrays mutably.
    pub fn parts_mut(&mut self) -> (ArrayViewMut<'_, f64, D>, ArrayViewMut<'_, bool, D>) {
        (self.data.view_mut(), self.mask.view_mut())
    }

    /// Split into values and mask.
    pub fn into_parts(self) -> (Array<f64, D>, Array<bool, D>) {
        (self.data, self.mask)
    }

    /// Extent of each axis.
    pub fn shape(&self) -> &[usize] {
        self.data.shape()
    }

    /// OR every non-finite value into the mask. Existing mask bits are kept.
    pub fn mask_invalid(&mut self) {
        Zip::from(&mut self.mask)
            .and(&self.data)
            .for_each(|m, &v| *m |= !v.is_finite());
    }

    /// OR another mask into this one.
    pub fn mask_or(&mut self, other: &Array<bool, D>) -> Result<()> {
        if other.shape() != self.mask.shape() {
            return Err(DataError::shape_mismatch("mask", self.mask.shape(), other.shape()));
        }
        Zip::from(&mut self.mask).and(other).for_each(|m, &o| *m |= o);
        Ok(())
    }

    /// Number of masked elements.
    pub fn count_masked(&self) -> usize {
        self.mask.iter().filter(|&&m| m).count()
    }

    /// Number of unmasked elements.
    pub fn count_unmasked(&self) -> usize {
        self.mask.len() - self.count_masked()
    }

    /// Unmasked values in row-major order.
    pub fn compressed(&self) -> Vec<f64> {
        self.data
            .iter()
            .zip(self.mask.iter())
            .filter(|&(_, &m)| !m)
            .map(|(&v, _)| v)
            .collect()
    }

    /// Values with masked elements replaced by `fill`.
    pub fn filled(&self, fill: f64) -> Array<f64, D> {
        let mut out = self.data.clone();
        Zip::from(&mut out)
            .and(&self.mask)
            .for_each(|v, &m| {
                if m {
                    *v = fill;
                }
            });
        out
    }

    /// Sum of unmasked values, `None` if everything is masked.
    pub fn sum(&self) -> Option<f64> {
        let r = reduce(self.data.view(), self.mask.view(), None, Reduction::Sum);
        (!r.masked).then_some(r.value)
    }

    /// Mean of unmasked values, `None` if everything is masked.
    pub fn mean(&self) -> Option<f64> {
        let r = reduce(self.data.view(), self.mask.view(), None, Reduction::Mean);
        (!r.masked).then_some(r.value)
    }

    /// Median of unmasked values, `None` if everything is masked.
    pub fn median(&self) -> Option<f64> {
        let r = reduce(self.data.view(), self.mask.view(), None, Reduction::Median);
        (!r.masked).then_some(r.value)
    }
}

/// Median of a list of values. Sorts in place.
pub(crate) fn median_of(values: &mut [f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(f64::total_cmp);
    let n = values.len();
    Some(if n % 2 == 1 {
        values[n / 2]
    } else {
        0.5 * (values[n / 2 - 1] + values[n / 2])
    })
}

/// Combine the unmasked elements of a group.
///
/// Variance follows the reduction: a sum adds the variances, a mean divides
/// that sum by `n²`, a median does not propagate it.
pub(crate) fn reduce<D: Dimension>(
    data: ArrayView<'_, f64, D>,
    mask: ArrayView<'_, bool, D>,
    var: Option<ArrayView<'_, f64, D>>,
    reduction: Reduction,
) -> Element {
    let mut values = Vec::with_capacity(data.len());
    let mut var_sum = 0.0;
    match &var {
        Some(var) => {
            Zip::from(&data).and(&mask).and(var).for_each(|&v, &m, &s| {
                if !m {
                    values.push(v);
                    var_sum += s;
                }
            });
        }
        None => {
            Zip::from(&data).and(&mask).for_each(|&v, &m| {
                if !m {
                    values.push(v);
                }
            });
        }
    }

    let n = values.len();
    if n == 0 {
        return Element {
            value: 0.0,
            masked: true,
            var: var.map(|_| 0.0).filter(|_| reduction != Reduction::Median),
        };
    }

    let nf = n as f64;
    let (value, var) = match reduction {
        Reduction::Sum => (values.iter().sum::<f64>(), var.map(|_| var_sum)),
        Reduction::Mean => (values.iter().sum::<f64>() / nf, var.map(|_| var_sum / (nf * nf))),
        Reduction::Median => (median_of(&mut values).unwrap_or(0.0), None),
    };
    Element {
        value,
        masked: false,
        var,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{arr1, arr2};

    #[test]
    fn test_invalid_values_are_masked() {
        let m = MaskedArray::new(arr1(&[1.0, f64::NAN, 3.0, f64::INFINITY]), arr1(&[true, false, false, false]))
            .unwrap();
        assert_eq!(m.mask(), &arr1(&[true, true, false, true]));
        assert_eq!(m.count_masked(), 3);
        assert_eq!(m.compressed(), vec![3.0]);
    }

    #[test]
    fn test_shape_mismatch() {
        let err = MaskedArray::new(arr1(&[1.0, 2.0]), arr1(&[false])).unwrap_err();
        assert!(matches!(err, DataError::ShapeMismatch { .. }));
    }

    #[test]
    fn test_reductions_skip_masked() {
        let m = MaskedArray::new(
            arr2(&[[1.0, 2.0], [3.0, 100.0]]),
            arr2(&[[false, false], [false, true]]),
        )
        .unwrap();
        assert_eq!(m.sum(), Some(6.0));
        assert_eq!(m.mean(), Some(2.0));
        assert_eq!(m.median(), Some(2.0));
        assert_eq!(m.filled(0.0), arr2(&[[1.0, 2.0], [3.0, 0.0]]));
    }

    #[test]
    fn test_fully_masked_reduction() {
        let m = MaskedArray::new(arr1(&[1.0, 2.0]), arr1(&[true, true])).unwrap();
        assert_eq!(m.sum(), None);
        assert_eq!(m.median(), None);
    }

    #[test]
    fn test_reduce_variance() {
        let data = arr1(&[1.0, 2.0, 3.0, 4.0]);
        let mask = arr1(&[false, false, true, false]);
        let var = arr1(&[1.0, 2.0, 50.0, 3.0]);
        let sum = reduce(data.view(), mask.view(), Some(var.view()), Reduction::Sum);
        assert_eq!(sum.value, 7.0);
        assert_eq!(sum.var, Some(6.0));
        let mean = reduce(data.view(), mask.view(), Some(var.view()), Reduction::Mean);
        assert!((mean.value - 7.0 / 3.0).abs() < 1e-12);
        assert!((mean.var.unwrap() - 6.0 / 9.0).abs() < 1e-12);
        let median = reduce(data.view(), mask.view(), Some(var.view()), Reduction::Median);
        assert_eq!(median.value, 2.0);
        assert_eq!(median.var, None);
    }

    #[test]
    fn test_median_even_count() {
        let mut values = vec![4.0, 1.0, 3.0, 2.0];
        assert_eq!(median_of(&mut values), Some(2.5));
        assert_eq!(median_of(&mut []), None);
    }
}
