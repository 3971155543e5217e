//! Rebinning by integer factors.
//!
//! Every axis is partitioned into cells: full blocks of `factor` pixels and,
//! when the axis length is not a multiple of the factor, margin cells made of
//! the excess pixels. Output elements combine the unmasked pixels of the
//! product of one cell per axis:
//!
//! - mean: `Σ / F` over the unmasked pixels, where `F` is the product of the
//!   factors, so that `Σ(output) × F` equals `Σ(input)` (variance `Σvar / F²`).
//!   Masked pixels count as zero, for full blocks and margin cells alike.
//! - median: median of the unmasked pixels of a full block (no variance)
//!
//! An output element is masked only when every contributing pixel is masked.

use std::ops::Range;

use ndarray::{ArrayD, ArrayViewD, Axis, IxDyn, Slice};
use serde::{Deserialize, Serialize};

use crate::config::ProcessingConfig;
use crate::coords::{WaveCoord, Wcs};
use crate::data::array::{DataArray, Rank};
use crate::data::masked::{MaskedArray, Reduction, reduce};
use crate::error::{DataError, Result};

/// Where the excess pixels of a non-multiple axis go.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Margin {
    /// Split between both ends (the extra pixel goes to the end)
    #[default]
    Center,
    /// All at the end of the axis
    Origin,
}

/// Rebinning policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RebinOptions {
    /// Placement of excess pixels
    pub margin: Margin,
    /// Keep excess pixels as flux-conserving margin cells instead of
    /// dropping them
    pub flux: bool,
    /// Mean or median combination of blocks
    pub reduction: Reduction,
}

impl Default for RebinOptions {
    fn default() -> Self {
        Self {
            margin: Margin::Center,
            flux: false,
            reduction: Reduction::Mean,
        }
    }
}

impl RebinOptions {
    /// Mean rebinning with the margin policy of a configuration.
    pub fn from_config(config: &ProcessingConfig) -> Self {
        Self {
            margin: config.rebin_margin,
            flux: config.rebin_flux,
            reduction: Reduction::Mean,
        }
    }

    /// Median combination (margins are always dropped).
    pub fn median() -> Self {
        Self {
            reduction: Reduction::Median,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
struct Cell {
    range: Range<usize>,
    margin: bool,
}

#[derive(Debug, Clone, PartialEq)]
struct AxisPlan {
    factor: usize,
    cells: Vec<Cell>,
    /// Pixels covered by full blocks
    blocks: Range<usize>,
    leading_margin: bool,
}

fn plan_axis(n: usize, factor: usize, margin: Margin, flux: bool) -> AxisPlan {
    let full = n / factor;
    let excess = n % factor;
    let left = match margin {
        Margin::Center => excess / 2,
        Margin::Origin => 0,
    };
    let blocks = left..left + full * factor;

    let mut cells = Vec::with_capacity(full + 2);
    let leading_margin = flux && left > 0;
    if leading_margin {
        cells.push(Cell {
            range: 0..left,
            margin: true,
        });
    }
    for b in 0..full {
        let start = left + b * factor;
        cells.push(Cell {
            range: start..start + factor,
            margin: false,
        });
    }
    if flux && blocks.end < n {
        cells.push(Cell {
            range: blocks.end..n,
            margin: true,
        });
    }
    AxisPlan {
        factor,
        cells,
        blocks,
        leading_margin,
    }
}

fn cell_view<'a, A>(view: &ArrayViewD<'a, A>, ranges: &[Range<usize>]) -> ArrayViewD<'a, A> {
    let mut v = view.clone();
    for (axis, r) in ranges.iter().enumerate() {
        v.slice_axis_inplace(Axis(axis), Slice::from(r.clone()));
    }
    v
}

impl<D: Rank> DataArray<D> {
    /// Combine blocks of `factor[i]` pixels along every axis `i`.
    ///
    /// Factors larger than an axis are reduced to its length. Coordinates are
    /// rebinned so that each output pixel sits at the centre of its block.
    pub fn rebin(&self, factor: &[usize], options: &RebinOptions) -> Result<Self> {
        let shape = self.shape().to_vec();
        if factor.len() != shape.len() {
            return Err(DataError::invalid_argument(format!(
                "{} factors given for a {}-dimensional {}",
                factor.len(),
                shape.len(),
                D::KIND
            )));
        }
        if factor.contains(&0) {
            return Err(DataError::invalid_argument("rebin factors must be positive"));
        }
        let flux = options.flux && options.reduction != Reduction::Median;
        if options.flux && !flux {
            log::debug!("median rebinning drops margin pixels");
        }

        let plans: Vec<AxisPlan> = shape
            .iter()
            .zip(factor)
            .map(|(&n, &f)| plan_axis(n, f.min(n).max(1), options.margin, flux))
            .collect();
        let out_shape: Vec<usize> = plans.iter().map(|p| p.cells.len()).collect();
        if out_shape.contains(&0) {
            return Err(DataError::empty_selection(format!(
                "rebinning {:?} by {:?}",
                shape, factor
            )));
        }
        let block_size: f64 = plans.iter().map(|p| p.factor as f64).product();

        let data = self.data()?;
        let values = data.data().view().into_dyn();
        let mask = data.mask().view().into_dyn();
        let var = self.var()?.map(|v| v.view().into_dyn());
        let propagate_var = var.is_some() && options.reduction != Reduction::Median;

        let count: usize = out_shape.iter().product();
        let mut out_values = Vec::with_capacity(count);
        let mut out_mask = Vec::with_capacity(count);
        let mut out_var = Vec::with_capacity(if propagate_var { count } else { 0 });

        for index in ndarray::indices(IxDyn(&out_shape)) {
            let cells: Vec<&Cell> = plans
                .iter()
                .enumerate()
                .map(|(axis, p)| &p.cells[index[axis]])
                .collect();
            let ranges: Vec<Range<usize>> = cells.iter().map(|c| c.range.clone()).collect();
            let dv = cell_view(&values, &ranges);
            let mv = cell_view(&mask, &ranges);
            let vv = var.as_ref().map(|v| cell_view(v, &ranges));

            let element = if options.reduction == Reduction::Mean || cells.iter().any(|c| c.margin) {
                let mut e = reduce(dv, mv, vv, Reduction::Sum);
                e.value /= block_size;
                e.var = e.var.map(|s| s / (block_size * block_size));
                e
            } else {
                reduce(dv, mv, vv, options.reduction)
            };
            out_values.push(element.value);
            out_mask.push(element.masked);
            if propagate_var {
                out_var.push(element.var.unwrap_or(0.0));
            }
        }

        let out_values = ArrayD::from_shape_vec(IxDyn(&out_shape), out_values)?.into_dimensionality::<D>()?;
        let out_mask = ArrayD::from_shape_vec(IxDyn(&out_shape), out_mask)?.into_dimensionality::<D>()?;
        let out_var = if propagate_var {
            Some(ArrayD::from_shape_vec(IxDyn(&out_shape), out_var)?.into_dimensionality::<D>()?)
        } else {
            None
        };

        let wave = match (self.wave(), D::wave_axis()) {
            (Some(wave), Some(axis)) => Some(rebin_wave(wave, &plans[axis])),
            _ => None,
        };
        let wcs = match (self.wcs(), D::spatial_axes()) {
            (Some(wcs), Some((ay, ax))) => Some(rebin_wcs(wcs, &plans[ay], &plans[ax])),
            _ => None,
        };

        log::debug!(
            "Rebinned {} {:?} by {:?} to {:?}",
            D::KIND,
            shape,
            factor,
            out_shape
        );
        self.derive(MaskedArray::new(out_values, out_mask)?, out_var, wcs, wave)
    }

    /// Mean rebinning with the default policy (excess pixels trimmed
    /// symmetrically).
    pub fn rebin_mean(&self, factor: &[usize]) -> Result<Self> {
        self.rebin(factor, &RebinOptions::default())
    }

    /// Median rebinning. Variance is not propagated.
    pub fn rebin_median(&self, factor: &[usize]) -> Result<Self> {
        self.rebin(factor, &RebinOptions::median())
    }
}

fn rebin_wave(wave: &WaveCoord, plan: &AxisPlan) -> WaveCoord {
    let mut out = wave.slice(plan.blocks.clone()).rebin(plan.factor);
    if plan.leading_margin {
        out.crpix += 1.0;
    }
    out.shape = Some(plan.cells.len());
    out
}

fn rebin_wcs(wcs: &Wcs, py: &AxisPlan, px: &AxisPlan) -> Wcs {
    let mut out = wcs
        .slice(py.blocks.clone(), px.blocks.clone())
        .rebin([py.factor, px.factor]);
    if py.leading_margin {
        out.crpix[0] += 1.0;
    }
    if px.leading_margin {
        out.crpix[1] += 1.0;
    }
    out.naxis = [py.cells.len(), px.cells.len()];
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::array::{Cube, Image, Spectrum};
    use ndarray::{Array1, Array2, Array3, arr1};

    #[test]
    fn test_plan_exact_and_margins() {
        let exact = plan_axis(6, 2, Margin::Center, false);
        assert_eq!(exact.cells.len(), 3);
        assert_eq!(exact.blocks, 0..6);

        let trunc = plan_axis(7, 2, Margin::Center, false);
        assert_eq!(trunc.blocks, 0..6);
        assert_eq!(trunc.cells.len(), 3);

        let centred = plan_axis(8, 3, Margin::Center, true);
        assert_eq!(centred.blocks, 1..7);
        assert_eq!(
            centred.cells.iter().map(|c| c.range.clone()).collect::<Vec<_>>(),
            vec![0..1, 1..4, 4..7, 7..8]
        );
        assert!(centred.leading_margin);

        let origin = plan_axis(8, 3, Margin::Origin, true);
        assert_eq!(
            origin.cells.iter().map(|c| c.range.clone()).collect::<Vec<_>>(),
            vec![0..3, 3..6, 6..8]
        );
        assert!(!origin.leading_margin);
    }

    #[test]
    fn test_exact_mean_rebin_conserves_flux() {
        let data = Array3::from_shape_fn((4, 6, 4), |(k, j, i)| (k * 7 + j * 3 + i) as f64 * 0.5);
        let var = Array3::from_elem((4, 6, 4), 2.0);
        let cube = Cube::new(data.clone())
            .with_var(var)
            .unwrap()
            .with_wave(WaveCoord::new(1.0, 1.0, 1.0, None))
            .with_wcs(Wcs::default());
        let out = cube.rebin_mean(&[2, 3, 2]).unwrap();
        assert_eq!(out.shape(), &[2, 2, 2]);
        let total = out.data().unwrap().data().sum() * 12.0;
        assert!((total - data.sum()).abs() < 1e-9);
        // 12 inputs of variance 2 averaged
        let v = out.var().unwrap().unwrap();
        assert!(v.iter().all(|&x| (x - 24.0 / 144.0).abs() < 1e-12));
    }

    #[test]
    fn test_rebin_coordinates() {
        let cube = Cube::new(Array3::ones((10, 6, 5)))
            .with_wave(WaveCoord::new(1.0, 1.0, 1.0, None))
            .with_wcs(Wcs::linear([1.0, 1.0], [0.0, 0.0], [1.0, 1.0], [0, 0]));
        let out = cube.rebin_mean(&[2, 2, 2]).unwrap();
        assert_eq!(out.shape(), &[5, 3, 2]);
        assert_eq!(out.wave().unwrap().get_start(), 1.5);
        assert_eq!(out.wcs().unwrap().get_start(), (0.5, 0.5));
        assert_eq!(out.wcs().unwrap().naxis, [3, 2]);
    }

    #[test]
    fn test_flux_margin_origin() {
        let cube = Cube::new(Array3::ones((10, 6, 5)))
            .with_wave(WaveCoord::new(1.0, 1.0, 1.0, None))
            .with_wcs(Wcs::default());
        let options = RebinOptions {
            margin: Margin::Origin,
            flux: true,
            reduction: Reduction::Mean,
        };
        let out = cube.rebin(&[2, 2, 2], &options).unwrap();
        assert_eq!(out.shape(), &[5, 3, 3]);
        assert_eq!(out.element(&[4, 2, 2]).unwrap().value, 0.5);
        assert_eq!(out.element(&[0, 0, 0]).unwrap().value, 1.0);
        let total = out.data().unwrap().data().sum() * 8.0;
        assert!((total - 300.0).abs() < 1e-9);
    }

    #[test]
    fn test_flux_margin_center_shifts_reference() {
        let sp = Spectrum::new(Array1::from_elem(8, 3.0))
            .with_wave(WaveCoord::new(1.0, 1.0, 100.0, None));
        let options = RebinOptions {
            flux: true,
            ..RebinOptions::default()
        };
        let out = sp.rebin(&[3], &options).unwrap();
        assert_eq!(out.shape(), &[4]);
        assert_eq!(out.data().unwrap().data(), &arr1(&[1.0, 3.0, 3.0, 1.0]));
        let wave = out.wave().unwrap();
        // block 1 covers pixels 1..4, centred on 102
        assert!((wave.coord(1.0) - 102.0).abs() < 1e-12);
        assert_eq!(wave.shape, Some(4));
    }

    #[test]
    fn test_masked_blocks() {
        let data = arr1(&[1.0, 100.0, 3.0, 5.0, 7.0, 9.0]);
        let mut mask = Array1::from_elem(6, false);
        mask[1] = true;
        mask[4] = true;
        mask[5] = true;
        let sp = Spectrum::new(data).with_mask(mask).unwrap();
        let out = sp.rebin_mean(&[2]).unwrap();
        assert_eq!(out.data().unwrap().mask(), &arr1(&[false, false, true]));
        // masked samples count as zero within a block
        assert_eq!(out.element(&[0]).unwrap().value, 0.5);
        assert_eq!(out.element(&[1]).unwrap().value, 4.0);
    }

    #[test]
    fn test_partially_masked_block_divides_by_block_size() {
        let mut mask = Array1::from_elem(4, false);
        mask[1] = true;
        let sp = Spectrum::new(arr1(&[1.0, 2.0, 3.0, 4.0]))
            .with_mask(mask)
            .unwrap()
            .with_var(arr1(&[4.0, 4.0, 4.0, 4.0]))
            .unwrap();
        let out = sp.rebin_mean(&[2]).unwrap();
        assert_eq!(out.data().unwrap().data(), &arr1(&[0.5, 3.5]));
        assert_eq!(out.data().unwrap().mask(), &arr1(&[false, false]));
        assert_eq!(out.var().unwrap().unwrap(), &arr1(&[1.0, 2.0]));
    }

    #[test]
    fn test_median_drops_variance() {
        let ima = Image::new(Array2::from_shape_fn((4, 4), |(j, i)| (j * 4 + i) as f64))
            .with_var(Array2::ones((4, 4)))
            .unwrap();
        let out = ima.rebin_median(&[2, 2]).unwrap();
        assert!(out.var().unwrap().is_none());
        assert_eq!(out.element(&[0, 0]).unwrap().value, 2.5);
    }

    #[test]
    fn test_factor_validation() {
        let sp = Spectrum::new(Array1::ones(4));
        assert!(sp.rebin_mean(&[0]).is_err());
        assert!(sp.rebin_mean(&[2, 2]).is_err());
        assert_eq!(sp.rebin_mean(&[10]).unwrap().shape(), &[1]);
    }
}
