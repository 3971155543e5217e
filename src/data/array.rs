//! The shared array representation behind spectra, images and cubes.
//!
//! A [`DataArray`] holds masked values, an optional variance array, a data
//! unit and the coordinate descriptors that apply to its rank. Values and
//! variance are either owned from construction or materialised on first
//! access from an [`ArraySource`]; in both cases the instance owns its arrays
//! and every shape-changing operation returns a new instance.

use std::collections::BTreeMap;
use std::fmt;
use std::ops::Range;
use std::sync::Arc;

use ndarray::{Array, ArrayD, ArrayViewMut, Axis, Dimension, Ix1, Ix2, Ix3, Slice, Zip};

use crate::config::ProcessingConfig;
use crate::coords::{DEFAULT_TOLERANCE, WaveCoord, Wcs};
use crate::data::masked::{Element, MaskedArray, Reduction, reduce};
use crate::data::store::{
    ArraySink, ArraySource, DQ_LAYER, MaskPolicy, PRIMARY, STAT_LAYER, default_data_layer,
};
use crate::data::Header;
use crate::error::{DataError, Result};
use crate::logging::{Diagnostics, default_diagnostics};
use crate::units::Unit;

/// Role of an array axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AxisRole {
    /// Spectral axis, described by a [`WaveCoord`]
    Wave,
    /// Spatial y axis, described by a [`Wcs`]
    WcsY,
    /// Spatial x axis, described by a [`Wcs`]
    WcsX,
}

/// Dimensions that correspond to a spectrum, an image or a cube.
pub trait Rank: Dimension {
    /// Human readable kind ("spectrum", "image", "cube")
    const KIND: &'static str;
    /// Role of each axis, in array order
    const ROLES: &'static [AxisRole];

    /// Index of the spectral axis.
    fn wave_axis() -> Option<usize> {
        Self::ROLES.iter().position(|r| *r == AxisRole::Wave)
    }

    /// Indices of the spatial (y, x) axes.
    fn spatial_axes() -> Option<(usize, usize)> {
        let y = Self::ROLES.iter().position(|r| *r == AxisRole::WcsY)?;
        let x = Self::ROLES.iter().position(|r| *r == AxisRole::WcsX)?;
        Some((y, x))
    }
}

impl Rank for Ix1 {
    const KIND: &'static str = "spectrum";
    const ROLES: &'static [AxisRole] = &[AxisRole::Wave];
}

impl Rank for Ix2 {
    const KIND: &'static str = "image";
    const ROLES: &'static [AxisRole] = &[AxisRole::WcsY, AxisRole::WcsX];
}

impl Rank for Ix3 {
    const KIND: &'static str = "cube";
    const ROLES: &'static [AxisRole] = &[AxisRole::Wave, AxisRole::WcsY, AxisRole::WcsX];
}

/// One-dimensional array along wavelength.
pub type Spectrum = DataArray<Ix1>;
/// Two-dimensional spatial array.
pub type Image = DataArray<Ix2>;
/// Three-dimensional array (wavelength, y, x).
pub type Cube = DataArray<Ix3>;

/// Where a lazily materialised array comes from.
#[derive(Debug, Clone)]
struct Backing {
    source: Arc<dyn ArraySource>,
    data_layer: String,
    var_layer: Option<String>,
    mask_layer: Option<String>,
}

/// Options for [`DataArray::open`].
#[derive(Debug, Clone)]
pub struct OpenOptions {
    /// Value layer (default: `DATA`, then `SCI`, then the only layer)
    pub data_layer: Option<String>,
    /// Variance layer (default: `STAT` when present)
    pub var_layer: Option<String>,
    /// Mask layer (default: `DQ` when present)
    pub mask_layer: Option<String>,
    /// Attach the other rank-2 layers of a cube store as associated images
    pub load_images: bool,
    /// Tolerance for coordinate comparisons
    pub tolerance: f64,
    /// Sink for warn-and-repair notices
    pub diagnostics: Arc<dyn Diagnostics>,
}

impl Default for OpenOptions {
    fn default() -> Self {
        Self {
            data_layer: None,
            var_layer: None,
            mask_layer: None,
            load_images: true,
            tolerance: DEFAULT_TOLERANCE,
            diagnostics: default_diagnostics(),
        }
    }
}

impl OpenOptions {
    /// Options carrying the tolerance of a processing configuration.
    pub fn from_config(config: &ProcessingConfig) -> Self {
        Self {
            tolerance: config.coordinate_tolerance,
            ..Self::default()
        }
    }
}

/// Element-wise comparison used by [`DataArray::mask_where`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    /// value < threshold
    Less,
    /// value <= threshold
    LessEqual,
    /// value > threshold
    Greater,
    /// value >= threshold
    GreaterEqual,
}

impl Comparison {
    fn test(self, value: f64, threshold: f64) -> bool {
        match self {
            Comparison::Less => value < threshold,
            Comparison::LessEqual => value <= threshold,
            Comparison::Greater => value > threshold,
            Comparison::GreaterEqual => value >= threshold,
        }
    }
}

/// Per-axis selector for [`DataArray::select`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Sel {
    /// A single index; the axis is removed from the result
    At(usize),
    /// A half-open index range; the axis is kept
    Span(Range<usize>),
    /// The whole axis
    All,
}

/// Result of a multi-axis selection.
#[derive(Debug, Clone)]
pub enum Selection {
    /// Every axis was indexed by an integer
    Element(Element),
    /// Only the spectral axis remains
    Spectrum(Spectrum),
    /// Only the spatial axes remain
    Image(Image),
    /// All three axes remain
    Cube(Cube),
}

impl Selection {
    /// Kind of the selected value ("element", "spectrum", "image", "cube").
    pub fn kind(&self) -> &'static str {
        match self {
            Selection::Element(_) => "element",
            Selection::Spectrum(_) => Ix1::KIND,
            Selection::Image(_) => Ix2::KIND,
            Selection::Cube(_) => Ix3::KIND,
        }
    }
}

/// Masked values, variance, unit and coordinates of a spectrum, image or cube.
#[derive(Debug, Clone)]
pub struct DataArray<D: Rank> {
    data: crate::data::Loaded<MaskedArray<D>>,
    var: crate::data::Loaded<Option<Array<f64, D>>>,
    backing: Option<Backing>,
    shape: Vec<usize>,
    unit: Option<Unit>,
    wcs: Option<Wcs>,
    wave: Option<WaveCoord>,
    header: Header,
    primary_header: Header,
    ima: BTreeMap<String, Image>,
    diag: Arc<dyn Diagnostics>,
    tolerance: f64,
}

/// Slice every axis by `ranges` and drop the axes flagged in `collapse`.
pub(crate) fn cut<A: Clone, D: Dimension>(
    array: &Array<A, D>,
    ranges: &[Range<usize>],
    collapse: &[bool],
) -> ArrayD<A> {
    let mut view = array.view().into_dyn();
    for (axis, range) in ranges.iter().enumerate() {
        view.slice_axis_inplace(Axis(axis), Slice::from(range.clone()));
    }
    for axis in (0..ranges.len()).rev() {
        if collapse.get(axis).copied().unwrap_or(false) {
            view = view.index_axis_move(Axis(axis), 0);
        }
    }
    view.to_owned()
}

fn load_data<D: Rank>(backing: Option<&Backing>) -> Result<MaskedArray<D>> {
    let backing = backing.ok_or_else(|| DataError::store("array has neither data nor backing store"))?;
    let raw = backing.source.read_array(&backing.data_layer)?;
    let found = raw.ndim();
    let data = raw
        .into_dimensionality::<D>()
        .map_err(|_| DataError::WrongRank {
            layer: backing.data_layer.clone(),
            expected: D::ROLES.len(),
            found,
        })?;
    let mask = match &backing.mask_layer {
        Some(layer) => {
            let mask = backing.source.read_mask(layer)?;
            if mask.shape() != data.shape() {
                return Err(DataError::shape_mismatch(
                    format!("mask layer '{}'", layer),
                    data.shape(),
                    mask.shape(),
                ));
            }
            mask.into_dimensionality::<D>()?
        }
        None => Array::from_elem(data.raw_dim(), false),
    };
    log::debug!(
        "Materialised {} from {} layer {}",
        D::KIND,
        backing.source.describe(),
        backing.data_layer
    );
    MaskedArray::new(data, mask)
}

fn load_var<D: Rank>(backing: Option<&Backing>, shape: &[usize]) -> Result<Option<Array<f64, D>>> {
    let Some(backing) = backing else {
        return Ok(None);
    };
    let Some(layer) = &backing.var_layer else {
        return Ok(None);
    };
    let raw = backing.source.read_array(layer)?;
    if raw.shape() != shape {
        return Err(DataError::shape_mismatch(
            format!("variance layer '{}'", layer),
            shape,
            raw.shape(),
        ));
    }
    Ok(Some(raw.into_dimensionality::<D>()?))
}

impl<D: Rank> DataArray<D> {
    /// Wrap values; non-finite values are masked.
    pub fn new(data: Array<f64, D>) -> Self {
        Self::from_masked(MaskedArray::from_data(data))
    }

    /// Wrap already masked values.
    pub fn from_masked(data: MaskedArray<D>) -> Self {
        Self {
            shape: data.shape().to_vec(),
            data: crate::data::Loaded::ready(data),
            var: crate::data::Loaded::ready(None),
            backing: None,
            unit: None,
            wcs: None,
            wave: None,
            header: Header::new(),
            primary_header: Header::new(),
            ima: BTreeMap::new(),
            diag: default_diagnostics(),
            tolerance: DEFAULT_TOLERANCE,
        }
    }

    /// Attach a variance array (builder style).
    pub fn with_var(mut self, var: Array<f64, D>) -> Result<Self> {
        self.set_var(Some(var))?;
        Ok(self)
    }

    /// OR a mask into the current one (builder style).
    pub fn with_mask(mut self, mask: Array<bool, D>) -> Result<Self> {
        self.masked_mut()?.mask_or(&mask)?;
        Ok(self)
    }

    /// Set the data unit (builder style).
    pub fn with_unit(mut self, unit: Unit) -> Self {
        self.unit = Some(unit);
        self
    }

    /// Route warn-and-repair notices to `diag` (builder style).
    pub fn with_diagnostics(mut self, diag: Arc<dyn Diagnostics>) -> Self {
        self.diag = diag;
        self
    }

    /// Tolerance used when comparing coordinates (builder style).
    pub fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = tolerance;
        self
    }

    /// Open an array backed by a store. Values and variance are read on first
    /// access; headers, unit and coordinates are read immediately.
    pub fn open(source: Arc<dyn ArraySource>, options: &OpenOptions) -> Result<Self> {
        let data_layer = match &options.data_layer {
            Some(layer) => layer.clone(),
            None => default_data_layer(source.as_ref()).ok_or_else(|| {
                DataError::store(format!("no data layer found in {}", source.describe()))
            })?,
        };
        let shape = source.shape(&data_layer)?;
        if shape.len() != D::ROLES.len() {
            return Err(DataError::WrongRank {
                layer: data_layer,
                expected: D::ROLES.len(),
                found: shape.len(),
            });
        }

        let header = source.header(&data_layer)?;
        let primary_header = source.header(PRIMARY).unwrap_or_default();
        let var_layer = options
            .var_layer
            .clone()
            .or_else(|| source.has_layer(STAT_LAYER).then(|| STAT_LAYER.to_string()));
        let mask_layer = options
            .mask_layer
            .clone()
            .or_else(|| source.has_layer(DQ_LAYER).then(|| DQ_LAYER.to_string()));

        let unit = header.get_str("BUNIT").and_then(|s| match Unit::parse(s) {
            Ok(u) => Some(u),
            Err(e) => {
                options.diagnostics.warn(&format!("Ignoring BUNIT: {}", e));
                None
            }
        });

        let mut ima = BTreeMap::new();
        if options.load_images && D::ROLES.len() == 3 {
            for layer in source.layers() {
                let reserved = layer == data_layer
                    || Some(&layer) == var_layer.as_ref()
                    || Some(&layer) == mask_layer.as_ref();
                if reserved || source.shape(&layer).map(|s| s.len()).unwrap_or(0) != 2 {
                    continue;
                }
                let image_options = OpenOptions {
                    data_layer: Some(layer.clone()),
                    var_layer: None,
                    mask_layer: None,
                    load_images: false,
                    ..options.clone()
                };
                ima.insert(layer.clone(), Image::open(source.clone(), &image_options)?);
            }
        }

        let mut array = Self {
            data: crate::data::Loaded::pending(),
            var: crate::data::Loaded::pending(),
            backing: Some(Backing {
                source: source.clone(),
                data_layer,
                var_layer,
                mask_layer,
            }),
            shape,
            unit,
            wcs: None,
            wave: None,
            header,
            primary_header,
            ima,
            diag: options.diagnostics.clone(),
            tolerance: options.tolerance,
        };
        let wcs = D::spatial_axes().and_then(|_| Wcs::from_header(&array.header));
        let wave = D::wave_axis()
            .and_then(|axis| WaveCoord::from_header(&array.header, D::ROLES.len() - axis));
        array.attach_wcs(wcs);
        array.attach_wave(wave);
        log::info!(
            "Opened {} {:?} from {}",
            D::KIND,
            array.shape,
            source.describe()
        );
        Ok(array)
    }

    /// Kind of array ("spectrum", "image" or "cube").
    pub fn kind(&self) -> &'static str {
        D::KIND
    }

    /// Extent of each axis. Always equal to the shape of the values.
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        self.shape.iter().product()
    }

    /// True when the array has no elements.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Masked values, read from the backing store on first access.
    pub fn data(&self) -> Result<&MaskedArray<D>> {
        let backing = self.backing.as_ref();
        self.data.get_or_load(|| load_data::<D>(backing))
    }

    pub(crate) fn masked_mut(&mut self) -> Result<&mut MaskedArray<D>> {
        let backing = self.backing.as_ref();
        self.data.get_mut_or_load(|| load_data::<D>(backing))
    }

    /// Writable view of the values. Non-finite values written here stay
    /// unmasked until [`DataArray::mask_invalid`]; use
    /// [`DataArray::set_data`] to change the shape.
    pub fn data_mut(&mut self) -> Result<ArrayViewMut<'_, f64, D>> {
        Ok(self.masked_mut()?.data_mut())
    }

    /// Writable view of the mask.
    pub fn mask_mut(&mut self) -> Result<ArrayViewMut<'_, bool, D>> {
        Ok(self.masked_mut()?.mask_mut())
    }

    /// OR every non-finite value into the mask.
    pub fn mask_invalid(&mut self) -> Result<()> {
        self.masked_mut()?.mask_invalid();
        Ok(())
    }

    /// Replace the values. The cached shape and coordinate lengths follow,
    /// and a variance of the old shape is dropped.
    pub fn set_data(&mut self, data: MaskedArray<D>) {
        let reshaped = data.shape() != self.shape.as_slice();
        self.shape = data.shape().to_vec();
        self.data.set(data);
        if reshaped {
            log::debug!("{} reshaped to {:?}, dropping its variance", D::KIND, self.shape);
            self.var.set(None);
            let wcs = self.wcs.take();
            let wave = self.wave.take();
            self.attach_wcs(wcs);
            self.attach_wave(wave);
        }
    }

    /// Variance, read from the backing store on first access.
    pub fn var(&self) -> Result<Option<&Array<f64, D>>> {
        let backing = self.backing.as_ref();
        let shape = &self.shape;
        Ok(self
            .var
            .get_or_load(|| load_var::<D>(backing, shape))?
            .as_ref())
    }

    /// Writable view of the variance. Use [`DataArray::set_var`] to replace
    /// it.
    pub fn var_mut(&mut self) -> Result<Option<ArrayViewMut<'_, f64, D>>> {
        let backing = self.backing.as_ref();
        let shape = &self.shape;
        Ok(self
            .var
            .get_mut_or_load(|| load_var::<D>(backing, shape))?
            .as_mut()
            .map(|v| v.view_mut()))
    }

    /// Replace the variance. Fails when the shape differs from the data.
    pub fn set_var(&mut self, var: Option<Array<f64, D>>) -> Result<()> {
        if let Some(v) = &var {
            if v.shape() != self.shape.as_slice() {
                return Err(DataError::shape_mismatch("variance", &self.shape, v.shape()));
            }
        }
        self.var.set(var);
        Ok(())
    }

    /// True when a variance array is tracked.
    pub fn has_var(&self) -> Result<bool> {
        Ok(self.var()?.is_some())
    }

    /// Data unit.
    pub fn unit(&self) -> Option<&Unit> {
        self.unit.as_ref()
    }

    /// Replace the data unit without converting values.
    pub fn set_unit(&mut self, unit: Option<Unit>) {
        self.unit = unit;
    }

    /// Spatial coordinates.
    pub fn wcs(&self) -> Option<&Wcs> {
        self.wcs.as_ref()
    }

    /// Spectral coordinates.
    pub fn wave(&self) -> Option<&WaveCoord> {
        self.wave.as_ref()
    }

    /// Replace the spatial coordinates. A length mismatch with the data is
    /// repaired and reported to the diagnostics sink.
    pub fn set_wcs(&mut self, wcs: Option<Wcs>) -> Result<()> {
        if wcs.is_some() && D::spatial_axes().is_none() {
            return Err(DataError::invalid_argument(format!(
                "a {} has no spatial axes",
                D::KIND
            )));
        }
        self.attach_wcs(wcs);
        Ok(())
    }

    /// Replace the spectral coordinates. A length mismatch with the data is
    /// repaired and reported to the diagnostics sink.
    pub fn set_wave(&mut self, wave: Option<WaveCoord>) -> Result<()> {
        if wave.is_some() && D::wave_axis().is_none() {
            return Err(DataError::invalid_argument(format!(
                "a {} has no spectral axis",
                D::KIND
            )));
        }
        self.attach_wave(wave);
        Ok(())
    }

    pub(crate) fn attach_wcs(&mut self, wcs: Option<Wcs>) {
        self.wcs = match (wcs, D::spatial_axes()) {
            (Some(mut wcs), Some((ay, ax))) => {
                let expected = [self.shape[ay], self.shape[ax]];
                if wcs.naxis != expected {
                    if wcs.naxis != [0, 0] {
                        self.diag.warn(&format!(
                            "wcs dimensions {:?} do not match {} shape {:?}; using {:?}",
                            wcs.naxis,
                            D::KIND,
                            self.shape,
                            expected
                        ));
                    }
                    wcs.naxis = expected;
                }
                Some(wcs)
            }
            _ => None,
        };
    }

    pub(crate) fn attach_wave(&mut self, wave: Option<WaveCoord>) {
        self.wave = match (wave, D::wave_axis()) {
            (Some(mut wave), Some(axis)) => {
                let expected = self.shape[axis];
                if wave.shape != Some(expected) {
                    if let Some(recorded) = wave.shape {
                        self.diag.warn(&format!(
                            "wavelength coordinates length {} does not match {} shape {:?}; using {}",
                            recorded,
                            D::KIND,
                            self.shape,
                            expected
                        ));
                    }
                    wave.shape = Some(expected);
                }
                Some(wave)
            }
            _ => None,
        };
    }

    /// Header of the data layer.
    pub fn header(&self) -> &Header {
        &self.header
    }

    /// Mutable header of the data layer.
    pub fn header_mut(&mut self) -> &mut Header {
        &mut self.header
    }

    /// Primary header.
    pub fn primary_header(&self) -> &Header {
        &self.primary_header
    }

    /// Mutable primary header.
    pub fn primary_header_mut(&mut self) -> &mut Header {
        &mut self.primary_header
    }

    /// Diagnostics sink of this array.
    pub fn diagnostics(&self) -> &Arc<dyn Diagnostics> {
        &self.diag
    }

    /// Coordinate comparison tolerance.
    pub fn tolerance(&self) -> f64 {
        self.tolerance
    }

    pub(crate) fn images(&self) -> &BTreeMap<String, Image> {
        &self.ima
    }

    pub(crate) fn images_mut(&mut self) -> &mut BTreeMap<String, Image> {
        &mut self.ima
    }

    /// Build a new array that inherits unit, headers, diagnostics and
    /// tolerance from `self`.
    pub(crate) fn derive<E: Rank>(
        &self,
        data: MaskedArray<E>,
        var: Option<Array<f64, E>>,
        wcs: Option<Wcs>,
        wave: Option<WaveCoord>,
    ) -> Result<DataArray<E>> {
        let mut out = DataArray::<E>::from_masked(data);
        out.set_var(var)?;
        out.unit = self.unit.clone();
        out.header = self.header.clone();
        out.primary_header = self.primary_header.clone();
        out.diag = self.diag.clone();
        out.tolerance = self.tolerance;
        out.attach_wcs(wcs);
        out.attach_wave(wave);
        Ok(out)
    }

    /// Deep copy. The copy owns its arrays, so mutating it never affects
    /// `self`.
    pub fn copy(&self) -> Result<Self> {
        let data = self.data()?.clone();
        let var = self.var()?.cloned();
        let mut out = self.derive(data, var, self.wcs.clone(), self.wave.clone())?;
        out.ima = self.ima.clone();
        Ok(out)
    }

    /// Copy with zero values, the same coordinates and optionally a zero
    /// variance.
    pub fn clone_zeros(&self, with_var: bool) -> Result<Self> {
        let dim = self.data()?.data().raw_dim();
        let data = MaskedArray::from_data(Array::zeros(dim.clone()));
        let var = with_var.then(|| Array::zeros(dim));
        self.derive(data, var, self.wcs.clone(), self.wave.clone())
    }

    /// Clear the mask, keeping only non-finite values masked.
    pub fn unmask(&mut self) -> Result<()> {
        let (values, mut mask) = self.masked_mut()?.parts_mut();
        Zip::from(&mut mask).and(&values).for_each(|m, &v| *m = !v.is_finite());
        Ok(())
    }

    /// OR a boolean selection into the mask.
    pub fn mask_selection(&mut self, selection: &Array<bool, D>) -> Result<()> {
        self.masked_mut()?.mask_or(selection)
    }

    /// Mask every element whose variance exceeds `threshold`.
    pub fn mask_variance(&mut self, threshold: f64) -> Result<()> {
        let over = match self.var()? {
            Some(var) => var.mapv(|v| v > threshold),
            None => {
                return Err(DataError::MissingVariance {
                    operation: "mask_variance",
                });
            }
        };
        self.masked_mut()?.mask_or(&over)
    }

    /// Copy with every element satisfying `cmp` against `threshold` masked.
    pub fn mask_where(&self, cmp: Comparison, threshold: f64) -> Result<Self> {
        let mut out = self.copy()?;
        let (values, mut mask) = out.masked_mut()?.parts_mut();
        Zip::from(&mut mask)
            .and(&values)
            .for_each(|m, &v| *m |= cmp.test(v, threshold));
        Ok(out)
    }

    fn whole(&self, reduction: Reduction) -> Result<Option<f64>> {
        let data = self.data()?;
        let r = reduce(data.data().view(), data.mask().view(), None, reduction);
        Ok((!r.masked).then_some(r.value))
    }

    /// Sum of unmasked values, `None` when everything is masked.
    pub fn sum(&self) -> Result<Option<f64>> {
        self.whole(Reduction::Sum)
    }

    /// Mean of unmasked values, `None` when everything is masked.
    pub fn mean(&self) -> Result<Option<f64>> {
        self.whole(Reduction::Mean)
    }

    /// Median of unmasked values, `None` when everything is masked.
    pub fn median(&self) -> Result<Option<f64>> {
        self.whole(Reduction::Median)
    }

    /// Value, mask bit and variance of one element.
    pub fn element(&self, index: &[usize]) -> Result<Element> {
        self.check_index(index)?;
        let data = self.data()?;
        let d = data.data().view().into_dyn();
        let m = data.mask().view().into_dyn();
        let var = self.var()?.map(|v| v.view().into_dyn()[index]);
        Ok(Element {
            value: d[index],
            masked: m[index],
            var,
        })
    }

    fn check_index(&self, index: &[usize]) -> Result<()> {
        if index.len() != self.shape.len() {
            return Err(DataError::invalid_argument(format!(
                "{} indices given for a {}-dimensional {}",
                index.len(),
                self.shape.len(),
                D::KIND
            )));
        }
        for (axis, (&i, &len)) in index.iter().zip(&self.shape).enumerate() {
            if i >= len {
                return Err(DataError::IndexOutOfBounds {
                    axis,
                    index: i,
                    len,
                });
            }
        }
        Ok(())
    }

    fn resolve(&self, sel: &[Sel]) -> Result<(Vec<Range<usize>>, Vec<bool>)> {
        if sel.len() != self.shape.len() {
            return Err(DataError::invalid_argument(format!(
                "{} selectors given for a {}-dimensional {}",
                sel.len(),
                self.shape.len(),
                D::KIND
            )));
        }
        let mut ranges = Vec::with_capacity(sel.len());
        let mut collapse = Vec::with_capacity(sel.len());
        for (axis, (s, &len)) in sel.iter().zip(&self.shape).enumerate() {
            let range = match s {
                Sel::At(i) => {
                    if *i >= len {
                        return Err(DataError::IndexOutOfBounds { axis, index: *i, len });
                    }
                    *i..*i + 1
                }
                Sel::Span(r) => {
                    if r.end > len {
                        return Err(DataError::IndexOutOfBounds {
                            axis,
                            index: r.end,
                            len,
                        });
                    }
                    if r.start >= r.end {
                        return Err(DataError::empty_selection(format!(
                            "axis {} range {:?}",
                            axis, r
                        )));
                    }
                    r.clone()
                }
                Sel::All => 0..len,
            };
            ranges.push(range);
            collapse.push(matches!(s, Sel::At(_)));
        }
        Ok((ranges, collapse))
    }

    fn sliced_coords(&self, ranges: &[Range<usize>]) -> (Option<Wcs>, Option<WaveCoord>) {
        let wcs = match (&self.wcs, D::spatial_axes()) {
            (Some(wcs), Some((ay, ax))) => Some(wcs.slice(ranges[ay].clone(), ranges[ax].clone())),
            _ => None,
        };
        let wave = match (&self.wave, D::wave_axis()) {
            (Some(wave), Some(axis)) => Some(wave.slice(ranges[axis].clone())),
            _ => None,
        };
        (wcs, wave)
    }

    /// Same-rank sub-array over the given index ranges.
    pub fn slice_ranges(&self, ranges: &[Range<usize>]) -> Result<Self> {
        let sel: Vec<Sel> = ranges.iter().cloned().map(Sel::Span).collect();
        let (ranges, _) = self.resolve(&sel)?;
        let keep = vec![false; ranges.len()];
        let data = self.data()?;
        let values = cut(data.data(), &ranges, &keep).into_dimensionality::<D>()?;
        let mask = cut(data.mask(), &ranges, &keep).into_dimensionality::<D>()?;
        let var = match self.var()? {
            Some(v) => Some(cut(v, &ranges, &keep).into_dimensionality::<D>()?),
            None => None,
        };
        let (wcs, wave) = self.sliced_coords(&ranges);
        self.derive(MaskedArray::new(values, mask)?, var, wcs, wave)
    }

    /// Index with a mix of integers and ranges.
    ///
    /// Every integer-indexed axis is removed. The remaining axes decide the
    /// kind of the result: none gives an [`Element`], the spectral axis alone
    /// a [`Spectrum`], both spatial axes an [`Image`], all three a [`Cube`].
    /// Any other combination is rejected.
    pub fn select(&self, sel: &[Sel]) -> Result<Selection> {
        let (ranges, collapse) = self.resolve(sel)?;
        let kept: Vec<AxisRole> = D::ROLES
            .iter()
            .zip(&collapse)
            .filter(|&(_, &c)| !c)
            .map(|(r, _)| *r)
            .collect();

        let data = self.data()?;
        let values = cut(data.data(), &ranges, &collapse);
        let mask = cut(data.mask(), &ranges, &collapse);
        let var = self.var()?.map(|v| cut(v, &ranges, &collapse));
        let (wcs, wave) = self.sliced_coords(&ranges);
        let wcs = wcs.filter(|_| kept.contains(&AxisRole::WcsY) && kept.contains(&AxisRole::WcsX));
        let wave = wave.filter(|_| kept.contains(&AxisRole::Wave));

        match kept.as_slice() {
            [] => Ok(Selection::Element(Element {
                value: values.iter().next().copied().unwrap_or(f64::NAN),
                masked: mask.iter().next().copied().unwrap_or(true),
                var: var.and_then(|v| v.iter().next().copied()),
            })),
            [AxisRole::Wave] => Ok(Selection::Spectrum(
                self.build_selected::<Ix1>(values, mask, var, wcs, wave)?,
            )),
            [AxisRole::WcsY, AxisRole::WcsX] => Ok(Selection::Image(
                self.build_selected::<Ix2>(values, mask, var, wcs, wave)?,
            )),
            [AxisRole::Wave, AxisRole::WcsY, AxisRole::WcsX] => Ok(Selection::Cube(
                self.build_selected::<Ix3>(values, mask, var, wcs, wave)?,
            )),
            other => Err(DataError::invalid_argument(format!(
                "selection keeps axes {:?}, which form neither a spectrum, an image nor a cube",
                other
            ))),
        }
    }

    fn build_selected<E: Rank>(
        &self,
        values: ArrayD<f64>,
        mask: ArrayD<bool>,
        var: Option<ArrayD<f64>>,
        wcs: Option<Wcs>,
        wave: Option<WaveCoord>,
    ) -> Result<DataArray<E>> {
        let values = values.into_dimensionality::<E>()?;
        let mask = mask.into_dimensionality::<E>()?;
        let var = match var {
            Some(v) => Some(v.into_dimensionality::<E>()?),
            None => None,
        };
        self.derive(MaskedArray::new(values, mask)?, var, wcs, wave)
    }

    /// Shrink to the bounding box of the unmasked elements.
    pub fn crop(&self) -> Result<Self> {
        let data = self.data()?;
        let ndim = self.shape.len();
        let mut lo = vec![usize::MAX; ndim];
        let mut hi = vec![0usize; ndim];
        let mut any = false;
        for (idx, &m) in data.mask().view().into_dyn().indexed_iter() {
            if m {
                continue;
            }
            any = true;
            for axis in 0..ndim {
                lo[axis] = lo[axis].min(idx[axis]);
                hi[axis] = hi[axis].max(idx[axis] + 1);
            }
        }
        if !any {
            return Err(DataError::empty_selection(format!(
                "every element of the {} is masked",
                D::KIND
            )));
        }
        let ranges: Vec<Range<usize>> = lo.into_iter().zip(hi).map(|(a, b)| a..b).collect();
        self.slice_ranges(&ranges)
    }

    /// Log a short description of every component.
    pub fn info(&self) -> Result<()> {
        let unit = self
            .unit
            .as_ref()
            .map(|u| u.to_string())
            .unwrap_or_else(|| "no unit".to_string());
        let data = self.data()?;
        self.diag.info(&format!(
            "{} {:?} ({}), {} masked",
            D::KIND,
            self.shape,
            unit,
            data.count_masked()
        ));
        match self.var()? {
            Some(_) => self.diag.info(".var: variance array"),
            None => self.diag.info(".var: no variance"),
        }
        if let Some(wcs) = &self.wcs {
            let (y0, x0) = wcs.get_start();
            let (y1, x1) = wcs.get_end();
            self.diag.info(&format!(
                "spatial coord: y {:.6}..{:.6} x {:.6}..{:.6} step {:?} rot {:.2}",
                y0,
                y1,
                x0,
                x1,
                wcs.get_step(),
                wcs.get_rot()
            ));
        }
        if let Some(wave) = &self.wave {
            let unit = wave
                .cunit
                .as_ref()
                .map(|u| u.to_string())
                .unwrap_or_default();
            self.diag.info(&format!(
                "wavelength: {:.3}..{:.3} {} step {:.4}",
                wave.get_start(),
                wave.get_end(),
                unit,
                wave.get_step()
            ));
        }
        for name in self.ima.keys() {
            self.diag.info(&format!(".ima: {}", name));
        }
        Ok(())
    }

    /// Header of the data layer with coordinates, unit and axis lengths
    /// brought up to date.
    pub fn data_header(&self) -> Header {
        let mut header = self.header.clone();
        header.remove_prefixed(&["CRPIX", "CRVAL", "CDELT", "CD1_", "CD2_", "CD3_", "CUNIT", "CTYPE", "NAXIS"]);
        let ndim = self.shape.len();
        header.set("NAXIS", ndim);
        for (axis, &len) in self.shape.iter().enumerate() {
            header.set(format!("NAXIS{}", ndim - axis), len);
        }
        if let Some(wcs) = &self.wcs {
            wcs.to_header(&mut header);
        }
        if let (Some(wave), Some(axis)) = (&self.wave, D::wave_axis()) {
            wave.to_header(&mut header, ndim - axis);
        }
        match &self.unit {
            Some(unit) => header.set("BUNIT", unit.to_string()),
            None => {
                header.remove("BUNIT");
            }
        }
        header
    }

    /// Persist values, variance and mask.
    ///
    /// Writes the `DATA` layer, a `STAT` layer when variance is tracked, and
    /// the mask according to `policy`: a `DQ` layer, NaN values in the data
    /// and variance layers, or nothing. The primary header receives `AUTHOR`
    /// when it has none. Associated images of a cube are written as extra
    /// layers.
    pub fn write(&self, sink: &mut dyn ArraySink, policy: MaskPolicy) -> Result<()> {
        let mut primary = self.primary_header.clone();
        if !primary.contains("AUTHOR") {
            primary.set("AUTHOR", "ifucube");
        }
        sink.write_primary_header(&primary)?;

        let data = self.data()?;
        let header = self.data_header();
        let values = match policy {
            MaskPolicy::Nan => data.filled(f64::NAN),
            MaskPolicy::Layer | MaskPolicy::None => data.data().clone(),
        };
        sink.write_array(crate::data::store::DATA_LAYER, &header, &values.into_dyn())?;

        if let Some(var) = self.var()? {
            let var = match policy {
                MaskPolicy::Nan => {
                    let mut v = var.clone();
                    Zip::from(&mut v)
                        .and(data.mask())
                        .for_each(|v, &m| {
                            if m {
                                *v = f64::NAN;
                            }
                        });
                    v
                }
                MaskPolicy::Layer | MaskPolicy::None => var.clone(),
            };
            let mut stat_header = header.clone();
            if let Some(unit) = &self.unit {
                stat_header.set("BUNIT", unit.multiply(unit).to_string());
            }
            sink.write_array(STAT_LAYER, &stat_header, &var.into_dyn())?;
        }

        if policy == MaskPolicy::Layer {
            sink.write_mask(DQ_LAYER, &Header::new(), &data.mask().clone().into_dyn())?;
        }

        for (name, image) in &self.ima {
            let image_data = image.data()?;
            sink.write_array(name, &image.data_header(), &image_data.filled(f64::NAN).into_dyn())?;
        }
        log::info!("Wrote {} {:?}", D::KIND, self.shape);
        Ok(())
    }
}

impl<D: Rank> fmt::Display for DataArray<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {:?}", D::KIND, self.shape)?;
        if let Some(unit) = &self.unit {
            write!(f, " [{}]", unit)?;
        }
        Ok(())
    }
}
