//! Array data model: masked values, variance, headers and backing stores.
//!
//! This module provides:
//! - `DataArray<D>`: the shared representation of spectra, images and cubes
//! - `MaskedArray<D>`: values paired with an exclusion mask
//! - `Loaded<T>`: explicit lazy-materialisation state
//! - `ArraySource` / `ArraySink`: the backing-store contracts, with a NumPy
//!   directory store and an in-memory store
//! - Region geometry and rank-generic rebinning
//!
//! ## Adding a store
//!
//! To read or write another persisted format, implement [`ArraySource`] and
//! [`ArraySink`] and pass the source to [`DataArray::open`]:
//!
//! ```rust,ignore
//! use ifucube::data::{ArraySource, Header};
//!
//! #[derive(Debug)]
//! struct MyStore;
//!
//! impl ArraySource for MyStore {
//!     fn describe(&self) -> String { "my-store".into() }
//!     fn layers(&self) -> Vec<String> { vec!["DATA".into()] }
//!     fn header(&self, layer: &str) -> ifucube::Result<Header> { /* ... */ }
//!     fn shape(&self, layer: &str) -> ifucube::Result<Vec<usize>> { /* ... */ }
//!     fn read_array(&self, layer: &str) -> ifucube::Result<ndarray::ArrayD<f64>> { /* ... */ }
//!     fn read_mask(&self, layer: &str) -> ifucube::Result<ndarray::ArrayD<bool>> { /* ... */ }
//! }
//! ```

mod array;
mod header;
mod lazy;
mod masked;
pub mod region;
mod resample;
pub mod store;

pub use array::{
    AxisRole, Comparison, Cube, DataArray, Image, OpenOptions, Rank, Sel, Selection, Spectrum,
};
pub use header::Header;
pub use lazy::Loaded;
pub use masked::{Element, MaskedArray, Reduction};
pub(crate) use masked::reduce;
pub use region::{Region, RegionShape, RegionUnits, arcsec};
pub use resample::{Margin, RebinOptions};
pub use store::{ArraySink, ArraySource, MaskPolicy, MemoryStore, NpyStore};
