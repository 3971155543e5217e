//! ifucube - integral-field spectrograph data model
//!
//! Spectra, images and data cubes that carry values, a propagated variance,
//! a mask and their world coordinates through arithmetic, slicing, masking,
//! rebinning and extraction.
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use ifucube::{Cube, NpyStore, OpenOptions, Reduction, RegionUnits};
//!
//! let cube = Cube::open(Arc::new(NpyStore::open("cube_dir")?), &OpenOptions::default())?;
//! let white = cube.collapse_wave(Reduction::Mean)?;
//! let spectrum = cube.aperture((1.5, 2.0), 1.0, RegionUnits::Pixel)?;
//! let normalised = (&cube / &spectrum)?;
//! ```

pub mod arithmetic;
pub mod config;
pub mod coords;
pub mod cube;
pub mod data;
pub mod error;
mod image;
pub mod logging;
mod spectrum;
pub mod units;

#[cfg(test)]
mod tests;

pub use arithmetic::{AnyArray, ArrayKind, ArrayRef, BinaryOp, binary};
pub use config::{ConfigError, LogLevel, ProcessingConfig};
pub use coords::{Projection, WaveCoord, Wcs};
pub use cube::{MapOptions, Positional};
pub use data::{
    Comparison, Cube, DataArray, Element, Header, Image, MaskPolicy, MaskedArray, MemoryStore,
    NpyStore, OpenOptions, RebinOptions, Reduction, Region, RegionUnits, Sel, Selection, Spectrum,
};
pub use error::{DataError, Result};
pub use logging::{CaptureDiagnostics, Diagnostics, LogDiagnostics, init_logging};
pub use units::{Unit, UnitError};
