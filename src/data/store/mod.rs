//! Backing stores for persisted arrays.
//!
//! A store holds named layers (rectangular arrays), one header per layer and
//! a primary header shared by the whole file. Reading goes through
//! [`ArraySource`], writing through [`ArraySink`]. Two implementations are
//! provided:
//!
//! - [`NpyStore`]: a directory with one NumPy `.npy` file per layer and a
//!   `header.json` holding every header
//! - [`MemoryStore`]: layers kept in memory, for tests and pipelines that
//!   never touch the disk
//!
//! ## Layer conventions
//!
//! | Layer | Content |
//! |---|---|
//! | `DATA` (or `SCI`) | values |
//! | `STAT` | variance |
//! | `DQ` | mask, non-zero = excluded |

use std::fmt;

use ndarray::ArrayD;
use serde::{Deserialize, Serialize};

use crate::data::Header;
use crate::error::Result;

mod memory;
mod npy_store;

pub use memory::MemoryStore;
pub use npy_store::NpyStore;

/// Name of the primary header.
pub const PRIMARY: &str = "PRIMARY";
/// Default value layer.
pub const DATA_LAYER: &str = "DATA";
/// Alternative value layer name.
pub const SCI_LAYER: &str = "SCI";
/// Variance layer.
pub const STAT_LAYER: &str = "STAT";
/// Mask layer.
pub const DQ_LAYER: &str = "DQ";

/// How a mask is persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MaskPolicy {
    /// Separate `DQ` layer aligned with the data
    #[default]
    Layer,
    /// Masked values replaced by NaN in the data and variance layers
    Nan,
    /// Mask not written
    None,
}

/// Read side of a backing store.
pub trait ArraySource: Send + Sync + fmt::Debug {
    /// Description used in log and error messages.
    fn describe(&self) -> String;

    /// Names of the layers present, primary header excluded.
    fn layers(&self) -> Vec<String>;

    /// True when the layer exists.
    fn has_layer(&self, layer: &str) -> bool {
        self.layers().iter().any(|l| l == layer)
    }

    /// Header of a layer, or the primary header for [`PRIMARY`].
    fn header(&self, layer: &str) -> Result<Header>;

    /// Shape of a layer without reading its values.
    fn shape(&self, layer: &str) -> Result<Vec<usize>>;

    /// Values of a layer.
    fn read_array(&self, layer: &str) -> Result<ArrayD<f64>>;

    /// Mask layer (non-zero = excluded).
    fn read_mask(&self, layer: &str) -> Result<ArrayD<bool>>;
}

/// Write side of a backing store.
pub trait ArraySink {
    /// Set the primary header.
    fn write_primary_header(&mut self, header: &Header) -> Result<()>;

    /// Write a value layer with its header.
    fn write_array(&mut self, layer: &str, header: &Header, data: &ArrayD<f64>) -> Result<()>;

    /// Write a mask layer with its header.
    fn write_mask(&mut self, layer: &str, header: &Header, mask: &ArrayD<bool>) -> Result<()>;
}

/// Pick the value layer of a source: `DATA`, then `SCI`, then the only layer.
pub fn default_data_layer(source: &dyn ArraySource) -> Option<String> {
    let layers = source.layers();
    for candidate in [DATA_LAYER, SCI_LAYER] {
        if layers.iter().any(|l| l == candidate) {
            return Some(candidate.to_string());
        }
    }
    match layers.as_slice() {
        [only] => Some(only.clone()),
        _ => None,
    }
}
