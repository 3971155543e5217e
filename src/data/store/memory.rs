//! In-memory store.

use std::collections::BTreeMap;

use ndarray::ArrayD;

use crate::data::Header;
use crate::data::store::{ArraySink, ArraySource, PRIMARY};
use crate::error::{DataError, Result};

#[derive(Debug, Clone)]
enum Layer {
    Values(ArrayD<f64>),
    Mask(ArrayD<bool>),
}

/// Store keeping every layer in memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    name: String,
    primary: Header,
    headers: BTreeMap<String, Header>,
    layers: BTreeMap<String, Layer>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Add a value layer (builder style).
    pub fn with_array(mut self, layer: &str, header: Header, data: ArrayD<f64>) -> Self {
        self.headers.insert(layer.to_string(), header);
        self.layers.insert(layer.to_string(), Layer::Values(data));
        self
    }

    /// Add a mask layer (builder style).
    pub fn with_mask(mut self, layer: &str, mask: ArrayD<bool>) -> Self {
        self.headers.insert(layer.to_string(), Header::new());
        self.layers.insert(layer.to_string(), Layer::Mask(mask));
        self
    }

    fn layer(&self, layer: &str) -> Result<&Layer> {
        self.layers
            .get(layer)
            .ok_or_else(|| DataError::store(format!("layer '{}' not found in {}", layer, self.name)))
    }
}

impl ArraySource for MemoryStore {
    fn describe(&self) -> String {
        format!("memory:{}", self.name)
    }

    fn layers(&self) -> Vec<String> {
        self.layers.keys().cloned().collect()
    }

    fn header(&self, layer: &str) -> Result<Header> {
        if layer == PRIMARY {
            return Ok(self.primary.clone());
        }
        self.layer(layer)?;
        Ok(self.headers.get(layer).cloned().unwrap_or_default())
    }

    fn shape(&self, layer: &str) -> Result<Vec<usize>> {
        Ok(match self.layer(layer)? {
            Layer::Values(a) => a.shape().to_vec(),
            Layer::Mask(m) => m.shape().to_vec(),
        })
    }

    fn read_array(&self, layer: &str) -> Result<ArrayD<f64>> {
        Ok(match self.layer(layer)? {
            Layer::Values(a) => a.clone(),
            Layer::Mask(m) => m.mapv(|v| if v { 1.0 } else { 0.0 }),
        })
    }

    fn read_mask(&self, layer: &str) -> Result<ArrayD<bool>> {
        Ok(match self.layer(layer)? {
            Layer::Values(a) => a.mapv(|v| v != 0.0),
            Layer::Mask(m) => m.clone(),
        })
    }
}

impl ArraySink for MemoryStore {
    fn write_primary_header(&mut self, header: &Header) -> Result<()> {
        self.primary = header.clone();
        Ok(())
    }

    fn write_array(&mut self, layer: &str, header: &Header, data: &ArrayD<f64>) -> Result<()> {
        self.headers.insert(layer.to_string(), header.clone());
        self.layers
            .insert(layer.to_string(), Layer::Values(data.clone()));
        Ok(())
    }

    fn write_mask(&mut self, layer: &str, header: &Header, mask: &ArrayD<bool>) -> Result<()> {
        self.headers.insert(layer.to_string(), header.clone());
        self.layers.insert(layer.to_string(), Layer::Mask(mask.clone()));
        Ok(())
    }
}
