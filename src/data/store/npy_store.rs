//! Directory store of NumPy `.npy` layers.
//!
//! Layout:
//!
//! ```text
//! cube.ifu/
//! ├── header.json   primary header, per-layer headers and shapes
//! ├── DATA.npy      f64 (f32 and integer dtypes are accepted on read)
//! ├── STAT.npy      f64
//! └── DQ.npy        u8, non-zero = masked
//! ```
//!
//! `.npy` files dropped into the directory without a `header.json` entry
//! are still listed and readable; they just have empty headers.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufWriter, Cursor};
use std::path::{Path, PathBuf};

use ndarray::ArrayD;
use ndarray_npy::{ReadNpyExt, WriteNpyExt};
use serde::{Deserialize, Serialize};

use crate::data::Header;
use crate::data::store::{ArraySink, ArraySource, PRIMARY};
use crate::error::{DataError, Result};

const MANIFEST: &str = "header.json";
const EXTENSION: &str = "npy";

/// NumPy magic bytes: \x93NUMPY
const MAGIC: &[u8] = &[0x93, b'N', b'U', b'M', b'P', b'Y'];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
enum LayerKind {
    Values,
    Mask,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct LayerEntry {
    shape: Vec<usize>,
    kind: LayerKind,
    #[serde(default)]
    header: Header,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Manifest {
    #[serde(default)]
    primary: Header,
    #[serde(default)]
    layers: BTreeMap<String, LayerEntry>,
}

/// Store backed by a directory of `.npy` files.
#[derive(Debug)]
pub struct NpyStore {
    root: PathBuf,
    manifest: Manifest,
    files: Vec<String>,
}

impl NpyStore {
    /// Open an existing store directory.
    pub fn open(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        if !root.is_dir() {
            return Err(DataError::store(format!(
                "{} is not a store directory",
                root.display()
            )));
        }
        let manifest_path = root.join(MANIFEST);
        let manifest = if manifest_path.exists() {
            serde_json::from_str(&std::fs::read_to_string(&manifest_path)?)?
        } else {
            Manifest::default()
        };

        let mut files = Vec::new();
        for entry in std::fs::read_dir(&root)? {
            let path = entry?.path();
            if path.extension().is_some_and(|e| e == EXTENSION) {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    files.push(stem.to_string());
                }
            }
        }
        files.sort();

        log::debug!(
            "NpyStore: opened {} with {} layer file(s)",
            root.display(),
            files.len()
        );
        Ok(Self {
            root,
            manifest,
            files,
        })
    }

    /// Create (or empty the manifest of) a store directory for writing.
    pub fn create(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        std::fs::create_dir_all(&root)?;
        let store = Self {
            root,
            manifest: Manifest::default(),
            files: Vec::new(),
        };
        store.save_manifest()?;
        Ok(store)
    }

    /// Directory of the store.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn layer_path(&self, layer: &str) -> PathBuf {
        self.root.join(format!("{layer}.{EXTENSION}"))
    }

    fn save_manifest(&self) -> Result<()> {
        let json = serde_json::to_string_pretty(&self.manifest)?;
        std::fs::write(self.root.join(MANIFEST), json)?;
        Ok(())
    }

    fn read_bytes(&self, layer: &str) -> Result<Vec<u8>> {
        let path = self.layer_path(layer);
        if !path.exists() {
            return Err(DataError::store(format!(
                "layer '{}' not found in {}",
                layer,
                self.root.display()
            )));
        }
        let bytes = std::fs::read(&path)?;
        if !bytes.starts_with(MAGIC) {
            return Err(DataError::store(format!(
                "{} is not a NumPy array file",
                path.display()
            )));
        }
        Ok(bytes)
    }

    fn register(&mut self, layer: &str, header: &Header, shape: &[usize], kind: LayerKind) -> Result<()> {
        self.manifest.layers.insert(
            layer.to_string(),
            LayerEntry {
                shape: shape.to_vec(),
                kind,
                header: header.clone(),
            },
        );
        if !self.files.iter().any(|f| f == layer) {
            self.files.push(layer.to_string());
            self.files.sort();
        }
        self.save_manifest()
    }
}

/// Decode an array of any supported dtype into f64.
fn decode_values(bytes: &[u8]) -> Result<ArrayD<f64>> {
    let mut cursor = Cursor::new(bytes);

    // f64 first since that is what this store writes
    if let Ok(array) = ArrayD::<f64>::read_npy(&mut cursor) {
        return Ok(array);
    }

    cursor.set_position(0);
    if let Ok(array) = ArrayD::<f32>::read_npy(&mut cursor) {
        return Ok(array.mapv(f64::from));
    }

    cursor.set_position(0);
    if let Ok(array) = ArrayD::<i32>::read_npy(&mut cursor) {
        return Ok(array.mapv(f64::from));
    }

    cursor.set_position(0);
    if let Ok(array) = ArrayD::<i16>::read_npy(&mut cursor) {
        return Ok(array.mapv(f64::from));
    }

    cursor.set_position(0);
    if let Ok(array) = ArrayD::<u16>::read_npy(&mut cursor) {
        return Ok(array.mapv(f64::from));
    }

    cursor.set_position(0);
    let array = ArrayD::<u8>::read_npy(&mut cursor)?;
    Ok(array.mapv(f64::from))
}

/// Decode a mask layer. Any integer or float dtype is accepted.
fn decode_mask(bytes: &[u8]) -> Result<ArrayD<bool>> {
    let mut cursor = Cursor::new(bytes);
    if let Ok(array) = ArrayD::<u8>::read_npy(&mut cursor) {
        return Ok(array.mapv(|v| v != 0));
    }
    cursor.set_position(0);
    if let Ok(array) = ArrayD::<i32>::read_npy(&mut cursor) {
        return Ok(array.mapv(|v| v != 0));
    }
    Ok(decode_values(bytes)?.mapv(|v| v != 0.0))
}

impl ArraySource for NpyStore {
    fn describe(&self) -> String {
        self.root.display().to_string()
    }

    fn layers(&self) -> Vec<String> {
        self.files.clone()
    }

    fn header(&self, layer: &str) -> Result<Header> {
        if layer == PRIMARY {
            return Ok(self.manifest.primary.clone());
        }
        if !self.has_layer(layer) {
            return Err(DataError::store(format!("layer '{}' not found", layer)));
        }
        Ok(self
            .manifest
            .layers
            .get(layer)
            .map(|e| e.header.clone())
            .unwrap_or_default())
    }

    fn shape(&self, layer: &str) -> Result<Vec<usize>> {
        if let Some(entry) = self.manifest.layers.get(layer) {
            return Ok(entry.shape.clone());
        }
        Ok(self.read_array(layer)?.shape().to_vec())
    }

    fn read_array(&self, layer: &str) -> Result<ArrayD<f64>> {
        let bytes = self.read_bytes(layer)?;
        let array = decode_values(&bytes)?;
        log::debug!("NpyStore: read {} {:?}", layer, array.shape());
        Ok(array)
    }

    fn read_mask(&self, layer: &str) -> Result<ArrayD<bool>> {
        let bytes = self.read_bytes(layer)?;
        decode_mask(&bytes)
    }
}

impl ArraySink for NpyStore {
    fn write_primary_header(&mut self, header: &Header) -> Result<()> {
        self.manifest.primary = header.clone();
        self.save_manifest()
    }

    fn write_array(&mut self, layer: &str, header: &Header, data: &ArrayD<f64>) -> Result<()> {
        let file = BufWriter::new(File::create(self.layer_path(layer))?);
        data.write_npy(file)?;
        self.register(layer, header, data.shape(), LayerKind::Values)
    }

    fn write_mask(&mut self, layer: &str, header: &Header, mask: &ArrayD<bool>) -> Result<()> {
        let file = BufWriter::new(File::create(self.layer_path(layer))?);
        mask.mapv(u8::from).write_npy(file)?;
        self.register(layer, header, mask.shape(), LayerKind::Mask)
    }
}
