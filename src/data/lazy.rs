//! Explicit lazy-materialisation state.

use std::sync::OnceLock;

use crate::error::Result;

/// A value that is either not yet materialised or materialised.
///
/// The value is produced at most once by [`Loaded::get_or_load`]; afterwards
/// it is returned from memory. Replacing it with [`Loaded::set`] marks it
/// materialised without running the loader.
#[derive(Debug, Clone)]
pub struct Loaded<T> {
    cell: OnceLock<T>,
}

impl<T> Default for Loaded<T> {
    fn default() -> Self {
        Self::pending()
    }
}

impl<T> Loaded<T> {
    /// Not yet materialised.
    pub fn pending() -> Self {
        Self {
            cell: OnceLock::new(),
        }
    }

    /// Already materialised.
    pub fn ready(value: T) -> Self {
        Self {
            cell: OnceLock::from(value),
        }
    }

    /// True once the value exists in memory.
    pub fn is_loaded(&self) -> bool {
        self.cell.get().is_some()
    }

    /// The value, if materialised.
    pub fn get(&self) -> Option<&T> {
        self.cell.get()
    }

    /// The value, materialising it with `load` on first access.
    pub fn get_or_load(&self, load: impl FnOnce() -> Result<T>) -> Result<&T> {
        if let Some(value) = self.cell.get() {
            return Ok(value);
        }
        let value = load()?;
        Ok(self.cell.get_or_init(|| value))
    }

    /// Mutable access, materialising first.
    pub fn get_mut_or_load(&mut self, load: impl FnOnce() -> Result<T>) -> Result<&mut T> {
        if self.cell.get().is_none() {
            let value = load()?;
            self.cell = OnceLock::from(value);
        }
        self.cell.get_mut().ok_or_else(|| {
            crate::error::DataError::store("lazy value vanished after materialisation")
        })
    }

    /// Replace the value.
    pub fn set(&mut self, value: T) {
        self.cell = OnceLock::from(value);
    }

    /// Take the value out, leaving the state pending.
    pub fn take(&mut self) -> Option<T> {
        self.cell.take()
    }
}
