//! Key/value header cards.
//!
//! Headers travel with arrays read from a store and are written back next to
//! them. Coordinate descriptors are built from the usual FITS-style cards
//! (`CRPIXn`, `CRVALn`, `CDELTn`, `CDi_j`, `CUNITn`, `CTYPEn`, `NAXISn`) and
//! the data unit from `BUNIT`.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Ordered collection of header cards.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Header {
    cards: BTreeMap<String, Value>,
}

impl Header {
    /// Create an empty header.
    pub fn new() -> Self {
        Self::default()
    }

    /// Raw card value.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.cards.get(key)
    }

    /// Numeric card value. Numeric strings are accepted.
    pub fn get_f64(&self, key: &str) -> Option<f64> {
        match self.cards.get(key)? {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Non-negative integer card value.
    pub fn get_usize(&self, key: &str) -> Option<usize> {
        match self.cards.get(key)? {
            Value::Number(n) => n.as_u64().map(|v| v as usize),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// String card value.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.cards.get(key)?.as_str()
    }

    /// Set a card, replacing any previous value.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.cards.insert(key.into(), value.into());
    }

    /// Remove a card.
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.cards.remove(key)
    }

    /// Remove every card whose key starts with one of the prefixes.
    pub fn remove_prefixed(&mut self, prefixes: &[&str]) {
        self.cards
            .retain(|k, _| !prefixes.iter().any(|p| k.starts_with(p)));
    }

    /// True when the card exists.
    pub fn contains(&self, key: &str) -> bool {
        self.cards.contains_key(key)
    }

    /// Number of cards.
    pub fn len(&self) -> usize {
        self.cards.len()
    }

    /// True when the header holds no cards.
    pub fn is_empty(&self) -> bool {
        self.cards.is_empty()
    }

    /// Iterate over cards in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.cards.iter()
    }

    /// Copy every card of `other` into this header, overwriting duplicates.
    pub fn merge(&mut self, other: &Header) {
        for (k, v) in &other.cards {
            self.cards.insert(k.clone(), v.clone());
        }
    }
}
