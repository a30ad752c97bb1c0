//! A read-only, in-memory configuration map handed to plugins through the
//! Core Facade.
//!
//! This crate owns no file-format loader — a host application is
//! responsible for populating a [`ConfigMap`] (from TOML, JSON, environment
//! variables, whatever it likes) before constructing the [`CoreFacade`].
//! The shape here mirrors what the teacher's `storage::config::ConfigData`
//! looks like once a host has already loaded it: a flat string-keyed map of
//! `serde_json::Value`, with typed `get`/`get_or` accessors.

use std::collections::HashMap;

use serde::de::DeserializeOwned;
use serde_json::Value;

#[derive(Debug, Clone, Default)]
pub struct ConfigMap {
    values: HashMap<String, Value>,
}

impl ConfigMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_values(values: HashMap<String, Value>) -> Self {
        Self { values }
    }

    /// Typed lookup. Returns `None` if the key is absent or fails to
    /// deserialize as `T` — lookups here are total, never panicking.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.values.get(key).and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    pub fn get_or<T: DeserializeOwned>(&self, key: &str, default: T) -> T {
        self.get(key).unwrap_or(default)
    }

    pub fn get_raw(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn keys(&self) -> Vec<String> {
        self.values.keys().cloned().collect()
    }
}
