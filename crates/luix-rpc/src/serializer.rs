//! Body serializers, looked up by the `serializer` URL option

use crate::error::{Error, Result};
use luix_registry::Strategies;
use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;
use std::sync::Arc;

/// Name of the JSON serializer
pub const JSON: &str = "json";

/// Name of the YAML serializer
pub const YAML: &str = "yaml";

/// Converts structured values to and from bytes
///
/// The trait works on [`Value`] so it stays object safe; use [`serialize`]
/// and [`deserialize`] for typed data.
pub trait Serializer: Send + Sync {
    /// Strategy name
    fn name(&self) -> &'static str;

    /// Encode a value
    fn serialize_value(&self, value: &Value) -> Result<Vec<u8>>;

    /// Decode a value
    fn deserialize_value(&self, bytes: &[u8]) -> Result<Value>;
}

/// Serialize any serde type through a serializer strategy
pub fn serialize<T: Serialize>(serializer: &dyn Serializer, value: &T) -> Result<Vec<u8>> {
    let value = serde_json::to_value(value).map_err(|e| Error::Encode(e.to_string()))?;
    serializer.serialize_value(&value)
}

/// Deserialize bytes into the target type through a serializer strategy
pub fn deserialize<T: DeserializeOwned>(serializer: &dyn Serializer, bytes: &[u8]) -> Result<T> {
    let value = serializer.deserialize_value(bytes)?;
    serde_json::from_value(value).map_err(|e| Error::Decode(e.to_string()))
}

/// `serde_json` backed serializer
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonSerializer;

impl Serializer for JsonSerializer {
    fn name(&self) -> &'static str {
        JSON
    }

    fn serialize_value(&self, value: &Value) -> Result<Vec<u8>> {
        serde_json::to_vec(value).map_err(|e| Error::Encode(e.to_string()))
    }

    fn deserialize_value(&self, bytes: &[u8]) -> Result<Value> {
        serde_json::from_slice(bytes).map_err(|e| Error::Decode(e.to_string()))
    }
}

/// `serde_yaml` backed serializer
#[derive(Debug, Default, Clone, Copy)]
pub struct YamlSerializer;

impl Serializer for YamlSerializer {
    fn name(&self) -> &'static str {
        YAML
    }

    fn serialize_value(&self, value: &Value) -> Result<Vec<u8>> {
        serde_yaml::to_string(value)
            .map(String::into_bytes)
            .map_err(|e| Error::Encode(e.to_string()))
    }

    fn deserialize_value(&self, bytes: &[u8]) -> Result<Value> {
        serde_yaml::from_slice(bytes).map_err(|e| Error::Decode(e.to_string()))
    }
}

/// Built-in serializers
pub fn serializers() -> Strategies<Arc<dyn Serializer>> {
    Strategies::new("serializer")
        .with(JSON, || Arc::new(JsonSerializer) as Arc<dyn Serializer>)
        .with(YAML, || Arc::new(YamlSerializer) as Arc<dyn Serializer>)
}
