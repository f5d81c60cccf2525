use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{Result, TaskmillError};

/// Codec used to persist job records and payloads in the shared store.
///
/// Two variants are supported:
///
/// - [`Serializer::MessagePack`] (the default) is permissive: it round-trips
///   the full payload space, including exception records and maps with
///   composite keys.
/// - [`Serializer::Json`] is strict: values outside the JSON interchange
///   subset are rejected with [`TaskmillError::UnsupportedType`], which makes
///   records readable by non-Rust consumers at the cost of expressiveness.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Serializer {
    #[default]
    MessagePack,
    Json,
}

impl Serializer {
    pub fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>> {
        match self {
            Serializer::MessagePack => rmp_serde::to_vec_named(value)
                .map_err(|e| TaskmillError::Serialization(e.to_string())),
            Serializer::Json => serde_json::to_vec(value).map_err(|e| {
                if e.classify() == serde_json::error::Category::Data {
                    TaskmillError::UnsupportedType(e.to_string())
                } else {
                    TaskmillError::Serialization(e.to_string())
                }
            }),
        }
    }

    pub fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T> {
        match self {
            Serializer::MessagePack => rmp_serde::from_slice(bytes)
                .map_err(|e| TaskmillError::Serialization(e.to_string())),
            Serializer::Json => serde_json::from_slice(bytes)
                .map_err(|e| TaskmillError::Serialization(e.to_string())),
        }
    }
}
