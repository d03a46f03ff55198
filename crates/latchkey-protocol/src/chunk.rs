//! Base64 chunk payloads.
//!
//! Transfer chunks and buzzer tunes carry binary data inside JSON as
//! base64 strings. `ChunkData` keeps the decoded bytes in memory and
//! does the base64 conversion at the serde boundary.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::de::{self, Deserializer};
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};

/// Decoded binary payload of a `data` field.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChunkData(Vec<u8>);

impl ChunkData {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        ChunkData(bytes.into())
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.0
    }
}

impl AsRef<[u8]> for ChunkData {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl Serialize for ChunkData {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(&self.0))
    }
}

impl<'de> Deserialize<'de> for ChunkData {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        STANDARD
            .decode(s.as_bytes())
            .map(ChunkData)
            .map_err(de::Error::custom)
    }
}
