//! Value encoding for the cache
//!
//! Values are serialised to JSON. With compression on, the JSON is deflated
//! (zlib framing) and base64-encoded so the stored form stays a plain string.
//!
//! Data written with one compression setting cannot be read with the other;
//! the flag has to stay fixed for a deployment.

use std::io::{Read, Write};

use base64::{engine::general_purpose::STANDARD as BASE64_STANDARD, Engine as _};
use flate2::{read::ZlibDecoder, write::ZlibEncoder, Compression};
use serde::{de::DeserializeOwned, Serialize};

use crate::error::{CacheError, CacheResult};

/// JSON + optional deflate/base64 codec
#[derive(Debug, Clone, Copy, Default)]
pub struct ValueCodec {
    compression: bool,
}

impl ValueCodec {
    pub fn new(compression: bool) -> Self {
        Self { compression }
    }

    pub fn compression_enabled(&self) -> bool {
        self.compression
    }

    /// Serialise and, if enabled, compress
    pub fn encode<T: Serialize + ?Sized>(&self, value: &T) -> CacheResult<String> {
        let json = serde_json::to_string(value)?;
        self.pack(&json)
    }

    /// Reverse of [`encode`](Self::encode)
    pub fn decode<T: DeserializeOwned>(&self, raw: &str) -> CacheResult<T> {
        let json = self.unpack(raw)?;
        Ok(serde_json::from_str(&json)?)
    }

    /// Compress text when enabled. Empty input is returned unchanged.
    pub fn pack(&self, text: &str) -> CacheResult<String> {
        if !self.compression || text.is_empty() {
            return Ok(text.to_string());
        }

        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder
            .write_all(text.as_bytes())
            .map_err(|e| CacheError::Encoding(format!("compress: {}", e)))?;
        let compressed = encoder
            .finish()
            .map_err(|e| CacheError::Encoding(format!("compress: {}", e)))?;

        Ok(BASE64_STANDARD.encode(compressed))
    }

    /// Decompress text when enabled. Empty input is returned unchanged.
    pub fn unpack(&self, raw: &str) -> CacheResult<String> {
        if !self.compression || raw.is_empty() {
            return Ok(raw.to_string());
        }

        let compressed = BASE64_STANDARD
            .decode(raw)
            .map_err(|e| CacheError::Encoding(format!("base64: {}", e)))?;

        let mut decoder = ZlibDecoder::new(compressed.as_slice());
        let mut text = String::new();
        decoder
            .read_to_string(&mut text)
            .map_err(|e| CacheError::Encoding(format!("decompress: {}", e)))?;

        Ok(text)
    }
}
