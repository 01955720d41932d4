//! Pluggable payload compression for the distributed tier.
//!
//! Which codec runs is decided per entity by a boolean strategy flag; the
//! algorithm behind the flag is swappable through [`CompressionCodec`].

use std::io::{Read, Write};

use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;

/// Compress/decompress pair applied to serialized payloads before they reach
/// the key-value backend.
pub trait CompressionCodec: Send + Sync {
    /// Codec name for logging and wire diagnostics.
    fn name(&self) -> &'static str;

    /// Compresses `data`.
    fn compress(&self, data: &[u8]) -> std::io::Result<Vec<u8>>;

    /// Reverses [`Self::compress`].
    fn decompress(&self, data: &[u8]) -> std::io::Result<Vec<u8>>;
}

/// Gzip codec, the default for entities with compression enabled.
#[derive(Debug, Default, Clone, Copy)]
pub struct GzipCodec;

impl CompressionCodec for GzipCodec {
    fn name(&self) -> &'static str {
        "gzip"
    }

    fn compress(&self, data: &[u8]) -> std::io::Result<Vec<u8>> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(data)?;
        encoder.finish()
    }

    fn decompress(&self, data: &[u8]) -> std::io::Result<Vec<u8>> {
        let mut decoder = GzDecoder::new(data);
        let mut out = Vec::new();
        decoder.read_to_end(&mut out)?;
        Ok(out)
    }
}

/// Pass-through codec.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopCodec;

impl CompressionCodec for NoopCodec {
    fn name(&self) -> &'static str {
        "noop"
    }

    fn compress(&self, data: &[u8]) -> std::io::Result<Vec<u8>> {
        Ok(data.to_vec())
    }

    fn decompress(&self, data: &[u8]) -> std::io::Result<Vec<u8>> {
        Ok(data.to_vec())
    }
}
