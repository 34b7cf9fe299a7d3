use std::io::{Read, Write};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;

/// Payloads at or above the configured threshold are gzipped and tagged
/// with this prefix; readers sniff the prefix and decompress transparently
/// (falling back to treating the bytes as raw if the prefix is absent).
const COMPRESSED_TAG: &[u8] = b"\x1fgz1:";

pub fn maybe_compress(data: Vec<u8>, threshold: usize) -> Vec<u8> {
    if data.len() < threshold {
        return data;
    }
    match compress_gzip(&data) {
        Ok(compressed) => {
            let mut tagged = Vec::with_capacity(COMPRESSED_TAG.len() + compressed.len());
            tagged.extend_from_slice(COMPRESSED_TAG);
            tagged.extend_from_slice(&compressed);
            tagged
        }
        Err(_) => data,
    }
}

pub fn maybe_decompress(data: Vec<u8>) -> Vec<u8> {
    if let Some(rest) = data.strip_prefix(COMPRESSED_TAG) {
        match decompress_gzip(rest) {
            Ok(plain) => return plain,
            Err(_) => return data,
        }
    }
    data
}

fn compress_gzip(data: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::fast());
    encoder.write_all(data)?;
    encoder.finish()
}

fn decompress_gzip(data: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut decoder = GzDecoder::new(data);
    let mut out = Vec::new();
    decoder.read_to_end(&mut out)?;
    Ok(out)
}
