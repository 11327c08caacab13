use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use std::io::{Read, Write};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CodecError {
    #[error("gzip encode failed: {0}")]
    Encode(#[source] std::io::Error),
    #[error("gzip decode failed: {0}")]
    Decode(#[source] std::io::Error),
    #[error("decompressed payload exceeds {limit} bytes")]
    TooLarge { limit: u64 },
}

/// Gzip-compresses `data` at the best compression level.
pub fn compress(data: &[u8]) -> Result<Vec<u8>, CodecError> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::best());
    encoder.write_all(data).map_err(CodecError::Encode)?;
    encoder.finish().map_err(CodecError::Encode)
}

/// Inflates a gzip stream, refusing to produce more than `limit` bytes.
pub fn decompress(data: &[u8], limit: u64) -> Result<Vec<u8>, CodecError> {
    let mut decoder = GzDecoder::new(data).take(limit + 1);
    let mut decompressed = Vec::new();
    decoder
        .read_to_end(&mut decompressed)
        .map_err(CodecError::Decode)?;
    if decompressed.len() as u64 > limit {
        return Err(CodecError::TooLarge { limit });
    }
    Ok(decompressed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compressed_payload_inflates_back() {
        let payload = br#"[{"id":"Alloc","type":"gauge","value":1}]"#.repeat(20);
        let packed = compress(&payload).unwrap();
        assert!(packed.len() < payload.len());
        assert_eq!(decompress(&packed, 1 << 20).unwrap(), payload);
    }

    #[test]
    fn test_garbage_is_a_decode_error() {
        assert!(matches!(
            decompress(b"definitely not gzip", 1024),
            Err(CodecError::Decode(_))
        ));
    }

    #[test]
    fn test_limit_is_enforced() {
        let packed = compress(&[0u8; 4096]).unwrap();
        assert!(matches!(
            decompress(&packed, 1024),
            Err(CodecError::TooLarge { limit: 1024 })
        ));
    }
}
