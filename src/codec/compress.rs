//! gzip compression for request and response bodies.

use std::io::{self, Read, Write};

use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;

/// Upper bound on a decompressed body (16 MiB).
const MAX_DECOMPRESSED_SIZE: u64 = 16 * 1024 * 1024;

/// gzip `data` with the best compression level.
pub fn compress(data: &[u8]) -> io::Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::with_capacity(data.len() / 2 + 32), Compression::best());
    encoder.write_all(data)?;
    encoder.finish()
}

/// Inflate a gzip stream, refusing output beyond [`MAX_DECOMPRESSED_SIZE`].
pub fn decompress(data: &[u8]) -> io::Result<Vec<u8>> {
    let mut out = Vec::with_capacity(data.len() * 4);
    GzDecoder::new(data)
        .take(MAX_DECOMPRESSED_SIZE + 1)
        .read_to_end(&mut out)?;
    if out.len() as u64 > MAX_DECOMPRESSED_SIZE {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "decompressed body too large",
        ));
    }
    Ok(out)
}
