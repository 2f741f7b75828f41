//! Content sniffing for downloaded archives.

use std::io::{self, Cursor, Read};

use flate2::read::MultiGzDecoder;

/// Bytes inspected to decide the content type.
pub const SNIFF_LEN: usize = 512;

const GZIP_MAGIC: [u8; 3] = [0x1f, 0x8b, 0x08];

/// Whether `prefix` starts like a gzip stream.
#[must_use]
pub fn is_gzip(prefix: &[u8]) -> bool {
    prefix.starts_with(&GZIP_MAGIC)
}

/// Peek at the start of `input` and transparently decompress it if it is gzip.
///
/// The peeked bytes are replayed in front of the remaining input, so nothing
/// is lost on the pass-through path.
///
/// # Errors
///
/// Fails if reading the prefix fails.
pub fn decompressed<R>(mut input: R) -> io::Result<Box<dyn Read + Send>>
where
    R: Read + Send + 'static,
{
    let mut prefix = Vec::with_capacity(SNIFF_LEN);
    (&mut input)
        .take(SNIFF_LEN as u64)
        .read_to_end(&mut prefix)?;

    let gzip = is_gzip(&prefix);
    tracing::debug!(gzip, peeked = prefix.len(), "Sniffed archive");

    let replayed = Cursor::new(prefix).chain(input);
    if gzip {
        Ok(Box::new(MultiGzDecoder::new(replayed)))
    } else {
        Ok(Box::new(replayed))
    }
}
