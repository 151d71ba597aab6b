//! gzip sniffing + streaming decompression.
//!
//! # Design Notes
//! - Layers may be gzip members or plain tar; the two-byte magic decides.
//!   Sniffing is stream-safe: the peeked bytes are chained back in front of
//!   the source, so no seeking is required.
//! - `MultiGzDecoder` treats concatenated members as a single stream, which
//!   matches how layer blobs are produced.

use flate2::read::MultiGzDecoder;
use std::io::{self, Read, Write};

/// gzip magic bytes (RFC 1952).
pub const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

#[inline]
pub fn is_gzip_magic(header: &[u8]) -> bool {
    header.len() >= 2 && header[0] == GZIP_MAGIC[0] && header[1] == GZIP_MAGIC[1]
}

/// Copy `src` into `dst`, transparently inflating gzip input.
///
/// Returns the number of decompressed bytes written.
pub fn decompress<R: Read, W: Write>(mut src: R, dst: &mut W) -> io::Result<u64> {
    let mut magic = [0u8; 2];
    let mut filled = 0;
    while filled < magic.len() {
        let n = src.read(&mut magic[filled..])?;
        if n == 0 {
            break;
        }
        filled += n;
    }

    let head = io::Cursor::new(magic[..filled].to_vec());
    if filled == magic.len() && is_gzip_magic(&magic) {
        io::copy(&mut MultiGzDecoder::new(head.chain(src)), dst)
    } else {
        io::copy(&mut head.chain(src), dst)
    }
}
