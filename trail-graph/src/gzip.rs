//! Minimal gzip container parser.
//!
//! `flate2`'s raw-deflate decoder only understands the deflate bitstream, not
//! the gzip container around it, so the 10-byte header (plus optional
//! FEXTRA/FNAME/FCOMMENT/FHCRC fields) and the 8-byte trailer are parsed by
//! hand here and the raw deflate stream in between is handed to `flate2`.

use std::io::Read;

use flate2::read::DeflateDecoder;
use thiserror::Error;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];
const FLAG_FTEXT: u8 = 0x01;
const FLAG_FHCRC: u8 = 0x02;
const FLAG_FEXTRA: u8 = 0x04;
const FLAG_FNAME: u8 = 0x08;
const FLAG_FCOMMENT: u8 = 0x10;

#[derive(Debug, Error)]
pub enum GzipError {
    #[error("input is shorter than the gzip header")]
    Truncated,
    #[error("bad gzip magic bytes")]
    BadMagic,
    #[error("unsupported compression method {0} (only deflate/8 is supported)")]
    UnsupportedMethod(u8),
    #[error("io error while inflating: {0}")]
    Io(#[from] std::io::Error),
}

/// Parses the fixed + optional gzip header fields starting at `data[0]` and
/// returns the byte offset of the first deflate-stream byte.
pub fn header_len(data: &[u8]) -> Result<usize, GzipError> {
    if data.len() < 10 {
        return Err(GzipError::Truncated);
    }
    if data[0..2] != GZIP_MAGIC {
        return Err(GzipError::BadMagic);
    }
    let method = data[2];
    if method != 8 {
        return Err(GzipError::UnsupportedMethod(method));
    }
    let flags = data[3];
    let mut offset = 10usize;

    if flags & FLAG_FEXTRA != 0 {
        let xlen = u16::from_le_bytes(
            data.get(offset..offset + 2)
                .ok_or(GzipError::Truncated)?
                .try_into()
                .unwrap(),
        ) as usize;
        offset += 2 + xlen;
    }
    if flags & FLAG_FNAME != 0 {
        offset += find_nul(data, offset)? + 1;
    }
    if flags & FLAG_FCOMMENT != 0 {
        offset += find_nul(data, offset)? + 1;
    }
    if flags & FLAG_FHCRC != 0 {
        offset += 2;
    }
    if offset > data.len() {
        return Err(GzipError::Truncated);
    }
    Ok(offset)
}

fn find_nul(data: &[u8], start: usize) -> Result<usize, GzipError> {
    data.get(start..)
        .ok_or(GzipError::Truncated)?
        .iter()
        .position(|&b| b == 0)
        .ok_or(GzipError::Truncated)
}

/// Decompresses a full gzip member: header, raw deflate body, 8-byte trailer.
pub fn decompress(data: &[u8]) -> Result<Vec<u8>, GzipError> {
    let start = header_len(data)?;
    if data.len() < start + 8 {
        return Err(GzipError::Truncated);
    }
    let body = &data[start..data.len() - 8];
    let mut decoder = DeflateDecoder::new(body);
    let mut out = Vec::new();
    decoder.read_to_end(&mut out)?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;

    #[test]
    fn header_len_matches_minimal_member() {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(b"hello world").unwrap();
        let gz = encoder.finish().unwrap();
        // No optional fields set by GzEncoder by default.
        assert_eq!(header_len(&gz).unwrap(), 10);
    }

    #[test]
    fn header_len_with_fextra_fname_fhcrc() {
        // Hand-build a header: magic, method=8, flags=FEXTRA|FNAME|FHCRC, mtime(4), xfl, os
        let mut data = vec![0x1f, 0x8b, 0x08, FLAG_FEXTRA | FLAG_FNAME | FLAG_FHCRC];
        data.extend_from_slice(&[0, 0, 0, 0]); // mtime
        data.push(0); // xfl
        data.push(255); // os
        let extra_len: u16 = 3;
        data.extend_from_slice(&extra_len.to_le_bytes());
        data.extend_from_slice(&[1, 2, 3]); // extra field bytes
        let name = b"tile.hgt";
        data.extend_from_slice(name);
        data.push(0); // nul terminator
        data.extend_from_slice(&[0xaa, 0xbb]); // fake FHCRC
        data.extend_from_slice(&[0u8; 4]); // pretend deflate body (unused here)

        let expected = 10 + 2 + extra_len as usize + name.len() + 1 + 2;
        assert_eq!(header_len(&data).unwrap(), expected);
    }

    #[test]
    fn roundtrip_through_gzencoder() {
        let original = b"the quick brown fox jumps over the lazy dog".repeat(50);
        let mut encoder = GzEncoder::new(Vec::new(), Compression::best());
        encoder.write_all(&original).unwrap();
        let gz = encoder.finish().unwrap();
        let decompressed = decompress(&gz).unwrap();
        assert_eq!(decompressed, original);
    }
}
