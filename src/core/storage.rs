//! Little-endian primitives and chunk framing for the network image.
//!
//! A chunk is a 4-byte tag, a `u32` length, then the payload. Every chunk the
//! network writes is LZ4-compressed and carries its uncompressed length first.

use std::io::{self, Read, Write};

pub const MAGIC: &[u8; 8] = b"DIAMOND1";
pub const VERSION_V1: u32 = 1;
pub const VERSION_CURRENT: u32 = VERSION_V1;

pub fn compress_lz4(input: &[u8]) -> Vec<u8> {
    lz4_flex::compress(input)
}

pub fn decompress_lz4(input: &[u8], expected_size: usize) -> io::Result<Vec<u8>> {
    lz4_flex::decompress(input, expected_size)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "lz4 decompression failed"))
}

/// Sink that only counts bytes; used to size an image without buffering it.
#[derive(Debug, Default)]
pub struct CountingWriter {
    written: usize,
}

impl CountingWriter {
    pub fn new() -> Self {
        Self { written: 0 }
    }

    pub fn written(&self) -> usize {
        self.written
    }
}

impl Write for CountingWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.written = self.written.saturating_add(buf.len());
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

pub fn write_u8<W: Write>(w: &mut W, v: u8) -> io::Result<()> {
    w.write_all(&[v])
}

pub fn write_u32_le<W: Write>(w: &mut W, v: u32) -> io::Result<()> {
    w.write_all(&v.to_le_bytes())
}

pub fn write_u64_le<W: Write>(w: &mut W, v: u64) -> io::Result<()> {
    w.write_all(&v.to_le_bytes())
}

pub fn write_f32_le<W: Write>(w: &mut W, v: f32) -> io::Result<()> {
    w.write_all(&v.to_le_bytes())
}

pub fn write_f64_le<W: Write>(w: &mut W, v: f64) -> io::Result<()> {
    w.write_all(&v.to_le_bytes())
}

/// Length-prefixed run of `f32`.
pub fn write_f32_slice<W: Write>(w: &mut W, values: &[f32]) -> io::Result<()> {
    write_len(w, values.len())?;
    for v in values {
        write_f32_le(w, *v)?;
    }
    Ok(())
}

pub fn write_len<W: Write>(w: &mut W, len: usize) -> io::Result<()> {
    let len = u32::try_from(len)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "length exceeds u32"))?;
    write_u32_le(w, len)
}

pub fn read_exact<const N: usize, R: Read>(r: &mut R) -> io::Result<[u8; N]> {
    let mut buf = [0u8; N];
    r.read_exact(&mut buf)?;
    Ok(buf)
}

pub fn read_u8<R: Read>(r: &mut R) -> io::Result<u8> {
    Ok(read_exact::<1, _>(r)?[0])
}

pub fn read_u32_le<R: Read>(r: &mut R) -> io::Result<u32> {
    Ok(u32::from_le_bytes(read_exact::<4, _>(r)?))
}

pub fn read_u64_le<R: Read>(r: &mut R) -> io::Result<u64> {
    Ok(u64::from_le_bytes(read_exact::<8, _>(r)?))
}

pub fn read_f32_le<R: Read>(r: &mut R) -> io::Result<f32> {
    Ok(f32::from_le_bytes(read_exact::<4, _>(r)?))
}

pub fn read_f64_le<R: Read>(r: &mut R) -> io::Result<f64> {
    Ok(f64::from_le_bytes(read_exact::<8, _>(r)?))
}

/// Upper bound on any length prefix; guards allocation on corrupt input.
pub const MAX_LEN: usize = 1 << 20;

pub fn read_len<R: Read>(r: &mut R) -> io::Result<usize> {
    let n = read_u32_le(r)? as usize;
    if n > MAX_LEN {
        return Err(io::Error::new(io::ErrorKind::InvalidData, "length prefix too large"));
    }
    Ok(n)
}

pub fn read_f32_vec<R: Read>(r: &mut R) -> io::Result<Vec<f32>> {
    let n = read_len(r)?;
    (0..n).map(|_| read_f32_le(r)).collect()
}

/// Write a chunk whose payload is LZ4-compressed.
///
/// Layout:
/// - tag: [u8;4]
/// - len: u32 (bytes following, including the 4-byte uncompressed length)
/// - uncompressed_len: u32
/// - compressed payload bytes
pub fn write_chunk_lz4<W: Write>(w: &mut W, tag: [u8; 4], payload: &[u8]) -> io::Result<()> {
    let compressed = compress_lz4(payload);
    let uncompressed_len = u32::try_from(payload.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "chunk too large"))?;
    let total_len = 4u32.saturating_add(
        u32::try_from(compressed.len())
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "chunk too large"))?,
    );

    w.write_all(&tag)?;
    write_u32_le(w, total_len)?;
    write_u32_le(w, uncompressed_len)?;
    w.write_all(&compressed)
}

pub fn read_chunk_header<R: Read>(r: &mut R) -> io::Result<([u8; 4], u32)> {
    let tag = read_exact::<4, _>(r)?;
    let len = read_u32_le(r)?;
    Ok((tag, len))
}

/// Read the body of a chunk written by [`write_chunk_lz4`], consuming exactly
/// `len` bytes from `r`.
pub fn read_chunk_lz4<R: Read>(r: &mut R, len: u32) -> io::Result<Vec<u8>> {
    let mut take = r.take(u64::from(len));
    let uncompressed_len = read_u32_le(&mut take)? as usize;
    if uncompressed_len > MAX_LEN * 16 {
        return Err(io::Error::new(io::ErrorKind::InvalidData, "chunk too large"));
    }
    let mut compressed = Vec::with_capacity((len as usize).saturating_sub(4));
    take.read_to_end(&mut compressed)?;
    if compressed.len() + 4 != len as usize {
        return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "truncated chunk"));
    }
    decompress_lz4(&compressed, uncompressed_len)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_survives_compression() {
        let payload: Vec<u8> = (0..2048u32).map(|i| (i % 7) as u8).collect();
        let mut buf = Vec::new();
        write_chunk_lz4(&mut buf, *b"TEST", &payload).expect("write");
        let mut cur = io::Cursor::new(buf);
        let (tag, len) = read_chunk_header(&mut cur).expect("header");
        assert_eq!(&tag, b"TEST");
        assert_eq!(read_chunk_lz4(&mut cur, len).expect("body"), payload);
    }

    #[test]
    fn truncated_chunk_is_rejected() {
        let mut buf = Vec::new();
        write_chunk_lz4(&mut buf, *b"TEST", &[1, 2, 3, 4, 5, 6, 7, 8]).expect("write");
        buf.truncate(buf.len() - 2);
        let mut cur = io::Cursor::new(buf);
        let (_, len) = read_chunk_header(&mut cur).expect("header");
        assert!(read_chunk_lz4(&mut cur, len).is_err());
    }

    #[test]
    fn counting_writer_counts() {
        let mut cw = CountingWriter::new();
        write_f32_slice(&mut cw, &[1.0, 2.0, 3.0]).expect("write");
        assert_eq!(cw.written(), 4 + 12);
    }
}
