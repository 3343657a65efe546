//! RIFF/WebP container plumbing: a tolerant chunk walker for decoding and
//! the small writer the encoder muxes with.
//!
//! ```text
//! "RIFF" u32le(size) "WEBP" { fourcc u32le(len) body [pad to even] }*
//! ```

pub(crate) const RIFF_HEADER_LEN: usize = 12;

/// One chunk. `body` is clipped to the bytes actually present; `declared`
/// is the length the header promised.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Chunk<'a> {
    pub fourcc: [u8; 4],
    pub body: &'a [u8],
    /// Offset of the chunk header within the file.
    pub offset: usize,
    pub declared: usize,
}

impl Chunk<'_> {
    pub fn is_truncated(&self) -> bool {
        self.body.len() < self.declared
    }

    pub fn body_offset(&self) -> usize {
        self.offset + 8
    }
}

pub(crate) fn is_webp(data: &[u8]) -> bool {
    data.len() >= RIFF_HEADER_LEN && &data[0..4] == b"RIFF" && &data[8..12] == b"WEBP"
}

/// Walk top-level chunks. The last chunk may be truncated; walking stops
/// after it.
pub(crate) fn chunks(data: &[u8]) -> impl Iterator<Item = Chunk<'_>> {
    walk(data, RIFF_HEADER_LEN)
}

/// Walk chunks starting at `pos`, e.g. inside an `ANMF` body.
pub(crate) fn walk(data: &[u8], mut pos: usize) -> impl Iterator<Item = Chunk<'_>> {
    std::iter::from_fn(move || {
        let header = data.get(pos..pos + 8)?;
        let fourcc = [header[0], header[1], header[2], header[3]];
        let declared = u32::from_le_bytes([header[4], header[5], header[6], header[7]]) as usize;
        let start = pos + 8;
        let end = start.saturating_add(declared).min(data.len());
        let chunk = Chunk {
            fourcc,
            body: &data[start..end],
            offset: pos,
            declared,
        };
        pos = start.saturating_add(declared).saturating_add(declared & 1);
        Some(chunk)
    })
}

/// Append one chunk with its padding byte.
pub(crate) fn push_chunk(out: &mut Vec<u8>, fourcc: &[u8; 4], body: &[u8]) {
    out.extend_from_slice(fourcc);
    out.extend_from_slice(&(body.len() as u32).to_le_bytes());
    out.extend_from_slice(body);
    if body.len() % 2 == 1 {
        out.push(0);
    }
}

/// Wrap already-muxed chunks in the RIFF/WEBP header.
pub(crate) fn riff_webp(chunks: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(chunks.len() + RIFF_HEADER_LEN);
    out.extend_from_slice(b"RIFF");
    out.extend_from_slice(&((chunks.len() + 4) as u32).to_le_bytes());
    out.extend_from_slice(b"WEBP");
    out.extend_from_slice(chunks);
    out
}

/// 24-bit little-endian field as used by VP8X, ANMF and friends.
pub(crate) fn u24(value: u32) -> [u8; 3] {
    let b = value.to_le_bytes();
    [b[0], b[1], b[2]]
}

pub(crate) fn read_u24(bytes: &[u8]) -> u32 {
    u32::from_le_bytes([bytes[0], bytes[1], bytes[2], 0])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writer_pads_and_walker_reads_back() {
        let mut body = Vec::new();
        push_chunk(&mut body, b"ABCD", &[1, 2, 3]);
        push_chunk(&mut body, b"EFGH", &[4, 5]);
        let file = riff_webp(&body);
        assert!(is_webp(&file));
        assert_eq!(u32::from_le_bytes([file[4], file[5], file[6], file[7]]) as usize, file.len() - 8);

        let found: Vec<_> = chunks(&file).collect();
        assert_eq!(found.len(), 2);
        assert_eq!(&found[0].fourcc, b"ABCD");
        assert_eq!(found[0].body, &[1, 2, 3]);
        assert_eq!(found[1].body, &[4, 5]);
        assert!(!found[1].is_truncated());
    }

    #[test]
    fn truncated_chunk_is_clipped() {
        let mut body = Vec::new();
        push_chunk(&mut body, b"VP8L", &[9; 100]);
        let file = riff_webp(&body);
        let cut = &file[..60];
        let chunk = chunks(cut).next().unwrap();
        assert!(chunk.is_truncated());
        assert_eq!(chunk.declared, 100);
        assert_eq!(chunk.body.len(), 60 - 20);
    }

    #[test]
    fn u24_roundtrip() {
        assert_eq!(read_u24(&u24(0x123456)), 0x123456);
    }
}
