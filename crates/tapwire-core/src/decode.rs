//! Response body decompression.
//!
//! [`decode_body`] handles complete bodies; [`StreamDecoder`] handles
//! compressed event streams chunk by chunk.

use std::io::{self, Read, Write};

use flate2::read::{DeflateDecoder, GzDecoder, ZlibDecoder};

use crate::error::{CaptureError, Result};

/// Internal buffer size for the Brotli decoder.
const BROTLI_BUFFER_SIZE: usize = 4096;

/// Bytes needed to recognize zlib framing.
const ZLIB_HEADER_LEN: usize = 2;

/// A declared `content-encoding`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentEncoding {
    Identity,
    Gzip,
    Deflate,
    Brotli,
}

impl ContentEncoding {
    /// Interprets a `content-encoding` header value. Unknown or missing
    /// encodings are treated as identity.
    pub fn from_header(value: Option<&str>) -> Self {
        let token = value
            .and_then(|v| v.split(',').next())
            .map(|t| t.trim().to_ascii_lowercase())
            .unwrap_or_default();

        match token.as_str() {
            "gzip" | "x-gzip" => Self::Gzip,
            "deflate" => Self::Deflate,
            "br" => Self::Brotli,
            _ => Self::Identity,
        }
    }

    /// Header token for this encoding.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Identity => "identity",
            Self::Gzip => "gzip",
            Self::Deflate => "deflate",
            Self::Brotli => "br",
        }
    }
}

/// Decodes a complete body into text. Invalid UTF-8 is replaced rather than
/// rejected.
pub fn decode_body(raw: &[u8], encoding: ContentEncoding) -> Result<String> {
    let bytes = decode_bytes(raw, encoding).map_err(|source| CaptureError::Decode {
        encoding: encoding.as_str(),
        source,
    })?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

fn decode_bytes(raw: &[u8], encoding: ContentEncoding) -> io::Result<Vec<u8>> {
    let mut out = Vec::new();
    match encoding {
        ContentEncoding::Identity => out.extend_from_slice(raw),
        ContentEncoding::Gzip => {
            GzDecoder::new(raw).read_to_end(&mut out)?;
        }
        ContentEncoding::Deflate => {
            // Servers disagree on whether "deflate" means zlib-wrapped or raw.
            if ZlibDecoder::new(raw).read_to_end(&mut out).is_err() {
                out.clear();
                DeflateDecoder::new(raw).read_to_end(&mut out)?;
            }
        }
        ContentEncoding::Brotli => {
            brotli::Decompressor::new(raw, BROTLI_BUFFER_SIZE).read_to_end(&mut out)?;
        }
    }
    Ok(out)
}

/// Incremental decoder for a compressed stream.
pub enum StreamDecoder {
    Identity,
    Gzip(flate2::write::GzDecoder<Vec<u8>>),
    /// `deflate` before enough bytes arrived to tell zlib framing from raw.
    DeflateUndetected(Vec<u8>),
    Zlib(flate2::write::ZlibDecoder<Vec<u8>>),
    RawDeflate(flate2::write::DeflateDecoder<Vec<u8>>),
    Brotli(Box<brotli::DecompressorWriter<Vec<u8>>>),
}

impl std::fmt::Debug for StreamDecoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Identity => "Identity",
            Self::Gzip(_) => "Gzip",
            Self::DeflateUndetected(_) => "DeflateUndetected",
            Self::Zlib(_) => "Zlib",
            Self::RawDeflate(_) => "RawDeflate",
            Self::Brotli(_) => "Brotli",
        };
        f.debug_tuple("StreamDecoder").field(&name).finish()
    }
}

impl StreamDecoder {
    /// Creates a decoder for the given encoding.
    pub fn new(encoding: ContentEncoding) -> Self {
        match encoding {
            ContentEncoding::Identity => Self::Identity,
            ContentEncoding::Gzip => Self::Gzip(flate2::write::GzDecoder::new(Vec::new())),
            ContentEncoding::Deflate => Self::DeflateUndetected(Vec::new()),
            ContentEncoding::Brotli => Self::Brotli(Box::new(brotli::DecompressorWriter::new(
                Vec::new(),
                BROTLI_BUFFER_SIZE,
            ))),
        }
    }

    /// Feeds a compressed chunk and returns whatever decoded bytes are ready.
    pub fn decode(&mut self, chunk: &[u8]) -> Result<Vec<u8>> {
        if let Self::DeflateUndetected(head) = self {
            head.extend_from_slice(chunk);
            if head.len() < ZLIB_HEADER_LEN {
                return Ok(Vec::new());
            }
            let head = std::mem::take(head);
            *self = if is_zlib_header(&head) {
                Self::Zlib(flate2::write::ZlibDecoder::new(Vec::new()))
            } else {
                Self::RawDeflate(flate2::write::DeflateDecoder::new(Vec::new()))
            };
            return self.decode(&head);
        }

        let out = match self {
            Self::Identity => return Ok(chunk.to_vec()),
            Self::DeflateUndetected(_) => return Ok(Vec::new()),
            Self::Gzip(w) => write_and_drain(w, chunk, |w| w.get_mut()),
            Self::Zlib(w) => write_and_drain(w, chunk, |w| w.get_mut()),
            Self::RawDeflate(w) => write_and_drain(w, chunk, |w| w.get_mut()),
            Self::Brotli(w) => write_and_drain(&mut **w, chunk, |w| w.get_mut()),
        };
        out.map_err(|source| CaptureError::Decode {
            encoding: self.encoding().as_str(),
            source,
        })
    }

    fn encoding(&self) -> ContentEncoding {
        match self {
            Self::Identity => ContentEncoding::Identity,
            Self::Gzip(_) => ContentEncoding::Gzip,
            Self::DeflateUndetected(_) | Self::Zlib(_) | Self::RawDeflate(_) => {
                ContentEncoding::Deflate
            }
            Self::Brotli(_) => ContentEncoding::Brotli,
        }
    }
}

/// Whether `head` starts with a zlib CMF/FLG pair: deflate method with a
/// window of at most 32 KiB, and a header checksum divisible by 31.
fn is_zlib_header(head: &[u8]) -> bool {
    match head {
        [cmf, flg, ..] => {
            cmf & 0x0f == 8 && cmf >> 4 <= 7 && ((u16::from(*cmf) << 8) | u16::from(*flg)) % 31 == 0
        }
        _ => false,
    }
}

fn write_and_drain<W, F>(writer: &mut W, chunk: &[u8], inner: F) -> io::Result<Vec<u8>>
where
    W: Write,
    F: FnOnce(&mut W) -> &mut Vec<u8>,
{
    writer.write_all(chunk)?;
    writer.flush()?;
    Ok(std::mem::take(inner(writer)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::{DeflateEncoder, GzEncoder, ZlibEncoder};
    use flate2::Compression;

    const BODY: &str = r#"{"id":"msg_1","usage":{"input_tokens":3}}"#;

    fn gzip(data: &[u8]) -> Vec<u8> {
        let mut enc = GzEncoder::new(Vec::new(), Compression::default());
        enc.write_all(data).unwrap();
        enc.finish().unwrap()
    }

    fn brotli(data: &[u8]) -> Vec<u8> {
        let mut enc = brotli::CompressorWriter::new(Vec::new(), 4096, 5, 22);
        enc.write_all(data).unwrap();
        enc.into_inner()
    }

    #[test]
    fn header_parsing() {
        assert_eq!(ContentEncoding::from_header(None), ContentEncoding::Identity);
        assert_eq!(ContentEncoding::from_header(Some("GZIP")), ContentEncoding::Gzip);
        assert_eq!(ContentEncoding::from_header(Some(" br ")), ContentEncoding::Brotli);
        assert_eq!(
            ContentEncoding::from_header(Some("deflate, gzip")),
            ContentEncoding::Deflate
        );
        assert_eq!(
            ContentEncoding::from_header(Some("zstd")),
            ContentEncoding::Identity
        );
    }

    #[test]
    fn identity_passes_through() {
        let text = decode_body(BODY.as_bytes(), ContentEncoding::Identity).unwrap();
        assert_eq!(text, BODY);
    }

    #[test]
    fn decodes_gzip() {
        let text = decode_body(&gzip(BODY.as_bytes()), ContentEncoding::Gzip).unwrap();
        assert_eq!(text, BODY);
    }

    #[test]
    fn decodes_brotli() {
        let text = decode_body(&brotli(BODY.as_bytes()), ContentEncoding::Brotli).unwrap();
        assert_eq!(text, BODY);
    }

    #[test]
    fn decodes_zlib_and_raw_deflate() {
        let mut zlib = ZlibEncoder::new(Vec::new(), Compression::default());
        zlib.write_all(BODY.as_bytes()).unwrap();
        let zlib = zlib.finish().unwrap();
        assert_eq!(decode_body(&zlib, ContentEncoding::Deflate).unwrap(), BODY);

        let mut raw = DeflateEncoder::new(Vec::new(), Compression::default());
        raw.write_all(BODY.as_bytes()).unwrap();
        let raw = raw.finish().unwrap();
        assert_eq!(decode_body(&raw, ContentEncoding::Deflate).unwrap(), BODY);
    }

    #[test]
    fn corrupt_gzip_is_an_error() {
        let err = decode_body(b"definitely not gzip", ContentEncoding::Gzip).unwrap_err();
        assert!(matches!(err, CaptureError::Decode { encoding: "gzip", .. }));
    }

    #[test]
    fn stream_decoder_handles_split_gzip() {
        let compressed = gzip(b"event: ping\ndata: {}\n\n");
        let (a, b) = compressed.split_at(compressed.len() / 2);

        let mut decoder = StreamDecoder::new(ContentEncoding::Gzip);
        let mut out = decoder.decode(a).unwrap();
        out.extend(decoder.decode(b).unwrap());
        assert_eq!(out, b"event: ping\ndata: {}\n\n");
    }

    #[test]
    fn stream_decoder_identity_copies() {
        let mut decoder = StreamDecoder::new(ContentEncoding::Identity);
        assert_eq!(decoder.decode(b"data: x\n").unwrap(), b"data: x\n");
    }

    const STREAM: &[u8] = b"event: message_start\ndata: {\"message\":{\"id\":\"msg_s\"}}\n\n";

    fn decode_in_chunks(encoding: ContentEncoding, data: &[u8], size: usize) -> Vec<u8> {
        let mut decoder = StreamDecoder::new(encoding);
        let mut out = Vec::new();
        for chunk in data.chunks(size) {
            out.extend(decoder.decode(chunk).unwrap());
        }
        out
    }

    #[test]
    fn stream_decoder_handles_split_brotli() {
        let compressed = brotli(STREAM);
        assert_eq!(decode_in_chunks(ContentEncoding::Brotli, &compressed, 7), STREAM);
    }

    #[test]
    fn stream_decoder_handles_split_zlib() {
        let mut enc = ZlibEncoder::new(Vec::new(), Compression::default());
        enc.write_all(STREAM).unwrap();
        let compressed = enc.finish().unwrap();

        assert!(is_zlib_header(&compressed));
        assert_eq!(decode_in_chunks(ContentEncoding::Deflate, &compressed, 1), STREAM);
        assert_eq!(decode_in_chunks(ContentEncoding::Deflate, &compressed, 5), STREAM);
    }

    #[test]
    fn stream_decoder_handles_split_raw_deflate() {
        let mut enc = DeflateEncoder::new(Vec::new(), Compression::default());
        enc.write_all(STREAM).unwrap();
        let compressed = enc.finish().unwrap();

        assert!(!is_zlib_header(&compressed));
        assert_eq!(decode_in_chunks(ContentEncoding::Deflate, &compressed, 1), STREAM);
        assert_eq!(decode_in_chunks(ContentEncoding::Deflate, &compressed, 5), STREAM);
        assert_eq!(
            decode_body(&compressed, ContentEncoding::Deflate).unwrap().as_bytes(),
            STREAM
        );
    }

    #[test]
    fn zlib_header_check() {
        assert!(is_zlib_header(&[0x78, 0x9c]));
        assert!(is_zlib_header(&[0x78, 0x01]));
        assert!(!is_zlib_header(&[0x78, 0x9d]));
        assert!(!is_zlib_header(&[0x78]));
    }
}
