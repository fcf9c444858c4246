use std::io::{self, Write};

use bytes::Bytes;
use flate2::write::GzDecoder;
use flate2::{Decompress, FlushDecompress, Status};
use http::header::CONTENT_ENCODING;
use http::{HeaderMap, Method, StatusCode};

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];
const INFLATE_CHUNK: usize = 32 * 1024;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum ContentEncoding {
    Gzip,
    Deflate,
}

impl ContentEncoding {
    pub(crate) const fn as_str(self) -> &'static str {
        match self {
            Self::Gzip => "gzip",
            Self::Deflate => "deflate",
        }
    }

    /// Only a single `gzip` or `deflate` coding is decoded; anything else,
    /// including stacked codings, is passed through untouched.
    pub(crate) fn from_headers(headers: &HeaderMap) -> Option<Self> {
        let value = headers.get(CONTENT_ENCODING)?.to_str().ok()?;
        match value.trim().to_ascii_lowercase().as_str() {
            "gzip" | "x-gzip" => Some(Self::Gzip),
            "deflate" => Some(Self::Deflate),
            _ => None,
        }
    }
}

impl std::fmt::Display for ContentEncoding {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter.write_str(self.as_str())
    }
}

pub(crate) fn should_decode_content_encoded_body(method: &Method, status: StatusCode) -> bool {
    if *method == Method::HEAD {
        return false;
    }
    !(status.is_informational()
        || status == StatusCode::NO_CONTENT
        || status == StatusCode::NOT_MODIFIED)
}

enum DecoderState {
    Identity(Vec<u8>),
    // Framing is picked from the first two bytes, so both codings accept
    // either gzip or zlib framed data.
    Sniffing(Vec<u8>),
    Gzip(GzDecoder<Vec<u8>>),
    Zlib(ZlibInflater),
}

/// zlib stream inflater that only finishes once the stream trailer was seen.
///
/// Bytes after the end of the stream are ignored.
struct ZlibInflater {
    inner: Decompress,
    output: Vec<u8>,
    ended: bool,
}

impl ZlibInflater {
    fn new() -> Self {
        Self {
            inner: Decompress::new(true),
            output: Vec::new(),
            ended: false,
        }
    }

    fn reserve_output(&mut self) {
        if self.output.capacity() - self.output.len() < INFLATE_CHUNK {
            self.output.reserve(INFLATE_CHUNK);
        }
    }

    fn step(&mut self, input: &[u8], flush: FlushDecompress) -> io::Result<(usize, usize)> {
        self.reserve_output();
        let in_before = self.inner.total_in();
        let out_before = self.inner.total_out();
        let status = self
            .inner
            .decompress_vec(input, &mut self.output, flush)
            .map_err(|source| io::Error::new(io::ErrorKind::InvalidData, source))?;
        if matches!(status, Status::StreamEnd) {
            self.ended = true;
        }
        Ok((
            (self.inner.total_in() - in_before) as usize,
            (self.inner.total_out() - out_before) as usize,
        ))
    }

    fn write(&mut self, mut input: &[u8]) -> io::Result<()> {
        while !input.is_empty() && !self.ended {
            let (consumed, produced) = self.step(input, FlushDecompress::None)?;
            input = &input[consumed..];
            if consumed == 0 && produced == 0 {
                break;
            }
        }
        Ok(())
    }

    fn finish(mut self) -> io::Result<Vec<u8>> {
        while !self.ended {
            let (_, produced) = self.step(&[], FlushDecompress::Finish)?;
            if !self.ended && produced == 0 {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "unexpected end of file",
                ));
            }
        }
        Ok(self.output)
    }
}

/// Incremental response body decoder fed one frame at a time.
pub(crate) struct BodyDecoder {
    state: DecoderState,
}

impl BodyDecoder {
    pub(crate) fn identity() -> Self {
        Self {
            state: DecoderState::Identity(Vec::new()),
        }
    }

    pub(crate) fn inflate() -> Self {
        Self {
            state: DecoderState::Sniffing(Vec::new()),
        }
    }

    pub(crate) fn for_response(
        method: &Method,
        status: StatusCode,
        encoding: Option<ContentEncoding>,
    ) -> Self {
        match encoding {
            Some(_) if should_decode_content_encoded_body(method, status) => Self::inflate(),
            _ => Self::identity(),
        }
    }

    pub(crate) fn push(&mut self, chunk: &[u8]) -> io::Result<()> {
        match &mut self.state {
            DecoderState::Identity(buffer) => {
                buffer.extend_from_slice(chunk);
                Ok(())
            }
            DecoderState::Sniffing(pending) => {
                pending.extend_from_slice(chunk);
                if pending.len() < GZIP_MAGIC.len() {
                    return Ok(());
                }
                let pending = std::mem::take(pending);
                self.start_inflating(&pending)
            }
            DecoderState::Gzip(decoder) => decoder.write_all(chunk),
            DecoderState::Zlib(inflater) => inflater.write(chunk),
        }
    }

    fn start_inflating(&mut self, head: &[u8]) -> io::Result<()> {
        self.state = if head.starts_with(&GZIP_MAGIC) {
            DecoderState::Gzip(GzDecoder::new(Vec::new()))
        } else {
            DecoderState::Zlib(ZlibInflater::new())
        };
        self.push(head)
    }

    pub(crate) fn finish(mut self) -> io::Result<Bytes> {
        if let DecoderState::Sniffing(pending) = &mut self.state {
            if pending.is_empty() {
                return Ok(Bytes::new());
            }
            let pending = std::mem::take(pending);
            self.start_inflating(&pending)?;
        }
        let decoded = match self.state {
            DecoderState::Identity(buffer) => buffer,
            DecoderState::Gzip(decoder) => decoder.finish()?,
            DecoderState::Zlib(inflater) => inflater.finish()?,
            DecoderState::Sniffing(_) => Vec::new(),
        };
        Ok(Bytes::from(decoded))
    }
}
