//! TWS socket framing and field encoding.
//!
//! Every message after the handshake is a 4-byte big-endian length
//! followed by a payload of NUL-terminated ASCII fields. An empty field
//! means "unset".

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::TwsError;

/// Lowest server version this client accepts.
pub const MIN_CLIENT_VERSION: i32 = 100;

/// Highest server version this client asks for. Message layouts in
/// [`messages`](crate::messages) are written against this range.
pub const MAX_CLIENT_VERSION: i32 = 157;

/// Upper bound on a single frame; TWS itself caps messages well below this.
const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

const LEN_PREFIX: usize = 4;

/// Bytes sent right after the TCP connect: the `API\0` magic followed by a
/// length-prefixed (not NUL-terminated) version range.
pub fn handshake_bytes() -> Bytes {
    let range = format!("v{MIN_CLIENT_VERSION}..{MAX_CLIENT_VERSION}");
    let mut buf = BytesMut::with_capacity(4 + LEN_PREFIX + range.len());
    buf.put_slice(b"API\0");
    buf.put_u32(range.len() as u32);
    buf.put_slice(range.as_bytes());
    buf.freeze()
}

/// Frame codec: decodes into the list of fields, encodes a list of fields.
#[derive(Debug, Default, Clone, Copy)]
pub struct TwsCodec;

impl TwsCodec {
    pub fn new() -> Self {
        Self
    }
}

impl Decoder for TwsCodec {
    type Item = Vec<String>;
    type Error = TwsError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < LEN_PREFIX {
            return Ok(None);
        }

        let mut len_bytes = [0u8; LEN_PREFIX];
        len_bytes.copy_from_slice(&src[..LEN_PREFIX]);
        let len = u32::from_be_bytes(len_bytes) as usize;

        if len > MAX_FRAME_LEN {
            return Err(TwsError::Protocol(format!("frame of {len} bytes exceeds limit")));
        }

        if src.len() < LEN_PREFIX + len {
            src.reserve(LEN_PREFIX + len - src.len());
            return Ok(None);
        }

        src.advance(LEN_PREFIX);
        let payload = src.split_to(len);
        Ok(Some(split_fields(&payload)))
    }
}

impl Encoder<Vec<String>> for TwsCodec {
    type Error = TwsError;

    fn encode(&mut self, fields: Vec<String>, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let len: usize = fields.iter().map(|f| f.len() + 1).sum();
        if len > MAX_FRAME_LEN {
            return Err(TwsError::Protocol(format!("frame of {len} bytes exceeds limit")));
        }
        dst.reserve(LEN_PREFIX + len);
        dst.put_u32(len as u32);
        for field in &fields {
            dst.put_slice(field.as_bytes());
            dst.put_u8(0);
        }
        Ok(())
    }
}

/// Split a payload on NUL. The trailing terminator does not produce an
/// extra empty field.
fn split_fields(payload: &[u8]) -> Vec<String> {
    if payload.is_empty() {
        return Vec::new();
    }
    let body = payload.strip_suffix(&[0]).unwrap_or(payload);
    body.split(|b| *b == 0)
        .map(|f| String::from_utf8_lossy(f).into_owned())
        .collect()
}

/// Builder for an outgoing field list.
#[derive(Debug, Default)]
pub struct FieldWriter {
    fields: Vec<String>,
}

impl FieldWriter {
    pub fn new(msg_id: i32) -> Self {
        Self {
            fields: vec![msg_id.to_string()],
        }
    }

    pub fn str(&mut self, value: &str) -> &mut Self {
        self.fields.push(value.to_string());
        self
    }

    pub fn int(&mut self, value: i64) -> &mut Self {
        self.fields.push(value.to_string());
        self
    }

    pub fn bool(&mut self, value: bool) -> &mut Self {
        self.fields.push(if value { "1" } else { "0" }.to_string());
        self
    }

    /// Doubles go out in their shortest round-trip form with a decimal
    /// point, matching what TWS expects for prices and strikes.
    pub fn float(&mut self, value: f64) -> &mut Self {
        let text = if value.fract() == 0.0 && value.is_finite() {
            format!("{value:.1}")
        } else {
            format!("{value}")
        };
        self.fields.push(text);
        self
    }

    /// An optional double; `None` is sent as an empty (unset) field.
    pub fn opt_float(&mut self, value: Option<f64>) -> &mut Self {
        match value {
            Some(v) => self.float(v),
            None => self.empty(),
        }
    }

    pub fn empty(&mut self) -> &mut Self {
        self.fields.push(String::new());
        self
    }

    /// Push `n` unset fields.
    pub fn empties(&mut self, n: usize) -> &mut Self {
        for _ in 0..n {
            self.empty();
        }
        self
    }

    pub fn finish(&mut self) -> Vec<String> {
        std::mem::take(&mut self.fields)
    }
}

/// Sequential reader over a decoded field list.
#[derive(Debug)]
pub struct FieldReader<'a> {
    fields: &'a [String],
    pos: usize,
}

impl<'a> FieldReader<'a> {
    pub fn new(fields: &'a [String]) -> Self {
        Self { fields, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.fields.len().saturating_sub(self.pos)
    }

    pub fn next_str(&mut self) -> Result<&'a str, TwsError> {
        let field = self
            .fields
            .get(self.pos)
            .ok_or_else(|| TwsError::Protocol(format!("missing field {}", self.pos)))?;
        self.pos += 1;
        Ok(field.as_str())
    }

    pub fn skip(&mut self, n: usize) -> Result<(), TwsError> {
        for _ in 0..n {
            self.next_str()?;
        }
        Ok(())
    }

    /// Integer field; empty counts as zero.
    pub fn next_i32(&mut self) -> Result<i32, TwsError> {
        let pos = self.pos;
        let raw = self.next_str()?;
        if raw.is_empty() {
            return Ok(0);
        }
        raw.parse()
            .map_err(|_| TwsError::Protocol(format!("field {pos}: expected integer, got {raw:?}")))
    }

    pub fn next_i64(&mut self) -> Result<i64, TwsError> {
        let pos = self.pos;
        let raw = self.next_str()?;
        if raw.is_empty() {
            return Ok(0);
        }
        raw.parse()
            .map_err(|_| TwsError::Protocol(format!("field {pos}: expected integer, got {raw:?}")))
    }

    /// Double field; empty counts as zero.
    pub fn next_f64(&mut self) -> Result<f64, TwsError> {
        Ok(self.next_opt_f64()?.unwrap_or(0.0))
    }

    /// Double field where empty means "unset".
    pub fn next_opt_f64(&mut self) -> Result<Option<f64>, TwsError> {
        let pos = self.pos;
        let raw = self.next_str()?;
        if raw.is_empty() {
            return Ok(None);
        }
        if raw.eq_ignore_ascii_case("infinity") {
            return Ok(Some(f64::INFINITY));
        }
        raw.parse()
            .map(Some)
            .map_err(|_| TwsError::Protocol(format!("field {pos}: expected number, got {raw:?}")))
    }

    pub fn next_bool(&mut self) -> Result<bool, TwsError> {
        let raw = self.next_str()?;
        Ok(matches!(raw, "1" | "true" | "True"))
    }
}
