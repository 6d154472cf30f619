use std::fmt;
use std::fmt::Write;

use bytes::Bytes;

use crate::layout::*;
use crate::param::{Param, ParamValue};
use crate::reader::RawReader;
use crate::stats;
use crate::types::DecodeError;

/// An event decoded from a raw block.
///
/// Parsing either yields the whole event or fails; a partially decoded event
/// is never exposed.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedEvent {
    header: Header,
    trace_info: Option<TraceInfo>,
    params: Vec<Param>,
    raw: Bytes,
}

impl DecodedEvent {
    /// Parses the block at the start of `src`. Bytes beyond the declared
    /// block size are ignored.
    pub fn parse(src: &[u8]) -> Result<Self, DecodeError> {
        let result = Self::parse_block(src);
        match &result {
            Ok(event) => stats::block_decoded(event.raw.len()),
            Err(err) => {
                log::error!("invalid event block: {}", err);
                stats::block_invalid();
            }
        }
        result
    }

    fn parse_block(src: &[u8]) -> Result<Self, DecodeError> {
        let mut r = RawReader::new(src);
        let size = r.i32()?;
        if size <= 0 || size as usize > MAX_BLOCK_SIZE {
            return Err(DecodeError::InvalidBlockSize(size as i64));
        }
        let size = size as usize;
        if size > src.len() {
            return Err(DecodeError::TruncatedBlock {
                declared: size,
                available: src.len(),
            });
        }

        // Everything below reads within the declared block only.
        let block = &src[..size];
        let mut r = RawReader::new(block);
        r.bytes(BLOCK_SIZE_LEN)?;
        let header = Header::from_bytes(&r.array::<HEADER_SIZE>()?);
        let trace_info = if header.is_trace_opened() {
            Some(TraceInfo::from_bytes(&r.array::<TRACE_INFO_SIZE>()?))
        } else {
            None
        };

        let count = r.i32()?;
        if count < 0 {
            return Err(DecodeError::InvalidParamCount(count));
        }
        log::debug!("decoding block of {} bytes with {} params", size, count);

        let mut params = Vec::with_capacity((count as usize).min(r.remaining()));
        for index in 0..count as usize {
            let start = r.position();
            let param = Param::decode(&mut r).map_err(|err| {
                let mut probe = RawReader::new(&block[start..]);
                DecodeError::Param {
                    index,
                    key: probe.string().unwrap_or_default(),
                    source: Box::new(err),
                }
            })?;
            params.push(param);
        }
        if r.remaining() > 0 {
            log::warn!("{} trailing bytes after the last param", r.remaining());
        }

        Ok(Self {
            header,
            trace_info,
            params,
            raw: Bytes::copy_from_slice(block),
        })
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    pub fn domain(&self) -> String {
        self.header.domain()
    }

    pub fn name(&self) -> String {
        self.header.name()
    }

    pub fn event_type(&self) -> i32 {
        self.header.event_type()
    }

    pub fn trace_info(&self) -> Option<&TraceInfo> {
        self.trace_info.as_ref()
    }

    pub fn params(&self) -> &[Param] {
        &self.params
    }

    /// The bytes of the block itself, without anything that followed it.
    pub fn raw_data(&self) -> Bytes {
        self.raw.clone()
    }

    /// Renders the event as a flat JSON object.
    ///
    /// Floating values print in their shortest form at their wire width, so a
    /// whole number prints without a fraction and compiles back from JSON as
    /// an unsigned or signed integer rather than a floating value.
    pub fn as_json(&self) -> String {
        let mut out = String::with_capacity(self.raw.len() * 2);
        let h = &self.header;
        out.push('{');
        push_key(&mut out, KEY_DOMAIN);
        push_str(&mut out, &h.domain());
        push_key(&mut out, KEY_NAME);
        push_str(&mut out, &h.name());
        push_key(&mut out, KEY_TYPE);
        let _ = write!(out, "{},", h.event_type());
        push_key(&mut out, KEY_TIME_STAMP);
        let _ = write!(out, "{},", h.timestamp);
        push_key(&mut out, KEY_TIME_ZONE);
        push_str(&mut out, time_zone_name(h.time_zone));
        push_key(&mut out, KEY_PID);
        let _ = write!(out, "{},", h.pid);
        push_key(&mut out, KEY_TID);
        let _ = write!(out, "{},", h.tid);
        push_key(&mut out, KEY_UID);
        let _ = write!(out, "{},", h.uid);
        push_key(&mut out, KEY_ID);
        let _ = write!(out, "\"{:020}\",", h.id);

        if let Some(t) = &self.trace_info {
            push_key(&mut out, KEY_TRACE_FLAG);
            let _ = write!(out, "{},", t.trace_flag);
            push_key(&mut out, KEY_TRACE_ID);
            let _ = write!(out, "\"{:x}\",", t.trace_id);
            push_key(&mut out, KEY_SPAN_ID);
            let _ = write!(out, "\"{:x}\",", t.span_id);
            push_key(&mut out, KEY_PARENT_SPAN_ID);
            let _ = write!(out, "\"{:x}\",", t.pspan_id);
        }

        for param in &self.params {
            push_key(&mut out, param.key());
            push_param(&mut out, param);
            out.push(',');
        }

        if out.ends_with(',') {
            out.pop();
        }
        out.push('}');
        out
    }
}

impl fmt::Display for DecodedEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_json())
    }
}

fn push_key(out: &mut String, key: &str) {
    push_quoted(out, key);
    out.push(':');
}

fn push_str(out: &mut String, s: &str) {
    push_quoted(out, s);
    out.push(',');
}

fn push_quoted(out: &mut String, s: &str) {
    match serde_json::to_string(s) {
        Ok(quoted) => out.push_str(&quoted),
        Err(_) => {
            out.push('"');
            out.push('"');
        }
    }
}

fn push_f64(out: &mut String, v: f64) {
    if v.is_finite() {
        let _ = write!(out, "{}", v);
    } else {
        out.push_str("null");
    }
}

fn push_f32(out: &mut String, v: f32) {
    if v.is_finite() {
        let _ = write!(out, "{}", v);
    } else {
        out.push_str("null");
    }
}

fn push_list<T>(out: &mut String, items: &[T], mut item: impl FnMut(&mut String, &T)) {
    out.push('[');
    for (i, v) in items.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        item(out, v);
    }
    out.push(']');
}

fn push_param(out: &mut String, param: &Param) {
    // Single precision values are widened on decode; print them at the width
    // they were written with.
    match (param.value_type(), param.value()) {
        (ValueType::Float, ParamValue::Double(v)) => push_f32(out, *v as f32),
        (ValueType::Float, ParamValue::DoubleArray(v)) => {
            push_list(out, v, |o, x| push_f32(o, *x as f32))
        }
        (_, value) => push_value(out, value),
    }
}

fn push_value(out: &mut String, value: &ParamValue) {
    match value {
        ParamValue::Unsigned(v) => {
            let _ = write!(out, "{}", v);
        }
        ParamValue::Signed(v) => {
            let _ = write!(out, "{}", v);
        }
        ParamValue::Float(v) => push_f32(out, *v),
        ParamValue::Double(v) => push_f64(out, *v),
        ParamValue::String(v) => push_quoted(out, v),
        ParamValue::UnsignedArray(v) => push_list(out, v, |o, x| {
            let _ = write!(o, "{}", x);
        }),
        ParamValue::SignedArray(v) => push_list(out, v, |o, x| {
            let _ = write!(o, "{}", x);
        }),
        ParamValue::FloatArray(v) => push_list(out, v, |o, x| push_f32(o, *x)),
        ParamValue::DoubleArray(v) => push_list(out, v, |o, x| push_f64(o, *x)),
        ParamValue::StringArray(v) => push_list(out, v, |o, x| push_quoted(o, x)),
    }
}
